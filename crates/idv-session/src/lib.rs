//! idv-session: who is unlocked, what is active, and the operations a UI
//! drives.
//!
//! - [`session`]: the per-process [`Session`] context (cached password,
//!   active identity set) and its state tags
//! - [`gateway`]: pushes vault identities to the proxy and tears them down
//! - [`service`]: [`VaultService`], the UI-facing operation set

pub mod gateway;
pub mod service;
pub mod session;

pub use gateway::{ActivationGateway, LoginOutcome, LogoutReport};
pub use service::{EnrollmentRequest, UploadRequest, VaultService};
pub use session::{InitialState, Session, UnlockOutcome};
