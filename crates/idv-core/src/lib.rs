//! idv-core: types shared by every idvault crate.
//!
//! - [`config`]: the `idvault.toml` schema and loader
//! - [`error`]: the vault/session/proxy error taxonomy
//! - [`types`]: identity records, the vault document, session state tags

pub mod config;
pub mod error;
pub mod types;

pub use error::{ProxyError, VaultError, VaultResult};
pub use types::{ActiveIdentity, IdentityCandidate, IdentityRecord, StateTag, Vault};
