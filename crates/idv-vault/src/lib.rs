//! idv-vault: the encrypted identity store
//!
//! One file holds every identity, sealed with the vault password
//! (see `idv-crypto` for the envelope format). Mutations are
//! read-modify-write sequences serialized through a FIFO lock so that
//! concurrent enrollments never lose each other's records.

pub mod events;
pub mod lock;
pub mod naming;
pub mod store;

pub use events::{VaultEvent, VaultEvents};
pub use lock::{MutationGuard, MutationLock};
pub use naming::{derive_id_string, sanitize_id};
pub use store::{Removal, VaultStore};
