//! idv-crypto: password-sealed envelopes for the identity vault
//!
//! Envelope format (binary):
//! ```text
//! [16 bytes: salt][12 bytes: nonce][16 bytes: GCM tag][N bytes: ciphertext]
//! key = PBKDF2-HMAC-SHA256(password, salt, iterations) → 256-bit AES key
//! ```
//!
//! The envelope is self-contained: no key material is stored anywhere else.
//! Salt and nonce are fresh on every seal.

pub mod envelope;
pub mod kdf;

pub use envelope::{open, open_with, seal, seal_with, EnvelopeError};
pub use kdf::{derive_key, KdfParams, VaultKey};

/// Size of the derived AES-256 key in bytes
pub const KEY_SIZE: usize = 32;

/// Size of the PBKDF2 salt (128-bit)
pub const SALT_SIZE: usize = 16;

/// Size of an AES-GCM nonce (96-bit)
pub const NONCE_SIZE: usize = 12;

/// Size of a GCM authentication tag
pub const TAG_SIZE: usize = 16;

/// Bytes preceding the ciphertext in every envelope
pub const HEADER_SIZE: usize = SALT_SIZE + NONCE_SIZE + TAG_SIZE;
