//! Seal/open: password-based AES-256-GCM envelopes
//!
//! `seal` output: `[16-byte salt][12-byte nonce][16-byte tag][ciphertext]`
//!
//! `open` reports every failure (short input, bad tag, wrong password) as the
//! same `WrongPasswordOrCorrupt` so callers cannot be used as an oracle.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use rand::RngCore;
use secrecy::SecretString;
use thiserror::Error;

use crate::kdf::{derive_key, KdfParams};
use crate::{HEADER_SIZE, NONCE_SIZE, SALT_SIZE, TAG_SIZE};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvelopeError {
    #[error("wrong password or corrupted data")]
    WrongPasswordOrCorrupt,

    #[error("envelope encryption failed")]
    SealFailed,
}

/// Seal `plaintext` under `password` with default KDF params.
pub fn seal(plaintext: &[u8], password: &SecretString) -> Result<Vec<u8>, EnvelopeError> {
    seal_with(plaintext, password, &KdfParams::default())
}

/// Open an envelope produced by [`seal`].
pub fn open(envelope: &[u8], password: &SecretString) -> Result<Vec<u8>, EnvelopeError> {
    open_with(envelope, password, &KdfParams::default())
}

pub fn seal_with(
    plaintext: &[u8],
    password: &SecretString,
    params: &KdfParams,
) -> Result<Vec<u8>, EnvelopeError> {
    let mut salt = [0u8; SALT_SIZE];
    let mut nonce_bytes = [0u8; NONCE_SIZE];
    let mut rng = rand::thread_rng();
    rng.fill_bytes(&mut salt);
    rng.fill_bytes(&mut nonce_bytes);

    let key = derive_key(password, &salt, params);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));

    // aes-gcm appends the tag; the envelope wants it ahead of the ciphertext
    let sealed = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
        .map_err(|_| EnvelopeError::SealFailed)?;
    let (ciphertext, tag) = sealed.split_at(sealed.len() - TAG_SIZE);

    let mut out = Vec::with_capacity(HEADER_SIZE + ciphertext.len());
    out.extend_from_slice(&salt);
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(tag);
    out.extend_from_slice(ciphertext);
    Ok(out)
}

pub fn open_with(
    envelope: &[u8],
    password: &SecretString,
    params: &KdfParams,
) -> Result<Vec<u8>, EnvelopeError> {
    if envelope.len() < HEADER_SIZE {
        tracing::debug!(len = envelope.len(), "envelope shorter than header");
        return Err(EnvelopeError::WrongPasswordOrCorrupt);
    }

    let (salt, rest) = envelope.split_at(SALT_SIZE);
    let (nonce_bytes, rest) = rest.split_at(NONCE_SIZE);
    let (tag, ciphertext) = rest.split_at(TAG_SIZE);

    let mut salt_arr = [0u8; SALT_SIZE];
    salt_arr.copy_from_slice(salt);
    let key = derive_key(password, &salt_arr, params);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));

    let mut combined = Vec::with_capacity(ciphertext.len() + TAG_SIZE);
    combined.extend_from_slice(ciphertext);
    combined.extend_from_slice(tag);

    cipher
        .decrypt(Nonce::from_slice(nonce_bytes), combined.as_slice())
        .map_err(|_| EnvelopeError::WrongPasswordOrCorrupt)
}
