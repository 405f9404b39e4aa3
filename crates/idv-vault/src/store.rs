//! Encrypted-at-rest vault file: read, atomic write, serialized mutations.
//!
//! On disk the file is the sealed envelope encoded as standard base64.
//! Writes go to a temp file in the same directory and are renamed over the
//! vault, so a crash mid-write leaves the previous vault intact.

use base64::{engine::general_purpose::STANDARD, Engine};
use idv_core::config::VaultConfig;
use idv_core::{IdentityCandidate, IdentityRecord, Vault, VaultError, VaultResult};
use idv_crypto::{EnvelopeError, KdfParams};
use secrecy::SecretString;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

use crate::events::{VaultEvent, VaultEvents};
use crate::lock::MutationLock;
use crate::naming::{derive_id_string, metadata_label, sanitize_id};

/// Result of a successful `remove_identity`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Removal {
    pub removed_id_string: String,
    pub remaining_count: usize,
}

#[derive(Debug)]
pub struct VaultStore {
    path: PathBuf,
    params: KdfParams,
    lock: MutationLock,
    events: VaultEvents,
}

impl VaultStore {
    pub fn new(path: impl Into<PathBuf>, params: KdfParams) -> Self {
        Self {
            path: path.into(),
            params,
            lock: MutationLock::new(),
            events: VaultEvents::default(),
        }
    }

    pub fn from_config(config: &VaultConfig) -> Self {
        Self::new(
            config.path.clone(),
            KdfParams::with_iterations(config.kdf_iterations),
        )
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    pub fn events(&self) -> &VaultEvents {
        &self.events
    }

    pub fn mutation_lock(&self) -> &MutationLock {
        &self.lock
    }

    /// Decrypt and parse the whole vault.
    pub async fn read_all(&self, password: &SecretString) -> VaultResult<Vault> {
        let encoded = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(VaultError::VaultMissing)
            }
            Err(e) => return Err(e.into()),
        };

        // undecodable text is just another flavour of corruption
        let envelope = STANDARD
            .decode(trim_ascii(&encoded))
            .map_err(|_| VaultError::WrongPasswordOrCorrupt)?;

        let password = password.clone();
        let params = self.params;
        let plaintext =
            tokio::task::spawn_blocking(move || idv_crypto::open_with(&envelope, &password, &params))
                .await
                .map_err(|e| VaultError::Io(std::io::Error::other(e)))?
                .map_err(envelope_error)?;

        let vault: Vault = serde_json::from_slice(&plaintext)
            .map_err(|e| VaultError::Corrupt(format!("parsing vault document: {e}")))?;
        debug!(path = %self.path.display(), identities = vault.len(), "vault read");
        Ok(vault)
    }

    /// Seal and atomically replace the vault file.
    pub async fn write_all(&self, vault: &Vault, password: &SecretString) -> VaultResult<()> {
        let plaintext = serde_json::to_vec(vault)
            .map_err(|e| VaultError::VaultWrite(format!("serializing vault: {e}")))?;

        let password = password.clone();
        let params = self.params;
        let envelope =
            tokio::task::spawn_blocking(move || idv_crypto::seal_with(&plaintext, &password, &params))
                .await
                .map_err(|e| VaultError::VaultWrite(format!("seal task: {e}")))?
                .map_err(|e| VaultError::VaultWrite(e.to_string()))?;

        atomic_write(&self.path, STANDARD.encode(envelope).as_bytes())
            .await
            .map_err(|e| VaultError::VaultWrite(format!("{}: {e}", self.path.display())))?;

        debug!(path = %self.path.display(), identities = vault.len(), "vault written");
        Ok(())
    }

    /// Insert an identity under the mutation lock.
    ///
    /// Starts an empty vault when no file exists yet. A colliding
    /// `id_string` fails with `DuplicateIdString` and writes nothing.
    pub async fn add_identity(
        &self,
        candidate: IdentityCandidate,
        password: &SecretString,
    ) -> VaultResult<IdentityRecord> {
        let _guard = self.lock.acquire().await;

        let mut vault = if self.exists() {
            self.read_all(password).await?
        } else {
            Vault::default()
        };

        let id_string = match candidate.id_string.as_deref() {
            Some(explicit) => {
                let clean = sanitize_id(explicit);
                if clean.is_empty() {
                    return Err(VaultError::Validation(format!(
                        "identity id '{explicit}' has no usable characters"
                    )));
                }
                clean
            }
            None => derive_id_string(&candidate),
        };

        if vault.contains(&id_string) {
            return Err(VaultError::DuplicateIdString(id_string));
        }

        let name = candidate
            .name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .or_else(|| metadata_label(&candidate.credential))
            .unwrap_or_else(|| id_string.clone());

        let record = IdentityRecord {
            id_string,
            name,
            credential: candidate.credential,
            added_at: now_epoch(),
            file_name: candidate.file_name,
        };
        vault.identities.push(record.clone());
        self.write_all(&vault, password).await?;

        info!(id = %record.id_string, total = vault.len(), "identity added to vault");
        self.events.emit(VaultEvent::IdentityAdded {
            id_string: record.id_string.clone(),
        });
        Ok(record)
    }

    /// Remove an identity by exact id under the mutation lock.
    pub async fn remove_identity(
        &self,
        id_string: &str,
        password: &SecretString,
    ) -> VaultResult<Removal> {
        let _guard = self.lock.acquire().await;

        if !self.exists() {
            return Err(VaultError::VaultMissing);
        }
        let mut vault = self.read_all(password).await?;

        if vault.remove(id_string).is_none() {
            return Err(VaultError::NotFound {
                id_string: id_string.to_string(),
                remaining_count: vault.len(),
            });
        }
        self.write_all(&vault, password).await?;

        let remaining_count = vault.len();
        info!(id = %id_string, remaining = remaining_count, "identity removed from vault");
        self.events.emit(VaultEvent::IdentityRemoved {
            id_string: id_string.to_string(),
            remaining: remaining_count,
        });
        Ok(Removal {
            removed_id_string: id_string.to_string(),
            remaining_count,
        })
    }
}

fn envelope_error(e: EnvelopeError) -> VaultError {
    match e {
        EnvelopeError::WrongPasswordOrCorrupt => VaultError::WrongPasswordOrCorrupt,
        EnvelopeError::SealFailed => VaultError::VaultWrite(e.to_string()),
    }
}

/// Write to `.<name>.tmp` beside the target, fsync it, then rename over it.
///
/// The temp file is created owner-only; the vault never exists on disk with
/// wider permissions, even briefly.
async fn atomic_write(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    tokio::fs::create_dir_all(parent).await?;

    let tmp_path = parent.join(format!(
        ".{}.tmp",
        path.file_name().unwrap_or_default().to_string_lossy()
    ));

    // leftover from a crash; its mode can't be trusted
    match tokio::fs::remove_file(&tmp_path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }

    if let Err(e) = write_synced(&tmp_path, content).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(e);
    }
    if let Err(e) = tokio::fs::rename(&tmp_path, path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(e);
    }

    // persist the rename itself
    #[cfg(unix)]
    tokio::fs::File::open(parent).await?.sync_all().await?;
    Ok(())
}

async fn write_synced(tmp_path: &Path, content: &[u8]) -> std::io::Result<()> {
    use tokio::io::AsyncWriteExt;

    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options.open(tmp_path).await?;
    file.write_all(content).await?;
    file.sync_all().await
}

fn trim_ascii(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    &bytes[start..end]
}

fn now_epoch() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
