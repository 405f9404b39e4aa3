//! UI-facing operations
//!
//! [`VaultService`] is the whole surface a front end needs: every method
//! maps to one user action and returns a `VaultResult` whose error
//! message is fit to show.

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine};
use idv_core::config::IdvConfig;
use idv_core::{ActiveIdentity, IdentityCandidate, IdentityRecord, VaultError, VaultResult};
use idv_proxy::{check_health, HttpProxyClient, ProxyControl, ProxyHealth};
use idv_vault::{Removal, VaultEvent, VaultStore};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::broadcast;
use tracing::info;

use crate::gateway::{LoginOutcome, LogoutReport};
use crate::session::{Session, UnlockOutcome};

pub struct EnrollmentRequest {
    /// Enrollment token, as read from the `.jwt` file.
    pub jwt_content: String,
    pub file_name: Option<String>,
    pub name: Option<String>,
    pub password: SecretString,
}

pub struct UploadRequest {
    /// Raw JSON, or base64 of JSON.
    pub identity_file: Vec<u8>,
    pub file_name: Option<String>,
    pub name: Option<String>,
    pub password: SecretString,
}

#[derive(Debug, Clone)]
pub struct VaultService {
    session: Arc<Session>,
    min_password_len: usize,
}

impl VaultService {
    pub fn new(session: Arc<Session>, min_password_len: usize) -> Self {
        Self {
            session,
            min_password_len,
        }
    }

    /// Wire the store and the HTTP proxy client from configuration.
    pub fn from_config(config: &IdvConfig) -> VaultResult<Self> {
        let store = Arc::new(VaultStore::from_config(&config.vault));
        let proxy: Arc<dyn ProxyControl> = Arc::new(HttpProxyClient::from_config(&config.proxy)?);
        Ok(Self::new(
            Arc::new(Session::new(store, proxy)),
            config.vault.min_password_len,
        ))
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn check_vault_exists(&self) -> bool {
        self.session.store().exists()
    }

    pub async fn unlock_vault(&self, password: SecretString) -> VaultResult<UnlockOutcome> {
        self.session.unlock(password).await
    }

    pub async fn get_vault_identities(&self) -> VaultResult<Vec<IdentityRecord>> {
        self.session.identities().await
    }

    pub async fn login_selected(&self, ids: &[String]) -> VaultResult<LoginOutcome> {
        self.session.login(ids).await
    }

    /// Exchange an enrollment token with the proxy and store the resulting
    /// credential.
    pub async fn handle_enrollment(&self, req: EnrollmentRequest) -> VaultResult<IdentityRecord> {
        self.check_new_password(&req.password)?;
        let jwt = validate_jwt(&req.jwt_content)?;

        // tokens are single use: prove the password before spending one
        if self.check_vault_exists() {
            self.session.store().read_all(&req.password).await?;
        }

        let credential = self.session.gateway().proxy().enroll(jwt).await?;
        info!(file = ?req.file_name, "token enrolled with proxy");

        self.store_candidate(
            IdentityCandidate {
                id_string: None,
                name: req.name,
                credential,
                file_name: req.file_name,
            },
            req.password,
        )
        .await
    }

    /// Store an already-enrolled identity file.
    pub async fn handle_identity_upload(&self, req: UploadRequest) -> VaultResult<IdentityRecord> {
        self.check_new_password(&req.password)?;
        let credential = parse_identity_file(&req.identity_file)?;

        self.store_candidate(
            IdentityCandidate {
                id_string: None,
                name: req.name,
                credential,
                file_name: req.file_name,
            },
            req.password,
        )
        .await
    }

    pub async fn remove_identity_from_vault(
        &self,
        id_string: &str,
        password: SecretString,
    ) -> VaultResult<Removal> {
        if password.expose_secret().is_empty() {
            return Err(VaultError::Validation("password must not be empty".into()));
        }
        let removal = self
            .session
            .store()
            .remove_identity(id_string, &password)
            .await?;
        self.session.cache_password(password).await;
        Ok(removal)
    }

    pub async fn logout(&self) -> LogoutReport {
        self.session.logout().await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<VaultEvent> {
        self.session.store().events().subscribe()
    }

    /// What the proxy reports as active; the local active set is trimmed
    /// to match.
    pub async fn active_identities(&self) -> VaultResult<Vec<ActiveIdentity>> {
        let reported = self.session.gateway().proxy().list_identities().await?;
        self.session.reconcile(&reported).await;
        Ok(reported)
    }

    /// Deactivate by proxy `identity_id`, or by vault `id_string` when this
    /// session learned its proxy id at login.
    pub async fn deactivate(&self, id: &str) -> VaultResult<()> {
        let target = self
            .session
            .proxy_id_for(id)
            .await
            .unwrap_or_else(|| id.to_string());
        self.session
            .gateway()
            .proxy()
            .delete_identity(&target)
            .await?;
        self.session.mark_inactive(&target).await;
        self.session.mark_inactive(id).await;
        info!(id = %id, proxy_id = %target, "identity deactivated");
        Ok(())
    }

    pub async fn proxy_health(&self) -> ProxyHealth {
        check_health(self.session.gateway().proxy().as_ref()).await
    }

    async fn store_candidate(
        &self,
        candidate: IdentityCandidate,
        password: SecretString,
    ) -> VaultResult<IdentityRecord> {
        let record = self
            .session
            .store()
            .add_identity(candidate, &password)
            .await?;
        // the password just sealed the vault, so it is the right one to hold
        self.session.cache_password(password).await;
        Ok(record)
    }

    fn check_new_password(&self, password: &SecretString) -> VaultResult<()> {
        let len = password.expose_secret().chars().count();
        if len < self.min_password_len {
            return Err(VaultError::Validation(format!(
                "password must be at least {} characters",
                self.min_password_len
            )));
        }
        Ok(())
    }
}

/// Trim and shape-check an enrollment token: three dot-separated segments,
/// header and payload non-empty.
pub fn validate_jwt(content: &str) -> VaultResult<&str> {
    let jwt = content.trim();
    if jwt.is_empty() {
        return Err(VaultError::Validation("enrollment token is empty".into()));
    }
    let segments: Vec<&str> = jwt.split('.').collect();
    if segments.len() != 3 || segments[0].is_empty() || segments[1].is_empty() {
        return Err(VaultError::Validation(
            "enrollment token is not a JWT (expected header.payload.signature)".into(),
        ));
    }
    if jwt.chars().any(char::is_whitespace) {
        return Err(VaultError::Validation(
            "enrollment token contains whitespace".into(),
        ));
    }
    Ok(jwt)
}

/// Decode an identity file given as raw JSON or as base64 of JSON. The
/// result must be a JSON object.
pub fn parse_identity_file(bytes: &[u8]) -> VaultResult<serde_json::Value> {
    let text = std::str::from_utf8(bytes)
        .map_err(|_| VaultError::Validation("identity file is not UTF-8 text".into()))?
        .trim();
    if text.is_empty() {
        return Err(VaultError::Validation("identity file is empty".into()));
    }

    let value = match serde_json::from_str::<serde_json::Value>(text) {
        Ok(v) => v,
        Err(_) => {
            let compact: String = text.split_whitespace().collect();
            let decoded = STANDARD.decode(compact).map_err(|_| {
                VaultError::Validation("identity file is neither JSON nor base64 JSON".into())
            })?;
            serde_json::from_slice(&decoded).map_err(|_| {
                VaultError::Validation("decoded identity file is not JSON".into())
            })?
        }
    };

    if !value.is_object() {
        return Err(VaultError::Validation(
            "identity file must contain a JSON object".into(),
        ));
    }
    Ok(value)
}
