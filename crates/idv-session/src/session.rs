//! Session/auth state machine
//!
//! ```text
//! NoVault ─add─▶ NeedsPassword ─unlock─▶ UnlockedEmpty | UnlockedListed
//!                      ▲                              │ login
//!                      └──────────── logout ◀── LoggedIn
//! ```
//!
//! The cached password lives only in memory, only after it has decrypted
//! the vault, and is dropped on logout or as soon as it stops working.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use idv_core::{ActiveIdentity, IdentityRecord, StateTag, Vault, VaultError, VaultResult};
use idv_proxy::ProxyControl;
use idv_vault::VaultStore;
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::gateway::{resolve, ActivationGateway, LoginOutcome, LogoutReport};

/// Answer to "what should the UI show right now".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitialState {
    pub tag: StateTag,
    /// Why a cached password was discarded, when that happened.
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct UnlockOutcome {
    /// `UnlockedEmpty` or `UnlockedListed`.
    pub tag: StateTag,
    pub identities: Vec<IdentityRecord>,
}

#[derive(Default)]
struct SessionState {
    cached_password: Option<SecretString>,
    /// Vault `id_string` → the proxy's `identity_id`, when known.
    active: BTreeMap<String, Option<String>>,
}

/// Per-process session context. Build one at start, share it behind an
/// `Arc`.
pub struct Session {
    store: Arc<VaultStore>,
    gateway: ActivationGateway,
    state: RwLock<SessionState>,
}

impl Session {
    pub fn new(store: Arc<VaultStore>, proxy: Arc<dyn ProxyControl>) -> Self {
        Self {
            store,
            gateway: ActivationGateway::new(proxy),
            state: RwLock::new(SessionState::default()),
        }
    }

    pub fn store(&self) -> &Arc<VaultStore> {
        &self.store
    }

    pub fn gateway(&self) -> &ActivationGateway {
        &self.gateway
    }

    pub async fn is_unlocked(&self) -> bool {
        self.state.read().await.cached_password.is_some()
    }

    /// Ids this session has pushed to the proxy, sorted.
    pub async fn active_ids(&self) -> Vec<String> {
        self.state.read().await.active.keys().cloned().collect()
    }

    /// The proxy's `identity_id` for an activated vault identity.
    pub async fn proxy_id_for(&self, id_string: &str) -> Option<String> {
        self.state.read().await.active.get(id_string).cloned().flatten()
    }

    /// The cached password, or `VaultLocked`.
    pub async fn password(&self) -> VaultResult<SecretString> {
        self.state
            .read()
            .await
            .cached_password
            .clone()
            .ok_or(VaultError::VaultLocked)
    }

    /// Remember a password that has just decrypted (or created) the vault.
    pub async fn cache_password(&self, password: SecretString) {
        self.state.write().await.cached_password = Some(password);
    }

    async fn forget_password(&self) {
        self.state.write().await.cached_password = None;
    }

    pub async fn determine_initial_state(&self) -> InitialState {
        if !self.store.exists() {
            return InitialState {
                tag: StateTag::NoVault,
                error: None,
            };
        }

        let Ok(password) = self.password().await else {
            return InitialState {
                tag: StateTag::NeedsPassword,
                error: None,
            };
        };

        match self.store.read_all(&password).await {
            Ok(vault) => {
                let tag = if self.state.read().await.active.is_empty() {
                    StateTag::for_count(vault.len())
                } else {
                    StateTag::LoggedIn
                };
                InitialState { tag, error: None }
            }
            Err(e) => {
                warn!(error = %e, "cached password no longer opens the vault");
                self.forget_password().await;
                InitialState {
                    tag: StateTag::NeedsPassword,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Open the vault and, on success only, cache `password`.
    pub async fn unlock(&self, password: SecretString) -> VaultResult<UnlockOutcome> {
        if password.expose_secret().is_empty() {
            return Err(VaultError::Validation("password must not be empty".into()));
        }

        let vault = self.store.read_all(&password).await?;
        self.cache_password(password).await;

        let tag = StateTag::for_count(vault.len());
        info!(identities = vault.len(), state = %tag, "vault unlocked");
        Ok(UnlockOutcome {
            tag,
            identities: vault.identities,
        })
    }

    pub async fn identities(&self) -> VaultResult<Vec<IdentityRecord>> {
        self.vault().await.map(|v| v.identities)
    }

    /// Vault contents under the cached password.
    ///
    /// A cached password that stops working is discarded rather than
    /// retried.
    pub async fn vault(&self) -> VaultResult<Vault> {
        let password = self.password().await?;
        match self.store.read_all(&password).await {
            Ok(vault) => Ok(vault),
            Err(e @ VaultError::WrongPasswordOrCorrupt) => {
                self.forget_password().await;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Activate `ids` on the proxy.
    ///
    /// Every id must resolve before anything is pushed. If a push fails
    /// midway, the ones already pushed are recorded as active and stay
    /// active; there is no rollback.
    pub async fn login(&self, ids: &[String]) -> VaultResult<LoginOutcome> {
        if ids.is_empty() {
            return Err(VaultError::Validation("select at least one identity".into()));
        }

        let records = resolve(&self.vault().await?, ids)?;

        let result = self.gateway.push_all(records).await;
        {
            let mut state = self.state.write().await;
            for pushed in &result.pushed {
                let slot = state
                    .active
                    .entry(pushed.record.id_string.clone())
                    .or_insert(None);
                // a re-push replaces in place and shows no new id; keep the old one
                if pushed.proxy_id.is_some() {
                    *slot = pushed.proxy_id.clone();
                }
            }
        }

        if let Some((id, e)) = result.failure {
            warn!(
                failed = %id,
                pushed = result.pushed.len(),
                "login stopped at proxy failure"
            );
            return Err(e.into());
        }

        info!(count = result.pushed.len(), "identities activated");
        Ok(LoginOutcome {
            activated_ids: result
                .pushed
                .iter()
                .map(|p| p.record.id_string.clone())
                .collect(),
            activated_names: result.pushed.into_iter().map(|p| p.record.name).collect(),
        })
    }

    /// Clear all session state, then deactivate everything on the proxy.
    ///
    /// Proxy failures are reported, never returned as errors.
    pub async fn logout(&self) -> LogoutReport {
        {
            let mut state = self.state.write().await;
            state.cached_password = None;
            state.active.clear();
        }
        info!("session cleared");
        self.gateway.logout_all().await
    }

    /// Drop local records of identities the proxy no longer reports.
    ///
    /// Entries with a known proxy id are matched on it. Entries whose proxy
    /// id was never learned survive unless the proxy reports nothing active.
    pub async fn reconcile(&self, reported: &[ActiveIdentity]) {
        let live: BTreeSet<&str> = reported.iter().map(|a| a.identity_id.as_str()).collect();
        let mut state = self.state.write().await;
        let before = state.active.len();
        state.active.retain(|_, proxy_id| match proxy_id {
            Some(id) => live.contains(id.as_str()),
            None => !live.is_empty(),
        });
        let dropped = before - state.active.len();
        if dropped > 0 {
            info!(dropped, "active set reconciled with proxy");
        }
    }

    /// Forget an identity given either its proxy `identity_id` or its vault
    /// `id_string`.
    pub async fn mark_inactive(&self, id: &str) {
        self.state
            .write()
            .await
            .active
            .retain(|id_string, proxy_id| id_string != id && proxy_id.as_deref() != Some(id));
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}
