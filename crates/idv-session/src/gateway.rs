//! Identity activation gateway
//!
//! Talks only to the proxy. Resolution against the vault happens before
//! anything is pushed, so a bad selection activates nothing.
//!
//! The proxy names active credentials by its own `identity_id`, unrelated
//! to the vault's `id_string`. Each push is bracketed by `GET /identities`
//! and the one new id that appears is attributed to the pushed record.

use std::collections::BTreeSet;
use std::sync::Arc;

use idv_core::{IdentityRecord, ProxyError, Vault, VaultError, VaultResult};
use idv_proxy::ProxyControl;
use tracing::{debug, info, warn};

/// Result of a fully successful login.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoginOutcome {
    pub activated_ids: Vec<String>,
    pub activated_names: Vec<String>,
}

/// What `logout_all` managed to tear down. Never an error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogoutReport {
    pub deactivated: Vec<String>,
    /// `(identity_id, message)` for each delete the proxy refused.
    pub failures: Vec<(String, String)>,
    /// Set when `GET /identities` itself failed.
    pub listing_error: Option<String>,
}

impl LogoutReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.listing_error.is_none()
    }
}

/// A credential the proxy accepted.
#[derive(Debug, Clone)]
pub struct Pushed {
    pub record: IdentityRecord,
    /// The proxy's `identity_id` for it; `None` when the listing diff was
    /// unavailable or ambiguous (e.g. a replaced credential adds no new id).
    pub proxy_id: Option<String>,
}

/// Outcome of pushing a batch: what landed, and the failure that stopped it.
#[derive(Debug)]
pub struct PushResult {
    pub pushed: Vec<Pushed>,
    pub failure: Option<(String, ProxyError)>,
}

/// The single proxy id present in `after` but not in `before`.
fn attribute(before: Option<&BTreeSet<String>>, after: Option<&BTreeSet<String>>) -> Option<String> {
    let (before, after) = (before?, after?);
    let mut added = after.difference(before);
    match (added.next(), added.next()) {
        (Some(id), None) => Some(id.clone()),
        _ => None,
    }
}

/// Pick `ids` out of `vault` in the order given.
///
/// Fails with the first id that is not present; nothing is returned
/// partially.
pub fn resolve(vault: &Vault, ids: &[String]) -> VaultResult<Vec<IdentityRecord>> {
    ids.iter()
        .map(|id| {
            vault
                .find(id)
                .cloned()
                .ok_or_else(|| VaultError::IdentityNotFound(id.clone()))
        })
        .collect()
}

#[derive(Clone)]
pub struct ActivationGateway {
    proxy: Arc<dyn ProxyControl>,
}

impl ActivationGateway {
    pub fn new(proxy: Arc<dyn ProxyControl>) -> Self {
        Self { proxy }
    }

    pub fn proxy(&self) -> &Arc<dyn ProxyControl> {
        &self.proxy
    }

    /// Push credentials one at a time, stopping at the first failure.
    ///
    /// Identities pushed before a failure stay active on the proxy.
    pub async fn push_all(&self, records: Vec<IdentityRecord>) -> PushResult {
        let mut pushed = Vec::with_capacity(records.len());
        let mut known = self.snapshot().await;
        for record in records {
            debug!(id = %record.id_string, "activating identity");
            if let Err(e) = self.proxy.push_identity(&record.credential).await {
                warn!(id = %record.id_string, error = %e, "identity activation failed");
                return PushResult {
                    pushed,
                    failure: Some((record.id_string, e)),
                };
            }

            let after = self.snapshot().await;
            let proxy_id = attribute(known.as_ref(), after.as_ref());
            debug!(id = %record.id_string, proxy_id = ?proxy_id, "identity activated");
            known = after;
            pushed.push(Pushed { record, proxy_id });
        }
        PushResult {
            pushed,
            failure: None,
        }
    }

    /// Proxy ids currently active, or `None` if the listing failed.
    async fn snapshot(&self) -> Option<BTreeSet<String>> {
        match self.proxy.list_identities().await {
            Ok(active) => Some(active.into_iter().map(|a| a.identity_id).collect()),
            Err(e) => {
                debug!(error = %e, "active listing unavailable; proxy id left unknown");
                None
            }
        }
    }

    /// Deactivate everything the proxy reports, best effort.
    pub async fn logout_all(&self) -> LogoutReport {
        let mut report = LogoutReport::default();

        let active = match self.proxy.list_identities().await {
            Ok(active) => active,
            Err(e) => {
                warn!(error = %e, "could not list active identities during logout");
                report.listing_error = Some(e.to_string());
                return report;
            }
        };

        for identity in active {
            match self.proxy.delete_identity(&identity.identity_id).await {
                Ok(()) => report.deactivated.push(identity.identity_id),
                Err(e) => {
                    warn!(id = %identity.identity_id, error = %e, "deactivation failed");
                    report.failures.push((identity.identity_id, e.to_string()));
                }
            }
        }

        info!(
            deactivated = report.deactivated.len(),
            failed = report.failures.len(),
            "proxy identities torn down"
        );
        report
    }
}

impl std::fmt::Debug for ActivationGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivationGateway").finish_non_exhaustive()
    }
}
