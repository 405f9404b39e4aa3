//! Proxy health probe

use idv_core::ProxyError;
use tracing::debug;

use crate::ProxyControl;

#[derive(Debug, Clone)]
pub enum ProxyHealth {
    Up,
    /// Nothing listening on the control port.
    NotRunning,
    /// Something answered, but not the way a healthy proxy does.
    Unhealthy(ProxyError),
}

impl ProxyHealth {
    pub fn is_up(&self) -> bool {
        matches!(self, ProxyHealth::Up)
    }
}

impl std::fmt::Display for ProxyHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProxyHealth::Up => f.write_str("up"),
            ProxyHealth::NotRunning => f.write_str("not running"),
            ProxyHealth::Unhealthy(e) => write!(f, "unhealthy: {e}"),
        }
    }
}

/// Probe the control API without failing; callers only display the result.
pub async fn check_health(proxy: &dyn ProxyControl) -> ProxyHealth {
    match proxy.health().await {
        Ok(()) => ProxyHealth::Up,
        Err(ProxyError::ConnectionRefused(addr)) => {
            debug!(%addr, "proxy control API refused connection");
            ProxyHealth::NotRunning
        }
        Err(e) => ProxyHealth::Unhealthy(e),
    }
}
