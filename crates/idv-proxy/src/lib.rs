//! idv-proxy: client for the local proxy's HTTP control API
//!
//! The proxy enforces credentials at the network level; this crate only
//! issues the four control calls the session layer needs and maps every
//! failure onto [`ProxyError`].

pub mod client;
pub mod health;

use async_trait::async_trait;
use idv_core::{ActiveIdentity, ProxyError};

pub use client::HttpProxyClient;
pub use health::{check_health, ProxyHealth};

/// Control surface of the running proxy.
///
/// Implemented over HTTP by [`HttpProxyClient`]; tests substitute an
/// in-memory recorder.
#[async_trait]
pub trait ProxyControl: Send + Sync {
    /// `POST /enroll {"jwt": ...}`: exchange an enrollment token for a
    /// credential object.
    async fn enroll(&self, jwt: &str) -> Result<serde_json::Value, ProxyError>;

    /// `POST /identity`: activate (or replace) a credential.
    async fn push_identity(&self, credential: &serde_json::Value) -> Result<(), ProxyError>;

    /// `GET /identities`: what the proxy currently has active.
    async fn list_identities(&self) -> Result<Vec<ActiveIdentity>, ProxyError>;

    /// `DELETE /identity?id=`: deactivate one credential.
    async fn delete_identity(&self, identity_id: &str) -> Result<(), ProxyError>;

    /// Cheapest round trip that proves the control API answers.
    async fn health(&self) -> Result<(), ProxyError> {
        self.list_identities().await.map(|_| ())
    }
}
