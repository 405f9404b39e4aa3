//! reqwest-backed [`ProxyControl`]

use std::time::Duration;

use async_trait::async_trait;
use idv_core::config::ProxyConfig;
use idv_core::{ActiveIdentity, ProxyError};
use reqwest::{Method, RequestBuilder, Response};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::ProxyControl;

/// HTTP client for the proxy control API.
///
/// One `reqwest::Client` is reused for every call; each request carries
/// the configured timeout.
#[derive(Debug, Clone)]
pub struct HttpProxyClient {
    client: reqwest::Client,
    base: Url,
    timeout: Duration,
}

/// `GET /identities` answers either a bare array or a wrapped one.
#[derive(Deserialize)]
#[serde(untagged)]
enum IdentityListing {
    Bare(Vec<ActiveIdentity>),
    Wrapped { identities: Vec<ActiveIdentity> },
}

impl HttpProxyClient {
    pub fn new(api_url: &str, timeout: Duration) -> Result<Self, ProxyError> {
        let mut base = Url::parse(api_url)
            .map_err(|e| ProxyError::Transport(format!("invalid proxy api_url '{api_url}': {e}")))?;
        // `join` replaces the last segment unless the path ends in `/`
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let client = reqwest::Client::builder()
            .user_agent(concat!("idvault/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ProxyError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base,
            timeout,
        })
    }

    pub fn from_config(config: &ProxyConfig) -> Result<Self, ProxyError> {
        Self::new(&config.api_url, config.timeout())
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, path: &str) -> Result<Url, ProxyError> {
        self.base
            .join(path)
            .map_err(|e| ProxyError::Transport(format!("building {path} url: {e}")))
    }

    fn req(&self, method: Method, url: Url) -> RequestBuilder {
        self.client.request(method, url).timeout(self.timeout)
    }

    /// Send, then turn transport failures and non-2xx answers into errors.
    async fn send(&self, request: RequestBuilder) -> Result<Response, ProxyError> {
        let response = request.send().await.map_err(|e| self.map_err(e))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ProxyError::Status {
            status: status.as_u16(),
            body,
        })
    }

    async fn read_json(&self, response: Response) -> Result<serde_json::Value, ProxyError> {
        let bytes = response.bytes().await.map_err(|e| self.map_err(e))?;
        serde_json::from_slice(&bytes).map_err(|e| ProxyError::Decode(e.to_string()))
    }

    fn map_err(&self, e: reqwest::Error) -> ProxyError {
        if e.is_timeout() {
            ProxyError::Timeout(self.timeout)
        } else if e.is_connect() {
            ProxyError::ConnectionRefused(self.base.to_string())
        } else if e.is_decode() || e.is_body() {
            ProxyError::Decode(e.to_string())
        } else {
            ProxyError::Transport(e.to_string())
        }
    }
}

#[async_trait]
impl ProxyControl for HttpProxyClient {
    async fn enroll(&self, jwt: &str) -> Result<serde_json::Value, ProxyError> {
        let url = self.endpoint("enroll")?;
        debug!(%url, "enrolling token with proxy");
        let response = self
            .send(
                self.req(Method::POST, url)
                    .json(&serde_json::json!({ "jwt": jwt })),
            )
            .await?;

        let credential = self.read_json(response).await?;
        if !credential.is_object() {
            return Err(ProxyError::Decode(
                "enroll response is not a JSON object".into(),
            ));
        }
        Ok(credential)
    }

    async fn push_identity(&self, credential: &serde_json::Value) -> Result<(), ProxyError> {
        let url = self.endpoint("identity")?;
        debug!(%url, "pushing identity to proxy");
        self.send(self.req(Method::POST, url).json(credential))
            .await
            .map(|_| ())
    }

    async fn list_identities(&self) -> Result<Vec<ActiveIdentity>, ProxyError> {
        let url = self.endpoint("identities")?;
        debug!(%url, "listing active identities");
        let response = self.send(self.req(Method::GET, url)).await?;

        let value = self.read_json(response).await?;
        let listing: IdentityListing =
            serde_json::from_value(value).map_err(|e| ProxyError::Decode(e.to_string()))?;
        Ok(match listing {
            IdentityListing::Bare(ids) => ids,
            IdentityListing::Wrapped { identities } => identities,
        })
    }

    async fn delete_identity(&self, identity_id: &str) -> Result<(), ProxyError> {
        let mut url = self.endpoint("identity")?;
        url.query_pairs_mut().append_pair("id", identity_id);
        debug!(%url, "deactivating identity");
        self.send(self.req(Method::DELETE, url)).await.map(|_| ())
    }
}
