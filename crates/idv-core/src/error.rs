use thiserror::Error;

pub type VaultResult<T> = Result<T, VaultError>;

#[derive(Debug, Error)]
pub enum VaultError {
    /// Envelope failed to authenticate. Never split into "wrong password"
    /// and "corrupted ciphertext".
    #[error("wrong password or corrupted vault")]
    WrongPasswordOrCorrupt,

    /// Envelope opened but the plaintext is not a vault document.
    #[error("vault contents are corrupt: {0}")]
    Corrupt(String),

    #[error("vault file does not exist")]
    VaultMissing,

    #[error("vault is locked: unlock it with the vault password first")]
    VaultLocked,

    #[error("an identity with id '{0}' already exists in the vault")]
    DuplicateIdString(String),

    #[error("identity '{0}' not found in the vault")]
    IdentityNotFound(String),

    #[error("identity '{id_string}' not found ({remaining_count} identities in vault)")]
    NotFound {
        id_string: String,
        remaining_count: usize,
    },

    #[error("proxy error: {0}")]
    Proxy(#[from] ProxyError),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("vault write failed: {0}")]
    VaultWrite(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl VaultError {
    /// True when the proxy process itself looks down rather than rejecting us.
    pub fn is_proxy_down(&self) -> bool {
        matches!(self, VaultError::Proxy(ProxyError::ConnectionRefused(_)))
    }
}

/// Failures talking to the local proxy control API.
#[derive(Debug, Clone, Error)]
pub enum ProxyError {
    /// Nothing is listening: the proxy process is not running.
    #[error("proxy not running (connection refused at {0})")]
    ConnectionRefused(String),

    /// The request may or may not have been applied proxy-side.
    #[error("proxy request timed out after {0:?} (outcome unknown)")]
    Timeout(std::time::Duration),

    #[error("proxy returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unexpected proxy response: {0}")]
    Decode(String),

    #[error("proxy transport error: {0}")]
    Transport(String),
}
