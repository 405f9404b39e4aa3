use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{VaultError, VaultResult};

/// Lowest PBKDF2 iteration count accepted from a config file.
pub const MIN_KDF_ITERATIONS: u32 = 100_000;

/// Top-level configuration (loaded from idvault.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IdvConfig {
    pub vault: VaultConfig,
    pub proxy: ProxyConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Encrypted vault file (default: ~/.local/share/idvault/vault.enc)
    pub path: PathBuf,
    /// PBKDF2-HMAC-SHA256 iterations (default: 100000)
    pub kdf_iterations: u32,
    /// Minimum password length when creating or writing the vault
    pub min_password_len: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Base URL of the proxy control API
    pub api_url: String,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
    /// host:port of the forwarding proxy the browser routes traffic through
    pub http_proxy: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            path: default_vault_path(),
            kdf_iterations: MIN_KDF_ITERATIONS,
            min_password_len: 8,
        }
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            api_url: "http://127.0.0.1:8081".into(),
            timeout_secs: 10,
            http_proxy: "127.0.0.1:8080".into(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl ProxyConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Proxy rules in the `http=HOST:PORT;https=HOST:PORT` form browsers take.
    pub fn proxy_rules(&self) -> String {
        format!("http={0};https={0}", self.http_proxy)
    }
}

impl IdvConfig {
    /// Load from a TOML file; a missing file yields defaults.
    pub fn load(path: &Path) -> VaultResult<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str::<IdvConfig>(&content)
                .map_err(|e| VaultError::Config(format!("parsing {}: {e}", path.display())))?
        } else {
            tracing::warn!("config file not found: {}  (using defaults)", path.display());
            IdvConfig::default()
        };
        config.vault.path = expand_tilde(&config.vault.path);
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> VaultResult<()> {
        if self.vault.kdf_iterations < MIN_KDF_ITERATIONS {
            return Err(VaultError::Config(format!(
                "vault.kdf_iterations must be at least {MIN_KDF_ITERATIONS}, got {}",
                self.vault.kdf_iterations
            )));
        }
        if self.vault.min_password_len == 0 {
            return Err(VaultError::Config(
                "vault.min_password_len must be at least 1".into(),
            ));
        }
        if self.proxy.timeout_secs == 0 {
            return Err(VaultError::Config("proxy.timeout_secs must be non-zero".into()));
        }
        url::Url::parse(&self.proxy.api_url).map_err(|e| {
            VaultError::Config(format!("proxy.api_url '{}': {e}", self.proxy.api_url))
        })?;
        Ok(())
    }
}

/// Default config file: $XDG_CONFIG_HOME/idvault/config.toml
pub fn default_config_path() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
        .join("idvault")
        .join("config.toml")
}

/// Default vault file: $XDG_DATA_HOME/idvault/vault.enc
pub fn default_vault_path() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
        .join("idvault")
        .join("vault.enc")
}

fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

pub fn expand_tilde(path: &Path) -> PathBuf {
    match path.to_str().and_then(|s| s.strip_prefix("~/")) {
        Some(rest) => home_dir().join(rest),
        None => path.to_path_buf(),
    }
}
