use serde::{Deserialize, Serialize};

/// One enrolled credential bundle stored in the vault.
///
/// Field names are camelCase on disk so vault documents stay readable by
/// the desktop shell that shares the file format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityRecord {
    /// Unique, filesystem- and URL-safe identifier
    pub id_string: String,
    /// Display label (defaults to `id_string`)
    pub name: String,
    /// Opaque credential material, pushed verbatim to the proxy on login
    #[serde(rename = "credentialPayload")]
    pub credential: serde_json::Value,
    /// Unix timestamp of insertion, never mutated afterwards
    pub added_at: u64,
    /// Original uploaded file name, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

/// What a caller hands the vault store; the store fills in the rest.
#[derive(Debug, Clone, Default)]
pub struct IdentityCandidate {
    pub id_string: Option<String>,
    pub name: Option<String>,
    pub credential: serde_json::Value,
    pub file_name: Option<String>,
}

/// The decrypted vault document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Vault {
    #[serde(default)]
    pub identities: Vec<IdentityRecord>,
}

impl Vault {
    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    /// Exact, case-sensitive lookup.
    pub fn find(&self, id_string: &str) -> Option<&IdentityRecord> {
        self.identities.iter().find(|r| r.id_string == id_string)
    }

    pub fn contains(&self, id_string: &str) -> bool {
        self.find(id_string).is_some()
    }

    /// Remove a record by exact id. Returns the removed record.
    pub fn remove(&mut self, id_string: &str) -> Option<IdentityRecord> {
        let pos = self
            .identities
            .iter()
            .position(|r| r.id_string == id_string)?;
        Some(self.identities.remove(pos))
    }
}

/// Where the session currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StateTag {
    /// No vault file on disk
    NoVault,
    /// Vault exists, not unlocked in this process
    NeedsPassword,
    /// Unlocked, zero identities
    #[serde(rename = "vault-empty")]
    UnlockedEmpty,
    /// Unlocked, at least one identity
    #[serde(rename = "vault-loaded")]
    UnlockedListed,
    /// At least one identity pushed to the proxy
    LoggedIn,
}

impl StateTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            StateTag::NoVault => "no-vault",
            StateTag::NeedsPassword => "needs-password",
            StateTag::UnlockedEmpty => "vault-empty",
            StateTag::UnlockedListed => "vault-loaded",
            StateTag::LoggedIn => "logged-in",
        }
    }

    pub fn for_count(count: usize) -> Self {
        if count == 0 {
            StateTag::UnlockedEmpty
        } else {
            StateTag::UnlockedListed
        }
    }
}

impl std::fmt::Display for StateTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An identity the proxy reports as active (`GET /identities`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveIdentity {
    pub identity_id: String,
    #[serde(default)]
    pub identity_name: String,
    #[serde(default)]
    pub services: Vec<String>,
}
