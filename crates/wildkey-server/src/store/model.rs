use serde::{Deserialize, Serialize};

/// Sentinel authorized address meaning "any caller address".
pub const WILDCARD_IP: &str = "0.0.0.0";

/// Stored API key. The authorizer only ever reads these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub id: u64,
    pub key: String,
    /// Either a single IP address or [`WILDCARD_IP`].
    pub ip_addr: String,
    pub active: bool,
    #[serde(default)]
    pub notes: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl CredentialRecord {
    /// Returns true if this record accepts requests from any address.
    pub fn is_wildcard(&self) -> bool {
        self.ip_addr == WILDCARD_IP
    }

    /// Returns true if the address constraint of a lookup is satisfied:
    /// an exact string match, the sentinel, or no constraint at all.
    pub fn matches_lookup(&self, address: &str) -> bool {
        address.is_empty() || self.is_wildcard() || self.ip_addr == address
    }
}

/// Listing view — never includes the key value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyMeta {
    pub id: u64,
    pub ip_addr: String,
    pub active: bool,
    pub notes: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl From<&CredentialRecord> for KeyMeta {
    fn from(r: &CredentialRecord) -> Self {
        Self {
            id: r.id,
            ip_addr: r.ip_addr.clone(),
            active: r.active,
            notes: r.notes.clone(),
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}
