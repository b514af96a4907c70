//! Wildcard-aware API key authorization.
//!
//! [`Authorizer::authorize`] is the single decision point for the wildcard
//! endpoint. It performs one credential lookup that already admits records
//! stored against [`WILDCARD_IP`], then re-checks the resolved record:
//!
//! 1. missing credential → [`Denial::MissingCredential`]
//! 2. no record → [`Denial::NotFound`]
//! 3. inactive record → [`Denial::Inactive`]
//! 4. address neither the sentinel nor the caller → [`Denial::AddressNotAuthorized`]
//!
//! Address comparison is exact string equality. Denials are ordinary return
//! values; only a failing credential store is an error.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::audit::{AuditEvent, AuditSink};
use crate::store::{CredentialRecord, Store, WILDCARD_IP};

/// Settings key controlling audit events for wildcard use.
pub const LOG_WILDCARD_ACCESS: &str = "log_wildcard_access";
const LOG_WILDCARD_ACCESS_DEFAULT: bool = true;

pub trait CredentialStore: Send + Sync {
    /// Find the record for `credential` whose address equals `address` or
    /// [`WILDCARD_IP`]. An empty `address` applies no address constraint.
    fn find_key(&self, credential: &str, address: &str) -> anyhow::Result<Option<CredentialRecord>>;
}

pub trait ConfigProvider: Send + Sync {
    fn get_flag(&self, key: &str) -> anyhow::Result<Option<bool>>;
}

impl CredentialStore for Store {
    fn find_key(&self, credential: &str, address: &str) -> anyhow::Result<Option<CredentialRecord>> {
        Store::find_key(self, credential, address)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denial {
    MissingCredential,
    NotFound,
    Inactive,
    AddressNotAuthorized,
}

impl Denial {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingCredential => "missing credential",
            Self::NotFound => "not found or unauthorized address",
            Self::Inactive => "inactive",
            Self::AddressNotAuthorized => "address not authorized",
        }
    }
}

impl fmt::Display for Denial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the caller address was accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Exact,
    Wildcard,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Authorized {
        record: CredentialRecord,
        matched: MatchKind,
    },
    Denied(Denial),
}

#[derive(Debug, thiserror::Error)]
pub enum AuthorizeError {
    #[error("credential store lookup failed: {0:#}")]
    Store(anyhow::Error),
}

#[derive(Clone)]
pub struct Authorizer {
    store: Arc<dyn CredentialStore>,
    config: Arc<dyn ConfigProvider>,
    audit: Arc<dyn AuditSink>,
}

impl Authorizer {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        config: Arc<dyn ConfigProvider>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            store,
            config,
            audit,
        }
    }

    pub fn authorize(
        &self,
        credential: Option<&str>,
        caller: &str,
    ) -> Result<Decision, AuthorizeError> {
        let Some(credential) = credential.filter(|c| !c.is_empty()) else {
            return Ok(Decision::Denied(Denial::MissingCredential));
        };

        let record = match self
            .store
            .find_key(credential, caller)
            .map_err(AuthorizeError::Store)?
        {
            Some(r) => r,
            None => return Ok(Decision::Denied(Denial::NotFound)),
        };

        if !record.active {
            return Ok(Decision::Denied(Denial::Inactive));
        }

        // The lookup may have been satisfied by the sentinel alone.
        let matched = if record.ip_addr == WILDCARD_IP {
            MatchKind::Wildcard
        } else if record.ip_addr == caller {
            MatchKind::Exact
        } else {
            return Ok(Decision::Denied(Denial::AddressNotAuthorized));
        };

        if matched == MatchKind::Wildcard && self.log_wildcard_access() {
            self.audit.record(&AuditEvent::wildcard_use(caller));
        }

        debug!(key_id = record.id, ?matched, "api key authorized");
        Ok(Decision::Authorized { record, matched })
    }

    fn log_wildcard_access(&self) -> bool {
        match self.config.get_flag(LOG_WILDCARD_ACCESS) {
            Ok(Some(v)) => v,
            Ok(None) => LOG_WILDCARD_ACCESS_DEFAULT,
            Err(e) => {
                warn!(error = %e, "config unavailable, using default for {LOG_WILDCARD_ACCESS}");
                LOG_WILDCARD_ACCESS_DEFAULT
            }
        }
    }
}
