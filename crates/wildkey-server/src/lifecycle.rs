//! Installed-version bookkeeping.
//!
//! The running version is compared against the `installed_version` setting
//! once at startup. A missing value is a fresh install; an older one is an
//! update. Either way the setting is moved forward to the running version.

use std::cmp::Ordering;

use anyhow::Result;
use tracing::{info, warn};

use crate::authorizer::LOG_WILDCARD_ACCESS;
use crate::store::{settings::parse_flag, Store};

pub const INSTALLED_VERSION: &str = "installed_version";

/// Version of this build.
pub const CURRENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Snapshot of the persisted plugin settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginState {
    pub installed_version: Option<String>,
    pub log_wildcard_access: bool,
}

impl PluginState {
    pub fn load(store: &Store) -> Result<Self> {
        let installed_version = store
            .get_setting(INSTALLED_VERSION)?
            .filter(|v| !v.is_empty());
        let log_wildcard_access = store
            .get_setting(LOG_WILDCARD_ACCESS)?
            .and_then(|raw| parse_flag(&raw))
            .unwrap_or(true);
        Ok(Self {
            installed_version,
            log_wildcard_access,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Installed { version: String },
    Updated { from: String, to: String },
    Unchanged,
}

/// Decide the transition from `installed` to `current`. Stored versions that
/// do not parse as semver are treated as older than any real release.
pub fn plan(installed: Option<&str>, current: &str) -> Transition {
    let Some(installed) = installed else {
        return Transition::Installed {
            version: current.to_owned(),
        };
    };

    let ordering = match (
        semver::Version::parse(installed),
        semver::Version::parse(current),
    ) {
        (Ok(i), Ok(c)) => i.cmp(&c),
        (Err(_), Ok(_)) => Ordering::Less,
        _ => Ordering::Equal,
    };

    if ordering == Ordering::Less {
        Transition::Updated {
            from: installed.to_owned(),
            to: current.to_owned(),
        }
    } else {
        Transition::Unchanged
    }
}

/// Run the startup transition and persist the new installed version.
pub fn bootstrap(store: &Store, current: &str) -> Result<Transition> {
    let state = PluginState::load(store)?;
    let transition = plan(state.installed_version.as_deref(), current);

    match &transition {
        Transition::Installed { version } => {
            store.set_setting(INSTALLED_VERSION, version)?;
            info!(version = %version, "installed");
        }
        Transition::Updated { from, to } => {
            store.set_setting(INSTALLED_VERSION, to)?;
            info!(from = %from, to = %to, "updated");
        }
        Transition::Unchanged => {}
    }

    if state.log_wildcard_access {
        info!("wildcard key usage will be audited");
    } else {
        warn!("auditing of wildcard key usage is disabled ({LOG_WILDCARD_ACCESS}=false)");
    }

    Ok(transition)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_activation_installs() {
        assert_eq!(
            plan(None, "2.0.1"),
            Transition::Installed {
                version: "2.0.1".into()
            }
        );
    }

    #[test]
    fn older_version_updates() {
        assert_eq!(
            plan(Some("1.9.0"), "2.0.1"),
            Transition::Updated {
                from: "1.9.0".into(),
                to: "2.0.1".into()
            }
        );
    }

    #[test]
    fn same_or_newer_is_unchanged() {
        assert_eq!(plan(Some("2.0.1"), "2.0.1"), Transition::Unchanged);
        assert_eq!(plan(Some("3.0.0"), "2.0.1"), Transition::Unchanged);
    }

    #[test]
    fn garbage_installed_version_updates() {
        assert!(matches!(
            plan(Some("v2"), "2.0.1"),
            Transition::Updated { .. }
        ));
    }

    #[test]
    fn bootstrap_persists_version_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&dir.path().join("wildkey.db")).unwrap();

        assert!(matches!(
            bootstrap(&store, "2.0.0").unwrap(),
            Transition::Installed { .. }
        ));
        assert_eq!(bootstrap(&store, "2.0.0").unwrap(), Transition::Unchanged);
        assert!(matches!(
            bootstrap(&store, "2.0.1").unwrap(),
            Transition::Updated { .. }
        ));

        let state = PluginState::load(&store).unwrap();
        assert_eq!(state.installed_version.as_deref(), Some("2.0.1"));
        assert!(state.log_wildcard_access);
    }
}
