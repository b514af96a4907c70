use anyhow::Result;
use redb::TableDefinition;

use super::audit::{parse_retention, MAX_AUDIT_EVENTS};
use crate::authorizer::{ConfigProvider, LOG_WILDCARD_ACCESS};
use crate::lifecycle::INSTALLED_VERSION;

pub(crate) const SETTINGS: TableDefinition<&str, &str> = TableDefinition::new("settings");

impl super::db::Store {
    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(SETTINGS)?;
        Ok(table.get(key)?.map(|v| v.value().to_owned()))
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(SETTINGS)?;
            table.insert(key, value)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Remove a setting so its documented default applies again.
    pub fn clear_setting(&self, key: &str) -> Result<bool> {
        let write_txn = self.db.begin_write()?;
        let existed = {
            let mut table = write_txn.open_table(SETTINGS)?;
            let existed = table.remove(key)?.is_some();
            existed
        };
        write_txn.commit()?;
        Ok(existed)
    }
}

impl ConfigProvider for super::db::Store {
    fn get_flag(&self, key: &str) -> Result<Option<bool>> {
        match self.get_setting(key)? {
            Some(raw) => parse_flag(&raw)
                .map(Some)
                .ok_or_else(|| anyhow::anyhow!("setting {key} is not a boolean: {raw:?}")),
            None => Ok(None),
        }
    }
}

/// Accepts the spellings an operator is likely to type.
pub fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Settings an operator may change, with a note on accepted values.
pub const OPERATOR_SETTINGS: &[(&str, &str)] = &[
    (LOG_WILDCARD_ACCESS, "true or false"),
    (MAX_AUDIT_EVENTS, "a positive integer"),
];

/// Reject settings nothing reads, and values that would be ignored at runtime.
pub fn validate_setting(key: &str, value: &str) -> Result<()> {
    check_setting_key(key)?;
    let ok = match key {
        LOG_WILDCARD_ACCESS => parse_flag(value).is_some(),
        MAX_AUDIT_EVENTS => parse_retention(value).is_some(),
        _ => true,
    };
    if !ok {
        let expected = OPERATOR_SETTINGS
            .iter()
            .find(|(k, _)| *k == key)
            .map_or("a valid value", |(_, v)| v);
        anyhow::bail!("{key} must be {expected}, got {value:?}");
    }
    Ok(())
}

pub fn check_setting_key(key: &str) -> Result<()> {
    if key == INSTALLED_VERSION {
        anyhow::bail!("{INSTALLED_VERSION} is managed automatically");
    }
    if !OPERATOR_SETTINGS.iter().any(|(k, _)| *k == key) {
        let known: Vec<&str> = OPERATOR_SETTINGS.iter().map(|(k, _)| *k).collect();
        anyhow::bail!("unknown setting {key:?} (known: {})", known.join(", "));
    }
    Ok(())
}
