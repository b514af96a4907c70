use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use redb::{Database, ReadableTable, TableDefinition};

use super::audit::AUDIT;
use super::model::{CredentialRecord, KeyMeta, WILDCARD_IP};
use super::settings::SETTINGS;

/// API key value → bincode-encoded [`CredentialRecord`].
pub(crate) const KEYS: TableDefinition<&str, &[u8]> = TableDefinition::new("api_keys");
/// Key id → API key value.
pub(crate) const KEY_IDS: TableDefinition<u64, &str> = TableDefinition::new("api_key_ids");
/// Store bookkeeping counters.
pub(crate) const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

/// Highest key id ever issued. Ids of deleted keys are never handed out again.
const LAST_KEY_ID: &str = "last_key_id";

#[derive(Clone)]
pub struct Store {
    pub(crate) db: Arc<Database>,
}

impl Store {
    /// Open (or create) the database file and make sure every table exists.
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path)
            .with_context(|| format!("open redb at {}", path.display()))?;

        let write_txn = db.begin_write()?;
        {
            write_txn.open_table(KEYS)?;
            write_txn.open_table(KEY_IDS)?;
            write_txn.open_table(META)?;
            write_txn.open_table(SETTINGS)?;
            write_txn.open_table(AUDIT)?;
        }
        write_txn.commit()?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Insert a new API key. The authorized address must be the wildcard
    /// sentinel or a literal IP address; IP addresses are stored in the same
    /// canonical form callers are resolved to.
    pub fn put_key(&self, key: &str, ip_addr: &str, notes: &str) -> Result<CredentialRecord> {
        if key.is_empty() {
            anyhow::bail!("api key must not be empty");
        }
        let ip_addr = normalize_ip_addr(ip_addr)?;

        let write_txn = self.db.begin_write()?;
        let record = {
            let mut keys = write_txn.open_table(KEYS)?;
            if keys.get(key)?.is_some() {
                anyhow::bail!("api key already exists");
            }

            let mut ids = write_txn.open_table(KEY_IDS)?;
            let mut meta = write_txn.open_table(META)?;
            let issued = meta.get(LAST_KEY_ID)?.map(|g| g.value()).unwrap_or(0);
            let highest = ids.last()?.map(|(last, _)| last.value()).unwrap_or(0);
            let id = issued.max(highest) + 1;
            meta.insert(LAST_KEY_ID, id)?;

            let now = now();
            let record = CredentialRecord {
                id,
                key: key.to_owned(),
                ip_addr,
                active: true,
                notes: notes.to_owned(),
                created_at: now,
                updated_at: now,
            };

            let bytes = encode(&record)?;
            keys.insert(key, bytes.as_slice())?;
            ids.insert(id, key)?;
            record
        };
        write_txn.commit()?;
        Ok(record)
    }

    /// Look up a key by value, constrained to records whose address equals
    /// `address` or the wildcard sentinel. An empty `address` applies no
    /// address constraint.
    pub fn find_key(&self, key: &str, address: &str) -> Result<Option<CredentialRecord>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(KEYS)?;

        let Some(guard) = table.get(key)? else {
            return Ok(None);
        };
        let record = decode(guard.value())?;

        Ok(record.matches_lookup(address).then_some(record))
    }

    pub fn get_key_by_id(&self, id: u64) -> Result<Option<CredentialRecord>> {
        let read_txn = self.db.begin_read()?;
        let ids = read_txn.open_table(KEY_IDS)?;
        let Some(key) = ids.get(id)? else {
            return Ok(None);
        };

        let keys = read_txn.open_table(KEYS)?;
        match keys.get(key.value())? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    /// List all keys ordered by id.
    pub fn list_keys(&self) -> Result<Vec<KeyMeta>> {
        let read_txn = self.db.begin_read()?;
        let ids = read_txn.open_table(KEY_IDS)?;
        let keys = read_txn.open_table(KEYS)?;

        let mut metas = Vec::new();
        for item in ids.iter()? {
            let (_id, key) = item?;
            if let Some(guard) = keys.get(key.value())? {
                let record = decode(guard.value())?;
                metas.push(KeyMeta::from(&record));
            }
        }
        Ok(metas)
    }

    /// Flip the active flag. Returns the updated record, or None if the id is unknown.
    pub fn set_active(&self, id: u64, active: bool) -> Result<Option<CredentialRecord>> {
        let write_txn = self.db.begin_write()?;
        let updated = {
            let ids = write_txn.open_table(KEY_IDS)?;
            let Some(key) = ids.get(id)?.map(|g| g.value().to_owned()) else {
                return Ok(None);
            };

            let mut keys = write_txn.open_table(KEYS)?;
            let current = match keys.get(key.as_str())? {
                Some(guard) => decode(guard.value())?,
                None => return Ok(None),
            };

            let record = CredentialRecord {
                active,
                updated_at: now(),
                ..current
            };
            let bytes = encode(&record)?;
            keys.insert(key.as_str(), bytes.as_slice())?;
            record
        };
        write_txn.commit()?;
        Ok(Some(updated))
    }

    /// Delete a key by id. Returns true if it existed.
    pub fn delete_key(&self, id: u64) -> Result<bool> {
        let write_txn = self.db.begin_write()?;
        let existed = {
            let mut ids = write_txn.open_table(KEY_IDS)?;
            let removed = ids.remove(id)?.map(|g| g.value().to_owned());
            match removed {
                Some(key) => {
                    let mut keys = write_txn.open_table(KEYS)?;
                    keys.remove(key.as_str())?;
                    true
                }
                None => false,
            }
        };
        write_txn.commit()?;
        Ok(existed)
    }
}

/// Generate a new API key value: 16 random bytes, upper-case hex.
pub fn generate_credential() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let bytes: [u8; 16] = rng.gen();
    hex::encode_upper(bytes)
}

/// The sentinel passes through untouched. Any other address must parse as an
/// IP and is rendered the way [`crate::client_addr::resolve_caller`] renders
/// callers: IPv4-mapped IPv6 collapsed to IPv4, IPv6 lower-case and compressed.
fn normalize_ip_addr(ip_addr: &str) -> Result<String> {
    if ip_addr == WILDCARD_IP {
        return Ok(ip_addr.to_owned());
    }
    let Ok(ip) = ip_addr.parse::<IpAddr>() else {
        anyhow::bail!("authorized address must be an IP address or {WILDCARD_IP}, got {ip_addr:?}")
    };
    let canonical = ip.to_canonical().to_string();
    if canonical == WILDCARD_IP {
        anyhow::bail!("{ip_addr:?} is another spelling of {WILDCARD_IP}; use {WILDCARD_IP} for a wildcard key")
    }
    Ok(canonical)
}

fn encode(record: &CredentialRecord) -> Result<Vec<u8>> {
    bincode::serde::encode_to_vec(record, bincode::config::standard())
        .context("bincode encode api key")
}

fn decode(bytes: &[u8]) -> Result<CredentialRecord> {
    let (record, _): (CredentialRecord, _) =
        bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .context("bincode decode api key")?;
    Ok(record)
}

pub(crate) fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
