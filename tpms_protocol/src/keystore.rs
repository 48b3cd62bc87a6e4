// keystore.rs: per-sensor shared secrets and their JSON persistence
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::{KEY_LEN, KeyStoreError, SensorId, Timestamp};

pub const KEY_VERSION: u32 = 1;
pub const ECU_KEY_FILE: &str = "ecu_key.json";

/// File name of the sensor-side record for `id`.
pub fn sensor_key_file_name(id: SensorId) -> String {
    format!("sensor_{id}_key.json")
}

// ============================== Shared key ==================================

/// 128-bit secret shared by one sensor and the receiver.
#[derive(Clone, PartialEq, Eq)]
pub struct SharedKey([u8; KEY_LEN]);

impl SharedKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn from_hex(s: &str) -> Result<Self, KeyStoreError> {
        let bytes = hex::decode(s.trim())?;
        let arr: [u8; KEY_LEN] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| KeyStoreError::InvalidKeyLength(bytes.len()))?;
        Ok(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for SharedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedKey(..)")
    }
}

// ================================ Records ===================================

#[derive(Debug, Clone, PartialEq)]
pub struct KeyStoreRecord {
    pub sensor_id: SensorId,
    pub key: SharedKey,
    pub position: String,
    pub paired_at: Timestamp,
}

impl KeyStoreRecord {
    pub fn new(sensor_id: SensorId, key: SharedKey, position: impl Into<String>) -> Self {
        Self {
            sensor_id,
            key,
            position: position.into(),
            paired_at: Utc::now(),
        }
    }
}

/// Receiver-side key table. Owned by whoever runs the receive loop; only the
/// pairing flow writes to it.
#[derive(Debug, Clone, Default)]
pub struct KeyStore {
    records: HashMap<SensorId, KeyStoreRecord>,
}

impl KeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, id: SensorId) -> Result<&SharedKey, KeyStoreError> {
        self.records
            .get(&id)
            .map(|r| &r.key)
            .ok_or(KeyStoreError::NotFound(id))
    }

    pub fn record(&self, id: SensorId) -> Option<&KeyStoreRecord> {
        self.records.get(&id)
    }

    /// Iteration order is unspecified.
    pub fn all(&self) -> impl Iterator<Item = (SensorId, &KeyStoreRecord)> {
        self.records.iter().map(|(id, r)| (*id, r))
    }

    /// Replaces any previous record for the same sensor.
    pub fn upsert(&mut self, record: KeyStoreRecord) -> Option<KeyStoreRecord> {
        self.records.insert(record.sensor_id, record)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    // ------------------------------ persistence -----------------------------

    pub fn load(path: impl AsRef<Path>) -> Result<Self, KeyStoreError> {
        let path = path.as_ref();
        let file: StoreFile = read_json(path)?;
        let mut store = KeyStore::new();
        for (id_hex, entry) in file.sensors {
            let sensor_id: SensorId = id_hex.parse()?;
            store.upsert(KeyStoreRecord {
                sensor_id,
                key: SharedKey::from_hex(&entry.key)?,
                position: entry.tire_position,
                paired_at: entry.paired_at,
            });
        }
        info!(path = %path.display(), sensors = store.len(), "key store loaded");
        Ok(store)
    }

    /// Missing file → empty store. Any other failure is still an error.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, KeyStoreError> {
        match Self::load(path) {
            Err(KeyStoreError::Missing(p)) => {
                debug!(path = %p.display(), "no key store yet; starting empty");
                Ok(Self::new())
            }
            other => other,
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), KeyStoreError> {
        let sensors = self
            .records
            .values()
            .map(|r| {
                (
                    r.sensor_id.to_string(),
                    StoreEntry {
                        key: r.key.to_hex(),
                        tire_position: r.position.clone(),
                        paired_at: r.paired_at,
                    },
                )
            })
            .collect();
        write_json(
            path.as_ref(),
            &StoreFile {
                sensors,
                key_version: KEY_VERSION,
            },
        )
    }
}

// ============================== File formats ================================

#[derive(Debug, Serialize, Deserialize)]
struct StoreFile {
    sensors: BTreeMap<String, StoreEntry>,
    #[serde(default = "key_version")]
    key_version: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreEntry {
    key: String,
    #[serde(default = "unknown_position")]
    tire_position: String,
    #[serde(deserialize_with = "lenient_timestamp")]
    paired_at: Timestamp,
}

fn key_version() -> u32 {
    KEY_VERSION
}

fn unknown_position() -> String {
    "unknown".to_string()
}

const NAIVE_TIMESTAMP: &str = "%Y-%m-%d %H:%M:%S";

/// RFC 3339, or the older `YYYY-mm-dd HH:MM:SS` form read as UTC.
fn lenient_timestamp<'de, D: Deserializer<'de>>(de: D) -> Result<Timestamp, D::Error> {
    let raw = String::deserialize(de)?;
    if let Ok(t) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(t.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(&raw, NAIVE_TIMESTAMP)
        .map(|t| t.and_utc())
        .map_err(|e| serde::de::Error::custom(format!("paired_at {raw:?}: {e}")))
}

/// Sensor-side record: the one key a sensor knows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorKeyFile {
    pub sensor_id: SensorId,
    pub key: String,
    #[serde(default = "unknown_position")]
    pub tire_position: String,
    #[serde(deserialize_with = "lenient_timestamp")]
    pub paired_at: Timestamp,
    #[serde(default = "key_version")]
    pub key_version: u32,
}

impl SensorKeyFile {
    pub fn from_record(r: &KeyStoreRecord) -> Self {
        Self {
            sensor_id: r.sensor_id,
            key: r.key.to_hex(),
            tire_position: r.position.clone(),
            paired_at: r.paired_at,
            key_version: KEY_VERSION,
        }
    }

    pub fn to_record(&self) -> Result<KeyStoreRecord, KeyStoreError> {
        Ok(KeyStoreRecord {
            sensor_id: self.sensor_id,
            key: SharedKey::from_hex(&self.key)?,
            position: self.tire_position.clone(),
            paired_at: self.paired_at,
        })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, KeyStoreError> {
        read_json(path.as_ref())
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), KeyStoreError> {
        write_json(path.as_ref(), self)
    }
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, KeyStoreError> {
    let text = fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            KeyStoreError::Missing(path.to_path_buf())
        } else {
            KeyStoreError::Io {
                path: path.to_path_buf(),
                source: e,
            }
        }
    })?;
    serde_json::from_str(&text).map_err(|e| KeyStoreError::Json {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Write to a sibling temp file, then rename over the target.
fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), KeyStoreError> {
    let io_err = |source| KeyStoreError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).map_err(io_err)?;
    }
    let text = serde_json::to_string_pretty(value).map_err(|e| KeyStoreError::Json {
        path: path.to_path_buf(),
        source: e,
    })?;
    let tmp: PathBuf = path.with_extension("json.tmp");
    fs::write(&tmp, text).map_err(io_err)?;
    fs::rename(&tmp, path).map_err(io_err)?;
    Ok(())
}
