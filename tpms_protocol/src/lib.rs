// lib.rs: TPMS wire protocol, baseline (CRC-16) and secure (Ascon-128 AEAD) reports

pub mod baseline;
pub mod channel;
pub mod eavesdrop;
pub mod error;
pub mod framing;
pub mod keystore;
pub mod pairing;
pub mod power;
pub mod receiver;
pub mod secure;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub use error::{ChannelError, CodecError, KeyStoreError, PairingError, Rejection};
pub use framing::{Framer, sync_offsets};
pub use keystore::{KeyStore, KeyStoreRecord, SensorKeyFile, SharedKey};
pub use receiver::{Delivery, Mode, Receiver, ReceiverStats};

// =============================== Common =====================================

pub type Timestamp = DateTime<Utc>;

pub const PREAMBLE: [u8; 8] = [0x55; 8];
pub const SYNC_WORD: [u8; 2] = [0x2D, 0xD4];

pub const PAYLOAD_LEN: usize = 5;
pub const CRC_LEN: usize = 2;
pub const KEY_LEN: usize = 16;
pub const NONCE_LEN: usize = 16;
pub const TAG_LEN: usize = 16;
pub const CIPHERTEXT_LEN: usize = PAYLOAD_LEN + TAG_LEN; // 21

/// Bytes that must follow the sync word for each body variant.
pub const BASELINE_BODY_LEN: usize = PAYLOAD_LEN + CRC_LEN; // 7
pub const SECURE_BODY_LEN: usize = NONCE_LEN + CIPHERTEXT_LEN; // 37

pub const BASELINE_PACKET_LEN: usize = PREAMBLE.len() + SYNC_WORD.len() + BASELINE_BODY_LEN; // 17
pub const SECURE_PACKET_LEN: usize = PREAMBLE.len() + SYNC_WORD.len() + SECURE_BODY_LEN; // 47

/// Schrader encoding: raw = psi * 2.755
pub const PRESSURE_SCALE: f64 = 2.755;
pub const LOW_PRESSURE_THRESHOLD_PSI: f64 = 30.0;

pub const DEFAULT_PORT: u16 = 5000;

/// Factory sensor set of the demo vehicle.
pub const DEFAULT_SENSORS: [(u32, &str); 4] = [
    (0xA0A6F9, "front_left"),
    (0xB1C2D3, "front_right"),
    (0xC3E4F5, "rear_left"),
    (0xD4F6A7, "rear_right"),
];

pub fn default_position(id: SensorId) -> Option<&'static str> {
    DEFAULT_SENSORS
        .iter()
        .find(|(raw, _)| *raw == id.get())
        .map(|(_, pos)| *pos)
}

// ============================== Sensor id ===================================

/// 24-bit sensor identity, big-endian on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SensorId(u32);

impl SensorId {
    pub const MAX: u32 = 0x00FF_FFFF;

    pub fn new(raw: u32) -> Option<Self> {
        (raw <= Self::MAX).then_some(Self(raw))
    }

    pub fn get(self) -> u32 {
        self.0
    }

    pub fn to_be_bytes(self) -> [u8; 3] {
        let b = self.0.to_be_bytes();
        [b[1], b[2], b[3]]
    }

    pub fn from_be_bytes(b: [u8; 3]) -> Self {
        Self(u32::from_be_bytes([0, b[0], b[1], b[2]]))
    }
}

impl fmt::Display for SensorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:06X}", self.0)
    }
}

impl FromStr for SensorId {
    type Err = KeyStoreError;

    /// Hex, with or without a `0x` prefix.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let t = s.trim();
        let digits = t
            .strip_prefix("0x")
            .or_else(|| t.strip_prefix("0X"))
            .unwrap_or(t);
        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(KeyStoreError::InvalidSensorId(s.to_string()));
        }
        u32::from_str_radix(digits, 16)
            .ok()
            .and_then(SensorId::new)
            .ok_or_else(|| KeyStoreError::InvalidSensorId(s.to_string()))
    }
}

impl TryFrom<String> for SensorId {
    type Error = KeyStoreError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<SensorId> for String {
    fn from(id: SensorId) -> Self {
        id.to_string()
    }
}

// =============================== Payload ====================================

pub fn quantize_pressure(pressure_psi: f64) -> u8 {
    // round half away from zero, then keep the low 8 bits
    ((pressure_psi * PRESSURE_SCALE).round() as i64 & 0xFF) as u8
}

pub fn dequantize_pressure(raw: u8) -> f64 {
    raw as f64 / PRESSURE_SCALE
}

/// The 5-byte plaintext shared by both codecs: id[3] ‖ flags ‖ pressure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Payload {
    pub sensor_id: SensorId,
    pub flags: u8,
    pub pressure_raw: u8,
}

impl Payload {
    pub fn new(sensor_id: SensorId, pressure_psi: f64, flags: u8) -> Self {
        Self {
            sensor_id,
            flags,
            pressure_raw: quantize_pressure(pressure_psi),
        }
    }

    pub fn to_bytes(&self) -> [u8; PAYLOAD_LEN] {
        let id = self.sensor_id.to_be_bytes();
        [id[0], id[1], id[2], self.flags, self.pressure_raw]
    }

    pub fn from_bytes(b: &[u8; PAYLOAD_LEN]) -> Self {
        Self {
            sensor_id: SensorId::from_be_bytes([b[0], b[1], b[2]]),
            flags: b[3],
            pressure_raw: b[4],
        }
    }

    pub fn pressure_psi(&self) -> f64 {
        dequantize_pressure(self.pressure_raw)
    }
}

// =============================== Report =====================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReport {
    pub sensor_id: SensorId,
    pub pressure_psi: f64,
    pub flags: u8,
    pub authenticated: bool,
    pub position: Option<String>,
    /// Baseline only: whether the CRC matched. Secure reports carry `None`.
    pub crc_valid: Option<bool>,
}

impl SensorReport {
    /// Pressure rounded to 3 decimals, the precision shown to users.
    pub fn pressure_display(&self) -> f64 {
        (self.pressure_psi * 1000.0).round() / 1000.0
    }

    pub fn is_low_pressure(&self, threshold_psi: f64) -> bool {
        self.pressure_psi < threshold_psi
    }
}

// ================================ Tests =====================================
