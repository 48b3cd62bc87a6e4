// src/crypto.rs
// Packet building for one sensor: baseline CRC frames or sealed secure frames.
use anyhow::{Context, Result, bail};
use tpms_protocol::keystore::{KeyStoreRecord, SensorKeyFile};
use tpms_protocol::{Mode, SensorId, baseline, secure};
use tracing::{debug, info};

use crate::config::Config;

#[derive(Debug, Clone)]
pub enum PacketEncoder {
    Baseline { sensor_id: SensorId },
    /// Own record only; a sensor never sees other sensors' keys.
    Secure { record: KeyStoreRecord },
}

impl PacketEncoder {
    pub fn from_config(cfg: &Config) -> Result<Self> {
        match cfg.mode {
            Mode::Baseline => Ok(Self::Baseline {
                sensor_id: cfg.sensor_id,
            }),
            Mode::Secure => {
                let file = SensorKeyFile::load(&cfg.key_file).with_context(|| {
                    format!(
                        "no key for sensor {}; run `tpms_ecu pair {} {}` first",
                        cfg.sensor_id, cfg.sensor_id, cfg.position
                    )
                })?;
                let record = file.to_record()?;
                if record.sensor_id != cfg.sensor_id {
                    bail!(
                        "{} belongs to sensor {}, not {}",
                        cfg.key_file.display(),
                        record.sensor_id,
                        cfg.sensor_id
                    );
                }
                info!(sensor = %record.sensor_id, position = %record.position, "loaded pairing key");
                Ok(Self::Secure { record })
            }
        }
    }

    pub fn mode(&self) -> Mode {
        match self {
            Self::Baseline { .. } => Mode::Baseline,
            Self::Secure { .. } => Mode::Secure,
        }
    }

    pub fn sensor_id(&self) -> SensorId {
        match self {
            Self::Baseline { sensor_id } => *sensor_id,
            Self::Secure { record } => record.sensor_id,
        }
    }

    pub fn encode(&self, pressure_psi: f64, flags: u8) -> Result<Vec<u8>> {
        match self {
            Self::Baseline { sensor_id } => Ok(baseline::encode(*sensor_id, pressure_psi, flags)),
            Self::Secure { record } => {
                let (pkt, nonce) = secure::encode(record.sensor_id, pressure_psi, flags, &record.key)?;
                debug!(nonce = %hex::encode(nonce), "sealed");
                Ok(pkt)
            }
        }
    }

    /// Decode our own packet the way a receiver would. Baseline frames always
    /// pass if the CRC matches.
    pub fn self_check(&self, pkt: &[u8], flags: u8) -> bool {
        let decoded = match self {
            Self::Baseline { .. } => baseline::decode(pkt).map(|r| r.crc_valid == Some(true)),
            Self::Secure { record } => secure::decode_with_key(pkt, record).map(|r| r.flags == flags),
        };
        decoded.unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tpms_protocol::keystore::SharedKey;

    fn cfg(mode: Mode, key_file: PathBuf) -> Config {
        Config {
            mode,
            sensor_id: SensorId::new(0xA0A6F9).unwrap(),
            position: "front_left".into(),
            base_pressure: 37.5,
            interval_ms: 10,
            target: "127.0.0.1:5000".into(),
            key_file,
            count: Some(1),
        }
    }

    fn temp_key_file(owner: u32) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("tpms-sensor-{}", uuid::Uuid::new_v4()));
        let path = dir.join("sensor_key.json");
        let rec = KeyStoreRecord::new(
            SensorId::new(owner).unwrap(),
            SharedKey::from_bytes([7; 16]),
            "front_left",
        );
        SensorKeyFile::from_record(&rec).save(&path).unwrap();
        path
    }

    #[test]
    fn secure_without_key_file_fails() {
        let missing = std::env::temp_dir().join(format!("tpms-missing-{}.json", uuid::Uuid::new_v4()));
        let err = PacketEncoder::from_config(&cfg(Mode::Secure, missing)).unwrap_err();
        assert!(err.to_string().contains("tpms_ecu pair A0A6F9"));
    }

    #[test]
    fn key_file_for_another_sensor_is_refused() {
        let path = temp_key_file(0xB1C2D3);
        assert!(PacketEncoder::from_config(&cfg(Mode::Secure, path)).is_err());
    }

    #[test]
    fn secure_packets_pass_self_check() {
        let path = temp_key_file(0xA0A6F9);
        let enc = PacketEncoder::from_config(&cfg(Mode::Secure, path)).unwrap();
        assert_eq!(enc.mode(), Mode::Secure);
        let pkt = enc.encode(37.5, 7).unwrap();
        assert_eq!(pkt.len(), tpms_protocol::SECURE_PACKET_LEN);
        assert!(enc.self_check(&pkt, 7));
        assert!(!enc.self_check(&pkt[..20], 7));
    }

    #[test]
    fn baseline_needs_no_key() {
        let enc = PacketEncoder::from_config(&cfg(Mode::Baseline, PathBuf::from("/nonexistent"))).unwrap();
        let pkt = enc.encode(37.5, 5).unwrap();
        assert_eq!(pkt.len(), tpms_protocol::BASELINE_PACKET_LEN);
        assert!(enc.self_check(&pkt, 5));
    }
}
