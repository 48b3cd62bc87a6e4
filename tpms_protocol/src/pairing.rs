// pairing.rs: one-time key establishment (finite-field DH + HKDF-SHA256)
//
// Runs out of band (wired or physically proximate), never over the RF
// channel. Both parties are simulated in-process: each generates an
// ephemeral key pair, they swap public values, and each derives the same
// 128-bit key. Divergent secrets abort the attempt before anything is saved.
use hkdf::Hkdf;
use num_bigint::BigUint;
use rand::RngCore;
use sha2::Sha256;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::keystore::{
    ECU_KEY_FILE, KeyStore, KeyStoreRecord, SensorKeyFile, SharedKey, sensor_key_file_name,
};
use crate::{KEY_LEN, KeyStoreError, PairingError, SensorId};

/// HKDF `info`; binds derived keys to this protocol.
pub const HKDF_INFO: &[u8] = b"TPMS-ASCON-128";

const PRIVATE_EXPONENT_BYTES: usize = 32;

/// RFC 3526 group 14 (2048-bit MODP), generator 2.
const MODP_2048_P: [u8; 256] = [
    0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xC9, 0x0F, 0xDA, 0xA2, 0x21, 0x68, 0xC2, 0x34,
    0xC4, 0xC6, 0x62, 0x8B, 0x80, 0xDC, 0x1C, 0xD1, 0x29, 0x02, 0x4E, 0x08, 0x8A, 0x67, 0xCC, 0x74,
    0x02, 0x0B, 0xBE, 0xA6, 0x3B, 0x13, 0x9B, 0x22, 0x51, 0x4A, 0x08, 0x79, 0x8E, 0x34, 0x04, 0xDD,
    0xEF, 0x95, 0x19, 0xB3, 0xCD, 0x3A, 0x43, 0x1B, 0x30, 0x2B, 0x0A, 0x6D, 0xF2, 0x5F, 0x14, 0x37,
    0x4F, 0xE1, 0x35, 0x6D, 0x6D, 0x51, 0xC2, 0x45, 0xE4, 0x85, 0xB5, 0x76, 0x62, 0x5E, 0x7E, 0xC6,
    0xF4, 0x4C, 0x42, 0xE9, 0xA6, 0x37, 0xED, 0x6B, 0x0B, 0xFF, 0x5C, 0xB6, 0xF4, 0x06, 0xB7, 0xED,
    0xEE, 0x38, 0x6B, 0xFB, 0x5A, 0x89, 0x9F, 0xA5, 0xAE, 0x9F, 0x24, 0x11, 0x7C, 0x4B, 0x1F, 0xE6,
    0x49, 0x28, 0x66, 0x51, 0xEC, 0xE4, 0x5B, 0x3D, 0xC2, 0x00, 0x7C, 0xB8, 0xA1, 0x63, 0xBF, 0x05,
    0x98, 0xDA, 0x48, 0x36, 0x1C, 0x55, 0xD3, 0x9A, 0x69, 0x16, 0x3F, 0xA8, 0xFD, 0x24, 0xCF, 0x5F,
    0x83, 0x65, 0x5D, 0x23, 0xDC, 0xA3, 0xAD, 0x96, 0x1C, 0x62, 0xF3, 0x56, 0x20, 0x85, 0x52, 0xBB,
    0x9E, 0xD5, 0x29, 0x07, 0x70, 0x96, 0x96, 0x6D, 0x67, 0x0C, 0x35, 0x4E, 0x4A, 0xBC, 0x98, 0x04,
    0xF1, 0x74, 0x6C, 0x08, 0xCA, 0x18, 0x21, 0x7C, 0x32, 0x90, 0x5E, 0x46, 0x2E, 0x36, 0xCE, 0x3B,
    0xE3, 0x9E, 0x77, 0x2C, 0x18, 0x0E, 0x86, 0x03, 0x9B, 0x27, 0x83, 0xA2, 0xEC, 0x07, 0xA2, 0x8F,
    0xB5, 0xC5, 0x5D, 0xF0, 0x6F, 0x4C, 0x52, 0xC9, 0xDE, 0x2B, 0xCB, 0xF6, 0x95, 0x58, 0x17, 0x18,
    0x39, 0x95, 0x49, 0x7C, 0xEA, 0x95, 0x6A, 0xE5, 0x15, 0xD2, 0x26, 0x18, 0x98, 0xFA, 0x05, 0x10,
    0x15, 0x72, 0x8E, 0x5A, 0x8A, 0xAC, 0xAA, 0x68, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
];

// ============================ Domain parameters =============================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhGroup {
    p: BigUint,
    g: BigUint,
}

impl DhGroup {
    /// Needs p > 4 and a generator in [2, p-2].
    pub fn new(p: BigUint, g: BigUint) -> Result<Self, PairingError> {
        let two = BigUint::from(2u32);
        if p <= BigUint::from(4u32) || g < two || &g + &two > p {
            return Err(PairingError::InvalidGroup);
        }
        Ok(Self { p, g })
    }

    pub fn modp2048() -> Self {
        Self {
            p: BigUint::from_bytes_be(&MODP_2048_P),
            g: BigUint::from(2u32),
        }
    }

    /// Width of public values and shared secrets in bytes.
    pub fn element_len(&self) -> usize {
        (self.p.bits() as usize).div_ceil(8)
    }

    fn to_fixed_bytes(&self, n: &BigUint) -> Vec<u8> {
        let raw = n.to_bytes_be();
        let mut out = vec![0u8; self.element_len().max(raw.len())];
        let start = out.len() - raw.len();
        out[start..].copy_from_slice(&raw);
        out
    }

    /// Peer values must lie in [2, p-2]; 0, 1 and p-1 force trivial secrets.
    fn check_public(&self, y: &BigUint) -> Result<(), PairingError> {
        let two = BigUint::from(2u32);
        if *y < two || y + &two > self.p {
            return Err(PairingError::InvalidPublicKey);
        }
        Ok(())
    }
}

impl Default for DhGroup {
    fn default() -> Self {
        Self::modp2048()
    }
}

// =========================== Ephemeral key pairs ============================

pub struct EphemeralKeyPair {
    private: BigUint,
    public: BigUint,
}

impl fmt::Debug for EphemeralKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EphemeralKeyPair")
            .field("public_bits", &self.public.bits())
            .finish_non_exhaustive()
    }
}

impl EphemeralKeyPair {
    pub fn generate(group: &DhGroup) -> Self {
        let mut rng = rand::rng();
        let mut buf = [0u8; PRIVATE_EXPONENT_BYTES];
        loop {
            rng.fill_bytes(&mut buf);
            let x = BigUint::from_bytes_be(&buf);
            if x > BigUint::from(1u32) {
                return Self::from_private(group, x);
            }
        }
    }

    pub fn from_private(group: &DhGroup, private: BigUint) -> Self {
        let public = group.g.modpow(&private, &group.p);
        Self { private, public }
    }

    pub fn public_bytes(&self, group: &DhGroup) -> Vec<u8> {
        group.to_fixed_bytes(&self.public)
    }

    /// `peer^x mod p`, big-endian, left-padded to the modulus width.
    pub fn shared_secret(&self, group: &DhGroup, peer_public: &[u8]) -> Result<Vec<u8>, PairingError> {
        let y = BigUint::from_bytes_be(peer_public);
        group.check_public(&y)?;
        let s = y.modpow(&self.private, &group.p);
        Ok(group.to_fixed_bytes(&s))
    }
}

// ============================ Key confirmation ==============================

/// Both sides must hold bit-identical secrets.
pub fn confirm_secrets(sensor: &[u8], receiver: &[u8]) -> Result<(), PairingError> {
    let diff = sensor
        .iter()
        .zip(receiver)
        .fold(0u8, |acc, (a, b)| acc | (a ^ b));
    if sensor.len() != receiver.len() || diff != 0 {
        return Err(PairingError::SecretMismatch);
    }
    Ok(())
}

/// HKDF-SHA256, no salt, fixed info, 16 bytes out.
pub fn derive_key(shared_secret: &[u8]) -> Result<SharedKey, PairingError> {
    let hk = Hkdf::<Sha256>::new(None, shared_secret);
    let mut okm = [0u8; KEY_LEN];
    hk.expand(HKDF_INFO, &mut okm).map_err(|_| PairingError::Kdf)?;
    Ok(SharedKey::from_bytes(okm))
}

pub fn parse_sensor_id_hex(s: &str) -> Result<SensorId, PairingError> {
    s.parse()
        .map_err(|_| PairingError::InvalidSensorId(s.to_string()))
}

// ============================== Service =====================================

/// Where pairing writes: the receiver's key store and the sensor's record.
#[derive(Debug, Clone)]
pub struct KeyPaths {
    pub ecu_store: PathBuf,
    pub sensor_dir: PathBuf,
}

impl KeyPaths {
    /// `<dir>/ecu_key.json` and `<dir>/sensor_<ID>_key.json`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            ecu_store: dir.join(ECU_KEY_FILE),
            sensor_dir: dir.to_path_buf(),
        }
    }

    pub fn sensor_file(&self, id: SensorId) -> PathBuf {
        self.sensor_dir.join(sensor_key_file_name(id))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PairingOutcome {
    Paired { record: KeyStoreRecord },
}

#[derive(Debug, Clone, Default)]
pub struct PairingService {
    group: DhGroup,
}

impl PairingService {
    pub fn new(group: DhGroup) -> Self {
        Self { group }
    }

    /// Key exchange between a simulated sensor and receiver. Returns the key
    /// both derived.
    pub fn negotiate(&self) -> Result<SharedKey, PairingError> {
        let receiver = EphemeralKeyPair::generate(&self.group);
        let sensor = EphemeralKeyPair::generate(&self.group);

        // out-of-band exchange of public values
        let receiver_pub = receiver.public_bytes(&self.group);
        let sensor_pub = sensor.public_bytes(&self.group);

        let receiver_secret = receiver.shared_secret(&self.group, &sensor_pub)?;
        let sensor_secret = sensor.shared_secret(&self.group, &receiver_pub)?;
        confirm_secrets(&sensor_secret, &receiver_secret)?;

        let receiver_key = derive_key(&receiver_secret)?;
        let sensor_key = derive_key(&sensor_secret)?;
        if receiver_key != sensor_key {
            return Err(PairingError::SecretMismatch);
        }
        Ok(receiver_key)
    }

    /// Pair into an in-memory store.
    pub fn pair(
        &self,
        sensor_id: SensorId,
        position: &str,
        store: &mut KeyStore,
    ) -> Result<PairingOutcome, PairingError> {
        let key = self.negotiate()?;
        let record = KeyStoreRecord::new(sensor_id, key, position);
        store.upsert(record.clone());
        info!(sensor = %sensor_id, position, "sensor paired");
        Ok(PairingOutcome::Paired { record })
    }

    /// Pair and persist both records. The receiver store is loaded first so a
    /// broken store fails the attempt before any key material exists; other
    /// sensors already in the store are kept. The sensor record is staged next
    /// to its final path and only moved into place once the store is written,
    /// so a failed re-pairing leaves the previous key pair usable.
    pub fn pair_and_persist(
        &self,
        sensor_id: SensorId,
        position: &str,
        paths: &KeyPaths,
    ) -> Result<PairingOutcome, PairingError> {
        let mut store = KeyStore::load_or_default(&paths.ecu_store)?;
        let previous = store.clone();
        let outcome = self.pair(sensor_id, position, &mut store)?;
        let PairingOutcome::Paired { record } = &outcome;

        let sensor_path = paths.sensor_file(sensor_id);
        let staged = sensor_path.with_extension("json.pending");
        SensorKeyFile::from_record(record).save(&staged)?;

        if let Err(e) = store.save(&paths.ecu_store) {
            warn!(error = %e, "receiver store write failed; discarding staged sensor record");
            discard(&staged);
            return Err(e.into());
        }
        if let Err(source) = fs::rename(&staged, &sensor_path) {
            warn!(error = %source, "sensor record commit failed; restoring receiver store");
            if let Err(e) = previous.save(&paths.ecu_store) {
                warn!(error = %e, "receiver store rollback failed");
            }
            discard(&staged);
            return Err(KeyStoreError::Io { path: sensor_path, source }.into());
        }

        info!(
            sensor = %sensor_id,
            ecu_store = %paths.ecu_store.display(),
            sensor_file = %sensor_path.display(),
            "pairing records written"
        );
        Ok(outcome)
    }
}

fn discard(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        warn!(path = %path.display(), error = %e, "could not remove staged key file");
    }
}
