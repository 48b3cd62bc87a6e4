// secure.rs: authenticated-encrypted sensor reports (Ascon-128, empty AAD)
//
// Wire body: nonce[16] ‖ ciphertext[5] ‖ tag[16]. Nothing in the body names
// the sender, so the receiver trial-decrypts against every paired key.
use aead::rand_core::{OsRng, RngCore};
use aead::{Aead, Key, KeyInit, Nonce, Payload as AeadPayload};
use ascon_aead::Ascon128;
use tracing::{debug, trace};

use crate::keystore::{KeyStore, KeyStoreRecord, SharedKey};
use crate::{
    CIPHERTEXT_LEN, CodecError, Framer, NONCE_LEN, PAYLOAD_LEN, Payload, Rejection,
    SECURE_BODY_LEN, SensorId, SensorReport,
};

const ASSOCIATED_DATA: &[u8] = b"";

fn cipher(key: &SharedKey) -> Ascon128 {
    Ascon128::new(Key::<Ascon128>::from_slice(key.as_bytes()))
}

/// Fresh per transmission from the OS CSPRNG. Never a counter.
fn gen_nonce() -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

fn seal(
    key: &SharedKey,
    nonce: &[u8; NONCE_LEN],
    plaintext: &[u8; PAYLOAD_LEN],
) -> Result<Vec<u8>, CodecError> {
    cipher(key)
        .encrypt(
            Nonce::<Ascon128>::from_slice(nonce),
            AeadPayload {
                msg: plaintext,
                aad: ASSOCIATED_DATA,
            },
        )
        .map_err(|_| CodecError::Encrypt)
}

fn open(key: &SharedKey, nonce: &[u8], ciphertext: &[u8]) -> Option<[u8; PAYLOAD_LEN]> {
    let plaintext = cipher(key)
        .decrypt(
            Nonce::<Ascon128>::from_slice(nonce),
            AeadPayload {
                msg: ciphertext,
                aad: ASSOCIATED_DATA,
            },
        )
        .ok()?;
    plaintext.as_slice().try_into().ok()
}

/// Build a full secure packet. Returns the packet and the nonce it used.
pub fn encode(
    sensor_id: SensorId,
    pressure_psi: f64,
    flags: u8,
    key: &SharedKey,
) -> Result<(Vec<u8>, [u8; NONCE_LEN]), CodecError> {
    let plaintext = Payload::new(sensor_id, pressure_psi, flags).to_bytes();
    let nonce = gen_nonce();
    let ciphertext = seal(key, &nonce, &plaintext)?;

    let mut body = Vec::with_capacity(SECURE_BODY_LEN);
    body.extend_from_slice(&nonce);
    body.extend_from_slice(&ciphertext);
    Ok((Framer.frame(&body), nonce))
}

/// One candidate body against one record. The tag proves integrity under
/// that key; the decrypted id must also name the key's owner.
fn attempt(body: &[u8], record: &KeyStoreRecord) -> Result<SensorReport, Rejection> {
    let (nonce, rest) = body.split_at(NONCE_LEN);
    let raw = open(&record.key, nonce, &rest[..CIPHERTEXT_LEN])
        .ok_or(Rejection::AuthenticationFailed)?;
    let payload = Payload::from_bytes(&raw);
    if payload.sensor_id != record.sensor_id {
        debug!(
            key_owner = %record.sensor_id,
            claimed = %payload.sensor_id,
            "tag verified but sensor id disagrees with key owner"
        );
        return Err(Rejection::AuthenticationFailed);
    }
    Ok(SensorReport {
        sensor_id: payload.sensor_id,
        pressure_psi: payload.pressure_psi(),
        flags: payload.flags,
        authenticated: true,
        position: Some(record.position.clone()),
        crc_valid: None,
    })
}

fn scan(buf: &[u8], records: &[&KeyStoreRecord]) -> Result<SensorReport, Rejection> {
    let mut saw_sync = false;
    let mut tried_full = false;
    for (offset, body) in Framer.candidates(buf) {
        saw_sync = true;
        if body.len() < SECURE_BODY_LEN {
            // later offsets only leave fewer bytes
            if tried_full {
                break;
            }
            return Err(Rejection::TooShort {
                needed: SECURE_BODY_LEN,
                available: body.len(),
            });
        }
        tried_full = true;
        for record in records {
            match attempt(body, record) {
                Ok(report) => {
                    trace!(offset, sensor = %report.sensor_id, "authenticated");
                    return Ok(report);
                }
                Err(_) => continue,
            }
        }
    }
    if saw_sync {
        Err(Rejection::AuthenticationFailed)
    } else {
        Err(Rejection::NoSyncWord)
    }
}

/// Locate the body and trial-decrypt it against every record in `store`.
/// Each sync offset is tried in order; the first authenticated candidate wins.
pub fn decode(buf: &[u8], store: &KeyStore) -> Result<SensorReport, Rejection> {
    let records: Vec<&KeyStoreRecord> = store.all().map(|(_, r)| r).collect();
    scan(buf, &records)
}

/// Single-key decode, for a sensor checking its own output.
pub fn decode_with_key(buf: &[u8], record: &KeyStoreRecord) -> Result<SensorReport, Rejection> {
    scan(buf, &[record])
}
