// thiserror-based error types for the protocol layer
use std::path::PathBuf;
use thiserror::Error;

use crate::{KEY_LEN, SensorId};

/// Why a single inbound buffer produced no report. Always local to that buffer.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    #[error("no sync word")]
    NoSyncWord,
    #[error("packet too short: need {needed} bytes after sync, have {available}")]
    TooShort { needed: usize, available: usize },
    #[error("authentication failed")]
    AuthenticationFailed,
}

impl Rejection {
    pub fn label(&self) -> &'static str {
        match self {
            Rejection::NoSyncWord => "no_sync_word",
            Rejection::TooShort { .. } => "too_short",
            Rejection::AuthenticationFailed => "authentication_failed",
        }
    }
}

/// Key provisioning failures. Fatal to anything that needs key material.
#[derive(Error, Debug)]
pub enum KeyStoreError {
    #[error("key file not found: {0} (pair the sensor first)")]
    Missing(PathBuf),
    #[error("I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed key file {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid hex key: {0}")]
    InvalidHex(#[from] hex::FromHexError),
    #[error("key must be {KEY_LEN} bytes, got {0}")]
    InvalidKeyLength(usize),
    #[error("invalid sensor id {0:?}")]
    InvalidSensorId(String),
    #[error("no key for sensor {0}")]
    NotFound(SensorId),
    #[error("key store is empty; pair a sensor before running in secure mode")]
    Empty,
}

#[derive(Error, Debug)]
pub enum PairingError {
    #[error("shared secrets differ between sensor and receiver")]
    SecretMismatch,
    #[error("peer public key out of range")]
    InvalidPublicKey,
    #[error("Diffie-Hellman group parameters out of range")]
    InvalidGroup,
    #[error("sensor id must be hexadecimal, got {0:?}")]
    InvalidSensorId(String),
    #[error("key derivation failed")]
    Kdf,
    #[error(transparent)]
    Store(#[from] KeyStoreError),
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    #[error("encryption failed")]
    Encrypt,
}

#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("channel I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("bad address: {0}")]
    Addr(#[from] std::net::AddrParseError),
    #[error("channel has no send target")]
    NoTarget,
    #[error("channel closed")]
    Closed,
}
