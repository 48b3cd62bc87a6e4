// receiver.rs: raw buffer → codec → duplicate filter → delivered report
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use crate::keystore::KeyStore;
use crate::{KeyStoreError, Rejection, SensorId, SensorReport, baseline, secure};

/// Repeats of an identical report inside this window are not re-emitted.
pub const DUPLICATE_WINDOW: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Baseline,
    Secure,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Mode::Baseline => "baseline",
            Mode::Secure => "secure",
        })
    }
}

impl FromStr for Mode {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "baseline" | "plain" => Ok(Mode::Baseline),
            "secure" | "encrypted" => Ok(Mode::Secure),
            other => Err(format!("unknown mode {other:?} (expected baseline|secure)")),
        }
    }
}

// ============================ Duplicate window ==============================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Signature {
    pub sensor_id: SensorId,
    pub pressure_psi: f64,
    pub flags: u8,
}

impl From<&SensorReport> for Signature {
    fn from(r: &SensorReport) -> Self {
        Self {
            sensor_id: r.sensor_id,
            pressure_psi: r.pressure_psi,
            flags: r.flags,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct DedupEntry {
    signature: Signature,
    last_seen: Instant,
}

/// Last emitted signature per sensor. A newer signature simply supersedes the
/// old entry; nothing is ever torn down explicitly.
#[derive(Debug, Clone)]
pub struct DedupWindow {
    window: Duration,
    entries: HashMap<SensorId, DedupEntry>,
}

impl Default for DedupWindow {
    fn default() -> Self {
        Self::new(DUPLICATE_WINDOW)
    }
}

impl DedupWindow {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            entries: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True if `report` should be emitted. Only emissions refresh the entry.
    /// Entries older than the window are dropped first.
    pub fn admit(&mut self, report: &SensorReport, now: Instant) -> bool {
        let window = self.window;
        self.entries
            .retain(|_, e| now.saturating_duration_since(e.last_seen) < window);
        let signature = Signature::from(report);
        if let Some(e) = self.entries.get(&report.sensor_id) {
            if e.signature == signature && now.saturating_duration_since(e.last_seen) < self.window {
                return false;
            }
        }
        self.entries.insert(
            report.sensor_id,
            DedupEntry {
                signature,
                last_seen: now,
            },
        );
        true
    }
}

// ================================ Pipeline ==================================

#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Emitted(SensorReport),
    Duplicate(SensorReport),
    Rejected(Rejection),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReceiverStats {
    pub packets: u64,
    pub emitted: u64,
    pub duplicates: u64,
    pub no_sync: u64,
    pub too_short: u64,
    pub auth_failed: u64,
    pub integrity_warnings: u64,
}

impl ReceiverStats {
    pub fn rejected(&self) -> u64 {
        self.no_sync + self.too_short + self.auth_failed
    }
}

#[derive(Debug)]
pub struct Receiver {
    mode: Mode,
    store: KeyStore,
    dedup: DedupWindow,
    stats: ReceiverStats,
}

impl Receiver {
    /// Secure mode refuses to start without key material.
    pub fn new(mode: Mode, store: KeyStore) -> Result<Self, KeyStoreError> {
        if mode == Mode::Secure && store.is_empty() {
            return Err(KeyStoreError::Empty);
        }
        Ok(Self {
            mode,
            store,
            dedup: DedupWindow::default(),
            stats: ReceiverStats::default(),
        })
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.dedup = DedupWindow::new(window);
        self
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn store(&self) -> &KeyStore {
        &self.store
    }

    pub fn stats(&self) -> &ReceiverStats {
        &self.stats
    }

    fn decode(&self, buf: &[u8]) -> Result<SensorReport, Rejection> {
        match self.mode {
            Mode::Baseline => baseline::decode(buf),
            Mode::Secure => secure::decode(buf, &self.store),
        }
    }

    /// Handle one inbound buffer. Never fails; bad packets come back as
    /// `Delivery::Rejected` and the caller keeps listening.
    pub fn process(&mut self, buf: &[u8], now: Instant) -> Delivery {
        self.stats.packets += 1;
        let report = match self.decode(buf) {
            Ok(r) => r,
            Err(rejection) => {
                match rejection {
                    Rejection::NoSyncWord => self.stats.no_sync += 1,
                    Rejection::TooShort { .. } => self.stats.too_short += 1,
                    Rejection::AuthenticationFailed => self.stats.auth_failed += 1,
                }
                debug!(reason = rejection.label(), len = buf.len(), "packet rejected");
                return Delivery::Rejected(rejection);
            }
        };

        if report.crc_valid == Some(false) {
            self.stats.integrity_warnings += 1;
        }

        if self.dedup.admit(&report, now) {
            self.stats.emitted += 1;
            Delivery::Emitted(report)
        } else {
            self.stats.duplicates += 1;
            trace!(sensor = %report.sensor_id, "duplicate suppressed");
            Delivery::Duplicate(report)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keystore::{KeyStoreRecord, SharedKey};

    fn id(raw: u32) -> SensorId {
        SensorId::new(raw).unwrap()
    }

    fn secure_receiver() -> (Receiver, KeyStoreRecord) {
        let rec = KeyStoreRecord::new(id(0xA0A6F9), SharedKey::from_bytes([0x42; 16]), "front_left");
        let mut store = KeyStore::new();
        store.upsert(rec.clone());
        (Receiver::new(Mode::Secure, store).unwrap(), rec)
    }

    #[test]
    fn secure_mode_requires_keys() {
        assert!(matches!(
            Receiver::new(Mode::Secure, KeyStore::new()),
            Err(KeyStoreError::Empty)
        ));
        assert!(Receiver::new(Mode::Baseline, KeyStore::new()).is_ok());
    }

    #[test]
    fn duplicate_inside_window_is_suppressed() {
        let (mut rx, rec) = secure_receiver();
        let t0 = Instant::now();
        let (a, _) = secure::encode(rec.sensor_id, 37.5, 5, &rec.key).unwrap();
        let (b, _) = secure::encode(rec.sensor_id, 37.5, 5, &rec.key).unwrap();
        assert_ne!(a, b);

        assert!(matches!(rx.process(&a, t0), Delivery::Emitted(_)));
        assert!(matches!(
            rx.process(&b, t0 + Duration::from_millis(1000)),
            Delivery::Duplicate(_)
        ));
        assert_eq!(rx.stats().emitted, 1);
        assert_eq!(rx.stats().duplicates, 1);
    }

    #[test]
    fn duplicate_after_window_is_emitted() {
        let (mut rx, rec) = secure_receiver();
        let t0 = Instant::now();
        let (a, _) = secure::encode(rec.sensor_id, 37.5, 5, &rec.key).unwrap();
        assert!(matches!(rx.process(&a, t0), Delivery::Emitted(_)));
        assert!(matches!(
            rx.process(&a, t0 + Duration::from_millis(2500)),
            Delivery::Emitted(_)
        ));
    }

    #[test]
    fn suppressed_repeats_do_not_refresh_window() {
        let mut w = DedupWindow::default();
        let r = baseline::decode(&baseline::encode(id(1), 30.0, 5)).unwrap();
        let t0 = Instant::now();
        assert!(w.admit(&r, t0));
        assert!(!w.admit(&r, t0 + Duration::from_millis(1500)));
        // 2.0s after the emission, not after the suppressed copy
        assert!(w.admit(&r, t0 + Duration::from_millis(2000)));
    }

    #[test]
    fn expired_entries_are_pruned() {
        let mut w = DedupWindow::default();
        let t0 = Instant::now();
        for i in 1..=1000u32 {
            let r = baseline::decode(&baseline::encode(id(i), 30.0, 5)).unwrap();
            assert!(w.admit(&r, t0 + Duration::from_secs(3 * u64::from(i))));
        }
        assert_eq!(w.len(), 1);
    }

    #[test]
    fn custom_window_applies_to_receiver() {
        let mut rx = Receiver::new(Mode::Baseline, KeyStore::new())
            .unwrap()
            .with_window(Duration::from_millis(100));
        let pkt = baseline::encode(id(1), 30.0, 5);
        let t0 = Instant::now();
        assert!(matches!(rx.process(&pkt, t0), Delivery::Emitted(_)));
        assert!(matches!(rx.process(&pkt, t0 + Duration::from_millis(50)), Delivery::Duplicate(_)));
        assert!(matches!(rx.process(&pkt, t0 + Duration::from_millis(100)), Delivery::Emitted(_)));
    }

    #[test]
    fn different_signature_is_emitted_immediately() {
        let mut rx = Receiver::new(Mode::Baseline, KeyStore::new()).unwrap();
        let t0 = Instant::now();
        let a = baseline::encode(id(1), 30.0, 5);
        let b = baseline::encode(id(1), 30.0, 7);
        let c = baseline::encode(id(2), 30.0, 5);
        assert!(matches!(rx.process(&a, t0), Delivery::Emitted(_)));
        assert!(matches!(rx.process(&b, t0), Delivery::Emitted(_)));
        assert!(matches!(rx.process(&c, t0), Delivery::Emitted(_)));
        // a after b: b superseded a's entry
        assert!(matches!(rx.process(&a, t0), Delivery::Emitted(_)));
    }

    #[test]
    fn rejections_are_counted_and_loop_continues() {
        let (mut rx, rec) = secure_receiver();
        let now = Instant::now();
        assert_eq!(rx.process(&[0u8; 4], now), Delivery::Rejected(Rejection::NoSyncWord));
        assert!(matches!(
            rx.process(&[0x2D, 0xD4, 1, 2, 3], now),
            Delivery::Rejected(Rejection::TooShort { .. })
        ));
        let forged = secure::encode(rec.sensor_id, 37.5, 5, &SharedKey::from_bytes([1; 16]))
            .unwrap()
            .0;
        assert_eq!(
            rx.process(&forged, now),
            Delivery::Rejected(Rejection::AuthenticationFailed)
        );
        let (good, _) = secure::encode(rec.sensor_id, 37.5, 5, &rec.key).unwrap();
        assert!(matches!(rx.process(&good, now), Delivery::Emitted(_)));

        let s = rx.stats();
        assert_eq!((s.packets, s.rejected(), s.emitted), (4, 3, 1));
    }

    #[test]
    fn baseline_crc_mismatch_is_emitted_with_warning() {
        let mut rx = Receiver::new(Mode::Baseline, KeyStore::new()).unwrap();
        let mut pkt = baseline::encode(id(0xA0A6F9), 37.5, 5);
        pkt[16] ^= 0xFF;
        match rx.process(&pkt, Instant::now()) {
            Delivery::Emitted(r) => assert_eq!(r.crc_valid, Some(false)),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(rx.stats().integrity_warnings, 1);
    }

    #[test]
    fn mode_parses_from_cli_text() {
        assert_eq!("secure".parse::<Mode>().unwrap(), Mode::Secure);
        assert_eq!("Baseline".parse::<Mode>().unwrap(), Mode::Baseline);
        assert!("rot13".parse::<Mode>().is_err());
    }
}
