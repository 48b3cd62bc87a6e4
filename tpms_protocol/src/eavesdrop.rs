// eavesdrop.rs: passive observer with no key material
//
// Applies the same framing as the receiver. Baseline packets leak a static id
// (so the vehicle can be followed) and the pressure; secure packets leak only
// a random nonce.
use chrono::Utc;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use tracing::debug;

use crate::framing::find_sync;
use crate::{
    BASELINE_BODY_LEN, NONCE_LEN, PAYLOAD_LEN, Payload, SECURE_BODY_LEN, SYNC_WORD, SensorId,
    Timestamp,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Observation {
    Baseline {
        sensor_id: SensorId,
        pressure_psi: f64,
        flags: u8,
    },
    Encrypted {
        #[serde(serialize_with = "hex_nonce")]
        nonce: [u8; NONCE_LEN],
    },
}

fn hex_nonce<S: serde::Serializer>(n: &[u8; NONCE_LEN], s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&hex::encode(n))
}

impl Observation {
    pub fn tracking_possible(&self) -> bool {
        matches!(self, Observation::Baseline { .. })
    }
}

/// Classify by how many bytes follow the first sync word.
pub fn analyze(buf: &[u8]) -> Option<Observation> {
    let off = find_sync(buf)?;
    let body = &buf[off + SYNC_WORD.len()..];
    if body.len() >= SECURE_BODY_LEN {
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&body[..NONCE_LEN]);
        Some(Observation::Encrypted { nonce })
    } else if body.len() >= BASELINE_BODY_LEN {
        let mut raw = [0u8; PAYLOAD_LEN];
        raw.copy_from_slice(&body[..PAYLOAD_LEN]);
        let p = Payload::from_bytes(&raw);
        Some(Observation::Baseline {
            sensor_id: p.sensor_id,
            pressure_psi: p.pressure_psi(),
            flags: p.flags,
        })
    } else {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sighting {
    pub time: Timestamp,
    pub pressure_psi: f64,
    pub flags: u8,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TrackerSummary {
    pub packets: u64,
    pub baseline: u64,
    pub encrypted: u64,
    pub vehicles_tracked: usize,
}

/// Sightings kept per sensor; older ones only count.
pub const RECENT_SIGHTINGS: usize = 32;
/// Sensors followed at once; the stalest track is dropped beyond this.
pub const MAX_TRACKS: usize = 4096;

/// Everything seen of one sensor id.
#[derive(Debug, Clone, Default)]
pub struct Track {
    count: usize,
    recent: VecDeque<Sighting>,
}

impl Track {
    /// Total sightings, including ones no longer kept.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Newest last.
    pub fn recent(&self) -> &VecDeque<Sighting> {
        &self.recent
    }

    pub fn last_seen(&self) -> Option<Timestamp> {
        self.recent.back().map(|s| s.time)
    }

    fn push(&mut self, sighting: Sighting) {
        if self.recent.len() == RECENT_SIGHTINGS {
            self.recent.pop_front();
        }
        self.recent.push_back(sighting);
        self.count += 1;
    }
}

/// What an attacker accumulates over time.
#[derive(Debug)]
pub struct Tracker {
    tracks: HashMap<SensorId, Track>,
    max_tracks: usize,
    baseline: u64,
    encrypted: u64,
}

impl Default for Tracker {
    fn default() -> Self {
        Self::with_limit(MAX_TRACKS)
    }
}

impl Tracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(max_tracks: usize) -> Self {
        Self {
            tracks: HashMap::new(),
            max_tracks: max_tracks.max(1),
            baseline: 0,
            encrypted: 0,
        }
    }

    /// Returns the sighting count for a trackable sensor, `None` otherwise.
    pub fn record(&mut self, obs: &Observation) -> Option<usize> {
        self.record_at(obs, Utc::now())
    }

    pub fn record_at(&mut self, obs: &Observation, time: Timestamp) -> Option<usize> {
        match obs {
            Observation::Baseline {
                sensor_id,
                pressure_psi,
                flags,
            } => {
                self.baseline += 1;
                if !self.tracks.contains_key(sensor_id) && self.tracks.len() >= self.max_tracks {
                    self.evict_stalest();
                }
                let track = self.tracks.entry(*sensor_id).or_default();
                track.push(Sighting {
                    time,
                    pressure_psi: *pressure_psi,
                    flags: *flags,
                });
                Some(track.count())
            }
            Observation::Encrypted { .. } => {
                self.encrypted += 1;
                None
            }
        }
    }

    fn evict_stalest(&mut self) {
        let stalest = self
            .tracks
            .iter()
            .min_by_key(|(_, t)| t.last_seen())
            .map(|(id, _)| *id);
        if let Some(id) = stalest {
            debug!(sensor = %id, "track limit reached; dropping stalest");
            self.tracks.remove(&id);
        }
    }

    pub fn track(&self, id: SensorId) -> Option<&Track> {
        self.tracks.get(&id)
    }

    pub fn summary(&self) -> TrackerSummary {
        TrackerSummary {
            packets: self.baseline + self.encrypted,
            baseline: self.baseline,
            encrypted: self.encrypted,
            vehicles_tracked: self.tracks.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keystore::SharedKey;
    use crate::{baseline, secure};

    fn id() -> SensorId {
        SensorId::new(0xA0A6F9).unwrap()
    }

    #[test]
    fn baseline_leaks_identity_and_pressure() {
        let obs = analyze(&baseline::encode(id(), 37.5, 5)).unwrap();
        match &obs {
            Observation::Baseline { sensor_id, pressure_psi, flags } => {
                assert_eq!(*sensor_id, id());
                assert_eq!(*flags, 5);
                assert!((pressure_psi - 37.5).abs() < 0.19);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(obs.tracking_possible());
    }

    #[test]
    fn secure_leaks_only_a_random_nonce() {
        let key = SharedKey::from_bytes([5; 16]);
        let (a, na) = secure::encode(id(), 37.5, 5, &key).unwrap();
        let (b, _) = secure::encode(id(), 37.5, 5, &key).unwrap();
        let oa = analyze(&a).unwrap();
        assert_eq!(oa, Observation::Encrypted { nonce: na });
        assert!(!oa.tracking_possible());
        assert_ne!(oa, analyze(&b).unwrap());
    }

    #[test]
    fn too_short_or_unsynced_is_ignored() {
        assert_eq!(analyze(&[0u8; 30]), None);
        assert_eq!(analyze(&[0x2D, 0xD4, 1, 2, 3]), None);
    }

    #[test]
    fn tracker_follows_baseline_vehicles_only() {
        let mut t = Tracker::new();
        let base = analyze(&baseline::encode(id(), 37.5, 5)).unwrap();
        let enc = analyze(&secure::encode(id(), 37.5, 5, &SharedKey::from_bytes([5; 16])).unwrap().0).unwrap();

        assert_eq!(t.record(&base), Some(1));
        assert_eq!(t.record(&base), Some(2));
        assert_eq!(t.record(&enc), None);

        assert_eq!(t.track(id()).map(Track::count), Some(2));
        assert_eq!(
            t.summary(),
            TrackerSummary { packets: 3, baseline: 2, encrypted: 1, vehicles_tracked: 1 }
        );
    }

    #[test]
    fn observation_serializes_for_interception_log() {
        let obs = Observation::Encrypted { nonce: [0xAB; 16] };
        let json = serde_json::to_string(&obs).unwrap();
        assert_eq!(json, format!(r#"{{"type":"encrypted","nonce":"{}"}}"#, "ab".repeat(16)));
    }

    fn sighting(raw: u32) -> Observation {
        Observation::Baseline {
            sensor_id: SensorId::new(raw).unwrap(),
            pressure_psi: 37.5,
            flags: 5,
        }
    }

    #[test]
    fn track_keeps_recent_sightings_and_total_count() {
        let mut t = Tracker::new();
        let t0 = Utc::now();
        for i in 0..40 {
            t.record_at(&sighting(0xA0A6F9), t0 + chrono::Duration::seconds(i));
        }
        let track = t.track(id()).unwrap();
        assert_eq!(track.count(), 40);
        assert_eq!(track.recent().len(), RECENT_SIGHTINGS);
        assert_eq!(track.recent().front().unwrap().time, t0 + chrono::Duration::seconds(8));
        assert_eq!(track.last_seen(), Some(t0 + chrono::Duration::seconds(39)));
    }

    #[test]
    fn stalest_track_is_dropped_at_the_limit() {
        let mut t = Tracker::with_limit(2);
        let t0 = Utc::now();
        t.record_at(&sighting(1), t0);
        t.record_at(&sighting(2), t0 + chrono::Duration::seconds(1));
        t.record_at(&sighting(1), t0 + chrono::Duration::seconds(2));
        t.record_at(&sighting(3), t0 + chrono::Duration::seconds(3));

        assert!(t.track(SensorId::new(2).unwrap()).is_none());
        assert_eq!(t.track(SensorId::new(1).unwrap()).map(Track::count), Some(2));
        assert_eq!(t.summary().vehicles_tracked, 2);
        assert_eq!(t.summary().baseline, 4);
    }
}
