// broadcast.rs: periodic pressure reports onto the link
use anyhow::{Context, Result};
use rand::Rng;
use rand_distr::{Distribution, Uniform};
use tokio::time::{self, Duration};
use tokio_util::sync::CancellationToken;
use tpms_protocol::channel::Channel;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::crypto::PacketEncoder;

pub const PRESSURE_JITTER_PSI: f64 = 0.3;
pub const FLAGS_ROUTINE: u8 = 0x05;
pub const FLAGS_MARKED: u8 = 0x07;

/// Every fifth packet (starting with the first) carries the marked flags.
pub fn flags_for(index: u64) -> u8 {
    if index % 5 == 0 { FLAGS_MARKED } else { FLAGS_ROUTINE }
}

/// Base pressure plus uniform noise of ±`PRESSURE_JITTER_PSI`.
#[derive(Debug, Clone)]
pub struct PressureSource {
    base_psi: f64,
    noise: Uniform<f64>,
}

impl PressureSource {
    pub fn new(base_psi: f64) -> Result<Self> {
        let noise = Uniform::new_inclusive(-PRESSURE_JITTER_PSI, PRESSURE_JITTER_PSI)
            .context("pressure noise range")?;
        Ok(Self { base_psi, noise })
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        (self.base_psi + self.noise.sample(rng)).max(0.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastSummary {
    pub sent: u64,
    pub send_errors: u64,
    pub self_check_failures: u64,
}

/// Transmit until `cfg.count` packets went out or `token` is cancelled.
pub async fn run(
    cfg: &Config,
    encoder: &PacketEncoder,
    link: &dyn Channel,
    token: CancellationToken,
) -> Result<BroadcastSummary> {
    let source = PressureSource::new(cfg.base_pressure)?;
    let mut ticker = time::interval(Duration::from_millis(cfg.interval_ms));
    ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

    let mut summary = BroadcastSummary::default();
    let mut index = 0u64;
    loop {
        if cfg.count.is_some_and(|n| index >= n) {
            break;
        }
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                info!("broadcast cancelled");
                break;
            }
            _ = ticker.tick() => {}
        }

        let pressure_psi = source.sample(&mut rand::rng());
        let flags = flags_for(index);
        let pkt = encoder.encode(pressure_psi, flags)?;

        if !encoder.self_check(&pkt, flags) {
            summary.self_check_failures += 1;
            warn!(seq = index, "own packet failed local decode");
        }

        match link.send(&pkt).await {
            Ok(()) => {
                summary.sent += 1;
                info!(
                    event = "tx",
                    seq = index,
                    sensor = %encoder.sensor_id(),
                    mode = %encoder.mode(),
                    pressure_psi = %format!("{pressure_psi:.2}"),
                    flags,
                    bytes = pkt.len(),
                );
            }
            Err(e) => {
                summary.send_errors += 1;
                warn!(?e, seq = index, "send failed");
            }
        }
        debug!(frame = %hex::encode(&pkt));
        index += 1;
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tpms_protocol::channel::MemoryChannel;
    use tpms_protocol::{Mode, SensorId, baseline};

    fn cfg(count: Option<u64>) -> Config {
        Config {
            mode: Mode::Baseline,
            sensor_id: SensorId::new(0xA0A6F9).unwrap(),
            position: "front_left".into(),
            base_pressure: 37.5,
            interval_ms: 5,
            target: "127.0.0.1:5000".into(),
            key_file: PathBuf::from("unused"),
            count,
        }
    }

    #[test]
    fn every_fifth_packet_is_marked() {
        let flags: Vec<u8> = (0..10).map(flags_for).collect();
        assert_eq!(flags, [7, 5, 5, 5, 5, 7, 5, 5, 5, 5]);
    }

    #[test]
    fn jitter_stays_in_band() {
        let src = PressureSource::new(37.5).unwrap();
        let mut rng = rand::rng();
        for _ in 0..1000 {
            let p = src.sample(&mut rng);
            assert!((37.2..=37.8).contains(&p), "{p}");
        }
    }

    #[tokio::test]
    async fn sends_count_packets_then_stops() {
        let cfg = cfg(Some(6));
        let enc = PacketEncoder::from_config(&cfg).unwrap();
        let bus = MemoryChannel::new(16);
        let ecu = bus.endpoint();

        let summary = run(&cfg, &enc, &bus, CancellationToken::new()).await.unwrap();
        assert_eq!(summary, BroadcastSummary { sent: 6, send_errors: 0, self_check_failures: 0 });

        let mut flags = Vec::new();
        while let Some(frame) = ecu.receive(std::time::Duration::from_millis(20)).await.unwrap() {
            let r = baseline::decode(&frame).unwrap();
            assert!((r.pressure_psi - 37.5).abs() < 0.5);
            flags.push(r.flags);
        }
        assert_eq!(flags, [7, 5, 5, 5, 5, 7]);
    }

    #[tokio::test]
    async fn cancellation_stops_an_endless_run() {
        let cfg = cfg(None);
        let enc = PacketEncoder::from_config(&cfg).unwrap();
        let bus = MemoryChannel::new(64);
        let token = CancellationToken::new();
        token.cancel();
        let summary = tokio_test::assert_ok!(run(&cfg, &enc, &bus, token).await);
        assert_eq!(summary.sent, 0);
    }
}
