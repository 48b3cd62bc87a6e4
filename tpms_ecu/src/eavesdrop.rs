// eavesdrop.rs (keyless observer loop)
use anyhow::Result;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tpms_protocol::ChannelError;
use tpms_protocol::channel::Channel;
use tpms_protocol::eavesdrop::{self, Observation, Tracker, TrackerSummary};
use tracing::{debug, info, warn};

use crate::logging::csv::{LogFile, log_interception};

const POLL: Duration = Duration::from_secs(1);

pub async fn run(link: &dyn Channel, log: &LogFile, token: CancellationToken) -> Result<TrackerSummary> {
    let mut tracker = Tracker::new();
    info!(log = %log.path().display(), "eavesdropping (no keys)");
    loop {
        let frame = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            r = link.receive(POLL) => r,
        };
        let buf = match frame {
            Ok(Some(buf)) => buf,
            Ok(None) => continue,
            Err(ChannelError::Closed) => break,
            Err(e) => {
                warn!(?e, "receive error");
                continue;
            }
        };

        let Some(obs) = eavesdrop::analyze(&buf) else {
            debug!(len = buf.len(), "unrecognized frame");
            continue;
        };
        let sightings = tracker.record(&obs);
        match &obs {
            Observation::Baseline { sensor_id, pressure_psi, .. } => warn!(
                sensor = %sensor_id,
                pressure_psi = %format!("{pressure_psi:.1}"),
                sightings = sightings.unwrap_or(0),
                "cleartext sensor tracked"
            ),
            Observation::Encrypted { nonce } => info!(
                nonce = %hex::encode(&nonce[..4]),
                "encrypted packet; identity and pressure hidden"
            ),
        }
        if let Err(e) = log_interception(log, &obs, sightings).await {
            warn!(?e, "interception log write failed");
        }
    }

    let summary = tracker.summary();
    info!(
        packets = summary.packets,
        baseline = summary.baseline,
        encrypted = summary.encrypted,
        vehicles_tracked = summary.vehicles_tracked,
        "eavesdropper stopped"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tpms_protocol::channel::MemoryChannel;
    use tpms_protocol::keystore::SharedKey;
    use tpms_protocol::{SensorId, baseline, secure};

    #[tokio::test]
    async fn tracks_baseline_but_not_secure_traffic() {
        let dir = std::env::temp_dir().join(format!("tpms-spy-{}", uuid::Uuid::new_v4()));
        let log = LogFile::new(dir.join("interceptions.jsonl"), None);
        let bus = MemoryChannel::new(16);
        let spy = bus.endpoint();

        let fl = SensorId::new(0xA0A6F9).unwrap();
        let fr = SensorId::new(0xB1C2D3).unwrap();
        let key = SharedKey::from_bytes([3; 16]);
        bus.send(&baseline::encode(fl, 37.5, 5)).await.unwrap();
        bus.send(&baseline::encode(fl, 37.4, 5)).await.unwrap();
        bus.send(&secure::encode(fr, 37.5, 5, &key).unwrap().0).await.unwrap();
        bus.send(&[0xAA; 8]).await.unwrap();

        let token = CancellationToken::new();
        let stop = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            stop.cancel();
        });
        let summary = run(&spy, &log, token).await.unwrap();
        assert_eq!(
            summary,
            TrackerSummary { packets: 3, baseline: 2, encrypted: 1, vehicles_tracked: 1 }
        );

        let text = std::fs::read_to_string(log.path()).unwrap();
        assert_eq!(text.lines().count(), 3);
        assert!(!text.contains("B1C2D3"));
        std::fs::remove_dir_all(dir).ok();
    }
}
