// listen.rs: the ECU receive loop
use anyhow::{Context, Result};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tpms_protocol::channel::Channel;
use tpms_protocol::{ChannelError, Delivery, KeyStore, Mode, Receiver, ReceiverStats};
use tracing::{debug, info, trace, warn};

use crate::config::ListenConfig;
use crate::logging::csv::ReceiverLogs;

/// Key store for `cfg.mode`. Baseline never touches key material.
pub fn load_store(cfg: &ListenConfig) -> Result<KeyStore> {
    match cfg.mode {
        Mode::Baseline => Ok(KeyStore::new()),
        Mode::Secure => {
            let store = KeyStore::load(&cfg.key_store).with_context(|| {
                format!(
                    "cannot load key store {}; pair sensors with `tpms_ecu pair` first",
                    cfg.key_store.display()
                )
            })?;
            for (id, rec) in store.all() {
                info!(sensor = %id, position = %rec.position, "paired sensor");
            }
            Ok(store)
        }
    }
}

/// Runs until `token` is cancelled or the link closes. Bad packets and
/// transient channel errors never end the loop.
pub async fn run(
    cfg: &ListenConfig,
    link: &dyn Channel,
    mut receiver: Receiver,
    logs: &ReceiverLogs,
    token: CancellationToken,
) -> Result<ReceiverStats> {
    info!(mode = %receiver.mode(), sensors = receiver.store().len(), "listening");
    loop {
        let frame = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            r = link.receive(cfg.recv_timeout) => r,
        };
        let buf = match frame {
            Ok(Some(buf)) => buf,
            Ok(None) => {
                trace!("receive timeout");
                continue;
            }
            Err(ChannelError::Closed) => {
                warn!("link closed");
                break;
            }
            Err(e) => {
                warn!(?e, "receive error");
                continue;
            }
        };

        match receiver.process(&buf, Instant::now()) {
            Delivery::Emitted(report) => {
                let low = report.is_low_pressure(cfg.low_pressure_psi);
                info!(
                    event = "report",
                    sensor = %report.sensor_id,
                    position = report.position.as_deref().unwrap_or("-"),
                    pressure_psi = report.pressure_display(),
                    flags = report.flags,
                    authenticated = report.authenticated,
                );
                if low {
                    warn!(
                        sensor = %report.sensor_id,
                        pressure_psi = report.pressure_display(),
                        threshold = cfg.low_pressure_psi,
                        "LOW PRESSURE"
                    );
                }
                if let Err(e) = logs.log_report(&report, low).await {
                    warn!(?e, "report log write failed");
                }
            }
            Delivery::Duplicate(report) => {
                debug!(sensor = %report.sensor_id, "duplicate within window");
            }
            Delivery::Rejected(rejection) => {
                if let Err(e) = logs.log_rejection(&rejection, buf.len()).await {
                    warn!(?e, "rejection log write failed");
                }
            }
        }
    }

    let stats = receiver.stats().clone();
    info!(
        packets = stats.packets,
        emitted = stats.emitted,
        duplicates = stats.duplicates,
        rejected = stats.rejected(),
        integrity_warnings = stats.integrity_warnings,
        "receiver stopped"
    );
    Ok(stats)
}
