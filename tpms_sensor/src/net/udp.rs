use crate::config::Config;
use anyhow::{Context, Result};
use tpms_protocol::channel::UdpChannel;

/// Broadcast-enabled socket on an ephemeral port, aimed at `cfg.target`.
pub async fn connect(cfg: &Config) -> Result<UdpChannel> {
    UdpChannel::broadcaster(&cfg.target)
        .await
        .with_context(|| format!("cannot open broadcast socket to {}", cfg.target))
}
