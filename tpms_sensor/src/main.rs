// src/main.rs
mod broadcast;
mod config;
mod crypto;
mod net;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // -------- logging ----------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("tpms_sensor=info".parse()?)
                .add_directive("tpms_protocol=info".parse()?)
                .add_directive("tokio=warn".parse()?),
        )
        .compact()
        .init();

    // -------- config + key material ----------
    let cfg = config::Cli::parse_and_build_config()?;
    let encoder = crypto::PacketEncoder::from_config(&cfg)?;
    info!(?cfg, "TPMS sensor starting");

    // -------- socket ----------
    let link = net::udp::connect(&cfg).await?;

    // -------- graceful shutdown ----------
    let token = CancellationToken::new();
    let on_signal = token.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(?e, "failed to install Ctrl+C handler");
            return;
        }
        info!("shutdown signal received");
        on_signal.cancel();
    });

    let summary = broadcast::run(&cfg, &encoder, &link, token).await?;
    info!(
        sent = summary.sent,
        send_errors = summary.send_errors,
        self_check_failures = summary.self_check_failures,
        "sensor stopped"
    );
    Ok(())
}
