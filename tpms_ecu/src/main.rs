// src/main.rs
mod config;
mod eavesdrop;
mod listen;
mod logging;
mod pair;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tpms_protocol::Receiver;
use tpms_protocol::channel::UdpChannel;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;

/// Cancelled on Ctrl+C.
fn shutdown_token() -> CancellationToken {
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
    token
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // -------- logging ----------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("tpms_ecu=info".parse()?)
                .add_directive("tpms_protocol=info".parse()?)
                .add_directive("tokio=warn".parse()?),
        )
        .compact()
        .init();

    let cfg = config::Cli::parse_and_build_config()?;
    info!(?cfg, "TPMS ECU starting");

    match cfg {
        Config::Listen(cfg) => {
            let store = listen::load_store(&cfg)?;
            let receiver = Receiver::new(cfg.mode, store)?.with_window(cfg.dedup_window);
            let link = UdpChannel::bind_receiver(&cfg.bind)
                .with_context(|| format!("cannot bind {}", cfg.bind))?;
            let logs = logging::csv::ReceiverLogs::in_dir(&cfg.log_dir);
            listen::run(&cfg, &link, receiver, &logs, shutdown_token()).await?;
        }
        Config::Eavesdrop(cfg) => {
            let link = UdpChannel::bind_receiver(&cfg.bind)
                .with_context(|| format!("cannot bind {}", cfg.bind))?;
            let log = logging::csv::LogFile::new(&cfg.log, None);
            eavesdrop::run(&link, &log, shutdown_token()).await?;
        }
        Config::Pair(cfg) => {
            pair::run(&cfg)?;
        }
    }
    Ok(())
}
