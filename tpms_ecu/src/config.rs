//Command line interface
// runtime configuration for the receiver, the passive observer and pairing
use anyhow::{Result, bail};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tpms_protocol::keystore::ECU_KEY_FILE;
use tpms_protocol::{DEFAULT_PORT, LOW_PRESSURE_THRESHOLD_PSI, Mode};

#[derive(Debug, Clone)]
pub enum Config {
    Listen(ListenConfig),
    Eavesdrop(EavesdropConfig),
    Pair(PairConfig),
}

#[derive(Debug, Clone)]
pub struct ListenConfig {
    pub mode: Mode,
    pub bind: String,
    pub key_store: PathBuf,
    pub recv_timeout: Duration,
    /// Repeats of the same report inside this span are suppressed.
    pub dedup_window: Duration,
    pub low_pressure_psi: f64,
    pub log_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct EavesdropConfig {
    pub bind: String,
    pub log: PathBuf,
}

#[derive(Debug, Clone)]
pub struct PairConfig {
    /// Kept as typed; validated by the pairing service.
    pub sensor_id: String,
    pub position: String,
    pub key_dir: PathBuf,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "tpms_ecu", about = "TPMS receiver, eavesdropper and pairing tool")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Receive, authenticate and report sensor packets.
    Listen(ListenArgs),
    /// Passively observe traffic without keys.
    Eavesdrop(EavesdropArgs),
    /// Pair a sensor and write both key records.
    Pair(PairArgs),
}

fn default_bind() -> String {
    format!("0.0.0.0:{DEFAULT_PORT}")
}

#[derive(Args, Debug, Clone)]
pub struct ListenArgs {
    #[arg(long, default_value = "secure")]                  pub mode: Mode,
    #[arg(long, default_value_t = default_bind())]          pub bind: String,
    /// Defaults to keys/ecu_key.json.
    #[arg(long)]                                            pub key_store: Option<PathBuf>,
    #[arg(long, default_value_t = 1000)]                    pub recv_timeout_ms: u64,
    #[arg(long, default_value_t = 2000)]                    pub dedup_window_ms: u64,
    #[arg(long, default_value_t = LOW_PRESSURE_THRESHOLD_PSI)] pub low_pressure: f64,
    #[arg(long, default_value = "logs")]                    pub log_dir: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct EavesdropArgs {
    #[arg(long, default_value_t = default_bind())]          pub bind: String,
    #[arg(long, default_value = "logs/interceptions.jsonl")] pub log: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct PairArgs {
    /// Sensor id in hex, e.g. A0A6F9.
    pub sensor_id: String,
    /// Wheel position, e.g. front_left.
    pub position: String,
    #[arg(long, default_value = "keys")]                    pub key_dir: PathBuf,
}

impl Cli {
    pub fn parse_and_build_config() -> Result<Config> {
        <Cli as Parser>::parse().into_config()
    }

    pub fn into_config(self) -> Result<Config> {
        Ok(match self.command {
            Command::Listen(a) => {
                if a.recv_timeout_ms == 0 {
                    bail!("--recv-timeout-ms must be positive");
                }
                Config::Listen(ListenConfig {
                    mode: a.mode,
                    bind: a.bind,
                    key_store: a
                        .key_store
                        .unwrap_or_else(|| PathBuf::from("keys").join(ECU_KEY_FILE)),
                    recv_timeout: Duration::from_millis(a.recv_timeout_ms),
                    dedup_window: Duration::from_millis(a.dedup_window_ms),
                    low_pressure_psi: a.low_pressure,
                    log_dir: a.log_dir,
                })
            }
            Command::Eavesdrop(a) => Config::Eavesdrop(EavesdropConfig {
                bind: a.bind,
                log: a.log,
            }),
            Command::Pair(a) => {
                if a.position.trim().is_empty() {
                    bail!("tire position must not be empty");
                }
                Config::Pair(PairConfig {
                    sensor_id: a.sensor_id,
                    position: a.position,
                    key_dir: a.key_dir,
                })
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Config> {
        let mut argv = vec!["tpms_ecu"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv)?.into_config()
    }

    #[test]
    fn listen_defaults() {
        let Config::Listen(c) = parse(&["listen"]).unwrap() else {
            panic!("expected listen");
        };
        assert_eq!(c.mode, Mode::Secure);
        assert_eq!(c.bind, "0.0.0.0:5000");
        assert_eq!(c.key_store, PathBuf::from("keys/ecu_key.json"));
        assert_eq!(c.recv_timeout, Duration::from_secs(1));
        assert_eq!(c.dedup_window, Duration::from_secs(2));
        assert_eq!(c.low_pressure_psi, 30.0);
    }

    #[test]
    fn listen_overrides() {
        let Config::Listen(c) = parse(&[
            "listen", "--mode", "baseline", "--bind", "127.0.0.1:6000", "--recv-timeout-ms", "250",
            "--dedup-window-ms", "500",
        ])
        .unwrap() else {
            panic!("expected listen");
        };
        assert_eq!(c.mode, Mode::Baseline);
        assert_eq!(c.bind, "127.0.0.1:6000");
        assert_eq!(c.recv_timeout, Duration::from_millis(250));
        assert_eq!(c.dedup_window, Duration::from_millis(500));
    }

    #[test]
    fn pair_takes_positionals() {
        let Config::Pair(c) = parse(&["pair", "A0A6F9", "front_left", "--key-dir", "/tmp/k"]).unwrap() else {
            panic!("expected pair");
        };
        assert_eq!(c.sensor_id, "A0A6F9");
        assert_eq!(c.position, "front_left");
        assert_eq!(c.key_dir, PathBuf::from("/tmp/k"));
    }

    #[test]
    fn invalid_input_is_refused() {
        assert!(parse(&["pair", "A0A6F9"]).is_err());
        assert!(parse(&["pair", "A0A6F9", " "]).is_err());
        assert!(parse(&["listen", "--recv-timeout-ms", "0"]).is_err());
        assert!(parse(&["listen", "--mode", "rot13"]).is_err());
        assert!(parse(&[]).is_err());
    }
}
