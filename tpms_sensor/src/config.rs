//Command line interface
// runtime configuration (identity, mode, rate, key material)
use anyhow::{Result, bail};
use clap::Parser;
use std::path::PathBuf;
use tpms_protocol::keystore::sensor_key_file_name;
use tpms_protocol::{DEFAULT_PORT, Mode, SensorId, default_position};

#[derive(Debug, Clone)]
pub struct Config {
    pub mode: Mode,
    pub sensor_id: SensorId,
    pub position: String,
    pub base_pressure: f64,
    pub interval_ms: u64,
    pub target: String,
    pub key_file: PathBuf,
    pub count: Option<u64>,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "tpms_sensor", about = "Tire pressure sensor broadcaster")]
pub struct Cli {
    #[arg(long, default_value = "secure")]            pub mode: Mode,
    #[arg(long, default_value = "A0A6F9")]            pub sensor_id: SensorId,
    /// Defaults to the wheel this id is installed on, if known.
    #[arg(long)]                                      pub position: Option<String>,
    #[arg(long, default_value_t = 37.5)]              pub base_pressure: f64,
    #[arg(long, default_value_t = 2000)]              pub interval_ms: u64,
    #[arg(long)]                                      pub target: Option<String>,
    /// Defaults to keys/sensor_<ID>_key.json.
    #[arg(long)]                                      pub key_file: Option<PathBuf>,
    /// Stop after this many packets.
    #[arg(long)]                                      pub count: Option<u64>,
}

impl Cli {
    pub fn parse_and_build_config() -> Result<Config> {
        <Cli as Parser>::parse().into_config()
    }

    pub fn into_config(self) -> Result<Config> {
        if self.interval_ms == 0 {
            bail!("--interval-ms must be positive");
        }
        if !(0.0..=255.0 / tpms_protocol::PRESSURE_SCALE).contains(&self.base_pressure) {
            bail!("--base-pressure {} does not fit the wire format", self.base_pressure);
        }
        let position = self
            .position
            .or_else(|| default_position(self.sensor_id).map(str::to_owned))
            .unwrap_or_else(|| "unknown".into());
        let key_file = self
            .key_file
            .unwrap_or_else(|| PathBuf::from("keys").join(sensor_key_file_name(self.sensor_id)));
        Ok(Config {
            mode: self.mode,
            sensor_id: self.sensor_id,
            position,
            base_pressure: self.base_pressure,
            interval_ms: self.interval_ms,
            target: self
                .target
                .unwrap_or_else(|| format!("255.255.255.255:{DEFAULT_PORT}")),
            key_file,
            count: self.count,
        })
    }
}
