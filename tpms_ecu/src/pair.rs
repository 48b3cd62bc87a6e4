// pair.rs: `tpms_ecu pair <SENSOR_ID_HEX> <POSITION>`
use anyhow::{Context, Result};
use tpms_protocol::pairing::{KeyPaths, PairingOutcome, PairingService, parse_sensor_id_hex};
use tpms_protocol::{KeyStoreRecord, default_position};
use tracing::{info, warn};

use crate::config::PairConfig;

pub fn run(cfg: &PairConfig) -> Result<KeyStoreRecord> {
    let sensor_id = parse_sensor_id_hex(&cfg.sensor_id)?;
    if let Some(installed) = default_position(sensor_id).filter(|p| *p != cfg.position) {
        warn!(sensor = %sensor_id, installed, requested = %cfg.position, "position differs from the default table");
    }

    let paths = KeyPaths::in_dir(&cfg.key_dir);
    let PairingOutcome::Paired { record } = PairingService::default()
        .pair_and_persist(sensor_id, &cfg.position, &paths)
        .with_context(|| format!("pairing sensor {sensor_id} failed"))?;

    info!(
        sensor = %record.sensor_id,
        position = %record.position,
        ecu_store = %paths.ecu_store.display(),
        sensor_file = %paths.sensor_file(sensor_id).display(),
        "paired"
    );
    Ok(record)
}
