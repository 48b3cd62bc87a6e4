// power.rs: energy cost per packet and coin-cell battery life estimate
use serde::Serialize;

/// Sensor hardware and duty-cycle assumptions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnergyModel {
    pub mcu_voltage: f64,
    pub mcu_active_current_a: f64,
    pub rf_tx_current_a: f64,
    pub rf_bitrate_bps: f64,
    pub transmissions_per_day: f64,
    pub battery_capacity_mah: f64,
    pub battery_voltage: f64,
    pub max_battery_life_years: f64,
}

impl Default for EnergyModel {
    fn default() -> Self {
        Self {
            mcu_voltage: 3.0,
            mcu_active_current_a: 0.005,
            rf_tx_current_a: 0.015,
            rf_bitrate_bps: 10_000.0,
            transmissions_per_day: 60.0,
            battery_capacity_mah: 220.0, // CR2032
            battery_voltage: 3.0,
            max_battery_life_years: 10.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PacketEnergy {
    pub comp_time_ms: f64,
    pub comp_energy_uj: f64,
    pub tx_time_ms: f64,
    pub tx_energy_uj: f64,
    pub total_energy_uj: f64,
    pub daily_energy_j: f64,
}

impl EnergyModel {
    /// Energy for building (`comp_time_us`) and sending one packet.
    pub fn packet_energy(&self, packet_bytes: usize, comp_time_us: f64) -> PacketEnergy {
        let comp_time_s = comp_time_us / 1e6;
        let comp_energy_uj = self.mcu_voltage * self.mcu_active_current_a * comp_time_s * 1e6;

        let tx_time_s = (packet_bytes * 8) as f64 / self.rf_bitrate_bps;
        let tx_energy_uj = self.mcu_voltage * self.rf_tx_current_a * tx_time_s * 1e6;

        let total_energy_uj = comp_energy_uj + tx_energy_uj;
        PacketEnergy {
            comp_time_ms: comp_time_us / 1000.0,
            comp_energy_uj,
            tx_time_ms: tx_time_s * 1000.0,
            tx_energy_uj,
            total_energy_uj,
            daily_energy_j: total_energy_uj * self.transmissions_per_day / 1e6,
        }
    }

    /// Years until the cell is drained by radio traffic alone, capped at the
    /// cell's shelf life.
    pub fn battery_life_years(&self, daily_energy_j: f64) -> f64 {
        if daily_energy_j <= 0.0 {
            return self.max_battery_life_years;
        }
        (self.battery_joules() / daily_energy_j / 365.25).min(self.max_battery_life_years)
    }

    /// Charge left after `months` of service, in percent, floored at zero.
    pub fn remaining_percent(&self, daily_energy_j: f64, months: f64) -> f64 {
        let used_j = daily_energy_j * (months / 12.0 * 365.25);
        ((1.0 - used_j / self.battery_joules()) * 100.0).max(0.0)
    }

    fn battery_joules(&self) -> f64 {
        self.battery_capacity_mah / 1000.0 * self.battery_voltage * 3600.0
    }
}
