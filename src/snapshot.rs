//! Unified transport-agnostic snapshot model and capability flags.

use std::collections::HashMap;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Which panel hardware generation produced a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PanelGeneration {
    Gen2,
    Gen3,
}

bitflags! {
    /// Runtime-advertised feature set of a transport. Applications read
    /// `client.capabilities()` at setup to decide which surfaces to expose.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct PanelCapability: u32 {
        const RELAY_CONTROL   = 1 << 0;
        const PRIORITY_CONTROL = 1 << 1;
        const ENERGY_HISTORY  = 1 << 2;
        const BATTERY         = 1 << 3;
        const AUTHENTICATION  = 1 << 4;
        const SOLAR           = 1 << 5;
        const DSM_STATE       = 1 << 6;
        const HARDWARE_STATUS = 1 << 7;
        const PUSH_STREAMING  = 1 << 8;

        /// Everything Gen2 exposes except push-streaming.
        const GEN2_FULL = Self::RELAY_CONTROL.bits()
            | Self::PRIORITY_CONTROL.bits()
            | Self::ENERGY_HISTORY.bits()
            | Self::BATTERY.bits()
            | Self::AUTHENTICATION.bits()
            | Self::SOLAR.bits()
            | Self::DSM_STATE.bits()
            | Self::HARDWARE_STATUS.bits();

        /// What Gen3 currently exposes; expand as the Gen3 API matures.
        const GEN3_INITIAL = Self::PUSH_STREAMING.bits();
    }
}

/// Transport-agnostic snapshot of a single circuit's state and metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitSnapshot {
    pub circuit_id: String,
    pub name: String,
    pub power_w: f64,
    pub voltage_v: f64,
    pub current_a: f64,
    pub is_on: bool,

    // Gen2-only
    pub relay_state: Option<String>,
    pub priority: Option<String>,
    pub tabs: Option<Vec<u32>>,
    pub energy_produced_wh: Option<f64>,
    pub energy_consumed_wh: Option<f64>,

    // Gen3-only
    pub apparent_power_va: Option<f64>,
    pub reactive_power_var: Option<f64>,
    pub frequency_hz: Option<f64>,
    pub power_factor: Option<f64>,
    pub is_dual_phase: bool,
}

impl CircuitSnapshot {
    /// A minimal snapshot with all optional fields unset; transports fill in
    /// what they support.
    pub fn new(circuit_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            circuit_id: circuit_id.into(),
            name: name.into(),
            power_w: 0.0,
            voltage_v: 0.0,
            current_a: 0.0,
            is_on: true,
            relay_state: None,
            priority: None,
            tabs: None,
            energy_produced_wh: None,
            energy_consumed_wh: None,
            apparent_power_va: None,
            reactive_power_var: None,
            frequency_hz: None,
            power_factor: None,
            is_dual_phase: false,
        }
    }
}

/// Transport-agnostic snapshot of the full panel state. Fields that are
/// `None` were not reported by the transport (e.g. Gen3 does not report
/// energy history, battery SOE, or DSM state).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PanelSnapshot {
    pub generation: PanelGeneration,
    pub serial_number: String,
    pub firmware_version: String,
    pub circuits: HashMap<String, CircuitSnapshot>,
    pub main_power_w: f64,

    // Gen2-only
    pub main_relay_state: Option<String>,
    pub grid_power_w: Option<f64>,
    pub battery_soe: Option<f64>,
    pub dsm_state: Option<String>,
    pub dsm_grid_state: Option<String>,

    // Gen3-only
    pub main_voltage_v: Option<f64>,
    pub main_current_a: Option<f64>,
    pub main_frequency_hz: Option<f64>,
}

impl PanelSnapshot {
    pub fn empty(generation: PanelGeneration) -> Self {
        Self {
            generation,
            serial_number: String::new(),
            firmware_version: String::new(),
            circuits: HashMap::new(),
            main_power_w: 0.0,
            main_relay_state: None,
            grid_power_w: None,
            battery_soe: None,
            dsm_state: None,
            dsm_grid_state: None,
            main_voltage_v: None,
            main_current_a: None,
            main_frequency_hz: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gen2_full_excludes_push_streaming() {
        assert!(!PanelCapability::GEN2_FULL.contains(PanelCapability::PUSH_STREAMING));
        assert!(PanelCapability::GEN2_FULL.contains(PanelCapability::RELAY_CONTROL));
    }

    #[test]
    fn gen3_initial_is_push_streaming_only() {
        assert_eq!(PanelCapability::GEN3_INITIAL, PanelCapability::PUSH_STREAMING);
    }
}
