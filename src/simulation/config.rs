//! Declarative circuit-template configuration, parsed from an
//! already-loaded YAML tree and validated once at startup.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{PanelError, Result};
use crate::phase::{validate_pairing, Leg};
use std::collections::HashSet;

/// Direction of energy flow a template is allowed to exhibit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnergyMode {
    Consumer,
    Producer,
    Bidirectional,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnergyProfile {
    pub mode: EnergyMode,
    pub min_power: f64,
    pub max_power: f64,
    pub typical_power: f64,
    #[serde(default = "default_variation")]
    pub power_variation: f64,
}

fn default_variation() -> f64 {
    0.1
}

impl EnergyProfile {
    pub fn clamp(&self, watts: f64) -> f64 {
        watts.clamp(self.min_power, self.max_power)
    }
}

/// Hour-of-day power profile. `hour_factors` takes precedence over
/// `peak_hours`/`peak_factor`; neither present falls back to a default
/// solar curve for producer templates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeOfDayProfile {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub hour_factors: HashMap<u8, f64>,
    #[serde(default)]
    pub peak_hours: Vec<u8>,
    #[serde(default = "default_peak_factor")]
    pub peak_factor: f64,
}

fn default_peak_factor() -> f64 {
    1.5
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CyclingProfile {
    pub on_minutes: f64,
    pub off_minutes: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmartGridProfile {
    #[serde(default = "default_sg_start")]
    pub start_hour: u8,
    #[serde(default = "default_sg_end")]
    pub end_hour: u8,
    pub peak_reduction_factor: f64,
}

fn default_sg_start() -> u8 {
    17
}
fn default_sg_end() -> u8 {
    21
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatteryProfile {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub charge_hours: Vec<u8>,
    #[serde(default)]
    pub discharge_hours: Vec<u8>,
    #[serde(default)]
    pub idle_hours: Vec<u8>,
    pub max_charge: f64,
    pub max_discharge: f64,
    /// Configured as `(lo, hi)`; may contain negative bounds, normalized by
    /// the behavior engine per the documented idle-range quirk.
    #[serde(default)]
    pub idle_power_range: Option<(f64, f64)>,
}

/// Whether a circuit's relay can be switched open/closed by the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayBehavior {
    Controllable,
    NotControllable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitTemplate {
    pub energy_profile: EnergyProfile,
    pub relay_behavior: RelayBehavior,
    #[serde(default)]
    pub priority: String,
    #[serde(default)]
    pub time_of_day: Option<TimeOfDayProfile>,
    #[serde(default)]
    pub cycling: Option<CyclingProfile>,
    #[serde(default)]
    pub smart_grid: Option<SmartGridProfile>,
    #[serde(default)]
    pub battery: Option<BatteryProfile>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitDecl {
    pub id: String,
    pub name: String,
    pub template: String,
    pub tabs: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnmappedTabTemplate {
    pub tab: u32,
    pub template: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerSplit {
    Equal,
    PrimarySecondary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TabSync {
    pub tabs: Vec<u32>,
    pub behavior: String,
    pub power_split: PowerSplit,
    #[serde(default)]
    pub energy_sync: bool,
    pub template: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PanelSpec {
    pub serial_number: String,
    pub total_tabs: u32,
    pub main_size: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimulationTimeConfig {
    #[serde(default)]
    pub enabled: bool,
    pub start_time: Option<String>,
    #[serde(default = "default_acceleration")]
    pub acceleration: f64,
}

fn default_acceleration() -> f64 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub panel_config: PanelSpec,
    pub circuit_templates: HashMap<String, CircuitTemplate>,
    pub circuits: Vec<CircuitDecl>,
    #[serde(default)]
    pub unmapped_tab_templates: Vec<UnmappedTabTemplate>,
    #[serde(default)]
    pub tab_synchronizations: Vec<TabSync>,
    #[serde(default)]
    pub simulation_time: Option<SimulationTimeConfig>,
}

impl SimulationConfig {
    /// Parse and validate an already-deserialized configuration tree.
    pub fn from_yaml_value(value: serde_yaml::Value) -> Result<Self> {
        let config: SimulationConfig = serde_yaml::from_value(value)?;
        config.validate()?;
        Ok(config)
    }

    /// Parses YAML text directly. The YAML *loader* (locating and reading
    /// config files) is out of scope for this crate; this only exists so
    /// callers who already have the text in hand don't need to round-trip
    /// through `serde_yaml::Value` themselves.
    pub fn from_str(yaml: &str) -> Result<Self> {
        let value: serde_yaml::Value = serde_yaml::from_str(yaml)?;
        Self::from_yaml_value(value)
    }

    /// As [`Self::from_str`], reading the YAML text from any `Read` source.
    pub fn from_reader<R: std::io::Read>(reader: R) -> Result<Self> {
        let value: serde_yaml::Value = serde_yaml::from_reader(reader)?;
        Self::from_yaml_value(value)
    }

    /// Structural validation run once at load, per the panel's topology rules.
    pub fn validate(&self) -> Result<()> {
        if self.circuit_templates.is_empty() {
            return Err(PanelError::SimulationConfig("circuit_templates must not be empty".into()));
        }
        if self.circuits.is_empty() {
            return Err(PanelError::SimulationConfig("circuits must not be empty".into()));
        }
        for tmpl in self.circuit_templates.values() {
            if tmpl.priority.is_empty() {
                return Err(PanelError::SimulationConfig("template priority must not be empty".into()));
            }
        }
        for circuit in &self.circuits {
            if !self.circuit_templates.contains_key(&circuit.template) {
                return Err(PanelError::SimulationConfig(format!(
                    "circuit {} references undeclared template {}",
                    circuit.id, circuit.template
                )));
            }
            if circuit.tabs.is_empty() || circuit.tabs.len() > 2 {
                return Err(PanelError::SimulationConfig(format!(
                    "circuit {} must declare 1 or 2 tabs",
                    circuit.id
                )));
            }
        }
        let valid_tabs: HashSet<u32> = (1..=self.panel_config.total_tabs).collect();
        for sync in &self.tab_synchronizations {
            if !self.circuit_templates.contains_key(&sync.template) {
                return Err(PanelError::SimulationConfig(format!(
                    "tab sync references undeclared template {}",
                    sync.template
                )));
            }
            if sync.behavior == "240v_split_phase" && sync.tabs.len() == 2 {
                validate_pairing(sync.tabs[0], sync.tabs[1], &valid_tabs)
                    .map_err(PanelError::SimulationConfig)?;
            }
        }
        Ok(())
    }

    pub fn valid_tabs(&self) -> HashSet<u32> {
        (1..=self.panel_config.total_tabs).collect()
    }

    pub fn leg_of(&self, tab: u32) -> Option<Leg> {
        crate::phase::tab_phase(tab, &self.valid_tabs())
    }
}
