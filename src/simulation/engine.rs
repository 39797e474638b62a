//! Per-tick data generator: produces panel state, circuits, status, and SOE
//! coherently from one generation pass, enforcing the panel/circuit
//! alignment invariant and accumulating per-circuit energy totals.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Local};
use dashmap::DashMap;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::behavior::{circuit_power, BehaviorState, RelayState};
use crate::cache::TimeWindowCache;
use crate::error::{PanelError, Result};
use crate::simulation::config::{CircuitTemplate, EnergyMode, PowerSplit, SimulationConfig};
use crate::simulation::overrides::OverrideTable;

const FULL_SIM_DATA_KEY: &str = "full_sim_data";

/// Cumulative per-circuit state, created at first read and mutated only by
/// the engine's generation pass.
#[derive(Debug, Clone)]
struct CircuitRuntimeState {
    produced_wh: f64,
    consumed_wh: f64,
    last_update: DateTime<Local>,
    last_power: f64,
    relay_state: RelayState,
    priority: String,
}

/// One circuit's resolved values for a single tick.
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitTick {
    pub circuit_id: String,
    pub name: String,
    pub power_w: f64,
    pub tabs: Vec<u32>,
    pub relay_state: RelayState,
    pub priority: String,
    pub produced_wh: f64,
    pub consumed_wh: f64,
    pub is_virtual: bool,
}

/// The full coherent snapshot for one generation pass, cached under a
/// single key so all four derived views (panel, circuits, status, SOE)
/// agree with each other.
#[derive(Debug, Clone, PartialEq)]
pub struct SimTickData {
    pub timestamp: DateTime<Local>,
    pub circuits: HashMap<String, CircuitTick>,
    pub branch_power: HashMap<u32, f64>,
    pub grid_power_w: f64,
    pub main_produced_wh: f64,
    pub main_consumed_wh: f64,
    pub soe_percent: f64,
}

pub struct SimulationEngine {
    config: SimulationConfig,
    clock: crate::simulation::clock::SimulationClock,
    circuit_state: DashMap<String, CircuitRuntimeState>,
    overrides: OverrideTable,
    cache: TimeWindowCache<Arc<SimTickData>>,
    rng: Mutex<StdRng>,
    sim_start: DateTime<Local>,
    last_soe: Mutex<f64>,
}

impl SimulationEngine {
    pub fn new(config: SimulationConfig) -> Result<Self> {
        config.validate()?;
        let clock = crate::simulation::clock::SimulationClock::new();
        clock.init(config.simulation_time.as_ref())?;
        Ok(Self {
            config,
            clock,
            circuit_state: DashMap::new(),
            overrides: OverrideTable::new(),
            cache: TimeWindowCache::new(std::time::Duration::from_millis(500))?,
            rng: Mutex::new(StdRng::from_entropy()),
            sim_start: Local::now(),
            last_soe: Mutex::new(50.0),
        })
    }

    pub fn overrides(&self) -> &OverrideTable {
        &self.overrides
    }

    fn template_for(&self, name: &str) -> Option<&CircuitTemplate> {
        self.config.circuit_templates.get(name)
    }

    /// Record a relay change as an override and invalidate the cached tick.
    pub fn set_circuit_relay(&self, circuit_id: &str, open: bool) -> Result<()> {
        if !self.config.circuits.iter().any(|c| c.id == circuit_id) {
            return Err(PanelError::ApiError { status: None, message: format!("unknown circuit {circuit_id}") });
        }
        let state = if open { RelayState::Open } else { RelayState::Closed };
        self.overrides.set_relay_override(circuit_id, state);
        self.cache.invalidate(FULL_SIM_DATA_KEY);
        Ok(())
    }

    pub fn set_circuit_power_override(&self, circuit_id: &str, power: f64) {
        self.overrides.set_circuit_override(
            circuit_id,
            crate::simulation::overrides::CircuitOverride { power_override: Some(power), ..Default::default() },
        );
        self.cache.invalidate(FULL_SIM_DATA_KEY);
    }

    pub fn clear_circuit_override(&self, circuit_id: &str) {
        self.overrides.clear_circuit_override(circuit_id);
        self.cache.invalidate(FULL_SIM_DATA_KEY);
    }

    pub fn clear_all_overrides(&self) {
        self.overrides.clear_all();
        self.cache.invalidate(FULL_SIM_DATA_KEY);
    }

    pub fn set_global_power_multiplier(&self, multiplier: f64) {
        self.overrides.set_global_multiplier(multiplier);
        self.cache.invalidate(FULL_SIM_DATA_KEY);
    }

    /// Returns the current tick, computing and caching it on a miss. All
    /// reads within the cache TTL observe the exact same tick.
    pub fn tick(&self) -> Arc<SimTickData> {
        if let Some(cached) = self.cache.get(FULL_SIM_DATA_KEY) {
            return cached;
        }
        let data = Arc::new(self.generate());
        self.cache.set(FULL_SIM_DATA_KEY, data.clone());
        data
    }

    fn now(&self) -> DateTime<Local> {
        self.clock.now()
    }

    /// One full generation pass: tab-sync resolution, per-circuit behavior
    /// and accumulation, unmapped-tab synthesis, global multiplier, and
    /// aggregate computation, in that order.
    fn generate(&self) -> SimTickData {
        let now = self.now();
        let state = BehaviorState { sim_start: self.sim_start };

        let mut branch_power: HashMap<u32, f64> = HashMap::new();
        self.resolve_tab_sync_groups(now, &state, &mut branch_power);

        let mut circuits = HashMap::new();
        let mut real_grid_power = 0.0;
        let mut main_produced_wh = 0.0;
        let mut main_consumed_wh = 0.0;

        let synced_tabs: HashSet<u32> =
            self.config.tab_synchronizations.iter().flat_map(|s| s.tabs.iter().copied()).collect();

        for decl in &self.config.circuits {
            let override_delta = self.overrides.circuit_override(&decl.id);
            let mut runtime = self
                .circuit_state
                .entry(decl.id.clone())
                .or_insert_with(|| CircuitRuntimeState {
                    produced_wh: 0.0,
                    consumed_wh: 0.0,
                    last_update: now,
                    last_power: 0.0,
                    relay_state: RelayState::Closed,
                    priority: self.config.circuit_templates.get(&decl.template).map(|t| t.priority.clone()).unwrap_or_default(),
                });

            if let Some(delta) = &override_delta {
                if let Some(relay) = delta.relay_state {
                    runtime.relay_state = relay;
                }
                if let Some(priority) = &delta.priority {
                    runtime.priority = priority.clone();
                }
            }

            let computed: f64 = if decl.tabs.iter().all(|t| synced_tabs.contains(t)) && !decl.tabs.is_empty() {
                decl.tabs.iter().map(|t| branch_power.get(t).copied().unwrap_or(0.0)).sum()
            } else if let Some(template) = self.template_for(&decl.template) {
                let mut rng = self.rng.lock();
                let sample = circuit_power(&decl.name, template, now, runtime.relay_state, &mut *rng, &state);
                drop(rng);
                if decl.tabs.len() == 2 {
                    for tab in &decl.tabs {
                        branch_power.insert(*tab, sample / 2.0);
                    }
                } else if let Some(&tab) = decl.tabs.first() {
                    branch_power.insert(tab, sample);
                }
                sample
            } else {
                0.0
            };

            let effective = override_delta.as_ref().and_then(|d| d.power_override).unwrap_or(computed);

            let dt_hours = (now - runtime.last_update).num_milliseconds() as f64 / 3_600_000.0;
            if effective < 0.0 {
                runtime.produced_wh += effective.abs() * dt_hours.max(0.0);
            } else if effective > 0.0 {
                runtime.consumed_wh += effective * dt_hours.max(0.0);
            }
            runtime.last_update = now;
            runtime.last_power = effective;

            if let Some(&tab) = decl.tabs.first() {
                if decl.tabs.len() == 1 {
                    branch_power.insert(tab, effective);
                }
            }

            real_grid_power += effective;
            main_produced_wh += runtime.produced_wh;
            main_consumed_wh += runtime.consumed_wh;

            circuits.insert(
                decl.id.clone(),
                CircuitTick {
                    circuit_id: decl.id.clone(),
                    name: decl.name.clone(),
                    power_w: effective,
                    tabs: decl.tabs.clone(),
                    relay_state: runtime.relay_state,
                    priority: runtime.priority.clone(),
                    produced_wh: runtime.produced_wh,
                    consumed_wh: runtime.consumed_wh,
                    is_virtual: false,
                },
            );
        }

        let mapped_tabs: HashSet<u32> = self.config.circuits.iter().flat_map(|c| c.tabs.iter().copied()).collect();
        for tab in 1..=self.config.panel_config.total_tabs {
            if mapped_tabs.contains(&tab) {
                continue;
            }
            let template = self
                .config
                .unmapped_tab_templates
                .iter()
                .find(|u| u.tab == tab)
                .and_then(|u| self.template_for(&u.template))
                .cloned()
                .unwrap_or_else(neutral_fallback_template);
            let mut rng = self.rng.lock();
            let sample = circuit_power(&format!("unmapped_tab_{tab}"), &template, now, RelayState::Closed, &mut *rng, &state);
            drop(rng);
            branch_power.insert(tab, sample);
            circuits.insert(
                format!("unmapped_tab_{tab}"),
                CircuitTick {
                    circuit_id: format!("unmapped_tab_{tab}"),
                    name: format!("Unmapped Tab {tab}"),
                    power_w: sample,
                    tabs: vec![tab],
                    relay_state: RelayState::Closed,
                    priority: "unknown".into(),
                    produced_wh: 0.0,
                    consumed_wh: 0.0,
                    is_virtual: true,
                },
            );
        }

        let multiplier = self.overrides.global_multiplier();
        if (multiplier - 1.0).abs() > f64::EPSILON {
            for tick in circuits.values_mut() {
                tick.power_w *= multiplier;
            }
            for power in branch_power.values_mut() {
                *power *= multiplier;
            }
            real_grid_power *= multiplier;
        }

        let soe_percent = self.compute_soe(&circuits);

        SimTickData {
            timestamp: now,
            circuits,
            branch_power,
            grid_power_w: real_grid_power,
            main_produced_wh,
            main_consumed_wh,
            soe_percent,
        }
    }

    /// Computes aggregate per-tab shares for every configured tab
    /// synchronization group, writing directly into `branch_power`.
    fn resolve_tab_sync_groups(&self, now: DateTime<Local>, state: &BehaviorState, branch_power: &mut HashMap<u32, f64>) {
        for sync in &self.config.tab_synchronizations {
            let Some(template) = self.template_for(&sync.template) else { continue };
            let mut rng = self.rng.lock();
            let aggregate = circuit_power(&sync.behavior, template, now, RelayState::Closed, &mut *rng, state);
            drop(rng);
            let shares = match sync.power_split {
                PowerSplit::Equal => {
                    let share = aggregate / sync.tabs.len().max(1) as f64;
                    vec![share; sync.tabs.len()]
                }
                PowerSplit::PrimarySecondary => {
                    let mut shares = vec![0.0; sync.tabs.len()];
                    if let Some(first) = shares.first_mut() {
                        *first = aggregate;
                    }
                    shares
                }
            };
            for (tab, share) in sync.tabs.iter().zip(shares) {
                branch_power.insert(*tab, share);
            }
        }
    }

    /// Base 50%, shifted by net battery charge/discharge power since the
    /// last tick, clamped to `[15, 95]`.
    fn compute_soe(&self, circuits: &HashMap<String, CircuitTick>) -> f64 {
        let net_battery_power: f64 = self
            .config
            .circuits
            .iter()
            .filter(|c| self.template_for(&c.template).map(|t| t.battery.as_ref().map(|b| b.enabled).unwrap_or(false)).unwrap_or(false))
            .filter_map(|c| circuits.get(&c.id))
            .map(|tick| tick.power_w)
            .sum();

        if net_battery_power == 0.0 && !self.config.circuits.iter().any(|c| self.template_for(&c.template).and_then(|t| t.battery.as_ref()).is_some()) {
            return *self.last_soe.lock();
        }

        let mut soe = self.last_soe.lock();
        let delta = net_battery_power / 100_000.0;
        *soe = (*soe + delta).clamp(15.0, 95.0);
        *soe
    }
}

fn neutral_fallback_template() -> CircuitTemplate {
    use crate::simulation::config::{EnergyProfile, RelayBehavior};
    CircuitTemplate {
        energy_profile: EnergyProfile { mode: EnergyMode::Consumer, min_power: 0.0, max_power: 0.0, typical_power: 0.0, power_variation: 0.0 },
        relay_behavior: RelayBehavior::NotControllable,
        priority: "unknown".into(),
        time_of_day: None,
        cycling: None,
        smart_grid: None,
        battery: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_circuit_config() -> SimulationConfig {
        let yaml = r#"
panel_config:
  serial_number: "PAN-1"
  total_tabs: 4
  main_size: 200
circuit_templates:
  hvac:
    energy_profile:
      mode: consumer
      min_power: 0
      max_power: 4000
      typical_power: 2500
      power_variation: 0.0
    relay_behavior: controllable
    priority: must_have
  lighting:
    energy_profile:
      mode: consumer
      min_power: 0
      max_power: 500
      typical_power: 200
      power_variation: 0.0
    relay_behavior: controllable
    priority: nice_to_have
circuits:
  - id: main_hvac
    name: "HVAC"
    template: hvac
    tabs: [1]
  - id: house_lights
    name: "Lights"
    template: lighting
    tabs: [2]
"#;
        let value: serde_yaml::Value = serde_yaml::from_str(yaml).unwrap();
        SimulationConfig::from_yaml_value(value).unwrap()
    }

    #[test]
    fn panel_power_equals_sum_of_real_circuit_power() {
        let engine = SimulationEngine::new(two_circuit_config()).unwrap();
        let tick = engine.tick();
        let sum: f64 = tick.circuits.values().filter(|c| !c.is_virtual).map(|c| c.power_w).sum();
        assert!((tick.grid_power_w - sum).abs() < 1e-9);
    }

    #[test]
    fn panel_energy_totals_equal_sum_of_real_circuit_energy_across_multiple_ticks() {
        let engine = SimulationEngine::new(two_circuit_config()).unwrap();
        for _ in 0..2 {
            let tick = engine.tick();
            let produced_sum: f64 = tick.circuits.values().filter(|c| !c.is_virtual).map(|c| c.produced_wh).sum();
            let consumed_sum: f64 = tick.circuits.values().filter(|c| !c.is_virtual).map(|c| c.consumed_wh).sum();
            assert!((tick.main_produced_wh - produced_sum).abs() < 1e-9);
            assert!((tick.main_consumed_wh - consumed_sum).abs() < 1e-9);
            engine.cache.invalidate(FULL_SIM_DATA_KEY);
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
    }

    #[test]
    fn relay_open_forces_zero_power_next_tick() {
        let engine = SimulationEngine::new(two_circuit_config()).unwrap();
        let _ = engine.tick();
        engine.set_circuit_relay("main_hvac", true).unwrap();
        let tick = engine.tick();
        let hvac = tick.circuits.get("main_hvac").unwrap();
        assert_eq!(hvac.power_w, 0.0);
        assert_eq!(hvac.relay_state, RelayState::Open);
    }

    #[test]
    fn power_override_bypasses_behavior_engine() {
        let engine = SimulationEngine::new(two_circuit_config()).unwrap();
        engine.set_circuit_power_override("main_hvac", 1234.0);
        let tick = engine.tick();
        assert_eq!(tick.circuits.get("main_hvac").unwrap().power_w, 1234.0);
        engine.clear_circuit_override("main_hvac");
        let tick = engine.tick();
        assert_eq!(tick.circuits.get("main_hvac").unwrap().power_w, 2500.0);
    }

    #[test]
    fn unmapped_tabs_are_synthesized_and_marked_virtual() {
        let engine = SimulationEngine::new(two_circuit_config()).unwrap();
        let tick = engine.tick();
        assert!(tick.circuits.contains_key("unmapped_tab_3"));
        assert!(tick.circuits.contains_key("unmapped_tab_4"));
        assert!(tick.circuits.get("unmapped_tab_3").unwrap().is_virtual);
    }

    #[test]
    fn energy_counters_are_monotonically_non_decreasing() {
        let engine = SimulationEngine::new(two_circuit_config()).unwrap();
        let first = engine.tick();
        engine.cache.invalidate(FULL_SIM_DATA_KEY);
        std::thread::sleep(std::time::Duration::from_millis(5));
        let second = engine.tick();
        let a = first.circuits.get("main_hvac").unwrap();
        let b = second.circuits.get("main_hvac").unwrap();
        assert!(b.consumed_wh >= a.consumed_wh);
        assert!(b.produced_wh >= a.produced_wh);
    }

    #[test]
    fn split_phase_tab_sync_splits_equally() {
        let yaml = r#"
panel_config:
  serial_number: "PAN-1"
  total_tabs: 40
  main_size: 200
circuit_templates:
  ev:
    energy_profile:
      mode: consumer
      min_power: 0
      max_power: 8000
      typical_power: 7200
      power_variation: 0.0
    relay_behavior: controllable
    priority: discretionary
circuits:
  - id: circuit_on_33
    name: "EV Leg A"
    template: ev
    tabs: [33]
  - id: circuit_on_35
    name: "EV Leg B"
    template: ev
    tabs: [35]
tab_synchronizations:
  - tabs: [33, 35]
    behavior: "240v_split_phase"
    power_split: equal
    template: ev
"#;
        let value: serde_yaml::Value = serde_yaml::from_str(yaml).unwrap();
        let config = SimulationConfig::from_yaml_value(value).unwrap();
        let engine = SimulationEngine::new(config).unwrap();
        let tick = engine.tick();
        let a = tick.circuits.get("circuit_on_33").unwrap().power_w;
        let b = tick.circuits.get("circuit_on_35").unwrap().power_w;
        assert!((a - b).abs() < 1e-9);
        assert!((a + b - 7200.0).abs() < 1e-9);
    }
}
