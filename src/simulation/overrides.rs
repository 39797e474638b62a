//! Application-driven override injection: per-circuit absolute values and
//! a global power multiplier, applied by the engine after behavior
//! computation.

use dashmap::DashMap;
use parking_lot::RwLock;

use crate::behavior::RelayState;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CircuitOverride {
    pub power_override: Option<f64>,
    pub relay_state: Option<RelayState>,
    pub priority: Option<String>,
}

impl CircuitOverride {
    fn merge(&mut self, other: CircuitOverride) {
        if other.power_override.is_some() {
            self.power_override = other.power_override;
        }
        if other.relay_state.is_some() {
            self.relay_state = other.relay_state;
        }
        if other.priority.is_some() {
            self.priority = other.priority;
        }
    }
}

/// Holds every live override. Only consulted in simulation mode.
pub struct OverrideTable {
    per_circuit: DashMap<String, CircuitOverride>,
    global_multiplier: RwLock<f64>,
}

impl Default for OverrideTable {
    fn default() -> Self {
        Self { per_circuit: DashMap::new(), global_multiplier: RwLock::new(1.0) }
    }
}

impl OverrideTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge `delta` into the existing override for `circuit_id`, leaving
    /// any field `delta` does not set untouched.
    pub fn set_circuit_override(&self, circuit_id: impl Into<String>, delta: CircuitOverride) {
        self.per_circuit.entry(circuit_id.into()).or_default().merge(delta);
    }

    pub fn set_relay_override(&self, circuit_id: impl Into<String>, relay_state: RelayState) {
        self.set_circuit_override(circuit_id, CircuitOverride { relay_state: Some(relay_state), ..Default::default() });
    }

    pub fn circuit_override(&self, circuit_id: &str) -> Option<CircuitOverride> {
        self.per_circuit.get(circuit_id).map(|e| e.clone())
    }

    pub fn clear_circuit_override(&self, circuit_id: &str) {
        self.per_circuit.remove(circuit_id);
    }

    pub fn clear_all(&self) {
        self.per_circuit.clear();
        *self.global_multiplier.write() = 1.0;
    }

    pub fn set_global_multiplier(&self, multiplier: f64) {
        *self.global_multiplier.write() = multiplier;
    }

    pub fn global_multiplier(&self) -> f64 {
        *self.global_multiplier.read()
    }
}
