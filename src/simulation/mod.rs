//! The deterministic simulation engine: configuration, clock, per-tick
//! data generation, and application-driven overrides.

pub mod clock;
pub mod config;
pub mod engine;
pub mod overrides;

pub use config::SimulationConfig;
pub use engine::{CircuitTick, SimTickData, SimulationEngine};
pub use overrides::{CircuitOverride, OverrideTable};
