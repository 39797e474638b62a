//! Stateless function mapping (circuit template, wall-clock, relay state,
//! per-circuit state) to an instantaneous power sample.

use std::borrow::Cow;
use std::f64::consts::PI;

use chrono::{DateTime, Local, Timelike};
use rand::Rng;

use crate::simulation::config::{BatteryProfile, CircuitTemplate, CyclingProfile, EnergyMode};

/// Relay position consulted before any other computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Open,
    Closed,
}

/// The subset of runtime state the engine threads through on every call:
/// when the simulation began, used as the epoch for cycling phase counters.
#[derive(Debug, Clone, Copy)]
pub struct BehaviorState {
    pub sim_start: DateTime<Local>,
}

/// 0 between 18:00 and 06:00; a normalized sine half-wave peaking at noon
/// otherwise. Used as the default producer curve when no explicit
/// time-of-day profile is configured.
fn default_solar_factor(hour: u8) -> f64 {
    if !(6..18).contains(&hour) {
        return 0.0;
    }
    let x = (hour as f64 - 6.0) / 12.0;
    (PI * x).sin().max(0.0)
}

/// Charging availability shaped like the solar curve: a battery charges
/// fastest when solar generation is near its peak.
fn solar_intensity(hour: u8) -> f64 {
    default_solar_factor(hour).max(0.05)
}

/// Discharge demand is heavier during the evening peak-usage window.
fn demand_factor(hour: u8) -> f64 {
    if (17..=21).contains(&hour) {
        1.0
    } else {
        0.6
    }
}

/// Fills in a cycling profile for common appliance name patterns when a
/// template declares none explicitly (no config present to say otherwise).
/// Never overrides an explicitly configured profile.
fn default_cycling_for_name(name: &str) -> Option<CyclingProfile> {
    let lower = name.to_lowercase();
    if lower.contains("refrigerator") || lower.contains("fridge") || lower.contains("freezer") {
        Some(CyclingProfile { on_minutes: 20.0, off_minutes: 40.0 })
    } else {
        None
    }
}

/// The entry point: maps (template, now, relay, rng, per-circuit state) to
/// a watt sample. Steps follow the seven-stage algorithm: relay gate, base
/// noise, time-of-day, cycling, smart-grid, battery, final clamp.
pub fn circuit_power(
    circuit_name: &str,
    template: &CircuitTemplate,
    now: DateTime<Local>,
    relay_state: RelayState,
    rng: &mut impl Rng,
    state: &BehaviorState,
) -> f64 {
    if relay_state == RelayState::Open {
        return 0.0;
    }

    let profile = &template.energy_profile;
    let variation = profile.power_variation;
    let noise = rng.gen_range((1.0 - variation)..=(1.0 + variation));
    let mut power = profile.typical_power * noise;

    let hour = now.hour() as u8;

    match &template.time_of_day {
        Some(tod) if tod.enabled => {
            if let Some(&factor) = tod.hour_factors.get(&hour) {
                power *= factor;
            } else if tod.peak_hours.contains(&hour) {
                power *= tod.peak_factor;
            }
            if profile.mode == EnergyMode::Producer {
                let listed = tod.hour_factors.contains_key(&hour) || tod.peak_hours.contains(&hour);
                if !listed {
                    power = 0.0;
                }
            }
        }
        None if profile.mode == EnergyMode::Producer => {
            power *= default_solar_factor(hour);
        }
        _ => {}
    }

    let cycling: Option<Cow<CyclingProfile>> = match &template.cycling {
        Some(c) => Some(Cow::Borrowed(c)),
        None => default_cycling_for_name(circuit_name).map(Cow::Owned),
    };
    if let Some(cycling) = cycling {
        let total = cycling.on_minutes + cycling.off_minutes;
        if total > 0.0 {
            let elapsed_minutes = (now - state.sim_start).num_milliseconds() as f64 / 60_000.0;
            let phase = elapsed_minutes.rem_euclid(total);
            if phase >= cycling.on_minutes {
                power = 0.0;
            }
        }
    }

    if let Some(sg) = &template.smart_grid {
        if hour >= sg.start_hour && hour < sg.end_hour {
            power *= 1.0 - sg.peak_reduction_factor;
        }
    }

    if let Some(battery) = &template.battery {
        power = apply_battery(battery, hour, power, rng);
    }

    profile.clamp(power)
}

fn apply_battery(battery: &BatteryProfile, hour: u8, base: f64, rng: &mut impl Rng) -> f64 {
    if !battery.enabled {
        return base;
    }
    if battery.charge_hours.contains(&hour) {
        return battery.max_charge.abs() * solar_intensity(hour);
    }
    if battery.discharge_hours.contains(&hour) {
        // Negative, matching the general producer/consumer sign convention:
        // a discharging battery feeds power back like a producer circuit.
        return -(battery.max_discharge.abs() * demand_factor(hour));
    }
    if battery.idle_hours.contains(&hour) {
        let (lo, hi) = battery.idle_power_range.unwrap_or((0.0, 0.0));
        // Normalize a mixed-sign range to [max(0,lo), |hi|] — preserved quirk.
        let norm_lo = lo.max(0.0);
        let norm_hi = hi.abs().max(norm_lo);
        return rng.gen_range(norm_lo..=norm_hi);
    }
    base * 0.10
}
