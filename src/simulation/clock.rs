//! Simulation clock: real wall-clock, or a configured start-time offset
//! combined with an acceleration factor.

use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use parking_lot::Mutex;

use crate::error::{PanelError, Result};
use crate::simulation::config::SimulationTimeConfig;

struct ClockState {
    offset_secs: f64,
    acceleration: f64,
    enabled: bool,
    /// An override requested before `init` ran; applied once `init` runs.
    pending_start_time: Option<String>,
}

/// Produces "now" for the simulation engine. With simulated time disabled
/// this is just `Local::now()`; enabled, it applies a fixed offset scaled by
/// an acceleration factor.
pub struct SimulationClock {
    state: Mutex<ClockState>,
}

impl Default for SimulationClock {
    fn default() -> Self {
        Self {
            state: Mutex::new(ClockState {
                offset_secs: 0.0,
                acceleration: 1.0,
                enabled: false,
                pending_start_time: None,
            }),
        }
    }
}

impl SimulationClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a configuration block at startup. A stashed runtime override
    /// (from `set_start_time` called before `init`) takes precedence.
    pub fn init(&self, config: Option<&SimulationTimeConfig>) -> Result<()> {
        let pending = { self.state.lock().pending_start_time.clone() };
        if let Some(start) = pending {
            return self.set_start_time(&start, config.map(|c| c.acceleration).unwrap_or(1.0));
        }
        let Some(config) = config else { return Ok(()) };
        if !config.enabled {
            return Ok(());
        }
        let Some(start) = &config.start_time else { return Ok(()) };
        self.set_start_time(start, config.acceleration)
    }

    /// Parse `start_time` (a local datetime, optional trailing `Z`) and
    /// store the offset from now. Parse failure is a hard `SimulationConfig`
    /// error at init time.
    fn set_start_time(&self, start_time: &str, acceleration: f64) -> Result<()> {
        let parsed = parse_local_datetime(start_time)
            .ok_or_else(|| PanelError::SimulationConfig(format!("invalid simulation start_time: {start_time}")))?;
        let now = Local::now();
        let offset_secs = (parsed - now.naive_local()).num_milliseconds() as f64 / 1000.0;
        let mut state = self.state.lock();
        state.offset_secs = offset_secs;
        state.acceleration = acceleration;
        state.enabled = true;
        state.pending_start_time = None;
        Ok(())
    }

    /// Runtime override of the start time. If parsing fails, simulation-time
    /// mode is disabled and the clock falls back to real now (it does not
    /// surface an error, since a live override is a best-effort adjustment).
    /// If called before `init`, the value is stashed and applied at `init`.
    pub fn set_start_time_override(&self, start_time: &str) {
        match parse_local_datetime(start_time) {
            Some(parsed) => {
                let now = Local::now();
                let offset_secs = (parsed - now.naive_local()).num_milliseconds() as f64 / 1000.0;
                let mut state = self.state.lock();
                state.offset_secs = offset_secs;
                state.enabled = true;
                state.pending_start_time = None;
            }
            None => {
                let mut state = self.state.lock();
                state.enabled = false;
            }
        }
    }

    /// Stash an override to be applied once `init` runs.
    pub fn stash_override(&self, start_time: impl Into<String>) {
        self.state.lock().pending_start_time = Some(start_time.into());
    }

    pub fn now(&self) -> DateTime<Local> {
        let state = self.state.lock();
        if !state.enabled {
            return Local::now();
        }
        let real_now = Local::now();
        let shift_secs = state.offset_secs * state.acceleration;
        real_now + chrono::Duration::milliseconds((shift_secs * 1000.0) as i64)
    }
}

fn parse_local_datetime(s: &str) -> Option<NaiveDateTime> {
    let trimmed = s.strip_suffix('Z').unwrap_or(s);
    NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S"))
        .ok()
}

#[allow(dead_code)]
fn to_local(naive: NaiveDateTime) -> DateTime<Local> {
    Local.from_local_datetime(&naive).single().unwrap_or_else(|| Local::now())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_clock_tracks_real_now() {
        let clock = SimulationClock::new();
        let before = Local::now();
        let now = clock.now();
        let after = Local::now();
        assert!(now >= before && now <= after);
    }

    #[test]
    fn invalid_start_time_is_rejected_at_init() {
        let clock = SimulationClock::new();
        let config = SimulationTimeConfig { enabled: true, start_time: Some("not-a-date".into()), acceleration: 1.0 };
        assert!(clock.init(Some(&config)).is_err());
    }

    #[test]
    fn valid_start_time_shifts_now() {
        let clock = SimulationClock::new();
        let future = (Local::now() + chrono::Duration::days(1)).format("%Y-%m-%dT%H:%M:%S").to_string();
        let config = SimulationTimeConfig { enabled: true, start_time: Some(future), acceleration: 1.0 };
        clock.init(Some(&config)).unwrap();
        let shifted = clock.now();
        assert!(shifted > Local::now() + chrono::Duration::hours(23));
    }

    #[test]
    fn runtime_override_parse_failure_disables_simulated_time() {
        let clock = SimulationClock::new();
        let future = (Local::now() + chrono::Duration::days(1)).format("%Y-%m-%dT%H:%M:%S").to_string();
        let config = SimulationTimeConfig { enabled: true, start_time: Some(future), acceleration: 1.0 };
        clock.init(Some(&config)).unwrap();
        clock.set_start_time_override("garbage");
        let before = Local::now();
        let now = clock.now();
        assert!(now >= before);
    }

    #[test]
    fn override_before_init_is_stashed_and_applied() {
        let clock = SimulationClock::new();
        let future = (Local::now() + chrono::Duration::days(2)).format("%Y-%m-%dT%H:%M:%S").to_string();
        clock.stash_override(future);
        clock.init(None).unwrap();
        let shifted = clock.now();
        assert!(shifted > Local::now() + chrono::Duration::hours(47));
    }
}
