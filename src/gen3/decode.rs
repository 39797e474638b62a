//! Decoders for the three Gen3 metric layouts: single-phase, split-phase,
//! and main feed. Every leaf value is a min/max/avg sub-message; the
//! decoded `avg` is scaled to engineering units.

use crate::gen3::codec::{extract_deepest_value, get_bytes, parse_fields, parse_min_max_avg};

const BREAKER_OFF_VOLTAGE_MV: u64 = 5000;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CircuitMetrics {
    pub power_w: f64,
    pub voltage_v: f64,
    pub current_a: f64,
    pub apparent_power_va: f64,
    pub reactive_power_var: f64,
    pub frequency_hz: f64,
    pub power_factor: f64,
    pub is_on: bool,
    pub voltage_a_v: f64,
    pub voltage_b_v: f64,
    pub current_a_a: f64,
    pub current_b_a: f64,
}

fn avg_scaled(data: &[u8], scale: f64) -> f64 {
    parse_min_max_avg(data).avg as f64 / scale
}

/// Decode single-phase (120 V) metrics carried in field 11.
pub fn decode_single_phase(data: &[u8]) -> CircuitMetrics {
    let fields = parse_fields(data);
    let mut metrics = CircuitMetrics::default();

    if let Some(b) = get_bytes(&fields, 1) {
        metrics.current_a = avg_scaled(b, 1000.0);
    }
    if let Some(b) = get_bytes(&fields, 2) {
        metrics.voltage_v = avg_scaled(b, 1000.0);
    }
    if let Some(b) = get_bytes(&fields, 3) {
        metrics.power_w = avg_scaled(b, 2000.0);
    }
    if let Some(b) = get_bytes(&fields, 4) {
        metrics.apparent_power_va = avg_scaled(b, 2000.0);
    }
    if let Some(b) = get_bytes(&fields, 5) {
        metrics.reactive_power_var = avg_scaled(b, 2000.0);
    }

    metrics.is_on = (metrics.voltage_v * 1000.0) as u64 > BREAKER_OFF_VOLTAGE_MV;
    metrics
}

/// Decode split-phase (240 V) metrics: leg A in field 1, leg B in field 2,
/// a combined sub-message in field 3, frequency in field 4.
pub fn decode_dual_phase(data: &[u8]) -> CircuitMetrics {
    let fields = parse_fields(data);
    let mut metrics = CircuitMetrics::default();

    if let Some(leg_a) = get_bytes(&fields, 1) {
        let leg_a_fields = parse_fields(leg_a);
        if let Some(b) = get_bytes(&leg_a_fields, 1) {
            metrics.current_a_a = avg_scaled(b, 1000.0);
        }
        if let Some(b) = get_bytes(&leg_a_fields, 2) {
            metrics.voltage_a_v = avg_scaled(b, 1000.0);
        }
    }

    if let Some(leg_b) = get_bytes(&fields, 2) {
        let leg_b_fields = parse_fields(leg_b);
        if let Some(b) = get_bytes(&leg_b_fields, 1) {
            metrics.current_b_a = avg_scaled(b, 1000.0);
        }
        if let Some(b) = get_bytes(&leg_b_fields, 2) {
            metrics.voltage_b_v = avg_scaled(b, 1000.0);
        }
    }

    if let Some(combined) = get_bytes(&fields, 3) {
        let combined_fields = parse_fields(combined);
        if let Some(b) = get_bytes(&combined_fields, 2) {
            metrics.voltage_v = avg_scaled(b, 1000.0);
        }
        if let Some(b) = get_bytes(&combined_fields, 3) {
            metrics.power_w = avg_scaled(b, 2000.0);
        }
        if let Some(b) = get_bytes(&combined_fields, 4) {
            metrics.apparent_power_va = avg_scaled(b, 2000.0);
        }
        if let Some(b) = get_bytes(&combined_fields, 5) {
            metrics.reactive_power_var = avg_scaled(b, 2000.0);
        }
        if let Some(b) = get_bytes(&combined_fields, 6) {
            metrics.power_factor = avg_scaled(b, 2000.0);
        }
    }

    if let Some(b) = get_bytes(&fields, 4) {
        metrics.frequency_hz = avg_scaled(b, 1000.0);
    }

    metrics.current_a = metrics.current_a_a + metrics.current_b_a;
    metrics.is_on = (metrics.voltage_v * 1000.0) as u64 > BREAKER_OFF_VOLTAGE_MV;
    metrics
}

/// Decode the main feed, carried one level deeper than circuit metrics:
/// field 14 contains a container whose sub-field 1 is leg A, sub-field 2
/// is leg B. The main feed is always reported as on.
pub fn decode_main_feed(data: &[u8]) -> CircuitMetrics {
    let fields = parse_fields(data);
    let Some(main_data) = get_bytes(&fields, 14) else {
        return CircuitMetrics::default();
    };
    let main_fields = parse_fields(main_data);
    let mut metrics = CircuitMetrics::default();

    if let Some(leg_a) = get_bytes(&main_fields, 1) {
        let leg_a_fields = parse_fields(leg_a);
        if let Some(power_stats) = get_bytes(&leg_a_fields, 3) {
            metrics.power_w = extract_deepest_value(power_stats, 3) as f64 / 2000.0;
        }
        if let Some(voltage_stats) = get_bytes(&leg_a_fields, 2) {
            let vs_fields = parse_fields(voltage_stats);
            if let Some(inner) = get_bytes(&vs_fields, 2) {
                let inner_fields = parse_fields(inner);
                let v = crate::gen3::codec::get_int(&inner_fields, 3, 0);
                if v > 0 {
                    metrics.voltage_a_v = v as f64 / 1000.0;
                }
            }
        }
        if let Some(freq_stats) = get_bytes(&leg_a_fields, 4) {
            let freq_fields = parse_fields(freq_stats);
            let v = crate::gen3::codec::get_int(&freq_fields, 3, 0);
            if v > 0 {
                metrics.frequency_hz = v as f64 / 1000.0;
            }
        }
    }

    if let Some(leg_b) = get_bytes(&main_fields, 2) {
        let leg_b_fields = parse_fields(leg_b);
        if let Some(power_stats) = get_bytes(&leg_b_fields, 3) {
            let leg_b_power = extract_deepest_value(power_stats, 3) as f64 / 2000.0;
            if leg_b_power > 0.0 {
                metrics.power_w += leg_b_power;
            }
        }
        if let Some(voltage_stats) = get_bytes(&leg_b_fields, 2) {
            let vs_fields = parse_fields(voltage_stats);
            if let Some(inner) = get_bytes(&vs_fields, 2) {
                let inner_fields = parse_fields(inner);
                let v = crate::gen3::codec::get_int(&inner_fields, 3, 0);
                if v > 0 {
                    metrics.voltage_b_v = v as f64 / 1000.0;
                }
            }
        }
    }

    metrics.voltage_v =
        if metrics.voltage_b_v > 0.0 { metrics.voltage_a_v + metrics.voltage_b_v } else { metrics.voltage_a_v * 2.0 };
    if metrics.voltage_v > 0.0 {
        metrics.current_a = metrics.power_w / metrics.voltage_v;
    }
    metrics.is_on = true;
    metrics
}
