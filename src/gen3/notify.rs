//! Decodes one `Subscribe` stream frame (a `TraitInstanceNotification`) and
//! dispatches it to the appropriate metric decoder.
//!
//! Only trait `POWER_METRICS` (26) frames carry anything this client cares
//! about; everything else is ignored. Frame shape:
//! `{1: {2: {2: {1: {3: trait_id}, 2: {1: instance_id}}}}, 2: {3: [{3: [payload]}]}}`.

use crate::gen3::codec::{get_bytes, get_int, parse_fields};
use crate::gen3::decode::{decode_dual_phase, decode_main_feed, decode_single_phase, CircuitMetrics};
use crate::gen3::discovery::{MAIN_FEED_IID, TRAIT_POWER_METRICS};

/// The outcome of decoding one notification frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// Main-feed metrics (instance id 1).
    MainFeed(CircuitMetrics),
    /// A named circuit's metrics, keyed by its resolved metric instance id
    /// (callers map this back to a `circuit_id` via the topology).
    Circuit { metric_iid: u64, metrics: CircuitMetrics, is_dual_phase: bool },
    /// Frame did not carry `POWER_METRICS` data, or was structurally incomplete.
    Ignored,
}

fn notification_trait_and_instance(fields: &crate::gen3::codec::FieldMap) -> Option<(u64, u64)> {
    let rti = get_bytes(fields, 1)?;
    let rti_fields = parse_fields(rti);
    let ext = get_bytes(&rti_fields, 2)?;
    let ext_fields = parse_fields(ext);
    let info = get_bytes(&ext_fields, 2)?;
    let info_fields = parse_fields(info);
    let meta = get_bytes(&info_fields, 1)?;
    let meta_fields = parse_fields(meta);
    let trait_id = get_int(&meta_fields, 3, 0);
    let instance_id = get_bytes(&info_fields, 2)
        .map(|b| {
            let iid_fields = parse_fields(b);
            get_int(&iid_fields, 1, 0)
        })
        .unwrap_or(0);
    Some((trait_id, instance_id))
}

pub fn decode_notification(data: &[u8]) -> Notification {
    let fields = parse_fields(data);
    let Some((trait_id, instance_id)) = notification_trait_and_instance(&fields) else {
        return Notification::Ignored;
    };
    if trait_id != TRAIT_POWER_METRICS {
        return Notification::Ignored;
    }
    let Some(notify) = get_bytes(&fields, 2) else { return Notification::Ignored };
    let notify_fields = parse_fields(notify);

    let mut raw_payload: Option<&[u8]> = None;
    if let Some(metric_list) = notify_fields.get(&3) {
        for metric in metric_list {
            let Some(metric_bytes) = metric.as_bytes() else { continue };
            let ml_fields = parse_fields(metric_bytes);
            if let Some(payloads) = ml_fields.get(&3) {
                if let Some(first) = payloads.first().and_then(|v| v.as_bytes()) {
                    raw_payload = Some(first);
                    break;
                }
            }
        }
    }
    let Some(raw) = raw_payload else { return Notification::Ignored };

    if instance_id == MAIN_FEED_IID {
        return Notification::MainFeed(decode_main_feed(raw));
    }

    let top_fields = parse_fields(raw);
    if let Some(dual) = get_bytes(&top_fields, 12) {
        return Notification::Circuit { metric_iid: instance_id, metrics: decode_dual_phase(dual), is_dual_phase: true };
    }
    if let Some(single) = get_bytes(&top_fields, 11) {
        return Notification::Circuit { metric_iid: instance_id, metrics: decode_single_phase(single), is_dual_phase: false };
    }
    Notification::Ignored
}
