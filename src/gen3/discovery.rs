//! Instance discovery: parses a `GetInstances` response into trait-instance
//! descriptors and builds the positional name/metric circuit topology.
//!
//! Trait 16 (circuit names) and trait 26 (power metrics, excluding the
//! fixed main-feed instance) are collected as two independent IID lists,
//! deduplicated and sorted ascending, then paired by position: the k-th
//! name instance and k-th metric instance belong to logical circuit `k+1`.
//! The offset between the two id spaces is never assumed — it varies by
//! panel model and firmware.

use std::collections::HashMap;

use crate::gen3::codec::{get_bytes, get_int, parse_fields};

pub const VENDOR_SPAN: u64 = 1;
pub const PRODUCT_GEN3_PANEL: u64 = 4;
pub const TRAIT_CIRCUIT_NAMES: u64 = 16;
pub const TRAIT_POWER_METRICS: u64 = 26;
pub const MAIN_FEED_IID: u64 = 1;

/// One circuit discovered via positional pairing.
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitInfo {
    pub circuit_id: u32,
    pub name: String,
    pub metric_iid: u64,
    pub name_iid: u64,
    pub is_dual_phase: bool,
}

/// The topology resolved from one `GetInstances` call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Topology {
    pub panel_resource_id: Option<String>,
    pub circuits: HashMap<u32, CircuitInfo>,
    pub metric_iid_to_circuit: HashMap<u64, u32>,
}

struct TraitDescriptor {
    vendor_id: u64,
    product_id: u64,
    trait_id: u64,
    instance_id: u64,
    resource_id: String,
}

/// Parse one `TraitInstanceDescriptor` entry: `{1: {2: {1: resource_id_msg,
/// 2: {1: {1: vendor, 2: product, 3: trait}, 2: {1: instance_id}}}}}`.
fn parse_descriptor(item_data: &[u8]) -> Option<TraitDescriptor> {
    let item_fields = parse_fields(item_data);
    let trait_info = get_bytes(&item_fields, 1)?;
    let trait_info_fields = parse_fields(trait_info);
    let external = get_bytes(&trait_info_fields, 2)?;
    let ext_fields = parse_fields(external);

    let resource_id = get_bytes(&ext_fields, 1)
        .map(|resource| {
            let rid_fields = parse_fields(resource);
            get_bytes(&rid_fields, 1).map(|b| String::from_utf8_lossy(b).into_owned()).unwrap_or_default()
        })
        .unwrap_or_default();

    let inner_info = get_bytes(&ext_fields, 2)?;
    let inner_fields = parse_fields(inner_info);
    let meta = get_bytes(&inner_fields, 1)?;
    let meta_fields = parse_fields(meta);
    let vendor_id = get_int(&meta_fields, 1, 0);
    let product_id = get_int(&meta_fields, 2, 0);
    let trait_id = get_int(&meta_fields, 3, 0);

    let instance_id = get_bytes(&inner_fields, 2)
        .map(|instance| {
            let iid_fields = parse_fields(instance);
            get_int(&iid_fields, 1, 0)
        })
        .unwrap_or(0);

    Some(TraitDescriptor { vendor_id, product_id, trait_id, instance_id, resource_id })
}

/// Parse a `GetInstances` response (field 1 repeated = descriptor list)
/// into the resolved circuit topology.
pub fn parse_instances(data: &[u8]) -> Topology {
    let fields = parse_fields(data);
    let mut panel_resource_id = None;
    let mut raw_name_iids: Vec<u64> = Vec::new();
    let mut raw_metric_iids: Vec<u64> = Vec::new();

    if let Some(items) = fields.get(&1) {
        for item in items {
            let Some(item_bytes) = item.as_bytes() else { continue };
            let Some(descriptor) = parse_descriptor(item_bytes) else { continue };

            if descriptor.product_id == PRODUCT_GEN3_PANEL && !descriptor.resource_id.is_empty() && panel_resource_id.is_none() {
                panel_resource_id = Some(descriptor.resource_id);
            }

            if descriptor.vendor_id != VENDOR_SPAN || descriptor.instance_id == 0 {
                continue;
            }

            if descriptor.trait_id == TRAIT_CIRCUIT_NAMES {
                raw_name_iids.push(descriptor.instance_id);
            } else if descriptor.trait_id == TRAIT_POWER_METRICS && descriptor.instance_id != MAIN_FEED_IID {
                raw_metric_iids.push(descriptor.instance_id);
            }
        }
    }

    let mut name_iids: Vec<u64> = raw_name_iids;
    name_iids.sort_unstable();
    name_iids.dedup();
    let mut metric_iids: Vec<u64> = raw_metric_iids;
    metric_iids.sort_unstable();
    metric_iids.dedup();

    let mut circuits = HashMap::new();
    let mut metric_iid_to_circuit = HashMap::new();
    for (idx, &metric_iid) in metric_iids.iter().enumerate() {
        let circuit_id = (idx + 1) as u32;
        let name_iid = name_iids.get(idx).copied().unwrap_or(0);
        circuits.insert(
            circuit_id,
            CircuitInfo { circuit_id, name: format!("Circuit {circuit_id}"), metric_iid, name_iid, is_dual_phase: false },
        );
        metric_iid_to_circuit.insert(metric_iid, circuit_id);
    }

    Topology { panel_resource_id, circuits, metric_iid_to_circuit }
}

/// Build a `GetRevisionRequest` body for fetching one circuit's display
/// name by its trait-16 instance id.
pub fn build_get_revision_request(vendor_id: u64, product_id: u64, trait_id: u64, instance_id: u64, panel_resource_id: &str) -> Vec<u8> {
    use crate::gen3::codec::{encode_bytes_field, encode_string_field, encode_varint_field};

    let mut meta = encode_varint_field(1, vendor_id);
    meta.extend(encode_varint_field(2, product_id));
    meta.extend(encode_varint_field(3, trait_id));
    meta.extend(encode_varint_field(4, 1));

    let resource_id_msg = encode_string_field(1, panel_resource_id);

    let iid_msg = encode_varint_field(1, instance_id);
    let mut instance_meta = encode_bytes_field(1, &resource_id_msg);
    instance_meta.extend(encode_bytes_field(2, &iid_msg));

    let req_metadata = encode_bytes_field(2, &resource_id_msg);
    let revision_request = encode_bytes_field(1, &req_metadata);

    let mut result = encode_bytes_field(1, &meta);
    result.extend(encode_bytes_field(2, &instance_meta));
    result.extend(encode_bytes_field(3, &revision_request));
    result
}

/// Parse a `GetRevision` response down to the circuit's display name,
/// nested at `{3: {2: {1: {4: name}}}}`.
pub fn parse_circuit_name(data: &[u8]) -> Option<String> {
    let fields = parse_fields(data);
    let sr = get_bytes(&fields, 3)?;
    let sr_fields = parse_fields(sr);
    let payload = get_bytes(&sr_fields, 2)?;
    let payload_fields = parse_fields(payload);
    let raw = get_bytes(&payload_fields, 1)?;
    let name_fields = parse_fields(raw);
    let name = get_bytes(&name_fields, 4)?;
    Some(String::from_utf8_lossy(name).trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gen3::codec::{encode_bytes_field, encode_string_field, encode_varint_field};

    fn descriptor_bytes(vendor: u64, product: u64, trait_id: u64, instance_id: u64, resource_id: &str) -> Vec<u8> {
        let meta = {
            let mut m = encode_varint_field(1, vendor);
            m.extend(encode_varint_field(2, product));
            m.extend(encode_varint_field(3, trait_id));
            m
        };
        let iid_msg = encode_bytes_field(1, &encode_varint_field(1, instance_id));
        let inner_info = {
            let mut i = encode_bytes_field(1, &meta);
            i.extend(&iid_msg);
            i
        };
        let resource_msg = encode_string_field(1, resource_id);
        let external = {
            let mut e = encode_bytes_field(1, &resource_msg);
            e.extend(encode_bytes_field(2, &inner_info));
            e
        };
        let trait_info = encode_bytes_field(2, &external);
        encode_bytes_field(1, &trait_info)
    }

    #[test]
    fn pairs_name_and_metric_instances_by_sorted_position() {
        let mut data = Vec::new();
        data.extend(encode_bytes_field(1, &descriptor_bytes(VENDOR_SPAN, 9, TRAIT_CIRCUIT_NAMES, 50, "")));
        data.extend(encode_bytes_field(1, &descriptor_bytes(VENDOR_SPAN, 9, TRAIT_CIRCUIT_NAMES, 30, "")));
        data.extend(encode_bytes_field(1, &descriptor_bytes(VENDOR_SPAN, 9, TRAIT_POWER_METRICS, 80, "")));
        data.extend(encode_bytes_field(1, &descriptor_bytes(VENDOR_SPAN, 9, TRAIT_POWER_METRICS, 60, "")));
        data.extend(encode_bytes_field(1, &descriptor_bytes(VENDOR_SPAN, 9, TRAIT_POWER_METRICS, MAIN_FEED_IID, "")));
        let topology = parse_instances(&data);
        assert_eq!(topology.circuits.len(), 2);
        let c1 = topology.circuits.get(&1).unwrap();
        assert_eq!(c1.metric_iid, 60);
        assert_eq!(c1.name_iid, 30);
        let c2 = topology.circuits.get(&2).unwrap();
        assert_eq!(c2.metric_iid, 80);
        assert_eq!(c2.name_iid, 50);
    }

    #[test]
    fn surplus_metric_iids_get_default_name_iid_zero() {
        let mut data = Vec::new();
        data.extend(encode_bytes_field(1, &descriptor_bytes(VENDOR_SPAN, 9, TRAIT_CIRCUIT_NAMES, 10, "")));
        data.extend(encode_bytes_field(1, &descriptor_bytes(VENDOR_SPAN, 9, TRAIT_POWER_METRICS, 20, "")));
        data.extend(encode_bytes_field(1, &descriptor_bytes(VENDOR_SPAN, 9, TRAIT_POWER_METRICS, 21, "")));
        let topology = parse_instances(&data);
        assert_eq!(topology.circuits.len(), 2);
        let unnamed = topology.circuits.values().find(|c| c.name_iid == 0).unwrap();
        assert!(unnamed.metric_iid == 20 || unnamed.metric_iid == 21);
    }

    #[test]
    fn captures_panel_resource_id_from_matching_product() {
        let data = encode_bytes_field(1, &descriptor_bytes(VENDOR_SPAN, PRODUCT_GEN3_PANEL, TRAIT_CIRCUIT_NAMES, 5, "res-123"));
        let topology = parse_instances(&data);
        assert_eq!(topology.panel_resource_id.as_deref(), Some("res-123"));
    }

    #[test]
    fn get_revision_request_round_trips_through_field_parser() {
        let request = build_get_revision_request(VENDOR_SPAN, PRODUCT_GEN3_PANEL, TRAIT_CIRCUIT_NAMES, 30, "res-1");
        let fields = parse_fields(&request);
        assert!(fields.contains_key(&1));
        assert!(fields.contains_key(&2));
        assert!(fields.contains_key(&3));
    }
}
