// panel-client: end-to-end scenarios from the testable-properties list.
//
// These exercise the simulation engine and Gen2 client together, the same
// way an application would: no real panel required, since simulation mode
// intercepts every Gen2 operation and routes it to the deterministic engine.

use panel_client::gen2::{Gen2Client, Gen2ClientOptions};
use panel_client::simulation::SimulationConfig;
use panel_client::PanelError;
use std::time::Duration;

fn sim_client(yaml: &str) -> Gen2Client {
    let config = SimulationConfig::from_str(yaml).unwrap();
    let options = Gen2ClientOptions {
        simulation_config: Some(config),
        cache_ttl: Duration::from_millis(50),
        ..Gen2ClientOptions::default()
    };
    Gen2Client::new(options).unwrap()
}

const TWO_CIRCUIT_YAML: &str = r#"
panel_config:
  serial_number: "PAN-1"
  total_tabs: 2
  main_size: 100
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

/// S1: two consumer circuits, panel grid power equals their exact sum.
#[tokio::test]
async fn s1_panel_power_equals_sum_of_circuit_power() {
    let client = sim_client(TWO_CIRCUIT_YAML);
    let circuits = client.get_circuits().await.unwrap();
    let panel = client.get_panel_state().await.unwrap();

    let hvac = &circuits.circuits["main_hvac"];
    let lights = &circuits.circuits["house_lights"];
    assert!(hvac.instant_power_w > 0.0);
    assert!(lights.instant_power_w > 0.0);
    assert!((panel.instant_grid_power_w - (hvac.instant_power_w + lights.instant_power_w)).abs() < 1e-6);
    assert!(panel.instant_grid_power_w >= 100.0);
}

/// S2: opening a relay zeroes its power immediately and leaves the other
/// circuit's energy counters monotone.
#[tokio::test]
async fn s2_relay_open_zeroes_power_and_preserves_other_circuit_energy() {
    let client = sim_client(TWO_CIRCUIT_YAML);
    let before = client.get_circuits().await.unwrap();
    let lights_before = before.circuits["house_lights"].consumed_energy_wh;

    client.set_circuit_relay("main_hvac", "OPEN").await.unwrap();
    tokio::time::sleep(Duration::from_millis(60)).await;

    let after = client.get_circuits().await.unwrap();
    let hvac_after = &after.circuits["main_hvac"];
    assert_eq!(hvac_after.instant_power_w, 0.0);
    assert_eq!(hvac_after.relay_state, "OPEN");
    assert!(after.circuits["house_lights"].consumed_energy_wh >= lights_before);
}

/// S3: a power override bypasses the behavior engine; clearing it restores
/// behavior-driven power within the template's range.
#[tokio::test]
async fn s3_power_override_bypasses_behavior_then_clears() {
    let client = sim_client(TWO_CIRCUIT_YAML);
    client.set_circuit_power_override("main_hvac", 1234.0).unwrap();
    tokio::time::sleep(Duration::from_millis(60)).await;
    let overridden = client.get_circuits().await.unwrap();
    assert_eq!(overridden.circuits["main_hvac"].instant_power_w, 1234.0);

    client.clear_circuit_overrides("main_hvac").unwrap();
    tokio::time::sleep(Duration::from_millis(60)).await;
    let cleared = client.get_circuits().await.unwrap();
    let power = cleared.circuits["main_hvac"].instant_power_w;
    assert!((0.0..=4000.0).contains(&power));
    assert_ne!(power, 1234.0);
}

/// S5: a 4-tab panel with circuits on tabs 1-2 synthesizes unmapped circuits
/// for tabs 3-4, flagged as not user-controllable.
#[tokio::test]
async fn s5_unmapped_tabs_are_synthesized_with_correct_shape() {
    let yaml = r#"
panel_config:
  serial_number: "PAN-1"
  total_tabs: 4
  main_size: 100
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
circuits:
  - id: main_hvac
    name: "HVAC"
    template: hvac
    tabs: [1]
"#;
    let client = sim_client(yaml);
    let circuits = client.get_circuits().await.unwrap();

    let tab3 = &circuits.circuits["unmapped_tab_3"];
    assert_eq!(tab3.tabs, vec![3]);
    assert!(!tab3.is_user_controllable);
    assert_eq!(tab3.relay_state, "UNKNOWN");

    let tab4 = &circuits.circuits["unmapped_tab_4"];
    assert_eq!(tab4.tabs, vec![4]);
    assert!(!tab4.is_user_controllable);
}

/// S6: a split-phase tab sync distributes aggregate power across its two
/// tabs with the `equal` rule, within noise tolerance of each other.
#[tokio::test]
async fn s6_split_phase_sync_shares_power_equally() {
    let yaml = r#"
panel_config:
  serial_number: "PAN-1"
  total_tabs: 36
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
    let client = sim_client(yaml);
    let circuits = client.get_circuits().await.unwrap();
    let a = circuits.circuits["circuit_on_33"].instant_power_w;
    let b = circuits.circuits["circuit_on_35"].instant_power_w;
    assert!((a - b).abs() < 1e-6);
    assert!((a + b - 7200.0).abs() < 1e-6);
}

/// Overrides and relay control are simulation-only; a non-simulation client
/// surfaces ApiError rather than silently no-oping.
#[tokio::test]
async fn overrides_outside_simulation_mode_surface_api_error() {
    let client = Gen2Client::new(Gen2ClientOptions::default()).unwrap();
    let err = client.set_circuit_power_override("main_hvac", 100.0).unwrap_err();
    assert!(matches!(err, PanelError::ApiError { .. }));
}

/// Circuits report auth errors (never retried) and no request succeeds
/// without a token first having been set or supplied at construction.
#[tokio::test]
async fn real_transport_requires_auth_for_protected_reads() {
    let client = Gen2Client::new(Gen2ClientOptions { host: "127.0.0.1".into(), port: 1, ..Gen2ClientOptions::default() }).unwrap();
    let err = client.get_panel_state().await.unwrap_err();
    assert!(matches!(err, PanelError::Auth(_)));
}
