//! Auth-aware HTTP client for the Gen2 REST API.
//!
//! Holds one `reqwest::Client` for the entire client lifetime. Acquiring a
//! bearer token only swaps the value behind a `RwLock`; the connection pool
//! underneath is never recreated, so no in-flight async scope is ever
//! invalidated by an auth upgrade.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;

use crate::cache::TimeWindowCache;
use crate::error::{PanelError, Result};
use crate::gen2::types::{
    AuthRequest, AuthResponse, CircuitPriority, CircuitResponse, CircuitsResponse, PanelStateResponse, RelayStateIn,
    SetCircuitPriorityRequest, SetCircuitRelayRequest, StatusResponse, StorageSoeResponse,
};
use crate::retry::{RetryDriver, RetryPolicy};
use crate::simulation::{SimulationConfig, SimulationEngine};
use crate::snapshot::{CircuitSnapshot, PanelCapability, PanelGeneration, PanelSnapshot};

/// Options used to build a [`Gen2Client`].
#[derive(Clone)]
pub struct Gen2ClientOptions {
    pub host: String,
    pub port: u16,
    pub use_ssl: bool,
    pub timeout: Duration,
    pub cache_ttl: Duration,
    pub retry_policy: RetryPolicy,
    pub initial_token: Option<String>,
    pub simulation_config: Option<SimulationConfig>,
}

impl Default for Gen2ClientOptions {
    fn default() -> Self {
        Self {
            host: "span.local".into(),
            port: 80,
            use_ssl: false,
            timeout: Duration::from_secs(30),
            cache_ttl: Duration::from_secs(5),
            retry_policy: RetryPolicy::default(),
            initial_token: None,
            simulation_config: None,
        }
    }
}

/// A type-safe cache payload (rather than `Any`): every cacheable Gen2
/// operation has its own variant.
#[derive(Clone)]
enum CachedResponse {
    Status(StatusResponse),
    PanelState(PanelStateResponse),
    Circuits(CircuitsResponse),
    Soe(StorageSoeResponse),
}

const KEY_STATUS: &str = "status";
const KEY_PANEL_STATE: &str = "panel_state";
const KEY_CIRCUITS: &str = "circuits";
const KEY_SOE: &str = "soe";

pub struct Gen2Client {
    http: reqwest::Client,
    base_url: String,
    token: Arc<RwLock<Option<String>>>,
    retry: RetryDriver,
    cache: TimeWindowCache<CachedResponse>,
    simulation: Option<Arc<SimulationEngine>>,
}

impl Gen2Client {
    pub fn new(options: Gen2ClientOptions) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(options.timeout).build()?;
        let scheme = if options.use_ssl { "https" } else { "http" };
        let base_url = format!("{scheme}://{}:{}", options.host, options.port);
        let simulation = match options.simulation_config {
            Some(config) => Some(Arc::new(SimulationEngine::new(config)?)),
            None => None,
        };
        Ok(Self {
            http,
            base_url,
            token: Arc::new(RwLock::new(options.initial_token)),
            retry: RetryDriver::new(options.retry_policy),
            cache: TimeWindowCache::new(options.cache_ttl)?,
            simulation,
        })
    }

    pub fn is_simulation(&self) -> bool {
        self.simulation.is_some()
    }

    /// Gen2 exposes everything except push-streaming, per spec §4.9.
    pub fn capabilities(&self) -> PanelCapability {
        PanelCapability::GEN2_FULL
    }

    /// Builds a transport-agnostic snapshot from the status, panel state,
    /// circuits, and SOE reads, going through the same caching/auth/retry
    /// path as calling each operation directly.
    pub async fn get_snapshot(&self) -> Result<PanelSnapshot> {
        let status = self.get_status().await?;
        let panel_state = self.get_panel_state().await?;
        let circuits_resp = self.get_circuits().await?;
        let soe = self.get_storage_soe().await.ok();

        let serial_number = status
            .system
            .get("serialNumber")
            .or_else(|| status.system.get("serial_number"))
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let firmware_version = status
            .system
            .get("firmwareVersion")
            .or_else(|| status.system.get("firmware_version"))
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        let circuits = circuits_resp
            .circuits
            .into_iter()
            .map(|(id, c)| {
                (
                    id.clone(),
                    CircuitSnapshot {
                        circuit_id: id,
                        name: c.name,
                        power_w: c.instant_power_w,
                        voltage_v: 0.0,
                        current_a: 0.0,
                        is_on: c.relay_state != "OPEN",
                        relay_state: Some(c.relay_state),
                        priority: c.priority,
                        tabs: Some(c.tabs),
                        energy_produced_wh: Some(c.produced_energy_wh),
                        energy_consumed_wh: Some(c.consumed_energy_wh),
                        apparent_power_va: None,
                        reactive_power_var: None,
                        frequency_hz: None,
                        power_factor: None,
                        is_dual_phase: false,
                    },
                )
            })
            .collect();

        Ok(PanelSnapshot {
            generation: PanelGeneration::Gen2,
            serial_number,
            firmware_version,
            circuits,
            main_power_w: panel_state.instant_grid_power_w,
            main_relay_state: Some(panel_state.main_relay_state),
            grid_power_w: Some(panel_state.instant_grid_power_w),
            battery_soe: soe.map(|s| s.percentage),
            dsm_state: panel_state.dsm_state,
            dsm_grid_state: panel_state.dsm_grid_state,
            main_voltage_v: None,
            main_current_a: None,
            main_frequency_hz: None,
        })
    }

    fn token(&self) -> Option<String> {
        self.token.read().clone()
    }

    /// Mutates the header store in place; the underlying connection pool
    /// and `reqwest::Client` are untouched.
    pub fn set_access_token(&self, token: Option<String>) {
        *self.token.write() = token;
    }

    fn require_auth(&self) -> Result<String> {
        self.token().ok_or_else(|| PanelError::Auth("no access token set".into()))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, require_auth: bool) -> Result<T> {
        if require_auth {
            self.require_auth()?;
        }
        let url = format!("{}{}", self.base_url, path);
        self.retry
            .run(|| {
                let url = url.clone();
                async move {
                    let token = self.token();
                    let mut req = self.http.get(&url);
                    if let Some(token) = token {
                        req = req.bearer_auth(token);
                    }
                    let resp = req.send().await?;
                    let status = resp.status();
                    if !status.is_success() {
                        let body = resp.text().await.unwrap_or_default();
                        return Err(PanelError::from_status(status.as_u16(), body));
                    }
                    Ok(resp.json::<T>().await?)
                }
            })
            .await
    }

    async fn post_json<B: serde::Serialize + Sync, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
        require_auth: bool,
    ) -> Result<T> {
        if require_auth {
            self.require_auth()?;
        }
        let url = format!("{}{}", self.base_url, path);
        self.retry
            .run(|| {
                let url = url.clone();
                async move {
                    let token = self.token();
                    let mut req = self.http.post(&url).json(body);
                    if let Some(token) = token {
                        req = req.bearer_auth(token);
                    }
                    let resp = req.send().await?;
                    let status = resp.status();
                    if !status.is_success() {
                        let text = resp.text().await.unwrap_or_default();
                        return Err(PanelError::from_status(status.as_u16(), text));
                    }
                    Ok(resp.json::<T>().await?)
                }
            })
            .await
    }

    pub async fn authenticate(&self, name: &str, description: &str) -> Result<String> {
        let body = AuthRequest { name: name.to_string(), description: description.to_string() };
        let resp: AuthResponse = self.post_json("/api/v1/auth/register", &body, false).await?;
        self.set_access_token(Some(resp.access_token.clone()));
        Ok(resp.access_token)
    }

    /// Probes reachability without surfacing transport errors — used by
    /// generation auto-detection, which tries Gen2 before falling back to
    /// Gen3.
    pub async fn ping(&self) -> bool {
        self.get_status().await.is_ok()
    }

    pub async fn get_status(&self) -> Result<StatusResponse> {
        if let Some(sim) = &self.simulation {
            return Ok(self.simulated_status(sim));
        }
        if let Some(CachedResponse::Status(s)) = self.cache.get(KEY_STATUS) {
            return Ok(s);
        }
        let resp: StatusResponse = self.get_json("/api/v1/status", false).await?;
        self.cache.set(KEY_STATUS, CachedResponse::Status(resp.clone()));
        Ok(resp)
    }

    pub async fn get_panel_state(&self) -> Result<PanelStateResponse> {
        if let Some(sim) = &self.simulation {
            return Ok(self.simulated_panel_state(sim));
        }
        if let Some(CachedResponse::PanelState(s)) = self.cache.get(KEY_PANEL_STATE) {
            return Ok(s);
        }
        let resp: PanelStateResponse = self.get_json("/api/v1/panel", true).await?;
        self.cache.set(KEY_PANEL_STATE, CachedResponse::PanelState(resp.clone()));
        Ok(resp)
    }

    /// Returns the real circuit map augmented with a synthetic circuit for
    /// every branch whose tab is not referenced by any real circuit.
    pub async fn get_circuits(&self) -> Result<CircuitsResponse> {
        if let Some(sim) = &self.simulation {
            return Ok(self.simulated_circuits(sim));
        }
        if let Some(CachedResponse::Circuits(c)) = self.cache.get(KEY_CIRCUITS) {
            return Ok(c);
        }
        let mut resp: CircuitsResponse = self.get_json("/api/v1/circuits", true).await?;
        let panel_state = self.get_panel_state().await?;
        let mapped_tabs: std::collections::HashSet<u32> =
            resp.circuits.values().flat_map(|c| c.tabs.iter().copied()).collect();
        for branch in &panel_state.branches {
            if mapped_tabs.contains(&branch.id) {
                continue;
            }
            let id = format!("unmapped_tab_{}", branch.id);
            resp.circuits.insert(
                id.clone(),
                CircuitResponse {
                    id,
                    name: format!("Unmapped Tab {}", branch.id),
                    relay_state: "UNKNOWN".into(),
                    priority: None,
                    instant_power_w: branch.instant_power_w,
                    tabs: vec![branch.id],
                    produced_energy_wh: 0.0,
                    consumed_energy_wh: 0.0,
                    is_user_controllable: false,
                },
            );
        }
        self.cache.set(KEY_CIRCUITS, CachedResponse::Circuits(resp.clone()));
        Ok(resp)
    }

    pub async fn get_storage_soe(&self) -> Result<StorageSoeResponse> {
        if let Some(sim) = &self.simulation {
            return Ok(StorageSoeResponse { percentage: sim.tick().soe_percent });
        }
        if let Some(CachedResponse::Soe(s)) = self.cache.get(KEY_SOE) {
            return Ok(s);
        }
        let resp: StorageSoeResponse = self.get_json("/api/v1/storage/soe", true).await?;
        self.cache.set(KEY_SOE, CachedResponse::Soe(resp.clone()));
        Ok(resp)
    }

    fn invalidate_circuit_caches(&self) {
        self.cache.invalidate(KEY_CIRCUITS);
        self.cache.invalidate(KEY_PANEL_STATE);
    }

    pub async fn set_circuit_relay(&self, circuit_id: &str, relay_state: &str) -> Result<()> {
        let parsed = RelayStateIn::parse(relay_state)?;
        if let Some(sim) = &self.simulation {
            sim.set_circuit_relay(circuit_id, parsed == RelayStateIn::Open)?;
            self.invalidate_circuit_caches();
            return Ok(());
        }
        let body = SetCircuitRelayRequest { relay_state_in: parsed.as_wire().to_string() };
        let path = format!("/api/v1/circuits/{circuit_id}");
        let _: serde_json::Value = self.post_json(&path, &body, true).await?;
        self.invalidate_circuit_caches();
        Ok(())
    }

    pub async fn set_circuit_priority(&self, circuit_id: &str, priority: &str) -> Result<()> {
        let parsed = CircuitPriority::parse(priority)?;
        if self.simulation.is_some() {
            return Err(PanelError::ApiError {
                status: None,
                message: "priority overrides are not supported in simulation mode".into(),
            });
        }
        let body = SetCircuitPriorityRequest { priority_in: parsed.as_wire().to_string() };
        let path = format!("/api/v1/circuits/{circuit_id}");
        let _: serde_json::Value = self.post_json(&path, &body, true).await?;
        self.invalidate_circuit_caches();
        Ok(())
    }

    /// Only available in simulation mode; surfaces `ApiError` otherwise.
    pub fn set_circuit_power_override(&self, circuit_id: &str, power_w: f64) -> Result<()> {
        let Some(sim) = &self.simulation else {
            return Err(PanelError::ApiError { status: None, message: "overrides require simulation mode".into() });
        };
        sim.set_circuit_power_override(circuit_id, power_w);
        self.invalidate_circuit_caches();
        Ok(())
    }

    pub fn clear_circuit_overrides(&self, circuit_id: &str) -> Result<()> {
        let Some(sim) = &self.simulation else {
            return Err(PanelError::ApiError { status: None, message: "overrides require simulation mode".into() });
        };
        sim.clear_circuit_override(circuit_id);
        self.invalidate_circuit_caches();
        Ok(())
    }

    pub fn set_global_power_multiplier(&self, multiplier: f64) -> Result<()> {
        let Some(sim) = &self.simulation else {
            return Err(PanelError::ApiError { status: None, message: "overrides require simulation mode".into() });
        };
        sim.set_global_power_multiplier(multiplier);
        self.invalidate_circuit_caches();
        Ok(())
    }

    fn simulated_status(&self, sim: &SimulationEngine) -> StatusResponse {
        let _ = sim.tick();
        StatusResponse {
            system: serde_json::json!({"manufacturer": "simulated", "doorState": "CLOSED"}),
            network: serde_json::json!({}),
            extra: HashMap::new(),
        }
    }

    fn simulated_panel_state(&self, sim: &SimulationEngine) -> PanelStateResponse {
        let tick = sim.tick();
        let mut branches: Vec<_> = tick
            .branch_power
            .iter()
            .map(|(tab, power)| crate::gen2::types::BranchReading {
                id: *tab,
                relay_state: "CLOSED".into(),
                instant_power_w: *power,
            })
            .collect();
        branches.sort_by_key(|b| b.id);
        PanelStateResponse {
            main_relay_state: "CLOSED".into(),
            instant_grid_power_w: tick.grid_power_w,
            branches,
            dsm_state: Some("DSM_ON_GRID".into()),
            dsm_grid_state: Some("PANEL_ON_GRID".into()),
            grid_sample_start_ms: None,
        }
    }

    fn simulated_circuits(&self, sim: &SimulationEngine) -> CircuitsResponse {
        let tick = sim.tick();
        let circuits = tick
            .circuits
            .values()
            .map(|c| {
                (
                    c.circuit_id.clone(),
                    CircuitResponse {
                        id: c.circuit_id.clone(),
                        name: c.name.clone(),
                        relay_state: if c.relay_state == crate::behavior::RelayState::Open { "OPEN".into() } else { "CLOSED".into() },
                        priority: Some(c.priority.clone()),
                        instant_power_w: c.power_w,
                        tabs: c.tabs.clone(),
                        produced_energy_wh: c.produced_wh,
                        consumed_energy_wh: c.consumed_wh,
                        is_user_controllable: !c.is_virtual,
                    },
                )
            })
            .collect();
        CircuitsResponse { circuits }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn options_for(server: &MockServer) -> Gen2ClientOptions {
        let url = server.uri();
        let without_scheme = url.trim_start_matches("http://");
        let (host, port) = without_scheme.split_once(':').unwrap();
        Gen2ClientOptions {
            host: host.to_string(),
            port: port.parse().unwrap(),
            use_ssl: false,
            timeout: Duration::from_secs(5),
            cache_ttl: Duration::from_millis(200),
            retry_policy: RetryPolicy { max_attempts: 0, ..RetryPolicy::default() },
            initial_token: None,
            simulation_config: None,
        }
    }

    #[tokio::test]
    async fn get_status_does_not_require_auth() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"system": {}, "network": {}})))
            .mount(&server)
            .await;
        let client = Gen2Client::new(options_for(&server)).unwrap();
        let status = client.get_status().await.unwrap();
        assert_eq!(status.system, serde_json::json!({}));
    }

    #[tokio::test]
    async fn get_panel_state_without_token_surfaces_auth_error() {
        let server = MockServer::start().await;
        let client = Gen2Client::new(options_for(&server)).unwrap();
        let err = client.get_panel_state().await.unwrap_err();
        assert!(matches!(err, PanelError::Auth(_)));
    }

    #[tokio::test]
    async fn authenticate_preserves_http_client_identity() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/auth/register"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"access_token": "tok123", "token_type": "bearer"})))
            .mount(&server)
            .await;
        let client = Gen2Client::new(options_for(&server)).unwrap();
        let before = format!("{:p}", &client.http);
        client.authenticate("app", "test").await.unwrap();
        let after = format!("{:p}", &client.http);
        assert_eq!(before, after);
        assert_eq!(client.token(), Some("tok123".to_string()));
    }

    #[tokio::test]
    async fn circuits_are_cached_within_ttl() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/circuits"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"circuits": {}})))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/panel"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "main_relay_state": "CLOSED",
                "instant_grid_power_w": 0.0,
                "branches": []
            })))
            .mount(&server)
            .await;
        let client = Gen2Client::new(options_for(&server)).unwrap();
        client.set_access_token(Some("tok".into()));
        let first = client.get_circuits().await.unwrap();
        let second = client.get_circuits().await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn simulation_mode_synthesizes_unmapped_tabs() {
        let yaml = r#"
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
circuits:
  - id: main_hvac
    name: "HVAC"
    template: hvac
    tabs: [1]
"#;
        let value: serde_yaml::Value = serde_yaml::from_str(yaml).unwrap();
        let config = SimulationConfig::from_yaml_value(value).unwrap();
        let server = MockServer::start().await;
        let mut opts = options_for(&server);
        opts.simulation_config = Some(config);
        let client = Gen2Client::new(opts).unwrap();
        let circuits = client.get_circuits().await.unwrap();
        assert!(circuits.circuits.contains_key("unmapped_tab_2"));
    }

    #[tokio::test]
    async fn snapshot_in_simulation_mode_carries_grid_power_and_circuits() {
        let yaml = r#"
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
circuits:
  - id: main_hvac
    name: "HVAC"
    template: hvac
    tabs: [1]
"#;
        let value: serde_yaml::Value = serde_yaml::from_str(yaml).unwrap();
        let config = SimulationConfig::from_yaml_value(value).unwrap();
        let server = MockServer::start().await;
        let mut opts = options_for(&server);
        opts.simulation_config = Some(config);
        let client = Gen2Client::new(opts).unwrap();
        let snapshot = client.get_snapshot().await.unwrap();
        assert_eq!(snapshot.generation, crate::snapshot::PanelGeneration::Gen2);
        assert!(snapshot.circuits.contains_key("main_hvac"));
        assert_eq!(snapshot.main_power_w, snapshot.grid_power_w.unwrap());
    }

    #[test]
    fn capabilities_exclude_push_streaming() {
        let server_opts = Gen2ClientOptions::default();
        let client = Gen2Client::new(server_opts).unwrap();
        assert!(!client.capabilities().contains(crate::snapshot::PanelCapability::PUSH_STREAMING));
        assert!(client.capabilities().contains(crate::snapshot::PanelCapability::RELAY_CONTROL));
    }
}
