//! Gen3 streaming RPC client.
//!
//! Speaks the panel's `TraitHandlerService` directly: `tonic` supplies the
//! HTTP/2 channel and gRPC message framing, while every message body is
//! built and parsed by the hand-rolled codec in [`crate::gen3::codec`] (see
//! [`crate::gen3::raw_codec`] for how the two are bridged). No generated
//! protobuf stubs exist for this schema.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tonic::transport::{Channel, Endpoint};

use crate::error::{PanelError, Result};
use crate::gen3::decode::CircuitMetrics;
use crate::gen3::discovery::{self, Topology, MAIN_FEED_IID, PRODUCT_GEN3_PANEL, TRAIT_CIRCUIT_NAMES, VENDOR_SPAN};
use crate::gen3::notify::{decode_notification, Notification};
use crate::gen3::raw_codec::RawCodec;
use crate::snapshot::{CircuitSnapshot, PanelCapability, PanelGeneration, PanelSnapshot};

pub const DEFAULT_GRPC_PORT: u16 = 50065;
const SERVICE_PATH: &str = "/io.span.panel.protocols.traithandler.TraitHandlerService";
const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const PING_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct Gen3ClientOptions {
    pub host: String,
    pub port: u16,
}

impl Default for Gen3ClientOptions {
    fn default() -> Self {
        Self { host: "span.local".into(), port: DEFAULT_GRPC_PORT }
    }
}

fn method_path(method: &str) -> http::uri::PathAndQuery {
    format!("{SERVICE_PATH}/{method}").parse().expect("well-formed gRPC method path")
}

fn endpoint_for(host: &str, port: u16) -> Result<Endpoint> {
    Endpoint::from_shared(format!("http://{host}:{port}"))
        .map_err(|e| PanelError::Connection(format!("invalid Gen3 endpoint {host}:{port}: {e}")))
        .map(|ep| {
            ep.keep_alive_timeout(Duration::from_secs(10))
                .http2_keep_alive_interval(Duration::from_secs(30))
                .keep_alive_while_idle(true)
        })
}

/// Discovered topology plus the latest streamed metrics. Callbacks hold no
/// reference back into this — they are invoked after every update and may
/// independently call [`Gen3Client::get_snapshot`].
#[derive(Default)]
struct StreamedData {
    topology: Topology,
    metrics: HashMap<u32, CircuitMetrics>,
    main_feed: CircuitMetrics,
    serial: String,
    firmware: String,
}

type Callback = Arc<dyn Fn() + Send + Sync>;

pub struct Gen3Client {
    host: String,
    port: u16,
    channel: RwLock<Option<Channel>>,
    data: RwLock<StreamedData>,
    callbacks: Arc<RwLock<Vec<(u64, Callback)>>>,
    next_callback_id: AtomicU64,
    stream_task: RwLock<Option<tokio::task::JoinHandle<()>>>,
    connected: AtomicBool,
}

impl Gen3Client {
    pub fn new(options: Gen3ClientOptions) -> Self {
        Self {
            host: options.host,
            port: options.port,
            channel: RwLock::new(None),
            data: RwLock::new(StreamedData::default()),
            callbacks: Arc::new(RwLock::new(Vec::new())),
            next_callback_id: AtomicU64::new(0),
            stream_task: RwLock::new(None),
            connected: AtomicBool::new(false),
        }
    }

    pub fn capabilities(&self) -> PanelCapability {
        PanelCapability::GEN3_INITIAL
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn channel(&self) -> Result<Channel> {
        self.channel.read().clone().ok_or_else(|| PanelError::Connection("Gen3 channel is not open".into()))
    }

    /// Connects to the panel and performs initial circuit discovery:
    /// `GetInstances` for topology, then `GetRevision` per named circuit.
    pub async fn connect(&self) -> Result<()> {
        let channel = endpoint_for(&self.host, self.port)?.connect().await?;
        *self.channel.write() = Some(channel.clone());

        let instances = self.call_unary(&channel, "GetInstances", Vec::new()).await?;
        let mut topology = discovery::parse_instances(&instances);

        let panel_resource_id = topology.panel_resource_id.clone().unwrap_or_default();
        for info in topology.circuits.values_mut() {
            if info.name_iid == 0 {
                continue;
            }
            let request =
                discovery::build_get_revision_request(VENDOR_SPAN, PRODUCT_GEN3_PANEL, TRAIT_CIRCUIT_NAMES, info.name_iid, &panel_resource_id);
            match self.call_unary(&channel, "GetRevision", request).await {
                Ok(response) => {
                    if let Some(name) = discovery::parse_circuit_name(&response) {
                        info.name = name;
                    }
                }
                Err(err) => {
                    tracing::debug!(circuit_id = info.circuit_id, error = %err, "failed to fetch Gen3 circuit name");
                }
            }
        }

        let circuit_count = topology.circuits.len();
        self.data.write().topology = topology;
        self.connected.store(true, Ordering::SeqCst);
        tracing::info!(host = %self.host, port = self.port, circuits = circuit_count, "connected to Gen3 panel");
        Ok(())
    }

    pub async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.stop_streaming().await;
        *self.channel.write() = None;
    }

    async fn call_unary(&self, channel: &Channel, method: &str, body: Vec<u8>) -> Result<Vec<u8>> {
        let mut grpc = tonic::client::Grpc::new(channel.clone());
        grpc.ready().await.map_err(|e| PanelError::Connection(e.to_string()))?;
        let response = grpc.unary(tonic::Request::new(body), method_path(method), RawCodec).await?;
        Ok(response.into_inner())
    }

    async fn open_subscribe_stream(&self) -> Result<tonic::Streaming<Vec<u8>>> {
        let channel = self.channel()?;
        let mut grpc = tonic::client::Grpc::new(channel);
        grpc.ready().await.map_err(|e| PanelError::Connection(e.to_string()))?;
        let response = grpc.server_streaming(tonic::Request::new(Vec::new()), method_path("Subscribe"), RawCodec).await?;
        Ok(response.into_inner())
    }

    /// Opens a short-lived channel, issues one `GetInstances` with a 5 s
    /// timeout, and reports success iff the response is non-empty. Does not
    /// disturb any already-open long-lived channel.
    pub async fn ping(&self) -> bool {
        self.test_connection().await
    }

    pub async fn test_connection(&self) -> bool {
        let Ok(endpoint) = endpoint_for(&self.host, self.port) else { return false };
        let Ok(channel) = tokio::time::timeout(PING_TIMEOUT, endpoint.connect()).await else { return false };
        let Ok(channel) = channel else { return false };
        let probe = async {
            let mut grpc = tonic::client::Grpc::new(channel);
            grpc.ready().await.map_err(|e| PanelError::Connection(e.to_string()))?;
            let response = grpc.unary(tonic::Request::new(Vec::new()), method_path("GetInstances"), RawCodec).await?;
            Ok::<_, PanelError>(response.into_inner())
        };
        matches!(tokio::time::timeout(PING_TIMEOUT, probe).await, Ok(Ok(body)) if !body.is_empty())
    }

    /// Registers a callback invoked after every decoded streaming update.
    /// Returns an unregister closure. A panicking callback does not prevent
    /// the remaining callbacks from running.
    pub fn register_callback<F>(&self, callback: F) -> impl Fn() + Send + Sync
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = self.next_callback_id.fetch_add(1, Ordering::SeqCst);
        self.callbacks.write().push((id, Arc::new(callback)));
        let callbacks = Arc::clone(&self.callbacks);
        move || {
            callbacks.write().retain(|(existing, _)| *existing != id);
        }
    }

    fn notify_callbacks(&self) {
        let callbacks = self.callbacks.read().clone();
        for (_, cb) in callbacks {
            if std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| cb())).is_err() {
                tracing::warn!("Gen3 callback panicked, continuing with remaining callbacks");
            }
        }
    }

    /// Launches the background streaming task if one is not already running.
    pub async fn start_streaming(self: &Arc<Self>) {
        let mut task = self.stream_task.write();
        if task.as_ref().map(|h| !h.is_finished()).unwrap_or(false) {
            return;
        }
        let this = Arc::clone(self);
        *task = Some(tokio::spawn(async move { this.stream_loop().await }));
    }

    pub async fn stop_streaming(&self) {
        let handle = self.stream_task.write().take();
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
        }
    }

    async fn stream_loop(self: Arc<Self>) {
        while self.connected.load(Ordering::SeqCst) {
            match self.open_subscribe_stream().await {
                Ok(mut stream) => loop {
                    match stream.message().await {
                        Ok(Some(frame)) => self.dispatch_frame(&frame),
                        Ok(None) => break,
                        Err(err) => {
                            tracing::warn!(error = %err, "Gen3 stream error, reconnecting");
                            break;
                        }
                    }
                },
                Err(err) => {
                    tracing::warn!(error = %err, "Gen3 subscribe failed, reconnecting");
                }
            }
            if !self.connected.load(Ordering::SeqCst) {
                break;
            }
            tokio::time::sleep(RECONNECT_DELAY).await;
        }
    }

    fn dispatch_frame(&self, frame: &[u8]) {
        match decode_notification(frame) {
            Notification::MainFeed(metrics) => {
                self.data.write().main_feed = metrics;
                self.notify_callbacks();
            }
            Notification::Circuit { metric_iid, metrics, is_dual_phase } => {
                let mut data = self.data.write();
                if let Some(&circuit_id) = data.topology.metric_iid_to_circuit.get(&metric_iid) {
                    data.metrics.insert(circuit_id, metrics);
                    if let Some(info) = data.topology.circuits.get_mut(&circuit_id) {
                        info.is_dual_phase = is_dual_phase;
                    }
                }
                drop(data);
                self.notify_callbacks();
            }
            Notification::Ignored => {}
        }
    }

    /// Cheap — builds a snapshot from the latest topology/metrics tables
    /// without issuing any RPC.
    pub fn get_snapshot(&self) -> PanelSnapshot {
        let data = self.data.read();
        let mut circuits = HashMap::new();
        for info in data.topology.circuits.values() {
            let metrics = data.metrics.get(&info.circuit_id).cloned().unwrap_or_default();
            circuits.insert(
                info.circuit_id.to_string(),
                CircuitSnapshot {
                    circuit_id: info.circuit_id.to_string(),
                    name: info.name.clone(),
                    power_w: metrics.power_w,
                    voltage_v: metrics.voltage_v,
                    current_a: metrics.current_a,
                    is_on: metrics.is_on,
                    relay_state: None,
                    priority: None,
                    tabs: None,
                    energy_produced_wh: None,
                    energy_consumed_wh: None,
                    apparent_power_va: Some(metrics.apparent_power_va),
                    reactive_power_var: Some(metrics.reactive_power_var),
                    frequency_hz: Some(metrics.frequency_hz),
                    power_factor: Some(metrics.power_factor),
                    is_dual_phase: info.is_dual_phase,
                },
            );
        }
        PanelSnapshot {
            generation: PanelGeneration::Gen3,
            serial_number: data.serial.clone(),
            firmware_version: data.firmware.clone(),
            circuits,
            main_power_w: data.main_feed.power_w,
            main_relay_state: None,
            grid_power_w: None,
            battery_soe: None,
            dsm_state: None,
            dsm_grid_state: None,
            main_voltage_v: Some(data.main_feed.voltage_v),
            main_current_a: Some(data.main_feed.current_a),
            main_frequency_hz: Some(data.main_feed.frequency_hz),
        }
    }
}
