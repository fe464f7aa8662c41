/*
 *  Copyright (C) 2025 Michael Bachmann
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU Affero General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU Affero General Public License for more details.
 *
 *  You should have received a copy of the GNU Affero General Public License
 *  along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! The Observation Controller, grounded on
//! `effelsberg/servers/cam_server.py::EffController`: a finite-state machine
//! driven by scan-number/sub-scan-number/observing-flag events off the
//! Aggregator's sensor tree, wrapped the same actor way as every other
//! stateful component in this crate. The FSM's "single coarse lock" (spec
//! §4.6) falls out of the actor's command loop serializing every handler
//! invocation, exactly like [`crate::pipeline::PipelineInstance`].

mod backend;
mod feed;
mod template;

pub use backend::{AggregatorClient, UbiClient};

use crate::{
    config::{CamConfig, ConfigStore},
    error::ReynardResult,
    katcp::{Connection, KatcpMessage},
    node_pool::{Node, NodePool},
    pipeline::SensorSnapshot,
    receiver_registry::{ReceiverClass, ReceiverRegistry, StaticReceiver},
    sensor::SensorValue,
    socket,
};
use feed::SensorChange;
use serde::Serialize;
use std::fmt;
use tokio::sync::{mpsc, oneshot};
use tokio_graceful_shutdown::SubsystemHandle;
use tracing::{error, info, instrument, warn};

/// Aggregator sensor names read into the snapshot handed to the Backend
/// Interface on every `configure`/`start`.
const SENSOR_NAMES: &[&str] = &[
    "lmst", "ha", "utc", "mjd", "observing", "scannum", "subscannum", "nsubscan",
    "time-remaining", "time-elapsed", "source-name", "azimuth", "azimuth-offset",
    "azimuth-drive-speed", "elevation", "elevation-offset", "elevation-drive-speed", "ra", "dec",
    "ra-1950", "dec-1950", "glong", "glat", "elong", "elat", "frequency", "receiver", "focus",
    "air-pressure", "humidity", "air-temperature", "wind-speed", "wind-direction",
    "refraction-constant", "dew-point", "nula", "nule", "coll", "x-lin", "y-lin", "z-lin",
    "x-rot", "y-rot", "z-rot", "pol-angle", "project",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerState {
    Idle,
    Starting,
    Stopping,
    WaitingForScanNumberChange,
    WaitingStatusChangeToObserve,
    WaitingStatusChangeFromObserve,
    ConfiguringBackends,
    StartingBackends,
    StoppingBackends,
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ControllerState::Idle => "idle",
            ControllerState::Starting => "starting",
            ControllerState::Stopping => "stopping",
            ControllerState::WaitingForScanNumberChange => "waiting_for_scan_number_change",
            ControllerState::WaitingStatusChangeToObserve => "waiting_status_change_to_observe",
            ControllerState::WaitingStatusChangeFromObserve => "waiting_status_change_from_observe",
            ControllerState::ConfiguringBackends => "configuring_backends",
            ControllerState::StartingBackends => "starting_backends",
            ControllerState::StoppingBackends => "stopping_backends",
        };
        write!(f, "{s}")
    }
}

enum Command {
    Arm { resp: oneshot::Sender<Result<(), String>> },
    Disarm { resp: oneshot::Sender<Result<(), String>> },
    DeviceStatus { resp: oneshot::Sender<String> },
    Status { resp: oneshot::Sender<ControllerState> },
}

/// Cheap, cloneable handle to the running [`Controller`] actor, driven by
/// the CAM server's katcp handlers.
#[derive(Clone)]
pub struct ControllerApi {
    tx: mpsc::Sender<Command>,
}

impl ControllerApi {
    pub async fn arm(&self) -> Result<(), String> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(Command::Arm { resp: tx }).await.ok();
        rx.await.unwrap_or_else(|_| Err("controller actor shut down".to_owned()))
    }

    pub async fn disarm(&self) -> Result<(), String> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(Command::Disarm { resp: tx }).await.ok();
        rx.await.unwrap_or_else(|_| Err("controller actor shut down".to_owned()))
    }

    pub async fn device_status(&self) -> String {
        let (tx, rx) = oneshot::channel();
        self.tx.send(Command::DeviceStatus { resp: tx }).await.ok();
        rx.await.unwrap_or_else(|_| "fail".to_owned())
    }

    #[cfg(test)]
    pub async fn status(&self) -> Option<ControllerState> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(Command::Status { resp: tx }).await.ok();
        rx.await.ok()
    }
}

/// Owned Observation Controller actor. Every transition runs to completion
/// inside a single command-loop iteration, so a single coarse lock protects
/// the entire handler body.
pub struct Controller {
    cmd_rx: mpsc::Receiver<Command>,
    event_rx: mpsc::Receiver<SensorChange>,
    aggregator: AggregatorClient,
    ubi: UbiClient,
    receivers: ReceiverRegistry,
    node_pool: NodePool,
    config_store: ConfigStore,
    telescope: String,
    default_project: String,

    state: ControllerState,
    armed: bool,
    /// Substitutes for literal listener-deregistration bookkeeping: each
    /// flag records whether the Controller currently cares about that event
    /// kind, since [`feed::start`] keeps a single always-on
    /// subscription to all three sensors rather than dynamically
    /// subscribing/unsubscribing per handler (see DESIGN.md).
    listening_subscan: bool,
    listening_observe_on: bool,
    listening_observe_off: bool,
    nsubscan: i64,
    allocated_nodes: Vec<Node>,
    /// Receiver resolved by the last successful `configure_backends`, kept
    /// around so teardown can call that receiver's own `deconfigure()` hook.
    current_receiver: Option<String>,
}

impl Controller {
    #[allow(clippy::too_many_arguments)]
    fn new(
        cmd_rx: mpsc::Receiver<Command>,
        event_rx: mpsc::Receiver<SensorChange>,
        aggregator: AggregatorClient,
        ubi: UbiClient,
        receivers: ReceiverRegistry,
        node_pool: NodePool,
        config_store: ConfigStore,
        telescope: String,
        default_project: String,
    ) -> Self {
        Self {
            cmd_rx,
            event_rx,
            aggregator,
            ubi,
            receivers,
            node_pool,
            config_store,
            telescope,
            default_project,
            state: ControllerState::Idle,
            armed: false,
            listening_subscan: false,
            listening_observe_on: false,
            listening_observe_off: false,
            nsubscan: 1,
            allocated_nodes: Vec::new(),
            current_receiver: None,
        }
    }

    /// Calls the previously-resolved receiver's `deconfigure()` hook
    /// (best-effort, warning on failure), mirroring the UBI
    /// `stop_nodes`/`deconfigure_nodes` swallow-as-warning policy.
    async fn deconfigure_receiver(&mut self) {
        if let Some(receiver) = self.current_receiver.take() {
            match self.receivers.get(&self.telescope, &receiver) {
                Ok(class) => {
                    if let Err(e) = class.deconfigure().await {
                        warn!("receiver '{receiver}' deconfigure failed (non-fatal): {e}");
                    }
                }
                Err(e) => warn!("receiver '{receiver}' no longer registered: {e}"),
            }
        }
    }

    pub async fn run(mut self) {
        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(cmd) => self.handle_command(cmd).await,
                        None => break,
                    }
                }
                change = self.event_rx.recv() => {
                    match change {
                        Some(change) => self.handle_sensor_change(change).await,
                        None => break,
                    }
                }
            }
        }
        info!("observation controller shut down");
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Arm { resp } => {
                resp.send(self.do_arm()).ok();
            }
            Command::Disarm { resp } => {
                resp.send(self.do_disarm().await).ok();
            }
            Command::DeviceStatus { resp } => {
                resp.send(self.do_device_status().await).ok();
            }
            Command::Status { resp } => {
                resp.send(self.state).ok();
            }
        }
    }

    /// Arm is rejected when already armed; otherwise moves straight to
    /// `waiting_for_scan_number_change` without issuing any RPC.
    fn do_arm(&mut self) -> Result<(), String> {
        if self.armed {
            return Err("already armed".to_owned());
        }
        self.state = ControllerState::Starting;
        self.armed = true;
        self.state = ControllerState::WaitingForScanNumberChange;
        info!("observation controller armed");
        Ok(())
    }

    /// Clears every outstanding listener flag, tears down backends
    /// failure-tolerantly, and returns to `idle`.
    #[instrument(skip(self))]
    async fn do_disarm(&mut self) -> Result<(), String> {
        if !self.armed {
            return Err("not armed".to_owned());
        }
        self.state = ControllerState::Stopping;
        self.listening_subscan = false;
        self.listening_observe_on = false;
        self.listening_observe_off = false;
        if let Err(e) = self.ubi.stop().await {
            warn!("stop_nodes during disarm: {e}");
        }
        if let Err(e) = self.ubi.deconfigure().await {
            warn!("deconfigure_nodes during disarm: {e}");
        }
        self.deconfigure_receiver().await;
        self.allocated_nodes.clear();
        self.armed = false;
        self.state = ControllerState::Idle;
        info!("observation controller disarmed");
        Ok(())
    }

    async fn do_device_status(&mut self) -> String {
        self.ubi
            .device_status()
            .await
            .unwrap_or_else(|e| format!("fail: {e}"))
    }

    async fn handle_sensor_change(&mut self, change: SensorChange) {
        if !self.armed {
            return;
        }
        match change {
            SensorChange::ScanNumber(_) => self.scan_handler().await,
            SensorChange::SubScanNumber(value) => {
                if self.listening_subscan {
                    self.subscan_handler(value).await;
                }
            }
            SensorChange::Observing(true) => {
                if self.listening_observe_on {
                    self.observe_start().await;
                }
            }
            SensorChange::Observing(false) => {
                if self.listening_observe_off {
                    self.observe_stop().await;
                }
            }
        }
    }

    /// Spec §4.6 `scan_handler`: deregister outstanding listeners, tear down
    /// the previous observation, compute and install the new one. Any step
    /// failing disarms the controller entirely, as specified.
    #[instrument(skip(self))]
    async fn scan_handler(&mut self) {
        self.listening_subscan = false;
        self.listening_observe_on = false;
        self.listening_observe_off = false;

        self.state = ControllerState::StoppingBackends;
        if let Err(e) = self.ubi.stop().await {
            warn!("stop_nodes during scan handler: {e}");
        }
        if let Err(e) = self.ubi.deconfigure().await {
            warn!("deconfigure_nodes during scan handler: {e}");
        }
        self.deconfigure_receiver().await;

        self.state = ControllerState::ConfiguringBackends;
        if let Err(e) = self.configure_backends().await {
            error!("scan handler configuration failed: {e}, disarming");
            self.full_stop().await;
        }
    }

    /// Reads the sensor snapshot, resolves the receiver and capture nodes,
    /// renders the pipeline-config template, and configures the Backend
    /// Interface. On success, arms whichever of the observe/subscan listeners
    /// the current sensor state calls for.
    async fn configure_backends(&mut self) -> Result<(), String> {
        let snapshot = self
            .aggregator
            .snapshot(SENSOR_NAMES)
            .await
            .map_err(|e| e.to_string())?;

        let receiver = read_string(&snapshot, "receiver")?;
        let source_name = read_string(&snapshot, "source-name")?;
        let project_sensor = read_string(&snapshot, "project").unwrap_or_default();
        let nsubscan = read_int(&snapshot, "nsubscan")?;

        let receiver_class = self
            .receivers
            .get(&self.telescope, &receiver)
            .map_err(|e| e.to_string())?;
        let capture_nodes = receiver_class.get_capture_nodes();
        if capture_nodes.is_empty() {
            return Err(format!("receiver '{receiver}' resolved zero capture nodes"));
        }
        receiver_class
            .configure()
            .await
            .map_err(|e| format!("receiver '{receiver}' configure failed: {e}"))?;

        let tag = template::parse_tag(&source_name);
        let project = if project_sensor.is_empty() {
            self.default_project.clone()
        } else {
            project_sensor
        };

        let template_str = self
            .config_store
            .load_pipeline_template(&project, &receiver, &tag)
            .await
            .map_err(|e| e.to_string())?;
        let node_context: Vec<serde_json::Value> = capture_nodes
            .iter()
            .map(|n| serde_json::json!({ "ip": n.host, "port": n.port }))
            .collect();
        let context = serde_json::json!({ "nodes": node_context });
        let rendered = template::render_json(&template_str, &context)
            .map_err(|e| format!("malformed rendered pipeline config: {e}"))?;

        self.ubi
            .configure(&rendered, &snapshot)
            .await
            .map_err(|e| e.to_string())?;

        if let Err(e) = receiver_class.trigger().await {
            warn!("receiver '{receiver}' trigger failed (non-fatal): {e}");
        }

        self.allocated_nodes = capture_nodes;
        self.current_receiver = Some(receiver);
        self.nsubscan = nsubscan;

        if nsubscan > 1 {
            self.listening_subscan = true;
        }

        if read_bool(&snapshot, "observing")? {
            self.observe_start().await;
        } else {
            self.listening_observe_on = true;
            self.state = ControllerState::WaitingStatusChangeToObserve;
        }

        Ok(())
    }

    /// Spec §4.6 "Observing → true": start the backends, then wait for the
    /// matching off-transition. A failure here performs a full stop.
    #[instrument(skip(self))]
    async fn observe_start(&mut self) {
        self.listening_observe_on = false;
        self.state = ControllerState::StartingBackends;

        let snapshot = match self.aggregator.snapshot(SENSOR_NAMES).await {
            Ok(s) => s,
            Err(e) => {
                error!("observe_start: failed to read sensor snapshot: {e}");
                self.full_stop().await;
                return;
            }
        };

        match self.ubi.start(&snapshot).await {
            Ok(()) => {
                self.listening_observe_off = true;
                self.state = ControllerState::WaitingStatusChangeFromObserve;
            }
            Err(e) => {
                error!("start_nodes failed: {e}");
                self.full_stop().await;
            }
        }
    }

    /// Spec §4.6 "Observing → false": stop the backends and return to idle,
    /// remaining armed for the next scan-number change.
    #[instrument(skip(self))]
    async fn observe_stop(&mut self) {
        self.listening_observe_off = false;
        self.state = ControllerState::StoppingBackends;

        match self.ubi.stop().await {
            Ok(()) => self.state = ControllerState::Idle,
            Err(e) => {
                error!("stop_nodes failed: {e}");
                self.full_stop().await;
            }
        }
    }

    /// Spec §4.6 "Sub-scan change": stop the current observation, then
    /// re-arm the observe-start wait (or dispatch it immediately if already
    /// observing); drops the sub-scan listener once the declared count is
    /// reached.
    #[instrument(skip(self))]
    async fn subscan_handler(&mut self, value: i64) {
        self.state = ControllerState::StoppingBackends;
        if let Err(e) = self.ubi.stop().await {
            warn!("stop_nodes during subscan handler: {e}");
        }
        self.listening_observe_off = false;

        let observing = match self.aggregator.sensor_value("observing").await {
            Ok(v) => v == "true",
            Err(e) => {
                warn!("subscan_handler: could not read observing flag: {e}");
                false
            }
        };

        if observing {
            self.observe_start().await;
        } else {
            self.listening_observe_on = true;
            self.state = ControllerState::WaitingStatusChangeToObserve;
        }

        if value >= self.nsubscan {
            self.listening_subscan = false;
        }
    }

    /// Tears everything down and disarms outright, the failure path every
    /// handler above funnels into: transition to stopping and then idle,
    /// clearing the armed flag.
    async fn full_stop(&mut self) {
        self.state = ControllerState::Stopping;
        self.ubi.stop().await.ok();
        self.ubi.deconfigure().await.ok();
        self.deconfigure_receiver().await;
        self.allocated_nodes.clear();
        self.listening_subscan = false;
        self.listening_observe_on = false;
        self.listening_observe_off = false;
        self.armed = false;
        self.state = ControllerState::Idle;
    }
}

fn read_string(snapshot: &SensorSnapshot, name: &str) -> Result<String, String> {
    match snapshot.get(name).map(|(_, _, v)| v) {
        Some(SensorValue::String(s)) => Ok(s.clone()),
        Some(other) => Err(format!("sensor '{name}' is not a string (got {other})")),
        None => Err(format!("sensor '{name}' missing from snapshot")),
    }
}

fn read_int(snapshot: &SensorSnapshot, name: &str) -> Result<i64, String> {
    match snapshot.get(name).map(|(_, _, v)| v) {
        Some(SensorValue::Int(v)) => Ok(*v),
        Some(other) => Err(format!("sensor '{name}' is not an int (got {other})")),
        None => Err(format!("sensor '{name}' missing from snapshot")),
    }
}

fn read_bool(snapshot: &SensorSnapshot, name: &str) -> Result<bool, String> {
    match snapshot.get(name).map(|(_, _, v)| v) {
        Some(SensorValue::Bool(v)) => Ok(*v),
        Some(other) => Err(format!("sensor '{name}' is not a bool (got {other})")),
        None => Err(format!("sensor '{name}' missing from snapshot")),
    }
}

/// A single demo receiver seeded against the node pool's full node set, the
/// way a real deployment's receiver-specific module would register its own
/// `ReceiverClass` at service start.
fn seed_registry(telescope: &str, node_pool: &NodePool) -> ReceiverRegistry {
    let mut registry = ReceiverRegistry::new();
    registry.register(telescope, "default", Box::new(StaticReceiver::new(node_pool.available())));
    registry
}

struct CamState {
    controller: ControllerApi,
    node_pool: NodePool,
}

pub async fn run(config: CamConfig, config_store: ConfigStore, subsys: SubsystemHandle) -> ReynardResult<()> {
    let manifest = config_store.load_node_manifest(&config.node_set).await?;
    let node_pool = NodePool::from_json(&manifest)?;

    let aggregator_addr = std::net::SocketAddr::new(
        config.aggregator_address.bind_address,
        config.aggregator_address.port,
    );
    let ubi_addr = std::net::SocketAddr::new(config.ubi_address.bind_address, config.ubi_address.port);

    let receivers = seed_registry(&config.telescope, &node_pool);
    let aggregator = AggregatorClient::new(aggregator_addr);
    let ubi = UbiClient::new(ubi_addr);
    let event_rx = feed::start(aggregator_addr);

    let (cmd_tx, cmd_rx) = mpsc::channel(32);
    let controller = Controller::new(
        cmd_rx,
        event_rx,
        aggregator,
        ubi,
        receivers,
        node_pool.clone(),
        config_store,
        config.telescope.clone(),
        config.default_project.clone(),
    );
    tokio::spawn(controller.run());

    let state = CamState {
        controller: ControllerApi { tx: cmd_tx },
        node_pool,
    };

    let listener = socket::bind_katcp_listener(&config.socket).await?;
    info!("{} listening", config.instance_name());

    loop {
        tokio::select! {
            _ = subsys.on_shutdown_requested() => break,
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        info!("cam client connected from {peer}");
                        let state = CamState {
                            controller: state.controller.clone(),
                            node_pool: state.node_pool.clone(),
                        };
                        tokio::spawn(async move { serve_connection(stream, state).await });
                    }
                    Err(e) => error!("accept failed: {e}"),
                }
            }
        }
    }

    info!("cam subsystem stopped");
    Ok(())
}

async fn serve_connection(stream: tokio::net::TcpStream, state: CamState) {
    let mut conn = Connection::new(stream);
    loop {
        match conn.recv().await {
            Ok(Some(KatcpMessage::Request { name, args })) => {
                let (reply, informs) = handle_request(&state, &name, &args).await;
                for inform in informs {
                    if conn.send(inform).await.is_err() {
                        return;
                    }
                }
                if conn.send(reply).await.is_err() {
                    break;
                }
            }
            Ok(Some(_)) => continue,
            Ok(None) => break,
            Err(e) => {
                warn!("cam connection error: {e}");
                break;
            }
        }
    }
}

async fn handle_request(state: &CamState, name: &str, args: &[String]) -> (KatcpMessage, Vec<KatcpMessage>) {
    match name {
        "arm" => (
            match state.controller.arm().await {
                Ok(()) => KatcpMessage::ok_reply("arm", vec!["armed".to_owned()]),
                Err(e) => KatcpMessage::fail_reply("arm", e),
            },
            Vec::new(),
        ),
        "disarm" => (
            match state.controller.disarm().await {
                Ok(()) => KatcpMessage::ok_reply("disarm", vec!["disarmed".to_owned()]),
                Err(e) => KatcpMessage::fail_reply("disarm", e),
            },
            Vec::new(),
        ),
        "device-status" => (
            KatcpMessage::ok_reply("device-status", vec![state.controller.device_status().await]),
            Vec::new(),
        ),
        "backend-list" => {
            let mut nodes = state.node_pool.available();
            nodes.extend(state.node_pool.used());
            let informs: Vec<KatcpMessage> = nodes
                .iter()
                .map(|n| KatcpMessage::inform("backend-list", vec![format!("{} {}:{}", n.host, n.host, n.port)]))
                .collect();
            (
                KatcpMessage::ok_reply("backend-list", vec![format!("{} backends found", informs.len())]),
                informs,
            )
        }
        "backend-address" => {
            let Some(target) = args.first() else {
                return (KatcpMessage::fail_reply(name, "expected <name>"), Vec::new());
            };
            let mut nodes = state.node_pool.available();
            nodes.extend(state.node_pool.used());
            match nodes.iter().find(|n| &n.host == target) {
                Some(node) => (
                    KatcpMessage::ok_reply("backend-address", vec![format!("{}:{}", node.host, node.port)]),
                    Vec::new(),
                ),
                None => (
                    KatcpMessage::fail_reply("backend-address", format!("no such backend '{target}'")),
                    Vec::new(),
                ),
            }
        }
        other => (
            KatcpMessage::fail_reply(name, format!("unknown request '{other}'")),
            Vec::new(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn test_controller() -> Controller {
        let (_cmd_tx, cmd_rx) = mpsc::channel(4);
        let (_event_tx, event_rx) = mpsc::channel(4);
        let addr: std::net::SocketAddr = "127.0.0.1:1".parse().expect("valid address");
        Controller::new(
            cmd_rx,
            event_rx,
            AggregatorClient::new(addr),
            UbiClient::new(addr),
            ReceiverRegistry::new(),
            NodePool::new(Vec::new()),
            ConfigStore::new(PathBuf::from(".")),
            "effelsberg".to_owned(),
            "default".to_owned(),
        )
    }

    #[tokio::test]
    async fn arm_moves_to_waiting_for_scan_number_change_without_rpc() {
        let mut controller = test_controller();
        assert!(controller.do_arm().is_ok());
        assert_eq!(controller.state, ControllerState::WaitingForScanNumberChange);
        assert!(controller.armed);
    }

    #[tokio::test]
    async fn arming_twice_is_rejected() {
        let mut controller = test_controller();
        controller.do_arm().unwrap();
        assert!(controller.do_arm().is_err());
    }

    #[tokio::test]
    async fn disarm_without_arm_is_rejected() {
        let mut controller = test_controller();
        assert!(controller.do_disarm().await.is_err());
    }

    #[tokio::test]
    async fn disarm_returns_to_idle_and_clears_armed() {
        let mut controller = test_controller();
        controller.do_arm().unwrap();
        controller.do_disarm().await.unwrap();
        assert_eq!(controller.state, ControllerState::Idle);
        assert!(!controller.armed);
    }

    #[tokio::test]
    async fn scan_handler_failure_disarms_the_controller() {
        let mut controller = test_controller();
        controller.do_arm().unwrap();
        controller.scan_handler().await;
        assert_eq!(controller.state, ControllerState::Idle);
        assert!(!controller.armed);
    }

    fn snapshot_with(name: &str, value: SensorValue) -> SensorSnapshot {
        let mut snapshot = SensorSnapshot::new();
        snapshot.insert(name.to_owned(), (chrono::Utc::now(), crate::sensor::SensorStatus::Nominal, value));
        snapshot
    }

    #[test]
    fn read_string_extracts_declared_type() {
        let snapshot = snapshot_with("receiver", SensorValue::String("p200-3".to_owned()));
        assert_eq!(read_string(&snapshot, "receiver").unwrap(), "p200-3");
    }

    #[test]
    fn read_int_rejects_wrong_type() {
        let snapshot = snapshot_with("nsubscan", SensorValue::String("oops".to_owned()));
        assert!(read_int(&snapshot, "nsubscan").is_err());
    }

    #[test]
    fn read_bool_rejects_missing_sensor() {
        let snapshot = SensorSnapshot::new();
        assert!(read_bool(&snapshot, "observing").is_err());
    }
}
