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

//! The Backend Node, grounded on `servers/ubn_server.py`'s
//! `UniversalBackendNode`. Where that design spins up a nested katcp
//! `PipelineServer` (its own TCP listener) per pipeline and talks to it over
//! a loopback `KATCPClientResource`, this node drives [`PipelineInstance`]
//! actors directly in-process — simpler, and the same actor idiom used
//! throughout this crate (see DESIGN.md for the tradeoff).

pub mod monitor;

use crate::{
    config::UbnConfig,
    error::ReynardResult,
    escape::{escape_string, pack_dict, unpack_dict},
    katcp::{Connection, KatcpMessage},
    pipeline::{
        JunkDbNull, PipelineApi, PipelineDescriptor, PipelineInstance, PipelineRegistry,
        SensorSnapshot, UdpDbDspsr,
    },
    sensor::{SensorApi, SensorSpec, SensorStatus, SensorTree, SensorType, SensorValue},
    socket,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};
use tokio::sync::Mutex;
use tokio_graceful_shutdown::SubsystemHandle;
use tracing::{error, info, instrument, warn};

#[derive(Debug, Deserialize)]
struct PipelineConfigEntry {
    name: String,
    pipeline_name: String,
    config: Value,
}

#[derive(Clone)]
struct UbnState {
    sensors: SensorApi,
    registry: Arc<PipelineRegistry>,
    pipelines: Arc<Mutex<HashMap<String, PipelineApi>>>,
    active: Arc<AtomicBool>,
}

pub async fn run(config: UbnConfig, subsys: SubsystemHandle) -> ReynardResult<()> {
    let (tree, sensors) = SensorTree::new();
    tokio::spawn(tree.run());

    sensors
        .add_sensor(SensorSpec {
            name: "device-status".to_owned(),
            description: "health status of node".to_owned(),
            unit: None,
            ty: SensorType::Discrete {
                params: vec!["ok".to_owned(), "fail".to_owned(), "degraded".to_owned()],
            },
            default: SensorValue::String("ok".to_owned()),
        })
        .await
        .ok();
    sensors
        .add_sensor(SensorSpec {
            name: "active".to_owned(),
            description: "Is node configured for processing".to_owned(),
            unit: None,
            ty: SensorType::Bool,
            default: SensorValue::Bool(false),
        })
        .await
        .ok();

    monitor::start(sensors.clone(), config.monitored_volumes.clone()).await;

    let state = UbnState {
        sensors,
        registry: Arc::new(builtin_registry()),
        pipelines: Arc::new(Mutex::new(HashMap::new())),
        active: Arc::new(AtomicBool::new(false)),
    };

    let listener = socket::bind_katcp_listener(&config.socket).await?;
    info!("{} listening", config.instance_name());

    loop {
        tokio::select! {
            _ = subsys.on_shutdown_requested() => break,
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        info!("ubn client connected from {peer}");
                        let state = state.clone();
                        tokio::spawn(async move { serve_connection(stream, state).await });
                    }
                    Err(e) => error!("accept failed: {e}"),
                }
            }
        }
    }

    info!("ubn subsystem stopped");
    Ok(())
}

/// The two pipeline kinds this crate ships out of the box (spec
/// supplemented feature #5). A deployment with custom pipeline types would
/// extend this registry rather than replace it.
fn builtin_registry() -> PipelineRegistry {
    let mut registry = PipelineRegistry::new();
    registry.register(
        PipelineDescriptor {
            name: "TestPipeline".to_owned(),
            description: "Creates a single-writer/single-reader dada buffer for testing.".to_owned(),
            version: "1.0".to_owned(),
            requires_nvidia: false,
            required_sensors: JunkDbNull::new()
                .required_sensors()
                .iter()
                .cloned()
                .collect(),
            required_containers: vec!["psr-capture".to_owned()],
        },
        || Box::new(JunkDbNull::new()),
    );
    registry.register(
        PipelineDescriptor {
            name: "DspsrPipeline".to_owned(),
            description: "Captures data from the network into a dada buffer folded live by DSPSR.".to_owned(),
            version: "1.0".to_owned(),
            requires_nvidia: true,
            required_sensors: UdpDbDspsr::new().required_sensors().iter().cloned().collect(),
            required_containers: vec![],
        },
        || Box::new(UdpDbDspsr::new()),
    );
    registry
}

async fn serve_connection(stream: tokio::net::TcpStream, state: UbnState) {
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
                warn!("ubn connection error: {e}");
                break;
            }
        }
    }
}

#[instrument(skip(state, args))]
async fn handle_request(state: &UbnState, name: &str, args: &[String]) -> (KatcpMessage, Vec<KatcpMessage>) {
    match name {
        "configure" => (handle_configure(state, args).await, Vec::new()),
        "start" => handle_fanout(state, FanoutCmd::Start, args).await,
        "stop" => handle_fanout(state, FanoutCmd::Stop, args).await,
        "reset" => handle_fanout(state, FanoutCmd::Reset, args).await,
        "deconfigure" => (handle_deconfigure(state).await, Vec::new()),
        "pipeline-avail" => handle_pipeline_avail(state),
        "pipeline-create" => (handle_pipeline_create(state, args).await, Vec::new()),
        "pipeline-list" => (handle_pipeline_list(state).await, Vec::new()),
        "pipeline-destroy" => (handle_pipeline_destroy(state, args).await, Vec::new()),
        "status" => (handle_status(state).await, Vec::new()),
        other => (
            KatcpMessage::fail_reply(name, format!("unknown request '{other}'")),
            Vec::new(),
        ),
    }
}

/// Creates a Pipeline Instance per entry and drives its `configure`
/// concurrently, exactly the fan-out/collect shape of
/// `UniversalBackendNode.request_configure`'s `configure` coroutine.
async fn handle_configure(state: &UbnState, args: &[String]) -> KatcpMessage {
    if state.active.load(Ordering::SeqCst) {
        return KatcpMessage::fail_reply(
            "configure",
            "Node is already active, deconfigure before sending new configure commands",
        );
    }
    let (Some(config_arg), Some(sensors_arg)) = (args.first(), args.get(1)) else {
        return KatcpMessage::fail_reply("configure", "expected <config> <sensors>");
    };
    let entries: Vec<PipelineConfigEntry> = match unpack_dict(config_arg) {
        Ok(v) => v,
        Err(e) => return KatcpMessage::fail_reply("configure", format!("malformed config: {e}")),
    };
    let sensors: SensorSnapshot = match unpack_dict(sensors_arg) {
        Ok(v) => v,
        Err(e) => return KatcpMessage::fail_reply("configure", format!("malformed sensors: {e}")),
    };

    let mut created = Vec::with_capacity(entries.len());
    {
        let mut pipelines = state.pipelines.lock().await;
        for entry in &entries {
            if pipelines.contains_key(&entry.name) {
                return KatcpMessage::fail_reply(
                    "configure",
                    format!("Pipeline named '{0}' already exists", entry.name),
                );
            }
            let kind = match state.registry.create(&entry.pipeline_name) {
                Ok(kind) => kind,
                Err(e) => {
                    return KatcpMessage::fail_reply("configure", e.to_string());
                }
            };
            let (instance, api) = PipelineInstance::new(entry.name.clone(), kind);
            tokio::spawn(instance.run());
            pipelines.insert(entry.name.clone(), api.clone());
            created.push(api);
        }
    }

    let mut futures = Vec::with_capacity(entries.len());
    for (entry, api) in entries.iter().zip(created.iter()) {
        let name = entry.name.clone();
        let config = entry.config.clone();
        let sensors = sensors.clone();
        let api = api.clone();
        futures.push(async move {
            let result = api.configure(config, sensors).await;
            (name, result)
        });
    }
    let results = futures::future::join_all(futures).await;
    for (name, result) in &results {
        if let Err(e) = result {
            return KatcpMessage::fail_reply(
                "configure",
                format!("Configuration of pipeline '{name}' failed with message: {e}"),
            );
        }
    }
    state.active.store(true, Ordering::SeqCst);
    state.sensors.set_value("active", SensorValue::Bool(true), Some(SensorStatus::Nominal)).await.ok();
    KatcpMessage::ok_reply("configure", vec!["All pipelines created and configured".to_owned()])
}

#[derive(Clone, Copy)]
enum FanoutCmd {
    Start,
    Stop,
    Reset,
}

impl FanoutCmd {
    fn name(self) -> &'static str {
        match self {
            FanoutCmd::Start => "start",
            FanoutCmd::Stop => "stop",
            FanoutCmd::Reset => "reset",
        }
    }
}

/// Sends `cmd` to every configured pipeline concurrently; individual
/// failures become informs, the overall reply is `ok` once the fan-out
/// completed, mirroring `UniversalBackendNode._send_to_all`.
async fn handle_fanout(state: &UbnState, cmd: FanoutCmd, args: &[String]) -> (KatcpMessage, Vec<KatcpMessage>) {
    let name = cmd.name();
    let sensors: SensorSnapshot = if matches!(cmd, FanoutCmd::Start) {
        match args.first().map(|s| unpack_dict(s)) {
            Some(Ok(v)) => v,
            Some(Err(e)) => {
                return (
                    KatcpMessage::fail_reply(name, format!("malformed sensors: {e}")),
                    Vec::new(),
                );
            }
            None => return (KatcpMessage::fail_reply(name, "expected <sensors>"), Vec::new()),
        }
    } else {
        SensorSnapshot::new()
    };

    let targets: Vec<(String, PipelineApi)> = {
        let pipelines = state.pipelines.lock().await;
        pipelines.iter().map(|(n, api)| (n.clone(), api.clone())).collect()
    };

    let mut futures = Vec::with_capacity(targets.len());
    for (pipeline_name, api) in targets {
        let sensors = sensors.clone();
        futures.push(async move {
            let result = match cmd {
                FanoutCmd::Start => api.start(sensors).await,
                FanoutCmd::Stop => api.stop().await,
                FanoutCmd::Reset => api.reset().await,
            };
            (pipeline_name, result)
        });
    }
    let results = futures::future::join_all(futures).await;

    let mut informs = Vec::new();
    for (pipeline_name, result) in results {
        match result {
            Ok(()) => informs.push(KatcpMessage::inform(
                name,
                vec![format!("Pipeline '{pipeline_name}' '{name}' command success")],
            )),
            Err(e) => informs.push(KatcpMessage::inform(
                name,
                vec![format!("Pipeline '{pipeline_name}' '{name}' command failure [error: {e}]")],
            )),
        }
    }
    (
        KatcpMessage::ok_reply(name, vec![format!("{name} command passed to all pipelines")]),
        informs,
    )
}

async fn handle_deconfigure(state: &UbnState) -> KatcpMessage {
    let mut pipelines = state.pipelines.lock().await;
    let mut informs = Vec::new();
    for (name, api) in pipelines.iter() {
        if let Err(e) = api.deconfigure().await {
            informs.push(format!("Warning: failure on deconfigure of pipeline '{name}': {e}"));
        }
    }
    for msg in &informs {
        warn!("{msg}");
    }
    pipelines.clear();
    drop(pipelines);
    state.active.store(false, Ordering::SeqCst);
    state
        .sensors
        .set_value("active", SensorValue::Bool(false), Some(SensorStatus::Nominal))
        .await
        .ok();
    KatcpMessage::ok_reply("deconfigure", vec!["Deconfigured node".to_owned()])
}

/// Renders each registry entry's description and accelerator-device
/// requirement as an inform, not just a bare name list, grounded on
/// `ubn_server.py::request_pipeline_avail`.
fn handle_pipeline_avail(state: &UbnState) -> (KatcpMessage, Vec<KatcpMessage>) {
    let informs: Vec<KatcpMessage> = state
        .registry
        .descriptors()
        .map(|d| {
            KatcpMessage::inform(
                "pipeline-avail",
                vec![
                    d.name.clone(),
                    escape_string(&d.description),
                    d.requires_nvidia.to_string(),
                ],
            )
        })
        .collect();
    (
        KatcpMessage::ok_reply("pipeline-avail", vec![informs.len().to_string()]),
        informs,
    )
}

async fn handle_pipeline_create(state: &UbnState, args: &[String]) -> KatcpMessage {
    let (Some(name), Some(pipeline_name)) = (args.first(), args.get(1)) else {
        return KatcpMessage::fail_reply("pipeline-create", "expected <name> <type>");
    };
    let mut pipelines = state.pipelines.lock().await;
    if pipelines.contains_key(name) {
        return KatcpMessage::fail_reply("pipeline-create", format!("Pipeline already exists with name '{name}'"));
    }
    let kind = match state.registry.create(pipeline_name) {
        Ok(kind) => kind,
        Err(e) => return KatcpMessage::fail_reply("pipeline-create", e.to_string()),
    };
    let (instance, api) = PipelineInstance::new(name.clone(), kind);
    tokio::spawn(instance.run());
    pipelines.insert(name.clone(), api);
    KatcpMessage::ok_reply("pipeline-create", vec![name.clone()])
}

async fn handle_pipeline_list(state: &UbnState) -> KatcpMessage {
    let pipelines = state.pipelines.lock().await;
    KatcpMessage::ok_reply("pipeline-list", vec![pipelines.len().to_string()])
}

async fn handle_pipeline_destroy(state: &UbnState, args: &[String]) -> KatcpMessage {
    let Some(name) = args.first() else {
        return KatcpMessage::fail_reply("pipeline-destroy", "expected <name>");
    };
    let mut pipelines = state.pipelines.lock().await;
    if pipelines.remove(name).is_some() {
        KatcpMessage::ok_reply("pipeline-destroy", vec!["ok".to_owned()])
    } else {
        KatcpMessage::fail_reply("pipeline-destroy", format!("No pipeline named '{name}'"))
    }
}

#[derive(Serialize)]
struct NodeStatus {
    sensors: HashMap<String, String>,
    pipelines: HashMap<String, crate::pipeline::PipelineStatus>,
}

async fn handle_status(state: &UbnState) -> KatcpMessage {
    let sensor_names = ["device-status", "active"];
    let mut sensors = HashMap::new();
    for name in sensor_names {
        if let Ok((_, _, value)) = state.sensors.get_reading(name).await {
            sensors.insert(name.to_owned(), value.to_string());
        }
    }
    let pipelines = state.pipelines.lock().await;
    let mut statuses = HashMap::new();
    for (name, api) in pipelines.iter() {
        if let Ok(status) = api.status().await {
            statuses.insert(name.clone(), status);
        }
    }
    let doc = NodeStatus { sensors, pipelines: statuses };
    match pack_dict(&doc) {
        Ok(packed) => KatcpMessage::ok_reply("status", vec![packed]),
        Err(e) => KatcpMessage::fail_reply("status", e.to_string()),
    }
}
