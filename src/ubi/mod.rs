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

//! The Backend Interface, grounded on `servers/ubi_server.py`'s
//! `UniversalBackendInterface`: a named registry of child-node katcp clients
//! (the `KATCPClientResource` map `_nodes` keeps), a `configure` fan-out that
//! matches config entries to clients by bound address, and a tri-valued
//! health aggregation across all children.

use crate::{
    config::UbiConfig,
    error::ReynardResult,
    escape::{pack_dict, unpack_dict},
    katcp::{Connection, KatcpClient, KatcpMessage},
    sensor::{SensorApi, SensorSpec, SensorStatus, SensorTree, SensorType, SensorValue},
    socket,
};
use serde::Deserialize;
use serde_json::Value;
use std::{
    collections::HashMap,
    net::IpAddr,
    sync::Arc,
};
use tokio::sync::Mutex;
use tokio_graceful_shutdown::SubsystemHandle;
use tracing::{error, info, instrument, warn};

/// Request timeouts: 30s for configure fan-out, 20s default,
/// 2s for health probes.
const CONFIGURE_TIMEOUT_SECS: u64 = 30;
const DEFAULT_TIMEOUT_SECS: u64 = 20;
const HEALTH_TIMEOUT_SECS: u64 = 2;

struct NodeEntry {
    ip: IpAddr,
    port: u16,
    client: Arc<Mutex<KatcpClient>>,
}

#[derive(Clone)]
struct UbiState {
    sensors: SensorApi,
    nodes: Arc<Mutex<HashMap<String, NodeEntry>>>,
}

#[derive(Debug, Deserialize)]
struct ConfigureDoc {
    nodes: Vec<NodeConfigEntry>,
}

#[derive(Debug, Deserialize)]
struct NodeConfigEntry {
    ip: IpAddr,
    port: u16,
    pipelines: Value,
}

/// The subset of [`crate::ubn::NodeStatus`] this module actually reads back:
/// serde ignores the `pipelines` field it doesn't name.
#[derive(Debug, Deserialize)]
struct NodeStatusDoc {
    sensors: HashMap<String, String>,
}

pub async fn run(config: UbiConfig, subsys: SubsystemHandle) -> ReynardResult<()> {
    let (tree, sensors) = SensorTree::new();
    tokio::spawn(tree.run());

    sensors
        .add_sensor(SensorSpec {
            name: "device-status".to_owned(),
            description: "aggregate health of all backend nodes".to_owned(),
            unit: None,
            ty: SensorType::Discrete {
                params: vec!["ok".to_owned(), "fail".to_owned(), "degraded".to_owned()],
            },
            default: SensorValue::String("ok".to_owned()),
        })
        .await
        .ok();

    let state = UbiState {
        sensors,
        nodes: Arc::new(Mutex::new(HashMap::new())),
    };

    let listener = socket::bind_katcp_listener(&config.socket).await?;
    info!("{} listening", config.instance_name());

    loop {
        tokio::select! {
            _ = subsys.on_shutdown_requested() => break,
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        info!("ubi client connected from {peer}");
                        let state = state.clone();
                        tokio::spawn(async move { serve_connection(stream, state).await });
                    }
                    Err(e) => error!("accept failed: {e}"),
                }
            }
        }
    }

    info!("ubi subsystem stopped");
    Ok(())
}

async fn serve_connection(stream: tokio::net::TcpStream, state: UbiState) {
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
                warn!("ubi connection error: {e}");
                break;
            }
        }
    }
}

#[instrument(skip(state, args))]
async fn handle_request(state: &UbiState, name: &str, args: &[String]) -> (KatcpMessage, Vec<KatcpMessage>) {
    match name {
        "node-add" => (handle_node_add(state, args).await, Vec::new()),
        "node-remove" => (handle_node_remove(state, args).await, Vec::new()),
        "node-list" => handle_node_list(state).await,
        "configure" => (handle_configure(state, args).await, Vec::new()),
        "start" => handle_fanout(state, FanoutCmd::Start, args, DEFAULT_TIMEOUT_SECS).await,
        "stop" => handle_fanout(state, FanoutCmd::Stop, &[], DEFAULT_TIMEOUT_SECS).await,
        "deconfigure" => handle_fanout(state, FanoutCmd::Deconfigure, &[], DEFAULT_TIMEOUT_SECS).await,
        "device-status" => (handle_device_status(state).await, Vec::new()),
        other => (
            KatcpMessage::fail_reply(name, format!("unknown request '{other}'")),
            Vec::new(),
        ),
    }
}

async fn handle_node_add(state: &UbiState, args: &[String]) -> KatcpMessage {
    let (Some(name), Some(ip), Some(port)) = (args.first(), args.get(1), args.get(2)) else {
        return KatcpMessage::fail_reply("node-add", "expected <name> <ip> <port>");
    };
    let Ok(ip) = ip.parse::<IpAddr>() else {
        return KatcpMessage::fail_reply("node-add", format!("malformed address '{ip}'"));
    };
    let Ok(port) = port.parse::<u16>() else {
        return KatcpMessage::fail_reply("node-add", format!("malformed port '{port}'"));
    };
    let mut nodes = state.nodes.lock().await;
    if nodes.contains_key(name) {
        return KatcpMessage::fail_reply("node-add", format!("Node already added with name '{name}'"));
    }
    nodes.insert(
        name.clone(),
        NodeEntry {
            ip,
            port,
            client: Arc::new(Mutex::new(KatcpClient::new(std::net::SocketAddr::new(ip, port)))),
        },
    );
    KatcpMessage::ok_reply("node-add", vec!["added node".to_owned()])
}

async fn handle_node_remove(state: &UbiState, args: &[String]) -> KatcpMessage {
    let Some(name) = args.first() else {
        return KatcpMessage::fail_reply("node-remove", "expected <name>");
    };
    let mut nodes = state.nodes.lock().await;
    if nodes.remove(name).is_none() {
        return KatcpMessage::fail_reply("node-remove", format!("No node exists with name '{name}'"));
    }
    KatcpMessage::ok_reply("node-remove", vec!["removed node".to_owned()])
}

async fn handle_node_list(state: &UbiState) -> (KatcpMessage, Vec<KatcpMessage>) {
    let nodes = state.nodes.lock().await;
    let informs: Vec<KatcpMessage> = nodes
        .iter()
        .map(|(name, entry)| KatcpMessage::inform("node-list", vec![format!("{name} {}:{}", entry.ip, entry.port)]))
        .collect();
    (
        KatcpMessage::ok_reply("node-list", vec![format!("{} nodes found", nodes.len())]),
        informs,
    )
}

/// Matches each config entry to the registered node whose bound address
/// equals `(ip, port)` and forwards `configure(escape(pipelines), sensors)`
/// to it; unmatched entries are logged but do not fail the overall command.
/// As with `UniversalBackendNode::configure`, one node's configure failing
/// fails the whole command.
async fn handle_configure(state: &UbiState, args: &[String]) -> KatcpMessage {
    let (Some(config_arg), Some(sensors_arg)) = (args.first(), args.get(1)) else {
        return KatcpMessage::fail_reply("configure", "expected <config> <sensors>");
    };
    let doc: ConfigureDoc = match unpack_dict(config_arg) {
        Ok(v) => v,
        Err(e) => return KatcpMessage::fail_reply("configure", format!("malformed config: {e}")),
    };

    let mut targets = Vec::with_capacity(doc.nodes.len());
    {
        let nodes = state.nodes.lock().await;
        for entry in &doc.nodes {
            match nodes.values().find(|n| n.ip == entry.ip && n.port == entry.port) {
                Some(node) => targets.push((node.client.clone(), entry.pipelines.clone())),
                None => warn!("no node registered at address {}:{}", entry.ip, entry.port),
            }
        }
    }

    for (client, pipelines) in targets {
        let pipelines_packed = match pack_dict(&pipelines) {
            Ok(v) => v,
            Err(e) => return KatcpMessage::fail_reply("configure", format!("failed to pack pipelines: {e}")),
        };
        let mut client = client.lock().await;
        match client
            .request("configure", vec![pipelines_packed, sensors_arg.clone()], CONFIGURE_TIMEOUT_SECS)
            .await
        {
            Ok(outcome) if outcome.status == crate::katcp::ReplyStatus::Ok => {}
            Ok(outcome) => {
                return KatcpMessage::fail_reply(
                    "configure",
                    format!("node configure failed: {}", outcome.args.join(" ")),
                );
            }
            Err(e) => return KatcpMessage::fail_reply("configure", format!("node configure failed: {e}")),
        }
    }

    KatcpMessage::ok_reply("configure", vec!["configured".to_owned()])
}

#[derive(Clone, Copy)]
enum FanoutCmd {
    Start,
    Stop,
    Deconfigure,
}

impl FanoutCmd {
    fn name(self) -> &'static str {
        match self {
            FanoutCmd::Start => "start",
            FanoutCmd::Stop => "stop",
            FanoutCmd::Deconfigure => "deconfigure",
        }
    }
}

/// `start`/`stop`/`deconfigure` fan the matching UBN request out to every
/// registered node, the same tolerant way [`crate::ubn`] fans a command out
/// to its own pipelines, so the Observation Controller's
/// `start_nodes`/`stop_nodes`/`deconfigure_nodes` calls have working
/// implementations to drive.
async fn handle_fanout(
    state: &UbiState,
    cmd: FanoutCmd,
    args: &[String],
    timeout_secs: u64,
) -> (KatcpMessage, Vec<KatcpMessage>) {
    let name = cmd.name();
    let targets: Vec<(String, Arc<Mutex<KatcpClient>>)> = {
        let nodes = state.nodes.lock().await;
        nodes.iter().map(|(n, entry)| (n.clone(), entry.client.clone())).collect()
    };

    let mut futures = Vec::with_capacity(targets.len());
    for (node_name, client) in targets {
        let args = args.to_vec();
        futures.push(async move {
            let mut client = client.lock().await;
            let result = client.request(name, args, timeout_secs).await;
            (node_name, result)
        });
    }
    let results = futures::future::join_all(futures).await;

    let mut informs = Vec::new();
    for (node_name, result) in results {
        match result {
            Ok(outcome) if outcome.status == crate::katcp::ReplyStatus::Ok => {
                informs.push(KatcpMessage::inform(name, vec![format!("Node '{node_name}' '{name}' command success")]));
            }
            Ok(outcome) => informs.push(KatcpMessage::inform(
                name,
                vec![format!("Node '{node_name}' '{name}' command failure [{}]", outcome.args.join(" "))],
            )),
            Err(e) => informs.push(KatcpMessage::inform(
                name,
                vec![format!("Node '{node_name}' '{name}' command failure [error: {e}]")],
            )),
        }
    }
    (
        KatcpMessage::ok_reply(name, vec![format!("{name} command passed to all nodes")]),
        informs,
    )
}

/// Aggregates child-node health into a single tri-valued status: `ok` if all
/// report ok, `degraded` if exactly one fails, `fail` otherwise, 2s timeout
/// per child, matching `UniversalBackendInterface.request_device_status`.
async fn handle_device_status(state: &UbiState) -> KatcpMessage {
    let targets: Vec<(String, Arc<Mutex<KatcpClient>>)> = {
        let nodes = state.nodes.lock().await;
        nodes.iter().map(|(n, entry)| (n.clone(), entry.client.clone())).collect()
    };

    let mut futures = Vec::with_capacity(targets.len());
    for (node_name, client) in targets {
        futures.push(async move {
            let mut client = client.lock().await;
            let outcome = client.request("status", Vec::new(), HEALTH_TIMEOUT_SECS).await;
            let ok = match outcome {
                Ok(outcome) if outcome.status == crate::katcp::ReplyStatus::Ok => outcome
                    .args
                    .first()
                    .and_then(|doc| unpack_dict::<NodeStatusDoc>(doc).ok())
                    .and_then(|doc| doc.sensors.get("device-status").cloned())
                    .map(|v| v == "ok")
                    .unwrap_or(false),
                _ => false,
            };
            (node_name, ok)
        });
    }
    let results = futures::future::join_all(futures).await;

    let fail_count = results.iter().filter(|(_, ok)| !*ok).count();
    let status = aggregate_status(fail_count);
    state
        .sensors
        .set_value("device-status", SensorValue::String(status.to_owned()), Some(SensorStatus::Nominal))
        .await
        .ok();
    KatcpMessage::ok_reply("device-status", vec![status.to_owned()])
}

fn aggregate_status(fail_count: usize) -> String {
    match fail_count {
        0 => "ok",
        1 => "degraded",
        _ => "fail",
    }
    .to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_nodes_ok_is_ok() {
        assert_eq!(aggregate_status(0), "ok");
    }

    #[test]
    fn single_failure_is_degraded() {
        assert_eq!(aggregate_status(1), "degraded");
    }

    #[test]
    fn multiple_failures_is_fail() {
        assert_eq!(aggregate_status(2), "fail");
    }
}
