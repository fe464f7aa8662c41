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

//! The telescope state aggregator: ingests a multicast JSON
//! status feed, projects it onto the sensor tree every second, and serves
//! `?sensor-value`/`?json`/`?xml` over katcp. Grounded on
//! `effelsberg/servers/status_server.py`'s `StatusCatcherThread` and
//! `JsonStatusServer`.

mod projection;

use crate::{
    config::AggregatorConfig,
    error::ReynardResult,
    escape::{escape_string, pack_dict},
    katcp::{Connection, KatcpMessage},
    sensor::{SensorApi, SensorSpec, SensorStatus, SensorTree, SensorType, SensorValue},
    socket,
};
use projection::{ProjectionEntry, table};
use serde_json::Value;
use std::{io, sync::Arc, time::Duration};
use tokio::{net::UdpSocket, sync::Mutex, time::interval};
use tokio_graceful_shutdown::SubsystemHandle;
use tracing::{debug, error, info, instrument, warn};

#[derive(Clone)]
struct AggregatorState {
    sensors: SensorApi,
    latest: Arc<Mutex<Option<Value>>>,
    projection: Arc<Vec<ProjectionEntry>>,
}

pub async fn run(config: AggregatorConfig, subsys: SubsystemHandle) -> ReynardResult<()> {
    let (tree, sensors) = SensorTree::new();
    tokio::spawn(tree.run());

    let projection = Arc::new(table());
    for entry in projection.iter() {
        sensors
            .add_sensor(SensorSpec {
                name: entry.name.to_owned(),
                description: entry.description.to_owned(),
                unit: entry.unit.map(str::to_owned),
                ty: entry.ty.clone(),
                default: default_for(&entry.ty),
            })
            .await
            .ok();
    }

    let state = AggregatorState {
        sensors,
        latest: Arc::new(Mutex::new(None)),
        projection,
    };

    let listener = socket::bind_katcp_listener(&config.socket).await?;
    let mut tick = interval(Duration::from_secs(1));
    let mut ingest = None;

    loop {
        if ingest.is_none() {
            match socket::join_multicast(&config.multicast).await {
                Ok(socket) => ingest = Some(socket),
                Err(e) => {
                    warn!("could not join multicast group: {e}, retrying in 5s");
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    continue;
                }
            }
        }
        let socket = ingest.as_ref().expect("just (re)joined");

        tokio::select! {
            _ = subsys.on_shutdown_requested() => break,
            _ = tick.tick() => update_projection(&state).await,
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        debug!("aggregator client connected from {peer}");
                        let state = state.clone();
                        tokio::spawn(async move { serve_connection(stream, state).await });
                    }
                    Err(e) => error!("accept failed: {e}"),
                }
            }
            datagram = recv_latest(socket) => {
                match datagram {
                    Ok(bytes) => match serde_json::from_slice::<Value>(&bytes) {
                        Ok(value) => *state.latest.lock().await = Some(value),
                        Err(e) => warn!("malformed status datagram: {e}"),
                    },
                    Err(e) => {
                        warn!("multicast ingest error: {e}, retrying in 5s");
                        ingest = None;
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        }
    }

    info!("aggregator subsystem stopped");
    Ok(())
}

fn default_for(ty: &crate::sensor::SensorType) -> SensorValue {
    use crate::sensor::SensorType;
    match ty {
        SensorType::Float => SensorValue::Float(0.0),
        SensorType::Int => SensorValue::Int(0),
        SensorType::Bool => SensorValue::Bool(false),
        SensorType::String | SensorType::Discrete { .. } => SensorValue::String(String::new()),
    }
}

/// Reads one datagram, then drains any further already-buffered datagrams
/// without blocking, keeping only the latest — the coalescing-latest policy
/// `StatusCatcherThread.run` implements with a zero-timeout `select`.
async fn recv_latest(socket: &UdpSocket) -> io::Result<Vec<u8>> {
    let mut buf = vec![0u8; 1 << 17];
    let n = socket.recv(&mut buf).await?;
    buf.truncate(n);
    loop {
        let mut next = vec![0u8; 1 << 17];
        match socket.try_recv(&mut next) {
            Ok(n) => {
                next.truncate(n);
                buf = next;
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) => return Err(e),
        }
    }
    Ok(buf)
}

#[instrument(skip_all)]
async fn update_projection(state: &AggregatorState) {
    let Some(data) = state.latest.lock().await.clone() else {
        debug!("no status data received yet, skipping projection tick");
        return;
    };
    for entry in state.projection.iter() {
        match (entry.extract)(&data) {
            Some(value) => {
                state
                    .sensors
                    .set_value(entry.name, value, Some(SensorStatus::Nominal))
                    .await
                    .ok();
            }
            None => warn!("projection entry '{}' could not be extracted", entry.name),
        }
    }
}

/// Serves one client connection. The read/write halves are split so a
/// `sensor-sampling` subscription can push `#sensor-status` informs
/// concurrently with ordinary request/reply traffic on the same socket, the
/// same duplex a real katcp `DeviceServer` offers remote Controller-style
/// subscribers watching the Aggregator's sensor tree with the `event`
/// sampling strategy.
async fn serve_connection(stream: tokio::net::TcpStream, state: AggregatorState) {
    let (mut reader, writer) = Connection::new(stream).split();
    let mut subscriptions: std::collections::HashMap<String, crate::sensor::ListenerHandle> =
        std::collections::HashMap::new();
    loop {
        match reader.recv().await {
            Ok(Some(KatcpMessage::Request { name, args })) if name == "sensor-sampling" => {
                let reply = handle_sensor_sampling(&state, &writer, &mut subscriptions, &args).await;
                if writer.send(reply).await.is_err() {
                    break;
                }
            }
            Ok(Some(KatcpMessage::Request { name, args })) => {
                let reply = handle_request(&state, &name, &args).await;
                if writer.send(reply).await.is_err() {
                    break;
                }
            }
            Ok(Some(_)) => continue,
            Ok(None) => break,
            Err(e) => {
                warn!("aggregator connection error: {e}");
                break;
            }
        }
    }
    for handle in subscriptions.into_values() {
        state.sensors.unregister_listener(handle).await;
    }
}

/// `?sensor-sampling <name> none|event` — registers (or cancels) an event
/// listener on the named sensor and spawns a forwarder task that turns each
/// [`crate::sensor::SensorEvent`] into a `#sensor-status` inform pushed down
/// `writer`. Re-subscribing replaces the previous subscription for that name.
async fn handle_sensor_sampling(
    state: &AggregatorState,
    writer: &crate::katcp::ConnectionWriter,
    subscriptions: &mut std::collections::HashMap<String, crate::sensor::ListenerHandle>,
    args: &[String],
) -> KatcpMessage {
    let (Some(sensor_name), Some(strategy)) = (args.first(), args.get(1)) else {
        return KatcpMessage::fail_reply("sensor-sampling", "expected <name> <strategy>");
    };

    if let Some(handle) = subscriptions.remove(sensor_name) {
        state.sensors.unregister_listener(handle).await;
    }

    match strategy.as_str() {
        "none" => KatcpMessage::ok_reply("sensor-sampling", vec![sensor_name.clone(), "none".to_owned()]),
        "event" => {
            let (tx, mut rx) = tokio::sync::mpsc::channel(32);
            let handle = match state
                .sensors
                .register_listener(sensor_name.clone(), crate::sensor::SamplingStrategy::Event, tx)
                .await
            {
                Ok(handle) => handle,
                Err(e) => return KatcpMessage::fail_reply("sensor-sampling", e.to_string()),
            };
            subscriptions.insert(sensor_name.clone(), handle);

            let writer = writer.clone();
            tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    let inform = KatcpMessage::inform(
                        "sensor-status",
                        vec![
                            event.name,
                            event.timestamp.to_rfc3339(),
                            event.status.to_string(),
                            event.value.to_string(),
                        ],
                    );
                    if writer.send(inform).await.is_err() {
                        break;
                    }
                }
            });

            KatcpMessage::ok_reply("sensor-sampling", vec![sensor_name.clone(), "event".to_owned()])
        }
        other => KatcpMessage::fail_reply("sensor-sampling", format!("unsupported strategy '{other}'")),
    }
}

async fn handle_request(state: &AggregatorState, name: &str, args: &[String]) -> KatcpMessage {
    match name {
        "sensor-value" => match args.first() {
            Some(sensor_name) => match state.sensors.get_reading(sensor_name.clone()).await {
                Ok((ts, status, value)) => KatcpMessage::ok_reply(
                    name,
                    vec![ts.to_rfc3339(), status.to_string(), value.to_string()],
                ),
                Err(e) => KatcpMessage::fail_reply(name, e.to_string()),
            },
            None => KatcpMessage::fail_reply(name, "missing sensor name argument"),
        },
        "sensor-snapshot" => {
            let names: Vec<&str> = args.iter().map(String::as_str).collect();
            let snapshot = state.sensors.snapshot(&names).await;
            match pack_dict(&snapshot) {
                Ok(packed) => KatcpMessage::ok_reply(name, vec![packed]),
                Err(e) => KatcpMessage::fail_reply(name, e.to_string()),
            }
        }
        "sensor-set" => {
            let (Some(sensor_name), Some(raw_value)) = (args.first(), args.get(1)) else {
                return KatcpMessage::fail_reply(name, "expected <name> <value>");
            };
            match state.projection.iter().find(|e| e.name == sensor_name.as_str()) {
                Some(entry) => match parse_typed(&entry.ty, raw_value) {
                    Ok(value) => match state
                        .sensors
                        .set_value(sensor_name.clone(), value, Some(SensorStatus::Nominal))
                        .await
                    {
                        Ok(()) => KatcpMessage::ok_reply(name, vec!["set".to_owned()]),
                        Err(e) => KatcpMessage::fail_reply(name, e.to_string()),
                    },
                    Err(e) => KatcpMessage::fail_reply(name, e),
                },
                None => KatcpMessage::fail_reply(name, format!("no such sensor '{sensor_name}'")),
            }
        }
        "json" => {
            let Some(data) = state.latest.lock().await.clone() else {
                return KatcpMessage::fail_reply(name, "data not yet initialised by catcher");
            };
            KatcpMessage::ok_reply(name, vec![escape_string(&data.to_string())])
        }
        "xml" => {
            let Some(data) = state.latest.lock().await.clone() else {
                return KatcpMessage::fail_reply(name, "data not yet initialised by catcher");
            };
            KatcpMessage::ok_reply(name, vec![escape_string(&to_xml(&state.projection, &data))])
        }
        other => KatcpMessage::fail_reply(name, format!("unknown request '{other}'")),
    }
}

/// Converts a raw `?sensor-set` string argument into a [`SensorValue`] using
/// the projection table's declared type for that sensor, used by the dummy
/// aggregator instance for replay/testing.
fn parse_typed(ty: &SensorType, raw: &str) -> Result<SensorValue, String> {
    match ty {
        SensorType::Float => raw.parse().map(SensorValue::Float).map_err(|e| e.to_string()),
        SensorType::Int => raw.parse().map(SensorValue::Int).map_err(|e| e.to_string()),
        SensorType::Bool => raw.parse().map(SensorValue::Bool).map_err(|e| e.to_string()),
        SensorType::String | SensorType::Discrete { .. } => Ok(SensorValue::String(raw.to_owned())),
    }
}

/// `?xml` support (supplemented feature): render the current projected
/// values as a flat `<status>` document instead of JSON, for legacy
/// consumers of the telescope status feed.
fn to_xml(projection: &[ProjectionEntry], data: &Value) -> String {
    let mut out = String::from("<status>");
    for entry in projection {
        if let Some(value) = (entry.extract)(data) {
            out.push_str(&format!(
                "<{name}>{value}</{name}>",
                name = entry.name,
                value = value
            ));
        }
    }
    out.push_str("</status>");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_typed_converts_per_declared_type() {
        assert_eq!(parse_typed(&SensorType::Float, "12.5"), Ok(SensorValue::Float(12.5)));
        assert_eq!(parse_typed(&SensorType::Int, "7"), Ok(SensorValue::Int(7)));
        assert_eq!(parse_typed(&SensorType::Bool, "true"), Ok(SensorValue::Bool(true)));
        assert_eq!(
            parse_typed(&SensorType::String, "J1234+5678"),
            Ok(SensorValue::String("J1234+5678".to_owned()))
        );
    }

    #[test]
    fn parse_typed_rejects_malformed_numbers() {
        assert!(parse_typed(&SensorType::Float, "not-a-number").is_err());
    }
}
