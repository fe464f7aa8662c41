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

//! The event side of the Aggregator connection: subscribes to the three
//! sensors the Observation Controller reacts to — scan number, sub-scan
//! number, observing flag — with the `event` sampling strategy and forwards
//! each `#sensor-status` inform as a typed [`SensorChange`] onto a channel
//! the controller actor selects on. Grounded on
//! `cam_server.py::EffController`'s `sensor.register_listener` calls for
//! `scannum`/`subscannum`/`status`, reworked into a single subscriber task
//! demultiplexing to the controller's serial work channel rather than
//! per-listener callbacks.

use crate::katcp::{Connection, KatcpMessage, ReplyStatus};
use std::{net::SocketAddr, time::Duration};
use tokio::{net::TcpStream, sync::mpsc};
use tracing::warn;

const SCAN_SENSORS: [&str; 3] = ["scannum", "subscannum", "observing"];

#[derive(Debug, Clone, Copy)]
pub enum SensorChange {
    ScanNumber(i64),
    SubScanNumber(i64),
    Observing(bool),
}

/// Joins the Aggregator's `scannum`/`subscannum`/`observing` event stream
/// and relays parsed changes on the returned channel. Reconnects with a 5s
/// backoff on any transport error, the same retry policy the Aggregator's
/// multicast ingest uses, applied here to the equivalent control-plane feed.
pub fn start(addr: SocketAddr) -> mpsc::Receiver<SensorChange> {
    let (tx, rx) = mpsc::channel(64);
    tokio::spawn(async move {
        loop {
            if let Err(e) = run_once(addr, &tx).await {
                warn!("aggregator sensor feed error: {e}, reconnecting in 5s");
            }
            if tx.is_closed() {
                return;
            }
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
    });
    rx
}

async fn run_once(addr: SocketAddr, tx: &mpsc::Sender<SensorChange>) -> Result<(), String> {
    let stream = TcpStream::connect(addr).await.map_err(|e| e.to_string())?;
    let mut conn = Connection::new(stream);

    for sensor in SCAN_SENSORS {
        conn.send(KatcpMessage::request(
            "sensor-sampling",
            vec![sensor.to_owned(), "event".to_owned()],
        ))
        .await
        .map_err(|e| e.to_string())?;
        loop {
            match conn.recv().await.map_err(|e| e.to_string())? {
                Some(KatcpMessage::Reply { name, status, .. }) if name == "sensor-sampling" => {
                    if status != ReplyStatus::Ok {
                        return Err(format!("subscription to '{sensor}' rejected"));
                    }
                    break;
                }
                Some(_) => continue,
                None => return Err("connection closed during subscription".to_owned()),
            }
        }
    }

    loop {
        match conn.recv().await.map_err(|e| e.to_string())? {
            Some(KatcpMessage::Inform { name, args }) if name == "sensor-status" => {
                if let Some(change) = parse_change(&args) {
                    if tx.send(change).await.is_err() {
                        return Ok(());
                    }
                }
            }
            Some(_) => continue,
            None => return Err("connection closed".to_owned()),
        }
    }
}

fn parse_change(args: &[String]) -> Option<SensorChange> {
    let sensor_name = args.first()?;
    let value = args.get(3)?;
    match sensor_name.as_str() {
        "scannum" => value.parse().ok().map(SensorChange::ScanNumber),
        "subscannum" => value.parse().ok().map(SensorChange::SubScanNumber),
        "observing" => value.parse().ok().map(SensorChange::Observing),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_sensor_changes() {
        let args = vec![
            "scannum".to_owned(),
            "2026-01-01T00:00:00Z".to_owned(),
            "nominal".to_owned(),
            "12".to_owned(),
        ];
        assert!(matches!(parse_change(&args), Some(SensorChange::ScanNumber(12))));
    }

    #[test]
    fn ignores_unrelated_sensors() {
        let args = vec![
            "azimuth".to_owned(),
            "2026-01-01T00:00:00Z".to_owned(),
            "nominal".to_owned(),
            "12.5".to_owned(),
        ];
        assert!(parse_change(&args).is_none());
    }
}
