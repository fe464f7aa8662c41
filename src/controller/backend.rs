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

//! Thin request-only clients the Observation Controller drives: one to the
//! Aggregator (sensor snapshots), one to the Backend Interface (the
//! `configure`/`start`/`stop`/`deconfigure` fan-out). Both wrap
//! [`KatcpClient`] the same way `servers/server.py`'s `ManagementNode` wraps
//! a `KATCPClientResource` per peer; neither owns the connection used for
//! push informs, which is [`super::feed::AggregatorFeed`]'s job.

use crate::{
    escape::{pack_dict, unpack_dict},
    error::{TransportError, TransportResult},
    katcp::{KatcpClient, ReplyStatus},
    pipeline::SensorSnapshot,
};
use serde_json::Value;
use std::net::SocketAddr;
use tokio::sync::Mutex;

const DEFAULT_TIMEOUT_SECS: u64 = 20;
const CONFIGURE_TIMEOUT_SECS: u64 = 30;

/// Read access to the Aggregator's sensor tree.
pub struct AggregatorClient {
    client: Mutex<KatcpClient>,
}

impl AggregatorClient {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            client: Mutex::new(KatcpClient::new(addr)),
        }
    }

    /// A typed snapshot of the named sensors, suitable for handing straight
    /// to a UBI `configure` call.
    pub async fn snapshot(&self, names: &[&str]) -> TransportResult<SensorSnapshot> {
        let mut client = self.client.lock().await;
        let args = names.iter().map(|n| (*n).to_owned()).collect();
        let outcome = client.request("sensor-snapshot", args, DEFAULT_TIMEOUT_SECS).await?;
        expect_ok(&outcome, "sensor-snapshot")?;
        let packed = outcome
            .args
            .first()
            .ok_or_else(|| TransportError::Protocol("sensor-snapshot reply missing packed document".to_owned()))?;
        unpack_dict(packed).map_err(|e| TransportError::Protocol(format!("malformed sensor snapshot: {e}")))
    }

    /// A single sensor's current raw string value, used for the scalar
    /// reads the scan handler performs before the fan-out (receiver,
    /// project, source name).
    pub async fn sensor_value(&self, name: &str) -> TransportResult<String> {
        let mut client = self.client.lock().await;
        let outcome = client
            .request("sensor-value", vec![name.to_owned()], DEFAULT_TIMEOUT_SECS)
            .await?;
        expect_ok(&outcome, "sensor-value")?;
        outcome
            .args
            .get(2)
            .cloned()
            .ok_or_else(|| TransportError::Protocol("sensor-value reply missing value field".to_owned()))
    }
}

/// The Backend Interface control surface the Controller drives directly:
/// `configure`/`start`/`stop`/`deconfigure`.
pub struct UbiClient {
    client: Mutex<KatcpClient>,
}

impl UbiClient {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            client: Mutex::new(KatcpClient::new(addr)),
        }
    }

    pub async fn configure(&self, config: &Value, sensors: &SensorSnapshot) -> TransportResult<()> {
        let config_packed =
            pack_dict(config).map_err(|e| TransportError::Protocol(format!("failed to pack config: {e}")))?;
        let sensors_packed =
            pack_dict(sensors).map_err(|e| TransportError::Protocol(format!("failed to pack sensors: {e}")))?;
        let mut client = self.client.lock().await;
        let outcome = client
            .request("configure", vec![config_packed, sensors_packed], CONFIGURE_TIMEOUT_SECS)
            .await?;
        expect_ok(&outcome, "configure")
    }

    pub async fn start(&self, sensors: &SensorSnapshot) -> TransportResult<()> {
        let sensors_packed =
            pack_dict(sensors).map_err(|e| TransportError::Protocol(format!("failed to pack sensors: {e}")))?;
        let mut client = self.client.lock().await;
        let outcome = client
            .request("start", vec![sensors_packed], DEFAULT_TIMEOUT_SECS)
            .await?;
        expect_ok(&outcome, "start")
    }

    pub async fn stop(&self) -> TransportResult<()> {
        let mut client = self.client.lock().await;
        let outcome = client.request("stop", Vec::new(), DEFAULT_TIMEOUT_SECS).await?;
        expect_ok(&outcome, "stop")
    }

    pub async fn deconfigure(&self) -> TransportResult<()> {
        let mut client = self.client.lock().await;
        let outcome = client.request("deconfigure", Vec::new(), DEFAULT_TIMEOUT_SECS).await?;
        expect_ok(&outcome, "deconfigure")
    }

    pub async fn device_status(&self) -> TransportResult<String> {
        let mut client = self.client.lock().await;
        let outcome = client.request("device-status", Vec::new(), DEFAULT_TIMEOUT_SECS).await?;
        expect_ok(&outcome, "device-status")?;
        Ok(outcome.args.first().cloned().unwrap_or_else(|| "unknown".to_owned()))
    }
}

fn expect_ok(outcome: &crate::katcp::RequestOutcome, verb: &str) -> TransportResult<()> {
    match outcome.status {
        ReplyStatus::Ok => Ok(()),
        _ => Err(TransportError::Protocol(format!(
            "{verb} failed: {}",
            outcome.args.join(" ")
        ))),
    }
}
