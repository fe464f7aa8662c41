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

//! A minimal katcp request client, grounded on the `KATCPClientResource`
//! wrapper `ManagementNode` keeps per backend node in `servers/server.py`:
//! one connection per peer, fan-out request/reply, informs collected
//! alongside the reply.

use super::{connection::Connection, message::{KatcpMessage, ReplyStatus}};
use crate::error::{TransportError, TransportResult};
use std::{net::SocketAddr, time::Duration};
use tokio::{net::TcpStream, time::timeout};
use tracing::instrument;

pub struct KatcpClient {
    addr: SocketAddr,
    conn: Option<Connection>,
}

/// Result of a completed request: status, trailing args, and any informs
/// emitted before the reply.
pub struct RequestOutcome {
    pub status: ReplyStatus,
    pub args: Vec<String>,
    pub informs: Vec<KatcpMessage>,
}

impl KatcpClient {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr, conn: None }
    }

    async fn ensure_connected(&mut self) -> TransportResult<&mut Connection> {
        if self.conn.is_none() {
            let stream = TcpStream::connect(self.addr).await.map_err(|e| {
                TransportError::Dropped {
                    node: self.addr.to_string(),
                    reason: e.to_string(),
                }
            })?;
            self.conn = Some(Connection::new(stream));
        }
        Ok(self.conn.as_mut().expect("just connected"))
    }

    /// Send `?name args...` and wait for `!name ...` up to `timeout_secs`,
    /// the node-probe deadline the backend interface calls in with.
    #[instrument(skip(self))]
    pub async fn request(
        &mut self,
        name: &str,
        args: Vec<String>,
        timeout_secs: u64,
    ) -> TransportResult<RequestOutcome> {
        let conn = self.ensure_connected().await?;
        conn.send(KatcpMessage::request(name, args)).await?;

        let mut informs = Vec::new();
        let deadline = Duration::from_secs(timeout_secs);
        loop {
            let msg = timeout(deadline, conn.recv())
                .await
                .map_err(|_| TransportError::Timeout {
                    node: self.addr.to_string(),
                    timeout_secs,
                })??;
            match msg {
                Some(KatcpMessage::Inform { name: n, args }) if n == name => {
                    informs.push(KatcpMessage::Inform { name: n, args });
                }
                Some(KatcpMessage::Inform { .. }) => continue,
                Some(KatcpMessage::Reply {
                    name: n,
                    status,
                    args,
                }) if n == name => {
                    return Ok(RequestOutcome {
                        status,
                        args,
                        informs,
                    });
                }
                Some(other) => {
                    return Err(TransportError::Protocol(format!(
                        "unexpected message while waiting for reply to '{name}': {other:?}"
                    )));
                }
                None => {
                    self.conn = None;
                    return Err(TransportError::Dropped {
                        node: self.addr.to_string(),
                        reason: "connection closed".to_owned(),
                    });
                }
            }
        }
    }
}
