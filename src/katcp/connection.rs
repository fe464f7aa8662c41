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

use super::{codec::KatcpCodec, message::KatcpMessage};
use crate::error::TransportResult;
use futures::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

/// One katcp connection: a request/reply/inform stream over a TCP socket.
pub struct Connection {
    framed: Framed<TcpStream, KatcpCodec>,
}

impl Connection {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            framed: Framed::new(stream, KatcpCodec::default()),
        }
    }

    pub async fn recv(&mut self) -> TransportResult<Option<KatcpMessage>> {
        match self.framed.next().await {
            Some(msg) => msg.map(Some),
            None => Ok(None),
        }
    }

    pub async fn send(&mut self, msg: KatcpMessage) -> TransportResult<()> {
        self.framed.send(msg).await
    }

    /// Splits the connection into independent read/write halves so a
    /// connection handler can push unsolicited informs (sensor-sampling
    /// events) concurrently with serving requests on the same socket.
    pub fn split(self) -> (ConnectionReader, ConnectionWriter) {
        let (sink, stream) = self.framed.split();
        (
            ConnectionReader { stream },
            ConnectionWriter {
                sink: std::sync::Arc::new(tokio::sync::Mutex::new(sink)),
            },
        )
    }
}

impl From<TcpStream> for Connection {
    fn from(stream: TcpStream) -> Self {
        Self::new(stream)
    }
}

pub struct ConnectionReader {
    stream: SplitStream<Framed<TcpStream, KatcpCodec>>,
}

impl ConnectionReader {
    pub async fn recv(&mut self) -> TransportResult<Option<KatcpMessage>> {
        match self.stream.next().await {
            Some(msg) => msg.map(Some),
            None => Ok(None),
        }
    }
}

#[derive(Clone)]
pub struct ConnectionWriter {
    sink: std::sync::Arc<tokio::sync::Mutex<SplitSink<Framed<TcpStream, KatcpCodec>, KatcpMessage>>>,
}

impl ConnectionWriter {
    pub async fn send(&self, msg: KatcpMessage) -> TransportResult<()> {
        self.sink.lock().await.send(msg).await
    }
}
