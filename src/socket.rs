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

//! Socket construction shared by every service: a katcp TCP listener and, for
//! the telescope state aggregator, the multicast ingest socket. Grounded on
//! `socket.rs`'s `init_tcp_socket`/`create_ipv4_rx_socket`.

use crate::{
    config::{MulticastConfig, SocketConfig},
    error::ReynardResult,
};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tokio::net::{TcpListener, UdpSocket};
use tracing::{info, instrument};

/// Minimum receive buffer the aggregator's ingest socket is grown to (spec
/// §4.2): large enough that a burst of projection-table updates doesn't get
/// dropped by the kernel before the 1s tick drains it.
const MIN_RECV_BUFFER: usize = 32 * 1024;

#[instrument]
pub async fn bind_katcp_listener(config: &SocketConfig) -> ReynardResult<TcpListener> {
    let addr = SocketAddr::new(config.bind_address, config.port);
    let socket = Socket::new(
        match addr {
            SocketAddr::V4(_) => Domain::IPV4,
            SocketAddr::V6(_) => Domain::IPV6,
        },
        Type::STREAM,
        Some(Protocol::TCP),
    )?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&SockAddr::from(addr))?;
    socket.listen(1024)?;
    info!("katcp listener bound on {addr}");
    Ok(TcpListener::from_std(socket.into())?)
}

/// Joins the multicast group described by `config` and grows the receive
/// buffer to at least [`MIN_RECV_BUFFER`].
#[instrument]
pub async fn join_multicast(config: &MulticastConfig) -> ReynardResult<UdpSocket> {
    let interface = match config.interface {
        Some(IpAddr::V4(ip)) => ip,
        Some(IpAddr::V6(_)) => Ipv4Addr::UNSPECIFIED,
        None => Ipv4Addr::UNSPECIFIED,
    };

    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;

    if let Ok(current) = socket.recv_buffer_size() {
        if current < MIN_RECV_BUFFER {
            socket.set_recv_buffer_size(MIN_RECV_BUFFER)?;
        }
    }

    socket.join_multicast_v4(&config.group, &interface)?;
    let bind_addr = SocketAddr::new(IpAddr::V4(config.group), config.port);
    socket.bind(&SockAddr::from(bind_addr))?;

    info!(
        "joined multicast group {}:{} via interface {interface}",
        config.group, config.port
    );

    Ok(UdpSocket::from_std(socket.into())?)
}
