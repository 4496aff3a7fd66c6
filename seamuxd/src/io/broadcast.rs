//! UDP broadcast endpoints
//!
//! The usual way to put NMEA on a boat network: one datagram per
//! sentence to the broadcast address, or listening on a port for
//! datagrams from other talkers. Datagrams are inherently lossy and
//! unordered, which matches the multiplexer's lossy queue stance, so
//! send failures are logged and skipped rather than fatal.
//!
//! Broadcast is datagram-shaped, not stream-shaped: `direction=both`
//! would read back our own broadcasts and is rejected.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tracing::warn;

use seamux_nmea::SentenceCodec;

use seamux_core::{Direction, EndpointHandle, Registration, Router, StopRx};

use crate::config::EndpointSpec;
use crate::io::{check_options, queue_size, require, AdapterError, PendingTask};

const OPTIONS: &[&str] = &["address", "port", "qsize"];

const DEFAULT_BROADCAST: Ipv4Addr = Ipv4Addr::BROADCAST;

/// Bring up a broadcast endpoint.
pub fn init(router: &Arc<Router>, spec: &EndpointSpec) -> Result<Vec<PendingTask>, AdapterError> {
    check_options(spec, OPTIONS)?;
    let qsize = queue_size(spec)?;
    let port = parse_port(spec)?;
    let address = parse_address(spec)?;

    match spec.direction {
        Direction::Out => {
            let target = SocketAddr::V4(SocketAddrV4::new(
                address.unwrap_or(DEFAULT_BROADCAST),
                port,
            ));
            let name = format!("broadcast:{target}");
            let socket = open_socket(&name, SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0)), true)?;
            let ep = router.register(Registration {
                name,
                kind: spec.kind,
                direction: Direction::Out,
                qsize,
            });
            Ok(vec![PendingTask::new(
                ep.handle.id(),
                broadcast_output(ep.handle, socket, target),
            )])
        }
        Direction::In => {
            let bind = SocketAddr::V4(SocketAddrV4::new(
                address.unwrap_or(Ipv4Addr::UNSPECIFIED),
                port,
            ));
            let name = format!("broadcast:{bind}");
            let socket = open_socket(&name, bind, false)?;
            let ep = router.register(Registration {
                name,
                kind: spec.kind,
                direction: Direction::In,
                qsize,
            });
            Ok(vec![PendingTask::new(
                ep.handle.id(),
                broadcast_input(ep.handle, socket, ep.stop),
            )])
        }
        direction => Err(AdapterError::Unsupported {
            kind: spec.kind,
            direction,
            reason: "datagrams have no stream to split; configure separate in and out endpoints",
        }),
    }
}

fn parse_port(spec: &EndpointSpec) -> Result<u16, AdapterError> {
    let value = require(spec, "port")?;
    value.parse::<u16>().map_err(|_| AdapterError::InvalidOption {
        kind: spec.kind,
        option: "port",
        value: value.to_string(),
    })
}

fn parse_address(spec: &EndpointSpec) -> Result<Option<Ipv4Addr>, AdapterError> {
    match spec.option("address") {
        None => Ok(None),
        Some(value) => value
            .parse::<Ipv4Addr>()
            .map(Some)
            .map_err(|_| AdapterError::InvalidOption {
                kind: spec.kind,
                option: "address",
                value: value.to_string(),
            }),
    }
}

/// Build a UDP socket bound to `bind`, broadcast-capable when asked.
fn open_socket(name: &str, bind: SocketAddr, broadcast: bool) -> Result<UdpSocket, AdapterError> {
    let io_err = |source| AdapterError::Io {
        name: name.to_string(),
        source,
    };

    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).map_err(io_err)?;
    socket.set_reuse_address(true).map_err(io_err)?;
    if broadcast {
        socket.set_broadcast(true).map_err(io_err)?;
    }
    socket.set_nonblocking(true).map_err(io_err)?;
    socket.bind(&bind.into()).map_err(io_err)?;

    let socket: std::net::UdpSocket = socket.into();
    UdpSocket::from_std(socket).map_err(io_err)
}

/// Receive datagrams and frame the sentences inside them.
async fn broadcast_input(handle: EndpointHandle, socket: UdpSocket, mut stop: StopRx) {
    if !handle.promote() {
        handle.unlink();
        return;
    }

    let mut codec = SentenceCodec::new();
    let mut buf = vec![0u8; 2048];
    loop {
        tokio::select! {
            _ = stop.stopped() => break,
            result = socket.recv_from(&mut buf) => match result {
                Ok((n, _peer)) => {
                    codec.push_bytes(&buf[..n]);
                    while let Some(sentence) = codec.next_sentence() {
                        handle.push(&sentence);
                    }
                }
                Err(e) => {
                    // Transient UDP errors (ICMP backwash) are noise.
                    warn!(endpoint = %handle.name(), error = %e, "receive failed");
                }
            }
        }
    }

    handle.unlink();
}

/// Send each sentence as one datagram to the broadcast target.
async fn broadcast_output(handle: EndpointHandle, socket: UdpSocket, target: SocketAddr) {
    if !handle.promote() {
        handle.unlink();
        return;
    }

    while let Some(blk) = handle.next().await {
        if let Err(e) = socket.send_to(blk.bytes(), target).await {
            warn!(endpoint = %handle.name(), error = %e, "send failed");
        }
    }

    handle.unlink();
}
