//! TCP endpoints
//!
//! Connect mode opens one stream to a remote multiplexer or
//! instrument server and is handled like any other byte stream
//! (`both` splits it into a pair). Listen mode serves one client at a
//! time: when the peer disconnects the endpoint goes back to
//! accepting, so a flaky client does not kill the endpoint. While no
//! client is connected an output endpoint discards its traffic, the
//! same lossy stance the queues take, and a listener never blocks
//! shutdown.

use std::sync::Arc;

use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use seamux_nmea::SentenceCodec;

use seamux_core::{Direction, EndpointHandle, Registration, Router, StopRx};

use crate::config::EndpointSpec;
use crate::io::{check_options, queue_size, require, stream_endpoints, AdapterError, PendingTask};

const OPTIONS: &[&str] = &["mode", "address", "port", "qsize"];

/// Bring up a TCP endpoint.
pub async fn init(
    router: &Arc<Router>,
    spec: &EndpointSpec,
) -> Result<Vec<PendingTask>, AdapterError> {
    check_options(spec, OPTIONS)?;
    let qsize = queue_size(spec)?;
    let port = parse_port(spec)?;

    match spec.option("mode").unwrap_or("connect") {
        "connect" => {
            let address = require(spec, "address")?;
            let name = format!("tcp:{address}:{port}");
            let stream = TcpStream::connect((address, port))
                .await
                .map_err(|source| AdapterError::Io {
                    name: name.clone(),
                    source,
                })?;
            Ok(stream_endpoints(router, spec, name, qsize, stream))
        }
        "listen" => {
            let bind = spec.option("address").unwrap_or("0.0.0.0");
            let name = format!("tcp:{bind}:{port}");
            let listener = TcpListener::bind((bind, port))
                .await
                .map_err(|source| AdapterError::Io {
                    name: name.clone(),
                    source,
                })?;

            let direction = match spec.direction {
                Direction::Both => {
                    return Err(AdapterError::Unsupported {
                        kind: spec.kind,
                        direction: spec.direction,
                        reason: "a listener serves one direction; configure two endpoints",
                    })
                }
                d => d,
            };
            let ep = router.register(Registration {
                name,
                kind: spec.kind,
                direction,
                qsize,
            });
            let task = match direction {
                Direction::In => {
                    PendingTask::new(ep.handle.id(), listen_input(ep.handle, listener, ep.stop))
                }
                _ => PendingTask::new(ep.handle.id(), listen_output(ep.handle, listener)),
            };
            Ok(vec![task])
        }
        other => Err(AdapterError::InvalidOption {
            kind: spec.kind,
            option: "mode",
            value: other.to_string(),
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

/// Accept clients one at a time and feed their sentences in.
async fn listen_input(handle: EndpointHandle, listener: TcpListener, mut stop: StopRx) {
    if !handle.promote() {
        handle.unlink();
        return;
    }

    let mut buf = vec![0u8; 1024];
    'accept: loop {
        let (mut conn, peer) = tokio::select! {
            _ = stop.stopped() => break,
            result = listener.accept() => match result {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(endpoint = %handle.name(), error = %e, "accept failed");
                    break;
                }
            }
        };
        info!(endpoint = %handle.name(), %peer, "client connected");

        let mut codec = SentenceCodec::new();
        loop {
            tokio::select! {
                _ = stop.stopped() => break 'accept,
                result = conn.read(&mut buf) => match result {
                    Ok(0) => {
                        info!(endpoint = %handle.name(), %peer, "client disconnected");
                        break;
                    }
                    Ok(n) => {
                        codec.push_bytes(&buf[..n]);
                        while let Some(sentence) = codec.next_sentence() {
                            handle.push(&sentence);
                        }
                    }
                    Err(e) => {
                        warn!(endpoint = %handle.name(), %peer, error = %e, "read failed");
                        break;
                    }
                }
            }
        }
    }

    handle.unlink();
}

/// Accept clients one at a time and write the stream to them.
async fn listen_output(handle: EndpointHandle, listener: TcpListener) {
    if !handle.promote() {
        handle.unlink();
        return;
    }

    'accept: loop {
        // With nobody connected, traffic is discarded rather than
        // queued without bound, and queue closure still ends the task.
        let (mut conn, peer) = tokio::select! {
            blk = handle.next() => match blk {
                None => break,
                Some(blk) => {
                    debug!(endpoint = %handle.name(), len = blk.len(), "no client, sentence discarded");
                    continue;
                }
            },
            result = listener.accept() => match result {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(endpoint = %handle.name(), error = %e, "accept failed");
                    break;
                }
            }
        };
        info!(endpoint = %handle.name(), %peer, "client connected");

        while let Some(blk) = handle.next().await {
            if let Err(e) = conn.write_all(blk.bytes()).await {
                info!(endpoint = %handle.name(), %peer, error = %e, "client went away");
                continue 'accept;
            }
        }
        break;
    }

    handle.unlink();
}
