//! Transport adapters
//!
//! One module per transport family. Each adapter's `init` opens its
//! system resources, registers its endpoint(s) with the router and
//! returns the task futures; the supervisor spawns them only after
//! every endpoint has been registered, so the initialization barrier
//! cannot release early.
//!
//! Stream-shaped transports (serial, pty, tcp connect, file) share
//! the generic read/write loops from the core; datagram and listener
//! shaped transports (broadcast, tcp listen, seatalk) drive the same
//! promote/push/unlink surface with their own loops.

pub mod broadcast;
pub mod file;
pub mod pty;
pub mod seatalk;
pub mod serial;
pub mod tcp;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

use seamux_core::{
    run_input, run_output, Direction, EndpointId, EndpointKind, Registration, Router,
    DEFAULT_QUEUE_SIZE, MIN_QUEUE_SIZE,
};

use crate::config::EndpointSpec;

/// Failure while bringing an endpoint up. All of these are
/// startup-fatal: the daemon reports them and exits non-zero.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("{kind}: missing required option '{option}'")]
    MissingOption {
        kind: EndpointKind,
        option: &'static str,
    },
    #[error("{kind}: invalid value '{value}' for option '{option}'")]
    InvalidOption {
        kind: EndpointKind,
        option: &'static str,
        value: String,
    },
    #[error("{kind}: unknown option '{option}'")]
    UnknownOption { kind: EndpointKind, option: String },
    #[error("{kind}: direction '{direction}' is not supported: {reason}")]
    Unsupported {
        kind: EndpointKind,
        direction: Direction,
        reason: &'static str,
    },
    #[error("{name}: {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{name}: {source}")]
    Serial {
        name: String,
        #[source]
        source: tokio_serial::Error,
    },
}

/// A registered endpoint's task, waiting to be spawned by the
/// supervisor.
pub struct PendingTask {
    pub id: EndpointId,
    pub task: Pin<Box<dyn Future<Output = ()> + Send + 'static>>,
}

impl PendingTask {
    pub(crate) fn new<F>(id: EndpointId, task: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            id,
            task: Box::pin(task),
        }
    }
}

/// Bring up the endpoint described by `spec`.
pub async fn init_endpoint(
    router: &Arc<Router>,
    spec: &EndpointSpec,
) -> Result<Vec<PendingTask>, AdapterError> {
    match spec.kind {
        EndpointKind::Serial => serial::init(router, spec),
        EndpointKind::Pty => pty::init(router, spec),
        EndpointKind::Tcp => tcp::init(router, spec).await,
        EndpointKind::Broadcast => broadcast::init(router, spec),
        EndpointKind::File => file::init(router, spec).await,
        EndpointKind::Seatalk => seatalk::init(router, spec),
    }
}

/// Reject options outside the adapter's key set.
pub(crate) fn check_options(spec: &EndpointSpec, allowed: &[&str]) -> Result<(), AdapterError> {
    for (key, _) in &spec.options {
        if !allowed.iter().any(|a| a.eq_ignore_ascii_case(key)) {
            return Err(AdapterError::UnknownOption {
                kind: spec.kind,
                option: key.clone(),
            });
        }
    }
    Ok(())
}

/// Fetch a required option.
pub(crate) fn require<'a>(
    spec: &'a EndpointSpec,
    option: &'static str,
) -> Result<&'a str, AdapterError> {
    spec.option(option).ok_or(AdapterError::MissingOption {
        kind: spec.kind,
        option,
    })
}

/// The endpoint's private queue size (`qsize` option, default 128).
pub(crate) fn queue_size(spec: &EndpointSpec) -> Result<usize, AdapterError> {
    match spec.option("qsize") {
        None => Ok(DEFAULT_QUEUE_SIZE),
        Some(value) => match value.parse::<usize>() {
            Ok(size) if size >= MIN_QUEUE_SIZE => Ok(size),
            _ => Err(AdapterError::InvalidOption {
                kind: spec.kind,
                option: "qsize",
                value: value.to_string(),
            }),
        },
    }
}

/// Register endpoint(s) over one bidirectional byte stream and build
/// their tasks. `both` splits the stream into a pair-linked In/Out
/// half sharing the transport.
pub(crate) fn stream_endpoints<S>(
    router: &Arc<Router>,
    spec: &EndpointSpec,
    name: String,
    qsize: usize,
    stream: S,
) -> Vec<PendingTask>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    match spec.direction {
        Direction::In => {
            let ep = router.register(Registration {
                name,
                kind: spec.kind,
                direction: Direction::In,
                qsize,
            });
            vec![PendingTask::new(
                ep.handle.id(),
                run_input(ep.handle, stream, ep.stop),
            )]
        }
        Direction::Out => {
            let ep = router.register(Registration {
                name,
                kind: spec.kind,
                direction: Direction::Out,
                qsize,
            });
            vec![PendingTask::new(ep.handle.id(), run_output(ep.handle, stream))]
        }
        Direction::Both => {
            let (read_half, write_half) = tokio::io::split(stream);
            let (input, output) = router.register_pair(name, spec.kind, qsize);
            vec![
                PendingTask::new(
                    input.handle.id(),
                    run_input(input.handle, read_half, input.stop),
                ),
                PendingTask::new(output.handle.id(), run_output(output.handle, write_half)),
            ]
        }
        // Config parsing only yields in/out/both.
        Direction::None => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_spec;

    #[test]
    fn unknown_option_is_rejected() {
        let spec = parse_spec("serial:direction=in,filename=/dev/x,parity=even").unwrap();
        let err = check_options(&spec, &["filename", "baud", "qsize"]).unwrap_err();
        assert!(err.to_string().contains("parity"));
    }

    #[test]
    fn queue_size_defaults_and_validates() {
        let spec = parse_spec("file:direction=out,filename=x").unwrap();
        assert_eq!(queue_size(&spec).unwrap(), DEFAULT_QUEUE_SIZE);

        let spec = parse_spec("file:direction=out,filename=x,qsize=32").unwrap();
        assert_eq!(queue_size(&spec).unwrap(), 32);

        let spec = parse_spec("file:direction=out,filename=x,qsize=1").unwrap();
        assert!(queue_size(&spec).is_err());

        let spec = parse_spec("file:direction=out,filename=x,qsize=lots").unwrap();
        assert!(queue_size(&spec).is_err());
    }

    #[test]
    fn missing_required_option_is_reported() {
        let spec = parse_spec("serial:direction=in,baud=4800").unwrap();
        let err = require(&spec, "filename").unwrap_err();
        assert!(err.to_string().contains("filename"));
    }
}
