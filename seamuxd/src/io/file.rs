//! File endpoints
//!
//! Reading a file replays its sentences and ends the endpoint at EOF;
//! writing appends sentences as they arrive. `filename = -` means
//! stdin or stdout, which is how the daemon slots into shell
//! pipelines. A file flows one way, so `both` is rejected.

use std::sync::Arc;

use tokio::fs::OpenOptions;

use seamux_core::{run_input, run_output, Direction, Registration, Router};

use crate::config::EndpointSpec;
use crate::io::{check_options, queue_size, require, AdapterError, PendingTask};

const OPTIONS: &[&str] = &["filename", "qsize"];

/// Bring up a file endpoint.
pub async fn init(
    router: &Arc<Router>,
    spec: &EndpointSpec,
) -> Result<Vec<PendingTask>, AdapterError> {
    check_options(spec, OPTIONS)?;
    let filename = require(spec, "filename")?;
    let qsize = queue_size(spec)?;
    let name = format!("file:{filename}");
    let io_err = |source| AdapterError::Io {
        name: name.clone(),
        source,
    };

    let direction = match spec.direction {
        Direction::Both => {
            return Err(AdapterError::Unsupported {
                kind: spec.kind,
                direction: spec.direction,
                reason: "a file flows one way; configure separate in and out endpoints",
            })
        }
        d => d,
    };
    let register = |name: String| {
        router.register(Registration {
            name,
            kind: spec.kind,
            direction,
            qsize,
        })
    };

    let task = match (direction, filename) {
        (Direction::In, "-") => {
            let ep = register(name.clone());
            PendingTask::new(ep.handle.id(), run_input(ep.handle, tokio::io::stdin(), ep.stop))
        }
        (Direction::In, path) => {
            let file = tokio::fs::File::open(path).await.map_err(io_err)?;
            let ep = register(name.clone());
            PendingTask::new(ep.handle.id(), run_input(ep.handle, file, ep.stop))
        }
        (_, "-") => {
            let ep = register(name.clone());
            PendingTask::new(ep.handle.id(), run_output(ep.handle, tokio::io::stdout()))
        }
        (_, path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .await
                .map_err(io_err)?;
            let ep = register(name.clone());
            PendingTask::new(ep.handle.id(), run_output(ep.handle, file))
        }
    };
    Ok(vec![task])
}
