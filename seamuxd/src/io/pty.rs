//! Pseudo-terminal endpoints
//!
//! Master mode allocates a fresh pty pair and hands the master side to
//! the multiplexer; external programs talk to the slave device. The
//! slave descriptor is kept open for the life of the endpoint so the
//! master never sees EOF while external readers come and go. When a
//! `filename` is configured it is maintained as a symlink to the
//! slave device (an existing symlink is replaced; any other file is
//! left alone and treated as a startup error).
//!
//! Slave mode opens an existing pty slave by path and is handled like
//! a serial line.

use std::sync::Arc;

use tokio::io::split;
use tokio_serial::{SerialPort, SerialStream};
use tracing::warn;

use seamux_core::{run_input, run_output, Direction, Registration, Router};

use crate::config::EndpointSpec;
use crate::io::{check_options, queue_size, require, serial, stream_endpoints, AdapterError, PendingTask};

const OPTIONS: &[&str] = &["mode", "filename", "baud", "qsize"];

/// Bring up a pty endpoint.
pub fn init(router: &Arc<Router>, spec: &EndpointSpec) -> Result<Vec<PendingTask>, AdapterError> {
    check_options(spec, OPTIONS)?;
    let baud = serial::parse_baud(spec)?;
    let qsize = queue_size(spec)?;

    match spec.option("mode").unwrap_or("master") {
        "slave" => {
            // No different from a serial line.
            let filename = require(spec, "filename")?;
            let name = format!("pty:{filename}");
            let stream = serial::open(filename, baud).map_err(|source| AdapterError::Serial {
                name: name.clone(),
                source,
            })?;
            Ok(stream_endpoints(router, spec, name, qsize, stream))
        }
        "master" => init_master(router, spec, baud, qsize),
        other => Err(AdapterError::InvalidOption {
            kind: spec.kind,
            option: "mode",
            value: other.to_string(),
        }),
    }
}

fn init_master(
    router: &Arc<Router>,
    spec: &EndpointSpec,
    baud: u32,
    qsize: usize,
) -> Result<Vec<PendingTask>, AdapterError> {
    let (master, slave) = SerialStream::pair().map_err(|source| AdapterError::Serial {
        name: "pty".to_string(),
        source,
    })?;
    let slave_path = slave
        .name()
        .unwrap_or_else(|| "<unnamed pty>".to_string());

    let name = if let Some(link) = spec.option("filename") {
        install_symlink(link, &slave_path)?;
        format!("pty:{link}")
    } else {
        // Nothing points at the slave device, so tell the operator
        // where to find it.
        println!("slave pty for {} at {} baud is {}", spec.direction, baud, slave_path);
        format!("pty:{slave_path}")
    };

    // A pty ignores line speed; the configured baud only documents
    // what external programs should expect.

    Ok(match spec.direction {
        Direction::In => {
            let ep = router.register(Registration {
                name,
                kind: spec.kind,
                direction: Direction::In,
                qsize,
            });
            vec![PendingTask::new(ep.handle.id(), async move {
                let _slave = slave;
                run_input(ep.handle, master, ep.stop).await;
            })]
        }
        Direction::Out => {
            let ep = router.register(Registration {
                name,
                kind: spec.kind,
                direction: Direction::Out,
                qsize,
            });
            vec![PendingTask::new(ep.handle.id(), async move {
                let _slave = slave;
                run_output(ep.handle, master).await;
            })]
        }
        Direction::Both => {
            let (read_half, write_half) = split(master);
            let (input, output) = router.register_pair(name, spec.kind, qsize);
            vec![
                // The input half owns the slave keep-alive descriptor.
                PendingTask::new(input.handle.id(), async move {
                    let _slave = slave;
                    run_input(input.handle, read_half, input.stop).await;
                }),
                PendingTask::new(output.handle.id(), run_output(output.handle, write_half)),
            ]
        }
        Direction::None => Vec::new(),
    })
}

/// Point `link` at the slave device, replacing only an existing
/// symlink.
fn install_symlink(link: &str, target: &str) -> Result<(), AdapterError> {
    let io_err = |source| AdapterError::Io {
        name: format!("pty:{link}"),
        source,
    };

    match std::fs::symlink_metadata(link) {
        Ok(meta) if meta.file_type().is_symlink() => {
            std::fs::remove_file(link).map_err(io_err)?;
        }
        Ok(_) => {
            return Err(io_err(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                "exists and is not a symbolic link",
            )));
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            warn!(link, error = %e, "could not examine symlink target");
        }
    }
    std::os::unix::fs::symlink(target, link).map_err(io_err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symlink_replaces_existing_symlink() {
        let dir = tempfile::tempdir().unwrap();
        let link = dir.path().join("nmea");
        std::os::unix::fs::symlink("/dev/null", &link).unwrap();

        install_symlink(link.to_str().unwrap(), "/dev/zero").unwrap();
        assert_eq!(
            std::fs::read_link(&link).unwrap().to_str().unwrap(),
            "/dev/zero"
        );
    }

    #[test]
    fn symlink_refuses_to_replace_regular_file() {
        let dir = tempfile::tempdir().unwrap();
        let link = dir.path().join("nmea");
        std::fs::write(&link, "not a link").unwrap();

        let err = install_symlink(link.to_str().unwrap(), "/dev/zero").unwrap_err();
        assert!(err.to_string().contains("not a symbolic link"));
        assert_eq!(std::fs::read_to_string(&link).unwrap(), "not a link");
    }

    #[test]
    fn symlink_creates_fresh_link() {
        let dir = tempfile::tempdir().unwrap();
        let link = dir.path().join("nmea");

        install_symlink(link.to_str().unwrap(), "/dev/null").unwrap();
        assert!(std::fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
    }
}
