//! seamuxd: NMEA-0183 multiplexing daemon
//!
//! Reads sentence streams from any mix of serial lines, pseudo
//! terminals, TCP peers, UDP broadcast, files and (experimentally)
//! SeaTalk, merges them, and fans the merged stream out to any mix of
//! the same. Endpoints come from a config file, inline command line
//! specifications, or both:
//!
//! ```text
//! seamuxd serial:filename=/dev/ttyUSB0,direction=in \
//!         broadcast:direction=out,port=10110
//! seamuxd -f /etc/kplex.conf -b
//! ```
//!
//! Exit status is 0 after a clean shutdown and 1 for any
//! configuration or startup failure.

mod config;
mod facility;
mod io;
mod logging;
mod supervisor;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use thiserror::Error;
use tracing::{error, info};

use seamux_core::{Router, DEFAULT_QUEUE_SIZE, MIN_QUEUE_SIZE};

use crate::config::{ConfigError, GlobalConfig};
use crate::facility::Facility;
use crate::io::AdapterError;

/// NMEA-0183 multiplexing daemon.
#[derive(Parser, Debug)]
#[command(name = "seamuxd")]
#[command(about = "Any-to-any NMEA-0183 multiplexer for boat data")]
#[command(version)]
struct Args {
    /// Detach and run in the background
    #[arg(short = 'b')]
    background: bool,

    /// Syslog facility for background logging
    #[arg(short = 'l', value_name = "FACILITY")]
    logto: Option<String>,

    /// Central queue size in sentences (minimum 2)
    #[arg(short = 'q', value_name = "SIZE")]
    qsize: Option<usize>,

    /// Configuration file; -f- runs without one
    #[arg(short = 'f', value_name = "FILE")]
    config: Option<String>,

    /// Inline endpoint specifications: type:key=value,key=value,...
    #[arg(value_name = "SPEC")]
    specs: Vec<String>,
}

#[derive(Debug, Error)]
enum DaemonError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Adapter(#[from] AdapterError),
    #[error("unknown log facility '{0}'")]
    Facility(String),
    #[error("minimum queue size is {MIN_QUEUE_SIZE}")]
    QueueSize,
    #[error("failed to detach: {0}")]
    Daemonize(nix::errno::Errno),
    #[error("failed to start runtime: {0}")]
    Runtime(std::io::Error),
}

fn main() -> ExitCode {
    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            // When already detached, stderr is gone but the
            // subscriber still reaches syslog.
            error!("{e}");
            eprintln!("seamuxd: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<(), DaemonError> {
    let cli_facility = args
        .logto
        .as_deref()
        .map(|name| {
            name.parse::<Facility>()
                .map_err(|()| DaemonError::Facility(name.to_string()))
        })
        .transpose()?;
    if let Some(qsize) = args.qsize {
        if qsize < MIN_QUEUE_SIZE {
            return Err(DaemonError::QueueSize);
        }
    }

    let config_path = match args.config.as_deref() {
        Some("-") => None,
        Some(path) => Some(PathBuf::from(path)),
        None => config::default_config_path(),
    };
    let (global, mut endpoints) = match &config_path {
        Some(path) => config::parse_file(path)?,
        None => (GlobalConfig::default(), Vec::new()),
    };
    for spec in &args.specs {
        endpoints.push(config::parse_spec(spec)?);
    }

    // Command line beats config file.
    let qsize = args.qsize.or(global.qsize).unwrap_or(DEFAULT_QUEUE_SIZE);
    let background = args.background || global.background;
    let facility = cli_facility.or(global.facility).unwrap_or(Facility::DAEMON);

    // Detach before opening any endpoint descriptor, so none get
    // pulled out from under a config that named stdin or stdout.
    // Startup errors from here on are only visible through syslog.
    if background {
        nix::unistd::daemon(false, false).map_err(DaemonError::Daemonize)?;
        nix::sys::stat::umask(nix::sys::stat::Mode::empty());
    }
    logging::init(background, facility);
    info!(
        version = env!("CARGO_PKG_VERSION"),
        qsize,
        endpoints = endpoints.len(),
        config = %config_path.as_deref().map(|p| p.display().to_string()).unwrap_or_else(|| "<none>".into()),
        "seamuxd starting"
    );

    let runtime = tokio::runtime::Runtime::new().map_err(DaemonError::Runtime)?;
    runtime.block_on(async {
        let router = Router::new(qsize);
        supervisor::run(router, endpoints).await
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_all_flags() {
        let args = Args::try_parse_from([
            "seamuxd",
            "-b",
            "-l",
            "local3",
            "-q",
            "64",
            "-f",
            "/etc/kplex.conf",
            "serial:filename=/dev/ttyUSB0,direction=in",
            "file:direction=out,filename=-",
        ])
        .unwrap();

        assert!(args.background);
        assert_eq!(args.logto.as_deref(), Some("local3"));
        assert_eq!(args.qsize, Some(64));
        assert_eq!(args.config.as_deref(), Some("/etc/kplex.conf"));
        assert_eq!(args.specs.len(), 2);
    }

    #[test]
    fn dash_f_dash_means_no_config_file() {
        let args = Args::try_parse_from(["seamuxd", "-f-"]).unwrap();
        assert_eq!(args.config.as_deref(), Some("-"));
    }

    #[test]
    fn defaults_are_foreground_and_empty() {
        let args = Args::try_parse_from(["seamuxd"]).unwrap();
        assert!(!args.background);
        assert!(args.logto.is_none());
        assert!(args.qsize.is_none());
        assert!(args.specs.is_empty());
    }
}
