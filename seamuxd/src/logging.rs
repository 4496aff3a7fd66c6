//! Logging initialization
//!
//! In the foreground the daemon logs through a plain fmt layer on
//! stderr, honoring `RUST_LOG`-style filtering. In the background
//! stderr is gone, so log lines are sent to the local syslog daemon
//! instead: one RFC3164-style datagram per line, tagged with the
//! configured facility and a severity derived from the tracing level.

use std::io::{self, Write};
use std::os::unix::net::UnixDatagram;
use std::path::Path;
use std::sync::Arc;

use tracing::{Level, Metadata};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::facility::Facility;

const DEFAULT_FILTER: &str = "seamuxd=info,seamux_core=info,seamux_nmea=info";

/// Candidate syslog sockets, in preference order.
const SYSLOG_PATHS: &[&str] = &["/dev/log", "/var/run/syslog", "/var/run/log"];

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into())
}

/// Install the global subscriber.
pub fn init(background: bool, facility: Facility) {
    if background {
        match SyslogWriter::connect(facility) {
            Ok(writer) => {
                tracing_subscriber::registry()
                    .with(env_filter())
                    .with(
                        tracing_subscriber::fmt::layer()
                            .with_ansi(false)
                            .without_time() // syslogd stamps the line
                            .with_target(false)
                            .with_writer(writer),
                    )
                    .init();
                return;
            }
            Err(e) => {
                eprintln!("seamuxd: cannot reach syslog, logging to stderr: {e}");
            }
        }
    }
    tracing_subscriber::registry()
        .with(env_filter())
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

/// Syslog priority value: facility code ORed with severity.
fn priority(facility: Facility, severity: u8) -> u8 {
    facility.code() | severity
}

/// Map a tracing level to a syslog severity.
fn severity(level: Level) -> u8 {
    if level == Level::ERROR {
        3
    } else if level == Level::WARN {
        4
    } else if level == Level::INFO {
        6
    } else {
        7
    }
}

/// Sends each formatted log line to the local syslog socket.
pub struct SyslogWriter {
    socket: Arc<UnixDatagram>,
    facility: Facility,
}

impl SyslogWriter {
    /// Connect to the local syslog daemon.
    pub fn connect(facility: Facility) -> io::Result<Self> {
        let socket = UnixDatagram::unbound()?;
        for path in SYSLOG_PATHS {
            if Path::new(path).exists() {
                socket.connect(path)?;
                return Ok(Self {
                    socket: Arc::new(socket),
                    facility,
                });
            }
        }
        Err(io::Error::new(
            io::ErrorKind::NotFound,
            "no syslog socket found",
        ))
    }
}

impl<'a> MakeWriter<'a> for SyslogWriter {
    type Writer = SyslogLine;

    fn make_writer(&'a self) -> SyslogLine {
        SyslogLine::new(self.socket.clone(), priority(self.facility, 6))
    }

    fn make_writer_for(&'a self, meta: &Metadata<'_>) -> SyslogLine {
        SyslogLine::new(
            self.socket.clone(),
            priority(self.facility, severity(*meta.level())),
        )
    }
}

/// One log line, buffered and sent as a single datagram when dropped.
pub struct SyslogLine {
    socket: Arc<UnixDatagram>,
    buf: Vec<u8>,
}

impl SyslogLine {
    fn new(socket: Arc<UnixDatagram>, priority: u8) -> Self {
        let mut buf = Vec::with_capacity(256);
        let _ = write!(buf, "<{priority}>seamuxd[{}]: ", std::process::id());
        Self { socket, buf }
    }
}

impl Write for SyslogLine {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for SyslogLine {
    fn drop(&mut self) {
        while self.buf.last() == Some(&b'\n') {
            self.buf.pop();
        }
        let _ = self.socket.send(&self.buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn priority_encodes_facility_and_severity() {
        // daemon.err = 3*8 + 3
        assert_eq!(priority(Facility::DAEMON, severity(Level::ERROR)), 27);
        // local4.info = 20*8 + 6
        let local4 = Facility::from_str("local4").unwrap();
        assert_eq!(priority(local4, severity(Level::INFO)), 166);
    }

    #[test]
    fn severities_follow_syslog_order() {
        assert!(severity(Level::ERROR) < severity(Level::WARN));
        assert!(severity(Level::WARN) < severity(Level::INFO));
        assert!(severity(Level::INFO) < severity(Level::DEBUG));
        assert_eq!(severity(Level::DEBUG), severity(Level::TRACE));
    }
}
