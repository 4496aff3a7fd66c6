//! SeaTalk endpoints (experimental)
//!
//! A SeaTalk bus converted to a serial line, read with space parity
//! and PARMRK so the ninth (command) bit shows up as a parity-error
//! escape in the byte stream. Datagrams are reassembled and run
//! through the translate-or-drop table in `seamux_nmea::seatalk`;
//! whatever translates is pushed into the central queue as NMEA.
//!
//! Input only: nothing here can drive the bus, so `out` and `both`
//! are rejected at startup. Requires a serial device with working
//! MARK/SPACE parity, which rules out a number of USB adapters.

use std::os::fd::{AsRawFd, BorrowedFd};
use std::sync::Arc;

use nix::sys::termios::{self, ControlFlags, InputFlags, SetArg};
use tokio::io::AsyncReadExt;
use tokio_serial::SerialStream;
use tracing::warn;

use seamux_nmea::seatalk::{self, SeatalkCodec};

use seamux_core::{Direction, EndpointHandle, Registration, Router, StopRx};

use crate::config::EndpointSpec;
use crate::io::{check_options, queue_size, require, serial, AdapterError, PendingTask};

const OPTIONS: &[&str] = &["filename", "qsize"];

/// SeaTalk runs at 4800 baud, full stop.
const SEATALK_BAUD: u32 = 4800;

/// Bring up a SeaTalk endpoint.
pub fn init(router: &Arc<Router>, spec: &EndpointSpec) -> Result<Vec<PendingTask>, AdapterError> {
    check_options(spec, OPTIONS)?;
    let filename = require(spec, "filename")?;
    let _ = queue_size(spec)?; // validated; inputs share the central queue
    let name = format!("seatalk:{filename}");

    if spec.direction != Direction::In {
        return Err(AdapterError::Unsupported {
            kind: spec.kind,
            direction: spec.direction,
            reason: "writing to a SeaTalk bus is not supported",
        });
    }

    let stream = serial::open(filename, SEATALK_BAUD).map_err(|source| AdapterError::Serial {
        name: name.clone(),
        source,
    })?;
    configure_line(&stream).map_err(|errno| AdapterError::Io {
        name: name.clone(),
        source: std::io::Error::from(errno),
    })?;

    let ep = router.register(Registration {
        name,
        kind: spec.kind,
        direction: Direction::In,
        qsize: 0,
    });
    Ok(vec![PendingTask::new(
        ep.handle.id(),
        seatalk_input(ep.handle, stream, ep.stop),
    )])
}

/// Switch the line to space parity with parity marking.
///
/// A command byte carries the ninth bit set, so with space parity it
/// arrives as a parity error; PARMRK turns that into an `FF 00`
/// escape ahead of the byte, which is what the decoder keys on.
fn configure_line(stream: &SerialStream) -> nix::Result<()> {
    // The fd stays owned by the stream for the life of the endpoint.
    let fd = unsafe { BorrowedFd::borrow_raw(stream.as_raw_fd()) };

    let mut tio = termios::tcgetattr(fd)?;
    tio.input_flags |= InputFlags::IGNBRK | InputFlags::INPCK | InputFlags::PARMRK;
    tio.control_flags |= ControlFlags::PARENB | ControlFlags::CMSPAR;
    tio.control_flags &= !ControlFlags::PARODD;
    termios::tcsetattr(fd, SetArg::TCSAFLUSH, &tio)?;

    // Read back and check the flags stuck; adapters without
    // MARK/SPACE support quietly ignore CMSPAR.
    let applied = termios::tcgetattr(fd)?;
    if !applied.input_flags.contains(InputFlags::PARMRK)
        || !applied.control_flags.contains(ControlFlags::CMSPAR)
    {
        return Err(nix::errno::Errno::ENOTSUP);
    }
    Ok(())
}

/// Read the escaped byte stream, reassemble datagrams, translate or
/// drop.
async fn seatalk_input(handle: EndpointHandle, mut stream: SerialStream, mut stop: StopRx) {
    if !handle.promote() {
        handle.unlink();
        return;
    }

    let mut codec = SeatalkCodec::new();
    let mut buf = vec![0u8; 256];
    loop {
        tokio::select! {
            _ = stop.stopped() => break,
            result = stream.read(&mut buf) => match result {
                Ok(0) => break,
                Ok(n) => {
                    codec.push_bytes(&buf[..n]);
                    while let Some(datagram) = codec.next_datagram() {
                        if let Some(sentence) = seatalk::translate(&datagram) {
                            handle.push(&sentence);
                        }
                    }
                }
                Err(e) => {
                    warn!(endpoint = %handle.name(), error = %e, "read failed");
                    break;
                }
            }
        }
    }

    handle.unlink();
}
