//! Serial line endpoints
//!
//! NMEA-0183 talkers are RS-422 at 4800 baud; by the time they reach
//! us they are expected to be level-converted to something a serial
//! port can read. 8 data bits, no parity, one stop bit throughout.

use std::sync::Arc;

use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, SerialStream, StopBits};

use seamux_core::Router;

use crate::config::EndpointSpec;
use crate::io::{check_options, queue_size, require, stream_endpoints, AdapterError, PendingTask};

pub(crate) const DEFAULT_BAUD: u32 = 4800;

const OPTIONS: &[&str] = &["filename", "baud", "qsize"];

/// Bring up a serial endpoint.
pub fn init(router: &Arc<Router>, spec: &EndpointSpec) -> Result<Vec<PendingTask>, AdapterError> {
    check_options(spec, OPTIONS)?;
    let filename = require(spec, "filename")?;
    let baud = parse_baud(spec)?;
    let qsize = queue_size(spec)?;
    let name = format!("serial:{filename}");

    let stream = open(filename, baud).map_err(|source| AdapterError::Serial {
        name: name.clone(),
        source,
    })?;

    Ok(stream_endpoints(router, spec, name, qsize, stream))
}

/// Open a serial device in 8N1 mode.
pub(crate) fn open(path: &str, baud: u32) -> tokio_serial::Result<SerialStream> {
    tokio_serial::new(path, baud)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::None)
        .open_native_async()
}

/// Parse the `baud` option. NMEA-0183 devices run at 4800; AIS and
/// multiplexed feeds use 38400, and 9600 turns up in practice.
pub(crate) fn parse_baud(spec: &EndpointSpec) -> Result<u32, AdapterError> {
    match spec.option("baud") {
        None => Ok(DEFAULT_BAUD),
        Some("4800") => Ok(4800),
        Some("9600") => Ok(9600),
        Some("38400") => Ok(38400),
        Some(other) => Err(AdapterError::InvalidOption {
            kind: spec.kind,
            option: "baud",
            value: other.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_spec;

    #[test]
    fn baud_accepts_the_supported_rates() {
        for (arg, expect) in [("4800", 4800u32), ("9600", 9600), ("38400", 38400)] {
            let spec =
                parse_spec(&format!("serial:direction=in,filename=/dev/x,baud={arg}")).unwrap();
            assert_eq!(parse_baud(&spec).unwrap(), expect);
        }
    }

    #[test]
    fn baud_defaults_to_4800() {
        let spec = parse_spec("serial:direction=in,filename=/dev/x").unwrap();
        assert_eq!(parse_baud(&spec).unwrap(), DEFAULT_BAUD);
    }

    #[test]
    fn unsupported_baud_is_rejected() {
        let spec = parse_spec("serial:direction=in,filename=/dev/x,baud=115200").unwrap();
        assert!(parse_baud(&spec).is_err());
    }
}
