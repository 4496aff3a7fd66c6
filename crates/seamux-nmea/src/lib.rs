//! NMEA-0183 sentence support for seamux
//!
//! This crate provides the sentence-level protocol pieces shared by the
//! multiplexer core and the transport adapters:
//!
//! - [`SENMAX`], the maximum size of one sentence on the wire
//! - [`SentenceCodec`], an incremental CR-LF framer for byte streams
//! - [`seatalk`], an experimental decoder that reassembles SeaTalk
//!   datagrams from a PARMRK-escaped serial stream and translates the
//!   supported message classes to NMEA
//!
//! No I/O happens here; adapters feed bytes in and take frames out.

pub mod seatalk;
pub mod sentence;

pub use sentence::{checksum, SentenceCodec};

/// Maximum length of one NMEA-0183 sentence including the CR LF
/// terminator. Sentences that grow past this before their terminator
/// are discarded by the framer.
///
/// NMEA-0183 allows 82 characters; a little headroom is kept for
/// out-of-spec talkers seen in the wild.
pub const SENMAX: usize = 96;
