//! Endpoint identity and task loops
//!
//! An endpoint is one configured I/O participant. The router owns the
//! bookkeeping record; the endpoint's spawned task owns the transport
//! and drives it through an [`EndpointHandle`]. Every task has the
//! same skeleton regardless of transport:
//!
//! ```text
//! promote → read or write loop → unlink
//! ```
//!
//! [`run_input`] and [`run_output`] implement that skeleton for any
//! `AsyncRead` / `AsyncWrite` transport; adapters with a custom loop
//! (datagrams, SeaTalk) call the same handle methods themselves.
//! `unlink` runs on every exit path (normal end of stream, I/O
//! error, or stop request), so a task can never leave its record
//! behind on an active list.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use seamux_nmea::SentenceCodec;

use crate::queue::SentenceQueue;
use crate::router::Router;
use crate::senblk::SenBlk;

/// Unique identifier for an endpoint within one router.
///
/// Ids are never reused, so a stored id (a sentence source tag, a
/// pair link) can go stale but can never point at the wrong endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EndpointId(pub u32);

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Which way sentences flow through an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Produces sentences into the central queue.
    In,
    /// Consumes sentences from its private queue.
    Out,
    /// Bidirectional; split into an In/Out pair at registration.
    Both,
    /// Scheduled for quiet exit; the task must stop without joining
    /// an active list.
    None,
}

impl FromStr for Direction {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("in") {
            Ok(Direction::In)
        } else if s.eq_ignore_ascii_case("out") {
            Ok(Direction::Out)
        } else if s.eq_ignore_ascii_case("both") {
            Ok(Direction::Both)
        } else {
            Err(())
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::In => "in",
            Direction::Out => "out",
            Direction::Both => "both",
            Direction::None => "none",
        })
    }
}

/// Transport family of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    Serial,
    Pty,
    Tcp,
    Broadcast,
    File,
    Seatalk,
}

impl EndpointKind {
    /// The configuration name of this kind.
    pub fn name(&self) -> &'static str {
        match self {
            EndpointKind::Serial => "serial",
            EndpointKind::Pty => "pty",
            EndpointKind::Tcp => "tcp",
            EndpointKind::Broadcast => "broadcast",
            EndpointKind::File => "file",
            EndpointKind::Seatalk => "seatalk",
        }
    }
}

impl fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EndpointKind {
    type Err = ();

    /// Matches the exact configuration names.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "serial" => Ok(EndpointKind::Serial),
            "pty" => Ok(EndpointKind::Pty),
            "tcp" => Ok(EndpointKind::Tcp),
            "broadcast" => Ok(EndpointKind::Broadcast),
            "file" => Ok(EndpointKind::File),
            "seatalk" => Ok(EndpointKind::Seatalk),
            _ => Err(()),
        }
    }
}

/// Receiving side of an endpoint's stop request channel.
///
/// The router holds the sending side and uses it to ask an input task
/// to exit (external shutdown, pair teardown). Output tasks exit via
/// queue closure instead and may simply drop this.
pub struct StopRx(pub(crate) mpsc::Receiver<()>);

impl StopRx {
    /// Resolves once a stop has been requested.
    ///
    /// A dropped sender counts as a stop: it means the router record
    /// is already gone.
    pub async fn stopped(&mut self) {
        let _ = self.0.recv().await;
    }
}

/// The task-side face of one registered endpoint.
///
/// For inputs `queue` is the shared central queue; for outputs it is
/// the endpoint's private queue.
pub struct EndpointHandle {
    pub(crate) id: EndpointId,
    pub(crate) name: String,
    pub(crate) router: Arc<Router>,
    pub(crate) queue: Arc<SentenceQueue>,
}

impl EndpointHandle {
    /// This endpoint's id.
    pub fn id(&self) -> EndpointId {
        self.id
    }

    /// Human-readable name for logs, e.g. `serial:/dev/ttyUSB0`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Move from the initializing list onto the active list.
    ///
    /// Must be called once, at the start of the endpoint's task.
    /// Returns `false` when the endpoint was scheduled for quiet exit
    /// (direction [`Direction::None`]); the task must then go straight
    /// to [`unlink`](Self::unlink).
    pub fn promote(&self) -> bool {
        self.router.promote(self.id)
    }

    /// Retire this endpoint: leave the active list, notify a paired
    /// sibling, close the central queue if this was the last input,
    /// and hand the record to the reaper.
    pub fn unlink(self) {
        self.router.unlink(self.id);
    }

    /// Push one framed sentence into this input's queue.
    pub fn push(&self, sentence: &[u8]) {
        match SenBlk::new(sentence, self.id) {
            Some(blk) => self.queue.push(blk),
            // The framer bounds sentences to SENMAX; anything larger
            // here comes from a custom adapter loop and is dropped the
            // same way the framer would have dropped it.
            None => debug!(endpoint = %self.name, len = sentence.len(), "oversized sentence dropped"),
        }
    }

    /// Wait for the next sentence on this output's queue.
    ///
    /// `None` is end-of-stream: the task should drain out and exit.
    pub async fn next(&self) -> Option<SenBlk> {
        self.queue.next().await
    }

    /// The queue this endpoint works against: the shared central
    /// queue for inputs, the private queue for outputs.
    pub fn queue(&self) -> Arc<SentenceQueue> {
        self.queue.clone()
    }
}

/// Generic input endpoint task: frame sentences from a byte stream
/// into the central queue until EOF, an I/O error, or a stop request.
pub async fn run_input<R>(handle: EndpointHandle, mut io: R, mut stop: StopRx)
where
    R: AsyncRead + Unpin,
{
    if !handle.promote() {
        handle.unlink();
        return;
    }
    debug!(endpoint = %handle.name(), "input running");

    let mut codec = SentenceCodec::new();
    let mut buf = vec![0u8; 1024];
    loop {
        tokio::select! {
            _ = stop.stopped() => {
                debug!(endpoint = %handle.name(), "input stop requested");
                break;
            }
            result = io.read(&mut buf) => match result {
                Ok(0) => {
                    debug!(endpoint = %handle.name(), "input at end of stream");
                    break;
                }
                Ok(n) => {
                    trace!(endpoint = %handle.name(), bytes = n, "input read");
                    codec.push_bytes(&buf[..n]);
                    while let Some(sentence) = codec.next_sentence() {
                        handle.push(&sentence);
                    }
                }
                Err(e) => {
                    warn!(endpoint = %handle.name(), error = %e, "input read failed");
                    break;
                }
            }
        }
    }

    handle.unlink();
}

/// Generic output endpoint task: write sentences from the private
/// queue until end-of-stream or a write error.
pub async fn run_output<W>(handle: EndpointHandle, mut io: W)
where
    W: AsyncWrite + Unpin,
{
    if !handle.promote() {
        handle.unlink();
        return;
    }
    debug!(endpoint = %handle.name(), "output running");

    while let Some(blk) = handle.next().await {
        if let Err(e) = io.write_all(blk.bytes()).await {
            warn!(endpoint = %handle.name(), error = %e, "output write failed");
            break;
        }
        if let Err(e) = io.flush().await {
            warn!(endpoint = %handle.name(), error = %e, "output flush failed");
            break;
        }
    }

    debug!(endpoint = %handle.name(), "output done");
    handle.unlink();
}
