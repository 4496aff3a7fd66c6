//! seamux multiplexing engine
//!
//! This crate implements the any-to-any core of the multiplexer:
//! every input endpoint pushes framed sentences into one central
//! queue, a single engine task drains that queue and copies each
//! sentence onto the private queue of every eligible output endpoint,
//! and each output endpoint drains its own queue at its own pace.
//!
//! # Architecture
//!
//! ```text
//!  input task ──┐
//!  input task ──┼──▶ central queue ──▶ engine ──┬──▶ output queue ──▶ output task
//!  input task ──┘                               └──▶ output queue ──▶ output task
//! ```
//!
//! - [`SenBlk`] is the unit carried through the system: one sentence
//!   plus the id of the endpoint that produced it.
//! - [`SentenceQueue`] is a bounded FIFO that never blocks producers:
//!   when full it drops the oldest sentence, so a slow output can lose
//!   data but can never stall the engine or its siblings.
//! - [`Router`] owns the endpoint lists (initializing, inputs,
//!   outputs, dead) and drives the lifecycle: register → promote →
//!   unlink → reap.
//! - [`engine::run`] is the fan-out task.
//!
//! Bidirectional transports are registered as a pair of endpoints
//! linked by id; the engine never reflects a sentence back into the
//! output half of the pair that produced it.
//!
//! Transport adapters live in the daemon crate; they hand their I/O
//! streams to [`endpoint::run_input`] / [`endpoint::run_output`] or
//! drive the same promote/push/unlink surface themselves.

pub mod endpoint;
pub mod engine;
pub mod queue;
pub mod router;
pub mod senblk;

pub use endpoint::{run_input, run_output, Direction, EndpointHandle, EndpointId, EndpointKind, StopRx};
pub use queue::SentenceQueue;
pub use router::{PendingEndpoint, Registration, Router};
pub use senblk::SenBlk;

/// Default size of the central queue and of private output queues.
pub const DEFAULT_QUEUE_SIZE: usize = 128;

/// Smallest usable queue size.
pub const MIN_QUEUE_SIZE: usize = 2;
