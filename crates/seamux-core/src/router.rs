//! Endpoint registry and lifecycle
//!
//! The router owns four lists and moves every endpoint through them
//! in one direction only:
//!
//! ```text
//! initializing ──promote──▶ inputs / outputs ──unlink──▶ dead ──reap──▶ gone
//! ```
//!
//! All four lists, the pair links, and the shutdown flag live behind
//! one mutex. The lock is held only for list surgery; nothing awaits
//! while holding it. Two notifications mirror the two phases the
//! supervisor waits on: `init_done` fires when the initializing list
//! drains, `reaper` fires whenever an endpoint reaches the dead list
//! or an external shutdown is requested.
//!
//! Teardown ordering rules enforced here:
//!
//! - Removing the last input closes the central queue, which the
//!   engine turns into closure of every output queue.
//! - Removing one half of a bidirectional pair notifies the sibling:
//!   an output sibling has its queue closed, an input sibling is
//!   marked for quiet exit and sent a stop request.
//! - Every endpoint that was ever registered ends up on the dead list
//!   exactly once, so the reaper joins every task.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::endpoint::{Direction, EndpointHandle, EndpointId, EndpointKind, StopRx};
use crate::queue::SentenceQueue;
use crate::senblk::SenBlk;

/// What an adapter hands to the router to create one endpoint.
pub struct Registration {
    /// Display name for logs, e.g. `serial:/dev/ttyUSB0`.
    pub name: String,
    /// Transport family.
    pub kind: EndpointKind,
    /// `In` or `Out`. Bidirectional transports register through
    /// [`Router::register_pair`] instead.
    pub direction: Direction,
    /// Private queue capacity; ignored for inputs, which share the
    /// central queue.
    pub qsize: usize,
}

/// A registered endpoint waiting for its task to be spawned.
pub struct PendingEndpoint {
    /// Task-side handle: promote, push/next, unlink.
    pub handle: EndpointHandle,
    /// Stop request channel for input loops.
    pub stop: StopRx,
}

/// Router-owned record of one endpoint.
struct Endpoint {
    id: EndpointId,
    name: String,
    kind: EndpointKind,
    direction: Direction,
    /// Central queue for inputs, private queue for outputs.
    queue: Arc<SentenceQueue>,
    /// Sibling endpoint for bidirectional transports. A link, not
    /// ownership: the sibling may already be gone.
    pair: Option<EndpointId>,
    stop: mpsc::Sender<()>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListTag {
    Initializing,
    Inputs,
    Outputs,
}

#[derive(Default)]
struct Lists {
    initializing: Vec<Endpoint>,
    inputs: Vec<Endpoint>,
    outputs: Vec<Endpoint>,
    dead: Vec<EndpointId>,
    /// External shutdown requested; cleared by the reaper once it has
    /// stopped the inputs.
    shutdown: bool,
    next_id: u32,
}

impl Lists {
    fn take(&mut self, id: EndpointId) -> Option<(Endpoint, ListTag)> {
        for (list, tag) in [
            (&mut self.inputs, ListTag::Inputs),
            (&mut self.outputs, ListTag::Outputs),
            (&mut self.initializing, ListTag::Initializing),
        ] {
            if let Some(pos) = list.iter().position(|e| e.id == id) {
                return Some((list.remove(pos), tag));
            }
        }
        None
    }

    fn find_mut(&mut self, id: EndpointId) -> Option<&mut Endpoint> {
        self.inputs
            .iter_mut()
            .chain(self.outputs.iter_mut())
            .chain(self.initializing.iter_mut())
            .find(|e| e.id == id)
    }
}

/// Shared state tying inputs, the engine and outputs together.
pub struct Router {
    central: Arc<SentenceQueue>,
    lists: Mutex<Lists>,
    /// Fired when the initializing list drains.
    init_done: Notify,
    /// Fired when an endpoint dies or shutdown is requested.
    reaper: Notify,
}

impl Router {
    /// Create a router whose central queue holds `qsize` sentences.
    pub fn new(qsize: usize) -> Arc<Self> {
        Arc::new(Self {
            central: Arc::new(SentenceQueue::new(qsize)),
            lists: Mutex::new(Lists::default()),
            init_done: Notify::new(),
            reaper: Notify::new(),
        })
    }

    /// The central queue all inputs push into.
    pub fn central(&self) -> Arc<SentenceQueue> {
        self.central.clone()
    }

    /// Register one endpoint onto the initializing list.
    pub fn register(self: &Arc<Self>, reg: Registration) -> PendingEndpoint {
        debug_assert!(
            matches!(reg.direction, Direction::In | Direction::Out),
            "bidirectional endpoints go through register_pair"
        );
        let mut lists = self.lists.lock();
        self.link_initializing(&mut lists, reg)
    }

    /// Register a bidirectional transport as a linked In/Out pair.
    ///
    /// This is where a `both` endpoint is split: the two halves share
    /// the transport (the adapter splits the stream), each gets its
    /// own direction, and each records the other as its pair so the
    /// engine can suppress reflection and teardown can reach the
    /// sibling. Returns `(input, output)`.
    pub fn register_pair(
        self: &Arc<Self>,
        name: String,
        kind: EndpointKind,
        qsize: usize,
    ) -> (PendingEndpoint, PendingEndpoint) {
        let mut lists = self.lists.lock();
        let input = self.link_initializing(
            &mut lists,
            Registration {
                name: name.clone(),
                kind,
                direction: Direction::In,
                qsize,
            },
        );
        let output = self.link_initializing(
            &mut lists,
            Registration {
                name,
                kind,
                direction: Direction::Out,
                qsize,
            },
        );
        let in_id = input.handle.id;
        let out_id = output.handle.id;
        if let Some(rec) = lists.find_mut(in_id) {
            rec.pair = Some(out_id);
        }
        if let Some(rec) = lists.find_mut(out_id) {
            rec.pair = Some(in_id);
        }
        (input, output)
    }

    fn link_initializing(self: &Arc<Self>, lists: &mut Lists, reg: Registration) -> PendingEndpoint {
        let id = EndpointId(lists.next_id);
        lists.next_id += 1;

        let queue = match reg.direction {
            Direction::Out => Arc::new(SentenceQueue::new(reg.qsize)),
            _ => self.central.clone(),
        };
        let (stop_tx, stop_rx) = mpsc::channel(1);

        lists.initializing.push(Endpoint {
            id,
            name: reg.name.clone(),
            kind: reg.kind,
            direction: reg.direction,
            queue: queue.clone(),
            pair: None,
            stop: stop_tx,
        });
        debug!(endpoint = %reg.name, %id, direction = ?reg.direction, "registered");

        PendingEndpoint {
            handle: EndpointHandle {
                id,
                name: reg.name,
                router: self.clone(),
                queue,
            },
            stop: StopRx(stop_rx),
        }
    }

    /// Move an endpoint from initializing to its active list.
    ///
    /// Returns `false` when the endpoint has meanwhile been scheduled
    /// for quiet exit; its task must unlink and return without running
    /// a loop.
    pub(crate) fn promote(&self, id: EndpointId) -> bool {
        let mut lists = self.lists.lock();
        let Some(pos) = lists.initializing.iter().position(|e| e.id == id) else {
            return false;
        };
        let ep = lists.initializing.remove(pos);
        let drained = lists.initializing.is_empty();

        let active = match ep.direction {
            Direction::In => {
                lists.inputs.insert(0, ep);
                true
            }
            Direction::Out => {
                lists.outputs.insert(0, ep);
                true
            }
            // Pairs are split at registration, so Both never reaches
            // promotion; None means a sibling already tore us down.
            Direction::Both | Direction::None => false,
        };

        if drained {
            self.init_done.notify_one();
        }
        active
    }

    /// Retire an endpoint. Called exactly once from its task, on
    /// every exit path.
    pub(crate) fn unlink(&self, id: EndpointId) {
        let mut lists = self.lists.lock();

        if let Some((ep, from)) = lists.take(id) {
            debug!(endpoint = %ep.name, kind = %ep.kind, %id, "unlinked");

            // Tell the sibling of a bidirectional pair. An output
            // sibling drains out through queue closure; an input
            // sibling is asked to exit and will unlink itself.
            if let Some(pair_id) = ep.pair {
                if let Some(pair) = lists.find_mut(pair_id) {
                    pair.pair = None;
                    if pair.direction == Direction::Out {
                        pair.queue.close();
                    } else {
                        pair.direction = Direction::None;
                        let _ = pair.stop.try_send(());
                    }
                }
            }

            // The last input leaving shuts the whole stream down: the
            // engine sees the closed central queue and closes every
            // output queue in turn.
            if from == ListTag::Inputs && lists.inputs.is_empty() {
                debug!("last input gone, closing central queue");
                self.central.close();
            }

            // An output's private queue goes away with its record.
        }

        lists.dead.push(id);
        self.reaper.notify_one();
    }

    /// Copy one sentence to every eligible output, or propagate
    /// end-of-stream to all of them.
    ///
    /// Holds the list lock across the walk because outputs come and
    /// go concurrently; every push is non-blocking so the hold is
    /// brief. The loop-prevention rule lives here: a sentence is never
    /// copied into the output half of the pair that produced it.
    pub(crate) fn fan_out(&self, blk: Option<&SenBlk>) {
        let lists = self.lists.lock();
        match blk {
            Some(blk) => {
                for out in &lists.outputs {
                    if out.pair == Some(blk.src()) {
                        trace!(endpoint = %out.name, "not reflecting sentence to its source pair");
                        continue;
                    }
                    out.queue.push(*blk);
                }
            }
            None => {
                for out in &lists.outputs {
                    out.queue.close();
                }
            }
        }
    }

    /// Wait until every registered endpoint has left the initializing
    /// list.
    pub async fn wait_initialized(&self) {
        loop {
            let notified = self.init_done.notified();
            if self.lists.lock().initializing.is_empty() {
                return;
            }
            notified.await;
        }
    }

    /// Ask for an orderly shutdown: the reaper wakes and stops every
    /// input, and closure propagates from there.
    pub fn request_shutdown(&self) {
        let mut lists = self.lists.lock();
        lists.shutdown = true;
        self.reaper.notify_one();
    }

    /// Reap dead endpoints until none remain active.
    ///
    /// Runs on the supervisor task. Waits for endpoints to die (or a
    /// shutdown request), stops all inputs when shutdown is requested
    /// or no output is left to deliver to, and joins every dead
    /// endpoint's task. Returns when the inputs, outputs and dead
    /// lists are all empty.
    pub async fn run_reaper(&self, tasks: &mut HashMap<EndpointId, JoinHandle<()>>) {
        loop {
            let dead = loop {
                let notified = self.reaper.notified();
                {
                    let mut lists = self.lists.lock();
                    if lists.inputs.is_empty()
                        && lists.outputs.is_empty()
                        && lists.dead.is_empty()
                    {
                        return;
                    }
                    if lists.shutdown || lists.outputs.is_empty() {
                        lists.shutdown = false;
                        for ep in &lists.inputs {
                            debug!(endpoint = %ep.name, "stopping input");
                            let _ = ep.stop.try_send(());
                        }
                    }
                    if !lists.dead.is_empty() {
                        break std::mem::take(&mut lists.dead);
                    }
                }
                notified.await;
            };

            for id in dead {
                if let Some(task) = tasks.remove(&id) {
                    let _ = task.await;
                }
                trace!(%id, "reaped");
            }
        }
    }

    /// Number of active input endpoints.
    pub fn input_count(&self) -> usize {
        self.lists.lock().inputs.len()
    }

    /// Number of active output endpoints.
    pub fn output_count(&self) -> usize {
        self.lists.lock().outputs.len()
    }

    /// Number of endpoints still initializing.
    pub fn initializing_count(&self) -> usize {
        self.lists.lock().initializing.len()
    }

    /// Number of endpoints awaiting reaping.
    pub fn dead_count(&self) -> usize {
        self.lists.lock().dead.len()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn reg(name: &str, direction: Direction) -> Registration {
        Registration {
            name: name.into(),
            kind: EndpointKind::File,
            direction,
            qsize: 8,
        }
    }

    #[tokio::test]
    async fn promote_moves_to_active_list() {
        let router = Router::new(8);
        let input = router.register(reg("in", Direction::In));
        let output = router.register(reg("out", Direction::Out));
        assert_eq!(router.initializing_count(), 2);

        assert!(input.handle.promote());
        assert!(output.handle.promote());
        assert_eq!(router.initializing_count(), 0);
        assert_eq!(router.input_count(), 1);
        assert_eq!(router.output_count(), 1);
    }

    #[tokio::test]
    async fn wait_initialized_returns_after_all_promote() {
        let router = Router::new(8);
        let a = router.register(reg("a", Direction::In));
        let b = router.register(reg("b", Direction::Out));

        let waiter = {
            let router = router.clone();
            tokio::spawn(async move { router.wait_initialized().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        a.handle.promote();
        b.handle.promote();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn last_input_unlink_closes_central() {
        let router = Router::new(8);
        let a = router.register(reg("a", Direction::In));
        let b = router.register(reg("b", Direction::In));
        a.handle.promote();
        b.handle.promote();

        let central = router.central();
        a.handle.unlink();
        assert!(central.is_active());
        b.handle.unlink();
        assert!(!central.is_active());
    }

    #[tokio::test]
    async fn unlink_of_input_pair_half_closes_output_queue() {
        let router = Router::new(8);
        let (input, output) = router.register_pair("pty:/dev/x".into(), EndpointKind::Pty, 8);
        // Another input keeps the central queue open.
        let other = router.register(reg("other", Direction::In));
        input.handle.promote();
        output.handle.promote();
        other.handle.promote();

        let out_queue = output.handle.queue();
        assert!(out_queue.is_active());
        input.handle.unlink();
        assert!(!out_queue.is_active());
        assert!(router.central().is_active());
    }

    #[tokio::test]
    async fn unlink_of_output_pair_half_stops_input_sibling() {
        let router = Router::new(8);
        let (input, output) = router.register_pair("serial:/dev/x".into(), EndpointKind::Serial, 8);
        input.handle.promote();
        output.handle.promote();

        let mut stop = input.stop;
        output.handle.unlink();
        // The input sibling got a stop request and will exit quietly.
        tokio::time::timeout(Duration::from_secs(1), stop.stopped())
            .await
            .unwrap();

        // Once asked to exit, it no longer promotes anywhere.
        input.handle.unlink();
        assert_eq!(router.input_count(), 0);
    }

    #[tokio::test]
    async fn sibling_marked_none_exits_before_activating() {
        let router = Router::new(8);
        let (input, output) = router.register_pair("serial:/dev/x".into(), EndpointKind::Serial, 8);
        output.handle.promote();
        // Output half dies before the input half ever promoted.
        output.handle.unlink();
        // The input half must now refuse promotion.
        assert!(!input.handle.promote());
        assert_eq!(router.input_count(), 0);
        input.handle.unlink();
        assert_eq!(router.dead_count(), 2);
    }

    #[tokio::test]
    async fn fan_out_skips_paired_output() {
        let router = Router::new(8);
        let (input, output) = router.register_pair("pty:/dev/x".into(), EndpointKind::Pty, 8);
        let second = router.register(reg("second", Direction::Out));
        input.handle.promote();
        output.handle.promote();
        second.handle.promote();

        let own = SenBlk::new(b"$A\r\n", input.handle.id()).unwrap();
        router.fan_out(Some(&own));
        assert_eq!(output.handle.queue().len(), 0);
        assert_eq!(second.handle.queue().len(), 1);

        let foreign = SenBlk::new(b"$B\r\n", EndpointId(999)).unwrap();
        router.fan_out(Some(&foreign));
        assert_eq!(output.handle.queue().len(), 1);
        assert_eq!(second.handle.queue().len(), 2);
    }

    #[tokio::test]
    async fn fan_out_close_reaches_every_output() {
        let router = Router::new(8);
        let a = router.register(reg("a", Direction::Out));
        let b = router.register(reg("b", Direction::Out));
        a.handle.promote();
        b.handle.promote();

        router.fan_out(None);
        assert!(!a.handle.queue().is_active());
        assert!(!b.handle.queue().is_active());
    }

    #[tokio::test]
    async fn reaper_joins_every_endpoint_and_returns() {
        let router = Router::new(8);
        let mut tasks = HashMap::new();

        for i in 0..3 {
            let ep = router.register(reg(&format!("in{i}"), Direction::In));
            let id = ep.handle.id();
            let task = tokio::spawn(async move {
                ep.handle.promote();
                tokio::time::sleep(Duration::from_millis(10 * (i + 1) as u64)).await;
                ep.handle.unlink();
            });
            tasks.insert(id, task);
        }
        router.wait_initialized().await;

        tokio::time::timeout(Duration::from_secs(2), router.run_reaper(&mut tasks))
            .await
            .unwrap();
        assert!(tasks.is_empty());
        assert_eq!(router.dead_count(), 0);
        assert_eq!(router.input_count(), 0);
    }

    #[tokio::test]
    async fn shutdown_request_stops_inputs() {
        let router = Router::new(8);
        let mut tasks = HashMap::new();

        let ep = router.register(reg("in", Direction::In));
        let id = ep.handle.id();
        let mut stop = ep.stop;
        let handle = ep.handle;
        let task = tokio::spawn(async move {
            handle.promote();
            stop.stopped().await;
            handle.unlink();
        });
        tasks.insert(id, task);
        router.wait_initialized().await;

        router.request_shutdown();
        tokio::time::timeout(Duration::from_secs(2), router.run_reaper(&mut tasks))
            .await
            .unwrap();
        assert!(tasks.is_empty());
    }
}
