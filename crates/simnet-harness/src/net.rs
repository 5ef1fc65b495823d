//! The link fabric: an N×N matrix of FIFO queues with filtering,
//! backpressure, and idle reporting.
//!
//! Links are indexed sender-major: link `(from, to)` lives at
//! `from * scale + to`. Each link has a zero-capacity *input* channel (a
//! synchronous hand-off from the sending process) and a zero-capacity
//! *output* channel (the receive port a process loop selects on). A single
//! routing thread multiplexes all 2·N² channels: it drains input channels
//! into the per-link buffers — applying the filter at enqueue time — and
//! arms a send on every link whose buffer is non-empty.
//!
//! The buffer matrix itself is shared and outlives the `Net`: messages
//! still in flight when a round ends stay queued for the next one.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};

use crossbeam::channel::{bounded, Receiver, SendError, Select, Sender};
use tracing::{trace, warn};

use simnet_core::{Payload, Pid, SimError};

use crate::session::Session;
use crate::{IDLE_SLEEP, IDLE_TIMEOUT};

/// Predicate deciding whether the link `(from, to)` is open.
/// `None` installed means every link is open.
pub type FilterFn = Box<dyn Fn(Pid, Pid) -> bool + Send + Sync>;

// ═══════════════════════════════════════════════════════════════════════
// BufferMatrix — persistent per-link queues and counters
// ═══════════════════════════════════════════════════════════════════════

/// Per-link FIFO buffers plus monotone traffic counters.
///
/// Writers (the routing thread) take the exclusive lock; statistics
/// readers take the shared lock.
pub(crate) struct BufferMatrix {
    scale: usize,
    queues: Vec<VecDeque<Payload>>,
    received: u64,
    buffered: u64,
    sent: u64,
}

impl BufferMatrix {
    pub(crate) fn new(scale: usize) -> Self {
        Self {
            scale,
            queues: (0..scale * scale).map(|_| VecDeque::new()).collect(),
            received: 0,
            buffered: 0,
            sent: 0,
        }
    }

    /// Grow the matrix to `scale`, re-indexing existing queues. Queue
    /// contents are preserved; registration never shrinks a harness.
    pub(crate) fn ensure_scale(&mut self, scale: usize) {
        if scale <= self.scale {
            return;
        }
        let mut queues: Vec<VecDeque<Payload>> =
            (0..scale * scale).map(|_| VecDeque::new()).collect();
        for from in 0..self.scale {
            for to in 0..self.scale {
                queues[from * scale + to] =
                    std::mem::take(&mut self.queues[from * self.scale + to]);
            }
        }
        self.queues = queues;
        self.scale = scale;
    }

    fn push_back(&mut self, link: usize, payload: Payload) {
        self.queues[link].push_back(payload);
        self.buffered += 1;
    }

    fn pop_front(&mut self, link: usize) -> Option<Payload> {
        let payload = self.queues[link].pop_front();
        if payload.is_some() {
            self.buffered -= 1;
        }
        payload
    }

    fn push_front(&mut self, link: usize, payload: Payload) {
        self.queues[link].push_front(payload);
        self.buffered += 1;
    }

    fn non_empty_links(&self) -> Vec<usize> {
        (0..self.queues.len())
            .filter(|&link| !self.queues[link].is_empty())
            .collect()
    }

    pub(crate) fn stats(&self) -> (u64, u64, u64) {
        (self.received, self.buffered, self.sent)
    }

    /// ASCII table of per-link depths. Rows index `from`, columns index
    /// `to`; zero depths render as blanks.
    pub(crate) fn render(&self) -> String {
        let separator = format!("----+----+{}", "----+".repeat(self.scale));

        let mut s = String::from("    |  to|\n");
        s.push_str(&separator);
        s.push('\n');
        s.push_str("from|    |");
        for to in 0..self.scale {
            s.push_str(&format!("{:>4}|", to));
        }
        s.push('\n');
        s.push_str(&separator);
        s.push('\n');

        for from in 0..self.scale {
            s.push_str(&format!("    |{:>4}|", from));
            for to in 0..self.scale {
                let depth = self.queues[from * self.scale + to].len();
                if depth == 0 {
                    s.push_str("    |");
                } else {
                    s.push_str(&format!("{:>4}|", depth));
                }
            }
            s.push('\n');
        }
        s.push_str(&separator);
        s.push('\n');
        s
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Net
// ═══════════════════════════════════════════════════════════════════════

/// One round's view of the link fabric.
///
/// Channels are created fresh per instance; the buffer matrix and the
/// installed filter may be shared with the owning harness so they persist
/// across rounds.
pub struct Net {
    scale: usize,
    buffers: Arc<RwLock<BufferMatrix>>,
    filter: Arc<Mutex<Option<FilterFn>>>,
    input_tx: Vec<Sender<Payload>>,
    input_rx: Vec<Receiver<Payload>>,
    output_tx: Vec<Sender<Payload>>,
    output_rx: Vec<Receiver<Payload>>,
}

impl Net {
    /// A standalone fabric with its own fresh state. Mostly useful in
    /// tests; the harness shares state across rounds via
    /// [`Net::with_state`].
    pub fn new(scale: usize) -> Self {
        Self::with_state(
            scale,
            Arc::new(RwLock::new(BufferMatrix::new(scale))),
            Arc::new(Mutex::new(None)),
        )
    }

    pub(crate) fn with_state(
        scale: usize,
        buffers: Arc<RwLock<BufferMatrix>>,
        filter: Arc<Mutex<Option<FilterFn>>>,
    ) -> Self {
        buffers.write().unwrap().ensure_scale(scale);

        let links = scale * scale;
        let mut input_tx = Vec::with_capacity(links);
        let mut input_rx = Vec::with_capacity(links);
        let mut output_tx = Vec::with_capacity(links);
        let mut output_rx = Vec::with_capacity(links);
        for _ in 0..links {
            let (tx, rx) = bounded(0);
            input_tx.push(tx);
            input_rx.push(rx);
            let (tx, rx) = bounded(0);
            output_tx.push(tx);
            output_rx.push(rx);
        }

        Self {
            scale,
            buffers,
            filter,
            input_tx,
            input_rx,
            output_tx,
            output_rx,
        }
    }

    /// Hand `payload` to the fabric on the link `(from, to)`.
    ///
    /// Blocks until the routing thread accepts it. Loopback
    /// (`from == to`) is permitted.
    pub fn send(&self, from: Pid, to: Pid, payload: Payload) -> Result<(), SimError> {
        if from >= self.scale || to >= self.scale {
            return Err(SimError::IncorrectPid);
        }
        if self.input_tx[from * self.scale + to].send(payload).is_err() {
            warn!(from, to, "routing thread gone, message dropped");
        }
        Ok(())
    }

    /// The receive port for messages sent by `from` to `as_pid`.
    pub fn recv(&self, as_pid: Pid, from: Pid) -> Result<Receiver<Payload>, SimError> {
        if as_pid >= self.scale || from >= self.scale {
            return Err(SimError::IncorrectPid);
        }
        Ok(self.output_rx[from * self.scale + as_pid].clone())
    }

    /// Install `filter`, replacing any previous one. `None` opens every
    /// link. Takes effect for subsequent enqueues; already-buffered
    /// messages are still delivered.
    pub fn set_filter(&self, filter: Option<FilterFn>) {
        *self.filter.lock().unwrap() = filter;
    }

    /// Monotone `(received, buffered, sent)` counters. `buffered` is the
    /// current depth sum.
    pub fn stats(&self) -> (u64, u64, u64) {
        self.buffers.read().unwrap().stats()
    }

    /// ASCII table of per-link buffer depths (see [`BufferMatrix::render`]).
    pub fn buffer_stats(&self) -> String {
        self.buffers.read().unwrap().render()
    }

    /// A cheap handle processes use to send into this round's fabric.
    pub(crate) fn sender_handle(&self) -> NetSender {
        NetSender {
            scale: self.scale,
            input_tx: self.input_tx.clone(),
        }
    }

    /// Spawn the routing thread. It runs until `cancel` fires, reporting
    /// idle/busy transitions to `session`.
    pub fn spawn(&self, session: Arc<Session>, cancel: Receiver<()>) -> JoinHandle<()> {
        let scale = self.scale;
        let input_rx = self.input_rx.clone();
        let output_tx = self.output_tx.clone();
        let buffers = Arc::clone(&self.buffers);
        let filter = Arc::clone(&self.filter);
        thread::Builder::new()
            .name("net".to_string())
            .spawn(move || route_loop(scale, input_rx, output_tx, buffers, filter, session, cancel))
            .expect("failed to spawn net thread")
    }
}

/// Clonable sender side of a round's fabric, with cancellation-aware
/// blocking so round teardown can never strand a sending process.
#[derive(Clone)]
pub(crate) struct NetSender {
    scale: usize,
    input_tx: Vec<Sender<Payload>>,
}

impl NetSender {
    pub(crate) fn send(
        &self,
        from: Pid,
        to: Pid,
        payload: Payload,
        cancel: &Receiver<()>,
    ) -> Result<(), SimError> {
        if from >= self.scale || to >= self.scale {
            return Err(SimError::IncorrectPid);
        }
        crossbeam::channel::select! {
            send(self.input_tx[from * self.scale + to], payload) -> res => {
                if res.is_err() {
                    warn!(from, to, "routing thread gone, message dropped");
                }
                Ok(())
            }
            recv(cancel) -> _ => Err(SimError::Cancelled),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Routing loop
// ═══════════════════════════════════════════════════════════════════════

/// One iteration's select set: N² input receives, a send per non-empty
/// link, the cancellation channel, and an idle timeout.
fn route_loop(
    scale: usize,
    input_rx: Vec<Receiver<Payload>>,
    output_tx: Vec<Sender<Payload>>,
    buffers: Arc<RwLock<BufferMatrix>>,
    filter: Arc<Mutex<Option<FilterFn>>>,
    session: Arc<Session>,
    cancel: Receiver<()>,
) {
    session.prof_network_start();
    let links = scale * scale;

    loop {
        // Send cases must be re-armed every iteration: only links with a
        // queued message may offer one.
        let ready = buffers.read().unwrap().non_empty_links();

        let mut sel = Select::new();
        for rx in &input_rx {
            sel.recv(rx);
        }
        for &link in &ready {
            sel.send(&output_tx[link]);
        }
        let cancel_index = sel.recv(&cancel);

        session.prof_network_select_start();
        let op = sel.select_timeout(IDLE_TIMEOUT);
        session.prof_network_select_end();

        let op = match op {
            Ok(op) => op,
            Err(_) => {
                // Nothing moved for a full grace period. With an empty
                // fabric that makes the network idle.
                let (_, buffered, _) = buffers.read().unwrap().stats();
                if buffered == 0 {
                    session.report_network_idle();
                    thread::sleep(IDLE_SLEEP);
                    session.report_network_busy();
                }
                continue;
            }
        };

        let index = op.index();
        if index < links {
            // A process handed us a payload on link `index`.
            match op.recv(&input_rx[index]) {
                Ok(payload) => {
                    let from = index / scale;
                    let to = index % scale;
                    let open = filter
                        .lock()
                        .unwrap()
                        .as_ref()
                        .map_or(true, |f| f(from, to));
                    let mut matrix = buffers.write().unwrap();
                    matrix.received += 1;
                    if open {
                        matrix.push_back(index, payload);
                    } else {
                        trace!(from, to, "link closed by filter, payload dropped");
                    }
                }
                Err(_) => warn!(link = index, "input channel closed, event skipped"),
            }
        } else if index == cancel_index {
            let _ = op.recv(&cancel);
            session.report_network_idle();
            return;
        } else {
            // A receive port is ready to accept the head of `link`. Only
            // this thread pops, so the armed link still has its payload.
            let link = ready[index - links];
            let payload = buffers
                .write()
                .unwrap()
                .pop_front(link)
                .expect("armed link has a queued payload");
            match op.send(&output_tx[link], payload) {
                Ok(()) => buffers.write().unwrap().sent += 1,
                Err(SendError(payload)) => {
                    // Port vanished mid-delivery; requeue at the head so
                    // link FIFO order is preserved.
                    buffers.write().unwrap().push_front(link, payload);
                    warn!(link, "receive port closed, delivery requeued");
                }
            }
        }
    }
}
