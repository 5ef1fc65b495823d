//! The public façade: process registry, staging operations, and the round
//! orchestrator.
//!
//! A [`Harness`] owns the fleet of registered processes, the persistent
//! link buffers, and the single-shot staging slots for injection, filter,
//! and tick. [`Harness::round`] runs one simulation round to quiescence:
//!
//! 1. take the round lock (staging and rounds are mutually exclusive)
//! 2. build a fresh [`Session`] and a fresh [`Net`] over the persistent
//!    buffers, and wire every process `Api` to them
//! 3. consume the staged filter / injector / tick
//! 4. spawn the routing thread, one dispatch loop per process, the
//!    collector, the injector threads, and the tick fan-out
//! 5. wait busy, then wait idle — global quiescence — polling for
//!    caller cancellation throughout
//! 6. drop the cancellation sender, join every worker, and drain the
//!    per-process response and trace buffers

use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{bounded, never, Receiver, Sender, TryRecvError};
use tracing::{debug, warn};

use simnet_core::{Api, Outbound, OutboundSlot, Payload, Pid, Process, SimError};

use crate::net::{BufferMatrix, FilterFn, Net, NetSender};
use crate::session::Session;
use crate::worker::{collect_loop, process_loop};

/// Interval between cancellation/quiescence polls inside a round.
const ROUND_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Harness configuration.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Emit per-event debug logs from the worker loops.
    pub debug: bool,
}

/// Caller-supplied function driving client calls into the fleet at the
/// start of a round. Invoked once per process, each on its own thread.
pub type InjectFn = Arc<dyn Fn(Pid, &Client) + Send + Sync>;

/// Handle an injector uses to push calls into one process.
pub struct Client {
    pid: Pid,
    call_tx: Sender<Payload>,
    cancel: Receiver<()>,
    debug: bool,
}

impl Client {
    /// The id of the process this client feeds.
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Deliver `payload` to the process's `receive_call` handler. Blocks
    /// until the process accepts it; aborts silently if the round is torn
    /// down first.
    pub fn call(&self, payload: Payload) {
        if self.debug {
            debug!(pid = self.pid, "client call");
        }
        crossbeam::channel::select! {
            send(self.call_tx, payload) -> res => {
                if res.is_err() {
                    warn!(pid = self.pid, "call channel closed, call dropped");
                }
            }
            recv(self.cancel) -> _ => {
                debug!(pid = self.pid, "round cancelled, call dropped");
            }
        }
    }
}

/// Round-scoped implementation of the process-facing [`Outbound`]
/// capabilities, wired into each `Api` at round start.
struct RoundOutbound {
    pid: Pid,
    net: NetSender,
    return_tx: Sender<Payload>,
    trace_tx: Sender<Payload>,
    cancel: Receiver<()>,
}

impl Outbound for RoundOutbound {
    fn send(&self, to: Pid, payload: Payload) {
        match self.net.send(self.pid, to, payload, &self.cancel) {
            Ok(()) => {}
            Err(SimError::IncorrectPid) => {
                warn!(pid = self.pid, to, "invalid message recipient, dropped")
            }
            Err(SimError::Cancelled) => {
                debug!(pid = self.pid, to, "round cancelled mid-send, message dropped")
            }
        }
    }

    fn reply(&self, payload: Payload) {
        crossbeam::channel::select! {
            send(self.return_tx, payload) -> res => {
                if res.is_err() {
                    warn!(pid = self.pid, "return channel closed, response dropped");
                }
            }
            recv(self.cancel) -> _ => {
                debug!(pid = self.pid, "round cancelled mid-reply, response dropped");
            }
        }
    }

    fn trace(&self, payload: Payload) {
        crossbeam::channel::select! {
            send(self.trace_tx, payload) -> res => {
                if res.is_err() {
                    warn!(pid = self.pid, "trace channel closed, trace dropped");
                }
            }
            recv(self.cancel) -> _ => {}
        }
    }
}

/// Per-process record owned by the harness: the process itself, its
/// channels, and the buffers the collector fills during a round.
struct Pack {
    pid: Pid,
    process: Arc<Mutex<Box<dyn Process>>>,
    outbound: OutboundSlot,
    call_tx: Sender<Payload>,
    call_rx: Receiver<Payload>,
    return_tx: Sender<Payload>,
    return_rx: Receiver<Payload>,
    trace_tx: Sender<Payload>,
    trace_rx: Receiver<Payload>,
    tick_tx: Sender<u64>,
    tick_rx: Receiver<u64>,
    responses: Arc<Mutex<Vec<Payload>>>,
    traces: Arc<Mutex<Vec<Payload>>>,
}

/// Staged single-shot round inputs. Restaging overwrites; `round`
/// consumes.
#[derive(Default)]
struct Staged {
    inject: Option<InjectFn>,
    filter: Option<Option<FilterFn>>,
    tick: Option<u64>,
}

struct Registry {
    packs: Vec<Pack>,
    staged: Staged,
}

/// The simulation harness. See the crate docs for the architecture.
pub struct Harness {
    config: Config,
    /// Registry and staging slots; doubles as the round lock.
    registry: Mutex<Registry>,
    /// Link buffers, persistent across rounds.
    buffers: Arc<RwLock<BufferMatrix>>,
    /// Installed filter, persistent across rounds until restaged.
    filter: Arc<Mutex<Option<FilterFn>>>,
    /// The most recent round's session, for status snapshots.
    session: Mutex<Arc<Session>>,
}

impl Harness {
    /// An empty harness; register processes with [`Harness::add_process`].
    pub fn new(config: Config) -> Self {
        Self {
            config,
            registry: Mutex::new(Registry {
                packs: Vec::new(),
                staged: Staged::default(),
            }),
            buffers: Arc::new(RwLock::new(BufferMatrix::new(0))),
            filter: Arc::new(Mutex::new(None)),
            session: Mutex::new(Arc::new(Session::new(0))),
        }
    }

    /// A harness with `scale` processes built by `factory`.
    pub fn with_fleet<F>(config: Config, scale: usize, factory: F) -> Self
    where
        F: Fn(Pid, Api) -> Box<dyn Process>,
    {
        let harness = Self::new(config);
        for _ in 0..scale {
            harness.add_process(&factory);
        }
        harness
    }

    /// Register a process at the next free pid and return that pid.
    ///
    /// The factory receives the pid and the [`Api`] the process is bound
    /// to for its lifetime.
    pub fn add_process<F>(&self, factory: F) -> Pid
    where
        F: FnOnce(Pid, Api) -> Box<dyn Process>,
    {
        let mut registry = self.registry.lock().unwrap();
        let pid = registry.packs.len();

        let api = Api::new(pid, self.config.debug);
        let outbound = api.outbound_slot();
        let process = factory(pid, api);

        let (call_tx, call_rx) = bounded(0);
        let (return_tx, return_rx) = bounded(0);
        let (trace_tx, trace_rx) = bounded(0);
        let (tick_tx, tick_rx) = bounded(0);

        registry.packs.push(Pack {
            pid,
            process: Arc::new(Mutex::new(process)),
            outbound,
            call_tx,
            call_rx,
            return_tx,
            return_rx,
            trace_tx,
            trace_rx,
            tick_tx,
            tick_rx,
            responses: Arc::new(Mutex::new(Vec::new())),
            traces: Arc::new(Mutex::new(Vec::new())),
        });
        self.buffers.write().unwrap().ensure_scale(pid + 1);
        pid
    }

    /// Number of registered processes.
    pub fn scale(&self) -> usize {
        self.registry.lock().unwrap().packs.len()
    }

    // ─── Staging ────────────────────────────────────────────────────────

    /// Stage an injector for the next round. The actual calls happen
    /// inside [`Harness::round`]; restaging overwrites.
    pub fn inject<F>(&self, inject: F)
    where
        F: Fn(Pid, &Client) + Send + Sync + 'static,
    {
        self.registry.lock().unwrap().staged.inject = Some(Arc::new(inject));
    }

    /// Stage a link filter for the next round. `None` opens every link.
    /// Once a round installs it, the filter stays in force across
    /// subsequent rounds until restaged.
    pub fn filter(&self, filter: Option<FilterFn>) {
        self.registry.lock().unwrap().staged.filter = Some(filter);
    }

    /// Stage a tick: the next round delivers `delta` to every process's
    /// `tick` handler.
    pub fn tick(&self, delta: u64) {
        self.registry.lock().unwrap().staged.tick = Some(delta);
    }

    // ─── Rounds ─────────────────────────────────────────────────────────

    /// Run one round to quiescence. See the module docs for the steps.
    ///
    /// Returns per-pid responses and traces, drained — a second round with
    /// no staging in between yields empty vectors.
    #[allow(clippy::type_complexity)]
    pub fn round(&self) -> Result<(Vec<Vec<Payload>>, Vec<Vec<Payload>>), SimError> {
        self.round_with_cancel(&never())
    }

    /// Like [`Harness::round`], but aborts with [`SimError::Cancelled`] if
    /// `cancel` fires (a message or a disconnect) before quiescence.
    /// Workers are still torn down in order; partial results are
    /// discarded, buffered link messages persist.
    #[allow(clippy::type_complexity)]
    pub fn round_with_cancel(
        &self,
        cancel: &Receiver<()>,
    ) -> Result<(Vec<Vec<Payload>>, Vec<Vec<Payload>>), SimError> {
        let mut registry = self.registry.lock().unwrap();
        let registry = &mut *registry;
        let scale = registry.packs.len();
        debug!(scale, "round starting");

        let session = Arc::new(Session::new(scale));
        *self.session.lock().unwrap() = Arc::clone(&session);

        // Consume the staged filter before the fabric comes up.
        if let Some(staged) = registry.staged.filter.take() {
            *self.filter.lock().unwrap() = staged;
        }

        let net = Net::with_state(scale, Arc::clone(&self.buffers), Arc::clone(&self.filter));
        let (cancel_tx, cancel_rx) = bounded::<()>(0);

        // Wire every Api to this round's fabric.
        let sender = net.sender_handle();
        for pack in &registry.packs {
            *pack.outbound.lock().unwrap() = Some(Box::new(RoundOutbound {
                pid: pack.pid,
                net: sender.clone(),
                return_tx: pack.return_tx.clone(),
                trace_tx: pack.trace_tx.clone(),
                cancel: cancel_rx.clone(),
            }));
        }

        let mut workers: Vec<JoinHandle<()>> = Vec::new();
        workers.push(net.spawn(Arc::clone(&session), cancel_rx.clone()));

        for pack in &registry.packs {
            let ports: Vec<_> = (0..scale)
                .map(|from| net.recv(pack.pid, from).expect("pid within scale"))
                .collect();
            let pid = pack.pid;
            let process = Arc::clone(&pack.process);
            let call_rx = pack.call_rx.clone();
            let tick_rx = pack.tick_rx.clone();
            let cancel = cancel_rx.clone();
            let session = Arc::clone(&session);
            let debug_log = self.config.debug;
            workers.push(
                thread::Builder::new()
                    .name(format!("proc-{pid}"))
                    .spawn(move || {
                        process_loop(
                            pid, process, ports, call_rx, tick_rx, cancel, session, debug_log,
                        )
                    })
                    .expect("failed to spawn process loop"),
            );
        }

        {
            let return_rx: Vec<_> = registry.packs.iter().map(|p| p.return_rx.clone()).collect();
            let trace_rx: Vec<_> = registry.packs.iter().map(|p| p.trace_rx.clone()).collect();
            let responses: Vec<_> = registry
                .packs
                .iter()
                .map(|p| Arc::clone(&p.responses))
                .collect();
            let traces: Vec<_> = registry.packs.iter().map(|p| Arc::clone(&p.traces)).collect();
            let cancel = cancel_rx.clone();
            let session = Arc::clone(&session);
            let debug_log = self.config.debug;
            workers.push(
                thread::Builder::new()
                    .name("collector".to_string())
                    .spawn(move || {
                        collect_loop(
                            return_rx, trace_rx, responses, traces, cancel, session, debug_log,
                        )
                    })
                    .expect("failed to spawn collector"),
            );
        }

        // Consume the staged injector: one thread per process.
        if let Some(inject) = registry.staged.inject.take() {
            for pack in &registry.packs {
                let client = Client {
                    pid: pack.pid,
                    call_tx: pack.call_tx.clone(),
                    cancel: cancel_rx.clone(),
                    debug: self.config.debug,
                };
                let inject = Arc::clone(&inject);
                let pid = pack.pid;
                workers.push(
                    thread::Builder::new()
                        .name(format!("inject-{pid}"))
                        .spawn(move || inject(pid, &client))
                        .expect("failed to spawn injector"),
                );
            }
        }

        // Consume the staged tick: fan the same delta out to every process.
        if let Some(delta) = registry.staged.tick.take() {
            for pack in &registry.packs {
                let tick_tx = pack.tick_tx.clone();
                let cancel = cancel_rx.clone();
                let pid = pack.pid;
                workers.push(
                    thread::Builder::new()
                        .name(format!("tick-{pid}"))
                        .spawn(move || {
                            crossbeam::channel::select! {
                                send(tick_tx, delta) -> res => {
                                    if res.is_err() {
                                        warn!(pid, "tick channel closed, tick dropped");
                                    }
                                }
                                recv(cancel) -> _ => {}
                            }
                        })
                        .expect("failed to spawn tick fan-out"),
                );
            }
        }

        let outcome = wait_for_quiescence(&session, cancel);

        // Teardown: dropping the sender trips every worker's cancellation
        // case, so all blocking points unwind and the joins complete.
        drop(cancel_tx);
        for worker in workers {
            if worker.join().is_err() {
                warn!("worker panicked during round");
            }
        }
        for pack in &registry.packs {
            *pack.outbound.lock().unwrap() = None;
        }

        match outcome {
            Ok(()) => {
                let mut responses = Vec::with_capacity(scale);
                let mut traces = Vec::with_capacity(scale);
                for pack in &registry.packs {
                    responses.push(std::mem::take(&mut *pack.responses.lock().unwrap()));
                    traces.push(std::mem::take(&mut *pack.traces.lock().unwrap()));
                }
                debug!(scale, "round complete");
                Ok((responses, traces))
            }
            Err(err) => {
                // Partial results are discarded; link buffers persist.
                for pack in &registry.packs {
                    pack.responses.lock().unwrap().clear();
                    pack.traces.lock().unwrap().clear();
                }
                debug!("round cancelled");
                Err(err)
            }
        }
    }

    // ─── Telemetry ──────────────────────────────────────────────────────

    /// One-line runtime snapshot: network counters, session idle mask,
    /// profiling triples.
    pub fn status(&self) -> String {
        let (received, buffered, sent) = self.buffers.read().unwrap().stats();
        let session = Arc::clone(&self.session.lock().unwrap());
        format!(
            "net [{:5}/{:5}/{:5}] session {} profs {}",
            received,
            buffered,
            sent,
            session.status(),
            session.profs(),
        )
    }

    /// ASCII table of per-link buffer depths.
    pub fn buffer_stats(&self) -> String {
        self.buffers.read().unwrap().render()
    }
}

/// Two-phase quiescence wait: first make sure at least one worker has been
/// observed busy (they all start that way), then wait for everyone to go
/// idle, polling the caller's cancellation channel throughout.
fn wait_for_quiescence(session: &Session, cancel: &Receiver<()>) -> Result<(), SimError> {
    let cancelled = || {
        matches!(
            cancel.try_recv(),
            Ok(()) | Err(TryRecvError::Disconnected)
        )
    };

    while session.is_idle() {
        if cancelled() {
            return Err(SimError::Cancelled);
        }
        thread::sleep(ROUND_POLL_INTERVAL);
    }
    loop {
        if cancelled() {
            return Err(SimError::Cancelled);
        }
        if session.is_idle() {
            return Ok(());
        }
        thread::sleep(ROUND_POLL_INTERVAL);
    }
}
