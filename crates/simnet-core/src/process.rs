//! The process contract and its capability handle.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

/// Process identifier. Contiguous in `[0, scale)` within one harness.
pub type Pid = usize;

/// Opaque payload crossing component boundaries.
///
/// The harness routes payloads without inspecting them; user code downcasts
/// on receipt. `Sync` is required because buffered payloads are visible
/// through the fabric's shared statistics lock.
pub type Payload = Box<dyn Any + Send + Sync>;

/// Box a value into a [`Payload`].
pub fn payload<T: Any + Send + Sync>(value: T) -> Payload {
    Box::new(value)
}

/// A distributed algorithm under test. One instance per process id.
///
/// Handlers are invoked strictly sequentially by the process's dispatch
/// loop: a handler completes before the next event is dispatched, so
/// implementations need no internal synchronization. A handler must not
/// block indefinitely — the harness can only detect quiescence once every
/// handler has returned.
pub trait Process: Send {
    /// A message from another process arrived on the link `(from → self)`.
    fn receive_net(&mut self, from: Pid, payload: Payload);

    /// An external client call was injected into this process.
    fn receive_call(&mut self, payload: Payload);

    /// Logical time advanced by `delta`.
    fn tick(&mut self, delta: u64);
}

/// Round-scoped outbound capabilities behind [`Api`].
///
/// Implemented by the runtime crate and swapped into each process's `Api`
/// at the start of every round, so that sends land in that round's link
/// fabric and unblock promptly on round teardown.
pub trait Outbound: Send {
    /// Enqueue `payload` on the link `(self → to)`.
    fn send(&self, to: Pid, payload: Payload);

    /// Return a response to this process's client.
    fn reply(&self, payload: Payload);

    /// Emit a trace record.
    fn trace(&self, payload: Payload);
}

/// Shared slot through which the runtime wires a round's [`Outbound`]
/// implementation into an [`Api`].
pub type OutboundSlot = Arc<Mutex<Option<Box<dyn Outbound>>>>;

/// Handle a process uses to communicate with the harness.
///
/// Bound once, at construction: registration factories receive
/// `(pid, api)` and build the process around it. All operations are
/// synchronous hand-offs into the runtime and may block until the runtime
/// accepts them; outside an active round they log and drop.
pub struct Api {
    pid: Pid,
    outbound: OutboundSlot,
    debug: bool,
}

impl Api {
    /// Create a handle for process `pid`. Used by the runtime at
    /// registration time.
    pub fn new(pid: Pid, debug: bool) -> Self {
        Self {
            pid,
            outbound: Arc::new(Mutex::new(None)),
            debug,
        }
    }

    /// The slot the runtime rewires each round.
    pub fn outbound_slot(&self) -> OutboundSlot {
        Arc::clone(&self.outbound)
    }

    /// The id of the process this handle belongs to.
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Send a message to process `to`.
    ///
    /// An out-of-range `to` is logged and the message dropped; the process
    /// keeps running.
    pub fn send(&self, to: Pid, payload: Payload) {
        if self.debug {
            debug!(pid = self.pid, to, "sending message");
        }
        match &*self.outbound.lock().unwrap() {
            Some(out) => out.send(to, payload),
            None => warn!(pid = self.pid, to, "send outside an active round, message dropped"),
        }
    }

    /// Return a response to this process's client. Collected into the
    /// round's per-process responses.
    pub fn reply(&self, payload: Payload) {
        if self.debug {
            debug!(pid = self.pid, "returning call");
        }
        match &*self.outbound.lock().unwrap() {
            Some(out) => out.reply(payload),
            None => warn!(pid = self.pid, "reply outside an active round, response dropped"),
        }
    }

    /// Emit a trace record. Collected into the round's per-process traces.
    pub fn trace(&self, payload: Payload) {
        match &*self.outbound.lock().unwrap() {
            Some(out) => out.trace(payload),
            None => warn!(pid = self.pid, "trace outside an active round, dropped"),
        }
    }

    /// Escalate an error from inside a handler.
    ///
    /// The error is logged and appended to the process's trace stream as a
    /// `String`; the round continues.
    pub fn report_error(&self, err: impl fmt::Display) {
        let msg = err.to_string();
        warn!(pid = self.pid, error = %msg, "process reported error");
        match &*self.outbound.lock().unwrap() {
            Some(out) => out.trace(Box::new(msg)),
            None => warn!(pid = self.pid, "error reported outside an active round, dropped"),
        }
    }
}
