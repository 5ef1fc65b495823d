//! Round-scoped worker loops: per-process dispatch and result collection.
//!
//! Each worker multiplexes its channels through one `Select`, reports
//! idle/busy transitions to the round's [`Session`], and exits when the
//! round's cancellation channel fires. Handlers are dispatched inline, so
//! a process running a handler can never appear idle.

use std::sync::{Arc, Mutex};
use std::thread;

use crossbeam::channel::{Receiver, Select};
use tracing::{debug, warn};

use simnet_core::{Payload, Pid, Process};

use crate::session::Session;
use crate::{IDLE_SLEEP, IDLE_TIMEOUT};

/// Dispatch loop for one process.
///
/// Selects over the process's `scale` network receive ports, its client
/// call channel, its tick channel, and cancellation, with an idle grace
/// timeout.
#[allow(clippy::too_many_arguments)]
pub(crate) fn process_loop(
    pid: Pid,
    process: Arc<Mutex<Box<dyn Process>>>,
    ports: Vec<Receiver<Payload>>,
    call_rx: Receiver<Payload>,
    tick_rx: Receiver<u64>,
    cancel: Receiver<()>,
    session: Arc<Session>,
    debug_log: bool,
) {
    let _ = session.prof_process_start(pid);
    let scale = ports.len();

    let mut sel = Select::new();
    for port in &ports {
        sel.recv(port);
    }
    let call_index = sel.recv(&call_rx);
    let tick_index = sel.recv(&tick_rx);
    let cancel_index = sel.recv(&cancel);

    loop {
        let _ = session.prof_process_select_start(pid);
        let op = sel.select_timeout(IDLE_TIMEOUT);
        session.prof_process_select_end(pid);

        let op = match op {
            Ok(op) => op,
            Err(_) => {
                let _ = session.report_process_idle(pid);
                thread::sleep(IDLE_SLEEP);
                let _ = session.report_process_busy(pid);
                continue;
            }
        };

        let index = op.index();
        if index < scale {
            match op.recv(&ports[index]) {
                Ok(payload) => {
                    if debug_log {
                        debug!(pid, from = index, "dispatching network message");
                    }
                    process.lock().unwrap().receive_net(index, payload);
                }
                Err(_) => warn!(pid, from = index, "receive port closed, event skipped"),
            }
        } else if index == call_index {
            match op.recv(&call_rx) {
                Ok(payload) => {
                    if debug_log {
                        debug!(pid, "dispatching client call");
                    }
                    process.lock().unwrap().receive_call(payload);
                }
                Err(_) => warn!(pid, "call channel closed, event skipped"),
            }
        } else if index == tick_index {
            match op.recv(&tick_rx) {
                Ok(delta) => {
                    if debug_log {
                        debug!(pid, delta, "dispatching tick");
                    }
                    process.lock().unwrap().tick(delta);
                }
                Err(_) => warn!(pid, "tick channel closed, event skipped"),
            }
        } else if index == cancel_index {
            let _ = op.recv(&cancel);
            if debug_log {
                debug!(pid, "process loop cancelled");
            }
            let _ = session.report_process_idle(pid);
            return;
        }
    }
}

/// Drains every process's return and trace channels into the per-process
/// result buffers. One collector per round.
pub(crate) fn collect_loop(
    return_rx: Vec<Receiver<Payload>>,
    trace_rx: Vec<Receiver<Payload>>,
    responses: Vec<Arc<Mutex<Vec<Payload>>>>,
    traces: Vec<Arc<Mutex<Vec<Payload>>>>,
    cancel: Receiver<()>,
    session: Arc<Session>,
    debug_log: bool,
) {
    session.prof_collect_start();
    let scale = return_rx.len();

    let mut sel = Select::new();
    for rx in &return_rx {
        sel.recv(rx);
    }
    for rx in &trace_rx {
        sel.recv(rx);
    }
    let cancel_index = sel.recv(&cancel);

    loop {
        session.prof_collect_select_start();
        let op = sel.select_timeout(IDLE_TIMEOUT);
        session.prof_collect_select_end();

        let op = match op {
            Ok(op) => op,
            Err(_) => {
                session.report_collect_idle();
                thread::sleep(IDLE_SLEEP);
                session.report_collect_busy();
                continue;
            }
        };

        let index = op.index();
        if index < scale {
            match op.recv(&return_rx[index]) {
                Ok(payload) => {
                    if debug_log {
                        debug!(pid = index, "appending response");
                    }
                    responses[index].lock().unwrap().push(payload);
                }
                Err(_) => warn!(pid = index, "return channel closed, event skipped"),
            }
        } else if index < 2 * scale {
            let pid = index - scale;
            match op.recv(&trace_rx[pid]) {
                Ok(payload) => {
                    if debug_log {
                        debug!(pid, "appending trace");
                    }
                    traces[pid].lock().unwrap().push(payload);
                }
                Err(_) => warn!(pid, "trace channel closed, event skipped"),
            }
        } else if index == cancel_index {
            let _ = op.recv(&cancel);
            if debug_log {
                debug!("collector cancelled");
            }
            session.report_collect_idle();
            return;
        }
    }
}
