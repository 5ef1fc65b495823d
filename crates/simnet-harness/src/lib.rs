//! Discrete simulation harness for distributed message-passing algorithms.
//!
//! User-defined [`Process`](simnet_core::Process) implementations are wired
//! into a simulated fully-connected network. An external injector pushes
//! client calls, logical time advances on explicit ticks, a filter can sever
//! links, and a [`Harness::round`] runs the fleet until it quiesces, handing
//! back per-process responses and traces.
//!
//! # Architecture
//!
//! ```text
//! injector ─▶ call_tx ─▶ ProcessLoop ─▶ Process ─┬▶ Net (per-link FIFO) ─▶ ProcessLoop …
//!                                                ├▶ return_tx ─▶ Collector
//!                                                └▶ trace_tx  ─▶ Collector
//! ```
//!
//! Every worker is a named thread multiplexing crossbeam channels through a
//! `Select`; a worker that sees no event for a short grace period reports
//! itself idle to the round's [`Session`], sleeps briefly, and reports back
//! busy. A round is over when the network, the collector, and every process
//! loop are simultaneously idle.

mod harness;
mod net;
mod session;
mod worker;

pub use harness::{Client, Config, Harness, InjectFn};
pub use net::{FilterFn, Net};
pub use session::Session;

use std::time::Duration;

/// Grace period of silence before a worker reports itself idle.
pub(crate) const IDLE_TIMEOUT: Duration = Duration::from_millis(10);

/// How long an idle worker sleeps before rejoining its select loop.
pub(crate) const IDLE_SLEEP: Duration = Duration::from_millis(100);
