//! Core contracts for the simnet simulation harness.
//!
//! This crate defines the boundary between user code and the runtime:
//!
//! - [`Process`]: the trait a distributed algorithm implements
//! - [`Api`]: the capability handle a process uses to talk back to the harness
//! - [`Payload`]: the opaque, type-erased unit of data crossing every boundary
//! - [`SimError`]: the harness error taxonomy
//! - [`Tracer`]: a prefix-building helper for human-readable traces
//!
//! # Architecture
//!
//! The harness never inspects payload internals. Everything a process
//! receives or emits is a `Box<dyn Any + Send>`; user code downcasts on
//! receipt. The harness side of [`Api`] is the [`Outbound`] trait, wired in
//! per simulation round by the runtime crate.

mod error;
mod process;
mod tracer;

pub use error::SimError;
pub use process::{payload, Api, Outbound, OutboundSlot, Payload, Pid, Process};
pub use tracer::Tracer;
