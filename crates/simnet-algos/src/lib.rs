//! Sample distributed algorithms for the simnet harness.
//!
//! - [`cs`]: a request/response client–server pair with client-side
//!   timeouts driven by ticks
//! - [`dispatcher`]: followers forward client requests to a leader and
//!   relay its responses back
//! - [`forwarder`]: point-to-point forwarding of self-describing messages

pub mod cs;
pub mod dispatcher;
pub mod forwarder;
