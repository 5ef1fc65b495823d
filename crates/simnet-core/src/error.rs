//! Harness error taxonomy.

/// Errors surfaced by the harness to its caller.
///
/// User-process failures are never surfaced here — processes report them
/// through `Api::report_error`, where they are logged and traced without
/// terminating the round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SimError {
    /// A process id outside `[0, scale)` was passed to a pid-indexed operation.
    #[error("process id out of range")]
    IncorrectPid,
    /// The round was cancelled before reaching quiescence.
    #[error("round cancelled")]
    Cancelled,
}
