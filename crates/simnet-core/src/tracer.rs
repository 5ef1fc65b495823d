//! Prefix-building helper for human-readable traces.

/// Accumulates a `": "`-joined prefix for trace records.
///
/// Processes typically create one per handler invocation and fork it as
/// they narrow context:
///
/// ```
/// use simnet_core::Tracer;
///
/// let t = Tracer::new("recv [client]").fork("response 7");
/// assert_eq!(t.log("received"), "recv [client]: response 7: received");
/// ```
#[derive(Debug, Clone, Default)]
pub struct Tracer {
    prefix: String,
}

impl Tracer {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// A new tracer with `segment` appended to the prefix.
    pub fn fork(&self, segment: impl AsRef<str>) -> Self {
        let segment = segment.as_ref();
        if self.prefix.is_empty() {
            Self::new(segment)
        } else {
            Self::new(format!("{}: {}", self.prefix, segment))
        }
    }

    /// Format a trace message under the current prefix.
    pub fn log(&self, msg: impl AsRef<str>) -> String {
        let msg = msg.as_ref();
        if self.prefix.is_empty() {
            msg.to_string()
        } else {
            format!("{}: {}", self.prefix, msg)
        }
    }

    /// Format an error message under the current prefix. Pairs with
    /// `Api::report_error`.
    pub fn error(&self, msg: impl AsRef<str>) -> String {
        self.log(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_log_has_no_prefix() {
        let t = Tracer::default();
        assert_eq!(t.log("hello"), "hello");
    }

    #[test]
    fn fork_appends_segments() {
        let t = Tracer::new("tick [server]");
        assert_eq!(t.log("received"), "tick [server]: received");

        let forked = t.fork("round 3");
        assert_eq!(forked.log("done"), "tick [server]: round 3: done");
        // The parent tracer is unchanged.
        assert_eq!(t.log("done"), "tick [server]: done");
    }

    #[test]
    fn fork_from_empty_drops_separator() {
        let t = Tracer::default().fork("ctx");
        assert_eq!(t.log("msg"), "ctx: msg");
    }
}
