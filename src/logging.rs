//! Injectable logging port.
//!
//! Proving and initialization report progress through a [`Logger`] handed
//! to them by the caller.  Nothing here installs a subscriber: embedders
//! either keep the silent [`NoopLogger`] or forward to their `tracing`
//! setup with [`TracingLogger`].

use std::fmt;
use std::sync::Arc;

/// Leveled message sink.
pub trait Logger: Send + Sync {
    /// Progress worth surfacing to an operator.
    fn info(&self, args: fmt::Arguments<'_>);
    /// Detail useful when diagnosing a run.
    fn debug(&self, args: fmt::Arguments<'_>);
}

/// Discards every message.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLogger;

impl Logger for NoopLogger {
    fn info(&self, _args: fmt::Arguments<'_>) {}
    fn debug(&self, _args: fmt::Arguments<'_>) {}
}

/// Forwards messages to the `tracing` macros under the `post_core` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn info(&self, args: fmt::Arguments<'_>) {
        tracing::info!(target: "post_core", "{}", args);
    }

    fn debug(&self, args: fmt::Arguments<'_>) {
        tracing::debug!(target: "post_core", "{}", args);
    }
}

/// Shared handle used by long-running components.
pub type SharedLogger = Arc<dyn Logger>;

/// The default, silent logger.
pub fn noop() -> SharedLogger {
    Arc::new(NoopLogger)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::cancel::CancelToken;
    use std::sync::Mutex;

    /// Records messages so tests can assert on what was reported.
    #[derive(Debug, Default)]
    pub struct RecordingLogger {
        pub lines: Mutex<Vec<String>>,
    }

    impl RecordingLogger {
        pub fn contains(&self, needle: &str) -> bool {
            self.lines
                .lock()
                .map(|lines| lines.iter().any(|line| line.contains(needle)))
                .unwrap_or(false)
        }
    }

    impl Logger for RecordingLogger {
        fn info(&self, args: fmt::Arguments<'_>) {
            if let Ok(mut lines) = self.lines.lock() {
                lines.push(format!("INFO {args}"));
            }
        }

        fn debug(&self, args: fmt::Arguments<'_>) {
            if let Ok(mut lines) = self.lines.lock() {
                lines.push(format!("DEBUG {args}"));
            }
        }
    }

    /// Cancels `token` the first time a message containing `needle` is
    /// logged, standing in for a caller that gives up part way through.
    #[derive(Debug)]
    pub struct CancelOnMessage {
        pub token: CancelToken,
        pub needle: &'static str,
    }

    impl CancelOnMessage {
        fn observe(&self, args: fmt::Arguments<'_>) {
            if args.to_string().contains(self.needle) {
                self.token.cancel();
            }
        }
    }

    impl Logger for CancelOnMessage {
        fn info(&self, args: fmt::Arguments<'_>) {
            self.observe(args);
        }

        fn debug(&self, args: fmt::Arguments<'_>) {
            self.observe(args);
        }
    }

    #[test]
    fn recording_logger_keeps_levels() {
        let logger = RecordingLogger::default();
        logger.info(format_args!("scanned {} labels", 10));
        logger.debug(format_args!("batch {}", 3));
        assert!(logger.contains("INFO scanned 10 labels"));
        assert!(logger.contains("DEBUG batch 3"));
        NoopLogger.info(format_args!("dropped"));
    }
}
