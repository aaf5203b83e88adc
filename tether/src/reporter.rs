//! Surface for user-visible failure messages.

use crate::tracing::prelude::*;

/// Receives messages the user should see.
///
/// Reporting is fire-and-forget: implementations must not block and the
/// manager does not learn whether the message was shown.
pub trait ErrorReporter: Send + Sync {
    fn show(&self, message: &str);
}

/// Reporter that writes messages to the log at error level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl ErrorReporter for LogReporter {
    fn show(&self, message: &str) {
        error!("{}", message);
    }
}
