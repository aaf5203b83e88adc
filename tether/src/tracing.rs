//! Provide tracing, tailored to this program.
//!
//! At startup, the daemon calls [`init_journald_or_stdout`] to install a
//! tracing subscriber. The rest of the crate uses
//! `use crate::tracing::prelude::*` for the logging macros and for the span
//! type that sessions record into.

use std::env;
use time::OffsetDateTime;
use tracing_subscriber::{
    filter::{EnvFilter, LevelFilter},
    fmt::{format::Writer, time::FormatTime},
    prelude::*,
};

pub mod prelude {
    #[allow(unused_imports)]
    pub use tracing::{debug, error, info, info_span, trace, warn, Span};
}

use prelude::*;

/// Name the daemon logs under in the journal.
pub const SYSLOG_IDENTIFIER: &str = "tetherd";

/// Variable holding the log filter, e.g. `TETHER_LOG=tether::manager=debug`.
pub const FILTER_ENV: &str = "TETHER_LOG";

/// Initialize logging.
///
/// Under systemd, log to the journal as [`SYSLOG_IDENTIFIER`]; otherwise
/// log to stdout.
pub fn init_journald_or_stdout() {
    if env::var("JOURNAL_STREAM").is_ok() {
        match tracing_journald::layer() {
            Ok(layer) => {
                tracing_subscriber::registry()
                    .with(filter())
                    .with(layer.with_syslog_identifier(SYSLOG_IDENTIFIER.to_string()))
                    .init();
            }
            Err(e) => {
                use_stdout();
                error!(error = %e, "Failed to initialize journald logging, using stdout.");
            }
        }
    } else {
        use_stdout();
    }
}

// Filter from TETHER_LOG, INFO when unset or unparsable.
fn filter() -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .with_env_var(FILTER_ENV)
        .from_env_lossy()
}

fn use_stdout() {
    tracing_subscriber::registry()
        .with(filter())
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_timer(ConsoleTimer),
        )
        .init();
}

// Wall-clock time of day, local when the offset is known. Console lines are
// read next to interactive commands, so seconds are enough.
struct ConsoleTimer;

impl FormatTime for ConsoleTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
        let stamp = now
            .format(time::macros::format_description!("[hour]:[minute]:[second]"))
            .map_err(|_| std::fmt::Error)?;
        write!(w, "{stamp}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_console_timer_writes_time_of_day() {
        let mut out = String::new();
        ConsoleTimer.format_time(&mut Writer::new(&mut out)).unwrap();

        let fields: Vec<&str> = out.split(':').collect();
        assert_eq!(fields.len(), 3);
        assert!(fields.iter().all(|f| f.len() == 2 && f.parse::<u8>().is_ok()));
    }
}
