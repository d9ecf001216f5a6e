//! Logging setup for the CLI and library.
//!
//! Compact timestamped output with per-target levels. Library code logs
//! under the targets `ingest`, `retrieval`, `answer`, `embedding`,
//! `generation`, `vector`, `storage` and `qa`.
//!
//! # Configuration
//!
//! ```toml
//! [logging]
//! default = "warn"  # quiet by default
//!
//! [logging.modules]
//! ingest = "info"   # per-document progress during sync
//! ```
//!
//! # Environment Variable
//!
//! `RUST_LOG` takes precedence over config:
//! ```bash
//! RUST_LOG=debug lecture-rag sync
//! RUST_LOG=retrieval=debug,generation=trace lecture-rag ask 1 "What is a heap?"
//! ```

use std::sync::Once;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::LoggingConfig;

static INIT: Once = Once::new();

/// Compact time format: HH:MM:SS.mmm
struct CompactTime;

impl FormatTime for CompactTime {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", chrono::Local::now().format("%H:%M:%S%.3f"))
    }
}

/// Filter directives built from config: the default level followed by
/// `target=level` pairs.
pub fn filter_directives(config: &LoggingConfig) -> String {
    let mut modules: Vec<_> = config.modules.iter().collect();
    modules.sort();

    let mut directives = config.default.clone();
    for (module, level) in modules {
        directives.push_str(&format!(",{module}={level}"));
    }
    directives
}

/// Initialize logging. Only the first call takes effect.
///
/// Logs go to stderr so streamed answers on stdout stay clean.
pub fn init_with_config(config: &LoggingConfig) {
    INIT.call_once(|| {
        let filter = if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            EnvFilter::new(filter_directives(config))
        };

        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_timer(CompactTime)
            .with_level(true)
            .with_filter(filter);

        tracing_subscriber::registry().with(fmt_layer).init();
    });
}

/// Log an info event under a target.
///
/// # Examples
/// ```ignore
/// log_event!("ingest", "indexed", "document {} ({} chunks)", id, count);
/// log_event!("qa", "cancelled");
/// ```
#[macro_export]
macro_rules! log_event {
    ($target:literal, $event:expr) => {
        tracing::info!(target: $target, "{}", $event)
    };
    ($target:literal, $event:expr, $($arg:tt)*) => {
        tracing::info!(target: $target, "{}: {}", $event, format!($($arg)*))
    };
}

/// Debug-level counterpart of [`log_event!`].
#[macro_export]
macro_rules! debug_event {
    ($target:literal, $event:expr) => {
        tracing::debug!(target: $target, "{}", $event)
    };
    ($target:literal, $event:expr, $($arg:tt)*) => {
        tracing::debug!(target: $target, "{}: {}", $event, format!($($arg)*))
    };
}
