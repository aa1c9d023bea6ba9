//! Structured `tracing` output: one JSON object per event, appended to a file.

use crate::app::{log_debug, logging_requested};
use crate::config::AppConfig;
use std::env;
use std::ffi::OsString;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::OnceLock;
use tracing::Level;
use tracing_subscriber::fmt::time::UtcTime;

const TRACE_LOG_ENV: &str = "TICKETPIPE_TRACE_LOG";

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Explicit `TICKETPIPE_TRACE_LOG` value, else the temp-dir default. Empty means unset.
fn trace_path(explicit: Option<OsString>) -> PathBuf {
    explicit
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| env::temp_dir().join("ticketpipe_trace.jsonl"))
}

/// Install the JSON subscriber once, when file logging is on.
///
/// Events carry thread names so reader-side and caller-side records can be
/// told apart; `--log-content` raises the level to include per-line traces.
pub fn init_tracing(config: &AppConfig) {
    if !logging_requested(config) {
        return;
    }
    let level = if config.log_content {
        Level::TRACE
    } else {
        Level::DEBUG
    };

    TRACING_INIT.get_or_init(|| {
        let path = trace_path(env::var_os(TRACE_LOG_ENV));
        let file = match OpenOptions::new().create(true).append(true).open(&path) {
            Ok(file) => file,
            Err(err) => {
                log_debug(&format!("trace log {} unavailable: {err}", path.display()));
                return;
            }
        };
        let subscriber = tracing_subscriber::fmt()
            .json()
            .with_timer(UtcTime::rfc_3339())
            .with_max_level(level)
            .with_thread_names(true)
            .with_writer(file)
            .with_current_span(false)
            .with_span_list(false)
            .finish();
        if tracing::subscriber::set_global_default(subscriber).is_err() {
            log_debug("another tracing subscriber is already installed");
        }
    });
}
