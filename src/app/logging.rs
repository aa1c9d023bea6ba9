//! File logging that never touches stdout, which carries the JSON event stream.
//!
//! Three sinks share one size policy: the debug log, the content-gated wire
//! log lines written into it, and the crash log. A sink that outgrows its cap
//! is renamed to `<name>.1` (replacing the previous generation) and a fresh
//! file is started.

use crate::config::AppConfig;
use std::{
    env, fs,
    io::Write,
    panic,
    path::{Path, PathBuf},
    process,
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex, OnceLock,
    },
    thread,
    time::{SystemTime, UNIX_EPOCH},
};

const LOG_MAX_BYTES: u64 = 5 * 1024 * 1024;
const CRASH_LOG_MAX_BYTES: u64 = 256 * 1024;
/// Wire lines longer than this are cut; RESULT payloads can be whole attachments.
const WIRE_PREVIEW_CHARS: usize = 160;

static LOG_ENABLED: AtomicBool = AtomicBool::new(false);
static LOG_CONTENT_ENABLED: AtomicBool = AtomicBool::new(false);
static DEBUG_SINK: OnceLock<Mutex<Option<LogSink>>> = OnceLock::new();
static PANIC_HOOK_INSTALLED: OnceLock<()> = OnceLock::new();

pub fn log_file_path() -> PathBuf {
    env::temp_dir().join("ticketpipe.log")
}

pub fn crash_log_path() -> PathBuf {
    env::temp_dir().join("ticketpipe_crash.log")
}

/// Which way a protocol line travelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireDirection {
    ToServer,
    FromServer,
}

impl WireDirection {
    fn arrow(self) -> &'static str {
        match self {
            WireDirection::ToServer => ">>",
            WireDirection::FromServer => "<<",
        }
    }
}

/// Append-only file with a byte cap and one rotated generation.
struct LogSink {
    path: PathBuf,
    file: fs::File,
    max_bytes: u64,
    len: u64,
}

impl LogSink {
    fn open(path: &Path, max_bytes: u64) -> Option<Self> {
        let len = fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .ok()?;
        let mut sink = Self {
            path: path.to_path_buf(),
            file,
            max_bytes,
            len,
        };
        if sink.len > max_bytes {
            sink.rotate();
        }
        Some(sink)
    }

    fn backup_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".1");
        PathBuf::from(name)
    }

    fn rotate(&mut self) {
        let _ = fs::rename(&self.path, self.backup_path());
        if let Ok(file) = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)
        {
            self.file = file;
            self.len = 0;
        }
    }

    fn append(&mut self, line: &str) {
        if self.len > 0 && self.len.saturating_add(line.len() as u64) > self.max_bytes {
            self.rotate();
        }
        if self.file.write_all(line.as_bytes()).is_ok() {
            self.len = self.len.saturating_add(line.len() as u64);
        }
    }
}

fn debug_sink() -> &'static Mutex<Option<LogSink>> {
    DEBUG_SINK.get_or_init(|| Mutex::new(None))
}

fn stamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn configure(enabled: bool, content_enabled: bool) {
    LOG_ENABLED.store(enabled, Ordering::Relaxed);
    LOG_CONTENT_ENABLED.store(enabled && content_enabled, Ordering::Relaxed);
    let sink = enabled
        .then(|| LogSink::open(&log_file_path(), LOG_MAX_BYTES))
        .flatten();
    *debug_sink()
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner()) = sink;
}

/// `--logs` (or `TICKETPIPE_LOGS`) without `--no-logs`.
pub fn logging_requested(config: &AppConfig) -> bool {
    config.logs && !config.no_logs
}

pub fn init_logging(config: &AppConfig) {
    configure(logging_requested(config), config.log_content);
}

/// Append `[unix_ts] msg` to the debug log when logging is on.
pub fn log_debug(msg: &str) {
    if !LOG_ENABLED.load(Ordering::Relaxed) {
        return;
    }
    let line = format!("[{}] {msg}\n", stamp());
    let mut sink = debug_sink()
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    if let Some(sink) = sink.as_mut() {
        sink.append(&line);
    }
}

/// Record one protocol line exchanged with the server; needs `--log-content`.
pub fn log_wire(direction: WireDirection, line: &str) {
    if LOG_CONTENT_ENABLED.load(Ordering::Relaxed) {
        log_debug(&format!("{} {}", direction.arrow(), wire_preview(line)));
    }
}

/// Single-line, length-capped rendering of server traffic.
///
/// Control characters are escaped so a stray `\r` or escape sequence from the
/// server cannot garble the log, and long payloads keep only their head.
pub(crate) fn wire_preview(line: &str) -> String {
    let body = line.strip_suffix('\n').unwrap_or(line);
    let mut preview = String::new();
    for (taken, ch) in body.chars().enumerate() {
        if taken == WIRE_PREVIEW_CHARS {
            preview.push_str(&format!("... ({} bytes)", body.len()));
            return preview;
        }
        if ch.is_control() {
            preview.extend(ch.escape_default());
        } else {
            preview.push(ch);
        }
    }
    preview
}

fn panic_payload(info: &panic::PanicHookInfo<'_>) -> String {
    if !LOG_CONTENT_ENABLED.load(Ordering::Relaxed) {
        return "payload omitted (log-content disabled)".to_string();
    }
    // Panic messages can quote server output, so they get the same treatment.
    if let Some(text) = info.payload().downcast_ref::<&str>() {
        wire_preview(text)
    } else if let Some(text) = info.payload().downcast_ref::<String>() {
        wire_preview(text)
    } else {
        "non-string panic payload".to_string()
    }
}

/// Append a crash record: location, thread, pid and (with `--log-content`) payload.
pub fn log_panic(info: &panic::PanicHookInfo<'_>) {
    if !LOG_ENABLED.load(Ordering::Relaxed) {
        return;
    }
    let location = info
        .location()
        .map(|loc| format!("{}:{}", loc.file(), loc.line()))
        .unwrap_or_else(|| "unknown".to_string());
    let current = thread::current();
    let thread_name = current.name().unwrap_or("unnamed");
    let line = format!(
        "[{}] pid {} thread {thread_name} panicked at {location}: {} (v{})\n",
        stamp(),
        process::id(),
        panic_payload(info),
        env!("CARGO_PKG_VERSION")
    );
    if let Some(mut sink) = LogSink::open(&crash_log_path(), CRASH_LOG_MAX_BYTES) {
        sink.append(&line);
    }
}

/// Record panics (including ones on the reader thread) before the default report.
pub fn install_panic_hook() {
    PANIC_HOOK_INSTALLED.get_or_init(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            log_panic(info);
            log_debug("panic recorded in crash log");
            previous(info);
        }));
    });
}
