//! Command-line parsing and validation helpers.

mod defaults;
mod validation;

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

pub use defaults::{
    DEFAULT_REPLY_TIMEOUT_MS, DEFAULT_SHUTDOWN_GRACE_MS, DEFAULT_WRITE_TIMEOUT_MS,
    MAX_REPLY_TIMEOUT_MS, MAX_SHUTDOWN_GRACE_MS, MAX_WRITE_TIMEOUT_MS, MIN_REPLY_TIMEOUT_MS,
};

use crate::client::ClientOptions;

/// CLI options for the ticketpipe client. Validated before any process is spawned.
#[derive(Debug, Parser, Clone)]
#[command(
    about = "Ticketpipe: headless client for a line-protocol ticket server",
    author,
    version
)]
pub struct AppConfig {
    /// Path to the ticket server executable
    #[arg(value_name = "SERVER")]
    pub server: Option<PathBuf>,

    /// Also fetch fields, rendered view and attachments of this ticket
    #[arg(long, value_name = "KEY")]
    pub ticket: Option<String>,

    /// Download the attachment with this id
    #[arg(long, value_name = "ATTACHMENT_ID")]
    pub download: Option<String>,

    /// File the downloaded attachment is written to (defaults to the id)
    #[arg(long, value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Upper bound for writing one request to the server (milliseconds)
    #[arg(long = "write-timeout-ms", default_value_t = DEFAULT_WRITE_TIMEOUT_MS)]
    pub write_timeout_ms: u64,

    /// How long to wait for the next reply before giving up (milliseconds)
    #[arg(long = "reply-timeout-ms", default_value_t = DEFAULT_REPLY_TIMEOUT_MS)]
    pub reply_timeout_ms: u64,

    /// Time the server gets to exit on its own before it is killed (milliseconds)
    #[arg(long = "shutdown-grace-ms", default_value_t = DEFAULT_SHUTDOWN_GRACE_MS)]
    pub shutdown_grace_ms: u64,

    /// Enable file logging (debug)
    #[arg(long = "logs", env = "TICKETPIPE_LOGS", default_value_t = false)]
    pub logs: bool,

    /// Disable all file logging (overrides --logs and log env vars)
    #[arg(long = "no-logs", env = "TICKETPIPE_NO_LOGS", default_value_t = false)]
    pub no_logs: bool,

    /// Allow logging ticket content (debug log only)
    #[arg(
        long = "log-content",
        env = "TICKETPIPE_LOG_CONTENT",
        default_value_t = false
    )]
    pub log_content: bool,
}

impl AppConfig {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            write_timeout: self.write_timeout(),
            shutdown_grace: self.shutdown_grace(),
            ..ClientOptions::default()
        }
    }

    /// Where `--download` writes its bytes.
    pub fn download_path(&self) -> Option<PathBuf> {
        let id = self.download.as_ref()?;
        Some(self.output.clone().unwrap_or_else(|| PathBuf::from(id)))
    }
}
