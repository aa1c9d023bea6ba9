use super::defaults::{
    MAX_REPLY_TIMEOUT_MS, MAX_SHUTDOWN_GRACE_MS, MAX_WRITE_TIMEOUT_MS, MIN_REPLY_TIMEOUT_MS,
};
use super::AppConfig;
use anyhow::{bail, Result};
use clap::Parser;
use std::fs;

impl AppConfig {
    /// Parse CLI arguments and validate them right away.
    pub fn parse_args() -> Result<Self> {
        let mut config = Self::parse();
        config.validate()?;
        Ok(config)
    }

    /// Check CLI values. A missing server path is left to the caller.
    pub fn validate(&mut self) -> Result<()> {
        if self.write_timeout_ms == 0 || self.write_timeout_ms > MAX_WRITE_TIMEOUT_MS {
            bail!(
                "--write-timeout-ms must be between 1 and {MAX_WRITE_TIMEOUT_MS}, got {}",
                self.write_timeout_ms
            );
        }
        if !(MIN_REPLY_TIMEOUT_MS..=MAX_REPLY_TIMEOUT_MS).contains(&self.reply_timeout_ms) {
            bail!(
                "--reply-timeout-ms must be between {MIN_REPLY_TIMEOUT_MS} and {MAX_REPLY_TIMEOUT_MS}, got {}",
                self.reply_timeout_ms
            );
        }
        if self.shutdown_grace_ms > MAX_SHUTDOWN_GRACE_MS {
            bail!(
                "--shutdown-grace-ms must be at most {MAX_SHUTDOWN_GRACE_MS}, got {}",
                self.shutdown_grace_ms
            );
        }

        if let Some(ticket) = &self.ticket {
            validate_word("--ticket", ticket)?;
        }
        if let Some(id) = &self.download {
            validate_word("--download", id)?;
        }
        if self.output.is_some() && self.download.is_none() {
            bail!("--output requires --download");
        }

        if let Some(server) = &self.server {
            match fs::metadata(server) {
                Ok(meta) if meta.is_dir() => {
                    bail!("server path is a directory: {}", server.display())
                }
                Ok(_) => {}
                Err(err) => bail!("server path {} is not usable: {err}", server.display()),
            }
        }
        Ok(())
    }
}

/// Values that end up as request arguments must be one non-empty word.
fn validate_word(flag: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        bail!("{flag} must not be empty");
    }
    if value.chars().any(|c| c.is_whitespace() || c.is_control()) {
        bail!("{flag} must not contain whitespace or control characters: {value:?}");
    }
    Ok(())
}
