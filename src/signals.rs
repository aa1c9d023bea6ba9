//! Process signal handling.
//!
//! SIGPIPE must not kill the client when the server goes away mid-write; the
//! write simply fails. SIGINT and SIGTERM only raise a flag so the caller can
//! still run the orderly shutdown that reaps the server.

use crate::log_debug;
use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicBool, Ordering};

static SIGPIPE_RECEIVED: AtomicBool = AtomicBool::new(false);
static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_sigpipe(_: libc::c_int) {
    SIGPIPE_RECEIVED.store(true, Ordering::SeqCst);
}

extern "C" fn handle_shutdown(_: libc::c_int) {
    SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
}

fn install(signal: libc::c_int, name: &str, handler: extern "C" fn(libc::c_int)) -> Result<()> {
    // SAFETY: handlers only store to atomics, which is async-signal-safe.
    let previous = unsafe { libc::signal(signal, handler as *const () as libc::sighandler_t) };
    if previous == libc::SIG_ERR {
        log_debug(&format!("failed to install {name} handler"));
        return Err(anyhow!(
            "failed to install {name} handler: {}",
            std::io::Error::last_os_error()
        ));
    }
    Ok(())
}

/// Install the SIGPIPE, SIGINT and SIGTERM handlers.
pub fn install_signal_handlers() -> Result<()> {
    install(libc::SIGPIPE, "SIGPIPE", handle_sigpipe)?;
    install(libc::SIGINT, "SIGINT", handle_shutdown)?;
    install(libc::SIGTERM, "SIGTERM", handle_shutdown)?;
    Ok(())
}

/// Whether a SIGPIPE arrived since the last call; clears the flag.
pub fn take_sigpipe() -> bool {
    SIGPIPE_RECEIVED.swap(false, Ordering::SeqCst)
}

/// Whether SIGINT or SIGTERM asked the process to stop.
pub fn shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::SeqCst)
}
