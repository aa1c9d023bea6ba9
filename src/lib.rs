//! Client library for a line-oriented ticket server running as a child process.
//!
//! [`pipe_session`] owns the process and its pipes, [`protocol`] turns requests
//! into tokened lines and routes replies back, and [`client`] ties the two together.

mod app;
pub mod client;
pub mod config;
pub mod payload;
pub mod pipe_session;
pub mod protocol;
pub mod signals;
mod telemetry;
#[cfg(test)]
mod test_support;
pub mod ticket_order;

pub use app::{
    crash_log_path, init_logging, install_panic_hook, log_debug,
    log_file_path, log_panic, log_wire, WireDirection,
};
pub use client::{ClientEvent, ClientOptions, ServerClient};
pub use telemetry::init_tracing;
