//! Ownership of the server child process and the pipes wired to its stdin/stdout.
//!
//! The supervisor spawns the server with two plain pipes, writes request lines
//! with a bounded timeout and tears the child down deterministically. A single
//! background reader turns the child's stdout into newline-terminated messages
//! delivered over a channel.

mod cancel;
mod counters;
mod framing;
mod io;
mod process;

#[cfg(test)]
mod tests;

pub use cancel::CancelToken;
pub use framing::{LineBuffer, MIN_HEADROOM};
pub use io::{spawn_line_reader, LineReader, ReaderEvent};
pub use process::ServerProcess;

#[cfg(any(test, feature = "mutants"))]
#[allow(unused_imports)]
pub(crate) use counters::{force_kill_count, reset_force_kill_count, set_write_limit};
