use crate::log_debug;
use anyhow::{Context, Result};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::io::{self, ErrorKind};
use std::os::fd::{AsRawFd, OwnedFd};
use std::os::unix::io::RawFd;
use std::thread;
use std::time::{Duration, Instant};

use super::cancel::CancelToken;
use super::counters::write_limit;
use super::framing::LineBuffer;

/// Longest single sleep between write retries.
const WRITE_RETRY_SLEEP: Duration = Duration::from_millis(5);
/// Back-off when a read reports would-block on a descriptor expected to block.
const READ_RETRY_SLEEP: Duration = Duration::from_millis(50);

/// What the background reader reports to its consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaderEvent {
    /// One complete line, trailing `\n` included.
    Line(String),
    /// Unrecoverable read failure. Sent at most once; the reader exits after it.
    Error(String),
    /// The child closed its stdout. Not an error; the reader exits after it.
    Closed,
}

pub(super) fn should_retry(err: &io::Error) -> bool {
    err.kind() == ErrorKind::Interrupted || err.kind() == ErrorKind::WouldBlock
}

/// Handle to the running line reader thread.
pub struct LineReader {
    events: Option<Receiver<ReaderEvent>>,
    cancel: CancelToken,
    handle: Option<thread::JoinHandle<()>>,
}

impl LineReader {
    /// Next event, waiting at most `timeout`.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<ReaderEvent, RecvTimeoutError> {
        match &self.events {
            Some(rx) => rx.recv_timeout(timeout),
            None => Err(RecvTimeoutError::Disconnected),
        }
    }

    /// Ask the reader to stop at its next loop iteration.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle
            .as_ref()
            .map(|handle| handle.is_finished())
            .unwrap_or(true)
    }

    /// Wait for the reader thread to exit.
    ///
    /// Drops the receiving end first so a reader blocked on a full channel
    /// unblocks. Returns once the thread has finished its current read.
    pub fn join(&mut self) {
        self.events = None;
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log_debug("line reader thread panicked");
            }
        }
    }
}

impl Drop for LineReader {
    fn drop(&mut self) {
        self.cancel();
        self.join();
    }
}

/// Start the background reader on `fd`, which it owns and closes on exit.
pub fn spawn_line_reader(
    fd: OwnedFd,
    cancel: CancelToken,
    capacity: usize,
) -> Result<LineReader> {
    let (tx, rx) = bounded(capacity.max(1));
    let thread_cancel = cancel.clone();
    let handle = thread::Builder::new()
        .name("ticketpipe-reader".to_string())
        .spawn(move || {
            run_line_reader(fd.as_raw_fd(), &thread_cancel, &tx);
            log_debug("line reader exiting");
            drop(fd);
        })
        .context("failed to spawn line reader thread")?;
    Ok(LineReader {
        events: Some(rx),
        cancel,
        handle: Some(handle),
    })
}

/// Read `fd` until EOF, an unrecoverable error or cancellation, emitting lines in order.
pub(super) fn run_line_reader(fd: RawFd, cancel: &CancelToken, tx: &Sender<ReaderEvent>) {
    let mut buffer = LineBuffer::new();
    while !cancel.is_cancelled() {
        let mut got_line = false;
        while !got_line {
            if cancel.is_cancelled() {
                return;
            }
            let spare = buffer.spare_mut();
            // SAFETY: spare is a valid, writable slice owned by buffer for the whole call.
            let n = unsafe { libc::read(fd, spare.as_mut_ptr() as *mut libc::c_void, spare.len()) };
            if n > 0 {
                got_line = buffer.commit(n as usize);
                continue;
            }
            if n == 0 {
                if !buffer.pending().is_empty() {
                    log_debug(&format!(
                        "server stdout closed with {} unterminated bytes; dropping them",
                        buffer.pending().len()
                    ));
                }
                let _ = tx.send(ReaderEvent::Closed);
                return;
            }
            let err = io::Error::last_os_error();
            if should_retry(&err) {
                if err.kind() == ErrorKind::WouldBlock {
                    thread::sleep(READ_RETRY_SLEEP);
                }
                continue;
            }
            log_debug(&format!("server stdout read error: {err}"));
            let _ = tx.send(ReaderEvent::Error(format!(
                "failed to read from server (errno {}): {err}",
                err.raw_os_error().unwrap_or(0)
            )));
            return;
        }

        let mut disconnected = false;
        buffer.drain_lines(|line| {
            if !disconnected && tx.send(ReaderEvent::Line(line)).is_err() {
                disconnected = true;
            }
        });
        if disconnected {
            return;
        }
    }
}

/// Result of one timeout-bounded write attempt.
#[derive(Debug)]
pub(super) enum WriteProgress {
    Complete,
    /// The timeout expired after `written` bytes went out.
    TimedOut { written: usize },
    Failed { written: usize, error: io::Error },
}

/// Write all of `data` to a non-blocking `fd`, sleeping in short steps while the pipe is full.
pub(super) fn write_with_timeout(fd: RawFd, data: &[u8], timeout: Duration) -> WriteProgress {
    let start = Instant::now();
    let mut written = 0;
    while written < data.len() {
        let chunk = &data[written..];
        let len = write_limit(chunk.len());
        // SAFETY: chunk points to len initialized bytes that outlive the call.
        let ret = unsafe { libc::write(fd, chunk.as_ptr() as *const libc::c_void, len) };
        if ret > 0 {
            written += ret as usize;
            continue;
        }
        if ret < 0 {
            let err = io::Error::last_os_error();
            if !should_retry(&err) {
                return WriteProgress::Failed {
                    written,
                    error: err,
                };
            }
        }
        let elapsed = start.elapsed();
        if elapsed >= timeout {
            return WriteProgress::TimedOut { written };
        }
        thread::sleep(WRITE_RETRY_SLEEP.min(timeout - elapsed));
    }
    WriteProgress::Complete
}
