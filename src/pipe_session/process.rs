//! Server child process supervision.
//!
//! Spawns the server with its stdin and stdout bound to two fresh pipes, owns
//! the process id and both parent-side descriptors, and guarantees the child
//! is gone once the supervisor is dropped.

use crate::log_debug;
use anyhow::{anyhow, Context, Result};
use std::ffi::{CString, OsStr};
use std::io;
use std::mem;
use std::os::fd::{FromRawFd, OwnedFd};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::RawFd;
use std::path::Path;
use std::ptr;
use std::thread;
use std::time::{Duration, Instant};

use super::cancel::CancelToken;
#[cfg(any(test, feature = "mutants"))]
use super::counters::record_force_kill;
use super::io::{spawn_line_reader, write_with_timeout, LineReader, WriteProgress};

/// Interval between liveness checks while waiting for a graceful exit.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Parent-side view of one live child.
#[derive(Debug)]
struct ChildHandle {
    pid: libc::pid_t,
    stdin_fd: RawFd,
    stdout_fd: RawFd,
}

/// Owns exactly one server child process and its two pipes.
///
/// The supervisor is move-only. [`ServerProcess::default`] is the empty
/// state, so `std::mem::take` hands the child to a new owner and leaves an
/// empty supervisor behind.
#[derive(Debug, Default)]
pub struct ServerProcess {
    child: Option<ChildHandle>,
    /// Remainder of a message whose write timed out part-way through.
    unsent: Vec<u8>,
}

impl ServerProcess {
    /// Spawn `executable` with its stdin/stdout wired to new pipes.
    pub fn spawn(executable: &Path) -> Result<Self> {
        let program = CString::new(executable.as_os_str().as_bytes()).with_context(|| {
            format!(
                "server path contains NUL byte: {}",
                executable.display()
            )
        })?;
        let envp = current_environment();

        let (to_child_read, to_child_write) =
            cloexec_pipe().context("failed to create pipe for the input of the server")?;
        let (from_child_read, from_child_write) = match cloexec_pipe() {
            Ok(fds) => fds,
            Err(err) => {
                // SAFETY: both descriptors were just created and are owned here.
                unsafe {
                    close_fd(to_child_read);
                    close_fd(to_child_write);
                }
                return Err(err).context("failed to create pipe for the output of the server");
            }
        };
        let all_fds = [to_child_read, to_child_write, from_child_read, from_child_write];

        // SAFETY: every descriptor passed to the file actions is open and owned here;
        // argv/envp are NUL-terminated arrays of valid C strings that outlive the call.
        let spawned = unsafe {
            spawn_with_pipes(
                &program,
                &envp,
                to_child_read,
                to_child_write,
                from_child_read,
                from_child_write,
            )
        };
        let pid = match spawned {
            Ok(pid) => pid,
            Err(err) => {
                for fd in all_fds {
                    // SAFETY: descriptors are still owned by this function on the failure path.
                    unsafe { close_fd(fd) };
                }
                return Err(err);
            }
        };

        // SAFETY: the child holds its own copies; the parent no longer needs these ends.
        unsafe {
            close_fd(to_child_read);
            close_fd(from_child_write);
        }

        let mut process = Self {
            child: Some(ChildHandle {
                pid,
                stdin_fd: to_child_write,
                stdout_fd: from_child_read,
            }),
            unsent: Vec::new(),
        };
        // SAFETY: stdin_fd is the parent's open write end.
        if let Err(err) = unsafe { set_nonblocking(to_child_write) } {
            process.terminate_now();
            return Err(err);
        }
        log_debug(&format!(
            "spawned server {} with pid {pid}",
            executable.display()
        ));
        Ok(process)
    }

    /// Whether a child is currently owned.
    pub fn is_running(&self) -> bool {
        self.child.is_some()
    }

    pub fn pid(&self) -> Option<i32> {
        self.child.as_ref().map(|child| child.pid)
    }

    /// Bytes left over from a write that timed out part-way through.
    pub fn unsent_len(&self) -> usize {
        self.unsent.len()
    }

    /// Write the whole message to the child's stdin within `timeout`.
    ///
    /// Returns false on timeout, on a closed pipe, or when no child is owned.
    /// When a timeout strikes after part of a message went out, the remainder
    /// is finished by the next call before its own message starts, so the
    /// stream stays line-aligned. A message that could not be started at all
    /// is dropped.
    pub fn write(&mut self, message: &str, timeout: Duration) -> bool {
        let start = Instant::now();
        if !self.flush_unsent(timeout) {
            return false;
        }
        let Some(fd) = self.child.as_ref().map(|child| child.stdin_fd) else {
            return false;
        };
        let remaining = timeout.saturating_sub(start.elapsed());
        let bytes = message.as_bytes();
        match write_with_timeout(fd, bytes, remaining) {
            WriteProgress::Complete => true,
            WriteProgress::TimedOut { written } => {
                if written > 0 {
                    self.unsent = bytes[written..].to_vec();
                }
                log_debug(&format!(
                    "write to server timed out after {written}/{} bytes",
                    bytes.len()
                ));
                false
            }
            WriteProgress::Failed { written, error } => {
                log_debug(&format!(
                    "write to server failed after {written}/{} bytes: {error}",
                    bytes.len()
                ));
                false
            }
        }
    }

    /// Finish the remainder of a previously timed-out write.
    ///
    /// Returns true when nothing is left over afterwards.
    pub fn flush_unsent(&mut self, timeout: Duration) -> bool {
        let Some(fd) = self.child.as_ref().map(|child| child.stdin_fd) else {
            return false;
        };
        if self.unsent.is_empty() {
            return true;
        }
        match write_with_timeout(fd, &self.unsent, timeout) {
            WriteProgress::Complete => {
                self.unsent.clear();
                true
            }
            WriteProgress::TimedOut { written } => {
                self.unsent.drain(..written);
                false
            }
            WriteProgress::Failed { error, .. } => {
                log_debug(&format!("flushing unsent bytes failed: {error}"));
                self.unsent.clear();
                false
            }
        }
    }

    /// Start the background line reader on a private duplicate of the child's stdout.
    ///
    /// The duplicate belongs to the reader thread, so closing the supervisor's
    /// descriptors never pulls the descriptor out from under a pending read.
    pub fn start_line_reader(&self, cancel: CancelToken, capacity: usize) -> Result<LineReader> {
        let child = self
            .child
            .as_ref()
            .ok_or_else(|| anyhow!("no server process is running"))?;
        // SAFETY: stdout_fd is open while the child is owned.
        let dup = unsafe { libc::fcntl(child.stdout_fd, libc::F_DUPFD_CLOEXEC, 0) };
        if dup < 0 {
            return Err(errno_error("fcntl(F_DUPFD_CLOEXEC) failed"));
        }
        // SAFETY: dup is a fresh descriptor nobody else owns.
        let fd = unsafe { OwnedFd::from_raw_fd(dup) };
        spawn_line_reader(fd, cancel, capacity)
    }

    /// Kill the child with SIGKILL, reap it and close both pipes. No-op when empty.
    pub fn terminate_now(&mut self) {
        let Some(child) = self.child.take() else {
            return;
        };
        if child.pid > 0 {
            #[cfg(any(test, feature = "mutants"))]
            record_force_kill();
            // SAFETY: pid belongs to a child this supervisor spawned and has not reaped.
            if unsafe { libc::kill(child.pid, libc::SIGKILL) } != 0 {
                log_debug(&format!(
                    "failed to kill server with pid {}: {}",
                    child.pid,
                    io::Error::last_os_error()
                ));
            } else {
                let mut status = 0;
                // SAFETY: blocking waitpid on our own child after SIGKILL.
                let ret = unsafe { libc::waitpid(child.pid, &mut status, 0) };
                if ret < 0 {
                    log_debug(&format!(
                        "waitpid after SIGKILL failed: {}",
                        io::Error::last_os_error()
                    ));
                }
            }
        }
        self.release(child);
    }

    /// Give the child up to `timeout` to exit on its own, then kill it.
    pub fn terminate_within(&mut self, timeout: Duration) {
        let Some(pid) = self.child.as_ref().map(|child| child.pid) else {
            return;
        };
        if pid > 0 && !wait_for_exit(pid, timeout) {
            log_debug(&format!(
                "server pid {pid} still alive after {}ms; killing",
                timeout.as_millis()
            ));
            self.terminate_now();
            return;
        }
        if let Some(child) = self.child.take() {
            self.release(child);
        }
    }

    fn release(&mut self, child: ChildHandle) {
        // SAFETY: both descriptors were owned by the handle being consumed.
        unsafe {
            close_fd(child.stdin_fd);
            close_fd(child.stdout_fd);
        }
        self.unsent.clear();
    }
}

#[cfg(any(test, feature = "mutants"))]
impl ServerProcess {
    /// Wrap existing descriptors without a child; termination only closes them.
    pub(crate) fn from_fds(stdin_fd: RawFd, stdout_fd: RawFd) -> Self {
        Self {
            child: Some(ChildHandle {
                pid: -1,
                stdin_fd,
                stdout_fd,
            }),
            unsent: Vec::new(),
        }
    }

    /// Parent-side `(stdin, stdout)` descriptors while a child is owned.
    pub(crate) fn raw_fds(&self) -> Option<(RawFd, RawFd)> {
        self.child
            .as_ref()
            .map(|child| (child.stdin_fd, child.stdout_fd))
    }
}

impl Drop for ServerProcess {
    fn drop(&mut self) {
        self.terminate_now();
    }
}

#[derive(Clone, Copy)]
enum FileAction {
    Close(RawFd),
    Dup2(RawFd, RawFd),
}

/// Spawn the program with stdin/stdout redirected through `posix_spawn` file actions.
///
/// # Safety
///
/// All four descriptors must be open; `program` and `envp` must stay alive for the call.
unsafe fn spawn_with_pipes(
    program: &CString,
    envp: &[CString],
    to_child_read: RawFd,
    to_child_write: RawFd,
    from_child_read: RawFd,
    from_child_write: RawFd,
) -> Result<libc::pid_t> {
    // SAFETY: posix_spawn_file_actions_t is initialised by posix_spawn_file_actions_init below.
    let mut actions: libc::posix_spawn_file_actions_t = mem::zeroed();
    let ret = libc::posix_spawn_file_actions_init(&mut actions);
    if ret != 0 {
        return Err(spawn_error("posix_spawn_file_actions_init", ret));
    }

    let plan = [
        FileAction::Close(to_child_write),
        FileAction::Dup2(to_child_read, libc::STDIN_FILENO),
        FileAction::Close(to_child_read),
        FileAction::Close(from_child_read),
        FileAction::Dup2(from_child_write, libc::STDOUT_FILENO),
        FileAction::Close(from_child_write),
    ];
    for action in plan {
        let (name, ret) = match action {
            // Never queue a close for a descriptor that is itself a std stream slot.
            FileAction::Close(fd) if fd <= libc::STDERR_FILENO => continue,
            FileAction::Close(fd) => (
                "posix_spawn_file_actions_addclose",
                libc::posix_spawn_file_actions_addclose(&mut actions, fd),
            ),
            FileAction::Dup2(fd, target) => (
                "posix_spawn_file_actions_adddup2",
                libc::posix_spawn_file_actions_adddup2(&mut actions, fd, target),
            ),
        };
        if ret != 0 {
            libc::posix_spawn_file_actions_destroy(&mut actions);
            return Err(spawn_error(name, ret));
        }
    }

    let mut argv: Vec<*mut libc::c_char> = vec![program.as_ptr() as *mut libc::c_char];
    argv.push(ptr::null_mut());
    let mut env_ptrs: Vec<*mut libc::c_char> = envp
        .iter()
        .map(|entry| entry.as_ptr() as *mut libc::c_char)
        .collect();
    env_ptrs.push(ptr::null_mut());

    let mut pid: libc::pid_t = -1;
    let ret = libc::posix_spawn(
        &mut pid,
        program.as_ptr(),
        &actions,
        ptr::null(),
        argv.as_ptr(),
        env_ptrs.as_ptr(),
    );
    libc::posix_spawn_file_actions_destroy(&mut actions);
    if ret != 0 {
        return Err(spawn_error("posix_spawn", ret));
    }
    Ok(pid)
}

/// `KEY=VALUE` entries of the current environment, skipping any with interior NULs.
fn current_environment() -> Vec<CString> {
    std::env::vars_os()
        .filter_map(|(key, value)| {
            let mut entry = key.as_bytes().to_vec();
            entry.push(b'=');
            entry.extend_from_slice(OsStr::as_bytes(&value));
            CString::new(entry).ok()
        })
        .collect()
}

/// Create a pipe whose two ends are close-on-exec. Returns `(read, write)`.
pub(super) fn cloexec_pipe() -> Result<(RawFd, RawFd)> {
    let mut fds: [RawFd; 2] = [-1; 2];
    // Both ends carry O_CLOEXEC from creation, so a concurrent spawn never inherits them.
    // SAFETY: fds has room for the two descriptors pipe2() writes.
    if unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) } != 0 {
        return Err(errno_error("pipe2 failed"));
    }
    Ok((fds[0], fds[1]))
}

/// Switch a descriptor to non-blocking mode.
///
/// # Safety
///
/// `fd` must be a valid, open file descriptor.
pub(super) unsafe fn set_nonblocking(fd: RawFd) -> Result<()> {
    let flags = libc::fcntl(fd, libc::F_GETFL, 0);
    if flags < 0 {
        return Err(errno_error("fcntl(F_GETFL) failed"));
    }
    if libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
        return Err(errno_error("fcntl(F_SETFL) failed"));
    }
    Ok(())
}

fn spawn_error(function: &str, code: i32) -> anyhow::Error {
    anyhow!(
        "{function} failed with code {code}: {}",
        io::Error::from_raw_os_error(code)
    )
}

/// Helper that formats OS errors with additional context.
pub(super) fn errno_error(context: &str) -> anyhow::Error {
    anyhow!("{context}: {}", io::Error::last_os_error())
}

/// Close a file descriptor while ignoring errors.
///
/// # Safety
///
/// `fd` must be a valid, open file descriptor (or negative to ignore).
pub(super) unsafe fn close_fd(fd: RawFd) {
    if fd >= 0 {
        let _ = libc::close(fd);
    }
}

/// Poll until the child exits or `timeout` passes. True when the child is gone.
///
/// A positive `waitpid` result reaps the child; an error (typically `ECHILD`)
/// also means there is nothing left to wait for.
pub(super) fn wait_for_exit(child_pid: libc::pid_t, timeout: Duration) -> bool {
    let start = Instant::now();
    let mut status = 0;
    loop {
        // SAFETY: child_pid is owned by this supervisor; WNOHANG only inspects state.
        let result = unsafe { libc::waitpid(child_pid, &mut status, libc::WNOHANG) };
        if result > 0 {
            return true;
        }
        if result < 0 {
            log_debug(&format!(
                "waitpid({child_pid}) failed: {}",
                io::Error::last_os_error()
            ));
            return true;
        }
        let elapsed = start.elapsed();
        if elapsed >= timeout {
            return false;
        }
        thread::sleep(EXIT_POLL_INTERVAL.min(timeout - elapsed));
    }
}
