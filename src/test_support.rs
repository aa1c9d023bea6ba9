use crate::pipe_session::ServerProcess;
use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::io::RawFd;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Shell server that answers every command of the protocol with canned replies.
pub(crate) const STUB_SERVER: &str = r#"#!/bin/sh
while IFS= read -r line; do
  token=${line%% *}
  rest=${line#* }
  verb=${rest%% *}
  case "$verb" in
    FETCH_TICKET_LIST)
      printf '%s ACK\n%s RESULT PRJ-10,PRJ-2\n%s RESULT OPS-1\n%s FINISHED\n' "$token" "$token" "$token" "$token" ;;
    FETCH_TICKET_KEY_VALUE_FIELDS)
      printf '%s ACK\n%s RESULT a2V5:dmFsdWU=,c3RhdHVz:b3Blbg==\n%s FINISHED\n' "$token" "$token" "$token" ;;
    FETCH_TICKET_HTML)
      printf '%s ACK\n%s RESULT PGgxPlBSSi0yPC9oMT4=\n%s FINISHED\n' "$token" "$token" "$token" ;;
    FETCH_ATTACHMENT_LIST)
      printf '%s ACK\n%s RESULT YXR0LTE=:YnVpbGQubG9n\n%s FINISHED\n' "$token" "$token" "$token" ;;
    FETCH_ATTACHMENT_CONTENT)
      printf '%s ACK\n%s RESULT aGVsbG8g\n%s RESULT d29ybGQ=\n%s FINISHED\n' "$token" "$token" "$token" "$token" ;;
    EXIT_SERVER_NOW)
      exit 0 ;;
    *)
      printf '%s FINISHED\n' "$token" ;;
  esac
done
"#;

static SCRIPT_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Write an executable script to the temp dir and return its path.
pub(crate) fn write_stub_script(contents: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let seq = SCRIPT_COUNTER.fetch_add(1, Ordering::SeqCst);
    let path = std::env::temp_dir().join(format!(
        "ticketpipe_stub_{}_{nanos}_{seq}.sh",
        std::process::id()
    ));
    fs::write(&path, contents).expect("write stub");
    let mut perms = fs::metadata(&path).expect("stat stub").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).expect("chmod stub");
    path
}

/// Spawn a stub script, retrying while another test's fork still holds it open for writing.
pub(crate) fn spawn_stub(contents: &str) -> ServerProcess {
    let path = write_stub_script(contents);
    let mut attempts = 0;
    loop {
        match ServerProcess::spawn(&path) {
            Ok(process) => return process,
            Err(err) if attempts < 20 && format!("{err:#}").contains("busy") => {
                attempts += 1;
                thread::sleep(Duration::from_millis(10));
            }
            Err(err) => panic!("spawn stub failed: {err:#}"),
        }
    }
}

pub(crate) fn pipe_pair() -> (RawFd, RawFd) {
    let mut fds = [0; 2];
    let result = unsafe { libc::pipe(fds.as_mut_ptr()) };
    assert_eq!(
        result,
        0,
        "pipe() failed with errno {}",
        io::Error::last_os_error()
    );
    (fds[0], fds[1])
}

/// Read whatever is currently available from a non-blocking descriptor.
pub(crate) fn read_available(fd: RawFd) -> Vec<u8> {
    let mut out = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut _, buf.len()) };
        if n <= 0 {
            break;
        }
        out.extend_from_slice(&buf[..n as usize]);
    }
    out
}

pub(crate) fn set_nonblocking_fd(fd: RawFd) {
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL, 0);
        assert!(flags >= 0);
        assert_eq!(libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK), 0);
    }
}

pub(crate) fn write_bytes(fd: RawFd, bytes: &[u8]) {
    let n = unsafe { libc::write(fd, bytes.as_ptr() as *const _, bytes.len()) };
    assert_eq!(n, bytes.len() as isize);
}

/// `(st_dev, st_ino)` of an open descriptor, or `None` once it is closed.
///
/// Comparing identities instead of fd numbers stays correct when a parallel
/// test reuses a freed descriptor number.
pub(crate) fn fd_identity(fd: RawFd) -> Option<(u64, u64)> {
    let mut stat: libc::stat = unsafe { std::mem::zeroed() };
    if unsafe { libc::fstat(fd, &mut stat) } != 0 {
        return None;
    }
    Some((stat.st_dev as u64, stat.st_ino as u64))
}

pub(crate) fn close_raw(fd: RawFd) {
    unsafe {
        libc::close(fd);
    }
}
