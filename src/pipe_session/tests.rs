use super::counters::*;
use super::framing::*;
use super::io::*;
use super::process::*;
use super::CancelToken;
use crate::test_support::*;
use crossbeam_channel::unbounded;
use std::ffi::CString;
use std::os::fd::{FromRawFd, OwnedFd};
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

fn collect_lines(chunks: &[&[u8]]) -> Vec<String> {
    let mut buffer = LineBuffer::new();
    let mut lines = Vec::new();
    for chunk in chunks {
        buffer.extend_from_slice(chunk);
        buffer.drain_lines(|line| lines.push(line));
    }
    lines
}

fn drain_events(rx: &crossbeam_channel::Receiver<ReaderEvent>) -> Vec<ReaderEvent> {
    rx.try_iter().collect()
}

#[test]
fn line_buffer_keeps_delimiter_and_trailing_fragment() {
    let mut buffer = LineBuffer::new();
    assert!(buffer.extend_from_slice(b"t1 ACK\nt1 RESULT A,B\nt1 FIN"));
    let mut lines = Vec::new();
    let emitted = buffer.drain_lines(|line| lines.push(line));
    assert_eq!(emitted, 2);
    assert_eq!(lines, vec!["t1 ACK\n", "t1 RESULT A,B\n"]);
    assert_eq!(buffer.pending(), b"t1 FIN");

    assert!(buffer.extend_from_slice(b"ISHED\n"));
    lines.clear();
    buffer.drain_lines(|line| lines.push(line));
    assert_eq!(lines, vec!["t1 FINISHED\n"]);
    assert!(buffer.pending().is_empty());
}

#[test]
fn line_buffer_output_does_not_depend_on_split_point() {
    let stream: &[u8] = b"a1 ACK\na1 RESULT QUJD\n\na1 FINISHED\nb2 RESULT x,y\ntrailing";
    let whole = collect_lines(&[stream]);
    assert_eq!(whole.len(), 5);
    for split in 0..=stream.len() {
        let (head, tail) = stream.split_at(split);
        assert_eq!(collect_lines(&[head, tail]), whole, "split at {split}");
    }
}

#[test]
fn line_buffer_commit_reports_newline_only_in_fresh_bytes() {
    let mut buffer = LineBuffer::new();
    assert!(buffer.extend_from_slice(b"one\ntw"));
    assert!(!buffer.extend_from_slice(b"o"));
    let spare = buffer.spare_mut();
    spare[..2].copy_from_slice(b"\nx");
    assert!(buffer.commit(2));
}

#[test]
fn line_buffer_grows_when_headroom_runs_low() {
    let mut buffer = LineBuffer::new();
    assert_eq!(buffer.capacity(), 0);
    let first = buffer.spare_mut().len();
    assert_eq!(first, MIN_HEADROOM);

    let fill = vec![b'x'; MIN_HEADROOM - 10];
    buffer.extend_from_slice(&fill);
    assert_eq!(buffer.capacity(), MIN_HEADROOM);
    let spare = buffer.spare_mut().len();
    assert_eq!(buffer.capacity(), 2 * MIN_HEADROOM);
    assert_eq!(spare, MIN_HEADROOM + 10);

    // A line longer than one increment still arrives whole.
    let mut long = vec![b'y'; 3 * MIN_HEADROOM];
    long.push(b'\n');
    buffer.extend_from_slice(&long);
    let mut lines = Vec::new();
    buffer.drain_lines(|line| lines.push(line));
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].len(), fill.len() + long.len());
}

#[test]
fn reader_delivers_complete_lines_then_closed_and_drops_fragment() {
    let (read_fd, write_fd) = pipe_pair();
    write_bytes(write_fd, b"l1\nl2\nl3\nfragment");
    close_raw(write_fd);

    let (tx, rx) = unbounded();
    run_line_reader(read_fd, &CancelToken::new(), &tx);
    close_raw(read_fd);

    assert_eq!(
        drain_events(&rx),
        vec![
            ReaderEvent::Line("l1\n".to_string()),
            ReaderEvent::Line("l2\n".to_string()),
            ReaderEvent::Line("l3\n".to_string()),
            ReaderEvent::Closed,
        ]
    );
}

#[test]
fn reader_reassembles_lines_split_across_writes() {
    let (read_fd, write_fd) = pipe_pair();
    let fd = unsafe { OwnedFd::from_raw_fd(read_fd) };
    let reader = spawn_line_reader(fd, CancelToken::new(), 16).unwrap();

    write_bytes(write_fd, b"tok RES");
    thread::sleep(Duration::from_millis(20));
    write_bytes(write_fd, b"ULT abc\ntok FIN");
    thread::sleep(Duration::from_millis(20));
    write_bytes(write_fd, b"ISHED\n");

    let timeout = Duration::from_secs(2);
    assert_eq!(
        reader.recv_timeout(timeout).unwrap(),
        ReaderEvent::Line("tok RESULT abc\n".to_string())
    );
    assert_eq!(
        reader.recv_timeout(timeout).unwrap(),
        ReaderEvent::Line("tok FINISHED\n".to_string())
    );

    close_raw(write_fd);
    assert_eq!(reader.recv_timeout(timeout).unwrap(), ReaderEvent::Closed);
}

#[test]
fn reader_reports_unrecoverable_error_exactly_once() {
    let root = CString::new("/").unwrap();
    let dir_fd = unsafe { libc::open(root.as_ptr(), libc::O_RDONLY | libc::O_DIRECTORY) };
    assert!(dir_fd >= 0);

    let (tx, rx) = unbounded();
    run_line_reader(dir_fd, &CancelToken::new(), &tx);
    close_raw(dir_fd);

    let events = drain_events(&rx);
    assert_eq!(events.len(), 1);
    match &events[0] {
        ReaderEvent::Error(message) => assert!(message.contains("failed to read from server")),
        other => panic!("expected error, got {other:?}"),
    }
}

#[test]
fn reader_checks_cancellation_before_blocking() {
    let (read_fd, write_fd) = pipe_pair();
    let cancel = CancelToken::new();
    cancel.cancel();

    let (tx, rx) = unbounded();
    // The write end stays open, so a read here would block forever.
    run_line_reader(read_fd, &cancel, &tx);
    assert!(drain_events(&rx).is_empty());

    close_raw(read_fd);
    close_raw(write_fd);
}

#[test]
fn reader_join_returns_after_cancel_and_eof() {
    let (read_fd, write_fd) = pipe_pair();
    let fd = unsafe { OwnedFd::from_raw_fd(read_fd) };
    let mut reader = spawn_line_reader(fd, CancelToken::new(), 1).unwrap();
    reader.cancel();
    // The pending read only returns once the writer goes away.
    close_raw(write_fd);
    reader.join();
    assert!(reader.is_finished());
}

#[test]
fn write_splits_into_limited_chunks() {
    let (read_fd, write_fd) = pipe_pair();
    set_nonblocking_fd(read_fd);
    unsafe { set_nonblocking(write_fd).unwrap() };
    let mut process = ServerProcess::from_fds(write_fd, -1);

    set_write_limit(Some(3));
    assert!(process.write("t7 FETCH_TICKET_LIST\n", Duration::from_millis(100)));
    set_write_limit(None);

    assert_eq!(read_available(read_fd), b"t7 FETCH_TICKET_LIST\n");
    drop(process);
    close_raw(read_fd);
}

#[test]
fn timed_out_write_resumes_where_it_stopped() {
    let (read_fd, write_fd) = pipe_pair();
    set_nonblocking_fd(read_fd);
    unsafe { set_nonblocking(write_fd).unwrap() };
    let mut process = ServerProcess::from_fds(write_fd, -1);

    let mut big = "x".repeat(256 * 1024);
    big.push('\n');
    assert!(!process.write(&big, Duration::from_millis(20)));
    let left = process.unsent_len();
    assert!(left > 0 && left < big.len());

    // Nothing new starts while the previous message is unfinished.
    assert!(!process.write("dropped\n", Duration::from_millis(5)));

    let mut received = Vec::new();
    let mut rounds = 0;
    loop {
        received.extend(read_available(read_fd));
        if process.flush_unsent(Duration::from_millis(20)) {
            break;
        }
        rounds += 1;
        assert!(rounds < 1000, "unsent bytes never drained");
    }
    assert!(process.write("next\n", Duration::from_millis(100)));
    received.extend(read_available(read_fd));

    let mut expected = big.into_bytes();
    expected.extend_from_slice(b"next\n");
    assert_eq!(received.len(), expected.len());
    assert!(received == expected);

    drop(process);
    close_raw(read_fd);
}

#[test]
fn write_without_child_returns_false_immediately() {
    let mut process = ServerProcess::default();
    let start = Instant::now();
    assert!(!process.write("t1 FETCH_TICKET_LIST\n", Duration::from_secs(5)));
    assert!(start.elapsed() < Duration::from_secs(1));
    assert!(!process.flush_unsent(Duration::from_secs(5)));
}

#[test]
fn spawn_reports_missing_executable() {
    let err = ServerProcess::spawn(Path::new("/nonexistent/ticketpipe-server")).unwrap_err();
    let message = format!("{err:#}");
    assert!(message.contains("posix_spawn"), "{message}");
}

#[test]
fn spawned_child_echoes_through_both_pipes() {
    let mut process = spawn_stub("#!/bin/sh\nexec cat\n");
    let reader = process
        .start_line_reader(CancelToken::new(), 8)
        .unwrap();
    assert!(process.write("ping 1\n", Duration::from_millis(200)));
    assert_eq!(
        reader.recv_timeout(Duration::from_secs(2)).unwrap(),
        ReaderEvent::Line("ping 1\n".to_string())
    );
    process.terminate_now();
    assert!(!process.is_running());
    assert_eq!(
        reader.recv_timeout(Duration::from_secs(2)).unwrap(),
        ReaderEvent::Closed
    );
}

#[test]
fn taking_a_supervisor_leaves_the_source_empty() {
    let mut source = spawn_stub("#!/bin/sh\nexec cat\n");
    let mut owner = std::mem::take(&mut source);
    assert!(!source.is_running());
    assert!(!source.write("t1 ACK\n", Duration::from_millis(10)));
    assert!(owner.is_running());
    assert!(owner.write("t1 ACK\n", Duration::from_millis(100)));
    owner.terminate_now();
}

#[test]
fn terminate_within_skips_kill_for_exited_child() {
    reset_force_kill_count();
    let mut process = spawn_stub("#!/bin/sh\nexit 0\n");
    let (stdin_fd, stdout_fd) = process.raw_fds().expect("child owned");
    let stdin_pipe = fd_identity(stdin_fd).expect("stdin pipe open");
    let stdout_pipe = fd_identity(stdout_fd).expect("stdout pipe open");

    process.terminate_within(Duration::from_secs(5));
    assert!(!process.is_running());
    assert_eq!(process.raw_fds(), None);
    assert_eq!(force_kill_count(), 0);
    assert_ne!(fd_identity(stdin_fd), Some(stdin_pipe), "stdin pipe left open");
    assert_ne!(fd_identity(stdout_fd), Some(stdout_pipe), "stdout pipe left open");
    // Already released; the drop below is a no-op.
    process.terminate_now();
    assert_eq!(force_kill_count(), 0);
}

#[test]
fn terminate_within_kills_child_that_outlives_grace() {
    reset_force_kill_count();
    let mut process = spawn_stub("#!/bin/sh\nexec sleep 30\n");
    let start = Instant::now();
    process.terminate_within(Duration::from_millis(50));
    assert!(!process.is_running());
    assert_eq!(force_kill_count(), 1);
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[test]
fn terminate_now_is_idempotent() {
    reset_force_kill_count();
    let mut process = spawn_stub("#!/bin/sh\nexec sleep 30\n");
    process.terminate_now();
    process.terminate_now();
    assert_eq!(force_kill_count(), 1);
    assert_eq!(process.pid(), None);
}

#[test]
fn dropping_supervisor_reaps_child() {
    let process = spawn_stub("#!/bin/sh\nexec sleep 30\n");
    let pid = process.pid().unwrap();
    drop(process);
    let mut status = 0;
    let ret = unsafe { libc::waitpid(pid, &mut status, libc::WNOHANG) };
    assert_eq!(ret, -1, "child should already be reaped");
}

#[test]
fn write_fails_once_child_has_exited() {
    let mut process = spawn_stub("#!/bin/sh\nexit 0\n");
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut failed = false;
    while Instant::now() < deadline {
        if !process.write("t1 FETCH_TICKET_LIST\n", Duration::from_millis(10)) {
            failed = true;
            break;
        }
        thread::sleep(Duration::from_millis(20));
    }
    assert!(failed);
}

#[test]
fn pipes_are_close_on_exec_from_creation() {
    let (read_fd, write_fd) = cloexec_pipe().unwrap();
    for fd in [read_fd, write_fd] {
        let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
        assert!(flags >= 0);
        assert_ne!(flags & libc::FD_CLOEXEC, 0, "fd {fd} lacks FD_CLOEXEC");
    }
    close_raw(read_fd);
    close_raw(write_fd);
}

#[test]
fn spawned_server_pipes_stay_close_on_exec() {
    let process = spawn_stub("#!/bin/sh\nexec sleep 30\n");
    let (stdin_fd, stdout_fd) = process.raw_fds().expect("child owned");
    for fd in [stdin_fd, stdout_fd] {
        let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
        assert_ne!(flags & libc::FD_CLOEXEC, 0, "fd {fd} lacks FD_CLOEXEC");
    }
}
