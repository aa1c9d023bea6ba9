use crate::pipe_session::{CancelToken, LineReader, ReaderEvent, ServerProcess};
use crate::protocol::{Reply, RequestKind, RequestTracker, ServerCommand};
use crate::signals::take_sigpipe;
use crate::{log_debug, log_wire, WireDirection};
use anyhow::{bail, Result};
use crossbeam_channel::RecvTimeoutError;
use std::time::{Duration, Instant};

/// Default bound for a single request write.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_millis(50);
/// Default time the server gets to exit on its own during shutdown.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_millis(500);
/// Max reader events buffered before the reader waits for the consumer.
pub const DEFAULT_READER_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy)]
pub struct ClientOptions {
    pub write_timeout: Duration,
    pub shutdown_grace: Duration,
    pub reader_capacity: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            reader_capacity: DEFAULT_READER_CAPACITY,
        }
    }
}

/// Something the server said about a current request, or about itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Ack {
        kind: RequestKind,
        token: String,
    },
    Result {
        kind: RequestKind,
        token: String,
        payload: String,
    },
    Finished {
        kind: RequestKind,
        token: String,
    },
    /// The server closed its stdout. No further replies will arrive.
    ServerClosed,
    /// Reading the server's stdout failed; the reader has stopped.
    ReaderFailed(String),
}

/// Client side of the ticket server protocol.
///
/// Requests and replies are handled on the thread that owns the client;
/// only the blocking reads happen on the background reader thread.
pub struct ServerClient {
    process: ServerProcess,
    reader: Option<LineReader>,
    tracker: RequestTracker,
    options: ClientOptions,
    closed: bool,
    shut_down: bool,
}

impl ServerClient {
    /// Take ownership of a spawned server and start reading its replies.
    pub fn new(process: ServerProcess, options: ClientOptions) -> Result<Self> {
        let reader = process.start_line_reader(CancelToken::new(), options.reader_capacity)?;
        Ok(Self {
            process,
            reader: Some(reader),
            tracker: RequestTracker::new(),
            options,
            closed: false,
            shut_down: false,
        })
    }

    /// Send `command` and make it the current request of its kind. Returns its token.
    pub fn request(&mut self, command: ServerCommand) -> Result<String> {
        if self.shut_down {
            bail!("client is shut down");
        }
        let issued = self.tracker.issue(&command)?;
        if let Some(previous) = &issued.superseded {
            tracing::debug!(token = %issued.token, superseded = %previous, "request superseded");
        }
        if !self.process.write(&issued.line, self.options.write_timeout) {
            if let Some(kind) = issued.kind {
                self.tracker.abandon(kind, &issued.token);
            }
            if take_sigpipe() {
                log_debug("server stdin closed (SIGPIPE)");
            }
            bail!(
                "failed to send {} to server within {}ms",
                command.verb(),
                self.options.write_timeout.as_millis()
            );
        }
        tracing::debug!(token = %issued.token, verb = command.verb(), "request issued");
        log_debug(&format!("sent {} as {}", command.verb(), issued.token));
        log_wire(WireDirection::ToServer, &issued.line);
        Ok(issued.token)
    }

    /// Wait up to `timeout` for the next reply that belongs to a current request.
    ///
    /// Lines for superseded or unknown tokens are skipped. Returns `None` on
    /// timeout, and after the server-closed event has been reported once.
    pub fn next_event(&mut self, timeout: Duration) -> Option<ClientEvent> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let received = self.reader.as_ref()?.recv_timeout(remaining);
            match received {
                Ok(ReaderEvent::Line(line)) => {
                    if let Some(event) = self.route_line(&line) {
                        return Some(event);
                    }
                }
                Ok(ReaderEvent::Error(message)) => {
                    self.closed = true;
                    log_debug(&format!("server reader failed: {message}"));
                    return Some(ClientEvent::ReaderFailed(message));
                }
                Ok(ReaderEvent::Closed) | Err(RecvTimeoutError::Disconnected) => {
                    if self.closed {
                        return None;
                    }
                    self.closed = true;
                    log_debug("server closed its output");
                    return Some(ClientEvent::ServerClosed);
                }
                Err(RecvTimeoutError::Timeout) => return None,
            }
        }
    }

    fn route_line(&mut self, line: &str) -> Option<ClientEvent> {
        let Some(routed) = self.tracker.route(line) else {
            tracing::trace!(line = line.trim_end(), "reply dropped");
            log_debug("dropping line for no current request");
            log_wire(WireDirection::FromServer, line);
            return None;
        };
        log_wire(WireDirection::FromServer, line);
        tracing::debug!(token = %routed.token, kind = %routed.kind, state = ?routed.state, "reply routed");
        let kind = routed.kind;
        let token = routed.token;
        Some(match routed.reply {
            Reply::Ack => ClientEvent::Ack { kind, token },
            Reply::Result(payload) => ClientEvent::Result {
                kind,
                token,
                payload: payload.to_string(),
            },
            Reply::Finished => ClientEvent::Finished { kind, token },
        })
    }

    pub fn tracker(&self) -> &RequestTracker {
        &self.tracker
    }

    /// True once the server's output has ended or failed.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn server_pid(&self) -> Option<i32> {
        self.process.pid()
    }

    /// Stop the reader, ask the server to exit, reap it and join the reader.
    ///
    /// Runs once; later calls and the drop that follows are no-ops.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        tracing::debug!("shutdown started");

        if let Some(reader) = &self.reader {
            reader.cancel();
        }

        if self.process.is_running() && !self.closed {
            match self.tracker.issue(&ServerCommand::ExitServerNow) {
                Ok(exit) => {
                    if !self.process.write(&exit.line, self.options.write_timeout) {
                        log_debug("could not send exit command; server will be killed");
                    }
                }
                Err(err) => log_debug(&format!("could not build exit command: {err:#}")),
            }
        }

        self.process.terminate_within(self.options.shutdown_grace);

        if let Some(mut reader) = self.reader.take() {
            reader.join();
        }
        tracing::debug!("shutdown finished");
        log_debug("server session shut down");
    }
}

impl Drop for ServerClient {
    fn drop(&mut self) {
        self.shutdown();
    }
}
