use anyhow::Result;

use super::command::{RequestKind, ServerCommand};
use super::reply::{classify_reply, Reply};
use super::token::TokenGenerator;

/// Progress of one request. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RequestState {
    Sent,
    Acknowledged,
    ResultReceived,
    Finished,
}

/// The current request of one kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    pub token: String,
    pub command: String,
    pub state: RequestState,
    pub results: usize,
}

impl PendingRequest {
    fn advance(&mut self, reply: &Reply<'_>) {
        let next = match reply {
            Reply::Ack => RequestState::Acknowledged,
            Reply::Result(_) => {
                self.results += 1;
                RequestState::ResultReceived
            }
            Reply::Finished => RequestState::Finished,
        };
        if next > self.state {
            self.state = next;
        }
    }
}

/// Output of [`RequestTracker::issue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedRequest {
    pub token: String,
    /// Wire line to send, newline included.
    pub line: String,
    pub kind: Option<RequestKind>,
    /// Token of the request this one replaced, if any was still current.
    pub superseded: Option<String>,
}

/// A reply line matched to the current request of its kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutedReply<'a> {
    pub kind: RequestKind,
    pub token: String,
    pub reply: Reply<'a>,
    /// State of the request after applying this reply.
    pub state: RequestState,
}

/// Keeps the current token per request kind and routes reply lines back to it.
///
/// Must be driven from a single thread: whoever issues requests also routes
/// the replies.
#[derive(Debug, Default)]
pub struct RequestTracker {
    tokens: TokenGenerator,
    current: [Option<PendingRequest>; RequestKind::ALL.len()],
}

impl RequestTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a token for `command` and make it the current request of its kind.
    pub fn issue(&mut self, command: &ServerCommand) -> Result<IssuedRequest> {
        command.validate()?;
        let kind = command.kind();
        let token = self.tokens.next(kind, command.subject());
        let line = command.to_line(&token);
        let superseded = kind.and_then(|kind| {
            self.current[kind.index()]
                .replace(PendingRequest {
                    token: token.clone(),
                    command: command.text(),
                    state: RequestState::Sent,
                    results: 0,
                })
                .map(|previous| previous.token)
        });
        Ok(IssuedRequest {
            token,
            line,
            kind,
            superseded,
        })
    }

    /// Match `line` against every current token and apply it.
    ///
    /// `FINISHED` clears the slot. Lines for unknown or superseded tokens
    /// return `None`.
    pub fn route<'a>(&mut self, line: &'a str) -> Option<RoutedReply<'a>> {
        for kind in RequestKind::ALL {
            let slot = &mut self.current[kind.index()];
            let Some(pending) = slot.as_mut() else {
                continue;
            };
            let Some(reply) = classify_reply(line, &pending.token) else {
                continue;
            };
            pending.advance(&reply);
            let routed = RoutedReply {
                kind,
                token: pending.token.clone(),
                reply,
                state: pending.state,
            };
            if reply == Reply::Finished {
                *slot = None;
            }
            return Some(routed);
        }
        None
    }

    /// Drop the current request of `kind` if it still carries `token`.
    pub fn abandon(&mut self, kind: RequestKind, token: &str) -> bool {
        let slot = &mut self.current[kind.index()];
        if slot.as_ref().is_some_and(|pending| pending.token == token) {
            *slot = None;
            return true;
        }
        false
    }

    pub fn current(&self, kind: RequestKind) -> Option<&PendingRequest> {
        self.current[kind.index()].as_ref()
    }

    pub fn is_idle(&self, kind: RequestKind) -> bool {
        self.current[kind.index()].is_none()
    }

    /// Number of kinds with a request in flight.
    pub fn in_flight(&self) -> usize {
        self.current.iter().filter(|slot| slot.is_some()).count()
    }
}
