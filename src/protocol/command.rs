use anyhow::{bail, Result};
use std::fmt;

/// Logical request slots. At most one request per kind is current at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RequestKind {
    TicketList,
    TicketFields,
    TicketView,
    AttachmentList,
    AttachmentContent,
}

impl RequestKind {
    pub const ALL: [RequestKind; 5] = [
        RequestKind::TicketList,
        RequestKind::TicketFields,
        RequestKind::TicketView,
        RequestKind::AttachmentList,
        RequestKind::AttachmentContent,
    ];

    /// Human-readable prefix used when building tokens.
    pub fn token_prefix(self) -> &'static str {
        match self {
            RequestKind::TicketList => "ticket-list",
            RequestKind::TicketFields => "fields",
            RequestKind::TicketView => "view",
            RequestKind::AttachmentList => "attachments",
            RequestKind::AttachmentContent => "download",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RequestKind::TicketList => "ticket_list",
            RequestKind::TicketFields => "ticket_fields",
            RequestKind::TicketView => "ticket_view",
            RequestKind::AttachmentList => "attachment_list",
            RequestKind::AttachmentContent => "attachment_content",
        }
    }

    pub(super) fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fixed command vocabulary understood by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerCommand {
    FetchTicketList,
    FetchTicketFields { ticket: String },
    FetchTicketView { ticket: String },
    FetchAttachmentList { ticket: String },
    FetchAttachmentContent { attachment_id: String },
    /// Sentinel asking the server to exit immediately.
    ExitServerNow,
}

impl ServerCommand {
    pub fn verb(&self) -> &'static str {
        match self {
            ServerCommand::FetchTicketList => "FETCH_TICKET_LIST",
            ServerCommand::FetchTicketFields { .. } => "FETCH_TICKET_KEY_VALUE_FIELDS",
            ServerCommand::FetchTicketView { .. } => "FETCH_TICKET_HTML",
            ServerCommand::FetchAttachmentList { .. } => "FETCH_ATTACHMENT_LIST",
            ServerCommand::FetchAttachmentContent { .. } => "FETCH_ATTACHMENT_CONTENT",
            ServerCommand::ExitServerNow => "EXIT_SERVER_NOW",
        }
    }

    /// Slot this command occupies; `None` for the exit sentinel, which expects no reply.
    pub fn kind(&self) -> Option<RequestKind> {
        match self {
            ServerCommand::FetchTicketList => Some(RequestKind::TicketList),
            ServerCommand::FetchTicketFields { .. } => Some(RequestKind::TicketFields),
            ServerCommand::FetchTicketView { .. } => Some(RequestKind::TicketView),
            ServerCommand::FetchAttachmentList { .. } => Some(RequestKind::AttachmentList),
            ServerCommand::FetchAttachmentContent { .. } => Some(RequestKind::AttachmentContent),
            ServerCommand::ExitServerNow => None,
        }
    }

    /// Ticket or attachment the command is about, if any.
    pub fn subject(&self) -> Option<&str> {
        match self {
            ServerCommand::FetchTicketFields { ticket }
            | ServerCommand::FetchTicketView { ticket }
            | ServerCommand::FetchAttachmentList { ticket } => Some(ticket),
            ServerCommand::FetchAttachmentContent { attachment_id } => Some(attachment_id),
            ServerCommand::FetchTicketList | ServerCommand::ExitServerNow => None,
        }
    }

    /// Command text without token or newline, e.g. `FETCH_TICKET_HTML PRJ-2`.
    pub fn text(&self) -> String {
        match self.subject() {
            Some(subject) => format!("{} {subject}", self.verb()),
            None => self.verb().to_string(),
        }
    }

    /// Full request line for `token`, newline included.
    pub fn to_line(&self, token: &str) -> String {
        format!("{token} {}\n", self.text())
    }

    /// Reject arguments that would break the one-line, space-separated framing.
    pub fn validate(&self) -> Result<()> {
        if let Some(subject) = self.subject() {
            if subject.is_empty() {
                bail!("{} needs a non-empty argument", self.verb());
            }
            if subject.chars().any(char::is_whitespace) {
                bail!("{} argument must not contain whitespace: {subject:?}", self.verb());
            }
        }
        Ok(())
    }
}
