//! JSON-lines events printed on stdout, one object per line.

use serde::Serialize;
use std::io::{self, Write};
use ticketpipe::payload::KeyValue;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub(crate) struct Field {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub(crate) struct Attachment {
    pub id: String,
    pub name: String,
}

impl From<KeyValue> for Field {
    fn from(entry: KeyValue) -> Self {
        Self {
            key: entry.key,
            value: entry.value,
        }
    }
}

impl From<KeyValue> for Attachment {
    fn from(entry: KeyValue) -> Self {
        Self {
            id: entry.key,
            name: entry.value,
        }
    }
}

/// Serialized with an `"event"` tag field.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub(crate) enum OutputEvent {
    #[serde(rename = "ticket_list")]
    TicketList { tickets: Vec<String> },

    #[serde(rename = "ticket_fields")]
    TicketFields { ticket: String, fields: Vec<Field> },

    #[serde(rename = "ticket_view")]
    TicketView { ticket: String, html: String },

    #[serde(rename = "attachment_list")]
    AttachmentList {
        ticket: String,
        attachments: Vec<Attachment>,
    },

    #[serde(rename = "attachment_saved")]
    AttachmentSaved {
        id: String,
        path: String,
        bytes: usize,
    },

    #[serde(rename = "server_closed")]
    ServerClosed,

    #[serde(rename = "error")]
    Error { message: String },
}

pub(crate) fn emit_event(event: &OutputEvent) {
    if let Ok(json) = serde_json::to_string(event) {
        let mut stdout = io::stdout().lock();
        let _ = writeln!(stdout, "{json}");
        let _ = stdout.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_carry_tag_field() {
        let json = serde_json::to_string(&OutputEvent::TicketList {
            tickets: vec!["PRJ-2".to_string()],
        })
        .unwrap();
        assert_eq!(json, r#"{"event":"ticket_list","tickets":["PRJ-2"]}"#);
        let json = serde_json::to_string(&OutputEvent::ServerClosed).unwrap();
        assert_eq!(json, r#"{"event":"server_closed"}"#);
    }
}
