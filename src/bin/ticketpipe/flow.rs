//! Headless fetch flow: ticket list, then optional ticket details and download.

use crate::output::{emit_event, Attachment, Field, OutputEvent};
use anyhow::{anyhow, bail, Context, Result};
use std::collections::HashMap;
use std::fs;
use std::time::{Duration, Instant};
use ticketpipe::config::AppConfig;
use ticketpipe::payload::{decode_bytes, decode_key_values, decode_text, split_ticket_list};
use ticketpipe::protocol::{RequestKind, ServerCommand};
use ticketpipe::signals::shutdown_requested;
use ticketpipe::ticket_order::sort_tickets;
use ticketpipe::{log_debug, ClientEvent, ServerClient};

const POLL_SLICE: Duration = Duration::from_millis(100);

/// Wait for the next event for a current request, honouring the reply timeout
/// and SIGINT/SIGTERM. A closed or failed server is an error.
fn next_reply(client: &mut ServerClient, timeout: Duration) -> Result<ClientEvent> {
    let deadline = Instant::now() + timeout;
    loop {
        if shutdown_requested() {
            bail!("interrupted by signal");
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            bail!("no reply from server within {}ms", timeout.as_millis());
        }
        match client.next_event(remaining.min(POLL_SLICE)) {
            Some(ClientEvent::ServerClosed) => {
                emit_event(&OutputEvent::ServerClosed);
                bail!("server closed its output");
            }
            Some(ClientEvent::ReaderFailed(message)) => bail!(message),
            Some(event) => return Ok(event),
            None if client.is_closed() => bail!("server closed its output"),
            None => {}
        }
    }
}

/// Send every command, then collect RESULT payloads per kind until all have finished.
fn fetch_all(
    client: &mut ServerClient,
    commands: Vec<ServerCommand>,
    timeout: Duration,
) -> Result<HashMap<RequestKind, Vec<String>>> {
    let mut results: HashMap<RequestKind, Vec<String>> = HashMap::new();
    for command in commands {
        let kind = command
            .kind()
            .ok_or_else(|| anyhow!("{} has no reply", command.verb()))?;
        client.request(command)?;
        results.entry(kind).or_default();
    }
    let mut open = results.len();
    while open > 0 {
        match next_reply(client, timeout)? {
            ClientEvent::Result { kind, payload, .. } => {
                results.entry(kind).or_default().push(payload);
            }
            ClientEvent::Finished { kind, token } => {
                log_debug(&format!("{kind} finished ({token})"));
                open -= 1;
            }
            _ => {}
        }
    }
    Ok(results)
}

fn fetch_one(
    client: &mut ServerClient,
    command: ServerCommand,
    timeout: Duration,
) -> Result<Vec<String>> {
    let kind = command.kind();
    let mut results = fetch_all(client, vec![command], timeout)?;
    Ok(kind
        .and_then(|kind| results.remove(&kind))
        .unwrap_or_default())
}

fn take(results: &mut HashMap<RequestKind, Vec<String>>, kind: RequestKind) -> Vec<String> {
    results.remove(&kind).unwrap_or_default()
}

pub(crate) fn run(client: &mut ServerClient, config: &AppConfig) -> Result<()> {
    let timeout = config.reply_timeout();

    let payloads = fetch_one(client, ServerCommand::FetchTicketList, timeout)?;
    let mut tickets: Vec<String> = payloads
        .iter()
        .flat_map(|payload| split_ticket_list(payload))
        .collect();
    sort_tickets(&mut tickets);
    emit_event(&OutputEvent::TicketList { tickets });

    if let Some(ticket) = &config.ticket {
        let commands = vec![
            ServerCommand::FetchTicketFields {
                ticket: ticket.clone(),
            },
            ServerCommand::FetchTicketView {
                ticket: ticket.clone(),
            },
            ServerCommand::FetchAttachmentList {
                ticket: ticket.clone(),
            },
        ];
        let mut results = fetch_all(client, commands, timeout)?;

        let fields = take(&mut results, RequestKind::TicketFields)
            .iter()
            .flat_map(|payload| decode_key_values(payload))
            .map(Field::from)
            .collect();
        emit_event(&OutputEvent::TicketFields {
            ticket: ticket.clone(),
            fields,
        });

        let mut html = String::new();
        for payload in take(&mut results, RequestKind::TicketView) {
            html.push_str(&decode_text(&payload).context("bad ticket view")?);
        }
        emit_event(&OutputEvent::TicketView {
            ticket: ticket.clone(),
            html,
        });

        let attachments = take(&mut results, RequestKind::AttachmentList)
            .iter()
            .flat_map(|payload| decode_key_values(payload))
            .map(Attachment::from)
            .collect();
        emit_event(&OutputEvent::AttachmentList {
            ticket: ticket.clone(),
            attachments,
        });
    }

    if let (Some(id), Some(path)) = (&config.download, config.download_path()) {
        let chunks = fetch_one(
            client,
            ServerCommand::FetchAttachmentContent {
                attachment_id: id.clone(),
            },
            timeout,
        )?;
        let mut bytes = Vec::new();
        for chunk in chunks {
            bytes.extend(decode_bytes(&chunk).context("bad attachment chunk")?);
        }
        fs::write(&path, &bytes)
            .with_context(|| format!("failed to write attachment to {}", path.display()))?;
        emit_event(&OutputEvent::AttachmentSaved {
            id: id.clone(),
            path: path.display().to_string(),
            bytes: bytes.len(),
        });
    }
    Ok(())
}
