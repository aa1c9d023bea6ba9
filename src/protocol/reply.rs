/// One reply line, already matched to a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply<'a> {
    Ack,
    /// Payload text between `RESULT ` and the trailing newline.
    Result(&'a str),
    Finished,
}

/// Classify `line` relative to `token`; `None` when the line belongs to another request.
pub fn classify_reply<'a>(line: &'a str, token: &str) -> Option<Reply<'a>> {
    let rest = line.strip_prefix(token)?.strip_prefix(' ')?;
    match rest {
        "ACK\n" => Some(Reply::Ack),
        "FINISHED\n" => Some(Reply::Finished),
        _ => {
            let payload = rest.strip_prefix("RESULT ")?;
            Some(Reply::Result(payload.strip_suffix('\n').unwrap_or(payload)))
        }
    }
}
