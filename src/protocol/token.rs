use std::sync::atomic::{AtomicU64, Ordering};

use super::command::RequestKind;

/// Hands out tokens that are unique for the lifetime of one generator.
///
/// Tokens look like `fields-PRJ-2-7`: the kind prefix, the subject when there
/// is one, and a counter shared by every kind.
#[derive(Debug, Default)]
pub struct TokenGenerator {
    counter: AtomicU64,
}

impl TokenGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token for a request of `kind`; `None` kind is used by the exit sentinel.
    pub fn next(&self, kind: Option<RequestKind>, subject: Option<&str>) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        let prefix = kind.map(RequestKind::token_prefix).unwrap_or("exit");
        match subject {
            Some(subject) => format!("{prefix}-{}-{n}", sanitize(subject)),
            None => format!("{prefix}-{n}"),
        }
    }
}

fn sanitize(subject: &str) -> String {
    subject
        .chars()
        .map(|c| if c.is_whitespace() || c.is_control() { '_' } else { c })
        .collect()
}
