//! Ordering for ticket keys such as `PRJ-9` and `PRJ-10`.

use std::cmp::Ordering;

/// Compare two ticket keys.
///
/// Keys sharing the part before the first `-` compare by the number after it,
/// so `PRJ-9` sorts before `PRJ-10`. Anything else falls back to plain string
/// order.
pub fn compare_tickets(a: &str, b: &str) -> Ordering {
    if let (Some((a_project, a_number)), Some((b_project, b_number))) =
        (a.split_once('-'), b.split_once('-'))
    {
        if a_project == b_project {
            if let (Ok(a_number), Ok(b_number)) =
                (a_number.parse::<i64>(), b_number.parse::<i64>())
            {
                return a_number.cmp(&b_number).then_with(|| a.cmp(b));
            }
        }
    }
    a.cmp(b)
}

/// Sort ticket keys in place with [`compare_tickets`].
pub fn sort_tickets(tickets: &mut [String]) {
    tickets.sort_by(|a, b| compare_tickets(a, b));
}
