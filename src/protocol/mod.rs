//! Line protocol spoken with the ticket server.
//!
//! Requests go out as `<token> <VERB>[ <arg>]\n`. Every reply line starts with
//! the token of the request it answers, followed by `ACK`, `RESULT <payload>`
//! (repeatable) or `FINISHED`. Only the newest request of each kind is
//! tracked; replies for older tokens are dropped silently.

mod command;
mod reply;
mod token;
mod tracker;


pub use command::{RequestKind, ServerCommand};
pub use reply::{classify_reply, Reply};
pub use token::TokenGenerator;
pub use tracker::{IssuedRequest, PendingRequest, RequestState, RequestTracker, RoutedReply};
