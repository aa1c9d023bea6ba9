//! Session with the ticket server: one supervisor, one line reader and the
//! request tracker, all driven from the caller's thread.

mod session;


pub use session::{ClientEvent, ClientOptions, ServerClient};
