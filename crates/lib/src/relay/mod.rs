//! Relay protocol: hand a user's message to a possibly-offline worker without
//! blocking the submitting request, and let the client poll for the reply.
//!
//! Flow: [`RelayDispatcher::submit`] stores the user message and a pending
//! placeholder and pushes `chat:incoming`; the worker answers through
//! [`ingest_reply`]; the client drives [`poll_message`] until the placeholder
//! resolves or its own deadline passes.

mod dispatcher;
mod error;
mod fallback;
mod history;
mod ingest;
mod poll;

pub use dispatcher::{RelayDispatcher, Submission};
pub use error::RelayError;
pub use fallback::{FallbackResponder, StaticFallback};
pub use history::{history, unread, MissedMessage, PendingReply, Unread};
pub use ingest::ingest_reply;
pub use poll::{poll_message, PollStatus};
