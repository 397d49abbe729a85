//! Client side of the relay: HTTP clients for end users and workers, and the poll
//! loop that waits for a pending reply.

mod error;
mod http;
mod poll_loop;
mod worker;

pub use error::ClientError;
pub use http::ChatClient;
pub use poll_loop::{timeout_notice, PollLoop, PollOutcome, PollSettings, PollSource};
pub use worker::{ReplyAck, WorkerClient};
