//! Gateway: HTTP + WebSocket surface of the relay.
//!
//! Single port. End users submit and poll with a session bearer token; workers
//! reply, catch up and subscribe to push events with their worker token.

mod protocol;
mod server;

pub use protocol::{
    AgentStatusResponse, ErrorBody, HistoryResponse, PollResponse, ReplyParams, ReplyResponse,
    SendParams, StatusParams,
};
pub use server::{router, run_gateway, serve, GatewayState};
