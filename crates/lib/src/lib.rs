//! Relay core library: relays a user's chat message to an external worker agent
//! and lets the client poll for the reply. Shared by the gateway and the CLI.

pub mod agents;
pub mod client;
pub mod config;
pub mod gateway;
pub mod init;
pub mod message;
pub mod notifier;
pub mod relay;
pub mod session;
pub mod store;
