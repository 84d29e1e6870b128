//! ServiceHub realtime client for Rust
//!
//! A WebSocket channel that keeps itself connected: exponential backoff
//! between attempts, a bounded number of retries, ordered delivery of
//! inbound JSON frames and owner-controlled teardown.

mod channel;
mod endpoint;
mod error;
mod machine;
mod message;

pub use channel::{ChannelEvent, ChannelOptions, ChannelSender, ReconnectingChannel, TokenSource};
pub use endpoint::{websocket_url, ACTIVITY_PATH, NOTIFICATIONS_PATH, QUOTES_PATH};
pub use error::ChannelError;
pub use machine::{CloseOutcome, ConnectionMachine, ConnectionState};
pub use message::{
    ping, Activity, Alert, ClientUpdate, Notification, QuoteCreated, QuoteStatusChanged,
    QuoteUpdate,
};
