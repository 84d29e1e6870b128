//! ServiceHub auth client for Rust
//!
//! This crate provides the authenticated HTTP layer of the ServiceHub
//! client: bearer-token attachment, transparent access-token refresh with
//! single-flight coordination, and session persistence.

mod client;
mod error;
mod session;
mod store;

pub use client::{AccessToken, Method, RequestOptions, SessionClient, SessionClientOptions};
pub use error::{RefreshError, RequestError, StoreError};
pub use session::Session;
pub use store::{FileSessionStore, MemorySessionStore, SessionStore};

pub use reqwest::{Response, StatusCode};
