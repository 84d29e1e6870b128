//! Error handling for the ServiceHub Rust client

use std::fmt;
use thiserror::Error;

use servicehub_auth::{RefreshError, RequestError, StoreError};
use servicehub_realtime::ChannelError;

/// Unified error type for the ServiceHub Rust client
#[derive(Error, Debug)]
pub enum Error {
    /// Authenticated request errors
    #[error("Request error: {0}")]
    Request(#[from] RequestError),

    /// Token refresh errors outside of a request
    #[error("Refresh error: {0}")]
    Refresh(#[from] RefreshError),

    /// Session persistence errors
    #[error("Session store error: {0}")]
    Store(#[from] StoreError),

    /// Realtime channel errors
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    /// Building the HTTP client failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// URL parsing errors
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// Missing or malformed configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Create a new configuration error
    pub fn config<T: fmt::Display>(msg: T) -> Self {
        Error::Config(msg.to_string())
    }

    /// The session is gone and the user has to sign in again
    pub fn is_session_expired(&self) -> bool {
        matches!(self, Error::Request(RequestError::SessionExpired))
    }
}
