//! ServiceHub Rust Client Library
//!
//! A Rust client for the ServiceHub API: authenticated REST calls that
//! refresh their own tokens, and live notification channels that reconnect
//! on their own.

pub mod config;
pub mod endpoints;
pub mod error;

use std::path::Path;
use std::sync::Arc;

use log::{debug, info};
use reqwest::Client;
use url::Url;

pub use servicehub_auth as auth;
pub use servicehub_realtime as realtime;

use crate::config::ClientOptions;
use crate::error::Error;
use servicehub_auth::{FileSessionStore, MemorySessionStore, SessionClient, SessionStore};
use servicehub_realtime::{
    websocket_url, ReconnectingChannel, TokenSource, ACTIVITY_PATH, NOTIFICATIONS_PATH,
    QUOTES_PATH,
};

/// The main entry point for the ServiceHub Rust client
pub struct ServiceHub {
    auth: SessionClient,
    options: ClientOptions,
}

impl ServiceHub {
    /// Create a new ServiceHub client
    ///
    /// Picks up a session persisted by an earlier run when `session_file`
    /// is set.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use servicehub_client::{ServiceHub, config::ClientOptions};
    ///
    /// # async fn run() -> Result<(), servicehub_client::error::Error> {
    /// let options = ClientOptions::default().with_api_url("https://hub.example.com/api/v1");
    /// let hub = ServiceHub::new(options).await?;
    /// hub.auth().login("ops@example.com", "secret").await?;
    /// let mut notifications = hub.notifications()?;
    /// while let Some(event) = notifications.next_event().await {
    ///     println!("{:?}", event);
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub async fn new(options: ClientOptions) -> Result<Self, Error> {
        let http_client = Client::builder().build()?;
        let store: Arc<dyn SessionStore> = match options.session_file.as_deref() {
            Some(path) => Arc::new(FileSessionStore::new(path)),
            None => Arc::new(MemorySessionStore::new()),
        };
        let auth = SessionClient::with_store(http_client, options.session.clone(), store)?;
        if auth.restore().await {
            info!("Resumed session for {}", auth.base_url());
        }
        Ok(Self { auth, options })
    }

    /// Create a client configured from `SERVICEHUB_*` environment variables
    pub async fn from_env() -> Result<Self, Error> {
        Self::new(ClientOptions::from_env()?).await
    }

    /// Get a reference to the session client for authenticated requests
    pub fn auth(&self) -> &SessionClient {
        &self.auth
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    pub fn session_file(&self) -> Option<&Path> {
        self.options.session_file.as_deref()
    }

    /// WebSocket URL for a channel path, without the access token
    pub fn channel_url(&self, path: &str) -> Result<Url, Error> {
        let origin = self
            .options
            .realtime_origin
            .as_deref()
            .unwrap_or_else(|| self.options.api_url());
        Ok(websocket_url(origin, path)?)
    }

    /// Opens a channel that authenticates with the current access token on
    /// every connect attempt.
    pub fn channel(&self, path: &str) -> Result<ReconnectingChannel, Error> {
        let url = self.channel_url(path)?;
        let auth = self.auth.clone();
        let token: TokenSource = Arc::new(move || auth.access_token());
        debug!("Opening channel {}", url);
        Ok(ReconnectingChannel::open_with_token(
            url.as_str(),
            self.options.channel.clone(),
            token,
        )?)
    }

    /// 通知チャンネル
    pub fn notifications(&self) -> Result<ReconnectingChannel, Error> {
        self.channel(NOTIFICATIONS_PATH)
    }

    /// 見積チャンネル
    pub fn quotes(&self) -> Result<ReconnectingChannel, Error> {
        self.channel(QUOTES_PATH)
    }

    pub fn activity(&self) -> Result<ReconnectingChannel, Error> {
        self.channel(ACTIVITY_PATH)
    }
}

/// A convenience module for common imports
pub mod prelude {
    pub use crate::config::ClientOptions;
    pub use crate::error::Error;
    pub use crate::ServiceHub;
    pub use servicehub_auth::{Method, RequestError, RequestOptions, Session, SessionClient};
    pub use servicehub_realtime::{
        ChannelEvent, ChannelOptions, ConnectionState, Notification, ReconnectingChannel,
    };
}
