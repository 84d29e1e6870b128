//! Configuration options for the ServiceHub client

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use servicehub_auth::SessionClientOptions;
use servicehub_realtime::ChannelOptions;
use url::Url;

use crate::error::Error;

pub const ENV_API_URL: &str = "SERVICEHUB_API_URL";
pub const ENV_WS_ORIGIN: &str = "SERVICEHUB_WS_ORIGIN";
pub const ENV_SESSION_FILE: &str = "SERVICEHUB_SESSION_FILE";
pub const ENV_REQUEST_TIMEOUT_SECS: &str = "SERVICEHUB_REQUEST_TIMEOUT_SECS";
pub const ENV_WS_MAX_ATTEMPTS: &str = "SERVICEHUB_WS_MAX_ATTEMPTS";

/// Configuration options for the ServiceHub client
#[derive(Debug, Clone, Default)]
pub struct ClientOptions {
    /// Options for the authenticated HTTP layer, including the API base URL
    pub session: SessionClientOptions,

    /// Options shared by every realtime channel
    pub channel: ChannelOptions,

    /// Origin for WebSocket channels. Defaults to the origin of the API URL.
    pub realtime_origin: Option<String>,

    /// Persist the session in this file instead of memory
    pub session_file: Option<PathBuf>,
}

impl ClientOptions {
    /// Reads the `SERVICEHUB_*` environment variables.
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut options = Self::default();

        if let Some(api_url) = value(ENV_API_URL) {
            Url::parse(&api_url)
                .map_err(|e| Error::config(format!("{} is not a valid URL: {}", ENV_API_URL, e)))?;
            options.session.base_url = api_url;
        }
        if let Some(origin) = value(ENV_WS_ORIGIN) {
            Url::parse(&origin)
                .map_err(|e| Error::config(format!("{} is not a valid URL: {}", ENV_WS_ORIGIN, e)))?;
            options.realtime_origin = Some(origin);
        }
        if let Some(path) = value(ENV_SESSION_FILE) {
            options.session_file = Some(PathBuf::from(path));
        }
        if let Some(raw) = value(ENV_REQUEST_TIMEOUT_SECS) {
            let secs: u64 = parse_number(ENV_REQUEST_TIMEOUT_SECS, &raw)?;
            options.session.request_timeout = Duration::from_secs(secs);
        }
        if let Some(raw) = value(ENV_WS_MAX_ATTEMPTS) {
            options.channel.max_attempts = parse_number(ENV_WS_MAX_ATTEMPTS, &raw)?;
        }
        Ok(options)
    }

    pub fn api_url(&self) -> &str {
        &self.session.base_url
    }

    /// Set the API base URL
    pub fn with_api_url(mut self, value: &str) -> Self {
        self.session.base_url = value.to_string();
        self
    }

    /// Set the WebSocket origin
    pub fn with_realtime_origin(mut self, value: &str) -> Self {
        self.realtime_origin = Some(value.to_string());
        self
    }

    /// Set the session file
    pub fn with_session_file(mut self, value: impl Into<PathBuf>) -> Self {
        self.session_file = Some(value.into());
        self
    }

    /// Set the request timeout
    pub fn with_request_timeout(mut self, value: Duration) -> Self {
        self.session.request_timeout = value;
        self
    }

    /// Set the channel options
    pub fn with_channel_options(mut self, value: ChannelOptions) -> Self {
        self.channel = value;
        self
    }

    /// Set the session client options
    pub fn with_session_options(mut self, value: SessionClientOptions) -> Self {
        self.session = value;
        self
    }
}

fn parse_number<T: FromStr>(key: &str, raw: &str) -> Result<T, Error> {
    raw.parse()
        .map_err(|_| Error::config(format!("{} must be a non-negative integer, got {:?}", key, raw)))
}
