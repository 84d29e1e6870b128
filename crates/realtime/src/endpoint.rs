use url::Url;

use crate::error::ChannelError;

pub const NOTIFICATIONS_PATH: &str = "ws/notifications/";
pub const QUOTES_PATH: &str = "ws/quotes/";
pub const ACTIVITY_PATH: &str = "ws/activity/";

/// Builds a channel URL from an HTTP or WebSocket origin.
///
/// `http` maps to `ws` and `https` to `wss`; host and port are kept and the
/// path is replaced.
pub fn websocket_url(origin: &str, path: &str) -> Result<Url, ChannelError> {
    let mut url = Url::parse(origin)?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(ChannelError::UnsupportedScheme(other.to_string())),
    };
    if url.host_str().is_none() {
        return Err(ChannelError::InvalidUrl(format!("missing host in {}", origin)));
    }
    url.set_scheme(scheme)
        .map_err(|_| ChannelError::UnsupportedScheme(scheme.to_string()))?;
    url.set_path(&format!("/{}", path.trim_start_matches('/')));
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

pub(crate) fn ensure_websocket_scheme(url: &Url) -> Result<(), ChannelError> {
    match url.scheme() {
        "ws" | "wss" => Ok(()),
        other => Err(ChannelError::UnsupportedScheme(other.to_string())),
    }
}
