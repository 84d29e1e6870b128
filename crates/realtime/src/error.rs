use thiserror::Error;

/// エラー型
///
/// Clone so it can travel inside [`crate::ChannelEvent::Error`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("WebSocket error: {0}")]
    Transport(String),

    #[error("Failed to parse incoming message: {error}")]
    Parse { error: String, raw: String },

    #[error("Invalid channel URL: {0}")]
    InvalidUrl(String),

    #[error("Unsupported URL scheme: {0}")]
    UnsupportedScheme(String),
}

impl ChannelError {
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

impl From<url::ParseError> for ChannelError {
    fn from(err: url::ParseError) -> Self {
        Self::InvalidUrl(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ChannelError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
