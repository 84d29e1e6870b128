use reqwest::StatusCode;
use thiserror::Error;

/// Errors surfaced by [`SessionClient::request`](crate::SessionClient::request)
/// and the helpers built on it.
#[derive(Error, Debug)]
pub enum RequestError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("request failed with status {status}: {body}")]
    RequestFailed { status: StatusCode, body: String },

    /// The access token could not be renewed. The session has been cleared
    /// and the user has to sign in again.
    #[error("session expired")]
    SessionExpired,

    #[error("token refresh failed: {0}")]
    Refresh(RefreshError),

    #[error("invalid request path: {0}")]
    InvalidPath(#[from] url::ParseError),

    #[error("JSON serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl RequestError {
    /// Network level failure, including timeouts and transport failures
    /// while refreshing the access token.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Refresh(RefreshError::Transport(_))
        )
    }

    /// HTTP status of the failed response, if the backend answered.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::RequestFailed { status, .. } => Some(*status),
            Self::Transport(err) => err.status(),
            _ => None,
        }
    }
}

/// Outcome of a failed refresh. `Clone` because one in-flight refresh hands
/// the same result to every waiting caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RefreshError {
    #[error("no refresh token stored")]
    NoRefreshToken,

    #[error("refresh token rejected with status {status}: {body}")]
    RefreshRejected { status: StatusCode, body: String },

    #[error("refresh endpoint failed with status {status}: {body}")]
    Failed { status: StatusCode, body: String },

    #[error("transport error during refresh: {0}")]
    Transport(String),

    #[error("invalid refresh response: {0}")]
    InvalidResponse(String),
}

/// Session persistence failures. These are logged by the client, never
/// returned from an API call.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("session store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("session store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
