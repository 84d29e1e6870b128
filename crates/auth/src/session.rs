//! Session data

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Authenticated identity held by a [`SessionClient`](crate::SessionClient).
///
/// Serialized with the same field names the backend uses in its token
/// envelope, so a persisted session reads like a login response.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Short-lived bearer credential
    #[serde(rename = "access")]
    pub access_token: String,

    /// Long-lived credential exchanged for new access tokens
    #[serde(rename = "refresh")]
    pub refresh_token: String,

    /// Opaque user profile
    #[serde(default)]
    pub user: serde_json::Value,
}

impl Session {
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        user: serde_json::Value,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            user,
        }
    }

    pub fn has_refresh_token(&self) -> bool {
        !self.refresh_token.is_empty()
    }

    /// Expiry of the access token when it is a JWT carrying an `exp` claim.
    ///
    /// The signature is not checked: the client only uses this to decide
    /// whether to refresh early, the backend remains the authority.
    pub fn access_token_expires_at(&self) -> Option<DateTime<Utc>> {
        let mut validation = Validation::default();
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        let data = jsonwebtoken::decode::<ExpiryClaims>(
            &self.access_token,
            &DecodingKey::from_secret(&[]),
            &validation,
        )
        .ok()?;
        DateTime::from_timestamp(data.claims.exp?, 0)
    }

    /// True when the access token is known to expire within `margin`.
    /// Tokens without a readable expiry never count as expiring.
    pub fn access_token_expires_within(&self, margin: Duration) -> bool {
        self.access_token_expires_at()
            .is_some_and(|expires_at| expires_at - Utc::now() <= margin)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("user", &self.user)
            .finish()
    }
}

#[derive(Deserialize)]
struct ExpiryClaims {
    exp: Option<i64>,
}

/// `{access, refresh, user}` as returned by the login and refresh endpoints.
/// The refresh endpoint only guarantees `access`.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct TokenEnvelope {
    pub access: String,
    #[serde(default)]
    pub refresh: Option<String>,
    #[serde(default)]
    pub user: Option<serde_json::Value>,
}

impl TokenEnvelope {
    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }

    /// A complete session, if the envelope carries both tokens.
    pub fn into_session(self) -> Option<Session> {
        let refresh = self.refresh.filter(|token| !token.is_empty())?;
        Some(Session {
            access_token: self.access,
            refresh_token: refresh,
            user: self.user.unwrap_or_default(),
        })
    }

    /// Applies a refresh response to an existing session. A rotated refresh
    /// token replaces the old one; the profile is kept unless resent.
    pub fn apply_to(self, session: &mut Session) {
        session.access_token = self.access;
        if let Some(refresh) = self.refresh.filter(|token| !token.is_empty()) {
            session.refresh_token = refresh;
        }
        if let Some(user) = self.user {
            session.user = user;
        }
    }
}
