use crate::error::{RefreshError, RequestError};
use crate::session::{Session, TokenEnvelope};
use crate::store::{MemorySessionStore, SessionStore};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use log::{debug, info, trace, warn};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use url::Url;

/// Access token handed out by a successful refresh
pub type AccessToken = String;

type SharedRefresh = Shared<BoxFuture<'static, Result<AccessToken, RefreshError>>>;

/// HTTP methods accepted by [`SessionClient::request`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

/// SessionClient設定オプション
#[derive(Debug, Clone)]
pub struct SessionClientOptions {
    /// Base endpoint every request path is resolved against
    pub base_url: String,
    /// Default timeout for a single HTTP round-trip
    pub request_timeout: Duration,
    /// Refresh ahead of time when the access token is a JWT about to expire
    pub auto_refresh_token: bool,
    /// How close to expiry a JWT access token gets refreshed proactively
    pub refresh_margin: Duration,
    pub login_path: String,
    pub register_path: String,
    pub refresh_path: String,
    pub logout_path: String,
    pub me_path: String,
}

impl Default for SessionClientOptions {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/api/v1".to_string(),
            request_timeout: Duration::from_secs(30),
            auto_refresh_token: true,
            refresh_margin: Duration::from_secs(30),
            login_path: "auth/login/".to_string(),
            register_path: "auth/register/".to_string(),
            refresh_path: "auth/refresh/".to_string(),
            logout_path: "auth/logout/".to_string(),
            me_path: "auth/me/".to_string(),
        }
    }
}

impl SessionClientOptions {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
            ..Default::default()
        }
    }

    pub fn with_request_timeout(mut self, value: Duration) -> Self {
        self.request_timeout = value;
        self
    }

    pub fn with_auto_refresh_token(mut self, value: bool) -> Self {
        self.auto_refresh_token = value;
        self
    }

    pub fn with_refresh_margin(mut self, value: Duration) -> Self {
        self.refresh_margin = value;
        self
    }

    pub fn with_refresh_path(mut self, value: &str) -> Self {
        self.refresh_path = value.to_string();
        self
    }

    pub fn with_login_path(mut self, value: &str) -> Self {
        self.login_path = value.to_string();
        self
    }
}

/// Per-call knobs for [`SessionClient::request`]
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Overrides the client's default timeout
    pub timeout: Option<Duration>,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    /// Send without a bearer token and never refresh on 401
    pub anonymous: bool,
}

impl RequestOptions {
    pub fn anonymous() -> Self {
        Self {
            anonymous: true,
            ..Default::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_query(mut self, key: &str, value: &str) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

/// Authenticated HTTP client.
///
/// Attaches the current access token to every request, refreshes it once when
/// the backend answers 401, and coalesces concurrent refreshes into a single
/// call to the refresh endpoint. Cloning is cheap and clones share the session.
#[derive(Clone)]
pub struct SessionClient {
    inner: Arc<Inner>,
}

struct Inner {
    base_url: Url,
    http_client: Client,
    options: SessionClientOptions,
    session: RwLock<Option<Session>>,
    store: Arc<dyn SessionStore>,
    refresh_in_flight: tokio::sync::Mutex<Option<SharedRefresh>>,
}

impl SessionClient {
    /// Client with an in-memory session store.
    pub fn new(http_client: Client, options: SessionClientOptions) -> Result<Self, url::ParseError> {
        Self::with_store(http_client, options, Arc::new(MemorySessionStore::new()))
    }

    /// Client persisting its session into `store`. Call [`restore`](Self::restore)
    /// to pick up a session saved by an earlier run.
    pub fn with_store(
        http_client: Client,
        options: SessionClientOptions,
        store: Arc<dyn SessionStore>,
    ) -> Result<Self, url::ParseError> {
        let base_url = normalize_base(&options.base_url)?;
        Ok(Self {
            inner: Arc::new(Inner {
                base_url,
                http_client,
                options,
                session: RwLock::new(None),
                store,
                refresh_in_flight: tokio::sync::Mutex::new(None),
            }),
        })
    }

    /// Loads the persisted session, if any. Returns whether one was found.
    pub async fn restore(&self) -> bool {
        match self.inner.store.load().await {
            Ok(Some(session)) => {
                info!("Restored persisted session");
                *self.inner.session_write() = Some(session);
                true
            }
            Ok(None) => false,
            Err(e) => {
                warn!("Failed to load persisted session: {}", e);
                false
            }
        }
    }

    pub fn options(&self) -> &SessionClientOptions {
        &self.inner.options
    }

    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    /// Resolves `path` against the base endpoint.
    pub fn endpoint(&self, path: &str) -> Result<Url, url::ParseError> {
        self.inner.endpoint(path)
    }

    /// True iff an access token is stored. No network call.
    pub fn is_authenticated(&self) -> bool {
        self.inner
            .session_read()
            .as_ref()
            .is_some_and(|session| !session.access_token.is_empty())
    }

    pub fn session(&self) -> Option<Session> {
        self.inner.current_session()
    }

    pub fn user(&self) -> Option<serde_json::Value> {
        self.inner.session_read().as_ref().map(|s| s.user.clone())
    }

    pub fn access_token(&self) -> Option<AccessToken> {
        self.inner.current_access_token()
    }

    /// `Authorization` header value for the current session
    pub fn auth_header(&self) -> Option<String> {
        self.access_token().map(|token| format!("Bearer {}", token))
    }

    /// Adopts a session obtained out of band and persists it.
    pub async fn set_session(&self, session: Session) {
        *self.inner.session_write() = Some(session.clone());
        self.inner.persist(&session).await;
    }

    /// Drops the session from memory and storage.
    pub async fn clear_session(&self) {
        self.inner.clear().await;
    }

    /// Sends `method path` with the current access token.
    ///
    /// A 401 triggers one refresh (shared with any concurrent caller) and one
    /// retry. A second 401, or a rejected refresh token, clears the session and
    /// fails with [`RequestError::SessionExpired`]. Other error statuses fail
    /// with [`RequestError::RequestFailed`] and are never retried.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
        options: RequestOptions,
    ) -> Result<Response, RequestError> {
        let url = self.inner.endpoint(path)?;

        if options.anonymous {
            let response = self.send_once(method, &url, body, &options, None).await?;
            return ensure_success(response).await;
        }

        if self.inner.options.auto_refresh_token {
            self.refresh_if_expiring().await?;
        }

        let sent_token = self.access_token();
        let response = self
            .send_once(method, &url, body, &options, sent_token.as_deref())
            .await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return ensure_success(response).await;
        }

        let unauthorized_body = response.text().await.unwrap_or_default();
        let retry_token = match self.access_token() {
            // someone refreshed while this request was in flight
            Some(current) if sent_token.as_deref() != Some(current.as_str()) => {
                debug!("Access token changed during request, retrying {} without refresh", url);
                current
            }
            _ => match self.refresh().await {
                Ok(token) => token,
                Err(RefreshError::NoRefreshToken) => {
                    return Err(RequestError::RequestFailed {
                        status: StatusCode::UNAUTHORIZED,
                        body: unauthorized_body,
                    });
                }
                Err(RefreshError::RefreshRejected { .. }) => {
                    self.inner.clear().await;
                    return Err(RequestError::SessionExpired);
                }
                Err(e) => return Err(RequestError::Refresh(e)),
            },
        };

        let retry = self
            .send_once(method, &url, body, &options, Some(&retry_token))
            .await?;
        if retry.status() == StatusCode::UNAUTHORIZED {
            warn!("Request to {} still unauthorized after refresh, ending session", url);
            self.inner.clear().await;
            return Err(RequestError::SessionExpired);
        }
        ensure_success(retry).await
    }

    /// Exchanges the refresh token for a new access token.
    ///
    /// Single-flight: while a refresh is running every other caller awaits
    /// the same result instead of issuing its own call.
    pub async fn refresh(&self) -> Result<AccessToken, RefreshError> {
        let in_flight = {
            let mut slot = self.inner.refresh_in_flight.lock().await;
            match slot.as_ref() {
                Some(existing) => {
                    debug!("Joining in-flight token refresh");
                    existing.clone()
                }
                None => {
                    let inner = Arc::clone(&self.inner);
                    // the future frees its own slot so a cancelled waiter cannot leave it behind
                    let refresh = async move {
                        let result = Inner::refresh_access_token(Arc::clone(&inner)).await;
                        *inner.refresh_in_flight.lock().await = None;
                        result
                    }
                    .boxed()
                    .shared();
                    *slot = Some(refresh.clone());
                    refresh
                }
            }
        };

        in_flight.await
    }

    /// メール・パスワードでログイン
    pub async fn login(&self, email: &str, password: &str) -> Result<Session, RequestError> {
        let payload = json!({
            "email": email,
            "password": password,
        });
        let response = self
            .request(
                Method::Post,
                &self.inner.options.login_path,
                Some(&payload),
                RequestOptions::anonymous(),
            )
            .await?;

        let envelope: TokenEnvelope = read_json(response).await?;
        let session = envelope.into_session().ok_or_else(|| {
            RequestError::InvalidResponse("login response carries no refresh token".to_string())
        })?;
        self.set_session(session.clone()).await;
        info!("Signed in");
        Ok(session)
    }

    /// ユーザー登録
    ///
    /// Tokens in the registration response become the session directly;
    /// otherwise the payload's `email` and `password` are used to sign in.
    pub async fn register(&self, payload: &serde_json::Value) -> Result<Session, RequestError> {
        let response = self
            .request(
                Method::Post,
                &self.inner.options.register_path,
                Some(payload),
                RequestOptions::anonymous(),
            )
            .await?;
        let bytes = response.bytes().await?;
        let body: serde_json::Value = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes)?
        };

        if let Some(session) = TokenEnvelope::from_value(&body).and_then(TokenEnvelope::into_session) {
            self.set_session(session.clone()).await;
            info!("Registered and signed in");
            return Ok(session);
        }

        let email = payload.get("email").and_then(|v| v.as_str());
        let password = payload.get("password").and_then(|v| v.as_str());
        match (email, password) {
            (Some(email), Some(password)) => {
                debug!("Registration returned no tokens, signing in");
                self.login(email, password).await
            }
            _ => Err(RequestError::InvalidResponse(
                "registration returned no tokens and the payload has no credentials".to_string(),
            )),
        }
    }

    /// サインアウト
    ///
    /// The backend is told about the logout on a best-effort basis; the local
    /// session is cleared whatever it answers.
    pub async fn logout(&self) {
        if let Some(session) = self.session() {
            let payload = json!({ "refresh": session.refresh_token });
            match self.inner.endpoint(&self.inner.options.logout_path) {
                Ok(url) => {
                    let result = self
                        .send_once(
                            Method::Post,
                            &url,
                            Some(&payload),
                            &RequestOptions::default(),
                            Some(&session.access_token),
                        )
                        .await;
                    match result {
                        Ok(response) if response.status().is_success() => {
                            debug!("Backend acknowledged logout");
                        }
                        Ok(response) => warn!("Logout failed with status {}", response.status()),
                        Err(e) => warn!("Logout request failed: {}", e),
                    }
                }
                Err(e) => warn!("Invalid logout path: {}", e),
            }
        }
        self.inner.clear().await;
    }

    /// 現在のユーザーを取得
    ///
    /// `Ok(None)` when signed out, or when the backend no longer accepts the
    /// session (which is then cleared). Transport failures propagate.
    pub async fn current_user(&self) -> Result<Option<serde_json::Value>, RequestError> {
        if !self.is_authenticated() {
            return Ok(None);
        }

        let path = self.inner.options.me_path.clone();
        match self.get_json::<serde_json::Value>(&path).await {
            Ok(user) => {
                let updated = {
                    let mut guard = self.inner.session_write();
                    guard.as_mut().map(|session| {
                        session.user = user.clone();
                        session.clone()
                    })
                };
                if let Some(session) = updated {
                    self.inner.persist(&session).await;
                }
                Ok(Some(user))
            }
            Err(RequestError::SessionExpired) => Ok(None),
            Err(RequestError::RequestFailed { status, .. }) => {
                info!("Profile request failed with status {}, ending session", status);
                self.inner.clear().await;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, RequestError> {
        let response = self
            .request(Method::Get, path, None, RequestOptions::default())
            .await?;
        read_json(response).await
    }

    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, RequestError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send_json(Method::Post, path, body).await
    }

    pub async fn put_json<B, T>(&self, path: &str, body: &B) -> Result<T, RequestError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send_json(Method::Put, path, body).await
    }

    pub async fn patch_json<B, T>(&self, path: &str, body: &B) -> Result<T, RequestError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send_json(Method::Patch, path, body).await
    }

    pub async fn delete(&self, path: &str) -> Result<(), RequestError> {
        self.request(Method::Delete, path, None, RequestOptions::default())
            .await?;
        Ok(())
    }

    async fn send_json<B, T>(&self, method: Method, path: &str, body: &B) -> Result<T, RequestError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = serde_json::to_value(body)?;
        let response = self
            .request(method, path, Some(&body), RequestOptions::default())
            .await?;
        read_json(response).await
    }

    async fn refresh_if_expiring(&self) -> Result<(), RequestError> {
        let margin = chrono::Duration::from_std(self.inner.options.refresh_margin)
            .unwrap_or_else(|_| chrono::Duration::zero());
        let expiring = self.inner.session_read().as_ref().is_some_and(|session| {
            session.has_refresh_token() && session.access_token_expires_within(margin)
        });
        if !expiring {
            return Ok(());
        }

        debug!("Access token about to expire, refreshing ahead of request");
        match self.refresh().await {
            Ok(_) => Ok(()),
            Err(RefreshError::RefreshRejected { .. }) => {
                self.inner.clear().await;
                Err(RequestError::SessionExpired)
            }
            Err(e) => {
                // the request may still succeed with the current token
                warn!("Proactive token refresh failed: {}", e);
                Ok(())
            }
        }
    }

    async fn send_once(
        &self,
        method: Method,
        url: &Url,
        body: Option<&serde_json::Value>,
        options: &RequestOptions,
        token: Option<&str>,
    ) -> Result<Response, RequestError> {
        trace!("{:?} {}", method, url);
        let mut builder = self
            .inner
            .http_client
            .request(method.into(), url.clone())
            .timeout(options.timeout.unwrap_or(self.inner.options.request_timeout));

        if !options.query.is_empty() {
            builder = builder.query(&options.query);
        }
        for (name, value) in &options.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(token) = token {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = body {
            builder = builder.json(body);
        }

        Ok(builder.send().await?)
    }
}

impl Inner {
    fn session_read(&self) -> RwLockReadGuard<'_, Option<Session>> {
        self.session.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn session_write(&self) -> RwLockWriteGuard<'_, Option<Session>> {
        self.session.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn current_session(&self) -> Option<Session> {
        self.session_read().clone()
    }

    fn current_access_token(&self) -> Option<AccessToken> {
        self.session_read()
            .as_ref()
            .map(|session| session.access_token.clone())
            .filter(|token| !token.is_empty())
    }

    fn endpoint(&self, path: &str) -> Result<Url, url::ParseError> {
        self.base_url.join(path.trim_start_matches('/'))
    }

    async fn persist(&self, session: &Session) {
        if let Err(e) = self.store.save(session).await {
            warn!("Failed to persist session: {}", e);
        }
    }

    async fn clear(&self) {
        let had_session = self.session_write().take().is_some();
        if had_session {
            info!("Session cleared");
        }
        if let Err(e) = self.store.clear().await {
            warn!("Failed to clear persisted session: {}", e);
        }
    }

    /// The network half of a refresh. Runs at most once per in-flight slot.
    async fn refresh_access_token(inner: Arc<Inner>) -> Result<AccessToken, RefreshError> {
        let refresh_token = inner
            .current_session()
            .map(|session| session.refresh_token)
            .filter(|token| !token.is_empty())
            .ok_or(RefreshError::NoRefreshToken)?;
        let url = inner
            .endpoint(&inner.options.refresh_path)
            .map_err(|e| RefreshError::InvalidResponse(format!("invalid refresh path: {}", e)))?;

        debug!("Refreshing access token");
        let response = inner
            .http_client
            .post(url)
            .timeout(inner.options.request_timeout)
            .json(&json!({ "refresh": refresh_token }))
            .send()
            .await
            .map_err(|e| RefreshError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if status.is_client_error() {
                warn!("Refresh token rejected with status {}", status);
                return Err(RefreshError::RefreshRejected { status, body });
            }
            warn!("Refresh endpoint failed with status {}", status);
            return Err(RefreshError::Failed { status, body });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| RefreshError::Transport(e.to_string()))?;
        let envelope: TokenEnvelope = serde_json::from_slice(&bytes)
            .map_err(|e| RefreshError::InvalidResponse(e.to_string()))?;
        let access = envelope.access.clone();

        let updated = {
            let mut guard = inner.session_write();
            guard
                .as_mut()
                .filter(|session| session.refresh_token == refresh_token)
                .map(|session| {
                    envelope.apply_to(session);
                    session.clone()
                })
        };
        match updated {
            Some(session) => {
                inner.persist(&session).await;
                debug!("Access token refreshed");
                Ok(access)
            }
            None => {
                // signed out, or another session signed in, while the refresh was running
                debug!("Session replaced during refresh, discarding new token");
                Err(RefreshError::NoRefreshToken)
            }
        }
    }
}

fn normalize_base(base_url: &str) -> Result<Url, url::ParseError> {
    if base_url.ends_with('/') {
        Url::parse(base_url)
    } else {
        Url::parse(&format!("{}/", base_url))
    }
}

async fn ensure_success(response: Response) -> Result<Response, RequestError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(RequestError::RequestFailed { status, body })
}

async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, RequestError> {
    let bytes = response.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_client(base: &str) -> SessionClient {
        SessionClient::new(Client::new(), SessionClientOptions::new(base)).unwrap()
    }

    #[test]
    fn test_paths_resolve_below_base_endpoint() {
        let client = test_client("http://localhost:8000/api/v1");
        assert_eq!(
            client.endpoint("clients/").unwrap().as_str(),
            "http://localhost:8000/api/v1/clients/"
        );
        assert_eq!(
            client.endpoint("/quotes/3/approve/").unwrap().as_str(),
            "http://localhost:8000/api/v1/quotes/3/approve/"
        );

        let with_slash = test_client("http://localhost:8000/api/v1/");
        assert_eq!(
            with_slash.endpoint("auth/me/").unwrap().as_str(),
            "http://localhost:8000/api/v1/auth/me/"
        );
    }

    #[test]
    fn test_invalid_base_url_is_rejected() {
        assert!(SessionClient::new(Client::new(), SessionClientOptions::new("not a url")).is_err());
    }

    #[test]
    fn test_is_authenticated_follows_session() {
        tokio_test::block_on(async {
            let client = test_client("http://localhost:8000/api/v1");
            assert!(!client.is_authenticated());
            assert!(client.auth_header().is_none());

            client
                .set_session(Session::new("a1", "r1", serde_json::json!({"id": 7})))
                .await;
            assert!(client.is_authenticated());
            assert_eq!(client.auth_header().as_deref(), Some("Bearer a1"));
            assert_eq!(client.user().unwrap()["id"], 7);

            client.clear_session().await;
            assert!(!client.is_authenticated());
        });
    }

    #[test]
    fn test_refresh_without_session_fails_fast() {
        tokio_test::block_on(async {
            let client = test_client("http://localhost:8000/api/v1");
            assert_eq!(client.refresh().await, Err(RefreshError::NoRefreshToken));
        });
    }

    #[test]
    fn test_method_conversion() {
        assert_eq!(reqwest::Method::from(Method::Patch), reqwest::Method::PATCH);
        assert_eq!(reqwest::Method::from(Method::Delete), reqwest::Method::DELETE);
    }
}
