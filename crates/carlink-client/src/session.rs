//! Session management for the remote cloud API
//!
//! Owns the authenticated session exclusively: login handshake, access/refresh
//! token lifecycle and transparent re-authentication on expiry, connection
//! reset or an auth-invalid response. The session is replaced wholesale on
//! renewal, never mutated in place while a request is in flight.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use reqwest::StatusCode;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

use carlink_core::{ConnectorError, ConnectorResult};

use crate::credentials::Credentials;
use crate::types::TokenResponse;

/// Default total request timeout
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
/// Default connection timeout
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Tokens within this margin of expiry are renewed before use
const EXPIRY_MARGIN: Duration = Duration::from_secs(30);

/// Connection lifecycle state, exposed for host observability
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticating,
    Authenticated,
    Refreshing,
}

/// One authenticated session; replaced as a unit on every renewal
#[derive(Debug, Clone)]
pub(crate) struct Session {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Instant,
    pub user_id: Option<String>,
}

impl Session {
    fn is_fresh(&self) -> bool {
        self.expires_at > Instant::now() + EXPIRY_MARGIN
    }
}

/// Manages the authenticated HTTP session against the cloud API
#[derive(Debug)]
pub struct SessionManager {
    http: reqwest::Client,
    base_url: Url,
    credentials: Credentials,
    state: RwLock<SessionState>,
    session: RwLock<Option<Session>>,
    /// Bumped on every session install; used to detect renewals done by
    /// other callers while waiting on the renewal lock
    generation: AtomicU64,
    /// At most one login/refresh handshake may be in flight at a time
    renewal: tokio::sync::Mutex<()>,
}

impl SessionManager {
    pub fn new(base_url: &str, credentials: Credentials) -> ConnectorResult<Self> {
        Self::with_config(base_url, credentials, DEFAULT_TIMEOUT, DEFAULT_CONNECT_TIMEOUT)
    }

    /// Create a session manager with custom timeouts
    pub fn with_config(
        base_url: &str,
        credentials: Credentials,
        timeout: Duration,
        connect_timeout: Duration,
    ) -> ConnectorResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| ConnectorError::Config(format!("could not build HTTP client: {e}")))?;

        let base_url = Url::parse(base_url)
            .map_err(|e| ConnectorError::Config(format!("invalid base URL '{base_url}': {e}")))?;

        Ok(Self {
            http,
            base_url,
            credentials,
            state: RwLock::new(SessionState::Unauthenticated),
            session: RwLock::new(None),
            generation: AtomicU64::new(0),
            renewal: tokio::sync::Mutex::new(()),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// User id reported by the identity service at login, if any
    pub fn user_id(&self) -> Option<String> {
        self.session.read().as_ref().and_then(|s| s.user_id.clone())
    }

    /// The configured S-PIN, if any
    pub fn spin(&self) -> Option<&str> {
        self.credentials.spin.as_deref()
    }

    fn current(&self) -> Option<Session> {
        self.session.read().clone()
    }

    fn set_state(&self, state: SessionState) {
        *self.state.write() = state;
    }

    fn install(&self, token: TokenResponse) {
        let previous = self.session.read().clone();
        // The refresh endpoint does not always issue a new refresh token;
        // keep the old one in that case.
        let refresh_token = token
            .refresh_token
            .or_else(|| previous.as_ref().and_then(|s| s.refresh_token.clone()));
        let user_id = token
            .user_id
            .or_else(|| previous.as_ref().and_then(|s| s.user_id.clone()));

        let session = Session {
            access_token: token.access_token,
            refresh_token,
            expires_at: Instant::now() + Duration::from_secs(token.expires_in),
            user_id,
        };
        *self.session.write() = Some(session);
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.set_state(SessionState::Authenticated);
    }

    /// Perform the login handshake with the stored credentials.
    ///
    /// Invalid credentials are fatal; the error is surfaced and no retry is
    /// attempted.
    pub async fn login(&self) -> ConnectorResult<()> {
        self.set_state(SessionState::Authenticating);
        let url = self.join("/auth/v1/login")?;
        debug!(target: "carlink::api", %url, "logging in");

        let body = serde_json::json!({
            "username": self.credentials.username,
            "password": self.credentials.password,
        });

        let response = self.http.post(url).json(&body).send().await.map_err(|e| {
            self.set_state(SessionState::Unauthenticated);
            map_transport_error(e)
        })?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            self.set_state(SessionState::Unauthenticated);
            return Err(ConnectorError::Authentication(
                "login rejected: invalid username or password".to_string(),
            ));
        }
        if !status.is_success() {
            self.set_state(SessionState::Unauthenticated);
            return Err(status_error(status, "login failed"));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| ConnectorError::Parse(format!("login response: {e}")))?;
        self.install(token);
        info!("session established for {}", self.credentials.username);
        Ok(())
    }

    /// Renew the session, serialized against concurrent renewals.
    pub async fn refresh(&self) -> ConnectorResult<()> {
        let generation = self.generation.load(Ordering::SeqCst);
        let _guard = self.renewal.lock().await;
        if self.generation.load(Ordering::SeqCst) != generation {
            // Someone else renewed while we waited for the lock.
            return Ok(());
        }
        self.renew_locked().await
    }

    /// Exchange the refresh token for a new access token, falling back to a
    /// full login when the refresh token itself is rejected or missing.
    /// Caller must hold the renewal lock.
    async fn renew_locked(&self) -> ConnectorResult<()> {
        let refresh_token = match self.current().and_then(|s| s.refresh_token) {
            Some(token) => token,
            None => return self.login().await,
        };

        self.set_state(SessionState::Refreshing);
        let url = self.join("/auth/v1/refresh")?;
        debug!(target: "carlink::api", %url, "refreshing tokens");

        let body = serde_json::json!({ "refreshToken": refresh_token });
        let response = self.http.post(url).json(&body).send().await.map_err(|e| {
            self.set_state(SessionState::Unauthenticated);
            map_transport_error(e)
        })?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            warn!("refresh token rejected, falling back to full login");
            return self.login().await;
        }
        if !status.is_success() {
            self.set_state(SessionState::Unauthenticated);
            return Err(status_error(status, "token refresh failed"));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| ConnectorError::Parse(format!("refresh response: {e}")))?;
        self.install(token);
        debug!("tokens refreshed");
        Ok(())
    }

    /// Return a usable session, renewing first when the token is expired or
    /// about to expire. Concurrent callers await the in-flight renewal
    /// instead of issuing duplicate handshakes.
    async fn ensure_session(&self) -> ConnectorResult<Session> {
        if let Some(session) = self.current() {
            if session.is_fresh() {
                return Ok(session);
            }
        }

        let generation = self.generation.load(Ordering::SeqCst);
        let _guard = self.renewal.lock().await;
        if self.generation.load(Ordering::SeqCst) == generation {
            self.renew_locked().await?;
        }
        self.current().ok_or_else(|| {
            ConnectorError::Authentication("no session after renewal".to_string())
        })
    }

    /// Issue an authenticated request.
    ///
    /// The builder closure receives the HTTP client, base URL and the current
    /// session (for user-scoped paths); the bearer token and user-id header
    /// are attached here. On a connection reset or an auth-invalid response
    /// exactly one re-authentication is performed and the request retried
    /// once; a second failure surfaces the error and drops the session.
    pub async fn request<F>(&self, build: F) -> ConnectorResult<reqwest::Response>
    where
        F: Fn(&reqwest::Client, &Url, Option<&str>) -> reqwest::RequestBuilder,
    {
        let session = self.ensure_session().await?;
        let generation = self.generation.load(Ordering::SeqCst);

        let outcome = self
            .send_with(&build, &session)
            .await;

        match outcome {
            Ok(response) if response.status() != StatusCode::UNAUTHORIZED => Ok(response),
            Ok(_) => {
                debug!(target: "carlink::api", "server asks for new authorization");
                self.retry_after_renewal(&build, generation).await
            }
            Err(ConnectorError::Timeout) => Err(ConnectorError::Timeout),
            Err(ConnectorError::TransientNetwork(reason)) => {
                warn!(target: "carlink::api", %reason, "connection failed, re-authenticating once");
                self.retry_after_renewal(&build, generation).await
            }
            Err(other) => Err(other),
        }
    }

    async fn retry_after_renewal<F>(
        &self,
        build: &F,
        seen_generation: u64,
    ) -> ConnectorResult<reqwest::Response>
    where
        F: Fn(&reqwest::Client, &Url, Option<&str>) -> reqwest::RequestBuilder,
    {
        {
            let _guard = self.renewal.lock().await;
            if self.generation.load(Ordering::SeqCst) == seen_generation {
                if let Err(err) = self.renew_locked().await {
                    self.drop_session();
                    return Err(err);
                }
            }
        }

        let session = self
            .current()
            .ok_or_else(|| ConnectorError::Authentication("session lost during renewal".into()))?;

        match self.send_with(build, &session).await {
            Ok(response) if response.status() == StatusCode::UNAUTHORIZED => {
                self.drop_session();
                Err(ConnectorError::Authentication(
                    "request unauthorized after re-authentication".to_string(),
                ))
            }
            Ok(response) => Ok(response),
            Err(err) => {
                self.drop_session();
                Err(err)
            }
        }
    }

    async fn send_with<F>(&self, build: &F, session: &Session) -> ConnectorResult<reqwest::Response>
    where
        F: Fn(&reqwest::Client, &Url, Option<&str>) -> reqwest::RequestBuilder,
    {
        let mut builder = build(&self.http, &self.base_url, session.user_id.as_deref())
            .bearer_auth(&session.access_token);
        if let Some(user_id) = &session.user_id {
            builder = builder.header("user-id", user_id);
        }
        builder.send().await.map_err(map_transport_error)
    }

    fn drop_session(&self) {
        *self.session.write() = None;
        self.set_state(SessionState::Unauthenticated);
    }

    fn join(&self, path: &str) -> ConnectorResult<Url> {
        self.base_url
            .join(path)
            .map_err(|e| ConnectorError::Config(format!("invalid path '{path}': {e}")))
    }
}

/// Map a reqwest error to the connector taxonomy
pub(crate) fn map_transport_error(err: reqwest::Error) -> ConnectorError {
    if err.is_timeout() {
        ConnectorError::Timeout
    } else {
        ConnectorError::TransientNetwork(err.to_string())
    }
}

/// Map an unexpected HTTP status to the connector taxonomy
pub(crate) fn status_error(status: StatusCode, context: &str) -> ConnectorError {
    if status.is_server_error() {
        ConnectorError::TransientNetwork(format!("{context}: HTTP {status}"))
    } else {
        ConnectorError::api(status.as_u16(), context.to_string())
    }
}
