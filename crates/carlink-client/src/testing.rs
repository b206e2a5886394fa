//! Test utilities for carlink-client
//!
//! [`MockCloud`] is an in-process stand-in for the remote vehicle cloud:
//! it implements the login/refresh handshake, bearer-token checks, the
//! S-PIN verification endpoint and configurable resource/command responses,
//! and counts every request so tests can assert cache and renewal
//! behaviour.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::TcpListener;

#[derive(Debug, Clone)]
struct StubbedResponse {
    status: StatusCode,
    body: Option<Value>,
}

struct MockState {
    username: String,
    password: String,
    spin: String,
    expires_in: AtomicU64,
    token_counter: AtomicU64,
    valid_access_tokens: Mutex<HashSet<String>>,
    valid_refresh_tokens: Mutex<HashSet<String>>,
    reject_refresh: Mutex<bool>,
    login_count: AtomicU32,
    refresh_count: AtomicU32,
    security_token: Mutex<Option<String>>,
    /// GET stubs and command overrides, keyed by request path
    stubs: Mutex<HashMap<String, StubbedResponse>>,
    request_counts: Mutex<HashMap<String, u32>>,
    command_bodies: Mutex<HashMap<String, Value>>,
}

/// Mock cloud server that shuts down when dropped
pub struct MockCloud {
    pub addr: SocketAddr,
    state: Arc<MockState>,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl MockCloud {
    /// Start with the default test account (`user@example.com` / `secret`,
    /// S-PIN `1234`)
    pub async fn start() -> std::io::Result<Self> {
        Self::start_with_account("user@example.com", "secret", "1234").await
    }

    pub async fn start_with_account(
        username: &str,
        password: &str,
        spin: &str,
    ) -> std::io::Result<Self> {
        let state = Arc::new(MockState {
            username: username.to_string(),
            password: password.to_string(),
            spin: spin.to_string(),
            expires_in: AtomicU64::new(3600),
            token_counter: AtomicU64::new(0),
            valid_access_tokens: Mutex::new(HashSet::new()),
            valid_refresh_tokens: Mutex::new(HashSet::new()),
            reject_refresh: Mutex::new(false),
            login_count: AtomicU32::new(0),
            refresh_count: AtomicU32::new(0),
            security_token: Mutex::new(None),
            stubs: Mutex::new(HashMap::new()),
            request_counts: Mutex::new(HashMap::new()),
            command_bodies: Mutex::new(HashMap::new()),
        });

        let router = Router::new()
            .route("/auth/v1/login", post(handle_login))
            .route("/auth/v1/refresh", post(handle_refresh))
            .route("/v1/spin/verify", post(handle_spin_verify))
            .fallback(handle_api)
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
        let handle = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        // Give the server a moment to start
        tokio::time::sleep(Duration::from_millis(10)).await;

        Ok(Self {
            addr,
            state,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Stub a GET path with a 200 JSON body
    pub fn stub_json(&self, path: &str, body: Value) {
        self.stub(path, StatusCode::OK, Some(body));
    }

    /// Stub a path with an arbitrary status and optional body. Also applies
    /// to command POSTs, overriding the default acceptance response.
    pub fn stub(&self, path: &str, status: StatusCode, body: Option<Value>) {
        self.state
            .stubs
            .lock()
            .insert(path.to_string(), StubbedResponse { status, body });
    }

    /// How many requests hit `path` so far
    pub fn request_count(&self, path: &str) -> u32 {
        self.state
            .request_counts
            .lock()
            .get(path)
            .copied()
            .unwrap_or(0)
    }

    pub fn login_count(&self) -> u32 {
        self.state.login_count.load(Ordering::SeqCst)
    }

    pub fn refresh_count(&self) -> u32 {
        self.state.refresh_count.load(Ordering::SeqCst)
    }

    /// Token lifetime reported by subsequent logins/refreshes, in seconds
    pub fn set_expires_in(&self, seconds: u64) {
        self.state.expires_in.store(seconds, Ordering::SeqCst);
    }

    /// Invalidate every issued access token; the next authenticated request
    /// gets a 401 and must renew
    pub fn invalidate_access_tokens(&self) {
        self.state.valid_access_tokens.lock().clear();
    }

    /// Make the refresh endpoint reject all refresh tokens, forcing the
    /// full-login fallback
    pub fn reject_refresh(&self, reject: bool) {
        *self.state.reject_refresh.lock() = reject;
    }

    /// The JSON body the last command POST to `path` carried
    pub fn command_body(&self, path: &str) -> Option<Value> {
        self.state.command_bodies.lock().get(path).cloned()
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for MockCloud {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

fn issue_tokens(state: &MockState) -> Value {
    let n = state.token_counter.fetch_add(1, Ordering::SeqCst);
    let access = format!("access-{n}");
    let refresh = format!("refresh-{n}");
    state.valid_access_tokens.lock().insert(access.clone());
    state.valid_refresh_tokens.lock().insert(refresh.clone());
    json!({
        "accessToken": access,
        "refreshToken": refresh,
        "expiresIn": state.expires_in.load(Ordering::SeqCst),
        "userId": "user-1",
    })
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

fn authorized(state: &MockState, headers: &HeaderMap) -> bool {
    bearer_token(headers)
        .map(|token| state.valid_access_tokens.lock().contains(token))
        .unwrap_or(false)
}

async fn handle_login(
    State(state): State<Arc<MockState>>,
    Json(body): Json<Value>,
) -> Response {
    state.login_count.fetch_add(1, Ordering::SeqCst);
    let username = body.get("username").and_then(Value::as_str);
    let password = body.get("password").and_then(Value::as_str);
    if username != Some(state.username.as_str()) || password != Some(state.password.as_str()) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "invalid credentials"})),
        )
            .into_response();
    }
    (StatusCode::OK, Json(issue_tokens(&state))).into_response()
}

async fn handle_refresh(
    State(state): State<Arc<MockState>>,
    Json(body): Json<Value>,
) -> Response {
    state.refresh_count.fetch_add(1, Ordering::SeqCst);
    let token = body.get("refreshToken").and_then(Value::as_str);
    let valid = token
        .map(|t| state.valid_refresh_tokens.lock().contains(t))
        .unwrap_or(false);
    if *state.reject_refresh.lock() || !valid {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "refresh token expired"})),
        )
            .into_response();
    }
    (StatusCode::OK, Json(issue_tokens(&state))).into_response()
}

async fn handle_spin_verify(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    *state
        .request_counts
        .lock()
        .entry("/v1/spin/verify".to_string())
        .or_insert(0) += 1;
    if !authorized(&state, &headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if body.get("spin").and_then(Value::as_str) != Some(state.spin.as_str()) {
        return (
            StatusCode::FORBIDDEN,
            Json(json!({"error": "wrong S-PIN"})),
        )
            .into_response();
    }
    let token = format!("sec-{}", state.token_counter.fetch_add(1, Ordering::SeqCst));
    *state.security_token.lock() = Some(token.clone());
    (StatusCode::CREATED, Json(json!({"securityToken": token}))).into_response()
}

async fn handle_api(
    State(state): State<Arc<MockState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Response {
    let path = uri.path().to_string();
    *state.request_counts.lock().entry(path.clone()).or_insert(0) += 1;

    if !authorized(&state, &headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let stub = state.stubs.lock().get(&path).cloned();

    match method {
        Method::GET => match stub {
            Some(StubbedResponse { status, body: Some(body) }) => {
                (status, Json(body)).into_response()
            }
            Some(StubbedResponse { status, body: None }) => status.into_response(),
            None => (
                StatusCode::NOT_FOUND,
                Json(json!({"error": "no such resource"})),
            )
                .into_response(),
        },
        Method::POST => {
            // Lock/unlock require the security token from S-PIN verification.
            if path.contains("/access/") {
                let expected = state.security_token.lock().clone();
                let supplied = headers.get("SecToken").and_then(|v| v.to_str().ok());
                if expected.is_none() || supplied != expected.as_deref() {
                    return (
                        StatusCode::FORBIDDEN,
                        Json(json!({"error": "security token missing or invalid"})),
                    )
                        .into_response();
                }
            }
            if !body.is_empty() {
                if let Ok(parsed) = serde_json::from_slice::<Value>(&body) {
                    state.command_bodies.lock().insert(path.clone(), parsed);
                }
            }
            match stub {
                Some(StubbedResponse { status, body: Some(body) }) => {
                    (status, Json(body)).into_response()
                }
                Some(StubbedResponse { status, body: None }) => status.into_response(),
                None => (
                    StatusCode::OK,
                    Json(json!({"requestId": "req-1", "status": "accepted"})),
                )
                    .into_response(),
            }
        }
        _ => StatusCode::METHOD_NOT_ALLOWED.into_response(),
    }
}

/// Wait for a condition with timeout
pub async fn wait_for<F, Fut>(condition: F, timeout: Duration) -> bool
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
