//! Session handling and fetch client for the central reporting API.
//!
//! The central API issues short-lived tokens from a vendor-specific login
//! endpoint, attaches them via an `auth-token` header, signals expiry with
//! a human-readable message in the response body (not a status code), and
//! has shipped several different envelope shapes around its record arrays.
//! This crate wraps all of that behind [`SessionManager`] and
//! [`RemoteFetcher`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};
use wholphin_core::{normalize_record, Dataset, RemoteRecord};

pub const CRATE_NAME: &str = "wholphin-remote";

/// Literal body message the vendor sends when a token has gone stale.
/// There is no status code to match on; callers must parse the body.
pub const SESSION_EXPIRED_MESSAGE: &str = "Your session expired, please relogin!";

/// Header carrying the session token on every data fetch.
pub const AUTH_TOKEN_HEADER: &str = "auth-token";

// Deliberately under the vendor's true session lifetime so we re-login
// before the remote side starts rejecting us.
const TOKEN_TTL: Duration = Duration::from_secs(55 * 60);

pub fn build_http_client(timeout: Duration) -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .context("building reqwest client")
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("login request to central API failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("central API login returned http {status}")]
    HttpStatus { status: u16 },
    #[error("login response did not contain a token")]
    MissingToken,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("authentication failed while fetching {dataset}")]
    Auth {
        dataset: Dataset,
        #[source]
        source: AuthError,
    },
    #[error("request for {dataset} failed: {source}")]
    Request {
        dataset: Dataset,
        #[source]
        source: reqwest::Error,
    },
    #[error("http {status} while fetching {dataset}")]
    HttpStatus { dataset: Dataset, status: u16 },
    #[error("session expired again after one relogin while fetching {dataset}")]
    SessionRetryExhausted { dataset: Dataset },
    #[error("response body for {dataset} was neither a json object nor an array")]
    InvalidShape { dataset: Dataset },
}

#[derive(Debug, Clone)]
struct SessionState {
    token: String,
    expires_at: Instant,
}

/// Owner of the one shared token+expiry pair.
///
/// All access goes through an async mutex, so a login in flight blocks any
/// other caller from deciding the token is stale and racing a second
/// refresh — the single-flight property the fetch sequencing relies on.
pub struct SessionManager {
    client: reqwest::Client,
    login_url: String,
    username: String,
    password: String,
    state: Mutex<Option<SessionState>>,
}

impl SessionManager {
    pub fn new(
        client: reqwest::Client,
        login_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            client,
            login_url: login_url.into(),
            username: username.into(),
            password: password.into(),
            state: Mutex::new(None),
        }
    }

    /// Current token if present and younger than [`TOKEN_TTL`]; otherwise
    /// logs in and returns the fresh one.
    pub async fn valid_token(&self) -> Result<String, AuthError> {
        let mut state = self.state.lock().await;
        if let Some(session) = state.as_ref() {
            if Instant::now() < session.expires_at {
                return Ok(session.token.clone());
            }
        }
        self.login_locked(&mut state).await
    }

    /// Discard whatever token is held and log in again. Used when the
    /// remote side rejects a token we still considered fresh.
    pub async fn force_refresh(&self) -> Result<String, AuthError> {
        let mut state = self.state.lock().await;
        self.login_locked(&mut state).await
    }

    /// Adopt a token the API rotated onto a data response.
    pub async fn adopt_token(&self, token: String) {
        let mut state = self.state.lock().await;
        *state = Some(SessionState {
            token,
            expires_at: Instant::now() + TOKEN_TTL,
        });
    }

    pub async fn current_token(&self) -> Option<String> {
        self.state.lock().await.as_ref().map(|s| s.token.clone())
    }

    async fn login_locked(&self, state: &mut Option<SessionState>) -> Result<String, AuthError> {
        // Clear first: a failed login must never leave a stale token behind.
        *state = None;
        info!("logging in to central API");

        let response = self
            .client
            .post(&self.login_url)
            .json(&json!({
                "st": "login",
                "data": { "username": self.username, "password": self.password },
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::HttpStatus {
                status: status.as_u16(),
            });
        }

        let body: Value = response.json().await?;
        let token = body
            .get("t")
            .and_then(Value::as_str)
            .ok_or(AuthError::MissingToken)?
            .to_string();

        *state = Some(SessionState {
            token: token.clone(),
            expires_at: Instant::now() + TOKEN_TTL,
        });
        Ok(token)
    }
}

/// One strategy for locating the record array inside a response body.
/// Tried in order; the first hit that is actually an array wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapeMatcher {
    BareArray,
    WrappedField(&'static str),
}

/// Priority order observed across the vendor's integration attempts:
/// the historical `{s, d}` envelope first, then the generic wrappers.
pub const DEFAULT_SHAPE_MATCHERS: &[ShapeMatcher] = &[
    ShapeMatcher::BareArray,
    ShapeMatcher::WrappedField("d"),
    ShapeMatcher::WrappedField("data"),
    ShapeMatcher::WrappedField("result"),
    ShapeMatcher::WrappedField("items"),
    ShapeMatcher::WrappedField("records"),
];

impl ShapeMatcher {
    fn locate<'a>(&self, body: &'a Value) -> Option<&'a Vec<Value>> {
        match self {
            ShapeMatcher::BareArray => body.as_array(),
            ShapeMatcher::WrappedField(name) => body.get(*name).and_then(Value::as_array),
        }
    }
}

/// Locate the record array and normalize each element's field names.
/// `None` means no matcher found an array anywhere in the body.
pub fn extract_records(body: &Value, matchers: &[ShapeMatcher]) -> Option<Vec<RemoteRecord>> {
    let array = matchers.iter().find_map(|m| m.locate(body))?;
    let mut records = Vec::with_capacity(array.len());
    let mut skipped = 0usize;
    for element in array {
        match element.as_object() {
            Some(object) => records.push(normalize_record(object)),
            None => skipped += 1,
        }
    }
    if skipped > 0 {
        warn!(skipped, "ignored non-object elements in record array");
    }
    Some(records)
}

pub fn is_session_expired(body: &Value) -> bool {
    body.get("m").and_then(Value::as_str) == Some(SESSION_EXPIRED_MESSAGE)
}

/// Fetches one named dataset: token, GET, expiry-retry-once, normalize.
pub struct RemoteFetcher {
    client: reqwest::Client,
    session: Arc<SessionManager>,
    matchers: Vec<ShapeMatcher>,
}

impl RemoteFetcher {
    pub fn new(client: reqwest::Client, session: Arc<SessionManager>) -> Self {
        Self {
            client,
            session,
            matchers: DEFAULT_SHAPE_MATCHERS.to_vec(),
        }
    }

    pub fn with_matchers(mut self, matchers: Vec<ShapeMatcher>) -> Self {
        self.matchers = matchers;
        self
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    pub async fn fetch_dataset(
        &self,
        dataset: Dataset,
        url: &str,
    ) -> Result<Vec<RemoteRecord>, FetchError> {
        let token = self
            .session
            .valid_token()
            .await
            .map_err(|source| FetchError::Auth { dataset, source })?;

        let mut body = self.issue(dataset, url, &token).await?;

        if is_session_expired(&body) {
            info!(%dataset, "token rejected by central API, refreshing session and retrying once");
            let token = self
                .session
                .force_refresh()
                .await
                .map_err(|source| FetchError::Auth { dataset, source })?;
            body = self.issue(dataset, url, &token).await?;
            if is_session_expired(&body) {
                return Err(FetchError::SessionRetryExhausted { dataset });
            }
        }

        // The API may rotate tokens on any call, not only login.
        if let Some(rotated) = body.get("t").and_then(Value::as_str) {
            self.session.adopt_token(rotated.to_string()).await;
        }

        match extract_records(&body, &self.matchers) {
            Some(records) => {
                info!(%dataset, rows = records.len(), "fetched dataset");
                Ok(records)
            }
            None if body.is_object() => {
                warn!(%dataset, "no record array found in response, treating as empty");
                Ok(Vec::new())
            }
            None => Err(FetchError::InvalidShape { dataset }),
        }
    }

    async fn issue(&self, dataset: Dataset, url: &str, token: &str) -> Result<Value, FetchError> {
        let response = self
            .client
            .get(url)
            .header(AUTH_TOKEN_HEADER, token)
            .send()
            .await
            .map_err(|source| FetchError::Request { dataset, source })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                dataset,
                status: status.as_u16(),
            });
        }

        response
            .json()
            .await
            .map_err(|source| FetchError::Request { dataset, source })
    }
}
