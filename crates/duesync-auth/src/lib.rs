//! `TokenAuthority`: the bearer-credential holder for the upstream API.
//!
//! A plain `reqwest::Client` wrapper with structured `tracing` on every
//! failure path and an explicit success/failure result type rather than
//! panicking: a client-credentials bearer exchange with single-flighted
//! refresh.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration as StdDuration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

pub type AuthResult<T> = Result<T, AuthError>;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Refresh was denied for a non-retryable reason (bad credentials).
    #[error("authentication refresh denied: {0}")]
    Denied(String),
    /// Refresh failed for a reason that might clear up (network, 5xx).
    #[error("authentication refresh failed transiently: {0}")]
    Transient(String),
    #[error("http error talking to the token endpoint: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, Deserialize)]
struct TokenExchangeResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Debug, Clone)]
struct TokenState {
    access_token: String,
    acquired_at: DateTime<Utc>,
    valid_for: chrono::Duration,
}

impl TokenState {
    fn expires_at(&self) -> DateTime<Utc> {
        self.acquired_at + self.valid_for
    }
}

/// A single bearer-authenticated header pair (`Authorization: Bearer ...`).
#[derive(Debug, Clone)]
pub struct AuthHeaders {
    pub header_name: &'static str,
    pub header_value: String,
}

/// Process-wide holder of the upstream bearer credential.
///
/// Cheap to clone; clones share the same cached token and single-flight
/// refresh lock; this is meant to be a constructed value passed
/// explicitly to the components that need it, rather than ambient global
/// state.
#[derive(Clone)]
pub struct TokenAuthority {
    inner: Arc<Inner>,
}

struct Inner {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    default_validity: chrono::Duration,
    safety_margin: chrono::Duration,
    min_refresh_interval: StdDuration,
    state: RwLock<Option<TokenState>>,
    refresh_lock: Mutex<Option<Instant>>,
}

impl TokenAuthority {
    pub fn new(
        http: reqwest::Client,
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        default_validity: StdDuration,
        safety_margin: StdDuration,
        min_refresh_interval: StdDuration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                http,
                token_url: token_url.into(),
                client_id: client_id.into(),
                client_secret: client_secret.into(),
                default_validity: chrono::Duration::from_std(default_validity)
                    .unwrap_or(chrono::Duration::minutes(60)),
                safety_margin: chrono::Duration::from_std(safety_margin)
                    .unwrap_or(chrono::Duration::minutes(5)),
                min_refresh_interval,
                state: RwLock::new(None),
                refresh_lock: Mutex::new(None),
            }),
        }
    }

    /// Returns headers for the next outbound request, refreshing the
    /// credential if absent, expired, or within the safety margin of expiry.
    pub async fn auth_headers(&self) -> AuthResult<AuthHeaders> {
        if let Some(token) = self.valid_cached_token().await {
            return Ok(Self::headers_for(&token));
        }
        let token = self.refresh().await?;
        Ok(Self::headers_for(&token))
    }

    /// Forces a refresh on the next `auth_headers()` call. Called when a
    /// response indicates token rejection.
    pub async fn invalidate(&self) {
        let mut state = self.inner.state.write().await;
        *state = None;
        debug!("token authority invalidated");
    }

    fn headers_for(token: &str) -> AuthHeaders {
        AuthHeaders {
            header_name: "Authorization",
            header_value: format!("Bearer {token}"),
        }
    }

    async fn valid_cached_token(&self) -> Option<String> {
        let state = self.inner.state.read().await;
        let state = state.as_ref()?;
        if Utc::now() + self.inner.safety_margin < state.expires_at() {
            Some(state.access_token.clone())
        } else {
            None
        }
    }

    /// Performs (or waits out) a single-flighted refresh and returns the new
    /// token. Concurrent callers collapse onto one network exchange.
    async fn refresh(&self) -> AuthResult<String> {
        let mut last_attempt = self.inner.refresh_lock.lock().await;

        // Double-checked: another caller may have refreshed while we waited
        // for the lock.
        if let Some(token) = self.valid_cached_token().await {
            return Ok(token);
        }

        if let Some(last) = *last_attempt {
            let elapsed = last.elapsed();
            if elapsed < self.inner.min_refresh_interval {
                let remaining = self.inner.min_refresh_interval - elapsed;
                debug!(?remaining, "throttling token refresh to minimum interval");
                tokio::time::sleep(remaining).await;
            }
        }

        let token = self.exchange_with_retry().await?;
        *last_attempt = Some(Instant::now());

        let mut state = self.inner.state.write().await;
        *state = Some(token.clone());
        info!(expires_at = %token.expires_at(), "token authority refreshed bearer credential");
        Ok(token.access_token)
    }

    /// Transient failures are retried with a small bounded backoff within a
    /// single refresh call; non-retryable failures fail fast.
    async fn exchange_with_retry(&self) -> AuthResult<TokenState> {
        const MAX_ATTEMPTS: u32 = 3;
        let mut last_err = None;
        for attempt in 0..MAX_ATTEMPTS {
            match self.exchange_once().await {
                Ok(token) => return Ok(token),
                Err(AuthError::Denied(msg)) => return Err(AuthError::Denied(msg)),
                Err(err) => {
                    warn!(attempt, error = %err, "token exchange attempt failed, retrying");
                    last_err = Some(err);
                    if attempt + 1 < MAX_ATTEMPTS {
                        tokio::time::sleep(StdDuration::from_millis(200 * 2u64.pow(attempt))).await;
                    }
                }
            }
        }
        Err(last_err.unwrap_or(AuthError::Transient("exhausted retries".into())))
    }

    async fn exchange_once(&self) -> AuthResult<TokenState> {
        let response = self
            .inner
            .http
            .post(&self.inner.token_url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.inner.client_id.as_str()),
                ("client_secret", self.inner.client_secret.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 400 || status.as_u16() == 401 || status.as_u16() == 403 {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Denied(format!("{status}: {body}")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Transient(format!("{status}: {body}")));
        }

        let parsed: TokenExchangeResponse = response.json().await?;
        let valid_for = parsed
            .expires_in
            .map(chrono::Duration::seconds)
            .unwrap_or(self.inner.default_validity);

        Ok(TokenState {
            access_token: parsed.access_token,
            acquired_at: Utc::now(),
            valid_for,
        })
    }
}
