//! `HttpClient`: one upstream call with rate gate, authentication, and
//! response classification.
//!
//! The request pattern is attach headers, send, classify the status, log a
//! body summary on failure, extended with the rate-gate and lock-out
//! handling this upstream's API requires.

mod lockout;

pub use lockout::parse_lockout_release;

use chrono::Utc;
use duesync_auth::{AuthError, TokenAuthority};
use duesync_ratelimit::RateGate;
use serde_json::Value;
use tracing::{debug, warn};

/// The literal error code the upstream embeds in lock-out response bodies.
pub const LOCKOUT_MARKER: &str = "PUCX-ER1001";

pub type ClientResult<T> = Result<T, ClientError>;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The upstream returned the `PUCX-ER1001` lock-out marker; the release
    /// instant has already been recorded with the shared `RateGate`.
    #[error("upstream rate-locked the client")]
    RateLocked,
    /// 4xx other than the lock-out marker or auth rejection; not retried.
    #[error("permanent failure: HTTP {status}: {body}")]
    Permanent { status: u16, body: String },
    /// 5xx, timeout, or connection error; caller may retry.
    #[error("transient failure: {0}")]
    Transient(String),
    #[error("authentication error: {0}")]
    Auth(#[from] AuthError),
    #[error("response body was not valid JSON: {0}")]
    Decode(String),
}

/// Wraps one upstream REST call with the gate/auth/classification pipeline.
#[derive(Clone)]
pub struct HttpClient {
    http: reqwest::Client,
    rate_gate: RateGate,
    token_authority: TokenAuthority,
    timezone: chrono_tz::Tz,
}

impl HttpClient {
    pub fn new(
        http: reqwest::Client,
        rate_gate: RateGate,
        token_authority: TokenAuthority,
        timezone: chrono_tz::Tz,
    ) -> Self {
        Self {
            http,
            rate_gate,
            token_authority,
            timezone,
        }
    }

    /// Executes one request: admits through the gate, attaches the bearer
    /// token, sends, and classifies the outcome. Retries exactly once on a
    /// token-rejection response; never retries automatically on a
    /// `RateLocked` classification.
    pub async fn do_request(
        &self,
        method: reqwest::Method,
        url: &str,
        body: Option<Value>,
    ) -> ClientResult<Value> {
        self.rate_gate.admit_uncancellable().await;
        match self.send_once(method.clone(), url, body.clone()).await {
            Err(SendOutcome::AuthRejected) => {
                self.token_authority.invalidate().await;
                self.rate_gate.admit_uncancellable().await;
                self.finish(self.send_once(method, url, body).await)
            }
            other => self.finish(other),
        }
    }

    fn finish(&self, outcome: Result<Value, SendOutcome>) -> ClientResult<Value> {
        match outcome {
            Ok(value) => Ok(value),
            Err(SendOutcome::AuthRejected) => Err(ClientError::Permanent {
                status: 401,
                body: "token rejected twice".into(),
            }),
            Err(SendOutcome::RateLocked) => Err(ClientError::RateLocked),
            Err(SendOutcome::Permanent { status, body }) => {
                Err(ClientError::Permanent { status, body })
            }
            Err(SendOutcome::Transient(msg)) => Err(ClientError::Transient(msg)),
            Err(SendOutcome::Auth(e)) => Err(ClientError::Auth(e)),
            Err(SendOutcome::Decode(msg)) => Err(ClientError::Decode(msg)),
        }
    }

    async fn send_once(
        &self,
        method: reqwest::Method,
        url: &str,
        body: Option<Value>,
    ) -> Result<Value, SendOutcome> {
        let auth = self.token_authority.auth_headers().await.map_err(SendOutcome::Auth)?;

        let mut request = self
            .http
            .request(method, url)
            .header(auth.header_name, auth.header_value)
            .timeout(std::time::Duration::from_secs(300));
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() || e.is_connect() {
                SendOutcome::Transient(e.to_string())
            } else {
                SendOutcome::Transient(e.to_string())
            }
        })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| SendOutcome::Transient(e.to_string()))?;

        if text.contains(LOCKOUT_MARKER) {
            let release = parse_lockout_release(&text, self.timezone, Utc::now());
            self.rate_gate.note_lockout(release);
            warn!(release = %release, "upstream reported a rate lock-out");
            return Err(SendOutcome::RateLocked);
        }

        if status.as_u16() == 401 || status.as_u16() == 403 {
            debug!(status = %status, "treating response as a token rejection");
            return Err(SendOutcome::AuthRejected);
        }

        if status.is_client_error() {
            return Err(SendOutcome::Permanent {
                status: status.as_u16(),
                body: text,
            });
        }

        if status.is_server_error() {
            return Err(SendOutcome::Transient(format!("HTTP {status}")));
        }

        if text.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| SendOutcome::Decode(e.to_string()))
    }
}

enum SendOutcome {
    AuthRejected,
    RateLocked,
    Permanent { status: u16, body: String },
    Transient(String),
    Auth(AuthError),
    Decode(String),
}
