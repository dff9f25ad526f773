//! Resilient HTTP transport.
//!
//! Every attempt passes through the provider's [`RateLimiter`] before it is
//! issued. Responses are classified as follows:
//!
//! | Outcome | Kind | Retried |
//! |---------|------|---------|
//! | no HTTP status (connect, timeout, I/O) | [`TransportErrorKind::Network`] | yes, `2^attempt` s |
//! | 401 / 403 | [`TransportErrorKind::Auth`] | no |
//! | 429 | [`TransportErrorKind::RateLimit`] | yes, `Retry-After` or fallback |
//! | >= 500 | [`TransportErrorKind::Server`] | yes, `2^attempt` s |
//! | other 4xx | [`TransportErrorKind::Client`] | no |
//! | 2xx/3xx JSON that fails to parse | [`TransportErrorKind::Decode`] | no |

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::http_client::{HttpClient, HttpRequest, HttpResponse};
use crate::retry::RetryPolicy;
use crate::throttling::RateLimiter;
use crate::ProviderId;

const BODY_SNIPPET_CHARS: usize = 200;

/// Failure classes surfaced by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    Network,
    RateLimit,
    Server,
    Client,
    Auth,
    Decode,
}

impl TransportErrorKind {
    /// Whether the transport retries this class before surfacing it.
    pub const fn is_transient(self) -> bool {
        matches!(self, Self::Network | Self::RateLimit | Self::Server)
    }
}

/// Structured transport error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError {
    kind: TransportErrorKind,
    message: String,
    status: Option<u16>,
}

impl TransportError {
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Network, message, None)
    }

    pub fn rate_limited(status: u16, message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::RateLimit, message, Some(status))
    }

    pub fn server(status: u16, message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Server, message, Some(status))
    }

    pub fn client(status: u16, message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Client, message, Some(status))
    }

    pub fn auth(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Auth, message, status)
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Decode, message, None)
    }

    fn new(kind: TransportErrorKind, message: impl Into<String>, status: Option<u16>) -> Self {
        Self {
            kind,
            message: message.into(),
            status,
        }
    }

    pub const fn kind(&self) -> TransportErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn status(&self) -> Option<u16> {
        self.status
    }

    pub const fn retryable(&self) -> bool {
        self.kind.is_transient()
    }

    pub const fn code(&self) -> &'static str {
        match self.kind {
            TransportErrorKind::Network => "transport.network",
            TransportErrorKind::RateLimit => "transport.rate_limit",
            TransportErrorKind::Server => "transport.server",
            TransportErrorKind::Client => "transport.client",
            TransportErrorKind::Auth => "transport.auth",
            TransportErrorKind::Decode => "transport.decode",
        }
    }
}

impl Display for TransportError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code())
    }
}

impl std::error::Error for TransportError {}

/// Successful response body.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponsePayload {
    Json(Value),
    Text(String),
}

impl ResponsePayload {
    /// JSON body, or a decode error for a non-JSON response.
    pub fn into_json(self) -> Result<Value, TransportError> {
        match self {
            Self::Json(value) => Ok(value),
            Self::Text(text) => Err(TransportError::decode(format!(
                "expected a JSON response, got text: {}",
                snippet(&text)
            ))),
        }
    }
}

/// Classified successful response.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub payload: ResponsePayload,
}

impl TransportResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// HTTP transport with rate limiting, classification and bounded retries.
#[derive(Clone)]
pub struct ResilientTransport {
    provider: ProviderId,
    http: Arc<dyn HttpClient>,
    limiter: RateLimiter,
    retry: RetryPolicy,
}

impl ResilientTransport {
    pub fn new(
        provider: ProviderId,
        http: Arc<dyn HttpClient>,
        limiter: RateLimiter,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            provider,
            http,
            limiter,
            retry,
        }
    }

    pub const fn provider(&self) -> ProviderId {
        self.provider
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Issues `request`, retrying transient failures within the policy bound.
    pub async fn request(&self, request: HttpRequest) -> Result<ResponsePayload, TransportError> {
        self.send(request).await.map(|response| response.payload)
    }

    /// Like [`request`](Self::request) but keeps the status and headers of the final response.
    pub async fn send(&self, request: HttpRequest) -> Result<TransportResponse, TransportError> {
        let mut attempt: u32 = 0;

        loop {
            self.limiter.wait_if_needed().await;
            debug!(
                provider = %self.provider,
                method = request.method.as_str(),
                url = %request.url,
                attempt,
                "issuing request"
            );

            let failure = match self.http.execute(request.clone()).await {
                Ok(response) => match classify(response) {
                    Ok(classified) => return Ok(classified),
                    Err(failure) => failure,
                },
                Err(error) => Failure::Retry {
                    error: TransportError::network(format!("network error: {}", error.message())),
                    retry_after: None,
                },
            };

            match failure {
                Failure::Fatal(error) => return Err(error),
                Failure::Retry { error, retry_after } => {
                    if attempt >= self.retry.max_retries {
                        warn!(
                            provider = %self.provider,
                            code = error.code(),
                            attempts = attempt + 1,
                            "retries exhausted"
                        );
                        return Err(error);
                    }
                    attempt += 1;
                    let delay = match error.kind() {
                        TransportErrorKind::RateLimit => {
                            self.retry.rate_limit_wait(retry_after.as_deref())
                        }
                        _ => self.retry.delay_for_attempt(attempt),
                    };
                    warn!(
                        provider = %self.provider,
                        code = error.code(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Issues `request` and requires a JSON body.
    pub async fn request_json(&self, request: HttpRequest) -> Result<Value, TransportError> {
        self.request(request).await?.into_json()
    }
}

enum Failure {
    Retry {
        error: TransportError,
        retry_after: Option<String>,
    },
    Fatal(TransportError),
}

fn classify(response: HttpResponse) -> Result<TransportResponse, Failure> {
    let status = response.status;
    match status {
        401 | 403 => Err(Failure::Fatal(TransportError::auth(
            Some(status),
            format!("auth error {status}: {}", snippet(&response.body)),
        ))),
        429 => Err(Failure::Retry {
            retry_after: response.header("retry-after").map(str::to_owned),
            error: TransportError::rate_limited(
                status,
                format!("rate limit hit (429): {}", snippet(&response.body)),
            ),
        }),
        500.. => Err(Failure::Retry {
            error: TransportError::server(
                status,
                format!("server error {status}: {}", snippet(&response.body)),
            ),
            retry_after: None,
        }),
        400..=499 => Err(Failure::Fatal(TransportError::client(
            status,
            format!("client error {status}: {}", snippet(&response.body)),
        ))),
        _ => decode_success(response).map_err(Failure::Fatal),
    }
}

fn decode_success(response: HttpResponse) -> Result<TransportResponse, TransportError> {
    let is_json = response
        .header("content-type")
        .map(|value| {
            let value = value.to_ascii_lowercase();
            value.contains("application/json") || value.contains("+json")
        })
        .unwrap_or(false);

    let payload = if is_json {
        serde_json::from_str(&response.body)
            .map(ResponsePayload::Json)
            .map_err(|error| {
                TransportError::decode(format!("failed to decode JSON response: {error}"))
            })?
    } else {
        ResponsePayload::Text(response.body)
    };

    Ok(TransportResponse {
        status: response.status,
        headers: response.headers,
        payload,
    })
}

fn snippet(body: &str) -> String {
    body.chars().take(BODY_SNIPPET_CHARS).collect()
}
