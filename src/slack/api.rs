//! The seam between the engine and the wire.
//!
//! [`SlackApi`] sends exactly one HTTP attempt and reports what happened. Everything
//! above it (retry, pagination, caching) talks in [`ApiRequest`] and JSON bodies.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

/// One Web API method call, form-encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiRequest {
    pub method: String,
    pub params: Vec<(String, String)>,
    /// Reads are idempotent. Writes are only retried when Slack certainly did not act.
    pub idempotent: bool,
}

impl ApiRequest {
    #[must_use]
    pub fn read(method: &str) -> Self {
        Self {
            method: method.to_string(),
            params: Vec::new(),
            idempotent: true,
        }
    }

    #[must_use]
    pub fn write(method: &str) -> Self {
        Self {
            idempotent: false,
            ..Self::read(method)
        }
    }

    #[must_use]
    pub fn param(mut self, key: &str, value: impl ToString) -> Self {
        self.set(key, value);
        self
    }

    #[must_use]
    pub fn param_opt(self, key: &str, value: Option<impl ToString>) -> Self {
        match value {
            Some(v) => self.param(key, v),
            None => self,
        }
    }

    /// Insert or replace a parameter.
    pub fn set(&mut self, key: &str, value: impl ToString) {
        let value = value.to_string();
        match self.params.iter_mut().find(|(k, _)| k == key) {
            Some(slot) => slot.1 = value,
            None => self.params.push((key.to_string(), value)),
        }
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// What came back from one attempt that reached the server.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub retry_after: Option<Duration>,
    /// `None` when the body was not JSON.
    pub body: Option<Value>,
}

impl RawResponse {
    #[must_use]
    pub fn ok(body: Value) -> Self {
        Self {
            status: 200,
            retry_after: None,
            body: Some(body),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendFailureKind {
    /// The request never reached Slack.
    Connect,
    /// Sent, but no answer in time. Slack may have acted on it.
    Timeout,
    /// The connection was reset or closed before a full response arrived.
    Dropped,
    Other,
}

/// An attempt that produced no HTTP response.
#[derive(Debug, Clone)]
pub struct SendFailure {
    pub kind: SendFailureKind,
    pub message: String,
}

impl SendFailure {
    #[must_use]
    pub fn new(kind: SendFailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for SendFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl From<reqwest::Error> for SendFailure {
    fn from(error: reqwest::Error) -> Self {
        let kind = if error.is_connect() {
            SendFailureKind::Connect
        } else if error.is_timeout() {
            SendFailureKind::Timeout
        } else if error.is_request() || error.is_body() || error.is_decode() {
            SendFailureKind::Dropped
        } else {
            SendFailureKind::Other
        };
        Self::new(kind, error.to_string())
    }
}

/// One HTTP attempt against the Slack Web API.
///
/// `attempt` is zero-based and lets an implementation tag retries on the wire.
#[async_trait]
pub trait SlackApi: Send + Sync {
    async fn send(&self, request: &ApiRequest, attempt: u32) -> Result<RawResponse, SendFailure>;
}
