//! Slack Web API client
//!
//! Sends one form-encoded POST per attempt with the bearer token. Retry policy lives
//! in [`crate::slack::transport`]; this type only reports what the wire said.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use slack_morphism::{SlackApiToken, SlackApiTokenValue};

use crate::core::config::DEFAULT_API_BASE_URL;
use crate::errors::SlackError;
use crate::slack::api::{ApiRequest, RawResponse, SendFailure, SlackApi};

/// Header carrying the zero-based attempt number, so retries are visible server side.
pub const ATTEMPT_HEADER: &str = "x-slackcli-retry-attempt";

/// Slack API client
pub struct SlackClient {
    http: Client,
    token: SlackApiToken,
    base_url: String,
}

impl std::fmt::Debug for SlackClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlackClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl SlackClient {
    /// # Errors
    ///
    /// Returns `HttpError` if the HTTP client cannot be built.
    pub fn new(token: String, base_url: Option<&str>, timeout: Duration) -> Result<Self, SlackError> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("slackcli/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            token: SlackApiToken::new(SlackApiTokenValue::new(token)),
            base_url: base_url
                .unwrap_or(DEFAULT_API_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/{method}", self.base_url)
    }

    fn parse_retry_after(resp: &reqwest::Response) -> Option<Duration> {
        resp.headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
    }
}

#[async_trait]
impl SlackApi for SlackClient {
    async fn send(&self, request: &ApiRequest, attempt: u32) -> Result<RawResponse, SendFailure> {
        let resp = self
            .http
            .post(self.method_url(&request.method))
            .bearer_auth(&self.token.token_value.0)
            .header(ATTEMPT_HEADER, attempt.to_string())
            .form(&request.params)
            .send()
            .await?;

        let status = resp.status().as_u16();
        let retry_after = Self::parse_retry_after(&resp);
        let bytes = resp.bytes().await?;
        let body = serde_json::from_slice(&bytes).ok();

        Ok(RawResponse {
            status,
            retry_after,
            body,
        })
    }
}
