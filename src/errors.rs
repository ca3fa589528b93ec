use thiserror::Error;

#[derive(Debug, Error)]
pub enum SlackError {
    #[error("Malformed permalink token: {0}")]
    MalformedToken(String),

    #[error("Unrecognized Slack URL: {0}")]
    UnrecognizedUrl(String),

    #[error("{}", describe_recipient(.query, .matches))]
    AmbiguousOrUnknownRecipient { query: String, matches: Vec<String> },

    #[error("Invalid time expression: {0}")]
    InvalidTimeExpression(String),

    #[error("Invalid time range: since ({since}) is after until ({until})")]
    InvalidRange { since: String, until: String },

    #[error("Slack rate limit still in effect after {attempts} attempts")]
    RateLimitExceeded { attempts: u32 },

    #[error("Slack API unavailable after {attempts} attempts: {reason}")]
    TransientFailure { attempts: u32, reason: String },

    #[error("Authentication failed: {0}")]
    AuthenticationFailure(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Slack API error: {code}")]
    ApiError { code: String },

    #[error("Failed to parse Slack response: {0}")]
    ParseError(String),

    #[error("Failed to send HTTP request: {0}")]
    HttpError(String),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Cache failure: {0}")]
    CacheError(String),
}

fn describe_recipient(query: &str, matches: &[String]) -> String {
    if matches.is_empty() {
        format!("No user matches '{query}'")
    } else {
        format!("'{query}' matches several users: {}", matches.join(", "))
    }
}

/// Human-readable remediation for the error codes Slack returns in `ok: false` bodies.
#[must_use]
pub fn hint_for_code(code: &str) -> Option<&'static str> {
    let hint = match code {
        "invalid_auth" | "not_authed" => {
            "The token is invalid or missing. Check the token configured for this org."
        }
        "token_expired" | "token_revoked" => {
            "The token is no longer valid. Generate a new one and update the config."
        }
        "account_inactive" => "The account that owns this token has been deactivated.",
        "missing_scope" => "The token lacks a required OAuth scope for this call.",
        "not_in_channel" => "The token's user is not a member of this conversation.",
        "restricted_action" | "permission_denied" => {
            "Workspace settings prevent this action for the token's user."
        }
        "not_allowed_token_type" => "This call does not accept the configured token type.",
        "ekm_access_denied" => "Enterprise key management has revoked access to this content.",
        "channel_not_found" => {
            "The conversation does not exist or is not visible to this token. Try refreshing the conversation cache."
        }
        "user_not_found" | "users_not_found" => "No such user in this workspace.",
        "message_not_found" | "thread_not_found" => {
            "The message does not exist or was deleted."
        }
        "ratelimited" | "rate_limited" => "Slack is rate limiting this token. Wait and retry.",
        "request_timeout" | "service_unavailable" | "fatal_error" | "internal_error" => {
            "Slack had a server-side problem. Retrying later usually helps."
        }
        _ => return None,
    };
    Some(hint)
}

/// Map an `ok: false` error code to the matching terminal error.
#[must_use]
pub fn error_for_code(code: &str) -> SlackError {
    match code {
        "invalid_auth" | "not_authed" | "token_expired" | "token_revoked" | "account_inactive" => {
            SlackError::AuthenticationFailure(code.to_string())
        }
        "missing_scope"
        | "not_in_channel"
        | "restricted_action"
        | "not_allowed_token_type"
        | "ekm_access_denied"
        | "permission_denied" => SlackError::PermissionDenied(code.to_string()),
        "channel_not_found"
        | "user_not_found"
        | "users_not_found"
        | "message_not_found"
        | "thread_not_found" => SlackError::NotFound(code.to_string()),
        _ => SlackError::ApiError {
            code: code.to_string(),
        },
    }
}

impl SlackError {
    /// Remediation text for errors that carry a Slack error code.
    #[must_use]
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::AuthenticationFailure(code)
            | Self::PermissionDenied(code)
            | Self::NotFound(code) => hint_for_code(code),
            Self::ApiError { code } => hint_for_code(code),
            Self::RateLimitExceeded { .. } => hint_for_code("ratelimited"),
            Self::TransientFailure { .. } => hint_for_code("service_unavailable"),
            Self::InvalidTimeExpression(_) => Some(
                "Use today, yesterday, now, a relative offset like 30m, 12h, 7d or 2w, or an ISO date/datetime.",
            ),
            _ => None,
        }
    }

    /// Errors caused by what the user typed. These are never retried.
    #[must_use]
    pub fn is_user_input(&self) -> bool {
        matches!(
            self,
            Self::MalformedToken(_)
                | Self::UnrecognizedUrl(_)
                | Self::AmbiguousOrUnknownRecipient { .. }
                | Self::InvalidTimeExpression(_)
                | Self::InvalidRange { .. }
        )
    }

    /// Process exit code for the command layer.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            e if e.is_user_input() => 2,
            Self::ConfigError(_) => 2,
            Self::AuthenticationFailure(_) | Self::PermissionDenied(_) => 3,
            Self::NotFound(_) => 4,
            Self::RateLimitExceeded { .. } | Self::TransientFailure { .. } => 5,
            Self::Cancelled => 130,
            _ => 1,
        }
    }
}

impl From<reqwest::Error> for SlackError {
    fn from(error: reqwest::Error) -> Self {
        SlackError::HttpError(error.to_string())
    }
}

impl From<serde_json::Error> for SlackError {
    fn from(error: serde_json::Error) -> Self {
        SlackError::ParseError(error.to_string())
    }
}

impl From<std::io::Error> for SlackError {
    fn from(error: std::io::Error) -> Self {
        SlackError::CacheError(error.to_string())
    }
}

impl From<toml::de::Error> for SlackError {
    fn from(error: toml::de::Error) -> Self {
        SlackError::ConfigError(error.to_string())
    }
}
