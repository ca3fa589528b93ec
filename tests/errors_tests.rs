use std::error::Error;

use slackcli::errors::{SlackError, error_for_code, hint_for_code};

#[test]
fn test_slack_error_implements_error_trait() {
    fn assert_error<T: Error + Send + Sync + 'static>(_: &T) {}

    let error = SlackError::ParseError("test error".to_string());
    assert_error(&error);
}

#[test]
fn test_slack_error_display() {
    let error = SlackError::ApiError {
        code: "invalid_cursor".to_string(),
    };
    assert_eq!(format!("{error}"), "Slack API error: invalid_cursor");

    let error = SlackError::RateLimitExceeded { attempts: 5 };
    assert_eq!(
        format!("{error}"),
        "Slack rate limit still in effect after 5 attempts"
    );

    let error = SlackError::HttpError("Connection error".to_string());
    assert_eq!(
        format!("{error}"),
        "Failed to send HTTP request: Connection error"
    );

    let error = SlackError::AmbiguousOrUnknownRecipient {
        query: "@sam".to_string(),
        matches: vec!["@sam.one (U5)".to_string(), "@sam.two (U6)".to_string()],
    };
    assert_eq!(
        format!("{error}"),
        "'@sam' matches several users: @sam.one (U5), @sam.two (U6)"
    );
}

#[test]
fn test_slack_error_from_conversions() {
    let err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
    assert!(matches!(SlackError::from(err), SlackError::ParseError(_)));

    let err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only");
    assert!(matches!(SlackError::from(err), SlackError::CacheError(_)));

    let err = toml::from_str::<toml::Value>("= broken").unwrap_err();
    assert!(matches!(SlackError::from(err), SlackError::ConfigError(_)));

    // Only checks that the conversion exists.
    #[allow(unused)]
    #[allow(clippy::items_after_statements)]
    fn _check_reqwest_conversion(err: reqwest::Error) -> SlackError {
        SlackError::from(err)
    }
}

#[test]
fn test_error_codes_map_to_categories() {
    assert!(matches!(
        error_for_code("invalid_auth"),
        SlackError::AuthenticationFailure(_)
    ));
    assert!(matches!(
        error_for_code("not_in_channel"),
        SlackError::PermissionDenied(_)
    ));
    assert!(matches!(
        error_for_code("thread_not_found"),
        SlackError::NotFound(_)
    ));
    assert!(matches!(
        error_for_code("something_new"),
        SlackError::ApiError { .. }
    ));
}

#[test]
fn test_exit_codes() {
    assert_eq!(SlackError::InvalidTimeExpression("soon".into()).exit_code(), 2);
    assert_eq!(SlackError::MalformedToken("p12".into()).exit_code(), 2);
    assert_eq!(SlackError::ConfigError("no token".into()).exit_code(), 2);
    assert_eq!(SlackError::PermissionDenied("missing_scope".into()).exit_code(), 3);
    assert_eq!(SlackError::NotFound("channel_not_found".into()).exit_code(), 4);
    assert_eq!(
        SlackError::TransientFailure {
            attempts: 3,
            reason: "HTTP 503".into()
        }
        .exit_code(),
        5
    );
    assert_eq!(SlackError::Cancelled.exit_code(), 130);
    assert_eq!(SlackError::CacheError("disk full".into()).exit_code(), 1);
}

#[test]
fn test_hints() {
    assert!(hint_for_code("missing_scope").is_some());
    assert!(hint_for_code("definitely_not_a_code").is_none());
    assert!(SlackError::RateLimitExceeded { attempts: 5 }.hint().is_some());
    assert!(
        SlackError::InvalidTimeExpression("soon".into())
            .hint()
            .is_some_and(|h| h.contains("7d"))
    );
    assert!(SlackError::Cancelled.hint().is_none());
    assert!(!SlackError::NotFound("channel_not_found".into()).is_user_input());
}
