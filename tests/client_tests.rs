use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use httpmock::prelude::*;
use serde_json::json;
use slackcli::errors::SlackError;
use slackcli::slack::client::ATTEMPT_HEADER;
use slackcli::slack::{ApiRequest, RetryPolicy, SlackClient, Transport};
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(10),
        max_transient_attempts: 2,
        transient_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(50),
        jitter: false,
    }
}

fn transport_for(base_url: &str) -> Transport {
    let client = SlackClient::new("xoxp-test".into(), Some(base_url), Duration::from_secs(5)).unwrap();
    Transport::new(Arc::new(client), fast_policy(), CancellationToken::new())
}

#[tokio::test]
async fn test_rate_limited_attempt_is_retried_on_the_wire() {
    let server = MockServer::start();
    let first = server.mock(|when, then| {
        when.method(POST)
            .path("/conversations.history")
            .header(ATTEMPT_HEADER, "0");
        then.status(429).header("retry-after", "0").body("rate limited");
    });
    let second = server.mock(|when, then| {
        when.method(POST)
            .path("/conversations.history")
            .header(ATTEMPT_HEADER, "1")
            .header("authorization", "Bearer xoxp-test");
        then.status(200).json_body(json!({
            "ok": true,
            "messages": [{"ts": "1769432401.438239", "text": "hi"}],
            "has_more": false
        }));
    });

    let body = transport_for(&server.base_url())
        .call(&ApiRequest::read("conversations.history").param("channel", "C100"))
        .await
        .unwrap();

    assert_eq!(body["messages"][0]["text"], "hi");
    assert_eq!(first.calls(), 1);
    assert_eq!(second.calls(), 1);
}

#[tokio::test]
async fn test_http_status_classification() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/auth.test");
        then.status(401).body("unauthorized");
    });
    let broken = server.mock(|when, then| {
        when.method(POST).path("/users.list");
        then.status(200).body("<html>maintenance</html>");
    });
    let transport = transport_for(&server.base_url());

    let err = transport.call(&ApiRequest::read("auth.test")).await.unwrap_err();
    assert!(matches!(err, SlackError::AuthenticationFailure(_)));

    let err = transport.call(&ApiRequest::read("users.list")).await.unwrap_err();
    assert!(matches!(err, SlackError::ParseError(_)));
    assert_eq!(broken.calls(), 1);
}

#[tokio::test]
async fn test_server_errors_exhaust_transient_budget() {
    let server = MockServer::start();
    let failing = server.mock(|when, then| {
        when.method(POST).path("/conversations.list");
        then.status(502).body("bad gateway");
    });

    let err = transport_for(&server.base_url())
        .call(&ApiRequest::read("conversations.list"))
        .await
        .unwrap_err();

    assert!(matches!(err, SlackError::TransientFailure { attempts: 2, .. }));
    assert_eq!(failing.calls(), 2);
}

#[tokio::test]
async fn test_slack_error_code_in_ok_response() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/conversations.info");
        then.status(200)
            .json_body(json!({"ok": false, "error": "missing_scope", "needed": "channels:read"}));
    });

    let err = transport_for(&server.base_url())
        .call(&ApiRequest::read("conversations.info").param("channel", "C100"))
        .await
        .unwrap_err();

    assert!(matches!(err, SlackError::PermissionDenied(ref code) if code == "missing_scope"));
    assert_eq!(err.exit_code(), 3);
}

/// Accepts connections, reads the request and hangs up without answering.
async fn hang_up_server() -> (String, Arc<AtomicU32>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicU32::new(0));
    let counter = accepted.clone();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            let mut buf = vec![0u8; 16 * 1024];
            let _ = socket.read(&mut buf).await;
            drop(socket);
        }
    });
    (format!("http://{addr}/api"), accepted)
}

#[tokio::test]
async fn test_dropped_connection_is_retried_for_reads() {
    let (base_url, accepted) = hang_up_server().await;

    let err = transport_for(&base_url)
        .call(&ApiRequest::read("conversations.history").param("channel", "C100"))
        .await
        .unwrap_err();

    assert!(
        matches!(err, SlackError::TransientFailure { attempts: 2, .. }),
        "unexpected error: {err:?}"
    );
    assert!(accepted.load(Ordering::SeqCst) >= 2);
}

#[tokio::test]
async fn test_dropped_connection_is_not_retried_for_writes() {
    let (base_url, accepted) = hang_up_server().await;

    let err = transport_for(&base_url)
        .call(&ApiRequest::write("chat.postMessage").param("channel", "C100"))
        .await
        .unwrap_err();

    assert!(matches!(err, SlackError::HttpError(_)), "unexpected error: {err:?}");
    assert_eq!(accepted.load(Ordering::SeqCst), 1);
}
