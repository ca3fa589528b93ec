//! Shared fixtures: a scripted in-memory Slack and a context wired to it.
#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use slackcli::cache::ManualClock;
use slackcli::core::context::{ContextOptions, SlackContext};
use slackcli::core::models::Ts;
use slackcli::slack::{ApiRequest, RawResponse, RetryPolicy, SendFailure, SlackApi};
use slackcli::utils::time_window::Zone;

pub type Handler = Box<dyn Fn(&ApiRequest, u32) -> Result<RawResponse, SendFailure> + Send + Sync>;

/// In-memory Slack. Each method answers through a handler; unknown methods get
/// `unknown_method`. Every attempt is recorded.
#[derive(Default)]
pub struct FakeSlack {
    handlers: Mutex<HashMap<String, Handler>>,
    log: Mutex<Vec<ApiRequest>>,
    delay: Mutex<Option<Duration>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl FakeSlack {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn on<F>(&self, method: &str, handler: F)
    where
        F: Fn(&ApiRequest, u32) -> Result<RawResponse, SendFailure> + Send + Sync + 'static,
    {
        self.handlers
            .lock()
            .unwrap()
            .insert(method.to_string(), Box::new(handler));
    }

    /// Always answer `method` with `body`.
    pub fn on_json(&self, method: &str, body: Value) {
        self.on(method, move |_, _| Ok(RawResponse::ok(body.clone())));
    }

    /// Every call takes this long (virtual time under `start_paused`).
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn calls(&self, method: &str) -> usize {
        self.log.lock().unwrap().iter().filter(|r| r.method == method).count()
    }

    pub fn requests(&self, method: &str) -> Vec<ApiRequest> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.method == method)
            .cloned()
            .collect()
    }

    pub fn total_calls(&self) -> usize {
        self.log.lock().unwrap().len()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SlackApi for FakeSlack {
    async fn send(&self, request: &ApiRequest, attempt: u32) -> Result<RawResponse, SendFailure> {
        self.log.lock().unwrap().push(request.clone());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let result = match self.handlers.lock().unwrap().get(&request.method) {
            Some(handler) => handler(request, attempt),
            None => Ok(RawResponse::ok(json!({"ok": false, "error": "unknown_method"}))),
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

pub fn t0() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-05-01T12:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

/// Timestamp `minutes` before [`t0`], as Slack prints it.
pub fn ts_before(minutes: i64) -> String {
    Ts::from_datetime(&(t0() - chrono::Duration::minutes(minutes))).to_string()
}

/// No jitter and short delays so retries stay deterministic.
pub fn quick_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 5,
        base_delay: Duration::from_millis(1_000),
        max_transient_attempts: 3,
        transient_delay: Duration::from_millis(250),
        max_delay: Duration::from_secs(30),
        jitter: false,
    }
}

pub fn options(cache_root: &Path) -> ContextOptions {
    ContextOptions {
        cache_root: cache_root.to_path_buf(),
        conversations_ttl: Duration::from_secs(6 * 3_600),
        users_ttl: Duration::from_secs(24 * 3_600),
        retry: quick_policy(),
        concurrency: 4,
        zone: Zone::Named(chrono_tz::UTC),
    }
}

pub struct Harness {
    pub api: Arc<FakeSlack>,
    pub clock: Arc<ManualClock>,
    pub cancel: CancellationToken,
    pub ctx: SlackContext,
    pub cache: TempDir,
}

impl Harness {
    pub fn new(api: Arc<FakeSlack>) -> Self {
        let cache = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(t0()));
        let cancel = CancellationToken::new();
        let ctx = context(&api, &clock, cache.path(), cancel.clone());
        Self {
            api,
            clock,
            cancel,
            ctx,
            cache,
        }
    }

    /// A second context over the same cache directory, like a new process.
    pub fn restart(&self) -> SlackContext {
        context(&self.api, &self.clock, self.cache.path(), CancellationToken::new())
    }
}

fn context(
    api: &Arc<FakeSlack>,
    clock: &Arc<ManualClock>,
    cache_root: &Path,
    cancel: CancellationToken,
) -> SlackContext {
    SlackContext::new(
        "acme",
        Arc::clone(api) as Arc<dyn SlackApi>,
        Arc::clone(clock) as Arc<dyn slackcli::cache::Clock>,
        options(cache_root),
        cancel,
    )
}

pub fn conversations_page() -> Value {
    json!({
        "ok": true,
        "channels": [
            {"id": "C100", "name": "general", "is_channel": true, "is_member": true},
            {"id": "C200", "name": "random", "is_channel": true, "is_member": false},
            {"id": "G300", "name": "secret", "is_group": true, "is_private": true, "is_member": true},
            {"id": "C400", "name": "old-news", "is_channel": true, "is_member": true, "is_archived": true},
            {"id": "D500", "is_im": true, "user": "U1"},
            {"id": "G600", "name": "mpdm-alice--bob--carol-1", "is_mpim": true, "is_private": true, "is_member": true}
        ],
        "response_metadata": {"next_cursor": ""}
    })
}

pub fn users_page() -> Value {
    json!({
        "ok": true,
        "members": [
            {"id": "U1", "name": "alice", "real_name": "Alice Adams",
             "profile": {"display_name": "Alice", "email": "alice@example.com"}},
            {"id": "U2", "name": "bob", "profile": {"display_name": "Bobby"}},
            {"id": "U3", "name": "carol", "profile": {}},
            {"id": "U5", "name": "sam.one", "profile": {"display_name": "Sam"}},
            {"id": "U6", "name": "sam.two", "profile": {"display_name": "Sam"}},
            {"id": "U7", "name": "dave", "deleted": true, "profile": {}}
        ],
        "response_metadata": {"next_cursor": ""}
    })
}

/// A workspace with the standard conversation and user fixtures.
pub fn workspace() -> Arc<FakeSlack> {
    let api = FakeSlack::new();
    api.on_json("conversations.list", conversations_page());
    api.on_json("users.list", users_page());
    api.on_json(
        "conversations.members",
        json!({"ok": true, "members": ["U1", "U2", "U3"], "response_metadata": {"next_cursor": ""}}),
    );
    api.on("users.info", |request, _| {
        let id = request.get("user").unwrap_or_default().to_string();
        let name = match id.as_str() {
            "U1" => "alice",
            "U2" => "bob",
            "U3" => "carol",
            _ => return Ok(RawResponse::ok(json!({"ok": false, "error": "user_not_found"}))),
        };
        Ok(RawResponse::ok(json!({"ok": true, "user": {"id": id, "name": name}})))
    });
    api
}
