mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::json;
use slackcli::core::models::{ConversationKind, IdentityKey};
use slackcli::errors::SlackError;
use slackcli::slack::RawResponse;
use slackcli::utils::filters::ConversationFilter;

use common::{Harness, conversations_page, workspace};

fn minutes(m: u64) -> Duration {
    Duration::from_secs(m * 60)
}

// ─────────────────────────────────────────────────────────────────────────────
// Conversation directory
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_directory_honours_ttl_boundary() {
    let h = Harness::new(workspace());
    let all = ConversationFilter::default();

    assert_eq!(h.ctx.directory.list(&all, false).await.unwrap().len(), 6);
    assert_eq!(h.api.calls("conversations.list"), 1);

    h.clock.advance(minutes(5 * 60 + 59));
    h.ctx.directory.list(&all, false).await.unwrap();
    assert_eq!(h.api.calls("conversations.list"), 1);

    h.clock.advance(minutes(2));
    h.ctx.directory.list(&all, false).await.unwrap();
    assert_eq!(h.api.calls("conversations.list"), 2);
    assert_eq!(h.ctx.directory.refresh_count(), 2);
}

#[tokio::test]
async fn test_directory_survives_restart_through_disk() {
    let h = Harness::new(workspace());
    h.ctx
        .directory
        .list(&ConversationFilter::default(), false)
        .await
        .unwrap();

    let restarted = h.restart();
    let ids: Vec<String> = restarted
        .directory
        .list(&ConversationFilter::default(), false)
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.id)
        .collect();

    assert_eq!(ids, ["C100", "C200", "G300", "C400", "D500", "G600"]);
    assert_eq!(h.api.calls("conversations.list"), 1);
    assert_eq!(restarted.directory.refresh_count(), 0);
}

#[tokio::test]
async fn test_forced_refresh_bypasses_cache() {
    let h = Harness::new(workspace());
    let all = ConversationFilter::default();
    h.ctx.directory.list(&all, false).await.unwrap();
    h.ctx.directory.list(&all, true).await.unwrap();
    assert_eq!(h.api.calls("conversations.list"), 2);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_stale_reads_share_one_refresh() {
    let h = Harness::new(workspace());
    h.api.set_delay(Duration::from_millis(200));
    let all = ConversationFilter::default();

    let (a, b, c) = tokio::join!(
        h.ctx.directory.list(&all, false),
        h.ctx.directory.list(&all, false),
        h.ctx.directory.list(&all, false),
    );

    assert_eq!(a.unwrap().len(), 6);
    assert_eq!(b.unwrap().len(), 6);
    assert_eq!(c.unwrap().len(), 6);
    assert_eq!(h.api.calls("conversations.list"), 1);
    assert_eq!(h.ctx.directory.refresh_count(), 1);
}

async fn group_dm(h: &Harness) -> slackcli::core::models::Conversation {
    let dms = ConversationFilter {
        dms: true,
        ..ConversationFilter::default()
    };
    let all = h.ctx.directory.list(&dms, false).await.unwrap();
    all.into_iter().find(|c| c.id == "G600").unwrap()
}

#[tokio::test]
async fn test_group_dm_members_are_loaded() {
    let h = Harness::new(workspace());
    let group = group_dm(&h).await;
    assert_eq!(group.kind, ConversationKind::Mpim);
    assert_eq!(group.members, ["U1", "U2", "U3"]);
    assert_eq!(h.api.calls("conversations.members"), 1);
}

#[tokio::test]
async fn test_group_dm_member_failure_degrades() {
    let h = Harness::new(workspace());
    h.api.on_json(
        "conversations.members",
        json!({"ok": false, "error": "channel_not_found"}),
    );
    let group = group_dm(&h).await;
    assert!(group.members.is_empty());
}

#[tokio::test]
async fn test_filters_apply_to_directory() {
    let h = Harness::new(workspace());
    let joined_channels = ConversationFilter {
        public: true,
        private: true,
        member: true,
        exclude_archived: true,
        ..ConversationFilter::default()
    };
    let ids: Vec<String> = h
        .ctx
        .directory
        .list(&joined_channels, false)
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.id)
        .collect();
    assert_eq!(ids, ["C100", "G300"]);
}

// ─────────────────────────────────────────────────────────────────────────────
// Reference resolution
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_resolve_channel_references() {
    let h = Harness::new(workspace());
    let dir = &h.ctx.directory;
    let ids = &h.ctx.identities;

    assert_eq!(dir.resolve_ref("C999ZZZ", ids).await.unwrap(), "C999ZZZ");
    assert_eq!(h.api.total_calls(), 0);

    assert_eq!(dir.resolve_ref("#general", ids).await.unwrap(), "C100");
    assert_eq!(dir.resolve_ref("General", ids).await.unwrap(), "C100");
    assert_eq!(dir.resolve_ref("#secret", ids).await.unwrap(), "G300");
    assert_eq!(h.api.calls("conversations.list"), 1);
}

#[tokio::test]
async fn test_unknown_channel_is_not_found_after_one_refresh() {
    let h = Harness::new(workspace());
    let dir = &h.ctx.directory;

    // Cold cache: the first load already is a refresh, so no second one.
    let err = dir.resolve_ref("#nonexistent", &h.ctx.identities).await.unwrap_err();
    assert!(matches!(err, SlackError::NotFound(_)));
    assert!(!matches!(err, SlackError::AmbiguousOrUnknownRecipient { .. }));
    assert_eq!(h.api.calls("conversations.list"), 1);

    // Warm cache: a miss refreshes exactly once.
    let err = dir.resolve_ref("#still-missing", &h.ctx.identities).await.unwrap_err();
    assert!(matches!(err, SlackError::NotFound(_)));
    assert_eq!(h.api.calls("conversations.list"), 2);
    assert_eq!(err.exit_code(), 4);
}

#[tokio::test]
async fn test_new_channel_found_by_refresh() {
    let api = workspace();
    let listings = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&listings);
    api.on("conversations.list", move |_, _| {
        let mut page = conversations_page();
        if seen.fetch_add(1, Ordering::SeqCst) > 0 {
            page["channels"]
                .as_array_mut()
                .unwrap()
                .push(json!({"id": "C700", "name": "launch", "is_channel": true, "is_member": true}));
        }
        Ok(RawResponse::ok(page))
    });
    let h = Harness::new(api);

    h.ctx
        .directory
        .list(&ConversationFilter::default(), false)
        .await
        .unwrap();
    let id = h.ctx.directory.resolve_ref("#launch", &h.ctx.identities).await.unwrap();

    assert_eq!(id, "C700");
    assert_eq!(listings.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_resolve_user_references_to_dms() {
    let h = Harness::new(workspace());
    let dir = &h.ctx.directory;
    let ids = &h.ctx.identities;

    assert_eq!(dir.resolve_ref("@alice", ids).await.unwrap(), "D500");
    assert_eq!(dir.resolve_ref("@ALICE", ids).await.unwrap(), "D500");
    assert_eq!(dir.resolve_ref("@alice@example.com", ids).await.unwrap(), "D500");
    assert_eq!(h.api.calls("users.list"), 1);
}

#[tokio::test]
async fn test_ambiguous_and_unknown_users() {
    let h = Harness::new(workspace());
    let dir = &h.ctx.directory;
    let ids = &h.ctx.identities;

    match dir.resolve_ref("@Sam", ids).await.unwrap_err() {
        SlackError::AmbiguousOrUnknownRecipient { query, matches } => {
            assert_eq!(query, "@Sam");
            assert_eq!(matches.len(), 2);
            assert!(matches.iter().any(|m| m.contains("U5")));
        }
        other => panic!("unexpected error: {other:?}"),
    }

    let err = dir.resolve_ref("@nobody", ids).await.unwrap_err();
    assert!(matches!(
        err,
        SlackError::AmbiguousOrUnknownRecipient { ref matches, .. } if matches.is_empty()
    ));
    assert!(err.to_string().contains("No user matches"));
    assert_eq!(err.exit_code(), 2);

    // bob exists but has no DM with us.
    let err = dir.resolve_ref("@bob", ids).await.unwrap_err();
    assert!(matches!(err, SlackError::NotFound(_)));
}

// ─────────────────────────────────────────────────────────────────────────────
// Identity cache
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_concurrent_resolves_share_one_lookup() {
    let h = Harness::new(workspace());
    h.api.set_delay(Duration::from_millis(100));
    let key = IdentityKey::user("U1");

    let (a, b, c) = tokio::join!(
        h.ctx.identities.resolve(&key),
        h.ctx.identities.resolve(&key),
        h.ctx.identities.resolve(&key),
    );

    assert_eq!(a.unwrap(), "alice");
    assert_eq!(b.unwrap(), "alice");
    assert_eq!(c.unwrap(), "alice");
    assert_eq!(h.api.calls("users.info"), 1);
    assert_eq!(h.ctx.identities.network_lookups(), 1);
}

#[tokio::test]
async fn test_identity_ttl_and_disk_cache() {
    let h = Harness::new(workspace());
    let key = IdentityKey::user("U2");

    assert_eq!(h.ctx.identities.resolve(&key).await.unwrap(), "bob");
    assert_eq!(h.ctx.identities.resolve(&key).await.unwrap(), "bob");
    assert_eq!(h.api.calls("users.info"), 1);

    let restarted = h.restart();
    assert_eq!(restarted.identities.resolve(&key).await.unwrap(), "bob");
    assert_eq!(h.api.calls("users.info"), 1);

    h.clock.advance(Duration::from_secs(24 * 3_600 + 60));
    assert_eq!(h.ctx.identities.resolve(&key).await.unwrap(), "bob");
    assert_eq!(h.api.calls("users.info"), 2);
}

#[tokio::test]
async fn test_unknown_identity_degrades_to_id() {
    let h = Harness::new(workspace());
    let label = h.ctx.identities.resolve(&IdentityKey::user("U404")).await.unwrap();
    assert_eq!(label, "U404");
}

#[tokio::test(start_paused = true)]
async fn test_failed_refresh_falls_back_to_stale_label() {
    let h = Harness::new(workspace());
    let key = IdentityKey::user("U3");
    assert_eq!(h.ctx.identities.resolve(&key).await.unwrap(), "carol");

    h.api.on("users.info", |_, _| {
        Ok(RawResponse {
            status: 503,
            retry_after: None,
            body: None,
        })
    });
    h.clock.advance(Duration::from_secs(48 * 3_600));

    assert_eq!(h.ctx.identities.resolve(&key).await.unwrap(), "carol");
    // One success, then three failing attempts.
    assert_eq!(h.api.calls("users.info"), 4);
}

#[tokio::test]
async fn test_cancellation_propagates_from_lookup() {
    let h = Harness::new(workspace());
    h.cancel.cancel();
    let err = h
        .ctx
        .identities
        .resolve(&IdentityKey::user("U1"))
        .await
        .unwrap_err();
    assert!(matches!(err, SlackError::Cancelled));
}

#[tokio::test]
async fn test_channel_labels_and_batch_dedup() {
    let h = Harness::new(workspace());
    h.api.on_json(
        "conversations.info",
        json!({"ok": true, "channel": {"id": "C200", "name": "random"}}),
    );

    let labels = h
        .ctx
        .identities
        .resolve_many(vec![
            IdentityKey::user("U1"),
            IdentityKey::channel("C200"),
            IdentityKey::user("U1"),
            IdentityKey::user("U2"),
        ])
        .await
        .unwrap();

    assert_eq!(labels[&IdentityKey::user("U1")], "alice");
    assert_eq!(labels[&IdentityKey::user("U2")], "bob");
    assert_eq!(labels[&IdentityKey::channel("C200")], "random");
    assert_eq!(h.api.calls("users.info"), 2);
    assert_eq!(h.api.calls("conversations.info"), 1);
}

#[tokio::test]
async fn test_seeded_channels_need_no_lookup() {
    let h = Harness::new(workspace());
    let all = h
        .ctx
        .directory
        .list(&ConversationFilter::default(), false)
        .await
        .unwrap();
    h.ctx.identities.seed_channels(&all);

    let label = h.ctx.identities.resolve(&IdentityKey::channel("C100")).await.unwrap();
    assert_eq!(label, "general");
    assert_eq!(h.api.calls("conversations.info"), 0);
}
