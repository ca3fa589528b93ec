//! `ListUnread`: which joined conversations have unread messages.
//!
//! Slack exposes reliable unread counts for 1:1 DMs only. Channels are counted by
//! paging history after `last_read`, up to [`CHANNEL_COUNT_CAP`]. Group DMs report
//! state inconsistently and are flagged as such instead of given a number.

use futures::StreamExt;
use futures::stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::core::context::SlackContext;
use crate::core::models::{Conversation, ConversationKind, Ts};
use crate::errors::SlackError;
use crate::features::conversations::labels_for;
use crate::slack::api::ApiRequest;
use crate::utils::filters::ConversationFilter;

pub const CHANNEL_COUNT_CAP: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "count", rename_all = "snake_case")]
pub enum UnreadCount {
    Exact(u32),
    AtLeast(u32),
    /// Slack's group DM unread state cannot be trusted.
    Inconsistent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnreadConversation {
    pub id: String,
    pub label: String,
    pub kind: ConversationKind,
    pub unread: UnreadCount,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UnreadReport {
    pub conversations: Vec<UnreadConversation>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ReadState {
    #[serde(default)]
    last_read: Option<Ts>,
    #[serde(default)]
    unread_count: Option<u32>,
    #[serde(default)]
    unread_count_display: Option<u32>,
    #[serde(default)]
    latest: Option<Value>,
}

impl ReadState {
    fn platform_count(&self) -> Option<u32> {
        self.unread_count_display.or(self.unread_count)
    }

    fn has_newer_message(&self) -> bool {
        let latest = self
            .latest
            .as_ref()
            .and_then(|l| l.get("ts"))
            .and_then(Value::as_str)
            .and_then(|ts| ts.parse::<Ts>().ok());
        match (latest, self.last_read) {
            (Some(latest), Some(last_read)) => latest > last_read,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }
}

async fn read_state(ctx: &SlackContext, id: &str) -> Result<ReadState, SlackError> {
    let body = ctx
        .transport
        .call(&ApiRequest::read("conversations.info").param("channel", id))
        .await?;
    Ok(serde_json::from_value(
        body.get("channel").cloned().unwrap_or(Value::Null),
    )?)
}

async fn count_after(ctx: &SlackContext, id: &str, last_read: Ts) -> Result<UnreadCount, SlackError> {
    let body = ctx
        .transport
        .call(
            &ApiRequest::read("conversations.history")
                .param("channel", id)
                .param("oldest", last_read)
                .param("limit", CHANNEL_COUNT_CAP),
        )
        .await?;
    let count = body
        .get("messages")
        .and_then(Value::as_array)
        .map_or(0, Vec::len);
    let count = u32::try_from(count).unwrap_or(u32::MAX);
    let has_more = body.get("has_more").and_then(Value::as_bool).unwrap_or(false);
    if has_more || count >= CHANNEL_COUNT_CAP {
        Ok(UnreadCount::AtLeast(CHANNEL_COUNT_CAP))
    } else {
        Ok(UnreadCount::Exact(count))
    }
}

/// Unread state of one conversation; `None` when nothing is unread.
async fn unread_state(ctx: &SlackContext, conversation: &Conversation) -> Result<Option<UnreadCount>, SlackError> {
    let state = read_state(ctx, &conversation.id).await?;
    let count = match conversation.kind {
        ConversationKind::Im => match (state.platform_count(), state.last_read) {
            (Some(n), _) => UnreadCount::Exact(n),
            (None, Some(last_read)) => count_after(ctx, &conversation.id, last_read).await?,
            (None, None) => return Ok(None),
        },
        ConversationKind::Mpim => {
            if state.platform_count().unwrap_or(0) > 0 || state.has_newer_message() {
                UnreadCount::Inconsistent
            } else {
                return Ok(None);
            }
        }
        ConversationKind::PublicChannel | ConversationKind::PrivateChannel => {
            let Some(last_read) = state.last_read else {
                return Ok(None);
            };
            count_after(ctx, &conversation.id, last_read).await?
        }
    };
    Ok(match count {
        UnreadCount::Exact(0) => None,
        other => Some(other),
    })
}

/// `ListUnread`.
///
/// # Errors
///
/// Directory errors, `AuthenticationFailure` and `Cancelled` abort the report;
/// other per-conversation failures become warnings.
pub async fn list_unread(ctx: &SlackContext) -> Result<UnreadReport, SlackError> {
    let filter = ConversationFilter {
        member: true,
        exclude_archived: true,
        ..ConversationFilter::default()
    };
    let conversations = ctx.directory.list(&filter, false).await?;

    let mut states: Vec<(usize, Result<Option<UnreadCount>, SlackError>)> =
        stream::iter(conversations.iter().enumerate())
            .map(|(index, conversation)| async move { (index, unread_state(ctx, conversation).await) })
            .buffer_unordered(ctx.concurrency)
            .collect()
            .await;
    states.sort_by_key(|(index, _)| *index);

    let mut report = UnreadReport::default();
    let mut unread: Vec<(Conversation, UnreadCount)> = Vec::new();
    for (index, result) in states {
        let conversation = &conversations[index];
        match result {
            Ok(Some(count)) => unread.push((conversation.clone(), count)),
            Ok(None) => {}
            Err(e @ (SlackError::Cancelled | SlackError::AuthenticationFailure(_))) => return Err(e),
            Err(e) => {
                warn!(conversation = %conversation.id, error = %e, "Failed to read unread state");
                report.warnings.push(format!("{}: {e}", conversation.id));
            }
        }
    }

    let (found, counts): (Vec<Conversation>, Vec<UnreadCount>) = unread.into_iter().unzip();
    let labels = labels_for(ctx, &found).await?;
    report.conversations = found
        .into_iter()
        .zip(labels)
        .zip(counts)
        .map(|((conversation, label), unread)| UnreadConversation {
            id: conversation.id,
            label,
            kind: conversation.kind,
            unread,
        })
        .collect();
    Ok(report)
}
