//! `ListMessages`: history or one thread, windowed, assembled and rendered.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::core::context::SlackContext;
use crate::core::models::{FileAttachment, IdentityKey, Message, ReactionMode, Ts};
use crate::errors::SlackError;
use crate::features::conversations::describe;
use crate::features::threads::{ThreadedMessage, assemble, fetch_thread, thread_view};
use crate::slack::api::ApiRequest;
use crate::slack::paginator::{CursorPaginator, MAX_PAGE_SIZE};
use crate::utils::links::token_to_ts;
use crate::utils::blocks::message_segments;
use crate::utils::mentions::{Segment, identity_keys, render_segments};
use crate::utils::time_window::TimeWindow;

pub const DEFAULT_SINCE: &str = "30d";
pub const DEFAULT_LIMIT: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListMessagesRequest {
    /// Conversation id, `#name`, `@user` or `@email`.
    pub conversation: String,
    /// Show this one thread (`1769432401.438239` or `p1769432401438239`).
    pub thread: Option<String>,
    pub since: Option<String>,
    pub until: Option<String>,
    pub limit: usize,
    pub with_threads: bool,
    pub reactions: ReactionMode,
}

impl ListMessagesRequest {
    #[must_use]
    pub fn new(conversation: impl Into<String>) -> Self {
        Self {
            conversation: conversation.into(),
            thread: None,
            since: None,
            until: None,
            limit: DEFAULT_LIMIT,
            with_threads: false,
            reactions: ReactionMode::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedReaction {
    pub name: String,
    pub count: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub users: Vec<String>,
}

/// A message ready for output: macros rendered and ids replaced by labels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedMessage {
    pub ts: Ts,
    pub time: Option<DateTime<Utc>>,
    pub author_id: Option<String>,
    pub author: String,
    pub text: String,
    pub depth: u8,
    pub thread_ts: Option<Ts>,
    pub reply_count: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub reactions: Vec<RenderedReaction>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<FileAttachment>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageListing {
    pub conversation_id: String,
    pub conversation: String,
    pub messages: Vec<RenderedMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Accept a thread reference as a plain timestamp or a permalink token.
///
/// # Errors
///
/// `MalformedToken` when it is neither.
pub fn parse_thread_ts(raw: &str) -> Result<Ts, SlackError> {
    let raw = raw.trim();
    if raw.starts_with('p') {
        return token_to_ts(raw);
    }
    raw.parse::<Ts>()
        .map_err(|_| SlackError::MalformedToken(raw.to_string()))
}

fn author_key(message: &Message) -> Option<IdentityKey> {
    message.user.as_deref().map(IdentityKey::user)
}

/// Render assembled messages with one batched identity resolution covering
/// mentions, authors and (in `names` mode) reaction users.
///
/// # Errors
///
/// Only `Cancelled`.
pub async fn render_messages(
    ctx: &SlackContext,
    threaded: Vec<ThreadedMessage>,
    reactions: ReactionMode,
) -> Result<Vec<RenderedMessage>, SlackError> {
    let parsed: Vec<Vec<Segment>> = threaded
        .iter()
        .map(|t| message_segments(&t.message))
        .collect();

    let mut keys: Vec<IdentityKey> = Vec::new();
    for (item, segments) in threaded.iter().zip(&parsed) {
        keys.extend(identity_keys(segments));
        keys.extend(author_key(&item.message));
        if reactions == ReactionMode::Names {
            for reaction in &item.message.reactions {
                keys.extend(reaction.users.iter().map(|u| IdentityKey::user(u.as_str())));
            }
        }
    }
    let labels = ctx.identities.resolve_many(keys).await?;
    let label_of = |key: &IdentityKey| labels.get(key).cloned().unwrap_or_else(|| key.id.clone());

    Ok(threaded
        .into_iter()
        .zip(parsed)
        .map(|(item, segments)| {
            let message = item.message;
            let author = match author_key(&message) {
                Some(key) => label_of(&key),
                None => message
                    .username
                    .clone()
                    .or_else(|| message.bot_id.clone())
                    .unwrap_or_else(|| "unknown".to_string()),
            };
            let rendered_reactions = match reactions {
                ReactionMode::Off => Vec::new(),
                ReactionMode::Counts | ReactionMode::Names => message
                    .reactions
                    .iter()
                    .map(|r| RenderedReaction {
                        name: r.name.clone(),
                        count: r.count,
                        users: if reactions == ReactionMode::Names {
                            r.users
                                .iter()
                                .map(|u| label_of(&IdentityKey::user(u.as_str())))
                                .collect()
                        } else {
                            Vec::new()
                        },
                    })
                    .collect(),
            };
            RenderedMessage {
                ts: message.ts,
                time: message.ts.to_datetime(),
                author_id: message.author_id().map(str::to_string),
                author,
                text: render_segments(&segments, &labels),
                depth: item.depth,
                thread_ts: message.thread_ts,
                reply_count: message.reply_count,
                reactions: rendered_reactions,
                files: message.files,
            }
        })
        .collect())
}

async fn fetch_history(
    ctx: &SlackContext,
    channel: &str,
    window: &TimeWindow,
    limit: usize,
) -> Result<Vec<Message>, SlackError> {
    // `oldest` and `latest` are both exclusive; step back one microsecond to keep `since`.
    let request = ApiRequest::read("conversations.history")
        .param("channel", channel)
        .param_opt("oldest", window.since.map(|s| s.pred()))
        .param_opt("latest", window.until);
    let mut messages: Vec<Message> =
        CursorPaginator::new(&ctx.transport, request, "messages", MAX_PAGE_SIZE, Some(limit))
            .collect_all()
            .await?;
    // Slack pages newest first.
    messages.reverse();
    messages.sort_by_key(|m| m.ts);
    Ok(window.filter(messages))
}

/// `ListMessages`.
///
/// The time window is validated before any network call. Without `since`, channel
/// history looks back [`DEFAULT_SINCE`]; a single thread is shown whole.
///
/// # Errors
///
/// User-input errors for bad windows or references, transport errors, `Cancelled`.
pub async fn list_messages(
    ctx: &SlackContext,
    request: &ListMessagesRequest,
) -> Result<MessageListing, SlackError> {
    let thread_ts = request.thread.as_deref().map(parse_thread_ts).transpose()?;
    let since = match (&request.since, thread_ts) {
        (Some(since), _) => Some(since.as_str()),
        (None, None) => Some(DEFAULT_SINCE),
        (None, Some(_)) => None,
    };
    let window = ctx
        .zone
        .window(since, request.until.as_deref(), ctx.clock.now())?;

    let channel = ctx
        .directory
        .resolve_ref(&request.conversation, &ctx.identities)
        .await?;
    let conversation = describe(ctx, &channel).await?;
    debug!(channel = %channel, ?window, "Listing messages");

    let mut warnings = Vec::new();
    let threaded = if window.is_empty() || request.limit == 0 {
        Vec::new()
    } else if let Some(thread_ts) = thread_ts {
        let thread = fetch_thread(&ctx.transport, &channel, thread_ts, Some(request.limit)).await?;
        thread_view(window.filter(thread), thread_ts)
    } else {
        let history = fetch_history(ctx, &channel, &window, request.limit).await?;
        if request.with_threads {
            let assembly = assemble(&ctx.transport, &channel, history, ctx.concurrency).await?;
            warnings = assembly.warnings;
            assembly.messages
        } else {
            history
                .into_iter()
                .map(|message| ThreadedMessage { message, depth: 0 })
                .collect()
        }
    };

    let messages = render_messages(ctx, threaded, request.reactions).await?;
    info!(channel = %channel, messages = messages.len(), "Listed messages");

    Ok(MessageListing {
        conversation_id: channel,
        conversation,
        messages,
        warnings,
    })
}
