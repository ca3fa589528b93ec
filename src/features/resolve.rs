use serde::Serialize;
use serde_json::Value;

use crate::core::context::SlackContext;
use crate::core::models::{Message, ReactionMode, ThreadRole};
use crate::errors::SlackError;
use crate::features::collect::{RenderedMessage, render_messages};
use crate::features::conversations::describe;
use crate::features::threads::ThreadedMessage;
use crate::slack::api::ApiRequest;
use crate::slack::paginator::parse_page;
use crate::slack::transport::Transport;
use crate::utils::links::{Permalink, parse_permalink};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedMessage {
    pub permalink: Permalink,
    pub role: ThreadRole,
    pub conversation: String,
    pub message: RenderedMessage,
}

/// Fetch exactly the message a permalink points at.
///
/// Replies are read through `conversations.replies` (which always leads with the
/// parent), everything else through inclusive `conversations.history`.
///
/// # Errors
///
/// `NotFound` when Slack hands back a different message, plus transport errors.
pub async fn fetch_message(transport: &Transport, link: &Permalink) -> Result<Message, SlackError> {
    let request = match link.thread_ts {
        Some(thread_ts) if link.is_thread_reply() => ApiRequest::read("conversations.replies")
            .param("channel", &link.channel_id)
            .param("ts", thread_ts)
            .param("oldest", link.message_ts)
            .param("inclusive", "true")
            .param("limit", 2),
        _ => ApiRequest::read("conversations.history")
            .param("channel", &link.channel_id)
            .param("latest", link.message_ts)
            .param("inclusive", "true")
            .param("limit", 1),
    };
    let body: Value = transport.call(&request).await?;
    let (messages, _) = parse_page::<Message>(&body, "messages")?;
    messages
        .into_iter()
        .find(|m| m.ts == link.message_ts)
        .ok_or_else(|| {
            SlackError::NotFound(format!(
                "message {} in {}",
                link.message_ts, link.channel_id
            ))
        })
}

/// `Resolve`: parse a permalink, fetch that message and render it.
///
/// # Errors
///
/// `UnrecognizedUrl` / `MalformedToken` for bad input, then as [`fetch_message`].
pub async fn resolve_permalink(ctx: &SlackContext, url: &str) -> Result<ResolvedMessage, SlackError> {
    let permalink = parse_permalink(url)?;
    let message = fetch_message(&ctx.transport, &permalink).await?;
    let conversation = describe(ctx, &permalink.channel_id).await?;
    let depth = u8::from(message.thread_role() == ThreadRole::Reply);
    let mut rendered = render_messages(
        ctx,
        vec![ThreadedMessage { message, depth }],
        ReactionMode::Names,
    )
    .await?;
    let message = rendered
        .pop()
        .ok_or_else(|| SlackError::NotFound(format!("message {}", permalink.message_ts)))?;
    Ok(ResolvedMessage {
        role: permalink.role(),
        permalink,
        conversation,
        message,
    })
}
