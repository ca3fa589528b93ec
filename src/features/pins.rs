//! Pinned messages of one conversation (`pins.list`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::context::SlackContext;
use crate::core::models::{IdentityKey, Message, ReactionMode};
use crate::errors::SlackError;
use crate::features::collect::{RenderedMessage, render_messages};
use crate::features::conversations::describe;
use crate::features::threads::ThreadedMessage;
use crate::slack::api::ApiRequest;
use crate::slack::paginator::parse_page;

/// One `pins.list` item. File and file-comment pins carry no `message`.
#[derive(Debug, Deserialize)]
struct PinItem {
    #[serde(default)]
    message: Option<Message>,
    #[serde(default)]
    created: Option<i64>,
    #[serde(default)]
    created_by: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Pin {
    pub message: RenderedMessage,
    pub pinned_by_id: Option<String>,
    pub pinned_by: Option<String>,
    pub pinned_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PinListing {
    pub conversation_id: String,
    pub conversation: String,
    pub pins: Vec<Pin>,
}

/// `ListPins`: pinned messages in Slack's order, rendered like history.
///
/// # Errors
///
/// Reference resolution errors, transport errors, `Cancelled`.
pub async fn list_pins(ctx: &SlackContext, conversation: &str) -> Result<PinListing, SlackError> {
    let channel = ctx
        .directory
        .resolve_ref(conversation, &ctx.identities)
        .await?;
    let label = describe(ctx, &channel).await?;

    let body = ctx
        .transport
        .call(&ApiRequest::read("pins.list").param("channel", &channel))
        .await?;
    let (items, _) = parse_page::<PinItem>(&body, "items")?;
    let items: Vec<(Message, Option<i64>, Option<String>)> = items
        .into_iter()
        .filter_map(|item| Some((item.message?, item.created, item.created_by)))
        .collect();
    debug!(channel = %channel, pins = items.len(), "Fetched pins");

    let pinners: Vec<IdentityKey> = items
        .iter()
        .filter_map(|(_, _, by)| by.as_deref().map(IdentityKey::user))
        .collect();
    let labels = ctx.identities.resolve_many(pinners).await?;

    let mut pins = Vec::with_capacity(items.len());
    let mut threaded = Vec::with_capacity(items.len());
    for (message, created, created_by) in items {
        threaded.push(ThreadedMessage { message, depth: 0 });
        pins.push((created, created_by));
    }
    let rendered = render_messages(ctx, threaded, ReactionMode::Off).await?;

    Ok(PinListing {
        conversation_id: channel,
        conversation: label,
        pins: rendered
            .into_iter()
            .zip(pins)
            .map(|(message, (created, created_by))| Pin {
                message,
                pinned_by: created_by.as_deref().map(|id| {
                    labels
                        .get(&IdentityKey::user(id))
                        .cloned()
                        .unwrap_or_else(|| id.to_string())
                }),
                pinned_by_id: created_by,
                pinned_at: created.and_then(|secs| DateTime::from_timestamp(secs, 0)),
            })
            .collect(),
    })
}
