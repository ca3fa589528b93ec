use std::collections::HashMap;

use serde::Serialize;

use crate::core::context::SlackContext;
use crate::core::models::{Conversation, ConversationKind, IdentityKey};
use crate::errors::SlackError;
use crate::utils::filters::ConversationFilter;

/// One row of `conversations list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversationSummary {
    pub id: String,
    pub label: String,
    pub kind: ConversationKind,
    pub is_member: bool,
    pub is_archived: bool,
    pub topic: Option<String>,
    pub purpose: Option<String>,
    pub num_members: Option<u32>,
}

fn user_keys(conversation: &Conversation) -> Vec<IdentityKey> {
    match conversation.kind {
        ConversationKind::Im => conversation
            .user
            .iter()
            .map(|u| IdentityKey::user(u.as_str()))
            .collect(),
        ConversationKind::Mpim => conversation
            .members
            .iter()
            .map(|u| IdentityKey::user(u.as_str()))
            .collect(),
        _ => Vec::new(),
    }
}

/// Display label from already-resolved user labels: `#name` for channels,
/// `@user` for DMs, comma-joined members for group DMs.
#[must_use]
pub fn label_with(conversation: &Conversation, labels: &HashMap<IdentityKey, String>) -> String {
    let user_label = |id: &String| {
        labels
            .get(&IdentityKey::user(id.as_str()))
            .cloned()
            .unwrap_or_else(|| id.clone())
    };
    match conversation.kind {
        ConversationKind::Im => match &conversation.user {
            Some(user) => format!("@{}", user_label(user)),
            None => conversation.id.clone(),
        },
        ConversationKind::Mpim if !conversation.members.is_empty() => conversation
            .members
            .iter()
            .map(user_label)
            .collect::<Vec<_>>()
            .join(", "),
        _ => match &conversation.name {
            Some(name) if conversation.kind == ConversationKind::Mpim => name.clone(),
            Some(name) => format!("#{name}"),
            None => conversation.id.clone(),
        },
    }
}

/// Resolve display labels for many conversations with one batched identity lookup.
///
/// # Errors
///
/// Only `Cancelled`.
pub async fn labels_for(
    ctx: &SlackContext,
    conversations: &[Conversation],
) -> Result<Vec<String>, SlackError> {
    let keys: Vec<IdentityKey> = conversations.iter().flat_map(user_keys).collect();
    let labels = ctx.identities.resolve_many(keys).await?;
    Ok(conversations.iter().map(|c| label_with(c, &labels)).collect())
}

/// Label for one conversation id. Ids missing from the directory label as themselves.
/// Loading the directory also primes channel labels for mention rendering.
///
/// # Errors
///
/// Transport errors from a directory refresh, or `Cancelled`.
pub async fn describe(ctx: &SlackContext, id: &str) -> Result<String, SlackError> {
    let all = ctx
        .directory
        .list(&ConversationFilter::default(), false)
        .await?;
    ctx.identities.seed_channels(&all);
    match all.iter().find(|c| c.id == id) {
        Some(conversation) => Ok(labels_for(ctx, std::slice::from_ref(conversation))
            .await?
            .pop()
            .unwrap_or_else(|| id.to_string())),
        None => Ok(id.to_string()),
    }
}

/// `ListConversations`: the filtered directory with display labels.
///
/// # Errors
///
/// Transport errors from a directory refresh, or `Cancelled`.
pub async fn list_conversations(
    ctx: &SlackContext,
    filter: &ConversationFilter,
    refresh: bool,
) -> Result<Vec<ConversationSummary>, SlackError> {
    let conversations = ctx.directory.list(filter, refresh).await?;
    let labels = labels_for(ctx, &conversations).await?;
    Ok(conversations
        .into_iter()
        .zip(labels)
        .map(|(c, label)| ConversationSummary {
            id: c.id,
            label,
            kind: c.kind,
            is_member: c.is_member,
            is_archived: c.is_archived,
            topic: c.topic,
            purpose: c.purpose,
            num_members: c.num_members,
        })
        .collect())
}
