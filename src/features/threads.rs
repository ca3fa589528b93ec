//! Thread assembly: splice each parent's replies in right after it.

use std::collections::{HashMap, HashSet};

use futures::StreamExt;
use futures::stream;
use serde::Serialize;
use tracing::warn;

use crate::core::models::{Message, ThreadRole, Ts};
use crate::errors::SlackError;
use crate::slack::api::ApiRequest;
use crate::slack::paginator::CursorPaginator;
use crate::slack::transport::Transport;

const REPLIES_PAGE_SIZE: usize = 200;

/// A message tagged with its place in the hierarchy: parents and standalone
/// messages at depth 0, replies at depth 1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThreadedMessage {
    pub message: Message,
    pub depth: u8,
}

#[derive(Debug, Default)]
pub struct Assembly {
    pub messages: Vec<ThreadedMessage>,
    /// Threads whose replies could not be fetched.
    pub warnings: Vec<String>,
}

/// Every message of one thread, parent included, oldest first.
///
/// # Errors
///
/// Transport errors from `conversations.replies`.
pub async fn fetch_thread(
    transport: &Transport,
    channel: &str,
    thread_ts: Ts,
    cap: Option<usize>,
) -> Result<Vec<Message>, SlackError> {
    let request = ApiRequest::read("conversations.replies")
        .param("channel", channel)
        .param("ts", thread_ts);
    let mut messages: Vec<Message> =
        CursorPaginator::new(transport, request, "messages", REPLIES_PAGE_SIZE, cap)
            .collect_all()
            .await?;
    messages.sort_by_key(|m| m.ts);
    Ok(messages)
}

/// Lay out a single thread: the parent at depth 0, everything else at depth 1.
#[must_use]
pub fn thread_view(messages: Vec<Message>, thread_ts: Ts) -> Vec<ThreadedMessage> {
    let mut messages = messages;
    messages.sort_by_key(|m| m.ts);
    messages
        .into_iter()
        .map(|message| {
            let depth = u8::from(message.ts != thread_ts);
            ThreadedMessage { message, depth }
        })
        .collect()
}

/// Merge top-level history with the replies of every parent that has any.
///
/// Replies are fetched with at most `concurrency` requests in flight, and results
/// are put back in parent order. A thread that fails to load keeps its parent
/// (with its reply count) and gets a warning instead of replies. Broadcast replies
/// that also appear at top level are shown once, inside their thread.
///
/// # Errors
///
/// Only `Cancelled`; other per-thread failures degrade.
pub async fn assemble(
    transport: &Transport,
    channel: &str,
    top_level: Vec<Message>,
    concurrency: usize,
) -> Result<Assembly, SlackError> {
    let mut top_level = top_level;
    top_level.sort_by_key(|m| m.ts);

    let parents: Vec<Ts> = top_level
        .iter()
        .filter(|m| m.thread_role() == ThreadRole::Parent && m.reply_count > 0)
        .map(|m| m.ts)
        .collect();

    let mut fetched: Vec<(usize, Ts, Result<Vec<Message>, SlackError>)> =
        stream::iter(parents.into_iter().enumerate())
            .map(|(index, parent)| async move {
                (index, parent, fetch_thread(transport, channel, parent, None).await)
            })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await;
    fetched.sort_by_key(|(index, _, _)| *index);

    let mut assembly = Assembly::default();
    let mut blocks: HashMap<Ts, Vec<Message>> = HashMap::new();
    for (_, parent, result) in fetched {
        match result {
            Ok(thread) => {
                let replies: Vec<Message> = thread.into_iter().filter(|m| m.ts != parent).collect();
                blocks.insert(parent, replies);
            }
            Err(SlackError::Cancelled) => return Err(SlackError::Cancelled),
            Err(e) => {
                warn!(channel = %channel, thread_ts = %parent, error = %e, "Failed to fetch thread replies");
                assembly
                    .warnings
                    .push(format!("replies to {parent} omitted: {e}"));
            }
        }
    }

    let spliced: HashSet<Ts> = blocks.values().flatten().map(|m| m.ts).collect();

    for message in top_level {
        let is_duplicate_broadcast = message.thread_role() == ThreadRole::Reply
            && spliced.contains(&message.ts);
        if is_duplicate_broadcast {
            continue;
        }
        let replies = blocks.remove(&message.ts);
        assembly.messages.push(ThreadedMessage { message, depth: 0 });
        if let Some(replies) = replies {
            assembly
                .messages
                .extend(replies.into_iter().map(|message| ThreadedMessage { message, depth: 1 }));
        }
    }
    Ok(assembly)
}

#[cfg(test)]
mod threads_tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_thread_view_puts_parent_first() {
        let parent: Ts = "100.000000".parse().unwrap();
        let messages: Vec<Message> = serde_json::from_value(json!([
            {"ts": "102.000000", "thread_ts": "100.000000", "text": "b"},
            {"ts": "100.000000", "thread_ts": "100.000000", "reply_count": 2, "text": "p"},
            {"ts": "101.000000", "thread_ts": "100.000000", "text": "a"},
        ]))
        .unwrap();
        let view = thread_view(messages, parent);
        let layout: Vec<(String, u8)> = view
            .iter()
            .map(|t| (t.message.text.clone(), t.depth))
            .collect();
        assert_eq!(
            layout,
            vec![("p".to_string(), 0), ("a".to_string(), 1), ("b".to_string(), 1)]
        );
    }
}
