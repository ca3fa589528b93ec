//! Conversation directory: every channel, group and DM the token can see.
//!
//! The whole list is one snapshot, held in memory and in the org's
//! `conversations` envelope. Freshness is checked on every read against the
//! injected clock. Refreshes take an exclusive section, so concurrent callers
//! that all find the snapshot stale cause a single `conversations.list` walk.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, Mutex, PoisonError};
use std::time::Duration;

use futures::StreamExt;
use futures::stream;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::cache::identity::IdentityCache;
use crate::cache::store::{CacheEnvelope, CacheStore, Clock};
use crate::core::models::{Conversation, ConversationKind};
use crate::errors::SlackError;
use crate::slack::api::ApiRequest;
use crate::slack::paginator::CursorPaginator;
use crate::slack::transport::Transport;
use crate::utils::filters::{ConversationFilter, filter_conversations};

const CONVERSATIONS: &str = "conversations";
const CONVERSATION_TYPES: &str = "public_channel,private_channel,mpim,im";
const LIST_PAGE_SIZE: usize = 1_000;
const MEMBERS_PAGE_SIZE: usize = 100;

static CONVERSATION_ID_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[CDG][A-Z0-9]{2,}$").ok());

/// Whether `s` looks like a conversation id rather than a name.
#[must_use]
pub fn is_conversation_id(s: &str) -> bool {
    CONVERSATION_ID_RE.as_ref().is_some_and(|re| re.is_match(s))
}

#[derive(Debug, Deserialize)]
struct TextValue {
    #[serde(default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct RawConversation {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    is_im: bool,
    #[serde(default)]
    is_mpim: bool,
    #[serde(default)]
    is_private: bool,
    #[serde(default)]
    is_group: bool,
    #[serde(default)]
    is_member: bool,
    #[serde(default)]
    is_archived: bool,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    topic: Option<TextValue>,
    #[serde(default)]
    purpose: Option<TextValue>,
    #[serde(default)]
    num_members: Option<u32>,
    #[serde(default)]
    created: Option<i64>,
}

fn non_empty_text(value: Option<TextValue>) -> Option<String> {
    value.map(|t| t.value).filter(|v| !v.is_empty())
}

impl From<RawConversation> for Conversation {
    fn from(raw: RawConversation) -> Self {
        let kind = if raw.is_im {
            ConversationKind::Im
        } else if raw.is_mpim {
            ConversationKind::Mpim
        } else if raw.is_private || raw.is_group {
            ConversationKind::PrivateChannel
        } else {
            ConversationKind::PublicChannel
        };
        Self {
            id: raw.id,
            name: if kind == ConversationKind::Im { None } else { raw.name },
            kind,
            is_member: raw.is_member,
            is_archived: raw.is_archived,
            user: raw.user,
            members: Vec::new(),
            topic: non_empty_text(raw.topic),
            purpose: non_empty_text(raw.purpose),
            num_members: raw.num_members,
            created: raw.created,
        }
    }
}

type Snapshot = Arc<CacheEnvelope<Vec<Conversation>>>;

pub struct ConversationDirectory {
    transport: Transport,
    store: CacheStore,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    concurrency: usize,
    snapshot: Mutex<Option<Snapshot>>,
    refresh_lock: tokio::sync::Mutex<()>,
    generation: AtomicU64,
}

impl ConversationDirectory {
    #[must_use]
    pub fn new(
        transport: Transport,
        store: CacheStore,
        clock: Arc<dyn Clock>,
        ttl: Duration,
        concurrency: usize,
    ) -> Self {
        Self {
            transport,
            store,
            clock,
            ttl,
            concurrency: concurrency.max(1),
            snapshot: Mutex::new(None),
            refresh_lock: tokio::sync::Mutex::new(()),
            generation: AtomicU64::new(0),
        }
    }

    /// How many full refreshes this process has performed.
    #[must_use]
    pub fn refresh_count(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    fn cached(&self) -> Option<Snapshot> {
        self.snapshot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn fresh_cached(&self) -> Option<Snapshot> {
        let now = self.clock.now();
        self.cached().filter(|s| s.is_fresh(now))
    }

    fn install(&self, snapshot: &Snapshot) {
        *self.snapshot.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(snapshot));
    }

    /// Return the snapshot, refreshing first if forced or stale. The flag tells
    /// whether this call's data came from a refresh performed during the call.
    async fn load(&self, force: bool) -> Result<(Snapshot, bool), SlackError> {
        let seen = self.generation.load(Ordering::Acquire);

        if !force {
            if let Some(snapshot) = self.fresh_cached() {
                debug!(conversations = snapshot.payload.len(), "Directory served from memory");
                return Ok((snapshot, false));
            }
            if let Some(envelope) = self.store.read::<Vec<Conversation>>(CONVERSATIONS)
                && envelope.is_fresh(self.clock.now())
            {
                debug!(conversations = envelope.payload.len(), "Directory served from disk cache");
                let snapshot = Arc::new(envelope);
                self.install(&snapshot);
                return Ok((snapshot, false));
            }
        }

        let _guard = self.refresh_lock.lock().await;

        // Someone else refreshed while we waited for the lock.
        if self.generation.load(Ordering::Acquire) != seen
            && let Some(snapshot) = self.cached()
        {
            return Ok((snapshot, true));
        }
        if !force && let Some(snapshot) = self.fresh_cached() {
            return Ok((snapshot, false));
        }

        let conversations = self.fetch_all().await?;
        info!(conversations = conversations.len(), "Refreshed conversation directory");
        let snapshot = Arc::new(CacheEnvelope::new(conversations, self.clock.now(), self.ttl));
        if let Err(e) = self.store.write(CONVERSATIONS, snapshot.as_ref()) {
            warn!(error = %e, "Failed to persist conversation directory");
        }
        self.install(&snapshot);
        self.generation.fetch_add(1, Ordering::AcqRel);
        Ok((snapshot, true))
    }

    async fn fetch_all(&self) -> Result<Vec<Conversation>, SlackError> {
        let request = ApiRequest::read("conversations.list")
            .param("types", CONVERSATION_TYPES)
            .param("exclude_archived", "false");
        let raw: Vec<RawConversation> =
            CursorPaginator::new(&self.transport, request, "channels", LIST_PAGE_SIZE, None)
                .collect_all()
                .await?;
        let mut conversations: Vec<Conversation> = raw.into_iter().map(Conversation::from).collect();

        let mpims: Vec<(usize, String)> = conversations
            .iter()
            .enumerate()
            .filter(|(_, c)| c.kind == ConversationKind::Mpim)
            .map(|(i, c)| (i, c.id.clone()))
            .collect();

        let results: Vec<(usize, Result<Vec<String>, SlackError>)> = stream::iter(mpims)
            .map(|(index, id)| async move { (index, self.fetch_members(&id).await) })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        for (index, result) in results {
            match result {
                Ok(members) => conversations[index].members = members,
                Err(SlackError::Cancelled) => return Err(SlackError::Cancelled),
                Err(e) => warn!(
                    conversation = %conversations[index].id,
                    error = %e,
                    "Failed to fetch group DM members"
                ),
            }
        }
        Ok(conversations)
    }

    async fn fetch_members(&self, id: &str) -> Result<Vec<String>, SlackError> {
        CursorPaginator::new(
            &self.transport,
            ApiRequest::read("conversations.members").param("channel", id),
            "members",
            MEMBERS_PAGE_SIZE,
            None,
        )
        .collect_all()
        .await
    }

    /// All conversations passing `filter`, in directory order.
    ///
    /// # Errors
    ///
    /// Transport errors from a refresh.
    pub async fn list(
        &self,
        filter: &ConversationFilter,
        refresh: bool,
    ) -> Result<Vec<Conversation>, SlackError> {
        let (snapshot, _) = self.load(refresh).await?;
        Ok(filter_conversations(&snapshot.payload, filter))
    }

    /// Turn a human reference into a conversation id.
    ///
    /// Accepts a raw id, `#name` (or a bare name), or `@username` / `@email` for a
    /// DM. A miss against a snapshot that was not fetched during this call triggers
    /// one refresh before giving up.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown channels or missing DMs, and
    /// `AmbiguousOrUnknownRecipient` when a user reference matches zero or several users.
    pub async fn resolve_ref(
        &self,
        human_ref: &str,
        identities: &IdentityCache,
    ) -> Result<String, SlackError> {
        let reference = human_ref.trim();
        if is_conversation_id(reference) {
            return Ok(reference.to_string());
        }

        if reference.starts_with('@') {
            let matches = identities.find_users(reference).await?;
            let [user] = matches.as_slice() else {
                return Err(SlackError::AmbiguousOrUnknownRecipient {
                    query: reference.to_string(),
                    matches: matches.iter().map(|u| format!("@{} ({})", u.label(), u.id)).collect(),
                });
            };
            let user_id = user.id.clone();
            return self
                .find_with_refresh(human_ref, |c| {
                    c.kind == ConversationKind::Im && c.user.as_deref() == Some(user_id.as_str())
                })
                .await;
        }

        let name = reference.trim_start_matches('#');
        if name.is_empty() {
            return Err(SlackError::NotFound(format!("conversation '{human_ref}'")));
        }
        self.find_with_refresh(human_ref, |c| {
            c.name.as_deref().is_some_and(|n| n.eq_ignore_ascii_case(name))
        })
        .await
    }

    async fn find_with_refresh<F>(&self, human_ref: &str, predicate: F) -> Result<String, SlackError>
    where
        F: Fn(&Conversation) -> bool,
    {
        let (snapshot, refreshed) = self.load(false).await?;
        if let Some(found) = snapshot.payload.iter().find(|c| predicate(c)) {
            return Ok(found.id.clone());
        }
        if !refreshed {
            debug!(reference = %human_ref, "Reference missed cached directory, refreshing");
            let (snapshot, _) = self.load(true).await?;
            if let Some(found) = snapshot.payload.iter().find(|c| predicate(c)) {
                return Ok(found.id.clone());
            }
        }
        Err(SlackError::NotFound(format!("conversation '{human_ref}'")))
    }
}
