//! Identity cache: user and channel ids to display labels.
//!
//! Entries live in memory and in per-id envelopes under `users/` and `channels/`.
//! An entry older than the TTL counts as absent. Concurrent lookups of the same id
//! share one in-flight request. A failed lookup falls back to the expired entry if
//! there is one, else the caller gets the raw id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::StreamExt;
use futures::stream;
use regex::Regex;
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::cache::store::{CacheEnvelope, CacheStore, Clock};
use crate::core::models::{Conversation, Identity, IdentityKey, IdentityKind, UserInfo};
use crate::errors::SlackError;
use crate::slack::api::ApiRequest;
use crate::slack::paginator::CursorPaginator;
use crate::slack::transport::Transport;

const USER_DIRECTORY: &str = "user_directory";
const USERS_PAGE_SIZE: usize = 200;

static USER_ID_RE: std::sync::LazyLock<Option<Regex>> =
    std::sync::LazyLock::new(|| Regex::new(r"^[UW][A-Z0-9]{2,}$").ok());

#[derive(Debug, Clone)]
enum Lookup {
    Found(Identity),
    Missing,
    Cancelled,
}

type Entry = CacheEnvelope<Identity>;

pub struct IdentityCache {
    transport: Transport,
    store: CacheStore,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    concurrency: usize,
    entries: Mutex<HashMap<IdentityKey, Entry>>,
    in_flight: Mutex<HashMap<IdentityKey, Arc<OnceCell<Lookup>>>>,
    directory: tokio::sync::Mutex<Option<CacheEnvelope<Arc<Vec<UserInfo>>>>>,
    network_lookups: AtomicUsize,
}

fn entry_name(key: &IdentityKey) -> String {
    match key.kind {
        IdentityKind::User => format!("users/{}", key.id),
        IdentityKind::Channel => format!("channels/{}", key.id),
    }
}

impl IdentityCache {
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
            entries: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
            directory: tokio::sync::Mutex::new(None),
            network_lookups: AtomicUsize::new(0),
        }
    }

    /// Number of `users.info` / `conversations.info` calls issued so far.
    #[must_use]
    pub fn network_lookups(&self) -> usize {
        self.network_lookups.load(Ordering::Relaxed)
    }

    fn fresh_entry(&self, key: &IdentityKey) -> Option<Identity> {
        let now = self.clock.now();
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .filter(|e| e.is_fresh(now))
            .map(|e| e.payload.clone())
    }

    fn remember(&self, key: IdentityKey, label: String) -> Identity {
        let now = self.clock.now();
        let identity = Identity {
            id: key.id.clone(),
            kind: key.kind,
            label,
            resolved_at: now,
        };
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, CacheEnvelope::new(identity.clone(), now, self.ttl));
        identity
    }

    /// Prime channel labels from a conversation directory snapshot. Direct
    /// conversations have no name and are skipped.
    pub fn seed_channels(&self, conversations: &[Conversation]) {
        for conversation in conversations {
            if let Some(name) = &conversation.name {
                self.remember(IdentityKey::channel(conversation.id.as_str()), name.clone());
            }
        }
    }

    fn seed_users(&self, users: &[UserInfo]) {
        for user in users {
            self.remember(IdentityKey::user(user.id.as_str()), user.label().to_string());
        }
    }

    /// Look up one identity: memory, then disk, then one shared network request.
    /// `Ok(None)` means it could not be resolved.
    ///
    /// # Errors
    ///
    /// Only `Cancelled`.
    pub async fn lookup(&self, key: &IdentityKey) -> Result<Option<Identity>, SlackError> {
        if let Some(identity) = self.fresh_entry(key) {
            return Ok(Some(identity));
        }

        let cell = {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            // A finished lookup stores its entry before leaving `in_flight`.
            if let Some(identity) = self.fresh_entry(key) {
                return Ok(Some(identity));
            }
            Arc::clone(
                in_flight
                    .entry(key.clone())
                    .or_insert_with(|| Arc::new(OnceCell::new())),
            )
        };

        let outcome = cell.get_or_init(|| self.load(key)).await.clone();

        {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            if in_flight.get(key).is_some_and(|c| Arc::ptr_eq(c, &cell)) {
                in_flight.remove(key);
            }
        }

        match outcome {
            Lookup::Found(identity) => Ok(Some(identity)),
            Lookup::Missing => Ok(None),
            Lookup::Cancelled => Err(SlackError::Cancelled),
        }
    }

    async fn load(&self, key: &IdentityKey) -> Lookup {
        let name = entry_name(key);
        let on_disk = self.store.read::<Identity>(&name);
        if let Some(envelope) = &on_disk
            && envelope.is_fresh(self.clock.now())
        {
            debug!(id = %key.id, "Identity served from disk cache");
            self.entries
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(key.clone(), envelope.clone());
            return Lookup::Found(envelope.payload.clone());
        }

        self.network_lookups.fetch_add(1, Ordering::Relaxed);
        match self.fetch_label(key).await {
            Ok(Some(label)) => {
                let identity = self.remember(key.clone(), label);
                let envelope = CacheEnvelope::new(identity.clone(), identity.resolved_at, self.ttl);
                if let Err(e) = self.store.write(&name, &envelope) {
                    warn!(id = %key.id, error = %e, "Failed to persist identity");
                }
                Lookup::Found(identity)
            }
            Ok(None) => Lookup::Missing,
            Err(SlackError::Cancelled) => Lookup::Cancelled,
            Err(e) => {
                warn!(id = %key.id, error = %e, "Identity lookup failed");
                match on_disk {
                    Some(stale) => Lookup::Found(stale.payload),
                    None => Lookup::Missing,
                }
            }
        }
    }

    async fn fetch_label(&self, key: &IdentityKey) -> Result<Option<String>, SlackError> {
        match key.kind {
            IdentityKind::User => {
                let body = self
                    .transport
                    .call(&ApiRequest::read("users.info").param("user", &key.id))
                    .await?;
                let user: UserInfo = serde_json::from_value(
                    body.get("user").cloned().unwrap_or(Value::Null),
                )?;
                Ok(Some(user.label().to_string()))
            }
            IdentityKind::Channel => {
                let body = self
                    .transport
                    .call(&ApiRequest::read("conversations.info").param("channel", &key.id))
                    .await?;
                Ok(body
                    .pointer("/channel/name")
                    .and_then(Value::as_str)
                    .filter(|n| !n.is_empty())
                    .map(str::to_string))
            }
        }
    }

    /// Label for an identity, degrading to the raw id.
    ///
    /// # Errors
    ///
    /// Only `Cancelled`.
    pub async fn resolve(&self, key: &IdentityKey) -> Result<String, SlackError> {
        Ok(self
            .lookup(key)
            .await?
            .map_or_else(|| key.id.clone(), |identity| identity.label))
    }

    /// Resolve many identities with bounded concurrency. Duplicates are looked up once.
    ///
    /// # Errors
    ///
    /// Only `Cancelled`.
    pub async fn resolve_many(
        &self,
        keys: Vec<IdentityKey>,
    ) -> Result<HashMap<IdentityKey, String>, SlackError> {
        let mut unique: Vec<IdentityKey> = Vec::with_capacity(keys.len());
        for key in keys {
            if !unique.contains(&key) {
                unique.push(key);
            }
        }

        let results: Vec<Result<(IdentityKey, String), SlackError>> = stream::iter(unique)
            .map(|key| async move {
                let label = self.resolve(&key).await?;
                Ok((key, label))
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        results.into_iter().collect()
    }

    /// Every workspace member, paginated from `users.list` and cached for the TTL.
    ///
    /// # Errors
    ///
    /// Transport errors; unlike single lookups this does not degrade.
    pub async fn user_directory(&self) -> Result<Arc<Vec<UserInfo>>, SlackError> {
        self.load_user_directory(false).await
    }

    /// Refetch the user directory regardless of age.
    ///
    /// # Errors
    ///
    /// Transport errors.
    pub async fn reload_user_directory(&self) -> Result<Arc<Vec<UserInfo>>, SlackError> {
        self.load_user_directory(true).await
    }

    async fn load_user_directory(&self, force: bool) -> Result<Arc<Vec<UserInfo>>, SlackError> {
        let mut guard = self.directory.lock().await;
        let now = self.clock.now();
        if !force
            && let Some(envelope) = guard.as_ref()
            && envelope.is_fresh(now)
        {
            return Ok(Arc::clone(&envelope.payload));
        }

        let cached = if force {
            None
        } else {
            self.store.read::<Vec<UserInfo>>(USER_DIRECTORY)
        };
        let envelope = match cached {
            Some(envelope) if envelope.is_fresh(now) => {
                debug!(users = envelope.payload.len(), "User directory served from disk cache");
                envelope
            }
            _ => {
                let users: Vec<UserInfo> = CursorPaginator::new(
                    &self.transport,
                    ApiRequest::read("users.list"),
                    "members",
                    USERS_PAGE_SIZE,
                    None,
                )
                .collect_all()
                .await?;
                debug!(users = users.len(), "Fetched user directory");

                let envelope = CacheEnvelope::new(users, self.clock.now(), self.ttl);
                if let Err(e) = self.store.write(USER_DIRECTORY, &envelope) {
                    warn!(error = %e, "Failed to persist user directory");
                }
                envelope
            }
        };

        self.seed_users(&envelope.payload);
        let users = Arc::new(envelope.payload);
        *guard = Some(CacheEnvelope {
            version: envelope.version,
            fetched_at: envelope.fetched_at,
            ttl_secs: envelope.ttl_secs,
            payload: Arc::clone(&users),
        });
        Ok(users)
    }

    /// Users matching `@username`, `@email` or a raw user id.
    ///
    /// Exact username matches win over display/real name matches. Deactivated
    /// accounts only show up when nothing active matches.
    ///
    /// # Errors
    ///
    /// Transport errors while loading the user directory.
    pub async fn find_users(&self, query: &str) -> Result<Vec<UserInfo>, SlackError> {
        let needle = query.trim().trim_start_matches('@');
        if needle.is_empty() {
            return Ok(Vec::new());
        }
        let users = self.user_directory().await?;

        let is_id = USER_ID_RE.as_ref().is_some_and(|re| re.is_match(needle));
        let matches: Vec<UserInfo> = if is_id {
            users.iter().filter(|u| u.id == needle).cloned().collect()
        } else if needle.contains('@') {
            users
                .iter()
                .filter(|u| {
                    u.profile
                        .email
                        .as_deref()
                        .is_some_and(|e| e.eq_ignore_ascii_case(needle))
                })
                .cloned()
                .collect()
        } else {
            let eq = |v: Option<&String>| v.is_some_and(|s| s.eq_ignore_ascii_case(needle));
            let by_name: Vec<UserInfo> = users.iter().filter(|u| eq(u.name.as_ref())).cloned().collect();
            if by_name.is_empty() {
                users
                    .iter()
                    .filter(|u| {
                        eq(u.profile.display_name.as_ref())
                            || eq(u.real_name.as_ref())
                            || eq(u.profile.real_name.as_ref())
                    })
                    .cloned()
                    .collect()
            } else {
                by_name
            }
        };

        if matches.iter().any(|u| !u.deleted) {
            Ok(matches.into_iter().filter(|u| !u.deleted).collect())
        } else {
            Ok(matches)
        }
    }
}
