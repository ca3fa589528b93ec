use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::cache::directory::ConversationDirectory;
use crate::cache::identity::IdentityCache;
use crate::cache::store::{CacheStore, Clock, SystemClock};
use crate::core::config::{AppConfig, SelectedOrg};
use crate::errors::SlackError;
use crate::slack::api::SlackApi;
use crate::slack::client::SlackClient;
use crate::slack::transport::{RetryPolicy, Transport};
use crate::utils::time_window::Zone;

/// Everything one command needs: transport, both caches, the clock and the zone.
pub struct SlackContext {
    pub org: String,
    pub transport: Transport,
    pub directory: ConversationDirectory,
    pub identities: IdentityCache,
    pub clock: Arc<dyn Clock>,
    pub zone: Zone,
    pub concurrency: usize,
}

/// Knobs for [`SlackContext::new`], normally filled from the config file.
#[derive(Debug, Clone)]
pub struct ContextOptions {
    pub cache_root: std::path::PathBuf,
    pub conversations_ttl: Duration,
    pub users_ttl: Duration,
    pub retry: RetryPolicy,
    pub concurrency: usize,
    pub zone: Zone,
}

impl ContextOptions {
    /// # Errors
    ///
    /// `ConfigError` for an unknown timezone.
    pub fn from_config(config: &AppConfig) -> Result<Self, SlackError> {
        Ok(Self {
            cache_root: config.cache_root(),
            conversations_ttl: config.conversations_ttl(),
            users_ttl: config.users_ttl(),
            retry: RetryPolicy::from(&config.retry),
            concurrency: config.fetch.concurrency.max(1),
            zone: config.timezone()?.map_or(Zone::System, Zone::Named),
        })
    }
}

impl SlackContext {
    #[must_use]
    pub fn new(
        org: &str,
        api: Arc<dyn SlackApi>,
        clock: Arc<dyn Clock>,
        options: ContextOptions,
        cancel: CancellationToken,
    ) -> Self {
        let transport = Transport::new(api, options.retry, cancel);
        let store = CacheStore::new(&options.cache_root, org);
        Self {
            org: org.to_string(),
            directory: ConversationDirectory::new(
                transport.clone(),
                store.clone(),
                Arc::clone(&clock),
                options.conversations_ttl,
                options.concurrency,
            ),
            identities: IdentityCache::new(
                transport.clone(),
                store,
                Arc::clone(&clock),
                options.users_ttl,
                options.concurrency,
            ),
            transport,
            clock,
            zone: options.zone,
            concurrency: options.concurrency,
        }
    }

    /// Build a context talking to the real Slack API for the selected org.
    ///
    /// # Errors
    ///
    /// `ConfigError` for bad settings, `HttpError` if the HTTP client cannot be built.
    pub fn connect(
        config: &AppConfig,
        org: &SelectedOrg,
        cancel: CancellationToken,
    ) -> Result<Self, SlackError> {
        let client = SlackClient::new(
            org.token.clone(),
            Some(&config.fetch.api_base_url),
            Duration::from_secs(config.fetch.timeout_secs),
        )?;
        Ok(Self::new(
            &org.name,
            Arc::new(client),
            Arc::new(SystemClock),
            ContextOptions::from_config(config)?,
            cancel,
        ))
    }
}
