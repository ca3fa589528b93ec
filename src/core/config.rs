//! Configuration file loading and org selection.
//!
//! The file is TOML:
//!
//! ```toml
//! default_org = "acme"
//! timezone = "Europe/Berlin"
//!
//! [orgs.acme]
//! token = "xoxp-..."
//!
//! [cache]
//! conversations_ttl_hours = 6
//!
//! [retry]
//! max_attempts = 5
//! ```

use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::errors::SlackError;

pub const CONFIG_ENV: &str = "SLACKCLI_CONFIG";
pub const TOKEN_ENV: &str = "SLACK_TOKEN";
pub const DEFAULT_API_BASE_URL: &str = "https://slack.com/api";
const IMPLICIT_ORG: &str = "default";

#[derive(Debug, Clone, Deserialize)]
pub struct OrgConfig {
    pub token: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub dir: Option<PathBuf>,
    pub conversations_ttl_hours: u64,
    pub users_ttl_hours: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: None,
            conversations_ttl_hours: 6,
            users_ttl_hours: 24,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_transient_attempts: u32,
    pub transient_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 1_000,
            max_transient_attempts: 3,
            transient_delay_ms: 250,
            max_delay_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub concurrency: usize,
    pub timeout_secs: u64,
    pub api_base_url: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            timeout_secs: 30,
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub default_org: Option<String>,
    pub timezone: Option<String>,
    pub orgs: BTreeMap<String, OrgConfig>,
    pub cache: CacheConfig,
    pub retry: RetryConfig,
    pub fetch: FetchConfig,
}

/// The org a command runs against.
#[derive(Debug, Clone)]
pub struct SelectedOrg {
    pub name: String,
    pub token: String,
}

impl AppConfig {
    /// Default location: `<config_dir>/slackcli/config.toml`.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("slackcli").join("config.toml"))
    }

    /// # Errors
    ///
    /// Returns `ConfigError` if the file cannot be read or is not valid TOML.
    pub fn from_toml_str(raw: &str) -> Result<Self, SlackError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from an explicit path, `SLACKCLI_CONFIG`, or the default location.
    /// A missing file yields the empty config so that `SLACK_TOKEN` alone is enough.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file exists but cannot be read or parsed.
    pub fn load(path: Option<&Path>) -> Result<Self, SlackError> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| env::var_os(CONFIG_ENV).map(PathBuf::from))
            .or_else(Self::default_path);
        let Some(path) = path else {
            return Ok(Self::default());
        };
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(&path)
            .map_err(|e| SlackError::ConfigError(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&raw)
            .map_err(|e| SlackError::ConfigError(format!("{}: {e}", path.display())))
    }

    fn validate(&self) -> Result<(), SlackError> {
        if self.fetch.concurrency == 0 {
            return Err(SlackError::ConfigError(
                "fetch.concurrency must be at least 1".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 || self.retry.max_transient_attempts == 0 {
            return Err(SlackError::ConfigError(
                "retry attempt budgets must be at least 1".to_string(),
            ));
        }
        if let Some(default_org) = &self.default_org
            && !self.orgs.contains_key(default_org)
        {
            return Err(SlackError::ConfigError(format!(
                "default_org '{default_org}' has no [orgs.{default_org}] section"
            )));
        }
        self.timezone()?;
        Ok(())
    }

    /// Pick the org by explicit name, then `default_org`, then the only configured org.
    /// `token_override` (normally `SLACK_TOKEN`) replaces the selected org's token, and
    /// stands in for a missing config entirely.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if no org can be selected or the named org is unknown.
    pub fn select_org(
        &self,
        requested: Option<&str>,
        token_override: Option<String>,
    ) -> Result<SelectedOrg, SlackError> {
        let name = match requested {
            Some(name) => Some(name.to_string()),
            None => self.default_org.clone().or_else(|| {
                if self.orgs.len() == 1 {
                    self.orgs.keys().next().cloned()
                } else {
                    None
                }
            }),
        };

        match (name, token_override) {
            (Some(name), Some(token)) => Ok(SelectedOrg { name, token }),
            (None, Some(token)) if self.orgs.is_empty() => Ok(SelectedOrg {
                name: IMPLICIT_ORG.to_string(),
                token,
            }),
            (Some(name), None) => match self.orgs.get(&name) {
                Some(org) => Ok(SelectedOrg {
                    name,
                    token: org.token.clone(),
                }),
                None => Err(SlackError::ConfigError(format!("unknown org '{name}'"))),
            },
            (None, _) if self.orgs.is_empty() => Err(SlackError::ConfigError(format!(
                "no orgs configured and {TOKEN_ENV} is not set"
            ))),
            (None, _) => Err(SlackError::ConfigError(
                "several orgs configured; pass --org or set default_org".to_string(),
            )),
        }
    }

    /// Whether `name` is a configured org.
    #[must_use]
    pub fn has_org(&self, name: &str) -> bool {
        self.orgs.contains_key(name)
    }

    /// The configured IANA zone, or `None` for the system zone.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` for an unknown zone name.
    pub fn timezone(&self) -> Result<Option<chrono_tz::Tz>, SlackError> {
        self.timezone
            .as_deref()
            .map(|name| {
                name.parse::<chrono_tz::Tz>()
                    .map_err(|_| SlackError::ConfigError(format!("unknown timezone '{name}'")))
            })
            .transpose()
    }

    /// Root of all on-disk caches.
    #[must_use]
    pub fn cache_root(&self) -> PathBuf {
        self.cache.dir.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(env::temp_dir)
                .join("slackcli")
        })
    }

    #[must_use]
    pub fn conversations_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.conversations_ttl_hours * 3_600)
    }

    #[must_use]
    pub fn users_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.users_ttl_hours * 3_600)
    }
}

#[cfg(test)]
mod config_tests {
    use super::*;

    const TWO_ORGS: &str = r#"
        default_org = "acme"

        [orgs.acme]
        token = "xoxp-acme"

        [orgs.globex]
        token = "xoxp-globex"
    "#;

    #[test]
    fn test_defaults_apply_to_missing_sections() {
        let config = AppConfig::from_toml_str("[orgs.solo]\ntoken = \"t\"\n").unwrap();
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.fetch.concurrency, 4);
        assert_eq!(config.conversations_ttl(), Duration::from_secs(6 * 3_600));
        assert_eq!(config.users_ttl(), Duration::from_secs(24 * 3_600));
    }

    #[test]
    fn test_select_org_prefers_explicit_then_default() {
        let config = AppConfig::from_toml_str(TWO_ORGS).unwrap();
        assert_eq!(config.select_org(None, None).unwrap().token, "xoxp-acme");
        assert_eq!(
            config.select_org(Some("globex"), None).unwrap().token,
            "xoxp-globex"
        );
        assert!(config.select_org(Some("initech"), None).is_err());
    }

    #[test]
    fn test_single_org_is_implicit_default() {
        let config = AppConfig::from_toml_str("[orgs.solo]\ntoken = \"t\"\n").unwrap();
        assert_eq!(config.select_org(None, None).unwrap().name, "solo");
    }

    #[test]
    fn test_token_override_without_config() {
        let config = AppConfig::default();
        let org = config.select_org(None, Some("xoxp-env".into())).unwrap();
        assert_eq!(org.name, "default");
        assert_eq!(org.token, "xoxp-env");
        assert!(config.select_org(None, None).is_err());
    }

    #[test]
    fn test_rejects_unknown_default_org_and_timezone() {
        assert!(AppConfig::from_toml_str("default_org = \"nope\"").is_err());
        assert!(AppConfig::from_toml_str("timezone = \"Mars/Olympus\"").is_err());
        let config = AppConfig::from_toml_str("timezone = \"Asia/Tokyo\"").unwrap();
        assert_eq!(config.timezone().unwrap(), Some(chrono_tz::Asia::Tokyo));
    }
}
