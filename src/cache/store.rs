//! On-disk JSON cache envelopes.
//!
//! Layout: `<root>/<org>/<name>.json`, each file a [`CacheEnvelope`]. Writes go to a
//! uniquely named temp file that is renamed into place, so a reader sees either the
//! old envelope or the new one. Unreadable files are deleted and count as a miss.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::SlackError;

pub const CACHE_FORMAT_VERSION: u32 = 1;

/// Characters kept as-is in path components built from org names and ids.
const PATH_SAFE: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_');

/// Source of "now" for every freshness decision.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += chrono::Duration::from_std(by).unwrap_or_else(|_| chrono::Duration::zero());
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEnvelope<T> {
    pub version: u32,
    pub fetched_at: DateTime<Utc>,
    pub ttl_secs: u64,
    pub payload: T,
}

impl<T> CacheEnvelope<T> {
    #[must_use]
    pub fn new(payload: T, fetched_at: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            version: CACHE_FORMAT_VERSION,
            fetched_at,
            ttl_secs: ttl.as_secs(),
            payload,
        }
    }

    /// `now - fetched_at <= ttl`. An envelope from the future is treated as stale.
    #[must_use]
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(self.fetched_at);
        let ttl = chrono::Duration::seconds(i64::try_from(self.ttl_secs).unwrap_or(i64::MAX / 1_000));
        age >= chrono::Duration::zero() && age <= ttl
    }
}

/// Escape a name for use as a single path component.
#[must_use]
pub fn path_component(name: &str) -> String {
    utf8_percent_encode(name, PATH_SAFE).to_string()
}

/// One org's cache directory.
#[derive(Debug, Clone)]
pub struct CacheStore {
    dir: PathBuf,
}

impl CacheStore {
    #[must_use]
    pub fn new(root: &Path, org: &str) -> Self {
        Self {
            dir: root.join(path_component(org)),
        }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, name: &str) -> PathBuf {
        let mut path = self.dir.clone();
        for part in name.split('/') {
            path.push(path_component(part));
        }
        path.set_extension("json");
        path
    }

    /// Read an envelope regardless of freshness. Missing, corrupt or version-mismatched
    /// files are a miss; corrupt ones are removed.
    #[must_use]
    pub fn read<T: DeserializeOwned>(&self, name: &str) -> Option<CacheEnvelope<T>> {
        let path = self.path_for(name);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read cache file");
                return None;
            }
        };
        match serde_json::from_slice::<CacheEnvelope<T>>(&bytes) {
            Ok(envelope) if envelope.version == CACHE_FORMAT_VERSION => Some(envelope),
            Ok(envelope) => {
                debug!(path = %path.display(), version = envelope.version, "Ignoring cache file from another format version");
                None
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Discarding corrupt cache file");
                let _ = fs::remove_file(&path);
                None
            }
        }
    }

    /// Atomically replace the named envelope.
    ///
    /// # Errors
    ///
    /// Returns `CacheError` if the directory or file cannot be written.
    pub fn write<T: Serialize>(&self, name: &str, envelope: &CacheEnvelope<T>) -> Result<(), SlackError> {
        let path = self.path_for(name);
        let parent = path.parent().unwrap_or(&self.dir);
        fs::create_dir_all(parent)?;

        let bytes = serde_json::to_vec(envelope)
            .map_err(|e| SlackError::CacheError(format!("serialize {name}: {e}")))?;
        let temp = parent.join(format!(".{}.tmp", uuid::Uuid::new_v4()));
        fs::write(&temp, bytes)?;
        if let Err(e) = fs::rename(&temp, &path) {
            let _ = fs::remove_file(&temp);
            return Err(SlackError::CacheError(format!("replace {}: {e}", path.display())));
        }
        debug!(path = %path.display(), "Cache file written");
        Ok(())
    }
}

#[cfg(test)]
mod store_tests {
    use super::*;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-05-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_freshness_boundaries() {
        let envelope = CacheEnvelope::new(1u8, t0(), Duration::from_secs(6 * 3_600));
        let minutes = |m: i64| t0() + chrono::Duration::minutes(m);
        assert!(envelope.is_fresh(t0()));
        assert!(envelope.is_fresh(minutes(5 * 60 + 59)));
        assert!(envelope.is_fresh(minutes(6 * 60)));
        assert!(!envelope.is_fresh(minutes(6 * 60 + 1)));
        assert!(!envelope.is_fresh(minutes(-1)));
    }

    #[test]
    fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path(), "acme");
        let envelope = CacheEnvelope::new(vec!["a".to_string()], t0(), Duration::from_secs(60));
        store.write("users/U1", &envelope).unwrap();

        let back: CacheEnvelope<Vec<String>> = store.read("users/U1").unwrap();
        assert_eq!(back.payload, vec!["a".to_string()]);
        assert_eq!(back.fetched_at, t0());
        assert!(dir.path().join("acme").join("users").join("U1.json").exists());
    }

    #[test]
    fn test_no_temp_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path(), "acme");
        store
            .write("conversations", &CacheEnvelope::new(1u32, t0(), Duration::from_secs(1)))
            .unwrap();
        let leftovers: Vec<_> = fs::read_dir(store.dir())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_corrupt_file_is_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path(), "acme");
        fs::create_dir_all(store.dir()).unwrap();
        let path = store.dir().join("conversations.json");
        fs::write(&path, b"{not json").unwrap();

        assert!(store.read::<u32>("conversations").is_none());
        assert!(!path.exists());
    }

    #[test]
    fn test_org_names_are_escaped() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path(), "../evil org");
        assert_eq!(store.dir(), dir.path().join("%2E%2E%2Fevil%20org"));
    }

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::new(t0());
        clock.advance(Duration::from_secs(90));
        assert_eq!(clock.now(), t0() + chrono::Duration::seconds(90));
    }
}
