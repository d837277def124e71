// Cache store for reading and writing cached API responses.
// Handles JSON entries, TTL checks, atomic temp-file writes, and sweeping.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::config::Config;

use super::key::CacheKey;
use super::paths;

/// Temp files older than this are leftovers from crashed writers.
const ORPHAN_AGE: Duration = Duration::from_secs(60 * 60);

/// Internal cache failure. Never escapes the store as a hard error.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache disabled")]
    Disabled,

    #[error("cache IO error: {0}")]
    Io(#[from] io::Error),

    #[error("corrupt cache entry: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// One memoized response as persisted on disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheEntry {
    /// Key the entry was written under.
    pub key: String,
    /// The response body, stored verbatim.
    pub payload: String,
    /// When the entry was written.
    pub stored_at: DateTime<Utc>,
    /// Lifetime in seconds.
    pub ttl_secs: u64,
}

impl CacheEntry {
    pub fn new(key: &CacheKey, payload: impl Into<String>, ttl: Duration) -> Self {
        Self {
            key: key.to_string(),
            payload: payload.into(),
            stored_at: Utc::now(),
            ttl_secs: ttl.as_secs(),
        }
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    /// Valid while `now - stored_at < ttl`.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        match now.signed_duration_since(self.stored_at).to_std() {
            Ok(age) => age < self.ttl(),
            // Stored "in the future" (clock skew): treat as fresh.
            Err(_) => true,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        !self.is_valid_at(now)
    }
}

/// Result of a cache lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Hit(String),
    Miss,
}

impl Lookup {
    pub fn is_hit(&self) -> bool {
        matches!(self, Lookup::Hit(_))
    }
}

/// Counts from one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepStats {
    pub examined: usize,
    pub removed: usize,
    pub failed: usize,
}

/// File-backed TTL cache.
///
/// Writers never modify an entry in place: they write a uniquely named temp
/// file next to it and rename it over the old one, so readers in this or any
/// other process see either the old or the new document, never a mix.
#[derive(Debug, Clone)]
pub struct CacheStore {
    root: Option<PathBuf>,
}

impl CacheStore {
    /// Open a store rooted at `root`, degrading to disabled if it is unusable.
    pub fn open(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        match check_writable(&root) {
            Ok(()) => {
                debug!(root = %root.display(), "Cache enabled");
                Self { root: Some(root) }
            }
            Err(e) => {
                warn!(root = %root.display(), error = %e, "Cache root not writable, caching disabled");
                Self::disabled()
            }
        }
    }

    /// A store where every lookup misses and every write is dropped.
    pub fn disabled() -> Self {
        Self { root: None }
    }

    /// Open the store described by `config`.
    pub fn from_config(config: &Config) -> Self {
        if !config.enable_cache {
            debug!("Caching disabled by configuration");
            return Self::disabled();
        }
        match paths::resolve_root(config) {
            Some(root) => Self::open(root),
            None => {
                warn!("No cache directory available, caching disabled");
                Self::disabled()
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.root.is_some()
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    /// Look up `key`; any IO or decoding problem is a miss.
    pub fn get(&self, key: &CacheKey) -> Lookup {
        self.get_at(key, Utc::now())
    }

    /// Look up `key` as of `now`.
    pub fn get_at(&self, key: &CacheKey, now: DateTime<Utc>) -> Lookup {
        let Some(root) = &self.root else {
            return Lookup::Miss;
        };

        match read_entry(&paths::entry_path(root, key)) {
            Ok(Some(entry)) if entry.key != key.as_str() => {
                debug!(%key, "Cache entry key mismatch, ignoring");
                Lookup::Miss
            }
            Ok(Some(entry)) if entry.is_valid_at(now) => {
                trace!(%key, "Cache hit");
                Lookup::Hit(entry.payload)
            }
            Ok(Some(_)) => {
                trace!(%key, "Cache entry expired");
                Lookup::Miss
            }
            Ok(None) => Lookup::Miss,
            Err(e) => {
                debug!(%key, error = %e, "Cache read failed, treating as miss");
                Lookup::Miss
            }
        }
    }

    /// Store `payload` under `key`. Failures are logged and swallowed.
    pub fn put(&self, key: &CacheKey, payload: &str, ttl: Duration) {
        match self.try_put(key, payload, ttl) {
            Ok(()) | Err(CacheError::Disabled) => {}
            Err(e) => debug!(%key, error = %e, "Cache write failed"),
        }
    }

    /// Store `payload` under `key`, reporting failure.
    pub fn try_put(&self, key: &CacheKey, payload: &str, ttl: Duration) -> Result<(), CacheError> {
        let root = self.root.as_ref().ok_or(CacheError::Disabled)?;
        let entry = CacheEntry::new(key, payload, ttl);
        write_entry(root, key, &entry)
    }

    /// Remove the entry for `key`, if present.
    pub fn invalidate(&self, key: &CacheKey) {
        let Some(root) = &self.root else {
            return;
        };
        match fs::remove_file(paths::entry_path(root, key)) {
            Ok(()) => debug!(%key, "Cache entry invalidated"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => debug!(%key, error = %e, "Cache invalidation failed"),
        }
    }

    /// Remove every expired, corrupt, or orphaned file.
    pub fn sweep(&self) -> SweepStats {
        self.sweep_at(Utc::now())
    }

    /// Sweep as of `now`.
    pub fn sweep_at(&self, now: DateTime<Utc>) -> SweepStats {
        let mut stats = SweepStats::default();
        let Some(root) = &self.root else {
            return stats;
        };

        let dir = match fs::read_dir(paths::entries_dir(root)) {
            Ok(dir) => dir,
            Err(e) => {
                debug!(error = %e, "Cache sweep skipped");
                return stats;
            }
        };

        for item in dir.flatten() {
            let path = item.path();
            let name = item.file_name().to_string_lossy().into_owned();

            let stale = if paths::is_temp_name(&name) {
                is_orphaned(&path)
            } else if paths::is_entry_name(&name) {
                stats.examined += 1;
                match read_entry(&path) {
                    Ok(Some(entry)) => entry.is_expired_at(now),
                    Ok(None) => false,
                    Err(_) => true,
                }
            } else {
                false
            };

            if stale {
                match fs::remove_file(&path) {
                    Ok(()) => stats.removed += 1,
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => {
                        debug!(path = %path.display(), error = %e, "Cache sweep could not remove file");
                        stats.failed += 1;
                    }
                }
            }
        }

        info!(
            examined = stats.examined,
            removed = stats.removed,
            failed = stats.failed,
            "Cache sweep finished"
        );
        stats
    }

    /// Sweep only if the last sweep is older than `interval`.
    pub fn sweep_if_due(&self, interval: Duration) -> Option<SweepStats> {
        let root = self.root.as_ref()?;
        let marker = paths::sweep_marker(root);

        let due = match fs::metadata(&marker).and_then(|m| m.modified()) {
            Ok(modified) => {
                SystemTime::now()
                    .duration_since(modified)
                    .unwrap_or(Duration::ZERO)
                    >= interval
            }
            Err(_) => true,
        };
        if !due {
            return None;
        }

        let stats = self.sweep();
        if let Err(e) = fs::write(&marker, Utc::now().to_rfc3339()) {
            debug!(error = %e, "Could not update sweep marker");
        }
        Some(stats)
    }

    /// Remove every committed entry. Returns how many were removed.
    pub fn clear(&self) -> usize {
        let Some(root) = &self.root else {
            return 0;
        };
        let Ok(dir) = fs::read_dir(paths::entries_dir(root)) else {
            return 0;
        };

        let mut removed = 0;
        for item in dir.flatten() {
            let name = item.file_name().to_string_lossy().into_owned();
            if paths::is_entry_name(&name) && fs::remove_file(item.path()).is_ok() {
                removed += 1;
            }
        }
        info!(removed, "Cache cleared");
        removed
    }
}

/// Create the entries directory and check that files can be written there.
fn check_writable(root: &Path) -> io::Result<()> {
    let dir = paths::entries_dir(root);
    fs::create_dir_all(&dir)?;
    let scratch = dir.join(format!(".writable-{}.tmp", uuid::Uuid::new_v4().simple()));
    fs::write(&scratch, b"")?;
    fs::remove_file(&scratch)
}

fn read_entry(path: &Path) -> Result<Option<CacheEntry>, CacheError> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    Ok(Some(serde_json::from_str(&contents)?))
}

fn write_entry(root: &Path, key: &CacheKey, entry: &CacheEntry) -> Result<(), CacheError> {
    let json = serde_json::to_vec(entry)?;
    fs::create_dir_all(paths::entries_dir(root))?;

    let temp_path = paths::temp_path(root, key);
    let written = (|| -> io::Result<()> {
        let mut file = fs::File::create(&temp_path)?;
        file.write_all(&json)?;
        file.sync_all()?;
        fs::rename(&temp_path, paths::entry_path(root, key))
    })();

    if let Err(e) = written {
        let _ = fs::remove_file(&temp_path);
        return Err(e.into());
    }
    Ok(())
}

fn is_orphaned(path: &Path) -> bool {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .is_some_and(|age| age > ORPHAN_AGE)
}
