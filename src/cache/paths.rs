// Cache path utilities.
// Resolves the cache root and lays out entry, temp, and marker files beneath it.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use uuid::Uuid;

use crate::config::Config;

use super::key::CacheKey;

/// Get the platform cache directory (~/.cache/pipekit on Linux).
pub fn cache_dir() -> Option<PathBuf> {
    ProjectDirs::from("", "", "pipekit").map(|dirs| dirs.cache_dir().to_path_buf())
}

/// Cache root for this configuration: `CACHE_DIR` if set, else the platform default.
pub fn resolve_root(config: &Config) -> Option<PathBuf> {
    config.cache_dir.clone().or_else(cache_dir)
}

/// Directory holding one JSON document per cache key.
pub fn entries_dir(root: &Path) -> PathBuf {
    root.join("entries")
}

/// Path to the entry stored under `key`.
pub fn entry_path(root: &Path, key: &CacheKey) -> PathBuf {
    entries_dir(root).join(format!("{}.json", key))
}

/// Unique sibling of the entry path used while writing it.
///
/// Lives in the same directory so the final rename never crosses filesystems.
pub fn temp_path(root: &Path, key: &CacheKey) -> PathBuf {
    entries_dir(root).join(format!(".{}.{}.tmp", key, Uuid::new_v4().simple()))
}

/// Marker whose modification time records the last sweep.
pub fn sweep_marker(root: &Path) -> PathBuf {
    root.join(".last_sweep")
}

/// Whether a file name inside the entries directory is an in-flight write.
pub fn is_temp_name(name: &str) -> bool {
    name.starts_with('.') && name.ends_with(".tmp")
}

/// Whether a file name inside the entries directory is a committed entry.
pub fn is_entry_name(name: &str) -> bool {
    !name.starts_with('.') && name.ends_with(".json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_paths() {
        let root = Path::new("/var/cache/pipekit");
        let key = CacheKey::derive("/repos/octo/hello/actions/runs", [("per_page", "10")]);

        let entry = entry_path(root, &key);
        assert!(entry.starts_with("/var/cache/pipekit/entries"));
        assert!(entry.to_string_lossy().ends_with(&format!("{}.json", key)));

        let first = temp_path(root, &key);
        let second = temp_path(root, &key);
        assert_ne!(first, second);
        assert_eq!(first.parent(), entry.parent());

        assert!(sweep_marker(root).ends_with(".last_sweep"));
    }

    #[test]
    fn test_name_classification() {
        assert!(is_entry_name("abc123.json"));
        assert!(!is_entry_name(".abc123.ff00.tmp"));
        assert!(is_temp_name(".abc123.ff00.tmp"));
        assert!(!is_temp_name("abc123.json"));
    }

    #[test]
    fn test_explicit_cache_dir_wins() {
        let config = Config {
            cache_dir: Some(PathBuf::from("/tmp/custom-cache")),
            ..Config::default()
        };
        assert_eq!(resolve_root(&config), Some(PathBuf::from("/tmp/custom-cache")));
    }
}
