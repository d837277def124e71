// Cache module for local filesystem caching.
// Stores GitHub API responses under hashed request keys with per-entry TTLs.

pub mod key;
pub mod paths;
pub mod store;

pub use key::CacheKey;
pub use store::{CacheEntry, CacheError, CacheStore, Lookup, SweepStats};
