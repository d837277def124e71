// pipekit library root.
// Cached, rate-limited GitHub API access with a bounded parallel runner and workflow analysis.

pub mod analyze;
pub mod cache;
pub mod config;
pub mod error;
pub mod github;
pub mod logging;
pub mod redact;
pub mod report;
pub mod runner;

pub use analyze::{AnalysisReport, AnalyzeOptions, RepoRef, analyze_repositories};
pub use cache::{CacheKey, CacheStore, Lookup};
pub use config::{Config, ConfigLoader, LogLevel, OutputFormat, load_config};
pub use error::{ApiError, ConfigError, ConfigErrors, PipekitError, Result, TaskError};
pub use github::{ApiRequest, ApiResponse, GitHubClient, HttpTransport, Transport};
pub use runner::{RunnerSettings, TaskOutcome, run_all};

pub const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");
