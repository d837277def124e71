// Configuration value types.
// The validated, immutable settings record plus its closed enums.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Serialize, Serializer};

pub const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";

/// Log verbosity, as accepted by `LOG_LEVEL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub const NAMES: &'static str = "DEBUG, INFO, WARN, ERROR";

    /// Directive understood by `tracing_subscriber::EnvFilter`.
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DEBUG" => Ok(LogLevel::Debug),
            "INFO" => Ok(LogLevel::Info),
            "WARN" | "WARNING" => Ok(LogLevel::Warn),
            "ERROR" => Ok(LogLevel::Error),
            _ => Err(format!("must be one of {}", Self::NAMES)),
        }
    }
}

/// Report output format, as accepted by `OUTPUT_FORMAT` and `--format`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Console,
    Json,
    Markdown,
}

impl OutputFormat {
    pub const NAMES: &'static str = "console, json, markdown";
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "console" => Ok(OutputFormat::Console),
            "json" => Ok(OutputFormat::Json),
            "markdown" | "md" => Ok(OutputFormat::Markdown),
            _ => Err(format!("must be one of {}", Self::NAMES)),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OutputFormat::Console => "console",
            OutputFormat::Json => "json",
            OutputFormat::Markdown => "markdown",
        };
        f.write_str(name)
    }
}

/// GitHub credential. Never printed, serialized, or compared in the clear.
#[derive(Clone)]
pub struct GithubToken(SecretString);

impl GithubToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(SecretString::from(token.into()))
    }

    /// Access the raw token for the `Authorization` header.
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl fmt::Debug for GithubToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("GithubToken([REDACTED])")
    }
}

impl PartialEq for GithubToken {
    fn eq(&self, other: &Self) -> bool {
        self.expose() == other.expose()
    }
}

impl Eq for GithubToken {}

impl Serialize for GithubToken {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("[REDACTED]")
    }
}

/// Validated settings for one process run.
///
/// Built once by [`ConfigLoader`](super::ConfigLoader) and passed by
/// reference afterward; there are no setters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Config {
    pub max_parallel_jobs: usize,
    /// Seconds a cached response stays valid.
    pub cache_ttl: u64,
    /// Seconds between cache sweeps.
    pub cache_cleanup_interval: u64,
    /// Explicit cache root; `None` uses the platform cache directory.
    pub cache_dir: Option<PathBuf>,
    pub rate_limit_requests_per_minute: u32,
    pub rate_limit_delay_ms: u64,
    pub rate_limit_burst_size: u32,
    /// Remaining remote quota below which calls are spread out.
    pub rate_limit_buffer: u64,
    /// Longest the client will sleep for quota before giving up (seconds).
    pub rate_limit_max_wait: u64,
    pub request_timeout: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub task_timeout: u64,
    pub shutdown_grace: u64,
    pub log_level: LogLevel,
    pub output_format: OutputFormat,
    pub enable_cache: bool,
    pub enable_schema_validation: bool,
    pub enable_security_checks: bool,
    pub enable_performance_checks: bool,
    pub enable_benchmarking: bool,
    pub benchmark_iterations: u32,
    pub github_api_url: String,
    pub github_token: Option<GithubToken>,
    /// Default `owner/name` to analyse.
    pub repository: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_parallel_jobs: 4,
            cache_ttl: 3600,
            cache_cleanup_interval: 86400,
            cache_dir: None,
            rate_limit_requests_per_minute: 60,
            rate_limit_delay_ms: 1000,
            rate_limit_burst_size: 10,
            rate_limit_buffer: 100,
            rate_limit_max_wait: 120,
            request_timeout: 30,
            max_retries: 3,
            retry_base_delay_ms: 1000,
            task_timeout: 300,
            shutdown_grace: 10,
            log_level: LogLevel::default(),
            output_format: OutputFormat::default(),
            enable_cache: true,
            enable_schema_validation: true,
            enable_security_checks: true,
            enable_performance_checks: true,
            enable_benchmarking: false,
            benchmark_iterations: 5,
            github_api_url: DEFAULT_GITHUB_API_URL.to_string(),
            github_token: None,
            repository: None,
        }
    }
}

impl Config {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl)
    }

    pub fn cache_cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cache_cleanup_interval)
    }

    pub fn rate_limit_delay(&self) -> Duration {
        Duration::from_millis(self.rate_limit_delay_ms)
    }

    pub fn rate_limit_max_wait(&self) -> Duration {
        Duration::from_secs(self.rate_limit_max_wait)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace)
    }

    /// Raw token for outbound requests, if configured.
    pub fn token(&self) -> Option<&str> {
        self.github_token.as_ref().map(GithubToken::expose)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enum_parsing_is_case_insensitive() {
        assert_eq!("debug".parse::<LogLevel>(), Ok(LogLevel::Debug));
        assert_eq!("Warning".parse::<LogLevel>(), Ok(LogLevel::Warn));
        assert!("TRACE".parse::<LogLevel>().is_err());

        assert_eq!("JSON".parse::<OutputFormat>(), Ok(OutputFormat::Json));
        assert_eq!("md".parse::<OutputFormat>(), Ok(OutputFormat::Markdown));
        assert!("html".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_token_never_printed() {
        let config = Config {
            github_token: Some(GithubToken::new("ghp_supersecretvalue0000")),
            ..Config::default()
        };

        let debug = format!("{:?}", config);
        assert!(!debug.contains("supersecret"));

        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("supersecret"));
        assert!(json.contains("[REDACTED]"));

        assert_eq!(config.token(), Some("ghp_supersecretvalue0000"));
    }
}
