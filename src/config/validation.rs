// Configuration validation.
// Turns merged raw settings into a Config, collecting every violation in one pass.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{ConfigError, ConfigErrors};

use super::types::{Config, GithubToken};

/// Merged `key -> value` pairs, keyed by lowercase setting name.
pub type RawSettings = BTreeMap<String, String>;

/// A non-fatal configuration concern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigWarning {
    pub field: String,
    pub message: String,
}

impl ConfigWarning {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Result of validating one set of raw settings.
#[derive(Debug)]
pub struct Validation {
    pub result: Result<Config, ConfigErrors>,
    pub warnings: Vec<ConfigWarning>,
}

struct Validator<'a> {
    raw: &'a RawSettings,
    errors: Vec<ConfigError>,
    warnings: Vec<ConfigWarning>,
}

impl<'a> Validator<'a> {
    fn value(&self, field: &str) -> Option<&'a str> {
        self.raw.get(field).map(|v| v.trim())
    }

    fn int(&mut self, field: &str, default: u64, min: u64, max: u64) -> u64 {
        let Some(value) = self.value(field) else {
            return default;
        };
        match value.parse::<i64>() {
            Ok(n) if n < min as i64 => {
                self.errors
                    .push(ConfigError::new(field, format!("below minimum {}", min)));
                default
            }
            Ok(n) if n > max as i64 => {
                self.errors
                    .push(ConfigError::new(field, format!("above maximum {}", max)));
                default
            }
            Ok(n) => n as u64,
            Err(_) => {
                self.errors.push(ConfigError::new(
                    field,
                    format!("expected an integer, got '{}'", value),
                ));
                default
            }
        }
    }

    fn boolean(&mut self, field: &str, default: bool) -> bool {
        let Some(value) = self.value(field) else {
            return default;
        };
        match value.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => true,
            "false" | "0" | "no" | "off" => false,
            _ => {
                self.errors.push(ConfigError::new(
                    field,
                    format!("expected true or false, got '{}'", value),
                ));
                default
            }
        }
    }

    fn choice<T>(&mut self, field: &str, default: T) -> T
    where
        T: FromStr<Err = String>,
    {
        let Some(value) = self.value(field) else {
            return default;
        };
        match value.parse() {
            Ok(parsed) => parsed,
            Err(reason) => {
                self.errors.push(ConfigError::new(field, reason));
                default
            }
        }
    }

    fn text(&self, field: &str) -> Option<String> {
        self.value(field)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }

    fn api_url(&mut self, field: &str, default: String) -> String {
        let Some(url) = self.text(field) else {
            return default;
        };
        if url.starts_with("https://") || url.starts_with("http://") {
            url.trim_end_matches('/').to_string()
        } else {
            self.errors
                .push(ConfigError::new(field, "must start with http:// or https://"));
            default
        }
    }

    fn repository(&mut self, field: &str) -> Option<String> {
        let repo = self.text(field)?;
        let valid = match repo.split_once('/') {
            Some((owner, name)) => {
                !owner.is_empty()
                    && !name.is_empty()
                    && !name.contains('/')
                    && !repo.contains(char::is_whitespace)
            }
            None => false,
        };
        if valid {
            Some(repo)
        } else {
            self.errors
                .push(ConfigError::new(field, "expected the form owner/name"));
            None
        }
    }

    fn cross_field(&mut self, config: &Config) {
        if config.enable_benchmarking && config.benchmark_iterations < 3 {
            self.errors.push(ConfigError::new(
                "benchmark_iterations",
                "must be at least 3 when enable_benchmarking is true",
            ));
        }

        if config.rate_limit_requests_per_minute >= 100 && config.rate_limit_delay_ms < 100 {
            self.warnings.push(ConfigWarning::new(
                "rate_limit_delay_ms",
                format!(
                    "{}ms between requests at {} requests/minute risks secondary rate limits",
                    config.rate_limit_delay_ms, config.rate_limit_requests_per_minute
                ),
            ));
        }

        if config.cache_cleanup_interval < config.cache_ttl {
            self.warnings.push(ConfigWarning::new(
                "cache_cleanup_interval",
                "shorter than cache_ttl; sweeps will rarely find expired entries",
            ));
        }

        if config.github_token.is_none() {
            self.warnings.push(ConfigWarning::new(
                "github_token",
                "not set; unauthenticated requests have a much lower quota",
            ));
        }
    }
}

/// Validate merged settings, filling unspecified fields from defaults.
pub fn validate(raw: &RawSettings) -> Validation {
    let defaults = Config::default();
    let mut v = Validator {
        raw,
        errors: Vec::new(),
        warnings: Vec::new(),
    };

    let config = Config {
        max_parallel_jobs: v.int("max_parallel_jobs", defaults.max_parallel_jobs as u64, 1, 32)
            as usize,
        cache_ttl: v.int("cache_ttl", defaults.cache_ttl, 60, 86400),
        cache_cleanup_interval: v.int(
            "cache_cleanup_interval",
            defaults.cache_cleanup_interval,
            300,
            604800,
        ),
        cache_dir: v.text("cache_dir").map(PathBuf::from),
        rate_limit_requests_per_minute: v.int(
            "rate_limit_requests_per_minute",
            defaults.rate_limit_requests_per_minute as u64,
            1,
            120,
        ) as u32,
        rate_limit_delay_ms: v.int("rate_limit_delay_ms", defaults.rate_limit_delay_ms, 0, 60000),
        rate_limit_burst_size: v.int(
            "rate_limit_burst_size",
            defaults.rate_limit_burst_size as u64,
            0,
            100,
        ) as u32,
        rate_limit_buffer: v.int("rate_limit_buffer", defaults.rate_limit_buffer, 0, 5000),
        rate_limit_max_wait: v.int("rate_limit_max_wait", defaults.rate_limit_max_wait, 1, 3600),
        request_timeout: v.int("request_timeout", defaults.request_timeout, 1, 300),
        max_retries: v.int("max_retries", defaults.max_retries as u64, 0, 10) as u32,
        retry_base_delay_ms: v.int(
            "retry_base_delay_ms",
            defaults.retry_base_delay_ms,
            10,
            60000,
        ),
        task_timeout: v.int("task_timeout", defaults.task_timeout, 1, 3600),
        shutdown_grace: v.int("shutdown_grace", defaults.shutdown_grace, 0, 300),
        log_level: v.choice("log_level", defaults.log_level),
        output_format: v.choice("output_format", defaults.output_format),
        enable_cache: v.boolean("enable_cache", defaults.enable_cache),
        enable_schema_validation: v
            .boolean("enable_schema_validation", defaults.enable_schema_validation),
        enable_security_checks: v.boolean("enable_security_checks", defaults.enable_security_checks),
        enable_performance_checks: v.boolean(
            "enable_performance_checks",
            defaults.enable_performance_checks,
        ),
        enable_benchmarking: v.boolean("enable_benchmarking", defaults.enable_benchmarking),
        benchmark_iterations: v.int(
            "benchmark_iterations",
            defaults.benchmark_iterations as u64,
            1,
            100,
        ) as u32,
        github_api_url: v.api_url("github_api_url", defaults.github_api_url.clone()),
        github_token: v.text("github_token").map(GithubToken::new),
        repository: v.repository("repository"),
    };

    v.cross_field(&config);

    let result = if v.errors.is_empty() {
        Ok(config)
    } else {
        Err(ConfigErrors(v.errors))
    };

    Validation {
        result,
        warnings: v.warnings,
    }
}
