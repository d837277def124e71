// Configuration loading.
// Layers defaults, an optional KEY=value override file, and environment variables.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::ConfigErrors;

use super::types::Config;
use super::validation::{self, ConfigWarning, RawSettings, Validation};

/// Every recognized setting: file key and its single environment variable.
pub const SETTINGS: &[(&str, &str)] = &[
    ("max_parallel_jobs", "MAX_PARALLEL_JOBS"),
    ("cache_ttl", "CACHE_TTL"),
    ("cache_cleanup_interval", "CACHE_CLEANUP_INTERVAL"),
    ("cache_dir", "CACHE_DIR"),
    ("rate_limit_requests_per_minute", "RATE_LIMIT_REQUESTS_PER_MINUTE"),
    ("rate_limit_delay_ms", "RATE_LIMIT_DELAY_MS"),
    ("rate_limit_burst_size", "RATE_LIMIT_BURST_SIZE"),
    ("rate_limit_buffer", "RATE_LIMIT_BUFFER"),
    ("rate_limit_max_wait", "RATE_LIMIT_MAX_WAIT"),
    ("request_timeout", "REQUEST_TIMEOUT"),
    ("max_retries", "MAX_RETRIES"),
    ("retry_base_delay_ms", "RETRY_BASE_DELAY_MS"),
    ("task_timeout", "TASK_TIMEOUT"),
    ("shutdown_grace", "SHUTDOWN_GRACE"),
    ("log_level", "LOG_LEVEL"),
    ("output_format", "OUTPUT_FORMAT"),
    ("enable_cache", "ENABLE_CACHE"),
    ("enable_schema_validation", "ENABLE_SCHEMA_VALIDATION"),
    ("enable_security_checks", "ENABLE_SECURITY_CHECKS"),
    ("enable_performance_checks", "ENABLE_PERFORMANCE_CHECKS"),
    ("enable_benchmarking", "ENABLE_BENCHMARKING"),
    ("benchmark_iterations", "BENCHMARK_ITERATIONS"),
    ("github_api_url", "GITHUB_API_URL"),
    ("github_token", "GITHUB_TOKEN"),
    ("repository", "GITHUB_REPOSITORY"),
];

/// Setting named by a file key: either the setting name or its environment
/// variable, compared case-insensitively.
fn setting_for(key: &str) -> Option<&'static str> {
    SETTINGS
        .iter()
        .find(|(name, var)| name.eq_ignore_ascii_case(key) || var.eq_ignore_ascii_case(key))
        .map(|(name, _)| *name)
}

/// Builder for a one-shot configuration load.
///
/// Precedence, later wins: compiled-in defaults, override file, environment.
#[derive(Debug, Default)]
pub struct ConfigLoader {
    override_path: Option<PathBuf>,
    env: Option<HashMap<String, String>>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read `KEY=value` overrides from this file if it exists.
    pub fn override_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.override_path = Some(path.into());
        self
    }

    /// Use this map instead of the process environment.
    pub fn env<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env = Some(
            vars.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
        self
    }

    /// Load and validate, logging warnings.
    pub fn load(&self) -> Result<Config, ConfigErrors> {
        let (result, warnings) = self.load_with_warnings();
        for warning in &warnings {
            warn!(field = %warning.field, "{}", warning.message);
        }
        result
    }

    /// Load and validate, returning warnings to the caller instead of logging them.
    pub fn load_with_warnings(&self) -> (Result<Config, ConfigErrors>, Vec<ConfigWarning>) {
        let mut warnings = Vec::new();
        let mut raw = RawSettings::new();

        if let Some(path) = &self.override_path {
            self.merge_file(path, &mut raw, &mut warnings);
        }
        self.merge_env(&mut raw);

        let Validation {
            result,
            warnings: validation_warnings,
        } = validation::validate(&raw);
        warnings.extend(validation_warnings);
        (result, warnings)
    }

    fn merge_file(&self, path: &Path, raw: &mut RawSettings, warnings: &mut Vec<ConfigWarning>) {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) => {
                warnings.push(ConfigWarning::new(
                    "config_file",
                    format!("ignoring {}: {}", path.display(), e),
                ));
                return;
            }
        };

        debug!(path = %path.display(), "Reading configuration overrides");
        for (index, line) in contents.lines().enumerate() {
            match parse_line(line) {
                ParsedLine::Skip => {}
                ParsedLine::Malformed => warnings.push(ConfigWarning::new(
                    "config_file",
                    format!("{}:{}: expected KEY=value", path.display(), index + 1),
                )),
                ParsedLine::Setting(key, value) => match setting_for(&key) {
                    Some(name) => {
                        raw.insert(name.to_string(), value);
                    }
                    None => warnings.push(ConfigWarning::new(
                        "config_file",
                        format!("{}:{}: unknown setting '{}'", path.display(), index + 1, key),
                    )),
                },
            }
        }
    }

    fn merge_env(&self, raw: &mut RawSettings) {
        for (key, var) in SETTINGS {
            let value = match &self.env {
                Some(env) => env.get(*var).cloned(),
                None => std::env::var(var).ok(),
            };
            // Empty variables count as unset, like `${VAR:-default}`.
            if let Some(value) = value.filter(|v| !v.trim().is_empty()) {
                raw.insert(key.to_string(), value);
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum ParsedLine {
    Skip,
    Malformed,
    Setting(String, String),
}

/// Parse one shell-style `KEY=value` line.
fn parse_line(line: &str) -> ParsedLine {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return ParsedLine::Skip;
    }

    let line = line.strip_prefix("export ").unwrap_or(line).trim_start();
    let Some((key, value)) = line.split_once('=') else {
        return ParsedLine::Malformed;
    };

    let key = key.trim().to_ascii_lowercase();
    if key.is_empty() || key.contains(char::is_whitespace) {
        return ParsedLine::Malformed;
    }

    ParsedLine::Setting(key, unquote(value.trim()))
}

fn unquote(value: &str) -> String {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return value[1..value.len() - 1].to_string();
        }
    }
    // Unquoted values may carry a trailing comment.
    match value.find(" #") {
        Some(pos) => value[..pos].trim_end().to_string(),
        None => value.to_string(),
    }
}

/// Load configuration from the process environment plus an optional override file.
pub fn load_config(override_path: Option<&Path>) -> Result<Config, ConfigErrors> {
    let mut loader = ConfigLoader::new();
    if let Some(path) = override_path {
        loader = loader.override_file(path);
    }
    loader.load()
}
