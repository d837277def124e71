// Configuration module.
// Loads defaults, override files, and environment into one validated Config.

pub mod loader;
pub mod types;
pub mod validation;

pub use loader::{ConfigLoader, SETTINGS, load_config};
pub use types::{Config, GithubToken, LogLevel, OutputFormat};
pub use validation::ConfigWarning;
