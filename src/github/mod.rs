// GitHub API module.
// Cached, rate-limited access to the GitHub REST and GraphQL APIs.

pub mod budget;
pub mod client;
pub mod endpoints;
pub mod retry;
pub mod transport;
pub mod types;

pub use budget::{BudgetSettings, BudgetSnapshot, RateBudget};
pub use client::{ApiResponse, GitHubClient};
pub use retry::{RetryPolicy, with_retry};
pub use transport::{ApiRequest, HttpTransport, RawResponse, RequestKind, Transport};
pub use types::*;
