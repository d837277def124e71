// Cached, rate-limited GitHub API client.
// Consults the cache, admits requests through the rate budget, and retries transient failures.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::{DeserializeOwned, IgnoredAny};
use tracing::{debug, info};

use crate::cache::{CacheKey, CacheStore, Lookup};
use crate::config::Config;
use crate::error::ApiError;
use crate::redact;

use super::budget::{BudgetSettings, RateBudget};
use super::retry::{RetryPolicy, with_retry};
use super::transport::{ApiRequest, HttpTransport, RawResponse, RequestKind, Transport};
use super::types::{GraphQlEnvelope, RateLimit, RateLimitResponse};

/// Longest response excerpt kept in an error message.
const ERROR_EXCERPT_CHARS: usize = 200;

/// Body of a successful call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub body: String,
    /// Served from the cache without a network call.
    pub from_cache: bool,
}

impl ApiResponse {
    pub fn json<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T, ApiError> {
        serde_json::from_str(&self.body).map_err(|e| ApiError::Decode {
            endpoint: endpoint.to_string(),
            detail: e.to_string(),
        })
    }
}

/// GitHub API client with caching, rate budgeting, and retries.
///
/// Takes `&self` everywhere, so one client behind an `Arc` serves every
/// worker of a batch.
pub struct GitHubClient<T = HttpTransport> {
    transport: T,
    cache: CacheStore,
    budget: RateBudget,
    retry: RetryPolicy,
    cache_ttl: Duration,
    timeout: Duration,
    validate_json: bool,
    token: Option<String>,
}

impl GitHubClient<HttpTransport> {
    /// Create a client talking to the configured GitHub API.
    pub fn from_config(config: &Config) -> Result<Self, ApiError> {
        let transport = HttpTransport::new(config)?;
        Ok(Self::new(transport, CacheStore::from_config(config), config))
    }
}

impl<T: Transport> GitHubClient<T> {
    pub fn new(transport: T, cache: CacheStore, config: &Config) -> Self {
        Self {
            transport,
            cache,
            budget: RateBudget::new(BudgetSettings::from(config)),
            retry: RetryPolicy::from(config),
            cache_ttl: config.cache_ttl(),
            timeout: config.request_timeout(),
            validate_json: config.enable_schema_validation,
            token: config.token().map(str::to_string),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn budget(&self) -> &RateBudget {
        &self.budget
    }

    /// Perform a request, serving it from the cache when a valid entry exists.
    pub async fn call(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        let key = request.is_cacheable().then(|| request.cache_key());

        let cached = match &key {
            Some(key) => self.cache_get(key).await,
            None => Lookup::Miss,
        };
        if let Lookup::Hit(body) = cached {
            debug!(endpoint = %request.endpoint, "Cache hit");
            return Ok(ApiResponse {
                body,
                from_cache: true,
            });
        }

        let body = with_retry(&self.retry, &request.endpoint, || self.fetch(request)).await?;
        if let Some(key) = key {
            self.cache_put(key, body.clone()).await;
        }

        Ok(ApiResponse {
            body,
            from_cache: false,
        })
    }

    /// `call` and decode the JSON body.
    pub async fn call_json<R: DeserializeOwned>(&self, request: &ApiRequest) -> Result<R, ApiError> {
        self.call(request).await?.json(&request.endpoint)
    }

    /// Query `/rate_limit` and feed the result into the budget.
    ///
    /// Bypasses the cache and the budget: GitHub does not count this call.
    pub async fn refresh_quota(&self) -> Result<RateLimit, ApiError> {
        let request = ApiRequest::get("/rate_limit");
        let body = with_retry(&self.retry, &request.endpoint, || async {
            let response = self.send_with_timeout(&request).await?;
            self.check_response(&request.endpoint, response)
        })
        .await?;

        let parsed: RateLimitResponse = serde_json::from_str(&body).map_err(|e| {
            ApiError::Decode {
                endpoint: request.endpoint.clone(),
                detail: e.to_string(),
            }
        })?;
        let core = parsed.resources.core;
        self.budget.observe(core);
        info!(
            limit = core.limit,
            remaining = core.remaining,
            "Refreshed GitHub quota"
        );
        Ok(core)
    }

    /// One attempt: budget admission, network call, quota update, status check.
    async fn fetch(&self, request: &ApiRequest) -> Result<String, ApiError> {
        self.budget.acquire(&request.endpoint).await?;
        let response = self.send_with_timeout(request).await?;
        let reset_at = response.quota.and_then(|q| q.reset_at());
        let body = self.check_response(&request.endpoint, response)?;

        if request.kind == RequestKind::GraphQl {
            self.check_graphql(&request.endpoint, &body, reset_at)?;
        }

        if self.validate_json && serde_json::from_str::<IgnoredAny>(&body).is_err() {
            return Err(ApiError::Decode {
                endpoint: request.endpoint.clone(),
                detail: format!("expected JSON, got: {}", self.excerpt(&body)),
            });
        }
        Ok(body)
    }

    async fn send_with_timeout(&self, request: &ApiRequest) -> Result<RawResponse, ApiError> {
        let response = tokio::time::timeout(self.timeout, self.transport.send(request))
            .await
            .map_err(|_| ApiError::Timeout {
                endpoint: request.endpoint.clone(),
                after: self.timeout,
            })??;

        if let Some(quota) = response.quota {
            self.budget.observe(quota);
        }
        Ok(response)
    }

    /// Map an HTTP status to a body or a classified error.
    fn check_response(&self, endpoint: &str, response: RawResponse) -> Result<String, ApiError> {
        let endpoint = endpoint.to_string();
        match response.status {
            200..=299 => Ok(response.body),
            401 => Err(ApiError::Unauthorized { endpoint }),
            403 | 429 if is_rate_limited(&response) => Err(ApiError::RateLimited {
                endpoint,
                reset_at: response.quota.and_then(|q| q.reset_at()),
                retry_after: response.retry_after,
            }),
            403 => Err(ApiError::Forbidden {
                endpoint,
                detail: self.excerpt(&response.body),
            }),
            404 => Err(ApiError::NotFound { endpoint }),
            500..=599 => Err(ApiError::Server {
                endpoint,
                status: response.status,
                detail: self.excerpt(&response.body),
            }),
            status => Err(ApiError::InvalidRequest {
                endpoint,
                status,
                detail: self.excerpt(&response.body),
            }),
        }
    }

    /// Fail a 200 GraphQL response that carries an `errors` array.
    fn check_graphql(
        &self,
        endpoint: &str,
        body: &str,
        reset_at: Option<DateTime<Utc>>,
    ) -> Result<(), ApiError> {
        // Bodies that are not an object are left to JSON validation.
        let Ok(envelope) = serde_json::from_str::<GraphQlEnvelope>(body) else {
            return Ok(());
        };
        if envelope.errors.is_empty() {
            return Ok(());
        }
        if envelope.errors.iter().any(|e| e.is_rate_limited()) {
            return Err(ApiError::RateLimited {
                endpoint: endpoint.to_string(),
                reset_at,
                retry_after: None,
            });
        }

        let messages: Vec<&str> = envelope.errors.iter().map(|e| e.message.as_str()).collect();
        Err(ApiError::InvalidRequest {
            endpoint: endpoint.to_string(),
            status: 200,
            detail: self.excerpt(&messages.join("; ")),
        })
    }

    fn excerpt(&self, body: &str) -> String {
        redact::redact(
            &redact::excerpt(body, ERROR_EXCERPT_CHARS),
            self.token.as_deref(),
        )
    }

    async fn cache_get(&self, key: &CacheKey) -> Lookup {
        if !self.cache.is_enabled() {
            return Lookup::Miss;
        }
        let cache = self.cache.clone();
        let key = key.clone();
        tokio::task::spawn_blocking(move || cache.get(&key))
            .await
            .unwrap_or(Lookup::Miss)
    }

    async fn cache_put(&self, key: CacheKey, body: String) {
        if !self.cache.is_enabled() {
            return;
        }
        let cache = self.cache.clone();
        let ttl = self.cache_ttl;
        if let Err(e) = tokio::task::spawn_blocking(move || cache.put(&key, &body, ttl)).await {
            debug!(error = %e, "Cache write task failed");
        }
    }
}

fn is_rate_limited(response: &RawResponse) -> bool {
    response.status == 429
        || response.retry_after.is_some()
        || response.quota.is_some_and(|q| q.remaining == 0)
}
