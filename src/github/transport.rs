// HTTP transport for the GitHub API.
// Builds authenticated requests and extracts quota headers from responses.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{
    Client, Response,
    header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue, RETRY_AFTER, USER_AGENT},
};
use serde_json::json;
use tracing::trace;

use crate::cache::CacheKey;
use crate::config::Config;
use crate::error::ApiError;
use crate::redact;

use super::types::RateLimit;

const GITHUB_API_VERSION: &str = "2022-11-28";

/// REST GET or GraphQL POST.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Rest,
    GraphQl,
}

/// One logical API request.
///
/// Parameters live in a `BTreeMap`, so two requests built with the same
/// parameters in different orders are equal and share a cache key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiRequest {
    pub kind: RequestKind,
    pub endpoint: String,
    pub params: BTreeMap<String, String>,
}

impl ApiRequest {
    pub fn get(endpoint: impl Into<String>) -> Self {
        Self {
            kind: RequestKind::Rest,
            endpoint: endpoint.into(),
            params: BTreeMap::new(),
        }
    }

    /// A GraphQL query; `variables` is folded into the parameters.
    pub fn graphql(query: impl Into<String>, variables: serde_json::Value) -> Self {
        let mut params = BTreeMap::new();
        params.insert("query".to_string(), query.into());
        params.insert("variables".to_string(), variables.to_string());
        Self {
            kind: RequestKind::GraphQl,
            endpoint: "/graphql".to_string(),
            params,
        }
    }

    pub fn param(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.params.insert(key.into(), value.to_string());
        self
    }

    pub fn cache_key(&self) -> CacheKey {
        CacheKey::derive(&self.endpoint, &self.params)
    }

    /// GraphQL mutations change state, so their responses are never cached.
    pub fn is_cacheable(&self) -> bool {
        match self.kind {
            RequestKind::Rest => true,
            RequestKind::GraphQl => !self
                .params
                .get("query")
                .is_some_and(|q| q.trim_start().starts_with("mutation")),
        }
    }
}

/// Status, body, and quota headers of a completed HTTP exchange.
#[derive(Debug, Clone, Default)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
    pub quota: Option<RateLimit>,
    pub retry_after: Option<Duration>,
}

/// Sends requests to the remote API.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform one request. Only transport-level failures are errors;
    /// HTTP error statuses come back as a `RawResponse`.
    async fn send(&self, request: &ApiRequest) -> Result<RawResponse, ApiError>;
}

/// reqwest-backed transport with GitHub authentication headers.
pub struct HttpTransport {
    client: Client,
    base_url: String,
    token: Option<String>,
    timeout: Duration,
}

impl HttpTransport {
    /// Create a transport from the validated configuration.
    pub fn new(config: &Config) -> Result<Self, ApiError> {
        let token = config.token().map(str::to_string);

        if config.enable_security_checks
            && token.is_some()
            && config.github_api_url.starts_with("http://")
            && !is_loopback_url(&config.github_api_url)
        {
            return Err(ApiError::Client(format!(
                "refusing to send credentials over plain HTTP to {}",
                config.github_api_url
            )));
        }

        let mut headers = HeaderMap::new();
        if let Some(token) = &token {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|_| ApiError::Client("token contains invalid characters".into()))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            "X-GitHub-Api-Version",
            HeaderValue::from_static(GITHUB_API_VERSION),
        );
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("pipekit/", env!("CARGO_PKG_VERSION"))),
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| ApiError::Client(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.github_api_url.trim_end_matches('/').to_string(),
            token,
            timeout: config.request_timeout(),
        })
    }

    fn url(&self, endpoint: &str) -> String {
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            endpoint.to_string()
        } else if endpoint.starts_with('/') {
            format!("{}{}", self.base_url, endpoint)
        } else {
            format!("{}/{}", self.base_url, endpoint)
        }
    }

    fn network_error(&self, endpoint: &str, error: reqwest::Error) -> ApiError {
        if error.is_timeout() {
            return ApiError::Timeout {
                endpoint: endpoint.to_string(),
                after: self.timeout,
            };
        }
        ApiError::Network {
            endpoint: endpoint.to_string(),
            detail: redact::redact(&error.to_string(), self.token.as_deref()),
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &ApiRequest) -> Result<RawResponse, ApiError> {
        let url = self.url(&request.endpoint);
        trace!(endpoint = %request.endpoint, "Sending request");

        let builder = match request.kind {
            RequestKind::Rest => self.client.get(&url).query(&request.params),
            RequestKind::GraphQl => {
                let variables = request
                    .params
                    .get("variables")
                    .and_then(|v| serde_json::from_str::<serde_json::Value>(v).ok())
                    .unwrap_or_else(|| json!({}));
                self.client.post(&url).json(&json!({
                    "query": request.params.get("query"),
                    "variables": variables,
                }))
            }
        };

        let response = builder
            .send()
            .await
            .map_err(|e| self.network_error(&request.endpoint, e))?;

        let status = response.status().as_u16();
        let quota = parse_quota(&response);
        let retry_after = parse_retry_after(&response);
        let body = response
            .text()
            .await
            .map_err(|e| self.network_error(&request.endpoint, e))?;

        Ok(RawResponse {
            status,
            body,
            quota,
            retry_after,
        })
    }
}

/// Read `x-ratelimit-*` headers, if all are present.
fn parse_quota(response: &Response) -> Option<RateLimit> {
    let header = |name: &str| -> Option<u64> {
        response
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
    };

    Some(RateLimit {
        limit: header("x-ratelimit-limit")?,
        remaining: header("x-ratelimit-remaining")?,
        reset: header("x-ratelimit-reset")?,
        used: header("x-ratelimit-used").unwrap_or(0),
    })
}

fn parse_retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn is_loopback_url(url: &str) -> bool {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .is_some_and(|host| matches!(host.as_str(), "localhost" | "127.0.0.1" | "[::1]"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GithubToken;

    #[test]
    fn test_reordered_params_share_cache_key() {
        let a = ApiRequest::get("runs")
            .param("status", "success")
            .param("limit", "10");
        let b = ApiRequest::get("runs")
            .param("limit", "10")
            .param("status", "success");
        assert_eq!(a, b);
        assert_eq!(a.cache_key(), b.cache_key());
    }

    #[test]
    fn test_graphql_request_keys_on_query_and_variables() {
        let a = ApiRequest::graphql("query { viewer { login } }", json!({"first": 1}));
        let b = ApiRequest::graphql("query { viewer { login } }", json!({"first": 2}));
        assert_eq!(a.kind, RequestKind::GraphQl);
        assert_ne!(a.cache_key(), b.cache_key());
    }

    #[test]
    fn test_mutations_are_not_cacheable() {
        assert!(ApiRequest::get("/repos/o/r").is_cacheable());
        assert!(ApiRequest::graphql("query { viewer { login } }", json!({})).is_cacheable());
        assert!(ApiRequest::graphql("{ viewer { login } }", json!({})).is_cacheable());
        assert!(
            !ApiRequest::graphql("  mutation { addStar(input: $i) { clientMutationId } }", json!({}))
                .is_cacheable()
        );
    }

    #[test]
    fn test_url_building() {
        let transport = HttpTransport::new(&Config::default()).unwrap();
        assert_eq!(
            transport.url("/repos/o/r"),
            "https://api.github.com/repos/o/r"
        );
        assert_eq!(transport.url("user"), "https://api.github.com/user");
        assert_eq!(
            transport.url("https://uploads.github.com/x"),
            "https://uploads.github.com/x"
        );
    }

    #[test]
    fn test_plain_http_with_token_rejected() {
        let config = Config {
            github_api_url: "http://ghe.internal/api/v3".into(),
            github_token: Some(GithubToken::new("ghp_abcdefghijklmnopqrstuvwxyz")),
            ..Config::default()
        };
        let err = HttpTransport::new(&config).err().unwrap();
        assert!(err.to_string().contains("plain HTTP"));
        assert!(!err.to_string().contains("ghp_"));

        let local = Config {
            github_api_url: "http://localhost:8080".into(),
            ..config.clone()
        };
        assert!(HttpTransport::new(&local).is_ok());

        let unchecked = Config {
            enable_security_checks: false,
            ..config
        };
        assert!(HttpTransport::new(&unchecked).is_ok());
    }
}
