// GitHub API response types.
// Defines structs for deserializing the REST responses the toolkit consumes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// GitHub Actions workflow run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub id: u64,
    pub name: Option<String>,
    pub run_number: u64,
    pub run_attempt: Option<u64>,
    pub status: RunStatus,
    pub conclusion: Option<RunConclusion>,
    pub workflow_id: u64,
    pub head_branch: Option<String>,
    pub head_sha: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub run_started_at: Option<DateTime<Utc>>,
    pub html_url: String,
}

impl WorkflowRun {
    /// Wall-clock seconds from start to last update, for completed runs.
    pub fn duration_secs(&self) -> Option<i64> {
        if self.status != RunStatus::Completed {
            return None;
        }
        let started = self.run_started_at.unwrap_or(self.created_at);
        let secs = self.updated_at.signed_duration_since(started).num_seconds();
        (secs >= 0).then_some(secs)
    }

    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("workflow {}", self.workflow_id))
    }
}

/// Workflow run status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    InProgress,
    Completed,
    Waiting,
    Requested,
    Pending,
    #[serde(other)]
    Unknown,
}

/// Workflow run conclusion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunConclusion {
    Success,
    Failure,
    Cancelled,
    Skipped,
    TimedOut,
    ActionRequired,
    Neutral,
    Stale,
    StartupFailure,
    #[serde(other)]
    Unknown,
}

/// GitHub Actions job within a workflow run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: u64,
    pub run_id: u64,
    pub name: String,
    pub status: RunStatus,
    pub conclusion: Option<RunConclusion>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub runner_name: Option<String>,
}

impl Job {
    pub fn duration_secs(&self) -> Option<i64> {
        let secs = self
            .completed_at?
            .signed_duration_since(self.started_at?)
            .num_seconds();
        (secs >= 0).then_some(secs)
    }
}

/// Response wrapper for workflow runs list.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowRunsPage {
    pub total_count: u64,
    pub workflow_runs: Vec<WorkflowRun>,
}

/// Response wrapper for jobs list.
#[derive(Debug, Clone, Deserialize)]
pub struct JobsPage {
    pub total_count: u64,
    pub jobs: Vec<Job>,
}

/// Rate limit information from response headers or `/rate_limit`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    pub limit: u64,
    pub remaining: u64,
    /// Unix timestamp when the window resets.
    pub reset: u64,
    #[serde(default)]
    pub used: u64,
}

impl RateLimit {
    pub fn reset_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.reset as i64, 0)
    }
}

/// Body of `GET /rate_limit`.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitResponse {
    pub resources: RateLimitResources,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitResources {
    pub core: RateLimit,
    pub graphql: Option<RateLimit>,
    pub search: Option<RateLimit>,
}

/// Error envelope of a GraphQL response. GitHub answers 200 even when the
/// query failed, so `errors` has to be inspected.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GraphQlEnvelope {
    #[serde(default)]
    pub errors: Vec<GraphQlError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GraphQlError {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub message: String,
}

impl GraphQlError {
    pub fn is_rate_limited(&self) -> bool {
        self.kind.as_deref() == Some("RATE_LIMITED")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_deserializes_and_measures_duration() {
        let json = r#"{
            "id": 1, "name": "CI", "run_number": 42, "run_attempt": 1,
            "status": "completed", "conclusion": "success", "workflow_id": 7,
            "head_branch": "main", "head_sha": "abc",
            "created_at": "2026-01-01T10:00:00Z",
            "updated_at": "2026-01-01T10:05:30Z",
            "run_started_at": "2026-01-01T10:00:30Z",
            "html_url": "https://github.com/o/r/actions/runs/1",
            "unknown_field": true
        }"#;
        let run: WorkflowRun = serde_json::from_str(json).unwrap();
        assert_eq!(run.conclusion, Some(RunConclusion::Success));
        assert_eq!(run.duration_secs(), Some(300));
        assert_eq!(run.display_name(), "CI");
    }

    #[test]
    fn test_unknown_enum_values_tolerated() {
        let status: RunStatus = serde_json::from_str("\"brand_new_state\"").unwrap();
        assert_eq!(status, RunStatus::Unknown);
    }

    #[test]
    fn test_rate_limit_response() {
        let json = r#"{"resources":{"core":{"limit":5000,"remaining":4990,"reset":1767261600,"used":10}},
                       "rate":{"limit":5000,"remaining":4990,"reset":1767261600}}"#;
        let parsed: RateLimitResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.resources.core.remaining, 4990);
        assert!(parsed.resources.graphql.is_none());
        assert!(parsed.resources.core.reset_at().is_some());
    }

    #[test]
    fn test_graphql_envelope_reads_error_types() {
        let body = r#"{"data": null, "errors": [
            {"type": "RATE_LIMITED", "message": "API rate limit exceeded"},
            {"message": "Field 'x' doesn't exist"}
        ]}"#;
        let envelope: GraphQlEnvelope = serde_json::from_str(body).unwrap();
        assert_eq!(envelope.errors.len(), 2);
        assert!(envelope.errors[0].is_rate_limited());
        assert!(!envelope.errors[1].is_rate_limited());

        let ok: GraphQlEnvelope = serde_json::from_str(r#"{"data": {"viewer": {}}}"#).unwrap();
        assert!(ok.errors.is_empty());
    }
}
