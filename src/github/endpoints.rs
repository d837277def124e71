// GitHub API endpoint functions.
// Typed wrappers over the cached client for the Actions endpoints the analyzer reads.

use crate::error::ApiError;

use super::client::GitHubClient;
use super::transport::{ApiRequest, Transport};
use super::types::{Job, JobsPage, WorkflowRun, WorkflowRunsPage};

/// GitHub's page size ceiling for list endpoints.
pub const MAX_PER_PAGE: u32 = 100;

impl<T: Transport> GitHubClient<T> {
    /// Get workflow runs for a repository, newest first.
    pub async fn list_workflow_runs(
        &self,
        owner: &str,
        repo: &str,
        page: u32,
        per_page: u32,
    ) -> Result<(Vec<WorkflowRun>, u64), ApiError> {
        let request = ApiRequest::get(format!("/repos/{}/{}/actions/runs", owner, repo))
            .param("page", page.max(1))
            .param("per_page", per_page.clamp(1, MAX_PER_PAGE));
        let wrapper: WorkflowRunsPage = self.call_json(&request).await?;
        Ok((wrapper.workflow_runs, wrapper.total_count))
    }

    /// Collect up to `limit` recent runs, following pages as needed.
    pub async fn recent_workflow_runs(
        &self,
        owner: &str,
        repo: &str,
        limit: usize,
    ) -> Result<Vec<WorkflowRun>, ApiError> {
        let per_page = (limit as u32).clamp(1, MAX_PER_PAGE);
        let mut runs = Vec::with_capacity(limit);
        let mut page = 1;

        while runs.len() < limit {
            let (batch, total) = self.list_workflow_runs(owner, repo, page, per_page).await?;
            let exhausted = batch.len() < per_page as usize;
            runs.extend(batch);
            if exhausted || runs.len() as u64 >= total {
                break;
            }
            page += 1;
        }

        runs.truncate(limit);
        Ok(runs)
    }

    /// Get a specific workflow run.
    pub async fn get_workflow_run(
        &self,
        owner: &str,
        repo: &str,
        run_id: u64,
    ) -> Result<WorkflowRun, ApiError> {
        let request = ApiRequest::get(format!(
            "/repos/{}/{}/actions/runs/{}",
            owner, repo, run_id
        ));
        self.call_json(&request).await
    }

    /// Get jobs for a workflow run.
    pub async fn list_jobs(
        &self,
        owner: &str,
        repo: &str,
        run_id: u64,
    ) -> Result<Vec<Job>, ApiError> {
        let request = ApiRequest::get(format!(
            "/repos/{}/{}/actions/runs/{}/jobs",
            owner, repo, run_id
        ))
        .param("per_page", MAX_PER_PAGE);
        let wrapper: JobsPage = self.call_json(&request).await?;
        Ok(wrapper.jobs)
    }
}
