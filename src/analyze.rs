// Workflow performance analysis.
// Fetches recent runs through the cached client and summarises them per workflow and job.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{ApiError, TaskError};
use crate::github::{GitHubClient, Job, RunConclusion, RunStatus, Transport, WorkflowRun};
use crate::runner::{RunnerSettings, run_all};

/// Success rate below which a workflow is flagged.
const LOW_SUCCESS_RATE: f64 = 0.8;
/// Completed runs needed before the success rate is judged.
const MIN_RUNS_FOR_FINDINGS: usize = 5;
/// p95 duration above which a workflow is flagged as slow.
const SLOW_P95_SECS: i64 = 30 * 60;

/// `owner/name` repository reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl FromStr for RepoRef {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().split_once('/') {
            Some((owner, name))
                if !owner.is_empty() && !name.is_empty() && !name.contains('/') =>
            {
                Ok(Self {
                    owner: owner.to_string(),
                    name: name.to_string(),
                })
            }
            _ => Err(format!("expected OWNER/NAME, got '{}'", s)),
        }
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// What to fetch and which optional passes to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyzeOptions {
    /// Recent runs to fetch per repository.
    pub limit: usize,
    /// Fetch jobs for every completed run.
    pub with_jobs: bool,
    pub performance_checks: bool,
    /// Time this many fetches of each repository's first page.
    pub benchmark_iterations: Option<u32>,
}

impl AnalyzeOptions {
    pub fn from_config(config: &Config, limit: usize, with_jobs: bool) -> Self {
        Self {
            limit,
            with_jobs,
            performance_checks: config.enable_performance_checks,
            benchmark_iterations: config
                .enable_benchmarking
                .then_some(config.benchmark_iterations),
        }
    }
}

/// Distribution of durations in seconds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DurationStats {
    pub samples: usize,
    pub mean_secs: f64,
    pub median_secs: f64,
    pub p95_secs: i64,
    pub min_secs: i64,
    pub max_secs: i64,
}

impl DurationStats {
    /// `None` for an empty sample.
    pub fn from_samples(mut samples: Vec<i64>) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        samples.sort_unstable();
        let n = samples.len();
        let mean_secs = samples.iter().sum::<i64>() as f64 / n as f64;
        let median_secs = if n % 2 == 0 {
            (samples[n / 2 - 1] + samples[n / 2]) as f64 / 2.0
        } else {
            samples[n / 2] as f64
        };
        // Nearest-rank percentile.
        let rank = ((0.95 * n as f64).ceil() as usize).clamp(1, n);

        Some(Self {
            samples: n,
            mean_secs,
            median_secs,
            p95_secs: samples[rank - 1],
            min_secs: samples[0],
            max_secs: samples[n - 1],
        })
    }
}

/// Per-workflow summary for one repository.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowStats {
    pub repository: String,
    pub workflow: String,
    pub total_runs: usize,
    pub completed: usize,
    pub successes: usize,
    pub failures: usize,
    pub cancelled: usize,
    /// Successes over completed runs.
    pub success_rate: Option<f64>,
    pub duration: Option<DurationStats>,
}

/// Per-job-name summary for one repository.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobStats {
    pub repository: String,
    pub job: String,
    pub runs: usize,
    pub failures: usize,
    pub duration: Option<DurationStats>,
}

/// A fetch that failed; the rest of the report is still valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepoFailure {
    pub repository: String,
    pub error: String,
    /// The error cannot be fixed by retrying (see [`ApiError::is_fatal`]).
    pub fatal: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
        }
    }
}

/// Performance observation about one workflow.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Finding {
    pub severity: Severity,
    pub repository: String,
    pub workflow: String,
    pub message: String,
}

/// Timing of repeated first-page fetches for one repository.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BenchmarkSummary {
    pub repository: String,
    pub iterations: u32,
    pub mean_ms: f64,
    pub min_ms: u64,
    pub max_ms: u64,
    pub errors: u32,
}

/// Everything `analyze` produces.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisReport {
    pub generated_at: DateTime<Utc>,
    pub repositories: Vec<String>,
    pub workflows: Vec<WorkflowStats>,
    pub jobs: Vec<JobStats>,
    pub findings: Vec<Finding>,
    pub benchmarks: Vec<BenchmarkSummary>,
    pub failures: Vec<RepoFailure>,
}

impl AnalysisReport {
    fn empty(repositories: Vec<String>) -> Self {
        Self {
            generated_at: Utc::now(),
            repositories,
            workflows: Vec::new(),
            jobs: Vec::new(),
            findings: Vec::new(),
            benchmarks: Vec::new(),
            failures: Vec::new(),
        }
    }

    /// First failure that should stop the process with a non-zero exit.
    pub fn fatal_failure(&self) -> Option<&RepoFailure> {
        self.failures.iter().find(|f| f.fatal)
    }
}

fn is_failure(conclusion: Option<RunConclusion>) -> bool {
    matches!(
        conclusion,
        Some(RunConclusion::Failure | RunConclusion::TimedOut | RunConclusion::StartupFailure)
    )
}

/// Group runs by workflow name and summarise each group.
pub fn summarize_runs(repository: &str, runs: &[WorkflowRun]) -> Vec<WorkflowStats> {
    let mut groups: BTreeMap<String, Vec<&WorkflowRun>> = BTreeMap::new();
    for run in runs {
        groups.entry(run.display_name()).or_default().push(run);
    }

    groups
        .into_iter()
        .map(|(workflow, runs)| {
            let completed: Vec<_> = runs
                .iter()
                .filter(|r| r.status == RunStatus::Completed)
                .collect();
            let successes = completed
                .iter()
                .filter(|r| r.conclusion == Some(RunConclusion::Success))
                .count();
            let failures = completed.iter().filter(|r| is_failure(r.conclusion)).count();
            let cancelled = completed
                .iter()
                .filter(|r| r.conclusion == Some(RunConclusion::Cancelled))
                .count();
            let durations = completed.iter().filter_map(|r| r.duration_secs()).collect();

            WorkflowStats {
                repository: repository.to_string(),
                workflow,
                total_runs: runs.len(),
                completed: completed.len(),
                successes,
                failures,
                cancelled,
                success_rate: (!completed.is_empty())
                    .then(|| successes as f64 / completed.len() as f64),
                duration: DurationStats::from_samples(durations),
            }
        })
        .collect()
}

/// Group jobs by name and summarise each group.
pub fn summarize_jobs(repository: &str, jobs: &[Job]) -> Vec<JobStats> {
    let mut groups: BTreeMap<&str, Vec<&Job>> = BTreeMap::new();
    for job in jobs {
        groups.entry(job.name.as_str()).or_default().push(job);
    }

    groups
        .into_iter()
        .map(|(name, jobs)| JobStats {
            repository: repository.to_string(),
            job: name.to_string(),
            runs: jobs.len(),
            failures: jobs.iter().filter(|j| is_failure(j.conclusion)).count(),
            duration: DurationStats::from_samples(
                jobs.iter().filter_map(|j| j.duration_secs()).collect(),
            ),
        })
        .collect()
}

/// Flag workflows with a low success rate or a slow tail.
pub fn performance_findings(workflows: &[WorkflowStats]) -> Vec<Finding> {
    let mut findings = Vec::new();
    for stats in workflows {
        if stats.completed >= MIN_RUNS_FOR_FINDINGS {
            if let Some(rate) = stats.success_rate.filter(|r| *r < LOW_SUCCESS_RATE) {
                findings.push(Finding {
                    severity: Severity::Warning,
                    repository: stats.repository.clone(),
                    workflow: stats.workflow.clone(),
                    message: format!(
                        "success rate {:.0}% over {} completed runs",
                        rate * 100.0,
                        stats.completed
                    ),
                });
            }
        }
        if let Some(duration) = stats.duration.as_ref().filter(|d| d.p95_secs > SLOW_P95_SECS) {
            findings.push(Finding {
                severity: Severity::Info,
                repository: stats.repository.clone(),
                workflow: stats.workflow.clone(),
                message: format!("p95 duration {}m exceeds 30m", duration.p95_secs / 60),
            });
        }
    }
    findings
}

fn failure<E: fmt::Display>(
    repository: String,
    error: TaskError<E>,
    is_fatal: impl Fn(&E) -> bool,
) -> RepoFailure {
    let fatal = matches!(&error, TaskError::Failed(e) if is_fatal(e));
    RepoFailure {
        repository,
        error: error.to_string(),
        fatal,
    }
}

/// Analyse every repository concurrently.
///
/// Per-repository errors land in [`AnalysisReport::failures`]; the call
/// itself never fails.
pub async fn analyze_repositories<T>(
    client: Arc<GitHubClient<T>>,
    settings: &RunnerSettings,
    cancel: &CancellationToken,
    repos: Vec<RepoRef>,
    options: &AnalyzeOptions,
) -> AnalysisReport
where
    T: Transport + 'static,
{
    let mut report = AnalysisReport::empty(repos.iter().map(ToString::to_string).collect());
    let limit = options.limit;

    let fetched = run_all(repos.clone(), settings, cancel, {
        let client = Arc::clone(&client);
        move |repo: RepoRef| {
            let client = Arc::clone(&client);
            async move {
                client
                    .recent_workflow_runs(&repo.owner, &repo.name, limit)
                    .await
            }
        }
    })
    .await;

    let mut completed_runs = Vec::new();
    for (repo, outcome) in repos.iter().zip(fetched) {
        match outcome {
            Ok(runs) => {
                info!(repository = %repo, runs = runs.len(), "Fetched workflow runs");
                report.workflows.extend(summarize_runs(&repo.to_string(), &runs));
                completed_runs.extend(
                    runs.iter()
                        .filter(|r| r.status == RunStatus::Completed)
                        .map(|r| (repo.clone(), r.id)),
                );
            }
            Err(e) => {
                warn!(repository = %repo, error = %e, "Failed to fetch workflow runs");
                report
                    .failures
                    .push(failure(repo.to_string(), e, ApiError::is_fatal));
            }
        }
    }

    if options.with_jobs && !completed_runs.is_empty() {
        collect_jobs(&client, settings, cancel, completed_runs, &mut report).await;
    }

    if options.performance_checks {
        report.findings = performance_findings(&report.workflows);
    }

    if let Some(iterations) = options.benchmark_iterations {
        for repo in &repos {
            report
                .benchmarks
                .push(benchmark_repository(&client, repo, iterations).await);
        }
    }

    report
}

async fn collect_jobs<T>(
    client: &Arc<GitHubClient<T>>,
    settings: &RunnerSettings,
    cancel: &CancellationToken,
    runs: Vec<(RepoRef, u64)>,
    report: &mut AnalysisReport,
) where
    T: Transport + 'static,
{
    let outcomes = run_all(runs.clone(), settings, cancel, {
        let client = Arc::clone(client);
        move |(repo, run_id): (RepoRef, u64)| {
            let client = Arc::clone(&client);
            async move { client.list_jobs(&repo.owner, &repo.name, run_id).await }
        }
    })
    .await;

    let mut by_repo: BTreeMap<RepoRef, Vec<Job>> = BTreeMap::new();
    for ((repo, run_id), outcome) in runs.into_iter().zip(outcomes) {
        match outcome {
            Ok(jobs) => by_repo.entry(repo).or_default().extend(jobs),
            Err(e) => report.failures.push(failure(
                format!("{} (run {})", repo, run_id),
                e,
                ApiError::is_fatal,
            )),
        }
    }

    for (repo, jobs) in by_repo {
        report.jobs.extend(summarize_jobs(&repo.to_string(), &jobs));
    }
}

/// Time `iterations` fetches of a repository's first page of runs.
///
/// The first fetch usually misses the cache and later ones hit it, so the
/// spread shows what the cache saves.
pub async fn benchmark_repository<T: Transport>(
    client: &GitHubClient<T>,
    repo: &RepoRef,
    iterations: u32,
) -> BenchmarkSummary {
    let mut timings = Vec::with_capacity(iterations as usize);
    let mut errors = 0;

    for _ in 0..iterations {
        let start = Instant::now();
        if client
            .list_workflow_runs(&repo.owner, &repo.name, 1, 30)
            .await
            .is_err()
        {
            errors += 1;
        }
        timings.push(start.elapsed());
    }

    let total: Duration = timings.iter().sum();
    BenchmarkSummary {
        repository: repo.to_string(),
        iterations,
        mean_ms: total.as_secs_f64() * 1000.0 / timings.len().max(1) as f64,
        min_ms: timings.iter().min().map_or(0, |d| d.as_millis() as u64),
        max_ms: timings.iter().max().map_or(0, |d| d.as_millis() as u64),
        errors,
    }
}
