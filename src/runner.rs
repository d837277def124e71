// Parallel task runner.
// Fans a batch of inputs out over a bounded worker pool and collects one outcome per input.

use std::any::Any;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::TaskError;

/// Limits for one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunnerSettings {
    /// Maximum tasks in flight at once.
    pub worker_limit: usize,
    /// Per-task ceiling.
    pub task_timeout: Duration,
    /// How long in-flight tasks may keep running after cancellation.
    pub grace: Duration,
}

impl From<&Config> for RunnerSettings {
    fn from(config: &Config) -> Self {
        Self {
            worker_limit: config.max_parallel_jobs,
            task_timeout: config.task_timeout(),
            grace: config.shutdown_grace(),
        }
    }
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

/// Outcome of one task in a batch.
pub type TaskOutcome<T, E> = Result<T, TaskError<E>>;

/// Run `f` over every input with at most `worker_limit` tasks in flight.
///
/// Outcomes come back in input order, one per input. A failing, timed out,
/// or panicking task affects only its own slot. Once `cancel` fires, queued
/// inputs are never started and running tasks get `grace` to finish before
/// they are dropped and recorded as [`TaskError::Cancelled`].
pub async fn run_all<I, T, E, F, Fut>(
    inputs: Vec<I>,
    settings: &RunnerSettings,
    cancel: &CancellationToken,
    f: F,
) -> Vec<TaskOutcome<T, E>>
where
    I: Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
    F: Fn(I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(settings.worker_limit.max(1)));
    let f = Arc::new(f);
    let total = inputs.len();
    debug!(
        tasks = total,
        workers = settings.worker_limit,
        "Dispatching batch"
    );

    let handles: Vec<_> = inputs
        .into_iter()
        .map(|input| {
            let semaphore = Arc::clone(&semaphore);
            let f = Arc::clone(&f);
            let cancel = cancel.clone();
            let settings = *settings;
            tokio::spawn(async move { run_one(input, settings, semaphore, cancel, f).await })
        })
        .collect();

    let mut outcomes = Vec::with_capacity(total);
    for handle in handles {
        outcomes.push(handle.await.unwrap_or_else(|e| Err(join_failure(e))));
    }

    let cancelled = outcomes
        .iter()
        .filter(|o| matches!(o, Err(TaskError::Cancelled)))
        .count();
    if cancelled > 0 {
        warn!(cancelled, total, "Batch cancelled before completion");
    }
    outcomes
}

async fn run_one<I, T, E, F, Fut>(
    input: I,
    settings: RunnerSettings,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
    f: Arc<F>,
) -> TaskOutcome<T, E>
where
    F: Fn(I) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let _permit = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(TaskError::Cancelled),
        permit = semaphore.acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(_) => return Err(TaskError::Cancelled),
        },
    };
    if cancel.is_cancelled() {
        return Err(TaskError::Cancelled);
    }

    let work = tokio::time::timeout(settings.task_timeout, (*f)(input));
    tokio::pin!(work);

    let finished = tokio::select! {
        result = &mut work => result,
        _ = cancel.cancelled() => match tokio::time::timeout(settings.grace, &mut work).await {
            Ok(result) => result,
            Err(_) => return Err(TaskError::Cancelled),
        },
    };

    match finished {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(TaskError::Failed(e)),
        Err(_) => Err(TaskError::TimedOut(settings.task_timeout)),
    }
}

fn join_failure<E>(error: JoinError) -> TaskError<E> {
    if error.is_panic() {
        TaskError::Panicked(panic_message(error.into_panic()))
    } else {
        TaskError::Cancelled
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn settings(worker_limit: usize) -> RunnerSettings {
        RunnerSettings {
            worker_limit,
            task_timeout: Duration::from_secs(300),
            grace: Duration::from_secs(5),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_outcomes_follow_input_order() {
        let inputs: Vec<u64> = vec![5, 1, 4, 2, 3];
        let outcomes = run_all(
            inputs.clone(),
            &settings(5),
            &CancellationToken::new(),
            |secs| async move {
                tokio::time::sleep(Duration::from_secs(secs)).await;
                Ok::<_, String>(secs * 10)
            },
        )
        .await;

        let values: Vec<u64> = outcomes.into_iter().map(|o| o.unwrap()).collect();
        assert_eq!(values, vec![50, 10, 40, 20, 30]);
    }

    #[tokio::test]
    async fn test_failures_and_panics_are_isolated() {
        let outcomes = run_all(
            vec![0, 1, 2, 3],
            &settings(2),
            &CancellationToken::new(),
            |n| async move {
                match n {
                    1 => Err(format!("task {} failed", n)),
                    2 => panic!("boom"),
                    _ => Ok(n),
                }
            },
        )
        .await;

        assert_eq!(outcomes.len(), 4);
        assert!(matches!(outcomes[0], Ok(0)));
        assert!(matches!(&outcomes[1], Err(TaskError::Failed(msg)) if msg == "task 1 failed"));
        assert!(matches!(&outcomes[2], Err(TaskError::Panicked(msg)) if msg == "boom"));
        assert!(matches!(outcomes[3], Ok(3)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_never_exceeds_worker_limit() {
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let (c, p) = (Arc::clone(&current), Arc::clone(&peak));
        let outcomes = run_all(
            (0..20).collect(),
            &settings(3),
            &CancellationToken::new(),
            move |_: u32| {
                let (current, peak) = (Arc::clone(&c), Arc::clone(&p));
                async move {
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    current.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, ()>(())
                }
            },
        )
        .await;

        assert!(outcomes.iter().all(|o| o.is_ok()));
        assert_eq!(peak.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_task_times_out() {
        let settings = RunnerSettings {
            task_timeout: Duration::from_secs(2),
            ..settings(2)
        };
        let outcomes = run_all(
            vec![1u64, 10],
            &settings,
            &CancellationToken::new(),
            |secs| async move {
                tokio::time::sleep(Duration::from_secs(secs)).await;
                Ok::<_, ()>(secs)
            },
        )
        .await;

        assert!(matches!(outcomes[0], Ok(1)));
        assert!(matches!(
            outcomes[1],
            Err(TaskError::TimedOut(d)) if d == Duration::from_secs(2)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_stops_dispatch_and_abandons_after_grace() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            trigger.cancel();
        });

        let start = tokio::time::Instant::now();
        let outcomes = run_all(vec![1u64, 100, 100], &settings(1), &cancel, |secs| async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            Ok::<_, ()>(secs)
        })
        .await;

        assert!(matches!(outcomes[0], Ok(1)));
        assert!(outcomes[1].as_ref().is_err_and(|e| e.is_cancelled()));
        assert!(outcomes[2].as_ref().is_err_and(|e| e.is_cancelled()));
        // Cancelled at 2s, abandoned after the 5s grace.
        assert!(start.elapsed() <= Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_task_finishing_within_grace_keeps_result() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let outcomes = run_all(vec![3u64, 100], &settings(2), &cancel, |secs| async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            Ok::<_, ()>(secs)
        })
        .await;

        assert!(matches!(outcomes[0], Ok(3)));
        assert!(matches!(outcomes[1], Err(TaskError::Cancelled)));
    }

    #[tokio::test]
    async fn test_pre_cancelled_batch_runs_nothing() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let started = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&started);

        let outcomes = run_all(vec![1, 2, 3], &settings(4), &cancel, move |n: u32| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move { Ok::<_, ()>(n) }
        })
        .await;

        assert!(outcomes.iter().all(|o| matches!(o, Err(TaskError::Cancelled))));
        assert_eq!(started.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let outcomes: Vec<TaskOutcome<(), ()>> = run_all(
            Vec::<u8>::new(),
            &settings(4),
            &CancellationToken::new(),
            |_| async { Ok(()) },
        )
        .await;
        assert!(outcomes.is_empty());
    }
}
