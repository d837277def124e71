// Rate budget for outbound GitHub requests.
// Admits requests against a per-minute ceiling, burst allowance, and the remote quota.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;
use tracing::debug;

use crate::config::Config;
use crate::error::ApiError;

use super::types::RateLimit;

/// Length of the local accounting window.
pub const WINDOW: Duration = Duration::from_secs(60);

/// Limits applied by a [`RateBudget`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BudgetSettings {
    pub requests_per_minute: u32,
    pub burst: u32,
    /// Minimum spacing between requests once past the steady-state rate.
    pub delay: Duration,
    /// Remote remaining-quota level below which calls are spread out.
    pub buffer: u64,
    /// Longest single wait before the request is surfaced as rate limited.
    pub max_wait: Duration,
}

impl From<&Config> for BudgetSettings {
    fn from(config: &Config) -> Self {
        Self {
            requests_per_minute: config.rate_limit_requests_per_minute,
            burst: config.rate_limit_burst_size,
            delay: config.rate_limit_delay(),
            buffer: config.rate_limit_buffer,
            max_wait: config.rate_limit_max_wait(),
        }
    }
}

#[derive(Debug)]
struct BudgetState {
    window_start: Instant,
    used: u32,
    last_admit: Option<Instant>,
    remote: Option<RateLimit>,
}

enum Decision {
    Admit,
    Wait {
        duration: Duration,
        reset_at: Option<DateTime<Utc>>,
    },
}

/// Point-in-time view of the budget, for reporting.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct BudgetSnapshot {
    pub used_in_window: u32,
    pub requests_per_minute: u32,
    pub burst: u32,
    pub remote: Option<RateLimit>,
}

/// Shared request budget.
///
/// Every admission decision and counter update happens under one mutex, so
/// two workers can never both take the last slot. The lock is never held
/// across an await.
#[derive(Debug)]
pub struct RateBudget {
    settings: BudgetSettings,
    state: Mutex<BudgetState>,
}

impl RateBudget {
    pub fn new(settings: BudgetSettings) -> Self {
        Self {
            settings,
            state: Mutex::new(BudgetState {
                window_start: Instant::now(),
                used: 0,
                last_admit: None,
                remote: None,
            }),
        }
    }

    pub fn settings(&self) -> &BudgetSettings {
        &self.settings
    }

    fn lock(&self) -> MutexGuard<'_, BudgetState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait until one more request may be sent, then reserve it.
    ///
    /// Returns how long the caller was held back. A required wait longer than
    /// `max_wait` is returned as [`ApiError::RateLimited`] instead.
    pub async fn acquire(&self, endpoint: &str) -> Result<Duration, ApiError> {
        let mut waited = Duration::ZERO;
        loop {
            let decision = {
                let mut state = self.lock();
                self.decide(&mut state, Instant::now(), Utc::now())
            };

            match decision {
                Decision::Admit => return Ok(waited),
                Decision::Wait { duration, reset_at } => {
                    if duration > self.settings.max_wait {
                        return Err(ApiError::RateLimited {
                            endpoint: endpoint.to_string(),
                            reset_at,
                            retry_after: Some(duration),
                        });
                    }
                    debug!(
                        endpoint,
                        wait_ms = duration.as_millis() as u64,
                        "Rate budget delaying request"
                    );
                    tokio::time::sleep(duration).await;
                    waited += duration;
                }
            }
        }
    }

    fn decide(&self, state: &mut BudgetState, now: Instant, wall_now: DateTime<Utc>) -> Decision {
        let settings = &self.settings;

        if now.duration_since(state.window_start) >= WINDOW {
            state.window_start = now;
            state.used = 0;
        }

        // Remote quota first: it is the limit that actually rejects requests.
        if let Some(quota) = state.remote {
            let reset_at = quota.reset_at();
            let until_reset = reset_at
                .and_then(|reset| reset.signed_duration_since(wall_now).to_std().ok())
                .unwrap_or(Duration::ZERO);

            if until_reset.is_zero() {
                state.remote = None;
            } else if quota.remaining == 0 {
                return Decision::Wait {
                    duration: until_reset,
                    reset_at,
                };
            } else if quota.remaining < settings.buffer {
                let spacing = settings
                    .delay
                    .max(until_reset / (quota.remaining as u32).saturating_add(1));
                if let Some(wait) = remaining_spacing(state.last_admit, spacing, now) {
                    return Decision::Wait {
                        duration: wait,
                        reset_at,
                    };
                }
            }
        }

        let ceiling = settings.requests_per_minute;
        if state.used >= ceiling.saturating_add(settings.burst) {
            return Decision::Wait {
                duration: (state.window_start + WINDOW).saturating_duration_since(now),
                reset_at: None,
            };
        }
        if state.used >= ceiling {
            if let Some(wait) = remaining_spacing(state.last_admit, settings.delay, now) {
                return Decision::Wait {
                    duration: wait,
                    reset_at: None,
                };
            }
        }

        state.used += 1;
        state.last_admit = Some(now);
        if let Some(quota) = state.remote.as_mut() {
            quota.remaining = quota.remaining.saturating_sub(1);
        }
        Decision::Admit
    }

    /// Record quota reported by the server.
    pub fn observe(&self, quota: RateLimit) {
        let mut state = self.lock();
        // A slower response from earlier in the same window; keep the lower count.
        let stale = matches!(
            state.remote,
            Some(current) if current.reset == quota.reset && current.remaining < quota.remaining
        );
        if !stale {
            state.remote = Some(quota);
        }
    }

    pub fn snapshot(&self) -> BudgetSnapshot {
        let state = self.lock();
        BudgetSnapshot {
            used_in_window: state.used,
            requests_per_minute: self.settings.requests_per_minute,
            burst: self.settings.burst,
            remote: state.remote,
        }
    }
}

/// Time still to wait for `spacing` to elapse since the last admission.
fn remaining_spacing(last: Option<Instant>, spacing: Duration, now: Instant) -> Option<Duration> {
    let due = last? + spacing;
    (due > now).then(|| due - now)
}
