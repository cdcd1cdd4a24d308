//! Per-provider request budgets.
//!
//! Each provider owns one [`RateBudget`] behind its own mutex, so callers for the same
//! provider serialize on the check and callers for different providers never contend.
//! The lock is only held for the bookkeeping, never across an await.

use crate::errors::{PipelineError, PipelineResult};
use crate::providers::Provider;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    pub requests_per_window: u32,
    #[serde(with = "secs")]
    pub window: Duration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests_per_day: Option<u32>,
}

mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

impl RateLimit {
    pub fn per_minute(requests: u32) -> Self {
        Self {
            requests_per_window: requests,
            window: Duration::from_secs(60),
            requests_per_day: None,
        }
    }

    pub fn per_window(requests: u32, window: Duration) -> Self {
        Self {
            requests_per_window: requests,
            window,
            requests_per_day: None,
        }
    }

    pub fn with_daily_limit(mut self, requests: u32) -> Self {
        self.requests_per_day = Some(requests);
        self
    }
}

/// Start of the period containing `now`, if `now` is past the period that began at `start`.
fn current_period_start(start: Instant, now: Instant, period: Duration) -> Option<Instant> {
    let elapsed = now.saturating_duration_since(start);
    if elapsed < period {
        return None;
    }
    let into_period = u64::try_from(elapsed.as_nanos() % period.as_nanos())
        .map(Duration::from_nanos)
        .unwrap_or(Duration::ZERO);
    Some(now - into_period)
}

/// Window accounting for one provider.
#[derive(Debug)]
pub struct RateBudget {
    limit: RateLimit,
    window_start: Instant,
    requests_in_window: u32,
    day_start: Instant,
    requests_today: u32,
    total_granted: u64,
    total_blocked: u64,
}

impl RateBudget {
    fn new(limit: RateLimit, now: Instant) -> Self {
        Self {
            limit,
            window_start: now,
            requests_in_window: 0,
            day_start: now,
            requests_today: 0,
            total_granted: 0,
            total_blocked: 0,
        }
    }

    /// Moves the window starts forward by whole periods; unused budget does not carry over.
    fn roll(&mut self, now: Instant) {
        let window = self.limit.window.max(Duration::from_millis(1));
        if let Some(start) = current_period_start(self.window_start, now, window) {
            self.window_start = start;
            self.requests_in_window = 0;
        }
        if let Some(start) = current_period_start(self.day_start, now, DAY) {
            self.day_start = start;
            self.requests_today = 0;
        }
    }

    /// Time until a request would be admitted, zero if one would be now.
    fn wait_time(&self, now: Instant) -> Duration {
        let mut wait = Duration::ZERO;
        if self.requests_in_window >= self.limit.requests_per_window {
            wait = (self.window_start + self.limit.window).saturating_duration_since(now);
        }
        if let Some(daily) = self.limit.requests_per_day {
            if self.requests_today >= daily {
                wait = wait.max((self.day_start + DAY).saturating_duration_since(now));
            }
        }
        wait
    }

    fn try_acquire(&mut self, now: Instant) -> Result<u32, Duration> {
        self.roll(now);
        let wait = self.wait_time(now);
        if wait > Duration::ZERO {
            self.total_blocked += 1;
            return Err(wait);
        }
        self.requests_in_window += 1;
        self.requests_today += 1;
        self.total_granted += 1;
        Ok(self
            .limit
            .requests_per_window
            .saturating_sub(self.requests_in_window))
    }

    fn stats(&self, provider: Provider, now: Instant) -> BudgetStats {
        BudgetStats {
            provider,
            limit_per_window: self.limit.requests_per_window,
            window_secs: self.limit.window.as_secs(),
            requests_in_window: self.requests_in_window,
            remaining_in_window: self
                .limit
                .requests_per_window
                .saturating_sub(self.requests_in_window),
            limit_per_day: self.limit.requests_per_day,
            requests_today: self.requests_today,
            total_granted: self.total_granted,
            total_blocked: self.total_blocked,
            retry_after_ms: self.wait_time(now).as_millis() as u64,
        }
    }
}

/// Proof that one unit of budget was consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Permit {
    pub provider: Provider,
    /// Requests left in the current window, `None` when the provider is unlimited.
    pub remaining: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BudgetStats {
    pub provider: Provider,
    pub limit_per_window: u32,
    pub window_secs: u64,
    pub requests_in_window: u32,
    pub remaining_in_window: u32,
    pub limit_per_day: Option<u32>,
    pub requests_today: u32,
    pub total_granted: u64,
    pub total_blocked: u64,
    pub retry_after_ms: u64,
}

/// Budget tracker for all providers. Built once at startup and shared by handle.
#[derive(Debug, Default)]
pub struct RateLimiter {
    budgets: BTreeMap<Provider, Mutex<RateBudget>>,
}

impl RateLimiter {
    pub fn new(limits: impl IntoIterator<Item = (Provider, RateLimit)>) -> Self {
        let now = Instant::now();
        Self {
            budgets: limits
                .into_iter()
                .map(|(p, l)| (p, Mutex::new(RateBudget::new(l, now))))
                .collect(),
        }
    }

    /// No provider is limited.
    pub fn unlimited() -> Self {
        Self::default()
    }

    /// Consumes one request for `provider`, or reports how long until one is available.
    pub fn acquire(&self, provider: Provider) -> PipelineResult<Permit> {
        let Some(budget) = self.budgets.get(&provider) else {
            return Ok(Permit {
                provider,
                remaining: None,
            });
        };
        let now = Instant::now();
        let outcome = budget
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .try_acquire(now);
        match outcome {
            Ok(remaining) => Ok(Permit {
                provider,
                remaining: Some(remaining),
            }),
            Err(retry_after) => {
                debug!(provider = %provider, retry_after_ms = retry_after.as_millis() as u64, "rate budget spent");
                Err(PipelineError::RateLimited {
                    provider,
                    retry_after,
                })
            }
        }
    }

    /// Like [`acquire`](Self::acquire) but sleeps through `retry_after` hints while the
    /// total wait stays within `max_wait`.
    pub async fn acquire_within(&self, provider: Provider, max_wait: Duration) -> PipelineResult<Permit> {
        let started = Instant::now();
        loop {
            match self.acquire(provider) {
                Err(PipelineError::RateLimited { retry_after, .. })
                    if started.elapsed() + retry_after <= max_wait =>
                {
                    tokio::time::sleep(retry_after).await;
                }
                other => return other,
            }
        }
    }

    pub fn stats(&self, provider: Provider) -> Option<BudgetStats> {
        let budget = self.budgets.get(&provider)?;
        let now = Instant::now();
        let mut guard = budget.lock().unwrap_or_else(PoisonError::into_inner);
        guard.roll(now);
        Some(guard.stats(provider, now))
    }

    pub fn all_stats(&self) -> Vec<BudgetStats> {
        self.budgets
            .keys()
            .filter_map(|p| self.stats(*p))
            .collect()
    }
}
