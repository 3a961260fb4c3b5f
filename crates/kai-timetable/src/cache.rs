//! In-memory timetable cache with retrying refresh.

use std::sync::Arc;
use std::time::Duration;

use moka::sync::Cache;
use tracing::{debug, info, warn};

use kai_core::{KaiError, Result, TimetableConfig};

use crate::calendar::normalize_group;
use crate::model::Timetable;
use crate::source::TimetableSource;

/// Exponential backoff between refresh attempts.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl BackoffPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    pub fn from_config(config: &TimetableConfig) -> Self {
        Self::new(
            config.refresh_attempts,
            Duration::from_secs(config.refresh_base_delay_secs),
        )
    }

    /// Delay after failed attempt `attempt` (1-based): base, 2x base, 4x base...
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << shift)
    }
}

/// Group code to timetable, bounded by capacity and time-to-live.
pub struct TimetableCache {
    entries: Cache<String, Arc<Timetable>>,
    backoff: BackoffPolicy,
}

impl TimetableCache {
    pub fn new(config: &TimetableConfig) -> Self {
        Self::with_policy(
            config.capacity,
            Duration::from_secs(config.ttl_secs),
            BackoffPolicy::from_config(config),
        )
    }

    pub fn with_policy(capacity: u64, ttl: Duration, backoff: BackoffPolicy) -> Self {
        let entries = Cache::builder()
            .max_capacity(capacity)
            .time_to_live(ttl)
            .build();
        Self { entries, backoff }
    }

    pub fn get(&self, group: &str) -> Option<Arc<Timetable>> {
        self.entries.get(&normalize_group(group))
    }

    pub fn insert(&self, timetable: Timetable) -> Arc<Timetable> {
        let key = normalize_group(&timetable.group);
        let value = Arc::new(timetable);
        self.entries.insert(key, Arc::clone(&value));
        value
    }

    pub fn invalidate(&self, group: &str) {
        self.entries.invalidate(&normalize_group(group));
    }

    /// Approximate number of cached groups.
    pub fn len(&self) -> u64 {
        self.entries.run_pending_tasks();
        self.entries.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fetch a fresh copy from `source` and cache it.
    ///
    /// Transient failures are retried with exponential backoff up to the
    /// attempt limit; a permanent failure is returned at once. The cached
    /// entry, if any, is left alone when the refresh fails.
    pub async fn refresh(&self, group: &str, source: &dyn TimetableSource) -> Result<Arc<Timetable>> {
        let group = normalize_group(group);
        let mut attempt = 1;
        loop {
            match source.fetch(&group).await {
                Ok(mut timetable) => {
                    timetable.group = group.clone();
                    info!(
                        "Timetable for {} refreshed from {} ({} lessons)",
                        group,
                        source.name(),
                        timetable.lesson_count()
                    );
                    return Ok(self.insert(timetable));
                }
                Err(e) if !e.is_transient() => {
                    debug!("Timetable fetch for {} failed permanently: {}", group, e);
                    return Err(e);
                }
                Err(e) if attempt >= self.backoff.max_attempts => {
                    warn!(
                        "Timetable fetch for {} gave up after {} attempts: {}",
                        group, attempt, e
                    );
                    return Err(KaiError::timetable(
                        group,
                        format!("gave up after {} attempts: {}", attempt, e),
                    ));
                }
                Err(e) => {
                    let delay = self.backoff.delay_for(attempt);
                    warn!(
                        "Timetable fetch for {} failed (attempt {}/{}), retrying in {:?}: {}",
                        group, attempt, self.backoff.max_attempts, delay, e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Cached timetable, or a refresh on miss.
    pub async fn get_or_refresh(
        &self,
        group: &str,
        source: &dyn TimetableSource,
    ) -> Result<Arc<Timetable>> {
        if let Some(hit) = self.get(group) {
            return Ok(hit);
        }
        self.refresh(group, source).await
    }
}
