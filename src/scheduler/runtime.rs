//! Per-proxy runtime scheduling state
//!
//! Kept entirely in memory and rebuilt from scratch on restart; a missing
//! entry means the proxy has never been used by this process.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Consecutive runtime failures that trigger cooldown and disqualification
pub const MAX_RUNTIME_FAILURES: i32 = 3;

/// How long a proxy is excluded from selection after repeated failure
pub const COOLDOWN_PERIOD: Duration = Duration::from_secs(5 * 60);

/// Recently-used damp window for the weight formula
pub const FRESHNESS_WINDOW: Duration = Duration::from_secs(60);

/// Runtime counters for one proxy
#[derive(Debug, Clone, Default)]
pub struct ProxyRuntime {
    pub last_used_at: Option<Instant>,
    pub use_count: i64,
    pub fail_count: i32,
    pub weight: Option<f64>,
    pub cooldown_until: Option<Instant>,
}

impl ProxyRuntime {
    /// Time since last use; `None` when never used
    pub fn idle_for(&self, now: Instant) -> Option<Duration> {
        self.last_used_at.map(|t| now.saturating_duration_since(t))
    }

    pub fn in_cooldown(&self, now: Instant) -> bool {
        matches!(self.cooldown_until, Some(until) if until > now)
    }

    /// Whether a cooldown entry exists but has already expired
    pub fn cooldown_expired(&self, now: Instant) -> bool {
        matches!(self.cooldown_until, Some(until) if until <= now)
    }
}

/// Runtime map over every proxy this process has touched
#[derive(Debug, Default)]
pub struct RuntimeState {
    entries: HashMap<i64, ProxyRuntime>,
}

impl RuntimeState {
    pub fn get(&self, proxy_id: i64) -> ProxyRuntime {
        self.entries.get(&proxy_id).cloned().unwrap_or_default()
    }

    pub fn entry(&mut self, proxy_id: i64) -> &mut ProxyRuntime {
        self.entries.entry(proxy_id).or_default()
    }

    /// Drop expired cooldown entries for the given proxies. Leaving
    /// cooldown also clears the failure streak, otherwise a cooled proxy
    /// could never become selectable again.
    pub fn purge_expired_cooldowns(&mut self, proxy_ids: &[i64], now: Instant) {
        for id in proxy_ids {
            if let Some(runtime) = self.entries.get_mut(id) {
                if runtime.cooldown_expired(now) {
                    runtime.cooldown_until = None;
                    runtime.fail_count = 0;
                    runtime.weight = None;
                }
            }
        }
    }

    /// Record a selection: bump usage and stamp last-used
    pub fn mark_selected(&mut self, proxy_id: i64, now: Instant) {
        let runtime = self.entry(proxy_id);
        runtime.last_used_at = Some(now);
        runtime.use_count += 1;
    }

    /// Record consumer feedback. A success clears failures and cooldown and
    /// invalidates the cached weight; the third consecutive failure starts
    /// the cooldown clock.
    pub fn mark_feedback(&mut self, proxy_id: i64, success: bool, now: Instant) {
        let runtime = self.entry(proxy_id);
        runtime.last_used_at = Some(now);
        runtime.use_count += 1;

        if success {
            runtime.fail_count = 0;
            runtime.cooldown_until = None;
            runtime.weight = None;
        } else {
            runtime.fail_count += 1;
            runtime.weight = None;
            if runtime.fail_count >= MAX_RUNTIME_FAILURES {
                runtime.cooldown_until = Some(now + COOLDOWN_PERIOD);
            }
        }
    }

    pub fn cache_weight(&mut self, proxy_id: i64, weight: f64) {
        self.entry(proxy_id).weight = Some(weight);
    }

    pub fn remove(&mut self, proxy_id: i64) {
        self.entries.remove(&proxy_id);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
