//! Strategy-based proxy scheduling
//!
//! Selects a proxy for a consumer task from a live candidate set and closes
//! the feedback loop that drives runtime failure counts and cooldown. Store
//! rows are a stale snapshot at selection time; races are resolved at
//! feedback time.

mod runtime;
mod strategies;

pub use runtime::{COOLDOWN_PERIOD, MAX_RUNTIME_FAILURES};

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use crate::error::{CorralError, Result};
use crate::models::{Proxy, ProxyType};
use runtime::{ProxyRuntime, RuntimeState, FRESHNESS_WINDOW};
use strategies::Candidate;

/// How many store rows a single selection considers
const CANDIDATE_BATCH: i64 = 50;

/// Scheduling strategy requested by a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    #[default]
    Weighted,
    RoundRobin,
    LeastUsed,
    Failover,
    SiteAdaptive,
    /// Uniform-random; also what unknown strategy names resolve to
    Random,
}

impl Strategy {
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "weighted" => Self::Weighted,
            "roundrobin" => Self::RoundRobin,
            "leastused" => Self::LeastUsed,
            "failover" => Self::Failover,
            "site_adaptive" => Self::SiteAdaptive,
            _ => Self::Random,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Weighted => "weighted",
            Self::RoundRobin => "roundrobin",
            Self::LeastUsed => "leastused",
            Self::Failover => "failover",
            Self::SiteAdaptive => "site_adaptive",
            Self::Random => "random",
        }
    }
}

/// A consumer task asking for a proxy
#[derive(Debug, Clone)]
pub struct Task {
    pub proxy_type: Option<ProxyType>,
    pub strategy: Strategy,
    pub target_url: Option<String>,
    pub domain: Option<String>,
    pub require_anon: bool,
    /// Upper bound on the proxy's average response time, in milliseconds
    pub min_speed: Option<i64>,
    pub timeout: Duration,
    pub retry_count: i32,
}

impl Default for Task {
    fn default() -> Self {
        Self {
            proxy_type: None,
            strategy: Strategy::Weighted,
            target_url: None,
            domain: None,
            require_anon: false,
            min_speed: None,
            timeout: Duration::from_secs(10),
            retry_count: 0,
        }
    }
}

/// The slice of pool capability the scheduler is allowed to see.
/// Tests inject fakes through this seam.
#[async_trait]
pub trait ProxyDirectory: Send + Sync {
    /// Fetch the current candidate rows, optionally filtered by type
    async fn get_proxies(&self, proxy_type: Option<ProxyType>, limit: i64) -> Result<Vec<Proxy>>;

    /// Persist consumer feedback for a proxy
    async fn update_proxy_status(&self, proxy_id: i64, success: bool, speed: i64) -> Result<()>;
}

/// In-flight lease tracking, keyed by proxy id
#[derive(Debug, Default)]
pub struct LeaseTracker {
    leases: dashmap::DashMap<i64, usize>,
}

impl LeaseTracker {
    pub fn new() -> Self {
        Self {
            leases: dashmap::DashMap::new(),
        }
    }

    pub fn acquire(&self, proxy_id: i64) {
        self.leases
            .entry(proxy_id)
            .and_modify(|c| *c += 1)
            .or_insert(1);
    }

    pub fn release(&self, proxy_id: i64) {
        self.leases.entry(proxy_id).and_modify(|c| {
            if *c > 0 {
                *c -= 1;
            }
        });
    }

    pub fn get(&self, proxy_id: i64) -> usize {
        self.leases.get(&proxy_id).map(|v| *v).unwrap_or(0)
    }

    pub fn clear(&self, proxy_id: i64) {
        self.leases.remove(&proxy_id);
    }
}

/// Proxy scheduler
pub struct Scheduler {
    directory: Arc<dyn ProxyDirectory>,
    runtime: RwLock<RuntimeState>,
    leases: LeaseTracker,
}

impl Scheduler {
    pub fn new(directory: Arc<dyn ProxyDirectory>) -> Self {
        Self {
            directory,
            runtime: RwLock::new(RuntimeState::default()),
            leases: LeaseTracker::new(),
        }
    }

    /// Select a proxy for a task
    pub async fn schedule(&self, task: &Task) -> Result<Proxy> {
        let proxies = self
            .directory
            .get_proxies(task.proxy_type, CANDIDATE_BATCH)
            .await?;

        let selected = self.select_from(task, proxies, Instant::now())?;
        self.leases.acquire(selected.id);

        debug!(
            proxy_id = selected.id,
            strategy = task.strategy.as_str(),
            "Scheduled proxy"
        );

        Ok(selected)
    }

    /// Selection core over a candidate snapshot. The runtime map is held
    /// for one short critical section so qualification, the strategy pick
    /// and the usage bump are atomic with respect to feedback.
    fn select_from(&self, task: &Task, proxies: Vec<Proxy>, now: Instant) -> Result<Proxy> {
        if proxies.is_empty() {
            return Err(CorralError::NoProxyAvailable);
        }

        let ids: Vec<i64> = proxies.iter().map(|p| p.id).collect();

        let mut state = self.runtime.write();
        state.purge_expired_cooldowns(&ids, now);

        let mut candidates: Vec<Candidate> = Vec::with_capacity(proxies.len());
        for proxy in proxies {
            let rt = state.get(proxy.id);
            if !is_qualified(&proxy, &rt, task, now) {
                continue;
            }

            let weight = match rt.weight {
                Some(w) => w,
                None => {
                    let w = compute_weight(&proxy, &rt, now);
                    state.cache_weight(proxy.id, w);
                    w
                }
            };

            candidates.push(Candidate {
                proxy,
                runtime: rt,
                weight,
            });
        }

        if candidates.is_empty() {
            return Err(CorralError::NoQualifiedProxy);
        }

        let picked = match task.strategy {
            Strategy::Weighted => strategies::pick_weighted(&candidates),
            Strategy::RoundRobin => strategies::pick_round_robin(&candidates),
            Strategy::LeastUsed => strategies::pick_least_used(&candidates),
            Strategy::Failover => strategies::pick_failover(&candidates),
            Strategy::SiteAdaptive => match task.domain {
                Some(_) => strategies::pick_site_adaptive(&candidates, now),
                None => strategies::pick_random(&candidates),
            },
            Strategy::Random => strategies::pick_random(&candidates),
        }
        .ok_or(CorralError::NoQualifiedProxy)?;

        let selected = candidates.swap_remove(picked).proxy;
        state.mark_selected(selected.id, now);

        Ok(selected)
    }

    /// Consumer feedback: update the runtime map, release the lease and
    /// persist through the pool capability.
    pub async fn report(&self, proxy_id: i64, success: bool, speed: i64) -> Result<()> {
        self.report_runtime(proxy_id, success, Instant::now());
        self.leases.release(proxy_id);
        self.directory
            .update_proxy_status(proxy_id, success, speed)
            .await
    }

    fn report_runtime(&self, proxy_id: i64, success: bool, now: Instant) {
        let mut state = self.runtime.write();
        state.mark_feedback(proxy_id, success, now);
    }

    /// Give back a lease without recording feedback, e.g. when the store
    /// refused it
    pub fn cancel(&self, proxy_id: i64) {
        self.leases.release(proxy_id);
    }

    /// Drop all runtime knowledge of a proxy (eviction path)
    pub fn forget(&self, proxy_id: i64) {
        self.runtime.write().remove(proxy_id);
        self.leases.clear(proxy_id);
    }

    /// Runtime failure count for a proxy (0 when never seen)
    pub fn runtime_fail_count(&self, proxy_id: i64) -> i32 {
        self.runtime.read().get(proxy_id).fail_count
    }

    /// Runtime use count for a proxy (0 when never seen)
    pub fn runtime_use_count(&self, proxy_id: i64) -> i64 {
        self.runtime.read().get(proxy_id).use_count
    }

    /// In-flight lease count for a proxy
    pub fn lease_count(&self, proxy_id: i64) -> usize {
        self.leases.get(proxy_id)
    }
}

/// Task-level qualification filter, applied before every strategy
fn is_qualified(proxy: &Proxy, runtime: &ProxyRuntime, task: &Task, now: Instant) -> bool {
    if !proxy.available {
        return false;
    }

    if let Some(required) = task.proxy_type {
        if proxy.proxy_type != required {
            return false;
        }
    }

    if runtime.fail_count >= MAX_RUNTIME_FAILURES {
        return false;
    }

    if runtime.in_cooldown(now) {
        return false;
    }

    if task.require_anon && !proxy.anonymous {
        return false;
    }

    if let Some(max_latency) = task.min_speed {
        if proxy.speed > 0 && proxy.speed > max_latency {
            return false;
        }
    }

    true
}

/// Weight of a candidate for the weighted strategy:
/// score, damped by slowness, recent use and runtime failures.
fn compute_weight(proxy: &Proxy, runtime: &ProxyRuntime, now: Instant) -> f64 {
    let speed_factor = (1000.0 / proxy.speed.max(1) as f64).clamp(0.1, 10.0);

    let freshness = match runtime.idle_for(now) {
        Some(idle) if idle < FRESHNESS_WINDOW => 0.8,
        _ => 1.0,
    };

    let fail_penalty = 1.0 / (runtime.fail_count as f64 + 1.0);

    proxy.score * 100.0 * speed_factor * freshness * fail_penalty
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ProxyProtocol, ProxyRegion};
    use chrono::Utc;
    use parking_lot::Mutex;

    fn proxy(id: i64) -> Proxy {
        Proxy {
            id,
            ip: format!("10.0.0.{id}"),
            port: 8080,
            protocol: ProxyProtocol::Http,
            proxy_type: ProxyType::Anon,
            region: ProxyRegion::Other,
            source: "test".to_string(),
            anonymous: true,
            speed: 500,
            success: 0,
            failure: 0,
            fail_count: 0,
            use_count: 0,
            concurrent_use: 0,
            max_concurrent: 10,
            score: 50.0,
            available: true,
            last_check: Utc::now(),
            last_used_at: None,
            created_at: Utc::now(),
            deleted_at: None,
            version: 0,
        }
    }

    struct FakeDirectory {
        proxies: Mutex<Vec<Proxy>>,
        reports: Mutex<Vec<(i64, bool, i64)>>,
    }

    impl FakeDirectory {
        fn new(proxies: Vec<Proxy>) -> Self {
            Self {
                proxies: Mutex::new(proxies),
                reports: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ProxyDirectory for FakeDirectory {
        async fn get_proxies(
            &self,
            proxy_type: Option<ProxyType>,
            _limit: i64,
        ) -> Result<Vec<Proxy>> {
            let proxies = self.proxies.lock();
            Ok(proxies
                .iter()
                .filter(|p| proxy_type.map_or(true, |t| p.proxy_type == t))
                .cloned()
                .collect())
        }

        async fn update_proxy_status(
            &self,
            proxy_id: i64,
            success: bool,
            speed: i64,
        ) -> Result<()> {
            self.reports.lock().push((proxy_id, success, speed));
            Ok(())
        }
    }

    fn scheduler_with(proxies: Vec<Proxy>) -> (Scheduler, Arc<FakeDirectory>) {
        let directory = Arc::new(FakeDirectory::new(proxies));
        (Scheduler::new(directory.clone()), directory)
    }

    #[test]
    fn test_strategy_from_str() {
        assert_eq!(Strategy::from_str("weighted"), Strategy::Weighted);
        assert_eq!(Strategy::from_str("RoundRobin"), Strategy::RoundRobin);
        assert_eq!(Strategy::from_str("leastused"), Strategy::LeastUsed);
        assert_eq!(Strategy::from_str("failover"), Strategy::Failover);
        assert_eq!(Strategy::from_str("site_adaptive"), Strategy::SiteAdaptive);
        assert_eq!(Strategy::from_str("anything-else"), Strategy::Random);
    }

    #[tokio::test]
    async fn test_schedule_empty_pool_is_no_proxy_available() {
        let (scheduler, _) = scheduler_with(Vec::new());
        let result = scheduler.schedule(&Task::default()).await;
        assert!(matches!(result, Err(CorralError::NoProxyAvailable)));
    }

    #[tokio::test]
    async fn test_schedule_all_unavailable_is_no_qualified() {
        let mut p = proxy(1);
        p.available = false;
        let (scheduler, _) = scheduler_with(vec![p]);

        let result = scheduler.schedule(&Task::default()).await;
        assert!(matches!(result, Err(CorralError::NoQualifiedProxy)));
    }

    #[tokio::test]
    async fn test_schedule_bumps_runtime_use_count() {
        let (scheduler, _) = scheduler_with(vec![proxy(1)]);

        let before = scheduler.runtime_use_count(1);
        let selected = scheduler.schedule(&Task::default()).await.unwrap();
        assert_eq!(selected.id, 1);
        assert!(scheduler.runtime_use_count(1) > before);
        assert_eq!(scheduler.lease_count(1), 1);
    }

    #[tokio::test]
    async fn test_report_releases_lease_and_persists() {
        let (scheduler, directory) = scheduler_with(vec![proxy(1)]);

        scheduler.schedule(&Task::default()).await.unwrap();
        scheduler.report(1, true, 321).await.unwrap();

        assert_eq!(scheduler.lease_count(1), 0);
        assert_eq!(directory.reports.lock().as_slice(), &[(1, true, 321)]);
    }

    #[tokio::test]
    async fn test_failover_prefers_clean_proxy_after_success_report() {
        let (scheduler, _) = scheduler_with(vec![proxy(1), proxy(2)]);

        // Sully proxy 2, then clear it with a success
        scheduler.report(2, false, 0).await.unwrap();
        scheduler.report(2, true, 100).await.unwrap();
        assert_eq!(scheduler.runtime_fail_count(2), 0);

        // Proxy 1 keeps one failure
        scheduler.report(1, false, 0).await.unwrap();

        let task = Task {
            strategy: Strategy::Failover,
            ..Task::default()
        };
        let selected = scheduler.schedule(&task).await.unwrap();
        assert_eq!(selected.id, 2);
    }

    #[tokio::test]
    async fn test_cooldown_excludes_proxy_until_it_expires() {
        let (scheduler, _) = scheduler_with(vec![proxy(1)]);
        let now = Instant::now();

        for _ in 0..3 {
            scheduler.report(1, false, 0).await.unwrap();
        }

        // All candidates cooling: never a cooled proxy, always NoQualified
        let task = Task {
            strategy: Strategy::Failover,
            ..Task::default()
        };
        let result = scheduler.select_from(&task, vec![proxy(1)], now);
        assert!(matches!(result, Err(CorralError::NoQualifiedProxy)));

        // After the cooldown period the proxy becomes selectable again
        let later = now + COOLDOWN_PERIOD + Duration::from_secs(1);
        let selected = scheduler.select_from(&task, vec![proxy(1)], later).unwrap();
        assert_eq!(selected.id, 1);
        // The stale cooldown entry was dropped along with its failure streak
        assert_eq!(scheduler.runtime_fail_count(1), 0);
    }

    #[tokio::test]
    async fn test_require_anon_filter() {
        let mut transparent = proxy(1);
        transparent.proxy_type = ProxyType::Temp;
        transparent.anonymous = false;
        let (scheduler, _) = scheduler_with(vec![transparent]);

        let task = Task {
            require_anon: true,
            ..Task::default()
        };
        let result = scheduler.schedule(&task).await;
        assert!(matches!(result, Err(CorralError::NoQualifiedProxy)));
    }

    #[tokio::test]
    async fn test_min_speed_filter() {
        let mut slow = proxy(1);
        slow.speed = 4000;
        let mut fast = proxy(2);
        fast.speed = 200;
        let (scheduler, _) = scheduler_with(vec![slow, fast]);

        let task = Task {
            min_speed: Some(1000),
            strategy: Strategy::Random,
            ..Task::default()
        };

        for _ in 0..20 {
            let selected = scheduler.schedule(&task).await.unwrap();
            assert_eq!(selected.id, 2);
        }
    }

    #[tokio::test]
    async fn test_type_filter() {
        let mut long = proxy(1);
        long.proxy_type = ProxyType::Long;
        long.anonymous = false;
        let anon = proxy(2);
        let (scheduler, _) = scheduler_with(vec![long, anon]);

        let task = Task {
            proxy_type: Some(ProxyType::Long),
            strategy: Strategy::Random,
            ..Task::default()
        };
        let selected = scheduler.schedule(&task).await.unwrap();
        assert_eq!(selected.id, 1);
    }

    #[tokio::test]
    async fn test_forget_drops_runtime_state() {
        let (scheduler, _) = scheduler_with(vec![proxy(1)]);

        scheduler.schedule(&Task::default()).await.unwrap();
        scheduler.report(1, false, 0).await.unwrap();
        assert!(scheduler.runtime_use_count(1) > 0);

        scheduler.forget(1);
        assert_eq!(scheduler.runtime_use_count(1), 0);
        assert_eq!(scheduler.runtime_fail_count(1), 0);
        assert_eq!(scheduler.lease_count(1), 0);
    }

    #[test]
    fn test_compute_weight_shape() {
        let now = Instant::now();
        let mut p = proxy(1);
        p.score = 50.0;
        p.speed = 1000;
        let rt = ProxyRuntime::default();

        // Neutral speed factor, no damping
        assert!((compute_weight(&p, &rt, now) - 5000.0).abs() < 1e-9);

        // Faster proxies weigh more, clamped at 10x
        p.speed = 10;
        assert!((compute_weight(&p, &rt, now) - 50_000.0).abs() < 1e-9);

        // Very slow proxies bottom out at 0.1x
        p.speed = 100_000;
        assert!((compute_weight(&p, &rt, now) - 500.0).abs() < 1e-9);

        // Unmeasured speed is treated as 1 ms, then clamped
        p.speed = 0;
        assert!((compute_weight(&p, &rt, now) - 50_000.0).abs() < 1e-9);
    }

    #[test]
    fn test_compute_weight_damping() {
        // Work in the future so subtracting never underflows the clock
        let now = Instant::now() + Duration::from_secs(600);
        let mut p = proxy(1);
        p.score = 50.0;
        p.speed = 1000;

        // Used within the last minute: 0.8 damp
        let rt = ProxyRuntime {
            last_used_at: Some(now - Duration::from_secs(10)),
            ..Default::default()
        };
        assert!((compute_weight(&p, &rt, now) - 4000.0).abs() < 1e-9);

        // Runtime failures divide the weight
        let rt = ProxyRuntime {
            fail_count: 1,
            ..Default::default()
        };
        assert!((compute_weight(&p, &rt, now) - 2500.0).abs() < 1e-9);
    }
}
