//! Selection strategies over a qualified candidate set
//!
//! Every function operates on a snapshot of store rows plus runtime
//! counters and returns an index into the candidate slice.

use super::runtime::ProxyRuntime;
use crate::models::Proxy;
use rand::Rng;
use std::cmp::Ordering;
use std::time::{Duration, Instant};

/// Tiebreak window for the site-adaptive idle comparison
const IDLE_TIEBREAK: Duration = Duration::from_secs(5);

/// How many top-ranked survivors the site-adaptive pick draws from
const ADAPTIVE_POOL: usize = 3;

/// Use-count bucket width for site-adaptive ranking
const USE_COUNT_BUCKET: i64 = 3;

/// A qualified candidate: store row + runtime snapshot + resolved weight
#[derive(Debug, Clone)]
pub(crate) struct Candidate {
    pub proxy: Proxy,
    pub runtime: ProxyRuntime,
    pub weight: f64,
}

/// Weighted-random pick over the resolved weights, with a single uniform
/// draw across the cumulative sum. Falls back to uniform when every weight
/// is zero.
pub(crate) fn pick_weighted(candidates: &[Candidate]) -> Option<usize> {
    if candidates.is_empty() {
        return None;
    }

    let total: f64 = candidates.iter().map(|c| c.weight.max(0.0)).sum();
    if total <= 0.0 {
        return pick_random(candidates);
    }

    let mut draw = rand::thread_rng().gen_range(0.0..total);
    for (i, candidate) in candidates.iter().enumerate() {
        draw -= candidate.weight.max(0.0);
        if draw <= 0.0 {
            return Some(i);
        }
    }

    Some(candidates.len() - 1)
}

/// Smallest `last_used_at` wins; never-used proxies come first; ties broken
/// by id
pub(crate) fn pick_round_robin(candidates: &[Candidate]) -> Option<usize> {
    candidates
        .iter()
        .enumerate()
        .min_by_key(|(_, c)| (c.runtime.last_used_at, c.proxy.id))
        .map(|(i, _)| i)
}

/// Smallest runtime `use_count` wins
pub(crate) fn pick_least_used(candidates: &[Candidate]) -> Option<usize> {
    candidates
        .iter()
        .enumerate()
        .min_by_key(|(_, c)| (c.runtime.use_count, c.proxy.id))
        .map(|(i, _)| i)
}

/// Smallest runtime `fail_count` wins
pub(crate) fn pick_failover(candidates: &[Candidate]) -> Option<usize> {
    candidates
        .iter()
        .enumerate()
        .min_by_key(|(_, c)| (c.runtime.fail_count, c.proxy.id))
        .map(|(i, _)| i)
}

/// Uniform-random pick
pub(crate) fn pick_random(candidates: &[Candidate]) -> Option<usize> {
    if candidates.is_empty() {
        return None;
    }
    Some(rand::thread_rng().gen_range(0..candidates.len()))
}

/// Site-adaptive ranking, then a uniform pick from the top survivors to
/// break synchronised hotspots.
///
/// Ordering: (1) lower use-count bucket, (2) longer idle when either side
/// has been idle past the tiebreak window, (3) higher score.
pub(crate) fn pick_site_adaptive(candidates: &[Candidate], now: Instant) -> Option<usize> {
    if candidates.is_empty() {
        return None;
    }

    let mut order: Vec<usize> = (0..candidates.len()).collect();
    order.sort_by(|&a, &b| adaptive_cmp(&candidates[a], &candidates[b], now));

    let pool = order.len().min(ADAPTIVE_POOL);
    let picked = rand::thread_rng().gen_range(0..pool);
    Some(order[picked])
}

fn adaptive_cmp(a: &Candidate, b: &Candidate, now: Instant) -> Ordering {
    let bucket_a = a.runtime.use_count / USE_COUNT_BUCKET;
    let bucket_b = b.runtime.use_count / USE_COUNT_BUCKET;
    if bucket_a != bucket_b {
        return bucket_a.cmp(&bucket_b);
    }

    // Never-used counts as idle forever
    let idle_a = a.runtime.idle_for(now).unwrap_or(Duration::MAX);
    let idle_b = b.runtime.idle_for(now).unwrap_or(Duration::MAX);
    if idle_a > IDLE_TIEBREAK || idle_b > IDLE_TIEBREAK {
        return idle_b.cmp(&idle_a);
    }

    b.proxy
        .score
        .partial_cmp(&a.proxy.score)
        .unwrap_or(Ordering::Equal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ProxyProtocol, ProxyRegion, ProxyType};
    use chrono::Utc;

    fn proxy(id: i64, score: f64) -> Proxy {
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
            score,
            available: true,
            last_check: Utc::now(),
            last_used_at: None,
            created_at: Utc::now(),
            deleted_at: None,
            version: 0,
        }
    }

    fn candidate(id: i64, score: f64, weight: f64) -> Candidate {
        Candidate {
            proxy: proxy(id, score),
            runtime: ProxyRuntime::default(),
            weight,
        }
    }

    #[test]
    fn test_empty_candidate_sets() {
        let now = Instant::now();
        assert!(pick_weighted(&[]).is_none());
        assert!(pick_round_robin(&[]).is_none());
        assert!(pick_least_used(&[]).is_none());
        assert!(pick_failover(&[]).is_none());
        assert!(pick_random(&[]).is_none());
        assert!(pick_site_adaptive(&[], now).is_none());
    }

    #[test]
    fn test_weighted_prefers_heavier_candidates() {
        let candidates = vec![candidate(1, 50.0, 1.0), candidate(2, 50.0, 10_000.0)];

        let mut picked_heavy = 0;
        for _ in 0..1000 {
            if pick_weighted(&candidates) == Some(1) {
                picked_heavy += 1;
            }
        }

        // The heavy candidate carries ~99.99% of the mass
        assert!(picked_heavy > 950, "picked heavy only {picked_heavy}/1000");
    }

    #[test]
    fn test_weighted_zero_weights_falls_back_to_uniform() {
        let candidates = vec![candidate(1, 0.0, 0.0), candidate(2, 0.0, 0.0)];

        let mut counts = [0usize; 2];
        for _ in 0..2000 {
            counts[pick_weighted(&candidates).unwrap()] += 1;
        }

        assert!(counts[0] > 0 && counts[1] > 0);
    }

    #[test]
    fn test_weighted_equal_weights_close_to_uniform() {
        let candidates: Vec<Candidate> =
            (1..=4).map(|id| candidate(id, 50.0, 100.0)).collect();

        let draws = 10_000usize;
        let mut counts = [0usize; 4];
        for _ in 0..draws {
            counts[pick_weighted(&candidates).unwrap()] += 1;
        }

        let expected = draws as f64 / 4.0;
        for count in counts {
            let deviation = (count as f64 - expected).abs() / expected;
            assert!(deviation < 0.10, "deviation {deviation} exceeds 10%");
        }
    }

    #[test]
    fn test_round_robin_prefers_longest_idle() {
        // Work in the future so subtracting never underflows the clock
        let now = Instant::now() + Duration::from_secs(600);

        let mut a = candidate(1, 50.0, 1.0);
        a.runtime.last_used_at = Some(now - Duration::from_secs(10));
        let mut b = candidate(2, 50.0, 1.0);
        b.runtime.last_used_at = Some(now - Duration::from_secs(100));

        assert_eq!(pick_round_robin(&[a, b]), Some(1));
    }

    #[test]
    fn test_round_robin_never_used_wins_with_id_tiebreak() {
        let now = Instant::now();

        let mut used = candidate(1, 50.0, 1.0);
        used.runtime.last_used_at = Some(now);
        let fresh_a = candidate(3, 50.0, 1.0);
        let fresh_b = candidate(2, 50.0, 1.0);

        // Both never used; the smaller id wins
        assert_eq!(pick_round_robin(&[used, fresh_a, fresh_b]), Some(2));
    }

    #[test]
    fn test_least_used_picks_smallest_counter() {
        let mut a = candidate(1, 50.0, 1.0);
        a.runtime.use_count = 10;
        let mut b = candidate(2, 50.0, 1.0);
        b.runtime.use_count = 2;
        let mut c = candidate(3, 50.0, 1.0);
        c.runtime.use_count = 7;

        assert_eq!(pick_least_used(&[a, b, c]), Some(1));
    }

    #[test]
    fn test_failover_picks_fewest_failures() {
        let mut a = candidate(1, 50.0, 1.0);
        a.runtime.fail_count = 2;
        let mut b = candidate(2, 50.0, 1.0);
        b.runtime.fail_count = 0;
        let mut c = candidate(3, 50.0, 1.0);
        c.runtime.fail_count = 1;

        assert_eq!(pick_failover(&[a, b, c]), Some(1));
    }

    #[test]
    fn test_site_adaptive_prefers_lower_use_bucket() {
        let now = Instant::now();

        // ids 1-3 all heavily used, id 4 fresh; the fresh one must always be
        // in the drawing pool and ranked first
        let mut candidates: Vec<Candidate> = (1..=3)
            .map(|id| {
                let mut c = candidate(id, 90.0, 1.0);
                c.runtime.use_count = 30;
                c.runtime.last_used_at = Some(now);
                c
            })
            .collect();
        candidates.push(candidate(4, 10.0, 1.0));

        let mut saw_fresh = false;
        for _ in 0..200 {
            if pick_site_adaptive(&candidates, now) == Some(3) {
                saw_fresh = true;
                break;
            }
        }
        assert!(saw_fresh, "fresh candidate never drawn from adaptive pool");
    }

    #[test]
    fn test_site_adaptive_idle_tiebreak() {
        let now = Instant::now() + Duration::from_secs(600);

        // Same bucket; one idle well past the window, one just used.
        let mut idle = candidate(1, 10.0, 1.0);
        idle.runtime.use_count = 1;
        idle.runtime.last_used_at = Some(now - Duration::from_secs(60));

        let mut busy = candidate(2, 99.0, 1.0);
        busy.runtime.use_count = 1;
        busy.runtime.last_used_at = Some(now);

        assert_eq!(adaptive_cmp(&idle, &busy, now), Ordering::Less);
    }

    #[test]
    fn test_site_adaptive_score_tiebreak_within_window() {
        let now = Instant::now() + Duration::from_secs(600);

        // Same bucket, both used within the idle window: score decides
        let mut low = candidate(1, 20.0, 1.0);
        low.runtime.use_count = 1;
        low.runtime.last_used_at = Some(now - Duration::from_secs(1));

        let mut high = candidate(2, 80.0, 1.0);
        high.runtime.use_count = 1;
        high.runtime.last_used_at = Some(now - Duration::from_secs(2));

        assert_eq!(adaptive_cmp(&high, &low, now), Ordering::Less);
    }

    #[test]
    fn test_site_adaptive_draws_from_top_three() {
        let now = Instant::now();

        let candidates: Vec<Candidate> = (1..=6)
            .map(|id| {
                let mut c = candidate(id, 50.0, 1.0);
                // Strictly increasing buckets: 0, 3, 6, ... so ranking is fixed
                c.runtime.use_count = (id - 1) * 3;
                c.runtime.last_used_at = Some(now);
                c
            })
            .collect();

        for _ in 0..200 {
            let picked = pick_site_adaptive(&candidates, now).unwrap();
            assert!(picked < 3, "picked index {picked} outside the top 3");
        }
    }
}
