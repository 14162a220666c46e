use crate::error::Result;
use crate::models::{
    CreateProxyRequest, PoolStats, Proxy, ProxyCandidate, ProxyRegion, ProxyType, SourceStat,
    SpeedBuckets, TypeCounts, UpdateProxyRequest,
};
use chrono::Utc;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::info;

const PROXY_COLUMNS: &str = r#"
    id, ip, port, protocol, type, region, source, anonymous,
    speed, success, failure, fail_count, use_count,
    concurrent_use, max_concurrent, score, available,
    last_check, last_used_at, created_at, deleted_at, version
"#;

/// Outcome of a batched dedup-insert
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertSummary {
    pub inserted: usize,
    pub refreshed: usize,
}

/// Outcome of a pool optimisation pass
#[derive(Debug, Clone, Copy, Default)]
pub struct OptimizeSummary {
    pub removed: u64,
    pub rescored: u64,
    pub promoted: u64,
}

/// Repository for proxy database operations
#[derive(Clone)]
pub struct ProxyRepository {
    pool: PgPool,
}

impl ProxyRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a proxy by ID
    pub async fn get_by_id(&self, id: i64) -> Result<Option<Proxy>> {
        let proxy = sqlx::query_as::<_, Proxy>(&format!(
            "SELECT {PROXY_COLUMNS} FROM proxies WHERE id = $1 AND deleted_at IS NULL"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(proxy)
    }

    /// Get a proxy by its endpoint address
    pub async fn find_by_endpoint(&self, ip: &str, port: i32) -> Result<Option<Proxy>> {
        let proxy = sqlx::query_as::<_, Proxy>(&format!(
            "SELECT {PROXY_COLUMNS} FROM proxies
             WHERE ip = $1 AND port = $2 AND deleted_at IS NULL"
        ))
        .bind(ip)
        .bind(port)
        .fetch_optional(&self.pool)
        .await?;

        Ok(proxy)
    }

    /// Get every live proxy (bulk validation pathway)
    pub async fn get_all(&self) -> Result<Vec<Proxy>> {
        let proxies = sqlx::query_as::<_, Proxy>(&format!(
            "SELECT {PROXY_COLUMNS} FROM proxies WHERE deleted_at IS NULL ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(proxies)
    }

    /// List available proxies, best success rate first
    pub async fn list_available(&self, limit: i64) -> Result<Vec<Proxy>> {
        let proxies = sqlx::query_as::<_, Proxy>(&format!(
            "SELECT {PROXY_COLUMNS} FROM proxies
             WHERE available = TRUE AND deleted_at IS NULL
             ORDER BY success_rate DESC, speed ASC
             LIMIT $1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(proxies)
    }

    /// List available proxies of one type
    pub async fn list_by_type(&self, proxy_type: ProxyType, limit: i64) -> Result<Vec<Proxy>> {
        let proxies = sqlx::query_as::<_, Proxy>(&format!(
            "SELECT {PROXY_COLUMNS} FROM proxies
             WHERE type = $1 AND available = TRUE AND deleted_at IS NULL
             ORDER BY success_rate DESC, speed ASC
             LIMIT $2"
        ))
        .bind(proxy_type)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(proxies)
    }

    /// Scheduler candidate query: available proxies, optionally filtered by
    /// type, best success rate first
    pub async fn get_candidates(
        &self,
        proxy_type: Option<ProxyType>,
        limit: i64,
    ) -> Result<Vec<Proxy>> {
        match proxy_type {
            Some(t) => self.list_by_type(t, limit).await,
            None => self.list_available(limit).await,
        }
    }

    /// List available proxies with at least the given score, best first
    pub async fn list_by_min_score_desc(&self, min_score: f64) -> Result<Vec<Proxy>> {
        let proxies = sqlx::query_as::<_, Proxy>(&format!(
            "SELECT {PROXY_COLUMNS} FROM proxies
             WHERE score >= $1 AND available = TRUE AND deleted_at IS NULL
             ORDER BY score DESC"
        ))
        .bind(min_score)
        .fetch_all(&self.pool)
        .await?;

        Ok(proxies)
    }

    /// Find the best available proxy matching optional type/region filters
    pub async fn find_best(
        &self,
        proxy_type: Option<ProxyType>,
        region: Option<ProxyRegion>,
    ) -> Result<Option<Proxy>> {
        let mut query = QueryBuilder::<Postgres>::new(format!(
            "SELECT {PROXY_COLUMNS} FROM proxies
             WHERE available = TRUE AND deleted_at IS NULL"
        ));

        if let Some(t) = proxy_type {
            query.push(" AND type = ").push_bind(t);
        }
        if let Some(r) = region {
            query.push(" AND region = ").push_bind(r);
        }

        query.push(" ORDER BY score DESC LIMIT 1");

        let proxy = query.build_query_as().fetch_optional(&self.pool).await?;
        Ok(proxy)
    }

    /// Create a proxy from an API request
    pub async fn create(&self, req: &CreateProxyRequest) -> Result<Proxy> {
        let proxy = sqlx::query_as::<_, Proxy>(&format!(
            "INSERT INTO proxies (ip, port, protocol, type, region, source, anonymous, speed,
                                  available, last_check)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, TRUE, NOW())
             RETURNING {PROXY_COLUMNS}"
        ))
        .bind(&req.ip)
        .bind(req.port as i32)
        .bind(req.protocol)
        .bind(req.proxy_type)
        .bind(req.region)
        .bind(&req.source)
        .bind(req.anonymous)
        .bind(req.speed)
        .fetch_one(&self.pool)
        .await?;

        info!(id = proxy.id, endpoint = %proxy.url(), "Created proxy");
        Ok(proxy)
    }

    /// Update descriptive fields of an existing proxy
    pub async fn update(&self, id: i64, req: &UpdateProxyRequest) -> Result<Option<Proxy>> {
        let current = match self.get_by_id(id).await? {
            Some(p) => p,
            None => return Ok(None),
        };

        let protocol = req.protocol.unwrap_or(current.protocol);
        let proxy_type = req.proxy_type.unwrap_or(current.proxy_type);
        let region = req.region.unwrap_or(current.region);
        let available = req.available.unwrap_or(current.available);
        let speed = req.speed.unwrap_or(current.speed);

        let proxy = sqlx::query_as::<_, Proxy>(&format!(
            "UPDATE proxies
             SET protocol = $2, type = $3, region = $4, available = $5, speed = $6,
                 anonymous = $7, version = version + 1
             WHERE id = $1 AND deleted_at IS NULL
             RETURNING {PROXY_COLUMNS}"
        ))
        .bind(id)
        .bind(protocol)
        .bind(proxy_type)
        .bind(region)
        .bind(available)
        .bind(speed)
        .bind(proxy_type.is_anonymous())
        .fetch_optional(&self.pool)
        .await?;

        if let Some(ref p) = proxy {
            info!(id = p.id, endpoint = %p.url(), "Updated proxy");
        }

        Ok(proxy)
    }

    /// Soft-delete a proxy
    pub async fn delete(&self, id: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE proxies SET deleted_at = NOW() WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        let deleted = result.rows_affected() > 0;
        if deleted {
            info!(id = id, "Deleted proxy");
        }

        Ok(deleted)
    }

    /// Soft-delete a batch of proxies
    pub async fn bulk_delete(&self, ids: &[i64]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let result = sqlx::query(
            "UPDATE proxies SET deleted_at = NOW() WHERE id = ANY($1) AND deleted_at IS NULL",
        )
        .bind(ids)
        .execute(&self.pool)
        .await?;

        let deleted = result.rows_affected();
        info!(count = deleted, "Bulk deleted proxies");

        Ok(deleted)
    }

    /// Batch update availability
    pub async fn bulk_update_available(&self, ids: &[i64], available: bool) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let result = sqlx::query(
            "UPDATE proxies SET available = $2, version = version + 1
             WHERE id = ANY($1) AND deleted_at IS NULL",
        )
        .bind(ids)
        .bind(available)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Batched dedup-insert of validated candidates, as a single transaction.
    ///
    /// A new endpoint is created available with its observed speed. A known
    /// endpoint only has its descriptive fields refreshed; health counters
    /// are never reset by ingestion.
    pub async fn upsert_candidates(&self, candidates: &[ProxyCandidate]) -> Result<UpsertSummary> {
        let mut summary = UpsertSummary::default();
        if candidates.is_empty() {
            return Ok(summary);
        }

        let mut tx = self.pool.begin().await?;

        for candidate in candidates {
            let exists = sqlx::query_scalar::<_, i64>(
                "SELECT COUNT(*) FROM proxies
                 WHERE ip = $1 AND port = $2 AND deleted_at IS NULL",
            )
            .bind(&candidate.ip)
            .bind(candidate.port as i32)
            .fetch_one(&mut *tx)
            .await?;

            if exists > 0 {
                sqlx::query(
                    "UPDATE proxies
                     SET type = $3, protocol = $4, region = $5, source = $6, anonymous = $7,
                         version = version + 1
                     WHERE ip = $1 AND port = $2 AND deleted_at IS NULL",
                )
                .bind(&candidate.ip)
                .bind(candidate.port as i32)
                .bind(candidate.proxy_type)
                .bind(candidate.protocol)
                .bind(candidate.region)
                .bind(&candidate.source)
                .bind(candidate.anonymous)
                .execute(&mut *tx)
                .await?;

                summary.refreshed += 1;
            } else {
                sqlx::query(
                    "INSERT INTO proxies (ip, port, protocol, type, region, source, anonymous,
                                          speed, available, last_check)
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, TRUE, NOW())
                     ON CONFLICT (ip, port) WHERE deleted_at IS NULL DO NOTHING",
                )
                .bind(&candidate.ip)
                .bind(candidate.port as i32)
                .bind(candidate.protocol)
                .bind(candidate.proxy_type)
                .bind(candidate.region)
                .bind(&candidate.source)
                .bind(candidate.anonymous)
                .bind(candidate.speed.unwrap_or(0))
                .execute(&mut *tx)
                .await?;

                summary.inserted += 1;
            }
        }

        tx.commit().await?;

        info!(
            inserted = summary.inserted,
            refreshed = summary.refreshed,
            "Ingested proxy candidates"
        );

        Ok(summary)
    }

    /// Persist a validation result using optimistic locking.
    /// Returns false when another writer got there first.
    pub async fn update_health(&self, proxy: &Proxy) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE proxies
             SET available = $2, speed = $3, fail_count = $4, last_check = $5,
                 version = version + 1
             WHERE id = $1 AND version = $6 AND deleted_at IS NULL",
        )
        .bind(proxy.id)
        .bind(proxy.available)
        .bind(proxy.speed)
        .bind(proxy.fail_count)
        .bind(proxy.last_check)
        .bind(proxy.version)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Record consumer feedback as one atomic update: monotone counters,
    /// speed blend, the success-rate blend (old*0.8 + success*20) and the
    /// score refresh all land together.
    pub async fn record_feedback(&self, id: i64, success: bool, speed: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE proxies
            SET
                success = success + CASE WHEN $2 THEN 1 ELSE 0 END,
                failure = failure + CASE WHEN $2 THEN 0 ELSE 1 END,
                use_count = use_count + 1,
                speed = CASE
                    WHEN NOT $2 THEN speed
                    WHEN speed = 0 THEN $3
                    ELSE CAST(speed * 0.7 + $3 * 0.3 AS BIGINT)
                END,
                success_rate = LEAST(100.0,
                    success_rate * 0.8 + CASE WHEN $2 THEN 20.0 ELSE 0.0 END),
                score = LEAST(100.0, GREATEST(0.0,
                    (success_rate * 0.8 + CASE WHEN $2 THEN 20.0 ELSE 0.0 END) * 0.7
                    + GREATEST(0.0, 100.0 - (CASE
                        WHEN NOT $2 THEN speed
                        WHEN speed = 0 THEN $3
                        ELSE speed * 0.7 + $3 * 0.3
                      END) / 10.0) * 0.3)),
                available = CASE WHEN $2 THEN TRUE ELSE available END,
                last_used_at = NOW(),
                version = version + 1
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(id)
        .bind(success)
        .bind(speed)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Take a lease on a proxy; fails when the concurrency cap is reached
    pub async fn lease(&self, id: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE proxies
             SET concurrent_use = concurrent_use + 1, use_count = use_count + 1,
                 last_used_at = NOW()
             WHERE id = $1 AND available = TRUE AND concurrent_use < max_concurrent
               AND deleted_at IS NULL",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Release a lease; never drives `concurrent_use` below zero
    pub async fn release(&self, id: i64) -> Result<()> {
        sqlx::query(
            "UPDATE proxies SET concurrent_use = concurrent_use - 1
             WHERE id = $1 AND concurrent_use > 0",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Soft-delete proxies whose last check is older than their type TTL
    pub async fn cleanup_expired(&self) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE proxies SET deleted_at = NOW()
            WHERE deleted_at IS NULL AND (
                (type = 'temp' AND last_check < NOW() - INTERVAL '30 minutes')
                OR (type = 'long' AND last_check < NOW() - INTERVAL '24 hours')
                OR (type IN ('anon', 'high_anon') AND last_check < NOW() - INTERVAL '1 hour')
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        let removed = result.rows_affected();
        if removed > 0 {
            info!(count = removed, "Cleaned up expired proxies");
        }

        Ok(removed)
    }

    /// Optimisation pass: drop poor performers, refresh every score (and the
    /// cached success-rate mirror with it), then raise the concurrency cap
    /// for top scorers.
    pub async fn optimize(&self) -> Result<OptimizeSummary> {
        let removed = sqlx::query(
            "UPDATE proxies SET deleted_at = NOW()
             WHERE deleted_at IS NULL AND (score < 30.0 OR success_rate < 20.0)",
        )
        .execute(&self.pool)
        .await?
        .rows_affected();

        let rescored = sqlx::query(
            r#"
            UPDATE proxies
            SET
                success_rate = CASE
                    WHEN success + failure = 0 THEN 0.0
                    ELSE success::DOUBLE PRECISION / (success + failure) * 100.0
                END,
                score = LEAST(100.0, GREATEST(0.0,
                    (CASE
                        WHEN success + failure = 0 THEN 0.0
                        ELSE success::DOUBLE PRECISION / (success + failure) * 100.0
                     END) * 0.7
                    + (CASE
                        WHEN speed > 0 THEN GREATEST(0.0, 100.0 - speed / 10.0)
                        ELSE 100.0
                       END) * 0.3)),
                version = version + 1
            WHERE deleted_at IS NULL
            "#,
        )
        .execute(&self.pool)
        .await?
        .rows_affected();

        let promoted = sqlx::query(
            "UPDATE proxies SET max_concurrent = 20
             WHERE score >= 80.0 AND deleted_at IS NULL",
        )
        .execute(&self.pool)
        .await?
        .rows_affected();

        info!(
            removed = removed,
            rescored = rescored,
            promoted = promoted,
            "Optimised proxy pool"
        );

        Ok(OptimizeSummary {
            removed,
            rescored,
            promoted,
        })
    }

    /// Get total live proxy count
    pub async fn count_total(&self) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM proxies WHERE deleted_at IS NULL",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    /// Get available proxy count
    pub async fn count_available(&self) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM proxies WHERE available = TRUE AND deleted_at IS NULL",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    /// Aggregated pool statistics rollup
    pub async fn stats(&self) -> Result<PoolStats> {
        let total_proxies = self.count_total().await?;
        let available_proxies = self.count_available().await?;

        let success_rate = sqlx::query_scalar::<_, Option<f64>>(
            "SELECT AVG(success_rate) FROM proxies
             WHERE available = TRUE AND deleted_at IS NULL",
        )
        .fetch_one(&self.pool)
        .await?
        .unwrap_or(0.0);

        let type_rows = sqlx::query_as::<_, (ProxyType, i64)>(
            "SELECT type, COUNT(*) FROM proxies WHERE deleted_at IS NULL GROUP BY type",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut proxy_types = TypeCounts::default();
        for (proxy_type, count) in type_rows {
            match proxy_type {
                ProxyType::Temp => proxy_types.temporary = count,
                ProxyType::Long => proxy_types.long_term = count,
                ProxyType::Anon => proxy_types.anonymous = count,
                ProxyType::HighAnon => proxy_types.high_anon = count,
            }
        }

        let source_stats = sqlx::query_as::<_, SourceStat>(
            "SELECT source, COUNT(*) AS count,
                    SUM(CASE WHEN available THEN 1 ELSE 0 END) AS available
             FROM proxies WHERE deleted_at IS NULL
             GROUP BY source ORDER BY count DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        let (fast, medium, slow) = sqlx::query_as::<_, (i64, i64, i64)>(
            "SELECT
                COUNT(*) FILTER (WHERE speed < 1000),
                COUNT(*) FILTER (WHERE speed >= 1000 AND speed < 3000),
                COUNT(*) FILTER (WHERE speed >= 3000)
             FROM proxies WHERE deleted_at IS NULL",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(PoolStats {
            total_proxies,
            available_proxies,
            success_rate,
            proxy_types,
            source_stats,
            speed_stats: SpeedBuckets { fast, medium, slow },
            update_time: Utc::now(),
        })
    }
}
