use crate::error::Result;
use crate::models::{NewProxyUsage, ProxyUsage};
use sqlx::PgPool;
use tracing::info;

/// Repository for the append-only usage log
#[derive(Clone)]
pub struct UsageRepository {
    pool: PgPool,
}

impl UsageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Append a usage record
    pub async fn record(&self, usage: &NewProxyUsage) -> Result<()> {
        sqlx::query(
            "INSERT INTO proxy_usages (proxy_id, success, speed, error_msg, target_url)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(usage.proxy_id)
        .bind(usage.success)
        .bind(usage.speed)
        .bind(&usage.error_msg)
        .bind(&usage.target_url)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Recent records for one proxy, newest first
    pub async fn recent_for_proxy(&self, proxy_id: i64, limit: i64) -> Result<Vec<ProxyUsage>> {
        let records = sqlx::query_as::<_, ProxyUsage>(
            "SELECT id, proxy_id, success, speed, error_msg, target_url, created_at
             FROM proxy_usages
             WHERE proxy_id = $1
             ORDER BY created_at DESC
             LIMIT $2",
        )
        .bind(proxy_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// Drop records older than the retention window
    pub async fn prune_older_than_days(&self, days: i64) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM proxy_usages WHERE created_at < NOW() - ($1 * INTERVAL '1 day')",
        )
        .bind(days)
        .execute(&self.pool)
        .await?;

        let pruned = result.rows_affected();
        if pruned > 0 {
            info!(count = pruned, days = days, "Pruned old usage records");
        }

        Ok(pruned)
    }
}
