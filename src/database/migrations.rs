use crate::error::{CorralError, Result};
use sqlx::PgPool;
use tracing::info;

/// Run all database migrations
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    // Create migrations table if not exists
    create_migrations_table(pool).await?;

    // Run each migration in order
    let migrations = get_migrations();

    for (version, name, sql) in migrations {
        if !is_migration_applied(pool, version).await? {
            info!(version = version, name = name, "Applying migration");

            sqlx::query(sql)
                .execute(pool)
                .await
                .map_err(CorralError::Database)?;

            record_migration(pool, version, name).await?;

            info!(version = version, name = name, "Migration applied successfully");
        }
    }

    Ok(())
}

/// Create the migrations tracking table
async fn create_migrations_table(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            name VARCHAR(255) NOT NULL,
            applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(CorralError::Database)?;

    Ok(())
}

/// Check if a migration has been applied
async fn is_migration_applied(pool: &PgPool, version: i32) -> Result<bool> {
    let result = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM schema_migrations WHERE version = $1",
    )
    .bind(version)
    .fetch_one(pool)
    .await
    .map_err(CorralError::Database)?;

    Ok(result > 0)
}

/// Record a migration as applied
async fn record_migration(pool: &PgPool, version: i32, name: &str) -> Result<()> {
    sqlx::query("INSERT INTO schema_migrations (version, name) VALUES ($1, $2)")
        .bind(version)
        .bind(name)
        .execute(pool)
        .await
        .map_err(CorralError::Database)?;

    Ok(())
}

/// Get all migrations in order
fn get_migrations() -> Vec<(i32, &'static str, &'static str)> {
    vec![
        (1, "proxies_table", MIGRATION_001_PROXIES),
        (2, "proxy_usages_table", MIGRATION_002_PROXY_USAGES),
    ]
}

// Migration 1: proxies table.
// `last_check` carries millisecond precision; uniqueness of (ip, port) only
// applies to live rows so a soft-deleted endpoint can be re-ingested.
const MIGRATION_001_PROXIES: &str = r#"
CREATE TABLE IF NOT EXISTS proxies (
    id BIGSERIAL PRIMARY KEY,
    ip VARCHAR(64) NOT NULL,
    port INTEGER NOT NULL,
    protocol VARCHAR(20) NOT NULL DEFAULT 'http',
    type VARCHAR(20) NOT NULL DEFAULT 'temp',
    region VARCHAR(20) NOT NULL DEFAULT 'other',
    source VARCHAR(64) NOT NULL DEFAULT '',
    anonymous BOOLEAN NOT NULL DEFAULT FALSE,
    speed BIGINT NOT NULL DEFAULT 0,
    success BIGINT NOT NULL DEFAULT 0,
    failure BIGINT NOT NULL DEFAULT 0,
    fail_count INTEGER NOT NULL DEFAULT 0,
    use_count BIGINT NOT NULL DEFAULT 0,
    concurrent_use INTEGER NOT NULL DEFAULT 0,
    max_concurrent INTEGER NOT NULL DEFAULT 10,
    score DOUBLE PRECISION NOT NULL DEFAULT 0,
    success_rate DOUBLE PRECISION NOT NULL DEFAULT 0,
    available BOOLEAN NOT NULL DEFAULT FALSE,
    last_check TIMESTAMPTZ(3) NOT NULL DEFAULT NOW(),
    last_used_at TIMESTAMPTZ,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    deleted_at TIMESTAMPTZ,
    version INTEGER NOT NULL DEFAULT 0
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_proxies_endpoint
    ON proxies(ip, port) WHERE deleted_at IS NULL;
CREATE INDEX IF NOT EXISTS idx_proxies_type ON proxies(type);
CREATE INDEX IF NOT EXISTS idx_proxies_available ON proxies(available);
CREATE INDEX IF NOT EXISTS idx_proxies_score ON proxies(score);
"#;

// Migration 2: append-only usage records
const MIGRATION_002_PROXY_USAGES: &str = r#"
CREATE TABLE IF NOT EXISTS proxy_usages (
    id BIGSERIAL PRIMARY KEY,
    proxy_id BIGINT NOT NULL,
    success BOOLEAN NOT NULL DEFAULT FALSE,
    speed BIGINT NOT NULL DEFAULT 0,
    error_msg TEXT,
    target_url VARCHAR(1024),
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_proxy_usages_proxy_id ON proxy_usages(proxy_id);
CREATE INDEX IF NOT EXISTS idx_proxy_usages_created_at ON proxy_usages(created_at);
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_ordered_and_unique() {
        let migrations = get_migrations();
        assert!(!migrations.is_empty());

        let mut last = 0;
        for (version, name, sql) in &migrations {
            assert!(*version > last, "migration versions must be ascending");
            assert!(!name.is_empty());
            assert!(!sql.trim().is_empty());
            last = *version;
        }
    }

    #[test]
    fn test_proxies_migration_covers_entity_columns() {
        let sql = MIGRATION_001_PROXIES;
        for column in [
            "ip", "port", "protocol", "type", "region", "source", "anonymous", "speed",
            "success", "failure", "fail_count", "use_count", "concurrent_use",
            "max_concurrent", "score", "success_rate", "available", "last_check",
            "last_used_at", "created_at", "deleted_at", "version",
        ] {
            assert!(sql.contains(column), "missing column: {column}");
        }
        assert!(sql.contains("TIMESTAMPTZ(3)"));
        assert!(sql.contains("WHERE deleted_at IS NULL"));
    }
}
