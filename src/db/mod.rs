//! Spatial database boundary: pool construction, startup health check and
//! transient-error retry policy.

pub mod calculations;
pub mod inventories;
pub mod store;

use std::future::Future;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{debug, info, warn};

use crate::analysis::layers::LayerCatalogue;
use crate::analysis::proximity::FEATURE_CLASS_ORDER;
use crate::config::DatabaseConfig;
use crate::error::EngineError;

pub use store::{PgSpatialStore, SpatialStore};

/// Maximum retry attempts for a transient failure.
const MAX_RETRIES: u32 = 3;
const RETRY_BASE: Duration = Duration::from_millis(50);

/// Classify a driver error as retryable.
///
/// Connection-level IO errors, pool exhaustion and the SQLSTATE classes for
/// connection failures (08xxx) and serialization/deadlock aborts (40xxx)
/// are transient; everything else is surfaced as fatal.
pub fn is_transient(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut => true,
        sqlx::Error::Database(db) => db
            .code()
            .map(|c| c.starts_with("08") || c.starts_with("40") || c == "57P03")
            .unwrap_or(false),
        _ => false,
    }
}

/// Run an operation, retrying transient database failures with exponential
/// backoff (50 ms · 2ⁿ). Retries never cross a transaction boundary: the
/// closure owns its whole transaction.
pub async fn with_retry<T, F, Fut>(operation: &str, mut f: F) -> Result<T, EngineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, EngineError>>,
{
    let mut attempt = 0u32;
    loop {
        match f().await {
            Err(EngineError::DbTransient(e)) if attempt < MAX_RETRIES => {
                let backoff = RETRY_BASE * 2u32.pow(attempt);
                warn!(
                    operation,
                    attempt = attempt + 1,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "transient database error, retrying"
                );
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}

/// Build the connection pool and probe the PostGIS extension.
pub async fn connect(cfg: &DatabaseConfig) -> Result<PgPool, EngineError> {
    let pool = PgPoolOptions::new()
        .min_connections(cfg.min_connections)
        .max_connections(cfg.max_connections)
        .acquire_timeout(Duration::from_secs(cfg.acquire_timeout_secs))
        .connect(&cfg.url)
        .await?;

    let version: String = sqlx::query_scalar("SELECT PostGIS_Version()")
        .fetch_one(&pool)
        .await
        .map_err(|e| EngineError::Config(format!("PostGIS extension not available: {e}")))?;
    debug!(postgis = %version, "connected to spatial database");
    Ok(pool)
}

/// Startup health report.
#[derive(Debug, Clone)]
pub struct HealthReport {
    pub postgis_version: String,
    /// Raster tables in the catalogue missing from the database. Not an
    /// error: the aggregator yields `total_cells = 0` for these layers.
    pub missing_raster_tables: Vec<String>,
}

/// Verify the schema the cores rely on.
///
/// A feature table without a spatial index is a configuration error, not a
/// runtime fallback, and fails the check.
pub async fn health_check(
    pool: &PgPool,
    catalogue: &LayerCatalogue,
) -> Result<HealthReport, EngineError> {
    let postgis_version: String = sqlx::query_scalar("SELECT PostGIS_Version()")
        .fetch_one(pool)
        .await
        .map_err(|e| EngineError::Config(format!("PostGIS extension not available: {e}")))?;

    for class in FEATURE_CLASS_ORDER {
        let table = class.table();
        let exists: Option<String> =
            sqlx::query_scalar("SELECT to_regclass($1)::TEXT")
                .bind(table)
                .fetch_one(pool)
                .await?;
        if exists.is_none() {
            return Err(EngineError::Config(format!(
                "feature table '{table}' does not exist"
            )));
        }
        let has_index: bool = sqlx::query_scalar(
            "SELECT EXISTS (
               SELECT 1 FROM pg_indexes
               WHERE tablename = $1 AND indexdef ILIKE '%USING gist%'
             )",
        )
        .bind(table)
        .fetch_one(pool)
        .await?;
        if !has_index {
            return Err(EngineError::Config(format!(
                "feature table '{table}' has no spatial index"
            )));
        }
    }

    let mut missing_raster_tables = Vec::new();
    for layer in catalogue.iter() {
        let exists: Option<String> =
            sqlx::query_scalar("SELECT to_regclass($1)::TEXT")
                .bind(&layer.table)
                .fetch_one(pool)
                .await?;
        if exists.is_none() {
            info!(layer = %layer.name, table = %layer.table, "raster table absent");
            missing_raster_tables.push(layer.table.clone());
        }
    }

    Ok(HealthReport {
        postgis_version,
        missing_raster_tables,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_with_retry_passes_through_success() {
        let result: Result<i32, EngineError> = with_retry("op", || async { Ok(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_with_retry_gives_up_after_three() {
        let mut calls = 0u32;
        let result: Result<(), EngineError> = with_retry("op", || {
            calls += 1;
            async { Err(EngineError::DbTransient(sqlx::Error::PoolTimedOut)) }
        })
        .await;
        assert!(matches!(result, Err(EngineError::DbTransient(_))));
        assert_eq!(calls, 4); // initial try + 3 retries
    }

    #[tokio::test]
    async fn test_with_retry_does_not_retry_fatal() {
        let mut calls = 0u32;
        let result: Result<(), EngineError> = with_retry("op", || {
            calls += 1;
            async { Err(EngineError::DbFatal(sqlx::Error::RowNotFound)) }
        })
        .await;
        assert!(matches!(result, Err(EngineError::DbFatal(_))));
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_transient_classification() {
        assert!(is_transient(&sqlx::Error::PoolTimedOut));
        assert!(!is_transient(&sqlx::Error::RowNotFound));
    }
}
