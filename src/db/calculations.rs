//! Calculation persistence.
//!
//! One row per calculation: typed columns for the frequently-queried
//! roll-ups plus the full result document as a jsonb blob. Upserts are
//! idempotent by id, so re-running a status transition is harmless.

use sqlx::types::Json;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::analysis::orchestrator::AnalysisOutcome;
use crate::error::EngineError;
use crate::models::boundary::{AnalysisOptions, Calculation, CalculationStatus};

/// Fraction of dry above-ground biomass counted as carbon.
const CARBON_FRACTION: f64 = 0.47;

/// Insert or refresh a calculation's metadata row.
pub async fn upsert_calculation(pool: &PgPool, calc: &Calculation) -> Result<(), EngineError> {
    sqlx::query(
        "INSERT INTO calculations
           (id, owner, forest_name, created_at, options, status, annotation)
         VALUES ($1, $2, $3, $4, $5, $6, $7)
         ON CONFLICT (id) DO UPDATE
           SET status = EXCLUDED.status,
               annotation = EXCLUDED.annotation",
    )
    .bind(calc.id)
    .bind(&calc.owner)
    .bind(&calc.forest_name)
    .bind(calc.created_at)
    .bind(Json(&calc.options))
    .bind(calc.status.to_string())
    .bind(&calc.annotation)
    .execute(pool)
    .await?;
    Ok(())
}

/// Persist a finished run: status, the result document, and the typed
/// roll-up columns derived from the boundary aggregate.
pub async fn store_outcome(
    pool: &PgPool,
    calculation_id: Uuid,
    outcome: &AnalysisOutcome,
) -> Result<(), EngineError> {
    let aggregate = &outcome.aggregate;
    let dominant_slope = dominant_class(aggregate, "slope");
    let dominant_aspect = dominant_class(aggregate, "aspect");
    let carbon_stock_t = aggregate
        .layers
        .get("biomass")
        .and_then(|v| v.get("mean"))
        .and_then(|v| v.as_f64())
        .map(|agb_t_per_ha| agb_t_per_ha * aggregate.total_area_ha * CARBON_FRACTION);

    sqlx::query(
        "UPDATE calculations
         SET status = $2,
             result = $3,
             total_area_ha = $4,
             dominant_slope_class = $5,
             dominant_aspect_class = $6,
             carbon_stock_t = $7
         WHERE id = $1",
    )
    .bind(calculation_id)
    .bind(outcome.status.to_string())
    .bind(Json(outcome))
    .bind(aggregate.total_area_ha)
    .bind(dominant_slope)
    .bind(dominant_aspect)
    .bind(carbon_stock_t)
    .execute(pool)
    .await?;
    Ok(())
}

fn dominant_class(
    aggregate: &crate::analysis::orchestrator::BoundaryDocument,
    layer: &str,
) -> Option<i32> {
    aggregate
        .layers
        .get(layer)
        .and_then(|v| v.get("dominant_class"))
        .and_then(|v| v.as_i64())
        .map(|v| v as i32)
}

/// A calculation as read back from the store.
#[derive(Debug, Clone)]
pub struct StoredCalculation {
    pub calculation: Calculation,
    pub outcome: Option<AnalysisOutcome>,
}

pub async fn fetch_calculation(
    pool: &PgPool,
    id: Uuid,
) -> Result<Option<StoredCalculation>, EngineError> {
    let row = sqlx::query(
        "SELECT id, owner, forest_name, created_at, options, status, annotation, result
         FROM calculations WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let options: Json<AnalysisOptions> = row.get("options");
    let status: String = row.get("status");
    let status = parse_status(&status)?;
    let outcome: Option<Json<AnalysisOutcome>> = row.get("result");

    Ok(Some(StoredCalculation {
        calculation: Calculation {
            id: row.get("id"),
            owner: row.get("owner"),
            forest_name: row.get("forest_name"),
            created_at: row.get("created_at"),
            options: options.0,
            status,
            annotation: row.get("annotation"),
        },
        outcome: outcome.map(|j| j.0),
    }))
}

/// Attach an annotation to a terminal calculation. Terminal states are
/// otherwise immutable; non-terminal rows are not touched.
pub async fn annotate_calculation(
    pool: &PgPool,
    id: Uuid,
    annotation: &str,
) -> Result<bool, EngineError> {
    let result = sqlx::query(
        "UPDATE calculations SET annotation = $2
         WHERE id = $1 AND status IN ('succeeded', 'failed_partial', 'failed')",
    )
    .bind(id)
    .bind(annotation)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

fn parse_status(s: &str) -> Result<CalculationStatus, EngineError> {
    match s {
        "pending" => Ok(CalculationStatus::Pending),
        "running" => Ok(CalculationStatus::Running),
        "succeeded" => Ok(CalculationStatus::Succeeded),
        "failed_partial" => Ok(CalculationStatus::FailedPartial),
        "failed" => Ok(CalculationStatus::Failed),
        other => Err(EngineError::Internal(format!(
            "unknown calculation status '{other}' in store"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_status_round_trip() {
        for status in [
            CalculationStatus::Pending,
            CalculationStatus::Running,
            CalculationStatus::Succeeded,
            CalculationStatus::FailedPartial,
            CalculationStatus::Failed,
        ] {
            assert_eq!(parse_status(&status.to_string()).unwrap(), status);
        }
        assert!(parse_status("bogus").is_err());
    }
}
