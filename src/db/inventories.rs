//! Inventory, tree and validation-log persistence.
//!
//! Tree rows are bulk-inserted in batches of 1,000 inside a single
//! transaction: a failure in any batch rolls the whole inventory back.
//! Everything bound to the wire is a driver primitive.

use sqlx::types::Json;
use sqlx::{PgPool, QueryBuilder, Row};
use tracing::debug;
use uuid::Uuid;

use crate::crs::Crs;
use crate::error::EngineError;
use crate::inventory::grid::GridSelection;
use crate::models::inventory::{Inventory, InventoryStatus, InventorySummary};
use crate::models::report::ValidationReport;
use crate::models::tree::{QualityClass, TreeClass, TreeRecord, TreeVolumes};

/// Rows per bulk-insert statement.
const BATCH_SIZE: usize = 1_000;

/// Persist an inventory and all of its trees, all-or-nothing.
pub async fn insert_inventory(pool: &PgPool, inv: &Inventory) -> Result<(), EngineError> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        "INSERT INTO inventories
           (id, owner, calculation_id, grid_spacing_m, target_crs, status, created_at, summary)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
         ON CONFLICT (id) DO UPDATE
           SET status = EXCLUDED.status,
               summary = EXCLUDED.summary",
    )
    .bind(inv.id)
    .bind(&inv.owner)
    .bind(inv.calculation_id)
    .bind(inv.grid_spacing_m)
    .bind(inv.target_crs.to_string())
    .bind(inv.status.to_string())
    .bind(inv.created_at)
    .bind(inv.summary.as_ref().map(Json))
    .execute(&mut *tx)
    .await?;

    for (batch_index, chunk) in inv.trees.chunks(BATCH_SIZE).enumerate() {
        debug!(
            inventory = %inv.id,
            batch = batch_index,
            rows = chunk.len(),
            "bulk-inserting trees"
        );
        let mut qb: QueryBuilder<sqlx::Postgres> = QueryBuilder::new(
            "INSERT INTO inventory_trees
               (inventory_id, row_number, species_code, species_name, dbh_cm, height_m,
                quality_class, longitude, latitude, stem_volume, branch_volume, tree_volume,
                gross_volume, net_volume, net_volume_cft, firewood_m3, firewood_chatta,
                classification, grid_cell_id, remark) ",
        );
        qb.push_values(chunk, |mut b, t| {
            let v = t.volumes.as_ref();
            b.push_bind(inv.id)
                .push_bind(t.row_number as i32)
                .push_bind(t.species_code as i32)
                .push_bind(&t.species_name)
                .push_bind(t.dbh_cm)
                .push_bind(t.height_m)
                .push_bind(t.quality_class.to_string())
                .push_bind(t.longitude)
                .push_bind(t.latitude)
                .push_bind(v.map(|v| v.stem))
                .push_bind(v.map(|v| v.branch))
                .push_bind(v.map(|v| v.tree))
                .push_bind(v.map(|v| v.gross))
                .push_bind(v.map(|v| v.net))
                .push_bind(v.map(|v| v.net_cft))
                .push_bind(v.map(|v| v.firewood_m3))
                .push_bind(v.map(|v| v.firewood_chatta))
                .push_bind(t.classification.map(|c| c.to_string()))
                .push_bind(t.grid_cell_id)
                .push_bind(&t.remark);
        });
        qb.push(
            " ON CONFLICT (inventory_id, row_number) DO UPDATE
                SET classification = EXCLUDED.classification,
                    grid_cell_id = EXCLUDED.grid_cell_id,
                    stem_volume = EXCLUDED.stem_volume,
                    branch_volume = EXCLUDED.branch_volume,
                    tree_volume = EXCLUDED.tree_volume,
                    gross_volume = EXCLUDED.gross_volume,
                    net_volume = EXCLUDED.net_volume,
                    net_volume_cft = EXCLUDED.net_volume_cft,
                    firewood_m3 = EXCLUDED.firewood_m3,
                    firewood_chatta = EXCLUDED.firewood_chatta",
        );
        qb.build().execute(&mut *tx).await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Apply a grid selection's classifications in one transaction, recording
/// the spacing that produced them.
pub async fn update_classifications(
    pool: &PgPool,
    inventory_id: Uuid,
    selection: &GridSelection,
) -> Result<(), EngineError> {
    let mut tx = pool.begin().await?;
    sqlx::query("UPDATE inventories SET grid_spacing_m = $2 WHERE id = $1")
        .bind(inventory_id)
        .bind(selection.spacing_m)
        .execute(&mut *tx)
        .await?;
    for chunk in selection.assignments.chunks(BATCH_SIZE) {
        let mut qb: QueryBuilder<sqlx::Postgres> = QueryBuilder::new(
            "UPDATE inventory_trees AS t
             SET classification = v.classification,
                 grid_cell_id = v.grid_cell_id
             FROM (",
        );
        qb.push_values(chunk, |mut b, a| {
            // explicit casts: an all-NULL batch column would otherwise be
            // typed as text by the VALUES list
            b.push_bind(a.row_number as i32)
                .push_unseparated("::INT")
                .push_bind(a.classification.to_string())
                .push_unseparated("::TEXT")
                .push_bind(a.grid_cell_id)
                .push_unseparated("::BIGINT");
        });
        qb.push(
            ") AS v(row_number, classification, grid_cell_id)
             WHERE t.inventory_id = ",
        );
        qb.push_bind(inventory_id);
        qb.push(" AND t.row_number = v.row_number");
        qb.build().execute(&mut *tx).await?;
    }
    tx.commit().await?;
    Ok(())
}

/// Update an inventory's status and, optionally, its summary.
pub async fn update_inventory_status(
    pool: &PgPool,
    inventory_id: Uuid,
    status: InventoryStatus,
    summary: Option<&InventorySummary>,
) -> Result<(), EngineError> {
    sqlx::query(
        "UPDATE inventories
         SET status = $2, summary = COALESCE($3, summary)
         WHERE id = $1",
    )
    .bind(inventory_id)
    .bind(status.to_string())
    .bind(summary.map(Json))
    .execute(pool)
    .await?;
    Ok(())
}

/// Read an inventory and its trees back, trees in row order.
pub async fn fetch_inventory(pool: &PgPool, id: Uuid) -> Result<Option<Inventory>, EngineError> {
    let header = sqlx::query(
        "SELECT id, owner, calculation_id, grid_spacing_m, target_crs, status, created_at, summary
         FROM inventories WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    let Some(header) = header else {
        return Ok(None);
    };

    let tree_rows = sqlx::query(
        "SELECT row_number, species_code, species_name, dbh_cm, height_m, quality_class,
                longitude, latitude, stem_volume, branch_volume, tree_volume, gross_volume,
                net_volume, net_volume_cft, firewood_m3, firewood_chatta, classification,
                grid_cell_id, remark
         FROM inventory_trees WHERE inventory_id = $1
         ORDER BY row_number",
    )
    .bind(id)
    .fetch_all(pool)
    .await?;

    let mut trees = Vec::with_capacity(tree_rows.len());
    for row in &tree_rows {
        trees.push(tree_from_row(row)?);
    }

    let target_crs: String = header.get("target_crs");
    let status: String = header.get("status");
    let summary: Option<Json<InventorySummary>> = header.get("summary");

    Ok(Some(Inventory {
        id: header.get("id"),
        owner: header.get("owner"),
        calculation_id: header.get("calculation_id"),
        grid_spacing_m: header.get("grid_spacing_m"),
        target_crs: target_crs.parse::<Crs>()?,
        status: parse_inventory_status(&status)?,
        created_at: header.get("created_at"),
        trees,
        summary: summary.map(|j| j.0),
    }))
}

/// Delete an inventory; trees go with it (they cannot outlive it).
pub async fn delete_inventory(pool: &PgPool, id: Uuid) -> Result<bool, EngineError> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM inventory_trees WHERE inventory_id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    let result = sqlx::query("DELETE FROM inventories WHERE id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(result.rows_affected() > 0)
}

/// Persist a validation report: one parent row, one child row per issue.
pub async fn store_validation_log(
    pool: &PgPool,
    upload_id: Uuid,
    owner: &str,
    report: &ValidationReport,
) -> Result<(), EngineError> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        "INSERT INTO validation_logs (id, owner, created_at, ready_for_processing, report)
         VALUES ($1, $2, NOW(), $3, $4)
         ON CONFLICT (id) DO UPDATE
           SET ready_for_processing = EXCLUDED.ready_for_processing,
               report = EXCLUDED.report",
    )
    .bind(upload_id)
    .bind(owner)
    .bind(report.ready_for_processing)
    .bind(Json(report))
    .execute(&mut *tx)
    .await?;

    sqlx::query("DELETE FROM validation_log_issues WHERE log_id = $1")
        .bind(upload_id)
        .execute(&mut *tx)
        .await?;

    let issues: Vec<_> = report
        .errors
        .iter()
        .chain(report.warnings.iter())
        .chain(report.info.iter())
        .collect();
    for chunk in issues.chunks(BATCH_SIZE) {
        let mut qb: QueryBuilder<sqlx::Postgres> = QueryBuilder::new(
            "INSERT INTO validation_log_issues
               (log_id, row_number, column_name, original, corrected, severity, kind,
                message, confidence) ",
        );
        qb.push_values(chunk, |mut b, issue| {
            b.push_bind(upload_id)
                .push_bind(issue.row_number.map(|r| r as i32))
                .push_bind(&issue.column)
                .push_bind(&issue.original)
                .push_bind(&issue.corrected)
                .push_bind(format!("{:?}", issue.severity).to_lowercase())
                .push_bind(issue.kind.to_string())
                .push_bind(&issue.message)
                .push_bind(issue.confidence);
        });
        qb.build().execute(&mut *tx).await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Read back a stored validation report.
pub async fn fetch_validation_log(
    pool: &PgPool,
    upload_id: Uuid,
) -> Result<Option<ValidationReport>, EngineError> {
    let row = sqlx::query("SELECT report FROM validation_logs WHERE id = $1")
        .bind(upload_id)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|r| {
        let report: Json<ValidationReport> = r.get("report");
        report.0
    }))
}

fn parse_inventory_status(s: &str) -> Result<InventoryStatus, EngineError> {
    match s {
        "validated" => Ok(InventoryStatus::Validated),
        "processing" => Ok(InventoryStatus::Processing),
        "completed" => Ok(InventoryStatus::Completed),
        "failed" => Ok(InventoryStatus::Failed),
        other => Err(EngineError::Internal(format!(
            "unknown inventory status '{other}' in store"
        ))),
    }
}

fn tree_from_row(row: &sqlx::postgres::PgRow) -> Result<TreeRecord, EngineError> {
    let stem: Option<f64> = row.get("stem_volume");
    let volumes = match stem {
        Some(stem) => Some(TreeVolumes {
            stem,
            branch: row.get::<Option<f64>, _>("branch_volume").unwrap_or(0.0),
            tree: row.get::<Option<f64>, _>("tree_volume").unwrap_or(0.0),
            gross: row.get::<Option<f64>, _>("gross_volume").unwrap_or(0.0),
            net: row.get::<Option<f64>, _>("net_volume").unwrap_or(0.0),
            net_cft: row.get::<Option<f64>, _>("net_volume_cft").unwrap_or(0.0),
            firewood_m3: row.get::<Option<f64>, _>("firewood_m3").unwrap_or(0.0),
            firewood_chatta: row
                .get::<Option<f64>, _>("firewood_chatta")
                .unwrap_or(0.0),
        }),
        None => None,
    };

    let quality: String = row.get("quality_class");
    let classification: Option<String> = row.get("classification");
    let classification = classification
        .map(|c| c.parse::<TreeClass>())
        .transpose()?;

    Ok(TreeRecord {
        row_number: row.get::<i32, _>("row_number") as u32,
        species_code: row.get::<i32, _>("species_code") as u32,
        species_name: row.get("species_name"),
        dbh_cm: row.get("dbh_cm"),
        height_m: row.get("height_m"),
        quality_class: quality.parse::<QualityClass>()?,
        longitude: row.get("longitude"),
        latitude: row.get("latitude"),
        volumes,
        classification,
        grid_cell_id: row.get("grid_cell_id"),
        remark: row.get("remark"),
    })
}
