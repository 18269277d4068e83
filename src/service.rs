//! The engine's inbound request surface.
//!
//! Transport-free contract for the driver (typically an HTTP layer, out of
//! scope here): typed requests in, typed responses or [`EngineError`] out.
//! The driver is assumed to have authenticated the principal already.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::analysis::layers::LayerCatalogue;
use crate::analysis::orchestrator::Orchestrator;
use crate::config::EngineConfig;
use crate::crs::{detect_crs, Crs, CrsDetection};
use crate::db::calculations::{self, StoredCalculation};
use crate::db::inventories;
use crate::db::store::{PgSpatialStore, SpatialStore};
use crate::db::{self, HealthReport};
use crate::error::EngineError;
use crate::export::{export_csv, export_geojson, ExportFormat};
use crate::inventory;
use crate::inventory::validator::{validate_inventory, ValidatorOptions};
use crate::models::boundary::{
    AnalysisOptions, Boundary, Calculation, CalculationStatus, PolygonInput,
};
use crate::models::inventory::{Inventory, InventoryStatus, InventorySummary};
use crate::models::report::ValidationReport;
use crate::models::species::SpeciesTable;

/// Start a new analysis calculation over an uploaded boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartCalculationRequest {
    pub principal: String,
    pub forest_name: String,
    pub polygons: Vec<PolygonInput>,
    /// Declared CRS; detected from the vertices when absent.
    pub crs: Option<Crs>,
    #[serde(default)]
    pub options: AnalysisOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartCalculationResponse {
    pub calculation_id: Uuid,
    pub status: CalculationStatus,
    /// Downstream collaborators the driver should trigger.
    pub followups: Vec<String>,
}

/// Upload a tabular tree inventory for validation.
#[derive(Debug, Clone)]
pub struct UploadInventoryRequest {
    pub principal: String,
    pub tabular_bytes: Vec<u8>,
    pub user_crs: Option<Crs>,
    pub allow_auto_swap: bool,
    pub grid_spacing_m: Option<f64>,
    pub calculation_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadInventoryResponse {
    pub upload_id: Uuid,
    /// Present only when the upload passed validation.
    pub inventory_id: Option<Uuid>,
    pub report: ValidationReport,
    pub summary: Option<InventorySummary>,
}

/// Process a previously-validated inventory (same file bytes).
#[derive(Debug, Clone)]
pub struct ProcessInventoryRequest {
    pub inventory_id: Uuid,
    pub tabular_bytes: Vec<u8>,
    pub user_crs: Option<Crs>,
    pub allow_auto_swap: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessInventoryResponse {
    pub inventory_id: Uuid,
    pub status: InventoryStatus,
    pub summary: InventorySummary,
}

/// The assembled engine: pool, store seam, species table, catalogue.
pub struct Engine {
    pool: PgPool,
    store: Arc<dyn SpatialStore>,
    species: SpeciesTable,
    catalogue: LayerCatalogue,
    config: EngineConfig,
}

impl Engine {
    /// Connect to the spatial database and run the startup health check.
    pub async fn connect(config: EngineConfig) -> Result<Self, EngineError> {
        let catalogue = match &config.layer_catalogue_path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)?;
                LayerCatalogue::from_toml_str(&raw)?
            }
            None => LayerCatalogue::builtin(),
        };
        let pool = db::connect(&config.database).await?;
        let health = db::health_check(&pool, &catalogue).await?;
        info!(
            postgis = %health.postgis_version,
            missing_rasters = health.missing_raster_tables.len(),
            "engine ready"
        );
        let store: Arc<dyn SpatialStore> = Arc::new(PgSpatialStore::new(pool.clone()));
        Ok(Self {
            pool,
            store,
            species: SpeciesTable::builtin(),
            catalogue,
            config,
        })
    }

    /// Assemble an engine from parts (used by tests to inject a fake store).
    pub fn with_parts(
        pool: PgPool,
        store: Arc<dyn SpatialStore>,
        species: SpeciesTable,
        catalogue: LayerCatalogue,
        config: EngineConfig,
    ) -> Self {
        Self {
            pool,
            store,
            species,
            catalogue,
            config,
        }
    }

    pub fn species(&self) -> &SpeciesTable {
        &self.species
    }

    pub fn catalogue(&self) -> &LayerCatalogue {
        &self.catalogue
    }

    pub async fn health(&self) -> Result<HealthReport, EngineError> {
        db::health_check(&self.pool, &self.catalogue).await
    }

    /// Run a calculation end to end: validate the boundary, drive the
    /// orchestrator, persist documents, return the terminal status.
    pub async fn start_calculation(
        &self,
        request: StartCalculationRequest,
    ) -> Result<StartCalculationResponse, EngineError> {
        let crs = match request.crs {
            Some(crs) => crs,
            None => self.detect_boundary_crs(&request.polygons)?,
        };
        let boundary = Boundary::from_inputs(&request.polygons, crs)?;
        let mut calculation =
            Calculation::new(&request.principal, &request.forest_name, request.options)?;

        calculations::upsert_calculation(&self.pool, &calculation).await?;
        calculation.status = CalculationStatus::Running;
        calculations::upsert_calculation(&self.pool, &calculation).await?;
        info!(
            calculation = %calculation.id,
            polygons = boundary.len(),
            "calculation started"
        );

        let deadline = self
            .config
            .defaults
            .request_timeout_secs
            .map(|secs| Instant::now() + Duration::from_secs(secs));
        let orchestrator = Orchestrator::new(
            self.store.as_ref(),
            &self.catalogue,
            self.config.defaults.proximity_distance_m,
        );
        let outcome = orchestrator
            .run(&boundary, &calculation.options, deadline)
            .await;

        calculations::store_outcome(&self.pool, calculation.id, &outcome).await?;
        info!(
            calculation = %calculation.id,
            status = %outcome.status,
            "calculation finished"
        );

        Ok(StartCalculationResponse {
            calculation_id: calculation.id,
            status: outcome.status,
            followups: outcome.followups,
        })
    }

    fn detect_boundary_crs(&self, polygons: &[PolygonInput]) -> Result<Crs, EngineError> {
        let xs: Vec<f64> = polygons
            .iter()
            .flat_map(|p| p.exterior.iter().map(|&(x, _)| x))
            .collect();
        let ys: Vec<f64> = polygons
            .iter()
            .flat_map(|p| p.exterior.iter().map(|&(_, y)| y))
            .collect();
        match detect_crs(&xs, &ys) {
            CrsDetection::Known { crs, .. } => Ok(crs),
            CrsDetection::Swapped { .. } => Err(EngineError::CrsMismatch(
                "boundary vertex axes appear swapped; resubmit with lon/lat order".into(),
            )),
            CrsDetection::Unknown => Err(EngineError::CrsUndetectable(
                "boundary CRS not declared and not detectable from vertices".into(),
            )),
        }
    }

    /// Validate an inventory upload. A clean (or warning-only) upload also
    /// creates the inventory; fatal errors only produce the report.
    pub async fn upload_inventory(
        &self,
        request: UploadInventoryRequest,
    ) -> Result<UploadInventoryResponse, EngineError> {
        let validated = validate_inventory(
            &request.tabular_bytes,
            &self.species,
            &ValidatorOptions {
                user_crs: request.user_crs,
                allow_auto_swap: request.allow_auto_swap,
            },
        )?;

        let upload_id = Uuid::new_v4();
        inventories::store_validation_log(
            &self.pool,
            upload_id,
            &request.principal,
            &validated.report,
        )
        .await?;

        if !validated.report.ready_for_processing {
            return Ok(UploadInventoryResponse {
                upload_id,
                inventory_id: None,
                report: validated.report,
                summary: None,
            });
        }

        let target_crs = validated.metric_crs.unwrap_or(Crs::Utm45N);
        let spacing = request
            .grid_spacing_m
            .unwrap_or(self.config.defaults.grid_spacing_m);
        let mut inv = Inventory::new(&request.principal, target_crs, spacing);
        inv.calculation_id = request.calculation_id;
        inv.trees = validated.rows;
        let summary = InventorySummary::from_trees(&inv.trees);
        inv.summary = Some(summary.clone());
        inventories::insert_inventory(&self.pool, &inv).await?;
        info!(inventory = %inv.id, trees = inv.trees.len(), "inventory validated");

        Ok(UploadInventoryResponse {
            upload_id,
            inventory_id: Some(inv.id),
            report: validated.report,
            summary: Some(summary),
        })
    }

    /// Post-process a validated inventory: volumes, grid selection,
    /// persistence. All-or-nothing: a persistence failure leaves the
    /// inventory marked failed with no partial tree writes.
    pub async fn process_inventory(
        &self,
        request: ProcessInventoryRequest,
    ) -> Result<ProcessInventoryResponse, EngineError> {
        let stored = inventories::fetch_inventory(&self.pool, request.inventory_id)
            .await?
            .ok_or_else(|| {
                EngineError::NotFound(format!("inventory {}", request.inventory_id))
            })?;

        // re-validate the same bytes; validation is deterministic
        let validated = validate_inventory(
            &request.tabular_bytes,
            &self.species,
            &ValidatorOptions {
                user_crs: request.user_crs,
                allow_auto_swap: request.allow_auto_swap,
            },
        )?;
        if !validated.report.ready_for_processing {
            return Err(EngineError::InvalidInput(
                "inventory file no longer passes validation".into(),
            ));
        }

        inventories::update_inventory_status(
            &self.pool,
            stored.id,
            InventoryStatus::Processing,
            None,
        )
        .await?;

        let mut trees = validated.rows;
        let selection = inventory::process_trees(
            &mut trees,
            &self.species,
            stored.grid_spacing_m,
            stored.target_crs,
        )?;
        info!(
            inventory = %stored.id,
            mothers = selection.mother_count(),
            felling = selection.felling_count(),
            seedlings = selection.seedling_count(),
            "grid selection complete"
        );

        let mut inv = stored;
        inv.trees = trees;
        let summary = InventorySummary::from_trees(&inv.trees);
        inv.summary = Some(summary.clone());
        inv.status = InventoryStatus::Completed;

        if let Err(e) = inventories::insert_inventory(&self.pool, &inv).await {
            warn!(inventory = %inv.id, error = %e, "inventory persistence failed");
            inventories::update_inventory_status(
                &self.pool,
                inv.id,
                InventoryStatus::Failed,
                None,
            )
            .await?;
            return Err(e);
        }

        Ok(ProcessInventoryResponse {
            inventory_id: inv.id,
            status: InventoryStatus::Completed,
            summary,
        })
    }

    /// Re-run the retention grid over a completed inventory with a new
    /// spacing. Classifications are updated atomically and the summary is
    /// recomputed from the persisted rows.
    pub async fn regrid_inventory(
        &self,
        inventory_id: Uuid,
        spacing_m: f64,
    ) -> Result<ProcessInventoryResponse, EngineError> {
        let mut inv = inventories::fetch_inventory(&self.pool, inventory_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("inventory {inventory_id}")))?;
        if inv.trees.is_empty() {
            return Err(EngineError::NoTrees(inventory_id));
        }

        let selection = inventory::select_retention(&inv.trees, spacing_m, inv.target_crs)?;
        inventories::update_classifications(&self.pool, inventory_id, &selection).await?;

        inventory::apply_selection(&mut inv.trees, &selection);
        let summary = InventorySummary::from_trees(&inv.trees);
        inv.grid_spacing_m = spacing_m;
        inventories::update_inventory_status(
            &self.pool,
            inventory_id,
            InventoryStatus::Completed,
            Some(&summary),
        )
        .await?;
        info!(
            inventory = %inventory_id,
            spacing_m,
            mothers = selection.mother_count(),
            "inventory re-gridded"
        );

        Ok(ProcessInventoryResponse {
            inventory_id,
            status: InventoryStatus::Completed,
            summary,
        })
    }

    pub async fn calculation_state(
        &self,
        id: Uuid,
    ) -> Result<Option<StoredCalculation>, EngineError> {
        calculations::fetch_calculation(&self.pool, id).await
    }

    pub async fn annotate_calculation(
        &self,
        id: Uuid,
        annotation: &str,
    ) -> Result<bool, EngineError> {
        calculations::annotate_calculation(&self.pool, id, annotation).await
    }

    pub async fn inventory_state(&self, id: Uuid) -> Result<Option<Inventory>, EngineError> {
        inventories::fetch_inventory(&self.pool, id).await
    }

    pub async fn delete_inventory(&self, id: Uuid) -> Result<bool, EngineError> {
        inventories::delete_inventory(&self.pool, id).await
    }

    pub async fn fetch_validation_log(
        &self,
        upload_id: Uuid,
    ) -> Result<Option<ValidationReport>, EngineError> {
        inventories::fetch_validation_log(&self.pool, upload_id).await
    }

    /// Export a completed inventory as a byte stream.
    pub async fn export_inventory(
        &self,
        id: Uuid,
        format: ExportFormat,
    ) -> Result<Vec<u8>, EngineError> {
        let inv = inventories::fetch_inventory(&self.pool, id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("inventory {id}")))?;
        match format {
            ExportFormat::Csv => export_csv(&inv),
            ExportFormat::GeoJson => export_geojson(&inv),
        }
    }
}
