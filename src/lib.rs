//! Geospatial analysis and tree inventory engine for Nepal community
//! forest management.
//!
//! Two coupled cores: the **analysis core** aggregates ~16 raster layers
//! and four vector feature classes per boundary polygon through a PostGIS
//! store, and the **inventory core** validates tabular tree records,
//! derives per-tree volumes and selects grid retention trees. Both share
//! CRS auto-detection, per-unit transaction isolation and deterministic
//! reporting.

pub mod analysis;
pub mod config;
pub mod crs;
pub mod db;
pub mod error;
pub mod export;
pub mod inventory;
pub mod models;
pub mod service;

pub use analysis::{AnalysisOutcome, LayerCatalogue, Orchestrator};
pub use config::EngineConfig;
pub use crs::{detect_crs, Crs, CrsDetection};
pub use error::{EngineError, ErrorKind};
pub use export::ExportFormat;
pub use models::{
    AnalysisOptions, Boundary, Calculation, CalculationStatus, Inventory, InventorySummary,
    Species, SpeciesTable, TreeClass, TreeRecord, ValidationReport,
};
pub use service::Engine;
