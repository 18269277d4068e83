//! The analysis core: raster aggregation, vector proximity, orchestration.

pub mod layers;
pub mod orchestrator;
pub mod proximity;
pub mod raster;

pub use layers::{LayerCatalogue, LayerKind, LayerSpec};
pub use orchestrator::{
    AnalysisOutcome, BoundaryDocument, Orchestrator, PolygonDocument, SlotError,
};
pub use proximity::{
    ClassProximity, Direction, FeatureClass, ProximitySummary, DIRECTION_ORDER,
    FEATURE_CLASS_ORDER,
};
pub use raster::{
    summarize_categorical, summarize_continuous, summarize_soil, texture_class, BandStats,
    CategoricalSummary, ClassCount, ContinuousSummary, SoilSummary,
};
