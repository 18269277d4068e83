pub mod boundary;
pub mod inventory;
pub mod report;
pub mod species;
pub mod tree;

pub use boundary::{
    AnalysisOptions, Block, Boundary, Calculation, CalculationStatus, PolygonInput,
};
pub use inventory::{Inventory, InventoryStatus, InventorySummary, DEFAULT_GRID_SPACING_M};
pub use report::{
    ColumnRoles, CrsSummary, DiameterSummary, IssueKind, RowIssue, Severity, ValidationReport,
};
pub use species::{AllometricCoefficients, Species, SpeciesTable};
pub use tree::{QualityClass, TreeClass, TreeRecord, TreeVolumes};
