//! The tree inventory core: validation, volumes, retention selection.

pub mod diameter;
pub mod grid;
pub mod species_match;
pub mod validator;
pub mod volume;

use std::collections::HashMap;

pub use diameter::{detect_diameter_type, DiameterDetection, DiameterType};
pub use grid::{select_retention, GridAssignment, GridSelection};
pub use species_match::{match_species, MatchOptions, MatchOutcome, MatchType, NearMatch};
pub use validator::{validate_inventory, ValidatedInventory, ValidatorOptions};
pub use volume::{compute_volumes, CHATTA_PER_M3, CUBIC_FEET_PER_M3, SEEDLING_DBH_CM};

use crate::crs::Crs;
use crate::error::EngineError;
use crate::models::species::SpeciesTable;
use crate::models::tree::TreeRecord;

/// Post-process validated rows in place: compute volumes, then run the grid
/// selection and apply the resulting classifications.
pub fn process_trees(
    trees: &mut [TreeRecord],
    species_table: &SpeciesTable,
    spacing_m: f64,
    target_crs: Crs,
) -> Result<GridSelection, EngineError> {
    for tree in trees.iter_mut() {
        let species = species_table.by_code(tree.species_code).ok_or_else(|| {
            EngineError::SpeciesUnknown(format!("species code {} not in table", tree.species_code))
        })?;
        tree.volumes = Some(compute_volumes(
            species,
            tree.dbh_cm,
            tree.height_m,
            tree.quality_class,
        ));
    }

    let selection = select_retention(trees, spacing_m, target_crs)?;
    apply_selection(trees, &selection);
    Ok(selection)
}

/// Write a grid selection's classifications back onto the rows.
pub fn apply_selection(trees: &mut [TreeRecord], selection: &GridSelection) {
    let by_row: HashMap<u32, &GridAssignment> = selection
        .assignments
        .iter()
        .map(|a| (a.row_number, a))
        .collect();
    for tree in trees.iter_mut() {
        if let Some(assignment) = by_row.get(&tree.row_number) {
            tree.classification = Some(assignment.classification);
            tree.grid_cell_id = assignment.grid_cell_id;
        }
    }
}
