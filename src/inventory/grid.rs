//! Mother-tree selection on a square metric grid.
//!
//! The inventory extent is tiled into cells of side `g` metres in the
//! target UTM zone. For every occupied cell the tree closest to the cell
//! centroid is kept as a retention ("mother") tree; the rest become
//! felling trees. Seedlings never enter the selection.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::crs::{transform_points, Crs};
use crate::error::EngineError;
use crate::models::tree::{TreeClass, TreeRecord};

/// Outcome of a grid selection run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridSelection {
    pub spacing_m: f64,
    pub occupied_cells: u32,
    pub grid_columns: u32,
    pub grid_rows: u32,
    /// Per input row: new classification and, for mother trees, the cell id.
    pub assignments: Vec<GridAssignment>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridAssignment {
    pub row_number: u32,
    pub classification: TreeClass,
    pub grid_cell_id: Option<i64>,
}

impl GridSelection {
    pub fn mother_count(&self) -> usize {
        self.assignments
            .iter()
            .filter(|a| a.classification == TreeClass::MotherTree)
            .count()
    }

    pub fn felling_count(&self) -> usize {
        self.assignments
            .iter()
            .filter(|a| a.classification == TreeClass::FellingTree)
            .count()
    }

    pub fn seedling_count(&self) -> usize {
        self.assignments
            .iter()
            .filter(|a| a.classification == TreeClass::Seedling)
            .count()
    }
}

/// Select one mother tree per occupied grid cell.
///
/// Cells are numbered row-major from the bottom-left of the projected
/// bounding box. At equal centroid distance the smallest row number wins,
/// so selection is deterministic.
pub fn select_retention(
    trees: &[TreeRecord],
    spacing_m: f64,
    target_crs: Crs,
) -> Result<GridSelection, EngineError> {
    if spacing_m <= 0.0 {
        return Err(EngineError::InvalidInput(format!(
            "grid spacing must be positive, got {spacing_m}"
        )));
    }

    // candidates: non-seedlings, projected to metres
    let candidates: Vec<&TreeRecord> = trees.iter().filter(|t| t.retention_candidate()).collect();
    let lonlat: Vec<(f64, f64)> = candidates
        .iter()
        .map(|t| (t.longitude, t.latitude))
        .collect();
    let projected = transform_points(Crs::Wgs84, target_crs, &lonlat)?;

    let mut assignments: Vec<GridAssignment> = trees
        .iter()
        .map(|t| GridAssignment {
            row_number: t.row_number,
            classification: if t.is_seedling() {
                TreeClass::Seedling
            } else {
                TreeClass::FellingTree
            },
            grid_cell_id: None,
        })
        .collect();

    if projected.is_empty() {
        return Ok(GridSelection {
            spacing_m,
            occupied_cells: 0,
            grid_columns: 0,
            grid_rows: 0,
            assignments,
        });
    }

    let min_x = projected.iter().map(|p| p.0).fold(f64::INFINITY, f64::min);
    let max_x = projected
        .iter()
        .map(|p| p.0)
        .fold(f64::NEG_INFINITY, f64::max);
    let min_y = projected.iter().map(|p| p.1).fold(f64::INFINITY, f64::min);
    let max_y = projected
        .iter()
        .map(|p| p.1)
        .fold(f64::NEG_INFINITY, f64::max);

    let ncols = (((max_x - min_x) / spacing_m).ceil() as u32).max(1);
    let nrows = (((max_y - min_y) / spacing_m).ceil() as u32).max(1);

    // bucket candidate indices per cell; BTreeMap keeps cell order stable
    let mut cells: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
    for (i, &(x, y)) in projected.iter().enumerate() {
        let col = (((x - min_x) / spacing_m) as u32).min(ncols - 1);
        let row = (((y - min_y) / spacing_m) as u32).min(nrows - 1);
        let cell_id = row as i64 * ncols as i64 + col as i64;
        cells.entry(cell_id).or_default().push(i);
    }

    let occupied_cells = cells.len() as u32;
    for (cell_id, members) in &cells {
        let col = (cell_id % ncols as i64) as f64;
        let row = (cell_id / ncols as i64) as f64;
        let cx = min_x + (col + 0.5) * spacing_m;
        let cy = min_y + (row + 0.5) * spacing_m;

        let mut winner: Option<(usize, f64)> = None;
        for &i in members {
            let (x, y) = projected[i];
            let d2 = (x - cx).powi(2) + (y - cy).powi(2);
            let better = match winner {
                None => true,
                Some((w, wd2)) => {
                    d2 < wd2
                        || (d2 == wd2 && candidates[i].row_number < candidates[w].row_number)
                }
            };
            if better {
                winner = Some((i, d2));
            }
        }

        if let Some((w, _)) = winner {
            let row_number = candidates[w].row_number;
            if let Some(a) = assignments.iter_mut().find(|a| a.row_number == row_number) {
                a.classification = TreeClass::MotherTree;
                a.grid_cell_id = Some(*cell_id);
            }
        }
    }

    Ok(GridSelection {
        spacing_m,
        occupied_cells,
        grid_columns: ncols,
        grid_rows: nrows,
        assignments,
    })
}
