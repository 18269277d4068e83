use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::crs::Crs;
use crate::models::tree::{TreeClass, TreeRecord};

/// Lifecycle of an uploaded tree inventory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InventoryStatus {
    Validated,
    Processing,
    Completed,
    Failed,
}

impl std::fmt::Display for InventoryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InventoryStatus::Validated => write!(f, "validated"),
            InventoryStatus::Processing => write!(f, "processing"),
            InventoryStatus::Completed => write!(f, "completed"),
            InventoryStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Roll-up statistics over an inventory's trees.
///
/// A pure function of the tree rows: recomputing from persisted rows must
/// reproduce the stored summary exactly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventorySummary {
    pub total_trees: u32,
    pub mother_trees: u32,
    pub felling_trees: u32,
    pub seedlings: u32,
    pub stem_volume_m3: f64,
    pub tree_volume_m3: f64,
    pub net_volume_m3: f64,
    pub net_volume_cft: f64,
    pub firewood_m3: f64,
    pub firewood_chatta: f64,
    /// Tree count per scientific name, sorted by name.
    pub species_counts: BTreeMap<String, u32>,
}

impl InventorySummary {
    /// Compute the summary from tree rows, in row order.
    pub fn from_trees(trees: &[TreeRecord]) -> Self {
        let mut summary = InventorySummary {
            total_trees: trees.len() as u32,
            mother_trees: 0,
            felling_trees: 0,
            seedlings: 0,
            stem_volume_m3: 0.0,
            tree_volume_m3: 0.0,
            net_volume_m3: 0.0,
            net_volume_cft: 0.0,
            firewood_m3: 0.0,
            firewood_chatta: 0.0,
            species_counts: BTreeMap::new(),
        };
        for tree in trees {
            match tree.classification {
                Some(TreeClass::MotherTree) => summary.mother_trees += 1,
                Some(TreeClass::FellingTree) => summary.felling_trees += 1,
                Some(TreeClass::Seedling) => summary.seedlings += 1,
                None => {}
            }
            if let Some(v) = &tree.volumes {
                summary.stem_volume_m3 += v.stem;
                summary.tree_volume_m3 += v.tree;
                summary.net_volume_m3 += v.net;
                summary.net_volume_cft += v.net_cft;
                summary.firewood_m3 += v.firewood_m3;
                summary.firewood_chatta += v.firewood_chatta;
            }
            *summary
                .species_counts
                .entry(tree.species_name.clone())
                .or_insert(0) += 1;
        }
        summary
    }
}

/// An uploaded and validated tree inventory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Inventory {
    pub id: Uuid,
    pub owner: String,
    /// Link to a calculation over the same boundary, when provided.
    pub calculation_id: Option<Uuid>,
    pub grid_spacing_m: f64,
    /// Metric CRS used for the retention grid and distance work.
    pub target_crs: Crs,
    pub status: InventoryStatus,
    pub created_at: DateTime<Utc>,
    pub trees: Vec<TreeRecord>,
    pub summary: Option<InventorySummary>,
}

/// Default grid spacing in metres when the upload does not specify one.
pub const DEFAULT_GRID_SPACING_M: f64 = 20.0;

impl Inventory {
    pub fn new(owner: impl Into<String>, target_crs: Crs, grid_spacing_m: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner: owner.into(),
            calculation_id: None,
            grid_spacing_m,
            target_crs,
            status: InventoryStatus::Validated,
            created_at: Utc::now(),
            trees: Vec::new(),
            summary: None,
        }
    }

    pub fn tree_count(&self) -> usize {
        self.trees.len()
    }
}
