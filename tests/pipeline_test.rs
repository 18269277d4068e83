//! Inventory post-processing: volumes, grid retention, summaries.

use community_forest_analyzer::crs::{transform_points, Crs};
use community_forest_analyzer::inventory::{process_trees, select_retention};
use community_forest_analyzer::models::inventory::InventorySummary;
use community_forest_analyzer::models::species::SpeciesTable;
use community_forest_analyzer::models::tree::{QualityClass, TreeClass, TreeRecord};

use proptest::prelude::*;

fn tree(row: u32, lon: f64, lat: f64, dbh: f64, height: Option<f64>) -> TreeRecord {
    TreeRecord {
        row_number: row,
        species_code: 1,
        species_name: "Shorea robusta".into(),
        dbh_cm: dbh,
        height_m: height,
        quality_class: QualityClass::B,
        longitude: lon,
        latitude: lat,
        volumes: None,
        classification: None,
        grid_cell_id: None,
        remark: None,
    }
}

/// Trees laid out at exact metre offsets inside UTM 45N, then unprojected.
fn plot_from_metres(offsets: &[(f64, f64)], dbh: impl Fn(usize) -> f64) -> Vec<TreeRecord> {
    let base = (330_000.0, 3_060_000.0);
    let utm: Vec<(f64, f64)> = offsets
        .iter()
        .map(|&(dx, dy)| (base.0 + dx, base.1 + dy))
        .collect();
    let lonlat = transform_points(Crs::Utm45N, Crs::Wgs84, &utm).unwrap();
    lonlat
        .iter()
        .enumerate()
        .map(|(i, &(lon, lat))| tree(i as u32 + 1, lon, lat, dbh(i), Some(16.0)))
        .collect()
}

#[test]
fn retention_on_quarter_hectare_plot() {
    // seed scenario: 99 trees on a 50 m × 50 m plot, g = 20 m
    let offsets: Vec<(f64, f64)> = (0..99)
        .map(|i| (((i * 7) % 50) as f64, ((i * 13) % 50) as f64))
        .collect();
    let mut trees = plot_from_metres(&offsets, |i| 15.0 + (i % 30) as f64);

    let selection = process_trees(
        &mut trees,
        &SpeciesTable::builtin(),
        20.0,
        Crs::Utm45N,
    )
    .unwrap();

    // 50 m span tiles into 3 × 3 cells, all occupied by this layout
    assert_eq!(selection.occupied_cells, 9);
    assert_eq!(selection.mother_count(), 9);
    assert_eq!(selection.felling_count(), 90);
    assert_eq!(selection.seedling_count(), 0);

    // classifications and cell ids written back onto the rows
    let mothers: Vec<&TreeRecord> = trees
        .iter()
        .filter(|t| t.classification == Some(TreeClass::MotherTree))
        .collect();
    assert_eq!(mothers.len(), 9);
    assert!(mothers.iter().all(|t| t.grid_cell_id.is_some()));
    let mut cell_ids: Vec<i64> = mothers.iter().filter_map(|t| t.grid_cell_id).collect();
    cell_ids.sort_unstable();
    cell_ids.dedup();
    assert_eq!(cell_ids.len(), 9, "one mother per occupied cell");
}

#[test]
fn processing_fills_volumes_for_every_tree() {
    let mut trees = plot_from_metres(&[(0.0, 0.0), (30.0, 0.0), (0.0, 30.0)], |_| 32.0);
    process_trees(&mut trees, &SpeciesTable::builtin(), 20.0, Crs::Utm45N).unwrap();
    for t in &trees {
        let v = t.volumes.as_ref().unwrap();
        assert!(v.stem > 0.0);
        assert!(v.net > 0.0);
        assert!((v.tree - (v.stem + v.branch)).abs() < 1e-12);
    }
}

#[test]
fn seedlings_survive_processing_as_seedlings() {
    let mut trees = plot_from_metres(&[(0.0, 0.0), (5.0, 5.0)], |i| {
        if i == 0 {
            6.0
        } else {
            30.0
        }
    });
    let selection =
        process_trees(&mut trees, &SpeciesTable::builtin(), 20.0, Crs::Utm45N).unwrap();
    assert_eq!(selection.seedling_count(), 1);
    assert_eq!(trees[0].classification, Some(TreeClass::Seedling));
    let v = trees[0].volumes.as_ref().unwrap();
    assert_eq!(v.net, 0.0);
    assert!(v.firewood_m3 > 0.0);
}

#[test]
fn dbh_exactly_ten_is_retention_eligible() {
    let mut trees = plot_from_metres(&[(0.0, 0.0)], |_| 10.0);
    let selection =
        process_trees(&mut trees, &SpeciesTable::builtin(), 20.0, Crs::Utm45N).unwrap();
    assert_eq!(selection.mother_count(), 1);
    assert_eq!(trees[0].classification, Some(TreeClass::MotherTree));
}

#[test]
fn summary_recomputation_matches() {
    let mut trees = plot_from_metres(
        &[(0.0, 0.0), (25.0, 0.0), (0.0, 25.0), (25.0, 25.0)],
        |i| 20.0 + i as f64 * 5.0,
    );
    process_trees(&mut trees, &SpeciesTable::builtin(), 20.0, Crs::Utm45N).unwrap();

    let first = InventorySummary::from_trees(&trees);
    let second = InventorySummary::from_trees(&trees);
    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );
    assert_eq!(
        first.mother_trees + first.felling_trees + first.seedlings,
        first.total_trees
    );
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// |Mother| + |Felling| + |Seedling| = |Trees| and |Mother| equals the
    /// occupied cell count, for arbitrary tree layouts.
    #[test]
    fn retention_conservation(
        points in prop::collection::vec((0.0f64..400.0, 0.0f64..400.0, 4.0f64..80.0), 1..60),
        spacing in prop::sample::select(vec![10.0f64, 20.0, 35.0]),
    ) {
        let offsets: Vec<(f64, f64)> = points.iter().map(|p| (p.0, p.1)).collect();
        let dbhs: Vec<f64> = points.iter().map(|p| p.2).collect();
        let trees = plot_from_metres(&offsets, |i| dbhs[i]);

        let selection = select_retention(&trees, spacing, Crs::Utm45N).unwrap();
        let total = selection.mother_count()
            + selection.felling_count()
            + selection.seedling_count();
        prop_assert_eq!(total, trees.len());
        prop_assert_eq!(selection.mother_count() as u32, selection.occupied_cells);
    }

    /// Volume outputs are bitwise identical across runs.
    #[test]
    fn volume_bitwise_determinism(dbh in 1.0f64..150.0, height in 1.3f64..45.0) {
        use community_forest_analyzer::inventory::compute_volumes;
        let table = SpeciesTable::builtin();
        let sp = table.by_code(1).unwrap();
        let a = compute_volumes(sp, dbh, Some(height), QualityClass::A);
        let b = compute_volumes(sp, dbh, Some(height), QualityClass::A);
        prop_assert_eq!(a.net_cft.to_bits(), b.net_cft.to_bits());
        prop_assert_eq!(a.firewood_chatta.to_bits(), b.firewood_chatta.to_bits());
    }
}
