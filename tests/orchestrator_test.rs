//! Orchestrator behaviour against a scriptable spatial store: slot
//! isolation, ordering, deadlines, aggregation and terminal status.

mod common;

use std::time::Instant;

use common::FakeStore;
use community_forest_analyzer::analysis::layers::LayerCatalogue;
use community_forest_analyzer::analysis::orchestrator::Orchestrator;
use community_forest_analyzer::analysis::raster::BandStats;
use community_forest_analyzer::analysis::Direction;
use community_forest_analyzer::crs::Crs;
use community_forest_analyzer::error::ErrorKind;
use community_forest_analyzer::models::boundary::{
    AnalysisOptions, Boundary, CalculationStatus, PolygonInput,
};

fn rectangle(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> PolygonInput {
    PolygonInput {
        exterior: vec![
            (min_x, min_y),
            (max_x, min_y),
            (max_x, max_y),
            (min_x, max_y),
            (min_x, min_y),
        ],
        holes: Vec::new(),
        name: None,
    }
}

fn boundary_of(inputs: Vec<PolygonInput>) -> Boundary {
    Boundary::from_inputs(&inputs, Crs::Wgs84).unwrap()
}

fn two_block_boundary() -> Boundary {
    let mut a = rectangle(85.00, 27.50, 85.05, 27.55);
    a.name = Some("Block A".into());
    let mut b = rectangle(85.10, 27.50, 85.15, 27.55);
    b.name = Some("Block B".into());
    boundary_of(vec![a, b])
}

fn raster_only(layers: &[&str]) -> AnalysisOptions {
    AnalysisOptions {
        run_raster_analysis: true,
        run_elevation: layers.contains(&"elevation"),
        run_slope: layers.contains(&"slope"),
        run_aspect: layers.contains(&"aspect"),
        run_canopy: layers.contains(&"canopy"),
        run_biomass: layers.contains(&"biomass"),
        run_forest_health: layers.contains(&"forest_health"),
        run_forest_type: layers.contains(&"forest_type"),
        run_landcover: layers.contains(&"landcover"),
        run_forest_loss: layers.contains(&"forest_loss"),
        run_forest_gain: layers.contains(&"forest_gain"),
        run_fire_loss: layers.contains(&"fire_loss"),
        run_temperature: layers.contains(&"temperature"),
        run_precipitation: layers.contains(&"precipitation"),
        run_soil: layers.contains(&"soil"),
        run_proximity: false,
        auto_generate_fieldbook: false,
        auto_generate_sampling: false,
    }
}

fn proximity_only() -> AnalysisOptions {
    AnalysisOptions {
        run_raster_analysis: false,
        run_proximity: true,
        auto_generate_fieldbook: false,
        auto_generate_sampling: false,
        ..AnalysisOptions::default()
    }
}

#[tokio::test]
async fn slope_and_aspect_seed_scenarios_flow_through() {
    let store = FakeStore::default()
        .with_categorical("slope", vec![(1, 235), (2, 826), (3, 559), (4, 63)])
        .with_categorical(
            "aspect",
            vec![
                (0, 816),
                (1, 21),
                (2, 5),
                (3, 42),
                (4, 155),
                (5, 171),
                (6, 152),
                (7, 225),
                (8, 96),
            ],
        );
    let catalogue = LayerCatalogue::builtin();
    let orchestrator = Orchestrator::new(&store, &catalogue, 2000.0);
    let boundary = boundary_of(vec![rectangle(85.0, 27.5, 85.05, 27.55)]);

    let outcome = orchestrator
        .run(&boundary, &raster_only(&["slope", "aspect"]), None)
        .await;

    assert_eq!(outcome.status, CalculationStatus::Succeeded);
    let doc = &outcome.polygons[0];
    assert!(doc.succeeded());

    let slope = &doc.layers["slope"];
    assert_eq!(slope["total_cells"], 1683);
    assert_eq!(slope["dominant_class"], 2);
    assert!((slope["per_class_percent"]["2"].as_f64().unwrap() - 49.08).abs() <= 0.011);
    assert!((slope["per_class_percent"]["1"].as_f64().unwrap() - 13.97).abs() <= 0.011);

    let aspect = &doc.layers["aspect"];
    assert_eq!(aspect["dominant_class"], 7);
    assert_eq!(aspect["dominant_label"], "W");
    assert_eq!(aspect["per_class_percent"].as_object().unwrap().len(), 9);
}

#[tokio::test]
async fn failed_layer_slot_does_not_abort_siblings() {
    let store = FakeStore::default()
        .with_categorical("slope", vec![(1, 100), (2, 100)])
        .with_categorical("canopy", vec![(4, 300)])
        .failing_layer("aspect");
    let catalogue = LayerCatalogue::builtin();
    let orchestrator = Orchestrator::new(&store, &catalogue, 2000.0);
    let boundary = boundary_of(vec![rectangle(85.0, 27.5, 85.05, 27.55)]);

    let outcome = orchestrator
        .run(&boundary, &raster_only(&["slope", "aspect", "canopy"]), None)
        .await;

    let doc = &outcome.polygons[0];
    // the failed slot is recorded, the siblings are intact
    assert!(doc.layers.contains_key("slope"));
    assert!(doc.layers.contains_key("canopy"));
    assert!(!doc.layers.contains_key("aspect"));
    assert_eq!(doc.errors.len(), 1);
    assert_eq!(doc.errors[0].slot, "aspect");
    assert_eq!(doc.errors[0].kind, ErrorKind::DbFatal);
    assert_eq!(outcome.status, CalculationStatus::Failed);
}

#[tokio::test]
async fn failed_polygon_does_not_abort_other_polygons() {
    // the failing store hits every polygon's aspect slot; use a store that
    // fails only the east direction of the first polygon instead
    let boundary = two_block_boundary();
    let first_wkt = boundary.blocks[0].to_wkt();

    let store = FakeStore::default().failing_direction(move |wkt, direction| {
        wkt == first_wkt && direction == Direction::East
    });
    let catalogue = LayerCatalogue::builtin();
    let orchestrator = Orchestrator::new(&store, &catalogue, 2000.0);

    let outcome = orchestrator.run(&boundary, &proximity_only(), None).await;

    // polygon 1: east slot null, other directions populated
    let p1 = outcome.polygons[0].proximity.as_ref().unwrap();
    let settlements = &p1.classes["settlements"];
    assert!(settlements.features_north.is_some());
    assert!(settlements.features_east.is_none());
    assert!(settlements.features_south.is_some());
    assert!(settlements.features_west.is_some());
    assert_eq!(outcome.polygons[0].errors.len(), 1);
    assert_eq!(outcome.polygons[0].errors[0].slot, "proximity:east");

    // polygon 2: all four directions populated
    let p2 = outcome.polygons[1].proximity.as_ref().unwrap();
    for class in p2.classes.values() {
        assert!(class.features_north.is_some());
        assert!(class.features_east.is_some());
        assert!(class.features_south.is_some());
        assert!(class.features_west.is_some());
    }

    assert_eq!(outcome.status, CalculationStatus::FailedPartial);
}

#[tokio::test]
async fn directions_run_in_fixed_order_per_polygon() {
    let boundary = two_block_boundary();
    let store = FakeStore::default();
    let catalogue = LayerCatalogue::builtin();
    let orchestrator = Orchestrator::new(&store, &catalogue, 2000.0);

    orchestrator.run(&boundary, &proximity_only(), None).await;

    let calls = store.direction_calls.lock().unwrap();
    let dirs: Vec<Direction> = calls.iter().map(|(_, d)| *d).collect();
    assert_eq!(
        dirs,
        vec![
            Direction::North,
            Direction::East,
            Direction::South,
            Direction::West,
            Direction::North,
            Direction::East,
            Direction::South,
            Direction::West,
        ]
    );
    // polygons processed in submission order
    assert!(calls[0].0 != calls[4].0);
}

#[tokio::test]
async fn no_overlap_yields_zero_cells_not_an_error() {
    let store = FakeStore::default(); // knows no layers at all
    let catalogue = LayerCatalogue::builtin();
    let orchestrator = Orchestrator::new(&store, &catalogue, 2000.0);
    let boundary = boundary_of(vec![rectangle(85.0, 27.5, 85.05, 27.55)]);

    let outcome = orchestrator
        .run(&boundary, &raster_only(&["slope", "elevation"]), None)
        .await;

    let doc = &outcome.polygons[0];
    assert!(doc.succeeded());
    assert_eq!(doc.layers["slope"]["total_cells"], 0);
    assert!(doc.layers["slope"].get("dominant_class").is_none());
    assert_eq!(doc.layers["elevation"]["count"], 0);
    assert_eq!(doc.notes.len(), 2);
    assert!(doc.notes.iter().all(|n| n.kind == ErrorKind::NoOverlap));
    assert_eq!(outcome.status, CalculationStatus::Succeeded);
}

#[tokio::test]
async fn expired_deadline_marks_failed_partial_with_dense_documents() {
    let store = FakeStore::default().with_categorical("slope", vec![(1, 10)]);
    let catalogue = LayerCatalogue::builtin();
    let orchestrator = Orchestrator::new(&store, &catalogue, 2000.0);
    let boundary = two_block_boundary();

    let outcome = orchestrator
        .run(
            &boundary,
            &raster_only(&["slope"]),
            Some(Instant::now()), // already expired
        )
        .await;

    assert!(outcome.timed_out);
    assert_eq!(outcome.status, CalculationStatus::FailedPartial);
    // dense array: every polygon has a document carrying the marker
    assert_eq!(outcome.polygons.len(), 2);
    for doc in &outcome.polygons {
        assert!(doc.timed_out);
        assert!(doc.errors.iter().any(|e| e.kind == ErrorKind::TimedOut));
    }
}

#[tokio::test]
async fn aggregate_sums_counts_and_unions_names() {
    let store = FakeStore::default()
        .with_categorical("slope", vec![(1, 100), (2, 300)])
        .with_continuous(
            "elevation",
            BandStats {
                count: 500,
                min: 900.0,
                max: 2100.0,
                mean: 1500.0,
            },
        );
    let catalogue = LayerCatalogue::builtin();
    let orchestrator = Orchestrator::new(&store, &catalogue, 2000.0);
    let boundary = two_block_boundary();

    let mut options = raster_only(&["slope", "elevation"]);
    options.run_proximity = true;
    let outcome = orchestrator.run(&boundary, &options, None).await;

    assert_eq!(outcome.status, CalculationStatus::Succeeded);
    let aggregate = &outcome.aggregate;
    assert_eq!(aggregate.polygon_count, 2);
    assert_eq!(aggregate.succeeded_count, 2);
    assert!(aggregate.total_area_ha > 0.0);

    // class counts summed across polygons, percentages recomputed
    assert_eq!(aggregate.layers["slope"]["total_cells"], 800);
    assert_eq!(aggregate.layers["slope"]["per_class"]["2"], 600);
    assert!(
        (aggregate.layers["slope"]["per_class_percent"]["2"]
            .as_f64()
            .unwrap()
            - 75.0)
            .abs()
            < 0.011
    );
    assert_eq!(aggregate.layers["slope"]["dominant_class"], 2);

    // weighted mean over total valid cells
    assert_eq!(aggregate.layers["elevation"]["count"], 1000);
    assert!(
        (aggregate.layers["elevation"]["mean"].as_f64().unwrap() - 1500.0).abs() < 1e-9
    );

    // proximity union across polygons
    let proximity = aggregate.proximity.as_ref().unwrap();
    let north = proximity.classes["settlements"].features_north.as_ref().unwrap();
    assert_eq!(north, &vec!["settlements north".to_string()]);
}

#[tokio::test]
async fn aggregation_is_idempotent() {
    let store = FakeStore::default().with_categorical("slope", vec![(1, 40), (3, 60)]);
    let catalogue = LayerCatalogue::builtin();
    let orchestrator = Orchestrator::new(&store, &catalogue, 2000.0);
    let boundary = boundary_of(vec![rectangle(85.0, 27.5, 85.05, 27.55)]);

    let first = orchestrator
        .run(&boundary, &raster_only(&["slope"]), None)
        .await;
    let second = orchestrator
        .run(&boundary, &raster_only(&["slope"]), None)
        .await;
    assert_eq!(
        serde_json::to_string(&first.polygons[0].layers).unwrap(),
        serde_json::to_string(&second.polygons[0].layers).unwrap()
    );

    let pct = first.polygons[0].layers["slope"]["per_class_percent"]
        .as_object()
        .unwrap()
        .values()
        .map(|v| v.as_f64().unwrap())
        .sum::<f64>();
    assert!((pct - 100.0).abs() <= 0.01);
}

#[tokio::test]
async fn followups_requested_only_on_non_failed_outcomes() {
    let ok_store = FakeStore::default().with_categorical("slope", vec![(1, 10)]);
    let catalogue = LayerCatalogue::builtin();
    let boundary = boundary_of(vec![rectangle(85.0, 27.5, 85.05, 27.55)]);

    let mut options = raster_only(&["slope"]);
    options.auto_generate_fieldbook = true;
    options.auto_generate_sampling = true;

    let orchestrator = Orchestrator::new(&ok_store, &catalogue, 2000.0);
    let outcome = orchestrator.run(&boundary, &options, None).await;
    assert_eq!(outcome.followups, vec!["fieldbook", "sampling"]);

    let bad_store = FakeStore::default().failing_layer("slope");
    let orchestrator = Orchestrator::new(&bad_store, &catalogue, 2000.0);
    let outcome = orchestrator.run(&boundary, &options, None).await;
    assert_eq!(outcome.status, CalculationStatus::Failed);
    assert!(outcome.followups.is_empty());
}

#[tokio::test]
async fn master_switch_disables_all_raster_layers() {
    let store = FakeStore::default().with_categorical("slope", vec![(1, 10)]);
    let catalogue = LayerCatalogue::builtin();
    let orchestrator = Orchestrator::new(&store, &catalogue, 2000.0);
    let boundary = boundary_of(vec![rectangle(85.0, 27.5, 85.05, 27.55)]);

    let options = AnalysisOptions {
        run_raster_analysis: false,
        run_proximity: false,
        ..AnalysisOptions::default()
    };
    let outcome = orchestrator.run(&boundary, &options, None).await;
    assert!(outcome.polygons[0].layers.is_empty());
    assert!(outcome.polygons[0].proximity.is_none());
    assert_eq!(outcome.status, CalculationStatus::Succeeded);
}
