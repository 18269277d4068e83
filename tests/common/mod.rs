//! Shared test fixtures: a scriptable in-memory spatial store.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use community_forest_analyzer::analysis::layers::LayerSpec;
use community_forest_analyzer::analysis::proximity::{Direction, FEATURE_CLASS_ORDER};
use community_forest_analyzer::analysis::raster::{BandStats, ClassCount};
use community_forest_analyzer::db::store::SpatialStore;
use community_forest_analyzer::error::EngineError;

type DirectionPredicate = Box<dyn Fn(&str, Direction) -> bool + Send + Sync>;

/// In-memory store with scriptable failure injection.
pub struct FakeStore {
    pub categorical: HashMap<String, Vec<ClassCount>>,
    pub continuous: HashMap<String, BandStats>,
    /// Layers whose fetch fails with a fatal database error.
    pub fail_layers: HashSet<String>,
    /// Directions (per polygon WKT) whose fetch fails.
    fail_direction: Option<DirectionPredicate>,
    /// Every (wkt, direction) proximity call, in order.
    pub direction_calls: Mutex<Vec<(String, Direction)>>,
}

impl Default for FakeStore {
    fn default() -> Self {
        Self {
            categorical: HashMap::new(),
            continuous: HashMap::new(),
            fail_layers: HashSet::new(),
            fail_direction: None,
            direction_calls: Mutex::new(Vec::new()),
        }
    }
}

impl FakeStore {
    pub fn with_categorical(mut self, layer: &str, counts: Vec<(i32, i64)>) -> Self {
        self.categorical.insert(
            layer.to_string(),
            counts
                .into_iter()
                .map(|(class, cells)| ClassCount { class, cells })
                .collect(),
        );
        self
    }

    pub fn with_continuous(mut self, layer: &str, stats: BandStats) -> Self {
        self.continuous.insert(layer.to_string(), stats);
        self
    }

    pub fn failing_layer(mut self, layer: &str) -> Self {
        self.fail_layers.insert(layer.to_string());
        self
    }

    pub fn failing_direction<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&str, Direction) -> bool + Send + Sync + 'static,
    {
        self.fail_direction = Some(Box::new(predicate));
        self
    }

    fn injected_error() -> EngineError {
        EngineError::DbFatal(sqlx::Error::PoolClosed)
    }
}

#[async_trait]
impl SpatialStore for FakeStore {
    async fn categorical_counts(
        &self,
        layer: &LayerSpec,
        _polygon_wkt: &str,
    ) -> Result<Vec<ClassCount>, EngineError> {
        if self.fail_layers.contains(&layer.name) {
            return Err(Self::injected_error());
        }
        Ok(self.categorical.get(&layer.name).cloned().unwrap_or_default())
    }

    async fn band_stats(
        &self,
        layer: &LayerSpec,
        _polygon_wkt: &str,
        _band: u32,
    ) -> Result<Option<BandStats>, EngineError> {
        if self.fail_layers.contains(&layer.name) {
            return Err(Self::injected_error());
        }
        Ok(self.continuous.get(&layer.name).copied())
    }

    async fn features_by_direction(
        &self,
        polygon_wkt: &str,
        _centroid: (f64, f64),
        _metric_epsg: u32,
        direction: Direction,
        _distance_m: f64,
    ) -> Result<BTreeMap<String, Vec<String>>, EngineError> {
        self.direction_calls
            .lock()
            .unwrap()
            .push((polygon_wkt.to_string(), direction));
        if let Some(predicate) = &self.fail_direction {
            if predicate(polygon_wkt, direction) {
                return Err(Self::injected_error());
            }
        }
        let mut by_class = BTreeMap::new();
        for class in FEATURE_CLASS_ORDER {
            by_class.insert(class.to_string(), vec![format!("{class} {direction}")]);
        }
        Ok(by_class)
    }
}
