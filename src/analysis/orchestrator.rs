//! The analysis orchestrator.
//!
//! Drives raster aggregation and proximity analysis across a boundary's
//! polygons under an option mask. Units of work (polygon, layer slot,
//! direction) are isolated: a failure attaches to its slot and never
//! aborts siblings, and the store brackets every unit in its own
//! transaction. Polygons run sequentially in submission order; layers in
//! the fixed mask order; directions N, E, S, W.

use std::collections::BTreeMap;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::analysis::layers::{LayerCatalogue, LayerKind, LayerSpec};
use crate::analysis::proximity::{ProximitySummary, DIRECTION_ORDER, FEATURE_CLASS_ORDER};
use crate::analysis::raster::{
    summarize_categorical, summarize_continuous, summarize_soil, BandStats, ClassCount,
};
use crate::db::store::SpatialStore;
use crate::error::{EngineError, ErrorKind};
use crate::models::boundary::{AnalysisOptions, Block, Boundary, CalculationStatus};

/// Error or note attached to one slot of a result document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotError {
    /// e.g. `"slope"`, `"proximity:east"`, `"area"`
    pub slot: String,
    pub kind: ErrorKind,
    pub message: String,
}

/// Result document for one polygon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolygonDocument {
    pub block_name: Option<String>,
    pub area_ha: f64,
    /// layer name → summary fragment, insertion keyed by layer name
    pub layers: BTreeMap<String, serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proximity: Option<ProximitySummary>,
    pub errors: Vec<SlotError>,
    /// Informational notes (e.g. a layer with no overlap).
    pub notes: Vec<SlotError>,
    pub timed_out: bool,
}

impl PolygonDocument {
    fn empty(block_name: Option<String>) -> Self {
        Self {
            block_name,
            area_ha: 0.0,
            layers: BTreeMap::new(),
            proximity: None,
            errors: Vec::new(),
            notes: Vec::new(),
            timed_out: false,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Area-weighted aggregate over all polygons.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundaryDocument {
    pub polygon_count: u32,
    pub succeeded_count: u32,
    pub total_area_ha: f64,
    pub layers: BTreeMap<String, serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proximity: Option<ProximitySummary>,
}

/// Everything one orchestrator run produces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisOutcome {
    pub status: CalculationStatus,
    pub timed_out: bool,
    /// Dense array: one document per polygon, failures included.
    pub polygons: Vec<PolygonDocument>,
    pub aggregate: BoundaryDocument,
    /// Downstream collaborators to trigger after core analysis.
    pub followups: Vec<String>,
}

// raw per-(polygon, layer) data retained for boundary aggregation
enum LayerRaw {
    Categorical(Vec<ClassCount>),
    Continuous(Option<BandStats>),
    Soil(Vec<(String, Option<BandStats>)>),
}

/// Drives C7 and C8 across a boundary.
pub struct Orchestrator<'a> {
    store: &'a dyn SpatialStore,
    catalogue: &'a LayerCatalogue,
    proximity_distance_m: f64,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        store: &'a dyn SpatialStore,
        catalogue: &'a LayerCatalogue,
        proximity_distance_m: f64,
    ) -> Self {
        Self {
            store,
            catalogue,
            proximity_distance_m,
        }
    }

    /// Run the selected analyses over every polygon.
    ///
    /// On deadline expiry the current unit is abandoned, the remaining
    /// polygons receive documents carrying a `TIMED_OUT` error entry (the
    /// per-polygon array stays dense), and already-produced documents are
    /// untouched.
    pub async fn run(
        &self,
        boundary: &Boundary,
        options: &AnalysisOptions,
        deadline: Option<Instant>,
    ) -> AnalysisOutcome {
        let layer_names = options.selected_layers();
        let mut polygons: Vec<PolygonDocument> = Vec::with_capacity(boundary.len());
        let mut raw: Vec<BTreeMap<String, LayerRaw>> = Vec::with_capacity(boundary.len());
        let mut timed_out = false;

        for (index, block) in boundary.blocks.iter().enumerate() {
            if timed_out || expired(deadline) {
                timed_out = true;
                let mut doc = PolygonDocument::empty(block.name.clone());
                doc.timed_out = true;
                doc.errors.push(SlotError {
                    slot: "polygon".into(),
                    kind: ErrorKind::TimedOut,
                    message: "deadline expired before this polygon was processed".into(),
                });
                polygons.push(doc);
                raw.push(BTreeMap::new());
                continue;
            }

            info!(polygon = index, layers = layer_names.len(), "analysing polygon");
            let (doc, polygon_raw, hit_deadline) = self
                .run_polygon(block, &layer_names, options, deadline)
                .await;
            timed_out |= hit_deadline;
            polygons.push(doc);
            raw.push(polygon_raw);
        }

        let succeeded_count = polygons.iter().filter(|d| d.succeeded()).count() as u32;
        let status = if timed_out {
            CalculationStatus::FailedPartial
        } else if succeeded_count == polygons.len() as u32 {
            CalculationStatus::Succeeded
        } else if succeeded_count > 0 {
            CalculationStatus::FailedPartial
        } else {
            CalculationStatus::Failed
        };

        let aggregate = self.aggregate(&polygons, &raw, &layer_names);

        let mut followups = Vec::new();
        if status != CalculationStatus::Failed {
            if options.auto_generate_fieldbook {
                followups.push("fieldbook".to_string());
            }
            if options.auto_generate_sampling {
                followups.push("sampling".to_string());
            }
        }

        AnalysisOutcome {
            status,
            timed_out,
            polygons,
            aggregate,
            followups,
        }
    }

    async fn run_polygon(
        &self,
        block: &Block,
        layer_names: &[&'static str],
        options: &AnalysisOptions,
        deadline: Option<Instant>,
    ) -> (PolygonDocument, BTreeMap<String, LayerRaw>, bool) {
        let mut doc = PolygonDocument::empty(block.name.clone());
        let mut raw: BTreeMap<String, LayerRaw> = BTreeMap::new();
        let wkt = block.to_wkt();

        match block.area_hectares() {
            Ok(area) => doc.area_ha = area,
            Err(e) => doc.errors.push(SlotError {
                slot: "area".into(),
                kind: e.kind(),
                message: e.to_string(),
            }),
        }

        // raster slots, in the fixed enumeration order of the option mask
        for name in layer_names {
            if expired(deadline) {
                doc.timed_out = true;
                doc.errors.push(SlotError {
                    slot: (*name).to_string(),
                    kind: ErrorKind::TimedOut,
                    message: "deadline expired during raster analysis".into(),
                });
                return (doc, raw, true);
            }
            let Some(spec) = self.catalogue.get(name) else {
                doc.errors.push(SlotError {
                    slot: (*name).to_string(),
                    kind: ErrorKind::Internal,
                    message: format!("layer '{name}' missing from catalogue"),
                });
                continue;
            };
            match self.run_layer(spec, &wkt).await {
                Ok((value, layer_raw, overlapped)) => {
                    if !overlapped {
                        doc.notes.push(SlotError {
                            slot: (*name).to_string(),
                            kind: ErrorKind::NoOverlap,
                            message: format!("polygon does not overlap layer '{name}'"),
                        });
                    }
                    doc.layers.insert((*name).to_string(), value);
                    raw.insert((*name).to_string(), layer_raw);
                }
                Err(e) => {
                    warn!(layer = %name, error = %e, "raster slot failed");
                    doc.errors.push(SlotError {
                        slot: (*name).to_string(),
                        kind: e.kind(),
                        message: e.to_string(),
                    });
                }
            }
        }

        // proximity: per-direction units, committed independently
        if options.run_proximity {
            let mut summary = ProximitySummary::new(self.proximity_distance_m);
            let centroid = block.centroid();
            let metric_epsg = block.metric_crs().epsg();
            for direction in DIRECTION_ORDER {
                if expired(deadline) {
                    doc.timed_out = true;
                    doc.errors.push(SlotError {
                        slot: format!("proximity:{direction}"),
                        kind: ErrorKind::TimedOut,
                        message: "deadline expired during proximity analysis".into(),
                    });
                    doc.proximity = Some(summary);
                    return (doc, raw, true);
                }
                match self
                    .store
                    .features_by_direction(
                        &wkt,
                        centroid,
                        metric_epsg,
                        direction,
                        self.proximity_distance_m,
                    )
                    .await
                {
                    Ok(by_class) => summary.record_direction(direction, by_class),
                    Err(e) => {
                        // slot stays null; subsequent directions continue
                        warn!(%direction, error = %e, "proximity direction failed");
                        doc.errors.push(SlotError {
                            slot: format!("proximity:{direction}"),
                            kind: e.kind(),
                            message: e.to_string(),
                        });
                    }
                }
            }
            doc.proximity = Some(summary);
        }

        (doc, raw, false)
    }

    async fn run_layer(
        &self,
        spec: &LayerSpec,
        wkt: &str,
    ) -> Result<(serde_json::Value, LayerRaw, bool), EngineError> {
        match spec.kind {
            LayerKind::Categorical => {
                let counts = self.store.categorical_counts(spec, wkt).await?;
                let overlapped = !counts.is_empty();
                let summary = summarize_categorical(spec, &counts);
                Ok((
                    serde_json::to_value(summary)?,
                    LayerRaw::Categorical(counts),
                    overlapped,
                ))
            }
            LayerKind::Continuous => {
                let stats = self.store.band_stats(spec, wkt, 1).await?;
                let overlapped = stats.map(|s| s.count > 0).unwrap_or(false);
                let summary = summarize_continuous(spec, stats);
                Ok((
                    serde_json::to_value(summary)?,
                    LayerRaw::Continuous(stats),
                    overlapped,
                ))
            }
            LayerKind::MultiBand => {
                let mut per_band = Vec::with_capacity(spec.bands.len());
                for (i, band_name) in spec.bands.iter().enumerate() {
                    let stats = self.store.band_stats(spec, wkt, i as u32 + 1).await?;
                    per_band.push((band_name.clone(), stats));
                }
                let overlapped = per_band
                    .iter()
                    .any(|(_, s)| s.map(|s| s.count > 0).unwrap_or(false));
                let summary = summarize_soil(spec, &per_band);
                Ok((
                    serde_json::to_value(summary)?,
                    LayerRaw::Soil(per_band),
                    overlapped,
                ))
            }
        }
    }

    // area-weighted combination of per-polygon raw values
    fn aggregate(
        &self,
        polygons: &[PolygonDocument],
        raw: &[BTreeMap<String, LayerRaw>],
        layer_names: &[&'static str],
    ) -> BoundaryDocument {
        let mut layers = BTreeMap::new();

        for name in layer_names {
            let Some(spec) = self.catalogue.get(name) else {
                continue;
            };
            let slots: Vec<&LayerRaw> = raw.iter().filter_map(|m| m.get(*name)).collect();
            if slots.is_empty() {
                continue;
            }
            let value = match spec.kind {
                LayerKind::Categorical => {
                    let mut merged: BTreeMap<i32, i64> = BTreeMap::new();
                    for slot in &slots {
                        if let LayerRaw::Categorical(counts) = slot {
                            for c in counts {
                                *merged.entry(c.class).or_insert(0) += c.cells;
                            }
                        }
                    }
                    let counts: Vec<ClassCount> = merged
                        .into_iter()
                        .map(|(class, cells)| ClassCount { class, cells })
                        .collect();
                    serde_json::to_value(summarize_categorical(spec, &counts))
                }
                LayerKind::Continuous => {
                    let stats: Vec<BandStats> = slots
                        .iter()
                        .filter_map(|slot| match slot {
                            LayerRaw::Continuous(s) => *s,
                            _ => None,
                        })
                        .collect();
                    serde_json::to_value(summarize_continuous(spec, merge_stats(&stats)))
                }
                LayerKind::MultiBand => {
                    let mut per_band: Vec<(String, Option<BandStats>)> = Vec::new();
                    for (i, band_name) in spec.bands.iter().enumerate() {
                        let stats: Vec<BandStats> = slots
                            .iter()
                            .filter_map(|slot| match slot {
                                LayerRaw::Soil(bands) => {
                                    bands.get(i).and_then(|(_, s)| *s)
                                }
                                _ => None,
                            })
                            .collect();
                        per_band.push((band_name.clone(), merge_stats(&stats)));
                    }
                    serde_json::to_value(summarize_soil(spec, &per_band))
                }
            };
            if let Ok(value) = value {
                layers.insert((*name).to_string(), value);
            }
        }

        // proximity aggregate: union of feature-name sets per direction
        let summaries: Vec<&ProximitySummary> =
            polygons.iter().filter_map(|d| d.proximity.as_ref()).collect();
        let proximity = if summaries.is_empty() {
            None
        } else {
            let mut merged = ProximitySummary::new(self.proximity_distance_m);
            for class in FEATURE_CLASS_ORDER {
                let class_name = class.to_string();
                for direction in DIRECTION_ORDER {
                    let mut union: Option<std::collections::BTreeSet<String>> = None;
                    for summary in &summaries {
                        if let Some(names) = summary
                            .classes
                            .get(&class_name)
                            .and_then(|c| c.slot(direction).as_ref())
                        {
                            union
                                .get_or_insert_with(Default::default)
                                .extend(names.iter().cloned());
                        }
                    }
                    if let Some(slot) = merged.classes.get_mut(&class_name) {
                        *slot.slot_mut(direction) =
                            union.map(|set| set.into_iter().collect());
                    }
                }
            }
            Some(merged)
        };

        BoundaryDocument {
            polygon_count: polygons.len() as u32,
            succeeded_count: polygons.iter().filter(|d| d.succeeded()).count() as u32,
            total_area_ha: polygons.iter().map(|d| d.area_ha).sum(),
            layers,
            proximity,
        }
    }
}

fn expired(deadline: Option<Instant>) -> bool {
    deadline.map(|d| Instant::now() >= d).unwrap_or(false)
}

/// Weighted merge of zonal statistics: total count, global min/max, and the
/// cell-count-weighted mean.
fn merge_stats(stats: &[BandStats]) -> Option<BandStats> {
    let valid: Vec<&BandStats> = stats.iter().filter(|s| s.count > 0).collect();
    if valid.is_empty() {
        return None;
    }
    let count: i64 = valid.iter().map(|s| s.count).sum();
    let mean =
        valid.iter().map(|s| s.mean * s.count as f64).sum::<f64>() / count as f64;
    let min = valid.iter().map(|s| s.min).fold(f64::INFINITY, f64::min);
    let max = valid.iter().map(|s| s.max).fold(f64::NEG_INFINITY, f64::max);
    Some(BandStats {
        count,
        min,
        max,
        mean,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_merge_stats_weighted_mean() {
        let merged = merge_stats(&[
            BandStats {
                count: 100,
                min: 10.0,
                max: 50.0,
                mean: 20.0,
            },
            BandStats {
                count: 300,
                min: 5.0,
                max: 40.0,
                mean: 40.0,
            },
        ])
        .unwrap();
        assert_eq!(merged.count, 400);
        assert_eq!(merged.min, 5.0);
        assert_eq!(merged.max, 50.0);
        assert_approx_eq!(merged.mean, 35.0, 1e-9);
    }

    #[test]
    fn test_merge_stats_skips_empty() {
        assert!(merge_stats(&[]).is_none());
        assert!(merge_stats(&[BandStats {
            count: 0,
            min: 0.0,
            max: 0.0,
            mean: 0.0
        }])
        .is_none());
    }
}
