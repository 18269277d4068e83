//! Per-polygon raster summarisation.
//!
//! The spatial store fetches raw value counts and band statistics; this
//! module turns them into result-document fragments. Keeping the math free
//! of IO makes every rule here testable without a database.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::analysis::layers::LayerSpec;

/// One class's pixel count inside a polygon, as fetched from the store.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassCount {
    pub class: i32,
    pub cells: i64,
}

/// Raw zonal statistics for one band, as fetched from the store.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BandStats {
    pub count: i64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
}

/// Summary of a categorical layer over one polygon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoricalSummary {
    pub total_cells: i64,
    /// class code → cells, for every observed class
    pub per_class: BTreeMap<String, i64>,
    /// class code → percent of the included total, rounded to 2 dp and
    /// summing to 100 ± 0.01
    pub per_class_percent: BTreeMap<String, f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dominant_class: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dominant_label: Option<String>,
}

/// Summary of a continuous layer (or one band) over one polygon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContinuousSummary {
    pub count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mean: Option<f64>,
}

impl ContinuousSummary {
    pub fn empty() -> Self {
        Self {
            count: 0,
            min: None,
            max: None,
            mean: None,
        }
    }
}

/// Soil texture classes derived from the clay/sand/silt means.
pub const SOIL_TEXTURES: [&str; 4] = ["Clay", "Sand", "Silt", "Loam"];

/// Summary of the multi-band soil layer over one polygon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoilSummary {
    pub bands: BTreeMap<String, ContinuousSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub texture_class: Option<String>,
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Summarise a categorical layer.
///
/// Classes excluded from percentages are dropped from both the percentage
/// map and the total it divides by; dominance additionally skips its own
/// exclusion list. Ties resolve to the smallest class code.
pub fn summarize_categorical(spec: &LayerSpec, counts: &[ClassCount]) -> CategoricalSummary {
    let mut per_class: BTreeMap<String, i64> = BTreeMap::new();
    for c in counts {
        *per_class.entry(c.class.to_string()).or_insert(0) += c.cells;
    }
    let total_cells: i64 = per_class.values().sum();

    let included: Vec<(i32, i64)> = counts_merged(&per_class)
        .into_iter()
        .filter(|(class, _)| !spec.exclude_from_percent.contains(class))
        .collect();
    let included_total: i64 = included.iter().map(|(_, n)| *n).sum();

    let mut per_class_percent = BTreeMap::new();
    if included_total > 0 {
        for (class, cells) in &included {
            let pct = *cells as f64 / included_total as f64 * 100.0;
            per_class_percent.insert(class.to_string(), round2(pct));
        }
    }

    let dominant_class = included
        .iter()
        .filter(|(class, cells)| *cells > 0 && !spec.exclude_from_dominant.contains(class))
        .max_by_key(|(class, cells)| (*cells, std::cmp::Reverse(*class)))
        .map(|(class, _)| *class);
    let dominant_label = dominant_class
        .and_then(|c| spec.label_for(c))
        .map(str::to_string);

    CategoricalSummary {
        total_cells,
        per_class,
        per_class_percent,
        dominant_class,
        dominant_label,
    }
}

// merged map back to typed pairs, ascending by class code
fn counts_merged(per_class: &BTreeMap<String, i64>) -> Vec<(i32, i64)> {
    let mut out: Vec<(i32, i64)> = per_class
        .iter()
        .filter_map(|(k, v)| k.parse::<i32>().ok().map(|c| (c, *v)))
        .collect();
    out.sort_by_key(|(c, _)| *c);
    out
}

/// Summarise a continuous layer band, applying the layer scale factor and
/// dropping sentinel values.
pub fn summarize_continuous(spec: &LayerSpec, stats: Option<BandStats>) -> ContinuousSummary {
    let stats = match stats {
        Some(s) if s.count > 0 => s,
        _ => return ContinuousSummary::empty(),
    };
    if !stats.min.is_finite() || !stats.max.is_finite() || !stats.mean.is_finite() {
        return ContinuousSummary::empty();
    }
    if let Some(nodata) = spec.nodata {
        // a summary collapsed onto the sentinel means the store could not
        // mask it; treat as no data rather than report garbage
        if stats.min == nodata && stats.max == nodata {
            return ContinuousSummary::empty();
        }
    }
    ContinuousSummary {
        count: stats.count,
        min: Some(stats.min * spec.scale_factor),
        max: Some(stats.max * spec.scale_factor),
        mean: Some(stats.mean * spec.scale_factor),
    }
}

/// Fixed texture rule over the scaled clay/sand/silt band means (percent).
pub fn texture_class(clay: f64, sand: f64, silt: f64) -> &'static str {
    if clay >= 40.0 {
        "Clay"
    } else if sand >= 50.0 {
        "Sand"
    } else if silt >= 40.0 {
        "Silt"
    } else {
        "Loam"
    }
}

/// Summarise the multi-band soil layer.
pub fn summarize_soil(
    spec: &LayerSpec,
    per_band: &[(String, Option<BandStats>)],
) -> SoilSummary {
    let mut bands = BTreeMap::new();
    for (name, stats) in per_band {
        bands.insert(name.clone(), summarize_continuous(spec, *stats));
    }
    let mean_of = |band: &str| bands.get(band).and_then(|s| s.mean);
    let texture = match (mean_of("clay"), mean_of("sand"), mean_of("silt")) {
        (Some(clay), Some(sand), Some(silt)) => Some(texture_class(clay, sand, silt).to_string()),
        _ => None,
    };
    SoilSummary {
        bands,
        texture_class: texture,
    }
}
