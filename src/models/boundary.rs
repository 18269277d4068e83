use chrono::{DateTime, Utc};
use geo::algorithm::line_intersection::{line_intersection, LineIntersection};
use geo::{Area, Centroid, LineString, Polygon};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::crs::{transform_points, Crs};
use crate::error::EngineError;

/// A polygon as received from the boundary ingestion collaborator:
/// raw rings in a declared CRS plus an optional block name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolygonInput {
    pub exterior: Vec<(f64, f64)>,
    #[serde(default)]
    pub holes: Vec<Vec<(f64, f64)>>,
    #[serde(default)]
    pub name: Option<String>,
}

/// One validated forest block: a simple polygon stored in WGS84.
#[derive(Debug, Clone)]
pub struct Block {
    pub name: Option<String>,
    pub polygon: Polygon<f64>,
}

impl Block {
    /// Centroid in WGS84 degrees.
    pub fn centroid(&self) -> (f64, f64) {
        // a valid polygon with positive area always has a centroid
        let c = self.polygon.centroid().unwrap_or(geo::Point::new(0.0, 0.0));
        (c.x(), c.y())
    }

    /// Metric CRS for this block, chosen from the centroid longitude.
    pub fn metric_crs(&self) -> Crs {
        Crs::metric_for_longitude(self.centroid().0)
    }

    /// Planar area in hectares, measured in the block's metric CRS.
    pub fn area_hectares(&self) -> Result<f64, EngineError> {
        let metric = self.metric_crs();
        let exterior: Vec<(f64, f64)> = self
            .polygon
            .exterior()
            .coords()
            .map(|c| (c.x, c.y))
            .collect();
        let projected = transform_points(Crs::Wgs84, metric, &exterior)?;
        let ring: LineString<f64> = projected.into_iter().collect();
        let mut area = Polygon::new(ring, vec![]).unsigned_area();
        for hole in self.polygon.interiors() {
            let pts: Vec<(f64, f64)> = hole.coords().map(|c| (c.x, c.y)).collect();
            let projected = transform_points(Crs::Wgs84, metric, &pts)?;
            let ring: LineString<f64> = projected.into_iter().collect();
            area -= Polygon::new(ring, vec![]).unsigned_area();
        }
        Ok(area / 10_000.0)
    }

    /// WKT rendering of the WGS84 polygon, as passed to the spatial store.
    pub fn to_wkt(&self) -> String {
        fn ring_wkt(ring: &LineString<f64>) -> String {
            let pts: Vec<String> = ring
                .coords()
                .map(|c| format!("{} {}", c.x, c.y))
                .collect();
            format!("({})", pts.join(", "))
        }
        let mut rings = vec![ring_wkt(self.polygon.exterior())];
        rings.extend(self.polygon.interiors().iter().map(ring_wkt));
        format!("POLYGON({})", rings.join(", "))
    }
}

/// An ordered set of validated blocks sharing one declared CRS,
/// normalised to WGS84 at rest.
#[derive(Debug, Clone)]
pub struct Boundary {
    pub blocks: Vec<Block>,
}

impl Boundary {
    /// Validate and normalise raw polygons.
    ///
    /// Each ring is closed if the input left it open; every polygon must be
    /// simple (no proper self-intersection) with positive area.
    pub fn from_inputs(inputs: &[PolygonInput], declared: Crs) -> Result<Self, EngineError> {
        if inputs.is_empty() {
            return Err(EngineError::InvalidInput(
                "boundary must contain at least one polygon".into(),
            ));
        }

        let mut blocks = Vec::with_capacity(inputs.len());
        for (i, input) in inputs.iter().enumerate() {
            let exterior = normalise_ring(&input.exterior, declared, i, "exterior")?;
            let mut holes = Vec::with_capacity(input.holes.len());
            for (h, hole) in input.holes.iter().enumerate() {
                holes.push(normalise_ring(hole, declared, i, &format!("hole {h}"))?);
            }
            let polygon = Polygon::new(exterior, holes);

            if polygon.unsigned_area() <= 0.0 {
                return Err(EngineError::InvalidInput(format!(
                    "polygon {i} has zero area"
                )));
            }
            if self_intersects(polygon.exterior()) {
                return Err(EngineError::InvalidInput(format!(
                    "polygon {i} exterior ring self-intersects"
                )));
            }

            blocks.push(Block {
                name: input.name.clone(),
                polygon,
            });
        }
        Ok(Self { blocks })
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

fn normalise_ring(
    raw: &[(f64, f64)],
    declared: Crs,
    polygon_index: usize,
    ring_name: &str,
) -> Result<LineString<f64>, EngineError> {
    if raw.len() < 3 {
        return Err(EngineError::InvalidInput(format!(
            "polygon {polygon_index} {ring_name} ring has fewer than 3 vertices"
        )));
    }
    let mut pts = transform_points(declared, Crs::Wgs84, raw)?;
    let first = pts[0];
    let last = *pts.last().unwrap_or(&first);
    if (first.0 - last.0).abs() > 1e-12 || (first.1 - last.1).abs() > 1e-12 {
        pts.push(first);
    }
    Ok(pts.into_iter().collect())
}

/// Proper self-intersection test over non-adjacent segment pairs.
///
/// O(n²) over ring segments; boundary rings are small enough that this
/// beats pulling in a full validity engine.
fn self_intersects(ring: &LineString<f64>) -> bool {
    let lines: Vec<geo::Line<f64>> = ring.lines().collect();
    let n = lines.len();
    for i in 0..n {
        for j in (i + 1)..n {
            // skip adjacent segments (and the closing wrap-around pair)
            if j == i + 1 || (i == 0 && j == n - 1) {
                continue;
            }
            match line_intersection(lines[i], lines[j]) {
                Some(LineIntersection::SinglePoint { is_proper, .. }) if is_proper => {
                    return true;
                }
                Some(LineIntersection::Collinear { .. }) => return true,
                _ => {}
            }
        }
    }
    false
}

/// Lifecycle of an analysis calculation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalculationStatus {
    Pending,
    Running,
    Succeeded,
    FailedPartial,
    Failed,
}

impl CalculationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CalculationStatus::Succeeded
                | CalculationStatus::FailedPartial
                | CalculationStatus::Failed
        )
    }
}

impl std::fmt::Display for CalculationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CalculationStatus::Pending => "pending",
            CalculationStatus::Running => "running",
            CalculationStatus::Succeeded => "succeeded",
            CalculationStatus::FailedPartial => "failed_partial",
            CalculationStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Option mask selecting which analyses a calculation runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisOptions {
    /// Master switch: when false, all raster flags are ignored.
    pub run_raster_analysis: bool,
    pub run_elevation: bool,
    pub run_slope: bool,
    pub run_aspect: bool,
    pub run_canopy: bool,
    pub run_biomass: bool,
    pub run_forest_health: bool,
    pub run_forest_type: bool,
    pub run_landcover: bool,
    pub run_forest_loss: bool,
    pub run_forest_gain: bool,
    pub run_fire_loss: bool,
    pub run_temperature: bool,
    pub run_precipitation: bool,
    pub run_soil: bool,
    pub run_proximity: bool,
    pub auto_generate_fieldbook: bool,
    pub auto_generate_sampling: bool,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            run_raster_analysis: true,
            run_elevation: true,
            run_slope: true,
            run_aspect: true,
            run_canopy: true,
            run_biomass: true,
            run_forest_health: true,
            run_forest_type: true,
            run_landcover: true,
            run_forest_loss: true,
            run_forest_gain: true,
            run_fire_loss: true,
            run_temperature: true,
            run_precipitation: true,
            run_soil: true,
            run_proximity: true,
            auto_generate_fieldbook: false,
            auto_generate_sampling: false,
        }
    }
}

impl AnalysisOptions {
    /// Raster layer names selected by this mask, in the fixed
    /// execution order. Both temperature layers ride one flag.
    pub fn selected_layers(&self) -> Vec<&'static str> {
        if !self.run_raster_analysis {
            return Vec::new();
        }
        let flags: [(bool, &[&'static str]); 14] = [
            (self.run_elevation, &["elevation"]),
            (self.run_slope, &["slope"]),
            (self.run_aspect, &["aspect"]),
            (self.run_canopy, &["canopy"]),
            (self.run_biomass, &["biomass"]),
            (self.run_forest_health, &["forest_health"]),
            (self.run_forest_type, &["forest_type"]),
            (self.run_landcover, &["landcover"]),
            (self.run_forest_loss, &["forest_loss"]),
            (self.run_forest_gain, &["forest_gain"]),
            (self.run_fire_loss, &["fire_loss"]),
            (self.run_temperature, &["temperature", "temperature_min"]),
            (self.run_precipitation, &["precipitation"]),
            (self.run_soil, &["soil"]),
        ];
        flags
            .iter()
            .filter(|(on, _)| *on)
            .flat_map(|(_, names)| names.iter().copied())
            .collect()
    }
}

/// Metadata for one orchestrator run over one boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Calculation {
    pub id: Uuid,
    pub owner: String,
    pub forest_name: String,
    pub created_at: DateTime<Utc>,
    pub options: AnalysisOptions,
    pub status: CalculationStatus,
    /// Free-text note; the only field mutable after a terminal status.
    pub annotation: Option<String>,
}

impl Calculation {
    pub fn new(
        owner: impl Into<String>,
        forest_name: impl Into<String>,
        options: AnalysisOptions,
    ) -> Result<Self, EngineError> {
        let forest_name = forest_name.into();
        if forest_name.trim().is_empty() {
            return Err(EngineError::InvalidInput(
                "forest_name must be non-empty".into(),
            ));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            owner: owner.into(),
            forest_name,
            created_at: Utc::now(),
            options,
            status: CalculationStatus::Pending,
            annotation: None,
        })
    }
}
