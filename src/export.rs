//! Inventory export: CSV and GeoJSON byte streams.

use geojson::{Feature, FeatureCollection, GeoJson, Geometry, JsonObject, Value};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::models::inventory::Inventory;
use crate::models::tree::TreeRecord;

/// Supported export formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Csv,
    GeoJson,
}

impl std::str::FromStr for ExportFormat {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "geojson" => Ok(ExportFormat::GeoJson),
            _ => Err(EngineError::InvalidInput(format!(
                "unsupported export format '{s}'; use csv or geojson"
            ))),
        }
    }
}

/// Flat export row; field order is the CSV column order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportRow {
    pub species: String,
    pub dia_cm: f64,
    pub height_m: Option<f64>,
    pub tree_class: String,
    pub longitude: f64,
    pub latitude: f64,
    pub stem_volume: Option<f64>,
    pub branch_volume: Option<f64>,
    pub tree_volume: Option<f64>,
    pub gross_volume: Option<f64>,
    pub net_volume: Option<f64>,
    pub net_volume_cft: Option<f64>,
    pub firewood_m3: Option<f64>,
    pub firewood_chatta: Option<f64>,
    pub remark: Option<String>,
    pub grid_cell_id: Option<i64>,
}

impl ExportRow {
    pub fn from_tree(tree: &TreeRecord) -> Self {
        let v = tree.volumes.as_ref();
        Self {
            species: tree.species_name.clone(),
            dia_cm: tree.dbh_cm,
            height_m: tree.height_m,
            tree_class: tree
                .classification
                .map(|c| c.to_string())
                .unwrap_or_default(),
            longitude: tree.longitude,
            latitude: tree.latitude,
            stem_volume: v.map(|v| v.stem),
            branch_volume: v.map(|v| v.branch),
            tree_volume: v.map(|v| v.tree),
            gross_volume: v.map(|v| v.gross),
            net_volume: v.map(|v| v.net),
            net_volume_cft: v.map(|v| v.net_cft),
            firewood_m3: v.map(|v| v.firewood_m3),
            firewood_chatta: v.map(|v| v.firewood_chatta),
            remark: tree.remark.clone(),
            grid_cell_id: tree.grid_cell_id,
        }
    }
}

/// Serialize an inventory to CSV bytes. Fails with `NO_TREES` when empty.
pub fn export_csv(inventory: &Inventory) -> Result<Vec<u8>, EngineError> {
    if inventory.trees.is_empty() {
        return Err(EngineError::NoTrees(inventory.id));
    }
    let mut wtr = csv::Writer::from_writer(Vec::new());
    for tree in &inventory.trees {
        wtr.serialize(ExportRow::from_tree(tree))?;
    }
    wtr.into_inner()
        .map_err(|e| EngineError::Internal(format!("CSV writer: {e}")))
}

/// Re-parse exported CSV bytes; inverse of [`export_csv`] at the row level.
pub fn parse_export_csv(data: &[u8]) -> Result<Vec<ExportRow>, EngineError> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(data);
    let mut rows = Vec::new();
    for result in rdr.deserialize() {
        rows.push(result?);
    }
    Ok(rows)
}

/// Serialize exported rows back to CSV bytes (round-trip support).
pub fn write_export_rows(rows: &[ExportRow]) -> Result<Vec<u8>, EngineError> {
    let mut wtr = csv::Writer::from_writer(Vec::new());
    for row in rows {
        wtr.serialize(row)?;
    }
    wtr.into_inner()
        .map_err(|e| EngineError::Internal(format!("CSV writer: {e}")))
}

/// Serialize an inventory to a GeoJSON `FeatureCollection` of points.
/// Properties mirror the CSV columns minus the coordinates.
pub fn export_geojson(inventory: &Inventory) -> Result<Vec<u8>, EngineError> {
    if inventory.trees.is_empty() {
        return Err(EngineError::NoTrees(inventory.id));
    }

    let mut features = Vec::with_capacity(inventory.trees.len());
    for tree in &inventory.trees {
        let row = ExportRow::from_tree(tree);
        let geometry = Geometry::new(Value::Point(vec![row.longitude, row.latitude]));

        let mut props = JsonObject::new();
        let as_value = serde_json::to_value(&row)?;
        if let serde_json::Value::Object(map) = as_value {
            for (key, value) in map {
                if key == "longitude" || key == "latitude" {
                    continue;
                }
                props.insert(key, value);
            }
        }

        features.push(Feature {
            bbox: None,
            geometry: Some(geometry),
            id: None,
            properties: Some(props),
            foreign_members: None,
        });
    }

    let collection = FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    };
    Ok(GeoJson::from(collection).to_string().into_bytes())
}
