//! Raster layer catalogue.
//!
//! The ~16 layers, their database tables, class codebooks and scale
//! factors are external contract, not code: the engine ships a builtin
//! catalogue and deployments may load their own TOML.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// How a layer's values are summarised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerKind {
    Categorical,
    Continuous,
    MultiBand,
}

fn default_scale() -> f64 {
    1.0
}

/// One raster layer's configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerSpec {
    pub name: String,
    pub table: String,
    pub kind: LayerKind,
    #[serde(default = "default_scale")]
    pub scale_factor: f64,
    #[serde(default)]
    pub nodata: Option<f64>,
    /// Band names for multi-band layers, in band order (band 1 first).
    #[serde(default)]
    pub bands: Vec<String>,
    /// Classes excluded from percentage computation (and its total).
    #[serde(default)]
    pub exclude_from_percent: Vec<i32>,
    /// Classes excluded from dominance only.
    #[serde(default)]
    pub exclude_from_dominant: Vec<i32>,
    /// Primary class-code → label binding.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Alternate presentation binding (e.g. slope 1 as "flat").
    #[serde(default)]
    pub display_labels: BTreeMap<String, String>,
}

impl LayerSpec {
    pub fn label_for(&self, class: i32) -> Option<&str> {
        self.labels.get(&class.to_string()).map(String::as_str)
    }
}

#[derive(Debug, Deserialize)]
struct CatalogueFile {
    #[serde(rename = "layer")]
    layers: Vec<LayerSpec>,
}

/// The full layer catalogue, in declaration order.
#[derive(Debug, Clone)]
pub struct LayerCatalogue {
    layers: Vec<LayerSpec>,
}

impl LayerCatalogue {
    /// The catalogue shipped with the engine.
    pub fn builtin() -> Self {
        Self::from_toml_str(include_str!("../../data/layers.toml"))
            .expect("embedded layer catalogue is well-formed")
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, EngineError> {
        let file: CatalogueFile = toml::from_str(raw)
            .map_err(|e| EngineError::Config(format!("layer catalogue: {e}")))?;
        let mut seen = std::collections::HashSet::new();
        for layer in &file.layers {
            if !seen.insert(layer.name.clone()) {
                return Err(EngineError::Config(format!(
                    "duplicate layer '{}' in catalogue",
                    layer.name
                )));
            }
            if layer.kind == LayerKind::MultiBand && layer.bands.is_empty() {
                return Err(EngineError::Config(format!(
                    "multi-band layer '{}' declares no bands",
                    layer.name
                )));
            }
        }
        Ok(Self {
            layers: file.layers,
        })
    }

    pub fn get(&self, name: &str) -> Option<&LayerSpec> {
        self.layers.iter().find(|l| l.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &LayerSpec> {
        self.layers.iter()
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_catalogue_loads() {
        let cat = LayerCatalogue::builtin();
        assert_eq!(cat.len(), 15);
        assert!(cat.get("slope").is_some());
        assert!(cat.get("nonexistent").is_none());
    }

    #[test]
    fn test_slope_exclusions() {
        let cat = LayerCatalogue::builtin();
        let slope = cat.get("slope").unwrap();
        assert_eq!(slope.exclude_from_percent, vec![0]);
        assert_eq!(slope.exclude_from_dominant, vec![0]);
        assert_eq!(slope.label_for(2), Some("moderate"));
        // both bindings for class 1 are shipped
        assert_eq!(slope.label_for(1), Some("gentle"));
        assert_eq!(slope.display_labels.get("1").map(String::as_str), Some("flat"));
    }

    #[test]
    fn test_aspect_counts_flat_but_never_dominant() {
        let cat = LayerCatalogue::builtin();
        let aspect = cat.get("aspect").unwrap();
        assert!(aspect.exclude_from_percent.is_empty());
        assert_eq!(aspect.exclude_from_dominant, vec![0]);
        assert_eq!(aspect.label_for(7), Some("W"));
    }

    #[test]
    fn test_temperature_scale_factor() {
        let cat = LayerCatalogue::builtin();
        assert_eq!(cat.get("temperature").unwrap().scale_factor, 0.1);
        assert_eq!(cat.get("elevation").unwrap().scale_factor, 1.0);
    }

    #[test]
    fn test_soil_bands() {
        let cat = LayerCatalogue::builtin();
        let soil = cat.get("soil").unwrap();
        assert_eq!(soil.kind, LayerKind::MultiBand);
        assert_eq!(soil.bands.len(), 8);
        assert_eq!(soil.bands[0], "clay");
    }

    #[test]
    fn test_duplicate_layer_rejected() {
        let raw = r#"
            [[layer]]
            name = "a"
            table = "t1"
            kind = "continuous"

            [[layer]]
            name = "a"
            table = "t2"
            kind = "continuous"
        "#;
        assert!(LayerCatalogue::from_toml_str(raw).is_err());
    }
}
