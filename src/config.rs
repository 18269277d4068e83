use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Connection-pool settings for the spatial database.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub min_connections: u32,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/forest".to_string(),
            min_connections: 1,
            max_connections: 8,
            acquire_timeout_secs: 10,
        }
    }
}

/// Tunable engine defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultsConfig {
    /// Retention grid spacing when an upload does not specify one.
    pub grid_spacing_m: f64,
    /// Distance bound for the proximity analyser.
    pub proximity_distance_m: f64,
    /// Request deadline; absent means no deadline.
    pub request_timeout_secs: Option<u64>,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            grid_spacing_m: crate::models::inventory::DEFAULT_GRID_SPACING_M,
            proximity_distance_m: 2_000.0,
            request_timeout_secs: None,
        }
    }
}

/// Engine configuration, loaded from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub database: DatabaseConfig,
    pub defaults: DefaultsConfig,
    /// Alternative layer catalogue; the builtin one is used when absent.
    pub layer_catalogue_path: Option<PathBuf>,
}

impl EngineConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, EngineError> {
        toml::from_str(raw).map_err(|e| EngineError::Config(format!("engine config: {e}")))
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.defaults.grid_spacing_m, 20.0);
        assert_eq!(cfg.defaults.proximity_distance_m, 2_000.0);
        assert!(cfg.defaults.request_timeout_secs.is_none());
        assert_eq!(cfg.database.max_connections, 8);
    }

    #[test]
    fn test_partial_toml_overlays_defaults() {
        let cfg = EngineConfig::from_toml_str(
            r#"
            [database]
            url = "postgres://db.internal/cf"
            max_connections = 20

            [defaults]
            proximity_distance_m = 1500.0
            "#,
        )
        .unwrap();
        assert_eq!(cfg.database.url, "postgres://db.internal/cf");
        assert_eq!(cfg.database.max_connections, 20);
        assert_eq!(cfg.database.min_connections, 1);
        assert_eq!(cfg.defaults.proximity_distance_m, 1500.0);
        assert_eq!(cfg.defaults.grid_spacing_m, 20.0);
    }

    #[test]
    fn test_bad_toml_is_config_error() {
        assert!(matches!(
            EngineConfig::from_toml_str("database = 3"),
            Err(EngineError::Config(_))
        ));
    }
}
