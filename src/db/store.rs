//! The spatial store seam.
//!
//! The orchestrator drives analysis through [`SpatialStore`] so the
//! per-unit transaction discipline lives in one place and tests can swap
//! in a scriptable fake. Every trait method is one unit of work: it opens
//! its own transaction, commits on success and never leaves state behind
//! on failure.

use std::collections::BTreeMap;

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::debug;

use crate::analysis::layers::LayerSpec;
use crate::analysis::proximity::{Direction, FeatureClass, FEATURE_CLASS_ORDER};
use crate::analysis::raster::{BandStats, ClassCount};
use crate::db::with_retry;
use crate::error::EngineError;

/// Blocking-IO boundary to the spatial database.
#[async_trait]
pub trait SpatialStore: Send + Sync {
    /// Pixel counts per class value for a categorical layer clipped to the
    /// polygon. An empty result means the polygon does not overlap the
    /// layer.
    async fn categorical_counts(
        &self,
        layer: &LayerSpec,
        polygon_wkt: &str,
    ) -> Result<Vec<ClassCount>, EngineError>;

    /// Zonal statistics for one band of a continuous or multi-band layer.
    /// `None` means no overlap.
    async fn band_stats(
        &self,
        layer: &LayerSpec,
        polygon_wkt: &str,
        band: u32,
    ) -> Result<Option<BandStats>, EngineError>;

    /// Named features of every class within `distance_m` of the polygon,
    /// restricted to one compass direction from the centroid. Runs as a
    /// single transaction: the direction is the unit of work.
    async fn features_by_direction(
        &self,
        polygon_wkt: &str,
        centroid: (f64, f64),
        metric_epsg: u32,
        direction: Direction,
        distance_m: f64,
    ) -> Result<BTreeMap<String, Vec<String>>, EngineError>;
}

/// PostGIS-backed store.
pub struct PgSpatialStore {
    pool: PgPool,
}

impl PgSpatialStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// Azimuth predicate for one quadrant, over a `deg` expression alias.
fn azimuth_predicate(direction: Direction) -> String {
    let (start, end) = direction.azimuth_arc();
    if start > end {
        format!("(deg >= {start} OR deg < {end})")
    } else {
        format!("(deg >= {start} AND deg < {end})")
    }
}

#[async_trait]
impl SpatialStore for PgSpatialStore {
    async fn categorical_counts(
        &self,
        layer: &LayerSpec,
        polygon_wkt: &str,
    ) -> Result<Vec<ClassCount>, EngineError> {
        let sql = format!(
            "SELECT ((pvc).value)::INT AS class, SUM((pvc).count)::BIGINT AS cells
             FROM (
               SELECT ST_ValueCount(ST_Clip(
                 r.rast,
                 ST_Transform(ST_GeomFromText($1, 4326), ST_SRID(r.rast)),
                 true
               )) AS pvc
               FROM {table} r
               WHERE ST_Intersects(
                 r.rast,
                 ST_Transform(ST_GeomFromText($1, 4326), ST_SRID(r.rast))
               )
             ) t
             GROUP BY ((pvc).value)::INT
             ORDER BY class",
            table = layer.table
        );
        let query = sql.as_str();
        let pool = &self.pool;
        with_retry("categorical_counts", || async move {
            let mut tx = pool.begin().await?;
            let rows = sqlx::query(query)
                .bind(polygon_wkt)
                .fetch_all(&mut *tx)
                .await?;
            tx.commit().await?;
            let counts = rows
                .iter()
                .map(|row| ClassCount {
                    class: row.get::<i32, _>("class"),
                    cells: row.get::<i64, _>("cells"),
                })
                .collect();
            Ok(counts)
        })
        .await
    }

    async fn band_stats(
        &self,
        layer: &LayerSpec,
        polygon_wkt: &str,
        band: u32,
    ) -> Result<Option<BandStats>, EngineError> {
        let sql = format!(
            "SELECT (stats).count::BIGINT AS count,
                    (stats).min AS min,
                    (stats).max AS max,
                    (stats).mean AS mean
             FROM (
               SELECT ST_SummaryStatsAgg(ST_Clip(
                 r.rast,
                 ST_Transform(ST_GeomFromText($1, 4326), ST_SRID(r.rast)),
                 true
               ), $2::INT, true) AS stats
               FROM {table} r
               WHERE ST_Intersects(
                 r.rast,
                 ST_Transform(ST_GeomFromText($1, 4326), ST_SRID(r.rast))
               )
             ) t",
            table = layer.table
        );
        let query = sql.as_str();
        let pool = &self.pool;
        with_retry("band_stats", || async move {
            let mut tx = pool.begin().await?;
            let row = sqlx::query(query)
                .bind(polygon_wkt)
                .bind(band as i32)
                .fetch_optional(&mut *tx)
                .await?;
            tx.commit().await?;
            let stats = row.and_then(|row| {
                let count: Option<i64> = row.get("count");
                let min: Option<f64> = row.get("min");
                let max: Option<f64> = row.get("max");
                let mean: Option<f64> = row.get("mean");
                match (count, min, max, mean) {
                    (Some(count), Some(min), Some(max), Some(mean)) => Some(BandStats {
                        count,
                        min,
                        max,
                        mean,
                    }),
                    _ => None,
                }
            });
            Ok(stats)
        })
        .await
    }

    async fn features_by_direction(
        &self,
        polygon_wkt: &str,
        centroid: (f64, f64),
        metric_epsg: u32,
        direction: Direction,
        distance_m: f64,
    ) -> Result<BTreeMap<String, Vec<String>>, EngineError> {
        debug!(%direction, distance_m, "proximity direction query");
        let pool = &self.pool;
        with_retry("features_by_direction", || async move {
            // the direction is the unit of work: all four feature classes
            // ride one transaction, committed before the next direction
            let mut tx = pool.begin().await?;
            let mut by_class = BTreeMap::new();
            for class in FEATURE_CLASS_ORDER {
                let names = fetch_class_names(
                    &mut tx,
                    class,
                    polygon_wkt,
                    centroid,
                    metric_epsg,
                    direction,
                    distance_m,
                )
                .await?;
                by_class.insert(class.to_string(), names);
            }
            tx.commit().await?;
            Ok(by_class)
        })
        .await
    }
}

async fn fetch_class_names(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    class: FeatureClass,
    polygon_wkt: &str,
    centroid: (f64, f64),
    metric_epsg: u32,
    direction: Direction,
    distance_m: f64,
) -> Result<Vec<String>, EngineError> {
    // distance in metres via the caller-selected projection; direction via
    // the azimuth from the polygon centroid to the feature representative
    // point
    let sql = format!(
        "SELECT DISTINCT name FROM (
           SELECT f.name,
                  degrees(ST_Azimuth(
                    ST_SetSRID(ST_MakePoint($3, $4), 4326),
                    ST_Centroid(f.geom)
                  )) AS deg
           FROM {table} f
           WHERE f.name IS NOT NULL
             AND ST_DWithin(
               ST_Transform(f.geom, $5::INT),
               ST_Transform(ST_GeomFromText($1, 4326), $5::INT),
               $2
             )
         ) t
         WHERE deg IS NOT NULL AND {predicate}
         ORDER BY name",
        table = class.table(),
        predicate = azimuth_predicate(direction)
    );
    let rows = sqlx::query(&sql)
        .bind(polygon_wkt)
        .bind(distance_m)
        .bind(centroid.0)
        .bind(centroid.1)
        .bind(metric_epsg as i32)
        .fetch_all(&mut **tx)
        .await?;
    Ok(rows
        .iter()
        .map(|row| row.get::<String, _>("name"))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_azimuth_predicate_wraps_north() {
        assert_eq!(
            azimuth_predicate(Direction::North),
            "(deg >= 315 OR deg < 45)"
        );
        assert_eq!(
            azimuth_predicate(Direction::South),
            "(deg >= 135 AND deg < 225)"
        );
    }
}
