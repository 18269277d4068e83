//! Coordinate reference system detection and transforms.
//!
//! Nepal spans UTM zones 44N and 45N; field data arrives either in
//! geographic WGS84 degrees or in UTM metres, frequently with the
//! longitude/latitude columns swapped. Detection is a pure range
//! classification over coordinate samples.

use proj4rs::proj::Proj;
use proj4rs::transform::transform;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Nepal bounding box in WGS84 degrees.
pub const NEPAL_LON: (f64, f64) = (80.0, 88.3);
pub const NEPAL_LAT: (f64, f64) = (26.3, 30.5);

/// Plausible UTM ranges for Nepal (either zone).
const UTM_EASTING: (f64, f64) = (200_000.0, 900_000.0);
const UTM_NORTHING: (f64, f64) = (2_800_000.0, 3_500_000.0);

/// The coordinate reference systems the engine accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Crs {
    #[serde(rename = "wgs84")]
    Wgs84,
    #[serde(rename = "utm-44n")]
    Utm44N,
    #[serde(rename = "utm-45n")]
    Utm45N,
}

impl Crs {
    pub fn epsg(&self) -> u32 {
        match self {
            Crs::Wgs84 => 4326,
            Crs::Utm44N => 32644,
            Crs::Utm45N => 32645,
        }
    }

    pub fn is_projected(&self) -> bool {
        !matches!(self, Crs::Wgs84)
    }

    fn proj4_string(&self) -> &'static str {
        match self {
            Crs::Wgs84 => "+proj=longlat +datum=WGS84 +no_defs +type=crs",
            Crs::Utm44N => "+proj=utm +zone=44 +datum=WGS84 +units=m +no_defs +type=crs",
            Crs::Utm45N => "+proj=utm +zone=45 +datum=WGS84 +units=m +no_defs +type=crs",
        }
    }

    /// The metric CRS used for per-polygon and per-inventory operations,
    /// chosen from a WGS84 longitude. Zone 44N covers western Nepal up to
    /// the standard 84°E zone boundary.
    pub fn metric_for_longitude(lon: f64) -> Crs {
        if lon < 84.0 {
            Crs::Utm44N
        } else {
            Crs::Utm45N
        }
    }
}

impl std::fmt::Display for Crs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Crs::Wgs84 => write!(f, "WGS84"),
            Crs::Utm44N => write!(f, "UTM-44N"),
            Crs::Utm45N => write!(f, "UTM-45N"),
        }
    }
}

impl std::str::FromStr for Crs {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace([' ', '_'], "-").as_str() {
            "wgs84" | "epsg:4326" | "4326" | "geographic" => Ok(Crs::Wgs84),
            "utm-44n" | "utm44n" | "epsg:32644" | "32644" => Ok(Crs::Utm44N),
            "utm-45n" | "utm45n" | "epsg:32645" | "32645" => Ok(Crs::Utm45N),
            _ => Err(EngineError::InvalidInput(format!("unknown CRS: '{s}'"))),
        }
    }
}

/// Classifier confidence for detections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionConfidence {
    Low,
    Medium,
    High,
}

/// Outcome of CRS detection over coordinate samples.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CrsDetection {
    Known {
        crs: Crs,
        confidence: DetectionConfidence,
    },
    /// X holds latitudes and Y holds longitudes; correctable by swapping.
    Swapped { confidence: DetectionConfidence },
    Unknown,
}

fn within(v: f64, range: (f64, f64)) -> bool {
    v >= range.0 && v <= range.1
}

fn fraction_within(values: &[f64], range: (f64, f64)) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let hits = values.iter().filter(|v| within(**v, range)).count();
    hits as f64 / values.len() as f64
}

/// Classify coordinate samples by value range.
///
/// Geographic, UTM and swapped ranges are disjoint for Nepal, so the first
/// matching rule wins. A fraction of outliers (up to 10%) downgrades the
/// confidence to medium rather than rejecting the classification.
pub fn detect_crs(xs: &[f64], ys: &[f64]) -> CrsDetection {
    if xs.is_empty() || ys.is_empty() {
        return CrsDetection::Unknown;
    }

    let conf = |fx: f64, fy: f64| {
        if fx >= 1.0 && fy >= 1.0 {
            Some(DetectionConfidence::High)
        } else if fx >= 0.9 && fy >= 0.9 {
            Some(DetectionConfidence::Medium)
        } else {
            None
        }
    };

    // (a) geographic degrees
    if let Some(c) = conf(
        fraction_within(xs, NEPAL_LON),
        fraction_within(ys, NEPAL_LAT),
    ) {
        return CrsDetection::Known {
            crs: Crs::Wgs84,
            confidence: c,
        };
    }

    // (b) UTM metres; zone by mean easting
    if let Some(c) = conf(
        fraction_within(xs, UTM_EASTING),
        fraction_within(ys, UTM_NORTHING),
    ) {
        let mean_x = xs.iter().sum::<f64>() / xs.len() as f64;
        let crs = if mean_x < 500_000.0 {
            Crs::Utm44N
        } else {
            Crs::Utm45N
        };
        return CrsDetection::Known {
            crs,
            confidence: c,
        };
    }

    // (c) axes swapped: X in latitude range, Y in longitude range
    if let Some(c) = conf(
        fraction_within(xs, NEPAL_LAT),
        fraction_within(ys, NEPAL_LON),
    ) {
        return CrsDetection::Swapped { confidence: c };
    }

    CrsDetection::Unknown
}

/// Transform points between two of the accepted CRSs.
///
/// proj4rs works in radians for geographic coordinates, so degrees are
/// converted on the way in and out.
pub fn transform_points(
    from: Crs,
    to: Crs,
    points: &[(f64, f64)],
) -> Result<Vec<(f64, f64)>, EngineError> {
    if from == to {
        return Ok(points.to_vec());
    }
    let src = Proj::from_proj_string(from.proj4_string())
        .map_err(|e| EngineError::Internal(format!("source projection {from}: {e}")))?;
    let dst = Proj::from_proj_string(to.proj4_string())
        .map_err(|e| EngineError::Internal(format!("target projection {to}: {e}")))?;

    let mut out = Vec::with_capacity(points.len());
    for &(x, y) in points {
        let mut p = if from == Crs::Wgs84 {
            (x.to_radians(), y.to_radians(), 0.0)
        } else {
            (x, y, 0.0)
        };
        transform(&src, &dst, &mut p)
            .map_err(|e| EngineError::Internal(format!("transform {from} -> {to}: {e}")))?;
        if to == Crs::Wgs84 {
            out.push((p.0.to_degrees(), p.1.to_degrees()));
        } else {
            out.push((p.0, p.1));
        }
    }
    Ok(out)
}

/// Exchange the longitude/latitude roles of every sample pair.
pub fn swap_axes(points: &[(f64, f64)]) -> Vec<(f64, f64)> {
    points.iter().map(|&(x, y)| (y, x)).collect()
}

/// True when a WGS84 point falls inside the Nepal bounding box.
pub fn inside_nepal(lon: f64, lat: f64) -> bool {
    within(lon, NEPAL_LON) && within(lat, NEPAL_LAT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_detect_geographic() {
        let xs = vec![85.3, 85.4, 85.35];
        let ys = vec![27.7, 27.71, 27.72];
        assert_eq!(
            detect_crs(&xs, &ys),
            CrsDetection::Known {
                crs: Crs::Wgs84,
                confidence: DetectionConfidence::High
            }
        );
    }

    #[test]
    fn test_detect_utm_zone_by_mean_easting() {
        let west = detect_crs(&[350_000.0, 360_000.0], &[3_050_000.0, 3_060_000.0]);
        assert_eq!(
            west,
            CrsDetection::Known {
                crs: Crs::Utm44N,
                confidence: DetectionConfidence::High
            }
        );
        let east = detect_crs(&[650_000.0, 660_000.0], &[3_050_000.0, 3_060_000.0]);
        assert_eq!(
            east,
            CrsDetection::Known {
                crs: Crs::Utm45N,
                confidence: DetectionConfidence::High
            }
        );
    }

    #[test]
    fn test_detect_swapped_axes() {
        let xs = vec![27.7, 27.8];
        let ys = vec![85.3, 85.2];
        assert!(matches!(detect_crs(&xs, &ys), CrsDetection::Swapped { .. }));
    }

    #[test]
    fn test_detect_unknown() {
        assert_eq!(detect_crs(&[1.0, 2.0], &[3.0, 4.0]), CrsDetection::Unknown);
        assert_eq!(detect_crs(&[], &[]), CrsDetection::Unknown);
    }

    #[test]
    fn test_outliers_downgrade_confidence() {
        let mut xs = vec![85.3; 19];
        xs.push(120.0);
        let ys = vec![27.7; 20];
        assert_eq!(
            detect_crs(&xs, &ys),
            CrsDetection::Known {
                crs: Crs::Wgs84,
                confidence: DetectionConfidence::Medium
            }
        );
    }

    #[test]
    fn test_swap_is_involution() {
        let pts = vec![(85.3, 27.7), (86.1, 28.0)];
        assert_eq!(swap_axes(&swap_axes(&pts)), pts);
    }

    #[test]
    fn test_metric_zone_split_at_84() {
        assert_eq!(Crs::metric_for_longitude(82.5), Crs::Utm44N);
        assert_eq!(Crs::metric_for_longitude(85.04), Crs::Utm45N);
        assert_eq!(Crs::metric_for_longitude(87.2), Crs::Utm45N);
    }

    #[test]
    fn test_transform_round_trip() {
        let pts = vec![(85.32, 27.71)];
        let utm = transform_points(Crs::Wgs84, Crs::Utm45N, &pts).unwrap();
        // Kathmandu sits near easting 333k, northing 3066k in zone 45N
        assert!(utm[0].0 > 300_000.0 && utm[0].0 < 400_000.0);
        assert!(utm[0].1 > 3_000_000.0 && utm[0].1 < 3_100_000.0);
        let back = transform_points(Crs::Utm45N, Crs::Wgs84, &utm).unwrap();
        assert_approx_eq!(back[0].0, 85.32, 1e-6);
        assert_approx_eq!(back[0].1, 27.71, 1e-6);
    }

    #[test]
    fn test_crs_from_str() {
        assert_eq!("wgs84".parse::<Crs>().unwrap(), Crs::Wgs84);
        assert_eq!("UTM 45N".parse::<Crs>().unwrap(), Crs::Utm45N);
        assert_eq!("EPSG:32644".parse::<Crs>().unwrap(), Crs::Utm44N);
        assert!("mercator".parse::<Crs>().is_err());
    }
}
