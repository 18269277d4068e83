//! Diameter-vs-girth column detection.
//!
//! Uploads label the same measurement either as diameter (DBH) or as
//! girth/circumference. The column name decides when it can; otherwise the
//! value distribution does: Nepali broadleaf stands rarely exceed 100 cm
//! DBH, while girth readings routinely do.

use serde::{Deserialize, Serialize};
use statrs::statistics::{Data, OrderStatistics};

use crate::crs::DetectionConfidence;

/// Whether a numeric column holds diameters or girths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiameterType {
    Diameter,
    Girth,
}

/// Detection verdict plus the converter normalising values to DBH cm.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiameterDetection {
    pub diameter_type: DiameterType,
    pub confidence: DetectionConfidence,
    pub requires_confirmation: bool,
}

impl DiameterDetection {
    /// Convert a raw column value to diameter in cm.
    pub fn convert(&self, value: f64) -> f64 {
        match self.diameter_type {
            DiameterType::Diameter => value,
            DiameterType::Girth => value / std::f64::consts::PI,
        }
    }
}

const GIRTH_NAME_HINTS: [&str; 3] = ["girth", "gbh", "circumference"];
const DIAMETER_NAME_HINTS: [&str; 3] = ["diameter", "dbh", "dia"];

/// Decide diameter vs girth from the column name and sample values.
pub fn detect_diameter_type(values: &[f64], column_name: Option<&str>) -> DiameterDetection {
    if let Some(name) = column_name {
        let lower = name.to_lowercase();
        if GIRTH_NAME_HINTS.iter().any(|h| lower.contains(h)) {
            return DiameterDetection {
                diameter_type: DiameterType::Girth,
                confidence: DetectionConfidence::High,
                requires_confirmation: false,
            };
        }
        if DIAMETER_NAME_HINTS.iter().any(|h| lower.contains(h)) {
            return DiameterDetection {
                diameter_type: DiameterType::Diameter,
                confidence: DetectionConfidence::High,
                requires_confirmation: false,
            };
        }
    }

    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        return DiameterDetection {
            diameter_type: DiameterType::Diameter,
            confidence: DetectionConfidence::Low,
            requires_confirmation: true,
        };
    }

    let mean = finite.iter().sum::<f64>() / finite.len() as f64;
    if mean > 100.0 {
        return DiameterDetection {
            diameter_type: DiameterType::Girth,
            confidence: DetectionConfidence::High,
            requires_confirmation: false,
        };
    }
    if mean < 50.0 {
        return DiameterDetection {
            diameter_type: DiameterType::Diameter,
            confidence: DetectionConfidence::High,
            requires_confirmation: false,
        };
    }

    // 50–100 cm band: look at the upper tail
    let mut data = Data::new(finite);
    let p75 = data.percentile(75);
    if p75 > 80.0 {
        DiameterDetection {
            diameter_type: DiameterType::Girth,
            confidence: DetectionConfidence::Medium,
            requires_confirmation: false,
        }
    } else {
        DiameterDetection {
            diameter_type: DiameterType::Diameter,
            confidence: DetectionConfidence::Medium,
            requires_confirmation: false,
        }
    }
}
