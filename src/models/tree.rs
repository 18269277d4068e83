use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Stem quality grade assigned in the field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QualityClass {
    A,
    B,
    C,
}

impl QualityClass {
    /// Merchantable fraction of gross volume for this grade.
    pub fn grade_factor(&self) -> f64 {
        match self {
            QualityClass::A => 0.75,
            QualityClass::B => 0.60,
            QualityClass::C => 0.45,
        }
    }
}

impl Default for QualityClass {
    fn default() -> Self {
        QualityClass::B
    }
}

impl std::fmt::Display for QualityClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QualityClass::A => write!(f, "A"),
            QualityClass::B => write!(f, "B"),
            QualityClass::C => write!(f, "C"),
        }
    }
}

impl std::str::FromStr for QualityClass {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "A" | "1" => Ok(QualityClass::A),
            "B" | "2" => Ok(QualityClass::B),
            "C" | "3" => Ok(QualityClass::C),
            _ => Err(EngineError::InvalidInput(format!(
                "unknown quality class: '{s}'"
            ))),
        }
    }
}

/// Post-processing classification of a tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TreeClass {
    MotherTree,
    FellingTree,
    Seedling,
}

impl std::fmt::Display for TreeClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TreeClass::MotherTree => write!(f, "Mother Tree"),
            TreeClass::FellingTree => write!(f, "Felling Tree"),
            TreeClass::Seedling => write!(f, "Seedling"),
        }
    }
}

impl std::str::FromStr for TreeClass {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mother tree" | "mother" => Ok(TreeClass::MotherTree),
            "felling tree" | "felling" => Ok(TreeClass::FellingTree),
            "seedling" => Ok(TreeClass::Seedling),
            _ => Err(EngineError::InvalidInput(format!(
                "unknown tree class: '{s}'"
            ))),
        }
    }
}

/// Derived per-tree volumes, all in cubic metres unless suffixed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TreeVolumes {
    pub stem: f64,
    pub branch: f64,
    /// stem + branch
    pub tree: f64,
    pub gross: f64,
    pub net: f64,
    pub net_cft: f64,
    pub firewood_m3: f64,
    pub firewood_chatta: f64,
}

/// One normalised inventory row.
///
/// Location is always WGS84 after validation; diameter is always in cm
/// (girth inputs are converted before rows are built).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeRecord {
    /// 1-based data row number in the uploaded file.
    pub row_number: u32,
    pub species_code: u32,
    pub species_name: String,
    pub dbh_cm: f64,
    pub height_m: Option<f64>,
    pub quality_class: QualityClass,
    pub longitude: f64,
    pub latitude: f64,
    pub volumes: Option<TreeVolumes>,
    pub classification: Option<TreeClass>,
    /// Set only for mother trees.
    pub grid_cell_id: Option<i64>,
    pub remark: Option<String>,
}

impl TreeRecord {
    /// DBH below 10 cm marks a seedling.
    pub fn is_seedling(&self) -> bool {
        self.dbh_cm < 10.0
    }

    /// Eligible for retention selection: a non-seedling with volumes set.
    pub fn retention_candidate(&self) -> bool {
        !self.is_seedling()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(dbh: f64) -> TreeRecord {
        TreeRecord {
            row_number: 1,
            species_code: 1,
            species_name: "Shorea robusta".into(),
            dbh_cm: dbh,
            height_m: Some(18.0),
            quality_class: QualityClass::A,
            longitude: 85.3,
            latitude: 27.7,
            volumes: None,
            classification: None,
            grid_cell_id: None,
            remark: None,
        }
    }

    #[test]
    fn test_seedling_boundary_is_exclusive_at_ten() {
        assert!(record(9.99).is_seedling());
        assert!(!record(10.0).is_seedling());
        assert!(record(10.0).retention_candidate());
    }

    #[test]
    fn test_quality_class_parse() {
        assert_eq!("a".parse::<QualityClass>().unwrap(), QualityClass::A);
        assert_eq!(" B ".parse::<QualityClass>().unwrap(), QualityClass::B);
        assert_eq!("3".parse::<QualityClass>().unwrap(), QualityClass::C);
        assert!("D".parse::<QualityClass>().is_err());
    }

    #[test]
    fn test_tree_class_display_round_trip() {
        for class in [
            TreeClass::MotherTree,
            TreeClass::FellingTree,
            TreeClass::Seedling,
        ] {
            assert_eq!(class.to_string().parse::<TreeClass>().unwrap(), class);
        }
    }

    #[test]
    fn test_grade_factors_descend() {
        assert!(QualityClass::A.grade_factor() > QualityClass::B.grade_factor());
        assert!(QualityClass::B.grade_factor() > QualityClass::C.grade_factor());
    }
}
