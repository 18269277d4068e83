//! Vector proximity analysis around a polygon.
//!
//! Named features (settlements, roads, rivers, ridges) within a distance
//! bound of the polygon are grouped by the compass quadrant of their
//! representative point relative to the polygon centroid. Each direction
//! runs in its own transaction at the store; a failed direction leaves its
//! slot null and the loop continues.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Compass quadrants around the centroid, by azimuth from north.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    North,
    East,
    South,
    West,
}

/// Fixed processing order: N, E, S, W.
pub const DIRECTION_ORDER: [Direction; 4] = [
    Direction::North,
    Direction::East,
    Direction::South,
    Direction::West,
];

impl Direction {
    /// Azimuth arc (degrees clockwise from north) covered by this quadrant.
    /// North wraps around 0°.
    pub fn azimuth_arc(&self) -> (f64, f64) {
        match self {
            Direction::North => (315.0, 45.0),
            Direction::East => (45.0, 135.0),
            Direction::South => (135.0, 225.0),
            Direction::West => (225.0, 315.0),
        }
    }

    /// True when an azimuth in degrees falls in this quadrant.
    pub fn contains_azimuth(&self, azimuth_deg: f64) -> bool {
        let az = azimuth_deg.rem_euclid(360.0);
        let (start, end) = self.azimuth_arc();
        if start > end {
            az >= start || az < end
        } else {
            az >= start && az < end
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::North => write!(f, "north"),
            Direction::East => write!(f, "east"),
            Direction::South => write!(f, "south"),
            Direction::West => write!(f, "west"),
        }
    }
}

/// The vector feature classes the analyser inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureClass {
    Settlements,
    Roads,
    Rivers,
    Ridges,
}

pub const FEATURE_CLASS_ORDER: [FeatureClass; 4] = [
    FeatureClass::Settlements,
    FeatureClass::Roads,
    FeatureClass::Rivers,
    FeatureClass::Ridges,
];

impl FeatureClass {
    /// Database table holding this feature class.
    pub fn table(&self) -> &'static str {
        match self {
            FeatureClass::Settlements => "vec_settlements",
            FeatureClass::Roads => "vec_roads",
            FeatureClass::Rivers => "vec_rivers",
            FeatureClass::Ridges => "vec_ridges",
        }
    }
}

impl std::fmt::Display for FeatureClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FeatureClass::Settlements => write!(f, "settlements"),
            FeatureClass::Roads => write!(f, "roads"),
            FeatureClass::Rivers => write!(f, "rivers"),
            FeatureClass::Ridges => write!(f, "ridges"),
        }
    }
}

/// Per-feature-class direction slots. A `None` slot records a failed
/// direction, distinct from an empty list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassProximity {
    pub features_north: Option<Vec<String>>,
    pub features_east: Option<Vec<String>>,
    pub features_south: Option<Vec<String>>,
    pub features_west: Option<Vec<String>>,
}

impl ClassProximity {
    pub fn slot_mut(&mut self, direction: Direction) -> &mut Option<Vec<String>> {
        match direction {
            Direction::North => &mut self.features_north,
            Direction::East => &mut self.features_east,
            Direction::South => &mut self.features_south,
            Direction::West => &mut self.features_west,
        }
    }

    pub fn slot(&self, direction: Direction) -> &Option<Vec<String>> {
        match direction {
            Direction::North => &self.features_north,
            Direction::East => &self.features_east,
            Direction::South => &self.features_south,
            Direction::West => &self.features_west,
        }
    }
}

/// Proximity results for one polygon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProximitySummary {
    pub distance_m: f64,
    /// feature class name → direction slots
    pub classes: BTreeMap<String, ClassProximity>,
}

impl ProximitySummary {
    pub fn new(distance_m: f64) -> Self {
        let classes = FEATURE_CLASS_ORDER
            .iter()
            .map(|c| (c.to_string(), ClassProximity::default()))
            .collect();
        Self {
            distance_m,
            classes,
        }
    }

    /// Record one direction's fetched names for every class, sorted and
    /// deduplicated.
    pub fn record_direction(
        &mut self,
        direction: Direction,
        by_class: BTreeMap<String, Vec<String>>,
    ) {
        for class in FEATURE_CLASS_ORDER {
            let mut names = by_class.get(&class.to_string()).cloned().unwrap_or_default();
            names.sort();
            names.dedup();
            if let Some(slot) = self.classes.get_mut(&class.to_string()) {
                *slot.slot_mut(direction) = Some(names);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quadrant_boundaries() {
        assert!(Direction::North.contains_azimuth(0.0));
        assert!(Direction::North.contains_azimuth(315.0));
        assert!(Direction::North.contains_azimuth(44.9));
        assert!(!Direction::North.contains_azimuth(45.0));

        assert!(Direction::East.contains_azimuth(45.0));
        assert!(Direction::East.contains_azimuth(90.0));
        assert!(!Direction::East.contains_azimuth(135.0));

        assert!(Direction::South.contains_azimuth(180.0));
        assert!(Direction::West.contains_azimuth(270.0));
        assert!(!Direction::West.contains_azimuth(315.0));
    }

    #[test]
    fn test_every_azimuth_in_exactly_one_quadrant() {
        for az in 0..360 {
            let hits = DIRECTION_ORDER
                .iter()
                .filter(|d| d.contains_azimuth(az as f64))
                .count();
            assert_eq!(hits, 1, "azimuth {az}");
        }
    }

    #[test]
    fn test_record_direction_sorts_and_dedups() {
        let mut summary = ProximitySummary::new(2000.0);
        let mut by_class = BTreeMap::new();
        by_class.insert(
            "settlements".to_string(),
            vec!["Thulo Gaun".to_string(), "Sano Gaun".to_string(), "Thulo Gaun".to_string()],
        );
        summary.record_direction(Direction::North, by_class);
        let slot = summary.classes["settlements"].features_north.as_ref().unwrap();
        assert_eq!(slot, &vec!["Sano Gaun".to_string(), "Thulo Gaun".to_string()]);
        // untouched directions stay null
        assert!(summary.classes["settlements"].features_east.is_none());
        // classes absent from the fetch get an empty list, not null
        assert_eq!(
            summary.classes["roads"].features_north.as_deref(),
            Some(&[] as &[String])
        );
    }
}
