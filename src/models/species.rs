use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Coefficients for the species' volume and biomass equations.
///
/// `a`, `b`, `c` parameterise the logarithmic stem-volume equation;
/// `a1`, `b1` the above-ground biomass form; `s`, `m`, `bg` are the
/// branch-to-stem ratios for small, medium and big trees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AllometricCoefficients {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub a1: f64,
    pub b1: f64,
    pub s: f64,
    pub m: f64,
    pub bg: f64,
}

/// Canonical species record, keyed by code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Species {
    pub code: u32,
    pub scientific_name: String,
    pub local_name: Option<String>,
    /// Lowercased alternative names accepted by the matcher.
    pub aliases: Vec<String>,
    pub coefficients: AllometricCoefficients,
    pub max_dbh_cm: f64,
    pub max_height_m: f64,
    /// Typical height/diameter ratio range (height in m over DBH in m).
    pub hd_ratio_range: (f64, f64),
    pub active: bool,
}

impl Species {
    /// Midpoint of the typical H/D range, used to assign seedling heights.
    pub fn typical_hd_ratio(&self) -> f64 {
        (self.hd_ratio_range.0 + self.hd_ratio_range.1) / 2.0
    }
}

// Raw row shape of the species table CSV.
#[derive(Debug, Deserialize)]
struct SpeciesRow {
    code: u32,
    scientific_name: String,
    local_name: String,
    aliases: String,
    a: f64,
    b: f64,
    c: f64,
    a1: f64,
    b1: f64,
    s: f64,
    m: f64,
    bg: f64,
    max_dbh_cm: f64,
    max_height_m: f64,
    hd_low: f64,
    hd_high: f64,
    active: bool,
}

/// Read-mostly species catalogue, loaded once at process start.
///
/// Lookups by code and by lowercased scientific name are O(1); the matcher
/// walks the full list for prefix and fuzzy passes.
#[derive(Debug, Clone)]
pub struct SpeciesTable {
    species: Vec<Species>,
    by_code: HashMap<u32, usize>,
    by_scientific: HashMap<String, usize>,
}

impl SpeciesTable {
    /// The species catalogue shipped with the engine.
    pub fn builtin() -> Self {
        Self::from_csv(include_str!("../../data/species.csv").as_bytes())
            .expect("embedded species table is well-formed")
    }

    /// Parse a species table from CSV bytes.
    pub fn from_csv(data: &[u8]) -> Result<Self, EngineError> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(data);

        let mut species = Vec::new();
        for result in rdr.deserialize() {
            let row: SpeciesRow = result?;
            species.push(Species {
                code: row.code,
                scientific_name: row.scientific_name,
                local_name: if row.local_name.is_empty() {
                    None
                } else {
                    Some(row.local_name)
                },
                aliases: row
                    .aliases
                    .split('|')
                    .filter(|a| !a.is_empty())
                    .map(|a| a.trim().to_lowercase())
                    .collect(),
                coefficients: AllometricCoefficients {
                    a: row.a,
                    b: row.b,
                    c: row.c,
                    a1: row.a1,
                    b1: row.b1,
                    s: row.s,
                    m: row.m,
                    bg: row.bg,
                },
                max_dbh_cm: row.max_dbh_cm,
                max_height_m: row.max_height_m,
                hd_ratio_range: (row.hd_low, row.hd_high),
                active: row.active,
            });
        }
        Self::from_records(species)
    }

    /// Build a table from already-parsed records, enforcing key uniqueness.
    pub fn from_records(species: Vec<Species>) -> Result<Self, EngineError> {
        let mut by_code = HashMap::new();
        let mut by_scientific = HashMap::new();
        for (i, sp) in species.iter().enumerate() {
            if by_code.insert(sp.code, i).is_some() {
                return Err(EngineError::Config(format!(
                    "duplicate species code {}",
                    sp.code
                )));
            }
            if sp.active
                && by_scientific
                    .insert(sp.scientific_name.to_lowercase(), i)
                    .is_some()
            {
                return Err(EngineError::Config(format!(
                    "duplicate scientific name '{}'",
                    sp.scientific_name
                )));
            }
        }
        Ok(Self {
            species,
            by_code,
            by_scientific,
        })
    }

    pub fn by_code(&self, code: u32) -> Option<&Species> {
        self.by_code.get(&code).map(|&i| &self.species[i])
    }

    pub fn by_scientific_name(&self, name: &str) -> Option<&Species> {
        self.by_scientific
            .get(&name.to_lowercase())
            .map(|&i| &self.species[i])
    }

    /// All active species, in table order.
    pub fn active(&self) -> impl Iterator<Item = &Species> {
        self.species.iter().filter(|s| s.active)
    }

    pub fn len(&self) -> usize {
        self.species.len()
    }

    pub fn is_empty(&self) -> bool {
        self.species.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_table_loads() {
        let table = SpeciesTable::builtin();
        assert!(table.len() >= 20);
        let sal = table.by_code(1).unwrap();
        assert_eq!(sal.scientific_name, "Shorea robusta");
        assert_eq!(sal.local_name.as_deref(), Some("Sal"));
        assert!(sal.aliases.contains(&"sal".to_string()));
    }

    #[test]
    fn test_lookup_by_scientific_name_case_insensitive() {
        let table = SpeciesTable::builtin();
        let sp = table.by_scientific_name("shorea ROBUSTA").unwrap();
        assert_eq!(sp.code, 1);
    }

    #[test]
    fn test_duplicate_code_rejected() {
        let table = SpeciesTable::builtin();
        let mut records: Vec<Species> = table.active().cloned().collect();
        let mut dup = records[0].clone();
        dup.scientific_name = "Something else".into();
        records.push(dup);
        assert!(SpeciesTable::from_records(records).is_err());
    }

    #[test]
    fn test_typical_hd_midpoint() {
        let table = SpeciesTable::builtin();
        let sal = table.by_code(1).unwrap();
        let (lo, hi) = sal.hd_ratio_range;
        assert_eq!(sal.typical_hd_ratio(), (lo + hi) / 2.0);
    }
}
