//! Inventory upload validation.
//!
//! Consumes raw tabular bytes and produces a [`ValidationReport`] plus, when
//! nothing fatal was found, normalised tree rows: species resolved, diameter
//! in cm, height in metres or absent, location in WGS84.
//!
//! The pipeline is ordered and append-only: every step may add issues but
//! never removes earlier ones, and the same input always produces a
//! byte-identical report.

use std::collections::BTreeMap;

use crate::crs::{detect_crs, inside_nepal, transform_points, Crs, CrsDetection};
use crate::error::EngineError;
use crate::inventory::diameter::{detect_diameter_type, DiameterDetection, DiameterType};
use crate::inventory::species_match::{match_species, MatchOptions, MatchType};
use crate::models::report::{
    ColumnRoles, CrsSummary, DiameterSummary, IssueKind, RowIssue, Severity, ValidationReport,
};
use crate::models::species::SpeciesTable;
use crate::models::tree::{QualityClass, TreeRecord};

/// Caller-supplied knobs for one validation run.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidatorOptions {
    /// CRS declared by the user, if any. Disagreement with detection is a
    /// warning; the user value wins.
    pub user_crs: Option<Crs>,
    /// Permit the swapped-axes auto-correction instead of failing.
    pub allow_auto_swap: bool,
}

/// Validation outcome: the report plus normalised rows when processable.
#[derive(Debug, Clone)]
pub struct ValidatedInventory {
    pub report: ValidationReport,
    /// Empty unless `report.ready_for_processing`.
    pub rows: Vec<TreeRecord>,
    /// Metric CRS chosen for downstream grid and distance work.
    pub metric_crs: Option<Crs>,
}

// role -> accepted header aliases, in detection priority order
const ROLE_ALIASES: [(&str, &[&str]); 6] = [
    ("species", &["species", "scientific_name", "tree_species"]),
    ("diameter", &["dia_cm", "diameter", "dbh", "girth", "gbh"]),
    ("x", &["longitude", "long", "lon", "lng", "x", "easting", "coord_x"]),
    ("y", &["latitude", "lat", "y", "northing", "coord_y"]),
    ("height", &["height_m", "height", "tree_height", "ht"]),
    ("class", &["class", "tree_class", "quality_class"]),
];

const DIAMETER_MIN_CM: f64 = 1.0;
const DIAMETER_MAX_CM: f64 = 200.0;
const HEIGHT_MIN_M: f64 = 1.3;
const HEIGHT_MAX_M: f64 = 50.0;
const HD_RATIO_MIN: f64 = 30.0;
const HD_RATIO_MAX: f64 = 150.0;

// ~1 m in degrees; used for the duplicate-location grid
const DUPLICATE_ROUNDING_DP: i32 = 5;

struct RawRow {
    row_number: u32,
    species_token: String,
    x: Option<f64>,
    y: Option<f64>,
    diameter: Option<f64>,
    height: Option<f64>,
    class_token: Option<String>,
}

/// Validate a tabular inventory upload.
///
/// Only unreadable input (undecodable bytes, broken CSV structure) returns
/// `Err`; every data problem lands in the report instead.
pub fn validate_inventory(
    data: &[u8],
    species_table: &SpeciesTable,
    opts: &ValidatorOptions,
) -> Result<ValidatedInventory, EngineError> {
    let mut report = ValidationReport::default();

    // -- step 1: encoding and structure ------------------------------------
    let data = strip_bom(data, &mut report);
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(data);

    let headers: Vec<String> = rdr
        .headers()?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    // -- step 2: column role detection -------------------------------------
    let roles = detect_columns(&headers);
    report.columns = roles_struct(&roles, &headers);
    for required in ["species", "diameter", "x", "y"] {
        if !roles.contains_key(required) {
            report.push(RowIssue::file_level(
                Severity::Fatal,
                IssueKind::MissingColumn,
                format!("no column recognised for required role '{required}'"),
            ));
        }
    }

    // read raw rows even when roles are missing so the row count is honest
    let mut raw_rows: Vec<RawRow> = Vec::new();
    let mut empty_trailing = 0u32;
    for (i, result) in rdr.records().enumerate() {
        let record = result?;
        let row_number = i as u32 + 1;
        if record.iter().all(|f| f.trim().is_empty()) {
            empty_trailing += 1;
            continue;
        }
        let get = |role: &str| -> Option<&str> {
            roles
                .get(role)
                .and_then(|&col| record.get(col))
                .map(str::trim)
                .filter(|v| !v.is_empty())
        };
        let parse_num = |role: &str| -> Option<f64> { get(role).and_then(|v| v.parse().ok()) };

        raw_rows.push(RawRow {
            row_number,
            species_token: get("species").unwrap_or("").to_string(),
            x: parse_num("x"),
            y: parse_num("y"),
            diameter: parse_num("diameter"),
            height: parse_num("height"),
            class_token: get("class").map(str::to_string),
        });
    }
    if empty_trailing > 0 {
        report.push(RowIssue::file_level(
            Severity::Info,
            IssueKind::EmptyRow,
            format!("skipped {empty_trailing} empty row(s)"),
        ));
    }
    report.row_count = raw_rows.len() as u32;

    if raw_rows.is_empty() {
        report.push(RowIssue::file_level(
            Severity::Fatal,
            IssueKind::InvalidInput,
            "no data rows found",
        ));
    }

    if !report.errors.is_empty() {
        report.finalise();
        return Ok(ValidatedInventory {
            report,
            rows: Vec::new(),
            metric_crs: None,
        });
    }

    // -- step 3: CRS detection ---------------------------------------------
    // (0,0) rows are a GPS failure sentinel; they fail per-row checks later
    // and must not poison range classification here
    let samples: Vec<(f64, f64)> = raw_rows
        .iter()
        .filter_map(|r| match (r.x, r.y) {
            (Some(x), Some(y)) if !(x == 0.0 && y == 0.0) => Some((x, y)),
            _ => None,
        })
        .collect();
    let xs: Vec<f64> = samples.iter().map(|p| p.0).collect();
    let ys: Vec<f64> = samples.iter().map(|p| p.1).collect();
    let detection = detect_crs(&xs, &ys);

    let mut swapped = false;
    let (detected_crs, detection_confidence) = match detection {
        CrsDetection::Known { crs, confidence } => (Some(crs), Some(confidence)),
        CrsDetection::Swapped { confidence } => {
            swapped = true;
            if opts.allow_auto_swap {
                report.push(
                    RowIssue::file_level(
                        Severity::Warning,
                        IssueKind::CoordsSwapped,
                        "X/Y columns appear swapped; swap auto-correction applied",
                    )
                    .with_values("swap", Some("applied".into())),
                );
                (Some(Crs::Wgs84), Some(confidence))
            } else {
                report.push(RowIssue::file_level(
                    Severity::Fatal,
                    IssueKind::CoordsSwapped,
                    "X/Y columns appear swapped; resubmit with corrected columns \
                     or allow the swap auto-correction",
                ));
                (None, Some(confidence))
            }
        }
        CrsDetection::Unknown => (None, None),
    };

    let effective_crs = match (opts.user_crs, detected_crs) {
        (Some(user), Some(found)) => {
            if user != found {
                report.push(RowIssue::file_level(
                    Severity::Warning,
                    IssueKind::CrsMismatch,
                    format!("user declared {user} but coordinates look like {found}; using {user}"),
                ));
            }
            Some(user)
        }
        (Some(user), None) => Some(user),
        (None, Some(found)) => Some(found),
        (None, None) => {
            if !swapped {
                report.push(RowIssue::file_level(
                    Severity::Fatal,
                    IssueKind::CrsUndetectable,
                    "coordinate system could not be detected and none was declared",
                ));
            }
            None
        }
    };

    report.crs = CrsSummary {
        detected: detected_crs,
        confidence: detection_confidence,
        swapped,
        user_override: opts.user_crs,
        metric_crs: None,
    };

    // -- step 4: diameter-type detection ------------------------------------
    let diameter_values: Vec<f64> = raw_rows.iter().filter_map(|r| r.diameter).collect();
    let diameter_header = roles.get("diameter").map(|&c| headers[c].as_str());
    let dia_detection = detect_diameter_type(&diameter_values, diameter_header);
    report.diameter = Some(DiameterSummary {
        is_girth: dia_detection.diameter_type == DiameterType::Girth,
        confidence: dia_detection.confidence,
        requires_confirmation: dia_detection.requires_confirmation,
    });
    if dia_detection.requires_confirmation {
        report.push(RowIssue::file_level(
            Severity::Warning,
            IssueKind::GirthAmbiguous,
            "could not decide between diameter and girth; assuming diameter",
        ));
    }
    if dia_detection.diameter_type == DiameterType::Girth {
        report.push(girth_conversion_info(&diameter_values, &dia_detection));
    }

    if !report.errors.is_empty() || effective_crs.is_none() {
        report.finalise();
        return Ok(ValidatedInventory {
            report,
            rows: Vec::new(),
            metric_crs: None,
        });
    }
    let effective_crs = effective_crs.unwrap_or(Crs::Wgs84);

    // -- steps 5 & 6: per-row checks and species resolution ------------------
    let match_opts = MatchOptions::default();
    let mut rows: Vec<TreeRecord> = Vec::with_capacity(raw_rows.len());
    let mut height_above_diameter = 0usize;
    let mut rows_with_both = 0usize;

    for raw in &raw_rows {
        let row = raw.row_number;
        let mut row_ok = true;

        // species
        let outcome = match_species(species_table, &raw.species_token, &match_opts);
        let species = match outcome.species {
            Some(sp) => {
                if outcome.match_type == MatchType::Fuzzy {
                    report.push(
                        RowIssue::for_row(
                            row,
                            "species",
                            Severity::Warning,
                            IssueKind::SpeciesCorrected,
                            format!(
                                "species '{}' auto-corrected to '{}'",
                                raw.species_token, sp.scientific_name
                            ),
                        )
                        .with_values(
                            raw.species_token.clone(),
                            Some(sp.scientific_name.clone()),
                        )
                        .with_confidence(outcome.confidence),
                    );
                }
                Some(sp)
            }
            None => {
                let suggestions: Vec<String> = outcome
                    .near_matches
                    .iter()
                    .map(|n| format!("{} ({:.0})", n.scientific_name, n.score * 100.0))
                    .collect();
                report.push(
                    RowIssue::for_row(
                        row,
                        "species",
                        Severity::Fatal,
                        IssueKind::SpeciesUnknown,
                        format!(
                            "species '{}' not recognised; closest: {}",
                            raw.species_token,
                            suggestions.join(", ")
                        ),
                    )
                    .with_values(raw.species_token.clone(), None),
                );
                row_ok = false;
                None
            }
        };

        // coordinates
        let lonlat = match (raw.x, raw.y) {
            (Some(x), Some(y)) => {
                let (x, y) = if swapped { (y, x) } else { (x, y) };
                check_coordinates(row, x, y, effective_crs, &mut report, &mut row_ok)
            }
            _ => {
                report.push(RowIssue::for_row(
                    row,
                    "x/y",
                    Severity::Fatal,
                    IssueKind::InvalidInput,
                    "missing or non-numeric coordinates",
                ));
                row_ok = false;
                None
            }
        };

        // diameter
        let dbh_cm = match raw.diameter {
            Some(value) => {
                let dbh = dia_detection.convert(value);
                if !(DIAMETER_MIN_CM..=DIAMETER_MAX_CM).contains(&dbh) {
                    report.push(
                        RowIssue::for_row(
                            row,
                            "diameter",
                            Severity::Fatal,
                            IssueKind::RangeFatal,
                            format!(
                                "diameter {dbh:.1} cm outside [{DIAMETER_MIN_CM}, {DIAMETER_MAX_CM}]"
                            ),
                        )
                        .with_values(format!("{value}"), None),
                    );
                    row_ok = false;
                    None
                } else {
                    if let Some(sp) = species {
                        if dbh > sp.max_dbh_cm {
                            report.push(RowIssue::for_row(
                                row,
                                "diameter",
                                Severity::Warning,
                                IssueKind::RangeSuspect,
                                format!(
                                    "diameter {dbh:.1} cm exceeds the {:.0} cm maximum \
                                     recorded for {}",
                                    sp.max_dbh_cm, sp.scientific_name
                                ),
                            ));
                        }
                    }
                    Some(dbh)
                }
            }
            None => {
                report.push(RowIssue::for_row(
                    row,
                    "diameter",
                    Severity::Fatal,
                    IssueKind::InvalidInput,
                    "missing or non-numeric diameter",
                ));
                row_ok = false;
                None
            }
        };

        // height and H/D ratio
        if let Some(h) = raw.height {
            if !(HEIGHT_MIN_M..=HEIGHT_MAX_M).contains(&h) {
                report.push(
                    RowIssue::for_row(
                        row,
                        "height",
                        Severity::Fatal,
                        IssueKind::RangeFatal,
                        format!("height {h:.1} m outside [{HEIGHT_MIN_M}, {HEIGHT_MAX_M}]"),
                    )
                    .with_values(format!("{h}"), None),
                );
                row_ok = false;
            } else if let Some(dbh) = dbh_cm {
                let ratio = h / (dbh / 100.0);
                if !(HD_RATIO_MIN..=HD_RATIO_MAX).contains(&ratio) {
                    report.push(RowIssue::for_row(
                        row,
                        "height",
                        Severity::Warning,
                        IssueKind::HdRatioSuspect,
                        format!("height/diameter ratio {ratio:.0} outside [30, 150]"),
                    ));
                }
            }
        }

        // column-swap evidence: height in metres should not exceed DBH in cm
        if let (Some(h), Some(d)) = (raw.height, raw.diameter) {
            rows_with_both += 1;
            if h > d {
                height_above_diameter += 1;
            }
        }

        // quality class
        let quality_class = match &raw.class_token {
            Some(token) => match token.parse::<QualityClass>() {
                Ok(c) => c,
                Err(_) => {
                    report.push(
                        RowIssue::for_row(
                            row,
                            "class",
                            Severity::Warning,
                            IssueKind::InvalidInput,
                            format!("unknown quality class '{token}', defaulting to B"),
                        )
                        .with_values(token.clone(), Some("B".into())),
                    );
                    QualityClass::default()
                }
            },
            None => QualityClass::default(),
        };

        if let (true, Some(sp), Some(dbh), Some((lon, lat))) = (row_ok, species, dbh_cm, lonlat) {
            rows.push(TreeRecord {
                row_number: row,
                species_code: sp.code,
                species_name: sp.scientific_name.clone(),
                dbh_cm: dbh,
                height_m: raw.height,
                quality_class,
                longitude: lon,
                latitude: lat,
                volumes: None,
                classification: None,
                grid_cell_id: None,
                remark: None,
            });
        }
    }

    // -- step 7: cross-row consistency --------------------------------------
    if rows_with_both > 0 && height_above_diameter * 2 > rows_with_both {
        report.push(RowIssue::file_level(
            Severity::Fatal,
            IssueKind::ColumnSwap,
            format!(
                "{height_above_diameter} of {rows_with_both} rows have height greater than \
                 diameter; the columns are probably swapped (action: swap_columns)"
            ),
        ));
    }
    detect_duplicate_locations(&rows, &mut report);
    detect_grid_pattern(&rows, &mut report);

    let metric_crs = rows.first().map(|r| Crs::metric_for_longitude(r.longitude));
    if let Some(metric) = metric_crs {
        report.crs.metric_crs = Some(metric);
        report.push(RowIssue::file_level(
            Severity::Info,
            IssueKind::CrsSelected,
            format!("{metric} selected for metric operations"),
        ));
    }

    report.finalise();
    let rows = if report.ready_for_processing {
        rows
    } else {
        Vec::new()
    };
    Ok(ValidatedInventory {
        report,
        rows,
        metric_crs,
    })
}

fn strip_bom<'a>(data: &'a [u8], report: &mut ValidationReport) -> &'a [u8] {
    if data.starts_with(&[0xEF, 0xBB, 0xBF]) {
        report.push(RowIssue::file_level(
            Severity::Info,
            IssueKind::InvalidInput,
            "UTF-8 byte order mark stripped",
        ));
        &data[3..]
    } else {
        data
    }
}

// header index per role; first alias hit wins, exact before substring
fn detect_columns(headers: &[String]) -> BTreeMap<&'static str, usize> {
    let lowered: Vec<String> = headers.iter().map(|h| h.to_lowercase()).collect();
    let mut roles: BTreeMap<&'static str, usize> = BTreeMap::new();
    let mut taken = vec![false; headers.len()];

    for (role, aliases) in ROLE_ALIASES {
        // exact pass
        let mut found = lowered.iter().enumerate().find(|(i, h)| {
            !taken[*i] && aliases.iter().any(|a| h.as_str() == *a)
        });
        // substring pass; short aliases like "x" stay exact-only
        if found.is_none() {
            found = lowered.iter().enumerate().find(|(i, h)| {
                !taken[*i] && aliases.iter().any(|a| a.len() >= 3 && h.contains(a))
            });
        }
        if let Some((i, _)) = found {
            taken[i] = true;
            roles.insert(role, i);
        }
    }
    roles
}

fn roles_struct(roles: &BTreeMap<&'static str, usize>, headers: &[String]) -> ColumnRoles {
    let name = |role: &str| roles.get(role).map(|&i| headers[i].clone());
    ColumnRoles {
        species: name("species"),
        diameter: name("diameter"),
        x: name("x"),
        y: name("y"),
        height: name("height"),
        class: name("class"),
    }
}

fn girth_conversion_info(values: &[f64], detection: &DiameterDetection) -> RowIssue {
    let samples: Vec<String> = values
        .iter()
        .take(3)
        .map(|&g| format!("{:.1} -> {:.1}", g, detection.convert(g)))
        .collect();
    RowIssue::file_level(
        Severity::Info,
        IssueKind::GirthToDiameter,
        format!(
            "girth column converted to diameter (÷π); samples: {}",
            samples.join(", ")
        ),
    )
}

// world-bounds, (0,0) and Nepal checks; returns WGS84 lon/lat when plausible
fn check_coordinates(
    row: u32,
    x: f64,
    y: f64,
    crs: Crs,
    report: &mut ValidationReport,
    row_ok: &mut bool,
) -> Option<(f64, f64)> {
    if x == 0.0 && y == 0.0 {
        report.push(RowIssue::for_row(
            row,
            "x/y",
            Severity::Fatal,
            IssueKind::RangeFatal,
            "coordinates are (0, 0)",
        ));
        *row_ok = false;
        return None;
    }

    let world_ok = match crs {
        Crs::Wgs84 => (-180.0..=180.0).contains(&x) && (-90.0..=90.0).contains(&y),
        _ => (0.0..=1_000_000.0).contains(&x) && (0.0..=10_000_000.0).contains(&y),
    };
    if !world_ok {
        report.push(RowIssue::for_row(
            row,
            "x/y",
            Severity::Fatal,
            IssueKind::RangeFatal,
            format!("coordinates ({x}, {y}) outside world bounds for {crs}"),
        ));
        *row_ok = false;
        return None;
    }

    let (lon, lat) = if crs == Crs::Wgs84 {
        (x, y)
    } else {
        match transform_points(crs, Crs::Wgs84, &[(x, y)]) {
            Ok(pts) => pts[0],
            Err(_) => {
                report.push(RowIssue::for_row(
                    row,
                    "x/y",
                    Severity::Fatal,
                    IssueKind::RangeFatal,
                    format!("coordinates ({x}, {y}) could not be transformed from {crs}"),
                ));
                *row_ok = false;
                return None;
            }
        }
    };

    if !inside_nepal(lon, lat) {
        report.push(RowIssue::for_row(
            row,
            "x/y",
            Severity::Warning,
            IssueKind::OutsideNepal,
            format!("location ({lon:.5}, {lat:.5}) falls outside Nepal bounds"),
        ));
    }
    Some((lon, lat))
}

fn detect_duplicate_locations(rows: &[TreeRecord], report: &mut ValidationReport) {
    let factor = 10f64.powi(DUPLICATE_ROUNDING_DP);
    let mut seen: BTreeMap<(i64, i64), u32> = BTreeMap::new();
    for tree in rows {
        let key = (
            (tree.longitude * factor).round() as i64,
            (tree.latitude * factor).round() as i64,
        );
        match seen.get(&key) {
            Some(&first_row) => {
                report.push(RowIssue::for_row(
                    tree.row_number,
                    "x/y",
                    Severity::Warning,
                    IssueKind::DuplicateLocation,
                    format!("location within ~1 m of row {first_row}"),
                ));
            }
            None => {
                seen.insert(key, tree.row_number);
            }
        }
    }
}

// flags inputs whose points sit on a perfectly regular lattice; usually a
// sign of synthesised rather than surveyed data
fn detect_grid_pattern(rows: &[TreeRecord], report: &mut ValidationReport) {
    if rows.len() < 9 {
        return;
    }
    let regular = |mut values: Vec<f64>| -> bool {
        values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        values.dedup_by(|a, b| (*a - *b).abs() < 1e-9);
        if values.len() < 3 {
            return false;
        }
        let gaps: Vec<f64> = values.windows(2).map(|w| w[1] - w[0]).collect();
        let first = gaps[0];
        first > 0.0 && gaps.iter().all(|g| (g - first).abs() < first * 0.01)
    };
    let xs: Vec<f64> = rows.iter().map(|t| t.longitude).collect();
    let ys: Vec<f64> = rows.iter().map(|t| t.latitude).collect();
    if regular(xs) && regular(ys) {
        report.push(RowIssue::file_level(
            Severity::Info,
            IssueKind::GridPattern,
            "tree locations form a perfectly regular grid",
        ));
    }
}
