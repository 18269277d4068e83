//! Per-tree volume computation.
//!
//! Stem volume follows the logarithmic allometric form
//! `stem_m3 = exp(a + b·ln(dbh_cm) + c·ln(height_m)) / 1000` with
//! species coefficients from the catalogue. Branch volume is a
//! DBH-banded ratio of stem volume; net volume applies the stem quality
//! grade; everything not merchantable is counted as firewood.
//!
//! All arithmetic is f64 in a fixed evaluation order. Rounding happens
//! only at serialisation.

use crate::models::species::Species;
use crate::models::tree::{QualityClass, TreeClass, TreeVolumes};

/// Cubic feet per cubic metre.
pub const CUBIC_FEET_PER_M3: f64 = 35.314_666_7;

/// Chatta (local firewood stack unit) per cubic metre.
pub const CHATTA_PER_M3: f64 = 3.624;

/// DBH below this is a seedling.
pub const SEEDLING_DBH_CM: f64 = 10.0;

/// Branch-ratio band boundaries (cm DBH): small / medium / big.
const BRANCH_MEDIUM_DBH_CM: f64 = 10.0;
const BRANCH_BIG_DBH_CM: f64 = 40.0;

fn branch_ratio(species: &Species, dbh_cm: f64) -> f64 {
    let c = &species.coefficients;
    if dbh_cm < BRANCH_MEDIUM_DBH_CM {
        c.s
    } else if dbh_cm < BRANCH_BIG_DBH_CM {
        c.m
    } else {
        c.bg
    }
}

fn stem_volume_m3(species: &Species, dbh_cm: f64, height_m: f64) -> f64 {
    let c = &species.coefficients;
    (c.a + c.b * dbh_cm.ln() + c.c * height_m.ln()).exp() / 1000.0
}

/// Classify by DBH: seedlings are everything under 10 cm.
pub fn classify_by_dbh(dbh_cm: f64) -> TreeClass {
    if dbh_cm < SEEDLING_DBH_CM {
        TreeClass::Seedling
    } else {
        TreeClass::FellingTree
    }
}

/// Compute the full volume set for one tree.
///
/// For non-seedlings the measured height is required by validation, but a
/// missing height still degrades gracefully to the species-typical H/D
/// estimate rather than producing zeros.
///
/// Seedlings ignore the measured height entirely, take their height from
/// the species-typical H/D midpoint, and yield firewood-only outputs.
pub fn compute_volumes(
    species: &Species,
    dbh_cm: f64,
    height_m: Option<f64>,
    quality: QualityClass,
) -> TreeVolumes {
    let seedling = dbh_cm < SEEDLING_DBH_CM;

    let effective_height = if seedling {
        default_height_m(species, dbh_cm)
    } else {
        height_m.unwrap_or_else(|| default_height_m(species, dbh_cm))
    };

    let stem = stem_volume_m3(species, dbh_cm, effective_height);
    let branch = stem * branch_ratio(species, dbh_cm);
    let tree = stem + branch;

    if seedling {
        let firewood_m3 = tree;
        return TreeVolumes {
            stem,
            branch,
            tree,
            gross: 0.0,
            net: 0.0,
            net_cft: 0.0,
            firewood_m3,
            firewood_chatta: firewood_m3 * CHATTA_PER_M3,
        };
    }

    let gross = stem;
    let net = gross * quality.grade_factor();
    let net_cft = net * CUBIC_FEET_PER_M3;
    let firewood_m3 = tree - net;
    let firewood_chatta = firewood_m3 * CHATTA_PER_M3;

    TreeVolumes {
        stem,
        branch,
        tree,
        gross,
        net,
        net_cft,
        firewood_m3,
        firewood_chatta,
    }
}

/// Species-typical height for a DBH, from the H/D ratio midpoint.
pub fn default_height_m(species: &Species, dbh_cm: f64) -> f64 {
    let h = (dbh_cm / 100.0) * species.typical_hd_ratio();
    h.max(0.5)
}
