//! Species token resolution.
//!
//! Field crews record species as codes, scientific names, local names,
//! abbreviations ("sho rob") or misspellings. The matcher tries each
//! strategy and returns the highest-confidence hit above the caller's
//! threshold; ties resolve to the lexicographically smallest scientific
//! name so resolution is deterministic.

use serde::{Deserialize, Serialize};

use crate::models::species::{Species, SpeciesTable};

/// How a token was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    Code,
    Exact,
    Alias,
    Abbreviated,
    Fuzzy,
    None,
}

/// Scored near-miss offered when nothing clears the threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NearMatch {
    pub scientific_name: String,
    pub score: f64,
}

/// Resolution outcome for one token.
#[derive(Debug, Clone)]
pub struct MatchOutcome<'a> {
    pub species: Option<&'a Species>,
    pub match_type: MatchType,
    pub confidence: f64,
    pub matched_field: Option<String>,
    /// Up to 5 best near-misses, populated only when `species` is None.
    pub near_matches: Vec<NearMatch>,
}

/// Matcher thresholds.
#[derive(Debug, Clone, Copy)]
pub struct MatchOptions {
    /// Overall floor a candidate must clear to be returned.
    pub min_confidence: f64,
    /// Floor for the fuzzy strategy specifically.
    pub fuzzy_threshold: f64,
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self {
            min_confidence: 0.6,
            fuzzy_threshold: 0.85,
        }
    }
}

const GENUS_PREFIX_BASE: f64 = 0.70;
const EPITHET_PREFIX_BASE: f64 = 0.65;
const TWO_PART_BASE: f64 = 0.80;

fn normalise(token: &str) -> String {
    token
        .to_lowercase()
        .replace(['/', '-', '_'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Token-sort form: split, sort alphabetically, rejoin.
fn token_sort(s: &str) -> String {
    let mut parts: Vec<&str> = s.split_whitespace().collect();
    parts.sort_unstable();
    parts.join(" ")
}

// base confidence at a full-word match, scaled down for shorter prefixes
fn prefix_score(part: &str, word: &str, base: f64) -> Option<f64> {
    if word.starts_with(part) && !part.is_empty() {
        let ratio = part.len() as f64 / word.len() as f64;
        Some(base * (0.75 + 0.25 * ratio))
    } else {
        None
    }
}

// Best candidate for one species, across all textual strategies.
fn score_species(species: &Species, token: &str, opts: &MatchOptions) -> Option<(f64, MatchType, String)> {
    let scientific = species.scientific_name.to_lowercase();
    let local = species.local_name.as_deref().map(str::to_lowercase);

    // exact scientific or local name
    if token == scientific {
        return Some((1.0, MatchType::Exact, "scientific_name".into()));
    }
    if local.as_deref() == Some(token) {
        return Some((1.0, MatchType::Exact, "local_name".into()));
    }
    // exact alias
    if species.aliases.iter().any(|a| a == token) {
        return Some((1.0, MatchType::Alias, "alias".into()));
    }

    let mut best: Option<(f64, MatchType, String)> = None;
    let mut consider = |score: f64, match_type: MatchType, field: &str| {
        if best.as_ref().map(|(s, _, _)| score > *s).unwrap_or(true) {
            best = Some((score, match_type, field.to_string()));
        }
    };

    // abbreviated prefixes against the scientific binomial
    let mut words = scientific.split_whitespace();
    let genus = words.next().unwrap_or("");
    let epithet = words.next().unwrap_or("");
    let parts: Vec<&str> = token.split_whitespace().collect();
    match parts.as_slice() {
        [one] if one.len() >= 3 => {
            if let Some(s) = prefix_score(one, genus, GENUS_PREFIX_BASE) {
                consider(s, MatchType::Abbreviated, "genus");
            }
            if let Some(s) = prefix_score(one, epithet, EPITHET_PREFIX_BASE) {
                consider(s, MatchType::Abbreviated, "epithet");
            }
        }
        [g, e] => {
            if let (Some(sg), Some(se)) = (
                prefix_score(g, genus, TWO_PART_BASE),
                prefix_score(e, epithet, TWO_PART_BASE),
            ) {
                consider((sg + se) / 2.0, MatchType::Abbreviated, "genus+epithet");
            }
        }
        _ => {}
    }

    // fuzzy: token-sort edit distance against scientific, local and aliases
    let sorted_token = token_sort(token);
    let mut fuzzy_best: Option<(f64, &str)> = None;
    let mut fuzzy_consider = |target: &str, field: &'static str| {
        let score = strsim::normalized_levenshtein(&sorted_token, &token_sort(target));
        if fuzzy_best.map(|(s, _)| score > s).unwrap_or(true) {
            fuzzy_best = Some((score, field));
        }
    };
    fuzzy_consider(&scientific, "scientific_name");
    if let Some(local) = &local {
        fuzzy_consider(local, "local_name");
    }
    for alias in &species.aliases {
        fuzzy_consider(alias, "alias");
    }
    if let Some((score, field)) = fuzzy_best {
        if score >= opts.fuzzy_threshold {
            consider(score, MatchType::Fuzzy, field);
        }
    }

    best
}

fn fuzzy_score(species: &Species, token: &str) -> f64 {
    let sorted_token = token_sort(token);
    let mut best = strsim::normalized_levenshtein(
        &sorted_token,
        &token_sort(&species.scientific_name.to_lowercase()),
    );
    if let Some(local) = &species.local_name {
        best = best.max(strsim::normalized_levenshtein(
            &sorted_token,
            &token_sort(&local.to_lowercase()),
        ));
    }
    for alias in &species.aliases {
        best = best.max(strsim::normalized_levenshtein(&sorted_token, &token_sort(alias)));
    }
    best
}

/// Resolve a species token against the table.
pub fn match_species<'a>(
    table: &'a SpeciesTable,
    token: &str,
    opts: &MatchOptions,
) -> MatchOutcome<'a> {
    let trimmed = token.trim();

    // numeric token: species code, confidence 1.0
    if let Ok(code) = trimmed.parse::<u32>() {
        if let Some(species) = table.by_code(code).filter(|s| s.active) {
            return MatchOutcome {
                species: Some(species),
                match_type: MatchType::Code,
                confidence: 1.0,
                matched_field: Some("code".into()),
                near_matches: Vec::new(),
            };
        }
    }

    let normalised = normalise(trimmed);
    if normalised.is_empty() {
        return no_match(table, &normalised);
    }

    let mut best: Option<(f64, MatchType, String, &Species)> = None;
    for species in table.active() {
        if let Some((score, match_type, field)) = score_species(species, &normalised, opts) {
            let better = match &best {
                None => true,
                Some((s, _, _, sp)) => {
                    score > *s
                        || (score == *s
                            && species.scientific_name < sp.scientific_name)
                }
            };
            if better {
                best = Some((score, match_type, field, species));
            }
        }
    }

    match best {
        Some((confidence, match_type, field, species)) if confidence >= opts.min_confidence => {
            MatchOutcome {
                species: Some(species),
                match_type,
                confidence,
                matched_field: Some(field),
                near_matches: Vec::new(),
            }
        }
        _ => no_match(table, &normalised),
    }
}

fn no_match<'a>(table: &'a SpeciesTable, token: &str) -> MatchOutcome<'a> {
    let mut scored: Vec<NearMatch> = table
        .active()
        .map(|s| NearMatch {
            scientific_name: s.scientific_name.clone(),
            score: if token.is_empty() {
                0.0
            } else {
                fuzzy_score(s, token)
            },
        })
        .collect();
    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.scientific_name.cmp(&b.scientific_name))
    });
    scored.truncate(5);
    MatchOutcome {
        species: None,
        match_type: MatchType::None,
        confidence: 0.0,
        matched_field: None,
        near_matches: scored,
    }
}
