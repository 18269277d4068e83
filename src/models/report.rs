use serde::{Deserialize, Serialize};

use crate::crs::{Crs, DetectionConfidence};

/// Severity ladder for validation issues.
///
/// Fatal issues bar processing; warnings allow processing after
/// acknowledgement; info entries record auto-applied corrections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Fatal,
    Warning,
    Info,
}

/// Issue categories recorded in validation reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueKind {
    InvalidInput,
    MissingColumn,
    EmptyRow,
    CrsUndetectable,
    CrsMismatch,
    CrsSelected,
    CoordsSwapped,
    SpeciesUnknown,
    SpeciesCorrected,
    GirthAmbiguous,
    GirthToDiameter,
    RangeFatal,
    RangeSuspect,
    HdRatioSuspect,
    OutsideNepal,
    DuplicateLocation,
    ColumnSwap,
    GridPattern,
}

impl std::fmt::Display for IssueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            IssueKind::InvalidInput => "INVALID_INPUT",
            IssueKind::MissingColumn => "MISSING_COLUMN",
            IssueKind::EmptyRow => "EMPTY_ROW",
            IssueKind::CrsUndetectable => "CRS_UNDETECTABLE",
            IssueKind::CrsMismatch => "CRS_MISMATCH",
            IssueKind::CrsSelected => "CRS_SELECTED",
            IssueKind::CoordsSwapped => "COORDS_SWAPPED",
            IssueKind::SpeciesUnknown => "SPECIES_UNKNOWN",
            IssueKind::SpeciesCorrected => "SPECIES_CORRECTED",
            IssueKind::GirthAmbiguous => "GIRTH_AMBIGUOUS",
            IssueKind::GirthToDiameter => "GIRTH_TO_DIAMETER",
            IssueKind::RangeFatal => "RANGE_FATAL",
            IssueKind::RangeSuspect => "RANGE_SUSPECT",
            IssueKind::HdRatioSuspect => "HD_RATIO_SUSPECT",
            IssueKind::OutsideNepal => "OUTSIDE_NEPAL",
            IssueKind::DuplicateLocation => "DUPLICATE_LOCATION",
            IssueKind::ColumnSwap => "COLUMN_SWAP",
            IssueKind::GridPattern => "GRID_PATTERN",
        };
        write!(f, "{s}")
    }
}

/// A single row- or file-level validation finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowIssue {
    /// 1-based data row; absent for file-level findings.
    pub row_number: Option<u32>,
    pub column: Option<String>,
    pub original: Option<String>,
    pub corrected: Option<String>,
    pub severity: Severity,
    pub kind: IssueKind,
    pub message: String,
    pub confidence: Option<f64>,
}

impl RowIssue {
    pub fn file_level(severity: Severity, kind: IssueKind, message: impl Into<String>) -> Self {
        Self {
            row_number: None,
            column: None,
            original: None,
            corrected: None,
            severity,
            kind,
            message: message.into(),
            confidence: None,
        }
    }

    pub fn for_row(
        row_number: u32,
        column: impl Into<String>,
        severity: Severity,
        kind: IssueKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            row_number: Some(row_number),
            column: Some(column.into()),
            original: None,
            corrected: None,
            severity,
            kind,
            message: message.into(),
            confidence: None,
        }
    }

    pub fn with_values(
        mut self,
        original: impl Into<String>,
        corrected: Option<String>,
    ) -> Self {
        self.original = Some(original.into());
        self.corrected = corrected;
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }
}

/// Which input column was mapped to each required or optional role.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnRoles {
    pub species: Option<String>,
    pub diameter: Option<String>,
    pub x: Option<String>,
    pub y: Option<String>,
    pub height: Option<String>,
    pub class: Option<String>,
}

/// CRS section of the report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrsSummary {
    pub detected: Option<Crs>,
    pub confidence: Option<DetectionConfidence>,
    pub swapped: bool,
    pub user_override: Option<Crs>,
    /// Metric CRS chosen for grid and distance work.
    pub metric_crs: Option<Crs>,
}

/// Diameter-vs-girth section of the report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiameterSummary {
    pub is_girth: bool,
    pub confidence: DetectionConfidence,
    pub requires_confirmation: bool,
}

/// Structured outcome of inventory validation.
///
/// Recomputing the report on the same input yields a byte-identical
/// document; every list preserves input row order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub columns: ColumnRoles,
    pub crs: CrsSummary,
    pub diameter: Option<DiameterSummary>,
    pub row_count: u32,
    pub errors: Vec<RowIssue>,
    pub warnings: Vec<RowIssue>,
    pub info: Vec<RowIssue>,
    pub ready_for_processing: bool,
}

impl ValidationReport {
    pub fn push(&mut self, issue: RowIssue) {
        match issue.severity {
            Severity::Fatal => self.errors.push(issue),
            Severity::Warning => self.warnings.push(issue),
            Severity::Info => self.info.push(issue),
        }
    }

    /// Recompute the processing gate from the accumulated issues.
    pub fn finalise(&mut self) {
        self.ready_for_processing = self.errors.is_empty();
    }
}

impl Default for ValidationReport {
    fn default() -> Self {
        Self {
            columns: ColumnRoles::default(),
            crs: CrsSummary {
                detected: None,
                confidence: None,
                swapped: false,
                user_override: None,
                metric_crs: None,
            },
            diameter: None,
            row_count: 0,
            errors: Vec::new(),
            warnings: Vec::new(),
            info: Vec::new(),
            ready_for_processing: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_routes_by_severity() {
        let mut report = ValidationReport::default();
        report.push(RowIssue::file_level(
            Severity::Fatal,
            IssueKind::MissingColumn,
            "no species column",
        ));
        report.push(RowIssue::for_row(
            3,
            "height_m",
            Severity::Warning,
            IssueKind::HdRatioSuspect,
            "ratio 20 below 30",
        ));
        report.push(RowIssue::file_level(
            Severity::Info,
            IssueKind::GridPattern,
            "points form a regular grid",
        ));
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.info.len(), 1);
    }

    #[test]
    fn test_finalise_gate() {
        let mut report = ValidationReport::default();
        report.finalise();
        assert!(report.ready_for_processing);
        report.push(RowIssue::file_level(
            Severity::Fatal,
            IssueKind::CrsUndetectable,
            "no recognisable coordinates",
        ));
        report.finalise();
        assert!(!report.ready_for_processing);
    }

    #[test]
    fn test_report_serialisation_is_stable() {
        let mut report = ValidationReport::default();
        report.push(
            RowIssue::for_row(
                2,
                "dia_cm",
                Severity::Info,
                IssueKind::GirthToDiameter,
                "converted",
            )
            .with_values("94.2", Some("30.0".into()))
            .with_confidence(1.0),
        );
        report.finalise();
        let a = serde_json::to_string(&report).unwrap();
        let b = serde_json::to_string(&report).unwrap();
        assert_eq!(a, b);
        assert!(a.contains("GIRTH_TO_DIAMETER"));
    }
}
