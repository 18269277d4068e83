use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Machine-readable error taxonomy surfaced in reports and result documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    InvalidInput,
    CrsUndetectable,
    CrsMismatch,
    SpeciesUnknown,
    GirthAmbiguous,
    CoordsSwapped,
    RangeFatal,
    DbTransient,
    DbFatal,
    NoOverlap,
    NoTrees,
    TimedOut,
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::InvalidInput => "INVALID_INPUT",
            ErrorKind::CrsUndetectable => "CRS_UNDETECTABLE",
            ErrorKind::CrsMismatch => "CRS_MISMATCH",
            ErrorKind::SpeciesUnknown => "SPECIES_UNKNOWN",
            ErrorKind::GirthAmbiguous => "GIRTH_AMBIGUOUS",
            ErrorKind::CoordsSwapped => "COORDS_SWAPPED",
            ErrorKind::RangeFatal => "RANGE_FATAL",
            ErrorKind::DbTransient => "DB_TRANSIENT",
            ErrorKind::DbFatal => "DB_FATAL",
            ErrorKind::NoOverlap => "NO_OVERLAP",
            ErrorKind::NoTrees => "NO_TREES",
            ErrorKind::TimedOut => "TIMED_OUT",
            ErrorKind::Internal => "INTERNAL",
        };
        write!(f, "{s}")
    }
}

/// Errors raised by the analysis and inventory cores.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("CRS could not be detected: {0}")]
    CrsUndetectable(String),

    #[error("declared CRS disagrees with detection: {0}")]
    CrsMismatch(String),

    #[error("unknown species: {0}")]
    SpeciesUnknown(String),

    #[error("value out of range: {0}")]
    RangeFatal(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("inventory {0} has no trees")]
    NoTrees(uuid::Uuid),

    #[error("deadline expired during {0}")]
    TimedOut(String),

    #[error("transient database error: {0}")]
    DbTransient(#[source] sqlx::Error),

    #[error("database error: {0}")]
    DbFatal(#[source] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// The taxonomy bucket for this error, as written into documents.
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Io(_) | EngineError::Csv(_) | EngineError::Json(_) => {
                ErrorKind::InvalidInput
            }
            EngineError::InvalidInput(_) => ErrorKind::InvalidInput,
            EngineError::Config(_) => ErrorKind::Internal,
            EngineError::CrsUndetectable(_) => ErrorKind::CrsUndetectable,
            EngineError::CrsMismatch(_) => ErrorKind::CrsMismatch,
            EngineError::SpeciesUnknown(_) => ErrorKind::SpeciesUnknown,
            EngineError::RangeFatal(_) => ErrorKind::RangeFatal,
            EngineError::NotFound(_) => ErrorKind::InvalidInput,
            EngineError::NoTrees(_) => ErrorKind::NoTrees,
            EngineError::TimedOut(_) => ErrorKind::TimedOut,
            EngineError::DbTransient(_) => ErrorKind::DbTransient,
            EngineError::DbFatal(_) => ErrorKind::DbFatal,
            EngineError::Internal(_) => ErrorKind::Internal,
        }
    }
}

impl From<sqlx::Error> for EngineError {
    fn from(e: sqlx::Error) -> Self {
        if crate::db::is_transient(&e) {
            EngineError::DbTransient(e)
        } else {
            EngineError::DbFatal(e)
        }
    }
}
