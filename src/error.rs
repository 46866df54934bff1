// Error taxonomy for the ingestion and categorization pipeline

use thiserror::Error;

// ============================================================================
// INGESTION
// ============================================================================

/// Failures raised while reading and normalizing bank export files.
///
/// Row-level variants (`BadAmount`, `BadDate`) drop a single row; every other
/// variant aborts the file it was raised for. Neither ever aborts a whole run.
#[derive(Debug, Error)]
pub enum IngestionError {
    #[error("{file}: no supported text encoding could read the header row")]
    UnreadableEncoding { file: String },

    #[error("{file} line {line}: cannot parse amount `{value}`")]
    BadAmount {
        file: String,
        line: usize,
        value: String,
    },

    #[error("{file} line {line}: cannot parse date `{value}`")]
    BadDate {
        file: String,
        line: usize,
        value: String,
    },

    #[error("{file}: unrecognized bank format ({reason})")]
    UnknownBankFormat { file: String, reason: String },

    #[error("{file}: {source}")]
    Io {
        file: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{file}: malformed delimited text: {source}")]
    Csv {
        file: String,
        #[source]
        source: csv::Error,
    },

    #[error("{file}: spreadsheet error: {message}")]
    Spreadsheet { file: String, message: String },
}

impl IngestionError {
    /// True when the error only disqualifies one row, not the whole file.
    pub fn is_row_level(&self) -> bool {
        matches!(
            self,
            IngestionError::BadAmount { .. } | IngestionError::BadDate { .. }
        )
    }
}

// ============================================================================
// TRAINING / PREDICTION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TrainingError {
    #[error("insufficient labeled samples: {found} found, at least {required} required")]
    InsufficientSamples { found: usize, required: usize },

    #[error("imbalanced labels: {reason}")]
    ImbalancedLabels { reason: String },

    #[error("label `{label}` is not part of the category taxonomy")]
    UnknownLabel { label: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PredictionError {
    #[error("no trained model is available")]
    ModelNotTrained,
}

// ============================================================================
// PERSISTENCE / CONFIG
// ============================================================================

#[derive(Debug, Error)]
pub enum ModelStoreError {
    #[error("model store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("model blob could not be (de)serialized: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("model database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("stored model must be retrained: {reason}")]
    Incompatible { reason: String },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid category taxonomy: {0}")]
    InvalidTaxonomy(String),

    #[error("invalid ml_config: {0}")]
    InvalidMlConfig(String),
}
