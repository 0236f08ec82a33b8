//! Error types for receipt extraction

use crate::extractor::Extraction;
use expense_core::FieldName;
use thiserror::Error;

/// Result type for extraction operations
pub type Result<T> = std::result::Result<T, ExtractionError>;

/// Extraction errors
#[derive(Error, Debug)]
pub enum ExtractionError {
    /// Image unreachable, unreadable or not an image
    #[error("Image load error: {0}")]
    ImageLoad(String),

    /// OCR engine failed or timed out
    #[error("OCR engine error: {0}")]
    OcrEngine(String),

    /// OCR ran but required fields could not be parsed
    #[error("Incomplete extraction, unresolved: {}", format_missing(.missing))]
    Incomplete {
        /// Partial result, to be persisted and completed manually
        extraction: Box<Extraction>,
        /// Required fields left unresolved
        missing: Vec<FieldName>,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ExtractionError {
    /// Partial results are a soft condition; everything else is infrastructure
    pub fn is_soft(&self) -> bool {
        matches!(self, ExtractionError::Incomplete { .. })
    }
}

fn format_missing(missing: &[FieldName]) -> String {
    missing
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl From<std::io::Error> for ExtractionError {
    fn from(err: std::io::Error) -> Self {
        ExtractionError::ImageLoad(err.to_string())
    }
}
