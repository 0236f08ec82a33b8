//! Extractor configuration

use serde::{Deserialize, Serialize};

/// Field matching strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatcherStrategy {
    /// Ordered regular-expression chain
    Regex,
}

/// How to read ambiguous numeric dates such as 03/04/2024
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateOrder {
    /// 03/04/2024 is 4 March
    MonthFirst,
    /// 03/04/2024 is 3 April
    DayFirst,
}

/// Extractor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    /// Matcher strategy
    pub strategy: MatcherStrategy,

    /// Ambiguous date interpretation
    pub date_order: DateOrder,

    /// OCR timeout (milliseconds)
    pub ocr_timeout_ms: u64,

    /// Tesseract binary
    pub tesseract_path: String,

    /// Tesseract language pack
    pub ocr_language: String,

    /// URL download timeout (milliseconds)
    pub fetch_timeout_ms: u64,

    /// Largest accepted image (bytes)
    pub max_image_bytes: usize,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            strategy: MatcherStrategy::Regex,
            date_order: DateOrder::MonthFirst,
            ocr_timeout_ms: 30_000,
            tesseract_path: "tesseract".to_string(),
            ocr_language: "eng".to_string(),
            fetch_timeout_ms: 10_000,
            max_image_bytes: 20 * 1024 * 1024,
        }
    }
}
