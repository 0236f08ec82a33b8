//! Receipt extraction pipeline

use crate::config::ExtractorConfig;
use crate::error::{ExtractionError, Result};
use crate::matcher::{matcher_for, FieldMatcher};
use crate::metrics::EXTRACTIONS_TOTAL;
use crate::ocr::OcrEngine;
use crate::source::ImageSource;
use expense_core::ExtractedFields;
use reqwest::Client;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Parsed receipt
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Extraction {
    /// Reference to the source image
    pub image_ref: String,
    /// Parsed fields
    pub fields: ExtractedFields,
    /// Raw OCR text, kept for audit
    pub raw_text: String,
}

/// Load → OCR → match
pub struct ReceiptExtractor {
    ocr: Arc<dyn OcrEngine>,
    matcher: Box<dyn FieldMatcher>,
    client: Client,
    config: ExtractorConfig,
}

impl std::fmt::Debug for ReceiptExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReceiptExtractor")
            .field("ocr", &self.ocr.name())
            .field("matcher", &self.matcher.name())
            .finish()
    }
}

impl ReceiptExtractor {
    /// Create with the matcher named by `config.strategy`
    pub fn new(ocr: Arc<dyn OcrEngine>, config: ExtractorConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.fetch_timeout_ms))
            .build()
            .map_err(|e| ExtractionError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            ocr,
            matcher: matcher_for(&config),
            client,
            config,
        })
    }

    /// Swap in a different matcher
    pub fn with_matcher(mut self, matcher: Box<dyn FieldMatcher>) -> Self {
        self.matcher = matcher;
        self
    }

    /// Extract fields from an image
    ///
    /// Returns [`ExtractionError::Incomplete`] (carrying the partial
    /// extraction) when amount, date or vendor is unresolved.
    pub async fn extract(&self, image: &ImageSource) -> Result<Extraction> {
        let loaded = image.load(&self.client, &self.config).await.map_err(|e| {
            EXTRACTIONS_TOTAL.with_label_values(&["image_error"]).inc();
            e
        })?;

        let timeout = Duration::from_millis(self.config.ocr_timeout_ms);
        let recognized = match tokio::time::timeout(timeout, self.ocr.recognize(&loaded)).await {
            Ok(result) => result,
            Err(_) => Err(ExtractionError::OcrEngine(format!(
                "{} timed out after {}ms",
                self.ocr.name(),
                timeout.as_millis()
            ))),
        };
        let raw_text = recognized.map_err(|e| {
            EXTRACTIONS_TOTAL.with_label_values(&["ocr_error"]).inc();
            warn!("OCR failed for {:?} via {}: {}", image, self.ocr.name(), e);
            e
        })?;

        self.parse(image.reference(), raw_text)
    }

    /// Parse already-recognized text
    pub fn parse(&self, image_ref: String, raw_text: String) -> Result<Extraction> {
        let fields = self.matcher.match_fields(&raw_text);
        let missing = fields.missing_required();
        let extraction = Extraction {
            image_ref,
            fields,
            raw_text,
        };

        if missing.is_empty() {
            EXTRACTIONS_TOTAL.with_label_values(&["complete"]).inc();
            info!(
                "Extracted receipt {} with {}",
                extraction.image_ref, self.matcher.name()
            );
            Ok(extraction)
        } else {
            EXTRACTIONS_TOTAL.with_label_values(&["incomplete"]).inc();
            info!(
                "Incomplete extraction for {}: missing {:?}",
                extraction.image_ref, missing
            );
            Err(ExtractionError::Incomplete {
                extraction: Box::new(extraction),
                missing,
            })
        }
    }
}
