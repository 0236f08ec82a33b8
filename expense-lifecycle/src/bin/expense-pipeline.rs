//! Command-line harness for the receipt pipeline
//!
//! ```text
//! expense-pipeline scan <image-path> [base-currency]
//! ```
//!
//! Runs OCR extraction and currency normalization for one receipt image and
//! prints the result as JSON. Configuration comes from `EXPENSE_CONFIG` and
//! `EXPENSE_*` variables.

use anyhow::{bail, Context};
use expense_core::{CurrencyCode, FieldName};
use expense_lifecycle::PipelineConfig;
use fx_normalizer::{CurrencyNormalizer, HttpRateProvider, NormalizedAmount, RateCache};
use receipt_extractor::{Extraction, ExtractionError, ImageSource, ReceiptExtractor, TesseractEngine};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

const USAGE: &str = "usage: expense-pipeline scan <image-path> [base-currency]";

#[derive(Debug, Serialize)]
struct ScanReport {
    extraction: Extraction,
    missing: Vec<FieldName>,
    normalized: Option<NormalizedAmount>,
    normalization_error: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("scan") => {
            let path = args.get(1).context(USAGE)?;
            let base = args
                .get(2)
                .map(|code| CurrencyCode::new(code))
                .transpose()
                .context("invalid base currency")?;
            scan(path, base).await
        }
        Some(other) => bail!("unknown command '{}'\n{}", other, USAGE),
        None => bail!(USAGE),
    }
}

async fn scan(path: &str, base: Option<CurrencyCode>) -> anyhow::Result<()> {
    let mut config = PipelineConfig::from_env()?;
    if let Some(base) = base {
        config.fx.base_currency = base;
    }

    info!("Scanning {} (base currency {})", path, config.fx.base_currency);

    let ocr = Arc::new(TesseractEngine::new(&config.extractor));
    let extractor = ReceiptExtractor::new(ocr, config.extractor.clone())?;

    let (extraction, missing) = match extractor.extract(&ImageSource::path(path)).await {
        Ok(extraction) => (extraction, Vec::new()),
        Err(ExtractionError::Incomplete {
            extraction,
            missing,
        }) => (*extraction, missing),
        Err(e) => return Err(e).context("receipt extraction failed"),
    };

    let mut report = ScanReport {
        extraction,
        missing,
        normalized: None,
        normalization_error: None,
    };

    let fields = &report.extraction.fields;
    match (fields.amount.value().copied(), fields.currency.value().copied()) {
        (Some(amount), Some(currency)) => {
            let provider = Arc::new(HttpRateProvider::new(&config.fx)?);
            let cache = Arc::new(RateCache::new(provider, &config.fx));
            let normalizer = CurrencyNormalizer::new(cache, config.fx.base_currency);

            match normalizer.normalize(amount, currency, None).await {
                Ok(normalized) => report.normalized = Some(normalized),
                Err(e) => {
                    warn!("Normalization failed: {}", e);
                    report.normalization_error = Some(e.to_string());
                }
            }
        }
        _ => warn!("Amount or currency unresolved; skipping normalization"),
    }

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
