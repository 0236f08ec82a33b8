//! Receipt Extractor
//!
//! Turns a receipt image into structured fields.
//!
//! 1. [`ImageSource`] loads bytes from a path, URL or in-memory blob and
//!    checks the image signature
//! 2. An [`OcrEngine`] produces raw text
//! 3. A [`FieldMatcher`] parses amount, currency, date, vendor and category,
//!    each independently optional
//!
//! Missing amount, date or vendor yields [`ExtractionError::Incomplete`],
//! which carries whatever was parsed so the caller can route to manual entry.

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod category;
pub mod config;
pub mod error;
pub mod extractor;
pub mod matcher;
pub mod metrics;
pub mod ocr;
pub mod source;

// Re-exports
pub use config::{DateOrder, ExtractorConfig, MatcherStrategy};
pub use error::{ExtractionError, Result};
pub use extractor::{Extraction, ReceiptExtractor};
pub use matcher::{FieldMatcher, RegexFieldMatcher};
pub use ocr::{OcrEngine, StaticOcrEngine, TesseractEngine};
pub use source::{ImageFormat, ImageSource, LoadedImage};
