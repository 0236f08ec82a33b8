//! Extraction metrics

use prometheus::{register_counter_vec, register_histogram_vec, CounterVec, HistogramVec};

lazy_static::lazy_static! {
    pub static ref EXTRACTIONS_TOTAL: CounterVec = register_counter_vec!(
        "receipt_extractions_total",
        "Receipt extractions by outcome",
        &["outcome"]
    )
    .unwrap();

    pub static ref OCR_DURATION: HistogramVec = register_histogram_vec!(
        "receipt_ocr_duration_seconds",
        "OCR engine call duration",
        &["engine"]
    )
    .unwrap();
}
