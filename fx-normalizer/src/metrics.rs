//! Rate provider metrics

use prometheus::{register_counter_vec, register_histogram_vec, CounterVec, HistogramVec};

lazy_static::lazy_static! {
    pub static ref RATE_FETCHES_TOTAL: CounterVec = register_counter_vec!(
        "fx_rate_fetches_total",
        "Upstream exchange-rate fetches",
        &["provider", "outcome"]
    )
    .unwrap();

    pub static ref RATE_FETCH_DURATION: HistogramVec = register_histogram_vec!(
        "fx_rate_fetch_duration_seconds",
        "Upstream exchange-rate fetch duration",
        &["provider"]
    )
    .unwrap();
}
