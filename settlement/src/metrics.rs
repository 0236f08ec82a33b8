//! Settlement and payroll metrics

use prometheus::{register_counter_vec, register_histogram_vec, CounterVec, HistogramVec};

lazy_static::lazy_static! {
    pub static ref SETTLEMENT_ATTEMPTS_TOTAL: CounterVec = register_counter_vec!(
        "settlement_attempts_total",
        "Settlement attempts by outcome",
        &["outcome"]
    )
    .unwrap();

    pub static ref GATEWAY_CALL_DURATION: HistogramVec = register_histogram_vec!(
        "settlement_gateway_call_duration_seconds",
        "Payment gateway call duration",
        &["gateway", "operation"]
    )
    .unwrap();

    pub static ref PAYROLL_POSTS_TOTAL: CounterVec = register_counter_vec!(
        "settlement_payroll_posts_total",
        "Payroll postings by outcome",
        &["outcome"]
    )
    .unwrap();
}
