//! Policy evaluation metrics

use prometheus::{register_counter_vec, CounterVec};

lazy_static::lazy_static! {
    pub static ref POLICY_EVALUATIONS_TOTAL: CounterVec = register_counter_vec!(
        "policy_evaluations_total",
        "Policy evaluations by outcome",
        &["outcome"]
    )
    .unwrap();
}
