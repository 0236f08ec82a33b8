//! Payroll integration
//!
//! Posting is at-least-once. The reimbursement id travels as the external
//! reference on every call so the payroll system can drop duplicates.

use crate::config::PayrollConfig;
use crate::error::{PayrollError, PayrollResult};
use crate::metrics::PAYROLL_POSTS_TOTAL;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;
use expense_core::{
    CurrencyCode, Query, Reimbursement, ReimbursementStatus, Repository, RetryStrategy,
};
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Record sent to the payroll system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayrollPosting {
    /// Employee to credit
    pub employee_id: String,
    /// Amount paid
    pub amount: Decimal,
    /// Currency paid
    pub currency: CurrencyCode,
    /// Date the payout was processed
    pub processed_date: NaiveDate,
    /// Stable external reference (the reimbursement id)
    pub reference_id: Uuid,
}

impl PayrollPosting {
    /// Posting for a Processed reimbursement
    pub fn for_reimbursement(reimbursement: &Reimbursement) -> PayrollResult<Self> {
        if reimbursement.status != ReimbursementStatus::Processed {
            return Err(PayrollError::Precondition(format!(
                "reimbursement {} is {}, expected PROCESSED",
                reimbursement.id, reimbursement.status
            )));
        }
        let processed_at = reimbursement.processed_at.ok_or_else(|| {
            PayrollError::Precondition(format!(
                "reimbursement {} has no processed timestamp",
                reimbursement.id
            ))
        })?;

        Ok(Self {
            employee_id: reimbursement.employee_id.clone(),
            amount: reimbursement.amount,
            currency: reimbursement.currency,
            processed_date: processed_at.date_naive(),
            reference_id: reimbursement.id,
        })
    }
}

/// Payroll acknowledgement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayrollAck {
    /// Payroll-side reference
    pub reference: String,
    /// When payroll recorded the posting
    pub posted_at: DateTime<Utc>,
}

/// External payroll ledger
#[async_trait]
pub trait PayrollSystem: Send + Sync {
    /// System name (for logs)
    fn name(&self) -> &str;

    /// Record a reimbursement payout
    async fn post_reimbursement(&self, posting: &PayrollPosting) -> PayrollResult<PayrollAck>;
}

#[derive(Debug, Deserialize)]
struct AckBody {
    reference: String,
    #[serde(default)]
    posted_at: Option<DateTime<Utc>>,
}

/// JSON payroll API client (`POST {url}/reimbursements`)
///
/// A 409 means the reference was already recorded and counts as an ack.
#[derive(Debug, Clone)]
pub struct HttpPayrollSystem {
    base_url: String,
    api_key: Option<String>,
    timeout_ms: u64,
    client: Client,
}

impl HttpPayrollSystem {
    /// Build from config
    pub fn new(config: &PayrollConfig) -> PayrollResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| PayrollError::Integration(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: config.payroll_url.trim_end_matches('/').to_string(),
            api_key: config.payroll_api_key.clone(),
            timeout_ms: config.timeout_ms,
            client,
        })
    }
}

#[async_trait]
impl PayrollSystem for HttpPayrollSystem {
    fn name(&self) -> &str {
        "http"
    }

    async fn post_reimbursement(&self, posting: &PayrollPosting) -> PayrollResult<PayrollAck> {
        let url = format!("{}/reimbursements", self.base_url);

        let mut request = self.client.post(&url).json(posting);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                PayrollError::Timeout(self.timeout_ms)
            } else {
                PayrollError::Integration(format!("request to {} failed: {}", url, e))
            }
        })?;

        let status = response.status();
        if status == StatusCode::CONFLICT {
            info!(
                "Payroll already holds reference {}, treating as acknowledged",
                posting.reference_id
            );
            return Ok(PayrollAck {
                reference: posting.reference_id.to_string(),
                posted_at: Utc::now(),
            });
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!("Payroll API returned {}: {}", status, text);
            return if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                Err(PayrollError::Integration(format!("status {}", status)))
            } else {
                Err(PayrollError::Rejected(format!("status {}: {}", status, text)))
            };
        }

        let body = response
            .json::<AckBody>()
            .await
            .map_err(|e| PayrollError::Integration(format!("failed to parse ack: {}", e)))?;

        Ok(PayrollAck {
            reference: body.reference,
            posted_at: body.posted_at.unwrap_or_else(Utc::now),
        })
    }
}

/// In-memory payroll ledger that deduplicates by reference id
#[derive(Debug, Default)]
pub struct InMemoryPayroll {
    postings: DashMap<Uuid, (PayrollPosting, PayrollAck)>,
    fail_next: AtomicU32,
    unavailable: AtomicBool,
    calls: AtomicU64,
}

impl InMemoryPayroll {
    /// Empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` calls with a transient error
    pub fn fail_next(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Toggle availability
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Distinct postings recorded
    pub fn posting_count(&self) -> usize {
        self.postings.len()
    }

    /// Posting recorded for a reference
    pub fn posting(&self, reference_id: Uuid) -> Option<PayrollPosting> {
        self.postings.get(&reference_id).map(|p| p.0.clone())
    }

    /// Calls received
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PayrollSystem for InMemoryPayroll {
    fn name(&self) -> &str {
        "in-memory"
    }

    async fn post_reimbursement(&self, posting: &PayrollPosting) -> PayrollResult<PayrollAck> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if self.unavailable.load(Ordering::SeqCst) {
            return Err(PayrollError::Integration("payroll unavailable".to_string()));
        }
        if self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(PayrollError::Integration("transient failure".to_string()));
        }

        let entry = self.postings.entry(posting.reference_id).or_insert_with(|| {
            (
                posting.clone(),
                PayrollAck {
                    reference: format!("PAY-{}", posting.reference_id.simple()),
                    posted_at: Utc::now(),
                },
            )
        });
        Ok(entry.1.clone())
    }
}

/// Forwards Processed reimbursements to payroll
pub struct PayrollAdapter {
    system: Arc<dyn PayrollSystem>,
    repository: Arc<dyn Repository<Reimbursement>>,
    retry: RetryStrategy,
    timeout: Duration,
}

impl std::fmt::Debug for PayrollAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayrollAdapter")
            .field("system", &self.system.name())
            .field("retry", &self.retry)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl PayrollAdapter {
    /// Create an adapter
    pub fn new(
        system: Arc<dyn PayrollSystem>,
        repository: Arc<dyn Repository<Reimbursement>>,
        config: &PayrollConfig,
    ) -> Self {
        Self {
            system,
            repository,
            retry: RetryStrategy::new(config.retry.clone()),
            timeout: Duration::from_millis(config.timeout_ms),
        }
    }

    /// Post a Processed reimbursement and record the acknowledgement
    ///
    /// Already-acknowledged reimbursements return their stored ack without
    /// calling payroll again. A failure leaves the reimbursement Processed.
    pub async fn post_to_payroll(&self, reimbursement_id: Uuid) -> PayrollResult<PayrollAck> {
        let reimbursement = self.repository.get(reimbursement_id).await?;

        if let (Some(reference), Some(posted_at)) = (
            reimbursement.payroll_reference.clone(),
            reimbursement.payroll_posted_at,
        ) {
            PAYROLL_POSTS_TOTAL.with_label_values(&["already_posted"]).inc();
            return Ok(PayrollAck {
                reference,
                posted_at,
            });
        }

        let posting = PayrollPosting::for_reimbursement(&reimbursement)?;
        let timeout = self.timeout;
        let system = Arc::clone(&self.system);

        let result = self
            .retry
            .execute_with_retry(
                || {
                    let system = Arc::clone(&system);
                    let posting = posting.clone();
                    async move {
                        match tokio::time::timeout(timeout, system.post_reimbursement(&posting))
                            .await
                        {
                            Ok(result) => result,
                            Err(_) => Err(PayrollError::Timeout(timeout.as_millis() as u64)),
                        }
                    }
                },
                "post_reimbursement",
            )
            .await;

        let ack = match result {
            Ok(ack) => ack,
            Err(e) => {
                PAYROLL_POSTS_TOTAL.with_label_values(&["failed"]).inc();
                error!(
                    "Payroll posting for reimbursement {} failed, left for reconciliation: {}",
                    reimbursement.id, e
                );
                return Err(e);
            }
        };

        let mut reimbursement = reimbursement;
        reimbursement.payroll_reference = Some(ack.reference.clone());
        reimbursement.payroll_posted_at = Some(ack.posted_at);
        self.repository.save(reimbursement).await?;

        PAYROLL_POSTS_TOTAL.with_label_values(&["posted"]).inc();
        info!(
            "Reimbursement {} posted to payroll as {}",
            reimbursement_id, ack.reference
        );
        Ok(ack)
    }

    /// Processed reimbursements payroll has not acknowledged
    pub async fn unposted(&self) -> PayrollResult<Vec<Reimbursement>> {
        Ok(self.repository.find_by_query(&Query::AwaitingPayroll).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use expense_core::{InMemoryRepository, RetryConfig};
    use rust_decimal_macros::dec;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn processed() -> Reimbursement {
        let expense_id = Uuid::new_v4();
        Reimbursement {
            id: Reimbursement::id_for_expense(expense_id),
            expense_id,
            employee_id: "emp-7".to_string(),
            amount: dec!(120.00),
            currency: CurrencyCode::EUR,
            status: ReimbursementStatus::Processed,
            idempotency_key: Reimbursement::idempotency_key_for(expense_id),
            gateway_transaction_id: Some("ch_1".to_string()),
            failure_reason: None,
            last_error: None,
            attempts: 1,
            submitted_at: Utc::now(),
            approved_at: None,
            processed_at: Some(Utc::now()),
            payroll_reference: None,
            payroll_posted_at: None,
            version: 0,
        }
    }

    fn config() -> PayrollConfig {
        PayrollConfig {
            timeout_ms: 1_000,
            retry: RetryConfig {
                max_attempts: 3,
                initial_delay_ms: 10,
                max_delay_ms: 100,
                backoff_multiplier: 2.0,
                jitter_factor: 0.0,
            },
            ..Default::default()
        }
    }

    async fn setup() -> (
        Arc<InMemoryPayroll>,
        Arc<InMemoryRepository<Reimbursement>>,
        PayrollAdapter,
        Reimbursement,
    ) {
        let payroll = Arc::new(InMemoryPayroll::new());
        let repository = Arc::new(InMemoryRepository::new());
        let adapter = PayrollAdapter::new(payroll.clone(), repository.clone(), &config());
        let stored = repository.save(processed()).await.unwrap();
        (payroll, repository, adapter, stored)
    }

    #[tokio::test(start_paused = true)]
    async fn test_post_retries_transient_failures() {
        let (payroll, repository, adapter, reimbursement) = setup().await;
        payroll.fail_next(2);

        let ack = adapter.post_to_payroll(reimbursement.id).await.unwrap();
        assert_eq!(payroll.calls(), 3);
        assert_eq!(payroll.posting_count(), 1);

        let posting = payroll.posting(reimbursement.id).unwrap();
        assert_eq!(posting.employee_id, "emp-7");
        assert_eq!(posting.amount, dec!(120.00));

        let stored = repository.get(reimbursement.id).await.unwrap();
        assert_eq!(stored.payroll_reference, Some(ack.reference));
        assert!(!stored.awaiting_payroll());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_leaves_processed_for_reconciliation() {
        let (payroll, repository, adapter, reimbursement) = setup().await;
        payroll.set_available(false);

        let err = adapter.post_to_payroll(reimbursement.id).await.unwrap_err();
        assert!(matches!(err, PayrollError::Integration(_)));
        assert_eq!(payroll.calls(), 3);

        let stored = repository.get(reimbursement.id).await.unwrap();
        assert_eq!(stored.status, ReimbursementStatus::Processed);
        assert_eq!(adapter.unposted().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_second_post_uses_stored_ack() {
        let (payroll, _repository, adapter, reimbursement) = setup().await;

        let first = adapter.post_to_payroll(reimbursement.id).await.unwrap();
        let second = adapter.post_to_payroll(reimbursement.id).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(payroll.calls(), 1);
    }

    #[tokio::test]
    async fn test_requires_processed() {
        let payroll = Arc::new(InMemoryPayroll::new());
        let repository = Arc::new(InMemoryRepository::new());
        let adapter = PayrollAdapter::new(payroll.clone(), repository.clone(), &config());

        let mut pending = processed();
        pending.status = ReimbursementStatus::Pending;
        pending.gateway_transaction_id = None;
        let pending = repository.save(pending).await.unwrap();

        let err = adapter.post_to_payroll(pending.id).await.unwrap_err();
        assert!(matches!(err, PayrollError::Precondition(_)));
        assert_eq!(payroll.calls(), 0);
    }

    #[tokio::test]
    async fn test_http_payroll_conflict_is_ack() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/reimbursements"))
            .respond_with(ResponseTemplate::new(409))
            .mount(&server)
            .await;

        let system = HttpPayrollSystem::new(&PayrollConfig {
            payroll_url: server.uri(),
            ..config()
        })
        .unwrap();
        let posting = PayrollPosting::for_reimbursement(&processed()).unwrap();

        let ack = system.post_reimbursement(&posting).await.unwrap();
        assert_eq!(ack.reference, posting.reference_id.to_string());
    }

    #[tokio::test]
    async fn test_http_payroll_error_mapping() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/reimbursements"))
            .respond_with(ResponseTemplate::new(422).set_body_string("bad employee"))
            .mount(&server)
            .await;

        let system = HttpPayrollSystem::new(&PayrollConfig {
            payroll_url: server.uri(),
            ..config()
        })
        .unwrap();
        let posting = PayrollPosting::for_reimbursement(&processed()).unwrap();

        let err = system.post_reimbursement(&posting).await.unwrap_err();
        assert!(matches!(err, PayrollError::Rejected(_)));
    }
}
