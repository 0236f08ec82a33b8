//! Reimbursement settlement

use crate::config::SettlementConfig;
use crate::error::{Result, SettlementError};
use crate::gateway::{ChargeRequest, ChargeResponse, ChargeStatus, PaymentGateway};
use crate::metrics::{GATEWAY_CALL_DURATION, SETTLEMENT_ATTEMPTS_TOTAL};
use dashmap::DashMap;
use expense_core::{Reimbursement, ReimbursementStatus, Repository};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Result of a `settle` call that reached the gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementOutcome {
    /// Whether the reimbursement is now Processed
    pub success: bool,
    /// Gateway transaction id (also set when still awaiting confirmation)
    pub transaction_id: Option<String>,
    /// Stored reimbursement after the attempt
    pub reimbursement: Reimbursement,
}

/// Marks a reimbursement as being settled in this process
struct InFlight<'a> {
    map: &'a DashMap<Uuid, ()>,
    id: Uuid,
}

impl<'a> InFlight<'a> {
    fn acquire(map: &'a DashMap<Uuid, ()>, id: Uuid) -> Option<Self> {
        match map.entry(id) {
            dashmap::mapref::entry::Entry::Occupied(_) => None,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(());
                Some(Self { map, id })
            }
        }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.map.remove(&self.id);
    }
}

/// Executes payouts against a payment gateway
pub struct SettlementProcessor {
    gateway: Arc<dyn PaymentGateway>,
    repository: Arc<dyn Repository<Reimbursement>>,
    config: SettlementConfig,
    in_flight: DashMap<Uuid, ()>,
}

impl std::fmt::Debug for SettlementProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettlementProcessor")
            .field("gateway", &self.gateway.name())
            .field("config", &self.config)
            .field("in_flight", &self.in_flight.len())
            .finish()
    }
}

impl SettlementProcessor {
    /// Create a processor
    pub fn new(
        gateway: Arc<dyn PaymentGateway>,
        repository: Arc<dyn Repository<Reimbursement>>,
        config: SettlementConfig,
    ) -> Self {
        Self {
            gateway,
            repository,
            config,
            in_flight: DashMap::new(),
        }
    }

    /// Pay out a Pending reimbursement
    ///
    /// Every attempt presents the reimbursement's idempotency key, so calling
    /// this again after a timeout returns the charge the gateway already
    /// accepted instead of creating a second one.
    ///
    /// - `succeeded` → Processed with the gateway transaction id
    /// - `requires_action` → polled; still unresolved stays Pending
    /// - `failed` → Failed with the decline reason, returned as `ChargeFailed`
    /// - timeout or transport error → stays Pending, error returned
    pub async fn settle(&self, reimbursement_id: Uuid) -> Result<SettlementOutcome> {
        let _guard = InFlight::acquire(&self.in_flight, reimbursement_id).ok_or_else(|| {
            SETTLEMENT_ATTEMPTS_TOTAL
                .with_label_values(&["refused"])
                .inc();
            SettlementError::Precondition(format!(
                "settlement of reimbursement {} already in progress",
                reimbursement_id
            ))
        })?;

        let mut reimbursement = self.repository.get(reimbursement_id).await?;
        if let Err(e) = check_settleable(&reimbursement) {
            SETTLEMENT_ATTEMPTS_TOTAL
                .with_label_values(&["refused"])
                .inc();
            return Err(e);
        }

        reimbursement.attempts += 1;
        let mut reimbursement = self.repository.save(reimbursement).await?;

        info!(
            "Settling reimbursement {} ({} {}) attempt {} with key {}",
            reimbursement.id,
            reimbursement.amount,
            reimbursement.currency,
            reimbursement.attempts,
            reimbursement.idempotency_key
        );

        let request = ChargeRequest::for_reimbursement(&reimbursement);
        let charge = match self
            .timed("create_charge", self.gateway.create_charge(&request))
            .await
        {
            Ok(charge) => charge,
            Err(e) => {
                warn!(
                    "Charge for reimbursement {} has unknown outcome: {}",
                    reimbursement.id, e
                );
                SETTLEMENT_ATTEMPTS_TOTAL
                    .with_label_values(&["unknown"])
                    .inc();
                reimbursement.last_error = Some(e.to_string());
                self.repository.save(reimbursement).await?;
                return Err(e);
            }
        };

        let status = match charge.status {
            ChargeStatus::RequiresAction => self.poll_confirmation(&charge).await,
            other => other,
        };

        match status {
            ChargeStatus::Succeeded => {
                reimbursement.mark_processed(charge.transaction_id.clone())?;
                let stored = self.repository.save(reimbursement).await?;
                SETTLEMENT_ATTEMPTS_TOTAL
                    .with_label_values(&["processed"])
                    .inc();
                info!(
                    "Reimbursement {} processed: transaction {}",
                    stored.id, charge.transaction_id
                );
                Ok(SettlementOutcome {
                    success: true,
                    transaction_id: Some(charge.transaction_id),
                    reimbursement: stored,
                })
            }
            ChargeStatus::RequiresAction => {
                reimbursement.last_error = Some(format!(
                    "charge {} still requires action",
                    charge.transaction_id
                ));
                let stored = self.repository.save(reimbursement).await?;
                SETTLEMENT_ATTEMPTS_TOTAL
                    .with_label_values(&["pending"])
                    .inc();
                warn!(
                    "Reimbursement {} left Pending: charge {} unresolved after {} polls",
                    stored.id, charge.transaction_id, self.config.confirm_max_polls
                );
                Ok(SettlementOutcome {
                    success: false,
                    transaction_id: Some(charge.transaction_id),
                    reimbursement: stored,
                })
            }
            ChargeStatus::Failed => {
                let reason = charge
                    .failure_reason
                    .unwrap_or_else(|| "declined by gateway".to_string());
                reimbursement.mark_failed(reason.clone())?;
                let stored = self.repository.save(reimbursement).await?;
                SETTLEMENT_ATTEMPTS_TOTAL
                    .with_label_values(&["failed"])
                    .inc();
                error!("Reimbursement {} failed: {}", stored.id, reason);
                Err(SettlementError::ChargeFailed {
                    reimbursement_id: stored.id,
                    reason,
                })
            }
        }
    }

    async fn poll_confirmation(&self, charge: &ChargeResponse) -> ChargeStatus {
        let interval = Duration::from_millis(self.config.confirm_poll_interval_ms);

        for poll in 1..=self.config.confirm_max_polls {
            tokio::time::sleep(interval).await;
            match self
                .timed(
                    "confirm_charge",
                    self.gateway.confirm_charge(&charge.transaction_id),
                )
                .await
            {
                Ok(ChargeStatus::RequiresAction) => {
                    info!(
                        "Charge {} still requires action (poll {}/{})",
                        charge.transaction_id, poll, self.config.confirm_max_polls
                    );
                }
                Ok(status) => return status,
                Err(e) => {
                    warn!(
                        "Confirming charge {} failed (poll {}/{}): {}",
                        charge.transaction_id, poll, self.config.confirm_max_polls, e
                    );
                }
            }
        }

        ChargeStatus::RequiresAction
    }

    async fn timed<T>(
        &self,
        operation: &str,
        call: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        let timeout_ms = self.config.gateway_timeout_ms;
        let timer = GATEWAY_CALL_DURATION
            .with_label_values(&[self.gateway.name(), operation])
            .start_timer();
        let result = match tokio::time::timeout(Duration::from_millis(timeout_ms), call).await {
            Ok(result) => result,
            Err(_) => Err(SettlementError::GatewayTimeout(timeout_ms)),
        };
        timer.observe_duration();
        result
    }
}

fn check_settleable(reimbursement: &Reimbursement) -> Result<()> {
    if reimbursement.status != ReimbursementStatus::Pending {
        return Err(SettlementError::Precondition(format!(
            "reimbursement {} is {}, expected PENDING",
            reimbursement.id, reimbursement.status
        )));
    }
    if reimbursement.idempotency_key.trim().is_empty() {
        return Err(SettlementError::Precondition(format!(
            "reimbursement {} has no idempotency key",
            reimbursement.id
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::MockPaymentGateway;
    use chrono::Utc;
    use expense_core::{
        ApprovalRecord, ApprovalTier, CurrencyCode, Expense, ExpenseDraft, ExpenseStatus,
        InMemoryRepository, Money,
    };
    use rust_decimal_macros::dec;

    fn approved_expense() -> Expense {
        let mut expense = Expense::new_draft(ExpenseDraft {
            submitter_id: "emp-42".to_string(),
            ..Default::default()
        });
        expense.status = ExpenseStatus::Approved;
        expense.approval = Some(ApprovalRecord {
            approver_id: "mgr-1".to_string(),
            tier: ApprovalTier::Standard,
            approved_at: Utc::now(),
        });
        expense
    }

    struct Harness {
        gateway: Arc<MockPaymentGateway>,
        repository: Arc<InMemoryRepository<Reimbursement>>,
        processor: Arc<SettlementProcessor>,
    }

    async fn harness() -> (Harness, Reimbursement) {
        let gateway = Arc::new(MockPaymentGateway::new());
        let repository = Arc::new(InMemoryRepository::new());
        let processor = Arc::new(SettlementProcessor::new(
            gateway.clone(),
            repository.clone(),
            SettlementConfig {
                gateway_timeout_ms: 1_000,
                confirm_poll_interval_ms: 100,
                confirm_max_polls: 3,
                ..Default::default()
            },
        ));

        let reimbursement = Reimbursement::for_expense(
            &approved_expense(),
            Money::new(dec!(500.00), CurrencyCode::USD),
        )
        .unwrap();
        let reimbursement = repository.save(reimbursement).await.unwrap();

        (
            Harness {
                gateway,
                repository,
                processor,
            },
            reimbursement,
        )
    }

    #[tokio::test]
    async fn test_settle_success() {
        let (h, reimbursement) = harness().await;

        let outcome = h.processor.settle(reimbursement.id).await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.reimbursement.status, ReimbursementStatus::Processed);
        assert_eq!(
            outcome.reimbursement.gateway_transaction_id,
            outcome.transaction_id
        );
        assert_eq!(outcome.reimbursement.attempts, 1);
        assert!(outcome.reimbursement.processed_at.is_some());
    }

    #[tokio::test]
    async fn test_settle_twice_is_refused() {
        let (h, reimbursement) = harness().await;
        h.processor.settle(reimbursement.id).await.unwrap();

        let second = h.processor.settle(reimbursement.id).await.unwrap_err();
        assert!(second.is_precondition());
        assert_eq!(h.gateway.create_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_lost_response_reuses_charge() {
        let (h, reimbursement) = harness().await;
        h.gateway.hang_after_accept(1);

        let first = h.processor.settle(reimbursement.id).await.unwrap_err();
        assert!(matches!(first, SettlementError::GatewayTimeout(1_000)));
        assert!(first.is_outcome_unknown());

        let pending = h.repository.get(reimbursement.id).await.unwrap();
        assert_eq!(pending.status, ReimbursementStatus::Pending);
        assert!(pending.gateway_transaction_id.is_none());
        assert!(pending.last_error.is_some());

        let second = h.processor.settle(reimbursement.id).await.unwrap();
        assert!(second.success);
        assert_eq!(second.reimbursement.attempts, 2);
        assert_eq!(h.gateway.charge_count(), 1);
        assert_eq!(h.gateway.create_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_settle_refused_while_in_flight() {
        let (h, reimbursement) = harness().await;
        h.gateway.hang_after_accept(1);

        let id = reimbursement.id;
        let first = {
            let processor = h.processor.clone();
            tokio::spawn(async move { processor.settle(id).await })
        };
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        let second = h.processor.settle(reimbursement.id).await.unwrap_err();
        assert!(matches!(second, SettlementError::Precondition(_)));

        assert!(first.await.unwrap().is_err());
        assert_eq!(h.gateway.charge_count(), 1);
    }

    #[tokio::test]
    async fn test_declined_charge_marks_failed() {
        let (h, reimbursement) = harness().await;
        h.gateway.set_outcome(ChargeStatus::Failed);

        let err = h.processor.settle(reimbursement.id).await.unwrap_err();
        assert!(matches!(err, SettlementError::ChargeFailed { .. }));

        let stored = h.repository.get(reimbursement.id).await.unwrap();
        assert_eq!(stored.status, ReimbursementStatus::Failed);
        assert_eq!(stored.failure_reason.as_deref(), Some("card_declined"));
        assert!(stored.gateway_transaction_id.is_none());

        assert!(h
            .processor
            .settle(reimbursement.id)
            .await
            .unwrap_err()
            .is_precondition());
    }

    #[tokio::test(start_paused = true)]
    async fn test_requires_action_polls_until_resolved() {
        let (h, reimbursement) = harness().await;
        h.gateway.set_outcome(ChargeStatus::RequiresAction);

        let outcome = h.processor.settle(reimbursement.id).await.unwrap();
        assert!(outcome.success);
        assert_eq!(h.gateway.confirm_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unresolved_charge_stays_pending() {
        let (h, reimbursement) = harness().await;
        h.gateway.set_outcome(ChargeStatus::RequiresAction);
        h.gateway.set_confirm_outcome(ChargeStatus::RequiresAction);

        let outcome = h.processor.settle(reimbursement.id).await.unwrap();
        assert!(!outcome.success);
        assert!(outcome.transaction_id.is_some());
        assert_eq!(outcome.reimbursement.status, ReimbursementStatus::Pending);
        assert!(outcome.reimbursement.gateway_transaction_id.is_none());
        assert_eq!(h.gateway.confirm_calls(), 3);

        h.gateway.set_confirm_outcome(ChargeStatus::Succeeded);
        let retried = h.processor.settle(reimbursement.id).await.unwrap();
        assert!(retried.success);
        assert_eq!(retried.transaction_id, outcome.transaction_id);
    }

    #[tokio::test]
    async fn test_unavailable_gateway_keeps_pending() {
        let (h, reimbursement) = harness().await;
        h.gateway.set_available(false);

        let err = h.processor.settle(reimbursement.id).await.unwrap_err();
        assert!(matches!(err, SettlementError::Gateway(_)));
        assert_eq!(
            h.repository.get(reimbursement.id).await.unwrap().status,
            ReimbursementStatus::Pending
        );
        assert_eq!(h.gateway.charge_count(), 0);
    }
}
