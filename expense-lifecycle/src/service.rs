//! Expense service
//!
//! Owns the expense state machine and the inbound operations of the
//! pipeline. Every transition is load → guard → mutate → compare-and-set
//! save, so work that finished against a stale copy (for example a
//! validation racing a reject) fails with `Conflict` instead of landing on a
//! record that moved on.

use crate::approval::{ApprovalRequest, ApprovalSink};
use crate::config::PipelineConfig;
use crate::error::{LifecycleError, Result};
use chrono::Utc;
use expense_core::{
    ApprovalRecord, ApprovalTier, Error as CoreError, Expense, ExpenseDraft, ExpenseStatus,
    ExpenseUpdate, ExtractedFields, InMemoryRepository, PolicyOverride, Query, Receipt,
    Reimbursement, ReimbursementStatus, Rejection, Repository, VerdictOutcome,
};
use fx_normalizer::{CurrencyNormalizer, ExchangeRateProvider, RateCache};
use policy_engine::{HardFailOutcome, NormalizedExpense, PolicyConfig, PolicyEngine};
use receipt_extractor::{ExtractionError, ImageSource, OcrEngine, ReceiptExtractor};
use serde::Serialize;
use settlement::{
    PaymentGateway, PayrollAck, PayrollAdapter, PayrollSystem, SettlementProcessor,
};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

const POLICY_ENGINE_ACTOR: &str = "policy-engine";

/// Storage for the three record kinds
#[derive(Clone)]
pub struct Repositories {
    /// Expenses
    pub expenses: Arc<dyn Repository<Expense>>,
    /// Receipts
    pub receipts: Arc<dyn Repository<Receipt>>,
    /// Reimbursements (shared with settlement and payroll)
    pub reimbursements: Arc<dyn Repository<Reimbursement>>,
}

impl std::fmt::Debug for Repositories {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repositories").finish_non_exhaustive()
    }
}

impl Repositories {
    /// Fresh in-memory repositories
    pub fn in_memory() -> Self {
        Self {
            expenses: Arc::new(InMemoryRepository::<Expense>::new()),
            receipts: Arc::new(InMemoryRepository::<Receipt>::new()),
            reimbursements: Arc::new(InMemoryRepository::<Reimbursement>::new()),
        }
    }
}

/// Outbound collaborators
#[derive(Clone)]
pub struct Boundaries {
    /// OCR engine
    pub ocr: Arc<dyn OcrEngine>,
    /// Exchange-rate API
    pub rates: Arc<dyn ExchangeRateProvider>,
    /// Payment gateway
    pub gateway: Arc<dyn PaymentGateway>,
    /// Payroll ledger
    pub payroll: Arc<dyn PayrollSystem>,
    /// Approval collaborator
    pub approvals: Arc<dyn ApprovalSink>,
}

impl std::fmt::Debug for Boundaries {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Boundaries")
            .field("ocr", &self.ocr.name())
            .field("rates", &self.rates.name())
            .field("gateway", &self.gateway.name())
            .field("payroll", &self.payroll.name())
            .finish_non_exhaustive()
    }
}

/// Pipeline stages, constructed once and injected
#[derive(Debug, Clone)]
pub struct Stages {
    /// Receipt extraction
    pub extractor: Arc<ReceiptExtractor>,
    /// Currency normalization
    pub normalizer: Arc<CurrencyNormalizer>,
    /// Policy evaluation
    pub policy: Arc<PolicyEngine>,
    /// Gateway payout
    pub settlement: Arc<SettlementProcessor>,
    /// Payroll posting
    pub payroll: Arc<PayrollAdapter>,
}

/// Payroll leg of a processed reimbursement
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PayrollStatus {
    /// Payroll acknowledged the posting
    Posted(PayrollAck),
    /// Posting failed; the payout stands and needs reconciliation
    Failed {
        /// Failure reported by payroll
        reason: String,
    },
    /// Payout not complete, payroll not contacted
    NotAttempted,
}

/// Result of `process_reimbursement`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessingOutcome {
    /// Stored reimbursement after all steps
    pub reimbursement: Reimbursement,
    /// Gateway transaction id, if the gateway issued one
    pub transaction_id: Option<String>,
    /// Source expense, present once it is Processed
    pub expense: Option<Expense>,
    /// Payroll result
    pub payroll: PayrollStatus,
}

impl ProcessingOutcome {
    /// Money moved and the expense is Processed
    pub fn is_paid(&self) -> bool {
        self.reimbursement.status == ReimbursementStatus::Processed && self.expense.is_some()
    }
}

/// Expense lifecycle operations
pub struct ExpenseService {
    repositories: Repositories,
    stages: Stages,
    approvals: Arc<dyn ApprovalSink>,
    config: PolicyConfig,
}

impl std::fmt::Debug for ExpenseService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpenseService")
            .field("stages", &self.stages)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ExpenseService {
    /// Create a service from constructed stages
    ///
    /// `stages.settlement` and `stages.payroll` must share
    /// `repositories.reimbursements`.
    pub fn new(
        repositories: Repositories,
        stages: Stages,
        approvals: Arc<dyn ApprovalSink>,
        config: PolicyConfig,
    ) -> Self {
        Self {
            repositories,
            stages,
            approvals,
            config,
        }
    }

    /// Wire every stage from configuration
    pub fn from_config(
        config: &PipelineConfig,
        repositories: Repositories,
        boundaries: Boundaries,
    ) -> Result<Self> {
        let book = config.policy_book()?;
        let cache = Arc::new(RateCache::new(boundaries.rates, &config.fx));
        let stages = Stages {
            extractor: Arc::new(ReceiptExtractor::new(
                boundaries.ocr,
                config.extractor.clone(),
            )?),
            normalizer: Arc::new(CurrencyNormalizer::new(cache, config.fx.base_currency)),
            policy: Arc::new(PolicyEngine::new(book)),
            settlement: Arc::new(SettlementProcessor::new(
                boundaries.gateway,
                repositories.reimbursements.clone(),
                config.settlement.clone(),
            )),
            payroll: Arc::new(PayrollAdapter::new(
                boundaries.payroll,
                repositories.reimbursements.clone(),
                &config.payroll,
            )),
        };

        info!(
            "Expense service ready: base currency {}, {} policies",
            config.fx.base_currency,
            stages.policy.book().policies().len()
        );

        Ok(Self::new(
            repositories,
            stages,
            boundaries.approvals,
            config.policy.clone(),
        ))
    }

    /// Pipeline stages
    pub fn stages(&self) -> &Stages {
        &self.stages
    }

    // ===== Reads =====

    /// Load an expense
    pub async fn get_expense(&self, id: Uuid) -> Result<Expense> {
        Ok(self.repositories.expenses.get(id).await?)
    }

    /// Expenses in a status
    pub async fn expenses_in_status(&self, status: ExpenseStatus) -> Result<Vec<Expense>> {
        Ok(self
            .repositories
            .expenses
            .find_by_query(&Query::ByExpenseStatus(status))
            .await?)
    }

    /// Receipts stored for an expense
    pub async fn receipts_for(&self, expense_id: Uuid) -> Result<Vec<Receipt>> {
        Ok(self
            .repositories
            .receipts
            .find_by_query(&Query::ByExpense(expense_id))
            .await?)
    }

    /// Load a reimbursement
    pub async fn get_reimbursement(&self, id: Uuid) -> Result<Reimbursement> {
        Ok(self.repositories.reimbursements.get(id).await?)
    }

    /// Processed reimbursements payroll has not acknowledged
    pub async fn unposted_reimbursements(&self) -> Result<Vec<Reimbursement>> {
        Ok(self.stages.payroll.unposted().await?)
    }

    // ===== Draft editing =====

    /// Create a Draft expense; no validation is performed
    pub async fn create_expense(&self, draft: ExpenseDraft) -> Result<Expense> {
        let expense = self
            .repositories
            .expenses
            .save(Expense::new_draft(draft))
            .await?;
        info!(
            "Created expense {} for submitter {}",
            expense.id, expense.submitter_id
        );
        Ok(expense)
    }

    /// Edit a Draft or Validated expense
    ///
    /// A Validated expense returns to Draft and must be validated again.
    pub async fn update_expense(&self, id: Uuid, update: ExpenseUpdate) -> Result<Expense> {
        let mut expense = self.repositories.expenses.get(id).await?;
        expense.require_status(&[ExpenseStatus::Draft, ExpenseStatus::Validated], "update")?;

        let was_validated = expense.status == ExpenseStatus::Validated;
        expense.reset_to_draft();
        expense.apply_update(update);

        let expense = self.repositories.expenses.save(expense).await?;
        if was_validated {
            info!("Expense {} edited, returned to Draft", id);
        }
        Ok(expense)
    }

    /// Extract a receipt image and attach it to an expense
    ///
    /// Fields the expense lacks (amount, currency, category) are filled from
    /// the receipt. When required receipt fields are unresolved the receipt
    /// is still stored and [`LifecycleError::IncompleteExtraction`] is
    /// returned so the submitter completes it by hand.
    pub async fn upload_receipt(&self, expense_id: Uuid, image: ImageSource) -> Result<Receipt> {
        let expense = self.repositories.expenses.get(expense_id).await?;
        expense.require_status(
            &[ExpenseStatus::Draft, ExpenseStatus::Validated],
            "attach a receipt to",
        )?;

        let (extraction, missing) = match self.stages.extractor.extract(&image).await {
            Ok(extraction) => (extraction, Vec::new()),
            Err(ExtractionError::Incomplete {
                extraction,
                missing,
            }) => (*extraction, missing),
            Err(e) => {
                warn!("Receipt upload for expense {} failed: {}", expense_id, e);
                return Err(e.into());
            }
        };

        // OCR can take seconds; guard against whatever happened meanwhile
        let mut expense = self.repositories.expenses.get(expense_id).await?;
        expense.require_status(
            &[ExpenseStatus::Draft, ExpenseStatus::Validated],
            "attach a receipt to",
        )?;

        let receipt = Receipt::new(
            expense.id,
            extraction.image_ref,
            extraction.fields,
            extraction.raw_text,
        );
        let receipt = self.repositories.receipts.save(receipt).await?;

        fill_from_receipt(&mut expense, &receipt.fields);
        expense.receipt_ids.push(receipt.id);
        expense.reset_to_draft();
        if let Err(e) = self.repositories.expenses.save(expense).await {
            warn!(
                "Receipt {} not linked to expense {}: {}",
                receipt.id, expense_id, e
            );
            if let Err(cleanup) = self.repositories.receipts.delete(&receipt).await {
                error!("Orphaned receipt {} left behind: {}", receipt.id, cleanup);
            }
            return Err(e.into());
        }

        if !missing.is_empty() {
            info!(
                "Receipt {} for expense {} stored incomplete ({} fields unresolved)",
                receipt.id,
                expense_id,
                missing.len()
            );
            return Err(LifecycleError::IncompleteExtraction {
                expense_id,
                receipt_id: receipt.id,
                missing,
            });
        }

        info!("Receipt {} attached to expense {}", receipt.id, expense_id);
        Ok(receipt)
    }

    // ===== Transitions =====

    /// Normalize and evaluate a Draft or Validated expense
    ///
    /// - pass → Validated
    /// - soft fail → Validated, flagged for elevated approval
    /// - hard fail → Rejected (or Draft under `KeepDraft`), saved, and
    ///   returned as [`LifecycleError::PolicyViolation`]
    ///
    /// Normalization failures leave the stored expense untouched.
    pub async fn validate(&self, id: Uuid) -> Result<Expense> {
        let mut expense = self.repositories.expenses.get(id).await?;
        expense.require_status(&[ExpenseStatus::Draft, ExpenseStatus::Validated], "validate")?;

        let original = require_complete(&expense)?;
        let normalized = self
            .stages
            .normalizer
            .normalize_to_base(original)
            .await
            .map_err(|e| {
                warn!("Normalization of expense {} failed: {}", id, e);
                e
            })?;

        let receipts = self.load_receipts(&expense).await?;
        let input = NormalizedExpense::from_expense(&expense, normalized.normalized, &receipts)?;
        let verdict = self.stages.policy.evaluate(&input);
        let outcome = verdict.outcome();
        let reasons = verdict.messages();

        expense.policy_override = None;
        expense.updated_at = Utc::now();
        match outcome {
            VerdictOutcome::Pass | VerdictOutcome::SoftFail => {
                expense.status = ExpenseStatus::Validated;
                expense.normalized_amount = Some(normalized.normalized);
                expense.requires_elevated_approval = outcome == VerdictOutcome::SoftFail;
                expense.validated_at = Some(Utc::now());
            }
            VerdictOutcome::HardFail => {
                expense.normalized_amount = None;
                expense.requires_elevated_approval = false;
                expense.validated_at = None;
                match self.config.hard_fail_outcome {
                    HardFailOutcome::Reject => {
                        expense.status = ExpenseStatus::Rejected;
                        expense.rejection = Some(Rejection {
                            rejected_by: POLICY_ENGINE_ACTOR.to_string(),
                            reasons: reasons.clone(),
                            rejected_at: Utc::now(),
                        });
                    }
                    HardFailOutcome::KeepDraft => expense.status = ExpenseStatus::Draft,
                }
            }
        }
        expense.policy_verdict = Some(verdict);

        let expense = self.save_transition(expense).await?;

        if outcome == VerdictOutcome::HardFail {
            warn!(
                "Expense {} failed policy, now {}: {}",
                id,
                expense.status,
                reasons.join("; ")
            );
            return Err(LifecycleError::PolicyViolation {
                expense_id: id,
                status: expense.status,
                reasons,
            });
        }

        info!(
            "Expense {} validated at {}{}",
            id,
            normalized.normalized,
            if expense.requires_elevated_approval {
                " (flagged for elevated approval)"
            } else {
                ""
            }
        );
        Ok(expense)
    }

    /// Accept a hard-failing Draft expense over its verdict
    ///
    /// The expense is normalized again and moves to Validated with the
    /// override recorded; it always needs elevated approval.
    pub async fn override_verdict(&self, id: Uuid, actor_id: &str, note: &str) -> Result<Expense> {
        if !self.config.allow_overrides {
            return Err(CoreError::precondition("policy overrides are disabled").into());
        }
        if actor_id.trim().is_empty() || note.trim().is_empty() {
            return Err(CoreError::precondition("an override needs an actor and a note").into());
        }

        let mut expense = self.repositories.expenses.get(id).await?;
        expense.require_status(&[ExpenseStatus::Draft], "override the verdict of")?;
        if !expense.policy_verdict.as_ref().map_or(false, |v| v.has_hard()) {
            return Err(CoreError::precondition(format!(
                "expense {} has no failing verdict to override",
                id
            ))
            .into());
        }

        let original = require_complete(&expense)?;
        let normalized = self.stages.normalizer.normalize_to_base(original).await?;

        expense.status = ExpenseStatus::Validated;
        expense.normalized_amount = Some(normalized.normalized);
        expense.requires_elevated_approval = true;
        expense.policy_override = Some(PolicyOverride {
            actor_id: actor_id.to_string(),
            note: note.to_string(),
            overridden_at: Utc::now(),
        });
        expense.validated_at = Some(Utc::now());
        expense.updated_at = Utc::now();

        let expense = self.save_transition(expense).await?;
        info!("Verdict on expense {} overridden by {}", id, actor_id);
        Ok(expense)
    }

    /// Submit a Validated expense and hand it to approvers
    pub async fn submit(&self, id: Uuid) -> Result<Expense> {
        let mut expense = self.repositories.expenses.get(id).await?;
        expense.require_status(&[ExpenseStatus::Validated], "submit")?;

        let cleared = match &expense.policy_verdict {
            Some(verdict) => !verdict.has_hard() || expense.policy_override.is_some(),
            None => false,
        };
        if !cleared || expense.normalized_amount.is_none() {
            return Err(CoreError::precondition(format!(
                "expense {} has no passing or overridden verdict",
                id
            ))
            .into());
        }

        let now = Utc::now();
        expense.status = ExpenseStatus::Submitted;
        expense.submitted_at = Some(now);
        expense.updated_at = now;
        let expense = self.save_transition(expense).await?;

        let request = ApprovalRequest::for_expense(&expense)?;
        if let Err(e) = self.approvals.enqueue(request).await {
            warn!("Approval hand-off for expense {} failed: {}", id, e);
            self.revert_submission(expense).await;
            return Err(e.into());
        }

        info!("Expense {} submitted for approval", id);
        Ok(expense)
    }

    /// Record approval of a Submitted expense
    ///
    /// Flagged expenses need [`ApprovalTier::Elevated`].
    pub async fn approve(&self, id: Uuid, approver_id: &str, tier: ApprovalTier) -> Result<Expense> {
        let mut expense = self.repositories.expenses.get(id).await?;
        expense.require_status(&[ExpenseStatus::Submitted], "approve")?;

        if expense.requires_elevated_approval && tier != ApprovalTier::Elevated {
            return Err(CoreError::precondition(format!(
                "expense {} is flagged and needs elevated approval",
                id
            ))
            .into());
        }

        let now = Utc::now();
        expense.status = ExpenseStatus::Approved;
        expense.approval = Some(ApprovalRecord {
            approver_id: approver_id.to_string(),
            tier,
            approved_at: now,
        });
        expense.updated_at = now;

        let expense = self.save_transition(expense).await?;
        info!("Expense {} approved by {} ({:?})", id, approver_id, tier);
        Ok(expense)
    }

    /// Reject a Validated or Submitted expense
    pub async fn reject(&self, id: Uuid, actor_id: &str, reasons: Vec<String>) -> Result<Expense> {
        if reasons.is_empty() {
            return Err(CoreError::precondition("a rejection needs at least one reason").into());
        }

        let mut expense = self.repositories.expenses.get(id).await?;
        expense.require_status(
            &[ExpenseStatus::Validated, ExpenseStatus::Submitted],
            "reject",
        )?;

        let now = Utc::now();
        expense.status = ExpenseStatus::Rejected;
        expense.normalized_amount = None;
        expense.rejection = Some(Rejection {
            rejected_by: actor_id.to_string(),
            reasons,
            rejected_at: now,
        });
        expense.updated_at = now;

        let expense = self.save_transition(expense).await?;
        info!("Expense {} rejected by {}", id, actor_id);
        Ok(expense)
    }

    /// Record the payout of an Approved expense
    pub async fn mark_processed(&self, id: Uuid, transaction_id: &str) -> Result<Expense> {
        let mut expense = self.repositories.expenses.get(id).await?;
        expense.require_status(&[ExpenseStatus::Approved], "mark processed")?;
        if transaction_id.trim().is_empty() {
            return Err(CoreError::precondition("empty gateway transaction id").into());
        }

        let now = Utc::now();
        expense.status = ExpenseStatus::Processed;
        expense.transaction_id = Some(transaction_id.to_string());
        expense.processed_at = Some(now);
        expense.updated_at = now;

        let expense = self.save_transition(expense).await?;
        info!("Expense {} processed as {}", id, transaction_id);
        Ok(expense)
    }

    // ===== Payout =====

    /// Create the Pending reimbursement for an Approved expense
    ///
    /// The reimbursement id derives from the expense id; a second call for
    /// the same expense fails with `Conflict`.
    pub async fn create_reimbursement(&self, expense_id: Uuid) -> Result<Reimbursement> {
        let expense = self.repositories.expenses.get(expense_id).await?;
        let amount = expense.normalized_amount.ok_or_else(|| {
            CoreError::precondition(format!("expense {} has no normalized amount", expense_id))
        })?;

        let reimbursement = Reimbursement::for_expense(&expense, amount)?;
        let reimbursement = self.repositories.reimbursements.save(reimbursement).await?;
        info!(
            "Reimbursement {} created for expense {} ({})",
            reimbursement.id,
            expense_id,
            reimbursement.money()
        );
        Ok(reimbursement)
    }

    /// Settle a reimbursement, mark its expense Processed, post to payroll
    ///
    /// A reimbursement already Processed by an earlier call skips the
    /// gateway and resumes with the remaining steps. A payroll failure is
    /// reported in the outcome; it never undoes the payout.
    pub async fn process_reimbursement(&self, id: Uuid) -> Result<ProcessingOutcome> {
        let current = self.repositories.reimbursements.get(id).await?;

        let transaction_id = if current.status == ReimbursementStatus::Processed {
            current.gateway_transaction_id.clone()
        } else {
            let outcome = self.stages.settlement.settle(id).await?;
            if !outcome.success {
                info!(
                    "Reimbursement {} awaiting gateway confirmation, still {}",
                    id, outcome.reimbursement.status
                );
                return Ok(ProcessingOutcome {
                    reimbursement: outcome.reimbursement,
                    transaction_id: outcome.transaction_id,
                    expense: None,
                    payroll: PayrollStatus::NotAttempted,
                });
            }
            outcome.transaction_id
        };
        let transaction_id = transaction_id.ok_or_else(|| {
            CoreError::precondition(format!("processed reimbursement {} has no transaction id", id))
        })?;

        let expense = self.repositories.expenses.get(current.expense_id).await?;
        let expense = match expense.status {
            ExpenseStatus::Processed => expense,
            _ => self
                .mark_processed(current.expense_id, &transaction_id)
                .await
                .map_err(|e| {
                    error!(
                        "Reimbursement {} paid as {} but expense {} not updated: {}",
                        id, transaction_id, current.expense_id, e
                    );
                    e
                })?,
        };

        let payroll = match self.stages.payroll.post_to_payroll(id).await {
            Ok(ack) => PayrollStatus::Posted(ack),
            Err(e) => {
                error!(
                    "Reimbursement {} paid but not posted to payroll: {}",
                    id, e
                );
                PayrollStatus::Failed {
                    reason: e.to_string(),
                }
            }
        };

        Ok(ProcessingOutcome {
            reimbursement: self.repositories.reimbursements.get(id).await?,
            transaction_id: Some(transaction_id),
            expense: Some(expense),
            payroll,
        })
    }

    // ===== Helpers =====

    async fn load_receipts(&self, expense: &Expense) -> Result<Vec<Receipt>> {
        let mut receipts = Vec::with_capacity(expense.receipt_ids.len());
        for id in &expense.receipt_ids {
            receipts.push(self.repositories.receipts.get(*id).await?);
        }
        Ok(receipts)
    }

    /// Put a Submitted expense back to Validated after a failed hand-off
    async fn revert_submission(&self, mut expense: Expense) {
        let id = expense.id;
        expense.status = ExpenseStatus::Validated;
        expense.submitted_at = None;
        expense.updated_at = Utc::now();
        if let Err(e) = self.repositories.expenses.save(expense).await {
            error!("Expense {} stuck in Submitted without approvers: {}", id, e);
        }
    }

    async fn save_transition(&self, expense: Expense) -> Result<Expense> {
        let id = expense.id;
        let status = expense.status;
        self.repositories.expenses.save(expense).await.map_err(|e| {
            if matches!(e, CoreError::Conflict { .. }) {
                warn!(
                    "Discarded {} result for expense {}: record changed meanwhile",
                    status, id
                );
            }
            e.into()
        })
    }
}

fn require_complete(expense: &Expense) -> Result<expense_core::Money> {
    let mut missing = Vec::new();
    if expense.original_amount.is_none() {
        missing.push("amount");
    }
    if expense.original_currency.is_none() {
        missing.push("currency");
    }
    if expense.category.is_none() {
        missing.push("category");
    }

    match expense.original_money() {
        Some(money) if missing.is_empty() => Ok(money),
        _ => Err(LifecycleError::IncompleteExpense {
            expense_id: expense.id,
            missing,
        }),
    }
}

fn fill_from_receipt(expense: &mut Expense, fields: &ExtractedFields) {
    if expense.original_amount.is_none() {
        if let Some(amount) = fields.amount.value() {
            expense.original_amount = Some(*amount);
        }
    }
    if expense.original_currency.is_none() {
        if let Some(currency) = fields.currency.value() {
            expense.original_currency = Some(*currency);
        }
    }
    if expense.category.is_none() {
        if let Some(category) = fields.category.value() {
            expense.category = Some(*category);
        }
    }
}
