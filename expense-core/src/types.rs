//! Core records for the expense pipeline
//!
//! Field names are stable: downstream reporting reads these records as
//! persisted.

use crate::money::{CurrencyCode, Money};
use crate::verdict::Verdict;
use crate::{Error, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Namespace for deriving reimbursement ids from expense ids
const REIMBURSEMENT_NAMESPACE: Uuid = Uuid::from_u128(0x6f0c_2a4e_91d3_4b7a_8e55_3c1d_9b20_7e41);

/// Expense category
///
/// Declaration order is the tie-break priority used by receipt
/// categorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ExpenseCategory {
    /// Hotels, lodging
    Lodging,
    /// Meals, restaurants
    Meals,
    /// Flights, taxis, trains, fuel
    Transportation,
    /// Anything else
    Miscellaneous,
}

impl ExpenseCategory {
    /// All categories in priority order
    pub const ALL: [ExpenseCategory; 4] = [
        ExpenseCategory::Lodging,
        ExpenseCategory::Meals,
        ExpenseCategory::Transportation,
        ExpenseCategory::Miscellaneous,
    ];

    /// Display name
    pub fn as_str(&self) -> &'static str {
        match self {
            ExpenseCategory::Lodging => "Lodging",
            ExpenseCategory::Meals => "Meals",
            ExpenseCategory::Transportation => "Transportation",
            ExpenseCategory::Miscellaneous => "Miscellaneous",
        }
    }
}

impl fmt::Display for ExpenseCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExpenseCategory {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lodging" | "hotel" | "accommodation" => Ok(ExpenseCategory::Lodging),
            "meals" | "meal" | "food" => Ok(ExpenseCategory::Meals),
            "transportation" | "transport" | "travel" => Ok(ExpenseCategory::Transportation),
            "miscellaneous" | "misc" | "other" => Ok(ExpenseCategory::Miscellaneous),
            _ => Err(Error::InvalidCategory(s.to_string())),
        }
    }
}

/// Expense status
///
/// Forward chain Draft → Validated → Submitted → Approved → Processed;
/// Rejected is terminal and sits outside the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExpenseStatus {
    /// Created, not yet validated
    Draft,
    /// Normalized and evaluated
    Validated,
    /// Sent to approvers
    Submitted,
    /// Approved for payout
    Approved,
    /// Paid out
    Processed,
    /// Terminal rejection
    Rejected,
}

impl ExpenseStatus {
    /// Whether the status is on or past Validated in the forward chain
    pub fn is_validated_or_later(&self) -> bool {
        matches!(
            self,
            ExpenseStatus::Validated
                | ExpenseStatus::Submitted
                | ExpenseStatus::Approved
                | ExpenseStatus::Processed
        )
    }

    /// Receipts may be attached or changed
    pub fn is_editable(&self) -> bool {
        matches!(self, ExpenseStatus::Draft | ExpenseStatus::Validated)
    }
}

impl fmt::Display for ExpenseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExpenseStatus::Draft => "DRAFT",
            ExpenseStatus::Validated => "VALIDATED",
            ExpenseStatus::Submitted => "SUBMITTED",
            ExpenseStatus::Approved => "APPROVED",
            ExpenseStatus::Processed => "PROCESSED",
            ExpenseStatus::Rejected => "REJECTED",
        };
        f.write_str(s)
    }
}

/// Scope used to resolve the applicable policy
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitterScope {
    /// Employee level (e.g. "L3", "director")
    pub level: Option<String>,

    /// Department
    pub department: Option<String>,

    /// Travel destination
    pub destination: Option<String>,
}

/// Approval tier granted by the approver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalTier {
    /// Line manager approval
    Standard,
    /// Second-level approval, required for flagged expenses
    Elevated,
}

/// Recorded approval
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRecord {
    /// Approver id
    pub approver_id: String,
    /// Tier granted
    pub tier: ApprovalTier,
    /// Approval time
    pub approved_at: DateTime<Utc>,
}

/// Explicit override of a failing verdict
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyOverride {
    /// Who overrode
    pub actor_id: String,
    /// Justification
    pub note: String,
    /// When
    pub overridden_at: DateTime<Utc>,
}

/// Recorded rejection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    /// Rejecting actor ("policy-engine" for automatic rejections)
    pub rejected_by: String,
    /// Reasons
    pub reasons: Vec<String>,
    /// When
    pub rejected_at: DateTime<Utc>,
}

/// Expense record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expense {
    /// Expense id
    pub id: Uuid,

    /// Submitter id
    pub submitter_id: String,

    /// Policy scope of the submitter
    pub scope: SubmitterScope,

    /// Category (may be filled from a receipt)
    pub category: Option<ExpenseCategory>,

    /// Free-text description
    pub description: Option<String>,

    /// Amount as submitted
    pub original_amount: Option<Decimal>,

    /// Currency as submitted
    pub original_currency: Option<CurrencyCode>,

    /// Amount in base currency; set iff status is Validated or later
    pub normalized_amount: Option<Money>,

    /// Status
    pub status: ExpenseStatus,

    /// Receipts owned by this expense
    pub receipt_ids: Vec<Uuid>,

    /// Latest policy verdict
    pub policy_verdict: Option<Verdict>,

    /// Explicit override of a failing verdict
    pub policy_override: Option<PolicyOverride>,

    /// Soft-failed verdict: elevated approval required before payout
    pub requires_elevated_approval: bool,

    /// Approval
    pub approval: Option<ApprovalRecord>,

    /// Rejection
    pub rejection: Option<Rejection>,

    /// Gateway transaction that paid this expense
    pub transaction_id: Option<String>,

    /// Created timestamp
    pub created_at: DateTime<Utc>,

    /// Last modification
    pub updated_at: DateTime<Utc>,

    /// Validated timestamp
    pub validated_at: Option<DateTime<Utc>>,

    /// Submitted timestamp
    pub submitted_at: Option<DateTime<Utc>>,

    /// Processed timestamp
    pub processed_at: Option<DateTime<Utc>>,

    /// Optimistic concurrency version
    pub version: u64,
}

/// Input for creating an expense
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExpenseDraft {
    /// Submitter id
    pub submitter_id: String,
    /// Submitter scope
    #[serde(default)]
    pub scope: SubmitterScope,
    /// Category
    pub category: Option<ExpenseCategory>,
    /// Description
    pub description: Option<String>,
    /// Amount
    pub amount: Option<Decimal>,
    /// Currency
    pub currency: Option<CurrencyCode>,
}

/// Partial update of a Draft or Validated expense
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExpenseUpdate {
    /// New category
    pub category: Option<ExpenseCategory>,
    /// New description
    pub description: Option<String>,
    /// New amount
    pub amount: Option<Decimal>,
    /// New currency
    pub currency: Option<CurrencyCode>,
    /// New destination
    pub destination: Option<String>,
}

impl Expense {
    /// Create a Draft expense; no validation is performed
    pub fn new_draft(draft: ExpenseDraft) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            submitter_id: draft.submitter_id,
            scope: draft.scope,
            category: draft.category,
            description: draft.description,
            original_amount: draft.amount,
            original_currency: draft.currency,
            normalized_amount: None,
            status: ExpenseStatus::Draft,
            receipt_ids: Vec::new(),
            policy_verdict: None,
            policy_override: None,
            requires_elevated_approval: false,
            approval: None,
            rejection: None,
            transaction_id: None,
            created_at: now,
            updated_at: now,
            validated_at: None,
            submitted_at: None,
            processed_at: None,
            version: 0,
        }
    }

    /// Original amount and currency, if both are known
    pub fn original_money(&self) -> Option<Money> {
        match (self.original_amount, self.original_currency) {
            (Some(amount), Some(currency)) => Some(Money::new(amount, currency)),
            _ => None,
        }
    }

    /// Fail with a precondition error unless status is one of `allowed`
    pub fn require_status(&self, allowed: &[ExpenseStatus], operation: &str) -> Result<()> {
        if allowed.contains(&self.status) {
            Ok(())
        } else {
            Err(Error::precondition(format!(
                "cannot {} expense {} in status {}",
                operation, self.id, self.status
            )))
        }
    }

    /// Return a Validated expense to Draft, dropping derived state
    pub fn reset_to_draft(&mut self) {
        self.status = ExpenseStatus::Draft;
        self.normalized_amount = None;
        self.policy_verdict = None;
        self.policy_override = None;
        self.requires_elevated_approval = false;
        self.validated_at = None;
        self.updated_at = Utc::now();
    }

    /// Apply a partial update
    pub fn apply_update(&mut self, update: ExpenseUpdate) {
        if let Some(category) = update.category {
            self.category = Some(category);
        }
        if let Some(description) = update.description {
            self.description = Some(description);
        }
        if let Some(amount) = update.amount {
            self.original_amount = Some(amount);
        }
        if let Some(currency) = update.currency {
            self.original_currency = Some(currency);
        }
        if let Some(destination) = update.destination {
            self.scope.destination = Some(destination);
        }
        self.updated_at = Utc::now();
    }
}

/// Extracted receipt field with its resolution marker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Field<T> {
    /// Parsed value with matcher confidence (0.0-1.0)
    Resolved {
        /// Value
        value: T,
        /// Confidence
        confidence: f32,
    },
    /// Could not be parsed; needs manual entry
    Unresolved,
}

impl<T> Default for Field<T> {
    fn default() -> Self {
        Field::Unresolved
    }
}

impl<T> Field<T> {
    /// Resolved field
    pub fn resolved(value: T, confidence: f32) -> Self {
        Field::Resolved {
            value,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }

    /// Value, if resolved
    pub fn value(&self) -> Option<&T> {
        match self {
            Field::Resolved { value, .. } => Some(value),
            Field::Unresolved => None,
        }
    }

    /// Whether the field was parsed
    pub fn is_resolved(&self) -> bool {
        matches!(self, Field::Resolved { .. })
    }

    /// Confidence (0.0 when unresolved)
    pub fn confidence(&self) -> f32 {
        match self {
            Field::Resolved { confidence, .. } => *confidence,
            Field::Unresolved => 0.0,
        }
    }
}

/// Names of receipt fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldName {
    /// Total amount
    Amount,
    /// Currency
    Currency,
    /// Transaction date
    Date,
    /// Merchant
    Vendor,
    /// Category
    Category,
}

impl fmt::Display for FieldName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FieldName::Amount => "amount",
            FieldName::Currency => "currency",
            FieldName::Date => "date",
            FieldName::Vendor => "vendor",
            FieldName::Category => "category",
        };
        f.write_str(s)
    }
}

/// Structured fields parsed from receipt text
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedFields {
    /// Total amount
    pub amount: Field<Decimal>,
    /// Currency
    pub currency: Field<CurrencyCode>,
    /// Transaction date
    pub date: Field<NaiveDate>,
    /// Merchant
    pub vendor: Field<String>,
    /// Heuristic category
    pub category: Field<ExpenseCategory>,
}

impl ExtractedFields {
    /// Required fields (amount, date, vendor) that are unresolved
    pub fn missing_required(&self) -> Vec<FieldName> {
        let mut missing = Vec::new();
        if !self.amount.is_resolved() {
            missing.push(FieldName::Amount);
        }
        if !self.date.is_resolved() {
            missing.push(FieldName::Date);
        }
        if !self.vendor.is_resolved() {
            missing.push(FieldName::Vendor);
        }
        missing
    }
}

/// Receipt record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    /// Receipt id
    pub id: Uuid,

    /// Owning expense
    pub expense_id: Uuid,

    /// Image reference (path, URL or blob digest)
    pub image_ref: String,

    /// Extracted fields
    pub fields: ExtractedFields,

    /// Raw OCR text kept for audit
    pub raw_text: String,

    /// Upload timestamp
    pub uploaded_at: DateTime<Utc>,

    /// Optimistic concurrency version
    pub version: u64,
}

impl Receipt {
    /// New receipt for an expense
    pub fn new(
        expense_id: Uuid,
        image_ref: impl Into<String>,
        fields: ExtractedFields,
        raw_text: String,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            expense_id,
            image_ref: image_ref.into(),
            fields,
            raw_text,
            uploaded_at: Utc::now(),
            version: 0,
        }
    }
}

/// Reimbursement status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReimbursementStatus {
    /// Awaiting payout (including retry after an unknown outcome)
    ///
    /// Reimbursements only exist for approved expenses, so this is also the
    /// state a new one starts in; the approval time is in `approved_at`.
    Pending,
    /// Paid out
    Processed,
    /// Gateway refused the payout
    Failed,
}

impl fmt::Display for ReimbursementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReimbursementStatus::Pending => "PENDING",
            ReimbursementStatus::Processed => "PROCESSED",
            ReimbursementStatus::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// Reimbursement record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reimbursement {
    /// Reimbursement id (derived from the expense id)
    pub id: Uuid,

    /// Source expense (referenced, not owned)
    pub expense_id: Uuid,

    /// Employee to pay
    pub employee_id: String,

    /// Amount
    pub amount: Decimal,

    /// Currency
    pub currency: CurrencyCode,

    /// Status
    pub status: ReimbursementStatus,

    /// Key presented to the gateway on every attempt
    pub idempotency_key: String,

    /// Gateway transaction id; set iff Processed
    pub gateway_transaction_id: Option<String>,

    /// Captured failure reason
    pub failure_reason: Option<String>,

    /// Last transient error (outcome unknown, still Pending)
    pub last_error: Option<String>,

    /// Settlement attempts made
    pub attempts: u32,

    /// Submission timestamp
    pub submitted_at: DateTime<Utc>,

    /// Approval timestamp
    pub approved_at: Option<DateTime<Utc>>,

    /// Processed timestamp
    pub processed_at: Option<DateTime<Utc>>,

    /// Payroll acknowledgement reference
    pub payroll_reference: Option<String>,

    /// When payroll acknowledged the posting
    pub payroll_posted_at: Option<DateTime<Utc>>,

    /// Optimistic concurrency version
    pub version: u64,
}

impl Reimbursement {
    /// Deterministic reimbursement id for an expense
    pub fn id_for_expense(expense_id: Uuid) -> Uuid {
        Uuid::new_v5(&REIMBURSEMENT_NAMESPACE, expense_id.as_bytes())
    }

    /// Deterministic idempotency key for an expense
    pub fn idempotency_key_for(expense_id: Uuid) -> String {
        let digest = Sha256::digest(expense_id.as_bytes());
        let hex: String = digest.iter().take(16).map(|b| format!("{:02x}", b)).collect();
        format!("reimb_{}", hex)
    }

    /// Pending reimbursement for an approved expense
    pub fn for_expense(expense: &Expense, amount: Money) -> Result<Self> {
        expense.require_status(&[ExpenseStatus::Approved], "reimburse")?;
        if amount.amount <= Decimal::ZERO {
            return Err(Error::InvalidAmount(format!(
                "reimbursement amount must be positive, got {}",
                amount
            )));
        }
        Ok(Self {
            id: Self::id_for_expense(expense.id),
            expense_id: expense.id,
            employee_id: expense.submitter_id.clone(),
            amount: amount.amount,
            currency: amount.currency,
            status: ReimbursementStatus::Pending,
            idempotency_key: Self::idempotency_key_for(expense.id),
            gateway_transaction_id: None,
            failure_reason: None,
            last_error: None,
            attempts: 0,
            submitted_at: Utc::now(),
            approved_at: expense.approval.as_ref().map(|a| a.approved_at),
            processed_at: None,
            payroll_reference: None,
            payroll_posted_at: None,
            version: 0,
        })
    }

    /// Amount as money
    pub fn money(&self) -> Money {
        Money::new(self.amount, self.currency)
    }

    /// Record a successful payout; the only way the transaction id is set
    pub fn mark_processed(&mut self, transaction_id: String) -> Result<()> {
        if self.status != ReimbursementStatus::Pending {
            return Err(Error::precondition(format!(
                "reimbursement {} is {}, expected PENDING",
                self.id, self.status
            )));
        }
        if transaction_id.trim().is_empty() {
            return Err(Error::precondition("empty gateway transaction id"));
        }
        self.status = ReimbursementStatus::Processed;
        self.gateway_transaction_id = Some(transaction_id);
        self.processed_at = Some(Utc::now());
        self.last_error = None;
        Ok(())
    }

    /// Record a definitive gateway failure
    pub fn mark_failed(&mut self, reason: String) -> Result<()> {
        if self.status != ReimbursementStatus::Pending {
            return Err(Error::precondition(format!(
                "reimbursement {} is {}, expected PENDING",
                self.id, self.status
            )));
        }
        self.status = ReimbursementStatus::Failed;
        self.failure_reason = Some(reason);
        Ok(())
    }

    /// Processed but not yet acknowledged by payroll
    pub fn awaiting_payroll(&self) -> bool {
        self.status == ReimbursementStatus::Processed && self.payroll_posted_at.is_none()
    }
}
