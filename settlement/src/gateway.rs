//! Payment gateway boundary

use crate::config::SettlementConfig;
use crate::error::{Result, SettlementError};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use expense_core::{CurrencyCode, Reimbursement};
use parking_lot::Mutex;
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Charge state reported by the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargeStatus {
    /// Money moved
    Succeeded,
    /// Waiting on the gateway or the payee; poll again
    RequiresAction,
    /// Declined
    Failed,
}

/// Charge submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargeRequest {
    /// Amount
    pub amount: Decimal,
    /// Currency
    pub currency: CurrencyCode,
    /// Same value on every attempt for one reimbursement
    pub idempotency_key: String,
    /// Free-form metadata
    pub metadata: BTreeMap<String, String>,
}

impl ChargeRequest {
    /// Charge paying out a reimbursement
    pub fn for_reimbursement(reimbursement: &Reimbursement) -> Self {
        let mut metadata = BTreeMap::new();
        metadata.insert("reimbursement_id".to_string(), reimbursement.id.to_string());
        metadata.insert("expense_id".to_string(), reimbursement.expense_id.to_string());
        metadata.insert("employee_id".to_string(), reimbursement.employee_id.clone());

        Self {
            amount: reimbursement.amount,
            currency: reimbursement.currency,
            idempotency_key: reimbursement.idempotency_key.clone(),
            metadata,
        }
    }
}

/// Gateway answer to a charge submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeResponse {
    /// Gateway transaction id
    pub transaction_id: String,
    /// Charge state
    pub status: ChargeStatus,
    /// Decline reason
    pub failure_reason: Option<String>,
}

/// Payment gateway
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Gateway name (for logs and metrics)
    fn name(&self) -> &str;

    /// Submit a charge; a repeated idempotency key returns the original charge
    async fn create_charge(&self, request: &ChargeRequest) -> Result<ChargeResponse>;

    /// Current state of a charge
    async fn confirm_charge(&self, transaction_id: &str) -> Result<ChargeStatus>;
}

#[derive(Debug, Serialize)]
struct CreateChargeBody<'a> {
    amount: Decimal,
    currency: &'a str,
    metadata: &'a BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct ChargeBody {
    id: String,
    status: ChargeStatus,
    #[serde(default)]
    failure_message: Option<String>,
}

/// JSON payments API client
///
/// `POST {url}/charges` with an `Idempotency-Key` header and
/// `GET {url}/charges/{id}`.
#[derive(Debug, Clone)]
pub struct HttpPaymentGateway {
    base_url: String,
    api_key: Option<String>,
    timeout_ms: u64,
    client: Client,
}

impl HttpPaymentGateway {
    /// Build from config
    pub fn new(config: &SettlementConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.gateway_timeout_ms))
            .build()
            .map_err(|e| SettlementError::Gateway(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: config.gateway_url.trim_end_matches('/').to_string(),
            api_key: config.gateway_api_key.clone(),
            timeout_ms: config.gateway_timeout_ms,
            client,
        })
    }

    fn transport_error(&self, url: &str, e: reqwest::Error) -> SettlementError {
        if e.is_timeout() {
            SettlementError::GatewayTimeout(self.timeout_ms)
        } else {
            SettlementError::Gateway(format!("request to {} failed: {}", url, e))
        }
    }

    async fn read_charge(&self, response: reqwest::Response) -> Result<ChargeBody> {
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!("Gateway returned {}: {}", status, text);
            return if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                Err(SettlementError::Gateway(format!("status {}", status)))
            } else {
                Err(SettlementError::InvalidResponse(format!(
                    "status {}: {}",
                    status, text
                )))
            };
        }

        response
            .json::<ChargeBody>()
            .await
            .map_err(|e| SettlementError::InvalidResponse(format!("failed to parse charge: {}", e)))
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    fn name(&self) -> &str {
        "http"
    }

    async fn create_charge(&self, request: &ChargeRequest) -> Result<ChargeResponse> {
        let url = format!("{}/charges", self.base_url);
        let body = CreateChargeBody {
            amount: request.amount,
            currency: request.currency.as_str(),
            metadata: &request.metadata,
        };

        let mut builder = self
            .client
            .post(&url)
            .header("Idempotency-Key", &request.idempotency_key)
            .json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| self.transport_error(&url, e))?;
        let charge = self.read_charge(response).await?;

        if charge.id.trim().is_empty() {
            return Err(SettlementError::InvalidResponse(
                "charge without transaction id".to_string(),
            ));
        }

        Ok(ChargeResponse {
            transaction_id: charge.id,
            status: charge.status,
            failure_reason: charge.failure_message,
        })
    }

    async fn confirm_charge(&self, transaction_id: &str) -> Result<ChargeStatus> {
        let url = format!("{}/charges/{}", self.base_url, transaction_id);

        let mut builder = self.client.get(&url);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| self.transport_error(&url, e))?;
        Ok(self.read_charge(response).await?.status)
    }
}

#[derive(Debug, Clone)]
struct MockCharge {
    transaction_id: String,
    amount: Decimal,
    currency: CurrencyCode,
    status: ChargeStatus,
}

impl MockCharge {
    fn response(&self) -> ChargeResponse {
        ChargeResponse {
            transaction_id: self.transaction_id.clone(),
            status: self.status,
            failure_reason: (self.status == ChargeStatus::Failed)
                .then(|| "card_declined".to_string()),
        }
    }
}

/// In-memory gateway that deduplicates by idempotency key
///
/// Can be told to accept a charge and then never answer, which is how a
/// lost response looks to the caller.
#[derive(Debug)]
pub struct MockPaymentGateway {
    charges: DashMap<String, MockCharge>,
    keys_by_transaction: DashMap<String, String>,
    outcome: Mutex<ChargeStatus>,
    confirm_outcome: Mutex<ChargeStatus>,
    hang_after_accept: AtomicU32,
    available: AtomicBool,
    create_calls: AtomicU64,
    confirm_calls: AtomicU64,
}

impl Default for MockPaymentGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl MockPaymentGateway {
    /// Gateway where every charge succeeds
    pub fn new() -> Self {
        Self {
            charges: DashMap::new(),
            keys_by_transaction: DashMap::new(),
            outcome: Mutex::new(ChargeStatus::Succeeded),
            confirm_outcome: Mutex::new(ChargeStatus::Succeeded),
            hang_after_accept: AtomicU32::new(0),
            available: AtomicBool::new(true),
            create_calls: AtomicU64::new(0),
            confirm_calls: AtomicU64::new(0),
        }
    }

    /// Status given to new charges
    pub fn set_outcome(&self, status: ChargeStatus) {
        *self.outcome.lock() = status;
    }

    /// Status a `RequiresAction` charge moves to when confirmed
    pub fn set_confirm_outcome(&self, status: ChargeStatus) {
        *self.confirm_outcome.lock() = status;
    }

    /// The next `n` new charges are recorded but their response never arrives
    pub fn hang_after_accept(&self, n: u32) {
        self.hang_after_accept.store(n, Ordering::SeqCst);
    }

    /// Toggle availability; an unavailable gateway fails before charging
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Distinct charges created
    pub fn charge_count(&self) -> usize {
        self.charges.len()
    }

    /// `create_charge` calls received
    pub fn create_calls(&self) -> u64 {
        self.create_calls.load(Ordering::SeqCst)
    }

    /// `confirm_charge` calls received
    pub fn confirm_calls(&self) -> u64 {
        self.confirm_calls.load(Ordering::SeqCst)
    }

    fn take_hang(&self) -> bool {
        self.hang_after_accept
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl PaymentGateway for MockPaymentGateway {
    fn name(&self) -> &str {
        "mock"
    }

    async fn create_charge(&self, request: &ChargeRequest) -> Result<ChargeResponse> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);

        if !self.available.load(Ordering::SeqCst) {
            return Err(SettlementError::Gateway("gateway unavailable".to_string()));
        }

        let (response, created) = match self.charges.entry(request.idempotency_key.clone()) {
            Entry::Occupied(existing) => {
                let charge = existing.get();
                if charge.amount != request.amount || charge.currency != request.currency {
                    return Err(SettlementError::InvalidResponse(format!(
                        "idempotency key {} reused with different parameters",
                        request.idempotency_key
                    )));
                }
                debug!(
                    "Mock gateway: replaying charge {} for key {}",
                    charge.transaction_id, request.idempotency_key
                );
                (charge.response(), false)
            }
            Entry::Vacant(slot) => {
                let charge = MockCharge {
                    transaction_id: format!("ch_{}", Uuid::new_v4().simple()),
                    amount: request.amount,
                    currency: request.currency,
                    status: *self.outcome.lock(),
                };
                info!(
                    "Mock gateway: created charge {} for {} {} ({:?})",
                    charge.transaction_id, request.amount, request.currency, charge.status
                );
                self.keys_by_transaction.insert(
                    charge.transaction_id.clone(),
                    request.idempotency_key.clone(),
                );
                let response = charge.response();
                slot.insert(charge);
                (response, true)
            }
        };

        if created && self.take_hang() {
            warn!(
                "Mock gateway: dropping response for charge {}",
                response.transaction_id
            );
            return std::future::pending().await;
        }

        Ok(response)
    }

    async fn confirm_charge(&self, transaction_id: &str) -> Result<ChargeStatus> {
        self.confirm_calls.fetch_add(1, Ordering::SeqCst);

        if !self.available.load(Ordering::SeqCst) {
            return Err(SettlementError::Gateway("gateway unavailable".to_string()));
        }

        let key = self
            .keys_by_transaction
            .get(transaction_id)
            .map(|k| k.value().clone())
            .ok_or_else(|| {
                SettlementError::InvalidResponse(format!("unknown transaction {}", transaction_id))
            })?;

        let mut charge = self.charges.get_mut(&key).ok_or_else(|| {
            SettlementError::InvalidResponse(format!("unknown transaction {}", transaction_id))
        })?;
        if charge.status == ChargeStatus::RequiresAction {
            charge.status = *self.confirm_outcome.lock();
        }
        Ok(charge.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request(key: &str, amount: Decimal) -> ChargeRequest {
        ChargeRequest {
            amount,
            currency: CurrencyCode::USD,
            idempotency_key: key.to_string(),
            metadata: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_mock_replays_same_key() {
        let gateway = MockPaymentGateway::new();

        let first = gateway.create_charge(&request("reimb_a", dec!(500))).await.unwrap();
        let second = gateway.create_charge(&request("reimb_a", dec!(500))).await.unwrap();
        let other = gateway.create_charge(&request("reimb_b", dec!(500))).await.unwrap();

        assert_eq!(first, second);
        assert_ne!(first.transaction_id, other.transaction_id);
        assert_eq!(gateway.charge_count(), 2);
        assert_eq!(gateway.create_calls(), 3);
    }

    #[tokio::test]
    async fn test_mock_rejects_key_reuse_with_new_amount() {
        let gateway = MockPaymentGateway::new();
        gateway.create_charge(&request("reimb_a", dec!(500))).await.unwrap();

        let result = gateway.create_charge(&request("reimb_a", dec!(501))).await;
        assert!(matches!(result, Err(SettlementError::InvalidResponse(_))));
        assert_eq!(gateway.charge_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_requires_action_resolves_on_confirm() {
        let gateway = MockPaymentGateway::new();
        gateway.set_outcome(ChargeStatus::RequiresAction);
        gateway.set_confirm_outcome(ChargeStatus::Succeeded);

        let charge = gateway.create_charge(&request("reimb_a", dec!(10))).await.unwrap();
        assert_eq!(charge.status, ChargeStatus::RequiresAction);
        assert_eq!(
            gateway.confirm_charge(&charge.transaction_id).await.unwrap(),
            ChargeStatus::Succeeded
        );
        assert!(gateway.confirm_charge("ch_missing").await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_mock_hang_records_charge() {
        let gateway = MockPaymentGateway::new();
        gateway.hang_after_accept(1);

        let hung = tokio::time::timeout(
            Duration::from_secs(5),
            gateway.create_charge(&request("reimb_a", dec!(10))),
        )
        .await;
        assert!(hung.is_err());
        assert_eq!(gateway.charge_count(), 1);

        let replay = gateway.create_charge(&request("reimb_a", dec!(10))).await.unwrap();
        assert_eq!(replay.status, ChargeStatus::Succeeded);
    }

    fn http_gateway(server: &MockServer) -> HttpPaymentGateway {
        HttpPaymentGateway::new(&SettlementConfig {
            gateway_url: server.uri(),
            gateway_api_key: Some("sk_test".to_string()),
            gateway_timeout_ms: 2_000,
            ..Default::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_http_sends_idempotency_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/charges"))
            .and(header("Idempotency-Key", "reimb_abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "ch_123",
                "status": "requires_action"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let charge = http_gateway(&server)
            .create_charge(&request("reimb_abc", dec!(42.50)))
            .await
            .unwrap();
        assert_eq!(charge.transaction_id, "ch_123");
        assert_eq!(charge.status, ChargeStatus::RequiresAction);
    }

    #[tokio::test]
    async fn test_http_confirm_and_error_mapping() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/charges/ch_ok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "ch_ok",
                "status": "succeeded"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/charges/ch_down"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/charges/ch_bad"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let gateway = http_gateway(&server);
        assert_eq!(
            gateway.confirm_charge("ch_ok").await.unwrap(),
            ChargeStatus::Succeeded
        );
        assert!(matches!(
            gateway.confirm_charge("ch_down").await,
            Err(SettlementError::Gateway(_))
        ));
        assert!(matches!(
            gateway.confirm_charge("ch_bad").await,
            Err(SettlementError::InvalidResponse(_))
        ));
    }
}
