//! Cashfree payment-gateway client and webhook verification.

use apnasquad_types::Amount;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_CASHFREE_BASE_URL: &str = "https://sandbox.cashfree.com/pg";
pub const CASHFREE_API_VERSION: &str = "2025-01-01";
pub const SIGNATURE_HEADER: &str = "x-webhook-signature";
pub const TIMESTAMP_HEADER: &str = "x-webhook-timestamp";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("gateway rejected order ({status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("gateway credentials are not configured")]
    NotConfigured,
}

#[derive(Clone, Debug, Default)]
pub struct GatewayConfig {
    pub base_url: String,
    pub app_id: String,
    pub secret_key: String,
    /// Frontend origin the gateway redirects back to after checkout.
    pub client_url: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct CustomerDetails {
    pub customer_id: String,
    pub customer_phone: String,
    pub customer_email: String,
    pub customer_transaction_id: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct OrderMeta {
    pub return_url: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct CreateOrderRequest {
    pub order_currency: &'static str,
    pub order_amount: Amount,
    pub order_id: String,
    pub customer_details: CustomerDetails,
    pub order_meta: OrderMeta,
}

pub struct PaymentGateway {
    client: Client,
    config: GatewayConfig,
}

impl PaymentGateway {
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self { client, config })
    }

    pub fn return_url(&self, order_id: &str) -> String {
        format!(
            "{}/payment/result?order_id={order_id}",
            self.config.client_url.trim_end_matches('/')
        )
    }

    /// Creates a checkout order and returns the gateway's JSON untouched.
    pub async fn create_order(
        &self,
        request: &CreateOrderRequest,
    ) -> Result<serde_json::Value, GatewayError> {
        if self.config.app_id.is_empty() || self.config.secret_key.is_empty() {
            return Err(GatewayError::NotConfigured);
        }
        let url = format!("{}/orders", self.config.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(url)
            .header("x-api-version", CASHFREE_API_VERSION)
            .header("x-client-id", &self.config.app_id)
            .header("x-client-secret", &self.config.secret_key)
            .json(request)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json().await?)
    }

    pub fn verify_webhook(&self, timestamp: &str, body: &[u8], signature: &str) -> bool {
        verify_signature(&self.config.secret_key, timestamp, body, signature)
    }
}

/// Checks `signature` against base64(HMAC-SHA256(secret, timestamp ‖ body)).
pub fn verify_signature(secret: &str, timestamp: &str, body: &[u8], signature: &str) -> bool {
    let Ok(expected) = STANDARD.decode(signature.trim()) else {
        return false;
    };
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(timestamp.as_bytes());
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

pub fn sign(secret: &str, timestamp: &str, body: &[u8]) -> Option<String> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(timestamp.as_bytes());
    mac.update(body);
    Some(STANDARD.encode(mac.finalize().into_bytes()))
}

pub const PAYMENT_SUCCESS: &str = "SUCCESS";
pub const PAYMENT_FAILED: &str = "FAILED";

/// The parts of a payment webhook the settlement flow reads.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct WebhookEvent {
    #[serde(default)]
    pub data: WebhookData,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct WebhookData {
    #[serde(default)]
    pub order: WebhookOrder,
    #[serde(default)]
    pub payment: WebhookPayment,
    #[serde(default)]
    pub error_details: Option<WebhookErrorDetails>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct WebhookOrder {
    #[serde(default)]
    pub order_id: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct WebhookPayment {
    #[serde(default)]
    pub payment_status: Option<String>,
    #[serde(default)]
    pub payment_amount: Option<serde_json::Value>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct WebhookErrorDetails {
    #[serde(default)]
    pub error_description: Option<String>,
}

impl WebhookEvent {
    pub fn order_id(&self) -> Option<&str> {
        self.data.order.order_id.as_deref()
    }

    pub fn payment_status(&self) -> Option<&str> {
        self.data.payment.payment_status.as_deref()
    }

    /// Amount the gateway reports as paid, when present and well formed.
    pub fn payment_amount(&self) -> Option<Amount> {
        self.data
            .payment
            .payment_amount
            .as_ref()
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    /// The reported amount, if it disagrees with the amount on the order.
    pub fn amount_mismatch(&self, expected: Amount) -> Option<Amount> {
        self.payment_amount()
            .filter(|reported| *reported != expected)
    }

    pub fn failure_reason(&self) -> String {
        self.data
            .error_details
            .as_ref()
            .and_then(|details| details.error_description.clone())
            .unwrap_or_else(|| "Payment failed".to_string())
    }
}
