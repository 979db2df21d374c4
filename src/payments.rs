use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::PaymentsConfig;
use crate::errors::ServiceError;

type HmacSha256 = Hmac<Sha256>;

/// Which leg of the payment flow a checkout session collects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentType {
    Deposit,
    Final,
}

impl PaymentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deposit => "deposit",
            Self::Final => "final",
        }
    }

    /// Metadata values other than the two known tags are treated as
    /// untagged partial payments by the caller.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "deposit" => Some(Self::Deposit),
            "final" => Some(Self::Final),
            _ => None,
        }
    }
}

/// Input for opening a hosted checkout session.
#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub amount_minor: i64,
    pub description: String,
    pub customer_email: String,
    pub success_url: String,
    pub cancel_url: String,
    pub ticket_number: String,
    pub payment_type: PaymentType,
    pub request_id: Uuid,
}

/// A hosted checkout session the customer is redirected to.
#[derive(Debug, Clone)]
pub struct CheckoutSession {
    pub session_id: String,
    pub hosted_url: String,
}

/// Payment gateway operations the lifecycle engine depends on.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_checkout_session(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, ServiceError>;
}

/// Completed-checkout webhook event after verification and parsing.
#[derive(Debug, Clone)]
pub struct CheckoutCompleted {
    pub event_id: String,
    pub session_id: String,
    pub amount_total: i64,
    pub payment_intent_id: Option<String>,
    pub ticket_number: Option<String>,
    pub payment_type: Option<PaymentType>,
    pub request_id: Option<Uuid>,
}

/// Outcome of parsing a verified webhook payload.
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    CheckoutCompleted(CheckoutCompleted),
    /// Event types the system does not act on; acknowledged and dropped.
    Ignored { event_type: String },
}

/// Verifies `Stripe-Signature` headers: HMAC-SHA256 over `"{t}.{body}"`
/// with the shared webhook secret, constant-time comparison, bounded
/// timestamp skew.
#[derive(Debug, Clone)]
pub struct WebhookVerifier {
    secret: String,
    tolerance_secs: u64,
}

impl WebhookVerifier {
    pub fn new(secret: impl Into<String>, tolerance_secs: u64) -> Self {
        Self {
            secret: secret.into(),
            tolerance_secs,
        }
    }

    pub fn from_config(cfg: &PaymentsConfig) -> Self {
        Self::new(cfg.webhook_secret.clone(), cfg.webhook_tolerance_secs)
    }

    pub fn verify(&self, payload: &[u8], signature_header: &str) -> Result<(), ServiceError> {
        self.verify_at(payload, signature_header, chrono::Utc::now().timestamp())
    }

    fn verify_at(
        &self,
        payload: &[u8],
        signature_header: &str,
        now: i64,
    ) -> Result<(), ServiceError> {
        let (timestamp, provided) = parse_signature_header(signature_header).ok_or_else(|| {
            ServiceError::Unauthorized("malformed webhook signature header".to_string())
        })?;

        if (now - timestamp).unsigned_abs() > self.tolerance_secs {
            return Err(ServiceError::Unauthorized(
                "webhook timestamp outside tolerance".to_string(),
            ));
        }

        let signed = format!(
            "{}.{}",
            timestamp,
            std::str::from_utf8(payload).unwrap_or("")
        );
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(signed.as_bytes());
        let expected = hex::encode(mac.finalize().into_bytes());

        if constant_time_eq(&expected, &provided) {
            Ok(())
        } else {
            Err(ServiceError::Unauthorized(
                "invalid webhook signature".to_string(),
            ))
        }
    }
}

fn parse_signature_header(header: &str) -> Option<(i64, String)> {
    let mut timestamp = None;
    let mut v1 = None;
    for part in header.split(',') {
        let mut it = part.trim().splitn(2, '=');
        match (it.next(), it.next()) {
            (Some("t"), Some(val)) => timestamp = val.parse::<i64>().ok(),
            (Some("v1"), Some(val)) => v1 = Some(val.to_string()),
            _ => {}
        }
    }
    Some((timestamp?, v1?))
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        res |= x ^ y;
    }
    res == 0
}

/// Parses a verified webhook payload into a gateway event.
pub fn parse_event(payload: &[u8]) -> Result<GatewayEvent, ServiceError> {
    let json: Value = serde_json::from_slice(payload)
        .map_err(|e| ServiceError::BadRequest(format!("invalid webhook json: {}", e)))?;

    let event_type = json
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();

    if event_type != "checkout.session.completed" {
        return Ok(GatewayEvent::Ignored { event_type });
    }

    let event_id = json
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| ServiceError::BadRequest("webhook event missing id".to_string()))?
        .to_string();

    let object = json
        .pointer("/data/object")
        .ok_or_else(|| ServiceError::BadRequest("webhook event missing data.object".to_string()))?;

    let session_id = object
        .get("id")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let amount_total = object
        .get("amount_total")
        .and_then(Value::as_i64)
        .unwrap_or(0);
    let payment_intent_id = object
        .get("payment_intent")
        .and_then(Value::as_str)
        .map(str::to_owned);

    let metadata = object.get("metadata");
    let meta_str = |key: &str| {
        metadata
            .and_then(|m| m.get(key))
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .map(str::to_owned)
    };

    let ticket_number = meta_str("ticket_number");
    let payment_type = meta_str("payment_type").and_then(|v| PaymentType::parse(&v));
    let request_id = meta_str("request_id").and_then(|v| Uuid::parse_str(&v).ok());

    Ok(GatewayEvent::CheckoutCompleted(CheckoutCompleted {
        event_id,
        session_id,
        amount_total,
        payment_intent_id,
        ticket_number,
        payment_type,
        request_id,
    }))
}

/// Stripe-backed gateway adapter. Sessions are created through the
/// form-encoded REST surface; no SDK dependency.
#[derive(Clone)]
pub struct StripeGateway {
    http: reqwest::Client,
    api_base: String,
    secret_key: String,
    currency: String,
}

#[derive(Debug, Deserialize)]
struct StripeSessionResponse {
    id: String,
    url: String,
}

impl StripeGateway {
    pub fn new(cfg: &PaymentsConfig) -> Result<Self, ServiceError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .map_err(|e| {
                ServiceError::InternalError(format!("failed to build payment http client: {}", e))
            })?;
        Ok(Self {
            http,
            api_base: cfg.api_base.trim_end_matches('/').to_string(),
            secret_key: cfg.secret_key.clone(),
            currency: cfg.currency.clone(),
        })
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn create_checkout_session(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, ServiceError> {
        let amount = request.amount_minor.to_string();
        let request_id = request.request_id.to_string();
        let form: Vec<(&str, &str)> = vec![
            ("mode", "payment"),
            ("customer_email", &request.customer_email),
            ("success_url", &request.success_url),
            ("cancel_url", &request.cancel_url),
            ("line_items[0][price_data][currency]", &self.currency),
            (
                "line_items[0][price_data][product_data][name]",
                &request.description,
            ),
            ("line_items[0][price_data][unit_amount]", &amount),
            ("line_items[0][quantity]", "1"),
            ("metadata[ticket_number]", &request.ticket_number),
            ("metadata[payment_type]", request.payment_type.as_str()),
            ("metadata[request_id]", &request_id),
        ];

        let response = self
            .http
            .post(format!("{}/v1/checkout/sessions", self.api_base))
            .bearer_auth(&self.secret_key)
            .form(&form)
            .send()
            .await
            .map_err(|e| {
                warn!("Payment gateway request error: {}", e);
                ServiceError::ExternalServiceError("payment gateway unreachable".to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(
                status = status.as_u16(),
                body = %body,
                "Checkout session creation rejected"
            );
            return Err(ServiceError::ExternalServiceError(
                "payment gateway rejected the checkout session".to_string(),
            ));
        }

        let session: StripeSessionResponse = response.json().await.map_err(|e| {
            warn!("Payment gateway returned unparseable session: {}", e);
            ServiceError::ExternalServiceError(
                "payment gateway returned an invalid response".to_string(),
            )
        })?;

        info!(
            session_id = %session.id,
            ticket_number = %request.ticket_number,
            payment_type = request.payment_type.as_str(),
            "Checkout session created"
        );

        Ok(CheckoutSession {
            session_id: session.id,
            hosted_url: session.url,
        })
    }
}
