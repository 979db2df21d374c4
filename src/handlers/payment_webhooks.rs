use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
    Router,
};
use bytes::Bytes;
use tracing::info;

use crate::errors::ServiceError;
use crate::payments::{parse_event, GatewayEvent};
use crate::services::repair_orders::PaymentOutcome;
use crate::AppState;

pub const SIGNATURE_HEADER: &str = "Stripe-Signature";

/// Payment gateway webhook. The signature is checked against the raw body
/// before anything is parsed, and replayed event ids are acknowledged
/// without being applied again.
#[utoipa::path(
    post,
    path = "/api/v1/webhooks/stripe",
    request_body = String,
    responses(
        (status = 200, description = "Webhook accepted"),
        (status = 400, description = "Malformed payload or missing metadata", body = crate::errors::ErrorResponse),
        (status = 401, description = "Invalid signature", body = crate::errors::ErrorResponse),
        (status = 404, description = "No matching repair request", body = crate::errors::ErrorResponse),
        (status = 409, description = "Concurrent modification, retry delivery", body = crate::errors::ErrorResponse)
    ),
    tag = "webhooks"
)]
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ServiceError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| {
            ServiceError::Unauthorized(format!("Missing {} header", SIGNATURE_HEADER))
        })?;

    state.webhook_verifier.verify(&body, signature)?;

    match parse_event(&body)? {
        GatewayEvent::Ignored { event_type } => {
            info!(event_type = %event_type, "Ignoring webhook event type");
        }
        GatewayEvent::CheckoutCompleted(completed) => {
            match state.services.repair_orders.record_payment(completed).await? {
                PaymentOutcome::Recorded(response) => {
                    info!(
                        ticket_number = %response.ticket_number,
                        payment_status = %response.payment_status,
                        "Webhook payment applied"
                    );
                }
                PaymentOutcome::Duplicate => {}
            }
        }
    }

    Ok((StatusCode::OK, "ok"))
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/stripe", post(stripe_webhook))
}
