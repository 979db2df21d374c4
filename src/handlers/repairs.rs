use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tracing::info;
use utoipa::IntoParams;
use uuid::Uuid;

use crate::auth::AdminUser;
use crate::errors::ServiceError;
use crate::services::repair_orders::{
    CreateRepairRequest, RepairRequestListResponse, RepairRequestResponse, SendQuoteRequest,
    StatsResponse, TrackingResponse, UpdateStatusRequest,
};
use crate::{ApiResponse, ApiResult, AppState};

#[derive(Debug, Deserialize, IntoParams)]
pub struct RepairListQuery {
    /// Filter by lifecycle status; accepts the legacy aliases too.
    pub status: Option<String>,
    pub page: Option<u64>,
    pub limit: Option<u64>,
}

/// Public intake endpoint for the repair form.
#[utoipa::path(
    post,
    path = "/api/v1/repair-requests",
    request_body = CreateRepairRequest,
    responses(
        (status = 201, description = "Repair request created", body = RepairRequestResponse),
        (status = 400, description = "Invalid request", body = crate::errors::ErrorResponse),
        (status = 409, description = "Ticket number allocation failed", body = crate::errors::ErrorResponse),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse)
    ),
    tag = "repair-requests"
)]
pub async fn create_repair_request(
    State(state): State<AppState>,
    Json(payload): Json<CreateRepairRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let response = state.services.repair_orders.create_request(payload).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(response))))
}

/// Public tracking lookup by ticket number.
#[utoipa::path(
    get,
    path = "/api/v1/repair-requests/track/{ticket_number}",
    params(
        ("ticket_number" = String, Path, description = "Ticket number from the confirmation email")
    ),
    responses(
        (status = 200, description = "Tracking information", body = TrackingResponse),
        (status = 404, description = "Unknown ticket number", body = crate::errors::ErrorResponse)
    ),
    tag = "repair-requests"
)]
pub async fn track_repair_request(
    State(state): State<AppState>,
    Path(ticket_number): Path<String>,
) -> ApiResult<TrackingResponse> {
    let response = state.services.repair_orders.track(&ticket_number).await?;
    Ok(Json(ApiResponse::success(response)))
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/repair-requests",
    params(RepairListQuery),
    responses(
        (status = 200, description = "Repair requests", body = RepairRequestListResponse),
        (status = 400, description = "Unknown status filter", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn list_repair_requests(
    State(state): State<AppState>,
    _admin: AdminUser,
    Query(query): Query<RepairListQuery>,
) -> ApiResult<RepairRequestListResponse> {
    let response = state
        .services
        .repair_orders
        .list_requests(
            query.status.as_deref(),
            query.page.unwrap_or(1),
            query.limit.unwrap_or(20),
        )
        .await?;
    Ok(Json(ApiResponse::success(response)))
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/repair-requests/stats",
    responses(
        (status = 200, description = "Ticket counts by status", body = StatsResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn repair_stats(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> ApiResult<StatsResponse> {
    let response = state.services.repair_orders.stats().await?;
    Ok(Json(ApiResponse::success(response)))
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/repair-requests/{id}",
    params(("id" = Uuid, Path, description = "Repair request id")),
    responses(
        (status = 200, description = "Repair request", body = RepairRequestResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn get_repair_request(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
) -> ApiResult<RepairRequestResponse> {
    let response = state.services.repair_orders.get_request(id).await?;
    Ok(Json(ApiResponse::success(response)))
}

/// Issues a quote and opens a checkout session for the deposit (or the full
/// quote when no deposit was set).
#[utoipa::path(
    post,
    path = "/api/v1/admin/repair-requests/{id}/quote",
    params(("id" = Uuid, Path, description = "Repair request id")),
    request_body = SendQuoteRequest,
    responses(
        (status = 200, description = "Quote sent", body = crate::services::repair_orders::PaymentLinkResponse),
        (status = 400, description = "Invalid amounts or lifecycle state", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Concurrent modification", body = crate::errors::ErrorResponse),
        (status = 502, description = "Payment gateway failure", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn send_quote(
    State(state): State<AppState>,
    admin: AdminUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<SendQuoteRequest>,
) -> ApiResult<crate::services::repair_orders::PaymentLinkResponse> {
    info!(admin = %admin.username, request_id = %id, "Admin sending quote");
    let response = state.services.repair_orders.send_quote(id, payload).await?;
    Ok(Json(ApiResponse::success(response)))
}

/// Opens a checkout session for the remaining balance.
#[utoipa::path(
    post,
    path = "/api/v1/admin/repair-requests/{id}/final-payment",
    params(("id" = Uuid, Path, description = "Repair request id")),
    responses(
        (status = 200, description = "Final payment requested", body = crate::services::repair_orders::PaymentLinkResponse),
        (status = 400, description = "No deposit on file or nothing left to collect", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Concurrent modification", body = crate::errors::ErrorResponse),
        (status = 502, description = "Payment gateway failure", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn request_final_payment(
    State(state): State<AppState>,
    admin: AdminUser,
    Path(id): Path<Uuid>,
) -> ApiResult<crate::services::repair_orders::PaymentLinkResponse> {
    info!(admin = %admin.username, request_id = %id, "Admin requesting final payment");
    let response = state.services.repair_orders.request_final_payment(id).await?;
    Ok(Json(ApiResponse::success(response)))
}

/// Buys a return shipping label and marks the ticket shipped.
#[utoipa::path(
    post,
    path = "/api/v1/admin/repair-requests/{id}/label",
    params(("id" = Uuid, Path, description = "Repair request id")),
    responses(
        (status = 200, description = "Label purchased", body = RepairRequestResponse),
        (status = 400, description = "Not paid in full or label already exists", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Concurrent modification", body = crate::errors::ErrorResponse),
        (status = 502, description = "Shipping provider failure", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn generate_label(
    State(state): State<AppState>,
    admin: AdminUser,
    Path(id): Path<Uuid>,
) -> ApiResult<RepairRequestResponse> {
    info!(admin = %admin.username, request_id = %id, "Admin generating return label");
    let response = state.services.repair_orders.generate_label(id).await?;
    Ok(Json(ApiResponse::success(response)))
}

/// Re-sends the shipping notice email for a shipped ticket.
#[utoipa::path(
    post,
    path = "/api/v1/admin/repair-requests/{id}/resend-tracking",
    params(("id" = Uuid, Path, description = "Repair request id")),
    responses(
        (status = 200, description = "Tracking email sent"),
        (status = 400, description = "No tracking information on file", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse),
        (status = 502, description = "Email provider failure", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn resend_tracking(
    State(state): State<AppState>,
    admin: AdminUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    info!(admin = %admin.username, request_id = %id, "Admin resending tracking email");
    state.services.repair_orders.resend_tracking(id).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Tracking email sent"
    })))
}

/// Admin status override; accepts the legacy APPROVED and COMPLETED names.
#[utoipa::path(
    put,
    path = "/api/v1/admin/repair-requests/{id}/status",
    params(("id" = Uuid, Path, description = "Repair request id")),
    request_body = UpdateStatusRequest,
    responses(
        (status = 200, description = "Status updated", body = RepairRequestResponse),
        (status = 400, description = "Unknown status", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Concurrent modification", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn update_repair_status(
    State(state): State<AppState>,
    admin: AdminUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateStatusRequest>,
) -> ApiResult<RepairRequestResponse> {
    info!(
        admin = %admin.username,
        request_id = %id,
        status = %payload.status,
        "Admin updating repair status"
    );
    let response = state
        .services
        .repair_orders
        .update_status(id, &payload.status)
        .await?;
    Ok(Json(ApiResponse::success(response)))
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/repair-requests/{id}/cancel",
    params(("id" = Uuid, Path, description = "Repair request id")),
    responses(
        (status = 200, description = "Repair request cancelled", body = RepairRequestResponse),
        (status = 400, description = "Already in a terminal state", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Concurrent modification", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn cancel_repair_request(
    State(state): State<AppState>,
    admin: AdminUser,
    Path(id): Path<Uuid>,
) -> ApiResult<RepairRequestResponse> {
    info!(admin = %admin.username, request_id = %id, "Admin cancelling repair request");
    let response = state.services.repair_orders.cancel(id).await?;
    Ok(Json(ApiResponse::success(response)))
}

pub fn public_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_repair_request))
        .route("/track/:ticket_number", get(track_repair_request))
}

pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_repair_requests))
        .route("/stats", get(repair_stats))
        .route("/:id", get(get_repair_request))
        .route("/:id/quote", post(send_quote))
        .route("/:id/final-payment", post(request_final_payment))
        .route("/:id/label", post(generate_label))
        .route("/:id/resend-tracking", post(resend_tracking))
        .route("/:id/status", put(update_repair_status))
        .route("/:id/cancel", post(cancel_repair_request))
}
