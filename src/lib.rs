//! Arbor Repair API Library
//!
//! Backend for a mail-in device repair shop: customers submit repair
//! requests and track them by ticket number, admins quote and drive the
//! repair lifecycle, Stripe webhooks record payments, and Shippo purchases
//! return-shipping labels. A small blog engine feeds the marketing site.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod generators;
pub mod handlers;
pub mod middleware;
pub mod migrator;
pub mod notifications;
pub mod observability;
pub mod openapi;
pub mod payments;
pub mod services;
pub mod shipping;

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use utoipa::ToSchema;

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: Arc<config::AppConfig>,
    pub services: handlers::AppServices,
    pub auth: Arc<auth::AuthService>,
    pub webhook_verifier: Arc<payments::WebhookVerifier>,
}

/// Standard envelope for JSON responses.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

/// Correlation metadata attached to every response envelope.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ResponseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            request_id: observability::current_request_id().map(|rid| rid.as_str().to_string()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message.into()),
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }

    pub fn validation_errors(errors: Vec<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: Some("Validation failed".to_string()),
            errors: Some(errors),
            meta: Some(ResponseMeta::capture()),
        }
    }
}

/// Convenience alias for handlers that return the standard envelope.
pub type ApiResult<T> = Result<Json<ApiResponse<T>>, errors::ServiceError>;

/// Builds the `/api/v1` router. State is injected by the caller.
pub fn api_v1_routes() -> Router<AppState> {
    let admin = Router::new()
        .nest("/repair-requests", handlers::repairs::admin_routes())
        .nest("/blog", handlers::blog::admin_routes());

    Router::new()
        .route("/status", get(api_status))
        .nest("/repair-requests", handlers::repairs::public_routes())
        .nest("/blog", handlers::blog::public_routes())
        .nest("/auth", handlers::auth::routes())
        .nest("/webhooks", handlers::payment_webhooks::routes())
        .nest("/admin", admin)
}

/// Liveness probe. Answers without touching any dependency so load
/// balancers can tell "process up" apart from "database down".
pub async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

/// Service status including database connectivity.
pub async fn api_status(State(state): State<AppState>) -> impl IntoResponse {
    let database = match state.db.ping().await {
        Ok(_) => "connected",
        Err(e) => {
            tracing::error!("Database ping failed: {}", e);
            "unavailable"
        }
    };

    let healthy = database == "connected";
    let code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        code,
        Json(json!({
            "status": if healthy { "ok" } else { "degraded" },
            "service": "arbor-repair-api",
            "version": env!("CARGO_PKG_VERSION"),
            "environment": state.config.environment,
            "checks": {
                "database": database,
            },
            "timestamp": Utc::now().to_rfc3339(),
        })),
    )
}
