use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Arbor Repair API",
        version = "0.3.0",
        description = r#"
# Arbor Device Repair API

Mail-in device repair service: customers submit a repair request, receive a
quote, pay a deposit and the balance through hosted checkout, and get the
device shipped back with a purchased label.

## Authentication

Admin endpoints require a JWT from `POST /api/v1/auth/login`:

```
Authorization: Bearer <token>
```

Public endpoints (intake, tracking, blog, webhooks) take no credentials.

## Error Handling

Errors use a consistent envelope with appropriate HTTP status codes:

```json
{
  "error": "Bad Request",
  "message": "Validation failed",
  "request_id": "4f1c...",
  "timestamp": "2026-01-01T00:00:00Z"
}
```

## Pagination

List endpoints accept `page` (default 1) and `limit` (default 20, max 100).
"#,
        contact(
            name = "Arbor Device Repair",
            email = "repairs@arborrepair.test"
        )
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "repair-requests", description = "Public intake and tracking"),
        (name = "blog", description = "Published blog content"),
        (name = "auth", description = "Admin authentication"),
        (name = "admin", description = "Admin back office"),
        (name = "webhooks", description = "Payment gateway callbacks")
    ),
    paths(
        // Public surface
        crate::handlers::repairs::create_repair_request,
        crate::handlers::repairs::track_repair_request,
        crate::handlers::blog::list_published_posts,
        crate::handlers::blog::get_published_post,
        crate::handlers::payment_webhooks::stripe_webhook,
        crate::handlers::auth::login,

        // Admin repair operations
        crate::handlers::repairs::list_repair_requests,
        crate::handlers::repairs::repair_stats,
        crate::handlers::repairs::get_repair_request,
        crate::handlers::repairs::send_quote,
        crate::handlers::repairs::request_final_payment,
        crate::handlers::repairs::generate_label,
        crate::handlers::repairs::resend_tracking,
        crate::handlers::repairs::update_repair_status,
        crate::handlers::repairs::cancel_repair_request,

        // Admin blog operations
        crate::handlers::blog::list_posts,
        crate::handlers::blog::create_post,
        crate::handlers::blog::get_post,
        crate::handlers::blog::update_post,
        crate::handlers::blog::delete_post,
        crate::handlers::blog::publish_post,
        crate::handlers::blog::unpublish_post,
    ),
    components(
        schemas(
            // Common types
            crate::ApiResponse<serde_json::Value>,

            // Repair request types
            crate::services::repair_orders::CreateRepairRequest,
            crate::services::repair_orders::SendQuoteRequest,
            crate::services::repair_orders::UpdateStatusRequest,
            crate::services::repair_orders::RepairRequestResponse,
            crate::services::repair_orders::TrackingResponse,
            crate::services::repair_orders::RepairRequestListResponse,
            crate::services::repair_orders::StatsResponse,
            crate::services::repair_orders::StatusCount,
            crate::services::repair_orders::PaymentLinkResponse,

            // Blog types
            crate::services::blog::CreateBlogPostRequest,
            crate::services::blog::UpdateBlogPostRequest,
            crate::services::blog::BlogPostResponse,
            crate::services::blog::BlogPostListResponse,

            // Auth types
            crate::handlers::auth::LoginRequest,
            crate::handlers::auth::TokenResponse,

            // Error types
            crate::errors::ErrorResponse
        )
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/docs")
        .url("/api-docs/openapi.json", ApiDoc::openapi())
        .config(utoipa_swagger_ui::Config::from("/api-docs/openapi.json").try_it_out_enabled(true))
}
