use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tracing::info;
use utoipa::IntoParams;
use uuid::Uuid;

use crate::auth::AdminUser;
use crate::errors::ServiceError;
use crate::services::blog::{
    BlogPostListResponse, BlogPostResponse, CreateBlogPostRequest, UpdateBlogPostRequest,
};
use crate::{ApiResponse, ApiResult, AppState};

#[derive(Debug, Deserialize, IntoParams)]
pub struct BlogListQuery {
    pub page: Option<u64>,
    pub limit: Option<u64>,
}

#[utoipa::path(
    get,
    path = "/api/v1/blog/posts",
    params(BlogListQuery),
    responses(
        (status = 200, description = "Published posts", body = BlogPostListResponse)
    ),
    tag = "blog"
)]
pub async fn list_published_posts(
    State(state): State<AppState>,
    Query(query): Query<BlogListQuery>,
) -> ApiResult<BlogPostListResponse> {
    let response = state
        .services
        .blog
        .list_published(query.page.unwrap_or(1), query.limit.unwrap_or(20))
        .await?;
    Ok(Json(ApiResponse::success(response)))
}

#[utoipa::path(
    get,
    path = "/api/v1/blog/posts/{slug}",
    params(("slug" = String, Path, description = "Post slug")),
    responses(
        (status = 200, description = "Published post", body = BlogPostResponse),
        (status = 404, description = "No published post at this slug", body = crate::errors::ErrorResponse)
    ),
    tag = "blog"
)]
pub async fn get_published_post(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> ApiResult<BlogPostResponse> {
    let response = state.services.blog.get_published_by_slug(&slug).await?;
    Ok(Json(ApiResponse::success(response)))
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/blog/posts",
    params(BlogListQuery),
    responses(
        (status = 200, description = "All posts including drafts", body = BlogPostListResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn list_posts(
    State(state): State<AppState>,
    _admin: AdminUser,
    Query(query): Query<BlogListQuery>,
) -> ApiResult<BlogPostListResponse> {
    let response = state
        .services
        .blog
        .list_all(query.page.unwrap_or(1), query.limit.unwrap_or(20))
        .await?;
    Ok(Json(ApiResponse::success(response)))
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/blog/posts",
    request_body = CreateBlogPostRequest,
    responses(
        (status = 201, description = "Draft created", body = BlogPostResponse),
        (status = 400, description = "Invalid request", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 409, description = "No free slug", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn create_post(
    State(state): State<AppState>,
    admin: AdminUser,
    Json(payload): Json<CreateBlogPostRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    info!(admin = %admin.username, title = %payload.title, "Admin creating blog post");
    let response = state.services.blog.create_post(payload).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(response))))
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/blog/posts/{id}",
    params(("id" = Uuid, Path, description = "Post id")),
    responses(
        (status = 200, description = "Post", body = BlogPostResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn get_post(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
) -> ApiResult<BlogPostResponse> {
    let response = state.services.blog.get_post(id).await?;
    Ok(Json(ApiResponse::success(response)))
}

#[utoipa::path(
    put,
    path = "/api/v1/admin/blog/posts/{id}",
    params(("id" = Uuid, Path, description = "Post id")),
    request_body = UpdateBlogPostRequest,
    responses(
        (status = 200, description = "Post updated", body = BlogPostResponse),
        (status = 400, description = "Invalid request", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn update_post(
    State(state): State<AppState>,
    admin: AdminUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateBlogPostRequest>,
) -> ApiResult<BlogPostResponse> {
    info!(admin = %admin.username, post_id = %id, "Admin updating blog post");
    let response = state.services.blog.update_post(id, payload).await?;
    Ok(Json(ApiResponse::success(response)))
}

#[utoipa::path(
    delete,
    path = "/api/v1/admin/blog/posts/{id}",
    params(("id" = Uuid, Path, description = "Post id")),
    responses(
        (status = 200, description = "Post deleted"),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn delete_post(
    State(state): State<AppState>,
    admin: AdminUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    info!(admin = %admin.username, post_id = %id, "Admin deleting blog post");
    state.services.blog.delete_post(id).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Blog post deleted"
    })))
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/blog/posts/{id}/publish",
    params(("id" = Uuid, Path, description = "Post id")),
    responses(
        (status = 200, description = "Post published", body = BlogPostResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn publish_post(
    State(state): State<AppState>,
    admin: AdminUser,
    Path(id): Path<Uuid>,
) -> ApiResult<BlogPostResponse> {
    info!(admin = %admin.username, post_id = %id, "Admin publishing blog post");
    let response = state.services.blog.publish(id).await?;
    Ok(Json(ApiResponse::success(response)))
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/blog/posts/{id}/unpublish",
    params(("id" = Uuid, Path, description = "Post id")),
    responses(
        (status = 200, description = "Post unpublished", body = BlogPostResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn unpublish_post(
    State(state): State<AppState>,
    admin: AdminUser,
    Path(id): Path<Uuid>,
) -> ApiResult<BlogPostResponse> {
    info!(admin = %admin.username, post_id = %id, "Admin unpublishing blog post");
    let response = state.services.blog.unpublish(id).await?;
    Ok(Json(ApiResponse::success(response)))
}

pub fn public_routes() -> Router<AppState> {
    Router::new()
        .route("/posts", get(list_published_posts))
        .route("/posts/:slug", get(get_published_post))
}

pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/posts", get(list_posts).post(create_post))
        .route(
            "/posts/:id",
            get(get_post).put(update_post).delete(delete_post),
        )
        .route("/posts/:id/publish", post(publish_post))
        .route("/posts/:id/unpublish", post(unpublish_post))
}
