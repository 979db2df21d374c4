use std::sync::Arc;

use chrono::{DateTime, Utc};
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::db::DbPool;
use crate::entities::blog_post::{self, Entity as BlogPostEntity};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::generators::{slug_with_suffix, slugify, MAX_SLUG_ATTEMPTS};

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct CreateBlogPostRequest {
    #[validate(length(min = 1, max = 200, message = "Title must be 1-200 characters"))]
    pub title: String,

    /// Explicit slug override; normalized to URL-safe form either way.
    pub slug: Option<String>,

    #[validate(length(min = 1, message = "Content is required"))]
    pub content: String,

    #[validate(length(max = 500, message = "Excerpt must be at most 500 characters"))]
    pub excerpt: Option<String>,
}

/// Partial update; absent fields are left unchanged. The slug only moves
/// when explicitly provided, so published URLs stay stable across edits.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct UpdateBlogPostRequest {
    #[validate(length(min = 1, max = 200, message = "Title must be 1-200 characters"))]
    pub title: Option<String>,

    pub slug: Option<String>,

    #[validate(length(min = 1, message = "Content cannot be empty"))]
    pub content: Option<String>,

    #[validate(length(max = 500, message = "Excerpt must be at most 500 characters"))]
    pub excerpt: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BlogPostResponse {
    pub id: Uuid,
    pub title: String,
    pub slug: String,
    pub excerpt: Option<String>,
    pub content: String,
    pub published: bool,
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BlogPostListResponse {
    pub posts: Vec<BlogPostResponse>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

#[derive(Clone)]
pub struct BlogService {
    db_pool: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
}

impl BlogService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Option<Arc<EventSender>>) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    /// Creates a draft post. The slug comes from the explicit override or
    /// the title, suffixed `-2`, `-3`, ... until it is unique.
    #[instrument(skip(self, request), fields(title = %request.title))]
    pub async fn create_post(
        &self,
        request: CreateBlogPostRequest,
    ) -> Result<BlogPostResponse, ServiceError> {
        request
            .validate()
            .map_err(|e| ServiceError::ValidationError(e.to_string()))?;

        let base = slugify(request.slug.as_deref().unwrap_or(&request.title));
        let slug = self.allocate_slug(&base, None).await?;

        let now = Utc::now();
        let active = blog_post::ActiveModel {
            id: Set(Uuid::new_v4()),
            title: Set(request.title.clone()),
            slug: Set(slug),
            content: Set(request.content.clone()),
            excerpt: Set(request.excerpt.clone()),
            published: Set(false),
            published_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let model = active.insert(&*self.db_pool).await.map_err(|e| {
            error!(error = %e, "Failed to insert blog post");
            ServiceError::DatabaseError(e)
        })?;

        info!(post_id = %model.id, slug = %model.slug, "Created blog post");
        Ok(self.to_response(&model))
    }

    /// Published posts, newest publication first.
    pub async fn list_published(
        &self,
        page: u64,
        per_page: u64,
    ) -> Result<BlogPostListResponse, ServiceError> {
        let query = BlogPostEntity::find()
            .filter(blog_post::Column::Published.eq(true))
            .order_by_desc(blog_post::Column::PublishedAt);
        self.paginate(query, page, per_page).await
    }

    /// Single published post for the public site. Drafts stay invisible.
    pub async fn get_published_by_slug(&self, slug: &str) -> Result<BlogPostResponse, ServiceError> {
        let model = BlogPostEntity::find()
            .filter(blog_post::Column::Slug.eq(slug))
            .filter(blog_post::Column::Published.eq(true))
            .one(&*self.db_pool)
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to fetch blog post");
                ServiceError::DatabaseError(e)
            })?
            .ok_or_else(|| ServiceError::NotFound(format!("No published post at '{}'", slug)))?;

        Ok(self.to_response(&model))
    }

    /// Admin listing; includes drafts, newest first.
    pub async fn list_all(
        &self,
        page: u64,
        per_page: u64,
    ) -> Result<BlogPostListResponse, ServiceError> {
        let query = BlogPostEntity::find().order_by_desc(blog_post::Column::CreatedAt);
        self.paginate(query, page, per_page).await
    }

    pub async fn get_post(&self, id: Uuid) -> Result<BlogPostResponse, ServiceError> {
        let model = self.load(id).await?;
        Ok(self.to_response(&model))
    }

    #[instrument(skip(self, request), fields(post_id = %id))]
    pub async fn update_post(
        &self,
        id: Uuid,
        request: UpdateBlogPostRequest,
    ) -> Result<BlogPostResponse, ServiceError> {
        request
            .validate()
            .map_err(|e| ServiceError::ValidationError(e.to_string()))?;

        let model = self.load(id).await?;

        let new_slug = match &request.slug {
            Some(raw) => {
                let base = slugify(raw);
                if base == model.slug {
                    None
                } else {
                    Some(self.allocate_slug(&base, Some(id)).await?)
                }
            }
            None => None,
        };

        let mut active: blog_post::ActiveModel = model.into();
        if let Some(title) = request.title {
            active.title = Set(title);
        }
        if let Some(slug) = new_slug {
            active.slug = Set(slug);
        }
        if let Some(content) = request.content {
            active.content = Set(content);
        }
        if let Some(excerpt) = request.excerpt {
            active.excerpt = Set(Some(excerpt));
        }
        active.updated_at = Set(Utc::now());

        let updated = active.update(&*self.db_pool).await.map_err(|e| {
            error!(error = %e, post_id = %id, "Failed to update blog post");
            ServiceError::DatabaseError(e)
        })?;

        info!(post_id = %id, "Updated blog post");
        Ok(self.to_response(&updated))
    }

    #[instrument(skip(self), fields(post_id = %id))]
    pub async fn delete_post(&self, id: Uuid) -> Result<(), ServiceError> {
        let result = BlogPostEntity::delete_by_id(id)
            .exec(&*self.db_pool)
            .await
            .map_err(|e| {
                error!(error = %e, post_id = %id, "Failed to delete blog post");
                ServiceError::DatabaseError(e)
            })?;

        if result.rows_affected == 0 {
            return Err(ServiceError::NotFound(format!(
                "Blog post {} not found",
                id
            )));
        }

        info!(post_id = %id, "Deleted blog post");
        Ok(())
    }

    /// Makes a post visible. `published_at` is stamped on the first publish
    /// only and survives later unpublish/republish cycles.
    #[instrument(skip(self), fields(post_id = %id))]
    pub async fn publish(&self, id: Uuid) -> Result<BlogPostResponse, ServiceError> {
        let model = self.load(id).await?;
        if model.published {
            return Ok(self.to_response(&model));
        }

        let published_at = publish_timestamp(&model, Utc::now());
        let mut active: blog_post::ActiveModel = model.into();
        active.published = Set(true);
        active.published_at = Set(Some(published_at));
        active.updated_at = Set(Utc::now());

        let updated = active.update(&*self.db_pool).await.map_err(|e| {
            error!(error = %e, post_id = %id, "Failed to publish blog post");
            ServiceError::DatabaseError(e)
        })?;

        info!(post_id = %id, slug = %updated.slug, "Published blog post");

        if let Some(event_sender) = &self.event_sender {
            if let Err(e) = event_sender.send(Event::BlogPostPublished(id)).await {
                warn!("Failed to send event: {}", e);
            }
        }

        Ok(self.to_response(&updated))
    }

    #[instrument(skip(self), fields(post_id = %id))]
    pub async fn unpublish(&self, id: Uuid) -> Result<BlogPostResponse, ServiceError> {
        let model = self.load(id).await?;
        if !model.published {
            return Ok(self.to_response(&model));
        }

        let mut active: blog_post::ActiveModel = model.into();
        active.published = Set(false);
        active.updated_at = Set(Utc::now());

        let updated = active.update(&*self.db_pool).await.map_err(|e| {
            error!(error = %e, post_id = %id, "Failed to unpublish blog post");
            ServiceError::DatabaseError(e)
        })?;

        info!(post_id = %id, "Unpublished blog post");
        Ok(self.to_response(&updated))
    }

    async fn load(&self, id: Uuid) -> Result<blog_post::Model, ServiceError> {
        BlogPostEntity::find_by_id(id)
            .one(&*self.db_pool)
            .await
            .map_err(|e| {
                error!(error = %e, post_id = %id, "Failed to fetch blog post");
                ServiceError::DatabaseError(e)
            })?
            .ok_or_else(|| ServiceError::NotFound(format!("Blog post {} not found", id)))
    }

    /// Probes `base`, `base-2`, `base-3`, ... against the store. When
    /// renaming an existing post its own row is excluded from the probe.
    async fn allocate_slug(
        &self,
        base: &str,
        current_id: Option<Uuid>,
    ) -> Result<String, ServiceError> {
        for attempt in 1..=MAX_SLUG_ATTEMPTS {
            let candidate = if attempt == 1 {
                base.to_string()
            } else {
                slug_with_suffix(base, attempt)
            };

            let mut query =
                BlogPostEntity::find().filter(blog_post::Column::Slug.eq(candidate.as_str()));
            if let Some(id) = current_id {
                query = query.filter(blog_post::Column::Id.ne(id));
            }

            let existing = query
                .one(&*self.db_pool)
                .await
                .map_err(ServiceError::DatabaseError)?;
            if existing.is_none() {
                return Ok(candidate);
            }
        }

        Err(ServiceError::Conflict(format!(
            "Could not find a free slug for '{}'",
            base
        )))
    }

    async fn paginate(
        &self,
        query: sea_orm::Select<BlogPostEntity>,
        page: u64,
        per_page: u64,
    ) -> Result<BlogPostListResponse, ServiceError> {
        let page = page.max(1);
        let per_page = per_page.clamp(1, 100);
        let paginator = query.paginate(&*self.db_pool, per_page);

        let total = paginator.num_items().await.map_err(|e| {
            error!(error = %e, "Failed to count blog posts");
            ServiceError::DatabaseError(e)
        })?;
        let models = paginator.fetch_page(page - 1).await.map_err(|e| {
            error!(error = %e, "Failed to fetch blog posts");
            ServiceError::DatabaseError(e)
        })?;

        Ok(BlogPostListResponse {
            posts: models.iter().map(|m| self.to_response(m)).collect(),
            total,
            page,
            per_page,
        })
    }

    fn to_response(&self, model: &blog_post::Model) -> BlogPostResponse {
        BlogPostResponse {
            id: model.id,
            title: model.title.clone(),
            slug: model.slug.clone(),
            excerpt: model.excerpt.clone(),
            content: model.content.clone(),
            published: model.published,
            published_at: model.published_at,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

/// First publish stamps now; republishing keeps the original timestamp.
fn publish_timestamp(model: &blog_post::Model, now: DateTime<Utc>) -> DateTime<Utc> {
    model.published_at.unwrap_or(now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use sea_orm::{DatabaseBackend, DatabaseConnection, MockDatabase, MockExecResult};
    use tokio::sync::mpsc;

    fn sample_post(slug: &str, published: bool) -> blog_post::Model {
        blog_post::Model {
            id: Uuid::new_v4(),
            title: "Fixing Stick Drift".to_string(),
            slug: slug.to_string(),
            content: "Open the controller and clean the potentiometer.".to_string(),
            excerpt: Some("A short guide.".to_string()),
            published,
            published_at: if published { Some(Utc::now()) } else { None },
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn create_post_rejects_empty_title() {
        let service = BlogService::new(Arc::new(DatabaseConnection::Disconnected), None);
        let result = service
            .create_post(CreateBlogPostRequest {
                title: String::new(),
                slug: None,
                content: "body".to_string(),
                excerpt: None,
            })
            .await;
        assert_matches!(result, Err(ServiceError::ValidationError(_)));
    }

    #[tokio::test]
    async fn create_post_takes_suffixed_slug_when_base_is_taken() {
        let taken = sample_post("fixing-stick-drift", true);
        let created = sample_post("fixing-stick-drift-2", false);
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![taken]])
            .append_query_results([Vec::<blog_post::Model>::new()])
            .append_query_results([vec![created]])
            .into_connection();
        let service = BlogService::new(Arc::new(db), None);

        let response = service
            .create_post(CreateBlogPostRequest {
                title: "Fixing Stick Drift".to_string(),
                slug: None,
                content: "Open the controller and clean the potentiometer.".to_string(),
                excerpt: None,
            })
            .await
            .unwrap();

        assert_eq!(response.slug, "fixing-stick-drift-2");
        assert!(!response.published);
    }

    #[tokio::test]
    async fn publish_emits_event() {
        let draft = sample_post("fixing-stick-drift", false);
        let mut published = draft.clone();
        published.published = true;
        published.published_at = Some(Utc::now());

        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![draft]])
            .append_query_results([vec![published]])
            .into_connection();

        let (tx, mut rx) = mpsc::channel(8);
        let service = BlogService::new(Arc::new(db), Some(Arc::new(EventSender::new(tx))));

        let response = service.publish(Uuid::new_v4()).await.unwrap();
        assert!(response.published);
        assert!(response.published_at.is_some());
        assert_matches!(rx.recv().await, Some(Event::BlogPostPublished(_)));
    }

    #[tokio::test]
    async fn publish_is_idempotent_for_published_posts() {
        let model = sample_post("fixing-stick-drift", true);
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![model]])
            .into_connection();

        let (tx, mut rx) = mpsc::channel(8);
        let service = BlogService::new(Arc::new(db), Some(Arc::new(EventSender::new(tx))));

        let response = service.publish(Uuid::new_v4()).await.unwrap();
        assert!(response.published);
        // No update ran and no event was emitted.
        drop(service);
        assert_matches!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn republish_preserves_original_timestamp() {
        let first = Utc::now() - chrono::Duration::days(30);
        let mut model = sample_post("fixing-stick-drift", false);
        model.published_at = Some(first);

        assert_eq!(publish_timestamp(&model, Utc::now()), first);

        model.published_at = None;
        let now = Utc::now();
        assert_eq!(publish_timestamp(&model, now), now);
    }

    #[tokio::test]
    async fn get_published_by_slug_hides_drafts() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([Vec::<blog_post::Model>::new()])
            .into_connection();
        let service = BlogService::new(Arc::new(db), None);

        let result = service.get_published_by_slug("fixing-stick-drift").await;
        assert_matches!(result, Err(ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn delete_post_reports_missing_rows() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results([MockExecResult {
                last_insert_id: 0,
                rows_affected: 0,
            }])
            .into_connection();
        let service = BlogService::new(Arc::new(db), None);

        let result = service.delete_post(Uuid::new_v4()).await;
        assert_matches!(result, Err(ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn update_post_keeps_slug_unless_explicitly_changed() {
        let model = sample_post("fixing-stick-drift", true);
        let mut updated = model.clone();
        updated.title = "Fixing Stick Drift, Revisited".to_string();

        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![model]])
            .append_query_results([vec![updated]])
            .into_connection();
        let service = BlogService::new(Arc::new(db), None);

        let response = service
            .update_post(
                Uuid::new_v4(),
                UpdateBlogPostRequest {
                    title: Some("Fixing Stick Drift, Revisited".to_string()),
                    slug: None,
                    content: None,
                    excerpt: None,
                },
            )
            .await
            .unwrap();

        assert_eq!(response.slug, "fixing-stick-drift");
        assert_eq!(response.title, "Fixing Stick Drift, Revisited");
    }
}
