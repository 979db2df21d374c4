use std::sync::Arc;

use chrono::Utc;
use futures::future::try_join_all;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, Iterable, PaginatorTrait,
    QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::config::AppConfig;
use crate::db::{is_unique_violation, DbPool};
use crate::entities::repair_request::{
    self, Entity as RepairRequestEntity, PaymentStatus, RepairStatus,
};
use crate::entities::webhook_event::{self, Entity as WebhookEventEntity};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::generators::{
    is_ticket_shaped, normalize_ticket, ticket_candidate, ticket_fallback,
    TICKET_GENERATION_ATTEMPTS,
};
use crate::notifications::{self, format_money, EmailTemplate, NotificationSender, TemplateVars};
use crate::payments::{
    CheckoutCompleted, CheckoutRequest, CheckoutSession, PaymentGateway, PaymentType,
};
use crate::shipping::{select_rate, tracking_url_for, Address, LabelProvider, Parcel};

/// Intake form submitted by a customer.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct CreateRepairRequest {
    #[validate(length(min = 1, max = 100, message = "Device type must be 1-100 characters"))]
    pub device_type: String,

    #[validate(length(
        min = 1,
        max = 5000,
        message = "Issue description must be 1-5000 characters"
    ))]
    pub issue_description: String,

    /// Issue tags picked from the intake form checklist.
    #[serde(default)]
    pub common_issues: Vec<String>,

    #[validate(length(min = 1, max = 200, message = "Customer name must be 1-200 characters"))]
    pub customer_name: String,

    #[validate(email(message = "Customer email must be a valid email address"))]
    pub customer_email: String,

    pub customer_phone: Option<String>,

    #[validate(length(min = 1, max = 300, message = "Shipping address is required"))]
    pub shipping_address: String,

    #[validate(length(min = 1, max = 100, message = "Shipping city is required"))]
    pub shipping_city: String,

    #[validate(length(min = 1, max = 100, message = "Shipping state is required"))]
    pub shipping_state: String,

    #[validate(length(min = 1, max = 20, message = "Shipping ZIP code is required"))]
    pub shipping_zip: String,
}

/// Quote issued by an admin, in minor currency units.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct SendQuoteRequest {
    #[validate(range(min = 1, message = "Quote amount must be positive"))]
    pub quote_amount: i64,

    /// Optional up-front deposit; must not exceed the quote.
    #[validate(range(min = 1, message = "Deposit amount must be positive"))]
    pub deposit_amount: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct UpdateStatusRequest {
    #[validate(length(min = 1, message = "Status is required"))]
    pub status: String,
}

/// Admin-facing projection of a repair request.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RepairRequestResponse {
    pub id: Uuid,
    pub ticket_number: String,
    pub device_type: String,
    pub issue_description: String,
    pub common_issues: Vec<String>,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: Option<String>,
    pub shipping_address: String,
    pub shipping_city: String,
    pub shipping_state: String,
    pub shipping_zip: String,
    pub status: String,
    pub status_label: String,
    pub payment_status: String,
    pub quote_amount: Option<i64>,
    pub deposit_amount: Option<i64>,
    pub amount_paid: i64,
    pub remaining_balance: i64,
    pub checkout_session_id: Option<String>,
    pub payment_intent_id: Option<String>,
    pub label_url: Option<String>,
    pub tracking_number: Option<String>,
    pub tracking_url: Option<String>,
    pub tracking_carrier: Option<String>,
    pub version: i32,
    pub created_at: chrono::DateTime<Utc>,
    pub updated_at: chrono::DateTime<Utc>,
}

/// Public tracking projection. Carries no customer contact or address data
/// because the ticket number alone is enough to fetch it.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TrackingResponse {
    pub ticket_number: String,
    pub device_type: String,
    pub status: String,
    pub status_label: String,
    pub payment_status: String,
    pub quote_amount: Option<i64>,
    pub deposit_amount: Option<i64>,
    pub amount_paid: i64,
    pub remaining_balance: i64,
    pub tracking_number: Option<String>,
    pub tracking_url: Option<String>,
    pub tracking_carrier: Option<String>,
    pub created_at: chrono::DateTime<Utc>,
    pub updated_at: chrono::DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RepairRequestListResponse {
    pub requests: Vec<RepairRequestResponse>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StatusCount {
    pub status: String,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StatsResponse {
    pub total: u64,
    pub by_status: Vec<StatusCount>,
}

/// Response for operations that open a hosted checkout session.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PaymentLinkResponse {
    pub request: RepairRequestResponse,
    pub payment_url: String,
}

/// Result of applying a verified checkout webhook.
#[derive(Debug, Clone)]
pub enum PaymentOutcome {
    Recorded(RepairRequestResponse),
    /// The event id was seen before; nothing was changed.
    Duplicate,
}

#[derive(Clone)]
pub struct RepairOrderService {
    db_pool: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
    gateway: Arc<dyn PaymentGateway>,
    labels: Arc<dyn LabelProvider>,
    mailer: Arc<dyn NotificationSender>,
    config: Arc<AppConfig>,
}

impl RepairOrderService {
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Option<Arc<EventSender>>,
        gateway: Arc<dyn PaymentGateway>,
        labels: Arc<dyn LabelProvider>,
        mailer: Arc<dyn NotificationSender>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            db_pool,
            event_sender,
            gateway,
            labels,
            mailer,
            config,
        }
    }

    /// Creates a repair request from the public intake form and assigns it a
    /// unique ticket number. Confirmation emails go out after the insert.
    #[instrument(skip(self, request), fields(device_type = %request.device_type))]
    pub async fn create_request(
        &self,
        request: CreateRepairRequest,
    ) -> Result<RepairRequestResponse, ServiceError> {
        request
            .validate()
            .map_err(|e| ServiceError::ValidationError(e.to_string()))?;

        let request_id = Uuid::new_v4();
        let now = Utc::now();
        let mut created: Option<repair_request::Model> = None;

        for attempt in 0..TICKET_GENERATION_ATTEMPTS {
            let ticket_number = if attempt == 0 {
                self.allocate_ticket_number().await?
            } else {
                ticket_candidate()
            };

            let active = repair_request::ActiveModel {
                id: Set(request_id),
                ticket_number: Set(ticket_number),
                device_type: Set(request.device_type.clone()),
                issue_description: Set(request.issue_description.clone()),
                common_issues: Set(JsonValue::from(request.common_issues.clone())),
                customer_name: Set(request.customer_name.clone()),
                customer_email: Set(request.customer_email.clone()),
                customer_phone: Set(request.customer_phone.clone()),
                shipping_address: Set(request.shipping_address.clone()),
                shipping_city: Set(request.shipping_city.clone()),
                shipping_state: Set(request.shipping_state.clone()),
                shipping_zip: Set(request.shipping_zip.clone()),
                status: Set(RepairStatus::Pending),
                payment_status: Set(PaymentStatus::None),
                quote_amount: Set(None),
                deposit_amount: Set(None),
                amount_paid: Set(0),
                checkout_session_id: Set(None),
                payment_intent_id: Set(None),
                label_url: Set(None),
                tracking_number: Set(None),
                tracking_url: Set(None),
                tracking_carrier: Set(None),
                version: Set(0),
                created_at: Set(now),
                updated_at: Set(now),
            };

            match active.insert(&*self.db_pool).await {
                Ok(model) => {
                    created = Some(model);
                    break;
                }
                Err(e) if is_unique_violation(&e) => {
                    warn!(attempt, "Ticket number collided at insert time, regenerating");
                }
                Err(e) => {
                    error!(error = %e, "Failed to insert repair request");
                    return Err(ServiceError::DatabaseError(e));
                }
            }
        }

        let model = created.ok_or_else(|| {
            ServiceError::Conflict("Could not allocate a unique ticket number".to_string())
        })?;

        info!(
            request_id = %model.id,
            ticket_number = %model.ticket_number,
            "Created repair request"
        );

        self.emit(Event::RequestCreated {
            request_id: model.id,
            ticket_number: model.ticket_number.clone(),
        })
        .await;

        self.email_customer(&model, EmailTemplate::RequestConfirmation, self.base_vars(&model));

        let mut admin_vars = self.base_vars(&model);
        admin_vars.insert("customer_email".into(), model.customer_email.clone());
        admin_vars.insert("issue_description".into(), model.issue_description.clone());
        self.email_admin(EmailTemplate::AdminNewRequest, admin_vars);

        Ok(self.to_response(&model))
    }

    pub async fn get_request(&self, id: Uuid) -> Result<RepairRequestResponse, ServiceError> {
        let model = self.load(id).await?;
        Ok(self.to_response(&model))
    }

    /// Public lookup by ticket number. The error message is deliberately
    /// uniform so the endpoint cannot be used to probe for valid tickets
    /// beyond exact matches.
    #[instrument(skip(self))]
    pub async fn track(&self, ticket: &str) -> Result<TrackingResponse, ServiceError> {
        let normalized = normalize_ticket(ticket);
        if !is_ticket_shaped(&normalized) {
            return Err(ServiceError::NotFound(
                "No repair request matches that ticket number".to_string(),
            ));
        }
        let model = RepairRequestEntity::find()
            .filter(repair_request::Column::TicketNumber.eq(normalized.as_str()))
            .one(&*self.db_pool)
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to look up ticket");
                ServiceError::DatabaseError(e)
            })?
            .ok_or_else(|| {
                ServiceError::NotFound("No repair request matches that ticket number".to_string())
            })?;

        Ok(self.to_tracking(&model))
    }

    pub async fn list_requests(
        &self,
        status: Option<&str>,
        page: u64,
        per_page: u64,
    ) -> Result<RepairRequestListResponse, ServiceError> {
        let mut query =
            RepairRequestEntity::find().order_by_desc(repair_request::Column::CreatedAt);

        if let Some(raw) = status {
            let parsed = RepairStatus::parse(raw).ok_or_else(|| {
                ServiceError::InvalidStatus(format!("Unknown repair status: {}", raw))
            })?;
            query = query.filter(repair_request::Column::Status.eq(parsed));
        }

        let page = page.max(1);
        let per_page = per_page.clamp(1, 100);
        let paginator = query.paginate(&*self.db_pool, per_page);

        let total = paginator.num_items().await.map_err(|e| {
            error!(error = %e, "Failed to count repair requests");
            ServiceError::DatabaseError(e)
        })?;
        let models = paginator.fetch_page(page - 1).await.map_err(|e| {
            error!(error = %e, "Failed to fetch repair requests");
            ServiceError::DatabaseError(e)
        })?;

        Ok(RepairRequestListResponse {
            requests: models.iter().map(|m| self.to_response(m)).collect(),
            total,
            page,
            per_page,
        })
    }

    /// Per-status ticket counts for the admin dashboard.
    pub async fn stats(&self) -> Result<StatsResponse, ServiceError> {
        let db = &*self.db_pool;
        let by_status = try_join_all(RepairStatus::iter().map(|status| async move {
            let count = RepairRequestEntity::find()
                .filter(repair_request::Column::Status.eq(status))
                .count(db)
                .await
                .map_err(ServiceError::DatabaseError)?;
            Ok::<StatusCount, ServiceError>(StatusCount {
                status: status.to_string(),
                count,
            })
        }))
        .await?;

        let total = by_status.iter().map(|c| c.count).sum();
        Ok(StatsResponse { total, by_status })
    }

    /// Issues a quote and opens a hosted checkout session for the deposit,
    /// or for the full quote when no deposit was set. Nothing is persisted
    /// if the gateway call fails.
    #[instrument(skip(self, request), fields(request_id = %id))]
    pub async fn send_quote(
        &self,
        id: Uuid,
        request: SendQuoteRequest,
    ) -> Result<PaymentLinkResponse, ServiceError> {
        request
            .validate()
            .map_err(|e| ServiceError::ValidationError(e.to_string()))?;
        if let Some(deposit) = request.deposit_amount {
            if deposit > request.quote_amount {
                return Err(ServiceError::ValidationError(
                    "Deposit amount cannot exceed the quote amount".to_string(),
                ));
            }
        }

        let model = self.load(id).await?;
        if model.payment_status == PaymentStatus::PaidInFull {
            return Err(ServiceError::ValidationError(
                "Ticket is already paid in full".to_string(),
            ));
        }
        if !matches!(model.status, RepairStatus::Pending | RepairStatus::Quoted) {
            return Err(ServiceError::InvalidStatus(format!(
                "Cannot send a quote while the repair is {}",
                model.status
            )));
        }

        let charge_amount = request.deposit_amount.unwrap_or(request.quote_amount);
        let payment_type = if request.deposit_amount.is_some() {
            PaymentType::Deposit
        } else {
            PaymentType::Final
        };
        let session = self.open_checkout(&model, charge_amount, payment_type).await?;

        let active = repair_request::ActiveModel {
            status: Set(RepairStatus::Quoted),
            payment_status: Set(PaymentStatus::QuoteSent),
            quote_amount: Set(Some(request.quote_amount)),
            deposit_amount: Set(request.deposit_amount),
            checkout_session_id: Set(Some(session.session_id.clone())),
            ..Default::default()
        };
        self.apply_update(&*self.db_pool, id, model.version, active)
            .await?;

        let updated = repair_request::Model {
            status: RepairStatus::Quoted,
            payment_status: PaymentStatus::QuoteSent,
            quote_amount: Some(request.quote_amount),
            deposit_amount: request.deposit_amount,
            checkout_session_id: Some(session.session_id.clone()),
            version: model.version + 1,
            updated_at: Utc::now(),
            ..model
        };

        info!(
            request_id = %id,
            quote_amount = request.quote_amount,
            deposit_amount = ?request.deposit_amount,
            "Quote sent"
        );

        self.emit(Event::QuoteSent {
            request_id: id,
            quote_amount: request.quote_amount,
            deposit_amount: request.deposit_amount,
        })
        .await;

        let mut vars = self.base_vars(&updated);
        vars.insert("quote_amount".into(), format_money(request.quote_amount));
        if let Some(deposit) = request.deposit_amount {
            vars.insert("deposit_amount".into(), format_money(deposit));
        }
        vars.insert("payment_link".into(), session.hosted_url.clone());
        self.email_customer(&updated, EmailTemplate::QuoteReady, vars);

        Ok(PaymentLinkResponse {
            request: self.to_response(&updated),
            payment_url: session.hosted_url,
        })
    }

    /// Applies a verified `checkout.session.completed` event. The event id
    /// is recorded in the same transaction as the ticket update, so a replay
    /// either sees the receipt row or conflicts on its unique index.
    #[instrument(skip(self, completed), fields(event_id = %completed.event_id))]
    pub async fn record_payment(
        &self,
        completed: CheckoutCompleted,
    ) -> Result<PaymentOutcome, ServiceError> {
        let ticket_number = completed.ticket_number.clone().ok_or_else(|| {
            ServiceError::BadRequest(
                "Checkout session is missing ticket_number metadata".to_string(),
            )
        })?;

        let txn = self.db_pool.begin().await.map_err(|e| {
            error!(error = %e, "Failed to begin transaction");
            ServiceError::DatabaseError(e)
        })?;

        let already_seen = WebhookEventEntity::find()
            .filter(webhook_event::Column::EventId.eq(completed.event_id.as_str()))
            .one(&txn)
            .await
            .map_err(ServiceError::DatabaseError)?;
        if already_seen.is_some() {
            info!(event_id = %completed.event_id, "Webhook event already processed, skipping");
            txn.commit().await.map_err(ServiceError::DatabaseError)?;
            return Ok(PaymentOutcome::Duplicate);
        }

        let model = RepairRequestEntity::find()
            .filter(repair_request::Column::TicketNumber.eq(ticket_number.as_str()))
            .one(&txn)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("No repair request for ticket {}", ticket_number))
            })?;

        let receipt = webhook_event::ActiveModel {
            id: Set(Uuid::new_v4()),
            event_id: Set(completed.event_id.clone()),
            event_type: Set("checkout.session.completed".to_string()),
            ticket_number: Set(Some(ticket_number.clone())),
            amount: Set(Some(completed.amount_total)),
            received_at: Set(Utc::now()),
        };
        if let Err(e) = receipt.insert(&txn).await {
            if is_unique_violation(&e) {
                info!(
                    event_id = %completed.event_id,
                    "Webhook event recorded concurrently, skipping"
                );
                return Ok(PaymentOutcome::Duplicate);
            }
            error!(error = %e, "Failed to record webhook event");
            return Err(ServiceError::DatabaseError(e));
        }

        let total_paid = model.amount_paid + completed.amount_total;
        let paid_in_full = matches!(completed.payment_type, Some(PaymentType::Final))
            || model
                .quote_amount
                .map(|quote| total_paid >= quote)
                .unwrap_or(false);
        let payment_status = if paid_in_full {
            PaymentStatus::PaidInFull
        } else {
            PaymentStatus::DepositPaid
        };

        // Only an explicit deposit advances the lifecycle, and only from the
        // intake states. A final payment arriving mid-repair must not move
        // the ticket backwards.
        let status = if matches!(completed.payment_type, Some(PaymentType::Deposit))
            && matches!(model.status, RepairStatus::Pending | RepairStatus::Quoted)
        {
            RepairStatus::DepositPaid
        } else {
            model.status
        };

        let payment_intent_id = completed
            .payment_intent_id
            .clone()
            .or_else(|| model.payment_intent_id.clone());

        let active = repair_request::ActiveModel {
            status: Set(status),
            payment_status: Set(payment_status),
            amount_paid: Set(total_paid),
            payment_intent_id: Set(payment_intent_id.clone()),
            ..Default::default()
        };
        self.apply_update(&txn, model.id, model.version, active)
            .await?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, "Failed to commit payment transaction");
            ServiceError::DatabaseError(e)
        })?;

        let updated = repair_request::Model {
            status,
            payment_status,
            amount_paid: total_paid,
            payment_intent_id,
            version: model.version + 1,
            updated_at: Utc::now(),
            ..model
        };

        info!(
            request_id = %updated.id,
            ticket_number = %updated.ticket_number,
            amount = completed.amount_total,
            payment_status = %payment_status,
            "Recorded payment"
        );

        self.emit(Event::PaymentRecorded {
            request_id: updated.id,
            event_id: completed.event_id.clone(),
            amount: completed.amount_total,
            payment_status: payment_status.to_string(),
        })
        .await;

        let mut vars = self.base_vars(&updated);
        vars.insert("amount".into(), format_money(completed.amount_total));
        vars.insert("status_label".into(), updated.status.label().to_string());
        self.email_customer(&updated, EmailTemplate::PaymentConfirmed, vars);

        let mut admin_vars = self.base_vars(&updated);
        admin_vars.insert("amount".into(), format_money(completed.amount_total));
        admin_vars.insert("amount_paid".into(), format_money(total_paid));
        admin_vars.insert("customer_email".into(), updated.customer_email.clone());
        admin_vars.insert(
            "payment_type".into(),
            completed
                .payment_type
                .map(|t| t.as_str().to_string())
                .unwrap_or_else(|| "payment".to_string()),
        );
        self.email_admin(EmailTemplate::AdminPaymentReceived, admin_vars);

        Ok(PaymentOutcome::Recorded(self.to_response(&updated)))
    }

    /// Opens a checkout session for the outstanding balance. Requires a paid
    /// deposit; if nothing is owed the payment status is corrected instead.
    #[instrument(skip(self), fields(request_id = %id))]
    pub async fn request_final_payment(
        &self,
        id: Uuid,
    ) -> Result<PaymentLinkResponse, ServiceError> {
        let model = self.load(id).await?;

        if model.payment_status != PaymentStatus::DepositPaid {
            return Err(ServiceError::ValidationError(format!(
                "Final payment can only be requested after a deposit, payment status is {}",
                model.payment_status
            )));
        }
        let quote = model.quote_amount.ok_or_else(|| {
            ServiceError::ValidationError("No quote amount on file".to_string())
        })?;

        let remaining = quote - model.amount_paid;
        if remaining <= 0 {
            let active = repair_request::ActiveModel {
                payment_status: Set(PaymentStatus::PaidInFull),
                ..Default::default()
            };
            self.apply_update(&*self.db_pool, id, model.version, active)
                .await?;
            warn!(request_id = %id, "No balance remaining, marked paid in full");
            return Err(ServiceError::ValidationError(
                "No balance remaining; the ticket has been marked paid in full".to_string(),
            ));
        }

        let session = self.open_checkout(&model, remaining, PaymentType::Final).await?;

        let active = repair_request::ActiveModel {
            payment_status: Set(PaymentStatus::PaymentRequested),
            checkout_session_id: Set(Some(session.session_id.clone())),
            ..Default::default()
        };
        self.apply_update(&*self.db_pool, id, model.version, active)
            .await?;

        let updated = repair_request::Model {
            payment_status: PaymentStatus::PaymentRequested,
            checkout_session_id: Some(session.session_id.clone()),
            version: model.version + 1,
            updated_at: Utc::now(),
            ..model
        };

        info!(request_id = %id, amount_due = remaining, "Final payment requested");

        self.emit(Event::FinalPaymentRequested {
            request_id: id,
            amount_due: remaining,
        })
        .await;

        let mut vars = self.base_vars(&updated);
        vars.insert("amount_due".into(), format_money(remaining));
        vars.insert("payment_link".into(), session.hosted_url.clone());
        self.email_customer(&updated, EmailTemplate::FinalPaymentRequest, vars);

        Ok(PaymentLinkResponse {
            request: self.to_response(&updated),
            payment_url: session.hosted_url,
        })
    }

    /// Rates the return shipment, buys the cheapest label from the preferred
    /// carrier, and moves the ticket to SHIPPED. Requires full payment and
    /// runs at most once per ticket.
    #[instrument(skip(self), fields(request_id = %id))]
    pub async fn generate_label(&self, id: Uuid) -> Result<RepairRequestResponse, ServiceError> {
        let model = self.load(id).await?;

        if model.payment_status != PaymentStatus::PaidInFull {
            return Err(ServiceError::ValidationError(
                "A return label can only be generated once the ticket is paid in full".to_string(),
            ));
        }
        if model.label_url.is_some() {
            return Err(ServiceError::ValidationError(
                "A return label has already been generated for this ticket".to_string(),
            ));
        }

        let from = self.origin_address();
        let to = self.destination_address(&model);
        let parcel = Parcel::from_config(&self.config.shipping);

        let rates = self.labels.create_shipment(&from, &to, &parcel).await?;
        let rate = select_rate(&rates, &self.config.shipping.preferred_carrier)
            .ok_or_else(|| {
                ServiceError::ExternalServiceError(
                    "Shipping provider returned no rates".to_string(),
                )
            })?
            .clone();

        info!(
            request_id = %id,
            carrier = %rate.carrier,
            service = %rate.service,
            amount_minor = rate.amount_minor,
            "Selected shipping rate"
        );

        let purchase = self.labels.purchase_label(&rate.rate_id).await?;
        let tracking_url = purchase
            .tracking_url_provider
            .clone()
            .or_else(|| tracking_url_for(&rate.carrier, &purchase.tracking_number));

        let active = repair_request::ActiveModel {
            status: Set(RepairStatus::Shipped),
            label_url: Set(Some(purchase.label_url.clone())),
            tracking_number: Set(Some(purchase.tracking_number.clone())),
            tracking_url: Set(tracking_url.clone()),
            tracking_carrier: Set(Some(rate.carrier.clone())),
            ..Default::default()
        };
        self.apply_update(&*self.db_pool, id, model.version, active)
            .await?;

        let updated = repair_request::Model {
            status: RepairStatus::Shipped,
            label_url: Some(purchase.label_url.clone()),
            tracking_number: Some(purchase.tracking_number.clone()),
            tracking_url,
            tracking_carrier: Some(rate.carrier.clone()),
            version: model.version + 1,
            updated_at: Utc::now(),
            ..model
        };

        info!(
            request_id = %id,
            tracking_number = %purchase.tracking_number,
            carrier = %rate.carrier,
            "Purchased return label"
        );

        self.emit(Event::LabelPurchased {
            request_id: id,
            tracking_number: purchase.tracking_number.clone(),
            carrier: rate.carrier.clone(),
        })
        .await;

        self.email_customer(
            &updated,
            EmailTemplate::ShippingNotice,
            self.shipping_notice_vars(&updated),
        );

        Ok(self.to_response(&updated))
    }

    /// Re-sends the shipping notice email. Unlike the other notification
    /// sends this one is the whole point of the call, so a delivery failure
    /// is surfaced to the caller.
    #[instrument(skip(self), fields(request_id = %id))]
    pub async fn resend_tracking(&self, id: Uuid) -> Result<(), ServiceError> {
        let model = self.load(id).await?;
        if !model.has_tracking() {
            return Err(ServiceError::ValidationError(
                "No tracking information on file for this ticket".to_string(),
            ));
        }

        let vars = self.shipping_notice_vars(&model);
        self.mailer
            .send(&model.customer_email, EmailTemplate::ShippingNotice, &vars)
            .await
            .map_err(|e| {
                error!(error = %e, request_id = %id, "Failed to resend shipping notice");
                ServiceError::ExternalServiceError(
                    "Failed to send the tracking email".to_string(),
                )
            })?;

        info!(request_id = %id, "Shipping notice re-sent");
        Ok(())
    }

    /// Admin status override. Accepts the legacy names APPROVED and
    /// COMPLETED and normalizes them onto the canonical states.
    #[instrument(skip(self), fields(request_id = %id))]
    pub async fn update_status(
        &self,
        id: Uuid,
        new_status: &str,
    ) -> Result<RepairRequestResponse, ServiceError> {
        let status = RepairStatus::parse(new_status).ok_or_else(|| {
            ServiceError::InvalidStatus(format!("Unknown repair status: {}", new_status))
        })?;

        let model = self.load(id).await?;
        if model.status == status {
            return Ok(self.to_response(&model));
        }

        let active = repair_request::ActiveModel {
            status: Set(status),
            ..Default::default()
        };
        self.apply_update(&*self.db_pool, id, model.version, active)
            .await?;

        let old_status = model.status;
        let updated = repair_request::Model {
            status,
            version: model.version + 1,
            updated_at: Utc::now(),
            ..model
        };

        info!(
            request_id = %id,
            old_status = %old_status,
            new_status = %status,
            "Updated repair status"
        );

        self.emit(Event::StatusChanged {
            request_id: id,
            old_status: old_status.to_string(),
            new_status: status.to_string(),
        })
        .await;

        Ok(self.to_response(&updated))
    }

    #[instrument(skip(self), fields(request_id = %id))]
    pub async fn cancel(&self, id: Uuid) -> Result<RepairRequestResponse, ServiceError> {
        let model = self.load(id).await?;
        if model.status.is_terminal() {
            return Err(ServiceError::InvalidStatus(format!(
                "Cannot cancel a repair that is already {}",
                model.status
            )));
        }

        let active = repair_request::ActiveModel {
            status: Set(RepairStatus::Cancelled),
            ..Default::default()
        };
        self.apply_update(&*self.db_pool, id, model.version, active)
            .await?;

        let updated = repair_request::Model {
            status: RepairStatus::Cancelled,
            version: model.version + 1,
            updated_at: Utc::now(),
            ..model
        };

        info!(request_id = %id, "Cancelled repair request");
        self.emit(Event::RequestCancelled(id)).await;

        Ok(self.to_response(&updated))
    }

    async fn load(&self, id: Uuid) -> Result<repair_request::Model, ServiceError> {
        RepairRequestEntity::find_by_id(id)
            .one(&*self.db_pool)
            .await
            .map_err(|e| {
                error!(error = %e, request_id = %id, "Failed to fetch repair request");
                ServiceError::DatabaseError(e)
            })?
            .ok_or_else(|| ServiceError::NotFound(format!("Repair request {} not found", id)))
    }

    /// Draws random ticket numbers until one is free, then falls back to a
    /// timestamp-derived one. The unique index still backstops races.
    async fn allocate_ticket_number(&self) -> Result<String, ServiceError> {
        for _ in 0..TICKET_GENERATION_ATTEMPTS {
            let candidate = ticket_candidate();
            let existing = RepairRequestEntity::find()
                .filter(repair_request::Column::TicketNumber.eq(candidate.as_str()))
                .one(&*self.db_pool)
                .await
                .map_err(ServiceError::DatabaseError)?;
            if existing.is_none() {
                return Ok(candidate);
            }
            warn!(ticket_number = %candidate, "Ticket number already taken, drawing another");
        }
        Ok(ticket_fallback())
    }

    /// Updates the row only if the version still matches, bumping it by one.
    /// Zero rows affected means someone else won the race.
    async fn apply_update<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: Uuid,
        expected_version: i32,
        mut active: repair_request::ActiveModel,
    ) -> Result<(), ServiceError> {
        active.version = Set(expected_version + 1);
        active.updated_at = Set(Utc::now());

        let result = RepairRequestEntity::update_many()
            .set(active)
            .filter(repair_request::Column::Id.eq(id))
            .filter(repair_request::Column::Version.eq(expected_version))
            .exec(conn)
            .await
            .map_err(|e| {
                error!(error = %e, request_id = %id, "Failed to update repair request");
                ServiceError::DatabaseError(e)
            })?;

        if result.rows_affected == 0 {
            warn!(
                request_id = %id,
                expected_version,
                "Version check failed, concurrent modification"
            );
            return Err(ServiceError::ConcurrentModification(id));
        }
        Ok(())
    }

    async fn open_checkout(
        &self,
        model: &repair_request::Model,
        amount_minor: i64,
        payment_type: PaymentType,
    ) -> Result<CheckoutSession, ServiceError> {
        let tracking_link = self.tracking_link(&model.ticket_number);
        let request = CheckoutRequest {
            amount_minor,
            description: format!("{} repair ({})", model.device_type, model.ticket_number),
            customer_email: model.customer_email.clone(),
            success_url: format!("{}?payment=success", tracking_link),
            cancel_url: format!("{}?payment=cancelled", tracking_link),
            ticket_number: model.ticket_number.clone(),
            payment_type,
            request_id: model.id,
        };
        self.gateway.create_checkout_session(&request).await
    }

    async fn emit(&self, event: Event) {
        if let Some(event_sender) = &self.event_sender {
            if let Err(e) = event_sender.send(event).await {
                warn!("Failed to send event: {}", e);
            }
        }
    }

    fn email_customer(
        &self,
        model: &repair_request::Model,
        template: EmailTemplate,
        vars: TemplateVars,
    ) {
        notifications::dispatch(
            self.mailer.clone(),
            model.customer_email.clone(),
            template,
            vars,
        );
    }

    fn email_admin(&self, template: EmailTemplate, vars: TemplateVars) {
        notifications::dispatch(
            self.mailer.clone(),
            self.config.shop.admin_email.clone(),
            template,
            vars,
        );
    }

    fn base_vars(&self, model: &repair_request::Model) -> TemplateVars {
        let mut vars = TemplateVars::new();
        vars.insert("ticket_number".into(), model.ticket_number.clone());
        vars.insert("customer_name".into(), model.customer_name.clone());
        vars.insert("device_type".into(), model.device_type.clone());
        vars.insert("shop_name".into(), self.config.shop.name.clone());
        vars.insert(
            "tracking_link".into(),
            self.tracking_link(&model.ticket_number),
        );
        vars
    }

    fn shipping_notice_vars(&self, model: &repair_request::Model) -> TemplateVars {
        let mut vars = self.base_vars(model);
        if let Some(carrier) = &model.tracking_carrier {
            vars.insert("carrier".into(), carrier.clone());
        }
        if let Some(tracking_number) = &model.tracking_number {
            vars.insert("tracking_number".into(), tracking_number.clone());
        }
        let tracking_url = model
            .tracking_url
            .clone()
            .unwrap_or_else(|| self.tracking_link(&model.ticket_number));
        vars.insert("tracking_url".into(), tracking_url);
        vars
    }

    fn tracking_link(&self, ticket_number: &str) -> String {
        format!(
            "{}/track/{}",
            self.config.shop.public_base_url.trim_end_matches('/'),
            ticket_number
        )
    }

    fn origin_address(&self) -> Address {
        let shop = &self.config.shop;
        Address {
            name: shop.name.clone(),
            street1: shop.origin_street.clone(),
            city: shop.origin_city.clone(),
            state: shop.origin_state.clone(),
            zip: shop.origin_zip.clone(),
            country: shop.origin_country.clone(),
            email: Some(shop.admin_email.clone()),
            phone: None,
        }
    }

    fn destination_address(&self, model: &repair_request::Model) -> Address {
        Address {
            name: model.customer_name.clone(),
            street1: model.shipping_address.clone(),
            city: model.shipping_city.clone(),
            state: model.shipping_state.clone(),
            zip: model.shipping_zip.clone(),
            country: self.config.shop.origin_country.clone(),
            email: Some(model.customer_email.clone()),
            phone: model.customer_phone.clone(),
        }
    }

    fn to_response(&self, model: &repair_request::Model) -> RepairRequestResponse {
        RepairRequestResponse {
            id: model.id,
            ticket_number: model.ticket_number.clone(),
            device_type: model.device_type.clone(),
            issue_description: model.issue_description.clone(),
            common_issues: model.common_issues_vec(),
            customer_name: model.customer_name.clone(),
            customer_email: model.customer_email.clone(),
            customer_phone: model.customer_phone.clone(),
            shipping_address: model.shipping_address.clone(),
            shipping_city: model.shipping_city.clone(),
            shipping_state: model.shipping_state.clone(),
            shipping_zip: model.shipping_zip.clone(),
            status: model.status.to_string(),
            status_label: model.status.label().to_string(),
            payment_status: model.payment_status.to_string(),
            quote_amount: model.quote_amount,
            deposit_amount: model.deposit_amount,
            amount_paid: model.amount_paid,
            remaining_balance: model.remaining_balance(),
            checkout_session_id: model.checkout_session_id.clone(),
            payment_intent_id: model.payment_intent_id.clone(),
            label_url: model.label_url.clone(),
            tracking_number: model.tracking_number.clone(),
            tracking_url: model.tracking_url.clone(),
            tracking_carrier: model.tracking_carrier.clone(),
            version: model.version,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }

    fn to_tracking(&self, model: &repair_request::Model) -> TrackingResponse {
        TrackingResponse {
            ticket_number: model.ticket_number.clone(),
            device_type: model.device_type.clone(),
            status: model.status.to_string(),
            status_label: model.status.label().to_string(),
            payment_status: model.payment_status.to_string(),
            quote_amount: model.quote_amount,
            deposit_amount: model.deposit_amount,
            amount_paid: model.amount_paid,
            remaining_balance: model.remaining_balance(),
            tracking_number: model.tracking_number.clone(),
            tracking_url: model.tracking_url.clone(),
            tracking_carrier: model.tracking_carrier.clone(),
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::NotificationError;
    use crate::shipping::{LabelPurchase, ShippingRate};
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use sea_orm::{DatabaseBackend, DatabaseConnection, MockDatabase, MockExecResult};
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    struct StubGateway {
        session: CheckoutSession,
    }

    #[async_trait]
    impl PaymentGateway for StubGateway {
        async fn create_checkout_session(
            &self,
            _request: &CheckoutRequest,
        ) -> Result<CheckoutSession, ServiceError> {
            Ok(self.session.clone())
        }
    }

    struct StubLabels {
        rates: Vec<ShippingRate>,
        purchase: LabelPurchase,
    }

    #[async_trait]
    impl LabelProvider for StubLabels {
        async fn create_shipment(
            &self,
            _from: &Address,
            _to: &Address,
            _parcel: &Parcel,
        ) -> Result<Vec<ShippingRate>, ServiceError> {
            Ok(self.rates.clone())
        }

        async fn purchase_label(&self, _rate_id: &str) -> Result<LabelPurchase, ServiceError> {
            Ok(self.purchase.clone())
        }
    }

    #[derive(Default)]
    struct RecordingMailer {
        sent: Mutex<Vec<(String, &'static str)>>,
    }

    impl RecordingMailer {
        fn deliveries(&self) -> Vec<(String, &'static str)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl NotificationSender for RecordingMailer {
        async fn send(
            &self,
            to: &str,
            template: EmailTemplate,
            _vars: &TemplateVars,
        ) -> Result<(), NotificationError> {
            self.sent.lock().unwrap().push((to.to_string(), template.name()));
            Ok(())
        }
    }

    fn build_service(
        db: DatabaseConnection,
        event_sender: Option<Arc<EventSender>>,
        mailer: Arc<RecordingMailer>,
    ) -> RepairOrderService {
        RepairOrderService::new(
            Arc::new(db),
            event_sender,
            Arc::new(StubGateway {
                session: CheckoutSession {
                    session_id: "cs_test_123".to_string(),
                    hosted_url: "https://checkout.example.com/cs_test_123".to_string(),
                },
            }),
            Arc::new(StubLabels {
                rates: vec![
                    ShippingRate {
                        rate_id: "rate_ups".to_string(),
                        carrier: "ups".to_string(),
                        service: "Ground".to_string(),
                        amount_minor: 799,
                    },
                    ShippingRate {
                        rate_id: "rate_usps".to_string(),
                        carrier: "usps".to_string(),
                        service: "Priority".to_string(),
                        amount_minor: 1015,
                    },
                ],
                purchase: LabelPurchase {
                    label_url: "https://labels.example.com/l1.pdf".to_string(),
                    tracking_number: "9400100000000000000001".to_string(),
                    tracking_url_provider: None,
                },
            }),
            mailer,
            Arc::new(AppConfig::for_development("sqlite::memory:")),
        )
    }

    fn sample_model(
        status: RepairStatus,
        payment_status: PaymentStatus,
        quote_amount: Option<i64>,
        deposit_amount: Option<i64>,
        amount_paid: i64,
    ) -> repair_request::Model {
        repair_request::Model {
            id: Uuid::new_v4(),
            ticket_number: "ARB-TST01".to_string(),
            device_type: "Game console".to_string(),
            issue_description: "No video output over HDMI".to_string(),
            common_issues: serde_json::json!(["hdmi port"]),
            customer_name: "Sam Doe".to_string(),
            customer_email: "sam@example.com".to_string(),
            customer_phone: None,
            shipping_address: "1 Main St".to_string(),
            shipping_city: "Portland".to_string(),
            shipping_state: "OR".to_string(),
            shipping_zip: "97201".to_string(),
            status,
            payment_status,
            quote_amount,
            deposit_amount,
            amount_paid,
            checkout_session_id: None,
            payment_intent_id: None,
            label_url: None,
            tracking_number: None,
            tracking_url: None,
            tracking_carrier: None,
            version: 2,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn intake_form() -> CreateRepairRequest {
        CreateRepairRequest {
            device_type: "Game console".to_string(),
            issue_description: "No video output over HDMI".to_string(),
            common_issues: vec!["hdmi port".to_string()],
            customer_name: "Sam Doe".to_string(),
            customer_email: "sam@example.com".to_string(),
            customer_phone: None,
            shipping_address: "1 Main St".to_string(),
            shipping_city: "Portland".to_string(),
            shipping_state: "OR".to_string(),
            shipping_zip: "97201".to_string(),
        }
    }

    fn completed_checkout(
        amount_total: i64,
        payment_type: Option<PaymentType>,
    ) -> CheckoutCompleted {
        CheckoutCompleted {
            event_id: "evt_test_1".to_string(),
            session_id: "cs_test_123".to_string(),
            amount_total,
            payment_intent_id: Some("pi_test_1".to_string()),
            ticket_number: Some("ARB-TST01".to_string()),
            payment_type,
            request_id: None,
        }
    }

    /// Spawned notification tasks run once the test task yields.
    async fn flush_mail() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    fn ok_exec() -> MockExecResult {
        MockExecResult {
            last_insert_id: 0,
            rows_affected: 1,
        }
    }

    #[tokio::test]
    async fn create_request_rejects_invalid_input() {
        let mailer = Arc::new(RecordingMailer::default());
        let service = build_service(DatabaseConnection::Disconnected, None, mailer);

        let mut form = intake_form();
        form.customer_email = "not-an-email".to_string();

        let result = service.create_request(form).await;
        assert_matches!(result, Err(ServiceError::ValidationError(_)));
    }

    #[tokio::test]
    async fn create_request_persists_and_notifies() {
        let inserted = sample_model(RepairStatus::Pending, PaymentStatus::None, None, None, 0);
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([Vec::<repair_request::Model>::new()])
            .append_query_results([vec![inserted.clone()]])
            .into_connection();

        let (tx, mut rx) = mpsc::channel(8);
        let mailer = Arc::new(RecordingMailer::default());
        let service = build_service(db, Some(Arc::new(EventSender::new(tx))), mailer.clone());

        let response = service.create_request(intake_form()).await.unwrap();
        assert_eq!(response.ticket_number, "ARB-TST01");
        assert_eq!(response.status, "PENDING");
        assert_eq!(response.payment_status, "NONE");
        assert_eq!(response.common_issues, vec!["hdmi port".to_string()]);

        assert_matches!(rx.recv().await, Some(Event::RequestCreated { .. }));

        flush_mail().await;
        let deliveries = mailer.deliveries();
        assert_eq!(deliveries.len(), 2);
        assert!(deliveries
            .iter()
            .any(|(to, name)| to == "sam@example.com" && *name == "request_confirmation"));
        assert!(deliveries
            .iter()
            .any(|(_, name)| *name == "admin_new_request"));
    }

    #[tokio::test]
    async fn send_quote_rejects_deposit_above_quote() {
        let mailer = Arc::new(RecordingMailer::default());
        let service = build_service(DatabaseConnection::Disconnected, None, mailer);

        let result = service
            .send_quote(
                Uuid::new_v4(),
                SendQuoteRequest {
                    quote_amount: 5000,
                    deposit_amount: Some(6000),
                },
            )
            .await;
        assert_matches!(result, Err(ServiceError::ValidationError(_)));
    }

    #[tokio::test]
    async fn send_quote_rejects_nonpositive_quote() {
        let mailer = Arc::new(RecordingMailer::default());
        let service = build_service(DatabaseConnection::Disconnected, None, mailer);

        let result = service
            .send_quote(
                Uuid::new_v4(),
                SendQuoteRequest {
                    quote_amount: 0,
                    deposit_amount: None,
                },
            )
            .await;
        assert_matches!(result, Err(ServiceError::ValidationError(_)));
    }

    #[tokio::test]
    async fn send_quote_rejects_paid_in_full_ticket() {
        let model = sample_model(
            RepairStatus::Quoted,
            PaymentStatus::PaidInFull,
            Some(5000),
            None,
            5000,
        );
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![model]])
            .into_connection();
        let mailer = Arc::new(RecordingMailer::default());
        let service = build_service(db, None, mailer);

        let result = service
            .send_quote(
                Uuid::new_v4(),
                SendQuoteRequest {
                    quote_amount: 5000,
                    deposit_amount: None,
                },
            )
            .await;
        assert_matches!(result, Err(ServiceError::ValidationError(_)));
    }

    #[tokio::test]
    async fn send_quote_opens_checkout_and_persists() {
        let model = sample_model(RepairStatus::Pending, PaymentStatus::None, None, None, 0);
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![model]])
            .append_exec_results([ok_exec()])
            .into_connection();

        let mailer = Arc::new(RecordingMailer::default());
        let service = build_service(db, None, mailer.clone());

        let response = service
            .send_quote(
                Uuid::new_v4(),
                SendQuoteRequest {
                    quote_amount: 10000,
                    deposit_amount: Some(4000),
                },
            )
            .await
            .unwrap();

        assert_eq!(
            response.payment_url,
            "https://checkout.example.com/cs_test_123"
        );
        assert_eq!(response.request.status, "QUOTED");
        assert_eq!(response.request.payment_status, "QUOTE_SENT");
        assert_eq!(response.request.quote_amount, Some(10000));
        assert_eq!(response.request.deposit_amount, Some(4000));
        assert_eq!(response.request.version, 3);
        assert_eq!(
            response.request.checkout_session_id.as_deref(),
            Some("cs_test_123")
        );

        flush_mail().await;
        let deliveries = mailer.deliveries();
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].1, "quote_ready");
    }

    #[tokio::test]
    async fn record_payment_requires_ticket_metadata() {
        let mailer = Arc::new(RecordingMailer::default());
        let service = build_service(DatabaseConnection::Disconnected, None, mailer);

        let mut completed = completed_checkout(4000, Some(PaymentType::Deposit));
        completed.ticket_number = None;

        let result = service.record_payment(completed).await;
        assert_matches!(result, Err(ServiceError::BadRequest(_)));
    }

    #[tokio::test]
    async fn record_payment_applies_deposit() {
        let model = sample_model(
            RepairStatus::Quoted,
            PaymentStatus::QuoteSent,
            Some(10000),
            Some(4000),
            0,
        );
        let receipt = webhook_event::Model {
            id: Uuid::new_v4(),
            event_id: "evt_test_1".to_string(),
            event_type: "checkout.session.completed".to_string(),
            ticket_number: Some("ARB-TST01".to_string()),
            amount: Some(4000),
            received_at: Utc::now(),
        };
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([Vec::<webhook_event::Model>::new()])
            .append_query_results([vec![model]])
            .append_query_results([vec![receipt]])
            .append_exec_results([ok_exec()])
            .into_connection();

        let (tx, mut rx) = mpsc::channel(8);
        let mailer = Arc::new(RecordingMailer::default());
        let service = build_service(db, Some(Arc::new(EventSender::new(tx))), mailer.clone());

        let outcome = service
            .record_payment(completed_checkout(4000, Some(PaymentType::Deposit)))
            .await
            .unwrap();

        let response = match outcome {
            PaymentOutcome::Recorded(response) => response,
            PaymentOutcome::Duplicate => panic!("expected a recorded payment"),
        };
        assert_eq!(response.status, "DEPOSIT_PAID");
        assert_eq!(response.payment_status, "DEPOSIT_PAID");
        assert_eq!(response.amount_paid, 4000);
        assert_eq!(response.remaining_balance, 6000);
        assert_eq!(response.payment_intent_id.as_deref(), Some("pi_test_1"));
        assert_eq!(response.version, 3);

        assert_matches!(rx.recv().await, Some(Event::PaymentRecorded { .. }));

        flush_mail().await;
        let deliveries = mailer.deliveries();
        assert_eq!(deliveries.len(), 2);
        assert!(deliveries
            .iter()
            .any(|(_, name)| *name == "payment_confirmed"));
        assert!(deliveries
            .iter()
            .any(|(_, name)| *name == "admin_payment_received"));
    }

    #[tokio::test]
    async fn record_payment_final_reaches_paid_in_full() {
        let model = sample_model(
            RepairStatus::RepairComplete,
            PaymentStatus::PaymentRequested,
            Some(10000),
            Some(4000),
            4000,
        );
        let receipt = webhook_event::Model {
            id: Uuid::new_v4(),
            event_id: "evt_test_1".to_string(),
            event_type: "checkout.session.completed".to_string(),
            ticket_number: Some("ARB-TST01".to_string()),
            amount: Some(6000),
            received_at: Utc::now(),
        };
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([Vec::<webhook_event::Model>::new()])
            .append_query_results([vec![model]])
            .append_query_results([vec![receipt]])
            .append_exec_results([ok_exec()])
            .into_connection();

        let mailer = Arc::new(RecordingMailer::default());
        let service = build_service(db, None, mailer);

        let outcome = service
            .record_payment(completed_checkout(6000, Some(PaymentType::Final)))
            .await
            .unwrap();

        let response = match outcome {
            PaymentOutcome::Recorded(response) => response,
            PaymentOutcome::Duplicate => panic!("expected a recorded payment"),
        };
        // A final payment settles the balance but never moves the lifecycle.
        assert_eq!(response.status, "REPAIR_COMPLETE");
        assert_eq!(response.payment_status, "PAID_IN_FULL");
        assert_eq!(response.amount_paid, 10000);
        assert_eq!(response.remaining_balance, 0);
    }

    #[tokio::test]
    async fn record_payment_skips_duplicate_events() {
        let receipt = webhook_event::Model {
            id: Uuid::new_v4(),
            event_id: "evt_test_1".to_string(),
            event_type: "checkout.session.completed".to_string(),
            ticket_number: Some("ARB-TST01".to_string()),
            amount: Some(4000),
            received_at: Utc::now(),
        };
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![receipt]])
            .into_connection();

        let mailer = Arc::new(RecordingMailer::default());
        let service = build_service(db, None, mailer.clone());

        let outcome = service
            .record_payment(completed_checkout(4000, Some(PaymentType::Deposit)))
            .await
            .unwrap();
        assert_matches!(outcome, PaymentOutcome::Duplicate);

        flush_mail().await;
        assert!(mailer.deliveries().is_empty());
    }

    #[tokio::test]
    async fn final_payment_requires_paid_deposit() {
        let model = sample_model(
            RepairStatus::Quoted,
            PaymentStatus::QuoteSent,
            Some(10000),
            Some(4000),
            0,
        );
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![model]])
            .into_connection();
        let mailer = Arc::new(RecordingMailer::default());
        let service = build_service(db, None, mailer);

        let result = service.request_final_payment(Uuid::new_v4()).await;
        assert_matches!(result, Err(ServiceError::ValidationError(_)));
    }

    #[tokio::test]
    async fn final_payment_with_no_balance_corrects_payment_status() {
        let model = sample_model(
            RepairStatus::InProgress,
            PaymentStatus::DepositPaid,
            Some(10000),
            Some(10000),
            10000,
        );
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![model]])
            .append_exec_results([ok_exec()])
            .into_connection();
        let mailer = Arc::new(RecordingMailer::default());
        let service = build_service(db, None, mailer.clone());

        let result = service.request_final_payment(Uuid::new_v4()).await;
        let err = result.unwrap_err();
        assert_matches!(err, ServiceError::ValidationError(ref message) if message.contains("paid in full"));

        flush_mail().await;
        assert!(mailer.deliveries().is_empty());
    }

    #[tokio::test]
    async fn final_payment_opens_checkout_for_balance() {
        let model = sample_model(
            RepairStatus::RepairComplete,
            PaymentStatus::DepositPaid,
            Some(10000),
            Some(4000),
            4000,
        );
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![model]])
            .append_exec_results([ok_exec()])
            .into_connection();

        let (tx, mut rx) = mpsc::channel(8);
        let mailer = Arc::new(RecordingMailer::default());
        let service = build_service(db, Some(Arc::new(EventSender::new(tx))), mailer.clone());

        let response = service.request_final_payment(Uuid::new_v4()).await.unwrap();
        assert_eq!(response.request.payment_status, "PAYMENT_REQUESTED");
        assert_eq!(
            response.payment_url,
            "https://checkout.example.com/cs_test_123"
        );

        assert_matches!(
            rx.recv().await,
            Some(Event::FinalPaymentRequested { amount_due: 6000, .. })
        );

        flush_mail().await;
        let deliveries = mailer.deliveries();
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].1, "final_payment_request");
    }

    #[tokio::test]
    async fn generate_label_requires_full_payment() {
        let model = sample_model(
            RepairStatus::RepairComplete,
            PaymentStatus::DepositPaid,
            Some(10000),
            Some(4000),
            4000,
        );
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![model]])
            .into_connection();
        let mailer = Arc::new(RecordingMailer::default());
        let service = build_service(db, None, mailer);

        let result = service.generate_label(Uuid::new_v4()).await;
        assert_matches!(result, Err(ServiceError::ValidationError(_)));
    }

    #[tokio::test]
    async fn generate_label_refuses_second_label() {
        let mut model = sample_model(
            RepairStatus::RepairComplete,
            PaymentStatus::PaidInFull,
            Some(10000),
            Some(4000),
            10000,
        );
        model.label_url = Some("https://labels.example.com/old.pdf".to_string());
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![model]])
            .into_connection();
        let mailer = Arc::new(RecordingMailer::default());
        let service = build_service(db, None, mailer);

        let result = service.generate_label(Uuid::new_v4()).await;
        assert_matches!(result, Err(ServiceError::ValidationError(_)));
    }

    #[tokio::test]
    async fn generate_label_prefers_configured_carrier_and_ships() {
        let model = sample_model(
            RepairStatus::RepairComplete,
            PaymentStatus::PaidInFull,
            Some(10000),
            Some(4000),
            10000,
        );
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![model]])
            .append_exec_results([ok_exec()])
            .into_connection();

        let (tx, mut rx) = mpsc::channel(8);
        let mailer = Arc::new(RecordingMailer::default());
        let service = build_service(db, Some(Arc::new(EventSender::new(tx))), mailer.clone());

        let response = service.generate_label(Uuid::new_v4()).await.unwrap();
        assert_eq!(response.status, "SHIPPED");
        // The dev config prefers USPS, so the cheaper UPS rate loses.
        assert_eq!(response.tracking_carrier.as_deref(), Some("usps"));
        assert_eq!(
            response.tracking_number.as_deref(),
            Some("9400100000000000000001")
        );
        assert_eq!(
            response.tracking_url.as_deref(),
            Some("https://tools.usps.com/go/TrackConfirmAction?tLabels=9400100000000000000001")
        );
        assert_eq!(
            response.label_url.as_deref(),
            Some("https://labels.example.com/l1.pdf")
        );

        assert_matches!(rx.recv().await, Some(Event::LabelPurchased { .. }));

        flush_mail().await;
        let deliveries = mailer.deliveries();
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].1, "shipping_notice");
    }

    #[tokio::test]
    async fn resend_tracking_requires_tracking_info() {
        let model = sample_model(
            RepairStatus::InProgress,
            PaymentStatus::DepositPaid,
            Some(10000),
            Some(4000),
            4000,
        );
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![model]])
            .into_connection();
        let mailer = Arc::new(RecordingMailer::default());
        let service = build_service(db, None, mailer);

        let result = service.resend_tracking(Uuid::new_v4()).await;
        assert_matches!(result, Err(ServiceError::ValidationError(_)));
    }

    #[tokio::test]
    async fn update_status_normalizes_legacy_aliases() {
        let model = sample_model(
            RepairStatus::Received,
            PaymentStatus::DepositPaid,
            Some(10000),
            Some(4000),
            4000,
        );
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![model]])
            .append_exec_results([ok_exec()])
            .into_connection();

        let (tx, mut rx) = mpsc::channel(8);
        let mailer = Arc::new(RecordingMailer::default());
        let service = build_service(db, Some(Arc::new(EventSender::new(tx))), mailer);

        let response = service
            .update_status(Uuid::new_v4(), "completed")
            .await
            .unwrap();
        assert_eq!(response.status, "REPAIR_COMPLETE");

        assert_matches!(
            rx.recv().await,
            Some(Event::StatusChanged { ref old_status, ref new_status, .. })
                if old_status == "RECEIVED" && new_status == "REPAIR_COMPLETE"
        );
    }

    #[tokio::test]
    async fn update_status_rejects_unknown_status() {
        let mailer = Arc::new(RecordingMailer::default());
        let service = build_service(DatabaseConnection::Disconnected, None, mailer);

        let result = service.update_status(Uuid::new_v4(), "melted").await;
        assert_matches!(result, Err(ServiceError::InvalidStatus(_)));
    }

    #[tokio::test]
    async fn cancel_rejects_terminal_states() {
        let model = sample_model(
            RepairStatus::Shipped,
            PaymentStatus::PaidInFull,
            Some(10000),
            Some(4000),
            10000,
        );
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![model]])
            .into_connection();
        let mailer = Arc::new(RecordingMailer::default());
        let service = build_service(db, None, mailer);

        let result = service.cancel(Uuid::new_v4()).await;
        assert_matches!(result, Err(ServiceError::InvalidStatus(_)));
    }

    #[tokio::test]
    async fn cancel_moves_to_cancelled() {
        let model = sample_model(
            RepairStatus::Quoted,
            PaymentStatus::QuoteSent,
            Some(10000),
            None,
            0,
        );
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![model]])
            .append_exec_results([ok_exec()])
            .into_connection();

        let (tx, mut rx) = mpsc::channel(8);
        let mailer = Arc::new(RecordingMailer::default());
        let service = build_service(db, Some(Arc::new(EventSender::new(tx))), mailer);

        let response = service.cancel(Uuid::new_v4()).await.unwrap();
        assert_eq!(response.status, "CANCELLED");
        assert_matches!(rx.recv().await, Some(Event::RequestCancelled(_)));
    }

    #[tokio::test]
    async fn concurrent_modification_is_reported() {
        let model = sample_model(
            RepairStatus::Quoted,
            PaymentStatus::QuoteSent,
            Some(10000),
            None,
            0,
        );
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![model]])
            .append_exec_results([MockExecResult {
                last_insert_id: 0,
                rows_affected: 0,
            }])
            .into_connection();
        let mailer = Arc::new(RecordingMailer::default());
        let service = build_service(db, None, mailer);

        let result = service.cancel(Uuid::new_v4()).await;
        assert_matches!(result, Err(ServiceError::ConcurrentModification(_)));
    }
}
