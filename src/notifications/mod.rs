use async_trait::async_trait;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

use crate::config::EmailConfig;

/// Flat key-value payload consumed by the templates. Unknown keys are
/// ignored; missing keys render as empty strings.
pub type TemplateVars = BTreeMap<String, String>;

/// Notification service errors
#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("Email transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Email provider rejected the message: status {status}: {message}")]
    Provider { status: u16, message: String },
}

/// Transactional email templates. Customer templates address the ticket
/// holder; the two Admin templates go to the shop inbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailTemplate {
    RequestConfirmation,
    QuoteReady,
    PaymentConfirmed,
    FinalPaymentRequest,
    ShippingNotice,
    AdminNewRequest,
    AdminPaymentReceived,
}

impl EmailTemplate {
    pub fn name(&self) -> &'static str {
        match self {
            Self::RequestConfirmation => "request_confirmation",
            Self::QuoteReady => "quote_ready",
            Self::PaymentConfirmed => "payment_confirmed",
            Self::FinalPaymentRequest => "final_payment_request",
            Self::ShippingNotice => "shipping_notice",
            Self::AdminNewRequest => "admin_new_request",
            Self::AdminPaymentReceived => "admin_payment_received",
        }
    }

    pub fn subject(&self, vars: &TemplateVars) -> String {
        let ticket = var(vars, "ticket_number");
        match self {
            Self::RequestConfirmation => {
                format!("We received your repair request ({})", ticket)
            }
            Self::QuoteReady => format!("Your repair quote is ready ({})", ticket),
            Self::PaymentConfirmed => format!("Payment received ({})", ticket),
            Self::FinalPaymentRequest => {
                format!("Final payment for your repair ({})", ticket)
            }
            Self::ShippingNotice => format!("Your device is on its way ({})", ticket),
            Self::AdminNewRequest => format!("New repair request {}", ticket),
            Self::AdminPaymentReceived => format!("Payment received for {}", ticket),
        }
    }

    pub fn render(&self, vars: &TemplateVars) -> String {
        let ticket = var(vars, "ticket_number");
        let name = var(vars, "customer_name");
        let shop = var(vars, "shop_name");
        match self {
            Self::RequestConfirmation => format!(
                "Hi {name},\n\n\
                 Thanks for sending your {device} our way. Your ticket number is {ticket}.\n\
                 We'll review the issue and follow up with a quote shortly.\n\n\
                 Track your repair any time: {tracking_link}\n\n\
                 {shop}",
                name = name,
                device = var(vars, "device_type"),
                ticket = ticket,
                tracking_link = var(vars, "tracking_link"),
                shop = shop,
            ),
            Self::QuoteReady => format!(
                "Hi {name},\n\n\
                 We've looked over ticket {ticket} and the repair comes to {quote}.\n\
                 {deposit_line}\
                 Pay securely here: {payment_link}\n\n\
                 {shop}",
                name = name,
                ticket = ticket,
                quote = var(vars, "quote_amount"),
                deposit_line = match vars.get("deposit_amount") {
                    Some(deposit) if !deposit.is_empty() => format!(
                        "A deposit of {} gets the repair on our bench; the rest is due once the work is done.\n",
                        deposit
                    ),
                    _ => String::new(),
                },
                payment_link = var(vars, "payment_link"),
                shop = shop,
            ),
            Self::PaymentConfirmed => format!(
                "Hi {name},\n\n\
                 We've received your payment of {amount} for ticket {ticket}.\n\
                 Current status: {status}.\n\n\
                 {shop}",
                name = name,
                amount = var(vars, "amount"),
                ticket = ticket,
                status = var(vars, "status_label"),
                shop = shop,
            ),
            Self::FinalPaymentRequest => format!(
                "Hi {name},\n\n\
                 Good news: the repair on ticket {ticket} is wrapped up.\n\
                 The remaining balance is {amount_due}. Once it's settled we'll ship your device back.\n\n\
                 Pay here: {payment_link}\n\n\
                 {shop}",
                name = name,
                ticket = ticket,
                amount_due = var(vars, "amount_due"),
                payment_link = var(vars, "payment_link"),
                shop = shop,
            ),
            Self::ShippingNotice => format!(
                "Hi {name},\n\n\
                 Your device from ticket {ticket} has shipped via {carrier}.\n\
                 Tracking number: {tracking_number}\n\
                 Follow it here: {tracking_url}\n\n\
                 {shop}",
                name = name,
                ticket = ticket,
                carrier = var(vars, "carrier"),
                tracking_number = var(vars, "tracking_number"),
                tracking_url = var(vars, "tracking_url"),
                shop = shop,
            ),
            Self::AdminNewRequest => format!(
                "New repair request {ticket}.\n\n\
                 Customer: {name} <{email}>\n\
                 Device: {device}\n\
                 Issue: {issue}",
                ticket = ticket,
                name = name,
                email = var(vars, "customer_email"),
                device = var(vars, "device_type"),
                issue = var(vars, "issue_description"),
            ),
            Self::AdminPaymentReceived => format!(
                "Payment of {amount} received for ticket {ticket} ({payment_type}).\n\
                 Total paid so far: {amount_paid}.",
                amount = var(vars, "amount"),
                ticket = ticket,
                payment_type = var(vars, "payment_type"),
                amount_paid = var(vars, "amount_paid"),
            ),
        }
    }
}

fn var<'a>(vars: &'a TemplateVars, key: &str) -> &'a str {
    vars.get(key).map(String::as_str).unwrap_or("")
}

/// Formats minor units as a dollar string for email bodies.
pub fn format_money(minor_units: i64) -> String {
    let sign = if minor_units < 0 { "-" } else { "" };
    let abs = minor_units.unsigned_abs();
    format!("{}${}.{:02}", sign, abs / 100, abs % 100)
}

/// Trait for notification delivery
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(
        &self,
        to: &str,
        template: EmailTemplate,
        vars: &TemplateVars,
    ) -> Result<(), NotificationError>;
}

/// Resend-backed mailer
#[derive(Clone)]
pub struct ResendMailer {
    http: reqwest::Client,
    api_base: String,
    api_key: String,
    from_address: String,
}

impl ResendMailer {
    pub fn new(cfg: &EmailConfig) -> Result<Self, NotificationError> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(cfg.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            api_base: cfg.api_base.trim_end_matches('/').to_string(),
            api_key: cfg.api_key.clone(),
            from_address: cfg.from_address.clone(),
        })
    }
}

#[async_trait]
impl NotificationSender for ResendMailer {
    async fn send(
        &self,
        to: &str,
        template: EmailTemplate,
        vars: &TemplateVars,
    ) -> Result<(), NotificationError> {
        let payload = json!({
            "from": self.from_address,
            "to": [to],
            "subject": template.subject(vars),
            "text": template.render(vars),
        });

        let response = self
            .http
            .post(format!("{}/emails", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(NotificationError::Provider {
                status: status.as_u16(),
                message,
            });
        }

        Ok(())
    }
}

/// Fire-and-forget delivery used after the primary state change has
/// committed. Failures are logged and never propagate.
pub fn dispatch(
    mailer: Arc<dyn NotificationSender>,
    to: String,
    template: EmailTemplate,
    vars: TemplateVars,
) {
    tokio::spawn(async move {
        if let Err(e) = mailer.send(&to, template, &vars).await {
            warn!(
                template = template.name(),
                recipient = %to,
                error = %e,
                "Notification send failed"
            );
        }
    });
}
