use std::sync::{Arc, Mutex};

use arbor_repair_api as api;
use api::{
    auth::AuthService,
    config::AppConfig,
    db,
    events::{self, EventSender},
    handlers::AppServices,
    notifications::{EmailTemplate, NotificationError, NotificationSender, TemplateVars},
    payments::{CheckoutRequest, CheckoutSession, PaymentGateway, WebhookVerifier},
    shipping::{Address, LabelProvider, LabelPurchase, Parcel, ShippingRate},
    AppState,
};
use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Method, Request},
    middleware,
    routing::get,
    Router,
};
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

/// Gateway stub: hands back a deterministic hosted checkout session
/// keyed by the ticket so tests can correlate sessions with requests.
struct StubGateway;

#[async_trait]
impl PaymentGateway for StubGateway {
    async fn create_checkout_session(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, api::errors::ServiceError> {
        let session_id = format!("cs_test_{}", request.ticket_number.to_lowercase());
        Ok(CheckoutSession {
            hosted_url: format!("https://checkout.example.com/{}", session_id),
            session_id,
        })
    }
}

/// Label provider stub offering a UPS and a USPS rate; the development
/// configuration prefers USPS, so purchases land on the USPS rate.
struct StubLabels;

#[async_trait]
impl LabelProvider for StubLabels {
    async fn create_shipment(
        &self,
        _from: &Address,
        _to: &Address,
        _parcel: &Parcel,
    ) -> Result<Vec<ShippingRate>, api::errors::ServiceError> {
        Ok(vec![
            ShippingRate {
                rate_id: "rate_ups_ground".to_string(),
                carrier: "ups".to_string(),
                service: "Ground".to_string(),
                amount_minor: 799,
            },
            ShippingRate {
                rate_id: "rate_usps_priority".to_string(),
                carrier: "usps".to_string(),
                service: "Priority".to_string(),
                amount_minor: 1015,
            },
        ])
    }

    async fn purchase_label(
        &self,
        _rate_id: &str,
    ) -> Result<LabelPurchase, api::errors::ServiceError> {
        Ok(LabelPurchase {
            label_url: "https://labels.example.com/test-label.pdf".to_string(),
            tracking_number: "9400100000000000000001".to_string(),
            tracking_url_provider: None,
        })
    }
}

/// Mailer stub that records (recipient, template name) pairs.
struct RecordingMailer {
    sent: Arc<Mutex<Vec<(String, String)>>>,
}

#[async_trait]
impl NotificationSender for RecordingMailer {
    async fn send(
        &self,
        to: &str,
        template: EmailTemplate,
        _vars: &TemplateVars,
    ) -> Result<(), NotificationError> {
        self.sent
            .lock()
            .expect("mail log poisoned")
            .push((to.to_string(), template.name().to_string()));
        Ok(())
    }
}

/// Test harness: full application state over a throwaway SQLite database,
/// with external adapters stubbed out.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    token: String,
    sent_mail: Arc<Mutex<Vec<(String, String)>>>,
    db_file: std::path::PathBuf,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        let db_file =
            std::env::temp_dir().join(format!("arbor_test_{}.db", Uuid::new_v4().simple()));
        let mut cfg =
            AppConfig::for_development(format!("sqlite://{}?mode=rwc", db_file.display()));
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");
        let db_arc = Arc::new(pool);

        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = EventSender::new(event_tx);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let sent_mail: Arc<Mutex<Vec<(String, String)>>> = Arc::new(Mutex::new(Vec::new()));
        let mailer = Arc::new(RecordingMailer {
            sent: sent_mail.clone(),
        });

        let auth = Arc::new(AuthService::from_config(&cfg));
        let password = cfg.admin_password.clone().expect("dev admin password");
        let token = auth
            .login(&cfg.admin_username, &password)
            .expect("admin login for tests")
            .token;

        let webhook_verifier = Arc::new(WebhookVerifier::from_config(&cfg.payments));
        let config = Arc::new(cfg);
        let services = AppServices::new(
            db_arc.clone(),
            Some(Arc::new(event_sender)),
            Arc::new(StubGateway),
            Arc::new(StubLabels),
            mailer,
            config.clone(),
        );

        let state = AppState {
            db: db_arc,
            config,
            services,
            auth,
            webhook_verifier,
        };

        let router = Router::new()
            .route("/health", get(api::health_check))
            .nest("/api/v1", api::api_v1_routes())
            .layer(middleware::from_fn(api::middleware::propagate_request_id))
            .with_state(state.clone());

        Self {
            router,
            state,
            token,
            sent_mail,
            db_file,
            _event_task: event_task,
        }
    }

    /// Access the bearer token for the admin user.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Send a request against the router with an optional bearer token.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);

        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Convenience helper for authenticated JSON requests.
    pub async fn request_authenticated(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> axum::response::Response {
        self.request(method, uri, body, Some(self.token())).await
    }

    /// Signs a webhook payload the way the gateway would.
    pub fn sign_webhook(&self, payload: &str) -> String {
        let timestamp = chrono::Utc::now().timestamp();
        let signed = format!("{}.{}", timestamp, payload);
        let mut mac = Hmac::<Sha256>::new_from_slice(
            self.state.config.payments.webhook_secret.as_bytes(),
        )
        .expect("hmac key");
        mac.update(signed.as_bytes());
        format!(
            "t={},v1={}",
            timestamp,
            hex::encode(mac.finalize().into_bytes())
        )
    }

    /// Delivers a signed webhook payload to the Stripe receiver endpoint.
    pub async fn deliver_webhook(&self, payload: &Value) -> axum::response::Response {
        let body = payload.to_string();
        let signature = self.sign_webhook(&body);
        self.deliver_webhook_raw(body, Some(&signature)).await
    }

    /// Delivers a webhook body as-is, optionally with a signature header.
    /// Lets tests exercise missing, stale, or forged signatures.
    pub async fn deliver_webhook_raw(
        &self,
        body: String,
        signature: Option<&str>,
    ) -> axum::response::Response {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri("/api/v1/webhooks/stripe")
            .header("content-type", "application/json");
        if let Some(sig) = signature {
            builder = builder.header("Stripe-Signature", sig);
        }

        let request = builder
            .body(Body::from(body))
            .expect("failed to build webhook request");

        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during webhook delivery")
    }

    /// Lets spawned notification tasks run to completion.
    pub async fn settle(&self) {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    /// Snapshot of (recipient, template name) pairs sent so far.
    pub fn sent_mail(&self) -> Vec<(String, String)> {
        self.sent_mail.lock().expect("mail log poisoned").clone()
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
        let _ = std::fs::remove_file(&self.db_file);
    }
}
