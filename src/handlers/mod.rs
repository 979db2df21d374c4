pub mod auth;
pub mod blog;
pub mod payment_webhooks;
pub mod repairs;

use std::sync::Arc;

use crate::config::AppConfig;
use crate::db::DbPool;
use crate::events::EventSender;
use crate::notifications::NotificationSender;
use crate::payments::PaymentGateway;
use crate::services::blog::BlogService;
use crate::services::repair_orders::RepairOrderService;
use crate::shipping::LabelProvider;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub repair_orders: Arc<RepairOrderService>,
    pub blog: Arc<BlogService>,
}

impl AppServices {
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Option<Arc<EventSender>>,
        gateway: Arc<dyn PaymentGateway>,
        labels: Arc<dyn LabelProvider>,
        mailer: Arc<dyn NotificationSender>,
        config: Arc<AppConfig>,
    ) -> Self {
        let repair_orders = Arc::new(RepairOrderService::new(
            db_pool.clone(),
            event_sender.clone(),
            gateway,
            labels,
            mailer,
            config,
        ));
        let blog = Arc::new(BlogService::new(db_pool, event_sender));

        Self {
            repair_orders,
            blog,
        }
    }
}
