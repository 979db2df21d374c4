use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

// Define the various events that can occur in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    RequestCreated {
        request_id: Uuid,
        ticket_number: String,
    },
    QuoteSent {
        request_id: Uuid,
        quote_amount: i64,
        deposit_amount: Option<i64>,
    },
    PaymentRecorded {
        request_id: Uuid,
        event_id: String,
        amount: i64,
        payment_status: String,
    },
    FinalPaymentRequested {
        request_id: Uuid,
        amount_due: i64,
    },
    LabelPurchased {
        request_id: Uuid,
        tracking_number: String,
        carrier: String,
    },
    StatusChanged {
        request_id: Uuid,
        old_status: String,
        new_status: String,
    },
    RequestCancelled(Uuid),
    BlogPostPublished(Uuid),
}

// Consumes events from the channel and records them; side effects with
// business meaning (emails, persistence) happen in the services, not here.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::RequestCreated {
                request_id,
                ticket_number,
            } => {
                info!(%request_id, %ticket_number, "Repair request created");
            }
            Event::QuoteSent {
                request_id,
                quote_amount,
                deposit_amount,
            } => {
                info!(
                    %request_id,
                    quote_amount,
                    ?deposit_amount,
                    "Quote sent"
                );
            }
            Event::PaymentRecorded {
                request_id,
                event_id,
                amount,
                payment_status,
            } => {
                info!(
                    %request_id,
                    %event_id,
                    amount,
                    %payment_status,
                    "Payment recorded"
                );
            }
            Event::FinalPaymentRequested {
                request_id,
                amount_due,
            } => {
                info!(%request_id, amount_due, "Final payment requested");
            }
            Event::LabelPurchased {
                request_id,
                tracking_number,
                carrier,
            } => {
                info!(%request_id, %tracking_number, %carrier, "Shipping label purchased");
            }
            Event::StatusChanged {
                request_id,
                old_status,
                new_status,
            } => {
                info!(%request_id, %old_status, %new_status, "Status changed");
            }
            Event::RequestCancelled(request_id) => {
                info!(%request_id, "Repair request cancelled");
            }
            Event::BlogPostPublished(post_id) => {
                info!(%post_id, "Blog post published");
            }
        }
    }

    warn!("Event processing loop has ended");
}
