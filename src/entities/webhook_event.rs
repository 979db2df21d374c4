use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Processed payment-gateway events, keyed by the gateway's event id.
/// Inserted in the same transaction as the payment mutation so a
/// redelivered event is recognized and skipped.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "webhook_events")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub event_id: String,
    pub event_type: String,

    pub ticket_number: Option<String>,

    /// Amount carried by the event, in minor units.
    pub amount: Option<i64>,

    pub received_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
