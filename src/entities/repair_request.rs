use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Repair ticket lifecycle state.
///
/// Happy path: Pending -> Quoted -> DepositPaid -> Received -> InProgress ->
/// RepairComplete -> Shipped. Cancelled is reachable from any non-terminal
/// state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RepairStatus {
    #[sea_orm(string_value = "PENDING")]
    Pending,

    #[sea_orm(string_value = "QUOTED")]
    Quoted,

    #[sea_orm(string_value = "DEPOSIT_PAID")]
    DepositPaid,

    #[sea_orm(string_value = "RECEIVED")]
    Received,

    #[sea_orm(string_value = "IN_PROGRESS")]
    InProgress,

    #[sea_orm(string_value = "REPAIR_COMPLETE")]
    RepairComplete,

    #[sea_orm(string_value = "SHIPPED")]
    Shipped,

    #[sea_orm(string_value = "CANCELLED")]
    Cancelled,
}

impl RepairStatus {
    /// Parses a status name case-insensitively. Hyphens and spaces are
    /// treated as underscores, and the legacy names `APPROVED` and
    /// `COMPLETED` map onto their canonical equivalents.
    pub fn parse(value: &str) -> Option<Self> {
        let normalized = value.trim().to_ascii_uppercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "PENDING" => Some(Self::Pending),
            "QUOTED" => Some(Self::Quoted),
            "DEPOSIT_PAID" | "APPROVED" => Some(Self::DepositPaid),
            "RECEIVED" => Some(Self::Received),
            "IN_PROGRESS" => Some(Self::InProgress),
            "REPAIR_COMPLETE" | "COMPLETED" => Some(Self::RepairComplete),
            "SHIPPED" => Some(Self::Shipped),
            "CANCELLED" | "CANCELED" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Terminal states accept no further lifecycle transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Shipped | Self::Cancelled)
    }

    /// Customer-facing label for tracking pages and emails.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Pending => "Pending review",
            Self::Quoted => "Quote sent",
            Self::DepositPaid => "Deposit paid, awaiting device",
            Self::Received => "Device received",
            Self::InProgress => "Repair in progress",
            Self::RepairComplete => "Repair complete",
            Self::Shipped => "Shipped back to you",
            Self::Cancelled => "Cancelled",
        }
    }
}

impl fmt::Display for RepairStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepairStatus::Pending => write!(f, "PENDING"),
            RepairStatus::Quoted => write!(f, "QUOTED"),
            RepairStatus::DepositPaid => write!(f, "DEPOSIT_PAID"),
            RepairStatus::Received => write!(f, "RECEIVED"),
            RepairStatus::InProgress => write!(f, "IN_PROGRESS"),
            RepairStatus::RepairComplete => write!(f, "REPAIR_COMPLETE"),
            RepairStatus::Shipped => write!(f, "SHIPPED"),
            RepairStatus::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

/// Payment progress, tracked independently of the repair lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    #[sea_orm(string_value = "NONE")]
    None,

    #[sea_orm(string_value = "QUOTE_SENT")]
    QuoteSent,

    #[sea_orm(string_value = "DEPOSIT_PAID")]
    DepositPaid,

    #[sea_orm(string_value = "PAYMENT_REQUESTED")]
    PaymentRequested,

    #[sea_orm(string_value = "PAID_IN_FULL")]
    PaidInFull,
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentStatus::None => write!(f, "NONE"),
            PaymentStatus::QuoteSent => write!(f, "QUOTE_SENT"),
            PaymentStatus::DepositPaid => write!(f, "DEPOSIT_PAID"),
            PaymentStatus::PaymentRequested => write!(f, "PAYMENT_REQUESTED"),
            PaymentStatus::PaidInFull => write!(f, "PAID_IN_FULL"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "repair_requests")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Customer-facing ticket identity, `ARB-XXXXX`, unique and immutable.
    pub ticket_number: String,

    pub device_type: String,
    pub issue_description: String,

    /// Ordered free-text issue tags, stored as a JSON array of strings.
    pub common_issues: Json,

    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: Option<String>,

    pub shipping_address: String,
    pub shipping_city: String,
    pub shipping_state: String,
    pub shipping_zip: String,

    pub status: RepairStatus,
    pub payment_status: PaymentStatus,

    /// Monetary amounts in minor units (cents).
    pub quote_amount: Option<i64>,
    pub deposit_amount: Option<i64>,
    pub amount_paid: i64,

    /// Most recent gateway checkout session; overwritten per payment request.
    pub checkout_session_id: Option<String>,
    pub payment_intent_id: Option<String>,

    /// Label fields are written at most once.
    pub label_url: Option<String>,
    pub tracking_number: Option<String>,
    pub tracking_url: Option<String>,
    pub tracking_carrier: Option<String>,

    /// Optimistic-lock counter; every write is conditional on it.
    pub version: i32,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Model {
    /// Issue tags as owned strings; malformed stored JSON yields an empty list.
    pub fn common_issues_vec(&self) -> Vec<String> {
        self.common_issues
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_owned))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Outstanding balance against the quote, never negative.
    pub fn remaining_balance(&self) -> i64 {
        self.quote_amount
            .map(|quote| (quote - self.amount_paid).max(0))
            .unwrap_or(0)
    }

    pub fn has_tracking(&self) -> bool {
        self.tracking_number.is_some()
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_canonical_and_legacy_names() {
        assert_eq!(RepairStatus::parse("PENDING"), Some(RepairStatus::Pending));
        assert_eq!(
            RepairStatus::parse("repair-complete"),
            Some(RepairStatus::RepairComplete)
        );
        assert_eq!(
            RepairStatus::parse("approved"),
            Some(RepairStatus::DepositPaid)
        );
        assert_eq!(
            RepairStatus::parse("Completed"),
            Some(RepairStatus::RepairComplete)
        );
        assert_eq!(RepairStatus::parse("on fire"), None);
    }

    #[test]
    fn display_matches_stored_value() {
        assert_eq!(RepairStatus::DepositPaid.to_string(), "DEPOSIT_PAID");
        assert_eq!(PaymentStatus::PaidInFull.to_string(), "PAID_IN_FULL");
    }

    #[test]
    fn terminal_states() {
        assert!(RepairStatus::Cancelled.is_terminal());
        assert!(RepairStatus::Shipped.is_terminal());
        assert!(!RepairStatus::RepairComplete.is_terminal());
    }

    #[test]
    fn remaining_balance_clamps_at_zero() {
        let model = Model {
            id: Uuid::new_v4(),
            ticket_number: "ARB-TEST1".into(),
            device_type: "Game console".into(),
            issue_description: "No video output".into(),
            common_issues: serde_json::json!(["hdmi port"]),
            customer_name: "Sam".into(),
            customer_email: "sam@example.com".into(),
            customer_phone: None,
            shipping_address: "1 Main St".into(),
            shipping_city: "Portland".into(),
            shipping_state: "OR".into(),
            shipping_zip: "97201".into(),
            status: RepairStatus::Quoted,
            payment_status: PaymentStatus::DepositPaid,
            quote_amount: Some(5000),
            deposit_amount: Some(2000),
            amount_paid: 6000,
            checkout_session_id: None,
            payment_intent_id: None,
            label_url: None,
            tracking_number: None,
            tracking_url: None,
            tracking_carrier: None,
            version: 1,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert_eq!(model.remaining_balance(), 0);
        assert_eq!(model.common_issues_vec(), vec!["hdmi port".to_string()]);
    }
}
