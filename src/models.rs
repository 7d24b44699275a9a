// src/models.rs

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Payment interval of a savings circle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Cadence {
    Weekly,
    Biweekly,
    Monthly,
}

impl Cadence {
    pub fn interval_days(&self) -> i64 {
        match self {
            Cadence::Weekly => 7,
            Cadence::Biweekly => 14,
            Cadence::Monthly => 30,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Cadence::Weekly => "weekly",
            Cadence::Biweekly => "biweekly",
            Cadence::Monthly => "monthly",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "weekly" => Some(Cadence::Weekly),
            "biweekly" => Some(Cadence::Biweekly),
            "monthly" => Some(Cadence::Monthly),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Approved,
    Rejected,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Approved => "approved",
            PaymentStatus::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(PaymentStatus::Pending),
            "approved" => Some(PaymentStatus::Approved),
            "rejected" => Some(PaymentStatus::Rejected),
            _ => None,
        }
    }

    /// Settled payments consume their due date; rejected ones stay retryable.
    pub fn is_settled(&self) -> bool {
        matches!(self, PaymentStatus::Pending | PaymentStatus::Approved)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Receipt,
    Gateway,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Receipt => "receipt",
            PaymentMethod::Gateway => "gateway",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "receipt" => Some(PaymentMethod::Receipt),
            "gateway" => Some(PaymentMethod::Gateway),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: i32,
    pub name: String,
    pub last_names: Option<String>,
    pub email: String,
    pub phone: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Cycle {
    pub id: i32,
    pub amount: f64,
    pub cadence: Cadence,
    pub start_date: Option<NaiveDate>,
    pub pay_day: Option<String>,
    pub total_turns: i32,
    pub started: bool,
    pub version: i32,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Participant {
    pub id: i32,
    pub cycle_id: i32,
    pub user_id: i32,
    pub turn_order: i32,
    pub has_paid: bool,
    pub user_name: Option<String>,
    pub user_email: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScheduleEntry {
    pub id: i32,
    pub cycle_id: i32,
    pub participant_id: i32,
    pub user_id: i32,
    pub turn_index: i32,
    pub due_date: Option<NaiveDate>,
    pub receipt_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Payment {
    pub id: i32,
    pub user_id: i32,
    pub cycle_id: i32,
    pub amount: f64,
    pub due_date: NaiveDate,
    pub status: PaymentStatus,
    pub late: bool,
    pub penalty: f64,
    pub receipt_url: Option<String>,
    pub ocr_message: Option<String>,
    pub method: PaymentMethod,
    pub gateway_reference: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

/// Bank account receiving manual transfers; ground truth for OCR matching.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DestinationAccount {
    #[serde(default)]
    pub id: i32,
    pub titleholder: String,
    pub account_number: String,
    pub card_number: Option<String>,
    pub bank: String,
}

#[derive(Debug, Serialize)]
pub struct Notification {
    pub id: i32,
    pub user_id: i32,
    pub kind: String,
    pub title: String,
    pub message: String,
    pub channel: String,
    pub created_at: Option<DateTime<Utc>>,
}
