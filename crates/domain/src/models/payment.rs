//! EMI payment records.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use validator::Validate;

/// How an installment was paid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Upi,
    BankTransfer,
    Cheque,
    Card,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::Upi => "upi",
            PaymentMethod::BankTransfer => "bank_transfer",
            PaymentMethod::Cheque => "cheque",
            PaymentMethod::Card => "card",
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cash" => Ok(PaymentMethod::Cash),
            "upi" => Ok(PaymentMethod::Upi),
            "bank_transfer" => Ok(PaymentMethod::BankTransfer),
            "cheque" => Ok(PaymentMethod::Cheque),
            "card" => Ok(PaymentMethod::Card),
            other => Err(format!("Unknown payment method: {}", other)),
        }
    }
}

/// A recorded installment. Never modified after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRecord {
    pub id: String,
    pub emi_number: i32,
    pub amount: f64,
    pub paid_date: NaiveDate,
    pub transaction_id: String,
    pub payment_method: PaymentMethod,
    pub recorded_by: String,
    pub recorded_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Payment details as submitted by the admin.
///
/// `emiNumber` is assigned by the server from the device's paid count; a
/// client-supplied value is ignored.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NewPayment {
    pub id: Option<String>,

    #[validate(custom(function = "shared::validation::validate_amount"))]
    pub amount: f64,

    pub paid_date: NaiveDate,

    #[validate(length(min = 1, max = 100, message = "Transaction ID is required"))]
    pub transaction_id: String,

    pub payment_method: PaymentMethod,

    #[validate(length(min = 1, max = 100, message = "Recorded by is required"))]
    pub recorded_by: String,

    #[validate(length(max = 1000, message = "Notes must be at most 1000 characters"))]
    pub notes: Option<String>,
}

/// Request payload for `POST /api/devices/:id/payment`.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RecordPaymentRequest {
    #[validate(nested)]
    pub payment: NewPayment,

    /// Defaults to one month after the current due date.
    pub next_due_date: Option<NaiveDate>,
}
