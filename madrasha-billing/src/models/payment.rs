//! Gateway payment attempts and their audit rows.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Lifecycle of a hosted-payment attempt.
///
/// `Pending → Validated → Paid`, or `Pending → Failed | Cancelled | Invalid`.
/// Failed, cancelled and invalid attempts are only advisory: callbacks can
/// be forged, so a later gateway validation may still move them to
/// `Validated`. `Paid` is the only final state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentSessionStatus {
    Pending,
    Validated,
    Paid,
    Failed,
    Cancelled,
    Invalid,
}

impl PaymentSessionStatus {
    pub const ALL: [PaymentSessionStatus; 6] = [
        PaymentSessionStatus::Pending,
        PaymentSessionStatus::Validated,
        PaymentSessionStatus::Paid,
        PaymentSessionStatus::Failed,
        PaymentSessionStatus::Cancelled,
        PaymentSessionStatus::Invalid,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentSessionStatus::Pending => "PENDING",
            PaymentSessionStatus::Validated => "VALIDATED",
            PaymentSessionStatus::Paid => "PAID",
            PaymentSessionStatus::Failed => "FAILED",
            PaymentSessionStatus::Cancelled => "CANCELLED",
            PaymentSessionStatus::Invalid => "INVALID",
        }
    }

    pub fn from_string(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(PaymentSessionStatus::Pending),
            "VALIDATED" => Some(PaymentSessionStatus::Validated),
            "PAID" => Some(PaymentSessionStatus::Paid),
            "FAILED" => Some(PaymentSessionStatus::Failed),
            "CANCELLED" => Some(PaymentSessionStatus::Cancelled),
            "INVALID" => Some(PaymentSessionStatus::Invalid),
            _ => None,
        }
    }

    /// Statuses a session may legally move to from `self`.
    pub fn can_transition_to(&self, next: PaymentSessionStatus) -> bool {
        use PaymentSessionStatus::*;
        matches!(
            (self, next),
            (Pending, Validated)
                | (Pending, Failed)
                | (Pending, Cancelled)
                | (Pending, Invalid)
                | (Failed, Validated)
                | (Cancelled, Validated)
                | (Invalid, Validated)
                | (Validated, Paid)
                // A validated attempt whose ledger write was rolled back can be retried.
                | (Validated, Validated)
        )
    }

    pub fn is_final(&self) -> bool {
        *self == PaymentSessionStatus::Paid
    }
}

impl std::fmt::Display for PaymentSessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PaymentSession {
    pub tran_id: String,
    pub student_id: Uuid,
    pub invoice_ids: Vec<Uuid>,
    pub amount: Decimal,
    pub currency: String,
    pub status: String,
    pub gateway_session_key: Option<String>,
    pub val_id: Option<String>,
    pub failure_reason: Option<String>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl PaymentSession {
    pub fn parsed_status(&self) -> Option<PaymentSessionStatus> {
        PaymentSessionStatus::from_string(&self.status)
    }
}

/// How an invoice was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    Sslcommerz,
    Cash,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Sslcommerz => "SSLCOMMERZ",
            PaymentMethod::Cash => "CASH",
        }
    }
}

/// Immutable audit row written for every settled invoice.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct GatewayTransaction {
    pub record_id: Uuid,
    pub invoice_id: Uuid,
    pub tran_id: String,
    pub val_id: Option<String>,
    pub bank_tran_id: Option<String>,
    pub validation_status: String,
    pub payment_method: String,
    pub amount: Decimal,
    pub raw_response: Option<serde_json::Value>,
    pub created_utc: DateTime<Utc>,
}

/// Input for opening a payment session.
#[derive(Debug, Clone)]
pub struct CreatePaymentSession {
    pub tran_id: String,
    pub student_id: Uuid,
    pub invoice_ids: Vec<Uuid>,
    pub amount: Decimal,
    pub currency: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use PaymentSessionStatus::*;

    #[test]
    fn status_round_trips_through_strings() {
        for status in PaymentSessionStatus::ALL {
            assert_eq!(PaymentSessionStatus::from_string(status.as_str()), Some(status));
        }
        assert_eq!(PaymentSessionStatus::from_string("pending"), None);
    }

    #[test]
    fn closed_attempts_can_still_be_validated() {
        for status in [Failed, Cancelled, Invalid] {
            assert!(status.can_transition_to(Validated));
            assert!(!status.can_transition_to(Paid));
            assert!(!status.is_final());
        }
    }

    #[test]
    fn paid_is_final() {
        assert!(Paid.is_final());
        for next in PaymentSessionStatus::ALL {
            assert!(!Paid.can_transition_to(next));
        }
    }

    #[test]
    fn only_pending_attempts_can_be_closed() {
        for next in [Failed, Cancelled, Invalid] {
            assert!(Pending.can_transition_to(next));
            assert!(!Validated.can_transition_to(next));
            assert!(!Failed.can_transition_to(next));
        }
    }
}
