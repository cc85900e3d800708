//! Fund ledger model.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Pool an entry belongs to. Balances are never netted across funds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FundType {
    /// Monthly tuition; credited only by invoice settlement.
    Monthly,
    Donation,
    DanaCommittee,
    General,
}

impl FundType {
    pub const ALL: [FundType; 4] = [
        FundType::Monthly,
        FundType::Donation,
        FundType::DanaCommittee,
        FundType::General,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FundType::Monthly => "MONTHLY",
            FundType::Donation => "DONATION",
            FundType::DanaCommittee => "DANA_COMMITTEE",
            FundType::General => "GENERAL",
        }
    }

    pub fn from_string(s: &str) -> Option<Self> {
        match s {
            "MONTHLY" => Some(FundType::Monthly),
            "DONATION" => Some(FundType::Donation),
            "DANA_COMMITTEE" => Some(FundType::DanaCommittee),
            "GENERAL" => Some(FundType::General),
            _ => None,
        }
    }
}

impl std::fmt::Display for FundType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Entry direction, seen from the fund: credits add money, debits spend it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    Debit,
    Credit,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Debit => "DEBIT",
            Direction::Credit => "CREDIT",
        }
    }

    pub fn from_string(s: &str) -> Option<Self> {
        match s {
            "DEBIT" => Some(Direction::Debit),
            "CREDIT" => Some(Direction::Credit),
            _ => None,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub entry_id: Uuid,
    pub fund: String,
    pub direction: String,
    pub amount: Decimal,
    pub invoice_id: Option<Uuid>,
    pub category: Option<String>,
    pub description: Option<String>,
    pub entry_date: NaiveDate,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn parsed_direction(&self) -> Option<Direction> {
        Direction::from_string(&self.direction)
    }

    pub fn parsed_fund(&self) -> Option<FundType> {
        FundType::from_string(&self.fund)
    }

    /// Signed amount (positive for credit, negative for debit).
    pub fn signed_amount(&self) -> Decimal {
        match self.parsed_direction() {
            Some(Direction::Credit) => self.amount,
            Some(Direction::Debit) => -self.amount,
            None => Decimal::ZERO,
        }
    }

    /// Expenses are the only entries an administrator may correct.
    pub fn is_correctable_expense(&self) -> bool {
        self.parsed_direction() == Some(Direction::Debit) && self.invoice_id.is_none()
    }
}

/// Input for appending an entry outside invoice settlement.
#[derive(Debug, Clone)]
pub struct CreateLedgerEntry {
    pub fund: FundType,
    pub direction: Direction,
    pub amount: Decimal,
    pub category: Option<String>,
    pub description: Option<String>,
    pub entry_date: NaiveDate,
}

/// Fields an expense correction may change.
#[derive(Debug, Clone, Default)]
pub struct CorrectExpense {
    pub amount: Option<Decimal>,
    pub category: Option<String>,
    pub description: Option<String>,
}

/// Filter parameters for listing ledger entries.
#[derive(Debug, Clone, Default)]
pub struct ListLedgerFilter {
    pub fund: Option<FundType>,
    pub direction: Option<Direction>,
    pub invoice_id: Option<Uuid>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub page_size: i32,
    pub page_token: Option<Uuid>,
}

/// Totals for one fund.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct FundBalance {
    pub fund: String,
    pub credits: Decimal,
    pub debits: Decimal,
    pub balance: Decimal,
}
