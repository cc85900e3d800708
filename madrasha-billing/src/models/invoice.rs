//! Monthly tuition invoices and generator runs.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Invoice status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceStatus {
    Unpaid,
    Paid,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Unpaid => "UNPAID",
            InvoiceStatus::Paid => "PAID",
        }
    }

    pub fn from_string(s: &str) -> Option<Self> {
        match s {
            "UNPAID" => Some(InvoiceStatus::Unpaid),
            "PAID" => Some(InvoiceStatus::Paid),
            _ => None,
        }
    }
}

impl std::fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Invoice {
    pub invoice_id: Uuid,
    pub student_id: Uuid,
    pub month: i32,
    pub year: i32,
    pub amount: Decimal,
    pub status: String,
    pub due_date: NaiveDate,
    pub paid_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Invoice {
    pub fn parsed_status(&self) -> Option<InvoiceStatus> {
        InvoiceStatus::from_string(&self.status)
    }

    pub fn is_paid(&self) -> bool {
        self.parsed_status() == Some(InvoiceStatus::Paid)
    }
}

/// Filter parameters for listing invoices.
#[derive(Debug, Clone, Default)]
pub struct ListInvoicesFilter {
    pub student_id: Option<Uuid>,
    pub month: Option<i32>,
    pub year: Option<i32>,
    pub status: Option<InvoiceStatus>,
    pub page_size: i32,
    pub page_token: Option<Uuid>,
}

/// What the generator did for one student.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationOutcome {
    Created,
    Updated,
    Existed,
    Skipped,
}

/// Counters reported by one generator run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationReport {
    pub created: u32,
    pub updated: u32,
    pub skipped: u32,
    pub existed: u32,
    /// Students whose upsert raised a database error; the run carries on.
    pub failed: u32,
}

impl GenerationReport {
    pub fn record(&mut self, outcome: GenerationOutcome) {
        match outcome {
            GenerationOutcome::Created => self.created += 1,
            GenerationOutcome::Updated => self.updated += 1,
            GenerationOutcome::Existed => self.existed += 1,
            GenerationOutcome::Skipped => self.skipped += 1,
        }
    }

    pub fn total(&self) -> u32 {
        self.created + self.updated + self.skipped + self.existed + self.failed
    }
}

/// Persisted record of one generator execution.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct InvoiceRun {
    pub run_id: Uuid,
    pub month: i32,
    pub year: i32,
    pub refresh_unpaid: bool,
    pub created: i32,
    pub updated: i32,
    pub skipped: i32,
    pub existed: i32,
    pub failed: i32,
    pub started_utc: DateTime<Utc>,
    pub completed_utc: DateTime<Utc>,
}
