//! Atomic invoice settlement: invoice status, audit row and fund credit.

use crate::models::{
    Direction, FundType, Invoice, InvoiceStatus, PaymentMethod, PaymentSession,
    PaymentSessionStatus,
};
use crate::services::database::Database;
use crate::services::metrics::{record_ledger_amount, DB_QUERY_DURATION};
use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use service_core::error::AppError;
use sqlx::{Postgres, Transaction};
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// A confirmed payment ready to be written to the books.
#[derive(Debug, Clone)]
pub struct Settlement {
    pub tran_id: String,
    pub invoice_ids: Vec<Uuid>,
    /// Amount the payer was actually charged.
    pub amount: Decimal,
    pub method: PaymentMethod,
    pub val_id: Option<String>,
    pub bank_tran_id: Option<String>,
    pub validation_status: String,
    pub raw_response: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementOutcome {
    /// Invoices moved to PAID in this call, with the total credited.
    Settled { invoice_ids: Vec<Uuid>, total: Decimal },
    /// A previous delivery already settled this payment.
    AlreadySettled,
    /// The payment does not match what was billed; nothing was written.
    Rejected(String),
}

enum Aborted {
    Duplicate,
    Rejected(String),
    Failed(AppError),
}

impl From<AppError> for Aborted {
    fn from(e: AppError) -> Self {
        Aborted::Failed(e)
    }
}

fn classify(context: &str, e: sqlx::Error) -> Aborted {
    match e {
        sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => Aborted::Duplicate,
        _ => Aborted::Failed(AppError::DatabaseError(anyhow::anyhow!(
            "{}: {}",
            context,
            e
        ))),
    }
}

/// Writes settlements so that invoices, audit rows and ledger credits change together or not at all.
#[derive(Clone)]
pub struct LedgerWriter {
    db: Database,
}

impl LedgerWriter {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Settle the invoices of a payment in one transaction.
    ///
    /// Gateway payments must have a VALIDATED session, which is locked and
    /// moved to PAID in the same transaction; its invoice list is
    /// authoritative. Invoices already PAID are skipped under their row
    /// lock, and the remaining invoices must total exactly the amount
    /// charged or nothing is written. A unique violation on the audit table or the one-credit-per-
    /// invoice index means a concurrent delivery won; the transaction is
    /// rolled back and reported as [`SettlementOutcome::AlreadySettled`].
    #[instrument(skip(self, settlement), fields(tran_id = %settlement.tran_id, method = settlement.method.as_str()))]
    pub async fn settle(&self, settlement: &Settlement) -> Result<SettlementOutcome, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["settle"])
            .start_timer();

        let mut tx = self.db.pool().begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let result = Self::settle_in(&mut tx, settlement).await;

        let outcome = match result {
            Ok(settled) => {
                tx.commit().await.map_err(|e| {
                    AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
                })?;
                settled
            }
            Err(Aborted::Duplicate) => {
                tx.rollback().await.ok();
                warn!("Concurrent settlement detected, rolled back");
                SettlementOutcome::AlreadySettled
            }
            Err(Aborted::Rejected(reason)) => {
                tx.rollback().await.ok();
                warn!(reason = %reason, "Settlement rejected");
                SettlementOutcome::Rejected(reason)
            }
            Err(Aborted::Failed(e)) => {
                tx.rollback().await.ok();
                return Err(e);
            }
        };

        timer.observe_duration();

        if let SettlementOutcome::Settled { invoice_ids, total } = &outcome {
            record_ledger_amount(
                FundType::Monthly.as_str(),
                Direction::Credit.as_str(),
                total.to_f64().unwrap_or_default(),
            );
            info!(
                invoices = invoice_ids.len(),
                total = %total,
                "Invoices settled"
            );
        }

        Ok(outcome)
    }

    async fn settle_in(
        tx: &mut Transaction<'_, Postgres>,
        settlement: &Settlement,
    ) -> Result<SettlementOutcome, Aborted> {
        let mut invoice_ids = settlement.invoice_ids.clone();

        if settlement.method == PaymentMethod::Sslcommerz {
            let session = sqlx::query_as::<_, PaymentSession>(
                r#"
                SELECT tran_id, student_id, invoice_ids, amount, currency, status, gateway_session_key, val_id, failure_reason, created_utc, updated_utc
                FROM payment_sessions
                WHERE tran_id = $1
                FOR UPDATE
                "#,
            )
            .bind(&settlement.tran_id)
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| classify("Failed to lock payment session", e))?
            .ok_or_else(|| Aborted::Rejected("unknown transaction".to_string()))?;

            match session.parsed_status() {
                Some(PaymentSessionStatus::Paid) => return Ok(SettlementOutcome::AlreadySettled),
                Some(PaymentSessionStatus::Validated) => {}
                other => {
                    return Err(Aborted::Rejected(format!(
                        "session is {}",
                        other.map(|s| s.as_str()).unwrap_or("unknown")
                    )))
                }
            }

            if session.amount != settlement.amount {
                return Err(Aborted::Rejected(format!(
                    "charged {} but session expects {}",
                    settlement.amount, session.amount
                )));
            }

            invoice_ids = session.invoice_ids;
        }

        invoice_ids.sort();
        invoice_ids.dedup();

        if invoice_ids.is_empty() {
            return Err(Aborted::Rejected("no invoices referenced".to_string()));
        }

        // Locked in id order so concurrent settlements cannot deadlock.
        let invoices = sqlx::query_as::<_, Invoice>(
            r#"
            SELECT invoice_id, student_id, month, year, amount, status, due_date, paid_utc, created_utc, updated_utc
            FROM invoices
            WHERE invoice_id = ANY($1)
            ORDER BY invoice_id
            FOR UPDATE
            "#,
        )
        .bind(&invoice_ids)
        .fetch_all(&mut **tx)
        .await
        .map_err(|e| classify("Failed to lock invoices", e))?;

        if invoices.len() != invoice_ids.len() {
            return Err(Aborted::Rejected("referenced invoice not found".to_string()));
        }

        // The credits must add up to exactly what was charged. An invoice
        // paid another way or re-priced since the session opened makes
        // them differ, and the payment is left for manual review.
        let outstanding: Decimal = invoices
            .iter()
            .filter(|i| !i.is_paid())
            .map(|i| i.amount)
            .sum();
        if outstanding != settlement.amount {
            return Err(Aborted::Rejected(format!(
                "received {} but unpaid invoices total {}",
                settlement.amount, outstanding
            )));
        }

        let today = Utc::now().date_naive();
        let mut settled = Vec::new();
        let mut total = Decimal::ZERO;

        for invoice in invoices.iter().filter(|i| !i.is_paid()) {
            sqlx::query(
                r#"
                UPDATE invoices
                SET status = $2, paid_utc = NOW(), updated_utc = NOW()
                WHERE invoice_id = $1
                "#,
            )
            .bind(invoice.invoice_id)
            .bind(InvoiceStatus::Paid.as_str())
            .execute(&mut **tx)
            .await
            .map_err(|e| classify("Failed to mark invoice paid", e))?;

            sqlx::query(
                r#"
                INSERT INTO gateway_transactions (record_id, invoice_id, tran_id, val_id, bank_tran_id, validation_status, payment_method, amount, raw_response)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(invoice.invoice_id)
            .bind(&settlement.tran_id)
            .bind(&settlement.val_id)
            .bind(&settlement.bank_tran_id)
            .bind(&settlement.validation_status)
            .bind(settlement.method.as_str())
            .bind(invoice.amount)
            .bind(&settlement.raw_response)
            .execute(&mut **tx)
            .await
            .map_err(|e| classify("Failed to insert gateway transaction", e))?;

            sqlx::query(
                r#"
                INSERT INTO ledger_entries (entry_id, fund, direction, amount, invoice_id, category, description, entry_date)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(FundType::Monthly.as_str())
            .bind(Direction::Credit.as_str())
            .bind(invoice.amount)
            .bind(invoice.invoice_id)
            .bind("monthly_fee")
            .bind(format!(
                "Tuition {:02}/{} via {} {}",
                invoice.month,
                invoice.year,
                settlement.method.as_str(),
                settlement.tran_id
            ))
            .bind(today)
            .execute(&mut **tx)
            .await
            .map_err(|e| classify("Failed to insert ledger entry", e))?;

            settled.push(invoice.invoice_id);
            total += invoice.amount;
        }

        if settled.len() < invoices.len() {
            info!(
                skipped = invoices.len() - settled.len(),
                "Invoices already paid were skipped"
            );
        }

        if settlement.method == PaymentMethod::Sslcommerz {
            sqlx::query(
                r#"
                UPDATE payment_sessions
                SET status = $2, updated_utc = NOW()
                WHERE tran_id = $1
                "#,
            )
            .bind(&settlement.tran_id)
            .bind(PaymentSessionStatus::Paid.as_str())
            .execute(&mut **tx)
            .await
            .map_err(|e| classify("Failed to mark session paid", e))?;
        }

        Ok(SettlementOutcome::Settled {
            invoice_ids: settled,
            total,
        })
    }
}
