//! Monthly invoice generation.

use crate::models::{GenerationOutcome, GenerationReport, InvoiceRun};
use crate::services::database::Database;
use crate::services::fee_resolver::resolve_fee;
use crate::services::metrics::{record_error, record_generation_outcome};
use chrono::{Datelike, NaiveDate, Utc};
use service_core::error::AppError;
use tracing::{error, info, instrument};

/// Due date for an invoice period, clamped to the month's last day.
pub fn due_date(month: u32, year: i32, due_day: u32) -> Option<NaiveDate> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let next_month = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    let last_day = next_month.pred_opt()?.day();
    first.with_day(due_day.clamp(1, last_day))
}

/// Creates one invoice per active, billable student for a month.
#[derive(Clone)]
pub struct InvoiceGenerator {
    db: Database,
    due_day: u32,
}

impl InvoiceGenerator {
    pub fn new(db: Database, due_day: u32) -> Self {
        Self { db, due_day }
    }

    /// Invoice every active student for `month`/`year`.
    ///
    /// Existing invoices are never duplicated. With `refresh_unpaid`, an
    /// UNPAID invoice whose amount no longer matches the resolved fee is
    /// re-priced; PAID invoices are never touched. A database error for one
    /// student is counted as `failed` and the run continues.
    #[instrument(skip(self), fields(month = month, year = year))]
    pub async fn generate(
        &self,
        month: u32,
        year: i32,
        refresh_unpaid: bool,
    ) -> Result<(GenerationReport, InvoiceRun), AppError> {
        let due_date = due_date(month, year, self.due_day).ok_or_else(|| {
            AppError::BadRequest(anyhow::anyhow!("Invalid billing period {}/{}", month, year))
        })?;

        let started_utc = Utc::now();
        let candidates = self.db.fee_candidates(None).await?;
        let month = month as i32;

        info!(students = candidates.len(), "Generating invoices");

        let mut report = GenerationReport::default();

        for candidate in &candidates {
            let fee = match resolve_fee(candidate) {
                Some(fee) if fee.is_billable() => fee,
                _ => {
                    report.record(GenerationOutcome::Skipped);
                    continue;
                }
            };

            let outcome = match self
                .db
                .insert_invoice_if_absent(candidate.student_id, month, year, fee.amount, due_date)
                .await
            {
                Ok(Some(_)) => Ok(GenerationOutcome::Created),
                Ok(None) if refresh_unpaid => self
                    .db
                    .refresh_unpaid_invoice_amount(candidate.student_id, month, year, fee.amount)
                    .await
                    .map(|updated| {
                        if updated {
                            GenerationOutcome::Updated
                        } else {
                            GenerationOutcome::Existed
                        }
                    }),
                Ok(None) => Ok(GenerationOutcome::Existed),
                Err(e) => Err(e),
            };

            match outcome {
                Ok(outcome) => report.record(outcome),
                Err(e) => {
                    error!(
                        student_id = %candidate.student_id,
                        error = %e,
                        "Failed to upsert invoice"
                    );
                    record_error(e.kind(), "generate_invoices");
                    report.failed += 1;
                }
            }
        }

        let run = self
            .db
            .record_invoice_run(month, year, refresh_unpaid, &report, started_utc)
            .await?;

        record_generation_outcome("created", report.created);
        record_generation_outcome("updated", report.updated);
        record_generation_outcome("skipped", report.skipped);
        record_generation_outcome("existed", report.existed);
        record_generation_outcome("failed", report.failed);

        info!(
            run_id = %run.run_id,
            created = report.created,
            updated = report.updated,
            skipped = report.skipped,
            existed = report.existed,
            failed = report.failed,
            "Invoice generation completed"
        );

        Ok((report, run))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn due_day_inside_month_is_kept() {
        assert_eq!(
            due_date(3, 2026, 10),
            NaiveDate::from_ymd_opt(2026, 3, 10)
        );
    }

    #[test]
    fn due_day_is_clamped_to_month_end() {
        assert_eq!(
            due_date(2, 2026, 31),
            NaiveDate::from_ymd_opt(2026, 2, 28)
        );
        assert_eq!(
            due_date(2, 2028, 30),
            NaiveDate::from_ymd_opt(2028, 2, 29)
        );
        assert_eq!(
            due_date(12, 2026, 31),
            NaiveDate::from_ymd_opt(2026, 12, 31)
        );
    }

    #[test]
    fn invalid_month_has_no_due_date() {
        assert_eq!(due_date(13, 2026, 10), None);
        assert_eq!(due_date(0, 2026, 10), None);
    }
}
