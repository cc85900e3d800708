//! Payment initiation and gateway callback handling.

use crate::models::{CreatePaymentSession, PaymentMethod, PaymentSessionStatus};
use crate::services::database::Database;
use crate::services::ledger_writer::{LedgerWriter, Settlement, SettlementOutcome};
use crate::services::metrics::{record_callback, record_error};
use crate::services::sslcommerz::{
    parse_invoice_ids, Customer, GatewayError, InitiatePayment, SslCommerzClient,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use std::collections::BTreeSet;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Fields SSLCommerz posts to the success, fail, cancel and IPN URLs.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackPayload {
    #[serde(default)]
    pub tran_id: Option<String>,
    #[serde(default)]
    pub val_id: Option<String>,
    #[serde(default)]
    pub amount: Option<String>,
    /// Client-side status; logged, never trusted.
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub value_a: Option<String>,
    #[serde(default)]
    pub bank_tran_id: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// What a callback did, as reported to the browser or the IPN caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackOutcome {
    Paid,
    AlreadyPaid,
    Failed,
    Cancelled,
    Invalid,
    Error,
}

impl CallbackOutcome {
    /// Value of the `status` query parameter on the result page.
    pub fn redirect_status(&self) -> &'static str {
        match self {
            CallbackOutcome::Paid => "success",
            CallbackOutcome::AlreadyPaid => "already_paid",
            CallbackOutcome::Failed => "failed",
            CallbackOutcome::Cancelled => "cancelled",
            CallbackOutcome::Invalid => "invalid",
            CallbackOutcome::Error => "error",
        }
    }
}

/// A started checkout the student can be redirected to.
#[derive(Debug, Clone, Serialize)]
pub struct InitiatedPayment {
    pub tran_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub invoice_ids: Vec<Uuid>,
    pub gateway_url: String,
}

fn new_tran_id(prefix: &str) -> String {
    format!("{}-{}", prefix, Uuid::new_v4().simple())
}

/// Coordinates payment sessions, the gateway and the ledger writer.
#[derive(Clone)]
pub struct PaymentService {
    db: Database,
    gateway: SslCommerzClient,
    ledger: LedgerWriter,
}

impl PaymentService {
    pub fn new(db: Database, gateway: SslCommerzClient, ledger: LedgerWriter) -> Self {
        Self {
            db,
            gateway,
            ledger,
        }
    }

    /// Open a hosted checkout for some of a student's UNPAID invoices.
    #[instrument(skip(self, invoice_ids), fields(student_id = %student_id, invoices = invoice_ids.len()))]
    pub async fn initiate(
        &self,
        student_id: Uuid,
        invoice_ids: &[Uuid],
    ) -> Result<InitiatedPayment, AppError> {
        if !self.gateway.is_configured() {
            return Err(AppError::ServiceUnavailable);
        }

        let ids: Vec<Uuid> = invoice_ids
            .iter()
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if ids.is_empty() {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "At least one invoice is required"
            )));
        }

        let student = self
            .db
            .get_student(student_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Student not found")))?;

        let invoices = self.db.get_invoices(&ids).await?;
        if invoices.len() != ids.len() || invoices.iter().any(|i| i.student_id != student_id) {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Invoices do not belong to this student"
            )));
        }
        if invoices.iter().any(|i| i.is_paid()) {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "One or more invoices are already paid"
            )));
        }

        let amount: Decimal = invoices.iter().map(|i| i.amount).sum();
        let session = self
            .db
            .create_payment_session(&CreatePaymentSession {
                tran_id: new_tran_id("MDR"),
                student_id,
                invoice_ids: ids.clone(),
                amount,
                currency: self.gateway.currency().to_string(),
            })
            .await?;

        let hosted = self
            .gateway
            .initiate(&InitiatePayment {
                tran_id: &session.tran_id,
                amount,
                currency: &session.currency,
                invoice_ids: &ids,
                customer: Customer {
                    name: student.full_name,
                    email: student.email,
                    phone: student.phone,
                },
            })
            .await;

        let hosted = match hosted {
            Ok(hosted) => hosted,
            Err(e) => {
                error!(tran_id = %session.tran_id, error = %e, "Gateway session initiation failed");
                record_error("gateway", "initiate_payment");
                self.db
                    .transition_payment_session(
                        &session.tran_id,
                        PaymentSessionStatus::Failed,
                        None,
                        Some(&e.to_string()),
                    )
                    .await?;
                return Err(match e {
                    GatewayError::NotConfigured => AppError::ServiceUnavailable,
                    _ => AppError::BadGateway("Payment gateway unavailable".to_string()),
                });
            }
        };

        if let Some(key) = hosted.session_key.as_deref() {
            self.db.set_gateway_session_key(&session.tran_id, key).await?;
        }

        info!(tran_id = %session.tran_id, amount = %amount, "Payment initiated");

        Ok(InitiatedPayment {
            tran_id: session.tran_id,
            amount,
            currency: session.currency,
            invoice_ids: ids,
            gateway_url: hosted.gateway_url,
        })
    }

    /// Handle a success callback or IPN: validate server-side, then settle.
    #[instrument(skip(self, payload), fields(tran_id = ?payload.tran_id, kind = kind))]
    pub async fn handle_success(&self, kind: &str, payload: &CallbackPayload) -> CallbackOutcome {
        let outcome = match self.confirm(payload).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, "Payment confirmation failed");
                record_error(e.kind(), "payment_callback");
                CallbackOutcome::Error
            }
        };
        record_callback(kind, outcome.redirect_status());
        outcome
    }

    async fn confirm(&self, payload: &CallbackPayload) -> Result<CallbackOutcome, AppError> {
        let Some(tran_id) = payload.tran_id.as_deref().filter(|s| !s.is_empty()) else {
            warn!("Callback without tran_id");
            return Ok(CallbackOutcome::Invalid);
        };

        let Some(session) = self.db.get_payment_session(tran_id).await? else {
            warn!("Callback for unknown transaction");
            return Ok(CallbackOutcome::Invalid);
        };

        // Failed, cancelled or invalid attempts stay open to a genuine
        // validation; only PAID is final.
        match session.parsed_status() {
            Some(status) if status.is_final() => {
                info!("Duplicate callback for a settled transaction");
                return Ok(CallbackOutcome::AlreadyPaid);
            }
            Some(_) => {}
            None => {
                warn!(status = %session.status, "Callback for a session in an unknown state");
                return Ok(CallbackOutcome::Invalid);
            }
        }

        let Some(val_id) = payload.val_id.as_deref().filter(|s| !s.is_empty()) else {
            return self.reject(tran_id, "missing val_id").await;
        };

        let validated = match self.gateway.validate(val_id).await {
            Ok(validated) => validated,
            Err(e) => {
                // Session stays open so a later IPN or retry can still settle it.
                error!(error = %e, "Gateway validation call failed");
                record_error("gateway", "validate_payment");
                return Ok(CallbackOutcome::Error);
            }
        };
        let response = &validated.response;

        if !response.is_valid_for(tran_id) {
            return self
                .reject(
                    tran_id,
                    &format!("gateway status {} for tran_id {:?}", response.status, response.tran_id),
                )
                .await;
        }

        if let Some(currency) = response.currency_type.as_deref() {
            if currency != session.currency {
                return self
                    .reject(tran_id, &format!("currency {} does not match", currency))
                    .await;
            }
        }

        let charged = response.charged_amount();
        if charged != Some(session.amount) {
            return self
                .reject(
                    tran_id,
                    &format!("charged {:?} but billed {}", charged, session.amount),
                )
                .await;
        }

        let referenced = response
            .value_a
            .as_deref()
            .or(payload.value_a.as_deref())
            .map(parse_invoice_ids)
            .transpose();
        let referenced: BTreeSet<Uuid> = match referenced {
            Ok(Some(ids)) if !ids.is_empty() => ids.into_iter().collect(),
            Ok(_) => session.invoice_ids.iter().copied().collect(),
            Err(_) => return self.reject(tran_id, "malformed invoice list").await,
        };
        let expected: BTreeSet<Uuid> = session.invoice_ids.iter().copied().collect();
        if referenced != expected {
            return self.reject(tran_id, "invoice list does not match").await;
        }

        if self
            .db
            .transition_payment_session(tran_id, PaymentSessionStatus::Validated, Some(val_id), None)
            .await?
            .is_none()
        {
            // Lost a race with another delivery; the ledger writer sorts it out.
            info!("Session moved on before validation was recorded");
        }

        let outcome = self
            .ledger
            .settle(&Settlement {
                tran_id: tran_id.to_string(),
                invoice_ids: session.invoice_ids.clone(),
                amount: session.amount,
                method: PaymentMethod::Sslcommerz,
                val_id: Some(val_id.to_string()),
                bank_tran_id: response.bank_tran_id.clone().or(payload.bank_tran_id.clone()),
                validation_status: response.status.clone(),
                raw_response: Some(validated.raw.clone()),
            })
            .await?;

        Ok(match outcome {
            SettlementOutcome::Settled { .. } => CallbackOutcome::Paid,
            SettlementOutcome::AlreadySettled => CallbackOutcome::AlreadyPaid,
            SettlementOutcome::Rejected(reason) => {
                warn!(reason = %reason, "Validated payment could not be settled");
                CallbackOutcome::Invalid
            }
        })
    }

    /// Record a failed validation. Only a PENDING session moves to INVALID,
    /// and that state can still be overturned by a later genuine validation.
    async fn reject(&self, tran_id: &str, reason: &str) -> Result<CallbackOutcome, AppError> {
        warn!(reason = %reason, "Payment validation rejected");
        self.db
            .transition_payment_session(tran_id, PaymentSessionStatus::Invalid, None, Some(reason))
            .await?;
        Ok(CallbackOutcome::Invalid)
    }

    /// Handle a fail or cancel callback. Only a PENDING session is closed,
    /// and a later validated success or IPN can still settle it.
    #[instrument(skip(self, payload), fields(tran_id = ?payload.tran_id, kind = kind))]
    pub async fn handle_abort(
        &self,
        kind: &str,
        payload: &CallbackPayload,
        status: PaymentSessionStatus,
    ) -> CallbackOutcome {
        let outcome = if status == PaymentSessionStatus::Cancelled {
            CallbackOutcome::Cancelled
        } else {
            CallbackOutcome::Failed
        };

        if let Some(tran_id) = payload.tran_id.as_deref().filter(|s| !s.is_empty()) {
            let reason = payload
                .error
                .clone()
                .unwrap_or_else(|| format!("gateway reported {}", kind));
            match self
                .db
                .transition_payment_session(tran_id, status, None, Some(&reason))
                .await
            {
                Ok(Some(_)) => info!(status = %status, "Payment session closed"),
                Ok(None) => warn!("Abort callback ignored for non-pending session"),
                Err(e) => {
                    error!(error = %e, "Failed to record aborted payment");
                    record_error(e.kind(), "payment_callback");
                    record_callback(kind, CallbackOutcome::Error.redirect_status());
                    return CallbackOutcome::Error;
                }
            }
        }

        record_callback(kind, outcome.redirect_status());
        outcome
    }

    /// Record an over-the-counter payment for one UNPAID invoice.
    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    pub async fn settle_cash(&self, invoice_id: Uuid) -> Result<SettlementOutcome, AppError> {
        let invoice = self
            .db
            .get_invoice(invoice_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found")))?;

        if invoice.is_paid() {
            return Err(AppError::Conflict(anyhow::anyhow!("Invoice is already paid")));
        }

        let outcome = self
            .ledger
            .settle(&Settlement {
                tran_id: new_tran_id("CASH"),
                invoice_ids: vec![invoice_id],
                amount: invoice.amount,
                method: PaymentMethod::Cash,
                val_id: None,
                bank_tran_id: None,
                validation_status: PaymentMethod::Cash.as_str().to_string(),
                raw_response: None,
            })
            .await?;

        match outcome {
            SettlementOutcome::AlreadySettled => Err(AppError::Conflict(anyhow::anyhow!(
                "Invoice is already paid"
            ))),
            SettlementOutcome::Rejected(reason) => {
                Err(AppError::Conflict(anyhow::anyhow!("{}", reason)))
            }
            settled => Ok(settled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redirect_statuses_are_stable() {
        let statuses: Vec<&str> = [
            CallbackOutcome::Paid,
            CallbackOutcome::AlreadyPaid,
            CallbackOutcome::Failed,
            CallbackOutcome::Cancelled,
            CallbackOutcome::Invalid,
            CallbackOutcome::Error,
        ]
        .iter()
        .map(CallbackOutcome::redirect_status)
        .collect();

        assert_eq!(
            statuses,
            ["success", "already_paid", "failed", "cancelled", "invalid", "error"]
        );
    }

    #[test]
    fn tran_ids_are_prefixed_and_unique() {
        let a = new_tran_id("MDR");
        let b = new_tran_id("MDR");
        assert!(a.starts_with("MDR-"));
        assert_eq!(a.len(), 4 + 32);
        assert_ne!(a, b);
    }
}
