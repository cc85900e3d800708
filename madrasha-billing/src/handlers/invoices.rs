//! Admin invoice endpoints.

use crate::dtos::{
    GenerateInvoicesRequest, GenerateInvoicesResponse, InvoiceDetailResponse, ListInvoicesQuery,
    ListInvoicesResponse, ListRunsQuery, ListRunsResponse,
};
use crate::models::{InvoiceStatus, ListInvoicesFilter};
use crate::services::SettlementOutcome;
use crate::startup::AppState;
use crate::utils::ValidatedJson;
use axum::{
    extract::{Path, Query, State},
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

/// Run the monthly generator. Safe to repeat for the same period.
pub async fn generate_invoices(
    State(state): State<AppState>,
    ValidatedJson(payload): ValidatedJson<GenerateInvoicesRequest>,
) -> Result<Json<GenerateInvoicesResponse>, AppError> {
    tracing::info!(
        month = payload.month,
        year = payload.year,
        refresh_unpaid = payload.refresh_unpaid,
        "Invoice generation requested"
    );

    let (report, run) = state
        .generator
        .generate(payload.month, payload.year, payload.refresh_unpaid)
        .await?;

    Ok(Json(GenerateInvoicesResponse {
        run_id: run.run_id,
        month: payload.month,
        year: payload.year,
        report,
    }))
}

pub async fn list_invoices(
    State(state): State<AppState>,
    Query(query): Query<ListInvoicesQuery>,
) -> Result<Json<ListInvoicesResponse>, AppError> {
    let status = match query.status.as_deref() {
        Some(s) => Some(InvoiceStatus::from_string(&s.to_uppercase()).ok_or_else(|| {
            AppError::BadRequest(anyhow::anyhow!("Unknown invoice status '{}'", s))
        })?),
        None => None,
    };

    let page_size = query.page_size.unwrap_or(50).clamp(1, 100);
    let invoices = state
        .db
        .list_invoices(&ListInvoicesFilter {
            student_id: query.student_id,
            month: query.month,
            year: query.year,
            status,
            page_size,
            page_token: query.page_token,
        })
        .await?;

    let next_page_token = if invoices.len() as i32 == page_size {
        invoices.last().map(|i| i.invoice_id)
    } else {
        None
    };

    Ok(Json(ListInvoicesResponse {
        invoices,
        next_page_token,
    }))
}

pub async fn get_invoice(
    State(state): State<AppState>,
    Path(invoice_id): Path<Uuid>,
) -> Result<Json<InvoiceDetailResponse>, AppError> {
    let invoice = state
        .db
        .get_invoice(invoice_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found")))?;
    let transactions = state.db.list_gateway_transactions(invoice_id).await?;

    Ok(Json(InvoiceDetailResponse {
        invoice,
        transactions,
    }))
}

pub async fn list_runs(
    State(state): State<AppState>,
    Query(query): Query<ListRunsQuery>,
) -> Result<Json<ListRunsResponse>, AppError> {
    let runs = state.db.list_invoice_runs(query.limit.unwrap_or(20)).await?;
    Ok(Json(ListRunsResponse { runs }))
}

/// Record an over-the-counter payment for one invoice.
pub async fn pay_cash(
    State(state): State<AppState>,
    Path(invoice_id): Path<Uuid>,
) -> Result<Json<InvoiceDetailResponse>, AppError> {
    tracing::info!(invoice_id = %invoice_id, "Cash payment requested");

    match state.payments.settle_cash(invoice_id).await? {
        SettlementOutcome::Settled { total, .. } => {
            tracing::info!(invoice_id = %invoice_id, amount = %total, "Cash payment recorded");
        }
        other => {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Cash payment not recorded: {:?}",
                other
            )))
        }
    }

    get_invoice(State(state), Path(invoice_id)).await
}
