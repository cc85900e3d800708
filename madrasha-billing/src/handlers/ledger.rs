//! Admin fund ledger endpoints.
//!
//! MONTHLY credits only come from invoice settlement, so donations cannot
//! target that fund.

use crate::dtos::{
    CorrectExpenseRequest, FundBalancesResponse, ListLedgerQuery, ListLedgerResponse,
    RecordDonationRequest, RecordExpenseRequest,
};
use crate::models::{
    CorrectExpense, CreateLedgerEntry, Direction, FundType, LedgerEntry, ListLedgerFilter,
};
use crate::services::metrics::record_ledger_amount;
use crate::startup::AppState;
use crate::utils::{ensure_positive, ValidatedJson};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use service_core::error::AppError;
use uuid::Uuid;

fn record_amount(entry: &LedgerEntry) {
    record_ledger_amount(
        &entry.fund,
        &entry.direction,
        entry.amount.to_f64().unwrap_or_default(),
    );
}

pub async fn record_donation(
    State(state): State<AppState>,
    ValidatedJson(payload): ValidatedJson<RecordDonationRequest>,
) -> Result<(StatusCode, Json<LedgerEntry>), AppError> {
    if payload.fund == FundType::Monthly {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Donations cannot be credited to the MONTHLY fund"
        )));
    }
    ensure_positive(payload.amount, "amount")?;

    let description = match (payload.donor_name, payload.description) {
        (Some(donor), Some(note)) => Some(format!("{} - {}", donor, note)),
        (Some(donor), None) => Some(donor),
        (None, note) => note,
    };

    let entry = state
        .db
        .insert_ledger_entry(&CreateLedgerEntry {
            fund: payload.fund,
            direction: Direction::Credit,
            amount: payload.amount,
            category: Some("donation".to_string()),
            description,
            entry_date: payload
                .entry_date
                .unwrap_or_else(|| Utc::now().date_naive()),
        })
        .await?;

    record_amount(&entry);
    Ok((StatusCode::CREATED, Json(entry)))
}

pub async fn record_expense(
    State(state): State<AppState>,
    ValidatedJson(payload): ValidatedJson<RecordExpenseRequest>,
) -> Result<(StatusCode, Json<LedgerEntry>), AppError> {
    ensure_positive(payload.amount, "amount")?;

    let entry = state
        .db
        .insert_ledger_entry(&CreateLedgerEntry {
            fund: payload.fund,
            direction: Direction::Debit,
            amount: payload.amount,
            category: Some(payload.category),
            description: payload.description,
            entry_date: payload
                .entry_date
                .unwrap_or_else(|| Utc::now().date_naive()),
        })
        .await?;

    record_amount(&entry);
    Ok((StatusCode::CREATED, Json(entry)))
}

/// Correct an expense. Credits and invoice-linked entries answer 409.
pub async fn correct_expense(
    State(state): State<AppState>,
    Path(entry_id): Path<Uuid>,
    ValidatedJson(payload): ValidatedJson<CorrectExpenseRequest>,
) -> Result<Json<LedgerEntry>, AppError> {
    if let Some(amount) = payload.amount {
        ensure_positive(amount, "amount")?;
    }

    let entry = state
        .db
        .correct_expense(
            entry_id,
            &CorrectExpense {
                amount: payload.amount,
                category: payload.category,
                description: payload.description,
            },
        )
        .await?;

    Ok(Json(entry))
}

pub async fn list_entries(
    State(state): State<AppState>,
    Query(query): Query<ListLedgerQuery>,
) -> Result<Json<ListLedgerResponse>, AppError> {
    let fund = match query.fund.as_deref() {
        Some(f) => Some(FundType::from_string(&f.to_uppercase()).ok_or_else(|| {
            AppError::BadRequest(anyhow::anyhow!("Unknown fund '{}'", f))
        })?),
        None => None,
    };
    let direction = match query.direction.as_deref() {
        Some(d) => Some(Direction::from_string(&d.to_uppercase()).ok_or_else(|| {
            AppError::BadRequest(anyhow::anyhow!("Unknown direction '{}'", d))
        })?),
        None => None,
    };

    let page_size = query.page_size.unwrap_or(50).clamp(1, 100);
    let entries = state
        .db
        .list_ledger_entries(&ListLedgerFilter {
            fund,
            direction,
            invoice_id: query.invoice_id,
            start_date: query.start_date,
            end_date: query.end_date,
            page_size,
            page_token: query.page_token,
        })
        .await?;

    let next_page_token = if entries.len() as i32 == page_size {
        entries.last().map(|e| e.entry_id)
    } else {
        None
    };

    Ok(Json(ListLedgerResponse {
        entries,
        next_page_token,
    }))
}

pub async fn fund_balances(
    State(state): State<AppState>,
) -> Result<Json<FundBalancesResponse>, AppError> {
    let balances = state.db.fund_balances().await?;
    Ok(Json(FundBalancesResponse { balances }))
}
