use crate::models::{FundBalance, FundType, LedgerEntry};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct RecordDonationRequest {
    pub fund: FundType,
    pub amount: Decimal,
    #[validate(length(max = 200))]
    pub donor_name: Option<String>,
    #[validate(length(max = 1000))]
    pub description: Option<String>,
    pub entry_date: Option<NaiveDate>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RecordExpenseRequest {
    pub fund: FundType,
    pub amount: Decimal,
    #[validate(length(min = 1, max = 100, message = "Category is required"))]
    pub category: String,
    #[validate(length(max = 1000))]
    pub description: Option<String>,
    pub entry_date: Option<NaiveDate>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CorrectExpenseRequest {
    pub amount: Option<Decimal>,
    #[validate(length(min = 1, max = 100))]
    pub category: Option<String>,
    #[validate(length(max = 1000))]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListLedgerQuery {
    pub fund: Option<String>,
    pub direction: Option<String>,
    pub invoice_id: Option<Uuid>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub page_size: Option<i32>,
    pub page_token: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct ListLedgerResponse {
    pub entries: Vec<LedgerEntry>,
    pub next_page_token: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct FundBalancesResponse {
    pub balances: Vec<FundBalance>,
}
