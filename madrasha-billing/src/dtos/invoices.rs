use crate::models::{GatewayTransaction, GenerationReport, Invoice, InvoiceRun};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct GenerateInvoicesRequest {
    #[validate(range(min = 1, max = 12, message = "Month must be between 1 and 12"))]
    pub month: u32,
    #[validate(range(min = 2000, max = 2100, message = "Year must be between 2000 and 2100"))]
    pub year: i32,
    /// Re-price UNPAID invoices whose fee has changed since they were issued.
    #[serde(default)]
    pub refresh_unpaid: bool,
}

#[derive(Debug, Serialize)]
pub struct GenerateInvoicesResponse {
    pub run_id: Uuid,
    pub month: u32,
    pub year: i32,
    #[serde(flatten)]
    pub report: GenerationReport,
}

#[derive(Debug, Deserialize)]
pub struct ListInvoicesQuery {
    pub student_id: Option<Uuid>,
    pub month: Option<i32>,
    pub year: Option<i32>,
    pub status: Option<String>,
    pub page_size: Option<i32>,
    pub page_token: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct ListInvoicesResponse {
    pub invoices: Vec<Invoice>,
    pub next_page_token: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct InvoiceDetailResponse {
    #[serde(flatten)]
    pub invoice: Invoice,
    pub transactions: Vec<GatewayTransaction>,
}

#[derive(Debug, Deserialize)]
pub struct ListRunsQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ListRunsResponse {
    pub runs: Vec<InvoiceRun>,
}
