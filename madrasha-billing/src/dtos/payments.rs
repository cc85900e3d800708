use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct InitiatePaymentRequest {
    pub student_id: Uuid,
    #[validate(length(min = 1, max = 24, message = "Between 1 and 24 invoices per payment"))]
    pub invoice_ids: Vec<Uuid>,
}

/// Answer to the gateway's server-to-server IPN call.
#[derive(Debug, Serialize)]
pub struct IpnResponse {
    pub tran_id: Option<String>,
    pub status: &'static str,
}
