use crate::models::{FeeScope, FeeSource};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateCourseRequest {
    #[validate(length(min = 1, max = 200, message = "Name is required"))]
    pub name: String,
    pub monthly_fee: Option<Decimal>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateDepartmentRequest {
    pub course_id: Uuid,
    #[validate(length(min = 1, max = 200, message = "Name is required"))]
    pub name: String,
    pub monthly_fee: Option<Decimal>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateBatchRequest {
    pub department_id: Uuid,
    #[validate(length(min = 1, max = 200, message = "Name is required"))]
    pub name: String,
    pub monthly_fee: Option<Decimal>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateStudentRequest {
    #[validate(length(min = 1, max = 200, message = "Full name is required"))]
    pub full_name: String,
    #[validate(email(message = "Invalid email format"))]
    pub email: Option<String>,
    #[validate(length(min = 6, max = 32, message = "Invalid phone number"))]
    pub phone: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SetActiveRequest {
    pub is_active: bool,
}

#[derive(Debug, Deserialize)]
pub struct EnrollStudentRequest {
    pub batch_id: Uuid,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateFeeTierRequest {
    #[validate(length(min = 1, max = 100, message = "Name is required"))]
    pub name: String,
    #[validate(length(max = 1000))]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AssignFeeTierRequest {
    pub tier_id: Uuid,
}

/// `monthly_fee: null` clears the default so the next coarser level applies.
#[derive(Debug, Deserialize)]
pub struct SetDefaultFeeRequest {
    pub scope: FeeScope,
    pub target_id: Uuid,
    pub monthly_fee: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
pub struct SetTierFeeRequest {
    pub tier_id: Uuid,
    pub scope: FeeScope,
    pub target_id: Uuid,
    pub amount: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct TierFeeKey {
    pub tier_id: Uuid,
    pub scope: FeeScope,
    pub target_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct StudentFeeResponse {
    pub student_id: Uuid,
    pub enrolled: bool,
    pub batch_id: Option<Uuid>,
    pub tier_id: Option<Uuid>,
    pub amount: Option<Decimal>,
    pub source: Option<FeeSource>,
    pub billable: bool,
}
