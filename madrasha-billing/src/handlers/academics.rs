//! Admin endpoints for the academic structure and fee configuration.

use crate::dtos::{
    AssignFeeTierRequest, CreateBatchRequest, CreateCourseRequest, CreateDepartmentRequest,
    CreateFeeTierRequest, CreateStudentRequest, EnrollStudentRequest, SetActiveRequest,
    SetDefaultFeeRequest, SetTierFeeRequest, StudentFeeResponse, TierFeeKey,
};
use crate::models::{
    Batch, Course, CreateStudent, Department, Enrollment, FeeTier, Student, StudentFeeTier,
    TierFee,
};
use crate::services::resolve_fee;
use crate::startup::AppState;
use crate::utils::ValidatedJson;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use rust_decimal::Decimal;
use service_core::error::AppError;
use uuid::Uuid;

/// Fees may be zero (a free level) but never negative.
fn ensure_fee(amount: Option<Decimal>) -> Result<(), AppError> {
    match amount {
        Some(a) if a < Decimal::ZERO => Err(AppError::BadRequest(anyhow::anyhow!(
            "Fee cannot be negative"
        ))),
        _ => Ok(()),
    }
}

pub async fn create_course(
    State(state): State<AppState>,
    ValidatedJson(payload): ValidatedJson<CreateCourseRequest>,
) -> Result<(StatusCode, Json<Course>), AppError> {
    ensure_fee(payload.monthly_fee)?;
    let course = state
        .db
        .create_course(&payload.name, payload.monthly_fee)
        .await?;
    Ok((StatusCode::CREATED, Json(course)))
}

pub async fn create_department(
    State(state): State<AppState>,
    ValidatedJson(payload): ValidatedJson<CreateDepartmentRequest>,
) -> Result<(StatusCode, Json<Department>), AppError> {
    ensure_fee(payload.monthly_fee)?;
    let department = state
        .db
        .create_department(payload.course_id, &payload.name, payload.monthly_fee)
        .await?;
    Ok((StatusCode::CREATED, Json(department)))
}

pub async fn create_batch(
    State(state): State<AppState>,
    ValidatedJson(payload): ValidatedJson<CreateBatchRequest>,
) -> Result<(StatusCode, Json<Batch>), AppError> {
    ensure_fee(payload.monthly_fee)?;
    let batch = state
        .db
        .create_batch(payload.department_id, &payload.name, payload.monthly_fee)
        .await?;
    Ok((StatusCode::CREATED, Json(batch)))
}

pub async fn create_student(
    State(state): State<AppState>,
    ValidatedJson(payload): ValidatedJson<CreateStudentRequest>,
) -> Result<(StatusCode, Json<Student>), AppError> {
    let student = state
        .db
        .create_student(&CreateStudent {
            full_name: payload.full_name,
            email: payload.email,
            phone: payload.phone,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(student)))
}

pub async fn get_student(
    State(state): State<AppState>,
    Path(student_id): Path<Uuid>,
) -> Result<Json<Student>, AppError> {
    state
        .db
        .get_student(student_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Student not found")))
}

/// Inactive students are left out of invoice generation.
pub async fn set_student_active(
    State(state): State<AppState>,
    Path(student_id): Path<Uuid>,
    Json(payload): Json<SetActiveRequest>,
) -> Result<Json<Student>, AppError> {
    let student = state
        .db
        .set_student_active(student_id, payload.is_active)
        .await?;
    Ok(Json(student))
}

pub async fn enroll_student(
    State(state): State<AppState>,
    Path(student_id): Path<Uuid>,
    Json(payload): Json<EnrollStudentRequest>,
) -> Result<(StatusCode, Json<Enrollment>), AppError> {
    let enrollment = state
        .db
        .enroll_student(student_id, payload.batch_id)
        .await?;
    Ok((StatusCode::CREATED, Json(enrollment)))
}

pub async fn create_fee_tier(
    State(state): State<AppState>,
    ValidatedJson(payload): ValidatedJson<CreateFeeTierRequest>,
) -> Result<(StatusCode, Json<FeeTier>), AppError> {
    let tier = state
        .db
        .create_fee_tier(&payload.name, payload.description.as_deref())
        .await?;
    Ok((StatusCode::CREATED, Json(tier)))
}

pub async fn set_fee_tier_active(
    State(state): State<AppState>,
    Path(tier_id): Path<Uuid>,
    Json(payload): Json<SetActiveRequest>,
) -> Result<Json<FeeTier>, AppError> {
    let tier = state
        .db
        .set_fee_tier_active(tier_id, payload.is_active)
        .await?;
    Ok(Json(tier))
}

pub async fn assign_fee_tier(
    State(state): State<AppState>,
    Path(student_id): Path<Uuid>,
    Json(payload): Json<AssignFeeTierRequest>,
) -> Result<(StatusCode, Json<StudentFeeTier>), AppError> {
    let assignment = state
        .db
        .assign_fee_tier(student_id, payload.tier_id)
        .await?;
    Ok((StatusCode::CREATED, Json(assignment)))
}

pub async fn clear_fee_tier(
    State(state): State<AppState>,
    Path(student_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    if state.db.clear_fee_tier(student_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound(anyhow::anyhow!(
            "Student has no active fee tier"
        )))
    }
}

pub async fn set_default_fee(
    State(state): State<AppState>,
    Json(payload): Json<SetDefaultFeeRequest>,
) -> Result<StatusCode, AppError> {
    ensure_fee(payload.monthly_fee)?;
    state
        .db
        .set_default_fee(payload.scope, payload.target_id, payload.monthly_fee)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn set_tier_fee(
    State(state): State<AppState>,
    Json(payload): Json<SetTierFeeRequest>,
) -> Result<Json<TierFee>, AppError> {
    ensure_fee(Some(payload.amount))?;
    let fee = state
        .db
        .upsert_tier_fee(
            payload.tier_id,
            payload.scope,
            payload.target_id,
            payload.amount,
        )
        .await?;
    Ok(Json(fee))
}

pub async fn delete_tier_fee(
    State(state): State<AppState>,
    Query(key): Query<TierFeeKey>,
) -> Result<StatusCode, AppError> {
    if state
        .db
        .delete_tier_fee(key.tier_id, key.scope, key.target_id)
        .await?
    {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound(anyhow::anyhow!("Tier fee not found")))
    }
}

/// Show which amount the generator would bill a student and where it came from.
pub async fn student_fee(
    State(state): State<AppState>,
    Path(student_id): Path<Uuid>,
) -> Result<Json<StudentFeeResponse>, AppError> {
    let candidates = state
        .db
        .fee_candidates(Some(student_id))
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Student not found")))?;

    let resolved = resolve_fee(&candidates);

    Ok(Json(StudentFeeResponse {
        student_id,
        enrolled: candidates.is_enrolled(),
        batch_id: candidates.batch_id,
        tier_id: candidates.tier_id,
        amount: resolved.map(|r| r.amount),
        source: resolved.map(|r| r.source),
        billable: resolved.is_some_and(|r| r.is_billable()),
    }))
}
