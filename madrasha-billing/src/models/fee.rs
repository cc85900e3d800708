//! Fee resolution inputs and results.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Every amount that could price a student's month, fetched in one query.
///
/// Academic ids are `None` when the student has no active enrollment; tier
/// amounts are `None` when the student has no active tier or the tier has no
/// override at that level.
#[derive(Debug, Clone, Default, FromRow, Serialize, Deserialize)]
pub struct FeeCandidates {
    pub student_id: Uuid,
    pub batch_id: Option<Uuid>,
    pub department_id: Option<Uuid>,
    pub course_id: Option<Uuid>,
    pub tier_id: Option<Uuid>,
    pub tier_batch_fee: Option<Decimal>,
    pub tier_department_fee: Option<Decimal>,
    pub tier_course_fee: Option<Decimal>,
    pub batch_fee: Option<Decimal>,
    pub department_fee: Option<Decimal>,
    pub course_fee: Option<Decimal>,
}

impl FeeCandidates {
    pub fn is_enrolled(&self) -> bool {
        self.batch_id.is_some()
    }
}

/// Which level of the hierarchy supplied the amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeSource {
    TierBatch,
    TierDepartment,
    TierCourse,
    BatchDefault,
    DepartmentDefault,
    CourseDefault,
}

impl FeeSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeeSource::TierBatch => "tier_batch",
            FeeSource::TierDepartment => "tier_department",
            FeeSource::TierCourse => "tier_course",
            FeeSource::BatchDefault => "batch_default",
            FeeSource::DepartmentDefault => "department_default",
            FeeSource::CourseDefault => "course_default",
        }
    }
}

/// Outcome of walking the hierarchy for one student.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedFee {
    pub amount: Decimal,
    pub source: FeeSource,
}

impl ResolvedFee {
    /// Only positive amounts produce an invoice.
    pub fn is_billable(&self) -> bool {
        self.amount > Decimal::ZERO
    }
}
