//! Academic structure: courses, departments, batches, students and fee tiers.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Level of the academic hierarchy a fee applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeeScope {
    Course,
    Department,
    Batch,
}

impl FeeScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeeScope::Course => "course",
            FeeScope::Department => "department",
            FeeScope::Batch => "batch",
        }
    }

    /// Table holding the default fee for this level.
    pub(crate) fn table(&self) -> (&'static str, &'static str) {
        match self {
            FeeScope::Course => ("courses", "course_id"),
            FeeScope::Department => ("departments", "department_id"),
            FeeScope::Batch => ("batches", "batch_id"),
        }
    }
}

impl std::fmt::Display for FeeScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Course {
    pub course_id: Uuid,
    pub name: String,
    pub monthly_fee: Option<Decimal>,
    pub created_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Department {
    pub department_id: Uuid,
    pub course_id: Uuid,
    pub name: String,
    pub monthly_fee: Option<Decimal>,
    pub created_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Batch {
    pub batch_id: Uuid,
    pub department_id: Uuid,
    pub name: String,
    pub monthly_fee: Option<Decimal>,
    pub created_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Student {
    pub student_id: Uuid,
    pub full_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub is_active: bool,
    pub created_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Enrollment {
    pub enrollment_id: Uuid,
    pub student_id: Uuid,
    pub batch_id: Uuid,
    pub is_active: bool,
    pub enrolled_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct FeeTier {
    pub tier_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub is_active: bool,
    pub created_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct StudentFeeTier {
    pub assignment_id: Uuid,
    pub student_id: Uuid,
    pub tier_id: Uuid,
    pub is_active: bool,
    pub assigned_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TierFee {
    pub tier_id: Uuid,
    pub scope: String,
    pub target_id: Uuid,
    pub amount: Decimal,
    pub updated_utc: DateTime<Utc>,
}

/// Input for creating a student.
#[derive(Debug, Clone)]
pub struct CreateStudent {
    pub full_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}
