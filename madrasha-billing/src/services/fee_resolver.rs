//! Monthly fee resolution over the course → department → batch → tier hierarchy.

use crate::models::{FeeCandidates, FeeSource, ResolvedFee};

/// Walk the override hierarchy and return the first defined amount.
///
/// Tier overrides beat defaults, and within each group the most specific
/// level wins: batch, then department, then course. An explicit zero is a
/// real override (e.g. a scholarship tier), not a fall-through. Returns
/// `None` for students without an active enrollment or with no amount at
/// any level.
pub fn resolve_fee(candidates: &FeeCandidates) -> Option<ResolvedFee> {
    if !candidates.is_enrolled() {
        return None;
    }

    [
        (candidates.tier_batch_fee, FeeSource::TierBatch),
        (candidates.tier_department_fee, FeeSource::TierDepartment),
        (candidates.tier_course_fee, FeeSource::TierCourse),
        (candidates.batch_fee, FeeSource::BatchDefault),
        (candidates.department_fee, FeeSource::DepartmentDefault),
        (candidates.course_fee, FeeSource::CourseDefault),
    ]
    .into_iter()
    .find_map(|(amount, source)| amount.map(|amount| ResolvedFee { amount, source }))
}
