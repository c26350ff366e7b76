use thiserror::Error;

use crate::policy::DenialReason;
use crate::store::StoreError;
use crate::types::{UserId, WorkshopId};

/// Failure taxonomy for enrollment operations. Everything except `Store` is
/// a deterministic business outcome; only `Store` reflects a transient
/// persistence fault.
#[derive(Debug, Error)]
pub enum EnrollError {
    #[error("workshop {0} not found")]
    WorkshopNotFound(WorkshopId),

    #[error("user {0} not found")]
    UserNotFound(UserId),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    PolicyDenied(DenialReason),

    #[error("enrollment is closed for workshop {0}")]
    EnrollmentClosed(WorkshopId),

    #[error("workshop {0} has no vacancies left")]
    CapacityExceeded(WorkshopId),

    #[error("student {student} is already enrolled in workshop {workshop}")]
    AlreadyEnrolled { workshop: WorkshopId, student: UserId },

    #[error("student {student} is not enrolled in workshop {workshop}")]
    NotEnrolled { workshop: WorkshopId, student: UserId },

    #[error("store unavailable: {0}")]
    Store(#[from] StoreError),
}
