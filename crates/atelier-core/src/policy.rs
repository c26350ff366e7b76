//! Role and relationship rules for workshop operations.
//!
//! The policy is a pure predicate over the caller, the action, and (for
//! relationship rules) the workshop row. It never touches storage, and a
//! denial is an ordinary decision carrying a machine-checkable reason, not
//! an error.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{Role, UserId, Workshop};

/// Resolved caller identity handed in by the surface layer. Inactive users
/// are filtered out before a `Caller` is ever constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub id: UserId,
    pub role: Role,
}

impl Caller {
    pub fn new(id: UserId, role: Role) -> Self {
        Self { id, role }
    }
}

/// The action kinds the policy rules on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkshopAction {
    Create,
    Update,
    /// Update that reassigns the teacher/tutor sets.
    PatchRoster,
    Delete,
    RemoveStudent,
    Enroll { target: UserId },
    Withdraw,
    RecordAttendance,
}

/// Outcome of a policy check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyDecision {
    Allow,
    Deny(DenialReason),
}

impl PolicyDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, PolicyDecision::Allow)
    }
}

/// Denial causes, stable enough for callers to branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    /// The action is reserved for admins and teachers.
    RequiresStaffRole,
    /// Self-withdrawal is a student action; staff use remove-student.
    RequiresStudentRole,
    /// Students may enroll themselves, nobody else.
    SelfEnrollmentOnly,
    /// Tutors have no enrollment authority.
    TutorCannotEnroll,
    /// Attendance takers must be admins or assigned to the workshop.
    NotAssignedToWorkshop,
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            DenialReason::RequiresStaffRole => "only admins and teachers may manage workshops",
            DenialReason::RequiresStudentRole => "only students may withdraw themselves",
            DenialReason::SelfEnrollmentOnly => "students may only enroll themselves",
            DenialReason::TutorCannotEnroll => "tutors may not enroll students",
            DenialReason::NotAssignedToWorkshop => {
                "attendance may only be recorded by an admin or staff assigned to the workshop"
            }
        };
        f.write_str(message)
    }
}

/// Evaluates whether `caller` may perform `action`.
///
/// `workshop` is only consulted for relationship rules (attendance); pass
/// `None` for actions decided on role alone.
pub fn authorize(
    caller: &Caller,
    action: &WorkshopAction,
    workshop: Option<&Workshop>,
) -> PolicyDecision {
    match action {
        WorkshopAction::Create
        | WorkshopAction::Update
        | WorkshopAction::PatchRoster
        | WorkshopAction::Delete
        | WorkshopAction::RemoveStudent => {
            if caller.role.is_staff() {
                PolicyDecision::Allow
            } else {
                PolicyDecision::Deny(DenialReason::RequiresStaffRole)
            }
        }
        WorkshopAction::Enroll { target } => match caller.role {
            Role::Admin | Role::Teacher => PolicyDecision::Allow,
            Role::Student if *target == caller.id => PolicyDecision::Allow,
            Role::Student => PolicyDecision::Deny(DenialReason::SelfEnrollmentOnly),
            Role::Tutor => PolicyDecision::Deny(DenialReason::TutorCannotEnroll),
        },
        WorkshopAction::Withdraw => {
            if caller.role == Role::Student {
                PolicyDecision::Allow
            } else {
                PolicyDecision::Deny(DenialReason::RequiresStudentRole)
            }
        }
        WorkshopAction::RecordAttendance => {
            if caller.role == Role::Admin {
                return PolicyDecision::Allow;
            }
            match workshop {
                Some(workshop) if workshop.is_assigned_staff(&caller.id) => PolicyDecision::Allow,
                _ => PolicyDecision::Deny(DenialReason::NotAssignedToWorkshop),
            }
        }
    }
}
