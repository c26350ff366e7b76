use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque workshop identifier (UUID v4 text).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkshopId(String);

impl WorkshopId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkshopId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque user identifier (UUID v4 text).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Directory role attached to every user record. The role set is closed;
/// anything outside it is rejected at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Teacher,
    Tutor,
    Student,
}

impl Role {
    /// Admins and teachers administer workshops and the user directory.
    pub fn is_staff(self) -> bool {
        matches!(self, Role::Admin | Role::Teacher)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Teacher => "teacher",
            Role::Tutor => "tutor",
            Role::Student => "student",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "admin" => Some(Role::Admin),
            "teacher" => Some(Role::Teacher),
            "tutor" => Some(Role::Tutor),
            "student" => Some(Role::Student),
            _ => None,
        }
    }
}

/// Account state; inactive users cannot act but their records remain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Active,
    Inactive,
}

impl UserStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            UserStatus::Active => "active",
            UserStatus::Inactive => "inactive",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(UserStatus::Active),
            "inactive" => Some(UserStatus::Inactive),
            _ => None,
        }
    }
}

/// Workshop lifecycle state. Transitions are driven externally; this
/// subsystem only reads the state when deciding whether enrollment is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkshopStatus {
    Scheduled,
    Ongoing,
    Completed,
    Cancelled,
}

impl WorkshopStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkshopStatus::Scheduled => "scheduled",
            WorkshopStatus::Ongoing => "ongoing",
            WorkshopStatus::Completed => "completed",
            WorkshopStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "scheduled" => Some(WorkshopStatus::Scheduled),
            "ongoing" => Some(WorkshopStatus::Ongoing),
            "completed" => Some(WorkshopStatus::Completed),
            "cancelled" => Some(WorkshopStatus::Cancelled),
            _ => None,
        }
    }
}

/// Seat accounting. `filled` is a derived counter and is only ever changed
/// in the same mutation that changes the roster it summarizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vacancies {
    pub total: u32,
    pub filled: u32,
}

impl Vacancies {
    pub fn new(total: u32) -> Self {
        Self { total, filled: 0 }
    }

    pub fn is_full(&self) -> bool {
        self.filled >= self.total
    }
}

/// One attendance sheet. Sheets are append-only: recorded once, never
/// edited, never removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub date: DateTime<Utc>,
    pub taken_by: UserId,
    /// Stored exactly as supplied by the taker; membership is not checked
    /// and duplicates are kept.
    pub present_students: Vec<UserId>,
}

/// A scheduled workshop with its roster, staffing, and attendance history.
///
/// Roster references are weak: they are ids into the user directory and may
/// dangle after a directory record disappears.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workshop {
    pub id: WorkshopId,
    pub name: String,
    pub description: String,
    pub status: WorkshopStatus,
    pub start_date: DateTime<Utc>,
    pub vacancies: Vacancies,
    pub teachers: Vec<UserId>,
    pub tutors: Vec<UserId>,
    /// Ordered, duplicate-free; `vacancies.filled` always equals its length.
    pub enrolled_students: Vec<UserId>,
    pub attendance: Vec<AttendanceRecord>,
    /// Optimistic-concurrency token, bumped by the store on every save.
    #[serde(default)]
    pub revision: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workshop {
    /// Builds a fresh workshop from validated creation fields. The roster
    /// starts empty and `filled` at zero regardless of the request.
    pub fn new(spec: NewWorkshop) -> Self {
        let now = Utc::now();
        Self {
            id: WorkshopId::generate(),
            name: spec.name.trim().to_string(),
            description: spec.description,
            status: spec.status.unwrap_or(WorkshopStatus::Scheduled),
            start_date: spec.start_date,
            vacancies: Vacancies::new(spec.vacancy_total),
            teachers: spec.teachers,
            tutors: spec.tutors,
            enrolled_students: Vec::new(),
            attendance: Vec::new(),
            revision: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Enrollment window: scheduled status and a start date still ahead.
    pub fn is_open_for_enrollment(&self, now: DateTime<Utc>) -> bool {
        self.status == WorkshopStatus::Scheduled && self.start_date > now
    }

    pub fn is_enrolled(&self, student: &UserId) -> bool {
        self.enrolled_students.contains(student)
    }

    /// True when `user` is assigned to this workshop as a teacher or tutor.
    pub fn is_assigned_staff(&self, user: &UserId) -> bool {
        self.teachers.contains(user) || self.tutors.contains(user)
    }
}

/// Creation payload for a workshop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewWorkshop {
    pub name: String,
    pub description: String,
    pub start_date: DateTime<Utc>,
    pub vacancy_total: u32,
    pub status: Option<WorkshopStatus>,
    pub teachers: Vec<UserId>,
    pub tutors: Vec<UserId>,
}

/// Partial workshop update; `None` fields stay untouched. Absence never
/// clears a value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkshopPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub vacancy_total: Option<u32>,
    pub teachers: Option<Vec<UserId>>,
    pub tutors: Option<Vec<UserId>>,
}

impl WorkshopPatch {
    /// True when the patch reassigns teaching staff.
    pub fn touches_roster(&self) -> bool {
        self.teachers.is_some() || self.tutors.is_some()
    }
}

/// A directory user. Credentials are handled upstream; this record carries
/// only what enrollment and display need.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub status: UserStatus,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(name: impl Into<String>, email: impl Into<String>, role: Role) -> Self {
        Self {
            id: UserId::generate(),
            name: name.into(),
            email: email.into(),
            role,
            status: UserStatus::Active,
            created_at: Utc::now(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == UserStatus::Active
    }
}
