//! Capacity and enrollment engine.
//!
//! Every roster mutation runs fetch -> authorize -> check -> mutate -> save,
//! where the save is a compare-and-swap on the workshop revision. Losing the
//! swap restarts the whole sequence against a fresh snapshot, so writers
//! serialize per workshop and two callers racing for the last seat cannot
//! both win it.

use chrono::Utc;
use std::sync::Arc;

use crate::error::EnrollError;
use crate::policy::{authorize, Caller, PolicyDecision, WorkshopAction};
use crate::store::{RosterStore, StoreError};
use crate::types::{
    AttendanceRecord, NewWorkshop, Role, UserId, Workshop, WorkshopId, WorkshopPatch,
};

/// Attempts per mutation before giving up on a contended workshop. A writer
/// only loses the swap to a committed write, so the loop settles within a
/// few rounds even under heavy contention.
const MAX_SAVE_ATTEMPTS: usize = 16;

/// Orchestrates workshop state transitions over a [`RosterStore`].
pub struct EnrollmentEngine {
    roster: Arc<dyn RosterStore>,
}

impl EnrollmentEngine {
    pub fn new(roster: Arc<dyn RosterStore>) -> Self {
        Self { roster }
    }

    /// Creates a workshop with an empty roster and `filled = 0`, whatever
    /// the request claimed.
    pub async fn create(
        &self,
        caller: &Caller,
        spec: NewWorkshop,
    ) -> Result<Workshop, EnrollError> {
        ensure_allowed(caller, &WorkshopAction::Create, None)?;
        validate_name(&spec.name)?;
        validate_description(&spec.description)?;
        validate_total(spec.vacancy_total)?;

        let workshop = Workshop::new(spec);
        Ok(self.roster.insert_workshop(workshop).await?)
    }

    /// Fetches a single workshop.
    pub async fn workshop(&self, id: &WorkshopId) -> Result<Workshop, EnrollError> {
        self.roster
            .get_workshop(id)
            .await?
            .ok_or_else(|| EnrollError::WorkshopNotFound(id.clone()))
    }

    /// Lists every workshop, oldest first.
    pub async fn workshops(&self) -> Result<Vec<Workshop>, EnrollError> {
        Ok(self.roster.list_workshops().await?)
    }

    /// Applies a partial update; omitted fields stay untouched. Shrinking
    /// `vacancies.total` below the current fill is accepted and leaves the
    /// workshop oversubscribed until students are removed.
    pub async fn update(
        &self,
        caller: &Caller,
        id: &WorkshopId,
        patch: WorkshopPatch,
    ) -> Result<Workshop, EnrollError> {
        let action = if patch.touches_roster() {
            WorkshopAction::PatchRoster
        } else {
            WorkshopAction::Update
        };
        ensure_allowed(caller, &action, None)?;

        if let Some(name) = &patch.name {
            validate_name(name)?;
        }
        if let Some(description) = &patch.description {
            validate_description(description)?;
        }
        if let Some(total) = patch.vacancy_total {
            validate_total(total)?;
        }

        self.commit(id, |workshop| {
            if let Some(name) = &patch.name {
                workshop.name = name.trim().to_string();
            }
            if let Some(description) = &patch.description {
                workshop.description = description.clone();
            }
            if let Some(start_date) = patch.start_date {
                workshop.start_date = start_date;
            }
            if let Some(total) = patch.vacancy_total {
                workshop.vacancies.total = total;
            }
            if let Some(teachers) = &patch.teachers {
                workshop.teachers = teachers.clone();
            }
            if let Some(tutors) = &patch.tutors {
                workshop.tutors = tutors.clone();
            }
            Ok(())
        })
        .await
    }

    /// Deletes a workshop outright; its enrollments vanish with it.
    pub async fn delete(&self, caller: &Caller, id: &WorkshopId) -> Result<(), EnrollError> {
        ensure_allowed(caller, &WorkshopAction::Delete, None)?;
        if !self.roster.delete_workshop(id).await? {
            return Err(EnrollError::WorkshopNotFound(id.clone()));
        }
        Ok(())
    }

    /// Enrolls `target` (or the caller, when no target is given), holding
    /// the gate order: unknown workshop, closed enrollment, exhausted
    /// capacity, duplicate enrollment.
    pub async fn enroll(
        &self,
        caller: &Caller,
        id: &WorkshopId,
        target: Option<UserId>,
    ) -> Result<Workshop, EnrollError> {
        self.commit(id, |workshop| {
            let student = resolve_enroll_target(caller, target.clone())?;
            ensure_allowed(
                caller,
                &WorkshopAction::Enroll {
                    target: student.clone(),
                },
                Some(workshop),
            )?;

            if !workshop.is_open_for_enrollment(Utc::now()) {
                return Err(EnrollError::EnrollmentClosed(workshop.id.clone()));
            }
            if workshop.vacancies.is_full() {
                return Err(EnrollError::CapacityExceeded(workshop.id.clone()));
            }
            if workshop.is_enrolled(&student) {
                return Err(EnrollError::AlreadyEnrolled {
                    workshop: workshop.id.clone(),
                    student,
                });
            }

            workshop.enrolled_students.push(student);
            workshop.vacancies.filled += 1;
            Ok(())
        })
        .await
    }

    /// Removes the caller from the roster; a student self-service action.
    pub async fn withdraw(
        &self,
        caller: &Caller,
        id: &WorkshopId,
    ) -> Result<Workshop, EnrollError> {
        ensure_allowed(caller, &WorkshopAction::Withdraw, None)?;
        let student = caller.id.clone();
        self.commit(id, |workshop| remove_from_roster(workshop, &student))
            .await
    }

    /// Removes `student` from the roster on behalf of staff.
    pub async fn remove_student(
        &self,
        caller: &Caller,
        id: &WorkshopId,
        student: UserId,
    ) -> Result<Workshop, EnrollError> {
        ensure_allowed(caller, &WorkshopAction::RemoveStudent, None)?;
        self.commit(id, |workshop| remove_from_roster(workshop, &student))
            .await
    }

    /// Appends an attendance sheet. The present list is stored exactly as
    /// supplied; sheets are never edited or removed afterwards.
    pub async fn record_attendance(
        &self,
        caller: &Caller,
        id: &WorkshopId,
        present: Vec<UserId>,
    ) -> Result<Workshop, EnrollError> {
        self.commit(id, |workshop| {
            ensure_allowed(caller, &WorkshopAction::RecordAttendance, Some(workshop))?;
            workshop.attendance.push(AttendanceRecord {
                date: Utc::now(),
                taken_by: caller.id.clone(),
                present_students: present.clone(),
            });
            Ok(())
        })
        .await
    }

    /// Cascade hook for user deletion: scrubs the departed user from every
    /// workshop that references them. Students leave rosters and free their
    /// seat; teachers and tutors leave their staffing set. Returns how many
    /// workshops changed.
    pub async fn on_user_removed(&self, user: &UserId, role: Role) -> Result<usize, EnrollError> {
        let affected: Vec<WorkshopId> = self
            .roster
            .list_workshops()
            .await?
            .into_iter()
            .filter(|workshop| match role {
                Role::Student => workshop.is_enrolled(user),
                Role::Teacher => workshop.teachers.contains(user),
                Role::Tutor => workshop.tutors.contains(user),
                Role::Admin => false,
            })
            .map(|workshop| workshop.id)
            .collect();

        let mut touched = 0;
        for id in affected {
            let outcome = self
                .commit(&id, |workshop| {
                    match role {
                        Role::Student => {
                            // The student may already be gone from this
                            // snapshot after a racing withdrawal.
                            if workshop.is_enrolled(user) {
                                remove_from_roster(workshop, user)?;
                            }
                        }
                        Role::Teacher => workshop.teachers.retain(|t| t != user),
                        Role::Tutor => workshop.tutors.retain(|t| t != user),
                        Role::Admin => {}
                    }
                    Ok(())
                })
                .await;

            match outcome {
                Ok(_) => touched += 1,
                // Deleted between the scan and the commit; nothing to scrub.
                Err(EnrollError::WorkshopNotFound(_)) => {}
                Err(other) => return Err(other),
            }
        }
        Ok(touched)
    }

    /// Runs the fetch-check-mutate-save sequence until the swap sticks or
    /// the mutation rejects. `apply` sees a fresh snapshot on every attempt,
    /// so business gates are always re-checked after a lost race.
    async fn commit<F>(&self, id: &WorkshopId, mut apply: F) -> Result<Workshop, EnrollError>
    where
        F: FnMut(&mut Workshop) -> Result<(), EnrollError>,
    {
        for _ in 0..MAX_SAVE_ATTEMPTS {
            let mut workshop = self.workshop(id).await?;
            apply(&mut workshop)?;
            match self.roster.save_workshop(workshop).await {
                Ok(saved) => return Ok(saved),
                Err(StoreError::RevisionConflict) => continue,
                Err(other) => return Err(other.into()),
            }
        }
        Err(EnrollError::Store(StoreError::RevisionConflict))
    }
}

fn ensure_allowed(
    caller: &Caller,
    action: &WorkshopAction,
    workshop: Option<&Workshop>,
) -> Result<(), EnrollError> {
    match authorize(caller, action, workshop) {
        PolicyDecision::Allow => Ok(()),
        PolicyDecision::Deny(reason) => Err(EnrollError::PolicyDenied(reason)),
    }
}

/// Staff must name a target; everyone else defaults to themselves. Whether
/// the resolved target is permitted is the policy's call.
fn resolve_enroll_target(caller: &Caller, target: Option<UserId>) -> Result<UserId, EnrollError> {
    match (caller.role, target) {
        (Role::Admin | Role::Teacher, Some(id)) => Ok(id),
        (Role::Admin | Role::Teacher, None) => {
            Err(EnrollError::Validation("studentId is required".to_string()))
        }
        (_, Some(id)) => Ok(id),
        (_, None) => Ok(caller.id.clone()),
    }
}

/// Shared removal path for withdraw and remove-student. Membership is
/// required, so `filled` tracks the roster length exactly and never drifts.
fn remove_from_roster(workshop: &mut Workshop, student: &UserId) -> Result<(), EnrollError> {
    if !workshop.is_enrolled(student) {
        return Err(EnrollError::NotEnrolled {
            workshop: workshop.id.clone(),
            student: student.clone(),
        });
    }
    workshop.enrolled_students.retain(|s| s != student);
    workshop.vacancies.filled = workshop.vacancies.filled.saturating_sub(1);
    Ok(())
}

fn validate_name(name: &str) -> Result<(), EnrollError> {
    if name.trim().is_empty() {
        return Err(EnrollError::Validation("name must not be empty".to_string()));
    }
    Ok(())
}

fn validate_description(description: &str) -> Result<(), EnrollError> {
    if description.trim().is_empty() {
        return Err(EnrollError::Validation(
            "description must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn validate_total(total: u32) -> Result<(), EnrollError> {
    if total < 1 {
        return Err(EnrollError::Validation(
            "vacancies.total must be at least 1".to_string(),
        ));
    }
    Ok(())
}
