//! Workshop endpoints: CRUD plus the enrollment, removal, and attendance
//! verbs that drive the capacity engine.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use atelier_core::{
    AttendanceRecord, EnrollError, NewWorkshop, User, UserId, UserStore, Vacancies, Workshop,
    WorkshopId, WorkshopPatch, WorkshopStatus,
};

use crate::auth::Identity;
use crate::error::{ApiError, ApiResult};
use crate::ServiceState;

pub fn router() -> Router<ServiceState> {
    Router::new()
        .route("/workshops", post(create_workshop).get(list_workshops))
        .route(
            "/workshops/:id",
            get(get_workshop)
                .patch(update_workshop)
                .delete(delete_workshop),
        )
        .route("/workshops/:id/enroll", post(enroll))
        .route("/workshops/:id/unenroll", post(unenroll))
        .route("/workshops/:id/remove-student", post(remove_student))
        .route("/workshops/:id/attendance", post(record_attendance))
}

#[derive(Debug, Clone, Deserialize)]
pub struct VacanciesField {
    pub total: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateWorkshopRequest {
    pub name: String,
    pub description: String,
    pub start_date: DateTime<Utc>,
    pub vacancies: VacanciesField,
    #[serde(default)]
    pub status: Option<WorkshopStatus>,
    #[serde(default)]
    pub teachers: Vec<UserId>,
    #[serde(default)]
    pub tutors: Vec<UserId>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateWorkshopRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub vacancies: Option<VacanciesField>,
    pub teachers: Option<Vec<UserId>>,
    pub tutors: Option<Vec<UserId>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollRequest {
    pub student_id: Option<UserId>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveStudentRequest {
    pub student_id: Option<UserId>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordAttendanceRequest {
    #[serde(default)]
    pub present_student_ids: Vec<UserId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteResponse {
    pub deleted: bool,
}

/// Directory snippet for one roster reference. Display fields are absent
/// when the reference no longer resolves.
#[derive(Debug, Clone, Serialize)]
pub struct MemberView {
    pub id: UserId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Workshop as served to clients, with roster ids expanded into directory
/// snippets.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkshopView {
    pub id: WorkshopId,
    pub name: String,
    pub description: String,
    pub status: WorkshopStatus,
    pub start_date: DateTime<Utc>,
    pub vacancies: Vacancies,
    pub teachers: Vec<MemberView>,
    pub tutors: Vec<MemberView>,
    pub enrolled_students: Vec<MemberView>,
    pub attendance: Vec<AttendanceRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

async fn render(state: &ServiceState, workshop: Workshop) -> Result<WorkshopView, ApiError> {
    let mut directory: HashMap<UserId, User> = HashMap::new();
    let referenced = workshop
        .teachers
        .iter()
        .chain(workshop.tutors.iter())
        .chain(workshop.enrolled_students.iter());
    for id in referenced {
        if !directory.contains_key(id) {
            if let Some(user) = state.users.get_user(id).await? {
                directory.insert(id.clone(), user);
            }
        }
    }

    let expand = |ids: &[UserId]| -> Vec<MemberView> {
        ids.iter()
            .map(|id| match directory.get(id) {
                Some(user) => MemberView {
                    id: id.clone(),
                    name: Some(user.name.clone()),
                    email: Some(user.email.clone()),
                },
                None => MemberView {
                    id: id.clone(),
                    name: None,
                    email: None,
                },
            })
            .collect()
    };

    let teachers = expand(&workshop.teachers);
    let tutors = expand(&workshop.tutors);
    let enrolled_students = expand(&workshop.enrolled_students);

    Ok(WorkshopView {
        id: workshop.id,
        name: workshop.name,
        description: workshop.description,
        status: workshop.status,
        start_date: workshop.start_date,
        vacancies: workshop.vacancies,
        teachers,
        tutors,
        enrolled_students,
        attendance: workshop.attendance,
        created_at: workshop.created_at,
        updated_at: workshop.updated_at,
    })
}

pub async fn create_workshop(
    State(state): State<ServiceState>,
    identity: Identity,
    Json(request): Json<CreateWorkshopRequest>,
) -> ApiResult<(StatusCode, Json<WorkshopView>)> {
    let spec = NewWorkshop {
        name: request.name,
        description: request.description,
        start_date: request.start_date,
        vacancy_total: request.vacancies.total,
        status: request.status,
        teachers: request.teachers,
        tutors: request.tutors,
    };

    let workshop = state.engine.create(&identity.caller(), spec).await?;
    tracing::info!(workshop_id = %workshop.id, name = %workshop.name, "Created workshop");

    let view = render(&state, workshop).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

pub async fn list_workshops(
    State(state): State<ServiceState>,
) -> ApiResult<Json<Vec<WorkshopView>>> {
    let mut views = Vec::new();
    for workshop in state.engine.workshops().await? {
        views.push(render(&state, workshop).await?);
    }
    Ok(Json(views))
}

pub async fn get_workshop(
    State(state): State<ServiceState>,
    Path(id): Path<String>,
) -> ApiResult<Json<WorkshopView>> {
    let workshop = state.engine.workshop(&WorkshopId::new(id)).await?;
    Ok(Json(render(&state, workshop).await?))
}

pub async fn update_workshop(
    State(state): State<ServiceState>,
    identity: Identity,
    Path(id): Path<String>,
    Json(request): Json<UpdateWorkshopRequest>,
) -> ApiResult<Json<WorkshopView>> {
    let id = WorkshopId::new(id);
    let patch = WorkshopPatch {
        name: request.name,
        description: request.description,
        start_date: request.start_date,
        vacancy_total: request.vacancies.map(|v| v.total),
        teachers: request.teachers,
        tutors: request.tutors,
    };

    let workshop = state.engine.update(&identity.caller(), &id, patch).await?;
    if workshop.vacancies.total < workshop.vacancies.filled {
        tracing::warn!(
            workshop_id = %workshop.id,
            total = workshop.vacancies.total,
            filled = workshop.vacancies.filled,
            "Workshop left oversubscribed by capacity update"
        );
    }
    tracing::info!(workshop_id = %workshop.id, "Updated workshop");

    Ok(Json(render(&state, workshop).await?))
}

pub async fn delete_workshop(
    State(state): State<ServiceState>,
    identity: Identity,
    Path(id): Path<String>,
) -> ApiResult<Json<DeleteResponse>> {
    let id = WorkshopId::new(id);
    state.engine.delete(&identity.caller(), &id).await?;
    tracing::info!(workshop_id = %id, "Deleted workshop");
    Ok(Json(DeleteResponse { deleted: true }))
}

pub async fn enroll(
    State(state): State<ServiceState>,
    identity: Identity,
    Path(id): Path<String>,
    body: Option<Json<EnrollRequest>>,
) -> ApiResult<Json<WorkshopView>> {
    let id = WorkshopId::new(id);
    let target = body.and_then(|Json(request)| request.student_id);

    // Staff-picked targets must exist in the directory. Self-enrollment
    // needs no lookup, the extractor already resolved the caller.
    if identity.role.is_staff() {
        if let Some(student) = &target {
            state
                .users
                .get_user(student)
                .await?
                .ok_or_else(|| EnrollError::UserNotFound(student.clone()))?;
        }
    }

    let student = target.clone().unwrap_or_else(|| identity.id.clone());
    let workshop = state.engine.enroll(&identity.caller(), &id, target).await?;
    tracing::info!(workshop_id = %workshop.id, student_id = %student, "Enrolled student");

    Ok(Json(render(&state, workshop).await?))
}

pub async fn unenroll(
    State(state): State<ServiceState>,
    identity: Identity,
    Path(id): Path<String>,
) -> ApiResult<Json<WorkshopView>> {
    let id = WorkshopId::new(id);
    let workshop = state.engine.withdraw(&identity.caller(), &id).await?;
    tracing::info!(workshop_id = %workshop.id, student_id = %identity.id, "Student withdrew");
    Ok(Json(render(&state, workshop).await?))
}

pub async fn remove_student(
    State(state): State<ServiceState>,
    identity: Identity,
    Path(id): Path<String>,
    body: Option<Json<RemoveStudentRequest>>,
) -> ApiResult<Json<WorkshopView>> {
    let id = WorkshopId::new(id);
    let student = body
        .and_then(|Json(request)| request.student_id)
        .ok_or_else(|| ApiError::BadRequest("studentId is required".to_string()))?;

    let workshop = state
        .engine
        .remove_student(&identity.caller(), &id, student.clone())
        .await?;
    tracing::info!(workshop_id = %workshop.id, student_id = %student, "Removed student from roster");

    Ok(Json(render(&state, workshop).await?))
}

pub async fn record_attendance(
    State(state): State<ServiceState>,
    identity: Identity,
    Path(id): Path<String>,
    body: Option<Json<RecordAttendanceRequest>>,
) -> ApiResult<(StatusCode, Json<WorkshopView>)> {
    let id = WorkshopId::new(id);
    let present = body
        .map(|Json(request)| request.present_student_ids)
        .unwrap_or_default();

    let workshop = state
        .engine
        .record_attendance(&identity.caller(), &id, present)
        .await?;
    tracing::info!(workshop_id = %workshop.id, taken_by = %identity.id, "Recorded attendance");

    Ok((StatusCode::CREATED, Json(render(&state, workshop).await?)))
}
