//! REST service for workshop enrollment, rosters, and attendance.
//!
//! The service wires the enrollment engine and the user directory behind an
//! axum router. Callers authenticate with a bearer credential verified
//! upstream; see [`auth`] for how that maps onto directory accounts.

#![deny(unsafe_code)]

pub mod auth;
pub mod error;
pub mod routes;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use atelier_core::{store, EnrollmentEngine, Role, StorageConfig, StoreError, User, UserStore};

use auth::{DirectoryResolver, IdentityResolver};
use error::ErrorResponse;

/// Runtime configuration assembled by the binary.
#[derive(Debug, Clone, Default)]
pub struct ServiceConfig {
    pub storage: StorageConfig,
    /// Admin account created at startup when its email is not registered
    /// yet. Without it a fresh directory has nobody who could authenticate.
    pub seed_admin: Option<SeedAdmin>,
}

#[derive(Debug, Clone)]
pub struct SeedAdmin {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
}

/// Shared handles for every handler.
#[derive(Clone)]
pub struct ServiceState {
    pub engine: Arc<EnrollmentEngine>,
    pub users: Arc<dyn UserStore>,
    pub resolver: Arc<dyn IdentityResolver>,
    storage_label: &'static str,
}

impl ServiceState {
    pub async fn bootstrap(config: ServiceConfig) -> Result<Self, ServiceError> {
        let storage_label = config.storage.label();
        let stores = store::connect(&config.storage).await?;

        let state = Self {
            engine: Arc::new(EnrollmentEngine::new(stores.roster)),
            resolver: Arc::new(DirectoryResolver::new(stores.users.clone())),
            users: stores.users,
            storage_label,
        };

        if let Some(seed) = config.seed_admin {
            state.seed_admin(seed).await?;
        }

        Ok(state)
    }

    async fn seed_admin(&self, seed: SeedAdmin) -> Result<(), ServiceError> {
        match self
            .users
            .insert_user(User::new(seed.name, &seed.email, Role::Admin))
            .await
        {
            Ok(admin) => {
                tracing::info!(user_id = %admin.id, email = %admin.email, "Seeded initial admin");
                Ok(())
            }
            Err(StoreError::Conflict(_)) => {
                tracing::debug!(email = %seed.email, "Seed admin already present");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    pub fn storage_label(&self) -> &'static str {
        self.storage_label
    }
}

pub fn build_router(state: ServiceState) -> Router {
    let api = Router::new()
        .route("/health", get(health))
        .merge(routes::workshops::router())
        .merge(routes::users::router());

    Router::new()
        .nest("/api/v1", api)
        .fallback(unknown_route)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    storage: &'static str,
}

async fn health(State(state): State<ServiceState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: "atelier-service",
        storage: state.storage_label(),
    })
}

async fn unknown_route() -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: "route not found".to_string(),
            code: "NOT_FOUND".to_string(),
            details: None,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use atelier_core::UserId;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use chrono::{Duration, Utc};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    async fn service() -> (ServiceState, Router) {
        let state = ServiceState::bootstrap(ServiceConfig::default())
            .await
            .unwrap();
        let app = build_router(state.clone());
        (state, app)
    }

    async fn seed(state: &ServiceState, name: &str, email: &str, role: Role) -> UserId {
        state
            .users
            .insert_user(User::new(name, email, role))
            .await
            .unwrap()
            .id
    }

    async fn send(
        app: &Router,
        method: &str,
        uri: &str,
        token: Option<&UserId>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    fn workshop_payload(name: &str, total: u32, teachers: &[&UserId]) -> Value {
        json!({
            "name": name,
            "description": "hands-on session",
            "startDate": (Utc::now() + Duration::days(7)).to_rfc3339(),
            "vacancies": { "total": total },
            "teachers": teachers.iter().map(|id| id.as_str()).collect::<Vec<_>>(),
        })
    }

    #[tokio::test]
    async fn health_reports_the_storage_backend() {
        let (_state, app) = service().await;
        let (status, body) = send(&app, "GET", "/api/v1/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["service"], "atelier-service");
        assert_eq!(body["storage"], "memory");
    }

    #[tokio::test]
    async fn unknown_routes_answer_with_the_error_envelope() {
        let (_state, app) = service().await;
        let (status, body) = send(&app, "GET", "/api/v1/nothing-here", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn mutations_require_a_bearer_credential() {
        let (_state, app) = service().await;
        let payload = workshop_payload("Pottery", 5, &[]);

        let (status, body) = send(&app, "POST", "/api/v1/workshops", None, Some(payload)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "AUTH_REQUIRED");

        let ghost = UserId::new("no-such-subject");
        let payload = workshop_payload("Pottery", 5, &[]);
        let (status, body) =
            send(&app, "POST", "/api/v1/workshops", Some(&ghost), Some(payload)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["code"], "FORBIDDEN");
    }

    #[tokio::test]
    async fn deactivated_accounts_lose_access_immediately() {
        let (state, app) = service().await;
        let admin = seed(&state, "Root", "root@example.org", Role::Admin).await;
        let student = seed(&state, "Sam", "sam@example.org", Role::Student).await;

        let (status, _) = send(&app, "GET", "/api/v1/users/me", Some(&student), None).await;
        assert_eq!(status, StatusCode::OK);

        let uri = format!("/api/v1/users/{student}/deactivate");
        let (status, body) = send(&app, "POST", &uri, Some(&admin), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "inactive");

        let (status, body) = send(&app, "GET", "/api/v1/users/me", Some(&student), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["code"], "FORBIDDEN");

        let uri = format!("/api/v1/users/{student}/activate");
        let (status, _) = send(&app, "POST", &uri, Some(&admin), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(&app, "GET", "/api/v1/users/me", Some(&student), None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn workshop_creation_is_staff_only_and_expands_rosters() {
        let (state, app) = service().await;
        let teacher = seed(&state, "Tara", "tara@example.org", Role::Teacher).await;
        let student = seed(&state, "Sam", "sam@example.org", Role::Student).await;

        let payload = workshop_payload("Pottery", 5, &[&teacher]);
        let (status, body) =
            send(&app, "POST", "/api/v1/workshops", Some(&student), Some(payload)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["code"], "POLICY_DENIED");

        let payload = workshop_payload("Pottery", 5, &[&teacher]);
        let (status, body) =
            send(&app, "POST", "/api/v1/workshops", Some(&teacher), Some(payload)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["name"], "Pottery");
        assert_eq!(body["status"], "scheduled");
        assert_eq!(body["vacancies"]["total"], 5);
        assert_eq!(body["vacancies"]["filled"], 0);
        assert_eq!(body["enrolledStudents"], json!([]));
        assert_eq!(body["teachers"][0]["id"], teacher.as_str());
        assert_eq!(body["teachers"][0]["name"], "Tara");
        assert!(body.get("startDate").is_some());

        // Reads are public.
        let uri = format!("/api/v1/workshops/{}", body["id"].as_str().unwrap());
        let (status, fetched) = send(&app, "GET", &uri, None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fetched["id"], body["id"]);
    }

    #[tokio::test]
    async fn invalid_workshop_fields_are_rejected() {
        let (state, app) = service().await;
        let teacher = seed(&state, "Tara", "tara@example.org", Role::Teacher).await;

        let payload = json!({
            "name": "   ",
            "description": "hands-on session",
            "startDate": (Utc::now() + Duration::days(7)).to_rfc3339(),
            "vacancies": { "total": 5 },
        });
        let (status, body) =
            send(&app, "POST", "/api/v1/workshops", Some(&teacher), Some(payload)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "VALIDATION_ERROR");

        let payload = workshop_payload("Pottery", 0, &[&teacher]);
        let (status, body) =
            send(&app, "POST", "/api/v1/workshops", Some(&teacher), Some(payload)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "VALIDATION_ERROR");
    }

    async fn create_workshop(
        app: &Router,
        staff: &UserId,
        total: u32,
        teachers: &[&UserId],
    ) -> String {
        let payload = workshop_payload("Pottery", total, teachers);
        let (status, body) = send(app, "POST", "/api/v1/workshops", Some(staff), Some(payload)).await;
        assert_eq!(status, StatusCode::CREATED);
        body["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn students_enroll_and_withdraw_themselves() {
        let (state, app) = service().await;
        let teacher = seed(&state, "Tara", "tara@example.org", Role::Teacher).await;
        let student = seed(&state, "Sam", "sam@example.org", Role::Student).await;
        let id = create_workshop(&app, &teacher, 5, &[&teacher]).await;

        let uri = format!("/api/v1/workshops/{id}/enroll");
        let (status, body) = send(&app, "POST", &uri, Some(&student), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["vacancies"]["filled"], 1);
        assert_eq!(body["enrolledStudents"][0]["id"], student.as_str());
        assert_eq!(body["enrolledStudents"][0]["name"], "Sam");
        assert_eq!(body["enrolledStudents"][0]["email"], "sam@example.org");

        let (status, body) = send(&app, "POST", &uri, Some(&student), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "ALREADY_ENROLLED");

        let uri = format!("/api/v1/workshops/{id}/unenroll");
        let (status, body) = send(&app, "POST", &uri, Some(&student), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["vacancies"]["filled"], 0);
        assert_eq!(body["enrolledStudents"], json!([]));

        let (status, body) = send(&app, "POST", &uri, Some(&student), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "NOT_ENROLLED");
    }

    #[tokio::test]
    async fn staff_enrollment_names_an_existing_student() {
        let (state, app) = service().await;
        let admin = seed(&state, "Root", "root@example.org", Role::Admin).await;
        let student = seed(&state, "Sam", "sam@example.org", Role::Student).await;
        let id = create_workshop(&app, &admin, 5, &[]).await;
        let uri = format!("/api/v1/workshops/{id}/enroll");

        // No target at all.
        let (status, body) = send(&app, "POST", &uri, Some(&admin), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "VALIDATION_ERROR");

        // Target missing from the directory.
        let payload = json!({ "studentId": "no-such-user" });
        let (status, body) = send(&app, "POST", &uri, Some(&admin), Some(payload)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "NOT_FOUND");

        let payload = json!({ "studentId": student.as_str() });
        let (status, body) = send(&app, "POST", &uri, Some(&admin), Some(payload)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["enrolledStudents"][0]["id"], student.as_str());
    }

    #[tokio::test]
    async fn tutors_cannot_enroll_anyone() {
        let (state, app) = service().await;
        let admin = seed(&state, "Root", "root@example.org", Role::Admin).await;
        let tutor = seed(&state, "Tim", "tim@example.org", Role::Tutor).await;
        let student = seed(&state, "Sam", "sam@example.org", Role::Student).await;
        let id = create_workshop(&app, &admin, 5, &[]).await;

        let uri = format!("/api/v1/workshops/{id}/enroll");
        let payload = json!({ "studentId": student.as_str() });
        let (status, body) = send(&app, "POST", &uri, Some(&tutor), Some(payload)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["code"], "POLICY_DENIED");
        assert_eq!(body["details"]["reason"], "tutor_cannot_enroll");
    }

    #[tokio::test]
    async fn the_last_seat_closes_the_workshop() {
        let (state, app) = service().await;
        let admin = seed(&state, "Root", "root@example.org", Role::Admin).await;
        let first = seed(&state, "Ana", "ana@example.org", Role::Student).await;
        let second = seed(&state, "Ben", "ben@example.org", Role::Student).await;
        let id = create_workshop(&app, &admin, 1, &[]).await;

        let uri = format!("/api/v1/workshops/{id}/enroll");
        let (status, _) = send(&app, "POST", &uri, Some(&first), None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(&app, "POST", &uri, Some(&second), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "CAPACITY_EXCEEDED");
    }

    #[tokio::test]
    async fn staff_remove_students_from_the_roster() {
        let (state, app) = service().await;
        let admin = seed(&state, "Root", "root@example.org", Role::Admin).await;
        let student = seed(&state, "Sam", "sam@example.org", Role::Student).await;
        let id = create_workshop(&app, &admin, 5, &[]).await;

        let enroll = format!("/api/v1/workshops/{id}/enroll");
        let payload = json!({ "studentId": student.as_str() });
        let (status, _) = send(&app, "POST", &enroll, Some(&admin), Some(payload)).await;
        assert_eq!(status, StatusCode::OK);

        let remove = format!("/api/v1/workshops/{id}/remove-student");
        let (status, body) = send(&app, "POST", &remove, Some(&admin), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "BAD_REQUEST");

        let payload = json!({ "studentId": student.as_str() });
        let (status, body) = send(&app, "POST", &remove, Some(&admin), Some(payload)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["vacancies"]["filled"], 0);

        let payload = json!({ "studentId": student.as_str() });
        let (status, body) = send(&app, "POST", &remove, Some(&admin), Some(payload)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "NOT_ENROLLED");
    }

    #[tokio::test]
    async fn attendance_is_taken_by_assigned_staff_only() {
        let (state, app) = service().await;
        let admin = seed(&state, "Root", "root@example.org", Role::Admin).await;
        let assigned = seed(&state, "Tara", "tara@example.org", Role::Teacher).await;
        let outsider = seed(&state, "Omar", "omar@example.org", Role::Teacher).await;
        let student = seed(&state, "Sam", "sam@example.org", Role::Student).await;
        let id = create_workshop(&app, &admin, 5, &[&assigned]).await;

        let enroll = format!("/api/v1/workshops/{id}/enroll");
        let (status, _) = send(&app, "POST", &enroll, Some(&student), None).await;
        assert_eq!(status, StatusCode::OK);

        let uri = format!("/api/v1/workshops/{id}/attendance");
        let payload = json!({ "presentStudentIds": [student.as_str()] });
        let (status, body) = send(&app, "POST", &uri, Some(&outsider), Some(payload)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["code"], "POLICY_DENIED");

        let payload = json!({ "presentStudentIds": [student.as_str()] });
        let (status, body) = send(&app, "POST", &uri, Some(&assigned), Some(payload)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["attendance"][0]["takenBy"], assigned.as_str());
        assert_eq!(
            body["attendance"][0]["presentStudents"],
            json!([student.as_str()])
        );
    }

    #[tokio::test]
    async fn user_registration_respects_role_gates() {
        let (state, app) = service().await;
        let teacher = seed(&state, "Tara", "tara@example.org", Role::Teacher).await;
        let student = seed(&state, "Sam", "sam@example.org", Role::Student).await;

        // Students may register other students but nothing above that.
        let payload = json!({ "name": "Nina", "email": "nina@example.org", "role": "student" });
        let (status, body) = send(&app, "POST", "/api/v1/users", Some(&student), Some(payload)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["role"], "student");
        assert_eq!(body["status"], "active");

        let payload = json!({ "name": "Eve", "email": "eve@example.org", "role": "admin" });
        let (status, body) = send(&app, "POST", "/api/v1/users", Some(&student), Some(payload)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["code"], "FORBIDDEN");

        // Teachers may register tutors but not admins.
        let payload = json!({ "name": "Tim", "email": "tim@example.org", "role": "tutor" });
        let (status, _) = send(&app, "POST", "/api/v1/users", Some(&teacher), Some(payload)).await;
        assert_eq!(status, StatusCode::CREATED);

        let payload = json!({ "name": "Eve", "email": "eve@example.org", "role": "admin" });
        let (status, _) = send(&app, "POST", "/api/v1/users", Some(&teacher), Some(payload)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        // Duplicate email.
        let payload = json!({ "name": "Sam II", "email": "sam@example.org", "role": "student" });
        let (status, body) = send(&app, "POST", "/api/v1/users", Some(&teacher), Some(payload)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "CONFLICT");

        // Listing is staff only.
        let (status, _) = send(&app, "GET", "/api/v1/users", Some(&student), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, listed) = send(&app, "GET", "/api/v1/users", Some(&teacher), None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(listed.as_array().unwrap().len() >= 3);
    }

    #[tokio::test]
    async fn profiles_are_edited_through_me_and_by_staff() {
        let (state, app) = service().await;
        let admin = seed(&state, "Root", "root@example.org", Role::Admin).await;
        let student = seed(&state, "Sam", "sam@example.org", Role::Student).await;

        let (status, body) = send(&app, "GET", "/api/v1/users/me", Some(&student), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["id"], student.as_str());
        assert_eq!(body["email"], "sam@example.org");

        let payload = json!({ "name": "Samuel" });
        let (status, body) =
            send(&app, "PATCH", "/api/v1/users/me", Some(&student), Some(payload)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "Samuel");

        let payload = json!({ "email": "not-an-email" });
        let (status, body) =
            send(&app, "PATCH", "/api/v1/users/me", Some(&student), Some(payload)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "BAD_REQUEST");

        let uri = format!("/api/v1/users/{student}");
        let payload = json!({ "role": "tutor" });
        let (status, body) = send(&app, "PATCH", &uri, Some(&admin), Some(payload)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["role"], "tutor");
    }

    #[tokio::test]
    async fn deleting_a_student_scrubs_every_roster() {
        let (state, app) = service().await;
        let admin = seed(&state, "Root", "root@example.org", Role::Admin).await;
        let student = seed(&state, "Sam", "sam@example.org", Role::Student).await;
        let id = create_workshop(&app, &admin, 5, &[]).await;

        let enroll = format!("/api/v1/workshops/{id}/enroll");
        let payload = json!({ "studentId": student.as_str() });
        let (status, _) = send(&app, "POST", &enroll, Some(&admin), Some(payload)).await;
        assert_eq!(status, StatusCode::OK);

        let uri = format!("/api/v1/users/{student}");
        let (status, body) = send(&app, "DELETE", &uri, Some(&admin), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["deleted"], true);
        assert_eq!(body["workshopsUpdated"], 1);

        let uri = format!("/api/v1/workshops/{id}");
        let (status, body) = send(&app, "GET", &uri, None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["enrolledStudents"], json!([]));
        assert_eq!(body["vacancies"]["filled"], 0);
    }

    #[tokio::test]
    async fn bootstrap_seeds_the_initial_admin() {
        let config = ServiceConfig {
            storage: StorageConfig::memory(),
            seed_admin: Some(SeedAdmin {
                name: "Root".to_string(),
                email: "root@example.org".to_string(),
            }),
        };
        let state = ServiceState::bootstrap(config).await.unwrap();

        let admins = state.users.list_users().await.unwrap();
        assert_eq!(admins.len(), 1);
        assert_eq!(admins[0].role, Role::Admin);
        assert_eq!(admins[0].email, "root@example.org");
    }
}
