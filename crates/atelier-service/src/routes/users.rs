//! User directory endpoints. Role changes and deletions ripple into
//! workshop rosters through the enrollment engine.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use atelier_core::{Role, User, UserId, UserStatus, UserStore};

use crate::auth::Identity;
use crate::error::{ApiError, ApiResult};
use crate::ServiceState;

pub fn router() -> Router<ServiceState> {
    Router::new()
        .route("/users", post(create_user).get(list_users))
        .route("/users/me", get(get_me).patch(update_me))
        .route("/users/:id", patch(update_user).delete(delete_user))
        .route("/users/:id/activate", post(activate_user))
        .route("/users/:id/deactivate", post(deactivate_user))
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateUserRequest {
    pub name: String,
    pub email: String,
    pub role: Role,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateUserRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub role: Option<Role>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateSelfRequest {
    pub name: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedUserResponse {
    pub deleted: bool,
    pub workshops_updated: usize,
}

fn ensure_staff(identity: &Identity) -> Result<(), ApiError> {
    if identity.role.is_staff() {
        Ok(())
    } else {
        Err(ApiError::Forbidden("staff access required".to_string()))
    }
}

/// Admin accounts are handed out by admins only; teacher and tutor accounts
/// by staff; anyone authenticated may register students.
fn ensure_may_assign(identity: &Identity, role: Role) -> Result<(), ApiError> {
    let allowed = match role {
        Role::Admin => identity.role == Role::Admin,
        Role::Teacher | Role::Tutor => identity.role.is_staff(),
        Role::Student => true,
    };
    if allowed {
        Ok(())
    } else {
        Err(ApiError::Forbidden(format!(
            "role {} may not assign {} accounts",
            identity.role.as_str(),
            role.as_str()
        )))
    }
}

fn validate_name(name: &str) -> Result<(), ApiError> {
    if name.trim().is_empty() {
        return Err(ApiError::BadRequest("name must not be empty".to_string()));
    }
    Ok(())
}

fn validate_email(email: &str) -> Result<(), ApiError> {
    let email = email.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(ApiError::BadRequest("a valid email is required".to_string()));
    }
    Ok(())
}

fn apply_profile_patch(
    user: &mut User,
    name: Option<String>,
    email: Option<String>,
) -> Result<(), ApiError> {
    if let Some(name) = name {
        validate_name(&name)?;
        user.name = name.trim().to_string();
    }
    if let Some(email) = email {
        validate_email(&email)?;
        user.email = email.trim().to_string();
    }
    Ok(())
}

pub async fn create_user(
    State(state): State<ServiceState>,
    identity: Identity,
    Json(request): Json<CreateUserRequest>,
) -> ApiResult<(StatusCode, Json<User>)> {
    ensure_may_assign(&identity, request.role)?;
    validate_name(&request.name)?;
    validate_email(&request.email)?;

    let user = state
        .users
        .insert_user(User::new(
            request.name.trim(),
            request.email.trim(),
            request.role,
        ))
        .await?;
    tracing::info!(user_id = %user.id, role = user.role.as_str(), "Created user");

    Ok((StatusCode::CREATED, Json(user)))
}

pub async fn list_users(
    State(state): State<ServiceState>,
    identity: Identity,
) -> ApiResult<Json<Vec<User>>> {
    ensure_staff(&identity)?;
    Ok(Json(state.users.list_users().await?))
}

pub async fn get_me(
    State(state): State<ServiceState>,
    identity: Identity,
) -> ApiResult<Json<User>> {
    let user = state
        .users
        .get_user(&identity.id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("user {} not found", identity.id)))?;
    Ok(Json(user))
}

pub async fn update_me(
    State(state): State<ServiceState>,
    identity: Identity,
    Json(request): Json<UpdateSelfRequest>,
) -> ApiResult<Json<User>> {
    let mut user = state
        .users
        .get_user(&identity.id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("user {} not found", identity.id)))?;

    apply_profile_patch(&mut user, request.name, request.email)?;
    let user = state.users.update_user(user).await?;
    tracing::info!(user_id = %user.id, "Updated own profile");

    Ok(Json(user))
}

pub async fn update_user(
    State(state): State<ServiceState>,
    identity: Identity,
    Path(id): Path<String>,
    Json(request): Json<UpdateUserRequest>,
) -> ApiResult<Json<User>> {
    ensure_staff(&identity)?;

    let id = UserId::new(id);
    let mut user = state
        .users
        .get_user(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("user {id} not found")))?;

    apply_profile_patch(&mut user, request.name, request.email)?;
    if let Some(role) = request.role {
        ensure_may_assign(&identity, role)?;
        user.role = role;
    }

    let user = state.users.update_user(user).await?;
    tracing::info!(user_id = %user.id, "Updated user");

    Ok(Json(user))
}

pub async fn activate_user(
    State(state): State<ServiceState>,
    identity: Identity,
    Path(id): Path<String>,
) -> ApiResult<Json<User>> {
    set_status(state, identity, id, UserStatus::Active).await
}

pub async fn deactivate_user(
    State(state): State<ServiceState>,
    identity: Identity,
    Path(id): Path<String>,
) -> ApiResult<Json<User>> {
    set_status(state, identity, id, UserStatus::Inactive).await
}

async fn set_status(
    state: ServiceState,
    identity: Identity,
    id: String,
    status: UserStatus,
) -> ApiResult<Json<User>> {
    ensure_staff(&identity)?;

    let id = UserId::new(id);
    let mut user = state
        .users
        .get_user(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("user {id} not found")))?;

    user.status = status;
    let user = state.users.update_user(user).await?;
    tracing::info!(user_id = %user.id, status = user.status.as_str(), "Changed user status");

    Ok(Json(user))
}

pub async fn delete_user(
    State(state): State<ServiceState>,
    identity: Identity,
    Path(id): Path<String>,
) -> ApiResult<Json<DeletedUserResponse>> {
    ensure_staff(&identity)?;

    let id = UserId::new(id);
    let user = state
        .users
        .get_user(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("user {id} not found")))?;

    state.users.delete_user(&id).await?;
    let workshops_updated = state.engine.on_user_removed(&user.id, user.role).await?;
    tracing::info!(
        user_id = %user.id,
        role = user.role.as_str(),
        workshops_updated,
        "Deleted user and scrubbed rosters"
    );

    Ok(Json(DeletedUserResponse {
        deleted: true,
        workshops_updated,
    }))
}
