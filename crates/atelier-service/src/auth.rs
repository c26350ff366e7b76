//! Caller identity resolution.
//!
//! Credential verification happens upstream; the bearer value that reaches
//! this service is an already-verified subject id. Every request still
//! resolves that id against the user directory, so deactivating or deleting
//! an account revokes access immediately.

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use std::sync::Arc;

use atelier_core::{Caller, Role, StoreResult, User, UserId, UserStore};

use crate::error::ApiError;
use crate::ServiceState;

/// Maps an opaque bearer credential to a directory account.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve(&self, credential: &str) -> StoreResult<Option<User>>;
}

/// Resolver that reads the credential as the subject id forwarded by the
/// authenticating gateway.
pub struct DirectoryResolver {
    users: Arc<dyn UserStore>,
}

impl DirectoryResolver {
    pub fn new(users: Arc<dyn UserStore>) -> Self {
        Self { users }
    }
}

#[async_trait]
impl IdentityResolver for DirectoryResolver {
    async fn resolve(&self, credential: &str) -> StoreResult<Option<User>> {
        self.users.get_user(&UserId::new(credential)).await
    }
}

/// Authenticated caller. Extraction guarantees the account exists and is
/// active.
#[derive(Debug, Clone)]
pub struct Identity {
    pub id: UserId,
    pub role: Role,
}

impl Identity {
    pub fn caller(&self) -> Caller {
        Caller::new(self.id.clone(), self.role)
    }
}

#[async_trait]
impl FromRequestParts<ServiceState> for Identity {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &ServiceState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| ApiError::Unauthenticated("missing bearer credential".to_string()))?;

        let credential = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| ApiError::Unauthenticated("missing bearer credential".to_string()))?;

        let user = state
            .resolver
            .resolve(credential)
            .await?
            .ok_or_else(|| ApiError::Forbidden("unknown credential".to_string()))?;

        if !user.is_active() {
            return Err(ApiError::Forbidden("account is deactivated".to_string()));
        }

        Ok(Identity {
            id: user.id,
            role: user.role,
        })
    }
}
