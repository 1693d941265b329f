use axum::extract::FromRequestParts;
use axum::http::header;
use axum::http::request::Parts;
use axum::http::HeaderName;
use subtle::ConstantTimeEq;
use time::format_description::well_known::Rfc3339;
use uuid::Uuid;

use crate::app::auth::AuthService;
use crate::app::users::UserService;
use crate::domain::access::Actor;
use crate::domain::role::Role;
use crate::domain::user::User;
use crate::http::AppError;
use crate::AppState;

/// An authenticated, active account.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub role: Role,
}

impl AuthUser {
    pub fn actor(&self) -> Actor {
        Actor::member(self.user_id, self.role)
    }
}

/// Like [`AuthUser`] but anonymous when no Authorization header is sent.
/// A header that is present but invalid still fails the request.
#[derive(Debug, Clone, Copy)]
pub struct MaybeAuthUser(pub Option<AuthUser>);

impl MaybeAuthUser {
    pub fn actor(&self) -> Actor {
        self.0.map_or(Actor::Anonymous, |auth| auth.actor())
    }

    pub fn user_id(&self) -> Option<Uuid> {
        self.0.map(|auth| auth.user_id)
    }

    pub fn is_admin(&self) -> bool {
        self.0.map_or(false, |auth| auth.role.is_admin())
    }
}

#[derive(Debug, Clone)]
pub struct AdminToken;

const ADMIN_TOKEN_HEADER: HeaderName = HeaderName::from_static("x-admin-token");

/// Message shown to a banned account.
pub fn ban_message(user: &User) -> String {
    match user.banned_until {
        Some(until) => match until.format(&Rfc3339) {
            Ok(until) => format!("account is banned until {}", until),
            Err(_) => "account is banned".to_string(),
        },
        None => "account is banned permanently".to_string(),
    }
}

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| AppError::unauthorized("missing Authorization header"))?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or_else(|| AppError::unauthorized("invalid Authorization header"))?;

        let service = AuthService::new(
            state.db.clone(),
            state.paseto_access_key,
            state.paseto_refresh_key,
            state.access_ttl_minutes,
            state.refresh_ttl_days,
        );
        let session = service
            .authenticate_access_token(token)
            .await
            .map_err(|_| AppError::internal("failed to authenticate"))?;
        let session = session.ok_or_else(|| AppError::unauthorized("invalid token"))?;

        let user = UserService::new(state.db.clone())
            .get_user_reconciled(session.user_id)
            .await
            .map_err(|err| {
                tracing::error!(user_id = %session.user_id, error = ?err, "failed to load user");
                AppError::internal("failed to authenticate")
            })?
            .ok_or_else(|| AppError::unauthorized("invalid token"))?;

        if user.is_banned() {
            return Err(AppError::forbidden(ban_message(&user)));
        }

        Ok(AuthUser {
            user_id: user.id,
            role: user.role,
        })
    }
}

#[axum::async_trait]
impl FromRequestParts<AppState> for MaybeAuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        if !parts.headers.contains_key(header::AUTHORIZATION) {
            return Ok(MaybeAuthUser(None));
        }
        let auth = AuthUser::from_request_parts(parts, state).await?;
        Ok(MaybeAuthUser(Some(auth)))
    }
}

#[axum::async_trait]
impl FromRequestParts<AppState> for AdminToken {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let expected = state
            .admin_token
            .as_ref()
            .ok_or_else(|| AppError::forbidden("admin token not configured"))?;

        let provided = parts
            .headers
            .get(ADMIN_TOKEN_HEADER)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| AppError::forbidden("missing admin token"))?;

        if !bool::from(provided.as_bytes().ct_eq(expected.as_bytes())) {
            return Err(AppError::forbidden("invalid admin token"));
        }

        Ok(AdminToken)
    }
}
