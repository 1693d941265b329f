use axum::extract::DefaultBodyLimit;
use axum::middleware::from_fn_with_state;
use axum::Router;

use crate::AppState;

mod auth;
mod error;
mod handlers;
pub mod middleware;
mod routes;

pub use auth::{ban_message, AdminToken, AuthUser, MaybeAuthUser};
pub use error::AppError;

// Room for multipart framing and text fields on top of the files themselves.
const FORM_OVERHEAD_BYTES: usize = 1024 * 1024;

pub fn router(state: AppState) -> Router {
    let body_limit = state
        .attachment_max_bytes
        .saturating_mul(state.attachment_max_files)
        .saturating_add(FORM_OVERHEAD_BYTES);

    let api = Router::new()
        .merge(routes::health())
        .merge(routes::auth())
        .merge(routes::users())
        .merge(routes::threads())
        .merge(routes::comments())
        .merge(routes::attachments())
        .merge(routes::moderation());

    Router::new()
        .nest("/v1", api)
        .layer(from_fn_with_state(
            state.clone(),
            middleware::rate_limit::rate_limit_middleware,
        ))
        .layer(from_fn_with_state(
            state.clone(),
            middleware::rate_limit::ip_rate_limit_middleware,
        ))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}
