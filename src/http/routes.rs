use axum::{routing::delete, routing::get, routing::patch, routing::post, Router};

use crate::AppState;
use crate::http::handlers;

pub fn health() -> Router<AppState> {
    Router::new().route("/health", get(handlers::health))
}

pub fn auth() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(handlers::register))
        .route("/auth/login", post(handlers::login))
        .route("/auth/refresh", post(handlers::refresh_token))
        .route("/auth/revoke", post(handlers::revoke_token))
        .route("/auth/me", get(handlers::get_current_user))
        .route("/admin/bootstrap", post(handlers::bootstrap_admin))
        .route("/account", delete(handlers::delete_account))
}

pub fn users() -> Router<AppState> {
    Router::new()
        .route("/users/:id", get(handlers::get_user))
        .route("/users/:id", patch(handlers::update_profile))
        .route("/users/:id/threads", get(handlers::list_user_threads))
        .route("/admin/users", get(handlers::admin_list_users))
        .route("/admin/users", post(handlers::admin_create_user))
        .route("/admin/users/:id/role", patch(handlers::change_role))
        .route("/admin/users/:id/ban", post(handlers::ban_user))
        .route("/admin/users/:id/unban", post(handlers::unban_user))
}

pub fn threads() -> Router<AppState> {
    Router::new()
        .route("/threads", post(handlers::create_thread))
        .route("/threads", get(handlers::list_threads))
        .route("/threads/:id", get(handlers::get_thread))
        .route("/threads/:id", patch(handlers::update_thread))
        .route("/threads/:id", delete(handlers::delete_thread))
        .route("/threads/:id/restore", post(handlers::restore_thread))
        .route("/threads/:id/like", post(handlers::like_thread))
        .route("/threads/:id/like", delete(handlers::unlike_thread))
}

pub fn comments() -> Router<AppState> {
    Router::new()
        .route("/threads/:id/comments", post(handlers::create_comment))
        .route("/threads/:id/comments", get(handlers::list_comments))
        .route("/comments/:id", patch(handlers::update_comment))
        .route("/comments/:id", delete(handlers::delete_comment))
        .route("/comments/:id/restore", post(handlers::restore_comment))
        .route("/comments/:id/like", post(handlers::like_comment))
        .route("/comments/:id/like", delete(handlers::unlike_comment))
}

pub fn attachments() -> Router<AppState> {
    Router::new()
        .route("/attachments/:id", get(handlers::get_attachment))
        .route("/attachments/:id", delete(handlers::delete_attachment))
}

pub fn moderation() -> Router<AppState> {
    Router::new()
        .route(
            "/moderation/threads/pending",
            get(handlers::list_pending_threads),
        )
        .route(
            "/moderation/threads/:id/approve",
            post(handlers::approve_thread),
        )
        .route(
            "/moderation/threads/:id/reject",
            post(handlers::reject_thread),
        )
        .route("/moderation/audit", get(handlers::list_moderation_audit))
}
