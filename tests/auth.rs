//! Authentication Tests
//!
//! Registration, login, token refresh and revocation, bootstrap of the first
//! administrator, and how bans interact with all of them.

mod common;

use agora::domain::role::Role;
use axum::http::StatusCode;
use common::{app, unique, DEFAULT_PASSWORD};
use serde_json::json;
use time::{Duration, OffsetDateTime};

// ===========================================================================
// Registration
// ===========================================================================

#[tokio::test]
async fn register_creates_a_regular_user() {
    let app = app().await;
    let username = unique("reg");

    let resp = app
        .post_json(
            "/v1/auth/register",
            json!({
                "username": username,
                "email": format!("{}@Example.EDU", username),
                "password": "Securepassword123",
                "display_name": "New Student"
            }),
            None,
        )
        .await;

    assert_eq!(resp.status, StatusCode::CREATED);
    let body = resp.json();
    assert!(body["id"].is_string());
    assert_eq!(body["username"], username.as_str());
    assert_eq!(body["email"], format!("{}@example.edu", username).as_str());
    assert_eq!(body["display_name"], "New Student");
    assert_eq!(body["role"], "user");
    assert_eq!(body["is_active"], true);
    assert!(body.get("password_hash").is_none());
}

#[tokio::test]
async fn register_rejects_taken_username() {
    let app = app().await;
    let existing = app.create_user("dup", Role::User).await;

    let resp = app
        .post_json(
            "/v1/auth/register",
            json!({
                "username": existing.username,
                "email": format!("{}@example.edu", unique("other")),
                "password": "Securepassword123"
            }),
            None,
        )
        .await;

    assert_eq!(resp.status, StatusCode::CONFLICT);
    assert_eq!(resp.error_message(), "username already taken");
}

#[tokio::test]
async fn register_rejects_short_password() {
    let app = app().await;

    let resp = app
        .post_json(
            "/v1/auth/register",
            json!({
                "username": unique("short"),
                "email": format!("{}@example.edu", unique("short")),
                "password": "abc"
            }),
            None,
        )
        .await;

    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
    assert_eq!(resp.error_message(), "password must be at least 8 characters");
}

#[tokio::test]
async fn register_rejects_invalid_username() {
    let app = app().await;

    let resp = app
        .post_json(
            "/v1/auth/register",
            json!({
                "username": "no spaces allowed",
                "email": format!("{}@example.edu", unique("bad")),
                "password": "Securepassword123"
            }),
            None,
        )
        .await;

    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
}

// ===========================================================================
// Login
// ===========================================================================

#[tokio::test]
async fn login_accepts_username_or_email() {
    let app = app().await;
    let user = app.create_user("login", Role::User).await;

    let by_username = app
        .post_json(
            "/v1/auth/login",
            json!({ "username": user.username, "password": DEFAULT_PASSWORD }),
            None,
        )
        .await;
    assert_eq!(by_username.status, StatusCode::OK);
    assert!(by_username.json()["access_token"].is_string());
    assert!(by_username.json()["refresh_token"].is_string());

    let by_email = app
        .post_json(
            "/v1/auth/login",
            json!({ "email": user.email, "password": DEFAULT_PASSWORD }),
            None,
        )
        .await;
    assert_eq!(by_email.status, StatusCode::OK);
}

#[tokio::test]
async fn login_rejects_wrong_password() {
    let app = app().await;
    let user = app.create_user("wrongpw", Role::User).await;

    let resp = app
        .post_json(
            "/v1/auth/login",
            json!({ "identifier": user.username, "password": "not-the-password" }),
            None,
        )
        .await;

    assert_eq!(resp.status, StatusCode::UNAUTHORIZED);
    assert_eq!(resp.error_message(), "invalid credentials");
}

#[tokio::test]
async fn login_refuses_permanently_banned_account() {
    let app = app().await;
    let user = app.create_user("permban", Role::User).await;
    app.ban_in_db(user.id, None).await;

    let resp = app
        .post_json(
            "/v1/auth/login",
            json!({ "identifier": user.username, "password": DEFAULT_PASSWORD }),
            None,
        )
        .await;

    assert_eq!(resp.status, StatusCode::FORBIDDEN);
    assert_eq!(resp.error_message(), "account is banned permanently");
}

#[tokio::test]
async fn login_reports_timed_ban_expiry() {
    let app = app().await;
    let user = app.create_user("timeban", Role::User).await;
    app.ban_in_db(user.id, Some(OffsetDateTime::now_utc() + Duration::hours(2)))
        .await;

    let resp = app
        .post_json(
            "/v1/auth/login",
            json!({ "identifier": user.username, "password": DEFAULT_PASSWORD }),
            None,
        )
        .await;

    assert_eq!(resp.status, StatusCode::FORBIDDEN);
    assert!(resp.error_message().starts_with("account is banned until "));
}

#[tokio::test]
async fn login_succeeds_after_ban_lapses() {
    let app = app().await;
    let user = app.create_user("lapsed", Role::User).await;
    app.ban_in_db(user.id, Some(OffsetDateTime::now_utc() - Duration::seconds(1)))
        .await;

    let resp = app
        .post_json(
            "/v1/auth/login",
            json!({ "identifier": user.username, "password": DEFAULT_PASSWORD }),
            None,
        )
        .await;

    assert_eq!(resp.status, StatusCode::OK);
    let active: bool = sqlx::query_scalar("SELECT is_active FROM users WHERE id = $1")
        .bind(user.id)
        .fetch_one(app.pool())
        .await
        .unwrap();
    assert!(active);
}

// ===========================================================================
// Access tokens
// ===========================================================================

#[tokio::test]
async fn me_requires_a_token() {
    let app = app().await;
    let resp = app.get("/v1/auth/me", None).await;
    assert_eq!(resp.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn me_returns_own_account() {
    let app = app().await;
    let user = app.create_user("me", Role::AdminLevel1).await;

    let resp = app.get("/v1/auth/me", user.token()).await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.json()["id"], user.id.to_string().as_str());
    assert_eq!(resp.json()["role"], "admin_level_1");
}

#[tokio::test]
async fn garbage_token_is_rejected() {
    let app = app().await;
    let resp = app.get("/v1/auth/me", Some("v4.local.garbage")).await;
    assert_eq!(resp.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn banned_users_token_stops_working() {
    let app = app().await;
    let user = app.create_user("tokban", Role::User).await;
    app.ban_in_db(user.id, None).await;

    let resp = app.get("/v1/auth/me", user.token()).await;
    assert_eq!(resp.status, StatusCode::FORBIDDEN);
    assert_eq!(resp.error_message(), "account is banned permanently");

    // Optional-auth routes refuse it too instead of treating it as anonymous.
    let resp = app.get("/v1/threads", user.token()).await;
    assert_eq!(resp.status, StatusCode::FORBIDDEN);
}

// ===========================================================================
// Refresh and revoke
// ===========================================================================

#[tokio::test]
async fn refresh_rotates_the_token() {
    let app = app().await;
    let user = app.create_user("refresh", Role::User).await;

    let resp = app
        .post_json(
            "/v1/auth/refresh",
            json!({ "refresh_token": user.refresh_token }),
            None,
        )
        .await;
    assert_eq!(resp.status, StatusCode::OK);
    let new_refresh = resp.json()["refresh_token"].as_str().unwrap().to_string();
    assert_ne!(new_refresh, user.refresh_token);

    // The old token was consumed by the rotation.
    let reused = app
        .post_json(
            "/v1/auth/refresh",
            json!({ "refresh_token": user.refresh_token }),
            None,
        )
        .await;
    assert_eq!(reused.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn refresh_is_refused_for_banned_user() {
    let app = app().await;
    let user = app.create_user("refban", Role::User).await;
    app.ban_in_db(user.id, None).await;

    let resp = app
        .post_json(
            "/v1/auth/refresh",
            json!({ "refresh_token": user.refresh_token }),
            None,
        )
        .await;
    assert_eq!(resp.status, StatusCode::UNAUTHORIZED);
    assert_eq!(resp.error_message(), "invalid refresh token");
}

#[tokio::test]
async fn revoked_token_cannot_refresh() {
    let app = app().await;
    let user = app.create_user("revoke", Role::User).await;

    let resp = app
        .post_json(
            "/v1/auth/revoke",
            json!({ "refresh_token": user.refresh_token }),
            None,
        )
        .await;
    assert_eq!(resp.status, StatusCode::NO_CONTENT);

    let resp = app
        .post_json(
            "/v1/auth/refresh",
            json!({ "refresh_token": user.refresh_token }),
            None,
        )
        .await;
    assert_eq!(resp.status, StatusCode::UNAUTHORIZED);
}

// ===========================================================================
// Bootstrap and account deletion
// ===========================================================================

#[tokio::test]
async fn bootstrap_requires_the_admin_token() {
    let app = app().await;
    let body = json!({
        "username": unique("boot"),
        "email": format!("{}@example.edu", unique("boot")),
        "password": "Securepassword123"
    });

    let missing = app.post_admin("/v1/admin/bootstrap", body.clone(), None).await;
    assert_eq!(missing.status, StatusCode::FORBIDDEN);

    let wrong = app
        .post_admin("/v1/admin/bootstrap", body.clone(), Some("nope"))
        .await;
    assert_eq!(wrong.status, StatusCode::FORBIDDEN);

    let ok = app
        .post_admin("/v1/admin/bootstrap", body, Some(app.admin_token()))
        .await;
    assert_eq!(ok.status, StatusCode::CREATED);
    assert_eq!(ok.json()["role"], "admin_level_2");
}

#[tokio::test]
async fn deleted_account_cannot_log_in() {
    let app = app().await;
    let user = app.create_user("leaver", Role::User).await;

    let resp = app.delete("/v1/account", user.token()).await;
    assert_eq!(resp.status, StatusCode::NO_CONTENT);

    let resp = app
        .post_json(
            "/v1/auth/login",
            json!({ "identifier": user.username, "password": DEFAULT_PASSWORD }),
            None,
        )
        .await;
    assert_eq!(resp.status, StatusCode::FORBIDDEN);

    let resp = app
        .post_json(
            "/v1/auth/refresh",
            json!({ "refresh_token": user.refresh_token }),
            None,
        )
        .await;
    assert_eq!(resp.status, StatusCode::UNAUTHORIZED);
    assert_eq!(app.audit_count(user.id, "delete").await, 1);
}
