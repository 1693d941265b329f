use std::collections::HashMap;

use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::Redirect,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::app::attachments::AttachmentService;
use crate::app::auth::{AuthService, LoginOutcome};
use crate::app::comments::CommentService;
use crate::app::moderation::ModerationService;
use crate::app::threads::{ThreadQuery, ThreadService};
use crate::app::users::UserService;
use crate::domain::access::{evaluate, Action, DenialKind, Target};
use crate::domain::attachment::PendingUpload;
use crate::domain::comment::{assemble_comment_forest, Comment, CommentNode};
use crate::domain::moderation::{BanDuration, ModerationAction};
use crate::domain::role::Role;
use crate::domain::thread::{Thread, ThreadStatus};
use crate::domain::user::{PublicUser, User};
use crate::domain::validation::{self, ValidationError};
use crate::http::auth::ban_message;
use crate::http::{AdminToken, AppError, AuthUser, MaybeAuthUser};
use crate::AppState;

const DEFAULT_PAGE_SIZE: i64 = 20;
const MAX_PAGE_SIZE: i64 = 100;

#[derive(Serialize)]
pub(crate) struct HealthResponse {
    status: &'static str,
}

#[derive(Deserialize)]
pub struct PaginationQuery {
    pub limit: Option<i64>,
    pub cursor: Option<String>,
}

#[derive(Serialize)]
pub struct ListResponse<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
}

fn parse_cursor(cursor: Option<String>) -> Result<Option<(OffsetDateTime, Uuid)>, AppError> {
    let Some(cursor) = cursor else {
        return Ok(None);
    };

    let (timestamp, id) = cursor
        .rsplit_once('/')
        .ok_or_else(|| AppError::bad_request("invalid cursor"))?;

    let timestamp = OffsetDateTime::parse(timestamp, &Rfc3339)
        .map_err(|_| AppError::bad_request("invalid cursor"))?;
    let id = Uuid::parse_str(id).map_err(|_| AppError::bad_request("invalid cursor"))?;

    Ok(Some((timestamp, id)))
}

fn encode_cursor(cursor: Option<(OffsetDateTime, Uuid)>) -> Option<String> {
    let (timestamp, id) = cursor?;
    let timestamp = timestamp.format(&Rfc3339).ok()?;
    Some(format!("{}/{}", timestamp, id))
}

fn page_limit(limit: Option<i64>) -> Result<i64, AppError> {
    let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE);
    if !(1..=MAX_PAGE_SIZE).contains(&limit) {
        return Err(AppError::bad_request("limit must be between 1 and 100"));
    }
    Ok(limit)
}

/// Trims a page fetched with `limit + 1` rows and returns the cursor of the
/// last kept item when more rows exist.
fn finish_page<T>(
    items: &mut Vec<T>,
    limit: i64,
    key: impl Fn(&T) -> (OffsetDateTime, Uuid),
) -> Option<String> {
    if items.len() as i64 <= limit {
        return None;
    }
    items.truncate(limit as usize);
    encode_cursor(items.last().map(key))
}

fn auth_service(state: &AppState) -> AuthService {
    AuthService::new(
        state.db.clone(),
        state.paseto_access_key,
        state.paseto_refresh_key,
        state.access_ttl_minutes,
        state.refresh_ttl_days,
    )
}

fn attachment_service(state: &AppState) -> AttachmentService {
    AttachmentService::new(state.db.clone(), state.storage.clone())
}

/// Maps unique-constraint violations on `users` to 409.
fn account_conflict(err: &anyhow::Error) -> Option<AppError> {
    let db_err = err.downcast_ref::<sqlx::Error>()?.as_database_error()?;
    if db_err.code().as_deref() != Some("23505") {
        return None;
    }
    let constraint = db_err.constraint().unwrap_or_default();
    if constraint.contains("users_username_key") {
        return Some(AppError::conflict("username already taken"));
    }
    if constraint.contains("users_email_key") {
        return Some(AppError::conflict("email already taken"));
    }
    None
}

async fn load_user(state: &AppState, user_id: Uuid) -> Result<User, AppError> {
    UserService::new(state.db.clone())
        .get_user_reconciled(user_id)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, user_id = %user_id, "failed to load user");
            AppError::internal("failed to load user")
        })?
        .ok_or_else(|| AppError::not_found("user not found"))
}

async fn load_thread(state: &AppState, thread_id: Uuid, viewer_id: Option<Uuid>) -> Result<Thread, AppError> {
    ThreadService::new(state.db.clone())
        .get_thread(thread_id, viewer_id)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, thread_id = %thread_id, "failed to load thread");
            AppError::internal("failed to load thread")
        })?
        .ok_or_else(|| AppError::not_found("thread not found"))
}

/// A comment together with the thread it belongs to.
async fn load_comment(state: &AppState, comment_id: Uuid) -> Result<(Comment, Thread), AppError> {
    let comment = CommentService::new(state.db.clone())
        .get_comment(comment_id)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, comment_id = %comment_id, "failed to load comment");
            AppError::internal("failed to load comment")
        })?
        .ok_or_else(|| AppError::not_found("comment not found"))?;

    let thread = match load_thread(state, comment.thread_id, None).await {
        Ok(thread) => thread,
        Err(_) => return Err(AppError::not_found("comment not found")),
    };
    Ok((comment, thread))
}

async fn with_attachment_urls(state: &AppState, mut thread: Thread) -> Result<Thread, AppError> {
    let attachments = attachment_service(state);
    thread.attachments = attachments.list_for_thread(thread.id).await.map_err(|err| {
        tracing::error!(error = ?err, thread_id = %thread.id, "failed to load attachments");
        AppError::internal("failed to load attachments")
    })?;
    attachments
        .presign_all(&mut thread.attachments, state.download_url_ttl_seconds)
        .await;
    Ok(thread)
}

/// Text fields and files from a multipart create request.
struct UploadForm {
    fields: HashMap<String, String>,
    files: Vec<PendingUpload>,
}

impl UploadForm {
    fn text(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

async fn read_upload_form(state: &AppState, mut multipart: Multipart) -> Result<UploadForm, AppError> {
    let mut form = UploadForm {
        fields: HashMap::new(),
        files: Vec::new(),
    };

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| AppError::bad_request("invalid multipart body"))?
    {
        let name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().map(str::to_string);

        match file_name {
            Some(file_name) => {
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|_| AppError::bad_request("invalid multipart body"))?;
                if file_name.is_empty() && data.is_empty() {
                    continue;
                }
                if data.len() > state.attachment_max_bytes {
                    return Err(AppError::bad_request(format!(
                        "attachment {} exceeds {} bytes",
                        file_name, state.attachment_max_bytes
                    )));
                }
                if form.files.len() >= state.attachment_max_files {
                    return Err(AppError::bad_request(format!(
                        "at most {} attachments are allowed",
                        state.attachment_max_files
                    )));
                }
                form.files.push(PendingUpload {
                    file_name,
                    content_type,
                    data,
                });
            }
            None => {
                let value = field
                    .text()
                    .await
                    .map_err(|_| AppError::bad_request("invalid multipart body"))?;
                form.fields.insert(name, value);
            }
        }
    }

    Ok(form)
}

pub(crate) async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let db = state.db.ping().await.is_ok();
    let redis = state.cache.ping().await.is_ok();
    let status = if db && redis { "ok" } else { "degraded" };

    Json(HealthResponse { status })
}

// ---------------------------------------------------------------------------
// Accounts
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    pub display_name: Option<String>,
}

struct NewAccount {
    username: String,
    email: String,
    display_name: String,
    password: String,
}

fn validate_account(payload: RegisterRequest) -> Result<NewAccount, ValidationError> {
    let username = validation::username(&payload.username)?;
    let email = validation::email(&payload.email)?;
    validation::password(&payload.password)?;
    let display_name = match payload.display_name.as_deref() {
        Some(name) if !name.trim().is_empty() => {
            validation::required_text("display_name", name, validation::MAX_DISPLAY_NAME_LEN)?
        }
        _ => username.clone(),
    };
    Ok(NewAccount {
        username,
        email,
        display_name,
        password: payload.password,
    })
}

/// Creates an account. `created_by` is set when an administrator creates it.
async fn create_account(
    state: &AppState,
    account: NewAccount,
    role: Role,
    created_by: Option<Uuid>,
) -> Result<User, AppError> {
    auth_service(state)
        .signup(
            &account.username,
            &account.email,
            &account.display_name,
            &account.password,
            role,
            created_by,
        )
        .await
        .map_err(|err| {
            if let Some(conflict) = account_conflict(&err) {
                return conflict;
            }
            tracing::error!(error = ?err, "failed to create user");
            AppError::internal("failed to create user")
        })
}

pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<User>), AppError> {
    let account = validate_account(payload)?;
    let user = create_account(&state, account, Role::User, None).await?;
    tracing::info!(user_id = %user.id, "account registered");
    Ok((StatusCode::CREATED, Json(user)))
}

#[derive(Deserialize)]
pub struct LoginRequest {
    /// Email address or username.
    #[serde(alias = "email", alias = "username")]
    pub identifier: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct AuthTokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(with = "time::serde::rfc3339")]
    pub access_expires_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub refresh_expires_at: OffsetDateTime,
}

pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<AuthTokenResponse>, AppError> {
    if payload.identifier.trim().is_empty() || payload.password.trim().is_empty() {
        return Err(AppError::bad_request("identifier and password are required"));
    }
    if payload.password.len() > validation::MAX_PASSWORD_LEN {
        return Err(AppError::bad_request("password must be at most 128 characters"));
    }

    let outcome = auth_service(&state)
        .login(payload.identifier.trim(), &payload.password)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, "failed to login");
            AppError::internal("failed to login")
        })?;

    match outcome {
        LoginOutcome::Authenticated(tokens) => Ok(Json(AuthTokenResponse {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            access_expires_at: tokens.access_expires_at,
            refresh_expires_at: tokens.refresh_expires_at,
        })),
        LoginOutcome::Banned(user) => {
            tracing::info!(user_id = %user.id, "login refused for banned account");
            Err(AppError::forbidden(ban_message(&user)))
        }
        LoginOutcome::InvalidCredentials => Err(AppError::unauthorized("invalid credentials")),
    }
}

#[derive(Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

pub async fn refresh_token(
    State(state): State<AppState>,
    Json(payload): Json<RefreshRequest>,
) -> Result<Json<AuthTokenResponse>, AppError> {
    let tokens = auth_service(&state)
        .refresh(&payload.refresh_token)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, "failed to refresh token");
            AppError::internal("failed to refresh token")
        })?;

    match tokens {
        Some(tokens) => Ok(Json(AuthTokenResponse {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            access_expires_at: tokens.access_expires_at,
            refresh_expires_at: tokens.refresh_expires_at,
        })),
        None => Err(AppError::unauthorized("invalid refresh token")),
    }
}

pub async fn revoke_token(
    State(state): State<AppState>,
    Json(payload): Json<RefreshRequest>,
) -> Result<StatusCode, AppError> {
    let revoked = auth_service(&state)
        .revoke_refresh_token(&payload.refresh_token)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, "failed to revoke token");
            AppError::internal("failed to revoke token")
        })?;

    if revoked {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::unauthorized("invalid refresh token"))
    }
}

pub async fn get_current_user(
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<User>, AppError> {
    let user = load_user(&state, auth.user_id).await?;
    Ok(Json(user))
}

pub async fn bootstrap_admin(
    _admin: AdminToken,
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<User>), AppError> {
    let account = validate_account(payload)?;
    let user = create_account(&state, account, Role::AdminLevel2, None).await?;
    tracing::info!(user_id = %user.id, "bootstrap administrator created");
    Ok((StatusCode::CREATED, Json(user)))
}

pub async fn delete_account(
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<StatusCode, AppError> {
    let mut user = load_user(&state, auth.user_id).await?;
    evaluate(&auth.actor(), Action::Delete, &Target::user(&user)).into_result()?;

    let deleted = ModerationService::new(state.db.clone())
        .soft_delete(auth.user_id, &mut user)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, user_id = %auth.user_id, "failed to delete account");
            AppError::internal("failed to delete account")
        })?;
    if !deleted {
        return Err(AppError::not_found("user not found"));
    }

    if let Err(err) = auth_service(&state).revoke_all_for_user(auth.user_id).await {
        tracing::warn!(error = ?err, user_id = %auth.user_id, "failed to revoke sessions of deleted account");
    }

    tracing::info!(user_id = %auth.user_id, "account deleted");
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

pub async fn get_user(
    Path(id): Path<Uuid>,
    viewer: MaybeAuthUser,
    State(state): State<AppState>,
) -> Result<Json<PublicUser>, AppError> {
    let user = load_user(&state, id).await?;
    evaluate(&viewer.actor(), Action::Read, &Target::user(&user)).into_result()?;
    Ok(Json(PublicUser::for_viewer(user, viewer.is_admin())))
}

#[derive(Deserialize)]
pub struct UpdateProfileRequest {
    pub display_name: Option<String>,
    pub bio: Option<String>,
}

pub async fn update_profile(
    Path(id): Path<Uuid>,
    auth: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<UpdateProfileRequest>,
) -> Result<Json<User>, AppError> {
    let user = load_user(&state, id).await?;
    evaluate(&auth.actor(), Action::Edit, &Target::user(&user)).into_result()?;

    let display_name = payload
        .display_name
        .as_deref()
        .map(|name| validation::required_text("display_name", name, validation::MAX_DISPLAY_NAME_LEN))
        .transpose()?;
    let bio = match payload.bio {
        Some(bio) => {
            let bio = bio.trim().to_string();
            if bio.chars().count() > validation::MAX_BIO_LEN {
                return Err(ValidationError::TooLong {
                    field: "bio",
                    max: validation::MAX_BIO_LEN,
                }
                .into());
            }
            Some(bio)
        }
        None => None,
    };

    let user = UserService::new(state.db.clone())
        .update_profile(id, display_name, bio)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, user_id = %id, "failed to update profile");
            AppError::internal("failed to update profile")
        })?
        .ok_or_else(|| AppError::not_found("user not found"))?;

    Ok(Json(user))
}

/// A user's threads together with the author's profile; admins also get the
/// ban metadata.
#[derive(Serialize)]
pub struct UserThreadsResponse {
    pub user: PublicUser,
    pub items: Vec<Thread>,
    pub next_cursor: Option<String>,
}

pub async fn list_user_threads(
    Path(id): Path<Uuid>,
    viewer: MaybeAuthUser,
    State(state): State<AppState>,
    Query(query): Query<PaginationQuery>,
) -> Result<Json<UserThreadsResponse>, AppError> {
    let limit = page_limit(query.limit)?;
    let cursor = parse_cursor(query.cursor)?;

    let author = load_user(&state, id).await?;
    evaluate(&viewer.actor(), Action::Read, &Target::user(&author)).into_result()?;
    let include_hidden = viewer.is_admin() || viewer.user_id() == Some(author.id);

    let mut threads = ThreadService::new(state.db.clone())
        .list_by_author(id, viewer.user_id(), include_hidden, cursor, limit + 1)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, user_id = %id, "failed to list user threads");
            AppError::internal("failed to list user threads")
        })?;

    let next_cursor = finish_page(&mut threads, limit, |thread| (thread.created_at, thread.id));
    Ok(Json(UserThreadsResponse {
        user: PublicUser::for_viewer(author, viewer.is_admin()),
        items: threads,
        next_cursor,
    }))
}

// ---------------------------------------------------------------------------
// User administration
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct AdminUserListQuery {
    pub banned: Option<bool>,
    pub limit: Option<i64>,
    pub cursor: Option<String>,
}

pub async fn admin_list_users(
    auth: AuthUser,
    State(state): State<AppState>,
    Query(query): Query<AdminUserListQuery>,
) -> Result<Json<ListResponse<PublicUser>>, AppError> {
    evaluate(&auth.actor(), Action::Moderate, &Target::Site).into_result()?;
    let limit = page_limit(query.limit)?;
    let cursor = parse_cursor(query.cursor)?;

    let service = UserService::new(state.db.clone());
    let mut users = service
        .list_users(query.banned, cursor, limit + 1)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, "failed to list users");
            AppError::internal("failed to list users")
        })?;
    let next_cursor = finish_page(&mut users, limit, |user| (user.created_at, user.id));

    let now = OffsetDateTime::now_utc();
    let mut items = Vec::with_capacity(users.len());
    for user in users {
        let user = service.reconcile(user, now).await.map_err(|err| {
            tracing::error!(error = ?err, "failed to reconcile ban expiry");
            AppError::internal("failed to list users")
        })?;
        if query.banned == Some(true) && !user.is_banned() {
            continue;
        }
        items.push(PublicUser::for_viewer(user, true));
    }

    Ok(Json(ListResponse { items, next_cursor }))
}

#[derive(Deserialize)]
pub struct CreateAdminRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    pub display_name: Option<String>,
    pub role: Role,
}

pub async fn admin_create_user(
    auth: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<CreateAdminRequest>,
) -> Result<(StatusCode, Json<User>), AppError> {
    evaluate(&auth.actor(), Action::CreateAdmin, &Target::Site).into_result()?;
    if !payload.role.is_admin() {
        return Err(AppError::bad_request("role must be an administrator role"));
    }

    let role = payload.role;
    let account = validate_account(RegisterRequest {
        username: payload.username,
        email: payload.email,
        password: payload.password,
        display_name: payload.display_name,
    })?;
    let user = create_account(&state, account, role, Some(auth.user_id)).await?;

    tracing::info!(actor_id = %auth.user_id, user_id = %user.id, role = %role, "administrator created");
    Ok((StatusCode::CREATED, Json(user)))
}

#[derive(Deserialize)]
pub struct ChangeRoleRequest {
    pub role: Role,
}

pub async fn change_role(
    Path(id): Path<Uuid>,
    auth: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<ChangeRoleRequest>,
) -> Result<Json<PublicUser>, AppError> {
    let target = load_user(&state, id).await?;
    evaluate(&auth.actor(), Action::ChangeRole, &Target::user(&target)).into_result()?;

    let user = UserService::new(state.db.clone())
        .change_role(id, target.role, payload.role, auth.user_id)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, user_id = %id, "failed to change role");
            AppError::internal("failed to change role")
        })?
        .ok_or_else(|| AppError::not_found("user not found"))?;

    tracing::info!(actor_id = %auth.user_id, user_id = %id, from = %target.role, to = %payload.role, "role changed");
    Ok(Json(PublicUser::for_viewer(user, true)))
}

#[derive(Deserialize)]
pub struct BanRequest {
    pub duration: Option<Value>,
    pub reason: Option<String>,
}

pub async fn ban_user(
    Path(id): Path<Uuid>,
    auth: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<BanRequest>,
) -> Result<Json<PublicUser>, AppError> {
    let target = load_user(&state, id).await?;
    evaluate(&auth.actor(), Action::Ban, &Target::user(&target)).into_result()?;

    let duration = BanDuration::parse(payload.duration.as_ref())?;
    let banned_until = duration.banned_until(OffsetDateTime::now_utc());
    let reason = payload
        .reason
        .map(|reason| reason.trim().to_string())
        .filter(|reason| !reason.is_empty());

    let user = UserService::new(state.db.clone())
        .ban(id, banned_until, reason, auth.user_id)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, user_id = %id, "failed to ban user");
            AppError::internal("failed to ban user")
        })?
        .ok_or_else(|| AppError::not_found("user not found"))?;

    if let Err(err) = auth_service(&state).revoke_all_for_user(id).await {
        tracing::warn!(error = ?err, user_id = %id, "failed to revoke sessions of banned user");
    }

    tracing::info!(
        actor_id = %auth.user_id,
        user_id = %id,
        banned_until = ?user.banned_until,
        "user banned"
    );
    Ok(Json(PublicUser::for_viewer(user, true)))
}

pub async fn unban_user(
    Path(id): Path<Uuid>,
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<PublicUser>, AppError> {
    let target = load_user(&state, id).await?;
    evaluate(&auth.actor(), Action::Unban, &Target::user(&target)).into_result()?;

    let user = UserService::new(state.db.clone())
        .unban(id, auth.user_id)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, user_id = %id, "failed to unban user");
            AppError::internal("failed to unban user")
        })?
        .ok_or_else(|| AppError::not_found("user not found"))?;

    tracing::info!(actor_id = %auth.user_id, user_id = %id, "user unbanned");
    Ok(Json(PublicUser::for_viewer(user, true)))
}

// ---------------------------------------------------------------------------
// Threads
// ---------------------------------------------------------------------------

pub async fn create_thread(
    auth: AuthUser,
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<Thread>), AppError> {
    let form = read_upload_form(&state, multipart).await?;
    let title = validation::required_text(
        "title",
        form.text("title").unwrap_or_default(),
        validation::MAX_THREAD_TITLE_LEN,
    )?;
    let content = validation::required_text(
        "content",
        form.text("content").unwrap_or_default(),
        validation::MAX_THREAD_CONTENT_LEN,
    )?;
    let category = validation::required_text(
        "category",
        form.text("category").unwrap_or_default(),
        validation::MAX_CATEGORY_LEN,
    )?;

    let attachments = attachment_service(&state);
    let objects = attachments
        .upload_all(auth.user_id, form.files)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, user_id = %auth.user_id, "failed to upload attachments");
            AppError::internal("failed to upload attachments")
        })?;

    let mut thread = ThreadService::new(state.db.clone())
        .create_thread(auth.user_id, &title, &content, &category, &objects)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, user_id = %auth.user_id, "failed to create thread");
            AppError::internal("failed to create thread")
        })?;
    attachments
        .presign_all(&mut thread.attachments, state.download_url_ttl_seconds)
        .await;

    Ok((StatusCode::CREATED, Json(thread)))
}

#[derive(Deserialize)]
pub struct ThreadListQuery {
    pub limit: Option<i64>,
    pub cursor: Option<String>,
    pub category: Option<String>,
    pub q: Option<String>,
}

pub async fn list_threads(
    viewer: MaybeAuthUser,
    State(state): State<AppState>,
    Query(query): Query<ThreadListQuery>,
) -> Result<Json<ListResponse<Thread>>, AppError> {
    let limit = page_limit(query.limit)?;
    let thread_query = ThreadQuery {
        category: query
            .category
            .map(|category| category.trim().to_string())
            .filter(|category| !category.is_empty()),
        search: query
            .q
            .map(|q| q.trim().to_string())
            .filter(|q| !q.is_empty()),
        cursor: parse_cursor(query.cursor)?,
        limit: limit + 1,
    };

    let mut threads = ThreadService::new(state.db.clone())
        .list_threads(viewer.user_id(), &thread_query)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, "failed to list threads");
            AppError::internal("failed to list threads")
        })?;

    let next_cursor = finish_page(&mut threads, limit, |thread| (thread.created_at, thread.id));
    Ok(Json(ListResponse {
        items: threads,
        next_cursor,
    }))
}

pub async fn get_thread(
    Path(id): Path<Uuid>,
    viewer: MaybeAuthUser,
    State(state): State<AppState>,
) -> Result<Json<Thread>, AppError> {
    let mut thread = load_thread(&state, id, viewer.user_id()).await?;
    evaluate(&viewer.actor(), Action::Read, &Target::thread(&thread)).into_result()?;

    thread.views = ThreadService::new(state.db.clone())
        .record_view(id)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, thread_id = %id, "failed to record view");
            AppError::internal("failed to load thread")
        })?;

    let thread = with_attachment_urls(&state, thread).await?;
    Ok(Json(thread))
}

#[derive(Deserialize)]
pub struct UpdateThreadRequest {
    pub title: Option<String>,
    pub content: Option<String>,
    pub category: Option<String>,
}

pub async fn update_thread(
    Path(id): Path<Uuid>,
    auth: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<UpdateThreadRequest>,
) -> Result<Json<Thread>, AppError> {
    let thread = load_thread(&state, id, Some(auth.user_id)).await?;
    evaluate(&auth.actor(), Action::Edit, &Target::thread(&thread)).into_result()?;

    let title = payload
        .title
        .as_deref()
        .map(|title| validation::required_text("title", title, validation::MAX_THREAD_TITLE_LEN))
        .transpose()?;
    let content = payload
        .content
        .as_deref()
        .map(|content| {
            validation::required_text("content", content, validation::MAX_THREAD_CONTENT_LEN)
        })
        .transpose()?;
    let category = payload
        .category
        .as_deref()
        .map(|category| validation::required_text("category", category, validation::MAX_CATEGORY_LEN))
        .transpose()?;

    let service = ThreadService::new(state.db.clone());
    service
        .update_thread(id, title, content, category)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, thread_id = %id, "failed to update thread");
            AppError::internal("failed to update thread")
        })?;

    let thread = load_thread(&state, id, Some(auth.user_id)).await?;
    let thread = with_attachment_urls(&state, thread).await?;
    Ok(Json(thread))
}

pub async fn delete_thread(
    Path(id): Path<Uuid>,
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<StatusCode, AppError> {
    let mut thread = load_thread(&state, id, Some(auth.user_id)).await?;
    evaluate(&auth.actor(), Action::Delete, &Target::thread(&thread)).into_result()?;

    let deleted = ModerationService::new(state.db.clone())
        .soft_delete(auth.user_id, &mut thread)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, thread_id = %id, "failed to delete thread");
            AppError::internal("failed to delete thread")
        })?;

    if deleted {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::not_found("thread not found"))
    }
}

pub async fn restore_thread(
    Path(id): Path<Uuid>,
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<Thread>, AppError> {
    let mut thread = load_thread(&state, id, Some(auth.user_id)).await?;
    evaluate(&auth.actor(), Action::Restore, &Target::thread(&thread)).into_result()?;

    let restored = ModerationService::new(state.db.clone())
        .restore(auth.user_id, &mut thread)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, thread_id = %id, "failed to restore thread");
            AppError::internal("failed to restore thread")
        })?;
    if !restored {
        return Err(AppError::not_found("thread not found"));
    }

    let thread = with_attachment_urls(&state, thread).await?;
    Ok(Json(thread))
}

#[derive(Serialize)]
pub struct LikeResponse {
    pub liked: bool,
    pub like_count: i64,
}

async fn set_thread_like(state: &AppState, auth: AuthUser, id: Uuid, like: bool) -> Result<LikeResponse, AppError> {
    let thread = load_thread(state, id, Some(auth.user_id)).await?;
    evaluate(&auth.actor(), Action::Like, &Target::thread(&thread)).into_result()?;

    let service = ThreadService::new(state.db.clone());
    let result = if like {
        service.like(id, auth.user_id).await
    } else {
        service.unlike(id, auth.user_id).await
    };
    result.map_err(|err| {
        tracing::error!(error = ?err, thread_id = %id, "failed to update thread like");
        AppError::internal("failed to update like")
    })?;

    let thread = load_thread(state, id, Some(auth.user_id)).await?;
    Ok(LikeResponse {
        liked: thread.liked,
        like_count: thread.like_count,
    })
}

pub async fn like_thread(
    Path(id): Path<Uuid>,
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<LikeResponse>, AppError> {
    Ok(Json(set_thread_like(&state, auth, id, true).await?))
}

pub async fn unlike_thread(
    Path(id): Path<Uuid>,
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<LikeResponse>, AppError> {
    Ok(Json(set_thread_like(&state, auth, id, false).await?))
}

// ---------------------------------------------------------------------------
// Moderation queue and audit log
// ---------------------------------------------------------------------------

pub async fn list_pending_threads(
    auth: AuthUser,
    State(state): State<AppState>,
    Query(query): Query<PaginationQuery>,
) -> Result<Json<ListResponse<Thread>>, AppError> {
    evaluate(&auth.actor(), Action::Moderate, &Target::Site).into_result()?;
    let limit = page_limit(query.limit)?;
    let cursor = parse_cursor(query.cursor)?;

    let mut threads = ThreadService::new(state.db.clone())
        .list_pending(auth.user_id, cursor, limit + 1)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, "failed to list pending threads");
            AppError::internal("failed to list pending threads")
        })?;

    let next_cursor = finish_page(&mut threads, limit, |thread| (thread.created_at, thread.id));
    Ok(Json(ListResponse {
        items: threads,
        next_cursor,
    }))
}

#[derive(Deserialize, Default)]
pub struct RejectRequest {
    pub reason: Option<String>,
}

async fn moderate_thread(
    state: &AppState,
    auth: AuthUser,
    id: Uuid,
    status: ThreadStatus,
    reason: Option<String>,
) -> Result<Thread, AppError> {
    let action = match status {
        ThreadStatus::Approved => Action::Approve,
        _ => Action::Reject,
    };
    let thread = load_thread(state, id, Some(auth.user_id)).await?;
    evaluate(&auth.actor(), action, &Target::thread(&thread)).into_result()?;

    let updated = ThreadService::new(state.db.clone())
        .set_status(id, auth.user_id, status, reason)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, thread_id = %id, "failed to moderate thread");
            AppError::internal("failed to moderate thread")
        })?;
    if !updated {
        return Err(AppError::conflict("thread is not pending moderation"));
    }

    tracing::info!(actor_id = %auth.user_id, thread_id = %id, status = status.as_db(), "thread moderated");
    let thread = load_thread(state, id, Some(auth.user_id)).await?;
    with_attachment_urls(state, thread).await
}

pub async fn approve_thread(
    Path(id): Path<Uuid>,
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<Thread>, AppError> {
    Ok(Json(
        moderate_thread(&state, auth, id, ThreadStatus::Approved, None).await?,
    ))
}

pub async fn reject_thread(
    Path(id): Path<Uuid>,
    auth: AuthUser,
    State(state): State<AppState>,
    payload: Option<Json<RejectRequest>>,
) -> Result<Json<Thread>, AppError> {
    let reason = payload
        .and_then(|Json(payload)| payload.reason)
        .map(|reason| reason.trim().to_string())
        .filter(|reason| !reason.is_empty());
    Ok(Json(
        moderate_thread(&state, auth, id, ThreadStatus::Rejected, reason).await?,
    ))
}

pub async fn list_moderation_audit(
    auth: AuthUser,
    State(state): State<AppState>,
    Query(query): Query<PaginationQuery>,
) -> Result<Json<ListResponse<ModerationAction>>, AppError> {
    evaluate(&auth.actor(), Action::Moderate, &Target::Site).into_result()?;
    let limit = page_limit(query.limit)?;
    let cursor = parse_cursor(query.cursor)?;

    let mut actions = ModerationService::new(state.db.clone())
        .list_audit(cursor, limit + 1)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, "failed to list moderation audit");
            AppError::internal("failed to list moderation audit")
        })?;

    let next_cursor = finish_page(&mut actions, limit, |action| (action.created_at, action.id));
    Ok(Json(ListResponse {
        items: actions,
        next_cursor,
    }))
}

// ---------------------------------------------------------------------------
// Comments
// ---------------------------------------------------------------------------

pub async fn create_comment(
    Path(thread_id): Path<Uuid>,
    auth: AuthUser,
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<CommentNode>), AppError> {
    let thread = load_thread(&state, thread_id, Some(auth.user_id)).await?;
    evaluate(&auth.actor(), Action::Comment, &Target::thread(&thread)).into_result()?;

    let form = read_upload_form(&state, multipart).await?;
    let content = validation::comment_content(form.text("content").unwrap_or_default())?;

    let comments = CommentService::new(state.db.clone());
    let parent = form
        .text("parentCommentId")
        .or_else(|| form.text("parent_comment_id"))
        .map(str::trim)
        .filter(|value| !value.is_empty());
    let parent_comment_id = match parent {
        Some(value) => {
            let parent_id = Uuid::parse_str(value)
                .map_err(|_| AppError::bad_request("parentCommentId is not a valid id"))?;
            let parent = comments.get_comment(parent_id).await.map_err(|err| {
                tracing::error!(error = ?err, comment_id = %parent_id, "failed to load parent comment");
                AppError::internal("failed to create comment")
            })?;
            match parent {
                Some(parent) if parent.thread_id == thread_id && parent.is_active => Some(parent_id),
                _ => return Err(AppError::bad_request("parent comment not found in this thread")),
            }
        }
        None => None,
    };

    let attachments = attachment_service(&state);
    let objects = attachments
        .upload_all(auth.user_id, form.files)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, user_id = %auth.user_id, "failed to upload attachments");
            AppError::internal("failed to upload attachments")
        })?;

    let mut comment = comments
        .create_comment(thread_id, auth.user_id, parent_comment_id, &content, &objects)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, thread_id = %thread_id, "failed to create comment");
            AppError::internal("failed to create comment")
        })?;
    attachments
        .presign_all(&mut comment.attachments, state.download_url_ttl_seconds)
        .await;

    Ok((
        StatusCode::CREATED,
        Json(CommentNode::from_comment(comment, Some(auth.user_id))),
    ))
}

#[derive(Deserialize)]
pub struct CommentListQuery {
    pub include_inactive: Option<bool>,
}

#[derive(Serialize)]
pub struct CommentsResponse {
    pub thread_id: Uuid,
    pub total: usize,
    pub comments: Vec<CommentNode>,
}

pub async fn list_comments(
    Path(thread_id): Path<Uuid>,
    viewer: MaybeAuthUser,
    State(state): State<AppState>,
    Query(query): Query<CommentListQuery>,
) -> Result<Json<CommentsResponse>, AppError> {
    let thread = load_thread(&state, thread_id, viewer.user_id()).await?;
    evaluate(&viewer.actor(), Action::Read, &Target::thread(&thread)).into_result()?;
    let include_inactive = query.include_inactive.unwrap_or(false) && viewer.is_admin();

    let mut comments = CommentService::new(state.db.clone())
        .list_for_thread(thread_id, include_inactive)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, thread_id = %thread_id, "failed to list comments");
            AppError::internal("failed to list comments")
        })?;

    let attachments = attachment_service(&state);
    let ids: Vec<Uuid> = comments.iter().map(|comment| comment.id).collect();
    let mut grouped = attachments.list_for_comments(&ids).await.map_err(|err| {
        tracing::error!(error = ?err, thread_id = %thread_id, "failed to load comment attachments");
        AppError::internal("failed to list comments")
    })?;
    for comment in comments.iter_mut() {
        if let Some(mut files) = grouped.remove(&comment.id) {
            attachments
                .presign_all(&mut files, state.download_url_ttl_seconds)
                .await;
            comment.attachments = files;
        }
    }

    let forest = assemble_comment_forest(comments, viewer.user_id());
    if !forest.orphaned.is_empty() {
        tracing::warn!(
            thread_id = %thread_id,
            orphaned = ?forest.orphaned,
            "comments reference a parent outside the listing; promoted to roots"
        );
    }

    let total = forest.roots.iter().map(CommentNode::subtree_len).sum();
    Ok(Json(CommentsResponse {
        thread_id,
        total,
        comments: forest.roots,
    }))
}

#[derive(Deserialize)]
pub struct UpdateCommentRequest {
    pub content: String,
}

pub async fn update_comment(
    Path(id): Path<Uuid>,
    auth: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<UpdateCommentRequest>,
) -> Result<Json<CommentNode>, AppError> {
    let (comment, thread) = load_comment(&state, id).await?;
    evaluate(&auth.actor(), Action::Edit, &Target::comment(&comment, &thread)).into_result()?;
    let content = validation::comment_content(&payload.content)?;

    let comment = CommentService::new(state.db.clone())
        .update_content(id, &content)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, comment_id = %id, "failed to update comment");
            AppError::internal("failed to update comment")
        })?
        .ok_or_else(|| AppError::not_found("comment not found"))?;

    Ok(Json(CommentNode::from_comment(comment, Some(auth.user_id))))
}

pub async fn delete_comment(
    Path(id): Path<Uuid>,
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<StatusCode, AppError> {
    let (mut comment, thread) = load_comment(&state, id).await?;
    evaluate(&auth.actor(), Action::Delete, &Target::comment(&comment, &thread)).into_result()?;

    let deleted = ModerationService::new(state.db.clone())
        .soft_delete(auth.user_id, &mut comment)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, comment_id = %id, "failed to delete comment");
            AppError::internal("failed to delete comment")
        })?;

    if deleted {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::not_found("comment not found"))
    }
}

pub async fn restore_comment(
    Path(id): Path<Uuid>,
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<CommentNode>, AppError> {
    let (mut comment, thread) = load_comment(&state, id).await?;
    evaluate(&auth.actor(), Action::Restore, &Target::comment(&comment, &thread)).into_result()?;

    let restored = ModerationService::new(state.db.clone())
        .restore(auth.user_id, &mut comment)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, comment_id = %id, "failed to restore comment");
            AppError::internal("failed to restore comment")
        })?;
    if !restored {
        return Err(AppError::not_found("comment not found"));
    }

    Ok(Json(CommentNode::from_comment(comment, Some(auth.user_id))))
}

async fn set_comment_like(state: &AppState, auth: AuthUser, id: Uuid, like: bool) -> Result<LikeResponse, AppError> {
    let (comment, thread) = load_comment(state, id).await?;
    evaluate(&auth.actor(), Action::Like, &Target::comment(&comment, &thread)).into_result()?;

    let service = CommentService::new(state.db.clone());
    let result = if like {
        service.like(id, auth.user_id).await
    } else {
        service.unlike(id, auth.user_id).await
    };
    result.map_err(|err| {
        tracing::error!(error = ?err, comment_id = %id, "failed to update comment like");
        AppError::internal("failed to update like")
    })?;

    let (comment, _) = load_comment(state, id).await?;
    Ok(LikeResponse {
        liked: comment.likes.contains(&auth.user_id),
        like_count: comment.likes.len() as i64,
    })
}

pub async fn like_comment(
    Path(id): Path<Uuid>,
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<LikeResponse>, AppError> {
    Ok(Json(set_comment_like(&state, auth, id, true).await?))
}

pub async fn unlike_comment(
    Path(id): Path<Uuid>,
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<LikeResponse>, AppError> {
    Ok(Json(set_comment_like(&state, auth, id, false).await?))
}

// ---------------------------------------------------------------------------
// Attachments
// ---------------------------------------------------------------------------

pub async fn get_attachment(
    Path(id): Path<Uuid>,
    viewer: MaybeAuthUser,
    State(state): State<AppState>,
) -> Result<Redirect, AppError> {
    const NOT_FOUND: &str = "attachment not found";

    let attachments = attachment_service(&state);
    let attachment = attachments
        .get(id)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, attachment_id = %id, "failed to load attachment");
            AppError::internal("failed to load attachment")
        })?
        .ok_or_else(|| AppError::not_found(NOT_FOUND))?;

    let target = match (attachment.thread_id, attachment.comment_id) {
        (Some(thread_id), _) => {
            let thread = load_thread(&state, thread_id, None)
                .await
                .map_err(|_| AppError::not_found(NOT_FOUND))?;
            Target::thread(&thread)
        }
        (None, Some(comment_id)) => {
            let (comment, thread) = load_comment(&state, comment_id)
                .await
                .map_err(|_| AppError::not_found(NOT_FOUND))?;
            Target::comment(&comment, &thread)
        }
        (None, None) => return Err(AppError::not_found(NOT_FOUND)),
    };

    if let Err(denial) = evaluate(&viewer.actor(), Action::Read, &target).into_result() {
        return Err(match denial.kind {
            DenialKind::NotFound => AppError::not_found(NOT_FOUND),
            _ => denial.into(),
        });
    }

    let url = attachments
        .presign(&attachment, state.download_url_ttl_seconds)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, attachment_id = %id, "failed to presign attachment");
            AppError::internal("failed to generate download URL")
        })?;

    Ok(Redirect::temporary(&url))
}

pub async fn delete_attachment(
    Path(id): Path<Uuid>,
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<StatusCode, AppError> {
    let attachments = attachment_service(&state);
    let attachment = attachments
        .get(id)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, attachment_id = %id, "failed to load attachment");
            AppError::internal("failed to load attachment")
        })?
        .ok_or_else(|| AppError::not_found("attachment not found"))?;

    if attachment.owner_id != auth.user_id && !auth.role.is_admin() {
        return Err(AppError::forbidden("you can only delete your own attachments"));
    }

    let deleted = attachments.delete(&attachment).await.map_err(|err| {
        tracing::error!(error = ?err, attachment_id = %id, "failed to delete attachment");
        AppError::internal("failed to delete attachment")
    })?;

    if deleted {
        tracing::info!(actor_id = %auth.user_id, attachment_id = %id, "attachment deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::not_found("attachment not found"))
    }
}
