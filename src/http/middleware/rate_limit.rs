use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderValue, Method};
use axum::middleware::Next;
use axum::response::Response;
use std::net::SocketAddr;

use crate::app::rate_limiter::RateLimiter;
use crate::config::rate_limits::{RateAction, IP_LIMIT_LOGIN, IP_LIMIT_REGISTER};
use crate::http::{AppError, AuthUser};
use crate::AppState;

/// Which throttled action a request performs, if any. Paths include the
/// `/v1` prefix.
pub fn classify(method: &Method, path: &str) -> Option<RateAction> {
    let path = path.strip_prefix("/v1")?;
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();

    match (method.as_str(), segments.as_slice()) {
        ("POST", ["threads"]) => Some(RateAction::Thread),
        ("POST", ["threads", _, "comments"]) => Some(RateAction::Comment),
        ("POST", ["threads", _, "like"]) | ("POST", ["comments", _, "like"]) => {
            Some(RateAction::Like)
        }
        ("POST", ["moderation", ..])
        | ("POST", ["admin", "users", ..])
        | ("PATCH", ["admin", "users", ..]) => Some(RateAction::Moderation),
        _ => None,
    }
}

/// Per-user, per-role limits for write actions.
pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    auth: Option<AuthUser>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let action = match classify(request.method(), request.uri().path()) {
        Some(action) => action,
        None => return Ok(next.run(request).await),
    };
    let auth_user = match auth {
        Some(auth_user) => auth_user,
        None => return Ok(next.run(request).await),
    };

    let rate_limiter = RateLimiter::new(state.cache.clone());
    let info = rate_limiter
        .check(auth_user.user_id, auth_user.role, action)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, "failed to check rate limit");
            AppError::internal("failed to check rate limit")
        })?;

    if info.limited {
        return Err(AppError::rate_limited(format!(
            "rate limit exceeded for action: {}, please try again later",
            action.as_str()
        )));
    }

    if let Err(err) = rate_limiter
        .increment(auth_user.user_id, auth_user.role, action)
        .await
    {
        tracing::warn!(error = ?err, "failed to increment rate limit counter");
    }

    let mut response = next.run(request).await;
    // No applicable window leaves `remaining` at u32::MAX.
    if info.limit > 0 {
        let headers = response.headers_mut();
        headers.insert("x-ratelimit-limit", HeaderValue::from(info.limit));
        headers.insert(
            "x-ratelimit-remaining",
            HeaderValue::from(info.remaining.saturating_sub(1)),
        );
    }
    Ok(response)
}

/// IP-based limits for login and registration.
pub async fn ip_rate_limit_middleware(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let rate_limit_config = match (request.uri().path(), request.method().as_str()) {
        ("/v1/auth/login", "POST") => Some(IP_LIMIT_LOGIN),
        ("/v1/auth/register", "POST") => Some(IP_LIMIT_REGISTER),
        _ => None,
    };

    let (action, limit, window) = match rate_limit_config {
        Some(config) => config,
        None => return Ok(next.run(request).await),
    };

    let ip = addr.ip().to_string();
    let rate_limiter = RateLimiter::new(state.cache.clone());

    let is_limited = rate_limiter
        .check_ip(&ip, action, limit, window)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, "failed to check IP rate limit");
            AppError::internal("failed to check rate limit")
        })?;

    if is_limited {
        tracing::warn!(ip = ip, action = action, "IP rate limit exceeded");
        return Err(AppError::rate_limited(
            "too many attempts from your IP address, please try again later",
        ));
    }

    if let Err(err) = rate_limiter.increment_ip(&ip, action, window).await {
        tracing::warn!(error = ?err, "failed to increment IP rate limit counter");
    }

    Ok(next.run(request).await)
}
