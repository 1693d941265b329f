//! Request Rules Tests
//!
//! Pure helpers on the request path: which routes are throttled, per-role
//! limits, upload name sanitizing and search escaping.

use agora::app::attachments::sanitize_file_name;
use agora::app::threads::escape_like_pattern;
use agora::config::rate_limits::{RateAction, RateLimits, RateWindow};
use agora::domain::role::Role;
use agora::http::middleware::rate_limit::classify;
use agora::infra::storage::rewrite_presigned_url;
use axum::http::Method;

// ===========================================================================
// Throttled routes
// ===========================================================================

#[test]
fn write_routes_map_to_their_actions() {
    assert_eq!(classify(&Method::POST, "/v1/threads"), Some(RateAction::Thread));
    assert_eq!(
        classify(&Method::POST, "/v1/threads/abc/comments"),
        Some(RateAction::Comment)
    );
    assert_eq!(
        classify(&Method::POST, "/v1/threads/abc/like"),
        Some(RateAction::Like)
    );
    assert_eq!(
        classify(&Method::POST, "/v1/comments/abc/like"),
        Some(RateAction::Like)
    );
    assert_eq!(
        classify(&Method::POST, "/v1/moderation/threads/abc/approve"),
        Some(RateAction::Moderation)
    );
    assert_eq!(
        classify(&Method::POST, "/v1/admin/users/abc/ban"),
        Some(RateAction::Moderation)
    );
    assert_eq!(
        classify(&Method::PATCH, "/v1/admin/users/abc/role"),
        Some(RateAction::Moderation)
    );
}

#[test]
fn reads_and_unknown_paths_are_not_throttled() {
    assert_eq!(classify(&Method::GET, "/v1/threads"), None);
    assert_eq!(classify(&Method::GET, "/v1/threads/abc/comments"), None);
    assert_eq!(classify(&Method::DELETE, "/v1/threads/abc/like"), None);
    assert_eq!(classify(&Method::POST, "/v1/auth/login"), None);
    assert_eq!(classify(&Method::POST, "/threads"), None);
}

// ===========================================================================
// Per-role limits
// ===========================================================================

#[test]
fn regular_users_get_no_moderation_budget() {
    let limits = RateLimits::for_role(Role::User);
    assert_eq!(
        limits.windows_for(RateAction::Moderation),
        vec![(0, RateWindow::Hour)]
    );
}

#[test]
fn thread_creation_has_hourly_and_daily_windows() {
    let windows = RateLimits::for_role(Role::User).windows_for(RateAction::Thread);
    assert_eq!(windows.len(), 2);
    assert_eq!(windows[0].1, RateWindow::Hour);
    assert_eq!(windows[1].1, RateWindow::Day);
}

#[test]
fn higher_roles_never_get_tighter_limits() {
    let actions = [
        RateAction::Thread,
        RateAction::Comment,
        RateAction::Like,
        RateAction::Moderation,
    ];
    let tiers = [Role::User, Role::AdminLevel1, Role::AdminLevel2];
    for pair in tiers.windows(2) {
        let lower = RateLimits::for_role(pair[0]);
        let higher = RateLimits::for_role(pair[1]);
        for action in actions {
            for (low, high) in lower
                .windows_for(action)
                .into_iter()
                .zip(higher.windows_for(action))
            {
                assert!(low.0 <= high.0, "{:?} for {}", action, pair[1]);
            }
        }
    }
}

// ===========================================================================
// Uploads
// ===========================================================================

#[test]
fn file_names_keep_only_safe_characters() {
    assert_eq!(sanitize_file_name("notes.pdf"), "notes.pdf");
    assert_eq!(sanitize_file_name("my file (1).pdf"), "my_file__1_.pdf");
    assert_eq!(sanitize_file_name("lab-report_v2.docx"), "lab-report_v2.docx");
}

#[test]
fn file_names_lose_their_directories() {
    assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
    assert_eq!(sanitize_file_name("C:\\Users\\me\\essay.txt"), "essay.txt");
}

#[test]
fn degenerate_file_names_get_a_placeholder() {
    assert_eq!(sanitize_file_name(""), "file");
    assert_eq!(sanitize_file_name("..."), "file");
    assert_eq!(sanitize_file_name(".env"), "env");
}

#[test]
fn long_file_names_are_truncated() {
    let name = format!("{}.txt", "a".repeat(300));
    assert_eq!(sanitize_file_name(&name).len(), 100);
}

// ===========================================================================
// Search and URLs
// ===========================================================================

#[test]
fn like_wildcards_are_escaped() {
    assert_eq!(escape_like_pattern("calculus"), "calculus");
    assert_eq!(escape_like_pattern("100%"), "100\\%");
    assert_eq!(escape_like_pattern("a_b"), "a\\_b");
    assert_eq!(escape_like_pattern("back\\slash"), "back\\\\slash");
}

#[test]
fn presigned_urls_point_at_the_public_endpoint() {
    let rewritten = rewrite_presigned_url(
        "http://localstack:4566/bucket/key?X-Amz-Signature=abc",
        "https://files.example.edu",
    )
    .unwrap();
    assert_eq!(
        rewritten,
        "https://files.example.edu/bucket/key?X-Amz-Signature=abc"
    );
}
