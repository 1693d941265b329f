pub mod attachments;
pub mod auth;
pub mod comments;
pub mod moderation;
pub mod rate_limiter;
pub mod threads;
pub mod users;
