pub mod access;
pub mod attachment;
pub mod comment;
pub mod moderation;
pub mod role;
pub mod thread;
pub mod user;
pub mod validation;
