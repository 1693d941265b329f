use thiserror::Error;

pub const MAX_COMMENT_LEN: usize = 2000;
pub const MAX_THREAD_TITLE_LEN: usize = 200;
pub const MAX_THREAD_CONTENT_LEN: usize = 10_000;
pub const MAX_CATEGORY_LEN: usize = 50;
pub const MIN_USERNAME_LEN: usize = 3;
pub const MAX_USERNAME_LEN: usize = 30;
pub const MIN_PASSWORD_LEN: usize = 8;
pub const MAX_PASSWORD_LEN: usize = 128;
pub const MAX_BIO_LEN: usize = 500;
pub const MAX_DISPLAY_NAME_LEN: usize = 50;

/// Caller input rejected before it reaches storage.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{0} is required")]
    Missing(&'static str),
    #[error("{field} must be at most {max} characters")]
    TooLong { field: &'static str, max: usize },
    #[error("{field} must be at least {min} characters")]
    TooShort { field: &'static str, min: usize },
    #[error("duration must be a positive number of hours or \"forever\"")]
    InvalidBanDuration,
    #[error("{0}")]
    Invalid(String),
}

/// Trims `value` and checks it is non-empty and within `max` characters.
pub fn required_text(field: &'static str, value: &str, max: usize) -> Result<String, ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Missing(field));
    }
    if trimmed.chars().count() > max {
        return Err(ValidationError::TooLong { field, max });
    }
    Ok(trimmed.to_string())
}

pub fn comment_content(value: &str) -> Result<String, ValidationError> {
    required_text("content", value, MAX_COMMENT_LEN)
}

pub fn username(value: &str) -> Result<String, ValidationError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ValidationError::Missing("username"));
    }
    let len = value.chars().count();
    if len < MIN_USERNAME_LEN {
        return Err(ValidationError::TooShort {
            field: "username",
            min: MIN_USERNAME_LEN,
        });
    }
    if len > MAX_USERNAME_LEN {
        return Err(ValidationError::TooLong {
            field: "username",
            max: MAX_USERNAME_LEN,
        });
    }
    if !value.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(ValidationError::Invalid(
            "username may only contain letters, digits and underscores".to_string(),
        ));
    }
    Ok(value.to_string())
}

pub fn email(value: &str) -> Result<String, ValidationError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ValidationError::Missing("email"));
    }
    let valid = match value.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.starts_with('.'),
        None => false,
    };
    if !valid {
        return Err(ValidationError::Invalid("email is invalid".to_string()));
    }
    Ok(value.to_lowercase())
}

pub fn password(value: &str) -> Result<(), ValidationError> {
    if value.trim().chars().count() < MIN_PASSWORD_LEN {
        return Err(ValidationError::TooShort {
            field: "password",
            min: MIN_PASSWORD_LEN,
        });
    }
    if value.len() > MAX_PASSWORD_LEN {
        return Err(ValidationError::TooLong {
            field: "password",
            max: MAX_PASSWORD_LEN,
        });
    }
    Ok(())
}
