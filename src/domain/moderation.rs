use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::domain::validation::ValidationError;

/// An entity that is soft-deleted by clearing its active flag instead of
/// being removed from storage.
pub trait Moderatable {
    /// Table that stores the `is_active` flag for this entity.
    const TABLE: &'static str;
    /// Name recorded in the moderation audit log.
    const TARGET_TYPE: &'static str;

    fn id(&self) -> Uuid;
    fn is_active(&self) -> bool;
    fn set_active(&mut self, active: bool);

    fn soft_delete(&mut self) {
        self.set_active(false);
    }

    fn restore(&mut self) {
        self.set_active(true);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModerationAction {
    pub id: Uuid,
    pub actor_id: Uuid,
    pub target_type: String,
    pub target_id: Uuid,
    pub action: String,
    pub reason: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModerationKind {
    Ban,
    Unban,
    ChangeRole,
    CreateAdmin,
    Approve,
    Reject,
    Delete,
    Restore,
}

impl ModerationKind {
    pub fn as_db(&self) -> &'static str {
        match self {
            Self::Ban => "ban",
            Self::Unban => "unban",
            Self::ChangeRole => "change_role",
            Self::CreateAdmin => "create_admin",
            Self::Approve => "approve",
            Self::Reject => "reject",
            Self::Delete => "delete",
            Self::Restore => "restore",
        }
    }
}

// One hundred years.
const MAX_BAN_HOURS: f64 = 876_000.0;

/// How long a ban lasts, as supplied by the moderator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BanDuration {
    Hours(f64),
    Forever,
}

impl BanDuration {
    /// Accepts a positive number of hours (JSON number or numeric string),
    /// the literal `"forever"`, or nothing (which means forever).
    pub fn parse(value: Option<&Value>) -> Result<Self, ValidationError> {
        match value {
            None | Some(Value::Null) => Ok(Self::Forever),
            Some(Value::Number(number)) => number
                .as_f64()
                .ok_or(ValidationError::InvalidBanDuration)
                .and_then(Self::from_hours),
            Some(Value::String(text)) => {
                let text = text.trim();
                if text == "forever" {
                    return Ok(Self::Forever);
                }
                text.parse::<f64>()
                    .map_err(|_| ValidationError::InvalidBanDuration)
                    .and_then(Self::from_hours)
            }
            Some(_) => Err(ValidationError::InvalidBanDuration),
        }
    }

    fn from_hours(hours: f64) -> Result<Self, ValidationError> {
        if !hours.is_finite() || hours <= 0.0 || hours > MAX_BAN_HOURS {
            return Err(ValidationError::InvalidBanDuration);
        }
        Ok(Self::Hours(hours))
    }

    /// Absolute expiry; `None` is a permanent ban.
    pub fn banned_until(&self, now: OffsetDateTime) -> Option<OffsetDateTime> {
        match self {
            Self::Forever => None,
            Self::Hours(hours) => {
                let seconds = (hours * 3600.0).round() as i64;
                Some(now + Duration::seconds(seconds))
            }
        }
    }
}
