use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::moderation::Moderatable;
use crate::domain::role::Role;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub display_name: String,
    pub bio: Option<String>,
    pub role: Role,
    /// `false` means banned (or a deleted account).
    pub is_active: bool,
    /// With `is_active == false`, `None` is a permanent ban.
    #[serde(with = "time::serde::rfc3339::option")]
    pub banned_until: Option<OffsetDateTime>,
    pub ban_reason: Option<String>,
    pub banned_by: Option<Uuid>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl User {
    /// A timed ban whose expiry has passed but is still recorded as active.
    pub fn ban_has_lapsed(&self, now: OffsetDateTime) -> bool {
        !self.is_active && matches!(self.banned_until, Some(until) if until <= now)
    }

    /// Clears a lapsed timed ban. Permanent bans and active accounts are
    /// returned unchanged; persisting the result is the caller's job.
    pub fn reconcile_ban_expiry(mut self, now: OffsetDateTime) -> Self {
        if self.ban_has_lapsed(now) {
            self.is_active = true;
            self.banned_until = None;
            self.ban_reason = None;
            self.banned_by = None;
        }
        self
    }

    pub fn is_banned(&self) -> bool {
        !self.is_active
    }
}

impl Moderatable for User {
    const TABLE: &'static str = "users";
    const TARGET_TYPE: &'static str = "user";

    fn id(&self) -> Uuid {
        self.id
    }

    fn is_active(&self) -> bool {
        self.is_active
    }

    fn set_active(&mut self, active: bool) {
        self.is_active = active;
        if active {
            self.banned_until = None;
            self.ban_reason = None;
            self.banned_by = None;
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BanInfo {
    #[serde(with = "time::serde::rfc3339::option")]
    pub banned_until: Option<OffsetDateTime>,
    pub permanent: bool,
    pub reason: Option<String>,
    pub banned_by: Option<Uuid>,
}

/// Profile as shown to other people. Ban metadata is only filled in for
/// admin viewers.
#[derive(Debug, Clone, Serialize)]
pub struct PublicUser {
    pub id: Uuid,
    pub username: String,
    pub display_name: String,
    pub bio: Option<String>,
    pub role: Role,
    pub is_active: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ban: Option<BanInfo>,
}

impl PublicUser {
    pub fn for_viewer(user: User, viewer_is_admin: bool) -> Self {
        let ban = if viewer_is_admin && user.is_banned() {
            Some(BanInfo {
                permanent: user.banned_until.is_none(),
                banned_until: user.banned_until,
                reason: user.ban_reason.clone(),
                banned_by: user.banned_by,
            })
        } else {
            None
        };

        Self {
            id: user.id,
            username: user.username,
            display_name: user.display_name,
            bio: user.bio,
            role: user.role,
            is_active: user.is_active,
            created_at: user.created_at,
            ban,
        }
    }
}

/// Author fields embedded in thread and comment responses.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthorSummary {
    pub id: Uuid,
    pub username: String,
    pub display_name: String,
    pub role: Role,
}
