use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::attachment::Attachment;
use crate::domain::moderation::Moderatable;
use crate::domain::user::AuthorSummary;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ThreadStatus {
    Pending,
    Approved,
    Rejected,
}

impl ThreadStatus {
    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    pub fn as_db(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thread {
    pub id: Uuid,
    pub author: AuthorSummary,
    /// Whether the author's account is active; banned authors hide their threads.
    #[serde(skip)]
    pub author_active: bool,
    pub title: String,
    pub content: String,
    pub category: String,
    pub status: ThreadStatus,
    pub is_active: bool,
    pub views: i64,
    pub like_count: i64,
    pub liked: bool,
    pub comment_count: i64,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    pub moderated_by: Option<Uuid>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub moderated_at: Option<OffsetDateTime>,
    pub rejection_reason: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Moderatable for Thread {
    const TABLE: &'static str = "threads";
    const TARGET_TYPE: &'static str = "thread";

    fn id(&self) -> Uuid {
        self.id
    }

    fn is_active(&self) -> bool {
        self.is_active
    }

    fn set_active(&mut self, active: bool) {
        self.is_active = active;
    }
}
