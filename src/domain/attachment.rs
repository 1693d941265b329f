use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Attachment {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub thread_id: Option<Uuid>,
    pub comment_id: Option<Uuid>,
    #[serde(skip_serializing)]
    pub object_key: String,
    pub file_name: String,
    pub content_type: String,
    pub bytes: i64,
    pub position: i32,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// Presigned download URL, filled in at response time.
    #[serde(skip_deserializing, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// A file received in a multipart request, not yet stored.
#[derive(Debug, Clone)]
pub struct PendingUpload {
    pub file_name: String,
    pub content_type: String,
    pub data: bytes::Bytes,
}
