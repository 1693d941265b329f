use std::collections::HashMap;

use anyhow::Result;
use sqlx::postgres::PgRow;
use sqlx::Row;
use uuid::Uuid;

use crate::domain::attachment::{Attachment, PendingUpload};
use crate::infra::db::Db;
use crate::infra::storage::ObjectStorage;

const ATTACHMENT_COLUMNS: &str = "id, owner_id, thread_id, comment_id, object_key, file_name, \
     content_type, bytes, position, created_at";

/// What an attachment hangs off. Exactly one per attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentParent {
    Thread(Uuid),
    Comment(Uuid),
}

/// A blob already written to the object store, waiting for its row.
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub object_key: String,
    pub file_name: String,
    pub content_type: String,
    pub bytes: i64,
}

#[derive(Clone)]
pub struct AttachmentService {
    db: Db,
    storage: ObjectStorage,
}

fn attachment_from_row(row: &PgRow) -> Result<Attachment> {
    Ok(Attachment {
        id: row.try_get("id")?,
        owner_id: row.try_get("owner_id")?,
        thread_id: row.try_get("thread_id")?,
        comment_id: row.try_get("comment_id")?,
        object_key: row.try_get("object_key")?,
        file_name: row.try_get("file_name")?,
        content_type: row.try_get("content_type")?,
        bytes: row.try_get("bytes")?,
        position: row.try_get("position")?,
        created_at: row.try_get("created_at")?,
        url: None,
    })
}

impl AttachmentService {
    pub fn new(db: Db, storage: ObjectStorage) -> Self {
        Self { db, storage }
    }

    /// Writes each upload to the object store in order. If one fails the
    /// objects written before it stay in the bucket; their keys are logged.
    pub async fn upload_all(
        &self,
        owner_id: Uuid,
        uploads: Vec<PendingUpload>,
    ) -> Result<Vec<StoredObject>> {
        let mut stored: Vec<StoredObject> = Vec::with_capacity(uploads.len());
        for upload in uploads {
            let object_key = object_key_for(owner_id, &upload.file_name);
            let bytes = upload.data.len() as i64;
            if let Err(err) = self
                .storage
                .put_object(&object_key, &upload.content_type, upload.data)
                .await
            {
                let orphaned: Vec<&str> = stored.iter().map(|o| o.object_key.as_str()).collect();
                tracing::warn!(
                    owner_id = %owner_id,
                    orphaned_keys = ?orphaned,
                    "attachment upload failed part way through"
                );
                return Err(err);
            }
            stored.push(StoredObject {
                object_key,
                file_name: upload.file_name,
                content_type: upload.content_type,
                bytes,
            });
        }
        Ok(stored)
    }

    pub async fn insert_with_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        owner_id: Uuid,
        parent: AttachmentParent,
        objects: &[StoredObject],
    ) -> Result<Vec<Attachment>> {
        let (thread_id, comment_id) = match parent {
            AttachmentParent::Thread(id) => (Some(id), None),
            AttachmentParent::Comment(id) => (None, Some(id)),
        };

        let sql = format!(
            "INSERT INTO attachments \
                (owner_id, thread_id, comment_id, object_key, file_name, content_type, bytes, position) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             RETURNING {}",
            ATTACHMENT_COLUMNS
        );

        let mut attachments = Vec::with_capacity(objects.len());
        for (position, object) in objects.iter().enumerate() {
            let row = sqlx::query(&sql)
                .bind(owner_id)
                .bind(thread_id)
                .bind(comment_id)
                .bind(&object.object_key)
                .bind(&object.file_name)
                .bind(&object.content_type)
                .bind(object.bytes)
                .bind(position as i32)
                .fetch_one(&mut **tx)
                .await?;
            attachments.push(attachment_from_row(&row)?);
        }
        Ok(attachments)
    }

    pub async fn get(&self, attachment_id: Uuid) -> Result<Option<Attachment>> {
        let sql = format!("SELECT {} FROM attachments WHERE id = $1", ATTACHMENT_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(attachment_id)
            .fetch_optional(self.db.pool())
            .await?;
        row.as_ref().map(attachment_from_row).transpose()
    }

    pub async fn list_for_thread(&self, thread_id: Uuid) -> Result<Vec<Attachment>> {
        let sql = format!(
            "SELECT {} FROM attachments WHERE thread_id = $1 ORDER BY position, created_at",
            ATTACHMENT_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(thread_id)
            .fetch_all(self.db.pool())
            .await?;
        rows.iter().map(attachment_from_row).collect()
    }

    /// Attachments of many comments at once, grouped by comment id.
    pub async fn list_for_comments(
        &self,
        comment_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, Vec<Attachment>>> {
        let mut grouped: HashMap<Uuid, Vec<Attachment>> = HashMap::new();
        if comment_ids.is_empty() {
            return Ok(grouped);
        }

        let sql = format!(
            "SELECT {} FROM attachments WHERE comment_id = ANY($1) \
             ORDER BY comment_id, position, created_at",
            ATTACHMENT_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(comment_ids)
            .fetch_all(self.db.pool())
            .await?;

        for row in &rows {
            let attachment = attachment_from_row(row)?;
            if let Some(comment_id) = attachment.comment_id {
                grouped.entry(comment_id).or_default().push(attachment);
            }
        }
        Ok(grouped)
    }

    pub async fn presign(&self, attachment: &Attachment, ttl_seconds: u64) -> Result<String> {
        self.storage
            .presign_get(&attachment.object_key, ttl_seconds)
            .await
    }

    /// Fills in `url` on every attachment. A failed presign leaves the URL
    /// empty rather than failing the listing.
    pub async fn presign_all(&self, attachments: &mut [Attachment], ttl_seconds: u64) {
        let futures: Vec<_> = attachments
            .iter()
            .enumerate()
            .map(|(i, attachment)| {
                let key = attachment.object_key.clone();
                async move {
                    let url = match self.storage.presign_get(&key, ttl_seconds).await {
                        Ok(url) => Some(url),
                        Err(err) => {
                            tracing::warn!(object_key = %key, error = ?err, "failed to presign attachment");
                            None
                        }
                    };
                    (i, url)
                }
            })
            .collect();

        let results = futures::future::join_all(futures).await;
        for (i, url) in results {
            attachments[i].url = url;
        }
    }

    /// Removes the blob, then the row.
    pub async fn delete(&self, attachment: &Attachment) -> Result<bool> {
        self.storage.delete_object(&attachment.object_key).await?;

        let result = sqlx::query("DELETE FROM attachments WHERE id = $1")
            .bind(attachment.id)
            .execute(self.db.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

fn object_key_for(owner_id: Uuid, file_name: &str) -> String {
    format!(
        "attachments/{}/{}-{}",
        owner_id,
        Uuid::new_v4(),
        sanitize_file_name(file_name)
    )
}

/// Keeps ASCII letters, digits, `.`, `-` and `_`; everything else becomes `_`.
pub fn sanitize_file_name(file_name: &str) -> String {
    let base = file_name
        .rsplit(|c| c == '/' || c == '\\')
        .next()
        .unwrap_or(file_name);
    let cleaned: String = base
        .chars()
        .take(100)
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();

    let cleaned = cleaned.trim_start_matches('.').to_string();
    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned
    }
}
