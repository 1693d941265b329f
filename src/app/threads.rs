use anyhow::{anyhow, Result};
use sqlx::postgres::PgRow;
use sqlx::Row;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::app::attachments::{AttachmentParent, AttachmentService, StoredObject};
use crate::app::moderation::{AuditEntry, ModerationService};
use crate::app::users::{lift_lapsed_bans, AuthorScope};
use crate::domain::moderation::ModerationKind;
use crate::domain::role::Role;
use crate::domain::thread::{Thread, ThreadStatus};
use crate::domain::user::AuthorSummary;
use crate::infra::db::Db;

// $1 is the viewer (nullable), used for the `liked` flag.
const THREAD_SELECT: &str = "SELECT t.id, t.author_id, u.username AS author_username, \
            u.display_name AS author_display_name, u.role::text AS author_role, \
            u.is_active AS author_active, t.title, t.content, t.category, \
            t.status::text AS status, t.is_active, t.views, \
            (SELECT COUNT(*) FROM thread_likes l WHERE l.thread_id = t.id) AS like_count, \
            EXISTS (SELECT 1 FROM thread_likes l WHERE l.thread_id = t.id AND l.user_id = $1::uuid) AS liked, \
            (SELECT COUNT(*) FROM comments c WHERE c.thread_id = t.id AND c.is_active) AS comment_count, \
            t.moderated_by, t.moderated_at, t.rejection_reason, t.created_at, t.updated_at \
     FROM threads t \
     JOIN users u ON u.id = t.author_id";

#[derive(Debug, Clone, Default)]
pub struct ThreadQuery {
    pub category: Option<String>,
    pub search: Option<String>,
    pub cursor: Option<(OffsetDateTime, Uuid)>,
    pub limit: i64,
}

#[derive(Clone)]
pub struct ThreadService {
    db: Db,
}

fn thread_from_row(row: &PgRow) -> Result<Thread> {
    let role: String = row.try_get("author_role")?;
    let role = Role::from_db(&role).ok_or_else(|| anyhow!("unknown user role: {}", role))?;
    let status: String = row.try_get("status")?;
    let status =
        ThreadStatus::from_db(&status).ok_or_else(|| anyhow!("unknown thread status: {}", status))?;

    Ok(Thread {
        id: row.try_get("id")?,
        author: AuthorSummary {
            id: row.try_get("author_id")?,
            username: row.try_get("author_username")?,
            display_name: row.try_get("author_display_name")?,
            role,
        },
        author_active: row.try_get("author_active")?,
        title: row.try_get("title")?,
        content: row.try_get("content")?,
        category: row.try_get("category")?,
        status,
        is_active: row.try_get("is_active")?,
        views: row.try_get("views")?,
        like_count: row.try_get("like_count")?,
        liked: row.try_get("liked")?,
        comment_count: row.try_get("comment_count")?,
        attachments: Vec::new(),
        moderated_by: row.try_get("moderated_by")?,
        moderated_at: row.try_get("moderated_at")?,
        rejection_reason: row.try_get("rejection_reason")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Escapes `%`, `_` and `\` so user input matches literally inside ILIKE.
pub fn escape_like_pattern(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

impl ThreadService {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Inserts a pending thread together with its already-uploaded attachments.
    pub async fn create_thread(
        &self,
        author_id: Uuid,
        title: &str,
        content: &str,
        category: &str,
        objects: &[StoredObject],
    ) -> Result<Thread> {
        let mut tx = self.db.pool().begin().await?;
        let thread_id: Uuid = sqlx::query_scalar(
            "INSERT INTO threads (author_id, title, content, category) \
             VALUES ($1, $2, $3, $4) \
             RETURNING id",
        )
        .bind(author_id)
        .bind(title)
        .bind(content)
        .bind(category)
        .fetch_one(&mut *tx)
        .await?;

        let attachments = AttachmentService::insert_with_tx(
            &mut tx,
            author_id,
            AttachmentParent::Thread(thread_id),
            objects,
        )
        .await?;

        let sql = format!("{} WHERE t.id = $2", THREAD_SELECT);
        let row = sqlx::query(&sql)
            .bind(Some(author_id))
            .bind(thread_id)
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;

        let mut thread = thread_from_row(&row)?;
        thread.attachments = attachments;
        Ok(thread)
    }

    /// Loads a thread in any state. Visibility is decided by the caller.
    pub async fn get_thread(&self, thread_id: Uuid, viewer_id: Option<Uuid>) -> Result<Option<Thread>> {
        lift_lapsed_bans(&self.db, AuthorScope::Thread(thread_id), OffsetDateTime::now_utc()).await?;
        let sql = format!("{} WHERE t.id = $2", THREAD_SELECT);
        let row = sqlx::query(&sql)
            .bind(viewer_id)
            .bind(thread_id)
            .fetch_optional(self.db.pool())
            .await?;
        row.as_ref().map(thread_from_row).transpose()
    }

    /// Counts one view and returns the new total.
    pub async fn record_view(&self, thread_id: Uuid) -> Result<i64> {
        let views: i64 =
            sqlx::query_scalar("UPDATE threads SET views = views + 1 WHERE id = $1 RETURNING views")
                .bind(thread_id)
                .fetch_one(self.db.pool())
                .await?;
        Ok(views)
    }

    /// Public listing: approved, active threads by active authors, newest first.
    pub async fn list_threads(&self, viewer_id: Option<Uuid>, query: &ThreadQuery) -> Result<Vec<Thread>> {
        let (cursor_at, cursor_id) = split_cursor(query.cursor);
        let pattern = query
            .search
            .as_deref()
            .map(|q| format!("%{}%", escape_like_pattern(q)));
        lift_lapsed_bans(&self.db, AuthorScope::Listing, OffsetDateTime::now_utc()).await?;

        let sql = format!(
            "{} \
             WHERE t.status = 'approved' AND t.is_active AND u.is_active \
               AND ($2::text IS NULL OR t.category = $2) \
               AND ($3::text IS NULL OR t.title ILIKE $3 OR t.content ILIKE $3) \
               AND ($4::timestamptz IS NULL OR t.created_at < $4 \
                    OR (t.created_at = $4 AND t.id < $5)) \
             ORDER BY t.created_at DESC, t.id DESC \
             LIMIT $6",
            THREAD_SELECT
        );
        let rows = sqlx::query(&sql)
            .bind(viewer_id)
            .bind(query.category.as_deref())
            .bind(pattern)
            .bind(cursor_at)
            .bind(cursor_id)
            .bind(query.limit)
            .fetch_all(self.db.pool())
            .await?;

        rows.iter().map(thread_from_row).collect()
    }

    /// Threads written by one user. `include_hidden` adds pending, rejected and
    /// soft-deleted ones.
    pub async fn list_by_author(
        &self,
        author_id: Uuid,
        viewer_id: Option<Uuid>,
        include_hidden: bool,
        cursor: Option<(OffsetDateTime, Uuid)>,
        limit: i64,
    ) -> Result<Vec<Thread>> {
        let (cursor_at, cursor_id) = split_cursor(cursor);
        let sql = format!(
            "{} \
             WHERE t.author_id = $2 \
               AND ($3 OR (t.status = 'approved' AND t.is_active)) \
               AND ($4::timestamptz IS NULL OR t.created_at < $4 \
                    OR (t.created_at = $4 AND t.id < $5)) \
             ORDER BY t.created_at DESC, t.id DESC \
             LIMIT $6",
            THREAD_SELECT
        );
        let rows = sqlx::query(&sql)
            .bind(viewer_id)
            .bind(author_id)
            .bind(include_hidden)
            .bind(cursor_at)
            .bind(cursor_id)
            .bind(limit)
            .fetch_all(self.db.pool())
            .await?;

        rows.iter().map(thread_from_row).collect()
    }

    /// Moderation queue, newest first.
    pub async fn list_pending(
        &self,
        viewer_id: Uuid,
        cursor: Option<(OffsetDateTime, Uuid)>,
        limit: i64,
    ) -> Result<Vec<Thread>> {
        let (cursor_at, cursor_id) = split_cursor(cursor);
        let sql = format!(
            "{} \
             WHERE t.status = 'pending' AND t.is_active \
               AND ($2::timestamptz IS NULL OR t.created_at < $2 \
                    OR (t.created_at = $2 AND t.id < $3)) \
             ORDER BY t.created_at DESC, t.id DESC \
             LIMIT $4",
            THREAD_SELECT
        );
        let rows = sqlx::query(&sql)
            .bind(Some(viewer_id))
            .bind(cursor_at)
            .bind(cursor_id)
            .bind(limit)
            .fetch_all(self.db.pool())
            .await?;

        rows.iter().map(thread_from_row).collect()
    }

    pub async fn update_thread(
        &self,
        thread_id: Uuid,
        title: Option<String>,
        content: Option<String>,
        category: Option<String>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE threads \
             SET title = COALESCE($2, title), \
                 content = COALESCE($3, content), \
                 category = COALESCE($4, category), \
                 updated_at = now() \
             WHERE id = $1",
        )
        .bind(thread_id)
        .bind(title)
        .bind(content)
        .bind(category)
        .execute(self.db.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Moves a pending thread to `status`. Returns false if it was no longer
    /// pending.
    pub async fn set_status(
        &self,
        thread_id: Uuid,
        moderator_id: Uuid,
        status: ThreadStatus,
        rejection_reason: Option<String>,
    ) -> Result<bool> {
        let mut tx = self.db.pool().begin().await?;
        let result = sqlx::query(
            "UPDATE threads \
             SET status = $2::thread_status, moderated_by = $3, moderated_at = now(), \
                 rejection_reason = $4, updated_at = now() \
             WHERE id = $1 AND status = 'pending' AND is_active",
        )
        .bind(thread_id)
        .bind(status.as_db())
        .bind(moderator_id)
        .bind(rejection_reason.as_deref())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        let kind = match status {
            ThreadStatus::Approved => ModerationKind::Approve,
            _ => ModerationKind::Reject,
        };
        let entry = AuditEntry::new(moderator_id, "thread", thread_id, kind).with_reason(rejection_reason);
        ModerationService::record_with_tx(&mut tx, &entry).await?;
        tx.commit().await?;
        Ok(true)
    }

    pub async fn like(&self, thread_id: Uuid, user_id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO thread_likes (thread_id, user_id) VALUES ($1, $2) \
             ON CONFLICT DO NOTHING",
        )
        .bind(thread_id)
        .bind(user_id)
        .execute(self.db.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn unlike(&self, thread_id: Uuid, user_id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM thread_likes WHERE thread_id = $1 AND user_id = $2")
            .bind(thread_id)
            .bind(user_id)
            .execute(self.db.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

fn split_cursor(cursor: Option<(OffsetDateTime, Uuid)>) -> (Option<OffsetDateTime>, Option<Uuid>) {
    match cursor {
        Some((created_at, id)) => (Some(created_at), Some(id)),
        None => (None, None),
    }
}
