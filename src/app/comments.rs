use anyhow::{anyhow, Result};
use sqlx::postgres::PgRow;
use sqlx::Row;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::app::attachments::{AttachmentParent, AttachmentService, StoredObject};
use crate::app::users::{lift_lapsed_bans, AuthorScope};
use crate::domain::comment::Comment;
use crate::domain::role::Role;
use crate::domain::user::AuthorSummary;
use crate::infra::db::Db;

const COMMENT_SELECT: &str = "SELECT c.id, c.thread_id, c.author_id, u.username AS author_username, \
            u.display_name AS author_display_name, u.role::text AS author_role, \
            u.is_active AS author_active, c.parent_comment_id, c.content, c.is_active, \
            COALESCE( \
                (SELECT array_agg(l.user_id ORDER BY l.created_at) \
                 FROM comment_likes l WHERE l.comment_id = c.id), \
                '{}'::uuid[]) AS likes, \
            c.created_at, c.updated_at \
     FROM comments c \
     JOIN users u ON u.id = c.author_id";

#[derive(Clone)]
pub struct CommentService {
    db: Db,
}

fn comment_from_row(row: &PgRow) -> Result<Comment> {
    let role: String = row.try_get("author_role")?;
    let role = Role::from_db(&role).ok_or_else(|| anyhow!("unknown user role: {}", role))?;

    Ok(Comment {
        id: row.try_get("id")?,
        thread_id: row.try_get("thread_id")?,
        author: AuthorSummary {
            id: row.try_get("author_id")?,
            username: row.try_get("author_username")?,
            display_name: row.try_get("author_display_name")?,
            role,
        },
        author_active: row.try_get("author_active")?,
        parent_comment_id: row.try_get("parent_comment_id")?,
        content: row.try_get("content")?,
        likes: row.try_get("likes")?,
        attachments: Vec::new(),
        is_active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

impl CommentService {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub async fn create_comment(
        &self,
        thread_id: Uuid,
        author_id: Uuid,
        parent_comment_id: Option<Uuid>,
        content: &str,
        objects: &[StoredObject],
    ) -> Result<Comment> {
        let mut tx = self.db.pool().begin().await?;
        let comment_id: Uuid = sqlx::query_scalar(
            "INSERT INTO comments (thread_id, author_id, parent_comment_id, content) \
             VALUES ($1, $2, $3, $4) \
             RETURNING id",
        )
        .bind(thread_id)
        .bind(author_id)
        .bind(parent_comment_id)
        .bind(content)
        .fetch_one(&mut *tx)
        .await?;

        let attachments = AttachmentService::insert_with_tx(
            &mut tx,
            author_id,
            AttachmentParent::Comment(comment_id),
            objects,
        )
        .await?;

        let sql = format!("{} WHERE c.id = $1", COMMENT_SELECT);
        let row = sqlx::query(&sql)
            .bind(comment_id)
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;

        let mut comment = comment_from_row(&row)?;
        comment.attachments = attachments;
        Ok(comment)
    }

    /// Loads a comment in any state.
    pub async fn get_comment(&self, comment_id: Uuid) -> Result<Option<Comment>> {
        lift_lapsed_bans(&self.db, AuthorScope::Comment(comment_id), OffsetDateTime::now_utc()).await?;
        let sql = format!("{} WHERE c.id = $1", COMMENT_SELECT);
        let row = sqlx::query(&sql)
            .bind(comment_id)
            .fetch_optional(self.db.pool())
            .await?;
        row.as_ref().map(comment_from_row).transpose()
    }

    /// Flat comment list of a thread in creation order. Without
    /// `include_inactive`, soft-deleted comments and comments of banned
    /// authors are left out.
    pub async fn list_for_thread(&self, thread_id: Uuid, include_inactive: bool) -> Result<Vec<Comment>> {
        lift_lapsed_bans(&self.db, AuthorScope::Discussion(thread_id), OffsetDateTime::now_utc()).await?;
        let sql = format!(
            "{} \
             WHERE c.thread_id = $1 AND ($2 OR (c.is_active AND u.is_active)) \
             ORDER BY c.created_at ASC, c.id ASC",
            COMMENT_SELECT
        );
        let rows = sqlx::query(&sql)
            .bind(thread_id)
            .bind(include_inactive)
            .fetch_all(self.db.pool())
            .await?;

        rows.iter().map(comment_from_row).collect()
    }

    pub async fn update_content(&self, comment_id: Uuid, content: &str) -> Result<Option<Comment>> {
        let result = sqlx::query(
            "UPDATE comments SET content = $2, updated_at = now() WHERE id = $1",
        )
        .bind(comment_id)
        .bind(content)
        .execute(self.db.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get_comment(comment_id).await
    }

    pub async fn like(&self, comment_id: Uuid, user_id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO comment_likes (comment_id, user_id) VALUES ($1, $2) \
             ON CONFLICT DO NOTHING",
        )
        .bind(comment_id)
        .bind(user_id)
        .execute(self.db.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn unlike(&self, comment_id: Uuid, user_id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM comment_likes WHERE comment_id = $1 AND user_id = $2")
            .bind(comment_id)
            .bind(user_id)
            .execute(self.db.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
