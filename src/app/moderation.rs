use anyhow::Result;
use sqlx::{Postgres, Row, Transaction};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::moderation::{Moderatable, ModerationAction, ModerationKind};
use crate::infra::db::Db;

/// One audit log entry, written alongside the change it describes.
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub actor_id: Uuid,
    pub target_type: &'static str,
    pub target_id: Uuid,
    pub kind: ModerationKind,
    pub reason: Option<String>,
}

impl AuditEntry {
    pub fn new(actor_id: Uuid, target_type: &'static str, target_id: Uuid, kind: ModerationKind) -> Self {
        Self {
            actor_id,
            target_type,
            target_id,
            kind,
            reason: None,
        }
    }

    pub fn with_reason(mut self, reason: Option<String>) -> Self {
        self.reason = reason;
        self
    }
}

#[derive(Clone)]
pub struct ModerationService {
    db: Db,
}

impl ModerationService {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Appends `entry` to the audit log inside the caller's transaction, so
    /// the entry commits or rolls back with the change it records.
    pub async fn record_with_tx(tx: &mut Transaction<'_, Postgres>, entry: &AuditEntry) -> Result<()> {
        sqlx::query(
            "INSERT INTO moderation_actions (actor_id, target_type, target_id, action, reason) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(entry.actor_id)
        .bind(entry.target_type)
        .bind(entry.target_id)
        .bind(entry.kind.as_db())
        .bind(entry.reason.as_deref())
        .execute(&mut **tx)
        .await?;

        tracing::info!(
            actor_id = %entry.actor_id,
            target_type = entry.target_type,
            target_id = %entry.target_id,
            action = entry.kind.as_db(),
            "moderation action recorded"
        );
        Ok(())
    }

    /// Soft-deletes `item` and records who did it.
    pub async fn soft_delete<T: Moderatable>(&self, actor_id: Uuid, item: &mut T) -> Result<bool> {
        let changed = self.persist_active(actor_id, item, false).await?;
        if changed {
            item.soft_delete();
        }
        Ok(changed)
    }

    /// Reactivates a soft-deleted `item` and records who did it.
    pub async fn restore<T: Moderatable>(&self, actor_id: Uuid, item: &mut T) -> Result<bool> {
        let changed = self.persist_active(actor_id, item, true).await?;
        if changed {
            item.restore();
        }
        Ok(changed)
    }

    async fn persist_active<T: Moderatable>(
        &self,
        actor_id: Uuid,
        item: &T,
        active: bool,
    ) -> Result<bool> {
        let kind = if active {
            ModerationKind::Restore
        } else {
            ModerationKind::Delete
        };

        let mut tx = self.db.pool().begin().await?;
        let sql = format!(
            "UPDATE {} SET is_active = $2, updated_at = now() WHERE id = $1",
            T::TABLE
        );
        let result = sqlx::query(&sql)
            .bind(item.id())
            .bind(active)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        let entry = AuditEntry::new(actor_id, T::TARGET_TYPE, item.id(), kind);
        Self::record_with_tx(&mut tx, &entry).await?;
        tx.commit().await?;
        Ok(true)
    }

    pub async fn list_audit(
        &self,
        cursor: Option<(OffsetDateTime, Uuid)>,
        limit: i64,
    ) -> Result<Vec<ModerationAction>> {
        let rows = match cursor {
            Some((created_at, action_id)) => {
                sqlx::query(
                    "SELECT id, actor_id, target_type, target_id, action, reason, created_at \
                     FROM moderation_actions \
                     WHERE (created_at < $1 OR (created_at = $1 AND id < $2)) \
                     ORDER BY created_at DESC, id DESC \
                     LIMIT $3",
                )
                .bind(created_at)
                .bind(action_id)
                .bind(limit)
                .fetch_all(self.db.pool())
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT id, actor_id, target_type, target_id, action, reason, created_at \
                     FROM moderation_actions \
                     ORDER BY created_at DESC, id DESC \
                     LIMIT $1",
                )
                .bind(limit)
                .fetch_all(self.db.pool())
                .await?
            }
        };

        let mut actions = Vec::with_capacity(rows.len());
        for row in rows {
            actions.push(ModerationAction {
                id: row.try_get("id")?,
                actor_id: row.try_get("actor_id")?,
                target_type: row.try_get("target_type")?,
                target_id: row.try_get("target_id")?,
                action: row.try_get("action")?,
                reason: row.try_get("reason")?,
                created_at: row.try_get("created_at")?,
            });
        }

        Ok(actions)
    }
}
