use anyhow::{anyhow, Result};
use sqlx::postgres::PgRow;
use sqlx::Row;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::app::moderation::{AuditEntry, ModerationService};
use crate::domain::moderation::ModerationKind;
use crate::domain::role::Role;
use crate::domain::user::User;
use crate::infra::db::Db;

const USER_COLUMNS: &str = "id, username, email, display_name, bio, role::text AS role, \
     is_active, banned_until, ban_reason, banned_by, created_at";

const LIFT_LAPSED_BAN: &str = "UPDATE users \
     SET is_active = TRUE, banned_until = NULL, ban_reason = NULL, banned_by = NULL, \
         updated_at = now() \
     WHERE is_active = FALSE AND banned_until IS NOT NULL AND banned_until <= $1";

/// Which users a lapsed-ban sweep covers.
#[derive(Debug, Clone, Copy)]
pub(crate) enum AuthorScope {
    /// The author of one thread.
    Thread(Uuid),
    /// The author of one comment.
    Comment(Uuid),
    /// Everyone who wrote in one thread, the thread itself included.
    Discussion(Uuid),
    /// Authors of publicly listed threads.
    Listing,
}

/// Clears timed bans that have run out for the authors in `scope`, so the
/// reads that follow see them as active. Rows already reconciled are left
/// untouched.
pub(crate) async fn lift_lapsed_bans(db: &Db, scope: AuthorScope, now: OffsetDateTime) -> Result<()> {
    let (subquery, id) = match scope {
        AuthorScope::Thread(id) => ("SELECT author_id FROM threads WHERE id = $2", Some(id)),
        AuthorScope::Comment(id) => ("SELECT author_id FROM comments WHERE id = $2", Some(id)),
        AuthorScope::Discussion(id) => (
            "SELECT author_id FROM comments WHERE thread_id = $2 \
             UNION SELECT author_id FROM threads WHERE id = $2",
            Some(id),
        ),
        AuthorScope::Listing => (
            "SELECT author_id FROM threads WHERE status = 'approved' AND is_active",
            None,
        ),
    };

    let sql = format!("{} AND id IN ({}) RETURNING id", LIFT_LAPSED_BAN, subquery);
    let mut query = sqlx::query(&sql).bind(now);
    if let Some(id) = id {
        query = query.bind(id);
    }
    for row in query.fetch_all(db.pool()).await? {
        let user_id: Uuid = row.try_get("id")?;
        tracing::info!(user_id = %user_id, "timed ban expired, account reactivated");
    }
    Ok(())
}

#[derive(Clone)]
pub struct UserService {
    db: Db,
}

pub(crate) fn user_from_row(row: &PgRow) -> Result<User> {
    let role: String = row.try_get("role")?;
    let role = Role::from_db(&role).ok_or_else(|| anyhow!("unknown user role: {}", role))?;
    Ok(User {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        email: row.try_get("email")?,
        display_name: row.try_get("display_name")?,
        bio: row.try_get("bio")?,
        role,
        is_active: row.try_get("is_active")?,
        banned_until: row.try_get("banned_until")?,
        ban_reason: row.try_get("ban_reason")?,
        banned_by: row.try_get("banned_by")?,
        created_at: row.try_get("created_at")?,
    })
}

impl UserService {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Loads a user exactly as stored, without ban reconciliation.
    pub async fn get_user(&self, user_id: Uuid) -> Result<Option<User>> {
        let sql = format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(user_id)
            .fetch_optional(self.db.pool())
            .await?;

        row.as_ref().map(user_from_row).transpose()
    }

    /// Loads a user and clears a lapsed timed ban before returning it.
    pub async fn get_user_reconciled(&self, user_id: Uuid) -> Result<Option<User>> {
        match self.get_user(user_id).await? {
            Some(user) => Ok(Some(self.reconcile(user, OffsetDateTime::now_utc()).await?)),
            None => Ok(None),
        }
    }

    /// Persists the lapse of a timed ban if `user` carries one. The update is
    /// conditional on the stored row still holding the expired ban, so
    /// concurrent readers write it once.
    pub async fn reconcile(&self, user: User, now: OffsetDateTime) -> Result<User> {
        if !user.ban_has_lapsed(now) {
            return Ok(user);
        }

        let sql = format!("{} AND id = $2", LIFT_LAPSED_BAN);
        let result = sqlx::query(&sql)
            .bind(now)
            .bind(user.id)
            .execute(self.db.pool())
            .await?;

        if result.rows_affected() > 0 {
            tracing::info!(user_id = %user.id, "timed ban expired, account reactivated");
        }

        Ok(user.reconcile_ban_expiry(now))
    }

    /// Looks up a login identifier (email or username) and returns the user
    /// with its password hash.
    pub async fn find_for_login(&self, identifier: &str) -> Result<Option<(User, String)>> {
        let sql = format!(
            "SELECT {}, password_hash FROM users WHERE email = lower($1) OR username = $1",
            USER_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(identifier)
            .fetch_optional(self.db.pool())
            .await?;

        match row {
            Some(row) => {
                let user = user_from_row(&row)?;
                let password_hash: String = row.try_get("password_hash")?;
                Ok(Some((user, password_hash)))
            }
            None => Ok(None),
        }
    }

    /// Inserts an account. `created_by` is the administrator creating it on
    /// someone's behalf; that creation is audited.
    pub async fn create_user(
        &self,
        username: &str,
        email: &str,
        display_name: &str,
        password_hash: &str,
        role: Role,
        created_by: Option<Uuid>,
    ) -> Result<User> {
        let mut tx = self.db.pool().begin().await?;
        let sql = format!(
            "INSERT INTO users (username, email, display_name, password_hash, role) \
             VALUES ($1, $2, $3, $4, $5::user_role) \
             RETURNING {}",
            USER_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(username)
            .bind(email)
            .bind(display_name)
            .bind(password_hash)
            .bind(role.as_db())
            .fetch_one(&mut *tx)
            .await?;
        let user = user_from_row(&row)?;

        if let Some(actor_id) = created_by {
            let entry = AuditEntry::new(actor_id, "user", user.id, ModerationKind::CreateAdmin)
                .with_reason(Some(role.to_string()));
            ModerationService::record_with_tx(&mut tx, &entry).await?;
        }
        tx.commit().await?;
        Ok(user)
    }

    pub async fn update_profile(
        &self,
        user_id: Uuid,
        display_name: Option<String>,
        bio: Option<String>,
    ) -> Result<Option<User>> {
        let sql = format!(
            "UPDATE users \
             SET display_name = COALESCE($2, display_name), \
                 bio = COALESCE($3, bio), \
                 updated_at = now() \
             WHERE id = $1 \
             RETURNING {}",
            USER_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(user_id)
            .bind(display_name)
            .bind(bio)
            .fetch_optional(self.db.pool())
            .await?;

        row.as_ref().map(user_from_row).transpose()
    }

    /// Bans the account and audits it in one transaction.
    pub async fn ban(
        &self,
        user_id: Uuid,
        banned_until: Option<OffsetDateTime>,
        reason: Option<String>,
        banned_by: Uuid,
    ) -> Result<Option<User>> {
        let mut tx = self.db.pool().begin().await?;
        let sql = format!(
            "UPDATE users \
             SET is_active = FALSE, banned_until = $2, ban_reason = $3, banned_by = $4, \
                 updated_at = now() \
             WHERE id = $1 \
             RETURNING {}",
            USER_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(user_id)
            .bind(banned_until)
            .bind(reason.as_deref())
            .bind(banned_by)
            .fetch_optional(&mut *tx)
            .await?;
        let user = match row {
            Some(row) => user_from_row(&row)?,
            None => return Ok(None),
        };

        let entry = AuditEntry::new(banned_by, "user", user_id, ModerationKind::Ban).with_reason(reason);
        ModerationService::record_with_tx(&mut tx, &entry).await?;
        tx.commit().await?;
        Ok(Some(user))
    }

    /// Reactivates the account and clears any ban expiry, timed or not.
    pub async fn unban(&self, user_id: Uuid, actor_id: Uuid) -> Result<Option<User>> {
        let mut tx = self.db.pool().begin().await?;
        let sql = format!(
            "UPDATE users \
             SET is_active = TRUE, banned_until = NULL, ban_reason = NULL, banned_by = NULL, \
                 updated_at = now() \
             WHERE id = $1 \
             RETURNING {}",
            USER_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await?;
        let user = match row {
            Some(row) => user_from_row(&row)?,
            None => return Ok(None),
        };

        let entry = AuditEntry::new(actor_id, "user", user_id, ModerationKind::Unban);
        ModerationService::record_with_tx(&mut tx, &entry).await?;
        tx.commit().await?;
        Ok(Some(user))
    }

    /// Moves the account from `from` to `to`, audited as `"<from> -> <to>"`.
    pub async fn change_role(&self, user_id: Uuid, from: Role, to: Role, actor_id: Uuid) -> Result<Option<User>> {
        let mut tx = self.db.pool().begin().await?;
        let sql = format!(
            "UPDATE users SET role = $2::user_role, updated_at = now() \
             WHERE id = $1 \
             RETURNING {}",
            USER_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(user_id)
            .bind(to.as_db())
            .fetch_optional(&mut *tx)
            .await?;
        let user = match row {
            Some(row) => user_from_row(&row)?,
            None => return Ok(None),
        };

        let entry = AuditEntry::new(actor_id, "user", user_id, ModerationKind::ChangeRole)
            .with_reason(Some(format!("{} -> {}", from, to)));
        ModerationService::record_with_tx(&mut tx, &entry).await?;
        tx.commit().await?;
        Ok(Some(user))
    }

    /// Admin listing, newest first. `banned` filters on the active flag.
    pub async fn list_users(
        &self,
        banned: Option<bool>,
        cursor: Option<(OffsetDateTime, Uuid)>,
        limit: i64,
    ) -> Result<Vec<User>> {
        let (cursor_at, cursor_id) = match cursor {
            Some((created_at, id)) => (Some(created_at), Some(id)),
            None => (None, None),
        };
        let sql = format!(
            "SELECT {} FROM users \
             WHERE ($1::boolean IS NULL OR is_active = NOT $1) \
               AND ($2::timestamptz IS NULL OR created_at < $2 OR (created_at = $2 AND id < $3)) \
             ORDER BY created_at DESC, id DESC \
             LIMIT $4",
            USER_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(banned)
            .bind(cursor_at)
            .bind(cursor_id)
            .bind(limit)
            .fetch_all(self.db.pool())
            .await?;

        rows.iter().map(user_from_row).collect()
    }
}
