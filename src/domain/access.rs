//! Permission rules for users, threads and comments.
//!
//! Everything here is a pure function of the actor, the requested action and
//! the current state of the target as loaded by the caller. Hidden content is
//! reported as [`DenialKind::NotFound`] so callers answer exactly as they
//! would for a missing record.

use uuid::Uuid;

use crate::domain::comment::Comment;
use crate::domain::role::Role;
use crate::domain::thread::{Thread, ThreadStatus};
use crate::domain::user::User;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    Anonymous,
    Member { id: Uuid, role: Role },
}

impl Actor {
    pub fn member(id: Uuid, role: Role) -> Self {
        Self::Member { id, role }
    }

    pub fn id(&self) -> Option<Uuid> {
        match self {
            Self::Anonymous => None,
            Self::Member { id, .. } => Some(*id),
        }
    }

    pub fn role(&self) -> Option<Role> {
        match self {
            Self::Anonymous => None,
            Self::Member { role, .. } => Some(*role),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Member { .. })
    }

    pub fn is_admin(&self) -> bool {
        self.role().map_or(false, |role| role.is_admin())
    }

    pub fn is_top_tier(&self) -> bool {
        self.role().map_or(false, |role| role.is_top_tier())
    }

    fn is(&self, id: Uuid) -> bool {
        self.id() == Some(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Read,
    Edit,
    Delete,
    Restore,
    Ban,
    Unban,
    Approve,
    Reject,
    ChangeRole,
    CreateAdmin,
    Comment,
    Like,
    /// Admin-only listings: moderation queue, audit log, user administration.
    Moderate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserTarget {
    pub id: Uuid,
    pub role: Role,
    pub is_active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentTarget {
    pub owner_id: Uuid,
    pub is_active: bool,
    /// False when the author is banned.
    pub owner_active: bool,
    /// Status of the thread itself, or of the thread a comment belongs to.
    pub status: ThreadStatus,
    /// The thread a comment belongs to. `None` for a thread.
    pub thread: Option<ParentThread>,
}

/// State of the thread around a comment. A comment is only reachable where
/// its thread is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParentThread {
    pub owner_id: Uuid,
    pub is_active: bool,
    pub owner_active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    User(UserTarget),
    Thread(ContentTarget),
    Comment(ContentTarget),
    /// The forum as a whole, for actions with no specific record.
    Site,
}

impl Target {
    pub fn user(user: &User) -> Self {
        Self::User(UserTarget {
            id: user.id,
            role: user.role,
            is_active: user.is_active,
        })
    }

    pub fn thread(thread: &Thread) -> Self {
        Self::Thread(ContentTarget {
            owner_id: thread.author.id,
            is_active: thread.is_active,
            owner_active: thread.author_active,
            status: thread.status,
            thread: None,
        })
    }

    pub fn comment(comment: &Comment, thread: &Thread) -> Self {
        Self::Comment(ContentTarget {
            owner_id: comment.author.id,
            is_active: comment.is_active,
            owner_active: comment.author_active,
            status: thread.status,
            thread: Some(ParentThread {
                owner_id: thread.author.id,
                is_active: thread.is_active,
                owner_active: thread.author_active,
            }),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenialKind {
    Unauthenticated,
    Forbidden,
    NotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Denial {
    pub kind: DenialKind,
    pub reason: &'static str,
}

impl Denial {
    fn unauthenticated() -> Self {
        Self {
            kind: DenialKind::Unauthenticated,
            reason: "authentication required",
        }
    }

    fn forbidden(reason: &'static str) -> Self {
        Self {
            kind: DenialKind::Forbidden,
            reason,
        }
    }

    fn not_found(reason: &'static str) -> Self {
        Self {
            kind: DenialKind::NotFound,
            reason,
        }
    }
}

impl std::fmt::Display for Denial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.reason)
    }
}

impl std::error::Error for Denial {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Permit,
    Deny(Denial),
}

impl Decision {
    pub fn is_permit(&self) -> bool {
        matches!(self, Self::Permit)
    }

    pub fn into_result(self) -> Result<(), Denial> {
        match self {
            Self::Permit => Ok(()),
            Self::Deny(denial) => Err(denial),
        }
    }
}

impl From<Result<(), Denial>> for Decision {
    fn from(result: Result<(), Denial>) -> Self {
        match result {
            Ok(()) => Self::Permit,
            Err(denial) => Self::Deny(denial),
        }
    }
}

pub fn evaluate(actor: &Actor, action: Action, target: &Target) -> Decision {
    let result = match target {
        Target::User(user) => evaluate_user(actor, action, user),
        Target::Thread(thread) => evaluate_content(actor, action, thread, ContentKind::Thread),
        Target::Comment(comment) => evaluate_content(actor, action, comment, ContentKind::Comment),
        Target::Site => evaluate_site(actor, action),
    };
    result.into()
}

fn require_member(actor: &Actor) -> Result<(Uuid, Role), Denial> {
    match actor {
        Actor::Anonymous => Err(Denial::unauthenticated()),
        Actor::Member { id, role } => Ok((*id, *role)),
    }
}

fn evaluate_user(actor: &Actor, action: Action, target: &UserTarget) -> Result<(), Denial> {
    const NOT_FOUND: &str = "user not found";

    if action == Action::Read {
        if actor.is(target.id) || target.is_active || actor.is_admin() {
            return Ok(());
        }
        return Err(Denial::not_found(NOT_FOUND));
    }

    let (actor_id, actor_role) = require_member(actor)?;
    match action {
        Action::Edit | Action::Delete => {
            if actor_id == target.id {
                Ok(())
            } else {
                Err(Denial::forbidden("cannot modify other users"))
            }
        }
        Action::Ban | Action::Unban => ban_rules(actor_id, actor_role, action, target),
        Action::ChangeRole => {
            if actor_role != Role::AdminLevel2 {
                return Err(Denial::forbidden(
                    "only level 2 administrators can change roles",
                ));
            }
            if actor_id == target.id {
                return Err(Denial::forbidden("cannot change your own role"));
            }
            if target.role.is_top_tier() {
                return Err(Denial::forbidden(
                    "level 2 administrators cannot be modified",
                ));
            }
            Ok(())
        }
        _ => Err(Denial::forbidden("action does not apply to users")),
    }
}

fn ban_rules(
    actor_id: Uuid,
    actor_role: Role,
    action: Action,
    target: &UserTarget,
) -> Result<(), Denial> {
    let banning = action == Action::Ban;

    if actor_id == target.id {
        return Err(Denial::forbidden(if banning {
            "cannot ban yourself"
        } else {
            "cannot unban yourself"
        }));
    }
    if target.role.is_top_tier() {
        return Err(Denial::forbidden(if banning {
            "level 2 administrators cannot be banned"
        } else {
            "level 2 administrators cannot be unbanned"
        }));
    }

    match actor_role {
        Role::User => Err(Denial::forbidden(if banning {
            "only administrators can ban users"
        } else {
            "only administrators can unban users"
        })),
        Role::AdminLevel1 if target.role != Role::User => Err(Denial::forbidden(if banning {
            "level 1 administrators can only ban regular users"
        } else {
            "level 1 administrators can only unban regular users"
        })),
        Role::AdminLevel1 | Role::AdminLevel2 => Ok(()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContentKind {
    Thread,
    Comment,
}

impl ContentKind {
    fn not_found(&self) -> Denial {
        match self {
            Self::Thread => Denial::not_found("thread not found"),
            Self::Comment => Denial::not_found("comment not found"),
        }
    }
}

/// Whether the actor may see the content at all. Authors always see their
/// own content; a comment is hidden along with its thread.
fn content_visible(actor: &Actor, target: &ContentTarget, kind: ContentKind) -> Result<(), Denial> {
    if actor.is_admin() {
        return Ok(());
    }
    let thread_owner = match target.thread {
        Some(thread) => {
            if !actor.is(thread.owner_id) && (!thread.is_active || !thread.owner_active) {
                return Err(Denial::not_found("thread not found"));
            }
            thread.owner_id
        }
        None => target.owner_id,
    };
    if actor.is(target.owner_id) {
        return Ok(());
    }
    if !target.is_active || !target.owner_active {
        return Err(kind.not_found());
    }
    if target.status != ThreadStatus::Approved && !actor.is(thread_owner) {
        return Err(match kind {
            ContentKind::Thread => kind.not_found(),
            ContentKind::Comment => Denial::not_found("thread not found"),
        });
    }
    Ok(())
}

fn thread_is_live(target: &ContentTarget) -> bool {
    target.thread.map_or(true, |thread| thread.is_active)
}

fn evaluate_content(
    actor: &Actor,
    action: Action,
    target: &ContentTarget,
    kind: ContentKind,
) -> Result<(), Denial> {
    if action == Action::Read {
        return content_visible(actor, target, kind);
    }

    let (actor_id, actor_role) = require_member(actor)?;
    let is_owner = actor_id == target.owner_id;

    match action {
        Action::Edit => {
            content_visible(actor, target, kind)?;
            if is_owner || actor_role.is_admin() {
                Ok(())
            } else {
                Err(Denial::forbidden(match kind {
                    ContentKind::Thread => "you can only edit your own threads",
                    ContentKind::Comment => "you can only edit your own comments",
                }))
            }
        }
        Action::Delete => {
            content_visible(actor, target, kind)?;
            if is_owner || actor_role == Role::AdminLevel2 {
                Ok(())
            } else {
                Err(Denial::forbidden(match kind {
                    ContentKind::Thread => {
                        "only the author or a level 2 administrator can delete this thread"
                    }
                    ContentKind::Comment => {
                        "only the author or a level 2 administrator can delete this comment"
                    }
                }))
            }
        }
        Action::Restore => {
            if actor_role == Role::AdminLevel2 {
                Ok(())
            } else if !actor_role.is_admin() && !is_owner && !target.is_active {
                Err(kind.not_found())
            } else {
                Err(Denial::forbidden(
                    "only level 2 administrators can restore content",
                ))
            }
        }
        Action::Approve | Action::Reject if kind == ContentKind::Thread => {
            if !actor_role.is_admin() {
                return Err(Denial::forbidden("only administrators can moderate threads"));
            }
            if !target.is_active {
                return Err(Denial::forbidden("thread has been deleted"));
            }
            if target.status != ThreadStatus::Pending {
                return Err(Denial::forbidden("thread is not pending moderation"));
            }
            Ok(())
        }
        Action::Comment if kind == ContentKind::Thread => {
            if !target.is_active {
                return Err(if actor_role.is_admin() {
                    Denial::forbidden("thread has been deleted")
                } else {
                    kind.not_found()
                });
            }
            if target.status != ThreadStatus::Approved {
                return Err(Denial::forbidden(
                    "comments are only allowed on approved threads",
                ));
            }
            content_visible(actor, target, kind)
        }
        Action::Like => {
            content_visible(actor, target, kind)?;
            if !target.is_active || !thread_is_live(target) {
                return Err(Denial::forbidden("deleted content cannot be liked"));
            }
            if target.status != ThreadStatus::Approved {
                return Err(Denial::forbidden("only approved threads can be liked"));
            }
            Ok(())
        }
        _ => Err(Denial::forbidden(match kind {
            ContentKind::Thread => "action does not apply to threads",
            ContentKind::Comment => "action does not apply to comments",
        })),
    }
}

fn evaluate_site(actor: &Actor, action: Action) -> Result<(), Denial> {
    if action == Action::Read {
        return Ok(());
    }

    let (_, actor_role) = require_member(actor)?;
    match action {
        Action::CreateAdmin if actor_role == Role::AdminLevel2 => Ok(()),
        Action::CreateAdmin => Err(Denial::forbidden(
            "only level 2 administrators can create admin accounts",
        )),
        Action::Moderate if actor_role.is_admin() => Ok(()),
        Action::Moderate => Err(Denial::forbidden("administrator access required")),
        _ => Err(Denial::forbidden("action requires a specific target")),
    }
}
