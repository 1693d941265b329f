//! Access Control Tests
//!
//! Content visibility and the edit/delete/restore/moderate rules, evaluated
//! directly against the pure permission function.

use agora::domain::access::{
    evaluate, Action, Actor, ContentTarget, Decision, DenialKind, ParentThread, Target,
    UserTarget,
};
use agora::domain::role::Role;
use agora::domain::thread::ThreadStatus;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn member(role: Role) -> Actor {
    Actor::member(Uuid::new_v4(), role)
}

fn content(owner_id: Uuid) -> ContentTarget {
    ContentTarget {
        owner_id,
        is_active: true,
        owner_active: true,
        status: ThreadStatus::Approved,
        thread: None,
    }
}

fn comment_in(thread: ParentThread, owner_id: Uuid) -> Target {
    Target::Comment(ContentTarget {
        thread: Some(thread),
        ..content(owner_id)
    })
}

fn live_thread(owner_id: Uuid) -> ParentThread {
    ParentThread {
        owner_id,
        is_active: true,
        owner_active: true,
    }
}

fn denial_kind(decision: Decision) -> Option<DenialKind> {
    match decision {
        Decision::Permit => None,
        Decision::Deny(denial) => Some(denial.kind),
    }
}

fn assert_permit(actor: &Actor, action: Action, target: &Target) {
    let decision = evaluate(actor, action, target);
    assert!(decision.is_permit(), "expected permit, got {:?}", decision);
}

fn assert_denied(actor: &Actor, action: Action, target: &Target, kind: DenialKind) {
    let decision = evaluate(actor, action, target);
    assert_eq!(denial_kind(decision), Some(kind), "decision was {:?}", decision);
}

// ===========================================================================
// Roles
// ===========================================================================

#[test]
fn roles_are_totally_ordered() {
    assert!(Role::User < Role::AdminLevel1);
    assert!(Role::AdminLevel1 < Role::AdminLevel2);
    assert!(!Role::User.is_admin());
    assert!(Role::AdminLevel1.is_admin());
    assert!(Role::AdminLevel2.is_admin());
    assert!(Role::AdminLevel2.is_top_tier());
    assert!(!Role::AdminLevel1.is_top_tier());
}

#[test]
fn roles_round_trip_through_their_storage_names() {
    for role in [Role::User, Role::AdminLevel1, Role::AdminLevel2] {
        assert_eq!(Role::from_db(role.as_db()), Some(role));
    }
    assert_eq!(Role::from_db("superuser"), None);
}

// ===========================================================================
// Visibility
// ===========================================================================

#[test]
fn approved_thread_is_visible_to_everyone() {
    let target = Target::Thread(content(Uuid::new_v4()));
    assert_permit(&Actor::Anonymous, Action::Read, &target);
    assert_permit(&member(Role::User), Action::Read, &target);
    assert_permit(&member(Role::AdminLevel1), Action::Read, &target);
}

#[test]
fn deleted_thread_is_not_found_except_for_admins_and_its_author() {
    let owner = Uuid::new_v4();
    let target = Target::Thread(ContentTarget {
        is_active: false,
        ..content(owner)
    });

    assert_denied(&Actor::Anonymous, Action::Read, &target, DenialKind::NotFound);
    assert_denied(&member(Role::User), Action::Read, &target, DenialKind::NotFound);
    assert_permit(&Actor::member(owner, Role::User), Action::Read, &target);
    assert_permit(&member(Role::AdminLevel1), Action::Read, &target);
    assert_permit(&member(Role::AdminLevel2), Action::Read, &target);
}

#[test]
fn banned_authors_content_is_hidden_from_non_admins() {
    let target = Target::Comment(ContentTarget {
        owner_active: false,
        ..content(Uuid::new_v4())
    });

    assert_denied(&Actor::Anonymous, Action::Read, &target, DenialKind::NotFound);
    assert_denied(&member(Role::User), Action::Read, &target, DenialKind::NotFound);
    assert_permit(&member(Role::AdminLevel1), Action::Read, &target);
}

#[test]
fn author_still_reads_own_deleted_comment() {
    let owner = Uuid::new_v4();
    let target = Target::Comment(ContentTarget {
        is_active: false,
        thread: Some(live_thread(Uuid::new_v4())),
        ..content(owner)
    });

    assert_permit(&Actor::member(owner, Role::User), Action::Read, &target);
    assert_denied(&member(Role::User), Action::Read, &target, DenialKind::NotFound);
    // Reading it back does not make it likeable.
    assert_denied(
        &Actor::member(owner, Role::User),
        Action::Like,
        &target,
        DenialKind::Forbidden,
    );
}

#[test]
fn comments_of_a_deleted_thread_are_out_of_reach() {
    let thread_owner = Uuid::new_v4();
    let commenter = Uuid::new_v4();
    let target = comment_in(
        ParentThread {
            is_active: false,
            ..live_thread(thread_owner)
        },
        commenter,
    );

    assert_denied(&member(Role::User), Action::Read, &target, DenialKind::NotFound);
    assert_denied(&member(Role::User), Action::Like, &target, DenialKind::NotFound);
    assert_denied(
        &Actor::member(commenter, Role::User),
        Action::Edit,
        &target,
        DenialKind::NotFound,
    );
    assert_denied(
        &Actor::member(commenter, Role::User),
        Action::Delete,
        &target,
        DenialKind::NotFound,
    );
    // The thread's author still sees the discussion but cannot like into it.
    assert_permit(&Actor::member(thread_owner, Role::User), Action::Read, &target);
    assert_denied(
        &Actor::member(thread_owner, Role::User),
        Action::Like,
        &target,
        DenialKind::Forbidden,
    );
    assert_permit(&member(Role::AdminLevel1), Action::Read, &target);
    assert_permit(&member(Role::AdminLevel1), Action::Edit, &target);
}

#[test]
fn comments_of_a_banned_authors_thread_are_out_of_reach() {
    let commenter = Uuid::new_v4();
    let target = comment_in(
        ParentThread {
            owner_active: false,
            ..live_thread(Uuid::new_v4())
        },
        commenter,
    );

    assert_denied(&Actor::Anonymous, Action::Read, &target, DenialKind::NotFound);
    assert_denied(&member(Role::User), Action::Like, &target, DenialKind::NotFound);
    assert_denied(
        &Actor::member(commenter, Role::User),
        Action::Edit,
        &target,
        DenialKind::NotFound,
    );
    assert_permit(&member(Role::AdminLevel2), Action::Delete, &target);
}

#[test]
fn pending_thread_is_visible_to_its_author_and_admins_only() {
    let owner = Uuid::new_v4();
    let target = Target::Thread(ContentTarget {
        status: ThreadStatus::Pending,
        ..content(owner)
    });

    assert_permit(&Actor::member(owner, Role::User), Action::Read, &target);
    assert_permit(&member(Role::AdminLevel1), Action::Read, &target);
    assert_denied(&member(Role::User), Action::Read, &target, DenialKind::NotFound);
    assert_denied(&Actor::Anonymous, Action::Read, &target, DenialKind::NotFound);
}

#[test]
fn banned_user_profile_is_not_found_for_non_admins() {
    let banned = UserTarget {
        id: Uuid::new_v4(),
        role: Role::User,
        is_active: false,
    };
    let target = Target::User(banned);

    assert_denied(&Actor::Anonymous, Action::Read, &target, DenialKind::NotFound);
    assert_denied(&member(Role::User), Action::Read, &target, DenialKind::NotFound);
    assert_permit(&member(Role::AdminLevel1), Action::Read, &target);
    assert_permit(&Actor::member(banned.id, Role::User), Action::Read, &target);
}

// ===========================================================================
// Commenting and liking
// ===========================================================================

#[test]
fn commenting_requires_an_approved_thread() {
    let owner = Uuid::new_v4();
    let pending = Target::Thread(ContentTarget {
        status: ThreadStatus::Pending,
        ..content(owner)
    });
    let rejected = Target::Thread(ContentTarget {
        status: ThreadStatus::Rejected,
        ..content(owner)
    });

    // Even the author cannot comment before approval.
    assert_denied(
        &Actor::member(owner, Role::User),
        Action::Comment,
        &pending,
        DenialKind::Forbidden,
    );
    assert_denied(&member(Role::AdminLevel2), Action::Comment, &pending, DenialKind::Forbidden);
    assert_denied(&member(Role::User), Action::Comment, &rejected, DenialKind::Forbidden);

    let approved = Target::Thread(content(owner));
    assert_permit(&member(Role::User), Action::Comment, &approved);
    assert_denied(&Actor::Anonymous, Action::Comment, &approved, DenialKind::Unauthenticated);
}

#[test]
fn commenting_on_deleted_thread_hides_it_from_non_admins() {
    let target = Target::Thread(ContentTarget {
        is_active: false,
        ..content(Uuid::new_v4())
    });

    assert_denied(&member(Role::User), Action::Comment, &target, DenialKind::NotFound);
    assert_denied(&member(Role::AdminLevel1), Action::Comment, &target, DenialKind::Forbidden);
}

#[test]
fn likes_need_a_member_and_live_approved_content() {
    let approved = Target::Comment(content(Uuid::new_v4()));
    assert_permit(&member(Role::User), Action::Like, &approved);
    assert_denied(&Actor::Anonymous, Action::Like, &approved, DenialKind::Unauthenticated);

    let deleted = Target::Comment(ContentTarget {
        is_active: false,
        ..content(Uuid::new_v4())
    });
    assert_denied(&member(Role::User), Action::Like, &deleted, DenialKind::NotFound);
    assert_denied(&member(Role::AdminLevel2), Action::Like, &deleted, DenialKind::Forbidden);
}

// ===========================================================================
// Edit, delete, restore
// ===========================================================================

#[test]
fn owners_and_admins_may_edit() {
    let owner = Uuid::new_v4();
    let target = Target::Thread(content(owner));

    assert_permit(&Actor::member(owner, Role::User), Action::Edit, &target);
    assert_permit(&member(Role::AdminLevel1), Action::Edit, &target);
    assert_denied(&member(Role::User), Action::Edit, &target, DenialKind::Forbidden);
    assert_denied(&Actor::Anonymous, Action::Edit, &target, DenialKind::Unauthenticated);
}

#[test]
fn delete_is_for_the_owner_or_a_level_2_admin() {
    let owner = Uuid::new_v4();
    let target = Target::Comment(content(owner));

    assert_permit(&Actor::member(owner, Role::User), Action::Delete, &target);
    assert_permit(&member(Role::AdminLevel2), Action::Delete, &target);
    assert_denied(&member(Role::AdminLevel1), Action::Delete, &target, DenialKind::Forbidden);
    assert_denied(&member(Role::User), Action::Delete, &target, DenialKind::Forbidden);
}

#[test]
fn only_level_2_admins_restore() {
    let owner = Uuid::new_v4();
    let target = Target::Thread(ContentTarget {
        is_active: false,
        ..content(owner)
    });

    assert_permit(&member(Role::AdminLevel2), Action::Restore, &target);
    assert_denied(&member(Role::AdminLevel1), Action::Restore, &target, DenialKind::Forbidden);
    // The author sees the deleted thread but may not bring it back.
    assert_denied(
        &Actor::member(owner, Role::User),
        Action::Restore,
        &target,
        DenialKind::Forbidden,
    );
    assert_denied(&member(Role::User), Action::Restore, &target, DenialKind::NotFound);
}

#[test]
fn approval_needs_an_admin_and_a_pending_thread() {
    let pending = Target::Thread(ContentTarget {
        status: ThreadStatus::Pending,
        ..content(Uuid::new_v4())
    });
    assert_permit(&member(Role::AdminLevel1), Action::Approve, &pending);
    assert_permit(&member(Role::AdminLevel2), Action::Reject, &pending);
    assert_denied(&member(Role::User), Action::Approve, &pending, DenialKind::Forbidden);

    let approved = Target::Thread(content(Uuid::new_v4()));
    assert_denied(&member(Role::AdminLevel1), Action::Approve, &approved, DenialKind::Forbidden);

    let comment = Target::Comment(content(Uuid::new_v4()));
    assert_denied(&member(Role::AdminLevel2), Action::Approve, &comment, DenialKind::Forbidden);
}

// ===========================================================================
// Site actions
// ===========================================================================

#[test]
fn site_actions_follow_role_tiers() {
    assert_permit(&Actor::Anonymous, Action::Read, &Target::Site);

    assert_permit(&member(Role::AdminLevel1), Action::Moderate, &Target::Site);
    assert_denied(&member(Role::User), Action::Moderate, &Target::Site, DenialKind::Forbidden);
    assert_denied(&Actor::Anonymous, Action::Moderate, &Target::Site, DenialKind::Unauthenticated);

    assert_permit(&member(Role::AdminLevel2), Action::CreateAdmin, &Target::Site);
    assert_denied(&member(Role::AdminLevel1), Action::CreateAdmin, &Target::Site, DenialKind::Forbidden);
}

#[test]
fn users_may_only_edit_themselves() {
    let me = Uuid::new_v4();
    let target = Target::User(UserTarget {
        id: me,
        role: Role::User,
        is_active: true,
    });

    assert_permit(&Actor::member(me, Role::User), Action::Edit, &target);
    assert_denied(&member(Role::AdminLevel2), Action::Edit, &target, DenialKind::Forbidden);
}

#[test]
fn role_changes_belong_to_level_2_admins() {
    let l2 = member(Role::AdminLevel2);
    let user = Target::User(UserTarget {
        id: Uuid::new_v4(),
        role: Role::User,
        is_active: true,
    });
    let other_l2 = Target::User(UserTarget {
        id: Uuid::new_v4(),
        role: Role::AdminLevel2,
        is_active: true,
    });
    let own = Target::User(UserTarget {
        id: l2.id().unwrap(),
        role: Role::AdminLevel2,
        is_active: true,
    });

    assert_permit(&l2, Action::ChangeRole, &user);
    assert_denied(&l2, Action::ChangeRole, &other_l2, DenialKind::Forbidden);
    assert_denied(&l2, Action::ChangeRole, &own, DenialKind::Forbidden);
    assert_denied(&member(Role::AdminLevel1), Action::ChangeRole, &user, DenialKind::Forbidden);
}
