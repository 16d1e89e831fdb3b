use axum::http::Method;
use uuid::Uuid;

use crate::{auth::AuthUser, models::Role};

/// Pure authorization predicates over `(actor, action, resource)`.
///
/// These functions are the single authorization checkpoint: every mutating
/// handler evaluates one of them before touching the repository, and none of
/// them has side effects. Read operations are always open — the catalog is
/// publicly browsable — while writes escalate by role, with a carve-out
/// letting authors act on their own content regardless of role.
///
/// An `actor` of `None` means the request is anonymous.

/// Read-only methods never require authorization.
pub fn is_read_only(method: &Method) -> bool {
    matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}

/// True iff the actor is an admin by role, or carries the platform-elevated
/// (staff/superuser) flag. The two authority sources are deliberately kept
/// separate and checked as a pair.
pub fn is_admin(actor: &AuthUser) -> bool {
    actor.role == Role::Admin || actor.elevated
}

/// True for read-only methods unconditionally; mutating methods require an
/// authenticated admin.
pub fn is_admin_or_read_only(actor: Option<&AuthUser>, method: &Method) -> bool {
    is_read_only(method) || actor.is_some_and(is_admin)
}

/// True for read-only methods unconditionally; mutating methods require the
/// actor to be authenticated and either the resource's author, a moderator,
/// an admin, or platform-elevated.
pub fn is_author_or_moderator_or_admin_or_read_only(
    actor: Option<&AuthUser>,
    method: &Method,
    author_id: Uuid,
) -> bool {
    is_read_only(method)
        || actor.is_some_and(|actor| {
            actor.id == author_id
                || actor.role == Role::Moderator
                || actor.role == Role::Admin
                || actor.elevated
        })
}

/// Identity equality against a resource's owner field. Resource-type
/// agnostic: callers pass whichever id denotes ownership.
pub fn is_owner(actor: &AuthUser, owner_id: Uuid) -> bool {
    actor.id == owner_id
}
