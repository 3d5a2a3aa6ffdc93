/// Authorization Policy
///
/// Pure decision functions over (principal, resource discipline, action),
/// consulted by every resource handler instead of ad-hoc per-handler role
/// checks. Role is the ceiling; discipline membership further restricts
/// every role except ADMIN. Listing endpoints apply the policy as a query
/// filter through `discipline_scope`; single-resource endpoints apply it
/// as a binary gate through the `ensure_*` helpers.

use uuid::Uuid;

use crate::auth::{Principal, Role};
use crate::error::{AppError, ForbiddenError};

/// True when the principal may touch resources of the given discipline
pub fn has_discipline_access(principal: &Principal, discipline_id: i64) -> bool {
    if principal.role == Role::Admin {
        return true;
    }
    principal.disciplines.iter().any(|d| d.id == discipline_id)
}

/// The discipline-id filter a listing query must apply for this principal.
/// `None` means unrestricted (ADMIN); an empty Vec means the principal can
/// see nothing and the query must return an empty set, never leak.
pub fn discipline_scope(principal: &Principal) -> Option<Vec<i64>> {
    if principal.role == Role::Admin {
        None
    } else {
        Some(principal.discipline_ids())
    }
}

/// Approval is open to REVIEWER, EDITOR and ADMIN
pub fn can_approve(role: Role) -> bool {
    matches!(role, Role::Reviewer | Role::Editor | Role::Admin)
}

/// Deletion is open to EDITOR, REVIEWER and ADMIN
pub fn can_delete_questions(role: Role) -> bool {
    matches!(role, Role::Editor | Role::Reviewer | Role::Admin)
}

/// User management (listing, registration, activation, password resets)
/// is ADMIN only
pub fn can_manage_users(role: Role) -> bool {
    role == Role::Admin
}

/// Self-deactivation is always denied, regardless of role
pub fn can_deactivate(principal: &Principal, target_uuid: Uuid) -> bool {
    can_manage_users(principal.role) && principal.uuid != target_uuid
}

/// Gate: ADMIN-only action, 403 otherwise
pub fn ensure_admin(principal: &Principal, action: &str) -> Result<(), AppError> {
    if can_manage_users(principal.role) {
        Ok(())
    } else {
        Err(AppError::Forbidden(ForbiddenError::AdminOnly(
            action.to_string(),
        )))
    }
}

/// Gate: resource in a discipline the principal may act on, 403 otherwise
pub fn ensure_discipline_access(
    principal: &Principal,
    discipline_id: i64,
) -> Result<(), AppError> {
    if has_discipline_access(principal, discipline_id) {
        Ok(())
    } else {
        Err(AppError::Forbidden(ForbiddenError::DisciplineAccess))
    }
}

/// Gate: role floor for approving questions
pub fn ensure_can_approve(principal: &Principal) -> Result<(), AppError> {
    if can_approve(principal.role) {
        Ok(())
    } else {
        Err(AppError::Forbidden(ForbiddenError::InsufficientRole(
            "approve questions".to_string(),
        )))
    }
}

/// Gate: role floor for deleting questions
pub fn ensure_can_delete(principal: &Principal) -> Result<(), AppError> {
    if can_delete_questions(principal.role) {
        Ok(())
    } else {
        Err(AppError::Forbidden(ForbiddenError::InsufficientRole(
            "delete questions".to_string(),
        )))
    }
}

/// Gate: deactivation target, including the self-deactivation carve-out
pub fn ensure_can_deactivate(principal: &Principal, target_uuid: Uuid) -> Result<(), AppError> {
    ensure_admin(principal, "deactivate users")?;
    if principal.uuid == target_uuid {
        return Err(AppError::Forbidden(ForbiddenError::SelfDeactivation));
    }
    Ok(())
}
