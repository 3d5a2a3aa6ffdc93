/// Principal resolution
///
/// The Principal is the authenticated identity attached to a request after
/// token verification. It is rebuilt per request from the users table, so
/// role changes and deactivation take effect on the next request even while
/// an already-issued token is still structurally valid.

use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::auth::role::Role;
use crate::error::{AppError, AuthError};

/// Discipline summary carried on a principal and in user-facing responses
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct DisciplineRef {
    pub id: i64,
    pub slug: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Principal {
    pub uuid: Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub disciplines: Vec<DisciplineRef>,
}

impl Principal {
    /// Discipline ids this principal is a member of
    pub fn discipline_ids(&self) -> Vec<i64> {
        self.disciplines.iter().map(|d| d.id).collect()
    }

    /// Membership discipline matching a slug, if any
    pub fn discipline_by_slug(&self, slug: &str) -> Option<&DisciplineRef> {
        self.disciplines.iter().find(|d| d.slug == slug)
    }
}

/// Load the current identity for a verified token subject
///
/// # Errors
/// Returns `Unauthorized` when the identity is missing or inactive, so a
/// deactivated account is rejected even holding a valid token.
pub async fn load_principal(pool: &PgPool, user_id: Uuid) -> Result<Principal, AppError> {
    let row = sqlx::query_as::<_, (Uuid, String, String, String, bool)>(
        "SELECT uuid, name, email, role, is_active FROM users WHERE uuid = $1",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    let (uuid, name, email, role, is_active) = match row {
        Some(row) => row,
        None => {
            tracing::warn!(user_id = %user_id, "Token subject no longer exists");
            return Err(AppError::Auth(AuthError::TokenInvalid));
        }
    };

    if !is_active {
        tracing::warn!(user_id = %user_id, "Request from deactivated account");
        return Err(AppError::Auth(AuthError::AccountInactive));
    }

    let role = Role::parse(&role)?;

    let disciplines = sqlx::query_as::<_, DisciplineRef>(
        r#"
        SELECT d.id, d.slug, d.name
        FROM user_disciplines ud
        JOIN disciplines d ON d.id = ud.discipline_id
        WHERE ud.user_uuid = $1
        ORDER BY d.name
        "#,
    )
    .bind(uuid)
    .fetch_all(pool)
    .await?;

    Ok(Principal {
        uuid,
        name,
        email,
        role,
        disciplines,
    })
}
