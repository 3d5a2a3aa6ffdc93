/// User Management Routes (ADMIN only)
///
/// Listing with search/role/active filters, plus activation toggling.
/// Accounts are never hard-deleted; deactivation flips the is_active flag
/// and takes effect on the target's next request.

use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::collections::HashMap;
use uuid::Uuid;

use crate::auth::{DisciplineRef, Principal, Role};
use crate::authz;
use crate::error::{AppError, DatabaseError, ErrorContext, ForbiddenError};
use crate::pagination::{PageMeta, Pagination};
use crate::validators::is_valid_search;

#[derive(Deserialize)]
pub struct UsersQuery {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
    pub search: Option<String>,
    pub role: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(sqlx::FromRow)]
struct UserRow {
    uuid: Uuid,
    name: String,
    email: String,
    role: String,
    is_active: bool,
    email_verified_at: Option<DateTime<Utc>>,
    last_login_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Serialize)]
pub struct UserListItem {
    pub uuid: String,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub is_active: bool,
    pub email_verified_at: Option<String>,
    pub last_login_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub disciplines: Vec<DisciplineRef>,
}

#[derive(Serialize)]
pub struct UsersListResponse {
    pub data: Vec<UserListItem>,
    pub meta: PageMeta,
}

#[derive(Serialize)]
pub struct UserStatusResponse {
    pub message: String,
    pub user_uuid: String,
    pub is_active: bool,
}

/// GET /users
///
/// Paginated user listing. Optional filters: case-insensitive search over
/// name and email, exact role, and active flag. Each row carries the
/// user's discipline memberships.
///
/// # Errors
/// - 400: Invalid role or search filter
/// - 401: Missing or invalid token
/// - 403: Acting principal is not ADMIN
pub async fn list_users(
    principal: web::ReqData<Principal>,
    query: web::Query<UsersQuery>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, AppError> {
    authz::ensure_admin(&principal, "list users")?;

    let pagination = Pagination::from_query(query.page, query.page_size);
    let search = match &query.search {
        Some(search) => Some(is_valid_search(search)?),
        None => None,
    };
    let role = match &query.role {
        Some(role) => Some(Role::parse(role).map_err(|_| {
            AppError::Validation(crate::error::ValidationError::InvalidFormat(
                "role".to_string(),
            ))
        })?),
        None => None,
    };

    let mut qb = QueryBuilder::<Postgres>::new(
        "SELECT uuid, name, email, role, is_active, email_verified_at, last_login_at, \
         created_at, updated_at FROM users WHERE 1=1",
    );
    push_user_filters(&mut qb, &search, role, query.is_active);
    qb.push(" ORDER BY created_at DESC LIMIT ")
        .push_bind(pagination.limit())
        .push(" OFFSET ")
        .push_bind(pagination.offset());

    let rows = qb.build_query_as::<UserRow>().fetch_all(pool.get_ref()).await?;

    let mut count_qb =
        QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM users WHERE 1=1");
    push_user_filters(&mut count_qb, &search, role, query.is_active);
    let (total,) = count_qb
        .build_query_as::<(i64,)>()
        .fetch_one(pool.get_ref())
        .await?;

    let user_ids: Vec<Uuid> = rows.iter().map(|r| r.uuid).collect();
    let mut memberships = fetch_memberships(pool.get_ref(), &user_ids).await?;

    let data = rows
        .into_iter()
        .map(|row| {
            let disciplines = memberships.remove(&row.uuid).unwrap_or_default();
            Ok(UserListItem {
                uuid: row.uuid.to_string(),
                name: row.name,
                email: row.email,
                role: Role::parse(&row.role)?,
                is_active: row.is_active,
                email_verified_at: row.email_verified_at.map(|t| t.to_rfc3339()),
                last_login_at: row.last_login_at.map(|t| t.to_rfc3339()),
                created_at: row.created_at.to_rfc3339(),
                updated_at: row.updated_at.to_rfc3339(),
                disciplines,
            })
        })
        .collect::<Result<Vec<_>, AppError>>()?;

    Ok(HttpResponse::Ok().json(UsersListResponse {
        data,
        meta: PageMeta::new(pagination, total),
    }))
}

/// PATCH /users/{uuid}/deactivate
///
/// Logical delete: flips is_active to false. Self-deactivation is always
/// denied, and deactivating an already-inactive user is rejected rather
/// than silently succeeding.
///
/// # Errors
/// - 401: Missing or invalid token
/// - 403: Non-ADMIN caller, self-deactivation, or already inactive
/// - 404: Unknown user
pub async fn deactivate_user(
    principal: web::ReqData<Principal>,
    path: web::Path<Uuid>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, AppError> {
    let target_uuid = path.into_inner();
    let context = ErrorContext::new("deactivate_user").with_user_id(principal.uuid.to_string());

    authz::ensure_can_deactivate(&principal, target_uuid)?;

    let target = fetch_active_flag(pool.get_ref(), target_uuid).await?;
    if !target {
        return Err(AppError::Forbidden(ForbiddenError::AlreadyInactive));
    }

    sqlx::query("UPDATE users SET is_active = FALSE, updated_at = $1 WHERE uuid = $2")
        .bind(Utc::now())
        .bind(target_uuid)
        .execute(pool.get_ref())
        .await?;

    tracing::info!(
        request_id = %context.request_id,
        target_user = %target_uuid,
        deactivated_by = %principal.uuid,
        "User deactivated"
    );

    Ok(HttpResponse::Ok().json(UserStatusResponse {
        message: "User deactivated successfully".to_string(),
        user_uuid: target_uuid.to_string(),
        is_active: false,
    }))
}

/// PATCH /users/{uuid}/activate
///
/// Reverses a logical delete. Activating an already-active user is
/// rejected rather than silently succeeding.
///
/// # Errors
/// - 401: Missing or invalid token
/// - 403: Non-ADMIN caller or already active
/// - 404: Unknown user
pub async fn activate_user(
    principal: web::ReqData<Principal>,
    path: web::Path<Uuid>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, AppError> {
    let target_uuid = path.into_inner();
    let context = ErrorContext::new("activate_user").with_user_id(principal.uuid.to_string());

    authz::ensure_admin(&principal, "activate users")?;

    let target = fetch_active_flag(pool.get_ref(), target_uuid).await?;
    if target {
        return Err(AppError::Forbidden(ForbiddenError::AlreadyActive));
    }

    sqlx::query("UPDATE users SET is_active = TRUE, updated_at = $1 WHERE uuid = $2")
        .bind(Utc::now())
        .bind(target_uuid)
        .execute(pool.get_ref())
        .await?;

    tracing::info!(
        request_id = %context.request_id,
        target_user = %target_uuid,
        activated_by = %principal.uuid,
        "User activated"
    );

    Ok(HttpResponse::Ok().json(UserStatusResponse {
        message: "User activated successfully".to_string(),
        user_uuid: target_uuid.to_string(),
        is_active: true,
    }))
}

fn push_user_filters(
    qb: &mut QueryBuilder<'_, Postgres>,
    search: &Option<String>,
    role: Option<Role>,
    is_active: Option<bool>,
) {
    if let Some(search) = search {
        let pattern = format!("%{}%", search);
        qb.push(" AND (name ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR email ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
    if let Some(role) = role {
        qb.push(" AND role = ").push_bind(role.as_str());
    }
    if let Some(is_active) = is_active {
        qb.push(" AND is_active = ").push_bind(is_active);
    }
}

async fn fetch_active_flag(pool: &PgPool, user_uuid: Uuid) -> Result<bool, AppError> {
    let row = sqlx::query_as::<_, (bool,)>("SELECT is_active FROM users WHERE uuid = $1")
        .bind(user_uuid)
        .fetch_optional(pool)
        .await?;
    match row {
        Some((is_active,)) => Ok(is_active),
        None => Err(AppError::Database(DatabaseError::NotFound(
            "User not found".to_string(),
        ))),
    }
}

async fn fetch_memberships(
    pool: &PgPool,
    user_ids: &[Uuid],
) -> Result<HashMap<Uuid, Vec<DisciplineRef>>, AppError> {
    if user_ids.is_empty() {
        return Ok(HashMap::new());
    }

    let rows = sqlx::query_as::<_, (Uuid, i64, String, String)>(
        r#"
        SELECT ud.user_uuid, d.id, d.slug, d.name
        FROM user_disciplines ud
        JOIN disciplines d ON d.id = ud.discipline_id
        WHERE ud.user_uuid = ANY($1)
        ORDER BY d.name
        "#,
    )
    .bind(user_ids.to_vec())
    .fetch_all(pool)
    .await?;

    let mut memberships: HashMap<Uuid, Vec<DisciplineRef>> = HashMap::new();
    for (user_uuid, id, slug, name) in rows {
        memberships
            .entry(user_uuid)
            .or_default()
            .push(DisciplineRef { id, slug, name });
    }
    Ok(memberships)
}
