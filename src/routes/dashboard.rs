/// Dashboard Routes
///
/// Per-discipline question counts over the caller's accessible discipline
/// set.

use actix_web::{web, HttpResponse};
use chrono::Utc;
use serde::Serialize;
use sqlx::PgPool;

use crate::auth::Principal;
use crate::authz;
use crate::error::{AppError, ForbiddenError};

#[derive(Serialize)]
pub struct DisciplineStats {
    pub id: i64,
    pub slug: String,
    pub name: String,
    pub total_questions: i64,
    pub approved_questions: i64,
    pub pending_questions: i64,
}

#[derive(Serialize)]
pub struct DashboardStatsResponse {
    pub total_questions: i64,
    pub total_approved: i64,
    pub total_pending: i64,
    pub discipline_stats: Vec<DisciplineStats>,
    pub generated_at: String,
}

/// GET /dashboard/stats
///
/// # Errors
/// - 401: Missing or invalid token
/// - 403: Caller has no accessible disciplines
pub async fn dashboard_stats(
    principal: web::ReqData<Principal>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, AppError> {
    let discipline_ids = match authz::discipline_scope(&principal) {
        Some(ids) => ids,
        None => {
            sqlx::query_as::<_, (i64,)>("SELECT id FROM disciplines")
                .fetch_all(pool.get_ref())
                .await?
                .into_iter()
                .map(|(id,)| id)
                .collect()
        }
    };

    if discipline_ids.is_empty() {
        return Err(AppError::Forbidden(ForbiddenError::NoDisciplines));
    }

    let rows = sqlx::query_as::<_, (i64, String, String, i64, i64, i64)>(
        r#"
        SELECT d.id, d.slug, d.name,
               COUNT(q.uuid) AS total,
               COUNT(q.uuid) FILTER (WHERE q.approved) AS approved,
               COUNT(q.uuid) FILTER (WHERE NOT q.approved) AS pending
        FROM disciplines d
        LEFT JOIN questions q ON q.discipline_id = d.id
        WHERE d.id = ANY($1)
        GROUP BY d.id, d.slug, d.name
        ORDER BY d.name
        "#,
    )
    .bind(discipline_ids)
    .fetch_all(pool.get_ref())
    .await?;

    let mut total_questions = 0;
    let mut total_approved = 0;
    let mut total_pending = 0;
    let mut discipline_stats = Vec::with_capacity(rows.len());

    for (id, slug, name, total, approved, pending) in rows {
        total_questions += total;
        total_approved += approved;
        total_pending += pending;
        discipline_stats.push(DisciplineStats {
            id,
            slug,
            name,
            total_questions: total,
            approved_questions: approved,
            pending_questions: pending,
        });
    }

    Ok(HttpResponse::Ok().json(DashboardStatsResponse {
        total_questions,
        total_approved,
        total_pending,
        discipline_stats,
        generated_at: Utc::now().to_rfc3339(),
    }))
}
