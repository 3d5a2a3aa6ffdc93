/// Subject Routes
///
/// Read-only taxonomy lookups keyed by the external platform's module
/// identifiers.

use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::auth::Principal;
use crate::error::AppError;

#[derive(Deserialize)]
pub struct SubjectsQuery {
    pub external_module_id: Option<String>,
}

#[derive(Serialize, sqlx::FromRow)]
pub struct SubjectResponse {
    pub id: i64,
    pub external_id: String,
    pub name: String,
    pub module_external_id: Option<String>,
}

/// GET /subjects
///
/// Optionally filtered by the owning module's external id.
pub async fn list_subjects(
    _principal: web::ReqData<Principal>,
    query: web::Query<SubjectsQuery>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, AppError> {
    let subjects = match &query.external_module_id {
        Some(external_module_id) => {
            sqlx::query_as::<_, SubjectResponse>(
                "SELECT id, external_id, name, module_external_id FROM subjects \
                 WHERE module_external_id = $1 ORDER BY name",
            )
            .bind(external_module_id)
            .fetch_all(pool.get_ref())
            .await?
        }
        None => {
            sqlx::query_as::<_, SubjectResponse>(
                "SELECT id, external_id, name, module_external_id FROM subjects ORDER BY name",
            )
            .fetch_all(pool.get_ref())
            .await?
        }
    };

    Ok(HttpResponse::Ok().json(subjects))
}
