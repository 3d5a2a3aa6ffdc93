/// Module Routes
///
/// Read-only taxonomy lookups keyed by the external platform's discipline
/// identifiers.

use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::auth::Principal;
use crate::error::AppError;

#[derive(Deserialize)]
pub struct ModulesQuery {
    pub external_discipline_id: Option<String>,
}

#[derive(Serialize, sqlx::FromRow)]
pub struct ModuleResponse {
    pub id: i64,
    pub external_id: String,
    pub name: String,
    pub discipline_external_id: Option<String>,
}

/// GET /modules
///
/// Optionally filtered by the owning discipline's external id.
pub async fn list_modules(
    _principal: web::ReqData<Principal>,
    query: web::Query<ModulesQuery>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, AppError> {
    let modules = match &query.external_discipline_id {
        Some(external_discipline_id) => {
            sqlx::query_as::<_, ModuleResponse>(
                "SELECT id, external_id, name, discipline_external_id FROM modules \
                 WHERE discipline_external_id = $1 ORDER BY name",
            )
            .bind(external_discipline_id)
            .fetch_all(pool.get_ref())
            .await?
        }
        None => {
            sqlx::query_as::<_, ModuleResponse>(
                "SELECT id, external_id, name, discipline_external_id FROM modules ORDER BY name",
            )
            .fetch_all(pool.get_ref())
            .await?
        }
    };

    Ok(HttpResponse::Ok().json(modules))
}
