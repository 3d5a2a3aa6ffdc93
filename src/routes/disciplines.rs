/// Discipline Routes
///
/// Read-only listing. Non-ADMIN principals only ever see the disciplines
/// they are members of; an empty membership yields an empty page.

use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, QueryBuilder};

use crate::auth::{DisciplineRef, Principal};
use crate::authz;
use crate::error::AppError;
use crate::pagination::{PageMeta, Pagination};
use crate::validators::is_valid_search;

#[derive(Deserialize)]
pub struct DisciplinesQuery {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
    pub search: Option<String>,
}

#[derive(Serialize)]
pub struct DisciplinesListResponse {
    pub data: Vec<DisciplineRef>,
    pub meta: PageMeta,
}

/// GET /disciplines
///
/// Paginated listing ordered by name, with an optional case-insensitive
/// name search. The authorization policy is applied as a query filter,
/// never as a per-row reject.
pub async fn list_disciplines(
    principal: web::ReqData<Principal>,
    query: web::Query<DisciplinesQuery>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, AppError> {
    let pagination = Pagination::from_query(query.page, query.page_size);
    let search = match &query.search {
        Some(search) => Some(is_valid_search(search)?),
        None => None,
    };
    let scope = authz::discipline_scope(&principal);

    let mut qb = QueryBuilder::<Postgres>::new(
        "SELECT id, slug, name FROM disciplines WHERE 1=1",
    );
    push_filters(&mut qb, &scope, &search);
    qb.push(" ORDER BY name LIMIT ")
        .push_bind(pagination.limit())
        .push(" OFFSET ")
        .push_bind(pagination.offset());

    let data = qb
        .build_query_as::<DisciplineRef>()
        .fetch_all(pool.get_ref())
        .await?;

    let mut count_qb =
        QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM disciplines WHERE 1=1");
    push_filters(&mut count_qb, &scope, &search);
    let (total,) = count_qb
        .build_query_as::<(i64,)>()
        .fetch_one(pool.get_ref())
        .await?;

    Ok(HttpResponse::Ok().json(DisciplinesListResponse {
        data,
        meta: PageMeta::new(pagination, total),
    }))
}

fn push_filters(
    qb: &mut QueryBuilder<'_, Postgres>,
    scope: &Option<Vec<i64>>,
    search: &Option<String>,
) {
    if let Some(ids) = scope {
        qb.push(" AND id = ANY(").push_bind(ids.clone()).push(")");
    }
    if let Some(search) = search {
        qb.push(" AND name ILIKE ")
            .push_bind(format!("%{}%", search));
    }
}
