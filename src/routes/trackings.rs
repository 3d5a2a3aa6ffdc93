/// Tracking Routes
///
/// Usage records linking externally migrated questions to tracking
/// entries. The link rows themselves (used_questions) are written by the
/// external migration jobs and only read here.

use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::auth::Principal;
use crate::error::{AppError, DatabaseError, ErrorContext};
use crate::pagination::{PageMeta, Pagination};
use crate::validators::{is_valid_name, is_valid_search};

#[derive(Deserialize)]
pub struct CreateTrackingRequest {
    pub name: String,
    pub status: Option<String>,
    pub webhook_url: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Deserialize)]
pub struct TrackingsQuery {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
    pub search: Option<String>,
}

#[derive(sqlx::FromRow)]
struct TrackingRow {
    uuid: Uuid,
    name: String,
    status: Option<String>,
    webhook_url: Option<String>,
    metadata: Option<serde_json::Value>,
    webhook_executed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Serialize)]
pub struct TrackingResponse {
    pub uuid: String,
    pub name: String,
    pub status: Option<String>,
    pub webhook_url: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub webhook_executed_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Serialize)]
pub struct TrackingsListResponse {
    pub data: Vec<TrackingResponse>,
    pub meta: PageMeta,
}

#[derive(sqlx::FromRow)]
struct UsedQuestionRow {
    uuid: Uuid,
    question_uuid: Uuid,
    externalid: String,
    statement: String,
    exam_area: String,
    subject: String,
    topic: String,
    discipline_id: i64,
    discipline_slug: String,
    discipline_name: String,
    created_at: DateTime<Utc>,
}

#[derive(Serialize)]
pub struct UsedQuestionResponse {
    pub uuid: String,
    pub question: UsedQuestionSummary,
    pub created_at: String,
}

#[derive(Serialize)]
pub struct UsedQuestionSummary {
    pub uuid: String,
    pub externalid: String,
    pub statement: String,
    pub exam_area: String,
    pub subject: String,
    pub topic: String,
    pub discipline: crate::routes::questions::DisciplineSummary,
}

#[derive(Serialize)]
pub struct TrackingWithQuestionsResponse {
    #[serde(flatten)]
    pub tracking: TrackingResponse,
    pub used_questions: Vec<UsedQuestionResponse>,
}

/// POST /trackings
///
/// # Errors
/// - 400: Invalid name
/// - 401: Missing or invalid token
pub async fn create_tracking(
    principal: web::ReqData<Principal>,
    form: web::Json<CreateTrackingRequest>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::new("create_tracking").with_user_id(principal.uuid.to_string());

    let name = is_valid_name(&form.name)?;
    let tracking_uuid = Uuid::new_v4();
    let now = Utc::now();

    sqlx::query(
        r#"
        INSERT INTO trackings (uuid, name, status, webhook_url, metadata, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $6)
        "#,
    )
    .bind(tracking_uuid)
    .bind(&name)
    .bind(&form.status)
    .bind(&form.webhook_url)
    .bind(&form.metadata)
    .bind(now)
    .execute(pool.get_ref())
    .await?;

    tracing::info!(
        request_id = %context.request_id,
        tracking = %tracking_uuid,
        "Tracking created"
    );

    let tracking = fetch_tracking(pool.get_ref(), tracking_uuid).await?;
    Ok(HttpResponse::Created().json(tracking))
}

/// GET /trackings
///
/// Paginated listing, newest first, with an optional case-insensitive
/// name search.
pub async fn list_trackings(
    _principal: web::ReqData<Principal>,
    query: web::Query<TrackingsQuery>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, AppError> {
    let pagination = Pagination::from_query(query.page, query.page_size);
    let search = match &query.search {
        Some(search) => Some(is_valid_search(search)?),
        None => None,
    };

    let mut qb = QueryBuilder::<Postgres>::new(
        "SELECT uuid, name, status, webhook_url, metadata, webhook_executed_at, \
         created_at, updated_at FROM trackings WHERE 1=1",
    );
    if let Some(search) = &search {
        qb.push(" AND name ILIKE ").push_bind(format!("%{}%", search));
    }
    qb.push(" ORDER BY created_at DESC LIMIT ")
        .push_bind(pagination.limit())
        .push(" OFFSET ")
        .push_bind(pagination.offset());

    let rows = qb
        .build_query_as::<TrackingRow>()
        .fetch_all(pool.get_ref())
        .await?;

    let mut count_qb =
        QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM trackings WHERE 1=1");
    if let Some(search) = &search {
        count_qb
            .push(" AND name ILIKE ")
            .push_bind(format!("%{}%", search));
    }
    let (total,) = count_qb
        .build_query_as::<(i64,)>()
        .fetch_one(pool.get_ref())
        .await?;

    Ok(HttpResponse::Ok().json(TrackingsListResponse {
        data: rows.into_iter().map(tracking_response).collect(),
        meta: PageMeta::new(pagination, total),
    }))
}

/// GET /trackings/{uuid}
///
/// # Errors
/// - 404: Unknown tracking
pub async fn get_tracking(
    _principal: web::ReqData<Principal>,
    path: web::Path<Uuid>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, AppError> {
    let tracking = fetch_tracking(pool.get_ref(), path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(tracking))
}

/// GET /trackings/{uuid}/with-questions
///
/// The tracking plus its used-question rows, each carrying a question and
/// discipline summary.
pub async fn get_tracking_with_questions(
    _principal: web::ReqData<Principal>,
    path: web::Path<Uuid>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, AppError> {
    let tracking_uuid = path.into_inner();
    let tracking = fetch_tracking(pool.get_ref(), tracking_uuid).await?;

    let rows = sqlx::query_as::<_, UsedQuestionRow>(
        r#"
        SELECT uq.uuid, uq.question_uuid, q.externalid, q.statement, q.exam_area,
               q.subject, q.topic, q.discipline_id, d.slug AS discipline_slug,
               d.name AS discipline_name, uq.created_at
        FROM used_questions uq
        JOIN questions q ON q.uuid = uq.question_uuid
        JOIN disciplines d ON d.id = q.discipline_id
        WHERE uq.tracking_uuid = $1
        ORDER BY uq.created_at
        "#,
    )
    .bind(tracking_uuid)
    .fetch_all(pool.get_ref())
    .await?;

    let used_questions = rows
        .into_iter()
        .map(|row| UsedQuestionResponse {
            uuid: row.uuid.to_string(),
            created_at: row.created_at.to_rfc3339(),
            question: UsedQuestionSummary {
                uuid: row.question_uuid.to_string(),
                externalid: row.externalid,
                statement: row.statement,
                exam_area: row.exam_area,
                subject: row.subject,
                topic: row.topic,
                discipline: crate::routes::questions::DisciplineSummary {
                    id: row.discipline_id,
                    slug: row.discipline_slug,
                    name: row.discipline_name,
                },
            },
        })
        .collect();

    Ok(HttpResponse::Ok().json(TrackingWithQuestionsResponse {
        tracking,
        used_questions,
    }))
}

async fn fetch_tracking(pool: &PgPool, tracking_uuid: Uuid) -> Result<TrackingResponse, AppError> {
    let row = sqlx::query_as::<_, TrackingRow>(
        r#"
        SELECT uuid, name, status, webhook_url, metadata, webhook_executed_at,
               created_at, updated_at
        FROM trackings
        WHERE uuid = $1
        "#,
    )
    .bind(tracking_uuid)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => Ok(tracking_response(row)),
        None => Err(AppError::Database(DatabaseError::NotFound(
            "Tracking not found".to_string(),
        ))),
    }
}

fn tracking_response(row: TrackingRow) -> TrackingResponse {
    TrackingResponse {
        uuid: row.uuid.to_string(),
        name: row.name,
        status: row.status,
        webhook_url: row.webhook_url,
        metadata: row.metadata,
        webhook_executed_at: row.webhook_executed_at.map(|t| t.to_rfc3339()),
        created_at: row.created_at.to_rfc3339(),
        updated_at: row.updated_at.to_rfc3339(),
    }
}
