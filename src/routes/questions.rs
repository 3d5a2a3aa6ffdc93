/// Question Routes
///
/// CRUD plus the approval workflow over the question bank. Every operation
/// is discipline-gated through the authorization policy: listings restrict
/// the query to the caller's accessible discipline set, single-resource
/// operations reject with 403.

use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::collections::HashMap;
use uuid::Uuid;

use crate::auth::Principal;
use crate::authz;
use crate::error::{AppError, DatabaseError, ErrorContext, ValidationError};
use crate::pagination::{PageMeta, Pagination};
use crate::validators::is_valid_search;

#[derive(Deserialize)]
pub struct AlternativeInput {
    pub text: String,
    pub order: i32,
    pub correct: bool,
}

#[derive(Deserialize)]
pub struct CreateQuestionRequest {
    pub externalid: String,
    pub statement: String,
    pub competence: String,
    pub skill: String,
    pub exam_area: String,
    pub subject: String,
    pub topic: String,
    pub interpretation: Option<String>,
    pub strategies: Option<String>,
    pub distractors: Option<String>,
    pub text_resolution: String,
    pub application: String,
    pub module_id: String,
    pub subject_id: String,
    pub discipline_id: i64,
    pub alternatives: Vec<AlternativeInput>,
}

/// Partial update; absent fields keep their stored value. A supplied
/// alternatives list replaces the stored set wholesale.
#[derive(Deserialize)]
pub struct UpdateQuestionRequest {
    pub statement: Option<String>,
    pub competence: Option<String>,
    pub skill: Option<String>,
    pub exam_area: Option<String>,
    pub subject: Option<String>,
    pub topic: Option<String>,
    pub interpretation: Option<String>,
    pub strategies: Option<String>,
    pub distractors: Option<String>,
    pub text_resolution: Option<String>,
    pub application: Option<String>,
    pub module_id: Option<String>,
    pub subject_id: Option<String>,
    pub discipline_id: Option<i64>,
    pub alternatives: Option<Vec<AlternativeInput>>,
}

#[derive(Deserialize)]
pub struct QuestionsQuery {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
    pub search: Option<String>,
    /// Discipline slug filter
    pub discipline: Option<String>,
}

#[derive(sqlx::FromRow)]
struct QuestionRow {
    uuid: Uuid,
    externalid: String,
    statement: String,
    competence: String,
    skill: String,
    exam_area: String,
    subject: String,
    topic: String,
    interpretation: Option<String>,
    strategies: Option<String>,
    distractors: Option<String>,
    text_resolution: String,
    application: String,
    module_id: String,
    subject_id: String,
    discipline_id: i64,
    discipline_slug: String,
    discipline_name: String,
    approved: bool,
    approved_at: Option<DateTime<Utc>>,
    approved_by_name: Option<String>,
    approved_by_email: Option<String>,
    migrated_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct AlternativeRow {
    uuid: Uuid,
    question_uuid: Uuid,
    text: String,
    order: i32,
    correct: bool,
}

#[derive(Serialize)]
pub struct AlternativeResponse {
    pub uuid: String,
    pub text: String,
    pub order: i32,
    pub correct: bool,
}

#[derive(Serialize)]
pub struct DisciplineSummary {
    pub id: i64,
    pub slug: String,
    pub name: String,
}

#[derive(Serialize)]
pub struct ApprovedBy {
    pub name: String,
    pub email: String,
}

#[derive(Serialize)]
pub struct QuestionResponse {
    pub uuid: String,
    pub externalid: String,
    pub statement: String,
    pub competence: String,
    pub skill: String,
    pub exam_area: String,
    pub subject: String,
    pub topic: String,
    pub interpretation: Option<String>,
    pub strategies: Option<String>,
    pub distractors: Option<String>,
    pub text_resolution: String,
    pub application: String,
    pub module_id: String,
    pub subject_id: String,
    pub discipline: DisciplineSummary,
    pub approved: bool,
    pub approved_at: Option<String>,
    pub approved_by: Option<ApprovedBy>,
    pub migrated_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub alternatives: Vec<AlternativeResponse>,
}

#[derive(Serialize)]
pub struct QuestionsListResponse {
    pub data: Vec<QuestionResponse>,
    pub meta: PageMeta,
}

const QUESTION_SELECT: &str = r#"
SELECT q.uuid, q.externalid, q.statement, q.competence, q.skill, q.exam_area,
       q.subject, q.topic, q.interpretation, q.strategies, q.distractors,
       q.text_resolution, q.application, q.module_id, q.subject_id,
       q.discipline_id, d.slug AS discipline_slug, d.name AS discipline_name,
       q.approved, q.approved_at, u.name AS approved_by_name,
       u.email AS approved_by_email, q.migrated_at, q.created_at, q.updated_at
FROM questions q
JOIN disciplines d ON d.id = q.discipline_id
LEFT JOIN users u ON u.uuid = q.approved_by_user_uuid
"#;

/// POST /questions
///
/// Create a question with its alternatives in one transaction. Any role
/// may create, but only inside an accessible discipline.
///
/// # Errors
/// - 400: Validation error (empty alternatives)
/// - 401: Missing or invalid token
/// - 403: Discipline outside the caller's membership
pub async fn create_question(
    principal: web::ReqData<Principal>,
    form: web::Json<CreateQuestionRequest>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::new("create_question").with_user_id(principal.uuid.to_string());

    authz::ensure_discipline_access(&principal, form.discipline_id)?;

    if form.alternatives.is_empty() {
        return Err(AppError::Validation(ValidationError::EmptyField(
            "alternatives".to_string(),
        )));
    }

    let question_uuid = Uuid::new_v4();
    let now = Utc::now();

    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO questions
            (uuid, externalid, statement, competence, skill, exam_area, subject,
             topic, interpretation, strategies, distractors, text_resolution,
             application, module_id, subject_id, discipline_id, approved,
             created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                $15, $16, FALSE, $17, $17)
        "#,
    )
    .bind(question_uuid)
    .bind(&form.externalid)
    .bind(&form.statement)
    .bind(&form.competence)
    .bind(&form.skill)
    .bind(&form.exam_area)
    .bind(&form.subject)
    .bind(&form.topic)
    .bind(&form.interpretation)
    .bind(&form.strategies)
    .bind(&form.distractors)
    .bind(&form.text_resolution)
    .bind(&form.application)
    .bind(&form.module_id)
    .bind(&form.subject_id)
    .bind(form.discipline_id)
    .bind(now)
    .execute(&mut tx)
    .await?;

    insert_alternatives(&mut tx, question_uuid, &form.alternatives, now).await?;

    tx.commit().await?;

    tracing::info!(
        request_id = %context.request_id,
        question = %question_uuid,
        discipline = form.discipline_id,
        "Question created"
    );

    let response = load_question(pool.get_ref(), question_uuid).await?;
    Ok(HttpResponse::Created().json(response))
}

/// GET /questions
///
/// Paginated listing restricted to the caller's accessible disciplines.
/// ADMIN may filter by any discipline slug (404 for unknown); other roles
/// may only name a slug inside their membership (403 otherwise). Search
/// matches statement, topic, and subject case-insensitively.
pub async fn list_questions(
    principal: web::ReqData<Principal>,
    query: web::Query<QuestionsQuery>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, AppError> {
    list_questions_inner(&principal, &query, pool.get_ref(), false).await
}

/// GET /questions/approved
///
/// Same scoping and filters as the main listing, restricted to approved
/// questions and ordered by approval time.
pub async fn list_approved_questions(
    principal: web::ReqData<Principal>,
    query: web::Query<QuestionsQuery>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, AppError> {
    list_questions_inner(&principal, &query, pool.get_ref(), true).await
}

/// GET /questions/{uuid}
///
/// # Errors
/// - 401: Missing or invalid token
/// - 403: Question's discipline outside the caller's membership
/// - 404: Unknown question
pub async fn get_question(
    principal: web::ReqData<Principal>,
    path: web::Path<Uuid>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, AppError> {
    let question_uuid = path.into_inner();
    let question = fetch_question_gated(pool.get_ref(), &principal, question_uuid).await?;
    Ok(HttpResponse::Ok().json(question))
}

/// PATCH /questions/{uuid}
///
/// Partial update. If the payload moves the question to a different
/// discipline, the caller must have access to the new one too. A supplied
/// alternatives list replaces the stored set inside the same transaction.
pub async fn update_question(
    principal: web::ReqData<Principal>,
    path: web::Path<Uuid>,
    form: web::Json<UpdateQuestionRequest>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, AppError> {
    let question_uuid = path.into_inner();
    let context = ErrorContext::new("update_question").with_user_id(principal.uuid.to_string());

    // Existence and discipline gate on the stored row first
    fetch_question_gated(pool.get_ref(), &principal, question_uuid).await?;

    if let Some(new_discipline_id) = form.discipline_id {
        authz::ensure_discipline_access(&principal, new_discipline_id)?;
    }

    if let Some(alternatives) = &form.alternatives {
        if alternatives.is_empty() {
            return Err(AppError::Validation(ValidationError::EmptyField(
                "alternatives".to_string(),
            )));
        }
    }

    let now = Utc::now();
    let mut tx = pool.begin().await?;

    let mut qb = QueryBuilder::<Postgres>::new("UPDATE questions SET updated_at = ");
    qb.push_bind(now);
    push_optional_set(&mut qb, "statement", &form.statement);
    push_optional_set(&mut qb, "competence", &form.competence);
    push_optional_set(&mut qb, "skill", &form.skill);
    push_optional_set(&mut qb, "exam_area", &form.exam_area);
    push_optional_set(&mut qb, "subject", &form.subject);
    push_optional_set(&mut qb, "topic", &form.topic);
    push_optional_set(&mut qb, "interpretation", &form.interpretation);
    push_optional_set(&mut qb, "strategies", &form.strategies);
    push_optional_set(&mut qb, "distractors", &form.distractors);
    push_optional_set(&mut qb, "text_resolution", &form.text_resolution);
    push_optional_set(&mut qb, "application", &form.application);
    push_optional_set(&mut qb, "module_id", &form.module_id);
    push_optional_set(&mut qb, "subject_id", &form.subject_id);
    if let Some(discipline_id) = form.discipline_id {
        qb.push(", discipline_id = ").push_bind(discipline_id);
    }
    qb.push(" WHERE uuid = ").push_bind(question_uuid);
    qb.build().execute(&mut tx).await?;

    if let Some(alternatives) = &form.alternatives {
        sqlx::query("DELETE FROM alternatives WHERE question_uuid = $1")
            .bind(question_uuid)
            .execute(&mut tx)
            .await?;
        insert_alternatives(&mut tx, question_uuid, alternatives, now).await?;
    }

    tx.commit().await?;

    tracing::info!(
        request_id = %context.request_id,
        question = %question_uuid,
        "Question updated"
    );

    let response = load_question(pool.get_ref(), question_uuid).await?;
    Ok(HttpResponse::Ok().json(response))
}

/// PATCH /questions/{uuid}/approve
///
/// Approval workflow: REVIEWER, EDITOR and ADMIN only, discipline-gated.
/// Stamps approved_at and records the approving principal.
pub async fn approve_question(
    principal: web::ReqData<Principal>,
    path: web::Path<Uuid>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, AppError> {
    let question_uuid = path.into_inner();
    let context = ErrorContext::new("approve_question").with_user_id(principal.uuid.to_string());

    authz::ensure_can_approve(&principal)?;
    fetch_question_gated(pool.get_ref(), &principal, question_uuid).await?;

    sqlx::query(
        r#"
        UPDATE questions
        SET approved = TRUE, approved_at = $1, approved_by_user_uuid = $2, updated_at = $1
        WHERE uuid = $3
        "#,
    )
    .bind(Utc::now())
    .bind(principal.uuid)
    .bind(question_uuid)
    .execute(pool.get_ref())
    .await?;

    tracing::info!(
        request_id = %context.request_id,
        question = %question_uuid,
        approved_by = %principal.uuid,
        "Question approved"
    );

    let response = load_question(pool.get_ref(), question_uuid).await?;
    Ok(HttpResponse::Ok().json(response))
}

/// DELETE /questions/{uuid}
///
/// EDITOR, REVIEWER and ADMIN only, discipline-gated. Alternatives are
/// removed by the cascade.
pub async fn delete_question(
    principal: web::ReqData<Principal>,
    path: web::Path<Uuid>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, AppError> {
    let question_uuid = path.into_inner();
    let context = ErrorContext::new("delete_question").with_user_id(principal.uuid.to_string());

    authz::ensure_can_delete(&principal)?;
    fetch_question_gated(pool.get_ref(), &principal, question_uuid).await?;

    sqlx::query("DELETE FROM questions WHERE uuid = $1")
        .bind(question_uuid)
        .execute(pool.get_ref())
        .await?;

    tracing::info!(
        request_id = %context.request_id,
        question = %question_uuid,
        deleted_by = %principal.uuid,
        "Question deleted"
    );

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "message": "Question deleted successfully",
        "uuid": question_uuid.to_string(),
    })))
}

async fn list_questions_inner(
    principal: &Principal,
    query: &QuestionsQuery,
    pool: &PgPool,
    only_approved: bool,
) -> Result<HttpResponse, AppError> {
    let pagination = Pagination::from_query(query.page, query.page_size);
    let search = match &query.search {
        Some(search) => Some(is_valid_search(search)?),
        None => None,
    };

    // None = unrestricted (ADMIN without a slug filter)
    let scope = resolve_scope(pool, principal, query.discipline.as_deref()).await?;

    let mut qb = QueryBuilder::<Postgres>::new(QUESTION_SELECT);
    qb.push(" WHERE 1=1");
    push_question_filters(&mut qb, &scope, only_approved, &search);
    if only_approved {
        qb.push(" ORDER BY q.approved_at DESC");
    } else {
        qb.push(" ORDER BY q.created_at DESC");
    }
    qb.push(" LIMIT ")
        .push_bind(pagination.limit())
        .push(" OFFSET ")
        .push_bind(pagination.offset());

    let rows = qb.build_query_as::<QuestionRow>().fetch_all(pool).await?;

    let mut count_qb = QueryBuilder::<Postgres>::new(
        "SELECT COUNT(*) FROM questions q WHERE 1=1",
    );
    push_question_filters(&mut count_qb, &scope, only_approved, &search);
    let (total,) = count_qb.build_query_as::<(i64,)>().fetch_one(pool).await?;

    let question_uuids: Vec<Uuid> = rows.iter().map(|r| r.uuid).collect();
    let mut alternatives = fetch_alternatives(pool, &question_uuids).await?;

    let data = rows
        .into_iter()
        .map(|row| {
            let alts = alternatives.remove(&row.uuid).unwrap_or_default();
            question_response(row, alts)
        })
        .collect::<Vec<_>>();

    Ok(HttpResponse::Ok().json(QuestionsListResponse {
        data,
        meta: PageMeta::new(pagination, total),
    }))
}

/// Translate the caller's discipline filter into a query scope.
/// ADMIN: any slug (404 when unknown) or unrestricted. Everyone else: a
/// named slug must be inside their membership (403 otherwise), and the
/// default scope is the whole membership set.
async fn resolve_scope(
    pool: &PgPool,
    principal: &Principal,
    slug: Option<&str>,
) -> Result<Option<Vec<i64>>, AppError> {
    match (authz::discipline_scope(principal), slug) {
        (None, None) => Ok(None),
        (None, Some(slug)) => {
            let row = sqlx::query_as::<_, (i64,)>("SELECT id FROM disciplines WHERE slug = $1")
                .bind(slug)
                .fetch_optional(pool)
                .await?;
            match row {
                Some((id,)) => Ok(Some(vec![id])),
                None => Err(AppError::Database(DatabaseError::NotFound(
                    "Discipline not found".to_string(),
                ))),
            }
        }
        (Some(_), Some(slug)) => match principal.discipline_by_slug(slug) {
            Some(discipline) => Ok(Some(vec![discipline.id])),
            None => Err(AppError::Forbidden(
                crate::error::ForbiddenError::DisciplineAccess,
            )),
        },
        (Some(ids), None) => Ok(Some(ids)),
    }
}

fn push_question_filters(
    qb: &mut QueryBuilder<'_, Postgres>,
    scope: &Option<Vec<i64>>,
    only_approved: bool,
    search: &Option<String>,
) {
    if let Some(ids) = scope {
        qb.push(" AND q.discipline_id = ANY(").push_bind(ids.clone()).push(")");
    }
    if only_approved {
        qb.push(" AND q.approved = TRUE");
    }
    if let Some(search) = search {
        let pattern = format!("%{}%", search);
        qb.push(" AND (q.statement ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR q.topic ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR q.subject ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
}

fn push_optional_set(
    qb: &mut QueryBuilder<'_, Postgres>,
    column: &str,
    value: &Option<String>,
) {
    if let Some(value) = value {
        qb.push(format!(", {} = ", column)).push_bind(value.clone());
    }
}

async fn fetch_question_gated(
    pool: &PgPool,
    principal: &Principal,
    question_uuid: Uuid,
) -> Result<QuestionResponse, AppError> {
    let question = load_question(pool, question_uuid).await?;
    authz::ensure_discipline_access(principal, question.discipline.id)?;
    Ok(question)
}

async fn load_question(pool: &PgPool, question_uuid: Uuid) -> Result<QuestionResponse, AppError> {
    let mut qb = QueryBuilder::<Postgres>::new(QUESTION_SELECT);
    qb.push(" WHERE q.uuid = ").push_bind(question_uuid);
    let row = qb
        .build_query_as::<QuestionRow>()
        .fetch_optional(pool)
        .await?;

    let row = match row {
        Some(row) => row,
        None => {
            return Err(AppError::Database(DatabaseError::NotFound(
                "Question not found".to_string(),
            )))
        }
    };

    let mut alternatives = fetch_alternatives(pool, &[question_uuid]).await?;
    let alts = alternatives.remove(&question_uuid).unwrap_or_default();
    Ok(question_response(row, alts))
}

async fn fetch_alternatives(
    pool: &PgPool,
    question_uuids: &[Uuid],
) -> Result<HashMap<Uuid, Vec<AlternativeResponse>>, AppError> {
    if question_uuids.is_empty() {
        return Ok(HashMap::new());
    }

    let rows = sqlx::query_as::<_, AlternativeRow>(
        r#"
        SELECT uuid, question_uuid, text, "order", correct
        FROM alternatives
        WHERE question_uuid = ANY($1)
        ORDER BY "order"
        "#,
    )
    .bind(question_uuids.to_vec())
    .fetch_all(pool)
    .await?;

    let mut by_question: HashMap<Uuid, Vec<AlternativeResponse>> = HashMap::new();
    for row in rows {
        by_question
            .entry(row.question_uuid)
            .or_default()
            .push(AlternativeResponse {
                uuid: row.uuid.to_string(),
                text: row.text,
                order: row.order,
                correct: row.correct,
            });
    }
    Ok(by_question)
}

async fn insert_alternatives(
    tx: &mut sqlx::Transaction<'_, Postgres>,
    question_uuid: Uuid,
    alternatives: &[AlternativeInput],
    now: DateTime<Utc>,
) -> Result<(), AppError> {
    for alternative in alternatives {
        sqlx::query(
            r#"
            INSERT INTO alternatives (uuid, question_uuid, text, "order", correct, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $6)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(question_uuid)
        .bind(&alternative.text)
        .bind(alternative.order)
        .bind(alternative.correct)
        .bind(now)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

fn question_response(row: QuestionRow, alternatives: Vec<AlternativeResponse>) -> QuestionResponse {
    let approved_by = match (row.approved_by_name, row.approved_by_email) {
        (Some(name), Some(email)) => Some(ApprovedBy { name, email }),
        _ => None,
    };

    QuestionResponse {
        uuid: row.uuid.to_string(),
        externalid: row.externalid,
        statement: row.statement,
        competence: row.competence,
        skill: row.skill,
        exam_area: row.exam_area,
        subject: row.subject,
        topic: row.topic,
        interpretation: row.interpretation,
        strategies: row.strategies,
        distractors: row.distractors,
        text_resolution: row.text_resolution,
        application: row.application,
        module_id: row.module_id,
        subject_id: row.subject_id,
        discipline: DisciplineSummary {
            id: row.discipline_id,
            slug: row.discipline_slug,
            name: row.discipline_name,
        },
        approved: row.approved,
        approved_at: row.approved_at.map(|t| t.to_rfc3339()),
        approved_by,
        migrated_at: row.migrated_at.map(|t| t.to_rfc3339()),
        created_at: row.created_at.to_rfc3339(),
        updated_at: row.updated_at.to_rfc3339(),
        alternatives,
    }
}
