//! Integration tests for the question bank: discipline-scoped CRUD and
//! the approval workflow.

use serde_json::{json, Value};
use sqlx::{Connection, Executor, PgConnection, PgPool};
use std::net::TcpListener;
use uuid::Uuid;
use validador::auth::hash_password;
use validador::configuration::{get_configuration, DatabaseSettings};
use validador::startup::run;

pub struct TestApp {
    pub address: String,
    pub db_pool: PgPool,
    pub math_id: i64,
    pub portuguese_id: i64,
}

const ADMIN_EMAIL: &str = "admin@validador.com";
const ADMIN_PASSWORD: &str = "AdminPass123";

async fn spawn_app() -> TestApp {
    let listener = TcpListener::bind("127.0.0.1:0")
        .expect("Failed to bind random port");
    let port = listener.local_addr().unwrap().port();
    let address = format!("http://127.0.0.1:{}", port);

    let mut configuration = get_configuration().expect("Failed to read configuration.");
    configuration.database.database_name = Uuid::new_v4().to_string();
    let connection_pool = configure_database(&configuration.database).await;

    let (math_id, portuguese_id) = seed(&connection_pool).await;

    let jwt_config = configuration.jwt.clone();
    let server = run(listener, connection_pool.clone(), jwt_config)
        .expect("Failed to bind address");
    let _ = tokio::spawn(server);

    TestApp {
        address,
        db_pool: connection_pool,
        math_id,
        portuguese_id,
    }
}

async fn configure_database(config: &DatabaseSettings) -> PgPool {
    let mut connection = PgConnection::connect(&config.connection_string_without_db())
        .await
        .expect("Failed to connect to Postgres");
    connection
        .execute(&*format!(r#"CREATE DATABASE "{}";"#, config.database_name))
        .await
        .expect("Failed to create database.");
    let connection_pool = PgPool::connect(&config.connection_string())
        .await
        .expect("Failed to connect to Postgres.");
    sqlx::migrate!("./migrations")
        .run(&connection_pool)
        .await
        .expect("Failed to migrate the database.");
    connection_pool
}

async fn seed(pool: &PgPool) -> (i64, i64) {
    let (math_id,): (i64,) = sqlx::query_as(
        "INSERT INTO disciplines (slug, name, external_id) \
         VALUES ('mathematics', 'Matemática', 'ext-mat') RETURNING id",
    )
    .fetch_one(pool)
    .await
    .expect("Failed to seed discipline");

    let (portuguese_id,): (i64,) = sqlx::query_as(
        "INSERT INTO disciplines (slug, name, external_id) \
         VALUES ('portuguese', 'Português', 'ext-por') RETURNING id",
    )
    .fetch_one(pool)
    .await
    .expect("Failed to seed discipline");

    create_user(pool, "Admin Sistema", ADMIN_EMAIL, ADMIN_PASSWORD, "ADMIN", &[]).await;

    (math_id, portuguese_id)
}

async fn create_user(
    pool: &PgPool,
    name: &str,
    email: &str,
    password: &str,
    role: &str,
    discipline_ids: &[i64],
) -> Uuid {
    let user_uuid = Uuid::new_v4();
    let password_hash = hash_password(password).expect("Failed to hash password");
    sqlx::query(
        "INSERT INTO users (uuid, name, email, password_hash, role) VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(user_uuid)
    .bind(name)
    .bind(email)
    .bind(password_hash)
    .bind(role)
    .execute(pool)
    .await
    .expect("Failed to create user");

    for discipline_id in discipline_ids {
        sqlx::query("INSERT INTO user_disciplines (user_uuid, discipline_id) VALUES ($1, $2)")
            .bind(user_uuid)
            .bind(discipline_id)
            .execute(pool)
            .await
            .expect("Failed to attach discipline");
    }

    user_uuid
}

async fn access_token(app: &TestApp, email: &str, password: &str) -> String {
    let response = reqwest::Client::new()
        .post(&format!("{}/auth/login", app.address))
        .json(&json!({ "email": email, "password": password }))
        .send()
        .await
        .expect("Failed to execute request.");
    assert_eq!(200, response.status().as_u16(), "login failed for {}", email);
    let body: Value = response.json().await.expect("Failed to parse login response");
    body["access_token"].as_str().unwrap().to_string()
}

fn math_question(discipline_id: i64) -> Value {
    json!({
        "externalid": "MAT001",
        "statement": "Qual é o resultado de 15 + 27?",
        "competence": "Resolver problemas de adição",
        "skill": "Operações básicas com números naturais",
        "exam_area": "mt",
        "subject": "Aritmética",
        "topic": "Adição de números naturais",
        "text_resolution": "Soma direta dos dois números.",
        "application": "Avaliação diagnóstica",
        "module_id": "mod-001",
        "subject_id": "sub-001",
        "discipline_id": discipline_id,
        "alternatives": [
            {"text": "42", "order": 1, "correct": true},
            {"text": "32", "order": 2, "correct": false},
            {"text": "52", "order": 3, "correct": false},
            {"text": "41", "order": 4, "correct": false}
        ]
    })
}

async fn create_question(app: &TestApp, token: &str, body: &Value) -> Value {
    let response = reqwest::Client::new()
        .post(&format!("{}/questions", app.address))
        .bearer_auth(token)
        .json(body)
        .send()
        .await
        .expect("Failed to execute request.");
    assert_eq!(201, response.status().as_u16(), "question creation failed");
    response.json().await.expect("Failed to parse response")
}

// --- Creation Tests ---

#[tokio::test]
async fn create_question_returns_201_with_alternatives() {
    let app = spawn_app().await;
    create_user(&app.db_pool, "Maria", "maria@example.com", "MariaPass1", "USER", &[app.math_id]).await;
    let token = access_token(&app, "maria@example.com", "MariaPass1").await;

    let created = create_question(&app, &token, &math_question(app.math_id)).await;

    assert_eq!(created["statement"], "Qual é o resultado de 15 + 27?");
    assert_eq!(created["discipline"]["slug"], "mathematics");
    assert_eq!(created["approved"], false);
    assert!(created["approved_by"].is_null());
    let alternatives = created["alternatives"].as_array().unwrap();
    assert_eq!(alternatives.len(), 4);
    // Alternatives come back in display order
    assert_eq!(alternatives[0]["order"], 1);
    assert_eq!(alternatives[0]["correct"], true);
}

#[tokio::test]
async fn create_question_outside_membership_returns_403() {
    let app = spawn_app().await;
    create_user(&app.db_pool, "Maria", "maria@example.com", "MariaPass1", "USER", &[app.math_id]).await;
    let token = access_token(&app, "maria@example.com", "MariaPass1").await;

    let response = reqwest::Client::new()
        .post(&format!("{}/questions", app.address))
        .bearer_auth(&token)
        .json(&math_question(app.portuguese_id))
        .send()
        .await
        .expect("Failed to execute request.");

    assert_eq!(403, response.status().as_u16());
}

#[tokio::test]
async fn create_question_without_alternatives_returns_400() {
    let app = spawn_app().await;
    let token = access_token(&app, ADMIN_EMAIL, ADMIN_PASSWORD).await;

    let mut body = math_question(app.math_id);
    body["alternatives"] = json!([]);

    let response = reqwest::Client::new()
        .post(&format!("{}/questions", app.address))
        .bearer_auth(&token)
        .json(&body)
        .send()
        .await
        .expect("Failed to execute request.");

    assert_eq!(400, response.status().as_u16());
}

// --- Listing Tests ---

#[tokio::test]
async fn listing_is_scoped_to_membership() {
    let app = spawn_app().await;
    let admin = access_token(&app, ADMIN_EMAIL, ADMIN_PASSWORD).await;

    // One question in each discipline, created by the admin
    create_question(&app, &admin, &math_question(app.math_id)).await;
    let mut portuguese = math_question(app.portuguese_id);
    portuguese["externalid"] = json!("POR001");
    portuguese["statement"] = json!("Qual a separação silábica de construção?");
    create_question(&app, &admin, &portuguese).await;

    create_user(&app.db_pool, "Maria", "maria@example.com", "MariaPass1", "USER", &[app.math_id]).await;
    let maria = access_token(&app, "maria@example.com", "MariaPass1").await;

    // Maria only ever sees mathematics rows, with no filter requested
    let response = reqwest::Client::new()
        .get(&format!("{}/questions", app.address))
        .bearer_auth(&maria)
        .send()
        .await
        .expect("Failed to execute request.");
    assert_eq!(200, response.status().as_u16());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["meta"]["total"], 1);
    assert_eq!(body["data"][0]["discipline"]["slug"], "mathematics");

    // The admin sees both
    let response = reqwest::Client::new()
        .get(&format!("{}/questions", app.address))
        .bearer_auth(&admin)
        .send()
        .await
        .expect("Failed to execute request.");
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["meta"]["total"], 2);
}

#[tokio::test]
async fn listing_with_slug_outside_membership_returns_403() {
    let app = spawn_app().await;
    create_user(&app.db_pool, "Maria", "maria@example.com", "MariaPass1", "USER", &[app.math_id]).await;
    let token = access_token(&app, "maria@example.com", "MariaPass1").await;

    let response = reqwest::Client::new()
        .get(&format!("{}/questions", app.address))
        .query(&[("discipline", "portuguese")])
        .bearer_auth(&token)
        .send()
        .await
        .expect("Failed to execute request.");

    assert_eq!(403, response.status().as_u16());
}

#[tokio::test]
async fn listing_with_unknown_slug_returns_404_for_admin() {
    let app = spawn_app().await;
    let token = access_token(&app, ADMIN_EMAIL, ADMIN_PASSWORD).await;

    let response = reqwest::Client::new()
        .get(&format!("{}/questions", app.address))
        .query(&[("discipline", "alchemy")])
        .bearer_auth(&token)
        .send()
        .await
        .expect("Failed to execute request.");

    assert_eq!(404, response.status().as_u16());
}

#[tokio::test]
async fn listing_with_empty_membership_returns_empty_page() {
    let app = spawn_app().await;
    let admin = access_token(&app, ADMIN_EMAIL, ADMIN_PASSWORD).await;
    create_question(&app, &admin, &math_question(app.math_id)).await;

    create_user(&app.db_pool, "Sem Disciplina", "nobody@example.com", "NobodyPass1", "USER", &[]).await;
    let token = access_token(&app, "nobody@example.com", "NobodyPass1").await;

    let response = reqwest::Client::new()
        .get(&format!("{}/questions", app.address))
        .bearer_auth(&token)
        .send()
        .await
        .expect("Failed to execute request.");

    // Empty filtered result set, never leakage
    assert_eq!(200, response.status().as_u16());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["meta"]["total"], 0);
    assert!(body["data"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn listing_search_matches_statement_topic_and_subject() {
    let app = spawn_app().await;
    let admin = access_token(&app, ADMIN_EMAIL, ADMIN_PASSWORD).await;

    create_question(&app, &admin, &math_question(app.math_id)).await;
    let mut other = math_question(app.math_id);
    other["externalid"] = json!("MAT002");
    other["statement"] = json!("Quanto é 7 vezes 8?");
    other["topic"] = json!("Multiplicação");
    create_question(&app, &admin, &other).await;

    let response = reqwest::Client::new()
        .get(&format!("{}/questions", app.address))
        .query(&[("search", "multiplica")])
        .bearer_auth(&admin)
        .send()
        .await
        .expect("Failed to execute request.");

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["meta"]["total"], 1);
    assert_eq!(body["data"][0]["externalid"], "MAT002");
}

// --- Single Resource Tests ---

#[tokio::test]
async fn get_question_gates_by_discipline() {
    let app = spawn_app().await;
    let admin = access_token(&app, ADMIN_EMAIL, ADMIN_PASSWORD).await;
    let created = create_question(&app, &admin, &math_question(app.portuguese_id)).await;
    let question_uuid = created["uuid"].as_str().unwrap();

    create_user(&app.db_pool, "Maria", "maria@example.com", "MariaPass1", "USER", &[app.math_id]).await;
    let maria = access_token(&app, "maria@example.com", "MariaPass1").await;

    let response = reqwest::Client::new()
        .get(&format!("{}/questions/{}", app.address, question_uuid))
        .bearer_auth(&maria)
        .send()
        .await
        .expect("Failed to execute request.");
    assert_eq!(403, response.status().as_u16());

    // The admin reads it fine
    let response = reqwest::Client::new()
        .get(&format!("{}/questions/{}", app.address, question_uuid))
        .bearer_auth(&admin)
        .send()
        .await
        .expect("Failed to execute request.");
    assert_eq!(200, response.status().as_u16());
}

#[tokio::test]
async fn get_question_returns_404_for_unknown_uuid() {
    let app = spawn_app().await;
    let token = access_token(&app, ADMIN_EMAIL, ADMIN_PASSWORD).await;

    let response = reqwest::Client::new()
        .get(&format!("{}/questions/{}", app.address, Uuid::new_v4()))
        .bearer_auth(&token)
        .send()
        .await
        .expect("Failed to execute request.");

    assert_eq!(404, response.status().as_u16());
}

// --- Update Tests ---

#[tokio::test]
async fn update_question_applies_partial_changes() {
    let app = spawn_app().await;
    let token = access_token(&app, ADMIN_EMAIL, ADMIN_PASSWORD).await;
    let created = create_question(&app, &token, &math_question(app.math_id)).await;
    let question_uuid = created["uuid"].as_str().unwrap();

    let response = reqwest::Client::new()
        .patch(&format!("{}/questions/{}", app.address, question_uuid))
        .bearer_auth(&token)
        .json(&json!({ "topic": "Adição e subtração" }))
        .send()
        .await
        .expect("Failed to execute request.");

    assert_eq!(200, response.status().as_u16());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["topic"], "Adição e subtração");
    // Untouched fields keep their values
    assert_eq!(body["statement"], "Qual é o resultado de 15 + 27?");
    assert_eq!(body["alternatives"].as_array().unwrap().len(), 4);
}

#[tokio::test]
async fn update_question_replaces_alternatives_wholesale() {
    let app = spawn_app().await;
    let token = access_token(&app, ADMIN_EMAIL, ADMIN_PASSWORD).await;
    let created = create_question(&app, &token, &math_question(app.math_id)).await;
    let question_uuid = created["uuid"].as_str().unwrap();

    let response = reqwest::Client::new()
        .patch(&format!("{}/questions/{}", app.address, question_uuid))
        .bearer_auth(&token)
        .json(&json!({
            "alternatives": [
                {"text": "42", "order": 1, "correct": true},
                {"text": "24", "order": 2, "correct": false}
            ]
        }))
        .send()
        .await
        .expect("Failed to execute request.");

    assert_eq!(200, response.status().as_u16());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["alternatives"].as_array().unwrap().len(), 2);

    let (count,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM alternatives WHERE question_uuid = $1::uuid")
            .bind(question_uuid)
            .fetch_one(&app.db_pool)
            .await
            .unwrap();
    assert_eq!(count, 2);
}

#[tokio::test]
async fn update_gates_the_new_discipline_too() {
    let app = spawn_app().await;
    create_user(&app.db_pool, "Ana", "ana@example.com", "AnaPass123", "EDITOR", &[app.math_id]).await;
    let admin = access_token(&app, ADMIN_EMAIL, ADMIN_PASSWORD).await;
    let ana = access_token(&app, "ana@example.com", "AnaPass123").await;

    let created = create_question(&app, &admin, &math_question(app.math_id)).await;
    let question_uuid = created["uuid"].as_str().unwrap();

    // Ana may edit the math question, but not move it into portuguese
    let response = reqwest::Client::new()
        .patch(&format!("{}/questions/{}", app.address, question_uuid))
        .bearer_auth(&ana)
        .json(&json!({ "discipline_id": app.portuguese_id }))
        .send()
        .await
        .expect("Failed to execute request.");

    assert_eq!(403, response.status().as_u16());
}

// --- Approval Tests ---

#[tokio::test]
async fn approve_question_stamps_approver() {
    let app = spawn_app().await;
    create_user(&app.db_pool, "Carlos Matemático", "carlos@example.com", "CarlosPass1", "REVIEWER", &[app.math_id]).await;
    let admin = access_token(&app, ADMIN_EMAIL, ADMIN_PASSWORD).await;
    let carlos = access_token(&app, "carlos@example.com", "CarlosPass1").await;

    let created = create_question(&app, &admin, &math_question(app.math_id)).await;
    let question_uuid = created["uuid"].as_str().unwrap();

    let response = reqwest::Client::new()
        .patch(&format!("{}/questions/{}/approve", app.address, question_uuid))
        .bearer_auth(&carlos)
        .send()
        .await
        .expect("Failed to execute request.");

    assert_eq!(200, response.status().as_u16());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["approved"], true);
    assert!(body["approved_at"].is_string());
    assert_eq!(body["approved_by"]["name"], "Carlos Matemático");
}

#[tokio::test]
async fn approve_returns_403_for_user_role() {
    let app = spawn_app().await;
    create_user(&app.db_pool, "Maria", "maria@example.com", "MariaPass1", "USER", &[app.math_id]).await;
    let admin = access_token(&app, ADMIN_EMAIL, ADMIN_PASSWORD).await;
    let maria = access_token(&app, "maria@example.com", "MariaPass1").await;

    let created = create_question(&app, &admin, &math_question(app.math_id)).await;
    let question_uuid = created["uuid"].as_str().unwrap();

    let response = reqwest::Client::new()
        .patch(&format!("{}/questions/{}/approve", app.address, question_uuid))
        .bearer_auth(&maria)
        .send()
        .await
        .expect("Failed to execute request.");

    assert_eq!(403, response.status().as_u16());
}

#[tokio::test]
async fn approve_returns_403_outside_membership() {
    let app = spawn_app().await;
    create_user(&app.db_pool, "Carlos", "carlos@example.com", "CarlosPass1", "REVIEWER", &[app.math_id]).await;
    let admin = access_token(&app, ADMIN_EMAIL, ADMIN_PASSWORD).await;
    let carlos = access_token(&app, "carlos@example.com", "CarlosPass1").await;

    let created = create_question(&app, &admin, &math_question(app.portuguese_id)).await;
    let question_uuid = created["uuid"].as_str().unwrap();

    let response = reqwest::Client::new()
        .patch(&format!("{}/questions/{}/approve", app.address, question_uuid))
        .bearer_auth(&carlos)
        .send()
        .await
        .expect("Failed to execute request.");

    assert_eq!(403, response.status().as_u16());
}

#[tokio::test]
async fn approved_listing_only_returns_approved_questions() {
    let app = spawn_app().await;
    let admin = access_token(&app, ADMIN_EMAIL, ADMIN_PASSWORD).await;

    let first = create_question(&app, &admin, &math_question(app.math_id)).await;
    let mut other = math_question(app.math_id);
    other["externalid"] = json!("MAT002");
    create_question(&app, &admin, &other).await;

    let first_uuid = first["uuid"].as_str().unwrap();
    let response = reqwest::Client::new()
        .patch(&format!("{}/questions/{}/approve", app.address, first_uuid))
        .bearer_auth(&admin)
        .send()
        .await
        .expect("Failed to execute request.");
    assert_eq!(200, response.status().as_u16());

    let response = reqwest::Client::new()
        .get(&format!("{}/questions/approved", app.address))
        .bearer_auth(&admin)
        .send()
        .await
        .expect("Failed to execute request.");

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["meta"]["total"], 1);
    assert_eq!(body["data"][0]["uuid"], first_uuid);
}

// --- Deletion Tests ---

#[tokio::test]
async fn delete_question_requires_editor_or_above() {
    let app = spawn_app().await;
    create_user(&app.db_pool, "Maria", "maria@example.com", "MariaPass1", "USER", &[app.math_id]).await;
    create_user(&app.db_pool, "Ana", "ana@example.com", "AnaPass123", "EDITOR", &[app.math_id]).await;
    let admin = access_token(&app, ADMIN_EMAIL, ADMIN_PASSWORD).await;
    let maria = access_token(&app, "maria@example.com", "MariaPass1").await;
    let ana = access_token(&app, "ana@example.com", "AnaPass123").await;

    let created = create_question(&app, &admin, &math_question(app.math_id)).await;
    let question_uuid = created["uuid"].as_str().unwrap();

    let response = reqwest::Client::new()
        .delete(&format!("{}/questions/{}", app.address, question_uuid))
        .bearer_auth(&maria)
        .send()
        .await
        .expect("Failed to execute request.");
    assert_eq!(403, response.status().as_u16());

    let response = reqwest::Client::new()
        .delete(&format!("{}/questions/{}", app.address, question_uuid))
        .bearer_auth(&ana)
        .send()
        .await
        .expect("Failed to execute request.");
    assert_eq!(200, response.status().as_u16());

    // Gone, along with its alternatives
    let response = reqwest::Client::new()
        .get(&format!("{}/questions/{}", app.address, question_uuid))
        .bearer_auth(&admin)
        .send()
        .await
        .expect("Failed to execute request.");
    assert_eq!(404, response.status().as_u16());

    let (count,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM alternatives WHERE question_uuid = $1::uuid")
            .bind(question_uuid)
            .fetch_one(&app.db_pool)
            .await
            .unwrap();
    assert_eq!(count, 0);
}

// --- End-to-End Scenario ---

#[tokio::test]
async fn registered_user_is_scoped_end_to_end() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();
    let admin = access_token(&app, ADMIN_EMAIL, ADMIN_PASSWORD).await;

    // Admin registers Maria with a mathematics membership only
    let response = client
        .post(&format!("{}/auth/register", app.address))
        .bearer_auth(&admin)
        .json(&json!({
            "name": "Maria Silva",
            "email": "maria.silva@example.com",
            "password": "SecurePass123",
            "discipline_ids": [app.math_id]
        }))
        .send()
        .await
        .expect("Failed to execute request.");
    assert_eq!(201, response.status().as_u16());

    // Maria logs in with her own credentials
    let maria = access_token(&app, "maria.silva@example.com", "SecurePass123").await;

    // A discipline-scoped listing outside her membership is denied
    let response = client
        .get(&format!("{}/questions", app.address))
        .query(&[("discipline", "portuguese")])
        .bearer_auth(&maria)
        .send()
        .await
        .expect("Failed to execute request.");
    assert_eq!(403, response.status().as_u16());
}
