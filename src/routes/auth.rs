/// Authentication Routes
///
/// Admin-driven registration, login, token refresh, admin password reset,
/// and the current-user profile.

use actix_web::{web, HttpResponse};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::auth::{
    generate_token_pair, hash_password, validate_refresh_token, verify_password, DisciplineRef,
    Principal, Role,
};
use crate::authz;
use crate::configuration::JwtSettings;
use crate::error::{AppError, AuthError, DatabaseError, ErrorContext};
use crate::validators::{is_valid_email, is_valid_name};

/// User registration request (ADMIN only)
#[derive(Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub discipline_ids: Vec<i64>,
}

/// User login request
#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Token refresh request
#[derive(Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Admin password reset request
#[derive(Deserialize)]
pub struct ChangePasswordRequest {
    pub user_uuid: Uuid,
    pub new_password: String,
}

/// Public profile attached to authentication responses
#[derive(Serialize)]
pub struct UserProfile {
    pub uuid: String,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub disciplines: Vec<DisciplineRef>,
}

impl From<&Principal> for UserProfile {
    fn from(principal: &Principal) -> Self {
        Self {
            uuid: principal.uuid.to_string(),
            name: principal.name.clone(),
            email: principal.email.clone(),
            role: principal.role,
            disciplines: principal.disciplines.clone(),
        }
    }
}

/// Authentication response with access and refresh tokens plus profile
#[derive(Serialize)]
pub struct AuthResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub user: UserProfile,
}

/// Token-only response for the refresh endpoint
#[derive(Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

#[derive(Serialize)]
pub struct ChangePasswordResponse {
    pub message: String,
    pub user_uuid: String,
}

/// POST /auth/register
///
/// Register a new user with email, password, name and discipline
/// memberships. Only an ADMIN principal may register users; new accounts
/// always start with the USER role. Returns the new profile plus a token
/// pair for the new account.
///
/// # Errors
/// - 400: Validation errors (invalid email/password/name, unknown discipline id)
/// - 401: Missing or invalid token
/// - 403: Acting principal is not ADMIN
/// - 409: Email already registered (case-insensitive)
pub async fn register(
    principal: web::ReqData<Principal>,
    form: web::Json<RegisterRequest>,
    pool: web::Data<PgPool>,
    jwt_config: web::Data<JwtSettings>,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::new("user_registration").with_user_id(principal.uuid.to_string());

    authz::ensure_admin(&principal, "register users")?;

    // Validate inputs; the email comes back lowercased
    let email = is_valid_email(&form.email)?;
    let name = is_valid_name(&form.name)?;
    let password_hash = hash_password(&form.password)?;

    // Case-insensitive uniqueness check. The unique index on the email
    // column still serializes concurrent registrations for the same
    // address, so a race loser surfaces as 409 as well.
    let existing = sqlx::query_as::<_, (Uuid,)>("SELECT uuid FROM users WHERE email = $1")
        .bind(&email)
        .fetch_optional(pool.get_ref())
        .await?;
    if existing.is_some() {
        return Err(AppError::Database(DatabaseError::UniqueConstraintViolation(
            "Email already registered".to_string(),
        )));
    }

    let user_id = Uuid::new_v4();
    let now = Utc::now();

    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO users (uuid, name, email, password_hash, role, is_active, last_login_at, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, TRUE, $6, $6, $6)
        "#,
    )
    .bind(user_id)
    .bind(&name)
    .bind(&email)
    .bind(&password_hash)
    .bind(Role::User.as_str())
    .bind(now)
    .execute(&mut tx)
    .await?;

    for discipline_id in &form.discipline_ids {
        sqlx::query(
            "INSERT INTO user_disciplines (user_uuid, discipline_id) VALUES ($1, $2)",
        )
        .bind(user_id)
        .bind(discipline_id)
        .execute(&mut tx)
        .await?;
    }

    let disciplines = fetch_user_disciplines(&mut tx, user_id).await?;

    tx.commit().await?;

    let tokens = generate_token_pair(&user_id, &email, Role::User, jwt_config.get_ref())?;

    tracing::info!(
        request_id = %context.request_id,
        user_id = %user_id,
        registered_by = %principal.uuid,
        "User registered successfully"
    );

    Ok(HttpResponse::Created().json(AuthResponse {
        access_token: tokens.access_token,
        refresh_token: tokens.refresh_token,
        token_type: "Bearer".to_string(),
        expires_in: jwt_config.access_token_expiry,
        user: UserProfile {
            uuid: user_id.to_string(),
            name,
            email,
            role: Role::User,
            disciplines,
        },
    }))
}

/// POST /auth/login
///
/// Authenticate with email and password and receive a token pair.
///
/// # Errors
/// - 400: Validation error (invalid email format)
/// - 401: Invalid credentials
///
/// # Security Notes
/// Unknown email, wrong password, and inactive account all produce the
/// same 401 response, to prevent account enumeration.
pub async fn login(
    form: web::Json<LoginRequest>,
    pool: web::Data<PgPool>,
    jwt_config: web::Data<JwtSettings>,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::new("user_login");

    let email = is_valid_email(&form.email)?;

    let user = sqlx::query_as::<_, (Uuid, String, String, String, String, bool)>(
        "SELECT uuid, name, email, password_hash, role, is_active FROM users WHERE email = $1",
    )
    .bind(&email)
    .fetch_optional(pool.get_ref())
    .await?;

    let (user_id, user_name, user_email, password_hash, role, is_active) = match user {
        Some(user) => user,
        None => return Err(AppError::Auth(AuthError::InvalidCredentials)),
    };

    // An inactive record is indistinguishable from a missing one
    if !is_active {
        return Err(AppError::Auth(AuthError::InvalidCredentials));
    }

    let password_valid = verify_password(&form.password, &password_hash)?;
    if !password_valid {
        return Err(AppError::Auth(AuthError::InvalidCredentials));
    }

    let role = Role::parse(&role)?;

    sqlx::query("UPDATE users SET last_login_at = $1 WHERE uuid = $2")
        .bind(Utc::now())
        .bind(user_id)
        .execute(pool.get_ref())
        .await?;

    let disciplines = sqlx::query_as::<_, DisciplineRef>(
        r#"
        SELECT d.id, d.slug, d.name
        FROM user_disciplines ud
        JOIN disciplines d ON d.id = ud.discipline_id
        WHERE ud.user_uuid = $1
        ORDER BY d.name
        "#,
    )
    .bind(user_id)
    .fetch_all(pool.get_ref())
    .await?;

    let tokens = generate_token_pair(&user_id, &user_email, role, jwt_config.get_ref())?;

    tracing::info!(
        request_id = %context.request_id,
        user_id = %user_id,
        "User logged in successfully"
    );

    Ok(HttpResponse::Ok().json(AuthResponse {
        access_token: tokens.access_token,
        refresh_token: tokens.refresh_token,
        token_type: "Bearer".to_string(),
        expires_in: jwt_config.access_token_expiry,
        user: UserProfile {
            uuid: user_id.to_string(),
            name: user_name,
            email: user_email,
            role,
            disciplines,
        },
    }))
}

/// POST /auth/refresh
///
/// Exchange a refresh token for a brand-new access/refresh pair. Rotation
/// issues fresh expiries every time; there is no server-side reuse
/// detection, so an earlier refresh token stays usable until it expires.
///
/// # Errors
/// - 400: Missing refresh_token field
/// - 401: Token invalid, expired, of the wrong kind, or the referenced
///   identity is missing or inactive
pub async fn refresh(
    form: web::Json<RefreshRequest>,
    pool: web::Data<PgPool>,
    jwt_config: web::Data<JwtSettings>,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::new("token_refresh");

    let claims = validate_refresh_token(&form.refresh_token, jwt_config.get_ref())?;
    let user_id = claims.user_id()?;

    // The identity must still exist and be active at refresh time
    let user = sqlx::query_as::<_, (String, String, bool)>(
        "SELECT email, role, is_active FROM users WHERE uuid = $1",
    )
    .bind(user_id)
    .fetch_optional(pool.get_ref())
    .await?;

    let (email, role, is_active) = match user {
        Some(user) => user,
        None => return Err(AppError::Auth(AuthError::TokenInvalid)),
    };

    if !is_active {
        return Err(AppError::Auth(AuthError::AccountInactive));
    }

    let role = Role::parse(&role)?;
    let tokens = generate_token_pair(&user_id, &email, role, jwt_config.get_ref())?;

    tracing::info!(
        request_id = %context.request_id,
        user_id = %user_id,
        "Token refreshed successfully"
    );

    Ok(HttpResponse::Ok().json(TokenResponse {
        access_token: tokens.access_token,
        refresh_token: tokens.refresh_token,
        token_type: "Bearer".to_string(),
        expires_in: jwt_config.access_token_expiry,
    }))
}

/// PATCH /auth/admin/change-password
///
/// Overwrite a user's password hash. ADMIN only; the target is not logged
/// out and no re-authentication is triggered.
///
/// # Errors
/// - 400: New password fails strength validation
/// - 401: Missing or invalid token
/// - 403: Acting principal is not ADMIN
/// - 404: Target user does not exist
pub async fn admin_change_password(
    principal: web::ReqData<Principal>,
    form: web::Json<ChangePasswordRequest>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, AppError> {
    let context =
        ErrorContext::new("admin_change_password").with_user_id(principal.uuid.to_string());

    authz::ensure_admin(&principal, "change user passwords")?;

    let target = sqlx::query_as::<_, (Uuid,)>("SELECT uuid FROM users WHERE uuid = $1")
        .bind(form.user_uuid)
        .fetch_optional(pool.get_ref())
        .await?;
    if target.is_none() {
        return Err(AppError::Database(DatabaseError::NotFound(
            "User not found".to_string(),
        )));
    }

    let new_password_hash = hash_password(&form.new_password)?;

    sqlx::query("UPDATE users SET password_hash = $1, updated_at = $2 WHERE uuid = $3")
        .bind(&new_password_hash)
        .bind(Utc::now())
        .bind(form.user_uuid)
        .execute(pool.get_ref())
        .await?;

    tracing::info!(
        request_id = %context.request_id,
        target_user = %form.user_uuid,
        changed_by = %principal.uuid,
        "Password changed by admin"
    );

    Ok(HttpResponse::Ok().json(ChangePasswordResponse {
        message: "Password changed successfully".to_string(),
        user_uuid: form.user_uuid.to_string(),
    }))
}

/// GET /auth/me
///
/// Current authenticated user's profile, as resolved by the JWT
/// middleware on this request.
pub async fn get_current_user(
    principal: web::ReqData<Principal>,
) -> Result<HttpResponse, AppError> {
    let principal = principal.into_inner();
    Ok(HttpResponse::Ok().json(UserProfile::from(&principal)))
}

async fn fetch_user_disciplines(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    user_id: Uuid,
) -> Result<Vec<DisciplineRef>, AppError> {
    let disciplines = sqlx::query_as::<_, DisciplineRef>(
        r#"
        SELECT d.id, d.slug, d.name
        FROM user_disciplines ud
        JOIN disciplines d ON d.id = ud.discipline_id
        WHERE ud.user_uuid = $1
        ORDER BY d.name
        "#,
    )
    .bind(user_id)
    .fetch_all(tx)
    .await?;
    Ok(disciplines)
}
