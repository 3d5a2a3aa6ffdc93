/// JWT Token Generation and Validation
///
/// Mints and validates the access/refresh token pair. The two kinds share
/// one payload shape but are signed with distinct secrets and lifetimes,
/// and validation checks the embedded kind so an access token can never
/// pass where a refresh token is expected (or the reverse).

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use uuid::Uuid;

use crate::auth::claims::{Claims, TokenKind};
use crate::auth::role::Role;
use crate::configuration::JwtSettings;
use crate::error::{AppError, AuthError};

/// A freshly minted access/refresh pair
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Generate a new access/refresh token pair for a user
///
/// # Errors
/// Returns error if signing fails
pub fn generate_token_pair(
    user_id: &Uuid,
    email: &str,
    role: Role,
    config: &JwtSettings,
) -> Result<TokenPair, AppError> {
    let access_token = sign(
        Claims::new(
            *user_id,
            email.to_string(),
            role,
            TokenKind::Access,
            config.access_token_expiry,
            config.issuer.clone(),
        ),
        &config.access_secret,
    )?;

    let refresh_token = sign(
        Claims::new(
            *user_id,
            email.to_string(),
            role,
            TokenKind::Refresh,
            config.refresh_token_expiry,
            config.issuer.clone(),
        ),
        &config.refresh_secret,
    )?;

    Ok(TokenPair {
        access_token,
        refresh_token,
    })
}

/// Validate an access token and extract its claims
///
/// # Errors
/// Returns error if the token is expired, tampered with, signed with the
/// wrong secret, or carries the refresh kind
pub fn validate_access_token(token: &str, config: &JwtSettings) -> Result<Claims, AppError> {
    validate(token, &config.access_secret, TokenKind::Access, config)
}

/// Validate a refresh token and extract its claims
///
/// # Errors
/// Returns error if the token is expired, tampered with, signed with the
/// wrong secret, or carries the access kind
pub fn validate_refresh_token(token: &str, config: &JwtSettings) -> Result<Claims, AppError> {
    validate(token, &config.refresh_secret, TokenKind::Refresh, config)
}

fn sign(claims: Claims, secret: &str) -> Result<String, AppError> {
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal(format!("Token generation failed: {}", e)))
}

fn validate(
    token: &str,
    secret: &str,
    expected_kind: TokenKind,
    config: &JwtSettings,
) -> Result<Claims, AppError> {
    let mut validation = Validation::new(Algorithm::HS256);
    // Verify issuer matches configuration
    validation.set_issuer(&[&config.issuer]);

    let claims = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|e| {
        tracing::warn!("JWT validation error: {}", e);
        match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                AppError::Auth(AuthError::TokenExpired)
            }
            _ => AppError::Auth(AuthError::TokenInvalid),
        }
    })?;

    if claims.kind != expected_kind {
        tracing::warn!(sub = %claims.sub, "Token kind mismatch");
        return Err(AppError::Auth(AuthError::WrongTokenKind));
    }

    Ok(claims)
}
