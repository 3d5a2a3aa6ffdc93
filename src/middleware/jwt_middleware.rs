/// JWT Authentication Middleware
///
/// Validates the bearer access token from the Authorization header, then
/// re-resolves the identity from the users table and injects the resulting
/// Principal into request extensions for route handlers. The store lookup
/// means a deactivated account is rejected even while its token is still
/// structurally valid.

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    web, Error, HttpMessage, HttpResponse,
};
use futures::future::LocalBoxFuture;
use sqlx::PgPool;
use std::rc::Rc;

use crate::auth::{load_principal, validate_access_token};
use crate::configuration::JwtSettings;
use crate::error::{AppError, AuthError};

/// JWT middleware for protecting routes
///
/// Must be applied to routes that require authentication.
pub struct JwtMiddleware {
    jwt_config: JwtSettings,
}

impl JwtMiddleware {
    pub fn new(jwt_config: JwtSettings) -> Self {
        Self { jwt_config }
    }
}

impl<S, B> Transform<S, ServiceRequest> for JwtMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = JwtMiddlewareService<S>;
    type Future = std::future::Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        std::future::ready(Ok(JwtMiddlewareService {
            service: Rc::new(service),
            jwt_config: self.jwt_config.clone(),
        }))
    }
}

pub struct JwtMiddlewareService<S> {
    service: Rc<S>,
    jwt_config: JwtSettings,
}

impl<S, B> Service<ServiceRequest> for JwtMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        // Extract Authorization header
        let auth_header = req
            .headers()
            .get("Authorization")
            .and_then(|h| h.to_str().ok())
            .and_then(|h| {
                if h.starts_with("Bearer ") {
                    Some(h[7..].to_string())
                } else {
                    None
                }
            });

        let jwt_config = self.jwt_config.clone();
        let pool = req.app_data::<web::Data<PgPool>>().cloned();
        let service = self.service.clone();

        Box::pin(async move {
            let token = match auth_header {
                Some(token) => token,
                None => {
                    tracing::warn!("Missing or invalid Authorization header");
                    return Err(unauthorized(
                        "Missing or invalid authorization header",
                        "UNAUTHORIZED",
                    ));
                }
            };

            let claims = match validate_access_token(&token, &jwt_config) {
                Ok(claims) => claims,
                Err(e) => {
                    tracing::warn!("JWT validation failed: {}", e);
                    return Err(unauthorized("Invalid or expired token", "TOKEN_INVALID"));
                }
            };

            let pool = match pool {
                Some(pool) => pool,
                None => {
                    tracing::error!("Database pool missing from app data");
                    let response = HttpResponse::InternalServerError().json(serde_json::json!({
                        "error": "Internal server error",
                        "code": "INTERNAL_ERROR"
                    }));
                    return Err(
                        actix_web::error::InternalError::from_response("Misconfigured", response)
                            .into(),
                    );
                }
            };

            let user_id = match claims.user_id() {
                Ok(user_id) => user_id,
                Err(_) => {
                    return Err(unauthorized("Invalid or expired token", "TOKEN_INVALID"));
                }
            };

            // Fresh store lookup: active flag and role are re-read on every
            // protected request.
            let principal = match load_principal(pool.get_ref(), user_id).await {
                Ok(principal) => principal,
                Err(AppError::Auth(AuthError::AccountInactive)) => {
                    return Err(unauthorized("Account is inactive", "ACCOUNT_INACTIVE"));
                }
                Err(e) => {
                    tracing::warn!("Principal resolution failed: {}", e);
                    return Err(unauthorized("Invalid or expired token", "TOKEN_INVALID"));
                }
            };

            tracing::debug!(
                user_id = %principal.uuid,
                email = %principal.email,
                role = %principal.role,
                "JWT validated successfully"
            );

            req.extensions_mut().insert(principal);

            service.call(req).await
        })
    }
}

fn unauthorized(message: &str, code: &str) -> Error {
    let response = HttpResponse::Unauthorized().json(serde_json::json!({
        "error": message,
        "code": code
    }));
    actix_web::error::InternalError::from_response("Unauthorized", response).into()
}
