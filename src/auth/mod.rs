/// Authentication module
///
/// JWT access/refresh pair generation and validation, password hashing,
/// roles, and per-request principal resolution.

mod claims;
mod jwt;
mod password;
mod principal;
mod role;

pub use claims::Claims;
pub use claims::TokenKind;
pub use jwt::generate_token_pair;
pub use jwt::validate_access_token;
pub use jwt::validate_refresh_token;
pub use jwt::TokenPair;
pub use password::hash_password;
pub use password::verify_password;
pub use principal::load_principal;
pub use principal::DisciplineRef;
pub use principal::Principal;
pub use role::Role;
