/// User roles
///
/// A role is the ceiling of what a principal may do. Discipline membership
/// further restricts every role except ADMIN.

use serde::{Deserialize, Serialize};

use crate::error::{AppError, AuthError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    User,
    Editor,
    Reviewer,
    Admin,
}

impl Role {
    /// Text form as stored in the users table
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "USER",
            Role::Editor => "EDITOR",
            Role::Reviewer => "REVIEWER",
            Role::Admin => "ADMIN",
        }
    }

    /// Parse the stored text form. Anything outside the closed set is
    /// rejected rather than defaulted.
    pub fn parse(value: &str) -> Result<Self, AppError> {
        match value {
            "USER" => Ok(Role::User),
            "EDITOR" => Ok(Role::Editor),
            "REVIEWER" => Ok(Role::Reviewer),
            "ADMIN" => Ok(Role::Admin),
            _ => {
                tracing::error!(role = value, "Unknown role value");
                Err(AppError::Auth(AuthError::TokenInvalid))
            }
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
