mod auth;
mod dashboard;
mod disciplines;
mod health_check;
mod modules;
pub mod questions;
mod subjects;
mod trackings;
mod users;

pub use auth::{admin_change_password, get_current_user, login, refresh, register};
pub use dashboard::dashboard_stats;
pub use disciplines::list_disciplines;
pub use health_check::health_check;
pub use modules::list_modules;
pub use questions::{
    approve_question, create_question, delete_question, get_question, list_approved_questions,
    list_questions, update_question,
};
pub use subjects::list_subjects;
pub use trackings::{create_tracking, get_tracking, get_tracking_with_questions, list_trackings};
pub use users::{activate_user, deactivate_user, list_users};
