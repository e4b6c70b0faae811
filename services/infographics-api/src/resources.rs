use axum::extract::Extension;
use axum::Json;
use serde_json::json;

use crate::auth::AuthenticatedUser;

// Placeholders until the case, user and audit resources get real storage.

pub async fn list_cases(Extension(user): Extension<AuthenticatedUser>) -> Json<serde_json::Value> {
    placeholder("Cases", &user)
}

pub async fn list_users(Extension(user): Extension<AuthenticatedUser>) -> Json<serde_json::Value> {
    placeholder("Users", &user)
}

pub async fn list_audit_logs(
    Extension(user): Extension<AuthenticatedUser>,
) -> Json<serde_json::Value> {
    placeholder("Audit", &user)
}

fn placeholder(resource: &str, user: &AuthenticatedUser) -> Json<serde_json::Value> {
    tracing::debug!(resource, username = %user.username, "placeholder resource requested");
    Json(json!({ "message": format!("{resource} endpoint - to be implemented") }))
}
