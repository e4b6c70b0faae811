use std::io::ErrorKind;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Extension, State};
use axum::response::Html;

use crate::audit::{AuditAction, AuditEvent};
use crate::auth::AuthenticatedUser;
use crate::error::ApiError;
use crate::AppState;

pub const INFOGRAPHIC_FILE: &str = "infographic.html";
pub const LOGIN_FILE: &str = "login.html";

pub async fn infographic(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Html<String>, ApiError> {
    tracing::info!(username = %user.username, "infographic accessed");
    state.audit.record(AuditEvent::success(
        user.username,
        AuditAction::ViewInfographic,
        "/infographics",
    ));

    read_page(&state.public_dir, INFOGRAPHIC_FILE, "Infographic file not found").await
}

pub async fn public_infographic(
    State(state): State<Arc<AppState>>,
    remote: Option<ConnectInfo<SocketAddr>>,
) -> Result<Html<String>, ApiError> {
    if !state.public_access {
        return Err(ApiError::not_found("Not Found"));
    }

    let client = remote
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());
    tracing::info!(client = %client, "public infographic accessed");
    state.audit.record(AuditEvent::success(
        client,
        AuditAction::ViewPublicInfographic,
        "/infographics/public",
    ));

    read_page(&state.public_dir, INFOGRAPHIC_FILE, "Infographic file not found").await
}

pub async fn login_page(State(state): State<Arc<AppState>>) -> Result<Html<String>, ApiError> {
    read_page(&state.public_dir, LOGIN_FILE, "Login page not found").await
}

async fn read_page(dir: &Path, file: &str, missing: &str) -> Result<Html<String>, ApiError> {
    let path = dir.join(file);
    match tokio::fs::read_to_string(&path).await {
        Ok(body) => Ok(Html(body)),
        Err(error) if error.kind() == ErrorKind::NotFound => {
            tracing::warn!(path = %path.display(), "page file missing");
            Err(ApiError::not_found(missing))
        }
        Err(error) => {
            tracing::error!(path = %path.display(), %error, "failed to read page file");
            Err(ApiError::Internal)
        }
    }
}
