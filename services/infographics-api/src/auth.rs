//! Request-boundary authentication: the login handler, `/auth/me`, and the
//! guards that turn a bearer token into an [`AuthenticatedUser`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::rejection::FormRejection;
use axum::extract::{Extension, Query, State};
use axum::http::{header, HeaderMap, Request, Uri};
use axum::middleware::Next;
use axum::response::Response;
use axum::{Form, Json};
use common_auth::{InsecureDemoTokens, SignedTokens, TokenError, TokenService};
use common_obs::auth_login_attempts_total;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::audit::{AuditAction, AuditEvent};
use crate::config::{TokenMode, TokenSettings, UnauthorizedMode};
use crate::error::ApiError;
use crate::AppState;

/// Query parameter accepted when `auth.allow_query_token` is on.
pub const QUERY_TOKEN_PARAM: &str = "token";

/// Identity attached to requests that passed a guard.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub username: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub token_type: &'static str,
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
}

/// Build the token service selected by configuration.
pub fn build_token_service(settings: &TokenSettings) -> Result<Arc<dyn TokenService>, TokenError> {
    match settings.mode {
        TokenMode::Signed => {
            let ttl = Duration::from_secs(settings.ttl_minutes.max(1).saturating_mul(60));
            let signer = match settings.secret.as_deref().filter(|secret| !secret.is_empty()) {
                Some(secret) => SignedTokens::new(secret.as_bytes(), ttl)?,
                None => {
                    tracing::warn!(
                        "no token secret configured; using a random secret, tokens will not survive a restart"
                    );
                    SignedTokens::with_random_secret(ttl)
                }
            };
            Ok(Arc::new(signer))
        }
        TokenMode::InsecureDemo => {
            tracing::warn!(
                mode = "insecure-demo",
                "bearer tokens are unsigned and never expire; any caller can impersonate any user"
            );
            Ok(Arc::new(InsecureDemoTokens))
        }
    }
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    form: Result<Form<LoginForm>, FormRejection>,
) -> Result<Json<LoginResponse>, ApiError> {
    let Form(form) = form.map_err(|rejection| ApiError::Validation {
        message: rejection.body_text(),
    })?;

    let outcome = state.credentials.check(&form.username, &form.password);
    if let Some(service) = common_obs::service_name() {
        auth_login_attempts_total().inc(&[service, outcome.as_str()], 1);
    }

    if !outcome.is_authenticated() {
        tracing::warn!(
            event = "login_failed",
            username = %form.username,
            outcome = outcome.as_str()
        );
        state.audit.record(AuditEvent::failure(
            form.username,
            AuditAction::Login,
            "/auth/login",
            outcome.as_str(),
        ));
        return Err(ApiError::InvalidCredentials);
    }

    let issued = state.tokens.issue(&form.username).map_err(|error| {
        tracing::error!(%error, username = %form.username, "failed to issue token");
        ApiError::Internal
    })?;

    tracing::info!(
        event = "login_succeeded",
        username = %form.username,
        token_kind = state.tokens.kind()
    );
    state.audit.record(AuditEvent::success(
        form.username.clone(),
        AuditAction::Login,
        "/auth/login",
    ));

    Ok(Json(LoginResponse {
        access_token: issued.token,
        token_type: "bearer",
        username: form.username,
        expires_in: issued.expires_in.map(|ttl| ttl.as_secs()),
    }))
}

pub async fn me(Extension(user): Extension<AuthenticatedUser>) -> Json<serde_json::Value> {
    Json(json!({ "username": user.username }))
}

/// Guard for API routes: a missing or invalid token is a 401.
pub async fn require_bearer(
    State(state): State<Arc<AppState>>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let user = authenticate_request(&state, req.headers(), req.uri(), false)?;
    req.extensions_mut().insert(user);
    Ok(next.run(req).await)
}

/// Guard for page routes: may accept a query token and may redirect to the
/// login page instead of answering 401.
pub async fn require_page_auth(
    State(state): State<Arc<AppState>>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let allow_query = state.auth.allow_query_token;
    match authenticate_request(&state, req.headers(), req.uri(), allow_query) {
        Ok(user) => {
            req.extensions_mut().insert(user);
            Ok(next.run(req).await)
        }
        Err(error) => match state.auth.unauthorized {
            UnauthorizedMode::Redirect => Err(ApiError::LoginRequired {
                location: state.auth.login_path.clone(),
            }),
            UnauthorizedMode::Status => Err(error),
        },
    }
}

fn authenticate_request(
    state: &AppState,
    headers: &HeaderMap,
    uri: &Uri,
    allow_query: bool,
) -> Result<AuthenticatedUser, ApiError> {
    let token = match bearer_token(headers) {
        Some(token) => token.to_string(),
        None if allow_query => {
            let token = query_token(uri).ok_or(ApiError::InvalidToken)?;
            tracing::warn!(
                path = uri.path(),
                "bearer token supplied in query string; it may leak through logs and referrers"
            );
            token
        }
        None => {
            tracing::debug!(path = uri.path(), "request without bearer token");
            return Err(ApiError::InvalidToken);
        }
    };

    match state.tokens.verify(&token) {
        Ok(username) => Ok(AuthenticatedUser { username }),
        Err(error) => {
            tracing::info!(%error, path = uri.path(), "rejected bearer token");
            Err(ApiError::InvalidToken)
        }
    }
}

/// Extract the credentials of an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

fn query_token(uri: &Uri) -> Option<String> {
    let Query(params) = Query::<HashMap<String, String>>::try_from_uri(uri).ok()?;
    params
        .get(QUERY_TOKEN_PARAM)
        .filter(|token| !token.is_empty())
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn parses_bearer_header() {
        assert_eq!(bearer_token(&headers("Bearer abc.def")), Some("abc.def"));
        assert_eq!(bearer_token(&headers("bearer  abc")), Some("abc"));
        assert_eq!(bearer_token(&headers("Basic abc")), None);
        assert_eq!(bearer_token(&headers("Bearer ")), None);
        assert_eq!(bearer_token(&headers("Bearer")), None);
        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }

    #[test]
    fn reads_query_token() {
        let uri: Uri = "/infographics?token=user_alice_token&x=1".parse().unwrap();
        assert_eq!(query_token(&uri).as_deref(), Some("user_alice_token"));
        let uri: Uri = "/infographics?token=".parse().unwrap();
        assert_eq!(query_token(&uri), None);
        let uri: Uri = "/infographics".parse().unwrap();
        assert_eq!(query_token(&uri), None);
    }

    #[test]
    fn builds_configured_token_service() {
        let mut settings = TokenSettings::default();
        let service = build_token_service(&settings).unwrap();
        assert_eq!(service.kind(), "signed");

        settings.secret = Some("too-short".to_string());
        assert!(matches!(
            build_token_service(&settings),
            Err(TokenError::WeakSecret(9))
        ));

        settings.mode = TokenMode::InsecureDemo;
        let service = build_token_service(&settings).unwrap();
        assert_eq!(service.kind(), "insecure-demo");
    }
}
