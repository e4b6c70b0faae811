#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, Response};
use axum::Router;
use common_auth::{hash_password, CredentialStore, SignedTokens, TokenService};
use http_body_util::BodyExt;
use infographics_api::config::ApiConfig;
use infographics_api::{build_router, AppState};
use serde_json::{json, Value};
use tower::ServiceExt;

pub const SECRET: &str = "integration-test-secret-0123456789abcdef";

pub fn users() -> CredentialStore {
    let raw = json!({ "alice": hash_password("wonderland") }).to_string();
    CredentialStore::from_json(&raw).unwrap()
}

pub fn signed_tokens() -> Arc<dyn TokenService> {
    Arc::new(SignedTokens::new(SECRET.as_bytes(), Duration::from_secs(1800)).unwrap())
}

pub fn config_with_public_dir(dir: &Path) -> ApiConfig {
    let mut config = ApiConfig::default();
    config.public_dir = dir.to_path_buf();
    config.audit.enabled = false;
    config
}

pub fn app(config: &ApiConfig, credentials: CredentialStore, tokens: Arc<dyn TokenService>) -> Router {
    build_router(Arc::new(AppState::new(config, credentials, tokens)))
}

pub fn default_app() -> Router {
    let config = ApiConfig::default();
    app(&config, users(), signed_tokens())
}

pub fn login_request(form: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/auth/login")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(form.to_string()))
        .unwrap()
}

pub fn get(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::empty()).unwrap()
}

pub async fn send(router: &Router, req: Request<Body>) -> Response<Body> {
    router.clone().oneshot(req).await.unwrap()
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response.into_body().collect().await.unwrap().to_bytes().to_vec()
}

pub async fn body_json(response: Response<Body>) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

pub async fn login(router: &Router, username: &str, password: &str) -> String {
    let response = send(
        router,
        login_request(&format!("username={username}&password={password}")),
    )
    .await;
    let body = body_json(response).await;
    body["access_token"].as_str().unwrap().to_string()
}
