mod support;

use axum::http::{header, StatusCode};
use infographics_api::config::UnauthorizedMode;
use support::{app, body_bytes, body_json, config_with_public_dir, get, login, send, signed_tokens, users};

const PAGE: &str = "<html><body>Legal timeline</body></html>";

fn public_dir() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("infographic.html"), PAGE).unwrap();
    std::fs::write(dir.path().join("login.html"), "<form>login</form>").unwrap();
    dir
}

#[tokio::test]
async fn serves_infographic_to_authenticated_user() {
    let dir = public_dir();
    let router = app(&config_with_public_dir(dir.path()), users(), signed_tokens());
    let token = login(&router, "alice", "wonderland").await;

    let response = send(&router, get("/infographics", Some(&token))).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()[header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .starts_with("text/html"));
    assert_eq!(body_bytes(response).await, PAGE.as_bytes());

    let response = send(&router, get("/infographics", None)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn missing_page_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let router = app(&config_with_public_dir(dir.path()), users(), signed_tokens());
    let token = login(&router, "alice", "wonderland").await;

    let response = send(&router, get("/infographics/", Some(&token))).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["detail"], "Infographic file not found");
}

#[tokio::test]
async fn redirect_mode_sends_browsers_to_login() {
    let dir = public_dir();
    let mut config = config_with_public_dir(dir.path());
    config.auth.unauthorized = UnauthorizedMode::Redirect;
    let router = app(&config, users(), signed_tokens());

    let response = send(&router, get("/infographics", None)).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(response.headers()[header::LOCATION], "/login");

    let response = send(&router, get("/login", None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, b"<form>login</form>");
}

#[tokio::test]
async fn query_token_only_when_enabled() {
    let dir = public_dir();
    let mut config = config_with_public_dir(dir.path());
    let router = app(&config, users(), signed_tokens());
    let token = login(&router, "alice", "wonderland").await;
    let uri = format!("/infographics?token={token}");

    let response = send(&router, get(&uri, None)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    config.auth.allow_query_token = true;
    let router = app(&config, users(), signed_tokens());
    let response = send(&router, get(&uri, None)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = send(&router, get("/auth/me?token=ignored", None)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn public_infographic_follows_flag() {
    let dir = public_dir();
    let mut config = config_with_public_dir(dir.path());
    let router = app(&config, users(), signed_tokens());
    let response = send(&router, get("/infographics/public", None)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    config.infographics.public_access = true;
    let router = app(&config, users(), signed_tokens());
    let response = send(&router, get("/infographics/public", None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, PAGE.as_bytes());
}

#[tokio::test]
async fn unusable_login_path_answers_401_instead_of_redirecting() {
    let dir = public_dir();
    let mut config = config_with_public_dir(dir.path());
    config.auth.unauthorized = UnauthorizedMode::Redirect;
    config.auth.login_path = "/login\u{7f}x".to_string();
    let router = app(&config, users(), signed_tokens());

    let response = send(&router, get("/infographics", None)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.headers().get(header::LOCATION).is_none());
    assert_eq!(body_json(response).await["detail"], "Invalid token");
}

#[tokio::test]
async fn unreadable_page_is_a_generic_internal_error() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("infographic.html")).unwrap();
    let router = app(&config_with_public_dir(dir.path()), users(), signed_tokens());
    let token = login(&router, "alice", "wonderland").await;

    let response = send(&router, get("/infographics", Some(&token))).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        body_json(response).await,
        serde_json::json!({ "detail": "Internal server error" })
    );
}
