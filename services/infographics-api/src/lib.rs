pub mod audit;
pub mod auth;
pub mod config;
pub mod error;
pub mod pages;
pub mod rate_limit;
pub mod resources;
pub mod security;

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use audit::AuditClient;
use axum::body::Body;
use axum::extract::{connect_info::ConnectInfo, MatchedPath, State};
use axum::http::{header, HeaderMap, HeaderValue, Request};
use axum::middleware::{from_fn, from_fn_with_state, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use common_auth::{CredentialStore, TokenService};
use common_obs::{
    encode_prometheus_metrics, http_requests_inflight, observe_http_request, service_name,
    PROMETHEUS_CONTENT_TYPE,
};
use config::{ApiConfig, AuthSettings, CorsSettings};
use error::ApiError;
use rate_limit::RateLimiter;
use serde_json::json;
use tracing::{info_span, Instrument};
use uuid::Uuid;

pub const SERVICE_NAME: &str = "infographics-api";
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
const REQUEST_ID_HEADER: &str = "x-request-id";
const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

pub struct AppState {
    pub credentials: Arc<CredentialStore>,
    pub tokens: Arc<dyn TokenService>,
    pub audit: AuditClient,
    pub rate_limiter: RateLimiter,
    pub auth: AuthSettings,
    pub public_dir: PathBuf,
    pub public_access: bool,
    pub cors: CorsSettings,
    pub trust_forwarded_for: bool,
}

impl AppState {
    pub fn new(
        config: &ApiConfig,
        credentials: CredentialStore,
        tokens: Arc<dyn TokenService>,
    ) -> Self {
        Self {
            credentials: Arc::new(credentials),
            tokens,
            audit: AuditClient::new(&config.audit),
            rate_limiter: RateLimiter::new(&config.rate_limit),
            auth: config.auth.clone(),
            public_dir: config.public_dir.clone(),
            public_access: config.infographics.public_access,
            cors: config.cors.clone(),
            trust_forwarded_for: config.rate_limit.trust_forwarded_for,
        }
    }
}

/// Assemble the full application. CORS sits outside the rate limiter so a
/// throttled response still carries its CORS headers.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = security::cors_layer(&state.cors);

    let api_routes = Router::new()
        .route("/auth/me", get(auth::me))
        .route("/cases", get(resources::list_cases))
        .route("/cases/", get(resources::list_cases))
        .route("/users", get(resources::list_users))
        .route("/users/", get(resources::list_users))
        .route("/audit", get(resources::list_audit_logs))
        .route("/audit/", get(resources::list_audit_logs))
        .route_layer(from_fn_with_state(state.clone(), auth::require_bearer));

    let page_routes = Router::new()
        .route("/infographics", get(pages::infographic))
        .route("/infographics/", get(pages::infographic))
        .route_layer(from_fn_with_state(state.clone(), auth::require_page_auth));

    Router::new()
        .route("/auth/login", post(auth::login))
        .route("/login", get(pages::login_page))
        .route("/infographics/public", get(pages::public_infographic))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .merge(api_routes)
        .merge(page_routes)
        .layer(from_fn_with_state(state.clone(), rate_limit_guard))
        .layer(from_fn(security::security_headers))
        .layer(cors)
        .layer(from_fn(request_context))
        .with_state(state)
}

pub async fn rate_limit_guard(
    State(state): State<Arc<AppState>>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let client = client_ip(&req, state.trust_forwarded_for);
    state.rate_limiter.check(client).await?;
    Ok(next.run(req).await)
}

/// Best-effort client address: the first `X-Forwarded-For` hop when the
/// proxy is trusted, else the socket peer.
fn client_ip(req: &Request<Body>, trust_forwarded_for: bool) -> IpAddr {
    if trust_forwarded_for {
        if let Some(ip) = forwarded_for(req.headers()) {
            return ip;
        }
    }
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

fn forwarded_for(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get(FORWARDED_FOR_HEADER)?
        .to_str()
        .ok()?
        .split(',')
        .next()?
        .trim()
        .parse()
        .ok()
}

async fn request_context(mut req: Request<Body>, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let remote_addr = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let user_agent = req
        .headers()
        .get(header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown")
        .to_string();

    let request_id = match req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|id| !id.is_empty())
    {
        Some(id) => id.to_string(),
        None => {
            let id = Uuid::new_v4().to_string();
            if let Ok(value) = HeaderValue::from_str(&id) {
                req.headers_mut().insert(REQUEST_ID_HEADER, value);
            }
            id
        }
    };

    let _inflight = InFlightGuard::new();

    let span = info_span!(
        "http.request",
        method = %method,
        path = %path,
        route = route.as_str(),
        request_id = %request_id
    );

    let start = Instant::now();
    span.in_scope(|| {
        tracing::info!(
            event = "request_start",
            method = %method,
            path = %path,
            remote_addr = remote_addr.as_str(),
            user_agent = user_agent.as_str()
        )
    });
    let mut response = next.run(req).instrument(span.clone()).await;

    let status = response.status();
    let elapsed = start.elapsed().as_secs_f64();
    observe_http_request(&route, status.as_u16(), elapsed);
    span.in_scope(|| {
        tracing::info!(
            event = "request_end",
            method = %method,
            path = %path,
            status = status.as_u16(),
            latency_ms = elapsed * 1000.0,
            remote_addr = remote_addr.as_str()
        )
    });

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

async fn metrics() -> impl IntoResponse {
    (
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static(PROMETHEUS_CONTENT_TYPE),
        )],
        encode_prometheus_metrics(),
    )
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "service": SERVICE_NAME,
        "version": VERSION,
    }))
}

struct InFlightGuard;

impl InFlightGuard {
    fn new() -> Self {
        if let Some(service) = service_name() {
            http_requests_inflight().add(&[service], 1.0);
        }
        Self
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if let Some(service) = service_name() {
            http_requests_inflight().add(&[service], -1.0);
        }
    }
}
