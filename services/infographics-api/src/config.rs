use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use axum::http::HeaderValue;
use common_config::{env_bool, env_list, override_from_env, ServiceConfig};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub bind_address: String,
    pub port: u16,
    /// Directory holding `infographic.html` and `login.html`.
    pub public_dir: PathBuf,
    pub auth: AuthSettings,
    pub token: TokenSettings,
    pub rate_limit: RateLimitSettings,
    pub cors: CorsSettings,
    pub audit: AuditConfig,
    pub infographics: InfographicSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    /// Environment variable holding the JSON user map.
    pub users_env: String,
    /// JSON user map on disk, used when `users_env` is unset.
    pub users_file: Option<PathBuf>,
    /// Accept `?token=` on page routes. Tokens in URLs end up in access logs
    /// and referrers, so this stays off unless a deployment needs it.
    pub allow_query_token: bool,
    pub unauthorized: UnauthorizedMode,
    pub login_path: String,
}

/// What a page route does when the caller is not authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnauthorizedMode {
    /// Plain 401 with a JSON body.
    Status,
    /// 303 to `login_path`.
    Redirect,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TokenSettings {
    pub mode: TokenMode,
    pub secret: Option<String>,
    pub ttl_minutes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TokenMode {
    Signed,
    /// Unsigned `user_<name>_token` strings. Demo deployments only.
    InsecureDemo,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    /// Requests allowed per client inside one window.
    pub requests: u32,
    pub window_secs: u64,
    /// Key clients by the first `X-Forwarded-For` hop instead of the socket
    /// address. Only safe behind a proxy that overwrites the header.
    pub trust_forwarded_for: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CorsSettings {
    pub origins: Vec<String>,
    pub allow_credentials: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub endpoint: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct InfographicSettings {
    /// Serve `/infographics/public` without authentication.
    pub public_access: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8000,
            public_dir: PathBuf::from("public"),
            auth: AuthSettings::default(),
            token: TokenSettings::default(),
            rate_limit: RateLimitSettings::default(),
            cors: CorsSettings::default(),
            audit: AuditConfig::default(),
            infographics: InfographicSettings::default(),
        }
    }
}

pub const DEFAULT_LOGIN_PATH: &str = "/login";

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            users_env: "USERS".to_string(),
            users_file: None,
            allow_query_token: false,
            unauthorized: UnauthorizedMode::Status,
            login_path: DEFAULT_LOGIN_PATH.to_string(),
        }
    }
}

impl Default for TokenSettings {
    fn default() -> Self {
        Self {
            mode: TokenMode::Signed,
            secret: None,
            ttl_minutes: 30,
        }
    }
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            requests: 100,
            window_secs: 60,
            trust_forwarded_for: false,
        }
    }
}

impl Default for CorsSettings {
    fn default() -> Self {
        Self {
            origins: vec!["http://localhost:3000".to_string()],
            allow_credentials: true,
        }
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant(String);

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown value {}", self.0)
    }
}

impl FromStr for UnauthorizedMode {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "status" => Ok(UnauthorizedMode::Status),
            "redirect" => Ok(UnauthorizedMode::Redirect),
            _ => Err(UnknownVariant(s.to_string())),
        }
    }
}

impl FromStr for TokenMode {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "signed" => Ok(TokenMode::Signed),
            "insecure-demo" | "insecure_demo" => Ok(TokenMode::InsecureDemo),
            _ => Err(UnknownVariant(s.to_string())),
        }
    }
}

impl ApiConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.bind_address, self.port).parse()
    }
}

impl ServiceConfig for ApiConfig {
    const PREFIX: &'static str = "INFOGRAPHICS_";

    fn apply_environment_overrides(&mut self, prefix: &str) {
        let var = |name: &str| format!("{prefix}{name}");

        override_from_env(&mut self.bind_address, &var("BIND_ADDRESS"));
        override_from_env(&mut self.port, &var("PORT"));
        override_from_env(&mut self.public_dir, &var("PUBLIC_DIR"));

        override_from_env(&mut self.auth.users_env, &var("USERS_ENV"));
        if let Ok(path) = std::env::var(var("USERS_FILE")) {
            self.auth.users_file = (!path.trim().is_empty()).then(|| PathBuf::from(path));
        }
        if let Some(allow) = env_bool(&var("ALLOW_QUERY_TOKEN")) {
            self.auth.allow_query_token = allow;
        }
        override_from_env(&mut self.auth.unauthorized, &var("UNAUTHORIZED"));
        override_from_env(&mut self.auth.login_path, &var("LOGIN_PATH"));

        override_from_env(&mut self.token.mode, &var("TOKEN_MODE"));
        if let Ok(secret) = std::env::var(var("TOKEN_SECRET")) {
            self.token.secret = Some(secret);
        }
        override_from_env(&mut self.token.ttl_minutes, &var("TOKEN_TTL_MINUTES"));

        override_from_env(&mut self.rate_limit.requests, &var("RATE_LIMIT_REQUESTS"));
        override_from_env(&mut self.rate_limit.window_secs, &var("RATE_LIMIT_WINDOW_SECS"));
        if let Some(trust) = env_bool(&var("TRUST_FORWARDED_FOR")) {
            self.rate_limit.trust_forwarded_for = trust;
        }

        if let Some(origins) = env_list(&var("CORS_ORIGINS")) {
            self.cors.origins = origins;
        }
        if let Some(allow) = env_bool(&var("CORS_ALLOW_CREDENTIALS")) {
            self.cors.allow_credentials = allow;
        }

        override_from_env(&mut self.audit.endpoint, &var("AUDIT_ENDPOINT"));
        if let Some(enabled) = env_bool(&var("AUDIT_ENABLED")) {
            self.audit.enabled = enabled;
        }

        if let Some(public) = env_bool(&var("PUBLIC_INFOGRAPHIC")) {
            self.infographics.public_access = public;
        }

        self.auth.sanitize_login_path();
    }
}

impl AuthSettings {
    /// Reset `login_path` to the default when it cannot be sent as a
    /// `Location` header.
    pub fn sanitize_login_path(&mut self) {
        if HeaderValue::from_str(&self.login_path).is_err() || self.login_path.is_empty() {
            tracing::warn!(
                login_path = %self.login_path.escape_debug(),
                fallback = DEFAULT_LOGIN_PATH,
                "invalid login path, ignoring"
            );
            self.login_path = DEFAULT_LOGIN_PATH.to_string();
        }
    }
}
