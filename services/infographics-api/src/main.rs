use std::net::SocketAddr;
use std::sync::Arc;

use common_auth::CredentialStore;
use common_config::load;
use common_obs::ObsInit;
use infographics_api::auth::build_token_service;
use infographics_api::config::ApiConfig;
use infographics_api::{build_router, AppState, SERVICE_NAME, VERSION};
use tokio::net::TcpListener;

fn build_sha() -> &'static str {
    option_env!("BUILD_SHA").unwrap_or("unknown")
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ObsInit::init(SERVICE_NAME)?;

    let config = load::<ApiConfig>()?;
    let addr = config.socket_addr()?;
    tracing::info!(
        event = "service_start",
        service = SERVICE_NAME,
        version = VERSION,
        build_sha = build_sha(),
        listen_addr = %addr,
        "starting service"
    );

    let credentials =
        CredentialStore::load(&config.auth.users_env, config.auth.users_file.as_deref());
    if credentials.is_empty() {
        tracing::warn!(
            users_env = %config.auth.users_env,
            "no users configured; every login will be rejected"
        );
    } else {
        tracing::info!(users = credentials.len(), "loaded user credentials");
    }

    let tokens = build_token_service(&config.token)?;
    let state = Arc::new(AppState::new(&config, credentials, tokens));
    let router = build_router(state);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!(event = "service_stop", service = SERVICE_NAME);

    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(%error, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
