use anyhow::Context;
use slotkeeper_backend::config::Config;
use slotkeeper_backend::create_app;
use slotkeeper_backend::helpers::{hash_api_key, now};
use slotkeeper_db::{Database, Repository, Requester};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing for structured logging
    #[cfg(debug_assertions)]
    let log_level = tracing::Level::DEBUG;
    #[cfg(not(debug_assertions))]
    let log_level = tracing::Level::INFO;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.as_str()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
    tracing::info!("Starting slotkeeper backend server...");

    // Load configuration from environment variables or use defaults
    let config = Config::from_env();
    tracing::info!(
        "Configuration: port={}, db_path={}, body_limit={}KB, timeout={}s",
        config.port,
        config.database_path,
        config.request_body_limit / 1024,
        config.request_timeout.as_secs(),
    );
    tracing::info!(
        "Capacity: reserved_slots={}, freshness_window={}s, heartbeat_batch={}, default_max_players={}",
        config.reserved_slots,
        config.freshness_window_secs,
        config.heartbeat_batch_size,
        config.default_max_players
    );
    tracing::info!(
        "Rate limits: matchmaking={}/sec (burst {}), player={}/sec (burst {}), general={}/sec (burst {})",
        config.rate_limit_matchmaking_per_sec,
        config.rate_limit_matchmaking_burst,
        config.rate_limit_player_per_sec,
        config.rate_limit_player_burst,
        config.rate_limit_general_per_sec,
        config.rate_limit_general_burst
    );
    if config.orchestrator_api_v1.is_none() || config.orchestrator_api_v2.is_none() {
        tracing::warn!("Orchestrator endpoints not configured; descriptors are unavailable");
    }

    let db = Database::open(&config.database_path)
        .await
        .with_context(|| format!("failed to open database at {}", config.database_path))?;
    let repo: Arc<dyn Repository> = Arc::new(db);

    if let Some(token) = &config.bootstrap_admin_token {
        register_token(repo.as_ref(), token, Requester::admin).await?;
    }
    if let Some(token) = &config.bootstrap_internal_token {
        register_token(repo.as_ref(), token, Requester::internal).await?;
    }

    let app = create_app(repo, &config);
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server error")?;

    tracing::info!("Server stopped");
    Ok(())
}

/// Register a configured api key unless it is already known.
async fn register_token(
    repo: &dyn Repository,
    token: &str,
    role: fn(Uuid) -> Requester,
) -> anyhow::Result<()> {
    let token_hash = hash_api_key(token);
    if let Some(existing) = repo.requester_by_token(token_hash.clone()).await? {
        tracing::debug!(user_id = %existing.user_id, "bootstrap token already registered");
        return Ok(());
    }

    let requester = role(Uuid::new_v4());
    repo.issue_token(token_hash, requester, now()).await?;
    tracing::info!(
        user_id = %requester.user_id,
        admin = requester.is_admin,
        internal = requester.is_internal,
        "registered bootstrap token"
    );
    Ok(())
}

/// Wait for SIGINT or SIGTERM (Unix) or Ctrl+C (all platforms).
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match (
            signal(SignalKind::interrupt()),
            signal(SignalKind::terminate()),
        ) {
            (Ok(mut sigint), Ok(mut sigterm)) => {
                tokio::select! {
                    _ = sigint.recv() => tracing::info!("Received SIGINT"),
                    _ = sigterm.recv() => tracing::info!("Received SIGTERM"),
                }
            }
            _ => {
                tracing::warn!("Failed to register signal handlers, falling back to Ctrl+C");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Received Ctrl+C");
    }
}
