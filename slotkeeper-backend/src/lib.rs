pub mod auth;
pub mod config;
pub mod connections;
pub mod descriptor;
mod error;
pub mod heartbeat;
pub mod helpers;
pub mod matchmaker;
mod routes;
mod validation;

pub use error::{AppError, ErrorResponse};

use axum::{
    Router,
    http::StatusCode,
    routing::{get, post, put},
};
use slotkeeper_db::Repository;
use std::sync::Arc;
use tower_governor::{
    GovernorLayer, governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor,
};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

use crate::config::Config;
use crate::connections::ConnectionManager;
use crate::descriptor::DescriptorBuilder;
use crate::heartbeat::HeartbeatReconciler;
use crate::matchmaker::Matchmaker;

pub struct AppState {
    pub repo: Arc<dyn Repository>,
    pub matchmaker: Matchmaker,
    pub connections: ConnectionManager,
    pub heartbeat: HeartbeatReconciler,
    pub descriptors: DescriptorBuilder,
}

impl AppState {
    pub fn new(repo: Arc<dyn Repository>, config: &Config) -> Self {
        let policy = config.capacity_policy();
        Self {
            matchmaker: Matchmaker::new(repo.clone(), policy, config.default_max_players),
            connections: ConnectionManager::new(repo.clone(), policy),
            heartbeat: HeartbeatReconciler::new(repo.clone(), config.heartbeat_batch_size),
            descriptors: DescriptorBuilder::new(
                repo.clone(),
                config.orchestrator(),
                policy.reserved_slots,
            ),
            repo,
        }
    }
}

/// Rate limiting configuration
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Requests per second for matchmaking endpoints (/servers/match, /servers/find)
    pub matchmaking_per_sec: u64,
    /// Burst size for matchmaking endpoints
    pub matchmaking_burst: u32,
    /// Requests per second for player and heartbeat endpoints
    pub player_per_sec: u64,
    /// Burst size for player endpoints
    pub player_burst: u32,
    /// Requests per second for general endpoints
    pub general_per_sec: u64,
    /// Burst size for general endpoints
    pub general_burst: u32,
}

/// Replenish period for a per-second rate; the governor counts in periods.
fn period_ms(per_sec: u64) -> u64 {
    (1000 / per_sec.max(1)).max(1)
}

/// Create the application router with the given repository and configuration
pub fn create_app(repo: Arc<dyn Repository>, config: &Config) -> Router {
    let rate_limit = config.rate_limit();
    let state = Arc::new(AppState::new(repo, config));

    let matchmaking_governor = GovernorConfigBuilder::default()
        .per_millisecond(period_ms(rate_limit.matchmaking_per_sec))
        .burst_size(rate_limit.matchmaking_burst.max(1))
        .key_extractor(SmartIpKeyExtractor)
        .finish()
        .expect("non-zero period and burst size");

    let player_governor = GovernorConfigBuilder::default()
        .per_millisecond(period_ms(rate_limit.player_per_sec))
        .burst_size(rate_limit.player_burst.max(1))
        .key_extractor(SmartIpKeyExtractor)
        .finish()
        .expect("non-zero period and burst size");

    let general_governor = GovernorConfigBuilder::default()
        .per_millisecond(period_ms(rate_limit.general_per_sec))
        .burst_size(rate_limit.general_burst.max(1))
        .key_extractor(SmartIpKeyExtractor)
        .finish()
        .expect("non-zero period and burst size");

    // Strict rate limit for matchmaking - a miss provisions a server
    let matchmaking_routes = Router::new()
        .route("/servers/match", post(routes::match_server))
        .route("/servers/find", post(routes::find_server))
        .layer(GovernorLayer::new(matchmaking_governor));

    // Lenient rate limit for player endpoints - many players join/leave at once
    let player_routes = Router::new()
        .route("/servers/{id}/players", post(routes::add_player))
        .route(
            "/servers/{id}/players/{user}",
            put(routes::update_player).delete(routes::remove_player),
        )
        .route("/servers/{id}/status", post(routes::heartbeat))
        .layer(GovernorLayer::new(player_governor));

    // General rate limit for other endpoints
    let general_routes = Router::new()
        .route("/servers", post(routes::create_server))
        .route("/servers/{id}", get(routes::get_server))
        .route("/servers/{id}/endpoint", put(routes::update_endpoint))
        .route("/servers/{id}/descriptor", get(routes::descriptor))
        .route("/releases/{id}/servers", get(routes::list_servers))
        .route("/tokens", post(routes::issue_key))
        .layer(GovernorLayer::new(general_governor));

    Router::new()
        .route("/health", get(|| async { StatusCode::OK }))
        .merge(matchmaking_routes)
        .merge(player_routes)
        .merge(general_routes)
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            config.request_timeout,
        ))
        .layer(RequestBodyLimitLayer::new(config.request_body_limit))
        .with_state(state)
}
