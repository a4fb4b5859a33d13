use std::env::var;
use std::time::Duration;

use dotenvy::dotenv;
use slotkeeper_db::CapacityPolicy;
use slotkeeper_db::capacity::{DEFAULT_FRESHNESS_WINDOW_SECS, DEFAULT_RESERVED_SLOTS};

use crate::RateLimitConfig;
use crate::descriptor::{ApiEndpoint, OrchestratorSettings};
use crate::heartbeat::DEFAULT_BATCH_SIZE;

/// Application configuration with environment variable overrides
#[derive(Debug, Clone)]
pub struct Config {
    /// Request body size limit in bytes
    /// Env: REQUEST_BODY_LIMIT (default: 1048576 = 1MB)
    pub request_body_limit: usize,

    /// Request timeout in seconds
    /// Env: REQUEST_TIMEOUT_SECS (default: 30)
    pub request_timeout: Duration,

    /// Server port
    /// Env: PORT (default: 3000)
    pub port: u16,

    /// Database file path
    /// Env: DATABASE_PATH (default: "slotkeeper.db")
    pub database_path: String,

    /// Slots only admins may fill
    /// Env: RESERVED_SLOTS (default: 3)
    pub reserved_slots: u32,

    /// Seconds a connected player counts toward occupancy without a refresh
    /// Env: FRESHNESS_WINDOW_SECS (default: 60)
    pub freshness_window_secs: i64,

    /// Roster ids refreshed per storage operation during a heartbeat
    /// Env: HEARTBEAT_BATCH_SIZE (default: 100)
    pub heartbeat_batch_size: usize,

    /// Capacity of servers provisioned on demand by matchmaking
    /// Env: DEFAULT_MAX_PLAYERS (default: 100)
    pub default_max_players: u32,

    /// Rate limit for matchmaking endpoints (requests per second)
    /// Env: RATE_LIMIT_MATCHMAKING_PER_SEC (default: 5)
    /// Stricter since a miss provisions a new server
    pub rate_limit_matchmaking_per_sec: u64,

    /// Burst size for matchmaking endpoints
    /// Env: RATE_LIMIT_MATCHMAKING_BURST (default: 10)
    pub rate_limit_matchmaking_burst: u32,

    /// Rate limit for player and heartbeat endpoints (requests per second)
    /// Env: RATE_LIMIT_PLAYER_PER_SEC (default: 50)
    /// This is lenient to handle many players joining/leaving at once
    pub rate_limit_player_per_sec: u64,

    /// Burst size for player endpoints
    /// Env: RATE_LIMIT_PLAYER_BURST (default: 100)
    pub rate_limit_player_burst: u32,

    /// Rate limit for general endpoints (requests per second)
    /// Env: RATE_LIMIT_GENERAL_PER_SEC (default: 10)
    pub rate_limit_general_per_sec: u64,

    /// Burst size for general endpoints
    /// Env: RATE_LIMIT_GENERAL_BURST (default: 20)
    pub rate_limit_general_burst: u32,

    /// Env: ORCHESTRATOR_API_V1_URL / ORCHESTRATOR_API_V1_TOKEN (optional)
    pub orchestrator_api_v1: Option<ApiEndpoint>,

    /// Env: ORCHESTRATOR_API_V2_URL / ORCHESTRATOR_API_V2_TOKEN (optional)
    pub orchestrator_api_v2: Option<ApiEndpoint>,

    /// Admin api key registered at startup
    /// Env: BOOTSTRAP_ADMIN_TOKEN (optional)
    pub bootstrap_admin_token: Option<String>,

    /// Internal service api key registered at startup
    /// Env: BOOTSTRAP_INTERNAL_TOKEN (optional)
    pub bootstrap_internal_token: Option<String>,
}

impl Config {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        let _ = dotenv(); //for debugging mostly
        Self {
            request_body_limit: env_or_default("REQUEST_BODY_LIMIT", 1024 * 1024),
            request_timeout: Duration::from_secs(env_or_default("REQUEST_TIMEOUT_SECS", 30)),
            port: env_or_default("PORT", 3000),
            database_path: env_or_default_string("DATABASE_PATH", "slotkeeper.db"),
            reserved_slots: env_or_default("RESERVED_SLOTS", DEFAULT_RESERVED_SLOTS),
            freshness_window_secs: env_or_default(
                "FRESHNESS_WINDOW_SECS",
                DEFAULT_FRESHNESS_WINDOW_SECS,
            ),
            heartbeat_batch_size: env_or_default("HEARTBEAT_BATCH_SIZE", DEFAULT_BATCH_SIZE),
            default_max_players: env_or_default("DEFAULT_MAX_PLAYERS", 100),
            rate_limit_matchmaking_per_sec: env_or_default("RATE_LIMIT_MATCHMAKING_PER_SEC", 5),
            rate_limit_matchmaking_burst: env_or_default("RATE_LIMIT_MATCHMAKING_BURST", 10),
            rate_limit_player_per_sec: env_or_default("RATE_LIMIT_PLAYER_PER_SEC", 50),
            rate_limit_player_burst: env_or_default("RATE_LIMIT_PLAYER_BURST", 100),
            rate_limit_general_per_sec: env_or_default("RATE_LIMIT_GENERAL_PER_SEC", 10),
            rate_limit_general_burst: env_or_default("RATE_LIMIT_GENERAL_BURST", 20),
            orchestrator_api_v1: env_endpoint("ORCHESTRATOR_API_V1_URL", "ORCHESTRATOR_API_V1_TOKEN"),
            orchestrator_api_v2: env_endpoint("ORCHESTRATOR_API_V2_URL", "ORCHESTRATOR_API_V2_TOKEN"),
            bootstrap_admin_token: env_optional("BOOTSTRAP_ADMIN_TOKEN"),
            bootstrap_internal_token: env_optional("BOOTSTRAP_INTERNAL_TOKEN"),
        }
    }

    pub fn capacity_policy(&self) -> CapacityPolicy {
        CapacityPolicy {
            reserved_slots: self.reserved_slots,
            freshness_window: self.freshness_window_secs,
        }
    }

    pub fn rate_limit(&self) -> RateLimitConfig {
        RateLimitConfig {
            matchmaking_per_sec: self.rate_limit_matchmaking_per_sec,
            matchmaking_burst: self.rate_limit_matchmaking_burst,
            player_per_sec: self.rate_limit_player_per_sec,
            player_burst: self.rate_limit_player_burst,
            general_per_sec: self.rate_limit_general_per_sec,
            general_burst: self.rate_limit_general_burst,
        }
    }

    pub fn orchestrator(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            api_v1: self.orchestrator_api_v1.clone(),
            api_v2: self.orchestrator_api_v2.clone(),
        }
    }
}

impl Default for Config {
    /// Create configuration with all default values
    fn default() -> Self {
        Self {
            request_body_limit: 1024 * 1024, // 1 MB
            request_timeout: Duration::from_secs(30),
            port: 3000,
            database_path: "slotkeeper.db".to_string(),
            reserved_slots: DEFAULT_RESERVED_SLOTS,
            freshness_window_secs: DEFAULT_FRESHNESS_WINDOW_SECS,
            heartbeat_batch_size: DEFAULT_BATCH_SIZE,
            default_max_players: 100,
            rate_limit_matchmaking_per_sec: 5,
            rate_limit_matchmaking_burst: 10,
            rate_limit_player_per_sec: 50,
            rate_limit_player_burst: 100,
            rate_limit_general_per_sec: 10,
            rate_limit_general_burst: 20,
            orchestrator_api_v1: None,
            orchestrator_api_v2: None,
            bootstrap_admin_token: None,
            bootstrap_internal_token: None,
        }
    }
}

/// Parse environment variable or return default value
fn env_or_default<T: std::str::FromStr>(key: &str, default: T) -> T {
    var(key)
        .ok()
        .and_then(|val| val.parse().ok())
        .unwrap_or(default)
}

/// Parse environment variable string or return default value
fn env_or_default_string(key: &str, default: &str) -> String {
    var(key).unwrap_or_else(|_| default.to_string())
}

/// Non-empty environment variable, if set
fn env_optional(key: &str) -> Option<String> {
    var(key).ok().filter(|val| !val.is_empty())
}

fn env_endpoint(url_key: &str, token_key: &str) -> Option<ApiEndpoint> {
    Some(ApiEndpoint {
        url: env_optional(url_key)?,
        token: env_optional(token_key)?,
    })
}
