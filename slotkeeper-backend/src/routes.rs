use crate::auth::{Caller, Role, issue_api_key};
use crate::error::AppError;
use crate::helpers::now;
use crate::validation;
use crate::AppState;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use axum_macros::debug_handler;
use serde::{Deserialize, Serialize};
use slotkeeper_db::{GameServerRecord, MatchCriteria, ServerCandidate};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ServerResponse {
    #[serde(flatten)]
    server: GameServerRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    live_occupancy: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    created: Option<bool>,
}

impl From<ServerCandidate> for ServerResponse {
    fn from(candidate: ServerCandidate) -> Self {
        Self {
            server: candidate.server,
            live_occupancy: Some(candidate.live_occupancy),
            created: None,
        }
    }
}

impl From<GameServerRecord> for ServerResponse {
    fn from(server: GameServerRecord) -> Self {
        Self {
            server,
            live_occupancy: None,
            created: None,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CreateServerRequest {
    #[serde(flatten)]
    criteria: MatchCriteria,
    max_players: u32,
    #[serde(default)]
    public: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct IssueKeyRequest {
    role: Role,
    user_id: Option<Uuid>,
}

#[derive(Deserialize)]
pub(crate) struct PageQuery {
    #[serde(default)]
    offset: u32,
    #[serde(default = "default_page_size")]
    limit: u32,
}

fn default_page_size() -> u32 {
    crate::matchmaker::MAX_PAGE_SIZE
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct HeartbeatRequest {
    status: String,
    message: Option<String>,
    /// Ids of the players currently online
    #[serde(default)]
    players: Vec<Uuid>,
}

#[derive(Deserialize)]
pub(crate) struct EndpointRequest {
    host: String,
    port: u16,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AddPlayerRequest {
    user_id: Uuid,
}

#[derive(Deserialize)]
pub(crate) struct PlayerStatusRequest {
    status: String,
}

#[debug_handler]
pub(crate) async fn match_server(
    State(state): State<Arc<AppState>>,
    Caller(requester): Caller,
    Json(criteria): Json<MatchCriteria>,
) -> Result<impl IntoResponse, AppError> {
    let (server, created) = state
        .matchmaker
        .match_server(&criteria, &requester, now())
        .await?;

    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    let response = ServerResponse {
        created: Some(created),
        ..ServerResponse::from(server)
    };
    Ok((status, Json(response)))
}

pub(crate) async fn find_server(
    State(state): State<Arc<AppState>>,
    Caller(requester): Caller,
    Json(criteria): Json<MatchCriteria>,
) -> Result<impl IntoResponse, AppError> {
    let candidate = state
        .matchmaker
        .find_server(&criteria, &requester, now())
        .await?;

    Ok(Json(ServerResponse::from(candidate)))
}

#[debug_handler]
pub(crate) async fn create_server(
    State(state): State<Arc<AppState>>,
    Caller(requester): Caller,
    Json(payload): Json<CreateServerRequest>,
) -> Result<impl IntoResponse, AppError> {
    validation::validate_max_players(payload.max_players)?;

    let server = state
        .matchmaker
        .create_server(
            &payload.criteria,
            payload.max_players,
            payload.public,
            &requester,
            now(),
        )
        .await?;

    Ok((StatusCode::CREATED, Json(ServerResponse::from(server))))
}

pub(crate) async fn get_server(
    State(state): State<Arc<AppState>>,
    Caller(requester): Caller,
    Path(server_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let candidate = state
        .matchmaker
        .get_server(server_id, &requester, now())
        .await?;

    Ok(Json(ServerResponse::from(candidate)))
}

pub(crate) async fn list_servers(
    State(state): State<Arc<AppState>>,
    Caller(requester): Caller,
    Path(release_id): Path<Uuid>,
    Query(page): Query<PageQuery>,
) -> Result<impl IntoResponse, AppError> {
    let servers = state
        .matchmaker
        .list_servers(release_id, page.offset, page.limit, &requester, now())
        .await?;

    let servers: Vec<ServerResponse> = servers.into_iter().map(ServerResponse::from).collect();
    Ok(Json(servers))
}

#[debug_handler]
pub(crate) async fn heartbeat(
    State(state): State<Arc<AppState>>,
    Caller(requester): Caller,
    Path(server_id): Path<Uuid>,
    Json(payload): Json<HeartbeatRequest>,
) -> Result<impl IntoResponse, AppError> {
    // Validate roster size and status message
    validation::validate_roster(&payload.players)?;
    validation::validate_status_message(payload.message.as_deref())?;

    let report = state
        .heartbeat
        .reconcile(
            server_id,
            &payload.status,
            payload.message,
            &payload.players,
            &requester,
            now(),
        )
        .await?;

    Ok(Json(report))
}

pub(crate) async fn update_endpoint(
    State(state): State<Arc<AppState>>,
    Caller(requester): Caller,
    Path(server_id): Path<Uuid>,
    Json(payload): Json<EndpointRequest>,
) -> Result<impl IntoResponse, AppError> {
    validation::validate_endpoint(&payload.host, payload.port)?;

    let server = state
        .matchmaker
        .update_endpoint(server_id, payload.host, payload.port, &requester, now())
        .await?;

    Ok(Json(ServerResponse::from(server)))
}

pub(crate) async fn descriptor(
    State(state): State<Arc<AppState>>,
    Caller(requester): Caller,
    Path(server_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let descriptor = state.descriptors.build(server_id, &requester).await?;
    Ok(Json(descriptor))
}

#[debug_handler]
pub(crate) async fn add_player(
    State(state): State<Arc<AppState>>,
    Caller(requester): Caller,
    Path(server_id): Path<Uuid>,
    Json(payload): Json<AddPlayerRequest>,
) -> Result<impl IntoResponse, AppError> {
    let record = state
        .connections
        .add_player(server_id, payload.user_id, &requester, now())
        .await?;

    Ok((StatusCode::CREATED, Json(record)))
}

pub(crate) async fn update_player(
    State(state): State<Arc<AppState>>,
    Caller(requester): Caller,
    Path((server_id, user_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<PlayerStatusRequest>,
) -> Result<impl IntoResponse, AppError> {
    let record = state
        .connections
        .update_player_status(server_id, user_id, &payload.status, &requester, now())
        .await?;

    Ok(Json(record))
}

pub(crate) async fn remove_player(
    State(state): State<Arc<AppState>>,
    Caller(requester): Caller,
    Path((server_id, user_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, AppError> {
    let record = state
        .connections
        .remove_player(server_id, user_id, &requester, now())
        .await?;

    Ok(Json(record))
}

#[debug_handler]
pub(crate) async fn issue_key(
    State(state): State<Arc<AppState>>,
    Caller(requester): Caller,
    Json(payload): Json<IssueKeyRequest>,
) -> Result<impl IntoResponse, AppError> {
    let issued = issue_api_key(
        state.repo.as_ref(),
        payload.role,
        payload.user_id,
        &requester,
        now(),
    )
    .await?;

    Ok((StatusCode::CREATED, Json(issued)))
}
