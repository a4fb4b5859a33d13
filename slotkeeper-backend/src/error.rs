use axum::{
  Json,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use serde::Serialize;
use slotkeeper_db::{DbError, UnknownStatus};
use thiserror::Error;

/// API error response structure
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
  pub error: String,
  pub kind: &'static str,
}

impl ErrorResponse {
  pub fn new(error: impl Into<String>, kind: &'static str) -> Self {
    Self {
      error: error.into(),
      kind,
    }
  }
}

/// Application error type
#[derive(Debug, Error)]
pub enum AppError {
  #[error("no requester identity supplied")]
  NoRequester,

  #[error("invalid or unknown api key")]
  InvalidApiKey,

  #[error("requester lacks permission for this operation")]
  NoPermission,

  #[error("invalid status '{0}'")]
  InvalidStatus(String),

  #[error("player not connected to server")]
  PlayerNotConnected,

  #[error("player already connected to server")]
  PlayerAlreadyConnected,

  #[error("no free slots on server")]
  NoFreeSlots,

  /// No server matches; the matchmaker treats this as the signal to provision.
  #[error("no matching server available")]
  NoRows,

  #[error("game server not found")]
  ServerNotFound,

  #[error("{0}")]
  Validation(String),

  #[error("orchestrator descriptor unavailable: {0}")]
  DescriptorUnavailable(String),

  #[error("storage error: {0}")]
  Database(DbError),
}

impl AppError {
  /// Stable snake_case identifier sent to clients.
  pub fn kind(&self) -> &'static str {
    match self {
      AppError::NoRequester => "no_requester",
      AppError::InvalidApiKey => "invalid_api_key",
      AppError::NoPermission => "no_permission",
      AppError::InvalidStatus(_) => "invalid_status",
      AppError::PlayerNotConnected => "player_not_connected",
      AppError::PlayerAlreadyConnected => "player_already_connected",
      AppError::NoFreeSlots => "no_free_slots",
      AppError::NoRows => "no_rows",
      AppError::ServerNotFound => "server_not_found",
      AppError::Validation(_) => "validation",
      AppError::DescriptorUnavailable(_) => "descriptor_unavailable",
      AppError::Database(_) => "internal",
    }
  }

  pub fn status_code(&self) -> StatusCode {
    match self {
      AppError::InvalidStatus(_) | AppError::Validation(_) => StatusCode::BAD_REQUEST,
      AppError::NoRequester | AppError::InvalidApiKey => StatusCode::UNAUTHORIZED,
      AppError::NoPermission => StatusCode::FORBIDDEN,
      AppError::NoRows | AppError::ServerNotFound => StatusCode::NOT_FOUND,
      AppError::PlayerNotConnected | AppError::PlayerAlreadyConnected | AppError::NoFreeSlots => {
        StatusCode::CONFLICT
      }
      AppError::DescriptorUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
      AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
  }
}

impl IntoResponse for AppError {
  fn into_response(self) -> Response {
    let status = self.status_code();
    let message = match &self {
      AppError::Database(db_err) => {
        // Don't expose internal database errors
        tracing::error!(?db_err, "Internal database error");
        "An internal error occurred. Please try again later.".to_string()
      }
      AppError::Validation(msg) => {
        tracing::warn!(validation_error = %msg, "Validation failed");
        msg.clone()
      }
      AppError::DescriptorUnavailable(reason) => {
        tracing::warn!(%reason, "Descriptor requested without orchestrator settings");
        self.to_string()
      }
      other => {
        tracing::debug!(kind = other.kind(), "Request rejected");
        other.to_string()
      }
    };

    let error_response = ErrorResponse::new(message, self.kind());
    (status, Json(error_response)).into_response()
  }
}

impl From<DbError> for AppError {
  fn from(err: DbError) -> Self {
    match err {
      DbError::ServerNotFound => AppError::ServerNotFound,
      DbError::PlayerAlreadyConnected => AppError::PlayerAlreadyConnected,
      DbError::PlayerNotConnected => AppError::PlayerNotConnected,
      DbError::NoFreeSlots => AppError::NoFreeSlots,
      other => AppError::Database(other),
    }
  }
}

impl From<crate::validation::ValidationError> for AppError {
  fn from(err: crate::validation::ValidationError) -> Self {
    AppError::Validation(err.to_string())
  }
}

impl From<UnknownStatus> for AppError {
  fn from(err: UnknownStatus) -> Self {
    AppError::InvalidStatus(err.0)
  }
}
