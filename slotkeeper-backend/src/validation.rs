/// Input validation functions for all backend routes
use thiserror::Error;
use uuid::Uuid;

pub const MAX_ROSTER_SIZE: usize = 10_000;
pub const MAX_HOST_LEN: usize = 253;
pub const MAX_PLAYERS_LIMIT: u32 = 1000;
pub const MAX_STATUS_MESSAGE_LEN: usize = 512;

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("Roster too large (max {max} players, got {actual})")]
    RosterTooLarge { max: usize, actual: usize },

    #[error("Host cannot be empty")]
    HostEmpty,

    #[error("Host too long (max 253 characters, got {0})")]
    HostTooLong(usize),

    #[error("Host contains whitespace or control characters")]
    HostInvalidChars,

    #[error("Port must be non-zero")]
    PortZero,

    #[error("Max players too large (max {max}, got {actual})")]
    MaxPlayersTooLarge { max: u32, actual: u32 },

    #[error("Status message too long (max 512 characters, got {0})")]
    StatusMessageTooLong(usize),
}

/// Validates a heartbeat roster
///
/// Rules:
/// - Max 10000 ids per request (prevents DOS)
pub fn validate_roster(players: &[Uuid]) -> Result<(), ValidationError> {
    if players.len() > MAX_ROSTER_SIZE {
        return Err(ValidationError::RosterTooLarge {
            max: MAX_ROSTER_SIZE,
            actual: players.len(),
        });
    }

    Ok(())
}

/// Validates the network endpoint an operator assigns to a server
///
/// Rules:
/// - Host cannot be empty, max 253 characters (DNS name limit)
/// - Host has no whitespace or control characters
/// - Port cannot be 0
pub fn validate_endpoint(host: &str, port: u16) -> Result<(), ValidationError> {
    if host.is_empty() {
        return Err(ValidationError::HostEmpty);
    }

    if host.len() > MAX_HOST_LEN {
        return Err(ValidationError::HostTooLong(host.len()));
    }

    if host.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(ValidationError::HostInvalidChars);
    }

    if port == 0 {
        return Err(ValidationError::PortZero);
    }

    Ok(())
}

pub fn validate_max_players(max_players: u32) -> Result<(), ValidationError> {
    if max_players > MAX_PLAYERS_LIMIT {
        return Err(ValidationError::MaxPlayersTooLarge {
            max: MAX_PLAYERS_LIMIT,
            actual: max_players,
        });
    }

    Ok(())
}

pub fn validate_status_message(message: Option<&str>) -> Result<(), ValidationError> {
    match message {
        Some(message) if message.chars().count() > MAX_STATUS_MESSAGE_LEN => Err(
            ValidationError::StatusMessageTooLong(message.chars().count()),
        ),
        _ => Ok(()),
    }
}
