//! Status transitions for game servers and player occupancy.
//!
//! Server status pushes come from the operator and the launcher, so any known
//! status is accepted; out-of-order pushes are classified as anomalies for the
//! caller to log. Occupancy transitions are strict and are evaluated by the
//! stores inside their atomic sections.

use crate::error::DbError;
use crate::models::{PlayerOccupancyRecord, PlayerStatus, ServerStatus};

/// How a server status push relates to the expected forward order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerTransition {
    /// Same status pushed again (heartbeats).
    Unchanged,
    /// Moves forward along created → launching → downloading → starting → online → offline | error.
    Forward,
    /// Backwards, or out of a terminal status.
    Anomalous,
}

fn rank(status: ServerStatus) -> u8 {
    match status {
        ServerStatus::Created => 0,
        ServerStatus::Launching => 1,
        ServerStatus::Downloading => 2,
        ServerStatus::Starting => 3,
        ServerStatus::Online => 4,
        ServerStatus::Offline | ServerStatus::Error => 5,
    }
}

pub fn classify_server_transition(from: ServerStatus, to: ServerStatus) -> ServerTransition {
    if from == to {
        return ServerTransition::Unchanged;
    }
    if from.is_terminal() {
        return ServerTransition::Anomalous;
    }
    if rank(to) > rank(from) {
        ServerTransition::Forward
    } else {
        ServerTransition::Anomalous
    }
}

/// A requested change to a (server, user) occupancy record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OccupancyOp {
    /// Claim a slot; admitted while live occupancy is below `slot_limit`.
    Join { slot_limit: u32 },
    /// Overwrite the status of a currently connected record.
    SetStatus(PlayerStatus),
}

/// Decide the next status of an occupancy record.
///
/// `live_occupancy` is the number of live records on the server, read in the
/// same atomic section as `current`. Freshness only affects that count: a
/// connected record blocks a join however old it is.
pub fn next_occupancy(
    current: Option<&PlayerOccupancyRecord>,
    op: OccupancyOp,
    live_occupancy: u32,
) -> Result<PlayerStatus, DbError> {
    match op {
        OccupancyOp::Join { slot_limit } => {
            if current.is_some_and(|record| record.status == PlayerStatus::Connected) {
                return Err(DbError::PlayerAlreadyConnected);
            }
            if live_occupancy >= slot_limit {
                return Err(DbError::NoFreeSlots);
            }
            Ok(PlayerStatus::Connected)
        }
        OccupancyOp::SetStatus(status) => match current {
            Some(record) if record.status == PlayerStatus::Connected => Ok(status),
            _ => Err(DbError::PlayerNotConnected),
        },
    }
}
