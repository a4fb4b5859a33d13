use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::capacity::Privilege;
use crate::error::{UnknownKind, UnknownStatus};

/// Who runs a game server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerKind {
  Official,
  Community,
}

impl ServerKind {
  pub fn as_str(self) -> &'static str {
    match self {
      ServerKind::Official => "official",
      ServerKind::Community => "community",
    }
  }
}

impl FromStr for ServerKind {
  type Err = UnknownKind;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "official" => Ok(ServerKind::Official),
      "community" => Ok(ServerKind::Community),
      other => Err(UnknownKind(other.to_string())),
    }
  }
}

/// Lifecycle status of a game server record.
///
/// Community servers only ever report `created`, `online` and `offline`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
  /// Created by an API request, not yet picked up by the operator.
  Created,
  /// Operator created the deployment and is waiting for the launcher.
  Launching,
  /// Launcher is downloading server files into its cache.
  Downloading,
  /// Launcher is starting the server binary.
  Starting,
  /// Running and sending heartbeats.
  Online,
  /// Shut down cleanly.
  Offline,
  /// Shut down unexpectedly.
  Error,
}

impl ServerStatus {
  pub const ALL: [ServerStatus; 7] = [
    ServerStatus::Created,
    ServerStatus::Launching,
    ServerStatus::Downloading,
    ServerStatus::Starting,
    ServerStatus::Online,
    ServerStatus::Offline,
    ServerStatus::Error,
  ];

  pub fn as_str(self) -> &'static str {
    match self {
      ServerStatus::Created => "created",
      ServerStatus::Launching => "launching",
      ServerStatus::Downloading => "downloading",
      ServerStatus::Starting => "starting",
      ServerStatus::Online => "online",
      ServerStatus::Offline => "offline",
      ServerStatus::Error => "error",
    }
  }

  /// `offline` and `error` end the life of a server instance.
  pub fn is_terminal(self) -> bool {
    matches!(self, ServerStatus::Offline | ServerStatus::Error)
  }
}

impl FromStr for ServerStatus {
  type Err = UnknownStatus;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    ServerStatus::ALL
      .into_iter()
      .find(|status| status.as_str() == s)
      .ok_or_else(|| UnknownStatus(s.to_string()))
  }
}

impl fmt::Display for ServerStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Occupancy status of a player on a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerStatus {
  Connected,
  Disconnected,
}

impl PlayerStatus {
  pub fn as_str(self) -> &'static str {
    match self {
      PlayerStatus::Connected => "connected",
      PlayerStatus::Disconnected => "disconnected",
    }
  }
}

impl FromStr for PlayerStatus {
  type Err = UnknownStatus;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "connected" => Ok(PlayerStatus::Connected),
      "disconnected" => Ok(PlayerStatus::Disconnected),
      other => Err(UnknownStatus(other.to_string())),
    }
  }
}

impl fmt::Display for PlayerStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// A provisioned (or about to be provisioned) game server instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GameServerRecord {
  pub id: Uuid,
  pub region_id: Option<Uuid>,
  pub release_id: Uuid,
  pub world_id: Uuid,
  pub game_mode_id: Option<Uuid>,
  pub kind: ServerKind,
  /// Filled in by the operator once the deployment exists.
  pub host: Option<String>,
  pub port: Option<u16>,
  pub max_players: u32,
  pub status: ServerStatus,
  pub status_message: String,
  pub public: bool,
  /// Unix timestamp
  pub created_at: i64,
  /// Unix timestamp of the last activity (status push, endpoint update)
  pub updated_at: i64,
}

/// Fields needed to insert a new game server record.
#[derive(Debug, Clone)]
pub struct NewGameServer {
  pub region_id: Option<Uuid>,
  pub release_id: Uuid,
  pub world_id: Uuid,
  pub game_mode_id: Option<Uuid>,
  pub kind: ServerKind,
  pub max_players: u32,
  pub public: bool,
}

impl NewGameServer {
  pub fn from_criteria(criteria: &MatchCriteria, max_players: u32, public: bool) -> Self {
    Self {
      region_id: criteria.region_id,
      release_id: criteria.release_id,
      world_id: criteria.world_id,
      game_mode_id: criteria.game_mode_id,
      kind: criteria.kind,
      max_players,
      public,
    }
  }
}

/// A server returned by a store query together with its live occupancy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerCandidate {
  pub server: GameServerRecord,
  pub live_occupancy: u32,
}

/// A (server, user) slot claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerOccupancyRecord {
  pub server_id: Uuid,
  pub user_id: Uuid,
  pub status: PlayerStatus,
  /// Unix timestamp of the last connect, status change or heartbeat refresh
  pub updated_at: i64,
}

impl PlayerOccupancyRecord {
  /// Whether this record currently holds a capacity slot.
  ///
  /// Connected rows older than the freshness window were abandoned without a
  /// clean disconnect and stop counting on their own.
  pub fn is_live(&self, now: i64, freshness_window: i64) -> bool {
    self.status == PlayerStatus::Connected && self.updated_at > now - freshness_window
  }
}

/// Selection criteria for finding or creating a server.
///
/// Absent region or game mode match any value.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchCriteria {
  #[serde(default)]
  pub region_id: Option<Uuid>,
  pub release_id: Uuid,
  pub world_id: Uuid,
  #[serde(default)]
  pub game_mode_id: Option<Uuid>,
  pub kind: ServerKind,
}

impl MatchCriteria {
  pub fn matches(&self, server: &GameServerRecord) -> bool {
    self.region_id.is_none_or(|region| server.region_id == Some(region))
      && server.release_id == self.release_id
      && server.world_id == self.world_id
      && self
        .game_mode_id
        .is_none_or(|mode| server.game_mode_id == Some(mode))
      && server.kind == self.kind
  }
}

/// The caller of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Requester {
  pub user_id: Uuid,
  pub is_admin: bool,
  /// Platform service acting on a player's behalf (game server processes,
  /// the operator).
  pub is_internal: bool,
}

impl Requester {
  pub fn user(user_id: Uuid) -> Self {
    Self {
      user_id,
      is_admin: false,
      is_internal: false,
    }
  }

  pub fn admin(user_id: Uuid) -> Self {
    Self {
      user_id,
      is_admin: true,
      is_internal: false,
    }
  }

  pub fn internal(user_id: Uuid) -> Self {
    Self {
      user_id,
      is_admin: false,
      is_internal: true,
    }
  }

  /// Admins and internal services pass the privileged-operation gates.
  pub fn is_trusted(&self) -> bool {
    self.is_admin || self.is_internal
  }

  /// Reserved slots are only handed out to admins.
  pub fn privilege(&self) -> Privilege {
    if self.is_admin {
      Privilege::Privileged
    } else {
      Privilege::Ordinary
    }
  }
}

/// Access flags a user holds on an entity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccessGrant {
  pub is_owner: bool,
  pub can_view: bool,
  pub can_edit: bool,
  pub can_delete: bool,
}

impl AccessGrant {
  pub fn viewer() -> Self {
    Self {
      can_view: true,
      ..Self::default()
    }
  }

  pub fn owner() -> Self {
    Self {
      is_owner: true,
      can_view: true,
      can_edit: true,
      can_delete: true,
    }
  }

  pub fn allows_view(&self) -> bool {
    self.is_owner || self.can_view
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_unknown_literals_name_what_was_wrong() {
    assert_eq!("official".parse::<ServerKind>(), Ok(ServerKind::Official));
    let kind = "modded".parse::<ServerKind>().unwrap_err();
    assert_eq!(kind, UnknownKind("modded".into()));
    assert!(kind.to_string().contains("server kind"));

    let status = "paused".parse::<ServerStatus>().unwrap_err();
    assert_eq!(status, UnknownStatus("paused".into()));
    assert!("afk".parse::<PlayerStatus>().is_err());
  }
}
