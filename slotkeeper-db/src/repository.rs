//! The storage port consumed by the matchmaking and connection services.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::lifecycle::OccupancyOp;
use crate::models::{
    AccessGrant, GameServerRecord, MatchCriteria, NewGameServer, PlayerOccupancyRecord,
    PlayerStatus, Requester, ServerCandidate, ServerStatus,
};

/// Read/write access to server records, occupancy records and access facts.
///
/// Implementations must make [`Repository::apply_occupancy`] atomic with
/// respect to every other occupancy write on the same server: the live count,
/// the current record and the write are one unit. Timestamps are unix seconds
/// supplied by the caller.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Servers matching `criteria`, most recently updated first.
    async fn find_servers(
        &self,
        criteria: &MatchCriteria,
        freshness_window: i64,
        now: i64,
    ) -> Result<Vec<ServerCandidate>>;

    /// Returns [`crate::DbError::ServerNotFound`] for unknown ids.
    async fn get_server(&self, id: Uuid) -> Result<GameServerRecord>;

    /// Inserts a record in status `created` with no endpoint.
    async fn create_server(&self, server: NewGameServer, now: i64) -> Result<Uuid>;

    /// Sets the status (and optionally the message) and bumps `updated_at`.
    async fn update_server_status(
        &self,
        id: Uuid,
        status: ServerStatus,
        message: Option<String>,
        now: i64,
    ) -> Result<()>;

    async fn set_server_endpoint(&self, id: Uuid, host: String, port: u16, now: i64)
    -> Result<()>;

    /// Servers of a release, newest first. `viewer` restricts the result to
    /// public servers and servers the viewer may see; `None` is unrestricted.
    async fn list_servers(
        &self,
        release_id: Uuid,
        viewer: Option<Uuid>,
        offset: u32,
        limit: u32,
        freshness_window: i64,
        now: i64,
    ) -> Result<Vec<ServerCandidate>>;

    async fn get_occupancy(
        &self,
        server_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<PlayerOccupancyRecord>>;

    /// Atomically evaluate `op` with [`crate::lifecycle::next_occupancy`] and
    /// write the resulting record.
    async fn apply_occupancy(
        &self,
        server_id: Uuid,
        user_id: Uuid,
        op: OccupancyOp,
        freshness_window: i64,
        now: i64,
    ) -> Result<PlayerOccupancyRecord>;

    /// Unconditional write of an occupancy record.
    async fn upsert_occupancy(
        &self,
        server_id: Uuid,
        user_id: Uuid,
        status: PlayerStatus,
        now: i64,
    ) -> Result<()>;

    /// Mark the existing records of `user_ids` connected as of `now`.
    /// Unknown users are skipped and duplicates count once. Returns rows touched.
    async fn refresh_occupants(&self, server_id: Uuid, user_ids: &[Uuid], now: i64)
    -> Result<u64>;

    async fn count_live_occupancy(
        &self,
        server_id: Uuid,
        freshness_window: i64,
        now: i64,
    ) -> Result<u32>;

    async fn grant_access(&self, entity_id: Uuid, user_id: Uuid, grant: AccessGrant)
    -> Result<()>;

    /// Owner or can-view grant. Entity visibility flags are not considered.
    async fn can_view(&self, entity_id: Uuid, user_id: Uuid) -> Result<bool>;

    async fn issue_token(&self, token_hash: String, requester: Requester, now: i64) -> Result<()>;

    async fn requester_by_token(&self, token_hash: String) -> Result<Option<Requester>>;
}
