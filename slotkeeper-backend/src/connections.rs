//! Player connect / status update / disconnect against server capacity.

use std::sync::Arc;

use slotkeeper_db::{
    CapacityPolicy, OccupancyOp, PlayerOccupancyRecord, PlayerStatus, Repository, Requester,
};
use tracing::info;
use uuid::Uuid;

use crate::error::AppError;

#[derive(Clone)]
pub struct ConnectionManager {
    repo: Arc<dyn Repository>,
    policy: CapacityPolicy,
}

impl ConnectionManager {
    pub fn new(repo: Arc<dyn Repository>, policy: CapacityPolicy) -> Self {
        Self { repo, policy }
    }

    /// Claim a slot for `user_id`.
    ///
    /// The slot limit is taken at the requester's privilege class; the store
    /// counts live occupancy and writes in one atomic step.
    pub async fn add_player(
        &self,
        server_id: Uuid,
        user_id: Uuid,
        requester: &Requester,
        now: i64,
    ) -> Result<PlayerOccupancyRecord, AppError> {
        require_trusted(requester)?;

        let server = self.repo.get_server(server_id).await?;
        let slot_limit = self
            .policy
            .slot_limit(server.max_players, requester.privilege());

        let record = self
            .repo
            .apply_occupancy(
                server_id,
                user_id,
                OccupancyOp::Join { slot_limit },
                self.policy.freshness_window,
                now,
            )
            .await?;

        info!(%server_id, %user_id, slot_limit, "player connected");
        Ok(record)
    }

    pub async fn update_player_status(
        &self,
        server_id: Uuid,
        user_id: Uuid,
        status: &str,
        requester: &Requester,
        now: i64,
    ) -> Result<PlayerOccupancyRecord, AppError> {
        require_trusted(requester)?;
        let status: PlayerStatus = status.parse()?;

        let record = self
            .repo
            .apply_occupancy(
                server_id,
                user_id,
                OccupancyOp::SetStatus(status),
                self.policy.freshness_window,
                now,
            )
            .await?;

        info!(%server_id, %user_id, %status, "player status updated");
        Ok(record)
    }

    pub async fn remove_player(
        &self,
        server_id: Uuid,
        user_id: Uuid,
        requester: &Requester,
        now: i64,
    ) -> Result<PlayerOccupancyRecord, AppError> {
        require_trusted(requester)?;

        let record = self
            .repo
            .apply_occupancy(
                server_id,
                user_id,
                OccupancyOp::SetStatus(PlayerStatus::Disconnected),
                self.policy.freshness_window,
                now,
            )
            .await?;

        info!(%server_id, %user_id, "player disconnected");
        Ok(record)
    }
}

pub(crate) fn require_trusted(requester: &Requester) -> Result<(), AppError> {
    if requester.is_trusted() {
        Ok(())
    } else {
        Err(AppError::NoPermission)
    }
}
