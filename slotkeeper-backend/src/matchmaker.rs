//! Find-or-create of game servers for matchmaking criteria.

use std::sync::Arc;

use slotkeeper_db::{
    CapacityPolicy, GameServerRecord, MatchCriteria, NewGameServer, Repository, Requester,
    ServerCandidate,
};
use tracing::{debug, info};
use uuid::Uuid;

use crate::connections::require_trusted;
use crate::error::AppError;

/// Largest page [`Matchmaker::list_servers`] returns.
pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Clone)]
pub struct Matchmaker {
    repo: Arc<dyn Repository>,
    policy: CapacityPolicy,
    /// Capacity of servers provisioned by [`Matchmaker::match_server`].
    default_max_players: u32,
}

impl Matchmaker {
    pub fn new(repo: Arc<dyn Repository>, policy: CapacityPolicy, default_max_players: u32) -> Self {
        Self {
            repo,
            policy,
            default_max_players,
        }
    }

    /// First eligible server for `criteria`, most recently updated first.
    ///
    /// Terminal servers, servers without room at the requester's privilege
    /// class, and servers the requester may not see are skipped. Returns
    /// [`AppError::NoRows`] when nothing qualifies.
    pub async fn find_server(
        &self,
        criteria: &MatchCriteria,
        requester: &Requester,
        now: i64,
    ) -> Result<ServerCandidate, AppError> {
        let candidates = self
            .repo
            .find_servers(criteria, self.policy.freshness_window, now)
            .await?;
        let privilege = requester.privilege();

        for candidate in candidates {
            let server = &candidate.server;
            if server.status.is_terminal() {
                continue;
            }
            if !self
                .policy
                .has_room(candidate.live_occupancy, server.max_players, privilege)
            {
                continue;
            }
            if !self.is_visible(server, requester).await? {
                continue;
            }

            debug!(server_id = %server.id, live = candidate.live_occupancy, "matched existing server");
            return Ok(candidate);
        }

        Err(AppError::NoRows)
    }

    pub async fn create_server(
        &self,
        criteria: &MatchCriteria,
        max_players: u32,
        public: bool,
        requester: &Requester,
        now: i64,
    ) -> Result<GameServerRecord, AppError> {
        require_trusted(requester)?;
        self.provision(criteria, max_players, public, now).await
    }

    /// Find a server or provision one. The flag is `true` when the record was
    /// created by this call.
    pub async fn match_server(
        &self,
        criteria: &MatchCriteria,
        requester: &Requester,
        now: i64,
    ) -> Result<(GameServerRecord, bool), AppError> {
        match self.find_server(criteria, requester, now).await {
            Ok(candidate) => Ok((candidate.server, false)),
            Err(AppError::NoRows) => {
                // Provisioning on a miss is the platform's decision, not the caller's.
                let server = self
                    .provision(criteria, self.default_max_players, true, now)
                    .await?;
                Ok((server, true))
            }
            Err(e) => Err(e),
        }
    }

    /// The server with its live occupancy. Servers the requester may not see
    /// are reported as not found.
    pub async fn get_server(
        &self,
        id: Uuid,
        requester: &Requester,
        now: i64,
    ) -> Result<ServerCandidate, AppError> {
        let server = self.repo.get_server(id).await?;
        if !self.is_visible(&server, requester).await? {
            return Err(AppError::ServerNotFound);
        }

        let live_occupancy = self
            .repo
            .count_live_occupancy(id, self.policy.freshness_window, now)
            .await?;
        Ok(ServerCandidate {
            server,
            live_occupancy,
        })
    }

    pub async fn list_servers(
        &self,
        release_id: Uuid,
        offset: u32,
        limit: u32,
        requester: &Requester,
        now: i64,
    ) -> Result<Vec<ServerCandidate>, AppError> {
        let viewer = (!requester.is_admin).then_some(requester.user_id);
        let limit = limit.clamp(1, MAX_PAGE_SIZE);

        let servers = self
            .repo
            .list_servers(
                release_id,
                viewer,
                offset,
                limit,
                self.policy.freshness_window,
                now,
            )
            .await?;
        Ok(servers)
    }

    /// Record where the deployed server process listens.
    pub async fn update_endpoint(
        &self,
        id: Uuid,
        host: String,
        port: u16,
        requester: &Requester,
        now: i64,
    ) -> Result<GameServerRecord, AppError> {
        require_trusted(requester)?;
        self.repo.set_server_endpoint(id, host, port, now).await?;

        let server = self.repo.get_server(id).await?;
        info!(server_id = %id, port, "server endpoint assigned");
        Ok(server)
    }

    async fn provision(
        &self,
        criteria: &MatchCriteria,
        max_players: u32,
        public: bool,
        now: i64,
    ) -> Result<GameServerRecord, AppError> {
        let id = self
            .repo
            .create_server(
                NewGameServer::from_criteria(criteria, max_players, public),
                now,
            )
            .await?;
        let server = self.repo.get_server(id).await?;

        info!(server_id = %id, max_players, public, "provisioned game server");
        Ok(server)
    }

    async fn is_visible(
        &self,
        server: &GameServerRecord,
        requester: &Requester,
    ) -> Result<bool, AppError> {
        if requester.is_admin || server.public {
            return Ok(true);
        }
        Ok(self.repo.can_view(server.id, requester.user_id).await?)
    }
}
