//! In-memory store.
//!
//! Each server entry owns its occupancy records, so an exclusive entry update
//! in the scc map is the atomic unit for admissions. Intended for tests and
//! single-process deployments; nothing survives a restart.

use async_trait::async_trait;
use scc::HashMap;
use tracing::debug;
use uuid::Uuid;

use crate::capacity::live_occupancy;
use crate::error::{DbError, Result};
use crate::lifecycle::{self, OccupancyOp};
use crate::models::{
    AccessGrant, GameServerRecord, MatchCriteria, NewGameServer, PlayerOccupancyRecord,
    PlayerStatus, Requester, ServerCandidate, ServerStatus,
};
use crate::repository::Repository;

/// A server record and the players that ever joined it.
struct ServerState {
    record: GameServerRecord,
    /// Small N, so a Vec scan beats hashing.
    players: Vec<PlayerOccupancyRecord>,
}

impl ServerState {
    fn candidate(&self, freshness_window: i64, now: i64) -> ServerCandidate {
        ServerCandidate {
            server: self.record.clone(),
            live_occupancy: live_occupancy(&self.players, now, freshness_window),
        }
    }

    fn player_index(&self, user_id: Uuid) -> Option<usize> {
        self.players.iter().position(|p| p.user_id == user_id)
    }

    fn put_player(&mut self, record: PlayerOccupancyRecord) {
        match self.player_index(record.user_id) {
            Some(idx) => self.players[idx] = record,
            None => self.players.push(record),
        }
    }
}

#[derive(Default)]
pub struct MemoryStore {
    servers: HashMap<Uuid, ServerState>,
    /// Keyed by (entity, user)
    access: HashMap<(Uuid, Uuid), AccessGrant>,
    /// Keyed by token hash
    tokens: HashMap<String, Requester>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot every server into candidates, keeping those `filter` accepts.
    async fn collect(
        &self,
        freshness_window: i64,
        now: i64,
        filter: impl Fn(&GameServerRecord) -> bool,
    ) -> Vec<ServerCandidate> {
        let mut found = Vec::new();
        self.servers
            .retain_async(|_, state| {
                if filter(&state.record) {
                    found.push(state.candidate(freshness_window, now));
                }
                true
            })
            .await;
        newest_first(&mut found);
        found
    }
}

fn newest_first(candidates: &mut [ServerCandidate]) {
    candidates.sort_by(|a, b| {
        b.server
            .updated_at
            .cmp(&a.server.updated_at)
            .then(b.server.created_at.cmp(&a.server.created_at))
    });
}

#[async_trait]
impl Repository for MemoryStore {
    async fn find_servers(
        &self,
        criteria: &MatchCriteria,
        freshness_window: i64,
        now: i64,
    ) -> Result<Vec<ServerCandidate>> {
        Ok(self
            .collect(freshness_window, now, |server| criteria.matches(server))
            .await)
    }

    async fn get_server(&self, id: Uuid) -> Result<GameServerRecord> {
        self.servers
            .read_async(&id, |_, state| state.record.clone())
            .await
            .ok_or(DbError::ServerNotFound)
    }

    async fn create_server(&self, server: NewGameServer, now: i64) -> Result<Uuid> {
        let mut id = Uuid::new_v4();
        let record = GameServerRecord {
            id,
            region_id: server.region_id,
            release_id: server.release_id,
            world_id: server.world_id,
            game_mode_id: server.game_mode_id,
            kind: server.kind,
            host: None,
            port: None,
            max_players: server.max_players,
            status: ServerStatus::Created,
            status_message: String::new(),
            public: server.public,
            created_at: now,
            updated_at: now,
        };
        let mut state = ServerState {
            record,
            players: Vec::new(),
        };
        while let Err((_, rejected)) = self.servers.insert_async(id, state).await {
            id = Uuid::new_v4();
            state = rejected;
            state.record.id = id;
        }

        debug!(%id, "created game server");
        Ok(id)
    }

    async fn update_server_status(
        &self,
        id: Uuid,
        status: ServerStatus,
        message: Option<String>,
        now: i64,
    ) -> Result<()> {
        self.servers
            .update_async(&id, |_, state| {
                state.record.status = status;
                if let Some(message) = message {
                    state.record.status_message = message;
                }
                state.record.updated_at = now;
            })
            .await
            .ok_or(DbError::ServerNotFound)
    }

    async fn set_server_endpoint(
        &self,
        id: Uuid,
        host: String,
        port: u16,
        now: i64,
    ) -> Result<()> {
        self.servers
            .update_async(&id, |_, state| {
                state.record.host = Some(host);
                state.record.port = Some(port);
                state.record.updated_at = now;
            })
            .await
            .ok_or(DbError::ServerNotFound)
    }

    async fn list_servers(
        &self,
        release_id: Uuid,
        viewer: Option<Uuid>,
        offset: u32,
        limit: u32,
        freshness_window: i64,
        now: i64,
    ) -> Result<Vec<ServerCandidate>> {
        let candidates = self
            .collect(freshness_window, now, |server| server.release_id == release_id)
            .await;

        let mut visible = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let allowed = match viewer {
                None => true,
                Some(_) if candidate.server.public => true,
                Some(user_id) => self.can_view(candidate.server.id, user_id).await?,
            };
            if allowed {
                visible.push(candidate);
            }
        }

        Ok(visible
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    async fn get_occupancy(
        &self,
        server_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<PlayerOccupancyRecord>> {
        self.servers
            .read_async(&server_id, |_, state| {
                state
                    .player_index(user_id)
                    .map(|idx| state.players[idx].clone())
            })
            .await
            .ok_or(DbError::ServerNotFound)
    }

    async fn apply_occupancy(
        &self,
        server_id: Uuid,
        user_id: Uuid,
        op: OccupancyOp,
        freshness_window: i64,
        now: i64,
    ) -> Result<PlayerOccupancyRecord> {
        let record = self
            .servers
            .update_async(&server_id, |_, state| {
                let live = live_occupancy(&state.players, now, freshness_window);
                let current = state.player_index(user_id).map(|idx| &state.players[idx]);
                let status =
                    lifecycle::next_occupancy(current, op, live)?;

                let record = PlayerOccupancyRecord {
                    server_id,
                    user_id,
                    status,
                    updated_at: now,
                };
                state.put_player(record.clone());
                Ok::<_, DbError>(record)
            })
            .await
            .ok_or(DbError::ServerNotFound)??;

        debug!(%server_id, %user_id, status = %record.status, "applied occupancy");
        Ok(record)
    }

    async fn upsert_occupancy(
        &self,
        server_id: Uuid,
        user_id: Uuid,
        status: PlayerStatus,
        now: i64,
    ) -> Result<()> {
        self.servers
            .update_async(&server_id, |_, state| {
                state.put_player(PlayerOccupancyRecord {
                    server_id,
                    user_id,
                    status,
                    updated_at: now,
                });
            })
            .await
            .ok_or(DbError::ServerNotFound)
    }

    async fn refresh_occupants(
        &self,
        server_id: Uuid,
        user_ids: &[Uuid],
        now: i64,
    ) -> Result<u64> {
        self.servers
            .update_async(&server_id, |_, state| {
                let mut touched = 0;
                for player in state.players.iter_mut() {
                    if user_ids.contains(&player.user_id) {
                        player.status = PlayerStatus::Connected;
                        player.updated_at = now;
                        touched += 1;
                    }
                }
                touched
            })
            .await
            .ok_or(DbError::ServerNotFound)
    }

    async fn count_live_occupancy(
        &self,
        server_id: Uuid,
        freshness_window: i64,
        now: i64,
    ) -> Result<u32> {
        self.servers
            .read_async(&server_id, |_, state| {
                live_occupancy(&state.players, now, freshness_window)
            })
            .await
            .ok_or(DbError::ServerNotFound)
    }

    async fn grant_access(
        &self,
        entity_id: Uuid,
        user_id: Uuid,
        grant: AccessGrant,
    ) -> Result<()> {
        // The entry stays locked between the lookup and the write.
        self.access
            .entry_async((entity_id, user_id))
            .await
            .and_modify(|existing| *existing = grant)
            .or_insert(grant);
        Ok(())
    }

    async fn can_view(&self, entity_id: Uuid, user_id: Uuid) -> Result<bool> {
        Ok(self
            .access
            .read_async(&(entity_id, user_id), |_, grant| grant.allows_view())
            .await
            .unwrap_or(false))
    }

    async fn issue_token(&self, token_hash: String, requester: Requester, _now: i64) -> Result<()> {
        self.tokens
            .entry_async(token_hash)
            .await
            .and_modify(|existing| *existing = requester)
            .or_insert(requester);
        Ok(())
    }

    async fn requester_by_token(&self, token_hash: String) -> Result<Option<Requester>> {
        Ok(self
            .tokens
            .read_async(&token_hash, |_, requester| *requester)
            .await)
    }
}
