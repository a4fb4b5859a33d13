//! Heartbeat reconciliation with a store that fails selected batches.

use async_trait::async_trait;
use slotkeeper_backend::heartbeat::HeartbeatReconciler;
use slotkeeper_db::lifecycle::OccupancyOp;
use slotkeeper_db::{
    AccessGrant, DbError, GameServerRecord, MatchCriteria, MemoryStore, NewGameServer,
    PlayerOccupancyRecord, PlayerStatus, Repository, Requester, Result, ServerCandidate,
    ServerKind, ServerStatus,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio_rusqlite::rusqlite;
use uuid::Uuid;

const NOW: i64 = 1_700_000_000;

/// Delegates to a [`MemoryStore`] but fails the listed `refresh_occupants` calls.
struct FlakyStore {
    inner: MemoryStore,
    refresh_calls: AtomicUsize,
    failing_calls: Vec<usize>,
}

impl FlakyStore {
    fn failing(failing_calls: Vec<usize>) -> Self {
        Self {
            inner: MemoryStore::new(),
            refresh_calls: AtomicUsize::new(0),
            failing_calls,
        }
    }
}

#[async_trait]
impl Repository for FlakyStore {
    async fn find_servers(
        &self,
        criteria: &MatchCriteria,
        freshness_window: i64,
        now: i64,
    ) -> Result<Vec<ServerCandidate>> {
        self.inner.find_servers(criteria, freshness_window, now).await
    }

    async fn get_server(&self, id: Uuid) -> Result<GameServerRecord> {
        self.inner.get_server(id).await
    }

    async fn create_server(&self, server: NewGameServer, now: i64) -> Result<Uuid> {
        self.inner.create_server(server, now).await
    }

    async fn update_server_status(
        &self,
        id: Uuid,
        status: ServerStatus,
        message: Option<String>,
        now: i64,
    ) -> Result<()> {
        self.inner.update_server_status(id, status, message, now).await
    }

    async fn set_server_endpoint(&self, id: Uuid, host: String, port: u16, now: i64) -> Result<()> {
        self.inner.set_server_endpoint(id, host, port, now).await
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
        self.inner
            .list_servers(release_id, viewer, offset, limit, freshness_window, now)
            .await
    }

    async fn get_occupancy(
        &self,
        server_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<PlayerOccupancyRecord>> {
        self.inner.get_occupancy(server_id, user_id).await
    }

    async fn apply_occupancy(
        &self,
        server_id: Uuid,
        user_id: Uuid,
        op: OccupancyOp,
        freshness_window: i64,
        now: i64,
    ) -> Result<PlayerOccupancyRecord> {
        self.inner
            .apply_occupancy(server_id, user_id, op, freshness_window, now)
            .await
    }

    async fn upsert_occupancy(
        &self,
        server_id: Uuid,
        user_id: Uuid,
        status: PlayerStatus,
        now: i64,
    ) -> Result<()> {
        self.inner.upsert_occupancy(server_id, user_id, status, now).await
    }

    async fn refresh_occupants(&self, server_id: Uuid, user_ids: &[Uuid], now: i64) -> Result<u64> {
        let call = self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_calls.contains(&call) {
            return Err(DbError::Sqlite(rusqlite::Error::InvalidQuery));
        }
        self.inner.refresh_occupants(server_id, user_ids, now).await
    }

    async fn count_live_occupancy(
        &self,
        server_id: Uuid,
        freshness_window: i64,
        now: i64,
    ) -> Result<u32> {
        self.inner
            .count_live_occupancy(server_id, freshness_window, now)
            .await
    }

    async fn grant_access(&self, entity_id: Uuid, user_id: Uuid, grant: AccessGrant) -> Result<()> {
        self.inner.grant_access(entity_id, user_id, grant).await
    }

    async fn can_view(&self, entity_id: Uuid, user_id: Uuid) -> Result<bool> {
        self.inner.can_view(entity_id, user_id).await
    }

    async fn issue_token(&self, token_hash: String, requester: Requester, now: i64) -> Result<()> {
        self.inner.issue_token(token_hash, requester, now).await
    }

    async fn requester_by_token(&self, token_hash: String) -> Result<Option<Requester>> {
        self.inner.requester_by_token(token_hash).await
    }
}

async fn seed(store: &FlakyStore, roster: usize) -> (Uuid, Vec<Uuid>) {
    let criteria = MatchCriteria {
        region_id: None,
        release_id: Uuid::new_v4(),
        world_id: Uuid::new_v4(),
        game_mode_id: None,
        kind: ServerKind::Official,
    };
    let server = store
        .create_server(NewGameServer::from_criteria(&criteria, 1000, true), NOW)
        .await
        .unwrap();

    let players: Vec<Uuid> = (0..roster).map(|_| Uuid::new_v4()).collect();
    for player in &players {
        store
            .upsert_occupancy(server, *player, PlayerStatus::Connected, NOW)
            .await
            .unwrap();
    }
    (server, players)
}

#[tokio::test]
async fn test_failed_batch_does_not_stop_later_batches() {
    // GIVEN: 250 connected players and a store that fails the second batch
    let store = Arc::new(FlakyStore::failing(vec![1]));
    let (server, players) = seed(&store, 250).await;
    let reconciler = HeartbeatReconciler::new(store.clone(), 100);
    let internal = Requester::internal(Uuid::new_v4());

    // WHEN: The server reports the full roster
    let report = reconciler
        .reconcile(server, "online", None, &players, &internal, NOW + 50)
        .await
        .unwrap();

    // THEN: Three batches ran and only the second failed
    assert_eq!(report.batches, 3);
    assert_eq!(report.failed_batches, vec![1]);
    assert_eq!(report.refreshed, 150);

    // AND: Batches 1 and 3 were refreshed, batch 2 kept its old timestamp
    for (i, player) in players.iter().enumerate() {
        let record = store.get_occupancy(server, *player).await.unwrap().unwrap();
        let expected = if (100..200).contains(&i) { NOW } else { NOW + 50 };
        assert_eq!(record.updated_at, expected, "player {i}");
    }
    assert_eq!(store.count_live_occupancy(server, 60, NOW + 90).await.unwrap(), 150);

    // AND: The status push itself was applied
    let record = store.get_server(server).await.unwrap();
    assert_eq!(record.status, ServerStatus::Online);
}

#[tokio::test]
async fn test_next_heartbeat_repairs_failed_batch() {
    // GIVEN: A first heartbeat whose only batch failed
    let store = Arc::new(FlakyStore::failing(vec![0]));
    let (server, players) = seed(&store, 40).await;
    let reconciler = HeartbeatReconciler::new(store.clone(), 100);
    let internal = Requester::internal(Uuid::new_v4());

    let report = reconciler
        .reconcile(server, "online", None, &players, &internal, NOW + 30)
        .await
        .unwrap();
    assert_eq!(report.failed_batches, vec![0]);

    // WHEN: The next heartbeat arrives
    let report = reconciler
        .reconcile(server, "online", None, &players, &internal, NOW + 55)
        .await
        .unwrap();

    // THEN: Everyone is refreshed
    assert!(report.failed_batches.is_empty());
    assert_eq!(report.refreshed, 40);
    assert_eq!(store.count_live_occupancy(server, 60, NOW + 100).await.unwrap(), 40);
}

#[tokio::test]
async fn test_empty_roster_only_updates_status() {
    // GIVEN: A server with no players
    let store = Arc::new(FlakyStore::failing(vec![]));
    let (server, _) = seed(&store, 0).await;
    let reconciler = HeartbeatReconciler::new(store.clone(), 100);
    let internal = Requester::internal(Uuid::new_v4());

    // WHEN: It reports it is starting
    let report = reconciler
        .reconcile(server, "starting", Some("booting".into()), &[], &internal, NOW + 5)
        .await
        .unwrap();

    // THEN: No batches ran
    assert_eq!(report.batches, 0);
    let record = store.get_server(server).await.unwrap();
    assert_eq!(record.status, ServerStatus::Starting);
    assert_eq!(record.status_message, "booting");
    assert_eq!(record.updated_at, NOW + 5);
}
