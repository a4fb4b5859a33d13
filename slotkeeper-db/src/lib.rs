pub mod capacity;
mod error;
pub mod lifecycle;
mod memory;
mod models;
mod repository;

pub use capacity::{CapacityPolicy, Privilege};
pub use error::{DbError, Result, UnknownKind, UnknownStatus};
pub use lifecycle::{OccupancyOp, ServerTransition};
pub use memory::MemoryStore;
pub use models::{
  AccessGrant, GameServerRecord, MatchCriteria, NewGameServer, PlayerOccupancyRecord,
  PlayerStatus, Requester, ServerCandidate, ServerKind, ServerStatus,
};
pub use repository::Repository;

use async_trait::async_trait;
use std::path::Path;
use std::str::FromStr;
use tokio_rusqlite::Connection;
use tokio_rusqlite::rusqlite::{
  self, OptionalExtension, Row, TransactionBehavior, params, types::Type,
};
use tracing::{debug, info};
use uuid::Uuid;

/// Columns of `game_servers` in the order [`server_from_row`] reads them.
const SERVER_COLUMNS: &str = "gs.id, gs.region_id, gs.release_id, gs.world_id, gs.game_mode_id, \
   gs.kind, gs.host, gs.port, gs.max_players, gs.status, gs.status_message, gs.public, \
   gs.created_at, gs.updated_at";

/// Live occupancy of `gs`; the parameter is the freshness cutoff.
fn live_count_column(cutoff_param: usize) -> String {
  format!(
    "(SELECT COUNT(*) FROM game_server_players p \
      WHERE p.server_id = gs.id AND p.status = 'connected' AND p.updated_at > ?{cutoff_param})"
  )
}

fn parsed_at<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
  T: FromStr,
  T::Err: std::error::Error + Send + Sync + 'static,
{
  let text: String = row.get(idx)?;
  text
    .parse()
    .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn optional_uuid_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Uuid>> {
  let text: Option<String> = row.get(idx)?;
  text
    .map(|text| {
      Uuid::parse_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

fn server_from_row(row: &Row<'_>) -> rusqlite::Result<GameServerRecord> {
  Ok(GameServerRecord {
    id: parsed_at(row, 0)?,
    region_id: optional_uuid_at(row, 1)?,
    release_id: parsed_at(row, 2)?,
    world_id: parsed_at(row, 3)?,
    game_mode_id: optional_uuid_at(row, 4)?,
    kind: parsed_at(row, 5)?,
    host: row.get(6)?,
    port: row.get(7)?,
    max_players: row.get(8)?,
    status: parsed_at(row, 9)?,
    status_message: row.get(10)?,
    public: row.get(11)?,
    created_at: row.get(12)?,
    updated_at: row.get(13)?,
  })
}

fn candidate_from_row(row: &Row<'_>) -> rusqlite::Result<ServerCandidate> {
  Ok(ServerCandidate {
    server: server_from_row(row)?,
    live_occupancy: row.get(14)?,
  })
}

fn server_exists(conn: &rusqlite::Connection, id: &str) -> rusqlite::Result<bool> {
  conn
    .prepare_cached("SELECT EXISTS(SELECT 1 FROM game_servers WHERE id = ?1)")?
    .query_row(params![id], |row| row.get(0))
}

/// SQLite-backed store.
#[derive(Clone)]
pub struct Database {
  conn: Connection,
}

impl Database {
  /// Open or create a database at the given path.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = Connection::open(path).await.map_err(DbError::Sqlite)?;
    let db = Self { conn };
    db.initialize().await?;
    Ok(db)
  }

  /// Create an in-memory database (useful for testing).
  pub async fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .await
      .map_err(DbError::Sqlite)?;
    let db = Self { conn };
    db.initialize().await?;
    Ok(db)
  }

  /// Initialize the database schema.
  async fn initialize(&self) -> Result<()> {
    self.conn
            .call(|conn| {
                // Enable WAL mode for better concurrent read/write performance
                conn.pragma_update(None, "journal_mode", "WAL")?;

                // Enable foreign key constraints (must be set per-connection)
                conn.pragma_update(None, "foreign_keys", "ON")?;

                conn.execute_batch(
                    r#"
                    CREATE TABLE IF NOT EXISTS game_servers (
                        id TEXT PRIMARY KEY,
                        region_id TEXT,
                        release_id TEXT NOT NULL,
                        world_id TEXT NOT NULL,
                        game_mode_id TEXT,
                        kind TEXT NOT NULL,
                        host TEXT,
                        port INTEGER,
                        max_players INTEGER NOT NULL,
                        status TEXT NOT NULL,
                        status_message TEXT NOT NULL DEFAULT '',
                        public INTEGER NOT NULL,
                        created_at INTEGER NOT NULL,
                        updated_at INTEGER NOT NULL
                    );

                    -- One row per (server, user); rejoining updates the row
                    CREATE TABLE IF NOT EXISTS game_server_players (
                        server_id TEXT NOT NULL REFERENCES game_servers(id) ON DELETE CASCADE,
                        user_id TEXT NOT NULL,
                        status TEXT NOT NULL,
                        updated_at INTEGER NOT NULL,
                        PRIMARY KEY (server_id, user_id)
                    );

                    CREATE TABLE IF NOT EXISTS accessibles (
                        entity_id TEXT NOT NULL,
                        user_id TEXT NOT NULL,
                        is_owner INTEGER NOT NULL,
                        can_view INTEGER NOT NULL,
                        can_edit INTEGER NOT NULL,
                        can_delete INTEGER NOT NULL,
                        PRIMARY KEY (entity_id, user_id)
                    );

                    -- Requester identities (token hash is primary key)
                    CREATE TABLE IF NOT EXISTS api_tokens (
                        token_hash TEXT PRIMARY KEY,
                        user_id TEXT NOT NULL,
                        is_admin INTEGER NOT NULL,
                        is_internal INTEGER NOT NULL,
                        created_at INTEGER NOT NULL
                    );

                    CREATE INDEX IF NOT EXISTS idx_game_servers_match
                        ON game_servers(release_id, world_id, kind);
                    CREATE INDEX IF NOT EXISTS idx_game_server_players_live
                        ON game_server_players(server_id, status, updated_at);
                    "#,
                )?;
                Ok(())
            })
            .await?;

    info!("database initialized");
    Ok(())
  }
}

#[async_trait]
impl Repository for Database {
  // ========================================================================
  // Game servers
  // ========================================================================

  async fn find_servers(
    &self,
    criteria: &MatchCriteria,
    freshness_window: i64,
    now: i64,
  ) -> Result<Vec<ServerCandidate>> {
    let sql = format!(
      r#"
      SELECT {SERVER_COLUMNS}, {live}
      FROM game_servers gs
      WHERE (?1 IS NULL OR gs.region_id = ?1)
        AND gs.release_id = ?2
        AND gs.world_id = ?3
        AND (?4 IS NULL OR gs.game_mode_id = ?4)
        AND gs.kind = ?5
      ORDER BY gs.updated_at DESC, gs.created_at DESC, gs.rowid DESC
      "#,
      live = live_count_column(6)
    );
    let region_id = criteria.region_id.map(|id| id.to_string());
    let release_id = criteria.release_id.to_string();
    let world_id = criteria.world_id.to_string();
    let game_mode_id = criteria.game_mode_id.map(|id| id.to_string());
    let kind = criteria.kind.as_str();
    let cutoff = now - freshness_window;

    let candidates = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare_cached(&sql)?;
        let candidates = stmt
          .query_map(
            params![region_id, release_id, world_id, game_mode_id, kind, cutoff],
            candidate_from_row,
          )?
          .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(candidates)
      })
      .await?;

    Ok(candidates)
  }

  async fn get_server(&self, id: Uuid) -> Result<GameServerRecord> {
    let sql = format!("SELECT {SERVER_COLUMNS} FROM game_servers gs WHERE gs.id = ?1");
    let id = id.to_string();

    let server = self
      .conn
      .call(move |conn| {
        let server = conn
          .prepare_cached(&sql)?
          .query_row(params![&id], server_from_row)
          .optional()?;

        match server {
          Some(server) => Ok(Ok(server)),
          None => Ok(Err(DbError::ServerNotFound)),
        }
      })
      .await??;

    Ok(server)
  }

  async fn create_server(&self, server: NewGameServer, now: i64) -> Result<Uuid> {
    let id = Uuid::new_v4();
    let id_text = id.to_string();

    self
      .conn
      .call(move |conn| {
        conn
          .prepare_cached(
            r#"
            INSERT INTO game_servers (
                id, region_id, release_id, world_id, game_mode_id, kind,
                max_players, status, public, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)
            "#,
          )?
          .execute(params![
            &id_text,
            server.region_id.map(|id| id.to_string()),
            server.release_id.to_string(),
            server.world_id.to_string(),
            server.game_mode_id.map(|id| id.to_string()),
            server.kind.as_str(),
            server.max_players,
            ServerStatus::Created.as_str(),
            server.public,
            now,
          ])?;
        Ok(())
      })
      .await?;

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
    let id_text = id.to_string();

    self
      .conn
      .call(move |conn| {
        let updated = conn
          .prepare_cached(
            r#"
            UPDATE game_servers
            SET status = ?1, status_message = COALESCE(?2, status_message), updated_at = ?3
            WHERE id = ?4
            "#,
          )?
          .execute(params![status.as_str(), message, now, &id_text])?;

        if updated == 0 {
          return Ok(Err(DbError::ServerNotFound));
        }

        Ok(Ok(()))
      })
      .await??;

    debug!(%id, %status, "updated game server status");
    Ok(())
  }

  async fn set_server_endpoint(
    &self,
    id: Uuid,
    host: String,
    port: u16,
    now: i64,
  ) -> Result<()> {
    let id_text = id.to_string();

    self
      .conn
      .call(move |conn| {
        let updated = conn
          .prepare_cached(
            "UPDATE game_servers SET host = ?1, port = ?2, updated_at = ?3 WHERE id = ?4",
          )?
          .execute(params![&host, port, now, &id_text])?;

        if updated == 0 {
          return Ok(Err(DbError::ServerNotFound));
        }

        Ok(Ok(()))
      })
      .await??;

    debug!(%id, port, "set game server endpoint");
    Ok(())
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
    let sql = format!(
      r#"
      SELECT {SERVER_COLUMNS}, {live}
      FROM game_servers gs
      WHERE gs.release_id = ?1
        AND (?3 IS NULL
             OR gs.public = 1
             OR EXISTS (SELECT 1 FROM accessibles a
                        WHERE a.entity_id = gs.id AND a.user_id = ?3
                          AND (a.is_owner = 1 OR a.can_view = 1)))
      ORDER BY gs.updated_at DESC, gs.created_at DESC, gs.rowid DESC
      LIMIT ?4 OFFSET ?5
      "#,
      live = live_count_column(2)
    );
    let release_id = release_id.to_string();
    let viewer = viewer.map(|id| id.to_string());
    let cutoff = now - freshness_window;

    let candidates = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare_cached(&sql)?;
        let candidates = stmt
          .query_map(
            params![release_id, cutoff, viewer, limit, offset],
            candidate_from_row,
          )?
          .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(candidates)
      })
      .await?;

    Ok(candidates)
  }

  // ========================================================================
  // Player occupancy
  // ========================================================================

  async fn get_occupancy(
    &self,
    server_id: Uuid,
    user_id: Uuid,
  ) -> Result<Option<PlayerOccupancyRecord>> {
    let server = server_id.to_string();
    let user = user_id.to_string();

    let record = self
      .conn
      .call(move |conn| {
        if !server_exists(conn, &server)? {
          return Ok(Err(DbError::ServerNotFound));
        }

        let record = conn
          .prepare_cached(
            "SELECT status, updated_at FROM game_server_players WHERE server_id = ?1 AND user_id = ?2",
          )?
          .query_row(params![&server, &user], |row| {
            Ok(PlayerOccupancyRecord {
              server_id,
              user_id,
              status: parsed_at(row, 0)?,
              updated_at: row.get(1)?,
            })
          })
          .optional()?;

        Ok(Ok(record))
      })
      .await??;

    Ok(record)
  }

  async fn apply_occupancy(
    &self,
    server_id: Uuid,
    user_id: Uuid,
    op: OccupancyOp,
    freshness_window: i64,
    now: i64,
  ) -> Result<PlayerOccupancyRecord> {
    let server = server_id.to_string();
    let user = user_id.to_string();

    let record = self
            .conn
            .call(move |conn| {
                // IMMEDIATE takes the write lock up front, so the count below
                // cannot be invalidated by a concurrent writer before we insert.
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

                if !server_exists(&tx, &server)? {
                    return Ok(Err(DbError::ServerNotFound));
                }

                let current = tx
                    .prepare_cached(
                        "SELECT status, updated_at FROM game_server_players WHERE server_id = ?1 AND user_id = ?2",
                    )?
                    .query_row(params![&server, &user], |row| {
                        Ok(PlayerOccupancyRecord {
                            server_id,
                            user_id,
                            status: parsed_at(row, 0)?,
                            updated_at: row.get(1)?,
                        })
                    })
                    .optional()?;

                let live: u32 = tx
                    .prepare_cached(
                        "SELECT COUNT(*) FROM game_server_players WHERE server_id = ?1 AND status = 'connected' AND updated_at > ?2",
                    )?
                    .query_row(params![&server, now - freshness_window], |row| row.get(0))?;

                let status =
                    match lifecycle::next_occupancy(current.as_ref(), op, live) {
                        Ok(status) => status,
                        Err(e) => return Ok(Err(e)),
                    };

                tx.prepare_cached(
                    r#"
                    INSERT INTO game_server_players (server_id, user_id, status, updated_at)
                    VALUES (?1, ?2, ?3, ?4)
                    ON CONFLICT (server_id, user_id)
                    DO UPDATE SET status = excluded.status, updated_at = excluded.updated_at
                    "#,
                )?
                    .execute(params![&server, &user, status.as_str(), now])?;

                tx.commit()?;
                Ok(Ok(PlayerOccupancyRecord {
                    server_id,
                    user_id,
                    status,
                    updated_at: now,
                }))
            })
            .await??;

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
    let server = server_id.to_string();
    let user = user_id.to_string();

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;

        if !server_exists(&tx, &server)? {
          return Ok(Err(DbError::ServerNotFound));
        }

        tx.prepare_cached(
          r#"
          INSERT INTO game_server_players (server_id, user_id, status, updated_at)
          VALUES (?1, ?2, ?3, ?4)
          ON CONFLICT (server_id, user_id)
          DO UPDATE SET status = excluded.status, updated_at = excluded.updated_at
          "#,
        )?
        .execute(params![&server, &user, status.as_str(), now])?;

        tx.commit()?;
        Ok(Ok(()))
      })
      .await??;

    debug!(%server_id, %user_id, %status, "upserted occupancy");
    Ok(())
  }

  async fn refresh_occupants(
    &self,
    server_id: Uuid,
    user_ids: &[Uuid],
    now: i64,
  ) -> Result<u64> {
    let server = server_id.to_string();
    let mut users: Vec<String> = user_ids.iter().map(Uuid::to_string).collect();
    users.sort_unstable();
    users.dedup();

    let touched = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;

        if !server_exists(&tx, &server)? {
          return Ok(Err(DbError::ServerNotFound));
        }

        let mut touched = 0u64;
        {
          let mut stmt = tx.prepare_cached(
            r#"
            UPDATE game_server_players SET status = 'connected', updated_at = ?1
            WHERE server_id = ?2 AND user_id = ?3
            "#,
          )?;
          for user in &users {
            touched += stmt.execute(params![now, &server, user])? as u64;
          }
        }

        tx.commit()?;
        Ok(Ok(touched))
      })
      .await??;

    debug!(%server_id, touched, "refreshed occupants");
    Ok(touched)
  }

  async fn count_live_occupancy(
    &self,
    server_id: Uuid,
    freshness_window: i64,
    now: i64,
  ) -> Result<u32> {
    let sql = format!(
      "SELECT {live} FROM game_servers gs WHERE gs.id = ?1",
      live = live_count_column(2)
    );
    let server = server_id.to_string();
    let cutoff = now - freshness_window;

    let count = self
      .conn
      .call(move |conn| {
        let count: Option<u32> = conn
          .prepare_cached(&sql)?
          .query_row(params![&server, cutoff], |row| row.get(0))
          .optional()?;

        match count {
          Some(count) => Ok(Ok(count)),
          None => Ok(Err(DbError::ServerNotFound)),
        }
      })
      .await??;

    Ok(count)
  }

  // ========================================================================
  // Access control and identities
  // ========================================================================

  async fn grant_access(
    &self,
    entity_id: Uuid,
    user_id: Uuid,
    grant: AccessGrant,
  ) -> Result<()> {
    let entity = entity_id.to_string();
    let user = user_id.to_string();

    self
      .conn
      .call(move |conn| {
        conn
          .prepare_cached(
            r#"
            INSERT OR REPLACE INTO accessibles (entity_id, user_id, is_owner, can_view, can_edit, can_delete)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
          )?
          .execute(params![
            &entity,
            &user,
            grant.is_owner,
            grant.can_view,
            grant.can_edit,
            grant.can_delete
          ])?;
        Ok(())
      })
      .await?;

    debug!(%entity_id, %user_id, "granted access");
    Ok(())
  }

  async fn can_view(&self, entity_id: Uuid, user_id: Uuid) -> Result<bool> {
    let entity = entity_id.to_string();
    let user = user_id.to_string();

    let allowed = self
      .conn
      .call(move |conn| {
        let allowed: bool = conn
          .prepare_cached(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM accessibles
                WHERE entity_id = ?1 AND user_id = ?2 AND (is_owner = 1 OR can_view = 1)
            )
            "#,
          )?
          .query_row(params![&entity, &user], |row| row.get(0))?;
        Ok(allowed)
      })
      .await?;

    Ok(allowed)
  }

  async fn issue_token(&self, token_hash: String, requester: Requester, now: i64) -> Result<()> {
    let user = requester.user_id.to_string();

    self
      .conn
      .call(move |conn| {
        conn
          .prepare_cached(
            r#"
            INSERT OR REPLACE INTO api_tokens (token_hash, user_id, is_admin, is_internal, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
          )?
          .execute(params![
            &token_hash,
            &user,
            requester.is_admin,
            requester.is_internal,
            now
          ])?;
        Ok(())
      })
      .await?;

    debug!(user_id = %requester.user_id, "issued api token");
    Ok(())
  }

  async fn requester_by_token(&self, token_hash: String) -> Result<Option<Requester>> {
    let requester = self
      .conn
      .call(move |conn| {
        conn
          .prepare_cached(
            "SELECT user_id, is_admin, is_internal FROM api_tokens WHERE token_hash = ?1",
          )?
          .query_row(params![&token_hash], |row| {
            Ok(Requester {
              user_id: parsed_at(row, 0)?,
              is_admin: row.get(1)?,
              is_internal: row.get(2)?,
            })
          })
          .optional()
      })
      .await?;

    Ok(requester)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Arc;

  const WINDOW: i64 = 60;

  fn now() -> i64 {
    1700000000 // Fixed timestamp for testing
  }

  fn criteria() -> MatchCriteria {
    MatchCriteria {
      region_id: Some(Uuid::from_u128(10)),
      release_id: Uuid::from_u128(1),
      world_id: Uuid::from_u128(2),
      game_mode_id: Some(Uuid::from_u128(3)),
      kind: ServerKind::Official,
    }
  }

  async fn create(db: &Database, criteria: &MatchCriteria, max_players: u32, at: i64) -> Uuid {
    db.create_server(NewGameServer::from_criteria(criteria, max_players, true), at)
      .await
      .unwrap()
  }

  #[tokio::test]
  async fn test_server_lifecycle() {
    let db = Database::open_in_memory().await.unwrap();
    let id = create(&db, &criteria(), 16, now()).await;

    let server = db.get_server(id).await.unwrap();
    assert_eq!(server.status, ServerStatus::Created);
    assert_eq!(server.kind, ServerKind::Official);
    assert_eq!(server.region_id, Some(Uuid::from_u128(10)));
    assert_eq!(server.max_players, 16);
    assert_eq!(server.host, None);
    assert!(server.public);

    db.update_server_status(id, ServerStatus::Launching, Some("deploying".to_string()), now() + 5)
      .await
      .unwrap();
    db.set_server_endpoint(id, "10.0.0.7".to_string(), 7777, now() + 6)
      .await
      .unwrap();
    // Status message is kept when none is supplied
    db.update_server_status(id, ServerStatus::Online, None, now() + 7)
      .await
      .unwrap();

    let server = db.get_server(id).await.unwrap();
    assert_eq!(server.status, ServerStatus::Online);
    assert_eq!(server.status_message, "deploying");
    assert_eq!(server.host.as_deref(), Some("10.0.0.7"));
    assert_eq!(server.port, Some(7777));
    assert_eq!(server.updated_at, now() + 7);
    assert_eq!(server.created_at, now());
  }

  #[tokio::test]
  async fn test_missing_server_is_not_found() {
    let db = Database::open_in_memory().await.unwrap();
    let ghost = Uuid::new_v4();

    assert!(matches!(db.get_server(ghost).await, Err(DbError::ServerNotFound)));
    assert!(matches!(
      db.update_server_status(ghost, ServerStatus::Online, None, now()).await,
      Err(DbError::ServerNotFound)
    ));
    assert!(matches!(
      db.count_live_occupancy(ghost, WINDOW, now()).await,
      Err(DbError::ServerNotFound)
    ));
    assert!(matches!(
      db.apply_occupancy(ghost, Uuid::new_v4(), OccupancyOp::Join { slot_limit: 5 }, WINDOW, now())
        .await,
      Err(DbError::ServerNotFound)
    ));
  }

  #[tokio::test]
  async fn test_find_servers_wildcards_and_order() {
    let db = Database::open_in_memory().await.unwrap();
    let exact = criteria();
    let other_region = MatchCriteria {
      region_id: Some(Uuid::from_u128(11)),
      ..criteria()
    };
    let community = MatchCriteria {
      kind: ServerKind::Community,
      ..criteria()
    };

    let first = create(&db, &exact, 10, now()).await;
    let second = create(&db, &other_region, 10, now() + 1).await;
    create(&db, &community, 10, now() + 2).await;

    // Exact region only
    let found = db.find_servers(&exact, WINDOW, now()).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].server.id, first);

    // Wildcard region and game mode; newest first, kind still exact
    let wildcard = MatchCriteria {
      region_id: None,
      game_mode_id: None,
      ..criteria()
    };
    let found = db.find_servers(&wildcard, WINDOW, now()).await.unwrap();
    let ids: Vec<Uuid> = found.iter().map(|c| c.server.id).collect();
    assert_eq!(ids, vec![second, first]);
  }

  #[tokio::test]
  async fn test_occupancy_transitions() {
    let db = Database::open_in_memory().await.unwrap();
    let server = create(&db, &criteria(), 10, now()).await;
    let user = Uuid::new_v4();
    let join = OccupancyOp::Join { slot_limit: 7 };
    let leave = OccupancyOp::SetStatus(PlayerStatus::Disconnected);

    let record = db.apply_occupancy(server, user, join, WINDOW, now()).await.unwrap();
    assert_eq!(record.status, PlayerStatus::Connected);
    assert!(matches!(
      db.apply_occupancy(server, user, join, WINDOW, now()).await,
      Err(DbError::PlayerAlreadyConnected)
    ));

    db.apply_occupancy(server, user, leave, WINDOW, now() + 1).await.unwrap();
    assert!(matches!(
      db.apply_occupancy(server, user, leave, WINDOW, now() + 2).await,
      Err(DbError::PlayerNotConnected)
    ));

    // Rejoin updates the same row
    db.apply_occupancy(server, user, join, WINDOW, now() + 3).await.unwrap();
    let record = db.get_occupancy(server, user).await.unwrap().unwrap();
    assert_eq!(record.status, PlayerStatus::Connected);
    assert_eq!(record.updated_at, now() + 3);
  }

  #[tokio::test]
  async fn test_stale_rows_age_out_without_writes() {
    let db = Database::open_in_memory().await.unwrap();
    let server = create(&db, &criteria(), 10, now()).await;
    for _ in 0..3 {
      db.upsert_occupancy(server, Uuid::new_v4(), PlayerStatus::Connected, now())
        .await
        .unwrap();
    }
    db.upsert_occupancy(server, Uuid::new_v4(), PlayerStatus::Disconnected, now())
      .await
      .unwrap();

    assert_eq!(db.count_live_occupancy(server, WINDOW, now() + 30).await.unwrap(), 3);
    assert_eq!(db.count_live_occupancy(server, WINDOW, now() + 30).await.unwrap(), 3);
    assert_eq!(db.count_live_occupancy(server, WINDOW, now() + 60).await.unwrap(), 0);

    let found = db.find_servers(&criteria(), WINDOW, now() + 30).await.unwrap();
    assert_eq!(found[0].live_occupancy, 3);
  }

  #[tokio::test]
  async fn test_slot_limit_enforced() {
    let db = Database::open_in_memory().await.unwrap();
    let server = create(&db, &criteria(), 5, now()).await;
    let join = OccupancyOp::Join { slot_limit: 2 };

    db.apply_occupancy(server, Uuid::new_v4(), join, WINDOW, now()).await.unwrap();
    db.apply_occupancy(server, Uuid::new_v4(), join, WINDOW, now()).await.unwrap();
    assert!(matches!(
      db.apply_occupancy(server, Uuid::new_v4(), join, WINDOW, now()).await,
      Err(DbError::NoFreeSlots)
    ));
    // A wider limit still admits
    db.apply_occupancy(server, Uuid::new_v4(), OccupancyOp::Join { slot_limit: 5 }, WINDOW, now())
      .await
      .unwrap();
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn test_concurrent_joins_respect_limit() {
    let db = Arc::new(Database::open_in_memory().await.unwrap());
    let server = create(&db, &criteria(), 8, now()).await;

    let mut handles = Vec::new();
    for _ in 0..32 {
      let db = db.clone();
      handles.push(tokio::spawn(async move {
        db.apply_occupancy(
          server,
          Uuid::new_v4(),
          OccupancyOp::Join { slot_limit: 8 },
          WINDOW,
          now(),
        )
        .await
      }));
    }

    let mut admitted = 0;
    for handle in handles {
      match handle.await.unwrap() {
        Ok(_) => admitted += 1,
        Err(DbError::NoFreeSlots) => {}
        Err(e) => panic!("unexpected error: {e}"),
      }
    }
    assert_eq!(admitted, 8);
    assert_eq!(db.count_live_occupancy(server, WINDOW, now()).await.unwrap(), 8);
  }

  #[tokio::test]
  async fn test_refresh_occupants() {
    let db = Database::open_in_memory().await.unwrap();
    let server = create(&db, &criteria(), 10, now()).await;
    let online = Uuid::new_v4();
    let left = Uuid::new_v4();
    db.upsert_occupancy(server, online, PlayerStatus::Connected, now())
      .await
      .unwrap();
    db.upsert_occupancy(server, left, PlayerStatus::Disconnected, now())
      .await
      .unwrap();

    let touched = db
      .refresh_occupants(server, &[online, left, online, Uuid::new_v4()], now() + 45)
      .await
      .unwrap();
    // Duplicates count once, unknown ids are skipped
    assert_eq!(touched, 2);
    assert_eq!(db.count_live_occupancy(server, WINDOW, now() + 90).await.unwrap(), 2);
    let left = db.get_occupancy(server, left).await.unwrap().unwrap();
    assert_eq!(left.status, PlayerStatus::Connected);
    assert_eq!(left.updated_at, now() + 45);
    assert!(db.get_occupancy(server, Uuid::new_v4()).await.unwrap().is_none());
  }

  #[tokio::test]
  async fn test_list_servers_respects_visibility() {
    let db = Database::open_in_memory().await.unwrap();
    let release = criteria().release_id;
    let public = create(&db, &criteria(), 10, now()).await;
    let private = db
      .create_server(NewGameServer::from_criteria(&criteria(), 10, false), now() + 1)
      .await
      .unwrap();
    let viewer = Uuid::new_v4();

    let all = db.list_servers(release, None, 0, 10, WINDOW, now()).await.unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].server.id, private);

    let visible = db
      .list_servers(release, Some(viewer), 0, 10, WINDOW, now())
      .await
      .unwrap();
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0].server.id, public);

    db.grant_access(private, viewer, AccessGrant::owner()).await.unwrap();
    assert!(db.can_view(private, viewer).await.unwrap());
    let visible = db
      .list_servers(release, Some(viewer), 0, 1, WINDOW, now())
      .await
      .unwrap();
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0].server.id, private);
  }

  #[tokio::test]
  async fn test_token_lookup() {
    let db = Database::open_in_memory().await.unwrap();
    let internal = Requester::internal(Uuid::new_v4());

    db.issue_token("hash123".to_string(), internal, now()).await.unwrap();
    let found = db.requester_by_token("hash123".to_string()).await.unwrap();
    assert_eq!(found, Some(internal));
    assert!(
      db.requester_by_token("missing".to_string())
        .await
        .unwrap()
        .is_none()
    );
  }
}
