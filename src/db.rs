// SQLite persistence layer: snapshots, teams, and the open-round record.

use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};

use crate::auction::session::{Acquisition, AuctionSession, Team};
use crate::store::{SessionStatus, SnapshotStore};

/// SQLite-backed implementation of [`SnapshotStore`]: a key-value table for
/// snapshots and the status flag, a teams table for delegated budget writes,
/// and an open-rounds table whose primary key enforces at most one open
/// round per session.
pub struct Database {
    conn: Mutex<Connection>,
}

/// The durable "this item is up for bidding" record.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenRound {
    pub item_id: String,
    pub tier_id: Option<String>,
    pub opened_at: String,
}

impl Database {
    /// Open (or create) a SQLite database at `path` and ensure all tables
    /// exist. Pass `":memory:"` for an ephemeral in-memory database (useful
    /// for tests).
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at {path}"))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA foreign_keys = ON;",
        )
        .context("failed to set database pragmas")?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS auction_state (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS teams (
                session_id      TEXT NOT NULL,
                team_id         TEXT NOT NULL,
                name            TEXT NOT NULL,
                starting_budget INTEGER NOT NULL,
                coins           INTEGER NOT NULL,
                acquisitions    TEXT NOT NULL,
                PRIMARY KEY (session_id, team_id)
            );

            CREATE TABLE IF NOT EXISTS open_rounds (
                session_id TEXT PRIMARY KEY,
                item_id    TEXT NOT NULL,
                tier_id    TEXT,
                opened_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            );
            ",
        )
        .context("failed to create database schema")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Acquire the database connection.
    ///
    /// Panics if the mutex is poisoned (another thread panicked while
    /// holding the lock). This should never happen in normal operation.
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("database mutex poisoned")
    }

    /// Persist an arbitrary JSON value under `key`. Uses INSERT OR REPLACE
    /// so repeated saves overwrite the previous value.
    pub fn save_state(&self, key: &str, value: &serde_json::Value) -> Result<()> {
        let conn = self.conn();
        let json_str =
            serde_json::to_string(value).context("failed to serialize state value")?;
        conn.execute(
            "INSERT OR REPLACE INTO auction_state (key, value) VALUES (?1, ?2)",
            params![key, json_str],
        )
        .context("failed to save state")?;
        Ok(())
    }

    /// Load a previously saved JSON value by `key`. Returns `None` if the
    /// key does not exist.
    pub fn load_state(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let conn = self.conn();
        let json_str: Option<String> = conn
            .query_row(
                "SELECT value FROM auction_state WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .context("failed to query auction state")?;

        match json_str {
            Some(s) => {
                let value: serde_json::Value =
                    serde_json::from_str(&s).context("failed to deserialize state value")?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Delete the snapshot, status, teams, and round record for a session,
    /// resetting it to a clean slate. Uses a transaction with automatic
    /// rollback on error.
    pub fn clear_session(&self, session_id: &str) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction().context("failed to begin transaction")?;
        tx.execute(
            "DELETE FROM auction_state WHERE key IN (?1, ?2)",
            params![snapshot_key(session_id), status_key(session_id)],
        )
        .context("failed to delete session state")?;
        tx.execute(
            "DELETE FROM teams WHERE session_id = ?1",
            params![session_id],
        )
        .context("failed to delete session teams")?;
        tx.execute(
            "DELETE FROM open_rounds WHERE session_id = ?1",
            params![session_id],
        )
        .context("failed to delete open round")?;
        tx.commit().context("failed to commit clear_session")?;
        Ok(())
    }

    /// Load the teams last written via `save_teams`, in write order.
    pub fn load_teams(&self, session_id: &str) -> Result<Vec<Team>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT team_id, name, starting_budget, coins, acquisitions
                 FROM teams WHERE session_id = ?1 ORDER BY rowid",
            )
            .context("failed to prepare load_teams query")?;

        let teams = stmt
            .query_map(params![session_id], |row| {
                let acquisitions_json: String = row.get(4)?;
                Ok((
                    Team {
                        team_id: row.get(0)?,
                        name: row.get(1)?,
                        starting_budget: row.get(2)?,
                        coins: row.get(3)?,
                        acquisitions: Vec::new(),
                    },
                    acquisitions_json,
                ))
            })
            .context("failed to query teams")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map team rows")?;

        teams
            .into_iter()
            .map(|(mut team, acquisitions_json)| {
                team.acquisitions = serde_json::from_str::<Vec<Acquisition>>(&acquisitions_json)
                    .context("failed to deserialize acquisitions")?;
                Ok(team)
            })
            .collect()
    }

    /// Read the current open-round record for a session, if any.
    pub fn open_round_record(&self, session_id: &str) -> Result<Option<OpenRound>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT item_id, tier_id, opened_at FROM open_rounds WHERE session_id = ?1",
            params![session_id],
            |row| {
                Ok(OpenRound {
                    item_id: row.get(0)?,
                    tier_id: row.get(1)?,
                    opened_at: row.get(2)?,
                })
            },
        )
        .optional()
        .context("failed to query open round")
    }

    // ------------------------------------------------------------------
    // Session ID management
    // ------------------------------------------------------------------

    /// Key used in the auction_state table to store the current session ID.
    const SESSION_ID_KEY: &'static str = "current_session_id";

    /// Retrieve the stored session ID from the key-value store.
    /// Returns `None` if no session ID has been set yet.
    pub fn get_session_id(&self) -> Result<Option<String>> {
        let value = self.load_state(Self::SESSION_ID_KEY)?;
        Ok(value.and_then(|v| v.as_str().map(|s| s.to_string())))
    }

    /// Persist a session ID to the key-value store.
    pub fn set_session_id(&self, session_id: &str) -> Result<()> {
        self.save_state(
            Self::SESSION_ID_KEY,
            &serde_json::Value::String(session_id.to_string()),
        )
    }

    /// Generate a new unique session ID based on the current UTC timestamp.
    ///
    /// Format: `auction_YYYYMMDD_HHMMSS_SSS`. The millisecond suffix keeps
    /// IDs unique even if two sessions are created in the same second.
    pub fn generate_session_id() -> String {
        let now = chrono::Utc::now();
        now.format("auction_%Y%m%d_%H%M%S_%3f").to_string()
    }
}

fn snapshot_key(session_id: &str) -> String {
    format!("snapshot:{session_id}")
}

fn status_key(session_id: &str) -> String {
    format!("status:{session_id}")
}

#[async_trait]
impl SnapshotStore for Database {
    async fn save_snapshot(&self, session_id: &str, snapshot: &AuctionSession) -> Result<()> {
        let value =
            serde_json::to_value(snapshot).context("failed to serialize snapshot")?;
        self.save_state(&snapshot_key(session_id), &value)
    }

    async fn load_snapshot(&self, session_id: &str) -> Result<Option<AuctionSession>> {
        match self.load_state(&snapshot_key(session_id))? {
            Some(value) => {
                let snapshot: AuctionSession = serde_json::from_value(value)
                    .context("failed to deserialize snapshot")?;
                Ok(Some(snapshot))
            }
            None => Ok(None),
        }
    }

    async fn save_teams(&self, session_id: &str, teams: &[Team]) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn
            .transaction()
            .context("failed to begin save_teams transaction")?;
        tx.execute(
            "DELETE FROM teams WHERE session_id = ?1",
            params![session_id],
        )
        .context("failed to clear previous teams")?;
        for team in teams {
            let acquisitions_json = serde_json::to_string(&team.acquisitions)
                .context("failed to serialize acquisitions")?;
            tx.execute(
                "INSERT INTO teams (session_id, team_id, name, starting_budget, coins, acquisitions)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    session_id,
                    team.team_id,
                    team.name,
                    team.starting_budget,
                    team.coins,
                    acquisitions_json,
                ],
            )
            .context("failed to insert team")?;
        }
        tx.commit().context("failed to commit save_teams")?;
        Ok(())
    }

    async fn open_round(
        &self,
        session_id: &str,
        item_id: &str,
        tier_id: Option<&str>,
    ) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT OR REPLACE INTO open_rounds (session_id, item_id, tier_id)
             VALUES (?1, ?2, ?3)",
            params![session_id, item_id, tier_id],
        )
        .context("failed to open round")?;
        Ok(())
    }

    async fn close_round(&self, session_id: &str) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "DELETE FROM open_rounds WHERE session_id = ?1",
            params![session_id],
        )
        .context("failed to close round")?;
        Ok(())
    }

    async fn load_status(&self, session_id: &str) -> Result<SessionStatus> {
        match self.load_state(&status_key(session_id))? {
            Some(value) => {
                serde_json::from_value(value).context("failed to deserialize session status")
            }
            None => Ok(SessionStatus::NotStarted),
        }
    }

    async fn save_status(&self, session_id: &str, status: SessionStatus) -> Result<()> {
        let value =
            serde_json::to_value(status).context("failed to serialize session status")?;
        self.save_state(&status_key(session_id), &value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auction::session::Team;
    use serde_json::json;

    const SESSION: &str = "auction_test_001";

    /// Helper: create a fresh in-memory database for each test.
    fn test_db() -> Database {
        Database::open(":memory:").expect("in-memory database should open")
    }

    fn sample_session() -> AuctionSession {
        let mut session = AuctionSession::new(
            SESSION,
            "Test Auction",
            vec![
                Team::new("team_1", "Harbor Hawks", 500),
                Team::new("team_2", "North End United", 500),
            ],
        );
        session
            .start(vec!["a".to_string(), "b".to_string(), "c".to_string()])
            .unwrap();
        session.sell("team_1", 120).unwrap();
        session
    }

    // ------------------------------------------------------------------
    // Schema / open
    // ------------------------------------------------------------------

    #[test]
    fn open_creates_tables() {
        let db = test_db();
        let conn = db.conn();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();

        assert!(tables.contains(&"auction_state".to_string()));
        assert!(tables.contains(&"teams".to_string()));
        assert!(tables.contains(&"open_rounds".to_string()));
    }

    // ------------------------------------------------------------------
    // Key-value state
    // ------------------------------------------------------------------

    #[test]
    fn save_and_load_state_round_trip() {
        let db = test_db();
        let value = json!({"cursor": 3, "queue": ["a", "b"]});

        db.save_state("some_key", &value).unwrap();

        let loaded = db.load_state("some_key").unwrap();
        assert_eq!(loaded, Some(value));
    }

    #[test]
    fn load_state_returns_none_for_missing_key() {
        let db = test_db();
        assert!(db.load_state("nonexistent").unwrap().is_none());
    }

    #[test]
    fn save_state_overwrites_previous_value() {
        let db = test_db();
        db.save_state("key", &json!(1)).unwrap();
        db.save_state("key", &json!(2)).unwrap();
        assert_eq!(db.load_state("key").unwrap(), Some(json!(2)));
    }

    // ------------------------------------------------------------------
    // Snapshots
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn snapshot_round_trip() {
        let db = test_db();
        let session = sample_session();

        db.save_snapshot(SESSION, &session).await.unwrap();
        let restored = db.load_snapshot(SESSION).await.unwrap().unwrap();

        assert_eq!(restored, session);
        assert_eq!(restored.cursor, 1);
        assert_eq!(restored.sold.get("a").unwrap().price, 120);
    }

    #[tokio::test]
    async fn load_snapshot_returns_none_when_missing() {
        let db = test_db();
        assert!(db.load_snapshot(SESSION).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn snapshot_overwrites_previous() {
        let db = test_db();
        let mut session = sample_session();
        db.save_snapshot(SESSION, &session).await.unwrap();

        session.mark_unsold().unwrap();
        db.save_snapshot(SESSION, &session).await.unwrap();

        let restored = db.load_snapshot(SESSION).await.unwrap().unwrap();
        assert_eq!(restored.cursor, 2);
        assert_eq!(restored.unsold, vec!["b".to_string()]);
    }

    // ------------------------------------------------------------------
    // Teams
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn save_teams_replaces_and_loads_in_order() {
        let db = test_db();
        let session = sample_session();

        db.save_teams(SESSION, &session.teams).await.unwrap();
        let loaded = db.load_teams(SESSION).unwrap();
        assert_eq!(loaded, session.teams);
        assert_eq!(loaded[0].coins, 380);
        assert_eq!(loaded[0].acquisitions[0].item_id, "a");

        // A second save fully replaces the previous set.
        let reduced = vec![Team::new("team_9", "Late Entry", 300)];
        db.save_teams(SESSION, &reduced).await.unwrap();
        let loaded = db.load_teams(SESSION).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].team_id, "team_9");
    }

    #[tokio::test]
    async fn teams_scoped_by_session() {
        let db = test_db();
        db.save_teams("session_a", &[Team::new("t1", "A", 100)])
            .await
            .unwrap();
        db.save_teams("session_b", &[Team::new("t2", "B", 200)])
            .await
            .unwrap();

        assert_eq!(db.load_teams("session_a").unwrap().len(), 1);
        assert_eq!(db.load_teams("session_b").unwrap()[0].team_id, "t2");
    }

    // ------------------------------------------------------------------
    // Rounds
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn open_round_record_lifecycle() {
        let db = test_db();
        assert!(db.open_round_record(SESSION).unwrap().is_none());

        db.open_round(SESSION, "item_1", Some("gold")).await.unwrap();
        let round = db.open_round_record(SESSION).unwrap().unwrap();
        assert_eq!(round.item_id, "item_1");
        assert_eq!(round.tier_id.as_deref(), Some("gold"));
        assert!(!round.opened_at.is_empty());

        // Opening again overwrites; the PK allows only one row per session.
        db.open_round(SESSION, "item_2", None).await.unwrap();
        let round = db.open_round_record(SESSION).unwrap().unwrap();
        assert_eq!(round.item_id, "item_2");
        assert!(round.tier_id.is_none());

        db.close_round(SESSION).await.unwrap();
        assert!(db.open_round_record(SESSION).unwrap().is_none());
    }

    #[tokio::test]
    async fn close_round_without_open_round_is_ok() {
        let db = test_db();
        db.close_round(SESSION).await.unwrap();
    }

    // ------------------------------------------------------------------
    // Status flag
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn status_defaults_to_not_started() {
        let db = test_db();
        assert_eq!(
            db.load_status(SESSION).await.unwrap(),
            SessionStatus::NotStarted
        );
    }

    #[tokio::test]
    async fn status_round_trip() {
        let db = test_db();
        db.save_status(SESSION, SessionStatus::Live).await.unwrap();
        assert_eq!(db.load_status(SESSION).await.unwrap(), SessionStatus::Live);

        db.save_status(SESSION, SessionStatus::Complete)
            .await
            .unwrap();
        assert_eq!(
            db.load_status(SESSION).await.unwrap(),
            SessionStatus::Complete
        );
    }

    // ------------------------------------------------------------------
    // clear_session
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn clear_session_removes_everything_for_one_session() {
        let db = test_db();
        let session = sample_session();

        db.save_snapshot(SESSION, &session).await.unwrap();
        db.save_status(SESSION, SessionStatus::Live).await.unwrap();
        db.save_teams(SESSION, &session.teams).await.unwrap();
        db.open_round(SESSION, "b", None).await.unwrap();
        db.save_snapshot("other", &session).await.unwrap();

        db.clear_session(SESSION).unwrap();

        assert!(db.load_snapshot(SESSION).await.unwrap().is_none());
        assert_eq!(
            db.load_status(SESSION).await.unwrap(),
            SessionStatus::NotStarted
        );
        assert!(db.load_teams(SESSION).unwrap().is_empty());
        assert!(db.open_round_record(SESSION).unwrap().is_none());
        // Other sessions are untouched.
        assert!(db.load_snapshot("other").await.unwrap().is_some());
    }

    // ------------------------------------------------------------------
    // Session ID management
    // ------------------------------------------------------------------

    #[test]
    fn session_id_persists_via_state_store() {
        let db = test_db();
        assert!(db.get_session_id().unwrap().is_none());

        db.set_session_id("auction_20260807_120000_001").unwrap();
        assert_eq!(
            db.get_session_id().unwrap(),
            Some("auction_20260807_120000_001".to_string())
        );

        db.set_session_id("auction_20260808_090000_002").unwrap();
        assert_eq!(
            db.get_session_id().unwrap(),
            Some("auction_20260808_090000_002".to_string())
        );
    }

    #[test]
    fn generate_session_id_format() {
        let id = Database::generate_session_id();
        assert!(id.starts_with("auction_"), "unexpected session id: {id}");
        assert!(id.len() >= 26, "session id too short: {id}");
    }
}
