// Session bootstrap: reconcile configuration, persisted snapshot, and the
// recorded status flag at startup.

use anyhow::{Context, Result};
use tracing::info;

use super::item::Pool;
use super::round::RoundController;
use super::session::{AuctionSession, Team};
use crate::config::Config;
use crate::store::{SessionStatus, SnapshotStore};

/// Build the session the engine will run, applying one deterministic rule:
/// a persisted snapshot is restored if and only if it is marked `started`
/// AND the stored status flag says the auction is live. In that case the
/// snapshot wins verbatim except for display-only fields (the session
/// name), and the open round is re-issued for the item at the cursor.
///
/// Anything else (no snapshot, a snapshot that never started, or a status
/// flag of not-started/complete) yields a fresh session from the current
/// team configuration; the stale snapshot is simply overwritten by the next
/// save. A finished or abandoned auction is never resurrected, while a
/// genuinely live one survives reloads.
pub async fn bootstrap_session(
    store: &dyn SnapshotStore,
    rounds: &RoundController,
    pool: &Pool,
    session_id: &str,
    config: &Config,
) -> Result<AuctionSession> {
    let status = store
        .load_status(session_id)
        .await
        .context("failed to load session status")?;
    let snapshot = store
        .load_snapshot(session_id)
        .await
        .context("failed to load persisted snapshot")?;

    match snapshot {
        Some(mut session) if session.started && status == SessionStatus::Live => {
            session.name = config.auction.name.clone();
            info!(
                "Resuming live session {} at item {}/{} with {} teams",
                session_id,
                session.cursor,
                session.queue.len(),
                session.teams.len()
            );
            rounds.resume(&session, pool).await;
            Ok(session)
        }
        found => {
            if found.is_some() {
                info!(
                    "Discarding stale snapshot for session {} (status {:?})",
                    session_id, status
                );
            } else {
                info!("No snapshot for session {}, starting fresh", session_id);
            }
            let teams = config
                .auction
                .teams
                .iter()
                .map(|t| {
                    Team::new(
                        t.team_id.clone(),
                        t.name.clone(),
                        config.auction.budget_per_team,
                    )
                })
                .collect();
            Ok(AuctionSession::new(session_id, &config.auction.name, teams))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auction::item::{Item, Tier};
    use crate::config::{AuctionConfig, DataPaths, TeamEntry};
    use crate::db::Database;
    use std::sync::Arc;

    const SESSION: &str = "auction_boot_test";

    fn test_config() -> Config {
        Config {
            auction: AuctionConfig {
                name: "Current Name".to_string(),
                budget_per_team: 400,
                teams: vec![
                    TeamEntry {
                        team_id: "t1".to_string(),
                        name: "One".to_string(),
                    },
                    TeamEntry {
                        team_id: "t2".to_string(),
                        name: "Two".to_string(),
                    },
                ],
            },
            ws_port: 9100,
            db_path: ":memory:".to_string(),
            data_paths: DataPaths {
                items: "data/items.csv".to_string(),
                tiers: "data/tiers.csv".to_string(),
            },
        }
    }

    fn test_pool() -> Pool {
        let tiers = vec![Tier {
            tier_id: "gold".to_string(),
            name: "Gold".to_string(),
            base_price: 100,
            sort_order: 0,
            color: "#ffd700".to_string(),
        }];
        let items: Vec<Item> = ["a", "b", "c", "d", "e"]
            .iter()
            .map(|id| Item {
                item_id: id.to_string(),
                name: id.to_string(),
                tier_id: Some("gold".to_string()),
                base_price: 100,
                roles: vec![],
                notes: String::new(),
            })
            .collect();
        Pool::new(items, tiers).unwrap()
    }

    /// A session driven to cursor 2 of 5, as persisted by a previous run.
    fn mid_auction_session() -> AuctionSession {
        let mut session = AuctionSession::new(
            SESSION,
            "Old Name",
            vec![Team::new("t1", "One", 400), Team::new("t2", "Two", 400)],
        );
        session
            .start(
                ["a", "b", "c", "d", "e"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
            )
            .unwrap();
        session.sell("t1", 120).unwrap();
        session.mark_unsold().unwrap();
        session
    }

    #[tokio::test]
    async fn live_snapshot_wins_and_round_reopens() {
        let db = Arc::new(Database::open(":memory:").unwrap());
        let session = mid_auction_session();
        db.save_snapshot(SESSION, &session).await.unwrap();
        db.save_status(SESSION, SessionStatus::Live).await.unwrap();

        let rounds = RoundController::new(db.clone(), SESSION);
        let restored =
            bootstrap_session(db.as_ref(), &rounds, &test_pool(), SESSION, &test_config())
                .await
                .unwrap();

        // Restored verbatim, except the display name tracks configuration.
        assert_eq!(restored.cursor, 2);
        assert_eq!(restored.queue.len(), 5);
        assert_eq!(restored.name, "Current Name");
        assert_eq!(restored.sold.get("a").unwrap().price, 120);
        assert_eq!(restored.unsold, vec!["b".to_string()]);
        assert_eq!(restored.team("t1").unwrap().coins, 280);

        // The round for queue[2] was re-issued.
        let round = db.open_round_record(SESSION).unwrap().unwrap();
        assert_eq!(round.item_id, "c");
        assert_eq!(round.tier_id.as_deref(), Some("gold"));
    }

    #[tokio::test]
    async fn snapshot_without_live_status_is_discarded() {
        let db = Arc::new(Database::open(":memory:").unwrap());
        let session = mid_auction_session();
        db.save_snapshot(SESSION, &session).await.unwrap();
        // Status says the auction finished; the snapshot must not win.
        db.save_status(SESSION, SessionStatus::Complete)
            .await
            .unwrap();

        let rounds = RoundController::new(db.clone(), SESSION);
        let fresh =
            bootstrap_session(db.as_ref(), &rounds, &test_pool(), SESSION, &test_config())
                .await
                .unwrap();

        assert!(!fresh.started);
        assert!(fresh.queue.is_empty());
        assert_eq!(fresh.teams.len(), 2);
        assert_eq!(fresh.team("t1").unwrap().coins, 400);
        assert!(db.open_round_record(SESSION).unwrap().is_none());
    }

    #[tokio::test]
    async fn unstarted_snapshot_is_discarded_even_if_status_live() {
        let db = Arc::new(Database::open(":memory:").unwrap());
        // A snapshot that never started (e.g. saved before the organizer
        // hit Start) paired with a stale LIVE flag.
        let session = AuctionSession::new(
            SESSION,
            "Old Name",
            vec![Team::new("t1", "One", 400), Team::new("t2", "Two", 400)],
        );
        db.save_snapshot(SESSION, &session).await.unwrap();
        db.save_status(SESSION, SessionStatus::Live).await.unwrap();

        let rounds = RoundController::new(db.clone(), SESSION);
        let fresh =
            bootstrap_session(db.as_ref(), &rounds, &test_pool(), SESSION, &test_config())
                .await
                .unwrap();

        assert!(!fresh.started);
        assert_eq!(fresh.name, "Current Name");
    }

    #[tokio::test]
    async fn no_snapshot_builds_fresh_session_from_config() {
        let db = Arc::new(Database::open(":memory:").unwrap());
        let rounds = RoundController::new(db.clone(), SESSION);

        let fresh =
            bootstrap_session(db.as_ref(), &rounds, &test_pool(), SESSION, &test_config())
                .await
                .unwrap();

        assert!(!fresh.started);
        assert_eq!(fresh.session_id, SESSION);
        assert_eq!(fresh.name, "Current Name");
        assert_eq!(fresh.teams.len(), 2);
        assert_eq!(fresh.team("t2").unwrap().starting_budget, 400);
    }

    #[tokio::test]
    async fn restored_complete_session_does_not_reopen_round() {
        let db = Arc::new(Database::open(":memory:").unwrap());
        let mut session = mid_auction_session();
        session.sell("t2", 50).unwrap();
        session.mark_unsold().unwrap();
        session.mark_unsold().unwrap();
        assert_eq!(session.cursor, 5);
        db.save_snapshot(SESSION, &session).await.unwrap();
        // Stale LIVE flag from a crash right before the status write.
        db.save_status(SESSION, SessionStatus::Live).await.unwrap();

        let rounds = RoundController::new(db.clone(), SESSION);
        let restored =
            bootstrap_session(db.as_ref(), &rounds, &test_pool(), SESSION, &test_config())
                .await
                .unwrap();

        // The snapshot still wins (started + live), but there is no live
        // item, so no round is opened.
        assert_eq!(restored.cursor, 5);
        assert!(db.open_round_record(SESSION).unwrap().is_none());
    }
}
