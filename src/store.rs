// The two narrow interfaces that bound the engine: durable persistence and
// real-time broadcast. Everything behind them is replaceable.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::auction::session::{AuctionSession, Team};
use crate::protocol::BidUpdate;

/// The externally recorded lifecycle flag for a session. Together with the
/// snapshot's own `started` field it decides whether a persisted session is
/// restored on reload (see the bootstrap rule).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    NotStarted,
    Live,
    Complete,
}

/// Durable persistence for auction runtime state.
///
/// All methods are best-effort from the engine's point of view: a failed
/// write is logged and the in-memory transition stands. The snapshot is the
/// full serialized [`AuctionSession`] aggregate.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn save_snapshot(&self, session_id: &str, snapshot: &AuctionSession) -> Result<()>;

    async fn load_snapshot(&self, session_id: &str) -> Result<Option<AuctionSession>>;

    /// Delegated team/budget write so team-management views can read teams
    /// without deserializing the whole snapshot.
    async fn save_teams(&self, session_id: &str, teams: &[Team]) -> Result<()>;

    /// Create or overwrite the one open-round record for the session so
    /// out-of-process bidding clients can discover the live item.
    async fn open_round(
        &self,
        session_id: &str,
        item_id: &str,
        tier_id: Option<&str>,
    ) -> Result<()>;

    /// Delete the open-round record. There is at most one open round per
    /// session at any time.
    async fn close_round(&self, session_id: &str) -> Result<()>;

    /// Missing status reads as `NotStarted`.
    async fn load_status(&self, session_id: &str) -> Result<SessionStatus>;

    async fn save_status(&self, session_id: &str, status: SessionStatus) -> Result<()>;
}

/// Real-time fan-out to connected observers. Publishing is fire-and-forget;
/// the engine publishes one snapshot per applied transition, in order, and
/// never blocks on slow observers.
pub trait Broadcaster: Send + Sync {
    fn publish(&self, session_id: &str, snapshot: &AuctionSession);

    /// Relay a transient bid tick from one client to all observers. Bid
    /// updates never touch the aggregate; they are display traffic only.
    fn relay_bid(&self, session_id: &str, update: &BidUpdate);
}
