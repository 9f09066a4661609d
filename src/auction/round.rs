// Round controller: mirrors the currently auctioned item into durable state
// so bidding clients can discover it out-of-band.

use std::sync::Arc;

use tracing::{debug, warn};

use super::item::Pool;
use super::session::AuctionSession;
use crate::store::SnapshotStore;

/// Owns the open/close protocol around every cursor movement.
///
/// The contract: `close_round` runs before the next `open_round`, and both
/// complete before the new snapshot is broadcast, so any client reacting to
/// a broadcast can always find the corresponding open round. Storage
/// failures are logged and never block the operator's local workflow.
pub struct RoundController {
    store: Arc<dyn SnapshotStore>,
    session_id: String,
}

impl RoundController {
    pub fn new(store: Arc<dyn SnapshotStore>, session_id: impl Into<String>) -> Self {
        RoundController {
            store,
            session_id: session_id.into(),
        }
    }

    /// Close the current round, then open one for the item now at the
    /// cursor (if the session is still live). Called after every applied
    /// transition.
    pub async fn advance(&self, session: &AuctionSession, pool: &Pool) {
        self.close().await;
        if let Some(item_id) = session.current_item() {
            self.open(item_id, pool).await;
        }
    }

    /// Re-issue the open round after a reload of a live session. Recovers
    /// from a crash between an applied action and its round update; the
    /// write overwrites whatever record may already exist.
    pub async fn resume(&self, session: &AuctionSession, pool: &Pool) {
        if let Some(item_id) = session.current_item() {
            debug!("Re-opening round for {} after resume", item_id);
            self.open(item_id, pool).await;
        }
    }

    async fn open(&self, item_id: &str, pool: &Pool) {
        let tier_id = pool.tier_of(item_id);
        if let Err(e) = self
            .store
            .open_round(&self.session_id, item_id, tier_id)
            .await
        {
            warn!("Failed to open round for {}: {:#}", item_id, e);
        }
    }

    async fn close(&self) {
        if let Err(e) = self.store.close_round(&self.session_id).await {
            warn!("Failed to close round: {:#}", e);
        }
    }
}
