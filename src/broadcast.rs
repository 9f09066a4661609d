// Snapshot fan-out hub. The engine publishes here; the WebSocket layer
// subscribes and forwards to connected clients.

use tokio::sync::broadcast;
use tracing::debug;

use crate::auction::session::AuctionSession;
use crate::protocol::{BidUpdate, ServerMessage};
use crate::store::Broadcaster;

/// Default channel capacity. A slow subscriber that falls further behind
/// than this loses intermediate snapshots for itself only; the engine is
/// never blocked.
pub const DEFAULT_CAPACITY: usize = 256;

/// Fire-and-forget broadcast of server messages over a tokio broadcast
/// channel. Send order is preserved per subscriber, so observers that keep
/// up see every transition, not just the final state.
pub struct BroadcastHub {
    tx: broadcast::Sender<ServerMessage>,
}

impl BroadcastHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        BroadcastHub { tx }
    }

    /// A fresh receiver for one observer connection.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerMessage> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    fn send(&self, msg: ServerMessage) {
        // A send error only means no subscriber is currently connected.
        if self.tx.send(msg).is_err() {
            debug!("Broadcast dropped: no connected subscribers");
        }
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        BroadcastHub::new(DEFAULT_CAPACITY)
    }
}

impl Broadcaster for BroadcastHub {
    fn publish(&self, session_id: &str, snapshot: &AuctionSession) {
        self.send(ServerMessage::Snapshot {
            session_id: session_id.to_string(),
            snapshot: snapshot.clone(),
        });
    }

    fn relay_bid(&self, session_id: &str, update: &BidUpdate) {
        self.send(ServerMessage::BidUpdate {
            session_id: session_id.to_string(),
            payload: update.clone(),
        });
    }
}
