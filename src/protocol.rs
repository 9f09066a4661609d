// Wire messages between the engine and connected WebSocket clients.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::auction::session::AuctionSession;
use crate::auction::shuffle::ShufflePlan;

/// Who a connected client claims to be. Role evaluation itself is external;
/// the engine only consults the [`OperatorPredicate`] it was given.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientRole {
    /// The single authoritative seat driving the state machine.
    Auctioneer,
    /// A bidding team captain: read-only on the aggregate, may send bid
    /// ticks for display.
    Captain,
    Spectator,
}

/// Pure predicate deciding whether a role may drive operator actions.
/// Supplied by the embedding application; the engine never inspects roles
/// beyond calling this.
pub type OperatorPredicate = Arc<dyn Fn(&ClientRole) -> bool + Send + Sync>;

/// The default policy: only the auctioneer seat operates the auction.
pub fn auctioneer_only() -> OperatorPredicate {
    Arc::new(|role| matches!(role, ClientRole::Auctioneer))
}

/// A transient "current high bid" tick, relayed to all observers for
/// display. Bids never mutate the auction aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BidUpdate {
    pub item_id: String,
    pub team_id: String,
    pub amount: i64,
}

/// An operator action against the state machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum OperatorAction {
    /// Generate the queue with the given strategy and go live.
    Start { strategy: ShufflePlan },
    /// Sell the current item. When `price` is omitted it defaults to the
    /// item's tier base price.
    Sell {
        team_id: String,
        #[serde(default)]
        price: Option<i64>,
    },
    MarkUnsold,
    Defer,
    Undo,
    /// Second pass over items that were deferred and ended unsold.
    RequeueDeferred,
}

/// Messages sent by clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "HELLO")]
    Hello { payload: HelloPayload },
    #[serde(rename = "ACTION")]
    Action { payload: OperatorAction },
    #[serde(rename = "BID_UPDATE")]
    BidUpdate { payload: BidUpdate },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelloPayload {
    pub role: ClientRole,
    #[serde(default)]
    pub display_name: Option<String>,
}

/// Messages pushed to clients. Snapshots are published once per applied
/// transition, in order; observers see every intermediate state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    #[serde(rename = "SNAPSHOT")]
    Snapshot {
        session_id: String,
        snapshot: AuctionSession,
    },
    #[serde(rename = "BID_UPDATE")]
    BidUpdate {
        session_id: String,
        payload: BidUpdate,
    },
    /// Sent only to the client whose action was rejected.
    #[serde(rename = "ACTION_REJECTED")]
    ActionRejected { reason: String },
}
