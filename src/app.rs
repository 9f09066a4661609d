// Application state and orchestration logic.
//
// The single serialized entry point for the auction: every operator action
// flows through one event loop, mutates the in-memory session, then runs
// the side-effect protocol (close round, open round, persist, broadcast)
// in that order. Side-effect failures are logged and never roll back the
// in-memory transition.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::auction::item::Pool;
use crate::auction::round::RoundController;
use crate::auction::session::{ActionError, AuctionSession, Phase};
use crate::auction::shuffle;
use crate::config::Config;
use crate::protocol::{
    ClientMessage, ClientRole, OperatorAction, OperatorPredicate, ServerMessage,
};
use crate::store::{Broadcaster, SessionStatus, SnapshotStore};
use crate::ws_server::WsEvent;

/// A connected client: its claimed role and the direct channel for
/// messages meant only for it.
pub struct ClientSeat {
    pub role: ClientRole,
    pub reply: mpsc::Sender<ServerMessage>,
}

/// The complete application state. Owned exclusively by the engine event
/// loop; nothing else mutates the session.
pub struct AppState {
    pub config: Config,
    pub pool: Pool,
    pub session: AuctionSession,
    pub store: Arc<dyn SnapshotStore>,
    pub broadcaster: Arc<dyn Broadcaster>,
    pub rounds: RoundController,
    /// Pure predicate deciding which roles may drive the state machine.
    pub is_operator: OperatorPredicate,
    /// Connected clients by address. Clients that never sent a HELLO are
    /// treated as spectators.
    pub seats: HashMap<String, ClientSeat>,
}

impl AppState {
    pub fn new(
        config: Config,
        pool: Pool,
        session: AuctionSession,
        store: Arc<dyn SnapshotStore>,
        broadcaster: Arc<dyn Broadcaster>,
        is_operator: OperatorPredicate,
    ) -> Self {
        let rounds = RoundController::new(store.clone(), session.session_id.clone());
        AppState {
            config,
            pool,
            session,
            store,
            broadcaster,
            rounds,
            is_operator,
            seats: HashMap::new(),
        }
    }

    /// Apply one operator action to the session, then run the side-effect
    /// protocol. Invariant violations are returned without touching any
    /// state; side-effect failures are logged and the applied transition
    /// stands.
    pub async fn apply_action(&mut self, action: OperatorAction) -> Result<(), ActionError> {
        match &action {
            OperatorAction::Start { strategy } => {
                let queue =
                    shuffle::generate_queue(&self.pool, strategy, &mut rand::thread_rng());
                self.session.start(queue)?;
                info!(
                    "Auction started with {} items across {} teams",
                    self.session.queue.len(),
                    self.session.teams.len()
                );
            }
            OperatorAction::Sell { team_id, price } => {
                let item_id = self
                    .session
                    .current_item()
                    .ok_or(ActionError::NotLive)?
                    .to_string();
                let price = price.unwrap_or_else(|| self.pool.default_price(&item_id));
                self.session.sell(team_id, price)?;
                info!("Sold {} to {} for {}", item_id, team_id, price);
            }
            OperatorAction::MarkUnsold => {
                let item_id = self
                    .session
                    .current_item()
                    .unwrap_or_default()
                    .to_string();
                self.session.mark_unsold()?;
                info!("Marked {} unsold", item_id);
            }
            OperatorAction::Defer => {
                let item_id = self
                    .session
                    .current_item()
                    .unwrap_or_default()
                    .to_string();
                self.session.defer()?;
                info!("Deferred {} to end of queue", item_id);
            }
            OperatorAction::Undo => match self.session.undo()? {
                Some(record) => {
                    info!("Undid {:?} of {}", record.action, record.item_id)
                }
                None => {
                    debug!("Undo with empty history ignored");
                    return Ok(());
                }
            },
            OperatorAction::RequeueDeferred => {
                let count = self.session.requeue_deferred(&mut rand::thread_rng())?;
                info!("Requeued {} unsold deferred items for a second pass", count);
            }
        }

        self.sync_after_transition().await;
        Ok(())
    }

    /// The side-effect protocol for an applied transition, in contract
    /// order: round close/open first, then the durable snapshot and team
    /// writes, then the broadcast, so every broadcasted live cursor has a
    /// corresponding open round.
    async fn sync_after_transition(&mut self) {
        self.rounds.advance(&self.session, &self.pool).await;

        let session_id = self.session.session_id.clone();
        if let Err(e) = self.store.save_snapshot(&session_id, &self.session).await {
            warn!("Failed to save snapshot: {:#}", e);
        }
        if let Err(e) = self
            .store
            .save_teams(&session_id, &self.session.teams)
            .await
        {
            warn!("Failed to save teams: {:#}", e);
        }
        let status = match self.session.phase() {
            Phase::NotStarted => SessionStatus::NotStarted,
            Phase::Live => SessionStatus::Live,
            Phase::Complete => SessionStatus::Complete,
        };
        if let Err(e) = self.store.save_status(&session_id, status).await {
            warn!("Failed to save session status: {:#}", e);
        }

        self.broadcaster.publish(&session_id, &self.session);
    }

    /// The role a connected address claimed, defaulting to spectator.
    fn role_of(&self, addr: &str) -> ClientRole {
        self.seats
            .get(addr)
            .map(|seat| seat.role)
            .unwrap_or(ClientRole::Spectator)
    }

    /// Send a message to one client only; a full or closed channel just
    /// drops the message.
    async fn reply_to(&self, addr: &str, msg: ServerMessage) {
        if let Some(seat) = self.seats.get(addr) {
            let _ = seat.reply.send(msg).await;
        }
    }
}

/// The engine event loop: consumes WebSocket events and applies operator
/// actions strictly sequentially. Exits when the event channel closes.
pub async fn run(mut ws_rx: mpsc::Receiver<WsEvent>, mut state: AppState) -> anyhow::Result<()> {
    info!("Engine event loop started");

    while let Some(event) = ws_rx.recv().await {
        match event {
            WsEvent::Connected { addr, reply } => {
                info!("Client connected: {}", addr);
                state.seats.insert(
                    addr.clone(),
                    ClientSeat {
                        role: ClientRole::Spectator,
                        reply,
                    },
                );
                // Catch the new client up immediately; it must not have to
                // wait for the next transition to learn the current state.
                state
                    .reply_to(
                        &addr,
                        ServerMessage::Snapshot {
                            session_id: state.session.session_id.clone(),
                            snapshot: state.session.clone(),
                        },
                    )
                    .await;
            }
            WsEvent::Disconnected { addr } => {
                info!("Client disconnected: {}", addr);
                state.seats.remove(&addr);
            }
            WsEvent::Message { addr, text } => {
                handle_client_message(&mut state, &addr, &text).await;
            }
        }
    }

    info!("Engine event loop exiting");
    Ok(())
}

/// Handle an incoming client message (JSON text frame).
async fn handle_client_message(state: &mut AppState, addr: &str, text: &str) {
    let msg: ClientMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            warn!("Failed to parse message from {}: {}", addr, e);
            return;
        }
    };

    match msg {
        ClientMessage::Hello { payload } => {
            info!(
                "Client {} identified as {:?} ({})",
                addr,
                payload.role,
                payload.display_name.as_deref().unwrap_or("unnamed")
            );
            if let Some(seat) = state.seats.get_mut(addr) {
                seat.role = payload.role;
            }
        }
        ClientMessage::Action { payload } => {
            let role = state.role_of(addr);
            if !(state.is_operator)(&role) {
                warn!("Rejected action from {} with role {:?}", addr, role);
                state
                    .reply_to(
                        addr,
                        ServerMessage::ActionRejected {
                            reason: "not authorized to operate the auction".to_string(),
                        },
                    )
                    .await;
                return;
            }
            if let Err(e) = state.apply_action(payload).await {
                state
                    .reply_to(
                        addr,
                        ServerMessage::ActionRejected {
                            reason: e.to_string(),
                        },
                    )
                    .await;
            }
        }
        ClientMessage::BidUpdate { payload } => {
            // Bid ticks are display traffic: relayed to all observers,
            // never applied to the aggregate.
            let session_id = state.session.session_id.clone();
            state.broadcaster.relay_bid(&session_id, &payload);
        }
    }
}
