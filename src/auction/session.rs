// Auction session aggregate: queue, cursor, teams, and the transition rules
// for sell / unsold / defer / undo.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Invariant violations. Rejected synchronously before any state changes;
/// side-effect failures are handled elsewhere and never surface here.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ActionError {
    #[error("auction has already started")]
    AlreadyStarted,

    #[error("auction requires at least two teams, have {count}")]
    TooFewTeams { count: usize },

    #[error("no live item to act on")]
    NotLive,

    #[error("unknown team: {team_id}")]
    UnknownTeam { team_id: String },

    #[error("auction is not complete")]
    NotComplete,

    #[error("no unsold deferred items to requeue")]
    NothingToRequeue,
}

// ---------------------------------------------------------------------------
// Aggregate types
// ---------------------------------------------------------------------------

/// One item won by a team, in acquisition order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Acquisition {
    pub item_id: String,
    pub price: i64,
}

/// A bidding team. Budgets are signed: the engine treats overspending as
/// advisory and a sale may drive `coins` negative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Team {
    pub team_id: String,
    pub name: String,
    pub starting_budget: i64,
    /// Remaining budget.
    pub coins: i64,
    /// Items acquired so far, in sale order.
    pub acquisitions: Vec<Acquisition>,
}

impl Team {
    pub fn new(team_id: impl Into<String>, name: impl Into<String>, budget: i64) -> Self {
        Team {
            team_id: team_id.into(),
            name: name.into(),
            starting_budget: budget,
            coins: budget,
            acquisitions: Vec::new(),
        }
    }

    /// Total spent so far.
    pub fn spent(&self) -> i64 {
        self.starting_budget - self.coins
    }
}

/// The winning team and price for a sold item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sale {
    pub team_id: String,
    pub price: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionKind {
    Sold,
    Unsold,
    Deferred,
}

/// One entry in the action log. The log is append-only except for Undo,
/// which pops and inverts the most recent record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    pub item_id: String,
    /// Winning team for SOLD records; absent for UNSOLD and DEFERRED.
    pub team_id: Option<String>,
    pub price: i64,
    pub action: ActionKind,
}

/// Derived lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    NotStarted,
    Live,
    Complete,
}

// ---------------------------------------------------------------------------
// AuctionSession
// ---------------------------------------------------------------------------

/// The runtime aggregate for one auction session. All mutation goes through
/// the transition methods below; the engine serializes calls so exactly one
/// action is in flight at a time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuctionSession {
    pub session_id: String,
    /// Display name, refreshed from configuration on restore.
    pub name: String,
    /// The auction order. Fixed once generated; items move within it only
    /// via defer-to-end and its undo.
    pub queue: Vec<String>,
    /// Index of the currently auctioned item; `cursor == queue.len()` means
    /// the session is complete.
    pub cursor: usize,
    pub started: bool,
    pub sold: HashMap<String, Sale>,
    /// Unsold items in the order they were marked.
    pub unsold: Vec<String>,
    /// Items that have been pushed to the end of the queue at least once.
    pub deferred: Vec<String>,
    pub history: Vec<HistoryRecord>,
    pub teams: Vec<Team>,
    /// Timestamp of the last mutation; display only, not used for
    /// concurrency control.
    pub last_updated: DateTime<Utc>,
}

impl AuctionSession {
    /// A fresh, not-started session over the given teams.
    pub fn new(
        session_id: impl Into<String>,
        name: impl Into<String>,
        teams: Vec<Team>,
    ) -> Self {
        AuctionSession {
            session_id: session_id.into(),
            name: name.into(),
            queue: Vec::new(),
            cursor: 0,
            started: false,
            sold: HashMap::new(),
            unsold: Vec::new(),
            deferred: Vec::new(),
            history: Vec::new(),
            teams,
            last_updated: Utc::now(),
        }
    }

    pub fn phase(&self) -> Phase {
        if !self.started {
            Phase::NotStarted
        } else if self.cursor < self.queue.len() {
            Phase::Live
        } else {
            Phase::Complete
        }
    }

    pub fn is_live(&self) -> bool {
        self.phase() == Phase::Live
    }

    /// The item currently up for bidding, when the session is live.
    pub fn current_item(&self) -> Option<&str> {
        if self.is_live() {
            Some(self.queue[self.cursor].as_str())
        } else {
            None
        }
    }

    pub fn team(&self, team_id: &str) -> Option<&Team> {
        self.teams.iter().find(|t| t.team_id == team_id)
    }

    pub fn team_mut(&mut self, team_id: &str) -> Option<&mut Team> {
        self.teams.iter_mut().find(|t| t.team_id == team_id)
    }

    fn touch(&mut self) {
        self.last_updated = Utc::now();
    }

    // ------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------

    /// Begin the auction over a pre-generated queue. Requires at least two
    /// teams and a not-yet-started session. An empty queue is valid: the
    /// session completes immediately.
    pub fn start(&mut self, queue: Vec<String>) -> Result<(), ActionError> {
        if self.started {
            return Err(ActionError::AlreadyStarted);
        }
        if self.teams.len() < 2 {
            return Err(ActionError::TooFewTeams {
                count: self.teams.len(),
            });
        }
        self.queue = queue;
        self.cursor = 0;
        self.started = true;
        self.touch();
        Ok(())
    }

    /// Sell the current item to `team_id` at `price` and advance the cursor.
    ///
    /// The budget check is advisory: a price above the team's remaining
    /// coins is logged and applied anyway, driving `coins` negative.
    pub fn sell(&mut self, team_id: &str, price: i64) -> Result<(), ActionError> {
        let item_id = self
            .current_item()
            .ok_or(ActionError::NotLive)?
            .to_string();

        let team = self
            .team_mut(team_id)
            .ok_or_else(|| ActionError::UnknownTeam {
                team_id: team_id.to_string(),
            })?;

        if price > team.coins {
            warn!(
                "Team {} buying {} for {} with only {} remaining",
                team_id, item_id, price, team.coins
            );
        }
        team.coins -= price;
        team.acquisitions.push(Acquisition {
            item_id: item_id.clone(),
            price,
        });

        self.sold.insert(
            item_id.clone(),
            Sale {
                team_id: team_id.to_string(),
                price,
            },
        );
        self.history.push(HistoryRecord {
            item_id,
            team_id: Some(team_id.to_string()),
            price,
            action: ActionKind::Sold,
        });
        self.cursor += 1;
        self.touch();
        Ok(())
    }

    /// Mark the current item unsold and advance the cursor.
    pub fn mark_unsold(&mut self) -> Result<(), ActionError> {
        let item_id = self
            .current_item()
            .ok_or(ActionError::NotLive)?
            .to_string();

        self.unsold.push(item_id.clone());
        self.history.push(HistoryRecord {
            item_id,
            team_id: None,
            price: 0,
            action: ActionKind::Unsold,
        });
        self.cursor += 1;
        self.touch();
        Ok(())
    }

    /// Push the current item to the end of the queue. The cursor does not
    /// move: the item that was next in line is now the current one.
    pub fn defer(&mut self) -> Result<(), ActionError> {
        if !self.is_live() {
            return Err(ActionError::NotLive);
        }
        let item_id = self.queue.remove(self.cursor);
        self.queue.push(item_id.clone());
        if !self.deferred.contains(&item_id) {
            self.deferred.push(item_id.clone());
        }
        self.history.push(HistoryRecord {
            item_id,
            team_id: None,
            price: 0,
            action: ActionKind::Deferred,
        });
        self.touch();
        Ok(())
    }

    /// Pop the most recent history record and invert it, restoring the
    /// exact pre-action state. Returns the inverted record, or `None` when
    /// the history is empty (a no-op, not an error).
    pub fn undo(&mut self) -> Result<Option<HistoryRecord>, ActionError> {
        let Some(record) = self.history.pop() else {
            return Ok(None);
        };

        match record.action {
            ActionKind::Sold => {
                match record.team_id.as_deref().and_then(|id| {
                    self.teams.iter_mut().find(|t| t.team_id == id)
                }) {
                    Some(team) => {
                        team.coins += record.price;
                        if let Some(pos) = team
                            .acquisitions
                            .iter()
                            .rposition(|a| a.item_id == record.item_id)
                        {
                            team.acquisitions.remove(pos);
                        }
                    }
                    None => {
                        warn!(
                            "Undo of sale for {} found no matching team {:?}",
                            record.item_id, record.team_id
                        );
                    }
                }
                self.sold.remove(&record.item_id);
                self.cursor -= 1;
            }
            ActionKind::Unsold => {
                if let Some(pos) =
                    self.unsold.iter().rposition(|id| *id == record.item_id)
                {
                    self.unsold.remove(pos);
                }
                self.cursor -= 1;
            }
            ActionKind::Deferred => {
                // The deferred item sits at its last occurrence (the tail);
                // move it back to the cursor position it was deferred from.
                if let Some(pos) =
                    self.queue.iter().rposition(|id| *id == record.item_id)
                {
                    let item = self.queue.remove(pos);
                    self.queue.insert(self.cursor, item);
                }
                self.deferred.retain(|id| *id != record.item_id);
                // Cursor unchanged, mirroring defer's non-increment.
            }
        }

        self.touch();
        Ok(Some(record))
    }

    /// Second pass over items that were deferred and ended the first pass
    /// unsold: pulls them out of `unsold`, reshuffles them into a fresh
    /// tail segment, and goes live again. Only valid on a complete session.
    ///
    /// The undo log restarts with the new pass; first-pass records cannot
    /// be inverted once their items have been requeued.
    pub fn requeue_deferred<R: Rng>(&mut self, rng: &mut R) -> Result<usize, ActionError> {
        if self.phase() != Phase::Complete {
            return Err(ActionError::NotComplete);
        }
        let mut batch: Vec<String> = self
            .unsold
            .iter()
            .filter(|id| self.deferred.contains(*id))
            .cloned()
            .collect();
        if batch.is_empty() {
            return Err(ActionError::NothingToRequeue);
        }

        self.unsold.retain(|id| !batch.contains(id));
        self.queue.retain(|id| !batch.contains(id));
        self.cursor = self.queue.len();
        batch.shuffle(rng);
        self.queue.append(&mut batch);
        self.history.clear();
        self.touch();
        Ok(self.queue.len() - self.cursor)
    }
}
