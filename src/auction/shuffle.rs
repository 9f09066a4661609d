// Queue generation strategies and the tier-group editor for the custom mix.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::item::{Pool, Tier};

/// How the auction order is generated at start time. Selected once by the
/// organizer; the engine never switches strategies mid-session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "camelCase")]
pub enum ShufflePlan {
    /// One unbiased shuffle of the entire pool.
    Random,
    /// Tier blocks in the given order, shuffled within each block. Items
    /// whose tier is not listed (and untiered items) form a final shuffled
    /// block.
    TierOrdered { order: Vec<String> },
    /// Ordered groups of tiers; each group's items are pooled and shuffled
    /// together as one block. Group membership must partition the tier set;
    /// the caller (the group editor) maintains that invariant.
    CustomMix { groups: Vec<TierGroup> },
}

/// One block of the custom mix: one or more tiers auctioned as a single
/// shuffled unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierGroup {
    pub tiers: Vec<String>,
}

/// Generate the auction queue from the pool under the given plan.
///
/// An empty pool yields an empty queue (a session over it completes
/// immediately). Tier references that match no pool item are skipped, since
/// a tier may have zero items by auction time.
pub fn generate_queue<R: Rng>(pool: &Pool, plan: &ShufflePlan, rng: &mut R) -> Vec<String> {
    match plan {
        ShufflePlan::Random => {
            let mut queue: Vec<String> =
                pool.items().iter().map(|i| i.item_id.clone()).collect();
            queue.shuffle(rng);
            queue
        }
        ShufflePlan::TierOrdered { order } => {
            let mut queue = Vec::with_capacity(pool.len());
            for tier_id in order {
                let mut block = ids_in_tier(pool, tier_id);
                block.shuffle(rng);
                queue.extend(block);
            }
            let mut rest: Vec<String> = pool
                .items()
                .iter()
                .filter(|i| match &i.tier_id {
                    Some(t) => !order.contains(t),
                    None => true,
                })
                .map(|i| i.item_id.clone())
                .collect();
            rest.shuffle(rng);
            queue.extend(rest);
            queue
        }
        ShufflePlan::CustomMix { groups } => {
            let mut queue = Vec::with_capacity(pool.len());
            for group in groups {
                let mut block: Vec<String> = pool
                    .items()
                    .iter()
                    .filter(|i| {
                        i.tier_id
                            .as_ref()
                            .is_some_and(|t| group.tiers.contains(t))
                    })
                    .map(|i| i.item_id.clone())
                    .collect();
                block.shuffle(rng);
                queue.extend(block);
            }
            let mut untiered: Vec<String> = pool
                .items()
                .iter()
                .filter(|i| i.tier_id.is_none())
                .map(|i| i.item_id.clone())
                .collect();
            untiered.shuffle(rng);
            queue.extend(untiered);
            queue
        }
    }
}

fn ids_in_tier(pool: &Pool, tier_id: &str) -> Vec<String> {
    pool.items()
        .iter()
        .filter(|i| i.tier_id.as_deref() == Some(tier_id))
        .map(|i| i.item_id.clone())
        .collect()
}

// ---------------------------------------------------------------------------
// Tier group editor
// ---------------------------------------------------------------------------

/// Editable group layout backing the custom-mix plan. Every operation keeps
/// the groups a partition of the original tier set: merge moves tiers
/// between groups, split breaks a group back into singletons, and nothing
/// ever drops or duplicates a tier.
#[derive(Debug, Clone, PartialEq)]
pub struct TierGroups {
    groups: Vec<TierGroup>,
}

impl TierGroups {
    /// One singleton group per tier, in tier display order.
    pub fn singletons(tiers: &[Tier]) -> Self {
        let mut sorted: Vec<&Tier> = tiers.iter().collect();
        sorted.sort_by_key(|t| t.sort_order);
        TierGroups {
            groups: sorted
                .into_iter()
                .map(|t| TierGroup {
                    tiers: vec![t.tier_id.clone()],
                })
                .collect(),
        }
    }

    pub fn groups(&self) -> &[TierGroup] {
        &self.groups
    }

    /// Total number of tiers across all groups.
    pub fn tier_count(&self) -> usize {
        self.groups.iter().map(|g| g.tiers.len()).sum()
    }

    /// Merge group `src` into group `dst`, removing `src`. Returns false
    /// (and changes nothing) when either index is out of range or they are
    /// equal.
    pub fn merge(&mut self, src: usize, dst: usize) -> bool {
        if src == dst || src >= self.groups.len() || dst >= self.groups.len() {
            return false;
        }
        let moved = self.groups.remove(src);
        let dst = if src < dst { dst - 1 } else { dst };
        self.groups[dst].tiers.extend(moved.tiers);
        true
    }

    /// Split the group at `idx` back into singleton groups, inserted in
    /// place. Returns false when the index is out of range; splitting a
    /// singleton is a no-op that returns true.
    pub fn split(&mut self, idx: usize) -> bool {
        if idx >= self.groups.len() {
            return false;
        }
        let group = self.groups.remove(idx);
        for (offset, tier_id) in group.tiers.into_iter().enumerate() {
            self.groups.insert(
                idx + offset,
                TierGroup {
                    tiers: vec![tier_id],
                },
            );
        }
        true
    }

    pub fn into_plan(self) -> ShufflePlan {
        ShufflePlan::CustomMix {
            groups: self.groups,
        }
    }
}
