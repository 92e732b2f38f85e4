//! Ranking Engine
//!
//! Re-ranks the whole projection by rarity score. Ranks are dense: tied
//! scores share a rank and the next distinct score takes the next rank.
//! Only records whose rank actually changed are written back.

use std::cmp::Ordering;

use tracing::info;

use crate::store::{ProjectionStore, StoreError};

/// Score and stored rank of one token
#[derive(Debug, Clone, PartialEq)]
pub struct RankEntry {
    pub token_id: String,
    pub score: f64,
    pub rank: u64,
}

/// A rank write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankUpdate {
    pub token_id: String,
    pub rank: u64,
}

/// Numeric order of decimal token ids
pub fn compare_token_ids(a: &str, b: &str) -> Ordering {
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

/// Ranking order: highest score first, then lowest token id
pub fn ranking_order(a: &RankEntry, b: &RankEntry) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| compare_token_ids(&a.token_id, &b.token_id))
}

/// Assign dense ranks to entries sorted by [`ranking_order`]
///
/// # Returns
/// Updates for entries whose rank differs from the stored one
pub fn assign_ranks(entries: &[RankEntry]) -> Vec<RankUpdate> {
    let mut updates = Vec::new();
    let mut rank = 0u64;
    let mut previous: Option<f64> = None;

    for entry in entries {
        if previous != Some(entry.score) {
            rank += 1;
            previous = Some(entry.score);
        }
        if entry.rank != rank {
            updates.push(RankUpdate {
                token_id: entry.token_id.clone(),
                rank,
            });
        }
    }
    updates
}

/// Recompute ranks for the whole projection and persist the changes
///
/// # Returns
/// The number of ranks written
pub async fn update_all_ranking<S>(store: &S) -> Result<usize, StoreError>
where
    S: ProjectionStore + ?Sized,
{
    let mut entries = store.rank_entries().await?;
    entries.sort_by(ranking_order);

    let updates = assign_ranks(&entries);
    if !updates.is_empty() {
        store.update_ranks(&updates).await?;
    }
    info!(
        "Ranked {} tokens, {} ranks changed",
        entries.len(),
        updates.len()
    );
    Ok(updates.len())
}
