//! Event Collector
//!
//! Fetches contract logs for the next block window. A window larger than
//! the provider's range limit is clamped and the remainder is left for the
//! next run; RPC failures are returned to the caller untouched so the
//! checkpoint does not move.

use thiserror::Error;
use tracing::{debug, info};

use crate::rpc::{ChainClient, RawLog, RpcError};

/// Default maximum number of blocks per log query
pub const DEFAULT_MAX_BLOCK_RANGE: u64 = 1000;

/// Errors that can occur while collecting logs
#[derive(Error, Debug)]
pub enum CollectError {
    #[error("Failed to read chain head: {0}")]
    Head(#[source] RpcError),

    #[error("Failed to fetch logs for blocks {from}..={to}: {source}")]
    Logs {
        from: u64,
        to: u64,
        #[source]
        source: RpcError,
    },

    #[error("Block range must be at least 1")]
    ZeroRange,
}

/// An explicit block range requested by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRange {
    pub from: u64,
    pub to: u64,
}

/// Logs of one collected window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectedWindow {
    pub logs: Vec<RawLog>,
    /// First block queried
    pub from: u64,
    /// Last block queried, inclusive
    pub to: u64,
    /// Where the next run should start
    pub next_checkpoint: u64,
    /// Whether the window was cut short by the range limit
    pub clamped: bool,
}

/// Compute the window to query
///
/// # Arguments
/// * `from` - First unprocessed block
/// * `to` - Last block wanted, usually the chain head
/// * `max_range` - Maximum number of blocks per query
///
/// # Returns
/// `(from, to, clamped)`, or `None` when `from` is past `to`
pub fn plan_window(from: u64, to: u64, max_range: u64) -> Option<(u64, u64, bool)> {
    if from > to || max_range == 0 {
        return None;
    }
    let limit = from.saturating_add(max_range - 1);
    if to > limit {
        Some((from, limit, true))
    } else {
        Some((from, to, false))
    }
}

/// Collect the logs of the next window
///
/// # Arguments
/// * `client` - Chain client
/// * `checkpoint` - First block not yet processed
/// * `range` - Explicit range overriding the checkpoint and head
/// * `max_range` - Maximum number of blocks per query
///
/// # Returns
/// The collected window, or `None` when there is nothing to collect
pub async fn collect_events<C>(
    client: &C,
    checkpoint: u64,
    range: Option<BlockRange>,
    max_range: u64,
) -> Result<Option<CollectedWindow>, CollectError>
where
    C: ChainClient + ?Sized,
{
    if max_range == 0 {
        return Err(CollectError::ZeroRange);
    }

    let head = client.block_number().await.map_err(CollectError::Head)?;
    let (from, wanted) = match range {
        Some(range) => (range.from, range.to.min(head)),
        None => (checkpoint, head),
    };

    let Some((from, to, clamped)) = plan_window(from, wanted, max_range) else {
        debug!("Checkpoint {} is ahead of block {}, nothing to collect", from, wanted);
        return Ok(None);
    };

    let logs = client
        .logs(from, to)
        .await
        .map_err(|source| CollectError::Logs { from, to, source })?;

    if clamped {
        info!(
            "Clamped window to blocks {}..={} ({} blocks behind head {})",
            from,
            to,
            head - to,
            head
        );
    }
    info!("Collected {} logs from blocks {}..={}", logs.len(), from, to);

    Ok(Some(CollectedWindow {
        logs,
        from,
        to,
        next_checkpoint: to + 1,
        clamped,
    }))
}
