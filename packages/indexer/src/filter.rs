//! Event Classification
//!
//! Sorts collected logs into mints and genuine morphs, dropping logs from
//! other events, transfer-subtype morph logs and logs already recorded in
//! the transaction ledger.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use alloy::primitives::B256;
use alloy::sol_types::SolEvent;
use tracing::{debug, info, warn};

use crate::decoder::{
    decode_mint, decode_morph, MintEvent, MorphEvent, MorphEventType, TokenMinted, TokenMorphed,
};
use crate::entity::ledger_key;
use crate::rpc::RawLog;

/// Contract events the indexer consumes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// TokenMinted(uint256 indexed,uint256)
    Minted,
    /// TokenMorphed(uint256 indexed,uint256,uint256,uint256,uint8)
    Morphed,
}

impl EventKind {
    /// Returns the topic0 signature hash
    pub fn signature(&self) -> B256 {
        match self {
            EventKind::Minted => TokenMinted::SIGNATURE_HASH,
            EventKind::Morphed => TokenMorphed::SIGNATURE_HASH,
        }
    }

    /// Returns the event name
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Minted => "TokenMinted",
            EventKind::Morphed => "TokenMorphed",
        }
    }
}

/// Static lookup table for event signatures
static EVENT_KINDS: LazyLock<HashMap<B256, EventKind>> = LazyLock::new(|| {
    let mut map = HashMap::new();
    map.insert(TokenMinted::SIGNATURE_HASH, EventKind::Minted);
    map.insert(TokenMorphed::SIGNATURE_HASH, EventKind::Morphed);
    map
});

/// Get the event kind for a topic0 hash, if it is one we consume
pub fn event_kind(topic: &B256) -> Option<EventKind> {
    EVENT_KINDS.get(topic).copied()
}

/// Set of `(txHash, logIndex)` pairs already applied
#[derive(Debug, Clone, Default)]
pub struct TransactionLedger {
    seen: HashSet<String>,
}

impl TransactionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from stored ledger keys
    pub fn from_keys(keys: impl IntoIterator<Item = String>) -> Self {
        Self {
            seen: keys.into_iter().map(|k| k.to_lowercase()).collect(),
        }
    }

    pub fn contains(&self, tx_hash: &str, log_index: u64) -> bool {
        self.seen.contains(&ledger_key(tx_hash, log_index))
    }

    /// Record a log, returning false if it was already present
    pub fn insert(&mut self, tx_hash: &str, log_index: u64) -> bool {
        self.seen.insert(ledger_key(tx_hash, log_index))
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// Logs of one window, split by what happens to them next
#[derive(Debug, Clone, Default)]
pub struct ClassifiedBatch {
    /// New mints, in chain order
    pub mints: Vec<MintEvent>,
    /// New morphs, in chain order
    pub morphs: Vec<MorphEvent>,
    /// Logs already in the ledger
    pub duplicates: usize,
    /// Morph logs with a non-morph subtype
    pub transfers: usize,
    /// Logs from other events
    pub ignored: usize,
    /// Logs that failed to decode
    pub malformed: usize,
}

impl ClassifiedBatch {
    pub fn is_empty(&self) -> bool {
        self.mints.is_empty() && self.morphs.is_empty()
    }
}

/// Classify and deduplicate a window of logs
///
/// # Arguments
/// * `logs` - Raw contract logs, in any order
/// * `ledger` - Logs applied by earlier runs
///
/// # Returns
/// Mints and morphs still to apply, each sorted chronologically
pub fn classify_events(logs: &[RawLog], ledger: &TransactionLedger) -> ClassifiedBatch {
    let mut batch = ClassifiedBatch::default();
    let mut in_batch = TransactionLedger::new();

    for log in logs {
        let Some(kind) = log.topics.first().and_then(event_kind) else {
            batch.ignored += 1;
            continue;
        };

        let tx_hash = log.tx_hash_hex();
        if ledger.contains(&tx_hash, log.log_index) || !in_batch.insert(&tx_hash, log.log_index) {
            info!(
                "Already processed {} log {}:{}, skipping",
                kind.name(),
                tx_hash,
                log.log_index
            );
            batch.duplicates += 1;
            continue;
        }

        match kind {
            EventKind::Minted => match decode_mint(log) {
                Ok(event) => batch.mints.push(event),
                Err(e) => {
                    warn!("Skipping malformed log in block {}: {}", log.block_number, e);
                    batch.malformed += 1;
                }
            },
            EventKind::Morphed => match decode_morph(log) {
                Ok(event) if event.event_type == MorphEventType::Morph => batch.morphs.push(event),
                Ok(event) => {
                    info!(
                        "Ignoring {:?} subtype of TokenMorphed for token {}",
                        event.event_type, event.token_id
                    );
                    batch.transfers += 1;
                }
                Err(e) => {
                    warn!("Skipping malformed log in block {}: {}", log.block_number, e);
                    batch.malformed += 1;
                }
            },
        }
    }

    batch.mints.sort_by(|a, b| a.position.cmp(&b.position));
    batch.morphs.sort_by(|a, b| a.position.cmp(&b.position));

    debug!(
        "Classified {} logs: {} mints, {} morphs, {} duplicates, {} transfers, {} ignored",
        logs.len(),
        batch.mints.len(),
        batch.morphs.len(),
        batch.duplicates,
        batch.transfers,
        batch.ignored
    );
    batch
}
