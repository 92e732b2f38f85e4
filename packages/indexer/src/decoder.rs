//! Event Decoder
//!
//! Decodes the collection contract's `TokenMinted` and `TokenMorphed` logs
//! into typed events carrying their chain position.

use std::cmp::Ordering;

use alloy::primitives::{B256, U256};
use alloy::sol;
use alloy::sol_types::SolEvent;
use thiserror::Error;

use crate::rpc::RawLog;

sol! {
    #[derive(Debug, PartialEq, Eq)]
    event TokenMinted(uint256 indexed tokenId, uint256 newGene);

    #[derive(Debug, PartialEq, Eq)]
    event TokenMorphed(
        uint256 indexed tokenId,
        uint256 oldGene,
        uint256 newGene,
        uint256 price,
        uint8 eventType
    );
}

/// Errors that can occur while decoding a log
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Failed to decode {event} log: {reason}")]
    Abi { event: &'static str, reason: String },
}

/// Position of a log on chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LogPosition {
    pub block_number: u64,
    pub tx_index: u64,
    pub log_index: u64,
    pub tx_hash: B256,
}

impl LogPosition {
    pub fn of(log: &RawLog) -> Self {
        Self {
            block_number: log.block_number,
            tx_index: log.tx_index,
            log_index: log.log_index,
            tx_hash: log.tx_hash,
        }
    }

    /// Transaction hash with 0x prefix
    pub fn tx_hash_hex(&self) -> String {
        format!("0x{}", hex::encode(self.tx_hash))
    }
}

impl Ord for LogPosition {
    /// Chronological order: block, then transaction, then log
    fn cmp(&self, other: &Self) -> Ordering {
        (self.block_number, self.tx_index, self.log_index)
            .cmp(&(other.block_number, other.tx_index, other.log_index))
            .then_with(|| self.tx_hash.cmp(&other.tx_hash))
    }
}

impl PartialOrd for LogPosition {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Sub-type carried by `TokenMorphed`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MorphEventType {
    Mint,
    Morph,
    Transfer,
    Other(u8),
}

impl From<u8> for MorphEventType {
    fn from(value: u8) -> Self {
        match value {
            0 => MorphEventType::Mint,
            1 => MorphEventType::Morph,
            2 => MorphEventType::Transfer,
            other => MorphEventType::Other(other),
        }
    }
}

/// A decoded `TokenMinted` log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MintEvent {
    pub token_id: U256,
    pub gene: U256,
    pub position: LogPosition,
}

/// A decoded `TokenMorphed` log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MorphEvent {
    pub token_id: U256,
    /// Gene before the transform
    pub old_gene: U256,
    /// Gene reported by the contract, not reliably the post-transform gene
    pub new_gene: U256,
    pub price: U256,
    pub event_type: MorphEventType,
    pub position: LogPosition,
}

/// Decode a `TokenMinted` log
pub fn decode_mint(log: &RawLog) -> Result<MintEvent, DecodeError> {
    let event = TokenMinted::decode_raw_log(log.topics.iter().copied(), &log.data, true)
        .map_err(|e| DecodeError::Abi {
            event: "TokenMinted",
            reason: e.to_string(),
        })?;
    Ok(MintEvent {
        token_id: event.tokenId,
        gene: event.newGene,
        position: LogPosition::of(log),
    })
}

/// Decode a `TokenMorphed` log
pub fn decode_morph(log: &RawLog) -> Result<MorphEvent, DecodeError> {
    let event = TokenMorphed::decode_raw_log(log.topics.iter().copied(), &log.data, true)
        .map_err(|e| DecodeError::Abi {
            event: "TokenMorphed",
            reason: e.to_string(),
        })?;
    Ok(MorphEvent {
        token_id: event.tokenId,
        old_gene: event.oldGene,
        new_gene: event.newGene,
        price: event.price,
        event_type: event.eventType.into(),
        position: LogPosition::of(log),
    })
}

/// Builders for contract logs, shared by tests across the crate
#[cfg(test)]
pub(crate) mod test_logs {
    use super::*;
    use alloy::primitives::Bytes;

    fn token_topic(token_id: u64) -> B256 {
        B256::from(U256::from(token_id).to_be_bytes::<32>())
    }

    /// Distinct hash per (block, tx index)
    pub(crate) fn tx_hash(block: u64, tx_index: u64) -> B256 {
        B256::from(U256::from((block << 32) | tx_index).to_be_bytes::<32>())
    }

    /// Mint log in its own transaction, indexed by token id
    pub(crate) fn mint_log(token_id: u64, gene: U256, block: u64, log_index: u64) -> RawLog {
        let event = TokenMinted {
            tokenId: U256::from(token_id),
            newGene: gene,
        };
        RawLog {
            block_number: block,
            tx_index: token_id,
            tx_hash: tx_hash(block, token_id),
            log_index,
            topics: vec![TokenMinted::SIGNATURE_HASH, token_topic(token_id)],
            data: Bytes::from(event.encode_data()),
        }
    }

    pub(crate) fn morph_log(
        token_id: u64,
        old_gene: U256,
        event_type: u8,
        block: u64,
        tx_index: u64,
        log_index: u64,
    ) -> RawLog {
        let event = TokenMorphed {
            tokenId: U256::from(token_id),
            oldGene: old_gene,
            newGene: old_gene,
            price: U256::ZERO,
            eventType: event_type,
        };
        RawLog {
            block_number: block,
            tx_index,
            tx_hash: tx_hash(block, tx_index),
            log_index,
            topics: vec![TokenMorphed::SIGNATURE_HASH, token_topic(token_id)],
            data: Bytes::from(event.encode_data()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_logs::{mint_log, morph_log};
    use super::*;
    use alloy::primitives::Bytes;

    // ==================== Decoding tests ====================

    #[test]
    fn test_decode_mint() {
        let gene = U256::from(123456789012345678u64);
        let log = mint_log(42, gene, 100, 3);
        let event = decode_mint(&log).unwrap();
        assert_eq!(event.token_id, U256::from(42));
        assert_eq!(event.gene, gene);
        assert_eq!(event.position.block_number, 100);
        assert_eq!(event.position.log_index, 3);
    }

    #[test]
    fn test_decode_morph_event_types() {
        let gene = U256::from(5u64);
        for (raw, expected) in [
            (0, MorphEventType::Mint),
            (1, MorphEventType::Morph),
            (2, MorphEventType::Transfer),
            (9, MorphEventType::Other(9)),
        ] {
            let event = decode_morph(&morph_log(1, gene, raw, 10, 0, 0)).unwrap();
            assert_eq!(event.event_type, expected);
            assert_eq!(event.old_gene, gene);
        }
    }

    #[test]
    fn test_wrong_signature_is_abi_error() {
        let mint = mint_log(1, U256::from(7u64), 1, 0);
        let err = decode_morph(&mint).unwrap_err();
        assert!(err.to_string().contains("TokenMorphed"));
    }

    #[test]
    fn test_truncated_data_is_abi_error() {
        let mut log = morph_log(1, U256::from(7u64), 1, 2, 0, 0);
        log.data = Bytes::from(vec![0u8; 16]);
        let err = decode_morph(&log).unwrap_err();
        assert!(matches!(err, DecodeError::Abi { event: "TokenMorphed", .. }));
    }

    // ==================== Ordering tests ====================

    #[test]
    fn test_positions_order_chronologically() {
        let pos = |block, tx, idx| LogPosition {
            block_number: block,
            tx_index: tx,
            log_index: idx,
            tx_hash: B256::ZERO,
        };
        let mut positions = vec![pos(2, 0, 0), pos(1, 1, 0), pos(1, 0, 5), pos(1, 0, 2)];
        positions.sort();
        assert_eq!(
            positions,
            vec![pos(1, 0, 2), pos(1, 0, 5), pos(1, 1, 0), pos(2, 0, 0)]
        );
    }

    #[test]
    fn test_tx_hash_hex() {
        let mut log = mint_log(1, U256::from(7u64), 1, 0);
        log.tx_hash = B256::repeat_byte(0xab);
        let position = LogPosition::of(&log);
        assert_eq!(position.tx_hash_hex(), format!("0x{}", "ab".repeat(32)));
        assert_eq!(position.tx_hash_hex(), log.tx_hash_hex());
    }
}
