//! Polymorph Indexer Library
//!
//! This crate provides components for indexing Polymorph NFT mint and morph
//! events, decoding genes into traits, scoring rarity, and projecting the
//! collection into Redis.

pub mod catalog;
pub mod collector;
pub mod config;
pub mod decoder;
pub mod diff;
pub mod entity;
pub mod filter;
pub mod genome;
pub mod processor;
pub mod ranking;
pub mod rarity;
pub mod recovery;
pub mod rpc;
pub mod store;

// Re-export commonly used types
pub use catalog::{ScoringConfig, TraitCatalog};
pub use collector::{collect_events, BlockRange};
pub use config::IndexerConfig;
pub use diff::{detect_gene_differences, ChangeKind, GeneDiff};
pub use entity::{HistorySnapshot, PolymorphEntity};
pub use filter::{classify_events, TransactionLedger};
pub use genome::{Attribute, Genome, Slot};
pub use processor::EntityBuilder;
pub use rarity::{calculate_rarity, RarityResult};
pub use recovery::{Indexer, IndexerSettings, PipelineError, RunReport};
pub use rpc::{ChainClient, RpcClient, RpcConfig};
pub use store::{MemoryStore, ProjectionStore, RedisStore};
