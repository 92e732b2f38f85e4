//! Projection Store
//!
//! Durable state of the indexer: checkpoint, transaction ledger, token
//! entities, history, morph prices and ranks. `RedisStore` is the
//! production backend; `MemoryStore` has the same semantics and backs
//! tests and dry runs.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

use crate::diff::ChangeKind;
use crate::entity::{EntityChange, HistorySnapshot, MorphCost, PolymorphEntity, TransactionRecord};
use crate::ranking::{RankEntry, RankUpdate};

/// Default Redis key prefix
pub const DEFAULT_KEY_PREFIX: &str = "polymorph";

/// Errors that can occur while reading or writing the projection
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt value under {key}: {value}")]
    Corrupt { key: String, value: String },
}

/// Storage for everything the indexer persists
#[async_trait]
pub trait ProjectionStore: Send + Sync {
    /// First block not yet processed, if any run completed
    async fn last_processed_block(&self) -> Result<Option<u64>, StoreError>;

    async fn save_last_processed_block(&self, block: u64) -> Result<(), StoreError>;

    /// Ledger keys of every applied log
    async fn processed_transactions(&self) -> Result<Vec<String>, StoreError>;

    /// Atomically add logs to the ledger
    ///
    /// # Returns
    /// One flag per record, `true` when this call added it and `false`
    /// when it was already recorded
    async fn claim_transactions(&self, records: &[TransactionRecord]) -> Result<Vec<bool>, StoreError>;

    /// Remove logs from the ledger so a later run applies them again
    async fn release_transactions(&self, records: &[TransactionRecord]) -> Result<(), StoreError>;

    /// Store freshly minted entities, replacing any previous projection of
    /// the same token along with its history, price and counters
    async fn insert_mints(&self, entities: &[PolymorphEntity]) -> Result<(), StoreError>;

    /// Overwrite an entity's traits and score, keeping its rank and
    /// counters, and apply a transform if one happened
    async fn upsert_entity(
        &self,
        entity: &PolymorphEntity,
        change: Option<&EntityChange>,
    ) -> Result<(), StoreError>;

    async fn entity(&self, token_id: &str) -> Result<Option<PolymorphEntity>, StoreError>;

    async fn entity_count(&self) -> Result<usize, StoreError>;

    async fn append_history(&self, snapshot: &HistorySnapshot) -> Result<(), StoreError>;

    /// History of a token, oldest first
    async fn history(&self, token_id: &str) -> Result<Vec<HistorySnapshot>, StoreError>;

    async fn morph_cost(&self, token_id: &str) -> Result<Option<f64>, StoreError>;

    async fn save_morph_cost(&self, cost: &MorphCost) -> Result<(), StoreError>;

    /// Score and stored rank of every entity, in no particular order
    async fn rank_entries(&self) -> Result<Vec<RankEntry>, StoreError>;

    /// Write ranks in one batch
    async fn update_ranks(&self, updates: &[RankUpdate]) -> Result<(), StoreError>;
}

// ==================== In-memory store ====================

#[derive(Debug, Default)]
struct MemoryState {
    checkpoint: Option<u64>,
    transactions: HashSet<String>,
    entities: HashMap<String, PolymorphEntity>,
    history: HashMap<String, Vec<HistorySnapshot>>,
    costs: HashMap<String, f64>,
}

/// Projection held in process memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProjectionStore for MemoryStore {
    async fn last_processed_block(&self) -> Result<Option<u64>, StoreError> {
        Ok(self.state.read().await.checkpoint)
    }

    async fn save_last_processed_block(&self, block: u64) -> Result<(), StoreError> {
        self.state.write().await.checkpoint = Some(block);
        Ok(())
    }

    async fn processed_transactions(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.state.read().await.transactions.iter().cloned().collect())
    }

    async fn claim_transactions(&self, records: &[TransactionRecord]) -> Result<Vec<bool>, StoreError> {
        let mut state = self.state.write().await;
        Ok(records
            .iter()
            .map(|record| state.transactions.insert(record.key()))
            .collect())
    }

    async fn release_transactions(&self, records: &[TransactionRecord]) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        for record in records {
            state.transactions.remove(&record.key());
        }
        Ok(())
    }

    async fn insert_mints(&self, entities: &[PolymorphEntity]) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        for entity in entities {
            state.history.remove(&entity.token_id);
            state.costs.remove(&entity.token_id);
            state.entities.insert(entity.token_id.clone(), entity.clone());
        }
        Ok(())
    }

    async fn upsert_entity(
        &self,
        entity: &PolymorphEntity,
        change: Option<&EntityChange>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let mut updated = entity.clone();
        if let Some(existing) = state.entities.get(&entity.token_id) {
            updated.rank = existing.rank;
            updated.morphs = existing.morphs;
            updated.scrambles = existing.scrambles;
            updated.old_genes = existing.old_genes.clone();
        }
        if let Some(change) = change {
            updated.apply_change(change);
        }
        state.entities.insert(updated.token_id.clone(), updated);
        Ok(())
    }

    async fn entity(&self, token_id: &str) -> Result<Option<PolymorphEntity>, StoreError> {
        Ok(self.state.read().await.entities.get(token_id).cloned())
    }

    async fn entity_count(&self) -> Result<usize, StoreError> {
        Ok(self.state.read().await.entities.len())
    }

    async fn append_history(&self, snapshot: &HistorySnapshot) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state
            .history
            .entry(snapshot.token_id.clone())
            .or_default()
            .push(snapshot.clone());
        Ok(())
    }

    async fn history(&self, token_id: &str) -> Result<Vec<HistorySnapshot>, StoreError> {
        let state = self.state.read().await;
        let mut history = state.history.get(token_id).cloned().unwrap_or_default();
        history.sort_by_key(|s| s.timestamp);
        Ok(history)
    }

    async fn morph_cost(&self, token_id: &str) -> Result<Option<f64>, StoreError> {
        Ok(self.state.read().await.costs.get(token_id).copied())
    }

    async fn save_morph_cost(&self, cost: &MorphCost) -> Result<(), StoreError> {
        self.state
            .write()
            .await
            .costs
            .insert(cost.token_id.clone(), cost.price);
        Ok(())
    }

    async fn rank_entries(&self) -> Result<Vec<RankEntry>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .entities
            .values()
            .map(|e| RankEntry {
                token_id: e.token_id.clone(),
                score: e.score(),
                rank: e.rank,
            })
            .collect())
    }

    async fn update_ranks(&self, updates: &[RankUpdate]) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        for update in updates {
            if let Some(entity) = state.entities.get_mut(&update.token_id) {
                entity.rank = update.rank;
            }
        }
        Ok(())
    }
}

// ==================== Redis store ====================

/// Key layout under a common prefix
#[derive(Debug, Clone)]
pub struct RedisKeys {
    prefix: String,
}

impl RedisKeys {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn checkpoint(&self) -> String {
        format!("{}:checkpoint", self.prefix)
    }

    pub fn transactions(&self) -> String {
        format!("{}:transactions", self.prefix)
    }

    pub fn entities(&self) -> String {
        format!("{}:entities", self.prefix)
    }

    pub fn scores(&self) -> String {
        format!("{}:scores", self.prefix)
    }

    pub fn ranks(&self) -> String {
        format!("{}:ranks", self.prefix)
    }

    pub fn morph_costs(&self) -> String {
        format!("{}:morph_costs", self.prefix)
    }

    pub fn counters(&self, token_id: &str) -> String {
        format!("{}:counters:{}", self.prefix, token_id)
    }

    pub fn old_genes(&self, token_id: &str) -> String {
        format!("{}:old_genes:{}", self.prefix, token_id)
    }

    pub fn history(&self, token_id: &str) -> String {
        format!("{}:history:{}", self.prefix, token_id)
    }
}

/// Projection in Redis
#[derive(Clone)]
pub struct RedisStore {
    connection: MultiplexedConnection,
    keys: RedisKeys,
}

impl RedisStore {
    /// Wrap an established connection
    ///
    /// # Arguments
    /// * `connection` - An established Redis multiplexed connection
    /// * `prefix` - Prefix of every key the store touches
    pub fn new(connection: MultiplexedConnection, prefix: impl Into<String>) -> Self {
        Self {
            connection,
            keys: RedisKeys::new(prefix),
        }
    }

    /// Connect to Redis at `url`
    pub async fn connect(url: &str, prefix: impl Into<String>) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let connection = client.get_multiplexed_async_connection().await?;
        Ok(Self::new(connection, prefix))
    }

    pub fn keys(&self) -> &RedisKeys {
        &self.keys
    }

    fn conn(&self) -> MultiplexedConnection {
        self.connection.clone()
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: String) -> Result<T, StoreError> {
    value
        .parse()
        .map_err(|_| StoreError::Corrupt {
            key: key.to_string(),
            value,
        })
}

#[async_trait]
impl ProjectionStore for RedisStore {
    async fn last_processed_block(&self) -> Result<Option<u64>, StoreError> {
        let key = self.keys.checkpoint();
        let value: Option<String> = self.conn().get(&key).await?;
        value.map(|v| parse_number(&key, v)).transpose()
    }

    async fn save_last_processed_block(&self, block: u64) -> Result<(), StoreError> {
        let _: () = self.conn().set(self.keys.checkpoint(), block).await?;
        Ok(())
    }

    async fn processed_transactions(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.conn().smembers(self.keys.transactions()).await?)
    }

    async fn claim_transactions(&self, records: &[TransactionRecord]) -> Result<Vec<bool>, StoreError> {
        if records.is_empty() {
            return Ok(Vec::new());
        }
        // one SADD per record so each reply tells whether this caller won it
        let mut pipe = redis::pipe();
        pipe.atomic();
        for record in records {
            pipe.sadd(self.keys.transactions(), record.key());
        }
        let added: Vec<u64> = pipe.query_async(&mut self.conn()).await?;
        Ok(added.into_iter().map(|n| n == 1).collect())
    }

    async fn release_transactions(&self, records: &[TransactionRecord]) -> Result<(), StoreError> {
        if records.is_empty() {
            return Ok(());
        }
        let keys: Vec<String> = records.iter().map(TransactionRecord::key).collect();
        let _: () = self.conn().srem(self.keys.transactions(), keys).await?;
        Ok(())
    }

    async fn insert_mints(&self, entities: &[PolymorphEntity]) -> Result<(), StoreError> {
        if entities.is_empty() {
            return Ok(());
        }
        let mut pipe = redis::pipe();
        pipe.atomic();
        for entity in entities {
            let id = entity.token_id.as_str();
            pipe.hset(self.keys.entities(), id, serde_json::to_string(entity)?)
                .ignore()
                .zadd(self.keys.scores(), id, entity.score())
                .ignore()
                .hdel(self.keys.ranks(), id)
                .ignore()
                .hdel(self.keys.morph_costs(), id)
                .ignore()
                .del(self.keys.counters(id))
                .ignore()
                .del(self.keys.old_genes(id))
                .ignore()
                .del(self.keys.history(id))
                .ignore();
        }
        let _: () = pipe.query_async(&mut self.conn()).await?;
        debug!("Inserted {} minted entities", entities.len());
        Ok(())
    }

    async fn upsert_entity(
        &self,
        entity: &PolymorphEntity,
        change: Option<&EntityChange>,
    ) -> Result<(), StoreError> {
        let id = entity.token_id.as_str();
        let mut pipe = redis::pipe();
        pipe.atomic()
            .hset(self.keys.entities(), id, serde_json::to_string(entity)?)
            .ignore()
            .zadd(self.keys.scores(), id, entity.score())
            .ignore();
        if let Some(change) = change {
            let field = match change.kind {
                ChangeKind::Morph => "morphs",
                ChangeKind::Scramble => "scrambles",
            };
            pipe.hincr(self.keys.counters(id), field, 1)
                .ignore()
                .rpush(self.keys.old_genes(id), &change.old_gene)
                .ignore();
        }
        let _: () = pipe.query_async(&mut self.conn()).await?;
        Ok(())
    }

    async fn entity(&self, token_id: &str) -> Result<Option<PolymorphEntity>, StoreError> {
        let mut conn = self.conn();
        let json: Option<String> = conn.hget(self.keys.entities(), token_id).await?;
        let Some(json) = json else {
            return Ok(None);
        };
        let mut entity: PolymorphEntity = serde_json::from_str(&json)?;

        let counters: HashMap<String, u64> = conn.hgetall(self.keys.counters(token_id)).await?;
        let old_genes: Vec<String> = conn.lrange(self.keys.old_genes(token_id), 0, -1).await?;
        let rank: Option<u64> = conn.hget(self.keys.ranks(), token_id).await?;

        entity.morphs = counters.get("morphs").copied().unwrap_or(0);
        entity.scrambles = counters.get("scrambles").copied().unwrap_or(0);
        entity.old_genes = old_genes;
        entity.rank = rank.unwrap_or(0);
        Ok(Some(entity))
    }

    async fn entity_count(&self) -> Result<usize, StoreError> {
        Ok(self.conn().hlen(self.keys.entities()).await?)
    }

    async fn append_history(&self, snapshot: &HistorySnapshot) -> Result<(), StoreError> {
        let json = serde_json::to_string(snapshot)?;
        let _: () = self
            .conn()
            .rpush(self.keys.history(&snapshot.token_id), json)
            .await?;
        Ok(())
    }

    async fn history(&self, token_id: &str) -> Result<Vec<HistorySnapshot>, StoreError> {
        let raw: Vec<String> = self.conn().lrange(self.keys.history(token_id), 0, -1).await?;
        let mut history = raw
            .iter()
            .map(|json| serde_json::from_str(json))
            .collect::<Result<Vec<HistorySnapshot>, _>>()?;
        history.sort_by_key(|s| s.timestamp);
        Ok(history)
    }

    async fn morph_cost(&self, token_id: &str) -> Result<Option<f64>, StoreError> {
        Ok(self.conn().hget(self.keys.morph_costs(), token_id).await?)
    }

    async fn save_morph_cost(&self, cost: &MorphCost) -> Result<(), StoreError> {
        let _: () = self
            .conn()
            .hset(self.keys.morph_costs(), &cost.token_id, cost.price)
            .await?;
        Ok(())
    }

    async fn rank_entries(&self) -> Result<Vec<RankEntry>, StoreError> {
        let mut conn = self.conn();
        let scores: Vec<(String, f64)> = conn.zrevrange_withscores(self.keys.scores(), 0, -1).await?;
        let ranks: HashMap<String, u64> = conn.hgetall(self.keys.ranks()).await?;
        Ok(scores
            .into_iter()
            .map(|(token_id, score)| RankEntry {
                rank: ranks.get(&token_id).copied().unwrap_or(0),
                token_id,
                score,
            })
            .collect())
    }

    async fn update_ranks(&self, updates: &[RankUpdate]) -> Result<(), StoreError> {
        if updates.is_empty() {
            return Ok(());
        }
        let fields: Vec<(&str, u64)> = updates
            .iter()
            .map(|u| (u.token_id.as_str(), u.rank))
            .collect();
        let _: () = self.conn().hset_multiple(self.keys.ranks(), fields.as_slice()).await?;
        Ok(())
    }
}
