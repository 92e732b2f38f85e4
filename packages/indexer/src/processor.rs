//! Mint and Morph Processors
//!
//! Mints are independent and scored in parallel, one task per event, with
//! results funnelled through a channel to a single collector. Morphs are
//! applied strictly in chain order: a `TokenMorphed` log reports the gene
//! *before* the transform, so the gene it produced is only known from the
//! next log for the same token or, for the last one, from the live gene.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use alloy::primitives::U256;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::catalog::TraitCatalog;
use crate::decoder::{LogPosition, MintEvent, MorphEvent};
use crate::diff::{detect_gene_differences, ChangeKind, GeneDiff};
use crate::entity::{EntityChange, HistorySnapshot, MorphCost, PolymorphEntity, TransactionRecord};
use crate::genome::{token_description, Genome, GenomeError, Slot};
use crate::rarity::calculate_rarity;
use crate::rpc::ChainClient;
use crate::store::ProjectionStore;

/// Capacity of the mint result channel
const MINT_CHANNEL_CAPACITY: usize = 256;

/// Turns genes into scored entities and history snapshots
#[derive(Debug, Clone)]
pub struct EntityBuilder {
    catalog: Arc<TraitCatalog>,
    image_base: String,
}

impl EntityBuilder {
    pub fn new(catalog: Arc<TraitCatalog>, image_base: impl Into<String>) -> Self {
        Self {
            catalog,
            image_base: image_base.into(),
        }
    }

    pub fn catalog(&self) -> &TraitCatalog {
        &self.catalog
    }

    /// Decode and score a gene
    pub fn entity(
        &self,
        token_id: &str,
        genome: &Genome,
        is_virgin: bool,
    ) -> Result<PolymorphEntity, GenomeError> {
        let attributes = genome.attributes(&self.catalog)?;
        let rarity = calculate_rarity(&attributes, is_virgin, &self.catalog.scoring);
        let mut entity = PolymorphEntity::from_attributes(
            token_id,
            genome,
            &attributes,
            is_virgin,
            rarity,
            &self.image_base,
        );
        if let Some(kind) = self.catalog.character_type(genome.slot_index(Slot::Character)) {
            entity.description = token_description(kind, &entity.character, token_id);
        }
        Ok(entity)
    }

    /// Describe a transform for the token's history
    ///
    /// # Arguments
    /// * `token_id` - Decimal token id
    /// * `old` - Gene before the transform
    /// * `new` - Gene after the transform
    /// * `diff` - Diff of `old` and `new`
    /// * `kind` - Classification of `diff`
    /// * `timestamp` - Block time of the transform
    /// * `price` - Price in effect when the transform happened
    #[allow(clippy::too_many_arguments)]
    pub fn snapshot(
        &self,
        token_id: &str,
        old: &Genome,
        new: &Genome,
        diff: GeneDiff,
        kind: ChangeKind,
        timestamp: DateTime<Utc>,
        price: f64,
    ) -> Result<HistorySnapshot, GenomeError> {
        let (attribute_changed, previous_attribute, new_attribute) = match (kind, diff.changed_slot) {
            (ChangeKind::Morph, Some(slot)) => (
                Some(slot),
                old.attribute(slot, &self.catalog)?.value,
                new.attribute(slot, &self.catalog)?.value,
            ),
            _ => (None, String::new(), String::new()),
        };

        Ok(HistorySnapshot {
            token_id: token_id.to_string(),
            change: kind,
            timestamp,
            attribute_changed,
            previous_attribute,
            new_attribute,
            price,
            image_url: new.image_url(&self.image_base),
            old_gene: old.as_str().to_string(),
            new_gene: new.as_str().to_string(),
            character: new.attribute(Slot::Character, &self.catalog)?.value,
        })
    }
}

/// Price of the next transform after one of kind `kind` at `price`
pub fn next_morph_price(kind: ChangeKind, price: f64, scramble_cost: f64) -> f64 {
    match kind {
        ChangeKind::Morph => price * 2.0,
        ChangeKind::Scramble => scramble_cost,
    }
}

fn transaction_record(position: &LogPosition) -> TransactionRecord {
    TransactionRecord {
        block_number: position.block_number,
        tx_index: position.tx_index,
        tx_hash: position.tx_hash_hex(),
        log_index: position.log_index,
    }
}

// ==================== Mints ====================

/// Counts from one batch of mints
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MintReport {
    pub inserted: usize,
    pub zero_genes: usize,
    /// Repeats within the batch and mints already claimed by another run
    pub duplicates: usize,
    /// Mints that could not be decoded or written
    pub failed: usize,
}

/// Result of scoring a single mint
enum MintOutcome {
    Scored(PolymorphEntity, TransactionRecord),
    Failed(String, GenomeError),
}

/// Score and store a batch of mints
///
/// Zero genes and repeated token ids within the batch are skipped; the
/// first mint of a token id in chain order wins. Store failures are
/// logged and counted in the report.
///
/// # Arguments
/// * `mints` - New mints, in chain order
/// * `builder` - Entity builder
/// * `store` - Projection store
///
/// # Returns
/// Counts of inserted and skipped mints
pub async fn process_mints<S>(
    mints: Vec<MintEvent>,
    builder: Arc<EntityBuilder>,
    store: &S,
) -> MintReport
where
    S: ProjectionStore + ?Sized,
{
    let mut report = MintReport::default();
    if mints.is_empty() {
        return report;
    }

    let (tx, mut rx) = mpsc::channel(MINT_CHANNEL_CAPACITY);
    let mut seen = HashSet::new();

    for mint in mints {
        if mint.gene.is_zero() {
            info!("Skipping mint of token {} with zero gene", mint.token_id);
            report.zero_genes += 1;
            continue;
        }
        if !seen.insert(mint.token_id) {
            info!("Skipping repeated mint of token {} in batch", mint.token_id);
            report.duplicates += 1;
            continue;
        }

        let tx = tx.clone();
        let builder = Arc::clone(&builder);
        tokio::spawn(async move {
            let token_id = mint.token_id.to_string();
            let outcome = match Genome::from_u256(mint.gene)
                .and_then(|genome| builder.entity(&token_id, &genome, true))
            {
                Ok(entity) => MintOutcome::Scored(entity, transaction_record(&mint.position)),
                Err(e) => MintOutcome::Failed(token_id, e),
            };
            // the receiver outlives every sender
            let _ = tx.send(outcome).await;
        });
    }
    drop(tx);

    let mut scored = Vec::new();
    while let Some(outcome) = rx.recv().await {
        match outcome {
            MintOutcome::Scored(entity, record) => scored.push((entity, record)),
            MintOutcome::Failed(token_id, e) => {
                warn!("Failed to decode mint of token {}: {}", token_id, e);
                report.failed += 1;
            }
        }
    }

    let records: Vec<TransactionRecord> = scored.iter().map(|(_, r)| r.clone()).collect();
    let claims = match store.claim_transactions(&records).await {
        Ok(claims) => claims,
        Err(e) => {
            error!("Failed to claim {} mints, leaving them for a later run: {}", records.len(), e);
            report.failed += records.len();
            return report;
        }
    };

    let mut entities = Vec::new();
    let mut claimed = Vec::new();
    for ((entity, record), won) in scored.into_iter().zip(claims) {
        if won {
            entities.push(entity);
            claimed.push(record);
        } else {
            info!("Mint of token {} already applied by another run", entity.token_id);
            report.duplicates += 1;
        }
    }

    if let Err(e) = store.insert_mints(&entities).await {
        error!("Failed to insert {} mints: {}", entities.len(), e);
        report.failed += entities.len();
        if let Err(e) = store.release_transactions(&claimed).await {
            warn!("Failed to release {} mint claims: {}", claimed.len(), e);
        }
        return report;
    }
    report.inserted = entities.len();

    info!(
        "Inserted {} mints ({} zero genes, {} repeats, {} failed)",
        report.inserted, report.zero_genes, report.duplicates, report.failed
    );
    report
}

// ==================== Morphs ====================

/// Counts from one batch of morphs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MorphReport {
    /// Events applied and recorded in the ledger
    pub applied: usize,
    /// Events skipped because a chain read failed or the gene was unusable
    pub skipped: usize,
    /// Events already claimed by another run
    pub duplicates: usize,
    pub morphs: usize,
    pub scrambles: usize,
    /// Entity writes that failed
    pub failed_writes: usize,
}

/// A gene whose successor is not known yet
#[derive(Debug, Clone)]
struct PendingGene {
    gene: String,
    position: LogPosition,
}

/// A transform waiting for its entity write
#[derive(Debug)]
struct Transition {
    change: EntityChange,
    snapshot: Option<HistorySnapshot>,
    next_price: f64,
}

/// Applies morph events in chain order
pub struct MorphProcessor<C: ?Sized, S: ?Sized> {
    client: Arc<C>,
    store: Arc<S>,
    builder: Arc<EntityBuilder>,
    pending: HashMap<U256, PendingGene>,
    live: HashMap<U256, U256>,
    prices: HashMap<U256, f64>,
    writes: JoinSet<()>,
    /// Claims to hand back because their event was not applied
    released: Vec<TransactionRecord>,
    report: MorphReport,
}

impl<C, S> MorphProcessor<C, S>
where
    C: ChainClient + ?Sized + 'static,
    S: ProjectionStore + ?Sized + 'static,
{
    pub fn new(client: Arc<C>, store: Arc<S>, builder: Arc<EntityBuilder>) -> Self {
        Self {
            client,
            store,
            builder,
            pending: HashMap::new(),
            live: HashMap::new(),
            prices: HashMap::new(),
            writes: JoinSet::new(),
            released: Vec::new(),
            report: MorphReport::default(),
        }
    }

    /// Apply a batch of morphs
    ///
    /// Every event is claimed in the ledger before it is applied. An event
    /// another run already claimed is left to that run; it only closes the
    /// transform carried from the previous event of the same token.
    ///
    /// # Arguments
    /// * `events` - Genuine morph events, in chain order
    pub async fn process(&mut self, events: &[MorphEvent]) {
        if events.is_empty() {
            return;
        }
        let records: Vec<TransactionRecord> =
            events.iter().map(|e| transaction_record(&e.position)).collect();
        let claims = match self.store.claim_transactions(&records).await {
            Ok(claims) => claims,
            Err(e) => {
                error!("Failed to claim {} morph events, skipping them: {}", events.len(), e);
                self.report.skipped += events.len();
                return;
            }
        };

        for ((event, record), won) in events.iter().zip(records).zip(claims) {
            if won {
                self.apply(event, record).await;
            } else {
                self.close_at_foreign(event).await;
            }
        }
    }

    /// Pair every carried gene with the live gene, wait for background
    /// writes and persist the final prices
    pub async fn finish(mut self) -> MorphReport {
        let mut carried: Vec<(U256, PendingGene)> = self.pending.drain().collect();
        carried.sort_by(|a, b| a.1.position.cmp(&b.1.position));

        for (token_id, pending) in carried {
            let Some(live) = self.live.get(&token_id).copied() else {
                continue;
            };
            let live = live.to_string();
            if let Some(transition) = self.transition(token_id, &pending, &live).await {
                if !self.upsert(token_id, &live, Some(transition)).await {
                    self.released.push(transaction_record(&pending.position));
                }
            }
        }

        while let Some(joined) = self.writes.join_next().await {
            if let Err(e) = joined {
                warn!("History write task failed: {}", e);
            }
        }

        for (token_id, price) in self.prices.drain() {
            let store = Arc::clone(&self.store);
            self.writes.spawn(async move {
                let cost = MorphCost {
                    token_id: token_id.to_string(),
                    price,
                };
                if let Err(e) = store.save_morph_cost(&cost).await {
                    warn!("Failed to save morph price of token {}: {}", cost.token_id, e);
                }
            });
        }
        while let Some(joined) = self.writes.join_next().await {
            if let Err(e) = joined {
                warn!("Price write task failed: {}", e);
            }
        }

        if !self.released.is_empty() {
            if let Err(e) = self.store.release_transactions(&self.released).await {
                warn!("Failed to release {} morph claims: {}", self.released.len(), e);
            }
        }

        info!(
            "Applied {} morph events ({} morphs, {} scrambles, {} skipped, {} claimed elsewhere)",
            self.report.applied,
            self.report.morphs,
            self.report.scrambles,
            self.report.skipped,
            self.report.duplicates
        );
        self.report
    }

    async fn apply(&mut self, event: &MorphEvent, record: TransactionRecord) {
        let token_id = event.token_id;
        let Some(live) = self.live_gene(token_id).await else {
            self.report.skipped += 1;
            self.released.push(record);
            return;
        };
        let live = live.to_string();
        let reported = event.old_gene.to_string();

        let transition = match self.pending.get(&token_id).cloned() {
            Some(pending) => self.transition(token_id, &pending, &reported).await,
            None => None,
        };
        self.pending.insert(
            token_id,
            PendingGene {
                gene: reported,
                position: event.position,
            },
        );

        if !self.upsert(token_id, &live, transition).await {
            self.report.skipped += 1;
            self.released.push(record);
            return;
        }
        self.report.applied += 1;
    }

    /// Handle an event another run claimed: its reported gene ends the
    /// transform carried for the token, and what follows belongs to the
    /// other run
    async fn close_at_foreign(&mut self, event: &MorphEvent) {
        let token_id = event.token_id;
        info!(
            "Morph {}:{} of token {} already applied by another run",
            event.position.tx_hash_hex(),
            event.position.log_index,
            token_id
        );
        self.report.duplicates += 1;

        let Some(pending) = self.pending.remove(&token_id) else {
            return;
        };
        let Some(live) = self.live.get(&token_id).copied() else {
            return;
        };
        let live = live.to_string();
        let reported = event.old_gene.to_string();
        if let Some(transition) = self.transition(token_id, &pending, &reported).await {
            if !self.upsert(token_id, &live, Some(transition)).await {
                self.released.push(transaction_record(&pending.position));
            }
        }
    }

    /// Live gene of a token, read once per run
    async fn live_gene(&mut self, token_id: U256) -> Option<U256> {
        if let Some(gene) = self.live.get(&token_id) {
            return Some(*gene);
        }
        match self.client.gene_of(token_id).await {
            Ok(gene) => {
                self.live.insert(token_id, gene);
                Some(gene)
            }
            Err(e) => {
                warn!("Failed to read gene of token {}, skipping event: {}", token_id, e);
                None
            }
        }
    }

    /// Describe the transform from `pending` to `new_gene`
    ///
    /// Nothing is written here; the history and price follow the entity
    /// write in `upsert`.
    ///
    /// # Returns
    /// The transform to apply, or `None` when nothing changed
    async fn transition(
        &self,
        token_id: U256,
        pending: &PendingGene,
        new_gene: &str,
    ) -> Option<Transition> {
        let diff = detect_gene_differences(&pending.gene, new_gene);
        let kind = diff.change_kind()?;

        let price = self.current_price(token_id).await;
        let scramble_cost = self.builder.catalog().scoring.scramble_cost;
        let timestamp = self.block_time(pending.position.block_number).await;
        let id = token_id.to_string();
        let snapshot = Genome::parse(&pending.gene).and_then(|old| {
            let new = Genome::parse(new_gene)?;
            self.builder
                .snapshot(&id, &old, &new, diff, kind, timestamp, price)
        });
        let snapshot = match snapshot {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!("Failed to describe {} of token {}: {}", kind.name(), id, e);
                None
            }
        };

        debug!(
            "Token {} {}: {} -> {} ({} digits)",
            id,
            kind.name(),
            pending.gene,
            new_gene,
            diff.differences
        );
        Some(Transition {
            change: EntityChange {
                old_gene: pending.gene.clone(),
                kind,
            },
            snapshot,
            next_price: next_morph_price(kind, price, scramble_cost),
        })
    }

    async fn current_price(&self, token_id: U256) -> f64 {
        if let Some(price) = self.prices.get(&token_id) {
            return *price;
        }
        let scramble_cost = self.builder.catalog().scoring.scramble_cost;
        match self.store.morph_cost(&token_id.to_string()).await {
            Ok(price) => price.unwrap_or(scramble_cost),
            Err(e) => {
                warn!("Failed to read morph price of token {}: {}", token_id, e);
                scramble_cost
            }
        }
    }

    async fn block_time(&self, block: u64) -> DateTime<Utc> {
        match self.client.block_timestamp(block).await {
            Ok(secs) => i64::try_from(secs)
                .ok()
                .and_then(|secs| DateTime::from_timestamp(secs, 0))
                .unwrap_or_else(Utc::now),
            Err(e) => {
                warn!("Failed to read time of block {}, using now: {}", block, e);
                Utc::now()
            }
        }
    }

    /// Score the live gene and write the entity, then record the transform
    ///
    /// # Returns
    /// Whether the entity was written
    async fn upsert(&mut self, token_id: U256, live: &str, transition: Option<Transition>) -> bool {
        let id = token_id.to_string();
        let entity = match Genome::parse(live).and_then(|g| self.builder.entity(&id, &g, false)) {
            Ok(entity) => entity,
            Err(e) => {
                warn!("Cannot score live gene {} of token {}: {}", live, id, e);
                return false;
            }
        };
        let change = transition.as_ref().map(|t| &t.change);
        if let Err(e) = self.store.upsert_entity(&entity, change).await {
            warn!("Failed to write token {}: {}", id, e);
            self.report.failed_writes += 1;
            return false;
        }
        if let Some(transition) = transition {
            self.commit(token_id, transition);
        }
        true
    }

    /// Count a written transform and queue its history and price
    fn commit(&mut self, token_id: U256, transition: Transition) {
        match transition.change.kind {
            ChangeKind::Morph => self.report.morphs += 1,
            ChangeKind::Scramble => self.report.scrambles += 1,
        }
        self.prices.insert(token_id, transition.next_price);
        if let Some(snapshot) = transition.snapshot {
            let store = Arc::clone(&self.store);
            self.writes.spawn(async move {
                if let Err(e) = store.append_history(&snapshot).await {
                    warn!("Failed to append history of token {}: {}", snapshot.token_id, e);
                }
            });
        }
    }
}

/// Apply a batch of morphs and finalize every carried gene
pub async fn process_morphs<C, S>(
    client: Arc<C>,
    store: Arc<S>,
    builder: Arc<EntityBuilder>,
    events: &[MorphEvent],
) -> MorphReport
where
    C: ChainClient + ?Sized + 'static,
    S: ProjectionStore + ?Sized + 'static,
{
    if events.is_empty() {
        return MorphReport::default();
    }
    let mut processor = MorphProcessor::new(client, store, builder);
    processor.process(events).await;
    processor.finish().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::tests::generated_catalog;
    use crate::decoder::{MorphEventType, test_logs::tx_hash};
    use crate::rpc::{MockChainClient, RpcError};
    use crate::store::MemoryStore;

    const G0: &str = "123456789012345678";
    // character slot changed
    const G1: &str = "123456789012345679";
    // background slot changed
    const G2: &str = "123456789012345779";

    fn builder() -> Arc<EntityBuilder> {
        Arc::new(EntityBuilder::new(Arc::new(generated_catalog()), "https://img/"))
    }

    fn gene(raw: &str) -> U256 {
        raw.parse().unwrap()
    }

    fn position(block: u64, tx_index: u64) -> LogPosition {
        LogPosition {
            block_number: block,
            tx_index,
            log_index: 0,
            tx_hash: tx_hash(block, tx_index),
        }
    }

    fn mint(token_id: u64, raw: &str, block: u64) -> MintEvent {
        MintEvent {
            token_id: U256::from(token_id),
            gene: gene(raw),
            position: position(block, token_id),
        }
    }

    fn morph(token_id: u64, old: &str, block: u64) -> MorphEvent {
        MorphEvent {
            token_id: U256::from(token_id),
            old_gene: gene(old),
            new_gene: gene(old),
            price: U256::ZERO,
            event_type: MorphEventType::Morph,
            position: position(block, 0),
        }
    }

    fn chain(live: &'static str) -> Arc<MockChainClient> {
        let mut client = MockChainClient::new();
        client.expect_gene_of().returning(move |_| Ok(gene(live)));
        client
            .expect_block_timestamp()
            .returning(|block| Ok(block * 1_000));
        Arc::new(client)
    }

    // ==================== Pricing tests ====================

    #[test]
    fn test_next_morph_price() {
        assert_eq!(next_morph_price(ChangeKind::Morph, 0.01, 0.01), 0.02);
        assert_eq!(next_morph_price(ChangeKind::Scramble, 0.32, 0.01), 0.01);
    }

    // ==================== Entity tests ====================

    #[test]
    fn test_entity_metadata_uses_character_type() {
        let mut catalog = generated_catalog();
        catalog.character_type = (0..11).map(|i| format!("Type {}", i)).collect();
        let typed_builder = EntityBuilder::new(Arc::new(catalog), "https://img/");

        let entity = typed_builder.entity("5", &Genome::parse(G0).unwrap(), true).unwrap();
        assert_eq!(entity.name, "Character 1 #5");
        assert!(entity.description.starts_with("The Type 1 named Character 1 #5 "));
        assert_eq!(entity.external_url, "https://universe.xyz/polymorphs/5");

        let plain = builder().entity("5", &Genome::parse(G0).unwrap(), true).unwrap();
        assert!(plain.description.starts_with("The Polymorph named Character 1 #5 "));
    }

    // ==================== Snapshot tests ====================

    #[test]
    fn test_snapshot_of_single_slot_morph() {
        let builder = builder();
        let old = Genome::parse(G0).unwrap();
        let new = Genome::parse(G1).unwrap();
        let diff = detect_gene_differences(G0, G1);
        let time = DateTime::from_timestamp(1_000, 0).unwrap();

        let snapshot = builder
            .snapshot("5", &old, &new, diff, ChangeKind::Morph, time, 0.04)
            .unwrap();
        assert_eq!(snapshot.attribute_changed, Some(Slot::Character));
        assert_eq!(snapshot.previous_attribute, "Character 1");
        assert_eq!(snapshot.new_attribute, "Character 2");
        assert_eq!(snapshot.character, "Character 2");
        assert_eq!(snapshot.price, 0.04);
        assert_eq!(snapshot.old_gene, G0);
        assert_eq!(snapshot.new_gene, G1);
        assert_eq!(snapshot.image_url, new.image_url("https://img/"));
    }

    #[test]
    fn test_snapshot_of_scramble_has_no_attribute() {
        let builder = builder();
        let old = Genome::parse(G0).unwrap();
        let new = Genome::parse("876543210987654321").unwrap();
        let diff = detect_gene_differences(old.as_str(), new.as_str());
        assert_eq!(diff.change_kind(), Some(ChangeKind::Scramble));

        let snapshot = builder
            .snapshot("5", &old, &new, diff, ChangeKind::Scramble, Utc::now(), 0.01)
            .unwrap();
        assert_eq!(snapshot.attribute_changed, None);
        assert!(snapshot.previous_attribute.is_empty());
        assert!(snapshot.new_attribute.is_empty());
    }

    // ==================== Mint tests ====================

    #[tokio::test]
    async fn test_mints_are_virgin_and_recorded() {
        let store = MemoryStore::new();
        let report = process_mints(vec![mint(1, G0, 10), mint(2, G1, 10)], builder(), &store).await;

        assert_eq!(report.inserted, 2);
        let entity = store.entity("1").await.unwrap().unwrap();
        assert!(entity.is_virgin);
        assert_eq!(entity.rarity.virgin_scaler, 1.5);
        assert_eq!(store.processed_transactions().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_mints_skip_zero_genes_and_repeats() {
        let store = MemoryStore::new();
        let mints = vec![mint(1, G0, 10), mint(1, G1, 11), mint(2, "0", 11)];
        let report = process_mints(mints, builder(), &store).await;

        assert_eq!(
            report,
            MintReport {
                inserted: 1,
                zero_genes: 1,
                duplicates: 1,
                failed: 0
            }
        );
        let entity = store.entity("1").await.unwrap().unwrap();
        assert_eq!(entity.current_gene, G0);
        assert!(store.entity("2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_empty_mint_batch_touches_nothing() {
        let store = MemoryStore::new();
        let report = process_mints(vec![], builder(), &store).await;
        assert_eq!(report, MintReport::default());
        assert_eq!(store.entity_count().await.unwrap(), 0);
    }

    // ==================== Morph tests ====================

    #[tokio::test]
    async fn test_single_morph_pairs_with_live_gene() {
        let store = Arc::new(MemoryStore::new());
        process_mints(vec![mint(1, G0, 5)], builder(), store.as_ref()).await;

        let report = process_morphs(chain(G1), Arc::clone(&store), builder(), &[morph(1, G0, 10)]).await;
        assert_eq!(report.applied, 1);
        assert_eq!(report.morphs, 1);

        let entity = store.entity("1").await.unwrap().unwrap();
        assert_eq!(entity.current_gene, G1);
        assert!(!entity.is_virgin);
        assert_eq!(entity.morphs, 1);
        assert_eq!(entity.old_genes, vec![G0]);

        let history = store.history("1").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].attribute_changed, Some(Slot::Character));
        assert_eq!(history[0].price, 0.01);
        assert_eq!(history[0].timestamp.timestamp(), 10_000);
        assert_eq!(store.morph_cost("1").await.unwrap(), Some(0.02));
    }

    #[tokio::test]
    async fn test_consecutive_morphs_chain_through_reported_genes() {
        let store = Arc::new(MemoryStore::new());
        let events = [morph(1, G0, 10), morph(1, G1, 11)];

        let report = process_morphs(chain(G2), Arc::clone(&store), builder(), &events).await;
        assert_eq!(report.applied, 2);
        assert_eq!(report.morphs, 2);

        let entity = store.entity("1").await.unwrap().unwrap();
        assert_eq!(entity.current_gene, G2);
        assert_eq!(entity.morphs, 2);
        assert_eq!(entity.old_genes, vec![G0, G1]);

        let history = store.history("1").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].new_gene, G1);
        assert_eq!(history[0].price, 0.01);
        assert_eq!(history[1].old_gene, G1);
        assert_eq!(history[1].new_gene, G2);
        assert_eq!(history[1].attribute_changed, Some(Slot::Background));
        assert_eq!(history[1].price, 0.02);
        assert_eq!(store.morph_cost("1").await.unwrap(), Some(0.04));
    }

    #[tokio::test]
    async fn test_scramble_resets_price() {
        let store = Arc::new(MemoryStore::new());
        store
            .save_morph_cost(&MorphCost {
                token_id: "1".into(),
                price: 0.08,
            })
            .await
            .unwrap();

        let report = process_morphs(
            chain("876543210987654321"),
            Arc::clone(&store),
            builder(),
            &[morph(1, G0, 10)],
        )
        .await;
        assert_eq!(report.scrambles, 1);

        let entity = store.entity("1").await.unwrap().unwrap();
        assert_eq!(entity.scrambles, 1);
        assert_eq!(store.history("1").await.unwrap()[0].price, 0.08);
        assert_eq!(store.morph_cost("1").await.unwrap(), Some(0.01));
    }

    #[tokio::test]
    async fn test_unchanged_gene_refreshes_without_counting() {
        let store = Arc::new(MemoryStore::new());
        let report = process_morphs(chain(G0), Arc::clone(&store), builder(), &[morph(1, G0, 10)]).await;

        assert_eq!(report.applied, 1);
        assert_eq!(report.morphs + report.scrambles, 0);
        let entity = store.entity("1").await.unwrap().unwrap();
        assert_eq!(entity.morphs, 0);
        assert!(!entity.is_virgin);
        assert!(store.history("1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_gene_read_skips_event() {
        let mut client = MockChainClient::new();
        client
            .expect_gene_of()
            .returning(|_| Err(RpcError::Timeout(10)));
        client.expect_block_timestamp().never();

        let store = Arc::new(MemoryStore::new());
        let report =
            process_morphs(Arc::new(client), Arc::clone(&store), builder(), &[morph(1, G0, 10)]).await;

        assert_eq!(report.applied, 0);
        assert_eq!(report.skipped, 1);
        assert!(store.entity("1").await.unwrap().is_none());
        assert!(store.processed_transactions().await.unwrap().is_empty());
    }

    // ==================== Ledger claim tests ====================

    #[tokio::test]
    async fn test_mint_claimed_elsewhere_is_not_inserted() {
        let store = MemoryStore::new();
        let taken = mint(1, G0, 10);
        store
            .claim_transactions(&[transaction_record(&taken.position)])
            .await
            .unwrap();

        let report = process_mints(vec![taken, mint(2, G1, 10)], builder(), &store).await;
        assert_eq!(report.inserted, 1);
        assert_eq!(report.duplicates, 1);
        assert!(store.entity("1").await.unwrap().is_none());
        assert!(store.entity("2").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_morph_claimed_elsewhere_is_left_alone() {
        let store = Arc::new(MemoryStore::new());
        let event = morph(1, G0, 10);
        store
            .claim_transactions(&[transaction_record(&event.position)])
            .await
            .unwrap();

        let report = process_morphs(chain(G1), Arc::clone(&store), builder(), &[event]).await;
        assert_eq!(report.applied, 0);
        assert_eq!(report.duplicates, 1);
        assert!(store.entity("1").await.unwrap().is_none());
        assert!(store.history("1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_foreign_morph_closes_carried_transform() {
        let store = Arc::new(MemoryStore::new());
        let events = [morph(1, G0, 10), morph(1, G1, 11)];
        store
            .claim_transactions(&[transaction_record(&events[1].position)])
            .await
            .unwrap();

        let report = process_morphs(chain(G2), Arc::clone(&store), builder(), &events).await;
        assert_eq!(report.applied, 1);
        assert_eq!(report.duplicates, 1);
        assert_eq!(report.morphs, 1);

        let entity = store.entity("1").await.unwrap().unwrap();
        assert_eq!(entity.morphs, 1);
        assert_eq!(entity.old_genes, vec![G0]);
        let history = store.history("1").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].new_gene, G1);
    }

    #[tokio::test]
    async fn test_skipped_morph_releases_its_claim() {
        let mut client = MockChainClient::new();
        client
            .expect_gene_of()
            .returning(|_| Err(RpcError::Timeout(10)));

        let store = Arc::new(MemoryStore::new());
        let event = morph(1, G0, 10);
        process_morphs(Arc::new(client), Arc::clone(&store), builder(), &[event.clone()]).await;

        let record = transaction_record(&event.position);
        assert_eq!(store.claim_transactions(&[record]).await.unwrap(), vec![true]);
    }
}
