//! Projection Records
//!
//! Shapes persisted by the indexer: the per-token entity, history
//! snapshots of each transform, the processed-transaction ledger and the
//! per-token morph price.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::diff::ChangeKind;
use crate::genome::{token_description, token_external_url, token_name, Attribute, Genome, Slot};
use crate::rarity::RarityResult;

/// Projected state of a single token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolymorphEntity {
    pub token_id: String,
    pub rank: u64,
    pub current_gene: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub external_url: String,
    pub image_url: String,
    pub character: String,
    pub background: String,
    pub headwear: String,
    pub eyewear: String,
    pub torso: String,
    pub pants: String,
    pub footwear: String,
    pub left_hand: String,
    pub right_hand: String,
    pub is_virgin: bool,
    #[serde(flatten)]
    pub rarity: RarityResult,
    #[serde(default)]
    pub morphs: u64,
    #[serde(default)]
    pub scrambles: u64,
    /// Superseded genes, oldest first
    #[serde(default)]
    pub old_genes: Vec<String>,
}

impl PolymorphEntity {
    /// Build a fresh entity from a decoded gene
    ///
    /// The description names the character as a generic Polymorph;
    /// `EntityBuilder` fills in the character's kind from the catalog.
    ///
    /// # Arguments
    /// * `token_id` - Decimal token id
    /// * `genome` - The token's current gene
    /// * `attributes` - Attributes decoded from `genome`
    /// * `is_virgin` - Whether the token was never morphed
    /// * `rarity` - Score computed from `attributes`
    /// * `image_base` - Prefix of composed image references
    pub fn from_attributes(
        token_id: impl Into<String>,
        genome: &Genome,
        attributes: &[Attribute],
        is_virgin: bool,
        rarity: RarityResult,
        image_base: &str,
    ) -> Self {
        let token_id = token_id.into();
        let value = |slot: Slot| {
            attributes
                .iter()
                .find(|a| a.trait_type == slot)
                .map(|a| a.value.clone())
                .unwrap_or_default()
        };
        let character = value(Slot::Character);

        Self {
            name: token_name(&character, &token_id),
            description: token_description("Polymorph", &character, &token_id),
            external_url: token_external_url(&token_id),
            token_id,
            rank: 0,
            current_gene: genome.as_str().to_string(),
            image_url: genome.image_url(image_base),
            character,
            background: value(Slot::Background),
            headwear: value(Slot::Headwear),
            eyewear: value(Slot::Eyewear),
            torso: value(Slot::Torso),
            pants: value(Slot::Pants),
            footwear: value(Slot::Footwear),
            left_hand: value(Slot::LeftHand),
            right_hand: value(Slot::RightHand),
            is_virgin,
            rarity,
            morphs: 0,
            scrambles: 0,
            old_genes: Vec::new(),
        }
    }

    /// Rarity score used for ranking
    pub fn score(&self) -> f64 {
        self.rarity.scaled_rarity
    }

    /// Apply a transform to the accumulated counters
    pub fn apply_change(&mut self, change: &EntityChange) {
        self.old_genes.push(change.old_gene.clone());
        match change.kind {
            ChangeKind::Morph => self.morphs += 1,
            ChangeKind::Scramble => self.scrambles += 1,
        }
    }
}

/// A superseded gene and the kind of transform that replaced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityChange {
    pub old_gene: String,
    pub kind: ChangeKind,
}

/// One morph or scramble in a token's history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistorySnapshot {
    pub token_id: String,
    #[serde(rename = "type")]
    pub change: ChangeKind,
    pub timestamp: DateTime<Utc>,
    /// The single slot that changed, absent for scrambles
    pub attribute_changed: Option<Slot>,
    pub previous_attribute: String,
    pub new_attribute: String,
    pub price: f64,
    pub image_url: String,
    pub old_gene: String,
    pub new_gene: String,
    pub character: String,
}

/// A log already applied to the projection
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub block_number: u64,
    pub tx_index: u64,
    /// Transaction hash with 0x prefix
    pub tx_hash: String,
    pub log_index: u64,
}

impl TransactionRecord {
    /// Ledger key, unique per log
    pub fn key(&self) -> String {
        ledger_key(&self.tx_hash, self.log_index)
    }
}

/// Ledger key of a log
pub fn ledger_key(tx_hash: &str, log_index: u64) -> String {
    format!("{}:{}", tx_hash.to_lowercase(), log_index)
}

/// Current morph price of a token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MorphCost {
    pub token_id: String,
    pub price: f64,
}
