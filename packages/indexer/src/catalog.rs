//! Trait Catalog
//!
//! Static name/set tables for every gene slot plus the constants the rarity
//! scorer runs on. Loaded once at startup from the collection's JSON config;
//! a catalog with a missing or short table is rejected before any event is
//! processed.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::genome::Slot;

/// Errors that can occur while loading the trait catalog
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Failed to read trait config at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse trait config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Trait table for {slot} has {found} entries, expected {expected}")]
    TableSize {
        slot: &'static str,
        found: usize,
        expected: usize,
    },
}

/// A set-bearing trait value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraitOption {
    pub name: String,
    #[serde(default)]
    pub sets: Vec<String>,
}

impl TraitOption {
    pub fn new(name: impl Into<String>, sets: &[&str]) -> Self {
        Self {
            name: name.into(),
            sets: sets.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Canonical colour palette of a coloured set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorSet {
    pub name: String,
    pub colors: Vec<String>,
}

impl ColorSet {
    fn new(name: &str, colors: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            colors: colors.iter().map(|c| c.to_string()).collect(),
        }
    }
}

/// Hand-matching scalers, one per (set state, matched hands) combination
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandScalers {
    pub no_set_two_matching: f64,
    pub no_set_two_same_matching: f64,
    pub incomplete_set_one_matching: f64,
    pub incomplete_set_two_matching: f64,
    pub incomplete_set_two_same_matching: f64,
    pub has_set_one_matching: f64,
    pub has_set_two_matching: f64,
    pub has_set_two_same_matching: f64,
}

impl Default for HandScalers {
    fn default() -> Self {
        Self {
            no_set_two_matching: 1.1,
            no_set_two_same_matching: 1.2,
            incomplete_set_one_matching: 1.3,
            incomplete_set_two_matching: 1.4,
            incomplete_set_two_same_matching: 1.5,
            has_set_one_matching: 1.6,
            has_set_two_matching: 1.7,
            has_set_two_same_matching: 1.8,
        }
    }
}

/// Constants and set tables used by the rarity scorer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub no_color_mismatch_scaler: f64,
    pub color_mismatch_scaler: f64,
    pub degen_scaler: f64,
    pub virgin_scaler: f64,
    pub mismatch_penalty: f64,
    pub secondary_set_scaler: f64,
    /// Flat price of a scramble, also the starting morph price
    pub scramble_cost: f64,
    /// The low-value set that gets the degen scaler and loses main-set ties
    pub low_tier_set: String,
    pub hands: HandScalers,
    /// Set name -> number of traits needed to complete it
    pub combos: HashMap<String, usize>,
    /// Set name -> hand items that belong to the set
    pub set_hands: HashMap<String, Vec<String>>,
    pub color_sets: Vec<ColorSet>,
}

impl ScoringConfig {
    /// Completion threshold for a set, if the set is known
    pub fn completion_threshold(&self, set: &str) -> Option<usize> {
        self.combos.get(set).copied()
    }

    /// Canonical hand items of a set (empty for unknown sets)
    pub fn canonical_hands(&self, set: &str) -> &[String] {
        self.set_hands.get(set).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Palette of the coloured set the given set name refers to
    pub fn palette_for(&self, set: &str) -> Option<&ColorSet> {
        if set.is_empty() {
            return None;
        }
        self.color_sets.iter().find(|c| set.contains(c.name.as_str()))
    }
}

const DEFAULT_COMBOS: &[(&str, usize)] = &[
    ("Amish", 4),
    ("Astronaut", 4),
    ("Ninja", 4),
    ("Clown", 4),
    ("Chemical", 4),
    ("Samurai", 3),
    ("Rainbow", 3),
    ("Marine", 4),
    ("Zombie Rags", 2),
    ("Hockey", 4),
    ("Sushi Chef", 4),
    ("Taekwondo", 2),
    ("Tennis", 3),
    ("Striped Soccer", 3),
    ("Basketball", 3),
    ("Tuxedo", 4),
    ("Football Star", 4),
    ("Spartan", 4),
    ("Knight", 4),
    ("Golden Suit", 5),
    ("Plaid Suit", 4),
    ("Black Suit", 4),
    ("Brown Suit", 4),
    ("Grey Suit", 4),
    ("Golf", 4),
    ("Soccer Argentina", 3),
    ("Soccer Brazil", 3),
    ("Naked", 5),
    ("Stoner", 1),
    ("Party Degen", 5),
];

const DEFAULT_SET_HANDS: &[(&str, &[&str])] = &[
    ("Amish", &["Amish Pitch Fork"]),
    ("Astronaut", &["Naked"]),
    ("Ninja", &["Katana", "Bow"]),
    ("Clown", &["Naked"]),
    ("Chemical", &["Naked"]),
    ("Samurai", &["Katana", "Bow"]),
    ("Rainbow", &["Naked"]),
    ("Marine", &["Grenade", "Big Gun", "Black Gun"]),
    ("Zombie Rags", &["Naked"]),
    ("Hockey", &["Hockey Stick"]),
    ("Sushi Chef", &["Sushi Knife"]),
    ("Taekwondo", &["Naked"]),
    ("Tennis", &["Tennis Racket"]),
    ("Football Star", &["American Football"]),
    ("Striped Soccer", &["Naked"]),
    (
        "Spartan",
        &[
            "Silver Spartan Sword",
            "Golden Spartan Sword",
            "Platinum Spartan Sword",
            "Shield",
            "Bow & Arrow",
        ],
    ),
    ("Basketball", &["Basketball"]),
    ("Knight", &["Sword", "Shield", "Bow & Arrow"]),
    ("Tuxedo", &["Big Gun"]),
    ("Plaid Suit", &["Naked"]),
    ("Golden Suit", &["Golden Gun"]),
    ("Black Suit", &["Black Gun"]),
    ("Brown Suit", &["Naked"]),
    ("Grey Suit", &["Naked"]),
    ("Golf", &["Golf Club"]),
    ("Soccer Argentina", &["Naked"]),
    ("Soccer Brazil", &["Naked"]),
    ("Naked", &["Naked"]),
    ("Stoner", &["Bong"]),
    (
        "Party Degen",
        &[
            "Banana",
            "Bong",
            "Beer",
            "Blue Degen Sword",
            "Double Degen SwordBlue",
            "Double Degen SwordRed",
            "Double Degen SwordYellow",
            "Green Degen Sword",
            "Purple Degen Sword",
            "Red Degen Sword",
        ],
    ),
];

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            no_color_mismatch_scaler: 3.0,
            color_mismatch_scaler: 1.5,
            degen_scaler: 0.5,
            virgin_scaler: 1.5,
            mismatch_penalty: 0.5,
            secondary_set_scaler: 0.5,
            scramble_cost: 0.01,
            low_tier_set: "Party Degen".to_string(),
            hands: HandScalers::default(),
            combos: DEFAULT_COMBOS
                .iter()
                .map(|(name, count)| (name.to_string(), *count))
                .collect(),
            set_hands: DEFAULT_SET_HANDS
                .iter()
                .map(|(name, hands)| {
                    (
                        name.to_string(),
                        hands.iter().map(|h| h.to_string()).collect(),
                    )
                })
                .collect(),
            color_sets: vec![
                ColorSet::new("Football Star", &["Red", "White", "Yellow"]),
                ColorSet::new("Spartan", &["Platinum", "Silver", "Gold", "Brown"]),
                ColorSet::new("Knight", &["Silver", "Golden"]),
            ],
        }
    }
}

/// All static tables of the collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraitCatalog {
    pub character: Vec<String>,
    /// Kind of each character, used in token descriptions
    #[serde(default, rename = "type")]
    pub character_type: Vec<String>,
    pub background: Vec<String>,
    pub footwear: Vec<TraitOption>,
    pub pants: Vec<TraitOption>,
    pub torso: Vec<TraitOption>,
    pub eyewear: Vec<TraitOption>,
    pub headwear: Vec<TraitOption>,
    #[serde(rename = "weaponright")]
    pub right_hand: Vec<TraitOption>,
    #[serde(rename = "weaponleft")]
    pub left_hand: Vec<TraitOption>,
    #[serde(default)]
    pub scoring: ScoringConfig,
}

impl TraitCatalog {
    /// Load and validate the catalog from a JSON file
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&raw)
    }

    /// Parse and validate the catalog from a JSON string
    pub fn from_json(raw: &str) -> Result<Self, CatalogError> {
        let catalog: TraitCatalog = serde_json::from_str(raw)?;
        catalog.validate()?;
        Ok(catalog)
    }

    /// Check every table covers its slot's full index range
    pub fn validate(&self) -> Result<(), CatalogError> {
        for slot in Slot::ALL {
            let found = self.table_len(slot);
            if found != slot.cardinality() {
                return Err(CatalogError::TableSize {
                    slot: slot.trait_type(),
                    found,
                    expected: slot.cardinality(),
                });
            }
        }
        let types = self.character_type.len();
        if types != 0 && types != Slot::Character.cardinality() {
            return Err(CatalogError::TableSize {
                slot: "Type",
                found: types,
                expected: Slot::Character.cardinality(),
            });
        }
        Ok(())
    }

    /// Kind of the character at `index`, if the catalog names one
    pub fn character_type(&self, index: usize) -> Option<&str> {
        self.character_type.get(index).map(String::as_str)
    }

    fn table_len(&self, slot: Slot) -> usize {
        match slot {
            Slot::Character => self.character.len(),
            Slot::Background => self.background.len(),
            _ => self.options(slot).map(<[TraitOption]>::len).unwrap_or(0),
        }
    }

    fn options(&self, slot: Slot) -> Option<&[TraitOption]> {
        match slot {
            Slot::Footwear => Some(&self.footwear),
            Slot::Pants => Some(&self.pants),
            Slot::Torso => Some(&self.torso),
            Slot::Eyewear => Some(&self.eyewear),
            Slot::Headwear => Some(&self.headwear),
            Slot::RightHand => Some(&self.right_hand),
            Slot::LeftHand => Some(&self.left_hand),
            Slot::Character | Slot::Background => None,
        }
    }

    /// Resolve a category index to its display value and set membership
    pub fn lookup(&self, slot: Slot, index: usize) -> Option<(&str, &[String])> {
        match slot {
            Slot::Character => self.character.get(index).map(|n| (n.as_str(), &[][..])),
            Slot::Background => self.background.get(index).map(|n| (n.as_str(), &[][..])),
            _ => self
                .options(slot)?
                .get(index)
                .map(|o| (o.name.as_str(), o.sets.as_slice())),
        }
    }
}
