//! Genome Decoder
//!
//! Turns a token's packed decimal gene into its nine trait attributes.
//! Each trait lives in a fixed 2-digit window counted from the end of the
//! gene; the window value is reduced modulo the slot's cardinality and
//! resolved against the trait catalog.

use alloy::primitives::U256;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::catalog::TraitCatalog;

/// Minimum number of digits a gene is padded to before slicing
pub const GENOME_WIDTH: usize = 18;

/// Gene value denoting "not minted yet"
pub const NO_GENE: &str = "0";

/// Errors that can occur while decoding a gene
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GenomeError {
    #[error("Gene is empty")]
    Empty,

    #[error("Gene contains non-digit characters: {0}")]
    NonNumeric(String),

    #[error("Gene 0 has no traits")]
    Unminted,

    #[error("Trait catalog has no {slot} entry at index {index}")]
    MissingTrait { slot: &'static str, index: usize },
}

/// One of the nine trait slots packed into a gene
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Slot {
    Character,
    Footwear,
    Pants,
    Torso,
    Eyewear,
    Headwear,
    #[serde(rename = "Left Hand")]
    LeftHand,
    #[serde(rename = "Right Hand")]
    RightHand,
    Background,
}

impl Slot {
    /// Slots in attribute output order
    pub const ALL: [Slot; 9] = [
        Slot::Character,
        Slot::Footwear,
        Slot::Pants,
        Slot::Torso,
        Slot::Eyewear,
        Slot::Headwear,
        Slot::LeftHand,
        Slot::RightHand,
        Slot::Background,
    ];

    /// Slots in image path order
    pub const IMAGE_ORDER: [Slot; 9] = [
        Slot::RightHand,
        Slot::LeftHand,
        Slot::Headwear,
        Slot::Eyewear,
        Slot::Torso,
        Slot::Pants,
        Slot::Footwear,
        Slot::Character,
        Slot::Background,
    ];

    /// Human-readable trait type
    pub fn trait_type(&self) -> &'static str {
        match self {
            Slot::Character => "Character",
            Slot::Footwear => "Footwear",
            Slot::Pants => "Pants",
            Slot::Torso => "Torso",
            Slot::Eyewear => "Eyewear",
            Slot::Headwear => "Headwear",
            Slot::LeftHand => "Left Hand",
            Slot::RightHand => "Right Hand",
            Slot::Background => "Background",
        }
    }

    /// Number of options in the slot's category
    pub fn cardinality(&self) -> usize {
        match self {
            Slot::Character => 11,
            Slot::Background => 12,
            Slot::Pants => 33,
            Slot::Torso => 34,
            Slot::Footwear => 25,
            Slot::Eyewear => 13,
            Slot::Headwear => 31,
            Slot::RightHand => 32,
            Slot::LeftHand => 32,
        }
    }

    /// Distance of the slot's window end from the end of the gene
    fn end_offset(&self) -> usize {
        match self {
            Slot::Character => 0,
            Slot::Background => 2,
            Slot::Pants => 4,
            Slot::Torso => 6,
            Slot::Footwear => 8,
            Slot::Eyewear => 10,
            Slot::Headwear => 12,
            Slot::RightHand => 14,
            Slot::LeftHand => 16,
        }
    }

    /// Byte range of the slot inside a gene of the given length, or `None`
    /// when the gene is too short to hold it
    pub fn window(&self, len: usize) -> Option<std::ops::Range<usize>> {
        let end = len.checked_sub(self.end_offset())?;
        Some(end.checked_sub(2)?..end)
    }

    /// Slot whose window covers the given character position
    pub fn at_position(pos: usize, len: usize) -> Option<Slot> {
        Slot::ALL
            .into_iter()
            .find(|s| s.window(len).is_some_and(|w| w.contains(&pos)))
    }

    /// Whether the slot is excluded from set scoring
    pub fn is_cosmetic(&self) -> bool {
        matches!(self, Slot::Character | Slot::Background)
    }

    pub fn is_hand(&self) -> bool {
        matches!(self, Slot::LeftHand | Slot::RightHand)
    }
}

impl std::fmt::Display for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.trait_type())
    }
}

/// A decoded trait
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub trait_type: Slot,
    pub value: String,
    /// Sets this value belongs to
    #[serde(default)]
    pub sets: Vec<String>,
}

/// Left-pad a gene with zeros to at least `width` digits
pub fn pad_genome(gene: &str, width: usize) -> String {
    format!("{:0>width$}", gene, width = width)
}

/// Whether a gene string denotes "no gene yet"
pub fn is_unminted(gene: &str) -> bool {
    gene.trim_start_matches('0').is_empty()
}

/// A validated, padded gene
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Genome {
    raw: String,
    padded: String,
}

impl Genome {
    /// Validate a decimal gene string
    pub fn parse(raw: &str) -> Result<Self, GenomeError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(GenomeError::Empty);
        }
        if !raw.bytes().all(|b| b.is_ascii_digit()) {
            return Err(GenomeError::NonNumeric(raw.to_string()));
        }
        if is_unminted(raw) {
            return Err(GenomeError::Unminted);
        }
        Ok(Self {
            raw: raw.to_string(),
            padded: pad_genome(raw, GENOME_WIDTH),
        })
    }

    /// Build from an on-chain gene value
    pub fn from_u256(gene: U256) -> Result<Self, GenomeError> {
        Self::parse(&gene.to_string())
    }

    /// The gene as received
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Category index of a slot
    pub fn slot_index(&self, slot: Slot) -> usize {
        // parse pads to at least GENOME_WIDTH digits, so every window fits
        let raw: usize = slot
            .window(self.padded.len())
            .and_then(|window| self.padded[window].parse().ok())
            .unwrap_or(0);
        raw % slot.cardinality()
    }

    /// Resolve a single slot against the catalog
    pub fn attribute(&self, slot: Slot, catalog: &TraitCatalog) -> Result<Attribute, GenomeError> {
        let index = self.slot_index(slot);
        let (value, sets) = catalog
            .lookup(slot, index)
            .ok_or(GenomeError::MissingTrait {
                slot: slot.trait_type(),
                index,
            })?;
        Ok(Attribute {
            trait_type: slot,
            value: value.to_string(),
            sets: sets.to_vec(),
        })
    }

    /// Decode all nine attributes in output order
    pub fn attributes(&self, catalog: &TraitCatalog) -> Result<Vec<Attribute>, GenomeError> {
        Slot::ALL
            .iter()
            .map(|slot| self.attribute(*slot, catalog))
            .collect()
    }

    /// Zero-padded category indices in image path order
    pub fn image_paths(&self) -> Vec<String> {
        Slot::IMAGE_ORDER
            .iter()
            .map(|slot| format!("{:02}", self.slot_index(*slot)))
            .collect()
    }

    /// Reference to the composed image for this gene
    pub fn image_url(&self, base: &str) -> String {
        format!("{}{}.jpg", base, self.image_paths().concat())
    }
}

impl std::fmt::Display for Genome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Prefix of a token's public page
pub const EXTERNAL_URL: &str = "https://universe.xyz/polymorphs/";

/// Display name of a token
pub fn token_name(character: &str, token_id: &str) -> String {
    format!("{} #{}", character, token_id)
}

/// Metadata description of a token
pub fn token_description(kind: &str, character: &str, token_id: &str) -> String {
    format!(
        "The {} named {} #{} is a citizen of the Polymorph Universe and has a unique genetic code! You can scramble your Polymorph at anytime.",
        kind, character, token_id
    )
}

/// Public page of a token
pub fn token_external_url(token_id: &str) -> String {
    format!("{}{}", EXTERNAL_URL, token_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::tests::generated_catalog;

    // ==================== Slot tests ====================

    #[test]
    fn test_slot_windows_tile_last_eighteen_digits() {
        let mut covered = vec![false; GENOME_WIDTH];
        for slot in Slot::ALL {
            for pos in slot.window(GENOME_WIDTH).unwrap() {
                assert!(!covered[pos], "{} overlaps", slot);
                covered[pos] = true;
            }
        }
        assert!(covered.into_iter().all(|c| c));
    }

    #[test]
    fn test_slot_at_position() {
        assert_eq!(Slot::at_position(17, 18), Some(Slot::Character));
        assert_eq!(Slot::at_position(0, 18), Some(Slot::LeftHand));
        assert_eq!(Slot::at_position(3, 18), Some(Slot::RightHand));
        assert_eq!(Slot::at_position(0, 20), None);
    }

    #[test]
    fn test_short_gene_has_no_window() {
        assert_eq!(Slot::Character.window(2), Some(0..2));
        assert_eq!(Slot::Background.window(3), None);
        assert_eq!(Slot::LeftHand.window(17), None);
        assert_eq!(Slot::at_position(0, 4), Some(Slot::Background));
        assert_eq!(Slot::at_position(0, 1), None);
    }

    #[test]
    fn test_slot_serializes_as_trait_type() {
        let json = serde_json::to_string(&Slot::LeftHand).unwrap();
        assert_eq!(json, "\"Left Hand\"");
        assert_eq!(Slot::RightHand.to_string(), "Right Hand");
    }

    // ==================== Parsing tests ====================

    #[test]
    fn test_parse_rejects_malformed() {
        assert_eq!(Genome::parse(""), Err(GenomeError::Empty));
        assert_eq!(Genome::parse("0"), Err(GenomeError::Unminted));
        assert!(matches!(
            Genome::parse("12ab34"),
            Err(GenomeError::NonNumeric(_))
        ));
    }

    #[test]
    fn test_pad_genome() {
        assert_eq!(pad_genome("123", 6), "000123");
        assert_eq!(pad_genome("1234567", 6), "1234567");
    }

    #[test]
    fn test_short_gene_is_padded() {
        let gene = Genome::parse("5").unwrap();
        assert_eq!(gene.as_str(), "5");
        assert_eq!(gene.slot_index(Slot::Character), 5);
        assert_eq!(gene.slot_index(Slot::LeftHand), 0);
    }

    #[test]
    fn test_from_u256() {
        let gene = Genome::from_u256(U256::from(123456789012345678u64)).unwrap();
        assert_eq!(gene.as_str(), "123456789012345678");
        assert_eq!(Genome::from_u256(U256::ZERO), Err(GenomeError::Unminted));
    }

    // ==================== Decoding tests ====================

    #[test]
    fn test_slot_indices_reduce_modulo_cardinality() {
        // 12 34 56 78 90 12 34 56 78
        let gene = Genome::parse("123456789012345678").unwrap();
        assert_eq!(gene.slot_index(Slot::LeftHand), 12);
        assert_eq!(gene.slot_index(Slot::RightHand), 34 % 32);
        assert_eq!(gene.slot_index(Slot::Headwear), 56 % 31);
        assert_eq!(gene.slot_index(Slot::Eyewear), 78 % 13);
        assert_eq!(gene.slot_index(Slot::Footwear), 90 % 25);
        assert_eq!(gene.slot_index(Slot::Torso), 12);
        assert_eq!(gene.slot_index(Slot::Pants), 34 % 33);
        assert_eq!(gene.slot_index(Slot::Background), 56 % 12);
        assert_eq!(gene.slot_index(Slot::Character), 78 % 11);
    }

    #[test]
    fn test_attributes_order_and_values() {
        let catalog = generated_catalog();
        let gene = Genome::parse("123456789012345678").unwrap();
        let attrs = gene.attributes(&catalog).unwrap();

        let types: Vec<Slot> = attrs.iter().map(|a| a.trait_type).collect();
        assert_eq!(types, Slot::ALL);
        assert_eq!(attrs[0].value, "Character 1");
        assert_eq!(attrs[6].value, "Left Hand 12");
        assert_eq!(attrs[8].value, "Background 8");
    }

    #[test]
    fn test_decoding_is_deterministic() {
        let catalog = generated_catalog();
        let gene = Genome::parse("987654321098765432").unwrap();
        assert_eq!(
            gene.attributes(&catalog).unwrap(),
            gene.attributes(&catalog).unwrap()
        );
    }

    #[test]
    fn test_missing_catalog_entry() {
        let mut catalog = generated_catalog();
        catalog.character.clear();
        let gene = Genome::parse("123456789012345678").unwrap();
        assert_eq!(
            gene.attributes(&catalog),
            Err(GenomeError::MissingTrait {
                slot: "Character",
                index: 1
            })
        );
    }

    // ==================== Image tests ====================

    #[test]
    fn test_image_url() {
        let gene = Genome::parse("123456789012345678").unwrap();
        // right, left, head, eye, torso, pants, shoes, character, background
        assert_eq!(
            gene.image_paths(),
            vec!["02", "12", "25", "00", "12", "01", "15", "01", "08"]
        );
        assert_eq!(
            gene.image_url("https://img/"),
            "https://img/021225001201150108.jpg"
        );
    }

    #[test]
    fn test_token_name() {
        assert_eq!(token_name("Ape", "42"), "Ape #42");
        assert_eq!(token_external_url("42"), "https://universe.xyz/polymorphs/42");
        assert!(token_description("Ape", "Ape Guy", "42")
            .starts_with("The Ape named Ape Guy #42 is a citizen of the Polymorph Universe"));
    }
}
