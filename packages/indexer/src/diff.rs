//! Gene Diff
//!
//! Compares two genes digit by digit to find out what a transform did.
//! One or two differing digits is a targeted morph; anything more is a
//! scramble.

use serde::{Deserialize, Serialize};

use crate::genome::{is_unminted, pad_genome, Slot, GENOME_WIDTH};

/// Kind of change a transform made to a gene
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    Morph,
    Scramble,
}

impl ChangeKind {
    pub fn name(&self) -> &'static str {
        match self {
            ChangeKind::Morph => "Morph",
            ChangeKind::Scramble => "Scramble",
        }
    }
}

/// Result of comparing two genes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GeneDiff {
    /// Number of differing digits
    pub differences: usize,
    /// The slot that changed, when exactly one slot differs
    pub changed_slot: Option<Slot>,
}

impl GeneDiff {
    /// Classify the diff; `None` when the genes are identical
    pub fn change_kind(&self) -> Option<ChangeKind> {
        match self.differences {
            0 => None,
            1..=2 => Some(ChangeKind::Morph),
            _ => Some(ChangeKind::Scramble),
        }
    }
}

/// Compare two genes
///
/// Either side being `"0"` (not minted) yields an empty diff.
///
/// # Arguments
/// * `old` - Gene before the transform
/// * `new` - Gene after the transform
pub fn detect_gene_differences(old: &str, new: &str) -> GeneDiff {
    if is_unminted(old) || is_unminted(new) {
        return GeneDiff::default();
    }

    let width = old.len().max(new.len()).max(GENOME_WIDTH);
    let old = pad_genome(old, width);
    let new = pad_genome(new, width);

    let mut differences = 0;
    let mut slots: Vec<Slot> = Vec::new();
    for (pos, (a, b)) in old.bytes().zip(new.bytes()).enumerate() {
        if a == b {
            continue;
        }
        differences += 1;
        if let Some(slot) = Slot::at_position(pos, width) {
            if !slots.contains(&slot) {
                slots.push(slot);
            }
        }
    }

    let changed_slot = match slots.as_slice() {
        [only] => Some(*only),
        _ => None,
    };

    GeneDiff {
        differences,
        changed_slot,
    }
}
