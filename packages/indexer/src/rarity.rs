//! Rarity Scorer
//!
//! Scores a decoded token from its set membership. The base score is
//! exponential in the size of the token's main set; situational scalers
//! (colour purity, matching hands, degen set, virgin token) are multiplied
//! on top.
//!
//! Counters are kept in first-seen order so that ties always resolve the
//! same way for the same input.

use serde::{Deserialize, Serialize};

use crate::catalog::ScoringConfig;
use crate::genome::{Attribute, Slot};

/// Full scoring breakdown of a token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RarityResult {
    /// Whether the main set reached its completion threshold
    pub has_completed_set: bool,
    pub main_set_name: String,
    /// Trait types counted towards the main set, matched hands appended
    pub main_matching_traits: Vec<Slot>,
    pub sec_set_name: String,
    pub sec_matching_traits: Vec<Slot>,
    pub color_mismatches: usize,
    pub hands_scaler: f64,
    pub hands_set_name: String,
    pub matching_hands: usize,
    pub no_color_mismatch_scaler: f64,
    pub color_mismatch_scaler: f64,
    pub degen_scaler: f64,
    pub virgin_scaler: f64,
    pub base_rarity: f64,
    /// Final score, rounded to two decimals
    pub scaled_rarity: f64,
}

/// Per-set counters in first-seen order
#[derive(Debug, Default)]
struct SetTally {
    entries: Vec<(String, Vec<Slot>)>,
}

impl SetTally {
    /// Count one trait towards a set, returning the new count
    fn add(&mut self, set: &str, trait_type: Slot) -> usize {
        match self.entries.iter_mut().find(|(name, _)| name.as_str() == set) {
            Some((_, traits)) => {
                traits.push(trait_type);
                traits.len()
            }
            None => {
                self.entries.push((set.to_string(), vec![trait_type]));
                1
            }
        }
    }

    fn traits(&self, set: &str) -> Vec<Slot> {
        self.entries
            .iter()
            .find(|(name, _)| name.as_str() == set)
            .map(|(_, traits)| traits.clone())
            .unwrap_or_default()
    }

    /// Largest set with at least two traits, skipping `exclude`
    fn largest(&self, exclude: Option<&str>) -> Option<&str> {
        let mut best: Option<(&str, usize)> = None;
        for (name, traits) in &self.entries {
            if Some(name.as_str()) == exclude || traits.len() < 2 {
                continue;
            }
            if best.map_or(true, |(_, count)| traits.len() > count) {
                best = Some((name.as_str(), traits.len()));
            }
        }
        best.map(|(name, _)| name)
    }
}

/// Main and secondary set picked for a token
#[derive(Debug, Default, PartialEq)]
struct SetSelection {
    completed: bool,
    main_name: String,
    main_traits: Vec<Slot>,
    sec_name: String,
    sec_traits: Vec<Slot>,
}

/// Hand scaler outcome
#[derive(Debug, PartialEq)]
struct HandsMatch {
    scaler: f64,
    set_name: String,
    count: usize,
    matched: Vec<Slot>,
}

impl HandsMatch {
    fn none() -> Self {
        Self {
            scaler: 1.0,
            set_name: String::new(),
            count: 0,
            matched: Vec::new(),
        }
    }
}

/// Split out the hands and drop the cosmetic slots
fn partition_attributes(
    attributes: &[Attribute],
) -> (Option<&Attribute>, Option<&Attribute>, Vec<&Attribute>) {
    let mut left = None;
    let mut right = None;
    let mut rest = Vec::new();
    for attr in attributes {
        let slot = attr.trait_type;
        if slot.is_cosmetic() {
            continue;
        }
        if !slot.is_hand() {
            rest.push(attr);
        } else if slot == Slot::LeftHand {
            left = Some(attr);
        } else {
            right = Some(attr);
        }
    }
    (left, right, rest)
}

fn select_sets(attributes: &[&Attribute], config: &ScoringConfig) -> SetSelection {
    let mut tally = SetTally::default();
    let mut first_completed: Option<String> = None;

    for attr in attributes {
        for set in &attr.sets {
            let count = tally.add(set, attr.trait_type);
            if first_completed.is_none() && config.completion_threshold(set) == Some(count) {
                first_completed = Some(set.clone());
            }
        }
    }

    let main_name = match first_completed {
        Some(name) => name,
        None => tally.largest(None).map(str::to_string).unwrap_or_default(),
    };
    let exclude = (!main_name.is_empty()).then_some(main_name.as_str());
    let sec_name = tally.largest(exclude).map(str::to_string).unwrap_or_default();

    let mut selection = SetSelection {
        completed: false,
        main_traits: tally.traits(&main_name),
        sec_traits: tally.traits(&sec_name),
        main_name,
        sec_name,
    };

    // a low-tier main set never wins over an equally sized secondary
    if !selection.sec_name.is_empty()
        && selection.main_name == config.low_tier_set
        && selection.main_traits.len() == selection.sec_traits.len()
    {
        std::mem::swap(&mut selection.main_name, &mut selection.sec_name);
        std::mem::swap(&mut selection.main_traits, &mut selection.sec_traits);
    }

    selection.completed = config.completion_threshold(&selection.main_name)
        == Some(selection.main_traits.len())
        && !selection.main_name.is_empty();
    selection
}

/// Colour mismatches within the main set, `None` when the set has no palette
fn color_mismatches(attributes: &[Attribute], main_set: &str, config: &ScoringConfig) -> Option<usize> {
    let palette = config.palette_for(main_set)?;
    let mut counts: Vec<(&str, usize)> = Vec::new();
    let mut total = 0;

    for attr in attributes {
        if !attr.sets.iter().any(|s| s == main_set) {
            continue;
        }
        let Some(color) = palette
            .colors
            .iter()
            .find(|c| attr.value.contains(c.as_str()))
        else {
            continue;
        };
        total += 1;
        match counts.iter_mut().find(|(name, _)| *name == color.as_str()) {
            Some((_, n)) => *n += 1,
            None => counts.push((color.as_str(), 1)),
        }
    }

    let dominant = counts.iter().map(|(_, n)| *n).max().unwrap_or(0);
    Some(total - dominant)
}

fn hands_scaler(
    selection: &SetSelection,
    left: Option<&Attribute>,
    right: Option<&Attribute>,
    config: &ScoringConfig,
) -> HandsMatch {
    let canonical = config.canonical_hands(&selection.main_name);
    let mut matched = Vec::new();
    for hand in [left, right].into_iter().flatten() {
        if canonical.iter().any(|c| *c == hand.value) {
            matched.push(hand.trait_type);
        }
    }

    let same = match (left, right) {
        (Some(l), Some(r)) => l.value == r.value,
        _ => false,
    };
    let scalers = &config.hands;

    if matched.is_empty() {
        return shared_hand_set(left, right, same, config);
    }

    let scaler = match (selection.completed, matched.len(), same) {
        (false, 1, _) => scalers.incomplete_set_one_matching,
        (false, 2, false) => scalers.incomplete_set_two_matching,
        (false, 2, true) => scalers.incomplete_set_two_same_matching,
        (true, 1, _) => scalers.has_set_one_matching,
        (true, 2, false) => scalers.has_set_two_matching,
        (true, 2, true) => scalers.has_set_two_same_matching,
        _ => return HandsMatch::none(),
    };

    HandsMatch {
        scaler,
        set_name: selection.main_name.clone(),
        count: matched.len(),
        matched,
    }
}

/// Both hands outside the main set but belonging to a common set
fn shared_hand_set(
    left: Option<&Attribute>,
    right: Option<&Attribute>,
    same: bool,
    config: &ScoringConfig,
) -> HandsMatch {
    let (Some(left), Some(right)) = (left, right) else {
        return HandsMatch::none();
    };
    // the right hand's sets are walked first, so its order breaks ties
    let Some(set) = right.sets.iter().find(|s| left.sets.contains(*s)) else {
        return HandsMatch::none();
    };

    let scaler = if same {
        config.hands.no_set_two_same_matching
    } else {
        config.hands.no_set_two_matching
    };
    HandsMatch {
        scaler,
        set_name: set.clone(),
        count: 2,
        matched: Vec::new(),
    }
}

/// Score a token from its decoded attributes
///
/// # Arguments
/// * `attributes` - The nine decoded attributes
/// * `is_virgin` - Whether the token was never morphed since mint
/// * `config` - Scoring constants and set tables
pub fn calculate_rarity(attributes: &[Attribute], is_virgin: bool, config: &ScoringConfig) -> RarityResult {
    let (left, right, set_attributes) = partition_attributes(attributes);

    let selection = select_sets(&set_attributes, config);
    let mismatches = color_mismatches(attributes, &selection.main_name, config);
    let colored = mismatches.is_some();
    let mismatches = mismatches.unwrap_or(0);
    let hands = hands_scaler(&selection, left, right, config);

    let mut no_color_mismatch_scaler = 1.0;
    let mut color_mismatch_scaler = 1.0;
    if selection.completed && colored {
        if mismatches == 0 {
            no_color_mismatch_scaler = config.no_color_mismatch_scaler;
        } else {
            color_mismatch_scaler = config.color_mismatch_scaler;
        }
    }
    let degen_scaler = if selection.main_name == config.low_tier_set {
        config.degen_scaler
    } else {
        1.0
    };
    let virgin_scaler = if is_virgin { config.virgin_scaler } else { 1.0 };

    let exponent = selection.main_traits.len() as f64
        - config.mismatch_penalty * mismatches as f64
        + config.secondary_set_scaler * selection.sec_traits.len() as f64;
    let base_rarity = 2f64.powf(exponent);

    let scalers = no_color_mismatch_scaler
        * color_mismatch_scaler
        * hands.scaler
        * degen_scaler
        * virgin_scaler;
    let scaled_rarity = (base_rarity * scalers * 100.0).round() / 100.0;

    let mut main_matching_traits = selection.main_traits;
    main_matching_traits.extend(hands.matched);

    RarityResult {
        has_completed_set: selection.completed,
        main_set_name: selection.main_name,
        main_matching_traits,
        sec_set_name: selection.sec_name,
        sec_matching_traits: selection.sec_traits,
        color_mismatches: mismatches,
        hands_scaler: hands.scaler,
        hands_set_name: hands.set_name,
        matching_hands: hands.count,
        no_color_mismatch_scaler,
        color_mismatch_scaler,
        degen_scaler,
        virgin_scaler,
        base_rarity,
        scaled_rarity,
    }
}
