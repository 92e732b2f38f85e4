//! Throughput benchmarks for gene decoding and rarity scoring
//!
//! A full run re-scores every morphed token, so decode + score is the hot
//! path of the indexer.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use polymorph_indexer::catalog::{ScoringConfig, TraitCatalog, TraitOption};
use polymorph_indexer::{calculate_rarity, detect_gene_differences, Genome, Slot};

const SETS: [&str; 3] = ["Spartan", "Knight", "Party Degen"];

/// Catalog cycling every slot through a few real set names
fn catalog() -> TraitCatalog {
    let names = |slot: Slot| -> Vec<String> {
        (0..slot.cardinality())
            .map(|i| format!("{} {}", slot.trait_type(), i))
            .collect()
    };
    let options = |slot: Slot| -> Vec<TraitOption> {
        names(slot)
            .into_iter()
            .enumerate()
            .map(|(i, n)| TraitOption::new(n, &[SETS[i % SETS.len()]]))
            .collect()
    };
    TraitCatalog {
        character: names(Slot::Character),
        character_type: Vec::new(),
        background: names(Slot::Background),
        footwear: options(Slot::Footwear),
        pants: options(Slot::Pants),
        torso: options(Slot::Torso),
        eyewear: options(Slot::Eyewear),
        headwear: options(Slot::Headwear),
        right_hand: options(Slot::RightHand),
        left_hand: options(Slot::LeftHand),
        scoring: ScoringConfig::default(),
    }
}

/// Benchmark gene parsing and attribute lookup
fn bench_decode_genome(c: &mut Criterion) {
    let catalog = catalog();

    c.bench_function("decode_genome", |b| {
        b.iter(|| {
            let genome = Genome::parse(black_box("123456789012345678")).unwrap();
            black_box(genome.attributes(&catalog).unwrap())
        })
    });
}

/// Benchmark scoring of already decoded attributes
fn bench_calculate_rarity(c: &mut Criterion) {
    let catalog = catalog();
    let attributes = Genome::parse("030603000300030003")
        .unwrap()
        .attributes(&catalog)
        .unwrap();

    c.bench_function("calculate_rarity", |b| {
        b.iter(|| {
            black_box(calculate_rarity(
                black_box(&attributes),
                true,
                &catalog.scoring,
            ))
        })
    });
}

/// Benchmark decode + score over a spread of genes
fn bench_decode_and_score(c: &mut Criterion) {
    let catalog = catalog();
    let genes: Vec<String> = (0..1_000u64)
        .map(|i| (100_000_000_000_000_000 + i * 7_919_113_571).to_string())
        .collect();

    c.bench_function("decode_and_score_1000", |b| {
        b.iter(|| {
            for gene in &genes {
                let genome = Genome::parse(gene).unwrap();
                let attributes = genome.attributes(&catalog).unwrap();
                black_box(calculate_rarity(&attributes, false, &catalog.scoring));
            }
        })
    });
}

/// Benchmark gene diffing
fn bench_gene_diff(c: &mut Criterion) {
    c.bench_function("detect_gene_differences", |b| {
        b.iter(|| {
            black_box(detect_gene_differences(
                black_box("123456789012345678"),
                black_box("123436789012345679"),
            ))
        })
    });
}

criterion_group!(
    benches,
    bench_decode_genome,
    bench_calculate_rarity,
    bench_decode_and_score,
    bench_gene_diff
);

criterion_main!(benches);
