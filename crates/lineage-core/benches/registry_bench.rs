//! # Registry Benchmarks
//!
//! Performance benchmarks for lineage-core code derivation, registration
//! and lineage walks.
//!
//! Run with: `cargo bench -p lineage-core`

use chrono::NaiveDate;
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use lineage_core::{
    ClassificationSeed, Credentials, Dimension, DisplayId, Gender, OriginLabels, PersonDraft,
    Registry, RegistrationRequest, VitalityDraft, generation_code,
};
use std::hint::black_box;

const BENCH_PHC: &str =
    "$argon2id$v=19$m=19456,t=2,p=1$c2FsdHNhbHRzYWx0$ZmFrZWhhc2hmYWtlaGFzaGZha2VoYXNoZmFrZWhhc2g";

fn draft(given: &str, family: &str) -> PersonDraft {
    PersonDraft {
        given_name: given.to_string(),
        family_name: family.to_string(),
        gender: Gender::Female,
        birth_date: NaiveDate::from_ymd_opt(1992, 7, 1),
        origin: OriginLabels {
            continent: "Afrique".to_string(),
            country: "Guinée".to_string(),
            region: "Guinée forestière".to_string(),
            ethnicity: "Kissi".to_string(),
        },
        vitality: VitalityDraft::Living {
            credentials: Credentials::from_phc(BENCH_PHC).expect("phc"),
        },
    }
}

fn registry() -> Registry {
    Registry::in_memory(ClassificationSeed::curated().expect("seed")).expect("registry")
}

/// A single line of descent `size` persons deep. Returns the root id.
fn create_line(registry: &Registry, size: usize) -> DisplayId {
    let root = registry
        .register(RegistrationRequest::new(draft("Racine", "Millimono")))
        .expect("register")
        .person
        .id;
    let mut parent = root.clone();
    for i in 1..size {
        parent = registry
            .register(
                RegistrationRequest::new(draft(&format!("Descendant {i}"), "Millimono"))
                    .with_father(parent.to_string()),
            )
            .expect("register")
            .person
            .id;
    }
    root
}

// =============================================================================
// BENCHMARKS
// =============================================================================

fn bench_era_codes(c: &mut Criterion) {
    let date = NaiveDate::from_ymd_opt(1987, 11, 23).expect("date");
    c.bench_function("generation_code", |b| {
        b.iter(|| black_box(generation_code(black_box(date))))
    });
}

fn bench_resolve(c: &mut Criterion) {
    let registry = registry();
    registry
        .classifier()
        .resolve(Dimension::Family, "Millimono")
        .expect("allocate");

    let mut group = c.benchmark_group("resolve");
    for label in ["Diallo", "Millimono"] {
        group.bench_with_input(BenchmarkId::from_parameter(label), &label, |b, label| {
            b.iter(|| {
                black_box(
                    registry
                        .classifier()
                        .resolve(Dimension::Family, label)
                        .expect("resolve"),
                )
            });
        });
    }
    group.finish();
}

fn bench_registration(c: &mut Criterion) {
    let mut group = c.benchmark_group("registration");

    for size in [10, 100, 1000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter(|| {
                let registry = registry();
                for i in 0..size {
                    let request = RegistrationRequest::new(draft(&format!("P{i}"), "Diallo"));
                    let _ = registry.register(request);
                }
                black_box(registry)
            });
        });
    }

    group.finish();
}

fn bench_descendants(c: &mut Criterion) {
    let mut group = c.benchmark_group("descendants");

    for size in [10, 64].iter() {
        let registry = registry();
        let root = create_line(&registry, *size);
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter(|| black_box(registry.graph().descendants(&root, size).expect("walk")));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_era_codes,
    bench_resolve,
    bench_registration,
    bench_descendants,
);
criterion_main!(benches);
