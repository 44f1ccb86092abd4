//! Subtyping and Cache-Key Benchmarks

use constellation::cvalue::CValue;
use constellation::policy::keygen::CacheKeyGenerator;
use constellation::types::{is_subtype, SemanticType};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::collections::BTreeMap;

fn wide_record(fields: usize) -> SemanticType {
    SemanticType::Record(
        (0..fields)
            .map(|i| (format!("field_{i}"), SemanticType::Int))
            .collect(),
    )
}

fn nested_record(depth: usize) -> SemanticType {
    let mut ty = SemanticType::Int;
    for i in 0..depth {
        ty = SemanticType::record([(format!("level_{i}"), ty)]);
    }
    ty
}

fn bench_subtype(c: &mut Criterion) {
    let wide = wide_record(64);
    let narrow = wide_record(8);
    c.bench_function("subtype_wide_record_64_vs_8", |b| {
        b.iter(|| is_subtype(black_box(&wide), black_box(&narrow)))
    });

    let deep_sub = nested_record(32);
    let deep_sup = nested_record(32);
    c.bench_function("subtype_nested_record_depth_32", |b| {
        b.iter(|| is_subtype(black_box(&deep_sub), black_box(&deep_sup)))
    });

    let list = SemanticType::list(SemanticType::candidates(wide_record(16)));
    c.bench_function("subtype_reflexive_collection", |b| {
        b.iter(|| is_subtype(black_box(&list), black_box(&list)))
    });
}

fn bench_cache_keys(c: &mut Criterion) {
    let gen = CacheKeyGenerator::new();
    let inputs: BTreeMap<String, CValue> = [(
        "record".to_string(),
        CValue::product(
            (0..32)
                .map(|i| (format!("f{i}"), CValue::CInt(i)))
                .collect::<Vec<(String, CValue)>>(),
        ),
    )]
    .into_iter()
    .collect();

    c.bench_function("cache_key_32_field_product", |b| {
        b.iter(|| gen.generate(black_box("module"), black_box(&inputs)))
    });

    let list_inputs: BTreeMap<String, CValue> = [(
        "items".to_string(),
        CValue::list((0..256).map(CValue::CInt).collect()),
    )]
    .into_iter()
    .collect();
    c.bench_function("cache_key_256_element_list", |b| {
        b.iter(|| gen.generate(black_box("module"), black_box(&list_inputs)))
    });
}

criterion_group!(benches, bench_subtype, bench_cache_keys);
criterion_main!(benches);
