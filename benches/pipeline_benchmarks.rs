//! End-to-End Pipeline Benchmarks
//!
//! Compile latency and small-pipeline execution throughput.

use constellation::ast::builders::*;
use constellation::cvalue::CValue;
use constellation::runtime::FnModule;
use constellation::types::SemanticType;
use constellation::{Engine, EngineConfig, FunctionSignature};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::collections::BTreeMap;
use std::sync::Arc;

fn engine_with_increment() -> Engine {
    let engine = Engine::with_defaults(EngineConfig::default());
    engine.context().functions.register(FunctionSignature::simple(
        "Inc",
        vec![SemanticType::Int],
        SemanticType::Int,
    ));
    engine
        .context()
        .modules
        .register(Arc::new(FnModule::from_sync("Inc", |inputs| {
            let n = inputs.get("arg0").and_then(CValue::as_int).unwrap_or(0);
            Ok(CValue::CInt(n + 1))
        })));
    engine
}

fn chain_program(length: usize) -> constellation::ast::Program {
    let mut builder = program().input("n", named("Int"));
    let mut previous = "n".to_string();
    for i in 0..length {
        let name = format!("step_{i}");
        builder = builder.assign(&name, call("Inc", [var(&previous)]));
        previous = name;
    }
    builder.output(previous).build()
}

fn bench_compile(c: &mut Criterion) {
    let engine = engine_with_increment();
    let small = chain_program(4);
    let large = chain_program(64);

    c.bench_function("compile_chain_4", |b| {
        b.iter(|| engine.compile(black_box(&small)).expect("compile"))
    });
    c.bench_function("compile_chain_64", |b| {
        b.iter(|| engine.compile(black_box(&large)).expect("compile"))
    });
}

fn bench_execute(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("runtime");
    let engine = engine_with_increment();
    let image = engine.compile(&chain_program(8)).expect("compile");

    c.bench_function("execute_chain_8", |b| {
        b.iter(|| {
            runtime.block_on(async {
                let inputs: BTreeMap<String, CValue> =
                    [("n".to_string(), CValue::CInt(0))].into_iter().collect();
                engine
                    .run_image(black_box(&image), inputs)
                    .await
                    .expect("run")
            })
        })
    });
}

criterion_group!(benches, bench_compile, bench_execute);
criterion_main!(benches);
