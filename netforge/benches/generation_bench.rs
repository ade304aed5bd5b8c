use criterion::{black_box, criterion_group, criterion_main, Criterion};
use netforge::prelude::*;
use netforge::serialize::serialize_design;
use netforge::{resolve, Registries};
use std::collections::BTreeMap;

fn full_grid() -> GeneratorConfig {
    let mut config = GeneratorConfig::default();
    config.project.name = "bench".to_string();
    config
}

fn stamp() -> Provenance {
    Provenance::fixed("0.1.0", "bench", "2026-01-01T00:00:00Z")
}

fn bench_check(c: &mut Criterion) {
    let config = full_grid();
    let registries = Registries::build(&config, &stamp()).unwrap();

    c.bench_function("check_touch_grid_8x8", |b| {
        b.iter(|| NetforgeCore::check(black_box(&config), black_box(&registries), None))
    });
}

fn bench_resolve(c: &mut Criterion) {
    let config = full_grid();
    let registries = Registries::build(&config, &stamp()).unwrap();
    let design = registries
        .generators
        .require("touch_grid")
        .unwrap()
        .generate(&config)
        .unwrap();

    c.bench_function("resolve_touch_grid_8x8", |b| {
        b.iter(|| resolve(black_box(&design), &BTreeMap::new()))
    });
}

fn bench_serialize(c: &mut Criterion) {
    let config = full_grid();
    let registries = Registries::build(&config, &stamp()).unwrap();
    let report = NetforgeCore::check(&config, &registries, None).unwrap();
    let stamp = stamp();

    c.bench_function("serialize_touch_grid_8x8", |b| {
        b.iter(|| serialize_design(black_box(&report.design), &report.connectivity, &stamp))
    });
}

criterion_group!(benches, bench_check, bench_resolve, bench_serialize);
criterion_main!(benches);
