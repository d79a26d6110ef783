use criterion::*;
use esengine_runtime::prelude::*;
use serde_json::{json, Value};
use std::hint::black_box;

const ENTITIES: usize = 10_000;

fn populate() -> (World, ComponentDef, ComponentDef) {
    let world = World::new();
    let position = ComponentDef::script("Position", json!({ "x": 0.0, "y": 0.0 })).unwrap();
    let velocity = ComponentDef::script("Velocity", json!({ "x": 1.0, "y": 0.0 })).unwrap();

    for i in 0..ENTITIES {
        let e = world.spawn().unwrap();
        world.insert(e, &position, Value::Null).unwrap();
        if i % 2 == 0 {
            world.insert(e, &velocity, Value::Null).unwrap();
        }
    }
    (world, position, velocity)
}

fn query_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("query");

    group.bench_function("cached_lookup_10k", |b| {
        let (world, position, velocity) = populate();
        let required = [position, velocity];
        b.iter(|| black_box(world.get_entities_with_components(&required, &[], &[])));
    });

    group.bench_function("recompute_after_insert_10k", |b| {
        let (world, position, velocity) = populate();
        let required = [position.clone(), velocity];
        let first = world.entities()[0];
        b.iter(|| {
            world.insert(first, &position, Value::Null).unwrap();
            black_box(world.get_entities_with_components(&required, &[], &[]))
        });
    });

    group.bench_function("write_back_5k", |b| {
        b.iter_batched(
            populate,
            |(world, position, velocity)| {
                let query = world.query(QueryDescriptor::new().write(&position).read(&velocity));
                query.for_each(|mut row| {
                    let dx = row[1]["x"].as_f64().unwrap_or(0.0);
                    if let Some(pos) = row.get_mut(0) {
                        let x = pos["x"].as_f64().unwrap_or(0.0);
                        pos["x"] = json!(x + dx);
                    }
                });
                black_box(world);
            },
            BatchSize::LargeInput,
        );
    });

    group.finish();
}

criterion_group!(benches, query_benchmark);
criterion_main!(benches);
