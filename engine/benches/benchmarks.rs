//! Performance benchmarks for armory-engine

use armory_engine::views::{admin_listings, buyer_listings, inventory_totals, profit_totals};
use armory_engine::{
    BackendSnapshot, Document, Item, ItemDraft, LocalMirror, MemoryBackend, MoneyType,
    ProfitRecord, Record, Topic,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

/// `size` rows spread over a few dozen names, with some rows out of stock.
fn inventory(size: usize) -> Vec<Item> {
    (0..size)
        .map(|i| {
            let money_type = if i % 3 == 0 {
                MoneyType::Dirty
            } else {
                MoneyType::Clean
            };
            ItemDraft::new(
                format!("Weapon {}", i % 40),
                1_000.0,
                1_500.0 + (i % 7) as f64,
                (i % 5) as u32,
                money_type,
            )
            .into_item(format!("item_{}", i), i as u64)
        })
        .collect()
}

fn bench_views(c: &mut Criterion) {
    let mut group = c.benchmark_group("views");

    for size in [100, 1000, 5000].iter() {
        let items = inventory(*size);

        group.bench_with_input(BenchmarkId::new("buyer_listings", size), &items, |b, items| {
            b.iter(|| buyer_listings(black_box(items)))
        });

        group.bench_with_input(BenchmarkId::new("admin_listings", size), &items, |b, items| {
            b.iter(|| admin_listings(black_box(items)))
        });

        group.bench_with_input(BenchmarkId::new("inventory_totals", size), &items, |b, items| {
            b.iter(|| inventory_totals(black_box(items)))
        });
    }

    let profits: Vec<ProfitRecord> = (0..10_000)
        .map(|i| {
            let money_type = if i % 2 == 0 {
                MoneyType::Clean
            } else {
                MoneyType::Dirty
            };
            ProfitRecord::new("Pistol", 100.0, 150.0, money_type, i)
        })
        .collect();
    group.bench_function("profit_totals_10000", |b| {
        b.iter(|| profit_totals(black_box(&profits)))
    });

    group.finish();
}

fn bench_mirror(c: &mut Criterion) {
    let mut group = c.benchmark_group("mirror");

    for size in [100, 1000, 5000].iter() {
        let docs: Vec<Document> = inventory(*size)
            .iter()
            .map(|item| Document::new(item.id.clone(), item.to_fields()))
            .collect();

        group.bench_with_input(BenchmarkId::new("decode_and_replace", size), &docs, |b, docs| {
            let mirror = LocalMirror::new();
            b.iter(|| mirror.replace_all(Item::decode_all(black_box(docs))))
        });
    }

    group.bench_function("snapshot", |b| {
        let mirror = LocalMirror::new();
        mirror.replace_all(inventory(1000));
        b.iter(|| mirror.snapshot())
    });

    group.finish();
}

fn bench_snapshot(c: &mut Criterion) {
    let mut group = c.benchmark_group("snapshot");

    for size in [100, 1000].iter() {
        let mut snapshot = BackendSnapshot::new(0);
        for item in inventory(*size) {
            snapshot.add(Topic::Weapons, item.id.clone(), item.to_fields());
        }
        let json = snapshot.to_json().unwrap();

        group.bench_with_input(BenchmarkId::new("export", size), &snapshot, |b, snapshot| {
            b.iter(|| black_box(snapshot).to_json().unwrap())
        });

        group.bench_with_input(BenchmarkId::new("restore", size), &json, |b, json| {
            b.iter(|| {
                let snapshot = BackendSnapshot::from_json(black_box(json)).unwrap();
                MemoryBackend::restore(snapshot).unwrap()
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_views, bench_mirror, bench_snapshot);
criterion_main!(benches);
