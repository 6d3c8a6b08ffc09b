//! Order book benchmarks.
//!
//! Run with: cargo bench -p atlas-book

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use atlas_book::{OrderBook, Price, Side, Size};

fn empty_book() -> OrderBook {
    OrderBook::new(Price(100_000), Price(1))
}

/// Insert into an empty book (no crossing possible).
fn bench_insert_empty(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert_empty");
    group.throughput(Throughput::Elements(1));

    group.bench_function("resting_bid", |b| {
        let mut book = empty_book();
        b.iter(|| black_box(book.add_order(Price(50_000), Size(100), Side::Bid)))
    });

    group.finish();
}

/// Insert a non-crossing order into a book with existing depth.
fn bench_insert_deep_book(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert_deep_book");
    group.throughput(Throughput::Elements(1));

    for depth in [100u64, 1_000, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, &depth| {
            let mut book = empty_book();
            for i in 0..depth {
                book.add_order(Price(50_001 + i % 100), Size(100), Side::Offer)
                    .unwrap();
            }

            b.iter(|| black_box(book.add_order(Price(49_000), Size(100), Side::Bid)))
        });
    }

    group.finish();
}

/// Cross a single resting order completely.
fn bench_match_single(c: &mut Criterion) {
    let mut group = c.benchmark_group("match_single");
    group.throughput(Throughput::Elements(1));

    group.bench_function("full_fill", |b| {
        b.iter_batched(
            || {
                let mut book = empty_book();
                book.add_order(Price(50_000), Size(100), Side::Offer).unwrap();
                book
            },
            |mut book| black_box(book.add_order(Price(50_000), Size(100), Side::Bid)),
            criterion::BatchSize::SmallInput,
        )
    });

    group.finish();
}

/// Sweep several resting orders at one level.
fn bench_match_multiple(c: &mut Criterion) {
    let mut group = c.benchmark_group("match_multiple");
    group.throughput(Throughput::Elements(1));

    for count in [1u64, 5, 10] {
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.iter_batched(
                || {
                    let mut book = empty_book();
                    for _ in 0..count {
                        book.add_order(Price(50_000), Size(10), Side::Offer).unwrap();
                    }
                    book
                },
                |mut book| black_box(book.add_order(Price(50_000), Size(10 * count), Side::Bid)),
                criterion::BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

/// Cancel out of a populated level.
fn bench_cancel(c: &mut Criterion) {
    let mut group = c.benchmark_group("cancel");
    group.throughput(Throughput::Elements(1));

    group.bench_function("front_of_level", |b| {
        b.iter_batched(
            || {
                let mut book = empty_book();
                let id = book
                    .add_order(Price(50_000), Size(100), Side::Bid)
                    .unwrap()
                    .order_id();
                for _ in 0..31 {
                    book.add_order(Price(50_000), Size(100), Side::Bid).unwrap();
                }
                (book, id)
            },
            |(mut book, id)| black_box(book.cancel(id)),
            criterion::BatchSize::SmallInput,
        )
    });

    group.finish();
}

/// Mixed two-sided flow across ten price levels.
fn bench_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("throughput");
    group.throughput(Throughput::Elements(10_000));

    group.bench_function("mixed_workload", |b| {
        b.iter_batched(
            empty_book,
            |mut book| {
                for i in 0..10_000u64 {
                    let side = if i % 2 == 0 { Side::Bid } else { Side::Offer };
                    let price = 50_000 + i % 10;
                    black_box(book.add_order(Price(price), Size(100), side)).ok();
                }
            },
            criterion::BatchSize::SmallInput,
        )
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_insert_empty,
    bench_insert_deep_book,
    bench_match_single,
    bench_match_multiple,
    bench_cancel,
    bench_throughput,
);

criterion_main!(benches);
