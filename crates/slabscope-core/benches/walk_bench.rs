//! Partial-list walk benchmarks.
//!
//! Measures the cost of a bounded walk over synthetic circular lists of
//! increasing length, and of the singleton active-page decode.

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use slabscope_core::{BoundedListWalker, CounterLayout, KernelVersion, MemorySnapshot};

const HEAD: u64 = 0x1000;
const LINK: u64 = 8;
const COUNTERS: u64 = 40;
const MAX: u64 = u64::MAX;

fn circular_list(pages: u64) -> MemorySnapshot {
    let mut snap = MemorySnapshot::new(KernelVersion::new(5, 15, 0));
    let page = |i: u64| 0x10_0000 + i * 64;
    snap.write_word(HEAD, if pages == 0 { HEAD } else { page(0) + LINK });
    for i in 0..pages {
        let next = if i + 1 == pages { HEAD } else { page(i + 1) + LINK };
        snap.write_word(page(i) + LINK, next)
            .write_word(page(i) + COUNTERS, (32 << 16) | (i % 32));
    }
    snap
}

fn bench_walk(c: &mut Criterion) {
    let mut group = c.benchmark_group("partial_walk");
    for pages in [16u64, 256, 4096] {
        let snap = circular_list(pages);
        let walker = BoundedListWalker::new(&snap, COUNTERS, CounterLayout::Unified);
        group.bench_with_input(BenchmarkId::from_parameter(pages), &pages, |b, _| {
            b.iter(|| {
                criterion::black_box(walker.walk(HEAD, LINK, MAX));
            });
        });
    }
    group.finish();
}

fn bench_singleton(c: &mut Criterion) {
    let mut snap = MemorySnapshot::new(KernelVersion::new(6, 1, 0));
    snap.write_word(0x500, 0x9000)
        .write_word(0x9000 + COUNTERS, (10 << 16) | 3);
    let walker = BoundedListWalker::new(&snap, COUNTERS, CounterLayout::Unified);
    c.bench_function("active_page_decode", |b| {
        b.iter(|| {
            criterion::black_box(walker.walk_single(0x500, MAX));
        });
    });
}

criterion_group!(benches, bench_walk, bench_singleton);
criterion_main!(benches);
