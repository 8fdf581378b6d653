//! Insert throughput of the transactional dictionary.

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use petek::dict::Dictionary;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::thread;

fn words(count: usize, seed: u64) -> Vec<String> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|_| {
            let len = rng.gen_range(3..12);
            (0..len).map(|_| rng.gen_range(b'a'..=b'z') as char).collect()
        })
        .collect()
}

fn bench_single_thread(c: &mut Criterion) {
    let mut group = c.benchmark_group("dictionary_add");
    let words = words(1_000, 7);
    group.throughput(Throughput::Elements(words.len() as u64));

    group.bench_function("single_thread", |b| {
        b.iter(|| {
            let dict = Dictionary::new();
            for word in &words {
                black_box(dict.add(word));
            }
        });
    });

    group.finish();
}

fn bench_contended(c: &mut Criterion) {
    let mut group = c.benchmark_group("dictionary_add_contended");
    let words = Arc::new(words(1_000, 11));

    for threads in [2usize, 4, 8] {
        group.throughput(Throughput::Elements((words.len() * threads) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(threads), &threads, |b, &n| {
            b.iter(|| {
                let dict = Arc::new(Dictionary::new());
                let handles: Vec<_> = (0..n)
                    .map(|_| {
                        let dict = dict.clone();
                        let words = words.clone();
                        thread::spawn(move || {
                            for word in words.iter() {
                                black_box(dict.add(word));
                            }
                        })
                    })
                    .collect();
                for h in handles {
                    h.join().unwrap();
                }
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_single_thread, bench_contended);
criterion_main!(benches);
