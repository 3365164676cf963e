// Copyright (c) The Presage Project Authors.
// Licensed under the MIT License.

//! Dispatcher throughput benches: a flat avalanche of empty tasks and a self-reposting chain.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use criterion::{Criterion, criterion_group, criterion_main};

use presage::tasks::{self, TasksDispatcher};
use presage::{Future, Promise};

const AVALANCHE_SIZE: usize = 10_000;
const REPOST_DEPTH: usize = 1_000;

fn empty_avalanche(c: &mut Criterion) {
    TasksDispatcher::instance().pre_heat_pool(1.0);

    c.bench_function("empty_avalanche_10k", |b| {
        b.iter(|| {
            let done = Arc::new(AtomicUsize::new(0));
            let all_done = Promise::<bool>::new();

            for _ in 0..AVALANCHE_SIZE {
                let done = Arc::clone(&done);
                let all_done = all_done.clone();
                tasks::run_and_forget(move || {
                    if done.fetch_add(1, Ordering::Relaxed) + 1 == AVALANCHE_SIZE {
                        all_done.success(true);
                    }
                });
            }

            assert!(all_done.future().wait(None));
        });
    });
}

fn empty_repost(c: &mut Criterion) {
    TasksDispatcher::instance().pre_heat_pool(1.0);

    c.bench_function("empty_repost_1k", |b| {
        b.iter(|| {
            fn repost(step: usize, finished: Promise<bool, String>) {
                if step >= REPOST_DEPTH {
                    finished.success(true);
                    return;
                }
                tasks::run_and_forget(move || repost(step + 1, finished));
            }

            let finished = Promise::new();
            let observed: Future<bool, String> = finished.future();
            repost(0, finished);

            assert!(observed.wait(None));
        });
    });
}

criterion_group!(benches, empty_avalanche, empty_repost);
criterion_main!(benches);
