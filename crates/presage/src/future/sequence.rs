// Copyright (c) The Presage Project Authors.
// Licensed under the MIT License.

//! Aggregation over ordered collections of futures.
//!
//! The walk is shared by both entry points: already-completed futures are consumed in a plain
//! loop, and the walk suspends at most once per pending future by re-registering itself as
//! that future's continuation. This keeps the total work linear in the number of futures, with
//! no quadratic callback fan-out.

use crate::failure::Failure;
use crate::future::Future;

impl<T, E> Future<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Failure,
{
    /// Turns a list of futures into a future of the list of their values, in input order.
    ///
    /// The first failure fails the aggregate and the partially collected values are dropped;
    /// outcomes of the remaining futures are ignored. An empty input resolves immediately.
    #[must_use]
    pub fn sequence(futures: Vec<Self>) -> Future<Vec<T>, E> {
        if futures.is_empty() {
            return Future::successful(Vec::new());
        }

        let result = Future::<Vec<T>, E>::create();
        let accumulated = Vec::with_capacity(futures.len());
        iterate_sequence(futures, 0, accumulated, result.clone());
        result
    }

    /// Like [`sequence`][Self::sequence], but never fails: every outcome is recorded, keyed by
    /// input position, into a success map and a failure map.
    ///
    /// The map kinds are chosen by the caller through the result type parameters; anything
    /// that is `Default + Extend<(usize, _)>` works, so ordered, hashed and multi maps are all
    /// accepted.
    #[must_use]
    pub fn sequence_with_failures<S, F>(futures: Vec<Self>) -> Future<(S, F), E>
    where
        S: Default + Extend<(usize, T)> + Send + Sync + 'static,
        F: Default + Extend<(usize, E)> + Send + Sync + 'static,
    {
        let result = Future::<(S, F), E>::create();
        iterate_partition(futures, 0, S::default(), F::default(), result.clone());
        result
    }
}

fn iterate_sequence<T, E>(
    futures: Vec<Future<T, E>>,
    from: usize,
    mut accumulated: Vec<T>,
    output: Future<Vec<T>, E>,
) where
    T: Clone + Send + Sync + 'static,
    E: Failure,
{
    let mut index = from;
    while index < futures.len() {
        let current = &futures[index];
        if !current.is_completed() {
            break;
        }

        if let Some(reason) = current.peek_failure() {
            output.fill_failure(reason.clone());
            return;
        }

        if let Some(value) = current.peek_success() {
            accumulated.push(value.clone());
        }

        index += 1;
    }

    if index == futures.len() {
        output.fill_success(accumulated);
        return;
    }

    let current = futures[index].clone();

    let failed_output = output.clone();
    current.on_failure(move |reason| failed_output.fill_failure(reason.clone()));

    // The walk resumes from the same position: the loop above will observe the now completed
    // future and consume its stored value.
    current.on_success(move |_| iterate_sequence(futures, index, accumulated, output));
}

fn iterate_partition<T, E, S, F>(
    futures: Vec<Future<T, E>>,
    from: usize,
    mut successes: S,
    mut failures: F,
    output: Future<(S, F), E>,
) where
    T: Clone + Send + Sync + 'static,
    E: Failure,
    S: Default + Extend<(usize, T)> + Send + Sync + 'static,
    F: Default + Extend<(usize, E)> + Send + Sync + 'static,
{
    let mut index = from;
    while index < futures.len() {
        let current = &futures[index];
        if !current.is_completed() {
            break;
        }

        if let Some(value) = current.peek_success() {
            successes.extend([(index, value.clone())]);
        }
        if let Some(reason) = current.peek_failure() {
            failures.extend([(index, reason.clone())]);
        }

        index += 1;
    }

    if index == futures.len() {
        output.fill_success((successes, failures));
        return;
    }

    let current = futures[index].clone();
    current.on_complete(move || iterate_partition(futures, index, successes, failures, output));
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, HashMap};

    use crate::future::Promise;

    use super::*;

    #[test]
    fn sequence_preserves_order_and_size() {
        let promises: Vec<Promise<i32>> = (0..100).map(|_| Promise::new()).collect();
        let futures = promises.iter().map(Promise::future).collect();

        let sequenced = Future::sequence(futures);
        assert!(!sequenced.is_completed());

        // Complete out of order: odd indices first, then even ones.
        for (index, promise) in promises.iter().enumerate().filter(|(i, _)| i % 2 == 1) {
            promise.success(2 * index as i32);
        }
        assert!(!sequenced.is_completed());
        for (index, promise) in promises.iter().enumerate().filter(|(i, _)| i % 2 == 0) {
            promise.success(2 * index as i32);
        }

        assert!(sequenced.is_succeeded());
        let values = sequenced.result();
        assert_eq!(values.len(), 100);
        for (index, value) in values.into_iter().enumerate() {
            assert_eq!(value, 2 * index as i32);
        }
    }

    #[test]
    fn sequence_fails_on_first_failure() {
        let promises: Vec<Promise<i32>> = (0..100).map(|_| Promise::new()).collect();
        let futures = promises.iter().map(Promise::future).collect();

        let sequenced = Future::sequence(futures);

        for (index, promise) in promises.iter().enumerate().take(98) {
            promise.success(index as i32);
        }
        promises[98].failure("failed".to_owned());
        promises[99].success(99);

        assert!(sequenced.is_failed());
        assert_eq!(sequenced.failure_reason(), Some("failed".to_owned()));
        assert!(sequenced.result().is_empty());
    }

    #[test]
    fn sequence_of_empty_input_resolves_immediately() {
        let sequenced = Future::<i32>::sequence(Vec::new());

        assert!(sequenced.is_succeeded());
        assert!(sequenced.result().is_empty());
    }

    #[test]
    fn sequence_of_completed_futures_resolves_inline() {
        let futures = (0..5).map(Future::<i32>::successful).collect();

        let sequenced = Future::sequence(futures);
        assert!(sequenced.is_succeeded());
        assert_eq!(sequenced.result(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn sequence_with_failures_partitions_by_index() {
        let promises: Vec<Promise<i32>> = (0..6).map(|_| Promise::new()).collect();
        let futures = promises.iter().map(Promise::future).collect();

        let partitioned = Future::sequence_with_failures::<
            BTreeMap<usize, i32>,
            BTreeMap<usize, String>,
        >(futures);

        for (index, promise) in promises.iter().enumerate() {
            if index % 2 == 0 {
                promise.success(index as i32 * 10);
            } else {
                promise.failure(format!("failure {index}"));
            }
        }

        assert!(partitioned.is_succeeded());
        let (successes, failures) = partitioned.result();
        assert_eq!(
            successes,
            BTreeMap::from([(0, 0), (2, 20), (4, 40)])
        );
        assert_eq!(
            failures,
            BTreeMap::from([
                (1, "failure 1".to_owned()),
                (3, "failure 3".to_owned()),
                (5, "failure 5".to_owned()),
            ])
        );
    }

    #[test]
    fn sequence_with_failures_honors_the_requested_map_kind() {
        let futures = vec![
            Future::<i32>::successful(1),
            Future::<i32>::failed("broken".to_owned()),
        ];

        let partitioned = Future::sequence_with_failures::<
            HashMap<usize, i32>,
            HashMap<usize, String>,
        >(futures);

        let (successes, failures) = partitioned.result();
        assert_eq!(successes, HashMap::from([(0, 1)]));
        assert_eq!(failures, HashMap::from([(1, "broken".to_owned())]));
    }

    #[test]
    fn sequence_with_failures_never_fails() {
        let futures = vec![
            Future::<i32>::failed("a".to_owned()),
            Future::<i32>::failed("b".to_owned()),
        ];

        let partitioned = Future::sequence_with_failures::<
            BTreeMap<usize, i32>,
            BTreeMap<usize, String>,
        >(futures);

        assert!(partitioned.is_succeeded());
        let (successes, failures) = partitioned.result();
        assert!(successes.is_empty());
        assert_eq!(failures.len(), 2);
    }
}
