// Copyright (c) The Presage Project Authors.
// Licensed under the MIT License.

//! Zip combinators: compose heterogeneous futures into a future of a flat tuple.
//!
//! Stable Rust cannot dispatch on "is this value already a tuple", so the variadic flattening
//! zip of the contract is rendered as a fixed-arity family, the same shape the async ecosystem
//! uses for its `join3`/`join4` helpers: each arity produces a flat tuple rather than nested
//! pairs. All operands share one failure type; convert with
//! [`map_failure`][crate::Future::map_failure] first when they differ.

use crate::failure::Failure;
use crate::future::Future;

impl<A, E> Future<A, E>
where
    A: Clone + Send + Sync + 'static,
    E: Failure,
{
    /// Combines two futures into a future of a pair, completing when both succeed.
    ///
    /// The first failure observed wins and is delivered as soon as the chain can see it;
    /// the other operand's eventual value is dropped.
    pub fn zip<B>(&self, other: &Future<B, E>) -> Future<(A, B), E>
    where
        B: Clone + Send + Sync + 'static,
    {
        let other = other.clone();
        self.flat_map(move |a| {
            let a = a.clone();
            other.map(move |b| (a, b.clone()))
        })
    }

    /// Combines three futures into a future of a flat triple.
    pub fn zip3<B, C>(&self, second: &Future<B, E>, third: &Future<C, E>) -> Future<(A, B, C), E>
    where
        B: Clone + Send + Sync + 'static,
        C: Clone + Send + Sync + 'static,
    {
        self.zip(second)
            .zip(third)
            .map(|((a, b), c)| (a.clone(), b.clone(), c.clone()))
    }

    /// Combines four futures into a future of a flat quadruple.
    pub fn zip4<B, C, D>(
        &self,
        second: &Future<B, E>,
        third: &Future<C, E>,
        fourth: &Future<D, E>,
    ) -> Future<(A, B, C, D), E>
    where
        B: Clone + Send + Sync + 'static,
        C: Clone + Send + Sync + 'static,
        D: Clone + Send + Sync + 'static,
    {
        self.zip3(second, third)
            .zip(fourth)
            .map(|((a, b, c), d)| (a.clone(), b.clone(), c.clone(), d.clone()))
    }

    /// Pairs the future's value with an immediately available one.
    pub fn zip_value<V>(&self, value: V) -> Future<(A, V), E>
    where
        V: Clone + Send + Sync + 'static,
    {
        self.zip(&Future::successful(value))
    }
}
