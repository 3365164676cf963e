// Copyright (c) The Presage Project Authors.
// Licensed under the MIT License.

//! The smallest possible use of the dispatcher: run one computation, wait for its result.

use presage::tasks;

fn main() {
    let answer = tasks::run::<_, String, _>(|| {
        // Pretend this is expensive.
        (1..=10).product::<u64>()
    });

    println!("10! = {}", answer.result());
}
