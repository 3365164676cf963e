// Copyright (c) The Presage Project Authors.
// Licensed under the MIT License.

//! Builds a combinator chain on top of running tasks: mapping, zipping, recovering and
//! sequencing, all wired up before the results exist.

use presage::{Future, tasks};

fn main() {
    // Two independent computations, zipped into one result.
    let words = tasks::run::<_, String, _>(|| "presage".to_owned());
    let length = words.map(|word| word.len());
    let shouted = words.map(|word| word.to_uppercase());
    let described = shouted
        .zip(&length)
        .map(|(word, length)| format!("{word} has {length} letters"));

    println!("{}", described.result());

    // A failing step, recovered with a fallback value.
    let risky: Future<i32, String> = tasks::run::<_, String, _>(|| {
        presage::with_failure::<i32, String>("the oracle is silent".to_owned())
    })
    .recover_value(-1);

    println!("risky step yielded {}", risky.result());

    // Fan out over a collection and gather the results in input order.
    let squares = tasks::run_sequence::<_, _, String, _>((1..=10).collect(), |x: i64| x * x);
    println!("squares: {:?}", squares.result());
}
