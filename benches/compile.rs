//! Compile-throughput bench: parse, optimize, and emit the hello-world
//! sentinel, each phase measured separately.

use bfjit::compiler::{compile, CompileOptions};
use bfjit::{opt, parse};
use divan::{black_box, Bencher};

fn main() {
    divan::main();
}

const HELLO_WORLD: &str = "++++++++[>++++[>++>+++>+++>+<<<<-]>+>+>->>+[<]<-]>>.>---.+++++++..+++.>>.<-.<.+++.------.--------.>>+.>++.";

#[divan::bench]
fn parse_hello(bencher: Bencher) {
    bencher.bench(|| parse::parse(black_box(HELLO_WORLD.as_bytes())).unwrap());
}

#[divan::bench]
fn optimize_hello(bencher: Bencher) {
    bencher
        .with_inputs(|| parse::parse(HELLO_WORLD.as_bytes()).unwrap())
        .bench_values(|mut nodes| {
            opt::optimize(&mut nodes);
            nodes
        });
}

#[divan::bench]
fn compile_hello(bencher: Bencher) {
    let mut nodes = parse::parse(HELLO_WORLD.as_bytes()).unwrap();
    opt::optimize(&mut nodes);
    bencher.bench(|| compile(black_box(&nodes), &CompileOptions::default()).unwrap());
}
