//! Example: Overloads and generic instances
//!
//! A `@types` function becomes one overload per signature, and an
//! unannotated function is instantiated once per distinct argument type list.
//!
//! Run with: cargo run --example generic_instances

use numpy_to_native::ir::FunctionOrigin;
use numpy_to_native::{compile_source, CompilerConfig, Language};

const SOURCE: &str = "\
from pyccel.decorators import types

@types('int', 'int')
@types('float', 'float')
def add(a, b):
    return a + b

def twice(x):
    return x * 2

def f(n: int) -> float:
    a = twice(n)
    b = twice(0.5)
    return add(a, n) + add(b, 1.0)
";

fn main() {
    println!("=== Generic Instances Example ===\n");

    let config = CompilerConfig {
        languages: vec![Language::C, Language::Fortran],
        ..CompilerConfig::default()
    };
    let output = compile_source(SOURCE, "generic.py", "generic", &config).unwrap();
    let unit = output.unit("generic").unwrap();

    println!("Functions:");
    for function in &unit.ir.as_ref().unwrap().functions {
        let origin = match &function.origin {
            FunctionOrigin::Instance { .. } => "instance",
            _ => "declared",
        };
        println!("  {:<16} {}", function.emitted_name, origin);
    }
    println!();

    println!("--- generic.c ---");
    println!("{}", unit.output(Language::C).unwrap().file("generic.c").unwrap().contents);
    println!("--- generic.f90 ---");
    println!("{}", unit.output(Language::Fortran).unwrap().file("generic.f90").unwrap().contents);
}
