//! Example: AXPY in C and Fortran
//!
//! Compiles `a * x + y` over 1-D float arrays for both backends and prints
//! the generated sources and the C build manifest.
//!
//! Run with: cargo run --example axpy

use numpy_to_native::{compile_source, CompilerConfig, Language};

const SOURCE: &str = "\
def axpy(a: float, x: 'float64[:]', y: 'float64[:]') -> 'float64[:]':
    return a * x + y

def total(x: 'float64[:]') -> float:
    s = 0.0
    #$ parallel-loop reduction(+:s)
    for i in range(len(x)):
        s += x[i]
    return s
";

fn main() {
    println!("=== AXPY Example ===\n");

    let config = CompilerConfig {
        languages: vec![Language::C, Language::Fortran],
        ..CompilerConfig::default()
    };
    let output = compile_source(SOURCE, "blas.py", "blas", &config).unwrap();
    println!("Errors: {}, warnings: {}\n", output.diagnostics.error_count(), output.diagnostics.warning_count());

    let unit = output.unit("blas").unwrap();

    let c = unit.output(Language::C).unwrap();
    println!("--- blas.h ---");
    println!("{}", c.file("blas.h").unwrap().contents);
    println!("--- blas.c ---");
    println!("{}", c.file("blas.c").unwrap().contents);

    let fortran = unit.output(Language::Fortran).unwrap();
    println!("--- blas.f90 ---");
    println!("{}", fortran.file("blas.f90").unwrap().contents);

    println!("--- {} ---", c.manifest.file_name());
    println!("{}", c.manifest.to_json().unwrap());
}
