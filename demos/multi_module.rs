//! Example: A program of two modules
//!
//! `app` imports `geometry`; the driver analyzes `geometry` first, exposes
//! its interface to `app`, and writes both units to a scratch directory.
//!
//! Run with: cargo run --example multi_module

use numpy_to_native::diagnostics::render;
use numpy_to_native::{compile_program, parse_source, CompilerConfig, Language};

const GEOMETRY: &str = "\
import numpy as np

def norm(x: 'float64[:]') -> float:
    return np.sqrt(np.sum(x * x))
";

const APP: &str = "\
import numpy as np
from geometry import norm

if __name__ == '__main__':
    v = np.ones(3)
    print('norm', norm(v))
";

fn main() {
    println!("=== Multi-Module Example ===\n");

    let modules = vec![
        parse_source(APP, "app.py", "app").unwrap(),
        parse_source(GEOMETRY, "geometry.py", "geometry").unwrap(),
    ];
    let config = CompilerConfig {
        languages: vec![Language::C, Language::Fortran],
        ..CompilerConfig::default()
    };
    let output = compile_program(&modules, &config).unwrap();
    for diagnostic in output.diagnostics.iter() {
        print!("{}", render(diagnostic, None));
    }

    let dir = tempfile::tempdir().unwrap();
    let written = output.write(dir.path()).unwrap();
    println!("Wrote {} files:", written.len());
    for path in &written {
        println!("  {}", path.strip_prefix(dir.path()).unwrap().display());
    }
    println!();

    let app = output.unit("app").unwrap();
    println!("--- prog_app.c ---");
    println!("{}", app.output(Language::C).unwrap().file("prog_app.c").unwrap().contents);
    println!("--- prog_app.f90 ---");
    println!("{}", app.output(Language::Fortran).unwrap().file("prog_app.f90").unwrap().contents);
}
