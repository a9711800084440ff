//! NumPy to Native Compiler
//!
//! This library compiles a statically typed subset of Python with NumPy
//! arrays into C and Fortran source files. A module goes through the
//! reference front-end (or arrives as a JSON syntax tree from an external
//! parser), is type-checked and instantiated by the analyzer, and is then
//! rendered by one backend per target language.
//!
//! # Example
//!
//! ```rust
//! use numpy_to_native::{compile_source, CompilerConfig, Language};
//!
//! let source = "def axpy(a: float, x: 'float64[:]', y: 'float64[:]') -> 'float64[:]':\n    return a * x + y\n";
//! let config = CompilerConfig::default();
//! let output = compile_source(source, "blas.py", "blas", &config).unwrap();
//! assert_eq!(output.exit_status(), 0);
//!
//! let unit = output.unit("blas").unwrap();
//! let c = unit.output(Language::C).unwrap();
//! assert!(c.file("blas.c").unwrap().contents.contains("nv_ndarray axpy("));
//! ```

pub mod analyzer;
pub mod ast;
pub mod builtins;
pub mod codegen;
pub mod config;
pub mod diagnostics;
pub mod directives;
pub mod driver;
pub mod error;
pub mod instantiate;
pub mod interface;
pub mod ir;
pub mod lexer;
pub mod parser;
pub mod promotion;
pub mod resolver;
pub mod symbols;
pub mod types;

pub use analyzer::{AnalysisOutput, Analyzer};
pub use codegen::{Backend, BackendOutput, CBackend, FileRole, FortranBackend, GeneratedFile, Manifest};
pub use config::{CompilerConfig, Language};
pub use diagnostics::{Diagnostic, DiagnosticCode, Diagnostics, Severity};
pub use driver::{compile_module, compile_program, compile_source, module_name, CompileOutput, UnitOutput};
pub use error::{CompileError, CompileResult};
pub use ir::TypedModule;
pub use parser::{parse_source, Parser};
pub use promotion::PromotionPolicy;
pub use types::{ArrayType, Dim, Order, ScalarKind, ScalarType, Type};

/// Compile the raw syntax tree of one module given as JSON
pub fn compile_tree_json(json: &str, config: &CompilerConfig) -> CompileResult<CompileOutput> {
    let module: ast::Module = serde_json::from_str(json)?;
    compile_module(&module, config)
}
