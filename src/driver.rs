//! Whole-program driver
//!
//! Orders the modules of a program by their imports, analyzes each level of
//! the import graph in parallel (a module only starts once every module it
//! imports is done), then hands every clean unit to the backends.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rayon::prelude::*;
use tracing::{debug, instrument, warn};

use crate::analyzer::{AnalysisOutput, Analyzer};
use crate::ast::{self, StmtKind};
use crate::codegen::{self, BackendOutput};
use crate::config::CompilerConfig;
use crate::diagnostics::Diagnostics;
use crate::error::{CompileError, CompileResult};
use crate::interface::InterfaceMap;
use crate::ir::TypedModule;
use crate::parser::parse_source;

/// Everything produced for one source module
#[derive(Debug)]
pub struct UnitOutput {
    pub module: String,
    pub file: String,
    /// The semantic tree; `None` when analysis reported errors
    pub ir: Option<TypedModule>,
    /// One entry per configured language, empty when codegen was skipped
    pub outputs: Vec<BackendOutput>,
    /// Analysis and backend diagnostics of this unit
    pub diagnostics: Diagnostics,
    /// An imported module failed, so this unit was not generated
    pub blocked: bool,
}

impl UnitOutput {
    pub fn has_errors(&self) -> bool {
        self.diagnostics.has_errors()
    }

    /// Whether the files of this unit may be written
    pub fn is_clean(&self) -> bool {
        !self.blocked && !self.has_errors() && !self.outputs.is_empty()
    }

    pub fn output(&self, language: crate::config::Language) -> Option<&BackendOutput> {
        self.outputs.iter().find(|o| o.language == language)
    }
}

/// Result of compiling a program
#[derive(Debug)]
pub struct CompileOutput {
    /// Units in input order
    pub units: Vec<UnitOutput>,
    /// All diagnostics, unit by unit in input order
    pub diagnostics: Diagnostics,
}

impl CompileOutput {
    pub fn unit(&self, module: &str) -> Option<&UnitOutput> {
        self.units.iter().find(|u| u.module == module)
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics.has_errors()
    }

    /// Process exit status: non-zero iff any error was reported
    pub fn exit_status(&self) -> i32 {
        i32::from(self.has_errors())
    }

    /// Write the files of every clean unit below `out_dir`
    pub fn write(&self, out_dir: &Path) -> CompileResult<Vec<PathBuf>> {
        let mut written = Vec::new();
        for unit in self.units.iter().filter(|u| u.is_clean()) {
            for output in &unit.outputs {
                written.extend(codegen::write_output(output, out_dir)?);
            }
        }
        Ok(written)
    }
}

/// Module name of a source path: its file stem
pub fn module_name(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

/// Parse and compile a single source file
pub fn compile_source(
    source: &str,
    file: &str,
    name: &str,
    config: &CompilerConfig,
) -> CompileResult<CompileOutput> {
    let module = parse_source(source, file, name)?;
    compile_module(&module, config)
}

/// Compile a single raw syntax tree
pub fn compile_module(module: &ast::Module, config: &CompilerConfig) -> CompileResult<CompileOutput> {
    compile_program(std::slice::from_ref(module), config)
}

/// Compile several modules as one program
#[instrument(skip_all, fields(modules = modules.len()))]
pub fn compile_program(modules: &[ast::Module], config: &CompilerConfig) -> CompileResult<CompileOutput> {
    config.validate()?;
    let graph = ImportGraph::build(modules)?;
    let levels = graph.levels()?;
    debug!(levels = levels.len(), "import graph ordered");

    let mut interfaces: InterfaceMap = HashMap::new();
    let mut analyses: Vec<Option<AnalysisOutput>> = modules.iter().map(|_| None).collect();
    for level in &levels {
        let results: Vec<CompileResult<AnalysisOutput>> = level
            .par_iter()
            .map(|&index| Analyzer::new(config, &interfaces).analyze(&modules[index]))
            .collect();
        for (&index, result) in level.iter().zip(results) {
            let mut analysis = result?;
            let interface = std::mem::take(&mut analysis.interface);
            interfaces.insert(modules[index].name.clone(), Arc::new(interface));
            analyses[index] = Some(analysis);
        }
    }

    let failed: BTreeSet<usize> = analyses
        .iter()
        .enumerate()
        .filter(|(_, a)| a.as_ref().map_or(true, |a| a.module.is_none()))
        .map(|(i, _)| i)
        .collect();

    let units: Vec<UnitOutput> = analyses
        .into_par_iter()
        .enumerate()
        .map(|(index, analysis)| {
            let source = &modules[index];
            let (ir, mut diagnostics) = match analysis {
                Some(a) => (a.module, a.diagnostics),
                None => (None, Diagnostics::new()),
            };
            let broken_import = graph.reaches(index, &failed);
            if let Some(dep) = &broken_import {
                warn!(unit = %source.name, import = %dep, "skipping code generation: import has errors");
            }
            let mut outputs = Vec::new();
            if let (Some(module), None) = (&ir, &broken_import) {
                outputs = codegen::generate_all(module, config);
                for output in &outputs {
                    diagnostics.merge(output.diagnostics.clone());
                }
            }
            UnitOutput {
                module: source.name.clone(),
                file: source.file.clone(),
                ir,
                outputs,
                diagnostics,
                blocked: broken_import.is_some(),
            }
        })
        .collect();

    let mut diagnostics = Diagnostics::new();
    for unit in &units {
        diagnostics.merge(unit.diagnostics.clone());
    }
    debug!(
        units = units.len(),
        errors = diagnostics.error_count(),
        warnings = diagnostics.warning_count(),
        "compilation finished"
    );
    Ok(CompileOutput { units, diagnostics })
}

/// Whether an import names a library rather than a module of the program
fn is_library(module: &str) -> bool {
    matches!(module, "numpy" | "math" | "dataclasses")
        || module == "decorators"
        || module.ends_with(".decorators")
}

/// Imports between the modules of one program
#[derive(Debug)]
struct ImportGraph {
    names: Vec<String>,
    /// `edges[i]`: indices of the modules `i` imports, sorted
    edges: Vec<Vec<usize>>,
}

impl ImportGraph {
    fn build(modules: &[ast::Module]) -> CompileResult<Self> {
        let mut index = HashMap::new();
        for (i, module) in modules.iter().enumerate() {
            if index.insert(module.name.as_str(), i).is_some() {
                return Err(CompileError::DuplicateModule {
                    name: module.name.clone(),
                });
            }
        }
        let edges = modules
            .iter()
            .map(|module| {
                let mut deps = BTreeSet::new();
                for stmt in imports_of(&module.body) {
                    let imported = match &stmt.kind {
                        StmtKind::Import { module, .. } | StmtKind::FromImport { module, .. } => module,
                        _ => continue,
                    };
                    if is_library(imported) {
                        continue;
                    }
                    // Unknown modules are reported by the analyzer
                    if let Some(&dep) = index.get(imported.as_str()) {
                        deps.insert(dep);
                    }
                }
                deps.into_iter().collect()
            })
            .collect();
        Ok(Self {
            names: modules.iter().map(|m| m.name.clone()).collect(),
            edges,
        })
    }

    /// Modules grouped so that every import of a level lies in an earlier one
    fn levels(&self) -> CompileResult<Vec<Vec<usize>>> {
        if let Some(cycle) = self.find_cycle() {
            return Err(CompileError::ImportCycle {
                modules: cycle.into_iter().map(|i| self.names[i].clone()).collect(),
            });
        }
        let mut depth: Vec<Option<usize>> = vec![None; self.names.len()];
        for i in 0..self.names.len() {
            self.depth_of(i, &mut depth);
        }
        let mut levels: Vec<Vec<usize>> = Vec::new();
        for (i, d) in depth.iter().enumerate() {
            let d = d.unwrap_or(0);
            if levels.len() <= d {
                levels.resize_with(d + 1, Vec::new);
            }
            levels[d].push(i);
        }
        Ok(levels)
    }

    fn depth_of(&self, i: usize, depth: &mut Vec<Option<usize>>) -> usize {
        if let Some(d) = depth[i] {
            return d;
        }
        let d = self.edges[i]
            .iter()
            .map(|&dep| self.depth_of(dep, depth) + 1)
            .max()
            .unwrap_or(0);
        depth[i] = Some(d);
        d
    }

    /// First cycle found, as a path that starts and ends on the same module
    fn find_cycle(&self) -> Option<Vec<usize>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            New,
            Active,
            Done,
        }
        fn visit(graph: &ImportGraph, i: usize, marks: &mut [Mark], stack: &mut Vec<usize>) -> Option<Vec<usize>> {
            marks[i] = Mark::Active;
            stack.push(i);
            for &dep in &graph.edges[i] {
                match marks[dep] {
                    Mark::Active => {
                        let start = stack.iter().position(|&m| m == dep).unwrap_or(0);
                        let mut cycle = stack[start..].to_vec();
                        cycle.push(dep);
                        return Some(cycle);
                    }
                    Mark::New => {
                        if let Some(cycle) = visit(graph, dep, marks, stack) {
                            return Some(cycle);
                        }
                    }
                    Mark::Done => {}
                }
            }
            stack.pop();
            marks[i] = Mark::Done;
            None
        }

        let mut marks = vec![Mark::New; self.names.len()];
        let mut stack = Vec::new();
        (0..self.names.len()).find_map(|i| {
            if marks[i] == Mark::New {
                visit(self, i, &mut marks, &mut stack)
            } else {
                None
            }
        })
    }

    /// Name of a module in `failed` that `i` imports, directly or not
    fn reaches(&self, i: usize, failed: &BTreeSet<usize>) -> Option<String> {
        let mut seen = BTreeSet::new();
        let mut todo: Vec<usize> = self.edges[i].clone();
        while let Some(next) = todo.pop() {
            if !seen.insert(next) {
                continue;
            }
            if failed.contains(&next) {
                return Some(self.names[next].clone());
            }
            todo.extend(self.edges[next].iter().copied());
        }
        None
    }
}

/// Top-level import statements, including those under a main guard
fn imports_of(body: &[ast::Stmt]) -> Vec<&ast::Stmt> {
    let mut out = Vec::new();
    for stmt in body {
        match &stmt.kind {
            StmtKind::Import { .. } | StmtKind::FromImport { .. } => out.push(stmt),
            StmtKind::If { branches, .. } => {
                for branch in branches {
                    out.extend(imports_of(&branch.body));
                }
            }
            _ => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::DiagnosticCode;

    fn module(name: &str, source: &str) -> ast::Module {
        parse_source(source, &format!("{}.py", name), name).unwrap()
    }

    #[test]
    fn test_levels_follow_imports() {
        let modules = vec![
            module("app", "from geometry import norm\nx = norm(1.0)\n"),
            module("geometry", "from base import sq\ndef norm(x: float) -> float:\n    return sq(x)\n"),
            module("base", "def sq(x: float) -> float:\n    return x * x\n"),
        ];
        let graph = ImportGraph::build(&modules).unwrap();
        assert_eq!(graph.levels().unwrap(), vec![vec![2], vec![1], vec![0]]);
    }

    #[test]
    fn test_import_cycle_is_fatal() {
        let modules = vec![
            module("a", "from b import g\ndef f(x: int) -> int:\n    return x\n"),
            module("b", "from a import f\ndef g(x: int) -> int:\n    return x\n"),
        ];
        let err = compile_program(&modules, &CompilerConfig::default()).unwrap_err();
        match err {
            CompileError::ImportCycle { modules } => assert_eq!(modules, vec!["a", "b", "a"]),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_module_is_fatal() {
        let modules = vec![module("a", "x = 1\n"), module("a", "y = 2\n")];
        let err = compile_program(&modules, &CompilerConfig::default()).unwrap_err();
        assert!(matches!(err, CompileError::DuplicateModule { .. }));
    }

    #[test]
    fn test_library_imports_are_not_edges() {
        let modules = vec![module(
            "m",
            "import numpy as np\nfrom pyccel.decorators import types\nimport math\n",
        )];
        let graph = ImportGraph::build(&modules).unwrap();
        assert!(graph.edges[0].is_empty());
    }

    #[test]
    fn test_importer_of_broken_module_is_blocked() {
        let modules = vec![
            module("geometry", "def norm(x: float) -> float:\n    return y\n"),
            module("app", "from geometry import norm\nz = norm(2.0)\n"),
        ];
        let output = compile_program(&modules, &CompilerConfig::default()).unwrap();
        assert_eq!(output.exit_status(), 1);
        let geometry = output.unit("geometry").unwrap();
        assert!(geometry.ir.is_none());
        assert!(geometry
            .diagnostics
            .iter()
            .any(|d| d.code == DiagnosticCode::UndeclaredSymbol));
        let app = output.unit("app").unwrap();
        assert!(app.blocked);
        assert!(app.outputs.is_empty());
        assert!(!app.is_clean());
    }

    #[test]
    fn test_clean_program_exits_zero() {
        let output = compile_source(
            "def add(a: int, b: int) -> int:\n    return a + b\n",
            "add.py",
            "add",
            &CompilerConfig::default(),
        )
        .unwrap();
        assert_eq!(output.exit_status(), 0);
        let unit = output.unit("add").unwrap();
        assert!(unit.is_clean());
        assert_eq!(unit.outputs.len(), 1);
    }

    #[test]
    fn test_module_name_is_file_stem() {
        assert_eq!(module_name(Path::new("src/geometry.py")), "geometry");
    }
}
