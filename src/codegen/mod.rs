//! Code generators
//!
//! Backends read a [`TypedModule`] and render source files for one target
//! language. They never modify the semantic tree, so several backends run on
//! the same unit in parallel. A declaration the backend cannot express is
//! reported and skipped; its siblings are still rendered, but a unit with any
//! error diagnostic is never written.

pub mod c;
mod c_runtime;
mod emit;
pub mod fortran;
pub mod lower;
pub mod writer;

use std::io::Write as _;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::config::{CompilerConfig, Language};
use crate::diagnostics::Diagnostics;
use crate::error::{CompileError, CompileResult};
use crate::ir::TypedModule;

pub use c::CBackend;
pub use fortran::FortranBackend;

/// What a generated file is for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileRole {
    /// Declarations for importers (`.h`)
    Header,
    /// Function definitions of the unit
    Source,
    /// Support code shared by every unit
    Runtime,
    /// Executable entry point built from module-level statements
    Program,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedFile {
    /// Path relative to the output directory
    pub path: PathBuf,
    pub role: FileRole,
    pub contents: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestFile {
    pub path: String,
    pub role: FileRole,
}

/// Build description of one unit for one language
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub unit: String,
    pub language: Language,
    /// Files in the order they should be compiled
    pub files: Vec<ManifestFile>,
    /// Symbols other units and programs may call
    pub entry_symbols: Vec<String>,
    /// Libraries to link: `m`, `openmp`, `mpi`
    pub libraries: Vec<String>,
    /// Units whose generated code this one needs
    pub dependencies: Vec<String>,
}

impl Manifest {
    /// File name of the manifest itself
    pub fn file_name(&self) -> String {
        format!("{}.{}.manifest.json", self.unit, self.language)
    }

    pub fn to_json(&self) -> CompileResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Everything one backend produced for one unit
#[derive(Debug, Clone)]
pub struct BackendOutput {
    pub language: Language,
    pub files: Vec<GeneratedFile>,
    pub manifest: Manifest,
    pub diagnostics: Diagnostics,
}

impl BackendOutput {
    /// File whose path ends with `name`
    pub fn file(&self, name: &str) -> Option<&GeneratedFile> {
        self.files.iter().find(|f| f.path.ends_with(name))
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics.has_errors()
    }
}

/// Read-only inputs shared by every backend
#[derive(Debug, Clone, Copy)]
pub struct GenerateContext<'a> {
    pub config: &'a CompilerConfig,
}

pub trait Backend: Send + Sync {
    fn language(&self) -> Language;

    fn generate(&self, module: &TypedModule, ctx: &GenerateContext<'_>) -> BackendOutput;
}

pub fn backend_for(language: Language) -> Box<dyn Backend> {
    match language {
        Language::C => Box::new(CBackend),
        Language::Fortran => Box::new(FortranBackend),
    }
}

/// Run every configured backend on one unit, in parallel
#[instrument(skip_all, fields(unit = %module.name))]
pub fn generate_all(module: &TypedModule, config: &CompilerConfig) -> Vec<BackendOutput> {
    let ctx = GenerateContext { config };
    config
        .languages
        .par_iter()
        .map(|&language| backend_for(language).generate(module, &ctx))
        .collect()
}

/// Write the files and manifest of one backend output below `out_dir`.
///
/// Each file is written to a temporary sibling and renamed into place, so a
/// file is either fully written or untouched. Outputs with errors write
/// nothing.
pub fn write_output(output: &BackendOutput, out_dir: &Path) -> CompileResult<Vec<PathBuf>> {
    if output.has_errors() {
        return Ok(Vec::new());
    }
    std::fs::create_dir_all(out_dir).map_err(|e| CompileError::io(out_dir, e))?;
    let mut written = Vec::new();
    for file in &output.files {
        let path = out_dir.join(&file.path);
        write_atomic(&path, &file.contents)?;
        written.push(path);
    }
    let manifest = out_dir.join(output.manifest.file_name());
    write_atomic(&manifest, &output.manifest.to_json()?)?;
    written.push(manifest);
    debug!(files = written.len(), dir = %out_dir.display(), "wrote unit");
    Ok(written)
}

fn write_atomic(path: &Path, contents: &str) -> CompileResult<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = tempfile::NamedTempFile::new_in(dir).map_err(|e| CompileError::io(dir, e))?;
    temp.write_all(contents.as_bytes())
        .map_err(|e| CompileError::io(path, e))?;
    temp.persist(path).map_err(|e| CompileError::io(path, e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::{Diagnostic, DiagnosticCode, SourceLocation};
    use crate::ast::Location;

    fn output(errors: bool) -> BackendOutput {
        let mut diagnostics = Diagnostics::new();
        if errors {
            diagnostics.push(Diagnostic::new(
                DiagnosticCode::UnsupportedConstruct,
                "nope",
                SourceLocation::new("m.py", Location::new(1, 1)),
            ));
        }
        BackendOutput {
            language: Language::C,
            files: vec![GeneratedFile {
                path: PathBuf::from("m.c"),
                role: FileRole::Source,
                contents: "int x;\n".to_string(),
            }],
            manifest: Manifest {
                unit: "m".to_string(),
                language: Language::C,
                files: vec![ManifestFile {
                    path: "m.c".to_string(),
                    role: FileRole::Source,
                }],
                entry_symbols: vec!["f".to_string()],
                libraries: vec!["m".to_string()],
                dependencies: Vec::new(),
            },
            diagnostics,
        }
    }

    #[test]
    fn test_write_output_is_complete() {
        let dir = tempfile::tempdir().unwrap();
        let written = write_output(&output(false), dir.path()).unwrap();
        assert_eq!(written.len(), 2);
        assert_eq!(std::fs::read_to_string(dir.path().join("m.c")).unwrap(), "int x;\n");
        let manifest: Manifest =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join("m.c.manifest.json")).unwrap())
                .unwrap();
        assert_eq!(manifest.entry_symbols, vec!["f"]);
    }

    #[test]
    fn test_output_with_errors_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let written = write_output(&output(true), dir.path()).unwrap();
        assert!(written.is_empty());
        assert!(!dir.path().join("m.c").exists());
    }

    #[test]
    fn test_manifest_json_roles() {
        let json = output(false).manifest.to_json().unwrap();
        assert!(json.contains("\"role\": \"source\""));
        assert!(json.contains("\"language\": \"c\""));
    }
}
