//! End-to-end tests: source text in, files on disk out.

use std::fs;

use numpy_to_native::{
    compile_program, compile_source, compile_tree_json, parse_source, CompileError, CompileOutput,
    CompilerConfig, FileRole, Language,
};
use pretty_assertions::assert_eq;

const AXPY: &str = "def axpy(a: float, x: 'float64[:]', y: 'float64[:]') -> 'float64[:]':\n    return a * x + y\n";

fn both_languages() -> CompilerConfig {
    CompilerConfig {
        languages: vec![Language::C, Language::Fortran],
        ..CompilerConfig::default()
    }
}

fn all_files(output: &CompileOutput) -> Vec<(String, String)> {
    output
        .units
        .iter()
        .flat_map(|u| u.outputs.iter())
        .flat_map(|o| o.files.iter())
        .map(|f| (f.path.display().to_string(), f.contents.clone()))
        .collect()
}

#[test]
fn test_axpy_for_both_languages() {
    let output = compile_source(AXPY, "blas.py", "blas", &both_languages()).unwrap();
    assert_eq!(output.exit_status(), 0, "{:?}", output.diagnostics);

    let unit = output.unit("blas").unwrap();
    assert!(unit.is_clean());
    assert_eq!(unit.outputs.len(), 2);

    let c = unit.output(Language::C).unwrap();
    assert!(c.file("blas.c").unwrap().contents.contains("nv_ndarray axpy("));
    assert!(c.file("blas.h").is_some());
    assert!(c.file("ndarray.h").is_some());
    assert_eq!(c.manifest.entry_symbols, vec!["axpy"]);

    let fortran = unit.output(Language::Fortran).unwrap();
    let module = &fortran.file("blas.f90").unwrap().contents;
    assert!(module.starts_with("module blas\n"));
    assert!(module.contains("function axpy(a, x, y) result(nv_result)"), "{}", module);
    assert!(module.contains("real(c_double), allocatable :: nv_result(:)"), "{}", module);
    assert!(fortran.file("prog_blas.f90").is_none());
}

#[test]
fn test_output_is_deterministic() {
    let source = "from pyccel.decorators import types\n\n\
                  @types('int', 'int')\n@types('float', 'float')\ndef add(a, b):\n    return a + b\n\n\
                  def twice(x):\n    return x * 2\n\n\
                  def f(n: int) -> float:\n    s = 0.0\n    for i in range(n):\n        s += twice(1.5) + add(i, 2)\n    return s\n";
    let first = compile_source(source, "m.py", "m", &both_languages()).unwrap();
    let second = compile_source(source, "m.py", "m", &both_languages()).unwrap();
    assert_eq!(first.exit_status(), 0, "{:?}", first.diagnostics);
    assert_eq!(all_files(&first), all_files(&second));
}

#[test]
fn test_overloads_reach_both_backends() {
    let source = "from pyccel.decorators import types\n\n\
                  @types('int', 'int')\n@types('float', 'float')\ndef add(a, b):\n    return a + b\n";
    let output = compile_source(source, "m.py", "m", &both_languages()).unwrap();
    let unit = output.unit("m").unwrap();
    let c = &unit.output(Language::C).unwrap().file("m.c").unwrap().contents;
    assert!(c.contains("int64_t add_i64_i64(int64_t a, int64_t b)"), "{}", c);
    assert!(c.contains("double add_f64_f64(double a, double b)"), "{}", c);
    let fortran = &unit.output(Language::Fortran).unwrap().file("m.f90").unwrap().contents;
    assert!(fortran.contains("interface add"));
}

#[test]
fn test_program_across_modules() {
    let modules = vec![
        parse_source(
            "from geometry import norm\nprint(norm(2.0))\n",
            "app.py",
            "app",
        )
        .unwrap(),
        parse_source(
            "def norm(x: float) -> float:\n    return x * x\n",
            "geometry.py",
            "geometry",
        )
        .unwrap(),
    ];
    let output = compile_program(&modules, &both_languages()).unwrap();
    assert_eq!(output.exit_status(), 0, "{:?}", output.diagnostics);

    let app = output.unit("app").unwrap();
    let c = app.output(Language::C).unwrap();
    assert_eq!(c.manifest.dependencies, vec!["geometry"]);
    assert!(c.file("app.h").unwrap().contents.contains("#include \"geometry.h\""));
    assert_eq!(c.manifest.files.last().map(|f| f.role), Some(FileRole::Program));

    let fortran = app.output(Language::Fortran).unwrap();
    assert!(fortran.file("app.f90").unwrap().contents.contains("use geometry"));
    assert!(fortran.file("prog_app.f90").is_some());
}

#[test]
fn test_unknown_import_fails_only_its_unit() {
    let modules = vec![
        parse_source("from missing import f\nx = f(1)\n", "app.py", "app").unwrap(),
        parse_source("def g(x: int) -> int:\n    return x\n", "lib.py", "lib").unwrap(),
    ];
    let output = compile_program(&modules, &CompilerConfig::default()).unwrap();
    assert_eq!(output.exit_status(), 1);
    assert!(output.unit("app").unwrap().has_errors());
    assert!(output.unit("lib").unwrap().is_clean());
}

#[test]
fn test_import_cycle_is_reported() {
    let modules = vec![
        parse_source("from b import g\n", "a.py", "a").unwrap(),
        parse_source("from a import f\n", "b.py", "b").unwrap(),
    ];
    let err = compile_program(&modules, &CompilerConfig::default()).unwrap_err();
    assert!(matches!(err, CompileError::ImportCycle { .. }));
}

#[test]
fn test_write_places_files_and_manifests() {
    let dir = tempfile::tempdir().unwrap();
    let output = compile_source(AXPY, "blas.py", "blas", &both_languages()).unwrap();
    let written = output.write(dir.path()).unwrap();

    for name in [
        "ndarray.h",
        "blas.h",
        "blas.c",
        "blas.f90",
        "blas.c.manifest.json",
        "blas.fortran.manifest.json",
    ] {
        let path = dir.path().join(name);
        assert!(path.exists(), "missing {}", name);
        assert!(written.contains(&path));
    }

    let manifest: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(dir.path().join("blas.c.manifest.json")).unwrap()).unwrap();
    assert_eq!(manifest["unit"], "blas");
    assert_eq!(manifest["language"], "c");
    assert_eq!(manifest["entry_symbols"][0], "axpy");
}

#[test]
fn test_failed_unit_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let output = compile_source(
        "def f(x: int) -> int:\n    return y\n",
        "bad.py",
        "bad",
        &CompilerConfig::default(),
    )
    .unwrap();
    assert_eq!(output.exit_status(), 1);
    assert!(output.write(dir.path()).unwrap().is_empty());
    assert!(!dir.path().join("bad.c").exists());
}

#[test]
fn test_json_tree_compiles_like_source() {
    let module = parse_source(AXPY, "blas.py", "blas").unwrap();
    let json = serde_json::to_string(&module).unwrap();
    let from_tree = compile_tree_json(&json, &CompilerConfig::default()).unwrap();
    let from_source = compile_source(AXPY, "blas.py", "blas", &CompilerConfig::default()).unwrap();
    assert_eq!(all_files(&from_tree), all_files(&from_source));
}

#[test]
fn test_malformed_tree_is_an_error() {
    let err = compile_tree_json("{\"name\": 3}", &CompilerConfig::default()).unwrap_err();
    assert!(matches!(err, CompileError::Serialization(_)));
}

#[test]
fn test_config_without_languages_is_rejected() {
    let config = CompilerConfig {
        languages: Vec::new(),
        ..CompilerConfig::default()
    };
    let err = compile_source(AXPY, "blas.py", "blas", &config).unwrap_err();
    assert!(matches!(err, CompileError::Config { .. }));
}
