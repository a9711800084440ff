//! NumPy to Native Compiler CLI
//!
//! Usage:
//!   numpy2native geometry.py app.py -l c -l fortran -o build
//!   numpy2native kernels.py --check
//!   numpy2native --tree kernels.json --json

use clap::Parser as ClapParser;
use colored::Colorize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use numpy_to_native::ast::Module;
use numpy_to_native::diagnostics;
use numpy_to_native::{
    compile_program, module_name, parse_source, CompileOutput, CompilerConfig, Language, Manifest,
};

#[derive(ClapParser, Debug)]
#[command(name = "numpy2native")]
#[command(author = "FPGA Team")]
#[command(version = "0.1.0")]
#[command(about = "Compiles statically typed NumPy-style Python to C and Fortran")]
struct Args {
    /// Source files of the program, one module each
    #[arg(value_name = "FILE", required = true)]
    inputs: Vec<PathBuf>,

    /// Target language (c or fortran); repeat for several
    #[arg(short = 'l', long = "language", value_parser = parse_language)]
    languages: Vec<Language>,

    /// Output directory
    #[arg(short = 'o', long = "out-dir")]
    out_dir: Option<PathBuf>,

    /// JSON configuration file
    #[arg(long = "config")]
    config: Option<PathBuf>,

    /// Inputs are JSON syntax trees from an external parser
    #[arg(long = "tree")]
    tree: bool,

    /// Print the build manifests as JSON
    #[arg(short = 'j', long = "json")]
    json_output: bool,

    /// Report diagnostics without writing files
    #[arg(long = "check")]
    check: bool,

    /// Verbose output
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,
}

fn parse_language(s: &str) -> Result<Language, String> {
    s.parse()
}

fn fail(what: &str, message: impl std::fmt::Display) -> ! {
    eprintln!("{}: {}", what.red().bold(), message);
    std::process::exit(1);
}

fn main() {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_env("NUMPY2NATIVE_LOG").unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut config = match &args.config {
        Some(path) => CompilerConfig::load(path).unwrap_or_else(|e| fail("Configuration error", e)),
        None => CompilerConfig::default(),
    };
    if !args.languages.is_empty() {
        config.languages = args.languages.clone();
    }
    if let Some(dir) = &args.out_dir {
        config.out_dir = dir.clone();
    }

    if args.verbose {
        println!("{}", "NumPy to Native Compiler".bold().blue());
        println!("{}", "=".repeat(35));
        println!();
        let languages: Vec<&str> = config.languages.iter().map(|l| l.as_str()).collect();
        println!("{}: {}", "Targets".green(), languages.join(", "));
        println!("{}: {}", "Output".green(), config.out_dir.display());
        println!();
    }

    // Sources are kept for diagnostic excerpts
    let mut sources: HashMap<String, String> = HashMap::new();
    let mut modules: Vec<Module> = Vec::with_capacity(args.inputs.len());
    for path in &args.inputs {
        let text = fs::read_to_string(path)
            .unwrap_or_else(|e| fail("Error", format!("Failed to read file '{}': {}", path.display(), e)));
        let module = if args.tree {
            serde_json::from_str::<Module>(&text).unwrap_or_else(|e| {
                fail("Tree error", format!("'{}' is not a syntax tree: {}", path.display(), e))
            })
        } else {
            let file = path.display().to_string();
            let module = parse_source(&text, &file, &module_name(path)).unwrap_or_else(|e| fail("Parse error", e));
            sources.insert(file, text);
            module
        };
        if args.verbose {
            println!("{}: {} ({})", "Module".cyan(), module.name, path.display());
        }
        modules.push(module);
    }

    let output = compile_program(&modules, &config).unwrap_or_else(|e| fail("Compilation error", e));

    for diagnostic in output.diagnostics.iter() {
        let source = sources.get(&diagnostic.location.file).map(String::as_str);
        eprint!("{}", diagnostics::render(diagnostic, source));
    }

    if !args.check {
        write_units(&output, &config.out_dir, args.verbose);
    }
    if args.json_output {
        print_manifests(&output);
    }
    print_summary(&output);
    std::process::exit(output.exit_status());
}

fn write_units(output: &CompileOutput, out_dir: &Path, verbose: bool) {
    let written = output
        .write(out_dir)
        .unwrap_or_else(|e| fail("Error", format!("Failed to write output: {}", e)));
    if verbose {
        println!();
        println!("{}", "Generated Files".bold().yellow());
        println!("{}", "-".repeat(50));
        for path in &written {
            println!("  {}", path.display());
        }
    }
    for unit in output.units.iter().filter(|u| u.blocked) {
        println!("{} {} (an imported module has errors)", "Skipped".yellow(), unit.module);
    }
}

fn print_manifests(output: &CompileOutput) {
    let manifests: Vec<&Manifest> = output
        .units
        .iter()
        .filter(|u| u.is_clean())
        .flat_map(|u| u.outputs.iter().map(|o| &o.manifest))
        .collect();
    match serde_json::to_string_pretty(&manifests) {
        Ok(json) => println!("{}", json),
        Err(e) => fail("Error", format!("Failed to serialize to JSON: {}", e)),
    }
}

fn print_summary(output: &CompileOutput) {
    let errors = output.diagnostics.error_count();
    let warnings = output.diagnostics.warning_count();
    let clean = output.units.iter().filter(|u| u.is_clean()).count();
    let status = if errors > 0 {
        "Compilation failed".red().bold()
    } else {
        "Compilation finished".green().bold()
    };
    eprintln!(
        "{}: {} of {} units generated, {} error(s), {} warning(s)",
        status,
        clean,
        output.units.len(),
        errors,
        warnings
    );
}
