//! Fatal error types for the NumPy to native compiler
//!
//! Recoverable semantic problems are reported as [`crate::diagnostics::Diagnostic`]
//! records instead; a `CompileError` always aborts the compilation unit.

use std::path::PathBuf;

use thiserror::Error;

use crate::ast::Location;

/// Result type for compilation operations
pub type CompileResult<T> = Result<T, CompileError>;

/// Compilation errors that abort a unit
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("Lexer error at {file}:{line}:{column}: {message}")]
    LexerError {
        file: String,
        line: u32,
        column: u32,
        message: String,
    },

    #[error("Parser error at {file}:{line}:{column}: {message}")]
    ParseError {
        file: String,
        line: u32,
        column: u32,
        message: String,
    },

    #[error("Malformed syntax tree at {file}:{line}:{column}: {message}")]
    SyntaxShape {
        file: String,
        line: u32,
        column: u32,
        message: String,
    },

    #[error("Import cycle between modules: {}", modules.join(" -> "))]
    ImportCycle { modules: Vec<String> },

    #[error("Module '{name}' is given more than once")]
    DuplicateModule { name: String },

    #[error("I/O error on '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {message}")]
    Config { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CompileError {
    pub fn parse_error(file: &str, loc: Location, msg: impl Into<String>) -> Self {
        CompileError::ParseError {
            file: file.to_string(),
            line: loc.line,
            column: loc.column,
            message: msg.into(),
        }
    }

    pub fn lexer_error(file: &str, loc: Location, msg: impl Into<String>) -> Self {
        CompileError::LexerError {
            file: file.to_string(),
            line: loc.line,
            column: loc.column,
            message: msg.into(),
        }
    }

    pub fn syntax_shape(file: &str, loc: Location, msg: impl Into<String>) -> Self {
        CompileError::SyntaxShape {
            file: file.to_string(),
            line: loc.line,
            column: loc.column,
            message: msg.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CompileError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        CompileError::Config {
            message: msg.into(),
        }
    }
}
