//! Recoverable semantic diagnostics
//!
//! Errors and warnings found during inference and code generation are
//! collected here rather than returned as `Err`, so one run reports every
//! independent problem. A unit with any error-severity diagnostic never
//! reaches file output.

use std::fmt;

use colored::Colorize;
use serde::{Deserialize, Serialize};

use crate::ast::Location;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DiagnosticCode {
    // Errors
    UndeclaredSymbol,
    TypeMismatch,
    ShapeMismatch,
    OverloadNotFound,
    OverloadAmbiguous,
    UnsupportedConstruct,
    GenericInstantiation,
    /// A typed tree still held an unresolved node after inference
    InternalError,

    // Warnings
    UnknownDirective,
    UnsupportedDirective,
    MisplacedDirective,
}

impl DiagnosticCode {
    pub fn severity(self) -> Severity {
        match self {
            DiagnosticCode::UnknownDirective
            | DiagnosticCode::UnsupportedDirective
            | DiagnosticCode::MisplacedDirective => Severity::Warning,
            _ => Severity::Error,
        }
    }

    /// Stable identifier, e.g. `E0002` or `W0001`
    pub fn id(self) -> String {
        let number = u32::from(self);
        match self.severity() {
            Severity::Error => format!("E{:04}", number),
            Severity::Warning => format!("W{:04}", number),
        }
    }
}

impl From<DiagnosticCode> for u32 {
    fn from(code: DiagnosticCode) -> Self {
        match code {
            DiagnosticCode::UndeclaredSymbol => 1,
            DiagnosticCode::TypeMismatch => 2,
            DiagnosticCode::ShapeMismatch => 3,
            DiagnosticCode::OverloadNotFound => 4,
            DiagnosticCode::OverloadAmbiguous => 5,
            DiagnosticCode::UnsupportedConstruct => 6,
            DiagnosticCode::GenericInstantiation => 7,
            DiagnosticCode::InternalError => 99,
            DiagnosticCode::UnknownDirective => 1,
            DiagnosticCode::UnsupportedDirective => 2,
            DiagnosticCode::MisplacedDirective => 3,
        }
    }
}

impl fmt::Display for DiagnosticCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id())
    }
}

/// A file position attached to a diagnostic
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SourceLocation {
    pub file: String,
    pub line: u32,
    pub column: u32,
}

impl SourceLocation {
    pub fn new(file: &str, loc: Location) -> Self {
        Self {
            file: file.to_string(),
            line: loc.line,
            column: loc.column,
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelatedLocation {
    pub location: SourceLocation,
    pub message: String,
}

/// A diagnostic message with its source position
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: DiagnosticCode,
    pub message: String,
    pub location: SourceLocation,
    /// Optional related locations for additional context
    pub related: Vec<RelatedLocation>,
}

impl Diagnostic {
    pub fn new(code: DiagnosticCode, message: impl Into<String>, location: SourceLocation) -> Self {
        Self {
            severity: code.severity(),
            code,
            message: message.into(),
            location,
            related: Vec::new(),
        }
    }

    /// Add a related location with context message
    pub fn with_related(mut self, location: SourceLocation, message: impl Into<String>) -> Self {
        self.related.push(RelatedLocation {
            location,
            message: message.into(),
        });
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {}[{}]: {}",
            self.location, self.severity, self.code, self.message
        )?;
        for related in &self.related {
            write!(f, "\n  {}: note: {}", related.location, related.message)?;
        }
        Ok(())
    }
}

/// Ordered collection of diagnostics for one file or unit
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostics {
    items: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        tracing::debug!(code = %diagnostic.code, "{}", diagnostic.message);
        self.items.push(diagnostic);
    }

    /// Shorthand for a diagnostic at `loc` in `file`
    pub fn report(
        &mut self,
        code: DiagnosticCode,
        file: &str,
        loc: Location,
        message: impl Into<String>,
    ) {
        self.push(Diagnostic::new(code, message, SourceLocation::new(file, loc)));
    }

    pub fn merge(&mut self, other: Diagnostics) {
        self.items.extend(other.items);
    }

    pub fn extend(&mut self, items: impl IntoIterator<Item = Diagnostic>) {
        self.items.extend(items);
    }

    pub fn has_errors(&self) -> bool {
        self.items.iter().any(Diagnostic::is_error)
    }

    pub fn error_count(&self) -> usize {
        self.items.iter().filter(|d| d.is_error()).count()
    }

    pub fn warning_count(&self) -> usize {
        self.items.len() - self.error_count()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.items.iter()
    }

    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.items
    }
}

impl IntoIterator for Diagnostics {
    type Item = Diagnostic;
    type IntoIter = std::vec::IntoIter<Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

/// Render a diagnostic for a terminal, with the offending source line when available
pub fn render(diagnostic: &Diagnostic, source: Option<&str>) -> String {
    let header = match diagnostic.severity {
        Severity::Error => format!("error[{}]", diagnostic.code).red().bold(),
        Severity::Warning => format!("warning[{}]", diagnostic.code).yellow().bold(),
    };
    let mut out = format!("{}: {}\n", header, diagnostic.message.bold());
    out.push_str(&format!("  {} {}\n", "-->".blue().bold(), diagnostic.location));

    let excerpt = source.and_then(|text| {
        text.lines()
            .nth(diagnostic.location.line.saturating_sub(1) as usize)
    });
    if let Some(line) = excerpt {
        let number = diagnostic.location.line.to_string();
        let gutter = " ".repeat(number.len());
        let pad = " ".repeat(diagnostic.location.column.saturating_sub(1) as usize);
        out.push_str(&format!("{} {}\n", gutter, "|".blue().bold()));
        out.push_str(&format!("{} {} {}\n", number.blue().bold(), "|".blue().bold(), line));
        out.push_str(&format!(
            "{} {} {}{}\n",
            gutter,
            "|".blue().bold(),
            pad,
            "^".red().bold()
        ));
    }
    for related in &diagnostic.related {
        out.push_str(&format!(
            "  {} {}: {}\n",
            "note:".cyan().bold(),
            related.location,
            related.message
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(DiagnosticCode::UndeclaredSymbol.id(), "E0001");
        assert_eq!(DiagnosticCode::UnknownDirective.id(), "W0001");
        assert_eq!(DiagnosticCode::UnknownDirective.severity(), Severity::Warning);
    }

    #[test]
    fn test_collector_counts() {
        let mut diags = Diagnostics::new();
        diags.report(
            DiagnosticCode::TypeMismatch,
            "a.py",
            Location::new(2, 5),
            "bad types",
        );
        diags.report(
            DiagnosticCode::UnknownDirective,
            "a.py",
            Location::new(3, 1),
            "unknown directive 'fast'",
        );
        assert!(diags.has_errors());
        assert_eq!(diags.error_count(), 1);
        assert_eq!(diags.warning_count(), 1);
    }

    #[test]
    fn test_display_includes_related_locations() {
        let diag = Diagnostic::new(
            DiagnosticCode::TypeMismatch,
            "x has conflicting types",
            SourceLocation::new("m.py", Location::new(9, 3)),
        )
        .with_related(SourceLocation::new("m.py", Location::new(4, 5)), "declared here");
        let text = diag.to_string();
        assert!(text.starts_with("m.py:9:3: error[E0002]"));
        assert!(text.contains("m.py:4:5: note: declared here"));
    }

    #[test]
    fn test_render_points_at_column() {
        colored::control::set_override(false);
        let diag = Diagnostic::new(
            DiagnosticCode::UndeclaredSymbol,
            "undeclared symbol 'y'",
            SourceLocation::new("m.py", Location::new(2, 5)),
        );
        let text = render(&diag, Some("x = 1\nz = y\n"));
        assert!(text.contains("2 | z = y"));
        assert!(text.contains("|     ^"));
    }
}
