//! Compiler configuration
//!
//! Every field has a default, so an empty JSON object is a valid config.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{CompileError, CompileResult};
use crate::promotion::PromotionPolicy;
use crate::types::Order;

/// Target language of a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    C,
    Fortran,
}

impl Language {
    pub fn as_str(self) -> &'static str {
        match self {
            Language::C => "c",
            Language::Fortran => "fortran",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "c" => Ok(Language::C),
            "fortran" | "f90" => Ok(Language::Fortran),
            other => Err(format!("unknown target language '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    /// Backends to run, in manifest order
    pub languages: Vec<Language>,
    pub out_dir: PathBuf,
    pub promotion: PromotionPolicy,
    /// Order of arrays created without an explicit `order=` argument
    pub default_order: Order,
    /// Emit `#line` markers in C output
    pub line_markers: bool,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            languages: vec![Language::C],
            out_dir: PathBuf::from("__nvcache__"),
            promotion: PromotionPolicy::default(),
            default_order: Order::C,
            line_markers: false,
        }
    }
}

impl CompilerConfig {
    /// Load a JSON configuration file
    pub fn load(path: &Path) -> CompileResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| CompileError::io(path, e))?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> CompileResult<Self> {
        let config: Self = serde_json::from_str(text)
            .map_err(|e| CompileError::config(format!("{}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> CompileResult<()> {
        if self.languages.is_empty() {
            return Err(CompileError::config("no target language selected"));
        }
        let policy = &self.promotion;
        if !policy.default_int.is_integer() {
            return Err(CompileError::config(format!(
                "default_int must be an integer type, not {}",
                policy.default_int
            )));
        }
        if policy.default_float.kind != crate::types::ScalarKind::Float {
            return Err(CompileError::config(format!(
                "default_float must be a float type, not {}",
                policy.default_float
            )));
        }
        if !policy.default_complex.is_complex() {
            return Err(CompileError::config(format!(
                "default_complex must be a complex type, not {}",
                policy.default_complex
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ScalarType;

    #[test]
    fn test_empty_object_gives_defaults() {
        let config = CompilerConfig::from_json("{}").unwrap();
        assert_eq!(config, CompilerConfig::default());
    }

    #[test]
    fn test_partial_config() {
        let config = CompilerConfig::from_json(
            r#"{"languages": ["c", "fortran"], "promotion": {"default_float": "float32"}}"#,
        )
        .unwrap();
        assert_eq!(config.languages, vec![Language::C, Language::Fortran]);
        assert_eq!(config.promotion.default_float, ScalarType::FLOAT32);
        assert_eq!(config.promotion.default_int, ScalarType::INT64);
    }

    #[test]
    fn test_invalid_defaults_are_rejected() {
        let err = CompilerConfig::from_json(r#"{"promotion": {"default_int": "float64"}}"#)
            .unwrap_err();
        assert!(matches!(err, CompileError::Config { .. }));
        assert!(CompilerConfig::from_json(r#"{"languages": []}"#).is_err());
    }

    #[test]
    fn test_language_from_str() {
        assert_eq!("Fortran".parse::<Language>().unwrap(), Language::Fortran);
        assert!("rust".parse::<Language>().is_err());
    }
}
