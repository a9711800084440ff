//! Parallel and distribution directives
//!
//! Directives come from `#$ key clause...` comments and
//! `@directive('key clause...')` decorators. Inference never interprets them:
//! they are parsed into a key and verbatim clauses and attached to the IR
//! node of the statement (or function) they precede.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ast::Location;
use crate::ir::NodeId;

/// Recognized directive keys; anything else is carried as `Other`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DirectiveKey {
    /// Run the iterations of the following loop in parallel threads
    ParallelLoop,
    /// Vectorize the following loop, or declare a function vectorizable
    Simd,
    /// Split the iteration range of the following loop across processes
    Distribute,
    Other(String),
}

impl DirectiveKey {
    pub fn parse(key: &str) -> Self {
        match key {
            "parallel-loop" => DirectiveKey::ParallelLoop,
            "simd" => DirectiveKey::Simd,
            "distribute" => DirectiveKey::Distribute,
            other => DirectiveKey::Other(other.to_string()),
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, DirectiveKey::Other(_))
    }

    /// Keys that only make sense in front of a loop
    pub fn requires_loop(&self) -> bool {
        matches!(self, DirectiveKey::ParallelLoop | DirectiveKey::Distribute)
    }

    pub fn as_str(&self) -> &str {
        match self {
            DirectiveKey::ParallelLoop => "parallel-loop",
            DirectiveKey::Simd => "simd",
            DirectiveKey::Distribute => "distribute",
            DirectiveKey::Other(key) => key,
        }
    }
}

impl fmt::Display for DirectiveKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One clause such as `reduction(+:s)`, `num_threads=4` or `nowait`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Clause {
    pub name: String,
    pub value: Option<String>,
    /// Original clause text
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Directive {
    pub key: DirectiveKey,
    pub clauses: Vec<Clause>,
    pub loc: Location,
}

impl Directive {
    /// Parse `key clause clause...`
    pub fn parse(text: &str, loc: Location) -> Result<Self, String> {
        let mut parts = split_clauses(text.trim())?.into_iter();
        let key = parts
            .next()
            .ok_or_else(|| "empty directive".to_string())?;
        let clauses = parts.map(|part| parse_clause(&part)).collect();
        Ok(Self {
            key: DirectiveKey::parse(&key),
            clauses,
            loc,
        })
    }

    /// Clauses joined back with single spaces
    pub fn clause_text(&self) -> String {
        self.clauses
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn clause(&self, name: &str) -> Option<&Clause> {
        self.clauses.iter().find(|c| c.name == name)
    }

    /// `(operator, variable)` pairs of every `reduction(op:vars)` clause
    pub fn reductions(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        for clause in self.clauses.iter().filter(|c| c.name == "reduction") {
            let Some(value) = &clause.value else { continue };
            if let Some((op, vars)) = value.split_once(':') {
                for var in vars.split(',') {
                    let var = var.trim();
                    if !var.is_empty() {
                        out.push((op.trim().to_string(), var.to_string()));
                    }
                }
            }
        }
        out
    }
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key)?;
        for clause in &self.clauses {
            write!(f, " {}", clause.text)?;
        }
        Ok(())
    }
}

/// Split on whitespace outside parentheses
fn split_clauses(text: &str) -> Result<Vec<String>, String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    for c in text.chars() {
        match c {
            '(' => {
                depth += 1;
                current.push(c);
            }
            ')' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| format!("unbalanced ')' in directive '{}'", text))?;
                current.push(c);
            }
            c if c.is_whitespace() && depth == 0 => {
                if !current.is_empty() {
                    parts.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if depth != 0 {
        return Err(format!("unbalanced '(' in directive '{}'", text));
    }
    if !current.is_empty() {
        parts.push(current);
    }
    Ok(parts)
}

fn parse_clause(text: &str) -> Clause {
    if let Some(open) = text.find('(') {
        if text.ends_with(')') {
            return Clause {
                name: text[..open].to_string(),
                value: Some(text[open + 1..text.len() - 1].to_string()),
                text: text.to_string(),
            };
        }
    }
    if let Some((name, value)) = text.split_once('=') {
        return Clause {
            name: name.to_string(),
            value: Some(value.to_string()),
            text: text.to_string(),
        };
    }
    Clause {
        name: text.to_string(),
        value: None,
        text: text.to_string(),
    }
}

/// Directives keyed by the IR node they annotate
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DirectiveTable {
    entries: BTreeMap<NodeId, Vec<Directive>>,
}

impl DirectiveTable {
    pub fn attach(&mut self, node: NodeId, directive: Directive) {
        self.entries.entry(node).or_default().push(directive);
    }

    pub fn get(&self, node: NodeId) -> &[Directive] {
        self.entries.get(&node).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NodeId, &Vec<Directive>)> {
        self.entries.iter()
    }

    /// Whether any directive uses `key`
    pub fn uses(&self, key: &DirectiveKey) -> bool {
        self.entries.values().flatten().any(|d| &d.key == key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Directive {
        Directive::parse(text, Location::new(1, 1)).unwrap()
    }

    #[test]
    fn test_clauses_are_kept_verbatim_and_ordered() {
        let d = parse("parallel-loop schedule(static, 4) reduction(+:s) num_threads=8 nowait");
        assert_eq!(d.key, DirectiveKey::ParallelLoop);
        let names: Vec<&str> = d.clauses.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["schedule", "reduction", "num_threads", "nowait"]);
        assert_eq!(d.clauses[0].value.as_deref(), Some("static, 4"));
        assert_eq!(
            d.clause_text(),
            "schedule(static, 4) reduction(+:s) num_threads=8 nowait"
        );
    }

    #[test]
    fn test_unknown_key_is_carried() {
        let d = parse("unroll 4");
        assert_eq!(d.key, DirectiveKey::Other("unroll".to_string()));
        assert!(!d.key.is_known());
    }

    #[test]
    fn test_reductions() {
        let d = parse("distribute reduction(+:s, t) reduction(max:m)");
        assert_eq!(
            d.reductions(),
            vec![
                ("+".to_string(), "s".to_string()),
                ("+".to_string(), "t".to_string()),
                ("max".to_string(), "m".to_string()),
            ]
        );
    }

    #[test]
    fn test_unbalanced_parentheses_are_rejected() {
        assert!(Directive::parse("simd aligned(a", Location::new(1, 1)).is_err());
        assert!(Directive::parse("   ", Location::new(1, 1)).is_err());
    }
}
