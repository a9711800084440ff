//! Module environments and interfaces
//!
//! A [`ModuleEnv`] is the module-level name table of one source file: its
//! functions, classes, constants and imports. Once a module has been
//! analyzed, its [`ModuleInterface`] is a read-only snapshot handed to every
//! importer.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use crate::ast::Location;
use crate::instantiate::InstanceKey;
use crate::ir::{Intent, Literal};
use crate::resolver::FunctionDecl;
use crate::types::{AggregateType, Type};

/// A module-level name bound to a literal scalar and never reassigned
#[derive(Debug, Clone, PartialEq)]
pub struct ConstInfo {
    pub name: String,
    pub ty: Type,
    pub value: Literal,
    pub loc: Location,
}

/// `from module import name as alias`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportedName {
    pub module: String,
    pub name: String,
    pub loc: Location,
}

/// Module-level names of one source file
#[derive(Debug, Clone, Default)]
pub struct ModuleEnv {
    pub name: String,
    pub file: String,
    /// Overload sets in declaration order
    pub functions: BTreeMap<String, Vec<Arc<FunctionDecl>>>,
    pub aggregates: BTreeMap<String, AggregateType>,
    pub constants: BTreeMap<String, ConstInfo>,
    /// Module-level variables that are not constants; invisible to functions
    pub module_vars: BTreeSet<String>,
    /// Names bound to `numpy`
    pub numpy_aliases: BTreeSet<String>,
    /// Names bound to `math`
    pub math_aliases: BTreeSet<String>,
    /// `import geometry as g`: `g` → `geometry`
    pub module_aliases: BTreeMap<String, String>,
    pub imported: BTreeMap<String, ImportedName>,
}

impl ModuleEnv {
    pub fn new(name: &str, file: &str) -> Self {
        Self {
            name: name.to_string(),
            file: file.to_string(),
            ..Self::default()
        }
    }

    /// Whether a call to `name` needs mangled instance names
    pub fn is_overloaded(&self, name: &str) -> bool {
        self.functions.get(name).map_or(false, |set| set.len() > 1)
    }
}

/// Signature of a function realized by its defining module
#[derive(Debug, Clone, PartialEq)]
pub struct RealizedFunction {
    pub emitted_name: String,
    pub params: Vec<Type>,
    pub intents: Vec<Intent>,
    pub ret: Type,
}

/// Read-only snapshot of an analyzed module, as seen by importers
#[derive(Debug, Clone, Default)]
pub struct ModuleInterface {
    pub env: Arc<ModuleEnv>,
    pub realized: HashMap<InstanceKey, RealizedFunction>,
    /// This module, or one it imports, distributes loops across processes
    pub uses_distribute: bool,
    /// Analysis reported errors; calls into it are poisoned silently
    pub has_errors: bool,
}

impl ModuleInterface {
    pub fn name(&self) -> &str {
        &self.env.name
    }

    pub fn realized(&self, key: &InstanceKey) -> Option<&RealizedFunction> {
        self.realized.get(key)
    }
}

/// Interfaces of every module analyzed so far, by name
pub type InterfaceMap = HashMap<String, Arc<ModuleInterface>>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ScalarType;

    #[test]
    fn test_realized_lookup() {
        let key = InstanceKey {
            module: "geometry".to_string(),
            function: "norm".to_string(),
            overload: 0,
            args: vec![Type::Scalar(ScalarType::FLOAT64)],
        };
        let mut interface = ModuleInterface {
            env: Arc::new(ModuleEnv::new("geometry", "geometry.py")),
            ..ModuleInterface::default()
        };
        interface.realized.insert(
            key.clone(),
            RealizedFunction {
                emitted_name: "norm".to_string(),
                params: key.args.clone(),
                intents: vec![Intent::In],
                ret: Type::Scalar(ScalarType::FLOAT64),
            },
        );
        assert_eq!(interface.name(), "geometry");
        assert_eq!(interface.realized(&key).map(|r| r.emitted_name.as_str()), Some("norm"));
        assert!(!interface.env.is_overloaded("norm"));
    }
}
