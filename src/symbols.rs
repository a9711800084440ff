//! Symbol and scope table
//!
//! Scopes form a tree stored in an arena: a scope refers to its parent by
//! index for lookups only, and symbols are owned by the table and referenced
//! everywhere else by [`SymbolId`].

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::ast::Location;
use crate::types::Type;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScopeId(u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SymbolId(u32);

impl ScopeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl SymbolId {
    /// Stands for compiler-generated temporaries, which have no table entry
    pub const GENERATED: SymbolId = SymbolId(u32::MAX);

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScopeKind {
    Builtin,
    Module,
    Function,
    Block,
    Loop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SymbolKind {
    Variable,
    Function,
    Type,
    Module,
}

impl SymbolKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SymbolKind::Variable => "variable",
            SymbolKind::Function => "function",
            SymbolKind::Type => "type",
            SymbolKind::Module => "module",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StorageClass {
    Local,
    Parameter,
    Global,
    ModuleLevel,
}

/// Flow facts the analyzer tracks per variable
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SymbolFlags {
    /// Read at least once; the declared type is frozen from then on
    pub read: bool,
    /// Assigned after its declaration (or written through an index)
    pub written: bool,
    /// This array variable is a view of another one
    pub alias_of: Option<SymbolId>,
    /// Another variable is a view of this one
    pub aliased: bool,
    /// Declared inside branch `(if statement, branch index)`
    pub decl_branch: Option<(u32, usize)>,
    /// Location of a sibling-branch assignment with a different type
    pub conflict: Option<Location>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Symbol {
    pub id: SymbolId,
    pub name: String,
    pub scope: ScopeId,
    pub kind: SymbolKind,
    pub ty: Type,
    pub mutable: bool,
    pub storage: StorageClass,
    pub loc: Location,
    /// Defining module for imported symbols
    pub origin: Option<String>,
    pub flags: SymbolFlags,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scope {
    pub id: ScopeId,
    pub kind: ScopeKind,
    /// Enclosing scope, used for lookups only
    pub parent: Option<ScopeId>,
    order: Vec<String>,
    names: HashMap<String, Vec<SymbolId>>,
    /// Variables whose first assignment happened inside this block or loop
    pub first_assigned: Vec<SymbolId>,
    pub closed: bool,
}

impl Scope {
    fn new(id: ScopeId, kind: ScopeKind, parent: Option<ScopeId>) -> Self {
        Self {
            id,
            kind,
            parent,
            order: Vec::new(),
            names: HashMap::new(),
            first_assigned: Vec::new(),
            closed: false,
        }
    }

    /// Lookup a name within this scope only
    pub fn get(&self, name: &str) -> Option<&[SymbolId]> {
        self.names.get(name).map(Vec::as_slice)
    }
}

/// Owner of every scope and symbol of one module
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScopeTree {
    scopes: Vec<Scope>,
    symbols: Vec<Symbol>,
}

/// Fields of a new declaration
#[derive(Debug, Clone)]
pub struct Declaration {
    pub name: String,
    pub kind: SymbolKind,
    pub ty: Type,
    pub mutable: bool,
    pub storage: StorageClass,
    pub loc: Location,
    pub origin: Option<String>,
}

impl Declaration {
    pub fn variable(name: &str, ty: Type, storage: StorageClass, loc: Location) -> Self {
        Self {
            name: name.to_string(),
            kind: SymbolKind::Variable,
            ty,
            mutable: true,
            storage,
            loc,
            origin: None,
        }
    }
}

impl ScopeTree {
    /// Create a tree holding only the builtin root scope
    pub fn new() -> Self {
        let mut tree = Self::default();
        tree.push_scope(ScopeKind::Builtin, None);
        tree
    }

    pub fn root(&self) -> ScopeId {
        ScopeId(0)
    }

    pub fn push_scope(&mut self, kind: ScopeKind, parent: Option<ScopeId>) -> ScopeId {
        let id = ScopeId(self.scopes.len() as u32);
        self.scopes.push(Scope::new(id, kind, parent));
        id
    }

    pub fn scope(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.index()]
    }

    pub fn symbol(&self, id: SymbolId) -> &Symbol {
        &self.symbols[id.index()]
    }

    pub fn symbol_mut(&mut self, id: SymbolId) -> &mut Symbol {
        &mut self.symbols[id.index()]
    }

    /// Declare a symbol; a repeated name in one scope extends its overload set
    pub fn declare(&mut self, scope: ScopeId, decl: Declaration) -> SymbolId {
        let id = SymbolId(self.symbols.len() as u32);
        self.symbols.push(Symbol {
            id,
            name: decl.name.clone(),
            scope,
            kind: decl.kind,
            ty: decl.ty,
            mutable: decl.mutable,
            storage: decl.storage,
            loc: decl.loc,
            origin: decl.origin,
            flags: SymbolFlags::default(),
        });
        let target = &mut self.scopes[scope.index()];
        match target.names.get_mut(&decl.name) {
            Some(ids) => ids.push(id),
            None => {
                target.order.push(decl.name.clone());
                target.names.insert(decl.name, vec![id]);
            }
        }
        id
    }

    /// Record that `symbol` was first assigned inside `scope`
    pub fn note_first_assignment(&mut self, scope: ScopeId, symbol: SymbolId) {
        self.scopes[scope.index()].first_assigned.push(symbol);
    }

    /// Innermost symbol named `name`, walking parents
    pub fn lookup(&self, scope: ScopeId, name: &str) -> Option<SymbolId> {
        let mut current = Some(scope);
        while let Some(id) = current {
            let s = self.scope(id);
            if let Some(ids) = s.get(name) {
                return ids.last().copied();
            }
            current = s.parent;
        }
        None
    }

    /// Every function symbol named `name` visible from `scope`, innermost first
    pub fn lookup_all(&self, scope: ScopeId, name: &str) -> Vec<SymbolId> {
        let mut out = Vec::new();
        let mut current = Some(scope);
        while let Some(id) = current {
            let s = self.scope(id);
            if let Some(ids) = s.get(name) {
                out.extend(
                    ids.iter()
                        .copied()
                        .filter(|sym| self.symbol(*sym).kind == SymbolKind::Function),
                );
            }
            current = s.parent;
        }
        out
    }

    /// Nearest enclosing function or module scope, where Python binds names
    pub fn binding_scope(&self, scope: ScopeId) -> ScopeId {
        let mut current = scope;
        loop {
            let s = self.scope(current);
            match (s.kind, s.parent) {
                (ScopeKind::Function | ScopeKind::Module | ScopeKind::Builtin, _) | (_, None) => {
                    return current
                }
                (_, Some(parent)) => current = parent,
            }
        }
    }

    pub fn close_scope(&mut self, scope: ScopeId) {
        self.scopes[scope.index()].closed = true;
    }

    /// Symbols of one scope in declaration order
    pub fn iter_scope(&self, scope: ScopeId) -> impl Iterator<Item = &Symbol> + '_ {
        let s = self.scope(scope);
        s.order
            .iter()
            .flat_map(move |name| s.names[name].iter())
            .map(move |id| self.symbol(*id))
    }

    pub fn symbol_count(&self) -> usize {
        self.symbols.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ScalarType;

    fn var(name: &str) -> Declaration {
        Declaration::variable(
            name,
            Type::Scalar(ScalarType::INT64),
            StorageClass::Local,
            Location::new(1, 1),
        )
    }

    fn func(name: &str) -> Declaration {
        Declaration {
            kind: SymbolKind::Function,
            ..var(name)
        }
    }

    #[test]
    fn test_lookup_walks_parents() {
        let mut tree = ScopeTree::new();
        let module = tree.push_scope(ScopeKind::Module, Some(tree.root()));
        let function = tree.push_scope(ScopeKind::Function, Some(module));
        let block = tree.push_scope(ScopeKind::Block, Some(function));
        let x = tree.declare(module, var("x"));
        assert_eq!(tree.lookup(block, "x"), Some(x));
        let inner = tree.declare(function, var("x"));
        assert_eq!(tree.lookup(block, "x"), Some(inner));
        assert_eq!(tree.lookup(block, "missing"), None);
    }

    #[test]
    fn test_overload_sets_collect_functions_only() {
        let mut tree = ScopeTree::new();
        let module = tree.push_scope(ScopeKind::Module, Some(tree.root()));
        let function = tree.push_scope(ScopeKind::Function, Some(module));
        let a = tree.declare(module, func("f"));
        let b = tree.declare(module, func("f"));
        tree.declare(function, var("f"));
        assert_eq!(tree.lookup_all(function, "f"), vec![a, b]);
        let names: Vec<&str> = tree.iter_scope(module).map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["f", "f"]);
    }

    #[test]
    fn test_binding_scope_skips_blocks() {
        let mut tree = ScopeTree::new();
        let module = tree.push_scope(ScopeKind::Module, Some(tree.root()));
        let function = tree.push_scope(ScopeKind::Function, Some(module));
        let block = tree.push_scope(ScopeKind::Block, Some(function));
        let inner = tree.push_scope(ScopeKind::Loop, Some(block));
        assert_eq!(tree.binding_scope(inner), function);
        assert_eq!(tree.binding_scope(module), module);
    }
}
