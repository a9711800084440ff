//! Type inference engine
//!
//! Turns one raw syntax tree into a typed [`TypedModule`]. Analysis of a
//! module is single-threaded; it reads the interfaces of already analyzed
//! imports and never mutates them.
//!
//! Local errors never stop the pass: the offending node gets [`Type::Error`],
//! dependents inherit it silently, and every independent problem is reported
//! as a [`Diagnostic`].

mod calls;
mod declarations;
mod expr;
mod stmt;

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, instrument};

use crate::ast::{self, Location};
use crate::config::CompilerConfig;
use crate::diagnostics::{Diagnostic, DiagnosticCode, Diagnostics, SourceLocation};
use crate::directives::{DirectiveKey, DirectiveTable};
use crate::error::CompileResult;
use crate::instantiate::{InstanceKey, InstantiationCache};
use crate::interface::{InterfaceMap, ModuleEnv, ModuleInterface, RealizedFunction};
use crate::ir::{GlobalConst, NodeId, TypedBody, TypedExpr, TypedExprKind, TypedModule};
use crate::ir::Literal;
use crate::promotion::PromotionPolicy;
use crate::resolver::FunctionDecl;
use crate::symbols::{ScopeId, ScopeKind, ScopeTree, StorageClass, SymbolId};
use crate::types::{AggregateType, Type};

/// Prefix of compiler-generated identifiers
pub const RESERVED_PREFIX: &str = "nv_";

/// Result of analyzing one module
#[derive(Debug)]
pub struct AnalysisOutput {
    /// The typed module; `None` when any error was reported
    pub module: Option<TypedModule>,
    pub interface: ModuleInterface,
    pub diagnostics: Diagnostics,
}

/// Entry point of the inference engine
pub struct Analyzer<'a> {
    config: &'a CompilerConfig,
    interfaces: &'a InterfaceMap,
}

impl<'a> Analyzer<'a> {
    pub fn new(config: &'a CompilerConfig, interfaces: &'a InterfaceMap) -> Self {
        Self { config, interfaces }
    }

    /// Analyze a module whose imports all appear in the interface map
    #[instrument(skip_all, fields(module = %module.name))]
    pub fn analyze(&self, module: &ast::Module) -> CompileResult<AnalysisOutput> {
        ast::validate(module)?;
        let mut ctx = ModuleContext::new(self.config, self.interfaces, module);
        ctx.collect(module);
        ctx.realize_concrete();
        let main = ctx.analyze_main(module);
        Ok(ctx.finish(main))
    }
}

/// What a name refers to at some point of a body
#[derive(Debug, Clone)]
pub(crate) enum NameTarget {
    Variable(SymbolId),
    Functions(Vec<Arc<FunctionDecl>>),
    Aggregate(AggregateType),
    Module(ModuleRef),
    Builtin(crate::builtins::Builtin),
    FloatConst(f64),
    Undefined,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ModuleRef {
    Numpy,
    Math,
    User(String),
}

impl ModuleRef {
    fn from_origin(origin: &str) -> Self {
        match origin {
            "numpy" => ModuleRef::Numpy,
            "math" => ModuleRef::Math,
            other => ModuleRef::User(other.to_string()),
        }
    }
}

/// One realization being analyzed, for recursion checks and diagnostics
#[derive(Debug, Clone)]
pub(crate) struct InstanceFrame {
    pub key: InstanceKey,
    pub emitted_name: String,
    pub generic: bool,
    pub label: String,
    pub call_site: Option<SourceLocation>,
}

/// Per-body analysis state: one function realization or the program body
#[derive(Debug)]
pub(crate) struct BodyCtx {
    pub env: Arc<ModuleEnv>,
    /// Source name of the function; `None` for the program body
    pub function: Option<String>,
    pub scope: ScopeId,
    pub body_scope: ScopeId,
    /// Names assigned anywhere in the body: local throughout
    pub local_names: HashSet<String>,
    pub type_vars: HashMap<String, Type>,
    pub declared_ret: Option<Type>,
    pub returns: Vec<(Option<Type>, Location)>,
    pub loop_vars: Vec<SymbolId>,
    /// Enclosing `(if statement, branch)` pairs, innermost last
    pub branches: Vec<(u32, usize)>,
    pub next_if: u32,
    pub pure: bool,
    /// Variables whose type came from an annotation and never widens
    pub annotated: HashSet<SymbolId>,
}

impl BodyCtx {
    fn new(env: Arc<ModuleEnv>, function: Option<String>, scope: ScopeId) -> Self {
        Self {
            env,
            function,
            scope,
            body_scope: scope,
            local_names: HashSet::new(),
            type_vars: HashMap::new(),
            declared_ret: None,
            returns: Vec::new(),
            loop_vars: Vec::new(),
            branches: Vec::new(),
            next_if: 0,
            pure: false,
            annotated: HashSet::new(),
        }
    }

    pub fn in_function(&self) -> bool {
        self.function.is_some()
    }

    pub fn file(&self) -> &str {
        &self.env.file
    }
}

/// Analysis state of one module
pub(crate) struct ModuleContext<'a> {
    pub config: &'a CompilerConfig,
    pub policy: &'a PromotionPolicy,
    pub interfaces: &'a InterfaceMap,
    pub home: Arc<ModuleEnv>,
    pub symbols: ScopeTree,
    module_scopes: HashMap<String, ScopeId>,
    pub function_decls: HashMap<SymbolId, Arc<FunctionDecl>>,
    /// Source names of constant symbols bound under an alias
    pub const_names: HashMap<SymbolId, String>,
    pub diagnostics: Diagnostics,
    pub directives: DirectiveTable,
    pub cache: Arc<InstantiationCache>,
    pub instances: Vec<InstanceFrame>,
    next_node: u32,
    pub imports_used: BTreeSet<String>,
}

impl<'a> ModuleContext<'a> {
    fn new(config: &'a CompilerConfig, interfaces: &'a InterfaceMap, module: &ast::Module) -> Self {
        Self {
            config,
            policy: &config.promotion,
            interfaces,
            home: Arc::new(ModuleEnv::new(&module.name, &module.file)),
            symbols: ScopeTree::new(),
            module_scopes: HashMap::new(),
            function_decls: HashMap::new(),
            const_names: HashMap::new(),
            diagnostics: Diagnostics::new(),
            directives: DirectiveTable::default(),
            cache: Arc::new(InstantiationCache::new()),
            instances: Vec::new(),
            next_node: 0,
            imports_used: BTreeSet::new(),
        }
    }

    pub fn node(&mut self) -> NodeId {
        let id = NodeId(self.next_node);
        self.next_node += 1;
        id
    }

    pub fn report(&mut self, ctx: &BodyCtx, code: DiagnosticCode, loc: Location, msg: impl Into<String>) {
        let file = ctx.env.file.clone();
        self.report_in(&file, code, loc, msg);
    }

    pub fn report_in(&mut self, file: &str, code: DiagnosticCode, loc: Location, msg: impl Into<String>) {
        let diagnostic = self.diagnostic(file, code, loc, msg);
        self.diagnostics.push(diagnostic);
    }

    /// Build a diagnostic, noting the instantiation it happened in
    pub fn diagnostic(&self, file: &str, code: DiagnosticCode, loc: Location, msg: impl Into<String>) -> Diagnostic {
        let mut diagnostic = Diagnostic::new(code, msg, SourceLocation::new(file, loc));
        if let Some(frame) = self.instances.last() {
            if let (true, Some(site)) = (frame.generic, &frame.call_site) {
                diagnostic = diagnostic.with_related(
                    site.clone(),
                    format!("in instantiation of {} requested here", frame.label),
                );
            }
        }
        diagnostic
    }

    pub fn push_diagnostic(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    /// Poisoned placeholder for a subtree that failed to type
    pub fn error_expr(&mut self, loc: Location) -> TypedExpr {
        TypedExpr {
            id: self.node(),
            kind: TypedExprKind::Literal(Literal::Int(0)),
            ty: Type::Error,
            loc,
        }
    }

    /// Environment of a module analyzed before this one, or this module's own
    pub fn env_of(&self, module: &str) -> Option<Arc<ModuleEnv>> {
        if module == self.home.name {
            return Some(Arc::clone(&self.home));
        }
        self.interfaces.get(module).map(|i| Arc::clone(&i.env))
    }

    /// Module scope of `env`, declaring its module-level names on first use
    pub fn module_scope(&mut self, env: &Arc<ModuleEnv>) -> ScopeId {
        if let Some(scope) = self.module_scopes.get(&env.name) {
            return *scope;
        }
        let root = self.symbols.root();
        let scope = self.symbols.push_scope(ScopeKind::Module, Some(root));
        self.module_scopes.insert(env.name.clone(), scope);
        self.declare_module_names(env, scope);
        scope
    }

    /// Resolve `name` as seen from the current scope of `ctx`
    pub fn resolve_name(&self, ctx: &BodyCtx, name: &str) -> NameTarget {
        use crate::symbols::SymbolKind;
        if let Some(id) = self.symbols.lookup(ctx.scope, name) {
            let symbol = self.symbols.symbol(id);
            return match symbol.kind {
                SymbolKind::Variable => NameTarget::Variable(id),
                SymbolKind::Function => NameTarget::Functions(
                    self.symbols
                        .lookup_all(ctx.scope, name)
                        .into_iter()
                        .filter_map(|sym| self.function_decls.get(&sym).cloned())
                        .collect(),
                ),
                SymbolKind::Type => match &symbol.ty {
                    Type::Aggregate(aggregate) => NameTarget::Aggregate(aggregate.clone()),
                    _ => NameTarget::Undefined,
                },
                SymbolKind::Module => NameTarget::Module(ModuleRef::from_origin(
                    symbol.origin.as_deref().unwrap_or(name),
                )),
            };
        }
        if let Some(imported) = ctx.env.imported.get(name) {
            let builtin = match imported.module.as_str() {
                "numpy" => crate::builtins::numpy(&imported.name)
                    .map(NameTarget::Builtin)
                    .or_else(|| crate::builtins::constant(&imported.name).map(NameTarget::FloatConst)),
                "math" => crate::builtins::math(&imported.name)
                    .map(NameTarget::Builtin)
                    .or_else(|| crate::builtins::constant(&imported.name).map(NameTarget::FloatConst)),
                _ => None,
            };
            if let Some(target) = builtin {
                return target;
            }
        }
        match crate::builtins::python(name) {
            Some(builtin) => NameTarget::Builtin(builtin),
            None => NameTarget::Undefined,
        }
    }

    /// Concrete functions and overloads are realized whether called or not
    fn realize_concrete(&mut self) {
        let home = Arc::clone(&self.home);
        for decls in home.functions.values() {
            for decl in decls {
                if !decl.is_generic() {
                    self.realize_declared(decl);
                }
            }
        }
    }

    fn finish(mut self, main: Option<TypedBody>) -> AnalysisOutput {
        let home = Arc::clone(&self.home);
        let records = self.cache.records();
        let mut realized = HashMap::new();
        let mut functions = Vec::new();
        for record in &records {
            if record.key.module == home.name {
                realized.insert(
                    record.key.clone(),
                    RealizedFunction {
                        emitted_name: record.emitted_name.clone(),
                        params: record.params.clone(),
                        intents: record.intents.clone(),
                        ret: record.ret.clone(),
                    },
                );
            }
            if let Some(function) = &record.function {
                functions.push(function.clone());
            }
        }

        let module_scope = self.module_scope(&home);
        let mut globals = Vec::new();
        for constant in home.constants.values() {
            if let Some(symbol) = self.symbols.lookup(module_scope, &constant.name) {
                globals.push(GlobalConst {
                    name: constant.name.clone(),
                    symbol,
                    ty: constant.ty.clone(),
                    value: constant.value.clone(),
                    loc: constant.loc,
                });
            }
        }

        let mut uses_distribute = self.directives.uses(&DirectiveKey::Distribute)
            || functions
                .iter()
                .any(|f| f.directives.iter().any(|d| d.key == DirectiveKey::Distribute));
        for import in &self.imports_used {
            if let Some(interface) = self.interfaces.get(import) {
                uses_distribute |= interface.uses_distribute;
            }
        }

        let module = TypedModule {
            name: home.name.clone(),
            file: home.file.clone(),
            imports: self.imports_used.iter().cloned().collect(),
            aggregates: home.aggregates.values().cloned().collect(),
            globals,
            functions,
            main,
            directives: std::mem::take(&mut self.directives),
            symbols: std::mem::take(&mut self.symbols),
            uses_distribute,
        };

        if !self.diagnostics.has_errors() {
            if let Some((loc, message)) = crate::ir::verify(&module) {
                self.report_in(
                    &home.file,
                    DiagnosticCode::InternalError,
                    loc,
                    format!("incomplete semantic tree: {}", message),
                );
            }
        }

        let has_errors = self.diagnostics.has_errors();
        debug!(
            functions = module.functions.len(),
            errors = self.diagnostics.error_count(),
            "analysis finished"
        );
        AnalysisOutput {
            module: (!has_errors).then_some(module),
            interface: ModuleInterface {
                env: home,
                realized,
                uses_distribute,
                has_errors,
            },
            diagnostics: self.diagnostics,
        }
    }

    /// Storage class for a new variable of `ctx`
    pub fn local_storage(ctx: &BodyCtx) -> StorageClass {
        if ctx.in_function() {
            StorageClass::Local
        } else {
            StorageClass::ModuleLevel
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_source;
    use crate::types::{Dim, ScalarType};

    pub(crate) fn analyze_source(source: &str) -> AnalysisOutput {
        let module = parse_source(source, "test.py", "test").unwrap();
        let config = CompilerConfig::default();
        let interfaces = InterfaceMap::new();
        Analyzer::new(&config, &interfaces).analyze(&module).unwrap()
    }

    fn codes(output: &AnalysisOutput) -> Vec<DiagnosticCode> {
        output.diagnostics.iter().map(|d| d.code).collect()
    }

    fn local_type(module: &TypedModule, function: &str, name: &str) -> Type {
        let f = module.function(function).unwrap();
        f.body
            .locals
            .iter()
            .find(|l| l.name == name)
            .map(|l| l.ty.clone())
            .unwrap()
    }

    #[test]
    fn test_literal_and_arithmetic_inference() {
        let output = analyze_source(
            "def f(n: int) -> float:\n    x = 1\n    y = x * 2.5\n    z = n // 2\n    return y\n",
        );
        assert!(output.diagnostics.is_empty(), "{:?}", codes(&output));
        let module = output.module.unwrap();
        assert_eq!(local_type(&module, "f", "x"), Type::Scalar(ScalarType::INT64));
        assert_eq!(local_type(&module, "f", "y"), Type::Scalar(ScalarType::FLOAT64));
        assert_eq!(local_type(&module, "f", "z"), Type::Scalar(ScalarType::INT64));
    }

    #[test]
    fn test_widening_before_first_read() {
        let output = analyze_source("def f() -> float:\n    x = 1\n    x = 2.5\n    return x\n");
        assert!(output.diagnostics.is_empty());
        let module = output.module.unwrap();
        assert_eq!(local_type(&module, "f", "x"), Type::Scalar(ScalarType::FLOAT64));
    }

    #[test]
    fn test_no_retyping_after_read() {
        let output = analyze_source(
            "def f() -> int:\n    x = 1\n    y = x + 1\n    x = 2.5\n    return y\n",
        );
        assert_eq!(codes(&output), vec![DiagnosticCode::TypeMismatch]);
        assert!(output.module.is_none());
    }

    #[test]
    fn test_broadcast_result_shape() {
        let output = analyze_source(
            "import numpy as np\n\ndef f():\n    a = np.zeros((3, 4))\n    b = np.ones(4)\n    c = a + b\n",
        );
        assert!(output.diagnostics.is_empty(), "{:?}", codes(&output));
        let module = output.module.unwrap();
        let c = local_type(&module, "f", "c");
        assert_eq!(
            c.as_array().unwrap().shape,
            vec![Dim::Known(3), Dim::Known(4)]
        );
    }

    #[test]
    fn test_shape_mismatch_names_both_shapes() {
        let output = analyze_source(
            "import numpy as np\n\ndef f():\n    a = np.zeros((3, 4))\n    b = np.ones((2, 4))\n    c = a + b\n",
        );
        let diagnostic = output.diagnostics.iter().next().unwrap();
        assert_eq!(diagnostic.code, DiagnosticCode::ShapeMismatch);
        assert!(diagnostic.message.contains("(3, 4)"));
        assert!(diagnostic.message.contains("(2, 4)"));
        assert_eq!(diagnostic.location.line, 6);
    }

    #[test]
    fn test_undeclared_symbol_location() {
        let output = analyze_source("def f() -> int:\n    return y + 1\n");
        let diagnostic = output.diagnostics.iter().next().unwrap();
        assert_eq!(diagnostic.code, DiagnosticCode::UndeclaredSymbol);
        assert_eq!((diagnostic.location.line, diagnostic.location.column), (2, 12));
        assert_eq!(output.diagnostics.error_count(), 1);
    }

    #[test]
    fn test_errors_are_collected_independently() {
        let output = analyze_source(
            "def f() -> int:\n    a = u + 1\n    b = a * 2\n    c = v\n    return 0\n",
        );
        assert_eq!(
            codes(&output),
            vec![DiagnosticCode::UndeclaredSymbol, DiagnosticCode::UndeclaredSymbol]
        );
    }

    #[test]
    fn test_branch_type_conflict() {
        let output = analyze_source(
            "def f(c: bool) -> float:\n    if c:\n        x = 1\n    else:\n        x = 2.5\n    return x\n",
        );
        let diagnostic = output.diagnostics.iter().next().unwrap();
        assert_eq!(diagnostic.code, DiagnosticCode::TypeMismatch);
        assert_eq!(diagnostic.related.len(), 2);
    }

    #[test]
    fn test_module_constants_are_globals() {
        let output = analyze_source("SCALE = 2.0\n\ndef f(x: float) -> float:\n    return x * SCALE\n");
        assert!(output.diagnostics.is_empty());
        let module = output.module.unwrap();
        assert_eq!(module.globals.len(), 1);
        assert!(module.main.is_none());
    }

    #[test]
    fn test_unknown_directive_is_a_warning() {
        let output = analyze_source(
            "def f(n: int) -> int:\n    s = 0\n    #$ unroll 4\n    for i in range(n):\n        s += i\n    return s\n",
        );
        assert_eq!(codes(&output), vec![DiagnosticCode::UnknownDirective]);
        let module = output.module.unwrap();
        assert_eq!(module.directives.iter().count(), 1);
    }
}
