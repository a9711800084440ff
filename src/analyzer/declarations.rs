//! Module-level declarations: imports, classes, constants and function
//! signatures, collected before any body is analyzed.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tracing::trace;

use super::{BodyCtx, ModuleContext, RESERVED_PREFIX};
use crate::ast::{self, Decorator, Expr, ExprKind, FunctionDef, Location, StmtKind, UnaryOp};
use crate::diagnostics::DiagnosticCode;
use crate::directives::Directive;
use crate::interface::{ConstInfo, ImportedName, ModuleEnv};
use crate::ir::Literal;
use crate::resolver::{literal_type, FunctionDecl, ParamPattern, ParamSpec, ReturnSpec, TemplateVar};
use crate::symbols::{Declaration, ScopeId, StorageClass, SymbolKind};
use crate::types::{parse_annotation, AggregateType, FunctionType, Type, TypeAnnotation};

/// Decorators with a meaning; anything else is rejected
const DECORATORS: [&str; 5] = ["types", "template", "pure", "elemental", "directive"];

/// A literal value usable as a default or a module constant
pub(crate) fn literal_value(expr: &Expr) -> Option<Literal> {
    match &expr.kind {
        ExprKind::Int(n) => Some(Literal::Int(*n)),
        ExprKind::Float(x) => Some(Literal::Float(*x)),
        ExprKind::Imag(x) => Some(Literal::Complex(0.0, *x)),
        ExprKind::Bool(b) => Some(Literal::Bool(*b)),
        ExprKind::Unary {
            op: UnaryOp::Neg,
            operand,
        } => match literal_value(operand)? {
            Literal::Int(n) => Some(Literal::Int(-n)),
            Literal::Float(x) => Some(Literal::Float(-x)),
            Literal::Complex(re, im) => Some(Literal::Complex(-re, -im)),
            _ => None,
        },
        _ => None,
    }
}

/// Names bound by assignments and loops anywhere in `stmts`
pub(crate) fn assigned_names(stmts: &[ast::Stmt], out: &mut BTreeSet<String>) {
    fn target_names(target: &Expr, out: &mut BTreeSet<String>) {
        match &target.kind {
            ExprKind::Name(name) => {
                out.insert(name.clone());
            }
            ExprKind::Tuple(items) => items.iter().for_each(|i| target_names(i, out)),
            _ => {}
        }
    }
    for stmt in stmts {
        match &stmt.kind {
            StmtKind::Assign { targets, .. } => targets.iter().for_each(|t| target_names(t, out)),
            StmtKind::AnnAssign { target, .. } | StmtKind::AugAssign { target, .. } => {
                target_names(target, out)
            }
            StmtKind::For { target, body, .. } => {
                target_names(target, out);
                assigned_names(body, out);
            }
            StmtKind::While { body, .. } => assigned_names(body, out),
            StmtKind::If { branches, orelse } => {
                for branch in branches {
                    assigned_names(&branch.body, out);
                }
                assigned_names(orelse, out);
            }
            _ => {}
        }
    }
}

/// `if __name__ == '__main__':`
pub(crate) fn is_main_guard(test: &Expr) -> bool {
    match &test.kind {
        ExprKind::Compare { left, right, .. } => {
            matches!((&left.kind, &right.kind), (ExprKind::Name(n), ExprKind::Str(s)) if n == "__name__" && s == "__main__")
        }
        _ => false,
    }
}

/// Module-level statements in program order, with the main guard inlined
pub(crate) fn program_statements(body: &[ast::Stmt]) -> Vec<&ast::Stmt> {
    let mut out = Vec::new();
    for stmt in body {
        match &stmt.kind {
            StmtKind::If { branches, orelse }
                if branches.len() == 1 && orelse.is_empty() && is_main_guard(&branches[0].test) =>
            {
                out.extend(program_statements(&branches[0].body));
            }
            _ => out.push(stmt),
        }
    }
    out
}

impl<'a> ModuleContext<'a> {
    /// Build the module environment and declare its names
    pub(super) fn collect(&mut self, module: &ast::Module) {
        let mut env = ModuleEnv::new(&module.name, &module.file);
        let top = program_statements(&module.body);

        let mut counts: HashMap<String, usize> = HashMap::new();
        let mut unsafe_names = BTreeSet::new();
        for stmt in &top {
            match &stmt.kind {
                StmtKind::Assign { targets, .. } => {
                    for target in targets {
                        if let Some(name) = target.as_name() {
                            *counts.entry(name.to_string()).or_default() += 1;
                        }
                    }
                }
                StmtKind::AugAssign { target, .. } | StmtKind::AnnAssign { target, .. } => {
                    if let Some(name) = target.as_name() {
                        unsafe_names.insert(name.to_string());
                    }
                }
                StmtKind::For { .. } | StmtKind::While { .. } | StmtKind::If { .. } => {
                    let mut nested = BTreeSet::new();
                    assigned_names(std::slice::from_ref(*stmt), &mut nested);
                    unsafe_names.extend(nested);
                }
                _ => {}
            }
        }

        for stmt in &top {
            match &stmt.kind {
                StmtKind::Import { module: name, alias } => {
                    let bound = alias.clone().unwrap_or_else(|| name.clone());
                    match name.as_str() {
                        "numpy" => {
                            env.numpy_aliases.insert(bound);
                        }
                        "math" => {
                            env.math_aliases.insert(bound);
                        }
                        _ => {
                            if self.interfaces.contains_key(name) {
                                env.module_aliases.insert(bound, name.clone());
                            } else {
                                self.report_in(
                                    &module.file,
                                    DiagnosticCode::UndeclaredSymbol,
                                    stmt.loc,
                                    format!("no module named '{}'", name),
                                );
                            }
                        }
                    }
                }
                StmtKind::FromImport { module: from, names } => {
                    for item in names {
                        if !self.import_exists(from, &item.name) {
                            self.report_in(
                                &module.file,
                                DiagnosticCode::UndeclaredSymbol,
                                item.loc,
                                format!("cannot import name '{}' from '{}'", item.name, from),
                            );
                            continue;
                        }
                        let bound = item.alias.clone().unwrap_or_else(|| item.name.clone());
                        env.imported.insert(
                            bound,
                            ImportedName {
                                module: from.clone(),
                                name: item.name.clone(),
                                loc: item.loc,
                            },
                        );
                    }
                }
                StmtKind::ClassDef(class) => {
                    if let Some(aggregate) = self.collect_class(&module.file, class) {
                        env.aggregates.insert(aggregate.name.clone(), aggregate);
                    }
                }
                StmtKind::Assign { targets, value } => {
                    for target in targets {
                        let Some(name) = target.as_name() else { continue };
                        let constant = targets.len() == 1
                            && counts.get(name) == Some(&1)
                            && !unsafe_names.contains(name);
                        match literal_value(value).filter(|_| constant) {
                            Some(literal) => {
                                env.constants.insert(
                                    name.to_string(),
                                    ConstInfo {
                                        name: name.to_string(),
                                        ty: literal_type(&literal, self.policy),
                                        value: literal,
                                        loc: target.loc,
                                    },
                                );
                            }
                            _ => {
                                env.module_vars.insert(name.to_string());
                            }
                        }
                    }
                }
                _ => {}
            }
        }
        env.module_vars.extend(unsafe_names);

        // Signatures need the class table, so functions come last
        for stmt in &top {
            if let StmtKind::FunctionDef(def) = &stmt.kind {
                let decls = self.collect_function(&env, &module.file, def, &stmt.directives);
                for mut decl in decls {
                    if let Some(existing) = self.duplicate_of(&env, &decl) {
                        let first = existing.loc;
                        let diagnostic = self
                            .diagnostic(
                                &module.file,
                                DiagnosticCode::OverloadAmbiguous,
                                decl.loc,
                                format!("'{}' is redefined with the same signature", decl.signature()),
                            )
                            .with_related(
                                crate::diagnostics::SourceLocation::new(&module.file, first),
                                "first defined here",
                            );
                        self.push_diagnostic(diagnostic);
                        continue;
                    }
                    let set = env.functions.entry(decl.name.clone()).or_default();
                    decl.overload = set.len();
                    set.push(Arc::new(decl));
                }
            }
        }

        for name in env.functions.keys() {
            let clash = env.aggregates.contains_key(name)
                || env.constants.contains_key(name)
                || env.module_vars.contains(name)
                || env.imported.contains_key(name);
            if clash {
                let loc = env.functions[name][0].loc;
                self.report_in(
                    &module.file,
                    DiagnosticCode::UnsupportedConstruct,
                    loc,
                    format!("name '{}' is bound to a function and to another object", name),
                );
            }
        }

        trace!(
            functions = env.functions.len(),
            constants = env.constants.len(),
            "collected declarations"
        );
        self.home = Arc::new(env);
        let home = Arc::clone(&self.home);
        self.module_scope(&home);
    }

    fn import_exists(&self, module: &str, name: &str) -> bool {
        match module {
            "numpy" => {
                crate::builtins::numpy(name).is_some() || crate::builtins::constant(name).is_some()
            }
            "math" => {
                crate::builtins::math(name).is_some() || crate::builtins::constant(name).is_some()
            }
            "dataclasses" => name == "dataclass",
            m if m == "decorators" || m.ends_with(".decorators") => {
                matches!(name, "types" | "template" | "pure" | "elemental" | "directive")
            }
            _ => self.export(module, name, 0).is_some(),
        }
    }

    /// What module `module` exports under `name`, following re-exports
    pub(super) fn export(&self, module: &str, name: &str, depth: usize) -> Option<Export> {
        let interface = self.interfaces.get(module)?;
        let env = &interface.env;
        if let Some(set) = env.functions.get(name) {
            return Some(Export::Functions(set.clone()));
        }
        if let Some(aggregate) = env.aggregates.get(name) {
            return Some(Export::Aggregate(aggregate.clone()));
        }
        if let Some(constant) = env.constants.get(name) {
            return Some(Export::Constant(module.to_string(), constant.clone()));
        }
        match env.imported.get(name) {
            Some(imported) if depth < 8 => self.export(&imported.module, &imported.name, depth + 1),
            _ => None,
        }
    }

    /// Declare the module-level names of `env` into its module scope
    pub(super) fn declare_module_names(&mut self, env: &Arc<ModuleEnv>, scope: ScopeId) {
        for constant in env.constants.values() {
            self.declare_constant(scope, &constant.name, &env.name, constant);
        }
        for aggregate in env.aggregates.values() {
            self.declare_aggregate(scope, &aggregate.name, &env.name, aggregate, Location::default());
        }
        for decls in env.functions.values() {
            for decl in decls {
                self.declare_function(scope, &decl.name, decl);
            }
        }
        for alias in &env.numpy_aliases {
            self.declare_module_symbol(scope, alias, "numpy");
        }
        for alias in &env.math_aliases {
            self.declare_module_symbol(scope, alias, "math");
        }
        for (alias, module) in &env.module_aliases {
            self.declare_module_symbol(scope, alias, module);
        }
        for (bound, imported) in &env.imported {
            match self.export(&imported.module, &imported.name, 0) {
                Some(Export::Functions(decls)) => {
                    for decl in &decls {
                        self.declare_function(scope, bound, decl);
                    }
                }
                Some(Export::Aggregate(aggregate)) => {
                    self.declare_aggregate(scope, bound, &imported.module, &aggregate, imported.loc);
                }
                Some(Export::Constant(origin, constant)) => {
                    self.declare_constant(scope, bound, &origin, &constant);
                }
                None => {}
            }
        }
    }

    fn declare_constant(&mut self, scope: ScopeId, bound: &str, origin: &str, constant: &ConstInfo) {
        let id = self.symbols.declare(
            scope,
            Declaration {
                name: bound.to_string(),
                kind: SymbolKind::Variable,
                ty: constant.ty.clone(),
                mutable: false,
                storage: StorageClass::Global,
                loc: constant.loc,
                origin: Some(origin.to_string()),
            },
        );
        self.const_names.insert(id, constant.name.clone());
    }

    fn declare_aggregate(
        &mut self,
        scope: ScopeId,
        bound: &str,
        origin: &str,
        aggregate: &AggregateType,
        loc: Location,
    ) {
        self.symbols.declare(
            scope,
            Declaration {
                name: bound.to_string(),
                kind: SymbolKind::Type,
                ty: Type::Aggregate(aggregate.clone()),
                mutable: false,
                storage: StorageClass::Global,
                loc,
                origin: Some(origin.to_string()),
            },
        );
    }

    fn declare_function(&mut self, scope: ScopeId, bound: &str, decl: &Arc<FunctionDecl>) {
        let params = decl
            .params
            .iter()
            .map(|p| match &p.pattern {
                ParamPattern::Concrete(ty) => ty.clone(),
                ParamPattern::Var { .. } => Type::Unknown,
            })
            .collect();
        let ret = match &decl.ret {
            ReturnSpec::Concrete(ty) => ty.clone(),
            _ => Type::Unknown,
        };
        let id = self.symbols.declare(
            scope,
            Declaration {
                name: bound.to_string(),
                kind: SymbolKind::Function,
                ty: Type::Function(FunctionType {
                    params,
                    ret: Box::new(ret),
                    generic: decl.is_generic(),
                }),
                mutable: false,
                storage: StorageClass::Global,
                loc: decl.loc,
                origin: Some(decl.module.clone()),
            },
        );
        self.function_decls.insert(id, Arc::clone(decl));
    }

    fn declare_module_symbol(&mut self, scope: ScopeId, bound: &str, module: &str) {
        self.symbols.declare(
            scope,
            Declaration {
                name: bound.to_string(),
                kind: SymbolKind::Module,
                ty: Type::Void,
                mutable: false,
                storage: StorageClass::Global,
                loc: Location::default(),
                origin: Some(module.to_string()),
            },
        );
    }

    fn collect_class(&mut self, file: &str, class: &ast::ClassDef) -> Option<AggregateType> {
        for decorator in &class.decorators {
            if decorator.name != "dataclass" {
                self.report_in(
                    file,
                    DiagnosticCode::UnsupportedConstruct,
                    decorator.loc,
                    format!("class decorator '@{}' is not supported", decorator.name),
                );
            }
        }
        let mut fields: Vec<(String, Type)> = Vec::new();
        let mut ok = true;
        for stmt in &class.body {
            match &stmt.kind {
                StmtKind::AnnAssign {
                    target,
                    annotation,
                    value: None,
                } if target.as_name().is_some() => {
                    let name = target.as_name().unwrap_or_default().to_string();
                    match parse_annotation(&annotation.text, &|_| None, &[]) {
                        Ok(TypeAnnotation::Concrete(ty @ Type::Scalar(_))) => {
                            if fields.iter().any(|(f, _)| *f == name) {
                                self.report_in(
                                    file,
                                    DiagnosticCode::UnsupportedConstruct,
                                    stmt.loc,
                                    format!("field '{}' declared twice in class '{}'", name, class.name),
                                );
                                ok = false;
                            }
                            fields.push((name, ty));
                        }
                        Ok(_) => {
                            self.report_in(
                                file,
                                DiagnosticCode::UnsupportedConstruct,
                                annotation.loc,
                                format!(
                                    "field '{}' of class '{}' must have a scalar type, not '{}'",
                                    name, class.name, annotation.text
                                ),
                            );
                            ok = false;
                        }
                        Err(message) => {
                            self.report_in(file, DiagnosticCode::UnsupportedConstruct, annotation.loc, message);
                            ok = false;
                        }
                    }
                }
                StmtKind::Pass => {}
                StmtKind::Expr(Expr {
                    kind: ExprKind::Str(_),
                    ..
                }) => {}
                _ => {
                    self.report_in(
                        file,
                        DiagnosticCode::UnsupportedConstruct,
                        stmt.loc,
                        format!(
                            "class bodies may only declare annotated fields; found a {} in '{}'",
                            stmt.describe(),
                            class.name
                        ),
                    );
                    ok = false;
                }
            }
        }
        ok.then(|| AggregateType {
            name: class.name.clone(),
            fields,
        })
    }

    /// One declaration per `@types` decorator, or one from the annotations
    fn collect_function(
        &mut self,
        env: &ModuleEnv,
        file: &str,
        def: &Arc<FunctionDef>,
        raw_directives: &[ast::RawDirective],
    ) -> Vec<FunctionDecl> {
        let mut signatures: Vec<(Vec<Option<String>>, Option<String>, Location)> = Vec::new();
        let mut template_vars = Vec::new();
        let mut pure = false;
        let mut elemental = false;
        let mut directives = Vec::new();
        let mut failed = false;

        for decorator in &def.decorators {
            match decorator.name.as_str() {
                "types" => match self.types_decorator(file, def, decorator) {
                    Some(signature) => signatures.push(signature),
                    None => failed = true,
                },
                "template" => match self.template_decorator(file, env, decorator) {
                    Some(var) => template_vars.push(var),
                    None => failed = true,
                },
                "pure" => pure = true,
                "elemental" => elemental = true,
                "directive" => match decorator.args.first().map(|a| &a.kind) {
                    Some(ExprKind::Str(text)) => {
                        if let Some(d) = self.function_directive(file, text, decorator.loc) {
                            directives.push(d);
                        }
                    }
                    _ => {
                        self.report_in(
                            file,
                            DiagnosticCode::UnsupportedConstruct,
                            decorator.loc,
                            "@directive expects one string argument",
                        );
                    }
                },
                other => {
                    self.report_in(
                        file,
                        DiagnosticCode::UnsupportedConstruct,
                        decorator.loc,
                        format!(
                            "unknown decorator '@{}'; supported decorators are {}",
                            other,
                            DECORATORS.join(", ")
                        ),
                    );
                }
            }
        }
        for raw in raw_directives {
            if let Some(d) = self.function_directive(file, &raw.text, raw.loc) {
                directives.push(d);
            }
        }
        if failed {
            return Vec::new();
        }
        if signatures.is_empty() {
            let params = def
                .params
                .iter()
                .map(|p| p.annotation.as_ref().map(|a| a.text.clone()))
                .collect();
            signatures.push((params, def.returns.as_ref().map(|a| a.text.clone()), def.loc));
        }

        let var_names: Vec<String> = template_vars.iter().map(|v: &TemplateVar| v.name.clone()).collect();
        let aggregates = &env.aggregates;
        let lookup = |name: &str| aggregates.get(name).map(|a| Type::Aggregate(a.clone()));
        let mut out = Vec::new();
        'signatures: for (annotations, returns, loc) in signatures {
            let mut params = Vec::new();
            for (param, annotation) in def.params.iter().zip(annotations) {
                if param.name.starts_with(RESERVED_PREFIX) {
                    self.report_in(
                        file,
                        DiagnosticCode::UnsupportedConstruct,
                        param.loc,
                        format!("names starting with '{}' are reserved", RESERVED_PREFIX),
                    );
                    continue 'signatures;
                }
                let pattern = match annotation {
                    None => ParamPattern::Var {
                        name: format!("<{}>", param.name),
                        array: None,
                    },
                    Some(text) => match parse_annotation(&text, &lookup, &var_names) {
                        Ok(TypeAnnotation::Concrete(ty)) => ParamPattern::Concrete(ty),
                        Ok(TypeAnnotation::Var { name, array }) => ParamPattern::Var { name, array },
                        Err(message) => {
                            self.report_in(file, DiagnosticCode::UnsupportedConstruct, param.loc, message);
                            continue 'signatures;
                        }
                    },
                };
                let default = match &param.default {
                    None => None,
                    Some(expr) => match literal_value(expr) {
                        Some(value) => Some(value),
                        None => {
                            self.report_in(
                                file,
                                DiagnosticCode::UnsupportedConstruct,
                                expr.loc,
                                format!("default of parameter '{}' must be a literal", param.name),
                            );
                            continue 'signatures;
                        }
                    },
                };
                params.push(ParamSpec {
                    name: param.name.clone(),
                    pattern,
                    default,
                    loc: param.loc,
                });
            }
            let ret = match returns.as_deref() {
                None => ReturnSpec::Inferred,
                Some("None") => ReturnSpec::Concrete(Type::Void),
                Some(text) => match parse_annotation(text, &lookup, &var_names) {
                    Ok(TypeAnnotation::Concrete(ty)) => ReturnSpec::Concrete(ty),
                    Ok(TypeAnnotation::Var { name, array: None }) => ReturnSpec::Var(name),
                    Ok(TypeAnnotation::Var { .. }) => {
                        self.report_in(
                            file,
                            DiagnosticCode::UnsupportedConstruct,
                            def.loc,
                            format!("return annotation '{}' is not supported", text),
                        );
                        continue 'signatures;
                    }
                    Err(message) => {
                        self.report_in(file, DiagnosticCode::UnsupportedConstruct, def.loc, message);
                        continue 'signatures;
                    }
                },
            };
            out.push(FunctionDecl {
                name: def.name.clone(),
                module: env.name.clone(),
                overload: 0,
                def: Arc::clone(def),
                params,
                ret,
                template_vars: template_vars.clone(),
                pure,
                elemental,
                directives: directives.clone(),
                loc,
            });
        }
        out
    }

    fn types_decorator(
        &mut self,
        file: &str,
        def: &FunctionDef,
        decorator: &Decorator,
    ) -> Option<(Vec<Option<String>>, Option<String>, Location)> {
        let mut annotations = Vec::new();
        for arg in &decorator.args {
            match &arg.kind {
                ExprKind::Str(text) => annotations.push(Some(text.clone())),
                _ => {
                    self.report_in(
                        file,
                        DiagnosticCode::UnsupportedConstruct,
                        arg.loc,
                        "@types arguments must be type strings",
                    );
                    return None;
                }
            }
        }
        if annotations.len() != def.params.len() {
            self.report_in(
                file,
                DiagnosticCode::TypeMismatch,
                decorator.loc,
                format!(
                    "@types gives {} types for the {} parameters of '{}'",
                    annotations.len(),
                    def.params.len(),
                    def.name
                ),
            );
            return None;
        }
        let mut results = None;
        for keyword in &decorator.keywords {
            match (keyword.name.as_str(), &keyword.value.kind) {
                ("results", ExprKind::Str(text)) => results = Some(text.clone()),
                _ => {
                    self.report_in(
                        file,
                        DiagnosticCode::UnsupportedConstruct,
                        keyword.loc,
                        format!("unsupported @types keyword '{}'", keyword.name),
                    );
                    return None;
                }
            }
        }
        let results = results.or_else(|| def.returns.as_ref().map(|a| a.text.clone()));
        Some((annotations, results, decorator.loc))
    }

    fn template_decorator(
        &mut self,
        file: &str,
        env: &ModuleEnv,
        decorator: &Decorator,
    ) -> Option<TemplateVar> {
        let mut name = None;
        let mut options: Option<&Vec<Expr>> = None;
        for (i, arg) in decorator.args.iter().enumerate() {
            match (i, &arg.kind) {
                (0, ExprKind::Str(text)) => name = Some(text.clone()),
                (1, ExprKind::List(items)) => options = Some(items),
                _ => {}
            }
        }
        for keyword in &decorator.keywords {
            match (keyword.name.as_str(), &keyword.value.kind) {
                ("name", ExprKind::Str(text)) => name = Some(text.clone()),
                ("types", ExprKind::List(items)) => options = Some(items),
                _ => {}
            }
        }
        let Some(name) = name else {
            self.report_in(
                file,
                DiagnosticCode::UnsupportedConstruct,
                decorator.loc,
                "@template needs a variable name and a list of types",
            );
            return None;
        };
        let lookup = |n: &str| env.aggregates.get(n).map(|a| Type::Aggregate(a.clone()));
        let mut types = Vec::new();
        for option in options.map(Vec::as_slice).unwrap_or(&[]) {
            let parsed = match &option.kind {
                ExprKind::Str(text) => parse_annotation(text, &lookup, &[]),
                _ => Err("@template types must be type strings".to_string()),
            };
            match parsed {
                Ok(TypeAnnotation::Concrete(ty)) => types.push(ty),
                Ok(TypeAnnotation::Var { .. }) => {}
                Err(message) => {
                    self.report_in(file, DiagnosticCode::UnsupportedConstruct, option.loc, message);
                    return None;
                }
            }
        }
        Some(TemplateVar {
            name,
            options: types,
        })
    }

    /// Parse a directive attached to a function; only `simd` applies there
    fn function_directive(&mut self, file: &str, text: &str, loc: Location) -> Option<Directive> {
        let directive = match Directive::parse(text, loc) {
            Ok(d) => d,
            Err(message) => {
                self.report_in(file, DiagnosticCode::UnknownDirective, loc, message);
                return None;
            }
        };
        if !directive.key.is_known() {
            self.report_in(
                file,
                DiagnosticCode::UnknownDirective,
                loc,
                format!("unknown directive '{}' is passed through unchanged", directive.key),
            );
            return Some(directive);
        }
        if directive.key != crate::directives::DirectiveKey::Simd {
            self.report_in(
                file,
                DiagnosticCode::MisplacedDirective,
                loc,
                format!("directive '{}' must precede a loop; dropped", directive.key),
            );
            return None;
        }
        Some(directive)
    }

    /// A previous overload with exactly the same parameter patterns
    fn duplicate_of(&self, env: &ModuleEnv, decl: &FunctionDecl) -> Option<Arc<FunctionDecl>> {
        env.functions.get(&decl.name)?.iter().find_map(|other| {
            let same = other.params.len() == decl.params.len()
                && other
                    .params
                    .iter()
                    .zip(&decl.params)
                    .all(|(a, b)| a.pattern == b.pattern);
            same.then(|| Arc::clone(other))
        })
    }

    /// Body context of the program made of the module-level statements
    pub(super) fn program_ctx(&mut self) -> BodyCtx {
        let home = Arc::clone(&self.home);
        let module_scope = self.module_scope(&home);
        let scope = self
            .symbols
            .push_scope(crate::symbols::ScopeKind::Function, Some(module_scope));
        let mut ctx = BodyCtx::new(home, None, scope);
        ctx.local_names = ctx.env.module_vars.iter().cloned().collect();
        ctx
    }
}

/// A name exported by an analyzed module
#[derive(Debug, Clone)]
pub(crate) enum Export {
    Functions(Vec<Arc<FunctionDecl>>),
    Aggregate(AggregateType),
    /// Defining module and the constant
    Constant(String, ConstInfo),
}

#[cfg(test)]
mod tests {
    use super::super::tests::analyze_source;
    use super::*;
    use crate::types::ScalarType;

    #[test]
    fn test_types_decorator_makes_overloads() {
        let output = analyze_source(
            "@types('int', 'int')\n@types('float', 'float')\ndef add(a, b):\n    return a + b\n",
        );
        assert!(output.diagnostics.is_empty());
        let module = output.module.unwrap();
        let names: Vec<&str> = module.functions.iter().map(|f| f.emitted_name.as_str()).collect();
        assert_eq!(names, vec!["add_i64_i64", "add_f64_f64"]);
    }

    #[test]
    fn test_classes_become_aggregates() {
        let output = analyze_source(
            "class Point:\n    x: float\n    y: float\n\ndef norm2(p: Point) -> float:\n    return p.x * p.x + p.y * p.y\n",
        );
        assert!(output.diagnostics.is_empty());
        let module = output.module.unwrap();
        assert_eq!(module.aggregates.len(), 1);
        assert_eq!(
            module.aggregates[0].field("y").map(|(i, t)| (i, t.clone())),
            Some((1, Type::Scalar(ScalarType::FLOAT64)))
        );
    }

    #[test]
    fn test_unknown_decorator_is_rejected() {
        let output = analyze_source("@inline\ndef f(x: int) -> int:\n    return x\n");
        let first = output.diagnostics.iter().next().unwrap();
        assert_eq!(first.code, DiagnosticCode::UnsupportedConstruct);
        assert!(first.message.contains("@inline"));
    }

    #[test]
    fn test_constant_detection() {
        let mut names = BTreeSet::new();
        let module = crate::parser::parse_source("n = 3\nfor i in range(n):\n    k = i\n", "t.py", "t")
            .unwrap();
        assigned_names(&module.body, &mut names);
        assert_eq!(
            names.into_iter().collect::<Vec<_>>(),
            vec!["i".to_string(), "k".to_string(), "n".to_string()]
        );
        assert_eq!(literal_value(&crate::ast::Expr::new(ExprKind::Int(4), Location::new(1, 1))), Some(Literal::Int(4)));
    }
}
