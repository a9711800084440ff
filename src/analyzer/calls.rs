//! Calls: overload resolution, realization of function instances, and the
//! builtin library.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::{debug, trace};

use super::declarations::{assigned_names, Export};
use super::expr::with_element;
use super::{BodyCtx, InstanceFrame, ModuleContext, ModuleRef, NameTarget};
use crate::ast::{BinOp, CmpOp, Expr, ExprKind, Keyword, Location};
use crate::builtins::{self, Builtin, CastTarget, Creation};
use crate::diagnostics::{DiagnosticCode, SourceLocation};
use crate::instantiate::{InstanceKey, InstanceRecord};
use crate::interface::{ModuleEnv, RealizedFunction};
use crate::ir::{
    FunctionOrigin, FunctionRef, Intent, Intrinsic, Literal, Reduction, TypedExpr, TypedExprKind,
    TypedFunction, TypedParam,
};
use crate::resolver::{self, ArgSlot, CallSite, FunctionDecl, ParamPattern, Resolution, ReturnSpec};
use crate::symbols::{Declaration, ScopeKind, StorageClass};
use crate::types::{AggregateType, Dim, DimExpr, Order, ScalarType, Type};

/// Nested realizations allowed before giving up on a runaway generic
const MAX_INSTANTIATION_DEPTH: usize = 64;

const CREATION_ARGS: [&str; 3] = ["shape", "dtype", "order"];
const FULL_ARGS: [&str; 4] = ["shape", "fill_value", "dtype", "order"];

impl<'a> ModuleContext<'a> {
    pub(super) fn analyze_call(
        &mut self,
        ctx: &BodyCtx,
        func: &Expr,
        args: &[Expr],
        keywords: &[Keyword],
        loc: Location,
    ) -> TypedExpr {
        let label = func.dotted_name().unwrap_or_else(|| "<expression>".to_string());
        match &func.kind {
            ExprKind::Name(name) => match self.resolve_name(ctx, name) {
                NameTarget::Functions(decls) => self.user_call(ctx, &label, &decls, args, keywords, loc),
                NameTarget::Aggregate(aggregate) => self.construct(ctx, &aggregate, args, keywords, loc),
                NameTarget::Builtin(builtin) => self.builtin_call(ctx, builtin, &label, args, keywords, loc),
                NameTarget::Module(_) => {
                    self.mismatch(ctx, func.loc, format!("module '{}' is not callable", name))
                }
                NameTarget::Variable(_) | NameTarget::FloatConst(_) | NameTarget::Undefined => {
                    let value = self.analyze_name(ctx, name, func.loc);
                    if value.ty.is_error() {
                        return value;
                    }
                    self.mismatch(
                        ctx,
                        func.loc,
                        format!("'{}' of type {} is not callable", name, value.ty),
                    )
                }
            },
            ExprKind::Attribute { value, attr } => {
                if let Some(base) = value.as_name() {
                    match self.resolve_name(ctx, base) {
                        NameTarget::Module(ModuleRef::Numpy) => {
                            return match builtins::numpy(attr) {
                                Some(builtin) => self.builtin_call(ctx, builtin, &label, args, keywords, loc),
                                None => self.library_missing(ctx, "numpy", attr, func.loc),
                            };
                        }
                        NameTarget::Module(ModuleRef::Math) => {
                            return match builtins::math(attr) {
                                Some(builtin) => self.builtin_call(ctx, builtin, &label, args, keywords, loc),
                                None => self.library_missing(ctx, "math", attr, func.loc),
                            };
                        }
                        NameTarget::Module(ModuleRef::User(module)) => {
                            return match self.export(&module, attr, 0) {
                                Some(Export::Functions(decls)) => {
                                    self.user_call(ctx, &label, &decls, args, keywords, loc)
                                }
                                Some(Export::Aggregate(aggregate)) => {
                                    self.construct(ctx, &aggregate, args, keywords, loc)
                                }
                                Some(Export::Constant(..)) => {
                                    self.mismatch(ctx, func.loc, format!("'{}' is not callable", label))
                                }
                                None => {
                                    self.report(
                                        ctx,
                                        DiagnosticCode::UndeclaredSymbol,
                                        func.loc,
                                        format!("module '{}' has no attribute '{}'", module, attr),
                                    );
                                    self.error_expr(loc)
                                }
                            };
                        }
                        _ => {}
                    }
                }
                self.method_call(ctx, value, attr, args, keywords, loc)
            }
            _ => {
                self.report(
                    ctx,
                    DiagnosticCode::UnsupportedConstruct,
                    func.loc,
                    "only named functions can be called",
                );
                self.error_expr(loc)
            }
        }
    }

    fn library_missing(&mut self, ctx: &BodyCtx, module: &str, attr: &str, loc: Location) -> TypedExpr {
        self.report(
            ctx,
            DiagnosticCode::UnsupportedConstruct,
            loc,
            format!("'{}.{}' is not supported", module, attr),
        );
        self.error_expr(loc)
    }

    /// Call of a user function or overload set
    fn user_call(
        &mut self,
        ctx: &BodyCtx,
        label: &str,
        decls: &[Arc<FunctionDecl>],
        args: &[Expr],
        keywords: &[Keyword],
        loc: Location,
    ) -> TypedExpr {
        let positional: Vec<TypedExpr> = args.iter().map(|a| self.analyze_expr(ctx, a)).collect();
        let named: Vec<(String, TypedExpr)> = keywords
            .iter()
            .map(|k| (k.name.clone(), self.analyze_expr(ctx, &k.value)))
            .collect();
        if positional.iter().chain(named.iter().map(|(_, e)| e)).any(|e| e.ty.is_error()) {
            return self.error_expr(loc);
        }
        let positional_types: Vec<Type> = positional.iter().map(|e| e.ty.clone()).collect();
        let keyword_types: Vec<(String, Type)> =
            named.iter().map(|(n, e)| (n.clone(), e.ty.clone())).collect();
        let candidates: Vec<&FunctionDecl> = decls.iter().map(|d| d.as_ref()).collect();
        let site = CallSite {
            positional: &positional_types,
            keywords: &keyword_types,
        };

        let binding = match resolver::resolve(&candidates, &site, self.policy) {
            Resolution::Match(binding) => binding,
            Resolution::NotFound(rejections) => {
                let arguments = argument_list(&positional_types, &keyword_types);
                let message = if decls.len() > 1 {
                    format!("no overload of '{}' matches arguments ({})", label, arguments)
                } else {
                    format!("no matching signature for call to '{}' with arguments ({})", label, arguments)
                };
                let mut diagnostic =
                    self.diagnostic(ctx.file(), DiagnosticCode::OverloadNotFound, loc, message);
                for rejection in rejections {
                    let decl = &decls[rejection.candidate];
                    diagnostic = diagnostic.with_related(
                        self.decl_location(decl),
                        format!("candidate {}: {}", decl.signature(), rejection.reason),
                    );
                }
                self.push_diagnostic(diagnostic);
                return self.error_expr(loc);
            }
            Resolution::Ambiguous(indices) => {
                let arguments = argument_list(&positional_types, &keyword_types);
                let mut diagnostic = self.diagnostic(
                    ctx.file(),
                    DiagnosticCode::OverloadAmbiguous,
                    loc,
                    format!("call to '{}' with arguments ({}) is ambiguous", label, arguments),
                );
                for index in indices {
                    let decl = &decls[index];
                    diagnostic = diagnostic
                        .with_related(self.decl_location(decl), format!("candidate {}", decl.signature()));
                }
                self.push_diagnostic(diagnostic);
                return self.error_expr(loc);
            }
        };

        let decl = Arc::clone(&decls[binding.candidate]);
        let key = InstanceKey {
            module: decl.module.clone(),
            function: decl.name.clone(),
            overload: decl.overload,
            args: binding.param_types.clone(),
        };
        let call_site = self.call_site(ctx, loc);
        let Some((realized, defined_in)) = self.realize(&decl, key, &binding.type_vars, Some(call_site)) else {
            return self.error_expr(loc);
        };

        let mut positional: Vec<Option<TypedExpr>> = positional.into_iter().map(Some).collect();
        let mut named: Vec<Option<TypedExpr>> = named.into_iter().map(|(_, e)| Some(e)).collect();
        let mut call_args = Vec::with_capacity(binding.slots.len());
        for (index, slot) in binding.slots.iter().enumerate() {
            let arg = match slot {
                ArgSlot::Positional(k) => positional.get_mut(*k).and_then(Option::take),
                ArgSlot::Keyword(k) => named.get_mut(*k).and_then(Option::take),
                ArgSlot::Default => decl.params[index].default.clone().map(|value| {
                    let ty = resolver::literal_type(&value, self.policy);
                    self.literal(value, ty, loc)
                }),
            };
            let (Some(arg), Some(param_ty)) = (arg, realized.params.get(index)) else {
                self.report(
                    ctx,
                    DiagnosticCode::InternalError,
                    loc,
                    format!("argument {} of call to '{}' could not be bound", index, label),
                );
                return self.error_expr(loc);
            };
            if realized.intents.get(index) == Some(&Intent::InOut) {
                if let TypedExprKind::Var(var) = &arg.kind {
                    let root = self.alias_root(var.symbol);
                    if ctx.pure && self.symbols.symbol(root).storage == StorageClass::Parameter {
                        self.report(
                            ctx,
                            DiagnosticCode::UnsupportedConstruct,
                            arg.loc,
                            format!(
                                "pure function passes parameter '{}' to '{}', which modifies it",
                                var.name, label
                            ),
                        );
                        return self.error_expr(loc);
                    }
                    self.mark_written(var.symbol);
                }
            }
            let param_ty = param_ty.clone();
            call_args.push(self.cast_node(arg, &param_ty));
        }

        let ty = realized.ret.clone();
        self.node_of(
            TypedExprKind::Call {
                callee: FunctionRef {
                    name: decl.name.clone(),
                    emitted_name: realized.emitted_name,
                    module: defined_in,
                },
                args: call_args,
            },
            ty,
            loc,
        )
    }

    fn decl_location(&self, decl: &FunctionDecl) -> SourceLocation {
        let file = self
            .env_of(&decl.module)
            .map(|env| env.file.clone())
            .unwrap_or_else(|| decl.module.clone());
        SourceLocation::new(&file, decl.loc)
    }

    fn report_site(
        &mut self,
        site: Option<&SourceLocation>,
        decl: &FunctionDecl,
        code: DiagnosticCode,
        message: String,
    ) {
        let (file, loc) = match site {
            Some(site) => (site.file.clone(), Location::new(site.line, site.column)),
            None => (self.decl_location(decl).file, decl.loc),
        };
        self.report_in(&file, code, loc, message);
    }

    /// Concrete functions are realized with their declared parameter types
    pub(super) fn realize_declared(&mut self, decl: &Arc<FunctionDecl>) {
        let args = decl
            .params
            .iter()
            .filter_map(|p| match &p.pattern {
                ParamPattern::Concrete(ty) => Some(ty.clone()),
                ParamPattern::Var { .. } => None,
            })
            .collect();
        let key = InstanceKey {
            module: decl.module.clone(),
            function: decl.name.clone(),
            overload: decl.overload,
            args,
        };
        self.realize(decl, key, &BTreeMap::new(), None);
    }

    /// Signature of the realization of `decl` for `key`, analyzing its body
    /// on first request. Also returns the module whose code defines it.
    fn realize(
        &mut self,
        decl: &Arc<FunctionDecl>,
        key: InstanceKey,
        type_vars: &BTreeMap<String, Type>,
        call_site: Option<SourceLocation>,
    ) -> Option<(RealizedFunction, String)> {
        let home = self.home.name.clone();
        if decl.module != home {
            let interface = Arc::clone(self.interfaces.get(&decl.module)?);
            if interface.has_errors {
                return None;
            }
            if let Some(realized) = interface.realized(&key) {
                self.imports_used.insert(decl.module.clone());
                return Some((realized.clone(), decl.module.clone()));
            }
            if !decl.is_generic() {
                self.report_site(
                    call_site.as_ref(),
                    decl,
                    DiagnosticCode::InternalError,
                    format!("module '{}' did not realize '{}'", decl.module, decl.name),
                );
                return None;
            }
        }
        let env = self.env_of(&decl.module)?;

        if let Some(record) = self.cache.get(&key) {
            return finished(&record, &home);
        }
        if let Some(frame) = self.instances.iter().find(|f| f.key == key) {
            let emitted_name = frame.emitted_name.clone();
            let generic = frame.generic;
            let ret = match &decl.ret {
                ReturnSpec::Concrete(ty) => Some(ty.clone()),
                ReturnSpec::Var(name) => type_vars.get(name).cloned(),
                ReturnSpec::Inferred => None,
            };
            let Some(ret) = ret else {
                self.report_site(
                    call_site.as_ref(),
                    decl,
                    if generic {
                        DiagnosticCode::GenericInstantiation
                    } else {
                        DiagnosticCode::UnsupportedConstruct
                    },
                    format!("recursive function '{}' needs a return annotation", decl.name),
                );
                return None;
            };
            trace!(function = %decl.name, "recursive call");
            return Some((
                RealizedFunction {
                    emitted_name,
                    params: key.args.clone(),
                    intents: vec![Intent::In; key.args.len()],
                    ret,
                },
                home,
            ));
        }
        if self.instances.len() >= MAX_INSTANTIATION_DEPTH {
            self.report_site(
                call_site.as_ref(),
                decl,
                DiagnosticCode::GenericInstantiation,
                format!(
                    "instantiation depth limit of {} exceeded while realizing '{}'",
                    MAX_INSTANTIATION_DEPTH, decl.name
                ),
            );
            return None;
        }

        let mangled = env.is_overloaded(&decl.name) || decl.is_generic();
        let emitted_name = key.emitted_name(mangled, &home);
        let cache = Arc::clone(&self.cache);
        let record = cache.get_or_instantiate(&key, || {
            self.instantiate(&env, decl, &key, emitted_name, type_vars, call_site)
        });
        finished(&record, &home)
    }

    /// Analyze the body of `decl` with concrete parameter types
    fn instantiate(
        &mut self,
        env: &Arc<ModuleEnv>,
        decl: &Arc<FunctionDecl>,
        key: &InstanceKey,
        emitted_name: String,
        type_vars: &BTreeMap<String, Type>,
        call_site: Option<SourceLocation>,
    ) -> InstanceRecord {
        let generic = decl.is_generic();
        let arg_list: Vec<String> = key.args.iter().map(ToString::to_string).collect();
        debug!(function = %decl.name, emitted = %emitted_name, "instantiating");
        self.instances.push(InstanceFrame {
            key: key.clone(),
            emitted_name: emitted_name.clone(),
            generic,
            label: format!("'{}' with ({})", decl.name, arg_list.join(", ")),
            call_site,
        });

        let module_scope = self.module_scope(env);
        let scope = self.symbols.push_scope(ScopeKind::Function, Some(module_scope));
        let mut ctx = BodyCtx::new(Arc::clone(env), Some(decl.name.clone()), scope);
        let mut names = BTreeSet::new();
        assigned_names(&decl.def.body, &mut names);
        ctx.local_names = names.into_iter().collect();
        ctx.type_vars = type_vars.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        ctx.pure = decl.pure;

        let errors_before = self.diagnostics.error_count();
        ctx.declared_ret = match &decl.ret {
            ReturnSpec::Inferred => None,
            ReturnSpec::Concrete(ty) => Some(ty.clone()),
            ReturnSpec::Var(name) => match type_vars.get(name) {
                Some(ty) => Some(ty.clone()),
                None => {
                    self.report_in(
                        &env.file,
                        DiagnosticCode::GenericInstantiation,
                        decl.loc,
                        format!("return type variable '{}' is not bound by any parameter", name),
                    );
                    Some(Type::Error)
                }
            },
        };

        let mut params = Vec::with_capacity(decl.params.len());
        for (spec, ty) in decl.params.iter().zip(&key.args) {
            let id = self.symbols.declare(
                scope,
                Declaration::variable(&spec.name, ty.clone(), StorageClass::Parameter, spec.loc),
            );
            params.push((spec, id));
        }
        if decl.elemental && key.args.iter().any(|t| !matches!(t, Type::Scalar(_))) {
            self.report_in(
                &env.file,
                DiagnosticCode::UnsupportedConstruct,
                decl.loc,
                format!("elemental function '{}' takes scalar arguments only", decl.name),
            );
        }

        let mut stmts = self.analyze_block(&mut ctx, &decl.def.body);
        let ret = match ctx.declared_ret.clone() {
            Some(ty) => ty,
            None => self.infer_return(&ctx),
        };
        self.refresh_stmts(&mut stmts, Some(&ret));
        self.symbols.close_scope(scope);

        let typed_params: Vec<TypedParam> = params
            .iter()
            .map(|(spec, id)| {
                let symbol = self.symbols.symbol(*id);
                let intent = match (&symbol.ty, symbol.flags.written) {
                    (Type::Array(_) | Type::Aggregate(_), true) => Intent::InOut,
                    _ => Intent::In,
                };
                TypedParam {
                    name: spec.name.clone(),
                    symbol: *id,
                    ty: symbol.ty.clone(),
                    intent,
                    loc: spec.loc,
                }
            })
            .collect();
        let intents = typed_params.iter().map(|p| p.intent).collect();
        let locals = self.locals_of(scope);
        self.instances.pop();

        let failed = self.diagnostics.error_count() > errors_before || ret.is_incomplete();
        let function = (!failed).then(|| TypedFunction {
            name: decl.name.clone(),
            emitted_name: emitted_name.clone(),
            module: self.home.name.clone(),
            params: typed_params,
            ret: ret.clone(),
            body: crate::ir::TypedBody { locals, stmts },
            origin: if generic {
                FunctionOrigin::Instance {
                    generic: decl.name.clone(),
                    args: key.args.clone(),
                }
            } else {
                FunctionOrigin::Concrete
            },
            directives: decl.directives.clone(),
            pure: decl.pure,
            elemental: decl.elemental,
            public: decl.module == self.home.name,
            loc: decl.loc,
        });
        InstanceRecord {
            key: key.clone(),
            emitted_name,
            params: key.args.clone(),
            intents,
            ret,
            function,
        }
    }

    /// Join the types of every `return` in the body
    fn infer_return(&mut self, ctx: &BodyCtx) -> Type {
        let mut joined: Option<Type> = None;
        let mut bare = None;
        let mut valued = None;
        for (ty, loc) in &ctx.returns {
            let Some(ty) = ty else {
                bare.get_or_insert(*loc);
                continue;
            };
            valued.get_or_insert(*loc);
            joined = Some(match joined {
                None => ty.clone(),
                Some(previous) => match self.join_types(&previous, ty) {
                    Some(join) => join,
                    None => {
                        if !previous.is_error() && !ty.is_error() {
                            self.report(
                                ctx,
                                DiagnosticCode::TypeMismatch,
                                *loc,
                                format!("returns {} here but {} on an earlier path", ty, previous),
                            );
                        }
                        Type::Error
                    }
                },
            });
        }
        match (joined, bare) {
            (None, _) => Type::Void,
            (Some(ty), Some(loc)) if !ty.is_error() => {
                let message = match valued {
                    Some(first) => format!(
                        "returns None here but a value of type {} at line {}",
                        ty, first.line
                    ),
                    None => "returns None here but a value elsewhere".to_string(),
                };
                self.report(ctx, DiagnosticCode::TypeMismatch, loc, message);
                Type::Error
            }
            (Some(ty), _) => ty,
        }
    }

    fn join_types(&self, a: &Type, b: &Type) -> Option<Type> {
        match (a, b) {
            _ if a == b => Some(a.clone()),
            (Type::Error, _) | (_, Type::Error) => None,
            (Type::Scalar(x), Type::Scalar(y)) => self.policy.join(*x, *y).map(Type::Scalar),
            (Type::Array(x), Type::Array(y)) => {
                if x.rank() != y.rank() || (x.rank() > 1 && x.order != y.order) {
                    return None;
                }
                let elem = self.policy.join(x.elem, y.elem)?;
                let shape = x
                    .shape
                    .iter()
                    .zip(&y.shape)
                    .map(|(p, q)| if p == q { p.clone() } else { Dim::Unknown })
                    .collect();
                Some(Type::array(elem, shape, x.order))
            }
            _ => None,
        }
    }

    /// Positional construction of a user class
    fn construct(
        &mut self,
        ctx: &BodyCtx,
        aggregate: &AggregateType,
        args: &[Expr],
        keywords: &[Keyword],
        loc: Location,
    ) -> TypedExpr {
        if args.len() > aggregate.fields.len() {
            return self.mismatch(
                ctx,
                loc,
                format!(
                    "'{}' takes {} fields but {} arguments were given",
                    aggregate.name,
                    aggregate.fields.len(),
                    args.len()
                ),
            );
        }
        let mut values: Vec<Option<&Expr>> = vec![None; aggregate.fields.len()];
        for (slot, arg) in values.iter_mut().zip(args) {
            *slot = Some(arg);
        }
        for keyword in keywords {
            match aggregate.field(&keyword.name) {
                Some((index, _)) if values[index].is_none() => values[index] = Some(&keyword.value),
                Some(_) => {
                    return self.mismatch(
                        ctx,
                        keyword.loc,
                        format!("field '{}' of '{}' given twice", keyword.name, aggregate.name),
                    )
                }
                None => {
                    self.report(
                        ctx,
                        DiagnosticCode::UndeclaredSymbol,
                        keyword.loc,
                        format!("'{}' has no field '{}'", aggregate.name, keyword.name),
                    );
                    return self.error_expr(loc);
                }
            }
        }
        let mut typed = Vec::with_capacity(values.len());
        let mut failed = false;
        for ((field, ty), value) in aggregate.fields.iter().zip(values) {
            let Some(value) = value else {
                self.report(
                    ctx,
                    DiagnosticCode::TypeMismatch,
                    loc,
                    format!("missing value for field '{}' of '{}'", field, aggregate.name),
                );
                failed = true;
                continue;
            };
            let value = self.analyze_expr(ctx, value);
            let value = self.coerce(ctx, value, ty, &format!("field '{}'", field));
            failed |= value.ty.is_error();
            typed.push(value);
        }
        if failed {
            return self.error_expr(loc);
        }
        self.node_of(
            TypedExprKind::Construct {
                aggregate: aggregate.name.clone(),
                args: typed,
            },
            Type::Aggregate(aggregate.clone()),
            loc,
        )
    }

    /// `a.sum()`, `a.max()`, `a.transpose()`, ...
    fn method_call(
        &mut self,
        ctx: &BodyCtx,
        value: &Expr,
        attr: &str,
        args: &[Expr],
        keywords: &[Keyword],
        loc: Location,
    ) -> TypedExpr {
        let base = self.analyze_expr(ctx, value);
        if base.ty.is_error() {
            return base;
        }
        if base.ty.as_array().is_none() {
            return self.mismatch(ctx, loc, format!("{} has no method '{}'", base.ty, attr));
        }
        let reduction = match attr {
            "sum" => Some(Reduction::Sum),
            "prod" => Some(Reduction::Prod),
            "max" => Some(Reduction::Max),
            "min" => Some(Reduction::Min),
            "transpose" => None,
            other => {
                self.report(
                    ctx,
                    DiagnosticCode::UnsupportedConstruct,
                    loc,
                    format!("array method '{}' is not supported", other),
                );
                return self.error_expr(loc);
            }
        };
        if !args.is_empty() || !keywords.is_empty() {
            self.report(
                ctx,
                DiagnosticCode::UnsupportedConstruct,
                loc,
                format!("arguments to array method '{}' are not supported", attr),
            );
            return self.error_expr(loc);
        }
        match reduction {
            Some(r) => self.reduce(ctx, r, base, loc),
            None => self.transpose(ctx, base, loc),
        }
    }

    fn reduce(&mut self, ctx: &BodyCtx, r: Reduction, array: TypedExpr, loc: Location) -> TypedExpr {
        let Some(elem) = array.ty.as_array().map(|a| a.elem) else {
            return self.mismatch(
                ctx,
                loc,
                format!("{} expects an array, found {}", r.name(), array.ty),
            );
        };
        let Some(result) = builtins::reduction_result(r, elem, self.policy) else {
            return self.mismatch(ctx, loc, format!("{} of a {} array is not defined", r.name(), elem));
        };
        self.node_of(
            TypedExprKind::Intrinsic {
                op: Intrinsic::Reduce(r),
                args: vec![array],
            },
            Type::Scalar(result),
            loc,
        )
    }

    fn transpose(&mut self, ctx: &BodyCtx, array: TypedExpr, loc: Location) -> TypedExpr {
        let Some(ty) = array.ty.as_array().map(builtins::transpose) else {
            return self.mismatch(ctx, loc, format!("transpose expects an array, found {}", array.ty));
        };
        self.node_of(
            TypedExprKind::Intrinsic {
                op: Intrinsic::Transpose,
                args: vec![array],
            },
            Type::Array(ty),
            loc,
        )
    }

    /// Reject keywords outside `allowed` and too many positionals
    fn check_arguments(
        &mut self,
        ctx: &BodyCtx,
        label: &str,
        args: &[Expr],
        keywords: &[Keyword],
        positional: std::ops::RangeInclusive<usize>,
        allowed: &[&str],
        loc: Location,
    ) -> bool {
        if let Some(keyword) = keywords.iter().find(|k| !allowed.contains(&k.name.as_str())) {
            self.report(
                ctx,
                DiagnosticCode::UnsupportedConstruct,
                keyword.loc,
                format!("unsupported keyword argument '{}' for {}", keyword.name, label),
            );
            return false;
        }
        if !positional.contains(&args.len()) {
            let expected = if positional.start() == positional.end() {
                positional.start().to_string()
            } else if *positional.end() == usize::MAX {
                format!("at least {}", positional.start())
            } else {
                format!("{} to {}", positional.start(), positional.end())
            };
            self.report(
                ctx,
                DiagnosticCode::TypeMismatch,
                loc,
                format!("{} expects {} positional arguments, got {}", label, expected, args.len()),
            );
            return false;
        }
        true
    }

    fn builtin_call(
        &mut self,
        ctx: &BodyCtx,
        builtin: Builtin,
        label: &str,
        args: &[Expr],
        keywords: &[Keyword],
        loc: Location,
    ) -> TypedExpr {
        match builtin {
            Builtin::Print => self.unsupported_call(ctx, loc, "print is only supported as a statement"),
            Builtin::Range => self.unsupported_call(ctx, loc, "range is only supported as a for-loop iterator"),
            Builtin::Len | Builtin::Size => {
                if !self.check_arguments(ctx, label, args, keywords, 1..=1, &[], loc) {
                    return self.error_expr(loc);
                }
                let array = self.analyze_expr(ctx, &args[0]);
                if array.ty.is_error() {
                    return array;
                }
                if array.ty.as_array().is_none() {
                    return self.mismatch(ctx, loc, format!("{}() of {} is not defined", label, array.ty));
                }
                let op = if builtin == Builtin::Len {
                    Intrinsic::Len
                } else {
                    Intrinsic::Size
                };
                let ty = Type::Scalar(self.policy.default_int);
                self.node_of(TypedExprKind::Intrinsic { op, args: vec![array] }, ty, loc)
            }
            Builtin::Math(f) => {
                if !self.check_arguments(ctx, label, args, keywords, 1..=1, &[], loc) {
                    return self.error_expr(loc);
                }
                let arg = self.analyze_expr(ctx, &args[0]);
                if arg.ty.is_error() {
                    return arg;
                }
                let Some(elem) = arg.ty.element() else {
                    return self.mismatch(ctx, loc, format!("{} of {} is not defined", label, arg.ty));
                };
                let Some(result) = builtins::math_result(f, elem, self.policy) else {
                    return self.mismatch(ctx, loc, format!("{} of {} is not defined", label, arg.ty));
                };
                let operand_elem = match f {
                    crate::ir::MathFn::Abs if !elem.is_bool() => elem,
                    _ => result,
                };
                let operand_ty = with_element(&arg.ty, operand_elem);
                let arg = self.cast_node(arg, &operand_ty);
                let ty = with_element(&arg.ty, result);
                self.node_of(
                    TypedExprKind::Intrinsic {
                        op: Intrinsic::Math(f),
                        args: vec![arg],
                    },
                    ty,
                    loc,
                )
            }
            Builtin::Reduce(r) => self.reduce_call(ctx, r, label, args, keywords, loc),
            Builtin::Extreme(r) if args.len() == 1 => self.reduce_call(ctx, r, label, args, keywords, loc),
            Builtin::Extreme(r) => self.scalar_extreme(ctx, r, label, args, keywords, loc),
            Builtin::Sum => {
                if !self.check_arguments(ctx, label, args, keywords, 1..=1, &[], loc) {
                    return self.error_expr(loc);
                }
                let array = self.analyze_expr(ctx, &args[0]);
                if array.ty.is_error() {
                    return array;
                }
                self.reduce(ctx, Reduction::Sum, array, loc)
            }
            Builtin::MatMul => {
                if !self.check_arguments(ctx, label, args, keywords, 2..=2, &[], loc) {
                    return self.error_expr(loc);
                }
                let left = self.analyze_expr(ctx, &args[0]);
                let right = self.analyze_expr(ctx, &args[1]);
                self.matmul(ctx, left, right, loc)
            }
            Builtin::Transpose => {
                if !self.check_arguments(ctx, label, args, keywords, 1..=1, &[], loc) {
                    return self.error_expr(loc);
                }
                let array = self.analyze_expr(ctx, &args[0]);
                if array.ty.is_error() {
                    return array;
                }
                self.transpose(ctx, array, loc)
            }
            Builtin::Cast(target) => self.cast_call(ctx, target, label, args, keywords, loc),
            Builtin::Creation(creation) => self.creation(ctx, creation, label, args, keywords, loc),
            Builtin::Arange => self.arange(ctx, label, args, keywords, loc),
            Builtin::Array => self.array_literal(ctx, label, args, keywords, loc),
        }
    }

    fn unsupported_call(&mut self, ctx: &BodyCtx, loc: Location, message: &str) -> TypedExpr {
        self.report(ctx, DiagnosticCode::UnsupportedConstruct, loc, message);
        self.error_expr(loc)
    }

    /// Reduction of a single array argument
    fn reduce_call(
        &mut self,
        ctx: &BodyCtx,
        r: Reduction,
        label: &str,
        args: &[Expr],
        keywords: &[Keyword],
        loc: Location,
    ) -> TypedExpr {
        if !self.check_arguments(ctx, label, args, keywords, 1..=1, &[], loc) {
            return self.error_expr(loc);
        }
        let array = self.analyze_expr(ctx, &args[0]);
        if array.ty.is_error() {
            return array;
        }
        self.reduce(ctx, r, array, loc)
    }

    /// `max(a, b, ...)` over scalars
    fn scalar_extreme(
        &mut self,
        ctx: &BodyCtx,
        r: Reduction,
        label: &str,
        args: &[Expr],
        keywords: &[Keyword],
        loc: Location,
    ) -> TypedExpr {
        if !self.check_arguments(ctx, label, args, keywords, 2..=usize::MAX, &[], loc) {
            return self.error_expr(loc);
        }
        let typed: Vec<TypedExpr> = args.iter().map(|a| self.analyze_expr(ctx, a)).collect();
        if typed.iter().any(|t| t.ty.is_error()) {
            return self.error_expr(loc);
        }
        let mut joined: Option<ScalarType> = None;
        for value in &typed {
            match value.ty.as_scalar() {
                Some(s) if !s.is_complex() => {
                    joined = Some(joined.map_or(s, |j| self.policy.arithmetic(j, s)));
                }
                _ => {
                    return self.mismatch(
                        ctx,
                        value.loc,
                        format!("{} of several values needs real scalars, found {}", label, value.ty),
                    )
                }
            }
        }
        let Some(elem) = joined else {
            return self.error_expr(loc);
        };
        let ty = Type::Scalar(elem);
        let args = typed.into_iter().map(|t| self.cast_node(t, &ty)).collect();
        self.node_of(
            TypedExprKind::Intrinsic {
                op: Intrinsic::ScalarExtreme(r),
                args,
            },
            ty,
            loc,
        )
    }

    /// `int(x)`, `float(x)`, `bool(x)`, `complex(re, im)`, `np.float32(x)`
    fn cast_call(
        &mut self,
        ctx: &BodyCtx,
        target: CastTarget,
        label: &str,
        args: &[Expr],
        keywords: &[Keyword],
        loc: Location,
    ) -> TypedExpr {
        let to = target.resolve(self.policy);
        let arity = if to.is_complex() { 1..=2 } else { 1..=1 };
        if !self.check_arguments(ctx, label, args, keywords, arity, &[], loc) {
            return self.error_expr(loc);
        }
        let value = self.analyze_expr(ctx, &args[0]);
        if value.ty.is_error() {
            return value;
        }
        let Some(elem) = value.ty.element() else {
            return self.mismatch(ctx, loc, format!("cannot convert {} to {}", value.ty, to));
        };
        if elem.is_complex() && !to.is_complex() {
            return self.mismatch(
                ctx,
                loc,
                format!("cannot convert {} to {}; take the real part explicitly", elem, to),
            );
        }
        let target_ty = with_element(&value.ty, to);
        if to.is_bool() && !elem.is_bool() {
            let zero = self.literal(Literal::Int(0), Type::Scalar(self.policy.default_int), loc);
            let zero = self.cast_node(zero, &Type::Scalar(elem));
            return self.node_of(
                TypedExprKind::Compare {
                    op: CmpOp::NotEq,
                    left: Box::new(value),
                    right: Box::new(zero),
                },
                target_ty,
                loc,
            );
        }
        let real = self.cast_node(value, &target_ty);
        let Some(imag) = args.get(1) else {
            return real;
        };
        let imag = self.analyze_expr(ctx, imag);
        if imag.ty.is_error() {
            return imag;
        }
        match (&real.ty, imag.ty.as_scalar()) {
            (Type::Scalar(_), Some(s)) if !s.is_complex() => {}
            _ => {
                return self.unsupported_call(
                    ctx,
                    loc,
                    "complex(re, im) needs real scalar parts",
                )
            }
        }
        let complex = Type::Scalar(to);
        let imag = self.cast_node(imag, &complex);
        let unit = self.literal(Literal::Complex(0.0, 1.0), complex.clone(), loc);
        let imag = self.node_of(
            TypedExprKind::Binary {
                op: BinOp::Mul,
                left: Box::new(imag),
                right: Box::new(unit),
            },
            complex.clone(),
            loc,
        );
        self.node_of(
            TypedExprKind::Binary {
                op: BinOp::Add,
                left: Box::new(real),
                right: Box::new(imag),
            },
            complex,
            loc,
        )
    }

    /// Element type named by a `dtype` argument
    fn dtype(&mut self, ctx: &BodyCtx, expr: &Expr) -> Option<ScalarType> {
        let found = match &expr.kind {
            ExprKind::Str(name) => ScalarType::from_name(name),
            ExprKind::Name(name) => match self.resolve_name(ctx, name) {
                NameTarget::Builtin(Builtin::Cast(target)) => Some(target.resolve(self.policy)),
                _ => None,
            },
            ExprKind::Attribute { value, attr } => match value.as_name().map(|b| self.resolve_name(ctx, b)) {
                Some(NameTarget::Module(ModuleRef::Numpy)) => match builtins::numpy(attr) {
                    Some(Builtin::Cast(target)) => Some(target.resolve(self.policy)),
                    _ => None,
                },
                _ => None,
            },
            _ => None,
        };
        if found.is_none() {
            self.report(ctx, DiagnosticCode::UnsupportedConstruct, expr.loc, "unsupported dtype");
        }
        found
    }

    fn order(&mut self, ctx: &BodyCtx, expr: &Expr) -> Option<Order> {
        match &expr.kind {
            ExprKind::Str(order) if order == "C" => Some(Order::C),
            ExprKind::Str(order) if order == "F" => Some(Order::F),
            _ => {
                self.report(
                    ctx,
                    DiagnosticCode::UnsupportedConstruct,
                    expr.loc,
                    "order must be 'C' or 'F'",
                );
                None
            }
        }
    }

    /// Extents of a shape argument: an integer or a tuple of integers
    fn shape_arg(&mut self, ctx: &BodyCtx, expr: &Expr) -> Option<(Vec<Dim>, Vec<TypedExpr>)> {
        let items: Vec<&Expr> = match &expr.kind {
            ExprKind::Tuple(items) | ExprKind::List(items) => items.iter().collect(),
            _ => vec![expr],
        };
        if items.is_empty() {
            self.report(
                ctx,
                DiagnosticCode::UnsupportedConstruct,
                expr.loc,
                "zero-dimensional arrays are not supported",
            );
            return None;
        }
        let index_ty = Type::Scalar(self.policy.default_int);
        let mut dims = Vec::with_capacity(items.len());
        let mut extents = Vec::with_capacity(items.len());
        let mut failed = false;
        for item in items {
            let typed = self.analyze_expr(ctx, item);
            if typed.ty.is_error() {
                failed = true;
                continue;
            }
            if !typed.ty.is_integer_scalar() {
                self.report(
                    ctx,
                    DiagnosticCode::TypeMismatch,
                    item.loc,
                    format!("array extents must be integers, not {}", typed.ty),
                );
                failed = true;
                continue;
            }
            let dim = match &typed.kind {
                TypedExprKind::Literal(Literal::Int(n)) if *n < 0 => {
                    self.report(
                        ctx,
                        DiagnosticCode::ShapeMismatch,
                        item.loc,
                        format!("negative array extent {}", n),
                    );
                    failed = true;
                    continue;
                }
                TypedExprKind::Literal(Literal::Int(n)) => Dim::Known(*n as u64),
                _ => self.dim_of(ctx, item, &typed),
            };
            dims.push(dim);
            extents.push(self.cast_node(typed, &index_ty));
        }
        (!failed).then_some((dims, extents))
    }

    /// Static description of a run-time extent
    fn dim_of(&self, ctx: &BodyCtx, expr: &Expr, typed: &TypedExpr) -> Dim {
        if let TypedExprKind::Var(var) = &typed.kind {
            if let crate::ir::VarScope::Global { module } = &var.scope {
                let constant = self
                    .env_of(module)
                    .and_then(|env| env.constants.get(&var.name).map(|c| c.value.clone()));
                if let Some(Literal::Int(n)) = constant {
                    if let Ok(n) = u64::try_from(n) {
                        return Dim::Known(n);
                    }
                }
            }
        }
        match self.dim_expr(ctx, expr) {
            Some(DimExpr::Const(n)) if n >= 0 => Dim::Known(n as u64),
            Some(expr) => Dim::Symbolic(expr),
            None => Dim::Unknown,
        }
    }

    /// Extents expressed over parameters and the shapes of named arrays.
    /// Locals may be reassigned, so they give no static extent.
    fn dim_expr(&self, ctx: &BodyCtx, expr: &Expr) -> Option<DimExpr> {
        match &expr.kind {
            ExprKind::Int(n) => Some(DimExpr::Const(*n)),
            ExprKind::Name(name) => match self.resolve_name(ctx, name) {
                NameTarget::Variable(id) => {
                    let symbol = self.symbols.symbol(id);
                    (symbol.storage == StorageClass::Parameter && symbol.ty.is_integer_scalar())
                        .then(|| DimExpr::Var(name.clone()))
                }
                _ => None,
            },
            ExprKind::Binary { op, left, right } => {
                let l = Box::new(self.dim_expr(ctx, left)?);
                let r = Box::new(self.dim_expr(ctx, right)?);
                match op {
                    BinOp::Add => Some(DimExpr::Add(l, r)),
                    BinOp::Sub => Some(DimExpr::Sub(l, r)),
                    BinOp::Mul => Some(DimExpr::Mul(l, r)),
                    BinOp::FloorDiv => Some(DimExpr::FloorDiv(l, r)),
                    _ => None,
                }
            }
            ExprKind::Call { func, args, .. } if args.len() == 1 => {
                let len = func
                    .as_name()
                    .map_or(false, |n| matches!(self.resolve_name(ctx, n), NameTarget::Builtin(Builtin::Len)));
                let array = args[0].as_name()?;
                len.then(|| DimExpr::ShapeOf {
                    array: array.to_string(),
                    axis: 0,
                })
                .filter(|_| self.is_parameter_array(ctx, array))
            }
            ExprKind::Subscript { value, indices } => match (&value.kind, indices.as_slice()) {
                (ExprKind::Attribute { value: base, attr }, [index]) if attr == "shape" => {
                    let array = base.as_name()?;
                    let ExprKind::Int(axis) = index.kind else {
                        return None;
                    };
                    let axis = usize::try_from(axis).ok()?;
                    self.is_parameter_array(ctx, array).then(|| DimExpr::ShapeOf {
                        array: array.to_string(),
                        axis,
                    })
                }
                _ => None,
            },
            _ => None,
        }
    }

    fn is_parameter_array(&self, ctx: &BodyCtx, name: &str) -> bool {
        match self.resolve_name(ctx, name) {
            NameTarget::Variable(id) => {
                let symbol = self.symbols.symbol(id);
                symbol.storage == StorageClass::Parameter && symbol.ty.as_array().is_some()
            }
            _ => false,
        }
    }

    /// `np.zeros`, `np.ones`, `np.empty`, `np.full`
    fn creation(
        &mut self,
        ctx: &BodyCtx,
        creation: Creation,
        label: &str,
        args: &[Expr],
        keywords: &[Keyword],
        loc: Location,
    ) -> TypedExpr {
        let full = creation == Creation::Full;
        let names = if full { &FULL_ARGS[..] } else { &CREATION_ARGS[..] };
        if !self.check_arguments(ctx, label, args, keywords, 0..=names.len(), names, loc) {
            return self.error_expr(loc);
        }
        let arg = |index: usize| {
            args.get(index)
                .or_else(|| keywords.iter().find(|k| k.name == names[index]).map(|k| &k.value))
        };
        let Some(shape) = arg(0) else {
            return self.mismatch(ctx, loc, format!("{} needs a shape", label));
        };
        let offset = usize::from(full);
        let Some((dims, mut extents)) = self.shape_arg(ctx, shape) else {
            return self.error_expr(loc);
        };

        let fill = if full {
            let Some(fill) = arg(1) else {
                return self.mismatch(ctx, loc, format!("{} needs a fill value", label));
            };
            let fill = self.analyze_expr(ctx, fill);
            if fill.ty.is_error() {
                return fill;
            }
            if fill.ty.as_scalar().is_none() {
                return self.mismatch(ctx, fill.loc, format!("fill value must be a scalar, not {}", fill.ty));
            }
            Some(fill)
        } else {
            None
        };
        let elem = match arg(1 + offset) {
            Some(dtype) => match self.dtype(ctx, dtype) {
                Some(elem) => elem,
                None => return self.error_expr(loc),
            },
            None => fill
                .as_ref()
                .and_then(|f| f.ty.as_scalar())
                .unwrap_or(self.policy.default_float),
        };
        let order = match arg(2 + offset) {
            Some(order) => match self.order(ctx, order) {
                Some(order) => order,
                None => return self.error_expr(loc),
            },
            None => self.config.default_order,
        };
        if let Some(fill) = fill {
            let fill = self.coerce(ctx, fill, &Type::Scalar(elem), "fill value");
            if fill.ty.is_error() {
                return fill;
            }
            extents.push(fill);
        }
        self.node_of(
            TypedExprKind::Intrinsic {
                op: creation.intrinsic(),
                args: extents,
            },
            Type::array(elem, dims, order),
            loc,
        )
    }

    /// `np.arange(stop)`, `np.arange(start, stop[, step])`
    fn arange(
        &mut self,
        ctx: &BodyCtx,
        label: &str,
        args: &[Expr],
        keywords: &[Keyword],
        loc: Location,
    ) -> TypedExpr {
        if !self.check_arguments(ctx, label, args, keywords, 1..=3, &["dtype"], loc) {
            return self.error_expr(loc);
        }
        let typed: Vec<TypedExpr> = args.iter().map(|a| self.analyze_expr(ctx, a)).collect();
        if typed.iter().any(|t| t.ty.is_error()) {
            return self.error_expr(loc);
        }
        let mut elem: Option<ScalarType> = None;
        for value in &typed {
            match value.ty.as_scalar() {
                Some(s) if !s.is_complex() => {
                    elem = Some(elem.map_or(s, |e| self.policy.arithmetic(e, s)));
                }
                _ => {
                    return self.mismatch(
                        ctx,
                        value.loc,
                        format!("arange bounds must be real scalars, not {}", value.ty),
                    )
                }
            }
        }
        let mut elem = elem.unwrap_or(self.policy.default_int);
        if elem.is_bool() {
            elem = self.policy.default_int;
        }
        if let Some(dtype) = keywords.first() {
            match self.dtype(ctx, &dtype.value) {
                Some(d) => elem = d,
                None => return self.error_expr(loc),
            }
        }
        let mut typed = typed;
        let (start, stop, step) = match typed.len() {
            1 => {
                let stop = typed.remove(0);
                (self.int_literal(0, loc), stop, self.int_literal(1, loc))
            }
            2 => {
                let stop = typed.remove(1);
                let start = typed.remove(0);
                (start, stop, self.int_literal(1, loc))
            }
            _ => {
                let step = typed.remove(2);
                let stop = typed.remove(1);
                (typed.remove(0), stop, step)
            }
        };
        if let TypedExprKind::Literal(Literal::Int(0)) = step.kind {
            return self.mismatch(ctx, step.loc, "arange step must not be zero".to_string());
        }
        let dim = match (&start.kind, &stop.kind, &step.kind) {
            (TypedExprKind::Literal(a), TypedExprKind::Literal(b), TypedExprKind::Literal(c)) => {
                match (as_f64(a), as_f64(b), as_f64(c)) {
                    (Some(a), Some(b), Some(c)) if c != 0.0 => {
                        Dim::Known(((b - a) / c).ceil().max(0.0) as u64)
                    }
                    _ => Dim::Unknown,
                }
            }
            (TypedExprKind::Literal(Literal::Int(0)), _, TypedExprKind::Literal(Literal::Int(1))) => {
                match args.get(usize::from(args.len() > 1)) {
                    Some(stop_expr) => self.dim_of(ctx, stop_expr, &stop),
                    None => Dim::Unknown,
                }
            }
            _ => Dim::Unknown,
        };
        let bound_ty = Type::Scalar(elem);
        let bounds = vec![
            self.cast_node(start, &bound_ty),
            self.cast_node(stop, &bound_ty),
            self.cast_node(step, &bound_ty),
        ];
        self.node_of(
            TypedExprKind::Intrinsic {
                op: Intrinsic::Arange,
                args: bounds,
            },
            Type::array(elem, vec![dim], Order::C),
            loc,
        )
    }

    /// `np.array([[1, 2], [3, 4]])`
    fn array_literal(
        &mut self,
        ctx: &BodyCtx,
        label: &str,
        args: &[Expr],
        keywords: &[Keyword],
        loc: Location,
    ) -> TypedExpr {
        if !self.check_arguments(ctx, label, args, keywords, 1..=1, &["dtype", "order"], loc) {
            return self.error_expr(loc);
        }
        let mut shape = Vec::new();
        let mut leaves = Vec::new();
        if let Err(message) = flatten(&args[0], 0, &mut shape, &mut leaves) {
            return self.mismatch(ctx, args[0].loc, message);
        }
        if shape.is_empty() {
            return self.unsupported_call(ctx, args[0].loc, "np.array needs a list or tuple of scalars");
        }
        let typed: Vec<TypedExpr> = leaves.iter().map(|e| self.analyze_expr(ctx, e)).collect();
        if typed.iter().any(|t| t.ty.is_error()) {
            return self.error_expr(loc);
        }
        let mut elem: Option<ScalarType> = None;
        for value in &typed {
            let Some(s) = value.ty.as_scalar() else {
                return self.mismatch(
                    ctx,
                    value.loc,
                    format!("np.array elements must be scalars, not {}", value.ty),
                );
            };
            elem = Some(match elem {
                None => s,
                Some(e) if e.is_bool() && s.is_bool() => e,
                Some(e) => self.policy.arithmetic(e, s),
            });
        }
        let mut elem = elem.unwrap_or(self.policy.default_float);
        let mut order = self.config.default_order;
        for keyword in keywords {
            if keyword.name == "dtype" {
                match self.dtype(ctx, &keyword.value) {
                    Some(d) => elem = d,
                    None => return self.error_expr(loc),
                }
            } else {
                match self.order(ctx, &keyword.value) {
                    Some(o) => order = o,
                    None => return self.error_expr(loc),
                }
            }
        }
        let elem_ty = Type::Scalar(elem);
        let mut elements = Vec::with_capacity(typed.len());
        for value in typed {
            let value = self.coerce(ctx, value, &elem_ty, "array element");
            if value.ty.is_error() {
                return value;
            }
            elements.push(value);
        }
        let dims = shape.into_iter().map(|n| Dim::Known(n as u64)).collect();
        self.node_of(
            TypedExprKind::Intrinsic {
                op: Intrinsic::ArrayLiteral,
                args: elements,
            },
            Type::array(elem, dims, order),
            loc,
        )
    }
}

/// Signature of a finished record, and the module defining it
fn finished(record: &InstanceRecord, home: &str) -> Option<(RealizedFunction, String)> {
    if record.ret.is_incomplete() {
        return None;
    }
    Some((
        RealizedFunction {
            emitted_name: record.emitted_name.clone(),
            params: record.params.clone(),
            intents: record.intents.clone(),
            ret: record.ret.clone(),
        },
        home.to_string(),
    ))
}

fn argument_list(positional: &[Type], keywords: &[(String, Type)]) -> String {
    positional
        .iter()
        .map(ToString::to_string)
        .chain(keywords.iter().map(|(name, ty)| format!("{}={}", name, ty)))
        .collect::<Vec<_>>()
        .join(", ")
}

fn as_f64(value: &Literal) -> Option<f64> {
    match value {
        Literal::Int(n) => Some(*n as f64),
        Literal::Float(x) => Some(*x),
        _ => None,
    }
}

/// Collect the leaves of nested lists in C order, checking the nesting is
/// rectangular
fn flatten<'e>(
    expr: &'e Expr,
    depth: usize,
    shape: &mut Vec<usize>,
    leaves: &mut Vec<&'e Expr>,
) -> Result<(), String> {
    match &expr.kind {
        ExprKind::List(items) | ExprKind::Tuple(items) => {
            match shape.get(depth) {
                Some(&extent) if extent != items.len() => {
                    return Err(format!(
                        "ragged nested sequence: expected {} elements at depth {}, found {}",
                        extent,
                        depth,
                        items.len()
                    ))
                }
                Some(_) => {}
                None if depth == shape.len() && leaves.is_empty() => shape.push(items.len()),
                None => return Err("ragged nested sequence".to_string()),
            }
            if items.is_empty() {
                return Err("empty array literals are not supported".to_string());
            }
            for item in items {
                flatten(item, depth + 1, shape, leaves)?;
            }
            Ok(())
        }
        _ if depth == shape.len() => {
            leaves.push(expr);
            Ok(())
        }
        _ => Err("ragged nested sequence".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::analyze_source;
    use super::*;

    fn codes(source: &str) -> Vec<DiagnosticCode> {
        analyze_source(source).diagnostics.iter().map(|d| d.code).collect()
    }

    #[test]
    fn test_generic_instances_are_memoized() {
        let output = analyze_source(
            "def twice(x):\n    return x * 2\n\ndef f() -> float:\n    a = twice(1)\n    b = twice(2)\n    return twice(1.5)\n",
        );
        assert!(output.diagnostics.is_empty(), "{:?}", output.diagnostics);
        let module = output.module.unwrap();
        let instances: Vec<&str> = module
            .functions
            .iter()
            .filter(|f| matches!(f.origin, FunctionOrigin::Instance { .. }))
            .map(|f| f.emitted_name.as_str())
            .collect();
        assert_eq!(instances, vec!["twice_i64", "twice_f64"]);
    }

    #[test]
    fn test_overload_not_found_lists_candidates() {
        let output = analyze_source(
            "from pyccel.decorators import types\n\n@types('int', 'int')\n@types('float', 'float')\ndef add(a, b):\n    return a + b\n\ndef f() -> int:\n    return add(1, 2j)\n",
        );
        let diagnostic = output
            .diagnostics
            .iter()
            .find(|d| d.code == DiagnosticCode::OverloadNotFound)
            .unwrap();
        assert_eq!(diagnostic.related.len(), 2);
    }

    #[test]
    fn test_recursion_needs_return_annotation() {
        assert_eq!(
            codes("def fact(n: int):\n    if n <= 1:\n        return 1\n    return n * fact(n - 1)\n"),
            vec![DiagnosticCode::UnsupportedConstruct]
        );
        assert!(codes(
            "def fact(n: int) -> int:\n    if n <= 1:\n        return 1\n    return n * fact(n - 1)\n"
        )
        .is_empty());
    }

    #[test]
    fn test_reductions_and_scalar_extremes() {
        let output = analyze_source(
            "import numpy as np\n\ndef f(x: 'float64[:]', a: int, b: int) -> float:\n    return np.sum(x) + max(x) + max(a, b)\n",
        );
        assert!(output.diagnostics.is_empty(), "{:?}", output.diagnostics);
        assert_eq!(codes("def f(a: int) -> int:\n    return max(a)\n"), vec![DiagnosticCode::TypeMismatch]);
    }

    #[test]
    fn test_recursive_generic_is_an_instantiation_error() {
        let found = codes("def f(x):\n    return f(x)\n\ny = f(1)\n");
        assert!(found.contains(&DiagnosticCode::GenericInstantiation), "{:?}", found);
        assert!(!found.contains(&DiagnosticCode::UnsupportedConstruct));
    }

    #[test]
    fn test_error_inside_generic_notes_instantiation() {
        let output = analyze_source(
            "def g(x):\n    return x & 1\n\ndef f() -> int:\n    b = g(3)\n    return g(2.5)\n",
        );
        assert_eq!(output.diagnostics.len(), 1);
        let diagnostic = output.diagnostics.iter().next().unwrap();
        assert_eq!(diagnostic.code, DiagnosticCode::TypeMismatch);
        assert_eq!(diagnostic.location.line, 2);
        assert!(diagnostic.related[0].message.contains("instantiation"));
        assert_eq!(diagnostic.related[0].location.line, 6);
    }

    #[test]
    fn test_creation_shapes_and_dtypes() {
        let output = analyze_source(
            "import numpy as np\n\ndef f(n: int):\n    a = np.zeros((n, 3), dtype=np.int32, order='F')\n    b = np.full(4, 2.5)\n    c = np.arange(10)\n    d = np.array([[1, 2], [3, 4]])\n    return a.shape[0] + len(b) + len(c) + d.size\n",
        );
        assert!(output.diagnostics.is_empty(), "{:?}", output.diagnostics);
        let module = output.module.unwrap();
        let f = module.function("f").unwrap();
        let local = |name: &str| f.body.locals.iter().find(|l| l.name == name).unwrap().ty.clone();
        let a = local("a");
        let a = a.as_array().unwrap();
        assert_eq!(a.elem, ScalarType::INT32);
        assert_eq!(a.order, Order::F);
        assert_eq!(a.shape, vec![Dim::Symbolic(DimExpr::Var("n".into())), Dim::Known(3)]);
        assert_eq!(local("c").as_array().unwrap().shape, vec![Dim::Known(10)]);
        assert_eq!(
            local("d").as_array().unwrap().shape,
            vec![Dim::Known(2), Dim::Known(2)]
        );
    }

    #[test]
    fn test_ragged_array_literal() {
        assert_eq!(
            codes("import numpy as np\n\ndef f():\n    a = np.array([[1, 2], [3]])\n"),
            vec![DiagnosticCode::TypeMismatch]
        );
    }

    #[test]
    fn test_inout_intent_from_callee() {
        let output = analyze_source(
            "import numpy as np\n\ndef fill(a: 'float64[:]'):\n    a[0] = 1.0\n\ndef f():\n    b = np.zeros(3)\n    fill(b)\n",
        );
        assert!(output.diagnostics.is_empty(), "{:?}", output.diagnostics);
        let module = output.module.unwrap();
        assert_eq!(module.function("fill").unwrap().params[0].intent, Intent::InOut);
    }

    #[test]
    fn test_complex_to_float_is_rejected() {
        assert_eq!(
            codes("def f(z: complex) -> float:\n    return float(z)\n"),
            vec![DiagnosticCode::TypeMismatch]
        );
    }

    #[test]
    fn test_flatten_nested_lists() {
        let module = crate::parser::parse_source("x = [[1, 2, 3], [4, 5, 6]]\n", "t.py", "t").unwrap();
        let crate::ast::StmtKind::Assign { value, .. } = &module.body[0].kind else {
            panic!("expected an assignment");
        };
        let mut shape = Vec::new();
        let mut leaves = Vec::new();
        flatten(value, 0, &mut shape, &mut leaves).unwrap();
        assert_eq!(shape, vec![2, 3]);
        assert_eq!(leaves.len(), 6);
    }
}
