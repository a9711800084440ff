//! Statement analysis: assignments and flow-sensitive declarations, control
//! flow, directives and the final type refresh of a body.

use tracing::trace;

use super::declarations::program_statements;
use super::{BodyCtx, ModuleContext, NameTarget};
use crate::ast::{self, BinOp, Expr, ExprKind, Keyword, Location, StmtKind};
use crate::builtins::Builtin;
use crate::diagnostics::{DiagnosticCode, SourceLocation};
use crate::directives::{Directive, DirectiveKey};
use crate::ir::{
    LValue, Literal, LocalVar, RangeLoop, TypedBody, TypedExpr, TypedExprKind, TypedStmt,
    TypedStmtKind, VarRef,
};
use crate::symbols::{Declaration, ScopeKind, StorageClass, SymbolId, SymbolKind};
use crate::types::{parse_annotation, shape_string, ArrayType, Dim, Type, TypeAnnotation};

impl<'a> ModuleContext<'a> {
    /// Analyze the module-level program, if it has any statements
    pub(super) fn analyze_main(&mut self, module: &ast::Module) -> Option<TypedBody> {
        let home = std::sync::Arc::clone(&self.home);
        let stmts: Vec<&ast::Stmt> = program_statements(&module.body)
            .into_iter()
            .filter(|stmt| match &stmt.kind {
                StmtKind::Import { .. }
                | StmtKind::FromImport { .. }
                | StmtKind::FunctionDef(_)
                | StmtKind::ClassDef(_) => false,
                StmtKind::Assign { targets, .. } => !(targets.len() == 1
                    && targets[0]
                        .as_name()
                        .map_or(false, |n| home.constants.contains_key(n))),
                StmtKind::Expr(Expr {
                    kind: ExprKind::Str(_),
                    ..
                }) => false,
                _ => true,
            })
            .collect();
        if stmts.is_empty() {
            return None;
        }
        let mut ctx = self.program_ctx();
        let mut body = self.analyze_stmts(&mut ctx, stmts);
        self.refresh_stmts(&mut body, None);
        let locals = self.locals_of(ctx.body_scope);
        trace!(statements = body.len(), "analyzed program body");
        Some(TypedBody {
            locals,
            stmts: body,
        })
    }

    /// Local variables declared directly in `scope`
    pub(super) fn locals_of(&self, scope: crate::symbols::ScopeId) -> Vec<LocalVar> {
        self.symbols
            .iter_scope(scope)
            .filter(|s| {
                s.kind == SymbolKind::Variable
                    && matches!(s.storage, StorageClass::Local | StorageClass::ModuleLevel)
            })
            .map(|s| LocalVar {
                name: s.name.clone(),
                symbol: s.id,
                ty: s.ty.clone(),
                alias: s.flags.alias_of.is_some(),
            })
            .collect()
    }

    pub(super) fn analyze_block(&mut self, ctx: &mut BodyCtx, stmts: &[ast::Stmt]) -> Vec<TypedStmt> {
        self.analyze_stmts(ctx, stmts.iter())
    }

    fn analyze_stmts<'s>(
        &mut self,
        ctx: &mut BodyCtx,
        stmts: impl IntoIterator<Item = &'s ast::Stmt>,
    ) -> Vec<TypedStmt> {
        let mut out = Vec::new();
        for stmt in stmts {
            let produced = self.analyze_statement(ctx, stmt);
            self.attach_directives(ctx, stmt, &produced);
            out.extend(produced);
        }
        out
    }

    /// Run a block in a fresh child scope
    fn scoped_block(&mut self, ctx: &mut BodyCtx, kind: ScopeKind, stmts: &[ast::Stmt]) -> Vec<TypedStmt> {
        let outer = ctx.scope;
        ctx.scope = self.symbols.push_scope(kind, Some(outer));
        let body = self.analyze_block(ctx, stmts);
        self.symbols.close_scope(ctx.scope);
        ctx.scope = outer;
        body
    }

    fn stmt(&mut self, kind: TypedStmtKind, loc: Location) -> TypedStmt {
        TypedStmt {
            id: self.node(),
            kind,
            loc,
        }
    }

    fn analyze_statement(&mut self, ctx: &mut BodyCtx, stmt: &ast::Stmt) -> Vec<TypedStmt> {
        let loc = stmt.loc;
        match &stmt.kind {
            StmtKind::Assign { targets, value } => self.analyze_assign(ctx, targets, value, loc),
            StmtKind::AnnAssign {
                target,
                annotation,
                value,
            } => self
                .analyze_ann_assign(ctx, target, annotation, value.as_ref(), loc)
                .into_iter()
                .collect(),
            StmtKind::AugAssign { target, op, value } => self
                .analyze_aug_assign(ctx, target, *op, value, loc)
                .into_iter()
                .collect(),
            StmtKind::Expr(expr) => self.analyze_expr_stmt(ctx, expr).into_iter().collect(),
            StmtKind::If { branches, orelse } => {
                let id = ctx.next_if;
                ctx.next_if += 1;
                let mut typed = Vec::new();
                for (index, branch) in branches.iter().enumerate() {
                    let test = self.condition(ctx, &branch.test);
                    ctx.branches.push((id, index));
                    let body = self.scoped_block(ctx, ScopeKind::Block, &branch.body);
                    ctx.branches.pop();
                    typed.push((test, body));
                }
                let mut else_body = Vec::new();
                if !orelse.is_empty() {
                    ctx.branches.push((id, branches.len()));
                    else_body = self.scoped_block(ctx, ScopeKind::Block, orelse);
                    ctx.branches.pop();
                }
                vec![self.stmt(
                    TypedStmtKind::If {
                        branches: typed,
                        orelse: else_body,
                    },
                    loc,
                )]
            }
            StmtKind::For { target, iter, body } => {
                self.analyze_for(ctx, target, iter, body, loc).into_iter().collect()
            }
            StmtKind::While { test, body } => {
                let test = self.condition(ctx, test);
                let body = self.scoped_block(ctx, ScopeKind::Loop, body);
                vec![self.stmt(TypedStmtKind::While { test, body }, loc)]
            }
            StmtKind::Return(value) => self.analyze_return(ctx, value.as_ref(), loc).into_iter().collect(),
            StmtKind::Break => vec![self.stmt(TypedStmtKind::Break, loc)],
            StmtKind::Continue => vec![self.stmt(TypedStmtKind::Continue, loc)],
            StmtKind::Pass => vec![self.stmt(TypedStmtKind::Pass, loc)],
            StmtKind::Global(_) => {
                self.report(
                    ctx,
                    DiagnosticCode::UnsupportedConstruct,
                    loc,
                    "'global' is not supported; functions may only read module constants",
                );
                Vec::new()
            }
            StmtKind::FunctionDef(_) | StmtKind::ClassDef(_) => {
                self.report(
                    ctx,
                    DiagnosticCode::UnsupportedConstruct,
                    loc,
                    format!("nested {} is not supported", stmt.describe()),
                );
                Vec::new()
            }
            StmtKind::Import { .. } | StmtKind::FromImport { .. } => {
                self.report(
                    ctx,
                    DiagnosticCode::UnsupportedConstruct,
                    loc,
                    "imports are only supported at module level",
                );
                Vec::new()
            }
        }
    }

    fn attach_directives(&mut self, ctx: &BodyCtx, stmt: &ast::Stmt, produced: &[TypedStmt]) {
        for raw in &stmt.directives {
            let directive = match Directive::parse(&raw.text, raw.loc) {
                Ok(d) => d,
                Err(message) => {
                    self.report(ctx, DiagnosticCode::UnknownDirective, raw.loc, message);
                    continue;
                }
            };
            if !directive.key.is_known() {
                self.report(
                    ctx,
                    DiagnosticCode::UnknownDirective,
                    raw.loc,
                    format!("unknown directive '{}' is passed through unchanged", directive.key),
                );
            }
            let needs_loop = directive.key.requires_loop() || directive.key == DirectiveKey::Simd;
            if needs_loop && !matches!(stmt.kind, StmtKind::For { .. }) {
                self.report(
                    ctx,
                    DiagnosticCode::MisplacedDirective,
                    raw.loc,
                    format!(
                        "directive '{}' must precede a for loop, not a {}; dropped",
                        directive.key,
                        stmt.describe()
                    ),
                );
                continue;
            }
            match produced.first() {
                Some(first) => self.directives.attach(first.id, directive),
                None => trace!(key = %directive.key, "directive on a dropped statement"),
            }
        }
    }

    fn analyze_expr_stmt(&mut self, ctx: &mut BodyCtx, expr: &Expr) -> Option<TypedStmt> {
        if let ExprKind::Str(_) = expr.kind {
            return None;
        }
        if let ExprKind::Call {
            func,
            args,
            keywords,
        } = &expr.kind
        {
            if let Some(name) = func.as_name() {
                if let NameTarget::Builtin(Builtin::Print) = self.resolve_name(ctx, name) {
                    return self.analyze_print(ctx, args, keywords, expr.loc);
                }
            }
        }
        let value = self.analyze_expr(ctx, expr);
        if value.ty.is_error() {
            return None;
        }
        if !value.contains_call() {
            trace!(loc = %expr.loc, "dropping expression statement without effect");
            return None;
        }
        Some(self.stmt(TypedStmtKind::Expr(value), expr.loc))
    }

    fn analyze_print(
        &mut self,
        ctx: &mut BodyCtx,
        args: &[Expr],
        keywords: &[Keyword],
        loc: Location,
    ) -> Option<TypedStmt> {
        if let Some(keyword) = keywords.first() {
            self.report(
                ctx,
                DiagnosticCode::UnsupportedConstruct,
                keyword.loc,
                format!("print keyword '{}' is not supported", keyword.name),
            );
            return None;
        }
        let mut typed = Vec::with_capacity(args.len());
        let mut failed = false;
        for arg in args {
            if let ExprKind::Str(text) = &arg.kind {
                typed.push(TypedExpr {
                    id: self.node(),
                    kind: TypedExprKind::Literal(Literal::Str(text.clone())),
                    ty: Type::Str,
                    loc: arg.loc,
                });
                continue;
            }
            let value = self.analyze_expr(ctx, arg);
            match &value.ty {
                Type::Error => failed = true,
                Type::Scalar(_) => typed.push(value),
                other => {
                    self.report(
                        ctx,
                        DiagnosticCode::UnsupportedConstruct,
                        arg.loc,
                        format!("printing a value of type {} is not supported", other),
                    );
                    failed = true;
                }
            }
        }
        (!failed).then(|| self.stmt(TypedStmtKind::Print(typed), loc))
    }

    fn analyze_assign(
        &mut self,
        ctx: &mut BodyCtx,
        targets: &[Expr],
        value: &Expr,
        loc: Location,
    ) -> Vec<TypedStmt> {
        if targets.len() > 1 && targets[0].as_name().is_none() {
            self.report(
                ctx,
                DiagnosticCode::UnsupportedConstruct,
                targets[0].loc,
                "chained assignment must start with a plain name",
            );
            return Vec::new();
        }
        let mut out = Vec::new();
        let typed = self.analyze_expr(ctx, value);
        out.extend(self.assign_target(ctx, &targets[0], typed, None, loc));
        if let Some(first) = targets[0].as_name() {
            for target in &targets[1..] {
                let source = self.analyze_name(ctx, first, targets[0].loc);
                out.extend(self.assign_target(ctx, target, source, None, loc));
            }
        }
        out
    }

    fn assign_target(
        &mut self,
        ctx: &mut BodyCtx,
        target: &Expr,
        value: TypedExpr,
        annotated: Option<Type>,
        loc: Location,
    ) -> Option<TypedStmt> {
        match &target.kind {
            ExprKind::Name(name) => self.assign_name(ctx, name, target.loc, value, annotated, loc),
            ExprKind::Subscript { value: base, indices } => {
                self.assign_index(ctx, base, indices, value, loc)
            }
            ExprKind::Attribute { value: base, attr } => self.assign_field(ctx, base, attr, value, loc),
            ExprKind::Tuple(_) => {
                self.report(
                    ctx,
                    DiagnosticCode::UnsupportedConstruct,
                    target.loc,
                    "tuple unpacking is not supported",
                );
                None
            }
            _ => {
                self.report(
                    ctx,
                    DiagnosticCode::UnsupportedConstruct,
                    target.loc,
                    "cannot assign to this expression",
                );
                None
            }
        }
    }

    /// Variable of the current body named `name`, if already declared
    fn local_symbol(&self, ctx: &BodyCtx, name: &str) -> Option<SymbolId> {
        let id = self.symbols.lookup(ctx.scope, name)?;
        let symbol = self.symbols.symbol(id);
        (symbol.kind == SymbolKind::Variable && symbol.scope == ctx.body_scope).then_some(id)
    }

    fn declare_local(&mut self, ctx: &BodyCtx, name: &str, ty: Type, loc: Location) -> SymbolId {
        let id = self.symbols.declare(
            ctx.body_scope,
            Declaration::variable(name, ty, Self::local_storage(ctx), loc),
        );
        self.symbols.symbol_mut(id).flags.decl_branch = ctx.branches.last().copied();
        if ctx.scope != ctx.body_scope {
            self.symbols.note_first_assignment(ctx.scope, id);
        }
        id
    }

    fn assign_name(
        &mut self,
        ctx: &mut BodyCtx,
        name: &str,
        name_loc: Location,
        value: TypedExpr,
        annotated: Option<Type>,
        loc: Location,
    ) -> Option<TypedStmt> {
        if name.starts_with(super::RESERVED_PREFIX) {
            self.report(
                ctx,
                DiagnosticCode::UnsupportedConstruct,
                name_loc,
                format!("names starting with '{}' are reserved", super::RESERVED_PREFIX),
            );
            return None;
        }
        if let Type::Void = value.ty {
            self.report(
                ctx,
                DiagnosticCode::TypeMismatch,
                value.loc,
                format!("cannot assign the result of a call without a return value to '{}'", name),
            );
            let id = self.local_symbol(ctx, name);
            if id.is_none() {
                self.declare_local(ctx, name, Type::Error, name_loc);
            }
            return None;
        }
        match self.local_symbol(ctx, name) {
            None => self.declare_by_assignment(ctx, name, name_loc, value, annotated, loc),
            Some(id) => self.reassign(ctx, id, name_loc, value, annotated, loc),
        }
    }

    fn declare_by_assignment(
        &mut self,
        ctx: &mut BodyCtx,
        name: &str,
        name_loc: Location,
        value: TypedExpr,
        annotated: Option<Type>,
        loc: Location,
    ) -> Option<TypedStmt> {
        if value.ty.is_error() {
            self.declare_local(ctx, name, Type::Error, name_loc);
            return None;
        }
        let value = match &annotated {
            Some(ty) => {
                let what = format!("value assigned to '{}'", name);
                self.coerce(ctx, value, ty, &what)
            }
            None => value,
        };
        if value.ty.is_error() {
            let id = self.declare_local(ctx, name, annotated.unwrap_or(Type::Error), name_loc);
            self.symbols.symbol_mut(id).ty = Type::Error;
            return None;
        }

        if let (Type::Array(_), TypedExprKind::Var(source)) = (&value.ty, &value.kind) {
            let source = source.clone();
            let id = self.declare_local(ctx, name, value.ty.clone(), name_loc);
            let root = self.alias_root(source.symbol);
            self.symbols.symbol_mut(id).flags.alias_of = Some(root);
            self.symbols.symbol_mut(root).flags.aliased = true;
            let target = self.var_ref(id);
            return Some(self.stmt(TypedStmtKind::Alias { target, source }, loc));
        }
        if let (Type::Aggregate(a), TypedExprKind::Var(_)) = (&value.ty, &value.kind) {
            self.report(
                ctx,
                DiagnosticCode::UnsupportedConstruct,
                value.loc,
                format!(
                    "'{}' would share the {} object of another variable; construct a new one instead",
                    name, a.name
                ),
            );
            self.declare_local(ctx, name, Type::Error, name_loc);
            return None;
        }

        let id = self.declare_local(ctx, name, value.ty.clone(), name_loc);
        if annotated.is_some() {
            ctx.annotated.insert(id);
        }
        let target = self.var_ref(id);
        Some(self.stmt(
            TypedStmtKind::Assign {
                target: LValue::Var(target),
                value,
            },
            loc,
        ))
    }

    fn reassign(
        &mut self,
        ctx: &mut BodyCtx,
        id: SymbolId,
        name_loc: Location,
        value: TypedExpr,
        annotated: Option<Type>,
        loc: Location,
    ) -> Option<TypedStmt> {
        let symbol = self.symbols.symbol(id).clone();
        if symbol.ty.is_error() || value.ty.is_error() {
            return None;
        }
        if ctx.loop_vars.contains(&id) {
            self.report(
                ctx,
                DiagnosticCode::UnsupportedConstruct,
                name_loc,
                format!("loop variable '{}' is assigned inside its loop", symbol.name),
            );
            return None;
        }
        if let Some(ty) = &annotated {
            if *ty != symbol.ty {
                self.report(
                    ctx,
                    DiagnosticCode::TypeMismatch,
                    name_loc,
                    format!("'{}' is already declared as {}, not {}", symbol.name, symbol.ty, ty),
                );
                return None;
            }
        }

        // A sibling branch assigning another type: reported when read later
        let sibling = match (symbol.flags.decl_branch, ctx.branches.last()) {
            (Some((if_id, declared)), Some(&(current_if, current))) => {
                if_id == current_if && declared != current
            }
            _ => false,
        };
        if sibling && value.ty != symbol.ty && !symbol.flags.read {
            if symbol.flags.conflict.is_none() {
                self.symbols.symbol_mut(id).flags.conflict = Some(name_loc);
            }
            let value = self.cast_node(value, &symbol.ty);
            return Some(self.finish_assign(id, value, loc));
        }

        let fixed = symbol.flags.read
            || symbol.storage == StorageClass::Parameter
            || ctx.annotated.contains(&id);
        let value = match (&symbol.ty, &value.ty) {
            (Type::Scalar(old), Type::Scalar(new)) => {
                if old == new {
                    value
                } else if !fixed && self.policy.convert(*old, *new).is_some() {
                    trace!(name = %symbol.name, from = %old, to = %new, "widening before first read");
                    self.symbols.symbol_mut(id).ty = value.ty.clone();
                    value
                } else if self.policy.convert(*new, *old).is_some() {
                    self.cast_node(value, &symbol.ty)
                } else {
                    let why = if symbol.flags.read {
                        "its type is fixed once it has been read"
                    } else {
                        "the conversion would lose information"
                    };
                    self.report(
                        ctx,
                        DiagnosticCode::TypeMismatch,
                        name_loc,
                        format!(
                            "cannot assign {} to '{}' of type {}; {}",
                            new, symbol.name, old, why
                        ),
                    );
                    return None;
                }
            }
            (Type::Array(old), Type::Array(_)) => {
                let old = old.clone();
                return self.reassign_array(ctx, id, &old, fixed, name_loc, value, loc);
            }
            (Type::Aggregate(old), Type::Aggregate(new)) if old.name == new.name => {
                if let TypedExprKind::Var(_) = value.kind {
                    self.report(
                        ctx,
                        DiagnosticCode::UnsupportedConstruct,
                        value.loc,
                        format!("'{}' would share the object of another variable", symbol.name),
                    );
                    return None;
                }
                value
            }
            (old, new) => {
                self.report(
                    ctx,
                    DiagnosticCode::TypeMismatch,
                    name_loc,
                    format!("cannot assign {} to '{}' of type {}", new, symbol.name, old),
                );
                return None;
            }
        };
        Some(self.finish_assign(id, value, loc))
    }

    fn finish_assign(&mut self, id: SymbolId, value: TypedExpr, loc: Location) -> TypedStmt {
        self.symbols.symbol_mut(id).flags.written = true;
        let target = self.var_ref(id);
        self.stmt(
            TypedStmtKind::Assign {
                target: LValue::Var(target),
                value,
            },
            loc,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn reassign_array(
        &mut self,
        ctx: &mut BodyCtx,
        id: SymbolId,
        old: &ArrayType,
        fixed: bool,
        name_loc: Location,
        value: TypedExpr,
        loc: Location,
    ) -> Option<TypedStmt> {
        let symbol = self.symbols.symbol(id).clone();
        let refusal = if symbol.storage == StorageClass::Parameter {
            Some(format!(
                "array parameter '{}' cannot be rebound; assign to its elements instead",
                symbol.name
            ))
        } else if symbol.flags.alias_of.is_some() {
            Some(format!("'{}' is a view of another array and cannot be rebound", symbol.name))
        } else if symbol.flags.aliased {
            Some(format!("'{}' cannot be rebound while another variable views it", symbol.name))
        } else if let TypedExprKind::Var(_) = value.kind {
            Some(format!(
                "rebinding array '{}' to another array variable is not supported; use .copy()",
                symbol.name
            ))
        } else {
            None
        };
        if let Some(message) = refusal {
            self.report(ctx, DiagnosticCode::UnsupportedConstruct, name_loc, message);
            return None;
        }
        let Some(new) = value.ty.as_array().cloned() else {
            return None;
        };
        if new.rank() != old.rank() || (old.rank() > 1 && new.order != old.order) {
            self.report(
                ctx,
                DiagnosticCode::TypeMismatch,
                name_loc,
                format!("cannot assign {} to '{}' of type {}", value.ty, symbol.name, symbol.ty),
            );
            return None;
        }
        let mut merged = old.shape.clone();
        for (dim, incoming) in merged.iter_mut().zip(&new.shape) {
            match (&*dim, incoming) {
                (Dim::Known(a), Dim::Known(b)) if a != b => {
                    self.report(
                        ctx,
                        DiagnosticCode::ShapeMismatch,
                        name_loc,
                        format!(
                            "cannot assign an array of shape {} to '{}' of shape {}",
                            shape_string(&new.shape),
                            symbol.name,
                            shape_string(&old.shape)
                        ),
                    );
                    return None;
                }
                (a, b) if a == b => {}
                _ => *dim = Dim::Unknown,
            }
        }
        let mut elem = old.elem;
        let value = if new.elem == old.elem {
            value
        } else if !fixed && self.policy.convert(old.elem, new.elem).is_some() {
            elem = new.elem;
            value
        } else if self.policy.convert(new.elem, old.elem).is_some() {
            let target = Type::array(old.elem, new.shape.clone(), new.order);
            self.cast_node(value, &target)
        } else {
            self.report(
                ctx,
                DiagnosticCode::TypeMismatch,
                name_loc,
                format!(
                    "cannot assign {} elements to '{}' of element type {}",
                    new.elem, symbol.name, old.elem
                ),
            );
            return None;
        };
        self.symbols.symbol_mut(id).ty = Type::array(elem, merged, old.order);
        Some(self.finish_assign(id, value, loc))
    }

    /// Resolve the named array of an indexed target
    fn target_array(&mut self, ctx: &mut BodyCtx, base: &Expr) -> Option<VarRef> {
        let Some(name) = base.as_name() else {
            self.report(
                ctx,
                DiagnosticCode::UnsupportedConstruct,
                base.loc,
                "only named arrays can be indexed on the left of an assignment",
            );
            return None;
        };
        let typed = self.analyze_name(ctx, name, base.loc);
        match typed.kind {
            TypedExprKind::Var(var) if var.ty.as_array().is_some() => Some(var),
            _ if typed.ty.is_error() => None,
            _ => {
                self.report(
                    ctx,
                    DiagnosticCode::TypeMismatch,
                    base.loc,
                    format!("'{}' of type {} cannot be indexed", name, typed.ty),
                );
                None
            }
        }
    }

    fn index_target(&mut self, ctx: &mut BodyCtx, base: &Expr, indices: &[Expr]) -> Option<LValue> {
        let array = self.target_array(ctx, base)?;
        if ctx.pure && matches!(array.scope, crate::ir::VarScope::Param) {
            self.report(
                ctx,
                DiagnosticCode::UnsupportedConstruct,
                base.loc,
                format!("pure function modifies its argument '{}'", array.name),
            );
            return None;
        }
        let indices = self.full_indices(ctx, &array, indices, base.loc)?;
        self.mark_written(array.symbol);
        Some(LValue::Index { array, indices })
    }

    fn assign_index(
        &mut self,
        ctx: &mut BodyCtx,
        base: &Expr,
        indices: &[Expr],
        value: TypedExpr,
        loc: Location,
    ) -> Option<TypedStmt> {
        let target = self.index_target(ctx, base, indices)?;
        if value.ty.is_error() {
            return None;
        }
        let LValue::Index { array, .. } = &target else {
            return None;
        };
        let elem = array.ty.element().map(Type::Scalar).unwrap_or(Type::Error);
        let what = format!("element of '{}'", array.name);
        let value = self.coerce(ctx, value, &elem, &what);
        if value.ty.is_error() {
            return None;
        }
        Some(self.stmt(TypedStmtKind::Assign { target, value }, loc))
    }

    fn field_target(&mut self, ctx: &mut BodyCtx, base: &Expr, attr: &str) -> Option<(LValue, Type)> {
        let Some(name) = base.as_name() else {
            self.report(
                ctx,
                DiagnosticCode::UnsupportedConstruct,
                base.loc,
                "only fields of named objects can be assigned",
            );
            return None;
        };
        let typed = self.analyze_name(ctx, name, base.loc);
        let var = match typed.kind {
            TypedExprKind::Var(var) => var,
            _ => return None,
        };
        let Type::Aggregate(aggregate) = &var.ty else {
            if !var.ty.is_error() {
                self.report(
                    ctx,
                    DiagnosticCode::TypeMismatch,
                    base.loc,
                    format!("'{}' of type {} has no field '{}'", name, var.ty, attr),
                );
            }
            return None;
        };
        let Some((index, ty)) = aggregate.field(attr).map(|(i, t)| (i, t.clone())) else {
            self.report(
                ctx,
                DiagnosticCode::UndeclaredSymbol,
                base.loc,
                format!("'{}' has no field '{}'", aggregate.name, attr),
            );
            return None;
        };
        if ctx.pure && matches!(var.scope, crate::ir::VarScope::Param) {
            self.report(
                ctx,
                DiagnosticCode::UnsupportedConstruct,
                base.loc,
                format!("pure function modifies its argument '{}'", var.name),
            );
            return None;
        }
        self.mark_written(var.symbol);
        Some((
            LValue::Field {
                base: var,
                field: attr.to_string(),
                index,
            },
            ty,
        ))
    }

    fn assign_field(
        &mut self,
        ctx: &mut BodyCtx,
        base: &Expr,
        attr: &str,
        value: TypedExpr,
        loc: Location,
    ) -> Option<TypedStmt> {
        let (target, ty) = self.field_target(ctx, base, attr)?;
        if value.ty.is_error() {
            return None;
        }
        let what = format!("field '{}'", attr);
        let value = self.coerce(ctx, value, &ty, &what);
        if value.ty.is_error() {
            return None;
        }
        Some(self.stmt(TypedStmtKind::Assign { target, value }, loc))
    }

    fn analyze_ann_assign(
        &mut self,
        ctx: &mut BodyCtx,
        target: &Expr,
        annotation: &ast::Annotation,
        value: Option<&Expr>,
        loc: Location,
    ) -> Option<TypedStmt> {
        let Some(name) = target.as_name() else {
            self.report(
                ctx,
                DiagnosticCode::UnsupportedConstruct,
                target.loc,
                "annotations are only supported on plain names",
            );
            return None;
        };
        let ty = self.annotation_type(ctx, annotation)?;
        match value {
            Some(value) => {
                let typed = self.analyze_expr(ctx, value);
                let stmt = self.assign_target(ctx, target, typed, Some(ty), loc);
                if let Some(id) = self.local_symbol(ctx, name) {
                    ctx.annotated.insert(id);
                }
                stmt
            }
            None => {
                match self.local_symbol(ctx, name) {
                    Some(id) if self.symbols.symbol(id).ty != ty => {
                        let existing = self.symbols.symbol(id).ty.clone();
                        self.report(
                            ctx,
                            DiagnosticCode::TypeMismatch,
                            target.loc,
                            format!("'{}' is already declared as {}, not {}", name, existing, ty),
                        );
                    }
                    Some(_) => {}
                    None => {
                        let id = self.declare_local(ctx, name, ty, target.loc);
                        ctx.annotated.insert(id);
                    }
                }
                None
            }
        }
    }

    /// Type named by a local annotation, with template variables substituted
    pub(super) fn annotation_type(&mut self, ctx: &BodyCtx, annotation: &ast::Annotation) -> Option<Type> {
        let env = std::sync::Arc::clone(&ctx.env);
        let lookup = |name: &str| env.aggregates.get(name).map(|a| Type::Aggregate(a.clone()));
        let vars: Vec<String> = ctx.type_vars.keys().cloned().collect();
        let parsed = parse_annotation(&annotation.text, &lookup, &vars);
        match parsed {
            Ok(TypeAnnotation::Concrete(ty)) => Some(ty),
            Ok(TypeAnnotation::Var { name, array }) => {
                let bound = ctx.type_vars.get(&name).cloned()?;
                match (array, bound) {
                    (None, bound) => Some(bound),
                    (Some((dims, order)), Type::Scalar(elem)) => Some(Type::array(elem, dims, order)),
                    (Some(_), other) => {
                        self.report(
                            ctx,
                            DiagnosticCode::TypeMismatch,
                            annotation.loc,
                            format!("'{}' is bound to {} and cannot be an element type", name, other),
                        );
                        None
                    }
                }
            }
            Err(message) => {
                self.report(ctx, DiagnosticCode::UnsupportedConstruct, annotation.loc, message);
                None
            }
        }
    }

    fn analyze_aug_assign(
        &mut self,
        ctx: &mut BodyCtx,
        target: &Expr,
        op: BinOp,
        value: &Expr,
        loc: Location,
    ) -> Option<TypedStmt> {
        if op == BinOp::MatMul {
            self.report(
                ctx,
                DiagnosticCode::UnsupportedConstruct,
                loc,
                "in-place matrix product '@=' is not supported",
            );
            return None;
        }
        let (lvalue, current) = match &target.kind {
            ExprKind::Name(name) => {
                let typed = self.analyze_name(ctx, name, target.loc);
                let TypedExprKind::Var(var) = typed.kind else {
                    return None;
                };
                if !matches!(var.scope, crate::ir::VarScope::Local | crate::ir::VarScope::Param)
                    || self.symbols.symbol(var.symbol).scope != ctx.body_scope
                {
                    self.report(
                        ctx,
                        DiagnosticCode::UnsupportedConstruct,
                        target.loc,
                        format!("module constant '{}' cannot be modified", name),
                    );
                    return None;
                }
                if ctx.loop_vars.contains(&var.symbol) {
                    self.report(
                        ctx,
                        DiagnosticCode::UnsupportedConstruct,
                        target.loc,
                        format!("loop variable '{}' is assigned inside its loop", name),
                    );
                    return None;
                }
                if var.ty.as_array().is_some() && ctx.pure && var.scope == crate::ir::VarScope::Param {
                    self.report(
                        ctx,
                        DiagnosticCode::UnsupportedConstruct,
                        target.loc,
                        format!("pure function modifies its argument '{}'", name),
                    );
                    return None;
                }
                self.mark_written(var.symbol);
                let ty = var.ty.clone();
                (LValue::Var(var), ty)
            }
            ExprKind::Subscript { value: base, indices } => {
                let lvalue = self.index_target(ctx, base, indices)?;
                let LValue::Index { array, .. } = &lvalue else {
                    return None;
                };
                let elem = array.ty.element()?;
                (lvalue, Type::Scalar(elem))
            }
            ExprKind::Attribute { value: base, attr } => self.field_target(ctx, base, attr)?,
            _ => {
                self.report(
                    ctx,
                    DiagnosticCode::UnsupportedConstruct,
                    target.loc,
                    "cannot assign to this expression",
                );
                return None;
            }
        };
        let value = self.analyze_expr(ctx, value);
        if value.ty.is_error() || current.is_error() {
            return None;
        }
        let (Some(target_elem), Some(value_elem)) = (current.element(), value.ty.element()) else {
            self.report(
                ctx,
                DiagnosticCode::TypeMismatch,
                loc,
                format!("unsupported operand types for {}=: {} and {}", op, current, value.ty),
            );
            return None;
        };
        let Some(result) = self.policy.binary(op, target_elem, value_elem) else {
            self.report(
                ctx,
                DiagnosticCode::TypeMismatch,
                loc,
                format!("unsupported operand types for {}=: {} and {}", op, current, value.ty),
            );
            return None;
        };
        if self.policy.convert(result, target_elem).is_none() {
            self.report(
                ctx,
                DiagnosticCode::TypeMismatch,
                loc,
                format!(
                    "result of {}= is {} and cannot be stored in a target of type {}",
                    op, result, target_elem
                ),
            );
            return None;
        }
        match (&current, &value.ty) {
            (Type::Scalar(_), Type::Array(_)) => {
                self.report(
                    ctx,
                    DiagnosticCode::TypeMismatch,
                    loc,
                    format!("cannot update scalar of type {} in place with an array", current),
                );
                return None;
            }
            (Type::Array(t), Type::Array(v)) => {
                let fits = crate::types::broadcast_shapes(&t.shape, &v.shape)
                    .map_or(false, |shape| crate::types::shape_fits(&t.shape, &shape));
                if !fits {
                    self.report(
                        ctx,
                        DiagnosticCode::ShapeMismatch,
                        loc,
                        format!(
                            "array of shape {} cannot be applied in place to shape {}",
                            shape_string(&v.shape),
                            shape_string(&t.shape)
                        ),
                    );
                    return None;
                }
            }
            _ => {}
        }
        Some(self.stmt(
            TypedStmtKind::AugAssign {
                target: lvalue,
                op,
                value,
            },
            loc,
        ))
    }

    fn analyze_for(
        &mut self,
        ctx: &mut BodyCtx,
        target: &Expr,
        iter: &Expr,
        body: &[ast::Stmt],
        loc: Location,
    ) -> Option<TypedStmt> {
        let Some(name) = target.as_name() else {
            self.report(
                ctx,
                DiagnosticCode::UnsupportedConstruct,
                target.loc,
                "for loops must bind a single name",
            );
            return None;
        };
        let range_args = match &iter.kind {
            ExprKind::Call {
                func,
                args,
                keywords,
            } if keywords.is_empty()
                && func.as_name().map_or(false, |n| {
                    matches!(self.resolve_name(ctx, n), NameTarget::Builtin(Builtin::Range))
                }) =>
            {
                args
            }
            _ => {
                self.report(
                    ctx,
                    DiagnosticCode::UnsupportedConstruct,
                    iter.loc,
                    "for loops may only iterate over range(...)",
                );
                return None;
            }
        };
        if range_args.is_empty() || range_args.len() > 3 {
            self.report(
                ctx,
                DiagnosticCode::TypeMismatch,
                iter.loc,
                format!("range expects 1 to 3 arguments, got {}", range_args.len()),
            );
            return None;
        }
        let mut bounds = Vec::with_capacity(3);
        let mut failed = false;
        for arg in range_args {
            let typed = self.analyze_expr(ctx, arg);
            match &typed.ty {
                Type::Error => failed = true,
                ty if ty.is_integer_scalar() => {}
                other => {
                    self.report(
                        ctx,
                        DiagnosticCode::TypeMismatch,
                        arg.loc,
                        format!("range arguments must be integers, not {}", other),
                    );
                    failed = true;
                }
            }
            bounds.push(typed);
        }
        if failed {
            return None;
        }
        let mut var_ty = self.policy.default_int;
        for bound in &bounds {
            if let Some(elem) = bound.ty.as_scalar() {
                var_ty = self.policy.arithmetic(var_ty, elem);
            }
        }
        let (start, stop, step) = match bounds.len() {
            1 => {
                let zero = self.int_literal(0, iter.loc);
                let one = self.int_literal(1, iter.loc);
                let stop = bounds.remove(0);
                (zero, stop, one)
            }
            2 => {
                let one = self.int_literal(1, iter.loc);
                let stop = bounds.remove(1);
                (bounds.remove(0), stop, one)
            }
            _ => {
                let step = bounds.remove(2);
                let stop = bounds.remove(1);
                (bounds.remove(0), stop, step)
            }
        };
        match step.kind {
            TypedExprKind::Literal(Literal::Int(k)) if k != 0 => {}
            _ => {
                self.report(
                    ctx,
                    DiagnosticCode::UnsupportedConstruct,
                    step.loc,
                    "range step must be a nonzero integer literal",
                );
                return None;
            }
        }
        let var_ty = Type::Scalar(var_ty);
        let var_id = match self.local_symbol(ctx, name) {
            Some(id) => {
                let symbol = self.symbols.symbol(id);
                if ctx.loop_vars.contains(&id) {
                    self.report(
                        ctx,
                        DiagnosticCode::UnsupportedConstruct,
                        target.loc,
                        format!("loop variable '{}' is reused by a nested loop", name),
                    );
                    return None;
                }
                if !symbol.ty.is_integer_scalar() {
                    let ty = symbol.ty.clone();
                    self.report(
                        ctx,
                        DiagnosticCode::TypeMismatch,
                        target.loc,
                        format!("loop variable '{}' has type {}, expected an integer", name, ty),
                    );
                    return None;
                }
                id
            }
            None => self.declare_local(ctx, name, var_ty.clone(), target.loc),
        };
        self.symbols.symbol_mut(var_id).flags.written = true;
        let var = self.var_ref(var_id);
        let start = self.cast_node(start, &var.ty);
        let stop = self.cast_node(stop, &var.ty);
        let step = self.cast_node(step, &var.ty);

        ctx.loop_vars.push(var_id);
        let body = self.scoped_block(ctx, ScopeKind::Loop, body);
        ctx.loop_vars.pop();
        Some(self.stmt(
            TypedStmtKind::For {
                range: RangeLoop {
                    var,
                    start,
                    stop,
                    step,
                },
                body,
            },
            loc,
        ))
    }

    fn analyze_return(&mut self, ctx: &mut BodyCtx, value: Option<&Expr>, loc: Location) -> Option<TypedStmt> {
        let value = value.filter(|v| !matches!(v.kind, ExprKind::NoneLit));
        let declared = ctx.declared_ret.clone();
        let Some(value) = value else {
            if let Some(ty) = declared.as_ref().filter(|t| **t != Type::Void) {
                self.report(
                    ctx,
                    DiagnosticCode::TypeMismatch,
                    loc,
                    format!("missing return value of type {}", ty),
                );
                return None;
            }
            ctx.returns.push((None, loc));
            return Some(self.stmt(TypedStmtKind::Return(None), loc));
        };
        let typed = self.analyze_expr(ctx, value);
        if typed.ty.is_error() {
            ctx.returns.push((Some(Type::Error), loc));
            return None;
        }
        let typed = match &declared {
            Some(Type::Void) => {
                self.report(
                    ctx,
                    DiagnosticCode::TypeMismatch,
                    value.loc,
                    "function declared to return None returns a value",
                );
                return None;
            }
            Some(ty) => {
                let typed = self.coerce(ctx, typed, ty, "return value");
                if typed.ty.is_error() {
                    return None;
                }
                typed
            }
            None => {
                if let TypedExprKind::Var(var) = &typed.kind {
                    if var.ty.as_array().is_some() && var.scope == crate::ir::VarScope::Param {
                        self.report(
                            ctx,
                            DiagnosticCode::UnsupportedConstruct,
                            value.loc,
                            format!("returning array parameter '{}' is not supported", var.name),
                        );
                        return None;
                    }
                }
                typed
            }
        };
        ctx.returns.push((Some(typed.ty.clone()), loc));
        Some(self.stmt(TypedStmtKind::Return(Some(typed)), loc))
    }

    /// Update variable references to the final types of their symbols and
    /// insert the casts widening made necessary.
    pub(super) fn refresh_stmts(&mut self, stmts: &mut [TypedStmt], ret: Option<&Type>) {
        for stmt in stmts.iter_mut() {
            match &mut stmt.kind {
                TypedStmtKind::Assign { target, value } => {
                    self.refresh_lvalue(target);
                    self.refresh_expr(value);
                    if let LValue::Var(var) = target {
                        if value.ty != var.ty && !value.ty.is_error() {
                            let ty = var.ty.clone();
                            let inner = std::mem::replace(value, self.placeholder());
                            *value = self.cast_node(inner, &ty);
                        }
                    }
                }
                TypedStmtKind::AugAssign { target, value, .. } => {
                    self.refresh_lvalue(target);
                    self.refresh_expr(value);
                }
                TypedStmtKind::Alias { target, source } => {
                    self.refresh_var(target);
                    self.refresh_var(source);
                }
                TypedStmtKind::Expr(e) => self.refresh_expr(e),
                TypedStmtKind::Print(args) => args.iter_mut().for_each(|a| self.refresh_expr(a)),
                TypedStmtKind::If { branches, orelse } => {
                    for (test, body) in branches.iter_mut() {
                        self.refresh_expr(test);
                        self.refresh_stmts(body, ret);
                    }
                    self.refresh_stmts(orelse, ret);
                }
                TypedStmtKind::For { range, body } => {
                    self.refresh_var(&mut range.var);
                    self.refresh_expr(&mut range.start);
                    self.refresh_expr(&mut range.stop);
                    self.refresh_expr(&mut range.step);
                    self.refresh_stmts(body, ret);
                }
                TypedStmtKind::While { test, body } => {
                    self.refresh_expr(test);
                    self.refresh_stmts(body, ret);
                }
                TypedStmtKind::Return(Some(value)) => {
                    self.refresh_expr(value);
                    if let Some(ret) = ret {
                        if value.ty != *ret && !ret.is_incomplete() {
                            let inner = std::mem::replace(value, self.placeholder());
                            *value = self.cast_node(inner, ret);
                        }
                    }
                }
                TypedStmtKind::Return(None)
                | TypedStmtKind::Break
                | TypedStmtKind::Continue
                | TypedStmtKind::Pass => {}
            }
        }
    }

    fn placeholder(&self) -> TypedExpr {
        TypedExpr {
            id: crate::ir::NodeId(u32::MAX),
            kind: TypedExprKind::Literal(Literal::Int(0)),
            ty: Type::Error,
            loc: Location::default(),
        }
    }

    fn refresh_var(&self, var: &mut VarRef) {
        let symbol = self.symbols.symbol(var.symbol);
        if symbol.storage != StorageClass::Global {
            var.ty = symbol.ty.clone();
        }
    }

    fn refresh_lvalue(&mut self, target: &mut LValue) {
        match target {
            LValue::Var(var) => self.refresh_var(var),
            LValue::Index { array, indices } => {
                self.refresh_var(array);
                indices.iter_mut().for_each(|i| self.refresh_expr(i));
            }
            LValue::Field { base, .. } => self.refresh_var(base),
        }
    }

    fn refresh_expr(&mut self, expr: &mut TypedExpr) {
        match &mut expr.kind {
            TypedExprKind::Var(var) => {
                self.refresh_var(var);
                expr.ty = var.ty.clone();
            }
            TypedExprKind::Index { array, indices } => {
                self.refresh_var(array);
                indices.iter_mut().for_each(|i| self.refresh_expr(i));
            }
            TypedExprKind::Literal(_) => {}
            TypedExprKind::Unary { operand, .. } | TypedExprKind::Cast(operand) => {
                self.refresh_expr(operand)
            }
            TypedExprKind::Binary { left, right, .. }
            | TypedExprKind::MatMul { left, right }
            | TypedExprKind::Compare { left, right, .. }
            | TypedExprKind::Logical { left, right, .. } => {
                self.refresh_expr(left);
                self.refresh_expr(right);
            }
            TypedExprKind::Call { args, .. }
            | TypedExprKind::Intrinsic { args, .. }
            | TypedExprKind::Construct { args, .. } => {
                args.iter_mut().for_each(|a| self.refresh_expr(a))
            }
            TypedExprKind::Field { base, .. } => self.refresh_expr(base),
            TypedExprKind::IfExp { test, body, orelse } => {
                self.refresh_expr(test);
                self.refresh_expr(body);
                self.refresh_expr(orelse);
            }
        }
    }

    pub(super) fn call_site(&self, ctx: &BodyCtx, loc: Location) -> SourceLocation {
        SourceLocation::new(ctx.file(), loc)
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::analyze_source;
    use crate::diagnostics::DiagnosticCode;
    use crate::ir::TypedStmtKind;
    use crate::types::{ScalarType, Type};

    fn codes(source: &str) -> Vec<DiagnosticCode> {
        analyze_source(source).diagnostics.iter().map(|d| d.code).collect()
    }

    #[test]
    fn test_program_body_from_module_statements() {
        let output = analyze_source("x = 1\nfor i in range(3):\n    x += i\nprint(x)\n");
        assert!(output.diagnostics.is_empty());
        let module = output.module.unwrap();
        let main = module.main.unwrap();
        assert_eq!(main.stmts.len(), 3);
        assert!(matches!(main.stmts[2].kind, TypedStmtKind::Print(_)));
        assert!(main.locals.iter().any(|l| l.name == "i"));
    }

    #[test]
    fn test_main_guard_is_inlined() {
        let output = analyze_source(
            "if __name__ == '__main__':\n    y = 2.0\n    y = y * 2\n    print(y)\n",
        );
        assert!(output.diagnostics.is_empty());
        assert_eq!(output.module.unwrap().main.unwrap().stmts.len(), 3);
    }

    #[test]
    fn test_functions_cannot_read_module_variables() {
        assert_eq!(
            codes("n = 1\nn = 2\n\ndef f() -> int:\n    return n\n"),
            vec![DiagnosticCode::UnsupportedConstruct]
        );
    }

    #[test]
    fn test_loop_variable_cannot_be_assigned() {
        assert_eq!(
            codes("def f(n: int):\n    for i in range(n):\n        i = 2\n"),
            vec![DiagnosticCode::UnsupportedConstruct]
        );
    }

    #[test]
    fn test_range_step_must_be_literal() {
        assert_eq!(
            codes("def f(n: int, k: int):\n    for i in range(0, n, k):\n        pass\n"),
            vec![DiagnosticCode::UnsupportedConstruct]
        );
    }

    #[test]
    fn test_array_parameter_written_through_index() {
        let output = analyze_source(
            "def fill(a: 'float64[:]', v: float):\n    for i in range(len(a)):\n        a[i] = v\n",
        );
        assert!(output.diagnostics.is_empty(), "{:?}", output.diagnostics);
        let module = output.module.unwrap();
        let f = module.function("fill").unwrap();
        assert_eq!(f.params[0].intent, crate::ir::Intent::InOut);
        assert_eq!(f.params[1].intent, crate::ir::Intent::In);
    }

    #[test]
    fn test_negative_literal_index_wraps() {
        let output = analyze_source("def last(a: 'int64[:]') -> int:\n    return a[-1]\n");
        assert!(output.diagnostics.is_empty());
        let module = output.module.unwrap();
        let f = module.function("last").unwrap();
        let TypedStmtKind::Return(Some(value)) = &f.body.stmts[0].kind else {
            panic!("expected a return");
        };
        let crate::ir::TypedExprKind::Index { indices, .. } = &value.kind else {
            panic!("expected an index");
        };
        assert!(matches!(
            indices[0].kind,
            crate::ir::TypedExprKind::Binary { op: crate::ast::BinOp::Sub, .. }
        ));
    }

    #[test]
    fn test_aug_assign_cannot_narrow() {
        assert_eq!(
            codes("def f() -> int:\n    x = 1\n    x /= 2\n    return x\n"),
            vec![DiagnosticCode::TypeMismatch]
        );
    }

    #[test]
    fn test_misplaced_loop_directive_is_dropped() {
        let output = analyze_source(
            "def f(n: int) -> int:\n    #$ parallel-loop\n    s = 0\n    return s\n",
        );
        let codes: Vec<_> = output.diagnostics.iter().map(|d| d.code).collect();
        assert_eq!(codes, vec![DiagnosticCode::MisplacedDirective]);
        assert!(output.module.unwrap().directives.is_empty());
    }

    #[test]
    fn test_parallel_loop_directive_attaches_to_loop() {
        let output = analyze_source(
            "def f(n: int) -> float:\n    s = 0.0\n    #$ parallel-loop reduction(+:s)\n    for i in range(n):\n        s += 1.0\n    return s\n",
        );
        assert!(output.diagnostics.is_empty());
        let module = output.module.unwrap();
        let f = module.function("f").unwrap();
        let loop_id = f.body.stmts[1].id;
        let attached = module.directives.get(loop_id);
        assert_eq!(attached.len(), 1);
        assert_eq!(attached[0].reductions(), vec![("+".to_string(), "s".to_string())]);
    }

    #[test]
    fn test_annotated_local_does_not_widen() {
        let output = analyze_source("def f() -> float:\n    x: int32 = 1\n    y = x + 1\n    return y\n");
        assert!(output.diagnostics.is_empty(), "{:?}", output.diagnostics);
        let module = output.module.unwrap();
        let f = module.function("f").unwrap();
        let x = f.body.locals.iter().find(|l| l.name == "x").unwrap();
        assert_eq!(x.ty, Type::Scalar(ScalarType::INT32));
    }

    #[test]
    fn test_array_alias_is_a_view() {
        let output = analyze_source(
            "import numpy as np\n\ndef f():\n    a = np.zeros(4)\n    b = a\n    b[0] = 1.0\n",
        );
        assert!(output.diagnostics.is_empty(), "{:?}", output.diagnostics);
        let module = output.module.unwrap();
        let f = module.function("f").unwrap();
        assert!(matches!(f.body.stmts[1].kind, TypedStmtKind::Alias { .. }));
        let b = f.body.locals.iter().find(|l| l.name == "b").unwrap();
        assert!(b.alias);
    }
}
