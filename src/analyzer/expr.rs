//! Expression typing: names, operators with broadcasting, indexing,
//! attributes and implicit conversions.

use super::{BodyCtx, ModuleContext, ModuleRef, NameTarget};
use crate::ast::{BinOp, BoolOp, CmpOp, Expr, ExprKind, Location, UnaryOp};
use crate::diagnostics::{DiagnosticCode, SourceLocation};
use crate::ir::{Intrinsic, Literal, TypedExpr, TypedExprKind, VarRef, VarScope};
use crate::promotion::Conversion;
use crate::symbols::{StorageClass, SymbolId, SymbolKind};
use crate::types::{broadcast_shapes, shape_fits, ArrayType, Dim, ScalarKind, ScalarType, Type};

impl<'a> ModuleContext<'a> {
    pub(super) fn analyze_expr(&mut self, ctx: &BodyCtx, expr: &Expr) -> TypedExpr {
        let loc = expr.loc;
        match &expr.kind {
            ExprKind::Int(n) => self.literal(Literal::Int(*n), Type::Scalar(self.policy.default_int), loc),
            ExprKind::Float(x) => {
                self.literal(Literal::Float(*x), Type::Scalar(self.policy.default_float), loc)
            }
            ExprKind::Imag(x) => self.literal(
                Literal::Complex(0.0, *x),
                Type::Scalar(self.policy.default_complex),
                loc,
            ),
            ExprKind::Bool(b) => self.literal(Literal::Bool(*b), Type::Scalar(ScalarType::BOOL), loc),
            ExprKind::Str(_) => self.unsupported(ctx, loc, "string literals are only supported as print arguments"),
            ExprKind::NoneLit => self.unsupported(ctx, loc, "None is only supported as a return value"),
            ExprKind::Name(name) => self.analyze_name(ctx, name, loc),
            ExprKind::Unary { op, operand } => self.analyze_unary(ctx, *op, operand, loc),
            ExprKind::Binary { op, left, right } => {
                let left = self.analyze_expr(ctx, left);
                let right = self.analyze_expr(ctx, right);
                if *op == BinOp::MatMul {
                    self.matmul(ctx, left, right, loc)
                } else {
                    self.binary(ctx, *op, left, right, loc)
                }
            }
            ExprKind::Compare { op, left, right } => {
                let left = self.analyze_expr(ctx, left);
                let right = self.analyze_expr(ctx, right);
                self.compare(ctx, *op, left, right, loc)
            }
            ExprKind::BoolOp { op, left, right } => {
                let left = self.condition(ctx, left);
                let right = self.condition(ctx, right);
                self.logical(*op, left, right, loc)
            }
            ExprKind::Call {
                func,
                args,
                keywords,
            } => self.analyze_call(ctx, func, args, keywords, loc),
            ExprKind::Attribute { value, attr } => self.analyze_attribute(ctx, value, attr, loc),
            ExprKind::Subscript { value, indices } => self.analyze_subscript(ctx, value, indices, loc),
            ExprKind::Slice { .. } => self.unsupported(ctx, loc, "array slices are not supported"),
            ExprKind::Tuple(_) | ExprKind::List(_) => self.unsupported(
                ctx,
                loc,
                "tuples and lists are only supported as array shapes and np.array arguments",
            ),
            ExprKind::IfExp { test, body, orelse } => {
                let test = self.condition(ctx, test);
                let body = self.analyze_expr(ctx, body);
                let orelse = self.analyze_expr(ctx, orelse);
                self.if_exp(ctx, test, body, orelse, loc)
            }
        }
    }

    pub(super) fn literal(&mut self, value: Literal, ty: Type, loc: Location) -> TypedExpr {
        TypedExpr {
            id: self.node(),
            kind: TypedExprKind::Literal(value),
            ty,
            loc,
        }
    }

    pub(super) fn int_literal(&mut self, n: i64, loc: Location) -> TypedExpr {
        let ty = Type::Scalar(self.policy.default_int);
        self.literal(Literal::Int(n), ty, loc)
    }

    pub(super) fn node_of(&mut self, kind: TypedExprKind, ty: Type, loc: Location) -> TypedExpr {
        TypedExpr {
            id: self.node(),
            kind,
            ty,
            loc,
        }
    }

    fn unsupported(&mut self, ctx: &BodyCtx, loc: Location, message: &str) -> TypedExpr {
        self.report(ctx, DiagnosticCode::UnsupportedConstruct, loc, message);
        self.error_expr(loc)
    }

    pub(super) fn mismatch(&mut self, ctx: &BodyCtx, loc: Location, message: String) -> TypedExpr {
        self.report(ctx, DiagnosticCode::TypeMismatch, loc, message);
        self.error_expr(loc)
    }

    /// Reference to a declared variable
    pub(super) fn var_ref(&self, id: SymbolId) -> VarRef {
        let symbol = self.symbols.symbol(id);
        let scope = match symbol.storage {
            StorageClass::Parameter => VarScope::Param,
            StorageClass::Global => VarScope::Global {
                module: symbol.origin.clone().unwrap_or_else(|| self.home.name.clone()),
            },
            StorageClass::Local | StorageClass::ModuleLevel => VarScope::Local,
        };
        VarRef {
            name: self
                .const_names
                .get(&id)
                .cloned()
                .unwrap_or_else(|| symbol.name.clone()),
            symbol: id,
            ty: symbol.ty.clone(),
            scope,
        }
    }

    pub(super) fn alias_root(&self, id: SymbolId) -> SymbolId {
        self.symbols.symbol(id).flags.alias_of.unwrap_or(id)
    }

    pub(super) fn mark_read(&mut self, id: SymbolId) {
        let root = self.alias_root(id);
        self.symbols.symbol_mut(id).flags.read = true;
        self.symbols.symbol_mut(root).flags.read = true;
    }

    pub(super) fn mark_written(&mut self, id: SymbolId) {
        let root = self.alias_root(id);
        self.symbols.symbol_mut(id).flags.written = true;
        self.symbols.symbol_mut(root).flags.written = true;
        self.mark_read(id);
    }

    fn global_ref(&mut self, id: SymbolId, loc: Location) -> TypedExpr {
        let var = self.var_ref(id);
        if let VarScope::Global { module } = &var.scope {
            if *module != self.home.name {
                self.imports_used.insert(module.clone());
            }
        }
        let ty = var.ty.clone();
        self.node_of(TypedExprKind::Var(var), ty, loc)
    }

    /// Read a variable
    pub(super) fn analyze_name(&mut self, ctx: &BodyCtx, name: &str, loc: Location) -> TypedExpr {
        match self.resolve_name(ctx, name) {
            NameTarget::Variable(id) => {
                let symbol = self.symbols.symbol(id).clone();
                if symbol.storage == StorageClass::Global {
                    if ctx.local_names.contains(name) {
                        return self.undeclared(ctx, name, loc, true);
                    }
                    return self.global_ref(id, loc);
                }
                if let Some(other) = symbol.flags.conflict {
                    let file = ctx.file().to_string();
                    let diagnostic = self
                        .diagnostic(
                            &file,
                            DiagnosticCode::TypeMismatch,
                            loc,
                            format!("'{}' is assigned different types in different branches", name),
                        )
                        .with_related(
                            SourceLocation::new(&file, symbol.loc),
                            format!("first assigned here as {}", symbol.ty),
                        )
                        .with_related(SourceLocation::new(&file, other), "assigned a different type here");
                    self.push_diagnostic(diagnostic);
                    let flags = &mut self.symbols.symbol_mut(id).flags;
                    flags.conflict = None;
                    flags.read = true;
                    return self.error_expr(loc);
                }
                if symbol.ty.is_error() {
                    return self.error_expr(loc);
                }
                self.mark_read(id);
                let var = self.var_ref(id);
                let ty = var.ty.clone();
                self.node_of(TypedExprKind::Var(var), ty, loc)
            }
            NameTarget::FloatConst(value) => {
                let ty = Type::Scalar(self.policy.default_float);
                self.literal(Literal::Float(value), ty, loc)
            }
            NameTarget::Undefined => {
                if ctx.local_names.contains(name) {
                    self.undeclared(ctx, name, loc, true)
                } else if ctx.in_function() && ctx.env.module_vars.contains(name) {
                    self.unsupported(
                        ctx,
                        loc,
                        &format!(
                            "functions cannot read module variable '{}'; only module constants are visible",
                            name
                        ),
                    )
                } else {
                    self.undeclared(ctx, name, loc, false)
                }
            }
            NameTarget::Functions(_) | NameTarget::Builtin(_) => self.unsupported(
                ctx,
                loc,
                &format!("function '{}' cannot be used as a value", name),
            ),
            NameTarget::Aggregate(_) => {
                self.unsupported(ctx, loc, &format!("class '{}' cannot be used as a value", name))
            }
            NameTarget::Module(_) => {
                self.unsupported(ctx, loc, &format!("module '{}' cannot be used as a value", name))
            }
        }
    }

    fn undeclared(&mut self, ctx: &BodyCtx, name: &str, loc: Location, local: bool) -> TypedExpr {
        let message = if local {
            format!("local variable '{}' is referenced before assignment", name)
        } else {
            format!("name '{}' is not defined", name)
        };
        self.report(ctx, DiagnosticCode::UndeclaredSymbol, loc, message);
        self.error_expr(loc)
    }

    /// A constant of a user module accessed as `module.NAME`
    fn module_constant(&mut self, ctx: &BodyCtx, module: &str, attr: &str, loc: Location) -> TypedExpr {
        let Some(env) = self.env_of(module) else {
            return self.undeclared(ctx, module, loc, false);
        };
        let scope = self.module_scope(&env);
        match self.symbols.scope(scope).get(attr).and_then(|ids| ids.last().copied()) {
            Some(id) if self.symbols.symbol(id).kind == SymbolKind::Variable => self.global_ref(id, loc),
            Some(_) => self.unsupported(
                ctx,
                loc,
                &format!("'{}.{}' cannot be used as a value", module, attr),
            ),
            None => {
                self.report(
                    ctx,
                    DiagnosticCode::UndeclaredSymbol,
                    loc,
                    format!("module '{}' has no attribute '{}'", module, attr),
                );
                self.error_expr(loc)
            }
        }
    }

    fn analyze_attribute(&mut self, ctx: &BodyCtx, value: &Expr, attr: &str, loc: Location) -> TypedExpr {
        if let Some(base) = value.as_name() {
            match self.resolve_name(ctx, base) {
                NameTarget::Module(module @ (ModuleRef::Numpy | ModuleRef::Math)) => {
                    let numpy = module == ModuleRef::Numpy;
                    if let Some(value) = crate::builtins::constant(attr) {
                        let ty = Type::Scalar(self.policy.default_float);
                        return self.literal(Literal::Float(value), ty, loc);
                    }
                    let callable = if numpy {
                        crate::builtins::numpy(attr).is_some()
                    } else {
                        crate::builtins::math(attr).is_some()
                    };
                    if callable {
                        return self.unsupported(
                            ctx,
                            loc,
                            &format!("function '{}.{}' cannot be used as a value", base, attr),
                        );
                    }
                    let module = if numpy { "numpy" } else { "math" };
                    self.report(
                        ctx,
                        DiagnosticCode::UnsupportedConstruct,
                        loc,
                        format!("'{}.{}' is not supported", module, attr),
                    );
                    return self.error_expr(loc);
                }
                NameTarget::Module(ModuleRef::User(module)) => {
                    return self.module_constant(ctx, &module, attr, loc);
                }
                _ => {}
            }
        }

        let base = self.analyze_expr(ctx, value);
        match base.ty.clone() {
            Type::Error => base,
            Type::Array(array) => match attr {
                "T" => {
                    let ty = Type::Array(crate::builtins::transpose(&array));
                    self.node_of(
                        TypedExprKind::Intrinsic {
                            op: Intrinsic::Transpose,
                            args: vec![base],
                        },
                        ty,
                        loc,
                    )
                }
                "size" => {
                    let ty = Type::Scalar(self.policy.default_int);
                    self.node_of(
                        TypedExprKind::Intrinsic {
                            op: Intrinsic::Size,
                            args: vec![base],
                        },
                        ty,
                        loc,
                    )
                }
                "ndim" => self.int_literal(array.rank() as i64, loc),
                "shape" => self.unsupported(ctx, loc, "'shape' must be indexed, as in a.shape[0]"),
                other => {
                    self.report(
                        ctx,
                        DiagnosticCode::UndeclaredSymbol,
                        loc,
                        format!("array has no attribute '{}'", other),
                    );
                    self.error_expr(loc)
                }
            },
            Type::Aggregate(aggregate) => match aggregate.field(attr) {
                Some((index, ty)) => {
                    let ty = ty.clone();
                    self.node_of(
                        TypedExprKind::Field {
                            base: Box::new(base),
                            field: attr.to_string(),
                            index,
                        },
                        ty,
                        loc,
                    )
                }
                None => {
                    self.report(
                        ctx,
                        DiagnosticCode::UndeclaredSymbol,
                        loc,
                        format!("'{}' has no field '{}'", aggregate.name, attr),
                    );
                    self.error_expr(loc)
                }
            },
            other => self.mismatch(ctx, loc, format!("{} has no attribute '{}'", other, attr)),
        }
    }

    fn analyze_subscript(&mut self, ctx: &BodyCtx, value: &Expr, indices: &[Expr], loc: Location) -> TypedExpr {
        if let ExprKind::Attribute { value: base, attr } = &value.kind {
            if attr == "shape" {
                return self.shape_query(ctx, base, indices, loc);
            }
        }
        let Some(name) = value.as_name() else {
            return self.unsupported(ctx, value.loc, "only named arrays can be indexed");
        };
        let base = self.analyze_name(ctx, name, value.loc);
        let array = match base.kind {
            TypedExprKind::Var(var) if var.ty.as_array().is_some() => var,
            _ if base.ty.is_error() => return base,
            _ => {
                return self.mismatch(
                    ctx,
                    value.loc,
                    format!("'{}' of type {} cannot be indexed", name, base.ty),
                )
            }
        };
        let Some(indices) = self.full_indices(ctx, &array, indices, loc) else {
            return self.error_expr(loc);
        };
        let elem = array.ty.element().map(Type::Scalar).unwrap_or(Type::Error);
        self.node_of(TypedExprKind::Index { array, indices }, elem, loc)
    }

    /// `a.shape[k]`
    fn shape_query(&mut self, ctx: &BodyCtx, base: &Expr, indices: &[Expr], loc: Location) -> TypedExpr {
        let array = self.analyze_expr(ctx, base);
        if array.ty.is_error() {
            return array;
        }
        let rank = match (&array.kind, &array.ty) {
            (TypedExprKind::Var(_), Type::Array(a)) => a.rank(),
            _ => return self.unsupported(ctx, base.loc, "'shape' is only supported on named arrays"),
        };
        let axis = match indices {
            [index] => match self.analyze_expr(ctx, index).kind {
                TypedExprKind::Literal(Literal::Int(k)) if k < 0 && k.unsigned_abs() as usize <= rank => {
                    Some(rank - k.unsigned_abs() as usize)
                }
                TypedExprKind::Literal(Literal::Int(k)) if k >= 0 && (k as usize) < rank => Some(k as usize),
                _ => None,
            },
            _ => None,
        };
        match axis {
            Some(axis) => {
                let ty = Type::Scalar(self.policy.default_int);
                self.node_of(
                    TypedExprKind::Intrinsic {
                        op: Intrinsic::Shape(axis),
                        args: vec![array],
                    },
                    ty,
                    loc,
                )
            }
            None => self.unsupported(
                ctx,
                loc,
                &format!("'shape' must be indexed by an integer literal below {}", rank),
            ),
        }
    }

    /// Typed indices for full indexing of `array`; negative literals wrap
    pub(super) fn full_indices(
        &mut self,
        ctx: &BodyCtx,
        array: &VarRef,
        indices: &[Expr],
        loc: Location,
    ) -> Option<Vec<TypedExpr>> {
        let array_ty = array.ty.as_array().cloned()?;
        if let Some(slice) = indices.iter().find(|i| matches!(i.kind, ExprKind::Slice { .. })) {
            self.report(
                ctx,
                DiagnosticCode::UnsupportedConstruct,
                slice.loc,
                "array slices are not supported",
            );
            return None;
        }
        if indices.len() != array_ty.rank() {
            self.report(
                ctx,
                DiagnosticCode::UnsupportedConstruct,
                loc,
                format!(
                    "'{}' has rank {} but {} indices were given; only full indexing is supported",
                    array.name,
                    array_ty.rank(),
                    indices.len()
                ),
            );
            return None;
        }
        let index_ty = Type::Scalar(self.policy.default_int);
        let mut out = Vec::with_capacity(indices.len());
        let mut failed = false;
        for (axis, index) in indices.iter().enumerate() {
            let typed = self.analyze_expr(ctx, index);
            if typed.ty.is_error() {
                failed = true;
                continue;
            }
            if !typed.ty.is_integer_scalar() {
                self.report(
                    ctx,
                    DiagnosticCode::TypeMismatch,
                    index.loc,
                    format!("array indices must be integers, not {}", typed.ty),
                );
                failed = true;
                continue;
            }
            let typed = self.cast_node(typed, &index_ty);
            let literal = match typed.kind {
                TypedExprKind::Literal(Literal::Int(k)) => Some(k),
                _ => None,
            };
            if let (Some(k), Some(extent)) = (literal, array_ty.shape[axis].known()) {
                let in_bounds = if k < 0 { k.unsigned_abs() <= extent } else { (k as u64) < extent };
                if !in_bounds {
                    self.report(
                        ctx,
                        DiagnosticCode::ShapeMismatch,
                        index.loc,
                        format!(
                            "index {} is out of bounds for axis {} of '{}' with size {}",
                            k, axis, array.name, extent
                        ),
                    );
                    failed = true;
                    continue;
                }
            }
            match literal {
                Some(k) if k < 0 => {
                    let base = self.node_of(TypedExprKind::Var(array.clone()), array.ty.clone(), index.loc);
                    let extent = self.node_of(
                        TypedExprKind::Intrinsic {
                            op: Intrinsic::Shape(axis),
                            args: vec![base],
                        },
                        index_ty.clone(),
                        index.loc,
                    );
                    let offset = self.literal(Literal::Int(-k), index_ty.clone(), index.loc);
                    out.push(self.node_of(
                        TypedExprKind::Binary {
                            op: BinOp::Sub,
                            left: Box::new(extent),
                            right: Box::new(offset),
                        },
                        index_ty.clone(),
                        index.loc,
                    ));
                }
                _ => out.push(typed),
            }
        }
        (!failed).then_some(out)
    }

    fn analyze_unary(&mut self, ctx: &BodyCtx, op: UnaryOp, operand: &Expr, loc: Location) -> TypedExpr {
        if op == UnaryOp::Not {
            let operand = self.condition(ctx, operand);
            if operand.ty.is_error() {
                return operand;
            }
            return self.node_of(
                TypedExprKind::Unary {
                    op,
                    operand: Box::new(operand),
                },
                Type::Scalar(ScalarType::BOOL),
                loc,
            );
        }
        let operand = self.analyze_expr(ctx, operand);
        if operand.ty.is_error() {
            return operand;
        }
        if let TypedExprKind::Literal(value) = &operand.kind {
            let folded = match (op, value) {
                (UnaryOp::Neg, Literal::Int(n)) => n.checked_neg().map(Literal::Int),
                (UnaryOp::Neg, Literal::Float(x)) => Some(Literal::Float(-x)),
                (UnaryOp::Neg, Literal::Complex(re, im)) => Some(Literal::Complex(-re, -im)),
                (UnaryOp::Pos, Literal::Int(_) | Literal::Float(_) | Literal::Complex(..)) => {
                    Some(value.clone())
                }
                _ => None,
            };
            if let Some(folded) = folded {
                let ty = operand.ty.clone();
                return self.literal(folded, ty, loc);
            }
        }
        let Some(elem) = operand.ty.element() else {
            return self.mismatch(ctx, loc, format!("bad operand type for unary {}: {}", op, operand.ty));
        };
        let Some(result) = self.policy.unary(op, elem) else {
            return self.mismatch(ctx, loc, format!("bad operand type for unary {}: {}", op, operand.ty));
        };
        let ty = with_element(&operand.ty, result);
        let operand = self.cast_node(operand, &ty);
        self.node_of(
            TypedExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
            ty,
            loc,
        )
    }

    /// Result shape and order of an element-wise operation
    fn elementwise_layout(
        &mut self,
        ctx: &BodyCtx,
        left: &Type,
        right: &Type,
        loc: Location,
    ) -> Result<Option<(Vec<Dim>, crate::types::Order)>, ()> {
        let (l, r) = (left.as_array(), right.as_array());
        if l.is_none() && r.is_none() {
            return Ok(None);
        }
        let empty = Vec::new();
        let ls = l.map_or(&empty, |a| &a.shape);
        let rs = r.map_or(&empty, |a| &a.shape);
        match broadcast_shapes(ls, rs) {
            Ok(shape) => {
                let order = [l, r]
                    .into_iter()
                    .flatten()
                    .find(|a| a.rank() == shape.len())
                    .map_or(self.config.default_order, |a| a.order);
                Ok(Some((shape, order)))
            }
            Err(mismatch) => {
                self.report(ctx, DiagnosticCode::ShapeMismatch, loc, mismatch.to_string());
                Err(())
            }
        }
    }

    pub(super) fn binary(
        &mut self,
        ctx: &BodyCtx,
        op: BinOp,
        left: TypedExpr,
        right: TypedExpr,
        loc: Location,
    ) -> TypedExpr {
        if left.ty.is_error() || right.ty.is_error() {
            return self.error_expr(loc);
        }
        let (Some(le), Some(re)) = (left.ty.element(), right.ty.element()) else {
            return self.mismatch(
                ctx,
                loc,
                format!("unsupported operand types for {}: {} and {}", op, left.ty, right.ty),
            );
        };
        let Some(result) = self.policy.binary(op, le, re) else {
            return self.mismatch(
                ctx,
                loc,
                format!("unsupported operand types for {}: {} and {}", op, left.ty, right.ty),
            );
        };
        let Ok(layout) = self.elementwise_layout(ctx, &left.ty, &right.ty, loc) else {
            return self.error_expr(loc);
        };
        let ty = match layout {
            Some((shape, order)) => Type::array(result, shape, order),
            None => Type::Scalar(result),
        };
        let left_ty = with_element(&left.ty, result);
        let right_ty = with_element(&right.ty, result);
        let left = self.cast_node(left, &left_ty);
        let right = self.cast_node(right, &right_ty);
        self.node_of(
            TypedExprKind::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
            ty,
            loc,
        )
    }

    fn compare(&mut self, ctx: &BodyCtx, op: CmpOp, left: TypedExpr, right: TypedExpr, loc: Location) -> TypedExpr {
        if left.ty.is_error() || right.ty.is_error() {
            return self.error_expr(loc);
        }
        let (Some(le), Some(re)) = (left.ty.element(), right.ty.element()) else {
            return self.mismatch(
                ctx,
                loc,
                format!("'{}' is not supported between {} and {}", op, left.ty, right.ty),
            );
        };
        if self.policy.compare(op, le, re).is_none() {
            return self.mismatch(
                ctx,
                loc,
                format!("'{}' is not supported between {} and {}", op, left.ty, right.ty),
            );
        }
        let Ok(layout) = self.elementwise_layout(ctx, &left.ty, &right.ty, loc) else {
            return self.error_expr(loc);
        };
        let operand = if le.is_bool() && re.is_bool() {
            ScalarType::BOOL
        } else {
            self.policy.arithmetic(le, re)
        };
        let left_ty = with_element(&left.ty, operand);
        let right_ty = with_element(&right.ty, operand);
        let left = self.cast_node(left, &left_ty);
        let right = self.cast_node(right, &right_ty);
        let ty = match layout {
            Some((shape, order)) => Type::array(ScalarType::BOOL, shape, order),
            None => Type::Scalar(ScalarType::BOOL),
        };
        self.node_of(
            TypedExprKind::Compare {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
            ty,
            loc,
        )
    }

    fn logical(&mut self, op: BoolOp, left: TypedExpr, right: TypedExpr, loc: Location) -> TypedExpr {
        if left.ty.is_error() || right.ty.is_error() {
            return self.error_expr(loc);
        }
        self.node_of(
            TypedExprKind::Logical {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
            Type::Scalar(ScalarType::BOOL),
            loc,
        )
    }

    /// Matrix product of rank-1 and rank-2 arrays
    pub(super) fn matmul(&mut self, ctx: &BodyCtx, left: TypedExpr, right: TypedExpr, loc: Location) -> TypedExpr {
        if left.ty.is_error() || right.ty.is_error() {
            return self.error_expr(loc);
        }
        let (Some(l), Some(r)) = (left.ty.as_array().cloned(), right.ty.as_array().cloned()) else {
            return self.mismatch(
                ctx,
                loc,
                format!("matrix product needs two arrays, got {} and {}", left.ty, right.ty),
            );
        };
        if l.elem.is_bool() || r.elem.is_bool() {
            return self.mismatch(ctx, loc, "matrix product of boolean arrays is not supported".to_string());
        }
        let shape = match crate::builtins::matmul_shape(&l.shape, &r.shape) {
            Ok(shape) => shape,
            Err(message) => {
                let code = if l.rank() <= 2 && r.rank() <= 2 {
                    DiagnosticCode::ShapeMismatch
                } else {
                    DiagnosticCode::UnsupportedConstruct
                };
                self.report(ctx, code, loc, message);
                return self.error_expr(loc);
            }
        };
        let elem = self.policy.arithmetic(l.elem, r.elem);
        let left_ty = with_element(&left.ty, elem);
        let right_ty = with_element(&right.ty, elem);
        let left = self.cast_node(left, &left_ty);
        let right = self.cast_node(right, &right_ty);
        let ty = if shape.is_empty() {
            Type::Scalar(elem)
        } else {
            Type::array(elem, shape, self.config.default_order)
        };
        self.node_of(
            TypedExprKind::MatMul {
                left: Box::new(left),
                right: Box::new(right),
            },
            ty,
            loc,
        )
    }

    fn if_exp(
        &mut self,
        ctx: &BodyCtx,
        test: TypedExpr,
        body: TypedExpr,
        orelse: TypedExpr,
        loc: Location,
    ) -> TypedExpr {
        if test.ty.is_error() || body.ty.is_error() || orelse.ty.is_error() {
            return self.error_expr(loc);
        }
        let (Some(b), Some(o)) = (body.ty.as_scalar(), orelse.ty.as_scalar()) else {
            return self.unsupported(ctx, loc, "conditional expressions must produce scalars");
        };
        let Some(joined) = self.policy.join(b, o) else {
            return self.mismatch(
                ctx,
                loc,
                format!("conditional expression branches have incompatible types {} and {}", b, o),
            );
        };
        let ty = Type::Scalar(joined);
        let body = self.cast_node(body, &ty);
        let orelse = self.cast_node(orelse, &ty);
        self.node_of(
            TypedExprKind::IfExp {
                test: Box::new(test),
                body: Box::new(body),
                orelse: Box::new(orelse),
            },
            ty,
            loc,
        )
    }

    /// A boolean test; numeric scalars compare against zero
    pub(super) fn condition(&mut self, ctx: &BodyCtx, expr: &Expr) -> TypedExpr {
        let typed = self.analyze_expr(ctx, expr);
        match typed.ty.clone() {
            Type::Error => typed,
            Type::Scalar(s) if s.is_bool() => typed,
            Type::Scalar(s) => {
                let zero = self.literal(Literal::Int(0), Type::Scalar(self.policy.default_int), typed.loc);
                let zero = self.cast_node(zero, &Type::Scalar(s));
                let loc = typed.loc;
                self.node_of(
                    TypedExprKind::Compare {
                        op: CmpOp::NotEq,
                        left: Box::new(typed),
                        right: Box::new(zero),
                    },
                    Type::Scalar(ScalarType::BOOL),
                    loc,
                )
            }
            Type::Array(_) => self.mismatch(
                ctx,
                expr.loc,
                "the truth value of an array is ambiguous; use a comparison or a reduction".to_string(),
            ),
            other => self.mismatch(ctx, expr.loc, format!("{} cannot be used as a condition", other)),
        }
    }

    /// Convert without checking; literals are folded
    pub(super) fn cast_node(&mut self, expr: TypedExpr, to: &Type) -> TypedExpr {
        if expr.ty == *to || expr.ty.is_error() || to.is_incomplete() {
            return expr;
        }
        match (&expr.ty, to) {
            (Type::Array(from), Type::Array(target)) if from.elem == target.elem => return expr,
            (Type::Scalar(_), Type::Scalar(target)) => {
                if let TypedExprKind::Literal(value) = &expr.kind {
                    if let Some(folded) = fold_literal(value, *target) {
                        let loc = expr.loc;
                        return self.literal(folded, to.clone(), loc);
                    }
                }
            }
            _ => {}
        }
        let loc = expr.loc;
        let ty = match (&expr.ty, to) {
            (Type::Array(from), Type::Array(target)) => {
                Type::Array(ArrayType::new(target.elem, from.shape.clone(), from.order))
            }
            _ => to.clone(),
        };
        self.node_of(TypedExprKind::Cast(Box::new(expr)), ty, loc)
    }

    /// Whether `from` implicitly converts to `to`, and how
    pub(super) fn conversion(&self, expr: &TypedExpr, to: &Type) -> Option<Conversion> {
        match (&expr.ty, to) {
            (a, b) if a == b => Some(Conversion::Exact),
            (Type::Scalar(from), Type::Scalar(target)) => {
                if let TypedExprKind::Literal(value) = &expr.kind {
                    if literal_fits(value, *target) {
                        return Some(Conversion::Promoted);
                    }
                }
                self.policy.convert(*from, *target)
            }
            (Type::Array(from), Type::Array(target)) => {
                let layout = from.rank() == target.rank() && (from.rank() < 2 || from.order == target.order);
                if !layout || !shape_fits(&target.shape, &from.shape) {
                    return None;
                }
                self.policy.convert(from.elem, target.elem)
            }
            (Type::Aggregate(a), Type::Aggregate(b)) if a.name == b.name => Some(Conversion::Exact),
            _ => None,
        }
    }

    /// Implicitly convert `expr` to `to`, reporting a mismatch otherwise
    pub(super) fn coerce(&mut self, ctx: &BodyCtx, expr: TypedExpr, to: &Type, what: &str) -> TypedExpr {
        if expr.ty.is_error() || to.is_error() {
            return expr;
        }
        match self.conversion(&expr, to) {
            Some(_) => self.cast_node(expr, to),
            None => {
                let code = match (&expr.ty, to) {
                    (Type::Array(a), Type::Array(b))
                        if a.rank() == b.rank() && !shape_fits(&b.shape, &a.shape) =>
                    {
                        DiagnosticCode::ShapeMismatch
                    }
                    _ => DiagnosticCode::TypeMismatch,
                };
                let loc = expr.loc;
                self.report(ctx, code, loc, format!("{}: expected {}, found {}", what, to, expr.ty));
                self.error_expr(loc)
            }
        }
    }
}

/// `ty` with its element type replaced
pub(super) fn with_element(ty: &Type, elem: ScalarType) -> Type {
    match ty {
        Type::Array(a) => Type::Array(ArrayType::new(elem, a.shape.clone(), a.order)),
        _ => Type::Scalar(elem),
    }
}

fn literal_fits(value: &Literal, target: ScalarType) -> bool {
    match (value, target.kind) {
        (Literal::Int(n), ScalarKind::Int) => match target.bits {
            8 => i8::try_from(*n).is_ok(),
            16 => i16::try_from(*n).is_ok(),
            32 => i32::try_from(*n).is_ok(),
            _ => true,
        },
        (Literal::Int(_) | Literal::Float(_), ScalarKind::Float) => true,
        (Literal::Int(_) | Literal::Float(_) | Literal::Complex(..), ScalarKind::Complex) => true,
        (Literal::Bool(_), ScalarKind::Bool) => true,
        _ => false,
    }
}

fn fold_literal(value: &Literal, target: ScalarType) -> Option<Literal> {
    Some(match (value, target.kind) {
        (Literal::Int(n), ScalarKind::Int) => Literal::Int(*n),
        (Literal::Int(n), ScalarKind::Float) => Literal::Float(*n as f64),
        (Literal::Int(n), ScalarKind::Complex) => Literal::Complex(*n as f64, 0.0),
        (Literal::Int(n), ScalarKind::Bool) => Literal::Bool(*n != 0),
        (Literal::Float(x), ScalarKind::Float) => Literal::Float(*x),
        (Literal::Float(x), ScalarKind::Complex) => Literal::Complex(*x, 0.0),
        (Literal::Complex(re, im), ScalarKind::Complex) => Literal::Complex(*re, *im),
        (Literal::Bool(b), ScalarKind::Bool) => Literal::Bool(*b),
        (Literal::Bool(b), ScalarKind::Int) => Literal::Int(i64::from(*b)),
        (Literal::Bool(b), ScalarKind::Float) => Literal::Float(if *b { 1.0 } else { 0.0 }),
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::super::tests::analyze_source;
    use super::*;
    use crate::ir::TypedStmtKind;

    fn return_type(source: &str, function: &str) -> Type {
        let output = analyze_source(source);
        assert!(output.diagnostics.is_empty(), "{:?}", output.diagnostics);
        output.module.unwrap().function(function).unwrap().ret.clone()
    }

    #[test]
    fn test_true_division_of_integers_is_float() {
        let ty = return_type("def f(a: int, b: int):\n    return a / b\n", "f");
        assert_eq!(ty, Type::Scalar(ScalarType::FLOAT64));
    }

    #[test]
    fn test_integer_power_stays_integer() {
        let ty = return_type("def f(a: int):\n    return a ** 2\n", "f");
        assert_eq!(ty, Type::Scalar(ScalarType::INT64));
    }

    #[test]
    fn test_array_comparison_is_boolean_array() {
        let ty = return_type(
            "import numpy as np\n\ndef f():\n    a = np.ones(5)\n    return a > 0.5\n",
            "f",
        );
        assert_eq!(ty.element(), Some(ScalarType::BOOL));
        assert_eq!(ty.rank(), 1);
    }

    #[test]
    fn test_numeric_condition_compares_against_zero() {
        let output = analyze_source("def f(n: int) -> int:\n    if n:\n        return 1\n    return 0\n");
        assert!(output.diagnostics.is_empty());
        let module = output.module.unwrap();
        let TypedStmtKind::If { branches, .. } = &module.function("f").unwrap().body.stmts[0].kind else {
            panic!("expected an if");
        };
        assert!(matches!(branches[0].0.kind, TypedExprKind::Compare { op: CmpOp::NotEq, .. }));
    }

    #[test]
    fn test_array_condition_is_rejected() {
        let output = analyze_source(
            "import numpy as np\n\ndef f():\n    a = np.zeros(3)\n    if a:\n        pass\n",
        );
        let codes: Vec<_> = output.diagnostics.iter().map(|d| d.code).collect();
        assert_eq!(codes, vec![DiagnosticCode::TypeMismatch]);
    }

    #[test]
    fn test_matmul_shapes() {
        let ty = return_type(
            "import numpy as np\n\ndef f():\n    a = np.ones((2, 3))\n    b = np.ones((3, 5))\n    return a @ b\n",
            "f",
        );
        assert_eq!(ty.as_array().unwrap().shape, vec![Dim::Known(2), Dim::Known(5)]);
        let output = analyze_source(
            "import numpy as np\n\ndef f():\n    a = np.ones((2, 3))\n    b = np.ones((4, 5))\n    c = a @ b\n",
        );
        let first = output.diagnostics.iter().next().unwrap();
        assert_eq!(first.code, DiagnosticCode::ShapeMismatch);
    }

    #[test]
    fn test_shape_query_and_index_out_of_bounds() {
        let ty = return_type("def f(a: 'float64[:,:]'):\n    return a.shape[1]\n", "f");
        assert_eq!(ty, Type::Scalar(ScalarType::INT64));
        let output = analyze_source(
            "import numpy as np\n\ndef f() -> float:\n    a = np.zeros(3)\n    return a[3]\n",
        );
        let first = output.diagnostics.iter().next().unwrap();
        assert_eq!(first.code, DiagnosticCode::ShapeMismatch);
    }

    #[test]
    fn test_literal_folding() {
        assert_eq!(fold_literal(&Literal::Int(2), ScalarType::FLOAT32), Some(Literal::Float(2.0)));
        assert_eq!(fold_literal(&Literal::Complex(1.0, 1.0), ScalarType::FLOAT64), None);
        assert!(literal_fits(&Literal::Int(127), ScalarType::INT8));
        assert!(!literal_fits(&Literal::Int(128), ScalarType::INT8));
    }

    #[test]
    fn test_module_constant_via_numpy() {
        let ty = return_type("import numpy as np\n\ndef f(r: float):\n    return np.pi * r\n", "f");
        assert_eq!(ty, Type::Scalar(ScalarType::FLOAT64));
    }
}
