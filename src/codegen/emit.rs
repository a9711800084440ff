//! Statement lowering shared by the C and Fortran backends
//!
//! [`BodyEmitter`] walks one function body (or the program body) and turns
//! every statement into target lines. Array statements become explicit loop
//! nests over the result extents; everything language specific is asked of a
//! [`Syntax`] implementation.

use std::collections::HashSet;

use crate::analyzer::RESERVED_PREFIX;
use crate::ast::{BinOp, BoolOp, CmpOp, Location, UnaryOp};
use crate::codegen::lower::{self, Extent, Hoisted, Hoister, IndexTerm, Namer, Temps};
use crate::codegen::writer::CodeWriter;
use crate::config::CompilerConfig;
use crate::diagnostics::{Diagnostic, DiagnosticCode, Diagnostics, SourceLocation};
use crate::directives::{Clause, Directive, DirectiveKey};
use crate::ir::{
    FunctionRef, Intrinsic, LValue, Literal, LocalVar, MathFn, Reduction, TypedExpr, TypedExprKind,
    TypedModule, TypedParam, TypedStmt, TypedStmtKind, VarRef, VarScope,
};
use crate::symbols::SymbolId;
use crate::types::{ArrayType, Dim, Order, ScalarKind, ScalarType, Type};

/// Result variable of functions that return through a named slot
pub(crate) const RESULT: &str = "nv_result";
/// Contraction index of matrix products
pub(crate) const DOT_INDEX: &str = "nv_k";

/// Marks a pending function exit in the body text; resolved in `finish`
const EXIT_MARKER: char = '\u{1}';

pub(crate) fn loop_index(axis: usize) -> String {
    format!("nv_i{}", axis)
}

/// Emission of the current body stopped; a diagnostic says why
#[derive(Debug)]
pub(crate) struct Abandoned;

pub(crate) type Emit<T = ()> = Result<T, Abandoned>;

/// What a directive in front of a loop turns into
pub(crate) enum DirectiveLowering {
    /// Lines around the loop
    Wrap { open: Vec<String>, close: Vec<String> },
    /// Split the iteration range across processes
    Distribute,
}

/// `name(value)` clauses in OpenMP spelling
pub(crate) fn omp_clauses(directive: &Directive, private: &[String]) -> String {
    let mut parts: Vec<String> = directive.clauses.iter().map(omp_clause).collect();
    if !private.is_empty() {
        parts.push(format!("private({})", private.join(", ")));
    }
    parts.join(" ")
}

fn omp_clause(clause: &Clause) -> String {
    match &clause.value {
        Some(value) if !clause.text.ends_with(')') => format!("{}({})", clause.name, value),
        _ => clause.text.clone(),
    }
}

/// `text` without one pair of enclosing parentheses
pub(crate) fn bare(text: &str) -> &str {
    let Some(inner) = text.strip_prefix('(').and_then(|t| t.strip_suffix(')')) else {
        return text;
    };
    let mut depth = 0i32;
    for c in inner.chars() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return text;
                }
            }
            _ => {}
        }
    }
    if depth == 0 {
        inner
    } else {
        text
    }
}

/// Zero or one of a scalar type
pub(crate) fn unit_literal(elem: ScalarType, one: bool) -> Literal {
    let v = if one { 1.0 } else { 0.0 };
    match elem.kind {
        ScalarKind::Bool => Literal::Bool(one),
        ScalarKind::Int => Literal::Int(i64::from(one)),
        ScalarKind::Float => Literal::Float(v),
        ScalarKind::Complex => Literal::Complex(v, 0.0),
    }
}

/// Link-level name of a function. Private functions (instances of generics
/// defined elsewhere) are qualified with the unit so that two units realizing
/// the same instance do not clash.
pub(crate) fn function_symbol(module: &TypedModule, emitted: &str, defined_in: &str) -> String {
    let private = defined_in == module.name
        && module
            .function(emitted)
            .map_or(false, |f| !f.public);
    if private {
        format!("{}{}_{}", RESERVED_PREFIX, module.name, emitted)
    } else {
        emitted.to_string()
    }
}

/// Names a body may not use for its variables
pub(crate) fn taken_names<S: Syntax>(syntax: &S, module: &TypedModule, stmts: &[TypedStmt]) -> Vec<String> {
    let mut taken = vec![module.name.clone()];
    taken.extend(module.imports.iter().cloned());
    taken.extend(module.aggregates.iter().map(|a| a.name.clone()));
    taken.extend(module.globals.iter().map(|g| syntax.global(&module.name, &g.name)));
    taken.extend(
        module
            .functions
            .iter()
            .map(|f| syntax.function_name(&function_symbol(module, &f.emitted_name, &f.module))),
    );
    taken.extend(
        lower::callees(stmts)
            .iter()
            .map(|c| syntax.function_name(&function_symbol(module, &c.emitted_name, &c.module))),
    );
    taken
}

/// Target-language spelling used by [`BodyEmitter`]
pub(crate) trait Syntax {
    /// Owned arrays must be released at every exit
    const MANUAL_FREE: bool;

    fn reserved(&self) -> &'static [&'static str];
    fn fold_case(&self) -> bool;

    fn literal(&self, value: &Literal, ty: ScalarType) -> String;
    fn string(&self, text: &str) -> String;
    /// Module constant `name` of `module`
    fn global(&self, module: &str, name: &str) -> String;
    /// Use of a parameter inside the body
    fn param(&self, name: &str, ty: &Type) -> String;
    fn unary(&self, op: UnaryOp, operand: &str, elem: ScalarType) -> String;
    /// Python arithmetic on operands already converted to `elem`
    fn binary(&self, op: BinOp, left: &str, right: &str, elem: ScalarType) -> String;
    fn compare(&self, op: CmpOp, left: &str, right: &str, elem: ScalarType) -> String;
    fn logical(&self, op: BoolOp, left: &str, right: &str) -> String;
    fn cast(&self, value: &str, from: ScalarType, to: ScalarType) -> String;
    fn math(&self, f: MathFn, arg: &str, arg_elem: ScalarType, result: ScalarType) -> String;
    fn extreme(&self, r: Reduction, args: &[String], elem: ScalarType) -> String;
    fn select(&self, test: &str, body: &str, orelse: &str) -> String;
    /// Legal spelling of a function symbol
    fn function_name(&self, symbol: &str) -> String;
    fn call(&self, function: &str, args: &[String]) -> String;
    fn call_arg(&self, arg: &str, ty: &Type) -> String;
    fn field(&self, base: &str, field: &str) -> String;
    fn construct(&self, aggregate: &str, args: &[String]) -> String;

    /// Element of `array` at a 0-based logical index
    fn element(&self, array: &str, ty: &ArrayType, indices: &[String]) -> String;
    fn extent(&self, array: &str, ty: &ArrayType, axis: usize) -> String;
    fn size(&self, array: &str, ty: &ArrayType) -> String;
    /// `0` when `extent` is one, `index` otherwise
    fn guard(&self, extent: &str, index: &str) -> String;
    /// Element count of `arange(start, stop, step)`
    fn count(&self, start: &str, stop: &str, step: &str, elem: ScalarType) -> String;
    fn max_extent(&self, a: &str, b: &str) -> String;
    /// Whole-array reduction, when the target has one
    fn reduction(&self, r: Reduction, array: &str, ty: &ArrayType) -> Option<String>;
    /// Whole-array product, when the target has one
    fn matmul(&self, left: (&str, &ArrayType), right: (&str, &ArrayType), result: &Type) -> Option<String>;
    /// Whole-array fill, when the target has one
    fn fill(&self, target: &str, value: &str) -> Option<String>;

    fn assign(&self, target: &str, value: &str) -> String;
    /// Give `target` the shape `extents`, keeping its storage when the shape
    /// is unchanged
    fn allocate(&self, w: &mut CodeWriter, target: &str, ty: &ArrayType, extents: &[String]);
    /// Store the array result of a call
    fn take(&self, target: &str, call: &str) -> String;
    fn alias(&self, target: &str, source: &str) -> String;
    /// Owned copy of an array that outlives the body
    fn return_copy(&self, source: &str) -> String;
    /// Hand an owned array over as the function result
    fn move_result(&self, source: &str) -> Option<String>;
    fn call_stmt(&self, call: &str) -> String;
    fn free(&self, array: &str) -> String;
    fn ret(&self, value: Option<&str>) -> String;
    fn line_marker(&self, line: u32, file: &str) -> Option<String>;

    /// Loop over `range(start, stop, step)` on an existing variable
    fn for_open(&self, var: &str, start: &str, stop: &str, step: i64) -> String;
    /// Loop over `0..extent` on a compiler index
    fn index_loop_open(&self, var: &str, extent: &str) -> String;
    fn loop_close(&self) -> String;
    fn while_open(&self, test: &str) -> String;
    fn if_open(&self, test: &str) -> String;
    fn else_if(&self, test: &str) -> String;
    fn else_open(&self) -> String;
    fn if_close(&self) -> String;
    fn break_stmt(&self) -> String;
    fn continue_stmt(&self) -> String;
    /// Lines printing `args`; `None` marks a string literal
    fn print(&self, args: &[(String, Option<ScalarType>)]) -> Vec<String>;

    fn loop_directive(&self, directive: &Directive, private: &[String]) -> DirectiveLowering;
    /// Pass-through line for a directive on a statement that is not a loop
    fn stmt_directive(&self, directive: &Directive) -> Option<String>;
    /// Emit the local range of a distributed loop; returns the new bounds
    fn distribute_bounds(&self, w: &mut CodeWriter, start: &str, stop: &str, step: i64) -> Option<(String, String)>;
    /// Combine a reduction variable across processes
    fn allreduce(&self, op: &str, var: &str, ty: &Type) -> Option<String>;
}

/// A function exit whose cleanup is only known once the body is complete
#[derive(Debug)]
struct Exit {
    value: Option<String>,
    /// Owned array handed to the caller
    kept: Option<String>,
    returns: bool,
}

/// A body rendered by [`BodyEmitter::finish`]
#[derive(Debug)]
pub(crate) struct BodyParts {
    pub text: String,
    pub temps: Vec<VarRef>,
    pub max_rank: usize,
    pub uses_dot_index: bool,
    pub uses_result: bool,
    pub uses_distribute: bool,
    pub namer: Namer,
}

/// Loop indices of a nest with the shape and extents of its result
#[derive(Debug, Clone)]
struct Nest {
    idx: Vec<String>,
    dims: Vec<Dim>,
    extents: Vec<String>,
}

impl Nest {
    fn new(idx: &[String], dims: &[Dim], extents: &[String]) -> Self {
        Self {
            idx: idx.to_vec(),
            dims: dims.to_vec(),
            extents: extents.to_vec(),
        }
    }

    /// The trailing `rank` axes, where a broadcast operand lines up
    fn tail(&self, rank: usize) -> Option<Nest> {
        let skip = self.idx.len().checked_sub(rank)?;
        Some(Nest {
            idx: self.idx[skip..].to_vec(),
            dims: self.dims.get(skip..)?.to_vec(),
            extents: self.extents.get(skip..)?.to_vec(),
        })
    }

    fn reversed(&self) -> Nest {
        Nest {
            idx: self.idx.iter().rev().cloned().collect(),
            dims: self.dims.iter().rev().cloned().collect(),
            extents: self.extents.iter().rev().cloned().collect(),
        }
    }
}

pub(crate) struct BodyEmitter<'a, S: Syntax> {
    syntax: &'a S,
    module: &'a TypedModule,
    config: &'a CompilerConfig,
    pub namer: Namer,
    temps: Temps,
    w: CodeWriter,
    diagnostics: &'a mut Diagnostics,
    ret: Type,
    params: Vec<TypedParam>,
    locals: Vec<LocalVar>,
    aliases: HashSet<SymbolId>,
    exits: Vec<Exit>,
    max_rank: usize,
    uses_dot_index: bool,
    uses_distribute: bool,
}

impl<'a, S: Syntax> BodyEmitter<'a, S> {
    /// `w` fixes the indentation unit and the starting level
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        syntax: &'a S,
        module: &'a TypedModule,
        config: &'a CompilerConfig,
        w: CodeWriter,
        diagnostics: &'a mut Diagnostics,
        ret: Type,
        params: &[TypedParam],
        locals: &[LocalVar],
        taken: &[String],
    ) -> Self {
        let mut namer = Namer::new(syntax.reserved(), syntax.fold_case());
        for name in taken {
            namer.reserve(name);
        }
        for param in params {
            namer.bind(param.symbol, &param.name);
        }
        for local in locals {
            namer.bind(local.symbol, &local.name);
        }
        Self {
            syntax,
            module,
            config,
            namer,
            temps: Temps::default(),
            w,
            diagnostics,
            ret,
            params: params.to_vec(),
            locals: locals.to_vec(),
            aliases: locals.iter().filter(|l| l.alias).map(|l| l.symbol).collect(),
            exits: Vec::new(),
            max_rank: 0,
            uses_dot_index: false,
            uses_distribute: false,
        }
    }

    fn report(&mut self, code: DiagnosticCode, loc: Location, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic::new(
            code,
            message,
            SourceLocation::new(&self.module.file, loc),
        ));
    }

    fn internal<T>(&mut self, loc: Location, message: impl Into<String>) -> Emit<T> {
        self.report(DiagnosticCode::InternalError, loc, message);
        Err(Abandoned)
    }

    // ----- names -------------------------------------------------------

    pub fn var_text(&self, var: &VarRef) -> String {
        match &var.scope {
            VarScope::Global { module } => self.syntax.global(module, &var.name),
            VarScope::Param => self.syntax.param(&self.namer.name(var), &var.ty),
            VarScope::Local => self.namer.name(var),
        }
    }

    /// Whether this body allocated `var` and may hand it out
    fn is_owned(&self, var: &VarRef) -> bool {
        var.scope == VarScope::Local && var.ty.as_array().is_some() && !self.aliases.contains(&var.symbol)
    }

    /// Shape `target` for a new value; only arrays the body owns can change
    /// shape, parameters and aliases are written in place
    fn allocate(&mut self, target: &VarRef, name: &str, ty: &ArrayType, extents: &[String]) {
        if self.is_owned(target) {
            self.syntax.allocate(&mut self.w, name, ty, extents);
        }
    }

    fn owned_arrays(&self) -> Vec<String> {
        let locals = self
            .locals
            .iter()
            .filter(|l| !l.alias && l.ty.as_array().is_some())
            .map(|l| {
                self.namer.name(&VarRef {
                    name: l.name.clone(),
                    symbol: l.symbol,
                    ty: l.ty.clone(),
                    scope: VarScope::Local,
                })
            });
        let temps = self
            .temps
            .declared
            .iter()
            .filter(|t| t.ty.as_array().is_some())
            .map(|t| t.name.clone());
        locals.chain(temps).collect()
    }

    // ----- expressions -------------------------------------------------

    fn array_of<'t>(&mut self, var: &'t VarRef, loc: Location) -> Emit<&'t ArrayType> {
        match var.ty.as_array() {
            Some(array) => Ok(array),
            None => self.internal(loc, format!("'{}' is not an array", var.name)),
        }
    }

    fn elem_of(&mut self, expr: &TypedExpr) -> Emit<ScalarType> {
        match expr.ty.element() {
            Some(elem) => Ok(elem),
            None => self.internal(expr.loc, format!("expected a numeric value, found {}", expr.ty)),
        }
    }

    /// Named array operand left by the hoister
    fn named<'e>(&mut self, expr: &'e TypedExpr) -> Emit<&'e VarRef> {
        match &expr.kind {
            TypedExprKind::Var(var) if var.ty.as_array().is_some() => Ok(var),
            _ => self.internal(expr.loc, "array operand was not named before lowering"),
        }
    }

    /// Scalar-valued expression text
    fn render(&mut self, expr: &TypedExpr) -> Emit<String> {
        let syntax = self.syntax;
        Ok(match &expr.kind {
            TypedExprKind::Literal(Literal::Str(text)) => syntax.string(text),
            TypedExprKind::Literal(value) => {
                let elem = self.elem_of(expr)?;
                syntax.literal(value, elem)
            }
            TypedExprKind::Var(var) => self.var_text(var),
            TypedExprKind::Unary { op, operand } => {
                let elem = self.elem_of(operand)?;
                let operand = self.render(operand)?;
                syntax.unary(*op, &operand, elem)
            }
            TypedExprKind::Binary { op, left, right } => {
                let elem = self.elem_of(expr)?;
                let (l, r) = (self.render(left)?, self.render(right)?);
                syntax.binary(*op, &l, &r, elem)
            }
            TypedExprKind::Compare { op, left, right } => {
                let elem = self.elem_of(left)?;
                let (l, r) = (self.render(left)?, self.render(right)?);
                syntax.compare(*op, &l, &r, elem)
            }
            TypedExprKind::Logical { op, left, right } => {
                let (l, r) = (self.render(left)?, self.render(right)?);
                syntax.logical(*op, &l, &r)
            }
            TypedExprKind::Cast(inner) => {
                let (from, to) = (self.elem_of(inner)?, self.elem_of(expr)?);
                let value = self.render(inner)?;
                syntax.cast(&value, from, to)
            }
            TypedExprKind::Call { callee, args } => self.render_call(callee, args)?,
            TypedExprKind::Intrinsic { op, args } => self.render_intrinsic(expr, op, args)?,
            TypedExprKind::Index { array, indices } => {
                let ty = self.array_of(array, expr.loc)?;
                let indices = indices.iter().map(|i| self.render(i)).collect::<Emit<Vec<_>>>()?;
                syntax.element(&self.var_text(array), ty, &indices)
            }
            TypedExprKind::Field { base, field, .. } => {
                let base = self.render(base)?;
                syntax.field(&base, field)
            }
            TypedExprKind::Construct { aggregate, args } => {
                let args = args.iter().map(|a| self.render(a)).collect::<Emit<Vec<_>>>()?;
                syntax.construct(aggregate, &args)
            }
            TypedExprKind::IfExp { test, body, orelse } => {
                let (t, b, o) = (self.render(test)?, self.render(body)?, self.render(orelse)?);
                syntax.select(&t, &b, &o)
            }
            TypedExprKind::MatMul { .. } => {
                return self.internal(expr.loc, "matrix product reached expression lowering");
            }
        })
    }

    fn render_call(&mut self, callee: &FunctionRef, args: &[TypedExpr]) -> Emit<String> {
        let mut rendered = Vec::with_capacity(args.len());
        for arg in args {
            let text = self.render(arg)?;
            rendered.push(self.syntax.call_arg(&text, &arg.ty));
        }
        let name = self
            .syntax
            .function_name(&function_symbol(self.module, &callee.emitted_name, &callee.module));
        Ok(self.syntax.call(&name, &rendered))
    }

    fn render_intrinsic(&mut self, expr: &TypedExpr, op: &Intrinsic, args: &[TypedExpr]) -> Emit<String> {
        let syntax = self.syntax;
        let first = match args.first() {
            Some(first) => first,
            None => return self.internal(expr.loc, "intrinsic without arguments"),
        };
        Ok(match op {
            Intrinsic::Math(f) => {
                let (arg_elem, result) = (self.elem_of(first)?, self.elem_of(expr)?);
                let arg = self.render(first)?;
                syntax.math(*f, &arg, arg_elem, result)
            }
            Intrinsic::ScalarExtreme(r) => {
                let elem = self.elem_of(expr)?;
                let args = args.iter().map(|a| self.render(a)).collect::<Emit<Vec<_>>>()?;
                syntax.extreme(*r, &args, elem)
            }
            Intrinsic::Len | Intrinsic::Shape(_) | Intrinsic::Size => {
                let var = self.named(first)?;
                let ty = self.array_of(var, expr.loc)?;
                let name = self.var_text(var);
                match op {
                    Intrinsic::Len => syntax.extent(&name, ty, 0),
                    Intrinsic::Shape(axis) => syntax.extent(&name, ty, *axis),
                    _ => syntax.size(&name, ty),
                }
            }
            other => {
                return self.internal(expr.loc, format!("intrinsic {:?} reached expression lowering", other));
            }
        })
    }

    /// Per-element text of an element-wise array expression inside `nest`
    fn render_elem(&mut self, expr: &TypedExpr, nest: &Nest) -> Emit<String> {
        let Some(array) = expr.ty.as_array() else {
            return self.render(expr);
        };
        let Some(nest) = nest.tail(array.rank()) else {
            return self.internal(expr.loc, "operand has a higher rank than its result");
        };
        let syntax = self.syntax;
        let elem = array.elem;
        Ok(match &expr.kind {
            TypedExprKind::Var(var) => {
                let name = self.var_text(var);
                let indices: Vec<String> = (0..array.rank())
                    .map(|axis| match lower::leaf_index(&array.shape[axis], &nest.dims[axis]) {
                        IndexTerm::Zero => "0".to_string(),
                        IndexTerm::Loop => nest.idx[axis].clone(),
                        IndexTerm::Guarded => {
                            let extent = syntax.extent(&name, array, axis);
                            if extent == nest.extents[axis] {
                                nest.idx[axis].clone()
                            } else {
                                syntax.guard(&extent, &nest.idx[axis])
                            }
                        }
                    })
                    .collect();
                syntax.element(&name, array, &indices)
            }
            TypedExprKind::Unary { op, operand } => {
                let operand_elem = self.elem_of(operand)?;
                let operand = self.render_elem(operand, &nest)?;
                syntax.unary(*op, &operand, operand_elem)
            }
            TypedExprKind::Binary { op, left, right } => {
                let l = self.render_elem(left, &nest)?;
                let r = self.render_elem(right, &nest)?;
                syntax.binary(*op, &l, &r, elem)
            }
            TypedExprKind::Compare { op, left, right } => {
                let operand_elem = self.elem_of(left)?;
                let l = self.render_elem(left, &nest)?;
                let r = self.render_elem(right, &nest)?;
                syntax.compare(*op, &l, &r, operand_elem)
            }
            TypedExprKind::Cast(inner) => {
                let from = self.elem_of(inner)?;
                let value = self.render_elem(inner, &nest)?;
                syntax.cast(&value, from, elem)
            }
            TypedExprKind::Intrinsic {
                op: Intrinsic::Math(f),
                args,
            } if args.len() == 1 => {
                let arg_elem = self.elem_of(&args[0])?;
                let arg = self.render_elem(&args[0], &nest)?;
                syntax.math(*f, &arg, arg_elem, elem)
            }
            TypedExprKind::Intrinsic {
                op: Intrinsic::Transpose,
                args,
            } if args.len() == 1 => self.render_elem(&args[0], &nest.reversed())?,
            _ => return self.internal(expr.loc, "array value reached element-wise lowering unnamed"),
        })
    }

    fn render_extent(&mut self, extent: &Extent) -> Emit<String> {
        let syntax = self.syntax;
        Ok(match extent {
            Extent::Const(n) => n.to_string(),
            Extent::Axis { array, axis } => {
                let ty = self.array_of(array, Location::default())?;
                syntax.extent(&self.var_text(array), ty, *axis)
            }
            Extent::Value(value) => {
                let text = self.render(value)?;
                match value.ty.as_scalar() {
                    Some(elem) if elem != ScalarType::INT64 => syntax.cast(&text, elem, ScalarType::INT64),
                    _ => text,
                }
            }
            Extent::Count { start, stop, step } => {
                let elem = self.elem_of(start)?;
                let (a, b, c) = (self.render(start)?, self.render(stop)?, self.render(step)?);
                syntax.count(&a, &b, &c, elem)
            }
            Extent::Max(a, b) => {
                let (a, b) = (self.render_extent(a)?, self.render_extent(b)?);
                syntax.max_extent(&a, &b)
            }
        })
    }

    fn extents_of(&mut self, expr: &TypedExpr) -> Emit<Vec<String>> {
        match lower::extents(expr) {
            Some(extents) => extents.iter().map(|e| self.render_extent(e)).collect(),
            None => self.internal(expr.loc, format!("no extent source for a value of type {}", expr.ty)),
        }
    }

    /// Store non-constant extents in temporaries before the target changes
    fn pin_extents(&mut self, extents: Vec<String>) -> Vec<String> {
        extents
            .into_iter()
            .map(|extent| {
                if extent.parse::<u64>().is_ok() {
                    return extent;
                }
                let temp = self.temps.fresh(Type::Scalar(ScalarType::INT64));
                self.w.line(self.syntax.assign(&temp.name, &extent));
                temp.name
            })
            .collect()
    }

    // ----- loop nests --------------------------------------------------

    /// Loops over every index of `extents`, in memory order of `order`
    fn loop_nest(
        &mut self,
        extents: &[String],
        order: Order,
        body: impl FnOnce(&mut Self, &[String]) -> Emit,
    ) -> Emit {
        let rank = extents.len();
        self.max_rank = self.max_rank.max(rank);
        let idx: Vec<String> = (0..rank).map(loop_index).collect();
        for axis in lower::loop_order(rank, order) {
            self.w.line(self.syntax.index_loop_open(&idx[axis], &extents[axis]));
            self.w.indent();
        }
        body(self, &idx)?;
        for _ in 0..rank {
            self.w.dedent();
            self.w.line(self.syntax.loop_close());
        }
        Ok(())
    }

    // ----- array assignment --------------------------------------------

    fn emit_hoisted(&mut self, hoisted: Vec<Hoisted>) -> Emit {
        for Hoisted { temp, value } in hoisted {
            self.assign_to(&temp, &value)?;
        }
        Ok(())
    }

    /// `target = value` for a value the hoister already split
    fn assign_to(&mut self, target: &VarRef, value: &TypedExpr) -> Emit {
        if target.ty.as_array().is_some() {
            return self.assign_array(target, value);
        }
        if lower::is_scalar_loop(value) {
            return self.scalar_loop(target, value);
        }
        let text = self.render(value)?;
        self.w.line(self.syntax.assign(&self.var_text(target), &text));
        Ok(())
    }

    fn assign_array(&mut self, target: &VarRef, value: &TypedExpr) -> Emit {
        match &value.kind {
            TypedExprKind::Call { .. } => {
                let call = self.render(value)?;
                self.w.line(self.syntax.take(&self.var_text(target), &call));
                Ok(())
            }
            TypedExprKind::MatMul { left, right } => self.matmul_into(target, value, left, right),
            TypedExprKind::Intrinsic { op, args }
                if matches!(
                    op,
                    Intrinsic::Zeros
                        | Intrinsic::Ones
                        | Intrinsic::Empty
                        | Intrinsic::Full
                        | Intrinsic::Arange
                        | Intrinsic::ArrayLiteral
                ) =>
            {
                self.create(target, value, op, args)
            }
            _ => {
                if self.overlaps(target, value) {
                    let temp = self.temps.fresh(value.ty.clone());
                    self.assign_elementwise(&temp, value)?;
                    let copy = var_expr(&temp, value);
                    return self.assign_elementwise(target, &copy);
                }
                self.assign_elementwise(target, value)
            }
        }
    }

    /// Whether writing `target` element by element would clobber operands
    /// still to be read
    fn overlaps(&self, target: &VarRef, value: &TypedExpr) -> bool {
        if !lower::reads(value, target) {
            return false;
        }
        let shape = value.ty.as_array().map(|a| &a.shape);
        let stable = shape.map_or(false, |s| s.iter().all(Dim::is_known))
            && target.ty.as_array().map(|a| &a.shape) == shape;
        lower::has_transpose(value) || !stable
    }

    fn assign_elementwise(&mut self, target: &VarRef, value: &TypedExpr) -> Emit {
        let tarr = self.array_of(target, value.loc)?.clone();
        let name = self.var_text(target);
        let extents = self.extents_of(value)?;
        self.allocate(target, &name, &tarr, &extents);
        let dims = value.ty.as_array().map(|a| a.shape.clone()).unwrap_or_default();
        let from = self.elem_of(value)?;
        self.loop_nest(&extents, tarr.order, |this, idx| {
            let mut text = this.render_elem(value, &Nest::new(idx, &dims, &extents))?;
            if from != tarr.elem {
                text = this.syntax.cast(&text, from, tarr.elem);
            }
            let element = this.syntax.element(&name, &tarr, idx);
            this.w.line(this.syntax.assign(&element, &text));
            Ok(())
        })
    }

    fn create(&mut self, target: &VarRef, value: &TypedExpr, op: &Intrinsic, args: &[TypedExpr]) -> Emit {
        let tarr = self.array_of(target, value.loc)?.clone();
        let name = self.var_text(target);
        let syntax = self.syntax;
        let elem = tarr.elem;
        let pinned = args.iter().any(|a| lower::reads(a, target));
        match op {
            Intrinsic::Arange => {
                let [start, _, step] = args else {
                    return self.internal(value.loc, "arange needs start, stop and step");
                };
                let mut extents = self.extents_of(value)?;
                if pinned {
                    extents = self.pin_extents(extents);
                }
                let (start, step) = (self.render(start)?, self.render(step)?);
                self.allocate(target, &name, &tarr, &extents);
                self.loop_nest(&extents, tarr.order, |this, idx| {
                    let offset = syntax.cast(&idx[0], ScalarType::INT64, elem);
                    let offset = syntax.binary(BinOp::Mul, &offset, &step, elem);
                    let element = syntax.element(&name, &tarr, idx);
                    this.w
                        .line(syntax.assign(&element, &syntax.binary(BinOp::Add, &start, &offset, elem)));
                    Ok(())
                })
            }
            Intrinsic::ArrayLiteral => {
                let shape: Option<Vec<u64>> = tarr.shape.iter().map(Dim::known).collect();
                let Some(shape) = shape else {
                    return self.internal(value.loc, "array literal without a static shape");
                };
                let extents: Vec<String> = shape.iter().map(u64::to_string).collect();
                let mut elements = Vec::with_capacity(args.len());
                for arg in args {
                    elements.push(self.render(arg)?);
                }
                self.allocate(target, &name, &tarr, &extents);
                for (flat, text) in elements.iter().enumerate() {
                    let index: Vec<String> = lower::unravel(flat as u64, &shape)
                        .into_iter()
                        .map(|i| i.to_string())
                        .collect();
                    self.w.line(syntax.assign(&syntax.element(&name, &tarr, &index), text));
                }
                Ok(())
            }
            _ => {
                let mut extents = self.extents_of(value)?;
                if pinned {
                    extents = self.pin_extents(extents);
                }
                let fill = match op {
                    Intrinsic::Zeros => Some(syntax.literal(&unit_literal(elem, false), elem)),
                    Intrinsic::Ones => Some(syntax.literal(&unit_literal(elem, true), elem)),
                    Intrinsic::Full => match args.last() {
                        Some(fill) => Some(self.render(fill)?),
                        None => return self.internal(value.loc, "np.full without a fill value"),
                    },
                    _ => None,
                };
                self.allocate(target, &name, &tarr, &extents);
                let Some(fill) = fill else {
                    return Ok(());
                };
                match syntax.fill(&name, &fill) {
                    Some(line) => {
                        self.w.line(line);
                        Ok(())
                    }
                    None => self.loop_nest(&extents, tarr.order, |this, idx| {
                        let element = syntax.element(&name, &tarr, idx);
                        this.w.line(syntax.assign(&element, &fill));
                        Ok(())
                    }),
                }
            }
        }
    }

    fn matmul_into(&mut self, target: &VarRef, value: &TypedExpr, left: &TypedExpr, right: &TypedExpr) -> Emit {
        let (l, r) = (self.named(left)?, self.named(right)?);
        if lower::same_var(l, target) || lower::same_var(r, target) {
            let temp = self.temps.fresh(value.ty.clone());
            self.matmul_into(&temp, value, left, right)?;
            let copy = var_expr(&temp, value);
            return self.assign_elementwise(target, &copy);
        }
        let syntax = self.syntax;
        let (la, ra) = (self.array_of(l, left.loc)?.clone(), self.array_of(r, right.loc)?.clone());
        let (ln, rn) = (self.var_text(l), self.var_text(r));
        let name = self.var_text(target);
        if let Some(product) = syntax.matmul((&ln, &la), (&rn, &ra), &value.ty) {
            self.w.line(syntax.assign(&name, &product));
            return Ok(());
        }
        let tarr = self.array_of(target, value.loc)?.clone();
        let elem = tarr.elem;
        let extents = self.extents_of(value)?;
        self.allocate(target, &name, &tarr, &extents);
        let inner = syntax.extent(&ln, &la, la.rank() - 1);
        let zero = syntax.literal(&unit_literal(elem, false), elem);
        self.uses_dot_index = true;
        let (lrank, rrank) = (la.rank(), ra.rank());
        self.loop_nest(&extents, tarr.order, |this, idx| {
            let k = DOT_INDEX.to_string();
            let (li, ri): (Vec<String>, Vec<String>) = match (lrank, rrank) {
                (2, 2) => (vec![idx[0].clone(), k.clone()], vec![k.clone(), idx[1].clone()]),
                (2, 1) => (vec![idx[0].clone(), k.clone()], vec![k.clone()]),
                _ => (vec![k.clone()], vec![k.clone(), idx[0].clone()]),
            };
            let element = syntax.element(&name, &tarr, idx);
            this.w.line(syntax.assign(&element, &zero));
            this.w.line(syntax.index_loop_open(DOT_INDEX, &inner));
            this.w.indent();
            let product = syntax.binary(
                BinOp::Mul,
                &syntax.element(&ln, &la, &li),
                &syntax.element(&rn, &ra, &ri),
                elem,
            );
            this.w
                .line(syntax.assign(&element, &syntax.binary(BinOp::Add, &element, &product, elem)));
            this.w.dedent();
            this.w.line(syntax.loop_close());
            Ok(())
        })
    }

    /// Reductions and vector dot products into a scalar
    fn scalar_loop(&mut self, target: &VarRef, value: &TypedExpr) -> Emit {
        let syntax = self.syntax;
        let name = self.var_text(target);
        let elem = self.elem_of(value)?;
        match &value.kind {
            TypedExprKind::Intrinsic {
                op: Intrinsic::Reduce(r),
                args,
            } if args.len() == 1 => {
                let var = self.named(&args[0])?;
                let array = self.array_of(var, value.loc)?.clone();
                let source = self.var_text(var);
                if let Some(whole) = syntax.reduction(*r, &source, &array) {
                    self.w.line(syntax.assign(&name, &whole));
                    return Ok(());
                }
                let read = |indices: &[String]| {
                    let element = syntax.element(&source, &array, indices);
                    if array.elem == elem {
                        element
                    } else {
                        syntax.cast(&element, array.elem, elem)
                    }
                };
                let init = match r {
                    Reduction::Sum => syntax.literal(&unit_literal(elem, false), elem),
                    Reduction::Prod => syntax.literal(&unit_literal(elem, true), elem),
                    Reduction::Max | Reduction::Min => read(vec!["0".to_string(); array.rank()].as_slice()),
                };
                self.w.line(syntax.assign(&name, &init));
                let extents: Vec<String> = (0..array.rank()).map(|k| syntax.extent(&source, &array, k)).collect();
                self.loop_nest(&extents, array.order, |this, idx| {
                    let element = read(idx);
                    let next = match r {
                        Reduction::Sum => syntax.binary(BinOp::Add, &name, &element, elem),
                        Reduction::Prod => syntax.binary(BinOp::Mul, &name, &element, elem),
                        Reduction::Max | Reduction::Min => syntax.extreme(*r, &[name.clone(), element], elem),
                    };
                    this.w.line(syntax.assign(&name, &next));
                    Ok(())
                })
            }
            TypedExprKind::MatMul { left, right } => {
                let (l, r) = (self.named(left)?, self.named(right)?);
                let (la, ra) = (self.array_of(l, left.loc)?.clone(), self.array_of(r, right.loc)?.clone());
                let (ln, rn) = (self.var_text(l), self.var_text(r));
                if let Some(product) = syntax.matmul((&ln, &la), (&rn, &ra), &value.ty) {
                    self.w.line(syntax.assign(&name, &product));
                    return Ok(());
                }
                self.uses_dot_index = true;
                let k = [DOT_INDEX.to_string()];
                self.w
                    .line(syntax.assign(&name, &syntax.literal(&unit_literal(elem, false), elem)));
                self.w.line(syntax.index_loop_open(DOT_INDEX, &syntax.extent(&ln, &la, 0)));
                self.w.indent();
                let product = syntax.binary(BinOp::Mul, &syntax.element(&ln, &la, &k), &syntax.element(&rn, &ra, &k), elem);
                self.w.line(syntax.assign(&name, &syntax.binary(BinOp::Add, &name, &product, elem)));
                self.w.dedent();
                self.w.line(syntax.loop_close());
                Ok(())
            }
            _ => self.internal(value.loc, "expected a reduction or a dot product"),
        }
    }

    // ----- statements --------------------------------------------------

    pub fn emit_block(&mut self, stmts: &[TypedStmt]) -> Emit {
        for stmt in stmts {
            self.emit_stmt(stmt)?;
        }
        Ok(())
    }

    fn hoist_scalar(&mut self, expr: &TypedExpr) -> (TypedExpr, Vec<Hoisted>) {
        let mut hoister = Hoister::new(&mut self.temps);
        let expr = hoister.scalar(expr.clone());
        (expr, hoister.finish())
    }

    /// Test text of a condition, its hoisted parts already emitted
    fn condition(&mut self, test: &TypedExpr) -> Emit<String> {
        let (test, hoisted) = self.hoist_scalar(test);
        self.emit_hoisted(hoisted)?;
        self.render(&test)
    }

    fn emit_stmt(&mut self, stmt: &TypedStmt) -> Emit {
        let syntax = self.syntax;
        if self.config.line_markers {
            if let Some(marker) = syntax.line_marker(stmt.loc.line, &self.module.file) {
                self.w.raw(marker);
            }
        }
        if !matches!(stmt.kind, TypedStmtKind::For { .. }) {
            for directive in self.module.directives.get(stmt.id) {
                if let Some(line) = syntax.stmt_directive(directive) {
                    self.w.line(line);
                }
            }
        }
        match &stmt.kind {
            TypedStmtKind::Assign { target, value } => self.emit_assign(target, value),
            TypedStmtKind::Alias { target, source } => {
                let line = syntax.alias(&self.var_text(target), &self.var_text(source));
                self.w.line(line);
                Ok(())
            }
            TypedStmtKind::AugAssign { target, op, value } => self.emit_aug_assign(target, *op, value),
            TypedStmtKind::Expr(value) => self.emit_expr_stmt(value),
            TypedStmtKind::If { branches, orelse } => self.emit_if(branches, orelse),
            TypedStmtKind::For { range, body } => self.emit_for(stmt, range, body),
            TypedStmtKind::While { test, body } => self.emit_while(test, body),
            TypedStmtKind::Return(value) => self.emit_return(value.as_ref()),
            TypedStmtKind::Print(args) => {
                let mut rendered = Vec::with_capacity(args.len());
                let mut hoister = Hoister::new(&mut self.temps);
                let args: Vec<TypedExpr> = args.iter().map(|a| hoister.scalar(a.clone())).collect();
                let hoisted = hoister.finish();
                self.emit_hoisted(hoisted)?;
                for arg in &args {
                    rendered.push((self.render(arg)?, arg.ty.as_scalar()));
                }
                self.w.lines(syntax.print(&rendered));
                Ok(())
            }
            TypedStmtKind::Break => {
                self.w.line(syntax.break_stmt());
                Ok(())
            }
            TypedStmtKind::Continue => {
                self.w.line(syntax.continue_stmt());
                Ok(())
            }
            TypedStmtKind::Pass => Ok(()),
        }
    }

    fn emit_assign(&mut self, target: &LValue, value: &TypedExpr) -> Emit {
        let mut hoister = Hoister::new(&mut self.temps);
        let value = hoister.root(value.clone());
        let target = match target {
            LValue::Index { array, indices } => LValue::Index {
                array: array.clone(),
                indices: indices.iter().map(|i| hoister.scalar(i.clone())).collect(),
            },
            other => other.clone(),
        };
        let hoisted = hoister.finish();
        self.emit_hoisted(hoisted)?;
        match &target {
            LValue::Var(var) if var.ty.as_array().is_some() => self.assign_array(var, &value),
            LValue::Var(var) => self.assign_to(var, &value),
            _ => {
                let text = self.lvalue_text(&target, value.loc)?;
                let rendered = self.render(&value)?;
                self.w.line(self.syntax.assign(&text, &rendered));
                Ok(())
            }
        }
    }

    fn lvalue_text(&mut self, target: &LValue, loc: Location) -> Emit<String> {
        Ok(match target {
            LValue::Var(var) => self.var_text(var),
            LValue::Index { array, indices } => {
                let ty = self.array_of(array, loc)?;
                let indices = indices.iter().map(|i| self.render(i)).collect::<Emit<Vec<_>>>()?;
                self.syntax.element(&self.var_text(array), ty, &indices)
            }
            LValue::Field { base, field, .. } => self.syntax.field(&self.var_text(base), field),
        })
    }

    fn emit_aug_assign(&mut self, target: &LValue, op: BinOp, value: &TypedExpr) -> Emit {
        let syntax = self.syntax;
        if let LValue::Var(var) = target {
            if let Some(tarr) = var.ty.as_array().cloned() {
                let mut hoister = Hoister::new(&mut self.temps);
                let value = if value.is_array() && lower::reads(value, var) && lower::has_transpose(value) {
                    hoister.named(value.clone())
                } else if value.is_array() {
                    hoister.operand(value.clone())
                } else {
                    hoister.per_element(value.clone())
                };
                let hoisted = hoister.finish();
                self.emit_hoisted(hoisted)?;
                let name = self.var_text(var);
                let extents: Vec<String> = tarr
                    .shape
                    .iter()
                    .enumerate()
                    .map(|(axis, dim)| match dim {
                        Dim::Known(n) => n.to_string(),
                        _ => syntax.extent(&name, &tarr, axis),
                    })
                    .collect();
                let from = self.elem_of(&value)?;
                let dims = tarr.shape.clone();
                return self.loop_nest(&extents, tarr.order, |this, idx| {
                    let mut rhs = this.render_elem(&value, &Nest::new(idx, &dims, &extents))?;
                    if from != tarr.elem {
                        rhs = syntax.cast(&rhs, from, tarr.elem);
                    }
                    let element = syntax.element(&name, &tarr, idx);
                    this.w
                        .line(syntax.assign(&element, &syntax.binary(op, &element, &rhs, tarr.elem)));
                    Ok(())
                });
            }
        }
        let mut hoister = Hoister::new(&mut self.temps);
        let value = hoister.scalar(value.clone());
        let hoisted = hoister.finish();
        self.emit_hoisted(hoisted)?;
        // indices are read twice
        let target = match target {
            LValue::Index { array, indices } => {
                let mut pinned = Vec::with_capacity(indices.len());
                for index in indices {
                    if index.contains_call() {
                        let temp = self.temps.fresh(index.ty.clone());
                        let text = self.render(index)?;
                        self.w.line(syntax.assign(&temp.name, &text));
                        pinned.push(var_expr(&temp, index));
                    } else {
                        pinned.push(index.clone());
                    }
                }
                LValue::Index {
                    array: array.clone(),
                    indices: pinned,
                }
            }
            other => other.clone(),
        };
        let text = self.lvalue_text(&target, value.loc)?;
        let to = match &target {
            LValue::Var(var) => var.ty.element(),
            LValue::Index { array, .. } => array.ty.element(),
            LValue::Field { .. } => None,
        };
        let from = self.elem_of(&value)?;
        let to = to.unwrap_or(from);
        let mut rhs = self.render(&value)?;
        if from != to {
            rhs = syntax.cast(&rhs, from, to);
        }
        self.w.line(syntax.assign(&text, &syntax.binary(op, &text, &rhs, to)));
        Ok(())
    }

    fn emit_expr_stmt(&mut self, value: &TypedExpr) -> Emit {
        let mut hoister = Hoister::new(&mut self.temps);
        let value = hoister.root(value.clone());
        let hoisted = hoister.finish();
        self.emit_hoisted(hoisted)?;
        if value.ty == Type::Void {
            let call = self.render(&value)?;
            self.w.line(self.syntax.call_stmt(&call));
            return Ok(());
        }
        let temp = self.temps.fresh(value.ty.clone());
        self.assign_to(&temp, &value)
    }

    fn emit_if(&mut self, branches: &[(TypedExpr, Vec<TypedStmt>)], orelse: &[TypedStmt]) -> Emit {
        let Some(((test, body), rest)) = branches.split_first() else {
            return self.emit_block(orelse);
        };
        let test = self.condition(test)?;
        self.w.line(self.syntax.if_open(&test));
        self.indented(body)?;
        self.emit_else_chain(rest, orelse)?;
        self.w.line(self.syntax.if_close());
        Ok(())
    }

    fn emit_else_chain(&mut self, rest: &[(TypedExpr, Vec<TypedStmt>)], orelse: &[TypedStmt]) -> Emit {
        let syntax = self.syntax;
        let Some(((test, body), more)) = rest.split_first() else {
            if !orelse.is_empty() {
                self.w.line(syntax.else_open());
                self.indented(orelse)?;
            }
            return Ok(());
        };
        let (test, hoisted) = self.hoist_scalar(test);
        if hoisted.is_empty() {
            let test = self.render(&test)?;
            self.w.line(syntax.else_if(&test));
            self.indented(body)?;
            return self.emit_else_chain(more, orelse);
        }
        // the test needs statements of its own: nest it under `else`
        self.w.line(syntax.else_open());
        self.w.indent();
        self.emit_hoisted(hoisted)?;
        let test = self.render(&test)?;
        self.w.line(syntax.if_open(&test));
        self.indented(body)?;
        self.emit_else_chain(more, orelse)?;
        self.w.line(syntax.if_close());
        self.w.dedent();
        Ok(())
    }

    fn indented(&mut self, stmts: &[TypedStmt]) -> Emit {
        self.w.indent();
        self.emit_block(stmts)?;
        self.w.dedent();
        Ok(())
    }

    fn emit_while(&mut self, test: &TypedExpr, body: &[TypedStmt]) -> Emit {
        let syntax = self.syntax;
        let (test, hoisted) = self.hoist_scalar(test);
        if hoisted.is_empty() {
            let test = self.render(&test)?;
            self.w.line(syntax.while_open(&test));
            self.indented(body)?;
            self.w.line(syntax.loop_close());
            return Ok(());
        }
        let always = syntax.literal(&Literal::Bool(true), ScalarType::BOOL);
        self.w.line(syntax.while_open(&always));
        self.w.indent();
        self.emit_hoisted(hoisted)?;
        let test = self.render(&test)?;
        self.w.line(syntax.if_open(&syntax.unary(UnaryOp::Not, &test, ScalarType::BOOL)));
        self.w.indent();
        self.w.line(syntax.break_stmt());
        self.w.dedent();
        self.w.line(syntax.if_close());
        self.emit_block(body)?;
        self.w.dedent();
        self.w.line(syntax.loop_close());
        Ok(())
    }

    fn emit_for(&mut self, stmt: &TypedStmt, range: &crate::ir::RangeLoop, body: &[TypedStmt]) -> Emit {
        let syntax = self.syntax;
        let step = match range.step.kind {
            TypedExprKind::Literal(Literal::Int(k)) if k != 0 => k,
            _ => return self.internal(range.step.loc, "loop step is not a nonzero integer literal"),
        };
        let mut hoister = Hoister::new(&mut self.temps);
        let start = hoister.scalar(range.start.clone());
        let stop = hoister.scalar(range.stop.clone());
        let hoisted = hoister.finish();
        self.emit_hoisted(hoisted)?;
        let var = self.var_text(&range.var);
        let mut start = self.render(&start)?;
        let mut stop_text = self.render(&stop)?;
        if !matches!(stop.kind, TypedExprKind::Literal(_)) {
            // the bound is evaluated once
            let temp = self.temps.fresh(range.var.ty.clone());
            self.w.line(syntax.assign(&temp.name, &stop_text));
            stop_text = temp.name;
        }

        let directives = self.module.directives.get(stmt.id).to_vec();
        let mut reductions = Vec::new();
        for directive in directives.iter().filter(|d| d.key == DirectiveKey::Distribute) {
            match syntax.distribute_bounds(&mut self.w, &start, &stop_text, step) {
                Some((lo, hi)) => {
                    self.uses_distribute = true;
                    start = lo;
                    stop_text = hi;
                    reductions.extend(directive.reductions());
                }
                None => self.report(
                    DiagnosticCode::UnsupportedDirective,
                    directive.loc,
                    "distributed loops need the Fortran backend; the loop runs in every process",
                ),
            }
        }

        let first_temp = self.temps.declared.len();
        let child = self.w.child();
        let outer = std::mem::replace(&mut self.w, child);
        self.w.indent();
        let emitted = self.emit_block(body);
        let inner = std::mem::replace(&mut self.w, outer).finish();
        emitted?;
        let new_temps: Vec<VarRef> = self.temps.declared[first_temp..].to_vec();
        let array_temps = new_temps.iter().any(|t| t.ty.as_array().is_some());
        let mut private: Vec<String> = new_temps
            .iter()
            .filter(|t| !(S::MANUAL_FREE && t.ty.as_array().is_some()))
            .map(|t| t.name.clone())
            .collect();
        let mut nested = Vec::new();
        lower::walk_stmts(body, &mut |s| {
            if let TypedStmtKind::For { range, .. } = &s.kind {
                nested.push(range.var.clone());
            }
        });
        for var in nested {
            let name = self.var_text(&var);
            if !private.contains(&name) {
                private.push(name);
            }
        }
        let indices = (0..self.max_rank).map(loop_index).chain([DOT_INDEX.to_string()]);
        for index in indices {
            if inner.contains(&index) && !private.contains(&index) {
                private.push(index);
            }
        }

        let mut closes = Vec::new();
        for directive in directives.iter().filter(|d| d.key != DirectiveKey::Distribute) {
            if S::MANUAL_FREE && array_temps && directive.key == DirectiveKey::ParallelLoop {
                self.report(
                    DiagnosticCode::UnsupportedDirective,
                    directive.loc,
                    "the loop body needs array temporaries, which cannot be shared between threads; the loop runs serially",
                );
                continue;
            }
            match syntax.loop_directive(directive, &private) {
                DirectiveLowering::Wrap { open, close } => {
                    self.w.lines(open);
                    closes.push(close);
                }
                DirectiveLowering::Distribute => {}
            }
        }
        self.w.line(syntax.for_open(&var, &start, &stop_text, step));
        self.w.append(&inner);
        self.w.line(syntax.loop_close());
        for close in closes.into_iter().rev() {
            self.w.lines(close);
        }

        for (op, name) in reductions {
            let found = self
                .params
                .iter()
                .map(|p| (p.name.as_str(), p.symbol, &p.ty, VarScope::Param))
                .chain(self.locals.iter().map(|l| (l.name.as_str(), l.symbol, &l.ty, VarScope::Local)))
                .find(|(n, ..)| *n == name)
                .map(|(n, symbol, ty, scope)| VarRef {
                    name: n.to_string(),
                    symbol,
                    ty: ty.clone(),
                    scope,
                });
            let line = found
                .as_ref()
                .and_then(|var| syntax.allreduce(&op, &self.var_text(var), &var.ty));
            match line {
                Some(line) => self.w.line(line),
                None => self.report(
                    DiagnosticCode::UnsupportedDirective,
                    stmt.loc,
                    format!("reduction '{}:{}' cannot be combined across processes", op, name),
                ),
            }
        }
        Ok(())
    }

    fn emit_return(&mut self, value: Option<&TypedExpr>) -> Emit {
        let syntax = self.syntax;
        let Some(value) = value else {
            self.exit(None, None);
            return Ok(());
        };
        if value.is_array() {
            let mut hoister = Hoister::new(&mut self.temps);
            let value = hoister.named(value.clone());
            let hoisted = hoister.finish();
            self.emit_hoisted(hoisted)?;
            let var = self.named(&value)?.clone();
            let name = self.var_text(&var);
            let owned = var.symbol == SymbolId::GENERATED || self.is_owned(&var);
            if S::MANUAL_FREE {
                if owned {
                    self.exit(Some(name.clone()), Some(name));
                } else {
                    self.exit(Some(syntax.return_copy(&name)), None);
                }
                return Ok(());
            }
            match syntax.move_result(&name).filter(|_| owned) {
                Some(line) => self.w.line(line),
                None => self.w.line(syntax.assign(RESULT, &name)),
            }
            self.w.line(syntax.ret(None));
            return Ok(());
        }
        let (value, hoisted) = self.hoist_scalar(value);
        self.emit_hoisted(hoisted)?;
        let mut text = self.render(&value)?;
        if let (Some(from), Some(to)) = (value.ty.as_scalar(), self.ret.as_scalar()) {
            if from != to {
                text = syntax.cast(&text, from, to);
            }
        }
        if S::MANUAL_FREE {
            self.exit(Some(text), None);
        } else {
            self.w.line(syntax.assign(RESULT, &text));
            self.w.line(syntax.ret(None));
        }
        Ok(())
    }

    fn exit(&mut self, value: Option<String>, kept: Option<String>) {
        if !S::MANUAL_FREE {
            self.w.line(self.syntax.ret(value.as_deref()));
            return;
        }
        self.w.line(format!("{}{}", EXIT_MARKER, self.exits.len()));
        self.exits.push(Exit {
            value,
            kept,
            returns: true,
        });
    }

    /// Release owned arrays at the end of the body (when it can fall off
    /// the end) and resolve every pending exit
    pub fn finish(mut self, falls_through: bool) -> BodyParts {
        if S::MANUAL_FREE && falls_through {
            self.w.line(format!("{}{}", EXIT_MARKER, self.exits.len()));
            self.exits.push(Exit {
                value: None,
                kept: None,
                returns: false,
            });
        }
        let owned = self.owned_arrays();
        let syntax = self.syntax;
        let mut uses_result = false;
        let text = std::mem::replace(&mut self.w, CodeWriter::new("")).finish();
        let mut out = String::with_capacity(text.len());
        for line in text.lines() {
            let trimmed = line.trim_start();
            let exit = trimmed
                .strip_prefix(EXIT_MARKER)
                .and_then(|n| n.parse::<usize>().ok())
                .and_then(|n| self.exits.get(n));
            let Some(exit) = exit else {
                out.push_str(line);
                out.push('\n');
                continue;
            };
            let indent = &line[..line.len() - trimmed.len()];
            let frees: Vec<String> = owned
                .iter()
                .filter(|name| Some(*name) != exit.kept.as_ref())
                .map(|name| syntax.free(name))
                .collect();
            let mut lines = Vec::new();
            match &exit.value {
                Some(value) if exit.kept.is_none() && !frees.is_empty() => {
                    uses_result = true;
                    lines.push(syntax.assign(RESULT, value));
                    lines.extend(frees);
                    lines.push(syntax.ret(Some(RESULT)));
                }
                value => {
                    lines.extend(frees);
                    if exit.returns {
                        lines.push(syntax.ret(value.as_deref()));
                    }
                }
            }
            for l in lines {
                out.push_str(indent);
                out.push_str(&l);
                out.push('\n');
            }
        }
        BodyParts {
            text: out,
            temps: self.temps.declared,
            max_rank: self.max_rank,
            uses_dot_index: self.uses_dot_index,
            uses_result,
            uses_distribute: self.uses_distribute,
            namer: self.namer,
        }
    }
}

/// Reference to `var` in place of `like`
fn var_expr(var: &VarRef, like: &TypedExpr) -> TypedExpr {
    TypedExpr {
        id: like.id,
        kind: TypedExprKind::Var(var.clone()),
        ty: var.ty.clone(),
        loc: like.loc,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Location;

    #[test]
    fn test_omp_clauses_spelling() {
        let directive = Directive::parse(
            "parallel-loop reduction(+:s) num_threads=4 nowait",
            Location::new(1, 1),
        )
        .unwrap();
        assert_eq!(
            omp_clauses(&directive, &["nv_t0".to_string()]),
            "reduction(+:s) num_threads(4) nowait private(nv_t0)"
        );
    }

    #[test]
    fn test_bare_strips_one_enclosing_pair() {
        assert_eq!(bare("(a + b)"), "a + b");
        assert_eq!(bare("(a) + (b)"), "(a) + (b)");
        assert_eq!(bare("((x))"), "(x)");
        assert_eq!(bare("f(x)"), "f(x)");
    }

    #[test]
    fn test_unit_literals() {
        assert_eq!(unit_literal(ScalarType::INT32, true), Literal::Int(1));
        assert_eq!(unit_literal(ScalarType::FLOAT64, false), Literal::Float(0.0));
        assert_eq!(unit_literal(ScalarType::BOOL, false), Literal::Bool(false));
        assert_eq!(unit_literal(ScalarType::COMPLEX128, true), Literal::Complex(1.0, 0.0));
    }
}
