//! Backend-neutral lowering of array statements
//!
//! Both backends turn array expressions into explicit loop nests. Before a
//! statement is emitted, every sub-result that cannot be computed element by
//! element (calls, matrix products, array creation, reductions) is hoisted
//! into a temporary, innermost first and left to right. What remains at the
//! root is either a scalar expression, one producer whose operands are named
//! arrays, or an element-wise tree whose array leaves are all variables.

use std::collections::{HashMap, HashSet};

use crate::analyzer::RESERVED_PREFIX;
use crate::directives::Directive;
use crate::ir::{
    FunctionRef, Intrinsic, LValue, TypedExpr, TypedExprKind, TypedModule, TypedStmt, TypedStmtKind, VarRef,
    VarScope,
};
use crate::symbols::SymbolId;
use crate::types::{Dim, Order, Type};

/// How an array-valued expression is evaluated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayClass {
    /// Computable element by element inside one loop nest
    Elementwise,
    /// Needs a whole-array step of its own
    Producer,
}

pub fn array_class(expr: &TypedExpr) -> Option<ArrayClass> {
    if !expr.is_array() {
        return None;
    }
    Some(match &expr.kind {
        TypedExprKind::MatMul { .. } | TypedExprKind::Call { .. } => ArrayClass::Producer,
        TypedExprKind::Intrinsic { op, .. } => match op {
            Intrinsic::Math(_) | Intrinsic::Transpose => ArrayClass::Elementwise,
            _ => ArrayClass::Producer,
        },
        _ => ArrayClass::Elementwise,
    })
}

/// Scalar results computed by a loop: reductions and vector dot products
pub fn is_scalar_loop(expr: &TypedExpr) -> bool {
    !expr.is_array()
        && matches!(
            expr.kind,
            TypedExprKind::MatMul { .. }
                | TypedExprKind::Intrinsic {
                    op: Intrinsic::Reduce(_),
                    ..
                }
        )
}

/// Temporaries of one function body
#[derive(Debug, Default)]
pub struct Temps {
    next: u32,
    pub declared: Vec<VarRef>,
}

impl Temps {
    pub fn fresh(&mut self, ty: Type) -> VarRef {
        let var = VarRef {
            name: format!("{}t{}", RESERVED_PREFIX, self.next),
            symbol: SymbolId::GENERATED,
            ty,
            scope: VarScope::Local,
        };
        self.next += 1;
        self.declared.push(var.clone());
        var
    }
}

/// A sub-result computed into a temporary ahead of its statement
#[derive(Debug, Clone, PartialEq)]
pub struct Hoisted {
    pub temp: VarRef,
    pub value: TypedExpr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Context {
    /// Root of a statement
    Root,
    /// Scalar position outside any loop nest
    Scalar,
    /// Scalar position evaluated once per element of an array expression
    PerElement,
    /// Operand of an element-wise array expression
    Operand,
    /// Position that needs a named array (call arguments, product operands)
    Named,
}

/// Rewrites statement expressions, collecting the hoisted sub-results
pub struct Hoister<'a> {
    temps: &'a mut Temps,
    hoisted: Vec<Hoisted>,
}

impl<'a> Hoister<'a> {
    pub fn new(temps: &'a mut Temps) -> Self {
        Self {
            temps,
            hoisted: Vec::new(),
        }
    }

    /// Rewrite the root expression of a statement
    pub fn root(&mut self, expr: TypedExpr) -> TypedExpr {
        self.visit(expr, Context::Root)
    }

    /// Rewrite a scalar expression such as a loop bound or a condition
    pub fn scalar(&mut self, expr: TypedExpr) -> TypedExpr {
        self.visit(expr, Context::Scalar)
    }

    /// Rewrite an expression that must end up as a named array
    pub fn named(&mut self, expr: TypedExpr) -> TypedExpr {
        self.visit(expr, Context::Named)
    }

    /// Rewrite the operand of an in-place array update
    pub fn operand(&mut self, expr: TypedExpr) -> TypedExpr {
        self.visit(expr, Context::Operand)
    }

    /// Rewrite a scalar evaluated once per element of an array update
    pub fn per_element(&mut self, expr: TypedExpr) -> TypedExpr {
        self.visit(expr, Context::PerElement)
    }

    pub fn finish(self) -> Vec<Hoisted> {
        self.hoisted
    }

    fn visit(&mut self, expr: TypedExpr, ctx: Context) -> TypedExpr {
        let TypedExpr { id, kind, ty, loc } = expr;
        let is_array = matches!(ty, Type::Array(_));
        // Context of scalar children of this node
        let scalar_ctx = if is_array || ctx == Context::PerElement {
            Context::PerElement
        } else {
            Context::Scalar
        };
        let operand = |child: &TypedExpr| {
            if child.is_array() {
                Context::Operand
            } else {
                scalar_ctx
            }
        };
        let named_or = |child: &TypedExpr| {
            if child.is_array() || matches!(child.ty, Type::Aggregate(_)) {
                Context::Named
            } else {
                scalar_ctx
            }
        };

        let kind = match kind {
            TypedExprKind::Unary { op, operand: inner } => {
                let c = operand(&inner);
                TypedExprKind::Unary {
                    op,
                    operand: Box::new(self.visit(*inner, c)),
                }
            }
            TypedExprKind::Cast(inner) => {
                let c = operand(&inner);
                TypedExprKind::Cast(Box::new(self.visit(*inner, c)))
            }
            TypedExprKind::Binary { op, left, right } => {
                let (cl, cr) = (operand(&left), operand(&right));
                let left = Box::new(self.visit(*left, cl));
                let right = Box::new(self.visit(*right, cr));
                TypedExprKind::Binary { op, left, right }
            }
            TypedExprKind::Compare { op, left, right } => {
                let (cl, cr) = (operand(&left), operand(&right));
                let left = Box::new(self.visit(*left, cl));
                let right = Box::new(self.visit(*right, cr));
                TypedExprKind::Compare { op, left, right }
            }
            TypedExprKind::Logical { op, left, right } => {
                let (cl, cr) = (operand(&left), operand(&right));
                let left = Box::new(self.visit(*left, cl));
                let right = Box::new(self.visit(*right, cr));
                TypedExprKind::Logical { op, left, right }
            }
            TypedExprKind::IfExp { test, body, orelse } => {
                let (ct, cb, co) = (operand(&test), operand(&body), operand(&orelse));
                let test = Box::new(self.visit(*test, ct));
                let body = Box::new(self.visit(*body, cb));
                let orelse = Box::new(self.visit(*orelse, co));
                TypedExprKind::IfExp { test, body, orelse }
            }
            TypedExprKind::MatMul { left, right } => {
                let left = Box::new(self.visit(*left, Context::Named));
                let right = Box::new(self.visit(*right, Context::Named));
                TypedExprKind::MatMul { left, right }
            }
            TypedExprKind::Call { callee, args } => {
                let args = args
                    .into_iter()
                    .map(|arg| {
                        let c = named_or(&arg);
                        self.visit(arg, c)
                    })
                    .collect();
                TypedExprKind::Call { callee, args }
            }
            TypedExprKind::Intrinsic { op, args } => {
                let args = args
                    .into_iter()
                    .map(|arg| {
                        let c = match &op {
                            Intrinsic::Math(_) | Intrinsic::Transpose => operand(&arg),
                            _ => named_or(&arg),
                        };
                        self.visit(arg, c)
                    })
                    .collect();
                TypedExprKind::Intrinsic { op, args }
            }
            TypedExprKind::Index { array, indices } => TypedExprKind::Index {
                array,
                indices: indices.into_iter().map(|i| self.visit(i, scalar_ctx)).collect(),
            },
            TypedExprKind::Field { base, field, index } => TypedExprKind::Field {
                base: Box::new(self.visit(*base, Context::Named)),
                field,
                index,
            },
            TypedExprKind::Construct { aggregate, args } => TypedExprKind::Construct {
                aggregate,
                args: args.into_iter().map(|a| self.visit(a, scalar_ctx)).collect(),
            },
            leaf @ (TypedExprKind::Literal(_) | TypedExprKind::Var(_)) => leaf,
        };
        let expr = TypedExpr { id, kind, ty, loc };

        let hoist = if expr.is_array() {
            match ctx {
                Context::Named => !matches!(expr.kind, TypedExprKind::Var(_)),
                Context::Operand => array_class(&expr) == Some(ArrayClass::Producer),
                _ => false,
            }
        } else if matches!(expr.ty, Type::Aggregate(_)) {
            // aggregates are passed by address
            ctx == Context::Named
                && !matches!(expr.kind, TypedExprKind::Var(_) | TypedExprKind::Construct { .. })
        } else {
            is_scalar_loop(&expr)
                || (ctx == Context::PerElement && matches!(expr.kind, TypedExprKind::Call { .. }))
        };
        if hoist {
            self.hoist(expr)
        } else {
            expr
        }
    }

    fn hoist(&mut self, value: TypedExpr) -> TypedExpr {
        let temp = self.temps.fresh(value.ty.clone());
        let replacement = TypedExpr {
            id: value.id,
            kind: TypedExprKind::Var(temp.clone()),
            ty: value.ty.clone(),
            loc: value.loc,
        };
        self.hoisted.push(Hoisted { temp, value });
        replacement
    }
}

/// Whether two references name the same variable
pub fn same_var(a: &VarRef, b: &VarRef) -> bool {
    if a.symbol == SymbolId::GENERATED || b.symbol == SymbolId::GENERATED {
        a.symbol == b.symbol && a.name == b.name
    } else {
        a.symbol == b.symbol
    }
}

/// Whether `expr` reads `var` anywhere
pub fn reads(expr: &TypedExpr, var: &VarRef) -> bool {
    let direct = match &expr.kind {
        TypedExprKind::Var(v) => same_var(v, var),
        TypedExprKind::Index { array, .. } => same_var(array, var),
        _ => false,
    };
    direct || expr.children().into_iter().any(|c| reads(c, var))
}

pub fn has_transpose(expr: &TypedExpr) -> bool {
    matches!(
        expr.kind,
        TypedExprKind::Intrinsic {
            op: Intrinsic::Transpose,
            ..
        }
    ) || expr.children().into_iter().any(has_transpose)
}

/// Expressions held directly by a statement
pub fn stmt_exprs(stmt: &TypedStmt) -> Vec<&TypedExpr> {
    fn lvalue(target: &LValue) -> Vec<&TypedExpr> {
        match target {
            LValue::Index { indices, .. } => indices.iter().collect(),
            _ => Vec::new(),
        }
    }

    match &stmt.kind {
        TypedStmtKind::Assign { target, value } | TypedStmtKind::AugAssign { target, value, .. } => {
            let mut out = lvalue(target);
            out.push(value);
            out
        }
        TypedStmtKind::Expr(value) | TypedStmtKind::Return(Some(value)) => vec![value],
        TypedStmtKind::If { branches, .. } => branches.iter().map(|(test, _)| test).collect(),
        TypedStmtKind::For { range, .. } => vec![&range.start, &range.stop, &range.step],
        TypedStmtKind::While { test, .. } => vec![test],
        TypedStmtKind::Print(args) => args.iter().collect(),
        _ => Vec::new(),
    }
}

/// Every function called from `stmts`, in first-call order
pub fn callees(stmts: &[TypedStmt]) -> Vec<FunctionRef> {
    fn visit(expr: &TypedExpr, out: &mut Vec<FunctionRef>) {
        if let TypedExprKind::Call { callee, .. } = &expr.kind {
            if !out.contains(callee) {
                out.push(callee.clone());
            }
        }
        for child in expr.children() {
            visit(child, out);
        }
    }
    let mut out = Vec::new();
    walk_stmts(stmts, &mut |stmt| {
        for expr in stmt_exprs(stmt) {
            visit(expr, &mut out);
        }
    });
    out
}

/// Where the runtime extent of one axis comes from
#[derive(Debug, Clone, PartialEq)]
pub enum Extent {
    Const(u64),
    /// Extent of an axis of a named array
    Axis { array: VarRef, axis: usize },
    /// Integer expression from the source, such as a `np.zeros` argument
    Value(TypedExpr),
    /// Element count of `arange(start, stop, step)`
    Count {
        start: TypedExpr,
        stop: TypedExpr,
        step: TypedExpr,
    },
    /// Broadcast of two extents that are equal or one
    Max(Box<Extent>, Box<Extent>),
}

/// Result-shape sources of an array expression left by the [`Hoister`]
pub fn extents(expr: &TypedExpr) -> Option<Vec<Extent>> {
    (0..expr.ty.rank()).map(|axis| extent(expr, axis)).collect()
}

fn extent(expr: &TypedExpr, axis: usize) -> Option<Extent> {
    let array = expr.ty.as_array()?;
    if let Some(Dim::Known(n)) = array.shape.get(axis) {
        return Some(Extent::Const(*n));
    }
    let rank = array.rank();
    match &expr.kind {
        TypedExprKind::Var(var) => Some(Extent::Axis {
            array: var.clone(),
            axis,
        }),
        TypedExprKind::Unary { operand, .. } | TypedExprKind::Cast(operand) => extent(operand, axis),
        TypedExprKind::Binary { left, right, .. }
        | TypedExprKind::Compare { left, right, .. }
        | TypedExprKind::Logical { left, right, .. } => broadcast(&[left, right], rank, axis),
        TypedExprKind::IfExp { test, body, orelse } => broadcast(&[test, body, orelse], rank, axis),
        TypedExprKind::MatMul { left, right } => match (left.ty.rank(), right.ty.rank(), axis) {
            (2, _, 0) => extent(left, 0),
            (2, 2, 1) => extent(right, 1),
            (1, 2, 0) => extent(right, 1),
            _ => None,
        },
        TypedExprKind::Intrinsic { op, args } => match op {
            Intrinsic::Math(_) => extent(args.first()?, axis),
            Intrinsic::Transpose => extent(args.first()?, rank.checked_sub(axis + 1)?),
            Intrinsic::Zeros | Intrinsic::Ones | Intrinsic::Empty | Intrinsic::Full => {
                args.get(axis).cloned().map(Extent::Value)
            }
            Intrinsic::Arange => match args.as_slice() {
                [start, stop, step] => Some(Extent::Count {
                    start: start.clone(),
                    stop: stop.clone(),
                    step: step.clone(),
                }),
                _ => None,
            },
            _ => None,
        },
        _ => None,
    }
}

fn broadcast(children: &[&TypedExpr], rank: usize, axis: usize) -> Option<Extent> {
    let mut found: Option<Extent> = None;
    for child in children {
        let Some(array) = child.ty.as_array() else { continue };
        let Some(k) = (axis + array.rank()).checked_sub(rank) else { continue };
        if array.shape[k] == Dim::Known(1) {
            continue;
        }
        let next = extent(child, k)?;
        found = Some(match found {
            None => next,
            Some(prev) if prev == next => prev,
            Some(prev) => Extent::Max(Box::new(prev), Box::new(next)),
        });
    }
    Some(found.unwrap_or(Extent::Const(1)))
}

/// How a broadcast operand is indexed along one axis of the loop nest
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexTerm {
    /// The operand has extent one here: always element 0
    Zero,
    /// The operand spans the axis: the loop index
    Loop,
    /// Extent only known at run time: 0 when it is one, else the loop index
    Guarded,
}

/// Index of an array leaf with extent `leaf` inside a nest over `context`
pub fn leaf_index(leaf: &Dim, context: &Dim) -> IndexTerm {
    match (leaf, context) {
        (Dim::Known(1), Dim::Known(1)) => IndexTerm::Loop,
        (Dim::Known(1), _) => IndexTerm::Zero,
        (Dim::Known(_), _) => IndexTerm::Loop,
        (l, c) if l == c && *l != Dim::Unknown => IndexTerm::Loop,
        _ => IndexTerm::Guarded,
    }
}

/// Axes from outermost to innermost loop: the last axis varies fastest in C
/// order, the first in Fortran order
pub fn loop_order(rank: usize, order: Order) -> Vec<usize> {
    match order {
        Order::C => (0..rank).collect(),
        Order::F => (0..rank).rev().collect(),
    }
}

/// Row-major multi-index of flat position `flat` in `shape`
pub fn unravel(mut flat: u64, shape: &[u64]) -> Vec<u64> {
    let mut index = vec![0; shape.len()];
    for (axis, extent) in shape.iter().enumerate().rev() {
        if *extent > 0 {
            index[axis] = flat % extent;
            flat /= extent;
        }
    }
    index
}

/// Visit every statement of a body, nested ones included
pub fn walk_stmts<'a>(stmts: &'a [TypedStmt], visit: &mut dyn FnMut(&'a TypedStmt)) {
    for stmt in stmts {
        visit(stmt);
        match &stmt.kind {
            TypedStmtKind::If { branches, orelse } => {
                for (_, body) in branches {
                    walk_stmts(body, visit);
                }
                walk_stmts(orelse, visit);
            }
            TypedStmtKind::For { body, .. } | TypedStmtKind::While { body, .. } => walk_stmts(body, visit),
            _ => {}
        }
    }
}

/// Variables that some alias in `stmts` views
pub fn alias_sources(stmts: &[TypedStmt]) -> HashSet<SymbolId> {
    let mut out = HashSet::new();
    walk_stmts(stmts, &mut |stmt| {
        if let TypedStmtKind::Alias { source, .. } = &stmt.kind {
            out.insert(source.symbol);
        }
    });
    out
}

/// Every directive of a module: statement and function ones
pub fn all_directives(module: &TypedModule) -> Vec<&Directive> {
    module
        .directives
        .iter()
        .flat_map(|(_, list)| list.iter())
        .chain(module.functions.iter().flat_map(|f| f.directives.iter()))
        .collect()
}

/// Assigns target-language identifiers to the variables of one body
#[derive(Debug, Clone)]
pub struct Namer {
    reserved: HashSet<String>,
    fold_case: bool,
    used: HashSet<String>,
    symbols: HashMap<SymbolId, String>,
}

impl Namer {
    /// `fold_case` for case-insensitive targets
    pub fn new(reserved: &[&str], fold_case: bool) -> Self {
        let fold = |s: &str| if fold_case { s.to_ascii_lowercase() } else { s.to_string() };
        Self {
            reserved: reserved.iter().map(|s| fold(s)).collect(),
            fold_case,
            used: HashSet::new(),
            symbols: HashMap::new(),
        }
    }

    fn key(&self, name: &str) -> String {
        if self.fold_case {
            name.to_ascii_lowercase()
        } else {
            name.to_string()
        }
    }

    /// Legal spelling of a source name, before uniqueness
    pub fn legal(&self, name: &str) -> String {
        let mut name = if self.fold_case && name.starts_with('_') {
            format!("v{}", name)
        } else {
            name.to_string()
        };
        if self.reserved.contains(&self.key(&name)) {
            name.push('_');
        }
        name
    }

    /// Mark a name as taken, e.g. a function or a module constant
    pub fn reserve(&mut self, name: &str) {
        let key = self.key(name);
        self.used.insert(key);
    }

    /// Identifier of a symbol, allocated on first use
    pub fn bind(&mut self, symbol: SymbolId, name: &str) -> String {
        if let Some(bound) = self.symbols.get(&symbol) {
            return bound.clone();
        }
        let base = self.legal(name);
        let mut candidate = base.clone();
        let mut n = 1;
        while self.used.contains(&self.key(&candidate)) {
            candidate = format!("{}_{}", base, n);
            n += 1;
        }
        self.used.insert(self.key(&candidate));
        self.symbols.insert(symbol, candidate.clone());
        candidate
    }

    /// Identifier of a variable of this body
    pub fn name(&self, var: &VarRef) -> String {
        if var.symbol == SymbolId::GENERATED {
            return var.name.clone();
        }
        self.symbols
            .get(&var.symbol)
            .cloned()
            .unwrap_or_else(|| self.legal(&var.name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::Analyzer;
    use crate::config::CompilerConfig;
    use crate::interface::InterfaceMap;
    use crate::parser::parse_source;
    use pretty_assertions::assert_eq;

    fn body_of(source: &str, name: &str) -> Vec<TypedStmt> {
        let module = parse_source(source, "t.py", "t").unwrap();
        let config = CompilerConfig::default();
        let interfaces = InterfaceMap::new();
        let output = Analyzer::new(&config, &interfaces).analyze(&module).unwrap();
        let typed = output.module.expect("analysis failed");
        typed.function(name).expect("no such function").body.stmts.clone()
    }

    fn function_body(source: &str) -> Vec<TypedStmt> {
        body_of(source, "f")
    }

    fn assigned_value(stmt: &TypedStmt) -> TypedExpr {
        match &stmt.kind {
            TypedStmtKind::Assign { value, .. } => value.clone(),
            TypedStmtKind::Return(Some(value)) => value.clone(),
            other => panic!("unexpected statement {:?}", other),
        }
    }

    #[test]
    fn test_product_inside_elementwise_is_hoisted() {
        let stmts = function_body(
            "def f(a: 'float64[:,:]', b: 'float64[:,:]') -> float:\n    c = a @ b + 1.0\n    return c[0, 0]\n",
        );
        let mut temps = Temps::default();
        let mut hoister = Hoister::new(&mut temps);
        let root = hoister.root(assigned_value(&stmts[0]));
        let hoisted = hoister.finish();
        assert_eq!(hoisted.len(), 1);
        assert!(matches!(hoisted[0].value.kind, TypedExprKind::MatMul { .. }));
        assert_eq!(hoisted[0].temp.name, "nv_t0");
        match root.kind {
            TypedExprKind::Binary { left, .. } => {
                assert!(matches!(&left.kind, TypedExprKind::Var(v) if v.name == "nv_t0"))
            }
            other => panic!("unexpected root {:?}", other),
        }
        assert_eq!(temps.declared.len(), 1);
    }

    #[test]
    fn test_reduction_and_call_arguments_are_hoisted() {
        let stmts = function_body(
            "import numpy as np\ndef f(a: 'float64[:]') -> float:\n    s = np.sum(a * 2.0) + 1.0\n    return s\n",
        );
        let mut temps = Temps::default();
        let mut hoister = Hoister::new(&mut temps);
        let root = hoister.root(assigned_value(&stmts[0]));
        let hoisted = hoister.finish();
        // the element-wise argument first, then the reduction over it
        assert_eq!(hoisted.len(), 2);
        assert!(hoisted[0].value.is_array());
        assert!(is_scalar_loop(&hoisted[1].value));
        assert!(!root.is_array());
    }

    #[test]
    fn test_extents_of_broadcast_operands() {
        let stmts = function_body(
            "def f(a: 'float64[:,:]', b: 'float64[:]') -> float:\n    c = a + b\n    return c[0, 0]\n",
        );
        let value = assigned_value(&stmts[0]);
        let extents = extents(&value).unwrap();
        assert_eq!(extents.len(), 2);
        assert!(matches!(&extents[0], Extent::Axis { array, axis: 0 } if array.name == "a"));
        match &extents[1] {
            Extent::Max(l, r) => {
                assert!(matches!(l.as_ref(), Extent::Axis { array, axis: 1 } if array.name == "a"));
                assert!(matches!(r.as_ref(), Extent::Axis { array, axis: 0 } if array.name == "b"));
            }
            other => panic!("unexpected extent {:?}", other),
        }
    }

    #[test]
    fn test_creation_extents_come_from_arguments() {
        let stmts = function_body(
            "import numpy as np\ndef f(n: int) -> float:\n    z = np.zeros((n, 3))\n    return z[0, 0]\n",
        );
        let extents = extents(&assigned_value(&stmts[0])).unwrap();
        assert!(matches!(&extents[0], Extent::Value(_) | Extent::Axis { .. }));
        assert_eq!(extents[1], Extent::Const(3));
    }

    #[test]
    fn test_reads_and_callees() {
        let stmts = body_of(
            "def g(x: float) -> float:\n    return x\n\ndef f(a: 'float64[:,:]') -> float:\n    b = a.T + a\n    return g(b[0, 0])\n",
            "f",
        );
        let value = assigned_value(&stmts[0]);
        let TypedExprKind::Binary { right, .. } = &value.kind else {
            panic!("expected a binary node");
        };
        let TypedExprKind::Var(a) = &right.kind else {
            panic!("expected a variable");
        };
        assert!(reads(&value, a));
        assert!(has_transpose(&value));
        let called = callees(&stmts);
        assert_eq!(called.len(), 1);
        assert_eq!(called[0].name, "g");
    }

    #[test]
    fn test_leaf_index() {
        let n = Dim::Symbolic(crate::types::DimExpr::Var("n".into()));
        assert_eq!(leaf_index(&Dim::Known(1), &Dim::Known(4)), IndexTerm::Zero);
        assert_eq!(leaf_index(&Dim::Known(1), &Dim::Known(1)), IndexTerm::Loop);
        assert_eq!(leaf_index(&Dim::Known(4), &Dim::Unknown), IndexTerm::Loop);
        assert_eq!(leaf_index(&n, &n), IndexTerm::Loop);
        assert_eq!(leaf_index(&Dim::Unknown, &Dim::Unknown), IndexTerm::Guarded);
        assert_eq!(leaf_index(&Dim::Known(1), &Dim::Unknown), IndexTerm::Zero);
    }

    #[test]
    fn test_loop_order_follows_memory_order() {
        assert_eq!(loop_order(3, Order::C), vec![0, 1, 2]);
        assert_eq!(loop_order(3, Order::F), vec![2, 1, 0]);
    }

    #[test]
    fn test_unravel_row_major() {
        assert_eq!(unravel(5, &[2, 3]), vec![1, 2]);
        assert_eq!(unravel(0, &[2, 3]), vec![0, 0]);
    }

    #[test]
    fn test_namer_reserved_and_case_folding() {
        let mut namer = Namer::new(&["size", "real"], true);
        namer.reserve("PI");
        let a = SymbolId::GENERATED;
        assert_eq!(namer.legal("_tmp"), "v_tmp");
        assert_eq!(namer.legal("Size"), "Size_");
        assert_eq!(namer.bind(a, "pi"), "pi_1");
        assert_eq!(namer.bind(a, "other"), "pi_1");
    }

    #[test]
    fn test_namer_case_sensitive() {
        let mut namer = Namer::new(&["int"], false);
        let first = namer.bind(SymbolId::GENERATED, "N");
        assert_eq!(first, "N");
        assert_eq!(namer.legal("int"), "int_");
        assert_eq!(namer.legal("_x"), "_x");
    }
}
