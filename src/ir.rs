//! Semantic IR: the typed, scope-resolved tree handed to every backend
//!
//! Every node carries its resolved [`Type`] and source [`Location`]; calls
//! carry the emitted name of the function they resolved to. Backends only
//! read this tree.

use serde::{Deserialize, Serialize};

use crate::ast::{BinOp, BoolOp, CmpOp, Location, UnaryOp};
use crate::directives::{Directive, DirectiveTable};
use crate::symbols::{ScopeTree, SymbolId};
use crate::types::{AggregateType, Type};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

/// A fully analyzed module
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypedModule {
    pub name: String,
    pub file: String,
    /// Modules whose emitted code this one calls into
    pub imports: Vec<String>,
    pub aggregates: Vec<AggregateType>,
    /// Module constants, visible to importers
    pub globals: Vec<GlobalConst>,
    /// Concrete functions and instantiations, in deterministic order
    pub functions: Vec<TypedFunction>,
    /// Program body made of the module-level statements, if any
    pub main: Option<TypedBody>,
    pub directives: DirectiveTable,
    pub symbols: ScopeTree,
    /// This module or one of its imports uses `distribute`
    pub uses_distribute: bool,
}

impl TypedModule {
    pub fn function(&self, emitted_name: &str) -> Option<&TypedFunction> {
        self.functions.iter().find(|f| f.emitted_name == emitted_name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalConst {
    pub name: String,
    pub symbol: SymbolId,
    pub ty: Type,
    pub value: Literal,
    pub loc: Location,
}

/// Why a function exists in the emitted code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FunctionOrigin {
    /// A fully annotated function or one overload of it
    Concrete,
    /// A generic function realized for one argument-type tuple
    Instance { generic: String, args: Vec<Type> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Intent {
    In,
    InOut,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypedParam {
    pub name: String,
    pub symbol: SymbolId,
    pub ty: Type,
    pub intent: Intent,
    pub loc: Location,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalVar {
    pub name: String,
    pub symbol: SymbolId,
    pub ty: Type,
    /// A view of another array; never allocated or freed
    pub alias: bool,
}

/// Statements with the locals they declare
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TypedBody {
    pub locals: Vec<LocalVar>,
    pub stmts: Vec<TypedStmt>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypedFunction {
    /// Name in the source
    pub name: String,
    /// Name in generated code, unique within the unit
    pub emitted_name: String,
    pub module: String,
    pub params: Vec<TypedParam>,
    pub ret: Type,
    pub body: TypedBody,
    pub origin: FunctionOrigin,
    /// Directives from `@directive` decorators
    pub directives: Vec<Directive>,
    pub pure: bool,
    pub elemental: bool,
    /// Visible to other units (instances of foreign generics are private)
    pub public: bool,
    pub loc: Location,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum VarScope {
    Local,
    Param,
    /// A constant of module `module`
    Global { module: String },
}

/// A resolved reference to a variable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarRef {
    pub name: String,
    pub symbol: SymbolId,
    pub ty: Type,
    pub scope: VarScope,
}

/// A resolved callee
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FunctionRef {
    pub name: String,
    pub emitted_name: String,
    /// Module whose generated code defines the callee
    pub module: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Int(i64),
    Float(f64),
    Complex(f64, f64),
    Bool(bool),
    Str(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MathFn {
    Sqrt,
    Exp,
    Log,
    Sin,
    Cos,
    Tan,
    Floor,
    Abs,
}

impl MathFn {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "sqrt" => MathFn::Sqrt,
            "exp" => MathFn::Exp,
            "log" => MathFn::Log,
            "sin" => MathFn::Sin,
            "cos" => MathFn::Cos,
            "tan" => MathFn::Tan,
            "floor" => MathFn::Floor,
            "abs" | "fabs" | "absolute" => MathFn::Abs,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            MathFn::Sqrt => "sqrt",
            MathFn::Exp => "exp",
            MathFn::Log => "log",
            MathFn::Sin => "sin",
            MathFn::Cos => "cos",
            MathFn::Tan => "tan",
            MathFn::Floor => "floor",
            MathFn::Abs => "abs",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Reduction {
    Sum,
    Prod,
    Max,
    Min,
}

impl Reduction {
    pub fn name(self) -> &'static str {
        match self {
            Reduction::Sum => "sum",
            Reduction::Prod => "prod",
            Reduction::Max => "max",
            Reduction::Min => "min",
        }
    }
}

/// Library operations with dedicated lowering
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Intrinsic {
    /// `np.zeros(shape)`; args are the extents
    Zeros,
    Ones,
    Empty,
    /// `np.full(shape, value)`; the last arg is the fill value
    Full,
    /// `np.arange(start, stop, step)`
    Arange,
    /// `np.array([...])`; args are the flattened elements in C order
    ArrayLiteral,
    Transpose,
    /// Element-wise math function
    Math(MathFn),
    /// Whole-array reduction to a scalar
    Reduce(Reduction),
    /// Scalar `max(a, b, ...)` / `min(a, b, ...)`
    ScalarExtreme(Reduction),
    /// `len(a)`, the extent of axis 0
    Len,
    /// `a.shape[k]`
    Shape(usize),
    /// `a.size`
    Size,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TypedExprKind {
    Literal(Literal),
    Var(VarRef),
    Unary {
        op: UnaryOp,
        operand: Box<TypedExpr>,
    },
    /// Scalar arithmetic, or element-wise arithmetic with broadcasting
    Binary {
        op: BinOp,
        left: Box<TypedExpr>,
        right: Box<TypedExpr>,
    },
    /// Matrix product (`@`, `np.matmul`, `np.dot`)
    MatMul {
        left: Box<TypedExpr>,
        right: Box<TypedExpr>,
    },
    Compare {
        op: CmpOp,
        left: Box<TypedExpr>,
        right: Box<TypedExpr>,
    },
    Logical {
        op: BoolOp,
        left: Box<TypedExpr>,
        right: Box<TypedExpr>,
    },
    /// Conversion to this node's type (element-wise for arrays)
    Cast(Box<TypedExpr>),
    Call {
        callee: FunctionRef,
        /// One argument per parameter, defaults filled in
        args: Vec<TypedExpr>,
    },
    Intrinsic {
        op: Intrinsic,
        args: Vec<TypedExpr>,
    },
    /// Full indexing of a named array; indices are already wrapped
    Index {
        array: VarRef,
        indices: Vec<TypedExpr>,
    },
    Field {
        base: Box<TypedExpr>,
        field: String,
        index: usize,
    },
    /// Positional construction of an aggregate
    Construct {
        aggregate: String,
        args: Vec<TypedExpr>,
    },
    IfExp {
        test: Box<TypedExpr>,
        body: Box<TypedExpr>,
        orelse: Box<TypedExpr>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypedExpr {
    pub id: NodeId,
    pub kind: TypedExprKind,
    pub ty: Type,
    pub loc: Location,
}

impl TypedExpr {
    pub fn is_array(&self) -> bool {
        matches!(self.ty, Type::Array(_))
    }

    /// Direct children in evaluation order
    pub fn children(&self) -> Vec<&TypedExpr> {
        match &self.kind {
            TypedExprKind::Literal(_) | TypedExprKind::Var(_) => Vec::new(),
            TypedExprKind::Unary { operand, .. } | TypedExprKind::Cast(operand) => {
                vec![operand.as_ref()]
            }
            TypedExprKind::Binary { left, right, .. }
            | TypedExprKind::MatMul { left, right }
            | TypedExprKind::Compare { left, right, .. }
            | TypedExprKind::Logical { left, right, .. } => vec![left.as_ref(), right.as_ref()],
            TypedExprKind::Call { args, .. }
            | TypedExprKind::Intrinsic { args, .. }
            | TypedExprKind::Construct { args, .. } => args.iter().collect(),
            TypedExprKind::Index { indices, .. } => indices.iter().collect(),
            TypedExprKind::Field { base, .. } => vec![base.as_ref()],
            TypedExprKind::IfExp { test, body, orelse } => {
                vec![test.as_ref(), body.as_ref(), orelse.as_ref()]
            }
        }
    }

    /// Whether this node or a descendant calls a user function
    pub fn contains_call(&self) -> bool {
        matches!(self.kind, TypedExprKind::Call { .. })
            || self.children().iter().any(|c| c.contains_call())
    }
}

/// Assignment destination
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LValue {
    Var(VarRef),
    Index { array: VarRef, indices: Vec<TypedExpr> },
    Field {
        base: VarRef,
        field: String,
        index: usize,
    },
}

/// Counted loop over `range(start, stop, step)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeLoop {
    pub var: VarRef,
    pub start: TypedExpr,
    pub stop: TypedExpr,
    pub step: TypedExpr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TypedStmtKind {
    Assign {
        target: LValue,
        value: TypedExpr,
    },
    /// `b = a` for arrays: `b` becomes a view of `a`
    Alias {
        target: VarRef,
        source: VarRef,
    },
    /// In-place update, element-wise for arrays
    AugAssign {
        target: LValue,
        op: BinOp,
        value: TypedExpr,
    },
    Expr(TypedExpr),
    If {
        branches: Vec<(TypedExpr, Vec<TypedStmt>)>,
        orelse: Vec<TypedStmt>,
    },
    For {
        range: RangeLoop,
        body: Vec<TypedStmt>,
    },
    While {
        test: TypedExpr,
        body: Vec<TypedStmt>,
    },
    Return(Option<TypedExpr>),
    Print(Vec<TypedExpr>),
    Break,
    Continue,
    Pass,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypedStmt {
    pub id: NodeId,
    pub kind: TypedStmtKind,
    pub loc: Location,
}

/// First node still typed `Unknown` or `Error`, if any
pub fn verify(module: &TypedModule) -> Option<(Location, String)> {
    for function in &module.functions {
        if function.ret.is_incomplete() {
            return Some((
                function.loc,
                format!("function '{}' has no resolved return type", function.name),
            ));
        }
        if let Some(found) = verify_body(&function.body) {
            return Some(found);
        }
    }
    module.main.as_ref().and_then(verify_body)
}

fn verify_body(body: &TypedBody) -> Option<(Location, String)> {
    body.stmts.iter().find_map(verify_stmt)
}

fn verify_stmt(stmt: &TypedStmt) -> Option<(Location, String)> {
    let exprs: Vec<&TypedExpr> = match &stmt.kind {
        TypedStmtKind::Assign { target, value } | TypedStmtKind::AugAssign { target, value, .. } => {
            let mut v = vec![value];
            if let LValue::Index { indices, .. } = target {
                v.extend(indices.iter());
            }
            v
        }
        TypedStmtKind::Expr(e) => vec![e],
        TypedStmtKind::Return(Some(e)) => vec![e],
        TypedStmtKind::Print(args) => args.iter().collect(),
        TypedStmtKind::While { test, .. } => vec![test],
        TypedStmtKind::For { range, .. } => vec![&range.start, &range.stop, &range.step],
        TypedStmtKind::If { branches, .. } => branches.iter().map(|(t, _)| t).collect(),
        _ => Vec::new(),
    };
    if let Some(found) = exprs.into_iter().find_map(verify_expr) {
        return Some(found);
    }
    match &stmt.kind {
        TypedStmtKind::If { branches, orelse } => branches
            .iter()
            .flat_map(|(_, body)| body.iter())
            .chain(orelse.iter())
            .find_map(verify_stmt),
        TypedStmtKind::For { body, .. } | TypedStmtKind::While { body, .. } => {
            body.iter().find_map(verify_stmt)
        }
        _ => None,
    }
}

fn verify_expr(expr: &TypedExpr) -> Option<(Location, String)> {
    if expr.ty.is_incomplete() {
        return Some((expr.loc, format!("expression left with type {}", expr.ty)));
    }
    expr.children().into_iter().find_map(verify_expr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ScalarType;

    fn lit(ty: Type) -> TypedExpr {
        TypedExpr {
            id: NodeId(0),
            kind: TypedExprKind::Literal(Literal::Int(1)),
            ty,
            loc: Location::new(4, 2),
        }
    }

    fn module_with(stmt: TypedStmt) -> TypedModule {
        TypedModule {
            name: "m".into(),
            file: "m.py".into(),
            imports: Vec::new(),
            aggregates: Vec::new(),
            globals: Vec::new(),
            functions: Vec::new(),
            main: Some(TypedBody {
                locals: Vec::new(),
                stmts: vec![stmt],
            }),
            directives: DirectiveTable::default(),
            symbols: ScopeTree::new(),
            uses_distribute: false,
        }
    }

    #[test]
    fn test_verify_finds_error_nodes() {
        let stmt = TypedStmt {
            id: NodeId(1),
            kind: TypedStmtKind::Print(vec![lit(Type::Error)]),
            loc: Location::new(4, 1),
        };
        let (loc, _) = verify(&module_with(stmt)).unwrap();
        assert_eq!(loc, Location::new(4, 2));
    }

    #[test]
    fn test_verify_accepts_complete_tree() {
        let stmt = TypedStmt {
            id: NodeId(1),
            kind: TypedStmtKind::Expr(lit(Type::Scalar(ScalarType::INT64))),
            loc: Location::new(1, 1),
        };
        assert!(verify(&module_with(stmt)).is_none());
    }
}
