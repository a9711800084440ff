//! Raw, untyped syntax tree for the accepted Python subset
//!
//! This is the interchange format with an external parser: every node carries
//! its line and column, and the whole tree round-trips through JSON. The
//! analyzer treats it as immutable input.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{CompileError, CompileResult};

/// A 1-based source position
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct Location {
    pub line: u32,
    pub column: u32,
}

impl Location {
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// One source file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
    /// Module name used by `import` statements
    pub name: String,
    /// Path of the source file, used in diagnostics
    pub file: String,
    pub body: Vec<Stmt>,
}

/// Directive text found in a `#$` comment ahead of a statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDirective {
    pub text: String,
    pub loc: Location,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stmt {
    pub kind: StmtKind,
    pub loc: Location,
    #[serde(default)]
    pub directives: Vec<RawDirective>,
}

impl Stmt {
    pub fn new(kind: StmtKind, loc: Location) -> Self {
        Self {
            kind,
            loc,
            directives: Vec::new(),
        }
    }

    /// Short statement description used in messages
    pub fn describe(&self) -> &'static str {
        match &self.kind {
            StmtKind::Import { .. } | StmtKind::FromImport { .. } => "import",
            StmtKind::FunctionDef(_) => "function definition",
            StmtKind::ClassDef(_) => "class definition",
            StmtKind::Assign { .. } | StmtKind::AnnAssign { .. } => "assignment",
            StmtKind::AugAssign { .. } => "augmented assignment",
            StmtKind::Expr(_) => "expression statement",
            StmtKind::If { .. } => "if statement",
            StmtKind::For { .. } => "for loop",
            StmtKind::While { .. } => "while loop",
            StmtKind::Return(_) => "return",
            StmtKind::Break => "break",
            StmtKind::Continue => "continue",
            StmtKind::Pass => "pass",
            StmtKind::Global(_) => "global declaration",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportName {
    pub name: String,
    pub alias: Option<String>,
    pub loc: Location,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IfBranch {
    pub test: Expr,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StmtKind {
    /// `import numpy as np`
    Import { module: String, alias: Option<String> },
    /// `from geometry import norm, dot as vdot`
    FromImport {
        module: String,
        names: Vec<ImportName>,
    },
    FunctionDef(Arc<FunctionDef>),
    ClassDef(ClassDef),
    /// `a = b = value`
    Assign { targets: Vec<Expr>, value: Expr },
    /// `x: float64 = value`
    AnnAssign {
        target: Expr,
        annotation: Annotation,
        value: Option<Expr>,
    },
    /// `x += value`
    AugAssign { target: Expr, op: BinOp, value: Expr },
    Expr(Expr),
    /// `if` / `elif` chain with optional `else`
    If {
        branches: Vec<IfBranch>,
        orelse: Vec<Stmt>,
    },
    For {
        target: Expr,
        iter: Expr,
        body: Vec<Stmt>,
    },
    While { test: Expr, body: Vec<Stmt> },
    Return(Option<Expr>),
    Break,
    Continue,
    Pass,
    Global(Vec<String>),
}

/// Type annotation text, e.g. `float64[:,:](order=F)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub text: String,
    pub loc: Location,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub annotation: Option<Annotation>,
    pub default: Option<Expr>,
    pub loc: Location,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decorator {
    pub name: String,
    pub args: Vec<Expr>,
    pub keywords: Vec<Keyword>,
    pub loc: Location,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDef {
    pub name: String,
    pub params: Vec<Param>,
    pub returns: Option<Annotation>,
    pub body: Vec<Stmt>,
    pub decorators: Vec<Decorator>,
    pub loc: Location,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassDef {
    pub name: String,
    pub body: Vec<Stmt>,
    pub decorators: Vec<Decorator>,
    pub loc: Location,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Keyword {
    pub name: String,
    pub value: Expr,
    pub loc: Location,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expr {
    pub kind: ExprKind,
    pub loc: Location,
}

impl Expr {
    pub fn new(kind: ExprKind, loc: Location) -> Self {
        Self { kind, loc }
    }

    pub fn as_name(&self) -> Option<&str> {
        match &self.kind {
            ExprKind::Name(name) => Some(name),
            _ => None,
        }
    }

    /// Flatten `a.b.c` into `"a.b.c"`
    pub fn dotted_name(&self) -> Option<String> {
        match &self.kind {
            ExprKind::Name(name) => Some(name.clone()),
            ExprKind::Attribute { value, attr } => {
                value.dotted_name().map(|base| format!("{}.{}", base, attr))
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExprKind {
    Name(String),
    Int(i64),
    Float(f64),
    /// Imaginary literal `2.5j`
    Imag(f64),
    Bool(bool),
    Str(String),
    NoneLit,
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Compare {
        op: CmpOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    BoolOp {
        op: BoolOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Call {
        func: Box<Expr>,
        args: Vec<Expr>,
        keywords: Vec<Keyword>,
    },
    Attribute {
        value: Box<Expr>,
        attr: String,
    },
    Subscript {
        value: Box<Expr>,
        indices: Vec<Expr>,
    },
    Slice {
        lower: Option<Box<Expr>>,
        upper: Option<Box<Expr>>,
        step: Option<Box<Expr>>,
    },
    Tuple(Vec<Expr>),
    List(Vec<Expr>),
    IfExp {
        test: Box<Expr>,
        body: Box<Expr>,
        orelse: Box<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
    MatMul,
    BitAnd,
    BitOr,
    BitXor,
    LShift,
    RShift,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::FloorDiv => "//",
            BinOp::Mod => "%",
            BinOp::Pow => "**",
            BinOp::MatMul => "@",
            BinOp::BitAnd => "&",
            BinOp::BitOr => "|",
            BinOp::BitXor => "^",
            BinOp::LShift => "<<",
            BinOp::RShift => ">>",
        }
    }

    /// Whether swapping operands never changes the result type
    pub fn is_symmetric(self) -> bool {
        matches!(
            self,
            BinOp::Add | BinOp::Mul | BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor
        )
    }

    pub fn is_bitwise(self) -> bool {
        matches!(
            self,
            BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor | BinOp::LShift | BinOp::RShift
        )
    }
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    Neg,
    Pos,
    Not,
    Invert,
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UnaryOp::Neg => "-",
            UnaryOp::Pos => "+",
            UnaryOp::Not => "not",
            UnaryOp::Invert => "~",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CmpOp {
    Eq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
}

impl CmpOp {
    pub fn is_ordering(self) -> bool {
        !matches!(self, CmpOp::Eq | CmpOp::NotEq)
    }

    pub fn symbol(self) -> &'static str {
        match self {
            CmpOp::Eq => "==",
            CmpOp::NotEq => "!=",
            CmpOp::Lt => "<",
            CmpOp::LtE => "<=",
            CmpOp::Gt => ">",
            CmpOp::GtE => ">=",
        }
    }
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BoolOp {
    And,
    Or,
}

impl fmt::Display for BoolOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BoolOp::And => "and",
            BoolOp::Or => "or",
        })
    }
}

/// Check the structural well-formedness of a tree received from a parser.
///
/// Violations are fatal for the unit: they mean the producer emitted a tree
/// no grammar of the subset could have produced.
pub fn validate(module: &Module) -> CompileResult<()> {
    let mut validator = Validator {
        file: &module.file,
        in_function: false,
        loop_depth: 0,
    };
    if module.name.is_empty() {
        return Err(CompileError::syntax_shape(
            &module.file,
            Location::new(1, 1),
            "module has an empty name",
        ));
    }
    validator.block(&module.body, None)
}

struct Validator<'a> {
    file: &'a str,
    in_function: bool,
    loop_depth: usize,
}

impl<'a> Validator<'a> {
    fn fail<T>(&self, loc: Location, msg: impl Into<String>) -> CompileResult<T> {
        Err(CompileError::syntax_shape(self.file, loc, msg))
    }

    fn block(&mut self, stmts: &[Stmt], owner: Option<(Location, &str)>) -> CompileResult<()> {
        if let Some((loc, what)) = owner {
            if stmts.is_empty() {
                return self.fail(loc, format!("{} has an empty body", what));
            }
        }
        for stmt in stmts {
            self.stmt(stmt)?;
        }
        Ok(())
    }

    fn stmt(&mut self, stmt: &Stmt) -> CompileResult<()> {
        match &stmt.kind {
            StmtKind::Import { module, .. } | StmtKind::FromImport { module, .. } => {
                if module.is_empty() {
                    return self.fail(stmt.loc, "import of an empty module name");
                }
                Ok(())
            }
            StmtKind::FunctionDef(def) => self.function(def),
            StmtKind::ClassDef(class) => {
                if class.name.is_empty() {
                    return self.fail(class.loc, "class with an empty name");
                }
                self.block(&class.body, Some((class.loc, "class")))
            }
            StmtKind::Assign { targets, value } => {
                if targets.is_empty() {
                    return self.fail(stmt.loc, "assignment without a target");
                }
                for target in targets {
                    self.target(target, true)?;
                }
                self.expr(value)
            }
            StmtKind::AnnAssign { target, value, .. } => {
                match &target.kind {
                    ExprKind::Name(_) | ExprKind::Attribute { .. } => {}
                    _ => return self.fail(target.loc, "annotated assignment to a non-name target"),
                }
                if let Some(value) = value {
                    self.expr(value)?;
                }
                Ok(())
            }
            StmtKind::AugAssign { target, value, .. } => {
                self.target(target, false)?;
                self.expr(value)
            }
            StmtKind::Expr(expr) => self.expr(expr),
            StmtKind::If { branches, orelse } => {
                if branches.is_empty() {
                    return self.fail(stmt.loc, "if statement without a condition");
                }
                for branch in branches {
                    self.expr(&branch.test)?;
                    self.block(&branch.body, Some((stmt.loc, "if branch")))?;
                }
                self.block(orelse, None)
            }
            StmtKind::For { target, iter, body } => {
                match &target.kind {
                    ExprKind::Name(_) | ExprKind::Tuple(_) => {}
                    _ => return self.fail(target.loc, "for loop target must be a name"),
                }
                self.expr(iter)?;
                self.loop_depth += 1;
                let result = self.block(body, Some((stmt.loc, "for loop")));
                self.loop_depth -= 1;
                result
            }
            StmtKind::While { test, body } => {
                self.expr(test)?;
                self.loop_depth += 1;
                let result = self.block(body, Some((stmt.loc, "while loop")));
                self.loop_depth -= 1;
                result
            }
            StmtKind::Return(value) => {
                if !self.in_function {
                    return self.fail(stmt.loc, "'return' outside function");
                }
                match value {
                    Some(value) => self.expr(value),
                    None => Ok(()),
                }
            }
            StmtKind::Break | StmtKind::Continue => {
                if self.loop_depth == 0 {
                    return self.fail(stmt.loc, format!("'{}' outside loop", stmt.describe()));
                }
                Ok(())
            }
            StmtKind::Pass => Ok(()),
            StmtKind::Global(names) => {
                if names.is_empty() {
                    return self.fail(stmt.loc, "global declaration without names");
                }
                Ok(())
            }
        }
    }

    fn function(&mut self, def: &FunctionDef) -> CompileResult<()> {
        if def.name.is_empty() {
            return self.fail(def.loc, "function with an empty name");
        }
        let mut seen_default = false;
        for (i, param) in def.params.iter().enumerate() {
            if def.params[..i].iter().any(|p| p.name == param.name) {
                return self.fail(
                    param.loc,
                    format!("duplicate parameter '{}' in '{}'", param.name, def.name),
                );
            }
            match &param.default {
                Some(default) => {
                    seen_default = true;
                    self.expr(default)?;
                }
                None if seen_default => {
                    return self.fail(
                        param.loc,
                        format!("non-default parameter '{}' follows a default one", param.name),
                    );
                }
                None => {}
            }
        }
        let saved = (self.in_function, self.loop_depth);
        self.in_function = true;
        self.loop_depth = 0;
        let result = self.block(&def.body, Some((def.loc, "function")));
        self.in_function = saved.0;
        self.loop_depth = saved.1;
        result
    }

    fn target(&self, target: &Expr, allow_tuple: bool) -> CompileResult<()> {
        match &target.kind {
            ExprKind::Name(_) | ExprKind::Subscript { .. } | ExprKind::Attribute { .. } => {
                self.expr(target)
            }
            ExprKind::Tuple(items) if allow_tuple => {
                for item in items {
                    self.target(item, false)?;
                }
                Ok(())
            }
            _ => self.fail(target.loc, "cannot assign to this expression"),
        }
    }

    fn expr(&self, expr: &Expr) -> CompileResult<()> {
        match &expr.kind {
            ExprKind::Name(name) if name.is_empty() => self.fail(expr.loc, "empty identifier"),
            ExprKind::Name(_)
            | ExprKind::Int(_)
            | ExprKind::Float(_)
            | ExprKind::Imag(_)
            | ExprKind::Bool(_)
            | ExprKind::Str(_)
            | ExprKind::NoneLit => Ok(()),
            ExprKind::Unary { operand, .. } => self.expr(operand),
            ExprKind::Binary { left, right, .. }
            | ExprKind::Compare { left, right, .. }
            | ExprKind::BoolOp { left, right, .. } => {
                self.expr(left)?;
                self.expr(right)
            }
            ExprKind::Call {
                func,
                args,
                keywords,
            } => {
                self.expr(func)?;
                for arg in args {
                    self.expr(arg)?;
                }
                for kw in keywords {
                    self.expr(&kw.value)?;
                }
                Ok(())
            }
            ExprKind::Attribute { value, attr } => {
                if attr.is_empty() {
                    return self.fail(expr.loc, "attribute access without a name");
                }
                self.expr(value)
            }
            ExprKind::Subscript { value, indices } => {
                if indices.is_empty() {
                    return self.fail(expr.loc, "subscript without an index");
                }
                self.expr(value)?;
                for index in indices {
                    match &index.kind {
                        ExprKind::Slice { lower, upper, step } => {
                            for part in [lower, upper, step].into_iter().flatten() {
                                self.expr(part)?;
                            }
                        }
                        _ => self.expr(index)?,
                    }
                }
                Ok(())
            }
            ExprKind::Slice { .. } => self.fail(expr.loc, "slice outside of a subscript"),
            ExprKind::Tuple(items) | ExprKind::List(items) => {
                for item in items {
                    self.expr(item)?;
                }
                Ok(())
            }
            ExprKind::IfExp { test, body, orelse } => {
                self.expr(test)?;
                self.expr(body)?;
                self.expr(orelse)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc() -> Location {
        Location::new(1, 1)
    }

    fn name(n: &str) -> Expr {
        Expr::new(ExprKind::Name(n.to_string()), loc())
    }

    fn module(body: Vec<Stmt>) -> Module {
        Module {
            name: "m".to_string(),
            file: "m.py".to_string(),
            body,
        }
    }

    #[test]
    fn test_return_outside_function_is_fatal() {
        let m = module(vec![Stmt::new(StmtKind::Return(None), Location::new(3, 1))]);
        let err = validate(&m).unwrap_err();
        assert!(matches!(err, CompileError::SyntaxShape { line: 3, .. }));
    }

    #[test]
    fn test_assignment_to_literal_is_fatal() {
        let target = Expr::new(ExprKind::Int(1), Location::new(2, 1));
        let m = module(vec![Stmt::new(
            StmtKind::Assign {
                targets: vec![target],
                value: name("x"),
            },
            Location::new(2, 1),
        )]);
        assert!(validate(&m).is_err());
    }

    #[test]
    fn test_break_inside_loop_is_accepted() {
        let body = vec![Stmt::new(StmtKind::Break, loc())];
        let m = module(vec![Stmt::new(
            StmtKind::While {
                test: Expr::new(ExprKind::Bool(true), loc()),
                body,
            },
            loc(),
        )]);
        assert!(validate(&m).is_ok());
    }

    #[test]
    fn test_tree_round_trips_through_json() {
        let m = module(vec![Stmt::new(
            StmtKind::Assign {
                targets: vec![name("x")],
                value: Expr::new(ExprKind::Float(1.5), loc()),
            },
            loc(),
        )]);
        let json = serde_json::to_string(&m).unwrap();
        let back: Module = serde_json::from_str(&json).unwrap();
        assert_eq!(back, m);
    }
}
