//! Numeric promotion and implicit conversion policy
//!
//! The policy is a configuration table, loadable from JSON, rather than
//! rules scattered through the analyzer. With the default settings:
//!
//! | operands                    | `+ - * ** @`                    | `/`                 | `// %`        |
//! |-----------------------------|---------------------------------|---------------------|---------------|
//! | bool, bool                  | default int                     | default float       | default int   |
//! | bool, X                     | X                               | as for X, X         | as for X, X   |
//! | int(a), int(b)              | int(max(a, b))                  | default float       | int(max)      |
//! | int(a <= 16), float(b)      | float(b)                        | float(b)            | float(b)      |
//! | int(a > 16), float(b)       | float(max(b, 64))               | float(max(b, 64))   | same          |
//! | int(a <= 16), complex(c)    | complex(c)                      | complex(c)          | rejected      |
//! | int(a > 16), complex(c)     | complex(max(c, 128))            | same                | rejected      |
//! | float(a), float(b)          | float(max(a, b))                | float(max(a, b))    | float(max)    |
//! | float(b), complex(c)        | complex(max(c, 2b))             | same                | rejected      |
//! | complex(a), complex(b)      | complex(max(a, b))              | same                | rejected      |
//!
//! - Comparisons yield `bool`; ordering comparisons reject complex operands.
//! - `and`, `or`, `not` require `bool` operands.
//! - `& | ^` accept two bools (result bool) or ints/bools (result int join);
//!   `<< >>` accept ints and bools only and yield the int join.
//! - Unary `-`/`+` on bool yields the default int; `~` accepts bool and int.
//!
//! Implicit conversions (assignment, argument passing, return values) are
//! exact matches or one of the widenings switched on below: int to wider int,
//! int to float, float to wider float, int/float to a complex of at least
//! twice the float precision, and (off by default) bool to int. Narrowing is
//! never implicit. Explicit `overrides` rows are consulted before the table.

use serde::{Deserialize, Serialize};

use crate::ast::{BinOp, CmpOp, UnaryOp};
use crate::types::{ScalarKind, ScalarType};

/// One explicit table row that replaces the computed result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromotionOverride {
    pub op: BinOp,
    pub left: ScalarType,
    pub right: ScalarType,
    pub result: ScalarType,
}

/// How an argument type reaches a parameter type
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Conversion {
    Exact,
    Promoted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromotionPolicy {
    /// Type of integer literals and of bool arithmetic
    pub default_int: ScalarType,
    /// Type of float literals and of true division on integers
    pub default_float: ScalarType,
    /// Type of imaginary literals
    pub default_complex: ScalarType,
    pub int_to_wider_int: bool,
    pub int_to_float: bool,
    pub float_to_wider_float: bool,
    pub to_complex: bool,
    pub bool_to_int: bool,
    pub overrides: Vec<PromotionOverride>,
}

impl Default for PromotionPolicy {
    fn default() -> Self {
        Self {
            default_int: ScalarType::INT64,
            default_float: ScalarType::FLOAT64,
            default_complex: ScalarType::COMPLEX128,
            int_to_wider_int: true,
            int_to_float: true,
            float_to_wider_float: true,
            to_complex: true,
            bool_to_int: false,
            overrides: Vec::new(),
        }
    }
}

impl PromotionPolicy {
    fn lookup_override(&self, op: BinOp, l: ScalarType, r: ScalarType) -> Option<ScalarType> {
        self.overrides
            .iter()
            .find(|row| {
                row.op == op
                    && ((row.left == l && row.right == r)
                        || (op.is_symmetric() && row.left == r && row.right == l))
            })
            .map(|row| row.result)
    }

    /// Arithmetic join of two scalar types
    pub fn arithmetic(&self, l: ScalarType, r: ScalarType) -> ScalarType {
        let (lo, hi) = if l.kind <= r.kind { (l, r) } else { (r, l) };
        match (lo.kind, hi.kind) {
            (ScalarKind::Bool, ScalarKind::Bool) => self.default_int,
            (ScalarKind::Bool, _) => hi,
            (a, b) if a == b => ScalarType::new(a, lo.bits.max(hi.bits)),
            (ScalarKind::Int, ScalarKind::Float) => {
                if lo.bits <= 16 {
                    hi
                } else {
                    ScalarType::new(ScalarKind::Float, hi.bits.max(64))
                }
            }
            (ScalarKind::Int, ScalarKind::Complex) => {
                if lo.bits <= 16 {
                    hi
                } else {
                    ScalarType::new(ScalarKind::Complex, hi.bits.max(128))
                }
            }
            (ScalarKind::Float, ScalarKind::Complex) => {
                ScalarType::new(ScalarKind::Complex, hi.bits.max(lo.bits * 2))
            }
            _ => hi,
        }
    }

    /// Result type of a binary operator on scalars, or `None` if the pair is rejected
    pub fn binary(&self, op: BinOp, l: ScalarType, r: ScalarType) -> Option<ScalarType> {
        if let Some(result) = self.lookup_override(op, l, r) {
            return Some(result);
        }
        match op {
            BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor => match (l.kind, r.kind) {
                (ScalarKind::Bool, ScalarKind::Bool) => Some(ScalarType::BOOL),
                (ScalarKind::Bool | ScalarKind::Int, ScalarKind::Bool | ScalarKind::Int) => {
                    Some(self.int_join(l, r))
                }
                _ => None,
            },
            BinOp::LShift | BinOp::RShift => match (l.kind, r.kind) {
                (ScalarKind::Bool | ScalarKind::Int, ScalarKind::Bool | ScalarKind::Int) => {
                    Some(self.int_join(l, r))
                }
                _ => None,
            },
            BinOp::Div => {
                let joined = self.arithmetic(l, r);
                if joined.is_integer() {
                    Some(self.default_float)
                } else {
                    Some(joined)
                }
            }
            BinOp::FloorDiv | BinOp::Mod => {
                if l.is_complex() || r.is_complex() {
                    None
                } else {
                    Some(self.arithmetic(l, r))
                }
            }
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Pow | BinOp::MatMul => {
                Some(self.arithmetic(l, r))
            }
        }
    }

    fn int_join(&self, l: ScalarType, r: ScalarType) -> ScalarType {
        let bits = |t: ScalarType| if t.is_bool() { 0 } else { t.bits };
        let width = bits(l).max(bits(r));
        if width == 0 {
            self.default_int
        } else {
            ScalarType::new(ScalarKind::Int, width)
        }
    }

    /// Comparison operands; the result is always `bool`
    pub fn compare(&self, op: CmpOp, l: ScalarType, r: ScalarType) -> Option<ScalarType> {
        if op.is_ordering() && (l.is_complex() || r.is_complex()) {
            return None;
        }
        if l.is_bool() != r.is_bool() && !(op == CmpOp::Eq || op == CmpOp::NotEq) {
            return None;
        }
        Some(ScalarType::BOOL)
    }

    pub fn unary(&self, op: UnaryOp, t: ScalarType) -> Option<ScalarType> {
        match op {
            UnaryOp::Neg | UnaryOp::Pos => Some(if t.is_bool() { self.default_int } else { t }),
            UnaryOp::Invert => match t.kind {
                ScalarKind::Bool | ScalarKind::Int => Some(t),
                _ => None,
            },
            UnaryOp::Not => t.is_bool().then_some(ScalarType::BOOL),
        }
    }

    /// Implicit conversion from `from` to `to`, if the policy allows one
    pub fn convert(&self, from: ScalarType, to: ScalarType) -> Option<Conversion> {
        if from == to {
            return Some(Conversion::Exact);
        }
        let allowed = match (from.kind, to.kind) {
            (ScalarKind::Bool, ScalarKind::Int) => self.bool_to_int,
            (ScalarKind::Int, ScalarKind::Int) => self.int_to_wider_int && to.bits >= from.bits,
            (ScalarKind::Int, ScalarKind::Float) => self.int_to_float,
            (ScalarKind::Float, ScalarKind::Float) => {
                self.float_to_wider_float && to.bits >= from.bits
            }
            (ScalarKind::Int, ScalarKind::Complex) => self.to_complex,
            (ScalarKind::Float, ScalarKind::Complex) => self.to_complex && to.bits >= from.bits * 2,
            (ScalarKind::Complex, ScalarKind::Complex) => {
                self.float_to_wider_float && to.bits >= from.bits
            }
            _ => false,
        };
        allowed.then_some(Conversion::Promoted)
    }

    /// The narrowest type both sides implicitly convert to, among the two
    pub fn join(&self, a: ScalarType, b: ScalarType) -> Option<ScalarType> {
        if self.convert(a, b).is_some() {
            Some(b)
        } else if self.convert(b, a).is_some() {
            Some(a)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARITHMETIC: [BinOp; 8] = [
        BinOp::Add,
        BinOp::Sub,
        BinOp::Mul,
        BinOp::Div,
        BinOp::FloorDiv,
        BinOp::Mod,
        BinOp::Pow,
        BinOp::BitAnd,
    ];

    #[test]
    fn test_documented_results() {
        let p = PromotionPolicy::default();
        assert_eq!(
            p.binary(BinOp::Add, ScalarType::INT32, ScalarType::FLOAT32),
            Some(ScalarType::FLOAT64)
        );
        assert_eq!(
            p.binary(BinOp::Add, ScalarType::INT16, ScalarType::FLOAT32),
            Some(ScalarType::FLOAT32)
        );
        assert_eq!(
            p.binary(BinOp::Div, ScalarType::INT64, ScalarType::INT64),
            Some(ScalarType::FLOAT64)
        );
        assert_eq!(
            p.binary(BinOp::Mul, ScalarType::FLOAT64, ScalarType::COMPLEX64),
            Some(ScalarType::COMPLEX128)
        );
        assert_eq!(
            p.binary(BinOp::Add, ScalarType::BOOL, ScalarType::BOOL),
            Some(ScalarType::INT64)
        );
        assert_eq!(
            p.binary(BinOp::BitOr, ScalarType::BOOL, ScalarType::BOOL),
            Some(ScalarType::BOOL)
        );
        assert_eq!(p.binary(BinOp::Mod, ScalarType::COMPLEX128, ScalarType::INT64), None);
        assert_eq!(p.binary(BinOp::BitAnd, ScalarType::FLOAT64, ScalarType::INT64), None);
    }

    #[test]
    fn test_symmetric_operators_give_symmetric_results() {
        let p = PromotionPolicy::default();
        for op in ARITHMETIC.into_iter().filter(|op| op.is_symmetric()) {
            for l in ScalarType::ALL {
                for r in ScalarType::ALL {
                    assert_eq!(p.binary(op, l, r), p.binary(op, r, l), "{} {} {}", l, op, r);
                }
            }
        }
    }

    #[test]
    fn test_every_arithmetic_result_accepts_both_operands() {
        let p = PromotionPolicy::default();
        for l in ScalarType::ALL.into_iter().filter(|t| !t.is_bool()) {
            for r in ScalarType::ALL.into_iter().filter(|t| !t.is_bool()) {
                let result = p.arithmetic(l, r);
                assert!(p.convert(l, result).is_some(), "{} -> {}", l, result);
                assert!(p.convert(r, result).is_some(), "{} -> {}", r, result);
            }
        }
    }

    #[test]
    fn test_conversions_never_narrow() {
        let p = PromotionPolicy::default();
        assert_eq!(p.convert(ScalarType::INT32, ScalarType::INT64), Some(Conversion::Promoted));
        assert_eq!(p.convert(ScalarType::INT64, ScalarType::INT32), None);
        assert_eq!(p.convert(ScalarType::FLOAT64, ScalarType::FLOAT32), None);
        assert_eq!(p.convert(ScalarType::FLOAT64, ScalarType::INT64), None);
        assert_eq!(p.convert(ScalarType::FLOAT64, ScalarType::COMPLEX64), None);
        assert_eq!(p.convert(ScalarType::BOOL, ScalarType::INT64), None);
        assert_eq!(p.convert(ScalarType::INT64, ScalarType::INT64), Some(Conversion::Exact));
    }

    #[test]
    fn test_overrides_take_precedence() {
        let json = r#"{"overrides": [{"op": "Add", "left": "int32", "right": "float32", "result": "float32"}]}"#;
        let p: PromotionPolicy = serde_json::from_str(json).unwrap();
        assert_eq!(p.default_int, ScalarType::INT64);
        assert_eq!(
            p.binary(BinOp::Add, ScalarType::FLOAT32, ScalarType::INT32),
            Some(ScalarType::FLOAT32)
        );
    }

    #[test]
    fn test_comparisons() {
        let p = PromotionPolicy::default();
        assert_eq!(
            p.compare(CmpOp::Lt, ScalarType::INT32, ScalarType::FLOAT64),
            Some(ScalarType::BOOL)
        );
        assert_eq!(p.compare(CmpOp::Lt, ScalarType::COMPLEX128, ScalarType::FLOAT64), None);
        assert_eq!(
            p.compare(CmpOp::Eq, ScalarType::COMPLEX128, ScalarType::FLOAT64),
            Some(ScalarType::BOOL)
        );
    }
}
