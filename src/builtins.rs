//! Intrinsic callables of the accepted subset
//!
//! Python builtins, the `numpy` functions and the `math` functions the
//! compiler lowers itself, with their typing rules. Argument checking lives in
//! the analyzer; this module only answers "what is this name" and "what type
//! does it produce".

use crate::ir::{Intrinsic, MathFn, Reduction};
use crate::promotion::PromotionPolicy;
use crate::types::{ArrayType, Dim, Order, ScalarKind, ScalarType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    /// `zeros`, `ones`, `empty`, `full`
    Creation(Creation),
    Arange,
    Array,
    /// `np.matmul`, `np.dot`
    MatMul,
    Transpose,
    Math(MathFn),
    /// `np.sum`, `np.prod`, `np.max`, `np.min`
    Reduce(Reduction),
    /// Python `sum`
    Sum,
    /// Python `max` / `min`: a reduction on one array, an extreme of scalars
    Extreme(Reduction),
    Len,
    Size,
    Print,
    Range,
    /// `int(x)`, `float(x)`, `np.float32(x)`, ...
    Cast(CastTarget),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Creation {
    Zeros,
    Ones,
    Empty,
    Full,
}

impl Creation {
    pub fn intrinsic(self) -> Intrinsic {
        match self {
            Creation::Zeros => Intrinsic::Zeros,
            Creation::Ones => Intrinsic::Ones,
            Creation::Empty => Intrinsic::Empty,
            Creation::Full => Intrinsic::Full,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Creation::Zeros => "zeros",
            Creation::Ones => "ones",
            Creation::Empty => "empty",
            Creation::Full => "full",
        }
    }
}

/// Conversion target of a cast call; Python names follow the policy defaults
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastTarget {
    DefaultInt,
    DefaultFloat,
    DefaultComplex,
    Exact(ScalarType),
}

impl CastTarget {
    pub fn resolve(self, policy: &PromotionPolicy) -> ScalarType {
        match self {
            CastTarget::DefaultInt => policy.default_int,
            CastTarget::DefaultFloat => policy.default_float,
            CastTarget::DefaultComplex => policy.default_complex,
            CastTarget::Exact(t) => t,
        }
    }
}

/// A Python builtin name
pub fn python(name: &str) -> Option<Builtin> {
    Some(match name {
        "print" => Builtin::Print,
        "range" => Builtin::Range,
        "len" => Builtin::Len,
        "abs" => Builtin::Math(MathFn::Abs),
        "sum" => Builtin::Sum,
        "max" => Builtin::Extreme(Reduction::Max),
        "min" => Builtin::Extreme(Reduction::Min),
        "int" => Builtin::Cast(CastTarget::DefaultInt),
        "float" => Builtin::Cast(CastTarget::DefaultFloat),
        "complex" => Builtin::Cast(CastTarget::DefaultComplex),
        "bool" => Builtin::Cast(CastTarget::Exact(ScalarType::BOOL)),
        _ => return None,
    })
}

/// An attribute of the `numpy` module
pub fn numpy(attr: &str) -> Option<Builtin> {
    Some(match attr {
        "zeros" => Builtin::Creation(Creation::Zeros),
        "ones" => Builtin::Creation(Creation::Ones),
        "empty" => Builtin::Creation(Creation::Empty),
        "full" => Builtin::Creation(Creation::Full),
        "arange" => Builtin::Arange,
        "array" => Builtin::Array,
        "matmul" | "dot" => Builtin::MatMul,
        "transpose" => Builtin::Transpose,
        "sum" => Builtin::Reduce(Reduction::Sum),
        "prod" => Builtin::Reduce(Reduction::Prod),
        "max" | "amax" => Builtin::Reduce(Reduction::Max),
        "min" | "amin" => Builtin::Reduce(Reduction::Min),
        "size" => Builtin::Size,
        "shape" => return None,
        other => {
            if let Some(f) = MathFn::from_name(other) {
                return Some(Builtin::Math(f));
            }
            let scalar = ScalarType::from_name(other)?;
            match other {
                "int" | "float" | "complex" | "bool" => return None,
                _ => Builtin::Cast(CastTarget::Exact(scalar)),
            }
        }
    })
}

/// An attribute of the `math` module
pub fn math(attr: &str) -> Option<Builtin> {
    match attr {
        "fabs" => Some(Builtin::Math(MathFn::Abs)),
        "abs" | "absolute" => None,
        other => MathFn::from_name(other).map(Builtin::Math),
    }
}

/// Module-level float constants such as `np.pi`
pub fn constant(attr: &str) -> Option<f64> {
    match attr {
        "pi" => Some(std::f64::consts::PI),
        "e" => Some(std::f64::consts::E),
        "inf" => Some(f64::INFINITY),
        _ => None,
    }
}

/// Element type produced by a math function.
///
/// `floor` follows NumPy and yields a float even for integer input.
pub fn math_result(f: MathFn, elem: ScalarType, policy: &PromotionPolicy) -> Option<ScalarType> {
    match (f, elem.kind) {
        (MathFn::Abs, ScalarKind::Bool) => Some(policy.default_int),
        (MathFn::Abs, ScalarKind::Int | ScalarKind::Float) => Some(elem),
        (MathFn::Abs, ScalarKind::Complex) => {
            Some(ScalarType::new(ScalarKind::Float, elem.bits / 2))
        }
        (MathFn::Floor, ScalarKind::Complex) => None,
        (_, ScalarKind::Bool | ScalarKind::Int) => Some(policy.default_float),
        (MathFn::Floor, _) => Some(elem),
        (_, ScalarKind::Float | ScalarKind::Complex) => Some(elem),
    }
}

/// Scalar type produced by a whole-array reduction
pub fn reduction_result(
    r: Reduction,
    elem: ScalarType,
    policy: &PromotionPolicy,
) -> Option<ScalarType> {
    match (r, elem.kind) {
        (Reduction::Max | Reduction::Min, ScalarKind::Complex) => None,
        (Reduction::Max | Reduction::Min, _) => Some(elem),
        (_, ScalarKind::Bool) => Some(policy.default_int),
        (_, ScalarKind::Int) => Some(ScalarType::new(
            ScalarKind::Int,
            elem.bits.max(policy.default_int.bits),
        )),
        _ => Some(elem),
    }
}

/// Shape of a matrix product; an empty shape means a scalar result
pub fn matmul_shape(left: &[Dim], right: &[Dim]) -> Result<Vec<Dim>, String> {
    let (inner_left, inner_right, shape) = match (left, right) {
        ([k1], [k2]) => (k1, k2, Vec::new()),
        ([n, k1], [k2]) => (k1, k2, vec![n.clone()]),
        ([k1], [k2, m]) => (k1, k2, vec![m.clone()]),
        ([n, k1], [k2, m]) => (k1, k2, vec![n.clone(), m.clone()]),
        _ => {
            return Err(format!(
                "matrix product of rank-{} and rank-{} arrays is not supported",
                left.len(),
                right.len()
            ))
        }
    };
    match (inner_left, inner_right) {
        (Dim::Known(a), Dim::Known(b)) if a != b => Err(format!(
            "matrix product inner dimensions {} and {} do not match",
            a, b
        )),
        _ => Ok(shape),
    }
}

/// Transposition reverses the extents and flips the memory order, so the
/// element buffer is reused unchanged.
pub fn transpose(array: &ArrayType) -> ArrayType {
    let shape: Vec<Dim> = array.shape.iter().rev().cloned().collect();
    let order = match array.order {
        Order::C => Order::F,
        Order::F => Order::C,
    };
    ArrayType::new(array.elem, shape, order)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_tables() {
        assert_eq!(numpy("zeros"), Some(Builtin::Creation(Creation::Zeros)));
        assert_eq!(numpy("sqrt"), Some(Builtin::Math(MathFn::Sqrt)));
        assert_eq!(
            numpy("float32"),
            Some(Builtin::Cast(CastTarget::Exact(ScalarType::FLOAT32)))
        );
        assert_eq!(numpy("shape"), None);
        assert_eq!(math("fabs"), Some(Builtin::Math(MathFn::Abs)));
        assert_eq!(math("abs"), None);
        assert_eq!(python("max"), Some(Builtin::Extreme(Reduction::Max)));
        assert_eq!(python("np"), None);
    }

    #[test]
    fn test_math_results() {
        let policy = PromotionPolicy::default();
        assert_eq!(
            math_result(MathFn::Sqrt, ScalarType::INT32, &policy),
            Some(ScalarType::FLOAT64)
        );
        assert_eq!(
            math_result(MathFn::Sqrt, ScalarType::FLOAT32, &policy),
            Some(ScalarType::FLOAT32)
        );
        assert_eq!(
            math_result(MathFn::Abs, ScalarType::COMPLEX128, &policy),
            Some(ScalarType::FLOAT64)
        );
        assert_eq!(math_result(MathFn::Floor, ScalarType::COMPLEX64, &policy), None);
    }

    #[test]
    fn test_reduction_results() {
        let policy = PromotionPolicy::default();
        assert_eq!(
            reduction_result(Reduction::Sum, ScalarType::INT16, &policy),
            Some(ScalarType::INT64)
        );
        assert_eq!(
            reduction_result(Reduction::Max, ScalarType::FLOAT32, &policy),
            Some(ScalarType::FLOAT32)
        );
        assert_eq!(reduction_result(Reduction::Min, ScalarType::COMPLEX128, &policy), None);
    }

    #[test]
    fn test_matmul_shapes() {
        let n = Dim::Known(3);
        let k = Dim::Known(4);
        let m = Dim::Unknown;
        assert_eq!(
            matmul_shape(&[n.clone(), k.clone()], &[k.clone(), m.clone()]).unwrap(),
            vec![n.clone(), m.clone()]
        );
        assert_eq!(matmul_shape(&[k.clone()], &[k.clone()]).unwrap(), Vec::<Dim>::new());
        let err = matmul_shape(&[n.clone(), k.clone()], &[n.clone(), m]).unwrap_err();
        assert!(err.contains("4 and 3"));
    }

    #[test]
    fn test_transpose_flips_order() {
        let a = ArrayType::new(
            ScalarType::FLOAT64,
            vec![Dim::Known(2), Dim::Known(5)],
            Order::C,
        );
        let t = transpose(&a);
        assert_eq!(t.shape, vec![Dim::Known(5), Dim::Known(2)]);
        assert_eq!(t.order, Order::F);
    }
}
