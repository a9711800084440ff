//! Type and shape domain
//!
//! Semantic types are immutable values compared structurally. Array shapes are
//! sequences of [`Dim`]s that are either known, symbolic (an expression over
//! other integer symbols) or unknown until run time.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Scalar categories, ordered by promotion rank
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ScalarKind {
    Bool,
    Int,
    Float,
    Complex,
}

/// A scalar kind together with its precision in bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ScalarType {
    pub kind: ScalarKind,
    pub bits: u16,
}

impl ScalarType {
    pub const BOOL: ScalarType = ScalarType::new(ScalarKind::Bool, 8);
    pub const INT8: ScalarType = ScalarType::new(ScalarKind::Int, 8);
    pub const INT16: ScalarType = ScalarType::new(ScalarKind::Int, 16);
    pub const INT32: ScalarType = ScalarType::new(ScalarKind::Int, 32);
    pub const INT64: ScalarType = ScalarType::new(ScalarKind::Int, 64);
    pub const INT128: ScalarType = ScalarType::new(ScalarKind::Int, 128);
    pub const FLOAT32: ScalarType = ScalarType::new(ScalarKind::Float, 32);
    pub const FLOAT64: ScalarType = ScalarType::new(ScalarKind::Float, 64);
    pub const FLOAT128: ScalarType = ScalarType::new(ScalarKind::Float, 128);
    pub const COMPLEX64: ScalarType = ScalarType::new(ScalarKind::Complex, 64);
    pub const COMPLEX128: ScalarType = ScalarType::new(ScalarKind::Complex, 128);
    pub const COMPLEX256: ScalarType = ScalarType::new(ScalarKind::Complex, 256);

    pub const fn new(kind: ScalarKind, bits: u16) -> Self {
        Self { kind, bits }
    }

    /// Every scalar type of the accepted subset
    pub const ALL: [ScalarType; 12] = [
        Self::BOOL,
        Self::INT8,
        Self::INT16,
        Self::INT32,
        Self::INT64,
        Self::INT128,
        Self::FLOAT32,
        Self::FLOAT64,
        Self::FLOAT128,
        Self::COMPLEX64,
        Self::COMPLEX128,
        Self::COMPLEX256,
    ];

    pub fn is_bool(self) -> bool {
        self.kind == ScalarKind::Bool
    }

    pub fn is_integer(self) -> bool {
        self.kind == ScalarKind::Int
    }

    pub fn is_complex(self) -> bool {
        self.kind == ScalarKind::Complex
    }

    /// Canonical source name, e.g. `float64`
    pub fn name(self) -> String {
        match self.kind {
            ScalarKind::Bool => "bool".to_string(),
            ScalarKind::Int => format!("int{}", self.bits),
            ScalarKind::Float => format!("float{}", self.bits),
            ScalarKind::Complex => format!("complex{}", self.bits),
        }
    }

    /// Short suffix used in instantiation names, e.g. `f64`
    pub fn suffix(self) -> String {
        match self.kind {
            ScalarKind::Bool => "b".to_string(),
            ScalarKind::Int => format!("i{}", self.bits),
            ScalarKind::Float => format!("f{}", self.bits),
            ScalarKind::Complex => format!("c{}", self.bits),
        }
    }

    /// Resolve a scalar type name, accepting `np.` prefixes and Python aliases
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name
            .strip_prefix("np.")
            .or_else(|| name.strip_prefix("numpy."))
            .unwrap_or(name);
        Some(match name {
            "bool" | "bool_" => Self::BOOL,
            "int8" => Self::INT8,
            "int16" => Self::INT16,
            "int32" => Self::INT32,
            "int" | "int64" | "int_" => Self::INT64,
            "int128" => Self::INT128,
            "float32" | "single" => Self::FLOAT32,
            "float" | "float64" | "double" | "real" => Self::FLOAT64,
            "float128" | "longdouble" => Self::FLOAT128,
            "complex64" => Self::COMPLEX64,
            "complex" | "complex128" => Self::COMPLEX128,
            "complex256" => Self::COMPLEX256,
            _ => return None,
        })
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl From<ScalarType> for String {
    fn from(value: ScalarType) -> Self {
        value.name()
    }
}

impl TryFrom<String> for ScalarType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        ScalarType::from_name(&value).ok_or_else(|| format!("unknown scalar type '{}'", value))
    }
}

/// Element order of a multi-dimensional array
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum Order {
    /// Row-major
    #[default]
    C,
    /// Column-major
    F,
}

impl fmt::Display for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Order::C => write!(f, "C"),
            Order::F => write!(f, "F"),
        }
    }
}

/// Symbolic extent expression over integer symbols
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DimExpr {
    Const(i64),
    /// An integer-valued variable or parameter
    Var(String),
    /// The run-time extent of another array along one axis
    ShapeOf { array: String, axis: usize },
    Add(Box<DimExpr>, Box<DimExpr>),
    Sub(Box<DimExpr>, Box<DimExpr>),
    Mul(Box<DimExpr>, Box<DimExpr>),
    FloorDiv(Box<DimExpr>, Box<DimExpr>),
}

impl DimExpr {
    /// Names referenced by this expression
    pub fn symbols(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_symbols(&mut out);
        out
    }

    fn collect_symbols<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            DimExpr::Const(_) => {}
            DimExpr::Var(name) => out.push(name),
            DimExpr::ShapeOf { array, .. } => out.push(array),
            DimExpr::Add(a, b) | DimExpr::Sub(a, b) | DimExpr::Mul(a, b) | DimExpr::FloorDiv(a, b) => {
                a.collect_symbols(out);
                b.collect_symbols(out);
            }
        }
    }
}

impl fmt::Display for DimExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DimExpr::Const(n) => write!(f, "{}", n),
            DimExpr::Var(name) => write!(f, "{}", name),
            DimExpr::ShapeOf { array, axis } => write!(f, "{}.shape[{}]", array, axis),
            DimExpr::Add(a, b) => write!(f, "({} + {})", a, b),
            DimExpr::Sub(a, b) => write!(f, "({} - {})", a, b),
            DimExpr::Mul(a, b) => write!(f, "({} * {})", a, b),
            DimExpr::FloorDiv(a, b) => write!(f, "({} // {})", a, b),
        }
    }
}

/// One array extent
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dim {
    Known(u64),
    Symbolic(DimExpr),
    Unknown,
}

impl Dim {
    pub fn is_known(&self) -> bool {
        matches!(self, Dim::Known(_))
    }

    pub fn known(&self) -> Option<u64> {
        match self {
            Dim::Known(n) => Some(*n),
            _ => None,
        }
    }
}

impl fmt::Display for Dim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dim::Known(n) => write!(f, "{}", n),
            Dim::Symbolic(expr) => write!(f, "{}", expr),
            Dim::Unknown => write!(f, "?"),
        }
    }
}

/// Format a shape in Python tuple notation: `(3, 4)`, `(4,)`, `()`
pub fn shape_string(shape: &[Dim]) -> String {
    match shape {
        [] => "()".to_string(),
        [single] => format!("({},)", single),
        dims => {
            let parts: Vec<String> = dims.iter().map(|d| d.to_string()).collect();
            format!("({})", parts.join(", "))
        }
    }
}

/// Two shapes that cannot be broadcast together
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapeMismatch {
    pub left: Vec<Dim>,
    pub right: Vec<Dim>,
}

impl fmt::Display for ShapeMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "shapes {} and {} cannot be broadcast together",
            shape_string(&self.left),
            shape_string(&self.right)
        )
    }
}

fn unify_dim(a: &Dim, b: &Dim) -> Option<Dim> {
    match (a, b) {
        (Dim::Known(x), Dim::Known(y)) if x == y => Some(Dim::Known(*x)),
        (Dim::Known(1), other) | (other, Dim::Known(1)) => Some(other.clone()),
        (Dim::Known(_), Dim::Known(_)) => None,
        (Dim::Known(n), _) | (_, Dim::Known(n)) => Some(Dim::Known(*n)),
        (Dim::Symbolic(x), _) => Some(Dim::Symbolic(x.clone())),
        (_, Dim::Symbolic(y)) => Some(Dim::Symbolic(y.clone())),
        (Dim::Unknown, Dim::Unknown) => Some(Dim::Unknown),
    }
}

/// Broadcast two shapes, right-aligned, with missing leading extents as 1.
///
/// A `1` or an unknown extent unifies with anything. Symbolic extents are
/// assumed compatible; a differing pair is checked by the generated code.
pub fn broadcast_shapes(a: &[Dim], b: &[Dim]) -> Result<Vec<Dim>, ShapeMismatch> {
    let rank = a.len().max(b.len());
    let one = Dim::Known(1);
    let mut out = Vec::with_capacity(rank);
    for i in 0..rank {
        let da = (i + a.len()).checked_sub(rank).map_or(&one, |k| &a[k]);
        let db = (i + b.len()).checked_sub(rank).map_or(&one, |k| &b[k]);
        match unify_dim(da, db) {
            Some(dim) => out.push(dim),
            None => {
                return Err(ShapeMismatch {
                    left: a.to_vec(),
                    right: b.to_vec(),
                })
            }
        }
    }
    Ok(out)
}

/// Whether an array of shape `value` may be stored into one declared as `target`
/// without changing the declared extents.
pub fn shape_fits(target: &[Dim], value: &[Dim]) -> bool {
    target.len() == value.len()
        && target.iter().zip(value).all(|(t, v)| match (t, v) {
            (Dim::Known(x), Dim::Known(y)) => x == y,
            _ => true,
        })
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArrayType {
    pub elem: ScalarType,
    pub shape: Vec<Dim>,
    pub order: Order,
}

impl ArrayType {
    /// Build an array type; rank 0 and 1 arrays are always C-ordered.
    pub fn new(elem: ScalarType, shape: Vec<Dim>, order: Order) -> Self {
        let order = if shape.len() <= 1 { Order::C } else { order };
        Self { elem, shape, order }
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Same dtype, rank and order
    pub fn same_layout(&self, other: &ArrayType) -> bool {
        self.elem == other.elem && self.rank() == other.rank() && self.order == other.order
    }

    pub fn has_unknown_dims(&self) -> bool {
        self.shape.iter().any(|d| !d.is_known())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FunctionType {
    pub params: Vec<Type>,
    pub ret: Box<Type>,
    pub generic: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AggregateType {
    pub name: String,
    pub fields: Vec<(String, Type)>,
}

impl AggregateType {
    pub fn field(&self, name: &str) -> Option<(usize, &Type)> {
        self.fields
            .iter()
            .enumerate()
            .find(|(_, (field, _))| field == name)
            .map(|(i, (_, ty))| (i, ty))
    }
}

/// Semantic type of an expression or declaration
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Type {
    Scalar(ScalarType),
    Array(ArrayType),
    Function(FunctionType),
    Aggregate(AggregateType),
    /// String literal, only valid as a `print` argument
    Str,
    /// Result of a call to a function without a return value
    Void,
    /// Not inferred yet
    Unknown,
    /// Poisoned by an earlier error; never reported again
    Error,
}

impl Type {
    pub fn scalar(s: ScalarType) -> Self {
        Type::Scalar(s)
    }

    pub fn array(elem: ScalarType, shape: Vec<Dim>, order: Order) -> Self {
        Type::Array(ArrayType::new(elem, shape, order))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Type::Error)
    }

    /// Whether this type still carries `Unknown` or `Error` anywhere
    pub fn is_incomplete(&self) -> bool {
        match self {
            Type::Unknown | Type::Error => true,
            Type::Function(f) => f.params.iter().any(Type::is_incomplete) || f.ret.is_incomplete(),
            Type::Aggregate(a) => a.fields.iter().any(|(_, t)| t.is_incomplete()),
            _ => false,
        }
    }

    pub fn as_scalar(&self) -> Option<ScalarType> {
        match self {
            Type::Scalar(s) => Some(*s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&ArrayType> {
        match self {
            Type::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Element type of a scalar or array
    pub fn element(&self) -> Option<ScalarType> {
        match self {
            Type::Scalar(s) => Some(*s),
            Type::Array(a) => Some(a.elem),
            _ => None,
        }
    }

    pub fn rank(&self) -> usize {
        match self {
            Type::Array(a) => a.rank(),
            _ => 0,
        }
    }

    pub fn is_integer_scalar(&self) -> bool {
        matches!(self, Type::Scalar(s) if s.is_integer())
    }

    /// Suffix used to build deterministic instantiation names
    pub fn mangle(&self) -> String {
        match self {
            Type::Scalar(s) => s.suffix(),
            Type::Array(a) => {
                let order = if a.order == Order::F { "f" } else { "" };
                format!("{}a{}{}", a.elem.suffix(), a.rank(), order)
            }
            Type::Aggregate(a) => a.name.clone(),
            Type::Str => "s".to_string(),
            Type::Void => "v".to_string(),
            Type::Function(_) => "fn".to_string(),
            Type::Unknown | Type::Error => "x".to_string(),
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Scalar(s) => write!(f, "{}", s),
            Type::Array(a) => {
                let dims: Vec<String> = a
                    .shape
                    .iter()
                    .map(|d| match d {
                        Dim::Unknown => ":".to_string(),
                        other => other.to_string(),
                    })
                    .collect();
                write!(f, "{}[{}]", a.elem, dims.join(","))?;
                if a.order == Order::F {
                    write!(f, "(order=F)")?;
                }
                Ok(())
            }
            Type::Function(func) => {
                let params: Vec<String> = func.params.iter().map(|p| p.to_string()).collect();
                write!(f, "({}) -> {}", params.join(", "), func.ret)
            }
            Type::Aggregate(a) => write!(f, "{}", a.name),
            Type::Str => write!(f, "str"),
            Type::Void => write!(f, "None"),
            Type::Unknown => write!(f, "<unknown>"),
            Type::Error => write!(f, "<error>"),
        }
    }
}

/// Parsed form of a type annotation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeAnnotation {
    Concrete(Type),
    /// A template variable, optionally used as an array element type
    Var {
        name: String,
        array: Option<(Vec<Dim>, Order)>,
    },
}

/// Parse annotation text such as `float64[:,:](order=F)`, `int[3]` or `T[:]`.
///
/// `aggregate` resolves user class names; `type_vars` lists template
/// variables in scope.
pub fn parse_annotation(
    text: &str,
    aggregate: &dyn Fn(&str) -> Option<Type>,
    type_vars: &[String],
) -> Result<TypeAnnotation, String> {
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    let (head, order) = match compact.find('(') {
        Some(open) => {
            let suffix = &compact[open..];
            let order = match suffix {
                "(order=C)" | "(order='C')" | "(order=\"C\")" => Order::C,
                "(order=F)" | "(order='F')" | "(order=\"F\")" => Order::F,
                _ => return Err(format!("unsupported array annotation suffix '{}'", suffix)),
            };
            (&compact[..open], Some(order))
        }
        None => (compact.as_str(), None),
    };
    let (base, dims) = match head.find('[') {
        Some(open) => {
            let inner = head[open..]
                .strip_prefix('[')
                .and_then(|s| s.strip_suffix(']'))
                .ok_or_else(|| format!("malformed array annotation '{}'", text))?;
            let mut dims = Vec::new();
            for part in inner.split(',') {
                match part {
                    ":" => dims.push(Dim::Unknown),
                    n => match n.parse::<u64>() {
                        Ok(extent) => dims.push(Dim::Known(extent)),
                        Err(_) => return Err(format!("unsupported array extent '{}' in '{}'", n, text)),
                    },
                }
            }
            (&head[..open], Some(dims))
        }
        None => (head, None),
    };
    if order.is_some() && dims.is_none() {
        return Err(format!("order given for scalar annotation '{}'", text));
    }
    let order = order.unwrap_or_default();

    if type_vars.iter().any(|v| v == base) {
        return Ok(TypeAnnotation::Var {
            name: base.to_string(),
            array: dims.map(|d| (d, order)),
        });
    }
    if let Some(scalar) = ScalarType::from_name(base) {
        return Ok(TypeAnnotation::Concrete(match dims {
            Some(dims) => Type::array(scalar, dims, order),
            None => Type::Scalar(scalar),
        }));
    }
    if base == "str" && dims.is_none() {
        return Ok(TypeAnnotation::Concrete(Type::Str));
    }
    match (aggregate(base), dims) {
        (Some(ty), None) => Ok(TypeAnnotation::Concrete(ty)),
        (Some(_), Some(_)) => Err(format!("arrays of class '{}' are not supported", base)),
        (None, _) => Err(format!("unknown type '{}'", base)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn no_aggregates(_: &str) -> Option<Type> {
        None
    }

    #[test]
    fn test_broadcast_trailing_dimension() {
        let a = vec![Dim::Known(3), Dim::Known(4)];
        let b = vec![Dim::Known(4)];
        assert_eq!(broadcast_shapes(&a, &b).unwrap(), a);
        assert_eq!(broadcast_shapes(&b, &a).unwrap(), a);
    }

    #[test]
    fn test_broadcast_mismatch_names_both_shapes() {
        let a = vec![Dim::Known(3), Dim::Known(4)];
        let b = vec![Dim::Known(2), Dim::Known(4)];
        let err = broadcast_shapes(&a, &b).unwrap_err();
        assert_eq!(
            err.to_string(),
            "shapes (3, 4) and (2, 4) cannot be broadcast together"
        );
    }

    #[test]
    fn test_broadcast_unit_and_unknown() {
        let a = vec![Dim::Known(1), Dim::Unknown];
        let b = vec![Dim::Known(5), Dim::Known(7)];
        assert_eq!(
            broadcast_shapes(&a, &b).unwrap(),
            vec![Dim::Known(5), Dim::Known(7)]
        );
        let sym = vec![Dim::Symbolic(DimExpr::Var("n".into()))];
        assert_eq!(broadcast_shapes(&sym, &[Dim::Unknown]).unwrap(), sym);
    }

    #[test]
    fn test_shape_string() {
        assert_eq!(shape_string(&[Dim::Known(4)]), "(4,)");
        assert_eq!(shape_string(&[Dim::Known(3), Dim::Unknown]), "(3, ?)");
        assert_eq!(shape_string(&[]), "()");
    }

    #[test]
    fn test_low_rank_arrays_are_c_ordered() {
        let a = ArrayType::new(ScalarType::FLOAT64, vec![Dim::Unknown], Order::F);
        assert_eq!(a.order, Order::C);
        let b = ArrayType::new(ScalarType::FLOAT64, vec![Dim::Unknown; 2], Order::F);
        assert_eq!(b.order, Order::F);
    }

    #[test]
    fn test_parse_annotations() {
        let ty = parse_annotation("float64[:,:](order=F)", &no_aggregates, &[]).unwrap();
        assert_eq!(
            ty,
            TypeAnnotation::Concrete(Type::array(
                ScalarType::FLOAT64,
                vec![Dim::Unknown, Dim::Unknown],
                Order::F
            ))
        );
        let ty = parse_annotation("int[3]", &no_aggregates, &[]).unwrap();
        assert_eq!(
            ty,
            TypeAnnotation::Concrete(Type::array(ScalarType::INT64, vec![Dim::Known(3)], Order::C))
        );
        let ty = parse_annotation("T[:]", &no_aggregates, &["T".to_string()]).unwrap();
        assert!(matches!(ty, TypeAnnotation::Var { ref name, array: Some(_) } if name == "T"));
        assert!(parse_annotation("list", &no_aggregates, &[]).is_err());
    }

    #[test]
    fn test_mangle_suffixes() {
        assert_eq!(Type::Scalar(ScalarType::FLOAT64).mangle(), "f64");
        assert_eq!(
            Type::array(ScalarType::FLOAT64, vec![Dim::Unknown], Order::C).mangle(),
            "f64a1"
        );
        assert_eq!(
            Type::array(ScalarType::FLOAT64, vec![Dim::Unknown; 2], Order::F).mangle(),
            "f64a2f"
        );
    }

    #[test]
    fn test_scalar_type_serde_uses_names() {
        let json = serde_json::to_string(&ScalarType::COMPLEX128).unwrap();
        assert_eq!(json, "\"complex128\"");
        let back: ScalarType = serde_json::from_str("\"int\"").unwrap();
        assert_eq!(back, ScalarType::INT64);
    }
}
