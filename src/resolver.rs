//! Function and overload resolution
//!
//! Resolution is a pure function of the candidate set, the argument types and
//! the promotion policy. Each candidate binds the call's arguments to its
//! parameter slots, matches every argument against the parameter's type
//! pattern, and is scored by `(promotions, generic bindings, unknown-shape
//! matches)`. The unique lowest score wins; a tie is an ambiguity.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::ast::{FunctionDef, Location};
use crate::directives::Directive;
use crate::ir::Literal;
use crate::promotion::{Conversion, PromotionPolicy};
use crate::types::{ArrayType, Dim, Order, ScalarType, Type};

/// What a parameter accepts
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamPattern {
    /// Exactly this type, or one it implicitly converts from
    Concrete(Type),
    /// A type variable, optionally the element type of an array parameter
    Var {
        name: String,
        array: Option<(Vec<Dim>, Order)>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    pub name: String,
    pub pattern: ParamPattern,
    pub default: Option<Literal>,
    pub loc: Location,
}

/// A template variable with its allowed types; no options means unconstrained
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateVar {
    pub name: String,
    pub options: Vec<Type>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReturnSpec {
    /// Inferred from the `return` statements
    Inferred,
    Concrete(Type),
    Var(String),
}

/// One declared function signature; several share a name in an overload set
#[derive(Debug, Clone)]
pub struct FunctionDecl {
    pub name: String,
    /// Defining module
    pub module: String,
    /// Position in the overload set
    pub overload: usize,
    pub def: Arc<FunctionDef>,
    pub params: Vec<ParamSpec>,
    pub ret: ReturnSpec,
    pub template_vars: Vec<TemplateVar>,
    pub pure: bool,
    pub elemental: bool,
    pub directives: Vec<Directive>,
    pub loc: Location,
}

impl FunctionDecl {
    pub fn is_generic(&self) -> bool {
        self.params
            .iter()
            .any(|p| matches!(p.pattern, ParamPattern::Var { .. }))
    }

    fn template(&self, name: &str) -> Option<&TemplateVar> {
        self.template_vars.iter().find(|v| v.name == name)
    }

    /// Human-readable signature for diagnostics
    pub fn signature(&self) -> String {
        let params: Vec<String> = self
            .params
            .iter()
            .map(|p| {
                let ty = match &p.pattern {
                    ParamPattern::Concrete(ty) => ty.to_string(),
                    ParamPattern::Var { name, array: None } => name.clone(),
                    ParamPattern::Var {
                        name,
                        array: Some((dims, _)),
                    } => format!("{}[{}]", name, vec![":"; dims.len()].join(",")),
                };
                format!("{}: {}", p.name, ty)
            })
            .collect();
        format!("{}({})", self.name, params.join(", "))
    }
}

/// Argument types at a call site
#[derive(Debug, Clone, Copy)]
pub struct CallSite<'a> {
    pub positional: &'a [Type],
    pub keywords: &'a [(String, Type)],
}

/// Where a parameter's value comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgSlot {
    Positional(usize),
    Keyword(usize),
    Default,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Score {
    pub promotions: usize,
    pub generic_bindings: usize,
    pub unknown_shapes: usize,
}

/// A successful match of one candidate
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub candidate: usize,
    pub slots: Vec<ArgSlot>,
    /// Concrete parameter types for this call: the instantiation tuple
    pub param_types: Vec<Type>,
    pub type_vars: BTreeMap<String, Type>,
    pub score: Score,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub candidate: usize,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Match(Binding),
    NotFound(Vec<Rejection>),
    Ambiguous(Vec<usize>),
}

/// Type of a literal under the policy's defaults
pub fn literal_type(value: &Literal, policy: &PromotionPolicy) -> Type {
    match value {
        Literal::Int(_) => Type::Scalar(policy.default_int),
        Literal::Float(_) => Type::Scalar(policy.default_float),
        Literal::Complex(..) => Type::Scalar(policy.default_complex),
        Literal::Bool(_) => Type::Scalar(ScalarType::BOOL),
        Literal::Str(_) => Type::Str,
    }
}

/// Forget extents so one instantiation serves every shape of a given rank
pub fn generalize(ty: &Type) -> Type {
    match ty {
        Type::Array(a) => Type::Array(ArrayType::new(
            a.elem,
            vec![Dim::Unknown; a.rank()],
            a.order,
        )),
        other => other.clone(),
    }
}

/// Match an argument against a concrete parameter type
pub fn match_concrete(
    param: &Type,
    arg: &Type,
    policy: &PromotionPolicy,
) -> Option<(Conversion, usize)> {
    match (param, arg) {
        (Type::Scalar(p), Type::Scalar(a)) => policy.convert(*a, *p).map(|c| (c, 0)),
        (Type::Array(p), Type::Array(a)) => {
            if !p.same_layout(a) {
                return None;
            }
            let mut unknown = 0;
            for (pd, ad) in p.shape.iter().zip(&a.shape) {
                match (pd, ad) {
                    (Dim::Known(x), Dim::Known(y)) if x != y => return None,
                    (Dim::Known(_), _) => {}
                    _ => unknown += 1,
                }
            }
            Some((Conversion::Exact, unknown))
        }
        (Type::Aggregate(p), Type::Aggregate(a)) if p.name == a.name => {
            Some((Conversion::Exact, 0))
        }
        (Type::Str, Type::Str) => Some((Conversion::Exact, 0)),
        _ => None,
    }
}

struct Matcher<'a> {
    decl: &'a FunctionDecl,
    policy: &'a PromotionPolicy,
    type_vars: BTreeMap<String, Type>,
    score: Score,
}

impl<'a> Matcher<'a> {
    fn bind_var(&mut self, name: &str, arg: &Type) -> Result<Type, String> {
        let normalized = generalize(arg);
        if let Some(bound) = self.type_vars.get(name) {
            if *bound == normalized {
                return Ok(bound.clone());
            }
            return match (bound, arg) {
                (Type::Scalar(b), Type::Scalar(a)) if self.policy.convert(*a, *b).is_some() => {
                    self.score.promotions += 1;
                    Ok(bound.clone())
                }
                _ => Err(format!(
                    "'{}' is bound to {} but the argument is {}",
                    name, bound, arg
                )),
            };
        }
        let options = self
            .decl
            .template(name)
            .map(|v| v.options.clone())
            .unwrap_or_default();
        let chosen = if options.is_empty() || options.contains(&normalized) {
            normalized
        } else {
            let promoted = match arg {
                Type::Scalar(a) => options.iter().find(|opt| {
                    matches!(opt, Type::Scalar(o) if self.policy.convert(*a, *o).is_some())
                }),
                _ => None,
            };
            match promoted {
                Some(option) => {
                    self.score.promotions += 1;
                    option.clone()
                }
                None => {
                    let allowed: Vec<String> = options.iter().map(|t| t.to_string()).collect();
                    return Err(format!(
                        "{} is not one of the types allowed for '{}' ({})",
                        arg,
                        name,
                        allowed.join(", ")
                    ));
                }
            }
        };
        self.score.generic_bindings += 1;
        self.type_vars.insert(name.to_string(), chosen.clone());
        Ok(chosen)
    }

    fn match_param(&mut self, spec: &ParamSpec, arg: &Type) -> Result<Type, String> {
        match &spec.pattern {
            ParamPattern::Concrete(param) => match match_concrete(param, arg, self.policy) {
                Some((conversion, unknown)) => {
                    if conversion == Conversion::Promoted {
                        self.score.promotions += 1;
                    }
                    self.score.unknown_shapes += unknown;
                    Ok(param.clone())
                }
                None => Err(format!(
                    "parameter '{}' expects {}, got {}",
                    spec.name, param, arg
                )),
            },
            ParamPattern::Var { name, array: None } => self.bind_var(name, arg),
            ParamPattern::Var {
                name,
                array: Some((dims, order)),
            } => {
                let array = match arg {
                    Type::Array(a) if a.rank() == dims.len() && (a.rank() < 2 || a.order == *order) => a,
                    _ => {
                        return Err(format!(
                            "parameter '{}' expects a rank-{} array, got {}",
                            spec.name,
                            dims.len(),
                            arg
                        ))
                    }
                };
                let elem = match self.bind_var(name, &Type::Scalar(array.elem))? {
                    Type::Scalar(elem) => elem,
                    other => {
                        return Err(format!(
                            "'{}' is bound to {} and cannot be an element type",
                            name, other
                        ))
                    }
                };
                if elem != array.elem {
                    return Err(format!(
                        "parameter '{}' expects {} elements, got {}",
                        spec.name, elem, array.elem
                    ));
                }
                self.score.unknown_shapes += dims.iter().filter(|d| !d.is_known()).count();
                Ok(Type::array(elem, dims.clone(), *order))
            }
        }
    }
}

/// Assign call arguments to parameter slots
fn bind_slots(decl: &FunctionDecl, call: &CallSite<'_>) -> Result<Vec<ArgSlot>, String> {
    if call.positional.len() > decl.params.len() {
        return Err(format!(
            "takes {} arguments but {} were given",
            decl.params.len(),
            call.positional.len()
        ));
    }
    let mut slots: Vec<Option<ArgSlot>> = vec![None; decl.params.len()];
    for (i, slot) in slots.iter_mut().enumerate().take(call.positional.len()) {
        *slot = Some(ArgSlot::Positional(i));
    }
    for (k, (name, _)) in call.keywords.iter().enumerate() {
        let index = decl
            .params
            .iter()
            .position(|p| &p.name == name)
            .ok_or_else(|| format!("no parameter named '{}'", name))?;
        if slots[index].is_some() {
            return Err(format!("multiple values for parameter '{}'", name));
        }
        slots[index] = Some(ArgSlot::Keyword(k));
    }
    slots
        .into_iter()
        .zip(&decl.params)
        .map(|(slot, param)| match (slot, &param.default) {
            (Some(slot), _) => Ok(slot),
            (None, Some(_)) => Ok(ArgSlot::Default),
            (None, None) => Err(format!("missing argument for parameter '{}'", param.name)),
        })
        .collect()
}

fn match_candidate(
    decl: &FunctionDecl,
    call: &CallSite<'_>,
    policy: &PromotionPolicy,
) -> Result<(Vec<ArgSlot>, Vec<Type>, BTreeMap<String, Type>, Score), String> {
    let slots = bind_slots(decl, call)?;
    let mut matcher = Matcher {
        decl,
        policy,
        type_vars: BTreeMap::new(),
        score: Score::default(),
    };
    let mut param_types = Vec::with_capacity(slots.len());
    for (spec, slot) in decl.params.iter().zip(&slots) {
        let arg = match slot {
            ArgSlot::Positional(i) => call.positional[*i].clone(),
            ArgSlot::Keyword(k) => call.keywords[*k].1.clone(),
            ArgSlot::Default => match (&spec.pattern, &spec.default) {
                (ParamPattern::Concrete(ty), _) => {
                    param_types.push(ty.clone());
                    continue;
                }
                (_, Some(default)) => literal_type(default, policy),
                (_, None) => return Err(format!("missing argument for '{}'", spec.name)),
            },
        };
        param_types.push(matcher.match_param(spec, &arg)?);
    }
    Ok((slots, param_types, matcher.type_vars, matcher.score))
}

/// Pick the best candidate for a call
#[tracing::instrument(level = "trace", skip_all, fields(candidates = candidates.len()))]
pub fn resolve(
    candidates: &[&FunctionDecl],
    call: &CallSite<'_>,
    policy: &PromotionPolicy,
) -> Resolution {
    let mut matches: Vec<Binding> = Vec::new();
    let mut rejected = Vec::new();
    for (index, decl) in candidates.iter().enumerate() {
        match match_candidate(decl, call, policy) {
            Ok((slots, param_types, type_vars, score)) => matches.push(Binding {
                candidate: index,
                slots,
                param_types,
                type_vars,
                score,
            }),
            Err(reason) => rejected.push(Rejection {
                candidate: index,
                reason,
            }),
        }
    }
    let Some(best) = matches.iter().map(|m| m.score).min() else {
        return Resolution::NotFound(rejected);
    };
    let mut winners: Vec<Binding> = matches.into_iter().filter(|m| m.score == best).collect();
    if winners.len() == 1 {
        Resolution::Match(winners.remove(0))
    } else {
        Resolution::Ambiguous(winners.iter().map(|m| m.candidate).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decl(name: &str, params: Vec<ParamPattern>) -> FunctionDecl {
        let def = Arc::new(FunctionDef {
            name: name.to_string(),
            params: Vec::new(),
            returns: None,
            body: Vec::new(),
            decorators: Vec::new(),
            loc: Location::new(1, 1),
        });
        FunctionDecl {
            name: name.to_string(),
            module: "m".to_string(),
            overload: 0,
            def,
            params: params
                .into_iter()
                .enumerate()
                .map(|(i, pattern)| ParamSpec {
                    name: format!("p{}", i),
                    pattern,
                    default: None,
                    loc: Location::new(1, 1),
                })
                .collect(),
            ret: ReturnSpec::Inferred,
            template_vars: Vec::new(),
            pure: false,
            elemental: false,
            directives: Vec::new(),
            loc: Location::new(1, 1),
        }
    }

    fn scalar(s: ScalarType) -> Type {
        Type::Scalar(s)
    }

    fn var(name: &str) -> ParamPattern {
        ParamPattern::Var {
            name: name.to_string(),
            array: None,
        }
    }

    fn call(positional: &[Type]) -> CallSite<'_> {
        CallSite {
            positional,
            keywords: &[],
        }
    }

    #[test]
    fn test_exact_match_beats_promotion() {
        let a = decl("f", vec![ParamPattern::Concrete(scalar(ScalarType::INT32))]);
        let b = decl("f", vec![ParamPattern::Concrete(scalar(ScalarType::FLOAT64))]);
        let args = [scalar(ScalarType::INT32)];
        match resolve(&[&b, &a], &call(&args), &PromotionPolicy::default()) {
            Resolution::Match(binding) => assert_eq!(binding.candidate, 1),
            other => panic!("expected a match, got {:?}", other),
        }
    }

    #[test]
    fn test_no_candidate_reports_reasons() {
        let a = decl("f", vec![ParamPattern::Concrete(scalar(ScalarType::INT32))]);
        let args = [scalar(ScalarType::FLOAT64)];
        match resolve(&[&a], &call(&args), &PromotionPolicy::default()) {
            Resolution::NotFound(rejections) => {
                assert!(rejections[0].reason.contains("expects int32"))
            }
            other => panic!("expected no match, got {:?}", other),
        }
    }

    #[test]
    fn test_tie_is_ambiguous() {
        let a = decl("f", vec![ParamPattern::Concrete(scalar(ScalarType::INT64))]);
        let b = decl("f", vec![ParamPattern::Concrete(scalar(ScalarType::FLOAT32))]);
        let args = [scalar(ScalarType::INT16)];
        assert_eq!(
            resolve(&[&a, &b], &call(&args), &PromotionPolicy::default()),
            Resolution::Ambiguous(vec![0, 1])
        );
    }

    #[test]
    fn test_fixed_shape_beats_unknown_shape() {
        let fixed = Type::array(ScalarType::FLOAT64, vec![Dim::Known(3)], Order::C);
        let open = Type::array(ScalarType::FLOAT64, vec![Dim::Unknown], Order::C);
        let a = decl("f", vec![ParamPattern::Concrete(open)]);
        let b = decl("f", vec![ParamPattern::Concrete(fixed.clone())]);
        let args = [fixed];
        match resolve(&[&a, &b], &call(&args), &PromotionPolicy::default()) {
            Resolution::Match(binding) => assert_eq!(binding.candidate, 1),
            other => panic!("expected a match, got {:?}", other),
        }
    }

    #[test]
    fn test_concrete_beats_generic() {
        let a = decl("f", vec![var("T")]);
        let b = decl("f", vec![ParamPattern::Concrete(scalar(ScalarType::FLOAT64))]);
        let args = [scalar(ScalarType::FLOAT64)];
        match resolve(&[&a, &b], &call(&args), &PromotionPolicy::default()) {
            Resolution::Match(binding) => assert_eq!(binding.candidate, 1),
            other => panic!("expected a match, got {:?}", other),
        }
    }

    #[test]
    fn test_generic_binding_generalizes_shapes() {
        let a = decl("norm", vec![var("x")]);
        let args = [Type::array(ScalarType::FLOAT64, vec![Dim::Known(4)], Order::C)];
        match resolve(&[&a], &call(&args), &PromotionPolicy::default()) {
            Resolution::Match(binding) => assert_eq!(
                binding.param_types,
                vec![Type::array(ScalarType::FLOAT64, vec![Dim::Unknown], Order::C)]
            ),
            other => panic!("expected a match, got {:?}", other),
        }
    }

    #[test]
    fn test_template_options_and_shared_variables() {
        let mut a = decl("add", vec![var("T"), var("T")]);
        a.template_vars.push(TemplateVar {
            name: "T".to_string(),
            options: vec![scalar(ScalarType::INT64), scalar(ScalarType::FLOAT64)],
        });
        let policy = PromotionPolicy::default();
        let args = [scalar(ScalarType::FLOAT64), scalar(ScalarType::INT64)];
        match resolve(&[&a], &call(&args), &policy) {
            Resolution::Match(binding) => {
                assert_eq!(binding.param_types, vec![scalar(ScalarType::FLOAT64); 2]);
                assert_eq!(binding.score.promotions, 1);
            }
            other => panic!("expected a match, got {:?}", other),
        }
        let args = [scalar(ScalarType::COMPLEX128), scalar(ScalarType::COMPLEX128)];
        assert!(matches!(
            resolve(&[&a], &call(&args), &policy),
            Resolution::NotFound(_)
        ));
    }

    #[test]
    fn test_keywords_and_defaults() {
        let mut a = decl(
            "scale",
            vec![
                ParamPattern::Concrete(scalar(ScalarType::FLOAT64)),
                ParamPattern::Concrete(scalar(ScalarType::FLOAT64)),
            ],
        );
        a.params[1].default = Some(Literal::Float(1.0));
        let positional = [scalar(ScalarType::FLOAT64)];
        let keywords = [("p1".to_string(), scalar(ScalarType::FLOAT64))];
        let site = CallSite {
            positional: &positional,
            keywords: &keywords,
        };
        match resolve(&[&a], &site, &PromotionPolicy::default()) {
            Resolution::Match(binding) => {
                assert_eq!(binding.slots, vec![ArgSlot::Positional(0), ArgSlot::Keyword(0)])
            }
            other => panic!("expected a match, got {:?}", other),
        }
        let bad = [("q".to_string(), scalar(ScalarType::FLOAT64))];
        let site = CallSite {
            positional: &positional,
            keywords: &bad,
        };
        assert!(matches!(
            resolve(&[&a], &site, &PromotionPolicy::default()),
            Resolution::NotFound(_)
        ));
    }
}
