//! Fortran 2008 backend
//!
//! One unit becomes a module `<unit>.f90` and, when the module has top-level
//! statements, a program `prog_<unit>.f90`. Scalars use the `iso_c_binding`
//! kinds so that the C and Fortran renditions of a unit agree on layout.
//!
//! Storage is 1-based. A C-ordered array is stored with its extents reversed,
//! so element `a[i, j]` is `a(j + 1, i + 1)` and the last logical axis stays
//! contiguous. Local arrays are `allocatable` and released by the compiler.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

use tracing::{debug, instrument};

use super::emit::{
    bare, function_symbol, loop_index, omp_clauses, taken_names, BodyEmitter, BodyParts, DirectiveLowering,
    Syntax, DOT_INDEX, RESULT,
};
use super::lower;
use super::writer::CodeWriter;
use super::{Backend, BackendOutput, FileRole, GenerateContext, GeneratedFile, Manifest, ManifestFile};
use crate::ast::{BinOp, BoolOp, CmpOp, UnaryOp};
use crate::config::{CompilerConfig, Language};
use crate::diagnostics::Diagnostics;
use crate::directives::{Directive, DirectiveKey};
use crate::ir::{
    Intent, Literal, LocalVar, MathFn, Reduction, TypedBody, TypedFunction, TypedModule, TypedParam,
    TypedStmtKind, VarRef, VarScope,
};
use crate::symbols::SymbolId;
use crate::types::{AggregateType, ArrayType, Order, ScalarKind, ScalarType, Type};

const INDENT: &str = "    ";

/// Free-form line limit
const MAX_LINE: usize = 132;

const RESERVED: &[&str] = &[
    "abs", "achar", "aimag", "all", "allocatable", "allocate", "allocated", "any", "associate", "block",
    "c_bool", "c_double", "c_float", "c_int8_t", "c_int16_t", "c_int32_t", "c_int64_t", "c_int128_t",
    "call", "ceiling", "character", "class", "close", "cmplx", "complex", "conjg", "contains", "cos",
    "count", "cycle", "data", "deallocate", "dimension", "do", "dot_product", "elemental", "else",
    "end", "entry", "exit", "exp", "floor", "format", "function", "huge", "iand", "ieor", "if",
    "implicit", "in", "inout", "int", "integer", "intent", "interface", "ior", "kind", "lbound", "len",
    "log", "logical", "matmul", "max", "maxval", "merge", "min", "minval", "mod", "module", "modulo",
    "move_alloc", "mpi", "none", "not", "null", "nullify", "open", "out", "parameter", "pointer",
    "present", "print", "private", "procedure", "product", "program", "public", "pure", "real",
    "recursive", "reshape", "result", "return", "save", "select", "shape", "shifta", "shiftl", "sign",
    "sin", "size", "sqrt", "stop", "subroutine", "sum", "tan", "target", "then", "transpose", "trim",
    "type", "ubound", "use", "value", "while", "write",
];

pub struct FortranBackend;

impl Backend for FortranBackend {
    fn language(&self) -> Language {
        Language::Fortran
    }

    #[instrument(skip_all, fields(unit = %module.name))]
    fn generate(&self, module: &TypedModule, ctx: &GenerateContext<'_>) -> BackendOutput {
        FortranUnit::new(module, ctx.config).render()
    }
}

/// `iso_c_binding` kind of a scalar type
fn kind(elem: ScalarType) -> &'static str {
    match (elem.kind, elem.bits) {
        (ScalarKind::Bool, _) => "c_bool",
        (ScalarKind::Int, 8) => "c_int8_t",
        (ScalarKind::Int, 16) => "c_int16_t",
        (ScalarKind::Int, 32) => "c_int32_t",
        (ScalarKind::Int, 128) => "c_int128_t",
        (ScalarKind::Int, _) => "c_int64_t",
        (ScalarKind::Float, 32) | (ScalarKind::Complex, 64) => "c_float",
        (ScalarKind::Float, 128) | (ScalarKind::Complex, 256) => "c_long_double",
        _ => "c_double",
    }
}

fn scalar_decl(elem: ScalarType) -> String {
    let head = match elem.kind {
        ScalarKind::Bool => "logical",
        ScalarKind::Int => "integer",
        ScalarKind::Float => "real",
        ScalarKind::Complex => "complex",
    };
    format!("{}({})", head, kind(elem))
}

/// `(:,:)` of an assumed or deferred shape
fn deferred(rank: usize) -> String {
    format!("({})", vec![":"; rank].join(","))
}

/// Physical position of a logical axis
fn physical_axis(ty: &ArrayType, axis: usize) -> usize {
    match ty.order {
        Order::C => ty.rank() - axis,
        Order::F => axis + 1,
    }
}

/// Fortran subscript of a 0-based index
fn subscript(index: &str) -> String {
    match index.parse::<i64>() {
        Ok(n) => (n + 1).to_string(),
        Err(_) => match index.split_once("_c_int").map(|(n, _)| n.parse::<i64>()) {
            Some(Ok(n)) => (n + 1).to_string(),
            _ => format!("{} + 1", bare(index)),
        },
    }
}

fn quote(text: &str) -> String {
    let parts: Vec<String> = text
        .split('\n')
        .map(|part| format!("'{}'", part.replace('\'', "''")))
        .collect();
    parts.join(" // achar(10) // ")
}

fn real_text(v: f64, k: &str) -> String {
    if v.is_nan() {
        return format!("ieee_value(0.0_{}, ieee_quiet_nan)", k);
    }
    if v.is_infinite() {
        let class = if v > 0.0 { "ieee_positive_inf" } else { "ieee_negative_inf" };
        return format!("ieee_value(0.0_{}, {})", k, class);
    }
    let text = format!("{:?}_{}", v, k);
    if v < 0.0 {
        format!("({})", text)
    } else {
        text
    }
}

/// Continue lines longer than the free-form limit
fn wrap(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for line in text.lines() {
        for part in wrap_line(line) {
            out.push_str(&part);
            out.push('\n');
        }
    }
    out
}

fn wrap_line(line: &str) -> Vec<String> {
    if line.len() <= MAX_LINE || line.trim_start().starts_with('!') {
        return vec![line.to_string()];
    }
    let indent = &line[..line.len() - line.trim_start().len()];
    let mut out = Vec::new();
    let mut rest = line.to_string();
    while rest.len() > MAX_LINE {
        let Some(cut) = break_point(&rest, MAX_LINE - 2) else { break };
        out.push(format!("{} &", rest[..cut].trim_end()));
        rest = format!("{}{}& {}", indent, INDENT, rest[cut..].trim_start());
    }
    out.push(rest);
    out
}

/// Last space or comma outside a string before `limit`
fn break_point(line: &str, limit: usize) -> Option<usize> {
    let floor = line.len() - line.trim_start().len() + INDENT.len() + 2;
    let mut quote: Option<char> = None;
    let mut best = None;
    for (i, c) in line.char_indices() {
        if i >= limit {
            break;
        }
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '\'' || c == '"' => quote = Some(c),
            None if c == ' ' || c == ',' => best = Some(i + 1),
            None => {}
        }
    }
    best.filter(|&cut| cut > floor)
}

/// Spelling rules of the Fortran target
pub(crate) struct FSyntax;

impl FSyntax {
    /// Operand of a matrix product in logical orientation
    fn oriented(name: &str, ty: &ArrayType) -> String {
        if ty.rank() == 2 && ty.order == Order::C {
            format!("transpose({})", name)
        } else {
            name.to_string()
        }
    }
}

impl Syntax for FSyntax {
    const MANUAL_FREE: bool = false;

    fn reserved(&self) -> &'static [&'static str] {
        RESERVED
    }

    fn fold_case(&self) -> bool {
        true
    }

    fn literal(&self, value: &Literal, ty: ScalarType) -> String {
        match value {
            Literal::Bool(b) => format!(".{}._c_bool", b),
            Literal::Int(n) => match ty.kind {
                ScalarKind::Float | ScalarKind::Complex => self.literal(&Literal::Float(*n as f64), ty),
                ScalarKind::Bool => self.literal(&Literal::Bool(*n != 0), ty),
                ScalarKind::Int if *n == i64::MIN => {
                    format!("(-{}_{} - 1_{})", i64::MAX, kind(ty), kind(ty))
                }
                ScalarKind::Int if *n < 0 => format!("({}_{})", n, kind(ty)),
                ScalarKind::Int => format!("{}_{}", n, kind(ty)),
            },
            Literal::Float(v) => match ty.kind {
                ScalarKind::Complex => self.literal(&Literal::Complex(*v, 0.0), ty),
                _ => real_text(*v, kind(ty)),
            },
            Literal::Complex(re, im) => {
                let k = kind(ty);
                format!("cmplx({}, {}, {})", real_text(*re, k), real_text(*im, k), k)
            }
            Literal::Str(text) => quote(text),
        }
    }

    fn string(&self, text: &str) -> String {
        quote(text)
    }

    fn global(&self, module: &str, name: &str) -> String {
        format!("{}_{}", module, name)
    }

    fn param(&self, name: &str, _ty: &Type) -> String {
        name.to_string()
    }

    fn unary(&self, op: UnaryOp, operand: &str, elem: ScalarType) -> String {
        match op {
            UnaryOp::Neg => format!("(-{})", operand),
            UnaryOp::Pos => format!("(+{})", operand),
            UnaryOp::Not => format!("(.not. {})", operand),
            UnaryOp::Invert if elem.is_bool() => format!("(.not. {})", operand),
            UnaryOp::Invert => format!("not({})", bare(operand)),
        }
    }

    fn binary(&self, op: BinOp, left: &str, right: &str, elem: ScalarType) -> String {
        let (l, r) = (bare(left), bare(right));
        match (op, elem.kind) {
            (BinOp::FloorDiv, ScalarKind::Int | ScalarKind::Bool) => {
                format!("(({} - modulo({}, {})) / {})", left, l, r, right)
            }
            (BinOp::FloorDiv, ScalarKind::Float) => {
                format!("real(floor({} / {}, c_int64_t), {})", left, right, kind(elem))
            }
            (BinOp::FloorDiv, _) => format!("({} / {})", left, right),
            (BinOp::Mod, _) => format!("modulo({}, {})", l, r),
            (BinOp::Pow, _) => format!("({} ** {})", left, right),
            (BinOp::BitAnd, ScalarKind::Bool) => format!("({} .and. {})", left, right),
            (BinOp::BitOr, ScalarKind::Bool) => format!("({} .or. {})", left, right),
            (BinOp::BitXor, ScalarKind::Bool) => format!("({} .neqv. {})", left, right),
            (BinOp::BitAnd, _) => format!("iand({}, {})", l, r),
            (BinOp::BitOr, _) => format!("ior({}, {})", l, r),
            (BinOp::BitXor, _) => format!("ieor({}, {})", l, r),
            (BinOp::LShift, _) => format!("shiftl({}, {})", l, r),
            (BinOp::RShift, _) => format!("shifta({}, {})", l, r),
            (BinOp::MatMul, _) => format!("({} * {})", left, right),
            (op, _) => format!("({} {} {})", left, op.symbol(), right),
        }
    }

    fn compare(&self, op: CmpOp, left: &str, right: &str, elem: ScalarType) -> String {
        let symbol = match (op, elem.is_bool()) {
            (CmpOp::Eq, true) => ".eqv.",
            (CmpOp::NotEq, true) => ".neqv.",
            (CmpOp::NotEq, false) => "/=",
            (op, _) => op.symbol(),
        };
        format!("({} {} {})", left, symbol, right)
    }

    fn logical(&self, op: BoolOp, left: &str, right: &str) -> String {
        match op {
            BoolOp::And => format!("({} .and. {})", left, right),
            BoolOp::Or => format!("({} .or. {})", left, right),
        }
    }

    fn cast(&self, value: &str, from: ScalarType, to: ScalarType) -> String {
        if from == to {
            return value.to_string();
        }
        let v = bare(value);
        match (from.kind, to.kind) {
            (_, ScalarKind::Bool) if from.is_bool() => format!("logical({}, c_bool)", v),
            (_, ScalarKind::Bool) => format!("({} /= 0)", value),
            (ScalarKind::Bool, _) => {
                let one = self.literal(&Literal::Int(1), to);
                let zero = self.literal(&Literal::Int(0), to);
                format!("merge({}, {}, {})", one, zero, v)
            }
            (_, ScalarKind::Int) => format!("int({}, {})", v, kind(to)),
            (_, ScalarKind::Float) => format!("real({}, {})", v, kind(to)),
            (_, ScalarKind::Complex) => format!("cmplx({}, kind={})", v, kind(to)),
        }
    }

    fn math(&self, f: MathFn, arg: &str, arg_elem: ScalarType, result: ScalarType) -> String {
        match f {
            MathFn::Abs => self.cast(&format!("abs({})", bare(arg)), abs_type(arg_elem), result),
            MathFn::Floor => {
                let arg = self.cast(arg, arg_elem, result);
                format!("real(floor({}, c_int64_t), {})", bare(&arg), kind(result))
            }
            f => {
                let arg = self.cast(arg, arg_elem, result);
                format!("{}({})", f.name(), bare(&arg))
            }
        }
    }

    fn extreme(&self, r: Reduction, args: &[String], _elem: ScalarType) -> String {
        let name = match r {
            Reduction::Min => "min",
            _ => "max",
        };
        let args: Vec<&str> = args.iter().map(|a| bare(a)).collect();
        format!("{}({})", name, args.join(", "))
    }

    fn select(&self, test: &str, body: &str, orelse: &str) -> String {
        format!("merge({}, {}, {})", bare(body), bare(orelse), bare(test))
    }

    fn function_name(&self, symbol: &str) -> String {
        let lower = symbol.to_ascii_lowercase();
        let name = if symbol.starts_with('_') {
            format!("v{}", symbol)
        } else {
            symbol.to_string()
        };
        if RESERVED.contains(&lower.as_str()) {
            format!("{}_", name)
        } else {
            name
        }
    }

    fn call(&self, function: &str, args: &[String]) -> String {
        let args: Vec<&str> = args.iter().map(|a| bare(a)).collect();
        format!("{}({})", function, args.join(", "))
    }

    fn call_arg(&self, arg: &str, ty: &Type) -> String {
        match ty {
            Type::Scalar(s) if s.is_bool() => format!("logical({}, c_bool)", bare(arg)),
            _ => arg.to_string(),
        }
    }

    fn field(&self, base: &str, field: &str) -> String {
        format!("{}%{}", base, field)
    }

    fn construct(&self, aggregate: &str, args: &[String]) -> String {
        self.call(aggregate, args)
    }

    fn element(&self, array: &str, ty: &ArrayType, indices: &[String]) -> String {
        let mut subscripts: Vec<String> = indices.iter().map(|i| subscript(i)).collect();
        if ty.order == Order::C {
            subscripts.reverse();
        }
        format!("{}({})", array, subscripts.join(", "))
    }

    fn extent(&self, array: &str, ty: &ArrayType, axis: usize) -> String {
        format!("size({}, {}, kind=c_int64_t)", array, physical_axis(ty, axis))
    }

    fn size(&self, array: &str, _ty: &ArrayType) -> String {
        format!("size({}, kind=c_int64_t)", array)
    }

    fn guard(&self, extent: &str, index: &str) -> String {
        format!("merge(0_c_int64_t, {}, {} == 1)", index, extent)
    }

    fn count(&self, start: &str, stop: &str, step: &str, elem: ScalarType) -> String {
        match elem.kind {
            ScalarKind::Float => format!(
                "max(0_c_int64_t, ceiling(({} - {}) / {}, c_int64_t))",
                stop, start, step
            ),
            _ => format!(
                "max(0_c_int64_t, int(({} - {} + {} - merge(1, -1, {} > 0)) / {}, c_int64_t))",
                stop, start, step, step, step
            ),
        }
    }

    fn max_extent(&self, a: &str, b: &str) -> String {
        format!("max(int({}, c_int64_t), int({}, c_int64_t))", bare(a), bare(b))
    }

    fn reduction(&self, r: Reduction, array: &str, ty: &ArrayType) -> Option<String> {
        if ty.elem.is_bool() {
            return None;
        }
        let widened = if ty.elem.is_integer() && ty.elem.bits < 64 {
            format!("int({}, c_int64_t)", array)
        } else {
            array.to_string()
        };
        Some(match r {
            Reduction::Sum => format!("sum({})", widened),
            Reduction::Prod => format!("product({})", widened),
            Reduction::Max => format!("maxval({})", array),
            Reduction::Min => format!("minval({})", array),
        })
    }

    fn matmul(&self, left: (&str, &ArrayType), right: (&str, &ArrayType), result: &Type) -> Option<String> {
        let ((ln, la), (rn, ra)) = (left, right);
        Some(match (la.rank(), ra.rank()) {
            (1, 1) if la.elem.is_complex() => format!("sum({} * {})", ln, rn),
            (1, 1) => format!("dot_product({}, {})", ln, rn),
            (2, 1) if la.order == Order::C => format!("matmul({}, {})", rn, ln),
            (1, 2) if ra.order == Order::C => format!("matmul({}, {})", rn, ln),
            (2, 1) | (1, 2) => format!("matmul({}, {})", ln, rn),
            (2, 2) => {
                let out = result.as_array().map_or(Order::C, |a| a.order);
                match (la.order, ra.order, out) {
                    (Order::C, Order::C, Order::C) => format!("matmul({}, {})", rn, ln),
                    (Order::F, Order::F, Order::F) => format!("matmul({}, {})", ln, rn),
                    _ => {
                        let product = format!("matmul({}, {})", Self::oriented(ln, la), Self::oriented(rn, ra));
                        if out == Order::C {
                            format!("transpose({})", product)
                        } else {
                            product
                        }
                    }
                }
            }
            _ => return None,
        })
    }

    fn fill(&self, target: &str, value: &str) -> Option<String> {
        Some(self.assign(target, value))
    }

    fn assign(&self, target: &str, value: &str) -> String {
        format!("{} = {}", target, bare(value))
    }

    fn allocate(&self, w: &mut CodeWriter, target: &str, ty: &ArrayType, extents: &[String]) {
        let mut physical: Vec<&str> = extents.iter().map(|e| bare(e)).collect();
        if ty.order == Order::C {
            physical.reverse();
        }
        let physical = physical.join(", ");
        w.line(format!("if (allocated({})) then", target));
        w.indent();
        w.line(format!(
            "if (any(shape({}, kind=c_int64_t) /= [integer(c_int64_t) :: {}])) deallocate({})",
            target, physical, target
        ));
        w.dedent();
        w.line("end if");
        w.line(format!("if (.not. allocated({})) allocate({}({}))", target, target, physical));
    }

    fn take(&self, target: &str, call: &str) -> String {
        self.assign(target, call)
    }

    fn alias(&self, target: &str, source: &str) -> String {
        format!("{} => {}", target, source)
    }

    fn return_copy(&self, source: &str) -> String {
        source.to_string()
    }

    fn move_result(&self, source: &str) -> Option<String> {
        Some(format!("call move_alloc({}, {})", source, RESULT))
    }

    fn call_stmt(&self, call: &str) -> String {
        format!("call {}", call)
    }

    fn free(&self, array: &str) -> String {
        format!("if (allocated({})) deallocate({})", array, array)
    }

    fn ret(&self, _value: Option<&str>) -> String {
        "return".to_string()
    }

    fn line_marker(&self, _line: u32, _file: &str) -> Option<String> {
        None
    }

    fn for_open(&self, var: &str, start: &str, stop: &str, step: i64) -> String {
        let last = if step > 0 {
            format!("{} - 1", stop)
        } else {
            format!("{} + 1", stop)
        };
        if step == 1 {
            format!("do {} = {}, {}", var, bare(start), last)
        } else {
            format!("do {} = {}, {}, {}", var, bare(start), last, step)
        }
    }

    fn index_loop_open(&self, var: &str, extent: &str) -> String {
        format!("do {} = 0, {} - 1", var, extent)
    }

    fn loop_close(&self) -> String {
        "end do".to_string()
    }

    fn while_open(&self, test: &str) -> String {
        format!("do while ({})", bare(test))
    }

    fn if_open(&self, test: &str) -> String {
        format!("if ({}) then", bare(test))
    }

    fn else_if(&self, test: &str) -> String {
        format!("else if ({}) then", bare(test))
    }

    fn else_open(&self) -> String {
        "else".to_string()
    }

    fn if_close(&self) -> String {
        "end if".to_string()
    }

    fn break_stmt(&self) -> String {
        "exit".to_string()
    }

    fn continue_stmt(&self) -> String {
        "cycle".to_string()
    }

    fn print(&self, args: &[(String, Option<ScalarType>)]) -> Vec<String> {
        if args.is_empty() {
            return vec!["print *".to_string()];
        }
        let items: Vec<String> = args
            .iter()
            .map(|(text, ty)| match ty {
                Some(s) if s.is_bool() => format!("trim(merge('True ', 'False', {}))", bare(text)),
                _ => bare(text).to_string(),
            })
            .collect();
        vec![format!("print *, {}", items.join(", "))]
    }

    fn loop_directive(&self, directive: &Directive, private: &[String]) -> DirectiveLowering {
        let omp = |head: &str, end: &str| {
            let line = format!("!$omp {} {}", head, omp_clauses(directive, private));
            DirectiveLowering::Wrap {
                open: vec![line.trim_end().to_string()],
                close: vec![format!("!$omp {}", end)],
            }
        };
        match &directive.key {
            DirectiveKey::ParallelLoop => omp("parallel do", "end parallel do"),
            DirectiveKey::Simd => omp("simd", "end simd"),
            DirectiveKey::Distribute => DirectiveLowering::Distribute,
            DirectiveKey::Other(_) => DirectiveLowering::Wrap {
                open: vec![format!("!dir$ {}", directive)],
                close: Vec::new(),
            },
        }
    }

    fn stmt_directive(&self, directive: &Directive) -> Option<String> {
        match directive.key {
            DirectiveKey::Other(_) => Some(format!("!dir$ {}", directive)),
            _ => None,
        }
    }

    fn distribute_bounds(&self, w: &mut CodeWriter, start: &str, stop: &str, step: i64) -> Option<(String, String)> {
        let (start, stop) = (bare(start), bare(stop));
        let count = if step > 0 {
            format!("max(0_c_int64_t, int(({} - {} + {}) / {}, c_int64_t))", stop, start, step - 1, step)
        } else {
            format!("max(0_c_int64_t, int(({} - {} + {}) / {}, c_int64_t))", start, stop, -step - 1, -step)
        };
        w.line("call MPI_Comm_rank(MPI_COMM_WORLD, nv_rank, nv_ierr)");
        w.line("call MPI_Comm_size(MPI_COMM_WORLD, nv_nproc, nv_ierr)");
        w.line(format!("nv_count = {}", count));
        w.line(format!("nv_lo = {} + (nv_count * nv_rank / nv_nproc) * {}", start, step));
        w.line(format!("nv_hi = {} + (nv_count * (nv_rank + 1) / nv_nproc) * {}", start, step));
        Some(("nv_lo".to_string(), "nv_hi".to_string()))
    }

    fn allreduce(&self, op: &str, var: &str, ty: &Type) -> Option<String> {
        let elem = ty.as_scalar()?;
        let datatype = match (elem.kind, elem.bits) {
            (ScalarKind::Int, 8) => "MPI_INTEGER1",
            (ScalarKind::Int, 16) => "MPI_INTEGER2",
            (ScalarKind::Int, 32) => "MPI_INTEGER4",
            (ScalarKind::Int, 64) => "MPI_INTEGER8",
            (ScalarKind::Float, 32) => "MPI_REAL4",
            (ScalarKind::Float, 64) => "MPI_REAL8",
            (ScalarKind::Complex, 64) => "MPI_COMPLEX8",
            (ScalarKind::Complex, 128) => "MPI_COMPLEX16",
            _ => return None,
        };
        let operation = match op {
            "+" => "MPI_SUM",
            "*" => "MPI_PROD",
            "max" if !elem.is_complex() => "MPI_MAX",
            "min" if !elem.is_complex() => "MPI_MIN",
            _ => return None,
        };
        Some(format!(
            "call MPI_Allreduce(MPI_IN_PLACE, {}, 1, {}, {}, MPI_COMM_WORLD, nv_ierr)",
            var, datatype, operation
        ))
    }
}

/// Result type of `abs` on a value of type `elem`
fn abs_type(elem: ScalarType) -> ScalarType {
    if elem.is_complex() {
        ScalarType::new(ScalarKind::Float, elem.bits / 2)
    } else {
        elem
    }
}

/// Generation state of one unit
struct FortranUnit<'a> {
    module: &'a TypedModule,
    config: &'a CompilerConfig,
    syntax: FSyntax,
    diagnostics: Diagnostics,
}

impl<'a> FortranUnit<'a> {
    fn new(module: &'a TypedModule, config: &'a CompilerConfig) -> Self {
        Self {
            module,
            config,
            syntax: FSyntax,
            diagnostics: Diagnostics::new(),
        }
    }

    fn symbol(&self, function: &TypedFunction) -> String {
        self.syntax
            .function_name(&function_symbol(self.module, &function.emitted_name, &function.module))
    }

    fn render(mut self) -> BackendOutput {
        let module = self.module;
        let unit = module.name.as_str();

        let mut functions = Vec::new();
        for function in &module.functions {
            if let Some(text) = self.function(function) {
                functions.push(text);
            }
        }
        let program = module.main.as_ref().and_then(|main| self.program(main));
        let uses_mpi = module.uses_distribute || functions.iter().any(|(_, mpi)| *mpi);

        let mut w = CodeWriter::new(INDENT);
        w.line(format!("module {}", unit));
        w.blank();
        w.indent();
        self.preamble(&mut w, uses_mpi);
        self.specification(&mut w);
        if !functions.is_empty() {
            w.blank();
            w.dedent();
            w.line("contains");
            w.indent();
            for (text, _) in &functions {
                w.blank();
                w.append(text);
            }
        }
        w.dedent();
        w.blank();
        w.line(format!("end module {}", unit));

        let mut files = vec![GeneratedFile {
            path: PathBuf::from(format!("{}.f90", unit)),
            role: FileRole::Source,
            contents: wrap(&w.finish()),
        }];
        let program_mpi = program.as_ref().map_or(false, |(_, mpi)| *mpi);
        if let Some((text, _)) = program {
            files.push(GeneratedFile {
                path: PathBuf::from(format!("prog_{}.f90", unit)),
                role: FileRole::Program,
                contents: wrap(&text),
            });
        }

        let mut libraries = Vec::new();
        let openmp = lower::all_directives(module)
            .iter()
            .any(|d| matches!(d.key, DirectiveKey::ParallelLoop | DirectiveKey::Simd));
        if openmp {
            libraries.push("openmp".to_string());
        }
        if uses_mpi || program_mpi {
            libraries.push("mpi".to_string());
        }
        let manifest = Manifest {
            unit: unit.to_string(),
            language: Language::Fortran,
            files: files
                .iter()
                .map(|f| ManifestFile {
                    path: f.path.to_string_lossy().into_owned(),
                    role: f.role,
                })
                .collect(),
            entry_symbols: module
                .functions
                .iter()
                .filter(|f| f.public)
                .map(|f| self.symbol(f))
                .collect(),
            libraries,
            dependencies: module.imports.clone(),
        };
        debug!(files = files.len(), errors = self.diagnostics.has_errors(), "rendered Fortran unit");
        BackendOutput {
            language: Language::Fortran,
            files,
            manifest,
            diagnostics: self.diagnostics,
        }
    }

    /// `use` statements and `implicit none`
    fn preamble(&self, w: &mut CodeWriter, uses_mpi: bool) {
        w.line("use, intrinsic :: iso_c_binding");
        w.line("use, intrinsic :: ieee_arithmetic");
        for import in &self.module.imports {
            w.line(format!("use {}", import));
        }
        if uses_mpi {
            w.line("use mpi");
        }
        w.blank();
        w.line("implicit none");
    }

    /// Constants, derived types, generic interfaces and private names
    fn specification(&self, w: &mut CodeWriter) {
        let module = self.module;
        let constants: Vec<String> = module
            .globals
            .iter()
            .filter_map(|global| {
                let elem = global.ty.as_scalar()?;
                Some(format!(
                    "{}, parameter :: {} = {}",
                    scalar_decl(elem),
                    self.syntax.global(&module.name, &global.name),
                    bare(&self.syntax.literal(&global.value, elem))
                ))
            })
            .collect();
        if !constants.is_empty() {
            w.blank();
            w.lines(constants);
        }

        for aggregate in &module.aggregates {
            w.blank();
            derived_type(w, aggregate);
        }

        for (generic, members) in self.generics() {
            w.blank();
            w.line(format!("interface {}", generic));
            w.indent();
            w.line(format!("module procedure {}", members.join(", ")));
            w.dedent();
            w.line(format!("end interface {}", generic));
        }

        let private: Vec<String> = module
            .functions
            .iter()
            .filter(|f| !f.public)
            .map(|f| self.symbol(f))
            .collect();
        if !private.is_empty() {
            w.blank();
            w.line(format!("private :: {}", private.join(", ")));
        }
    }

    /// Generic names of overloads and template instances, with their
    /// specific procedures
    fn generics(&self) -> BTreeMap<String, Vec<String>> {
        let module = self.module;
        let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for function in module.functions.iter().filter(|f| f.public && f.emitted_name != f.name) {
            groups
                .entry(self.syntax.function_name(&function.name))
                .or_default()
                .push(self.symbol(function));
        }
        let taken: Vec<String> = module
            .functions
            .iter()
            .map(|f| self.symbol(f).to_ascii_lowercase())
            .chain(std::iter::once(module.name.to_ascii_lowercase()))
            .chain(module.imports.iter().map(|i| i.to_ascii_lowercase()))
            .chain(module.aggregates.iter().map(|a| a.name.to_ascii_lowercase()))
            .collect();
        groups.retain(|generic, _| !taken.contains(&generic.to_ascii_lowercase()));
        groups
    }

    fn emit_body(
        &mut self,
        ret: &Type,
        params: &[TypedParam],
        body: &TypedBody,
        depth: usize,
    ) -> Option<BodyParts> {
        let module = self.module;
        let taken = taken_names(&self.syntax, module, &body.stmts);
        let mut diagnostics = Diagnostics::new();
        let mut w = CodeWriter::new(INDENT);
        for _ in 0..depth {
            w.indent();
        }
        let mut emitter = BodyEmitter::new(
            &self.syntax,
            module,
            self.config,
            w,
            &mut diagnostics,
            ret.clone(),
            params,
            &body.locals,
            &taken,
        );
        let emitted = emitter.emit_block(&body.stmts);
        let parts = emitter.finish(true);
        self.diagnostics.merge(diagnostics);
        emitted.ok().map(|_| parts)
    }

    /// Prefixes the function can carry: a pure function that prints, calls
    /// MPI or calls an impure procedure loses them
    fn prefixes(&self, function: &TypedFunction, parts: &BodyParts) -> Vec<&'static str> {
        let mut prefixes = Vec::new();
        let callees = lower::callees(&function.body.stmts);
        let recursive = callees
            .iter()
            .any(|c| c.emitted_name == function.emitted_name && c.module == function.module);
        let mut prints = false;
        lower::walk_stmts(&function.body.stmts, &mut |stmt| {
            prints |= matches!(stmt.kind, TypedStmtKind::Print(_));
        });
        let callees_pure = callees.iter().all(|c| {
            c.module == self.module.name
                && self
                    .module
                    .function(&c.emitted_name)
                    .map_or(false, |f| f.pure || f.elemental)
        });
        let can_be_pure = !prints && !parts.uses_distribute && callees_pure;
        if function.elemental && can_be_pure && !recursive {
            prefixes.push("elemental");
        } else if function.pure && can_be_pure {
            prefixes.push("pure");
        }
        if recursive {
            prefixes.push("recursive");
        }
        prefixes
    }

    /// Rendered function and whether it calls MPI
    fn function(&mut self, function: &TypedFunction) -> Option<(String, bool)> {
        let parts = self.emit_body(&function.ret, &function.params, &function.body, 2)?;
        let name = self.symbol(function);
        let mut namer = parts.namer.clone();
        let params: Vec<String> = function
            .params
            .iter()
            .map(|p| namer.bind(p.symbol, &p.name))
            .collect();
        let sources = lower::alias_sources(&function.body.stmts);

        let mut head = self.prefixes(function, &parts).join(" ");
        if !head.is_empty() {
            head.push(' ');
        }
        let subroutine = function.ret == Type::Void;
        let (kind_word, result) = if subroutine {
            ("subroutine", String::new())
        } else {
            ("function", format!(" result({})", RESULT))
        };

        let mut w = CodeWriter::new(INDENT);
        w.indent();
        w.line(format!("{}{} {}({}){}", head, kind_word, name, params.join(", "), result));
        w.indent();
        for (param, pname) in function.params.iter().zip(&params) {
            w.line(param_decl(param, pname, sources.contains(&param.symbol)));
        }
        if !subroutine {
            w.line(declaration(&function.ret, RESULT, false, false));
        }
        self.declarations(&mut w, &function.body.locals, &parts, &sources);
        for directive in &function.directives {
            match &directive.key {
                DirectiveKey::Simd => {
                    let clauses = directive.clause_text();
                    w.line(format!("!$omp declare simd({}) {}", name, clauses).trim_end());
                }
                _ => w.line(format!("!dir$ {}", directive)),
            }
        }
        w.blank();
        w.dedent();
        w.append(&parts.text);
        w.line(format!("end {} {}", kind_word, name));
        Some((w.finish(), parts.uses_distribute))
    }

    fn declarations(&self, w: &mut CodeWriter, locals: &[LocalVar], parts: &BodyParts, sources: &HashSet<SymbolId>) {
        for local in locals {
            let var = VarRef {
                name: local.name.clone(),
                symbol: local.symbol,
                ty: local.ty.clone(),
                scope: VarScope::Local,
            };
            let target = !local.alias && sources.contains(&local.symbol);
            w.line(declaration(&local.ty, &parts.namer.name(&var), local.alias, target));
        }
        for temp in &parts.temps {
            w.line(declaration(&temp.ty, &temp.name, false, false));
        }
        if parts.max_rank > 0 || parts.uses_dot_index {
            let mut indices: Vec<String> = (0..parts.max_rank).map(loop_index).collect();
            if parts.uses_dot_index {
                indices.push(DOT_INDEX.to_string());
            }
            w.line(format!("integer(c_int64_t) :: {}", indices.join(", ")));
        }
        if parts.uses_distribute {
            w.line("integer :: nv_rank, nv_nproc, nv_ierr");
            w.line("integer(c_int64_t) :: nv_count, nv_lo, nv_hi");
        }
    }

    /// Rendered program and whether it starts MPI
    fn program(&mut self, main: &TypedBody) -> Option<(String, bool)> {
        let module = self.module;
        let unit = module.name.clone();
        let parts = self.emit_body(&Type::Void, &[], main, 1)?;
        let mpi = module.uses_distribute || parts.uses_distribute;
        let sources = lower::alias_sources(&main.stmts);

        let mut w = CodeWriter::new(INDENT);
        w.line(format!("program prog_{}", unit));
        w.blank();
        w.indent();
        w.line("use, intrinsic :: iso_c_binding");
        w.line("use, intrinsic :: ieee_arithmetic");
        w.line(format!("use {}", unit));
        for import in &module.imports {
            w.line(format!("use {}", import));
        }
        if mpi {
            w.line("use mpi");
        }
        w.blank();
        w.line("implicit none");
        w.blank();
        self.declarations(&mut w, &main.locals, &parts, &sources);
        if mpi && !parts.uses_distribute {
            w.line("integer :: nv_ierr");
        }
        if mpi {
            w.blank();
            w.line("call MPI_Init(nv_ierr)");
        }
        w.dedent();
        w.append(&parts.text);
        w.indent();
        if mpi {
            w.line("call MPI_Finalize(nv_ierr)");
        }
        w.dedent();
        w.blank();
        w.line(format!("end program prog_{}", unit));
        Some((w.finish(), mpi))
    }
}

fn derived_type(w: &mut CodeWriter, aggregate: &AggregateType) {
    let interoperable = aggregate.fields.iter().all(|(_, ty)| ty.as_array().is_none());
    if interoperable {
        w.line(format!("type, bind(c) :: {}", aggregate.name));
    } else {
        w.line(format!("type :: {}", aggregate.name));
    }
    w.indent();
    for (name, ty) in &aggregate.fields {
        w.line(declaration(ty, name, false, false));
    }
    w.dedent();
    w.line(format!("end type {}", aggregate.name));
}

fn param_decl(param: &TypedParam, name: &str, target: bool) -> String {
    let intent = match param.intent {
        Intent::In => "intent(in)",
        Intent::InOut => "intent(inout)",
    };
    match &param.ty {
        Type::Scalar(s) => format!("{}, value :: {}", scalar_decl(*s), name),
        Type::Array(a) => format!(
            "{}, {}{} :: {}{}",
            scalar_decl(a.elem),
            intent,
            if target { ", target" } else { "" },
            name,
            deferred(a.rank())
        ),
        Type::Aggregate(a) => format!("type({}), {} :: {}", a.name, intent, name),
        _ => format!("! {} has no type", name),
    }
}

/// Declaration of a local, result or field
fn declaration(ty: &Type, name: &str, pointer: bool, target: bool) -> String {
    match ty {
        Type::Scalar(s) => format!("{} :: {}", scalar_decl(*s), name),
        Type::Array(a) => {
            let attribute = if pointer {
                "pointer"
            } else if target {
                "allocatable, target"
            } else {
                "allocatable"
            };
            format!("{}, {} :: {}{}", scalar_decl(a.elem), attribute, name, deferred(a.rank()))
        }
        Type::Aggregate(a) => format!("type({}) :: {}", a.name, name),
        _ => format!("! {} has no type", name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::compile_source;
    use pretty_assertions::assert_eq;

    fn generate(source: &str) -> BackendOutput {
        let config = CompilerConfig {
            languages: vec![Language::Fortran],
            ..CompilerConfig::default()
        };
        let output = compile_source(source, "m.py", "m", &config).unwrap();
        let unit = output.unit("m").unwrap();
        assert!(unit.ir.is_some(), "analysis failed: {:?}", output.diagnostics);
        unit.output(Language::Fortran).cloned().unwrap()
    }

    fn module_of(output: &BackendOutput) -> &str {
        &output.file("m.f90").unwrap().contents
    }

    #[test]
    fn test_scalar_function_layout() {
        let output = generate("def add(a: float, b: float) -> float:\n    return a + b\n");
        assert!(!output.has_errors());
        let text = module_of(&output);
        assert!(text.starts_with("module m\n"));
        assert!(text.contains("    use, intrinsic :: iso_c_binding\n"));
        assert!(text.contains("    implicit none\n"));
        assert!(text.contains("contains\n"));
        assert!(text.contains("    function add(a, b) result(nv_result)\n"), "{}", text);
        assert!(text.contains("        real(c_double), value :: a\n"));
        assert!(text.contains("        real(c_double) :: nv_result\n"));
        assert!(text.contains("        nv_result = a + b\n        return\n"));
        assert!(text.contains("    end function add\n"));
        assert!(text.trim_end().ends_with("end module m"));
        assert_eq!(output.manifest.entry_symbols, vec!["add"]);
        assert!(output.manifest.libraries.is_empty());
    }

    #[test]
    fn test_c_order_elements_are_reversed_and_one_based() {
        let output = generate("def pick(x: 'float64[:,:]') -> float:\n    return x[1, 2]\n");
        let text = module_of(&output);
        assert!(text.contains("real(c_double), intent(in) :: x(:,:)"), "{}", text);
        assert!(text.contains("nv_result = x(3, 2)"), "{}", text);
    }

    #[test]
    fn test_elementwise_loop_allocates() {
        let output = generate(
            "def scale(a: float, x: 'float64[:]') -> float:\n    z = a * x + 1.0\n    return z[0]\n",
        );
        let text = module_of(&output);
        assert!(text.contains("real(c_double), allocatable :: z(:)"), "{}", text);
        assert!(text.contains("if (.not. allocated(z)) allocate(z(size(x, 1, kind=c_int64_t)))"));
        assert!(text.contains("do nv_i0 = 0, size(x, 1, kind=c_int64_t) - 1"));
        assert!(text.contains("z(nv_i0 + 1) = (a * x(nv_i0 + 1)) + 1.0_c_double"), "{}", text);
        assert!(text.contains("integer(c_int64_t) :: nv_i0"));
        assert!(text.contains("nv_result = z(1)"));
    }

    #[test]
    fn test_parallel_loop_is_closed() {
        let output = generate(
            "def total(x: 'float64[:]') -> float:\n    s = 0.0\n    #$ parallel-loop reduction(+:s)\n    for i in range(len(x)):\n        s += x[i]\n    return s\n",
        );
        let text = module_of(&output);
        assert!(text.contains("!$omp parallel do reduction(+:s)"), "{}", text);
        assert!(text.contains("!$omp end parallel do"));
        assert_eq!(output.manifest.libraries, vec!["openmp"]);
    }

    #[test]
    fn test_distributed_loop_uses_mpi() {
        let output = generate(
            "def f(n: int) -> int:\n    s = 0\n    #$ distribute reduction(+:s)\n    for i in range(n):\n        s += i\n    return s\n",
        );
        assert!(!output.has_errors());
        let text = module_of(&output);
        assert!(text.contains("    use mpi\n"));
        assert!(text.contains("call MPI_Comm_rank(MPI_COMM_WORLD, nv_rank, nv_ierr)"));
        assert!(text.contains("do i = nv_lo, nv_hi - 1"), "{}", text);
        assert!(text.contains("call MPI_Allreduce(MPI_IN_PLACE, s, 1, MPI_INTEGER8, MPI_SUM, MPI_COMM_WORLD, nv_ierr)"));
        assert!(text.contains("integer :: nv_rank, nv_nproc, nv_ierr"));
        assert!(output.manifest.libraries.contains(&"mpi".to_string()));
    }

    #[test]
    fn test_overloads_get_a_generic_interface() {
        let output = generate("@types('int', 'int')\n@types('float', 'float')\ndef add(a, b):\n    return a + b\n");
        let text = module_of(&output);
        assert!(text.contains("interface add\n        module procedure add_i64_i64, add_f64_f64\n    end interface add"), "{}", text);
    }

    #[test]
    fn test_program_file() {
        let output = generate("x = 3\nprint('x is', x, 1.5)\n");
        let program = &output.file("prog_m.f90").unwrap().contents;
        assert!(program.starts_with("program prog_m\n"));
        assert!(program.contains("    use m\n"));
        assert!(program.contains("print *, 'x is', m_x, 1.5_c_double"), "{}", program);
        assert!(module_of(&output).contains("integer(c_int64_t), parameter :: m_x = 3_c_int64_t"));
        assert!(program.trim_end().ends_with("end program prog_m"));
        assert_eq!(output.manifest.files.last().map(|f| f.role), Some(FileRole::Program));
    }

    #[test]
    fn test_literal_spelling() {
        let f = FSyntax;
        assert_eq!(f.literal(&Literal::Int(5), ScalarType::INT64), "5_c_int64_t");
        assert_eq!(f.literal(&Literal::Int(-5), ScalarType::INT32), "(-5_c_int32_t)");
        assert_eq!(f.literal(&Literal::Float(0.5), ScalarType::FLOAT32), "0.5_c_float");
        assert_eq!(f.literal(&Literal::Bool(true), ScalarType::BOOL), ".true._c_bool");
        assert_eq!(
            f.literal(&Literal::Complex(1.0, -2.0), ScalarType::COMPLEX128),
            "cmplx(1.0_c_double, (-2.0_c_double), c_double)"
        );
        assert_eq!(f.string("it's"), "'it''s'");
    }

    #[test]
    fn test_subscripts() {
        assert_eq!(subscript("0"), "1");
        assert_eq!(subscript("4_c_int64_t"), "5");
        assert_eq!(subscript("nv_i0"), "nv_i0 + 1");
        assert_eq!(subscript("(i + j)"), "i + j + 1");
    }

    #[test]
    fn test_long_lines_are_continued_outside_strings() {
        let args: Vec<String> = (0..40).map(|i| format!("value_{}", i)).collect();
        let line = format!("    print *, 'a, b', {}", args.join(", "));
        let wrapped = wrap_line(&line);
        assert!(wrapped.len() > 1);
        assert!(wrapped.iter().all(|l| l.len() <= MAX_LINE));
        assert!(wrapped[0].ends_with(" &"));
        assert!(wrapped[1].trim_start().starts_with("& "));
        assert!(wrapped[0].contains("'a, b'"));
    }
}
