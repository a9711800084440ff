//! C99 backend
//!
//! One unit becomes `<unit>.h` (types, constants, prototypes), `<unit>.c`
//! (function definitions) and, when the module has top-level statements,
//! `prog_<unit>.c`. Arrays are `nv_ndarray` values from the shared
//! `ndarray.h`; owned arrays are released at every exit of their function.

use std::path::PathBuf;

use tracing::{debug, instrument};

use super::c_runtime::{self, MAX_RANK};
use super::emit::{
    bare, function_symbol, loop_index, omp_clauses, taken_names, BodyEmitter, BodyParts, DirectiveLowering,
    Syntax, DOT_INDEX, RESULT,
};
use super::lower;
use super::writer::CodeWriter;
use super::{Backend, BackendOutput, FileRole, GenerateContext, GeneratedFile, Manifest, ManifestFile};
use crate::ast::{BinOp, BoolOp, CmpOp, Location, UnaryOp};
use crate::config::{CompilerConfig, Language};
use crate::diagnostics::{Diagnostic, DiagnosticCode, Diagnostics, SourceLocation};
use crate::directives::{Directive, DirectiveKey};
use crate::ir::{
    LocalVar, Literal, MathFn, Reduction, TypedBody, TypedExpr, TypedFunction, TypedModule, TypedParam,
    TypedStmtKind, VarRef, VarScope,
};
use crate::types::{AggregateType, ArrayType, Order, ScalarKind, ScalarType, Type};

const INDENT: &str = "    ";

const RESERVED: &[&str] = &[
    "auto", "break", "case", "char", "const", "continue", "default", "do", "double", "else", "enum",
    "extern", "float", "for", "goto", "if", "inline", "int", "long", "register", "restrict", "return",
    "short", "signed", "sizeof", "static", "struct", "switch", "typedef", "union", "unsigned", "void",
    "volatile", "while", "bool", "true", "false", "complex", "I", "main", "abs", "labs", "llabs", "fabs",
    "cabs", "sqrt", "exp", "log", "sin", "cos", "tan", "floor", "ceil", "pow", "fmod", "fmax", "fmin",
    "creal", "cimag", "printf", "fputs", "free", "malloc", "calloc", "exit", "memcpy", "stdout", "stderr",
    "NAN", "INFINITY", "CMPLX", "CMPLXF", "CMPLXL",
];

pub struct CBackend;

impl Backend for CBackend {
    fn language(&self) -> Language {
        Language::C
    }

    #[instrument(skip_all, fields(unit = %module.name))]
    fn generate(&self, module: &TypedModule, ctx: &GenerateContext<'_>) -> BackendOutput {
        CUnit::new(module, ctx.config).render()
    }
}

/// C spelling of a scalar type; 128-bit integers have none
fn scalar_type(elem: ScalarType) -> Option<&'static str> {
    Some(match (elem.kind, elem.bits) {
        (ScalarKind::Bool, _) => "bool",
        (ScalarKind::Int, 8) => "int8_t",
        (ScalarKind::Int, 16) => "int16_t",
        (ScalarKind::Int, 32) => "int32_t",
        (ScalarKind::Int, 64) => "int64_t",
        (ScalarKind::Float, 32) => "float",
        (ScalarKind::Float, 64) => "double",
        (ScalarKind::Float, 128) => "long double",
        (ScalarKind::Complex, 64) => "float complex",
        (ScalarKind::Complex, 128) => "double complex",
        (ScalarKind::Complex, 256) => "long double complex",
        _ => return None,
    })
}

/// Scalar type of code already checked by [`CUnit::unrepresentable`]
fn ctype(elem: ScalarType) -> &'static str {
    scalar_type(elem).unwrap_or("int64_t")
}

fn c_type(ty: &Type) -> String {
    match ty {
        Type::Scalar(s) => ctype(*s).to_string(),
        Type::Array(_) => "nv_ndarray".to_string(),
        Type::Aggregate(a) => format!("struct {}", a.name),
        _ => "void".to_string(),
    }
}

fn representable(ty: &Type) -> bool {
    match ty {
        Type::Scalar(s) => scalar_type(*s).is_some(),
        Type::Array(a) => scalar_type(a.elem).is_some() && a.rank() <= MAX_RANK,
        Type::Aggregate(a) => a.fields.iter().all(|(_, t)| representable(t)),
        _ => true,
    }
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for c in text.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\{:03o}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

fn float_text(v: f64, suffix: &str) -> String {
    if v.is_nan() {
        return "NAN".to_string();
    }
    if v.is_infinite() {
        return if v > 0.0 { "INFINITY" } else { "(-INFINITY)" }.to_string();
    }
    let text = format!("{:?}{}", v, suffix);
    if v < 0.0 {
        format!("({})", text)
    } else {
        text
    }
}

/// Spelling rules of the C target
pub(crate) struct CSyntax;

impl Syntax for CSyntax {
    const MANUAL_FREE: bool = true;

    fn reserved(&self) -> &'static [&'static str] {
        RESERVED
    }

    fn fold_case(&self) -> bool {
        false
    }

    fn literal(&self, value: &Literal, ty: ScalarType) -> String {
        match value {
            Literal::Bool(b) => b.to_string(),
            Literal::Int(n) => match ty.kind {
                ScalarKind::Float | ScalarKind::Complex => self.literal(&Literal::Float(*n as f64), ty),
                ScalarKind::Bool => (*n != 0).to_string(),
                ScalarKind::Int if *n == i64::MIN => "INT64_MIN".to_string(),
                ScalarKind::Int if *n < 0 => format!("({})", n),
                ScalarKind::Int if *n > i64::from(i32::MAX) => format!("INT64_C({})", n),
                ScalarKind::Int => n.to_string(),
            },
            Literal::Float(v) => match (ty.kind, ty.bits) {
                (ScalarKind::Float, 32) => float_text(*v, "f"),
                (ScalarKind::Float, 128) => float_text(*v, "L"),
                (ScalarKind::Complex, _) => self.literal(&Literal::Complex(*v, 0.0), ty),
                _ => float_text(*v, ""),
            },
            Literal::Complex(re, im) => {
                let (make, suffix) = match ty.bits {
                    64 => ("CMPLXF", "f"),
                    256 => ("CMPLXL", "L"),
                    _ => ("CMPLX", ""),
                };
                format!("{}({}, {})", make, float_text(*re, suffix), float_text(*im, suffix))
            }
            Literal::Str(text) => escape(text),
        }
    }

    fn string(&self, text: &str) -> String {
        escape(text)
    }

    fn global(&self, module: &str, name: &str) -> String {
        format!("{}_{}", module, name)
    }

    fn param(&self, name: &str, ty: &Type) -> String {
        match ty {
            Type::Aggregate(_) => format!("(*{})", name),
            _ => name.to_string(),
        }
    }

    fn unary(&self, op: UnaryOp, operand: &str, elem: ScalarType) -> String {
        match op {
            UnaryOp::Neg => format!("(-{})", operand),
            UnaryOp::Pos => format!("(+{})", operand),
            UnaryOp::Not => format!("(!{})", operand),
            UnaryOp::Invert if elem.is_bool() => format!("(!{})", operand),
            UnaryOp::Invert => format!("(~{})", operand),
        }
    }

    fn binary(&self, op: BinOp, left: &str, right: &str, elem: ScalarType) -> String {
        let narrow = |call: String| {
            if elem == ScalarType::INT64 || elem == ScalarType::FLOAT64 {
                call
            } else {
                format!("(({}) {})", ctype(elem), call)
            }
        };
        match (op, elem.kind) {
            (BinOp::FloorDiv, ScalarKind::Int | ScalarKind::Bool) => {
                narrow(format!("nv_floordiv_i64({}, {})", left, right))
            }
            (BinOp::FloorDiv, _) => format!("floor({} / {})", left, right),
            (BinOp::Mod, ScalarKind::Int | ScalarKind::Bool) => narrow(format!("nv_mod_i64({}, {})", left, right)),
            (BinOp::Mod, _) => narrow(format!("nv_fmod({}, {})", left, right)),
            (BinOp::Pow, ScalarKind::Int | ScalarKind::Bool) => narrow(format!("nv_ipow_i64({}, {})", left, right)),
            (BinOp::Pow, _) => format!("pow({}, {})", left, right),
            (BinOp::MatMul, _) => format!("({} * {})", left, right),
            (op, _) => format!("({} {} {})", left, op.symbol(), right),
        }
    }

    fn compare(&self, op: CmpOp, left: &str, right: &str, _elem: ScalarType) -> String {
        format!("({} {} {})", left, op.symbol(), right)
    }

    fn logical(&self, op: BoolOp, left: &str, right: &str) -> String {
        match op {
            BoolOp::And => format!("({} && {})", left, right),
            BoolOp::Or => format!("({} || {})", left, right),
        }
    }

    fn cast(&self, value: &str, from: ScalarType, to: ScalarType) -> String {
        if from == to {
            value.to_string()
        } else if to.is_bool() {
            format!("({} != 0)", value)
        } else {
            format!("(({}) {})", ctype(to), value)
        }
    }

    fn math(&self, f: MathFn, arg: &str, arg_elem: ScalarType, result: ScalarType) -> String {
        match f {
            MathFn::Abs if arg_elem.is_complex() => {
                let name = match arg_elem.bits {
                    64 => "cabsf",
                    256 => "cabsl",
                    _ => "cabs",
                };
                format!("{}({})", name, arg)
            }
            MathFn::Abs if arg_elem.kind == ScalarKind::Float => format!("fabs({})", arg),
            MathFn::Abs => self.cast(&format!("llabs({})", arg), ScalarType::INT64, result),
            f => {
                let arg = self.cast(arg, arg_elem, result);
                format!("{}({})", f.name(), bare(&arg))
            }
        }
    }

    fn extreme(&self, r: Reduction, args: &[String], elem: ScalarType) -> String {
        let name = match (r, elem.kind) {
            (Reduction::Max, ScalarKind::Float) => "fmax",
            (Reduction::Min, ScalarKind::Float) => "fmin",
            (Reduction::Max, _) => "nv_max_i64",
            _ => "nv_min_i64",
        };
        let mut args = args.iter();
        let first = args.next().cloned().unwrap_or_default();
        let folded = args.fold(first, |acc, next| format!("{}({}, {})", name, acc, next));
        if elem.kind == ScalarKind::Float || elem == ScalarType::INT64 {
            folded
        } else {
            format!("(({}) {})", ctype(elem), folded)
        }
    }

    fn select(&self, test: &str, body: &str, orelse: &str) -> String {
        format!("({} ? {} : {})", test, body, orelse)
    }

    fn function_name(&self, symbol: &str) -> String {
        if RESERVED.contains(&symbol) {
            format!("{}_", symbol)
        } else {
            symbol.to_string()
        }
    }

    fn call(&self, function: &str, args: &[String]) -> String {
        let args: Vec<&str> = args.iter().map(|a| bare(a)).collect();
        format!("{}({})", function, args.join(", "))
    }

    fn call_arg(&self, arg: &str, ty: &Type) -> String {
        match ty {
            Type::Aggregate(_) => format!("&{}", arg),
            Type::Array(_) => format!("nv_view({})", arg),
            _ => arg.to_string(),
        }
    }

    fn field(&self, base: &str, field: &str) -> String {
        format!("{}.{}", base, field)
    }

    fn construct(&self, aggregate: &str, args: &[String]) -> String {
        let args: Vec<&str> = args.iter().map(|a| bare(a)).collect();
        format!("((struct {}){{{}}})", aggregate, args.join(", "))
    }

    fn element(&self, array: &str, ty: &ArrayType, indices: &[String]) -> String {
        let offset = if ty.rank() == 1 {
            bare(&indices[0]).to_string()
        } else {
            let terms: Vec<String> = indices
                .iter()
                .enumerate()
                .filter(|(_, i)| i.as_str() != "0")
                .map(|(axis, i)| format!("{} * {}.strides[{}]", i, array, axis))
                .collect();
            if terms.is_empty() {
                "0".to_string()
            } else {
                terms.join(" + ")
            }
        };
        format!("(({} *){}.data)[{}]", ctype(ty.elem), array, offset)
    }

    fn extent(&self, array: &str, _ty: &ArrayType, axis: usize) -> String {
        format!("{}.shape[{}]", array, axis)
    }

    fn size(&self, array: &str, _ty: &ArrayType) -> String {
        format!("nv_size({})", array)
    }

    fn guard(&self, extent: &str, index: &str) -> String {
        format!("({} == 1 ? 0 : {})", extent, index)
    }

    fn count(&self, start: &str, stop: &str, step: &str, elem: ScalarType) -> String {
        match elem.kind {
            ScalarKind::Float => format!("nv_arange_count_f64({}, {}, {})", start, stop, step),
            _ => format!("nv_arange_count_i64({}, {}, {})", start, stop, step),
        }
    }

    fn max_extent(&self, a: &str, b: &str) -> String {
        format!("nv_max_i64({}, {})", a, b)
    }

    fn reduction(&self, _r: Reduction, _array: &str, _ty: &ArrayType) -> Option<String> {
        None
    }

    fn matmul(&self, _left: (&str, &ArrayType), _right: (&str, &ArrayType), _result: &Type) -> Option<String> {
        None
    }

    fn fill(&self, _target: &str, _value: &str) -> Option<String> {
        None
    }

    fn assign(&self, target: &str, value: &str) -> String {
        format!("{} = {};", target, bare(value))
    }

    fn allocate(&self, w: &mut CodeWriter, target: &str, ty: &ArrayType, extents: &[String]) {
        let order = match ty.order {
            Order::C => 'C',
            Order::F => 'F',
        };
        let extents: Vec<&str> = extents.iter().map(|e| bare(e)).collect();
        w.line(format!(
            "nv_ensure(&{}, {}, (int64_t[]){{{}}}, sizeof({}), '{}');",
            target,
            ty.rank(),
            extents.join(", "),
            ctype(ty.elem),
            order
        ));
    }

    fn take(&self, target: &str, call: &str) -> String {
        format!("nv_assign(&{}, {});", target, call)
    }

    fn alias(&self, target: &str, source: &str) -> String {
        format!("{} = nv_view({});", target, source)
    }

    fn return_copy(&self, source: &str) -> String {
        format!("nv_copy({})", source)
    }

    fn move_result(&self, _source: &str) -> Option<String> {
        None
    }

    fn call_stmt(&self, call: &str) -> String {
        format!("{};", call)
    }

    fn free(&self, array: &str) -> String {
        format!("nv_free(&{});", array)
    }

    fn ret(&self, value: Option<&str>) -> String {
        match value {
            Some(value) => format!("return {};", bare(value)),
            None => "return;".to_string(),
        }
    }

    fn line_marker(&self, line: u32, file: &str) -> Option<String> {
        Some(format!("#line {} {}", line, escape(file)))
    }

    fn for_open(&self, var: &str, start: &str, stop: &str, step: i64) -> String {
        let (test, update) = match step {
            1 => ("<", format!("{}++", var)),
            -1 => (">", format!("{}--", var)),
            s if s > 0 => ("<", format!("{} += {}", var, s)),
            s => (">", format!("{} -= {}", var, -s)),
        };
        format!("for ({} = {}; {} {} {}; {}) {{", var, bare(start), var, test, stop, update)
    }

    fn index_loop_open(&self, var: &str, extent: &str) -> String {
        format!("for ({} = 0; {} < {}; {}++) {{", var, var, extent, var)
    }

    fn loop_close(&self) -> String {
        "}".to_string()
    }

    fn while_open(&self, test: &str) -> String {
        format!("while ({}) {{", bare(test))
    }

    fn if_open(&self, test: &str) -> String {
        format!("if ({}) {{", bare(test))
    }

    fn else_if(&self, test: &str) -> String {
        format!("}} else if ({}) {{", bare(test))
    }

    fn else_open(&self) -> String {
        "} else {".to_string()
    }

    fn if_close(&self) -> String {
        "}".to_string()
    }

    fn break_stmt(&self) -> String {
        "break;".to_string()
    }

    fn continue_stmt(&self) -> String {
        "continue;".to_string()
    }

    fn print(&self, args: &[(String, Option<ScalarType>)]) -> Vec<String> {
        let mut lines = Vec::with_capacity(args.len() * 2 + 1);
        for (i, (text, ty)) in args.iter().enumerate() {
            if i > 0 {
                lines.push("nv_print_sep();".to_string());
            }
            let text = bare(text);
            lines.push(match ty {
                None => format!("nv_print_str({});", text),
                Some(s) => match (s.kind, s.bits) {
                    (ScalarKind::Bool, _) => format!("nv_print_bool({});", text),
                    (ScalarKind::Int, _) => format!("nv_print_i64((int64_t) {});", text),
                    (ScalarKind::Float, 32) => format!("nv_print_f32({});", text),
                    (ScalarKind::Float, _) => format!("nv_print_f64((double) {});", text),
                    (ScalarKind::Complex, _) => format!("nv_print_c128((double complex) {});", text),
                },
            });
        }
        lines.push("nv_print_end();".to_string());
        lines
    }

    fn loop_directive(&self, directive: &Directive, private: &[String]) -> DirectiveLowering {
        let pragma = |head: &str| {
            let clauses = omp_clauses(directive, private);
            let line = format!("#pragma {} {}", head, clauses);
            DirectiveLowering::Wrap {
                open: vec![line.trim_end().to_string()],
                close: Vec::new(),
            }
        };
        match &directive.key {
            DirectiveKey::ParallelLoop => pragma("omp parallel for"),
            DirectiveKey::Simd => pragma("omp simd"),
            DirectiveKey::Distribute => DirectiveLowering::Distribute,
            DirectiveKey::Other(_) => DirectiveLowering::Wrap {
                open: vec![format!("#pragma {}", directive)],
                close: Vec::new(),
            },
        }
    }

    fn stmt_directive(&self, directive: &Directive) -> Option<String> {
        match directive.key {
            DirectiveKey::Other(_) => Some(format!("#pragma {}", directive)),
            _ => None,
        }
    }

    fn distribute_bounds(&self, _w: &mut CodeWriter, _start: &str, _stop: &str, _step: i64) -> Option<(String, String)> {
        None
    }

    fn allreduce(&self, _op: &str, _var: &str, _ty: &Type) -> Option<String> {
        None
    }
}

/// A function that rendered without errors
struct RenderedFunction {
    prototype: String,
    definition: String,
}

/// Generation state of one unit
struct CUnit<'a> {
    module: &'a TypedModule,
    config: &'a CompilerConfig,
    syntax: CSyntax,
    diagnostics: Diagnostics,
}

impl<'a> CUnit<'a> {
    fn new(module: &'a TypedModule, config: &'a CompilerConfig) -> Self {
        Self {
            module,
            config,
            syntax: CSyntax,
            diagnostics: Diagnostics::new(),
        }
    }

    fn report(&mut self, loc: Location, message: String) {
        self.diagnostics.push(Diagnostic::new(
            DiagnosticCode::UnsupportedConstruct,
            message,
            SourceLocation::new(&self.module.file, loc),
        ));
    }

    fn render(mut self) -> BackendOutput {
        let module = self.module;
        let unit = module.name.as_str();

        let mut functions = Vec::new();
        for function in &module.functions {
            if let Some(rendered) = self.function(function) {
                functions.push(rendered);
            }
        }
        let program = module.main.as_ref().and_then(|main| self.program(main));
        let header = self.header(&functions);

        let mut source = CodeWriter::new(INDENT);
        source.line(format!("#include \"{}.h\"", unit));
        for function in &functions {
            source.blank();
            source.append(&function.definition);
        }

        let mut files = vec![
            c_runtime::runtime_file(),
            GeneratedFile {
                path: PathBuf::from(format!("{}.h", unit)),
                role: FileRole::Header,
                contents: header,
            },
            GeneratedFile {
                path: PathBuf::from(format!("{}.c", unit)),
                role: FileRole::Source,
                contents: source.finish(),
            },
        ];
        if let Some(program) = program {
            files.push(GeneratedFile {
                path: PathBuf::from(format!("prog_{}.c", unit)),
                role: FileRole::Program,
                contents: program,
            });
        }

        let mut libraries = vec!["m".to_string()];
        let openmp = lower::all_directives(module)
            .iter()
            .any(|d| matches!(d.key, DirectiveKey::ParallelLoop | DirectiveKey::Simd));
        if openmp {
            libraries.push("openmp".to_string());
        }
        let manifest = Manifest {
            unit: unit.to_string(),
            language: Language::C,
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
        debug!(files = files.len(), errors = self.diagnostics.has_errors(), "rendered C unit");
        BackendOutput {
            language: Language::C,
            files,
            manifest,
            diagnostics: self.diagnostics,
        }
    }

    fn symbol(&self, function: &TypedFunction) -> String {
        self.syntax
            .function_name(&function_symbol(self.module, &function.emitted_name, &function.module))
    }

    fn header(&mut self, functions: &[RenderedFunction]) -> String {
        let module = self.module;
        let guard = format!("NV_{}_H", module.name.to_ascii_uppercase());
        let mut w = CodeWriter::new(INDENT);
        w.line(format!("#ifndef {}", guard));
        w.line(format!("#define {}", guard));
        w.blank();
        w.line(format!("#include \"{}\"", c_runtime::FILE_NAME));
        for import in &module.imports {
            w.line(format!("#include \"{}.h\"", import));
        }

        for aggregate in &module.aggregates {
            if let Some(definition) = self.struct_def(aggregate) {
                w.blank();
                w.append(&definition);
            }
        }

        let mut constants = Vec::new();
        for global in &module.globals {
            let Some(elem) = global.ty.as_scalar() else { continue };
            match scalar_type(elem) {
                Some(ty) => constants.push(format!(
                    "static const {} {} = {};",
                    ty,
                    self.syntax.global(&module.name, &global.name),
                    bare(&self.syntax.literal(&global.value, elem))
                )),
                None => self.report(global.loc, format!("constant '{}' has a 128-bit integer type, which C lacks", global.name)),
            }
        }
        if !constants.is_empty() {
            w.blank();
            w.lines(constants);
        }

        if !functions.is_empty() {
            w.blank();
            for function in functions {
                w.append(&function.prototype);
            }
        }
        w.blank();
        w.line(format!("#endif /* {} */", guard));
        w.finish()
    }

    fn struct_def(&mut self, aggregate: &AggregateType) -> Option<String> {
        if !representable(&Type::Aggregate(aggregate.clone())) {
            self.report(
                Location::default(),
                format!("class '{}' has a 128-bit integer field, which C lacks", aggregate.name),
            );
            return None;
        }
        let guard = format!("NV_STRUCT_{}", aggregate.name);
        let mut w = CodeWriter::new(INDENT);
        w.line(format!("#ifndef {}", guard));
        w.line(format!("#define {}", guard));
        w.line(format!("struct {} {{", aggregate.name));
        w.indent();
        for (name, ty) in &aggregate.fields {
            w.line(format!("{} {};", c_type(ty), name));
        }
        w.dedent();
        w.line("};");
        w.line("#endif");
        Some(w.finish())
    }

    /// First position whose type C cannot express
    fn unrepresentable(&self, params: &[TypedParam], ret: &Type, body: &TypedBody, loc: Location) -> Option<Location> {
        if params.iter().any(|p| !representable(&p.ty))
            || !representable(ret)
            || body.locals.iter().any(|l| !representable(&l.ty))
        {
            return Some(loc);
        }
        fn visit(expr: &TypedExpr) -> Option<Location> {
            if !representable(&expr.ty) {
                return Some(expr.loc);
            }
            expr.children().into_iter().find_map(visit)
        }
        let mut found = None;
        lower::walk_stmts(&body.stmts, &mut |stmt| {
            if found.is_none() {
                found = lower::stmt_exprs(stmt).into_iter().find_map(visit);
            }
        });
        found
    }

    fn emit_body(
        &mut self,
        ret: &Type,
        params: &[TypedParam],
        body: &TypedBody,
        falls_through: bool,
    ) -> Option<BodyParts> {
        let module = self.module;
        let taken = taken_names(&self.syntax, module, &body.stmts);
        let mut diagnostics = Diagnostics::new();
        let mut w = CodeWriter::new(INDENT);
        w.indent();
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
        let parts = emitter.finish(falls_through);
        self.diagnostics.merge(diagnostics);
        emitted.ok().map(|_| parts)
    }

    fn function(&mut self, function: &TypedFunction) -> Option<RenderedFunction> {
        if let Some(loc) = self.unrepresentable(&function.params, &function.ret, &function.body, function.loc) {
            self.report(
                loc,
                format!("function '{}' uses a 128-bit integer type, which C lacks", function.name),
            );
            return None;
        }
        let falls_through = !matches!(
            function.body.stmts.last().map(|s| &s.kind),
            Some(TypedStmtKind::Return(_))
        );
        let parts = self.emit_body(&function.ret, &function.params, &function.body, falls_through)?;

        let mut namer = parts.namer.clone();
        let params: Vec<String> = function
            .params
            .iter()
            .map(|p| {
                let name = namer.bind(p.symbol, &p.name);
                match &p.ty {
                    Type::Aggregate(a) => format!("struct {} *{}", a.name, name),
                    ty => format!("{} {}", c_type(ty), name),
                }
            })
            .collect();
        let params = if params.is_empty() {
            "void".to_string()
        } else {
            params.join(", ")
        };
        let signature = format!("{} {}({})", c_type(&function.ret), self.symbol(function), params);

        let mut pragmas = Vec::new();
        for directive in &function.directives {
            match &directive.key {
                DirectiveKey::Simd => {
                    let clauses = directive.clause_text();
                    pragmas.push(format!("#pragma omp declare simd {}", clauses).trim_end().to_string());
                }
                _ => pragmas.push(format!("#pragma {}", directive)),
            }
        }

        let mut prototype = CodeWriter::new(INDENT);
        prototype.lines(&pragmas);
        prototype.line(format!("{};", signature));

        let mut definition = CodeWriter::new(INDENT);
        definition.lines(&pragmas);
        definition.line(signature);
        definition.line("{");
        definition.indent();
        self.declarations(&mut definition, &function.body.locals, &parts, &function.ret);
        definition.dedent();
        definition.append(&parts.text);
        definition.line("}");
        Some(RenderedFunction {
            prototype: prototype.finish(),
            definition: definition.finish(),
        })
    }

    fn declarations(&self, w: &mut CodeWriter, locals: &[LocalVar], parts: &BodyParts, ret: &Type) {
        let mut any = false;
        for local in locals {
            let var = VarRef {
                name: local.name.clone(),
                symbol: local.symbol,
                ty: local.ty.clone(),
                scope: VarScope::Local,
            };
            w.line(declaration(&local.ty, &parts.namer.name(&var)));
            any = true;
        }
        for temp in &parts.temps {
            w.line(declaration(&temp.ty, &temp.name));
            any = true;
        }
        if parts.max_rank > 0 || parts.uses_dot_index {
            let mut indices: Vec<String> = (0..parts.max_rank).map(loop_index).collect();
            if parts.uses_dot_index {
                indices.push(DOT_INDEX.to_string());
            }
            w.line(format!("int64_t {};", indices.join(", ")));
            any = true;
        }
        if parts.uses_result {
            w.line(declaration(ret, RESULT));
            any = true;
        }
        if any {
            w.blank();
        }
    }

    fn program(&mut self, main: &TypedBody) -> Option<String> {
        let unit = self.module.name.clone();
        if let Some(loc) = self.unrepresentable(&[], &Type::Void, main, Location::default()) {
            self.report(loc, "the program uses a 128-bit integer type, which C lacks".to_string());
            return None;
        }
        let parts = self.emit_body(&Type::Void, &[], main, true)?;
        let mut w = CodeWriter::new(INDENT);
        w.line(format!("#include \"{}.h\"", unit));
        w.blank();
        w.line("int main(void)");
        w.line("{");
        w.indent();
        self.declarations(&mut w, &main.locals, &parts, &Type::Void);
        w.dedent();
        w.append(&parts.text);
        w.indent();
        w.line("return 0;");
        w.dedent();
        w.line("}");
        Some(w.finish())
    }
}

fn declaration(ty: &Type, name: &str) -> String {
    match ty {
        Type::Array(_) => format!("nv_ndarray {} = {{0}};", name),
        ty => format!("{} {};", c_type(ty), name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::compile_source;
    use pretty_assertions::assert_eq;

    fn generate(source: &str) -> BackendOutput {
        let config = CompilerConfig::default();
        let output = compile_source(source, "m.py", "m", &config).unwrap();
        let unit = output.unit("m").unwrap();
        assert!(unit.ir.is_some(), "analysis failed: {:?}", output.diagnostics);
        unit.output(Language::C).cloned().unwrap()
    }

    fn source_of(output: &BackendOutput) -> &str {
        &output.file("m.c").unwrap().contents
    }

    #[test]
    fn test_scalar_function() {
        let output = generate("def add(a: float, b: float) -> float:\n    return a + b\n");
        assert!(!output.has_errors());
        let source = source_of(&output);
        assert!(source.contains("double add(double a, double b)\n{\n    return a + b;\n}\n"), "{}", source);
        let header = &output.file("m.h").unwrap().contents;
        assert!(header.contains("double add(double a, double b);"));
        assert!(header.contains("#include \"ndarray.h\""));
        assert_eq!(output.manifest.entry_symbols, vec!["add"]);
        assert_eq!(output.manifest.libraries, vec!["m"]);
    }

    #[test]
    fn test_elementwise_loop_and_free() {
        let output = generate(
            "def scale(a: float, x: 'float64[:]') -> float:\n    z = a * x + 1.0\n    return z[0]\n",
        );
        let source = source_of(&output);
        assert!(source.contains("nv_ndarray z = {0};"));
        assert!(source.contains("nv_ensure(&z, 1, (int64_t[]){x.shape[0]}, sizeof(double), 'C');"), "{}", source);
        assert!(source.contains("for (nv_i0 = 0; nv_i0 < x.shape[0]; nv_i0++) {"));
        assert!(
            source.contains("((double *)z.data)[nv_i0] = (a * ((double *)x.data)[nv_i0]) + 1.0;"),
            "{}",
            source
        );
        assert!(source.contains("nv_result = ((double *)z.data)[0];\n    nv_free(&z);\n    return nv_result;"));
    }

    #[test]
    fn test_broadcast_of_unknown_extents_is_guarded() {
        let output = generate(
            "def add(x: 'float64[:]', y: 'float64[:]') -> float:\n    z = x + y\n    return z[0]\n",
        );
        let source = source_of(&output);
        assert!(source.contains("nv_max_i64(x.shape[0], y.shape[0])"), "{}", source);
        assert!(source.contains("((double *)x.data)[x.shape[0] == 1 ? 0 : nv_i0]"), "{}", source);
    }

    #[test]
    fn test_python_integer_semantics() {
        let output = generate("def f(a: int, b: int) -> int:\n    return a // b + a % b + a ** 2\n");
        let source = source_of(&output);
        assert!(source.contains("nv_floordiv_i64(a, b)"));
        assert!(source.contains("nv_mod_i64(a, b)"));
        assert!(source.contains("nv_ipow_i64(a, 2)"));
    }

    #[test]
    fn test_parallel_loop_pragma_and_openmp_library() {
        let output = generate(
            "def total(x: 'float64[:]') -> float:\n    s = 0.0\n    #$ parallel-loop reduction(+:s)\n    for i in range(len(x)):\n        s += x[i]\n    return s\n",
        );
        let source = source_of(&output);
        assert!(source.contains("#pragma omp parallel for reduction(+:s)"), "{}", source);
        assert!(output.manifest.libraries.contains(&"openmp".to_string()));
    }

    #[test]
    fn test_distribute_is_dropped_with_warning() {
        let output = generate(
            "def f(n: int) -> int:\n    s = 0\n    #$ distribute reduction(+:s)\n    for i in range(n):\n        s += i\n    return s\n",
        );
        assert!(!output.has_errors());
        assert!(output
            .diagnostics
            .iter()
            .any(|d| d.code == DiagnosticCode::UnsupportedDirective));
    }

    #[test]
    fn test_int128_is_isolated_to_its_function() {
        let output = generate(
            "def wide(a: int128) -> int128:\n    return a\n\ndef narrow(a: int) -> int:\n    return a\n",
        );
        assert!(output.has_errors());
        let source = source_of(&output);
        assert!(source.contains("int64_t narrow(int64_t a)"));
        assert!(!source.contains("wide"));
        assert!(output
            .diagnostics
            .iter()
            .any(|d| d.code == DiagnosticCode::UnsupportedConstruct && d.message.contains("wide")));
    }

    #[test]
    fn test_program_file_and_print() {
        let output = generate("x = 3\nprint('x is', x, 1.5)\n");
        let program = &output.file("prog_m.c").unwrap().contents;
        assert!(program.contains("int main(void)"));
        assert!(program.contains("nv_print_str(\"x is\");"));
        assert!(program.contains("nv_print_i64((int64_t) m_x);"));
        assert!(output.file("m.h").unwrap().contents.contains("static const int64_t m_x = 3;"));
        assert!(program.contains("nv_print_f64((double) 1.5);"));
        assert!(program.contains("nv_print_end();"));
        assert_eq!(output.manifest.files.last().map(|f| f.role), Some(FileRole::Program));
    }

    #[test]
    fn test_returning_a_parameter_copies_it() {
        let output = generate("def ident(a: 'float64[:]') -> 'float64[:]':\n    return a\n");
        assert!(source_of(&output).contains("return nv_copy(a);"));
    }

    #[test]
    fn test_literal_spelling() {
        let c = CSyntax;
        assert_eq!(c.literal(&Literal::Float(1e16), ScalarType::FLOAT64), "1e16");
        assert_eq!(c.literal(&Literal::Float(0.5), ScalarType::FLOAT32), "0.5f");
        assert_eq!(c.literal(&Literal::Int(-3), ScalarType::INT64), "(-3)");
        assert_eq!(c.literal(&Literal::Int(2), ScalarType::FLOAT64), "2.0");
        assert_eq!(c.literal(&Literal::Complex(1.0, 2.0), ScalarType::COMPLEX128), "CMPLX(1.0, 2.0)");
        assert_eq!(c.string("a\"b\n"), "\"a\\\"b\\n\"");
    }
}
