//! Recursive-descent parser for the Python subset
//!
//! Produces the raw [`ast::Module`](crate::ast::Module) tree. Anything the
//! grammar accepts but the analyzer does not (slices, strings, tuples in odd
//! places) is still parsed, so the analyzer can report it with a diagnostic.

use std::sync::Arc;

use crate::ast::{
    Annotation, BinOp, BoolOp, ClassDef, CmpOp, Decorator, Expr, ExprKind, FunctionDef, IfBranch,
    ImportName, Keyword, Location, Module, Param, RawDirective, Stmt, StmtKind, UnaryOp,
};
use crate::error::{CompileError, CompileResult};
use crate::lexer::{Lexer, SpannedToken, Token};

/// Deepest nesting of expressions and blocks the parser follows
const MAX_NESTING: usize = 64;

/// Parser over a pre-lexed token stream
pub struct Parser {
    tokens: Vec<SpannedToken>,
    pos: usize,
    file: String,
    depth: usize,
}

impl Parser {
    pub fn new(source: &str, file: &str) -> CompileResult<Self> {
        let tokens = Lexer::new(source, file).tokenize()?;
        Ok(Self {
            tokens,
            pos: 0,
            file: file.to_string(),
            depth: 0,
        })
    }

    fn current(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|t| &t.token)
    }

    fn peek(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset).map(|t| &t.token)
    }

    fn loc(&self) -> Location {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|t| t.loc)
            .unwrap_or_default()
    }

    /// Advance to the next token
    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|t| t.token.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    /// Check if current token matches expected
    fn check(&self, expected: &Token) -> bool {
        match self.current() {
            Some(tok) => std::mem::discriminant(tok) == std::mem::discriminant(expected),
            None => false,
        }
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.check(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn error<T>(&self, msg: impl Into<String>) -> CompileResult<T> {
        Err(CompileError::parse_error(&self.file, self.loc(), msg))
    }

    /// Run one recursive production, failing once nesting gets too deep
    fn nested<T>(&mut self, parse: impl FnOnce(&mut Self) -> CompileResult<T>) -> CompileResult<T> {
        if self.depth >= MAX_NESTING {
            return self.error(format!("nesting deeper than {} levels", MAX_NESTING));
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn describe_current(&self) -> String {
        match self.current() {
            Some(tok) => format!("'{}'", tok),
            None => "end of input".to_string(),
        }
    }

    /// Consume token if it matches, otherwise error
    fn expect(&mut self, expected: Token) -> CompileResult<()> {
        if self.eat(&expected) {
            Ok(())
        } else {
            self.error(format!(
                "expected '{}', found {}",
                expected,
                self.describe_current()
            ))
        }
    }

    fn expect_ident(&mut self) -> CompileResult<String> {
        match self.current() {
            Some(Token::Ident(name)) => {
                let name = name.clone();
                self.pos += 1;
                Ok(name)
            }
            _ => self.error(format!(
                "expected identifier, found {}",
                self.describe_current()
            )),
        }
    }

    fn expect_newline(&mut self) -> CompileResult<()> {
        if self.current().is_none() || self.eat(&Token::Newline) {
            Ok(())
        } else {
            self.error(format!(
                "expected end of line, found {}",
                self.describe_current()
            ))
        }
    }

    /// Parse a complete source file
    pub fn parse_module(&mut self, name: &str) -> CompileResult<Module> {
        let mut body = Vec::new();
        while self.current().is_some() {
            if self.check(&Token::Indent) {
                return self.error("unexpected indent");
            }
            body.extend(self.parse_statement()?);
        }
        Ok(Module {
            name: name.to_string(),
            file: self.file.clone(),
            body,
        })
    }

    /// Parse one statement line, possibly several simple statements joined by `;`
    fn parse_statement(&mut self) -> CompileResult<Vec<Stmt>> {
        let mut directives = Vec::new();
        while let Some(Token::Directive(text)) = self.current() {
            directives.push(RawDirective {
                text: text.clone(),
                loc: self.loc(),
            });
            self.pos += 1;
        }
        if directives.is_empty() {
            return self.parse_statement_inner();
        }
        if matches!(self.current(), None | Some(Token::Dedent)) {
            return self.error("directive comment is not followed by a statement");
        }
        let mut stmts = self.parse_statement_inner()?;
        if let Some(first) = stmts.first_mut() {
            first.directives = directives;
        }
        Ok(stmts)
    }

    fn parse_statement_inner(&mut self) -> CompileResult<Vec<Stmt>> {
        match self.current() {
            Some(Token::At) | Some(Token::Def) | Some(Token::Class) => {
                Ok(vec![self.parse_decorated()?])
            }
            Some(Token::If) => Ok(vec![self.parse_if()?]),
            Some(Token::For) => Ok(vec![self.parse_for()?]),
            Some(Token::While) => Ok(vec![self.parse_while()?]),
            _ => self.parse_simple_line(),
        }
    }

    fn parse_simple_line(&mut self) -> CompileResult<Vec<Stmt>> {
        let mut stmts = vec![self.parse_simple()?];
        while self.eat(&Token::Semicolon) {
            if matches!(self.current(), None | Some(Token::Newline)) {
                break;
            }
            stmts.push(self.parse_simple()?);
        }
        self.expect_newline()?;
        Ok(stmts)
    }

    fn parse_simple(&mut self) -> CompileResult<Stmt> {
        let loc = self.loc();
        let kind = match self.current() {
            Some(Token::Pass) => {
                self.advance();
                StmtKind::Pass
            }
            Some(Token::Break) => {
                self.advance();
                StmtKind::Break
            }
            Some(Token::Continue) => {
                self.advance();
                StmtKind::Continue
            }
            Some(Token::Return) => {
                self.advance();
                if matches!(
                    self.current(),
                    None | Some(Token::Newline) | Some(Token::Semicolon)
                ) {
                    StmtKind::Return(None)
                } else {
                    StmtKind::Return(Some(self.parse_expr_list()?))
                }
            }
            Some(Token::Global) => {
                self.advance();
                let mut names = vec![self.expect_ident()?];
                while self.eat(&Token::Comma) {
                    names.push(self.expect_ident()?);
                }
                StmtKind::Global(names)
            }
            Some(Token::Import) => return self.parse_import(),
            Some(Token::From) => return self.parse_from_import(),
            _ => return self.parse_expr_statement(),
        };
        Ok(Stmt::new(kind, loc))
    }

    fn parse_dotted(&mut self) -> CompileResult<String> {
        let mut name = self.expect_ident()?;
        while self.eat(&Token::Dot) {
            name.push('.');
            name.push_str(&self.expect_ident()?);
        }
        Ok(name)
    }

    fn parse_import(&mut self) -> CompileResult<Stmt> {
        let loc = self.loc();
        self.expect(Token::Import)?;
        let module = self.parse_dotted()?;
        let alias = if self.eat(&Token::As) {
            Some(self.expect_ident()?)
        } else {
            None
        };
        if self.check(&Token::Comma) {
            return self.error("import one module per statement");
        }
        Ok(Stmt::new(StmtKind::Import { module, alias }, loc))
    }

    fn parse_from_import(&mut self) -> CompileResult<Stmt> {
        let loc = self.loc();
        self.expect(Token::From)?;
        let module = self.parse_dotted()?;
        self.expect(Token::Import)?;
        let parenthesized = self.eat(&Token::LParen);
        let mut names = Vec::new();
        loop {
            let name_loc = self.loc();
            let name = self.expect_ident()?;
            let alias = if self.eat(&Token::As) {
                Some(self.expect_ident()?)
            } else {
                None
            };
            names.push(ImportName {
                name,
                alias,
                loc: name_loc,
            });
            if !self.eat(&Token::Comma) {
                break;
            }
            if parenthesized && self.check(&Token::RParen) {
                break;
            }
        }
        if parenthesized {
            self.expect(Token::RParen)?;
        }
        Ok(Stmt::new(StmtKind::FromImport { module, names }, loc))
    }

    fn parse_expr_statement(&mut self) -> CompileResult<Stmt> {
        let loc = self.loc();
        let first = self.parse_expr_list()?;

        if self.eat(&Token::Colon) {
            let annotation = self.parse_annotation(&[Token::Equals])?;
            let value = if self.eat(&Token::Equals) {
                Some(self.parse_expr_list()?)
            } else {
                None
            };
            return Ok(Stmt::new(
                StmtKind::AnnAssign {
                    target: first,
                    annotation,
                    value,
                },
                loc,
            ));
        }

        if let Some(op) = self.current().and_then(augmented_op) {
            self.advance();
            let value = self.parse_expr_list()?;
            return Ok(Stmt::new(
                StmtKind::AugAssign {
                    target: first,
                    op,
                    value,
                },
                loc,
            ));
        }

        if self.check(&Token::Equals) {
            let mut exprs = vec![first];
            while self.eat(&Token::Equals) {
                exprs.push(self.parse_expr_list()?);
            }
            let value = exprs.pop().unwrap_or_else(|| Expr::new(ExprKind::NoneLit, loc));
            return Ok(Stmt::new(
                StmtKind::Assign {
                    targets: exprs,
                    value,
                },
                loc,
            ));
        }

        Ok(Stmt::new(StmtKind::Expr(first), loc))
    }

    /// Capture annotation text up to a top-level stop token.
    ///
    /// Annotations are kept as text; `'float64[:]'` string annotations are unwrapped.
    fn parse_annotation(&mut self, stops: &[Token]) -> CompileResult<Annotation> {
        let loc = self.loc();
        if let Some(Token::Str(text)) = self.current() {
            let text = text.trim().to_string();
            self.advance();
            return Ok(Annotation { text, loc });
        }
        let mut text = String::new();
        let mut depth = 0usize;
        loop {
            let token = match self.current() {
                None | Some(Token::Newline) | Some(Token::Semicolon) => break,
                Some(token) => token.clone(),
            };
            if depth == 0
                && (stops.iter().any(|s| std::mem::discriminant(s) == std::mem::discriminant(&token))
                    || matches!(token, Token::RParen | Token::Comma))
            {
                break;
            }
            match token {
                Token::LParen | Token::LBracket => depth += 1,
                Token::RParen | Token::RBracket => depth = depth.saturating_sub(1),
                _ => {}
            }
            text.push_str(&token.to_string());
            self.advance();
        }
        if text.is_empty() {
            return self.error("expected a type annotation");
        }
        Ok(Annotation { text, loc })
    }

    fn parse_block(&mut self) -> CompileResult<Vec<Stmt>> {
        self.nested(Self::parse_suite)
    }

    fn parse_suite(&mut self) -> CompileResult<Vec<Stmt>> {
        self.expect(Token::Colon)?;
        if !self.eat(&Token::Newline) {
            return self.parse_simple_line();
        }
        if !self.eat(&Token::Indent) {
            return self.error("expected an indented block");
        }
        let mut body = Vec::new();
        while !self.check(&Token::Dedent) {
            if self.current().is_none() {
                return self.error("unexpected end of input inside block");
            }
            body.extend(self.parse_statement()?);
        }
        self.expect(Token::Dedent)?;
        Ok(body)
    }

    fn parse_decorated(&mut self) -> CompileResult<Stmt> {
        let loc = self.loc();
        let mut decorators = Vec::new();
        while self.check(&Token::At) {
            let dec_loc = self.loc();
            self.advance();
            let name = self.parse_dotted()?;
            let (args, keywords) = if self.check(&Token::LParen) {
                self.parse_call_args()?
            } else {
                (Vec::new(), Vec::new())
            };
            self.expect_newline()?;
            decorators.push(Decorator {
                name,
                args,
                keywords,
                loc: dec_loc,
            });
        }
        match self.current() {
            Some(Token::Def) => self.parse_def(decorators, loc),
            Some(Token::Class) => self.parse_class(decorators, loc),
            _ => self.error(format!(
                "expected 'def' or 'class' after decorators, found {}",
                self.describe_current()
            )),
        }
    }

    fn parse_def(&mut self, decorators: Vec<Decorator>, loc: Location) -> CompileResult<Stmt> {
        self.expect(Token::Def)?;
        let def_loc = self.loc();
        let name = self.expect_ident()?;
        self.expect(Token::LParen)?;
        let mut params = Vec::new();
        while !self.check(&Token::RParen) {
            let param_loc = self.loc();
            let param_name = self.expect_ident()?;
            let annotation = if self.eat(&Token::Colon) {
                Some(self.parse_annotation(&[Token::Equals])?)
            } else {
                None
            };
            let default = if self.eat(&Token::Equals) {
                Some(self.parse_expr()?)
            } else {
                None
            };
            params.push(Param {
                name: param_name,
                annotation,
                default,
                loc: param_loc,
            });
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(Token::RParen)?;
        let returns = if self.eat(&Token::Arrow) {
            Some(self.parse_annotation(&[Token::Colon])?)
        } else {
            None
        };
        let body = self.parse_block()?;
        let def = FunctionDef {
            name,
            params,
            returns,
            body,
            decorators,
            loc: def_loc,
        };
        Ok(Stmt::new(StmtKind::FunctionDef(Arc::new(def)), loc))
    }

    fn parse_class(&mut self, decorators: Vec<Decorator>, loc: Location) -> CompileResult<Stmt> {
        self.expect(Token::Class)?;
        let class_loc = self.loc();
        let name = self.expect_ident()?;
        if self.eat(&Token::LParen) {
            // base classes carry no meaning in the subset
            while !self.check(&Token::RParen) && self.current().is_some() {
                self.advance();
            }
            self.expect(Token::RParen)?;
        }
        let body = self.parse_block()?;
        Ok(Stmt::new(
            StmtKind::ClassDef(ClassDef {
                name,
                body,
                decorators,
                loc: class_loc,
            }),
            loc,
        ))
    }

    fn parse_if(&mut self) -> CompileResult<Stmt> {
        let loc = self.loc();
        self.expect(Token::If)?;
        let mut branches = Vec::new();
        let test = self.parse_expr()?;
        let body = self.parse_block()?;
        branches.push(IfBranch { test, body });
        let mut orelse = Vec::new();
        loop {
            if self.eat(&Token::Elif) {
                let test = self.parse_expr()?;
                let body = self.parse_block()?;
                branches.push(IfBranch { test, body });
            } else if self.eat(&Token::Else) {
                orelse = self.parse_block()?;
                break;
            } else {
                break;
            }
        }
        Ok(Stmt::new(StmtKind::If { branches, orelse }, loc))
    }

    fn parse_for(&mut self) -> CompileResult<Stmt> {
        let loc = self.loc();
        self.expect(Token::For)?;
        let target = self.parse_expr_list()?;
        self.expect(Token::In)?;
        let iter = self.parse_expr()?;
        let body = self.parse_block()?;
        Ok(Stmt::new(StmtKind::For { target, iter, body }, loc))
    }

    fn parse_while(&mut self) -> CompileResult<Stmt> {
        let loc = self.loc();
        self.expect(Token::While)?;
        let test = self.parse_expr()?;
        let body = self.parse_block()?;
        Ok(Stmt::new(StmtKind::While { test, body }, loc))
    }

    /// Parse `a` or a bare tuple `a, b`
    fn parse_expr_list(&mut self) -> CompileResult<Expr> {
        let loc = self.loc();
        let first = self.parse_expr()?;
        if !self.check(&Token::Comma) {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat(&Token::Comma) {
            if !self.starts_expr() {
                break;
            }
            items.push(self.parse_expr()?);
        }
        Ok(Expr::new(ExprKind::Tuple(items), loc))
    }

    fn starts_expr(&self) -> bool {
        matches!(
            self.current(),
            Some(
                Token::Int(_)
                    | Token::Float(_)
                    | Token::Imag(_)
                    | Token::Str(_)
                    | Token::Ident(_)
                    | Token::True
                    | Token::False
                    | Token::None
                    | Token::LParen
                    | Token::LBracket
                    | Token::Minus
                    | Token::Plus
                    | Token::Tilde
                    | Token::Not
            )
        )
    }

    /// Parse an expression (handles operator precedence)
    pub fn parse_expr(&mut self) -> CompileResult<Expr> {
        self.nested(Self::parse_conditional)
    }

    fn parse_conditional(&mut self) -> CompileResult<Expr> {
        let loc = self.loc();
        let body = self.parse_or()?;
        if self.eat(&Token::If) {
            let test = self.parse_or()?;
            self.expect(Token::Else)?;
            let orelse = self.parse_expr()?;
            return Ok(Expr::new(
                ExprKind::IfExp {
                    test: Box::new(test),
                    body: Box::new(body),
                    orelse: Box::new(orelse),
                },
                loc,
            ));
        }
        Ok(body)
    }

    fn parse_or(&mut self) -> CompileResult<Expr> {
        let mut left = self.parse_and()?;
        while self.check(&Token::Or) {
            let loc = self.loc();
            self.advance();
            let right = self.parse_and()?;
            left = bool_op(BoolOp::Or, left, right, loc);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> CompileResult<Expr> {
        let mut left = self.parse_not()?;
        while self.check(&Token::And) {
            let loc = self.loc();
            self.advance();
            let right = self.parse_not()?;
            left = bool_op(BoolOp::And, left, right, loc);
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> CompileResult<Expr> {
        if self.check(&Token::Not) {
            let loc = self.loc();
            self.advance();
            let operand = self.nested(Self::parse_not)?;
            return Ok(Expr::new(
                ExprKind::Unary {
                    op: UnaryOp::Not,
                    operand: Box::new(operand),
                },
                loc,
            ));
        }
        self.parse_comparison()
    }

    /// `a < b < c` becomes `a < b and b < c`
    fn parse_comparison(&mut self) -> CompileResult<Expr> {
        let first = self.parse_bitor()?;
        let mut result: Option<Expr> = None;
        let mut left = first.clone();
        while let Some(op) = self.current().and_then(compare_op) {
            let loc = self.loc();
            self.advance();
            let right = self.parse_bitor()?;
            let cmp = Expr::new(
                ExprKind::Compare {
                    op,
                    left: Box::new(left),
                    right: Box::new(right.clone()),
                },
                loc,
            );
            result = Some(match result {
                Some(prev) => bool_op(BoolOp::And, prev, cmp, loc),
                None => cmp,
            });
            left = right;
        }
        Ok(result.unwrap_or(first))
    }

    fn parse_bitor(&mut self) -> CompileResult<Expr> {
        self.parse_binary_level(0)
    }

    /// Left-associative binary levels from loosest to tightest
    fn parse_binary_level(&mut self, level: usize) -> CompileResult<Expr> {
        if level == BINARY_LEVELS {
            return self.parse_unary();
        }
        let mut left = self.parse_binary_level(level + 1)?;
        while let Some(op) = self.current().and_then(|t| binary_op(level, t)) {
            let loc = self.loc();
            self.advance();
            let right = self.parse_binary_level(level + 1)?;
            left = Expr::new(
                ExprKind::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                loc,
            );
        }
        Ok(left)
    }

    /// Parse unary expressions: -a, +a, ~a
    fn parse_unary(&mut self) -> CompileResult<Expr> {
        let op = match self.current() {
            Some(Token::Minus) => UnaryOp::Neg,
            Some(Token::Plus) => UnaryOp::Pos,
            Some(Token::Tilde) => UnaryOp::Invert,
            _ => return self.parse_power(),
        };
        let loc = self.loc();
        self.advance();
        let operand = self.nested(Self::parse_unary)?;
        Ok(Expr::new(
            ExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
            loc,
        ))
    }

    /// `a ** b` binds tighter than unary minus on its left, and is right-associative
    fn parse_power(&mut self) -> CompileResult<Expr> {
        let base = self.parse_postfix()?;
        if self.check(&Token::DoubleStar) {
            let loc = self.loc();
            self.advance();
            let exponent = self.parse_unary()?;
            return Ok(Expr::new(
                ExprKind::Binary {
                    op: BinOp::Pow,
                    left: Box::new(base),
                    right: Box::new(exponent),
                },
                loc,
            ));
        }
        Ok(base)
    }

    /// Parse postfix expressions: a.T, f(x), a[i, j]
    fn parse_postfix(&mut self) -> CompileResult<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.check(&Token::Dot) {
                self.advance();
                let attr = self.expect_ident()?;
                let loc = expr.loc;
                expr = Expr::new(
                    ExprKind::Attribute {
                        value: Box::new(expr),
                        attr,
                    },
                    loc,
                );
            } else if self.check(&Token::LParen) {
                let loc = expr.loc;
                let (args, keywords) = self.parse_call_args()?;
                expr = Expr::new(
                    ExprKind::Call {
                        func: Box::new(expr),
                        args,
                        keywords,
                    },
                    loc,
                );
            } else if self.check(&Token::LBracket) {
                let loc = expr.loc;
                self.advance();
                let mut indices = Vec::new();
                while !self.check(&Token::RBracket) {
                    indices.push(self.parse_index()?);
                    if !self.eat(&Token::Comma) {
                        break;
                    }
                }
                self.expect(Token::RBracket)?;
                expr = Expr::new(
                    ExprKind::Subscript {
                        value: Box::new(expr),
                        indices,
                    },
                    loc,
                );
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn parse_index(&mut self) -> CompileResult<Expr> {
        let loc = self.loc();
        let lower = if self.check(&Token::Colon) {
            None
        } else {
            let expr = self.parse_expr()?;
            if !self.check(&Token::Colon) {
                return Ok(expr);
            }
            Some(Box::new(expr))
        };
        self.expect(Token::Colon)?;
        let bound = |p: &mut Self| -> CompileResult<Option<Box<Expr>>> {
            if matches!(
                p.current(),
                Some(Token::Colon) | Some(Token::Comma) | Some(Token::RBracket)
            ) {
                Ok(None)
            } else {
                Ok(Some(Box::new(p.parse_expr()?)))
            }
        };
        let upper = bound(self)?;
        let step = if self.eat(&Token::Colon) {
            bound(self)?
        } else {
            None
        };
        Ok(Expr::new(ExprKind::Slice { lower, upper, step }, loc))
    }

    fn parse_call_args(&mut self) -> CompileResult<(Vec<Expr>, Vec<Keyword>)> {
        self.expect(Token::LParen)?;
        let mut args = Vec::new();
        let mut keywords: Vec<Keyword> = Vec::new();
        while !self.check(&Token::RParen) {
            let is_keyword = matches!(self.current(), Some(Token::Ident(_)))
                && matches!(self.peek(1), Some(Token::Equals));
            if is_keyword {
                let loc = self.loc();
                let name = self.expect_ident()?;
                self.expect(Token::Equals)?;
                let value = self.parse_expr()?;
                keywords.push(Keyword { name, value, loc });
            } else {
                if !keywords.is_empty() {
                    return self.error("positional argument follows keyword argument");
                }
                args.push(self.parse_expr()?);
            }
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(Token::RParen)?;
        Ok((args, keywords))
    }

    /// Parse primary expressions: literals, names, parentheses, lists
    fn parse_primary(&mut self) -> CompileResult<Expr> {
        let loc = self.loc();
        let token = match self.advance() {
            Some(token) => token,
            None => return self.error("unexpected end of input in expression"),
        };
        let kind = match token {
            Token::Int(n) => ExprKind::Int(n),
            Token::Float(x) => ExprKind::Float(x),
            Token::Imag(x) => ExprKind::Imag(x),
            Token::True => ExprKind::Bool(true),
            Token::False => ExprKind::Bool(false),
            Token::None => ExprKind::NoneLit,
            Token::Ident(name) => ExprKind::Name(name),
            Token::Str(mut text) => {
                // adjacent literals concatenate
                while let Some(Token::Str(next)) = self.current() {
                    text.push_str(next);
                    self.pos += 1;
                }
                ExprKind::Str(text)
            }
            Token::LParen => {
                if self.eat(&Token::RParen) {
                    ExprKind::Tuple(Vec::new())
                } else {
                    let inner = self.parse_expr()?;
                    if self.check(&Token::Comma) {
                        let mut items = vec![inner];
                        while self.eat(&Token::Comma) {
                            if self.check(&Token::RParen) {
                                break;
                            }
                            items.push(self.parse_expr()?);
                        }
                        self.expect(Token::RParen)?;
                        ExprKind::Tuple(items)
                    } else {
                        self.expect(Token::RParen)?;
                        return Ok(inner);
                    }
                }
            }
            Token::LBracket => {
                let mut items = Vec::new();
                while !self.check(&Token::RBracket) {
                    items.push(self.parse_expr()?);
                    if !self.eat(&Token::Comma) {
                        break;
                    }
                }
                self.expect(Token::RBracket)?;
                ExprKind::List(items)
            }
            other => {
                self.pos -= 1;
                return self.error(format!("unexpected token '{}' in expression", other));
            }
        };
        Ok(Expr::new(kind, loc))
    }
}

fn bool_op(op: BoolOp, left: Expr, right: Expr, loc: Location) -> Expr {
    Expr::new(
        ExprKind::BoolOp {
            op,
            left: Box::new(left),
            right: Box::new(right),
        },
        loc,
    )
}

const BINARY_LEVELS: usize = 6;

fn binary_op(level: usize, token: &Token) -> Option<BinOp> {
    Some(match (level, token) {
        (0, Token::Pipe) => BinOp::BitOr,
        (1, Token::Caret) => BinOp::BitXor,
        (2, Token::Amp) => BinOp::BitAnd,
        (3, Token::LShift) => BinOp::LShift,
        (3, Token::RShift) => BinOp::RShift,
        (4, Token::Plus) => BinOp::Add,
        (4, Token::Minus) => BinOp::Sub,
        (5, Token::Star) => BinOp::Mul,
        (5, Token::Slash) => BinOp::Div,
        (5, Token::DoubleSlash) => BinOp::FloorDiv,
        (5, Token::Percent) => BinOp::Mod,
        (5, Token::At) => BinOp::MatMul,
        _ => return None,
    })
}

fn compare_op(token: &Token) -> Option<CmpOp> {
    Some(match token {
        Token::EqEq => CmpOp::Eq,
        Token::NotEq => CmpOp::NotEq,
        Token::Lt => CmpOp::Lt,
        Token::LtE => CmpOp::LtE,
        Token::Gt => CmpOp::Gt,
        Token::GtE => CmpOp::GtE,
        _ => return None,
    })
}

fn augmented_op(token: &Token) -> Option<BinOp> {
    Some(match token {
        Token::PlusEq => BinOp::Add,
        Token::MinusEq => BinOp::Sub,
        Token::StarEq => BinOp::Mul,
        Token::SlashEq => BinOp::Div,
        Token::DoubleSlashEq => BinOp::FloorDiv,
        Token::PercentEq => BinOp::Mod,
        Token::DoubleStarEq => BinOp::Pow,
        Token::AtEq => BinOp::MatMul,
        _ => return None,
    })
}

/// Parse a source file into a module named `name`
pub fn parse_source(source: &str, file: &str, name: &str) -> CompileResult<Module> {
    Parser::new(source, file)?.parse_module(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> Module {
        parse_source(source, "test.py", "test").unwrap()
    }

    fn parse_expr(source: &str) -> Expr {
        Parser::new(source, "test.py").unwrap().parse_expr().unwrap()
    }

    #[test]
    fn test_simple_assignment() {
        let module = parse("c = a @ b\n");
        assert_eq!(module.body.len(), 1);
        match &module.body[0].kind {
            StmtKind::Assign { targets, value } => {
                assert_eq!(targets[0].as_name(), Some("c"));
                assert!(matches!(
                    value.kind,
                    ExprKind::Binary {
                        op: BinOp::MatMul,
                        ..
                    }
                ));
            }
            other => panic!("expected assignment, got {:?}", other),
        }
    }

    #[test]
    fn test_operator_precedence() {
        let expr = parse_expr("a + b * c");
        match expr.kind {
            ExprKind::Binary { op, right, .. } => {
                assert_eq!(op, BinOp::Add);
                assert!(matches!(right.kind, ExprKind::Binary { op: BinOp::Mul, .. }));
            }
            other => panic!("expected binary, got {:?}", other),
        }
    }

    #[test]
    fn test_power_binds_tighter_than_negation() {
        let expr = parse_expr("-x ** 2");
        match expr.kind {
            ExprKind::Unary { op, operand } => {
                assert_eq!(op, UnaryOp::Neg);
                assert!(matches!(operand.kind, ExprKind::Binary { op: BinOp::Pow, .. }));
            }
            other => panic!("expected unary, got {:?}", other),
        }
    }

    #[test]
    fn test_chained_comparison_desugars_to_and() {
        let expr = parse_expr("0 <= i < n");
        assert!(matches!(expr.kind, ExprKind::BoolOp { op: BoolOp::And, .. }));
    }

    #[test]
    fn test_function_definition() {
        let source = "\
@pure
def add(x: float64, y: 'float64[:]' = 1.0) -> float64:
    return x + y
";
        let module = parse(source);
        let def = match &module.body[0].kind {
            StmtKind::FunctionDef(def) => def.clone(),
            other => panic!("expected def, got {:?}", other),
        };
        assert_eq!(def.name, "add");
        assert_eq!(def.decorators[0].name, "pure");
        assert_eq!(def.params[0].annotation.as_ref().unwrap().text, "float64");
        assert_eq!(def.params[1].annotation.as_ref().unwrap().text, "float64[:]");
        assert!(def.params[1].default.is_some());
        assert_eq!(def.returns.as_ref().unwrap().text, "float64");
    }

    #[test]
    fn test_array_annotation_text() {
        let module = parse("def f(a: float64[:,:](order=F), n: int):\n    pass\n");
        match &module.body[0].kind {
            StmtKind::FunctionDef(def) => {
                assert_eq!(
                    def.params[0].annotation.as_ref().unwrap().text,
                    "float64[:,:](order=F)"
                );
                assert_eq!(def.params[1].annotation.as_ref().unwrap().text, "int");
            }
            other => panic!("expected def, got {:?}", other),
        }
    }

    #[test]
    fn test_directive_attaches_to_next_statement() {
        let source = "\
def f(n: int):
    s = 0
    #$ parallel-loop reduction(+:s)
    for i in range(n):
        s += i
    return s
";
        let module = parse(source);
        let def = match &module.body[0].kind {
            StmtKind::FunctionDef(def) => def.clone(),
            other => panic!("expected def, got {:?}", other),
        };
        let for_stmt = &def.body[1];
        assert!(matches!(for_stmt.kind, StmtKind::For { .. }));
        assert_eq!(for_stmt.directives.len(), 1);
        assert_eq!(for_stmt.directives[0].text, "parallel-loop reduction(+:s)");
    }

    #[test]
    fn test_if_elif_else() {
        let source = "if x > 0:\n    y = 1\nelif x < 0:\n    y = -1\nelse:\n    y = 0\n";
        match &parse(source).body[0].kind {
            StmtKind::If { branches, orelse } => {
                assert_eq!(branches.len(), 2);
                assert_eq!(orelse.len(), 1);
            }
            other => panic!("expected if, got {:?}", other),
        }
    }

    #[test]
    fn test_keyword_arguments_and_slices() {
        let expr = parse_expr("np.zeros((3, 4), dtype=float32)");
        match expr.kind {
            ExprKind::Call { args, keywords, .. } => {
                assert!(matches!(args[0].kind, ExprKind::Tuple(_)));
                assert_eq!(keywords[0].name, "dtype");
            }
            other => panic!("expected call, got {:?}", other),
        }
        let expr = parse_expr("a[1:, j]");
        match expr.kind {
            ExprKind::Subscript { indices, .. } => {
                assert!(matches!(indices[0].kind, ExprKind::Slice { .. }));
                assert!(matches!(indices[1].kind, ExprKind::Name(_)));
            }
            other => panic!("expected subscript, got {:?}", other),
        }
    }

    #[test]
    fn test_from_import() {
        match &parse("from geometry import norm, dot as vdot\n").body[0].kind {
            StmtKind::FromImport { module, names } => {
                assert_eq!(module, "geometry");
                assert_eq!(names[1].alias.as_deref(), Some("vdot"));
            }
            other => panic!("expected import, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_error_reports_location() {
        let err = parse_source("x = (1 +\n", "bad.py", "bad").unwrap_err();
        assert!(matches!(err, CompileError::ParseError { .. }));
    }

    #[test]
    fn test_deep_nesting_is_a_parse_error() {
        let parens = format!("x = {}1{}\n", "(".repeat(3000), ")".repeat(3000));
        let err = parse_source(&parens, "deep.py", "deep").unwrap_err();
        assert!(matches!(err, CompileError::ParseError { .. }), "{:?}", err);

        let negations = format!("x = {}1\n", "-".repeat(3000));
        let err = parse_source(&negations, "deep.py", "deep").unwrap_err();
        assert!(matches!(err, CompileError::ParseError { .. }), "{:?}", err);

        let shallow = format!("x = {}1{}\n", "(".repeat(20), ")".repeat(20));
        assert_eq!(parse(&shallow).body.len(), 1);
    }
}
