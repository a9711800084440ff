//! Lexer for the Python subset using logos
//!
//! Produces a flat token stream with Python's layout tokens synthesized:
//! - `Newline` at the end of each logical line (not inside brackets)
//! - `Indent` / `Dedent` when the indentation of a line changes
//! - `Directive(text)` for `#$ ...` comment lines; other comments are dropped

use logos::{Filter, Logos};

use crate::ast::Location;
use crate::error::{CompileError, CompileResult};

fn lex_comment(lex: &mut logos::Lexer<Token>) -> Filter<String> {
    let text = lex.slice();
    match text.strip_prefix("#$") {
        Some(rest) => Filter::Emit(rest.trim().to_string()),
        None => Filter::Skip,
    }
}

fn lex_triple_string(lex: &mut logos::Lexer<Token>) -> Option<String> {
    let quote = &lex.slice()[..3];
    let remainder = lex.remainder();
    let end = remainder.find(quote)?;
    let body = remainder[..end].to_string();
    lex.bump(end + 3);
    Some(body)
}

fn unescape(raw: &str) -> String {
    let inner = &raw[1..raw.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('\\') => out.push('\\'),
            Some('\'') => out.push('\''),
            Some('"') => out.push('"'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

fn parse_int(text: &str) -> Option<i64> {
    text.replace('_', "").parse::<i64>().ok()
}

fn parse_float(text: &str) -> Option<f64> {
    text.replace('_', "").parse::<f64>().ok()
}

fn is_int_literal(text: &str) -> bool {
    text.starts_with(|c: char| c.is_ascii_digit()) && text.chars().all(|c| c.is_ascii_digit() || c == '_')
}

fn parse_imag(text: &str) -> Option<f64> {
    let digits = &text[..text.len() - 1];
    parse_float(digits)
}

/// Token types for the Python subset
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\f]+")]
#[logos(skip r"\\\r?\n")]
pub enum Token {
    // Literals
    #[regex(r"[0-9][0-9_]*", |lex| parse_int(lex.slice()))]
    Int(i64),

    #[regex(r"[0-9][0-9_]*\.[0-9_]*([eE][+-]?[0-9]+)?", |lex| parse_float(lex.slice()))]
    #[regex(r"\.[0-9][0-9_]*([eE][+-]?[0-9]+)?", |lex| parse_float(lex.slice()))]
    #[regex(r"[0-9][0-9_]*[eE][+-]?[0-9]+", |lex| parse_float(lex.slice()))]
    Float(f64),

    #[regex(r"([0-9][0-9_]*(\.[0-9_]*)?([eE][+-]?[0-9]+)?)[jJ]", |lex| parse_imag(lex.slice()))]
    Imag(f64),

    #[regex(r#""([^"\\\n]|\\.)*""#, |lex| unescape(lex.slice()))]
    #[regex(r#"'([^'\\\n]|\\.)*'"#, |lex| unescape(lex.slice()))]
    #[token("\"\"\"", lex_triple_string)]
    #[token("'''", lex_triple_string)]
    Str(String),

    // Identifiers
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),

    // Keywords
    #[token("def")]
    Def,
    #[token("class")]
    Class,
    #[token("return")]
    Return,
    #[token("if")]
    If,
    #[token("elif")]
    Elif,
    #[token("else")]
    Else,
    #[token("for")]
    For,
    #[token("in")]
    In,
    #[token("while")]
    While,
    #[token("break")]
    Break,
    #[token("continue")]
    Continue,
    #[token("pass")]
    Pass,
    #[token("import")]
    Import,
    #[token("from")]
    From,
    #[token("as")]
    As,
    #[token("and")]
    And,
    #[token("or")]
    Or,
    #[token("not")]
    Not,
    #[token("global")]
    Global,
    #[token("True")]
    True,
    #[token("False")]
    False,
    #[token("None")]
    None,

    // Operators
    #[token("@")]
    At,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("**")]
    DoubleStar,
    #[token("/")]
    Slash,
    #[token("//")]
    DoubleSlash,
    #[token("%")]
    Percent,
    #[token("&")]
    Amp,
    #[token("|")]
    Pipe,
    #[token("^")]
    Caret,
    #[token("~")]
    Tilde,
    #[token("<<")]
    LShift,
    #[token(">>")]
    RShift,
    #[token("==")]
    EqEq,
    #[token("!=")]
    NotEq,
    #[token("<")]
    Lt,
    #[token("<=")]
    LtE,
    #[token(">")]
    Gt,
    #[token(">=")]
    GtE,
    #[token("=")]
    Equals,
    #[token("+=")]
    PlusEq,
    #[token("-=")]
    MinusEq,
    #[token("*=")]
    StarEq,
    #[token("/=")]
    SlashEq,
    #[token("//=")]
    DoubleSlashEq,
    #[token("%=")]
    PercentEq,
    #[token("**=")]
    DoubleStarEq,
    #[token("@=")]
    AtEq,
    #[token("->")]
    Arrow,

    // Punctuation
    #[token(".")]
    Dot,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token(",")]
    Comma,
    #[token(":")]
    Colon,
    #[token(";")]
    Semicolon,

    // Layout
    #[regex(r"\r?\n")]
    Newline,

    #[regex(r"#[^\n]*", lex_comment)]
    Directive(String),

    /// Synthesized when a line is indented deeper than the previous one
    Indent,
    /// Synthesized when a line returns to an enclosing indentation level
    Dedent,
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Int(n) => write!(f, "{}", n),
            Token::Float(n) => write!(f, "{}", n),
            Token::Imag(n) => write!(f, "{}j", n),
            Token::Str(s) => write!(f, "{:?}", s),
            Token::Ident(s) => write!(f, "{}", s),
            Token::Directive(s) => write!(f, "#$ {}", s),
            Token::Newline => write!(f, "newline"),
            Token::Indent => write!(f, "indent"),
            Token::Dedent => write!(f, "dedent"),
            other => write!(f, "{}", keyword_or_symbol(other)),
        }
    }
}

fn keyword_or_symbol(token: &Token) -> &'static str {
    match token {
        Token::Def => "def",
        Token::Class => "class",
        Token::Return => "return",
        Token::If => "if",
        Token::Elif => "elif",
        Token::Else => "else",
        Token::For => "for",
        Token::In => "in",
        Token::While => "while",
        Token::Break => "break",
        Token::Continue => "continue",
        Token::Pass => "pass",
        Token::Import => "import",
        Token::From => "from",
        Token::As => "as",
        Token::And => "and",
        Token::Or => "or",
        Token::Not => "not",
        Token::Global => "global",
        Token::True => "True",
        Token::False => "False",
        Token::None => "None",
        Token::At => "@",
        Token::Plus => "+",
        Token::Minus => "-",
        Token::Star => "*",
        Token::DoubleStar => "**",
        Token::Slash => "/",
        Token::DoubleSlash => "//",
        Token::Percent => "%",
        Token::Amp => "&",
        Token::Pipe => "|",
        Token::Caret => "^",
        Token::Tilde => "~",
        Token::LShift => "<<",
        Token::RShift => ">>",
        Token::EqEq => "==",
        Token::NotEq => "!=",
        Token::Lt => "<",
        Token::LtE => "<=",
        Token::Gt => ">",
        Token::GtE => ">=",
        Token::Equals => "=",
        Token::PlusEq => "+=",
        Token::MinusEq => "-=",
        Token::StarEq => "*=",
        Token::SlashEq => "/=",
        Token::DoubleSlashEq => "//=",
        Token::PercentEq => "%=",
        Token::DoubleStarEq => "**=",
        Token::AtEq => "@=",
        Token::Arrow => "->",
        Token::Dot => ".",
        Token::LParen => "(",
        Token::RParen => ")",
        Token::LBracket => "[",
        Token::RBracket => "]",
        Token::Comma => ",",
        Token::Colon => ":",
        Token::Semicolon => ";",
        _ => "?",
    }
}

/// A token with its source position
#[derive(Debug, Clone, PartialEq)]
pub struct SpannedToken {
    pub token: Token,
    pub loc: Location,
}

/// Maps byte offsets to line/column positions
struct LineIndex {
    starts: Vec<usize>,
}

impl LineIndex {
    fn new(source: &str) -> Self {
        let mut starts = vec![0];
        starts.extend(source.match_indices('\n').map(|(i, _)| i + 1));
        Self { starts }
    }

    fn locate(&self, offset: usize) -> Location {
        let line = match self.starts.binary_search(&offset) {
            Ok(line) => line,
            Err(next) => next - 1,
        };
        let column = offset - self.starts[line];
        Location::new(line as u32 + 1, column as u32 + 1)
    }
}

/// Lexer wrapper that resolves layout into explicit tokens
pub struct Lexer<'source> {
    source: &'source str,
    file: &'source str,
}

impl<'source> Lexer<'source> {
    pub fn new(source: &'source str, file: &'source str) -> Self {
        Self { source, file }
    }

    /// Tokenize the whole source, synthesizing `Newline`, `Indent` and `Dedent`
    pub fn tokenize(&self) -> CompileResult<Vec<SpannedToken>> {
        let index = LineIndex::new(self.source);
        let mut inner = Token::lexer(self.source);
        let mut out: Vec<SpannedToken> = Vec::new();
        let mut indents: Vec<u32> = vec![1];
        let mut depth: usize = 0;
        let mut at_line_start = true;

        while let Some(result) = inner.next() {
            let loc = index.locate(inner.span().start);
            let token = match result {
                Ok(token) => token,
                Err(()) => {
                    let text = inner.slice();
                    let message = if is_int_literal(text) {
                        format!("integer literal {} is out of range for int64", text)
                    } else {
                        format!("unexpected character sequence '{}'", text)
                    };
                    return Err(CompileError::lexer_error(self.file, loc, message));
                }
            };

            match token {
                Token::Newline => {
                    if depth == 0 && !at_line_start {
                        out.push(SpannedToken {
                            token: Token::Newline,
                            loc,
                        });
                        at_line_start = true;
                    }
                    continue;
                }
                Token::Directive(_) if !at_line_start => {
                    // trailing `#$` comments carry no directive meaning
                    continue;
                }
                Token::LParen | Token::LBracket => depth += 1,
                Token::RParen | Token::RBracket => depth = depth.saturating_sub(1),
                _ => {}
            }

            if at_line_start {
                self.layout(&mut out, &mut indents, loc)?;
            }

            let is_directive = matches!(token, Token::Directive(_));
            out.push(SpannedToken { token, loc });
            // a directive line stands alone: the next token starts a new line
            at_line_start = is_directive;
        }

        let end = index.locate(self.source.len());
        if !at_line_start {
            out.push(SpannedToken {
                token: Token::Newline,
                loc: end,
            });
        }
        while indents.len() > 1 {
            indents.pop();
            out.push(SpannedToken {
                token: Token::Dedent,
                loc: end,
            });
        }
        Ok(out)
    }

    fn layout(
        &self,
        out: &mut Vec<SpannedToken>,
        indents: &mut Vec<u32>,
        loc: Location,
    ) -> CompileResult<()> {
        let current = indents.last().copied().unwrap_or(1);
        if loc.column > current {
            indents.push(loc.column);
            out.push(SpannedToken {
                token: Token::Indent,
                loc,
            });
        } else if loc.column < current {
            while indents.last().is_some_and(|&level| level > loc.column) {
                indents.pop();
                out.push(SpannedToken {
                    token: Token::Dedent,
                    loc,
                });
            }
            if indents.last() != Some(&loc.column) {
                return Err(CompileError::lexer_error(
                    self.file,
                    loc,
                    "unindent does not match any outer indentation level",
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Token> {
        Lexer::new(source, "test.py")
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.token)
            .collect()
    }

    #[test]
    fn test_simple_tokens() {
        assert_eq!(
            kinds("c = a @ b"),
            vec![
                Token::Ident("c".to_string()),
                Token::Equals,
                Token::Ident("a".to_string()),
                Token::At,
                Token::Ident("b".to_string()),
                Token::Newline,
            ]
        );
    }

    #[test]
    fn test_numbers() {
        assert_eq!(
            kinds("1 2.5 3e2 4j"),
            vec![
                Token::Int(1),
                Token::Float(2.5),
                Token::Float(300.0),
                Token::Imag(4.0),
                Token::Newline,
            ]
        );
    }

    #[test]
    fn test_indentation() {
        let source = "def f(x):\n    y = x\n    return y\nz = 1\n";
        let tokens = kinds(source);
        assert!(tokens.contains(&Token::Indent));
        let dedent_at = tokens.iter().position(|t| *t == Token::Dedent).unwrap();
        assert_eq!(tokens[dedent_at + 1], Token::Ident("z".to_string()));
    }

    #[test]
    fn test_newlines_inside_brackets_are_ignored() {
        let tokens = kinds("x = f(1,\n      2)\n");
        let newlines = tokens.iter().filter(|t| **t == Token::Newline).count();
        assert_eq!(newlines, 1);
        assert!(!tokens.contains(&Token::Indent));
    }

    #[test]
    fn test_directive_comment() {
        let source = "#$ parallel-loop schedule(static)\nfor i in range(3):\n    pass\n";
        let tokens = kinds(source);
        assert_eq!(
            tokens[0],
            Token::Directive("parallel-loop schedule(static)".to_string())
        );
        assert_eq!(tokens[1], Token::For);
    }

    #[test]
    fn test_plain_comments_are_skipped() {
        assert_eq!(
            kinds("x = 1  # set x\n"),
            vec![
                Token::Ident("x".to_string()),
                Token::Equals,
                Token::Int(1),
                Token::Newline
            ]
        );
    }

    #[test]
    fn test_bad_dedent_is_an_error() {
        let source = "if x:\n        y = 1\n    z = 2\n";
        assert!(Lexer::new(source, "t.py").tokenize().is_err());
    }

    #[test]
    fn test_locations() {
        let tokens = Lexer::new("a = 1\nbb = 2\n", "t.py").tokenize().unwrap();
        let bb = tokens
            .iter()
            .find(|t| t.token == Token::Ident("bb".to_string()))
            .unwrap();
        assert_eq!(bb.loc, Location::new(2, 1));
    }

    #[test]
    fn test_integer_overflow_is_reported() {
        let err = Lexer::new("x = 99999999999999999999999\n", "t.py").tokenize().unwrap_err();
        match err {
            CompileError::LexerError { message, column, .. } => {
                assert!(message.contains("out of range"), "{}", message);
                assert_eq!(column, 5);
            }
            other => panic!("unexpected error {:?}", other),
        }
    }
}
