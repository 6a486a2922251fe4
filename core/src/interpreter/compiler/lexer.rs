//! Line tokenizer
//!
//! One PEST grammar (`line.pest`) splits a comment-free line into tokens;
//! this module turns the parse tree into a flat `Vec<Token>`.

use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser;
use std::fmt;

use crate::error::{ScriptError, ScriptResult};
use crate::interpreter::types::{Index, IndexPart, Suffix, VarRef};

#[derive(Parser)]
#[grammar = "interpreter/compiler/line.pest"]
struct LineParser;

/* ===================== Tokens ===================== */

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Str(String),
    Num(i64),
    /// `0x..` literal, always 32-bit
    Hex(u32),
    Var(VarRef),
    Cmp(String),
    Assign(String),
    Arith(char),
    Bang,
    LParen,
    RParen,
    LBrace,
    RBrace,
    Comma,
    Word(String),
}

impl Token {
    pub fn is_word(&self, kw: &str) -> bool {
        matches!(self, Token::Word(w) if w.eq_ignore_ascii_case(kw))
    }

    pub fn word(&self) -> Option<&str> {
        match self {
            Token::Word(w) => Some(w),
            _ => None,
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Str(s) => write!(f, "\"{}\"", s),
            Token::Num(n) => write!(f, "{}", n),
            Token::Hex(n) => write!(f, "0x{:X}", n),
            Token::Var(r) => write!(f, "{}", r),
            Token::Cmp(op) | Token::Assign(op) | Token::Word(op) => f.write_str(op),
            Token::Arith(c) => write!(f, "{}", c),
            Token::Bang => f.write_str("!"),
            Token::LParen => f.write_str("("),
            Token::RParen => f.write_str(")"),
            Token::LBrace => f.write_str("{"),
            Token::RBrace => f.write_str("}"),
            Token::Comma => f.write_str(","),
        }
    }
}

/// Render tokens back to text, for error messages and formula sources
pub fn render(tokens: &[Token]) -> String {
    tokens
        .iter()
        .map(|t| t.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

/* ===================== Comments ===================== */

/// Remove a whole-line `#` comment or a trailing `##` comment.
/// `#` characters inside string literals are kept.
pub fn strip_comment(raw: &str) -> &str {
    let trimmed = raw.trim_start();
    if trimmed.starts_with('#') {
        return "";
    }

    let bytes = raw.as_bytes();
    let mut in_string = false;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' if in_string => i += 1,
            b'"' => in_string = !in_string,
            b'#' if !in_string && bytes.get(i + 1) == Some(&b'#') => return &raw[..i],
            _ => {}
        }
        i += 1;
    }
    raw
}

/* ===================== Tokenizer ===================== */

pub fn tokenize(text: &str) -> ScriptResult<Vec<Token>> {
    let mut pairs = LineParser::parse(Rule::line, text).map_err(|e| {
        let column = match e.line_col {
            pest::error::LineColLocation::Pos((_, c)) => c,
            pest::error::LineColLocation::Span((_, c), _) => c,
        };
        ScriptError::syntax(format!("unexpected input at column {}", column))
    })?;

    let Some(line) = pairs.next() else {
        return Ok(Vec::new());
    };

    let mut tokens = Vec::new();
    for pair in line.into_inner() {
        let token = match pair.as_rule() {
            Rule::EOI => continue,
            Rule::string => {
                let inner = pair.into_inner().next().map(|p| p.as_str()).unwrap_or("");
                Token::Str(unescape(inner))
            }
            Rule::hex => {
                let digits = &pair.as_str()[2..];
                let v = u32::from_str_radix(digits, 16).map_err(|_| {
                    ScriptError::syntax(format!("hex literal {} exceeds 32 bits", pair.as_str()))
                })?;
                Token::Hex(v)
            }
            Rule::number => Token::Num(parse_number(pair.as_str())?),
            Rule::var_ref => Token::Var(build_var_ref(pair)?),
            Rule::cmp_op => Token::Cmp(pair.as_str().to_string()),
            Rule::assign_op => Token::Assign(pair.as_str().to_string()),
            Rule::arith_op => Token::Arith(pair.as_str().chars().next().unwrap_or('+')),
            Rule::bang => Token::Bang,
            Rule::lparen => Token::LParen,
            Rule::rparen => Token::RParen,
            Rule::lbrace => Token::LBrace,
            Rule::rbrace => Token::RBrace,
            Rule::comma => Token::Comma,
            Rule::word => Token::Word(pair.as_str().to_string()),
            other => {
                return Err(ScriptError::syntax(format!("unexpected token {:?}", other)));
            }
        };
        tokens.push(token);
    }

    Ok(tokens)
}

fn parse_number(text: &str) -> ScriptResult<i64> {
    text.parse::<i64>()
        .map_err(|_| ScriptError::syntax(format!("number {} out of range", text)))
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

fn build_var_ref(pair: Pair<Rule>) -> ScriptResult<VarRef> {
    let mut var = VarRef::named(String::new());

    for part in pair.into_inner() {
        match part.as_rule() {
            Rule::ident => var.name = part.as_str().to_string(),
            Rule::index => {
                let parts = part
                    .into_inner()
                    .map(|p| match p.as_rule() {
                        Rule::index_num => parse_number(p.as_str()).map(IndexPart::Lit),
                        _ => Ok(IndexPart::Var(
                            p.into_inner()
                                .next()
                                .map(|n| n.as_str().to_string())
                                .unwrap_or_default(),
                        )),
                    })
                    .collect::<ScriptResult<Vec<_>>>()?;

                let mut parts = parts.into_iter();
                var.index = match (parts.next(), parts.next()) {
                    (Some(at), None) => Some(Index::At(at)),
                    (Some(start), Some(end)) => Some(Index::Range(start, end)),
                    _ => None,
                };
            }
            Rule::suffix => {
                let word = part.into_inner().next().map(|p| p.as_str()).unwrap_or("");
                let suffix = Suffix::parse(word)
                    .ok_or_else(|| ScriptError::syntax(format!("unknown suffix '.{}'", word)))?;
                var.suffix = Some(suffix);
            }
            _ => {}
        }
    }

    Ok(var)
}
