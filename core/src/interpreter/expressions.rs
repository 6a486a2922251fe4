//! Expression evaluator
//!
//! A [`Formula`] is an arithmetic/bitwise expression over integer literals
//! and variable references. Parsing validates that values and operators
//! alternate and that brackets balance. Evaluation works on a flat item list:
//! the innermost parenthesis pair is reduced and spliced back until none are
//! left, then the remaining list is reduced tier by tier, left to right:
//!
//! 1. `*` `/` `%`
//! 2. `+` `-`
//! 3. `AND` `OR` `XOR` `ROR` `ROL`
//!
//! Bitwise operators (and the `!` complement) are only accepted when the
//! formula produces an Unsigned result; Unsigned results are masked to 32
//! bits once the whole formula is reduced.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::error::{ResultExt, ScriptError, ScriptResult};
use crate::interpreter::compiler::lexer::{self, Token};
use crate::interpreter::types::{Data, DataType, VarRef};

const WORD_MASK: i64 = 0xFFFF_FFFF;

/* ===================== Variable Lookup ===================== */

/// Anything that can turn a reference into data.
pub trait VarLookup {
    fn resolve(&mut self, var: &VarRef) -> ScriptResult<Data>;
}

/// Plain `$name` lookups against a map, handy for embedding and tests
impl VarLookup for HashMap<String, Data> {
    fn resolve(&mut self, var: &VarRef) -> ScriptResult<Data> {
        if !var.is_plain() {
            return Err(ScriptError::syntax(format!(
                "{} needs a variable store to resolve",
                var
            )));
        }
        self.get(&var.name)
            .cloned()
            .ok_or_else(|| ScriptError::unknown_variable(&var.name))
    }
}

/* ===================== Formula ===================== */

/// Result kind a formula is evaluated for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NumKind {
    Signed,
    Unsigned,
    IntArray,
}

impl NumKind {
    pub fn data_type(self) -> DataType {
        match self {
            NumKind::Signed => DataType::Int,
            NumKind::Unsigned => DataType::UInt,
            NumKind::IntArray => DataType::IntArray,
        }
    }

    pub fn for_type(ty: DataType) -> Option<NumKind> {
        match ty {
            DataType::Int => Some(NumKind::Signed),
            DataType::UInt => Some(NumKind::Unsigned),
            DataType::IntArray => Some(NumKind::IntArray),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    Mul,
    Div,
    Mod,
    Add,
    Sub,
    And,
    Or,
    Xor,
    Ror,
    Rol,
}

impl BinOp {
    fn from_token(token: &Token) -> Option<BinOp> {
        match token {
            Token::Arith('*') => Some(BinOp::Mul),
            Token::Arith('/') => Some(BinOp::Div),
            Token::Arith('%') => Some(BinOp::Mod),
            Token::Arith('+') => Some(BinOp::Add),
            Token::Arith('-') => Some(BinOp::Sub),
            Token::Word(w) => BinOp::from_word(w),
            _ => None,
        }
    }

    fn from_word(word: &str) -> Option<BinOp> {
        match word.to_ascii_uppercase().as_str() {
            "AND" => Some(BinOp::And),
            "OR" => Some(BinOp::Or),
            "XOR" => Some(BinOp::Xor),
            "ROR" => Some(BinOp::Ror),
            "ROL" => Some(BinOp::Rol),
            _ => None,
        }
    }

    fn tier(self) -> u8 {
        match self {
            BinOp::Mul | BinOp::Div | BinOp::Mod => 1,
            BinOp::Add | BinOp::Sub => 2,
            _ => 3,
        }
    }

    pub fn is_bitwise(self) -> bool {
        self.tier() == 3
    }

    fn symbol(self) -> &'static str {
        match self {
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::And => "AND",
            BinOp::Or => "OR",
            BinOp::Xor => "XOR",
            BinOp::Ror => "ROR",
            BinOp::Rol => "ROL",
        }
    }
}

/// Parsed formula item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v")]
pub enum Term {
    Num(i64),
    Var(VarRef),
    /// `!atom` or `!( ... )`; holds the complemented sub-formula
    Not(Vec<Term>),
    Op(BinOp),
    Open,
    Close,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Formula {
    source: String,
    kind: NumKind,
    terms: Vec<Term>,
}

impl fmt::Display for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl Formula {
    /// Parse formula text for the given result kind
    pub fn parse(text: &str, kind: NumKind) -> ScriptResult<Formula> {
        let tokens = lexer::tokenize(text)?;
        Formula::from_tokens(&tokens, kind)
    }

    pub fn from_tokens(tokens: &[Token], kind: NumKind) -> ScriptResult<Formula> {
        let source = lexer::render(tokens);
        let terms = build_terms(tokens)
            .and_then(|terms| check_kind(terms, kind))
            .with_context(|| format!("formula '{}'", source))?;

        Ok(Formula {
            source,
            kind,
            terms,
        })
    }

    pub fn kind(&self) -> NumKind {
        self.kind
    }

    pub fn terms(&self) -> &[Term] {
        &self.terms
    }

    /// References the formula reads
    pub fn references(&self) -> impl Iterator<Item = &VarRef> {
        let mut found = Vec::new();
        collect_references(&self.terms, &mut found);
        found.into_iter()
    }

    /// Evaluate to a single numeric value
    pub fn evaluate(&self, lookup: &mut dyn VarLookup) -> ScriptResult<Data> {
        self.evaluate_inner(lookup)
            .with_context(|| format!("formula '{}'", self.source))
    }

    fn evaluate_inner(&self, lookup: &mut dyn VarLookup) -> ScriptResult<Data> {
        let result = self.reduce_terms(&self.terms, lookup)?;
        self.finish(result)
    }

    fn reduce_terms(&self, terms: &[Term], lookup: &mut dyn VarLookup) -> ScriptResult<Operand> {
        let mut items = terms
            .iter()
            .map(|t| self.resolve_term(t, lookup))
            .collect::<ScriptResult<Vec<Item>>>()?;

        // Innermost parenthesis first: the first ')' closes the last '(' before it
        while let Some(close) = items.iter().position(|i| matches!(i, Item::Close)) {
            let open = items[..close]
                .iter()
                .rposition(|i| matches!(i, Item::Open))
                .ok_or_else(|| ScriptError::syntax("unbalanced parentheses"))?;
            let inner: Vec<Item> = items[open + 1..close].to_vec();
            let value = reduce(inner, self.kind)?;
            items.splice(open..=close, std::iter::once(Item::Val(value)));
        }

        reduce(items, self.kind)
    }

    fn resolve_term(&self, term: &Term, lookup: &mut dyn VarLookup) -> ScriptResult<Item> {
        Ok(match term {
            Term::Num(n) => Item::Val(Operand::Scalar(*n)),
            Term::Var(r) => Item::Val(self.resolve_var(r, lookup)?),
            Term::Not(inner) => match self.reduce_terms(inner, lookup)? {
                Operand::Scalar(v) => Item::Val(Operand::Scalar(!v & WORD_MASK)),
                Operand::Array(vs) => {
                    Item::Val(Operand::Array(vs.into_iter().map(|v| !v & WORD_MASK).collect()))
                }
            },
            Term::Op(op) => Item::Op(*op),
            Term::Open => Item::Open,
            Term::Close => Item::Close,
        })
    }

    fn resolve_var(&self, var: &VarRef, lookup: &mut dyn VarLookup) -> ScriptResult<Operand> {
        match lookup.resolve(var)? {
            Data::Int(v) => Ok(Operand::Scalar(v)),
            Data::UInt(v) => Ok(Operand::Scalar(i64::from(v))),
            Data::IntArray(vs) if self.kind == NumKind::IntArray => Ok(Operand::Array(vs)),
            other => Err(ScriptError::type_mismatch(
                if self.kind == NumKind::IntArray {
                    "Integer or IntArray"
                } else {
                    "Integer"
                },
                other.data_type(),
            )
            .context(var.to_string())),
        }
    }

    fn finish(&self, result: Operand) -> ScriptResult<Data> {
        match (self.kind, result) {
            (NumKind::Signed, Operand::Scalar(v)) => Ok(Data::Int(v)),
            (NumKind::Unsigned, Operand::Scalar(v)) => Ok(Data::UInt((v & WORD_MASK) as u32)),
            (NumKind::IntArray, Operand::Array(vs)) => Ok(Data::IntArray(vs)),
            (NumKind::IntArray, Operand::Scalar(_)) => {
                Err(ScriptError::type_mismatch(DataType::IntArray, DataType::Int))
            }
            (_, Operand::Array(_)) => Err(ScriptError::type_mismatch(DataType::Int, DataType::IntArray)),
        }
    }
}

/* ===================== Parsing ===================== */

fn build_terms(tokens: &[Token]) -> ScriptResult<Vec<Term>> {
    if tokens.is_empty() {
        return Err(ScriptError::syntax("empty formula"));
    }

    // `ROL a b` is shorthand for `a ROL b`
    if let Some(op) = tokens[0].word().and_then(BinOp::from_word) {
        if matches!(op, BinOp::Ror | BinOp::Rol) {
            let mut pos = 1;
            let lhs = read_atom(tokens, &mut pos)?;
            let rhs = read_atom(tokens, &mut pos)?;
            if pos != tokens.len() {
                return Err(ScriptError::syntax(format!(
                    "{} takes exactly two operands",
                    op.symbol()
                )));
            }
            return Ok(vec![lhs, Term::Op(op), rhs]);
        }
    }

    let mut terms = Vec::with_capacity(tokens.len());
    let mut expect_value = true;
    let mut depth = 0usize;
    let mut pos = 0;

    while pos < tokens.len() {
        let token = &tokens[pos];
        if expect_value {
            if *token == Token::LParen {
                terms.push(Term::Open);
                depth += 1;
                pos += 1;
                continue;
            }
            terms.push(read_atom(tokens, &mut pos)?);
            expect_value = false;
        } else {
            if *token == Token::RParen {
                if depth == 0 {
                    return Err(ScriptError::syntax("unbalanced parentheses"));
                }
                depth -= 1;
                terms.push(Term::Close);
                pos += 1;
                continue;
            }
            let op = BinOp::from_token(token).ok_or_else(|| {
                ScriptError::syntax(format!("expected an operator, found '{}'", token))
            })?;
            terms.push(Term::Op(op));
            expect_value = true;
            pos += 1;
        }
    }

    if expect_value {
        return Err(ScriptError::syntax("formula ends without a value"));
    }
    if depth != 0 {
        return Err(ScriptError::syntax("unbalanced parentheses"));
    }

    Ok(terms)
}

/// Read one value: literal, `-literal`, reference, `!atom` or `!( ... )`
fn read_atom(tokens: &[Token], pos: &mut usize) -> ScriptResult<Term> {
    let token = tokens
        .get(*pos)
        .ok_or_else(|| ScriptError::syntax("formula ends without a value"))?;
    *pos += 1;

    match token {
        Token::Num(n) => Ok(Term::Num(*n)),
        Token::Hex(h) => Ok(Term::Num(i64::from(*h))),
        Token::Var(r) => Ok(Term::Var(r.clone())),
        Token::Arith('-') => match tokens.get(*pos) {
            Some(Token::Num(n)) => {
                *pos += 1;
                Ok(Term::Num(-n))
            }
            Some(Token::Hex(h)) => {
                *pos += 1;
                Ok(Term::Num(-i64::from(*h)))
            }
            _ => Err(ScriptError::syntax("'-' must precede a number")),
        },
        Token::Bang if tokens.get(*pos) == Some(&Token::LParen) => {
            let close = matching_paren(tokens, *pos)?;
            let inner = build_terms(&tokens[*pos + 1..close])?;
            *pos = close + 1;
            Ok(Term::Not(inner))
        }
        Token::Bang => {
            let inner = read_atom(tokens, pos)?;
            Ok(Term::Not(vec![inner]))
        }
        other => Err(ScriptError::syntax(format!(
            "expected a value, found '{}'",
            other
        ))),
    }
}

/// Index of the `)` closing the `(` at `open`
fn matching_paren(tokens: &[Token], open: usize) -> ScriptResult<usize> {
    let mut depth = 0usize;
    for (i, token) in tokens.iter().enumerate().skip(open) {
        match token {
            Token::LParen => depth += 1,
            Token::RParen => {
                depth -= 1;
                if depth == 0 {
                    return Ok(i);
                }
            }
            _ => {}
        }
    }
    Err(ScriptError::syntax("unbalanced parentheses"))
}

fn collect_references<'a>(terms: &'a [Term], found: &mut Vec<&'a VarRef>) {
    for term in terms {
        match term {
            Term::Var(r) => found.push(r),
            Term::Not(inner) => collect_references(inner, found),
            _ => {}
        }
    }
}

fn check_kind(terms: Vec<Term>, kind: NumKind) -> ScriptResult<Vec<Term>> {
    if kind == NumKind::Unsigned {
        return Ok(terms);
    }
    for term in &terms {
        match term {
            Term::Op(op) if op.is_bitwise() => {
                return Err(ScriptError::syntax(format!(
                    "bitwise operator {} requires an Unsigned result",
                    op.symbol()
                )));
            }
            Term::Not(_) => {
                return Err(ScriptError::syntax("'!' requires an Unsigned result"));
            }
            _ => {}
        }
    }
    Ok(terms)
}

/* ===================== Reduction ===================== */

#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Scalar(i64),
    Array(Vec<i64>),
}

#[derive(Debug, Clone, PartialEq)]
enum Item {
    Val(Operand),
    Op(BinOp),
    Open,
    Close,
}

/// Reduce a parenthesis-free `value (op value)*` list
fn reduce(mut items: Vec<Item>, kind: NumKind) -> ScriptResult<Operand> {
    for tier in 1..=3u8 {
        let mut i = 1;
        while i < items.len() {
            let op = match &items[i] {
                Item::Op(op) if op.tier() == tier => *op,
                _ => {
                    i += 2;
                    continue;
                }
            };
            let (Some(Item::Val(lhs)), Some(Item::Val(rhs))) = (items.get(i - 1), items.get(i + 1))
            else {
                return Err(ScriptError::syntax("operator without operands"));
            };
            let value = apply(op, lhs.clone(), rhs.clone(), kind)?;
            items.splice(i - 1..=i + 1, std::iter::once(Item::Val(value)));
        }
    }

    match items.pop() {
        Some(Item::Val(v)) if items.is_empty() => Ok(v),
        _ => Err(ScriptError::syntax("malformed formula")),
    }
}

fn apply(op: BinOp, lhs: Operand, rhs: Operand, kind: NumKind) -> ScriptResult<Operand> {
    match (lhs, rhs) {
        (Operand::Scalar(a), Operand::Scalar(b)) => scalar_op(op, a, b, kind).map(Operand::Scalar),
        (Operand::Array(a), Operand::Scalar(b)) => a
            .into_iter()
            .map(|x| scalar_op(op, x, b, kind))
            .collect::<ScriptResult<Vec<_>>>()
            .map(Operand::Array),
        (Operand::Scalar(a), Operand::Array(b)) => b
            .into_iter()
            .map(|y| scalar_op(op, a, y, kind))
            .collect::<ScriptResult<Vec<_>>>()
            .map(Operand::Array),
        (Operand::Array(a), Operand::Array(b)) => {
            if a.len() != b.len() {
                return Err(ScriptError::arithmetic(format!(
                    "array length mismatch ({} vs {})",
                    a.len(),
                    b.len()
                )));
            }
            a.into_iter()
                .zip(b)
                .map(|(x, y)| scalar_op(op, x, y, kind))
                .collect::<ScriptResult<Vec<_>>>()
                .map(Operand::Array)
        }
    }
}

fn scalar_op(op: BinOp, a: i64, b: i64, kind: NumKind) -> ScriptResult<i64> {
    let overflow = || ScriptError::arithmetic(format!("overflow in {} {} {}", a, op.symbol(), b));

    match op {
        BinOp::Mul => a.checked_mul(b).ok_or_else(overflow),
        BinOp::Div => {
            if b == 0 {
                return Err(ScriptError::arithmetic("division by zero"));
            }
            a.checked_div(b).ok_or_else(overflow)
        }
        BinOp::Mod => {
            if b == 0 {
                return Err(ScriptError::arithmetic("modulo by zero"));
            }
            a.checked_rem(b).ok_or_else(overflow)
        }
        BinOp::Add => a.checked_add(b).ok_or_else(overflow),
        BinOp::Sub => a.checked_sub(b).ok_or_else(overflow),
        BinOp::And => Ok(a & b),
        BinOp::Or => Ok(a | b),
        BinOp::Xor => Ok(a ^ b),
        BinOp::Ror | BinOp::Rol => {
            debug_assert_eq!(kind, NumKind::Unsigned);
            let word = (a & WORD_MASK) as u32;
            let by = b.rem_euclid(32) as u32;
            let rotated = if op == BinOp::Rol {
                word.rotate_left(by)
            } else {
                word.rotate_right(by)
            };
            Ok(i64::from(rotated))
        }
    }
}
