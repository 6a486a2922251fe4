//! Operand resolution
//!
//! References and expressions become fresh [`Data`] at dispatch time; the
//! compiled operand is left untouched so the next dispatch of the same
//! instruction resolves again.

use super::vm::Interpreter;
use crate::error::{ErrorKind, ScriptError, ScriptResult};
use crate::interpreter::compiler::lexer::{self, Token};
use crate::interpreter::expressions::VarLookup;
use crate::interpreter::types::{Condition, Data, DataType, Expr, Index, IndexPart, Value, VarRef};

impl Interpreter {
    pub(super) fn resolve_value(&mut self, value: &Value) -> ScriptResult<Data> {
        match value {
            Value::Literal(Data::Str(text)) if text.contains("<$") => {
                Ok(Data::Str(self.expand_template(text)?))
            }
            Value::Literal(data) => Ok(data.clone()),
            Value::Reference(var) => self.resolve_ref(var),
            Value::Expression(expr) => self.resolve_expr(expr),
        }
    }

    pub(super) fn resolve_all(&mut self, values: &[Value]) -> ScriptResult<Vec<Data>> {
        values.iter().map(|v| self.resolve_value(v)).collect()
    }

    fn resolve_expr(&mut self, expr: &Expr) -> ScriptResult<Data> {
        match expr {
            Expr::Calc { formula } => formula.evaluate(self),
            Expr::Concat { parts } => {
                let mut out = String::new();
                for part in parts {
                    out.push_str(&render(&self.resolve_value(part)?));
                }
                Ok(Data::Str(out))
            }
            Expr::Compare { cond } => Ok(Data::Bool(self.eval_condition(cond)?)),
            Expr::List { items, ty } => {
                let items = self.resolve_all(items)?;
                match ty {
                    DataType::IntArray => Ok(Data::IntArray(
                        items.iter().map(Data::as_int).collect::<ScriptResult<_>>()?,
                    )),
                    _ => Ok(Data::StrArray(items.iter().map(render).collect())),
                }
            }
        }
    }

    pub(super) fn eval_condition(&mut self, cond: &Condition) -> ScriptResult<bool> {
        let lhs = self.resolve_value(&cond.lhs)?;
        let result = match &cond.test {
            None => lhs.as_bool()?,
            Some((op, rhs)) => {
                let rhs = self.resolve_value(rhs)?;
                op.apply(&lhs, &rhs)?
            }
        };
        Ok(result != cond.negate)
    }

    /// `$name`, `$name[i]`, `$name[a:b]`, each optionally with a suffix
    pub(super) fn resolve_ref(&mut self, var: &VarRef) -> ScriptResult<Data> {
        let base = self.read_var(&var.name)?;
        let indexed = match &var.index {
            None => base,
            Some(Index::At(part)) => {
                let index = self.index_value(part)?;
                element_at(&var.name, base, index)?
            }
            Some(Index::Range(from, to)) => {
                let (from, to) = (self.index_value(from)?, self.index_value(to)?);
                slice(&var.name, base, from, to)?
            }
        };
        match var.suffix {
            Some(suffix) => suffix.apply(indexed),
            None => Ok(indexed),
        }
    }

    fn index_value(&mut self, part: &IndexPart) -> ScriptResult<i64> {
        match part {
            IndexPart::Lit(n) => Ok(*n),
            IndexPart::Var(name) => self.read_var(name)?.as_int(),
        }
    }

    /// Replace every `<$ref>` in a string literal with the rendered value
    fn expand_template(&mut self, text: &str) -> ScriptResult<String> {
        let mut out = String::with_capacity(text.len());
        let mut rest = text;
        while let Some(open) = rest.find("<$") {
            out.push_str(&rest[..open]);
            let after = &rest[open..];
            let Some(close) = after.find('>') else {
                out.push_str(after);
                return Ok(out);
            };
            let inner = &after[1..close];
            match lexer::tokenize(inner).ok().as_deref() {
                Some([Token::Var(var)]) => out.push_str(&render(&self.resolve_ref(var)?)),
                _ => out.push_str(&after[..=close]),
            }
            rest = &after[close + 1..];
        }
        out.push_str(rest);
        Ok(out)
    }
}

impl VarLookup for Interpreter {
    fn resolve(&mut self, var: &VarRef) -> ScriptResult<Data> {
        self.resolve_ref(var)
    }
}

/// Text form used by PRINT, concatenation and templates: strings unquoted
pub(super) fn render(data: &Data) -> String {
    match data {
        Data::Str(s) => s.clone(),
        other => other.to_string(),
    }
}

fn out_of_range(name: &str, index: i64, len: usize) -> ScriptError {
    ErrorKind::IndexOutOfRange {
        name: name.to_string(),
        index,
        len,
    }
    .into()
}

/// Check `index` against `len`; `inclusive_end` also allows `len` itself
pub(super) fn checked_index(
    name: &str,
    index: i64,
    len: usize,
    inclusive_end: bool,
) -> ScriptResult<usize> {
    usize::try_from(index)
        .ok()
        .filter(|i| *i < len || (inclusive_end && *i == len))
        .ok_or_else(|| out_of_range(name, index, len))
}

fn element_at(name: &str, data: Data, index: i64) -> ScriptResult<Data> {
    let len = data.len().unwrap_or(0);
    let i = checked_index(name, index, len, false)?;
    match data {
        Data::Str(s) => Ok(Data::Str(s.chars().skip(i).take(1).collect())),
        Data::IntArray(items) => Ok(Data::Int(items[i])),
        Data::StrArray(mut items) => Ok(Data::Str(items.swap_remove(i))),
        other => Err(ScriptError::type_mismatch("String or array", other.data_type())),
    }
}

/// Half-open `[from:to]`
fn slice(name: &str, data: Data, from: i64, to: i64) -> ScriptResult<Data> {
    let len = data.len().unwrap_or(0);
    let end = checked_index(name, to, len, true)?;
    let start = checked_index(name, from, end, true)?;
    match data {
        Data::Str(s) => Ok(Data::Str(s.chars().skip(start).take(end - start).collect())),
        Data::IntArray(items) => Ok(Data::IntArray(items[start..end].to_vec())),
        Data::StrArray(items) => Ok(Data::StrArray(items[start..end].to_vec())),
        other => Err(ScriptError::type_mismatch("String or array", other.data_type())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_element_and_slice() {
        let xs = Data::IntArray(vec![10, 20, 30]);
        assert_eq!(element_at("xs", xs.clone(), 1).unwrap(), Data::Int(20));
        assert_eq!(slice("xs", xs.clone(), 1, 3).unwrap(), Data::IntArray(vec![20, 30]));
        assert_eq!(slice("xs", xs.clone(), 2, 2).unwrap(), Data::IntArray(vec![]));

        let err = element_at("xs", xs.clone(), 3).unwrap_err();
        assert_eq!(
            err.kind,
            ErrorKind::IndexOutOfRange {
                name: "xs".into(),
                index: 3,
                len: 3
            }
        );
        assert!(slice("xs", xs, 2, 1).is_err());
    }

    #[test]
    fn test_string_indexing_counts_chars() {
        let s = Data::Str("héllo".into());
        assert_eq!(element_at("s", s.clone(), 1).unwrap(), Data::Str("é".into()));
        assert_eq!(slice("s", s, 1, 3).unwrap(), Data::Str("él".into()));
    }
}
