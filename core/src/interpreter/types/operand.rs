//! Instruction operands
//!
//! A [`Value`] is either already literal, a reference to a variable, or an
//! expression. References and expressions are resolved to [`Data`] when the
//! instruction is dispatched; the compiled operand itself never changes.

use super::values::{Data, DataType};
use crate::error::{ScriptError, ScriptResult};
use crate::interpreter::expressions::Formula;
use serde::{Deserialize, Serialize};
use std::fmt;

/* ===================== Value ===================== */

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "class", content = "v")]
pub enum Value {
    Literal(Data),
    Reference(VarRef),
    Expression(Expr),
}

impl Value {
    pub fn int(v: i64) -> Self {
        Value::Literal(Data::Int(v))
    }

    pub fn str(s: impl Into<String>) -> Self {
        Value::Literal(Data::Str(s.into()))
    }

    /// Type this operand resolves to, when known at compile time
    pub fn static_type(&self) -> Option<DataType> {
        match self {
            Value::Literal(d) => Some(d.data_type()),
            Value::Reference(r) => r.resolved_type(),
            Value::Expression(e) => Some(e.result_type()),
        }
    }

    pub fn as_reference(&self) -> Option<&VarRef> {
        match self {
            Value::Reference(r) => Some(r),
            _ => None,
        }
    }
}

/* ===================== Expressions ===================== */

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum Expr {
    /// Arithmetic / bitwise formula
    Calc { formula: Formula },
    /// String concatenation, left to right
    Concat { parts: Vec<Value> },
    /// Boolean comparison
    Compare { cond: Box<Condition> },
    /// Array literal `{a, b, c}`
    List { items: Vec<Value>, ty: DataType },
}

impl Expr {
    pub fn result_type(&self) -> DataType {
        match self {
            Expr::Calc { formula } => formula.kind().data_type(),
            Expr::Concat { .. } => DataType::Str,
            Expr::Compare { .. } => DataType::Bool,
            Expr::List { ty, .. } => *ty,
        }
    }
}

/// `[NOT] lhs [op rhs]`; without `op`, `lhs` must be Boolean.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub negate: bool,
    pub lhs: Value,
    pub test: Option<(CmpOp, Value)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Contains,
    StartsWith,
    EndsWith,
}

impl CmpOp {
    /// Parse a comparison symbol or keyword
    pub fn parse(token: &str) -> Option<CmpOp> {
        match token.to_ascii_uppercase().as_str() {
            "==" => Some(CmpOp::Eq),
            "!=" => Some(CmpOp::Ne),
            "<" => Some(CmpOp::Lt),
            "<=" => Some(CmpOp::Le),
            ">" => Some(CmpOp::Gt),
            ">=" => Some(CmpOp::Ge),
            "CONTAINS" => Some(CmpOp::Contains),
            "STARTSWITH" => Some(CmpOp::StartsWith),
            "ENDSWITH" => Some(CmpOp::EndsWith),
            _ => None,
        }
    }

    fn is_text_only(self) -> bool {
        matches!(self, CmpOp::Contains | CmpOp::StartsWith | CmpOp::EndsWith)
    }

    /// Compare two resolved values.
    ///
    /// Numbers compare numerically (Integer and Unsigned mix freely), strings
    /// lexically, booleans only for (in)equality.
    pub fn apply(self, lhs: &Data, rhs: &Data) -> ScriptResult<bool> {
        use std::cmp::Ordering;

        if self.is_text_only() {
            let (l, r) = (lhs.as_str()?, rhs.as_str()?);
            return Ok(match self {
                CmpOp::Contains => l.contains(r),
                CmpOp::StartsWith => l.starts_with(r),
                _ => l.ends_with(r),
            });
        }

        let ordering = match (lhs, rhs) {
            (Data::Bool(l), Data::Bool(r)) => {
                return match self {
                    CmpOp::Eq => Ok(l == r),
                    CmpOp::Ne => Ok(l != r),
                    _ => Err(ScriptError::type_mismatch("Integer or String", "Boolean")),
                };
            }
            (Data::Str(l), Data::Str(r)) => l.cmp(r),
            (l, r) if l.data_type().is_numeric() && r.data_type().is_numeric() => {
                l.as_int()?.cmp(&r.as_int()?)
            }
            (l, r) => return Err(ScriptError::type_mismatch(l.data_type(), r.data_type())),
        };

        Ok(match self {
            CmpOp::Eq => ordering == Ordering::Equal,
            CmpOp::Ne => ordering != Ordering::Equal,
            CmpOp::Lt => ordering == Ordering::Less,
            CmpOp::Le => ordering != Ordering::Greater,
            CmpOp::Gt => ordering == Ordering::Greater,
            CmpOp::Ge => ordering != Ordering::Less,
            _ => unreachable!("text operators handled above"),
        })
    }
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
            CmpOp::Contains => "CONTAINS",
            CmpOp::StartsWith => "STARTSWITH",
            CmpOp::EndsWith => "ENDSWITH",
        };
        f.write_str(s)
    }
}

/* ===================== References ===================== */

/// `$name[.SUFFIX]`, `$name[i]`, `$name[a:b]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarRef {
    pub name: String,
    pub index: Option<Index>,
    pub suffix: Option<Suffix>,
    /// Declared type of the variable, when the compiler knew it
    pub ty: Option<DataType>,
}

impl VarRef {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            index: None,
            suffix: None,
            ty: None,
        }
    }

    /// Plain `$name` with no index or suffix
    pub fn is_plain(&self) -> bool {
        self.index.is_none() && self.suffix.is_none()
    }

    /// Type after applying index and suffix to the declared type
    pub fn resolved_type(&self) -> Option<DataType> {
        self.ty.and_then(|base| self.project_type(base).ok())
    }

    /// Type of this reference given the variable's base type
    pub fn project_type(&self, base: DataType) -> ScriptResult<DataType> {
        let indexed = match &self.index {
            None => base,
            Some(Index::Range(..)) => match base {
                DataType::Str | DataType::IntArray | DataType::StrArray => base,
                other => return Err(ScriptError::type_mismatch("String or array", other)),
            },
            Some(Index::At(_)) => match base {
                DataType::Str => DataType::Str,
                DataType::IntArray => DataType::Int,
                DataType::StrArray => DataType::Str,
                other => return Err(ScriptError::type_mismatch("String or array", other)),
            },
        };

        match self.suffix {
            None => Ok(indexed),
            Some(suffix) => suffix.result_type(indexed),
        }
    }
}

impl fmt::Display for VarRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}", self.name)?;
        match &self.index {
            Some(Index::At(i)) => write!(f, "[{}]", i)?,
            Some(Index::Range(a, b)) => write!(f, "[{}:{}]", a, b)?,
            None => {}
        }
        if let Some(s) = self.suffix {
            write!(f, ".{}", s)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Index {
    At(IndexPart),
    /// Half-open `[start:end]`
    Range(IndexPart, IndexPart),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IndexPart {
    Lit(i64),
    Var(String),
}

impl fmt::Display for IndexPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexPart::Lit(n) => write!(f, "{}", n),
            IndexPart::Var(name) => write!(f, "${}", name),
        }
    }
}

/// Trait suffix on a reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Suffix {
    Size,
    IsEmpty,
    Upper,
    Lower,
    Trim,
}

impl Suffix {
    pub fn parse(word: &str) -> Option<Suffix> {
        match word.to_ascii_uppercase().as_str() {
            "SIZE" => Some(Suffix::Size),
            "ISEMPTY" => Some(Suffix::IsEmpty),
            "UPPER" => Some(Suffix::Upper),
            "LOWER" => Some(Suffix::Lower),
            "TRIM" => Some(Suffix::Trim),
            _ => None,
        }
    }

    pub fn result_type(self, base: DataType) -> ScriptResult<DataType> {
        match self {
            Suffix::Size | Suffix::IsEmpty => match base {
                DataType::Str | DataType::IntArray | DataType::StrArray => Ok(if self == Suffix::Size {
                    DataType::Int
                } else {
                    DataType::Bool
                }),
                other => Err(ScriptError::type_mismatch("String or array", other)),
            },
            Suffix::Upper | Suffix::Lower | Suffix::Trim => match base {
                DataType::Str => Ok(DataType::Str),
                other => Err(ScriptError::type_mismatch("String", other)),
            },
        }
    }

    /// Apply the suffix to a resolved value
    pub fn apply(self, data: Data) -> ScriptResult<Data> {
        self.result_type(data.data_type())?;
        Ok(match self {
            Suffix::Size => Data::Int(data.len().unwrap_or(0) as i64),
            Suffix::IsEmpty => Data::Bool(data.is_empty().unwrap_or(true)),
            Suffix::Upper => Data::Str(data.as_str()?.to_uppercase()),
            Suffix::Lower => Data::Str(data.as_str()?.to_lowercase()),
            Suffix::Trim => Data::Str(data.as_str()?.trim().to_string()),
        })
    }
}

impl fmt::Display for Suffix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Suffix::Size => "SIZE",
            Suffix::IsEmpty => "ISEMPTY",
            Suffix::Upper => "UPPER",
            Suffix::Lower => "LOWER",
            Suffix::Trim => "TRIM",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compare_mixed_numeric() {
        assert!(CmpOp::Lt.apply(&Data::Int(-1), &Data::UInt(0)).unwrap());
        assert!(CmpOp::Ge.apply(&Data::UInt(5), &Data::Int(5)).unwrap());
    }

    #[test]
    fn test_compare_strings_and_text_ops() {
        let hello = Data::Str("hello world".into());
        assert!(CmpOp::Contains.apply(&hello, &Data::Str("o w".into())).unwrap());
        assert!(CmpOp::StartsWith.apply(&hello, &Data::Str("hell".into())).unwrap());
        assert!(!CmpOp::EndsWith.apply(&hello, &Data::Str("hell".into())).unwrap());
        assert!(CmpOp::Lt.apply(&Data::Str("abc".into()), &Data::Str("abd".into())).unwrap());
    }

    #[test]
    fn test_compare_rejects_mixed_types() {
        assert!(CmpOp::Eq.apply(&Data::Int(1), &Data::Str("1".into())).is_err());
        assert!(CmpOp::Lt.apply(&Data::Bool(true), &Data::Bool(false)).is_err());
    }

    #[test]
    fn test_reference_projection() {
        let mut r = VarRef::named("names");
        r.index = Some(Index::At(IndexPart::Lit(0)));
        assert_eq!(r.project_type(DataType::StrArray).unwrap(), DataType::Str);

        r.suffix = Some(Suffix::Size);
        assert_eq!(r.project_type(DataType::StrArray).unwrap(), DataType::Int);

        let mut b = VarRef::named("flag");
        b.suffix = Some(Suffix::Upper);
        assert!(b.project_type(DataType::Bool).is_err());
    }
}
