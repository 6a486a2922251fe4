//! Runtime data and the closed set of data types

use crate::error::{ScriptError, ScriptResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Declared type of a variable or operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Int,
    UInt,
    Bool,
    Str,
    IntArray,
    StrArray,
}

impl DataType {
    /// Name used in reports and error messages
    pub fn name(self) -> &'static str {
        match self {
            DataType::Int => "Integer",
            DataType::UInt => "Unsigned",
            DataType::Bool => "Boolean",
            DataType::Str => "String",
            DataType::IntArray => "IntArray",
            DataType::StrArray => "StrArray",
        }
    }

    /// Map a declaration keyword (`INTEGER`, `STRARRAY`, ...) to its type
    pub fn from_keyword(word: &str) -> Option<DataType> {
        match word.to_ascii_uppercase().as_str() {
            "INTEGER" => Some(DataType::Int),
            "UNSIGNED" => Some(DataType::UInt),
            "BOOLEAN" => Some(DataType::Bool),
            "STRING" => Some(DataType::Str),
            "INTARRAY" => Some(DataType::IntArray),
            "STRARRAY" => Some(DataType::StrArray),
            _ => None,
        }
    }

    pub fn is_array(self) -> bool {
        matches!(self, DataType::IntArray | DataType::StrArray)
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, DataType::Int | DataType::UInt)
    }

    /// Element type of a sequence type
    pub fn element(self) -> Option<DataType> {
        match self {
            DataType::IntArray => Some(DataType::Int),
            DataType::StrArray => Some(DataType::Str),
            _ => None,
        }
    }

    /// Zero value a freshly allocated slot holds
    pub fn default_data(self) -> Data {
        match self {
            DataType::Int => Data::Int(0),
            DataType::UInt => Data::UInt(0),
            DataType::Bool => Data::Bool(false),
            DataType::Str => Data::Str(String::new()),
            DataType::IntArray => Data::IntArray(Vec::new()),
            DataType::StrArray => Data::StrArray(Vec::new()),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A fully resolved value. Exactly one payload per type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v")]
pub enum Data {
    Int(i64),
    UInt(u32),
    Bool(bool),
    Str(String),
    IntArray(Vec<i64>),
    StrArray(Vec<String>),
}

impl Data {
    pub fn data_type(&self) -> DataType {
        match self {
            Data::Int(_) => DataType::Int,
            Data::UInt(_) => DataType::UInt,
            Data::Bool(_) => DataType::Bool,
            Data::Str(_) => DataType::Str,
            Data::IntArray(_) => DataType::IntArray,
            Data::StrArray(_) => DataType::StrArray,
        }
    }

    /// Numeric view of an Int or UInt
    pub fn as_int(&self) -> ScriptResult<i64> {
        match self {
            Data::Int(v) => Ok(*v),
            Data::UInt(v) => Ok(i64::from(*v)),
            other => Err(ScriptError::type_mismatch("Integer", other.data_type())),
        }
    }

    pub fn as_bool(&self) -> ScriptResult<bool> {
        match self {
            Data::Bool(b) => Ok(*b),
            other => Err(ScriptError::type_mismatch("Boolean", other.data_type())),
        }
    }

    pub fn as_str(&self) -> ScriptResult<&str> {
        match self {
            Data::Str(s) => Ok(s),
            other => Err(ScriptError::type_mismatch("String", other.data_type())),
        }
    }

    /// Length of a string (in chars) or a sequence
    pub fn len(&self) -> Option<usize> {
        match self {
            Data::Str(s) => Some(s.chars().count()),
            Data::IntArray(v) => Some(v.len()),
            Data::StrArray(v) => Some(v.len()),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> Option<bool> {
        self.len().map(|n| n == 0)
    }

    /// Convert to `ty`, following the assignment rules:
    /// Integer and Unsigned convert into each other when the value fits,
    /// every scalar renders into a String, IntArray renders into StrArray.
    pub fn coerce(self, ty: DataType) -> ScriptResult<Data> {
        if self.data_type() == ty {
            return Ok(self);
        }

        match (self, ty) {
            (Data::UInt(v), DataType::Int) => Ok(Data::Int(i64::from(v))),
            (Data::Int(v), DataType::UInt) => u32::try_from(v).map(Data::UInt).map_err(|_| {
                ScriptError::arithmetic(format!("value {} does not fit in Unsigned", v))
            }),
            (Data::IntArray(v), DataType::StrArray) => Ok(Data::StrArray(
                v.into_iter().map(|n| n.to_string()).collect(),
            )),
            (scalar @ (Data::Int(_) | Data::UInt(_) | Data::Bool(_)), DataType::Str) => {
                Ok(Data::Str(scalar.to_string()))
            }
            (other, ty) => Err(ScriptError::type_mismatch(ty, other.data_type())),
        }
    }
}

impl fmt::Display for Data {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Data::Int(v) => write!(f, "{}", v),
            Data::UInt(v) => write!(f, "{}", v),
            Data::Bool(b) => write!(f, "{}", b),
            Data::Str(s) => f.write_str(s),
            Data::IntArray(items) => {
                let parts: Vec<String> = items.iter().map(|n| n.to_string()).collect();
                write!(f, "{{{}}}", parts.join(", "))
            }
            Data::StrArray(items) => {
                let parts: Vec<String> = items.iter().map(|s| format!("\"{}\"", s)).collect();
                write!(f, "{{{}}}", parts.join(", "))
            }
        }
    }
}
