//! Script error type
//!
//! Every failure in the compiler, the expression evaluator and the
//! interpreter is a [`ScriptError`]: one [`ErrorKind`] plus a trace of
//! context strings that grows as the error propagates outwards.

use std::fmt;
use thiserror::Error;

/// What went wrong, independent of where.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ErrorKind {
    #[error("syntax error: {0}")]
    Syntax(String),

    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    #[error("unknown variable '{0}'")]
    UnknownVariable(String),

    #[error("mismatched nesting: {0}")]
    Nesting(String),

    #[error("wrong number of arguments: expected {expected}, found {found}")]
    Arity { expected: String, found: usize },

    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    #[error("variable '{0}' is read-only")]
    ReadOnly(String),

    #[error("arithmetic error: {0}")]
    Arithmetic(String),

    #[error("index {index} out of range for '{name}' (length {len})")]
    IndexOutOfRange { name: String, index: i64, len: usize },

    #[error("call depth limit of {0} exceeded")]
    CallDepth(usize),

    #[error("{0}")]
    Collaborator(String),

    #[error("path '{0}' escapes the script root")]
    PathEscape(String),

    #[error("i/o error: {0}")]
    Io(String),
}

/// Error with an accumulating, human readable trace.
///
/// `context` entries are stored innermost first; `Display` prints them
/// outermost first followed by the kind, e.g.
/// `line 4: SET $x: arithmetic error: division by zero`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptError {
    pub kind: ErrorKind,
    pub line: Option<usize>,
    trace: Vec<String>,
}

pub type ScriptResult<T> = Result<T, ScriptError>;

impl ScriptError {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            line: None,
            trace: Vec::new(),
        }
    }

    /// Prefix another piece of context onto the trace.
    pub fn context(mut self, ctx: impl Into<String>) -> Self {
        self.trace.push(ctx.into());
        self
    }

    /// Attach the script line, unless a more precise one is already set.
    pub fn at_line(mut self, line: usize) -> Self {
        if self.line.is_none() {
            self.line = Some(line);
            self.trace.push(format!("line {}", line));
        }
        self
    }

    pub fn trace(&self) -> impl Iterator<Item = &str> {
        self.trace.iter().rev().map(String::as_str)
    }

    pub fn syntax(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Syntax(msg.into()))
    }

    pub fn nesting(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Nesting(msg.into()))
    }

    pub fn arithmetic(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Arithmetic(msg.into()))
    }

    pub fn unknown_variable(name: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnknownVariable(name.into()))
    }

    pub fn type_mismatch(expected: impl fmt::Display, found: impl fmt::Display) -> Self {
        Self::new(ErrorKind::TypeMismatch {
            expected: expected.to_string(),
            found: found.to_string(),
        })
    }

    pub fn arity(expected: impl Into<String>, found: usize) -> Self {
        Self::new(ErrorKind::Arity {
            expected: expected.into(),
            found,
        })
    }

    pub fn collaborator(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Collaborator(msg.into()))
    }

    pub fn io(err: std::io::Error) -> Self {
        Self::new(ErrorKind::Io(err.to_string()))
    }

    /// Collaborator and I/O failures are reported through STATUS/RESPONSE
    /// instead of stopping the script.
    pub fn is_recoverable(&self) -> bool {
        matches!(self.kind, ErrorKind::Collaborator(_) | ErrorKind::Io(_))
    }
}

impl From<ErrorKind> for ScriptError {
    fn from(kind: ErrorKind) -> Self {
        ScriptError::new(kind)
    }
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for ctx in self.trace() {
            write!(f, "{}: ", ctx)?;
        }
        write!(f, "{}", self.kind)
    }
}

impl std::error::Error for ScriptError {}

/// `.context()` on results, in the manner of `anyhow::Context`.
pub trait ResultExt<T> {
    fn context(self, ctx: impl Into<String>) -> ScriptResult<T>;
    fn with_context<F: FnOnce() -> String>(self, f: F) -> ScriptResult<T>;
}

impl<T> ResultExt<T> for ScriptResult<T> {
    fn context(self, ctx: impl Into<String>) -> ScriptResult<T> {
        self.map_err(|e| e.context(ctx))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> ScriptResult<T> {
        self.map_err(|e| e.context(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_prints_outermost_first() {
        let err = ScriptError::arithmetic("division by zero")
            .context("formula '1 / 0'")
            .context("SET $x")
            .at_line(7);

        assert_eq!(
            err.to_string(),
            "line 7: SET $x: formula '1 / 0': arithmetic error: division by zero"
        );
        assert_eq!(err.line, Some(7));
    }

    #[test]
    fn test_recoverable_kinds() {
        assert!(ScriptError::collaborator("no sheet").is_recoverable());
        assert!(ScriptError::new(ErrorKind::Io("denied".into())).is_recoverable());
        assert!(!ScriptError::new(ErrorKind::PathEscape("..".into())).is_recoverable());
        assert!(!ScriptError::arithmetic("division by zero").is_recoverable());
    }

    #[test]
    fn test_first_line_wins() {
        let err = ScriptError::syntax("bad").at_line(3).at_line(9);
        assert_eq!(err.line, Some(3));
        assert_eq!(err.to_string(), "line 3: syntax error: bad");
    }
}
