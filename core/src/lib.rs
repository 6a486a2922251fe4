//! stepscript: line-oriented automation scripts with a steppable,
//! remotely controlled interpreter.
//!
//! - [`interpreter`]: compiler, expression evaluator, variable store and
//!   the program-counter interpreter
//! - [`host`]: the seam to everything outside the interpreter
//! - [`worker`]: stepped-execution sessions, the worker thread and the
//!   TCP front end

pub mod cli;
pub mod config;
pub mod error;
pub mod host;
pub mod interpreter;
pub mod worker;

pub use error::{ErrorKind, ScriptError, ScriptResult};
