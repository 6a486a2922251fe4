//! Script language: compiler, values, variables and the executor
//!
//! ```no_run
//! use stepscript_core::interpreter::{compile, run_until_done, Interpreter, InterpreterConfig};
//! use stepscript_core::host::StandardHost;
//!
//! let program = compile("INTEGER n = 2\nPRINT \"n is <$n>\"", "demo.ss")?;
//! let host = StandardHost::new(".");
//! let mut vm = Interpreter::new(Box::new(host), &InterpreterConfig::default());
//! vm.reset(&program)?;
//! run_until_done(&mut vm, &program)?;
//! # Ok::<(), stepscript_core::error::ScriptError>(())
//! ```

pub mod compiler;
pub mod executor;
pub mod expressions;
pub mod types;
pub mod variables;


pub use compiler::{compile, compile_with, CompileOptions, CompileReport};
pub use executor::{run_until_done, step, Interpreter, InterpreterConfig, Step};
pub use expressions::{Formula, NumKind, VarLookup};
pub use types::{CompiledProgram, Data, DataType, Opcode, Value};
pub use variables::{ReservedVars, VarReport, VarStore};
