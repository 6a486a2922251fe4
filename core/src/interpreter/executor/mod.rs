//! # Executor - Program-Counter Interpreter
//!
//! Runs a [`CompiledProgram`](crate::interpreter::types::CompiledProgram)
//! one instruction at a time so a controller can pause, step and inspect it.
//!
//! ## Core Principles
//!
//! 1. **Flat dispatch**: a program counter over the instruction list, no recursion
//! 2. **Arena jumps**: IF/FOR/SUB targets come from the compiled block arenas
//! 3. **Deferred resolution**: operands resolve to fresh data on every dispatch
//! 4. **Host seam**: every outside effect goes through `Host`

mod commands;
mod control;
pub mod exec_loop;
mod expressions;
mod statements;
pub mod vm;

#[cfg(test)]
mod tests;

pub use exec_loop::{run_until_done, step};
pub use vm::{Interpreter, InterpreterConfig, Step, DEFAULT_MAX_CALL_DEPTH};
