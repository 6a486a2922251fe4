//! Type definitions shared by the compiler and the executor
//!
//! - Runtime data (`Data`, `DataType`)
//! - Operands (`Value`, `VarRef`, `Expr`, `Condition`)
//! - The compiled program and its block arenas

pub mod operand;
pub mod program;
pub mod values;

pub use operand::{CmpOp, Condition, Expr, Index, IndexPart, Suffix, Value, VarRef};
pub use program::{
    BlockRef, CompiledProgram, CondBlock, CondId, Instruction, LoopDef, LoopId, LoopKind, Opcode,
    StartupLine, SubDef, SubId,
};
pub use values::{Data, DataType};
