//! Core execution loop
//!
//! `step()` executes exactly one instruction: it resolves the operands,
//! dispatches on the opcode and moves the program counter. A failing
//! instruction leaves the program counter where it was.
//!
//! ## Function Organization
//! 1. run_until_done() - Top-level driver (calls step repeatedly)
//! 2. step() - One dispatch
//! 3. dispatch() - Opcode to handler

use tracing::trace;

use super::control::Flow;
use super::vm::{Interpreter, Step};
use crate::error::ScriptResult;
use crate::interpreter::types::{CompiledProgram, Instruction, Opcode};
use crate::interpreter::variables::Writer;

/* ===================== Public API ===================== */

/// Run until EXIT, ENDMAIN, the end of the program or the first error
pub fn run_until_done(vm: &mut Interpreter, program: &CompiledProgram) -> ScriptResult<()> {
    loop {
        match step(vm, program)? {
            Step::Continue => continue,
            Step::Done => return Ok(()),
        }
    }
}

/// Execute the instruction at the program counter
pub fn step(vm: &mut Interpreter, program: &CompiledProgram) -> ScriptResult<Step> {
    if vm.finished {
        return Ok(Step::Done);
    }
    let Some(ins) = program.instruction(vm.pc) else {
        vm.finished = true;
        return Ok(Step::Done);
    };

    let writer = Writer {
        index: vm.pc,
        line: ins.line,
    };
    trace!(pc = vm.pc, line = ins.line, op = %ins.opcode, "dispatch");

    let flow = dispatch(vm, program, ins, writer)
        .map_err(|e| e.context(ins.opcode.keyword()).at_line(ins.line))?;

    match flow {
        Flow::Next => vm.pc += 1,
        Flow::Jump(target) => vm.pc = target,
        Flow::Finish => {
            vm.finished = true;
            return Ok(Step::Done);
        }
    }

    if vm.pc >= program.len() {
        vm.finished = true;
        return Ok(Step::Done);
    }
    Ok(Step::Continue)
}

/* ===================== Dispatch ===================== */

fn dispatch(
    vm: &mut Interpreter,
    program: &CompiledProgram,
    ins: &Instruction,
    writer: Writer,
) -> ScriptResult<Flow> {
    match ins.opcode {
        op if op.declared_type().is_some() => vm.exec_declare(ins, writer)?,
        Opcode::Set => vm.exec_set(ins, writer)?,

        Opcode::Filter => vm.exec_filter(ins, writer)?,
        Opcode::Reset => vm.exec_reset_mask(ins, writer)?,
        Opcode::Pop => vm.exec_pop(ins, writer)?,
        op if op.is_array_mutator() => vm.exec_mutator(ins, writer)?,

        Opcode::If | Opcode::ElseIf | Opcode::Else | Opcode::EndIf => {
            return vm.exec_conditional(program, ins)
        }
        Opcode::For
        | Opcode::Next
        | Opcode::EndFor
        | Opcode::Break
        | Opcode::Skip
        | Opcode::BreakIf
        | Opcode::SkipIf => return vm.exec_loop(program, ins, writer),
        Opcode::Sub | Opcode::EndSub | Opcode::GoSub | Opcode::Return => {
            return vm.exec_sub(program, ins, writer)
        }
        Opcode::Exit | Opcode::EndMain => return Ok(Flow::Finish),

        _ => vm.exec_command(ins, writer)?,
    }
    Ok(Flow::Next)
}
