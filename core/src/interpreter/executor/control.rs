//! Control transfer: conditionals, loops and subroutine calls
//!
//! Every handler returns a [`Flow`] naming the next instruction. Jump
//! targets come from the block arenas the compiler filled in.

use tracing::debug;

use super::statements::target_ref;
use super::vm::{ActiveLoop, CallFrame, Interpreter};
use crate::error::{ErrorKind, ScriptError, ScriptResult};
use crate::interpreter::types::{
    BlockRef, CompiledProgram, CondBlock, CondId, Data, Instruction, LoopDef, LoopId, LoopKind,
    Opcode, SubDef, SubId, Value,
};
use crate::interpreter::variables::{Writer, RETVAL};

/// Where execution continues after an instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Flow {
    Next,
    Jump(usize),
    Finish,
}

/* ===================== Block Lookup ===================== */

fn unresolved(ins: &Instruction) -> ScriptError {
    ScriptError::nesting(format!("{} has no resolved block", ins.opcode))
}

fn cond_block<'p>(
    program: &'p CompiledProgram,
    ins: &Instruction,
) -> ScriptResult<(CondId, &'p CondBlock)> {
    match ins.block {
        Some(BlockRef::Cond(id)) => program
            .conditionals
            .get(id)
            .map(|b| (id, b))
            .ok_or_else(|| unresolved(ins)),
        _ => Err(unresolved(ins)),
    }
}

fn loop_def<'p>(
    program: &'p CompiledProgram,
    ins: &Instruction,
) -> ScriptResult<(LoopId, &'p LoopDef)> {
    match ins.block {
        Some(BlockRef::Loop(id)) => program
            .loops
            .get(id)
            .map(|d| (id, d))
            .ok_or_else(|| unresolved(ins)),
        _ => Err(unresolved(ins)),
    }
}

fn sub_def<'p>(
    program: &'p CompiledProgram,
    ins: &Instruction,
) -> ScriptResult<(SubId, &'p SubDef)> {
    match ins.block {
        Some(BlockRef::Sub(id)) => program
            .subroutines
            .get(id)
            .map(|d| (id, d))
            .ok_or_else(|| unresolved(ins)),
        _ => Err(unresolved(ins)),
    }
}

fn condition_param(ins: &Instruction) -> ScriptResult<&Value> {
    ins.params.first().ok_or_else(|| ScriptError::arity("1", 0))
}

impl Interpreter {
    /* ===================== Conditionals ===================== */

    pub(super) fn exec_conditional(
        &mut self,
        program: &CompiledProgram,
        ins: &Instruction,
    ) -> ScriptResult<Flow> {
        let (id, block) = cond_block(program, ins)?;
        let taken = self.frame().conds.get(&id).copied().unwrap_or(false);

        match ins.opcode {
            Opcode::If => {
                let hit = self.resolve_value(condition_param(ins)?)?.as_bool()?;
                self.frame_mut().conds.insert(id, hit);
                Ok(self.branch(block, hit))
            }
            // A branch already ran: skip to ENDIF without evaluating
            Opcode::ElseIf | Opcode::Else if taken => Ok(Flow::Jump(block.end)),
            Opcode::ElseIf => {
                let hit = self.resolve_value(condition_param(ins)?)?.as_bool()?;
                self.frame_mut().conds.insert(id, hit);
                Ok(self.branch(block, hit))
            }
            Opcode::Else => {
                self.frame_mut().conds.insert(id, true);
                Ok(Flow::Next)
            }
            Opcode::EndIf => {
                self.frame_mut().conds.remove(&id);
                Ok(Flow::Next)
            }
            other => Err(ScriptError::syntax(format!("{} is not a conditional", other))),
        }
    }

    fn branch(&self, block: &CondBlock, hit: bool) -> Flow {
        if hit {
            Flow::Next
        } else {
            Flow::Jump(block.next_branch_after(self.pc))
        }
    }

    /* ===================== Loops ===================== */

    pub(super) fn exec_loop(
        &mut self,
        program: &CompiledProgram,
        ins: &Instruction,
        writer: Writer,
    ) -> ScriptResult<Flow> {
        let (id, def) = loop_def(program, ins)?;

        match ins.opcode {
            Opcode::For => self.enter_loop(id, def, ins, writer),
            Opcode::Next => self.next_iteration(id, def, writer),
            Opcode::EndFor => {
                if self.loops.len() > self.frame().loop_base
                    && self.loops.last().is_some_and(|l| l.id == id)
                {
                    self.loops.pop();
                }
                Ok(Flow::Next)
            }
            Opcode::Break => Ok(self.break_loop(id, def)),
            Opcode::Skip => Ok(Flow::Jump(def.next)),
            Opcode::BreakIf | Opcode::SkipIf => {
                let hit = self.resolve_value(condition_param(ins)?)?.as_bool()?;
                Ok(match (hit, ins.opcode) {
                    (false, _) => Flow::Next,
                    (true, Opcode::BreakIf) => self.break_loop(id, def),
                    (true, _) => Flow::Jump(def.next),
                })
            }
            other => Err(ScriptError::syntax(format!("{} is not a loop instruction", other))),
        }
    }

    fn enter_loop(
        &mut self,
        id: LoopId,
        def: &LoopDef,
        ins: &Instruction,
        writer: Writer,
    ) -> ScriptResult<Flow> {
        // Left over from an exit that bypassed ENDFOR. Entries below the
        // frame base belong to callers, possibly to this same FOR.
        let base = self.frame().loop_base;
        while self.loops.len() > base && self.loops.last().is_some_and(|l| l.id == id) {
            self.loops.pop();
        }

        let var = target_ref(ins, 0)?.name.clone();
        let args = self.resolve_all(&ins.params[1..])?;
        let int_arg = |pos: usize| -> ScriptResult<i64> {
            args.get(pos)
                .ok_or_else(|| ScriptError::arity((pos + 1).to_string(), args.len()))?
                .as_int()
        };

        let (start, active) = match def.kind {
            LoopKind::Range => {
                let step = int_arg(2)?;
                if step == 0 {
                    return Err(ScriptError::arithmetic("FOR step must not be zero"));
                }
                let active = ActiveLoop {
                    id,
                    end: Some(int_arg(1)?),
                    step,
                    iterations: 0,
                    cap: None,
                };
                (int_arg(0)?, active)
            }
            LoopKind::Counted => {
                let count = int_arg(0)?.max(0);
                let active = ActiveLoop {
                    id,
                    end: None,
                    step: 1,
                    iterations: 0,
                    cap: Some(count as u64),
                };
                (0, active)
            }
            LoopKind::Infinite => {
                let active = ActiveLoop {
                    id,
                    end: None,
                    step: 1,
                    iterations: 0,
                    cap: None,
                };
                (0, active)
            }
        };

        self.write_var(&var, Data::Int(start), writer)?;
        if !active.admits(start, def.inclusive) {
            return Ok(Flow::Jump(def.end + 1));
        }
        debug!(var = %var, start, kind = ?def.kind, "enter loop");
        self.loops.push(active);
        Ok(Flow::Next)
    }

    /// NEXT: advance the loop variable and either go round again or fall
    /// through to ENDFOR
    fn next_iteration(&mut self, id: LoopId, def: &LoopDef, writer: Writer) -> ScriptResult<Flow> {
        let base = self.frame().loop_base;
        let own = self.loops.get(base..).unwrap_or_default();
        let Some(active) = own.last().filter(|l| l.id == id).cloned() else {
            return Err(ScriptError::nesting("NEXT without an active FOR"));
        };

        let current = self.read_var(&def.var)?.as_int()?;
        let next = current.checked_add(active.step).ok_or_else(|| {
            ScriptError::arithmetic(format!("loop variable '{}' overflowed", def.var))
        })?;
        self.write_var(&def.var, Data::Int(next), writer)?;

        let mut advanced = active;
        advanced.iterations += 1;
        let again = advanced.admits(next, def.inclusive);
        if let Some(top) = self.loops.last_mut() {
            *top = advanced;
        }

        Ok(if again {
            Flow::Jump(def.start + 1)
        } else {
            Flow::Jump(def.end)
        })
    }

    /// Pop the loop (and anything nested above it) and continue past ENDFOR
    fn break_loop(&mut self, id: LoopId, def: &LoopDef) -> Flow {
        let base = self.frame().loop_base;
        let own = self.loops.get(base..).unwrap_or_default();
        if let Some(pos) = own.iter().rposition(|l| l.id == id) {
            self.loops.truncate(base + pos);
        }
        Flow::Jump(def.end + 1)
    }

    /* ===================== Subroutines ===================== */

    pub(super) fn exec_sub(
        &mut self,
        program: &CompiledProgram,
        ins: &Instruction,
        writer: Writer,
    ) -> ScriptResult<Flow> {
        let (id, def) = sub_def(program, ins)?;

        match ins.opcode {
            // Reached by falling through, not by GOSUB
            Opcode::Sub => Ok(Flow::Jump(def.end + 1)),
            Opcode::GoSub => self.call(program, id, def),
            Opcode::Return => {
                if let Some(value) = ins.params.first() {
                    let value = self.resolve_value(value)?.as_int()?;
                    self.reserved.produce(RETVAL, Data::Int(value), writer)?;
                }
                self.return_from_sub()
            }
            Opcode::EndSub => self.return_from_sub(),
            other => Err(ScriptError::syntax(format!(
                "{} is not a subroutine instruction",
                other
            ))),
        }
    }

    fn call(&mut self, program: &CompiledProgram, id: SubId, def: &SubDef) -> ScriptResult<Flow> {
        let depth = self.call_depth();
        if depth >= self.max_call_depth {
            return Err(ErrorKind::CallDepth(self.max_call_depth).into());
        }

        let mut frame = CallFrame::call(id, &def.name, self.pc + 1, self.loops.len());
        for (name, ty) in &def.locals {
            frame.locals.allocate(name, *ty)?;
        }
        for name in program.generated_loop_vars(Some(id)) {
            frame.locals.hide(name)?;
        }
        self.frames.push(frame);
        debug!(sub = %def.name, depth = depth + 1, "gosub");
        Ok(Flow::Jump(def.start + 1))
    }

    fn return_from_sub(&mut self) -> ScriptResult<Flow> {
        if self.frames.len() <= 1 {
            return Err(ScriptError::nesting("RETURN without an active GOSUB"));
        }
        let frame = self
            .frames
            .pop()
            .ok_or_else(|| ScriptError::nesting("RETURN without an active GOSUB"))?;

        self.loops.truncate(frame.loop_base);
        self.retired
            .extend(frame.locals.changed_since().map(|slot| slot.report()));
        Ok(Flow::Jump(frame.return_to))
    }
}
