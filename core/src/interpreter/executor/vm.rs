//! Interpreter state
//!
//! The interpreter holds everything that changes while a script runs:
//! - pc: index of the next instruction
//! - globals, the reserved layer and one call frame per active GOSUB
//! - the loop stack shared by all frames (each frame remembers its base)

use std::collections::HashMap;

use crate::error::{ErrorKind, ScriptError, ScriptResult};
use crate::host::Host;
use crate::interpreter::types::{CompiledProgram, CondId, Data, DataType, LoopId, SubId};
use crate::interpreter::variables::{
    ReservedVars, VarReport, VarSlot, VarStore, Writer, CURDIR, MAIN_OWNER,
};

pub const DEFAULT_MAX_CALL_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterpreterConfig {
    pub max_call_depth: usize,
    /// Seed for RANDOM; `None` draws from entropy
    pub random_seed: Option<u64>,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            random_seed: None,
        }
    }
}

/* ===================== Frames ===================== */

/// One activation: the main program (frame 0) or a subroutine call
#[derive(Debug)]
pub(super) struct CallFrame {
    pub sub: Option<SubId>,
    pub return_to: usize,
    pub locals: VarStore,
    /// "branch taken" flag per open IF block
    pub conds: HashMap<CondId, bool>,
    /// Loop stack height when the frame was entered
    pub loop_base: usize,
}

impl CallFrame {
    fn main() -> Self {
        Self {
            sub: None,
            return_to: 0,
            locals: VarStore::locals(MAIN_OWNER),
            conds: HashMap::new(),
            loop_base: 0,
        }
    }

    pub fn call(sub: SubId, owner: &str, return_to: usize, loop_base: usize) -> Self {
        Self {
            sub: Some(sub),
            return_to,
            locals: VarStore::locals(owner),
            conds: HashMap::new(),
            loop_base,
        }
    }
}

/// Run-time iteration state of a FOR
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct ActiveLoop {
    pub id: LoopId,
    /// Range bound; `None` for counted and infinite loops
    pub end: Option<i64>,
    pub step: i64,
    pub iterations: u64,
    /// Iteration limit of a counted loop
    pub cap: Option<u64>,
}

impl ActiveLoop {
    /// Whether the loop body runs with the loop variable at `value`
    pub fn admits(&self, value: i64, inclusive: bool) -> bool {
        if self.cap.is_some_and(|cap| self.iterations >= cap) {
            return false;
        }
        match self.end {
            None => true,
            Some(end) if self.step > 0 => {
                if inclusive {
                    value <= end
                } else {
                    value < end
                }
            }
            Some(end) => {
                if inclusive {
                    value >= end
                } else {
                    value > end
                }
            }
        }
    }
}

/* ===================== Interpreter ===================== */

/// Result of executing one instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// More instructions to run
    Continue,
    /// EXIT, ENDMAIN or end of the instruction list
    Done,
}

pub struct Interpreter {
    pub(super) pc: usize,
    pub(super) globals: VarStore,
    pub(super) reserved: ReservedVars,
    pub(super) frames: Vec<CallFrame>,
    pub(super) loops: Vec<ActiveLoop>,
    pub(super) host: Box<dyn Host>,
    pub(super) max_call_depth: usize,
    pub(super) finished: bool,
    /// Changed locals of frames that returned since the last report
    pub(super) retired: Vec<VarReport>,
}

impl Interpreter {
    pub fn new(host: Box<dyn Host>, config: &InterpreterConfig) -> Self {
        Self {
            pc: 0,
            globals: VarStore::globals(),
            reserved: ReservedVars::new(config.random_seed),
            frames: vec![CallFrame::main()],
            loops: Vec::new(),
            host,
            max_call_depth: config.max_call_depth,
            finished: false,
            retired: Vec::new(),
        }
    }

    /// Prepare a fresh run of `program`: globals at their zero values,
    /// reserved variables reinitialised, filesystem back at its root.
    pub fn reset(&mut self, program: &CompiledProgram) -> ScriptResult<()> {
        self.pc = 0;
        self.finished = false;
        self.loops.clear();
        self.retired.clear();
        self.frames = vec![CallFrame::main()];

        self.globals.clear();
        for (name, ty) in &program.globals {
            self.globals.allocate(name, *ty)?;
        }
        for name in program.generated_loop_vars(None) {
            self.globals.hide(name)?;
        }

        self.reserved.reset(&program.name);
        let fs = self.host.filesystem();
        fs.reset();
        let cwd = fs.current_dir();
        self.reserved
            .produce(CURDIR, Data::Str(cwd), Writer { index: 0, line: 0 })
    }

    pub fn pc(&self) -> usize {
        self.pc
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Active GOSUB calls
    pub fn call_depth(&self) -> usize {
        self.frames.len() - 1
    }

    /// Line of the next instruction, or of the last one once the pc ran off
    pub fn current_line(&self, program: &CompiledProgram) -> Option<usize> {
        program
            .line_of(self.pc)
            .or_else(|| program.instructions.last().map(|i| i.line))
    }

    /// Visible value of a variable as the current frame sees it
    pub fn value(&mut self, name: &str) -> ScriptResult<Data> {
        self.read_var(name)
    }

    /// Every variable written since the previous call, then clear the flags.
    /// Order: globals, live locals (outermost frame first), locals of frames
    /// that have returned, reserved.
    pub fn take_changes(&mut self) -> Vec<VarReport> {
        let mut reports: Vec<VarReport> =
            self.globals.changed_since().map(VarSlot::report).collect();
        for frame in &self.frames {
            reports.extend(frame.locals.changed_since().map(VarSlot::report));
        }
        reports.append(&mut self.retired);
        reports.extend(self.reserved.store().changed_since().map(VarSlot::report));

        self.globals.reset_change_flags();
        for frame in &mut self.frames {
            frame.locals.reset_change_flags();
        }
        self.reserved.reset_change_flags();
        reports
    }

    /* ===================== Variable Access ===================== */

    pub(super) fn frame(&self) -> &CallFrame {
        // frame 0 is never popped
        &self.frames[self.frames.len() - 1]
    }

    pub(super) fn frame_mut(&mut self) -> &mut CallFrame {
        let top = self.frames.len() - 1;
        &mut self.frames[top]
    }

    pub(super) fn read_var(&mut self, name: &str) -> ScriptResult<Data> {
        if let Ok(slot) = self.frame().locals.get(name) {
            return Ok(slot.visible());
        }
        if let Ok(slot) = self.globals.get(name) {
            return Ok(slot.visible());
        }
        if ReservedVars::is_reserved(name) {
            return self.reserved.read(name);
        }
        Err(ScriptError::unknown_variable(name))
    }

    pub(super) fn write_var(&mut self, name: &str, data: Data, writer: Writer) -> ScriptResult<()> {
        if self.frame().locals.contains(name) {
            return self.frame_mut().locals.set(name, data, writer);
        }
        if self.globals.contains(name) {
            return self.globals.set(name, data, writer);
        }
        if ReservedVars::is_reserved(name) {
            return Err(ErrorKind::ReadOnly(name.to_string()).into());
        }
        Err(ScriptError::unknown_variable(name))
    }

    /// Slot for in-place updates. Reserved slots are only reachable when
    /// `mask_only` is set, and then only RESPONSE.
    pub(super) fn slot_mut(&mut self, name: &str, mask_only: bool) -> ScriptResult<&mut VarSlot> {
        if self.frame().locals.contains(name) {
            return self.frame_mut().locals.get_mut(name);
        }
        if self.globals.contains(name) {
            return self.globals.get_mut(name);
        }
        if ReservedVars::is_reserved(name) {
            if !mask_only {
                return Err(ErrorKind::ReadOnly(name.to_string()).into());
            }
            return self.reserved.slot_mut(name);
        }
        Err(ScriptError::unknown_variable(name))
    }

    /// Make sure a declared variable exists in the current frame
    pub(super) fn declare(&mut self, name: &str, ty: DataType) -> ScriptResult<()> {
        if self.frame().sub.is_some() {
            self.frame_mut().locals.allocate(name, ty)?;
        } else {
            self.globals.allocate(name, ty)?;
        }
        Ok(())
    }
}
