//! Stepped execution of one compiled script
//!
//! A [`Session`] owns the program and the interpreter and turns control
//! commands into interpreter steps. While running it polls for PAUSE and
//! STOP between instructions; any other command that arrives mid-run is
//! deferred and handled once the run returns.

use std::collections::VecDeque;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::protocol::{Command, Event, Status};
use crate::error::ScriptResult;
use crate::host::Host;
use crate::interpreter::{step, CompiledProgram, Interpreter, InterpreterConfig, Step};

/// Where commands come from and events go to
pub trait Control {
    /// A command that arrived while running, if any
    fn poll(&mut self) -> Option<Command>;
    fn emit(&mut self, event: Event);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Reset and not started
    Ready,
    Paused,
    Stopped,
    Finished,
}

pub struct Session {
    id: Uuid,
    program: CompiledProgram,
    vm: Interpreter,
    state: RunState,
    /// Instruction index RUN halts before
    breakpoint: Option<usize>,
    /// Breakpoint already reported as BREAK; the next RUN executes it
    released: Option<usize>,
    deferred: VecDeque<Command>,
}

/// How a RUN ended
enum Halt {
    Eof,
    Break,
    Paused,
    Stopped,
    Failed(String),
}

impl Session {
    pub fn new(
        program: CompiledProgram,
        host: Box<dyn Host>,
        config: &InterpreterConfig,
    ) -> ScriptResult<Self> {
        let mut vm = Interpreter::new(host, config);
        vm.reset(&program)?;
        let id = Uuid::new_v4();
        info!(
            session = %id,
            script = %program.name,
            instructions = program.len(),
            startup_lines = program.startup.len(),
            "session created"
        );
        Ok(Self {
            id,
            program,
            vm,
            state: RunState::Ready,
            breakpoint: None,
            released: None,
            deferred: VecDeque::new(),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn program(&self) -> &CompiledProgram {
        &self.program
    }

    pub fn interpreter(&mut self) -> &mut Interpreter {
        &mut self.vm
    }

    /// Command deferred during the last RUN, oldest first
    pub fn next_deferred(&mut self) -> Option<Command> {
        self.deferred.pop_front()
    }

    /* ===================== Dispatch ===================== */

    pub fn handle(&mut self, command: Command, control: &mut dyn Control) {
        debug!(session = %self.id, %command, state = ?self.state, "command");

        if self.state == RunState::Stopped && command != Command::Reset {
            control.emit(Event::Status(Status::Error(
                "session is stopped; only RESET is accepted".to_string(),
            )));
            return;
        }

        match command {
            Command::Run => {
                control.emit(Event::Status(Status::Running));
                self.run(control);
            }
            Command::Resume => {
                control.emit(Event::Status(Status::Resumed));
                self.run(control);
            }
            Command::Step => self.step_once(control),
            Command::Pause => {
                if self.state == RunState::Ready {
                    self.state = RunState::Paused;
                }
                control.emit(Event::Status(Status::Paused));
            }
            Command::Stop => {
                self.state = RunState::Stopped;
                self.deferred.clear();
                info!(session = %self.id, "stopped");
                control.emit(Event::Status(Status::Stopped));
            }
            Command::Reset => self.reset(control),
            Command::Breakpoint(line) => self.set_breakpoint(line, control),
        }
    }

    /* ===================== Commands ===================== */

    fn run(&mut self, control: &mut dyn Control) {
        if self.state == RunState::Finished {
            control.emit(Event::Status(Status::Eof));
            self.report(control);
            return;
        }

        let halt = loop {
            match control.poll() {
                Some(Command::Pause) => break Halt::Paused,
                Some(Command::Stop) => break Halt::Stopped,
                Some(other) => {
                    debug!(session = %self.id, command = %other, "deferred");
                    self.deferred.push_back(other);
                }
                None => {}
            }

            let pc = self.vm.pc();
            if self.breakpoint == Some(pc) && self.released != Some(pc) {
                self.released = Some(pc);
                break Halt::Break;
            }

            match self.execute() {
                Ok(Step::Continue) => {}
                Ok(Step::Done) => break Halt::Eof,
                Err(msg) => break Halt::Failed(msg),
            }
        };

        let status = match halt {
            Halt::Eof => Status::Eof,
            Halt::Break => {
                self.state = RunState::Paused;
                Status::Break
            }
            Halt::Paused => {
                self.state = RunState::Paused;
                Status::Paused
            }
            Halt::Stopped => {
                self.state = RunState::Stopped;
                self.deferred.clear();
                Status::Stopped
            }
            Halt::Failed(msg) => Status::Error(msg),
        };
        control.emit(Event::Status(status));
        self.report(control);
    }

    fn step_once(&mut self, control: &mut dyn Control) {
        let status = match self.state {
            RunState::Finished => Status::Eof,
            _ => match self.execute() {
                Ok(Step::Continue) => {
                    self.state = RunState::Paused;
                    Status::Stepped
                }
                Ok(Step::Done) => Status::Eof,
                Err(msg) => Status::Error(msg),
            },
        };
        control.emit(Event::Status(status));
        self.report(control);
    }

    /// One interpreter step; a failure leaves the program counter in place
    fn execute(&mut self) -> Result<Step, String> {
        let result = step(&mut self.vm, &self.program);
        self.released = None;
        match result {
            Ok(Step::Done) => {
                self.state = RunState::Finished;
                info!(session = %self.id, "end of script");
                Ok(Step::Done)
            }
            Ok(Step::Continue) => Ok(Step::Continue),
            Err(err) => {
                self.state = RunState::Paused;
                warn!(session = %self.id, pc = self.vm.pc(), error = %err, "script error");
                Err(err.to_string())
            }
        }
    }

    fn reset(&mut self, control: &mut dyn Control) {
        if let Err(err) = self.vm.reset(&self.program) {
            control.emit(Event::Status(Status::Error(err.to_string())));
            return;
        }
        self.state = RunState::Ready;
        self.released = None;
        self.deferred.clear();
        info!(session = %self.id, "reset");
        self.report(control);
    }

    fn set_breakpoint(&mut self, line: Option<usize>, control: &mut dyn Control) {
        let Some(line) = line else {
            self.breakpoint = None;
            self.released = None;
            control.emit(Event::Status(Status::BreakpointSet));
            return;
        };

        match self.program.index_for_line(line) {
            Some(index) => {
                debug!(session = %self.id, line, index, "breakpoint");
                self.breakpoint = Some(index);
                self.released = None;
                control.emit(Event::Status(Status::BreakpointSet));
            }
            None => control.emit(Event::Status(Status::BreakpointInvalid)),
        }
    }

    /// `LINE n` followed by every variable written since the last report
    fn report(&mut self, control: &mut dyn Control) {
        let line = self.vm.current_line(&self.program).unwrap_or(0);
        control.emit(Event::Line(line));
        for report in self.vm.take_changes() {
            control.emit(Event::Var(report));
        }
    }
}
