//! Collaborator commands
//!
//! Resolved arguments go to the [`Host`](crate::host::Host). Success sets
//! STATUS to 0; a collaborator or I/O failure sets STATUS to -1 and puts the
//! message in RESPONSE. Any other error (a path escaping the root, a bad
//! argument) aborts the dispatch.

use tracing::warn;

use super::expressions::render;
use super::vm::Interpreter;
use crate::error::{ScriptError, ScriptResult};
use crate::host::{OpenMode, SheetQuery, TextSource};
use crate::interpreter::types::{Data, Instruction, Opcode};
use crate::interpreter::variables::{Writer, CURDIR, OCRTEXT, RESPONSE, STATUS};

/// What a successful collaborator call hands back to the script
enum Output {
    Nothing,
    Response(Vec<String>),
    CurDir(String),
    OcrText(String),
}

fn str_arg(args: &[Data], pos: usize) -> ScriptResult<String> {
    args.get(pos)
        .map(render)
        .ok_or_else(|| ScriptError::arity((pos + 1).to_string(), args.len()))
}

fn int_arg(args: &[Data], pos: usize) -> ScriptResult<i64> {
    args.get(pos)
        .ok_or_else(|| ScriptError::arity((pos + 1).to_string(), args.len()))?
        .as_int()
}

fn joined(args: &[Data]) -> String {
    args.iter().map(render).collect::<Vec<_>>().join(" ")
}

impl Interpreter {
    pub(super) fn exec_command(&mut self, ins: &Instruction, writer: Writer) -> ScriptResult<()> {
        let args = self.resolve_all(&ins.params)?;

        if ins.opcode == Opcode::Print {
            self.host.print(&joined(&args));
            return Ok(());
        }

        match self.call_host(ins, &args) {
            Ok(output) => {
                self.reserved.produce(STATUS, Data::Int(0), writer)?;
                match output {
                    Output::Nothing => {}
                    Output::Response(lines) => {
                        self.reserved.produce(RESPONSE, Data::StrArray(lines), writer)?
                    }
                    Output::CurDir(dir) => self.reserved.produce(CURDIR, Data::Str(dir), writer)?,
                    Output::OcrText(text) => {
                        self.reserved.produce(OCRTEXT, Data::Str(text), writer)?
                    }
                }
                Ok(())
            }
            Err(err) if err.is_recoverable() => {
                warn!(op = %ins.opcode, line = ins.line, error = %err, "collaborator failed");
                self.reserved.produce(STATUS, Data::Int(-1), writer)?;
                self.reserved
                    .produce(RESPONSE, Data::StrArray(vec![err.to_string()]), writer)
            }
            Err(err) => Err(err),
        }
    }

    fn call_host(&mut self, ins: &Instruction, args: &[Data]) -> ScriptResult<Output> {
        let host = self.host.as_mut();
        let output = match ins.opcode {
            Opcode::Cd => Output::CurDir(host.filesystem().change_dir(&str_arg(args, 0)?)?),
            Opcode::MkDir => {
                host.filesystem().make_dir(&str_arg(args, 0)?)?;
                Output::Nothing
            }
            Opcode::RmDir => {
                host.filesystem().remove_dir(&str_arg(args, 0)?)?;
                Output::Nothing
            }
            Opcode::Delete => {
                host.filesystem().delete(&str_arg(args, 0)?)?;
                Output::Nothing
            }
            Opcode::FList => {
                let pattern = args.first().map(render);
                Output::Response(host.filesystem().list(pattern.as_deref())?)
            }
            Opcode::FOpen => {
                let path = str_arg(args, 0)?;
                let mode = match args.get(1).map(render) {
                    None => OpenMode::Read,
                    Some(mode) => OpenMode::parse(&mode).ok_or_else(|| {
                        ScriptError::collaborator(format!("unknown file mode '{}'", mode))
                    })?,
                };
                host.filesystem().open(&path, mode)?;
                Output::Nothing
            }
            Opcode::FClose => {
                host.filesystem().close()?;
                Output::Nothing
            }
            Opcode::FRead => match host.filesystem().read_line()? {
                Some(line) => Output::Response(vec![line]),
                None => return Err(ScriptError::collaborator("end of file")),
            },
            Opcode::FWrite => {
                host.filesystem().write(&joined(args))?;
                Output::Nothing
            }
            Opcode::Cell => Output::Response(host.sheet(&SheetQuery::Cell {
                row: int_arg(args, 0)?,
                column: int_arg(args, 1)?,
            })?),
            Opcode::Row => Output::Response(host.sheet(&SheetQuery::Row(int_arg(args, 0)?))?),
            Opcode::Column => {
                Output::Response(host.sheet(&SheetQuery::Column(int_arg(args, 0)?))?)
            }
            Opcode::Clipboard => Output::Response(host.text(&TextSource::Clipboard)?),
            Opcode::Pdf => Output::Response(host.text(&TextSource::Pdf(str_arg(args, 0)?))?),
            Opcode::Ocr => Output::OcrText(host.ocr(&str_arg(args, 0)?)?),
            Opcode::Option => {
                let name = ins
                    .option
                    .as_deref()
                    .ok_or_else(|| ScriptError::syntax("option command without a name"))?;
                Output::Response(host.option(name, args)?)
            }
            other => {
                return Err(ScriptError::syntax(format!(
                    "{} is not a collaborator command",
                    other
                )))
            }
        };
        Ok(output)
    }
}
