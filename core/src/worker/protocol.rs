//! Control vocabulary between a client and the worker
//!
//! One command per line in, one event per line out:
//!
//! ```text
//! > BREAKPT 12
//! < STATUS BREAKPT SET
//! > RUN
//! < STATUS RUNNING
//! < STATUS BREAK
//! < LINE 12
//! < [VAR GLOBAL :: MAIN :: total :: Integer :: 14 :: 3 :: 9 :: 10:41:07.215]
//! ```

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::interpreter::VarReport;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("empty command")]
    Empty,

    #[error("unknown command '{0}'")]
    Unknown(String),

    #[error("expected 'BREAKPT <line>|OFF', found '{0}'")]
    Breakpoint(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Run,
    Pause,
    Stop,
    Resume,
    Step,
    Reset,
    /// `None` clears the breakpoint
    Breakpoint(Option<usize>),
}

impl FromStr for Command {
    type Err = ProtocolError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let Some(keyword) = words.next() else {
            return Err(ProtocolError::Empty);
        };

        let command = match keyword.to_ascii_uppercase().as_str() {
            "RUN" => Command::Run,
            "PAUSE" => Command::Pause,
            "STOP" => Command::Stop,
            "RESUME" => Command::Resume,
            "STEP" => Command::Step,
            "RESET" => Command::Reset,
            "BREAKPT" => {
                let arg = words.next().unwrap_or_default();
                if arg.eq_ignore_ascii_case("OFF") {
                    Command::Breakpoint(None)
                } else {
                    let line = arg
                        .parse::<usize>()
                        .map_err(|_| ProtocolError::Breakpoint(arg.to_string()))?;
                    Command::Breakpoint(Some(line))
                }
            }
            other => return Err(ProtocolError::Unknown(other.to_string())),
        };

        if let Some(extra) = words.next() {
            return Err(ProtocolError::Unknown(extra.to_string()));
        }
        Ok(command)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Run => f.write_str("RUN"),
            Command::Pause => f.write_str("PAUSE"),
            Command::Stop => f.write_str("STOP"),
            Command::Resume => f.write_str("RESUME"),
            Command::Step => f.write_str("STEP"),
            Command::Reset => f.write_str("RESET"),
            Command::Breakpoint(Some(line)) => write!(f, "BREAKPT {}", line),
            Command::Breakpoint(None) => f.write_str("BREAKPT OFF"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Running,
    Paused,
    Stopped,
    Resumed,
    Stepped,
    Eof,
    Break,
    Error(String),
    BreakpointSet,
    BreakpointInvalid,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Running => f.write_str("RUNNING"),
            Status::Paused => f.write_str("PAUSED"),
            Status::Stopped => f.write_str("STOPPED"),
            Status::Resumed => f.write_str("RESUMED"),
            Status::Stepped => f.write_str("STEPPED"),
            Status::Eof => f.write_str("EOF"),
            Status::Break => f.write_str("BREAK"),
            Status::Error(msg) => write!(f, "ERROR: {}", msg),
            Status::BreakpointSet => f.write_str("BREAKPT SET"),
            Status::BreakpointInvalid => f.write_str("BREAKPT INVALID"),
        }
    }
}

/// One line sent back to the client
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Status(Status),
    Line(usize),
    Var(VarReport),
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Status(status) => write!(f, "STATUS {}", status),
            Event::Line(line) => write!(f, "LINE {}", line),
            Event::Var(report) => write!(f, "{}", report),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!("run".parse::<Command>().unwrap(), Command::Run);
        assert_eq!("  Step ".parse::<Command>().unwrap(), Command::Step);
        assert_eq!(
            "BREAKPT 12".parse::<Command>().unwrap(),
            Command::Breakpoint(Some(12))
        );
        assert_eq!(
            "breakpt off".parse::<Command>().unwrap(),
            Command::Breakpoint(None)
        );
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!("".parse::<Command>().unwrap_err(), ProtocolError::Empty);
        assert_eq!(
            "JUMP 3".parse::<Command>().unwrap_err(),
            ProtocolError::Unknown("JUMP".into())
        );
        assert_eq!(
            "BREAKPT".parse::<Command>().unwrap_err(),
            ProtocolError::Breakpoint(String::new())
        );
        assert!("BREAKPT -1".parse::<Command>().is_err());
        assert!("RUN now".parse::<Command>().is_err());
    }

    #[test]
    fn test_event_lines() {
        assert_eq!(Event::Status(Status::Eof).to_string(), "STATUS EOF");
        assert_eq!(
            Event::Status(Status::Error("boom".into())).to_string(),
            "STATUS ERROR: boom"
        );
        assert_eq!(
            Event::Status(Status::BreakpointInvalid).to_string(),
            "STATUS BREAKPT INVALID"
        );
        assert_eq!(Event::Line(7).to_string(), "LINE 7");
        assert_eq!(Command::Breakpoint(None).to_string(), "BREAKPT OFF");
    }
}
