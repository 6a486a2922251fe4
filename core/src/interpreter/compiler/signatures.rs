//! Fixed argument signatures per opcode
//!
//! Array mutators list the arguments after the target; control-flow and
//! declaration opcodes are parsed by hand and have no entry here.

use crate::error::{ScriptError, ScriptResult};
use crate::host::ArgKind;
use crate::interpreter::types::{Opcode, Value};

#[derive(Debug, Clone, Copy)]
pub struct Signature {
    pub params: &'static [ArgKind],
    /// Leading parameters that must be present
    pub required: usize,
    /// Last parameter kind may repeat
    pub variadic: bool,
}

const fn exact(params: &'static [ArgKind]) -> Signature {
    Signature {
        params,
        required: params.len(),
        variadic: false,
    }
}

const fn optional(params: &'static [ArgKind], required: usize) -> Signature {
    Signature {
        params,
        required,
        variadic: false,
    }
}

const fn variadic(params: &'static [ArgKind], required: usize) -> Signature {
    Signature {
        params,
        required,
        variadic: true,
    }
}

const NONE: &[ArgKind] = &[];
const ANY: &[ArgKind] = &[ArgKind::Any];
const STRING: &[ArgKind] = &[ArgKind::String];
const INT: &[ArgKind] = &[ArgKind::Int];

pub fn for_opcode(op: Opcode) -> Option<Signature> {
    let sig = match op {
        Opcode::Print => variadic(ANY, 0),
        Opcode::Cd | Opcode::MkDir | Opcode::RmDir | Opcode::Delete => exact(STRING),
        Opcode::FList => optional(STRING, 0),
        Opcode::FOpen => optional(&[ArgKind::String, ArgKind::String], 1),
        Opcode::FClose | Opcode::FRead | Opcode::Clipboard => exact(NONE),
        Opcode::FWrite => variadic(ANY, 1),
        Opcode::Cell => exact(&[ArgKind::Int, ArgKind::Int]),
        Opcode::Row | Opcode::Column => exact(INT),
        Opcode::Pdf | Opcode::Ocr => exact(STRING),
        Opcode::Exit | Opcode::EndMain => exact(NONE),

        // After the target
        Opcode::Insert | Opcode::Modify => exact(&[ArgKind::Int, ArgKind::Any]),
        Opcode::Append => variadic(ANY, 1),
        Opcode::Remove | Opcode::Truncate => exact(INT),
        Opcode::Clear | Opcode::Reset => exact(NONE),
        _ => return None,
    };
    Some(sig)
}

impl Signature {
    /// Kind expected at position `pos`, `None` when past the end
    pub fn kind_at(&self, pos: usize) -> Option<ArgKind> {
        match self.params.get(pos) {
            Some(kind) => Some(*kind),
            None if self.variadic => self.params.last().copied(),
            None => None,
        }
    }

    fn describe(&self) -> String {
        match (self.variadic, self.required == self.params.len()) {
            (true, _) => format!("at least {}", self.required),
            (false, true) => self.required.to_string(),
            (false, false) => format!("{} to {}", self.required, self.params.len()),
        }
    }

    pub fn check_count(&self, found: usize) -> ScriptResult<()> {
        let too_many = !self.variadic && found > self.params.len();
        if found < self.required || too_many {
            return Err(ScriptError::arity(self.describe(), found));
        }
        Ok(())
    }

    /// Count plus static types of already compiled values
    pub fn check(&self, values: &[Value]) -> ScriptResult<()> {
        self.check_count(values.len())?;
        for (pos, value) in values.iter().enumerate() {
            let (Some(kind), Some(ty)) = (self.kind_at(pos), value.static_type()) else {
                continue;
            };
            if !kind.accepts(ty) {
                return Err(ScriptError::type_mismatch(
                    format!("{:?}", kind).to_lowercase(),
                    ty,
                )
                .context(format!("argument {}", pos + 1)));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_counts() {
        let fopen = for_opcode(Opcode::FOpen).unwrap();
        assert!(fopen.check_count(1).is_ok());
        assert!(fopen.check_count(2).is_ok());
        let err = fopen.check_count(3).unwrap_err();
        assert_eq!(
            err.kind,
            ErrorKind::Arity {
                expected: "1 to 2".into(),
                found: 3
            }
        );

        let print = for_opcode(Opcode::Print).unwrap();
        assert!(print.check_count(0).is_ok());
        assert!(print.check_count(12).is_ok());
    }

    #[test]
    fn test_types() {
        let cell = for_opcode(Opcode::Cell).unwrap();
        assert!(cell.check(&[Value::int(1), Value::int(2)]).is_ok());
        assert!(cell.check(&[Value::int(1), Value::str("B")]).is_err());
    }
}
