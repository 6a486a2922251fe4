//! Data statements: declarations, SET and the array mutators
//!
//! Mutators work on what the script can see: a FILTER-narrowed array is
//! materialized first, then changed, and the mask is dropped.

use super::expressions::{checked_index, render};
use super::vm::Interpreter;
use crate::error::{ErrorKind, ScriptError, ScriptResult};
use crate::interpreter::types::{CmpOp, Data, Instruction, Opcode, Value, VarRef};
use crate::interpreter::variables::Writer;

/// Target slot named by parameter `pos`
pub(super) fn target_ref(ins: &Instruction, pos: usize) -> ScriptResult<&VarRef> {
    ins.params
        .get(pos)
        .and_then(Value::as_reference)
        .ok_or_else(|| ScriptError::syntax(format!("{} needs a target variable", ins.opcode)))
}

impl Interpreter {
    /// `INTEGER x [= value]`: (re)initialises the slot, zero without a value
    pub(super) fn exec_declare(&mut self, ins: &Instruction, writer: Writer) -> ScriptResult<()> {
        let ty = ins
            .opcode
            .declared_type()
            .ok_or_else(|| ScriptError::syntax(format!("{} does not declare", ins.opcode)))?;
        let name = target_ref(ins, 0)?.name.clone();
        let data = match ins.params.get(1) {
            Some(init) => self.resolve_value(init)?,
            None => ty.default_data(),
        };
        self.declare(&name, ty)?;
        self.write_var(&name, data, writer)
    }

    /// The target is only written once the value resolved
    pub(super) fn exec_set(&mut self, ins: &Instruction, writer: Writer) -> ScriptResult<()> {
        let name = target_ref(ins, 0)?.name.clone();
        let value = ins
            .params
            .get(1)
            .ok_or_else(|| ScriptError::arity("2", ins.params.len()))?;
        let data = self.resolve_value(value)?;
        self.write_var(&name, data, writer)
    }

    pub(super) fn exec_mutator(&mut self, ins: &Instruction, writer: Writer) -> ScriptResult<()> {
        let name = target_ref(ins, 0)?.name.clone();
        let args = self.resolve_all(&ins.params[1..])?;

        let slot = self.slot_mut(&name, false)?;
        let (data, _) = mutate(ins.opcode, &name, slot.visible(), &args)?;
        slot.data = data;
        slot.mask = None;
        slot.touch(writer);
        Ok(())
    }

    /// `POP $list [$into]`: removes the last element
    pub(super) fn exec_pop(&mut self, ins: &Instruction, writer: Writer) -> ScriptResult<()> {
        let name = target_ref(ins, 0)?.name.clone();
        let dest = ins.params.get(1).and_then(Value::as_reference).cloned();

        let visible = self.slot_mut(&name, false)?.visible();
        let (data, popped) = mutate(Opcode::Pop, &name, visible, &[])?;
        if let (Some(dest), Some(popped)) = (dest, popped) {
            self.write_var(&dest.name, popped, writer)?;
        }

        let slot = self.slot_mut(&name, false)?;
        slot.data = data;
        slot.mask = None;
        slot.touch(writer);
        Ok(())
    }

    /// `FILTER $list [NOT] op value`: narrows the existing mask
    pub(super) fn exec_filter(&mut self, ins: &Instruction, writer: Writer) -> ScriptResult<()> {
        let name = target_ref(ins, 0)?.name.clone();
        let op = match ins.params.get(1) {
            Some(Value::Literal(Data::Str(op))) => CmpOp::parse(op),
            _ => None,
        }
        .ok_or_else(|| ScriptError::syntax("FILTER needs a comparison"))?;
        let rhs = match ins.params.get(2) {
            Some(value) => self.resolve_value(value)?,
            None => return Err(ScriptError::arity("3", ins.params.len())),
        };
        let negate = matches!(ins.params.get(3), Some(Value::Literal(Data::Bool(true))));

        let slot = self.slot_mut(&name, true)?;
        let elements: Vec<Data> = match &slot.data {
            Data::IntArray(items) => items.iter().map(|v| Data::Int(*v)).collect(),
            Data::StrArray(items) => items.iter().map(|v| Data::Str(v.clone())).collect(),
            other => {
                return Err(ScriptError::type_mismatch("IntArray or StrArray", other.data_type()))
            }
        };

        let mut mask = Vec::with_capacity(elements.len());
        for (i, element) in elements.iter().enumerate() {
            let shown = slot.mask.as_ref().map_or(true, |m| m.get(i).copied().unwrap_or(true));
            let hit = op.apply(element, &rhs)? != negate;
            mask.push(shown && hit);
        }
        slot.mask = Some(mask);
        slot.touch(writer);
        Ok(())
    }

    /// `RESET $list`: drops the FILTER mask
    pub(super) fn exec_reset_mask(&mut self, ins: &Instruction, writer: Writer) -> ScriptResult<()> {
        let name = target_ref(ins, 0)?.name.clone();
        let slot = self.slot_mut(&name, true)?;
        slot.mask = None;
        slot.touch(writer);
        Ok(())
    }
}

/* ===================== Array Mutation ===================== */

/// Elements of one array type, so each mutator is written once
trait Element: Sized + Clone {
    fn from_data(data: &Data, out: &mut Vec<Self>) -> ScriptResult<()>;
    fn into_data(items: Vec<Self>) -> Data;
    fn to_scalar(self) -> Data;
}

impl Element for i64 {
    fn from_data(data: &Data, out: &mut Vec<Self>) -> ScriptResult<()> {
        match data {
            Data::IntArray(items) => out.extend(items),
            scalar => out.push(scalar.as_int()?),
        }
        Ok(())
    }

    fn into_data(items: Vec<Self>) -> Data {
        Data::IntArray(items)
    }

    fn to_scalar(self) -> Data {
        Data::Int(self)
    }
}

impl Element for String {
    fn from_data(data: &Data, out: &mut Vec<Self>) -> ScriptResult<()> {
        match data {
            Data::StrArray(items) => out.extend(items.iter().cloned()),
            Data::IntArray(items) => out.extend(items.iter().map(|n| n.to_string())),
            scalar => out.push(render(scalar)),
        }
        Ok(())
    }

    fn into_data(items: Vec<Self>) -> Data {
        Data::StrArray(items)
    }

    fn to_scalar(self) -> Data {
        Data::Str(self)
    }
}

/// Apply a mutator to the visible array; returns the new array and, for
/// POP, the removed element
fn mutate(op: Opcode, name: &str, data: Data, args: &[Data]) -> ScriptResult<(Data, Option<Data>)> {
    match data {
        Data::IntArray(items) => mutate_items(op, name, items, args),
        Data::StrArray(items) => mutate_items(op, name, items, args),
        other => Err(ScriptError::type_mismatch("IntArray or StrArray", other.data_type())),
    }
}

fn mutate_items<T: Element>(
    op: Opcode,
    name: &str,
    mut items: Vec<T>,
    args: &[Data],
) -> ScriptResult<(Data, Option<Data>)> {
    let index_arg = |pos: usize| -> ScriptResult<i64> {
        args.get(pos)
            .ok_or_else(|| ScriptError::arity((pos + 1).to_string(), args.len()))?
            .as_int()
    };
    let values_from = |pos: usize| -> ScriptResult<Vec<T>> {
        let mut out = Vec::new();
        for arg in &args[pos.min(args.len())..] {
            T::from_data(arg, &mut out)?;
        }
        Ok(out)
    };

    let mut popped = None;
    match op {
        Opcode::Append => items.extend(values_from(0)?),
        Opcode::Insert => {
            let at = checked_index(name, index_arg(0)?, items.len(), true)?;
            let values = values_from(1)?;
            items.splice(at..at, values);
        }
        Opcode::Modify => {
            let at = checked_index(name, index_arg(0)?, items.len(), false)?;
            let mut values = values_from(1)?;
            if values.len() != 1 {
                return Err(ScriptError::arity("1 value", values.len()));
            }
            items[at] = values.remove(0);
        }
        Opcode::Remove => {
            let at = checked_index(name, index_arg(0)?, items.len(), false)?;
            items.remove(at);
        }
        Opcode::Truncate => {
            let keep = index_arg(0)?;
            let keep = usize::try_from(keep).map_err(|_| {
                ScriptError::arithmetic(format!("cannot truncate '{}' to {}", name, keep))
            })?;
            items.truncate(keep);
        }
        Opcode::Pop => {
            let last = items.pop().ok_or_else(|| {
                ScriptError::from(ErrorKind::IndexOutOfRange {
                    name: name.to_string(),
                    index: -1,
                    len: 0,
                })
            })?;
            popped = Some(last.to_scalar());
        }
        Opcode::Clear => items.clear(),
        other => {
            return Err(ScriptError::syntax(format!("{} is not an array mutator", other)));
        }
    }
    Ok((T::into_data(items), popped))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ints(v: &[i64]) -> Data {
        Data::IntArray(v.to_vec())
    }

    #[test]
    fn test_insert_modify_remove() {
        let (data, _) =
            mutate(Opcode::Insert, "xs", ints(&[1, 3]), &[Data::Int(1), Data::Int(2)]).unwrap();
        assert_eq!(data, ints(&[1, 2, 3]));

        let (data, _) = mutate(Opcode::Modify, "xs", data, &[Data::Int(0), Data::Int(9)]).unwrap();
        assert_eq!(data, ints(&[9, 2, 3]));

        let (data, _) = mutate(Opcode::Remove, "xs", data, &[Data::Int(2)]).unwrap();
        assert_eq!(data, ints(&[9, 2]));

        assert!(mutate(Opcode::Remove, "xs", data, &[Data::Int(2)]).is_err());
    }

    #[test]
    fn test_append_flattens_arrays() {
        let names = Data::StrArray(vec!["a".into()]);
        let (data, _) = mutate(
            Opcode::Append,
            "names",
            names,
            &[Data::Str("b".into()), Data::IntArray(vec![1, 2])],
        )
        .unwrap();
        assert_eq!(
            data,
            Data::StrArray(vec!["a".into(), "b".into(), "1".into(), "2".into()])
        );
    }

    #[test]
    fn test_pop_and_truncate() {
        let (data, popped) = mutate(Opcode::Pop, "xs", ints(&[4, 5]), &[]).unwrap();
        assert_eq!(popped, Some(Data::Int(5)));
        assert_eq!(data, ints(&[4]));

        let (data, _) = mutate(Opcode::Truncate, "xs", ints(&[1, 2, 3]), &[Data::Int(1)]).unwrap();
        assert_eq!(data, ints(&[1]));
        assert!(mutate(Opcode::Pop, "xs", ints(&[]), &[]).is_err());
    }
}
