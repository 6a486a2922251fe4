//! Variable store
//!
//! A [`VarStore`] is one owner's name -> slot map: the globals of the main
//! program, the locals of one subroutine call, or the reserved layer.
//! Every write records the writer (instruction index and line), the time
//! and flips the changed flag, even when the value is the same.

use chrono::{DateTime, Local};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{ErrorKind, ScriptError, ScriptResult};
use crate::interpreter::types::{Data, DataType};

pub const MAIN_OWNER: &str = "MAIN";
pub const SYSTEM_OWNER: &str = "SYSTEM";

/* ===================== Slots ===================== */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Visibility {
    Global,
    OwnerLocal,
    Reserved,
}

impl Visibility {
    pub fn label(self) -> &'static str {
        match self {
            Visibility::Global => "GLOBAL",
            Visibility::OwnerLocal => "LOCAL",
            Visibility::Reserved => "RESERVED",
        }
    }
}

/// Instruction that last wrote a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Writer {
    pub index: usize,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VarSlot {
    pub name: String,
    pub ty: DataType,
    pub visibility: Visibility,
    pub owner: String,
    pub data: Data,
    /// FILTER mask over the elements of a sequence; `None` shows everything
    pub mask: Option<Vec<bool>>,
    pub writer: Option<Writer>,
    pub written_at: Option<DateTime<Local>>,
    pub changed: bool,
    /// Interpreter bookkeeping such as counted-loop counters; never reported
    pub hidden: bool,
}

impl VarSlot {
    fn new(name: &str, ty: DataType, visibility: Visibility, owner: &str) -> Self {
        Self {
            name: name.to_string(),
            ty,
            visibility,
            owner: owner.to_string(),
            data: ty.default_data(),
            mask: None,
            writer: None,
            written_at: None,
            changed: false,
            hidden: false,
        }
    }

    /// Value as scripts see it, with any FILTER mask applied
    pub fn visible(&self) -> Data {
        let Some(mask) = &self.mask else {
            return self.data.clone();
        };
        let keep = |i: usize| mask.get(i).copied().unwrap_or(true);
        match &self.data {
            Data::IntArray(items) => Data::IntArray(
                items
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| keep(*i))
                    .map(|(_, v)| *v)
                    .collect(),
            ),
            Data::StrArray(items) => Data::StrArray(
                items
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| keep(*i))
                    .map(|(_, v)| v.clone())
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    pub(crate) fn touch(&mut self, writer: Writer) {
        self.writer = Some(writer);
        self.written_at = Some(Local::now());
        self.changed = true;
    }

    pub fn report(&self) -> VarReport {
        VarReport {
            visibility: self.visibility,
            owner: self.owner.clone(),
            name: self.name.clone(),
            ty: self.ty,
            value: self.visible().to_string(),
            writer: self.writer,
            time: self.written_at,
        }
    }
}

/// One `[VAR ...]` line sent to the controlling client
#[derive(Debug, Clone, PartialEq)]
pub struct VarReport {
    pub visibility: Visibility,
    pub owner: String,
    pub name: String,
    pub ty: DataType,
    pub value: String,
    pub writer: Option<Writer>,
    pub time: Option<DateTime<Local>>,
}

impl fmt::Display for VarReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (index, line) = match self.writer {
            Some(w) => (w.index.to_string(), w.line.to_string()),
            None => ("-".to_string(), "-".to_string()),
        };
        let time = self
            .time
            .map(|t| t.format("%H:%M:%S%.3f").to_string())
            .unwrap_or_else(|| "-".to_string());

        write!(
            f,
            "[VAR {} :: {} :: {} :: {} :: {} :: {} :: {} :: {}]",
            self.visibility.label(),
            self.owner,
            self.name,
            self.ty,
            self.value,
            index,
            line,
            time
        )
    }
}

/* ===================== Store ===================== */

#[derive(Debug, Clone)]
pub struct VarStore {
    visibility: Visibility,
    owner: String,
    read_only: bool,
    slots: BTreeMap<String, VarSlot>,
}

impl VarStore {
    pub fn globals() -> Self {
        Self::new(Visibility::Global, MAIN_OWNER)
    }

    pub fn locals(owner: &str) -> Self {
        Self::new(Visibility::OwnerLocal, owner)
    }

    fn new(visibility: Visibility, owner: &str) -> Self {
        Self {
            visibility,
            owner: owner.to_string(),
            read_only: false,
            slots: BTreeMap::new(),
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Allocate `name` with `ty`. Re-allocating with the same type keeps
    /// the slot; a different type is an error.
    pub fn allocate(&mut self, name: &str, ty: DataType) -> ScriptResult<&mut VarSlot> {
        if let Some(existing) = self.slots.get(name) {
            if existing.ty != ty {
                return Err(ScriptError::type_mismatch(existing.ty, ty)
                    .context(format!("redeclaring '{}'", name)));
            }
        }
        let (visibility, owner) = (self.visibility, self.owner.clone());
        Ok(self
            .slots
            .entry(name.to_string())
            .or_insert_with(|| VarSlot::new(name, ty, visibility, &owner)))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.slots.contains_key(name)
    }

    pub fn get(&self, name: &str) -> ScriptResult<&VarSlot> {
        self.slots
            .get(name)
            .ok_or_else(|| ScriptError::unknown_variable(name))
    }

    pub fn get_mut(&mut self, name: &str) -> ScriptResult<&mut VarSlot> {
        self.slots
            .get_mut(name)
            .ok_or_else(|| ScriptError::unknown_variable(name))
    }

    /// Visible value of `name` converted to `ty`
    pub fn get_as(&self, name: &str, ty: DataType) -> ScriptResult<Data> {
        self.get(name)?.visible().coerce(ty)
    }

    pub fn check_writable(&self, name: &str) -> ScriptResult<()> {
        if self.read_only {
            return Err(ErrorKind::ReadOnly(name.to_string()).into());
        }
        self.get(name).map(|_| ())
    }

    /// Coerce `data` to the slot type and store it; clears any mask
    pub fn set(&mut self, name: &str, data: Data, writer: Writer) -> ScriptResult<()> {
        self.check_writable(name)?;
        self.store(name, data, writer)
    }

    fn store(&mut self, name: &str, data: Data, writer: Writer) -> ScriptResult<()> {
        let slot = self.get_mut(name)?;
        let data = data
            .coerce(slot.ty)
            .map_err(|e| e.context(format!("assigning '{}'", name)))?;
        slot.data = data;
        slot.mask = None;
        slot.touch(writer);
        Ok(())
    }

    pub fn hide(&mut self, name: &str) -> ScriptResult<()> {
        self.get_mut(name)?.hidden = true;
        Ok(())
    }

    pub fn mark_changed(&mut self, name: &str, writer: Writer) -> ScriptResult<()> {
        self.get_mut(name)?.touch(writer);
        Ok(())
    }

    pub fn reset_change_flags(&mut self) {
        for slot in self.slots.values_mut() {
            slot.changed = false;
        }
    }

    /// Slots written since the last `reset_change_flags`, hidden ones excluded
    pub fn changed_since(&self) -> impl Iterator<Item = &VarSlot> {
        self.slots.values().filter(|s| s.changed && !s.hidden)
    }

    pub fn slots(&self) -> impl Iterator<Item = &VarSlot> {
        self.slots.values()
    }

    pub fn clear(&mut self) {
        self.slots.clear();
    }
}

/* ===================== Reserved Variables ===================== */

const RESERVED: &[(&str, DataType)] = &[
    ("RESPONSE", DataType::StrArray),
    ("STATUS", DataType::Int),
    ("RANDOM", DataType::Int),
    ("DATE", DataType::Str),
    ("TIME", DataType::Str),
    ("RETVAL", DataType::Int),
    ("OCRTEXT", DataType::Str),
    ("CURDIR", DataType::Str),
    ("SCRIPTNAME", DataType::Str),
];

pub const RESPONSE: &str = "RESPONSE";
pub const STATUS: &str = "STATUS";
pub const RETVAL: &str = "RETVAL";
pub const OCRTEXT: &str = "OCRTEXT";
pub const CURDIR: &str = "CURDIR";
pub const SCRIPTNAME: &str = "SCRIPTNAME";

/// The reserved layer. Scripts read these; only the interpreter writes them.
#[derive(Debug)]
pub struct ReservedVars {
    store: VarStore,
    seed: Option<u64>,
    rng: StdRng,
}

impl ReservedVars {
    pub fn new(seed: Option<u64>) -> Self {
        let mut store = VarStore::new(Visibility::Reserved, SYSTEM_OWNER);
        store.read_only = true;
        for (name, ty) in RESERVED {
            store.slots.insert(
                name.to_string(),
                VarSlot::new(name, *ty, Visibility::Reserved, SYSTEM_OWNER),
            );
        }
        Self {
            store,
            seed,
            rng: Self::make_rng(seed),
        }
    }

    fn make_rng(seed: Option<u64>) -> StdRng {
        match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }

    pub fn is_reserved(name: &str) -> bool {
        RESERVED.iter().any(|(n, _)| *n == name)
    }

    pub fn type_of(name: &str) -> Option<DataType> {
        RESERVED.iter().find(|(n, _)| *n == name).map(|(_, ty)| *ty)
    }

    /// Current value; RANDOM, DATE and TIME are computed on every read
    pub fn read(&mut self, name: &str) -> ScriptResult<Data> {
        match name {
            "RANDOM" => Ok(Data::Int(self.rng.gen_range(0..=i64::from(i32::MAX)))),
            "DATE" => Ok(Data::Str(Local::now().format("%Y-%m-%d").to_string())),
            "TIME" => Ok(Data::Str(Local::now().format("%H:%M:%S").to_string())),
            _ => Ok(self.store.get(name)?.visible()),
        }
    }

    /// Interpreter-side write (STATUS, RESPONSE, RETVAL, ...)
    pub fn produce(&mut self, name: &str, data: Data, writer: Writer) -> ScriptResult<()> {
        self.store.store(name, data, writer)
    }

    pub fn slot(&self, name: &str) -> ScriptResult<&VarSlot> {
        self.store.get(name)
    }

    /// Mask access for FILTER/RESET on RESPONSE
    pub fn slot_mut(&mut self, name: &str) -> ScriptResult<&mut VarSlot> {
        if name != RESPONSE {
            return Err(ErrorKind::ReadOnly(name.to_string()).into());
        }
        self.store.get_mut(name)
    }

    pub fn store(&self) -> &VarStore {
        &self.store
    }

    pub fn reset_change_flags(&mut self) {
        self.store.reset_change_flags();
    }

    /// Back to initial values; SCRIPTNAME is written as part of the reset
    pub fn reset(&mut self, script_name: &str) {
        for slot in self.store.slots.values_mut() {
            *slot = VarSlot::new(&slot.name, slot.ty, Visibility::Reserved, SYSTEM_OWNER);
        }
        self.rng = Self::make_rng(self.seed);
        let writer = Writer { index: 0, line: 0 };
        if let Ok(slot) = self.store.get_mut(SCRIPTNAME) {
            slot.data = Data::Str(script_name.to_string());
            slot.touch(writer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const W1: Writer = Writer { index: 0, line: 1 };
    const W2: Writer = Writer { index: 3, line: 7 };

    #[test]
    fn test_allocate_and_set() {
        let mut store = VarStore::globals();
        store.allocate("x", DataType::Int).unwrap();
        assert_eq!(store.get("x").unwrap().data, Data::Int(0));

        store.set("x", Data::UInt(5), W1).unwrap();
        assert_eq!(store.get("x").unwrap().data, Data::Int(5));
        assert!(store.set("x", Data::Str("no".into()), W1).is_err());
        assert_eq!(store.get("x").unwrap().data, Data::Int(5));
    }

    #[test]
    fn test_redeclare_with_other_type_fails() {
        let mut store = VarStore::globals();
        store.allocate("x", DataType::Int).unwrap();
        assert!(store.allocate("x", DataType::Int).is_ok());
        assert!(store.allocate("x", DataType::Str).is_err());
    }

    #[test]
    fn test_change_flags() {
        let mut store = VarStore::globals();
        store.allocate("a", DataType::Int).unwrap();
        store.allocate("b", DataType::Int).unwrap();
        store.set("a", Data::Int(1), W1).unwrap();
        store.reset_change_flags();
        assert_eq!(store.changed_since().count(), 0);

        // Same value still counts as a write
        store.set("a", Data::Int(1), W2).unwrap();
        let changed: Vec<_> = store.changed_since().map(|s| s.name.as_str()).collect();
        assert_eq!(changed, vec!["a"]);

        let slot = store.get("a").unwrap();
        assert_eq!(slot.writer, Some(W2));
        assert!(slot.written_at.is_some());
    }

    #[test]
    fn test_mask_is_view_and_cleared_by_write() {
        let mut store = VarStore::globals();
        store.allocate("xs", DataType::IntArray).unwrap();
        store.set("xs", Data::IntArray(vec![1, 2, 3]), W1).unwrap();

        store.get_mut("xs").unwrap().mask = Some(vec![true, false, true]);
        assert_eq!(store.get("xs").unwrap().visible(), Data::IntArray(vec![1, 3]));

        store.set("xs", Data::IntArray(vec![4, 5]), W2).unwrap();
        assert_eq!(store.get("xs").unwrap().mask, None);
    }

    #[test]
    fn test_reserved_are_read_only() {
        let mut reserved = ReservedVars::new(Some(1));
        let err = reserved.store().check_writable(STATUS).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ReadOnly(STATUS.into()));

        reserved.produce(STATUS, Data::Int(-1), W1).unwrap();
        assert_eq!(reserved.read(STATUS).unwrap(), Data::Int(-1));

        assert!(reserved.slot_mut(RESPONSE).is_ok());
        assert!(reserved.slot_mut(STATUS).is_err());
    }

    #[test]
    fn test_random_is_seeded_and_fresh() {
        let mut a = ReservedVars::new(Some(42));
        let mut b = ReservedVars::new(Some(42));
        let first: Vec<_> = (0..4).map(|_| a.read("RANDOM").unwrap()).collect();
        let second: Vec<_> = (0..4).map(|_| b.read("RANDOM").unwrap()).collect();
        assert_eq!(first, second);
        assert!(first.windows(2).any(|w| w[0] != w[1]));
    }

    #[test]
    fn test_date_and_time_format() {
        let mut reserved = ReservedVars::new(None);
        let Data::Str(date) = reserved.read("DATE").unwrap() else { panic!("DATE is a string") };
        assert_eq!(date.len(), 10);
        assert_eq!(&date[4..5], "-");
        let Data::Str(time) = reserved.read("TIME").unwrap() else { panic!("TIME is a string") };
        assert_eq!(time.len(), 8);
    }

    #[test]
    fn test_reset_writes_scriptname() {
        let mut reserved = ReservedVars::new(None);
        reserved.produce(STATUS, Data::Int(3), W1).unwrap();
        reserved.reset("demo.ss");
        assert_eq!(reserved.read(STATUS).unwrap(), Data::Int(0));
        assert_eq!(reserved.read(SCRIPTNAME).unwrap(), Data::Str("demo.ss".into()));
        assert!(reserved.slot(SCRIPTNAME).unwrap().changed);
    }

    #[test]
    fn test_report_format() {
        let mut store = VarStore::locals("helper");
        store.allocate("n", DataType::Int).unwrap();
        store.set("n", Data::Int(9), W2).unwrap();
        let line = store.get("n").unwrap().report().to_string();
        assert!(line.starts_with("[VAR LOCAL :: helper :: n :: Integer :: 9 :: 3 :: 7 :: "));
        assert!(line.ends_with(']'));
    }
}
