//! Compiled program: instructions plus the block arenas they index into

use super::operand::Value;
use super::values::DataType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/* ===================== Opcodes ===================== */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Opcode {
    // Declarations
    Integer,
    Unsigned,
    Boolean,
    String,
    IntArray,
    StrArray,

    Set,

    // Array mutators
    Insert,
    Append,
    Modify,
    Remove,
    Truncate,
    Pop,
    Clear,
    Filter,
    Reset,

    // Control flow
    If,
    ElseIf,
    Else,
    EndIf,
    For,
    Break,
    Skip,
    BreakIf,
    SkipIf,
    Next,
    /// Emitted after every NEXT; never written by users
    EndFor,
    Sub,
    EndSub,
    GoSub,
    Return,
    Exit,
    EndMain,

    // Collaborator commands
    Print,
    Cd,
    MkDir,
    RmDir,
    Delete,
    FList,
    FOpen,
    FClose,
    FRead,
    FWrite,
    Cell,
    Row,
    Column,
    Clipboard,
    Pdf,
    Ocr,

    /// `-name args`: external option command
    Option,
}

const KEYWORDS: &[(&str, Opcode)] = &[
    ("INTEGER", Opcode::Integer),
    ("UNSIGNED", Opcode::Unsigned),
    ("BOOLEAN", Opcode::Boolean),
    ("STRING", Opcode::String),
    ("INTARRAY", Opcode::IntArray),
    ("STRARRAY", Opcode::StrArray),
    ("SET", Opcode::Set),
    ("INSERT", Opcode::Insert),
    ("APPEND", Opcode::Append),
    ("MODIFY", Opcode::Modify),
    ("REMOVE", Opcode::Remove),
    ("TRUNCATE", Opcode::Truncate),
    ("POP", Opcode::Pop),
    ("CLEAR", Opcode::Clear),
    ("FILTER", Opcode::Filter),
    ("RESET", Opcode::Reset),
    ("IF", Opcode::If),
    ("ELSEIF", Opcode::ElseIf),
    ("ELSE", Opcode::Else),
    ("ENDIF", Opcode::EndIf),
    ("FOR", Opcode::For),
    ("BREAK", Opcode::Break),
    ("SKIP", Opcode::Skip),
    ("BREAKIF", Opcode::BreakIf),
    ("SKIPIF", Opcode::SkipIf),
    ("NEXT", Opcode::Next),
    ("SUB", Opcode::Sub),
    ("ENDSUB", Opcode::EndSub),
    ("GOSUB", Opcode::GoSub),
    ("RETURN", Opcode::Return),
    ("EXIT", Opcode::Exit),
    ("ENDMAIN", Opcode::EndMain),
    ("PRINT", Opcode::Print),
    ("CD", Opcode::Cd),
    ("MKDIR", Opcode::MkDir),
    ("RMDIR", Opcode::RmDir),
    ("DELETE", Opcode::Delete),
    ("FLIST", Opcode::FList),
    ("FOPEN", Opcode::FOpen),
    ("FCLOSE", Opcode::FClose),
    ("FREAD", Opcode::FRead),
    ("FWRITE", Opcode::FWrite),
    ("CELL", Opcode::Cell),
    ("ROW", Opcode::Row),
    ("COLUMN", Opcode::Column),
    ("CLIPBOARD", Opcode::Clipboard),
    ("PDF", Opcode::Pdf),
    ("OCR", Opcode::Ocr),
];

impl Opcode {
    /// Look up a user-writable opcode keyword (case-insensitive).
    /// `ENDFOR` and `OPTION` are internal and never match.
    pub fn from_keyword(word: &str) -> Option<Opcode> {
        let upper = word.to_ascii_uppercase();
        KEYWORDS
            .iter()
            .find(|(kw, _)| *kw == upper)
            .map(|(_, op)| *op)
    }

    pub fn keyword(self) -> &'static str {
        match self {
            Opcode::EndFor => "ENDFOR",
            Opcode::Option => "OPTION",
            op => KEYWORDS
                .iter()
                .find(|(_, o)| *o == op)
                .map(|(kw, _)| *kw)
                .unwrap_or("?"),
        }
    }

    /// Declared type for declaration opcodes
    pub fn declared_type(self) -> Option<DataType> {
        match self {
            Opcode::Integer => Some(DataType::Int),
            Opcode::Unsigned => Some(DataType::UInt),
            Opcode::Boolean => Some(DataType::Bool),
            Opcode::String => Some(DataType::Str),
            Opcode::IntArray => Some(DataType::IntArray),
            Opcode::StrArray => Some(DataType::StrArray),
            _ => None,
        }
    }

    pub fn is_array_mutator(self) -> bool {
        matches!(
            self,
            Opcode::Insert
                | Opcode::Append
                | Opcode::Modify
                | Opcode::Remove
                | Opcode::Truncate
                | Opcode::Pop
                | Opcode::Clear
                | Opcode::Filter
                | Opcode::Reset
        )
    }

    /// Whether parameter `pos` names a slot rather than a value to read.
    /// Target parameters are left unresolved at dispatch.
    pub fn is_target_param(self, pos: usize) -> bool {
        if self.declared_type().is_some() || matches!(self, Opcode::Set | Opcode::For) {
            return pos == 0;
        }
        match self {
            Opcode::Pop => true,
            op if op.is_array_mutator() => pos == 0,
            _ => false,
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/* ===================== Instructions ===================== */

pub type CondId = usize;
pub type LoopId = usize;
pub type SubId = usize;

/// Arena entry an instruction belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "t", content = "id")]
pub enum BlockRef {
    Cond(CondId),
    Loop(LoopId),
    Sub(SubId),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    /// 1-based script line
    pub line: usize,
    pub opcode: Opcode,
    /// Option command name, only for `Opcode::Option`
    pub option: Option<String>,
    pub params: Vec<Value>,
    pub block: Option<BlockRef>,
}

impl Instruction {
    pub fn new(line: usize, opcode: Opcode, params: Vec<Value>) -> Self {
        Self {
            line,
            opcode,
            option: None,
            params,
            block: None,
        }
    }

    pub fn with_block(mut self, block: BlockRef) -> Self {
        self.block = Some(block);
        self
    }
}

/* ===================== Block Arenas ===================== */

/// IF ... [ELSEIF ...]* [ELSE ...] ENDIF
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CondBlock {
    pub start: usize,
    /// ELSEIF / ELSE instruction indices in order; ELSE, if any, is last
    pub branches: Vec<usize>,
    pub has_else: bool,
    pub end: usize,
    pub loop_depth: usize,
    pub owner: Option<SubId>,
}

impl CondBlock {
    /// Where to go when the branch starting at `from` is not taken
    pub fn next_branch_after(&self, from: usize) -> usize {
        self.branches
            .iter()
            .copied()
            .find(|&b| b > from)
            .unwrap_or(self.end)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoopKind {
    /// `FOR v = a TO|UPTO b [STEP s]`
    Range,
    /// `FOR n`: exactly n iterations
    Counted,
    /// bare `FOR`
    Infinite,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopDef {
    /// Loop variable; generated (`_FOR<line>`) for counted and infinite loops
    pub var: String,
    pub kind: LoopKind,
    /// `TO` (inclusive) vs `UPTO`
    pub inclusive: bool,
    pub start: usize,
    pub next: usize,
    /// Index of the synthetic ENDFOR
    pub end: usize,
    pub if_depth: usize,
    pub owner: Option<SubId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubDef {
    pub name: String,
    pub start: usize,
    pub end: usize,
    /// Locals declared in the body, with their types
    pub locals: BTreeMap<String, DataType>,
}

/// A line inside STARTUP ... ENDSTARTUP, kept verbatim for the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartupLine {
    pub line: usize,
    pub text: String,
}

/* ===================== Compiled Program ===================== */

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompiledProgram {
    pub name: String,
    /// SHA-256 of the source text
    pub source_hash: String,
    pub instructions: Vec<Instruction>,
    /// Script line -> first instruction index on that line
    pub line_index: BTreeMap<usize, usize>,
    pub conditionals: Vec<CondBlock>,
    pub loops: Vec<LoopDef>,
    pub subroutines: Vec<SubDef>,
    pub globals: BTreeMap<String, DataType>,
    pub startup: Vec<StartupLine>,
}

impl CompiledProgram {
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn instruction(&self, idx: usize) -> Option<&Instruction> {
        self.instructions.get(idx)
    }

    pub fn line_of(&self, idx: usize) -> Option<usize> {
        self.instructions.get(idx).map(|i| i.line)
    }

    /// First instruction at or after `line`
    pub fn index_for_line(&self, line: usize) -> Option<usize> {
        self.line_index.range(line..).next().map(|(_, idx)| *idx)
    }

    pub fn sub_by_name(&self, name: &str) -> Option<SubId> {
        self.subroutines
            .iter()
            .position(|s| s.name.eq_ignore_ascii_case(name))
    }

    /// Generated counters of the counted and infinite loops owned by `owner`
    pub fn generated_loop_vars(&self, owner: Option<SubId>) -> impl Iterator<Item = &str> {
        self.loops
            .iter()
            .filter(move |l| l.kind != LoopKind::Range && l.owner == owner)
            .map(|l| l.var.as_str())
    }

    /// Declared type of `name` as seen from `owner`
    pub fn declared_type(&self, owner: Option<SubId>, name: &str) -> Option<DataType> {
        owner
            .and_then(|id| self.subroutines.get(id))
            .and_then(|sub| sub.locals.get(name))
            .or_else(|| self.globals.get(name))
            .copied()
    }
}
