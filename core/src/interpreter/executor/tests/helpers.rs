//! Test helpers for executor tests
//!
//! Common utilities for compiling scripts and building interpreters

use std::sync::{Arc, Mutex};

use crate::error::{ScriptError, ScriptResult};
use crate::host::{ConfinedFs, FileSystem, Host, SheetQuery, TextSource};
use crate::interpreter::executor::{run_until_done, step, Interpreter, InterpreterConfig, Step};
use crate::interpreter::types::{CompiledProgram, Data};
use crate::interpreter::{compile, VarReport};

/// Host that records PRINT and option output and serves a fixed sheet
pub struct RecordingHost {
    printed: Arc<Mutex<Vec<String>>>,
    fs: ConfinedFs,
    sheet: Vec<Vec<String>>,
    _root: tempfile::TempDir,
}

impl RecordingHost {
    pub fn new(printed: Arc<Mutex<Vec<String>>>) -> Self {
        let root = tempfile::tempdir().expect("temp dir");
        Self {
            printed,
            fs: ConfinedFs::new(root.path()),
            sheet: vec![
                vec!["id".into(), "name".into()],
                vec!["1".into(), "ada".into()],
                vec!["2".into(), "grace".into()],
            ],
            _root: root,
        }
    }

    fn record(&self, line: String) {
        self.printed.lock().unwrap().push(line);
    }
}

fn sheet_index(n: i64, len: usize) -> ScriptResult<usize> {
    usize::try_from(n - 1)
        .ok()
        .filter(|i| *i < len)
        .ok_or_else(|| ScriptError::collaborator(format!("no row or column {}", n)))
}

impl Host for RecordingHost {
    fn print(&mut self, text: &str) {
        self.record(text.to_string());
    }

    fn filesystem(&mut self) -> &mut dyn FileSystem {
        &mut self.fs
    }

    fn sheet(&mut self, query: &SheetQuery) -> ScriptResult<Vec<String>> {
        match query {
            SheetQuery::Cell { row, column } => {
                let row = &self.sheet[sheet_index(*row, self.sheet.len())?];
                Ok(vec![row[sheet_index(*column, row.len())?].clone()])
            }
            SheetQuery::Row(row) => Ok(self.sheet[sheet_index(*row, self.sheet.len())?].clone()),
            SheetQuery::Column(column) => {
                let c = sheet_index(*column, self.sheet[0].len())?;
                Ok(self.sheet.iter().map(|r| r[c].clone()).collect())
            }
        }
    }

    fn text(&mut self, source: &TextSource) -> ScriptResult<Vec<String>> {
        match source {
            TextSource::Clipboard => Ok(vec!["copied".into()]),
            TextSource::Pdf(path) => Err(ScriptError::collaborator(format!("cannot read {}", path))),
        }
    }

    fn ocr(&mut self, path: &str) -> ScriptResult<String> {
        Ok(format!("text of {}", path))
    }

    fn option(&mut self, name: &str, args: &[Data]) -> ScriptResult<Vec<String>> {
        let rendered: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        self.record(format!("-{} {}", name, rendered.join(" ")));
        Ok(vec![name.to_string()])
    }
}

/// A compiled script plus an interpreter reset to run it
pub struct Harness {
    pub program: CompiledProgram,
    pub vm: Interpreter,
    printed: Arc<Mutex<Vec<String>>>,
}

impl Harness {
    pub fn run(&mut self) -> ScriptResult<()> {
        run_until_done(&mut self.vm, &self.program)
    }

    pub fn step(&mut self) -> ScriptResult<Step> {
        step(&mut self.vm, &self.program)
    }

    pub fn value(&mut self, name: &str) -> Data {
        self.vm.value(name).expect("variable should exist")
    }

    pub fn printed(&self) -> Vec<String> {
        self.printed.lock().unwrap().clone()
    }

    pub fn changes(&mut self) -> Vec<VarReport> {
        self.vm.take_changes()
    }
}

/// Compile, serialize/deserialize the program, and build an interpreter
///
/// This helper:
/// - Compiles the script
/// - Round-trips the program through JSON (to test serde compatibility)
/// - Creates an interpreter on a recording host and resets it
pub fn compile_and_build_vm(source: &str) -> Harness {
    compile_and_build_vm_with(source, InterpreterConfig::default())
}

pub fn compile_and_build_vm_with(source: &str, config: InterpreterConfig) -> Harness {
    let program = compile(source, "test.ss").expect("Compile script failed");
    let json = serde_json::to_string(&program).expect("Program serialization failed");
    let program: CompiledProgram =
        serde_json::from_str(&json).expect("Program deserialization failed");

    let printed = Arc::new(Mutex::new(Vec::new()));
    let host = RecordingHost::new(printed.clone());
    let mut vm = Interpreter::new(Box::new(host), &config);
    vm.reset(&program).expect("Interpreter reset failed");

    Harness {
        program,
        vm,
        printed,
    }
}

/// Compile and run to completion, panicking on a run-time error
pub fn run_script(source: &str) -> Harness {
    let mut harness = compile_and_build_vm(source);
    harness.run().expect("script should run");
    harness
}
