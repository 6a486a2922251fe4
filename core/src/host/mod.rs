//! External collaborators
//!
//! Everything a script reaches outside the interpreter goes through the
//! [`Host`] trait: printing, option commands, the path-confined filesystem,
//! spreadsheet access and text sources. [`StandardHost`] is what the binary
//! uses; tests plug in their own.

pub mod fs;
pub mod options;

pub use fs::{ConfinedFs, FileSystem, OpenMode};
pub use options::{ArgKind, OptionTable};

use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

use crate::error::{ScriptError, ScriptResult};
use crate::interpreter::types::Data;

/// Spreadsheet accessor query (1-based row/column numbers)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SheetQuery {
    Cell { row: i64, column: i64 },
    Row(i64),
    Column(i64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextSource {
    Clipboard,
    Pdf(String),
}

pub trait Host: Send {
    fn print(&mut self, text: &str);

    fn filesystem(&mut self) -> &mut dyn FileSystem;

    fn sheet(&mut self, query: &SheetQuery) -> ScriptResult<Vec<String>>;

    /// Lines of text from the clipboard or a document
    fn text(&mut self, source: &TextSource) -> ScriptResult<Vec<String>>;

    fn ocr(&mut self, path: &str) -> ScriptResult<String>;

    /// Run `-name args`; the returned lines become RESPONSE
    fn option(&mut self, name: &str, args: &[Data]) -> ScriptResult<Vec<String>>;
}

/// Console host: stdout printing, a confined filesystem, and no document readers
#[derive(Debug)]
pub struct StandardHost {
    fs: ConfinedFs,
}

impl StandardHost {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            fs: ConfinedFs::new(root),
        }
    }
}

fn unavailable(what: &str) -> ScriptError {
    ScriptError::collaborator(format!("{} is not available on this host", what))
}

impl Host for StandardHost {
    fn print(&mut self, text: &str) {
        println!("{}", text);
    }

    fn filesystem(&mut self) -> &mut dyn FileSystem {
        &mut self.fs
    }

    fn sheet(&mut self, _query: &SheetQuery) -> ScriptResult<Vec<String>> {
        Err(unavailable("spreadsheet access"))
    }

    fn text(&mut self, source: &TextSource) -> ScriptResult<Vec<String>> {
        match source {
            TextSource::Clipboard => Err(unavailable("the clipboard")),
            TextSource::Pdf(_) => Err(unavailable("PDF text")),
        }
    }

    fn ocr(&mut self, _path: &str) -> ScriptResult<String> {
        Err(unavailable("OCR"))
    }

    fn option(&mut self, name: &str, args: &[Data]) -> ScriptResult<Vec<String>> {
        match (name, args) {
            ("beep", [count]) => {
                let count = count.as_int()?.clamp(0, 16);
                self.print(&"\x07".repeat(count as usize));
            }
            ("wait", [millis]) => {
                let millis = u64::try_from(millis.as_int()?).unwrap_or(0);
                std::thread::sleep(Duration::from_millis(millis));
            }
            _ => {
                let rendered: Vec<String> = args.iter().map(|a| a.to_string()).collect();
                info!(option = name, args = ?rendered, "option command");
            }
        }
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unavailable_collaborators_are_soft_errors() {
        let dir = tempfile::tempdir().unwrap();
        let mut host = StandardHost::new(dir.path());
        let err = host.sheet(&SheetQuery::Row(1)).unwrap_err();
        assert!(matches!(err.kind, crate::error::ErrorKind::Collaborator(_)));
        assert!(host.text(&TextSource::Clipboard).is_err());
        assert!(host.ocr("scan.png").is_err());
    }

    #[test]
    fn test_options_return_no_lines() {
        let dir = tempfile::tempdir().unwrap();
        let mut host = StandardHost::new(dir.path());
        assert!(host.option("wait", &[Data::Int(0)]).unwrap().is_empty());
        assert!(host
            .option("title", &[Data::Str("report".into())])
            .unwrap()
            .is_empty());
        assert!(host.option("beep", &[Data::Str("x".into())]).is_err());
    }

    #[test]
    fn test_filesystem_is_rooted() {
        let dir = tempfile::tempdir().unwrap();
        let mut host = StandardHost::new(dir.path());
        assert_eq!(host.filesystem().current_dir(), "/");
        assert!(host.filesystem().change_dir("..").is_err());
    }
}
