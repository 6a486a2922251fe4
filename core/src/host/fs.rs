//! Path-confined filesystem
//!
//! Script paths are resolved lexically against a root directory and the
//! script's current directory, then checked on disk: the longest existing
//! prefix is canonicalized so symlinks cannot lead outside the root.
//! Escaping paths fail with a `PathEscape` error, which aborts the script
//! instead of setting STATUS.

use glob::Pattern;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Component, Path, PathBuf};
use tracing::debug;

use crate::error::{ErrorKind, ScriptError, ScriptResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    Write,
    Append,
}

impl OpenMode {
    pub fn parse(text: &str) -> Option<OpenMode> {
        match text.to_ascii_uppercase().as_str() {
            "R" | "READ" => Some(OpenMode::Read),
            "W" | "WRITE" => Some(OpenMode::Write),
            "A" | "APPEND" => Some(OpenMode::Append),
            _ => None,
        }
    }
}

/// Filesystem operations available to scripts. One file may be open at a time.
pub trait FileSystem: Send {
    /// Current directory, shown relative to the root (`/` is the root)
    fn current_dir(&self) -> String;
    fn change_dir(&mut self, path: &str) -> ScriptResult<String>;
    fn make_dir(&mut self, path: &str) -> ScriptResult<()>;
    fn remove_dir(&mut self, path: &str) -> ScriptResult<()>;
    fn delete(&mut self, path: &str) -> ScriptResult<()>;
    /// Entry names in the current directory; directories end with `/`
    fn list(&mut self, pattern: Option<&str>) -> ScriptResult<Vec<String>>;
    fn open(&mut self, path: &str, mode: OpenMode) -> ScriptResult<()>;
    fn close(&mut self) -> ScriptResult<()>;
    /// Next line of the open file, `None` at end of file
    fn read_line(&mut self) -> ScriptResult<Option<String>>;
    fn write(&mut self, text: &str) -> ScriptResult<()>;
    /// Back to the root with no open file
    fn reset(&mut self);
}

enum OpenFile {
    Reader(BufReader<File>),
    Writer(File),
}

pub struct ConfinedFs {
    root: PathBuf,
    /// Canonical form of `root`, if it existed when the filesystem was created
    real_root: Option<PathBuf>,
    /// Relative to `root`
    cwd: PathBuf,
    open: Option<OpenFile>,
}

impl std::fmt::Debug for ConfinedFs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfinedFs")
            .field("root", &self.root)
            .field("cwd", &self.cwd)
            .field("open", &self.open.is_some())
            .finish()
    }
}

impl ConfinedFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let real_root = fs::canonicalize(&root).ok();
        Self {
            root,
            real_root,
            cwd: PathBuf::new(),
            open: None,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Lexically resolve `path` to a location under the root
    fn confine(&self, path: &str) -> ScriptResult<PathBuf> {
        let mut rel = if path.starts_with('/') || path.starts_with('\\') {
            PathBuf::new()
        } else {
            self.cwd.clone()
        };

        for component in Path::new(path).components() {
            match component {
                Component::Normal(part) => rel.push(part),
                Component::CurDir | Component::RootDir => {}
                Component::ParentDir => {
                    if !rel.pop() {
                        return Err(ErrorKind::PathEscape(path.to_string()).into());
                    }
                }
                Component::Prefix(_) => {
                    return Err(ErrorKind::PathEscape(path.to_string()).into());
                }
            }
        }
        Ok(rel)
    }

    /// Absolute location of `rel`, refused if it resolves outside the root
    /// through a symlink. The target itself may not exist yet.
    fn absolute(&self, rel: &Path, path: &str) -> ScriptResult<PathBuf> {
        let abs = self.root.join(rel);
        let real_root = match &self.real_root {
            Some(real) => real.clone(),
            None => fs::canonicalize(&self.root).map_err(|e| io_error(path, e))?,
        };

        let existing = abs
            .ancestors()
            .find(|p| p.symlink_metadata().is_ok())
            .unwrap_or(self.root.as_path());
        // A dangling symlink fails here too
        let real = fs::canonicalize(existing)
            .map_err(|_| ScriptError::from(ErrorKind::PathEscape(path.to_string())))?;
        if !real.starts_with(&real_root) {
            debug!(path, resolved = %real.display(), "path leaves the root");
            return Err(ErrorKind::PathEscape(path.to_string()).into());
        }
        Ok(abs)
    }

    fn display(rel: &Path) -> String {
        let parts: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        format!("/{}", parts.join("/"))
    }
}

fn io_error(path: &str, err: std::io::Error) -> ScriptError {
    ScriptError::io(err).context(path.to_string())
}

impl FileSystem for ConfinedFs {
    fn current_dir(&self) -> String {
        Self::display(&self.cwd)
    }

    fn change_dir(&mut self, path: &str) -> ScriptResult<String> {
        let rel = self.confine(path)?;
        let abs = self.absolute(&rel, path)?;
        if !abs.is_dir() {
            return Err(ScriptError::collaborator(format!("{} is not a directory", path)));
        }
        self.cwd = rel;
        debug!(cwd = %self.current_dir(), "changed directory");
        Ok(self.current_dir())
    }

    fn make_dir(&mut self, path: &str) -> ScriptResult<()> {
        let abs = self.absolute(&self.confine(path)?, path)?;
        fs::create_dir_all(abs).map_err(|e| io_error(path, e))
    }

    fn remove_dir(&mut self, path: &str) -> ScriptResult<()> {
        let rel = self.confine(path)?;
        if rel.as_os_str().is_empty() {
            return Err(ErrorKind::PathEscape(path.to_string()).into());
        }
        fs::remove_dir(self.absolute(&rel, path)?).map_err(|e| io_error(path, e))
    }

    fn delete(&mut self, path: &str) -> ScriptResult<()> {
        let abs = self.absolute(&self.confine(path)?, path)?;
        fs::remove_file(abs).map_err(|e| io_error(path, e))
    }

    fn list(&mut self, pattern: Option<&str>) -> ScriptResult<Vec<String>> {
        let pattern = pattern
            .map(|p| {
                Pattern::new(p).map_err(|e| {
                    ScriptError::collaborator(format!("bad file pattern '{}': {}", p, e))
                })
            })
            .transpose()?;

        let dir = self.absolute(&self.cwd, ".")?;
        let mut names = Vec::new();
        for entry in fs::read_dir(&dir).map_err(|e| io_error(".", e))? {
            let entry = entry.map_err(|e| io_error(".", e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if pattern.as_ref().map_or(true, |p| p.matches(&name)) {
                let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
                names.push(if is_dir { format!("{}/", name) } else { name });
            }
        }
        names.sort();
        Ok(names)
    }

    fn open(&mut self, path: &str, mode: OpenMode) -> ScriptResult<()> {
        if self.open.is_some() {
            return Err(ScriptError::collaborator("a file is already open"));
        }
        let abs = self.absolute(&self.confine(path)?, path)?;
        let file = match mode {
            OpenMode::Read => File::open(&abs).map(|f| OpenFile::Reader(BufReader::new(f))),
            OpenMode::Write => File::create(&abs).map(OpenFile::Writer),
            OpenMode::Append => OpenOptions::new()
                .create(true)
                .append(true)
                .open(&abs)
                .map(OpenFile::Writer),
        }
        .map_err(|e| io_error(path, e))?;
        self.open = Some(file);
        Ok(())
    }

    fn close(&mut self) -> ScriptResult<()> {
        match self.open.take() {
            Some(OpenFile::Writer(mut f)) => f.flush().map_err(|e| io_error("close", e)),
            Some(OpenFile::Reader(_)) => Ok(()),
            None => Err(ScriptError::collaborator("no file is open")),
        }
    }

    fn read_line(&mut self) -> ScriptResult<Option<String>> {
        let Some(OpenFile::Reader(reader)) = self.open.as_mut() else {
            return Err(ScriptError::collaborator("no file is open for reading"));
        };
        let mut line = String::new();
        let n = reader
            .read_line(&mut line)
            .map_err(|e| io_error("read", e))?;
        if n == 0 {
            return Ok(None);
        }
        let trimmed = line.trim_end_matches(&['\r', '\n'][..]).to_string();
        Ok(Some(trimmed))
    }

    fn write(&mut self, text: &str) -> ScriptResult<()> {
        let Some(OpenFile::Writer(file)) = self.open.as_mut() else {
            return Err(ScriptError::collaborator("no file is open for writing"));
        };
        writeln!(file, "{}", text).map_err(|e| io_error("write", e))
    }

    fn reset(&mut self) {
        self.cwd = PathBuf::new();
        self.open = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sandbox() -> (tempfile::TempDir, ConfinedFs) {
        let dir = tempfile::tempdir().unwrap();
        let fs = ConfinedFs::new(dir.path());
        (dir, fs)
    }

    #[test]
    fn test_escape_is_rejected() {
        let (_dir, mut fs) = sandbox();
        let err = fs.change_dir("..").unwrap_err();
        assert_eq!(err.kind, ErrorKind::PathEscape("..".into()));

        fs.make_dir("a/b").unwrap();
        fs.change_dir("a").unwrap();
        assert!(fs.open("../../etc/passwd", OpenMode::Read).is_err());
        assert!(matches!(
            fs.delete("b/../../../x").unwrap_err().kind,
            ErrorKind::PathEscape(_)
        ));
        // Climbing back to the root is fine
        assert_eq!(fs.change_dir("b/../..").unwrap(), "/");
    }

    #[test]
    fn test_write_then_read() {
        let (_dir, mut fs) = sandbox();
        fs.open("notes.txt", OpenMode::Write).unwrap();
        fs.write("first").unwrap();
        fs.write("second").unwrap();
        fs.close().unwrap();

        fs.open("notes.txt", OpenMode::Read).unwrap();
        assert_eq!(fs.read_line().unwrap(), Some("first".to_string()));
        assert_eq!(fs.read_line().unwrap(), Some("second".to_string()));
        assert_eq!(fs.read_line().unwrap(), None);
        fs.close().unwrap();
        assert!(fs.close().is_err());
    }

    #[test]
    fn test_list_and_cwd() {
        let (_dir, mut fs) = sandbox();
        fs.make_dir("reports").unwrap();
        fs.open("a.csv", OpenMode::Write).unwrap();
        fs.close().unwrap();
        fs.open("b.txt", OpenMode::Write).unwrap();
        fs.close().unwrap();

        assert_eq!(fs.list(None).unwrap(), vec!["a.csv", "b.txt", "reports/"]);
        assert_eq!(fs.list(Some("*.csv")).unwrap(), vec!["a.csv"]);

        assert_eq!(fs.change_dir("reports").unwrap(), "/reports");
        assert_eq!(fs.current_dir(), "/reports");
        assert!(fs.list(None).unwrap().is_empty());
        fs.reset();
        assert_eq!(fs.current_dir(), "/");
    }

    #[test]
    fn test_list_patterns() {
        let (_dir, mut fs) = sandbox();
        for name in ["report.txt", "abc", "a.csv"] {
            fs.open(name, OpenMode::Write).unwrap();
            fs.close().unwrap();
        }
        assert_eq!(fs.list(Some("r*t*")).unwrap(), vec!["report.txt"]);
        assert_eq!(fs.list(Some("a?c")).unwrap(), vec!["abc"]);
        assert_eq!(fs.list(Some("*.[ct]*")).unwrap(), vec!["a.csv", "report.txt"]);

        let err = fs.list(Some("[a-")).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::Collaborator(_)));
        assert!(err.is_recoverable());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_out_of_root_is_rejected() {
        let outside = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("secret.txt"), "x").unwrap();
        let (dir, mut fs) = sandbox();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).unwrap();
        std::os::unix::fs::symlink(
            outside.path().join("gone.txt"),
            dir.path().join("dangling.txt"),
        )
        .unwrap();

        for err in [
            fs.change_dir("link").unwrap_err(),
            fs.open("link/secret.txt", OpenMode::Read).unwrap_err(),
            fs.open("link/new.txt", OpenMode::Write).unwrap_err(),
            fs.delete("link/secret.txt").unwrap_err(),
            fs.open("dangling.txt", OpenMode::Write).unwrap_err(),
        ] {
            assert!(matches!(err.kind, ErrorKind::PathEscape(_)), "{}", err);
        }
        assert!(outside.path().join("secret.txt").exists());
        assert!(!outside.path().join("new.txt").exists());
        assert!(!outside.path().join("gone.txt").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_inside_root_is_followed() {
        let (dir, mut fs) = sandbox();
        fs.make_dir("data").unwrap();
        std::os::unix::fs::symlink(dir.path().join("data"), dir.path().join("alias")).unwrap();

        fs.open("alias/notes.txt", OpenMode::Write).unwrap();
        fs.write("hi").unwrap();
        fs.close().unwrap();
        assert!(dir.path().join("data/notes.txt").exists());
        assert_eq!(fs.change_dir("alias").unwrap(), "/alias");
    }
}
