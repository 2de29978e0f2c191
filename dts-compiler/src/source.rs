//! Source file bookkeeping.
//!
//! Every file that takes part in a compilation (the input and everything it includes) is loaded
//! into a [`SourceMap`], which hands out small [`SourceId`] handles. Tokens and diagnostics carry
//! the handle instead of a path, and the driver maps it back to a path when reporting errors.

use std::{
    collections::HashMap,
    fs::{self, File},
    io::Read,
    path::{Path, PathBuf},
};

use crate::error::Error;

/// Handle to a file loaded into a [`SourceMap`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(u32);

#[derive(Debug)]
struct SourceFile {
    path: PathBuf,
    text: String,
}

/// Owner of all source texts of one compilation.
#[derive(Debug, Default)]
pub struct SourceMap {
    files: Vec<SourceFile>,
    by_path: HashMap<PathBuf, SourceId>,
    include_dirs: Vec<PathBuf>,
}

impl SourceMap {
    /// Creates an empty map searching `include_dirs` for includes that are not found next to
    /// the including file.
    pub fn new(include_dirs: Vec<PathBuf>) -> Self {
        Self {
            include_dirs,
            ..Default::default()
        }
    }

    /// Registers in-memory source text under a display name.
    pub fn add(&mut self, path: impl Into<PathBuf>, text: impl Into<String>) -> SourceId {
        let id = SourceId(self.files.len() as u32);
        self.files.push(SourceFile {
            path: path.into(),
            text: text.into(),
        });
        id
    }

    /// Reads a file from disk, or returns the handle of an earlier load of the same file.
    pub fn load(&mut self, path: &Path) -> Result<SourceId, Error> {
        let key = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        if let Some(&id) = self.by_path.get(&key) {
            return Ok(id);
        }

        let text = read_source(path)?;
        let id = self.add(path, text);
        self.by_path.insert(key, id);
        Ok(id)
    }

    /// Locates the file named by an include directive found in `from`.
    ///
    /// The directory of the including file is searched first, then the configured include
    /// directories in order.
    pub fn find_include(&self, from: SourceId, name: &str) -> Option<PathBuf> {
        let sibling = self.path(from).parent().map(|dir| dir.join(name));

        sibling
            .into_iter()
            .chain(self.include_dirs.iter().map(|dir| dir.join(name)))
            .find(|candidate| candidate.is_file())
    }

    pub fn path(&self, id: SourceId) -> &Path {
        &self.files[id.0 as usize].path
    }

    pub fn text(&self, id: SourceId) -> &str {
        &self.files[id.0 as usize].text
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Reads a whole source file; the handle is closed before returning on every path.
fn read_source(path: &Path) -> Result<String, Error> {
    let io_error = |source| Error::Io {
        path: path.to_path_buf(),
        source,
    };

    let mut file = File::open(path).map_err(io_error)?;
    let mut text = String::new();
    file.read_to_string(&mut text).map_err(io_error)?;
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::fs;

    #[test]
    fn in_memory_sources() {
        let mut sources = SourceMap::default();
        let a = sources.add("a.dts", "/ { };");
        let b = sources.add("b.dtsi", "");

        assert_ne!(a, b);
        assert_eq!(sources.len(), 2);
        assert_eq!(sources.path(a), Path::new("a.dts"));
        assert_eq!(sources.text(a), "/ { };");
    }

    #[test]
    fn loading_the_same_file_twice_reuses_the_handle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("board.dts");
        fs::write(&path, "/dts-v1/;").unwrap();

        let mut sources = SourceMap::default();
        let first = sources.load(&path).unwrap();
        let second = sources.load(&dir.path().join(".").join("board.dts")).unwrap();

        assert_eq!(first, second);
        assert_eq!(sources.len(), 1);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.dts");

        let mut sources = SourceMap::default();
        match sources.load(&path) {
            Err(Error::Io { path: p, .. }) => assert_eq!(p, path),
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn includes_prefer_the_including_directory() {
        let dir = tempfile::tempdir().unwrap();
        let extra = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("soc.dtsi"), "").unwrap();
        fs::write(extra.path().join("soc.dtsi"), "").unwrap();
        fs::write(extra.path().join("pins.dtsi"), "").unwrap();

        let mut sources = SourceMap::new(vec![extra.path().to_path_buf()]);
        let board = sources.add(dir.path().join("board.dts"), "");

        assert_eq!(
            sources.find_include(board, "soc.dtsi"),
            Some(dir.path().join("soc.dtsi"))
        );
        assert_eq!(
            sources.find_include(board, "pins.dtsi"),
            Some(extra.path().join("pins.dtsi"))
        );
        assert_eq!(sources.find_include(board, "nope.dtsi"), None);
    }
}
