//! The compiler driver: runs every stage in sequence and owns all file I/O.

use std::{
    fs::{self, File},
    io::{self, Write},
    path::{Path, PathBuf},
};

use tracing::{debug, info};

use crate::{
    error::{CompileError, Error},
    parser::parse,
    ser::{serialize, BinaryImage},
    source::{SourceId, SourceMap},
    validate::validate,
};

/// Compiler settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    /// Directories searched for `/include/` files, after the directory of the including file.
    pub include_dirs: Vec<PathBuf>,
    /// Value of the `boot_cpuid_phys` header field.
    pub boot_cpuid: u32,
}

/// A configured compiler.
///
/// Holds only immutable configuration, so one instance can serve several threads.
#[derive(Debug, Clone, Default)]
pub struct Compiler {
    config: Config,
}

impl Compiler {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Compiles `input` and writes the image to `output`.
    ///
    /// Nothing is written unless every stage succeeds, and a partially written output file is
    /// removed.
    pub fn compile(&self, input: &Path, output: &Path) -> Result<BinaryImage, CompileError> {
        let image = self.compile_file(input)?;

        write_output(output, image.as_bytes())
            .map_err(|error| CompileError::new(error, &SourceMap::default()))?;

        info!(
            input = %input.display(),
            output = %output.display(),
            bytes = image.len(),
            "compiled device tree"
        );

        Ok(image)
    }

    /// Compiles the file at `input` into an in-memory image.
    pub fn compile_file(&self, input: &Path) -> Result<BinaryImage, CompileError> {
        let mut sources = SourceMap::new(self.config.include_dirs.clone());
        let result = sources
            .load(input)
            .and_then(|id| self.pipeline(&mut sources, id));

        result.map_err(|error| CompileError::new(error, &sources))
    }

    /// Compiles source text. `name` is used in diagnostics and as the base for relative
    /// includes.
    pub fn compile_str(&self, name: &str, input: &str) -> Result<BinaryImage, CompileError> {
        let mut sources = SourceMap::new(self.config.include_dirs.clone());
        let id = sources.add(name, input);

        self.pipeline(&mut sources, id)
            .map_err(|error| CompileError::new(error, &sources))
    }

    fn pipeline(&self, sources: &mut SourceMap, id: SourceId) -> Result<BinaryImage, Error> {
        let parsed = parse(sources, id)?;
        let validated = validate(parsed)?;
        let image = serialize(&validated, self.config.boot_cpuid)?;

        debug!(sources = sources.len(), bytes = image.len(), "pipeline finished");
        Ok(image)
    }
}

/// Compiles `input` to `output` with the default configuration.
pub fn compile(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Result<(), CompileError> {
    Compiler::default().compile(input.as_ref(), output.as_ref())?;
    Ok(())
}

/* === Output === */

fn write_output(path: &Path, bytes: &[u8]) -> Result<(), Error> {
    let io_error = |source| Error::Io {
        path: path.to_path_buf(),
        source,
    };

    let mut output = PendingOutput::create(path).map_err(io_error)?;
    output.write_all(bytes).map_err(io_error)?;
    output.persist().map_err(io_error)
}

/// An output file that is removed again unless [`PendingOutput::persist`] succeeds.
struct PendingOutput<'p> {
    path: &'p Path,
    file: Option<File>,
}

impl<'p> PendingOutput<'p> {
    fn create(path: &'p Path) -> io::Result<Self> {
        Ok(Self {
            path,
            file: Some(File::create(path)?),
        })
    }

    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        match &mut self.file {
            Some(file) => file.write_all(bytes),
            None => Err(io::Error::new(io::ErrorKind::Other, "output already closed")),
        }
    }

    fn persist(mut self) -> io::Result<()> {
        if let Some(file) = &self.file {
            file.sync_all()?;
        }
        self.file = None;
        Ok(())
    }
}

impl Drop for PendingOutput<'_> {
    fn drop(&mut self) {
        if self.file.take().is_some() {
            let _ = fs::remove_file(self.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Stage;

    #[test]
    fn compiler_is_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Compiler>();
    }

    #[test]
    fn stage_of_first_error() {
        let compiler = Compiler::default();

        for (input, stage) in [
            ("/ { a = \"x; };", Stage::Lex),
            ("/ { a = <1> };", Stage::Parse),
            ("/ { a = <&missing>; };", Stage::Validation),
            ("/ { a = /bits/ 8 <300>; };", Stage::Serialization),
        ] {
            let err = compiler.compile_str("board.dts", dbg!(input)).unwrap_err();
            assert_eq!(err.stage(), stage);
            assert_eq!(err.file(), Some(Path::new("board.dts")));
        }
    }

    #[test]
    fn diagnostic_line() {
        let err = Compiler::default()
            .compile_str("board.dts", "/ {\n    a = <&missing>;\n};")
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "board.dts:2:5: validation error: unresolved reference `&missing`"
        );
    }

    #[test]
    fn boot_cpuid_from_config() {
        let compiler = Compiler::new(Config {
            boot_cpuid: 2,
            ..Config::default()
        });

        let image = compiler.compile_str("board.dts", "/ { };").unwrap();
        assert_eq!(image.header().boot_cpuid_phys, 2);
        assert_eq!(compiler.config().boot_cpuid, 2);
    }

    #[test]
    fn missing_input() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out.dtb");

        let err = compile(dir.path().join("missing.dts"), &output).unwrap_err();
        assert_eq!(err.stage(), Stage::Io);
        assert!(err.file().is_none());
        assert!(!output.exists());
    }

    #[test]
    fn unpersisted_output_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.dtb");

        {
            let mut output = PendingOutput::create(&path).unwrap();
            output.write_all(b"partial").unwrap();
        }
        assert!(!path.exists());

        write_output(&path, b"complete").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"complete");
    }
}
