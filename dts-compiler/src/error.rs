//! Pipeline-wide error types.

use std::{
    fmt, io,
    path::{Path, PathBuf},
};

use thiserror::Error;

use crate::{
    lexer::LexError,
    parser::ParseError,
    ser::SerializeError,
    source::{SourceId, SourceMap},
    validate::ValidationError,
};

/// Location of a token or definition in a source file.
///
/// Lines and columns are 1-based; columns count UTF-8 characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Position {
    pub source: SourceId,
    pub line: u32,
    pub column: u32,
}

impl Position {
    pub fn new(source: SourceId, line: u32, column: u32) -> Self {
        Self {
            source,
            line,
            column,
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// The pipeline stage an error originates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Lex,
    Parse,
    Validation,
    Serialization,
    Io,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Lex => "lex",
            Stage::Parse => "parse",
            Stage::Validation => "validation",
            Stage::Serialization => "serialization",
            Stage::Io => "I/O",
        })
    }
}

/// First fatal error raised by any stage of the pipeline.
#[derive(Debug, Error)]
pub enum Error {
    #[error("lex error: {0}")]
    Lex(#[from] LexError),

    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("serialization error: {0}")]
    Serialize(#[from] SerializeError),

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl Error {
    pub fn stage(&self) -> Stage {
        match self {
            Error::Lex(_) => Stage::Lex,
            Error::Parse(_) => Stage::Parse,
            Error::Validation(_) => Stage::Validation,
            Error::Serialize(_) => Stage::Serialization,
            Error::Io { .. } => Stage::Io,
        }
    }

    /// Source position the error refers to, when there is one.
    pub fn position(&self) -> Option<Position> {
        match self {
            Error::Lex(e) => Some(e.position),
            Error::Parse(e) => Some(e.position),
            Error::Validation(e) => Some(e.position),
            Error::Serialize(e) => e.position,
            Error::Io { .. } => None,
        }
    }
}

/// Error returned by the compiler driver.
///
/// Wraps the first fatal [`Error`] together with the path of the file its position points into,
/// and renders as a single diagnostic line: `file:line:column: <stage> error: <message>`.
#[derive(Debug)]
pub struct CompileError {
    file: Option<PathBuf>,
    error: Error,
}

impl CompileError {
    pub(crate) fn new(error: Error, sources: &SourceMap) -> Self {
        let file = error
            .position()
            .map(|position| sources.path(position.source).to_path_buf());

        Self { file, error }
    }

    pub fn stage(&self) -> Stage {
        self.error.stage()
    }

    pub fn position(&self) -> Option<Position> {
        self.error.position()
    }

    /// The file [`CompileError::position`] refers to.
    pub fn file(&self) -> Option<&Path> {
        self.file.as_deref()
    }

    pub fn error(&self) -> &Error {
        &self.error
    }

    pub fn into_error(self) -> Error {
        self.error
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.file, self.error.position()) {
            (Some(file), Some(position)) => {
                write!(f, "{}:{}: {}", file.display(), position, self.error)
            }
            _ => write!(f, "{}", self.error),
        }
    }
}

impl std::error::Error for CompileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}
