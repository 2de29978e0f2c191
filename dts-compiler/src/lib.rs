//! Device tree compiler.
//!
//! Turns device tree source (`.dts`) into a flattened device tree blob (FDT version 17). The
//! pipeline runs in strict sequence and stops at the first fatal error:
//!
//! 1. [`lexer`] splits the text into tokens,
//! 2. [`parser`] builds the node [`tree`], following `/include/` directives,
//! 3. [`validate`] applies edits, resolves references and checks well-known properties,
//! 4. [`ser`] lays the tree out and emits the image.
//!
//! [`driver::Compiler`] ties the stages together and owns all file I/O.
//!
//! ```no_run
//! dts_compiler::compile("board.dts", "board.dtb")?;
//! # Ok::<(), dts_compiler::CompileError>(())
//! ```

pub mod driver;
pub mod error;
pub mod expr;
pub mod fdt;
pub mod lexer;
pub mod parser;
pub mod ser;
pub mod source;
pub mod tree;
pub mod validate;

pub use driver::{compile, Compiler, Config};
pub use error::{CompileError, Error, Position, Stage};
pub use ser::BinaryImage;

/// Compiles source text with the default configuration.
pub fn from_str(input: &str) -> Result<BinaryImage, CompileError> {
    Compiler::default().compile_str("<input>", input)
}
