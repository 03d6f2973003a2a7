//! PAC Scanner - Script Bytecode Recovery for PSP PAC Containers
//!
//! This library recovers the structure of "PAC" script files: unindexed
//! buffers that mix typed, variable-length instructions with raw data,
//! padding, jump tables and message tables.
//!
//! # Features
//!
//! - **Template Registry**: Loads opcode declarations from a semicolon-delimited definition source
//! - **Heuristic Scanning**: Finds instruction boundaries by marker search with pluggable candidate policies
//! - **Tolerant Decoding**: Decodes tag-dispatched arguments and recovers from truncated instructions
//! - **Complete Coverage**: Every byte of the buffer belongs to exactly one entity
//! - **Control Flow**: Builds a block graph with fallthrough, jump and jump-table edges
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use pac_scanner::{parse_bytes, Templates};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let templates = Templates::from_path("instructions.txt")?;
//!     let data = std::fs::read("script.pac")?;
//!     let file = parse_bytes(&templates, &data)?;
//!     println!("Instructions: {}", file.instructions_count());
//!     println!("Unknown:      {}", file.unknown_instructions_count());
//!     Ok(())
//! }
//! ```
//!
//! # Entities
//!
//! - **Instruction**: a decoded occurrence of a known signature
//! - **Unknown instruction**: a marker-aligned signature with no template
//! - **Padding**: alignment bytes after a string-terminated instruction
//! - **Message table**: a `0, 1, ..., n-1` word table
//! - **Jump table**: branch offsets after an indexed jump
//! - **Left-out arguments**: tag/value pairs trailing an instruction
//! - **Raw span**: anything else

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::cast_possible_truncation)]

#[cfg(feature = "batch")]
pub mod batch;
pub mod entity;
pub mod error;
pub mod flow;
pub mod formatter;
pub mod heuristics;
pub mod model;
pub mod parser;
pub mod reader;
pub mod templates;

pub use entity::{
    DecodedParameter, DecodedValue, Entity, EntityKind, Instruction, JumpTable, LeftOutArguments,
    MessageTable, PaddingBytes, ParameterSet, RawSpan, UnknownInstruction,
};
pub use error::{PacError, Result};
pub use flow::{FlowGraph, FlowOptions, Transition};
pub use heuristics::CandidatePolicy;
pub use model::PacFile;
pub use parser::{Parser, ParserOptions};
pub use templates::{InstructionTemplate, ParameterKind, Templates};

use std::path::Path;

/// Parse a buffer with default options.
///
/// # Example
///
/// ```rust
/// use pac_scanner::{parse_bytes, InstructionTemplate, Templates};
///
/// let templates = Templates::from_templates([InstructionTemplate::new(0x2501_0000, "cmd_end")]);
/// let file = parse_bytes(&templates, &[0x25, 0x01, 0x00, 0x00])?;
/// assert_eq!(file.instructions_count(), 1);
/// # Ok::<(), pac_scanner::PacError>(())
/// ```
pub fn parse_bytes(templates: &Templates, data: &[u8]) -> Result<PacFile> {
    parse_bytes_with_options(templates, data, ParserOptions::new())
}

/// Parse a buffer with custom options.
pub fn parse_bytes_with_options(
    templates: &Templates,
    data: &[u8],
    options: ParserOptions,
) -> Result<PacFile> {
    Parser::new(templates, options).parse(data)
}

/// Read and parse a PAC file.
pub fn parse_file<P: AsRef<Path>>(
    templates: &Templates,
    path: P,
    options: ParserOptions,
) -> Result<PacFile> {
    let data = std::fs::read(path)?;
    parse_bytes_with_options(templates, &data, options)
}

/// Get version information for this library.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
