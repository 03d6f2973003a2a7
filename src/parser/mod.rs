//! PAC buffer parser.
//!
//! The parser walks a buffer once, front to back. It jumps between marker
//! candidates, classifies the bytes in between, and decodes each
//! marker-aligned signature that has a template. See [`scanner`] for the
//! walk and [`decoder`] for argument decoding.

pub mod decoder;
pub mod scanner;

use tracing::debug;

use crate::error::Result;
use crate::heuristics::CandidatePolicy;
use crate::model::PacFile;
use crate::templates::Templates;

/// Options controlling a scan.
#[derive(Debug, Clone, Copy)]
pub struct ParserOptions {
    /// Which marker positions are dispatched on
    pub policy: CandidatePolicy,
    /// Signature of the indexed-jump (switch) opcode, if known
    pub indexed_jump_signature: Option<u32>,
    /// Record the bytes after an indexed jump as a jump table
    pub capture_jump_tables: bool,
}

impl ParserOptions {
    /// Permissive scanning: every marker is a candidate.
    pub fn new() -> Self {
        Self {
            policy: CandidatePolicy::Permissive,
            indexed_jump_signature: None,
            capture_jump_tables: true,
        }
    }

    /// Only markers followed by a plausible class byte are candidates.
    pub fn conservative() -> Self {
        Self {
            policy: CandidatePolicy::conservative(),
            ..Self::new()
        }
    }

    /// Only signatures with a template are candidates; unknown
    /// instructions are never produced.
    pub fn known_only() -> Self {
        Self {
            policy: CandidatePolicy::KnownOnly,
            ..Self::new()
        }
    }

    /// Set the indexed-jump opcode whose branch table should be captured.
    pub fn with_indexed_jump(mut self, signature: u32) -> Self {
        self.indexed_jump_signature = Some(signature);
        self
    }

    /// Replace the candidate policy.
    pub fn with_policy(mut self, policy: CandidatePolicy) -> Self {
        self.policy = policy;
        self
    }
}

impl Default for ParserOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// Scans buffers against a template registry.
///
/// The parser holds no per-buffer state; one instance can parse any number
/// of buffers, from any number of threads.
#[derive(Debug, Clone, Copy)]
pub struct Parser<'t> {
    templates: &'t Templates,
    options: ParserOptions,
}

impl<'t> Parser<'t> {
    /// Create a parser over `templates`.
    pub fn new(templates: &'t Templates, options: ParserOptions) -> Self {
        Self { templates, options }
    }

    /// Templates this parser decodes with.
    pub fn templates(&self) -> &'t Templates {
        self.templates
    }

    /// Options in effect.
    pub fn options(&self) -> &ParserOptions {
        &self.options
    }

    /// Parse `data` into an entity model.
    ///
    /// An empty buffer yields an empty model. The only failure is a
    /// template whose decoded parameters collide on `(label, name)`.
    pub fn parse(&self, data: &[u8]) -> Result<PacFile> {
        let file = scanner::Scanner::new(data, self.templates, &self.options).run()?;
        debug!(
            size = file.size(),
            entities = file.len(),
            instructions = file.instructions_count(),
            unknown = file.unknown_instructions_count(),
            cut_off = file.cut_off_count(),
            "parsed PAC buffer"
        );
        Ok(file)
    }
}
