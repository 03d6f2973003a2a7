//! Output formatters for parsed PAC files.
//!
//! Trait-based renderers for an entity model: a disassembly listing, JSON,
//! and a one-line summary.

use serde::Serialize;
use std::fmt::Write as _;
use std::path::Path;

use crate::entity::{
    Entity, Instruction, JumpTable, LeftOutArguments, MessageTable, PaddingBytes, RawSpan,
    UnknownInstruction,
};
use crate::model::PacFile;
use crate::reader::TextEncoding;

/// Warning appended to instructions that stopped before their last
/// declared parameter.
pub const CUT_OFF_WARNING: &str = "[Warning, instruction unexpectedly ends!]";

/// Trait for rendering an entity model.
///
/// Implementors render the header, each entity and a footer; the default
/// [`format_file`](Self::format_file) concatenates them.
pub trait EntityFormatter {
    /// Format the header for `path`.
    fn format_header(&self, path: &Path, file: &PacFile) -> Option<String>;

    /// Format one entity, without trailing newline.
    fn format_entity(&self, entity: &Entity) -> Option<String>;

    /// Format the footer.
    fn format_footer(&self, file: &PacFile) -> Option<String>;

    /// Format the whole file.
    fn format_file(&self, file: &PacFile, path: &Path) -> String {
        let mut out = String::new();
        if let Some(header) = self.format_header(path, file) {
            out.push_str(&header);
        }
        for entity in file.entities() {
            if let Some(line) = self.format_entity(entity) {
                out.push_str(&line);
                out.push('\n');
            }
        }
        if let Some(footer) = self.format_footer(file) {
            out.push_str(&footer);
        }
        out
    }
}

/// Disassembly listing, one line per entity prefixed by its `%08X` offset.
#[derive(Debug, Clone, Default)]
pub struct ListingFormatter {
    /// Append the raw bytes of instructions and a count footer
    pub verbose: bool,
}

impl ListingFormatter {
    /// Create a plain listing formatter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a listing formatter that also dumps instruction bytes.
    pub fn verbose() -> Self {
        Self { verbose: true }
    }

    fn instruction(&self, instruction: &Instruction) -> String {
        let arguments: Vec<String> = instruction
            .parameters
            .ordered()
            .iter()
            .map(|p| format!("{{{}; {}}}={}", p.label, p.name, p.value))
            .collect();
        let mut line = format!(
            "{:X}:{}({})",
            instruction.signature,
            instruction.name(),
            arguments.join(", ")
        );
        if instruction.cut_off {
            line.push(' ');
            line.push_str(CUT_OFF_WARNING);
        }
        if self.verbose {
            let _ = write!(line, "  ; {}", hex::encode_upper(&instruction.raw));
        }
        line
    }

    fn unknown(&self, unknown: &UnknownInstruction) -> String {
        let mut line = format!("{:X}(Unknown): size = {}", unknown.signature, unknown.raw.len());
        if self.verbose {
            let _ = write!(line, "  ; {}", hex::encode_upper(&unknown.raw));
        }
        line
    }
}

fn raw_span(span: &RawSpan) -> String {
    let mut line = format!("Raw data: size = {} bytes", span.raw.len());
    // Only show text for spans that are valid Shift-JIS.
    if let Some(text) = TextEncoding::ShiftJis.decode_strict(&span.raw) {
        let _ = write!(line, ", shift-jis = ({})", text.replace('\0', ""));
    }
    line
}

fn padding(padding: &PaddingBytes) -> String {
    format!(
        "Padding bytes: count = {}, all zeroes = {}, machine word length = {}",
        padding.raw.len(),
        padding.zeroes_only,
        padding.machine_word_length
    )
}

fn jump_table(table: &JumpTable) -> String {
    let branches: Vec<String> = table.branches.iter().map(|b| format!("{:X}", b)).collect();
    format!(
        "Jump table: size = {} bytes, branches count = {}, addresses: ({})",
        table.raw.len(),
        table.branches.len(),
        branches.join(", ")
    )
}

fn message_table(table: &MessageTable) -> String {
    format!(
        "Message table: size = {} bytes, message count = {}",
        table.raw.len(),
        table.count
    )
}

fn left_out(args: &LeftOutArguments) -> String {
    format!(
        "Potential left-out arguments: size = {} bytes, supposed size of the instruction at {:08X} = {}",
        args.raw.len(),
        args.instruction_offset,
        args.supposed_size
    )
}

impl EntityFormatter for ListingFormatter {
    fn format_header(&self, path: &Path, file: &PacFile) -> Option<String> {
        self.verbose
            .then(|| format!("; {} ({} bytes)\n", path.display(), file.size()))
    }

    fn format_entity(&self, entity: &Entity) -> Option<String> {
        let body = match entity {
            Entity::Instruction(instruction) => self.instruction(instruction),
            Entity::UnknownInstruction(unknown) => self.unknown(unknown),
            Entity::RawSpan(span) => raw_span(span),
            Entity::Padding(bytes) => padding(bytes),
            Entity::MessageTable(table) => message_table(table),
            Entity::JumpTable(table) => jump_table(table),
            Entity::LeftOutArguments(args) => left_out(args),
        };
        Some(format!("{:08X}  {}", entity.offset(), body))
    }

    fn format_footer(&self, file: &PacFile) -> Option<String> {
        self.verbose.then(|| {
            format!(
                "; {} entities, {} instructions, {} unknown, {} cut off\n",
                file.len(),
                file.instructions_count(),
                file.unknown_instructions_count(),
                file.cut_off_count()
            )
        })
    }
}

/// JSON output formatter.
#[derive(Debug, Clone)]
pub struct JsonFormatter {
    /// Pretty-print JSON
    pub pretty: bool,
}

impl Default for JsonFormatter {
    fn default() -> Self {
        Self { pretty: true }
    }
}

impl JsonFormatter {
    /// Create a new JSON formatter with pretty printing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a compact JSON formatter.
    pub fn compact() -> Self {
        Self { pretty: false }
    }
}

impl EntityFormatter for JsonFormatter {
    fn format_header(&self, _path: &Path, _file: &PacFile) -> Option<String> {
        None
    }

    fn format_entity(&self, _entity: &Entity) -> Option<String> {
        None
    }

    fn format_footer(&self, _file: &PacFile) -> Option<String> {
        None
    }

    fn format_file(&self, file: &PacFile, path: &Path) -> String {
        #[derive(Serialize)]
        struct JsonOutput<'a> {
            file: String,
            #[serde(flatten)]
            model: &'a PacFile,
        }

        let output = JsonOutput {
            file: path.display().to_string(),
            model: file,
        };
        let mut json = if self.pretty {
            serde_json::to_string_pretty(&output).unwrap_or_else(|_| "{}".to_string())
        } else {
            serde_json::to_string(&output).unwrap_or_else(|_| "{}".to_string())
        };
        json.push('\n');
        json
    }
}

/// Single-line tab-separated counts.
#[derive(Debug, Clone, Default)]
pub struct SummaryFormatter;

impl SummaryFormatter {
    /// Create a new summary formatter.
    pub fn new() -> Self {
        Self
    }
}

impl EntityFormatter for SummaryFormatter {
    fn format_header(&self, _path: &Path, _file: &PacFile) -> Option<String> {
        None
    }

    fn format_entity(&self, _entity: &Entity) -> Option<String> {
        None
    }

    fn format_footer(&self, _file: &PacFile) -> Option<String> {
        None
    }

    fn format_file(&self, file: &PacFile, path: &Path) -> String {
        format!(
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\n",
            path.display(),
            file.size(),
            file.len(),
            file.instructions_count(),
            file.unknown_instructions_count(),
            file.cut_off_count(),
            file.message_tables().count() + file.jump_tables().count()
        )
    }
}
