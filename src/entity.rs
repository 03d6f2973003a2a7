//! Entities: the things that can occupy a byte range of a PAC file.
//!
//! Every entity owns a copy of the bytes it covers, so a model can be
//! printed or compared without the original buffer.

use serde::{Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{PacError, Result};
use crate::reader;
use crate::templates::{InstructionTemplate, WordKind};

/// Value of a decoded parameter.
///
/// Floats compare by bit pattern, so a NaN read from the buffer equals
/// itself and identical parses yield equal models.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum DecodedValue {
    /// Integer value
    Int(u32),
    /// Float value
    Float(f32),
    /// Text value
    Text(String),
}

impl PartialEq for DecodedValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (DecodedValue::Int(a), DecodedValue::Int(b)) => a == b,
            (DecodedValue::Float(a), DecodedValue::Float(b)) => a.to_bits() == b.to_bits(),
            (DecodedValue::Text(a), DecodedValue::Text(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for DecodedValue {}

impl fmt::Display for DecodedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodedValue::Int(v) => write!(f, "{:X}", v),
            DecodedValue::Float(v) => write!(f, "{}", v),
            DecodedValue::Text(s) => write!(f, "\"{}\"", s),
        }
    }
}

/// One parameter as found in the bytes of an instruction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodedParameter {
    /// Resolved label, e.g. `0x20 variable`
    pub label: String,
    /// Name from the template, or a synthesized `name[i]`
    pub name: String,
    /// Decoded value
    pub value: DecodedValue,
}

impl DecodedParameter {
    /// Create a new decoded parameter.
    pub fn new(label: impl Into<String>, name: impl Into<String>, value: DecodedValue) -> Self {
        Self {
            label: label.into(),
            name: name.into(),
            value,
        }
    }
}

/// Accumulates decoded parameters in order until [`freeze`](Self::freeze).
#[derive(Debug, Default)]
pub struct ParameterSetBuilder {
    ordered: Vec<DecodedParameter>,
}

impl ParameterSetBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a parameter.
    pub fn push(&mut self, parameter: DecodedParameter) {
        self.ordered.push(parameter);
    }

    /// Number of parameters pushed so far.
    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    /// True if nothing has been pushed.
    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    /// Build the immutable set.
    ///
    /// `offset` identifies the owning instruction in the error raised when
    /// two parameters share a `(label, name)` key.
    pub fn freeze(self, offset: usize) -> Result<ParameterSet> {
        let mut lookup: HashMap<String, HashMap<String, usize>> = HashMap::new();
        for (index, parameter) in self.ordered.iter().enumerate() {
            let names = lookup.entry(parameter.label.clone()).or_default();
            if names.insert(parameter.name.clone(), index).is_some() {
                return Err(PacError::DuplicateParameterKey {
                    offset,
                    label: parameter.label.clone(),
                    name: parameter.name.clone(),
                });
            }
        }
        Ok(ParameterSet {
            ordered: self.ordered,
            lookup,
        })
    }
}

/// Frozen parameters of one instruction: ordered and keyed by `(label, name)`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterSet {
    ordered: Vec<DecodedParameter>,
    // label -> name -> index into `ordered`
    lookup: HashMap<String, HashMap<String, usize>>,
}

impl ParameterSet {
    /// Parameters in decoding order.
    pub fn ordered(&self) -> &[DecodedParameter] {
        &self.ordered
    }

    /// Look up a parameter by its resolved label and name.
    pub fn get(&self, label: &str, name: &str) -> Option<&DecodedParameter> {
        let index = *self.lookup.get(label)?.get(name)?;
        self.ordered.get(index)
    }

    /// Find the first parameter with the given name, whatever its label.
    pub fn by_name(&self, name: &str) -> Option<&DecodedParameter> {
        self.ordered.iter().find(|p| p.name == name)
    }

    /// Number of parameters.
    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    /// True if no parameter was decoded.
    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }
}

impl Serialize for ParameterSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.ordered.serialize(serializer)
    }
}

fn serialize_template_name<S: Serializer>(
    template: &Arc<InstructionTemplate>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&template.name)
}

/// A decoded occurrence of a known opcode.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Instruction {
    /// Start offset in the file
    pub offset: usize,
    /// Big-endian signature
    pub signature: u32,
    /// Template this occurrence was decoded with
    #[serde(rename = "name", serialize_with = "serialize_template_name")]
    pub template: Arc<InstructionTemplate>,
    /// Consumed bytes, signature through the last consumed parameter byte
    #[serde(serialize_with = "serialize_hex")]
    pub raw: Vec<u8>,
    /// True when decoding stopped before the last declared parameter
    pub cut_off: bool,
    /// Decoded parameters
    pub parameters: ParameterSet,
}

impl Instruction {
    /// Opcode class.
    pub fn class(&self) -> u8 {
        ((self.signature >> 16) & 0xFF) as u8
    }

    /// Opcode index within its class.
    pub fn index(&self) -> u16 {
        (self.signature & 0xFFFF) as u16
    }

    /// Template name.
    pub fn name(&self) -> &str {
        &self.template.name
    }

    /// Number of bytes consumed.
    pub fn size(&self) -> usize {
        self.raw.len()
    }

    /// Values of every jump-target parameter that was decoded.
    pub fn jump_targets(&self) -> impl Iterator<Item = u32> + '_ {
        let label = WordKind::JumpTarget.label();
        self.parameters
            .ordered()
            .iter()
            .filter(move |p| p.label == label)
            .filter_map(|p| match p.value {
                DecodedValue::Int(target) => Some(target),
                _ => None,
            })
    }
}

/// An occurrence of a marker-aligned signature with no template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnknownInstruction {
    /// Start offset in the file
    pub offset: usize,
    /// Unmatched signature
    pub signature: u32,
    /// Bytes up to the next candidate marker or the end of the buffer
    #[serde(serialize_with = "serialize_hex")]
    pub raw: Vec<u8>,
}

/// Bytes between instructions that matched no other classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RawSpan {
    /// Start offset in the file
    pub offset: usize,
    /// Covered bytes
    #[serde(serialize_with = "serialize_hex")]
    pub raw: Vec<u8>,
}

/// Alignment bytes after a string-terminated instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaddingBytes {
    /// Start offset in the file
    pub offset: usize,
    /// Covered bytes
    #[serde(serialize_with = "serialize_hex")]
    pub raw: Vec<u8>,
    /// True when every padding byte is zero
    pub zeroes_only: bool,
    /// Alignment the padding restores
    pub machine_word_length: usize,
}

impl PaddingBytes {
    /// Alignment of PAC instructions.
    pub const MACHINE_WORD_LENGTH: usize = 4;

    /// Wrap padding bytes found at `offset`.
    pub fn new(offset: usize, raw: Vec<u8>) -> Self {
        let zeroes_only = raw.iter().all(|&b| b == 0);
        Self {
            offset,
            raw,
            zeroes_only,
            machine_word_length: Self::MACHINE_WORD_LENGTH,
        }
    }
}

/// A `0, 1, ..., n-1` word table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageTable {
    /// Start offset in the file
    pub offset: usize,
    /// Covered bytes
    #[serde(serialize_with = "serialize_hex")]
    pub raw: Vec<u8>,
    /// Number of entries
    pub count: usize,
}

impl MessageTable {
    /// Wrap a table found at `offset`.
    pub fn new(offset: usize, raw: Vec<u8>) -> Self {
        let count = raw.len() / 4;
        Self { offset, raw, count }
    }
}

/// Branch offsets following an indexed jump.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JumpTable {
    /// Start offset in the file
    pub offset: usize,
    /// Covered bytes
    #[serde(serialize_with = "serialize_hex")]
    pub raw: Vec<u8>,
    /// Branch targets as little-endian words
    pub branches: Vec<u32>,
}

impl JumpTable {
    /// Wrap a table found at `offset`.
    pub fn new(offset: usize, raw: Vec<u8>) -> Self {
        let branches = reader::le_words(&raw).collect();
        Self {
            offset,
            raw,
            branches,
        }
    }
}

/// Trailing tag/value pairs that belong to the preceding instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeftOutArguments {
    /// Start offset in the file
    pub offset: usize,
    /// Covered bytes
    #[serde(serialize_with = "serialize_hex")]
    pub raw: Vec<u8>,
    /// Offset of the instruction these arguments extend
    pub instruction_offset: usize,
    /// Size of the instruction if these bytes had been consumed by it
    pub supposed_size: usize,
    /// `(tag word, value word)` pairs
    pub pairs: Vec<(u32, u32)>,
}

impl LeftOutArguments {
    /// Wrap arguments found at `offset` after the instruction at
    /// `instruction_offset`.
    pub fn new(offset: usize, raw: Vec<u8>, instruction_offset: usize) -> Self {
        let words: Vec<u32> = reader::le_words(&raw).collect();
        let pairs = words.chunks_exact(2).map(|w| (w[0], w[1])).collect();
        let supposed_size = offset + raw.len() - instruction_offset;
        Self {
            offset,
            raw,
            instruction_offset,
            supposed_size,
            pairs,
        }
    }
}

/// Discriminant of an [`Entity`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// Decoded instruction
    Instruction,
    /// Unknown instruction
    UnknownInstruction,
    /// Raw span
    RawSpan,
    /// Padding
    Padding,
    /// Message table
    MessageTable,
    /// Jump table
    JumpTable,
    /// Left-out arguments
    LeftOutArguments,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityKind::Instruction => "instruction",
            EntityKind::UnknownInstruction => "unknown instruction",
            EntityKind::RawSpan => "raw span",
            EntityKind::Padding => "padding",
            EntityKind::MessageTable => "message table",
            EntityKind::JumpTable => "jump table",
            EntityKind::LeftOutArguments => "left-out arguments",
        };
        write!(f, "{}", name)
    }
}

/// Anything that occupies a byte range of a PAC file.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Entity {
    /// Decoded instruction
    Instruction(Instruction),
    /// Unrecognized signature
    UnknownInstruction(UnknownInstruction),
    /// Unclassified bytes
    RawSpan(RawSpan),
    /// Alignment padding
    Padding(PaddingBytes),
    /// Sequential integer table
    MessageTable(MessageTable),
    /// Indexed-jump branch table
    JumpTable(JumpTable),
    /// Trailing arguments of a cut-off instruction
    LeftOutArguments(LeftOutArguments),
}

impl Entity {
    /// Start offset in the file.
    pub fn offset(&self) -> usize {
        match self {
            Entity::Instruction(e) => e.offset,
            Entity::UnknownInstruction(e) => e.offset,
            Entity::RawSpan(e) => e.offset,
            Entity::Padding(e) => e.offset,
            Entity::MessageTable(e) => e.offset,
            Entity::JumpTable(e) => e.offset,
            Entity::LeftOutArguments(e) => e.offset,
        }
    }

    /// Covered bytes.
    pub fn raw(&self) -> &[u8] {
        match self {
            Entity::Instruction(e) => &e.raw,
            Entity::UnknownInstruction(e) => &e.raw,
            Entity::RawSpan(e) => &e.raw,
            Entity::Padding(e) => &e.raw,
            Entity::MessageTable(e) => &e.raw,
            Entity::JumpTable(e) => &e.raw,
            Entity::LeftOutArguments(e) => &e.raw,
        }
    }

    /// Number of covered bytes.
    pub fn size(&self) -> usize {
        self.raw().len()
    }

    /// One past the last covered offset.
    pub fn end(&self) -> usize {
        self.offset() + self.size()
    }

    /// True if `offset` lies inside this entity.
    pub fn contains(&self, offset: usize) -> bool {
        self.offset() <= offset && offset < self.end()
    }

    /// Entity discriminant.
    pub fn kind(&self) -> EntityKind {
        match self {
            Entity::Instruction(_) => EntityKind::Instruction,
            Entity::UnknownInstruction(_) => EntityKind::UnknownInstruction,
            Entity::RawSpan(_) => EntityKind::RawSpan,
            Entity::Padding(_) => EntityKind::Padding,
            Entity::MessageTable(_) => EntityKind::MessageTable,
            Entity::JumpTable(_) => EntityKind::JumpTable,
            Entity::LeftOutArguments(_) => EntityKind::LeftOutArguments,
        }
    }

    /// The decoded instruction, if this is one.
    pub fn as_instruction(&self) -> Option<&Instruction> {
        match self {
            Entity::Instruction(instruction) => Some(instruction),
            _ => None,
        }
    }

    /// The unknown instruction, if this is one.
    pub fn as_unknown(&self) -> Option<&UnknownInstruction> {
        match self {
            Entity::UnknownInstruction(unknown) => Some(unknown),
            _ => None,
        }
    }
}

fn serialize_hex<S: Serializer>(bytes: &[u8], serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&hex::encode_upper(bytes))
}
