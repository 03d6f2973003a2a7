//! Instruction templates.
//!
//! A template is the static declaration of one opcode: its signature, its
//! names and the ordered shape of its parameters. Real occurrences may stop
//! before the last declared parameter, so the shape is only an upper bound.

pub mod definition;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::Result;

/// Interpretation of a plain 4-byte word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WordKind {
    /// Unsigned 32-bit integer
    UInt32,
    /// IEEE-754 single
    Float,
    /// Absolute offset of another instruction in the same file
    JumpTarget,
}

impl WordKind {
    /// Label given to decoded parameters of this kind.
    pub fn label(self) -> &'static str {
        match self {
            WordKind::UInt32 => "uint32",
            WordKind::Float => "float",
            WordKind::JumpTarget => "jump target",
        }
    }
}

/// Layout of a tagged variable reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableWidth {
    /// Word-aligned 4-byte tag word followed by a 4-byte value.
    Word,
    /// 2-byte tag halfword followed by a 2-byte value.
    Half,
    /// Single tag byte followed by a 4-byte value, unaligned.
    Compact,
}

impl VariableWidth {
    /// Bytes occupied by the tag.
    pub fn tag_size(self) -> usize {
        match self {
            VariableWidth::Word => 4,
            VariableWidth::Half => 2,
            VariableWidth::Compact => 1,
        }
    }

    /// Bytes occupied by the value.
    pub fn value_size(self) -> usize {
        match self {
            VariableWidth::Word | VariableWidth::Compact => 4,
            VariableWidth::Half => 2,
        }
    }

    /// Whether the tag must start on a 4-byte boundary.
    pub fn requires_alignment(self) -> bool {
        matches!(self, VariableWidth::Word)
    }
}

/// Encoding of the element count of a count-prefixed parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CountEncoding {
    /// One immediate byte.
    Byte,
    /// A tag byte followed by a 4-byte word.
    TaggedWord,
    /// A plain 4-byte integer.
    Word,
}

/// Element type of a count-prefixed parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementKind {
    /// Fixed 4-byte word
    Fixed(WordKind),
    /// Tagged variable reference
    Tagged(VariableWidth),
}

/// Declared kind of a template parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterKind {
    /// Fixed-width 4-byte word.
    FixedWord(WordKind),
    /// Tagged variable reference; the tag decides the resolved label.
    TaggedVariable(VariableWidth),
    /// NUL-terminated Shift-JIS string.
    String,
    /// Count followed by that many elements.
    CountPrefixed {
        /// How the count is stored
        count: CountEncoding,
        /// Type of every element
        element: ElementKind,
    },
    /// Every remaining word of the buffer.
    Continuous,
    /// Category word followed by an entity identifier.
    EntityId,
    /// Category word followed by an equipment identifier.
    EquipId,
    /// Key binding identifier.
    KeybindId,
}

impl ParameterKind {
    /// True for kinds that may be followed by alignment padding.
    pub fn is_string(&self) -> bool {
        matches!(self, ParameterKind::String)
    }
}

fn parse_word_kind(token: &str) -> Option<WordKind> {
    match token {
        "uint32" | "u32" | "int" => Some(WordKind::UInt32),
        "float" => Some(WordKind::Float),
        "jump" | "jump_target" => Some(WordKind::JumpTarget),
        _ => None,
    }
}

fn parse_variable_width(token: &str) -> Option<VariableWidth> {
    match token {
        "variable" | "var" => Some(VariableWidth::Word),
        "variable2" | "var2" => Some(VariableWidth::Half),
        "compact_variable" | "varc" => Some(VariableWidth::Compact),
        _ => None,
    }
}

fn parse_element(token: &str) -> Option<ElementKind> {
    parse_word_kind(token)
        .map(ElementKind::Fixed)
        .or_else(|| parse_variable_width(token).map(ElementKind::Tagged))
}

impl FromStr for ParameterKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let token = s.trim().to_ascii_lowercase();

        if let Some((prefix, element)) = token.split_once(':') {
            let count = match prefix {
                "count_byte" => CountEncoding::Byte,
                "count_tagged" => CountEncoding::TaggedWord,
                "count_word" => CountEncoding::Word,
                _ => return Err(format!("unknown count encoding `{}`", prefix)),
            };
            let element = parse_element(element)
                .ok_or_else(|| format!("unknown element kind `{}`", element))?;
            return Ok(ParameterKind::CountPrefixed { count, element });
        }

        if let Some(word) = parse_word_kind(&token) {
            return Ok(ParameterKind::FixedWord(word));
        }
        if let Some(width) = parse_variable_width(&token) {
            return Ok(ParameterKind::TaggedVariable(width));
        }

        match token.as_str() {
            "string" => Ok(ParameterKind::String),
            "continuous" => Ok(ParameterKind::Continuous),
            "entity_id" => Ok(ParameterKind::EntityId),
            "equip_id" => Ok(ParameterKind::EquipId),
            "keybind_id" => Ok(ParameterKind::KeybindId),
            _ => Err(format!("unknown parameter kind `{}`", s.trim())),
        }
    }
}

fn word_token(kind: WordKind) -> &'static str {
    match kind {
        WordKind::UInt32 => "uint32",
        WordKind::Float => "float",
        WordKind::JumpTarget => "jump",
    }
}

fn width_token(width: VariableWidth) -> &'static str {
    match width {
        VariableWidth::Word => "variable",
        VariableWidth::Half => "variable2",
        VariableWidth::Compact => "compact_variable",
    }
}

impl fmt::Display for ParameterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterKind::FixedWord(kind) => write!(f, "{}", word_token(*kind)),
            ParameterKind::TaggedVariable(width) => write!(f, "{}", width_token(*width)),
            ParameterKind::String => write!(f, "string"),
            ParameterKind::CountPrefixed { count, element } => {
                let prefix = match count {
                    CountEncoding::Byte => "count_byte",
                    CountEncoding::TaggedWord => "count_tagged",
                    CountEncoding::Word => "count_word",
                };
                let element = match element {
                    ElementKind::Fixed(kind) => word_token(*kind),
                    ElementKind::Tagged(width) => width_token(*width),
                };
                write!(f, "{}:{}", prefix, element)
            }
            ParameterKind::Continuous => write!(f, "continuous"),
            ParameterKind::EntityId => write!(f, "entity_id"),
            ParameterKind::EquipId => write!(f, "equip_id"),
            ParameterKind::KeybindId => write!(f, "keybind_id"),
        }
    }
}

/// One declared parameter of a template.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParameterDeclaration {
    /// Declared kind
    pub kind: ParameterKind,
    /// Declared name
    pub name: String,
}

impl ParameterDeclaration {
    /// Create a new declaration.
    pub fn new(kind: ParameterKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

/// Static declaration of one opcode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstructionTemplate {
    /// Big-endian signature; the top byte is always the marker.
    pub signature: u32,
    /// Short function name
    pub name: String,
    /// Extended name
    pub extended_name: String,
    /// Free-form description
    pub description: String,
    /// Raw size hint from the definition row, when it parsed
    pub raw_size: Option<u32>,
    /// Address of the handler in the game executable
    pub function_address: u32,
    /// Ordered parameter declarations
    pub parameters: Vec<ParameterDeclaration>,
}

impl InstructionTemplate {
    /// Create a template with no parameters.
    pub fn new(signature: u32, name: impl Into<String>) -> Self {
        Self {
            signature,
            name: name.into(),
            extended_name: String::new(),
            description: String::new(),
            raw_size: None,
            function_address: 0,
            parameters: Vec::new(),
        }
    }

    /// Append a parameter declaration.
    pub fn with_parameter(mut self, kind: ParameterKind, name: impl Into<String>) -> Self {
        self.parameters.push(ParameterDeclaration::new(kind, name));
        self
    }

    /// Opcode class, the second signature byte.
    pub fn class(&self) -> u8 {
        ((self.signature >> 16) & 0xFF) as u8
    }

    /// Opcode index within its class.
    pub fn index(&self) -> u16 {
        (self.signature & 0xFFFF) as u16
    }

    /// True if the last declared parameter is a string.
    pub fn ends_with_string(&self) -> bool {
        self.parameters.last().is_some_and(|p| p.kind.is_string())
    }
}

/// Read-only registry of instruction templates keyed by signature.
#[derive(Debug, Clone, Default)]
pub struct Templates {
    by_signature: HashMap<u32, Arc<InstructionTemplate>>,
    by_name: HashMap<String, u32>,
}

impl Templates {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from a definition source.
    ///
    /// Fails with [`crate::PacError::MalformedDefinitionRow`] on the first bad row.
    pub fn load(source: &str) -> Result<Self> {
        Ok(Self::from_templates(definition::parse_rows(source)?))
    }

    /// Read and load a definition file.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::load(&source)
    }

    /// Replace the whole content with `source`.
    ///
    /// The registry is left untouched when loading fails.
    pub fn reload(&mut self, source: &str) -> Result<()> {
        *self = Self::load(source)?;
        Ok(())
    }

    /// Build a registry from already constructed templates.
    ///
    /// A later template with the same signature replaces an earlier one.
    pub fn from_templates<I>(templates: I) -> Self
    where
        I: IntoIterator<Item = InstructionTemplate>,
    {
        let mut registry = Self::new();
        for template in templates {
            let signature = template.signature;
            registry.by_name.insert(template.name.clone(), signature);
            if let Some(replaced) = registry.by_signature.insert(signature, Arc::new(template)) {
                let renamed = registry
                    .get(signature)
                    .is_some_and(|current| current.name != replaced.name);
                if renamed && registry.by_name.get(&replaced.name) == Some(&signature) {
                    registry.by_name.remove(&replaced.name);
                }
            }
        }
        registry
    }

    /// Look up a template by signature.
    pub fn get(&self, signature: u32) -> Option<&Arc<InstructionTemplate>> {
        self.by_signature.get(&signature)
    }

    /// True if `signature` has a template.
    pub fn contains(&self, signature: u32) -> bool {
        self.by_signature.contains_key(&signature)
    }

    /// Look up a template by its function name.
    pub fn by_name(&self, name: &str) -> Option<&Arc<InstructionTemplate>> {
        self.by_name.get(name).and_then(|sig| self.get(*sig))
    }

    /// Number of templates.
    pub fn len(&self) -> usize {
        self.by_signature.len()
    }

    /// True if the registry holds no templates.
    pub fn is_empty(&self) -> bool {
        self.by_signature.is_empty()
    }

    /// Templates sorted by signature.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<InstructionTemplate>> {
        let mut templates: Vec<_> = self.by_signature.values().collect();
        templates.sort_by_key(|t| t.signature);
        templates.into_iter()
    }
}
