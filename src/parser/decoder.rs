//! Argument decoding for known signatures.
//!
//! A template only bounds what an occurrence may contain. Decoding walks the
//! declared parameters in order and stops early, marking the instruction as
//! cut off, when the bytes run out or when an argument tag turns out to be
//! the start of the next instruction.

use std::ops::ControlFlow;
use std::sync::Arc;

use crate::entity::{DecodedParameter, DecodedValue, Instruction, ParameterSetBuilder};
use crate::error::Result;
use crate::heuristics::looks_like_instruction_start;
use crate::reader::{self, TextEncoding};
use crate::templates::{
    CountEncoding, ElementKind, InstructionTemplate, ParameterKind, VariableWidth, WordKind,
};

const SIGNATURE_SIZE: usize = 4;
const WORD: usize = 4;

/// Label given to the element count of a count-prefixed parameter.
pub const COUNT_LABEL: &str = "count";

/// Label given to a tagged variable whose tag is not recognized.
pub const UNKNOWN_LABEL: &str = "Unknown";

/// Resolved label for a variable tag byte.
pub fn tag_label(tag: u8) -> Option<&'static str> {
    match tag {
        0x40 => Some("0x40 variable"),
        0x20 => Some("0x20 variable"),
        0x10 => Some("float"),
        0x08 => Some("0x8 variable"),
        0x04 => Some("0x4 variable"),
        0x02 => Some("uint32"),
        0x01 => Some("0x1 value"),
        _ => None,
    }
}

fn align_up(offset: usize) -> usize {
    (offset + WORD - 1) & !(WORD - 1)
}

/// Decode the instruction described by `template` at `offset`.
///
/// The caller guarantees that the four signature bytes exist. Decoding
/// never fails on short data; the only error is a duplicate parameter key.
pub fn decode_instruction(
    data: &[u8],
    offset: usize,
    template: &Arc<InstructionTemplate>,
) -> Result<Instruction> {
    let mut walker = ArgumentWalker::new(data, offset + SIGNATURE_SIZE);
    for declaration in &template.parameters {
        if walker.decode(declaration.kind, &declaration.name).is_break() {
            walker.cut_off = true;
            break;
        }
    }

    let end = walker.pos.min(data.len());
    let parameters = walker.params.freeze(offset)?;
    Ok(Instruction {
        offset,
        signature: template.signature,
        template: Arc::clone(template),
        raw: data[offset..end].to_vec(),
        cut_off: walker.cut_off,
        parameters,
    })
}

struct ArgumentWalker<'a> {
    data: &'a [u8],
    pos: usize,
    params: ParameterSetBuilder,
    cut_off: bool,
}

impl<'a> ArgumentWalker<'a> {
    fn new(data: &'a [u8], pos: usize) -> Self {
        Self {
            data,
            pos,
            params: ParameterSetBuilder::new(),
            cut_off: false,
        }
    }

    fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    fn push(&mut self, label: &str, name: impl Into<String>, value: DecodedValue) {
        self.params.push(DecodedParameter::new(label, name, value));
    }

    fn decode(&mut self, kind: ParameterKind, name: &str) -> ControlFlow<()> {
        match kind {
            ParameterKind::FixedWord(word) => self.fixed_word(word, name.to_string()),
            ParameterKind::TaggedVariable(width) => self.tagged(width, name.to_string()),
            ParameterKind::String => self.string(name),
            ParameterKind::CountPrefixed { count, element } => {
                self.count_prefixed(count, element, name)
            }
            ParameterKind::Continuous => self.continuous(name),
            ParameterKind::EntityId => self.identifier("entity id", name, true),
            ParameterKind::EquipId => self.identifier("equip id", name, true),
            ParameterKind::KeybindId => self.identifier("keybind id", name, false),
        }
    }

    fn fixed_word(&mut self, kind: WordKind, name: String) -> ControlFlow<()> {
        let Ok(bits) = reader::read_u32_le(self.data, self.pos) else {
            return ControlFlow::Break(());
        };
        let value = match kind {
            WordKind::Float => DecodedValue::Float(f32::from_bits(bits)),
            WordKind::UInt32 | WordKind::JumpTarget => DecodedValue::Int(bits),
        };
        self.push(kind.label(), name, value);
        self.pos += WORD;
        ControlFlow::Continue(())
    }

    fn tagged(&mut self, width: VariableWidth, name: String) -> ControlFlow<()> {
        let tag_pos = if width.requires_alignment() {
            align_up(self.pos)
        } else {
            self.pos
        };
        let value_pos = tag_pos + width.tag_size();
        let end = value_pos + width.value_size();
        if end > self.data.len() {
            return ControlFlow::Break(());
        }

        let tag = self.data[tag_pos];
        let label = match tag_label(tag) {
            Some(label) => label,
            None if looks_like_instruction_start(&self.data[tag_pos..]) => {
                self.pos = tag_pos;
                return ControlFlow::Break(());
            }
            None => UNKNOWN_LABEL,
        };

        let value = match width {
            VariableWidth::Half => reader::read_u16_le(self.data, value_pos).map(u32::from),
            VariableWidth::Word | VariableWidth::Compact => reader::read_u32_le(self.data, value_pos),
        };
        let Ok(value) = value else {
            return ControlFlow::Break(());
        };
        let value = if tag == 0x10 && width != VariableWidth::Half {
            DecodedValue::Float(f32::from_bits(value))
        } else {
            DecodedValue::Int(value)
        };
        self.push(label, name, value);
        self.pos = end;
        ControlFlow::Continue(())
    }

    fn string(&mut self, name: &str) -> ControlFlow<()> {
        match reader::read_cstring(self.data, self.pos, TextEncoding::ShiftJis) {
            Ok((text, consumed)) => {
                self.push("string", name, DecodedValue::Text(text));
                self.pos += consumed;
                ControlFlow::Continue(())
            }
            Err(_) => ControlFlow::Break(()),
        }
    }

    fn count_prefixed(
        &mut self,
        encoding: CountEncoding,
        element: ElementKind,
        name: &str,
    ) -> ControlFlow<()> {
        let (count, size) = match encoding {
            CountEncoding::Byte => (reader::read_u8(self.data, self.pos).map(u32::from), 1),
            CountEncoding::TaggedWord => (reader::read_u32_le(self.data, self.pos + 1), 5),
            CountEncoding::Word => (reader::read_u32_le(self.data, self.pos), WORD),
        };
        let Ok(count) = count else {
            return ControlFlow::Break(());
        };
        self.push(COUNT_LABEL, name, DecodedValue::Int(count));
        self.pos += size;

        for i in 0..count {
            let element_name = format!("{}[{}]", name, i);
            match element {
                ElementKind::Fixed(word) => self.fixed_word(word, element_name)?,
                ElementKind::Tagged(width) => self.tagged(width, element_name)?,
            }
        }
        ControlFlow::Continue(())
    }

    fn continuous(&mut self, name: &str) -> ControlFlow<()> {
        let words = self.remaining() / WORD;
        for i in 0..words {
            self.fixed_word(WordKind::UInt32, format!("{}[{}]", name, i))?;
        }
        ControlFlow::Continue(())
    }

    fn identifier(&mut self, label: &str, name: &str, has_category: bool) -> ControlFlow<()> {
        let value_pos = if has_category { self.pos + WORD } else { self.pos };
        let Ok(value) = reader::read_u32_le(self.data, value_pos) else {
            return ControlFlow::Break(());
        };
        self.push(label, name, DecodedValue::Int(value));
        self.pos = value_pos + WORD;
        ControlFlow::Continue(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template(parameters: &[(ParameterKind, &str)]) -> Arc<InstructionTemplate> {
        let mut template = InstructionTemplate::new(0x2504_0001, "cmd_test");
        for (kind, name) in parameters {
            template = template.with_parameter(*kind, *name);
        }
        Arc::new(template)
    }

    fn with_signature(args: &[u8]) -> Vec<u8> {
        let mut data = vec![0x25, 0x04, 0x00, 0x01];
        data.extend_from_slice(args);
        data
    }

    #[test]
    fn test_fixed_words() {
        let template = template(&[
            (ParameterKind::FixedWord(WordKind::UInt32), "count"),
            (ParameterKind::FixedWord(WordKind::Float), "speed"),
            (ParameterKind::FixedWord(WordKind::JumpTarget), "target"),
        ]);
        let mut args = vec![7, 0, 0, 0];
        args.extend_from_slice(&1.5f32.to_le_bytes());
        args.extend_from_slice(&[0x40, 0x01, 0, 0]);
        let data = with_signature(&args);

        let instruction = decode_instruction(&data, 0, &template).unwrap();
        assert!(!instruction.cut_off);
        assert_eq!(instruction.size(), 16);
        let params = &instruction.parameters;
        assert_eq!(params.get("uint32", "count").unwrap().value, DecodedValue::Int(7));
        assert_eq!(params.get("float", "speed").unwrap().value, DecodedValue::Float(1.5));
        assert_eq!(instruction.jump_targets().collect::<Vec<_>>(), vec![0x140]);
    }

    #[test]
    fn test_tagged_widths() {
        let template = template(&[
            (ParameterKind::TaggedVariable(VariableWidth::Compact), "a"),
            (ParameterKind::TaggedVariable(VariableWidth::Word), "b"),
            (ParameterKind::TaggedVariable(VariableWidth::Half), "c"),
        ]);
        // compact at 4..9, word aligned to 12..20, half at 20..24
        let args = [
            0x20, 3, 0, 0, 0, // a
            0xEE, 0xEE, 0xEE, // alignment
            0x40, 0, 0, 0, 9, 0, 0, 0, // b
            0x08, 0, 0x34, 0x12, // c
        ];
        let data = with_signature(&args);

        let instruction = decode_instruction(&data, 0, &template).unwrap();
        assert!(!instruction.cut_off);
        assert_eq!(instruction.size(), data.len());
        let params = &instruction.parameters;
        assert_eq!(params.get("0x20 variable", "a").unwrap().value, DecodedValue::Int(3));
        assert_eq!(params.get("0x40 variable", "b").unwrap().value, DecodedValue::Int(9));
        assert_eq!(
            params.get("0x8 variable", "c").unwrap().value,
            DecodedValue::Int(0x1234)
        );
    }

    #[test]
    fn test_float_tag() {
        let template = template(&[(ParameterKind::TaggedVariable(VariableWidth::Word), "x")]);
        let mut args = vec![0x10, 0, 0, 0];
        args.extend_from_slice(&2.0f32.to_le_bytes());
        let data = with_signature(&args);
        let instruction = decode_instruction(&data, 0, &template).unwrap();
        assert_eq!(
            instruction.parameters.get("float", "x").unwrap().value,
            DecodedValue::Float(2.0)
        );
    }

    #[test]
    fn test_unknown_tag_is_kept() {
        let template = template(&[
            (ParameterKind::TaggedVariable(VariableWidth::Word), "x"),
            (ParameterKind::FixedWord(WordKind::UInt32), "y"),
        ]);
        let data = with_signature(&[0x03, 0, 0, 0, 5, 0, 0, 0, 6, 0, 0, 0]);
        let instruction = decode_instruction(&data, 0, &template).unwrap();
        assert!(!instruction.cut_off);
        assert_eq!(
            instruction.parameters.get(UNKNOWN_LABEL, "x").unwrap().value,
            DecodedValue::Int(5)
        );
        assert_eq!(instruction.parameters.len(), 2);
    }

    #[test]
    fn test_marker_tag_rewinds() {
        let template = template(&[
            (ParameterKind::TaggedVariable(VariableWidth::Word), "x"),
            (ParameterKind::TaggedVariable(VariableWidth::Word), "y"),
        ]);
        let data = with_signature(&[
            0x02, 0, 0, 0, 1, 0, 0, 0, // x
            0x25, 0x01, 0x00, 0x00, 0, 0, 0, 0, // next instruction
        ]);
        let instruction = decode_instruction(&data, 0, &template).unwrap();
        assert!(instruction.cut_off);
        assert_eq!(instruction.size(), 12);
        assert_eq!(instruction.parameters.len(), 1);
    }

    #[test]
    fn test_short_data_cuts_off() {
        let template = template(&[
            (ParameterKind::FixedWord(WordKind::UInt32), "a"),
            (ParameterKind::FixedWord(WordKind::UInt32), "b"),
        ]);
        let data = with_signature(&[1, 0, 0, 0, 2, 0]);
        let instruction = decode_instruction(&data, 0, &template).unwrap();
        assert!(instruction.cut_off);
        assert_eq!(instruction.size(), 8);
        assert_eq!(instruction.parameters.len(), 1);
    }

    #[test]
    fn test_unterminated_string() {
        let template = template(&[(ParameterKind::String, "text")]);
        let data = with_signature(b"abc");
        let instruction = decode_instruction(&data, 0, &template).unwrap();
        assert!(instruction.cut_off);
        assert_eq!(instruction.size(), 4);
    }

    #[test]
    fn test_count_prefixed() {
        let template = template(&[(
            ParameterKind::CountPrefixed {
                count: CountEncoding::Byte,
                element: ElementKind::Fixed(WordKind::UInt32),
            },
            "ids",
        )]);
        let data = with_signature(&[2, 0x0A, 0, 0, 0, 0x0B, 0, 0, 0]);
        let instruction = decode_instruction(&data, 0, &template).unwrap();
        assert!(!instruction.cut_off);
        let params = &instruction.parameters;
        assert_eq!(params.get(COUNT_LABEL, "ids").unwrap().value, DecodedValue::Int(2));
        assert_eq!(params.get("uint32", "ids[0]").unwrap().value, DecodedValue::Int(0x0A));
        assert_eq!(params.get("uint32", "ids[1]").unwrap().value, DecodedValue::Int(0x0B));
    }

    #[test]
    fn test_count_prefixed_truncated() {
        let template = template(&[(
            ParameterKind::CountPrefixed {
                count: CountEncoding::TaggedWord,
                element: ElementKind::Tagged(VariableWidth::Compact),
            },
            "vars",
        )]);
        // count 3, only one full element
        let data = with_signature(&[0x02, 3, 0, 0, 0, 0x20, 1, 0, 0, 0, 0x20, 2]);
        let instruction = decode_instruction(&data, 0, &template).unwrap();
        assert!(instruction.cut_off);
        assert_eq!(instruction.parameters.len(), 2);
        assert_eq!(instruction.size(), 14);
    }

    #[test]
    fn test_continuous() {
        let template = template(&[(ParameterKind::Continuous, "rest")]);
        let data = with_signature(&[1, 0, 0, 0, 2, 0, 0, 0, 0xFF]);
        let instruction = decode_instruction(&data, 0, &template).unwrap();
        assert!(!instruction.cut_off);
        assert_eq!(instruction.parameters.len(), 2);
        assert_eq!(instruction.size(), 12);
        assert!(instruction.parameters.get("uint32", "rest[1]").is_some());
    }

    #[test]
    fn test_identifiers() {
        let template = template(&[
            (ParameterKind::EntityId, "unit"),
            (ParameterKind::KeybindId, "key"),
        ]);
        let data = with_signature(&[0x99, 0, 0, 0, 0x42, 0, 0, 0, 0x07, 0, 0, 0]);
        let instruction = decode_instruction(&data, 0, &template).unwrap();
        let params = &instruction.parameters;
        assert_eq!(params.get("entity id", "unit").unwrap().value, DecodedValue::Int(0x42));
        assert_eq!(params.get("keybind id", "key").unwrap().value, DecodedValue::Int(7));
        assert_eq!(instruction.size(), 16);
    }

    #[test]
    fn test_tag_labels() {
        assert_eq!(tag_label(0x40), Some("0x40 variable"));
        assert_eq!(tag_label(0x01), Some("0x1 value"));
        assert_eq!(tag_label(0x25), None);
    }
}
