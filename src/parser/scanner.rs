//! The scan loop.
//!
//! The scanner keeps three pieces of state: the cursor, the end of the last
//! recorded entity (`last_flushed`), and whether that entity was a decoded
//! instruction. Everything between `last_flushed` and the next dispatched
//! marker is a gap, classified by [`Scanner::flush_gap`]. Every byte of the
//! buffer ends up in exactly one entity.

use tracing::trace;

use super::decoder;
use super::ParserOptions;
use crate::entity::{
    Entity, JumpTable, LeftOutArguments, MessageTable, PaddingBytes, RawSpan, UnknownInstruction,
};
use crate::error::Result;
use crate::heuristics::{self, MARKER};
use crate::model::PacFile;
use crate::reader;
use crate::templates::Templates;

/// Single-use scan state over one buffer.
pub struct Scanner<'a> {
    data: &'a [u8],
    templates: &'a Templates,
    options: &'a ParserOptions,
    cursor: usize,
    last_flushed: usize,
    previous_was_instruction: bool,
    last_instruction_offset: usize,
    file: PacFile,
}

impl<'a> Scanner<'a> {
    /// Prepare a scan of `data`.
    pub fn new(data: &'a [u8], templates: &'a Templates, options: &'a ParserOptions) -> Self {
        Self {
            data,
            templates,
            options,
            cursor: 0,
            last_flushed: 0,
            previous_was_instruction: false,
            last_instruction_offset: 0,
            file: PacFile::with_size(data.len()),
        }
    }

    /// Walk the whole buffer and return the entity model.
    pub fn run(mut self) -> Result<PacFile> {
        while let Some(marker) = self.find_next_marker(self.cursor) {
            self.cursor = marker;
            self.flush_gap();
            self.dispatch()?;
        }
        self.cursor = self.data.len();
        self.flush_gap();
        Ok(self.file)
    }

    /// First candidate marker at or after `from`.
    ///
    /// A candidate has four bytes available and a signature the candidate
    /// policy accepts.
    pub fn find_next_marker(&self, from: usize) -> Option<usize> {
        let tail = self.data.get(from..)?;
        memchr::memchr_iter(MARKER, tail)
            .map(|relative| from + relative)
            .take_while(|&position| position + 4 <= self.data.len())
            .find(|&position| {
                reader::read_u32_be(self.data, position)
                    .is_ok_and(|signature| self.options.policy.accepts(signature, self.templates))
            })
    }

    /// Record `[last_flushed, cursor)` as a message table, left-out
    /// arguments, or a raw span.
    pub fn flush_gap(&mut self) {
        let start = self.last_flushed;
        if start < self.cursor {
            let raw = self.data[start..self.cursor].to_vec();
            let entity = if heuristics::is_message_table(&raw) {
                Entity::MessageTable(MessageTable::new(start, raw))
            } else if self.previous_was_instruction && heuristics::is_left_out_arguments(&raw) {
                Entity::LeftOutArguments(LeftOutArguments::new(
                    start,
                    raw,
                    self.last_instruction_offset,
                ))
            } else {
                Entity::RawSpan(RawSpan { offset: start, raw })
            };
            self.record(entity);
        }
        self.last_flushed = self.cursor;
        self.previous_was_instruction = false;
    }

    /// Handle the marker at the cursor.
    pub fn dispatch(&mut self) -> Result<()> {
        let start = self.cursor;
        let signature = reader::read_u32_be(self.data, start)?;
        let templates = self.templates;

        if let Some(template) = templates.get(signature) {
            let instruction = decoder::decode_instruction(self.data, start, template)?;
            let ends_with_string = template.ends_with_string();
            self.cursor = start + instruction.size();
            self.record(Entity::Instruction(instruction));

            if ends_with_string && self.cursor % PaddingBytes::MACHINE_WORD_LENGTH != 0 {
                self.pad_to_word();
            }

            if self.options.capture_jump_tables
                && self.options.indexed_jump_signature == Some(signature)
            {
                self.capture_jump_table();
            }
        } else {
            let end = self
                .find_next_marker(start + 4)
                .unwrap_or(self.data.len());
            self.cursor = end;
            self.record(Entity::UnknownInstruction(UnknownInstruction {
                offset: start,
                signature,
                raw: self.data[start..end].to_vec(),
            }));
        }

        self.last_flushed = self.cursor;
        Ok(())
    }

    fn pad_to_word(&mut self) {
        let word = PaddingBytes::MACHINE_WORD_LENGTH;
        let start = self.cursor;
        let end = (start + word - start % word).min(self.data.len());
        if end > start {
            self.cursor = end;
            self.record(Entity::Padding(PaddingBytes::new(
                start,
                self.data[start..end].to_vec(),
            )));
        }
    }

    fn capture_jump_table(&mut self) {
        let start = self.cursor;
        if let Some(marker) = self.find_next_marker(start) {
            if marker > start {
                self.cursor = marker;
                self.record(Entity::JumpTable(JumpTable::new(
                    start,
                    self.data[start..marker].to_vec(),
                )));
            }
        }
    }

    fn record(&mut self, entity: Entity) {
        trace!(offset = entity.offset(), size = entity.size(), kind = %entity.kind(), "entity");
        self.previous_was_instruction = matches!(entity, Entity::Instruction(_));
        if self.previous_was_instruction {
            self.last_instruction_offset = entity.offset();
        }
        self.file.push(entity);
    }
}
