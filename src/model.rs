//! The entity model produced by a scan.
//!
//! A [`PacFile`] is an ordered, offset-indexed tiling of one buffer: every
//! byte belongs to exactly one entity, entity starts are strictly
//! increasing, and lookups by offset use lower-bound semantics.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::entity::{Entity, Instruction, JumpTable, MessageTable, UnknownInstruction};

/// Parsed PAC file.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PacFile {
    size: usize,
    #[serde(skip)]
    offsets: Vec<usize>,
    entities: Vec<Entity>,
    #[serde(skip)]
    instructions: BTreeMap<u32, BTreeMap<usize, usize>>,
    #[serde(skip)]
    unknown_instructions: BTreeMap<u32, BTreeMap<usize, usize>>,
    instructions_count: usize,
    unknown_instructions_count: usize,
    cut_off_count: usize,
}

impl PacFile {
    /// Create an empty model for a buffer of `size` bytes.
    pub(crate) fn with_size(size: usize) -> Self {
        Self {
            size,
            ..Self::default()
        }
    }

    /// Append the next entity.
    ///
    /// Entities must be pushed in order, each starting where the previous
    /// one ended.
    pub(crate) fn push(&mut self, entity: Entity) {
        debug_assert_eq!(
            entity.offset(),
            self.covered(),
            "entity at 0x{:X} does not continue the tiling",
            entity.offset()
        );
        debug_assert!(entity.end() <= self.size, "entity runs past the buffer");

        let offset = entity.offset();
        let index = self.entities.len();
        match &entity {
            Entity::Instruction(instruction) => {
                self.instructions_count += 1;
                if instruction.cut_off {
                    self.cut_off_count += 1;
                }
                self.instructions
                    .entry(instruction.signature)
                    .or_default()
                    .insert(offset, index);
            }
            Entity::UnknownInstruction(unknown) => {
                self.unknown_instructions_count += 1;
                self.unknown_instructions
                    .entry(unknown.signature)
                    .or_default()
                    .insert(offset, index);
            }
            _ => {}
        }
        self.offsets.push(offset);
        self.entities.push(entity);
    }

    /// Bytes covered by the entities pushed so far.
    pub(crate) fn covered(&self) -> usize {
        self.entities.last().map_or(0, Entity::end)
    }

    /// Size of the parsed buffer.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of entities.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// True if the buffer was empty.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Strictly increasing entity start offsets.
    pub fn offsets(&self) -> &[usize] {
        &self.offsets
    }

    /// Entities in file order.
    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    /// Iterate over `(offset, entity)` pairs in file order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Entity)> {
        self.offsets.iter().copied().zip(self.entities.iter())
    }

    /// Index of the entity containing `offset`.
    pub fn entity_index_at(&self, offset: usize) -> Option<usize> {
        if offset >= self.size {
            return None;
        }
        self.offsets
            .partition_point(|&start| start <= offset)
            .checked_sub(1)
    }

    /// The entity containing `offset`: the one with the greatest start not
    /// above `offset`.
    pub fn entity_at(&self, offset: usize) -> Option<&Entity> {
        self.entity_index_at(offset).map(|i| &self.entities[i])
    }

    /// The entity starting exactly at `offset`.
    pub fn entity_starting_at(&self, offset: usize) -> Option<&Entity> {
        self.offsets
            .binary_search(&offset)
            .ok()
            .map(|i| &self.entities[i])
    }

    /// Every decoded occurrence of `signature`, in file order.
    pub fn instruction_occurrences(&self, signature: u32) -> impl Iterator<Item = &Instruction> {
        self.instructions
            .get(&signature)
            .into_iter()
            .flat_map(|by_offset| by_offset.values())
            .filter_map(|&i| self.entities[i].as_instruction())
    }

    /// Every occurrence of the unknown `signature`, in file order.
    pub fn unknown_occurrences(&self, signature: u32) -> impl Iterator<Item = &UnknownInstruction> {
        self.unknown_instructions
            .get(&signature)
            .into_iter()
            .flat_map(|by_offset| by_offset.values())
            .filter_map(|&i| self.entities[i].as_unknown())
    }

    /// Signatures that decoded at least once, ascending.
    pub fn instruction_signatures(&self) -> impl Iterator<Item = u32> + '_ {
        self.instructions.keys().copied()
    }

    /// Unknown signatures encountered, ascending.
    pub fn unknown_signatures(&self) -> impl Iterator<Item = u32> + '_ {
        self.unknown_instructions.keys().copied()
    }

    /// All decoded instructions in file order.
    pub fn instructions(&self) -> impl Iterator<Item = &Instruction> {
        self.entities.iter().filter_map(Entity::as_instruction)
    }

    /// Decoded instructions that stopped early.
    pub fn cut_off_instructions(&self) -> impl Iterator<Item = &Instruction> {
        self.instructions().filter(|i| i.cut_off)
    }

    /// Message tables in file order.
    pub fn message_tables(&self) -> impl Iterator<Item = &MessageTable> {
        self.entities.iter().filter_map(|e| match e {
            Entity::MessageTable(table) => Some(table),
            _ => None,
        })
    }

    /// Jump tables in file order.
    pub fn jump_tables(&self) -> impl Iterator<Item = &JumpTable> {
        self.entities.iter().filter_map(|e| match e {
            Entity::JumpTable(table) => Some(table),
            _ => None,
        })
    }

    /// Number of decoded instructions.
    pub fn instructions_count(&self) -> usize {
        self.instructions_count
    }

    /// Number of unknown instructions.
    pub fn unknown_instructions_count(&self) -> usize {
        self.unknown_instructions_count
    }

    /// Number of cut-off instructions.
    pub fn cut_off_count(&self) -> usize {
        self.cut_off_count
    }

    /// True if the entities tile `[0, size)` exactly.
    pub fn is_contiguous(&self) -> bool {
        let mut expected = 0;
        for (offset, entity) in self.iter() {
            if offset != expected || entity.offset() != offset || entity.size() == 0 {
                return false;
            }
            expected = entity.end();
        }
        expected == self.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{PaddingBytes, RawSpan};

    fn sample() -> PacFile {
        let mut file = PacFile::with_size(12);
        file.push(Entity::RawSpan(RawSpan {
            offset: 0,
            raw: vec![1, 2, 3],
        }));
        file.push(Entity::Padding(PaddingBytes::new(3, vec![0])));
        file.push(Entity::UnknownInstruction(UnknownInstruction {
            offset: 4,
            signature: 0x25FF_0000,
            raw: vec![0x25, 0xFF, 0, 0, 9, 9, 9, 9],
        }));
        file
    }

    #[test]
    fn test_lower_bound_lookup() {
        let file = sample();
        assert!(file.is_contiguous());
        assert_eq!(file.offsets(), &[0, 3, 4]);
        assert_eq!(file.entity_at(0).unwrap().offset(), 0);
        assert_eq!(file.entity_at(2).unwrap().offset(), 0);
        assert_eq!(file.entity_at(3).unwrap().offset(), 3);
        assert_eq!(file.entity_at(11).unwrap().offset(), 4);
        assert!(file.entity_at(12).is_none());
        assert!(file.entity_starting_at(5).is_none());
    }

    #[test]
    fn test_unknown_index() {
        let file = sample();
        assert_eq!(file.unknown_instructions_count(), 1);
        assert_eq!(file.instructions_count(), 0);
        let found: Vec<_> = file.unknown_occurrences(0x25FF_0000).collect();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].offset, 4);
        assert_eq!(file.unknown_occurrences(0x2501_0000).count(), 0);
        assert_eq!(file.unknown_signatures().collect::<Vec<_>>(), vec![0x25FF_0000]);
    }

    #[test]
    fn test_empty_model() {
        let file = PacFile::with_size(0);
        assert!(file.is_empty());
        assert!(file.is_contiguous());
        assert!(file.entity_at(0).is_none());
    }

    #[test]
    fn test_incomplete_tiling_detected() {
        let mut file = PacFile::with_size(8);
        file.push(Entity::RawSpan(RawSpan {
            offset: 0,
            raw: vec![0; 4],
        }));
        assert!(!file.is_contiguous());
    }
}
