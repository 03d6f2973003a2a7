//! Control-flow graph over decoded instructions.
//!
//! The graph is an arena: blocks, entry points, exit points and edges live
//! in flat vectors and refer to each other by typed index. Every edge is
//! referenced from both its exit point and its entry point.

use bitflags::bitflags;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::entity::{Entity, Instruction};
use crate::model::PacFile;

bitflags! {
    /// How control moves along an edge. The empty set is a plain jump.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Transition: u8 {
        /// Execution continues into the next block
        const FALLTHROUGH = 1 << 0;
        /// The edge may not be taken, or its source was only partly decoded
        const POTENTIAL = 1 << 1;
        /// The jump pushes a return address
        const SAVE_RETURN_ADDRESS = 1 << 2;
    }
}

/// Block identifier (index into [`FlowGraph::blocks`]).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

/// Entry point identifier (index into the graph's entry points).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryPointId(pub u32);

/// Exit point identifier (index into the graph's exit points).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExitPointId(pub u32);

/// Edge identifier (index into [`FlowGraph::edges`]).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeId(pub u32);

fn next_id(len: usize) -> u32 {
    u32::try_from(len).unwrap_or(u32::MAX)
}

/// A place where control enters a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPoint {
    /// Owning block
    pub block: BlockId,
    /// Offset of the instruction control enters at
    pub offset: usize,
    /// Edges arriving here
    pub incoming: Vec<EdgeId>,
}

/// The place where control leaves a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitPoint {
    /// Owning block
    pub block: BlockId,
    /// Offset of the block's last instruction
    pub offset: usize,
    /// Edges leaving here
    pub outgoing: Vec<EdgeId>,
}

/// A directed edge from an exit point to an entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    /// Source
    pub from: ExitPointId,
    /// Destination
    pub to: EntryPointId,
    /// Transition flags
    pub transition: Transition,
}

/// A run of consecutive instructions with one exit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeBlock {
    /// This block's id
    pub id: BlockId,
    /// Start offsets of the instructions, ascending
    pub instruction_offsets: Vec<usize>,
    /// Entry points keyed by instruction offset
    pub entries: BTreeMap<usize, EntryPointId>,
    /// Entry point at the first instruction
    pub start_entry: EntryPointId,
    /// Exit point at the last instruction
    pub exit: ExitPointId,
    /// True while no edge from another block enters this one
    pub is_source: bool,
}

impl CodeBlock {
    /// Offset of the first instruction.
    pub fn first_offset(&self) -> usize {
        self.instruction_offsets.first().copied().unwrap_or_default()
    }

    /// Offset of the last instruction.
    pub fn last_offset(&self) -> usize {
        self.instruction_offsets.last().copied().unwrap_or_default()
    }

    /// True if an instruction of this block starts at `offset`.
    pub fn starts_instruction(&self, offset: usize) -> bool {
        self.instruction_offsets.binary_search(&offset).is_ok()
    }
}

/// A jump whose target no block accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnresolvedJump {
    /// Exit point the jump leaves from
    pub from: ExitPointId,
    /// Target offset
    pub target: usize,
    /// Transition the edge would have had
    pub transition: Transition,
}

/// Opcode roles the graph builder needs to know about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlowOptions {
    /// Signatures after which control never falls through
    pub terminators: BTreeSet<u32>,
    /// Signatures whose jump pushes a return address
    pub calls: BTreeSet<u32>,
}

impl FlowOptions {
    /// Options with no terminators and no calls.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a terminator signature.
    pub fn with_terminator(mut self, signature: u32) -> Self {
        self.terminators.insert(signature);
        self
    }

    /// Add a call signature.
    pub fn with_call(mut self, signature: u32) -> Self {
        self.calls.insert(signature);
        self
    }
}

/// Control-flow graph of one parsed file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlowGraph {
    blocks: Vec<CodeBlock>,
    entries: Vec<EntryPoint>,
    exits: Vec<ExitPoint>,
    edges: Vec<Edge>,
    unresolved: Vec<UnresolvedJump>,
}

impl FlowGraph {
    /// Build the graph of `file`.
    pub fn build(file: &PacFile, options: &FlowOptions) -> Self {
        // Runs of instructions; a jump table belongs to the run before it.
        let mut runs: Vec<Vec<&Instruction>> = Vec::new();
        let mut current: Vec<&Instruction> = Vec::new();
        let mut table_sources: Vec<(usize, &[u32])> = Vec::new();

        for entity in file.entities() {
            if let Entity::Instruction(instruction) = entity {
                current.push(instruction);
                let ends_block = instruction.jump_targets().next().is_some()
                    || options.terminators.contains(&instruction.signature);
                if ends_block {
                    runs.push(std::mem::take(&mut current));
                }
                continue;
            }
            if !current.is_empty() {
                runs.push(std::mem::take(&mut current));
            }
            if let Entity::JumpTable(table) = entity {
                if let Some(index) = runs.len().checked_sub(1) {
                    table_sources.push((index, &table.branches));
                }
            }
        }
        if !current.is_empty() {
            runs.push(current);
        }

        let mut graph = Self::default();
        let mut tails = Vec::with_capacity(runs.len());
        for run in &runs {
            graph.add_block(run.iter().map(|instruction| instruction.offset).collect());
            tails.extend(run.last().copied());
        }

        // Fallthrough between neighbours.
        for index in 1..graph.blocks.len() {
            let tail = tails[index - 1];
            if options.terminators.contains(&tail.signature) {
                continue;
            }
            let from = graph.blocks[index - 1].exit;
            let to = BlockId(next_id(index));
            let target = graph.blocks[index].first_offset();
            graph.accept_jump_to(to, target, from, Transition::FALLTHROUGH);
        }

        // Jumps encoded in parameters.
        for (index, tail) in tails.iter().enumerate() {
            let from = graph.blocks[index].exit;
            let mut transition = Transition::empty();
            if tail.cut_off {
                transition |= Transition::POTENTIAL;
            }
            if options.calls.contains(&tail.signature) {
                transition |= Transition::SAVE_RETURN_ADDRESS;
            }
            for target in tail.jump_targets() {
                graph.route(target as usize, from, transition);
            }
        }

        // Indexed-jump branches.
        for (index, branches) in table_sources {
            let from = graph.blocks[index].exit;
            for &target in branches {
                graph.route(target as usize, from, Transition::POTENTIAL);
            }
        }

        debug!(
            blocks = graph.blocks.len(),
            edges = graph.edges.len(),
            unresolved = graph.unresolved.len(),
            "built flow graph"
        );
        graph
    }

    fn add_block(&mut self, instruction_offsets: Vec<usize>) {
        let id = BlockId(next_id(self.blocks.len()));
        let start = instruction_offsets[0];
        let last = instruction_offsets[instruction_offsets.len() - 1];

        let start_entry = EntryPointId(next_id(self.entries.len()));
        self.entries.push(EntryPoint {
            block: id,
            offset: start,
            incoming: Vec::new(),
        });
        let exit = ExitPointId(next_id(self.exits.len()));
        self.exits.push(ExitPoint {
            block: id,
            offset: last,
            outgoing: Vec::new(),
        });

        let mut entries = BTreeMap::new();
        entries.insert(start, start_entry);
        self.blocks.push(CodeBlock {
            id,
            instruction_offsets,
            entries,
            start_entry,
            exit,
            is_source: true,
        });
    }

    /// Offer a jump to `target` to `block`.
    ///
    /// If `target` is one of the block's instructions the entry point there
    /// is reused or created. A target before the block's first instruction
    /// lands on the start entry. Anything else, or an id not belonging to
    /// this graph, is refused with `None` and leaves the graph unchanged.
    pub fn accept_jump_to(
        &mut self,
        block: BlockId,
        target: usize,
        source_exit: ExitPointId,
        transition: Transition,
    ) -> Option<EdgeId> {
        let index = block.0 as usize;
        let exit_index = source_exit.0 as usize;
        let from_block = self.exits.get(exit_index)?.block;
        let code = self.blocks.get(index)?;
        let starts_instruction = code.starts_instruction(target);
        let existing = code.entries.get(&target).copied();
        let first_offset = code.first_offset();
        let start_entry = code.start_entry;

        let entry = if starts_instruction {
            match existing {
                Some(entry) => entry,
                None => {
                    let entry = EntryPointId(next_id(self.entries.len()));
                    self.entries.push(EntryPoint {
                        block,
                        offset: target,
                        incoming: Vec::new(),
                    });
                    self.blocks[index].entries.insert(target, entry);
                    entry
                }
            }
        } else if target < first_offset {
            start_entry
        } else {
            return None;
        };

        let edge = EdgeId(next_id(self.edges.len()));
        self.edges.push(Edge {
            from: source_exit,
            to: entry,
            transition,
        });
        self.entries[entry.0 as usize].incoming.push(edge);
        self.exits[exit_index].outgoing.push(edge);
        if from_block != block {
            self.blocks[index].is_source = false;
        }
        Some(edge)
    }

    fn route(&mut self, target: usize, from: ExitPointId, transition: Transition) {
        let candidate = self
            .blocks
            .partition_point(|block| block.first_offset() <= target);
        let tried = [candidate.checked_sub(1), Some(candidate)];
        for index in tried.into_iter().flatten() {
            if index < self.blocks.len()
                && self
                    .accept_jump_to(BlockId(next_id(index)), target, from, transition)
                    .is_some()
            {
                return;
            }
        }
        self.unresolved.push(UnresolvedJump {
            from,
            target,
            transition,
        });
    }

    /// Blocks in file order.
    pub fn blocks(&self) -> &[CodeBlock] {
        &self.blocks
    }

    /// Block by id.
    pub fn block(&self, id: BlockId) -> Option<&CodeBlock> {
        self.blocks.get(id.0 as usize)
    }

    /// Entry point by id.
    pub fn entry(&self, id: EntryPointId) -> Option<&EntryPoint> {
        self.entries.get(id.0 as usize)
    }

    /// Exit point by id.
    pub fn exit(&self, id: ExitPointId) -> Option<&ExitPoint> {
        self.exits.get(id.0 as usize)
    }

    /// All edges.
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Edge by id.
    pub fn edge(&self, id: EdgeId) -> Option<&Edge> {
        self.edges.get(id.0 as usize)
    }

    /// Jumps no block accepted.
    pub fn unresolved(&self) -> &[UnresolvedJump] {
        &self.unresolved
    }

    /// The block containing the instruction that starts at `offset`.
    pub fn block_at(&self, offset: usize) -> Option<&CodeBlock> {
        let index = self
            .blocks
            .partition_point(|block| block.first_offset() <= offset)
            .checked_sub(1)?;
        let block = &self.blocks[index];
        block.starts_instruction(offset).then_some(block)
    }

    /// Blocks nothing else jumps or falls into.
    pub fn sources(&self) -> impl Iterator<Item = &CodeBlock> {
        self.blocks.iter().filter(|block| block.is_source)
    }

    /// Blocks reachable in one step from `block`, with the edge flags.
    pub fn successors(&self, block: BlockId) -> impl Iterator<Item = (BlockId, Transition)> + '_ {
        self.block(block)
            .and_then(|b| self.exit(b.exit))
            .into_iter()
            .flat_map(|exit| exit.outgoing.iter())
            .map(move |&edge| {
                let edge = self.edges[edge.0 as usize];
                (self.entries[edge.to.0 as usize].block, edge.transition)
            })
    }
}
