use crate::jvm::code::{BlockLabel, BlockLabelGenerator, Instruction, LabelGenerator};
use crate::jvm::Error;
use crate::util::Offset;
use std::collections::HashSet;
use std::fmt;

/// Index of a surviving block inside a [`BlockPartition`]
#[derive(Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Debug)]
pub struct BlockId(pub usize);

/// How a block ends
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum BlockKind {
    /// Nothing but an unconditional jump
    Empty,

    /// Ends in a return
    End,

    /// Anything else
    Immediate,
}

/// Straight-line run of instructions
///
/// Control only enters at the top and only leaves through the last instruction (or by falling
/// off the end into the next block).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BasicBlock {
    pub label: BlockLabel,

    /// Offset of the first instruction
    pub low: Offset,

    /// Offset of the last instruction (not the end of the block)
    pub high: Offset,

    /// Position of the first instruction in the instruction list
    pub first: usize,

    /// Position of the last instruction in the instruction list
    pub last: usize,

    pub kind: BlockKind,

    /// Previous surviving block in code order
    pub previous: Option<BlockId>,

    /// Next surviving block in code order
    pub next: Option<BlockId>,

    /// Block containing the destination of the closing branch (the default arm for switches)
    pub target: Option<BlockId>,

    pub predecessors: Vec<BlockId>,
    pub successors: Vec<BlockId>,
}

impl BasicBlock {
    fn new(label: BlockLabel, instructions: &[Instruction], first: usize, last: usize) -> Self {
        let closing = &instructions[last];
        let kind = if first == last && closing.is_unconditional_jump() {
            BlockKind::Empty
        } else if closing.is_return() {
            BlockKind::End
        } else {
            BlockKind::Immediate
        };
        BasicBlock {
            label,
            low: instructions[first].offset,
            high: closing.offset,
            first,
            last,
            kind,
            previous: None,
            next: None,
            target: None,
            predecessors: vec![],
            successors: vec![],
        }
    }

    /// Whether the offset falls within `[low, high]`
    pub fn contains(&self, offset: isize) -> bool {
        self.low.0 as isize <= offset && offset <= self.high.0 as isize
    }

    /// Number of instructions in the block
    pub fn instruction_count(&self) -> usize {
        self.last - self.first + 1
    }

    /// Instructions of the block, given the list the partition was built from
    pub fn instructions<'a>(&self, instructions: &'a [Instruction]) -> &'a [Instruction] {
        &instructions[self.first..=self.last]
    }
}

/// Basic blocks of one method body
///
/// Blocks consisting of a single `goto` are removed: jumps into them are redirected to wherever
/// the `goto` leads, and they are kept aside in [`BlockPartition::elided`] so that the original
/// layout can still be accounted for.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BlockPartition {
    blocks: Vec<BasicBlock>,
    elided: Vec<BasicBlock>,
}

impl BlockPartition {
    /// Split instructions into basic blocks and resolve the edges between them
    ///
    /// A block is closed after every branch or instruction that does not fall through, and before
    /// any instruction whose offset does not directly follow its predecessor.
    pub fn build(instructions: &[Instruction]) -> Result<BlockPartition, Error> {
        let mut labels = BlockLabelGenerator::default();
        let mut blocks = vec![];
        let mut elided = vec![];

        let mut push_block = |first: usize, last: usize| {
            let block = BasicBlock::new(labels.fresh_label(), instructions, first, last);
            if block.kind == BlockKind::Empty {
                log::trace!("Removing empty block {} at {}", block.label, block.low);
                elided.push(block);
            } else {
                blocks.push(block);
            }
        };

        let mut pending: Option<usize> = None;
        let mut expected = Offset(0);
        for (position, instruction) in instructions.iter().enumerate() {
            if let Some(first) = pending {
                if instruction.offset != expected {
                    push_block(first, position - 1);
                    pending = None;
                }
            }
            let first = *pending.get_or_insert(position);
            expected = instruction.end_offset();

            if instruction.opcode.ends_block() {
                push_block(first, position);
                pending = None;
            }
        }
        if let Some(first) = pending {
            push_block(first, instructions.len() - 1);
        }

        let mut partition = BlockPartition { blocks, elided };
        partition.link_neighbours();
        partition.resolve_edges(instructions)?;

        log::debug!(
            "Partitioned {} instructions into {} blocks ({} empty blocks removed)",
            instructions.len(),
            partition.blocks.len(),
            partition.elided.len(),
        );
        Ok(partition)
    }

    fn link_neighbours(&mut self) {
        let count = self.blocks.len();
        for (idx, block) in self.blocks.iter_mut().enumerate() {
            block.previous = idx.checked_sub(1).map(BlockId);
            block.next = Some(idx + 1).filter(|next| *next < count).map(BlockId);
        }
    }

    fn resolve_edges(&mut self, instructions: &[Instruction]) -> Result<(), Error> {
        for idx in 0..self.blocks.len() {
            let block = &self.blocks[idx];
            let closing = &instructions[block.last];
            let unresolved = |target: isize| Error::UnresolvedBranchTarget {
                block: block.label,
                offset: closing.offset,
                target,
            };

            let mut successors: Vec<BlockId> = vec![];
            let mut target = None;
            if closing.is_branch() {
                let jumps = closing.jump_targets();
                for (arm, jump) in jumps.into_iter().enumerate() {
                    let resolved = self
                        .resolve(jump, instructions)
                        .ok_or_else(|| unresolved(jump))?;
                    if arm == 0 {
                        target = Some(resolved);
                    }
                    successors.push(resolved);
                }
            }

            let following = instructions.get(block.last + 1);
            if let Some(following) = following.filter(|_| closing.falls_through()) {
                let fall_through = following.offset.0 as isize;
                let resolved = self
                    .resolve(fall_through, instructions)
                    .ok_or_else(|| unresolved(fall_through))?;
                successors.push(resolved);
            }

            let this = BlockId(idx);
            let mut seen = HashSet::new();
            successors.retain(|succ| *succ != this && seen.insert(*succ));
            for succ in &successors {
                log::trace!("Edge {} -> {}", self.blocks[idx].label, self.blocks[succ.0].label);
                self.blocks[succ.0].predecessors.push(this);
            }

            let block = &mut self.blocks[idx];
            block.target = target;
            block.successors = successors;
        }
        Ok(())
    }

    /// Find the surviving block that control reaches when jumping to `offset`
    ///
    /// Offsets inside removed blocks are followed through their `goto`. Chains of removed blocks
    /// that loop back on themselves resolve to nothing.
    fn resolve(&self, mut offset: isize, instructions: &[Instruction]) -> Option<BlockId> {
        let mut visited = HashSet::new();
        loop {
            if let Some(idx) = containing(&self.blocks, offset) {
                return Some(BlockId(idx));
            }
            let removed = containing(&self.elided, offset)?;
            if !visited.insert(removed) {
                return None;
            }
            offset = instructions[self.elided[removed].last].branch_target()?;
        }
    }

    /// Surviving block whose range contains the offset
    pub fn block_containing(&self, offset: Offset) -> Option<BlockId> {
        containing(&self.blocks, offset.0 as isize).map(BlockId)
    }

    pub fn get(&self, id: BlockId) -> Option<&BasicBlock> {
        self.blocks.get(id.0)
    }

    /// Surviving blocks, in code order
    pub fn blocks(&self) -> &[BasicBlock] {
        &self.blocks
    }

    /// Removed (jump-only) blocks, in code order
    pub fn elided(&self) -> &[BasicBlock] {
        &self.elided
    }

    pub fn iter(&self) -> impl Iterator<Item = (BlockId, &BasicBlock)> + '_ {
        self.blocks
            .iter()
            .enumerate()
            .map(|(idx, block)| (BlockId(idx), block))
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

impl std::ops::Index<BlockId> for BlockPartition {
    type Output = BasicBlock;

    fn index(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id.0]
    }
}

/// One line per surviving block: label, offset range, kind, and successors
impl fmt::Display for BlockPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for block in &self.blocks {
            write!(f, "{:<3} [{}, {}] {:?}", block.label, block.low, block.high, block.kind)?;
            if !block.successors.is_empty() {
                f.write_str(" ->")?;
                for succ in &block.successors {
                    write!(f, " {}", self.blocks[succ.0].label)?;
                }
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// Position of the block (sorted by offset) whose range contains the offset
fn containing(blocks: &[BasicBlock], offset: isize) -> Option<usize> {
    let after = blocks.partition_point(|block| block.low.0 as isize <= offset);
    let idx = after.checked_sub(1)?;
    if blocks[idx].contains(offset) {
        Some(idx)
    } else {
        None
    }
}
