use crate::jvm::class_file::ConstantLookup;
use crate::jvm::code::{Instruction, Opcode, StackEffect};
use crate::jvm::Error;
use crate::util::Offset;
use std::fmt;

/// Index of a node inside a [`DependencyForest`]
#[derive(Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Debug)]
pub struct NodeId(pub usize);

/// Edge from a consumer to one of the instructions feeding it
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Dependency {
    pub node: NodeId,

    /// Stack slots taken from that node
    pub slots: usize,
}

/// One instruction in a dependency forest
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DependencyNode {
    /// Position of the instruction in the slice the forest was built from
    pub position: usize,
    pub offset: Offset,
    pub opcode: Opcode,

    /// Slots popped by the instruction
    pub consuming: usize,

    /// Slots pushed by the instruction that no consumer has claimed
    pub producing: usize,

    /// Slots pushed by the instruction
    pub produced: usize,

    /// Instructions supplying the consumed slots, in code order
    pub children: Vec<Dependency>,
}

impl DependencyNode {
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Instruction this node stands for
    pub fn instruction<'a>(&self, instructions: &'a [Instruction]) -> &'a Instruction {
        &instructions[self.position]
    }
}

/// Which instructions feed operands to which other instructions
///
/// The forest is built by walking backwards over the instructions while simulating the operand
/// stack. Each instruction that pops values pulls in the closest preceding instructions that
/// have not yet been consumed, until enough slots are supplied. If the last pulled instruction
/// supplies more than needed, its surplus stays available to the next consumer (this is how the
/// result of a `dup` ends up feeding two instructions).
///
/// Instructions whose results are never consumed become roots.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DependencyForest {
    nodes: Vec<DependencyNode>,
    roots: Vec<NodeId>,

    /// Node of each instruction, indexed by position
    by_position: Vec<NodeId>,
}

impl DependencyForest {
    /// Build the forest for a straight-line run of instructions
    ///
    /// Fails if an instruction's stack effect cannot be determined, or if an instruction needs
    /// more slots than all preceding instructions leave available.
    pub fn build(
        instructions: &[Instruction],
        constants: &impl ConstantLookup,
    ) -> Result<DependencyForest, Error> {
        let mut builder = ForestBuilder {
            instructions,
            constants,
            cursor: instructions.len(),
            nodes: Vec::with_capacity(instructions.len()),
            leftover: vec![],
        };
        let roots = builder.build_roots()?;

        let mut by_position = vec![NodeId(0); builder.nodes.len()];
        for (idx, node) in builder.nodes.iter().enumerate() {
            by_position[node.position] = NodeId(idx);
        }

        log::debug!(
            "Built dependency forest with {} roots over {} instructions",
            roots.len(),
            instructions.len()
        );
        Ok(DependencyForest {
            nodes: builder.nodes,
            roots,
            by_position,
        })
    }

    /// Unconsumed nodes, in code order
    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn node(&self, id: NodeId) -> &DependencyNode {
        &self.nodes[id.0]
    }

    /// Node for the instruction at a position in the original slice
    pub fn node_at(&self, position: usize) -> Option<NodeId> {
        self.by_position.get(position).copied()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Every node, in code order
    pub fn flatten(&self) -> Vec<NodeId> {
        self.by_position.clone()
    }

    /// Nodes in code order, leaving out the control flow at the very end
    ///
    /// A trailing return is dropped, as is a trailing comparison (`lcmp`, `fcmpl`, ...) followed
    /// by a conditional branch.
    pub fn dependencies(&self) -> Vec<NodeId> {
        let mut ids = self.flatten();
        let opcode_at = |ids: &[NodeId], back: usize| {
            ids.len()
                .checked_sub(back)
                .map(|idx| self.nodes[ids[idx].0].opcode)
        };
        match (opcode_at(&ids, 2), opcode_at(&ids, 1)) {
            (_, Some(last)) if last.is_return() => {
                ids.pop();
            }
            (Some(compare), Some(branch))
                if compare.is_comparison() && branch.is_conditional_branch() =>
            {
                ids.truncate(ids.len() - 2);
            }
            _ => (),
        }
        ids
    }
}

/// Each root followed by its dependencies, indented by depth
impl fmt::Display for DependencyForest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut pending: Vec<(NodeId, usize)> =
            self.roots.iter().rev().map(|root| (*root, 0)).collect();
        while let Some((id, depth)) = pending.pop() {
            let node = &self.nodes[id.0];
            writeln!(f, "{:indent$}{}: {}", "", node.offset, node.opcode, indent = depth * 2)?;
            pending.extend(node.children.iter().rev().map(|child| (child.node, depth + 1)));
        }
        Ok(())
    }
}

struct ForestBuilder<'a, C> {
    instructions: &'a [Instruction],
    constants: &'a C,

    /// Number of instructions not yet turned into nodes
    cursor: usize,
    nodes: Vec<DependencyNode>,

    /// Nodes that were pulled but still have unclaimed slots
    leftover: Vec<NodeId>,
}

/// Node still waiting on some of its operands
struct PendingNode {
    id: NodeId,
    outstanding: usize,

    /// Dependencies found so far, closest first
    children: Vec<Dependency>,
}

impl<'a, C: ConstantLookup> ForestBuilder<'a, C> {
    /// Walk backwards over all instructions, returning the roots in code order
    ///
    /// Nodes waiting on operands are kept on an explicit stack, so long expression chains do
    /// not turn into deep recursion.
    fn build_roots(&mut self) -> Result<Vec<NodeId>, Error> {
        let mut roots = vec![];
        let mut pending: Vec<PendingNode> = vec![];

        while self.cursor > 0 || !pending.is_empty() {
            let mut node = match pending.pop() {
                Some(node) => node,
                None => self.open_node()?,
            };

            if node.outstanding > 0 {
                match self.leftover.pop() {
                    Some(child) => {
                        self.claim(&mut node, child);
                        pending.push(node);
                    }
                    None if self.cursor > 0 => {
                        let child = self.open_node()?;
                        pending.push(node);
                        pending.push(child);
                    }
                    None => {
                        let blocked = &self.nodes[node.id.0];
                        return Err(Error::StackUnderflow {
                            offset: blocked.offset,
                            opcode: blocked.opcode,
                            missing: node.outstanding,
                        });
                    }
                }
                continue;
            }

            node.children.reverse();
            self.nodes[node.id.0].children = node.children;
            match pending.last_mut() {
                Some(parent) => self.claim(parent, node.id),
                None => {
                    roots.push(node.id);
                    self.leftover.clear();
                }
            }
        }

        roots.reverse();
        Ok(roots)
    }

    /// Turn the instruction just before the cursor into a node with no children yet
    fn open_node(&mut self) -> Result<PendingNode, Error> {
        self.cursor -= 1;
        let position = self.cursor;
        let instruction = &self.instructions[position];

        let effect = StackEffect::of(instruction, self.constants).ok_or_else(|| {
            log::warn!(
                "Cannot determine stack effect of {} at {}",
                instruction.opcode,
                instruction.offset
            );
            Error::UnknownStackEffect {
                offset: instruction.offset,
                opcode: instruction.opcode,
            }
        })?;

        let id = NodeId(self.nodes.len());
        self.nodes.push(DependencyNode {
            position,
            offset: instruction.offset,
            opcode: instruction.opcode,
            consuming: effect.consuming,
            producing: effect.producing,
            produced: effect.producing,
            children: vec![],
        });
        Ok(PendingNode {
            id,
            outstanding: effect.consuming,
            children: vec![],
        })
    }

    /// Take as many slots as `parent` still needs (or `child` has left) from `child`
    fn claim(&mut self, parent: &mut PendingNode, child: NodeId) {
        let (parent_opcode, parent_offset) = {
            let node = &self.nodes[parent.id.0];
            (node.opcode, node.offset)
        };
        let child_node = &mut self.nodes[child.0];
        if parent_opcode == Opcode::Athrow
            && child_node.opcode == Opcode::Monitorexit
            && parent.children.is_empty()
        {
            child_node.producing = child_node.producing.max(1);
        }

        let slots = child_node.producing.min(parent.outstanding);
        child_node.producing -= slots;
        parent.outstanding -= slots;
        log::trace!(
            "{} at {} takes {} slots from {} at {}",
            parent_opcode,
            parent_offset,
            slots,
            child_node.opcode,
            child_node.offset
        );
        if child_node.producing > 0 {
            self.leftover.push(child);
        }
        parent.children.push(Dependency { node: child, slots });
    }
}
