//! Bytecode decoding and the structures recovered from it
//!
//! ### Instructions
//!
//! The [code array][0] of a method is a flat sequence of bytes. [`decode`] turns it into an
//! [`InstructionList`]: one [`Instruction`] per opcode, each carrying its byte offset and a typed
//! [`Operand`]. Instructions refer to each other only by position in the list, so the list can be
//! edited in place (constant indices, branch offsets) and [`encode`]d back into bytes.
//!
//! ### Blocks and graphs
//!
//! [`BlockPartition`] cuts the instructions into basic blocks ending in a branch or return, drops
//! blocks consisting of a lone `goto`, and resolves every jump to the surviving block containing
//! its destination. [`FlowGraph`] is the directed graph of those blocks, from which the
//! cyclomatic complexity of the method is computed.
//!
//! ### Stack dependencies
//!
//! [`DependencyForest`] simulates the operand stack backwards over a run of instructions, so that
//! every instruction which pops values ends up with the instructions that pushed those values
//! as its children.
//!
//! [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-6.html#jvms-6.5

mod basic_block;
mod dependency_tree;
mod flow_graph;
mod instructions;
mod label;
mod list;
mod method_code;
mod opcode;
mod stack_effect;

pub use basic_block::*;
pub use dependency_tree::*;
pub use flow_graph::*;
pub use instructions::*;
pub use label::*;
pub use list::*;
pub use method_code::*;
pub use opcode::*;
pub use stack_effect::*;
