//! Decode JVM bytecode and recover structure from it
//!
//! The entry points live under [`jvm::code`]: decoding a code array into an
//! [`InstructionList`](jvm::code::InstructionList), partitioning that list into basic blocks,
//! building a flow graph over the blocks, and reconstructing which instructions feed operands to
//! which other instructions.

pub mod jvm;
pub mod util;
