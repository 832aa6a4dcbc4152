//! Read JVM classes and recover structure from their bytecode
//!
//! ### Simple example
//!
//! Consider the following Java method:
//!
//! ```java,ignore,no_run
//! static int max(int a, int b) {
//!     return a > b ? a : b;
//! }
//! ```
//!
//! Its code array can be decoded, split into basic blocks, and turned into a flow graph:
//!
//! ```
//! use classflow::jvm::code::{decode, BlockPartition, FlowGraph};
//! use classflow::jvm::Error;
//!
//! # fn analyze() -> Result<(), Error> {
//! let bytes = [
//!     0x1a, // iload_0
//!     0x1b, // iload_1
//!     0xa4, 0x00, 0x07, // if_icmple +7
//!     0x1a, // iload_0
//!     0xa7, 0x00, 0x04, // goto +4
//!     0x1b, // iload_1
//!     0xac, // ireturn
//! ];
//! let instructions = decode(&bytes)?;
//! assert_eq!(instructions.len(), 7);
//!
//! let partition = BlockPartition::build(&instructions)?;
//! let graph = FlowGraph::from_partition(&partition)?;
//! assert_eq!(graph.cyclomatic_complexity(), 2);
//! # Ok(())
//! # }
//! # analyze().unwrap();
//! ```
//!
//! Operand dependencies inside a straight-line run of code are recovered with
//! [`DependencyForest`](code::DependencyForest).

mod access_flags;
mod binary_format;
pub mod class_file;
pub mod code;
mod descriptors;
mod errors;
mod names;

pub use access_flags::*;
pub use binary_format::*;
pub use descriptors::*;
pub use errors::*;
pub use names::*;
