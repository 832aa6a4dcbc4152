use super::class_file::ConstantPoolOverflow;
use super::code::{BlockLabel, Opcode};
use crate::util::Offset;
use std::fmt::{Display, Formatter, Result as FmtResult};

#[derive(Debug)]
pub enum Error {
    IoError(std::io::Error),

    /// Code array could not be decoded
    Decode(DecodeError),

    /// Instruction operand does not have the shape its opcode requires (only possible after the
    /// instruction was edited by hand)
    OperandMismatch { offset: Offset, opcode: Opcode },

    /// Stored offset of an instruction is not where encoding would place it (offsets went stale
    /// after an edit, so relative jumps and switch padding can't be trusted)
    MisplacedInstruction {
        offset: Offset,
        expected: Offset,
        opcode: Opcode,
    },

    /// A branch target does not fall inside any basic block
    ///
    /// This indicates a corrupt code array or an instruction list that was edited without
    /// fixing up its jumps.
    UnresolvedBranchTarget {
        block: BlockLabel,
        offset: Offset,
        target: isize,
    },

    /// An instruction needs more operand stack slots than the preceding instructions supply
    StackUnderflow {
        offset: Offset,
        opcode: Opcode,
        missing: usize,
    },

    /// The stack effect of an instruction depends on a constant that could not be resolved
    UnknownStackEffect { offset: Offset, opcode: Opcode },

    /// Graph operation referenced a vertex that was never added
    MissingVertex(String),

    /// Class file structure is invalid (outside of the code array)
    MalformedClass(String),

    ConstantPoolOverflow(ConstantPoolOverflow),
}

/// Failure to decode a code array
///
/// Decoding is all-or-nothing: any of these aborts the whole decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeError {
    /// Offset of the instruction being decoded
    pub offset: Offset,
    pub kind: DecodeErrorKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeErrorKind {
    /// Byte is not an opcode from the instruction set
    UnknownOpcode(u8),

    /// Code array ends in the middle of the instruction's operands
    Truncated(Opcode),

    /// `tableswitch` with `high < low`
    InvalidSwitchBounds { low: i32, high: i32 },

    /// `lookupswitch` with a negative number of pairs
    NegativeLookupSwitchLength(i32),

    /// `wide` prefix in front of an instruction it cannot modify
    IllegalWide(Opcode),

    /// `wide` prefix as the last byte of the code array
    DanglingWide,

    /// `newarray` with an unknown element type code
    InvalidArrayType(u8),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        Error::IoError(err)
    }
}

impl From<ConstantPoolOverflow> for Error {
    fn from(overflow: ConstantPoolOverflow) -> Error {
        Error::ConstantPoolOverflow(overflow)
    }
}

impl From<DecodeError> for Error {
    fn from(err: DecodeError) -> Error {
        Error::Decode(err)
    }
}

impl Display for DecodeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match &self.kind {
            DecodeErrorKind::UnknownOpcode(byte) => {
                write!(f, "unknown opcode 0x{:02x} at offset {}", byte, self.offset)
            }
            DecodeErrorKind::Truncated(opcode) => write!(
                f,
                "code array ends inside `{}` at offset {}",
                opcode.mnemonic(),
                self.offset
            ),
            DecodeErrorKind::InvalidSwitchBounds { low, high } => write!(
                f,
                "tableswitch at offset {} has low {} greater than high {}",
                self.offset, low, high
            ),
            DecodeErrorKind::NegativeLookupSwitchLength(npairs) => write!(
                f,
                "lookupswitch at offset {} has negative length {}",
                self.offset, npairs
            ),
            DecodeErrorKind::IllegalWide(opcode) => write!(
                f,
                "`wide` cannot modify `{}` at offset {}",
                opcode.mnemonic(),
                self.offset
            ),
            DecodeErrorKind::DanglingWide => {
                write!(f, "`wide` at offset {} ends the code array", self.offset)
            }
            DecodeErrorKind::InvalidArrayType(atype) => write!(
                f,
                "newarray at offset {} has invalid type code {}",
                self.offset, atype
            ),
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Error::IoError(err) => write!(f, "I/O error: {}", err),
            Error::Decode(err) => write!(f, "decode error: {}", err),
            Error::OperandMismatch { offset, opcode } => write!(
                f,
                "operand of `{}` at offset {} does not match its opcode",
                opcode.mnemonic(),
                offset
            ),
            Error::MisplacedInstruction {
                offset,
                expected,
                opcode,
            } => write!(
                f,
                "`{}` is stored at offset {} but encodes at offset {}",
                opcode.mnemonic(),
                offset,
                expected
            ),
            Error::UnresolvedBranchTarget {
                block,
                offset,
                target,
            } => write!(
                f,
                "block {} jumps from offset {} to {}, which is not inside any block",
                block, offset, target
            ),
            Error::StackUnderflow {
                offset,
                opcode,
                missing,
            } => write!(
                f,
                "`{}` at offset {} is missing {} operand stack slot(s)",
                opcode.mnemonic(),
                offset,
                missing
            ),
            Error::UnknownStackEffect { offset, opcode } => write!(
                f,
                "cannot resolve the stack effect of `{}` at offset {}",
                opcode.mnemonic(),
                offset
            ),
            Error::MissingVertex(vertex) => write!(f, "{} is not a vertex of the graph", vertex),
            Error::MalformedClass(msg) => write!(f, "malformed class file: {}", msg),
            Error::ConstantPoolOverflow(overflow) => write!(f, "constant pool overflow: {}", overflow),
        }
    }
}

impl std::error::Error for DecodeError {}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(err) => Some(err),
            Error::Decode(err) => Some(err),
            _ => None,
        }
    }
}
