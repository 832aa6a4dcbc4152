use super::{
    switch_padding, ConstantOperand, Increment, Instruction, LocalIndex, LookupSwitch, Opcode,
    Operand, OperandShape, PushValue, TableSwitch,
};
use crate::jvm::class_file::ConstantIndex;
use crate::jvm::{BaseType, DecodeError, DecodeErrorKind, Error, Serialize};
use crate::util::Offset;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::fmt;
use std::io::Cursor;
use std::ops::Deref;

/// Instructions of one code array, in order
///
/// Instructions are addressed by their position in the list. The previous and next instructions
/// are just the neighbouring positions, and offsets strictly increase along the list.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InstructionList {
    instructions: Vec<Instruction>,
}

impl InstructionList {
    pub fn new() -> InstructionList {
        InstructionList::default()
    }

    /// Decode a full code array
    pub fn decode(bytes: &[u8]) -> Result<InstructionList, DecodeError> {
        let mut cursor = Cursor::new(bytes);
        let mut instructions = vec![];
        let mut wide_at: Option<Offset> = None;

        while (cursor.position() as usize) < bytes.len() {
            let offset = Offset(cursor.position() as usize);
            let error = |kind| DecodeError { offset, kind };

            let byte = bytes[offset.0];
            cursor.set_position(offset.0 as u64 + 1);
            let opcode =
                Opcode::from_u8(byte).ok_or_else(|| error(DecodeErrorKind::UnknownOpcode(byte)))?;

            let wide = wide_at.is_some();
            if wide && !opcode.is_widenable() {
                return Err(error(DecodeErrorKind::IllegalWide(opcode)));
            }

            let operand = read_operand(&mut cursor, opcode, offset, wide).map_err(error)?;
            let instruction = Instruction::new(offset, opcode, operand);
            log::trace!("{:>5}: {}", offset, instruction);
            instructions.push(instruction);

            wide_at = if opcode == Opcode::Wide {
                Some(offset)
            } else {
                None
            };
        }

        if let Some(offset) = wide_at {
            return Err(DecodeError {
                offset,
                kind: DecodeErrorKind::DanglingWide,
            });
        }

        log::debug!(
            "Decoded {} instructions from {} bytes",
            instructions.len(),
            bytes.len()
        );
        Ok(InstructionList { instructions })
    }

    /// Encode back into a code array
    ///
    /// Instructions are written in list order. Every instruction must sit at the offset it will
    /// be written to, since switch padding and relative jumps are both computed from it.
    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        let mut bytes: Vec<u8> = vec![];
        let mut after_wide = false;

        for instruction in &self.instructions {
            let Instruction { opcode, operand, .. } = instruction;
            let mismatch = || Error::OperandMismatch {
                offset: instruction.offset,
                opcode: *opcode,
            };
            if !operand.fits_shape(opcode.shape()) || operand.is_widened() != after_wide {
                return Err(mismatch());
            }
            if instruction.offset.0 != bytes.len() {
                return Err(Error::MisplacedInstruction {
                    offset: instruction.offset,
                    expected: Offset(bytes.len()),
                    opcode: *opcode,
                });
            }

            (*opcode as u8).serialize(&mut bytes)?;
            write_operand(&mut bytes, operand)?;
            after_wide = *opcode == Opcode::Wide;
        }

        if after_wide {
            if let Some(last) = self.instructions.last() {
                return Err(Error::OperandMismatch {
                    offset: last.offset,
                    opcode: last.opcode,
                });
            }
        }
        Ok(bytes)
    }

    /// Append an instruction at the end, returning its position
    ///
    /// The offset is filled in from the end of the previous instruction.
    pub fn push(&mut self, opcode: Opcode, operand: Operand) -> Result<usize, Error> {
        let offset = self.end_offset();
        if !operand.fits_shape(opcode.shape()) {
            return Err(Error::OperandMismatch { offset, opcode });
        }
        self.instructions
            .push(Instruction::new(offset, opcode, operand));
        Ok(self.instructions.len() - 1)
    }

    /// Offset right after the last instruction
    pub fn end_offset(&self) -> Offset {
        self.instructions
            .last()
            .map_or(Offset(0), Instruction::end_offset)
    }

    pub fn get_mut(&mut self, position: usize) -> Option<&mut Instruction> {
        self.instructions.get_mut(position)
    }

    /// Instruction following the one at `position`
    pub fn next(&self, position: usize) -> Option<&Instruction> {
        self.instructions.get(position.checked_add(1)?)
    }

    /// Instruction preceding the one at `position`
    pub fn previous(&self, position: usize) -> Option<&Instruction> {
        self.instructions.get(position.checked_sub(1)?)
    }

    /// Position of the instruction starting exactly at `offset`
    pub fn position_of(&self, offset: Offset) -> Option<usize> {
        self.instructions
            .binary_search_by_key(&offset, |instruction| instruction.offset)
            .ok()
    }

    /// Instructions satisfying a predicate, along with their positions
    pub fn matching<'a, P>(&'a self, predicate: P) -> impl Iterator<Item = (usize, &'a Instruction)>
    where
        P: Fn(&Instruction) -> bool + 'a,
    {
        self.instructions
            .iter()
            .enumerate()
            .filter(move |(_, instruction)| predicate(instruction))
    }

    pub fn into_vec(self) -> Vec<Instruction> {
        self.instructions
    }
}

impl Deref for InstructionList {
    type Target = [Instruction];

    fn deref(&self) -> &[Instruction] {
        &self.instructions
    }
}

impl<'a> IntoIterator for &'a InstructionList {
    type Item = &'a Instruction;
    type IntoIter = std::slice::Iter<'a, Instruction>;

    fn into_iter(self) -> Self::IntoIter {
        self.instructions.iter()
    }
}

/// One instruction per line, prefixed with its offset
impl fmt::Display for InstructionList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for instruction in &self.instructions {
            writeln!(f, "{:>5}: {}", instruction.offset, instruction)?;
        }
        Ok(())
    }
}

/// Decode a code array into instructions
pub fn decode(bytes: &[u8]) -> Result<InstructionList, Error> {
    Ok(InstructionList::decode(bytes)?)
}

/// Encode instructions into a code array
pub fn encode(instructions: &InstructionList) -> Result<Vec<u8>, Error> {
    instructions.encode()
}

/// Read the operand bytes following `opcode`
///
/// Lengths read from the code array (switch tables) are never used to preallocate, so a corrupt
/// length fails with `Truncated` instead of exhausting memory.
fn read_operand(
    reader: &mut Cursor<&[u8]>,
    opcode: Opcode,
    offset: Offset,
    wide: bool,
) -> Result<Operand, DecodeErrorKind> {
    let eof = |_: std::io::Error| DecodeErrorKind::Truncated(opcode);

    let operand = match opcode.shape() {
        OperandShape::None | OperandShape::Wide => Operand::None,
        OperandShape::ImplicitLocal => Operand::Local(LocalIndex::Implicit),
        OperandShape::Local if wide => {
            Operand::Local(LocalIndex::Wide(reader.read_u16::<BigEndian>().map_err(eof)?))
        }
        OperandShape::Local => Operand::Local(LocalIndex::Narrow(reader.read_u8().map_err(eof)?)),
        OperandShape::ImplicitPush => Operand::Push(PushValue::Implicit),
        OperandShape::PushByte => Operand::Push(PushValue::Byte(reader.read_i8().map_err(eof)?)),
        OperandShape::PushShort => {
            Operand::Push(PushValue::Short(reader.read_i16::<BigEndian>().map_err(eof)?))
        }
        OperandShape::LoadConstant => {
            Operand::Constant(ConstantOperand::Narrow(reader.read_u8().map_err(eof)?))
        }
        OperandShape::LoadConstantWide => Operand::Constant(ConstantOperand::Wide(
            reader.read_u16::<BigEndian>().map_err(eof)?,
        )),
        OperandShape::Increment if wide => Operand::Increment(Increment::Wide {
            index: reader.read_u16::<BigEndian>().map_err(eof)?,
            delta: reader.read_i16::<BigEndian>().map_err(eof)?,
        }),
        OperandShape::Increment => Operand::Increment(Increment::Narrow {
            index: reader.read_u8().map_err(eof)?,
            delta: reader.read_i8().map_err(eof)?,
        }),
        OperandShape::Branch => Operand::Branch(reader.read_i16::<BigEndian>().map_err(eof)?),
        OperandShape::BranchWide => {
            Operand::WideBranch(reader.read_i32::<BigEndian>().map_err(eof)?)
        }
        OperandShape::TableSwitch => {
            skip_padding(reader, offset).map_err(eof)?;
            let default = reader.read_i32::<BigEndian>().map_err(eof)?;
            let low = reader.read_i32::<BigEndian>().map_err(eof)?;
            let high = reader.read_i32::<BigEndian>().map_err(eof)?;
            if high < low {
                return Err(DecodeErrorKind::InvalidSwitchBounds { low, high });
            }
            let mut offsets = vec![];
            for _ in low..=high {
                offsets.push(reader.read_i32::<BigEndian>().map_err(eof)?);
            }
            Operand::TableSwitch(TableSwitch {
                default,
                low,
                high,
                offsets,
            })
        }
        OperandShape::LookupSwitch => {
            skip_padding(reader, offset).map_err(eof)?;
            let default = reader.read_i32::<BigEndian>().map_err(eof)?;
            let npairs = reader.read_i32::<BigEndian>().map_err(eof)?;
            if npairs < 0 {
                return Err(DecodeErrorKind::NegativeLookupSwitchLength(npairs));
            }
            let mut pairs = vec![];
            for _ in 0..npairs {
                let key = reader.read_i32::<BigEndian>().map_err(eof)?;
                let jump = reader.read_i32::<BigEndian>().map_err(eof)?;
                pairs.push((key, jump));
            }
            Operand::LookupSwitch(LookupSwitch { default, pairs })
        }
        OperandShape::FieldRef | OperandShape::MethodRef | OperandShape::ClassRef => {
            Operand::Reference(ConstantIndex(reader.read_u16::<BigEndian>().map_err(eof)?))
        }
        OperandShape::InterfaceMethodRef => {
            let index = ConstantIndex(reader.read_u16::<BigEndian>().map_err(eof)?);
            let count = reader.read_u8().map_err(eof)?;
            let _zero = reader.read_u8().map_err(eof)?;
            Operand::InvokeInterface { index, count }
        }
        OperandShape::InvokeDynamic => {
            let index = ConstantIndex(reader.read_u16::<BigEndian>().map_err(eof)?);
            let _zero = reader.read_u16::<BigEndian>().map_err(eof)?;
            Operand::InvokeDynamic(index)
        }
        OperandShape::NewArray => {
            let atype = reader.read_u8().map_err(eof)?;
            let elem = BaseType::from_array_code(atype)
                .ok_or(DecodeErrorKind::InvalidArrayType(atype))?;
            Operand::NewArray(elem)
        }
        OperandShape::MultiANewArray => Operand::MultiANewArray {
            index: ConstantIndex(reader.read_u16::<BigEndian>().map_err(eof)?),
            dimensions: reader.read_u8().map_err(eof)?,
        },
    };
    Ok(operand)
}

fn skip_padding(reader: &mut Cursor<&[u8]>, offset: Offset) -> std::io::Result<()> {
    for _ in 0..switch_padding(offset) {
        reader.read_u8()?;
    }
    Ok(())
}

/// Write the operand bytes (the opcode has already been written)
fn write_operand(bytes: &mut Vec<u8>, operand: &Operand) -> std::io::Result<()> {
    match operand {
        Operand::None
        | Operand::Local(LocalIndex::Implicit)
        | Operand::Push(PushValue::Implicit) => (),
        Operand::Local(LocalIndex::Narrow(idx)) => idx.serialize(bytes)?,
        Operand::Local(LocalIndex::Wide(idx)) => idx.serialize(bytes)?,
        Operand::Push(PushValue::Byte(value)) => value.serialize(bytes)?,
        Operand::Push(PushValue::Short(value)) => value.serialize(bytes)?,
        Operand::Constant(ConstantOperand::Narrow(idx)) => idx.serialize(bytes)?,
        Operand::Constant(ConstantOperand::Wide(idx)) => idx.serialize(bytes)?,
        Operand::Increment(Increment::Narrow { index, delta }) => {
            index.serialize(bytes)?;
            delta.serialize(bytes)?;
        }
        Operand::Increment(Increment::Wide { index, delta }) => {
            index.serialize(bytes)?;
            delta.serialize(bytes)?;
        }
        Operand::Branch(rel) => rel.serialize(bytes)?,
        Operand::WideBranch(rel) => rel.serialize(bytes)?,
        Operand::TableSwitch(table) => {
            write_padding(bytes)?;
            table.default.serialize(bytes)?;
            table.low.serialize(bytes)?;
            table.high.serialize(bytes)?;
            for rel in &table.offsets {
                rel.serialize(bytes)?;
            }
        }
        Operand::LookupSwitch(lookup) => {
            write_padding(bytes)?;
            lookup.default.serialize(bytes)?;
            (lookup.pairs.len() as i32).serialize(bytes)?;
            for (key, rel) in &lookup.pairs {
                key.serialize(bytes)?;
                rel.serialize(bytes)?;
            }
        }
        Operand::Reference(index) => index.serialize(bytes)?,
        Operand::InvokeDynamic(index) => {
            index.serialize(bytes)?;
            bytes.write_u16::<BigEndian>(0)?;
        }
        Operand::InvokeInterface { index, count } => {
            index.serialize(bytes)?;
            count.serialize(bytes)?;
            bytes.write_u8(0)?;
        }
        Operand::NewArray(elem) => elem.array_code().serialize(bytes)?,
        Operand::MultiANewArray { index, dimensions } => {
            index.serialize(bytes)?;
            dimensions.serialize(bytes)?;
        }
    }
    Ok(())
}

/// Pad with zeroes so that the next byte is 4-byte aligned
///
/// The opcode was already written, so the switch instruction started one byte back.
fn write_padding(bytes: &mut Vec<u8>) -> std::io::Result<()> {
    let switch_offset = Offset(bytes.len() - 1);
    for _ in 0..switch_padding(switch_offset) {
        bytes.write_u8(0)?;
    }
    Ok(())
}
