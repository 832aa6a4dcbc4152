use super::{Opcode, OperandShape};
use crate::jvm::class_file::{Constant, ConstantIndex, ConstantLookup, MemberRef};
use crate::jvm::{BaseType, Error, RenderDescriptor};
use crate::util::Offset;
use std::fmt;

/// One decoded instruction
///
/// The operand is whatever followed the opcode byte. A `wide` prefix is kept as its own
/// instruction (with no operand) so that every byte of the code array belongs to exactly one
/// instruction, and the widened instruction records the wider encoding in its operand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    /// Byte offset of the opcode within the code array
    pub offset: Offset,
    pub opcode: Opcode,
    pub operand: Operand,
}

/// Operands, one variant per encoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    None,
    Local(LocalIndex),
    Push(PushValue),
    Constant(ConstantOperand),
    Increment(Increment),

    /// Signed jump relative to the offset of the branch instruction
    Branch(i16),
    WideBranch(i32),
    TableSwitch(TableSwitch),
    LookupSwitch(LookupSwitch),

    /// Field, method, or class reference
    Reference(ConstantIndex),
    InvokeInterface {
        index: ConstantIndex,
        count: u8,
    },
    InvokeDynamic(ConstantIndex),
    NewArray(BaseType),
    MultiANewArray {
        index: ConstantIndex,
        dimensions: u8,
    },
}

/// Local variable slot operand
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalIndex {
    /// Baked into the opcode (`iload_0` ... `astore_3`)
    Implicit,
    Narrow(u8),

    /// Follows a `wide` prefix
    Wide(u16),
}

/// Integer pushing operand
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushValue {
    /// Baked into the opcode (`iconst_m1` ... `iconst_5`)
    Implicit,
    Byte(i8),
    Short(i16),
}

/// Constant loaded by `ldc` (narrow) or `ldc_w`/`ldc2_w` (wide)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstantOperand {
    Narrow(u8),
    Wide(u16),
}

impl ConstantOperand {
    pub fn index(self) -> ConstantIndex {
        match self {
            ConstantOperand::Narrow(idx) => ConstantIndex(idx as u16),
            ConstantOperand::Wide(idx) => ConstantIndex(idx),
        }
    }
}

/// `iinc` operand
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Increment {
    Narrow { index: u8, delta: i8 },
    Wide { index: u16, delta: i16 },
}

impl Increment {
    pub fn index(self) -> u16 {
        match self {
            Increment::Narrow { index, .. } => index as u16,
            Increment::Wide { index, .. } => index,
        }
    }

    pub fn delta(self) -> i16 {
        match self {
            Increment::Narrow { delta, .. } => delta as i16,
            Increment::Wide { delta, .. } => delta,
        }
    }
}

/// Jump table indexed by `low ..= high`
///
/// All jump offsets are relative to the offset of the `tableswitch` instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSwitch {
    pub default: i32,
    pub low: i32,
    pub high: i32,

    /// One entry per value in `low ..= high`
    pub offsets: Vec<i32>,
}

/// Jump table keyed by sorted match values
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupSwitch {
    pub default: i32,
    pub pairs: Vec<(i32, i32)>,
}

/// Padding bytes between a switch opcode at `offset` and its 4-byte aligned operands
pub fn switch_padding(offset: Offset) -> usize {
    (4 - (offset.0 + 1) % 4) % 4
}

impl Operand {
    /// Whether the operand is a valid encoding for an instruction of the given shape
    pub fn fits_shape(&self, shape: OperandShape) -> bool {
        match (shape, self) {
            (OperandShape::None | OperandShape::Wide, Operand::None) => true,
            (OperandShape::ImplicitLocal, Operand::Local(LocalIndex::Implicit)) => true,
            (OperandShape::Local, Operand::Local(LocalIndex::Narrow(_) | LocalIndex::Wide(_))) => {
                true
            }
            (OperandShape::ImplicitPush, Operand::Push(PushValue::Implicit)) => true,
            (OperandShape::PushByte, Operand::Push(PushValue::Byte(_))) => true,
            (OperandShape::PushShort, Operand::Push(PushValue::Short(_))) => true,
            (OperandShape::LoadConstant, Operand::Constant(ConstantOperand::Narrow(_))) => true,
            (OperandShape::LoadConstantWide, Operand::Constant(ConstantOperand::Wide(_))) => true,
            (OperandShape::Increment, Operand::Increment(_)) => true,
            (OperandShape::Branch, Operand::Branch(_)) => true,
            (OperandShape::BranchWide, Operand::WideBranch(_)) => true,
            (OperandShape::TableSwitch, Operand::TableSwitch(table)) => {
                table.low <= table.high
                    && (table.high as i64 - table.low as i64 + 1) == table.offsets.len() as i64
            }
            (OperandShape::LookupSwitch, Operand::LookupSwitch(_)) => true,
            (
                OperandShape::FieldRef | OperandShape::MethodRef | OperandShape::ClassRef,
                Operand::Reference(_),
            ) => true,
            (OperandShape::InterfaceMethodRef, Operand::InvokeInterface { .. }) => true,
            (OperandShape::InvokeDynamic, Operand::InvokeDynamic(_)) => true,
            (OperandShape::NewArray, Operand::NewArray(_)) => true,
            (OperandShape::MultiANewArray, Operand::MultiANewArray { .. }) => true,
            _ => false,
        }
    }

    /// Whether the operand uses the encoding that requires a preceding `wide`
    pub fn is_widened(&self) -> bool {
        matches!(
            self,
            Operand::Local(LocalIndex::Wide(_)) | Operand::Increment(Increment::Wide { .. })
        )
    }
}

impl Instruction {
    pub fn new(offset: Offset, opcode: Opcode, operand: Operand) -> Instruction {
        Instruction {
            offset,
            opcode,
            operand,
        }
    }

    /// Number of bytes the instruction occupies in the code array
    ///
    /// Switch padding depends on where the instruction sits, so this uses `self.offset`.
    pub fn size(&self) -> usize {
        let operand_size = match &self.operand {
            Operand::None => 0,
            Operand::Local(LocalIndex::Implicit) => 0,
            Operand::Local(LocalIndex::Narrow(_)) => 1,
            Operand::Local(LocalIndex::Wide(_)) => 2,
            Operand::Push(PushValue::Implicit) => 0,
            Operand::Push(PushValue::Byte(_)) => 1,
            Operand::Push(PushValue::Short(_)) => 2,
            Operand::Constant(ConstantOperand::Narrow(_)) => 1,
            Operand::Constant(ConstantOperand::Wide(_)) => 2,
            Operand::Increment(Increment::Narrow { .. }) => 2,
            Operand::Increment(Increment::Wide { .. }) => 4,
            Operand::Branch(_) => 2,
            Operand::WideBranch(_) => 4,
            Operand::TableSwitch(table) => {
                switch_padding(self.offset) + 12 + 4 * table.offsets.len()
            }
            Operand::LookupSwitch(lookup) => {
                switch_padding(self.offset) + 8 + 8 * lookup.pairs.len()
            }
            Operand::Reference(_) => 2,
            Operand::InvokeInterface { .. } => 4,
            Operand::InvokeDynamic(_) => 4,
            Operand::NewArray(_) => 1,
            Operand::MultiANewArray { .. } => 3,
        };
        1 + operand_size
    }

    /// Offset right after this instruction
    pub fn end_offset(&self) -> Offset {
        Offset(self.offset.0 + self.size())
    }

    pub fn is_branch(&self) -> bool {
        self.opcode.is_branch()
    }

    pub fn is_return(&self) -> bool {
        self.opcode.is_return()
    }

    pub fn is_unconditional_jump(&self) -> bool {
        self.opcode.is_unconditional_jump()
    }

    pub fn falls_through(&self) -> bool {
        self.opcode.falls_through()
    }

    /// Absolute offset this instruction jumps to
    ///
    /// For switches, this is the default arm. Targets are signed, since a corrupt jump might
    /// point before the start of the code.
    pub fn branch_target(&self) -> Option<isize> {
        let relative = match &self.operand {
            Operand::Branch(rel) => *rel as isize,
            Operand::WideBranch(rel) => *rel as isize,
            Operand::TableSwitch(table) => table.default as isize,
            Operand::LookupSwitch(lookup) => lookup.default as isize,
            _ => return None,
        };
        Some(self.offset.0 as isize + relative)
    }

    /// Every absolute offset this instruction may jump to (default arm first for switches)
    pub fn jump_targets(&self) -> Vec<isize> {
        let base = self.offset.0 as isize;
        match &self.operand {
            Operand::TableSwitch(table) => std::iter::once(table.default)
                .chain(table.offsets.iter().copied())
                .map(|rel| base + rel as isize)
                .collect(),
            Operand::LookupSwitch(lookup) => std::iter::once(lookup.default)
                .chain(lookup.pairs.iter().map(|(_, rel)| *rel))
                .map(|rel| base + rel as isize)
                .collect(),
            _ => self.branch_target().into_iter().collect(),
        }
    }

    /// Rewrite the jump of a (non-switch) branch instruction
    ///
    /// Fails if the instruction is not a branch or if the offset does not fit the encoding.
    pub fn set_branch_offset(&mut self, relative: i32) -> Result<(), Error> {
        let mismatch = self.mismatch();
        match &mut self.operand {
            Operand::Branch(rel) => *rel = i16::try_from(relative).map_err(|_| mismatch)?,
            Operand::WideBranch(rel) => *rel = relative,
            _ => return Err(mismatch),
        }
        Ok(())
    }

    /// Local variable slot read or written (including `iinc` and `ret`)
    pub fn local_index(&self) -> Option<u16> {
        match self.operand {
            Operand::Local(LocalIndex::Implicit) => self.opcode.implicit_local().map(u16::from),
            Operand::Local(LocalIndex::Narrow(idx)) => Some(idx as u16),
            Operand::Local(LocalIndex::Wide(idx)) => Some(idx),
            Operand::Increment(inc) => Some(inc.index()),
            _ => None,
        }
    }

    /// Integer pushed by `iconst_*`, `bipush`, or `sipush`
    pub fn pushed_int(&self) -> Option<i32> {
        match self.operand {
            Operand::Push(PushValue::Implicit) => self.opcode.implicit_push(),
            Operand::Push(PushValue::Byte(byte)) => Some(byte as i32),
            Operand::Push(PushValue::Short(short)) => Some(short as i32),
            _ => None,
        }
    }

    /// Constant pool index referenced by the instruction
    pub fn constant_index(&self) -> Option<ConstantIndex> {
        match self.operand {
            Operand::Constant(constant) => Some(constant.index()),
            Operand::Reference(index)
            | Operand::InvokeInterface { index, .. }
            | Operand::InvokeDynamic(index)
            | Operand::MultiANewArray { index, .. } => Some(index),
            _ => None,
        }
    }

    /// Point the instruction at a different constant
    ///
    /// Fails if the instruction has no constant operand, or for `ldc` if the index does not fit
    /// in one byte.
    pub fn set_constant_index(&mut self, new_index: ConstantIndex) -> Result<(), Error> {
        let mismatch = self.mismatch();
        match &mut self.operand {
            Operand::Constant(ConstantOperand::Narrow(idx)) => {
                *idx = u8::try_from(new_index.0).map_err(|_| mismatch)?
            }
            Operand::Constant(ConstantOperand::Wide(idx)) => *idx = new_index.0,
            Operand::Reference(index)
            | Operand::InvokeInterface { index, .. }
            | Operand::InvokeDynamic(index)
            | Operand::MultiANewArray { index, .. } => *index = new_index,
            _ => return Err(mismatch),
        }
        Ok(())
    }

    /// Constant loaded by `ldc`, `ldc_w`, or `ldc2_w`
    pub fn loaded_constant<'a>(&self, constants: &'a impl ConstantLookup) -> Option<&'a Constant> {
        match self.operand {
            Operand::Constant(constant) => constants.constant(constant.index()).ok(),
            _ => None,
        }
    }

    /// Field or method referenced by the instruction
    pub fn member<'a>(&self, constants: &'a impl ConstantLookup) -> Option<MemberRef<'a>> {
        match self.opcode.shape() {
            OperandShape::FieldRef | OperandShape::MethodRef | OperandShape::InterfaceMethodRef => {
                constants.member_ref(self.constant_index()?).ok()
            }
            _ => None,
        }
    }

    /// Class that owns the referenced member, or the class operand of `new`, `checkcast`, etc.
    pub fn owner<'a>(&self, constants: &'a impl ConstantLookup) -> Option<&'a str> {
        match self.opcode.shape() {
            OperandShape::ClassRef | OperandShape::MultiANewArray => {
                constants.class_name(self.constant_index()?).ok()
            }
            _ => self.member(constants).map(|member| member.class),
        }
    }

    /// Name of the referenced member or call site
    pub fn name<'a>(&self, constants: &'a impl ConstantLookup) -> Option<&'a str> {
        match self.opcode.shape() {
            OperandShape::InvokeDynamic => constants
                .call_site(self.constant_index()?)
                .ok()
                .map(|(name, _)| name),
            _ => self.member(constants).map(|member| member.name),
        }
    }

    /// Descriptor of the referenced member or call site
    pub fn descriptor<'a>(&self, constants: &'a impl ConstantLookup) -> Option<&'a str> {
        match self.opcode.shape() {
            OperandShape::InvokeDynamic => constants
                .call_site(self.constant_index()?)
                .ok()
                .map(|(_, descriptor)| descriptor),
            _ => self.member(constants).map(|member| member.descriptor),
        }
    }

    fn mismatch(&self) -> Error {
        Error::OperandMismatch {
            offset: self.offset,
            opcode: self.opcode,
        }
    }
}

/// Disassembly in roughly the format of `javap -c` (jump targets are absolute)
impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.opcode.mnemonic())?;
        let base = self.offset.0 as i64;
        match &self.operand {
            Operand::None
            | Operand::Local(LocalIndex::Implicit)
            | Operand::Push(PushValue::Implicit) => Ok(()),
            Operand::Local(LocalIndex::Narrow(idx)) => write!(f, " {}", idx),
            Operand::Local(LocalIndex::Wide(idx)) => write!(f, " {}", idx),
            Operand::Push(PushValue::Byte(value)) => write!(f, " {}", value),
            Operand::Push(PushValue::Short(value)) => write!(f, " {}", value),
            Operand::Constant(constant) => write!(f, " {}", constant.index()),
            Operand::Increment(inc) => write!(f, " {}, {}", inc.index(), inc.delta()),
            Operand::Branch(rel) => write!(f, " {}", base + *rel as i64),
            Operand::WideBranch(rel) => write!(f, " {}", base + *rel as i64),
            Operand::TableSwitch(table) => {
                write!(f, " {{")?;
                for (value, rel) in (table.low as i64..).zip(&table.offsets) {
                    write!(f, " {}: {},", value, base + *rel as i64)?;
                }
                write!(f, " default: {} }}", base + table.default as i64)
            }
            Operand::LookupSwitch(lookup) => {
                write!(f, " {{")?;
                for (value, rel) in &lookup.pairs {
                    write!(f, " {}: {},", value, base + *rel as i64)?;
                }
                write!(f, " default: {} }}", base + lookup.default as i64)
            }
            Operand::Reference(index) | Operand::InvokeDynamic(index) => write!(f, " {}", index),
            Operand::InvokeInterface { index, count } => write!(f, " {}, {}", index, count),
            Operand::NewArray(elem) => {
                let name = match elem {
                    BaseType::Boolean => "boolean",
                    BaseType::Byte => "byte",
                    BaseType::Char => "char",
                    BaseType::Short => "short",
                    BaseType::Int => "int",
                    BaseType::Long => "long",
                    BaseType::Float => "float",
                    BaseType::Double => "double",
                };
                write!(f, " {} ({})", name, elem.render())
            }
            Operand::MultiANewArray { index, dimensions } => {
                write!(f, " {}, {}", index, dimensions)
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::class_file::ConstantsPool;

    fn at(offset: usize, opcode: Opcode, operand: Operand) -> Instruction {
        Instruction::new(Offset(offset), opcode, operand)
    }

    #[test]
    fn sizes_follow_encoding() {
        assert_eq!(at(0, Opcode::Iload0, Operand::Local(LocalIndex::Implicit)).size(), 1);
        assert_eq!(at(0, Opcode::Iload, Operand::Local(LocalIndex::Narrow(4))).size(), 2);
        assert_eq!(at(1, Opcode::Iload, Operand::Local(LocalIndex::Wide(300))).size(), 3);
        let wide_inc = Increment::Wide {
            index: 300,
            delta: -1000,
        };
        assert_eq!(at(1, Opcode::Iinc, Operand::Increment(wide_inc)).size(), 5);
        assert_eq!(
            at(0, Opcode::Invokeinterface, Operand::InvokeInterface {
                index: ConstantIndex(1),
                count: 2
            })
            .size(),
            5
        );
    }

    #[test]
    fn switch_size_depends_on_offset() {
        let table = Operand::TableSwitch(TableSwitch {
            default: 20,
            low: 0,
            high: 2,
            offsets: vec![16, 17, 18],
        });
        assert_eq!(at(0, Opcode::Tableswitch, table.clone()).size(), 1 + 3 + 12 + 12);
        assert_eq!(at(3, Opcode::Tableswitch, table.clone()).size(), 1 + 0 + 12 + 12);
        assert_eq!(at(5, Opcode::Tableswitch, table).size(), 1 + 2 + 12 + 12);
    }

    #[test]
    fn unified_accessors() {
        assert_eq!(
            at(0, Opcode::Astore3, Operand::Local(LocalIndex::Implicit)).local_index(),
            Some(3)
        );
        let inc = Increment::Narrow { index: 7, delta: 1 };
        assert_eq!(at(0, Opcode::Iinc, Operand::Increment(inc)).local_index(), Some(7));
        assert_eq!(
            at(0, Opcode::IconstM1, Operand::Push(PushValue::Implicit)).pushed_int(),
            Some(-1)
        );
        assert_eq!(
            at(0, Opcode::Sipush, Operand::Push(PushValue::Short(-300))).pushed_int(),
            Some(-300)
        );
        assert_eq!(
            at(0, Opcode::Ldc, Operand::Constant(ConstantOperand::Narrow(9))).constant_index(),
            Some(ConstantIndex(9))
        );
        assert_eq!(at(0, Opcode::Iadd, Operand::None).constant_index(), None);
    }

    #[test]
    fn rewrites_in_place() {
        let mut ldc = at(0, Opcode::Ldc, Operand::Constant(ConstantOperand::Narrow(1)));
        ldc.set_constant_index(ConstantIndex(200)).unwrap();
        assert_eq!(ldc.constant_index(), Some(ConstantIndex(200)));
        assert!(ldc.set_constant_index(ConstantIndex(256)).is_err());

        let mut jump = at(10, Opcode::Goto, Operand::Branch(5));
        jump.set_branch_offset(-10).unwrap();
        assert_eq!(jump.branch_target(), Some(0));
        assert!(jump.set_branch_offset(40_000).is_err());
        assert!(at(0, Opcode::Nop, Operand::None).set_branch_offset(1).is_err());
    }

    #[test]
    fn switch_targets_are_absolute() {
        let lookup = at(
            8,
            Opcode::Lookupswitch,
            Operand::LookupSwitch(LookupSwitch {
                default: 40,
                pairs: vec![(-1, 24), (10, 32)],
            }),
        );
        assert_eq!(lookup.jump_targets(), vec![48, 32, 40]);
        assert_eq!(lookup.branch_target(), Some(48));
        assert!(!lookup.falls_through());
    }

    #[test]
    fn symbolic_accessors() {
        let mut pool = ConstantsPool::new();
        let owner = pool.get_class("java/lang/Math").unwrap();
        let name = pool.get_utf8("max").unwrap();
        let desc = pool.get_utf8("(II)I").unwrap();
        let nat = pool.get_name_and_type(name, desc).unwrap();
        let method = pool.get_method_ref(owner, nat, false).unwrap();

        let call = at(0, Opcode::Invokestatic, Operand::Reference(method.into()));
        assert_eq!(call.owner(&pool), Some("java/lang/Math"));
        assert_eq!(call.name(&pool), Some("max"));
        assert_eq!(call.descriptor(&pool), Some("(II)I"));

        let new = at(0, Opcode::New, Operand::Reference(owner.into()));
        assert_eq!(new.owner(&pool), Some("java/lang/Math"));
        assert_eq!(new.name(&pool), None);

        // Wrong kinds and dangling indices resolve to nothing
        let bad = at(0, Opcode::Getfield, Operand::Reference(owner.into()));
        assert_eq!(bad.descriptor(&pool), None);
        let dangling = at(0, Opcode::Getfield, Operand::Reference(ConstantIndex(999)));
        assert_eq!(dangling.owner(&pool), None);
    }

    #[test]
    fn displays_like_javap() {
        let branch = at(4, Opcode::IfIcmple, Operand::Branch(7));
        assert_eq!(branch.to_string(), "if_icmple 11");
        let inc = at(0, Opcode::Iinc, Operand::Increment(Increment::Narrow { index: 1, delta: -1 }));
        assert_eq!(inc.to_string(), "iinc 1, -1");
        let array = at(0, Opcode::Newarray, Operand::NewArray(BaseType::Int));
        assert_eq!(array.to_string(), "newarray int (I)");
    }
}
