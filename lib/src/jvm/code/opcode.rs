use std::fmt;

/// Layout of the operand bytes that follow an opcode
///
/// This is what the decoder dispatches on, so opcodes that share a shape are read and written
/// the same way.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum OperandShape {
    /// No operand bytes
    None,

    /// Local variable index baked into the opcode (eg. `iload_2`)
    ImplicitLocal,

    /// Local variable index (1 byte, or 2 bytes after `wide`)
    Local,

    /// Integer baked into the opcode (eg. `iconst_m1`)
    ImplicitPush,
    PushByte,
    PushShort,

    /// 1 byte constant pool index
    LoadConstant,

    /// 2 byte constant pool index
    LoadConstantWide,

    /// Local variable index and signed delta (1 byte each, or 2 bytes each after `wide`)
    Increment,

    /// 2 byte signed relative jump
    Branch,

    /// 4 byte signed relative jump
    BranchWide,
    TableSwitch,
    LookupSwitch,
    FieldRef,
    MethodRef,

    /// Constant pool index, argument count, and a zero byte
    InterfaceMethodRef,

    /// Constant pool index and two zero bytes
    InvokeDynamic,
    ClassRef,

    /// Primitive array element type code
    NewArray,

    /// Class constant pool index and number of dimensions
    MultiANewArray,

    /// The `wide` prefix itself
    Wide,
}

macro_rules! opcodes {
    ($($variant:ident = $byte:literal, $mnemonic:literal, $shape:ident, $effect:expr;)*) => {
        /// Opcodes of the JVM instruction set
        ///
        /// [0]: https://docs.oracle.com/javase/specs/jvms/se18/html/jvms-6.html#jvms-6.5
        #[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[repr(u8)]
        pub enum Opcode {
            $($variant = $byte,)*
        }

        impl Opcode {
            /// Decode an opcode byte (`None` for bytes outside the instruction set)
            pub fn from_u8(byte: u8) -> Option<Opcode> {
                match byte {
                    $($byte => Some(Opcode::$variant),)*
                    _ => None,
                }
            }

            pub fn mnemonic(self) -> &'static str {
                match self {
                    $(Opcode::$variant => $mnemonic,)*
                }
            }

            pub fn shape(self) -> OperandShape {
                match self {
                    $(Opcode::$variant => OperandShape::$shape,)*
                }
            }

            /// Operand stack slots popped and pushed, if this is the same for every occurrence of
            /// the opcode
            ///
            /// Constant loads, field accesses, invocations, and `multianewarray` depend on their
            /// operand and return `None`.
            pub fn fixed_stack_effect(self) -> Option<(u8, u8)> {
                match self {
                    $(Opcode::$variant => $effect,)*
                }
            }
        }
    };
}

opcodes! {
    Nop = 0x00, "nop", None, Some((0, 0));
    AconstNull = 0x01, "aconst_null", None, Some((0, 1));
    IconstM1 = 0x02, "iconst_m1", ImplicitPush, Some((0, 1));
    Iconst0 = 0x03, "iconst_0", ImplicitPush, Some((0, 1));
    Iconst1 = 0x04, "iconst_1", ImplicitPush, Some((0, 1));
    Iconst2 = 0x05, "iconst_2", ImplicitPush, Some((0, 1));
    Iconst3 = 0x06, "iconst_3", ImplicitPush, Some((0, 1));
    Iconst4 = 0x07, "iconst_4", ImplicitPush, Some((0, 1));
    Iconst5 = 0x08, "iconst_5", ImplicitPush, Some((0, 1));
    Lconst0 = 0x09, "lconst_0", None, Some((0, 2));
    Lconst1 = 0x0a, "lconst_1", None, Some((0, 2));
    Fconst0 = 0x0b, "fconst_0", None, Some((0, 1));
    Fconst1 = 0x0c, "fconst_1", None, Some((0, 1));
    Fconst2 = 0x0d, "fconst_2", None, Some((0, 1));
    Dconst0 = 0x0e, "dconst_0", None, Some((0, 2));
    Dconst1 = 0x0f, "dconst_1", None, Some((0, 2));
    Bipush = 0x10, "bipush", PushByte, Some((0, 1));
    Sipush = 0x11, "sipush", PushShort, Some((0, 1));
    Ldc = 0x12, "ldc", LoadConstant, None;
    LdcW = 0x13, "ldc_w", LoadConstantWide, None;
    Ldc2W = 0x14, "ldc2_w", LoadConstantWide, None;
    Iload = 0x15, "iload", Local, Some((0, 1));
    Lload = 0x16, "lload", Local, Some((0, 2));
    Fload = 0x17, "fload", Local, Some((0, 1));
    Dload = 0x18, "dload", Local, Some((0, 2));
    Aload = 0x19, "aload", Local, Some((0, 1));
    Iload0 = 0x1a, "iload_0", ImplicitLocal, Some((0, 1));
    Iload1 = 0x1b, "iload_1", ImplicitLocal, Some((0, 1));
    Iload2 = 0x1c, "iload_2", ImplicitLocal, Some((0, 1));
    Iload3 = 0x1d, "iload_3", ImplicitLocal, Some((0, 1));
    Lload0 = 0x1e, "lload_0", ImplicitLocal, Some((0, 2));
    Lload1 = 0x1f, "lload_1", ImplicitLocal, Some((0, 2));
    Lload2 = 0x20, "lload_2", ImplicitLocal, Some((0, 2));
    Lload3 = 0x21, "lload_3", ImplicitLocal, Some((0, 2));
    Fload0 = 0x22, "fload_0", ImplicitLocal, Some((0, 1));
    Fload1 = 0x23, "fload_1", ImplicitLocal, Some((0, 1));
    Fload2 = 0x24, "fload_2", ImplicitLocal, Some((0, 1));
    Fload3 = 0x25, "fload_3", ImplicitLocal, Some((0, 1));
    Dload0 = 0x26, "dload_0", ImplicitLocal, Some((0, 2));
    Dload1 = 0x27, "dload_1", ImplicitLocal, Some((0, 2));
    Dload2 = 0x28, "dload_2", ImplicitLocal, Some((0, 2));
    Dload3 = 0x29, "dload_3", ImplicitLocal, Some((0, 2));
    Aload0 = 0x2a, "aload_0", ImplicitLocal, Some((0, 1));
    Aload1 = 0x2b, "aload_1", ImplicitLocal, Some((0, 1));
    Aload2 = 0x2c, "aload_2", ImplicitLocal, Some((0, 1));
    Aload3 = 0x2d, "aload_3", ImplicitLocal, Some((0, 1));
    Iaload = 0x2e, "iaload", None, Some((2, 1));
    Laload = 0x2f, "laload", None, Some((2, 2));
    Faload = 0x30, "faload", None, Some((2, 1));
    Daload = 0x31, "daload", None, Some((2, 2));
    Aaload = 0x32, "aaload", None, Some((2, 1));
    Baload = 0x33, "baload", None, Some((2, 1));
    Caload = 0x34, "caload", None, Some((2, 1));
    Saload = 0x35, "saload", None, Some((2, 1));
    Istore = 0x36, "istore", Local, Some((1, 0));
    Lstore = 0x37, "lstore", Local, Some((2, 0));
    Fstore = 0x38, "fstore", Local, Some((1, 0));
    Dstore = 0x39, "dstore", Local, Some((2, 0));
    Astore = 0x3a, "astore", Local, Some((1, 0));
    Istore0 = 0x3b, "istore_0", ImplicitLocal, Some((1, 0));
    Istore1 = 0x3c, "istore_1", ImplicitLocal, Some((1, 0));
    Istore2 = 0x3d, "istore_2", ImplicitLocal, Some((1, 0));
    Istore3 = 0x3e, "istore_3", ImplicitLocal, Some((1, 0));
    Lstore0 = 0x3f, "lstore_0", ImplicitLocal, Some((2, 0));
    Lstore1 = 0x40, "lstore_1", ImplicitLocal, Some((2, 0));
    Lstore2 = 0x41, "lstore_2", ImplicitLocal, Some((2, 0));
    Lstore3 = 0x42, "lstore_3", ImplicitLocal, Some((2, 0));
    Fstore0 = 0x43, "fstore_0", ImplicitLocal, Some((1, 0));
    Fstore1 = 0x44, "fstore_1", ImplicitLocal, Some((1, 0));
    Fstore2 = 0x45, "fstore_2", ImplicitLocal, Some((1, 0));
    Fstore3 = 0x46, "fstore_3", ImplicitLocal, Some((1, 0));
    Dstore0 = 0x47, "dstore_0", ImplicitLocal, Some((2, 0));
    Dstore1 = 0x48, "dstore_1", ImplicitLocal, Some((2, 0));
    Dstore2 = 0x49, "dstore_2", ImplicitLocal, Some((2, 0));
    Dstore3 = 0x4a, "dstore_3", ImplicitLocal, Some((2, 0));
    Astore0 = 0x4b, "astore_0", ImplicitLocal, Some((1, 0));
    Astore1 = 0x4c, "astore_1", ImplicitLocal, Some((1, 0));
    Astore2 = 0x4d, "astore_2", ImplicitLocal, Some((1, 0));
    Astore3 = 0x4e, "astore_3", ImplicitLocal, Some((1, 0));
    Iastore = 0x4f, "iastore", None, Some((3, 0));
    Lastore = 0x50, "lastore", None, Some((4, 0));
    Fastore = 0x51, "fastore", None, Some((3, 0));
    Dastore = 0x52, "dastore", None, Some((4, 0));
    Aastore = 0x53, "aastore", None, Some((3, 0));
    Bastore = 0x54, "bastore", None, Some((3, 0));
    Castore = 0x55, "castore", None, Some((3, 0));
    Sastore = 0x56, "sastore", None, Some((3, 0));
    Pop = 0x57, "pop", None, Some((1, 0));
    Pop2 = 0x58, "pop2", None, Some((2, 0));
    Dup = 0x59, "dup", None, Some((1, 2));
    DupX1 = 0x5a, "dup_x1", None, Some((2, 3));
    DupX2 = 0x5b, "dup_x2", None, Some((3, 4));
    Dup2 = 0x5c, "dup2", None, Some((2, 4));
    Dup2X1 = 0x5d, "dup2_x1", None, Some((3, 5));
    Dup2X2 = 0x5e, "dup2_x2", None, Some((4, 6));
    Swap = 0x5f, "swap", None, Some((2, 2));
    Iadd = 0x60, "iadd", None, Some((2, 1));
    Ladd = 0x61, "ladd", None, Some((4, 2));
    Fadd = 0x62, "fadd", None, Some((2, 1));
    Dadd = 0x63, "dadd", None, Some((4, 2));
    Isub = 0x64, "isub", None, Some((2, 1));
    Lsub = 0x65, "lsub", None, Some((4, 2));
    Fsub = 0x66, "fsub", None, Some((2, 1));
    Dsub = 0x67, "dsub", None, Some((4, 2));
    Imul = 0x68, "imul", None, Some((2, 1));
    Lmul = 0x69, "lmul", None, Some((4, 2));
    Fmul = 0x6a, "fmul", None, Some((2, 1));
    Dmul = 0x6b, "dmul", None, Some((4, 2));
    Idiv = 0x6c, "idiv", None, Some((2, 1));
    Ldiv = 0x6d, "ldiv", None, Some((4, 2));
    Fdiv = 0x6e, "fdiv", None, Some((2, 1));
    Ddiv = 0x6f, "ddiv", None, Some((4, 2));
    Irem = 0x70, "irem", None, Some((2, 1));
    Lrem = 0x71, "lrem", None, Some((4, 2));
    Frem = 0x72, "frem", None, Some((2, 1));
    Drem = 0x73, "drem", None, Some((4, 2));
    Ineg = 0x74, "ineg", None, Some((1, 1));
    Lneg = 0x75, "lneg", None, Some((2, 2));
    Fneg = 0x76, "fneg", None, Some((1, 1));
    Dneg = 0x77, "dneg", None, Some((2, 2));
    Ishl = 0x78, "ishl", None, Some((2, 1));
    Lshl = 0x79, "lshl", None, Some((3, 2));
    Ishr = 0x7a, "ishr", None, Some((2, 1));
    Lshr = 0x7b, "lshr", None, Some((3, 2));
    Iushr = 0x7c, "iushr", None, Some((2, 1));
    Lushr = 0x7d, "lushr", None, Some((3, 2));
    Iand = 0x7e, "iand", None, Some((2, 1));
    Land = 0x7f, "land", None, Some((4, 2));
    Ior = 0x80, "ior", None, Some((2, 1));
    Lor = 0x81, "lor", None, Some((4, 2));
    Ixor = 0x82, "ixor", None, Some((2, 1));
    Lxor = 0x83, "lxor", None, Some((4, 2));
    Iinc = 0x84, "iinc", Increment, Some((0, 0));
    I2l = 0x85, "i2l", None, Some((1, 2));
    I2f = 0x86, "i2f", None, Some((1, 1));
    I2d = 0x87, "i2d", None, Some((1, 2));
    L2i = 0x88, "l2i", None, Some((2, 1));
    L2f = 0x89, "l2f", None, Some((2, 1));
    L2d = 0x8a, "l2d", None, Some((2, 2));
    F2i = 0x8b, "f2i", None, Some((1, 1));
    F2l = 0x8c, "f2l", None, Some((1, 2));
    F2d = 0x8d, "f2d", None, Some((1, 2));
    D2i = 0x8e, "d2i", None, Some((2, 1));
    D2l = 0x8f, "d2l", None, Some((2, 2));
    D2f = 0x90, "d2f", None, Some((2, 1));
    I2b = 0x91, "i2b", None, Some((1, 1));
    I2c = 0x92, "i2c", None, Some((1, 1));
    I2s = 0x93, "i2s", None, Some((1, 1));
    Lcmp = 0x94, "lcmp", None, Some((4, 1));
    Fcmpl = 0x95, "fcmpl", None, Some((2, 1));
    Fcmpg = 0x96, "fcmpg", None, Some((2, 1));
    Dcmpl = 0x97, "dcmpl", None, Some((4, 1));
    Dcmpg = 0x98, "dcmpg", None, Some((4, 1));
    Ifeq = 0x99, "ifeq", Branch, Some((1, 0));
    Ifne = 0x9a, "ifne", Branch, Some((1, 0));
    Iflt = 0x9b, "iflt", Branch, Some((1, 0));
    Ifge = 0x9c, "ifge", Branch, Some((1, 0));
    Ifgt = 0x9d, "ifgt", Branch, Some((1, 0));
    Ifle = 0x9e, "ifle", Branch, Some((1, 0));
    IfIcmpeq = 0x9f, "if_icmpeq", Branch, Some((2, 0));
    IfIcmpne = 0xa0, "if_icmpne", Branch, Some((2, 0));
    IfIcmplt = 0xa1, "if_icmplt", Branch, Some((2, 0));
    IfIcmpge = 0xa2, "if_icmpge", Branch, Some((2, 0));
    IfIcmpgt = 0xa3, "if_icmpgt", Branch, Some((2, 0));
    IfIcmple = 0xa4, "if_icmple", Branch, Some((2, 0));
    IfAcmpeq = 0xa5, "if_acmpeq", Branch, Some((2, 0));
    IfAcmpne = 0xa6, "if_acmpne", Branch, Some((2, 0));
    Goto = 0xa7, "goto", Branch, Some((0, 0));
    Jsr = 0xa8, "jsr", Branch, Some((0, 1));
    Ret = 0xa9, "ret", Local, Some((0, 0));
    Tableswitch = 0xaa, "tableswitch", TableSwitch, Some((1, 0));
    Lookupswitch = 0xab, "lookupswitch", LookupSwitch, Some((1, 0));
    Ireturn = 0xac, "ireturn", None, Some((1, 0));
    Lreturn = 0xad, "lreturn", None, Some((2, 0));
    Freturn = 0xae, "freturn", None, Some((1, 0));
    Dreturn = 0xaf, "dreturn", None, Some((2, 0));
    Areturn = 0xb0, "areturn", None, Some((1, 0));
    Return = 0xb1, "return", None, Some((0, 0));
    Getstatic = 0xb2, "getstatic", FieldRef, None;
    Putstatic = 0xb3, "putstatic", FieldRef, None;
    Getfield = 0xb4, "getfield", FieldRef, None;
    Putfield = 0xb5, "putfield", FieldRef, None;
    Invokevirtual = 0xb6, "invokevirtual", MethodRef, None;
    Invokespecial = 0xb7, "invokespecial", MethodRef, None;
    Invokestatic = 0xb8, "invokestatic", MethodRef, None;
    Invokeinterface = 0xb9, "invokeinterface", InterfaceMethodRef, None;
    Invokedynamic = 0xba, "invokedynamic", InvokeDynamic, None;
    New = 0xbb, "new", ClassRef, Some((0, 1));
    Newarray = 0xbc, "newarray", NewArray, Some((1, 1));
    Anewarray = 0xbd, "anewarray", ClassRef, Some((1, 1));
    Arraylength = 0xbe, "arraylength", None, Some((1, 1));
    Athrow = 0xbf, "athrow", None, Some((1, 0));
    Checkcast = 0xc0, "checkcast", ClassRef, Some((1, 1));
    Instanceof = 0xc1, "instanceof", ClassRef, Some((1, 1));
    Monitorenter = 0xc2, "monitorenter", None, Some((1, 0));
    Monitorexit = 0xc3, "monitorexit", None, Some((1, 0));
    Wide = 0xc4, "wide", Wide, Some((0, 0));
    Multianewarray = 0xc5, "multianewarray", MultiANewArray, None;
    Ifnull = 0xc6, "ifnull", Branch, Some((1, 0));
    Ifnonnull = 0xc7, "ifnonnull", Branch, Some((1, 0));
    GotoW = 0xc8, "goto_w", BranchWide, Some((0, 0));
    JsrW = 0xc9, "jsr_w", BranchWide, Some((0, 1));
}

impl Opcode {
    /// Whether the opcode transfers control somewhere other than (or in addition to) the next
    /// instruction by way of an encoded jump offset
    pub fn is_branch(self) -> bool {
        matches!(
            self.shape(),
            OperandShape::Branch
                | OperandShape::BranchWide
                | OperandShape::TableSwitch
                | OperandShape::LookupSwitch
        )
    }

    pub fn is_return(self) -> bool {
        matches!(
            self,
            Opcode::Ireturn
                | Opcode::Lreturn
                | Opcode::Freturn
                | Opcode::Dreturn
                | Opcode::Areturn
                | Opcode::Return
        )
    }

    pub fn is_unconditional_jump(self) -> bool {
        matches!(self, Opcode::Goto | Opcode::GotoW)
    }

    /// Whether control can continue to the next instruction
    ///
    /// `jsr` counts as falling through, since the subroutine comes back with `ret`.
    pub fn falls_through(self) -> bool {
        !(self.is_return()
            || self.is_unconditional_jump()
            || matches!(
                self,
                Opcode::Tableswitch | Opcode::Lookupswitch | Opcode::Athrow | Opcode::Ret
            ))
    }

    /// Whether the instruction ends a basic block
    pub fn ends_block(self) -> bool {
        self.is_branch() || !self.falls_through()
    }

    /// Whether `wide` may precede this opcode
    pub fn is_widenable(self) -> bool {
        matches!(self.shape(), OperandShape::Local | OperandShape::Increment)
    }

    /// Conditional branches that pop and compare values
    pub fn is_conditional_branch(self) -> bool {
        self.is_branch() && self.shape() == OperandShape::Branch && self.falls_through()
            && !matches!(self, Opcode::Jsr)
    }

    /// `lcmp`, `fcmpl`, `fcmpg`, `dcmpl`, `dcmpg`
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            Opcode::Lcmp | Opcode::Fcmpl | Opcode::Fcmpg | Opcode::Dcmpl | Opcode::Dcmpg
        )
    }

    /// Local variable baked into opcodes like `iload_2` or `astore_0`
    pub fn implicit_local(self) -> Option<u8> {
        let byte = self as u8;
        match byte {
            0x1a..=0x2d => Some((byte - 0x1a) % 4),
            0x3b..=0x4e => Some((byte - 0x3b) % 4),
            _ => None,
        }
    }

    /// Integer pushed by `iconst_m1` through `iconst_5`
    pub fn implicit_push(self) -> Option<i32> {
        let byte = self as u8;
        match byte {
            0x02..=0x08 => Some(byte as i32 - 3),
            _ => None,
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn opcode_bytes_are_dense() {
        for byte in 0u8..=0xc9 {
            let opcode = Opcode::from_u8(byte).unwrap();
            assert_eq!(opcode as u8, byte);
        }
        for byte in 0xcau8..=0xff {
            assert_eq!(Opcode::from_u8(byte), None);
        }
    }

    #[test]
    fn implicit_operands() {
        assert_eq!(Opcode::Iload0.implicit_local(), Some(0));
        assert_eq!(Opcode::Dload3.implicit_local(), Some(3));
        assert_eq!(Opcode::Astore2.implicit_local(), Some(2));
        assert_eq!(Opcode::Aload.implicit_local(), None);
        assert_eq!(Opcode::IconstM1.implicit_push(), Some(-1));
        assert_eq!(Opcode::Iconst5.implicit_push(), Some(5));
        assert_eq!(Opcode::Lconst1.implicit_push(), None);
    }

    #[test]
    fn control_flow_classification() {
        assert!(Opcode::Ifeq.is_conditional_branch());
        assert!(Opcode::Ifnonnull.is_conditional_branch());
        assert!(!Opcode::Goto.is_conditional_branch());
        assert!(!Opcode::Jsr.is_conditional_branch());
        assert!(Opcode::Jsr.falls_through());
        assert!(!Opcode::Athrow.falls_through());
        assert!(Opcode::Athrow.ends_block());
        assert!(Opcode::Ret.ends_block());
        assert!(!Opcode::Iadd.ends_block());
        assert!(Opcode::Iinc.is_widenable());
        assert!(Opcode::Ret.is_widenable());
        assert!(!Opcode::Bipush.is_widenable());
    }

    #[test]
    fn stack_effects() {
        assert_eq!(Opcode::Dup2X2.fixed_stack_effect(), Some((4, 6)));
        assert_eq!(Opcode::Lshl.fixed_stack_effect(), Some((3, 2)));
        assert_eq!(Opcode::Lcmp.fixed_stack_effect(), Some((4, 1)));
        assert_eq!(Opcode::Getfield.fixed_stack_effect(), None);
        assert_eq!(Opcode::Ldc.fixed_stack_effect(), None);
    }
}
