use crate::jvm::{Deserialize, Serialize};
use crate::util::{Offset, OffsetVec, Width};
use byteorder::{ReadBytesExt, WriteBytesExt};
use std::borrow::{Borrow, Cow};
use std::collections::HashMap;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::io::{Error as IoError, ErrorKind};
use std::result::Result;

/// Class file constants pool
///
/// Pools are either read out of an existing class file or built up from scratch with the `get_*`
/// methods. Either way, inserting a constant that is already in the pool returns the existing
/// index instead of adding a duplicate entry.
#[derive(Debug)]
pub struct ConstantsPool {
    constants: OffsetVec<Constant>,

    utf8s: HashMap<String, Utf8ConstantIndex>,
    classes: HashMap<Utf8ConstantIndex, ClassConstantIndex>,
    strings: HashMap<Utf8ConstantIndex, StringConstantIndex>,
    integers: HashMap<i32, ConstantIndex>,
    floats: HashMap<u32, ConstantIndex>,
    longs: HashMap<i64, ConstantIndex>,
    doubles: HashMap<u64, ConstantIndex>,
    name_and_types: HashMap<(Utf8ConstantIndex, Utf8ConstantIndex), NameAndTypeConstantIndex>,
    field_refs: HashMap<(ClassConstantIndex, NameAndTypeConstantIndex), FieldRefConstantIndex>,
    method_refs:
        HashMap<(ClassConstantIndex, NameAndTypeConstantIndex, bool), MethodRefConstantIndex>,
    method_handles: HashMap<(HandleKind, ConstantIndex), ConstantIndex>,
    method_types: HashMap<Utf8ConstantIndex, ConstantIndex>,
    invoke_dynamics: HashMap<(u16, NameAndTypeConstantIndex), InvokeDynamicConstantIndex>,
}

impl ConstantsPool {
    /// Make a fresh empty constants pool
    pub fn new() -> ConstantsPool {
        ConstantsPool {
            constants: OffsetVec::new_starting_at(Offset(1)),
            utf8s: HashMap::new(),
            classes: HashMap::new(),
            strings: HashMap::new(),
            integers: HashMap::new(),
            floats: HashMap::new(),
            longs: HashMap::new(),
            doubles: HashMap::new(),
            name_and_types: HashMap::new(),
            field_refs: HashMap::new(),
            method_refs: HashMap::new(),
            method_handles: HashMap::new(),
            method_types: HashMap::new(),
            invoke_dynamics: HashMap::new(),
        }
    }

    /// Number of entries in the pool (long and double constants count once)
    pub fn len(&self) -> usize {
        self.constants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constants.is_empty()
    }

    /// Iterate through the constants along with their indices
    pub fn iter(&self) -> impl Iterator<Item = (ConstantIndex, &Constant)> + '_ {
        self.constants
            .iter()
            .map(|(offset, constant)| (ConstantIndex(offset.0 as u16), constant))
    }

    /// Push a constant into the constant pool, provided there is space for it
    ///
    /// Note: the largest valid index is 65535, indexing starts at 1, and some constants take two
    /// spaces.
    fn push_constant(&mut self, constant: Constant) -> Result<ConstantIndex, ConstantPoolOverflow> {
        let offset = self.constants.offset_len().0;

        if offset + constant.width() > u16::MAX as usize {
            return Err(ConstantPoolOverflow {
                constant,
                offset: offset as u16,
            });
        }

        let idx = ConstantIndex(offset as u16);
        self.remember(idx, &constant);
        self.constants.push(constant);
        Ok(idx)
    }

    /// Record a constant in the deduplication maps (the first occurrence wins)
    fn remember(&mut self, idx: ConstantIndex, constant: &Constant) {
        match constant {
            Constant::Utf8(string) => {
                self.utf8s
                    .entry(string.clone())
                    .or_insert(Utf8ConstantIndex(idx));
            }
            Constant::Integer(integer) => {
                self.integers.entry(*integer).or_insert(idx);
            }
            Constant::Float(float) => {
                self.floats.entry(float.to_bits()).or_insert(idx);
            }
            Constant::Long(long) => {
                self.longs.entry(*long).or_insert(idx);
            }
            Constant::Double(double) => {
                self.doubles.entry(double.to_bits()).or_insert(idx);
            }
            Constant::Class(name) => {
                self.classes
                    .entry(*name)
                    .or_insert(ClassConstantIndex(idx));
            }
            Constant::String(utf8) => {
                self.strings
                    .entry(*utf8)
                    .or_insert(StringConstantIndex(idx));
            }
            Constant::FieldRef {
                class,
                name_and_type,
            } => {
                self.field_refs
                    .entry((*class, *name_and_type))
                    .or_insert(FieldRefConstantIndex(idx));
            }
            Constant::MethodRef {
                class,
                name_and_type,
                is_interface,
            } => {
                self.method_refs
                    .entry((*class, *name_and_type, *is_interface))
                    .or_insert(MethodRefConstantIndex(idx));
            }
            Constant::NameAndType { name, descriptor } => {
                self.name_and_types
                    .entry((*name, *descriptor))
                    .or_insert(NameAndTypeConstantIndex(idx));
            }
            Constant::MethodHandle {
                handle_kind,
                member,
            } => {
                self.method_handles
                    .entry((*handle_kind, *member))
                    .or_insert(idx);
            }
            Constant::MethodType { descriptor } => {
                self.method_types.entry(*descriptor).or_insert(idx);
            }
            Constant::InvokeDynamic {
                bootstrap_method,
                name_and_type,
            } => {
                self.invoke_dynamics
                    .entry((*bootstrap_method, *name_and_type))
                    .or_insert(InvokeDynamicConstantIndex(idx));
            }
            Constant::Dynamic { .. } | Constant::Module(_) | Constant::Package(_) => (),
        }
    }

    /// Get or insert a utf8 constant from the constant pool
    pub fn get_utf8<'a, S: Into<Cow<'a, str>>>(
        &mut self,
        utf8: S,
    ) -> Result<Utf8ConstantIndex, ConstantPoolOverflow> {
        let cow = utf8.into();

        if let Some(idx) = self.utf8s.get::<str>(cow.borrow()) {
            Ok(*idx)
        } else {
            let constant = Constant::Utf8(cow.into_owned());
            Ok(Utf8ConstantIndex(self.push_constant(constant)?))
        }
    }

    /// Get or insert a class constant (and the utf8 constant for its name)
    pub fn get_class(&mut self, name: &str) -> Result<ClassConstantIndex, ConstantPoolOverflow> {
        let name = self.get_utf8(name)?;
        if let Some(idx) = self.classes.get(&name) {
            Ok(*idx)
        } else {
            Ok(ClassConstantIndex(
                self.push_constant(Constant::Class(name))?,
            ))
        }
    }

    /// Get or insert a string constant from the constant pool
    pub fn get_string(
        &mut self,
        utf8: Utf8ConstantIndex,
    ) -> Result<StringConstantIndex, ConstantPoolOverflow> {
        if let Some(idx) = self.strings.get(&utf8) {
            Ok(*idx)
        } else {
            Ok(StringConstantIndex(
                self.push_constant(Constant::String(utf8))?,
            ))
        }
    }

    /// Get or insert a name & type constant from the constant pool
    pub fn get_name_and_type(
        &mut self,
        name: Utf8ConstantIndex,
        descriptor: Utf8ConstantIndex,
    ) -> Result<NameAndTypeConstantIndex, ConstantPoolOverflow> {
        if let Some(idx) = self.name_and_types.get(&(name, descriptor)) {
            Ok(*idx)
        } else {
            let constant = Constant::NameAndType { name, descriptor };
            Ok(NameAndTypeConstantIndex(self.push_constant(constant)?))
        }
    }

    /// Get or insert a field reference constant
    pub fn get_field_ref(
        &mut self,
        class: ClassConstantIndex,
        name_and_type: NameAndTypeConstantIndex,
    ) -> Result<FieldRefConstantIndex, ConstantPoolOverflow> {
        if let Some(idx) = self.field_refs.get(&(class, name_and_type)) {
            Ok(*idx)
        } else {
            let constant = Constant::FieldRef {
                class,
                name_and_type,
            };
            Ok(FieldRefConstantIndex(self.push_constant(constant)?))
        }
    }

    /// Get or insert a method reference constant (`Methodref` or `InterfaceMethodref`)
    pub fn get_method_ref(
        &mut self,
        class: ClassConstantIndex,
        name_and_type: NameAndTypeConstantIndex,
        is_interface: bool,
    ) -> Result<MethodRefConstantIndex, ConstantPoolOverflow> {
        if let Some(idx) = self.method_refs.get(&(class, name_and_type, is_interface)) {
            Ok(*idx)
        } else {
            let constant = Constant::MethodRef {
                class,
                name_and_type,
                is_interface,
            };
            Ok(MethodRefConstantIndex(self.push_constant(constant)?))
        }
    }

    pub fn get_integer(&mut self, integer: i32) -> Result<ConstantIndex, ConstantPoolOverflow> {
        match self.integers.get(&integer) {
            Some(idx) => Ok(*idx),
            None => self.push_constant(Constant::Integer(integer)),
        }
    }

    pub fn get_long(&mut self, long: i64) -> Result<ConstantIndex, ConstantPoolOverflow> {
        match self.longs.get(&long) {
            Some(idx) => Ok(*idx),
            None => self.push_constant(Constant::Long(long)),
        }
    }

    /// Floats are deduplicated by bit pattern (so `NaN`s with different payloads stay distinct)
    pub fn get_float(&mut self, float: f32) -> Result<ConstantIndex, ConstantPoolOverflow> {
        match self.floats.get(&float.to_bits()) {
            Some(idx) => Ok(*idx),
            None => self.push_constant(Constant::Float(float)),
        }
    }

    pub fn get_double(&mut self, double: f64) -> Result<ConstantIndex, ConstantPoolOverflow> {
        match self.doubles.get(&double.to_bits()) {
            Some(idx) => Ok(*idx),
            None => self.push_constant(Constant::Double(double)),
        }
    }

    /// Get or insert a method handle constant from the constant pool
    pub fn get_method_handle(
        &mut self,
        handle_kind: HandleKind,
        member: ConstantIndex,
    ) -> Result<ConstantIndex, ConstantPoolOverflow> {
        match self.method_handles.get(&(handle_kind, member)) {
            Some(idx) => Ok(*idx),
            None => self.push_constant(Constant::MethodHandle {
                handle_kind,
                member,
            }),
        }
    }

    pub fn get_method_type(
        &mut self,
        descriptor: Utf8ConstantIndex,
    ) -> Result<ConstantIndex, ConstantPoolOverflow> {
        match self.method_types.get(&descriptor) {
            Some(idx) => Ok(*idx),
            None => self.push_constant(Constant::MethodType { descriptor }),
        }
    }

    /// Get or insert an invoke dynamic constant from the constant pool
    pub fn get_invoke_dynamic(
        &mut self,
        bootstrap_method: u16,
        name_and_type: NameAndTypeConstantIndex,
    ) -> Result<InvokeDynamicConstantIndex, ConstantPoolOverflow> {
        if let Some(idx) = self.invoke_dynamics.get(&(bootstrap_method, name_and_type)) {
            Ok(*idx)
        } else {
            let constant = Constant::InvokeDynamic {
                bootstrap_method,
                name_and_type,
            };
            Ok(InvokeDynamicConstantIndex(self.push_constant(constant)?))
        }
    }
}

impl Default for ConstantsPool {
    fn default() -> Self {
        ConstantsPool::new()
    }
}

impl PartialEq for ConstantsPool {
    fn eq(&self, other: &Self) -> bool {
        self.constants == other.constants
    }
}

/// The count written is one more than the largest index (so it accounts for the two slots taken
/// by longs and doubles)
impl Serialize for ConstantsPool {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        (self.constants.offset_len().0 as u16).serialize(writer)?;
        for (_, constant) in &self.constants {
            constant.serialize(writer)?;
        }
        Ok(())
    }
}

impl Deserialize for ConstantsPool {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> std::io::Result<Self> {
        let count = u16::deserialize(reader)? as usize;
        let mut pool = ConstantsPool::new();
        while pool.constants.offset_len().0 < count {
            let constant = Constant::deserialize(reader)?;
            pool.push_constant(constant)
                .map_err(|overflow| IoError::new(ErrorKind::InvalidData, overflow.to_string()))?;
        }
        if pool.constants.offset_len().0 != count {
            let msg = format!("Wide constant overruns constant pool count {}", count);
            return Err(IoError::new(ErrorKind::InvalidData, msg));
        }
        Ok(pool)
    }
}

#[derive(Debug)]
pub struct ConstantPoolOverflow {
    pub constant: Constant,
    pub offset: u16,
}

impl Display for ConstantPoolOverflow {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(
            f,
            "no room for {} constant at index {}",
            self.constant.kind_name(),
            self.offset
        )
    }
}

/// Constants as in the constant pool
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.4
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    /// Class or an interface
    Class(Utf8ConstantIndex),

    /// Field
    FieldRef {
        class: ClassConstantIndex,
        name_and_type: NameAndTypeConstantIndex,
    },

    /// Method (this combines `Methodref` and `InterfaceMethodref`)
    MethodRef {
        class: ClassConstantIndex,
        name_and_type: NameAndTypeConstantIndex,
        is_interface: bool,
    },

    /// Constant object of type `java.lang.String`
    String(Utf8ConstantIndex),

    /// Constant primitive of type `int`
    Integer(i32),

    /// Constant primitive of type `float`
    Float(f32),

    /// Constant primitive of type `long`
    Long(i64),

    /// Constant primitive of type `double`
    Double(f64),

    /// Name and a type (eg. for a field or a method)
    NameAndType {
        name: Utf8ConstantIndex,
        descriptor: Utf8ConstantIndex,
    },

    /// Constant UTF-8 encoded raw string value
    ///
    /// Despite the name, the encoding is not quite UTF-8 (the encoding of the
    /// null character `\u{0000}` and the encoding of supplementary characters
    /// is different).
    Utf8(String),

    /// Constant object of type `java.lang.invoke.MethodHandle`
    MethodHandle {
        handle_kind: HandleKind,

        /// Depending on the method kind, this points to different things:
        ///
        ///   - `FieldRef` for `GetField`, `GetStatic`, `PutField`, `PutStatic`
        ///   - `MethodRef` for the rest
        member: ConstantIndex,
    },

    /// Method type
    MethodType { descriptor: Utf8ConstantIndex },

    /// Dynamically-computed constant
    Dynamic {
        bootstrap_method: u16,
        name_and_type: NameAndTypeConstantIndex,
    },

    /// Dynamically-computed call site
    InvokeDynamic {
        /// Index into the `BootstrapMethods` attribute
        bootstrap_method: u16,
        name_and_type: NameAndTypeConstantIndex,
    },

    Module(Utf8ConstantIndex),

    Package(Utf8ConstantIndex),
}

impl Constant {
    /// Name of the constant's kind, as used in the JVM specification (minus the `CONSTANT_`)
    pub fn kind_name(&self) -> &'static str {
        match self {
            Constant::Class(_) => "Class",
            Constant::FieldRef { .. } => "Fieldref",
            Constant::MethodRef {
                is_interface: false,
                ..
            } => "Methodref",
            Constant::MethodRef {
                is_interface: true, ..
            } => "InterfaceMethodref",
            Constant::String(_) => "String",
            Constant::Integer(_) => "Integer",
            Constant::Float(_) => "Float",
            Constant::Long(_) => "Long",
            Constant::Double(_) => "Double",
            Constant::NameAndType { .. } => "NameAndType",
            Constant::Utf8(_) => "Utf8",
            Constant::MethodHandle { .. } => "MethodHandle",
            Constant::MethodType { .. } => "MethodType",
            Constant::Dynamic { .. } => "Dynamic",
            Constant::InvokeDynamic { .. } => "InvokeDynamic",
            Constant::Module(_) => "Module",
            Constant::Package(_) => "Package",
        }
    }
}

impl Serialize for Constant {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        match self {
            Constant::Utf8(string) => {
                1u8.serialize(writer)?;
                let buffer: Vec<u8> = encode_modified_utf8(string);
                (buffer.len() as u16).serialize(writer)?;
                writer.write_all(&buffer)?;
            }
            Constant::Integer(integer) => {
                3u8.serialize(writer)?;
                integer.serialize(writer)?;
            }
            Constant::Float(float) => {
                4u8.serialize(writer)?;
                float.serialize(writer)?;
            }
            Constant::Long(long) => {
                5u8.serialize(writer)?;
                long.serialize(writer)?;
            }
            Constant::Double(double) => {
                6u8.serialize(writer)?;
                double.serialize(writer)?;
            }
            Constant::Class(name) => {
                7u8.serialize(writer)?;
                name.serialize(writer)?;
            }
            Constant::String(bytes) => {
                8u8.serialize(writer)?;
                bytes.serialize(writer)?;
            }
            Constant::FieldRef {
                class,
                name_and_type,
            } => {
                9u8.serialize(writer)?;
                class.serialize(writer)?;
                name_and_type.serialize(writer)?;
            }
            Constant::MethodRef {
                class,
                name_and_type,
                is_interface,
            } => {
                (if !is_interface { 10u8 } else { 11u8 }).serialize(writer)?;
                class.serialize(writer)?;
                name_and_type.serialize(writer)?;
            }
            Constant::NameAndType { name, descriptor } => {
                12u8.serialize(writer)?;
                name.serialize(writer)?;
                descriptor.serialize(writer)?;
            }
            Constant::MethodHandle {
                handle_kind,
                member,
            } => {
                15u8.serialize(writer)?;
                handle_kind.serialize(writer)?;
                member.serialize(writer)?;
            }
            Constant::MethodType { descriptor } => {
                16u8.serialize(writer)?;
                descriptor.serialize(writer)?;
            }
            Constant::Dynamic {
                bootstrap_method,
                name_and_type,
            } => {
                17u8.serialize(writer)?;
                bootstrap_method.serialize(writer)?;
                name_and_type.serialize(writer)?;
            }
            Constant::InvokeDynamic {
                bootstrap_method,
                name_and_type,
            } => {
                18u8.serialize(writer)?;
                bootstrap_method.serialize(writer)?;
                name_and_type.serialize(writer)?;
            }
            Constant::Module(name) => {
                19u8.serialize(writer)?;
                name.serialize(writer)?;
            }
            Constant::Package(name) => {
                20u8.serialize(writer)?;
                name.serialize(writer)?;
            }
        };
        Ok(())
    }
}

impl Deserialize for Constant {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> std::io::Result<Self> {
        let constant = match u8::deserialize(reader)? {
            1 => {
                let len = u16::deserialize(reader)?;
                let mut buffer = vec![0; len as usize];
                reader.read_exact(&mut buffer)?;
                Constant::Utf8(decode_modified_utf8(&buffer))
            }
            3 => Constant::Integer(i32::deserialize(reader)?),
            4 => Constant::Float(f32::deserialize(reader)?),
            5 => Constant::Long(i64::deserialize(reader)?),
            6 => Constant::Double(f64::deserialize(reader)?),
            7 => Constant::Class(Utf8ConstantIndex::deserialize(reader)?),
            8 => Constant::String(Utf8ConstantIndex::deserialize(reader)?),
            9 => Constant::FieldRef {
                class: ClassConstantIndex::deserialize(reader)?,
                name_and_type: NameAndTypeConstantIndex::deserialize(reader)?,
            },
            tag @ (10 | 11) => Constant::MethodRef {
                class: ClassConstantIndex::deserialize(reader)?,
                name_and_type: NameAndTypeConstantIndex::deserialize(reader)?,
                is_interface: tag == 11,
            },
            12 => Constant::NameAndType {
                name: Utf8ConstantIndex::deserialize(reader)?,
                descriptor: Utf8ConstantIndex::deserialize(reader)?,
            },
            15 => Constant::MethodHandle {
                handle_kind: HandleKind::deserialize(reader)?,
                member: ConstantIndex::deserialize(reader)?,
            },
            16 => Constant::MethodType {
                descriptor: Utf8ConstantIndex::deserialize(reader)?,
            },
            17 => Constant::Dynamic {
                bootstrap_method: u16::deserialize(reader)?,
                name_and_type: NameAndTypeConstantIndex::deserialize(reader)?,
            },
            18 => Constant::InvokeDynamic {
                bootstrap_method: u16::deserialize(reader)?,
                name_and_type: NameAndTypeConstantIndex::deserialize(reader)?,
            },
            19 => Constant::Module(Utf8ConstantIndex::deserialize(reader)?),
            20 => Constant::Package(Utf8ConstantIndex::deserialize(reader)?),
            tag => {
                let msg = format!("Unknown constant pool tag {}", tag);
                return Err(IoError::new(ErrorKind::InvalidData, msg));
            }
        };
        Ok(constant)
    }
}

/// Modified UTF-8 format used in class files.
///
/// See [this `DataInput` section for details][0]. Quoting from that section:
///
/// > The differences between this format and the standard UTF-8 format are the following:
/// >
/// >  * The null byte `\u0000` is encoded in 2-byte format rather than 1-byte, so that the encoded
/// >    strings never have embedded nulls.
/// >  * Only the 1-byte, 2-byte, and 3-byte formats are used.
/// >  * Supplementary characters are represented in the form of surrogate pairs.
///
/// [0]: https://docs.oracle.com/en/java/javase/17/docs/api/java.base/java/io/DataInput.html#modified-utf-8
pub fn encode_modified_utf8(string: &str) -> Vec<u8> {
    let mut buffer: Vec<u8> = vec![];
    for c in string.chars() {
        // Handle the exception for how `\u{0000}` is represented
        let len: usize = if c == '\u{0000}' { 2 } else { c.len_utf8() };
        let code: u32 = c as u32;

        match len {
            1 => buffer.push(code as u8),
            2 => {
                buffer.push((code >> 6 & 0x1F) as u8 | 0b1100_0000);
                buffer.push((code & 0x3F) as u8 | 0b1000_0000);
            }
            3 => {
                buffer.push((code >> 12 & 0x0F) as u8 | 0b1110_0000);
                buffer.push((code >> 6 & 0x3F) as u8 | 0b1000_0000);
                buffer.push((code & 0x3F) as u8 | 0b1000_0000);
            }

            // Supplementary characters: main divergence from unicode
            _ => {
                buffer.push(0b1110_1101);
                buffer.push(((code >> 16 & 0x0F) as u8).wrapping_sub(1) & 0x0F | 0b1010_0000);
                buffer.push((code >> 10 & 0x3F) as u8 | 0b1000_0000);

                buffer.push(0b1110_1101);
                buffer.push(((code >> 6 & 0x1F) as u8) | 0b1011_0000);
                buffer.push((code & 0x3F) as u8 | 0b1000_0000);
            }
        }
    }
    buffer
}

/// Inverse of [`encode_modified_utf8`]
///
/// Every 1, 2, or 3 byte group decodes to one UTF-16 code unit, so surrogate pairs recombine on
/// their own. Malformed groups and unpaired surrogates become `U+FFFD` rather than failing, since
/// a garbled string constant should not prevent reading the code that refers to it.
pub fn decode_modified_utf8(bytes: &[u8]) -> String {
    const REPLACEMENT: u16 = 0xFFFD;

    let mut units: Vec<u16> = Vec::with_capacity(bytes.len());
    let mut iter = bytes.iter().copied();
    while let Some(b0) = iter.next() {
        let unit = if b0 & 0x80 == 0 {
            b0 as u16
        } else if b0 & 0xE0 == 0xC0 {
            match iter.next() {
                Some(b1) if b1 & 0xC0 == 0x80 => ((b0 as u16 & 0x1F) << 6) | (b1 as u16 & 0x3F),
                _ => REPLACEMENT,
            }
        } else if b0 & 0xF0 == 0xE0 {
            match (iter.next(), iter.next()) {
                (Some(b1), Some(b2)) if b1 & 0xC0 == 0x80 && b2 & 0xC0 == 0x80 => {
                    ((b0 as u16 & 0x0F) << 12) | ((b1 as u16 & 0x3F) << 6) | (b2 as u16 & 0x3F)
                }
                _ => REPLACEMENT,
            }
        } else {
            REPLACEMENT
        };
        units.push(unit);
    }
    String::from_utf16_lossy(&units)
}

/// Almost all constants have width 1, except for `Constant::Long` and `Constant::Double`. Quoting
/// the JVM specification:
///
/// > All 8-byte constants take up two entries in the constant_pool table of the class file. If a
/// > CONSTANT_Long_info or CONSTANT_Double_info structure is the item in the constant_pool table
/// > at index n, then the next usable item in the pool is located at index n+2. The constant_pool
/// > index n+1 must be valid but is considered unusable.
/// >
/// > In retrospect, making 8-byte constants take two constant pool entries was a poor choice.
///
/// Conveniently, the same two constants are exactly the ones that occupy two operand stack slots
/// when loaded.
impl Width for Constant {
    fn width(&self) -> usize {
        match self {
            Constant::Long(_) | Constant::Double(_) => 2,
            _ => 1,
        }
    }
}

#[derive(Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Debug)]
pub struct ConstantIndex(pub u16);

impl Display for ConstantIndex {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "#{}", self.0)
    }
}

impl Serialize for ConstantIndex {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.0.serialize(writer)
    }
}

impl Deserialize for ConstantIndex {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> std::io::Result<Self> {
        Ok(ConstantIndex(u16::deserialize(reader)?))
    }
}

macro_rules! typed_constant_index {
    ($($name:ident),*) => {
        $(
            #[derive(Copy, Clone, Hash, Eq, PartialEq, Debug)]
            pub struct $name(pub ConstantIndex);

            impl From<$name> for ConstantIndex {
                fn from(idx: $name) -> ConstantIndex {
                    idx.0
                }
            }

            impl Serialize for $name {
                fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
                    self.0.serialize(writer)
                }
            }

            impl Deserialize for $name {
                fn deserialize<R: ReadBytesExt>(reader: &mut R) -> std::io::Result<Self> {
                    Ok($name(ConstantIndex::deserialize(reader)?))
                }
            }
        )*
    };
}

typed_constant_index!(
    Utf8ConstantIndex,
    StringConstantIndex,
    NameAndTypeConstantIndex,
    ClassConstantIndex,
    FieldRefConstantIndex,
    MethodRefConstantIndex,
    InvokeDynamicConstantIndex
);

/// Type of method handle
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-5.html#jvms-5.4.3.5-220
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq)]
pub enum HandleKind {
    GetField,
    GetStatic,
    PutField,
    PutStatic,
    InvokeVirtual,
    InvokeStatic,
    InvokeSpecial,
    NewInvokeSpecial,
    InvokeInterface,
}

impl Serialize for HandleKind {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        let byte: u8 = match self {
            HandleKind::GetField => 1,
            HandleKind::GetStatic => 2,
            HandleKind::PutField => 3,
            HandleKind::PutStatic => 4,
            HandleKind::InvokeVirtual => 5,
            HandleKind::InvokeStatic => 6,
            HandleKind::InvokeSpecial => 7,
            HandleKind::NewInvokeSpecial => 8,
            HandleKind::InvokeInterface => 9,
        };
        byte.serialize(writer)
    }
}

impl Deserialize for HandleKind {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> std::io::Result<Self> {
        let kind = match u8::deserialize(reader)? {
            1 => HandleKind::GetField,
            2 => HandleKind::GetStatic,
            3 => HandleKind::PutField,
            4 => HandleKind::PutStatic,
            5 => HandleKind::InvokeVirtual,
            6 => HandleKind::InvokeStatic,
            7 => HandleKind::InvokeSpecial,
            8 => HandleKind::NewInvokeSpecial,
            9 => HandleKind::InvokeInterface,
            other => {
                let msg = format!("Unknown method handle kind {}", other);
                return Err(IoError::new(ErrorKind::InvalidData, msg));
            }
        };
        Ok(kind)
    }
}

/// Why a constant index could not be resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConstantLookupError {
    /// No constant starts at this index (including the unusable slot after a long or double)
    OutOfRange(ConstantIndex),

    /// The constant exists, but is not of the expected kind
    WrongKind {
        index: ConstantIndex,
        expected: &'static str,
        found: &'static str,
    },
}

impl ConstantLookupError {
    fn wrong_kind(index: ConstantIndex, expected: &'static str, found: &Constant) -> Self {
        ConstantLookupError::WrongKind {
            index,
            expected,
            found: found.kind_name(),
        }
    }
}

impl Display for ConstantLookupError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            ConstantLookupError::OutOfRange(index) => {
                write!(f, "no constant at index {}", index)
            }
            ConstantLookupError::WrongKind {
                index,
                expected,
                found,
            } => write!(f, "expected {} at index {}, found {}", expected, index, found),
        }
    }
}

impl std::error::Error for ConstantLookupError {}

/// Field or method reference with all of its indirections resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemberRef<'a> {
    pub class: &'a str,
    pub name: &'a str,
    pub descriptor: &'a str,
}

/// Symbol resolution by constant index
///
/// Only [`ConstantLookup::constant`] needs implementing. The other methods follow the
/// indirections between constants (eg. a `Fieldref` points to a `Class` and a `NameAndType`, both
/// of which point to `Utf8` constants).
pub trait ConstantLookup {
    /// Constant starting at the given index
    fn constant(&self, index: ConstantIndex) -> Result<&Constant, ConstantLookupError>;

    fn utf8(&self, index: ConstantIndex) -> Result<&str, ConstantLookupError> {
        match self.constant(index)? {
            Constant::Utf8(string) => Ok(string),
            other => Err(ConstantLookupError::wrong_kind(index, "Utf8", other)),
        }
    }

    /// Binary name of a `Class` constant
    fn class_name(&self, index: ConstantIndex) -> Result<&str, ConstantLookupError> {
        match self.constant(index)? {
            Constant::Class(name) => self.utf8((*name).into()),
            other => Err(ConstantLookupError::wrong_kind(index, "Class", other)),
        }
    }

    /// Name and descriptor of a `NameAndType` constant
    fn name_and_type(&self, index: ConstantIndex) -> Result<(&str, &str), ConstantLookupError> {
        match self.constant(index)? {
            Constant::NameAndType { name, descriptor } => {
                Ok((self.utf8((*name).into())?, self.utf8((*descriptor).into())?))
            }
            other => Err(ConstantLookupError::wrong_kind(index, "NameAndType", other)),
        }
    }

    /// Owner, name, and descriptor of a `Fieldref`, `Methodref`, or `InterfaceMethodref`
    fn member_ref(&self, index: ConstantIndex) -> Result<MemberRef<'_>, ConstantLookupError> {
        let (class, name_and_type) = match self.constant(index)? {
            Constant::FieldRef {
                class,
                name_and_type,
            }
            | Constant::MethodRef {
                class,
                name_and_type,
                ..
            } => (*class, *name_and_type),
            other => return Err(ConstantLookupError::wrong_kind(index, "member ref", other)),
        };
        let (name, descriptor) = self.name_and_type(name_and_type.into())?;
        Ok(MemberRef {
            class: self.class_name(class.into())?,
            name,
            descriptor,
        })
    }

    /// Name and descriptor of an `InvokeDynamic` or `Dynamic` constant
    fn call_site(&self, index: ConstantIndex) -> Result<(&str, &str), ConstantLookupError> {
        match self.constant(index)? {
            Constant::InvokeDynamic { name_and_type, .. }
            | Constant::Dynamic { name_and_type, .. } => {
                self.name_and_type((*name_and_type).into())
            }
            other => Err(ConstantLookupError::wrong_kind(index, "InvokeDynamic", other)),
        }
    }
}

impl ConstantLookup for ConstantsPool {
    fn constant(&self, index: ConstantIndex) -> Result<&Constant, ConstantLookupError> {
        self.constants
            .get_offset(Offset(index.0 as usize))
            .ok()
            .ok_or(ConstantLookupError::OutOfRange(index))
    }
}


#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;

    fn sample_pool() -> (ConstantsPool, FieldRefConstantIndex, MethodRefConstantIndex) {
        let mut pool = ConstantsPool::new();
        let owner = pool.get_class("me/alec/Point").unwrap();
        let x = pool.get_utf8("x").unwrap();
        let int = pool.get_utf8("I").unwrap();
        let x_int = pool.get_name_and_type(x, int).unwrap();
        let field = pool.get_field_ref(owner, x_int).unwrap();
        let max = pool.get_utf8("max").unwrap();
        let max_desc = pool.get_utf8("(II)I").unwrap();
        let max_nat = pool.get_name_and_type(max, max_desc).unwrap();
        let method = pool.get_method_ref(owner, max_nat, false).unwrap();
        (pool, field, method)
    }

    #[test]
    fn builders_deduplicate() {
        let mut pool = ConstantsPool::new();
        let first = pool.get_utf8("hello").unwrap();
        let second = pool.get_utf8(String::from("hello")).unwrap();
        assert_eq!(first, second);
        assert_eq!(pool.get_class("A").unwrap(), pool.get_class("A").unwrap());
        assert_eq!(pool.get_integer(7).unwrap(), pool.get_integer(7).unwrap());
        assert_ne!(pool.get_float(0.0).unwrap(), pool.get_float(-0.0).unwrap());
        assert_eq!(pool.len(), 6);
    }

    #[test]
    fn wide_constants_take_two_indices() {
        let mut pool = ConstantsPool::new();
        assert_eq!(pool.get_long(1).unwrap(), ConstantIndex(1));
        assert_eq!(pool.get_double(2.0).unwrap(), ConstantIndex(3));
        assert_eq!(pool.get_integer(3).unwrap(), ConstantIndex(5));

        assert_eq!(pool.constant(ConstantIndex(3)), Ok(&Constant::Double(2.0)));
        assert_eq!(
            pool.constant(ConstantIndex(2)),
            Err(ConstantLookupError::OutOfRange(ConstantIndex(2)))
        );
        assert_eq!(
            pool.constant(ConstantIndex(0)),
            Err(ConstantLookupError::OutOfRange(ConstantIndex(0)))
        );
        assert_eq!(
            pool.constant(ConstantIndex(6)),
            Err(ConstantLookupError::OutOfRange(ConstantIndex(6)))
        );
    }

    #[test]
    fn resolves_member_refs() {
        let (pool, field, method) = sample_pool();

        let field_ref = pool.member_ref(field.into()).unwrap();
        assert_eq!(field_ref.class, "me/alec/Point");
        assert_eq!(field_ref.name, "x");
        assert_eq!(field_ref.descriptor, "I");

        let method_ref = pool.member_ref(method.into()).unwrap();
        assert_eq!(method_ref.name, "max");
        assert_eq!(method_ref.descriptor, "(II)I");
    }

    #[test]
    fn reports_wrong_kinds() {
        let (pool, field, _) = sample_pool();
        assert_eq!(
            pool.utf8(field.into()),
            Err(ConstantLookupError::WrongKind {
                index: field.into(),
                expected: "Utf8",
                found: "Fieldref",
            })
        );
        assert!(pool.call_site(field.into()).is_err());
    }

    #[test]
    fn pool_binary_round_trip() {
        let (mut pool, _, _) = sample_pool();
        pool.get_long(-5).unwrap();
        pool.get_integer(42).unwrap();

        let mut bytes = vec![];
        pool.serialize(&mut bytes).unwrap();
        let read = ConstantsPool::deserialize(&mut Cursor::new(&bytes)).unwrap();
        assert_eq!(read, pool);

        // Reading fills in the deduplication maps too
        let mut read = read;
        let before = read.len();
        read.get_utf8("max").unwrap();
        read.get_long(-5).unwrap();
        assert_eq!(read.len(), before);
    }

    #[test]
    fn rejects_unknown_tags() {
        let bytes = [0, 2, 2, 0, 0];
        assert!(ConstantsPool::deserialize(&mut Cursor::new(&bytes)).is_err());
    }

    #[test]
    fn call_site_constants() {
        let (mut pool, _, method) = sample_pool();
        let text = pool.get_utf8("hi").unwrap();
        let string = pool.get_string(text).unwrap();
        assert_eq!(pool.get_string(text).unwrap(), string);
        assert_eq!(pool.constant(string.into()), Ok(&Constant::String(text)));

        let handle = pool
            .get_method_handle(HandleKind::InvokeStatic, method.into())
            .unwrap();
        assert_eq!(
            pool.get_method_handle(HandleKind::InvokeStatic, method.into())
                .unwrap(),
            handle
        );
        let descriptor = pool.get_utf8("(II)I").unwrap();
        let method_type = pool.get_method_type(descriptor).unwrap();
        assert_eq!(pool.get_method_type(descriptor).unwrap(), method_type);

        let name = pool.get_utf8("apply").unwrap();
        let apply = pool.get_name_and_type(name, descriptor).unwrap();
        let call = pool.get_invoke_dynamic(0, apply).unwrap();
        assert_eq!(pool.get_invoke_dynamic(0, apply).unwrap(), call);
        assert_eq!(pool.call_site(call.into()), Ok(("apply", "(II)I")));
    }
}
