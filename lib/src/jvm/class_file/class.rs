use crate::jvm::class_file::{Attribute, ClassConstantIndex, ConstantIndex, ConstantLookup};
use crate::jvm::class_file::ConstantsPool;
use crate::jvm::class_file::{Field, Method, Version};
use crate::jvm::{ClassAccessFlags, Deserialize, Serialize};
use byteorder::{ReadBytesExt, WriteBytesExt};
use std::fs;
use std::io::{BufReader, Error as IoError, ErrorKind};
use std::path::Path;

/// Representation of the [`class` file format of the JVM][0]
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html
#[derive(Debug, PartialEq)]
pub struct ClassFile {
    pub version: Version,
    pub constants: ConstantsPool,
    pub access_flags: ClassAccessFlags,
    pub this_class: ClassConstantIndex,

    /// Only `java/lang/Object` has no superclass (encoded as index 0)
    pub super_class: Option<ClassConstantIndex>,
    pub interfaces: Vec<ClassConstantIndex>,
    pub fields: Vec<Field>,
    pub methods: Vec<Method>,
    pub attributes: Vec<Attribute>,
}

impl ClassFile {
    /// Magic header bytes that go at the front of the serialized class file
    const MAGIC: [u8; 4] = [0xCA, 0xFE, 0xBA, 0xBE];

    /// Read a class file from disk
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> std::io::Result<ClassFile> {
        let file = fs::File::open(path)?;
        ClassFile::deserialize(&mut BufReader::new(file))
    }

    /// Save the class file to disk
    pub fn save_to_path<P: AsRef<Path>>(
        &self,
        path: P,
        create_missing_directories: bool,
    ) -> std::io::Result<()> {
        let path = path.as_ref();
        if create_missing_directories {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut class_file = fs::File::create(path)?;
        self.serialize(&mut class_file)
    }

    /// Binary name of this class (eg. `java/lang/String`)
    pub fn class_name(&self) -> Option<&str> {
        self.constants.class_name(self.this_class.into()).ok()
    }

    /// Find the first method with the given name
    pub fn method_named(&self, name: &str) -> Option<&Method> {
        self.methods
            .iter()
            .find(|method| method.name(&self.constants) == Ok(name))
    }
}

impl Serialize for ClassFile {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_all(&ClassFile::MAGIC)?;
        self.version.serialize(writer)?;
        self.constants.serialize(writer)?;
        self.access_flags.serialize(writer)?;
        self.this_class.serialize(writer)?;
        match self.super_class {
            None => 0u16.serialize(writer)?,
            Some(super_class) => super_class.serialize(writer)?,
        }
        self.interfaces.serialize(writer)?;
        self.fields.serialize(writer)?;
        self.methods.serialize(writer)?;
        self.attributes.serialize(writer)?;
        Ok(())
    }
}

impl Deserialize for ClassFile {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> std::io::Result<Self> {
        let mut magic = [0; 4];
        reader.read_exact(&mut magic)?;
        if magic != ClassFile::MAGIC {
            let msg = format!("Bad magic header {:02x?}", magic);
            return Err(IoError::new(ErrorKind::InvalidData, msg));
        }

        let version = Version::deserialize(reader)?;
        let constants = ConstantsPool::deserialize(reader)?;
        let access_flags = ClassAccessFlags::deserialize(reader)?;
        let this_class = ClassConstantIndex::deserialize(reader)?;
        let super_class = match u16::deserialize(reader)? {
            0 => None,
            idx => Some(ClassConstantIndex(ConstantIndex(idx))),
        };

        let class_file = ClassFile {
            version,
            constants,
            access_flags,
            this_class,
            super_class,
            interfaces: Vec::deserialize(reader)?,
            fields: Vec::deserialize(reader)?,
            methods: Vec::deserialize(reader)?,
            attributes: Vec::deserialize(reader)?,
        };
        log::debug!(
            "Read class {} (version {}.{}, {} constants, {} methods)",
            class_file.class_name().unwrap_or("<unknown>"),
            class_file.version.major,
            class_file.version.minor,
            class_file.constants.len(),
            class_file.methods.len(),
        );
        Ok(class_file)
    }
}
