use crate::jvm::class_file::{Attribute, Code, ConstantLookup, ConstantLookupError};
use crate::jvm::class_file::Utf8ConstantIndex;
use crate::jvm::{Deserialize, Error, MethodAccessFlags, Serialize};
use byteorder::{ReadBytesExt, WriteBytesExt};

/// Method declared by a class or interface
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.6
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Method {
    pub access_flags: MethodAccessFlags,
    pub name_index: Utf8ConstantIndex,
    pub descriptor_index: Utf8ConstantIndex,
    pub attributes: Vec<Attribute>,
}

impl Method {
    pub fn name<'a>(
        &self,
        constants: &'a impl ConstantLookup,
    ) -> Result<&'a str, ConstantLookupError> {
        constants.utf8(self.name_index.into())
    }

    pub fn descriptor<'a>(
        &self,
        constants: &'a impl ConstantLookup,
    ) -> Result<&'a str, ConstantLookupError> {
        constants.utf8(self.descriptor_index.into())
    }

    /// Parse the `Code` attribute
    ///
    /// Abstract and native methods have no code, so this returns `None` for them.
    pub fn code(&self, constants: &impl ConstantLookup) -> Result<Option<Code>, Error> {
        for attribute in &self.attributes {
            if let Some(code) = attribute.parse::<Code>(constants) {
                let code = code.map_err(|err| {
                    let name = self.name(constants).unwrap_or("<unknown>");
                    Error::MalformedClass(format!("bad `Code` attribute on `{}`: {}", name, err))
                })?;
                return Ok(Some(code));
            }
        }
        Ok(None)
    }
}

impl Serialize for Method {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.access_flags.serialize(writer)?;
        self.name_index.serialize(writer)?;
        self.descriptor_index.serialize(writer)?;
        self.attributes.serialize(writer)?;
        Ok(())
    }
}

impl Deserialize for Method {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> std::io::Result<Self> {
        Ok(Method {
            access_flags: MethodAccessFlags::deserialize(reader)?,
            name_index: Utf8ConstantIndex::deserialize(reader)?,
            descriptor_index: Utf8ConstantIndex::deserialize(reader)?,
            attributes: Vec::deserialize(reader)?,
        })
    }
}
