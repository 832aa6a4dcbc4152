use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::Result;

/// Utility trait for serializing data inside class files
///
/// Java class files have some peculiarities that make it useful to define an extra trait (instead
/// of just using `serde`):
///
///   - tags are always `u8`
///   - when serializing a sequence, the length of the sequence is usually `u16`
///   - everything is big-endian
///
pub trait Serialize: Sized {
    /// Serialize construct into a binary output stream
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()>;
}

/// Mirror of [`Serialize`], for reading class file structures back in
pub trait Deserialize: Sized {
    /// Deserialize construct from a binary input stream
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self>;
}

macro_rules! primitive_binary_format {
    ($($typ:ty => $write:ident, $read:ident;)*) => {
        $(
            impl Serialize for $typ {
                fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
                    writer.$write::<BigEndian>(*self)
                }
            }

            impl Deserialize for $typ {
                fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self> {
                    reader.$read::<BigEndian>()
                }
            }
        )*
    };
}

primitive_binary_format! {
    u16 => write_u16, read_u16;
    u32 => write_u32, read_u32;
    u64 => write_u64, read_u64;
    i16 => write_i16, read_i16;
    i32 => write_i32, read_i32;
    i64 => write_i64, read_i64;
    f32 => write_f32, read_f32;
    f64 => write_f64, read_f64;
}

impl Serialize for u8 {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        writer.write_u8(*self)
    }
}

impl Deserialize for u8 {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self> {
        reader.read_u8()
    }
}

impl Serialize for i8 {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        writer.write_i8(*self)
    }
}

impl Deserialize for i8 {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self> {
        reader.read_i8()
    }
}

/// Size in `u16` is the first thing serialized/deserialized
impl<A: Serialize> Serialize for Vec<A> {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        (self.len() as u16).serialize(writer)?;
        for elem in self {
            elem.serialize(writer)?;
        }
        Ok(())
    }
}

impl<A: Deserialize> Deserialize for Vec<A> {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self> {
        let len = u16::deserialize(reader)?;
        let mut elems = Vec::with_capacity(len as usize);
        for _ in 0..len {
            elems.push(A::deserialize(reader)?);
        }
        Ok(elems)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn big_endian_primitives() {
        let mut bytes = vec![];
        0x1234u16.serialize(&mut bytes).unwrap();
        (-2i32).serialize(&mut bytes).unwrap();
        assert_eq!(bytes, vec![0x12, 0x34, 0xff, 0xff, 0xff, 0xfe]);

        let mut reader = Cursor::new(bytes);
        assert_eq!(u16::deserialize(&mut reader).unwrap(), 0x1234);
        assert_eq!(i32::deserialize(&mut reader).unwrap(), -2);
        assert!(u8::deserialize(&mut reader).is_err());
    }

    #[test]
    fn length_prefixed_vectors() {
        let mut bytes = vec![];
        vec![7u16, 9u16].serialize(&mut bytes).unwrap();
        assert_eq!(bytes, vec![0, 2, 0, 7, 0, 9]);
        let read: Vec<u16> = Deserialize::deserialize(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(read, vec![7, 9]);
    }
}
