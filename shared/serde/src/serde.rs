use crate::{
    bit_reader::BitReader, bit_writer::BitWrite, error::SerdeErr,
    integer::UnsignedVariableInteger,
};

/// A type that can be serialized to and deserialized from a bit stream.
pub trait Serde: Sized {
    fn ser(&self, writer: &mut dyn BitWrite);
    fn de(reader: &mut BitReader) -> Result<Self, SerdeErr>;
}

impl Serde for bool {
    fn ser(&self, writer: &mut dyn BitWrite) {
        writer.write_bit(*self);
    }

    fn de(reader: &mut BitReader) -> Result<Self, SerdeErr> {
        reader.read_bit()
    }
}

impl Serde for u8 {
    fn ser(&self, writer: &mut dyn BitWrite) {
        writer.write_byte(*self);
    }

    fn de(reader: &mut BitReader) -> Result<Self, SerdeErr> {
        reader.read_byte()
    }
}

impl Serde for u16 {
    fn ser(&self, writer: &mut dyn BitWrite) {
        writer.write_bytes(&self.to_le_bytes());
    }

    fn de(reader: &mut BitReader) -> Result<Self, SerdeErr> {
        Ok(u16::from_le_bytes([reader.read_byte()?, reader.read_byte()?]))
    }
}

impl Serde for u32 {
    fn ser(&self, writer: &mut dyn BitWrite) {
        writer.write_bytes(&self.to_le_bytes());
    }

    fn de(reader: &mut BitReader) -> Result<Self, SerdeErr> {
        let mut bytes = [0u8; 4];
        for byte in &mut bytes {
            *byte = reader.read_byte()?;
        }
        Ok(u32::from_le_bytes(bytes))
    }
}

impl Serde for u64 {
    fn ser(&self, writer: &mut dyn BitWrite) {
        writer.write_bytes(&self.to_le_bytes());
    }

    fn de(reader: &mut BitReader) -> Result<Self, SerdeErr> {
        let mut bytes = [0u8; 8];
        for byte in &mut bytes {
            *byte = reader.read_byte()?;
        }
        Ok(u64::from_le_bytes(bytes))
    }
}

impl Serde for i32 {
    fn ser(&self, writer: &mut dyn BitWrite) {
        writer.write_bytes(&self.to_le_bytes());
    }

    fn de(reader: &mut BitReader) -> Result<Self, SerdeErr> {
        let mut bytes = [0u8; 4];
        for byte in &mut bytes {
            *byte = reader.read_byte()?;
        }
        Ok(i32::from_le_bytes(bytes))
    }
}

impl Serde for f32 {
    fn ser(&self, writer: &mut dyn BitWrite) {
        self.to_bits().ser(writer);
    }

    fn de(reader: &mut BitReader) -> Result<Self, SerdeErr> {
        Ok(f32::from_bits(u32::de(reader)?))
    }
}

impl Serde for String {
    fn ser(&self, writer: &mut dyn BitWrite) {
        let bytes = self.as_bytes();
        UnsignedVariableInteger::<7>::new(bytes.len() as u64).ser(writer);
        writer.write_bytes(bytes);
    }

    fn de(reader: &mut BitReader) -> Result<Self, SerdeErr> {
        let length = UnsignedVariableInteger::<7>::de(reader)?.get() as usize;
        let mut bytes = Vec::new();
        reader.read_bytes(length, &mut bytes)?;
        String::from_utf8(bytes).map_err(|_| SerdeErr::InvalidUtf8)
    }
}

impl<T: Serde> Serde for Option<T> {
    fn ser(&self, writer: &mut dyn BitWrite) {
        match self {
            Some(value) => {
                writer.write_bit(true);
                value.ser(writer);
            }
            None => writer.write_bit(false),
        }
    }

    fn de(reader: &mut BitReader) -> Result<Self, SerdeErr> {
        if reader.read_bit()? {
            Ok(Some(T::de(reader)?))
        } else {
            Ok(None)
        }
    }
}

impl<T: Serde> Serde for Vec<T> {
    fn ser(&self, writer: &mut dyn BitWrite) {
        UnsignedVariableInteger::<7>::new(self.len() as u64).ser(writer);
        for item in self {
            item.ser(writer);
        }
    }

    fn de(reader: &mut BitReader) -> Result<Self, SerdeErr> {
        let length = UnsignedVariableInteger::<7>::de(reader)?.get() as usize;
        let mut out = Vec::new();
        for _ in 0..length {
            out.push(T::de(reader)?);
        }
        Ok(out)
    }
}
