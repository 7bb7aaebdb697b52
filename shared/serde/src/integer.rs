use crate::{bit_reader::BitReader, bit_writer::BitWrite, error::SerdeErr, serde::Serde};

/// Unsigned variable-length integer. Encoded as groups of `BITS` payload
/// bits, each group preceded by a continuation bit: 1 means another group
/// follows, 0 means this group is the last. Small values therefore cost
/// `BITS + 1` bits regardless of the carrier type.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct UnsignedVariableInteger<const BITS: u8> {
    value: u64,
}

impl<const BITS: u8> UnsignedVariableInteger<BITS> {
    pub fn new<T: Into<u64>>(value: T) -> Self {
        Self {
            value: value.into(),
        }
    }

    pub fn get(&self) -> u64 {
        self.value
    }
}

impl<const BITS: u8> Serde for UnsignedVariableInteger<BITS> {
    fn ser(&self, writer: &mut dyn BitWrite) {
        let mut value = self.value;
        loop {
            let proceed = value >= (1u64 << BITS);
            writer.write_bit(proceed);
            for _ in 0..BITS {
                writer.write_bit(value & 1 != 0);
                value >>= 1;
            }
            if !proceed {
                return;
            }
        }
    }

    fn de(reader: &mut BitReader) -> Result<Self, SerdeErr> {
        let mut value: u64 = 0;
        let mut shift: u32 = 0;
        loop {
            let proceed = reader.read_bit()?;
            for _ in 0..BITS {
                let bit = reader.read_bit()?;
                if bit {
                    if shift >= 64 {
                        return Err(SerdeErr::ValueOutOfRange);
                    }
                    value |= 1u64 << shift;
                }
                shift += 1;
            }
            if !proceed {
                return Ok(Self { value });
            }
            if shift >= 64 {
                return Err(SerdeErr::ValueOutOfRange);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::UnsignedVariableInteger;
    use crate::{BitReader, BitWriter, Serde};

    fn round_trip<const BITS: u8>(value: u64) {
        let mut writer = BitWriter::new();
        UnsignedVariableInteger::<BITS>::new(value).ser(&mut writer);
        let bytes = writer.to_bytes();
        let mut reader = BitReader::new(&bytes);
        let decoded = UnsignedVariableInteger::<BITS>::de(&mut reader).unwrap();
        assert_eq!(decoded.get(), value);
    }

    #[test]
    fn round_trips_group_boundaries() {
        for value in [0, 1, 7, 8, 63, 64, 127, 128, 300, u32::MAX as u64] {
            round_trip::<3>(value);
            round_trip::<7>(value);
        }
    }

    #[test]
    fn small_values_stay_small() {
        let mut writer = BitWriter::new();
        UnsignedVariableInteger::<7>::new(5u8).ser(&mut writer);
        assert_eq!(writer.bit_count(), 8);
    }
}
