use crate::error::SerdeErr;

/// Reads bits back out of a byte buffer in the order [`BitWriter`] wrote
/// them. Every read is bounds-checked; running off the end of the buffer
/// yields [`SerdeErr::EndOfStream`], never a panic.
///
/// [`BitWriter`]: crate::BitWriter
pub struct BitReader<'b> {
    buffer: &'b [u8],
    bit_index: usize,
}

impl<'b> BitReader<'b> {
    pub fn new(buffer: &'b [u8]) -> Self {
        Self {
            buffer,
            bit_index: 0,
        }
    }

    /// Number of bits consumed so far.
    pub fn bits_read(&self) -> usize {
        self.bit_index
    }

    /// Bits left in the buffer, counting the zero-padding of the last byte.
    pub fn bits_remaining(&self) -> usize {
        (self.buffer.len() * 8).saturating_sub(self.bit_index)
    }

    pub fn read_bit(&mut self) -> Result<bool, SerdeErr> {
        let byte_index = self.bit_index / 8;
        if byte_index >= self.buffer.len() {
            return Err(SerdeErr::EndOfStream {
                read_bits: self.bit_index,
            });
        }
        let bit = self.buffer[byte_index] & (1 << (self.bit_index % 8)) != 0;
        self.bit_index += 1;
        Ok(bit)
    }

    pub fn read_byte(&mut self) -> Result<u8, SerdeErr> {
        let mut byte = 0u8;
        for i in 0..8 {
            if self.read_bit()? {
                byte |= 1 << i;
            }
        }
        Ok(byte)
    }

    pub fn read_bytes(&mut self, count: usize, out: &mut Vec<u8>) -> Result<(), SerdeErr> {
        out.reserve(count);
        for _ in 0..count {
            out.push(self.read_byte()?);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::BitReader;
    use crate::{BitWrite, BitWriter, SerdeErr};

    #[test]
    fn round_trips_writer_output() {
        let mut writer = BitWriter::new();
        writer.write_bit(true);
        writer.write_byte(0xA5);
        writer.write_bit(false);
        writer.write_bit(true);
        let bytes = writer.to_bytes();

        let mut reader = BitReader::new(&bytes);
        assert!(reader.read_bit().unwrap());
        assert_eq!(reader.read_byte().unwrap(), 0xA5);
        assert!(!reader.read_bit().unwrap());
        assert!(reader.read_bit().unwrap());
    }

    #[test]
    fn overrun_is_an_error() {
        let mut reader = BitReader::new(&[0xFF]);
        for _ in 0..8 {
            reader.read_bit().unwrap();
        }
        assert_eq!(
            reader.read_bit(),
            Err(SerdeErr::EndOfStream { read_bits: 8 })
        );
    }
}
