/// Sink for individual bits. Implemented by [`BitWriter`] for real encoding
/// and by [`BitCounter`] for measuring the size of a would-be encoding.
pub trait BitWrite {
    fn write_bit(&mut self, bit: bool);

    fn write_byte(&mut self, mut byte: u8) {
        for _ in 0..8 {
            self.write_bit(byte & 1 != 0);
            byte >>= 1;
        }
    }

    fn write_bytes(&mut self, bytes: &[u8]) {
        for byte in bytes {
            self.write_byte(*byte);
        }
    }
}

/// Accumulates bits into a byte buffer, least-significant bit of each byte
/// first. The final partial byte is zero-padded by [`BitWriter::to_bytes`].
pub struct BitWriter {
    buffer: Vec<u8>,
    scratch: u8,
    scratch_index: u8,
    bit_count: usize,
}

impl BitWriter {
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            scratch: 0,
            scratch_index: 0,
            bit_count: 0,
        }
    }

    /// Number of bits written so far.
    pub fn bit_count(&self) -> usize {
        self.bit_count
    }

    /// Consumes the writer, flushing the partial scratch byte.
    pub fn to_bytes(mut self) -> Box<[u8]> {
        if self.scratch_index > 0 {
            self.buffer.push(self.scratch);
        }
        self.buffer.into_boxed_slice()
    }
}

impl Default for BitWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl BitWrite for BitWriter {
    fn write_bit(&mut self, bit: bool) {
        if bit {
            self.scratch |= 1 << self.scratch_index;
        }
        self.scratch_index += 1;
        self.bit_count += 1;
        if self.scratch_index == 8 {
            self.buffer.push(self.scratch);
            self.scratch = 0;
            self.scratch_index = 0;
        }
    }
}

/// Counts bits without storing them. Used to compare candidate encodings
/// before committing one to the wire.
pub struct BitCounter {
    count: usize,
}

impl BitCounter {
    pub fn new() -> Self {
        Self { count: 0 }
    }

    pub fn bit_count(&self) -> usize {
        self.count
    }
}

impl Default for BitCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl BitWrite for BitCounter {
    fn write_bit(&mut self, _: bool) {
        self.count += 1;
    }

    fn write_byte(&mut self, _: u8) {
        self.count += 8;
    }
}

#[cfg(test)]
mod tests {
    use super::{BitWrite, BitWriter};

    #[test]
    fn partial_byte_is_flushed() {
        let mut writer = BitWriter::new();
        writer.write_bit(true);
        writer.write_bit(false);
        writer.write_bit(true);
        let bytes = writer.to_bytes();
        assert_eq!(bytes.as_ref(), &[0b101]);
    }

    #[test]
    fn bytes_cross_bit_boundaries() {
        let mut writer = BitWriter::new();
        writer.write_bit(true);
        writer.write_byte(0xFF);
        assert_eq!(writer.bit_count(), 9);
        let bytes = writer.to_bytes();
        assert_eq!(bytes.len(), 2);
        assert_eq!(bytes[0], 0xFF);
        assert_eq!(bytes[1], 0x01);
    }
}
