use crate::error::{Result, TsError};

/// A bit-level reader for parsing binary data streams.
///
/// Used for the packed fields of MPEG-4 SL headers and SL config
/// descriptors, where field widths are only known at runtime.
///
/// Example:
/// ```
/// use tsdemux::utils::BitReader;
///
/// let data = [0b10110011];
/// let mut reader = BitReader::new(&data);
///
/// assert_eq!(reader.read_bit().unwrap(), true);   // 1
/// assert_eq!(reader.read_bits(3).unwrap(), 0b011); // 011
/// ```
pub struct BitReader<'a> {
    data: &'a [u8],
    byte_offset: usize,
    bit_offset: u8,
}

impl<'a> BitReader<'a> {
    /// Creates a new BitReader from a byte slice
    pub fn new(data: &'a [u8]) -> Self {
        BitReader {
            data,
            byte_offset: 0,
            bit_offset: 0,
        }
    }

    /// Reads a single bit from the stream.
    /// Returns true for 1, false for 0.
    ///
    /// Returns error if end of data is reached.
    pub fn read_bit(&mut self) -> Result<bool> {
        if self.byte_offset >= self.data.len() {
            return Err(TsError::InvalidData("bit reader reached end of data".into()));
        }

        let bit = (self.data[self.byte_offset] >> (7 - self.bit_offset)) & 1;
        self.bit_offset += 1;

        if self.bit_offset == 8 {
            self.bit_offset = 0;
            self.byte_offset += 1;
        }

        Ok(bit == 1)
    }

    /// Reads n bits and returns them as a number.
    /// The bits are interpreted as big-endian.
    ///
    /// Returns error if n > 32 or end of data is reached.
    pub fn read_bits(&mut self, n: u32) -> Result<u32> {
        if n > 32 {
            return Err(TsError::InvalidData("too many bits requested".into()));
        }
        Ok(self.read_bits_u64(n)? as u32)
    }

    /// Reads up to 64 bits, big-endian.
    pub fn read_bits_u64(&mut self, n: u32) -> Result<u64> {
        if n > 64 {
            return Err(TsError::InvalidData("too many bits requested".into()));
        }
        if n as usize > self.available_bits() {
            return Err(TsError::InvalidData("bit reader reached end of data".into()));
        }

        let mut value = 0u64;
        for _ in 0..n {
            value = (value << 1) | self.read_bit()? as u64;
        }
        Ok(value)
    }

    /// Skips n bits in the stream.
    pub fn skip_bits(&mut self, n: u32) -> Result<()> {
        if n as usize > self.available_bits() {
            return Err(TsError::InvalidData("bit reader reached end of data".into()));
        }
        let total = self.bit_offset as usize + n as usize;
        self.byte_offset += total / 8;
        self.bit_offset = (total % 8) as u8;
        Ok(())
    }

    /// Returns number of bits available to read.
    pub fn available_bits(&self) -> usize {
        (self.data.len() - self.byte_offset) * 8 - self.bit_offset as usize
    }

    /// Number of bits consumed so far.
    pub fn bits_read(&self) -> usize {
        self.byte_offset * 8 + self.bit_offset as usize
    }

    /// Number of whole or partial bytes touched so far.
    pub fn bytes_touched(&self) -> usize {
        self.bits_read().div_ceil(8)
    }
}
