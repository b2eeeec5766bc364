use crate::error::{Result, TsError};

/// Bounds-checked big-endian cursor over a byte slice.
///
/// Every read either succeeds completely or fails with
/// [`TsError::InvalidData`] and leaves the cursor where it was.
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// The unread tail.
    pub fn rest(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.remaining() {
            return Err(TsError::InvalidData(format!(
                "read of {} bytes at offset {} past end of {}-byte buffer",
                n,
                self.pos,
                self.data.len()
            )));
        }
        let bytes = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.read_bytes(n).map(|_| ())
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let b = self.read_bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn read_u24(&mut self) -> Result<u32> {
        let b = self.read_bytes(3)?;
        Ok(u32::from_be_bytes([0, b[0], b[1], b[2]]))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let b = self.read_bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Reads a four-character code such as a registration format identifier.
    pub fn read_fourcc(&mut self) -> Result<[u8; 4]> {
        let b = self.read_bytes(4)?;
        Ok([b[0], b[1], b[2], b[3]])
    }

    /// Reads a string prefixed by an 8-bit length.
    pub fn read_str8(&mut self) -> Result<&'a [u8]> {
        let start = self.pos;
        let len = self.read_u8()? as usize;
        match self.read_bytes(len) {
            Ok(bytes) => Ok(bytes),
            Err(e) => {
                self.pos = start;
                Err(e)
            }
        }
    }

    /// Splits off a sub-reader over the next `n` bytes and advances past them.
    pub fn sub_reader(&mut self, n: usize) -> Result<ByteReader<'a>> {
        Ok(ByteReader::new(self.read_bytes(n)?))
    }
}
