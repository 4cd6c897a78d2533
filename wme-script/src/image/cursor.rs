use byteorder::{ByteOrder, LittleEndian};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CursorError {
    #[error("unexpected end of data at offset 0x{offset:X} (wanted {wanted} bytes)")]
    Truncated { offset: usize, wanted: usize },

    #[error("unterminated string at offset 0x{offset:X}")]
    UnterminatedString { offset: usize },
}

/// Bounds-checked little-endian reader over a script image.
#[derive(Debug, Clone)]
pub struct ByteCursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    pub fn at(bytes: &'a [u8], pos: usize) -> Self {
        Self { bytes, pos }
    }

    #[inline]
    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn seek(&mut self, pos: usize) {
        self.pos = pos;
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len().saturating_sub(self.pos)
    }

    fn take(&mut self, wanted: usize) -> Result<&'a [u8], CursorError> {
        let end = self
            .pos
            .checked_add(wanted)
            .filter(|&end| end <= self.bytes.len())
            .ok_or(CursorError::Truncated { offset: self.pos, wanted })?;
        let out = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    pub fn read_u32(&mut self) -> Result<u32, CursorError> {
        Ok(LittleEndian::read_u32(self.take(4)?))
    }

    pub fn read_i32(&mut self) -> Result<i32, CursorError> {
        Ok(LittleEndian::read_i32(self.take(4)?))
    }

    pub fn read_f64(&mut self) -> Result<f64, CursorError> {
        Ok(LittleEndian::read_f64(self.take(8)?))
    }

    /// Bytes up to the next NUL; the cursor moves past the NUL.
    pub fn read_cstring(&mut self) -> Result<&'a [u8], CursorError> {
        let rest = self.bytes.get(self.pos..).unwrap_or_default();
        let len = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(CursorError::UnterminatedString { offset: self.pos })?;
        let out = &rest[..len];
        self.pos += len + 1;
        Ok(out)
    }
}
