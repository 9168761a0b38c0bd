//! Bounds-checked little-endian reader over a received attribute value.
//!
//! Every read returns [`BrokerError::ResponseMalformed`] instead of
//! panicking when the value is shorter than the fields it claims to carry.

use crate::error::{BrokerError, Result};

pub struct ByteReader<'d> {
    buf: &'d [u8],
    pos: usize,
}

impl<'d> ByteReader<'d> {
    pub fn new(buf: &'d [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let b = *self.buf.get(self.pos).ok_or(BrokerError::ResponseMalformed)?;
        self.pos += 1;
        Ok(b)
    }

    pub fn read_u16_le(&mut self) -> Result<u16> {
        let s = self.read_slice(2)?;
        Ok(u16::from_le_bytes([s[0], s[1]]))
    }

    pub fn read_i16_le(&mut self) -> Result<i16> {
        self.read_u16_le().map(|v| v as i16)
    }

    pub fn read_u32_le(&mut self) -> Result<u32> {
        let s = self.read_slice(4)?;
        Ok(u32::from_le_bytes([s[0], s[1], s[2], s[3]]))
    }

    pub fn read_slice(&mut self, n: usize) -> Result<&'d [u8]> {
        let end = self.pos.checked_add(n).ok_or(BrokerError::ResponseMalformed)?;
        let data = self.buf.get(self.pos..end).ok_or(BrokerError::ResponseMalformed)?;
        self.pos = end;
        Ok(data)
    }

    /// Everything not yet read.
    pub fn consume(self) -> &'d [u8] {
        &self.buf[self.pos.min(self.buf.len())..]
    }

    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }
}
