//! Bounds-checked cursor over a binlog event payload
//!
//! Every read checks the remaining length first, so a corrupt length field
//! surfaces as [`DecodeError::Truncated`] instead of a panic.

use bytes::Buf;

use crate::error::{DecodeError, Result};

/// Cursor over a borrowed event payload.
#[derive(Debug, Clone)]
pub struct EventReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> EventReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes consumed so far
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn need(&self, n: usize) -> Result<()> {
        if self.remaining() < n {
            return Err(DecodeError::Truncated {
                needed: n,
                offset: self.pos,
                remaining: self.remaining(),
            });
        }
        Ok(())
    }

    /// Borrow the next `n` bytes and advance past them.
    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        self.need(n)?;
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.bytes(n).map(|_| ())
    }

    /// Everything left in the payload.
    pub fn rest(&mut self) -> &'a [u8] {
        let slice = &self.buf[self.pos..];
        self.pos = self.buf.len();
        slice
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.bytes(1)?[0])
    }

    pub fn u16_le(&mut self) -> Result<u16> {
        let mut b = self.bytes(2)?;
        Ok(b.get_u16_le())
    }

    pub fn u32_le(&mut self) -> Result<u32> {
        let mut b = self.bytes(4)?;
        Ok(b.get_u32_le())
    }

    pub fn u64_le(&mut self) -> Result<u64> {
        let mut b = self.bytes(8)?;
        Ok(b.get_u64_le())
    }

    /// Unsigned little-endian integer of `width` bytes (1..=8).
    pub fn uint_le(&mut self, width: usize) -> Result<u64> {
        let mut b = self.bytes(width)?;
        Ok(b.get_uint_le(width))
    }

    /// Unsigned big-endian integer of `width` bytes (1..=8).
    pub fn uint_be(&mut self, width: usize) -> Result<u64> {
        let mut b = self.bytes(width)?;
        Ok(b.get_uint(width))
    }

    /// 6-byte table identifier used by table map and rows events
    pub fn table_id(&mut self) -> Result<u64> {
        self.uint_le(6)
    }

    /// Length-coded ("packed") integer.
    pub fn packed_int(&mut self) -> Result<u64> {
        let first = self.u8()?;
        match first {
            0..=250 => Ok(first as u64),
            252 => self.uint_le(2),
            253 => self.uint_le(3),
            254 => self.uint_le(8),
            other => Err(DecodeError::InvalidPackedInt(other)),
        }
    }

    /// Length-prefixed string with a one-byte length followed by a NUL pad.
    pub fn short_name(&mut self) -> Result<String> {
        let len = self.u8()? as usize;
        let name = String::from_utf8_lossy(self.bytes(len)?).into_owned();
        self.skip(1)?;
        Ok(name)
    }
}

/// Test whether bit `idx` is set in a little-endian bitmap.
pub fn is_bit_set(bitmap: &[u8], idx: usize) -> bool {
    let byte_idx = idx / 8;
    let bit_idx = idx % 8;
    byte_idx < bitmap.len() && (bitmap[byte_idx] & (1 << bit_idx)) != 0
}
