//! Primitive encodings shared by every block
//!
//! # Binary Format
//!
//! All integers are little-endian. Lengths and counts are 4 bytes.
//! Strings are length-prefixed (4-byte length + UTF-8 bytes).
//! Booleans and tags are single bytes.

use crate::error::{CacheError, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

/// Write a length or count
pub(crate) fn write_len(out: &mut Vec<u8>, len: usize) -> Result<()> {
    let len = u32::try_from(len)
        .map_err(|_| CacheError::Corrupted(format!("length {} does not fit in 4 bytes", len)))?;
    out.write_u32::<LittleEndian>(len)?;
    Ok(())
}

/// Write a length-prefixed string
pub(crate) fn write_str(out: &mut Vec<u8>, s: &str) -> Result<()> {
    write_len(out, s.len())?;
    out.extend_from_slice(s.as_bytes());
    Ok(())
}

/// Write length-prefixed raw bytes
pub(crate) fn write_bytes(out: &mut Vec<u8>, bytes: &[u8]) -> Result<()> {
    write_len(out, bytes.len())?;
    out.extend_from_slice(bytes);
    Ok(())
}

pub(crate) fn write_u8(out: &mut Vec<u8>, value: u8) -> Result<()> {
    out.write_u8(value)?;
    Ok(())
}

pub(crate) fn write_u32(out: &mut Vec<u8>, value: u32) -> Result<()> {
    out.write_u32::<LittleEndian>(value)?;
    Ok(())
}

pub(crate) fn write_i64(out: &mut Vec<u8>, value: i64) -> Result<()> {
    out.write_i64::<LittleEndian>(value)?;
    Ok(())
}

pub(crate) fn write_bool(out: &mut Vec<u8>, value: bool) -> Result<()> {
    write_u8(out, u8::from(value))
}

/// Bounds-checked reader over an in-memory buffer
///
/// Every read names what it was reading, so a short buffer surfaces as
/// `CacheError::Truncated` with a useful context.
pub(crate) struct ByteReader<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl<'a> ByteReader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        ByteReader {
            cursor: Cursor::new(data),
        }
    }

    pub(crate) fn position(&self) -> usize {
        self.cursor.position() as usize
    }

    pub(crate) fn remaining(&self) -> usize {
        self.cursor.get_ref().len().saturating_sub(self.position())
    }

    pub(crate) fn read_u8(&mut self, context: &'static str) -> Result<u8> {
        self.cursor
            .read_u8()
            .map_err(|e| CacheError::from_read(e, context))
    }

    pub(crate) fn read_u32(&mut self, context: &'static str) -> Result<u32> {
        self.cursor
            .read_u32::<LittleEndian>()
            .map_err(|e| CacheError::from_read(e, context))
    }

    pub(crate) fn read_i64(&mut self, context: &'static str) -> Result<i64> {
        self.cursor
            .read_i64::<LittleEndian>()
            .map_err(|e| CacheError::from_read(e, context))
    }

    pub(crate) fn read_bool(&mut self, context: &'static str) -> Result<bool> {
        match self.read_u8(context)? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(CacheError::Corrupted(format!(
                "invalid boolean {} in {}",
                other, context
            ))),
        }
    }

    /// Read an element count
    ///
    /// Every element takes at least one byte, so a count larger than what
    /// is left can only come from a cut or corrupted buffer.
    pub(crate) fn read_count(&mut self, context: &'static str) -> Result<usize> {
        let count = self.read_u32(context)? as usize;
        if count > self.remaining() {
            return Err(CacheError::Truncated(context));
        }
        Ok(count)
    }

    pub(crate) fn read_slice(&mut self, len: usize, context: &'static str) -> Result<&'a [u8]> {
        if len > self.remaining() {
            return Err(CacheError::Truncated(context));
        }
        let data: &'a [u8] = *self.cursor.get_ref();
        let start = self.position();
        self.cursor.set_position((start + len) as u64);
        Ok(&data[start..start + len])
    }

    pub(crate) fn read_bytes(&mut self, context: &'static str) -> Result<&'a [u8]> {
        let len = self.read_u32(context)? as usize;
        self.read_slice(len, context)
    }

    pub(crate) fn read_str(&mut self, context: &'static str) -> Result<String> {
        let bytes = self.read_bytes(context)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| CacheError::Corrupted(format!("invalid UTF-8 in {}", context)))
    }

    /// Fail unless every byte was consumed
    pub(crate) fn expect_end(&self, context: &'static str) -> Result<()> {
        match self.remaining() {
            0 => Ok(()),
            left => Err(CacheError::Corrupted(format!(
                "{} trailing bytes after {}",
                left, context
            ))),
        }
    }
}
