//! LEB128-style variable-length 32-bit integers.
//!
//! Seven data bits per byte, least-significant group first, continuation in
//! the high bit. Negative values are written as their two's-complement bit
//! pattern, so they always take five bytes; `-1` doubles as the end-of-stream
//! and null-string sentinel.

use std::io::{Read, Write};

use crate::error::CodecError;

/// Longest encoding of a 32-bit value
pub const MAX_VARINT_LEN: usize = 5;

/// Number of bytes `value` occupies on the wire
pub fn encoded_len(value: i32) -> usize {
    let mut v = value as u32;
    let mut len = 1;
    while v >= 0x80 {
        v >>= 7;
        len += 1;
    }
    len
}

/// Append `value` to `out`
pub fn write_varint<W: Write + ?Sized>(out: &mut W, value: i32) -> std::io::Result<()> {
    let mut buf = [0u8; MAX_VARINT_LEN];
    let mut v = value as u32;
    let mut i = 0;
    while v >= 0x80 {
        buf[i] = (v as u8 & 0x7f) | 0x80;
        v >>= 7;
        i += 1;
    }
    buf[i] = v as u8;
    out.write_all(&buf[..=i])
}

/// Read one varint; running out of input is [`CodecError::Truncated`]
pub fn read_varint<R: Read + ?Sized>(input: &mut R) -> Result<i32, CodecError> {
    let mut result: u32 = 0;
    for i in 0..MAX_VARINT_LEN {
        let b = read_byte(input, "varint")?;
        // the fifth group only contributes its low four bits
        result |= ((b & 0x7f) as u32) << (7 * i);
        if b & 0x80 == 0 {
            return Ok(result as i32);
        }
    }
    Err(CodecError::MalformedVarint)
}

/// Read a single byte, mapping end-of-input to [`CodecError::Truncated`]
pub(crate) fn read_byte<R: Read + ?Sized>(
    input: &mut R,
    context: &'static str,
) -> Result<u8, CodecError> {
    let mut b = [0u8; 1];
    match input.read_exact(&mut b) {
        Ok(()) => Ok(b[0]),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            Err(CodecError::Truncated { context })
        }
        Err(e) => Err(CodecError::Io(e)),
    }
}
