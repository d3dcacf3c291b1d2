//! Variable-length integer encoding.
//!
//! Slic uses the QUIC varint layout: the two high bits of the first byte
//! select a 1, 2, 4 or 8 byte encoding, leaving 6, 14, 30 or 62 bits of
//! magnitude. Stream IDs, frame sizes and parameter values all use it.

use bytes::{Buf, BufMut};

use crate::error::{Error, Result};

/// Maximum value that can be encoded (2^62 - 1)
pub const MAX: u64 = (1u64 << 62) - 1;

/// Decode a variable-length integer from a byte slice.
///
/// Returns the decoded value and the number of bytes consumed.
///
/// # Errors
///
/// Returns [`Error::Truncated`] if the slice is shorter than the encoding
/// announced by the first byte.
pub fn decode(data: &[u8]) -> Result<(u64, usize)> {
    let first = *data.first().ok_or(Error::Truncated { needed: 1 })?;
    let len = 1usize << (first >> 6);
    if data.len() < len {
        return Err(Error::Truncated {
            needed: len - data.len(),
        });
    }

    let mut value = (first & 0x3f) as u64;
    for byte in &data[1..len] {
        value = (value << 8) | *byte as u64;
    }
    Ok((value, len))
}

/// Encode a variable-length integer into a byte slice.
///
/// Returns the number of bytes written.
///
/// # Errors
///
/// Returns error if the value exceeds MAX or the slice is too small.
pub fn encode(value: u64, buf: &mut [u8]) -> Result<usize> {
    if value > MAX {
        return Err(Error::VarIntOutOfRange(value));
    }
    let len = encoded_len(value);
    if buf.len() < len {
        return Err(Error::Truncated {
            needed: len - buf.len(),
        });
    }

    let tag: u8 = match len {
        1 => 0x00,
        2 => 0x40,
        4 => 0x80,
        _ => 0xc0,
    };
    for (i, byte) in buf[..len].iter_mut().enumerate() {
        *byte = (value >> (8 * (len - 1 - i))) as u8;
    }
    buf[0] |= tag;
    Ok(len)
}

/// Decode a variable-length integer from a buffer that implements Buf.
///
/// Advances the buffer past the integer. On error the buffer is untouched.
pub fn decode_buf<B: Buf>(buf: &mut B) -> Result<u64> {
    if !buf.has_remaining() {
        return Err(Error::Truncated { needed: 1 });
    }

    let len = 1usize << (buf.chunk()[0] >> 6);
    if buf.remaining() < len {
        return Err(Error::Truncated {
            needed: len - buf.remaining(),
        });
    }

    // A varint may straddle chunks of a non-contiguous buffer.
    let mut temp = [0u8; 8];
    buf.copy_to_slice(&mut temp[..len]);
    decode(&temp[..len]).map(|(value, _)| value)
}

/// Encode a variable-length integer into a buffer that implements BufMut.
pub fn encode_buf<B: BufMut>(value: u64, buf: &mut B) -> Result<usize> {
    let mut temp = [0u8; 8];
    let written = encode(value, &mut temp)?;
    buf.put_slice(&temp[..written]);
    Ok(written)
}

/// Calculate the encoded length of a varint without encoding it.
pub fn encoded_len(value: u64) -> usize {
    if value < 64 {
        1
    } else if value < 16384 {
        2
    } else if value < 1073741824 {
        4
    } else {
        8
    }
}
