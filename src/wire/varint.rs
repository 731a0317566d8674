//! Varint, tag and zigzag primitives.

use bytes::BufMut;

use super::WireType;
use crate::error::WireError;

/// Longest valid varint.
pub const MAX_VARINT_LEN: usize = 10;

/// Longest valid tag.
pub const MAX_TAG_LEN: usize = 5;

/// Append `value` as a base-128 varint.
#[inline]
pub fn encode_varint(mut value: u64, buf: &mut impl BufMut) {
    while value >= 0x80 {
        buf.put_u8((value as u8) | 0x80);
        value >>= 7;
    }
    buf.put_u8(value as u8);
}

/// Bytes [`encode_varint`] writes for `value`.
#[inline]
#[must_use]
pub const fn varint_len(value: u64) -> usize {
    let bits = 64 - (value | 1).leading_zeros() as usize;
    bits.div_ceil(7)
}

/// Decode a varint from the front of `buf`, returning value and length.
///
/// Bits past the 64th in a tenth byte are dropped, matching what other
/// protobuf runtimes accept.
#[inline]
pub fn decode_varint(buf: &[u8]) -> Result<(u64, usize), WireError> {
    let mut value = 0u64;
    for (i, &byte) in buf.iter().take(MAX_VARINT_LEN).enumerate() {
        value |= u64::from(byte & 0x7F) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }
    if buf.len() >= MAX_VARINT_LEN {
        Err(WireError::VarintTooLong)
    } else {
        Err(WireError::TruncatedVarint)
    }
}

/// Decode a tag, returning field number, wire type and length.
///
/// Tags must fit in 32 bits and at most five bytes. Field number zero and
/// wire types 6 and 7 are rejected here.
#[inline]
pub fn decode_tag(buf: &[u8]) -> Result<(u32, WireType, usize), WireError> {
    let mut value = 0u32;
    for (i, &byte) in buf.iter().take(MAX_TAG_LEN).enumerate() {
        if i == MAX_TAG_LEN - 1 && byte > 0x0F {
            return Err(WireError::TagOverflow);
        }
        value |= u32::from(byte & 0x7F) << (7 * i);
        if byte & 0x80 == 0 {
            let raw_type = (value & 0x7) as u8;
            let wire_type =
                WireType::from_u8(raw_type).ok_or(WireError::InvalidWireType(raw_type))?;
            let number = value >> 3;
            if number == 0 {
                return Err(WireError::FieldNumberZero);
            }
            return Ok((number, wire_type, i + 1));
        }
    }
    if buf.len() >= MAX_TAG_LEN {
        Err(WireError::TagOverflow)
    } else {
        Err(WireError::TruncatedVarint)
    }
}

/// Append a tag.
#[inline]
pub fn encode_tag(number: u32, wire_type: WireType, buf: &mut impl BufMut) {
    encode_varint(u64::from(super::make_tag(number, wire_type)), buf);
}

/// Zigzag-encode a 32-bit signed value.
#[inline]
#[must_use]
pub const fn encode_zigzag32(value: i32) -> u32 {
    ((value << 1) ^ (value >> 31)) as u32
}

/// Inverse of [`encode_zigzag32`].
#[inline]
#[must_use]
pub const fn decode_zigzag32(value: u32) -> i32 {
    ((value >> 1) as i32) ^ -((value & 1) as i32)
}

/// Zigzag-encode a 64-bit signed value.
#[inline]
#[must_use]
pub const fn encode_zigzag64(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

/// Inverse of [`encode_zigzag64`].
#[inline]
#[must_use]
pub const fn decode_zigzag64(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}
