//! Protobuf binary wire format.
//!
//! Every record is a varint tag `(field_number << 3) | wire_type` followed by
//! a payload whose shape the wire type determines:
//!
//! ```text
//! Varint     (0)  base-128 varint, at most 10 bytes
//! Fixed64    (1)  8 bytes little-endian
//! Delimited  (2)  varint length, then that many bytes
//! StartGroup (3)  records up to the matching EndGroup tag
//! EndGroup   (4)  no payload
//! Fixed32    (5)  4 bytes little-endian
//! ```
//!
//! The decoder and encoder share one traversal: walk a message's
//! [`crate::layout::MessageLayout`], recurse into submessages, and keep
//! anything the layout does not describe in the unknown-field buffer.

mod decode;
mod encode;
pub mod varint;

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

pub use decode::{decode, decode_into, decode_with};
pub use encode::{encode, encode_with};

/// Low three bits of a tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(u8)]
pub enum WireType {
    /// Base-128 varint
    Varint = 0,
    /// Eight little-endian bytes
    Fixed64 = 1,
    /// Length-prefixed bytes
    Delimited = 2,
    /// Opens a group
    StartGroup = 3,
    /// Closes a group
    EndGroup = 4,
    /// Four little-endian bytes
    Fixed32 = 5,
}

impl WireType {
    /// Parse the three-bit wire type; 6 and 7 are invalid.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => Self::Varint,
            1 => Self::Fixed64,
            2 => Self::Delimited,
            3 => Self::StartGroup,
            4 => Self::EndGroup,
            5 => Self::Fixed32,
            _ => return None,
        })
    }

    /// Numeric value.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Payload size for the fixed-width types.
    #[must_use]
    pub const fn fixed_size(self) -> Option<usize> {
        match self {
            Self::Fixed32 => Some(4),
            Self::Fixed64 => Some(8),
            _ => None,
        }
    }
}

impl fmt::Display for WireType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Varint => "varint",
            Self::Fixed64 => "fixed64",
            Self::Delimited => "delimited",
            Self::StartGroup => "start-group",
            Self::EndGroup => "end-group",
            Self::Fixed32 => "fixed32",
        };
        write!(f, "{name}")
    }
}

/// Tag value for `number` and `wire_type`.
#[must_use]
pub const fn make_tag(number: u32, wire_type: WireType) -> u32 {
    (number << 3) | wire_type as u32
}
