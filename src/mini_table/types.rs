//! Field descriptors.

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use super::MiniTableRef;
use crate::wire::WireType;

/// Declared type of a field, numbered like `FieldDescriptorProto.Type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[repr(u8)]
pub enum FieldType {
    /// 64-bit IEEE float, fixed64 on the wire
    Double = 1,
    /// 32-bit IEEE float, fixed32 on the wire
    Float = 2,
    /// Signed 64-bit varint
    Int64 = 3,
    /// Unsigned 64-bit varint
    UInt64 = 4,
    /// Signed 32-bit varint (negative values use 10 bytes)
    Int32 = 5,
    /// Unsigned 64-bit fixed-width
    Fixed64 = 6,
    /// Unsigned 32-bit fixed-width
    Fixed32 = 7,
    /// Boolean varint
    Bool = 8,
    /// UTF-8 text
    String = 9,
    /// Embedded message
    Message = 11,
    /// Opaque bytes
    Bytes = 12,
    /// Unsigned 32-bit varint
    UInt32 = 13,
    /// Enum value, stored as `int32`
    Enum = 14,
    /// Signed 32-bit fixed-width
    SFixed32 = 15,
    /// Signed 64-bit fixed-width
    SFixed64 = 16,
    /// Zigzag-encoded signed 32-bit varint
    SInt32 = 17,
    /// Zigzag-encoded signed 64-bit varint
    SInt64 = 18,
}

impl FieldType {
    /// Convert from the descriptor number.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            1 => Self::Double,
            2 => Self::Float,
            3 => Self::Int64,
            4 => Self::UInt64,
            5 => Self::Int32,
            6 => Self::Fixed64,
            7 => Self::Fixed32,
            8 => Self::Bool,
            9 => Self::String,
            11 => Self::Message,
            12 => Self::Bytes,
            13 => Self::UInt32,
            14 => Self::Enum,
            15 => Self::SFixed32,
            16 => Self::SFixed64,
            17 => Self::SInt32,
            18 => Self::SInt64,
            _ => return None,
        })
    }

    /// Descriptor number.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Wire type of a single, unpacked value.
    #[must_use]
    pub const fn wire_type(self) -> WireType {
        match self {
            Self::Double | Self::Fixed64 | Self::SFixed64 => WireType::Fixed64,
            Self::Float | Self::Fixed32 | Self::SFixed32 => WireType::Fixed32,
            Self::String | Self::Bytes | Self::Message => WireType::Delimited,
            Self::Int64
            | Self::UInt64
            | Self::Int32
            | Self::Bool
            | Self::UInt32
            | Self::Enum
            | Self::SInt32
            | Self::SInt64 => WireType::Varint,
        }
    }

    /// Whether repeated values of this type may use the packed encoding.
    #[must_use]
    pub const fn is_packable(self) -> bool {
        !matches!(self, Self::String | Self::Bytes | Self::Message)
    }

    /// Whether values are string views (string or bytes).
    #[must_use]
    pub const fn is_string_like(self) -> bool {
        matches!(self, Self::String | Self::Bytes)
    }

    /// In-memory size of one scalar value, `None` for pointer-backed types.
    #[must_use]
    pub const fn scalar_size(self) -> Option<usize> {
        match self {
            Self::Bool => Some(1),
            Self::Float
            | Self::Int32
            | Self::Fixed32
            | Self::UInt32
            | Self::Enum
            | Self::SFixed32
            | Self::SInt32 => Some(4),
            Self::Double
            | Self::Int64
            | Self::UInt64
            | Self::Fixed64
            | Self::SFixed64
            | Self::SInt64 => Some(8),
            Self::String | Self::Bytes | Self::Message => None,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Double => "double",
            Self::Float => "float",
            Self::Int64 => "int64",
            Self::UInt64 => "uint64",
            Self::Int32 => "int32",
            Self::Fixed64 => "fixed64",
            Self::Fixed32 => "fixed32",
            Self::Bool => "bool",
            Self::String => "string",
            Self::Message => "message",
            Self::Bytes => "bytes",
            Self::UInt32 => "uint32",
            Self::Enum => "enum",
            Self::SFixed32 => "sfixed32",
            Self::SFixed64 => "sfixed64",
            Self::SInt32 => "sint32",
            Self::SInt64 => "sint64",
        };
        write!(f, "{name}")
    }
}

/// Field cardinality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Label {
    /// At most one value
    #[default]
    Singular,
    /// Zero or more values
    Repeated {
        /// Encode as a single packed length-delimited record
        packed: bool,
    },
}

impl Label {
    /// Whether this is a repeated field.
    #[must_use]
    pub const fn is_repeated(self) -> bool {
        matches!(self, Self::Repeated { .. })
    }
}

/// One field of a [`super::MiniTable`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MiniTableField {
    /// Wire field number
    pub number: u32,
    /// Declared type
    pub field_type: FieldType,
    /// Cardinality
    pub label: Label,
    /// Hasbit index for fields with explicit presence
    pub presence: Option<u16>,
    /// Oneof index; members of one oneof share a single case slot
    #[cfg_attr(feature = "serde", serde(default))]
    pub oneof: Option<u16>,
    /// Table of the embedded message type
    pub submsg: Option<MiniTableRef>,
}

impl MiniTableField {
    /// Singular field with implicit presence.
    #[must_use]
    pub const fn scalar(number: u32, field_type: FieldType) -> Self {
        Self {
            number,
            field_type,
            label: Label::Singular,
            presence: None,
            oneof: None,
            submsg: None,
        }
    }

    /// Singular field with explicit presence tracked by `hasbit`.
    #[must_use]
    pub const fn optional(number: u32, field_type: FieldType, hasbit: u16) -> Self {
        Self {
            presence: Some(hasbit),
            ..Self::scalar(number, field_type)
        }
    }

    /// Unpacked repeated field.
    #[must_use]
    pub const fn repeated(number: u32, field_type: FieldType) -> Self {
        Self {
            label: Label::Repeated { packed: false },
            ..Self::scalar(number, field_type)
        }
    }

    /// Packed repeated field.
    #[must_use]
    pub const fn packed(number: u32, field_type: FieldType) -> Self {
        Self {
            label: Label::Repeated { packed: true },
            ..Self::scalar(number, field_type)
        }
    }

    /// Singular embedded message.
    #[must_use]
    pub const fn message(number: u32, submsg: MiniTableRef) -> Self {
        Self {
            submsg: Some(submsg),
            ..Self::scalar(number, FieldType::Message)
        }
    }

    /// Repeated embedded message.
    #[must_use]
    pub const fn repeated_message(number: u32, submsg: MiniTableRef) -> Self {
        Self {
            submsg: Some(submsg),
            ..Self::repeated(number, FieldType::Message)
        }
    }

    /// Attach a hasbit to an existing descriptor.
    #[must_use]
    pub const fn with_presence(mut self, hasbit: u16) -> Self {
        self.presence = Some(hasbit);
        self
    }

    /// Make the field a member of oneof `oneof`. At most one member is set
    /// at a time and presence is read from the oneof's case slot.
    #[must_use]
    pub const fn with_oneof(mut self, oneof: u16) -> Self {
        self.oneof = Some(oneof);
        self
    }
}
