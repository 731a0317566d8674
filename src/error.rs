//! Error types shared by the arena, layout, accessor and codec layers.

use thiserror::Error;

use crate::config::PointerWidth;
use crate::mini_table::FieldType;

/// Errors surfaced by arenapb operations.
///
/// Every variant propagates synchronously to the caller of the operation
/// that detected it. Nothing in this crate retries.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Arena could not grow to satisfy an allocation
    #[error("arena allocation of {requested} bytes failed (limit {limit} bytes)")]
    AllocationFailure {
        /// Size of the failed request
        requested: usize,
        /// Configured or address-space limit that would be exceeded
        limit: usize,
    },

    /// Decoder rejected the input buffer
    #[error("malformed wire input at byte {offset}: {kind}")]
    MalformedWireInput {
        /// Byte offset, from the start of the top-level buffer, where decoding failed
        offset: usize,
        /// What was wrong with it
        kind: WireError,
    },

    /// Message graph could not be serialized
    #[error("encode failed: {0}")]
    EncodeFailure(EncodeError),

    /// Schema metadata is inconsistent
    #[error("invalid schema: {0}")]
    InvalidSchema(SchemaError),

    /// No minitable at the requested indices
    #[error("no minitable at file {file}, message {message}")]
    UnknownMiniTable {
        /// File index
        file: u32,
        /// Message index within the file
        message: u32,
    },

    /// Field index past the end of the message's field list
    #[error("field index {index} out of range (message has {count} fields)")]
    FieldIndexOutOfRange {
        /// Requested index
        index: usize,
        /// Number of fields in the layout
        count: usize,
    },

    /// Accessor type does not match the field's declared type
    #[error("field {number} is {found:?}, accessor expects {expected}")]
    FieldTypeMismatch {
        /// Field number
        number: u32,
        /// Accessor's value kind
        expected: &'static str,
        /// Field's declared type
        found: FieldType,
    },

    /// Arena and schema were configured for different pointer widths
    #[error("pointer width mismatch: arena is {arena}, schema is {schema}")]
    PointerWidthMismatch {
        /// Arena pointer width
        arena: PointerWidth,
        /// Schema pointer width
        schema: PointerWidth,
    },

    /// String field holds bytes that are not UTF-8
    #[error("invalid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),
}

impl Error {
    /// Whether this error came from rejecting decoder input.
    #[must_use]
    pub const fn is_malformed(&self) -> bool {
        matches!(self, Self::MalformedWireInput { .. })
    }

    pub(crate) const fn malformed(offset: usize, kind: WireError) -> Self {
        Self::MalformedWireInput { offset, kind }
    }
}

/// Reasons the decoder rejects a buffer.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireError {
    /// Buffer ended inside a varint
    #[error("truncated varint")]
    TruncatedVarint,
    /// Varint longer than 10 bytes
    #[error("varint exceeds 10 bytes")]
    VarintTooLong,
    /// Tag longer than 5 bytes or larger than 32 bits
    #[error("tag does not fit in 32 bits")]
    TagOverflow,
    /// Tag carries field number zero
    #[error("field number 0 is reserved")]
    FieldNumberZero,
    /// Wire type 6 or 7
    #[error("invalid wire type {0}")]
    InvalidWireType(u8),
    /// End-group tag with no open group, or for a different field
    #[error("unmatched end-group tag for field {0}")]
    UnmatchedEndGroup(u32),
    /// Buffer ended inside a start-group/end-group pair
    #[error("unterminated group for field {0}")]
    UnterminatedGroup(u32),
    /// Length prefix runs past the enclosing buffer
    #[error("length {len} exceeds {remaining} remaining bytes")]
    LengthExceedsBuffer {
        /// Declared length
        len: u64,
        /// Bytes left in the enclosing region
        remaining: usize,
    },
    /// Buffer ended inside a fixed32/fixed64 value
    #[error("truncated fixed-width value")]
    TruncatedFixed,
    /// Packed fixed-width payload is not a multiple of the element size
    #[error("packed length {len} is not a multiple of {elem_size}")]
    PackedLengthMisaligned {
        /// Payload length
        len: usize,
        /// Element size in bytes
        elem_size: usize,
    },
    /// String field payload is not UTF-8
    #[error("invalid UTF-8 in string field {0}")]
    InvalidUtf8(u32),
    /// Submessage or group nesting exceeds the configured depth
    #[error("nesting depth limit exceeded")]
    DepthLimitExceeded,
}

/// Reasons the encoder refuses a message graph.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeError {
    /// Pointer slot references memory outside the arena
    #[error("dangling pointer {addr:#x} in field {field}")]
    DanglingPointer {
        /// Field number holding the pointer
        field: u32,
        /// Raw address found in the slot
        addr: u64,
    },
    /// Submessage nesting exceeds the configured depth (or the graph has a cycle)
    #[error("nesting depth limit exceeded")]
    DepthLimitExceeded,
    /// Unknown-field buffer descriptor is corrupt
    #[error("corrupt unknown-field buffer")]
    CorruptUnknownFields,
}

/// Schema validation failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    /// Field number outside `1..=536_870_911`
    #[error("{message}: field number {number} out of range")]
    FieldNumberOutOfRange {
        /// Message name
        message: String,
        /// Offending number
        number: u32,
    },
    /// Two fields share a number
    #[error("{message}: duplicate field number {number}")]
    DuplicateFieldNumber {
        /// Message name
        message: String,
        /// Repeated number
        number: u32,
    },
    /// Two fields share a hasbit
    #[error("{message}: duplicate hasbit {hasbit}")]
    DuplicateHasbit {
        /// Message name
        message: String,
        /// Repeated hasbit index
        hasbit: u16,
    },
    /// Repeated field declared with explicit presence
    #[error("{message}: repeated field {number} cannot carry a hasbit")]
    HasbitOnRepeated {
        /// Message name
        message: String,
        /// Field number
        number: u32,
    },
    /// Repeated field declared as a oneof member
    #[error("{message}: repeated field {number} cannot be a oneof member")]
    OneofOnRepeated {
        /// Message name
        message: String,
        /// Field number
        number: u32,
    },
    /// Oneof member that also names a hasbit
    #[error("{message}: oneof member {number} cannot carry a hasbit")]
    OneofWithHasbit {
        /// Message name
        message: String,
        /// Field number
        number: u32,
    },
    /// `packed` on a string, bytes or message field
    #[error("{message}: field {number} of type {field_type:?} cannot be packed")]
    NotPackable {
        /// Message name
        message: String,
        /// Field number
        number: u32,
        /// Declared type
        field_type: FieldType,
    },
    /// Message field without a submessage table, or a dangling one
    #[error("{message}: field {number} has no resolvable submessage table")]
    MissingSubmessage {
        /// Message name
        message: String,
        /// Field number
        number: u32,
    },
    /// Submessage table on a non-message field
    #[error("{message}: scalar field {number} names a submessage table")]
    UnexpectedSubmessage {
        /// Message name
        message: String,
        /// Field number
        number: u32,
    },
    /// More fields than the 16-bit field index space holds
    #[error("{message}: {count} fields exceed the per-message limit")]
    TooManyFields {
        /// Message name
        message: String,
        /// Declared field count
        count: usize,
    },
    /// Layout does not fit the 16-bit offset space
    #[error("{message}: message layout of {size} bytes is too large")]
    MessageTooLarge {
        /// Message name
        message: String,
        /// Computed size
        size: usize,
    },
}

impl From<SchemaError> for Error {
    fn from(err: SchemaError) -> Self {
        Self::InvalidSchema(err)
    }
}

impl From<EncodeError> for Error {
    fn from(err: EncodeError) -> Self {
        Self::EncodeFailure(err)
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
