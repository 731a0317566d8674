//! arenapb - arena-backed, table-driven protocol buffer messages
//!
//! Messages are raw field blocks inside an [`Arena`]. Their layout is not
//! generated code: it is computed at runtime from schema metadata
//! ([`MiniTable`]s) for a chosen [`PointerWidth`], and one generic decoder and
//! encoder walk any message type through that layout.
//!
//! # Quick Start
//!
//! ```rust
//! use arenapb::{
//!     Accessor, Arena, FieldType, MiniTable, MiniTableField, MiniTableRef, MiniTableSet,
//!     PointerWidth, Schema, StringAccessor, wire,
//! };
//!
//! // message Greeting { int32 id = 1; optional string text = 2; }
//! let tables = MiniTableSet::single(vec![MiniTable::new(
//!     "Greeting",
//!     vec![
//!         MiniTableField::scalar(1, FieldType::Int32),
//!         MiniTableField::optional(2, FieldType::String, 0),
//!     ],
//! )])?;
//! let schema = Schema::new(tables, PointerWidth::Bits64)?;
//! let greeting = MiniTableRef::new(0, 0);
//!
//! let mut arena = Arena::new(PointerWidth::Bits64);
//! let msg = wire::decode(&[0x08, 0x2A, 0x12, 0x02, b'h', b'i'], &schema, greeting, &mut arena)?;
//!
//! let id = Accessor::<i32>::new(&schema, greeting, 0)?;
//! let text = StringAccessor::new(&schema, greeting, 1)?;
//! assert_eq!(id.get(&arena, msg), 42);
//! assert_eq!(text.get_str(&arena, msg)?, "hi");
//!
//! let bytes = wire::encode(msg, &schema, greeting, &arena)?;
//! assert_eq!(&bytes[..], &[0x08, 0x2A, 0x12, 0x02, b'h', b'i']);
//! # Ok::<(), arenapb::Error>(())
//! ```
//!
//! # Layers
//!
//! - [`arena`] - block-growing bump allocator with stable addresses
//! - [`mini_table`] - schema metadata supplied by the caller
//! - [`layout`] - field offsets and hasbit placement for both pointer widths
//! - [`message`] - raw primitives and checked accessors over a message block
//! - [`wire`] - decoder and encoder
//!
//! # Threading
//!
//! Every operation is synchronous. An [`Arena`] and the messages in it belong
//! to one thread at a time; a [`Schema`] is immutable and can be shared.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod arena;
pub mod config;
pub mod error;
pub mod layout;
pub mod message;
pub mod metrics;
pub mod mini_table;
pub mod wire;

pub use arena::{Arena, ArenaAddr};
pub use config::{ArenaConfig, DecodeOptions, EncodeOptions, PointerWidth, RuntimeConfig};
pub use error::{EncodeError, Error, Result, SchemaError, WireError};
pub use layout::{FieldLayout, MessageLayout, Schema};
pub use message::{
    Accessor, FieldAddress, Message, MessageAccessor, RepeatedAccessor, RepeatedMessageAccessor,
    RepeatedStringAccessor, ScalarValue, StringAccessor,
};
pub use metrics::MetricsSnapshot;
pub use mini_table::{
    FieldType, Label, MiniTable, MiniTableField, MiniTableFile, MiniTableRef, MiniTableSet,
};
pub use wire::WireType;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
