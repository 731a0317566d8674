//! Schema metadata ("minitables") consumed read-only by the layout resolver
//! and the codecs.
//!
//! A [`MiniTableSet`] groups tables by file and is addressed with stable
//! `(file, message)` integer pairs ([`MiniTableRef`]), never by pointer, so
//! handles can cross any binding boundary without re-resolution.

mod set;
mod types;

pub use set::{MiniTable, MiniTableFile, MiniTableRef, MiniTableSet};
pub use types::{FieldType, Label, MiniTableField};

/// Largest legal field number (2^29 - 1).
pub const MAX_FIELD_NUMBER: u32 = (1 << 29) - 1;
