//! Layout resolver: turns a [`MiniTable`] into concrete byte offsets.
//!
//! Offsets are computed twice, once per [`PointerWidth`], and kept side by
//! side. Every consumer picks its value through [`PointerWidth::select`], so
//! the accessor, decoder and encoder paths cannot disagree as long as they
//! share one width.
//!
//! # Message block
//!
//! ```text
//! [unknown-field header (3 words)] | field 0 | ... | hasbits | oneof cases | pad to 8
//!                                  ^ message address
//! ```
//!
//! Fields keep declaration order. Scalars align to their own size,
//! pointer-backed slots (string views, submessages, repeated fields) to the
//! pointer width. Each oneof owns one 4-byte case slot holding the field
//! number of its active member, 0 when none is set. The unknown-field header
//! lives before the message address and is not counted in the layout size.

mod schema;

pub use schema::Schema;

use crate::arena::align_up;
use crate::config::PointerWidth;
use crate::error::SchemaError;
use crate::mini_table::{FieldType, Label, MiniTable, MiniTableField, MiniTableRef};

/// Field numbers below this are looked up through a dense table.
const DENSE_LOOKUP_LIMIT: u32 = 128;

/// Field indices are stored as `u16` and the dense table reserves 0.
pub const MAX_FIELDS: usize = u16::MAX as usize - 1;

/// Bytes of one oneof case slot.
pub const ONEOF_CASE_SIZE: usize = 4;

/// Resolved placement of one field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldLayout {
    /// Wire field number
    pub number: u32,
    /// Declared type
    pub field_type: FieldType,
    /// Cardinality
    pub label: Label,
    /// Byte offset with 4-byte pointers
    pub offset32: u16,
    /// Byte offset with 8-byte pointers
    pub offset64: u16,
    /// Hasbit index, if the field tracks explicit presence
    pub hasbit: Option<u16>,
    /// Oneof index, if the field is a oneof member
    pub oneof: Option<u16>,
    /// Submessage table for message fields
    pub submsg: Option<MiniTableRef>,
}

impl FieldLayout {
    /// Byte offset for `width`.
    #[must_use]
    pub const fn offset(&self, width: PointerWidth) -> usize {
        width.select(self.offset32 as usize, self.offset64 as usize)
    }

    /// Bytes occupied in the message block.
    #[must_use]
    pub const fn slot_size(&self, width: PointerWidth) -> usize {
        slot_size(self.field_type, self.label, width)
    }

    /// Whether the field is repeated.
    #[must_use]
    pub const fn is_repeated(&self) -> bool {
        self.label.is_repeated()
    }

    /// Whether a repeated field encodes packed.
    #[must_use]
    pub const fn is_packed(&self) -> bool {
        matches!(self.label, Label::Repeated { packed: true })
    }
}

/// Slot size of a field: one pointer for repeated and message fields, a
/// two-word view for string/bytes, the scalar size otherwise.
#[must_use]
pub const fn slot_size(field_type: FieldType, label: Label, width: PointerWidth) -> usize {
    if label.is_repeated() {
        return width.bytes();
    }
    match field_type.scalar_size() {
        Some(size) => size,
        None if field_type.is_string_like() => 2 * width.bytes(),
        None => width.bytes(),
    }
}

/// Size of one element in a repeated field's backing array.
#[must_use]
pub const fn element_size(field_type: FieldType, width: PointerWidth) -> usize {
    slot_size(field_type, Label::Singular, width)
}

const fn slot_align(field_type: FieldType, label: Label, width: PointerWidth) -> usize {
    if label.is_repeated() {
        return width.bytes();
    }
    match field_type.scalar_size() {
        Some(size) => size,
        None => width.bytes(),
    }
}

/// Fully resolved layout of one message type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageLayout {
    name: String,
    fields: Vec<FieldLayout>,
    size32: u16,
    size64: u16,
    hasbit_offset32: u16,
    hasbit_offset64: u16,
    hasbit_bytes: u16,
    oneof_offset32: u16,
    oneof_offset64: u16,
    oneof_count: u16,
    dense: Vec<u16>,
    sorted: Vec<(u32, u16)>,
}

struct Placement {
    offsets: Vec<usize>,
    hasbit_offset: usize,
    oneof_offset: usize,
    size: usize,
}

fn place(
    fields: &[MiniTableField],
    hasbit_bytes: usize,
    oneof_count: usize,
    width: PointerWidth,
) -> Placement {
    let mut offset = 0;
    let mut offsets = Vec::with_capacity(fields.len());
    for field in fields {
        offset = align_up(offset, slot_align(field.field_type, field.label, width));
        offsets.push(offset);
        offset += slot_size(field.field_type, field.label, width);
    }
    let hasbit_offset = offset;
    let oneof_offset = align_up(hasbit_offset + hasbit_bytes, ONEOF_CASE_SIZE);
    Placement {
        offsets,
        hasbit_offset,
        oneof_offset,
        size: align_up(oneof_offset + oneof_count * ONEOF_CASE_SIZE, 8),
    }
}

fn narrow(value: usize, name: &str) -> Result<u16, SchemaError> {
    u16::try_from(value).map_err(|_| SchemaError::MessageTooLarge {
        message: name.to_owned(),
        size: value,
    })
}

/// Resolve the layout of `table` for both pointer widths.
pub fn resolve(table: &MiniTable) -> Result<MessageLayout, SchemaError> {
    if table.fields.len() > MAX_FIELDS {
        return Err(SchemaError::TooManyFields {
            message: table.name.clone(),
            count: table.fields.len(),
        });
    }

    let hasbit_bytes = table
        .fields
        .iter()
        .filter_map(|field| field.presence)
        .max()
        .map_or(0, |max| usize::from(max) / 8 + 1);
    let oneof_count = table
        .fields
        .iter()
        .filter_map(|field| field.oneof)
        .max()
        .map_or(0, |max| usize::from(max) + 1);

    let narrow_placement = place(&table.fields, hasbit_bytes, oneof_count, PointerWidth::Bits32);
    let wide_placement = place(&table.fields, hasbit_bytes, oneof_count, PointerWidth::Bits64);

    let mut fields = Vec::with_capacity(table.fields.len());
    for (index, field) in table.fields.iter().enumerate() {
        fields.push(FieldLayout {
            number: field.number,
            field_type: field.field_type,
            label: field.label,
            offset32: narrow(narrow_placement.offsets[index], &table.name)?,
            offset64: narrow(wide_placement.offsets[index], &table.name)?,
            hasbit: field.presence,
            oneof: field.oneof,
            submsg: field.submsg,
        });
    }

    let mut sorted: Vec<(u32, u16)> = fields
        .iter()
        .enumerate()
        .map(|(index, field)| (field.number, index as u16))
        .collect();
    sorted.sort_unstable();

    let dense_len = sorted
        .iter()
        .map(|&(number, _)| number)
        .filter(|&number| number < DENSE_LOOKUP_LIMIT)
        .max()
        .map_or(0, |max| max as usize + 1);
    let mut dense = vec![0u16; dense_len];
    for &(number, index) in &sorted {
        if (number as usize) < dense_len {
            dense[number as usize] = index + 1;
        }
    }

    Ok(MessageLayout {
        name: table.name.clone(),
        fields,
        size32: narrow(narrow_placement.size, &table.name)?,
        size64: narrow(wide_placement.size, &table.name)?,
        hasbit_offset32: narrow(narrow_placement.hasbit_offset, &table.name)?,
        hasbit_offset64: narrow(wide_placement.hasbit_offset, &table.name)?,
        hasbit_bytes: narrow(hasbit_bytes, &table.name)?,
        oneof_offset32: narrow(narrow_placement.oneof_offset, &table.name)?,
        oneof_offset64: narrow(wide_placement.oneof_offset, &table.name)?,
        oneof_count: narrow(oneof_count, &table.name)?,
        dense,
        sorted,
    })
}

impl MessageLayout {
    /// Diagnostic name of the message type.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Total block size for `width`, excluding the unknown-field header.
    #[must_use]
    pub const fn size(&self, width: PointerWidth) -> usize {
        width.select(self.size32 as usize, self.size64 as usize)
    }

    /// Offset of the first hasbit byte for `width`.
    #[must_use]
    pub const fn hasbit_offset(&self, width: PointerWidth) -> usize {
        width.select(self.hasbit_offset32 as usize, self.hasbit_offset64 as usize)
    }

    /// Bytes reserved for hasbits.
    #[must_use]
    pub const fn hasbit_bytes(&self) -> usize {
        self.hasbit_bytes as usize
    }

    /// Number of oneof case slots.
    #[must_use]
    pub const fn oneof_count(&self) -> usize {
        self.oneof_count as usize
    }

    /// Offset of the case slot of oneof `oneof` for `width`.
    ///
    /// # Panics
    ///
    /// Panics if `oneof` is not below [`Self::oneof_count`].
    #[must_use]
    pub fn oneof_case_offset(&self, oneof: u16, width: PointerWidth) -> usize {
        assert!(
            oneof < self.oneof_count,
            "oneof {oneof} out of range for {}",
            self.name
        );
        let base = width.select(self.oneof_offset32 as usize, self.oneof_offset64 as usize);
        base + usize::from(oneof) * ONEOF_CASE_SIZE
    }

    /// Fields in declaration (field index) order.
    #[must_use]
    pub fn fields(&self) -> &[FieldLayout] {
        &self.fields
    }

    /// Number of fields.
    #[must_use]
    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    /// Field at `index`.
    #[must_use]
    pub fn field(&self, index: usize) -> Option<&FieldLayout> {
        self.fields.get(index)
    }

    /// Field index for a wire field number.
    #[must_use]
    pub fn find_by_number(&self, number: u32) -> Option<usize> {
        if let Some(&slot) = self.dense.get(number as usize) {
            return slot.checked_sub(1).map(usize::from);
        }
        self.sorted
            .binary_search_by_key(&number, |&(candidate, _)| candidate)
            .ok()
            .map(|pos| usize::from(self.sorted[pos].1))
    }

    /// Fields in ascending field-number order with their field index.
    pub fn by_number(&self) -> impl DoubleEndedIterator<Item = (usize, &FieldLayout)> {
        self.sorted
            .iter()
            .map(|&(_, index)| (usize::from(index), &self.fields[usize::from(index)]))
    }
}
