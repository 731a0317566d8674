//! Checked field accessors.
//!
//! Each accessor is built once from `(schema, table, field index)` and
//! captures the field's offset and presence location for the schema's
//! pointer width. Construction rejects an out-of-range index or a value type
//! that does not match the declared field type; the returned accessor can
//! then be used on any message of that table.
//!
//! The arena's pointer width is checked on every call. Fallible operations
//! return [`Error::PointerWidthMismatch`]; the infallible ones panic.
//! Handing an accessor a message of a *different* table is not detected.
//!
//! Oneof members read as unset (zero, empty, `None`) unless they are the
//! oneof's active case. Setting a member makes it the active case.

use std::fmt;
use std::marker::PhantomData;

use crate::arena::{Arena, ArenaAddr};
use crate::config::PointerWidth;
use crate::error::{Error, Result};
use crate::layout::{FieldLayout, MessageLayout, Schema, element_size};
use crate::mini_table::{FieldType, MiniTableRef};

use super::{FieldAddress, Message, array};

mod sealed {
    pub trait Sealed {}
}

/// Rust types that can be stored in a scalar field.
pub trait ScalarValue: sealed::Sealed + Copy + PartialEq + Default + fmt::Debug {
    /// Name used in type-mismatch errors.
    const KIND: &'static str;

    /// Whether values of this type live in fields declared as `field_type`.
    fn accepts(field_type: FieldType) -> bool;

    /// Read the value at `at`.
    fn read(at: FieldAddress, arena: &Arena) -> Self;

    /// Write the value at `at`.
    fn write(self, at: FieldAddress, arena: &mut Arena);

    /// Whether this is the type's zero value (bitwise for floats).
    fn is_zero(self) -> bool;
}

macro_rules! scalar_value {
    ($ty:ty, $kind:literal, $read:ident, $write:ident, |$v:ident| $zero:expr, [$($field_type:ident),+]) => {
        impl sealed::Sealed for $ty {}

        impl ScalarValue for $ty {
            const KIND: &'static str = $kind;

            fn accepts(field_type: FieldType) -> bool {
                matches!(field_type, $(FieldType::$field_type)|+)
            }

            fn read(at: FieldAddress, arena: &Arena) -> Self {
                at.$read(arena)
            }

            fn write(self, at: FieldAddress, arena: &mut Arena) {
                at.$write(arena, self);
            }

            fn is_zero(self) -> bool {
                let $v = self;
                $zero
            }
        }
    };
}

scalar_value!(bool, "bool", read_bool, write_bool, |v| !v, [Bool]);
scalar_value!(i32, "i32", read_i32, write_i32, |v| v == 0, [Int32, SInt32, SFixed32, Enum]);
scalar_value!(u32, "u32", read_u32, write_u32, |v| v == 0, [UInt32, Fixed32]);
scalar_value!(i64, "i64", read_i64, write_i64, |v| v == 0, [Int64, SInt64, SFixed64]);
scalar_value!(u64, "u64", read_u64, write_u64, |v| v == 0, [UInt64, Fixed64]);
scalar_value!(f32, "f32", read_f32, write_f32, |v| v.to_bits() == 0, [Float]);
scalar_value!(f64, "f64", read_f64, write_f64, |v| v.to_bits() == 0, [Double]);

/// Where a field records that it is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Presence {
    /// Present when non-zero
    Implicit,
    /// Hasbit byte offset and mask
    Hasbit { offset: usize, mask: u8 },
    /// Oneof case slot offset
    Oneof { offset: usize },
}

/// Offset and presence location of one field, fixed for one pointer width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Slot {
    number: u32,
    width: PointerWidth,
    offset: usize,
    presence: Presence,
}

impl Slot {
    fn new(layout: &MessageLayout, field: &FieldLayout, schema: &Schema) -> Self {
        let width = schema.width();
        let presence = match (field.hasbit, field.oneof) {
            (_, Some(oneof)) => Presence::Oneof {
                offset: layout.oneof_case_offset(oneof, width),
            },
            (Some(bit), None) => Presence::Hasbit {
                offset: layout.hasbit_offset(width) + usize::from(bit) / 8,
                mask: 1u8 << (bit % 8),
            },
            (None, None) => Presence::Implicit,
        };
        Self {
            number: field.number,
            width,
            offset: field.offset(width),
            presence,
        }
    }

    fn check(self, arena: &Arena) -> Result<()> {
        if arena.width() == self.width {
            Ok(())
        } else {
            Err(Error::PointerWidthMismatch {
                arena: arena.width(),
                schema: self.width,
            })
        }
    }

    fn assert_width(self, arena: &Arena) {
        assert!(
            arena.width() == self.width,
            "accessor for field {} built for {} used on a {} arena",
            self.number,
            self.width,
            arena.width()
        );
    }

    fn at(self, msg: Message) -> FieldAddress {
        FieldAddress::new(msg.addr().add(self.offset))
    }

    /// Explicit presence, `None` for implicit-presence fields.
    fn explicit(self, arena: &Arena, msg: Message) -> Option<bool> {
        match self.presence {
            Presence::Implicit => None,
            Presence::Hasbit { offset, mask } => {
                Some(arena.read_u8(msg.addr().add(offset)) & mask != 0)
            }
            Presence::Oneof { offset } => {
                Some(arena.read_u32(msg.addr().add(offset)) == self.number)
            }
        }
    }

    /// False for a oneof member that is not the active case.
    fn active(self, arena: &Arena, msg: Message) -> bool {
        match self.presence {
            Presence::Oneof { offset } => arena.read_u32(msg.addr().add(offset)) == self.number,
            _ => true,
        }
    }

    fn mark(self, arena: &mut Arena, msg: Message) {
        match self.presence {
            Presence::Implicit => {}
            Presence::Hasbit { offset, mask } => {
                let addr = msg.addr().add(offset);
                let byte = arena.read_u8(addr);
                arena.write_u8(addr, byte | mask);
            }
            Presence::Oneof { offset } => arena.write_u32(msg.addr().add(offset), self.number),
        }
    }

    fn unmark(self, arena: &mut Arena, msg: Message) {
        match self.presence {
            Presence::Implicit => {}
            Presence::Hasbit { offset, mask } => {
                let addr = msg.addr().add(offset);
                let byte = arena.read_u8(addr);
                arena.write_u8(addr, byte & !mask);
            }
            Presence::Oneof { offset } => {
                let addr = msg.addr().add(offset);
                if arena.read_u32(addr) == self.number {
                    arena.write_u32(addr, 0);
                }
            }
        }
    }
}

fn lookup(
    schema: &Schema,
    table: MiniTableRef,
    index: usize,
) -> Result<(&MessageLayout, &FieldLayout)> {
    let layout = schema.layout(table)?;
    let field = layout.field(index).ok_or(Error::FieldIndexOutOfRange {
        index,
        count: layout.field_count(),
    })?;
    Ok((layout, field))
}

fn expect(field: &FieldLayout, ok: bool, expected: &'static str) -> Result<()> {
    if ok {
        Ok(())
    } else {
        Err(Error::FieldTypeMismatch {
            number: field.number,
            expected,
            found: field.field_type,
        })
    }
}

fn submessage_size(schema: &Schema, field: &FieldLayout) -> Result<(MiniTableRef, usize)> {
    let submsg = field.submsg.ok_or(Error::FieldTypeMismatch {
        number: field.number,
        expected: "message",
        found: field.field_type,
    })?;
    let size = schema.layout(submsg)?.size(schema.width());
    Ok((submsg, size))
}

/// Singular scalar field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Accessor<T> {
    slot: Slot,
    _marker: PhantomData<T>,
}

impl<T: ScalarValue> Accessor<T> {
    /// Bind to field `index` of `table`.
    pub fn new(schema: &Schema, table: MiniTableRef, index: usize) -> Result<Self> {
        let (layout, field) = lookup(schema, table, index)?;
        expect(field, !field.is_repeated() && T::accepts(field.field_type), T::KIND)?;
        Ok(Self {
            slot: Slot::new(layout, field, schema),
            _marker: PhantomData,
        })
    }

    /// Field number.
    #[must_use]
    pub const fn number(&self) -> u32 {
        self.slot.number
    }

    /// Raw address of the field in `msg`.
    #[must_use]
    pub fn field_address(&self, msg: Message) -> FieldAddress {
        self.slot.at(msg)
    }

    /// Current value (zero if never set).
    ///
    /// # Panics
    ///
    /// Panics if `arena` uses a different pointer width than the schema.
    #[must_use]
    pub fn get(&self, arena: &Arena, msg: Message) -> T {
        self.slot.assert_width(arena);
        if !self.slot.active(arena, msg) {
            return T::default();
        }
        T::read(self.slot.at(msg), arena)
    }

    /// Store `value`, marking the field present if it tracks presence.
    ///
    /// # Panics
    ///
    /// Panics if `arena` uses a different pointer width than the schema.
    pub fn set(&self, arena: &mut Arena, msg: Message, value: T) {
        self.slot.assert_width(arena);
        value.write(self.slot.at(msg), arena);
        self.slot.mark(arena, msg);
    }

    /// Hasbit or oneof case for explicit-presence fields, non-zero test
    /// otherwise.
    ///
    /// # Panics
    ///
    /// Panics if `arena` uses a different pointer width than the schema.
    #[must_use]
    pub fn has(&self, arena: &Arena, msg: Message) -> bool {
        self.slot.assert_width(arena);
        self.slot
            .explicit(arena, msg)
            .unwrap_or_else(|| !self.get(arena, msg).is_zero())
    }

    /// Reset to zero and clear presence.
    ///
    /// # Panics
    ///
    /// Panics if `arena` uses a different pointer width than the schema.
    pub fn clear(&self, arena: &mut Arena, msg: Message) {
        self.slot.assert_width(arena);
        T::default().write(self.slot.at(msg), arena);
        self.slot.unmark(arena, msg);
    }
}

/// Singular `string` or `bytes` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StringAccessor {
    slot: Slot,
}

impl StringAccessor {
    /// Bind to field `index` of `table`.
    pub fn new(schema: &Schema, table: MiniTableRef, index: usize) -> Result<Self> {
        let (layout, field) = lookup(schema, table, index)?;
        expect(
            field,
            !field.is_repeated() && field.field_type.is_string_like(),
            "string",
        )?;
        Ok(Self {
            slot: Slot::new(layout, field, schema),
        })
    }

    /// Field number.
    #[must_use]
    pub const fn number(&self) -> u32 {
        self.slot.number
    }

    /// Current bytes; empty when never set.
    ///
    /// # Panics
    ///
    /// Panics if `arena` uses a different pointer width than the schema.
    #[must_use]
    pub fn get<'a>(&self, arena: &'a Arena, msg: Message) -> &'a [u8] {
        self.slot.assert_width(arena);
        if !self.slot.active(arena, msg) {
            return &[];
        }
        self.slot.at(msg).read_string(arena)
    }

    /// Current value as text.
    pub fn get_str<'a>(&self, arena: &'a Arena, msg: Message) -> Result<&'a str> {
        self.slot.check(arena)?;
        Ok(std::str::from_utf8(self.get(arena, msg))?)
    }

    /// Copy `value` into the arena and mark the field present.
    pub fn set(&self, arena: &mut Arena, msg: Message, value: impl AsRef<[u8]>) -> Result<()> {
        self.slot.check(arena)?;
        self.slot.at(msg).write_string(arena, value.as_ref())?;
        self.slot.mark(arena, msg);
        Ok(())
    }

    /// Hasbit or oneof case for explicit-presence fields, non-empty test
    /// otherwise.
    ///
    /// An explicitly set empty string is present; an unset one is not,
    /// even though both read back as empty.
    ///
    /// # Panics
    ///
    /// Panics if `arena` uses a different pointer width than the schema.
    #[must_use]
    pub fn has(&self, arena: &Arena, msg: Message) -> bool {
        self.slot.assert_width(arena);
        self.slot
            .explicit(arena, msg)
            .unwrap_or_else(|| !self.get(arena, msg).is_empty())
    }

    /// Reset to empty and clear presence.
    ///
    /// # Panics
    ///
    /// Panics if `arena` uses a different pointer width than the schema.
    pub fn clear(&self, arena: &mut Arena, msg: Message) {
        self.slot.assert_width(arena);
        self.slot.at(msg).write_view(arena, ArenaAddr::NULL, 0);
        self.slot.unmark(arena, msg);
    }
}

/// Singular submessage field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageAccessor {
    slot: Slot,
    submsg: MiniTableRef,
    sub_size: usize,
}

impl MessageAccessor {
    /// Bind to field `index` of `table`.
    pub fn new(schema: &Schema, table: MiniTableRef, index: usize) -> Result<Self> {
        let (layout, field) = lookup(schema, table, index)?;
        expect(
            field,
            !field.is_repeated() && field.field_type == FieldType::Message,
            "message",
        )?;
        let (submsg, sub_size) = submessage_size(schema, field)?;
        Ok(Self {
            slot: Slot::new(layout, field, schema),
            submsg,
            sub_size,
        })
    }

    /// Field number.
    #[must_use]
    pub const fn number(&self) -> u32 {
        self.slot.number
    }

    /// Table of the submessage type.
    #[must_use]
    pub const fn submsg(&self) -> MiniTableRef {
        self.submsg
    }

    /// Linked submessage, if any.
    ///
    /// # Panics
    ///
    /// Panics if `arena` uses a different pointer width than the schema.
    #[must_use]
    pub fn get(&self, arena: &Arena, msg: Message) -> Option<Message> {
        self.slot.assert_width(arena);
        if !self.slot.active(arena, msg) {
            return None;
        }
        let addr = self.slot.at(msg).read_ptr(arena);
        (!addr.is_null()).then(|| Message::from_addr(addr))
    }

    /// Linked submessage, allocating an empty one first if needed.
    pub fn get_or_create(&self, arena: &mut Arena, msg: Message) -> Result<Message> {
        self.slot.check(arena)?;
        if let Some(child) = self.get(arena, msg) {
            return Ok(child);
        }
        let child = Message::with_size(arena, self.sub_size)?;
        self.set(arena, msg, child);
        Ok(child)
    }

    /// Link `child` (which must belong to the same arena and table).
    ///
    /// # Panics
    ///
    /// Panics if `arena` uses a different pointer width than the schema.
    pub fn set(&self, arena: &mut Arena, msg: Message, child: Message) {
        self.slot.assert_width(arena);
        self.slot.at(msg).write_ptr(arena, child.addr());
        self.slot.mark(arena, msg);
    }

    /// Whether a submessage is linked.
    ///
    /// # Panics
    ///
    /// Panics if `arena` uses a different pointer width than the schema.
    #[must_use]
    pub fn has(&self, arena: &Arena, msg: Message) -> bool {
        self.get(arena, msg).is_some()
    }

    /// Unlink the submessage and clear presence.
    ///
    /// # Panics
    ///
    /// Panics if `arena` uses a different pointer width than the schema.
    pub fn clear(&self, arena: &mut Arena, msg: Message) {
        self.slot.assert_width(arena);
        self.slot.at(msg).write_ptr(arena, ArenaAddr::NULL);
        self.slot.unmark(arena, msg);
    }
}

/// Repeated scalar field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepeatedAccessor<T> {
    slot: Slot,
    elem_size: usize,
    _marker: PhantomData<T>,
}

impl<T: ScalarValue> RepeatedAccessor<T> {
    /// Bind to field `index` of `table`.
    pub fn new(schema: &Schema, table: MiniTableRef, index: usize) -> Result<Self> {
        let (layout, field) = lookup(schema, table, index)?;
        expect(field, field.is_repeated() && T::accepts(field.field_type), T::KIND)?;
        Ok(Self {
            slot: Slot::new(layout, field, schema),
            elem_size: element_size(field.field_type, schema.width()),
            _marker: PhantomData,
        })
    }

    /// Field number.
    #[must_use]
    pub const fn number(&self) -> u32 {
        self.slot.number
    }

    /// Number of elements.
    ///
    /// # Panics
    ///
    /// Panics if `arena` uses a different pointer width than the schema.
    #[must_use]
    pub fn len(&self, arena: &Arena, msg: Message) -> usize {
        self.slot.assert_width(arena);
        array::view(arena, self.slot.at(msg)).len
    }

    /// Whether the field has no elements.
    #[must_use]
    pub fn is_empty(&self, arena: &Arena, msg: Message) -> bool {
        self.len(arena, msg) == 0
    }

    /// Element at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= len`, or if `arena` uses a different pointer width
    /// than the schema.
    #[must_use]
    pub fn get(&self, arena: &Arena, msg: Message, index: usize) -> T {
        self.slot.assert_width(arena);
        let view = array::view(arena, self.slot.at(msg));
        assert!(index < view.len, "index {index} out of range (len {})", view.len);
        T::read(FieldAddress::new(view.element(index, self.elem_size)), arena)
    }

    /// All elements, in order.
    ///
    /// # Panics
    ///
    /// Panics if `arena` uses a different pointer width than the schema.
    #[must_use]
    pub fn to_vec(&self, arena: &Arena, msg: Message) -> Vec<T> {
        self.slot.assert_width(arena);
        let view = array::view(arena, self.slot.at(msg));
        (0..view.len)
            .map(|index| T::read(FieldAddress::new(view.element(index, self.elem_size)), arena))
            .collect()
    }

    /// Append `value`.
    pub fn push(&self, arena: &mut Arena, msg: Message, value: T) -> Result<()> {
        self.slot.check(arena)?;
        let at = array::push(arena, self.slot.at(msg), self.elem_size)?;
        value.write(FieldAddress::new(at), arena);
        Ok(())
    }

    /// Remove all elements.
    ///
    /// # Panics
    ///
    /// Panics if `arena` uses a different pointer width than the schema.
    pub fn clear(&self, arena: &mut Arena, msg: Message) {
        self.slot.assert_width(arena);
        array::clear(arena, self.slot.at(msg));
    }
}

/// Repeated `string` or `bytes` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepeatedStringAccessor {
    slot: Slot,
    elem_size: usize,
}

impl RepeatedStringAccessor {
    /// Bind to field `index` of `table`.
    pub fn new(schema: &Schema, table: MiniTableRef, index: usize) -> Result<Self> {
        let (layout, field) = lookup(schema, table, index)?;
        expect(
            field,
            field.is_repeated() && field.field_type.is_string_like(),
            "repeated string",
        )?;
        Ok(Self {
            slot: Slot::new(layout, field, schema),
            elem_size: element_size(field.field_type, schema.width()),
        })
    }

    /// Number of elements.
    ///
    /// # Panics
    ///
    /// Panics if `arena` uses a different pointer width than the schema.
    #[must_use]
    pub fn len(&self, arena: &Arena, msg: Message) -> usize {
        self.slot.assert_width(arena);
        array::view(arena, self.slot.at(msg)).len
    }

    /// Whether the field has no elements.
    #[must_use]
    pub fn is_empty(&self, arena: &Arena, msg: Message) -> bool {
        self.len(arena, msg) == 0
    }

    /// Element at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= len`, or if `arena` uses a different pointer width
    /// than the schema.
    #[must_use]
    pub fn get<'a>(&self, arena: &'a Arena, msg: Message, index: usize) -> &'a [u8] {
        self.slot.assert_width(arena);
        let view = array::view(arena, self.slot.at(msg));
        assert!(index < view.len, "index {index} out of range (len {})", view.len);
        FieldAddress::new(view.element(index, self.elem_size)).read_string(arena)
    }

    /// Append a copy of `value`.
    pub fn push(&self, arena: &mut Arena, msg: Message, value: impl AsRef<[u8]>) -> Result<()> {
        self.slot.check(arena)?;
        let at = array::push(arena, self.slot.at(msg), self.elem_size)?;
        FieldAddress::new(at).write_string(arena, value.as_ref())
    }

    /// Remove all elements.
    ///
    /// # Panics
    ///
    /// Panics if `arena` uses a different pointer width than the schema.
    pub fn clear(&self, arena: &mut Arena, msg: Message) {
        self.slot.assert_width(arena);
        array::clear(arena, self.slot.at(msg));
    }
}

/// Repeated submessage field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepeatedMessageAccessor {
    slot: Slot,
    elem_size: usize,
    submsg: MiniTableRef,
    sub_size: usize,
}

impl RepeatedMessageAccessor {
    /// Bind to field `index` of `table`.
    pub fn new(schema: &Schema, table: MiniTableRef, index: usize) -> Result<Self> {
        let (layout, field) = lookup(schema, table, index)?;
        expect(
            field,
            field.is_repeated() && field.field_type == FieldType::Message,
            "repeated message",
        )?;
        let (submsg, sub_size) = submessage_size(schema, field)?;
        Ok(Self {
            slot: Slot::new(layout, field, schema),
            elem_size: schema.width().bytes(),
            submsg,
            sub_size,
        })
    }

    /// Table of the element type.
    #[must_use]
    pub const fn submsg(&self) -> MiniTableRef {
        self.submsg
    }

    /// Number of elements.
    ///
    /// # Panics
    ///
    /// Panics if `arena` uses a different pointer width than the schema.
    #[must_use]
    pub fn len(&self, arena: &Arena, msg: Message) -> usize {
        self.slot.assert_width(arena);
        array::view(arena, self.slot.at(msg)).len
    }

    /// Whether the field has no elements.
    #[must_use]
    pub fn is_empty(&self, arena: &Arena, msg: Message) -> bool {
        self.len(arena, msg) == 0
    }

    /// Element at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= len`, or if `arena` uses a different pointer width
    /// than the schema.
    #[must_use]
    pub fn get(&self, arena: &Arena, msg: Message, index: usize) -> Message {
        self.slot.assert_width(arena);
        let view = array::view(arena, self.slot.at(msg));
        assert!(index < view.len, "index {index} out of range (len {})", view.len);
        Message::from_addr(arena.read_ptr(view.element(index, self.elem_size)))
    }

    /// Append a new empty element and return it.
    pub fn push_new(&self, arena: &mut Arena, msg: Message) -> Result<Message> {
        self.slot.check(arena)?;
        let child = Message::with_size(arena, self.sub_size)?;
        let at = array::push(arena, self.slot.at(msg), self.elem_size)?;
        arena.write_ptr(at, child.addr());
        Ok(child)
    }

    /// Remove all elements.
    ///
    /// # Panics
    ///
    /// Panics if `arena` uses a different pointer width than the schema.
    pub fn clear(&self, arena: &mut Arena, msg: Message) {
        self.slot.assert_width(arena);
        array::clear(arena, self.slot.at(msg));
    }
}
