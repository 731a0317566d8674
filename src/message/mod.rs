//! Message store: arena-resident field blocks and the primitives that read
//! and write them.
//!
//! Two access levels are offered:
//!
//! * Raw: [`Message::field_address`] plus the typed [`FieldAddress`]
//!   read/write methods. Nothing is validated; a wrong `(layout, index)`
//!   pair or a mistyped read returns garbage from inside the block, and an
//!   address outside the arena panics.
//! * Checked: the accessors in [`accessor`], built from
//!   `(schema, table, field index)`. Index and type are verified once at
//!   construction, after which `get`/`set` cannot be mistyped.

pub mod accessor;
pub(crate) mod array;

mod primitives;

pub use accessor::{
    Accessor, MessageAccessor, RepeatedAccessor, RepeatedMessageAccessor,
    RepeatedStringAccessor, ScalarValue, StringAccessor,
};
pub use primitives::FieldAddress;

use tracing::trace;

use crate::arena::{Arena, ArenaAddr};
use crate::config::PointerWidth;
use crate::error::{Error, Result};
use crate::layout::MessageLayout;

/// Words in the hidden header before every message: unknown-field data
/// pointer, length and capacity.
const HEADER_WORDS: usize = 3;

/// Bytes reserved before the message address.
#[must_use]
pub const fn header_size(width: PointerWidth) -> usize {
    HEADER_WORDS * width.bytes()
}

/// Handle to one message instance inside an [`Arena`].
///
/// A plain address: copying it is free, and it is only meaningful together
/// with the arena it came from and the layout of its type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Message(ArenaAddr);

impl Message {
    /// Allocate a zeroed message of the given layout.
    pub fn new(arena: &mut Arena, layout: &MessageLayout) -> Result<Self> {
        Self::with_size(arena, layout.size(arena.width()))
    }

    pub(crate) fn with_size(arena: &mut Arena, size: usize) -> Result<Self> {
        let header = header_size(arena.width());
        let base = arena.allocate(header + size)?;
        Ok(Self(base.add(header)))
    }

    pub(crate) const fn from_addr(addr: ArenaAddr) -> Self {
        Self(addr)
    }

    /// Arena address of the first field byte.
    #[must_use]
    pub const fn addr(self) -> ArenaAddr {
        self.0
    }

    /// Address of field `index`. Not validated against the message's real type.
    ///
    /// # Panics
    ///
    /// Panics if `index` is not a field index of `layout`.
    #[must_use]
    pub fn field_address(self, layout: &MessageLayout, index: usize, width: PointerWidth) -> FieldAddress {
        FieldAddress::new(self.0.add(layout.fields()[index].offset(width)))
    }

    fn hasbit_location(
        self,
        layout: &MessageLayout,
        bit: u16,
        width: PointerWidth,
    ) -> (ArenaAddr, u8) {
        let byte = usize::from(bit) / 8;
        assert!(
            byte < layout.hasbit_bytes(),
            "hasbit {bit} out of range for {}",
            layout.name()
        );
        (
            self.0.add(layout.hasbit_offset(width) + byte),
            1 << (bit % 8),
        )
    }

    /// Mark the field owning hasbit `bit` as explicitly set.
    ///
    /// # Panics
    ///
    /// Panics if `bit` is beyond the layout's hasbit bytes.
    pub fn set_present(self, arena: &mut Arena, layout: &MessageLayout, bit: u16) {
        let (addr, mask) = self.hasbit_location(layout, bit, arena.width());
        let byte = arena.read_u8(addr);
        arena.write_u8(addr, byte | mask);
    }

    /// Whether hasbit `bit` is set.
    ///
    /// # Panics
    ///
    /// Panics if `bit` is beyond the layout's hasbit bytes.
    #[must_use]
    pub fn is_present(self, arena: &Arena, layout: &MessageLayout, bit: u16) -> bool {
        let (addr, mask) = self.hasbit_location(layout, bit, arena.width());
        arena.read_u8(addr) & mask != 0
    }

    /// Field number of the active member of oneof `oneof`, 0 if none.
    ///
    /// # Panics
    ///
    /// Panics if `oneof` is not a oneof of `layout`.
    #[must_use]
    pub fn oneof_case(self, arena: &Arena, layout: &MessageLayout, oneof: u16) -> u32 {
        arena.read_u32(self.0.add(layout.oneof_case_offset(oneof, arena.width())))
    }

    /// Record `number` as the active member of oneof `oneof`.
    ///
    /// # Panics
    ///
    /// Panics if `oneof` is not a oneof of `layout`.
    pub fn set_oneof_case(
        self,
        arena: &mut Arena,
        layout: &MessageLayout,
        oneof: u16,
        number: u32,
    ) {
        let addr = self.0.add(layout.oneof_case_offset(oneof, arena.width()));
        arena.write_u32(addr, number);
    }

    fn header(self, width: PointerWidth) -> ArenaAddr {
        self.0.sub(header_size(width))
    }

    /// Unknown-field bytes preserved by the decoder, in wire order.
    #[must_use]
    pub fn unknown_fields(self, arena: &Arena) -> &[u8] {
        let width = arena.width();
        let header = self.header(width);
        let data = arena.read_ptr(header);
        let len = arena.read_size(header.add(width.bytes()));
        if data.is_null() || len == 0 {
            return &[];
        }
        arena.bytes(data, len)
    }

    pub(crate) fn try_unknown_fields(self, arena: &Arena) -> Option<&[u8]> {
        let width = arena.width();
        let header = ArenaAddr::from_raw(self.0.get().checked_sub(header_size(width) as u64)?);
        let data = ArenaAddr::from_raw(arena.try_read_word(header)?);
        let len = usize::try_from(arena.try_read_word(header.add(width.bytes()))?).ok()?;
        if len == 0 {
            return Some(&[]);
        }
        arena.try_bytes(data, len)
    }

    /// Append raw wire bytes to the unknown-field buffer.
    pub fn append_unknown(self, arena: &mut Arena, bytes: &[u8]) -> Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        let width = arena.width();
        let word = width.bytes();
        let header = self.header(width);
        let mut data = arena.read_ptr(header);
        let len = arena.read_size(header.add(word));
        let capacity = arena.read_size(header.add(2 * word));

        let needed = len.checked_add(bytes.len()).ok_or(Error::AllocationFailure {
            requested: bytes.len(),
            limit: usize::MAX,
        })?;
        if needed > capacity {
            let new_capacity = needed.max(capacity * 2).max(32);
            data = arena.reallocate(data, len, new_capacity)?;
            arena.write_ptr(header, data);
            arena.write_size(header.add(2 * word), new_capacity);
            trace!(len, new_capacity, "unknown-field buffer grown");
        }
        arena.bytes_mut(data.add(len), bytes.len()).copy_from_slice(bytes);
        arena.write_size(header.add(word), needed);
        Ok(())
    }

    /// Drop preserved unknown fields.
    pub fn discard_unknown(self, arena: &mut Arena) {
        let width = arena.width();
        let header = self.header(width);
        arena.write_size(header.add(width.bytes()), 0);
    }
}
