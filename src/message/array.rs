//! Backing storage for repeated fields.
//!
//! A repeated field's slot holds a pointer to a three-word header
//! `[data, len, capacity]`; a null slot is an empty field. Growth doubles the
//! capacity and copies into a fresh arena allocation.

use crate::arena::{Arena, ArenaAddr};
use crate::error::Result;

use super::FieldAddress;

const HEADER_WORDS: usize = 3;
const MIN_CAPACITY: usize = 4;

/// Snapshot of an array header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ArrayView {
    pub(crate) data: ArenaAddr,
    pub(crate) len: usize,
}

impl ArrayView {
    pub(crate) const EMPTY: Self = Self {
        data: ArenaAddr::NULL,
        len: 0,
    };

    pub(crate) const fn element(self, index: usize, elem_size: usize) -> ArenaAddr {
        self.data.add(index * elem_size)
    }
}

/// Current contents of the repeated field at `slot`.
pub(crate) fn view(arena: &Arena, slot: FieldAddress) -> ArrayView {
    let header = slot.read_ptr(arena);
    if header.is_null() {
        return ArrayView::EMPTY;
    }
    let word = arena.width().bytes();
    ArrayView {
        data: arena.read_ptr(header),
        len: arena.read_size(header.add(word)),
    }
}

/// Like [`view`], but `None` when the header or data lies outside the arena.
pub(crate) fn try_view(arena: &Arena, slot: FieldAddress, elem_size: usize) -> Option<ArrayView> {
    let header = ArenaAddr::from_raw(arena.try_read_word(slot.addr())?);
    if header.is_null() {
        return Some(ArrayView::EMPTY);
    }
    let word = arena.width().bytes();
    if !arena.contains(header, HEADER_WORDS * word) {
        return None;
    }
    let view = ArrayView {
        data: arena.read_ptr(header),
        len: arena.read_size(header.add(word)),
    };
    let bytes = view.len.checked_mul(elem_size)?;
    if view.len > 0 && !arena.contains(view.data, bytes) {
        return None;
    }
    Some(view)
}

fn ensure_header(arena: &mut Arena, slot: FieldAddress) -> Result<ArenaAddr> {
    let header = slot.read_ptr(arena);
    if !header.is_null() {
        return Ok(header);
    }
    let header = arena.allocate(HEADER_WORDS * arena.width().bytes())?;
    slot.write_ptr(arena, header);
    Ok(header)
}

/// Append one zeroed element and return its address.
pub(crate) fn push(arena: &mut Arena, slot: FieldAddress, elem_size: usize) -> Result<ArenaAddr> {
    let header = ensure_header(arena, slot)?;
    let word = arena.width().bytes();
    let mut data = arena.read_ptr(header);
    let len = arena.read_size(header.add(word));
    let capacity = arena.read_size(header.add(2 * word));

    if len == capacity {
        let new_capacity = (capacity * 2).max(MIN_CAPACITY);
        data = arena.reallocate(data, len * elem_size, new_capacity * elem_size)?;
        arena.write_ptr(header, data);
        arena.write_size(header.add(2 * word), new_capacity);
    }

    let element = data.add(len * elem_size);
    arena.bytes_mut(element, elem_size).fill(0);
    arena.write_size(header.add(word), len + 1);
    Ok(element)
}

/// Set the length to zero, keeping the allocation.
pub(crate) fn clear(arena: &mut Arena, slot: FieldAddress) {
    let header = slot.read_ptr(arena);
    if !header.is_null() {
        let word = arena.width().bytes();
        arena.write_size(header.add(word), 0);
    }
}
