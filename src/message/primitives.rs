//! Raw typed reads and writes at a computed field address.

use crate::arena::{Arena, ArenaAddr};
use crate::error::Result;

/// `message address + field offset`, computed for one pointer width.
///
/// Carries no type information: reading it as the wrong kind reinterprets
/// whatever bytes are there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldAddress(ArenaAddr);

impl FieldAddress {
    /// Wrap an arena address.
    #[must_use]
    pub const fn new(addr: ArenaAddr) -> Self {
        Self(addr)
    }

    /// Underlying arena address.
    #[must_use]
    pub const fn addr(self) -> ArenaAddr {
        self.0
    }

    /// Read a one-byte boolean (any non-zero byte is `true`).
    #[must_use]
    pub fn read_bool(self, arena: &Arena) -> bool {
        arena.read_u8(self.0) != 0
    }

    /// Write a boolean as exactly 0 or 1.
    pub fn write_bool(self, arena: &mut Arena, value: bool) {
        arena.write_u8(self.0, u8::from(value));
    }

    /// Read an `int32`-class value.
    #[must_use]
    pub fn read_i32(self, arena: &Arena) -> i32 {
        arena.read_u32(self.0) as i32
    }

    /// Write an `int32`-class value.
    pub fn write_i32(self, arena: &mut Arena, value: i32) {
        arena.write_u32(self.0, value as u32);
    }

    /// Read a `uint32`-class value.
    #[must_use]
    pub fn read_u32(self, arena: &Arena) -> u32 {
        arena.read_u32(self.0)
    }

    /// Write a `uint32`-class value.
    pub fn write_u32(self, arena: &mut Arena, value: u32) {
        arena.write_u32(self.0, value);
    }

    /// Read an `int64`-class value.
    #[must_use]
    pub fn read_i64(self, arena: &Arena) -> i64 {
        arena.read_u64(self.0) as i64
    }

    /// Write an `int64`-class value.
    pub fn write_i64(self, arena: &mut Arena, value: i64) {
        arena.write_u64(self.0, value as u64);
    }

    /// Read a `uint64`-class value.
    #[must_use]
    pub fn read_u64(self, arena: &Arena) -> u64 {
        arena.read_u64(self.0)
    }

    /// Write a `uint64`-class value.
    pub fn write_u64(self, arena: &mut Arena, value: u64) {
        arena.write_u64(self.0, value);
    }

    /// Read a `float`.
    #[must_use]
    pub fn read_f32(self, arena: &Arena) -> f32 {
        f32::from_bits(arena.read_u32(self.0))
    }

    /// Write a `float`.
    pub fn write_f32(self, arena: &mut Arena, value: f32) {
        arena.write_u32(self.0, value.to_bits());
    }

    /// Read a `double`.
    #[must_use]
    pub fn read_f64(self, arena: &Arena) -> f64 {
        f64::from_bits(arena.read_u64(self.0))
    }

    /// Write a `double`.
    pub fn write_f64(self, arena: &mut Arena, value: f64) {
        arena.write_u64(self.0, value.to_bits());
    }

    /// Read a string view. Unset views read as empty.
    #[must_use]
    pub fn read_string(self, arena: &Arena) -> &[u8] {
        let data = arena.read_ptr(self.0);
        let len = arena.read_size(self.0.add(arena.width().bytes()));
        if data.is_null() || len == 0 {
            return &[];
        }
        arena.bytes(data, len)
    }

    /// Copy `bytes` into the arena and point the view at the copy.
    ///
    /// Text is stored as its UTF-8 bytes; no validation happens here.
    pub fn write_string(self, arena: &mut Arena, bytes: &[u8]) -> Result<()> {
        let data = if bytes.is_empty() {
            ArenaAddr::NULL
        } else {
            arena.copy_in(bytes)?
        };
        self.write_view(arena, data, bytes.len());
        Ok(())
    }

    pub(crate) fn write_view(self, arena: &mut Arena, data: ArenaAddr, len: usize) {
        arena.write_ptr(self.0, data);
        arena.write_size(self.0.add(arena.width().bytes()), len);
    }

    /// Read a pointer slot (submessage or repeated-field header).
    #[must_use]
    pub fn read_ptr(self, arena: &Arena) -> ArenaAddr {
        arena.read_ptr(self.0)
    }

    /// Write a pointer slot.
    pub fn write_ptr(self, arena: &mut Arena, target: ArenaAddr) {
        arena.write_ptr(self.0, target);
    }

    /// Read `size` bytes (1, 4 or 8) as a zero-extended integer.
    pub(crate) fn read_raw(self, arena: &Arena, size: usize) -> u64 {
        match size {
            1 => u64::from(arena.read_u8(self.0)),
            4 => u64::from(arena.read_u32(self.0)),
            _ => arena.read_u64(self.0),
        }
    }

    /// Write the low `size` bytes (1, 4 or 8) of `value`.
    pub(crate) fn write_raw(self, arena: &mut Arena, size: usize, value: u64) {
        match size {
            1 => arena.write_u8(self.0, u8::from(value != 0)),
            4 => arena.write_u32(self.0, value as u32),
            _ => arena.write_u64(self.0, value),
        }
    }
}
