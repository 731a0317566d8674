//! Bump arena backing every message, string and repeated-field buffer.
//!
//! An [`Arena`] is a list of separately owned blocks laid end to end in a
//! private linear address space. Allocations hand out [`ArenaAddr`] values
//! in that space rather than Rust references, so message slots can hold
//! "pointers" to other arena memory as plain integers of the configured
//! [`PointerWidth`]. Blocks are never resized or moved: an address stays
//! valid until the arena itself is dropped.
//!
//! Resolving an address that lies outside the allocated part of any block
//! is a caller bug and panics. The `try_*` variants report `None` instead;
//! the encoder uses them to detect dangling pointers.

use std::fmt;

use tracing::trace;

use crate::config::{ArenaConfig, PointerWidth, RuntimeConfig};
use crate::error::{Error, Result};
use crate::metrics::Metrics;

/// Alignment of every allocation and block base.
pub const ALIGN: usize = 8;

/// Address of a byte inside an [`Arena`]. Zero is the null pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ArenaAddr(u64);

impl ArenaAddr {
    /// The null address.
    pub const NULL: Self = Self(0);

    /// Wrap a raw address value.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw address value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Whether this is the null address.
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Address `bytes` past this one.
    #[must_use]
    pub const fn add(self, bytes: usize) -> Self {
        Self(self.0 + bytes as u64)
    }

    /// Address `bytes` before this one.
    #[must_use]
    pub const fn sub(self, bytes: usize) -> Self {
        Self(self.0 - bytes as u64)
    }
}

impl fmt::Display for ArenaAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

struct Block {
    base: u64,
    data: Box<[u8]>,
    used: usize,
}

impl Block {
    fn bump(&mut self, size: usize) -> Option<usize> {
        let start = align_up(self.used, ALIGN);
        let end = start.checked_add(size)?;
        if end > self.data.len() {
            return None;
        }
        self.used = end;
        Some(start)
    }

    fn end(&self) -> u64 {
        self.base + self.data.len() as u64
    }
}

/// Owning region for a message graph.
pub struct Arena {
    blocks: Vec<Block>,
    width: PointerWidth,
    config: ArenaConfig,
    reserved: usize,
}

impl Arena {
    /// Create an empty arena with default growth parameters.
    #[must_use]
    pub fn new(width: PointerWidth) -> Self {
        Self::with_config(width, ArenaConfig::default())
    }

    /// Create an empty arena with explicit growth parameters.
    #[must_use]
    pub fn with_config(width: PointerWidth, config: ArenaConfig) -> Self {
        Self {
            blocks: Vec::new(),
            width,
            config,
            reserved: 0,
        }
    }

    /// Create an arena from a full runtime configuration.
    #[must_use]
    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self::with_config(config.pointer_width, config.arena.clone())
    }

    /// Pointer width of slots written by this arena.
    #[must_use]
    pub const fn width(&self) -> PointerWidth {
        self.width
    }

    /// Number of blocks reserved so far.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Bytes handed out (including alignment padding).
    #[must_use]
    pub fn allocated_bytes(&self) -> usize {
        self.blocks.iter().map(|block| block.used).sum()
    }

    /// Bytes reserved across all blocks.
    #[must_use]
    pub const fn reserved_bytes(&self) -> usize {
        self.reserved
    }

    /// Allocate `size` zeroed bytes.
    pub fn allocate(&mut self, size: usize) -> Result<ArenaAddr> {
        let size = align_up(size.max(1), ALIGN);
        if let Some(addr) = self.bump(size) {
            return Ok(addr);
        }

        self.grow(size)?;
        self.bump(size).ok_or(Error::AllocationFailure {
            requested: size,
            limit: self.reserved,
        })
    }

    fn bump(&mut self, size: usize) -> Option<ArenaAddr> {
        let block = self.blocks.last_mut()?;
        let start = block.bump(size)?;
        Some(ArenaAddr(block.base + start as u64))
    }

    /// Allocate `new_size` bytes and copy the first `old_size` bytes of `addr` into them.
    ///
    /// The old region is not reclaimed.
    pub fn reallocate(
        &mut self,
        addr: ArenaAddr,
        old_size: usize,
        new_size: usize,
    ) -> Result<ArenaAddr> {
        let new_addr = self.allocate(new_size)?;
        let keep = old_size.min(new_size);
        if !addr.is_null() && keep > 0 {
            let saved = self.bytes(addr, keep).to_vec();
            self.bytes_mut(new_addr, keep).copy_from_slice(&saved);
        }
        Ok(new_addr)
    }

    /// Copy `data` into a fresh allocation.
    pub fn copy_in(&mut self, data: &[u8]) -> Result<ArenaAddr> {
        let addr = self.allocate(data.len())?;
        self.bytes_mut(addr, data.len()).copy_from_slice(data);
        Ok(addr)
    }

    /// Release all memory at once.
    pub fn destroy(self) {
        trace!(
            blocks = self.blocks.len(),
            reserved = self.reserved,
            "destroying arena"
        );
    }

    fn grow(&mut self, size: usize) -> Result<()> {
        let last_capacity = self.blocks.last().map_or(0, |block| block.data.len());
        let mut capacity = if last_capacity == 0 {
            self.config.initial_block_size
        } else {
            last_capacity
                .saturating_mul(2)
                .min(self.config.max_block_size)
        };
        capacity = align_up(capacity.max(size), ALIGN);

        let limit = self.config.max_total_bytes.unwrap_or(usize::MAX);
        if self.reserved.saturating_add(capacity) > limit {
            if self.reserved.saturating_add(size) > limit {
                return Err(Error::AllocationFailure {
                    requested: size,
                    limit,
                });
            }
            capacity = size;
        }

        let base = self.blocks.last().map_or(ALIGN as u64, Block::end);
        let end = base.checked_add(capacity as u64);
        let max_address = self.width.max_address();
        if end.is_none_or(|end| end > max_address) {
            return Err(Error::AllocationFailure {
                requested: size,
                limit: usize::try_from(max_address).unwrap_or(usize::MAX),
            });
        }

        trace!(base, capacity, blocks = self.blocks.len() + 1, "arena block added");
        Metrics::record_arena_block(capacity);

        self.reserved += capacity;
        self.blocks.push(Block {
            base,
            data: vec![0u8; capacity].into_boxed_slice(),
            used: 0,
        });
        Ok(())
    }

    fn locate(&self, addr: ArenaAddr, len: usize) -> Option<(usize, usize)> {
        if addr.is_null() {
            return None;
        }
        let index = self
            .blocks
            .partition_point(|block| block.base <= addr.0)
            .checked_sub(1)?;
        let block = &self.blocks[index];
        let start = usize::try_from(addr.0 - block.base).ok()?;
        let end = start.checked_add(len)?;
        (end <= block.used).then_some((index, start))
    }

    /// Whether `[addr, addr + len)` lies inside allocated arena memory.
    #[must_use]
    pub fn contains(&self, addr: ArenaAddr, len: usize) -> bool {
        self.locate(addr, len).is_some()
    }

    /// Borrow `len` bytes at `addr`, or `None` if the range is not allocated.
    #[must_use]
    pub fn try_bytes(&self, addr: ArenaAddr, len: usize) -> Option<&[u8]> {
        let (index, start) = self.locate(addr, len)?;
        Some(&self.blocks[index].data[start..start + len])
    }

    /// Borrow `len` bytes at `addr`.
    ///
    /// # Panics
    ///
    /// Panics if the range is not allocated memory of this arena.
    #[must_use]
    pub fn bytes(&self, addr: ArenaAddr, len: usize) -> &[u8] {
        self.try_bytes(addr, len)
            .unwrap_or_else(|| panic!("arena access out of bounds: {addr} + {len}"))
    }

    /// Mutably borrow `len` bytes at `addr`.
    ///
    /// # Panics
    ///
    /// Panics if the range is not allocated memory of this arena.
    pub fn bytes_mut(&mut self, addr: ArenaAddr, len: usize) -> &mut [u8] {
        let (index, start) = self
            .locate(addr, len)
            .unwrap_or_else(|| panic!("arena access out of bounds: {addr} + {len}"));
        &mut self.blocks[index].data[start..start + len]
    }

    fn array<const N: usize>(&self, addr: ArenaAddr) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(self.bytes(addr, N));
        out
    }

    /// Read one byte.
    #[must_use]
    pub fn read_u8(&self, addr: ArenaAddr) -> u8 {
        self.bytes(addr, 1)[0]
    }

    /// Write one byte.
    pub fn write_u8(&mut self, addr: ArenaAddr, value: u8) {
        self.bytes_mut(addr, 1)[0] = value;
    }

    /// Read a little-endian `u32`.
    #[must_use]
    pub fn read_u32(&self, addr: ArenaAddr) -> u32 {
        u32::from_le_bytes(self.array(addr))
    }

    /// Write a little-endian `u32`.
    pub fn write_u32(&mut self, addr: ArenaAddr, value: u32) {
        self.bytes_mut(addr, 4).copy_from_slice(&value.to_le_bytes());
    }

    /// Read a little-endian `u64`.
    #[must_use]
    pub fn read_u64(&self, addr: ArenaAddr) -> u64 {
        u64::from_le_bytes(self.array(addr))
    }

    /// Write a little-endian `u64`.
    pub fn write_u64(&mut self, addr: ArenaAddr, value: u64) {
        self.bytes_mut(addr, 8).copy_from_slice(&value.to_le_bytes());
    }

    /// Read a pointer-width word (pointer or size slot).
    #[must_use]
    pub fn read_word(&self, addr: ArenaAddr) -> u64 {
        match self.width {
            PointerWidth::Bits32 => u64::from(self.read_u32(addr)),
            PointerWidth::Bits64 => self.read_u64(addr),
        }
    }

    /// Read a pointer-width word, or `None` if the slot itself is out of bounds.
    #[must_use]
    pub fn try_read_word(&self, addr: ArenaAddr) -> Option<u64> {
        let raw = self.try_bytes(addr, self.width.bytes())?;
        Some(match self.width {
            PointerWidth::Bits32 => u64::from(u32::from_le_bytes(raw.try_into().ok()?)),
            PointerWidth::Bits64 => u64::from_le_bytes(raw.try_into().ok()?),
        })
    }

    /// Write a pointer-width word.
    ///
    /// Values are truncated to the slot width; arena addresses and sizes
    /// always fit because a 32-bit arena never grows past `u32::MAX`.
    pub fn write_word(&mut self, addr: ArenaAddr, value: u64) {
        match self.width {
            PointerWidth::Bits32 => {
                debug_assert!(u32::try_from(value).is_ok(), "word exceeds 32 bits");
                self.write_u32(addr, value as u32);
            }
            PointerWidth::Bits64 => self.write_u64(addr, value),
        }
    }

    /// Read a pointer slot.
    #[must_use]
    pub fn read_ptr(&self, addr: ArenaAddr) -> ArenaAddr {
        ArenaAddr(self.read_word(addr))
    }

    /// Write a pointer slot.
    pub fn write_ptr(&mut self, addr: ArenaAddr, target: ArenaAddr) {
        self.write_word(addr, target.0);
    }

    /// Read a size slot.
    #[must_use]
    pub fn read_size(&self, addr: ArenaAddr) -> usize {
        usize::try_from(self.read_word(addr)).unwrap_or(usize::MAX)
    }

    /// Write a size slot.
    pub fn write_size(&mut self, addr: ArenaAddr, size: usize) {
        self.write_word(addr, size as u64);
    }
}

impl fmt::Debug for Arena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arena")
            .field("width", &self.width)
            .field("blocks", &self.blocks.len())
            .field("reserved", &self.reserved)
            .finish_non_exhaustive()
    }
}

/// Round `value` up to a multiple of `align` (a power of two).
#[must_use]
pub const fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}
