//! Runtime configuration threaded through the arena, layout resolver and codecs.

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Pointer width of the in-memory message representation.
///
/// Chosen once (usually [`PointerWidth::host`]) and handed to every component
/// that computes or follows offsets. Mixing widths corrupts field access, so
/// codecs refuse an arena and a schema configured differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum PointerWidth {
    /// 4-byte pointers and sizes
    Bits32,
    /// 8-byte pointers and sizes
    Bits64,
}

impl PointerWidth {
    /// Width of the running target.
    #[must_use]
    pub const fn host() -> Self {
        if cfg!(target_pointer_width = "32") {
            Self::Bits32
        } else {
            Self::Bits64
        }
    }

    /// Size in bytes of a pointer (and of a size slot).
    #[must_use]
    pub const fn bytes(self) -> usize {
        self.select(4, 8)
    }

    /// Pick the 32-bit or 64-bit variant of a size or offset.
    #[must_use]
    pub const fn select(self, size32: usize, size64: usize) -> usize {
        match self {
            Self::Bits32 => size32,
            Self::Bits64 => size64,
        }
    }

    /// Largest address an arena of this width may hand out.
    #[must_use]
    pub const fn max_address(self) -> u64 {
        match self {
            Self::Bits32 => u32::MAX as u64,
            Self::Bits64 => u64::MAX,
        }
    }
}

impl Default for PointerWidth {
    fn default() -> Self {
        Self::host()
    }
}

impl fmt::Display for PointerWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bits32 => write!(f, "32-bit"),
            Self::Bits64 => write!(f, "64-bit"),
        }
    }
}

/// Arena growth parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ArenaConfig {
    /// Capacity of the first block in bytes.
    pub initial_block_size: usize,
    /// Blocks double in size up to this cap (single oversized requests still get their own block).
    pub max_block_size: usize,
    /// Hard limit on the bytes an arena may reserve, if any.
    pub max_total_bytes: Option<usize>,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            initial_block_size: 256,
            max_block_size: 1024 * 1024,
            max_total_bytes: None,
        }
    }
}

/// Decoder options.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct DecodeOptions {
    /// Maximum submessage/group nesting.
    pub max_depth: u32,
    /// Reject `string` fields whose payload is not UTF-8.
    pub check_utf8: bool,
    /// Drop unknown fields instead of keeping them for re-encoding.
    pub discard_unknown: bool,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            max_depth: 64,
            check_utf8: true,
            discard_unknown: false,
        }
    }
}

/// Encoder options.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct EncodeOptions {
    /// Maximum submessage nesting; also bounds cyclic graphs.
    pub max_depth: u32,
    /// Leave preserved unknown fields out of the output.
    pub skip_unknown: bool,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            max_depth: 64,
            skip_unknown: false,
        }
    }
}

/// Complete runtime configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RuntimeConfig {
    /// Pointer width used by layouts and arenas.
    pub pointer_width: PointerWidth,
    /// Arena growth parameters.
    pub arena: ArenaConfig,
    /// Decoder options.
    pub decode: DecodeOptions,
    /// Encoder options.
    pub encode: EncodeOptions,
}

impl RuntimeConfig {
    /// Configuration for an explicit pointer width, defaults elsewhere.
    #[must_use]
    pub fn with_pointer_width(pointer_width: PointerWidth) -> Self {
        Self {
            pointer_width,
            ..Self::default()
        }
    }
}
