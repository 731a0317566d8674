//! Process-wide codec and arena counters.
//!
//! Counters are relaxed atomics: cheap to bump from any thread, and only
//! meaningful as a snapshot.

use std::sync::atomic::{AtomicU64, Ordering};

/// Internal recorder used by the arena and codecs.
pub(crate) struct Metrics;

static MESSAGES_DECODED: AtomicU64 = AtomicU64::new(0);
static MESSAGES_ENCODED: AtomicU64 = AtomicU64::new(0);
static BYTES_DECODED: AtomicU64 = AtomicU64::new(0);
static BYTES_ENCODED: AtomicU64 = AtomicU64::new(0);
static DECODE_ERRORS: AtomicU64 = AtomicU64::new(0);
static ENCODE_ERRORS: AtomicU64 = AtomicU64::new(0);
static UNKNOWN_FIELDS: AtomicU64 = AtomicU64::new(0);
static ARENA_BLOCKS: AtomicU64 = AtomicU64::new(0);
static ARENA_BYTES_RESERVED: AtomicU64 = AtomicU64::new(0);
static ARENA_BLOCK_MAX: AtomicU64 = AtomicU64::new(0);

/// Codec direction.
#[derive(Clone, Copy, Debug)]
pub(crate) enum Direction {
    Decode,
    Encode,
}

impl Metrics {
    #[inline]
    pub(crate) fn record_message(direction: Direction, bytes: usize) {
        let bytes = bytes as u64;
        match direction {
            Direction::Decode => {
                MESSAGES_DECODED.fetch_add(1, Ordering::Relaxed);
                BYTES_DECODED.fetch_add(bytes, Ordering::Relaxed);
            }
            Direction::Encode => {
                MESSAGES_ENCODED.fetch_add(1, Ordering::Relaxed);
                BYTES_ENCODED.fetch_add(bytes, Ordering::Relaxed);
            }
        }
    }

    #[inline]
    pub(crate) fn record_error(direction: Direction) {
        match direction {
            Direction::Decode => DECODE_ERRORS.fetch_add(1, Ordering::Relaxed),
            Direction::Encode => ENCODE_ERRORS.fetch_add(1, Ordering::Relaxed),
        };
    }

    #[inline]
    pub(crate) fn record_unknown_field() {
        UNKNOWN_FIELDS.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_arena_block(capacity: usize) {
        let capacity = capacity as u64;
        ARENA_BLOCKS.fetch_add(1, Ordering::Relaxed);
        ARENA_BYTES_RESERVED.fetch_add(capacity, Ordering::Relaxed);
        update_max(&ARENA_BLOCK_MAX, capacity);
    }

    #[inline]
    pub(crate) fn totals() -> MetricsSnapshot {
        MetricsSnapshot {
            messages_decoded: MESSAGES_DECODED.load(Ordering::Relaxed),
            messages_encoded: MESSAGES_ENCODED.load(Ordering::Relaxed),
            bytes_decoded: BYTES_DECODED.load(Ordering::Relaxed),
            bytes_encoded: BYTES_ENCODED.load(Ordering::Relaxed),
            decode_errors: DECODE_ERRORS.load(Ordering::Relaxed),
            encode_errors: ENCODE_ERRORS.load(Ordering::Relaxed),
            unknown_fields: UNKNOWN_FIELDS.load(Ordering::Relaxed),
            arena_blocks: ARENA_BLOCKS.load(Ordering::Relaxed),
            arena_bytes_reserved: ARENA_BYTES_RESERVED.load(Ordering::Relaxed),
            arena_block_max: ARENA_BLOCK_MAX.load(Ordering::Relaxed),
        }
    }
}

fn update_max(target: &AtomicU64, candidate: u64) {
    let mut current = target.load(Ordering::Relaxed);
    while candidate > current {
        match target.compare_exchange_weak(
            current,
            candidate,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => return,
            Err(old) => current = old,
        }
    }
}

/// Lightweight snapshot of the process-wide counters.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Successful top-level decodes
    pub messages_decoded: u64,
    /// Successful top-level encodes
    pub messages_encoded: u64,
    /// Input bytes consumed by successful decodes
    pub bytes_decoded: u64,
    /// Output bytes produced by successful encodes
    pub bytes_encoded: u64,
    /// Rejected decode calls
    pub decode_errors: u64,
    /// Failed encode calls
    pub encode_errors: u64,
    /// Unknown fields captured by the decoder
    pub unknown_fields: u64,
    /// Arena blocks reserved
    pub arena_blocks: u64,
    /// Total capacity of those blocks
    pub arena_bytes_reserved: u64,
    /// Largest single block reserved
    pub arena_block_max: u64,
}

impl MetricsSnapshot {
    /// Mean encoded message size in bytes.
    #[must_use]
    pub fn avg_encoded_size(&self) -> Option<u64> {
        average(self.bytes_encoded, self.messages_encoded)
    }

    /// Mean decoded message size in bytes.
    #[must_use]
    pub fn avg_decoded_size(&self) -> Option<u64> {
        average(self.bytes_decoded, self.messages_decoded)
    }
}

fn average(total: u64, count: u64) -> Option<u64> {
    if count == 0 {
        return None;
    }
    Some(total / count)
}

/// Read the current counters.
#[must_use]
pub fn snapshot() -> MetricsSnapshot {
    Metrics::totals()
}
