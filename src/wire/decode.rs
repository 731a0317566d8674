//! Wire decoder.
//!
//! Walks the buffer record by record, looks each field number up in the
//! message layout and writes the value into the arena. Records the layout
//! does not describe, or whose wire type does not fit the declared field
//! type, are copied verbatim into the message's unknown-field buffer.
//!
//! A oneof member records its field number in the oneof's case slot. When
//! the case switches to a submessage member, decoding starts a fresh
//! submessage instead of merging into whatever that slot held before.
//!
//! Offsets in [`Error::MalformedWireInput`] are relative to the start of the
//! top-level buffer, including for failures inside nested submessages.

use tracing::{debug, instrument, trace};

use super::WireType;
use super::varint::{decode_tag, decode_varint, decode_zigzag32, decode_zigzag64};
use crate::arena::{Arena, ArenaAddr};
use crate::config::DecodeOptions;
use crate::error::{Error, Result, SchemaError, WireError};
use crate::layout::{FieldLayout, MessageLayout, Schema, element_size};
use crate::message::{FieldAddress, Message, array};
use crate::metrics::{Direction, Metrics};
use crate::mini_table::{FieldType, MiniTableRef};

/// Decode `buf` into a new message of type `table` using default options.
///
/// On failure no message is returned. Memory already taken from `arena`
/// stays allocated until the arena is dropped.
pub fn decode(
    buf: &[u8],
    schema: &Schema,
    table: MiniTableRef,
    arena: &mut Arena,
) -> Result<Message> {
    decode_with(buf, schema, table, arena, &DecodeOptions::default())
}

/// [`decode`] with explicit options.
pub fn decode_with(
    buf: &[u8],
    schema: &Schema,
    table: MiniTableRef,
    arena: &mut Arena,
    options: &DecodeOptions,
) -> Result<Message> {
    schema.check_arena(arena)?;
    let msg = Message::new(arena, schema.layout(table)?)?;
    decode_into(buf, msg, schema, table, arena, options)?;
    Ok(msg)
}

/// Merge `buf` into an existing message.
///
/// Scalars are overwritten, submessages merged recursively, repeated fields
/// appended to. If this returns an error `msg` may hold a partial merge and
/// must be discarded.
#[instrument(level = "trace", skip(buf, schema, arena, options), fields(len = buf.len()))]
pub fn decode_into(
    buf: &[u8],
    msg: Message,
    schema: &Schema,
    table: MiniTableRef,
    arena: &mut Arena,
    options: &DecodeOptions,
) -> Result<()> {
    let result = run(buf, msg, schema, table, arena, options);
    match &result {
        Ok(()) => Metrics::record_message(Direction::Decode, buf.len()),
        Err(err) => {
            Metrics::record_error(Direction::Decode);
            debug!(error = %err, "decode failed");
        }
    }
    result
}

fn run(
    buf: &[u8],
    msg: Message,
    schema: &Schema,
    table: MiniTableRef,
    arena: &mut Arena,
    options: &DecodeOptions,
) -> Result<()> {
    schema.check_arena(arena)?;
    let layout = schema.layout(table)?;
    let mut decoder = Decoder {
        buf,
        schema,
        arena,
        options,
    };
    decoder.message(msg, layout, 0, buf.len(), 0)
}

/// Whether a record of `wire_type` can populate `field`.
fn accepts(field: &FieldLayout, wire_type: WireType) -> bool {
    let field_type = field.field_type;
    wire_type == field_type.wire_type()
        || (field.is_repeated() && field_type.is_packable() && wire_type == WireType::Delimited)
}

/// Map a raw wire value to its in-memory representation.
fn convert(field_type: FieldType, raw: u64) -> u64 {
    match field_type {
        FieldType::Bool => u64::from(raw != 0),
        FieldType::SInt32 => u64::from(decode_zigzag32(raw as u32) as u32),
        FieldType::SInt64 => decode_zigzag64(raw) as u64,
        _ => raw,
    }
}

struct Decoder<'a> {
    buf: &'a [u8],
    schema: &'a Schema,
    arena: &'a mut Arena,
    options: &'a DecodeOptions,
}

impl<'a> Decoder<'a> {
    fn message(
        &mut self,
        msg: Message,
        layout: &'a MessageLayout,
        mut pos: usize,
        end: usize,
        depth: u32,
    ) -> Result<()> {
        while pos < end {
            let field_start = pos;
            let (number, wire_type, len) =
                decode_tag(&self.buf[pos..end]).map_err(|kind| Error::malformed(pos, kind))?;
            pos += len;

            if wire_type == WireType::EndGroup {
                return Err(Error::malformed(
                    field_start,
                    WireError::UnmatchedEndGroup(number),
                ));
            }

            let known = layout
                .find_by_number(number)
                .and_then(|index| layout.field(index))
                .filter(|field| accepts(field, wire_type));
            pos = match known {
                Some(field) => self.field(msg, layout, field, wire_type, pos, end, depth)?,
                None => {
                    let next = self.skip(number, wire_type, pos, end, depth)?;
                    self.preserve(msg, field_start, next)?;
                    next
                }
            };
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn field(
        &mut self,
        msg: Message,
        layout: &'a MessageLayout,
        field: &'a FieldLayout,
        wire_type: WireType,
        pos: usize,
        end: usize,
        depth: u32,
    ) -> Result<usize> {
        let width = self.arena.width();
        let slot = FieldAddress::new(msg.addr().add(field.offset(width)));
        let field_type = field.field_type;
        let switching = field
            .oneof
            .is_some_and(|oneof| msg.oneof_case(self.arena, layout, oneof) != field.number);

        let next = match (field_type, field.is_repeated()) {
            (FieldType::Message, false) => {
                let (start, stop) = self.delimited(pos, end)?;
                let existing = if switching {
                    ArenaAddr::NULL
                } else {
                    slot.read_ptr(self.arena)
                };
                let child = if existing.is_null() {
                    let child = self.new_child(layout, field)?;
                    slot.write_ptr(self.arena, child.addr());
                    child
                } else {
                    Message::from_addr(existing)
                };
                self.submessage(child, layout, field, start, stop, depth)?;
                stop
            }
            (FieldType::Message, true) => {
                let (start, stop) = self.delimited(pos, end)?;
                let child = self.new_child(layout, field)?;
                let at = array::push(self.arena, slot, width.bytes())?;
                self.arena.write_ptr(at, child.addr());
                self.submessage(child, layout, field, start, stop, depth)?;
                stop
            }
            (FieldType::String | FieldType::Bytes, false) => {
                let (start, stop) = self.delimited(pos, end)?;
                self.string(slot, field, start, stop)?;
                stop
            }
            (FieldType::String | FieldType::Bytes, true) => {
                let (start, stop) = self.delimited(pos, end)?;
                let at = array::push(self.arena, slot, element_size(field_type, width))?;
                self.string(FieldAddress::new(at), field, start, stop)?;
                stop
            }
            (_, false) => {
                let (value, next) = self.scalar(field_type, pos, end)?;
                slot.write_raw(self.arena, element_size(field_type, width), value);
                next
            }
            (_, true) if wire_type == WireType::Delimited => self.packed(slot, field, pos, end)?,
            (_, true) => {
                let (value, next) = self.scalar(field_type, pos, end)?;
                let elem_size = element_size(field_type, width);
                let at = array::push(self.arena, slot, elem_size)?;
                FieldAddress::new(at).write_raw(self.arena, elem_size, value);
                next
            }
        };

        if let Some(bit) = field.hasbit {
            msg.set_present(self.arena, layout, bit);
        }
        if let Some(oneof) = field.oneof {
            msg.set_oneof_case(self.arena, layout, oneof, field.number);
        }
        Ok(next)
    }

    fn sub_layout(
        &self,
        layout: &MessageLayout,
        field: &FieldLayout,
    ) -> Result<&'a MessageLayout> {
        let schema = self.schema;
        let table = field.submsg.ok_or_else(|| {
            Error::InvalidSchema(SchemaError::MissingSubmessage {
                message: layout.name().to_owned(),
                number: field.number,
            })
        })?;
        schema.layout(table)
    }

    fn new_child(&mut self, layout: &MessageLayout, field: &FieldLayout) -> Result<Message> {
        let sub = self.sub_layout(layout, field)?;
        Message::new(self.arena, sub)
    }

    fn submessage(
        &mut self,
        child: Message,
        layout: &MessageLayout,
        field: &FieldLayout,
        start: usize,
        stop: usize,
        depth: u32,
    ) -> Result<()> {
        if depth >= self.options.max_depth {
            return Err(Error::malformed(start, WireError::DepthLimitExceeded));
        }
        let sub = self.sub_layout(layout, field)?;
        self.message(child, sub, start, stop, depth + 1)
    }

    fn string(
        &mut self,
        at: FieldAddress,
        field: &FieldLayout,
        start: usize,
        stop: usize,
    ) -> Result<()> {
        let buf = self.buf;
        let payload = &buf[start..stop];
        if field.field_type == FieldType::String
            && self.options.check_utf8
            && std::str::from_utf8(payload).is_err()
        {
            return Err(Error::malformed(start, WireError::InvalidUtf8(field.number)));
        }
        let data = if payload.is_empty() {
            ArenaAddr::NULL
        } else {
            self.arena.copy_in(payload)?
        };
        at.write_view(self.arena, data, payload.len());
        Ok(())
    }

    fn packed(
        &mut self,
        slot: FieldAddress,
        field: &FieldLayout,
        pos: usize,
        end: usize,
    ) -> Result<usize> {
        let (start, stop) = self.delimited(pos, end)?;
        let field_type = field.field_type;
        if let Some(size) = field_type.wire_type().fixed_size() {
            let len = stop - start;
            if len % size != 0 {
                return Err(Error::malformed(
                    start,
                    WireError::PackedLengthMisaligned {
                        len,
                        elem_size: size,
                    },
                ));
            }
        }

        let elem_size = element_size(field_type, self.arena.width());
        let mut cursor = start;
        while cursor < stop {
            let (value, next) = self.scalar(field_type, cursor, stop)?;
            let at = array::push(self.arena, slot, elem_size)?;
            FieldAddress::new(at).write_raw(self.arena, elem_size, value);
            cursor = next;
        }
        Ok(stop)
    }

    fn scalar(&self, field_type: FieldType, pos: usize, end: usize) -> Result<(u64, usize)> {
        let (raw, next) = match field_type.wire_type() {
            WireType::Fixed32 => self.fixed(pos, end, 4)?,
            WireType::Fixed64 => self.fixed(pos, end, 8)?,
            _ => self.varint(pos, end)?,
        };
        Ok((convert(field_type, raw), next))
    }

    fn varint(&self, pos: usize, end: usize) -> Result<(u64, usize)> {
        decode_varint(&self.buf[pos..end])
            .map(|(value, len)| (value, pos + len))
            .map_err(|kind| Error::malformed(pos, kind))
    }

    fn fixed(&self, pos: usize, end: usize, size: usize) -> Result<(u64, usize)> {
        if end - pos < size {
            return Err(Error::malformed(pos, WireError::TruncatedFixed));
        }
        let value = self.buf[pos..pos + size]
            .iter()
            .rev()
            .fold(0u64, |acc, &byte| (acc << 8) | u64::from(byte));
        Ok((value, pos + size))
    }

    /// Bounds of a length-delimited payload.
    fn delimited(&self, pos: usize, end: usize) -> Result<(usize, usize)> {
        let (len, start) = self.varint(pos, end)?;
        let remaining = end - start;
        if len > remaining as u64 {
            return Err(Error::malformed(
                pos,
                WireError::LengthExceedsBuffer { len, remaining },
            ));
        }
        Ok((start, start + len as usize))
    }

    fn skip(
        &self,
        number: u32,
        wire_type: WireType,
        pos: usize,
        end: usize,
        depth: u32,
    ) -> Result<usize> {
        match wire_type {
            WireType::Varint => Ok(self.varint(pos, end)?.1),
            WireType::Fixed32 => Ok(self.fixed(pos, end, 4)?.1),
            WireType::Fixed64 => Ok(self.fixed(pos, end, 8)?.1),
            WireType::Delimited => Ok(self.delimited(pos, end)?.1),
            WireType::StartGroup => self.skip_group(number, pos, end, depth + 1),
            WireType::EndGroup => Err(Error::malformed(pos, WireError::UnmatchedEndGroup(number))),
        }
    }

    fn skip_group(&self, group: u32, mut pos: usize, end: usize, depth: u32) -> Result<usize> {
        if depth > self.options.max_depth {
            return Err(Error::malformed(pos, WireError::DepthLimitExceeded));
        }
        while pos < end {
            let tag_start = pos;
            let (number, wire_type, len) =
                decode_tag(&self.buf[pos..end]).map_err(|kind| Error::malformed(pos, kind))?;
            pos += len;
            if wire_type == WireType::EndGroup {
                if number == group {
                    return Ok(pos);
                }
                return Err(Error::malformed(
                    tag_start,
                    WireError::UnmatchedEndGroup(number),
                ));
            }
            pos = self.skip(number, wire_type, pos, end, depth)?;
        }
        Err(Error::malformed(pos, WireError::UnterminatedGroup(group)))
    }

    fn preserve(&mut self, msg: Message, start: usize, stop: usize) -> Result<()> {
        Metrics::record_unknown_field();
        if self.options.discard_unknown {
            return Ok(());
        }
        trace!(offset = start, len = stop - start, "preserving unknown field");
        let buf = self.buf;
        msg.append_unknown(self.arena, &buf[start..stop])
    }
}
