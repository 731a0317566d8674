//! Wire encoder.
//!
//! Fields are emitted in ascending field-number order, followed by the
//! message's preserved unknown-field bytes.
//!
//! Output is produced back to front: the encoder walks fields in descending
//! order and appends every record reversed, writing a submessage's body
//! before its length prefix. Each byte is written once regardless of nesting
//! depth, and the buffer is flipped a single time at the end.
//!
//! Every pointer read from the message graph is bounds-checked against the
//! arena before it is followed, so a corrupted graph yields
//! [`EncodeError::DanglingPointer`] rather than a panic.

use bytes::Bytes;
use tracing::{debug, instrument};

use super::varint::{MAX_VARINT_LEN, encode_varint, encode_zigzag32, encode_zigzag64};
use super::{WireType, make_tag};
use crate::arena::{Arena, ArenaAddr};
use crate::config::{EncodeOptions, PointerWidth};
use crate::error::{EncodeError, Error, Result, SchemaError};
use crate::layout::{FieldLayout, MessageLayout, Schema, element_size};
use crate::message::{FieldAddress, Message, array};
use crate::metrics::{Direction, Metrics};
use crate::mini_table::{FieldType, MiniTableRef};

/// Serialize `msg` (of type `table`) using default options.
///
/// A message with nothing set encodes to an empty buffer.
pub fn encode(msg: Message, schema: &Schema, table: MiniTableRef, arena: &Arena) -> Result<Bytes> {
    encode_with(msg, schema, table, arena, &EncodeOptions::default())
}

/// [`encode`] with explicit options.
#[instrument(level = "trace", skip(schema, arena, options))]
pub fn encode_with(
    msg: Message,
    schema: &Schema,
    table: MiniTableRef,
    arena: &Arena,
    options: &EncodeOptions,
) -> Result<Bytes> {
    let result = run(msg, schema, table, arena, options);
    match &result {
        Ok(bytes) => Metrics::record_message(Direction::Encode, bytes.len()),
        Err(err) => {
            Metrics::record_error(Direction::Encode);
            debug!(error = %err, "encode failed");
        }
    }
    result
}

fn run(
    msg: Message,
    schema: &Schema,
    table: MiniTableRef,
    arena: &Arena,
    options: &EncodeOptions,
) -> Result<Bytes> {
    schema.check_arena(arena)?;
    let layout = schema.layout(table)?;
    let width = arena.width();
    if !arena.contains(msg.addr(), layout.size(width)) {
        return Err(dangling(0, msg.addr()));
    }

    let encoder = Encoder {
        schema,
        arena,
        options,
        width,
    };
    let mut out = ReverseBuf::with_capacity(layout.size(width));
    encoder.message(msg, layout, &mut out, 0)?;
    Ok(out.finish())
}

fn dangling(field: u32, addr: ArenaAddr) -> Error {
    Error::from(EncodeError::DanglingPointer {
        field,
        addr: addr.get(),
    })
}

/// Varint payload for a stored scalar.
fn varint_value(field_type: FieldType, raw: u64) -> u64 {
    match field_type {
        FieldType::Bool => u64::from(raw != 0),
        // int32 and enum sign-extend to ten bytes when negative
        FieldType::Int32 | FieldType::Enum => i64::from(raw as u32 as i32) as u64,
        FieldType::SInt32 => u64::from(encode_zigzag32(raw as u32 as i32)),
        FieldType::SInt64 => encode_zigzag64(raw as i64),
        _ => raw,
    }
}

/// Output buffer filled back to front.
struct ReverseBuf {
    bytes: Vec<u8>,
}

impl ReverseBuf {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(capacity),
        }
    }

    fn len(&self) -> usize {
        self.bytes.len()
    }

    fn put_slice(&mut self, data: &[u8]) {
        self.bytes.extend(data.iter().rev());
    }

    fn put_varint(&mut self, value: u64) {
        let mut scratch = [0u8; MAX_VARINT_LEN];
        let mut cursor = &mut scratch[..];
        encode_varint(value, &mut cursor);
        let len = MAX_VARINT_LEN - cursor.len();
        self.put_slice(&scratch[..len]);
    }

    fn put_tag(&mut self, number: u32, wire_type: WireType) {
        self.put_varint(u64::from(make_tag(number, wire_type)));
    }

    fn put_scalar(&mut self, field_type: FieldType, raw: u64) {
        match field_type.wire_type() {
            WireType::Fixed32 => self.put_slice(&(raw as u32).to_le_bytes()),
            WireType::Fixed64 => self.put_slice(&raw.to_le_bytes()),
            _ => self.put_varint(varint_value(field_type, raw)),
        }
    }

    /// Close a length-delimited record whose payload was written since
    /// `start`.
    fn close_delimited(&mut self, number: u32, start: usize) {
        let len = self.len() - start;
        self.put_varint(len as u64);
        self.put_tag(number, WireType::Delimited);
    }

    fn put_delimited(&mut self, number: u32, payload: &[u8]) {
        let start = self.len();
        self.put_slice(payload);
        self.close_delimited(number, start);
    }

    fn finish(mut self) -> Bytes {
        self.bytes.reverse();
        Bytes::from(self.bytes)
    }
}

struct Encoder<'a> {
    schema: &'a Schema,
    arena: &'a Arena,
    options: &'a EncodeOptions,
    width: PointerWidth,
}

impl<'a> Encoder<'a> {
    fn message(
        &self,
        msg: Message,
        layout: &MessageLayout,
        out: &mut ReverseBuf,
        depth: u32,
    ) -> Result<()> {
        if !self.options.skip_unknown {
            let unknown = msg
                .try_unknown_fields(self.arena)
                .ok_or(EncodeError::CorruptUnknownFields)?;
            out.put_slice(unknown);
        }
        for (_, field) in layout.by_number().rev() {
            self.field(msg, layout, field, out, depth)?;
        }
        Ok(())
    }

    /// Hasbit or oneof case, `None` when presence follows the value.
    fn explicit_presence(
        &self,
        msg: Message,
        layout: &MessageLayout,
        field: &FieldLayout,
    ) -> Option<bool> {
        if let Some(oneof) = field.oneof {
            return Some(msg.oneof_case(self.arena, layout, oneof) == field.number);
        }
        field.hasbit.map(|bit| msg.is_present(self.arena, layout, bit))
    }

    fn field(
        &self,
        msg: Message,
        layout: &MessageLayout,
        field: &FieldLayout,
        out: &mut ReverseBuf,
        depth: u32,
    ) -> Result<()> {
        let arena = self.arena;
        let slot = FieldAddress::new(msg.addr().add(field.offset(self.width)));
        let field_type = field.field_type;
        let number = field.number;

        match (field_type, field.is_repeated()) {
            (FieldType::Message, false) => {
                let inactive = field.oneof.is_some()
                    && self.explicit_presence(msg, layout, field) == Some(false);
                if inactive {
                    return Ok(());
                }
                let child = slot.read_ptr(arena);
                if !child.is_null() {
                    let sub = self.sub_layout(layout, field)?;
                    self.submessage(number, child, sub, out, depth)?;
                }
            }
            (FieldType::Message, true) => {
                let sub = self.sub_layout(layout, field)?;
                let word = self.width.bytes();
                let view = self.array(slot, number, word)?;
                for index in (0..view.len).rev() {
                    let child = arena.read_ptr(view.element(index, word));
                    self.submessage(number, child, sub, out, depth)?;
                }
            }
            (FieldType::String | FieldType::Bytes, false) => {
                let present = self.explicit_presence(msg, layout, field);
                if present == Some(false) {
                    return Ok(());
                }
                let bytes = self.string(slot, number)?;
                if present.unwrap_or(!bytes.is_empty()) {
                    out.put_delimited(number, bytes);
                }
            }
            (FieldType::String | FieldType::Bytes, true) => {
                let elem_size = element_size(field_type, self.width);
                let view = self.array(slot, number, elem_size)?;
                for index in (0..view.len).rev() {
                    let element = FieldAddress::new(view.element(index, elem_size));
                    let bytes = self.string(element, number)?;
                    out.put_delimited(number, bytes);
                }
            }
            (_, false) => {
                let raw = slot.read_raw(arena, element_size(field_type, self.width));
                let present = self
                    .explicit_presence(msg, layout, field)
                    .unwrap_or(raw != 0);
                if present {
                    out.put_scalar(field_type, raw);
                    out.put_tag(number, field_type.wire_type());
                }
            }
            (_, true) => {
                let elem_size = element_size(field_type, self.width);
                let view = self.array(slot, number, elem_size)?;
                if view.len == 0 {
                    return Ok(());
                }
                let values = (0..view.len).rev().map(|index| {
                    FieldAddress::new(view.element(index, elem_size)).read_raw(arena, elem_size)
                });
                if field.is_packed() {
                    let start = out.len();
                    for raw in values {
                        out.put_scalar(field_type, raw);
                    }
                    out.close_delimited(number, start);
                } else {
                    for raw in values {
                        out.put_scalar(field_type, raw);
                        out.put_tag(number, field_type.wire_type());
                    }
                }
            }
        }
        Ok(())
    }

    fn sub_layout(&self, layout: &MessageLayout, field: &FieldLayout) -> Result<&'a MessageLayout> {
        let schema = self.schema;
        let table = field.submsg.ok_or_else(|| {
            Error::InvalidSchema(SchemaError::MissingSubmessage {
                message: layout.name().to_owned(),
                number: field.number,
            })
        })?;
        schema.layout(table)
    }

    fn array(&self, slot: FieldAddress, number: u32, elem_size: usize) -> Result<array::ArrayView> {
        array::try_view(self.arena, slot, elem_size)
            .ok_or_else(|| dangling(number, slot.read_ptr(self.arena)))
    }

    fn string(&self, at: FieldAddress, number: u32) -> Result<&'a [u8]> {
        let arena = self.arena;
        let data = at.read_ptr(arena);
        let len = arena.read_size(at.addr().add(self.width.bytes()));
        if len == 0 {
            return Ok(&[]);
        }
        arena.try_bytes(data, len).ok_or_else(|| dangling(number, data))
    }

    fn submessage(
        &self,
        number: u32,
        child: ArenaAddr,
        sub: &MessageLayout,
        out: &mut ReverseBuf,
        depth: u32,
    ) -> Result<()> {
        if depth >= self.options.max_depth {
            return Err(EncodeError::DepthLimitExceeded.into());
        }
        if child.is_null() || !self.arena.contains(child, sub.size(self.width)) {
            return Err(dangling(number, child));
        }
        let start = out.len();
        self.message(Message::from_addr(child), sub, out, depth + 1)?;
        out.close_delimited(number, start);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{
        Accessor, MessageAccessor, RepeatedAccessor, RepeatedStringAccessor, StringAccessor,
    };
    use crate::mini_table::{MiniTable, MiniTableField, MiniTableSet};

    const ROOT: MiniTableRef = MiniTableRef::new(0, 0);

    fn schema(fields: Vec<MiniTableField>, width: PointerWidth) -> Schema {
        let tables = MiniTableSet::single(vec![MiniTable::new("Test", fields)]).unwrap();
        Schema::new(tables, width).unwrap()
    }

    fn new_message(schema: &Schema, arena: &mut Arena) -> Message {
        Message::new(arena, schema.layout(ROOT).unwrap()).unwrap()
    }

    #[test]
    fn test_empty_message_encodes_to_nothing() {
        let schema = schema(
            vec![
                MiniTableField::scalar(1, FieldType::Int32),
                MiniTableField::scalar(2, FieldType::String),
                MiniTableField::packed(3, FieldType::Double),
            ],
            PointerWidth::Bits64,
        );
        let mut arena = Arena::new(PointerWidth::Bits64);
        let msg = new_message(&schema, &mut arena);
        let bytes = encode(msg, &schema, ROOT, &arena).unwrap();
        assert!(bytes.is_empty());
    }

    #[test]
    fn test_fields_in_number_order() {
        let schema = schema(
            vec![
                MiniTableField::scalar(3, FieldType::UInt32),
                MiniTableField::scalar(1, FieldType::UInt32),
            ],
            PointerWidth::Bits32,
        );
        let mut arena = Arena::new(PointerWidth::Bits32);
        let msg = new_message(&schema, &mut arena);
        Accessor::<u32>::new(&schema, ROOT, 0).unwrap().set(&mut arena, msg, 3);
        Accessor::<u32>::new(&schema, ROOT, 1).unwrap().set(&mut arena, msg, 1);

        let bytes = encode(msg, &schema, ROOT, &arena).unwrap();
        assert_eq!(&bytes[..], &[0x08, 0x01, 0x18, 0x03]);
    }

    #[test]
    fn test_scalar_encodings() {
        let schema = schema(
            vec![
                MiniTableField::scalar(1, FieldType::Int32),
                MiniTableField::scalar(2, FieldType::SInt32),
                MiniTableField::scalar(3, FieldType::Double),
                MiniTableField::scalar(4, FieldType::SFixed32),
                MiniTableField::optional(5, FieldType::Bool, 0),
            ],
            PointerWidth::Bits64,
        );
        let mut arena = Arena::new(PointerWidth::Bits64);
        let msg = new_message(&schema, &mut arena);
        Accessor::<i32>::new(&schema, ROOT, 0).unwrap().set(&mut arena, msg, -1);
        Accessor::<i32>::new(&schema, ROOT, 1).unwrap().set(&mut arena, msg, -1);
        Accessor::<f64>::new(&schema, ROOT, 2).unwrap().set(&mut arena, msg, -0.0);
        Accessor::<i32>::new(&schema, ROOT, 3).unwrap().set(&mut arena, msg, -2);
        Accessor::<bool>::new(&schema, ROOT, 4).unwrap().set(&mut arena, msg, false);

        let bytes = encode(msg, &schema, ROOT, &arena).unwrap();
        let mut expected = vec![0x08];
        expected.extend_from_slice(&[0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x01]);
        expected.extend_from_slice(&[0x10, 0x01]);
        expected.push(0x19);
        expected.extend_from_slice(&(-0.0f64).to_le_bytes());
        expected.push(0x25);
        expected.extend_from_slice(&(-2i32).to_le_bytes());
        // explicit presence: false is still emitted
        expected.extend_from_slice(&[0x28, 0x00]);
        assert_eq!(&bytes[..], &expected[..]);
    }

    #[test]
    fn test_repeated_packed_and_unpacked() {
        let schema = schema(
            vec![
                MiniTableField::packed(1, FieldType::SInt64),
                MiniTableField::repeated(2, FieldType::Fixed32),
                MiniTableField::repeated(3, FieldType::String),
            ],
            PointerWidth::Bits64,
        );
        let mut arena = Arena::new(PointerWidth::Bits64);
        let msg = new_message(&schema, &mut arena);
        let packed = RepeatedAccessor::<i64>::new(&schema, ROOT, 0).unwrap();
        let unpacked = RepeatedAccessor::<u32>::new(&schema, ROOT, 1).unwrap();
        let texts = RepeatedStringAccessor::new(&schema, ROOT, 2).unwrap();
        for value in [0, -1, 1] {
            packed.push(&mut arena, msg, value).unwrap();
        }
        unpacked.push(&mut arena, msg, 7).unwrap();
        unpacked.push(&mut arena, msg, 0).unwrap();
        texts.push(&mut arena, msg, "a").unwrap();
        texts.push(&mut arena, msg, "").unwrap();

        let bytes = encode(msg, &schema, ROOT, &arena).unwrap();
        assert_eq!(
            &bytes[..],
            &[
                0x0A, 0x03, 0x00, 0x01, 0x02, // packed sint64
                0x15, 0x07, 0x00, 0x00, 0x00, 0x15, 0x00, 0x00, 0x00, 0x00, // fixed32 x2
                0x1A, 0x01, b'a', 0x1A, 0x00, // strings, empty one kept
            ]
        );
    }

    #[test]
    fn test_unknown_fields_after_known() {
        let schema = schema(vec![MiniTableField::scalar(2, FieldType::Int32)], PointerWidth::Bits64);
        let mut arena = Arena::new(PointerWidth::Bits64);
        let msg = new_message(&schema, &mut arena);
        msg.append_unknown(&mut arena, &[0x08, 0x05]).unwrap();
        Accessor::<i32>::new(&schema, ROOT, 0).unwrap().set(&mut arena, msg, 1);

        let bytes = encode(msg, &schema, ROOT, &arena).unwrap();
        assert_eq!(&bytes[..], &[0x10, 0x01, 0x08, 0x05]);

        let options = EncodeOptions {
            skip_unknown: true,
            ..EncodeOptions::default()
        };
        let bytes = encode_with(msg, &schema, ROOT, &arena, &options).unwrap();
        assert_eq!(&bytes[..], &[0x10, 0x01]);
    }

    #[test]
    fn test_dangling_string_pointer() {
        let schema = schema(vec![MiniTableField::scalar(1, FieldType::Bytes)], PointerWidth::Bits64);
        let mut arena = Arena::new(PointerWidth::Bits64);
        let msg = new_message(&schema, &mut arena);
        let field = StringAccessor::new(&schema, ROOT, 0).unwrap();
        field.set(&mut arena, msg, b"abc").unwrap();

        let at = msg.field_address(schema.layout(ROOT).unwrap(), 0, PointerWidth::Bits64);
        at.write_ptr(&mut arena, ArenaAddr::from_raw(1 << 40));

        assert!(matches!(
            encode(msg, &schema, ROOT, &arena),
            Err(Error::EncodeFailure(EncodeError::DanglingPointer { field: 1, addr })) if addr == 1 << 40
        ));
    }

    #[test]
    fn test_cycle_hits_depth_limit() {
        let schema = schema(vec![MiniTableField::message(1, ROOT)], PointerWidth::Bits32);
        let mut arena = Arena::new(PointerWidth::Bits32);
        let msg = new_message(&schema, &mut arena);
        MessageAccessor::new(&schema, ROOT, 0).unwrap().set(&mut arena, msg, msg);

        assert!(matches!(
            encode(msg, &schema, ROOT, &arena),
            Err(Error::EncodeFailure(EncodeError::DepthLimitExceeded))
        ));
    }

    #[test]
    fn test_nested_message() {
        let schema = schema(
            vec![
                MiniTableField::message(1, ROOT),
                MiniTableField::scalar(2, FieldType::Int64),
            ],
            PointerWidth::Bits64,
        );
        let mut arena = Arena::new(PointerWidth::Bits64);
        let msg = new_message(&schema, &mut arena);
        let child = MessageAccessor::new(&schema, ROOT, 0).unwrap();
        let value = Accessor::<i64>::new(&schema, ROOT, 1).unwrap();

        let inner = child.get_or_create(&mut arena, msg).unwrap();
        value.set(&mut arena, inner, 150);
        let bytes = encode(msg, &schema, ROOT, &arena).unwrap();
        assert_eq!(&bytes[..], &[0x0A, 0x03, 0x10, 0x96, 0x01]);

        // present but empty submessage still emits a zero-length record
        let empty = new_message(&schema, &mut arena);
        child.get_or_create(&mut arena, empty).unwrap();
        assert_eq!(&encode(empty, &schema, ROOT, &arena).unwrap()[..], &[0x0A, 0x00]);
    }

    #[test]
    fn test_oneof_emits_only_active_member() {
        let schema = schema(
            vec![
                MiniTableField::scalar(1, FieldType::Int32).with_oneof(0),
                MiniTableField::scalar(2, FieldType::String).with_oneof(0),
                MiniTableField::message(3, ROOT).with_oneof(0),
                MiniTableField::scalar(4, FieldType::Int32),
            ],
            PointerWidth::Bits64,
        );
        let mut arena = Arena::new(PointerWidth::Bits64);
        let msg = new_message(&schema, &mut arena);
        let number = Accessor::<i32>::new(&schema, ROOT, 0).unwrap();
        let text = StringAccessor::new(&schema, ROOT, 1).unwrap();
        let nested = MessageAccessor::new(&schema, ROOT, 2).unwrap();

        assert!(encode(msg, &schema, ROOT, &arena).unwrap().is_empty());

        number.set(&mut arena, msg, 5);
        text.set(&mut arena, msg, "ab").unwrap();
        assert_eq!(&encode(msg, &schema, ROOT, &arena).unwrap()[..], &[0x12, 0x02, b'a', b'b']);

        // a zero member is still emitted while it is the active case
        number.set(&mut arena, msg, 0);
        assert_eq!(&encode(msg, &schema, ROOT, &arena).unwrap()[..], &[0x08, 0x00]);

        nested.get_or_create(&mut arena, msg).unwrap();
        assert_eq!(&encode(msg, &schema, ROOT, &arena).unwrap()[..], &[0x1A, 0x00]);
    }

    #[test]
    fn test_multi_byte_lengths_at_every_level() {
        let schema = schema(
            vec![
                MiniTableField::message(1, ROOT),
                MiniTableField::scalar(2, FieldType::Bytes),
            ],
            PointerWidth::Bits32,
        );
        let mut arena = Arena::new(PointerWidth::Bits32);
        let child = MessageAccessor::new(&schema, ROOT, 0).unwrap();
        let payload = StringAccessor::new(&schema, ROOT, 1).unwrap();

        let root = new_message(&schema, &mut arena);
        let mid = child.get_or_create(&mut arena, root).unwrap();
        let leaf = child.get_or_create(&mut arena, mid).unwrap();
        payload.set(&mut arena, leaf, [0x5A; 200]).unwrap();

        let mut expected = vec![0x0A, 0xCE, 0x01, 0x0A, 0xCB, 0x01, 0x12, 0xC8, 0x01];
        expected.extend_from_slice(&[0x5A; 200]);
        let bytes = encode(root, &schema, ROOT, &arena).unwrap();
        assert_eq!(&bytes[..], &expected[..]);
    }
}
