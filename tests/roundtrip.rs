use arenapb::{
    Accessor, Arena, DecodeOptions, Error, FieldType, Message, MessageAccessor, MiniTable,
    MiniTableField, MiniTableRef, MiniTableSet, PointerWidth, RepeatedAccessor,
    RepeatedMessageAccessor, RepeatedStringAccessor, Schema, StringAccessor, WireError, metrics,
    wire,
};
use proptest::prelude::*;

const GREETING: MiniTableRef = MiniTableRef::new(0, 0);
const RECORD: MiniTableRef = MiniTableRef::new(0, 1);
const ITEM: MiniTableRef = MiniTableRef::new(0, 2);

const WIDTHS: [PointerWidth; 2] = [PointerWidth::Bits32, PointerWidth::Bits64];

fn tables() -> MiniTableSet {
    MiniTableSet::single(vec![
        MiniTable::new(
            "Greeting",
            vec![
                MiniTableField::scalar(1, FieldType::Int32),
                MiniTableField::optional(2, FieldType::String, 0),
            ],
        ),
        MiniTable::new(
            "Record",
            vec![
                MiniTableField::scalar(1, FieldType::Int64),
                MiniTableField::optional(2, FieldType::Double, 0),
                MiniTableField::scalar(3, FieldType::Bool),
                MiniTableField::scalar(4, FieldType::Bytes),
                MiniTableField::message(5, ITEM),
                MiniTableField::packed(6, FieldType::SInt32),
                MiniTableField::repeated(7, FieldType::String),
                MiniTableField::repeated_message(8, ITEM),
                MiniTableField::optional(9, FieldType::UInt32, 1),
                MiniTableField::scalar(10, FieldType::Float),
            ],
        ),
        MiniTable::new(
            "Item",
            vec![
                MiniTableField::scalar(1, FieldType::String),
                MiniTableField::scalar(2, FieldType::Fixed64),
            ],
        ),
    ])
    .unwrap()
}

fn schema(width: PointerWidth) -> Schema {
    Schema::new(tables(), width).unwrap()
}

#[test]
fn concrete_scenario_bytes() {
    for width in WIDTHS {
        let schema = schema(width);
        let layout = schema.layout(GREETING).unwrap();
        let id = Accessor::<i32>::new(&schema, GREETING, 0).unwrap();
        let text = StringAccessor::new(&schema, GREETING, 1).unwrap();

        let mut arena = Arena::new(width);
        let msg = Message::new(&mut arena, layout).unwrap();
        id.set(&mut arena, msg, 42);
        text.set(&mut arena, msg, "hi").unwrap();

        let bytes = wire::encode(msg, &schema, GREETING, &arena).unwrap();
        assert_eq!(&bytes[..], &[0x08, 0x2A, 0x12, 0x02, 0x68, 0x69]);

        let mut fresh = Arena::new(width);
        let decoded = wire::decode(&bytes, &schema, GREETING, &mut fresh).unwrap();
        assert_eq!(id.get(&fresh, decoded), 42);
        assert_eq!(text.get_str(&fresh, decoded).unwrap(), "hi");
        assert!(decoded.is_present(&fresh, layout, 0));
        assert_eq!(layout.field(0).unwrap().offset(width), 0);
    }
}

#[test]
fn presence_semantics() {
    let schema = schema(PointerWidth::Bits64);
    let layout = schema.layout(RECORD).unwrap();
    let ratio = Accessor::<f64>::new(&schema, RECORD, 1).unwrap();
    let count = Accessor::<u32>::new(&schema, RECORD, 8).unwrap();
    let mut arena = Arena::new(PointerWidth::Bits64);
    let msg = Message::new(&mut arena, layout).unwrap();

    assert_eq!(ratio.get(&arena, msg), 0.0);
    assert!(!ratio.has(&arena, msg));
    assert!(wire::encode(msg, &schema, RECORD, &arena).unwrap().is_empty());

    // Zero value with its hasbit set is emitted.
    msg.set_present(&mut arena, layout, 1);
    let bytes = wire::encode(msg, &schema, RECORD, &arena).unwrap();
    assert_eq!(&bytes[..], &[0x48, 0x00]);
    assert_eq!(count.get(&arena, msg), 0);
    assert!(count.has(&arena, msg));
}

#[test]
fn string_default_is_empty() {
    for width in WIDTHS {
        let schema = schema(width);
        let mut arena = Arena::new(width);
        let msg = Message::new(&mut arena, schema.layout(GREETING).unwrap()).unwrap();
        let text = StringAccessor::new(&schema, GREETING, 1).unwrap();
        assert_eq!(text.get(&arena, msg), b"");
        assert_eq!(text.get_str(&arena, msg).unwrap(), "");
        assert!(!text.has(&arena, msg));
    }
}

#[test]
fn explicit_empty_string_roundtrips_as_present() {
    let schema = schema(PointerWidth::Bits64);
    let text = StringAccessor::new(&schema, GREETING, 1).unwrap();
    let mut arena = Arena::new(PointerWidth::Bits64);
    let msg = Message::new(&mut arena, schema.layout(GREETING).unwrap()).unwrap();
    text.set(&mut arena, msg, "").unwrap();

    let bytes = wire::encode(msg, &schema, GREETING, &arena).unwrap();
    assert_eq!(&bytes[..], &[0x12, 0x00]);

    let decoded = wire::decode(&bytes, &schema, GREETING, &mut arena).unwrap();
    assert!(text.has(&arena, decoded));
    assert_eq!(text.get(&arena, decoded), b"");
}

#[test]
fn unknown_fields_survive_reencode() {
    for width in WIDTHS {
        let schema = schema(width);
        // field 1 = 7, unknown field 15 (varint 300), field 2 = "ok",
        // unknown field 16 (fixed32)
        let input = [
            0x08, 0x07, 0x78, 0xAC, 0x02, 0x12, 0x02, b'o', b'k', 0x85, 0x01, 1, 2, 3, 4,
        ];
        let mut arena = Arena::new(width);
        let msg = wire::decode(&input, &schema, GREETING, &mut arena).unwrap();
        assert_eq!(
            msg.unknown_fields(&arena),
            &[0x78, 0xAC, 0x02, 0x85, 0x01, 1, 2, 3, 4]
        );

        let output = wire::encode(msg, &schema, GREETING, &arena).unwrap();
        assert_eq!(
            &output[..],
            &[0x08, 0x07, 0x12, 0x02, b'o', b'k', 0x78, 0xAC, 0x02, 0x85, 0x01, 1, 2, 3, 4]
        );
    }
}

#[test]
fn nested_unknown_fields_stay_with_their_message() {
    let schema = schema(PointerWidth::Bits64);
    // Record.child = Item { unknown field 9 = 1 }
    let input = [0x2A, 0x02, 0x48, 0x01];
    let mut arena = Arena::new(PointerWidth::Bits64);
    let msg = wire::decode(&input, &schema, RECORD, &mut arena).unwrap();
    assert!(msg.unknown_fields(&arena).is_empty());

    let child = MessageAccessor::new(&schema, RECORD, 4).unwrap();
    let inner = child.get(&arena, msg).unwrap();
    assert_eq!(inner.unknown_fields(&arena), &[0x48, 0x01]);
    assert_eq!(&wire::encode(msg, &schema, RECORD, &arena).unwrap()[..], &input);
}

#[test]
fn malformed_input_is_rejected() {
    let schema = schema(PointerWidth::Bits64);
    let mut arena = Arena::new(PointerWidth::Bits64);

    let truncated_tag = wire::decode(&[0x08, 0x01, 0x80], &schema, GREETING, &mut arena);
    assert!(matches!(
        truncated_tag,
        Err(Error::MalformedWireInput {
            offset: 2,
            kind: WireError::TruncatedVarint
        })
    ));

    let overlong = wire::decode(&[0x12, 0x10, b'h', b'i'], &schema, GREETING, &mut arena);
    assert!(matches!(
        overlong,
        Err(Error::MalformedWireInput {
            kind: WireError::LengthExceedsBuffer { len: 16, remaining: 2 },
            ..
        })
    ));

    // Failure inside a submessage reports the absolute offset.
    let nested = wire::decode(&[0x2A, 0x02, 0x0A, 0x05], &schema, RECORD, &mut arena);
    match nested {
        Err(err) => {
            assert!(err.is_malformed());
            assert!(matches!(err, Error::MalformedWireInput { offset: 3, .. }));
        }
        Ok(_) => panic!("nested overrun accepted"),
    }
}

#[test]
fn decode_into_merges() {
    let schema = schema(PointerWidth::Bits64);
    let mut arena = Arena::new(PointerWidth::Bits64);
    let values = RepeatedAccessor::<i32>::new(&schema, RECORD, 5).unwrap();
    let number = Accessor::<i64>::new(&schema, RECORD, 0).unwrap();
    let child = MessageAccessor::new(&schema, RECORD, 4).unwrap();
    let stamp = Accessor::<u64>::new(&schema, ITEM, 1).unwrap();
    let label = StringAccessor::new(&schema, ITEM, 0).unwrap();

    let msg = wire::decode(
        &[0x08, 0x01, 0x32, 0x01, 0x02, 0x2A, 0x03, 0x0A, 0x01, b'a'],
        &schema,
        RECORD,
        &mut arena,
    )
    .unwrap();
    wire::decode_into(
        &[0x08, 0x05, 0x30, 0x04, 0x2A, 0x09, 0x11, 9, 0, 0, 0, 0, 0, 0, 0],
        msg,
        &schema,
        RECORD,
        &mut arena,
        &DecodeOptions::default(),
    )
    .unwrap();

    assert_eq!(number.get(&arena, msg), 5);
    assert_eq!(values.to_vec(&arena, msg), vec![1, 2]);
    let inner = child.get(&arena, msg).unwrap();
    assert_eq!(label.get(&arena, inner), b"a");
    assert_eq!(stamp.get(&arena, inner), 9);
}

#[test]
fn width_mismatch_is_rejected() {
    let schema = schema(PointerWidth::Bits64);
    let mut narrow = Arena::new(PointerWidth::Bits32);
    assert!(matches!(
        wire::decode(&[], &schema, GREETING, &mut narrow),
        Err(Error::PointerWidthMismatch { .. })
    ));
}

#[test]
fn wide_accessor_cannot_touch_narrow_arena() {
    let wide = schema(PointerWidth::Bits64);
    let narrow = schema(PointerWidth::Bits32);
    let layout = narrow.layout(GREETING).unwrap();
    let mut arena = Arena::new(PointerWidth::Bits32);
    let first = Message::new(&mut arena, layout).unwrap();
    let second = Message::new(&mut arena, layout).unwrap();
    assert!(wire::encode(second, &narrow, GREETING, &arena).unwrap().is_empty());

    let text = StringAccessor::new(&wide, GREETING, 1).unwrap();
    assert!(matches!(
        text.set(&mut arena, first, "hi"),
        Err(Error::PointerWidthMismatch { .. })
    ));

    assert!(wire::encode(first, &narrow, GREETING, &arena).unwrap().is_empty());
    assert!(wire::encode(second, &narrow, GREETING, &arena).unwrap().is_empty());
}

#[test]
fn codec_calls_are_counted() {
    let schema = schema(PointerWidth::Bits64);
    let mut arena = Arena::new(PointerWidth::Bits64);
    let before = metrics::snapshot();

    let msg = wire::decode(&[0x08, 0x01, 0x58, 0x00], &schema, GREETING, &mut arena).unwrap();
    wire::encode(msg, &schema, GREETING, &arena).unwrap();
    assert!(wire::decode(&[0x08], &schema, GREETING, &mut arena).is_err());

    let after = metrics::snapshot();
    assert!(after.messages_decoded > before.messages_decoded);
    assert!(after.messages_encoded > before.messages_encoded);
    assert!(after.decode_errors > before.decode_errors);
    assert!(after.unknown_fields > before.unknown_fields);
    assert!(after.arena_blocks > before.arena_blocks);
}

#[derive(Debug, Clone, Default)]
struct RecordValues {
    number: i64,
    ratio: Option<f64>,
    flag: bool,
    blob: Vec<u8>,
    child: Option<(String, u64)>,
    deltas: Vec<i32>,
    tags: Vec<String>,
    items: Vec<(String, u64)>,
    count: Option<u32>,
    weight: f32,
}

fn record_values() -> impl Strategy<Value = RecordValues> {
    let item = ("[a-z]{0,6}", any::<u64>());
    (
        (
            any::<i64>(),
            proptest::option::of(any::<f64>().prop_filter("nan", |v| !v.is_nan())),
            any::<bool>(),
            proptest::collection::vec(any::<u8>(), 0..12),
            proptest::option::of(item.clone()),
        ),
        (
            proptest::collection::vec(any::<i32>(), 0..8),
            proptest::collection::vec("\\PC{0,5}", 0..4),
            proptest::collection::vec(item, 0..4),
            proptest::option::of(any::<u32>()),
            any::<f32>().prop_filter("nan", |v| !v.is_nan()),
        ),
    )
        .prop_map(
            |((number, ratio, flag, blob, child), (deltas, tags, items, count, weight))| {
                RecordValues {
                    number,
                    ratio,
                    flag,
                    blob,
                    child,
                    deltas,
                    tags,
                    items,
                    count,
                    weight,
                }
            },
        )
}

struct RecordAccessors {
    number: Accessor<i64>,
    ratio: Accessor<f64>,
    flag: Accessor<bool>,
    blob: StringAccessor,
    child: MessageAccessor,
    deltas: RepeatedAccessor<i32>,
    tags: RepeatedStringAccessor,
    items: RepeatedMessageAccessor,
    count: Accessor<u32>,
    weight: Accessor<f32>,
    item_label: StringAccessor,
    item_stamp: Accessor<u64>,
}

impl RecordAccessors {
    fn new(schema: &Schema) -> Self {
        Self {
            number: Accessor::new(schema, RECORD, 0).unwrap(),
            ratio: Accessor::new(schema, RECORD, 1).unwrap(),
            flag: Accessor::new(schema, RECORD, 2).unwrap(),
            blob: StringAccessor::new(schema, RECORD, 3).unwrap(),
            child: MessageAccessor::new(schema, RECORD, 4).unwrap(),
            deltas: RepeatedAccessor::new(schema, RECORD, 5).unwrap(),
            tags: RepeatedStringAccessor::new(schema, RECORD, 6).unwrap(),
            items: RepeatedMessageAccessor::new(schema, RECORD, 7).unwrap(),
            count: Accessor::new(schema, RECORD, 8).unwrap(),
            weight: Accessor::new(schema, RECORD, 9).unwrap(),
            item_label: StringAccessor::new(schema, ITEM, 0).unwrap(),
            item_stamp: Accessor::new(schema, ITEM, 1).unwrap(),
        }
    }

    fn write(&self, arena: &mut Arena, msg: Message, values: &RecordValues) {
        self.number.set(arena, msg, values.number);
        if let Some(ratio) = values.ratio {
            self.ratio.set(arena, msg, ratio);
        }
        self.flag.set(arena, msg, values.flag);
        self.blob.set(arena, msg, &values.blob).unwrap();
        if let Some((label, stamp)) = &values.child {
            let inner = self.child.get_or_create(arena, msg).unwrap();
            self.item_label.set(arena, inner, label).unwrap();
            self.item_stamp.set(arena, inner, *stamp);
        }
        for delta in &values.deltas {
            self.deltas.push(arena, msg, *delta).unwrap();
        }
        for tag in &values.tags {
            self.tags.push(arena, msg, tag).unwrap();
        }
        for (label, stamp) in &values.items {
            let item = self.items.push_new(arena, msg).unwrap();
            self.item_label.set(arena, item, label).unwrap();
            self.item_stamp.set(arena, item, *stamp);
        }
        if let Some(count) = values.count {
            self.count.set(arena, msg, count);
        }
        self.weight.set(arena, msg, values.weight);
    }

    fn read_item(&self, arena: &Arena, item: Message) -> (String, u64) {
        (
            self.item_label.get_str(arena, item).unwrap().to_owned(),
            self.item_stamp.get(arena, item),
        )
    }

    fn read(&self, arena: &Arena, msg: Message) -> RecordValues {
        RecordValues {
            number: self.number.get(arena, msg),
            ratio: self.ratio.has(arena, msg).then(|| self.ratio.get(arena, msg)),
            flag: self.flag.get(arena, msg),
            blob: self.blob.get(arena, msg).to_vec(),
            child: self
                .child
                .get(arena, msg)
                .map(|inner| self.read_item(arena, inner)),
            deltas: self.deltas.to_vec(arena, msg),
            tags: (0..self.tags.len(arena, msg))
                .map(|i| String::from_utf8(self.tags.get(arena, msg, i).to_vec()).unwrap())
                .collect(),
            items: (0..self.items.len(arena, msg))
                .map(|i| self.read_item(arena, self.items.get(arena, msg, i)))
                .collect(),
            count: self.count.has(arena, msg).then(|| self.count.get(arena, msg)),
            weight: self.weight.get(arena, msg),
        }
    }
}

proptest! {
    #[test]
    fn accessor_roundtrip(values in record_values(), wide in any::<bool>()) {
        let width = if wide { PointerWidth::Bits64 } else { PointerWidth::Bits32 };
        let schema = schema(width);
        let access = RecordAccessors::new(&schema);

        let mut arena = Arena::new(width);
        let msg = Message::new(&mut arena, schema.layout(RECORD).unwrap()).unwrap();
        access.write(&mut arena, msg, &values);

        let first = wire::encode(msg, &schema, RECORD, &arena).unwrap();
        let second = wire::encode(msg, &schema, RECORD, &arena).unwrap();
        prop_assert_eq!(&first, &second);

        let mut fresh = Arena::new(width);
        let decoded = wire::decode(&first, &schema, RECORD, &mut fresh).unwrap();
        let read = access.read(&fresh, decoded);
        let expected = access.read(&arena, msg);

        prop_assert_eq!(read.number, values.number);
        prop_assert_eq!(read.ratio.map(f64::to_bits), values.ratio.map(f64::to_bits));
        prop_assert_eq!(read.flag, values.flag);
        prop_assert_eq!(&read.blob, &values.blob);
        prop_assert_eq!(&read.child, &values.child);
        prop_assert_eq!(&read.deltas, &values.deltas);
        prop_assert_eq!(&read.tags, &values.tags);
        prop_assert_eq!(&read.items, &values.items);
        prop_assert_eq!(read.count, values.count);
        prop_assert_eq!(read.weight.to_bits(), values.weight.to_bits());
        prop_assert_eq!(read.weight.to_bits(), expected.weight.to_bits());

        // Re-encoding the decoded copy is byte-identical.
        let again = wire::encode(decoded, &schema, RECORD, &fresh).unwrap();
        prop_assert_eq!(&first, &again);
    }
}
