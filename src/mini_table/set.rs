//! Tables, files and the indexed set that owns them.

use std::collections::HashSet;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use super::{FieldType, MAX_FIELD_NUMBER, MiniTableField};
use crate::error::{Error, Result, SchemaError};

/// Stable `(file, message)` index pair naming a table in a [`MiniTableSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MiniTableRef {
    /// File index
    pub file: u32,
    /// Message index within the file
    pub message: u32,
}

impl MiniTableRef {
    /// Build a reference.
    #[must_use]
    pub const fn new(file: u32, message: u32) -> Self {
        Self { file, message }
    }
}

/// Metadata for one message type.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MiniTable {
    /// Name used in diagnostics only; never used for lookup.
    pub name: String,
    /// Fields in declaration order. A field's position is its field index.
    pub fields: Vec<MiniTableField>,
}

impl MiniTable {
    /// Build a table.
    pub fn new(name: impl Into<String>, fields: Vec<MiniTableField>) -> Self {
        Self {
            name: name.into(),
            fields,
        }
    }

    /// Number of fields.
    #[must_use]
    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    /// Field at `index`.
    #[must_use]
    pub fn field(&self, index: usize) -> Option<&MiniTableField> {
        self.fields.get(index)
    }

    fn validate(&self, set: &MiniTableSet) -> std::result::Result<(), SchemaError> {
        let mut numbers = HashSet::with_capacity(self.fields.len());
        let mut hasbits = HashSet::new();
        let message = || self.name.clone();

        for field in &self.fields {
            let number = field.number;
            if number == 0 || number > MAX_FIELD_NUMBER {
                return Err(SchemaError::FieldNumberOutOfRange {
                    message: message(),
                    number,
                });
            }
            if !numbers.insert(number) {
                return Err(SchemaError::DuplicateFieldNumber {
                    message: message(),
                    number,
                });
            }
            if let Some(hasbit) = field.presence {
                if field.label.is_repeated() {
                    return Err(SchemaError::HasbitOnRepeated {
                        message: message(),
                        number,
                    });
                }
                if !hasbits.insert(hasbit) {
                    return Err(SchemaError::DuplicateHasbit {
                        message: message(),
                        hasbit,
                    });
                }
            }
            if field.oneof.is_some() {
                if field.label.is_repeated() {
                    return Err(SchemaError::OneofOnRepeated {
                        message: message(),
                        number,
                    });
                }
                if field.presence.is_some() {
                    return Err(SchemaError::OneofWithHasbit {
                        message: message(),
                        number,
                    });
                }
            }
            if field.label == (super::Label::Repeated { packed: true })
                && !field.field_type.is_packable()
            {
                return Err(SchemaError::NotPackable {
                    message: message(),
                    number,
                    field_type: field.field_type,
                });
            }
            match (field.field_type, field.submsg) {
                (FieldType::Message, Some(sub)) if set.get(sub).is_some() => {}
                (FieldType::Message, _) => {
                    return Err(SchemaError::MissingSubmessage {
                        message: message(),
                        number,
                    });
                }
                (_, Some(_)) => {
                    return Err(SchemaError::UnexpectedSubmessage {
                        message: message(),
                        number,
                    });
                }
                (_, None) => {}
            }
        }
        Ok(())
    }
}

/// Tables generated from one schema file.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MiniTableFile {
    /// Message tables, indexed by message index
    pub messages: Vec<MiniTable>,
}

impl MiniTableFile {
    /// Build a file from its tables.
    #[must_use]
    pub fn new(messages: Vec<MiniTable>) -> Self {
        Self { messages }
    }
}

/// Immutable, index-addressed collection of tables.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MiniTableSet {
    files: Vec<MiniTableFile>,
}

impl MiniTableSet {
    /// Build a set from files and validate every table.
    pub fn new(files: Vec<MiniTableFile>) -> Result<Self> {
        let set = Self { files };
        set.validate()?;
        Ok(set)
    }

    /// Single-file convenience constructor.
    pub fn single(messages: Vec<MiniTable>) -> Result<Self> {
        Self::new(vec![MiniTableFile::new(messages)])
    }

    /// Look up a table by indices.
    pub fn resolve(&self, file: u32, message: u32) -> Result<&MiniTable> {
        self.get(MiniTableRef::new(file, message))
            .ok_or(Error::UnknownMiniTable { file, message })
    }

    /// Look up a table by reference.
    #[must_use]
    pub fn get(&self, table: MiniTableRef) -> Option<&MiniTable> {
        self.files
            .get(table.file as usize)?
            .messages
            .get(table.message as usize)
    }

    /// Every table with its reference, in file then message order.
    pub fn iter(&self) -> impl Iterator<Item = (MiniTableRef, &MiniTable)> {
        self.files.iter().enumerate().flat_map(|(file, entry)| {
            entry
                .messages
                .iter()
                .enumerate()
                .map(move |(message, table)| {
                    (MiniTableRef::new(file as u32, message as u32), table)
                })
        })
    }

    /// Number of files.
    #[must_use]
    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    /// Check every table against the structural rules.
    pub fn validate(&self) -> Result<()> {
        for (_, table) in self.iter() {
            table.validate(self)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mini_table::Label;

    fn leaf() -> MiniTable {
        MiniTable::new(
            "Leaf",
            vec![MiniTableField::scalar(1, FieldType::Int32)],
        )
    }

    #[test]
    fn test_resolve() {
        let set = MiniTableSet::new(vec![
            MiniTableFile::new(vec![leaf()]),
            MiniTableFile::new(vec![
                leaf(),
                MiniTable::new(
                    "Outer",
                    vec![MiniTableField::message(1, MiniTableRef::new(0, 0))],
                ),
            ]),
        ])
        .unwrap();

        assert_eq!(set.resolve(1, 1).unwrap().name, "Outer");
        assert!(matches!(
            set.resolve(2, 0),
            Err(Error::UnknownMiniTable {
                file: 2,
                message: 0
            })
        ));
        let refs: Vec<_> = set.iter().map(|(table, _)| table).collect();
        assert_eq!(
            refs,
            vec![
                MiniTableRef::new(0, 0),
                MiniTableRef::new(1, 0),
                MiniTableRef::new(1, 1)
            ]
        );
    }

    #[test]
    fn test_rejects_duplicate_numbers() {
        let err = MiniTableSet::single(vec![MiniTable::new(
            "Dup",
            vec![
                MiniTableField::scalar(1, FieldType::Int32),
                MiniTableField::scalar(1, FieldType::Int64),
            ],
        )])
        .unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidSchema(SchemaError::DuplicateFieldNumber { number: 1, .. })
        ));
    }

    #[test]
    fn test_rejects_bad_presence_and_packing() {
        let repeated_hasbit = MiniTableField {
            label: Label::Repeated { packed: false },
            ..MiniTableField::optional(1, FieldType::Int32, 0)
        };
        assert!(MiniTableSet::single(vec![MiniTable::new("A", vec![repeated_hasbit])]).is_err());

        let packed_string = MiniTableField::packed(1, FieldType::String);
        assert!(matches!(
            MiniTableSet::single(vec![MiniTable::new("B", vec![packed_string])]),
            Err(Error::InvalidSchema(SchemaError::NotPackable { .. }))
        ));

        let shared_hasbit = vec![
            MiniTableField::optional(1, FieldType::Int32, 0),
            MiniTableField::optional(2, FieldType::Int32, 0),
        ];
        assert!(matches!(
            MiniTableSet::single(vec![MiniTable::new("C", shared_hasbit)]),
            Err(Error::InvalidSchema(SchemaError::DuplicateHasbit { hasbit: 0, .. }))
        ));
    }

    #[test]
    fn test_rejects_bad_oneof_members() {
        let repeated_member = MiniTableField::repeated(1, FieldType::Int32).with_oneof(0);
        assert!(matches!(
            MiniTableSet::single(vec![MiniTable::new("D", vec![repeated_member])]),
            Err(Error::InvalidSchema(SchemaError::OneofOnRepeated { number: 1, .. }))
        ));

        let member_with_hasbit = MiniTableField::optional(2, FieldType::Int32, 0).with_oneof(0);
        assert!(matches!(
            MiniTableSet::single(vec![MiniTable::new("E", vec![member_with_hasbit])]),
            Err(Error::InvalidSchema(SchemaError::OneofWithHasbit { number: 2, .. }))
        ));

        let members = vec![
            MiniTableField::scalar(1, FieldType::Int32).with_oneof(0),
            MiniTableField::message(2, MiniTableRef::new(0, 0)).with_oneof(0),
        ];
        assert!(MiniTableSet::single(vec![MiniTable::new("F", members)]).is_ok());
    }

    #[test]
    fn test_rejects_dangling_submessage() {
        let err = MiniTableSet::single(vec![MiniTable::new(
            "Outer",
            vec![MiniTableField::message(1, MiniTableRef::new(0, 7))],
        )])
        .unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidSchema(SchemaError::MissingSubmessage { number: 1, .. })
        ));
    }

    #[test]
    fn test_rejects_field_number_zero() {
        let err = MiniTableSet::single(vec![MiniTable::new(
            "Zero",
            vec![MiniTableField::scalar(0, FieldType::Bool)],
        )])
        .unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidSchema(SchemaError::FieldNumberOutOfRange { number: 0, .. })
        ));
    }
}
