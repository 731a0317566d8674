//! A minitable set bound to one pointer width, with every layout resolved.

use crate::arena::Arena;
use crate::config::{PointerWidth, RuntimeConfig};
use crate::error::{Error, Result};
use crate::mini_table::{MiniTable, MiniTableRef, MiniTableSet};

use super::{MessageLayout, resolve};

/// Resolved schema shared by accessors and codecs.
///
/// Layouts are computed once at construction; afterwards the schema is
/// immutable and can be shared freely (`&Schema` is `Sync`).
#[derive(Debug, Clone)]
pub struct Schema {
    tables: MiniTableSet,
    width: PointerWidth,
    layouts: Vec<Vec<MessageLayout>>,
}

impl Schema {
    /// Resolve every table in `tables` for `width`.
    pub fn new(tables: MiniTableSet, width: PointerWidth) -> Result<Self> {
        tables.validate()?;

        let mut layouts: Vec<Vec<MessageLayout>> = Vec::with_capacity(tables.file_count());
        for (table_ref, table) in tables.iter() {
            let file = table_ref.file as usize;
            if layouts.len() <= file {
                layouts.resize_with(file + 1, Vec::new);
            }
            layouts[file].push(resolve(table)?);
        }

        Ok(Self {
            tables,
            width,
            layouts,
        })
    }

    /// Resolve for the pointer width in `config`.
    pub fn from_config(tables: MiniTableSet, config: &RuntimeConfig) -> Result<Self> {
        Self::new(tables, config.pointer_width)
    }

    /// Pointer width every layout was selected for.
    #[must_use]
    pub const fn width(&self) -> PointerWidth {
        self.width
    }

    /// Underlying tables.
    #[must_use]
    pub const fn tables(&self) -> &MiniTableSet {
        &self.tables
    }

    /// Table at `(file, message)`.
    pub fn resolve(&self, file: u32, message: u32) -> Result<&MiniTable> {
        self.tables.resolve(file, message)
    }

    /// Layout for a table reference.
    pub fn layout(&self, table: MiniTableRef) -> Result<&MessageLayout> {
        self.layouts
            .get(table.file as usize)
            .and_then(|file| file.get(table.message as usize))
            .ok_or(Error::UnknownMiniTable {
                file: table.file,
                message: table.message,
            })
    }

    /// Fail unless `arena` uses this schema's pointer width.
    pub fn check_arena(&self, arena: &Arena) -> Result<()> {
        if arena.width() == self.width {
            Ok(())
        } else {
            Err(Error::PointerWidthMismatch {
                arena: arena.width(),
                schema: self.width,
            })
        }
    }
}
