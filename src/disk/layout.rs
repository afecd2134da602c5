use anyhow::Result;
use bytes::Bytes;

use crate::catalog::def::Table;
use crate::disk::codec::{self, DataTypeTag, Value};
use crate::error::EngineError;

/// One packed field: a column's slot inside the fixed record image.
#[derive(Debug, Clone)]
pub struct FieldLayout {
    pub name: String,     // column name
    pub tag: DataTypeTag, // scalar type tag
    pub width: usize,     // packed width in bytes
    pub offset: usize,    // byte offset inside the record
}

/// Schema-driven fixed-length record layout: one field per column in
/// declaration order, then a one-byte liveness flag.
#[derive(Debug, Clone)]
pub struct RecordLayout {
    fields: Vec<FieldLayout>,
    record_size: usize,
}

impl RecordLayout {
    pub fn for_table(table: &Table) -> Self {
        let mut fields = Vec::with_capacity(table.tab_columns.len());
        let mut offset = 0usize;
        for col in &table.tab_columns {
            let width = codec::type_size(col.col_type, col.col_len as usize);
            fields.push(FieldLayout {
                name: col.col_name.clone(),
                tag: col.col_type,
                width,
                offset,
            });
            offset += width;
        }
        Self {
            fields,
            record_size: offset + 1,
        }
    }

    pub fn record_size(&self) -> usize {
        self.record_size
    }

    pub fn fields(&self) -> &[FieldLayout] {
        &self.fields
    }

    /// Pack a tuple into a record image. Missing trailing values pack as
    /// nulls (zeroed fields).
    pub fn pack(&self, tuple: &[Value], active: bool) -> Result<Bytes> {
        let mut buf = Vec::with_capacity(self.record_size);
        for (i, field) in self.fields.iter().enumerate() {
            let value = tuple.get(i).unwrap_or(&Value::Null);
            buf.extend(codec::serialize(value, field.tag, field.width)?);
        }
        buf.push(active as u8);
        Ok(Bytes::from(buf))
    }

    pub fn unpack(&self, data: &[u8]) -> Result<(Vec<Value>, bool)> {
        if data.len() < self.record_size {
            return Err(EngineError::ShortBlock {
                expected: self.record_size,
                got: data.len(),
            }
            .into());
        }
        let mut tuple = Vec::with_capacity(self.fields.len());
        for field in &self.fields {
            let slot = &data[field.offset..field.offset + field.width];
            tuple.push(codec::deserialize(slot, field.tag, field.width)?);
        }
        let active = data[self.record_size - 1] != 0;
        Ok((tuple, active))
    }
}

#[cfg(test)]
mod layout_tests {

    use std::env::set_var;

    use super::*;
    use crate::catalog::def::{Column, Table};
    use crate::util;

    fn setup() {
        set_var("RUST_LOG", "info");
        util::init();
    }

    fn employees() -> Table {
        Table::new(
            1,
            "employees",
            1,
            vec![
                Column::new("id", DataTypeTag::Int, 4, false, false),
                Column::new("name", DataTypeTag::Varchar, 20, false, false),
                Column::new("salary", DataTypeTag::Double, 8, false, false),
            ],
        )
    }

    #[test]
    fn record_size_counts_liveness_byte() {
        setup();
        let layout = RecordLayout::for_table(&employees());
        assert_eq!(layout.record_size(), 4 + 20 + 8 + 1);
    }

    #[test]
    fn pack_unpack_roundtrip() {
        setup();
        let layout = RecordLayout::for_table(&employees());
        let tuple = vec![
            Value::Int(7),
            Value::Varchar("Ana".into()),
            Value::Double(512.5),
        ];
        let image = layout.pack(&tuple, true).unwrap();
        assert_eq!(image.len(), layout.record_size());

        let (decoded, active) = layout.unpack(&image).unwrap();
        assert!(active);
        assert_eq!(decoded, tuple);
    }

    #[test]
    fn missing_values_pack_as_null() {
        setup();
        let layout = RecordLayout::for_table(&employees());
        let image = layout.pack(&[Value::Int(3)], true).unwrap();
        let (decoded, _) = layout.unpack(&image).unwrap();
        assert_eq!(decoded[1], Value::Null);
        assert_eq!(decoded[2], Value::Null);
    }

    #[test]
    fn tombstone_flag_roundtrip() {
        setup();
        let layout = RecordLayout::for_table(&employees());
        let image = layout
            .pack(&[Value::Int(3), Value::Varchar("Bob".into())], false)
            .unwrap();
        let (_, active) = layout.unpack(&image).unwrap();
        assert!(!active);
    }
}
