//! Row image decoding
//!
//! A row image is a null bitmap over the columns present in the event
//! followed by the non-NULL values in column order.

use tracing::trace;

use crate::codec::decode_value;
use crate::error::{DecodeError, Result};
use crate::reader::{is_bit_set, EventReader};
use crate::schema::{ColumnSchema, WireColumn};
use crate::value::{Row, Value};

/// Decodes row images for one table given its declared and wire columns.
#[derive(Debug, Clone, Copy)]
pub struct RowImageDecoder<'a> {
    columns: &'a [ColumnSchema],
    wire: &'a [WireColumn],
}

impl<'a> RowImageDecoder<'a> {
    /// Pair declared columns with TABLE_MAP columns by position.
    pub fn new(columns: &'a [ColumnSchema], wire: &'a [WireColumn]) -> Result<Self> {
        if columns.len() != wire.len() {
            return Err(DecodeError::ColumnCount {
                event: wire.len(),
                schema: columns.len(),
            });
        }
        Ok(Self { columns, wire })
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Size of the null bitmap preceding each image.
    pub fn bitmap_len(&self) -> usize {
        self.columns.len().div_ceil(8)
    }

    /// Decode one full row image.
    pub fn decode(&self, r: &mut EventReader<'_>) -> Result<Row> {
        let start = r.position();
        let nulls = r.bytes(self.bitmap_len())?;
        let mut row = Row::new();
        for (idx, (column, wire)) in self.columns.iter().zip(self.wire).enumerate() {
            let value = if is_bit_set(nulls, idx) {
                Value::Null
            } else {
                decode_value(r, column, wire)?
            };
            row.insert(column.name.clone(), value);
        }
        trace!("Decoded row image of {} bytes", r.position() - start);
        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode;
    use crate::schema::fixtures::def;
    use crate::schema::{ColumnMeta, ColumnType};
    use rust_decimal::Decimal;

    fn orders_columns() -> (Vec<ColumnSchema>, Vec<WireColumn>) {
        let columns = vec![
            ColumnSchema::from_definition(&def("id", 1, "int", "int(11)")).unwrap(),
            ColumnSchema::from_definition(&def("qty", 2, "int", "int(11)")).unwrap(),
            ColumnSchema::from_definition(&def("price", 3, "decimal", "decimal(10,2)")).unwrap(),
            ColumnSchema::from_definition(&def("note", 4, "varchar", "varchar(20)")).unwrap(),
        ];
        let wire = vec![
            WireColumn::new(ColumnType::Long, ColumnMeta::None),
            WireColumn::new(ColumnType::Long, ColumnMeta::None),
            WireColumn::new(
                ColumnType::NewDecimal,
                ColumnMeta::Decimal {
                    precision: 10,
                    scale: 2,
                },
            ),
            WireColumn::new(ColumnType::Varchar, ColumnMeta::MaxLength(80)),
        ];
        (columns, wire)
    }

    #[test]
    fn test_decode_row_with_null() {
        let (columns, wire) = orders_columns();
        let decoder = RowImageDecoder::new(&columns, &wire).unwrap();

        let mut image = vec![0b0000_1000];
        image.extend(encode::int(1, 4));
        image.extend(encode::int(5, 4));
        image.extend(encode::decimal("10.50", 10, 2));

        let mut r = EventReader::new(&image);
        let row = decoder.decode(&mut r).unwrap();
        assert!(r.is_empty());
        assert_eq!(row["id"], Value::Int(1));
        assert_eq!(row["qty"], Value::Int(5));
        assert_eq!(row["price"], Value::Decimal(Decimal::new(1050, 2)));
        assert_eq!(row["note"], Value::Null);
    }

    #[test]
    fn test_column_count_mismatch() {
        let (columns, wire) = orders_columns();
        let err = RowImageDecoder::new(&columns, &wire[..3]).unwrap_err();
        assert_eq!(err, DecodeError::ColumnCount { event: 3, schema: 4 });
    }

    #[test]
    fn test_partial_image_is_truncated() {
        let (columns, wire) = orders_columns();
        let decoder = RowImageDecoder::new(&columns, &wire).unwrap();
        let mut image = vec![0];
        image.extend(encode::int(1, 4));
        let mut r = EventReader::new(&image);
        assert!(matches!(
            decoder.decode(&mut r),
            Err(DecodeError::Truncated { .. })
        ));
    }
}
