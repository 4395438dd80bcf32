//! Table and column schema
//!
//! Two views of a column meet here:
//!
//! - [`ColumnSchema`] is what the store declares (`information_schema.columns`):
//!   name, declared type, signedness, lengths, enum options.
//! - [`WireColumn`] is what a TABLE_MAP event says about the same column: the
//!   binlog type code and the metadata that fixes its encoded width.
//!
//! Row decoding needs both. The declared type picks text vs. binary and
//! signedness; the wire metadata decides length-prefix widths and can
//! reclassify a STRING column as ENUM or SET.

use serde::Serialize;
use std::collections::HashMap;

use crate::error::SchemaError;
use crate::value::{Row, Value};

/// MySQL column types as they appear on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum ColumnType {
    Decimal = 0,
    Tiny = 1,
    Short = 2,
    Long = 3,
    Float = 4,
    Double = 5,
    Null = 6,
    Timestamp = 7,
    LongLong = 8,
    Int24 = 9,
    Date = 10,
    Time = 11,
    DateTime = 12,
    Year = 13,
    NewDate = 14,
    Varchar = 15,
    Bit = 16,
    Timestamp2 = 17,
    DateTime2 = 18,
    Time2 = 19,
    Json = 245,
    NewDecimal = 246,
    Enum = 247,
    Set = 248,
    TinyBlob = 249,
    MediumBlob = 250,
    LongBlob = 251,
    Blob = 252,
    VarString = 253,
    String = 254,
    Geometry = 255,
}

impl ColumnType {
    /// Map a wire type code. Unknown codes yield `None`.
    pub fn from_u8(value: u8) -> Option<Self> {
        let ty = match value {
            0 => ColumnType::Decimal,
            1 => ColumnType::Tiny,
            2 => ColumnType::Short,
            3 => ColumnType::Long,
            4 => ColumnType::Float,
            5 => ColumnType::Double,
            6 => ColumnType::Null,
            7 => ColumnType::Timestamp,
            8 => ColumnType::LongLong,
            9 => ColumnType::Int24,
            10 => ColumnType::Date,
            11 => ColumnType::Time,
            12 => ColumnType::DateTime,
            13 => ColumnType::Year,
            14 => ColumnType::NewDate,
            15 => ColumnType::Varchar,
            16 => ColumnType::Bit,
            17 => ColumnType::Timestamp2,
            18 => ColumnType::DateTime2,
            19 => ColumnType::Time2,
            245 => ColumnType::Json,
            246 => ColumnType::NewDecimal,
            247 => ColumnType::Enum,
            248 => ColumnType::Set,
            249 => ColumnType::TinyBlob,
            250 => ColumnType::MediumBlob,
            251 => ColumnType::LongBlob,
            252 => ColumnType::Blob,
            253 => ColumnType::VarString,
            254 => ColumnType::String,
            255 => ColumnType::Geometry,
            _ => return None,
        };
        Some(ty)
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn is_integer(self) -> bool {
        matches!(
            self,
            ColumnType::Tiny
                | ColumnType::Short
                | ColumnType::Int24
                | ColumnType::Long
                | ColumnType::LongLong
                | ColumnType::Year
                | ColumnType::Bit
        )
    }

    /// Fixed-point or floating types compared at declared scale
    pub fn is_fractional(self) -> bool {
        matches!(
            self,
            ColumnType::Float | ColumnType::Double | ColumnType::NewDecimal | ColumnType::Decimal
        )
    }

    pub fn is_temporal(self) -> bool {
        matches!(
            self,
            ColumnType::Timestamp
                | ColumnType::Timestamp2
                | ColumnType::DateTime
                | ColumnType::DateTime2
                | ColumnType::Date
                | ColumnType::NewDate
        )
    }

    pub fn is_blob(self) -> bool {
        matches!(
            self,
            ColumnType::TinyBlob | ColumnType::Blob | ColumnType::MediumBlob | ColumnType::LongBlob
        )
    }

    /// Default maximum byte length for blob and text sub-types.
    pub fn default_max_length(self) -> Option<u64> {
        match self {
            ColumnType::TinyBlob => Some(255),
            ColumnType::Blob => Some(65_535),
            ColumnType::MediumBlob => Some(16_777_215),
            ColumnType::LongBlob => Some(4_294_967_295),
            _ => None,
        }
    }
}

// ============================================================================
// Wire metadata (TABLE_MAP)
// ============================================================================

/// Per-column metadata block from a TABLE_MAP event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnMeta {
    None,
    /// FLOAT/DOUBLE storage size
    Size(u8),
    /// VARCHAR and CHAR maximum byte length
    MaxLength(u16),
    /// BIT(n) as `bytes * 8 + bits`
    Bits { bits: u8, bytes: u8 },
    Decimal { precision: u8, scale: u8 },
    /// Width of the length prefix for blob family, JSON and GEOMETRY
    LengthSize(u8),
    /// ENUM/SET storage width
    PackLength(u8),
    /// Fractional seconds precision for TIME2/DATETIME2/TIMESTAMP2
    Fsp(u8),
}

/// A column as described by the binlog
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireColumn {
    pub column_type: ColumnType,
    pub meta: ColumnMeta,
}

impl WireColumn {
    pub fn new(column_type: ColumnType, meta: ColumnMeta) -> Self {
        Self { column_type, meta }
    }
}

// ============================================================================
// Declared schema (information_schema)
// ============================================================================

/// Raw row from `information_schema.columns`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnDefinition {
    pub name: String,
    pub ordinal_position: u32,
    /// `DATA_TYPE`, e.g. `int`
    pub data_type: String,
    /// `COLUMN_TYPE`, e.g. `int(10) unsigned`
    pub column_type: String,
    pub is_nullable: bool,
    /// `EXTRA`, e.g. `auto_increment`
    pub extra: String,
    pub character_set: Option<String>,
    pub collation: Option<String>,
    pub comment: String,
}

/// Raw row from `information_schema.key_column_usage`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyColumnUsage {
    pub constraint_name: String,
    pub column_name: String,
    pub ordinal_position: u32,
    pub referenced_table_schema: Option<String>,
    pub referenced_table_name: Option<String>,
    pub referenced_column_name: Option<String>,
}

/// Resolved description of one column
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnSchema {
    pub name: String,
    pub ordinal_position: u32,
    /// Wire type implied by the declared type
    pub column_type: ColumnType,
    pub data_type: String,
    pub declared_type: String,
    pub nullable: bool,
    pub unsigned: bool,
    pub auto_increment: bool,
    pub max_length: Option<u64>,
    pub precision: Option<u8>,
    pub scale: Option<u8>,
    /// Fractional seconds precision, 0 for second granularity
    pub fsp: u8,
    pub options: Vec<String>,
    #[serde(skip)]
    option_index: HashMap<String, usize>,
}

impl ColumnSchema {
    /// Build a column from its `information_schema.columns` row.
    pub fn from_definition(def: &ColumnDefinition) -> Result<Self, SchemaError> {
        let data_type = def.data_type.to_ascii_lowercase();
        let declared = def.column_type.to_ascii_lowercase();
        let args = paren_args(&declared);

        let column_type = match data_type.as_str() {
            "tinyint" | "bool" | "boolean" => ColumnType::Tiny,
            "smallint" => ColumnType::Short,
            "mediumint" => ColumnType::Int24,
            "int" | "integer" => ColumnType::Long,
            "bigint" => ColumnType::LongLong,
            "float" => ColumnType::Float,
            "double" | "real" => ColumnType::Double,
            "decimal" | "numeric" => ColumnType::NewDecimal,
            "date" => ColumnType::Date,
            "datetime" => ColumnType::DateTime2,
            "timestamp" => ColumnType::Timestamp2,
            "time" => ColumnType::Time2,
            "year" => ColumnType::Year,
            "char" | "binary" => ColumnType::String,
            "varchar" | "varbinary" => ColumnType::Varchar,
            "tinyblob" | "tinytext" => ColumnType::TinyBlob,
            "blob" | "text" => ColumnType::Blob,
            "mediumblob" | "mediumtext" => ColumnType::MediumBlob,
            "longblob" | "longtext" => ColumnType::LongBlob,
            "enum" => ColumnType::Enum,
            "set" => ColumnType::Set,
            "bit" => ColumnType::Bit,
            "json" => ColumnType::Json,
            "geometry" | "point" | "linestring" | "polygon" => ColumnType::Geometry,
            other => {
                return Err(SchemaError::UnsupportedType {
                    column: def.name.clone(),
                    data_type: other.to_string(),
                })
            }
        };

        let invalid = |detail: &str| SchemaError::InvalidDefinition {
            column: def.name.clone(),
            detail: detail.to_string(),
        };

        let mut max_length = None;
        let mut precision = None;
        let mut scale = None;
        let mut fsp = 0;
        let mut options = Vec::new();

        match column_type {
            ColumnType::Enum | ColumnType::Set => {
                options = parse_options(args.ok_or_else(|| invalid("missing option list"))?);
            }
            ColumnType::NewDecimal | ColumnType::Double | ColumnType::Float => {
                if let Some(args) = args {
                    let mut parts = args.split(',').map(str::trim);
                    precision = parts.next().and_then(|p| p.parse().ok());
                    scale = parts.next().and_then(|s| s.parse().ok());
                }
                if column_type == ColumnType::NewDecimal {
                    precision = precision.or(Some(10));
                    scale = scale.or(Some(0));
                }
            }
            ColumnType::DateTime2 | ColumnType::Timestamp2 | ColumnType::Time2 => {
                if let Some(args) = args {
                    fsp = args
                        .trim()
                        .parse()
                        .map_err(|_| invalid("bad fractional seconds precision"))?;
                }
            }
            ColumnType::String | ColumnType::Varchar | ColumnType::Bit => {
                max_length = args.and_then(|a| a.trim().parse().ok());
            }
            ty if ty.is_blob() => {
                max_length = ty.default_max_length();
            }
            _ => {}
        }

        let option_index = options
            .iter()
            .enumerate()
            .map(|(i, o)| (o.clone(), i))
            .collect();

        Ok(Self {
            name: def.name.clone(),
            ordinal_position: def.ordinal_position,
            column_type,
            unsigned: declared.contains("unsigned"),
            auto_increment: def.extra.to_ascii_lowercase().contains("auto_increment"),
            data_type,
            declared_type: declared,
            nullable: def.is_nullable,
            max_length,
            precision,
            scale,
            fsp,
            options,
            option_index,
        })
    }

    /// Position of `value` in the enum/set option list.
    pub fn option_index(&self, value: &str) -> Option<usize> {
        self.option_index.get(value).copied()
    }

    /// Binary columns decode to bytes, text columns to strings.
    pub fn is_binary(&self) -> bool {
        matches!(self.data_type.as_str(), "binary" | "varbinary")
            || self.data_type.ends_with("blob")
    }

    /// Normalize a value read back from the store to the shape the binlog
    /// decoder produces for this column.
    pub fn coerce(&self, value: Value) -> Value {
        if value.is_null() {
            return value;
        }
        match self.column_type {
            ColumnType::Tiny
            | ColumnType::Short
            | ColumnType::Int24
            | ColumnType::Long
            | ColumnType::LongLong
            | ColumnType::Year => match value {
                Value::String(ref s) => {
                    let s = s.trim();
                    if let Ok(v) = s.parse::<i64>() {
                        Value::Int(v)
                    } else if let Ok(v) = s.parse::<u64>() {
                        Value::UInt(v)
                    } else {
                        value
                    }
                }
                other => other,
            },
            ColumnType::NewDecimal | ColumnType::Decimal => match value.as_decimal() {
                Some(d) => Value::Decimal(d),
                None => value,
            },
            ColumnType::Float => match value {
                Value::Double(v) => Value::Float(v as f32),
                Value::String(ref s) => s.trim().parse().map(Value::Float).unwrap_or(value),
                other => other,
            },
            ColumnType::Double => match value {
                Value::Float(v) => Value::Double(v as f64),
                Value::String(ref s) => s.trim().parse().map(Value::Double).unwrap_or(value),
                other => other,
            },
            ColumnType::Timestamp | ColumnType::Timestamp2 => match value.as_datetime() {
                Some(dt) => Value::Timestamp(dt.and_utc()),
                None => value,
            },
            ColumnType::DateTime | ColumnType::DateTime2 => match value.as_datetime() {
                Some(dt) => Value::DateTime(dt),
                None => value,
            },
            ColumnType::Date | ColumnType::NewDate => match value.as_datetime() {
                Some(dt) => Value::Date(dt.date()),
                None => value,
            },
            ColumnType::Bit => match value {
                Value::Bytes(ref b) if b.len() <= 8 => {
                    Value::UInt(b.iter().fold(0u64, |acc, x| (acc << 8) | *x as u64))
                }
                other => other,
            },
            _ if self.is_binary() => match value {
                Value::String(s) => Value::Bytes(s.into_bytes()),
                other => other,
            },
            _ => match value {
                Value::Bytes(b) => Value::String(String::from_utf8_lossy(&b).into_owned()),
                other => other,
            },
        }
    }
}

/// Contents of the first parenthesised argument list, e.g. `10,2` for `decimal(10,2)`.
fn paren_args(declared: &str) -> Option<&str> {
    let start = declared.find('(')?;
    let end = declared.rfind(')')?;
    (end > start).then(|| &declared[start + 1..end])
}

/// Parse a quoted enum/set option list: `'a','b''c'` -> `["a", "b'c"]`.
fn parse_options(list: &str) -> Vec<String> {
    let mut options = Vec::new();
    let mut chars = list.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\'' {
            continue;
        }
        let mut option = String::new();
        while let Some(c) = chars.next() {
            match c {
                '\'' if chars.peek() == Some(&'\'') => {
                    chars.next();
                    option.push('\'');
                }
                '\'' => break,
                '\\' => {
                    if let Some(escaped) = chars.next() {
                        option.push(escaped);
                    }
                }
                other => option.push(other),
            }
        }
        options.push(option);
    }
    options
}

/// Foreign key constraint group
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForeignKey {
    pub name: String,
    pub columns: Vec<String>,
    pub referenced_database: String,
    pub referenced_table: String,
    pub referenced_columns: Vec<String>,
}

/// Resolved table schema
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableSchema {
    pub database: String,
    pub table: String,
    pub columns: Vec<ColumnSchema>,
    /// Primary key columns in key order
    pub primary_key: Vec<String>,
    pub foreign_keys: Vec<ForeignKey>,
    /// Bumped by the owner on every refresh
    pub version: u64,
}

impl TableSchema {
    /// Assemble a schema from introspection rows.
    pub fn from_information_schema(
        database: &str,
        table: &str,
        columns: &[ColumnDefinition],
        keys: &[KeyColumnUsage],
    ) -> Result<Self, SchemaError> {
        if columns.is_empty() {
            return Err(SchemaError::TableNotFound {
                database: database.to_string(),
                table: table.to_string(),
            });
        }

        let mut defs: Vec<&ColumnDefinition> = columns.iter().collect();
        defs.sort_by_key(|d| d.ordinal_position);
        let columns = defs
            .into_iter()
            .map(ColumnSchema::from_definition)
            .collect::<Result<Vec<_>, _>>()?;

        let mut keys: Vec<&KeyColumnUsage> = keys.iter().collect();
        keys.sort_by(|a, b| {
            a.constraint_name
                .cmp(&b.constraint_name)
                .then(a.ordinal_position.cmp(&b.ordinal_position))
        });

        let primary_key = keys
            .iter()
            .filter(|k| k.constraint_name == "PRIMARY")
            .map(|k| k.column_name.clone())
            .collect();

        let mut foreign_keys: Vec<ForeignKey> = Vec::new();
        for key in keys.iter().filter(|k| k.referenced_table_name.is_some()) {
            let referenced_table = key.referenced_table_name.clone().unwrap_or_default();
            let referenced_column = key.referenced_column_name.clone().unwrap_or_default();
            match foreign_keys.iter_mut().find(|fk| fk.name == key.constraint_name) {
                Some(fk) => {
                    fk.columns.push(key.column_name.clone());
                    fk.referenced_columns.push(referenced_column);
                }
                None => foreign_keys.push(ForeignKey {
                    name: key.constraint_name.clone(),
                    columns: vec![key.column_name.clone()],
                    referenced_database: key
                        .referenced_table_schema
                        .clone()
                        .unwrap_or_else(|| database.to_string()),
                    referenced_table,
                    referenced_columns: vec![referenced_column],
                }),
            }
        }

        Ok(Self {
            database: database.to_string(),
            table: table.to_string(),
            columns,
            primary_key,
            foreign_keys,
            version: 0,
        })
    }

    /// `database.table`
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.database, self.table)
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn is_key_column(&self, name: &str) -> bool {
        self.primary_key.iter().any(|k| k == name)
    }

    /// Primary key values of `row`, or `None` if any is missing or NULL.
    pub fn key_values(&self, row: &Row) -> Option<Row> {
        if self.primary_key.is_empty() {
            return None;
        }
        self.primary_key
            .iter()
            .map(|k| match row.get(k) {
                Some(v) if !v.is_null() => Some((k.clone(), v.clone())),
                _ => None,
            })
            .collect()
    }

    /// Cache key: primary key values joined with `-` in key order.
    pub fn build_key(&self, row: &Row) -> Option<String> {
        let parts = self
            .primary_key
            .iter()
            .map(|k| row.get(k).and_then(Value::key_part))
            .collect::<Option<Vec<_>>>()?;
        (!parts.is_empty()).then(|| parts.join("-"))
    }

    /// Coerce every known column of a store row.
    pub fn coerce_row(&self, row: Row) -> Row {
        row.into_iter()
            .map(|(name, value)| {
                let value = match self.column(&name) {
                    Some(column) => column.coerce(value),
                    None => value,
                };
                (name, value)
            })
            .collect()
    }
}
