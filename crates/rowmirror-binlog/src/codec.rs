//! Column value codec
//!
//! Pure functions that decode one column's row-image bytes into a [`Value`],
//! given the declared [`ColumnSchema`] and the TABLE_MAP [`WireColumn`].
//!
//! Supported wire types:
//! - integers (TINY, SHORT, INT24, LONG, LONGLONG), YEAR, BIT
//! - FLOAT, DOUBLE, NEWDECIMAL
//! - VARCHAR, VAR_STRING, STRING (CHAR), ENUM, SET, blob/text family
//! - DATE, DATETIME, DATETIME2, TIMESTAMP, TIMESTAMP2
//!
//! Anything else is [`DecodeError::UnsupportedType`].

use chrono::{DateTime, NaiveDate};
use rust_decimal::Decimal;
use tracing::trace;

use crate::error::{DecodeError, Result};
use crate::reader::EventReader;
use crate::schema::{ColumnMeta, ColumnSchema, ColumnType, WireColumn};
use crate::value::Value;

/// Largest scale a `Decimal` can carry
const MAX_DECIMAL_SCALE: usize = 28;

/// Bytes used by a partial group of `n` decimal digits (n = 0..=9)
const DIG_TO_BYTES: [usize; 10] = [0, 1, 1, 2, 2, 3, 3, 4, 4, 4];
const DIGITS_PER_WORD: usize = 9;
/// Offset applied to the integer part of DATETIME2
const DATETIMEF_INT_OFS: i64 = 0x80_0000_0000;

/// Decode one non-NULL column value.
pub fn decode_value(r: &mut EventReader<'_>, column: &ColumnSchema, wire: &WireColumn) -> Result<Value> {
    trace!(
        "Decoding column `{}` as {:?} at offset {}",
        column.name,
        wire.column_type,
        r.position()
    );
    match wire.column_type {
        ColumnType::Tiny => decode_int(r, 1, column.unsigned),
        ColumnType::Short => decode_int(r, 2, column.unsigned),
        ColumnType::Int24 => decode_int(r, 3, column.unsigned),
        ColumnType::Long => decode_int(r, 4, column.unsigned),
        ColumnType::LongLong => decode_int(r, 8, column.unsigned),
        ColumnType::Float => Ok(Value::Float(float_from_word(r.u32_le()?))),
        ColumnType::Double => {
            let low = r.u32_le()?;
            let high = r.u32_le()?;
            Ok(Value::Double(double_from_words(high, low)))
        }
        ColumnType::NewDecimal => {
            let (precision, scale) = match wire.meta {
                ColumnMeta::Decimal { precision, scale } => (precision, scale),
                _ => (column.precision.unwrap_or(10), column.scale.unwrap_or(0)),
            };
            decode_decimal(r, &column.name, precision as usize, scale as usize).map(Value::Decimal)
        }
        ColumnType::Varchar | ColumnType::VarString | ColumnType::String => {
            let max_length = match wire.meta {
                ColumnMeta::MaxLength(len) => len as u64,
                _ => column.max_length.unwrap_or(0),
            };
            let len = if max_length > 255 {
                r.u16_le()? as usize
            } else {
                r.u8()? as usize
            };
            Ok(text_or_binary(column, r.bytes(len)?))
        }
        ColumnType::Enum => {
            let pack_length = match wire.meta {
                ColumnMeta::PackLength(n) => n as usize,
                _ if column.options.len() > 255 => 2,
                _ => 1,
            };
            let index = r.uint_le(pack_length)? as u16;
            decode_enum(column, index)
        }
        ColumnType::Set => {
            let pack_length = match wire.meta {
                ColumnMeta::PackLength(n) => n as usize,
                _ => column.options.len().div_ceil(8).max(1),
            };
            let bits = r.uint_le(pack_length)?;
            Ok(Value::String(decode_set(column, bits)))
        }
        ColumnType::TinyBlob | ColumnType::Blob | ColumnType::MediumBlob | ColumnType::LongBlob => {
            let length_size = match wire.meta {
                ColumnMeta::LengthSize(n) => n as usize,
                _ => blob_length_size(column.column_type),
            };
            if !(1..=4).contains(&length_size) {
                return Err(DecodeError::malformed(
                    "blob metadata",
                    format!("length size {} for column `{}`", length_size, column.name),
                ));
            }
            let len = r.uint_le(length_size)? as usize;
            Ok(text_or_binary(column, r.bytes(len)?))
        }
        ColumnType::Bit => {
            let total_bits = match wire.meta {
                ColumnMeta::Bits { bits, bytes } => bytes as usize * 8 + bits as usize,
                _ => column.max_length.unwrap_or(1) as usize,
            };
            let width = total_bits.div_ceil(8).clamp(1, 8);
            Ok(Value::UInt(r.uint_be(width)?))
        }
        ColumnType::Year => {
            let year = r.u8()?;
            Ok(Value::Int(if year == 0 { 0 } else { 1900 + year as i64 }))
        }
        ColumnType::Date => {
            let packed = r.uint_le(3)? as u32;
            let day = packed & 0x1F;
            let month = (packed >> 5) & 0x0F;
            let year = (packed >> 9) as i32;
            date_value(column, year, month, day)
        }
        ColumnType::DateTime => {
            let packed = r.u64_le()?;
            let date = packed / 1_000_000;
            let time = packed % 1_000_000;
            datetime_value(
                column,
                (date / 10_000) as i32,
                ((date / 100) % 100) as u32,
                (date % 100) as u32,
                (time / 10_000) as u32,
                ((time / 100) % 100) as u32,
                (time % 100) as u32,
                0,
            )
        }
        ColumnType::DateTime2 => {
            let fsp = wire_fsp(wire, column);
            let packed = r.uint_be(5)? as i64;
            let millis = read_fraction_millis(r, fsp)?;
            let int_part = packed - DATETIMEF_INT_OFS;
            let ymd = int_part >> 17;
            let hms = int_part % (1 << 17);
            let year_month = ymd >> 5;
            datetime_value(
                column,
                (year_month / 13) as i32,
                (year_month % 13) as u32,
                (ymd % (1 << 5)) as u32,
                (hms >> 12) as u32,
                ((hms >> 6) % (1 << 6)) as u32,
                (hms % (1 << 6)) as u32,
                millis,
            )
        }
        ColumnType::Timestamp => {
            let secs = r.u32_le()?;
            timestamp_value(column, secs, 0)
        }
        ColumnType::Timestamp2 => {
            let fsp = wire_fsp(wire, column);
            let secs = r.uint_be(4)? as u32;
            let millis = read_fraction_millis(r, fsp)?;
            timestamp_value(column, secs, millis)
        }
        other => Err(DecodeError::UnsupportedType {
            column: column.name.clone(),
            type_code: other.code(),
        }),
    }
}

/// Fixed-width little-endian integer, sign-extended when the column is signed.
pub fn decode_int(r: &mut EventReader<'_>, width: usize, unsigned: bool) -> Result<Value> {
    let raw = r.uint_le(width)?;
    if unsigned {
        return Ok(Value::UInt(raw));
    }
    let shift = 64 - width as u32 * 8;
    Ok(Value::Int(((raw << shift) as i64) >> shift))
}

/// IEEE-754 single precision from its raw 32-bit word.
///
/// Sign, biased exponent and mantissa are combined arithmetically; every
/// finite single is exact in `f64`, so the narrowing cast is lossless.
pub fn float_from_word(word: u32) -> f32 {
    let negative = word >> 31 == 1;
    let exponent = ((word >> 23) & 0xFF) as i32;
    let mantissa = f64::from(word & 0x7F_FFFF);
    let magnitude = match exponent {
        0 => mantissa * 2f64.powi(-149),
        0xFF if mantissa == 0.0 => f64::INFINITY,
        // NaN keeps its payload
        0xFF => return f32::from_bits(word),
        _ => (1.0 + mantissa / 2f64.powi(23)) * 2f64.powi(exponent - 127),
    };
    let value = magnitude as f32;
    if negative {
        -value
    } else {
        value
    }
}

/// IEEE-754 double precision from its high and low 32-bit words.
pub fn double_from_words(high: u32, low: u32) -> f64 {
    let negative = high >> 31 == 1;
    let exponent = ((high >> 20) & 0x7FF) as i32;
    let raw_mantissa = (u64::from(high & 0xF_FFFF) << 32) | u64::from(low);
    // 52 bits, exact in an f64
    let fraction = raw_mantissa as f64 / 2f64.powi(52);
    let magnitude = match exponent {
        0 => fraction * 2f64.powi(-1022),
        0x7FF if raw_mantissa == 0 => f64::INFINITY,
        0x7FF => return f64::from_bits((u64::from(high) << 32) | u64::from(low)),
        _ => (1.0 + fraction) * 2f64.powi(exponent - 1023),
    };
    if negative {
        -magnitude
    } else {
        magnitude
    }
}

/// Decode a packed DECIMAL(precision, scale).
pub fn decode_decimal(
    r: &mut EventReader<'_>,
    column: &str,
    precision: usize,
    scale: usize,
) -> Result<Decimal> {
    let invalid = |detail: String| DecodeError::InvalidDecimal {
        column: column.to_string(),
        detail,
    };
    if scale > precision {
        return Err(invalid(format!("scale {} exceeds precision {}", scale, precision)));
    }

    let int_digits = precision - scale;
    let uncomp_int = int_digits / DIGITS_PER_WORD;
    let comp_int = int_digits % DIGITS_PER_WORD;
    let uncomp_frac = scale / DIGITS_PER_WORD;
    let comp_frac = scale % DIGITS_PER_WORD;

    let size = uncomp_int * 4 + DIG_TO_BYTES[comp_int] + uncomp_frac * 4 + DIG_TO_BYTES[comp_frac];
    if size == 0 {
        return Ok(Decimal::ZERO);
    }

    let mut bytes = r.bytes(size)?.to_vec();
    // sign bit is stored inverted; negative values are stored complemented
    let negative = bytes[0] & 0x80 == 0;
    bytes[0] ^= 0x80;
    if negative {
        for b in bytes.iter_mut() {
            *b ^= 0xFF;
        }
    }

    let mut groups = EventReader::new(&bytes);
    let mut text = String::with_capacity(precision + 2);
    if negative {
        text.push('-');
    }

    let mut int_part = String::new();
    if comp_int > 0 {
        int_part.push_str(&groups.uint_be(DIG_TO_BYTES[comp_int])?.to_string());
    }
    for _ in 0..uncomp_int {
        int_part.push_str(&format!("{:09}", groups.uint_be(4)?));
    }
    let int_part = int_part.trim_start_matches('0');
    text.push_str(if int_part.is_empty() { "0" } else { int_part });

    let mut frac = String::with_capacity(scale);
    for _ in 0..uncomp_frac {
        frac.push_str(&format!("{:09}", groups.uint_be(4)?));
    }
    if comp_frac > 0 {
        let value = groups.uint_be(DIG_TO_BYTES[comp_frac])?;
        frac.push_str(&format!("{:0width$}", value, width = comp_frac));
    }
    // Zeros past the widest representable scale carry no value
    if frac.len() > MAX_DECIMAL_SCALE {
        let significant = frac.trim_end_matches('0').len().max(MAX_DECIMAL_SCALE);
        frac.truncate(significant);
    }
    if !frac.is_empty() {
        text.push('.');
        text.push_str(&frac);
    }

    let value = Decimal::from_str_exact(&text).map_err(|e| invalid(format!("{} ({})", e, text)))?;
    if value.scale() as usize != frac.len() {
        return Err(invalid(format!("{} does not fit a 96-bit decimal", text)));
    }
    Ok(value)
}

fn decode_enum(column: &ColumnSchema, index: u16) -> Result<Value> {
    if index == 0 {
        return Ok(Value::String(String::new()));
    }
    column
        .options
        .get(index as usize - 1)
        .map(|o| Value::String(o.clone()))
        .ok_or_else(|| DecodeError::EnumIndex {
            column: column.name.clone(),
            index,
            options: column.options.len(),
        })
}

fn decode_set(column: &ColumnSchema, bits: u64) -> String {
    column
        .options
        .iter()
        .enumerate()
        .filter(|(i, _)| *i < 64 && bits & (1 << i) != 0)
        .map(|(_, o)| o.as_str())
        .collect::<Vec<_>>()
        .join(",")
}

fn text_or_binary(column: &ColumnSchema, bytes: &[u8]) -> Value {
    if column.is_binary() {
        Value::Bytes(bytes.to_vec())
    } else {
        Value::String(String::from_utf8_lossy(bytes).into_owned())
    }
}

fn blob_length_size(declared: ColumnType) -> usize {
    match declared {
        ColumnType::TinyBlob => 1,
        ColumnType::MediumBlob => 3,
        ColumnType::LongBlob => 4,
        _ => 2,
    }
}

fn wire_fsp(wire: &WireColumn, column: &ColumnSchema) -> u8 {
    match wire.meta {
        ColumnMeta::Fsp(fsp) => fsp,
        _ => column.fsp,
    }
}

/// Read the fractional-seconds field and normalize it to milliseconds.
fn read_fraction_millis(r: &mut EventReader<'_>, fsp: u8) -> Result<u32> {
    if fsp == 0 {
        return Ok(0);
    }
    if fsp > 6 {
        return Err(DecodeError::malformed(
            "temporal metadata",
            format!("fractional precision {}", fsp),
        ));
    }
    let width = (fsp as usize).div_ceil(2);
    let mut fraction = r.uint_be(width)? as u32;
    // odd precisions are stored with one extra digit
    if fsp % 2 == 1 {
        fraction /= 10;
    }
    Ok(match fsp {
        1 => fraction * 100,
        2 => fraction * 10,
        3 => fraction,
        n => fraction / 10u32.pow(n as u32 - 3),
    })
}

fn date_value(column: &ColumnSchema, year: i32, month: u32, day: u32) -> Result<Value> {
    if year == 0 && month == 0 && day == 0 {
        return Ok(Value::Null);
    }
    NaiveDate::from_ymd_opt(year, month, day)
        .map(Value::Date)
        .ok_or_else(|| DecodeError::InvalidTemporal {
            column: column.name.clone(),
            detail: format!("{:04}-{:02}-{:02}", year, month, day),
        })
}

#[allow(clippy::too_many_arguments)]
fn datetime_value(
    column: &ColumnSchema,
    year: i32,
    month: u32,
    day: u32,
    hour: u32,
    minute: u32,
    second: u32,
    millis: u32,
) -> Result<Value> {
    if year == 0 && month == 0 && day == 0 {
        return Ok(Value::Null);
    }
    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|d| d.and_hms_milli_opt(hour, minute, second, millis))
        .map(Value::DateTime)
        .ok_or_else(|| DecodeError::InvalidTemporal {
            column: column.name.clone(),
            detail: format!(
                "{:04}-{:02}-{:02} {:02}:{:02}:{:02}.{:03}",
                year, month, day, hour, minute, second, millis
            ),
        })
}

fn timestamp_value(column: &ColumnSchema, secs: u32, millis: u32) -> Result<Value> {
    if secs == 0 && millis == 0 {
        return Ok(Value::Null);
    }
    DateTime::from_timestamp(secs as i64, millis * 1_000_000)
        .map(Value::Timestamp)
        .ok_or_else(|| DecodeError::InvalidTemporal {
            column: column.name.clone(),
            detail: format!("epoch seconds {}", secs),
        })
}
