//! Binlog event decoder
//!
//! Frames one replication packet into a typed event:
//! - FORMAT_DESCRIPTION_EVENT (checksum detection)
//! - ROTATE_EVENT
//! - TABLE_MAP_EVENT
//! - WRITE_ROWS / UPDATE_ROWS / DELETE_ROWS (v1 and v2)
//!
//! Everything else is reported as [`BinlogEvent::Ignored`].
//!
//! Table map and rows events are decoded lazily. A [`TableMapEvent`] keeps its
//! descriptor bytes so the caller can compare them against a cached copy
//! before paying for [`TableMapEvent::columns`]; a [`RowsEvent`] keeps its body
//! until the caller has a resolved schema to decode it with.

use bytes::{Buf, Bytes};
use tracing::{debug, trace};

use crate::error::{DecodeError, Result};
use crate::reader::EventReader;
use crate::row::RowImageDecoder;
use crate::schema::{ColumnMeta, ColumnSchema, ColumnType, WireColumn};
use crate::value::Row;

/// Binlog event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    Query,
    Rotate,
    FormatDescription,
    Xid,
    TableMap,
    WriteRowsV1,
    UpdateRowsV1,
    DeleteRowsV1,
    Heartbeat,
    WriteRowsV2,
    UpdateRowsV2,
    DeleteRowsV2,
    Gtid,
    AnonymousGtid,
    PreviousGtids,
    Other(u8),
}

impl EventType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            2 => EventType::Query,
            4 => EventType::Rotate,
            15 => EventType::FormatDescription,
            16 => EventType::Xid,
            19 => EventType::TableMap,
            23 => EventType::WriteRowsV1,
            24 => EventType::UpdateRowsV1,
            25 => EventType::DeleteRowsV1,
            27 => EventType::Heartbeat,
            30 => EventType::WriteRowsV2,
            31 => EventType::UpdateRowsV2,
            32 => EventType::DeleteRowsV2,
            33 => EventType::Gtid,
            34 => EventType::AnonymousGtid,
            35 => EventType::PreviousGtids,
            other => EventType::Other(other),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            EventType::Query => 2,
            EventType::Rotate => 4,
            EventType::FormatDescription => 15,
            EventType::Xid => 16,
            EventType::TableMap => 19,
            EventType::WriteRowsV1 => 23,
            EventType::UpdateRowsV1 => 24,
            EventType::DeleteRowsV1 => 25,
            EventType::Heartbeat => 27,
            EventType::WriteRowsV2 => 30,
            EventType::UpdateRowsV2 => 31,
            EventType::DeleteRowsV2 => 32,
            EventType::Gtid => 33,
            EventType::AnonymousGtid => 34,
            EventType::PreviousGtids => 35,
            EventType::Other(code) => code,
        }
    }

    /// Row operation and whether the event uses the v2 layout.
    pub fn rows_kind(self) -> Option<(RowsKind, bool)> {
        match self {
            EventType::WriteRowsV1 => Some((RowsKind::Insert, false)),
            EventType::UpdateRowsV1 => Some((RowsKind::Update, false)),
            EventType::DeleteRowsV1 => Some((RowsKind::Delete, false)),
            EventType::WriteRowsV2 => Some((RowsKind::Insert, true)),
            EventType::UpdateRowsV2 => Some((RowsKind::Update, true)),
            EventType::DeleteRowsV2 => Some((RowsKind::Delete, true)),
            _ => None,
        }
    }

    pub fn is_row_event(self) -> bool {
        self.rows_kind().is_some()
    }
}

/// Binlog event header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventHeader {
    pub timestamp: u32,
    pub event_type: EventType,
    pub server_id: u32,
    pub event_length: u32,
    /// Offset of the next event in the current binlog file
    pub next_position: u32,
    pub flags: u16,
}

impl EventHeader {
    pub const SIZE: usize = 19;

    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(DecodeError::HeaderTooShort(data.len()));
        }

        let mut buf = &data[..Self::SIZE];
        Ok(Self {
            timestamp: buf.get_u32_le(),
            event_type: EventType::from_u8(buf.get_u8()),
            server_id: buf.get_u32_le(),
            event_length: buf.get_u32_le(),
            next_position: buf.get_u32_le(),
            flags: buf.get_u16_le(),
        })
    }
}

/// Format description event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatDescriptionEvent {
    pub binlog_version: u16,
    pub server_version: String,
    pub create_timestamp: u32,
    pub header_length: u8,
    /// 0 = NONE, 1 = CRC32
    pub checksum_type: u8,
}

/// Rotate event: the stream continues in another binlog file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotateEvent {
    pub position: u64,
    pub next_binlog: String,
}

/// Table map event, with the column layout left undecoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableMapEvent {
    pub table_id: u64,
    pub flags: u16,
    pub database: String,
    pub table: String,
    /// Bytes from the schema name to the end of the event. Compared verbatim
    /// to detect an unchanged table definition.
    pub descriptor: Bytes,
    /// Offset of the column count within `descriptor`
    columns_offset: usize,
}

impl TableMapEvent {
    /// Parse column types and per-column metadata.
    pub fn columns(&self) -> Result<Vec<WireColumn>> {
        let mut r = EventReader::new(&self.descriptor);
        r.skip(self.columns_offset)?;

        let count = r.packed_int()? as usize;
        let types = r.bytes(count)?;
        let meta_len = r.packed_int()? as usize;
        let mut meta = EventReader::new(r.bytes(meta_len)?);

        let mut columns = Vec::with_capacity(count);
        for (idx, &code) in types.iter().enumerate() {
            let column_type = ColumnType::from_u8(code).ok_or_else(|| DecodeError::UnsupportedType {
                column: format!("#{}", idx),
                type_code: code,
            })?;
            columns.push(read_column_meta(&mut meta, column_type)?);
        }
        if !meta.is_empty() {
            return Err(DecodeError::malformed(
                "table map",
                format!(
                    "metadata block declares {} bytes, {} consumed",
                    meta_len,
                    meta.position()
                ),
            ));
        }

        // nullability bitmap; optional extended metadata may follow
        r.skip(count.div_ceil(8))?;

        trace!(
            "Parsed {} column(s) for table {} ({}.{})",
            columns.len(),
            self.table_id,
            self.database,
            self.table
        );
        Ok(columns)
    }
}

fn read_column_meta(r: &mut EventReader<'_>, column_type: ColumnType) -> Result<WireColumn> {
    let wire = match column_type {
        ColumnType::Float | ColumnType::Double => WireColumn::new(column_type, ColumnMeta::Size(r.u8()?)),
        ColumnType::Varchar | ColumnType::VarString => {
            WireColumn::new(column_type, ColumnMeta::MaxLength(r.u16_le()?))
        }
        ColumnType::Bit => {
            let bits = r.u8()?;
            let bytes = r.u8()?;
            WireColumn::new(column_type, ColumnMeta::Bits { bits, bytes })
        }
        ColumnType::NewDecimal => {
            let precision = r.u8()?;
            let scale = r.u8()?;
            WireColumn::new(column_type, ColumnMeta::Decimal { precision, scale })
        }
        ColumnType::TinyBlob
        | ColumnType::Blob
        | ColumnType::MediumBlob
        | ColumnType::LongBlob
        | ColumnType::Json
        | ColumnType::Geometry => WireColumn::new(column_type, ColumnMeta::LengthSize(r.u8()?)),
        ColumnType::String | ColumnType::Enum | ColumnType::Set => {
            let b0 = r.u8()?;
            let b1 = r.u8()?;
            string_meta(column_type, b0, b1)
        }
        ColumnType::Timestamp2 | ColumnType::DateTime2 | ColumnType::Time2 => {
            WireColumn::new(column_type, ColumnMeta::Fsp(r.u8()?))
        }
        _ => WireColumn::new(column_type, ColumnMeta::None),
    };
    Ok(wire)
}

/// STRING metadata carries the real type in its first byte, which turns the
/// column into ENUM or SET. Long CHAR columns fold two length bits into it.
fn string_meta(column_type: ColumnType, b0: u8, b1: u8) -> WireColumn {
    if b0 == 0 {
        return WireColumn::new(column_type, ColumnMeta::MaxLength(b1 as u16));
    }
    match ColumnType::from_u8(b0 | 0x30) {
        Some(real @ (ColumnType::Enum | ColumnType::Set)) => {
            WireColumn::new(real, ColumnMeta::PackLength(b1))
        }
        _ => {
            let meta = ((b0 as u16) << 8) | b1 as u16;
            let max_length = (((meta >> 4) & 0x300) ^ 0x300) + (meta & 0xFF);
            WireColumn::new(ColumnType::String, ColumnMeta::MaxLength(max_length))
        }
    }
}

/// Row operation carried by a rows event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowsKind {
    Insert,
    Update,
    Delete,
}

/// Rows event with its row images still encoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowsEvent {
    pub kind: RowsKind,
    pub table_id: u64,
    pub flags: u16,
    /// Column count, present-column bitmap(s) and row images
    pub body: Bytes,
}

/// One decoded row mutation
#[derive(Debug, Clone, PartialEq)]
pub enum RowChange {
    Insert(Row),
    Update { before: Row, after: Row },
    Delete(Row),
}

impl RowsEvent {
    /// Decode every row image in the event.
    ///
    /// `columns` is the declared schema and `wire` the layout from the active
    /// table map; both must describe the event's column count.
    pub fn decode_rows(&self, columns: &[ColumnSchema], wire: &[WireColumn]) -> Result<Vec<RowChange>> {
        let mut r = EventReader::new(&self.body);
        let count = r.packed_int()? as usize;
        if count != wire.len() {
            return Err(DecodeError::ColumnCount {
                event: count,
                schema: wire.len(),
            });
        }
        let decoder = RowImageDecoder::new(columns, wire)?;

        // present-column bitmaps: full row images are assumed
        r.skip(decoder.bitmap_len())?;
        if self.kind == RowsKind::Update {
            r.skip(decoder.bitmap_len())?;
        }

        let mut rows = Vec::new();
        while !r.is_empty() {
            let change = match self.kind {
                RowsKind::Insert => RowChange::Insert(decoder.decode(&mut r)?),
                RowsKind::Delete => RowChange::Delete(decoder.decode(&mut r)?),
                RowsKind::Update => {
                    let before = decoder.decode(&mut r)?;
                    let after = decoder.decode(&mut r)?;
                    RowChange::Update { before, after }
                }
            };
            rows.push(change);
        }

        debug!(
            "Decoded {} {:?} row(s) for table {}",
            rows.len(),
            self.kind,
            self.table_id
        );
        Ok(rows)
    }
}

/// Decoded binlog event
#[derive(Debug, Clone, PartialEq)]
pub enum BinlogEvent {
    /// Format description - fixes the checksum algorithm
    FormatDescription(FormatDescriptionEvent),

    /// Rotate to new binlog file
    Rotate(RotateEvent),

    /// Table map - binds a table ID to a table definition
    TableMap(TableMapEvent),

    /// Row insert, update or delete
    Rows(RowsEvent),

    /// Any other event; its bytes are skipped
    Ignored(EventType),
}

/// Binlog decoder
///
/// Holds the only state that spans events: whether a trailing CRC32 follows
/// each payload.
#[derive(Debug, Default)]
pub struct BinlogDecoder {
    checksum: Option<bool>,
    format: Option<FormatDescriptionEvent>,
}

impl BinlogDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the checksum mode negotiated with the server.
    ///
    /// The next FORMAT_DESCRIPTION event overrides it.
    pub fn set_checksum(&mut self, enabled: bool) {
        self.checksum = Some(enabled);
    }

    pub fn checksum(&self) -> Option<bool> {
        self.checksum
    }

    pub fn format(&self) -> Option<&FormatDescriptionEvent> {
        self.format.as_ref()
    }

    /// Decode a binlog event.
    ///
    /// Returns the event with its header; `header.next_position` is where the
    /// following event starts in the current file.
    pub fn decode(&mut self, data: &Bytes) -> Result<(BinlogEvent, EventHeader)> {
        let header = EventHeader::parse(data)?;
        if header.event_length as usize != data.len() {
            return Err(DecodeError::LengthMismatch {
                declared: header.event_length as usize,
                actual: data.len(),
            });
        }

        let has_checksum = if header.event_type == EventType::FormatDescription {
            fde_has_checksum(&data[EventHeader::SIZE..])
        } else {
            self.checksum.unwrap_or(false)
        };

        let end = if has_checksum {
            if data.len() < EventHeader::SIZE + 4 {
                return Err(DecodeError::malformed(
                    "event",
                    format!("{} bytes cannot hold a checksum", data.len()),
                ));
            }
            data.len() - 4
        } else {
            data.len()
        };
        let payload = data.slice(EventHeader::SIZE..end);

        trace!(
            "Decoding {:?} event, {} bytes total, {} bytes payload (checksum={})",
            header.event_type,
            data.len(),
            payload.len(),
            has_checksum
        );

        let event = match header.event_type {
            EventType::FormatDescription => {
                let event = decode_format_description(&payload)?;
                self.checksum = Some(event.checksum_type == 1);
                self.format = Some(event.clone());
                BinlogEvent::FormatDescription(event)
            }
            EventType::Rotate => BinlogEvent::Rotate(decode_rotate(&payload)?),
            EventType::TableMap => BinlogEvent::TableMap(decode_table_map(&payload)?),
            other => match other.rows_kind() {
                Some((kind, v2)) => BinlogEvent::Rows(decode_rows_header(&payload, kind, v2)?),
                None => {
                    trace!("Ignoring {:?} event", other);
                    BinlogEvent::Ignored(other)
                }
            },
        };
        Ok((event, header))
    }
}

/// The checksum algorithm byte sits just before the CRC32, so it can only be
/// read by assuming a checksum is present and confirming with the server
/// version.
fn fde_has_checksum(payload: &[u8]) -> bool {
    // binlog_version(2) + server_version(50) + create_timestamp(4) + header_length(1)
    if payload.len() < 58 {
        return false;
    }
    let version = String::from_utf8_lossy(&payload[2..52]);
    version_has_checksum(version.trim_end_matches('\0')) && payload[payload.len() - 5] == 1
}

/// Checksums exist from MySQL 5.6.1 and MariaDB 5.3.
fn version_has_checksum(version: &str) -> bool {
    let mut parts = version.split(|c: char| !c.is_ascii_digit());
    let mut next = || parts.next().and_then(|p| p.parse::<u32>().ok()).unwrap_or(0);
    let (major, minor, patch) = (next(), next(), next());

    if version.contains("MariaDB") {
        return (major, minor) >= (5, 3);
    }
    (major, minor, patch) >= (5, 6, 1)
}

fn decode_format_description(payload: &[u8]) -> Result<FormatDescriptionEvent> {
    let mut r = EventReader::new(payload);
    let binlog_version = r.u16_le()?;
    let server_version = String::from_utf8_lossy(r.bytes(50)?)
        .trim_end_matches('\0')
        .to_string();
    let create_timestamp = r.u32_le()?;
    let header_length = r.u8()?;
    let rest = r.rest();

    let checksum_type = if version_has_checksum(&server_version) {
        rest.last().copied().unwrap_or(0)
    } else {
        0
    };

    debug!(
        "FDE: binlog_version={}, server={}, checksum_type={}",
        binlog_version, server_version, checksum_type
    );

    Ok(FormatDescriptionEvent {
        binlog_version,
        server_version,
        create_timestamp,
        header_length,
        checksum_type,
    })
}

fn decode_rotate(payload: &[u8]) -> Result<RotateEvent> {
    let mut r = EventReader::new(payload);
    let position = r.u64_le()?;
    let next_binlog = String::from_utf8_lossy(r.rest())
        .trim_end_matches('\0')
        .to_string();
    Ok(RotateEvent {
        position,
        next_binlog,
    })
}

fn decode_table_map(payload: &Bytes) -> Result<TableMapEvent> {
    let mut r = EventReader::new(payload);
    let table_id = r.table_id()?;
    let flags = r.u16_le()?;
    let start = r.position();

    let database = r.short_name()?;
    let table = r.short_name()?;
    let columns_offset = r.position() - start;

    Ok(TableMapEvent {
        table_id,
        flags,
        database,
        table,
        descriptor: payload.slice(start..),
        columns_offset,
    })
}

fn decode_rows_header(payload: &Bytes, kind: RowsKind, v2: bool) -> Result<RowsEvent> {
    let mut r = EventReader::new(payload);
    let table_id = r.table_id()?;
    let flags = r.u16_le()?;
    if v2 {
        // extra data length includes its own two bytes
        let extra_len = r.u16_le()? as usize;
        r.skip(extra_len.saturating_sub(2))?;
    }
    Ok(RowsEvent {
        kind,
        table_id,
        flags,
        body: payload.slice(r.position()..),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode;
    use crate::schema::fixtures::def;
    use crate::value::Value;
    use pretty_assertions::assert_eq;

    // ========================================================================
    // Test event builders
    // ========================================================================

    fn frame(event_type: u8, payload: &[u8], checksum: bool) -> Bytes {
        let len = EventHeader::SIZE + payload.len() + if checksum { 4 } else { 0 };
        let mut data = Vec::with_capacity(len);
        data.extend_from_slice(&1_700_000_000u32.to_le_bytes());
        data.push(event_type);
        data.extend_from_slice(&1u32.to_le_bytes());
        data.extend_from_slice(&(len as u32).to_le_bytes());
        data.extend_from_slice(&1234u32.to_le_bytes());
        data.extend_from_slice(&0u16.to_le_bytes());
        data.extend_from_slice(payload);
        if checksum {
            data.extend_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);
        }
        Bytes::from(data)
    }

    fn fde_payload(version: &str, checksum_alg: u8) -> Vec<u8> {
        let mut p = Vec::new();
        p.extend_from_slice(&4u16.to_le_bytes());
        let mut v = version.as_bytes().to_vec();
        v.resize(50, 0);
        p.extend_from_slice(&v);
        p.extend_from_slice(&0u32.to_le_bytes());
        p.push(19);
        p.extend_from_slice(&[0u8; 40]);
        p.push(checksum_alg);
        p
    }

    fn table_map_payload(table_id: u64, types: &[u8], meta: &[u8]) -> Vec<u8> {
        let mut p = table_id.to_le_bytes()[..6].to_vec();
        p.extend_from_slice(&1u16.to_le_bytes());
        p.extend_from_slice(&[4, b's', b'h', b'o', b'p', 0]);
        p.extend_from_slice(&[6, b'o', b'r', b'd', b'e', b'r', b's', 0]);
        p.push(types.len() as u8);
        p.extend_from_slice(types);
        p.push(meta.len() as u8);
        p.extend_from_slice(meta);
        p.extend(vec![0u8; types.len().div_ceil(8)]);
        p
    }

    fn rows_payload(table_id: u64, v2: bool, columns: usize, bitmaps: usize, images: &[Vec<u8>]) -> Vec<u8> {
        let mut p = table_id.to_le_bytes()[..6].to_vec();
        p.extend_from_slice(&0u16.to_le_bytes());
        if v2 {
            p.extend_from_slice(&2u16.to_le_bytes());
        }
        p.push(columns as u8);
        for _ in 0..bitmaps {
            p.extend(vec![0xFFu8; columns.div_ceil(8)]);
        }
        for image in images {
            p.extend_from_slice(image);
        }
        p
    }

    fn orders_image(id: i64, qty: i64) -> Vec<u8> {
        let mut image = vec![0u8];
        image.extend(encode::int(id as i128, 4));
        image.extend(encode::int(qty as i128, 4));
        image
    }

    fn orders_schema() -> (Vec<ColumnSchema>, Vec<WireColumn>) {
        let columns = vec![
            ColumnSchema::from_definition(&def("id", 1, "int", "int(11)")).unwrap(),
            ColumnSchema::from_definition(&def("qty", 2, "int", "int(11)")).unwrap(),
        ];
        let wire = vec![WireColumn::new(ColumnType::Long, ColumnMeta::None); 2];
        (columns, wire)
    }

    fn row(id: i64, qty: i64) -> Row {
        let mut row = Row::new();
        row.insert("id".into(), Value::Int(id));
        row.insert("qty".into(), Value::Int(qty));
        row
    }

    // ========================================================================
    // Header and framing
    // ========================================================================

    #[test]
    fn test_event_type_from_u8() {
        assert_eq!(EventType::from_u8(19), EventType::TableMap);
        assert_eq!(EventType::from_u8(30), EventType::WriteRowsV2);
        assert_eq!(EventType::from_u8(99), EventType::Other(99));
        assert_eq!(EventType::Other(99).code(), 99);
        assert_eq!(EventType::DeleteRowsV1.code(), 25);
    }

    #[test]
    fn test_is_row_event() {
        assert!(EventType::WriteRowsV1.is_row_event());
        assert!(EventType::UpdateRowsV2.is_row_event());
        assert!(!EventType::TableMap.is_row_event());
        assert!(!EventType::Xid.is_row_event());
    }

    #[test]
    fn test_event_header_parse_too_short() {
        let data = Bytes::from(vec![0u8; 10]);
        assert_eq!(EventHeader::parse(&data), Err(DecodeError::HeaderTooShort(10)));
    }

    #[test]
    fn test_event_header_parse_minimal() {
        let data = frame(16, &[0u8; 8], false);
        let header = EventHeader::parse(&data).unwrap();
        assert_eq!(header.timestamp, 1_700_000_000);
        assert_eq!(header.event_type, EventType::Xid);
        assert_eq!(header.server_id, 1);
        assert_eq!(header.event_length, 27);
        assert_eq!(header.next_position, 1234);
        assert_eq!(header.flags, 0);
    }

    #[test]
    fn test_length_mismatch() {
        let mut data = frame(16, &[0u8; 8], false).to_vec();
        data.push(0);
        let err = BinlogDecoder::new().decode(&Bytes::from(data)).unwrap_err();
        assert_eq!(
            err,
            DecodeError::LengthMismatch {
                declared: 27,
                actual: 28
            }
        );
    }

    #[test]
    fn test_unknown_event_is_ignored() {
        let mut decoder = BinlogDecoder::new();
        let (event, header) = decoder.decode(&frame(200, &[1, 2, 3], false)).unwrap();
        assert_eq!(event, BinlogEvent::Ignored(EventType::Other(200)));
        assert_eq!(header.event_length, 22);
    }

    // ========================================================================
    // Format description and checksum
    // ========================================================================

    #[test]
    fn test_version_has_checksum() {
        assert!(version_has_checksum("8.0.35-0ubuntu0.22.04.1-log"));
        assert!(version_has_checksum("5.6.1"));
        assert!(!version_has_checksum("5.6.0"));
        assert!(!version_has_checksum("5.5.62-log"));
        assert!(version_has_checksum("10.6.12-MariaDB"));
    }

    #[test]
    fn test_fde_enables_checksum() {
        let mut decoder = BinlogDecoder::new();
        assert_eq!(decoder.checksum(), None);

        let (event, _) = decoder
            .decode(&frame(15, &fde_payload("8.0.35", 1), true))
            .unwrap();
        match event {
            BinlogEvent::FormatDescription(fde) => {
                assert_eq!(fde.server_version, "8.0.35");
                assert_eq!(fde.checksum_type, 1);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(decoder.checksum(), Some(true));

        // subsequent events have their trailing CRC stripped
        let mut rotate = 4u64.to_le_bytes().to_vec();
        rotate.extend_from_slice(b"binlog.000002");
        let (event, _) = decoder.decode(&frame(4, &rotate, true)).unwrap();
        assert_eq!(
            event,
            BinlogEvent::Rotate(RotateEvent {
                position: 4,
                next_binlog: "binlog.000002".into()
            })
        );
    }

    #[test]
    fn test_fde_without_checksum() {
        let mut decoder = BinlogDecoder::new();
        decoder.set_checksum(true);
        decoder
            .decode(&frame(15, &fde_payload("8.0.35", 0), false))
            .unwrap();
        assert_eq!(decoder.checksum(), Some(false));
    }

    #[test]
    fn test_negotiated_checksum_before_fde() {
        let mut decoder = BinlogDecoder::new();
        decoder.set_checksum(true);
        let mut rotate = 4u64.to_le_bytes().to_vec();
        rotate.extend_from_slice(b"binlog.000001");
        let (event, _) = decoder.decode(&frame(4, &rotate, true)).unwrap();
        assert!(matches!(event, BinlogEvent::Rotate(r) if r.next_binlog == "binlog.000001"));
    }

    // ========================================================================
    // Table map
    // ========================================================================

    #[test]
    fn test_table_map_lazy_columns() {
        let mut decoder = BinlogDecoder::new();
        let payload = table_map_payload(42, &[3, 3], &[]);
        let (event, _) = decoder.decode(&frame(19, &payload, false)).unwrap();
        let map = match event {
            BinlogEvent::TableMap(map) => map,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(map.table_id, 42);
        assert_eq!(map.database, "shop");
        assert_eq!(map.table, "orders");
        assert_eq!(&map.descriptor[..], &payload[8..]);
        assert_eq!(
            map.columns().unwrap(),
            vec![WireColumn::new(ColumnType::Long, ColumnMeta::None); 2]
        );
    }

    #[test]
    fn test_table_map_metadata_shapes() {
        let types = [246, 15, 254, 254, 252, 18, 16, 5];
        let meta = [
            10, 2, // decimal(10,2)
            0x2C, 0x01, // varchar max 300
            247, 1, // string reclassified as enum
            254, 40, // char, 40 bytes
            2,  // blob length size
            3,  // datetime(3)
            4, 1, // bit(12)
            8,  // double
        ];
        let mut decoder = BinlogDecoder::new();
        let (event, _) = decoder
            .decode(&frame(19, &table_map_payload(7, &types, &meta), false))
            .unwrap();
        let BinlogEvent::TableMap(map) = event else {
            panic!("expected table map");
        };
        assert_eq!(
            map.columns().unwrap(),
            vec![
                WireColumn::new(ColumnType::NewDecimal, ColumnMeta::Decimal { precision: 10, scale: 2 }),
                WireColumn::new(ColumnType::Varchar, ColumnMeta::MaxLength(300)),
                WireColumn::new(ColumnType::Enum, ColumnMeta::PackLength(1)),
                WireColumn::new(ColumnType::String, ColumnMeta::MaxLength(40)),
                WireColumn::new(ColumnType::Blob, ColumnMeta::LengthSize(2)),
                WireColumn::new(ColumnType::DateTime2, ColumnMeta::Fsp(3)),
                WireColumn::new(ColumnType::Bit, ColumnMeta::Bits { bits: 4, bytes: 1 }),
                WireColumn::new(ColumnType::Double, ColumnMeta::Size(8)),
            ]
        );
    }

    #[test]
    fn test_long_char_metadata() {
        // char(255) in utf8mb4 is 1020 bytes: high length bits folded into b0
        let wire = string_meta(ColumnType::String, 0xCE, 0xFC);
        assert_eq!(wire, WireColumn::new(ColumnType::String, ColumnMeta::MaxLength(1020)));
    }

    #[test]
    fn test_table_map_metadata_length_checked() {
        let payload = table_map_payload(7, &[3], &[1]);
        let mut decoder = BinlogDecoder::new();
        let (event, _) = decoder.decode(&frame(19, &payload, false)).unwrap();
        let BinlogEvent::TableMap(map) = event else {
            panic!("expected table map");
        };
        assert!(matches!(map.columns(), Err(DecodeError::Malformed { .. })));
    }

    // ========================================================================
    // Rows
    // ========================================================================

    #[test]
    fn test_write_rows_v2_multi_row() {
        let (columns, wire) = orders_schema();
        let payload = rows_payload(42, true, 2, 1, &[orders_image(1, 5), orders_image(2, 7)]);
        let mut decoder = BinlogDecoder::new();
        let (event, _) = decoder.decode(&frame(30, &payload, false)).unwrap();
        let BinlogEvent::Rows(rows) = event else {
            panic!("expected rows");
        };
        assert_eq!(rows.kind, RowsKind::Insert);
        assert_eq!(rows.table_id, 42);
        assert_eq!(
            rows.decode_rows(&columns, &wire).unwrap(),
            vec![RowChange::Insert(row(1, 5)), RowChange::Insert(row(2, 7))]
        );
    }

    #[test]
    fn test_update_rows_v1() {
        let (columns, wire) = orders_schema();
        let payload = rows_payload(42, false, 2, 2, &[orders_image(1, 5), orders_image(1, 9)]);
        let mut decoder = BinlogDecoder::new();
        let (event, _) = decoder.decode(&frame(24, &payload, false)).unwrap();
        let BinlogEvent::Rows(rows) = event else {
            panic!("expected rows");
        };
        assert_eq!(
            rows.decode_rows(&columns, &wire).unwrap(),
            vec![RowChange::Update {
                before: row(1, 5),
                after: row(1, 9)
            }]
        );
    }

    #[test]
    fn test_delete_rows_with_checksum() {
        let (columns, wire) = orders_schema();
        let payload = rows_payload(42, true, 2, 1, &[orders_image(3, 1)]);
        let mut decoder = BinlogDecoder::new();
        decoder.set_checksum(true);
        let (event, _) = decoder.decode(&frame(32, &payload, true)).unwrap();
        let BinlogEvent::Rows(rows) = event else {
            panic!("expected rows");
        };
        assert_eq!(
            rows.decode_rows(&columns, &wire).unwrap(),
            vec![RowChange::Delete(row(3, 1))]
        );
    }

    #[test]
    fn test_rows_column_count_mismatch() {
        let (columns, wire) = orders_schema();
        let payload = rows_payload(42, true, 3, 1, &[]);
        let mut decoder = BinlogDecoder::new();
        let (event, _) = decoder.decode(&frame(30, &payload, false)).unwrap();
        let BinlogEvent::Rows(rows) = event else {
            panic!("expected rows");
        };
        assert_eq!(
            rows.decode_rows(&columns, &wire).unwrap_err(),
            DecodeError::ColumnCount { event: 3, schema: 2 }
        );
    }

    #[test]
    fn test_partial_row_is_truncated() {
        let (columns, wire) = orders_schema();
        let mut image = orders_image(1, 5);
        image.truncate(6);
        let payload = rows_payload(42, true, 2, 1, &[image]);
        let mut decoder = BinlogDecoder::new();
        let (event, _) = decoder.decode(&frame(30, &payload, false)).unwrap();
        let BinlogEvent::Rows(rows) = event else {
            panic!("expected rows");
        };
        assert!(matches!(
            rows.decode_rows(&columns, &wire),
            Err(DecodeError::Truncated { .. })
        ));
    }
}
