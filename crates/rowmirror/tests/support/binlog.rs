//! Raw binlog event builders (no checksum)

use bytes::Bytes;

pub const ORDERS_TABLE_ID: u64 = 108;

const FORMAT_DESCRIPTION: u8 = 15;
const ROTATE: u8 = 4;
const TABLE_MAP: u8 = 19;
const WRITE_ROWS: u8 = 30;
const UPDATE_ROWS: u8 = 31;
const DELETE_ROWS: u8 = 32;

/// Wire type code plus table map metadata bytes
#[derive(Debug, Clone)]
pub struct Wire {
    pub code: u8,
    pub meta: Vec<u8>,
}

impl Wire {
    pub fn long() -> Self {
        Self { code: 3, meta: vec![] }
    }

    pub fn decimal(precision: u8, scale: u8) -> Self {
        Self {
            code: 246,
            meta: vec![precision, scale],
        }
    }

    /// ENUM as the server sends it: STRING with the real type in the metadata
    pub fn enumeration() -> Self {
        Self {
            code: 254,
            meta: vec![0xF7, 1],
        }
    }

    pub fn varchar(max_length: u16) -> Self {
        Self {
            code: 15,
            meta: max_length.to_le_bytes().to_vec(),
        }
    }
}

/// Wire layout of `shop.orders`
pub fn orders_wire() -> Vec<Wire> {
    vec![
        Wire::long(),
        Wire::long(),
        Wire::decimal(10, 2),
        Wire::enumeration(),
        Wire::varchar(128),
    ]
}

/// One column value of a row image
#[derive(Debug, Clone, Copy)]
pub enum Cell<'a> {
    Null,
    Int(i32),
    /// DECIMAL(10,2) given in hundredths
    Cents(u32),
    /// 1-based enum index
    Enum(u8),
    /// VARCHAR with a one-byte length prefix
    Text(&'a str),
}

/// Encode a full row image: null bitmap, then each non-null value.
pub fn image(cells: &[Cell<'_>]) -> Vec<u8> {
    let mut nulls = vec![0u8; cells.len().div_ceil(8)];
    let mut body = Vec::new();
    for (idx, cell) in cells.iter().enumerate() {
        match *cell {
            Cell::Null => nulls[idx / 8] |= 1 << (idx % 8),
            Cell::Int(v) => body.extend_from_slice(&v.to_le_bytes()),
            Cell::Cents(cents) => {
                // 8 integer digits in 4 bytes, 2 fractional digits in 1 byte
                let mut bytes = (cents / 100).to_be_bytes().to_vec();
                bytes.push((cents % 100) as u8);
                bytes[0] ^= 0x80;
                body.extend_from_slice(&bytes);
            }
            Cell::Enum(index) => body.push(index),
            Cell::Text(s) => {
                body.push(s.len() as u8);
                body.extend_from_slice(s.as_bytes());
            }
        }
    }
    nulls.extend_from_slice(&body);
    nulls
}

/// Row image of an order. `status` is 1-based: new, paid, shipped.
pub fn order(id: i32, qty: i32, cents: u32, status: u8, note: Option<&str>) -> Vec<u8> {
    image(&[
        Cell::Int(id),
        Cell::Int(qty),
        Cell::Cents(cents),
        Cell::Enum(status),
        note.map_or(Cell::Null, Cell::Text),
    ])
}

/// Frames events with consecutive log positions.
#[derive(Debug)]
pub struct EventWriter {
    next_position: u32,
}

impl Default for EventWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl EventWriter {
    pub fn new() -> Self {
        Self { next_position: 4 }
    }

    pub fn position(&self) -> u32 {
        self.next_position
    }

    fn frame(&mut self, event_type: u8, payload: &[u8]) -> Bytes {
        let len = 19 + payload.len() as u32;
        self.next_position += len;

        let mut data = Vec::with_capacity(len as usize);
        data.extend_from_slice(&1_700_000_000u32.to_le_bytes());
        data.push(event_type);
        data.extend_from_slice(&1u32.to_le_bytes());
        data.extend_from_slice(&len.to_le_bytes());
        data.extend_from_slice(&self.next_position.to_le_bytes());
        data.extend_from_slice(&0u16.to_le_bytes());
        data.extend_from_slice(payload);
        Bytes::from(data)
    }

    pub fn format_description(&mut self) -> Bytes {
        let mut p = Vec::new();
        p.extend_from_slice(&4u16.to_le_bytes());
        let mut version = b"8.0.36".to_vec();
        version.resize(50, 0);
        p.extend_from_slice(&version);
        p.extend_from_slice(&0u32.to_le_bytes());
        p.push(19);
        p.extend_from_slice(&[0u8; 40]);
        // checksum algorithm: none
        p.push(0);
        self.frame(FORMAT_DESCRIPTION, &p)
    }

    /// Artificial rotate: carries no log position of its own.
    pub fn rotate(&mut self, file: &str, position: u64) -> Bytes {
        let mut p = position.to_le_bytes().to_vec();
        p.extend_from_slice(file.as_bytes());
        let mut frame = self.frame(ROTATE, &p).to_vec();
        // next_position lives at header offset 13
        frame[13..17].copy_from_slice(&0u32.to_le_bytes());
        self.next_position = position as u32;
        Bytes::from(frame)
    }

    pub fn table_map(&mut self, table_id: u64, database: &str, table: &str, wire: &[Wire]) -> Bytes {
        let mut p = table_id.to_le_bytes()[..6].to_vec();
        p.extend_from_slice(&1u16.to_le_bytes());
        for name in [database, table] {
            p.push(name.len() as u8);
            p.extend_from_slice(name.as_bytes());
            p.push(0);
        }
        p.push(wire.len() as u8);
        p.extend(wire.iter().map(|w| w.code));
        let meta: Vec<u8> = wire.iter().flat_map(|w| w.meta.iter().copied()).collect();
        p.push(meta.len() as u8);
        p.extend_from_slice(&meta);
        p.extend(std::iter::repeat(0xFF).take(wire.len().div_ceil(8)));
        self.frame(TABLE_MAP, &p)
    }

    fn rows(&mut self, event_type: u8, table_id: u64, columns: usize, images: &[Vec<u8>]) -> Bytes {
        let mut p = table_id.to_le_bytes()[..6].to_vec();
        p.extend_from_slice(&0u16.to_le_bytes());
        p.extend_from_slice(&2u16.to_le_bytes());
        p.push(columns as u8);
        let bitmaps = if event_type == UPDATE_ROWS { 2 } else { 1 };
        p.extend(std::iter::repeat(0xFF).take(bitmaps * columns.div_ceil(8)));
        for image in images {
            p.extend_from_slice(image);
        }
        self.frame(event_type, &p)
    }

    pub fn insert(&mut self, table_id: u64, columns: usize, images: &[Vec<u8>]) -> Bytes {
        self.rows(WRITE_ROWS, table_id, columns, images)
    }

    /// `pairs` alternate before and after images.
    pub fn update(&mut self, table_id: u64, columns: usize, pairs: &[(Vec<u8>, Vec<u8>)]) -> Bytes {
        let images: Vec<Vec<u8>> = pairs
            .iter()
            .flat_map(|(before, after)| [before.clone(), after.clone()])
            .collect();
        self.rows(UPDATE_ROWS, table_id, columns, &images)
    }

    pub fn delete(&mut self, table_id: u64, columns: usize, images: &[Vec<u8>]) -> Bytes {
        self.rows(DELETE_ROWS, table_id, columns, images)
    }
}
