#![no_main]
//! Fuzz test for the binlog event decoder
//!
//! Malformed events must surface as errors, never as panics.

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use rowmirror_binlog::{
    BinlogDecoder, BinlogEvent, ColumnDefinition, ColumnMeta, ColumnSchema, EventHeader, WireColumn,
};

fuzz_target!(|data: &[u8]| {
    let mut decoder = BinlogDecoder::new();

    if data.len() >= EventHeader::SIZE {
        let _ = EventHeader::parse(data);
    }

    // Patch the declared length so framing passes and the payload is exercised
    let mut framed = data.to_vec();
    if framed.len() < EventHeader::SIZE {
        framed.resize(EventHeader::SIZE, 0);
    }
    let len = framed.len() as u32;
    framed[9..13].copy_from_slice(&len.to_le_bytes());

    let event_types: &[u8] = &[
        0x04, // ROTATE_EVENT
        0x0F, // FORMAT_DESCRIPTION_EVENT
        0x13, // TABLE_MAP_EVENT
        0x17, // WRITE_ROWS_EVENT_V1
        0x18, // UPDATE_ROWS_EVENT_V1
        0x19, // DELETE_ROWS_EVENT_V1
        0x1E, // WRITE_ROWS_EVENT_V2
        0x1F, // UPDATE_ROWS_EVENT_V2
        0x20, // DELETE_ROWS_EVENT_V2
    ];

    for checksum in [false, true] {
        decoder.set_checksum(checksum);
        for &event_type in event_types {
            framed[4] = event_type;
            let bytes = Bytes::copy_from_slice(&framed);
            match decoder.decode(&bytes) {
                Ok((BinlogEvent::TableMap(map), _)) => {
                    let _ = map.columns();
                }
                Ok((BinlogEvent::Rows(rows), _)) => {
                    // decode against a fixed two-column integer schema
                    let columns: Vec<ColumnSchema> = ["id", "qty"]
                        .iter()
                        .enumerate()
                        .filter_map(|(i, name)| {
                            ColumnSchema::from_definition(&ColumnDefinition {
                                name: name.to_string(),
                                ordinal_position: i as u32 + 1,
                                data_type: "int".into(),
                                column_type: "int(11)".into(),
                                ..Default::default()
                            })
                            .ok()
                        })
                        .collect();
                    let wire: Vec<WireColumn> = columns
                        .iter()
                        .map(|c| WireColumn::new(c.column_type, ColumnMeta::None))
                        .collect();
                    let _ = rows.decode_rows(&columns, &wire);
                }
                _ => {}
            }
        }
    }

    let _ = decoder.decode(&Bytes::copy_from_slice(data));
});
