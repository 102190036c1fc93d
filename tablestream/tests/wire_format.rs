//! Parser behavior against hand-built streams, and byte-for-byte
//! agreement between the writer and the raw builder.

mod support;

use common::{RcObject, RcState};
use tablestream::events::COLUMN_FLAG_PACK_INTEGER;
use tablestream::{Framing, MemorySink, StreamWriter};

use crate::support::RawStream;

/// create + md5, the mode the bare new-table shorthand implies
const CREATE_MD5: u8 = 0x42;

fn assert_full_scenario_state(backend: &tablestream::MemoryBackend) {
    let rows = backend.column_rows("REFERENCE", "SPOT_GROUP").unwrap();
    assert_eq!(rows.len(), 4);
    assert_eq!(rows[0], b"hello".to_vec());
    assert_eq!(rows[1], b"v2".to_vec());
    // the move-ahead rows fall through to the defaults
    assert_eq!(rows[2], b"-".to_vec());
    assert_eq!(rows[3], b"-".to_vec());
    let max_rows = backend.column_rows("REFERENCE", "MAX_SEQ_LEN").unwrap();
    for row in max_rows {
        assert_eq!(row, &12345u32.to_le_bytes().to_vec());
    }
    assert_eq!(
        backend.dbs[0].metadata.get("info/origin"),
        Some(&"upstream".to_string())
    );
    let table = backend.find_table("REFERENCE").unwrap();
    assert_eq!(table.metadata.get("stats/source"), Some(&"run7".to_string()));
    let column = backend.find_column("REFERENCE", "SPOT_GROUP").unwrap();
    assert_eq!(column.metadata.get("fmt/encoding"), Some(&"raw".to_string()));
    assert_eq!(
        column
            .metadata_attrs
            .get("fmt/encoding")
            .and_then(|m| m.get("since")),
        Some(&"1.2.0".to_string())
    );
}

#[test]
fn raw_unpacked_scenario_loads() {
    let mut s = RawStream::new(false);
    build_scenario_with_default(&mut s);
    let (result, backend) = s.load();
    result.unwrap();
    assert_full_scenario_state(&backend);
}

#[test]
fn raw_packed_scenario_loads() {
    let mut s = RawStream::new(true);
    build_scenario_with_default(&mut s);
    let (result, backend) = s.load();
    result.unwrap();
    assert_full_scenario_state(&backend);
}

/// The full scenario plus a default for SPOT_GROUP so move-ahead rows
/// complete.
fn build_scenario_with_default(s: &mut RawStream) {
    s.use_schema("align/align.vschema", "NCBI:align:db:alignment_sorted")
        .remote_path("db")
        .software_name("producer", "2.5.1")
        .new_table(1, "REFERENCE")
        .new_column(1, 1, 8, 0, "SPOT_GROUP")
        .new_column(2, 1, 32, 0, "MAX_SEQ_LEN")
        .tbl_metadata_node(1, "stats/source", "run7")
        .col_metadata_node(1, "fmt/encoding", "raw")
        .col_metadata_node_attr(1, "fmt/encoding", "since", "1.2.0")
        .open_stream()
        .cell_default(1, 1, b"-")
        .cell_default(2, 1, &12345u32.to_le_bytes())
        .cell_data(1, 5, b"hello")
        .next_row(1)
        .cell_data(1, 2, b"v2")
        .next_row(1)
        .move_ahead(1, 2)
        .log_msg("almost done")
        .progress("producer", 42, 0x02050001, 1_442_864_985, 75)
        .db_metadata_node(0, "info/origin", "upstream")
        .end_stream();
}

/// The writer must produce exactly the bytes the raw builder computes
/// for the same sequence of operations, in both framings.
#[test]
fn writer_bytes_match_hand_built_stream() {
    for packed in [false, true] {
        let framing = if packed {
            Framing::Packed
        } else {
            Framing::Unpacked
        };

        let mut w = StreamWriter::new(MemorySink::new(), framing).unwrap();
        w.use_schema("s.vschema", "ns:db").unwrap();
        w.set_remote_path("db").unwrap();
        w.set_software_name("tool", "1.0.0").unwrap();
        let tbl = w.add_table("T").unwrap();
        let col = w.add_column(tbl, "C", 8, 0).unwrap();
        w.open().unwrap();
        w.write(col, 8, b"abc", 3).unwrap();
        w.next_row(tbl).unwrap();
        w.end_stream().unwrap();
        let written = w.finish().unwrap().into_bytes();

        let mut s = RawStream::new(packed);
        s.use_schema("s.vschema", "ns:db")
            .remote_path("db")
            .software_name("tool", "1.0.0")
            .new_table(1, "T")
            .new_column(1, 1, 8, 0, "C")
            .open_stream()
            .cell_data(1, 3, b"abc")
            .next_row(1)
            .end_stream();

        assert_eq!(written, s.finish(), "framing packed={}", packed);
    }
}

#[test]
fn two_tables_with_interleaved_rows() {
    let mut s = RawStream::new(true);
    s.use_schema("s.vschema", "ns:db")
        .remote_path("db")
        .new_table(1, "FIRST")
        .new_table(2, "SECOND")
        .new_column(1, 1, 8, 0, "A")
        .new_column(2, 2, 8, 0, "B")
        .open_stream()
        .cell_data(1, 2, b"a1")
        .cell_data(2, 2, b"b1")
        .next_row(1)
        .next_row(2)
        .cell_data(2, 2, b"b2")
        .next_row(2)
        .cell_data(1, 2, b"a2")
        .next_row(1)
        .end_stream();

    let (result, backend) = s.load();
    result.unwrap();

    assert_eq!(
        backend.column_rows("FIRST", "A").unwrap(),
        &[b"a1".to_vec(), b"a2".to_vec()]
    );
    assert_eq!(
        backend.column_rows("SECOND", "B").unwrap(),
        &[b"b1".to_vec(), b"b2".to_vec()]
    );
}

#[test]
fn member_databases_nest() {
    let mut s = RawStream::new(true);
    s.use_schema("s.vschema", "ns:db")
        .remote_path("db")
        .add_mbr_db(1, 0, "OUTER", "outer_db", CREATE_MD5)
        .add_mbr_db(2, 1, "INNER", "inner_db", CREATE_MD5)
        .add_mbr_tbl(1, 2, "SEQ", "SEQUENCE", CREATE_MD5)
        .new_column(1, 1, 8, 0, "READ")
        .open_stream()
        .cell_data(1, 4, b"ACGT")
        .next_row(1)
        .end_stream();

    let (result, backend) = s.load();
    result.unwrap();

    let outer = backend.dbs.iter().find(|d| d.name == "outer_db").unwrap();
    assert_eq!(outer.parent, Some(0));
    let inner = backend.dbs.iter().find(|d| d.name == "inner_db").unwrap();
    assert_eq!(inner.mbr_name, "INNER");
    assert_eq!(
        backend.column_rows("SEQUENCE", "READ").unwrap(),
        &[b"ACGT".to_vec()]
    );
}

#[test]
fn empty_default_completes_rows() {
    let mut s = RawStream::new(true);
    s.use_schema("s.vschema", "ns:db")
        .remote_path("db")
        .new_table(1, "T")
        .new_column(1, 1, 8, 0, "A")
        .new_column(2, 1, 8, 0, "B")
        .open_stream()
        .empty_default(2)
        .cell_data(1, 1, b"x")
        .next_row(1)
        .end_stream();

    let (result, backend) = s.load();
    result.unwrap();

    assert_eq!(backend.column_rows("T", "A").unwrap(), &[b"x".to_vec()]);
    assert_eq!(backend.column_rows("T", "B").unwrap(), &[Vec::<u8>::new()]);
}

#[test]
fn column_metadata_is_last_write_wins() {
    let mut s = RawStream::new(true);
    s.use_schema("s.vschema", "ns:db")
        .remote_path("db")
        .new_table(1, "T")
        .new_column(1, 1, 8, 0, "A")
        .open_stream()
        .cell_data(1, 1, b"x")
        .next_row(1)
        .col_metadata_node(1, "note", "first")
        .col_metadata_node(1, "note", "second")
        .end_stream();

    let (result, backend) = s.load();
    result.unwrap();

    let column = backend.find_column("T", "A").unwrap();
    assert_eq!(column.metadata.get("note"), Some(&"second".to_string()));
}

#[test]
fn metadata_after_data_events_is_accepted() {
    let mut s = RawStream::new(false);
    s.use_schema("s.vschema", "ns:db")
        .remote_path("db")
        .new_table(1, "T")
        .new_column(1, 1, 8, 0, "A")
        .open_stream()
        .cell_data(1, 1, b"x")
        .next_row(1)
        .tbl_metadata_node(1, "after", "data")
        .db_metadata_node(0, "also/after", "data")
        .end_stream();

    let (result, backend) = s.load();
    result.unwrap();
    assert_eq!(
        backend.find_table("T").unwrap().metadata.get("after"),
        Some(&"data".to_string())
    );
}

#[test]
fn duplicate_column_id_rejected() {
    let mut s = RawStream::new(false);
    s.use_schema("s.vschema", "ns:db")
        .remote_path("db")
        .new_table(1, "T")
        .new_column(1, 1, 8, 0, "A")
        .new_column(1, 1, 8, 0, "B")
        .end_stream();

    let (result, _) = s.load();
    assert!(result
        .unwrap_err()
        .is_rc(RcObject::Column, RcState::Exists));
}

#[test]
fn out_of_order_database_id_rejected() {
    let mut s = RawStream::new(true);
    s.use_schema("s.vschema", "ns:db")
        .add_mbr_db(3, 0, "M", "db3", CREATE_MD5)
        .end_stream();

    let (result, _) = s.load();
    assert!(result
        .unwrap_err()
        .is_rc(RcObject::Database, RcState::Invalid));
}

#[test]
fn structural_events_after_open_rejected() {
    let mut s = RawStream::new(true);
    s.use_schema("s.vschema", "ns:db")
        .remote_path("db")
        .new_table(1, "T")
        .new_column(1, 1, 8, 0, "A")
        .open_stream()
        .new_table(2, "LATE")
        .end_stream();

    let (result, _) = s.load();
    assert!(result
        .unwrap_err()
        .is_rc(RcObject::Data, RcState::Unexpected));
}

#[test]
fn second_open_stream_rejected() {
    let mut s = RawStream::new(true);
    s.use_schema("s.vschema", "ns:db")
        .remote_path("db")
        .new_table(1, "T")
        .new_column(1, 1, 8, 0, "A")
        .open_stream()
        .open_stream()
        .end_stream();

    let (result, _) = s.load();
    assert!(result
        .unwrap_err()
        .is_rc(RcObject::Data, RcState::Unexpected));
}

#[test]
fn cell_data_before_open_rejected() {
    let mut s = RawStream::new(true);
    s.use_schema("s.vschema", "ns:db")
        .remote_path("db")
        .new_table(1, "T")
        .new_column(1, 1, 8, 0, "A")
        .cell_data(1, 1, b"x")
        .end_stream();

    let (result, _) = s.load();
    assert!(result.unwrap_err().is_rc(RcObject::Row, RcState::NotOpen));
}

#[test]
fn next_row_before_open_rejected() {
    let mut s = RawStream::new(true);
    s.use_schema("s.vschema", "ns:db")
        .remote_path("db")
        .new_table(1, "T")
        .new_column(1, 1, 8, 0, "A")
        .next_row(1)
        .end_stream();

    let (result, _) = s.load();
    assert!(result.unwrap_err().is_rc(RcObject::Row, RcState::NotOpen));
}

#[test]
fn second_use_schema_rejected() {
    let mut s = RawStream::new(true);
    s.use_schema("s.vschema", "ns:db")
        .use_schema("other.vschema", "ns:other")
        .end_stream();

    let (result, _) = s.load();
    assert!(result
        .unwrap_err()
        .is_rc(RcObject::Schema, RcState::Exists));
}

#[test]
fn producer_error_after_data() {
    let mut s = RawStream::new(false);
    s.use_schema("s.vschema", "ns:db")
        .remote_path("db")
        .new_table(1, "T")
        .new_column(1, 1, 8, 0, "A")
        .open_stream()
        .cell_data(1, 1, b"x")
        .err_msg("something broke")
        .end_stream();

    let (result, backend) = s.load();
    assert!(result.unwrap_err().is_rc(RcObject::Error, RcState::Exists));
    assert_eq!(backend.removed_dbs, vec!["db".to_string()]);
}

#[test]
fn bad_progress_percent_rejected() {
    let mut s = RawStream::new(true);
    s.use_schema("s.vschema", "ns:db")
        .remote_path("db")
        .new_table(1, "T")
        .new_column(1, 1, 8, 0, "A")
        .open_stream()
        .progress("producer", 42, 1, 1_442_864_985, 101)
        .end_stream();

    let (result, _) = s.load();
    assert!(result
        .unwrap_err()
        .is_rc(RcObject::Message, RcState::Invalid));
}

#[test]
fn packed_wide_metadata_forms() {
    let long_value = "v".repeat(0x101);

    let mut s = RawStream::new(true);
    s.use_schema("s.vschema", "ns:db")
        .remote_path("db")
        .new_table(1, "T")
        .new_column(1, 1, 8, 0, "A")
        .tbl_metadata_node(1, "big/value", &long_value)
        .open_stream()
        .cell_data(1, 1, b"x")
        .next_row(1)
        .end_stream();

    let (result, backend) = s.load();
    result.unwrap();
    assert_eq!(
        backend.find_table("T").unwrap().metadata.get("big/value"),
        Some(&long_value)
    );
}

#[test]
fn integer_packed_column_via_raw_codec_bytes() {
    // 0x80 encodes as [0xC2, 0x80]; 1 encodes as itself
    let payload = [0xC2u8, 0x80, 0x01];

    let mut s = RawStream::new(true);
    s.use_schema("s.vschema", "ns:db")
        .remote_path("db")
        .new_table(1, "T")
        .new_column(1, 1, 32, COLUMN_FLAG_PACK_INTEGER, "V")
        .open_stream()
        .cell_data(1, 0, &payload)
        .next_row(1)
        .end_stream();

    let (result, backend) = s.load();
    result.unwrap();

    let mut expected = Vec::new();
    expected.extend_from_slice(&0x80u32.to_le_bytes());
    expected.extend_from_slice(&1u32.to_le_bytes());
    assert_eq!(backend.column_rows("T", "V").unwrap(), &[expected]);
}
