//! Raw stream builder for tests: constructs streams event by event, in
//! either framing, without going through the writer. Used to exercise
//! the parser against hand-computed bytes.

use std::io::Cursor;

use common::TsResult;
use tablestream::events::StreamHeader;
use tablestream::{DatabaseLoader, MemoryBackend, StreamParser};

pub struct RawStream {
    bytes: Vec<u8>,
    packed: bool,
}

#[allow(dead_code)]
impl RawStream {
    pub fn new(packed: bool) -> Self {
        RawStream {
            bytes: StreamHeader::new(packed).to_bytes().to_vec(),
            packed,
        }
    }

    pub fn finish(self) -> Vec<u8> {
        self.bytes
    }

    /// Runs the built stream through a fresh parser and loader.
    pub fn load(self) -> (TsResult<()>, MemoryBackend) {
        let mut loader = DatabaseLoader::new(
            MemoryBackend::new(),
            "tablestream-load",
            Vec::new(),
            Vec::new(),
            None,
        );
        let mut parser = StreamParser::new(Cursor::new(self.finish()));
        let result = parser.run(&mut loader);
        (result, loader.into_backend())
    }

    pub fn raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.bytes.extend_from_slice(bytes);
        self
    }

    fn align(&mut self) {
        while self.bytes.len() % 4 != 0 {
            self.bytes.push(0);
        }
    }

    /// Event header; packed ids are stored `- 1`.
    fn hdr(&mut self, tag: u8, id: u32) {
        if self.packed {
            self.bytes.push(tag);
            self.bytes.push(id.wrapping_sub(1) as u8);
        } else {
            self.align();
            self.bytes
                .extend_from_slice(&(id | (tag as u32) << 24).to_le_bytes());
        }
    }

    fn u32(&mut self, value: u32) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    /// Packed length field storing `len - 1`, narrow or wide.
    fn psize(&mut self, len: usize, wide: bool) {
        if wide {
            self.bytes
                .extend_from_slice(&((len - 1) as u16).to_le_bytes());
        } else {
            self.bytes.push((len - 1) as u8);
        }
    }

    ////////////////////////////////////////////////////////////////////
    // events
    ////////////////////////////////////////////////////////////////////

    pub fn end_stream(&mut self) -> &mut Self {
        self.hdr(2, 0);
        self
    }

    pub fn open_stream(&mut self) -> &mut Self {
        self.hdr(7, 0);
        self
    }

    pub fn next_row(&mut self, table: u32) -> &mut Self {
        self.hdr(10, table);
        self
    }

    pub fn move_ahead(&mut self, table: u32, nrows: u64) -> &mut Self {
        self.hdr(11, table);
        self.bytes.extend_from_slice(&nrows.to_le_bytes());
        self
    }

    pub fn empty_default(&mut self, column: u32) -> &mut Self {
        self.hdr(18, column);
        self
    }

    /// remote-path; the packed form travels wide (tag 13).
    pub fn remote_path(&mut self, path: &str) -> &mut Self {
        if self.packed {
            self.hdr(13, 0);
            self.psize(path.len(), true);
        } else {
            self.hdr(3, 0);
            self.u32(path.len() as u32);
        }
        self.bytes.extend_from_slice(path.as_bytes());
        self
    }

    /// use-schema; the packed form travels wide (tag 14).
    pub fn use_schema(&mut self, file: &str, spec: &str) -> &mut Self {
        if self.packed {
            self.hdr(14, 0);
            self.psize(file.len(), true);
            self.psize(spec.len(), true);
        } else {
            self.hdr(4, 0);
            self.u32(file.len() as u32);
            self.u32(spec.len() as u32);
        }
        self.bytes.extend_from_slice(file.as_bytes());
        self.bytes.extend_from_slice(spec.as_bytes());
        self
    }

    /// software-name travels narrow in the packed framing.
    pub fn software_name(&mut self, name: &str, version: &str) -> &mut Self {
        self.hdr(19, 0);
        if self.packed {
            self.psize(name.len(), false);
            self.psize(version.len(), false);
        } else {
            self.u32(name.len() as u32);
            self.u32(version.len() as u32);
        }
        self.bytes.extend_from_slice(name.as_bytes());
        self.bytes.extend_from_slice(version.as_bytes());
        self
    }

    /// new-table; the packed form travels wide (tag 15).
    pub fn new_table(&mut self, id: u32, name: &str) -> &mut Self {
        if self.packed {
            self.hdr(15, id);
            self.psize(name.len(), true);
        } else {
            self.hdr(5, id);
            self.u32(name.len() as u32);
        }
        self.bytes.extend_from_slice(name.as_bytes());
        self
    }

    /// new-column; the packed owning-table byte stores `table - 1`.
    pub fn new_column(
        &mut self,
        id: u32,
        table: u32,
        elem_bits: u32,
        flag_bits: u8,
        name: &str,
    ) -> &mut Self {
        self.hdr(6, id);
        if self.packed {
            self.bytes.push((table - 1) as u8);
            self.bytes.push(elem_bits as u8);
            self.bytes.push(flag_bits);
            self.bytes.push((name.len() - 1) as u8);
        } else {
            self.u32(table);
            self.u32(elem_bits);
            self.u32(flag_bits as u32);
            self.u32(name.len() as u32);
        }
        self.bytes.extend_from_slice(name.as_bytes());
        self
    }

    fn add_mbr(&mut self, tag: u8, id: u32, parent: u32, mbr: &str, name: &str, mode: u8) {
        self.hdr(tag, id);
        if self.packed {
            // the parent byte is 0-based, no offset
            self.bytes.push(parent as u8);
            self.psize(mbr.len(), false);
            self.psize(name.len(), false);
            self.bytes.push(mode);
        } else {
            self.u32(parent);
            self.u32(mbr.len() as u32);
            self.u32(name.len() as u32);
            self.bytes.extend_from_slice(&[mode, 0, 0, 0]);
        }
        self.bytes.extend_from_slice(mbr.as_bytes());
        self.bytes.extend_from_slice(name.as_bytes());
    }

    pub fn add_mbr_db(
        &mut self,
        id: u32,
        parent: u32,
        mbr: &str,
        name: &str,
        mode: u8,
    ) -> &mut Self {
        self.add_mbr(26, id, parent, mbr, name, mode);
        self
    }

    pub fn add_mbr_tbl(
        &mut self,
        id: u32,
        parent: u32,
        mbr: &str,
        name: &str,
        mode: u8,
    ) -> &mut Self {
        self.add_mbr(27, id, parent, mbr, name, mode);
        self
    }

    /// cell-data. The unpacked form carries the element count, the
    /// packed form the byte size (narrow or wide as it fits).
    pub fn cell_data(&mut self, column: u32, elem_count: u32, payload: &[u8]) -> &mut Self {
        self.cell(9, 17, column, elem_count, payload);
        self
    }

    pub fn cell_default(&mut self, column: u32, elem_count: u32, payload: &[u8]) -> &mut Self {
        self.cell(8, 16, column, elem_count, payload);
        self
    }

    fn cell(&mut self, narrow: u8, wide: u8, column: u32, elem_count: u32, payload: &[u8]) {
        if self.packed {
            if payload.len() <= 0x100 {
                self.hdr(narrow, column);
                self.psize(payload.len(), false);
            } else {
                self.hdr(wide, column);
                self.psize(payload.len(), true);
            }
        } else {
            self.hdr(narrow, column);
            self.u32(elem_count);
        }
        self.bytes.extend_from_slice(payload);
    }

    fn metadata_node(&mut self, narrow: u8, wide: u8, id: u32, path: &str, value: &str) {
        if self.packed {
            if path.len() <= 0x100 && value.len() <= 0x100 {
                self.hdr(narrow, id);
                self.psize(path.len(), false);
                self.psize(value.len(), false);
            } else {
                self.hdr(wide, id);
                self.psize(path.len(), true);
                self.psize(value.len(), true);
            }
        } else {
            self.hdr(narrow, id);
            self.u32(path.len() as u32);
            self.u32(value.len() as u32);
        }
        self.bytes.extend_from_slice(path.as_bytes());
        self.bytes.extend_from_slice(value.as_bytes());
    }

    pub fn db_metadata_node(&mut self, id: u32, path: &str, value: &str) -> &mut Self {
        self.metadata_node(20, 23, id, path, value);
        self
    }

    pub fn tbl_metadata_node(&mut self, id: u32, path: &str, value: &str) -> &mut Self {
        self.metadata_node(21, 24, id, path, value);
        self
    }

    pub fn col_metadata_node(&mut self, id: u32, path: &str, value: &str) -> &mut Self {
        self.metadata_node(22, 25, id, path, value);
        self
    }

    fn metadata_attr(
        &mut self,
        narrow: u8,
        wide: u8,
        id: u32,
        path: &str,
        attr: &str,
        value: &str,
    ) {
        if self.packed {
            if path.len() <= 0x100 && attr.len() <= 0x100 && value.len() <= 0x100 {
                self.hdr(narrow, id);
                self.psize(path.len(), false);
                self.psize(attr.len(), false);
                self.psize(value.len(), false);
            } else {
                self.hdr(wide, id);
                self.psize(path.len(), true);
                self.psize(attr.len(), true);
                self.psize(value.len(), true);
            }
        } else {
            self.hdr(narrow, id);
            self.u32(path.len() as u32);
            self.u32(attr.len() as u32);
            self.u32(value.len() as u32);
        }
        self.bytes.extend_from_slice(path.as_bytes());
        self.bytes.extend_from_slice(attr.as_bytes());
        self.bytes.extend_from_slice(value.as_bytes());
    }

    pub fn db_metadata_node_attr(
        &mut self,
        id: u32,
        path: &str,
        attr: &str,
        value: &str,
    ) -> &mut Self {
        self.metadata_attr(30, 33, id, path, attr, value);
        self
    }

    pub fn tbl_metadata_node_attr(
        &mut self,
        id: u32,
        path: &str,
        attr: &str,
        value: &str,
    ) -> &mut Self {
        self.metadata_attr(31, 34, id, path, attr, value);
        self
    }

    pub fn col_metadata_node_attr(
        &mut self,
        id: u32,
        path: &str,
        attr: &str,
        value: &str,
    ) -> &mut Self {
        self.metadata_attr(32, 35, id, path, attr, value);
        self
    }

    /// error-message; the packed form travels wide (tag 12).
    pub fn err_msg(&mut self, msg: &str) -> &mut Self {
        if self.packed {
            self.hdr(12, 0);
            self.psize(msg.len(), true);
        } else {
            self.hdr(1, 0);
            self.u32(msg.len() as u32);
        }
        self.bytes.extend_from_slice(msg.as_bytes());
        self
    }

    /// log-message; packed payload is always wide-sized.
    pub fn log_msg(&mut self, msg: &str) -> &mut Self {
        self.hdr(28, 0);
        if self.packed {
            self.psize(msg.len(), true);
        } else {
            self.u32(msg.len() as u32);
        }
        self.bytes.extend_from_slice(msg.as_bytes());
        self
    }

    pub fn progress(
        &mut self,
        name: &str,
        pid: u32,
        version: u32,
        timestamp: u32,
        percent: u8,
    ) -> &mut Self {
        self.hdr(29, 0);
        self.u32(pid);
        self.u32(version);
        self.u32(timestamp);
        if self.packed {
            self.bytes.push(percent);
            self.bytes.push((name.len() - 1) as u8);
        } else {
            self.bytes
                .extend_from_slice(&[percent, name.len() as u8, 0, 0]);
        }
        self.bytes.extend_from_slice(name.as_bytes());
        self
    }
}
