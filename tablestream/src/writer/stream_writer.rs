use std::collections::BTreeMap;

use byteorder::{ByteOrder, LittleEndian};
use tracing::debug;

use common::{TsError, TsResult};

use crate::codec::{decode_u16, decode_u32, decode_u64, encode_u16, encode_u32, encode_u64};
use crate::events::event_header::{EventHeader, MAX_ID_PACKED, MAX_ID_UNPACKED};
use crate::events::{
    CreateMode, EventType, StreamHeader, COLUMN_FLAG_PACK_INTEGER, LEGAL_ELEM_BITS,
    MAX_NARROW_CHUNK, MAX_PACKED_CHUNK, STRING_LIMIT_16, STRING_LIMIT_8,
};
use crate::writer::sink::ByteSink;

/// Which framing the stream is emitted in. Fixed at construction; the
/// header's packing flag tells the consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    Unpacked,
    Packed,
}

impl Framing {
    pub fn is_packed(&self) -> bool {
        matches!(self, Framing::Packed)
    }
}

/// Writer states. The preamble events may arrive in any order, each at
/// most once; tables need the schema, columns need a table, opening
/// needs a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterState {
    Preamble {
        remote: bool,
        schema: bool,
        software: bool,
    },
    HaveTable,
    HaveColumn,
    Opened,
    Closed,
    Error,
}

#[derive(Debug)]
struct ColumnDecl {
    table_id: u32,
    name: String,
    elem_bits: u32,
    flag_bits: u8,
}

/// scratch size for integer packing and the chunking limit
const PACKING_BUFFER_SIZE: usize = MAX_PACKED_CHUNK;

/// Stateful producer of a tablestream. Assigns object ids densely per
/// space, deduplicates declarations, selects the narrower packed form
/// that fits each payload and optionally integer-packs column data.
pub struct StreamWriter<S: ByteSink> {
    out: S,
    framing: Framing,
    state: WriterState,

    evt_count: u64,
    byte_count: u64,
    pid: u32,

    dbs: Vec<(u32, String)>,
    db_idx: BTreeMap<(u32, String), u32>,
    tables: Vec<(u32, String)>,
    table_idx: BTreeMap<(u32, String), u32>,
    columns: Vec<ColumnDecl>,
    column_idx: BTreeMap<(u32, String), u32>,

    packing_buffer: Vec<u8>,
}

impl<S: ByteSink> StreamWriter<S> {
    /// Writes the stream header immediately.
    pub fn new(out: S, framing: Framing) -> TsResult<Self> {
        let mut writer = StreamWriter {
            out,
            framing,
            state: WriterState::Preamble {
                remote: false,
                schema: false,
                software: false,
            },
            evt_count: 0,
            byte_count: 0,
            pid: std::process::id(),
            dbs: Vec::new(),
            db_idx: BTreeMap::new(),
            tables: Vec::new(),
            table_idx: BTreeMap::new(),
            columns: Vec::new(),
            column_idx: BTreeMap::new(),
            packing_buffer: vec![0; PACKING_BUFFER_SIZE],
        };
        let header = StreamHeader::new(framing.is_packed());
        writer.emit(&header.to_bytes())?;
        Ok(writer)
    }

    pub fn event_count(&self) -> u64 {
        self.evt_count
    }

    pub fn byte_count(&self) -> u64 {
        self.byte_count
    }

    /// Flushes the sink and hands it back; emits end-stream first when
    /// the caller has not done so.
    pub fn finish(mut self) -> TsResult<S> {
        if self.state != WriterState::Closed {
            self.end_stream()?;
        }
        Ok(self.out)
    }

    ////////////////////////////////////////////////////////////////////
    // preamble
    ////////////////////////////////////////////////////////////////////

    /// Asks the consumer to use this path when naming its output.
    pub fn set_remote_path(&mut self, remote_db: &str) -> TsResult<()> {
        match self.state {
            WriterState::Preamble { remote: false, .. } => {}
            _ => return Err(state_violation("setting remote path")),
        }
        check_string("remote path", remote_db, STRING_LIMIT_16)?;

        if self.framing.is_packed() {
            self.begin_event(EventType::RemotePath2, 0)?;
            self.emit_size16(remote_db.len())?;
        } else {
            self.begin_event(EventType::RemotePath, 0)?;
            self.emit_u32(remote_db.len() as u32)?;
        }
        self.emit(remote_db.as_bytes())?;

        if let WriterState::Preamble { remote, .. } = &mut self.state {
            *remote = true;
        }
        Ok(())
    }

    /// Tells the consumer to use this pre-defined schema.
    pub fn use_schema(&mut self, schema_file: &str, schema_spec: &str) -> TsResult<()> {
        match self.state {
            WriterState::Preamble { schema: false, .. } => {}
            _ => return Err(state_violation("using schema")),
        }
        check_string("schema path", schema_file, STRING_LIMIT_16)?;
        check_string("schema spec", schema_spec, STRING_LIMIT_16)?;

        if self.framing.is_packed() {
            self.begin_event(EventType::UseSchema2, 0)?;
            self.emit_size16(schema_file.len())?;
            self.emit_size16(schema_spec.len())?;
        } else {
            self.begin_event(EventType::UseSchema, 0)?;
            self.emit_u32(schema_file.len() as u32)?;
            self.emit_u32(schema_spec.len() as u32)?;
        }
        self.emit(schema_file.as_bytes())?;
        self.emit(schema_spec.as_bytes())?;

        if let WriterState::Preamble { schema, .. } = &mut self.state {
            *schema = true;
        }
        Ok(())
    }

    pub fn set_software_name(&mut self, name: &str, version: &str) -> TsResult<()> {
        match self.state {
            WriterState::Preamble {
                software: false, ..
            } => {}
            _ => return Err(state_violation("setting software name")),
        }
        check_string("software name", name, STRING_LIMIT_8)?;
        check_string("software version", version, STRING_LIMIT_8)?;

        self.begin_event(EventType::SoftwareName, 0)?;
        if self.framing.is_packed() {
            self.emit_size8(name.len())?;
            self.emit_size8(version.len())?;
        } else {
            self.emit_u32(name.len() as u32)?;
            self.emit_u32(version.len() as u32)?;
        }
        self.emit(name.as_bytes())?;
        self.emit(version.as_bytes())?;

        if let WriterState::Preamble { software, .. } = &mut self.state {
            *software = true;
        }
        Ok(())
    }

    ////////////////////////////////////////////////////////////////////
    // structure
    ////////////////////////////////////////////////////////////////////

    /// Declares a table of the root database. Deduplicates on the name;
    /// the returned id is 1-based.
    pub fn add_table(&mut self, table_name: &str) -> TsResult<u32> {
        let new_state = self.structure_state("adding table")?;
        check_string("table name", table_name, STRING_LIMIT_8)?;

        let key = (0u32, table_name.to_string());
        if let Some(id) = self.table_idx.get(&key) {
            return Ok(*id);
        }

        let id = self.next_id(self.tables.len(), "tables")?;
        if self.framing.is_packed() {
            self.begin_event(EventType::NewTable2, id)?;
            self.emit_size16(table_name.len())?;
        } else {
            self.begin_event(EventType::NewTable, id)?;
            self.emit_u32(table_name.len() as u32)?;
        }
        self.emit(table_name.as_bytes())?;

        self.tables.push(key.clone());
        self.table_idx.insert(key, id);
        self.state = new_state;
        Ok(id)
    }

    /// Declares a database member of `parent_db_id` (0 is the root).
    pub fn add_database(
        &mut self,
        parent_db_id: u32,
        mbr_name: &str,
        db_name: &str,
        mode: CreateMode,
    ) -> TsResult<u32> {
        let new_state = self.structure_state("adding database")?;
        if parent_db_id as usize > self.dbs.len() {
            return Err(TsError::String("invalid database id".into()));
        }
        check_string("member name", mbr_name, STRING_LIMIT_8)?;
        check_string("database name", db_name, STRING_LIMIT_8)?;

        let key = (parent_db_id, db_name.to_string());
        if let Some(id) = self.db_idx.get(&key) {
            return Ok(*id);
        }

        let id = self.next_id(self.dbs.len(), "databases")?;
        self.emit_add_mbr(EventType::AddMbrDb, id, parent_db_id, mbr_name, db_name, mode)?;

        self.dbs.push(key.clone());
        self.db_idx.insert(key, id);
        self.state = new_state;
        Ok(id)
    }

    /// Declares a table member of a database.
    pub fn add_db_table(
        &mut self,
        db_id: u32,
        mbr_name: &str,
        table_name: &str,
        mode: CreateMode,
    ) -> TsResult<u32> {
        let new_state = self.structure_state("adding db table")?;
        if db_id as usize > self.dbs.len() {
            return Err(TsError::String("invalid database id".into()));
        }
        check_string("member name", mbr_name, STRING_LIMIT_8)?;
        check_string("table name", table_name, STRING_LIMIT_8)?;

        let key = (db_id, table_name.to_string());
        if let Some(id) = self.table_idx.get(&key) {
            return Ok(*id);
        }

        let id = self.next_id(self.tables.len(), "tables")?;
        self.emit_add_mbr(EventType::AddMbrTbl, id, db_id, mbr_name, table_name, mode)?;

        self.tables.push(key.clone());
        self.table_idx.insert(key, id);
        self.state = new_state;
        Ok(id)
    }

    /// Declares a column. Element widths outside {1, 8, 16, 32, 64} are
    /// rejected; the integer-packing flag is silently cleared when the
    /// width cannot be packed.
    pub fn add_column(
        &mut self,
        table_id: u32,
        column_name: &str,
        elem_bits: u32,
        mut flag_bits: u8,
    ) -> TsResult<u32> {
        match self.state {
            WriterState::HaveTable | WriterState::HaveColumn => {}
            _ => return Err(state_violation("adding column")),
        }
        if table_id == 0 || table_id as usize > self.tables.len() {
            return Err(TsError::String("invalid table id".into()));
        }
        check_string("column name", column_name, STRING_LIMIT_8)?;
        if !LEGAL_ELEM_BITS.contains(&elem_bits) {
            return Err(TsError::String(format!(
                "illegal element width {} bits",
                elem_bits
            )));
        }
        if flag_bits & COLUMN_FLAG_PACK_INTEGER != 0 && !matches!(elem_bits, 16 | 32 | 64) {
            flag_bits ^= COLUMN_FLAG_PACK_INTEGER;
        }

        let key = (table_id, column_name.to_string());
        if let Some(id) = self.column_idx.get(&key) {
            return Ok(*id);
        }

        let id = self.next_id(self.columns.len(), "columns")?;
        self.begin_event(EventType::NewColumn, id)?;
        if self.framing.is_packed() {
            self.emit(&[
                (table_id - 1) as u8,
                elem_bits as u8,
                flag_bits,
                (column_name.len() - 1) as u8,
            ])?;
        } else {
            self.emit_u32(table_id)?;
            self.emit_u32(elem_bits)?;
            self.emit_u32(flag_bits as u32)?;
            self.emit_u32(column_name.len() as u32)?;
        }
        self.emit(column_name.as_bytes())?;

        self.columns.push(ColumnDecl {
            table_id,
            name: column_name.to_string(),
            elem_bits,
            flag_bits,
        });
        self.column_idx.insert(key, id);
        self.state = WriterState::HaveColumn;
        Ok(id)
    }

    /// Ends the declaration phase. Requires at least one column.
    pub fn open(&mut self) -> TsResult<()> {
        match self.state {
            WriterState::HaveColumn => {}
            WriterState::Opened => return Ok(()),
            _ => return Err(state_violation("opening stream")),
        }
        self.begin_event(EventType::OpenStream, 0)?;
        self.state = WriterState::Opened;
        Ok(())
    }

    ////////////////////////////////////////////////////////////////////
    // data
    ////////////////////////////////////////////////////////////////////

    /// Sets the default cell for a column. Must be the entire default in
    /// one call; an empty payload becomes an empty-default event.
    pub fn column_default(
        &mut self,
        column_id: u32,
        elem_bits: u32,
        data: &[u8],
        elem_count: u32,
    ) -> TsResult<()> {
        match self.state {
            WriterState::Opened => {}
            _ => return Err(state_violation("setting column default")),
        }
        let decl = self.column_decl(column_id)?;
        if elem_bits != decl.elem_bits {
            return Err(TsError::String("invalid elem_bits".into()));
        }

        let num_bytes = (elem_bits as usize * elem_count as usize + 7) / 8;
        if data.len() != num_bytes {
            return Err(TsError::String("data length mismatch".into()));
        }

        if num_bytes == 0 {
            self.begin_event(EventType::EmptyDefault, column_id)?;
            return Ok(());
        }

        if self.framing.is_packed() {
            if num_bytes <= MAX_NARROW_CHUNK {
                self.begin_event(EventType::CellDefault, column_id)?;
                self.emit_size8(num_bytes)?;
            } else if num_bytes <= MAX_PACKED_CHUNK {
                self.begin_event(EventType::CellDefault2, column_id)?;
                self.emit_size16(num_bytes)?;
            } else {
                return Err(TsError::String(
                    "default cell-data exceeds maximum".into(),
                ));
            }
        } else {
            self.begin_event(EventType::CellDefault, column_id)?;
            self.emit_u32(elem_count)?;
        }
        self.emit(data)
    }

    /// Writes a chunk of cell data to the column's open row. May be
    /// repeated to assemble one cell. Integer-packed columns are
    /// re-encoded through the codec; oversized payloads are split into
    /// events the packed length fields can carry.
    pub fn write(
        &mut self,
        column_id: u32,
        elem_bits: u32,
        data: &[u8],
        elem_count: u32,
    ) -> TsResult<()> {
        match self.state {
            WriterState::Opened => {}
            _ => return Err(state_violation("writing column data")),
        }
        let decl = self.column_decl(column_id)?;
        if elem_bits != decl.elem_bits {
            return Err(TsError::String("invalid elem_bits".into()));
        }
        if elem_count == 0 {
            return Ok(());
        }

        let num_bytes = (elem_bits as usize * elem_count as usize + 7) / 8;
        if data.len() != num_bytes {
            return Err(TsError::String("data length mismatch".into()));
        }

        let compact = decl.flag_bits & COLUMN_FLAG_PACK_INTEGER != 0;
        if self.framing.is_packed() && compact {
            return self.write_packed_ints(column_id, elem_bits, data, elem_count);
        }

        if self.framing.is_packed() {
            // split into wide chunks, with a terminal event the narrow
            // form can carry when it fits
            let mut rest = data;
            while rest.len() > MAX_PACKED_CHUNK {
                let (chunk, tail) = rest.split_at(MAX_PACKED_CHUNK);
                self.begin_event(EventType::CellData2, column_id)?;
                self.emit_size16(chunk.len())?;
                self.emit(chunk)?;
                rest = tail;
            }
            if rest.len() <= MAX_NARROW_CHUNK {
                self.begin_event(EventType::CellData, column_id)?;
                self.emit_size8(rest.len())?;
            } else {
                self.begin_event(EventType::CellData2, column_id)?;
                self.emit_size16(rest.len())?;
            }
            self.emit(rest)
        } else {
            self.begin_event(EventType::CellData, column_id)?;
            self.emit_u32(elem_count)?;
            self.emit(data)
        }
    }

    /// Codec-encodes each element into the scratch buffer and emits one
    /// or more cell-data events sized to what the length fields carry.
    fn write_packed_ints(
        &mut self,
        column_id: u32,
        elem_bits: u32,
        data: &[u8],
        elem_count: u32,
    ) -> TsResult<()> {
        let mut first = 0u32;
        while first < elem_count {
            let (num_elems, num_bytes) = self.encode_chunk(elem_bits, data, first, elem_count)?;

            if num_bytes <= MAX_NARROW_CHUNK {
                self.begin_event(EventType::CellData, column_id)?;
                self.emit_size8(num_bytes)?;
            } else {
                self.begin_event(EventType::CellData2, column_id)?;
                self.emit_size16(num_bytes)?;
            }
            let chunk = self.packing_buffer[..num_bytes].to_vec();
            self.emit(&chunk)?;

            first = num_elems;
        }
        Ok(())
    }

    /// Encodes elements `first..` into the packing buffer until it fills;
    /// returns the exclusive element bound reached and the bytes used.
    /// Every encoded value is decoded back as a self-check.
    fn encode_chunk(
        &mut self,
        elem_bits: u32,
        data: &[u8],
        first: u32,
        elem_count: u32,
    ) -> TsResult<(u32, usize)> {
        let elem_size = elem_bits as usize / 8;
        let mut used = 0usize;
        let mut i = first;
        while i < elem_count {
            let raw = &data[i as usize * elem_size..(i as usize + 1) * elem_size];
            let dst = &mut self.packing_buffer[used..];
            let written = match elem_bits {
                16 => {
                    let v = LittleEndian::read_u16(raw);
                    match encode_u16(v, dst) {
                        Ok(n) => {
                            debug_assert_eq!(decode_u16(&dst[..n]), Ok((v, n)));
                            n
                        }
                        Err(_) => break,
                    }
                }
                32 => {
                    let v = LittleEndian::read_u32(raw);
                    match encode_u32(v, dst) {
                        Ok(n) => {
                            debug_assert_eq!(decode_u32(&dst[..n]), Ok((v, n)));
                            n
                        }
                        Err(_) => break,
                    }
                }
                64 => {
                    let v = LittleEndian::read_u64(raw);
                    match encode_u64(v, dst) {
                        Ok(n) => {
                            debug_assert_eq!(decode_u64(&dst[..n]), Ok((v, n)));
                            n
                        }
                        Err(_) => break,
                    }
                }
                _ => return Err(TsError::Bug("corrupt element bits".into())),
            };
            used += written;
            i += 1;
        }
        if used == 0 {
            return Err(TsError::Bug("no data to encode".into()));
        }
        Ok((i, used))
    }

    pub fn next_row(&mut self, table_id: u32) -> TsResult<()> {
        match self.state {
            WriterState::Opened => {}
            _ => return Err(state_violation("advancing to next row")),
        }
        if table_id == 0 || table_id as usize > self.tables.len() {
            return Err(TsError::String("invalid table id".into()));
        }
        self.begin_event(EventType::NextRow, table_id)
    }

    pub fn move_ahead(&mut self, table_id: u32, nrows: u64) -> TsResult<()> {
        match self.state {
            WriterState::Opened => {}
            _ => return Err(state_violation("moving ahead nrows")),
        }
        if table_id == 0 || table_id as usize > self.tables.len() {
            return Err(TsError::String("invalid table id".into()));
        }
        self.begin_event(EventType::MoveAhead, table_id)?;
        self.emit_u64(nrows)
    }

    ////////////////////////////////////////////////////////////////////
    // metadata
    ////////////////////////////////////////////////////////////////////

    pub fn set_db_metadata_node(&mut self, db_id: u32, path: &str, value: &str) -> TsResult<()> {
        if db_id as usize > self.dbs.len() {
            return Err(TsError::String("invalid database id".into()));
        }
        self.emit_metadata_node(
            EventType::DbMetadataNode,
            EventType::DbMetadataNode2,
            db_id,
            path,
            value,
        )
    }

    pub fn set_tbl_metadata_node(&mut self, table_id: u32, path: &str, value: &str) -> TsResult<()> {
        if table_id == 0 || table_id as usize > self.tables.len() {
            return Err(TsError::String("invalid table id".into()));
        }
        self.emit_metadata_node(
            EventType::TblMetadataNode,
            EventType::TblMetadataNode2,
            table_id,
            path,
            value,
        )
    }

    pub fn set_col_metadata_node(&mut self, column_id: u32, path: &str, value: &str) -> TsResult<()> {
        if column_id == 0 || column_id as usize > self.columns.len() {
            return Err(TsError::String("invalid column id".into()));
        }
        self.emit_metadata_node(
            EventType::ColMetadataNode,
            EventType::ColMetadataNode2,
            column_id,
            path,
            value,
        )
    }

    pub fn set_db_metadata_node_attr(
        &mut self,
        db_id: u32,
        path: &str,
        attr: &str,
        value: &str,
    ) -> TsResult<()> {
        if db_id as usize > self.dbs.len() {
            return Err(TsError::String("invalid database id".into()));
        }
        self.emit_metadata_attr(
            EventType::DbMetadataNodeAttr,
            EventType::DbMetadataNodeAttr2,
            db_id,
            path,
            attr,
            value,
        )
    }

    pub fn set_tbl_metadata_node_attr(
        &mut self,
        table_id: u32,
        path: &str,
        attr: &str,
        value: &str,
    ) -> TsResult<()> {
        if table_id == 0 || table_id as usize > self.tables.len() {
            return Err(TsError::String("invalid table id".into()));
        }
        self.emit_metadata_attr(
            EventType::TblMetadataNodeAttr,
            EventType::TblMetadataNodeAttr2,
            table_id,
            path,
            attr,
            value,
        )
    }

    pub fn set_col_metadata_node_attr(
        &mut self,
        column_id: u32,
        path: &str,
        attr: &str,
        value: &str,
    ) -> TsResult<()> {
        if column_id == 0 || column_id as usize > self.columns.len() {
            return Err(TsError::String("invalid column id".into()));
        }
        self.emit_metadata_attr(
            EventType::ColMetadataNodeAttr,
            EventType::ColMetadataNodeAttr2,
            column_id,
            path,
            attr,
            value,
        )
    }

    fn emit_metadata_node(
        &mut self,
        narrow: EventType,
        wide: EventType,
        obj_id: u32,
        path: &str,
        value: &str,
    ) -> TsResult<()> {
        check_string("metadata path", path, STRING_LIMIT_16)?;
        check_string("metadata value", value, STRING_LIMIT_16)?;

        if self.framing.is_packed() {
            if path.len() <= MAX_NARROW_CHUNK && value.len() <= MAX_NARROW_CHUNK {
                self.begin_event(narrow, obj_id)?;
                self.emit_size8(path.len())?;
                self.emit_size8(value.len())?;
            } else {
                self.begin_event(wide, obj_id)?;
                self.emit_size16(path.len())?;
                self.emit_size16(value.len())?;
            }
        } else {
            self.begin_event(narrow, obj_id)?;
            self.emit_u32(path.len() as u32)?;
            self.emit_u32(value.len() as u32)?;
        }
        self.emit(path.as_bytes())?;
        self.emit(value.as_bytes())
    }

    fn emit_metadata_attr(
        &mut self,
        narrow: EventType,
        wide: EventType,
        obj_id: u32,
        path: &str,
        attr: &str,
        value: &str,
    ) -> TsResult<()> {
        check_string("metadata path", path, STRING_LIMIT_16)?;
        check_string("attribute name", attr, STRING_LIMIT_16)?;
        check_string("attribute value", value, STRING_LIMIT_16)?;

        if self.framing.is_packed() {
            if path.len() <= MAX_NARROW_CHUNK
                && attr.len() <= MAX_NARROW_CHUNK
                && value.len() <= MAX_NARROW_CHUNK
            {
                self.begin_event(narrow, obj_id)?;
                self.emit_size8(path.len())?;
                self.emit_size8(attr.len())?;
                self.emit_size8(value.len())?;
            } else {
                self.begin_event(wide, obj_id)?;
                self.emit_size16(path.len())?;
                self.emit_size16(attr.len())?;
                self.emit_size16(value.len())?;
            }
        } else {
            self.begin_event(narrow, obj_id)?;
            self.emit_u32(path.len() as u32)?;
            self.emit_u32(attr.len() as u32)?;
            self.emit_u32(value.len() as u32)?;
        }
        self.emit(path.as_bytes())?;
        self.emit(attr.as_bytes())?;
        self.emit(value.as_bytes())
    }

    ////////////////////////////////////////////////////////////////////
    // messages
    ////////////////////////////////////////////////////////////////////

    /// Signals a fatal producer error. Tolerant of every state; before
    /// the header or after close it is dropped.
    pub fn log_error(&mut self, msg: &str) -> TsResult<()> {
        if self.state == WriterState::Closed {
            return Ok(());
        }

        let msg = if msg.is_empty() {
            "ERROR: (NO MSG)"
        } else {
            clamp_str(msg, STRING_LIMIT_16)
        };

        if self.framing.is_packed() {
            self.begin_event(EventType::ErrMsg2, 0)?;
            self.emit_size16(msg.len())?;
        } else {
            self.begin_event(EventType::ErrMsg, 0)?;
            self.emit_u32(msg.len() as u32)?;
        }
        self.emit(msg.as_bytes())
    }

    /// Informational message; empty messages are dropped.
    pub fn log_message(&mut self, msg: &str) -> TsResult<()> {
        if self.state == WriterState::Closed || msg.is_empty() {
            return Ok(());
        }
        let msg = clamp_str(msg, STRING_LIMIT_16);

        self.begin_event(EventType::LogMsg, 0)?;
        if self.framing.is_packed() {
            // log messages always travel in the wide form
            self.emit_size16(msg.len())?;
        } else {
            self.emit_u32(msg.len() as u32)?;
        }
        self.emit(msg.as_bytes())
    }

    /// Progress report. Only meaningful while opened; dropped otherwise.
    pub fn progress_message(
        &mut self,
        name: &str,
        version: u32,
        timestamp: u32,
        done: u64,
        total: u64,
    ) -> TsResult<()> {
        match self.state {
            WriterState::Opened => {}
            _ => return Ok(()),
        }
        if name.is_empty() {
            return Err(TsError::String("zero-length app name".into()));
        }
        if timestamp == 0 || version == 0 {
            return Err(TsError::String(
                "zero progress timestamp or version".into(),
            ));
        }
        if total == 0 {
            return Err(TsError::String(
                "illegal total value: would divide by zero".into(),
            ));
        }
        if done > total {
            return Err(TsError::String(
                "illegal done value: greater than total".into(),
            ));
        }
        // the packed length byte stores len-1 and carries 256; the plain
        // unpacked byte tops out at 255
        let name = if self.framing.is_packed() {
            clamp_str(name, STRING_LIMIT_8)
        } else {
            clamp_str(name, STRING_LIMIT_8 - 1)
        };
        let percent = (done * 100 / total) as u8;
        let pid = self.pid;

        self.begin_event(EventType::ProgMsg, 0)?;
        self.emit_u32(pid)?;
        self.emit_u32(version)?;
        self.emit_u32(timestamp)?;
        if self.framing.is_packed() {
            self.emit(&[percent, (name.len() - 1) as u8])?;
        } else {
            self.emit(&[percent, name.len() as u8, 0, 0])?;
        }
        self.emit(name.as_bytes())
    }

    /// Emits the end event and flushes. Further transmissions are
    /// rejected; repeated calls are no-ops.
    pub fn end_stream(&mut self) -> TsResult<()> {
        if self.state == WriterState::Closed {
            return Ok(());
        }
        self.begin_event(EventType::EndStream, 0)?;
        self.state = WriterState::Closed;
        self.out.flush()
    }

    ////////////////////////////////////////////////////////////////////
    // emission
    ////////////////////////////////////////////////////////////////////

    fn structure_state(&self, action: &str) -> TsResult<WriterState> {
        match self.state {
            WriterState::Preamble { schema: true, .. } => Ok(WriterState::HaveTable),
            WriterState::HaveTable | WriterState::HaveColumn => Ok(self.state),
            _ => Err(state_violation(action)),
        }
    }

    fn next_id(&self, declared: usize, what: &str) -> TsResult<u32> {
        let id = declared as u32 + 1;
        let cap = if self.framing.is_packed() {
            MAX_ID_PACKED
        } else {
            MAX_ID_UNPACKED
        };
        if id > cap {
            return Err(TsError::String(format!(
                "maximum number of {} exceeded",
                what
            )));
        }
        Ok(id)
    }

    fn column_decl(&self, column_id: u32) -> TsResult<&ColumnDecl> {
        if column_id == 0 || column_id as usize > self.columns.len() {
            return Err(TsError::String("column id is out of bounds".into()));
        }
        Ok(&self.columns[column_id as usize - 1])
    }

    /// Pads to the 4-byte boundary (unpacked framing) and emits the
    /// event header.
    fn begin_event(&mut self, evt: EventType, id: u32) -> TsResult<()> {
        debug_assert!(evt != EventType::BadEvent);
        let header = EventHeader::new(evt, id);
        if self.framing.is_packed() {
            self.emit(&header.to_packed())?;
        } else {
            self.align()?;
            self.emit(&header.to_unpacked())?;
        }
        self.evt_count += 1;
        debug!("writer event {}: {:?}, id={}", self.evt_count, evt, id);
        Ok(())
    }

    fn emit_add_mbr(
        &mut self,
        evt: EventType,
        id: u32,
        parent_id: u32,
        mbr_name: &str,
        obj_name: &str,
        mode: CreateMode,
    ) -> TsResult<()> {
        if self.framing.is_packed() && parent_id > 0xFF {
            // the packed parent byte is 0-based and cannot carry 256
            return Err(TsError::String(
                "parent database id too large for packed framing".into(),
            ));
        }
        self.begin_event(evt, id)?;
        if self.framing.is_packed() {
            self.emit(&[
                parent_id as u8,
                (mbr_name.len() - 1) as u8,
                (obj_name.len() - 1) as u8,
                mode.to_wire(),
            ])?;
        } else {
            self.emit_u32(parent_id)?;
            self.emit_u32(mbr_name.len() as u32)?;
            self.emit_u32(obj_name.len() as u32)?;
            self.emit(&[mode.to_wire(), 0, 0, 0])?;
        }
        self.emit(mbr_name.as_bytes())?;
        self.emit(obj_name.as_bytes())
    }

    fn align(&mut self) -> TsResult<()> {
        let rem = (self.byte_count % 4) as usize;
        if rem != 0 {
            let pad = [0u8; 4];
            self.emit(&pad[..4 - rem])?;
        }
        Ok(())
    }

    fn emit(&mut self, data: &[u8]) -> TsResult<()> {
        if let Err(e) = self.out.write_all(data) {
            // a failed sink poisons the stream
            self.state = WriterState::Error;
            return Err(e);
        }
        self.byte_count += data.len() as u64;
        Ok(())
    }

    fn emit_u32(&mut self, value: u32) -> TsResult<()> {
        let mut buf = [0u8; 4];
        LittleEndian::write_u32(&mut buf, value);
        self.emit(&buf)
    }

    fn emit_u64(&mut self, value: u64) -> TsResult<()> {
        let mut buf = [0u8; 8];
        LittleEndian::write_u64(&mut buf, value);
        self.emit(&buf)
    }

    /// Narrow length field: stores `len - 1`, "0 means 1 byte".
    fn emit_size8(&mut self, len: usize) -> TsResult<()> {
        debug_assert!((1..=MAX_NARROW_CHUNK).contains(&len));
        self.emit(&[(len - 1) as u8])
    }

    /// Wide length field: stores `len - 1`.
    fn emit_size16(&mut self, len: usize) -> TsResult<()> {
        debug_assert!((1..=MAX_PACKED_CHUNK).contains(&len));
        let mut buf = [0u8; 2];
        LittleEndian::write_u16(&mut buf, (len - 1) as u16);
        self.emit(&buf)
    }
}

fn state_violation(action: &str) -> TsError {
    TsError::String(format!("state violation {}", action))
}

fn check_string(what: &str, s: &str, limit: usize) -> TsResult<()> {
    if s.is_empty() {
        return Err(TsError::String(format!("empty {}", what)));
    }
    if s.len() > limit {
        return Err(TsError::String(format!("{} too long", what)));
    }
    Ok(())
}

/// Clamps to `limit` bytes without splitting a UTF-8 sequence.
fn clamp_str(s: &str, limit: usize) -> &str {
    if s.len() <= limit {
        return s;
    }
    let mut end = limit;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::writer::sink::MemorySink;

    fn packed_writer() -> StreamWriter<MemorySink> {
        StreamWriter::new(MemorySink::new(), Framing::Packed).unwrap()
    }

    #[test]
    fn preamble_events_at_most_once() {
        let mut w = packed_writer();
        w.set_remote_path("db").unwrap();
        assert!(w.set_remote_path("db2").is_err());
        w.use_schema("s.vschema", "ns:db").unwrap();
        assert!(w.use_schema("s.vschema", "ns:db").is_err());
        w.set_software_name("tool", "1.0.0").unwrap();
        assert!(w.set_software_name("tool", "1.0.0").is_err());
    }

    #[test]
    fn table_requires_schema() {
        let mut w = packed_writer();
        assert!(w.add_table("T").is_err());
        w.use_schema("s.vschema", "ns:db").unwrap();
        assert_eq!(w.add_table("T").unwrap(), 1);
    }

    #[test]
    fn open_requires_column() {
        let mut w = packed_writer();
        w.use_schema("s.vschema", "ns:db").unwrap();
        w.add_table("T").unwrap();
        assert!(w.open().is_err());
        w.add_column(1, "C", 8, 0).unwrap();
        w.open().unwrap();
        // reopening is a no-op
        w.open().unwrap();
    }

    #[test]
    fn ids_are_dense_and_deduplicated() {
        let mut w = packed_writer();
        w.use_schema("s.vschema", "ns:db").unwrap();
        assert_eq!(w.add_table("A").unwrap(), 1);
        assert_eq!(w.add_table("B").unwrap(), 2);
        assert_eq!(w.add_table("A").unwrap(), 1);
        assert_eq!(w.add_column(1, "C", 8, 0).unwrap(), 1);
        assert_eq!(w.add_column(1, "C", 8, 0).unwrap(), 1);
        assert_eq!(w.add_column(2, "C", 8, 0).unwrap(), 2);
        let events_after = w.event_count();
        w.add_table("B").unwrap();
        // dedup does not emit a second declaration
        assert_eq!(w.event_count(), events_after);
    }

    #[test]
    fn packing_flag_cleared_for_narrow_widths() {
        let mut w = packed_writer();
        w.use_schema("s.vschema", "ns:db").unwrap();
        w.add_table("T").unwrap();
        w.add_column(1, "C8", 8, COLUMN_FLAG_PACK_INTEGER).unwrap();
        assert_eq!(w.columns[0].flag_bits, 0);
        w.add_column(1, "C32", 32, COLUMN_FLAG_PACK_INTEGER).unwrap();
        assert_eq!(w.columns[1].flag_bits, COLUMN_FLAG_PACK_INTEGER);
    }

    #[test]
    fn bad_elem_width_rejected() {
        let mut w = packed_writer();
        w.use_schema("s.vschema", "ns:db").unwrap();
        w.add_table("T").unwrap();
        assert!(w.add_column(1, "C", 24, 0).is_err());
    }

    #[test]
    fn data_rejected_before_open() {
        let mut w = packed_writer();
        w.use_schema("s.vschema", "ns:db").unwrap();
        w.add_table("T").unwrap();
        w.add_column(1, "C", 8, 0).unwrap();
        assert!(w.write(1, 8, b"x", 1).is_err());
        assert!(w.next_row(1).is_err());
    }

    #[test]
    fn narrow_and_wide_cell_events() {
        let mut w = packed_writer();
        w.use_schema("s.vschema", "ns:db").unwrap();
        w.add_table("T").unwrap();
        w.add_column(1, "C", 8, 0).unwrap();
        w.open().unwrap();

        let small = vec![0u8; 256];
        let before = w.byte_count();
        w.write(1, 8, &small, 256).unwrap();
        // narrow: 2 header + 1 size + 256 payload
        assert_eq!(w.byte_count() - before, 2 + 1 + 256);

        let large = vec![0u8; 300];
        let before = w.byte_count();
        w.write(1, 8, &large, 300).unwrap();
        // wide: 2 header + 2 size + 300 payload
        assert_eq!(w.byte_count() - before, 2 + 2 + 300);

        let huge = vec![0u8; MAX_PACKED_CHUNK + 10];
        let before = w.byte_count();
        w.write(1, 8, &huge, (MAX_PACKED_CHUNK + 10) as u32).unwrap();
        // one full wide chunk plus a 10-byte narrow remainder
        assert_eq!(
            w.byte_count() - before,
            (2 + 2 + MAX_PACKED_CHUNK as u64) + (2 + 1 + 10)
        );
    }

    #[test]
    fn unpacked_events_are_aligned() {
        let mut w = StreamWriter::new(MemorySink::new(), Framing::Unpacked).unwrap();
        w.use_schema("s.vschema", "ns:db").unwrap();
        // 3-byte name leaves the offset unaligned until the next event
        w.add_table("abc").unwrap();
        let misaligned = w.byte_count() % 4;
        assert_ne!(misaligned, 0);
        w.add_column(1, "C", 8, 0).unwrap();
        w.open().unwrap();
        w.end_stream().unwrap();
        // every unpacked event starts on a 4-byte boundary, and the
        // fixed headers keep the stream aligned afterwards
        assert_eq!(w.byte_count() % 4, 0);
    }

    #[test]
    fn log_error_tolerates_states_and_replaces_empty() {
        let mut w = packed_writer();
        w.log_error("").unwrap();
        w.end_stream().unwrap();
        // after close it is silently dropped
        w.log_error("late").unwrap();
    }

    #[test]
    fn progress_validations() {
        let mut w = packed_writer();
        w.use_schema("s.vschema", "ns:db").unwrap();
        w.add_table("T").unwrap();
        w.add_column(1, "C", 8, 0).unwrap();
        // dropped silently before open
        w.progress_message("app", 1, 12345, 1, 10).unwrap();
        w.open().unwrap();
        assert!(w.progress_message("app", 1, 12345, 0, 0).is_err());
        assert!(w.progress_message("app", 1, 12345, 11, 10).is_err());
        w.progress_message("app", 0x01000000, 12345, 5, 10).unwrap();
    }
}
