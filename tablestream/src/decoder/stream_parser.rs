use std::io::Read;

use byteorder::{ByteOrder, LittleEndian};
use tracing::{debug, error};

use common::{RcObject, RcState, TsError, TsResult};

use crate::codec::{decode_u16, decode_u32, decode_u64};
use crate::decoder::reader::ByteReader;
use crate::events::event_header::{
    EventHeader, PACKED_HEADER_LEN, PACKED_ROOT_ALIAS, UNPACKED_HEADER_LEN,
};
use crate::events::stream_header::{StreamHeader, HEADER_SIZE};
use crate::events::{
    CreateMode, Event, EventType, COLUMN_FLAG_PACK_INTEGER, STRING_LIMIT_16, STRING_LIMIT_8,
};
use crate::loader::backend::Backend;
use crate::loader::database_loader::DatabaseLoader;

/// Single-pass protocol parser.
///
/// Reads the stream header, selects the framing for the rest of the
/// stream, validates each event against the cross-event invariants
/// (identifier monotonicity, string emptiness, length bounds, framing
/// legality) and hands decoded events to the loader. The byte offset and
/// the 1-based event number live here so independent parsers can run on
/// independent streams.
pub struct StreamParser<R: Read> {
    reader: ByteReader<R>,

    event_num: u64,

    db_count: u32,
    table_count: u32,
    column_count: u32,

    /// scratch for integer-packed payloads, reused across cell events
    unpacking_buf: Vec<u8>,
}

impl<R: Read> StreamParser<R> {
    pub fn new(input: R) -> Self {
        StreamParser {
            reader: ByteReader::new(input),
            event_num: 0,
            db_count: 0,
            table_count: 0,
            column_count: 0,
            unpacking_buf: Vec::new(),
        }
    }

    /// Byte offset of the last read, for error reporting.
    pub fn offset(&self) -> u64 {
        self.reader.read_count()
    }

    /// 1-based number of the event being processed.
    pub fn event_num(&self) -> u64 {
        self.event_num
    }

    /// Drives the whole stream into the loader. On any fatal error the
    /// partially created database is removed and the first error is
    /// returned.
    pub fn run<B: Backend>(&mut self, loader: &mut DatabaseLoader<B>) -> TsResult<()> {
        let result = self.run_inner(loader);
        if let Err(e) = &result {
            error!(
                "load failed at byte offset {}, event {}: {}",
                self.offset(),
                self.event_num,
                e
            );
            loader.clean_up();
        }
        result
    }

    fn run_inner<B: Backend>(&mut self, loader: &mut DatabaseLoader<B>) -> TsResult<()> {
        let header = self.read_stream_header()?;
        debug!(
            "stream header: version {}, packing {}",
            header.version, header.packing
        );

        if header.is_packed() {
            self.parse_packed_events(loader)?;
        } else {
            self.parse_unpacked_events(loader)?;
        }

        // exactly one end-stream; anything after it is an error
        if self.reader.has_trailing_byte()? {
            return Err(TsError::rc(
                RcObject::Data,
                RcState::Unexpected,
                "excess data after end-stream",
            ));
        }
        Ok(())
    }

    fn read_stream_header(&mut self) -> TsResult<StreamHeader> {
        let mut buf = [0u8; HEADER_SIZE];
        self.reader.read_fixed(&mut buf)?;
        StreamHeader::parse(&buf)
    }

    ////////////////////////////////////////////////////////////////////
    // unpacked framing
    ////////////////////////////////////////////////////////////////////

    fn parse_unpacked_events<B: Backend>(
        &mut self,
        loader: &mut DatabaseLoader<B>,
    ) -> TsResult<()> {
        loop {
            self.reader.align(4)?;

            let mut buf = [0u8; UNPACKED_HEADER_LEN];
            self.reader.read_fixed(&mut buf)?;
            let header = EventHeader::parse_unpacked(&buf)?;
            self.event_num += 1;

            let evt = header.event_type;
            if evt == EventType::BadEvent {
                return Err(TsError::rc(
                    RcObject::Data,
                    RcState::Unexpected,
                    "illegal event tag 0 - possibly a block of zeros",
                ));
            }
            if evt.is_packed_only() {
                return Err(TsError::rc(
                    RcObject::Data,
                    RcState::Unexpected,
                    format!("packed event tag {:?} within unpacked stream", evt),
                ));
            }

            debug!("event {}: {:?}, id={}", self.event_num, evt, header.id);

            let event = match evt {
                EventType::EndStream => {
                    loader.apply(Event::EndStream)?;
                    return Ok(());
                }
                EventType::OpenStream => Event::OpenStream,
                EventType::NextRow => Event::NextRow {
                    table_id: header.id,
                },
                EventType::EmptyDefault => Event::EmptyDefault {
                    column_id: header.id,
                },
                EventType::MoveAhead => {
                    let nrows = self.read_u64_le()?;
                    Event::MoveAhead {
                        table_id: header.id,
                        nrows,
                    }
                }
                EventType::RemotePath => Event::RemotePath {
                    path: self.read_1string_u32("remote path", STRING_LIMIT_16)?,
                },
                EventType::UseSchema => {
                    let (schema_file, schema_spec) = self.read_2strings_u32(
                        "schema file",
                        STRING_LIMIT_16,
                        "schema spec",
                        STRING_LIMIT_16,
                    )?;
                    require_non_empty("schema spec", &schema_spec)?;
                    Event::UseSchema {
                        schema_file,
                        schema_spec,
                    }
                }
                EventType::SoftwareName => {
                    let (name, version) = self.read_2strings_u32(
                        "software name",
                        STRING_LIMIT_8,
                        "software version",
                        STRING_LIMIT_8,
                    )?;
                    Event::SoftwareName { name, version }
                }
                EventType::NewTable => {
                    self.expect_next_table_id(header.id)?;
                    Event::NewTable {
                        id: header.id,
                        name: self.read_1string_u32("table name", STRING_LIMIT_8)?,
                    }
                }
                EventType::NewColumn => {
                    self.expect_next_column_id(header.id)?;
                    let mut tail = [0u8; 16];
                    self.reader.read_fixed(&mut tail)?;
                    let table_id = LittleEndian::read_u32(&tail[0..4]);
                    let elem_bits = LittleEndian::read_u32(&tail[4..8]);
                    let flag_bits = LittleEndian::read_u32(&tail[8..12]) as u8;
                    let name_size = LittleEndian::read_u32(&tail[12..16]) as usize;
                    let name = self.read_sized_string("column name", name_size, STRING_LIMIT_8)?;
                    Event::NewColumn {
                        id: header.id,
                        table_id,
                        elem_bits,
                        flag_bits,
                        name,
                    }
                }
                EventType::AddMbrDb => {
                    self.expect_next_db_id(header.id)?;
                    let (parent_id, mbr_name, db_name, mode) = self.read_add_mbr_unpacked()?;
                    Event::AddMbrDb {
                        id: header.id,
                        parent_id,
                        mbr_name,
                        db_name,
                        mode,
                    }
                }
                EventType::AddMbrTbl => {
                    self.expect_next_table_id(header.id)?;
                    let (db_id, mbr_name, tbl_name, mode) = self.read_add_mbr_unpacked()?;
                    Event::AddMbrTbl {
                        id: header.id,
                        db_id,
                        mbr_name,
                        tbl_name,
                        mode,
                    }
                }
                EventType::CellData => {
                    let (elem_count, data) = self.read_cell_unpacked(loader, header.id)?;
                    Event::CellData {
                        column_id: header.id,
                        elem_count,
                        data,
                    }
                }
                EventType::CellDefault => {
                    let (elem_count, data) = self.read_cell_unpacked(loader, header.id)?;
                    Event::CellDefault {
                        column_id: header.id,
                        elem_count,
                        data,
                    }
                }
                EventType::DbMetadataNode
                | EventType::TblMetadataNode
                | EventType::ColMetadataNode => {
                    let (path, value) = self.read_2strings_u32(
                        "metadata path",
                        STRING_LIMIT_16,
                        "metadata value",
                        STRING_LIMIT_16,
                    )?;
                    metadata_node_event(evt, header.id, path, value)
                }
                EventType::DbMetadataNodeAttr
                | EventType::TblMetadataNodeAttr
                | EventType::ColMetadataNodeAttr => {
                    let (path, attr, value) = self.read_3strings_u32()?;
                    metadata_attr_event(evt, header.id, path, attr, value)
                }
                EventType::ErrMsg => Event::ErrMsg {
                    msg: self.read_1string_u32("error message", STRING_LIMIT_16)?,
                },
                EventType::LogMsg => Event::LogMsg {
                    msg: self.read_1string_u32("log message", STRING_LIMIT_16)?,
                },
                EventType::ProgMsg => self.read_progress_unpacked()?,
                EventType::BadEvent
                | EventType::ErrMsg2
                | EventType::RemotePath2
                | EventType::UseSchema2
                | EventType::NewTable2
                | EventType::CellDefault2
                | EventType::CellData2
                | EventType::DbMetadataNode2
                | EventType::TblMetadataNode2
                | EventType::ColMetadataNode2
                | EventType::DbMetadataNodeAttr2
                | EventType::TblMetadataNodeAttr2
                | EventType::ColMetadataNodeAttr2 => unreachable!("rejected above"),
            };

            loader.apply(event)?;
        }
    }

    fn read_add_mbr_unpacked(&mut self) -> TsResult<(u32, String, String, CreateMode)> {
        let mut tail = [0u8; 16];
        self.reader.read_fixed(&mut tail)?;
        let parent_id = LittleEndian::read_u32(&tail[0..4]);
        let sz1 = LittleEndian::read_u32(&tail[4..8]) as usize;
        let sz2 = LittleEndian::read_u32(&tail[8..12]) as usize;
        let mode = parse_create_mode(tail[12])?;
        // tail[13..16] is struct padding

        self.check_size("member name", sz1, STRING_LIMIT_8)?;
        self.check_size("storage name", sz2, STRING_LIMIT_8)?;
        let buf = self.reader.read_var(sz1 + sz2)?;
        let mbr_name = String::from_utf8(buf[..sz1].to_vec())?;
        let storage_name = String::from_utf8(buf[sz1..].to_vec())?;
        require_non_empty("member name", &mbr_name)?;
        require_non_empty("storage name", &storage_name)?;
        Ok((parent_id, mbr_name, storage_name, mode))
    }

    fn read_cell_unpacked<B: Backend>(
        &mut self,
        loader: &DatabaseLoader<B>,
        column_id: u32,
    ) -> TsResult<(u32, Vec<u8>)> {
        let elem_count = self.read_u32_le()?;
        let (elem_bits, _flags) = loader.column_info(column_id).ok_or_else(|| {
            TsError::rc(
                RcObject::Column,
                RcState::NotFound,
                format!("cell event for unknown column id {}", column_id),
            )
        })?;
        let num_bytes = (elem_bits as usize * elem_count as usize + 7) / 8;
        let data = self.reader.read_var(num_bytes)?.to_vec();
        Ok((elem_count, data))
    }

    fn read_progress_unpacked(&mut self) -> TsResult<Event> {
        let mut tail = [0u8; 16];
        self.reader.read_fixed(&mut tail)?;
        let pid = LittleEndian::read_u32(&tail[0..4]);
        let version = LittleEndian::read_u32(&tail[4..8]);
        let timestamp = LittleEndian::read_u32(&tail[8..12]);
        let percent = tail[12];
        let name_size = tail[13] as usize;
        // tail[14..16] is struct padding
        let name = self.read_sized_string("progress name", name_size, STRING_LIMIT_8)?;
        Ok(Event::ProgMsg {
            name,
            pid,
            timestamp,
            version,
            percent,
        })
    }

    ////////////////////////////////////////////////////////////////////
    // packed framing
    ////////////////////////////////////////////////////////////////////

    fn parse_packed_events<B: Backend>(&mut self, loader: &mut DatabaseLoader<B>) -> TsResult<()> {
        loop {
            let mut buf = [0u8; PACKED_HEADER_LEN];
            self.reader.read_fixed(&mut buf)?;
            let header = EventHeader::parse_packed(&buf)?;
            self.event_num += 1;

            let evt = header.event_type;
            if evt == EventType::BadEvent {
                return Err(TsError::rc(
                    RcObject::Data,
                    RcState::Unexpected,
                    "illegal event tag 0 - possibly a block of zeros",
                ));
            }

            debug!("event {}: {:?} (packed), id={}", self.event_num, evt, header.id);

            let event = match evt {
                EventType::EndStream => {
                    loader.apply(Event::EndStream)?;
                    return Ok(());
                }
                EventType::OpenStream => Event::OpenStream,
                EventType::NextRow => Event::NextRow {
                    table_id: header.id,
                },
                EventType::EmptyDefault => Event::EmptyDefault {
                    column_id: header.id,
                },
                EventType::MoveAhead => {
                    let nrows = self.read_u64_le()?;
                    Event::MoveAhead {
                        table_id: header.id,
                        nrows,
                    }
                }
                EventType::RemotePath | EventType::RemotePath2 => Event::RemotePath {
                    path: self.read_1string_packed(
                        evt == EventType::RemotePath2,
                        "remote path",
                        STRING_LIMIT_16,
                    )?,
                },
                EventType::UseSchema | EventType::UseSchema2 => {
                    let wide = evt == EventType::UseSchema2;
                    let (schema_file, schema_spec) = self.read_2strings_packed(
                        wide,
                        "schema file",
                        STRING_LIMIT_16,
                        "schema spec",
                        STRING_LIMIT_16,
                    )?;
                    Event::UseSchema {
                        schema_file,
                        schema_spec,
                    }
                }
                EventType::SoftwareName => {
                    let (name, version) = self.read_2strings_packed(
                        false,
                        "software name",
                        STRING_LIMIT_8,
                        "software version",
                        STRING_LIMIT_8,
                    )?;
                    Event::SoftwareName { name, version }
                }
                EventType::NewTable | EventType::NewTable2 => {
                    self.expect_next_table_id(header.id)?;
                    Event::NewTable {
                        id: header.id,
                        name: self.read_1string_packed(
                            evt == EventType::NewTable2,
                            "table name",
                            STRING_LIMIT_8,
                        )?,
                    }
                }
                EventType::NewColumn => {
                    self.expect_next_column_id(header.id)?;
                    let mut tail = [0u8; 4];
                    self.reader.read_fixed(&mut tail)?;
                    // the owning-table id byte uses the same `- 1`
                    // convention as packed header ids
                    let table_id = tail[0] as u32 + 1;
                    let elem_bits = tail[1] as u32;
                    let flag_bits = tail[2];
                    let name_size = tail[3] as usize + 1;
                    let name = self.read_sized_string("column name", name_size, STRING_LIMIT_8)?;
                    Event::NewColumn {
                        id: header.id,
                        table_id,
                        elem_bits,
                        flag_bits,
                        name,
                    }
                }
                EventType::AddMbrDb => {
                    self.expect_next_db_id(header.id)?;
                    let (parent_id, mbr_name, db_name, mode) = self.read_add_mbr_packed()?;
                    Event::AddMbrDb {
                        id: header.id,
                        parent_id,
                        mbr_name,
                        db_name,
                        mode,
                    }
                }
                EventType::AddMbrTbl => {
                    self.expect_next_table_id(header.id)?;
                    let (db_id, mbr_name, tbl_name, mode) = self.read_add_mbr_packed()?;
                    Event::AddMbrTbl {
                        id: header.id,
                        db_id,
                        mbr_name,
                        tbl_name,
                        mode,
                    }
                }
                EventType::CellData | EventType::CellData2 => {
                    let data_size = self.read_packed_size(evt == EventType::CellData2)?;
                    let (elem_count, data) =
                        self.read_cell_packed(loader, header.id, data_size, true)?;
                    Event::CellData {
                        column_id: header.id,
                        elem_count,
                        data,
                    }
                }
                EventType::CellDefault | EventType::CellDefault2 => {
                    let data_size = self.read_packed_size(evt == EventType::CellDefault2)?;
                    // defaults are never integer-packed
                    let (elem_count, data) =
                        self.read_cell_packed(loader, header.id, data_size, false)?;
                    Event::CellDefault {
                        column_id: header.id,
                        elem_count,
                        data,
                    }
                }
                EventType::DbMetadataNode
                | EventType::DbMetadataNode2
                | EventType::TblMetadataNode
                | EventType::TblMetadataNode2
                | EventType::ColMetadataNode
                | EventType::ColMetadataNode2 => {
                    let wide = matches!(
                        evt,
                        EventType::DbMetadataNode2
                            | EventType::TblMetadataNode2
                            | EventType::ColMetadataNode2
                    );
                    let (path, value) = self.read_2strings_packed(
                        wide,
                        "metadata path",
                        STRING_LIMIT_16,
                        "metadata value",
                        STRING_LIMIT_16,
                    )?;
                    let id = self.alias_packed_metadata_id(evt, header.id);
                    metadata_node_event(evt, id, path, value)
                }
                EventType::DbMetadataNodeAttr
                | EventType::DbMetadataNodeAttr2
                | EventType::TblMetadataNodeAttr
                | EventType::TblMetadataNodeAttr2
                | EventType::ColMetadataNodeAttr
                | EventType::ColMetadataNodeAttr2 => {
                    let wide = matches!(
                        evt,
                        EventType::DbMetadataNodeAttr2
                            | EventType::TblMetadataNodeAttr2
                            | EventType::ColMetadataNodeAttr2
                    );
                    let (path, attr, value) = self.read_3strings_packed(wide)?;
                    let id = self.alias_packed_metadata_id(evt, header.id);
                    metadata_attr_event(evt, id, path, attr, value)
                }
                EventType::ErrMsg | EventType::ErrMsg2 => Event::ErrMsg {
                    msg: self.read_1string_packed(
                        evt == EventType::ErrMsg2,
                        "error message",
                        STRING_LIMIT_16,
                    )?,
                },
                EventType::LogMsg => Event::LogMsg {
                    // log messages travel in the wide form
                    msg: self.read_1string_packed(true, "log message", STRING_LIMIT_16)?,
                },
                EventType::ProgMsg => self.read_progress_packed()?,
                EventType::BadEvent => unreachable!("rejected above"),
            };

            loader.apply(event)?;
        }
    }

    /// Root-database metadata arrives with decoded id 256 in packed
    /// streams; it aliases to 0. Database metadata events only.
    fn alias_packed_metadata_id(&self, evt: EventType, id: u32) -> u32 {
        let db_event = matches!(
            evt,
            EventType::DbMetadataNode
                | EventType::DbMetadataNode2
                | EventType::DbMetadataNodeAttr
                | EventType::DbMetadataNodeAttr2
        );
        if db_event && id == PACKED_ROOT_ALIAS {
            0
        } else {
            id
        }
    }

    fn read_add_mbr_packed(&mut self) -> TsResult<(u32, String, String, CreateMode)> {
        let mut tail = [0u8; 4];
        self.reader.read_fixed(&mut tail)?;
        // database ids are 0-based (root = 0), so the parent byte is
        // carried without the `- 1` offset
        let parent_id = tail[0] as u32;
        let sz1 = tail[1] as usize + 1;
        let sz2 = tail[2] as usize + 1;
        let mode = parse_create_mode(tail[3])?;

        let buf = self.reader.read_var(sz1 + sz2)?;
        let mbr_name = String::from_utf8(buf[..sz1].to_vec())?;
        let storage_name = String::from_utf8(buf[sz1..].to_vec())?;
        Ok((parent_id, mbr_name, storage_name, mode))
    }

    fn read_cell_packed<B: Backend>(
        &mut self,
        loader: &DatabaseLoader<B>,
        column_id: u32,
        data_size: usize,
        may_unpack: bool,
    ) -> TsResult<(u32, Vec<u8>)> {
        let (elem_bits, flags) = loader.column_info(column_id).ok_or_else(|| {
            TsError::rc(
                RcObject::Column,
                RcState::NotFound,
                format!("cell event for unknown column id {}", column_id),
            )
        })?;

        if may_unpack && flags & COLUMN_FLAG_PACK_INTEGER != 0 {
            self.uncompress_cell(data_size, elem_bits)?;
            let elem_count = (self.unpacking_buf.len() * 8 / elem_bits as usize) as u32;
            return Ok((elem_count, self.unpacking_buf.clone()));
        }

        let data = self.reader.read_var(data_size)?.to_vec();
        let elem_count = (data_size * 8 / elem_bits as usize) as u32;
        Ok((elem_count, data))
    }

    /// Decodes a codec-compressed payload into the reusable scratch
    /// buffer. Each element occupies at least one encoded byte, so the
    /// reservation below is an upper bound.
    fn uncompress_cell(&mut self, data_size: usize, elem_bits: u32) -> TsResult<()> {
        let elem_bytes = match elem_bits {
            16 => 2,
            32 => 4,
            64 => 8,
            _ => {
                return Err(TsError::rc(
                    RcObject::Data,
                    RcState::Invalid,
                    format!("bad element size {} for packed integer", elem_bits),
                ));
            }
        };

        let packed = self.reader.read_var(data_size)?.to_vec();
        self.unpacking_buf.clear();
        self.unpacking_buf.reserve(elem_bytes * data_size);

        let mut pos = 0usize;
        while pos < data_size {
            let input = &packed[pos..];
            let consumed = match elem_bits {
                16 => {
                    let (v, n) = decode_u16(input).map_err(codec_to_ts)?;
                    self.unpacking_buf.extend_from_slice(&v.to_le_bytes());
                    n
                }
                32 => {
                    let (v, n) = decode_u32(input).map_err(codec_to_ts)?;
                    self.unpacking_buf.extend_from_slice(&v.to_le_bytes());
                    n
                }
                _ => {
                    let (v, n) = decode_u64(input).map_err(codec_to_ts)?;
                    self.unpacking_buf.extend_from_slice(&v.to_le_bytes());
                    n
                }
            };
            pos += consumed;
        }
        Ok(())
    }

    fn read_progress_packed(&mut self) -> TsResult<Event> {
        let mut tail = [0u8; 14];
        self.reader.read_fixed(&mut tail)?;
        let pid = LittleEndian::read_u32(&tail[0..4]);
        let version = LittleEndian::read_u32(&tail[4..8]);
        let timestamp = LittleEndian::read_u32(&tail[8..12]);
        let percent = tail[12];
        let name_size = tail[13] as usize + 1;
        let name = self.read_sized_string("progress name", name_size, STRING_LIMIT_8)?;
        Ok(Event::ProgMsg {
            name,
            pid,
            timestamp,
            version,
            percent,
        })
    }

    ////////////////////////////////////////////////////////////////////
    // shared readers
    ////////////////////////////////////////////////////////////////////

    fn read_u32_le(&mut self) -> TsResult<u32> {
        let mut buf = [0u8; 4];
        self.reader.read_fixed(&mut buf)?;
        Ok(LittleEndian::read_u32(&buf))
    }

    fn read_u64_le(&mut self) -> TsResult<u64> {
        let mut buf = [0u8; 8];
        self.reader.read_fixed(&mut buf)?;
        Ok(LittleEndian::read_u64(&buf))
    }

    /// Narrow sizes store `len - 1` in one byte, wide sizes in two.
    fn read_packed_size(&mut self, wide: bool) -> TsResult<usize> {
        if wide {
            let mut buf = [0u8; 2];
            self.reader.read_fixed(&mut buf)?;
            Ok(LittleEndian::read_u16(&buf) as usize + 1)
        } else {
            let mut buf = [0u8; 1];
            self.reader.read_fixed(&mut buf)?;
            Ok(buf[0] as usize + 1)
        }
    }

    fn check_size(&self, what: &str, size: usize, limit: usize) -> TsResult<()> {
        if size > limit {
            return Err(TsError::rc(
                RcObject::Data,
                RcState::Invalid,
                format!("{} length {} exceeds limit {}", what, size, limit),
            ));
        }
        Ok(())
    }

    fn read_sized_string(&mut self, what: &str, size: usize, limit: usize) -> TsResult<String> {
        self.check_size(what, size, limit)?;
        let s = String::from_utf8(self.reader.read_var(size)?.to_vec())?;
        require_non_empty(what, &s)?;
        Ok(s)
    }

    fn read_1string_u32(&mut self, what: &str, limit: usize) -> TsResult<String> {
        let size = self.read_u32_le()? as usize;
        self.read_sized_string(what, size, limit)
    }

    fn read_2strings_u32(
        &mut self,
        what1: &str,
        limit1: usize,
        what2: &str,
        limit2: usize,
    ) -> TsResult<(String, String)> {
        let sz1 = self.read_u32_le()? as usize;
        let sz2 = self.read_u32_le()? as usize;
        self.check_size(what1, sz1, limit1)?;
        self.check_size(what2, sz2, limit2)?;
        let buf = self.reader.read_var(sz1 + sz2)?;
        let s1 = String::from_utf8(buf[..sz1].to_vec())?;
        let s2 = String::from_utf8(buf[sz1..].to_vec())?;
        require_non_empty(what1, &s1)?;
        Ok((s1, s2))
    }

    fn read_3strings_u32(&mut self) -> TsResult<(String, String, String)> {
        let sz1 = self.read_u32_le()? as usize;
        let sz2 = self.read_u32_le()? as usize;
        let sz3 = self.read_u32_le()? as usize;
        self.check_size("metadata path", sz1, STRING_LIMIT_16)?;
        self.check_size("attribute name", sz2, STRING_LIMIT_16)?;
        self.check_size("attribute value", sz3, STRING_LIMIT_16)?;
        let buf = self.reader.read_var(sz1 + sz2 + sz3)?;
        let s1 = String::from_utf8(buf[..sz1].to_vec())?;
        let s2 = String::from_utf8(buf[sz1..sz1 + sz2].to_vec())?;
        let s3 = String::from_utf8(buf[sz1 + sz2..].to_vec())?;
        require_non_empty("metadata path", &s1)?;
        Ok((s1, s2, s3))
    }

    fn read_1string_packed(&mut self, wide: bool, what: &str, limit: usize) -> TsResult<String> {
        let size = self.read_packed_size(wide)?;
        self.read_sized_string(what, size, limit)
    }

    fn read_2strings_packed(
        &mut self,
        wide: bool,
        what1: &str,
        limit1: usize,
        what2: &str,
        limit2: usize,
    ) -> TsResult<(String, String)> {
        let sz1 = self.read_packed_size(wide)?;
        let sz2 = self.read_packed_size(wide)?;
        self.check_size(what1, sz1, limit1)?;
        self.check_size(what2, sz2, limit2)?;
        let buf = self.reader.read_var(sz1 + sz2)?;
        let s1 = String::from_utf8(buf[..sz1].to_vec())?;
        let s2 = String::from_utf8(buf[sz1..].to_vec())?;
        Ok((s1, s2))
    }

    fn read_3strings_packed(&mut self, wide: bool) -> TsResult<(String, String, String)> {
        let sz1 = self.read_packed_size(wide)?;
        let sz2 = self.read_packed_size(wide)?;
        let sz3 = self.read_packed_size(wide)?;
        self.check_size("metadata path", sz1, STRING_LIMIT_16)?;
        self.check_size("attribute name", sz2, STRING_LIMIT_16)?;
        self.check_size("attribute value", sz3, STRING_LIMIT_16)?;
        let buf = self.reader.read_var(sz1 + sz2 + sz3)?;
        let s1 = String::from_utf8(buf[..sz1].to_vec())?;
        let s2 = String::from_utf8(buf[sz1..sz1 + sz2].to_vec())?;
        let s3 = String::from_utf8(buf[sz1 + sz2..].to_vec())?;
        Ok((s1, s2, s3))
    }

    ////////////////////////////////////////////////////////////////////
    // identifier spaces
    ////////////////////////////////////////////////////////////////////

    /// New ids must arrive densely: 1, 2, 3, ... per space. A reused id
    /// is `exists`, a gap is `invalid`.
    fn expect_next_id(
        &self,
        obj: RcObject,
        declared: u32,
        count: u32,
    ) -> TsResult<()> {
        if declared == count + 1 {
            return Ok(());
        }
        if declared <= count {
            Err(TsError::rc(
                obj,
                RcState::Exists,
                format!("id {} already declared", declared),
            ))
        } else {
            Err(TsError::rc(
                obj,
                RcState::Invalid,
                format!("id {} out of order, expected {}", declared, count + 1),
            ))
        }
    }

    fn expect_next_table_id(&mut self, id: u32) -> TsResult<()> {
        self.expect_next_id(RcObject::Table, id, self.table_count)?;
        self.table_count += 1;
        Ok(())
    }

    fn expect_next_column_id(&mut self, id: u32) -> TsResult<()> {
        self.expect_next_id(RcObject::Column, id, self.column_count)?;
        self.column_count += 1;
        Ok(())
    }

    fn expect_next_db_id(&mut self, id: u32) -> TsResult<()> {
        self.expect_next_id(RcObject::Database, id, self.db_count)?;
        self.db_count += 1;
        Ok(())
    }
}

fn parse_create_mode(raw: u8) -> TsResult<CreateMode> {
    CreateMode::from_wire(raw).ok_or_else(|| {
        TsError::rc(
            RcObject::Data,
            RcState::Invalid,
            format!("bad create mode {:#04x}", raw),
        )
    })
}

fn require_non_empty(what: &str, s: &str) -> TsResult<()> {
    if s.is_empty() {
        return Err(TsError::rc(
            RcObject::Data,
            RcState::Invalid,
            format!("empty {}", what),
        ));
    }
    Ok(())
}

fn codec_to_ts(e: crate::codec::CodecError) -> TsError {
    TsError::rc(
        RcObject::Data,
        RcState::Corrupt,
        format!("packed integer payload: {}", e),
    )
}

fn metadata_node_event(evt: EventType, id: u32, path: String, value: String) -> Event {
    match evt {
        EventType::DbMetadataNode | EventType::DbMetadataNode2 => {
            Event::DbMetadataNode { id, path, value }
        }
        EventType::TblMetadataNode | EventType::TblMetadataNode2 => {
            Event::TblMetadataNode { id, path, value }
        }
        _ => Event::ColMetadataNode { id, path, value },
    }
}

fn metadata_attr_event(
    evt: EventType,
    id: u32,
    path: String,
    attr: String,
    value: String,
) -> Event {
    match evt {
        EventType::DbMetadataNodeAttr | EventType::DbMetadataNodeAttr2 => Event::DbMetadataNodeAttr {
            id,
            path,
            attr,
            value,
        },
        EventType::TblMetadataNodeAttr | EventType::TblMetadataNodeAttr2 => {
            Event::TblMetadataNodeAttr {
                id,
                path,
                attr,
                value,
            }
        }
        _ => Event::ColMetadataNodeAttr {
            id,
            path,
            attr,
            value,
        },
    }
}
