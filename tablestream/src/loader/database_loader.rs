use std::collections::BTreeMap;

use chrono::{TimeZone, Utc};
use tracing::{debug, error, info, warn};

use common::{RcObject, RcState, TsError, TsResult};

use crate::events::{CreateMode, Event, LEGAL_ELEM_BITS};
use crate::loader::backend::{
    Backend, CursorHandle, DbHandle, MetadataAttrs, MetadataNodes, TableHandle,
};

/// The stateful consumer of decoded events.
///
/// Maps the event stream onto databases, tables, columns and row cursors,
/// enforces the cross-event invariants the parser cannot see (row
/// completion, open/close ordering, schema presence) and delegates every
/// physical effect to the backend. Object graphs are arena-style maps
/// keyed by stream id; cross-references are integers.
pub struct DatabaseLoader<B: Backend> {
    backend: B,

    program_name: String,
    include_paths: Vec<String>,
    /// externally supplied schema files, parsed in addition to the one
    /// named in the stream
    schemas: Vec<String>,

    /// effective database name; may be overridden by the front end
    database_name: String,
    database_name_overridden: bool,

    schema_spec: String,
    mgr_created: bool,

    software_name: String,
    software_version: u32,

    /// id -> backend handle; the root is pre-inserted at 0 and
    /// materialized lazily
    databases: BTreeMap<u32, Option<DbHandle>>,
    db_parents: BTreeMap<u32, u32>,

    tables: BTreeMap<u32, TableEntry>,
    columns: BTreeMap<u32, ColumnEntry>,
    cursors: Vec<CursorEntry>,

    opened: bool,
}

#[derive(Debug)]
struct TableEntry {
    name: String,
    database_id: u32,
    handle: TableHandle,
    cursor_idx: usize,
}

#[derive(Debug)]
struct ColumnEntry {
    name: String,
    table_id: u32,
    cursor_idx: usize,
    /// backend cursor-local column index
    col_idx: u32,
    /// position within the cursor's completion bookkeeping
    pos: usize,
    elem_bits: u32,
    flag_bits: u8,
    metadata: MetadataNodes,
    metadata_attrs: MetadataAttrs,
}

/// Per-table hot state: the open row and the per-column completion flags
/// checked at every commit.
#[derive(Debug)]
struct CursorEntry {
    handle: CursorHandle,
    row_id: u64,
    open: bool,
    columns: Vec<CursorColumn>,
}

#[derive(Debug)]
struct CursorColumn {
    column_id: u32,
    written: bool,
    default_set: bool,
}

impl<B: Backend> DatabaseLoader<B> {
    pub fn new(
        backend: B,
        program_name: impl Into<String>,
        include_paths: Vec<String>,
        schemas: Vec<String>,
        db_name_override: Option<String>,
    ) -> Self {
        let database_name = db_name_override.unwrap_or_default();
        let database_name_overridden = !database_name.is_empty();

        let mut databases = BTreeMap::new();
        // reserve the root database
        databases.insert(0, None);

        DatabaseLoader {
            backend,
            program_name: program_name.into(),
            include_paths,
            schemas,
            database_name,
            database_name_overridden,
            schema_spec: String::new(),
            mgr_created: false,
            software_name: String::new(),
            software_version: 0,
            databases,
            db_parents: BTreeMap::new(),
            tables: BTreeMap::new(),
            columns: BTreeMap::new(),
            cursors: Vec::new(),
            opened: false,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn into_backend(self) -> B {
        self.backend
    }

    pub fn database_name(&self) -> &str {
        &self.database_name
    }

    /// Element width and flag bits of a declared column; the parser needs
    /// both to size and unpack cell payloads.
    pub fn column_info(&self, column_id: u32) -> Option<(u32, u8)> {
        self.columns
            .get(&column_id)
            .map(|c| (c.elem_bits, c.flag_bits))
    }

    /// Owning database of a declared table.
    pub fn table_database(&self, table_id: u32) -> Option<u32> {
        self.tables.get(&table_id).map(|t| t.database_id)
    }

    /// Parent of a declared member database; the root has none.
    pub fn database_parent(&self, db_id: u32) -> Option<u32> {
        self.db_parents.get(&db_id).copied()
    }

    /// Applies one decoded event. Exhaustive over the event set.
    pub fn apply(&mut self, event: Event) -> TsResult<()> {
        debug!("loader event: {}", event.name());
        match event {
            Event::UseSchema {
                schema_file,
                schema_spec,
            } => self.use_schema(&schema_file, &schema_spec),
            Event::RemotePath { path } => self.remote_path(&path),
            Event::SoftwareName { name, version } => self.software_name(&name, &version),
            Event::NewTable { id, name } => {
                // shorthand for a member table of the root database
                self.add_mbr_tbl(id, 0, &name, &name, CreateMode::create_md5())
            }
            Event::NewColumn {
                id,
                table_id,
                elem_bits,
                flag_bits,
                name,
            } => self.new_column(id, table_id, elem_bits, flag_bits, &name),
            Event::AddMbrDb {
                id,
                parent_id,
                mbr_name,
                db_name,
                mode,
            } => self.add_mbr_db(id, parent_id, &mbr_name, &db_name, mode),
            Event::AddMbrTbl {
                id,
                db_id,
                mbr_name,
                tbl_name,
                mode,
            } => self.add_mbr_tbl(id, db_id, &mbr_name, &tbl_name, mode),
            Event::OpenStream => self.open_stream(),
            Event::CellData {
                column_id,
                elem_count,
                data,
            } => self.cell_data(column_id, &data, elem_count),
            Event::CellDefault {
                column_id,
                elem_count,
                data,
            } => self.cell_default(column_id, &data, elem_count),
            Event::EmptyDefault { column_id } => self.cell_default(column_id, &[], 0),
            Event::NextRow { table_id } => self.next_row(table_id),
            Event::MoveAhead { table_id, nrows } => self.move_ahead(table_id, nrows),
            Event::DbMetadataNode { id, path, value } => self.db_metadata(id, &path, &value, None),
            Event::DbMetadataNodeAttr {
                id,
                path,
                attr,
                value,
            } => self.db_metadata(id, &path, &value, Some(&attr)),
            Event::TblMetadataNode { id, path, value } => {
                self.tbl_metadata(id, &path, &value, None)
            }
            Event::TblMetadataNodeAttr {
                id,
                path,
                attr,
                value,
            } => self.tbl_metadata(id, &path, &value, Some(&attr)),
            Event::ColMetadataNode { id, path, value } => {
                self.col_metadata(id, &path, &value, None)
            }
            Event::ColMetadataNodeAttr {
                id,
                path,
                attr,
                value,
            } => self.col_metadata(id, &path, &value, Some(&attr)),
            Event::ErrMsg { msg } => self.error_message(&msg),
            Event::LogMsg { msg } => self.log_message(&msg),
            Event::ProgMsg {
                name,
                pid,
                timestamp,
                version,
                percent,
            } => self.progress_message(&name, pid, timestamp, version, percent),
            Event::EndStream => self.close_stream(),
        }
    }

    fn use_schema(&mut self, file: &str, spec: &str) -> TsResult<()> {
        debug!("use-schema: file '{}', spec '{}'", file, spec);

        if self.mgr_created {
            return Err(TsError::rc(
                RcObject::Schema,
                RcState::Exists,
                "schema already declared",
            ));
        }
        self.mgr_created = true;

        for path in self.include_paths.clone() {
            match self.backend.add_schema_include_path(&path) {
                Ok(()) => debug!("added schema include path '{}'", path),
                Err(e) if e.is_rc(RcObject::Schema, RcState::NotFound) => {
                    warn!("schema include path not found: '{}'", path);
                }
                Err(e) => return Err(e),
            }
        }

        let mut found = false;
        match self.backend.parse_schema_file(file) {
            Ok(()) => {
                debug!("added schema file '{}'", file);
                found = true;
            }
            Err(e) if e.is_rc(RcObject::Schema, RcState::NotFound) => {
                warn!("schema file not found: '{}'", file);
            }
            Err(e) => return Err(e),
        }

        for path in self.schemas.clone() {
            match self.backend.parse_schema_file(&path) {
                Ok(()) => {
                    debug!("added schema file '{}'", path);
                    found = true;
                }
                Err(e) if e.is_rc(RcObject::Schema, RcState::NotFound) => {
                    warn!("schema file not found: '{}'", path);
                }
                Err(e) => return Err(e),
            }
        }

        if !found {
            return Err(TsError::rc(
                RcObject::Schema,
                RcState::NotFound,
                "no schema file could be parsed",
            ));
        }

        self.schema_spec = spec.to_string();
        Ok(())
    }

    fn remote_path(&mut self, path: &str) -> TsResult<()> {
        if self.database_name_overridden {
            warn!(
                "remote path '{}' ignored, overridden to '{}'",
                path, self.database_name
            );
        } else {
            debug!("remote path '{}'", path);
            self.database_name = path.to_string();
        }
        Ok(())
    }

    fn software_name(&mut self, name: &str, version: &str) -> TsResult<()> {
        debug!("software '{}', version '{}'", name, version);
        self.software_version = parse_dotted_version(version).ok_or_else(|| {
            TsError::rc(
                RcObject::Message,
                RcState::BadVersion,
                format!("malformed software version '{}'", version),
            )
        })?;
        self.software_name = name.to_string();
        Ok(())
    }

    fn add_mbr_db(
        &mut self,
        id: u32,
        parent_id: u32,
        mbr_name: &str,
        db_name: &str,
        mode: CreateMode,
    ) -> TsResult<()> {
        debug!(
            "adding database id={} parent={} mbr='{}' name='{}' mode={:#04x}",
            id,
            parent_id,
            mbr_name,
            db_name,
            mode.to_wire()
        );

        if self.opened {
            return Err(TsError::rc(
                RcObject::Data,
                RcState::Unexpected,
                "database declared after open-stream",
            ));
        }
        if self.databases.contains_key(&id) {
            return Err(TsError::rc(
                RcObject::Database,
                RcState::Exists,
                format!("database id {} re-declared", id),
            ));
        }

        let parent = self.make_database(parent_id)?;
        let handle = self.backend.create_sub_db(parent, mbr_name, mode, db_name)?;
        self.databases.insert(id, Some(handle));
        self.db_parents.insert(id, parent_id);
        Ok(())
    }

    fn add_mbr_tbl(
        &mut self,
        id: u32,
        db_id: u32,
        mbr_name: &str,
        tbl_name: &str,
        mode: CreateMode,
    ) -> TsResult<()> {
        debug!(
            "adding table id={} parent={} mbr='{}' name='{}' mode={:#04x}",
            id,
            db_id,
            mbr_name,
            tbl_name,
            mode.to_wire()
        );

        if self.opened {
            return Err(TsError::rc(
                RcObject::Data,
                RcState::Unexpected,
                "table declared after open-stream",
            ));
        }
        if self.tables.contains_key(&id) {
            return Err(TsError::rc(
                RcObject::Table,
                RcState::Exists,
                format!("table id {} re-declared", id),
            ));
        }

        let db = self.make_database(db_id)?;
        let handle = self.backend.create_table(db, mbr_name, mode, tbl_name)?;
        let cursor = self.backend.create_write_cursor(handle)?;
        let cursor_idx = self.cursors.len();
        self.cursors.push(CursorEntry {
            handle: cursor,
            row_id: 0,
            open: false,
            columns: Vec::new(),
        });
        self.tables.insert(
            id,
            TableEntry {
                name: tbl_name.to_string(),
                database_id: db_id,
                handle,
                cursor_idx,
            },
        );
        Ok(())
    }

    fn new_column(
        &mut self,
        id: u32,
        table_id: u32,
        elem_bits: u32,
        flag_bits: u8,
        name: &str,
    ) -> TsResult<()> {
        debug!(
            "adding column id={} table={} '{}', elem_bits={}, flag_bits={:#04x}",
            id, table_id, name, elem_bits, flag_bits
        );

        if self.opened {
            return Err(TsError::rc(
                RcObject::Data,
                RcState::Unexpected,
                "column declared after open-stream",
            ));
        }

        let table = self.tables.get(&table_id).ok_or_else(|| {
            TsError::rc(
                RcObject::Table,
                RcState::NotFound,
                format!("column declared for unknown table id {}", table_id),
            )
        })?;
        if self.columns.contains_key(&id) {
            return Err(TsError::rc(
                RcObject::Column,
                RcState::Exists,
                format!("column id {} re-declared", id),
            ));
        }
        if !LEGAL_ELEM_BITS.contains(&elem_bits) {
            return Err(TsError::rc(
                RcObject::Data,
                RcState::Invalid,
                format!("illegal element width {} bits", elem_bits),
            ));
        }

        let cursor_idx = table.cursor_idx;
        let col_idx = self
            .backend
            .cursor_add_column(self.cursors[cursor_idx].handle, name, elem_bits)?;
        let pos = self.cursors[cursor_idx].columns.len();
        self.cursors[cursor_idx].columns.push(CursorColumn {
            column_id: id,
            written: false,
            default_set: false,
        });
        self.columns.insert(
            id,
            ColumnEntry {
                name: name.to_string(),
                table_id,
                cursor_idx,
                col_idx,
                pos,
                elem_bits,
                flag_bits,
                metadata: BTreeMap::new(),
                metadata_attrs: BTreeMap::new(),
            },
        );
        Ok(())
    }

    fn open_stream(&mut self) -> TsResult<()> {
        debug!(
            "open-stream: schema spec '{}', database '{}'",
            self.schema_spec, self.database_name
        );

        if self.opened {
            return Err(TsError::rc(
                RcObject::Data,
                RcState::Unexpected,
                "open-stream already seen",
            ));
        }

        self.make_database(0)?;
        for cursor in self.cursors.iter_mut() {
            self.backend.cursor_open(cursor.handle)?;
            self.backend.cursor_open_row(cursor.handle)?;
            cursor.open = true;
            cursor.row_id = 1;
        }
        self.opened = true;
        Ok(())
    }

    fn cell_data(&mut self, column_id: u32, data: &[u8], elem_count: u32) -> TsResult<()> {
        let col = self.columns.get(&column_id).ok_or_else(|| {
            TsError::rc(
                RcObject::Column,
                RcState::NotFound,
                format!("cell data for unknown column id {}", column_id),
            )
        })?;
        debug!(
            "cell-data: column {}, elem size={} bits, count={}",
            column_id, col.elem_bits, elem_count
        );

        let cursor = &mut self.cursors[col.cursor_idx];
        if !cursor.open {
            return Err(TsError::rc(
                RcObject::Row,
                RcState::NotOpen,
                "cell data before open-stream",
            ));
        }
        self.backend
            .cursor_write(cursor.handle, col.col_idx, data, elem_count)?;
        cursor.columns[col.pos].written = true;
        Ok(())
    }

    fn cell_default(&mut self, column_id: u32, data: &[u8], elem_count: u32) -> TsResult<()> {
        let col = self.columns.get(&column_id).ok_or_else(|| {
            TsError::rc(
                RcObject::Column,
                RcState::NotFound,
                format!("cell default for unknown column id {}", column_id),
            )
        })?;
        debug!(
            "cell-default: column {}, elem size={} bits, count={}",
            column_id, col.elem_bits, elem_count
        );

        let cursor = &mut self.cursors[col.cursor_idx];
        if !cursor.open {
            return Err(TsError::rc(
                RcObject::Row,
                RcState::NotOpen,
                "cell default before open-stream",
            ));
        }
        self.backend
            .cursor_default(cursor.handle, col.col_idx, data, elem_count)?;
        cursor.columns[col.pos].default_set = true;
        Ok(())
    }

    fn next_row(&mut self, table_id: u32) -> TsResult<()> {
        let cursor_idx = self.table_cursor(table_id)?;
        self.advance_row(cursor_idx)
    }

    fn move_ahead(&mut self, table_id: u32, nrows: u64) -> TsResult<()> {
        debug!("move-ahead: table {}, nrows {}", table_id, nrows);
        let cursor_idx = self.table_cursor(table_id)?;
        for _ in 0..nrows {
            self.advance_row(cursor_idx)?;
        }
        Ok(())
    }

    fn table_cursor(&self, table_id: u32) -> TsResult<usize> {
        self.tables
            .get(&table_id)
            .map(|t| t.cursor_idx)
            .ok_or_else(|| {
                TsError::rc(
                    RcObject::Table,
                    RcState::NotFound,
                    format!("row event for unknown table id {}", table_id),
                )
            })
    }

    /// Commits the open row, closes it and opens the next one. Every
    /// column must have an explicit cell or a default.
    fn advance_row(&mut self, cursor_idx: usize) -> TsResult<()> {
        let cursor = &mut self.cursors[cursor_idx];
        if !cursor.open {
            return Err(TsError::rc(
                RcObject::Row,
                RcState::NotOpen,
                "row advanced before open-stream",
            ));
        }

        for col in cursor.columns.iter() {
            if !col.written && !col.default_set {
                return Err(TsError::rc(
                    RcObject::Row,
                    RcState::Incomplete,
                    format!(
                        "row {} incomplete: column id {} has no cell and no default",
                        cursor.row_id, col.column_id
                    ),
                ));
            }
        }

        self.backend.cursor_commit_row(cursor.handle)?;
        self.backend.cursor_close_row(cursor.handle)?;
        self.backend.cursor_open_row(cursor.handle)?;
        cursor.row_id += 1;
        for col in cursor.columns.iter_mut() {
            col.written = false;
        }
        Ok(())
    }

    fn db_metadata(
        &mut self,
        id: u32,
        path: &str,
        value: &str,
        attr: Option<&str>,
    ) -> TsResult<()> {
        debug!("db {} metadata node '{}'", id, path);
        if !self.databases.contains_key(&id) {
            return Err(TsError::rc(
                RcObject::Database,
                RcState::NotFound,
                format!("metadata for unknown database id {}", id),
            ));
        }
        let handle = self.make_database(id)?;
        match attr {
            None => self.backend.db_metadata_value(handle, path, value),
            Some(attr) => self.backend.db_metadata_attr(handle, path, attr, value),
        }
    }

    fn tbl_metadata(
        &mut self,
        id: u32,
        path: &str,
        value: &str,
        attr: Option<&str>,
    ) -> TsResult<()> {
        debug!("table {} metadata node '{}'", id, path);
        let table = self.tables.get(&id).ok_or_else(|| {
            TsError::rc(
                RcObject::Table,
                RcState::NotFound,
                format!("metadata for unknown table id {}", id),
            )
        })?;
        match attr {
            None => self.backend.table_metadata_value(table.handle, path, value),
            Some(attr) => self
                .backend
                .table_metadata_attr(table.handle, path, attr, value),
        }
    }

    /// Column metadata is buffered and written during finalization.
    fn col_metadata(
        &mut self,
        id: u32,
        path: &str,
        value: &str,
        attr: Option<&str>,
    ) -> TsResult<()> {
        debug!("column {} metadata node '{}'", id, path);
        let col = self.columns.get_mut(&id).ok_or_else(|| {
            TsError::rc(
                RcObject::Column,
                RcState::NotFound,
                format!("metadata for unknown column id {}", id),
            )
        })?;
        match attr {
            None => {
                col.metadata.insert(path.to_string(), value.to_string());
            }
            Some(attr) => {
                col.metadata_attrs
                    .entry(path.to_string())
                    .or_default()
                    .insert(attr.to_string(), value.to_string());
            }
        }
        Ok(())
    }

    fn error_message(&mut self, msg: &str) -> TsResult<()> {
        error!("producer error: \"{}\"", msg);
        Err(TsError::rc(RcObject::Error, RcState::Exists, msg))
    }

    fn log_message(&mut self, msg: &str) -> TsResult<()> {
        info!("log from {}: \"{}\"", self.software_name, msg);
        Ok(())
    }

    fn progress_message(
        &mut self,
        name: &str,
        pid: u32,
        timestamp: u32,
        version: u32,
        percent: u8,
    ) -> TsResult<()> {
        if percent > 100 {
            return Err(TsError::rc(
                RcObject::Message,
                RcState::Invalid,
                format!("bad percent {}", percent),
            ));
        }
        if timestamp == 0 || version == 0 {
            return Err(TsError::rc(
                RcObject::Message,
                RcState::Invalid,
                "zero timestamp or version in progress message",
            ));
        }

        let when = Utc
            .timestamp_opt(timestamp as i64, 0)
            .single()
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| timestamp.to_string());
        info!(
            "{} (pid {}, version {}): processed {}% at {}",
            name,
            pid,
            format_dotted_version(version),
            percent,
            when
        );
        Ok(())
    }

    fn close_stream(&mut self) -> TsResult<()> {
        debug!("close-stream");

        for cursor in self.cursors.iter_mut() {
            if !cursor.open {
                continue;
            }
            // the trailing open row is discarded, not committed
            self.backend.cursor_close_row(cursor.handle)?;
            self.backend.cursor_commit(cursor.handle)?;
            self.backend.cursor_release(cursor.handle)?;
            cursor.open = false;
        }

        for table in self.tables.values() {
            self.backend.reindex(table.handle)?;
        }

        // flush buffered column metadata, opening each physical column
        // once
        for col in self.columns.values() {
            if col.metadata.is_empty() && col.metadata_attrs.is_empty() {
                continue;
            }
            let table = self.tables.get(&col.table_id).ok_or_else(|| {
                TsError::Bug(format!("column {} refers to unknown table", col.name))
            })?;
            self.backend.column_metadata(
                table.handle,
                &col.name,
                &col.metadata,
                &col.metadata_attrs,
            )?;
        }

        // handles are dropped with the maps, children before parents
        self.opened = false;
        Ok(())
    }

    /// Removes the partially created database after a fatal error.
    pub fn clean_up(&mut self) {
        let materialized = self.databases.get(&0).map(|h| h.is_some()).unwrap_or(false);
        if materialized {
            let name = self.database_name.clone();
            if let Err(e) = self.backend.remove_db(&name) {
                warn!("failed to remove database '{}': {}", name, e);
            }
        }
        self.tables.clear();
        self.columns.clear();
        self.cursors.clear();
        self.databases.clear();
        self.db_parents.clear();
        self.opened = false;
    }

    /// Looks up a database handle, creating the root on first use. The
    /// root also receives the load provenance metadata.
    fn make_database(&mut self, id: u32) -> TsResult<DbHandle> {
        let entry = self.databases.get(&id).ok_or_else(|| {
            TsError::rc(
                RcObject::Database,
                RcState::NotFound,
                format!("unknown database id {}", id),
            )
        })?;
        if let Some(handle) = entry {
            return Ok(*handle);
        }

        // only the root starts unmaterialized
        let schema_spec = self.schema_spec.clone();
        let name = self.database_name.clone();
        let handle = self.backend.create_db(&schema_spec, &name)?;
        self.databases.insert(id, Some(handle));

        self.backend
            .db_metadata_attr(handle, "SOFTWARE/loader", "name", &self.program_name)?;
        if !self.software_name.is_empty() {
            let software_name = self.software_name.clone();
            let vers = format_dotted_version(self.software_version);
            self.backend
                .db_metadata_attr(handle, "SOFTWARE/formatter", "name", &software_name)?;
            self.backend
                .db_metadata_attr(handle, "SOFTWARE/formatter", "vers", &vers)?;
        }
        Ok(handle)
    }
}

/// Parses a dotted `M.m.p` version with `M, m <= 255` and `p <= 65535`,
/// packed as `M<<24 | m<<16 | p`. Anything else is malformed.
fn parse_dotted_version(vers: &str) -> Option<u32> {
    let mut parts = vers.split('.');
    let major: u32 = parts.next()?.parse().ok().filter(|v| *v <= 255)?;
    let minor: u32 = parts.next()?.parse().ok().filter(|v| *v <= 255)?;
    let patch: u32 = parts.next()?.parse().ok().filter(|v| *v <= 0xFFFF)?;
    if parts.next().is_some() {
        return None;
    }
    Some(major << 24 | minor << 16 | patch)
}

fn format_dotted_version(version: u32) -> String {
    format!(
        "{}.{}.{}",
        version >> 24,
        (version >> 16) & 0xFF,
        version & 0xFFFF
    )
}
