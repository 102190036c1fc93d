use std::collections::{BTreeMap, HashSet};

use common::{RcObject, RcState, TsError, TsResult};

use crate::events::CreateMode;
use crate::loader::backend::{
    Backend, CursorHandle, DbHandle, MetadataAttrs, MetadataNodes, TableHandle,
};

/// In-memory columnar store. Stands in for a physical storage engine in
/// tests and in the CLI; keeps everything inspectable after the load.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    pub include_paths: Vec<String>,
    pub parsed_schemas: Vec<String>,

    /// When set, only these schema files "exist"; everything else
    /// reports `schema/not-found` like a missing file would.
    pub available_schemas: Option<HashSet<String>>,

    pub dbs: Vec<MemDatabase>,
    pub tables: Vec<MemTable>,
    cursors: Vec<MemCursor>,

    pub removed_dbs: Vec<String>,
}

#[derive(Debug)]
pub struct MemDatabase {
    pub name: String,
    pub mbr_name: String,
    pub parent: Option<DbHandle>,
    pub schema_spec: String,
    pub mode: Option<CreateMode>,
    pub metadata: MetadataNodes,
    pub metadata_attrs: MetadataAttrs,
}

#[derive(Debug)]
pub struct MemTable {
    pub db: DbHandle,
    pub name: String,
    pub mbr_name: String,
    pub mode: CreateMode,
    pub columns: Vec<MemColumn>,
    pub reindexed: bool,
    pub metadata: MetadataNodes,
    pub metadata_attrs: MetadataAttrs,
}

#[derive(Debug)]
pub struct MemColumn {
    pub name: String,
    pub elem_bits: u32,
    pub default: Option<Vec<u8>>,
    /// committed cells, one payload per row
    pub rows: Vec<Vec<u8>>,
    pub metadata: MetadataNodes,
    pub metadata_attrs: MetadataAttrs,
}

#[derive(Debug)]
struct MemCursor {
    table: TableHandle,
    open: bool,
    row_open: bool,
    committed: bool,
    released: bool,
    /// per-column pending cell of the open row
    pending: Vec<Option<Vec<u8>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        MemoryBackend::default()
    }

    pub fn with_available_schemas<I: IntoIterator<Item = String>>(schemas: I) -> Self {
        MemoryBackend {
            available_schemas: Some(schemas.into_iter().collect()),
            ..MemoryBackend::default()
        }
    }

    pub fn find_table(&self, name: &str) -> Option<&MemTable> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn find_column(&self, table: &str, column: &str) -> Option<&MemColumn> {
        self.find_table(table)?
            .columns
            .iter()
            .find(|c| c.name == column)
    }

    /// Committed rows of a column, with defaults already substituted.
    pub fn column_rows(&self, table: &str, column: &str) -> Option<&[Vec<u8>]> {
        self.find_column(table, column).map(|c| c.rows.as_slice())
    }

    fn cursor(&mut self, handle: CursorHandle) -> TsResult<&mut MemCursor> {
        self.cursors.get_mut(handle as usize).ok_or_else(|| {
            TsError::rc(RcObject::Cursor, RcState::NotFound, "bad cursor handle")
        })
    }

    fn table(&mut self, handle: TableHandle) -> TsResult<&mut MemTable> {
        self.tables
            .get_mut(handle as usize)
            .ok_or_else(|| TsError::rc(RcObject::Table, RcState::NotFound, "bad table handle"))
    }
}

impl Backend for MemoryBackend {
    fn add_schema_include_path(&mut self, path: &str) -> TsResult<()> {
        self.include_paths.push(path.to_string());
        Ok(())
    }

    fn parse_schema_file(&mut self, path: &str) -> TsResult<()> {
        if let Some(available) = &self.available_schemas {
            if !available.contains(path) {
                return Err(TsError::rc(
                    RcObject::Schema,
                    RcState::NotFound,
                    format!("schema file '{}' not found", path),
                ));
            }
        }
        self.parsed_schemas.push(path.to_string());
        Ok(())
    }

    fn create_db(&mut self, schema_spec: &str, name: &str) -> TsResult<DbHandle> {
        let handle = self.dbs.len() as DbHandle;
        self.dbs.push(MemDatabase {
            name: name.to_string(),
            mbr_name: String::new(),
            parent: None,
            schema_spec: schema_spec.to_string(),
            mode: None,
            metadata: BTreeMap::new(),
            metadata_attrs: BTreeMap::new(),
        });
        Ok(handle)
    }

    fn remove_db(&mut self, name: &str) -> TsResult<()> {
        self.removed_dbs.push(name.to_string());
        self.dbs.clear();
        self.tables.clear();
        self.cursors.clear();
        Ok(())
    }

    fn create_sub_db(
        &mut self,
        parent: DbHandle,
        mbr_name: &str,
        mode: CreateMode,
        name: &str,
    ) -> TsResult<DbHandle> {
        if parent as usize >= self.dbs.len() {
            return Err(TsError::rc(
                RcObject::Database,
                RcState::NotFound,
                "bad parent database handle",
            ));
        }
        let handle = self.dbs.len() as DbHandle;
        self.dbs.push(MemDatabase {
            name: name.to_string(),
            mbr_name: mbr_name.to_string(),
            parent: Some(parent),
            schema_spec: String::new(),
            mode: Some(mode),
            metadata: BTreeMap::new(),
            metadata_attrs: BTreeMap::new(),
        });
        Ok(handle)
    }

    fn create_table(
        &mut self,
        db: DbHandle,
        mbr_name: &str,
        mode: CreateMode,
        name: &str,
    ) -> TsResult<TableHandle> {
        if db as usize >= self.dbs.len() {
            return Err(TsError::rc(
                RcObject::Database,
                RcState::NotFound,
                "bad database handle",
            ));
        }
        let handle = self.tables.len() as TableHandle;
        self.tables.push(MemTable {
            db,
            name: name.to_string(),
            mbr_name: mbr_name.to_string(),
            mode,
            columns: Vec::new(),
            reindexed: false,
            metadata: BTreeMap::new(),
            metadata_attrs: BTreeMap::new(),
        });
        Ok(handle)
    }

    fn db_metadata_value(&mut self, db: DbHandle, path: &str, value: &str) -> TsResult<()> {
        let db = self
            .dbs
            .get_mut(db as usize)
            .ok_or_else(|| TsError::rc(RcObject::Database, RcState::NotFound, "bad db handle"))?;
        db.metadata.insert(path.to_string(), value.to_string());
        Ok(())
    }

    fn db_metadata_attr(
        &mut self,
        db: DbHandle,
        path: &str,
        attr: &str,
        value: &str,
    ) -> TsResult<()> {
        let db = self
            .dbs
            .get_mut(db as usize)
            .ok_or_else(|| TsError::rc(RcObject::Database, RcState::NotFound, "bad db handle"))?;
        db.metadata_attrs
            .entry(path.to_string())
            .or_default()
            .insert(attr.to_string(), value.to_string());
        Ok(())
    }

    fn create_write_cursor(&mut self, table: TableHandle) -> TsResult<CursorHandle> {
        if table as usize >= self.tables.len() {
            return Err(TsError::rc(
                RcObject::Table,
                RcState::NotFound,
                "bad table handle",
            ));
        }
        let handle = self.cursors.len() as CursorHandle;
        self.cursors.push(MemCursor {
            table,
            open: false,
            row_open: false,
            committed: false,
            released: false,
            pending: Vec::new(),
        });
        Ok(handle)
    }

    fn reindex(&mut self, table: TableHandle) -> TsResult<()> {
        if self
            .cursors
            .iter()
            .any(|c| c.table == table && c.open && !c.committed)
        {
            return Err(TsError::rc(
                RcObject::Cursor,
                RcState::Invalid,
                "reindex with an uncommitted write cursor",
            ));
        }
        self.table(table)?.reindexed = true;
        Ok(())
    }

    fn table_metadata_value(
        &mut self,
        table: TableHandle,
        path: &str,
        value: &str,
    ) -> TsResult<()> {
        let table = self.table(table)?;
        table.metadata.insert(path.to_string(), value.to_string());
        Ok(())
    }

    fn table_metadata_attr(
        &mut self,
        table: TableHandle,
        path: &str,
        attr: &str,
        value: &str,
    ) -> TsResult<()> {
        let table = self.table(table)?;
        table
            .metadata_attrs
            .entry(path.to_string())
            .or_default()
            .insert(attr.to_string(), value.to_string());
        Ok(())
    }

    fn cursor_add_column(
        &mut self,
        cursor: CursorHandle,
        name: &str,
        elem_bits: u32,
    ) -> TsResult<u32> {
        let c = self.cursor(cursor)?;
        if c.open {
            return Err(TsError::rc(
                RcObject::Cursor,
                RcState::Invalid,
                "cannot add a column to an open cursor",
            ));
        }
        let table = c.table;
        self.cursor(cursor)?.pending.push(None);
        let table = self.table(table)?;
        let idx = table.columns.len() as u32;
        table.columns.push(MemColumn {
            name: name.to_string(),
            elem_bits,
            default: None,
            rows: Vec::new(),
            metadata: BTreeMap::new(),
            metadata_attrs: BTreeMap::new(),
        });
        Ok(idx)
    }

    fn cursor_open(&mut self, cursor: CursorHandle) -> TsResult<()> {
        self.cursor(cursor)?.open = true;
        Ok(())
    }

    fn cursor_open_row(&mut self, cursor: CursorHandle) -> TsResult<()> {
        let c = self.cursor(cursor)?;
        if !c.open {
            return Err(TsError::rc(
                RcObject::Cursor,
                RcState::NotOpen,
                "cursor is not open",
            ));
        }
        c.row_open = true;
        Ok(())
    }

    fn cursor_write(
        &mut self,
        cursor: CursorHandle,
        col_idx: u32,
        data: &[u8],
        _elem_count: u32,
    ) -> TsResult<()> {
        let c = self.cursor(cursor)?;
        if !c.row_open {
            return Err(TsError::rc(
                RcObject::Row,
                RcState::NotOpen,
                "no open row to write into",
            ));
        }
        let cell = c
            .pending
            .get_mut(col_idx as usize)
            .ok_or_else(|| TsError::rc(RcObject::Column, RcState::NotFound, "bad column index"))?;
        cell.get_or_insert_with(Vec::new).extend_from_slice(data);
        Ok(())
    }

    fn cursor_default(
        &mut self,
        cursor: CursorHandle,
        col_idx: u32,
        data: &[u8],
        _elem_count: u32,
    ) -> TsResult<()> {
        let c = self.cursor(cursor)?;
        let table = c.table;
        let table = self.table(table)?;
        let col = table
            .columns
            .get_mut(col_idx as usize)
            .ok_or_else(|| TsError::rc(RcObject::Column, RcState::NotFound, "bad column index"))?;
        col.default = Some(data.to_vec());
        Ok(())
    }

    fn cursor_commit_row(&mut self, cursor: CursorHandle) -> TsResult<()> {
        let c = self.cursor(cursor)?;
        if !c.row_open {
            return Err(TsError::rc(
                RcObject::Row,
                RcState::NotOpen,
                "no open row to commit",
            ));
        }
        let table = c.table;
        let pending: Vec<Option<Vec<u8>>> = c.pending.iter_mut().map(|p| p.take()).collect();
        let table = self.table(table)?;
        for (idx, cell) in pending.into_iter().enumerate() {
            let col = &mut table.columns[idx];
            let value = match cell {
                Some(v) => v,
                None => match &col.default {
                    Some(d) => d.clone(),
                    None => {
                        return Err(TsError::rc(
                            RcObject::Row,
                            RcState::Incomplete,
                            format!("column '{}' has no cell and no default", col.name),
                        ));
                    }
                },
            };
            col.rows.push(value);
        }
        Ok(())
    }

    fn cursor_close_row(&mut self, cursor: CursorHandle) -> TsResult<()> {
        let c = self.cursor(cursor)?;
        c.row_open = false;
        for p in c.pending.iter_mut() {
            *p = None;
        }
        Ok(())
    }

    fn cursor_commit(&mut self, cursor: CursorHandle) -> TsResult<()> {
        let c = self.cursor(cursor)?;
        if c.row_open {
            return Err(TsError::rc(
                RcObject::Cursor,
                RcState::Invalid,
                "commit with a row still open",
            ));
        }
        c.committed = true;
        Ok(())
    }

    fn cursor_release(&mut self, cursor: CursorHandle) -> TsResult<()> {
        let c = self.cursor(cursor)?;
        if c.released {
            return Err(TsError::rc(
                RcObject::Cursor,
                RcState::Invalid,
                "cursor released twice",
            ));
        }
        c.released = true;
        Ok(())
    }

    fn column_metadata(
        &mut self,
        table: TableHandle,
        column_name: &str,
        nodes: &MetadataNodes,
        attrs: &MetadataAttrs,
    ) -> TsResult<()> {
        let table = self.table(table)?;
        let col = table
            .columns
            .iter_mut()
            .find(|c| c.name == column_name)
            .ok_or_else(|| {
                TsError::rc(
                    RcObject::Column,
                    RcState::NotFound,
                    format!("no physical column '{}'", column_name),
                )
            })?;
        for (path, value) in nodes {
            col.metadata.insert(path.clone(), value.clone());
        }
        for (path, pairs) in attrs {
            let entry = col.metadata_attrs.entry(path.clone()).or_default();
            for (attr, value) in pairs {
                entry.insert(attr.clone(), value.clone());
            }
        }
        Ok(())
    }
}
