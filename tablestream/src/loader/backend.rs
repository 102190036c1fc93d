use std::collections::BTreeMap;

use common::TsResult;

use crate::events::CreateMode;

/// Opaque backend object handles. The loader never sees concrete storage
/// types; all cross-references are integers.
pub type DbHandle = u32;
pub type TableHandle = u32;
pub type CursorHandle = u32;

/// Buffered column metadata, flushed in one pass at end-of-stream.
pub type MetadataNodes = BTreeMap<String, String>;
pub type MetadataAttrs = BTreeMap<String, BTreeMap<String, String>>;

/// The narrow interface the loader drives the physical columnar store
/// through: a schema-aware manager, databases, tables, write cursors and
/// metadata trees. Every call returns its first error; the loader
/// propagates it upstream unchanged.
pub trait Backend {
    ////////////////////////////////////////////////////////////////////
    // manager
    ////////////////////////////////////////////////////////////////////

    fn add_schema_include_path(&mut self, path: &str) -> TsResult<()>;

    fn parse_schema_file(&mut self, path: &str) -> TsResult<()>;

    /// Creates the root database using the recorded schema spec.
    fn create_db(&mut self, schema_spec: &str, name: &str) -> TsResult<DbHandle>;

    /// Removes a partially created database after a fatal error.
    fn remove_db(&mut self, name: &str) -> TsResult<()>;

    ////////////////////////////////////////////////////////////////////
    // database
    ////////////////////////////////////////////////////////////////////

    fn create_sub_db(
        &mut self,
        parent: DbHandle,
        mbr_name: &str,
        mode: CreateMode,
        name: &str,
    ) -> TsResult<DbHandle>;

    fn create_table(
        &mut self,
        db: DbHandle,
        mbr_name: &str,
        mode: CreateMode,
        name: &str,
    ) -> TsResult<TableHandle>;

    fn db_metadata_value(&mut self, db: DbHandle, path: &str, value: &str) -> TsResult<()>;

    fn db_metadata_attr(
        &mut self,
        db: DbHandle,
        path: &str,
        attr: &str,
        value: &str,
    ) -> TsResult<()>;

    ////////////////////////////////////////////////////////////////////
    // table
    ////////////////////////////////////////////////////////////////////

    fn create_write_cursor(&mut self, table: TableHandle) -> TsResult<CursorHandle>;

    fn reindex(&mut self, table: TableHandle) -> TsResult<()>;

    fn table_metadata_value(&mut self, table: TableHandle, path: &str, value: &str)
        -> TsResult<()>;

    fn table_metadata_attr(
        &mut self,
        table: TableHandle,
        path: &str,
        attr: &str,
        value: &str,
    ) -> TsResult<()>;

    ////////////////////////////////////////////////////////////////////
    // cursor
    ////////////////////////////////////////////////////////////////////

    /// Declares a column on an unopened cursor; returns the cursor-local
    /// column index used by write/default.
    fn cursor_add_column(
        &mut self,
        cursor: CursorHandle,
        name: &str,
        elem_bits: u32,
    ) -> TsResult<u32>;

    fn cursor_open(&mut self, cursor: CursorHandle) -> TsResult<()>;

    fn cursor_open_row(&mut self, cursor: CursorHandle) -> TsResult<()>;

    /// Appends a chunk of cell payload to the open row.
    fn cursor_write(
        &mut self,
        cursor: CursorHandle,
        col_idx: u32,
        data: &[u8],
        elem_count: u32,
    ) -> TsResult<()>;

    /// Sets the column default substituted into rows without an explicit
    /// cell.
    fn cursor_default(
        &mut self,
        cursor: CursorHandle,
        col_idx: u32,
        data: &[u8],
        elem_count: u32,
    ) -> TsResult<()>;

    fn cursor_commit_row(&mut self, cursor: CursorHandle) -> TsResult<()>;

    fn cursor_close_row(&mut self, cursor: CursorHandle) -> TsResult<()>;

    /// Commits everything written through the cursor to the table.
    fn cursor_commit(&mut self, cursor: CursorHandle) -> TsResult<()>;

    fn cursor_release(&mut self, cursor: CursorHandle) -> TsResult<()>;

    ////////////////////////////////////////////////////////////////////
    // column metadata
    ////////////////////////////////////////////////////////////////////

    /// Attaches buffered metadata to a physical column, opening it once.
    fn column_metadata(
        &mut self,
        table: TableHandle,
        column_name: &str,
        nodes: &MetadataNodes,
        attrs: &MetadataAttrs,
    ) -> TsResult<()>;
}
