use crate::events::create_mode::CreateMode;

/// A fully decoded protocol event, independent of the framing it arrived
/// in. The narrow/wide packed variants of an event family collapse into
/// one variant here; only the length-field width differs on the wire.
#[derive(Debug, PartialEq, Clone)]
pub enum Event {
    UseSchema {
        schema_file: String,
        schema_spec: String,
    },
    RemotePath {
        path: String,
    },
    SoftwareName {
        name: String,
        version: String,
    },
    NewTable {
        id: u32,
        name: String,
    },
    NewColumn {
        id: u32,
        table_id: u32,
        elem_bits: u32,
        flag_bits: u8,
        name: String,
    },
    AddMbrDb {
        id: u32,
        parent_id: u32,
        mbr_name: String,
        db_name: String,
        mode: CreateMode,
    },
    AddMbrTbl {
        id: u32,
        db_id: u32,
        mbr_name: String,
        tbl_name: String,
        mode: CreateMode,
    },
    OpenStream,
    /// One chunk of cell payload for the open row. A single logical cell
    /// may span several of these; the loader concatenates.
    CellData {
        column_id: u32,
        elem_count: u32,
        data: Vec<u8>,
    },
    CellDefault {
        column_id: u32,
        elem_count: u32,
        data: Vec<u8>,
    },
    EmptyDefault {
        column_id: u32,
    },
    NextRow {
        table_id: u32,
    },
    MoveAhead {
        table_id: u32,
        nrows: u64,
    },
    DbMetadataNode {
        id: u32,
        path: String,
        value: String,
    },
    TblMetadataNode {
        id: u32,
        path: String,
        value: String,
    },
    ColMetadataNode {
        id: u32,
        path: String,
        value: String,
    },
    DbMetadataNodeAttr {
        id: u32,
        path: String,
        attr: String,
        value: String,
    },
    TblMetadataNodeAttr {
        id: u32,
        path: String,
        attr: String,
        value: String,
    },
    ColMetadataNodeAttr {
        id: u32,
        path: String,
        attr: String,
        value: String,
    },
    ErrMsg {
        msg: String,
    },
    LogMsg {
        msg: String,
    },
    ProgMsg {
        name: String,
        pid: u32,
        timestamp: u32,
        version: u32,
        percent: u8,
    },
    EndStream,
}

impl Event {
    /// Human-readable event name for logs and error lines.
    pub fn name(&self) -> &'static str {
        match self {
            Event::UseSchema { .. } => "use-schema",
            Event::RemotePath { .. } => "remote-path",
            Event::SoftwareName { .. } => "software-name",
            Event::NewTable { .. } => "new-table",
            Event::NewColumn { .. } => "new-column",
            Event::AddMbrDb { .. } => "add-mbr-db",
            Event::AddMbrTbl { .. } => "add-mbr-tbl",
            Event::OpenStream => "open-stream",
            Event::CellData { .. } => "cell-data",
            Event::CellDefault { .. } => "cell-default",
            Event::EmptyDefault { .. } => "empty-default",
            Event::NextRow { .. } => "next-row",
            Event::MoveAhead { .. } => "move-ahead",
            Event::DbMetadataNode { .. } => "db-metadata-node",
            Event::TblMetadataNode { .. } => "tbl-metadata-node",
            Event::ColMetadataNode { .. } => "col-metadata-node",
            Event::DbMetadataNodeAttr { .. } => "db-metadata-node-attr",
            Event::TblMetadataNodeAttr { .. } => "tbl-metadata-node-attr",
            Event::ColMetadataNodeAttr { .. } => "col-metadata-node-attr",
            Event::ErrMsg { .. } => "error-message",
            Event::LogMsg { .. } => "log-message",
            Event::ProgMsg { .. } => "progress-message",
            Event::EndStream => "end-stream",
        }
    }
}
