pub mod create_mode;
pub mod event;
pub mod event_header;
pub mod event_type;
pub mod stream_header;

pub use create_mode::{CreateDisposition, CreateMode, CreateOptions};
pub use event::Event;
pub use event_header::EventHeader;
pub use event_type::EventType;
pub use stream_header::StreamHeader;

/// Upper bound for long strings: remote path, schema file/spec, metadata
/// paths and values, error and log messages.
pub const STRING_LIMIT_16: usize = 0x10000;
/// Upper bound for names: tables, columns, database members, software
/// name/version, progress name.
pub const STRING_LIMIT_8: usize = 0x100;

/// Largest single packed data event payload (wide form).
pub const MAX_PACKED_CHUNK: usize = 0x10000;
/// Largest payload the narrow packed data form can carry.
pub const MAX_NARROW_CHUNK: usize = 0x100;

/// Element widths a column may declare, in bits.
pub const LEGAL_ELEM_BITS: [u32; 5] = [1, 8, 16, 32, 64];

/// Column flag bit 0: payload is compacted through the integer codec.
pub const COLUMN_FLAG_PACK_INTEGER: u8 = 0x01;
