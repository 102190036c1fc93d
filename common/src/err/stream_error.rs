use std::fmt::{self, Display};
use std::io;
use std::str::Utf8Error;
use std::string::FromUtf8Error;

use thiserror::Error;

/// The object a protocol or loader failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RcObject {
    Header,
    Format,
    Transfer,
    Data,
    Schema,
    Database,
    Table,
    Column,
    Row,
    Cursor,
    Message,
    Error,
}

/// What went wrong with the object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RcState {
    Corrupt,
    Invalid,
    Unsupported,
    BadVersion,
    Incomplete,
    Canceled,
    Unexpected,
    Exists,
    NotFound,
    NotOpen,
    Exhausted,
}

impl Display for RcObject {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            RcObject::Header => "header",
            RcObject::Format => "format",
            RcObject::Transfer => "transfer",
            RcObject::Data => "data",
            RcObject::Schema => "schema",
            RcObject::Database => "database",
            RcObject::Table => "table",
            RcObject::Column => "column",
            RcObject::Row => "row",
            RcObject::Cursor => "cursor",
            RcObject::Message => "message",
            RcObject::Error => "error",
        };
        write!(f, "{}", s)
    }
}

impl Display for RcState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            RcState::Corrupt => "corrupt",
            RcState::Invalid => "invalid",
            RcState::Unsupported => "unsupported",
            RcState::BadVersion => "bad-version",
            RcState::Incomplete => "incomplete",
            RcState::Canceled => "canceled",
            RcState::Unexpected => "unexpected",
            RcState::Exists => "exists",
            RcState::NotFound => "not-found",
            RcState::NotOpen => "not-open",
            RcState::Exhausted => "exhausted",
        };
        write!(f, "{}", s)
    }
}

/// Contains information on needed data if a reader returned `Incomplete`.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Needed {
    /// Needs more data, but we do not know how much
    Unknown,

    /// The input ended inside a fixed-size read
    NoEnoughData,

    InvalidUtf8,

    InvalidData(String),
}

impl Display for Needed {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Needed::Unknown => write!(f, "Unknown"),
            Needed::NoEnoughData => write!(f, "NoEnoughData"),
            Needed::InvalidUtf8 => write!(f, "InvalidUtf8"),
            Needed::InvalidData(s) => write!(f, "{}", s),
        }
    }
}

/// Workspace-wide error type.
///
/// Protocol and loader failures carry an `(object, state)` pair, rendered
/// as `object/state` (e.g. `table/exists`, `row/incomplete`); everything
/// the stream layer cannot classify further arrives as `Incomplete` or an
/// IO error.
#[derive(Debug, Error)]
pub enum TsError {
    /// 一定不会出现的异常。如果出现，一定是BUG
    #[error("BUG: {0}")]
    Bug(String),

    /// Byte stream ended or stalled mid-event
    #[error("transfer/incomplete: {0}")]
    Incomplete(Needed),

    /// Classified protocol / loader failure
    #[error("{obj}/{state}: {msg}")]
    Rc {
        obj: RcObject,
        state: RcState,
        msg: String,
    },

    #[error("{0}")]
    IoError(#[from] io::Error),

    #[error("{0}")]
    Utf8Error(#[from] Utf8Error),

    #[error("{0}")]
    FromUtf8Error(#[from] FromUtf8Error),

    #[error("{0}")]
    String(String),
}

impl TsError {
    /// Shorthand for the `(object, state)` failure form.
    pub fn rc(obj: RcObject, state: RcState, msg: impl Into<String>) -> Self {
        TsError::Rc {
            obj,
            state,
            msg: msg.into(),
        }
    }

    pub fn is_rc(&self, obj: RcObject, state: RcState) -> bool {
        matches!(self, TsError::Rc { obj: o, state: s, .. } if *o == obj && *s == state)
    }

    /// Premature end of input, the catch-all transfer failure.
    pub fn incomplete() -> Self {
        TsError::Incomplete(Needed::NoEnoughData)
    }

    pub fn is_incomplete(&self) -> bool {
        match self {
            TsError::Incomplete(_) => true,
            TsError::IoError(e) => e.kind() == io::ErrorKind::UnexpectedEof,
            _ => false,
        }
    }
}
