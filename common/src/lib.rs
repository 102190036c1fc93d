pub mod err;
pub mod log;

pub use err::stream_error::{Needed, RcObject, RcState, TsError};
pub use err::TsResult;
