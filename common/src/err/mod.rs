use crate::err::stream_error::TsError;

pub mod stream_error;

pub type TsResult<T> = Result<T, TsError>;
