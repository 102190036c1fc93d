pub mod reader;
pub mod stream_parser;

pub use reader::ByteReader;
pub use stream_parser::StreamParser;
