pub mod sink;
pub mod stream_writer;

pub use sink::{BufferedSink, ByteSink, MemorySink};
pub use stream_writer::{Framing, StreamWriter};
