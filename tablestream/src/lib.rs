//! A one-way streaming protocol for describing the construction of a
//! columnar, versioned database as an ordered sequence of self-delimiting
//! binary events, and the loader that materializes such a stream into a
//! columnar store.
//!
//! Data flow: bytes -> [`decoder::StreamParser`] (uses [`codec`]) ->
//! [`loader::DatabaseLoader`] (uses a [`loader::Backend`]). The
//! [`writer::StreamWriter`] performs the mirror-image sequence on the
//! producer side.

pub mod codec;
pub mod decoder;
pub mod events;
pub mod loader;
pub mod writer;

pub use decoder::StreamParser;
pub use loader::{Backend, DatabaseLoader, MemoryBackend};
pub use writer::{Framing, MemorySink, StreamWriter};
