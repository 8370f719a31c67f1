//! Tag-reading capability: the trait every tag source implements plus the
//! concrete sources the agent ships with.

pub mod readers;

pub use readers::{ChannelReader, LineReader, LineSource, ReaderError, ReaderGuard, TagReader};
pub use shared::events::{ReaderEvent, TagEvent};
