//! # Typed readers and writers over byte transports
//!
//! This crate provides a small pull/push protocol for typed values, plus the
//! stages built on it: codec adapters to and from bytes, lazy combinators,
//! batching, pagination, timing instrumentation and a bounded worker pool.
//!
//! ## Core Concepts
//!
//! - **Reader**: pulls one value per call; `Ok(None)` is end-of-stream
//! - **Writer**: accepts one value per call
//! - **Codec adapters**: turn byte sources and sinks into readers and writers
//! - **Pipe**: drains a reader into a writer
//! - **WorkPool**: fans a channel out to concurrent workers and back in
//!
//! A missing reader (`None`) behaves as an empty stream, and a missing
//! writer fails every write with [`Error::ClosedPipe`].
//!
//! ## Example
//!
//! ```rust
//! use seqio::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let token = CancellationToken::new();
//!     let reader = VecReader::new((1..=10).collect::<Vec<i64>>())
//!         .filter(|x| x % 2 == 0)
//!         .map(|x| x * x);
//!     let sink = CollectWriter::new();
//!
//!     let moved = Pipe::new(reader, sink.clone()).run(&token).await?;
//!     assert_eq!(moved, 5);
//!     assert_eq!(sink.into_items().await, vec![4, 16, 36, 64, 100]);
//!     Ok(())
//! }
//! ```

pub mod batch;
pub mod channel;
pub mod codec;
pub mod combinators;
pub mod core;
pub mod page;
pub mod pipe;
pub mod pool;
pub mod readers;
pub mod timing;
pub mod util;
pub mod writers;

// Re-export commonly used items
pub mod prelude {
    pub use crate::batch::{
        BatchedReader, BatchedWriter, ChunkedReader, ChunkedWriter, FlushPolicy, UnchunkedReader,
        UnchunkedWriter,
    };
    pub use crate::channel::{from_iter, into_stream, spawn_reader, ChannelConfig};
    pub use crate::codec::{
        BinaryCodec, DecodeReader, DecodeSink, DecodeWriter, EncodeReader, EncodeWriter,
        FramedDuplex, JsonLinesCodec,
    };
    pub use crate::combinators::{reduce, Filter, FilterWriter, Map, MapWriter};
    pub use crate::core::{
        ChunkWriterExt, Error, Reader, ReaderExt, Result, Writer, WriterExt,
    };
    pub use crate::page::{Page, PageReader};
    pub use crate::pipe::{Pipe, PipeConfig};
    pub use crate::pool::{WorkPool, WorkPoolConfig};
    pub use crate::readers::{CancelReader, ChannelReader, IterReader, Queue, VecReader};
    pub use crate::timing::{ReadStat, StatsReader};
    pub use crate::util::{from_fn, read_all, write_all, writer_from_fn};
    pub use crate::writers::{ChannelWriter, CollectWriter, CountWriter, DiscardWriter};
    pub use tokio_util::sync::CancellationToken;
}

// Re-export main error type
pub use crate::core::{Error, Result};

// Feature flags for optional dependencies
#[cfg(feature = "metrics")]
pub mod metrics;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
