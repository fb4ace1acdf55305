//! Core traits for the reader/writer system.
//!
//! A [`Reader`] is pulled one item at a time and reports clean termination as
//! `Ok(None)`. A [`Writer`] is pushed one item at a time. Every other stage in
//! the crate wraps one of these two traits in another implementation of the
//! same trait, so stages compose freely.
//!
//! Termination is monotonic: once a reader returns `Ok(None)`, every later
//! call returns `Ok(None)` as well. An `Err` means the stream is faulted and
//! the caller must stop pulling.

use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::batch::{BatchedReader, BatchedWriter, ChunkedReader, ChunkedWriter, FlushPolicy};
use crate::combinators::{Filter, FilterWriter, Map, MapWriter};
use crate::core::error::Result;
use crate::page::PageReader;
use crate::readers::CancelReader;
use crate::timing::{
    JitterReader, JitterWriter, PacedReader, PacedWriter, ReadStat, SleepReader, SleepWriter,
    StatsReader,
};

/// A reader yields items on demand.
///
/// Readers are pull-based: nothing happens upstream until `read` is called.
/// The cancellation token is advisory for plain readers; stages that block on
/// channels or timers observe it.
///
/// # Examples
///
/// ```rust
/// use async_trait::async_trait;
/// use seqio::core::{Reader, Result};
/// use tokio_util::sync::CancellationToken;
///
/// struct CounterReader {
///     current: u64,
///     max: u64,
/// }
///
/// #[async_trait]
/// impl Reader for CounterReader {
///     type Item = u64;
///
///     async fn read(&mut self, _token: &CancellationToken) -> Result<Option<Self::Item>> {
///         if self.current < self.max {
///             self.current += 1;
///             Ok(Some(self.current))
///         } else {
///             Ok(None) // Signal end-of-stream
///         }
///     }
/// }
/// ```
#[async_trait]
pub trait Reader {
    /// The type of items this reader yields
    type Item: Send + 'static;

    /// Read the next item, `Ok(None)` at end-of-stream.
    async fn read(&mut self, token: &CancellationToken) -> Result<Option<Self::Item>>;

    /// Release whatever the reader holds.
    ///
    /// Readers over a closable transport forward this exactly once.
    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// A writer accepts items one at a time.
///
/// Once a writer returns a fatal error such as [`Error::Closed`], every later
/// write keeps failing.
///
/// [`Error::Closed`]: crate::core::Error::Closed
///
/// # Examples
///
/// ```rust
/// use async_trait::async_trait;
/// use seqio::core::{Result, Writer};
/// use tokio_util::sync::CancellationToken;
///
/// struct LogWriter;
///
/// #[async_trait]
/// impl Writer for LogWriter {
///     type Item = String;
///
///     async fn write(&mut self, _token: &CancellationToken, item: Self::Item) -> Result<()> {
///         println!("Logged: {}", item);
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Writer {
    /// The type of items this writer accepts
    type Item: Send + 'static;

    /// Write a single item.
    async fn write(&mut self, token: &CancellationToken, item: Self::Item) -> Result<()>;

    /// Flush buffered state and release the underlying sink.
    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

// An absent reader is an empty stream.
#[async_trait]
impl<R: Reader + Send> Reader for Option<R> {
    type Item = R::Item;

    async fn read(&mut self, token: &CancellationToken) -> Result<Option<Self::Item>> {
        match self {
            Some(reader) => reader.read(token).await,
            None => Ok(None),
        }
    }

    async fn close(&mut self) -> Result<()> {
        match self {
            Some(reader) => reader.close().await,
            None => Ok(()),
        }
    }
}

// An absent writer must never swallow items.
#[async_trait]
impl<W: Writer + Send> Writer for Option<W> {
    type Item = W::Item;

    async fn write(&mut self, token: &CancellationToken, item: Self::Item) -> Result<()> {
        match self {
            Some(writer) => writer.write(token, item).await,
            None => Err(crate::core::Error::ClosedPipe),
        }
    }

    async fn close(&mut self) -> Result<()> {
        match self {
            Some(writer) => writer.close().await,
            None => Ok(()),
        }
    }
}

#[async_trait]
impl<R: Reader + Send + ?Sized> Reader for Box<R> {
    type Item = R::Item;

    async fn read(&mut self, token: &CancellationToken) -> Result<Option<Self::Item>> {
        (**self).read(token).await
    }

    async fn close(&mut self) -> Result<()> {
        (**self).close().await
    }
}

#[async_trait]
impl<W: Writer + Send + ?Sized> Writer for Box<W> {
    type Item = W::Item;

    async fn write(&mut self, token: &CancellationToken, item: Self::Item) -> Result<()> {
        (**self).write(token, item).await
    }

    async fn close(&mut self) -> Result<()> {
        (**self).close().await
    }
}

#[async_trait]
impl<R: Reader + Send + ?Sized> Reader for &mut R {
    type Item = R::Item;

    async fn read(&mut self, token: &CancellationToken) -> Result<Option<Self::Item>> {
        (**self).read(token).await
    }

    async fn close(&mut self) -> Result<()> {
        (**self).close().await
    }
}

#[async_trait]
impl<W: Writer + Send + ?Sized> Writer for &mut W {
    type Item = W::Item;

    async fn write(&mut self, token: &CancellationToken, item: Self::Item) -> Result<()> {
        (**self).write(token, item).await
    }

    async fn close(&mut self) -> Result<()> {
        (**self).close().await
    }
}

/// Extension trait for readers that provides combinator methods
pub trait ReaderExt: Reader {
    /// Keep only items matching the predicate
    fn filter<F>(self, predicate: F) -> Filter<Self, F>
    where
        Self: Sized,
        F: FnMut(&Self::Item) -> bool + Send,
    {
        Filter::new(self, predicate)
    }

    /// Map items through a function
    fn map<F, U>(self, f: F) -> Map<Self, F>
    where
        Self: Sized,
        F: FnMut(Self::Item) -> U + Send,
        U: Send + 'static,
    {
        Map::new(self, f)
    }

    /// Pull `size` items at a time from upstream and replay them singly
    fn batched(self, size: usize) -> BatchedReader<Self>
    where
        Self: Sized,
    {
        BatchedReader::new(self, size)
    }

    /// Group up to `size` consecutive items into one `Vec`
    fn chunked(self, size: usize) -> ChunkedReader<Self>
    where
        Self: Sized,
    {
        ChunkedReader::new(self, size)
    }

    /// Turn a stream of counts into page descriptors of at most `limit`
    fn pages(self, limit: usize) -> PageReader<Self>
    where
        Self: Reader<Item = usize> + Sized,
    {
        PageReader::new(self, limit)
    }

    /// Report a [`ReadStat`] for every read to a side writer
    fn stats<W>(self, tag: impl Into<String>, stats: W) -> StatsReader<Self, W>
    where
        Self: Sized,
        Self::Item: Clone,
        W: Writer<Item = ReadStat<Self::Item>>,
    {
        StatsReader::new(self, tag, stats)
    }

    /// Sleep for `delay` before every read
    fn sleep_before(self, delay: Duration) -> SleepReader<Self>
    where
        Self: Sized,
    {
        SleepReader::new(self, delay)
    }

    /// Stretch every successful read to take at least `period`
    fn paced(self, period: Duration) -> PacedReader<Self>
    where
        Self: Sized,
    {
        PacedReader::new(self, period)
    }

    /// Sleep a uniformly random duration in `[min, max)` before every read
    fn jitter(self, min: Duration, max: Duration) -> JitterReader<Self>
    where
        Self: Sized,
    {
        JitterReader::new(self, min, max)
    }

    /// Fail with `Error::Cancelled` once the token passed to `read` fires
    fn cancellable(self) -> CancelReader<Self>
    where
        Self: Sized,
    {
        CancelReader::new(self)
    }
}

impl<R: Reader> ReaderExt for R {}

/// Extension trait for writers
pub trait WriterExt: Writer {
    /// Drop items that fail the predicate before they reach this writer
    fn filter<F>(self, predicate: F) -> FilterWriter<Self, F>
    where
        Self: Sized,
        F: FnMut(&Self::Item) -> bool + Send,
    {
        FilterWriter::new(self, predicate)
    }

    /// Create a writer that applies a function to each item before writing
    fn contramap<F, T>(self, f: F) -> MapWriter<Self, F, T>
    where
        Self: Sized,
        F: FnMut(T) -> Self::Item + Send,
        T: Send + 'static,
    {
        MapWriter::new(self, f)
    }

    /// Buffer `size` items and forward them one by one
    fn batched(self, size: usize, policy: FlushPolicy) -> BatchedWriter<Self>
    where
        Self: Sized,
    {
        BatchedWriter::new(self, size).flush_policy(policy)
    }

    /// Sleep for `delay` before every write
    fn sleep_before(self, delay: Duration) -> SleepWriter<Self>
    where
        Self: Sized,
    {
        SleepWriter::new(self, delay)
    }

    /// Space writes at least `period` apart
    fn paced(self, period: Duration) -> PacedWriter<Self>
    where
        Self: Sized,
    {
        PacedWriter::new(self, period)
    }

    /// Sleep a uniformly random duration in `[min, max)` before every write
    fn jitter(self, min: Duration, max: Duration) -> JitterWriter<Self>
    where
        Self: Sized,
    {
        JitterWriter::new(self, min, max)
    }
}

impl<W: Writer> WriterExt for W {}

/// Extension for writers that take whole collections.
pub trait ChunkWriterExt<T: Send + 'static>: Writer<Item = Vec<T>> {
    /// Accept single items and forward them as `Vec`s of `size`
    fn chunked(self, size: usize, policy: FlushPolicy) -> ChunkedWriter<Self, T>
    where
        Self: Sized,
    {
        ChunkedWriter::new(self, size).flush_policy(policy)
    }
}

impl<T: Send + 'static, W: Writer<Item = Vec<T>>> ChunkWriterExt<T> for W {}
