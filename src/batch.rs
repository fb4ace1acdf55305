//! Count-based batching on both sides of the protocol.
//!
//! Two families live here and are easy to confuse:
//!
//! - **Value batching** (`BatchedReader`, `BatchedWriter`): items stay single
//!   but move across the boundary `size` at a time.
//! - **Collection batching** (`ChunkedReader`, `ChunkedWriter`): items are
//!   grouped into `Vec`s of up to `size`. `UnchunkedReader` and
//!   `UnchunkedWriter` split them back into singles.
//!
//! # Partial batches
//!
//! `ChunkedReader` always emits a short final chunk. The writers only flush
//! at the size threshold, and with the default [`FlushPolicy::DropPartial`]
//! **a trailing partial batch is discarded on close**. Use
//! [`FlushPolicy::FlushOnClose`] when every item must arrive.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::core::{Error, Reader, Result, Writer};

/// What a batching writer does with buffered items when it is closed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushPolicy {
    /// Discard the partial batch (data loss, kept for compatibility)
    #[default]
    DropPartial,
    /// Forward the partial batch before closing the inner writer
    FlushOnClose,
}

fn check_size(size: usize) -> Result<()> {
    if size == 0 {
        return Err(Error::config("batch size must be non-zero"));
    }
    Ok(())
}

/// Reader that pulls `size` upstream results at once and replays them singly.
///
/// Filling stops early once upstream ends or fails; the terminal result is
/// replayed in its position and nothing is pulled afterwards.
pub struct BatchedReader<R: Reader> {
    reader: R,
    size: usize,
    buffer: VecDeque<Result<Option<R::Item>>>,
    exhausted: bool,
}

impl<R: Reader> BatchedReader<R> {
    /// Create a new batched reader
    pub fn new(reader: R, size: usize) -> Self {
        Self {
            reader,
            size,
            buffer: VecDeque::with_capacity(size),
            exhausted: false,
        }
    }

    /// Number of results fetched but not yet replayed
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

#[async_trait]
impl<R: Reader + Send> Reader for BatchedReader<R> {
    type Item = R::Item;

    async fn read(&mut self, token: &CancellationToken) -> Result<Option<Self::Item>> {
        check_size(self.size)?;

        if self.buffer.is_empty() && !self.exhausted {
            for _ in 0..self.size {
                let result = self.reader.read(token).await;
                let terminal = !matches!(result, Ok(Some(_)));
                self.buffer.push_back(result);
                if terminal {
                    self.exhausted = true;
                    break;
                }
            }
        }

        self.buffer.pop_front().unwrap_or(Ok(None))
    }

    async fn close(&mut self) -> Result<()> {
        self.buffer.clear();
        self.reader.close().await
    }
}

/// Writer that buffers `size` items and then forwards them one by one.
///
/// See the module docs for what happens to a partial batch on close.
pub struct BatchedWriter<W: Writer> {
    writer: W,
    size: usize,
    buffer: VecDeque<W::Item>,
    policy: FlushPolicy,
    closed: bool,
}

impl<W: Writer> BatchedWriter<W> {
    /// Create a new batched writer with [`FlushPolicy::DropPartial`]
    pub fn new(writer: W, size: usize) -> Self {
        Self {
            writer,
            size,
            buffer: VecDeque::with_capacity(size),
            policy: FlushPolicy::default(),
            closed: false,
        }
    }

    /// Set what happens to a partial batch on close
    pub fn flush_policy(mut self, policy: FlushPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Number of items waiting for the threshold
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

impl<W: Writer + Send> BatchedWriter<W> {
    async fn flush(&mut self, token: &CancellationToken) -> Result<()> {
        while let Some(item) = self.buffer.pop_front() {
            self.writer.write(token, item).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl<W: Writer + Send> Writer for BatchedWriter<W> {
    type Item = W::Item;

    async fn write(&mut self, token: &CancellationToken, item: Self::Item) -> Result<()> {
        if self.closed {
            return Err(Error::Closed);
        }
        check_size(self.size)?;

        self.buffer.push_back(item);
        if self.buffer.len() >= self.size {
            self.flush(token).await?;
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        match self.policy {
            FlushPolicy::FlushOnClose => {
                debug!(items = self.buffer.len(), "flushing partial batch on close");
                self.flush(&CancellationToken::new()).await?;
            }
            FlushPolicy::DropPartial if !self.buffer.is_empty() => {
                warn!(items = self.buffer.len(), "dropping partial batch on close");
                self.buffer.clear();
            }
            FlushPolicy::DropPartial => {}
        }
        self.writer.close().await
    }
}

/// Reader that groups up to `size` consecutive items into one `Vec`.
///
/// The final chunk may be shorter; an empty chunk is never emitted. If
/// upstream fails mid-chunk, the items gathered so far are emitted first and
/// the error is returned on the following read.
pub struct ChunkedReader<R> {
    reader: R,
    size: usize,
    pending_error: Option<Error>,
    exhausted: bool,
}

impl<R> ChunkedReader<R> {
    /// Create a new chunked reader
    pub fn new(reader: R, size: usize) -> Self {
        Self {
            reader,
            size,
            pending_error: None,
            exhausted: false,
        }
    }
}

#[async_trait]
impl<R: Reader + Send> Reader for ChunkedReader<R> {
    type Item = Vec<R::Item>;

    async fn read(&mut self, token: &CancellationToken) -> Result<Option<Self::Item>> {
        if let Some(err) = self.pending_error.take() {
            return Err(err);
        }
        if self.exhausted {
            return Ok(None);
        }
        check_size(self.size)?;

        let mut chunk = Vec::with_capacity(self.size);
        while chunk.len() < self.size {
            match self.reader.read(token).await {
                Ok(Some(item)) => chunk.push(item),
                Ok(None) => {
                    self.exhausted = true;
                    break;
                }
                Err(err) => {
                    self.exhausted = true;
                    if chunk.is_empty() {
                        return Err(err);
                    }
                    self.pending_error = Some(err);
                    break;
                }
            }
        }

        if chunk.is_empty() {
            Ok(None)
        } else {
            Ok(Some(chunk))
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.reader.close().await
    }
}

/// Writer that gathers single items and forwards them as `Vec`s of `size`.
///
/// See the module docs for what happens to a partial batch on close.
pub struct ChunkedWriter<W, T> {
    writer: W,
    size: usize,
    buffer: Vec<T>,
    policy: FlushPolicy,
    closed: bool,
}

impl<W, T> ChunkedWriter<W, T>
where
    W: Writer<Item = Vec<T>>,
    T: Send + 'static,
{
    /// Create a new chunked writer with [`FlushPolicy::DropPartial`]
    pub fn new(writer: W, size: usize) -> Self {
        Self {
            writer,
            size,
            buffer: Vec::with_capacity(size),
            policy: FlushPolicy::default(),
            closed: false,
        }
    }

    /// Set what happens to a partial batch on close
    pub fn flush_policy(mut self, policy: FlushPolicy) -> Self {
        self.policy = policy;
        self
    }

    fn take_batch(&mut self) -> Vec<T> {
        std::mem::replace(&mut self.buffer, Vec::with_capacity(self.size))
    }
}

#[async_trait]
impl<W, T> Writer for ChunkedWriter<W, T>
where
    W: Writer<Item = Vec<T>> + Send,
    T: Send + 'static,
{
    type Item = T;

    async fn write(&mut self, token: &CancellationToken, item: Self::Item) -> Result<()> {
        if self.closed {
            return Err(Error::Closed);
        }
        check_size(self.size)?;

        self.buffer.push(item);
        if self.buffer.len() >= self.size {
            let batch = self.take_batch();
            self.writer.write(token, batch).await?;
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        if !self.buffer.is_empty() {
            match self.policy {
                FlushPolicy::FlushOnClose => {
                    let batch = self.take_batch();
                    self.writer.write(&CancellationToken::new(), batch).await?;
                }
                FlushPolicy::DropPartial => {
                    warn!(items = self.buffer.len(), "dropping partial chunk on close");
                    self.buffer.clear();
                }
            }
        }
        self.writer.close().await
    }
}

/// Reader that flattens upstream `Vec`s back into single items
pub struct UnchunkedReader<R, T> {
    reader: R,
    current: std::vec::IntoIter<T>,
}

impl<R, T> UnchunkedReader<R, T>
where
    R: Reader<Item = Vec<T>>,
{
    /// Create a new unchunking reader
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            current: Vec::new().into_iter(),
        }
    }
}

#[async_trait]
impl<R, T> Reader for UnchunkedReader<R, T>
where
    R: Reader<Item = Vec<T>> + Send,
    T: Send + 'static,
{
    type Item = T;

    async fn read(&mut self, token: &CancellationToken) -> Result<Option<Self::Item>> {
        loop {
            if let Some(item) = self.current.next() {
                return Ok(Some(item));
            }
            match self.reader.read(token).await? {
                Some(chunk) => self.current = chunk.into_iter(),
                None => return Ok(None),
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.reader.close().await
    }
}

/// Writer that accepts `Vec`s and writes their items one at a time
pub struct UnchunkedWriter<W> {
    writer: W,
}

impl<W> UnchunkedWriter<W> {
    /// Create a new unchunking writer
    pub fn new(writer: W) -> Self {
        Self { writer }
    }
}

#[async_trait]
impl<W: Writer + Send> Writer for UnchunkedWriter<W> {
    type Item = Vec<W::Item>;

    async fn write(&mut self, token: &CancellationToken, items: Self::Item) -> Result<()> {
        for item in items {
            self.writer.write(token, item).await?;
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.writer.close().await
    }
}
