//! Reader implementations for the seqio library.
//!
//! These are the leaves of a pull chain: in-memory values, arbitrary
//! iterators (and therefore any container), and the receiving end of a
//! channel.

use async_trait::async_trait;
use std::collections::VecDeque;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::{Error, Reader, Result, Writer};

/// A reader that yields items from a vector, front to back
pub struct VecReader<T> {
    items: VecDeque<T>,
}

impl<T> VecReader<T> {
    /// Create a new vector reader
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items: items.into(),
        }
    }

    /// Get the number of remaining items
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Check if the reader has more items
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[async_trait]
impl<T: Send + 'static> Reader for VecReader<T> {
    type Item = T;

    async fn read(&mut self, _token: &CancellationToken) -> Result<Option<Self::Item>> {
        Ok(self.items.pop_front())
    }
}

/// A reader over any iterator.
///
/// This is how ordered sequences, maps and linked lists enter a pull chain:
/// `IterReader::new(map)` yields `(key, value)` pairs in the map's own
/// iteration order.
pub struct IterReader<I> {
    iter: Option<I>,
}

impl<I: Iterator> IterReader<I> {
    /// Create a new iterator reader
    pub fn new<C: IntoIterator<IntoIter = I>>(items: C) -> Self {
        Self {
            iter: Some(items.into_iter()),
        }
    }
}

#[async_trait]
impl<I> Reader for IterReader<I>
where
    I: Iterator + Send,
    I::Item: Send + 'static,
{
    type Item = I::Item;

    async fn read(&mut self, _token: &CancellationToken) -> Result<Option<Self::Item>> {
        // Drop the iterator on exhaustion so a non-fused one cannot restart.
        let next = self.iter.as_mut().and_then(Iterator::next);
        if next.is_none() {
            self.iter = None;
        }
        Ok(next)
    }
}

/// A first-in first-out buffer that is both a reader and a writer.
///
/// Reading an empty queue is end-of-stream, but unlike other readers a queue
/// resumes yielding once more items are written to it.
#[derive(Debug)]
pub struct Queue<T> {
    items: VecDeque<T>,
}

impl<T> Queue<T> {
    /// Create an empty queue
    pub fn new() -> Self {
        Self {
            items: VecDeque::new(),
        }
    }

    /// Create a queue holding `items`
    pub fn with_items(items: Vec<T>) -> Self {
        Self {
            items: items.into(),
        }
    }

    /// Number of buffered items
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether nothing is buffered
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<T> Default for Queue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Send + 'static> Reader for Queue<T> {
    type Item = T;

    async fn read(&mut self, _token: &CancellationToken) -> Result<Option<Self::Item>> {
        Ok(self.items.pop_front())
    }
}

#[async_trait]
impl<T: Send + 'static> Writer for Queue<T> {
    type Item = T;

    async fn write(&mut self, _token: &CancellationToken, item: Self::Item) -> Result<()> {
        self.items.push_back(item);
        Ok(())
    }
}

/// A reader over the receiving half of a channel.
///
/// A closed channel is end-of-stream. Waiting for the next item races the
/// cancellation token and fails with [`Error::Cancelled`] when it fires.
pub struct ChannelReader<T> {
    receiver: mpsc::Receiver<T>,
}

impl<T> ChannelReader<T> {
    /// Create a reader from a receiver
    pub fn new(receiver: mpsc::Receiver<T>) -> Self {
        Self { receiver }
    }

    /// Give the receiver back
    pub fn into_inner(self) -> mpsc::Receiver<T> {
        self.receiver
    }
}

#[async_trait]
impl<T: Send + 'static> Reader for ChannelReader<T> {
    type Item = T;

    async fn read(&mut self, token: &CancellationToken) -> Result<Option<Self::Item>> {
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(Error::Cancelled),
            item = self.receiver.recv() => Ok(item),
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.receiver.close();
        Ok(())
    }
}

/// A reader that checks the cancellation token before every read.
///
/// Plain readers treat the token as advisory; wrapping one in a
/// `CancelReader` turns cancellation into [`Error::Cancelled`].
pub struct CancelReader<R> {
    inner: R,
}

impl<R> CancelReader<R> {
    /// Create a new cancel-checking reader
    pub fn new(inner: R) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<R: Reader + Send> Reader for CancelReader<R> {
    type Item = R::Item;

    async fn read(&mut self, token: &CancellationToken) -> Result<Option<Self::Item>> {
        if token.is_cancelled() {
            return Err(Error::Cancelled);
        }
        self.inner.read(token).await
    }

    async fn close(&mut self) -> Result<()> {
        self.inner.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::read_all;
    use std::collections::{BTreeMap, LinkedList};

    #[tokio::test]
    async fn test_vec_reader_is_monotonic() {
        let token = CancellationToken::new();
        let mut reader = VecReader::new(vec![1, 2]);

        assert_eq!(reader.read(&token).await.unwrap(), Some(1));
        assert_eq!(reader.read(&token).await.unwrap(), Some(2));
        assert_eq!(reader.read(&token).await.unwrap(), None);
        assert_eq!(reader.read(&token).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_iter_reader_over_containers() {
        let token = CancellationToken::new();

        let map: BTreeMap<&str, i32> = [("a", 1), ("b", 2)].into_iter().collect();
        let pairs = read_all(IterReader::new(map), &token).await.unwrap();
        assert_eq!(pairs, vec![("a", 1), ("b", 2)]);

        let list: LinkedList<u8> = [3, 4, 5].into_iter().collect();
        let items = read_all(IterReader::new(list), &token).await.unwrap();
        assert_eq!(items, vec![3, 4, 5]);
    }

    #[tokio::test]
    async fn test_queue_reads_what_was_written() {
        let token = CancellationToken::new();
        let mut queue = Queue::with_items(vec![1]);

        queue.write(&token, 2).await.unwrap();
        assert_eq!(queue.read(&token).await.unwrap(), Some(1));
        assert_eq!(queue.read(&token).await.unwrap(), Some(2));
        assert_eq!(queue.read(&token).await.unwrap(), None);

        queue.write(&token, 3).await.unwrap();
        assert_eq!(queue.read(&token).await.unwrap(), Some(3));
    }

    #[tokio::test]
    async fn test_missing_reader_is_empty() {
        let token = CancellationToken::new();
        let mut reader: Option<VecReader<i32>> = None;
        assert_eq!(reader.read(&token).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_channel_reader_observes_cancellation() {
        let token = CancellationToken::new();
        let (tx, rx) = mpsc::channel::<i32>(1);
        let mut reader = ChannelReader::new(rx);

        tx.send(7).await.unwrap();
        assert_eq!(reader.read(&token).await.unwrap(), Some(7));

        token.cancel();
        assert!(matches!(reader.read(&token).await, Err(Error::Cancelled)));

        drop(tx);
        let fresh = CancellationToken::new();
        assert_eq!(reader.read(&fresh).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_cancel_reader() {
        let token = CancellationToken::new();
        let mut reader = CancelReader::new(VecReader::new(vec![1, 2]));

        assert_eq!(reader.read(&token).await.unwrap(), Some(1));
        token.cancel();
        assert!(matches!(reader.read(&token).await, Err(Error::Cancelled)));
    }
}
