//! Writer implementations for the seqio library.
//!
//! The ends of a push chain: in-memory collection, counting, discarding and
//! the sending half of a channel.

use async_trait::async_trait;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::Mutex as TokioMutex;
use tokio_util::sync::CancellationToken;

use crate::core::{Error, Result, Writer};

/// A writer that collects items into a vector.
///
/// Clones share the same storage, so a clone kept aside can inspect what was
/// written after the original has been moved into a chain.
pub struct CollectWriter<T> {
    items: Arc<TokioMutex<Vec<T>>>,
    closed: Arc<TokioMutex<bool>>,
}

impl<T: Send + 'static + Clone> CollectWriter<T> {
    /// Create a new collect writer
    pub fn new() -> Self {
        Self {
            items: Arc::new(TokioMutex::new(Vec::new())),
            closed: Arc::new(TokioMutex::new(false)),
        }
    }

    /// Get a copy of the collected items
    pub async fn into_items(self) -> Vec<T> {
        self.items.lock().await.clone()
    }

    /// Get a clone of the items Arc for external access
    pub fn items(&self) -> Arc<TokioMutex<Vec<T>>> {
        self.items.clone()
    }

    /// Whether `close` has been called on any clone
    pub async fn is_closed(&self) -> bool {
        *self.closed.lock().await
    }
}

#[async_trait]
impl<T: Send + 'static + Clone> Writer for CollectWriter<T> {
    type Item = T;

    async fn write(&mut self, _token: &CancellationToken, item: Self::Item) -> Result<()> {
        if *self.closed.lock().await {
            return Err(Error::Closed);
        }
        self.items.lock().await.push(item);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        *self.closed.lock().await = true;
        Ok(())
    }
}

impl<T: Send + 'static + Clone> Default for CollectWriter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for CollectWriter<T> {
    fn clone(&self) -> Self {
        Self {
            items: self.items.clone(),
            closed: self.closed.clone(),
        }
    }
}

/// A writer that counts items
pub struct CountWriter<T> {
    count: Arc<TokioMutex<usize>>,
    _phantom: PhantomData<fn(T)>,
}

impl<T> CountWriter<T> {
    /// Create a new count writer
    pub fn new() -> Self {
        Self {
            count: Arc::new(TokioMutex::new(0)),
            _phantom: PhantomData,
        }
    }

    /// Get the current count
    pub async fn count(&self) -> usize {
        *self.count.lock().await
    }
}

#[async_trait]
impl<T: Send + 'static> Writer for CountWriter<T> {
    type Item = T;

    async fn write(&mut self, _token: &CancellationToken, _item: Self::Item) -> Result<()> {
        *self.count.lock().await += 1;
        Ok(())
    }
}

impl<T> Default for CountWriter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for CountWriter<T> {
    fn clone(&self) -> Self {
        Self {
            count: self.count.clone(),
            _phantom: PhantomData,
        }
    }
}

/// A writer that accepts and drops everything
pub struct DiscardWriter<T> {
    _phantom: PhantomData<fn(T)>,
}

impl<T> DiscardWriter<T> {
    /// Create a new discard writer
    pub fn new() -> Self {
        Self {
            _phantom: PhantomData,
        }
    }
}

impl<T> Default for DiscardWriter<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Send + 'static> Writer for DiscardWriter<T> {
    type Item = T;

    async fn write(&mut self, _token: &CancellationToken, _item: Self::Item) -> Result<()> {
        Ok(())
    }
}

/// A writer over the sending half of a channel.
///
/// A dropped receiver fails writes with [`Error::ClosedPipe`]. Waiting for
/// capacity races the cancellation token. Closing drops the sender, which
/// ends the stream for the receiver once every other sender is gone.
pub struct ChannelWriter<T> {
    sender: Option<mpsc::Sender<T>>,
}

impl<T> ChannelWriter<T> {
    /// Create a writer from a sender
    pub fn new(sender: mpsc::Sender<T>) -> Self {
        Self {
            sender: Some(sender),
        }
    }
}

#[async_trait]
impl<T: Send + 'static> Writer for ChannelWriter<T> {
    type Item = T;

    async fn write(&mut self, token: &CancellationToken, item: Self::Item) -> Result<()> {
        let sender = self.sender.as_ref().ok_or(Error::Closed)?;
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(Error::Cancelled),
            sent = sender.send(item) => sent.map_err(Error::from),
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.sender = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_collect_writer_shares_storage() {
        let token = CancellationToken::new();
        let writer = CollectWriter::new();
        let mut handle = writer.clone();

        handle.write(&token, "a").await.unwrap();
        handle.write(&token, "b").await.unwrap();
        assert_eq!(writer.into_items().await, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_collect_writer_rejects_after_close() {
        let token = CancellationToken::new();
        let mut writer = CollectWriter::new();

        writer.write(&token, 1).await.unwrap();
        writer.close().await.unwrap();
        assert!(matches!(writer.write(&token, 2).await, Err(Error::Closed)));
        assert!(matches!(writer.write(&token, 3).await, Err(Error::Closed)));
        assert!(writer.is_closed().await);
    }

    #[tokio::test]
    async fn test_missing_writer_is_a_closed_pipe() {
        let token = CancellationToken::new();
        let mut writer: Option<CollectWriter<i32>> = None;
        assert!(matches!(writer.write(&token, 1).await, Err(Error::ClosedPipe)));
    }

    #[tokio::test]
    async fn test_count_writer() {
        let token = CancellationToken::new();
        let counter = CountWriter::new();
        let mut writer = counter.clone();
        for i in 0..5 {
            writer.write(&token, i).await.unwrap();
        }
        assert_eq!(counter.count().await, 5);
    }

    #[tokio::test]
    async fn test_channel_writer() {
        let token = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel(4);
        let mut writer = ChannelWriter::new(tx);

        writer.write(&token, 1).await.unwrap();
        writer.close().await.unwrap();
        assert!(matches!(writer.write(&token, 2).await, Err(Error::Closed)));

        assert_eq!(rx.recv().await, Some(1));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_channel_writer_dropped_receiver() {
        let token = CancellationToken::new();
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let mut writer = ChannelWriter::new(tx);
        assert!(matches!(writer.write(&token, 1).await, Err(Error::ClosedPipe)));
    }
}
