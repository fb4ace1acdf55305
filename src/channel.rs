//! Channel-backed producers.
//!
//! Each helper spawns a task that feeds a bounded `mpsc` channel. Every send
//! races the cancellation token, so a cancelled producer stops within one
//! scheduling step and drops its sender, which closes the channel.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::core::{Error, Reader, Result};

/// Configuration for channel-backed producers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Items buffered between producer and consumer; zero is treated as one
    pub capacity: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self { capacity: 1 }
    }
}

impl ChannelConfig {
    /// Create a config with the given capacity
    pub fn new(capacity: usize) -> Self {
        Self { capacity }
    }

    /// Set the channel capacity
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    fn bounded<T>(&self) -> (mpsc::Sender<T>, mpsc::Receiver<T>) {
        mpsc::channel(self.capacity.max(1))
    }
}

/// Send `item`, giving up if the token fires first or the consumer is gone.
///
/// Returns `Err(Cancelled)` on cancellation and `Err(ClosedPipe)` if the
/// receiver was dropped.
pub(crate) async fn send_or_cancel<T>(
    tx: &mpsc::Sender<T>,
    token: &CancellationToken,
    item: T,
) -> Result<()> {
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(Error::Cancelled),
        sent = tx.send(item) => sent.map_err(Error::from),
    }
}

/// Stream the items of a collection through a channel.
///
/// The producer task stops when the items run out, the token is cancelled or
/// the receiver is dropped; in every case the channel is closed.
pub fn from_iter<I>(
    items: I,
    token: &CancellationToken,
    config: ChannelConfig,
) -> mpsc::Receiver<I::Item>
where
    I: IntoIterator,
    I::IntoIter: Send + 'static,
    I::Item: Send + 'static,
{
    let (tx, rx) = config.bounded();
    let token = token.clone();
    let items = items.into_iter();

    tokio::spawn(async move {
        for item in items {
            match send_or_cancel(&tx, &token, item).await {
                Ok(()) => {}
                Err(Error::Cancelled) => {
                    debug!("collection producer cancelled");
                    return;
                }
                Err(_) => return,
            }
        }
    });

    rx
}

/// Drain `reader` into a channel from a spawned task.
///
/// The handle resolves to the first reader error, `Err(Cancelled)` if the
/// token fired, or `Ok(())` at end-of-stream or when the receiver was
/// dropped. The reader is closed before the task finishes.
pub fn spawn_reader<R>(
    reader: R,
    token: &CancellationToken,
    config: ChannelConfig,
) -> (mpsc::Receiver<R::Item>, JoinHandle<Result<()>>)
where
    R: Reader + Send + 'static,
{
    let (tx, rx) = config.bounded();
    let token = token.clone();

    let handle = tokio::spawn(async move {
        let mut reader = reader;
        let result = drain_into(&mut reader, &tx, &token).await;
        drop(tx);

        if let Err(e) = reader.close().await {
            warn!(error = %e, "failed to close reader after draining");
        }
        match result {
            Err(Error::ClosedPipe) => Ok(()),
            Err(Error::Cancelled) => {
                debug!("reader producer cancelled");
                Err(Error::Cancelled)
            }
            Err(e) => {
                warn!(error = %e, "reader producer failed");
                Err(e)
            }
            Ok(()) => Ok(()),
        }
    });

    (rx, handle)
}

async fn drain_into<R: Reader + Send>(
    reader: &mut R,
    tx: &mpsc::Sender<R::Item>,
    token: &CancellationToken,
) -> Result<()> {
    loop {
        let next = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(Error::Cancelled),
            next = reader.read(token) => next?,
        };
        match next {
            Some(item) => send_or_cancel(tx, token, item).await?,
            None => return Ok(()),
        }
    }
}

/// Expose a receiver as a `Stream`
pub fn into_stream<T>(rx: mpsc::Receiver<T>) -> ReceiverStream<T> {
    ReceiverStream::new(rx)
}
