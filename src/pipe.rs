//! Driving a reader into a writer.
//!
//! [`Pipe`] is the end of every chain: it pulls from a reader until
//! end-of-stream and pushes each item to a writer. [`Pipe::run`] does this
//! inline; [`Pipe::run_concurrent`] moves the reader onto its own task behind
//! a bounded channel so reading and writing overlap.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::channel::{self, ChannelConfig};
use crate::core::{Error, Reader, Result, Writer};

/// Configuration for pipe execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipeConfig {
    /// Maximum time a single read or write may take
    pub operation_timeout: Option<Duration>,
    /// Close both ends when the pipe finishes, successfully or not
    pub close_on_end: bool,
    /// Items buffered between the reader task and the writer in
    /// [`Pipe::run_concurrent`]
    pub buffer_size: usize,
}

impl Default for PipeConfig {
    fn default() -> Self {
        Self {
            operation_timeout: None,
            close_on_end: true,
            buffer_size: 1000,
        }
    }
}

/// A reader connected to a writer
pub struct Pipe<R, W> {
    reader: R,
    writer: W,
    config: PipeConfig,
}

impl<R, W> Pipe<R, W>
where
    R: Reader + Send,
    W: Writer<Item = R::Item> + Send,
{
    /// Create a new pipe
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader,
            writer,
            config: PipeConfig::default(),
        }
    }

    /// Replace the whole config
    pub fn config(mut self, config: PipeConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the per-operation timeout
    pub fn operation_timeout(mut self, timeout: Duration) -> Self {
        self.config.operation_timeout = Some(timeout);
        self
    }

    /// Set whether both ends are closed when the pipe finishes
    pub fn close_on_end(mut self, close: bool) -> Self {
        self.config.close_on_end = close;
        self
    }

    /// Set the channel capacity used by [`Pipe::run_concurrent`]
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.config.buffer_size = size;
        self
    }

    /// Move every item from the reader to the writer.
    ///
    /// Returns the number of items written. The first error from either end
    /// stops the pipe and is returned.
    pub async fn run(self, token: &CancellationToken) -> Result<usize> {
        let Pipe {
            mut reader,
            mut writer,
            config,
        } = self;
        let timeout = config.operation_timeout;

        let mut count = 0;
        let result = loop {
            let item = match timed(timeout, reader.read(token)).await {
                Ok(Some(item)) => item,
                Ok(None) => break Ok(count),
                Err(e) => break Err(e),
            };
            if let Err(e) = timed(timeout, writer.write(token, item)).await {
                break Err(e);
            }
            count += 1;
        };

        if config.close_on_end {
            if let Err(e) = reader.close().await {
                warn!(error = %e, "failed to close reader");
            }
            return finish(result, writer.close().await);
        }
        result
    }
}

impl<R, W> Pipe<R, W>
where
    R: Reader + Send + 'static,
    W: Writer<Item = R::Item> + Send,
{
    /// Like [`Pipe::run`], but the reader runs on its own task.
    ///
    /// The reader is always closed by its task; `close_on_end` only governs
    /// the writer.
    pub async fn run_concurrent(self, token: &CancellationToken) -> Result<usize> {
        let Pipe {
            reader,
            mut writer,
            config,
        } = self;
        let timeout = config.operation_timeout;

        let (mut rx, producer) =
            channel::spawn_reader(reader, token, ChannelConfig::new(config.buffer_size));

        let mut count = 0;
        let mut written = Ok(());
        while let Some(item) = rx.recv().await {
            if let Err(e) = timed(timeout, writer.write(token, item)).await {
                written = Err(e);
                break;
            }
            count += 1;
        }
        drop(rx);

        let produced = producer
            .await
            .map_err(|e| Error::custom(format!("Task panicked: {}", e)))?;
        let result = written.and(produced).map(|()| count);
        debug!(items = count, ok = result.is_ok(), "concurrent pipe finished");

        if config.close_on_end {
            return finish(result, writer.close().await);
        }
        result
    }
}

/// Run `fut`, failing with `Error::Timeout` if it exceeds `timeout`
async fn timed<T, F>(timeout: Option<Duration>, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match timeout {
        Some(limit) => match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::timeout(limit.as_millis() as u64)),
        },
        None => fut.await,
    }
}

/// Prefer the pipe's own error over a failure to close the writer
fn finish(result: Result<usize>, closed: Result<()>) -> Result<usize> {
    match (result, closed) {
        (Err(e), closed) => {
            if let Err(close_err) = closed {
                warn!(error = %close_err, "failed to close writer after error");
            }
            Err(e)
        }
        (Ok(_), Err(e)) => Err(e),
        (Ok(count), Ok(())) => Ok(count),
    }
}
