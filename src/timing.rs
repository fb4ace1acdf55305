//! Timing instrumentation and pacing.
//!
//! [`StatsReader`] measures every read and reports a [`ReadStat`] to a side
//! writer without touching the primary stream. The sleep wrappers pace a
//! reader or writer: a fixed sleep before each call, a normalized period
//! that absorbs the inner call's own latency, or a random jitter for fault
//! injection in tests.

use async_trait::async_trait;
use rand::Rng;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::core::{Error, Reader, Result, Writer};
use crate::util::cancellable;

/// Measurement of exactly one read
#[derive(Debug, Clone)]
pub struct ReadStat<T> {
    /// Caller-chosen label for the measured reader
    pub tag: String,
    /// The value the read produced, if any
    pub value: Option<T>,
    /// The error the read returned, if any
    pub error: Option<Error>,
    /// Time spent inside the wrapped read
    pub elapsed: Duration,
}

/// Reader that reports a [`ReadStat`] for every read.
///
/// The wrapped result is returned unchanged. A failing stats writer is logged
/// and otherwise ignored.
pub struct StatsReader<R, W> {
    reader: R,
    tag: String,
    stats: W,
}

impl<R, W> StatsReader<R, W> {
    /// Create a new stats reader
    pub fn new(reader: R, tag: impl Into<String>, stats: W) -> Self {
        Self {
            reader,
            tag: tag.into(),
            stats,
        }
    }

    /// The tag attached to every stat
    pub fn tag(&self) -> &str {
        &self.tag
    }
}

#[async_trait]
impl<R, W> Reader for StatsReader<R, W>
where
    R: Reader + Send,
    R::Item: Clone,
    W: Writer<Item = ReadStat<R::Item>> + Send,
{
    type Item = R::Item;

    async fn read(&mut self, token: &CancellationToken) -> Result<Option<Self::Item>> {
        let start = Instant::now();
        let result = self.reader.read(token).await;

        let stat = ReadStat {
            tag: self.tag.clone(),
            value: result.as_ref().ok().and_then(|v| v.clone()),
            error: result.as_ref().err().cloned(),
            elapsed: start.elapsed(),
        };
        if let Err(e) = self.stats.write(token, stat).await {
            warn!(tag = %self.tag, error = %e, "failed to record read stat");
        }

        result
    }

    async fn close(&mut self) -> Result<()> {
        self.reader.close().await
    }
}

/// Reader that sleeps for a fixed delay before every read
pub struct SleepReader<R> {
    inner: R,
    delay: Duration,
}

impl<R> SleepReader<R> {
    /// Create a new sleeping reader
    pub fn new(inner: R, delay: Duration) -> Self {
        Self { inner, delay }
    }
}

#[async_trait]
impl<R: Reader + Send> Reader for SleepReader<R> {
    type Item = R::Item;

    async fn read(&mut self, token: &CancellationToken) -> Result<Option<Self::Item>> {
        cancellable(token, sleep(self.delay)).await?;
        self.inner.read(token).await
    }

    async fn close(&mut self) -> Result<()> {
        self.inner.close().await
    }
}

/// Reader whose successful reads each take at least `period`.
///
/// The inner read's own latency is subtracted from the period; a read that
/// already took longer is returned without sleeping. End-of-stream and
/// errors are returned at once.
pub struct PacedReader<R> {
    inner: R,
    period: Duration,
}

impl<R> PacedReader<R> {
    /// Create a new paced reader
    pub fn new(inner: R, period: Duration) -> Self {
        Self { inner, period }
    }
}

#[async_trait]
impl<R: Reader + Send> Reader for PacedReader<R> {
    type Item = R::Item;

    async fn read(&mut self, token: &CancellationToken) -> Result<Option<Self::Item>> {
        let start = Instant::now();
        let result = self.inner.read(token).await;

        if let Ok(Some(_)) = result {
            if let Some(remaining) = self.period.checked_sub(start.elapsed()) {
                sleep(remaining).await;
            }
        }
        result
    }

    async fn close(&mut self) -> Result<()> {
        self.inner.close().await
    }
}

/// Pick a uniformly random delay in `[min, max)`, or `min` if the range is empty
fn jitter_delay(min: Duration, max: Duration) -> Duration {
    if max <= min {
        return min;
    }
    rand::thread_rng().gen_range(min..max)
}

/// Reader that sleeps a random duration before every read
pub struct JitterReader<R> {
    inner: R,
    min: Duration,
    max: Duration,
}

impl<R> JitterReader<R> {
    /// Create a new jittering reader
    pub fn new(inner: R, min: Duration, max: Duration) -> Self {
        Self { inner, min, max }
    }
}

#[async_trait]
impl<R: Reader + Send> Reader for JitterReader<R> {
    type Item = R::Item;

    async fn read(&mut self, token: &CancellationToken) -> Result<Option<Self::Item>> {
        cancellable(token, sleep(jitter_delay(self.min, self.max))).await?;
        self.inner.read(token).await
    }

    async fn close(&mut self) -> Result<()> {
        self.inner.close().await
    }
}

/// Writer that sleeps for a fixed delay before every write
pub struct SleepWriter<W> {
    inner: W,
    delay: Duration,
}

impl<W> SleepWriter<W> {
    /// Create a new sleeping writer
    pub fn new(inner: W, delay: Duration) -> Self {
        Self { inner, delay }
    }
}

#[async_trait]
impl<W: Writer + Send> Writer for SleepWriter<W> {
    type Item = W::Item;

    async fn write(&mut self, token: &CancellationToken, item: Self::Item) -> Result<()> {
        cancellable(token, sleep(self.delay)).await?;
        self.inner.write(token, item).await
    }

    async fn close(&mut self) -> Result<()> {
        self.inner.close().await
    }
}

/// Writer that keeps consecutive writes at least `period` apart.
///
/// The gap is measured from the end of the previous write; the first write
/// goes through immediately.
pub struct PacedWriter<W> {
    inner: W,
    period: Duration,
    last_written: Option<Instant>,
}

impl<W> PacedWriter<W> {
    /// Create a new paced writer
    pub fn new(inner: W, period: Duration) -> Self {
        Self {
            inner,
            period,
            last_written: None,
        }
    }
}

#[async_trait]
impl<W: Writer + Send> Writer for PacedWriter<W> {
    type Item = W::Item;

    async fn write(&mut self, token: &CancellationToken, item: Self::Item) -> Result<()> {
        if let Some(last) = self.last_written {
            if let Some(remaining) = self.period.checked_sub(last.elapsed()) {
                cancellable(token, sleep(remaining)).await?;
            }
        }

        let result = self.inner.write(token, item).await;
        self.last_written = Some(Instant::now());
        result
    }

    async fn close(&mut self) -> Result<()> {
        self.inner.close().await
    }
}

/// Writer that sleeps a random duration before every write
pub struct JitterWriter<W> {
    inner: W,
    min: Duration,
    max: Duration,
}

impl<W> JitterWriter<W> {
    /// Create a new jittering writer
    pub fn new(inner: W, min: Duration, max: Duration) -> Self {
        Self { inner, min, max }
    }
}

#[async_trait]
impl<W: Writer + Send> Writer for JitterWriter<W> {
    type Item = W::Item;

    async fn write(&mut self, token: &CancellationToken, item: Self::Item) -> Result<()> {
        cancellable(token, sleep(jitter_delay(self.min, self.max))).await?;
        self.inner.write(token, item).await
    }

    async fn close(&mut self) -> Result<()> {
        self.inner.close().await
    }
}
