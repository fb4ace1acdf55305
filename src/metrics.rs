//! Read statistics exported through the `metrics` facade.
//!
//! [`MetricsWriter`] is a stats sink for [`StatsReader`](crate::timing::StatsReader):
//! it records every [`ReadStat`] as a latency histogram and an outcome
//! counter, both labelled with the stat's tag.

use async_trait::async_trait;
use std::marker::PhantomData;
use tokio_util::sync::CancellationToken;

use crate::core::{Result, Writer};
use crate::timing::ReadStat;

/// Histogram of read latencies in seconds
pub const READ_DURATION_SECONDS: &str = "seqio_read_duration_seconds";

/// Counter of reads by outcome (`value`, `end` or `error`)
pub const READS_TOTAL: &str = "seqio_reads_total";

/// Writer that records read stats with the installed metrics recorder
pub struct MetricsWriter<T> {
    _phantom: PhantomData<fn(T)>,
}

impl<T> MetricsWriter<T> {
    /// Create a new metrics writer
    pub fn new() -> Self {
        Self {
            _phantom: PhantomData,
        }
    }
}

impl<T> Default for MetricsWriter<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn outcome<T>(stat: &ReadStat<T>) -> &'static str {
    match (&stat.value, &stat.error) {
        (_, Some(_)) => "error",
        (Some(_), None) => "value",
        (None, None) => "end",
    }
}

#[async_trait]
impl<T: Send + 'static> Writer for MetricsWriter<T> {
    type Item = ReadStat<T>;

    async fn write(&mut self, _token: &CancellationToken, stat: Self::Item) -> Result<()> {
        ::metrics::histogram!(READ_DURATION_SECONDS, "tag" => stat.tag.clone())
            .record(stat.elapsed.as_secs_f64());
        ::metrics::counter!(READS_TOTAL, "tag" => stat.tag.clone(), "outcome" => outcome(&stat))
            .increment(1);
        Ok(())
    }
}
