//! Bounded worker pool over channels.
//!
//! A fixed number of workers share one input receiver. Each worker claims
//! the next item, optionally filters it, transforms it and sends the result
//! to a shared output channel. Output order across workers is unspecified;
//! every admitted input produces exactly one output.
//!
//! The output channel closes only after every worker has returned, because
//! each worker owns a sender and the pool keeps none of its own. A
//! supervisor task joins the workers and reports panics.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::Mutex as TokioMutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::channel::send_or_cancel;
use crate::core::{Error, Result};

/// Predicate deciding whether an input is processed
pub type Predicate<I> = Arc<dyn Fn(&I) -> bool + Send + Sync>;

/// Function turning an input into an output
pub type Transform<I, O> = Arc<dyn Fn(I) -> O + Send + Sync>;

/// Configuration for a [`WorkPool`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkPoolConfig {
    /// Number of concurrent workers
    pub workers: usize,
    /// Capacity of the output channel
    pub capacity: usize,
}

impl Default for WorkPoolConfig {
    fn default() -> Self {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self {
            workers,
            capacity: workers,
        }
    }
}

impl WorkPoolConfig {
    /// Check that the pool can run with this config
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::config("work pool needs at least one worker"));
        }
        if self.capacity == 0 {
            return Err(Error::config("work pool output capacity must be non-zero"));
        }
        Ok(())
    }
}

/// Builder and runner for a pool of workers.
///
/// # Transform contract
///
/// The transform must be total. The pool does not catch its failures: a
/// panicking transform kills its worker, that worker's current item is lost
/// and the remaining workers carry on. Encode failures in the output type,
/// for example `O = Result<T, E>`.
pub struct WorkPool<I, O> {
    config: WorkPoolConfig,
    input: Option<mpsc::Receiver<I>>,
    filter: Option<Predicate<I>>,
    transform: Option<Transform<I, O>>,
}

impl<I, O> Default for WorkPool<I, O> {
    fn default() -> Self {
        Self {
            config: WorkPoolConfig::default(),
            input: None,
            filter: None,
            transform: None,
        }
    }
}

impl<I, O> WorkPool<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    /// Create a pool with the default config and no input or transform yet
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole config
    pub fn config(mut self, config: WorkPoolConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the number of workers
    pub fn workers(mut self, workers: usize) -> Self {
        self.config.workers = workers;
        self
    }

    /// Set the output channel capacity
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.config.capacity = capacity;
        self
    }

    /// Set the shared input channel
    pub fn input(mut self, input: mpsc::Receiver<I>) -> Self {
        self.input = Some(input);
        self
    }

    /// Skip inputs for which `filter` returns false
    pub fn filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&I) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(filter));
        self
    }

    /// Set the transform applied to every admitted input
    pub fn transform<F>(mut self, transform: F) -> Self
    where
        F: Fn(I) -> O + Send + Sync + 'static,
    {
        self.transform = Some(Arc::new(transform));
        self
    }

    /// Start the workers and return the output channel.
    ///
    /// An invalid pool (no workers, no input, no transform) starts nothing
    /// and returns a receiver that is already closed.
    pub fn spawn(self, token: &CancellationToken) -> mpsc::Receiver<O> {
        let WorkPool {
            config,
            input,
            filter,
            transform,
        } = self;

        let (input, transform) = match (config.validate(), input, transform) {
            (Ok(()), Some(input), Some(transform)) => (input, transform),
            (Err(e), _, _) => return closed_receiver(&e),
            (Ok(()), None, _) => return closed_receiver(&Error::config("work pool has no input")),
            (Ok(()), _, None) => {
                return closed_receiver(&Error::config("work pool has no transform"))
            }
        };

        let (tx, rx) = mpsc::channel(config.capacity);
        let input = Arc::new(TokioMutex::new(input));
        let mut workers = JoinSet::new();

        for id in 0..config.workers {
            let worker = Worker {
                id,
                input: input.clone(),
                output: tx.clone(),
                filter: filter.clone(),
                transform: transform.clone(),
                token: token.clone(),
            };
            workers.spawn(worker.run());
        }
        drop(tx);

        tokio::spawn(async move {
            while let Some(joined) = workers.join_next().await {
                if let Err(e) = joined {
                    if e.is_panic() {
                        error!(error = %e, "work pool worker panicked");
                    }
                }
            }
            debug!("work pool drained");
        });

        debug!(workers = config.workers, "work pool started");
        rx
    }
}

fn closed_receiver<O>(reason: &Error) -> mpsc::Receiver<O> {
    warn!(error = %reason, "work pool not started");
    let (_, rx) = mpsc::channel(1);
    rx
}

struct Worker<I, O> {
    id: usize,
    input: Arc<TokioMutex<mpsc::Receiver<I>>>,
    output: mpsc::Sender<O>,
    filter: Option<Predicate<I>>,
    transform: Transform<I, O>,
    token: CancellationToken,
}

impl<I, O> Worker<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    async fn run(self) {
        let mut processed = 0usize;
        while let Some(item) = self.next_input().await {
            if let Some(filter) = &self.filter {
                if !(**filter)(&item) {
                    continue;
                }
            }
            let output = (*self.transform)(item);
            if send_or_cancel(&self.output, &self.token, output).await.is_err() {
                break;
            }
            processed += 1;
        }
        debug!(worker = self.id, processed, "worker finished");
    }

    async fn next_input(&self) -> Option<I> {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => None,
            item = async { self.input.lock().await.recv().await } => item,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{from_iter, ChannelConfig};
    use std::collections::HashSet;
    use std::time::Duration;

    async fn drain<T>(mut rx: mpsc::Receiver<T>) -> Vec<T> {
        tokio::time::timeout(Duration::from_secs(10), async move {
            let mut items = Vec::new();
            while let Some(item) = rx.recv().await {
                items.push(item);
            }
            items
        })
        .await
        .expect("output channel did not close")
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_identity_over_many_workers_keeps_the_set() {
        let token = CancellationToken::new();
        let input = from_iter(0..1000, &token, ChannelConfig::new(16));

        let output = WorkPool::new()
            .workers(8)
            .input(input)
            .transform(|x: i32| x)
            .spawn(&token);

        let items = drain(output).await;
        assert_eq!(items.len(), 1000);
        let unique: HashSet<_> = items.into_iter().collect();
        assert_eq!(unique, (0..1000).collect::<HashSet<_>>());
    }

    #[tokio::test]
    async fn test_filter_then_transform() {
        let token = CancellationToken::new();
        let input = from_iter(1..=10, &token, ChannelConfig::default());

        let output = WorkPool::new()
            .workers(3)
            .input(input)
            .filter(|x: &u32| x % 2 == 0)
            .transform(|x: u32| x * 10)
            .spawn(&token);

        let mut items = drain(output).await;
        items.sort_unstable();
        assert_eq!(items, vec![20, 40, 60, 80, 100]);
    }

    #[tokio::test]
    async fn test_invalid_pool_returns_closed_receiver() {
        let token = CancellationToken::new();

        let no_workers = WorkPool::new()
            .workers(0)
            .input(from_iter(vec![1], &token, ChannelConfig::default()))
            .transform(|x: i32| x)
            .spawn(&token);
        assert!(drain(no_workers).await.is_empty());

        let no_input = WorkPool::<i32, i32>::new().transform(|x| x).spawn(&token);
        assert!(drain(no_input).await.is_empty());

        let no_transform = WorkPool::<i32, i32>::new()
            .input(from_iter(vec![1], &token, ChannelConfig::default()))
            .spawn(&token);
        assert!(drain(no_transform).await.is_empty());
    }

    #[tokio::test]
    async fn test_cancellation_closes_output() {
        let token = CancellationToken::new();
        let (_keep_open, input) = mpsc::channel::<i32>(1);

        let output = WorkPool::new()
            .workers(4)
            .input(input)
            .transform(|x: i32| x)
            .spawn(&token);

        token.cancel();
        assert!(drain(output).await.is_empty());
    }

    #[tokio::test]
    async fn test_failures_encoded_in_output() {
        let token = CancellationToken::new();
        let input = from_iter(vec!["1", "two", "3"], &token, ChannelConfig::default());

        let output = WorkPool::new()
            .workers(2)
            .input(input)
            .transform(|s: &str| s.parse::<i32>().map_err(|e| e.to_string()))
            .spawn(&token);

        let items = drain(output).await;
        assert_eq!(items.len(), 3);
        assert_eq!(items.iter().filter(|r| r.is_err()).count(), 1);
    }

    #[tokio::test]
    async fn test_panicking_transform_does_not_hang_the_pool() {
        let token = CancellationToken::new();
        let input = from_iter(0..20, &token, ChannelConfig::default());

        let output = WorkPool::new()
            .workers(2)
            .input(input)
            .transform(|x: i32| {
                if x == 5 {
                    panic!("bad item");
                }
                x
            })
            .spawn(&token);

        let items = drain(output).await;
        assert!(!items.contains(&5));
        assert!(items.len() < 20);
    }
}
