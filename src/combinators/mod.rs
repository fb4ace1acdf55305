//! Filter, map and reduce over readers and writers.
//!
//! The combinators are lazy: nothing is pulled upstream until the combinator
//! itself is read. A `Map` pulls exactly one upstream item per read, a
//! `Filter` pulls until an item passes or the stream ends.
//!
//! A missing function is handled differently per combinator. A filter with no
//! predicate passes everything through, while a map with no mapper yields an
//! empty stream on the read side and a closed pipe on the write side.

use async_trait::async_trait;
use std::marker::PhantomData;
use tokio_util::sync::CancellationToken;

use crate::core::{Error, Reader, Result, Writer};

/// Reader that yields only upstream items matching a predicate
pub struct Filter<R, F> {
    reader: R,
    predicate: Option<F>,
}

impl<R, F> Filter<R, F> {
    /// Create a new filter
    pub fn new(reader: R, predicate: F) -> Self {
        Self {
            reader,
            predicate: Some(predicate),
        }
    }

    /// Build a filter from optional parts.
    ///
    /// A missing reader is an empty stream; a missing predicate keeps every item.
    pub fn from_parts(reader: Option<R>, predicate: Option<F>) -> Filter<Option<R>, F> {
        Filter { reader, predicate }
    }
}

#[async_trait]
impl<R, F> Reader for Filter<R, F>
where
    R: Reader + Send,
    F: FnMut(&R::Item) -> bool + Send,
{
    type Item = R::Item;

    async fn read(&mut self, token: &CancellationToken) -> Result<Option<Self::Item>> {
        let Some(predicate) = self.predicate.as_mut() else {
            return self.reader.read(token).await;
        };

        loop {
            match self.reader.read(token).await? {
                Some(item) => {
                    if predicate(&item) {
                        return Ok(Some(item));
                    }
                }
                None => return Ok(None),
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.reader.close().await
    }
}

/// Reader that applies a function to every upstream item
pub struct Map<R, F> {
    reader: R,
    f: Option<F>,
}

impl<R, F> Map<R, F> {
    /// Create a new map
    pub fn new(reader: R, f: F) -> Self {
        Self { reader, f: Some(f) }
    }

    /// Build a map from optional parts.
    ///
    /// If either part is missing the result is exhausted from the first read,
    /// and upstream is never pulled.
    pub fn from_parts(reader: Option<R>, f: Option<F>) -> Map<Option<R>, F> {
        Map { reader, f }
    }
}

#[async_trait]
impl<R, F, U> Reader for Map<R, F>
where
    R: Reader + Send,
    F: FnMut(R::Item) -> U + Send,
    U: Send + 'static,
{
    type Item = U;

    async fn read(&mut self, token: &CancellationToken) -> Result<Option<Self::Item>> {
        let Some(f) = self.f.as_mut() else {
            return Ok(None);
        };

        match self.reader.read(token).await? {
            Some(item) => Ok(Some(f(item))),
            None => Ok(None),
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.reader.close().await
    }
}

/// Writer that silently drops items failing a predicate
pub struct FilterWriter<W, F> {
    writer: W,
    predicate: Option<F>,
}

impl<W, F> FilterWriter<W, F> {
    /// Create a new filtering writer
    pub fn new(writer: W, predicate: F) -> Self {
        Self {
            writer,
            predicate: Some(predicate),
        }
    }

    /// Build a filtering writer whose predicate may be missing (pass-through)
    pub fn from_parts(writer: W, predicate: Option<F>) -> Self {
        Self { writer, predicate }
    }
}

#[async_trait]
impl<W, F> Writer for FilterWriter<W, F>
where
    W: Writer + Send,
    F: FnMut(&W::Item) -> bool + Send,
{
    type Item = W::Item;

    async fn write(&mut self, token: &CancellationToken, item: Self::Item) -> Result<()> {
        if let Some(predicate) = self.predicate.as_mut() {
            if !predicate(&item) {
                return Ok(());
            }
        }
        self.writer.write(token, item).await
    }

    async fn close(&mut self) -> Result<()> {
        self.writer.close().await
    }
}

/// Writer that converts each item before handing it on
pub struct MapWriter<W, F, T> {
    writer: W,
    f: Option<F>,
    _phantom: PhantomData<fn(T)>,
}

impl<W, F, T> MapWriter<W, F, T> {
    /// Create a new mapping writer
    pub fn new(writer: W, f: F) -> Self {
        Self {
            writer,
            f: Some(f),
            _phantom: PhantomData,
        }
    }

    /// Build a mapping writer whose function may be missing.
    ///
    /// Without a function every write fails with [`Error::ClosedPipe`].
    pub fn from_parts(writer: W, f: Option<F>) -> Self {
        Self {
            writer,
            f,
            _phantom: PhantomData,
        }
    }
}

#[async_trait]
impl<W, F, T> Writer for MapWriter<W, F, T>
where
    W: Writer + Send,
    F: FnMut(T) -> W::Item + Send,
    T: Send + 'static,
{
    type Item = T;

    async fn write(&mut self, token: &CancellationToken, item: Self::Item) -> Result<()> {
        let f = self.f.as_mut().ok_or(Error::ClosedPipe)?;
        let mapped = f(item);
        self.writer.write(token, mapped).await
    }

    async fn close(&mut self) -> Result<()> {
        self.writer.close().await
    }
}

/// Drain `reader`, folding every item into an accumulator that starts at
/// `A::default()`.
///
/// An upstream error aborts the fold and is returned.
pub async fn reduce<R, F, A>(mut reader: R, token: &CancellationToken, mut f: F) -> Result<A>
where
    R: Reader,
    F: FnMut(A, R::Item) -> A,
    A: Default,
{
    let mut acc = A::default();
    while let Some(item) = reader.read(token).await? {
        acc = f(acc, item);
    }
    Ok(acc)
}

/// [`reduce`] over optional parts; either part missing yields `A::default()`
pub async fn reduce_parts<R, F, A>(
    reader: Option<R>,
    token: &CancellationToken,
    f: Option<F>,
) -> Result<A>
where
    R: Reader,
    F: FnMut(A, R::Item) -> A,
    A: Default,
{
    match (reader, f) {
        (Some(reader), Some(f)) => reduce(reader, token, f).await,
        _ => Ok(A::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ReaderExt, WriterExt};
    use crate::readers::VecReader;
    use crate::util::{from_fn, read_all};
    use crate::writers::CollectWriter;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Counts how often upstream is pulled
    struct CountingReader {
        inner: VecReader<i32>,
        pulls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Reader for CountingReader {
        type Item = i32;

        async fn read(&mut self, token: &CancellationToken) -> Result<Option<i32>> {
            self.pulls.fetch_add(1, Ordering::SeqCst);
            self.inner.read(token).await
        }
    }

    fn counting_reader(items: Vec<i32>, pulls: Arc<AtomicUsize>) -> CountingReader {
        CountingReader {
            inner: VecReader::new(items),
            pulls,
        }
    }

    #[tokio::test]
    async fn test_filter_keeps_matching_items_in_order() {
        let token = CancellationToken::new();
        let filtered = VecReader::new((1..11).collect()).filter(|x| x % 2 == 0);
        assert_eq!(read_all(filtered, &token).await.unwrap(), vec![2, 4, 6, 8, 10]);
    }

    #[tokio::test]
    async fn test_filter_without_predicate_is_identity() {
        let token = CancellationToken::new();
        let upstream = Some(VecReader::new(vec![3, 1, 2]));
        let filtered = Filter::from_parts(upstream, None::<fn(&i32) -> bool>);
        assert_eq!(read_all(filtered, &token).await.unwrap(), vec![3, 1, 2]);
    }

    #[tokio::test]
    async fn test_map_applies_function() {
        let token = CancellationToken::new();
        let mapped = VecReader::new(vec![1, 2, 3]).map(|x| x.to_string());
        assert_eq!(read_all(mapped, &token).await.unwrap(), vec!["1", "2", "3"]);
    }

    #[tokio::test]
    async fn test_map_without_function_is_empty_and_lazy() {
        let token = CancellationToken::new();
        let pulls = Arc::new(AtomicUsize::new(0));
        let upstream = counting_reader(vec![1, 2, 3], pulls.clone());

        let mapped = Map::from_parts(Some(upstream), None::<fn(i32) -> i32>);
        assert!(read_all(mapped, &token).await.unwrap().is_empty());
        assert_eq!(pulls.load(Ordering::SeqCst), 0);

        let missing = Map::from_parts(None::<VecReader<i32>>, Some(|x: i32| x + 1));
        assert!(read_all(missing, &token).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_map_pulls_once_per_read() {
        let token = CancellationToken::new();
        let pulls = Arc::new(AtomicUsize::new(0));
        let mut mapped = counting_reader(vec![1, 2, 3], pulls.clone()).map(|x| x * 2);

        assert_eq!(pulls.load(Ordering::SeqCst), 0);
        assert_eq!(mapped.read(&token).await.unwrap(), Some(2));
        assert_eq!(pulls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_errors_propagate_through_combinators() {
        let token = CancellationToken::new();
        let failing = from_fn(|_| async { Err::<Option<i32>, _>(Error::custom("boom")) });
        let mut chain = failing.filter(|_| true).map(|x| x + 1);
        assert!(chain.read(&token).await.is_err());
    }

    #[tokio::test]
    async fn test_reduce_sums() {
        let token = CancellationToken::new();
        let sum: i32 = reduce(VecReader::new(vec![1, 2, 3]), &token, |acc, x| acc + x)
            .await
            .unwrap();
        assert_eq!(sum, 6);
    }

    #[tokio::test]
    async fn test_reduce_missing_parts_is_zero() {
        let token = CancellationToken::new();
        let add = |acc: i32, x: i32| acc + x;
        let sum: i32 = reduce_parts(None::<VecReader<i32>>, &token, Some(add))
            .await
            .unwrap();
        assert_eq!(sum, 0);

        let sum: i32 = reduce_parts(
            Some(VecReader::new(vec![1, 2])),
            &token,
            None::<fn(i32, i32) -> i32>,
        )
        .await
        .unwrap();
        assert_eq!(sum, 0);

        let empty: i32 = reduce(VecReader::new(vec![]), &token, |acc, x: i32| acc + x)
            .await
            .unwrap();
        assert_eq!(empty, 0);
    }

    #[tokio::test]
    async fn test_filter_writer() {
        let token = CancellationToken::new();
        let collected = CollectWriter::new();
        let mut writer = collected.clone().filter(|x: &i32| *x > 1);

        for x in [1, 2, 3] {
            writer.write(&token, x).await.unwrap();
        }
        assert_eq!(collected.into_items().await, vec![2, 3]);
    }

    #[tokio::test]
    async fn test_map_writer() {
        let token = CancellationToken::new();
        let collected = CollectWriter::new();
        let mut writer = collected.clone().contramap(|x: i32| format!("#{x}"));

        writer.write(&token, 4).await.unwrap();
        assert_eq!(collected.into_items().await, vec!["#4".to_string()]);

        let mut closed =
            MapWriter::from_parts(CollectWriter::<String>::new(), None::<fn(i32) -> String>);
        assert!(matches!(closed.write(&token, 1).await, Err(Error::ClosedPipe)));
    }
}
