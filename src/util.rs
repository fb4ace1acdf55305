//! Utility functions and helper types.

use async_trait::async_trait;
use std::future::Future;
use tokio_util::sync::CancellationToken;

use crate::core::{Error, Reader, Result, Writer};

/// Helper function to create a simple reader from a function.
///
/// The function receives a clone of the token passed to `read`.
pub fn from_fn<F, Fut, T>(f: F) -> FnReader<F, Fut, T>
where
    F: FnMut(CancellationToken) -> Fut + Send,
    Fut: Future<Output = Result<Option<T>>> + Send,
    T: Send + 'static,
{
    FnReader {
        f,
        _phantom: std::marker::PhantomData,
    }
}

/// A reader created from a function
pub struct FnReader<F, Fut, T> {
    f: F,
    _phantom: std::marker::PhantomData<fn() -> (Fut, T)>,
}

#[async_trait]
impl<F, Fut, T> Reader for FnReader<F, Fut, T>
where
    F: FnMut(CancellationToken) -> Fut + Send,
    Fut: Future<Output = Result<Option<T>>> + Send,
    T: Send + 'static,
{
    type Item = T;

    async fn read(&mut self, token: &CancellationToken) -> Result<Option<Self::Item>> {
        (self.f)(token.clone()).await
    }
}

/// Helper function to create a simple writer from a function
pub fn writer_from_fn<F, Fut, T>(f: F) -> FnWriter<F, Fut, T>
where
    F: FnMut(CancellationToken, T) -> Fut + Send,
    Fut: Future<Output = Result<()>> + Send,
    T: Send + 'static,
{
    FnWriter {
        f,
        _phantom: std::marker::PhantomData,
    }
}

/// A writer created from a function
pub struct FnWriter<F, Fut, T> {
    f: F,
    _phantom: std::marker::PhantomData<fn(T) -> Fut>,
}

#[async_trait]
impl<F, Fut, T> Writer for FnWriter<F, Fut, T>
where
    F: FnMut(CancellationToken, T) -> Fut + Send,
    Fut: Future<Output = Result<()>> + Send,
    T: Send + 'static,
{
    type Item = T;

    async fn write(&mut self, token: &CancellationToken, item: Self::Item) -> Result<()> {
        (self.f)(token.clone(), item).await
    }
}

/// Run `future` unless `token` fires first, in which case the future is
/// dropped and `Error::Cancelled` is returned.
pub async fn cancellable<F: Future>(token: &CancellationToken, future: F) -> Result<F::Output> {
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(Error::Cancelled),
        output = future => Ok(output),
    }
}

/// Drain a reader into a vector, stopping at the first error
pub async fn read_all<R>(mut reader: R, token: &CancellationToken) -> Result<Vec<R::Item>>
where
    R: Reader + Send,
{
    let mut items = Vec::new();
    while let Some(item) = reader.read(token).await? {
        items.push(item);
    }
    Ok(items)
}

/// Write every item in order, stopping at the first error
pub async fn write_all<W, I>(writer: &mut W, token: &CancellationToken, items: I) -> Result<()>
where
    W: Writer + Send + ?Sized,
    I: IntoIterator<Item = W::Item>,
{
    for item in items {
        writer.write(token, item).await?;
    }
    Ok(())
}
