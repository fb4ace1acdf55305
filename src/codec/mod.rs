//! Codec adapters between byte transports and typed readers/writers.
//!
//! Any `tokio_util::codec` [`Decoder`] or [`Encoder`] can be plugged in; the
//! constructors named `new` use the lossless [`BinaryCodec`], and
//! `with_codec` takes an injected one such as [`JsonLinesCodec`].
//!
//! | adapter          | input           | output           |
//! |------------------|-----------------|------------------|
//! | [`DecodeReader`] | `AsyncRead`     | `Reader<Item=T>` |
//! | [`EncodeWriter`] | `Writer<Item=T>`| `AsyncWrite`     |
//! | [`EncodeReader`] | `Reader<Item=T>`| `AsyncRead`      |
//! | [`DecodeWriter`] | `Writer<Bytes>` | `Writer<Item=T>` |
//! | [`DecodeSink`]   | `AsyncWrite`    | `Writer<Item=T>` |
//!
//! [`FramedDuplex`] covers a two-way transport such as a socket: it reads
//! decoded values of one type and writes encoded values of another, with a
//! single close for both directions.
//!
//! Clean end of input is end-of-stream. Input that stops inside a frame is a
//! codec error. Every adapter forwards `close` once; afterwards reads, writes
//! and further closes fail with [`Error::Closed`].

mod formats;

pub use formats::{BinaryCodec, JsonLinesCodec, TruncatedFrame};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::stream::{self, Stream};
use futures::SinkExt;
use std::future::Future;
use std::io;
use std::marker::PhantomData;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf, ReadHalf, WriteHalf};
use tokio_stream::StreamExt;
use tokio_util::codec::{Decoder, Encoder, FramedRead, FramedWrite};
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::core::{Error, Reader, Result, Writer};

/// Reader of values decoded from a byte source
pub struct DecodeReader<R, D> {
    framed: Option<FramedRead<R, D>>,
}

impl<R, T> DecodeReader<R, BinaryCodec<T>>
where
    R: AsyncRead,
{
    /// Decode values written by [`BinaryCodec`]
    pub fn new(source: R) -> Self {
        Self::with_codec(source, BinaryCodec::new())
    }
}

impl<R, D> DecodeReader<R, D>
where
    R: AsyncRead,
{
    /// Decode values with an injected codec
    pub fn with_codec(source: R, decoder: D) -> Self {
        Self {
            framed: Some(FramedRead::new(source, decoder)),
        }
    }
}

#[async_trait]
impl<R, D> Reader for DecodeReader<R, D>
where
    R: AsyncRead + Unpin + Send,
    D: Decoder + Send + Unpin,
    D::Item: Send + 'static,
    D::Error: Into<Error>,
{
    type Item = D::Item;

    async fn read(&mut self, token: &CancellationToken) -> Result<Option<Self::Item>> {
        let framed = self.framed.as_mut().ok_or(Error::Closed)?;
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(Error::Cancelled),
            next = framed.next() => next.transpose().map_err(Into::into),
        }
    }

    async fn close(&mut self) -> Result<()> {
        let framed = self.framed.take().ok_or(Error::Closed)?;
        debug!(buffered = framed.read_buffer().len(), "closing decode reader");
        drop(framed);
        Ok(())
    }
}

/// Writer that encodes values onto a byte sink.
///
/// Each write is flushed through to the sink before it returns.
pub struct EncodeWriter<W, E, T> {
    framed: Option<FramedWrite<W, E>>,
    _phantom: PhantomData<fn(T)>,
}

impl<W, T> EncodeWriter<W, BinaryCodec<T>, T>
where
    W: AsyncWrite,
{
    /// Encode values with [`BinaryCodec`]
    pub fn new(sink: W) -> Self {
        Self::with_codec(sink, BinaryCodec::new())
    }
}

impl<W, E, T> EncodeWriter<W, E, T>
where
    W: AsyncWrite,
{
    /// Encode values with an injected codec
    pub fn with_codec(sink: W, encoder: E) -> Self {
        Self {
            framed: Some(FramedWrite::new(sink, encoder)),
            _phantom: PhantomData,
        }
    }
}

#[async_trait]
impl<W, E, T> Writer for EncodeWriter<W, E, T>
where
    W: AsyncWrite + Unpin + Send,
    E: Encoder<T> + Send + Unpin,
    E::Error: From<io::Error> + Into<Error>,
    T: Send + 'static,
{
    type Item = T;

    async fn write(&mut self, token: &CancellationToken, item: Self::Item) -> Result<()> {
        let framed = self.framed.as_mut().ok_or(Error::Closed)?;
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(Error::Cancelled),
            sent = framed.send(item) => sent.map_err(Into::into),
        }
    }

    async fn close(&mut self) -> Result<()> {
        let mut framed = self.framed.take().ok_or(Error::Closed)?;
        debug!("closing encode writer");
        SinkExt::<T>::close(&mut framed).await.map_err(Into::into)
    }
}

type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// Byte source that encodes the values of a reader on demand.
///
/// The reader is pulled only as fast as the bytes are consumed. A reader or
/// codec error surfaces as an `io::Error` of kind `Other`. The reader is
/// closed once it reports end-of-stream.
pub struct EncodeReader {
    inner: StreamReader<ByteStream, Bytes>,
}

impl EncodeReader {
    /// Encode the values of `reader` with [`BinaryCodec`]
    pub fn new<R>(reader: R, token: CancellationToken) -> Self
    where
        R: Reader + Send + 'static,
        R::Item: serde::Serialize,
    {
        Self::with_codec(reader, BinaryCodec::new(), token)
    }

    /// Encode the values of `reader` with an injected codec
    pub fn with_codec<R, E>(reader: R, encoder: E, token: CancellationToken) -> Self
    where
        R: Reader + Send + 'static,
        E: Encoder<R::Item> + Send + 'static,
        E::Error: Into<Error>,
    {
        let chunks = stream::unfold(Some((reader, encoder, token)), |state| async move {
            let Some((mut reader, mut encoder, token)) = state else {
                return None;
            };
            match reader.read(&token).await {
                Ok(Some(item)) => {
                    let mut buf = BytesMut::new();
                    match encoder.encode(item, &mut buf) {
                        Ok(()) => Some((Ok(buf.freeze()), Some((reader, encoder, token)))),
                        Err(e) => Some((Err(into_io_error(e.into())), None)),
                    }
                }
                Ok(None) => match reader.close().await {
                    Ok(()) => None,
                    Err(e) => Some((Err(into_io_error(e)), None)),
                },
                Err(e) => Some((Err(into_io_error(e)), None)),
            }
        });

        Self {
            inner: StreamReader::new(Box::pin(chunks) as ByteStream),
        }
    }
}

impl AsyncRead for EncodeReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

fn into_io_error(error: Error) -> io::Error {
    io::Error::new(io::ErrorKind::Other, error)
}

/// Writer of raw byte chunks that decodes them into values for `writer`.
///
/// Chunks may split frames anywhere; incomplete frames wait in a buffer
/// until the rest arrives. On close, bytes that do not form a complete frame
/// are a codec error.
pub struct DecodeWriter<W, D> {
    writer: W,
    decoder: D,
    buffer: BytesMut,
    closed: bool,
}

impl<W, T> DecodeWriter<W, BinaryCodec<T>> {
    /// Decode chunks written by [`BinaryCodec`]
    pub fn new(writer: W) -> Self {
        Self::with_codec(writer, BinaryCodec::new())
    }
}

impl<W, D> DecodeWriter<W, D> {
    /// Decode chunks with an injected codec
    pub fn with_codec(writer: W, decoder: D) -> Self {
        Self {
            writer,
            decoder,
            buffer: BytesMut::new(),
            closed: false,
        }
    }

    /// Bytes waiting for the rest of their frame
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

impl<W, D> DecodeWriter<W, D>
where
    W: Writer + Send + 'static,
    D: Decoder<Item = W::Item> + Send + 'static,
    D::Error: Into<Error>,
{
    /// Expose this writer as an `AsyncWrite` byte sink
    pub fn into_async_write(self, token: CancellationToken) -> DecodeSink<W, D> {
        DecodeSink::new(self, token)
    }
}

#[async_trait]
impl<W, D> Writer for DecodeWriter<W, D>
where
    W: Writer + Send,
    D: Decoder<Item = W::Item> + Send,
    D::Error: Into<Error>,
{
    type Item = Bytes;

    async fn write(&mut self, token: &CancellationToken, chunk: Self::Item) -> Result<()> {
        if self.closed {
            return Err(Error::Closed);
        }
        self.buffer.extend_from_slice(&chunk);
        while let Some(item) = self.decoder.decode(&mut self.buffer).map_err(Into::into)? {
            self.writer.write(token, item).await?;
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Err(Error::Closed);
        }
        self.closed = true;

        let token = CancellationToken::new();
        while let Some(item) = self
            .decoder
            .decode_eof(&mut self.buffer)
            .map_err(Into::into)?
        {
            self.writer.write(&token, item).await?;
        }
        self.writer.close().await
    }
}

type PendingWrite<W, D> =
    Pin<Box<dyn Future<Output = (Box<DecodeWriter<W, D>>, Result<()>)> + Send>>;
type PendingClose = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

enum SinkState<W, D> {
    Idle(Box<DecodeWriter<W, D>>),
    Writing(PendingWrite<W, D>),
    Closing(PendingClose),
    Closed,
}

/// `AsyncWrite` front for a [`DecodeWriter`], so it can be the target of
/// `tokio::io::copy` and friends.
///
/// A chunk is accepted as soon as the previous one has been decoded and
/// written; an error from the wrapped writer surfaces on the next write,
/// flush or shutdown as an `io::Error` of kind `Other`. Shutdown closes the
/// `DecodeWriter`, so a trailing partial frame fails it.
pub struct DecodeSink<W, D> {
    state: SinkState<W, D>,
    token: CancellationToken,
}

impl<W, D> DecodeSink<W, D>
where
    W: Writer + Send + 'static,
    D: Decoder<Item = W::Item> + Send + 'static,
    D::Error: Into<Error>,
{
    /// Wrap `writer`; `token` is passed to every write
    pub fn new(writer: DecodeWriter<W, D>, token: CancellationToken) -> Self {
        Self {
            state: SinkState::Idle(Box::new(writer)),
            token,
        }
    }

    fn poll_writing(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        if let SinkState::Writing(pending) = &mut self.state {
            let (writer, result) = ready!(pending.as_mut().poll(cx));
            self.state = SinkState::Idle(writer);
            if let Err(e) = result {
                return Poll::Ready(Err(into_io_error(e)));
            }
        }
        Poll::Ready(Ok(()))
    }
}

impl<W, D> AsyncWrite for DecodeSink<W, D>
where
    W: Writer + Send + 'static,
    D: Decoder<Item = W::Item> + Send + 'static,
    D::Error: Into<Error>,
{
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        ready!(this.poll_writing(cx))?;

        let mut writer = match std::mem::replace(&mut this.state, SinkState::Closed) {
            SinkState::Idle(writer) => writer,
            other => {
                this.state = other;
                return Poll::Ready(Err(into_io_error(Error::Closed)));
            }
        };
        let chunk = Bytes::copy_from_slice(buf);
        let token = this.token.clone();
        this.state = SinkState::Writing(Box::pin(async move {
            let result = writer.write(&token, chunk).await;
            (writer, result)
        }));
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.get_mut().poll_writing(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            match std::mem::replace(&mut this.state, SinkState::Closed) {
                SinkState::Writing(pending) => {
                    this.state = SinkState::Writing(pending);
                    ready!(this.poll_writing(cx))?;
                }
                SinkState::Idle(mut writer) => {
                    let close = async move { writer.close().await };
                    this.state = SinkState::Closing(Box::pin(close));
                }
                SinkState::Closing(mut pending) => {
                    return match pending.as_mut().poll(cx) {
                        Poll::Ready(result) => Poll::Ready(result.map_err(into_io_error)),
                        Poll::Pending => {
                            this.state = SinkState::Closing(pending);
                            Poll::Pending
                        }
                    };
                }
                SinkState::Closed => return Poll::Ready(Err(into_io_error(Error::Closed))),
            }
        }
    }
}

/// Reader and writer over one two-way byte transport.
///
/// Reads decode values with `D`; writes encode values of type `U` with `E`.
/// Closing through either trait flushes and shuts down the write side and
/// drops the transport; afterwards both directions fail with
/// [`Error::Closed`].
pub struct FramedDuplex<S, D, E, U> {
    halves: Option<(FramedRead<ReadHalf<S>, D>, FramedWrite<WriteHalf<S>, E>)>,
    _phantom: PhantomData<fn(U)>,
}

impl<S, T, U> FramedDuplex<S, BinaryCodec<T>, BinaryCodec<U>, U>
where
    S: AsyncRead + AsyncWrite,
{
    /// Use [`BinaryCodec`] in both directions
    pub fn new(transport: S) -> Self {
        Self::with_codecs(transport, BinaryCodec::new(), BinaryCodec::new())
    }
}

impl<S, D, E, U> FramedDuplex<S, D, E, U>
where
    S: AsyncRead + AsyncWrite,
{
    /// Use injected codecs for each direction
    pub fn with_codecs(transport: S, decoder: D, encoder: E) -> Self {
        let (read, write) = tokio::io::split(transport);
        Self {
            halves: Some((
                FramedRead::new(read, decoder),
                FramedWrite::new(write, encoder),
            )),
            _phantom: PhantomData,
        }
    }
}

impl<S, D, E, U> FramedDuplex<S, D, E, U>
where
    S: AsyncRead + AsyncWrite + Send,
    E: Encoder<U> + Send + Unpin,
    E::Error: From<io::Error> + Into<Error>,
{
    async fn shutdown(&mut self) -> Result<()> {
        let (read, mut write) = self.halves.take().ok_or(Error::Closed)?;
        debug!(buffered = read.read_buffer().len(), "closing framed duplex");
        drop(read);
        SinkExt::<U>::close(&mut write).await.map_err(Into::into)
    }
}

#[async_trait]
impl<S, D, E, U> Reader for FramedDuplex<S, D, E, U>
where
    S: AsyncRead + AsyncWrite + Send,
    D: Decoder + Send + Unpin,
    D::Item: Send + 'static,
    D::Error: Into<Error>,
    E: Encoder<U> + Send + Unpin,
    E::Error: From<io::Error> + Into<Error>,
    U: Send + 'static,
{
    type Item = D::Item;

    async fn read(&mut self, token: &CancellationToken) -> Result<Option<Self::Item>> {
        let (read, _) = self.halves.as_mut().ok_or(Error::Closed)?;
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(Error::Cancelled),
            next = read.next() => next.transpose().map_err(Into::into),
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.shutdown().await
    }
}

#[async_trait]
impl<S, D, E, U> Writer for FramedDuplex<S, D, E, U>
where
    S: AsyncRead + AsyncWrite + Send,
    D: Send,
    E: Encoder<U> + Send + Unpin,
    E::Error: From<io::Error> + Into<Error>,
    U: Send + 'static,
{
    type Item = U;

    async fn write(&mut self, token: &CancellationToken, item: Self::Item) -> Result<()> {
        let (_, write) = self.halves.as_mut().ok_or(Error::Closed)?;
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(Error::Cancelled),
            sent = write.send(item) => sent.map_err(Into::into),
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.shutdown().await
    }
}

/// Decode every value from `source` and write it to `writer`.
///
/// The writer is not closed. Returns the number of values written.
pub async fn pipe_bytes_to_writer<S, D, W>(
    token: &CancellationToken,
    source: S,
    decoder: D,
    writer: &mut W,
) -> Result<usize>
where
    S: AsyncRead + Unpin + Send,
    D: Decoder<Item = W::Item> + Send + Unpin,
    D::Error: Into<Error>,
    W: Writer + Send + ?Sized,
{
    let mut values = DecodeReader::with_codec(source, decoder);
    let mut count = 0;
    while let Some(item) = values.read(token).await? {
        writer.write(token, item).await?;
        count += 1;
    }
    Ok(count)
}

/// Read every value from `reader` and encode it onto `sink`.
///
/// The sink is flushed but not shut down, and the reader is not closed.
/// Returns the number of values encoded.
pub async fn pipe_reader_to_bytes<R, E, S>(
    token: &CancellationToken,
    reader: &mut R,
    encoder: E,
    sink: &mut S,
) -> Result<usize>
where
    R: Reader + Send + ?Sized,
    E: Encoder<R::Item> + Send,
    E::Error: Into<Error>,
    S: AsyncWrite + Unpin + Send + ?Sized,
{
    let mut encoder = encoder;
    let mut buf = BytesMut::new();
    let mut count = 0;
    while let Some(item) = reader.read(token).await? {
        encoder.encode(item, &mut buf).map_err(Into::into)?;
        sink.write_all(&buf).await?;
        buf.clear();
        count += 1;
    }
    sink.flush().await?;
    Ok(count)
}
