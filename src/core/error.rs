//! Error types for the reader/writer system.

use std::sync::Arc;

use thiserror::Error as ThisError;

/// The main error type for readers, writers and the stages built on them.
///
/// End-of-stream is not an error: readers report it as `Ok(None)`.
#[derive(Debug, Clone, ThisError)]
pub enum Error {
    /// The underlying byte transport failed
    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),

    /// Bytes could not be decoded, or a value could not be encoded
    #[error("Codec error: {0}")]
    Codec(Arc<dyn std::error::Error + Send + Sync>),

    /// A write reached a writer with nothing behind it
    #[error("write on closed pipe")]
    ClosedPipe,

    /// The reader or writer was used after `close`
    #[error("use of closed reader/writer")]
    Closed,

    /// The cancellation token fired while an operation was pending
    #[error("operation cancelled")]
    Cancelled,

    /// An operation timed out
    #[error("Operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// A stage was built with arguments it cannot run with
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// A reader failed to produce an item
    #[error("Reader error: {0}")]
    Reader(Arc<dyn std::error::Error + Send + Sync>),

    /// A writer failed to accept an item
    #[error("Writer error: {0}")]
    Writer(Arc<dyn std::error::Error + Send + Sync>),

    /// A custom error with a message
    #[error("{0}")]
    Custom(String),
}

// Convenience constructors
impl Error {
    /// Create a codec error from any error type
    pub fn codec<E: std::error::Error + Send + Sync + 'static>(error: E) -> Self {
        Error::Codec(Arc::new(error))
    }

    /// Create a reader error from any error type
    pub fn reader<E: std::error::Error + Send + Sync + 'static>(error: E) -> Self {
        Error::Reader(Arc::new(error))
    }

    /// Create a writer error from any error type
    pub fn writer<E: std::error::Error + Send + Sync + 'static>(error: E) -> Self {
        Error::Writer(Arc::new(error))
    }

    /// Create a timeout error
    pub fn timeout(duration_ms: u64) -> Self {
        Error::Timeout { duration_ms }
    }

    /// Create a configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Error::Config(message.into())
    }

    /// Create a custom error with a message
    pub fn custom<S: Into<String>>(message: S) -> Self {
        Error::Custom(message.into())
    }

    /// Whether this error came from the byte transport rather than the data
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Io(_))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(Arc::new(err))
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Codec(Arc::new(err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Codec(Arc::new(err))
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for Error {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        Error::ClosedPipe
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Custom(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Custom(s.to_string())
    }
}

/// Convenience type alias for Results in this crate
pub type Result<T> = std::result::Result<T, Error>;

/// Helper trait for converting foreign errors into our Error type
pub trait IntoError<T> {
    fn into_reader_error(self) -> Result<T>;
    fn into_writer_error(self) -> Result<T>;
    fn into_codec_error(self) -> Result<T>;
}

impl<T, E> IntoError<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn into_reader_error(self) -> Result<T> {
        self.map_err(Error::reader)
    }

    fn into_writer_error(self) -> Result<T> {
        self.map_err(Error::writer)
    }

    fn into_codec_error(self) -> Result<T> {
        self.map_err(Error::codec)
    }
}
