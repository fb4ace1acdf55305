//! Core traits and types for the seqio library.
//!
//! This module contains the reader/writer protocol and the error type that
//! every stage in the crate shares.

pub mod error;
pub mod traits;

// Re-export core items
pub use error::{Error, IntoError, Result};
pub use traits::{ChunkWriterExt, Reader, ReaderExt, Writer, WriterExt};
