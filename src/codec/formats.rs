//! Built-in wire formats.

use bytes::{Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec, LinesCodec};

use crate::core::{Error, Result};

/// Lossless binary codec: `bincode` payloads in length-prefixed frames.
///
/// Every value is preceded by its payload length as a big-endian `u32`.
#[derive(Debug)]
pub struct BinaryCodec<T> {
    frames: LengthDelimitedCodec,
    // header consumed, payload still incomplete
    in_frame: bool,
    _phantom: PhantomData<fn() -> T>,
}

impl<T> BinaryCodec<T> {
    /// Create a new binary codec
    pub fn new() -> Self {
        Self {
            frames: LengthDelimitedCodec::new(),
            in_frame: false,
            _phantom: PhantomData,
        }
    }

    /// Reject frames whose payload is larger than `max` bytes
    pub fn max_frame_length(mut self, max: usize) -> Self {
        self.frames.set_max_frame_length(max);
        self
    }
}

impl<T> Default for BinaryCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for BinaryCodec<T> {
    fn clone(&self) -> Self {
        Self {
            frames: self.frames.clone(),
            in_frame: self.in_frame,
            _phantom: PhantomData,
        }
    }
}

impl<T: DeserializeOwned> Decoder for BinaryCodec<T> {
    type Item = T;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<T>> {
        let available = src.len();
        match self.frames.decode(src).map_err(Error::codec)? {
            Some(frame) => {
                self.in_frame = false;
                Ok(Some(bincode::deserialize(&frame)?))
            }
            None => {
                if src.len() < available {
                    self.in_frame = true;
                }
                Ok(None)
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<T>> {
        match self.decode(buf)? {
            Some(item) => Ok(Some(item)),
            None if buf.is_empty() && !self.in_frame => Ok(None),
            None => Err(Error::codec(TruncatedFrame {
                remaining: buf.len(),
            })),
        }
    }
}

impl<T: Serialize> Encoder<T> for BinaryCodec<T> {
    type Error = Error;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<()> {
        let payload = bincode::serialize(&item)?;
        self.frames.encode(Bytes::from(payload), dst)?;
        Ok(())
    }
}

/// Input ended in the middle of a frame
#[derive(Debug, thiserror::Error)]
#[error("input ended inside a frame ({remaining} bytes left over)")]
pub struct TruncatedFrame {
    /// Bytes that could not be decoded
    pub remaining: usize,
}

/// Newline-delimited JSON: one `serde_json` document per line.
///
/// Blank lines are skipped. A final line without a trailing newline is still
/// decoded.
#[derive(Debug)]
pub struct JsonLinesCodec<T> {
    lines: LinesCodec,
    _phantom: PhantomData<fn() -> T>,
}

impl<T> JsonLinesCodec<T> {
    /// Create a new JSON lines codec
    pub fn new() -> Self {
        Self {
            lines: LinesCodec::new(),
            _phantom: PhantomData,
        }
    }

    /// Reject lines longer than `max` bytes
    pub fn max_line_length(mut self, max: usize) -> Self {
        self.lines = LinesCodec::new_with_max_length(max);
        self
    }

    fn parse(line: Option<String>) -> Result<Option<Option<T>>>
    where
        T: DeserializeOwned,
    {
        match line {
            Some(line) if line.trim().is_empty() => Ok(Some(None)),
            Some(line) => Ok(Some(Some(serde_json::from_str(&line)?))),
            None => Ok(None),
        }
    }
}

impl<T> Default for JsonLinesCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for JsonLinesCodec<T> {
    fn clone(&self) -> Self {
        Self {
            lines: self.lines.clone(),
            _phantom: PhantomData,
        }
    }
}

impl<T: DeserializeOwned> Decoder for JsonLinesCodec<T> {
    type Item = T;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<T>> {
        loop {
            let line = self.lines.decode(src).map_err(Error::codec)?;
            match Self::parse(line)? {
                Some(Some(item)) => return Ok(Some(item)),
                Some(None) => continue,
                None => return Ok(None),
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<T>> {
        loop {
            let line = self.lines.decode_eof(buf).map_err(Error::codec)?;
            match Self::parse(line)? {
                Some(Some(item)) => return Ok(Some(item)),
                Some(None) => continue,
                None => return Ok(None),
            }
        }
    }
}

impl<T: Serialize> Encoder<T> for JsonLinesCodec<T> {
    type Error = Error;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<()> {
        let line = serde_json::to_string(&item)?;
        self.lines.encode(line, dst).map_err(Error::codec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Reading {
        sensor: String,
        value: f64,
    }

    fn reading(sensor: &str, value: f64) -> Reading {
        Reading {
            sensor: sensor.to_string(),
            value,
        }
    }

    #[test]
    fn test_binary_frames_are_length_prefixed() {
        let mut codec = BinaryCodec::<u32>::new();
        let mut buf = BytesMut::new();
        codec.encode(7, &mut buf).unwrap();

        assert_eq!(&buf[..4], &[0, 0, 0, 4]);
        assert_eq!(buf.len(), 8);
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(7));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_binary_waits_for_complete_frame() {
        let mut codec = BinaryCodec::<Reading>::new();
        let mut full = BytesMut::new();
        codec.encode(reading("a", 1.5), &mut full).unwrap();

        let mut partial = full.split_to(full.len() - 1);
        assert_eq!(codec.decode(&mut partial).unwrap(), None);
        assert!(matches!(
            codec.decode_eof(&mut partial),
            Err(Error::Codec(_))
        ));

        partial.unsplit(full);
        assert_eq!(codec.decode(&mut partial).unwrap(), Some(reading("a", 1.5)));
    }

    #[test]
    fn test_binary_header_without_payload_is_truncated() {
        let mut codec = BinaryCodec::<u64>::new();
        let mut buf = BytesMut::from(&[0u8, 0, 0, 8][..]);
        assert!(matches!(codec.decode_eof(&mut buf), Err(Error::Codec(_))));

        let mut codec = BinaryCodec::<u64>::new();
        let mut buf = BytesMut::new();
        codec.encode(1, &mut buf).unwrap();
        buf.extend_from_slice(&[0, 0, 0, 8]);
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), Some(1));
        assert!(matches!(codec.decode_eof(&mut buf), Err(Error::Codec(_))));
    }

    #[test]
    fn test_binary_frame_length_limit() {
        let mut buf = BytesMut::new();
        BinaryCodec::new()
            .encode("x".repeat(64), &mut buf)
            .unwrap();

        let mut codec = BinaryCodec::<String>::new().max_frame_length(16);
        assert!(matches!(codec.decode(&mut buf), Err(Error::Codec(_))));
    }

    #[test]
    fn test_binary_rejects_garbage_payload() {
        let mut codec = BinaryCodec::<String>::new();
        let mut buf = BytesMut::from(&[0u8, 0, 0, 2, 0xff, 0xff][..]);
        assert!(matches!(codec.decode(&mut buf), Err(Error::Codec(_))));
    }

    #[test]
    fn test_json_lines_skip_blank_lines() {
        let mut codec = JsonLinesCodec::<Reading>::new();
        let mut buf = BytesMut::from(
            "{\"sensor\":\"a\",\"value\":1.0}\n\n  \n{\"sensor\":\"b\",\"value\":2.0}",
        );

        assert_eq!(codec.decode(&mut buf).unwrap(), Some(reading("a", 1.0)));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), Some(reading("b", 2.0)));
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_json_lines_encode() {
        let mut codec = JsonLinesCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(reading("a", 0.5), &mut buf).unwrap();
        assert_eq!(&buf[..], b"{\"sensor\":\"a\",\"value\":0.5}\n");
    }

    #[test]
    fn test_json_lines_line_length_limit() {
        let mut codec = JsonLinesCodec::<Reading>::new().max_line_length(16);
        let mut buf = BytesMut::from("{\"sensor\":\"far too long\",\"value\":1.0}\n");
        assert!(matches!(codec.decode(&mut buf), Err(Error::Codec(_))));
    }

    #[test]
    fn test_json_lines_malformed_is_codec_error() {
        let mut codec = JsonLinesCodec::<Reading>::new();
        let mut buf = BytesMut::from("{not json}\n");
        assert!(matches!(codec.decode(&mut buf), Err(Error::Codec(_))));
    }
}
