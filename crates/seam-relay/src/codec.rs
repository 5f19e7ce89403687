//! Newline-delimited frame codec for the local command socket.
//!
//! Producers write one opaque UTF-8 payload per line; the relay forwards each
//! line as-is. The codec imposes no structure beyond the delimiter.
//!
//! Frame format:
//! ```text
//! +------------------+----+
//! |  N bytes payload | \n |
//! +------------------+----+
//! ```
//!
//! A trailing `\r` before the delimiter is stripped so that tools which emit
//! CRLF line endings interoperate.

use bytes::{BufMut, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};

/// Maximum frame size (1 MiB)
const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Codec for newline-delimited opaque frames
#[derive(Debug, Default)]
pub struct FrameCodec {
    // Scan resumes here so repeated decode calls stay linear in input size.
    scanned: usize,
}

impl FrameCodec {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for FrameCodec {
    type Item = Vec<u8>;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let newline = src[self.scanned..].iter().position(|b| *b == b'\n');

        let Some(offset) = newline else {
            if src.len() > MAX_FRAME_SIZE {
                return Err(CodecError::FrameTooLarge(src.len()));
            }
            self.scanned = src.len();
            return Ok(None);
        };

        let end = self.scanned + offset;
        if end > MAX_FRAME_SIZE {
            return Err(CodecError::FrameTooLarge(end));
        }

        let mut frame = src.split_to(end + 1);
        self.scanned = 0;

        frame.truncate(frame.len() - 1);
        if frame.last() == Some(&b'\r') {
            frame.truncate(frame.len() - 1);
        }

        Ok(Some(frame.to_vec()))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }

        // A producer that exits without a trailing delimiter still gets its
        // final frame delivered.
        if src.is_empty() {
            return Ok(None);
        }

        let mut frame = src.split_to(src.len());
        self.scanned = 0;
        if frame.last() == Some(&b'\r') {
            frame.truncate(frame.len() - 1);
        }
        Ok(Some(frame.to_vec()))
    }
}

impl Encoder<Vec<u8>> for FrameCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Vec<u8>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.len() > MAX_FRAME_SIZE {
            return Err(CodecError::FrameTooLarge(item.len()));
        }
        if item.contains(&b'\n') {
            return Err(CodecError::DelimiterInFrame);
        }

        dst.reserve(item.len() + 1);
        dst.put_slice(&item);
        dst.put_u8(b'\n');

        Ok(())
    }
}

/// Errors that can occur during codec operations
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Frame too large: {0} bytes (max: {MAX_FRAME_SIZE})")]
    FrameTooLarge(usize),

    #[error("Frame contains the newline delimiter")]
    DelimiterInFrame,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_roundtrip() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();

        codec.encode(b"hello relay".to_vec(), &mut buf).unwrap();
        let decoded = codec.decode(&mut buf).unwrap().unwrap();

        assert_eq!(decoded, b"hello relay");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_partial_frame() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();

        buf.extend_from_slice(b"incompl");
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b"ete\n");
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, b"incomplete");
    }

    #[test]
    fn test_decode_multiple_frames_in_buffer() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();

        buf.extend_from_slice(b"first\nsecond\nthird\n");

        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), b"first");
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), b"second");
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), b"third");
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_strips_carriage_return() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();

        buf.extend_from_slice(b"windows line\r\n");
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, b"windows line");
    }

    #[test]
    fn test_decode_empty_line() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();

        buf.extend_from_slice(b"\n");
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn test_decode_empty_buffer() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();

        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_decode_eof_flushes_final_frame() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();

        buf.extend_from_slice(b"no trailing newline");
        assert!(codec.decode(&mut buf).unwrap().is_none());

        let decoded = codec.decode_eof(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, b"no trailing newline");
        assert!(codec.decode_eof(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_decode_eof_empty_buffer() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();

        assert!(codec.decode_eof(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_frame_too_large() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();

        buf.extend_from_slice(&vec![b'x'; MAX_FRAME_SIZE + 1]);
        let result = codec.decode(&mut buf);
        assert!(matches!(result, Err(CodecError::FrameTooLarge(_))));
    }

    #[test]
    fn test_encode_rejects_oversized_frame() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();

        let result = codec.encode(vec![b'x'; MAX_FRAME_SIZE + 1], &mut buf);
        assert!(matches!(result, Err(CodecError::FrameTooLarge(_))));
    }

    #[test]
    fn test_encode_rejects_embedded_delimiter() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();

        let result = codec.encode(b"two\nlines".to_vec(), &mut buf);
        assert!(matches!(result, Err(CodecError::DelimiterInFrame)));
    }

    #[test]
    fn test_scan_position_resets_across_frames() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();

        // Partial read advances the scan position, then the frame completes
        // and a second frame follows immediately.
        buf.extend_from_slice(b"aaaa");
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(b"bbbb\nsecond\n");

        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), b"aaaabbbb");
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), b"second");
    }

    #[test]
    fn test_codec_error_display() {
        let err = CodecError::FrameTooLarge(2_000_000);
        let msg = err.to_string();
        assert!(msg.contains("2000000"));
        assert!(msg.contains("too large"));
    }
}
