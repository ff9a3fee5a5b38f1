//! `|`-delimited framing for the DC wire protocol.
//!
//! `hub.py` frames by reading raw bytes into an `incoming` list whose last
//! element is always the not-yet-terminated partial command, splitting on
//! `'|'` on every read and re-assigning `incoming = data.split('|')`. A
//! [`tokio_util::codec::Decoder`] expresses the same invariant naturally:
//! `BytesMut` retains whatever partial frame hasn't seen a `|` yet across
//! calls, and `decode` only ever returns complete frames.

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::FrameError;

/// Codec for one DC connection. `max_len` bounds how large an
/// as-yet-undelimited frame may grow before being treated as abuse (spec's
/// `maxcommandsize`).
pub struct DcCodec {
    max_len: usize,
}

impl DcCodec {
    pub fn new(max_len: usize) -> Self {
        DcCodec { max_len }
    }
}

impl Decoder for DcCodec {
    type Item = String;
    type Error = FrameError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<String>, FrameError> {
        match buf.iter().position(|&b| b == b'|') {
            Some(pos) => {
                let frame = buf.split_to(pos);
                buf.advance(1); // drop the delimiter itself
                Ok(Some(String::from_utf8_lossy(&frame).into_owned()))
            }
            None => {
                if buf.len() > self.max_len {
                    let len = buf.len();
                    buf.clear();
                    return Err(FrameError::TooLong(len));
                }
                Ok(None)
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<String>, FrameError> {
        match self.decode(buf)? {
            Some(frame) => Ok(Some(frame)),
            None if !buf.is_empty() => {
                let frame = buf.split();
                Ok(Some(String::from_utf8_lossy(&frame).into_owned()))
            }
            None => Ok(None),
        }
    }
}

impl Encoder<String> for DcCodec {
    type Error = FrameError;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<(), FrameError> {
        dst.extend_from_slice(item.as_bytes());
        dst.extend_from_slice(b"|");
        Ok(())
    }
}

impl Encoder<&str> for DcCodec {
    type Error = FrameError;

    fn encode(&mut self, item: &str, dst: &mut BytesMut) -> Result<(), FrameError> {
        dst.extend_from_slice(item.as_bytes());
        dst.extend_from_slice(b"|");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_single_complete_frame() {
        let mut codec = DcCodec::new(1024);
        let mut buf = BytesMut::from(&b"$Key abc|"[..]);
        let frame = codec.decode(&mut buf).unwrap();
        assert_eq!(frame, Some("$Key abc".to_string()));
        assert!(buf.is_empty());
    }

    #[test]
    fn holds_partial_frame_across_calls() {
        let mut codec = DcCodec::new(1024);
        let mut buf = BytesMut::from(&b"$Key ab"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        buf.extend_from_slice(b"c|");
        assert_eq!(codec.decode(&mut buf).unwrap(), Some("$Key abc".to_string()));
    }

    #[test]
    fn decodes_multiple_frames_in_one_buffer() {
        let mut codec = DcCodec::new(1024);
        let mut buf = BytesMut::from(&b"$A|$B|$C"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), Some("$A".to_string()));
        assert_eq!(codec.decode(&mut buf).unwrap(), Some("$B".to_string()));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert_eq!(buf.as_ref(), b"$C");
    }

    #[test]
    fn errors_when_partial_frame_exceeds_max_len() {
        let mut codec = DcCodec::new(4);
        let mut buf = BytesMut::from(&b"abcdefgh"[..]);
        let err = codec.decode(&mut buf).unwrap_err();
        matches!(err, FrameError::TooLong(_));
    }

    #[test]
    fn decode_eof_flushes_trailing_partial_frame() {
        let mut codec = DcCodec::new(1024);
        let mut buf = BytesMut::from(&b"$Quit"[..]);
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), Some("$Quit".to_string()));
    }

    #[test]
    fn encode_appends_pipe_delimiter() {
        let mut codec = DcCodec::new(1024);
        let mut buf = BytesMut::new();
        Encoder::<&str>::encode(&mut codec, "$Hello", &mut buf).unwrap();
        assert_eq!(buf.as_ref(), b"$Hello|");
    }
}
