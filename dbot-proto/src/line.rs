//! Implementation of line-delimiting codec for Tokio.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::error::ProtocolError;

/// A line-based codec. Incoming bytes are split at `\n`, tolerating a
/// preceding `\r`, and decoded as UTF-8 with replacement of invalid
/// sequences. Outgoing lines get CRLF appended.
#[derive(Default)]
pub struct LineCodec {
    next_index: usize,
}

impl LineCodec {
    /// Creates a new instance of `LineCodec`.
    pub fn new() -> LineCodec {
        LineCodec::default()
    }
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>, ProtocolError> {
        if let Some(offset) = src[self.next_index..].iter().position(|b| *b == b'\n') {
            // Remove the next frame from the buffer.
            let line = src.split_to(self.next_index + offset + 1);

            // Set the search start index back to 0 since we found a newline.
            self.next_index = 0;

            let mut end = line.len() - 1;
            if end > 0 && line[end - 1] == b'\r' {
                end -= 1;
            }
            Ok(Some(String::from_utf8_lossy(&line[..end]).into_owned()))
        } else {
            // Set the search start index to the current length since we know
            // that none of the characters we've already looked at are
            // newlines.
            self.next_index = src.len();
            Ok(None)
        }
    }
}

impl Encoder<String> for LineCodec {
    type Error = ProtocolError;

    fn encode(&mut self, msg: String, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        dst.extend_from_slice(msg.as_bytes());
        dst.extend_from_slice(b"\r\n");
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::LineCodec;
    use bytes::BytesMut;
    use tokio_util::codec::{Decoder, Encoder};

    #[test]
    fn decode_crlf_and_bare_lf() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(&b"PING :a\r\nPING :b\nPART"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), Some("PING :a".into()));
        assert_eq!(codec.decode(&mut buf).unwrap(), Some("PING :b".into()));
        // Incomplete frame stays buffered.
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        buf.extend_from_slice(b"\r\n");
        assert_eq!(codec.decode(&mut buf).unwrap(), Some("PART".into()));
    }

    #[test]
    fn decode_replaces_invalid_utf8() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(&b"PRIVMSG #c :a\xffb\r\n"[..]);
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some("PRIVMSG #c :a\u{fffd}b".into())
        );
    }

    #[test]
    fn decode_empty_line() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(&b"\r\n"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), Some("".into()));
    }

    #[test]
    fn encode_appends_crlf() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::new();
        codec.encode("NICK ferris".to_owned(), &mut buf).unwrap();
        assert_eq!(&buf[..], b"NICK ferris\r\n");
    }
}
