//! Async line transport for a link.
//!
//! A thin tokio-util codec plus a driver loop. The codec speaks
//! CRLF-delimited lines with a length cap; the driver pumps inbound lines
//! through [`Link::feed_line`] and flushes the session outbox after every
//! frame. Socket setup, TLS and reconnection policy stay with the caller.

use bytes::{BufMut, BytesMut};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Decoder, Encoder, Framed};
use tracing::{debug, warn};

use crate::error::ProtocolError;
use crate::link::Link;

/// Longest line we will buffer before calling the peer broken.
pub const MAX_LINE_LEN: usize = 8191;

/// CRLF line codec with a length cap. Decodes to raw `String` lines
/// (frame parsing happens in the session, where malformed lines are
/// dropped rather than fatal).
#[derive(Debug, Default)]
pub struct LineCodec {
    scanned: usize,
}

impl LineCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>, ProtocolError> {
        if let Some(pos) = src[self.scanned..].iter().position(|b| *b == b'\n') {
            let pos = self.scanned + pos;
            let mut line = src.split_to(pos + 1);
            self.scanned = 0;
            line.truncate(pos);
            if line.last() == Some(&b'\r') {
                line.truncate(line.len() - 1);
            }
            let line = String::from_utf8_lossy(&line).into_owned();
            return Ok(Some(line));
        }
        self.scanned = src.len();
        if src.len() > MAX_LINE_LEN {
            return Err(ProtocolError::LineTooLong(src.len()));
        }
        Ok(None)
    }
}

impl Encoder<String> for LineCodec {
    type Error = ProtocolError;

    fn encode(&mut self, line: String, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        dst.reserve(line.len() + 2);
        dst.put_slice(line.as_bytes());
        dst.put_slice(b"\r\n");
        Ok(())
    }
}

/// Drive a link over a connected stream until the peer closes or a fatal
/// protocol error ends the session. The link's state store is released
/// with the link when this returns.
pub async fn run_link<S>(link: &mut Link, stream: S) -> Result<(), ProtocolError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = Framed::new(stream, LineCodec::new());

    link.start()?;
    flush(link, &mut framed).await?;

    while let Some(line) = framed.next().await {
        let line = match line {
            Ok(line) => line,
            Err(ProtocolError::Io(err)) => return Err(ProtocolError::Io(err)),
            Err(err) => {
                warn!(%err, "transport read error, closing link");
                return Err(err);
            }
        };
        debug!(line = %line, "inbound");
        let outcome = link.feed_line(&line);
        flush(link, &mut framed).await?;
        outcome?;
    }
    debug!("peer closed the connection");
    Ok(())
}

async fn flush<S>(link: &mut Link, framed: &mut Framed<S, LineCodec>) -> Result<(), ProtocolError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    for line in link.drain_outbox() {
        framed.send(line).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_lines_and_cr_stripping() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(&b":70M PING 70M 0AL\r\nCAPAB END\nleftover"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some(":70M PING 70M 0AL"));
        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("CAPAB END"));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert_eq!(&buf[..], b"leftover");
    }

    #[test]
    fn test_decode_rejects_oversized_line() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(vec![b'a'; MAX_LINE_LEN + 1].as_slice());
        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProtocolError::LineTooLong(_))
        ));
    }

    #[test]
    fn test_encode_appends_crlf() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(":0AL ENDBURST".to_string(), &mut buf).unwrap();
        assert_eq!(&buf[..], b":0AL ENDBURST\r\n");
    }
}
