//! Request body framing.
//!
//! A request body is delimited either by `Content-Length` or by the chunked
//! transfer-coding (RFC 9112 §7.1). [`BodyLength`] names the framing a request
//! head declared; [`ChunkedDecoder`] incrementally strips chunk framing from a
//! connection read buffer.

use bytes::{Buf, Bytes, BytesMut};

use super::request::RequestError;

/// How the body of a request is delimited on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyLength {
    /// No `Content-Length` and no `Transfer-Encoding`: the body is empty.
    Empty,
    /// Exactly this many bytes follow the head.
    Fixed(usize),
    /// The body uses the chunked transfer-coding.
    Chunked,
}

/// Longest chunk-size line (size plus extensions) we buffer before giving up.
const MAX_CHUNK_LINE: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkState {
    Size,
    Data { remaining: u64 },
    DataEnd,
    Trailer,
    Done,
}

/// Incremental decoder for a chunked request body.
///
/// Feed it the connection buffer whenever new bytes arrive; it consumes the
/// bytes it understands and leaves the rest (the start of the next request
/// included) untouched.
///
/// # Examples
///
/// ```
/// use bytes::BytesMut;
/// use wicket::http::ChunkedDecoder;
///
/// let mut decoder = ChunkedDecoder::new(1024, 1024);
/// let mut buf = BytesMut::from(&b"5\r\nhello\r\n6;ext=1\r\n world\r\n0\r\n\r\nGET"[..]);
/// let body = decoder.decode(&mut buf).unwrap().unwrap();
/// assert_eq!(&body[..], b"hello world");
/// assert_eq!(&buf[..], b"GET");
/// ```
#[derive(Debug)]
pub struct ChunkedDecoder {
    state: ChunkState,
    body: BytesMut,
    max_body_size: usize,
    trailer_bytes: usize,
    max_trailer_size: usize,
}

impl ChunkedDecoder {
    /// Creates a decoder that rejects bodies over `max_body_size` decoded bytes
    /// and trailer sections over `max_trailer_size` bytes.
    pub fn new(max_body_size: usize, max_trailer_size: usize) -> Self {
        Self {
            state: ChunkState::Size,
            body: BytesMut::new(),
            max_body_size,
            trailer_bytes: 0,
            max_trailer_size,
        }
    }

    /// Returns `true` once the terminating chunk and trailer section were consumed.
    pub fn is_done(&self) -> bool {
        self.state == ChunkState::Done
    }

    /// Consumes framing and payload bytes from the front of `buf`.
    ///
    /// Returns `Ok(Some(body))` when the body is complete, `Ok(None)` when more
    /// bytes are needed.
    ///
    /// # Errors
    ///
    /// - [`RequestError::InvalidChunk`]: malformed size line, missing CRLF
    ///   after chunk data, or oversized trailer section.
    /// - [`RequestError::BodyTooLarge`]: decoded size exceeds the limit.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Bytes>, RequestError> {
        loop {
            match self.state {
                ChunkState::Size => match httparse::parse_chunk_size(&buf[..]) {
                    Ok(httparse::Status::Complete((consumed, size))) => {
                        buf.advance(consumed);
                        if size == 0 {
                            self.state = ChunkState::Trailer;
                            continue;
                        }
                        let total = (self.body.len() as u64).saturating_add(size);
                        if total > self.max_body_size as u64 {
                            return Err(RequestError::BodyTooLarge {
                                max_bytes: self.max_body_size,
                            });
                        }
                        self.state = ChunkState::Data { remaining: size };
                    }
                    Ok(httparse::Status::Partial) => {
                        if buf.len() > MAX_CHUNK_LINE {
                            return Err(RequestError::InvalidChunk);
                        }
                        return Ok(None);
                    }
                    Err(_) => return Err(RequestError::InvalidChunk),
                },
                ChunkState::Data { remaining } => {
                    if buf.is_empty() {
                        return Ok(None);
                    }
                    let take = remaining.min(buf.len() as u64) as usize;
                    self.body.extend_from_slice(&buf.split_to(take));
                    let remaining = remaining - take as u64;
                    self.state = if remaining == 0 {
                        ChunkState::DataEnd
                    } else {
                        ChunkState::Data { remaining }
                    };
                }
                ChunkState::DataEnd => {
                    if buf.len() < 2 {
                        return Ok(None);
                    }
                    if &buf[..2] != b"\r\n" {
                        return Err(RequestError::InvalidChunk);
                    }
                    buf.advance(2);
                    self.state = ChunkState::Size;
                }
                ChunkState::Trailer => {
                    let Some(line_end) = buf.windows(2).position(|w| w == b"\r\n") else {
                        if self.trailer_bytes + buf.len() > self.max_trailer_size {
                            return Err(RequestError::InvalidChunk);
                        }
                        return Ok(None);
                    };
                    buf.advance(line_end + 2);
                    if line_end == 0 {
                        self.state = ChunkState::Done;
                        return Ok(Some(self.body.split().freeze()));
                    }
                    // Trailer fields are accepted and discarded.
                    self.trailer_bytes += line_end + 2;
                    if self.trailer_bytes > self.max_trailer_size {
                        return Err(RequestError::InvalidChunk);
                    }
                }
                ChunkState::Done => return Ok(Some(Bytes::new())),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(input: &[u8]) -> Result<Option<Bytes>, RequestError> {
        let mut decoder = ChunkedDecoder::new(1024, 256);
        let mut buf = BytesMut::from(input);
        decoder.decode(&mut buf)
    }

    #[test]
    fn single_buffer() {
        let body = decode_all(b"3\r\nabc\r\n0\r\n\r\n").unwrap().unwrap();
        assert_eq!(&body[..], b"abc");
    }

    #[test]
    fn empty_body() {
        let body = decode_all(b"0\r\n\r\n").unwrap().unwrap();
        assert!(body.is_empty());
    }

    #[test]
    fn byte_at_a_time() {
        let wire = b"4\r\nWiki\r\n5\r\npedia\r\nE\r\n in\r\n\r\nchunks.\r\n0\r\n\r\n";
        let mut decoder = ChunkedDecoder::new(1024, 256);
        let mut buf = BytesMut::new();
        let mut result = None;
        for byte in wire.iter() {
            buf.extend_from_slice(&[*byte]);
            if let Some(body) = decoder.decode(&mut buf).unwrap() {
                result = Some(body);
            }
        }
        assert!(decoder.is_done());
        assert_eq!(&result.unwrap()[..], b"Wikipedia in\r\n\r\nchunks.");
    }

    #[test]
    fn extensions_and_trailers_are_skipped() {
        let body = decode_all(b"2;name=value\r\nok\r\n0\r\nX-Checksum: 1\r\nX-More: 2\r\n\r\n")
            .unwrap()
            .unwrap();
        assert_eq!(&body[..], b"ok");
    }

    #[test]
    fn leaves_following_bytes() {
        let mut decoder = ChunkedDecoder::new(1024, 256);
        let mut buf = BytesMut::from(&b"1\r\na\r\n0\r\n\r\nGET / HTTP/1.1\r\n"[..]);
        decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(&buf[..], b"GET / HTTP/1.1\r\n");
    }

    #[test]
    fn incomplete_waits_for_more() {
        assert!(decode_all(b"5\r\nhel").unwrap().is_none());
        assert!(decode_all(b"5\r\nhello\r\n").unwrap().is_none());
        assert!(decode_all(b"5\r\nhello\r\n0\r\n").unwrap().is_none());
    }

    #[test]
    fn invalid_size_line() {
        assert!(matches!(
            decode_all(b"zz\r\nabc\r\n0\r\n\r\n"),
            Err(RequestError::InvalidChunk)
        ));
    }

    #[test]
    fn missing_crlf_after_data() {
        assert!(matches!(
            decode_all(b"3\r\nabcX\r\n0\r\n\r\n"),
            Err(RequestError::InvalidChunk)
        ));
    }

    #[test]
    fn body_limit_enforced_before_buffering() {
        let mut decoder = ChunkedDecoder::new(4, 256);
        let mut buf = BytesMut::from(&b"5\r\n"[..]);
        assert!(matches!(
            decoder.decode(&mut buf),
            Err(RequestError::BodyTooLarge { max_bytes: 4 })
        ));
    }

    #[test]
    fn trailer_limit_enforced() {
        let mut decoder = ChunkedDecoder::new(1024, 8);
        let mut buf = BytesMut::from(&b"0\r\nX-Long-Trailer: value\r\n\r\n"[..]);
        assert!(matches!(
            decoder.decode(&mut buf),
            Err(RequestError::InvalidChunk)
        ));
    }
}
