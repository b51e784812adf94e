//! HTTP/1.1 request parsing using the [`httparse`] crate.

use std::net::SocketAddr;
use std::str;

use bytes::Bytes;
use thiserror::Error;
use tokio::time::Instant;

use super::{BodyLength, Headers, Method};
use crate::router::{ParamValue, PathParams};

/// Errors that can occur while parsing an HTTP/1.1 request or its body.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request is incomplete: more data needed")]
    Incomplete,

    #[error("HTTP parse error: {0}")]
    Parse(#[from] httparse::Error),

    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("request head exceeds maximum allowed size of {max_bytes} bytes")]
    HeadTooLarge { max_bytes: usize },

    #[error("invalid Content-Length header")]
    InvalidContentLength,

    #[error("both Transfer-Encoding and Content-Length are present")]
    ConflictingFraming,

    #[error("unsupported transfer coding: {coding}")]
    UnsupportedTransferEncoding { coding: String },

    #[error("malformed chunked body")]
    InvalidChunk,

    #[error("request body exceeds maximum allowed size of {max_bytes} bytes")]
    BodyTooLarge { max_bytes: usize },

    #[error("expected content type {expected}")]
    UnsupportedMediaType { expected: &'static str },

    #[error("request body is not valid UTF-8: {0}")]
    Utf8(#[from] str::Utf8Error),

    #[error("invalid JSON body: {0}")]
    Json(#[from] serde_json::Error),
}

impl RequestError {
    /// Returns `true` when the error came from too many header fields, which
    /// is answered with `431` rather than `400`.
    pub fn is_too_many_headers(&self) -> bool {
        matches!(self, Self::Parse(httparse::Error::TooManyHeaders))
    }
}

/// An ordered multimap of decoded `application/x-www-form-urlencoded` pairs.
///
/// Used both for the query string and for urlencoded form bodies. Keys may
/// repeat; [`get`](Self::get) returns the first value.
///
/// # Examples
///
/// ```
/// use wicket::http::QueryParams;
///
/// let q = QueryParams::parse("tag=a&tag=b&name=J%C3%BCrgen+S");
/// assert_eq!(q.get("name"), Some("Jürgen S"));
/// assert_eq!(q.get_all("tag").collect::<Vec<_>>(), vec!["a", "b"]);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams {
    pairs: Vec<(String, String)>,
}

impl QueryParams {
    /// Parses `key=value&key2=value2`, decoding `+` and percent-escapes.
    ///
    /// Pairs whose escapes do not decode to UTF-8 are dropped.
    pub fn parse(query: &str) -> Self {
        let pairs = query
            .split('&')
            .filter(|pair| !pair.is_empty())
            .filter_map(|pair| {
                let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
                Some((decode_component(key)?, decode_component(value)?))
            })
            .collect();
        Self { pairs }
    }

    /// Returns the first value for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Returns every value for `key` in order.
    pub fn get_all<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.pairs
            .iter()
            .filter(move |(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Returns `true` if `key` appears at least once.
    pub fn contains(&self, key: &str) -> bool {
        self.pairs.iter().any(|(k, _)| k == key)
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Iterates all pairs in their original order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

fn decode_component(raw: &str) -> Option<String> {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced).ok().map(|s| s.into_owned())
}

/// A fully parsed HTTP/1.1 request.
///
/// The head is created by [`Request::parse`] from a raw byte buffer; the
/// connection then attaches the body (read according to
/// [`body_length`](Self::body_length)) and the path parameters extracted by
/// the router.
///
/// # Examples
///
/// ```
/// use wicket::http::request::Request;
///
/// let raw = b"GET /hello?name=world HTTP/1.1\r\nHost: localhost\r\n\r\n";
/// let (request, _offset) = Request::parse(raw, 64).unwrap();
///
/// assert_eq!(request.method().as_str(), "GET");
/// assert_eq!(request.path(), "/hello");
/// assert_eq!(request.query_param("name"), Some("world"));
/// assert_eq!(request.headers().get("host"), Some("localhost"));
/// ```
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    path: String,
    /// HTTP minor version: 0 for HTTP/1.0, 1 for HTTP/1.1.
    version: u8,
    headers: Headers,
    query_string: Option<String>,
    query: QueryParams,
    body: Bytes,
    params: PathParams,
    peer_addr: Option<SocketAddr>,
    received_at: Instant,
}

impl Request {
    /// Default maximum number of headers per request.
    pub const MAX_HEADERS: usize = 64;

    /// Parse a raw HTTP/1.1 request head from a byte slice.
    ///
    /// Returns the parsed `Request` (with an empty body) and the byte offset at
    /// which the body begins in `buf`, i.e. immediately after the `\r\n\r\n`
    /// header terminator.
    ///
    /// # Errors
    ///
    /// - [`RequestError::Incomplete`]: more data is needed to complete the request head.
    /// - [`RequestError::Parse`]: the data is malformed, or has more than
    ///   `max_headers` header fields.
    /// - [`RequestError::MissingField`]: a required field (method, path, version) is absent.
    pub fn parse(buf: &[u8], max_headers: usize) -> Result<(Self, usize), RequestError> {
        let mut headers = vec![httparse::EMPTY_HEADER; max_headers];
        let mut raw_req = httparse::Request::new(&mut headers);

        let body_offset = match raw_req.parse(buf)? {
            httparse::Status::Complete(offset) => offset,
            httparse::Status::Partial => return Err(RequestError::Incomplete),
        };

        let method = match raw_req.method {
            Some(m) => m.parse::<Method>().unwrap_or_else(|e| match e {}),
            None => return Err(RequestError::MissingField { field: "method" }),
        };

        let raw_path = raw_req
            .path
            .ok_or(RequestError::MissingField { field: "path" })?;

        let (path, query_string) = match raw_path.split_once('?') {
            Some((path, query)) => (path.to_owned(), Some(query.to_owned())),
            None => (raw_path.to_owned(), None),
        };

        let version = raw_req
            .version
            .ok_or(RequestError::MissingField { field: "version" })?;

        let mut header_map = Headers::with_capacity(raw_req.headers.len());
        for header in raw_req.headers.iter() {
            let value = str::from_utf8(header.value)?;
            header_map.insert(header.name, value);
        }

        let query = query_string
            .as_deref()
            .map(QueryParams::parse)
            .unwrap_or_default();

        Ok((
            Self {
                method,
                path,
                version,
                headers: header_map,
                query_string,
                query,
                body: Bytes::new(),
                params: PathParams::new(),
                peer_addr: None,
                received_at: Instant::now(),
            },
            body_offset,
        ))
    }

    /// Returns the HTTP method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the raw request path (without the query string).
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the HTTP minor version number (0 = HTTP/1.0, 1 = HTTP/1.1).
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Returns the request headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns the raw query string (without the leading `?`), if any.
    pub fn query_string(&self) -> Option<&str> {
        self.query_string.as_deref()
    }

    /// Returns the decoded query parameters.
    pub fn query(&self) -> &QueryParams {
        &self.query
    }

    /// Returns the first decoded query parameter value for `key`.
    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.query.get(key)
    }

    /// Returns the request body bytes.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Returns the body as UTF-8 text.
    pub fn text(&self) -> Result<&str, RequestError> {
        Ok(str::from_utf8(&self.body)?)
    }

    /// Deserializes the body as JSON.
    pub fn json<T>(&self) -> Result<T, RequestError>
    where
        T: serde::de::DeserializeOwned,
    {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Decodes an `application/x-www-form-urlencoded` body.
    ///
    /// # Errors
    ///
    /// [`RequestError::UnsupportedMediaType`] if the request declares another
    /// content type; [`RequestError::Utf8`] if the body is not UTF-8.
    pub fn form(&self) -> Result<QueryParams, RequestError> {
        const FORM: &str = "application/x-www-form-urlencoded";
        let is_form = self
            .headers
            .get("content-type")
            .and_then(|ct| ct.split(';').next())
            .is_some_and(|mime| mime.trim().eq_ignore_ascii_case(FORM));
        if !is_form {
            return Err(RequestError::UnsupportedMediaType { expected: FORM });
        }
        Ok(QueryParams::parse(self.text()?))
    }

    /// Returns the path parameters extracted by the router.
    pub fn params(&self) -> &PathParams {
        &self.params
    }

    /// Returns one typed path parameter.
    pub fn param(&self, name: &str) -> Option<&ParamValue> {
        self.params.get(name)
    }

    /// Returns an `int` path parameter.
    pub fn param_int(&self, name: &str) -> Option<i64> {
        self.params.get(name).and_then(ParamValue::as_int)
    }

    /// Returns the address of the client, when the request came over a socket.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Returns the instant the request head was parsed.
    pub fn received_at(&self) -> Instant {
        self.received_at
    }

    /// Returns `true` if the connection should be kept alive after this request.
    ///
    /// HTTP/1.1 defaults to keep-alive unless the `Connection` header carries
    /// `close`. HTTP/1.0 defaults to close unless it carries `keep-alive`.
    pub fn is_keep_alive(&self) -> bool {
        if self.headers.has_token("connection", "close") {
            return false;
        }
        self.version == 1 || self.headers.has_token("connection", "keep-alive")
    }

    /// Returns `true` if the client asked for an interim `100 Continue`.
    pub fn expects_continue(&self) -> bool {
        self.version == 1 && self.headers.has_token("expect", "100-continue")
    }

    /// Returns the value of the `Content-Length` header parsed as a `usize`, if present.
    pub fn content_length(&self) -> Option<usize> {
        self.headers.get("content-length")?.trim().parse().ok()
    }

    /// Determines how the body of this request is framed.
    ///
    /// # Errors
    ///
    /// - [`RequestError::ConflictingFraming`]: both `Transfer-Encoding` and
    ///   `Content-Length` were sent.
    /// - [`RequestError::UnsupportedTransferEncoding`]: the final transfer
    ///   coding is not `chunked`.
    /// - [`RequestError::InvalidContentLength`]: a non-numeric or
    ///   disagreeing `Content-Length`.
    pub fn body_length(&self) -> Result<BodyLength, RequestError> {
        if self.headers.contains("transfer-encoding") {
            if self.headers.contains("content-length") {
                return Err(RequestError::ConflictingFraming);
            }
            return match self.headers.tokens("transfer-encoding").last() {
                Some(coding) if coding.eq_ignore_ascii_case("chunked") => Ok(BodyLength::Chunked),
                other => Err(RequestError::UnsupportedTransferEncoding {
                    coding: other.unwrap_or_default().to_owned(),
                }),
            };
        }

        let mut length: Option<usize> = None;
        for value in self.headers.tokens("content-length") {
            if !value.bytes().all(|b| b.is_ascii_digit()) {
                return Err(RequestError::InvalidContentLength);
            }
            let parsed: usize = value
                .parse()
                .map_err(|_| RequestError::InvalidContentLength)?;
            match length {
                Some(previous) if previous != parsed => {
                    return Err(RequestError::InvalidContentLength);
                }
                _ => length = Some(parsed),
            }
        }

        if length.is_none() && self.headers.contains("content-length") {
            return Err(RequestError::InvalidContentLength);
        }

        Ok(match length {
            None | Some(0) => BodyLength::Empty,
            Some(n) => BodyLength::Fixed(n),
        })
    }

    pub(crate) fn set_body(&mut self, body: Bytes) {
        self.body = body;
    }

    pub(crate) fn set_params(&mut self, params: PathParams) {
        self.params = params;
    }

    pub(crate) fn set_peer_addr(&mut self, peer_addr: Option<SocketAddr>) {
        self.peer_addr = peer_addr;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &[u8]) -> Request {
        Request::parse(raw, Request::MAX_HEADERS).unwrap().0
    }

    #[test]
    fn parse_simple_get() {
        let raw = b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n";
        let (req, offset) = Request::parse(raw, Request::MAX_HEADERS).unwrap();
        assert_eq!(req.method().as_str(), "GET");
        assert_eq!(req.path(), "/");
        assert_eq!(req.version(), 1);
        assert_eq!(req.headers().get("host"), Some("localhost"));
        assert_eq!(offset, raw.len()); // no body
        assert!(req.body().is_empty());
    }

    #[test]
    fn parse_query_string() {
        let raw = b"GET /search?q=rust+lang&page=2&q=tokio HTTP/1.1\r\nHost: example.com\r\n\r\n";
        let req = parse(raw);
        assert_eq!(req.path(), "/search");
        assert_eq!(req.query_string(), Some("q=rust+lang&page=2&q=tokio"));
        assert_eq!(req.query_param("q"), Some("rust lang"));
        assert_eq!(req.query_param("page"), Some("2"));
        let all: Vec<_> = req.query().get_all("q").collect();
        assert_eq!(all, vec!["rust lang", "tokio"]);
    }

    #[test]
    fn query_percent_decoding() {
        let q = QueryParams::parse("a=%2Fetc%2Fpasswd&flag&=empty-key&&b=");
        assert_eq!(q.get("a"), Some("/etc/passwd"));
        assert_eq!(q.get("flag"), Some(""));
        assert_eq!(q.get(""), Some("empty-key"));
        assert_eq!(q.get("b"), Some(""));
        assert_eq!(q.len(), 4);
    }

    #[test]
    fn incomplete_request() {
        let raw = b"GET / HTTP/1.1\r\nHost:";
        assert!(matches!(
            Request::parse(raw, Request::MAX_HEADERS),
            Err(RequestError::Incomplete)
        ));
    }

    #[test]
    fn malformed_request_line() {
        let raw = b"GET\x01/ HTTP/1.1\r\n\r\n";
        assert!(matches!(
            Request::parse(raw, Request::MAX_HEADERS),
            Err(RequestError::Parse(_))
        ));
    }

    #[test]
    fn too_many_headers() {
        let raw = b"GET / HTTP/1.1\r\nA: 1\r\nB: 2\r\nC: 3\r\n\r\n";
        let err = Request::parse(raw, 2).unwrap_err();
        assert!(err.is_too_many_headers());
    }

    #[test]
    fn keep_alive_http11_default() {
        let req = parse(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n");
        assert!(req.is_keep_alive());
    }

    #[test]
    fn connection_close() {
        let req = parse(b"GET / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
        assert!(!req.is_keep_alive());
    }

    #[test]
    fn http10_keep_alive_is_opt_in() {
        assert!(!parse(b"GET / HTTP/1.0\r\n\r\n").is_keep_alive());
        assert!(parse(b"GET / HTTP/1.0\r\nConnection: Keep-Alive\r\n\r\n").is_keep_alive());
    }

    #[test]
    fn content_length() {
        let raw = b"POST / HTTP/1.1\r\nHost: localhost\r\nContent-Length: 5\r\n\r\nhello";
        let (req, body_offset) = Request::parse(raw, Request::MAX_HEADERS).unwrap();
        assert_eq!(req.content_length(), Some(5));
        assert_eq!(req.body_length().unwrap(), BodyLength::Fixed(5));
        assert_eq!(&raw[body_offset..], b"hello");
    }

    #[test]
    fn framing_empty_and_zero() {
        assert_eq!(parse(b"GET / HTTP/1.1\r\n\r\n").body_length().unwrap(), BodyLength::Empty);
        assert_eq!(
            parse(b"POST / HTTP/1.1\r\nContent-Length: 0\r\n\r\n")
                .body_length()
                .unwrap(),
            BodyLength::Empty
        );
    }

    #[test]
    fn framing_chunked() {
        let req = parse(b"POST / HTTP/1.1\r\nTransfer-Encoding: gzip, chunked\r\n\r\n");
        assert_eq!(req.body_length().unwrap(), BodyLength::Chunked);
    }

    #[test]
    fn framing_rejects_non_final_chunked() {
        let req = parse(b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked, gzip\r\n\r\n");
        assert!(matches!(
            req.body_length(),
            Err(RequestError::UnsupportedTransferEncoding { coding }) if coding == "gzip"
        ));
    }

    #[test]
    fn framing_rejects_both_headers() {
        let req = parse(
            b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\nContent-Length: 3\r\n\r\n",
        );
        assert!(matches!(req.body_length(), Err(RequestError::ConflictingFraming)));
    }

    #[test]
    fn framing_content_length_validation() {
        let bad = parse(b"POST / HTTP/1.1\r\nContent-Length: -1\r\n\r\n");
        assert!(matches!(bad.body_length(), Err(RequestError::InvalidContentLength)));

        let disagree = parse(b"POST / HTTP/1.1\r\nContent-Length: 3\r\nContent-Length: 4\r\n\r\n");
        assert!(matches!(disagree.body_length(), Err(RequestError::InvalidContentLength)));

        let agree = parse(b"POST / HTTP/1.1\r\nContent-Length: 3, 3\r\n\r\n");
        assert_eq!(agree.body_length().unwrap(), BodyLength::Fixed(3));
    }

    #[test]
    fn form_body() {
        let mut req = parse(
            b"POST /f HTTP/1.1\r\nContent-Type: application/x-www-form-urlencoded; charset=utf-8\r\n\r\n",
        );
        req.set_body(Bytes::from_static(b"name=a+b&tags=x&tags=y"));
        let form = req.form().unwrap();
        assert_eq!(form.get("name"), Some("a b"));
        assert_eq!(form.get_all("tags").count(), 2);
    }

    #[test]
    fn form_requires_content_type() {
        let mut req = parse(b"POST /f HTTP/1.1\r\nContent-Type: text/plain\r\n\r\n");
        req.set_body(Bytes::from_static(b"a=1"));
        assert!(matches!(
            req.form(),
            Err(RequestError::UnsupportedMediaType { .. })
        ));
    }

    #[test]
    fn json_body() {
        #[derive(serde::Deserialize)]
        struct Item {
            id: u32,
        }
        let mut req = parse(b"POST / HTTP/1.1\r\n\r\n");
        req.set_body(Bytes::from_static(br#"{"id":7}"#));
        assert_eq!(req.json::<Item>().unwrap().id, 7);
    }

    #[test]
    fn expect_continue() {
        assert!(parse(b"PUT / HTTP/1.1\r\nExpect: 100-continue\r\n\r\n").expects_continue());
        assert!(!parse(b"PUT / HTTP/1.1\r\n\r\n").expects_continue());
    }
}
