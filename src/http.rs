//! Minimal HTTP/1.1 request parsing and reply formatting
//!
//! Only what the node needs is supported: a request line, headers,
//! and a payload delimited by `Content-Length`.
//! Chunked transfer encoding is not understood and yields a request without payload.

use std::str;

use http::header::{CONNECTION, CONTENT_LENGTH, LOCATION, RETRY_AFTER};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use thiserror::Error;

/// Capacity of the receive buffer of a connection
pub const HTTP_MAX_SIZE: usize = 8192;
/// Maximum number of headers accepted per request
pub const HTTP_MAX_HEADERS: usize = 40;

const HEADER_END: &[u8] = b"\r\n\r\n";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum HttpError {
    #[error("request header is not valid text")]
    InvalidEncoding,
    #[error("malformed request line: {0:?}")]
    RequestLine(String),
    #[error("malformed header line: {0:?}")]
    Header(String),
    #[error("more than {max} headers", max = HTTP_MAX_HEADERS)]
    TooManyHeaders,
    #[error("invalid content length: {0:?}")]
    ContentLength(String),
    #[error("request of {0} bytes exceeds the receive buffer")]
    TooLarge(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    pub uri: String,
    pub headers: HeaderMap,
    pub payload: Vec<u8>,
}

impl Request {
    /// Whether the client asked to close the connection after this request
    pub fn wants_close(&self) -> bool {
        self.headers
            .get(CONNECTION)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.trim().eq_ignore_ascii_case("close"))
            .unwrap_or(false)
    }
}

/// Result of looking at the front of a receive buffer
#[derive(Debug, PartialEq, Eq)]
pub enum Parsed {
    /// A full request was found, spanning the first `consumed` bytes
    Complete { request: Request, consumed: usize },
    /// More bytes are needed
    Incomplete,
}

/// Tries to carve one complete request out of the front of `buffer`
pub fn parse_request(buffer: &[u8]) -> Result<Parsed, HttpError> {
    let header_end = match buffer
        .windows(HEADER_END.len())
        .position(|window| window == HEADER_END)
    {
        Some(position) => position,
        None => return Ok(Parsed::Incomplete),
    };
    let head = str::from_utf8(&buffer[..header_end]).map_err(|_| HttpError::InvalidEncoding)?;
    let mut lines = head.split("\r\n");

    let request_line = lines.next().unwrap_or_default();
    let (method, uri) = parse_request_line(request_line)?;

    let mut headers = HeaderMap::new();
    for line in lines {
        if headers.len() >= HTTP_MAX_HEADERS {
            return Err(HttpError::TooManyHeaders);
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| HttpError::Header(line.to_owned()))?;
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| HttpError::Header(line.to_owned()))?;
        let value = HeaderValue::from_str(value.trim())
            .map_err(|_| HttpError::Header(line.to_owned()))?;
        headers.append(name, value);
    }

    let payload_length = match headers.get(CONTENT_LENGTH) {
        Some(value) => {
            let text = value.to_str().unwrap_or_default();
            if text.is_empty() || !text.bytes().all(|byte| byte.is_ascii_digit()) {
                return Err(HttpError::ContentLength(text.to_owned()));
            }
            text.parse::<usize>()
                .map_err(|_| HttpError::ContentLength(text.to_owned()))?
        }
        None => 0,
    };
    let payload_start = header_end + HEADER_END.len();
    let consumed = match payload_start.checked_add(payload_length) {
        Some(consumed) => consumed,
        None => return Err(HttpError::ContentLength(payload_length.to_string())),
    };
    // Waiting for more would never complete the request
    if consumed > HTTP_MAX_SIZE {
        return Err(HttpError::TooLarge(consumed));
    }
    if buffer.len() < consumed {
        return Ok(Parsed::Incomplete);
    }

    Ok(Parsed::Complete {
        request: Request {
            method,
            uri,
            headers,
            payload: buffer[payload_start..consumed].to_vec(),
        },
        consumed,
    })
}

fn parse_request_line(line: &str) -> Result<(Method, String), HttpError> {
    let malformed = || HttpError::RequestLine(line.to_owned());
    let parts: Vec<&str> = line.split(' ').collect();
    let [method, uri, version] = parts[..] else {
        return Err(malformed());
    };
    if !uri.starts_with('/') || !version.starts_with("HTTP/") {
        return Err(malformed());
    }
    let method = Method::from_bytes(method.as_bytes()).map_err(|_| malformed())?;
    Ok((method, uri.to_owned()))
}

/// A single response to a single request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl Reply {
    pub fn new(status: StatusCode) -> Self {
        Reply {
            status,
            headers: HeaderMap::new(),
            body: Vec::new(),
        }
    }

    pub fn ok(body: Vec<u8>) -> Self {
        Reply {
            body,
            ..Reply::new(StatusCode::OK)
        }
    }

    /// `303 See Other`, pointing the client at `http://<authority><path>`
    pub fn see_other(authority: impl std::fmt::Display, path: &str) -> Self {
        let mut reply = Reply::new(StatusCode::SEE_OTHER);
        match HeaderValue::try_from(format!("http://{}{}", authority, path)) {
            Ok(location) => {
                reply.headers.insert(LOCATION, location);
            }
            // The path was a valid header value when it arrived, this only guards odd authorities
            Err(_) => return Reply::new(StatusCode::INTERNAL_SERVER_ERROR),
        }
        reply
    }

    /// `503 Service Unavailable` asking the client to come back after a second
    pub fn retry_later() -> Self {
        let mut reply = Reply::new(StatusCode::SERVICE_UNAVAILABLE);
        reply
            .headers
            .insert(RETRY_AFTER, HeaderValue::from_static("1"));
        reply
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(64 + self.body.len());
        buf.extend_from_slice(
            format!(
                "HTTP/1.1 {} {}\r\n",
                self.status.as_u16(),
                reason_phrase(self.status)
            )
            .as_bytes(),
        );
        for (name, value) in self.headers.iter() {
            buf.extend_from_slice(title_case(name).as_bytes());
            buf.extend_from_slice(b": ");
            buf.extend_from_slice(value.as_bytes());
            buf.extend_from_slice(b"\r\n");
        }
        if self.status != StatusCode::NO_CONTENT && !self.headers.contains_key(CONTENT_LENGTH) {
            buf.extend_from_slice(format!("Content-Length: {}\r\n", self.body.len()).as_bytes());
        }
        buf.extend_from_slice(b"\r\n");
        buf.extend_from_slice(&self.body);
        buf
    }
}

/// `retry-after` -> `Retry-After`, the http crate keeps names in lower case
fn title_case(name: &HeaderName) -> String {
    name.as_str()
        .split('-')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

fn reason_phrase(status: StatusCode) -> &'static str {
    if status == StatusCode::NOT_IMPLEMENTED {
        return "Method Not Supported";
    }
    status.canonical_reason().unwrap_or("Unknown")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete(buffer: &[u8]) -> (Request, usize) {
        match parse_request(buffer).unwrap() {
            Parsed::Complete { request, consumed } => (request, consumed),
            Parsed::Incomplete => panic!("Request should be complete"),
        }
    }

    #[test]
    fn test_parse_get() {
        let raw = b"GET /static/foo HTTP/1.1\r\nHost: localhost\r\n\r\n";
        let (request, consumed) = complete(raw);
        assert_eq!(request.method, Method::GET);
        assert_eq!(request.uri, "/static/foo");
        assert_eq!(request.headers.get("host").unwrap(), "localhost");
        assert!(request.payload.is_empty());
        assert_eq!(consumed, raw.len());
        assert!(!request.wants_close());
    }

    #[test]
    fn test_parse_put_with_payload() {
        let raw = b"PUT /x HTTP/1.1\r\nContent-Length: 5\r\n\r\nHelloGET";
        let (request, consumed) = complete(raw);
        assert_eq!(request.method, Method::PUT);
        assert_eq!(request.payload, b"Hello");
        assert_eq!(&raw[consumed..], b"GET");
    }

    #[test]
    fn test_incomplete_requests() {
        assert_eq!(parse_request(b"").unwrap(), Parsed::Incomplete);
        assert_eq!(
            parse_request(b"GET / HTTP/1.1\r\nHost: a\r\n").unwrap(),
            Parsed::Incomplete
        );
        assert_eq!(
            parse_request(b"PUT / HTTP/1.1\r\nContent-Length: 4\r\n\r\nab").unwrap(),
            Parsed::Incomplete
        );
    }

    #[test]
    fn test_malformed_requests() {
        assert!(matches!(
            parse_request(b"garbage\r\n\r\n"),
            Err(HttpError::RequestLine(_))
        ));
        assert!(matches!(
            parse_request(b"GET static HTTP/1.1\r\n\r\n"),
            Err(HttpError::RequestLine(_))
        ));
        assert!(matches!(
            parse_request(b"GET / HTTP/1.1\r\nno colon here\r\n\r\n"),
            Err(HttpError::Header(_))
        ));
        assert!(matches!(
            parse_request(b"PUT / HTTP/1.1\r\nContent-Length: many\r\n\r\n"),
            Err(HttpError::ContentLength(_))
        ));
        assert!(matches!(
            parse_request(b"PUT / HTTP/1.1\r\nContent-Length: +5\r\n\r\nhello"),
            Err(HttpError::ContentLength(_))
        ));
        let mut raw = b"GET / HTTP/1.1\r\n".to_vec();
        for i in 0..=HTTP_MAX_HEADERS {
            raw.extend_from_slice(format!("X-Header-{}: {}\r\n", i, i).as_bytes());
        }
        raw.extend_from_slice(b"\r\n");
        assert_eq!(parse_request(&raw), Err(HttpError::TooManyHeaders));
    }

    #[test]
    fn test_payload_larger_than_buffer() {
        assert!(matches!(
            parse_request(b"PUT /x HTTP/1.1\r\nContent-Length: 100000\r\n\r\nab"),
            Err(HttpError::TooLarge(_))
        ));
        // Exactly filling the buffer is still fine
        let head = b"PUT /x HTTP/1.1\r\nContent-Length: 8160\r\n\r\n";
        let length = HTTP_MAX_SIZE - head.len();
        let raw = format!("PUT /x HTTP/1.1\r\nContent-Length: {}\r\n\r\n", length);
        assert_eq!(raw.len(), head.len());
        assert_eq!(parse_request(raw.as_bytes()), Ok(Parsed::Incomplete));
    }

    #[test]
    fn test_connection_close_header() {
        let (request, _) = complete(b"GET / HTTP/1.1\r\nconnection: Close\r\n\r\n");
        assert!(request.wants_close());
        let (request, _) = complete(b"GET / HTTP/1.1\r\nConnection: keep-alive\r\n\r\n");
        assert!(!request.wants_close());
    }

    #[test]
    fn test_reply_format() {
        assert_eq!(
            Reply::ok(b"Foo".to_vec()).to_bytes(),
            b"HTTP/1.1 200 OK\r\nContent-Length: 3\r\n\r\nFoo"
        );
        assert_eq!(
            Reply::new(StatusCode::NO_CONTENT).to_bytes(),
            b"HTTP/1.1 204 No Content\r\n\r\n"
        );
        assert_eq!(
            Reply::new(StatusCode::NOT_IMPLEMENTED).to_bytes(),
            b"HTTP/1.1 501 Method Not Supported\r\nContent-Length: 0\r\n\r\n"
        );
        assert_eq!(
            Reply::see_other("127.0.0.1:2002", "/path").to_bytes(),
            b"HTTP/1.1 303 See Other\r\nLocation: http://127.0.0.1:2002/path\r\nContent-Length: 0\r\n\r\n"
        );
        assert_eq!(
            Reply::retry_later().to_bytes(),
            b"HTTP/1.1 503 Service Unavailable\r\nRetry-After: 1\r\nContent-Length: 0\r\n\r\n"
        );
    }
}
