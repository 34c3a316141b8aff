use std::collections::HashMap;
use std::fmt;
use std::io::{self, Read};
use std::net::SocketAddr;

use chrono::{DateTime, Utc};
use http::StatusCode;

const MAX_HEADER_SIZE: usize = 8192; // 8KB

pub const SERVER_NAME: &str = "XT Static Server";
const SERVER_TOKEN: &str = "XT-Static-Server/0.1";

#[derive(Debug, Clone, Copy, Eq, Hash, PartialEq)]
pub enum Method {
    GET,
    HEAD,
    POST,
    PUT,
    DELETE,
    OPTIONS,
    PATCH,
}

impl Method {
    fn from_token(s: &str) -> Option<Method> {
        match s {
            "GET" => Some(Method::GET),
            "HEAD" => Some(Method::HEAD),
            "POST" => Some(Method::POST),
            "PUT" => Some(Method::PUT),
            "DELETE" => Some(Method::DELETE),
            "OPTIONS" => Some(Method::OPTIONS),
            "PATCH" => Some(Method::PATCH),
            _ => None,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Method::GET => "GET",
            Method::HEAD => "HEAD",
            Method::POST => "POST",
            Method::PUT => "PUT",
            Method::DELETE => "DELETE",
            Method::OPTIONS => "OPTIONS",
            Method::PATCH => "PATCH",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
pub enum ParseError {
    InvalidRequest,
    HeadersTooLarge,
    Io(io::Error),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::InvalidRequest => write!(f, "malformed request"),
            ParseError::HeadersTooLarge => {
                write!(f, "request headers exceed {} bytes", MAX_HEADER_SIZE)
            }
            ParseError::Io(e) => write!(f, "io error: {}", e),
        }
    }
}

impl From<io::Error> for ParseError {
    fn from(error: io::Error) -> Self {
        ParseError::Io(error)
    }
}

#[derive(Debug)]
pub struct Request {
    pub method: Method,
    /// Raw request target as sent by the client, query string included.
    pub target: String,
    /// Header names are lowercased at parse time.
    pub headers: HashMap<String, String>,
    pub peer: SocketAddr,
}

impl Request {
    pub fn parse(stream: &mut impl Read, peer: SocketAddr) -> Result<Request, ParseError> {
        let mut buf = Vec::with_capacity(1024);
        let mut chunk = [0u8; 512];

        let head_end = loop {
            if let Some(pos) = find_header_end(&buf) {
                break pos;
            }
            if buf.len() >= MAX_HEADER_SIZE {
                return Err(ParseError::HeadersTooLarge);
            }
            match stream.read(&mut chunk)? {
                0 => return Err(ParseError::InvalidRequest),
                n => buf.extend_from_slice(&chunk[..n]),
            }
        };

        let head = String::from_utf8_lossy(&buf[..head_end]);
        let mut lines = head.lines();

        let request_line = lines.next().ok_or(ParseError::InvalidRequest)?;
        let mut parts = request_line.split_whitespace();
        let method = parts
            .next()
            .and_then(Method::from_token)
            .ok_or(ParseError::InvalidRequest)?;
        let target = parts.next().ok_or(ParseError::InvalidRequest)?.to_string();

        let mut headers = HashMap::new();
        for line in lines {
            if line.is_empty() {
                break;
            }
            if let Some((name, value)) = line.split_once(':') {
                headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
            }
        }

        Ok(Request {
            method,
            target,
            headers,
            peer,
        })
    }

    /// Header lookup; `name` must be lowercase.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// Request path with any query string or fragment stripped.
    pub fn path(&self) -> &str {
        self.target
            .split(['?', '#'])
            .next()
            .unwrap_or(self.target.as_str())
    }
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

pub struct Response {
    pub status: StatusCode,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl Response {
    fn with_status(status: StatusCode) -> Response {
        let mut headers = HashMap::new();
        headers.insert("Connection".to_string(), "close".to_string());
        headers.insert("Server".to_string(), SERVER_TOKEN.to_string());
        headers.insert("Date".to_string(), format_http_date(Utc::now()));

        Response {
            status,
            headers,
            body: Vec::new(),
        }
    }

    pub fn new(status: StatusCode, content_type: &str, body: Vec<u8>) -> Response {
        let mut response = Response::with_status(status);
        response
            .headers
            .insert("Content-Type".to_string(), content_type.to_string());
        response
            .headers
            .insert("Content-Length".to_string(), body.len().to_string());
        response.body = body;
        response
    }

    pub fn ok(content_type: &str, body: Vec<u8>) -> Response {
        Response::new(StatusCode::OK, content_type, body)
    }

    pub fn not_modified() -> Response {
        Response::with_status(StatusCode::NOT_MODIFIED)
    }

    pub fn not_found() -> Response {
        Response::error_page(
            StatusCode::NOT_FOUND,
            "The requested resource could not be found on this server.",
        )
    }

    pub fn forbidden() -> Response {
        Response::error_page(
            StatusCode::FORBIDDEN,
            "Access to the requested resource is not permitted.",
        )
    }

    pub fn bad_request(message: &str) -> Response {
        Response::error_page(StatusCode::BAD_REQUEST, message)
    }

    pub fn internal_server_error() -> Response {
        Response::error_page(
            StatusCode::INTERNAL_SERVER_ERROR,
            "The server encountered an internal error.",
        )
    }

    pub fn method_not_allowed(allowed: &[&str]) -> Response {
        let mut response = Response::error_page(
            StatusCode::METHOD_NOT_ALLOWED,
            "The requested method is not allowed for this resource.",
        );
        response
            .headers
            .insert("Allow".to_string(), allowed.join(", "));
        response
    }

    pub fn range_not_satisfiable(total: u64) -> Response {
        let mut response = Response::with_status(StatusCode::RANGE_NOT_SATISFIABLE);
        response
            .headers
            .insert("Content-Range".to_string(), format!("bytes */{}", total));
        response
            .headers
            .insert("Content-Length".to_string(), "0".to_string());
        response
    }

    fn error_page(status: StatusCode, message: &str) -> Response {
        let code = status.as_u16();
        let reason = status.canonical_reason().unwrap_or("Error");
        let body = format!(
            "<!DOCTYPE html>\
            <html>\
            <head><title>{code} {reason}</title></head>\
            <body>\
                <h1>{code} {reason}</h1>\
                <p>{message}</p>\
            </body>\
            </html>"
        );
        Response::new(status, "text/html; charset=utf-8", body.into_bytes())
    }

    /// Serialize status line, headers, and (unless answering HEAD) the body.
    pub fn to_bytes(&self, include_body: bool) -> Vec<u8> {
        let reason = self.status.canonical_reason().unwrap_or("");
        let mut out = format!("HTTP/1.1 {} {}\r\n", self.status.as_u16(), reason).into_bytes();

        for (name, value) in &self.headers {
            out.extend_from_slice(format!("{}: {}\r\n", name, value).as_bytes());
        }

        out.extend_from_slice(b"\r\n");
        if include_body {
            out.extend_from_slice(&self.body);
        }
        out
    }
}

/// IMF-fixdate, e.g. `Sun, 06 Nov 1994 08:49:37 GMT`.
pub fn format_http_date(t: DateTime<Utc>) -> String {
    t.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

pub fn parse_http_date(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(s)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}
