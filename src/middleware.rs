use log::info;

use crate::http::{Request, Response};

/// Cross-cutting hooks around the static handler. `process` may short-
/// circuit with an early response; `after` decorates whatever response the
/// handler produced.
pub trait Middleware: Send + Sync {
    fn process(&self, request: &mut Request) -> Option<Response> {
        let _ = request;
        None
    }

    fn after(&self, request: &Request, response: &mut Response);
}

/// Permissive cross-origin header on every response, for local development
/// tooling that fetches from other origins.
pub struct CorsMiddleware;

impl Middleware for CorsMiddleware {
    fn after(&self, _request: &Request, response: &mut Response) {
        response.headers.insert(
            "Access-Control-Allow-Origin".to_string(),
            "*".to_string(),
        );
    }
}

/// One log line per request: client address, method, path, status.
pub struct RequestLogMiddleware;

impl Middleware for RequestLogMiddleware {
    fn after(&self, request: &Request, response: &mut Response) {
        info!(
            "{} \"{} {}\" {}",
            request.peer,
            request.method,
            request.target,
            response.status.as_u16()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Method;
    use std::collections::HashMap;

    fn request() -> Request {
        Request {
            method: Method::GET,
            target: "/".to_string(),
            headers: HashMap::new(),
            peer: "127.0.0.1:40000".parse().unwrap(),
        }
    }

    #[test]
    fn cors_header_is_added() {
        let mut response = Response::ok("text/plain", Vec::new());
        CorsMiddleware.after(&request(), &mut response);
        assert_eq!(
            response
                .headers
                .get("Access-Control-Allow-Origin")
                .map(String::as_str),
            Some("*")
        );
    }

    #[test]
    fn cors_header_is_added_to_error_responses_too() {
        let mut response = Response::not_found();
        CorsMiddleware.after(&request(), &mut response);
        assert!(response.headers.contains_key("Access-Control-Allow-Origin"));
    }
}
