use std::fmt;
use std::io::{self, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::config::Config;
use crate::http::{Method, ParseError, Request, Response};
use crate::middleware::Middleware;
use crate::static_files::StaticFiles;
use crate::threadpool::{PoolError, ThreadPool};

/// Bounds the time a client may take to deliver its request headers; bodies
/// and responses carry no deadline.
const READ_HEADER_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug)]
pub enum ServerError {
    Io(io::Error),
    Pool(PoolError),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerError::Io(e) => write!(f, "io error: {}", e),
            ServerError::Pool(e) => write!(f, "worker pool error: {}", e),
        }
    }
}

impl std::error::Error for ServerError {}

impl From<io::Error> for ServerError {
    fn from(error: io::Error) -> Self {
        ServerError::Io(error)
    }
}

impl From<PoolError> for ServerError {
    fn from(error: PoolError) -> Self {
        ServerError::Pool(error)
    }
}

/// Everything a connection needs, shared read-only across workers.
struct HandlerContext {
    files: StaticFiles,
    base_url: String,
    middleware: Vec<Box<dyn Middleware>>,
}

pub struct Server {
    listener: TcpListener,
    pool: ThreadPool,
    ctx: HandlerContext,
}

impl Server {
    /// `root` must already be canonical (see `Config::resolve_root`).
    pub fn new(config: &Config, root: PathBuf) -> Result<Server, ServerError> {
        let addr = config.address();
        info!("Binding {} with {} worker threads", addr, config.workers);
        let listener = TcpListener::bind(&addr)?;
        let pool = ThreadPool::new(config.workers)?;

        Ok(Server {
            listener,
            pool,
            ctx: HandlerContext {
                files: StaticFiles::new(root),
                base_url: config.base_url(),
                middleware: Vec::new(),
            },
        })
    }

    pub fn with_middleware(mut self, middleware: Box<dyn Middleware>) -> Self {
        self.ctx.middleware.push(middleware);
        self
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept-and-dispatch until the process terminates. Accept errors are
    /// logged and the loop keeps going; only pool failures are fatal.
    pub fn run(self) -> Result<(), ServerError> {
        let Server {
            listener,
            pool,
            ctx,
        } = self;
        let ctx = Arc::new(ctx);

        info!("Listening on {}", listener.local_addr()?);
        info!("Serving files from {}", ctx.files.root().display());

        loop {
            match listener.accept() {
                Ok((stream, peer)) => {
                    debug!("New connection from {}", peer);
                    let ctx = Arc::clone(&ctx);
                    pool.execute(move || {
                        if let Err(e) = handle_connection(stream, peer, &ctx) {
                            debug!("Connection from {} ended with error: {}", peer, e);
                        }
                    })?;
                }
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                }
            }
        }
    }
}

fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    ctx: &HandlerContext,
) -> io::Result<()> {
    stream.set_read_timeout(Some(READ_HEADER_TIMEOUT))?;

    let mut request = match Request::parse(&mut stream, peer) {
        Ok(request) => request,
        Err(ParseError::Io(e)) => return Err(e),
        Err(e) => {
            warn!("{}: {}", peer, e);
            let mut response = Response::bad_request("The request could not be understood.");
            response.headers.insert(
                "Access-Control-Allow-Origin".to_string(),
                "*".to_string(),
            );
            stream.write_all(&response.to_bytes(true))?;
            return stream.flush();
        }
    };

    let mut early = None;
    for middleware in &ctx.middleware {
        if let Some(response) = middleware.process(&mut request) {
            early = Some(response);
            break;
        }
    }

    let mut response = early.unwrap_or_else(|| route(ctx, &request));
    for middleware in &ctx.middleware {
        middleware.after(&request, &mut response);
    }

    let include_body = request.method != Method::HEAD;
    stream.write_all(&response.to_bytes(include_body))?;
    stream.flush()
}

fn route(ctx: &HandlerContext, request: &Request) -> Response {
    if !matches!(request.method, Method::GET | Method::HEAD) {
        return Response::method_not_allowed(&["GET", "HEAD"]);
    }

    // Bare root with no index file gets the landing page instead of the
    // file-serving path.
    if request.path() == "/" && !ctx.files.has_root_index() {
        return ctx.files.placeholder(&ctx.base_url);
    }

    ctx.files.handle(request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::{CorsMiddleware, RequestLogMiddleware};
    use std::fs;
    use std::io::Read;
    use std::path::Path;
    use std::thread;

    fn spawn_server(root: &Path) -> SocketAddr {
        let config = Config {
            port: 0,
            ..Config::default()
        };
        let server = Server::new(&config, root.canonicalize().unwrap())
            .unwrap()
            .with_middleware(Box::new(CorsMiddleware))
            .with_middleware(Box::new(RequestLogMiddleware));
        let addr = server.local_addr().unwrap();
        thread::spawn(move || {
            let _ = server.run();
        });
        addr
    }

    fn roundtrip(addr: SocketAddr, raw: &str) -> String {
        let mut stream = TcpStream::connect(addr).unwrap();
        stream.write_all(raw.as_bytes()).unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).unwrap();
        response
    }

    fn get(addr: SocketAddr, target: &str) -> String {
        roundtrip(
            addr,
            &format!("GET {} HTTP/1.1\r\nHost: test\r\n\r\n", target),
        )
    }

    #[test]
    fn placeholder_served_when_root_has_no_index() {
        let dir = tempfile::tempdir().unwrap();
        let addr = spawn_server(dir.path());
        let response = get(addr, "/");
        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.contains("Content-Type: text/html; charset=utf-8"));
        assert!(response.contains("Access-Control-Allow-Origin: *"));
        let root = dir.path().canonicalize().unwrap();
        assert!(response.contains(&root.display().to_string()));
    }

    #[test]
    fn root_index_wins_over_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("index.html"), "<p>welcome home</p>").unwrap();
        let addr = spawn_server(dir.path());
        let response = get(addr, "/");
        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.contains("<p>welcome home</p>"));
    }

    #[test]
    fn missing_file_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let addr = spawn_server(dir.path());
        let response = get(addr, "/missing.txt");
        assert!(response.starts_with("HTTP/1.1 404 Not Found"));
    }

    #[test]
    fn traversal_never_leaves_root() {
        let outer = tempfile::tempdir().unwrap();
        let root = outer.path().join("webroot");
        fs::create_dir(&root).unwrap();
        fs::write(outer.path().join("secret.txt"), "top secret").unwrap();

        let addr = spawn_server(&root);
        for target in ["/../secret.txt", "/%2e%2e/secret.txt", "/a/../../secret.txt"] {
            let response = get(addr, target);
            assert!(
                !response.starts_with("HTTP/1.1 2"),
                "expected non-2xx for {}, got: {}",
                target,
                response.lines().next().unwrap_or("")
            );
            assert!(!response.contains("top secret"));
        }
    }

    #[test]
    fn js_gets_pinned_content_type() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("app.js"), "/* anything at all */").unwrap();
        let addr = spawn_server(dir.path());
        let response = get(addr, "/app.js");
        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.contains("Content-Type: application/javascript; charset=utf-8"));
    }

    #[test]
    fn head_sends_headers_without_body() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("app.js"), "payload").unwrap();
        let addr = spawn_server(dir.path());
        let response = roundtrip(addr, "HEAD /app.js HTTP/1.1\r\nHost: test\r\n\r\n");
        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.contains("Content-Length: 7"));
        assert!(!response.contains("payload"));
    }

    #[test]
    fn post_is_method_not_allowed() {
        let dir = tempfile::tempdir().unwrap();
        let addr = spawn_server(dir.path());
        let response = roundtrip(addr, "POST / HTTP/1.1\r\nHost: test\r\n\r\n");
        assert!(response.starts_with("HTTP/1.1 405 Method Not Allowed"));
        assert!(response.contains("Allow: GET, HEAD"));
    }

    #[test]
    fn garbage_request_gets_400_with_cors() {
        let dir = tempfile::tempdir().unwrap();
        let addr = spawn_server(dir.path());
        let response = roundtrip(addr, "HELLO THERE\r\n\r\n");
        assert!(response.starts_with("HTTP/1.1 400 Bad Request"));
        assert!(response.contains("Access-Control-Allow-Origin: *"));
    }
}
